//! Error types for the kim operator

use thiserror::Error;

/// Main error type for kim operations
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum Error {
    /// Kubernetes API error
    #[error("kubernetes error: {0}")]
    Kube(#[from] kube::Error),

    /// An object the reconciler depends on disappeared mid-reconciliation
    #[error("not found: {0}")]
    NotFound(String),

    /// An object is missing a field the API server is expected to set
    #[error("missing field: {0}")]
    MissingField(String),
}

impl Error {
    /// Create a not-found error with the given message
    pub fn not_found(msg: impl Into<String>) -> Self {
        Self::NotFound(msg.into())
    }

    /// Create a missing-field error with the given message
    pub fn missing_field(msg: impl Into<String>) -> Self {
        Self::MissingField(msg.into())
    }

    /// Returns true if the API server reported the object as absent
    pub fn is_not_found(&self) -> bool {
        match self {
            Self::Kube(kube::Error::Api(resp)) => resp.code == 404,
            Self::NotFound(_) => true,
            _ => false,
        }
    }

    /// Returns true if a create was rejected because the object already exists
    pub fn is_already_exists(&self) -> bool {
        matches!(
            self,
            Self::Kube(kube::Error::Api(resp)) if resp.code == 409 && resp.reason == "AlreadyExists"
        )
    }

    /// Build an API error as the server would return it
    #[cfg(test)]
    pub(crate) fn api(code: u16, reason: &str) -> Self {
        Self::Kube(kube::Error::Api(kube::core::ErrorResponse {
            status: "Failure".to_string(),
            message: format!("{reason} ({code})"),
            reason: reason.to_string(),
            code,
        }))
    }
}
