//! kim - Kubernetes identity manager
//!
//! kim turns declarative User records into cluster identities. An administrator
//! approves a user by setting its state to Active; the controller then creates a
//! ServiceAccount for the user and a long-lived token Secret bound to it.
//! Suspending or banning the user removes the ServiceAccount, and the API
//! server's garbage collector removes the token with it.
//!
//! # Modules
//!
//! - [`crd`] - Custom Resource Definitions (User, PersonalAccessToken)
//! - [`controller`] - User reconciliation logic
//! - [`poll`] - Bounded polling for observers waiting on convergence
//! - [`retry`] - Requeue backoff after failed reconciliations
//! - [`error`] - Error types for the operator

#![deny(missing_docs)]

pub mod controller;
pub mod crd;
pub mod error;
pub mod poll;
pub mod retry;

pub use error::Error;

/// Result type alias using our custom Error type
pub type Result<T> = std::result::Result<T, Error>;

// =============================================================================
// Well-known names
// =============================================================================

/// Field manager used for server-side apply
pub const FIELD_MANAGER: &str = "kim-controller";

/// Annotation binding a token Secret to its ServiceAccount
pub const SERVICE_ACCOUNT_NAME_ANNOTATION: &str = "kubernetes.io/service-account.name";

/// Secret type the API server populates with a ServiceAccount token
pub const SERVICE_ACCOUNT_TOKEN_SECRET_TYPE: &str = "kubernetes.io/service-account-token";
