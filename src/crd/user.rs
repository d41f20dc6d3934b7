//! User Custom Resource Definition
//!
//! A User declares the lifecycle state an administrator wants for a person.
//! The controller turns that declaration into a ServiceAccount and a bound
//! token Secret while the user is Active, and removes them otherwise.

use std::fmt;

use chrono::{DateTime, Utc};
use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// Lifecycle state requested for a user
///
/// The set is closed and the CRD schema enforces it. A stored object whose
/// state bypassed schema validation cannot be decoded, and since the watcher
/// decodes whole list pages, it stalls the watch for every User rather than
/// only that one.
#[derive(Clone, Copy, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq, Eq)]
pub enum UserState {
    /// Newly registered, waiting for an administrator to approve
    #[default]
    WaitingForApproval,
    /// Approved; the user gets a ServiceAccount and token
    Active,
    /// Temporarily disabled
    Suspended,
    /// Permanently disabled
    Banned,
}

impl UserState {
    /// Returns true if users in this state own a ServiceAccount and token
    pub fn has_identity(&self) -> bool {
        matches!(self, Self::Active)
    }
}

impl fmt::Display for UserState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::WaitingForApproval => "WaitingForApproval",
            Self::Active => "Active",
            Self::Suspended => "Suspended",
            Self::Banned => "Banned",
        };
        f.write_str(s)
    }
}

/// Specification for a User
#[derive(CustomResource, Clone, Debug, Deserialize, Serialize, JsonSchema, PartialEq)]
#[kube(
    group = "kim.io",
    version = "v1alpha1",
    kind = "User",
    plural = "users",
    status = "UserStatus",
    namespaced,
    derive = "PartialEq",
    printcolumn = r#"{"name":"State","type":"string","jsonPath":".spec.state"}"#,
    printcolumn = r#"{"name":"Email","type":"string","jsonPath":".spec.email"}"#,
    printcolumn = r#"{"name":"Age","type":"date","jsonPath":".metadata.creationTimestamp"}"#
)]
#[serde(rename_all = "camelCase")]
pub struct UserSpec {
    /// Primary email address
    pub email: String,

    /// Login name
    pub username: String,

    /// Requested lifecycle state
    #[serde(default)]
    pub state: UserState,

    /// When the user's access expires (informational)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expiration: Option<DateTime<Utc>>,

    /// Name shown in user interfaces
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub display_name: Option<String>,

    /// Given name
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub given_name: Option<String>,

    /// Family name
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub family_name: Option<String>,

    /// Employer or organization
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub company: Option<String>,

    /// Alternate email address
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub secondary_mail: Option<String>,
}

impl UserSpec {
    /// Create a spec with the required fields and the default state
    pub fn new(email: impl Into<String>, username: impl Into<String>) -> Self {
        Self {
            email: email.into(),
            username: username.into(),
            state: UserState::default(),
            expiration: None,
            display_name: None,
            given_name: None,
            family_name: None,
            company: None,
            secondary_mail: None,
        }
    }

    /// Set the state and return self for chaining
    pub fn state(mut self, state: UserState) -> Self {
        self.state = state;
        self
    }
}

/// Status for a User
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct UserStatus {
    /// First observed resource generation
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub initial_generation: Option<i64>,
}

impl User {
    /// Returns true if this is the first reconciliation of the record
    ///
    /// A user is new when no initial generation was recorded yet, or when the
    /// recorded one still matches the current generation (the first status
    /// write may have been lost).
    pub fn is_new_user(&self) -> bool {
        match self.status.as_ref().and_then(|s| s.initial_generation) {
            None => true,
            Some(initial) => Some(initial) == self.metadata.generation,
        }
    }

    /// Record the current generation as the initial generation
    pub fn stage_initial_generation(&mut self) {
        let generation = self.metadata.generation;
        self.status
            .get_or_insert_with(UserStatus::default)
            .initial_generation = generation;
    }

    /// The recorded initial generation, if any
    pub fn initial_generation(&self) -> Option<i64> {
        self.status.as_ref().and_then(|s| s.initial_generation)
    }
}
