//! PersonalAccessToken Custom Resource Definition
//!
//! Declares long-lived tokens a user can request. The resource is installed
//! with the operator but has no controller of its own.

use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// A point in time as seconds and nanoseconds since the Unix epoch
#[derive(Clone, Copy, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq, Eq)]
pub struct Timestamp {
    /// Whole seconds since the epoch
    pub seconds: i64,
    /// Non-negative fraction of a second
    pub nanos: i32,
}

/// Specification for a PersonalAccessToken
#[derive(CustomResource, Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[kube(
    group = "kim.io",
    version = "v1alpha1",
    kind = "PersonalAccessToken",
    plural = "personalaccesstokens",
    status = "PersonalAccessTokenStatus",
    namespaced
)]
#[serde(rename_all = "camelCase")]
pub struct PersonalAccessTokenSpec {
    /// Token validity deadline
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub deadline: Option<Timestamp>,
}

/// Status for a PersonalAccessToken
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
pub struct PersonalAccessTokenStatus {}
