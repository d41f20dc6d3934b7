//! Controller implementations for kim CRDs
//!
//! This module contains the reconciliation logic for kim custom resources.
//! Controllers follow the Kubernetes controller pattern with observe-diff-act loops.

mod user;

pub use user::{
    error_policy, reconcile, reconcile_user, run_user_controller, Context, KubeClient,
    KubeClientImpl,
};
