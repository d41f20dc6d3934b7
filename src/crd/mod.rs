//! Custom Resource Definitions for kim
//!
//! This module contains all CRD definitions used by the kim operator and the
//! helper that installs them.

mod token;
mod user;

use k8s_openapi::apiextensions_apiserver::pkg::apis::apiextensions::v1::CustomResourceDefinition;
use kube::api::{Api, Patch, PatchParams};
use kube::{Client, CustomResourceExt};
use tracing::info;

pub use token::{
    PersonalAccessToken, PersonalAccessTokenSpec, PersonalAccessTokenStatus, Timestamp,
};
pub use user::{User, UserSpec, UserState, UserStatus};

use crate::{Error, FIELD_MANAGER};

/// All CRDs served by kim, in installation order
pub fn all_crds() -> Vec<CustomResourceDefinition> {
    vec![User::crd(), PersonalAccessToken::crd()]
}

/// Ensure all kim CRDs are installed
///
/// Uses server-side apply so the installed CRD versions always match the
/// running operator.
pub async fn ensure_crds_installed(client: &Client) -> Result<(), Error> {
    let crds: Api<CustomResourceDefinition> = Api::all(client.clone());
    let params = PatchParams::apply(FIELD_MANAGER).force();

    for crd in all_crds() {
        let name = crd.metadata.name.clone().unwrap_or_default();
        info!(crd = %name, "installing CRD");
        crds.patch(&name, &params, &Patch::Apply(&crd)).await?;
    }

    info!("all kim CRDs installed/updated");
    Ok(())
}
