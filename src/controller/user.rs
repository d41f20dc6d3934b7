//! User controller implementation
//!
//! This module implements the reconciliation logic for User resources. Each
//! invocation re-reads the user, decides which resources its state calls for,
//! and converges the user's ServiceAccount and token Secret toward that.
//!
//! Reconciliation is level-triggered and idempotent: running it again with
//! no change to the User leaves the cluster untouched.

use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;
use futures::StreamExt;
use k8s_openapi::api::core::v1::{Secret, ServiceAccount};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::{ObjectMeta, OwnerReference};
use kube::api::{Api, DeleteParams, Patch, PatchParams, PostParams};
use kube::runtime::controller::{Action, Controller};
use kube::runtime::reflector::ObjectRef;
use kube::runtime::watcher::Config as WatcherConfig;
use kube::{Client, Resource, ResourceExt};
use tracing::{debug, error, info, instrument, warn};

#[cfg(test)]
use mockall::automock;

use crate::crd::{User, UserState};
use crate::retry::{BackoffConfig, RequeueBackoff};
use crate::{Error, SERVICE_ACCOUNT_NAME_ANNOTATION, SERVICE_ACCOUNT_TOKEN_SECRET_TYPE};

/// Trait abstracting the Kubernetes operations the user controller performs
///
/// This trait allows mocking the Kubernetes client in tests while using
/// the real client in production. Lookups return `Ok(None)` when the object
/// does not exist; every other API failure is returned as an [`Error`].
#[cfg_attr(test, automock)]
#[async_trait]
pub trait KubeClient: Send + Sync {
    /// Fetch a User, `None` if it no longer exists
    async fn get_user(&self, namespace: &str, name: &str) -> Result<Option<User>, Error>;

    /// Write the user's status through the status subresource
    ///
    /// The write is conditional on the user's resourceVersion, so a stale
    /// copy fails with a conflict instead of overwriting newer status.
    async fn update_user_status(&self, user: &User) -> Result<(), Error>;

    /// Fetch a ServiceAccount, `None` if it does not exist
    async fn get_service_account(
        &self,
        namespace: &str,
        name: &str,
    ) -> Result<Option<ServiceAccount>, Error>;

    /// Create a ServiceAccount
    async fn create_service_account(&self, sa: &ServiceAccount) -> Result<(), Error>;

    /// Delete a ServiceAccount by name
    async fn delete_service_account(&self, namespace: &str, name: &str) -> Result<(), Error>;

    /// Fetch a Secret, `None` if it does not exist
    async fn get_secret(&self, namespace: &str, name: &str) -> Result<Option<Secret>, Error>;

    /// Create a Secret
    async fn create_secret(&self, secret: &Secret) -> Result<(), Error>;

    /// Replace an existing Secret
    async fn replace_secret(&self, secret: &Secret) -> Result<(), Error>;
}

/// Real Kubernetes client implementation
pub struct KubeClientImpl {
    client: Client,
}

impl KubeClientImpl {
    /// Create a new KubeClientImpl wrapping the given kube Client
    pub fn new(client: Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl KubeClient for KubeClientImpl {
    async fn get_user(&self, namespace: &str, name: &str) -> Result<Option<User>, Error> {
        let api: Api<User> = Api::namespaced(self.client.clone(), namespace);
        Ok(api.get_opt(name).await?)
    }

    async fn update_user_status(&self, user: &User) -> Result<(), Error> {
        let namespace = user
            .namespace()
            .ok_or_else(|| Error::missing_field("user namespace"))?;
        let api: Api<User> = Api::namespaced(self.client.clone(), &namespace);

        let status_patch = serde_json::json!({
            "metadata": { "resourceVersion": user.resource_version() },
            "status": user.status,
        });

        api.patch_status(
            &user.name_any(),
            &PatchParams::default(),
            &Patch::Merge(&status_patch),
        )
        .await?;

        Ok(())
    }

    async fn get_service_account(
        &self,
        namespace: &str,
        name: &str,
    ) -> Result<Option<ServiceAccount>, Error> {
        let api: Api<ServiceAccount> = Api::namespaced(self.client.clone(), namespace);
        Ok(api.get_opt(name).await?)
    }

    async fn create_service_account(&self, sa: &ServiceAccount) -> Result<(), Error> {
        let namespace = sa
            .namespace()
            .ok_or_else(|| Error::missing_field("ServiceAccount namespace"))?;
        let api: Api<ServiceAccount> = Api::namespaced(self.client.clone(), &namespace);
        api.create(&PostParams::default(), sa).await?;
        Ok(())
    }

    async fn delete_service_account(&self, namespace: &str, name: &str) -> Result<(), Error> {
        let api: Api<ServiceAccount> = Api::namespaced(self.client.clone(), namespace);
        api.delete(name, &DeleteParams::default()).await?;
        Ok(())
    }

    async fn get_secret(&self, namespace: &str, name: &str) -> Result<Option<Secret>, Error> {
        let api: Api<Secret> = Api::namespaced(self.client.clone(), namespace);
        Ok(api.get_opt(name).await?)
    }

    async fn create_secret(&self, secret: &Secret) -> Result<(), Error> {
        let namespace = secret
            .namespace()
            .ok_or_else(|| Error::missing_field("Secret namespace"))?;
        let api: Api<Secret> = Api::namespaced(self.client.clone(), &namespace);
        api.create(&PostParams::default(), secret).await?;
        Ok(())
    }

    async fn replace_secret(&self, secret: &Secret) -> Result<(), Error> {
        let namespace = secret
            .namespace()
            .ok_or_else(|| Error::missing_field("Secret namespace"))?;
        let api: Api<Secret> = Api::namespaced(self.client.clone(), &namespace);
        api.replace(&secret.name_any(), &PostParams::default(), secret)
            .await?;
        Ok(())
    }
}

/// Controller context containing shared state and clients
///
/// The context is shared across all reconciliation calls. The reconciler only
/// uses `kube`; `backoff` belongs to the runtime callbacks that schedule
/// retries after failures.
pub struct Context {
    /// Kubernetes client for API operations (trait object for testability)
    pub kube: Arc<dyn KubeClient>,
    /// Requeue delays for keys whose last reconciliation failed
    pub backoff: RequeueBackoff,
}

impl Context {
    /// Create a new controller context with the given Kubernetes client
    pub fn new(client: Client) -> Self {
        Self::from_kube_client(Arc::new(KubeClientImpl::new(client)))
    }

    /// Create a context around any [`KubeClient`] implementation
    pub fn from_kube_client(kube: Arc<dyn KubeClient>) -> Self {
        Self {
            kube,
            backoff: RequeueBackoff::default(),
        }
    }

    /// Replace the requeue backoff configuration
    pub fn with_backoff(mut self, config: BackoffConfig) -> Self {
        self.backoff = RequeueBackoff::new(config);
        self
    }
}

/// Reconcile the User identified by `key`
///
/// Fetches the latest copy of the user, converges its ServiceAccount and
/// Secret to its declared state, and records the initial generation in its
/// status. A user that no longer exists is left to garbage collection.
///
/// Never retries internally: errors other than "already exists" on create
/// and "not found" on delete are returned unchanged.
#[instrument(skip(key, ctx), fields(namespace = ?key.namespace, user = %key.name))]
pub async fn reconcile_user(key: &ObjectRef<User>, ctx: &Context) -> Result<Action, Error> {
    let namespace = key
        .namespace
        .as_deref()
        .ok_or_else(|| Error::missing_field("user namespace"))?;

    let Some(mut user) = ctx.kube.get_user(namespace, &key.name).await? else {
        info!("user has been deleted");
        return Ok(Action::await_change());
    };

    let is_new = user.is_new_user();
    if is_new {
        user.stage_initial_generation();
    }

    debug!(state = %user.spec.state, is_new, "reconciling user");

    match user.spec.state {
        UserState::WaitingForApproval => {
            info!("user needs to be approved");
            if is_new {
                ctx.kube.update_user_status(&user).await?;
            }
        }
        UserState::Active => {
            info!("user is active, ensuring ServiceAccount and Secret exist");
            if let Err(e) = ensure_service_account_and_secret(&user, ctx).await {
                error!(error = %e, "failed to ensure ServiceAccount and Secret exist");
                return Err(e);
            }
            ctx.kube.update_user_status(&user).await?;
        }
        UserState::Suspended | UserState::Banned => {
            info!(state = %user.spec.state, "user is disabled, ensuring ServiceAccount does not exist");
            if let Err(e) = ensure_service_account_absent(&user, ctx).await {
                error!(error = %e, "failed to ensure ServiceAccount does not exist");
                return Err(e);
            }
            ctx.kube.update_user_status(&user).await?;
        }
    }

    Ok(Action::await_change())
}

/// Reconcile a User resource
///
/// Entry point for the controller runtime. The cached object only supplies the
/// key; [`reconcile_user`] re-reads the user before acting. Success clears any
/// backoff accumulated by earlier failures.
pub async fn reconcile(user: Arc<User>, ctx: Arc<Context>) -> Result<Action, Error> {
    let key = ObjectRef::from_obj(user.as_ref());
    let action = reconcile_user(&key, &ctx).await?;
    ctx.backoff.reset(&key.to_string());
    Ok(action)
}

/// Error policy for the controller
///
/// Called when reconciliation fails. Requeues the user after a per-key
/// exponential backoff with jitter.
pub fn error_policy(user: Arc<User>, error: &Error, ctx: Arc<Context>) -> Action {
    let key = ObjectRef::from_obj(user.as_ref()).to_string();
    let delay = ctx.backoff.next_delay(&key);

    error!(
        ?error,
        user = %key,
        delay_ms = delay.as_millis(),
        "reconciliation failed"
    );

    Action::requeue(delay)
}

/// Run the User controller until shutdown
///
/// Watches Users, and the ServiceAccounts they own, in `namespace` (all
/// namespaces when `None`).
pub async fn run_user_controller(client: Client, namespace: Option<&str>) {
    let (users, service_accounts): (Api<User>, Api<ServiceAccount>) = match namespace {
        Some(ns) => (
            Api::namespaced(client.clone(), ns),
            Api::namespaced(client.clone(), ns),
        ),
        None => (Api::all(client.clone()), Api::all(client.clone())),
    };

    let ctx = Arc::new(Context::new(client));

    info!(namespace = ?namespace, "starting User controller");

    Controller::new(users, WatcherConfig::default())
        .owns(service_accounts, WatcherConfig::default())
        .shutdown_on_signal()
        .run(reconcile, error_policy, ctx)
        .for_each(|result| async move {
            match result {
                Ok((user, action)) => {
                    debug!(user = %user, ?action, "user reconciliation completed");
                }
                Err(e) => {
                    warn!(error = ?e, "user reconciliation error");
                }
            }
        })
        .await;

    info!("User controller stopped");
}

/// Namespace and name shared by a user and the resources it owns
fn user_key(user: &User) -> Result<(String, String), Error> {
    let namespace = user
        .namespace()
        .ok_or_else(|| Error::missing_field("user namespace"))?;
    Ok((namespace, user.name_any()))
}

/// Build the ServiceAccount owned by `user`
fn service_account_for(user: &User) -> Result<ServiceAccount, Error> {
    let (namespace, name) = user_key(user)?;
    let owner = user
        .controller_owner_ref(&())
        .ok_or_else(|| Error::missing_field("user uid"))?;

    Ok(ServiceAccount {
        metadata: ObjectMeta {
            name: Some(name),
            namespace: Some(namespace),
            owner_references: Some(vec![owner]),
            ..Default::default()
        },
        ..Default::default()
    })
}

/// Owner reference from a token Secret to its ServiceAccount
fn service_account_owner_ref(sa: &ServiceAccount) -> Result<OwnerReference, Error> {
    let uid = sa
        .uid()
        .ok_or_else(|| Error::missing_field("ServiceAccount uid"))?;

    Ok(OwnerReference {
        api_version: "v1".to_string(),
        kind: "ServiceAccount".to_string(),
        name: sa.name_any(),
        uid,
        ..Default::default()
    })
}

/// Build a new token Secret bound to `sa`
fn token_secret_for(sa: &ServiceAccount, owner: OwnerReference) -> Secret {
    Secret {
        metadata: ObjectMeta {
            name: Some(sa.name_any()),
            namespace: sa.namespace(),
            annotations: Some(BTreeMap::from([(
                SERVICE_ACCOUNT_NAME_ANNOTATION.to_string(),
                sa.name_any(),
            )])),
            owner_references: Some(vec![owner]),
            ..Default::default()
        },
        type_: Some(SERVICE_ACCOUNT_TOKEN_SECRET_TYPE.to_string()),
        ..Default::default()
    }
}

/// Bind an existing Secret to `sa`, returning true if anything changed
///
/// Only the binding annotation and the owner references are touched; data,
/// labels and other annotations are left as the API server has them.
fn bind_secret(secret: &mut Secret, sa_name: &str, owner: OwnerReference) -> bool {
    let annotations = secret.metadata.annotations.get_or_insert_with(BTreeMap::new);
    let annotation_changed =
        annotations.get(SERVICE_ACCOUNT_NAME_ANNOTATION).map(String::as_str) != Some(sa_name);
    if annotation_changed {
        annotations.insert(
            SERVICE_ACCOUNT_NAME_ANNOTATION.to_string(),
            sa_name.to_string(),
        );
    }

    let owners = vec![owner];
    let owners_changed = secret.metadata.owner_references.as_ref() != Some(&owners);
    if owners_changed {
        secret.metadata.owner_references = Some(owners);
    }

    annotation_changed || owners_changed
}

/// Ensure the user's ServiceAccount exists and a token Secret is bound to it
async fn ensure_service_account_and_secret(user: &User, ctx: &Context) -> Result<(), Error> {
    let (namespace, name) = user_key(user)?;

    match ctx
        .kube
        .create_service_account(&service_account_for(user)?)
        .await
    {
        Ok(()) => info!("created ServiceAccount"),
        Err(e) if e.is_already_exists() => debug!("ServiceAccount already exists"),
        Err(e) => return Err(e),
    }

    // re-read for server-assigned fields (uid)
    let sa = ctx
        .kube
        .get_service_account(&namespace, &name)
        .await?
        .ok_or_else(|| Error::not_found(format!("ServiceAccount {namespace}/{name}")))?;
    let owner = service_account_owner_ref(&sa)?;

    match ctx.kube.get_secret(&namespace, &name).await? {
        None => {
            ctx.kube
                .create_secret(&token_secret_for(&sa, owner))
                .await?;
            info!("created token Secret");
        }
        Some(mut secret) => {
            if bind_secret(&mut secret, &sa.name_any(), owner) {
                ctx.kube.replace_secret(&secret).await?;
                info!("updated token Secret binding");
            } else {
                debug!("token Secret already bound");
            }
        }
    }

    Ok(())
}

/// Ensure the user's ServiceAccount does not exist
///
/// The token Secret is owned by the ServiceAccount and is removed by the API
/// server's garbage collector.
async fn ensure_service_account_absent(user: &User, ctx: &Context) -> Result<(), Error> {
    let (namespace, name) = user_key(user)?;

    if ctx
        .kube
        .get_service_account(&namespace, &name)
        .await?
        .is_none()
    {
        debug!("ServiceAccount already absent");
        return Ok(());
    }

    match ctx.kube.delete_service_account(&namespace, &name).await {
        Ok(()) => info!("deleted ServiceAccount"),
        Err(e) if e.is_not_found() => debug!("ServiceAccount already deleted"),
        Err(e) => return Err(e),
    }

    Ok(())
}
