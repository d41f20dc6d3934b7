//! Shared fixtures and convergence assertions for the kind tests

use std::time::Duration;

use k8s_openapi::api::core::v1::{Namespace, Secret, ServiceAccount};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use kube::api::{Api, DeleteParams, PostParams};
use kube::{Client, Resource};
use serde::de::DeserializeOwned;
use tokio::task::JoinHandle;

use kim::controller::run_user_controller;
use kim::crd::{ensure_crds_installed, User, UserSpec, UserState};
use kim::poll::{poll_for, PollTimeout};

/// How long an observation may take before the scenario fails
pub const CONVERGENCE_TIMEOUT: Duration = Duration::from_secs(120);

/// Delay between observations
pub const POLL_INTERVAL: Duration = Duration::from_secs(1);

/// A namespace with the User controller running against it
///
/// Dropping the scenario stops the controller; call [`Scenario::teardown`] to
/// remove the namespace as well.
pub struct Scenario {
    pub client: Client,
    pub namespace: String,
    controller: JoinHandle<()>,
}

impl Scenario {
    /// Connect to the cluster, install CRDs and start the controller in a
    /// fresh namespace named after the scenario
    pub async fn start(name: &str) -> anyhow::Result<Self> {
        let client = Client::try_default().await?;
        ensure_crds_installed(&client).await?;

        let namespace = format!("kim-{name}");
        let namespaces: Api<Namespace> = Api::all(client.clone());
        let ns = Namespace {
            metadata: ObjectMeta {
                name: Some(namespace.clone()),
                ..Default::default()
            },
            ..Default::default()
        };
        match namespaces.create(&PostParams::default(), &ns).await {
            Ok(_) => {}
            Err(kube::Error::Api(e)) if e.code == 409 => {}
            Err(e) => return Err(e.into()),
        }

        let controller = {
            let client = client.clone();
            let namespace = namespace.clone();
            tokio::spawn(async move { run_user_controller(client, Some(&namespace)).await })
        };

        Ok(Self {
            client,
            namespace,
            controller,
        })
    }

    pub fn users(&self) -> Api<User> {
        Api::namespaced(self.client.clone(), &self.namespace)
    }

    pub fn service_accounts(&self) -> Api<ServiceAccount> {
        Api::namespaced(self.client.clone(), &self.namespace)
    }

    pub fn secrets(&self) -> Api<Secret> {
        Api::namespaced(self.client.clone(), &self.namespace)
    }

    /// Create a user in the scenario namespace
    pub async fn create_user(&self, name: &str, state: UserState) -> anyhow::Result<User> {
        let user = User::new(
            name,
            UserSpec::new(format!("{name}@example.com"), name).state(state),
        );
        Ok(self.users().create(&PostParams::default(), &user).await?)
    }

    /// Change a user's state, retrying on write conflicts
    pub async fn set_state(&self, name: &str, state: UserState) -> anyhow::Result<()> {
        let users = self.users();
        poll_for(CONVERGENCE_TIMEOUT, POLL_INTERVAL, || {
            let users = users.clone();
            async move {
                let mut user = users.get(name).await?;
                user.spec.state = state;
                users.replace(name, &PostParams::default(), &user).await?;
                Ok::<_, kube::Error>(())
            }
        })
        .await
        .map_err(timeout_error)
    }

    /// Stop the controller and delete the namespace
    pub async fn teardown(self) {
        self.controller.abort();
        let namespaces: Api<Namespace> = Api::all(self.client.clone());
        let _ = namespaces
            .delete(&self.namespace, &DeleteParams::default())
            .await;
    }
}

impl Drop for Scenario {
    fn drop(&mut self) {
        self.controller.abort();
    }
}

fn timeout_error<E: std::fmt::Display>(timeout: PollTimeout<E>) -> anyhow::Error {
    anyhow::anyhow!("{timeout}")
}

/// Wait until the named object exists and return it
pub async fn wait_for_exists<K>(api: &Api<K>, name: &str) -> anyhow::Result<K>
where
    K: Resource + Clone + DeserializeOwned + std::fmt::Debug,
{
    poll_for(CONVERGENCE_TIMEOUT, POLL_INTERVAL, || async move {
        api.get_opt(name)
            .await
            .map_err(|e| e.to_string())?
            .ok_or_else(|| format!("{name} does not exist yet"))
    })
    .await
    .map_err(timeout_error)
}

/// Wait until the named object no longer exists
pub async fn wait_for_absent<K>(api: &Api<K>, name: &str) -> anyhow::Result<()>
where
    K: Resource + Clone + DeserializeOwned + std::fmt::Debug,
{
    poll_for(CONVERGENCE_TIMEOUT, POLL_INTERVAL, || async move {
        match api.get_opt(name).await.map_err(|e| e.to_string())? {
            None => Ok(()),
            Some(_) => Err(format!("{name} still exists")),
        }
    })
    .await
    .map_err(timeout_error)
}

/// Wait until the user's status records `expected` as its initial generation
pub async fn wait_for_initial_generation(
    users: &Api<User>,
    name: &str,
    expected: i64,
) -> anyhow::Result<()> {
    poll_for(CONVERGENCE_TIMEOUT, POLL_INTERVAL, || async move {
        let user = users.get(name).await.map_err(|e| e.to_string())?;
        match user.initial_generation() {
            Some(g) if g == expected => Ok(()),
            other => Err(format!(
                "initial generation is {other:?}, want {expected}"
            )),
        }
    })
    .await
    .map_err(timeout_error)
}
