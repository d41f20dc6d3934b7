//! Integration tests for the User lifecycle
//!
//! These tests tell the story of an administrator managing users: a user
//! registers, waits for approval, is approved, and is later suspended, banned
//! or deleted. Each step is observed only through the cluster, the way any
//! other client would see it.

use kim::crd::UserState;
use kim::SERVICE_ACCOUNT_NAME_ANNOTATION;

use super::helpers::{wait_for_absent, wait_for_exists, wait_for_initial_generation, Scenario};

/// Story: an approved user receives a ServiceAccount and a bound token
///
/// Expected behavior:
/// - A ServiceAccount named after the user appears in the user's namespace
/// - A Secret with the same name is annotated with the ServiceAccount name
///   and owned by it
/// - The user's status records the generation first observed
#[tokio::test]
#[ignore = "requires kind cluster - run with: cargo test --test kind -- --ignored"]
async fn story_active_user_gets_identity() {
    let scenario = Scenario::start("active").await.expect("scenario setup");

    scenario
        .create_user("alice", UserState::Active)
        .await
        .expect("create user");

    let sa = wait_for_exists(&scenario.service_accounts(), "alice")
        .await
        .expect("ServiceAccount should appear");
    let secret = wait_for_exists(&scenario.secrets(), "alice")
        .await
        .expect("token Secret should appear");

    let annotations = secret.metadata.annotations.unwrap_or_default();
    assert_eq!(
        annotations.get(SERVICE_ACCOUNT_NAME_ANNOTATION).map(String::as_str),
        Some("alice")
    );
    let owners = secret.metadata.owner_references.unwrap_or_default();
    assert_eq!(owners.len(), 1);
    assert_eq!(owners[0].kind, "ServiceAccount");
    assert_eq!(Some(&owners[0].uid), sa.metadata.uid.as_ref());

    wait_for_initial_generation(&scenario.users(), "alice", 1)
        .await
        .expect("initial generation recorded");

    scenario.teardown().await;
}

/// Story: a registered user waits for approval without any identity
#[tokio::test]
#[ignore = "requires kind cluster - run with: cargo test --test kind -- --ignored"]
async fn story_waiting_user_has_no_identity() {
    let scenario = Scenario::start("waiting").await.expect("scenario setup");

    scenario
        .create_user("bob", UserState::WaitingForApproval)
        .await
        .expect("create user");

    wait_for_initial_generation(&scenario.users(), "bob", 1)
        .await
        .expect("initial generation recorded");
    wait_for_absent(&scenario.service_accounts(), "bob")
        .await
        .expect("no ServiceAccount for a waiting user");

    scenario.teardown().await;
}

/// Story: approving a waiting user creates its identity
#[tokio::test]
#[ignore = "requires kind cluster - run with: cargo test --test kind -- --ignored"]
async fn story_approval_creates_identity() {
    let scenario = Scenario::start("approval").await.expect("scenario setup");

    scenario
        .create_user("carol", UserState::WaitingForApproval)
        .await
        .expect("create user");
    wait_for_initial_generation(&scenario.users(), "carol", 1)
        .await
        .expect("initial generation recorded");

    scenario
        .set_state("carol", UserState::Active)
        .await
        .expect("approve user");

    wait_for_exists(&scenario.service_accounts(), "carol")
        .await
        .expect("ServiceAccount should appear");
    wait_for_exists(&scenario.secrets(), "carol")
        .await
        .expect("token Secret should appear");
    // the approval bumped the generation; the recorded one stays put
    wait_for_initial_generation(&scenario.users(), "carol", 1)
        .await
        .expect("initial generation unchanged");

    scenario.teardown().await;
}

/// Story: suspending or banning an active user revokes its identity
///
/// The controller deletes the ServiceAccount; the token Secret follows
/// through garbage collection.
async fn disabling_revokes_identity(name: &str, state: UserState) {
    let scenario = Scenario::start(name).await.expect("scenario setup");

    scenario
        .create_user("dave", UserState::Active)
        .await
        .expect("create user");
    wait_for_exists(&scenario.secrets(), "dave")
        .await
        .expect("token Secret should appear");

    scenario.set_state("dave", state).await.expect("disable user");

    wait_for_absent(&scenario.service_accounts(), "dave")
        .await
        .expect("ServiceAccount should be removed");
    wait_for_absent(&scenario.secrets(), "dave")
        .await
        .expect("token Secret should be garbage collected");

    scenario.teardown().await;
}

#[tokio::test]
#[ignore = "requires kind cluster - run with: cargo test --test kind -- --ignored"]
async fn story_suspended_user_loses_identity() {
    disabling_revokes_identity("suspend", UserState::Suspended).await;
}

#[tokio::test]
#[ignore = "requires kind cluster - run with: cargo test --test kind -- --ignored"]
async fn story_banned_user_loses_identity() {
    disabling_revokes_identity("ban", UserState::Banned).await;
}

/// Story: deleting a user removes everything it owned
#[tokio::test]
#[ignore = "requires kind cluster - run with: cargo test --test kind -- --ignored"]
async fn story_deleted_user_is_garbage_collected() {
    let scenario = Scenario::start("delete").await.expect("scenario setup");

    scenario
        .create_user("erin", UserState::Active)
        .await
        .expect("create user");
    wait_for_exists(&scenario.secrets(), "erin")
        .await
        .expect("token Secret should appear");

    scenario
        .users()
        .delete("erin", &Default::default())
        .await
        .expect("delete user");

    wait_for_absent(&scenario.service_accounts(), "erin")
        .await
        .expect("ServiceAccount should be garbage collected");
    wait_for_absent(&scenario.secrets(), "erin")
        .await
        .expect("token Secret should be garbage collected");

    scenario.teardown().await;
}
