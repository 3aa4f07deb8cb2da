use std::sync::Arc;

use super::LinkWorkflow;
use crate::directory::{DeviceDirectory, Registration};
use crate::error::LinkingError;
use crate::identity::test_support::MockIdentityProvider;
use crate::identity::ExternalProfile;
use crate::store::{
    Account, AccountStore, DeviceStore, LinkStatus, LinkedIdentity, MemoryStore, PowerSource,
};

const EXTERNAL_ID: &str = "amzn1.account.new-owner";

fn profile(name: &str) -> ExternalProfile {
    ExternalProfile {
        user_id: EXTERNAL_ID.to_string(),
        email: Some("owner@example.com".to_string()),
        name: Some(name.to_string()),
        postal_code: Some("0150".to_string()),
    }
}

fn provider_with_codes(codes: &[&str]) -> MockIdentityProvider {
    let mut provider = MockIdentityProvider::new();
    for code in codes {
        provider = provider.with_code(code, "access-token-1");
    }
    provider.with_profile("access-token-1", profile("Kari Nordmann"))
}

fn workflow(store: Arc<MemoryStore>, provider: MockIdentityProvider) -> LinkWorkflow {
    LinkWorkflow::new(Arc::new(provider), store.clone(), store)
}

async fn register_device(
    store: &Arc<MemoryStore>,
    account: &Account,
    address: &str,
    power_source: PowerSource,
) -> crate::store::Device {
    let directory = DeviceDirectory::new(store.clone() as Arc<dyn DeviceStore>);
    directory
        .register(
            Registration {
                control_address: address.to_string(),
                name: "hearth".to_string(),
                power_source,
                status: None,
                battery_level: None,
            },
            Some(&account.id),
        )
        .await
        .unwrap()
}

#[tokio::test]
async fn placeholder_is_promoted_with_its_devices() {
    let store = Arc::new(MemoryStore::new());
    let workflow = workflow(store.clone(), provider_with_codes(&["auth-1"]));

    let placeholder = workflow.placeholder_for_session("session-1").await.unwrap();
    assert!(placeholder.is_placeholder());
    let device = register_device(&store, &placeholder, "http://10.3.0.1", PowerSource::Line).await;

    let summary = workflow.link("auth-1", Some("session-1")).await.unwrap();

    // Promoted in place, not replaced
    assert_eq!(summary.account_id, placeholder.id);
    assert_eq!(summary.account_name, "Kari Nordmann");
    assert_eq!(summary.devices_linked, 1);
    assert!(summary.identity_created);

    let promoted = store.get_account(&placeholder.id).await.unwrap().unwrap();
    assert!(!promoted.is_placeholder());

    let identity = store
        .find_identity_by_external_id(EXTERNAL_ID)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(identity.account_id, placeholder.id);
    assert_eq!(identity.email.as_deref(), Some("owner@example.com"));
    assert_eq!(identity.access_token.as_deref(), Some("access-token-1"));

    // Line-powered device becomes available for voice control
    let link = store
        .get_link(&placeholder.id, &device.id)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(link.status, LinkStatus::Available);
}

#[tokio::test]
async fn battery_device_links_as_not_registerable() {
    let store = Arc::new(MemoryStore::new());
    let workflow = workflow(store.clone(), provider_with_codes(&["auth-1"]));

    let placeholder = workflow.placeholder_for_session("session-1").await.unwrap();
    let device =
        register_device(&store, &placeholder, "http://10.3.0.2", PowerSource::Battery).await;

    workflow.link("auth-1", Some("session-1")).await.unwrap();

    let link = store
        .get_link(&placeholder.id, &device.id)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(link.status, LinkStatus::NotRegisterable);
}

#[tokio::test]
async fn linking_twice_reuses_account_and_identity() {
    let store = Arc::new(MemoryStore::new());
    let workflow = workflow(store.clone(), provider_with_codes(&["auth-1", "auth-2"]));

    let placeholder = workflow.placeholder_for_session("session-1").await.unwrap();
    register_device(&store, &placeholder, "http://10.3.0.3", PowerSource::Line).await;

    let first = workflow.link("auth-1", Some("session-1")).await.unwrap();
    // Fresh authorization code, same external identity
    let second = workflow.link("auth-2", None).await.unwrap();

    assert_eq!(second.account_id, first.account_id);
    assert!(first.identity_created);
    assert!(!second.identity_created);

    let identity = store
        .find_identity_by_external_id(EXTERNAL_ID)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(identity.account_id, first.account_id);
}

#[tokio::test]
async fn merge_moves_devices_and_deletes_empty_placeholder() {
    let store = Arc::new(MemoryStore::new());
    let workflow = workflow(store.clone(), provider_with_codes(&["auth-1"]));

    // The external identity is already linked to an established account
    let established = Account::new("Kari Nordmann");
    store.insert_account(established.clone()).await.unwrap();
    store
        .upsert_identity(LinkedIdentity::new(&established.id, EXTERNAL_ID))
        .await
        .unwrap();

    // A later device session created a placeholder with one device
    let placeholder = workflow.placeholder_for_session("session-2").await.unwrap();
    let device = register_device(&store, &placeholder, "http://10.3.0.4", PowerSource::Line).await;

    let summary = workflow.link("auth-1", Some("session-2")).await.unwrap();

    assert_eq!(summary.account_id, established.id);
    // Device now belongs to the established account, not the placeholder
    assert!(store
        .get_link(&established.id, &device.id)
        .await
        .unwrap()
        .is_some());
    assert!(store
        .get_link(&placeholder.id, &device.id)
        .await
        .unwrap()
        .is_none());
    // The emptied placeholder is gone
    assert!(store.get_account(&placeholder.id).await.unwrap().is_none());
}

#[tokio::test]
async fn session_device_sharing_an_address_is_reconciled() {
    let store = Arc::new(MemoryStore::new());
    let workflow = workflow(store.clone(), provider_with_codes(&["auth-1"]));

    let established = Account::new("Kari Nordmann");
    store.insert_account(established.clone()).await.unwrap();
    store
        .upsert_identity(LinkedIdentity::new(&established.id, EXTERNAL_ID))
        .await
        .unwrap();
    let original =
        register_device(&store, &established, "http://10.3.0.5", PowerSource::Line).await;

    // Same physical device re-registers under a new session after a reset
    let placeholder = workflow.placeholder_for_session("session-3").await.unwrap();
    let duplicate =
        register_device(&store, &placeholder, "http://10.3.0.5", PowerSource::Line).await;
    // Address dedup at registration already reconciled to the original id
    assert_eq!(duplicate.id, original.id);

    workflow.link("auth-1", Some("session-3")).await.unwrap();

    let device = store
        .find_device_by_address("http://10.3.0.5")
        .await
        .unwrap()
        .unwrap();
    assert_eq!(device.id, original.id);
    assert!(store
        .get_link(&established.id, &device.id)
        .await
        .unwrap()
        .is_some());
}

#[tokio::test]
async fn invalid_code_surfaces_provider_error() {
    let store = Arc::new(MemoryStore::new());
    let workflow = workflow(store, provider_with_codes(&["auth-1"]));

    let err = workflow.link("expired-code", None).await.unwrap_err();
    match err {
        LinkingError::Provider { code, .. } => assert_eq!(code, "invalid_grant"),
        other => panic!("expected provider error, got {other}"),
    }
}

#[tokio::test]
async fn profile_fetch_failure_is_distinct_from_exchange_failure() {
    let store = Arc::new(MemoryStore::new());
    // Code exchanges fine but the profile endpoint fails
    let provider = MockIdentityProvider::new().with_code("auth-1", "token-without-profile");
    let workflow = workflow(store, provider);

    let err = workflow.link("auth-1", None).await.unwrap_err();
    assert!(matches!(err, LinkingError::ProfileFetch(_)));
}

#[tokio::test]
async fn linking_without_devices_still_persists_the_identity() {
    let store = Arc::new(MemoryStore::new());
    let workflow = workflow(store.clone(), provider_with_codes(&["auth-1"]));

    let err = workflow.link("auth-1", None).await.unwrap_err();
    assert!(matches!(err, LinkingError::NoDevices));

    // The account linkage survived; only the device import came up empty
    let identity = store
        .find_identity_by_external_id(EXTERNAL_ID)
        .await
        .unwrap()
        .unwrap();
    assert!(store
        .get_account(&identity.account_id)
        .await
        .unwrap()
        .is_some());
}
