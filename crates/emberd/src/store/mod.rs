//! Domain records and storage traits.
//!
//! The persistent store is the only shared mutable resource in emberd. It is
//! reached exclusively through the [`AccountStore`] and [`DeviceStore`] traits
//! so the storage engine stays swappable; [`MemoryStore`] backs tests and
//! single-node deployments.

mod memory;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

pub use memory::MemoryStore;

/// Display name given to accounts created before linking completes.
pub const PLACEHOLDER_NAME: &str = "placeholder";

/// An identity owned by the device cloud.
///
/// Accounts start out as placeholders when a device-control session begins
/// before the owner has linked their voice-platform identity. Linking later
/// promotes the placeholder or merges its devices into an existing account.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Account {
    pub id: String,
    pub name: String,

    /// Session-correlation id carried through the OAuth `state` parameter.
    pub link_code: Option<String>,
}

impl Account {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            name: name.into(),
            link_code: None,
        }
    }

    /// A provisional account holding devices discovered before linking.
    pub fn placeholder(link_code: impl Into<String>) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            name: PLACEHOLDER_NAME.to_string(),
            link_code: Some(link_code.into()),
        }
    }

    pub fn is_placeholder(&self) -> bool {
        self.name == PLACEHOLDER_NAME
    }
}

/// Association between an [`Account`] and an external voice-platform identity.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LinkedIdentity {
    pub id: String,
    pub account_id: String,
    pub external_user_id: String,
    pub email: Option<String>,
    pub postal_code: Option<String>,
    pub access_token: Option<String>,
    pub refresh_token: Option<String>,
}

impl LinkedIdentity {
    pub fn new(account_id: impl Into<String>, external_user_id: impl Into<String>) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            account_id: account_id.into(),
            external_user_id: external_user_id.into(),
            email: None,
            postal_code: None,
            access_token: None,
            refresh_token: None,
        }
    }
}

/// How a device is powered.
///
/// Battery devices are excluded from voice control: their agents sleep and
/// cannot meet the voice platform's response-time budget.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PowerSource {
    Line,
    Battery,
}

/// Last known burner state of a fireplace.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum PowerStatus {
    On,
    Off,
    Unknown,
}

/// A controllable fireplace endpoint.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Device {
    /// Doubles as the voice-platform endpoint id.
    pub id: String,

    /// URL of the device agent. Unique across stored devices: a device that
    /// re-registers with a fresh id after a firmware reset must reconcile
    /// into the record already holding its address.
    pub control_address: String,

    pub name: String,
    pub power_source: PowerSource,
    pub status: PowerStatus,

    /// When `status` was last confirmed by the device agent.
    pub status_at: DateTime<Utc>,

    pub battery_level: Option<u8>,
}

impl Device {
    pub fn new(
        control_address: impl Into<String>,
        name: impl Into<String>,
        power_source: PowerSource,
    ) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            control_address: control_address.into(),
            name: name.into(),
            power_source,
            status: PowerStatus::Unknown,
            status_at: Utc::now(),
            battery_level: None,
        }
    }
}

/// Per-link registration state on the account/device pivot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum LinkStatus {
    Registerable,
    NotRegisterable,
    Available,
}

impl LinkStatus {
    /// Status for a link created by device self-registration.
    pub fn for_registration(source: PowerSource) -> Self {
        match source {
            PowerSource::Line => LinkStatus::Registerable,
            PowerSource::Battery => LinkStatus::NotRegisterable,
        }
    }

    /// Status for a link created or refreshed by account linking.
    pub fn for_voice_control(source: PowerSource) -> Self {
        match source {
            PowerSource::Line => LinkStatus::Available,
            PowerSource::Battery => LinkStatus::NotRegisterable,
        }
    }
}

/// Many-to-many pivot between accounts and devices.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AccountDeviceLink {
    pub account_id: String,
    pub device_id: String,
    pub status: LinkStatus,
}

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("storage unavailable: {0}")]
    Unavailable(String),

    #[error("referenced record missing: {0}")]
    MissingRecord(String),
}

/// Account, identity and pivot persistence.
#[async_trait]
pub trait AccountStore: Send + Sync {
    async fn insert_account(&self, account: Account) -> Result<(), StoreError>;

    async fn update_account(&self, account: Account) -> Result<(), StoreError>;

    async fn get_account(&self, id: &str) -> Result<Option<Account>, StoreError>;

    async fn find_account_by_link_code(&self, code: &str) -> Result<Option<Account>, StoreError>;

    /// Deletes the account and cascades its identities and device links.
    async fn delete_account(&self, id: &str) -> Result<(), StoreError>;

    async fn find_identity_by_external_id(
        &self,
        external_user_id: &str,
    ) -> Result<Option<LinkedIdentity>, StoreError>;

    /// Inserts or replaces the identity keyed by external user id.
    async fn upsert_identity(&self, identity: LinkedIdentity) -> Result<(), StoreError>;
}

/// Device and pivot persistence.
#[async_trait]
pub trait DeviceStore: Send + Sync {
    async fn insert_device(&self, device: Device) -> Result<(), StoreError>;

    async fn update_device(&self, device: Device) -> Result<(), StoreError>;

    async fn get_device(&self, id: &str) -> Result<Option<Device>, StoreError>;

    async fn find_device_by_address(&self, address: &str) -> Result<Option<Device>, StoreError>;

    async fn devices_for_account(&self, account_id: &str) -> Result<Vec<Device>, StoreError>;

    /// Inserts or replaces the pivot for (account, device).
    async fn upsert_link(&self, link: AccountDeviceLink) -> Result<(), StoreError>;

    async fn remove_link(&self, account_id: &str, device_id: &str) -> Result<(), StoreError>;

    async fn get_link(
        &self,
        account_id: &str,
        device_id: &str,
    ) -> Result<Option<AccountDeviceLink>, StoreError>;
}
