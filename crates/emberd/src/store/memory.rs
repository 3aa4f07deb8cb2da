//! In-memory store used by tests and single-node deployments.

use std::collections::HashMap;
use std::sync::RwLock;

use async_trait::async_trait;

use super::{
    Account, AccountDeviceLink, AccountStore, Device, DeviceStore, LinkStatus, LinkedIdentity,
    StoreError,
};

#[derive(Default)]
struct Tables {
    accounts: HashMap<String, Account>,
    identities: HashMap<String, LinkedIdentity>,
    devices: HashMap<String, Device>,
    links: HashMap<(String, String), LinkStatus>,
}

/// Hash-map backed implementation of both store traits.
///
/// Locking is a single `RwLock` over all tables; guards are never held across
/// an await point.
#[derive(Default)]
pub struct MemoryStore {
    tables: RwLock<Tables>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn read(&self) -> Result<std::sync::RwLockReadGuard<'_, Tables>, StoreError> {
        self.tables
            .read()
            .map_err(|e| StoreError::Unavailable(e.to_string()))
    }

    fn write(&self) -> Result<std::sync::RwLockWriteGuard<'_, Tables>, StoreError> {
        self.tables
            .write()
            .map_err(|e| StoreError::Unavailable(e.to_string()))
    }
}

#[async_trait]
impl AccountStore for MemoryStore {
    async fn insert_account(&self, account: Account) -> Result<(), StoreError> {
        self.write()?.accounts.insert(account.id.clone(), account);
        Ok(())
    }

    async fn update_account(&self, account: Account) -> Result<(), StoreError> {
        let mut tables = self.write()?;
        if !tables.accounts.contains_key(&account.id) {
            return Err(StoreError::MissingRecord(format!("account {}", account.id)));
        }
        tables.accounts.insert(account.id.clone(), account);
        Ok(())
    }

    async fn get_account(&self, id: &str) -> Result<Option<Account>, StoreError> {
        Ok(self.read()?.accounts.get(id).cloned())
    }

    async fn find_account_by_link_code(&self, code: &str) -> Result<Option<Account>, StoreError> {
        Ok(self
            .read()?
            .accounts
            .values()
            .find(|a| a.link_code.as_deref() == Some(code))
            .cloned())
    }

    async fn delete_account(&self, id: &str) -> Result<(), StoreError> {
        let mut tables = self.write()?;
        tables.accounts.remove(id);
        tables.identities.retain(|_, i| i.account_id != id);
        tables.links.retain(|(account_id, _), _| account_id != id);
        Ok(())
    }

    async fn find_identity_by_external_id(
        &self,
        external_user_id: &str,
    ) -> Result<Option<LinkedIdentity>, StoreError> {
        Ok(self.read()?.identities.get(external_user_id).cloned())
    }

    async fn upsert_identity(&self, identity: LinkedIdentity) -> Result<(), StoreError> {
        self.write()?
            .identities
            .insert(identity.external_user_id.clone(), identity);
        Ok(())
    }
}

#[async_trait]
impl DeviceStore for MemoryStore {
    async fn insert_device(&self, device: Device) -> Result<(), StoreError> {
        self.write()?.devices.insert(device.id.clone(), device);
        Ok(())
    }

    async fn update_device(&self, device: Device) -> Result<(), StoreError> {
        let mut tables = self.write()?;
        if !tables.devices.contains_key(&device.id) {
            return Err(StoreError::MissingRecord(format!("device {}", device.id)));
        }
        tables.devices.insert(device.id.clone(), device);
        Ok(())
    }

    async fn get_device(&self, id: &str) -> Result<Option<Device>, StoreError> {
        Ok(self.read()?.devices.get(id).cloned())
    }

    async fn find_device_by_address(&self, address: &str) -> Result<Option<Device>, StoreError> {
        Ok(self
            .read()?
            .devices
            .values()
            .find(|d| d.control_address == address)
            .cloned())
    }

    async fn devices_for_account(&self, account_id: &str) -> Result<Vec<Device>, StoreError> {
        let tables = self.read()?;
        let mut devices: Vec<Device> = tables
            .links
            .keys()
            .filter(|(aid, _)| aid == account_id)
            .filter_map(|(_, did)| tables.devices.get(did).cloned())
            .collect();
        // Stable output for callers that compare lists
        devices.sort_by(|a, b| a.id.cmp(&b.id));
        Ok(devices)
    }

    async fn upsert_link(&self, link: AccountDeviceLink) -> Result<(), StoreError> {
        self.write()?
            .links
            .insert((link.account_id, link.device_id), link.status);
        Ok(())
    }

    async fn remove_link(&self, account_id: &str, device_id: &str) -> Result<(), StoreError> {
        self.write()?
            .links
            .remove(&(account_id.to_string(), device_id.to_string()));
        Ok(())
    }

    async fn get_link(
        &self,
        account_id: &str,
        device_id: &str,
    ) -> Result<Option<AccountDeviceLink>, StoreError> {
        Ok(self
            .read()?
            .links
            .get(&(account_id.to_string(), device_id.to_string()))
            .map(|status| AccountDeviceLink {
                account_id: account_id.to_string(),
                device_id: device_id.to_string(),
                status: *status,
            }))
    }
}
