//! Account/device associations and the dedup-by-address rule.

use std::sync::Arc;

use chrono::Utc;

use crate::store::{
    AccountDeviceLink, Device, DeviceStore, LinkStatus, PowerSource, PowerStatus, StoreError,
};

/// Heartbeat payload a device sends when it registers or checks in.
#[derive(Debug, Clone)]
pub struct Registration {
    pub control_address: String,
    pub name: String,
    pub power_source: PowerSource,
    pub status: Option<PowerStatus>,
    pub battery_level: Option<u8>,
}

/// Lookup and reconciliation of device records.
pub struct DeviceDirectory {
    devices: Arc<dyn DeviceStore>,
}

impl DeviceDirectory {
    pub fn new(devices: Arc<dyn DeviceStore>) -> Self {
        Self { devices }
    }

    pub async fn devices_for(&self, account_id: &str) -> Result<Vec<Device>, StoreError> {
        self.devices.devices_for_account(account_id).await
    }

    pub async fn find_device(&self, id: &str) -> Result<Option<Device>, StoreError> {
        self.devices.get_device(id).await
    }

    /// Ownership check. Control and state-report flows must call this before
    /// dispatching: an unlinked device id is rejected even when the device
    /// exists, so one account can never drive another account's fireplace.
    pub async fn is_linked(&self, account_id: &str, device_id: &str) -> Result<bool, StoreError> {
        Ok(self.devices.get_link(account_id, device_id).await?.is_some())
    }

    /// Reconcile `candidate` against the record already holding its control
    /// address.
    ///
    /// The control address is the true identity key for a device, not the
    /// generated id: firmware resets make devices re-register with fresh ids.
    /// When an existing record matches, it keeps its id and takes the
    /// candidate's name and power-source class; the candidate's id is
    /// discarded. Otherwise the candidate persists as new.
    pub async fn upsert_by_address(&self, candidate: Device) -> Result<Device, StoreError> {
        match self
            .devices
            .find_device_by_address(&candidate.control_address)
            .await?
        {
            Some(mut existing) => {
                existing.name = candidate.name;
                existing.power_source = candidate.power_source;
                self.devices.update_device(existing.clone()).await?;
                tracing::debug!(
                    device_id = %existing.id,
                    address = %existing.control_address,
                    "reconciled re-registration into existing device"
                );
                Ok(existing)
            }
            None => {
                self.devices.insert_device(candidate.clone()).await?;
                Ok(candidate)
            }
        }
    }

    /// Device self-registration / heartbeat.
    ///
    /// Runs the address dedup, refreshes the status fields the heartbeat
    /// carried, and when an owning account is known ensures the pivot exists
    /// with a registration-time status.
    #[tracing::instrument(skip(self, registration), fields(address = %registration.control_address))]
    pub async fn register(
        &self,
        registration: Registration,
        account_id: Option<&str>,
    ) -> Result<Device, StoreError> {
        let candidate = Device::new(
            registration.control_address,
            registration.name,
            registration.power_source,
        );
        let mut device = self.upsert_by_address(candidate).await?;

        if let Some(status) = registration.status {
            device.status = status;
            device.status_at = Utc::now();
        }
        device.battery_level = registration.battery_level;
        self.devices.update_device(device.clone()).await?;

        if let Some(account_id) = account_id {
            self.devices
                .upsert_link(AccountDeviceLink {
                    account_id: account_id.to_string(),
                    device_id: device.id.clone(),
                    status: LinkStatus::for_registration(device.power_source),
                })
                .await?;
        }

        Ok(device)
    }

    /// Create or refresh the voice-control pivot for a linked account.
    pub async fn link_for_voice(
        &self,
        account_id: &str,
        device: &Device,
    ) -> Result<(), StoreError> {
        self.devices
            .upsert_link(AccountDeviceLink {
                account_id: account_id.to_string(),
                device_id: device.id.clone(),
                status: LinkStatus::for_voice_control(device.power_source),
            })
            .await
    }

    pub async fn unlink(&self, account_id: &str, device_id: &str) -> Result<(), StoreError> {
        self.devices.remove_link(account_id, device_id).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::{MemoryStore, PowerSource};

    fn directory() -> (Arc<MemoryStore>, DeviceDirectory) {
        let store = Arc::new(MemoryStore::new());
        let directory = DeviceDirectory::new(store.clone());
        (store, directory)
    }

    #[tokio::test]
    async fn second_registration_with_same_address_is_reconciled() {
        let (store, directory) = directory();

        let first = Device::new("http://10.0.0.8", "living room", PowerSource::Line);
        let first_id = first.id.clone();
        directory.upsert_by_address(first).await.unwrap();

        // Same agent address, fresh id after a firmware reset
        let second = Device::new("http://10.0.0.8", "living room hearth", PowerSource::Battery);
        let second_id = second.id.clone();
        let reconciled = directory.upsert_by_address(second).await.unwrap();

        assert_eq!(reconciled.id, first_id);
        assert_ne!(reconciled.id, second_id);
        assert_eq!(reconciled.name, "living room hearth");
        assert_eq!(reconciled.power_source, PowerSource::Battery);
        // The second attempt's id was discarded, not stored
        assert!(store.get_device(&second_id).await.unwrap().is_none());
        assert!(store
            .find_device_by_address("http://10.0.0.8")
            .await
            .unwrap()
            .is_some());
    }

    #[tokio::test]
    async fn register_links_to_owner_and_refreshes_status() {
        let (store, directory) = directory();

        let device = directory
            .register(
                Registration {
                    control_address: "http://10.0.0.9".to_string(),
                    name: "den".to_string(),
                    power_source: PowerSource::Line,
                    status: Some(PowerStatus::Off),
                    battery_level: None,
                },
                Some("account-1"),
            )
            .await
            .unwrap();

        assert_eq!(device.status, PowerStatus::Off);
        let link = store
            .get_link("account-1", &device.id)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(link.status, LinkStatus::Registerable);
    }

    #[tokio::test]
    async fn battery_device_registers_as_not_registerable() {
        let (store, directory) = directory();

        let device = directory
            .register(
                Registration {
                    control_address: "http://10.0.0.10".to_string(),
                    name: "porch".to_string(),
                    power_source: PowerSource::Battery,
                    status: None,
                    battery_level: Some(72),
                },
                Some("account-1"),
            )
            .await
            .unwrap();

        assert_eq!(device.battery_level, Some(72));
        let link = store
            .get_link("account-1", &device.id)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(link.status, LinkStatus::NotRegisterable);
    }

    #[tokio::test]
    async fn is_linked_rejects_foreign_account() {
        let (store, directory) = directory();
        let device = Device::new("http://10.0.0.11", "study", PowerSource::Line);
        store.insert_device(device.clone()).await.unwrap();
        directory.link_for_voice("owner", &device).await.unwrap();

        assert!(directory.is_linked("owner", &device.id).await.unwrap());
        assert!(!directory.is_linked("intruder", &device.id).await.unwrap());
    }
}
