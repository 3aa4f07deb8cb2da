//! Device-action dispatch: one signed outbound command, one ack, one
//! reconciled store write.

use std::sync::Arc;

use chrono::Utc;

use crate::agent::{AckValue, DeviceAction, DeviceAgent};
use crate::error::DeviceError;
use crate::signer::CredentialSigner;
use crate::store::{Device, DeviceStore, PowerStatus};

/// Interpreted acknowledgement of a dispatched action.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AckKind {
    AcceptedOn,
    AcceptedOff,
    Rejected,
    NotAvailable,
    Updating,
}

impl From<AckValue> for AckKind {
    fn from(value: AckValue) -> Self {
        match value {
            AckValue::On => AckKind::AcceptedOn,
            AckValue::Off => AckKind::AcceptedOff,
            AckValue::Unknown => AckKind::Rejected,
            AckValue::Na => AckKind::NotAvailable,
            AckValue::Updating => AckKind::Updating,
        }
    }
}

impl AckKind {
    /// Whether the agent confirmed an actual burner state.
    pub fn is_informative(&self) -> bool {
        matches!(self, AckKind::AcceptedOn | AckKind::AcceptedOff)
    }
}

/// Result of one dispatched action.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceAckStatus {
    pub kind: AckKind,

    /// Resolved burner value when the ack confirmed one.
    pub value: Option<PowerStatus>,

    /// Milliseconds since the reported status was last confirmed by the
    /// device. Near zero for a fresh confirmation; larger when the agent
    /// answered without fresh data and the report falls back to the last
    /// observation.
    pub staleness_ms: u64,
}

/// Executes actions against device agents and reconciles persisted state.
///
/// Per invocation: exactly one outbound call, at most one store write, no
/// internal retries. Callers needing resilience re-invoke.
pub struct Dispatcher {
    agent: Arc<dyn DeviceAgent>,
    signer: Arc<dyn CredentialSigner>,
    devices: Arc<dyn DeviceStore>,
}

impl Dispatcher {
    pub fn new(
        agent: Arc<dyn DeviceAgent>,
        signer: Arc<dyn CredentialSigner>,
        devices: Arc<dyn DeviceStore>,
    ) -> Self {
        Self {
            agent,
            signer,
            devices,
        }
    }

    #[tracing::instrument(skip(self, device), fields(device_id = %device.id, %action))]
    pub async fn execute(
        &self,
        action: DeviceAction,
        device: &Device,
    ) -> Result<DeviceAckStatus, DeviceError> {
        let address = reqwest::Url::parse(&device.control_address)
            .map_err(|e| DeviceError::BadAddress(format!("{}: {e}", device.control_address)))?;

        let credential = self.signer.sign(&device.id)?;

        let ack = self.agent.send(&address, &credential, action).await?;
        let kind = AckKind::from(ack.ack);

        // The confirmed value comes from the ack kind itself; an explicit
        // `value` field wins when the agent sent one.
        let value = match kind {
            AckKind::AcceptedOn => Some(ack.value.unwrap_or(PowerStatus::On)),
            AckKind::AcceptedOff => Some(ack.value.unwrap_or(PowerStatus::Off)),
            _ => None,
        };

        let now = Utc::now();
        let mut updated = device.clone();
        updated.status = value.unwrap_or(PowerStatus::Unknown);
        if kind.is_informative() {
            // Fresh observation: the status timestamp moves to now.
            updated.status_at = now;
        }
        // Non-informative acks keep the prior timestamp so staleness below
        // reflects the age of the last real observation.
        self.devices.update_device(updated.clone()).await?;

        let staleness_ms = (now - updated.status_at).num_milliseconds().max(0) as u64;

        tracing::debug!(
            device_id = %device.id,
            ?kind,
            staleness_ms,
            "device acknowledged action"
        );

        Ok(DeviceAckStatus {
            kind,
            value,
            staleness_ms,
        })
    }
}
