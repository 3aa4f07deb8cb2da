//! Outbound device-agent protocol.
//!
//! Every fireplace runs an agent reachable over HTTP. Commands are a single
//! `POST {control_address}/directive` carrying a bridge-minted bearer
//! credential; the agent answers with a small acknowledgement body. The
//! [`DeviceAgent`] trait keeps the transport mockable for tests.

use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::DeviceError;
use crate::store::PowerStatus;

/// Fixed deadline for the whole agent exchange, connection included. Voice
/// platforms budget whole responses in seconds, so the bridge never waits
/// longer than this and never retries on its own.
pub const AGENT_TIMEOUT: Duration = Duration::from_secs(7);

/// Action sent to a device agent.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, strum::Display)]
pub enum DeviceAction {
    TurnOn,
    TurnOff,
    /// Status refresh with no state-change intent.
    Update,
}

/// Request body of the agent call.
#[derive(Debug, Serialize)]
pub struct AgentCommand {
    pub name: DeviceAction,
}

/// Raw acknowledgement kind on the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum AckValue {
    On,
    Off,
    Unknown,
    Updating,
    Na,
}

/// Acknowledgement body returned by a device agent.
#[derive(Debug, Clone, Deserialize)]
pub struct AgentAck {
    pub ack: AckValue,
    #[serde(default)]
    pub value: Option<PowerStatus>,
}

/// Trait for device-agent transport operations
///
/// This trait allows for mocking the agent transport for testing purposes
#[async_trait]
pub trait DeviceAgent: Send + Sync {
    /// Issue one command to the agent at `address` and decode its
    /// acknowledgement. At most one attempt per call.
    async fn send(
        &self,
        address: &reqwest::Url,
        credential: &str,
        action: DeviceAction,
    ) -> Result<AgentAck, DeviceError>;
}

/// Real agent transport over reqwest.
pub struct HttpDeviceAgent {
    http: reqwest::Client,
}

impl HttpDeviceAgent {
    pub fn new() -> anyhow::Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(AGENT_TIMEOUT)
            .connect_timeout(AGENT_TIMEOUT)
            .build()?;
        Ok(Self { http })
    }
}

#[async_trait]
impl DeviceAgent for HttpDeviceAgent {
    async fn send(
        &self,
        address: &reqwest::Url,
        credential: &str,
        action: DeviceAction,
    ) -> Result<AgentAck, DeviceError> {
        let url = format!("{}/directive", address.as_str().trim_end_matches('/'));

        let response = self
            .http
            .post(&url)
            .bearer_auth(credential)
            .json(&AgentCommand { name: action })
            .send()
            .await
            .map_err(|e| DeviceError::Unreachable(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            return Err(DeviceError::Unreachable(format!(
                "agent returned status {status}"
            )));
        }

        response
            .json::<AgentAck>()
            .await
            .map_err(|e| DeviceError::MalformedResponse(e.to_string()))
    }
}
