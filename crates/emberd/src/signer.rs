//! Short-lived signed credentials for device-agent calls.
//!
//! These are separate from the voice-platform bearer token: the agent only
//! trusts commands carrying a credential minted by this bridge. The signer is
//! injected into the dispatcher at construction so no signing state is
//! reached through globals, and the key id travels in the token header for
//! rotation.

use chrono::Utc;
use jsonwebtoken::{encode, Algorithm, EncodingKey, Header};
use serde::{Deserialize, Serialize};

use crate::config::SigningConfig;
use crate::error::DeviceError;

/// Claims carried by a device-agent credential.
#[derive(Debug, Serialize, Deserialize)]
pub struct DeviceClaims {
    /// Device id the credential is scoped to.
    pub sub: String,
    pub iss: String,
    pub iat: i64,
    pub exp: i64,
}

/// Mints bearer credentials for outbound device-agent calls.
pub trait CredentialSigner: Send + Sync {
    fn sign(&self, device_id: &str) -> Result<String, DeviceError>;
}

/// JWT-based signer keyed by a versioned key id.
pub struct JwtSigner {
    key: EncodingKey,
    key_id: String,
    ttl_secs: i64,
}

impl JwtSigner {
    pub fn new(config: &SigningConfig) -> Self {
        Self {
            key: EncodingKey::from_secret(config.key.as_bytes()),
            key_id: config.key_id.clone(),
            ttl_secs: config.credential_ttl_secs as i64,
        }
    }
}

impl CredentialSigner for JwtSigner {
    fn sign(&self, device_id: &str) -> Result<String, DeviceError> {
        let now = Utc::now();
        let claims = DeviceClaims {
            sub: device_id.to_string(),
            iss: "emberd".to_string(),
            iat: now.timestamp(),
            exp: (now + chrono::Duration::seconds(self.ttl_secs)).timestamp(),
        };

        let mut header = Header::new(Algorithm::HS256);
        header.kid = Some(self.key_id.clone());

        encode(&header, &claims, &self.key).map_err(|e| DeviceError::Credential(e.to_string()))
    }
}
