//! Smart-home protocol envelopes, both directions.
//!
//! Inbound directives and outbound events share the Alexa Smart Home v3
//! shapes: a `header` keyed by (namespace, name), an optional `endpoint`,
//! and a payload whose layout depends on the header. Field names on the
//! wire are camelCase.

use std::collections::HashMap;

use chrono::{SecondsFormat, Utc};
use serde::{Deserialize, Serialize};

use crate::error::DirectiveError;
use crate::store::{Device, PowerStatus};

/// Fixed endpoint metadata reported during discovery.
pub const MANUFACTURER: &str = "emberd";
pub const ENDPOINT_DESCRIPTION: &str = "Network-controlled fireplace";
pub const DISPLAY_CATEGORY: &str = "OTHER";

const PAYLOAD_VERSION: &str = "3";

/// Header shared by directives and events.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Header {
    pub namespace: String,
    pub name: String,
    pub payload_version: String,
    pub message_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub correlation_token: Option<String>,
}

impl Header {
    /// A response header with a fresh message id.
    fn event(namespace: &str, name: &str, correlation_token: Option<String>) -> Self {
        Self {
            namespace: namespace.to_string(),
            name: name.to_string(),
            payload_version: PAYLOAD_VERSION.to_string(),
            message_id: uuid::Uuid::new_v4().to_string(),
            correlation_token,
        }
    }
}

/// Bearer-token scope.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Scope {
    #[serde(rename = "type")]
    pub scope_type: String,
    pub token: String,
}

/// Inbound request envelope.
#[derive(Debug, Deserialize)]
pub struct DirectiveEnvelope {
    pub directive: Directive,
}

#[derive(Debug, Deserialize)]
pub struct Directive {
    pub header: Header,
    pub endpoint: Option<DirectiveEndpoint>,
    #[serde(default)]
    pub payload: DirectivePayload,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DirectiveEndpoint {
    pub scope: Option<Scope>,
    pub endpoint_id: String,
    #[serde(default)]
    pub cookie: HashMap<String, String>,
}

#[derive(Debug, Default, Deserialize)]
pub struct DirectivePayload {
    pub scope: Option<Scope>,
}

/// Outbound event envelope.
#[derive(Debug, Serialize)]
pub struct ResponseEnvelope {
    pub event: Event,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub context: Option<Context>,
}

#[derive(Debug, Serialize)]
pub struct Event {
    pub header: Header,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub endpoint: Option<EventEndpoint>,
    pub payload: EventPayload,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct EventEndpoint {
    /// Bearer scope echoed back from the directive, when it carried one.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub scope: Option<Scope>,
    pub endpoint_id: String,
}

#[derive(Debug, Serialize)]
#[serde(untagged)]
pub enum EventPayload {
    Empty {},
    Discovery {
        endpoints: Vec<EndpointDescriptor>,
    },
    Error {
        #[serde(rename = "type")]
        error_type: String,
        message: String,
    },
}

#[derive(Debug, Serialize)]
pub struct Context {
    pub properties: Vec<Property>,
}

/// One reported state property with its observation time and uncertainty.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Property {
    pub namespace: String,
    pub name: String,
    pub value: serde_json::Value,
    pub time_of_sample: String,
    pub uncertainty_in_milliseconds: u64,
}

impl Property {
    fn new(namespace: &str, name: &str, value: serde_json::Value, staleness_ms: u64) -> Self {
        let sampled_at = Utc::now() - chrono::Duration::milliseconds(staleness_ms as i64);
        Self {
            namespace: namespace.to_string(),
            name: name.to_string(),
            value,
            time_of_sample: sampled_at.to_rfc3339_opts(SecondsFormat::Millis, true),
            uncertainty_in_milliseconds: staleness_ms,
        }
    }

    fn power_state(status: PowerStatus, staleness_ms: u64) -> Self {
        Self::new(
            "Alexa.PowerController",
            "powerState",
            serde_json::json!(status),
            staleness_ms,
        )
    }

    fn connectivity(reachable: bool, staleness_ms: u64) -> Self {
        let value = if reachable { "OK" } else { "UNREACHABLE" };
        Self::new(
            "Alexa.EndpointHealth",
            "connectivity",
            serde_json::json!({ "value": value }),
            staleness_ms,
        )
    }
}

/// Endpoint descriptor emitted for each device during discovery.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct EndpointDescriptor {
    pub endpoint_id: String,
    pub manufacturer_name: String,
    pub description: String,
    pub friendly_name: String,
    pub display_categories: Vec<String>,
    pub capabilities: Vec<Capability>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Capability {
    #[serde(rename = "type")]
    pub capability_type: String,
    pub interface: String,
    pub version: String,
}

impl Capability {
    fn interface(name: &str) -> Self {
        Self {
            capability_type: "AlexaInterface".to_string(),
            interface: name.to_string(),
            version: PAYLOAD_VERSION.to_string(),
        }
    }
}

impl EndpointDescriptor {
    pub fn for_device(device: &Device) -> Self {
        Self {
            endpoint_id: device.id.clone(),
            manufacturer_name: MANUFACTURER.to_string(),
            description: ENDPOINT_DESCRIPTION.to_string(),
            friendly_name: device.name.clone(),
            display_categories: vec![DISPLAY_CATEGORY.to_string()],
            capabilities: vec![
                Capability::interface("Alexa.PowerController"),
                Capability::interface("Alexa.EndpointHealth"),
            ],
        }
    }
}

impl ResponseEnvelope {
    pub fn discovery(endpoints: Vec<EndpointDescriptor>) -> Self {
        Self {
            event: Event {
                header: Header::event("Alexa.Discovery", "Discover.Response", None),
                endpoint: None,
                payload: EventPayload::Discovery { endpoints },
            },
            context: None,
        }
    }

    /// Success response to a power-control directive.
    pub fn power(
        correlation_token: Option<String>,
        scope: Option<Scope>,
        endpoint_id: &str,
        status: PowerStatus,
        staleness_ms: u64,
    ) -> Self {
        Self {
            event: Event {
                header: Header::event("Alexa", "Response", correlation_token),
                endpoint: Some(EventEndpoint {
                    scope,
                    endpoint_id: endpoint_id.to_string(),
                }),
                payload: EventPayload::Empty {},
            },
            context: Some(Context {
                properties: vec![
                    Property::power_state(status, staleness_ms),
                    Property::connectivity(true, staleness_ms),
                ],
            }),
        }
    }

    /// State report built from the last known status.
    ///
    /// An unknown status omits the power property rather than inventing one;
    /// an unreachable device reports UNREACHABLE health.
    pub fn state_report(
        correlation_token: Option<String>,
        scope: Option<Scope>,
        endpoint_id: &str,
        status: PowerStatus,
        staleness_ms: u64,
        reachable: bool,
    ) -> Self {
        let mut properties = Vec::new();
        if status != PowerStatus::Unknown {
            properties.push(Property::power_state(status, staleness_ms));
        }
        properties.push(Property::connectivity(reachable, staleness_ms));

        Self {
            event: Event {
                header: Header::event("Alexa", "StateReport", correlation_token),
                endpoint: Some(EventEndpoint {
                    scope,
                    endpoint_id: endpoint_id.to_string(),
                }),
                payload: EventPayload::Empty {},
            },
            context: Some(Context { properties }),
        }
    }

    pub fn error(
        correlation_token: Option<String>,
        endpoint_id: Option<String>,
        err: &DirectiveError,
    ) -> Self {
        Self {
            event: Event {
                header: Header::event("Alexa", "ErrorResponse", correlation_token),
                endpoint: endpoint_id.map(|endpoint_id| EventEndpoint {
                    scope: None,
                    endpoint_id,
                }),
                payload: EventPayload::Error {
                    error_type: err.error_type().to_string(),
                    message: err.to_string(),
                },
            },
            context: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn directive_envelope_decodes_control_request() {
        let raw = serde_json::json!({
            "directive": {
                "header": {
                    "namespace": "Alexa.PowerController",
                    "name": "TurnOn",
                    "payloadVersion": "3",
                    "messageId": "msg-1",
                    "correlationToken": "corr-1"
                },
                "endpoint": {
                    "scope": { "type": "BearerToken", "token": "tok" },
                    "endpointId": "dev-1",
                    "cookie": {}
                },
                "payload": {}
            }
        });

        let envelope: DirectiveEnvelope = serde_json::from_value(raw).unwrap();
        let directive = envelope.directive;
        assert_eq!(directive.header.namespace, "Alexa.PowerController");
        assert_eq!(directive.header.correlation_token.as_deref(), Some("corr-1"));
        let endpoint = directive.endpoint.unwrap();
        assert_eq!(endpoint.endpoint_id, "dev-1");
        assert_eq!(endpoint.scope.unwrap().token, "tok");
    }

    #[test]
    fn discovery_directive_carries_payload_scope() {
        let raw = serde_json::json!({
            "directive": {
                "header": {
                    "namespace": "Alexa.Discovery",
                    "name": "Discover",
                    "payloadVersion": "3",
                    "messageId": "msg-2"
                },
                "payload": {
                    "scope": { "type": "BearerToken", "token": "discover-tok" }
                }
            }
        });

        let envelope: DirectiveEnvelope = serde_json::from_value(raw).unwrap();
        assert_eq!(
            envelope.directive.payload.scope.unwrap().token,
            "discover-tok"
        );
    }

    #[test]
    fn error_envelope_shape() {
        let envelope = ResponseEnvelope::error(
            Some("corr".to_string()),
            Some("dev-1".to_string()),
            &DirectiveError::NoSuchEndpoint("dev-1".to_string()),
        );
        let value = serde_json::to_value(&envelope).unwrap();

        assert_eq!(value["event"]["header"]["namespace"], "Alexa");
        assert_eq!(value["event"]["header"]["name"], "ErrorResponse");
        assert_eq!(value["event"]["header"]["payloadVersion"], "3");
        assert_eq!(value["event"]["header"]["correlationToken"], "corr");
        assert_eq!(value["event"]["endpoint"]["endpointId"], "dev-1");
        assert_eq!(value["event"]["payload"]["type"], "NO_SUCH_ENDPOINT");
        assert!(value.get("context").is_none());
    }

    #[test]
    fn power_envelope_reports_state_and_health() {
        let envelope = ResponseEnvelope::power(
            Some("corr".to_string()),
            Some(Scope {
                scope_type: "BearerToken".to_string(),
                token: "tok".to_string(),
            }),
            "dev-1",
            PowerStatus::On,
            0,
        );
        let value = serde_json::to_value(&envelope).unwrap();

        assert_eq!(value["event"]["header"]["name"], "Response");
        assert_eq!(value["event"]["endpoint"]["scope"]["token"], "tok");
        let properties = value["context"]["properties"].as_array().unwrap();
        assert_eq!(properties.len(), 2);
        assert_eq!(properties[0]["namespace"], "Alexa.PowerController");
        assert_eq!(properties[0]["name"], "powerState");
        assert_eq!(properties[0]["value"], "ON");
        assert_eq!(properties[1]["namespace"], "Alexa.EndpointHealth");
        assert_eq!(properties[1]["value"]["value"], "OK");
    }

    #[test]
    fn unknown_status_omits_power_property() {
        let envelope =
            ResponseEnvelope::state_report(None, None, "dev-1", PowerStatus::Unknown, 5_000, false);
        let value = serde_json::to_value(&envelope).unwrap();

        let properties = value["context"]["properties"].as_array().unwrap();
        assert_eq!(properties.len(), 1);
        assert_eq!(properties[0]["name"], "connectivity");
        assert_eq!(properties[0]["value"]["value"], "UNREACHABLE");
        assert_eq!(properties[0]["uncertaintyInMilliseconds"], 5_000);
    }
}
