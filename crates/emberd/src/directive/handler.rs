//! Inbound directive dispatch.
//!
//! One handler instance serves all requests; per-request state lives on the
//! stack. Every code path terminates in a renderable envelope: success or a
//! typed `ErrorResponse`, never a bare transport fault.

use crate::agent::DeviceAction;
use crate::directory::DeviceDirectory;
use crate::dispatch::{AckKind, Dispatcher};
use crate::error::DirectiveError;
use crate::resolver::AccountResolver;
use crate::store::PowerStatus;

use super::envelope::{
    Directive, DirectiveEndpoint, DirectiveEnvelope, EndpointDescriptor, ResponseEnvelope,
};

/// Parses inbound envelopes and routes them by (namespace, name).
pub struct DirectiveHandler {
    resolver: AccountResolver,
    directory: DeviceDirectory,
    dispatcher: Dispatcher,
}

impl DirectiveHandler {
    pub fn new(
        resolver: AccountResolver,
        directory: DeviceDirectory,
        dispatcher: Dispatcher,
    ) -> Self {
        Self {
            resolver,
            directory,
            dispatcher,
        }
    }

    /// Handle one raw directive. Infallible by construction: parse and
    /// dispatch failures come back as error envelopes.
    #[tracing::instrument(skip(self, raw))]
    pub async fn handle(&self, raw: serde_json::Value) -> ResponseEnvelope {
        let envelope: DirectiveEnvelope = match serde_json::from_value(raw) {
            Ok(envelope) => envelope,
            Err(e) => {
                tracing::warn!("rejecting undecodable directive envelope: {e}");
                return ResponseEnvelope::error(
                    None,
                    None,
                    &DirectiveError::InvalidDirective(format!("undecodable envelope: {e}")),
                );
            }
        };

        let directive = envelope.directive;
        let correlation_token = directive.header.correlation_token.clone();
        let endpoint_id = directive.endpoint.as_ref().map(|e| e.endpoint_id.clone());

        let namespace = directive.header.namespace.clone();
        let name = directive.header.name.clone();
        let result = match (namespace.as_str(), name.as_str()) {
            ("Alexa.Discovery", "Discover") => self.discover(&directive).await,
            ("Alexa.PowerController", "TurnOn") => {
                self.power_control(&directive, DeviceAction::TurnOn).await
            }
            ("Alexa.PowerController", "TurnOff") => {
                self.power_control(&directive, DeviceAction::TurnOff).await
            }
            ("Alexa", "ReportState") => self.state_report(&directive).await,
            (namespace, name) => Err(DirectiveError::InvalidDirective(format!(
                "unsupported directive {namespace}/{name}"
            ))),
        };

        result.unwrap_or_else(|err| {
            tracing::warn!(%namespace, %name, "directive failed: {err}");
            ResponseEnvelope::error(correlation_token, endpoint_id, &err)
        })
    }

    /// Discovery deliberately degrades to an empty endpoint list instead of
    /// an error envelope: the protocol expects a response shape even when
    /// account resolution fails.
    async fn discover(&self, directive: &Directive) -> Result<ResponseEnvelope, DirectiveError> {
        let devices = match directive.payload.scope.as_ref() {
            Some(scope) => match self.resolver.resolve(&scope.token).await {
                Ok(account) => match self.directory.devices_for(&account.id).await {
                    Ok(devices) => devices,
                    Err(e) => {
                        tracing::warn!("device listing failed during discovery: {e}");
                        Vec::new()
                    }
                },
                Err(e) => {
                    tracing::warn!("account resolution failed during discovery: {e}");
                    Vec::new()
                }
            },
            None => {
                tracing::warn!("discovery directive carried no bearer scope");
                Vec::new()
            }
        };

        tracing::info!(endpoints = devices.len(), "discovery response");
        Ok(ResponseEnvelope::discovery(
            devices.iter().map(EndpointDescriptor::for_device).collect(),
        ))
    }

    async fn power_control(
        &self,
        directive: &Directive,
        action: DeviceAction,
    ) -> Result<ResponseEnvelope, DirectiveError> {
        let endpoint = require_endpoint(directive)?;
        let token = endpoint
            .scope
            .as_ref()
            .map(|s| s.token.as_str())
            .ok_or_else(|| {
                DirectiveError::InvalidDirective("endpoint carries no bearer scope".to_string())
            })?;

        // Account and device resolution are independent; run them together
        // so latency is bounded by the slower of the two.
        let (account, device) = tokio::join!(
            self.resolver.resolve(token),
            self.directory.find_device(&endpoint.endpoint_id)
        );
        let account = account?;
        let device = device?.ok_or_else(|| {
            DirectiveError::NoSuchEndpoint(endpoint.endpoint_id.clone())
        })?;

        // Ownership check: an existing but unlinked endpoint is reported
        // exactly like a missing one.
        if !self.directory.is_linked(&account.id, &device.id).await? {
            return Err(DirectiveError::NoSuchEndpoint(endpoint.endpoint_id.clone()));
        }

        let ack = self.dispatcher.execute(action, &device).await?;
        match ack.kind {
            AckKind::AcceptedOn | AckKind::AcceptedOff => Ok(ResponseEnvelope::power(
                directive.header.correlation_token.clone(),
                endpoint.scope.clone(),
                &device.id,
                ack.value.unwrap_or(PowerStatus::Unknown),
                ack.staleness_ms,
            )),
            AckKind::Rejected => Err(DirectiveError::NotInOperation(format!(
                "device {} rejected {action}",
                device.id
            ))),
            AckKind::NotAvailable | AckKind::Updating => Err(DirectiveError::EndpointUnreachable(
                format!("device {} cannot take commands right now", device.id),
            )),
        }
    }

    async fn state_report(
        &self,
        directive: &Directive,
    ) -> Result<ResponseEnvelope, DirectiveError> {
        let endpoint = require_endpoint(directive)?;
        let device = self
            .directory
            .find_device(&endpoint.endpoint_id)
            .await?
            .ok_or_else(|| DirectiveError::NoSuchEndpoint(endpoint.endpoint_id.clone()))?;

        let correlation_token = directive.header.correlation_token.clone();
        let scope = endpoint.scope.clone();
        match self.dispatcher.execute(DeviceAction::Update, &device).await {
            Ok(ack) => {
                let status = ack.value.unwrap_or(PowerStatus::Unknown);
                let reachable = !matches!(ack.kind, AckKind::NotAvailable);
                Ok(ResponseEnvelope::state_report(
                    correlation_token,
                    scope,
                    &device.id,
                    status,
                    ack.staleness_ms,
                    reachable,
                ))
            }
            Err(e) => {
                // A failed refresh degrades to an unavailable property set;
                // the HTTP call itself still succeeds.
                tracing::warn!(device_id = %device.id, "state refresh failed: {e}");
                Ok(ResponseEnvelope::state_report(
                    correlation_token,
                    scope,
                    &device.id,
                    PowerStatus::Unknown,
                    0,
                    false,
                ))
            }
        }
    }
}

fn require_endpoint(directive: &Directive) -> Result<&DirectiveEndpoint, DirectiveError> {
    directive.endpoint.as_ref().ok_or_else(|| {
        DirectiveError::InvalidDirective("directive carries no endpoint".to_string())
    })
}
