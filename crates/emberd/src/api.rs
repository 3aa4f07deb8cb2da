//! HTTP surface: the machine-facing directive endpoint, the browser-facing
//! linking callback, device self-registration, and operational endpoints.

use std::net::SocketAddr;
use std::sync::Arc;

use axum::extract::{Query, State};
use axum::http::StatusCode;
use axum::response::{Html, IntoResponse};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::{Deserialize, Serialize};
use tokio::net::TcpListener;
use tower_http::trace::TraceLayer;

use crate::config::Config;
use crate::directive::DirectiveHandler;
use crate::directory::{DeviceDirectory, Registration};
use crate::error::LinkingError;
use crate::linking::{LinkSummary, LinkWorkflow};
use crate::store::{PowerSource, PowerStatus};

/// Response for the /v1/ping endpoint
#[derive(Serialize)]
struct PingResponse {
    status: String,
}

/// Response for the /v1/info endpoint
#[derive(Serialize)]
struct InfoResponse {
    version: String,
    hostname: String,
}

/// Device self-registration / heartbeat request
#[derive(Debug, Deserialize)]
struct RegisterRequest {
    control_address: String,
    name: String,
    power_source: PowerSource,
    status: Option<PowerStatus>,
    battery_level: Option<u8>,

    /// Link-session correlation id, when the device was set up from a
    /// not-yet-linked session.
    session: Option<String>,
}

#[derive(Debug, Serialize)]
struct RegisterResponse {
    device_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    account_id: Option<String>,
}

#[derive(Debug, Serialize)]
struct ErrorBody {
    error: String,
}

/// Query parameters of the OAuth redirect callback
#[derive(Debug, Deserialize)]
struct LinkCallback {
    code: Option<String>,
    state: Option<String>,
    error: Option<String>,
}

/// Pieces needed to rebuild the provider login URL for retry links
pub struct LoginRedirect {
    authorize_url: String,
    client_id: String,
    redirect_uri: String,
}

impl LoginRedirect {
    pub fn from_config(config: &Config) -> Self {
        Self {
            authorize_url: config.oauth.authorize_url.clone(),
            client_id: config.oauth.client_id.clone(),
            redirect_uri: config.redirect_uri(),
        }
    }

    fn url(&self, session: Option<&str>) -> String {
        match reqwest::Url::parse(&self.authorize_url) {
            Ok(mut url) => {
                {
                    let mut pairs = url.query_pairs_mut();
                    pairs
                        .append_pair("client_id", &self.client_id)
                        .append_pair("scope", "profile")
                        .append_pair("response_type", "code")
                        .append_pair("redirect_uri", &self.redirect_uri);
                    if let Some(session) = session {
                        pairs.append_pair("state", session);
                    }
                }
                url.to_string()
            }
            Err(_) => self.authorize_url.clone(),
        }
    }
}

/// Shared application state
pub struct AppState {
    pub handler: DirectiveHandler,
    pub workflow: LinkWorkflow,
    pub directory: DeviceDirectory,
    pub login: LoginRedirect,
    pub version: &'static str,
}

/// Handler for GET /v1/ping
#[tracing::instrument]
async fn ping() -> impl IntoResponse {
    (
        StatusCode::OK,
        Json(PingResponse {
            status: "ok".to_string(),
        }),
    )
}

/// Handler for GET /v1/info
#[tracing::instrument(skip(state))]
async fn info(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let hostname = hostname::get()
        .ok()
        .and_then(|h| h.into_string().ok())
        .unwrap_or_else(|| "unknown".to_string());

    (
        StatusCode::OK,
        Json(InfoResponse {
            version: state.version.to_string(),
            hostname,
        }),
    )
}

/// Handler for POST /v1/directive
///
/// Always answers 200 with a protocol envelope; application-level failures
/// travel inside the envelope, not in the HTTP status.
async fn directive(
    State(state): State<Arc<AppState>>,
    Json(raw): Json<serde_json::Value>,
) -> impl IntoResponse {
    let response = state.handler.handle(raw).await;
    (StatusCode::OK, Json(response))
}

/// Handler for GET /v1/link, the OAuth redirect callback
async fn link_callback(
    State(state): State<Arc<AppState>>,
    Query(query): Query<LinkCallback>,
) -> Html<String> {
    let session = query.state.as_deref();

    if let Some(code) = query.error {
        let err = LinkingError::Provider {
            code,
            description: None,
        };
        return Html(failure_page(&err, &state.login.url(session)));
    }

    let Some(code) = query.code else {
        let err = LinkingError::CodeExchange(
            "callback carried no authorization code".to_string(),
        );
        return Html(failure_page(&err, &state.login.url(session)));
    };

    match state.workflow.link(&code, session).await {
        Ok(summary) => Html(success_page(&summary)),
        Err(err) => {
            tracing::warn!("account linking failed: {err}");
            Html(failure_page(&err, &state.login.url(session)))
        }
    }
}

/// Handler for POST /v1/devices/register
async fn register_device(
    State(state): State<Arc<AppState>>,
    Json(request): Json<RegisterRequest>,
) -> axum::response::Response {
    let account = match &request.session {
        Some(session) => match state.workflow.placeholder_for_session(session).await {
            Ok(account) => Some(account),
            Err(e) => {
                tracing::error!("placeholder lookup failed: {e}");
                return (
                    StatusCode::SERVICE_UNAVAILABLE,
                    Json(ErrorBody {
                        error: e.to_string(),
                    }),
                )
                    .into_response();
            }
        },
        None => None,
    };

    let registration = Registration {
        control_address: request.control_address,
        name: request.name,
        power_source: request.power_source,
        status: request.status,
        battery_level: request.battery_level,
    };
    match state
        .directory
        .register(registration, account.as_ref().map(|a| a.id.as_str()))
        .await
    {
        Ok(device) => (
            StatusCode::OK,
            Json(RegisterResponse {
                device_id: device.id,
                account_id: account.map(|a| a.id),
            }),
        )
            .into_response(),
        Err(e) => {
            tracing::error!("device registration failed: {e}");
            (
                StatusCode::SERVICE_UNAVAILABLE,
                Json(ErrorBody {
                    error: e.to_string(),
                }),
            )
                .into_response()
        }
    }
}

fn success_page(summary: &LinkSummary) -> String {
    format!(
        "<!DOCTYPE html><html><head><title>Account linked</title></head><body>\
         <h1>Account linked</h1>\
         <p>Welcome, {}. {} fireplace(s) are now available to your voice assistant.</p>\
         </body></html>",
        summary.account_name, summary.devices_linked
    )
}

fn failure_page(err: &LinkingError, retry_url: &str) -> String {
    format!(
        "<!DOCTYPE html><html><head><title>Linking failed</title></head><body>\
         <h1>Linking failed</h1>\
         <p>{err}</p>\
         <p><a href=\"{retry_url}\">Try again</a></p>\
         </body></html>"
    )
}

/// Create the API router with all endpoints
fn create_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/v1/ping", get(ping))
        .route("/v1/info", get(info))
        .route("/v1/directive", post(directive))
        .route("/v1/link", get(link_callback))
        .route("/v1/devices/register", post(register_device))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Start the HTTP API server
///
/// Binds to the configured address and serves until the shutdown signal
/// triggers.
pub async fn serve(
    listen: String,
    port: u16,
    state: Arc<AppState>,
    shutdown_rx: tokio::sync::oneshot::Receiver<()>,
) -> anyhow::Result<()> {
    let app = create_router(state);

    let addr: SocketAddr = format!("{}:{}", listen, port).parse()?;
    tracing::info!("Starting HTTP API server on {}", addr);

    let listener = TcpListener::bind(addr).await?;

    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            shutdown_rx.await.ok();
            tracing::info!("HTTP API server shutting down gracefully");
        })
        .await?;

    Ok(())
}
