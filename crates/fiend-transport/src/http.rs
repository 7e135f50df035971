//! Loopback HTTP channel.
//!
//! Routes:
//! - `OPTIONS *` - CORS preflight, answered without dispatch
//! - `POST *` - JSON command request body
//! - `GET /random`, `GET /status`, `GET /list` - request synthesized from the path

use std::{
    any::Any,
    net::SocketAddr,
    sync::{Arc, Mutex, PoisonError},
    time::Duration,
};

use async_trait::async_trait;
use axum::{
    Json, Router,
    body::{Body, Bytes},
    extract::State,
    http::{HeaderValue, Method, StatusCode, Uri, header},
    response::{IntoResponse, Response},
};
use fiend_core::{CommandRequest, CommandResponse, WebServerSettings};
use tokio::{net::TcpListener, time};
use tokio_util::sync::CancellationToken;
use tower_http::{
    catch_panic::CatchPanicLayer, set_header::SetResponseHeaderLayer, trace::TraceLayer,
};

use crate::{
    channel::{Channel, ChannelError, Lifecycle, MessageHandler, Subscribers},
    protocol::{self, ErrorBody},
};

/// Name reported for this channel.
pub const CHANNEL_NAME: &str = "WebServer";

/// How long `stop` waits for open connections before abandoning them.
pub const DEFAULT_SHUTDOWN_GRACE: Duration = Duration::from_secs(5);

const INVALID_REQUEST: &str = "Invalid request";
const INTERNAL_ERROR: &str = "Internal server error";

#[derive(Clone)]
struct HttpState {
    subscribers: Arc<Subscribers>,
}

/// Channel serving command requests over HTTP.
pub struct HttpChannel {
    host: String,
    port: u16,
    subscribers: Arc<Subscribers>,
    lifecycle: Lifecycle,
    local_addr: Mutex<Option<SocketAddr>>,
    shutdown_grace: Duration,
}

impl HttpChannel {
    /// Create a stopped channel for `host:port`. Port 0 picks a free port.
    #[must_use]
    pub fn new<S: Into<String>>(host: S, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
            subscribers: Arc::new(Subscribers::default()),
            lifecycle: Lifecycle::default(),
            local_addr: Mutex::new(None),
            shutdown_grace: DEFAULT_SHUTDOWN_GRACE,
        }
    }

    /// Override how long shutdown waits for in-flight connections.
    #[must_use]
    pub fn with_shutdown_grace(mut self, grace: Duration) -> Self {
        self.shutdown_grace = grace;
        self
    }

    /// Create a channel from web server settings.
    #[must_use]
    pub fn from_settings(settings: &WebServerSettings) -> Self {
        Self::new(settings.bind_host(), settings.port)
    }

    /// Address actually bound, once started.
    #[must_use]
    pub fn local_addr(&self) -> Option<SocketAddr> {
        *self.local_addr.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn endpoint(&self) -> String {
        format!("http://{}:{}/", self.host, self.port)
    }
}

#[async_trait]
impl Channel for HttpChannel {
    fn name(&self) -> &'static str {
        CHANNEL_NAME
    }

    fn is_active(&self) -> bool {
        self.lifecycle.is_active()
    }

    fn subscribe(&self, handler: Arc<dyn MessageHandler>) {
        self.subscribers.add(handler);
    }

    async fn start(&self, cancel: &CancellationToken) -> Result<(), ChannelError> {
        let _starting = self.lifecycle.start_guard().await;
        if self.lifecycle.check_start(CHANNEL_NAME)? {
            return Ok(());
        }

        let listener = TcpListener::bind((self.host.as_str(), self.port))
            .await
            .map_err(|source| ChannelError::TransportUnavailable {
                endpoint: self.endpoint(),
                source,
            })?;
        let addr = listener.local_addr().ok();
        let app = router(Arc::clone(&self.subscribers));
        let grace = self.shutdown_grace;

        self.lifecycle
            .install(CHANNEL_NAME, cancel.child_token(), move |token| {
                tokio::spawn(serve(listener, app, token, grace))
            })?;
        *self.local_addr.lock().unwrap_or_else(PoisonError::into_inner) = addr;

        tracing::info!(channel = CHANNEL_NAME, addr = ?addr, "Channel started");
        Ok(())
    }

    async fn stop(&self) -> Result<(), ChannelError> {
        self.lifecycle.stop(CHANNEL_NAME).await
    }

    fn dispose(&self) {
        self.lifecycle.dispose();
    }
}

/// Serve until `token` fires, then give open connections `grace` to finish.
async fn serve(listener: TcpListener, app: Router, token: CancellationToken, grace: Duration) {
    let server = axum::serve(listener, app)
        .with_graceful_shutdown(token.clone().cancelled_owned())
        .into_future();
    let deadline = async {
        token.cancelled().await;
        time::sleep(grace).await;
    };

    tokio::select! {
        result = server => {
            if let Err(e) = result {
                tracing::error!(channel = CHANNEL_NAME, "HTTP server failed: {e}");
            }
        }
        () = deadline => {
            tracing::warn!(
                channel = CHANNEL_NAME,
                grace = ?grace,
                "Connections still open after shutdown grace period; abandoning them"
            );
        }
    }
}

impl Drop for HttpChannel {
    fn drop(&mut self) {
        self.lifecycle.dispose();
    }
}

/// Build the HTTP router that feeds the given subscribers.
///
/// Every response carries the CORS headers, panics become `500`.
#[must_use]
pub fn router(subscribers: Arc<Subscribers>) -> Router {
    Router::new()
        .fallback(handle_request)
        .with_state(HttpState { subscribers })
        .layer(CatchPanicLayer::custom(panic_response))
        .layer(SetResponseHeaderLayer::overriding(
            header::ACCESS_CONTROL_ALLOW_ORIGIN,
            HeaderValue::from_static("*"),
        ))
        .layer(SetResponseHeaderLayer::overriding(
            header::ACCESS_CONTROL_ALLOW_METHODS,
            HeaderValue::from_static("GET, POST, OPTIONS"),
        ))
        .layer(SetResponseHeaderLayer::overriding(
            header::ACCESS_CONTROL_ALLOW_HEADERS,
            HeaderValue::from_static("Content-Type"),
        ))
        .layer(TraceLayer::new_for_http())
}

async fn handle_request(
    State(state): State<HttpState>,
    method: Method,
    uri: Uri,
    body: Bytes,
) -> Response {
    let request = match method {
        Method::OPTIONS => return StatusCode::OK.into_response(),
        Method::POST => match protocol::decode_request(&body) {
            Ok(request) => request,
            Err(e) => {
                tracing::debug!(channel = CHANNEL_NAME, "Rejected request body: {e}");
                None
            }
        },
        Method::GET => request_for_path(uri.path()),
        _ => None,
    };

    let Some(request) = request else {
        return error_response(StatusCode::BAD_REQUEST, INVALID_REQUEST);
    };

    match state.subscribers.dispatch(request).await {
        Some(response) => json_response(&response),
        None => error_response(StatusCode::INTERNAL_SERVER_ERROR, INTERNAL_ERROR),
    }
}

fn request_for_path(path: &str) -> Option<CommandRequest> {
    match path.trim_start_matches('/') {
        "random" => Some(CommandRequest::new("random").random()),
        "status" => Some(CommandRequest::new("status")),
        "list" => Some(CommandRequest::new("list")),
        _ => None,
    }
}

fn json_response(response: &CommandResponse) -> Response {
    match protocol::encode_response_pretty(response) {
        Ok(bytes) => (
            StatusCode::OK,
            [(header::CONTENT_TYPE, "application/json")],
            bytes,
        )
            .into_response(),
        Err(e) => {
            tracing::error!(channel = CHANNEL_NAME, "Failed to encode response: {e}");
            error_response(StatusCode::INTERNAL_SERVER_ERROR, INTERNAL_ERROR)
        }
    }
}

fn error_response(status: StatusCode, message: &str) -> Response {
    (status, Json(ErrorBody::new(status.as_u16(), message))).into_response()
}

fn panic_response(_panic: Box<dyn Any + Send + 'static>) -> Response<Body> {
    tracing::error!(channel = CHANNEL_NAME, "Request handler panicked");
    error_response(StatusCode::INTERNAL_SERVER_ERROR, INTERNAL_ERROR)
}
