//! Local-stream channel over a named local socket (a named pipe on Windows).
//!
//! Framing is one JSON request per connection, answered by one JSON response
//! before the connection is closed. The request ends at end of stream or as
//! soon as the bytes read form a complete JSON document, whichever comes
//! first; local sockets cannot half-close, so clients rely on the latter.
//! There is no length prefix, so pipelined requests are not supported.

use std::{io, sync::Arc, time::Duration};

use async_trait::async_trait;
use fiend_core::{CommandRequest, CommandResponse};
use interprocess::local_socket::{
    GenericNamespaced, ListenerOptions, ToNsName,
    tokio::{Listener, Stream, prelude::*},
};
use thiserror::Error;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio_util::sync::CancellationToken;

use crate::{
    channel::{Channel, ChannelError, Lifecycle, MessageHandler, Subscribers},
    protocol::{self, MAX_REQUEST_BYTES},
};

/// Name reported for this channel.
pub const CHANNEL_NAME: &str = "NamedPipe";

const ACCEPT_RETRY_DELAY: Duration = Duration::from_secs(1);
const READ_CHUNK_BYTES: usize = 4096;

/// Failure while serving one connection. Only ends that connection.
#[derive(Debug, Error)]
enum ConnectionError {
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
    #[error("Request exceeds {MAX_REQUEST_BYTES} bytes")]
    TooLarge,
    #[error("Malformed request: {0}")]
    Decode(#[from] serde_json::Error),
}

/// Local-stream client error.
#[derive(Debug, Error)]
pub enum ClientError {
    #[error("Failed to connect to {pipe_name}: {source}")]
    Connect {
        pipe_name: String,
        #[source]
        source: io::Error,
    },
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
    #[error("Invalid JSON: {0}")]
    Json(#[from] serde_json::Error),
    #[error("Connection closed without a response")]
    NoResponse,
}

/// Channel listening on a named local socket.
pub struct LocalStreamChannel {
    pipe_name: String,
    subscribers: Arc<Subscribers>,
    lifecycle: Lifecycle,
}

impl LocalStreamChannel {
    /// Create a stopped channel for the given endpoint name.
    #[must_use]
    pub fn new<S: Into<String>>(pipe_name: S) -> Self {
        Self {
            pipe_name: pipe_name.into(),
            subscribers: Arc::new(Subscribers::default()),
            lifecycle: Lifecycle::default(),
        }
    }

    /// Endpoint name.
    #[must_use]
    pub fn pipe_name(&self) -> &str {
        &self.pipe_name
    }
}

#[async_trait]
impl Channel for LocalStreamChannel {
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

        let listener = bind(&self.pipe_name)?;
        let subscribers = Arc::clone(&self.subscribers);
        let pipe_name = self.pipe_name.clone();
        self.lifecycle
            .install(CHANNEL_NAME, cancel.child_token(), move |token| {
                tokio::spawn(run_accept_loop(listener, pipe_name, subscribers, token))
            })?;

        tracing::info!(channel = CHANNEL_NAME, pipe = %self.pipe_name, "Channel started");
        Ok(())
    }

    async fn stop(&self) -> Result<(), ChannelError> {
        self.lifecycle.stop(CHANNEL_NAME).await
    }

    fn dispose(&self) {
        self.lifecycle.dispose();
    }
}

impl Drop for LocalStreamChannel {
    fn drop(&mut self) {
        self.lifecycle.dispose();
    }
}

fn bind(pipe_name: &str) -> Result<Listener, ChannelError> {
    let unavailable = |source: io::Error| ChannelError::TransportUnavailable {
        endpoint: pipe_name.to_string(),
        source,
    };
    let name = pipe_name
        .to_ns_name::<GenericNamespaced>()
        .map_err(unavailable)?;
    ListenerOptions::new()
        .name(name)
        .create_tokio()
        .map_err(unavailable)
}

async fn run_accept_loop(
    listener: Listener,
    pipe_name: String,
    subscribers: Arc<Subscribers>,
    cancel: CancellationToken,
) {
    loop {
        let accepted = tokio::select! {
            () = cancel.cancelled() => break,
            accepted = listener.accept() => accepted,
        };

        match accepted {
            Ok(stream) => {
                let subscribers = Arc::clone(&subscribers);
                tokio::spawn(async move {
                    if let Err(e) = serve_connection(stream, &subscribers).await {
                        tracing::warn!(channel = CHANNEL_NAME, "Dropped connection: {e}");
                    }
                });
            }
            Err(e) => {
                tracing::warn!(channel = CHANNEL_NAME, pipe = %pipe_name, "Accept failed: {e}");
                tokio::select! {
                    () = cancel.cancelled() => break,
                    () = tokio::time::sleep(ACCEPT_RETRY_DELAY) => {}
                }
            }
        }
    }
    tracing::debug!(channel = CHANNEL_NAME, pipe = %pipe_name, "Accept loop ended");
}

async fn serve_connection(
    mut stream: Stream,
    subscribers: &Subscribers,
) -> Result<(), ConnectionError> {
    let Some(request) = read_request(&mut stream).await? else {
        return Ok(());
    };
    let Some(response) = subscribers.dispatch(request).await else {
        tracing::debug!(channel = CHANNEL_NAME, "No reply for request; closing");
        return Ok(());
    };

    let bytes = protocol::encode_response(&response)?;
    stream.write_all(&bytes).await?;
    stream.flush().await?;
    Ok(())
}

/// Read one request. `Ok(None)` for a blank payload closed by the peer.
async fn read_request(stream: &mut Stream) -> Result<Option<CommandRequest>, ConnectionError> {
    let mut payload = Vec::new();
    let mut chunk = [0u8; READ_CHUNK_BYTES];
    loop {
        let read = stream.read(&mut chunk).await?;
        if read == 0 {
            return Ok(protocol::decode_request(&payload)?);
        }
        payload.extend_from_slice(&chunk[..read]);
        if payload.len() > MAX_REQUEST_BYTES {
            return Err(ConnectionError::TooLarge);
        }

        match protocol::decode_request(&payload) {
            Ok(Some(request)) => return Ok(Some(request)),
            // Blank or truncated so far.
            Ok(None) => {}
            Err(e) if e.is_eof() => {}
            Err(e) => return Err(e.into()),
        }
    }
}

/// Send one request to a local-stream channel and wait for its response.
///
/// # Errors
/// Returns error if the endpoint is unreachable, the exchange fails, or the
/// channel closes the connection without answering.
pub async fn send_request(
    pipe_name: &str,
    request: &CommandRequest,
) -> Result<CommandResponse, ClientError> {
    let connect_error = |source: io::Error| ClientError::Connect {
        pipe_name: pipe_name.to_string(),
        source,
    };
    let name = pipe_name
        .to_ns_name::<GenericNamespaced>()
        .map_err(connect_error)?;
    let mut stream = Stream::connect(name).await.map_err(connect_error)?;

    let payload = serde_json::to_vec(request)?;
    stream.write_all(&payload).await?;
    stream.flush().await?;

    let mut response = Vec::new();
    stream.read_to_end(&mut response).await?;
    if response.is_empty() {
        return Err(ClientError::NoResponse);
    }
    Ok(serde_json::from_slice(&response)?)
}
