//! Transport-agnostic channel contract.
//!
//! A channel owns one transport's listen loop. Every decoded request is
//! handed to the channel's subscribers as an [`InboundMessage`]; the first
//! reply sent through the message's [`ReplyHandle`] is written back to the
//! requester over the same connection.

use std::sync::{
    Arc, Mutex, PoisonError, RwLock,
    atomic::{AtomicBool, Ordering},
};

use async_trait::async_trait;
use fiend_core::{CommandRequest, CommandResponse};
use thiserror::Error;
use tokio::{sync::oneshot, task::JoinHandle};
use tokio_util::sync::CancellationToken;

/// Channel error.
#[derive(Debug, Error)]
pub enum ChannelError {
    #[error("Transport unavailable at {endpoint}: {source}")]
    TransportUnavailable {
        endpoint: String,
        #[source]
        source: std::io::Error,
    },
    #[error("Channel {channel} has been stopped and cannot be restarted")]
    Closed { channel: &'static str },
    #[error("Listener for channel {channel} panicked")]
    ListenerPanicked { channel: &'static str },
}

/// Reply error.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ReplyError {
    #[error("Reply already sent")]
    AlreadyReplied,
    #[error("Requester no longer waiting for a reply")]
    Disconnected,
}

/// Point-in-time snapshot of a channel for status reporting.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChannelDescriptor {
    pub name: String,
    pub is_active: bool,
}

/// Reply side of one inbound request. Clones share the same slot, so at
/// most one response is ever delivered.
#[derive(Debug, Clone)]
pub struct ReplyHandle {
    slot: Arc<Mutex<Option<oneshot::Sender<CommandResponse>>>>,
}

impl ReplyHandle {
    /// Create a handle and the receiver the transport waits on.
    #[must_use]
    pub fn new() -> (Self, oneshot::Receiver<CommandResponse>) {
        let (tx, rx) = oneshot::channel();
        let handle = Self {
            slot: Arc::new(Mutex::new(Some(tx))),
        };
        (handle, rx)
    }

    /// Send the response.
    ///
    /// # Errors
    /// Returns `AlreadyReplied` on a second call and `Disconnected` if the
    /// transport stopped waiting.
    pub fn send(&self, response: CommandResponse) -> Result<(), ReplyError> {
        let tx = self
            .slot
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
            .ok_or(ReplyError::AlreadyReplied)?;
        tx.send(response).map_err(|_| ReplyError::Disconnected)
    }

    /// Whether a response has already been sent.
    #[must_use]
    pub fn is_sent(&self) -> bool {
        self.slot
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .is_none()
    }
}

/// A decoded request raised by a channel.
#[derive(Debug, Clone)]
pub struct InboundMessage {
    /// Command name as sent by the requester.
    pub command: String,
    /// Full decoded request.
    pub request: CommandRequest,
    reply: ReplyHandle,
}

impl InboundMessage {
    /// Create a message around a reply handle.
    #[must_use]
    pub fn new(request: CommandRequest, reply: ReplyHandle) -> Self {
        Self {
            command: request.command.clone(),
            request,
            reply,
        }
    }

    /// Reply to the requester.
    ///
    /// # Errors
    /// See [`ReplyHandle::send`].
    pub fn reply(&self, response: CommandResponse) -> Result<(), ReplyError> {
        self.reply.send(response)
    }

    /// Handle for replying later, e.g. from a spawned task.
    #[must_use]
    pub fn reply_handle(&self) -> ReplyHandle {
        self.reply.clone()
    }
}

/// Receives message-received notifications from a channel.
#[async_trait]
pub trait MessageHandler: Send + Sync {
    /// Called exactly once per decoded request.
    async fn on_message(&self, message: InboundMessage);
}

/// Per-channel subscriber list.
#[derive(Default)]
pub struct Subscribers {
    handlers: RwLock<Vec<Arc<dyn MessageHandler>>>,
}

impl Subscribers {
    /// Register a handler.
    pub fn add(&self, handler: Arc<dyn MessageHandler>) {
        self.handlers
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .push(handler);
    }

    /// Number of registered handlers.
    #[must_use]
    pub fn len(&self) -> usize {
        self.handlers
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    /// Whether no handler is registered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Notify every handler and wait for the reply.
    ///
    /// Returns `None` when every handler returned without replying.
    pub async fn dispatch(&self, request: CommandRequest) -> Option<CommandResponse> {
        let handlers = self
            .handlers
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone();
        let (reply, rx) = ReplyHandle::new();

        for handler in handlers {
            handler
                .on_message(InboundMessage::new(request.clone(), reply.clone()))
                .await;
        }
        drop(reply);

        rx.await.ok()
    }
}

/// A transport listener that raises inbound requests.
#[async_trait]
pub trait Channel: Send + Sync {
    /// Display name of the channel.
    fn name(&self) -> &'static str;

    /// Whether the channel is currently listening.
    fn is_active(&self) -> bool;

    /// Subscribe to message-received notifications.
    fn subscribe(&self, handler: Arc<dyn MessageHandler>);

    /// Begin listening. A no-op on an active channel.
    ///
    /// The listen loop ends when `cancel` (or a parent of it) is cancelled.
    ///
    /// # Errors
    /// Returns `TransportUnavailable` if the transport cannot be set up and
    /// `Closed` if the channel was already stopped.
    async fn start(&self, cancel: &CancellationToken) -> Result<(), ChannelError>;

    /// Stop listening and wait for the listen loop to unwind.
    ///
    /// # Errors
    /// Returns error only if the listen loop panicked.
    async fn stop(&self) -> Result<(), ChannelError>;

    /// Release everything without waiting. Safe to call repeatedly.
    fn dispose(&self);

    /// Snapshot for status reporting.
    fn descriptor(&self) -> ChannelDescriptor {
        ChannelDescriptor {
            name: self.name().to_string(),
            is_active: self.is_active(),
        }
    }
}

struct Running {
    cancel: CancellationToken,
    task: JoinHandle<()>,
}

/// Start/stop bookkeeping shared by the concrete channels.
#[derive(Default)]
pub(crate) struct Lifecycle {
    active: AtomicBool,
    closed: AtomicBool,
    starting: tokio::sync::Mutex<()>,
    running: Mutex<Option<Running>>,
}

impl Lifecycle {
    /// Held across check, bind and install so concurrent starts bind once.
    pub(crate) async fn start_guard(&self) -> tokio::sync::MutexGuard<'_, ()> {
        self.starting.lock().await
    }

    pub(crate) fn is_active(&self) -> bool {
        self.active.load(Ordering::Acquire)
    }

    /// `Ok(true)` if already active, `Ok(false)` if a start should proceed.
    pub(crate) fn check_start(&self, channel: &'static str) -> Result<bool, ChannelError> {
        if self.closed.load(Ordering::Acquire) {
            return Err(ChannelError::Closed { channel });
        }
        Ok(self.is_active())
    }

    /// Spawn the listen loop unless another start won the race.
    pub(crate) fn install<F>(
        &self,
        channel: &'static str,
        cancel: CancellationToken,
        spawn: F,
    ) -> Result<(), ChannelError>
    where
        F: FnOnce(CancellationToken) -> JoinHandle<()>,
    {
        let mut running = self.running.lock().unwrap_or_else(PoisonError::into_inner);
        if self.closed.load(Ordering::Acquire) {
            return Err(ChannelError::Closed { channel });
        }
        if running.is_some() {
            return Ok(());
        }
        let task = spawn(cancel.clone());
        *running = Some(Running { cancel, task });
        self.active.store(true, Ordering::Release);
        Ok(())
    }

    pub(crate) async fn stop(&self, channel: &'static str) -> Result<(), ChannelError> {
        self.closed.store(true, Ordering::Release);
        self.active.store(false, Ordering::Release);
        let running = self
            .running
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();

        let Some(Running { cancel, task }) = running else {
            return Ok(());
        };
        cancel.cancel();
        match task.await {
            Ok(()) => {
                tracing::info!(channel, "Channel stopped");
                Ok(())
            }
            Err(e) if e.is_cancelled() => Ok(()),
            Err(_) => Err(ChannelError::ListenerPanicked { channel }),
        }
    }

    pub(crate) fn dispose(&self) {
        self.closed.store(true, Ordering::Release);
        self.active.store(false, Ordering::Release);
        let running = self
            .running
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(Running { cancel, task }) = running {
            cancel.cancel();
            task.abort();
        }
    }
}
