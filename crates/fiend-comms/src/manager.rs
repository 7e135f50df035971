//! Channel manager for the remote-control transports.

use std::{
    panic::{self, AssertUnwindSafe},
    sync::Arc,
};

use fiend_core::{CommandProcessor, CommunicationSettings, TargetController};
use fiend_transport::{Channel, ChannelDescriptor, ChannelError, MessageHandler};
use futures::future;
use tokio_util::sync::CancellationToken;

use crate::handler::CommandDispatcher;

/// Channel manager error.
#[derive(Debug, thiserror::Error)]
pub enum ManagerError {
    #[error("Channel error: {0}")]
    Channel(#[from] ChannelError),
    #[error("Channel manager has been disposed")]
    Disposed,
}

/// Owns the started channels and routes their requests to the processor.
///
/// Teardown is idempotent: `stop_all` and `dispose` may be called any number
/// of times, and dropping the manager disposes it.
pub struct ChannelManager {
    dispatcher: Arc<CommandDispatcher>,
    channels: Vec<Arc<dyn Channel>>,
    cancel: Option<CancellationToken>,
}

impl ChannelManager {
    /// Create a manager that drives the given controller.
    #[must_use]
    pub fn new(controller: Arc<dyn TargetController>) -> Self {
        Self::with_processor(CommandProcessor::new(controller))
    }

    /// Create a manager around an existing processor.
    #[must_use]
    pub fn with_processor(processor: CommandProcessor) -> Self {
        Self {
            dispatcher: Arc::new(CommandDispatcher::new(processor)),
            channels: Vec::new(),
            cancel: Some(CancellationToken::new()),
        }
    }

    /// Start every channel enabled in `settings`.
    ///
    /// A channel that fails to start is logged, disposed and left out; the
    /// others still start. Returns the number of channels started.
    pub async fn initialize(&mut self, settings: &CommunicationSettings) -> usize {
        let before = self.channels.len();

        if settings.named_pipe.enabled {
            #[cfg(feature = "pipe")]
            {
                let channel = fiend_transport::LocalStreamChannel::new(
                    settings.named_pipe.pipe_name.clone(),
                );
                // Start failures are logged by add_channel.
                let _ = self.add_channel(Arc::new(channel)).await;
            }
            #[cfg(not(feature = "pipe"))]
            tracing::warn!("Named pipe enabled in settings but the pipe feature is disabled");
        }

        if settings.web_server.enabled {
            #[cfg(feature = "http")]
            {
                let channel = fiend_transport::HttpChannel::from_settings(&settings.web_server);
                // Start failures are logged by add_channel.
                let _ = self.add_channel(Arc::new(channel)).await;
            }
            #[cfg(not(feature = "http"))]
            tracing::warn!("Web server enabled in settings but the http feature is disabled");
        }

        self.channels.len() - before
    }

    /// Subscribe the processor to `channel` and start it.
    ///
    /// On failure the channel is disposed and not tracked.
    ///
    /// # Errors
    /// Returns error if the manager was disposed or the channel failed to start.
    pub async fn add_channel(&mut self, channel: Arc<dyn Channel>) -> Result<(), ManagerError> {
        let Some(cancel) = self.cancel.clone() else {
            channel.dispose();
            return Err(ManagerError::Disposed);
        };

        channel.subscribe(Arc::clone(&self.dispatcher) as Arc<dyn MessageHandler>);
        match channel.start(&cancel).await {
            Ok(()) => {
                tracing::info!(channel = channel.name(), "Started communication channel");
                self.channels.push(channel);
                Ok(())
            }
            Err(e) => {
                tracing::warn!(channel = channel.name(), "Failed to start channel: {e}");
                channel.dispose();
                Err(e.into())
            }
        }
    }

    /// Snapshot of the tracked channels. Never touches the network.
    #[must_use]
    pub fn status(&self) -> Vec<ChannelDescriptor> {
        self.channels.iter().map(|c| c.descriptor()).collect()
    }

    /// Number of tracked channels.
    #[must_use]
    pub fn channel_count(&self) -> usize {
        self.channels.len()
    }

    /// Cancel the shared token and stop every channel concurrently.
    pub async fn stop_all(&self) {
        if let Some(cancel) = &self.cancel {
            cancel.cancel();
        }

        let results = future::join_all(self.channels.iter().map(|c| c.stop())).await;
        for (channel, result) in self.channels.iter().zip(results) {
            if let Err(e) = result {
                tracing::warn!(channel = channel.name(), "Error stopping channel: {e}");
            }
        }
    }

    /// Dispose every channel and release the cancellation token.
    ///
    /// Keeps going past a channel whose disposal panics.
    pub fn dispose(&mut self) {
        if let Some(cancel) = self.cancel.as_ref().filter(|c| !c.is_cancelled()) {
            cancel.cancel();
        }

        for channel in self.channels.drain(..) {
            let name = channel.name();
            if panic::catch_unwind(AssertUnwindSafe(|| channel.dispose())).is_err() {
                tracing::warn!(channel = name, "Error disposing channel");
            }
        }

        self.cancel = None;
    }
}

impl Drop for ChannelManager {
    fn drop(&mut self) {
        self.dispose();
    }
}

#[cfg(all(test, feature = "pipe", feature = "http"))]
mod tests {
    use std::{
        sync::{
            Mutex,
            atomic::{AtomicBool, AtomicUsize, Ordering},
        },
        time::Duration,
    };

    use async_trait::async_trait;
    use fiend_core::{CommandRequest, ControllerError, NamedPipeSettings, WebServerSettings};
    use fiend_transport::{HttpChannel, LocalStreamChannel, send_request};
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio_test::{assert_err, assert_ok};

    use super::*;

    const TEST_TIMEOUT: Duration = Duration::from_secs(5);

    async fn within<F: Future>(future: F) -> F::Output {
        tokio::time::timeout(TEST_TIMEOUT, future)
            .await
            .expect("exchange timed out")
    }

    /// Counts controller calls; serves fixed image lists.
    #[derive(Default)]
    struct SpyController {
        calls: AtomicUsize,
        current: Mutex<(String, String)>,
    }

    impl SpyController {
        fn hit(&self) {
            self.calls.fetch_add(1, Ordering::SeqCst);
        }

        fn calls(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl TargetController for SpyController {
        async fn load_random(&self) -> Result<(), ControllerError> {
            self.hit();
            *self.current.lock().unwrap() = ("b.png".into(), "x.png".into());
            Ok(())
        }

        async fn set_base(&self, name: &str) -> Result<(), ControllerError> {
            self.hit();
            self.current.lock().unwrap().0 = name.to_string();
            Ok(())
        }

        async fn set_face(&self, name: &str) -> Result<(), ControllerError> {
            self.hit();
            self.current.lock().unwrap().1 = name.to_string();
            Ok(())
        }

        async fn list_bases(&self) -> Result<Vec<String>, ControllerError> {
            self.hit();
            Ok(vec!["a.png".into(), "b.png".into()])
        }

        async fn list_faces(&self) -> Result<Vec<String>, ControllerError> {
            self.hit();
            Ok(vec!["x.png".into()])
        }

        async fn get_current(&self) -> Result<(String, String), ControllerError> {
            self.hit();
            Ok(self.current.lock().unwrap().clone())
        }
    }

    /// Channel double for lifecycle bookkeeping.
    #[derive(Default)]
    struct FakeChannel {
        fail_start: bool,
        panic_on_dispose: bool,
        active: AtomicBool,
        disposed: AtomicUsize,
        stopped: AtomicUsize,
    }

    #[async_trait]
    impl Channel for FakeChannel {
        fn name(&self) -> &'static str {
            "Fake"
        }

        fn is_active(&self) -> bool {
            self.active.load(Ordering::SeqCst)
        }

        fn subscribe(&self, _handler: Arc<dyn MessageHandler>) {}

        async fn start(&self, _cancel: &CancellationToken) -> Result<(), ChannelError> {
            if self.fail_start {
                return Err(ChannelError::TransportUnavailable {
                    endpoint: "fake".into(),
                    source: std::io::Error::from(std::io::ErrorKind::AddrInUse),
                });
            }
            self.active.store(true, Ordering::SeqCst);
            Ok(())
        }

        async fn stop(&self) -> Result<(), ChannelError> {
            self.stopped.fetch_add(1, Ordering::SeqCst);
            self.active.store(false, Ordering::SeqCst);
            Ok(())
        }

        fn dispose(&self) {
            self.disposed.fetch_add(1, Ordering::SeqCst);
            self.active.store(false, Ordering::SeqCst);
            assert!(!self.panic_on_dispose, "dispose failed");
        }
    }

    fn manager(spy: &Arc<SpyController>) -> ChannelManager {
        ChannelManager::new(Arc::clone(spy) as Arc<dyn TargetController>)
    }

    fn unique_pipe() -> String {
        format!("fiend-comms-test-{}", uuid::Uuid::new_v4())
    }

    fn settings(pipe: Option<&str>, web: bool) -> CommunicationSettings {
        CommunicationSettings {
            named_pipe: NamedPipeSettings {
                enabled: pipe.is_some(),
                pipe_name: pipe.unwrap_or_default().to_string(),
            },
            web_server: WebServerSettings {
                enabled: web,
                host: "127.0.0.1".into(),
                port: 0,
            },
        }
    }

    async fn http_exchange(channel: &HttpChannel, request: &str) -> (String, String) {
        let addr = channel.local_addr().unwrap();
        let raw = within(async {
            let mut stream = tokio::net::TcpStream::connect(addr).await.unwrap();
            stream.write_all(request.as_bytes()).await.unwrap();
            let mut raw = String::new();
            stream.read_to_string(&mut raw).await.unwrap();
            raw
        })
        .await;
        let (head, body) = raw.split_once("\r\n\r\n").unwrap();
        (head.to_string(), body.to_string())
    }

    #[tokio::test]
    async fn test_initialize_starts_enabled_channels() {
        let spy = Arc::new(SpyController::default());
        let mut manager = manager(&spy);
        let pipe = unique_pipe();

        let started = manager.initialize(&settings(Some(&pipe), true)).await;

        assert_eq!(started, 2);
        let status = manager.status();
        let names: Vec<_> = status.iter().map(|d| d.name.as_str()).collect();
        assert_eq!(names, ["NamedPipe", "WebServer"]);
        assert!(status.iter().all(|d| d.is_active));

        within(manager.stop_all()).await;
        assert!(manager.status().iter().all(|d| !d.is_active));
        manager.dispose();
    }

    #[tokio::test]
    async fn test_initialize_with_nothing_enabled() {
        let spy = Arc::new(SpyController::default());
        let mut manager = manager(&spy);

        assert_eq!(manager.initialize(&settings(None, false)).await, 0);
        assert!(manager.status().is_empty());
    }

    #[tokio::test]
    async fn test_partial_startup_keeps_healthy_channels() {
        let pipe = unique_pipe();
        let squatter = LocalStreamChannel::new(pipe.clone());
        assert_ok!(squatter.start(&CancellationToken::new()).await);

        let spy = Arc::new(SpyController::default());
        let mut manager = manager(&spy);
        let started = manager.initialize(&settings(Some(&pipe), true)).await;

        assert_eq!(started, 1);
        let status = manager.status();
        assert_eq!(status.len(), 1);
        assert_eq!(status[0].name, "WebServer");
        assert!(status[0].is_active);

        manager.dispose();
        assert_ok!(squatter.stop().await);
    }

    #[tokio::test]
    async fn test_failed_channel_is_disposed_and_untracked() {
        let spy = Arc::new(SpyController::default());
        let mut manager = manager(&spy);
        let broken = Arc::new(FakeChannel {
            fail_start: true,
            ..FakeChannel::default()
        });

        let err = assert_err!(manager.add_channel(broken.clone()).await);

        assert!(matches!(err, ManagerError::Channel(ChannelError::TransportUnavailable { .. })));
        assert_eq!(broken.disposed.load(Ordering::SeqCst), 1);
        assert_eq!(manager.channel_count(), 0);
    }

    #[tokio::test]
    async fn test_dispose_twice_leaves_no_channels() {
        let spy = Arc::new(SpyController::default());
        let mut manager = manager(&spy);
        let fake = Arc::new(FakeChannel::default());
        assert_ok!(manager.add_channel(fake.clone()).await);

        manager.dispose();
        assert!(manager.status().is_empty());
        manager.dispose();
        assert!(manager.status().is_empty());

        assert_eq!(fake.disposed.load(Ordering::SeqCst), 1);
        within(manager.stop_all()).await;
        assert_eq!(fake.stopped.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_dispose_continues_past_failing_channel() {
        let spy = Arc::new(SpyController::default());
        let mut manager = manager(&spy);
        let failing = Arc::new(FakeChannel {
            panic_on_dispose: true,
            ..FakeChannel::default()
        });
        let healthy = Arc::new(FakeChannel::default());
        assert_ok!(manager.add_channel(failing.clone()).await);
        assert_ok!(manager.add_channel(healthy.clone()).await);

        manager.dispose();

        assert_eq!(failing.disposed.load(Ordering::SeqCst), 1);
        assert_eq!(healthy.disposed.load(Ordering::SeqCst), 1);
        assert_eq!(manager.channel_count(), 0);
    }

    #[tokio::test]
    async fn test_add_after_dispose_is_refused() {
        let spy = Arc::new(SpyController::default());
        let mut manager = manager(&spy);
        manager.dispose();

        let fake = Arc::new(FakeChannel::default());
        let err = assert_err!(manager.add_channel(fake.clone()).await);

        assert!(matches!(err, ManagerError::Disposed));
        assert!(!fake.is_active());
    }

    #[tokio::test]
    async fn test_stop_all_stops_every_channel() {
        let spy = Arc::new(SpyController::default());
        let mut manager = manager(&spy);
        let first = Arc::new(FakeChannel::default());
        let second = Arc::new(FakeChannel::default());
        assert_ok!(manager.add_channel(first.clone()).await);
        assert_ok!(manager.add_channel(second.clone()).await);

        within(manager.stop_all()).await;

        assert_eq!(first.stopped.load(Ordering::SeqCst), 1);
        assert_eq!(second.stopped.load(Ordering::SeqCst), 1);
        assert!(manager.status().iter().all(|d| !d.is_active));
    }

    #[tokio::test]
    async fn test_pipe_setface_without_face_image() {
        let spy = Arc::new(SpyController::default());
        let mut manager = manager(&spy);
        let pipe = unique_pipe();
        assert_eq!(manager.initialize(&settings(Some(&pipe), false)).await, 1);

        let response = within(send_request(&pipe, &CommandRequest::new("setface"))).await.unwrap();

        assert!(!response.success);
        assert!(response.message.unwrap().contains("FaceImage"));
        assert_eq!(spy.calls(), 0);

        within(manager.stop_all()).await;
        assert!(within(send_request(&pipe, &CommandRequest::new("status"))).await.is_err());
    }

    #[tokio::test]
    async fn test_pipe_setboth_updates_controller() {
        let spy = Arc::new(SpyController::default());
        let mut manager = manager(&spy);
        let pipe = unique_pipe();
        assert_eq!(manager.initialize(&settings(Some(&pipe), false)).await, 1);

        let request = CommandRequest::new("SETBOTH").base_image("a.png").face_image("x.png");
        let response = within(send_request(&pipe, &request)).await.unwrap();
        assert!(response.success);

        let status = within(send_request(&pipe, &CommandRequest::new("status"))).await.unwrap();
        assert_eq!(status.current_base_image.as_deref(), Some("a.png"));
        assert_eq!(status.current_face_image.as_deref(), Some("x.png"));
        manager.dispose();
    }

    #[tokio::test]
    async fn test_http_get_list() {
        let spy = Arc::new(SpyController::default());
        let mut manager = manager(&spy);
        let channel = Arc::new(HttpChannel::new("127.0.0.1", 0));
        assert_ok!(manager.add_channel(channel.clone()).await);

        let (head, body) = http_exchange(
            &channel,
            "GET /list HTTP/1.1\r\nHost: localhost\r\nConnection: close\r\n\r\n",
        )
        .await;

        assert!(head.starts_with("HTTP/1.1 200"));
        assert!(head.to_ascii_lowercase().contains("content-type: application/json"));
        let json: serde_json::Value = serde_json::from_str(&body).unwrap();
        assert_eq!(
            json,
            serde_json::json!({
                "success": true,
                "message": "Available images",
                "availableBaseImages": ["a.png", "b.png"],
                "availableFaceImages": ["x.png"],
            })
        );
        within(manager.stop_all()).await;
    }

    #[tokio::test]
    async fn test_stop_all_not_blocked_by_stalled_http_client() {
        let spy = Arc::new(SpyController::default());
        let mut manager = manager(&spy);
        let channel =
            Arc::new(HttpChannel::new("127.0.0.1", 0).with_shutdown_grace(Duration::from_millis(100)));
        assert_ok!(manager.add_channel(channel.clone()).await);
        let addr = channel.local_addr().unwrap();

        let mut stalled = tokio::net::TcpStream::connect(addr).await.unwrap();
        stalled.write_all(b"POST / HTTP/1.1\r\nContent-Le").await.unwrap();
        tokio::time::sleep(Duration::from_millis(50)).await;

        within(manager.stop_all()).await;

        assert!(manager.status().iter().all(|d| !d.is_active));
        assert_eq!(spy.calls(), 0);
        drop(stalled);
    }

    #[tokio::test]
    async fn test_http_options_never_reaches_controller() {
        let spy = Arc::new(SpyController::default());
        let mut manager = manager(&spy);
        let channel = Arc::new(HttpChannel::new("127.0.0.1", 0));
        assert_ok!(manager.add_channel(channel.clone()).await);

        let (head, body) = http_exchange(
            &channel,
            "OPTIONS / HTTP/1.1\r\nHost: localhost\r\nConnection: close\r\n\r\n",
        )
        .await;

        assert!(head.starts_with("HTTP/1.1 200"));
        let head = head.to_ascii_lowercase();
        assert!(head.contains("access-control-allow-origin: *"));
        assert!(head.contains("access-control-allow-methods: get, post, options"));
        assert!(head.contains("access-control-allow-headers: content-type"));
        assert!(body.is_empty());
        assert_eq!(spy.calls(), 0);
        manager.dispose();
    }

    #[tokio::test]
    async fn test_http_post_unknown_command() {
        let spy = Arc::new(SpyController::default());
        let mut manager = manager(&spy);
        let channel = Arc::new(HttpChannel::new("127.0.0.1", 0));
        assert_ok!(manager.add_channel(channel.clone()).await);

        let payload = r#"{"command":"Teleport"}"#;
        let request = format!(
            "POST / HTTP/1.1\r\nHost: localhost\r\nContent-Type: application/json\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{payload}",
            payload.len()
        );
        let (head, body) = http_exchange(&channel, &request).await;

        assert!(head.starts_with("HTTP/1.1 200"));
        let json: serde_json::Value = serde_json::from_str(&body).unwrap();
        assert_eq!(json["success"], false);
        assert_eq!(json["message"], "Unknown command: Teleport");
        manager.dispose();
    }
}
