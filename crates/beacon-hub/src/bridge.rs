//! Notification bridge.
//!
//! Holds one dedicated listening connection per notification channel,
//! decodes payloads into [`ChangeEvent`]s and hands them to a sink. A lost
//! connection is retried with exponential backoff until the bridge is
//! stopped. Notifications sent while disconnected are lost; the sink is told
//! about every (re)connect so it can catch up from the store.

use async_trait::async_trait;
use beacon_config::ReconnectConfig;
use beacon_core::{ChangeEvent, ChangeKind};
use beacon_db::NotificationSource;
use futures::StreamExt;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::sleep;
use tracing::{debug, info, warn};

use crate::backoff::Backoff;

/// Connection state of a bridge.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BridgeState {
    Disconnected,
    Connecting,
    Connected,
    Stopped,
}

impl BridgeState {
    pub fn as_str(&self) -> &'static str {
        match self {
            BridgeState::Disconnected => "disconnected",
            BridgeState::Connecting => "connecting",
            BridgeState::Connected => "connected",
            BridgeState::Stopped => "stopped",
        }
    }
}

/// Receives decoded change events.
#[async_trait]
pub trait ChangeSink: Send + Sync + 'static {
    async fn deliver(&self, event: ChangeEvent);

    /// The bridge for `kind` is listening again.
    fn connected(&self, _kind: ChangeKind) {}
}

/// Listens on one notification channel and forwards its events.
pub struct NotificationBridge {
    kind: ChangeKind,
    channel: String,
    source: Arc<dyn NotificationSource>,
    sink: Arc<dyn ChangeSink>,
    reconnect: ReconnectConfig,
    running: AtomicBool,
    state: watch::Sender<BridgeState>,
    stop: watch::Sender<bool>,
}

impl NotificationBridge {
    pub fn new(
        kind: ChangeKind,
        channel: impl Into<String>,
        source: Arc<dyn NotificationSource>,
        sink: Arc<dyn ChangeSink>,
        reconnect: ReconnectConfig,
    ) -> Arc<Self> {
        Arc::new(Self {
            kind,
            channel: channel.into(),
            source,
            sink,
            reconnect,
            running: AtomicBool::new(false),
            state: watch::channel(BridgeState::Disconnected).0,
            stop: watch::channel(false).0,
        })
    }

    /// Start the listen loop. Returns `None` if it is already running.
    pub fn start(self: &Arc<Self>) -> Option<JoinHandle<()>> {
        if self
            .running
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            debug!(channel = %self.channel, "Bridge already running");
            return None;
        }
        self.stop.send_replace(false);
        Some(tokio::spawn(self.clone().run()))
    }

    /// Ask the listen loop to exit.
    pub fn stop(&self) {
        self.stop.send_replace(true);
    }

    pub fn state(&self) -> BridgeState {
        *self.state.borrow()
    }

    pub fn watch_state(&self) -> watch::Receiver<BridgeState> {
        self.state.subscribe()
    }

    pub fn channel(&self) -> &str {
        &self.channel
    }

    async fn run(self: Arc<Self>) {
        info!(channel = %self.channel, kind = ?self.kind, "Starting notification bridge");
        let mut stop = self.stop.subscribe();
        let mut backoff = Backoff::new(&self.reconnect);

        'connect: loop {
            self.state.send_replace(BridgeState::Disconnected);
            let delay = backoff.next_delay();
            debug!(channel = %self.channel, delay_ms = delay.as_millis() as u64, "Waiting before connect");
            tokio::select! {
                _ = sleep(delay) => {}
                _ = stop.wait_for(|stopped| *stopped) => break 'connect,
            }

            self.state.send_replace(BridgeState::Connecting);
            let connected = tokio::select! {
                result = self.source.connect(&self.channel) => result,
                _ = stop.wait_for(|stopped| *stopped) => break 'connect,
            };
            let mut notifications = match connected {
                Ok(stream) => stream,
                Err(e) => {
                    warn!(channel = %self.channel, error = %e, "Failed to listen for notifications");
                    continue;
                }
            };

            self.state.send_replace(BridgeState::Connected);
            backoff.reset();
            info!(channel = %self.channel, "Listening for notifications");
            self.sink.connected(self.kind);

            loop {
                tokio::select! {
                    next = notifications.next() => match next {
                        Some(Ok(payload)) => self.dispatch(&payload).await,
                        Some(Err(e)) => {
                            warn!(channel = %self.channel, error = %e, "Notification connection failed");
                            continue 'connect;
                        }
                        None => {
                            warn!(channel = %self.channel, "Notification connection lost");
                            continue 'connect;
                        }
                    },
                    _ = async { let _ = stop.wait_for(|stopped| *stopped).await; } => break 'connect,
                }
            }
        }

        self.state.send_replace(BridgeState::Stopped);
        self.running.store(false, Ordering::Release);
        info!(channel = %self.channel, "Notification bridge stopped");
    }

    async fn dispatch(&self, payload: &str) {
        match ChangeEvent::decode(self.kind, payload) {
            Ok(event) => self.sink.deliver(event).await,
            Err(e) => {
                warn!(channel = %self.channel, error = %e, "Dropping malformed notification");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::ScriptedSource;
    use beacon_core::ChangePayload;
    use parking_lot::Mutex;
    use std::sync::atomic::AtomicUsize;
    use std::time::Duration;

    #[derive(Default)]
    struct Collect {
        events: Mutex<Vec<ChangeEvent>>,
        connected: AtomicUsize,
    }

    #[async_trait]
    impl ChangeSink for Collect {
        async fn deliver(&self, event: ChangeEvent) {
            self.events.lock().push(event);
        }

        fn connected(&self, _kind: ChangeKind) {
            self.connected.fetch_add(1, Ordering::SeqCst);
        }
    }

    fn fast() -> ReconnectConfig {
        ReconnectConfig {
            initial_delay: Duration::from_millis(1),
            max_delay: Duration::from_millis(4),
            multiplier: 2.0,
            jitter: 0.0,
        }
    }

    fn chunk(id: i64) -> String {
        format!(r#"{{"id": {id}, "job_id": 1, "data": "line {id}\n"}}"#)
    }

    #[tokio::test]
    async fn test_forwards_events_and_reconnects() {
        let source = Arc::new(ScriptedSource::default());
        source.push_failure("beacon_console");
        source.push_session("beacon_console", vec![chunk(1), "not json".to_string()]);
        source.push_session("beacon_console", vec![chunk(2)]);

        let sink = Arc::new(Collect::default());
        let bridge = NotificationBridge::new(
            ChangeKind::ConsoleUpdate,
            "beacon_console",
            source.clone(),
            sink.clone(),
            fast(),
        );
        let handle = bridge.start().unwrap();
        assert!(bridge.start().is_none());

        tokio::time::timeout(Duration::from_secs(5), async {
            while sink.events.lock().len() < 2 {
                sleep(Duration::from_millis(1)).await;
            }
        })
        .await
        .unwrap();

        let ids: Vec<i64> = sink
            .events
            .lock()
            .iter()
            .map(|event| match &event.payload {
                ChangePayload::Console(chunk) => chunk.id,
                other => panic!("unexpected payload {other:?}"),
            })
            .collect();
        assert_eq!(ids, vec![1, 2]);
        assert!(source.connects() >= 3);
        assert!(sink.connected.load(Ordering::SeqCst) >= 2);

        bridge.stop();
        handle.await.unwrap();
        assert_eq!(bridge.state(), BridgeState::Stopped);
        assert!(bridge.start().is_some());
        bridge.stop();
    }

    #[tokio::test]
    async fn test_reports_connected() {
        let source = Arc::new(ScriptedSource::default());
        let bridge = NotificationBridge::new(
            ChangeKind::JobUpdate,
            "beacon_jobs",
            source,
            Arc::new(Collect::default()),
            fast(),
        );
        let mut state = bridge.watch_state();
        let handle = bridge.start().unwrap();

        tokio::time::timeout(
            Duration::from_secs(5),
            state.wait_for(|s| *s == BridgeState::Connected),
        )
        .await
        .unwrap()
        .unwrap();

        bridge.stop();
        handle.await.unwrap();
    }
}
