#![allow(dead_code)]

use std::sync::Arc;
use std::time::Duration;

use serde_json::Value;
use signal_bus::{BusConnection, BusEvent, BusMessage, LocalHub};
use tokio::time::sleep;

use cove::channel::{ChannelEvents, ChannelOptions, DataPacketEvent, TalkEvent, VoiceChannel};
use cove::config::EngineConfig;
use cove::context::{EngineDeps, SessionContext};
use cove::identity::MemoryIdentityStore;
use cove::media::mock::MockMediaEngine;
use cove::mock::{MockCaptureDevice, MockPlaybackFactory};
use cove::signaling::LocalConnector;

/// Engine config with timers shrunk so tests settle in tens of
/// milliseconds instead of seconds.
pub fn fast_config() -> EngineConfig {
    EngineConfig {
        announce_delay: Duration::from_millis(10),
        first_ping_delay: Duration::from_millis(20),
        ping_interval: Duration::from_millis(250),
        negotiation_timeout: Duration::from_millis(500),
        playback_retry_delay: Duration::from_millis(20),
        track_retry_delay: Duration::from_millis(20),
        monitor_interval: Duration::from_millis(10),
        ..EngineConfig::default()
    }
}

pub struct TestClient {
    pub ctx: Arc<SessionContext>,
    pub media: Arc<MockMediaEngine>,
    pub capture: Arc<MockCaptureDevice>,
    pub playback: Arc<MockPlaybackFactory>,
}

impl TestClient {
    pub fn new(hub: &Arc<LocalHub>, id: &str) -> Self {
        let _ = tracing_subscriber::fmt()
            .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
            .with_test_writer()
            .try_init();
        let media = MockMediaEngine::new();
        let capture = MockCaptureDevice::new(1);
        let playback = MockPlaybackFactory::new();
        let ctx = SessionContext::new(EngineDeps {
            config: fast_config(),
            identity: Arc::new(MemoryIdentityStore::preset(id)),
            connector: Arc::new(LocalConnector::new(hub.clone())),
            media: media.clone(),
            capture: capture.clone(),
            playback: playback.clone(),
        });
        Self {
            ctx,
            media,
            capture,
            playback,
        }
    }

    pub fn join(
        &self,
        channel: &str,
        username: &str,
        observer: Arc<dyn ChannelEvents>,
    ) -> VoiceChannel {
        let options = ChannelOptions {
            username: Some(username.to_string()),
            signaling_server: Some("local".to_string()),
            ..Default::default()
        };
        self.ctx
            .join_channel(channel, options, observer)
            .expect("join channel")
    }
}

/// Observer that records everything it is told.
#[derive(Default)]
pub struct RecordingEvents {
    pub talks: parking_lot::Mutex<Vec<TalkEvent>>,
    pub packets: parking_lot::Mutex<Vec<DataPacketEvent>>,
    pub lobby_changes: parking_lot::Mutex<usize>,
}

impl RecordingEvents {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }
}

impl ChannelEvents for RecordingEvents {
    fn on_talk(&self, event: TalkEvent) {
        self.talks.lock().push(event);
    }

    fn on_data_packet(&self, event: DataPacketEvent) {
        self.packets.lock().push(event);
    }

    fn on_clients_change(&self, _lobby: &[cove::peer::LobbyEntry]) {
        *self.lobby_changes.lock() += 1;
    }
}

/// A bare hub connection posing as a remote peer: injects raw signaling
/// payloads and records everything published on the topic.
pub struct Probe {
    conn: Arc<signal_bus::LocalConnection>,
    topic: String,
    seen: Arc<parking_lot::Mutex<Vec<Value>>>,
}

impl Probe {
    pub fn new(hub: &Arc<LocalHub>, topic: &str) -> Self {
        let conn = hub.connect();
        conn.join_topic(topic).expect("join topic");
        let seen = Arc::new(parking_lot::Mutex::new(Vec::new()));
        let collector = seen.clone();
        let mut events = conn.take_events().expect("probe events");
        tokio::spawn(async move {
            while let Some(event) = events.recv().await {
                if let BusEvent::Message(message) = event {
                    collector.lock().push(message.msg);
                }
            }
        });
        Self {
            conn,
            topic: topic.to_string(),
            seen,
        }
    }

    pub fn publish(&self, msg: Value) {
        self.conn
            .publish(BusMessage {
                destination: self.topic.clone(),
                msg,
            })
            .expect("probe publish");
    }

    pub fn seen(&self) -> Vec<Value> {
        self.seen.lock().clone()
    }

    /// Messages of one wire kind sent by one client.
    pub fn seen_from(&self, kind: &str, sender: &str) -> Vec<Value> {
        self.seen()
            .into_iter()
            .filter(|m| m["m"] == kind && (m["c"] == sender || m["fp"] == sender))
            .collect()
    }
}

pub async fn wait_for(what: &str, cond: impl Fn() -> bool) {
    for _ in 0..300 {
        if cond() {
            return;
        }
        sleep(Duration::from_millis(10)).await;
    }
    panic!("timed out waiting for {what}");
}

pub async fn settle() {
    sleep(Duration::from_millis(100)).await;
}
