//! Process-wide session state: client identity, the shared capture stream,
//! the talking flags, and the set of live channels. One context per
//! process, with explicit init and teardown.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tokio::sync::{mpsc, oneshot};

use crate::activity::{self, AnalysisSource};
use crate::capture::{CaptureDevice, CaptureManager};
use crate::channel::{spawn_channel, ChannelCmd, ChannelEvents, ChannelOptions, VoiceChannel};
use crate::config::EngineConfig;
use crate::error::EngineError;
use crate::identity::{ensure_identity, ClientId, IdentityStore};
use crate::media::MediaEngine;
use crate::playback::PlaybackFactory;
use crate::signaling::SignalingConnector;

/// Everything the engine needs from its host: persistence, signaling,
/// media, capture, and playback backends.
pub struct EngineDeps {
    pub config: EngineConfig,
    pub identity: Arc<dyn IdentityStore>,
    pub connector: Arc<dyn SignalingConnector>,
    pub media: Arc<dyn MediaEngine>,
    pub capture: Arc<dyn CaptureDevice>,
    pub playback: Arc<dyn PlaybackFactory>,
}

pub struct SessionContext {
    config: EngineConfig,
    client_id: ClientId,
    connector: Arc<dyn SignalingConnector>,
    media: Arc<dyn MediaEngine>,
    playback: Arc<dyn PlaybackFactory>,
    capture: CaptureManager,
    channels: parking_lot::RwLock<HashMap<String, mpsc::UnboundedSender<ChannelCmd>>>,
    talking: AtomicBool,
    /// Set the first time presence is announced with live capture; gates
    /// answering stream requests.
    has_talked: AtomicBool,
    monitor: parking_lot::Mutex<Option<tokio::task::JoinHandle<()>>>,
}

impl SessionContext {
    pub fn new(deps: EngineDeps) -> Arc<Self> {
        let client_id = ensure_identity(deps.identity.as_ref());
        tracing::info!(client_id = %client_id, "session context initialized");
        Arc::new(Self {
            config: deps.config,
            client_id,
            connector: deps.connector,
            media: deps.media,
            playback: deps.playback,
            capture: CaptureManager::new(deps.capture),
            channels: parking_lot::RwLock::new(HashMap::new()),
            talking: AtomicBool::new(false),
            has_talked: AtomicBool::new(false),
            monitor: parking_lot::Mutex::new(None),
        })
    }

    pub fn client_id(&self) -> &ClientId {
        &self.client_id
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Create a channel with a fresh topic derived from its id.
    pub fn create_channel(
        self: &Arc<Self>,
        options: ChannelOptions,
        observer: Arc<dyn ChannelEvents>,
    ) -> Result<VoiceChannel, EngineError> {
        spawn_channel(self.clone(), options, observer)
    }

    /// Join an existing named channel.
    pub fn join_channel(
        self: &Arc<Self>,
        channel: &str,
        mut options: ChannelOptions,
        observer: Arc<dyn ChannelEvents>,
    ) -> Result<VoiceChannel, EngineError> {
        options.channel = Some(channel.to_string());
        spawn_channel(self.clone(), options, observer)
    }

    /// Process-wide mute control. Unmuting acquires capture if needed and
    /// re-announces presence on every channel, since becoming audible is
    /// what makes peers start streaming to us.
    pub async fn set_mute(&self, muted: bool) -> Result<(), EngineError> {
        self.capture.set_mute(muted).await?;
        if !muted {
            self.send_all(|| ChannelCmd::AnnouncePresence);
        }
        Ok(())
    }

    pub fn is_muted(&self) -> bool {
        self.capture.is_muted()
    }

    pub fn is_talking(&self) -> bool {
        self.talking.load(Ordering::SeqCst)
    }

    /// Start the voice-activity monitor over the given analysis source.
    /// Replaces any previous monitor.
    pub fn start_monitor(self: &Arc<Self>, source: Arc<dyn AnalysisSource>) {
        let task = activity::spawn_monitor(self.clone(), source);
        if let Some(previous) = self.monitor.lock().replace(task) {
            previous.abort();
        }
    }

    /// Shut down every channel and stop the monitor.
    pub async fn teardown(&self) {
        if let Some(monitor) = self.monitor.lock().take() {
            monitor.abort();
        }
        let senders: Vec<_> = self
            .channels
            .write()
            .drain()
            .map(|(_, sender)| sender)
            .collect();
        for sender in senders {
            let (ack_tx, ack_rx) = oneshot::channel();
            if sender.send(ChannelCmd::Shutdown(ack_tx)).is_ok() {
                let _ = ack_rx.await;
            }
        }
    }

    pub(crate) fn connector(&self) -> &Arc<dyn SignalingConnector> {
        &self.connector
    }

    pub(crate) fn media(&self) -> &Arc<dyn MediaEngine> {
        &self.media
    }

    pub(crate) fn playback(&self) -> &Arc<dyn PlaybackFactory> {
        &self.playback
    }

    /// The process-wide capture manager, exposed so embedders can inspect or
    /// invalidate the shared stream.
    pub fn capture(&self) -> &CaptureManager {
        &self.capture
    }

    pub(crate) fn capture_ready(&self) -> bool {
        self.capture.has_live_stream()
    }

    pub fn has_talked(&self) -> bool {
        self.has_talked.load(Ordering::SeqCst)
    }

    pub(crate) fn mark_talked(&self) {
        self.has_talked.store(true, Ordering::SeqCst);
    }

    /// Report a local voice-activity transition to every channel.
    pub(crate) fn broadcast_talking(&self, talking: bool) {
        self.talking.store(talking, Ordering::SeqCst);
        self.send_all(|| ChannelCmd::Talking(talking));
    }

    pub(crate) fn register_channel(&self, id: &str, sender: mpsc::UnboundedSender<ChannelCmd>) {
        self.channels.write().insert(id.to_string(), sender);
    }

    pub(crate) fn remove_channel(&self, id: &str) {
        self.channels.write().remove(id);
    }

    pub fn channel_count(&self) -> usize {
        self.channels.read().len()
    }

    fn send_all(&self, make: impl Fn() -> ChannelCmd) {
        for sender in self.channels.read().values() {
            let _ = sender.send(make());
        }
    }
}
