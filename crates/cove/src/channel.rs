//! Voice channel orchestration. Each channel runs one actor task that owns
//! the peer registry and the transport connection; timers, media-session
//! events and inbound signaling all funnel into its command queue, so peer
//! state is never mutated concurrently.

use std::sync::Arc;
use std::time::Duration;

use serde_json::Value;
use signal_bus::{BusConnection, BusEvent, BusMessage};
use tokio::sync::{mpsc, oneshot};
use uuid::Uuid;

use crate::config::EngineConfig;
use crate::context::SessionContext;
use crate::error::EngineError;
use crate::identity::ClientId;
use crate::media::SessionEvent;
use crate::peer::{LobbyEntry, PeerRegistry, StreamDirection};
use crate::protocol::SignalPayload;

/// Voice-activity notification for a remote client.
#[derive(Debug, Clone)]
pub struct TalkEvent {
    pub user: String,
    pub clientid: ClientId,
    pub talking: bool,
}

/// Opaque application payload from a remote client.
#[derive(Debug, Clone)]
pub struct DataPacketEvent {
    pub user: String,
    pub clientid: ClientId,
    pub data: Value,
}

/// Observer interface for the hosting application. All methods default to
/// no-ops so embedders implement only what they render.
pub trait ChannelEvents: Send + Sync {
    fn on_talk(&self, _event: TalkEvent) {}
    fn on_clients_change(&self, _lobby: &[LobbyEntry]) {}
    fn on_data_packet(&self, _event: DataPacketEvent) {}
}

/// No-op observer for channels nobody is watching.
pub struct NullEvents;

impl ChannelEvents for NullEvents {}

#[derive(Debug, Clone)]
pub struct ChannelOptions {
    /// Channel id; generated when absent.
    pub id: Option<String>,
    /// Signaling topic; derived from the id when absent.
    pub channel: Option<String>,
    /// Local display name; defaults to the client id.
    pub username: Option<String>,
    /// Signaling server address. Required.
    pub signaling_server: Option<String>,
    /// Playback gain applied to new peers.
    pub volume: f32,
}

impl Default for ChannelOptions {
    fn default() -> Self {
        Self {
            id: None,
            channel: None,
            username: None,
            signaling_server: None,
            volume: 1.0,
        }
    }
}

pub(crate) enum ChannelCmd {
    Bus(BusEvent),
    Session {
        peer: ClientId,
        direction: StreamDirection,
        event: SessionEvent,
    },
    NegotiationTimeout(ClientId),
    PlaybackCheck(ClientId),
    TrackAttachRetry {
        peer: ClientId,
        attempt: u32,
    },
    AnnouncePresence,
    Ping,
    Talking(bool),
    SendData(Value),
    SetVolume(f32),
    Shutdown(oneshot::Sender<()>),
}

/// Public handle to a running channel. Cheap to clone; all mutation goes
/// through the actor's queue.
#[derive(Clone)]
pub struct VoiceChannel {
    id: String,
    signal_channel: String,
    username: String,
    ctx: Arc<SessionContext>,
    cmd_tx: mpsc::UnboundedSender<ChannelCmd>,
    lobby: Arc<parking_lot::RwLock<Vec<LobbyEntry>>>,
}

impl VoiceChannel {
    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn signal_channel(&self) -> &str {
        &self.signal_channel
    }

    pub fn username(&self) -> &str {
        &self.username
    }

    /// Mute control is process-wide: one capture stream serves every channel.
    pub async fn set_mute(&self, muted: bool) -> Result<(), EngineError> {
        self.ctx.set_mute(muted).await
    }

    pub fn is_muted(&self) -> bool {
        self.ctx.is_muted()
    }

    /// Send an opaque payload to every peer in the channel.
    pub fn send_data_packet(&self, packet: Value) {
        let _ = self.cmd_tx.send(ChannelCmd::SendData(packet));
    }

    /// Playback gain for peers connected after this call.
    pub fn set_volume(&self, volume: f32) {
        let _ = self.cmd_tx.send(ChannelCmd::SetVolume(volume));
    }

    /// Ordered lobby listing: the local client first, then one entry per
    /// known peer.
    pub fn lobby_listing(&self) -> Vec<LobbyEntry> {
        self.lobby.read().clone()
    }

    /// Emit a leave notice, close the transport, and tear down every peer.
    pub async fn shutdown(&self) {
        let (ack_tx, ack_rx) = oneshot::channel();
        if self.cmd_tx.send(ChannelCmd::Shutdown(ack_tx)).is_ok() {
            let _ = ack_rx.await;
        }
    }
}

pub(crate) struct ChannelActor {
    pub(crate) ctx: Arc<SessionContext>,
    pub(crate) id: String,
    pub(crate) signal_channel: String,
    pub(crate) username: String,
    pub(crate) volume: f32,
    pub(crate) conn: Option<Arc<dyn BusConnection>>,
    pub(crate) registry: PeerRegistry,
    pub(crate) observer: Arc<dyn ChannelEvents>,
    pub(crate) lobby: Arc<parking_lot::RwLock<Vec<LobbyEntry>>>,
    pub(crate) cmd_tx: mpsc::UnboundedSender<ChannelCmd>,
    pub(crate) ping_task: Option<tokio::task::JoinHandle<()>>,
}

pub(crate) fn spawn_channel(
    ctx: Arc<SessionContext>,
    options: ChannelOptions,
    observer: Arc<dyn ChannelEvents>,
) -> Result<VoiceChannel, EngineError> {
    let address = options
        .signaling_server
        .filter(|a| !a.trim().is_empty())
        .ok_or_else(|| EngineError::Config("a signaling server address is required".into()))?;

    let id = options.id.unwrap_or_else(|| Uuid::new_v4().to_string());
    let signal_channel = options.channel.unwrap_or_else(|| format!("aa-vch-{id}"));
    let username = options
        .username
        .unwrap_or_else(|| ctx.client_id().to_string());

    let (cmd_tx, cmd_rx) = mpsc::unbounded_channel();
    let lobby = Arc::new(parking_lot::RwLock::new(vec![LobbyEntry {
        client: ctx.client_id().clone(),
        username: username.clone(),
    }]));

    let actor = ChannelActor {
        ctx: ctx.clone(),
        id: id.clone(),
        signal_channel: signal_channel.clone(),
        username: username.clone(),
        volume: options.volume,
        conn: None,
        registry: PeerRegistry::new(),
        observer,
        lobby: lobby.clone(),
        cmd_tx: cmd_tx.clone(),
        ping_task: None,
    };
    ctx.register_channel(&id, cmd_tx.clone());
    tokio::spawn(actor.run(cmd_rx, address));

    Ok(VoiceChannel {
        id,
        signal_channel,
        username,
        ctx,
        cmd_tx,
        lobby,
    })
}

impl ChannelActor {
    pub(crate) fn config(&self) -> &EngineConfig {
        self.ctx.config()
    }

    async fn run(mut self, mut cmd_rx: mpsc::UnboundedReceiver<ChannelCmd>, address: String) {
        let conn = match self.ctx.connector().connect(&address).await {
            Ok(conn) => conn,
            Err(err) => {
                tracing::error!(channel = %self.id, error = %err, "signaling connect failed");
                self.ctx.remove_channel(&self.id);
                return;
            }
        };
        let Some(mut events) = conn.take_events() else {
            tracing::error!(channel = %self.id, "signaling connection has no event stream");
            self.ctx.remove_channel(&self.id);
            return;
        };
        self.conn = Some(conn);

        let pump_tx = self.cmd_tx.clone();
        let pump = tokio::spawn(async move {
            while let Some(event) = events.recv().await {
                if pump_tx.send(ChannelCmd::Bus(event)).is_err() {
                    break;
                }
            }
        });

        while let Some(cmd) = cmd_rx.recv().await {
            if self.handle_cmd(cmd).await {
                break;
            }
        }
        pump.abort();
    }

    /// Returns true once the channel has shut down.
    async fn handle_cmd(&mut self, cmd: ChannelCmd) -> bool {
        match cmd {
            ChannelCmd::Bus(BusEvent::Connected) => self.on_transport_connect(),
            ChannelCmd::Bus(BusEvent::Disconnected) => {
                tracing::debug!(channel = %self.id, "signaling transport disconnected");
            }
            ChannelCmd::Bus(BusEvent::Message(message)) => {
                self.on_signal_message(message).await;
            }
            ChannelCmd::Session {
                peer,
                direction,
                event,
            } => self.handle_session_event(peer, direction, event).await,
            ChannelCmd::NegotiationTimeout(peer) => self.handle_negotiation_timeout(&peer),
            ChannelCmd::PlaybackCheck(peer) => self.handle_playback_check(peer),
            ChannelCmd::TrackAttachRetry { peer, attempt } => {
                self.attach_capture_tracks(peer, attempt).await;
            }
            ChannelCmd::AnnouncePresence => self.announce_active(),
            ChannelCmd::Ping => {
                self.ping_channel();
                self.recompute_lobby();
            }
            ChannelCmd::Talking(talking) => {
                self.publish(SignalPayload::IsTalking {
                    s: talking,
                    u: self.username.clone(),
                    c: self.ctx.client_id().clone(),
                });
            }
            ChannelCmd::SendData(packet) => {
                self.publish(SignalPayload::DataPacket {
                    d: packet,
                    u: self.username.clone(),
                    c: self.ctx.client_id().clone(),
                });
            }
            ChannelCmd::SetVolume(volume) => self.volume = volume,
            ChannelCmd::Shutdown(ack) => {
                self.shutdown().await;
                let _ = ack.send(());
                return true;
            }
        }
        false
    }

    async fn on_signal_message(&mut self, message: BusMessage) {
        if message.destination != self.signal_channel {
            return;
        }
        let payload: SignalPayload = match serde_json::from_value(message.msg) {
            Ok(payload) => payload,
            Err(err) => {
                tracing::debug!(channel = %self.id, error = %err, "ignoring malformed signal");
                return;
            }
        };
        // Loop suppression: the shared topic echoes our own messages back.
        if payload.sender() == Some(self.ctx.client_id()) {
            return;
        }
        self.dispatch(payload).await;
    }

    async fn dispatch(&mut self, payload: SignalPayload) {
        let local = self.ctx.client_id().clone();
        tracing::trace!(channel = %self.id, kind = payload.kind(), "inbound signal");
        match payload {
            SignalPayload::DataPacket { d, u, c } => {
                self.observer.on_data_packet(DataPacketEvent {
                    user: u,
                    clientid: c,
                    data: d,
                });
            }
            SignalPayload::IsTalking { s, u, c } => {
                // Talking peers are bootstrapped like announcing ones.
                self.check_connection(&c, Some(&u)).await;
                self.observer.on_talk(TalkEvent {
                    user: u,
                    clientid: c,
                    talking: s,
                });
            }
            SignalPayload::DoPing => self.announce_active(),
            SignalPayload::ImActive { c, u } => {
                self.check_connection(&c, Some(&u)).await;
            }
            SignalPayload::StreamReq { c, u, p } => {
                if p == local {
                    self.handle_stream_request(c, &u).await;
                }
            }
            SignalPayload::RtcOffer { fc, fp, o } => {
                if fc == local {
                    self.handle_offer(fp, o).await;
                }
            }
            SignalPayload::IceCand { fc, fp, i } => {
                if fc == local {
                    self.apply_candidate(fp, StreamDirection::Incoming, i).await;
                }
            }
            SignalPayload::RtcAns { c, fc, a } => {
                if fc == local {
                    self.handle_answer(c, a).await;
                }
            }
            SignalPayload::CliIce { c, fc, i } => {
                if fc == local {
                    self.apply_candidate(c, StreamDirection::Outgoing, i).await;
                }
            }
            SignalPayload::Disconnecting { c, .. } => {
                self.close_peer(&c, true).await;
            }
        }
    }

    pub(crate) fn publish(&self, payload: SignalPayload) {
        let Some(conn) = &self.conn else {
            return;
        };
        let msg = match serde_json::to_value(&payload) {
            Ok(msg) => msg,
            Err(err) => {
                tracing::warn!(channel = %self.id, error = %err, "failed to encode signal");
                return;
            }
        };
        if let Err(err) = conn.publish(BusMessage {
            destination: self.signal_channel.clone(),
            msg,
        }) {
            tracing::debug!(channel = %self.id, error = %err, "publish failed");
        }
    }

    pub(crate) fn schedule(&self, delay: Duration, cmd: ChannelCmd) {
        let tx = self.cmd_tx.clone();
        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            let _ = tx.send(cmd);
        });
    }

    async fn shutdown(&mut self) {
        tracing::debug!(channel = %self.id, peers = self.registry.len(), "channel shutdown");
        self.publish(SignalPayload::Disconnecting {
            u: self.username.clone(),
            c: self.ctx.client_id().clone(),
        });
        if let Some(task) = self.ping_task.take() {
            task.abort();
        }
        if let Some(conn) = self.conn.take() {
            conn.close();
        }
        for mut peer in self.registry.drain() {
            peer.teardown().await;
        }
        self.ctx.remove_channel(&self.id);
    }
}
