//! Presence: announce on join, ping on a timer, re-announce on ping receipt
//! so newly joined or recovering peers are rediscovered without waiting a
//! full period.

use crate::channel::{ChannelActor, ChannelCmd};
use crate::peer::LobbyEntry;
use crate::protocol::SignalPayload;

impl ChannelActor {
    pub(crate) fn on_transport_connect(&mut self) {
        tracing::debug!(channel = %self.id, topic = %self.signal_channel, "signaling transport connected");
        if let Some(conn) = &self.conn {
            if let Err(err) = conn.join_topic(&self.signal_channel) {
                tracing::error!(channel = %self.id, error = %err, "failed to join signaling topic");
                return;
            }
        }
        self.schedule(self.config().announce_delay, ChannelCmd::AnnouncePresence);
        self.schedule(self.config().first_ping_delay, ChannelCmd::Ping);
        if self.ping_task.is_none() {
            let tx = self.cmd_tx.clone();
            let period = self.config().ping_interval;
            self.ping_task = Some(tokio::spawn(async move {
                let mut ticker = tokio::time::interval(period);
                // The interval fires immediately; the first ping is already
                // scheduled separately.
                ticker.tick().await;
                loop {
                    ticker.tick().await;
                    if tx.send(ChannelCmd::Ping).is_err() {
                        break;
                    }
                }
            }));
        }
        self.recompute_lobby();
    }

    /// Announce presence. Only meaningful once capture is live; announcing
    /// is also what opens the gate for answering stream requests.
    pub(crate) fn announce_active(&mut self) {
        if !self.ctx.capture_ready() {
            return;
        }
        self.ctx.mark_talked();
        self.publish(SignalPayload::ImActive {
            c: self.ctx.client_id().clone(),
            u: self.username.clone(),
        });
        self.recompute_lobby();
    }

    pub(crate) fn ping_channel(&mut self) {
        self.publish(SignalPayload::DoPing);
        self.announce_active();
    }

    pub(crate) fn recompute_lobby(&mut self) {
        let local = LobbyEntry {
            client: self.ctx.client_id().clone(),
            username: self.username.clone(),
        };
        *self.lobby.write() = self.registry.lobby_listing(local);
    }

    pub(crate) fn notify_clients_change(&mut self) {
        self.recompute_lobby();
        let listing = self.lobby.read().clone();
        self.observer.on_clients_change(&listing);
    }
}
