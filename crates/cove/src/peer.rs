//! Peer records and the per-channel registry.

use std::collections::HashMap;
use std::sync::Arc;

use serde::Serialize;

use crate::identity::ClientId;
use crate::media::MediaSession;
use crate::playback::PlaybackSink;
use crate::protocol::IceCandidate;

/// Candidates buffered while their target session (or its remote
/// description) does not exist yet. Bounded so a misbehaving peer cannot
/// grow the buffer without limit.
pub(crate) const MAX_PENDING_CANDIDATES: usize = 64;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamDirection {
    /// This process is the media source.
    Outgoing,
    /// This process is the media sink.
    Incoming,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NegotiationState {
    Unknown,
    AwaitingStreamRequest,
    Offering,
    AwaitingAnswer,
    Answering,
    Connected,
    Closed,
}

/// One direction of a peer's media link: the session object, its event
/// forwarder, whether the remote description has been applied (candidates
/// gate on that), and candidates held back until it has.
pub struct PeerSession {
    pub session: Arc<dyn MediaSession>,
    pub remote_ready: bool,
    pub pending_candidates: Vec<IceCandidate>,
    forwarder: tokio::task::JoinHandle<()>,
}

impl PeerSession {
    pub fn new(session: Arc<dyn MediaSession>, forwarder: tokio::task::JoinHandle<()>) -> Self {
        Self {
            session,
            remote_ready: false,
            pending_candidates: Vec::new(),
            forwarder,
        }
    }

    pub fn buffer_candidate(&mut self, candidate: IceCandidate) {
        if self.pending_candidates.len() < MAX_PENDING_CANDIDATES {
            self.pending_candidates.push(candidate);
        } else {
            tracing::warn!("pending candidate buffer full, dropping candidate");
        }
    }

    pub async fn close(self) {
        self.forwarder.abort();
        self.session.close().await;
    }
}

/// Entry of the lobby listing shown by the hosting application.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LobbyEntry {
    pub client: ClientId,
    pub username: String,
}

pub struct Peer {
    pub id: ClientId,
    pub username: String,
    pub channel_id: String,
    pub outgoing: Option<PeerSession>,
    pub incoming: Option<PeerSession>,
    pub outgoing_state: NegotiationState,
    pub incoming_state: NegotiationState,
    pub sink: Option<Arc<dyn PlaybackSink>>,
    /// Guard against duplicate negotiation attempts; cleared by the stream
    /// request timeout so a later announce can retry.
    pub negotiation_started: bool,
    /// Candidates that arrived before the target session existed at all.
    pub early_candidates: Vec<(StreamDirection, IceCandidate)>,
    pub playback_retries: u32,
}

impl Peer {
    fn new(id: ClientId, username: String, channel_id: String) -> Self {
        Self {
            id,
            username,
            channel_id,
            outgoing: None,
            incoming: None,
            outgoing_state: NegotiationState::Unknown,
            incoming_state: NegotiationState::Unknown,
            sink: None,
            negotiation_started: false,
            early_candidates: Vec::new(),
            playback_retries: 0,
        }
    }

    pub fn session_mut(&mut self, direction: StreamDirection) -> Option<&mut PeerSession> {
        match direction {
            StreamDirection::Outgoing => self.outgoing.as_mut(),
            StreamDirection::Incoming => self.incoming.as_mut(),
        }
    }

    /// Close both sessions, stop playback, and reset the negotiation guard.
    /// The peer record itself stays with the caller, which decides whether
    /// to drop it from the registry.
    pub async fn teardown(&mut self) {
        if let Some(outgoing) = self.outgoing.take() {
            outgoing.close().await;
        }
        if let Some(incoming) = self.incoming.take() {
            incoming.close().await;
        }
        if let Some(sink) = self.sink.take() {
            sink.stop();
        }
        self.outgoing_state = NegotiationState::Closed;
        self.incoming_state = NegotiationState::Closed;
        self.negotiation_started = false;
        self.early_candidates.clear();
    }
}

/// Per-channel mapping from remote client id to peer record. Peers are
/// created lazily on first signaling reference.
#[derive(Default)]
pub struct PeerRegistry {
    peers: HashMap<ClientId, Peer>,
}

impl PeerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get_or_insert(
        &mut self,
        id: &ClientId,
        username: Option<&str>,
        channel_id: &str,
    ) -> &mut Peer {
        let peer = self.peers.entry(id.clone()).or_insert_with(|| {
            // Unknown peers start out named by their id until a better name
            // arrives with a later message.
            let username = username.unwrap_or(id.as_str()).to_string();
            Peer::new(id.clone(), username, channel_id.to_string())
        });
        if let Some(username) = username {
            peer.username = username.to_string();
        }
        peer
    }

    pub fn get_mut(&mut self, id: &ClientId) -> Option<&mut Peer> {
        self.peers.get_mut(id)
    }

    pub fn remove(&mut self, id: &ClientId) -> Option<Peer> {
        self.peers.remove(id)
    }

    pub fn drain(&mut self) -> Vec<Peer> {
        self.peers.drain().map(|(_, peer)| peer).collect()
    }

    pub fn len(&self) -> usize {
        self.peers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.peers.is_empty()
    }

    /// Lobby listing: self first, then one entry per distinct peer id.
    pub fn lobby_listing(&self, local: LobbyEntry) -> Vec<LobbyEntry> {
        let mut listing = vec![local];
        for peer in self.peers.values() {
            if listing.iter().any(|entry| entry.client == peer.id) {
                continue;
            }
            listing.push(LobbyEntry {
                client: peer.id.clone(),
                username: peer.username.clone(),
            });
        }
        listing
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn local() -> LobbyEntry {
        LobbyEntry {
            client: "local".into(),
            username: "me".into(),
        }
    }

    #[test]
    fn lobby_lists_self_first() {
        let mut registry = PeerRegistry::new();
        registry.get_or_insert(&"peer-1".into(), Some("pat"), "ch");
        let listing = registry.lobby_listing(local());
        assert_eq!(listing.len(), 2);
        assert_eq!(listing[0].client.as_str(), "local");
        assert_eq!(listing[1].username, "pat");
    }

    #[test]
    fn lobby_has_no_duplicate_entries() {
        let mut registry = PeerRegistry::new();
        registry.get_or_insert(&"peer-1".into(), Some("pat"), "ch");
        registry.get_or_insert(&"peer-1".into(), Some("pat"), "ch");
        registry.get_or_insert(&"peer-2".into(), None, "ch");
        let listing = registry.lobby_listing(local());
        assert_eq!(listing.len(), 3);
    }

    #[test]
    fn unknown_peer_is_named_by_its_id_until_a_name_arrives() {
        let mut registry = PeerRegistry::new();
        registry.get_or_insert(&"peer-1".into(), None, "ch");
        assert_eq!(
            registry.get_mut(&"peer-1".into()).expect("peer").username,
            "peer-1"
        );
        registry.get_or_insert(&"peer-1".into(), Some("pat"), "ch");
        assert_eq!(
            registry.get_mut(&"peer-1".into()).expect("peer").username,
            "pat"
        );
    }
}
