//! Per-peer connection establishment. Two directions negotiate
//! independently: the incoming path starts with a stream request and ends
//! with a playing sink; the outgoing path starts with a received stream
//! request and ends with the remote applying our offer's answer.

use crate::channel::{ChannelActor, ChannelCmd};
use crate::identity::ClientId;
use crate::media::{RemoteTrack, SessionEvent};
use crate::peer::{
    NegotiationState, PeerSession, StreamDirection, MAX_PENDING_CANDIDATES,
};
use crate::protocol::{IceCandidate, SessionDescription, SignalPayload};

impl ChannelActor {
    /// Bootstrap for `imActive`/`isTalking`: make sure the peer exists and,
    /// when nothing is flowing toward us yet, request its stream.
    pub(crate) async fn check_connection(&mut self, id: &ClientId, username: Option<&str>) {
        let channel_id = self.id.clone();
        let peer = self.registry.get_or_insert(id, username, &channel_id);
        let start = peer.incoming.is_none() && !peer.negotiation_started;
        self.recompute_lobby();
        if start {
            self.begin_stream_negotiation(id);
        }
    }

    fn begin_stream_negotiation(&mut self, id: &ClientId) {
        let Some(peer) = self.registry.get_mut(id) else {
            return;
        };
        peer.negotiation_started = true;
        peer.incoming_state = NegotiationState::AwaitingStreamRequest;
        tracing::debug!(channel = %self.id, peer = %id, "requesting peer stream");
        self.publish(SignalPayload::StreamReq {
            c: self.ctx.client_id().clone(),
            u: self.username.clone(),
            p: id.clone(),
        });
        self.schedule(
            self.config().negotiation_timeout,
            ChannelCmd::NegotiationTimeout(id.clone()),
        );
    }

    /// The awaited condition is an incoming session; if none appeared, clear
    /// the guard so a future announce retries.
    pub(crate) fn handle_negotiation_timeout(&mut self, id: &ClientId) {
        let Some(peer) = self.registry.get_mut(id) else {
            return;
        };
        if peer.incoming.is_none() && peer.incoming_state == NegotiationState::AwaitingStreamRequest
        {
            tracing::debug!(channel = %self.id, peer = %id, "stream request timed out");
            peer.negotiation_started = false;
            peer.incoming_state = NegotiationState::Unknown;
        }
    }

    /// A peer asked us to stream toward it. Refused until the local user has
    /// announced with live capture at least once.
    pub(crate) async fn handle_stream_request(&mut self, from: ClientId, username: &str) {
        if !self.ctx.has_talked() {
            tracing::debug!(channel = %self.id, peer = %from, "ignoring stream request before first announce");
            return;
        }
        let channel_id = self.id.clone();
        {
            let peer = self.registry.get_or_insert(&from, Some(username), &channel_id);
            if peer.outgoing.is_some() {
                return;
            }
        }
        let handle = match self.ctx.media().create_session().await {
            Ok(handle) => handle,
            Err(err) => {
                tracing::warn!(channel = %self.id, peer = %from, error = %err, "outgoing session setup failed");
                return;
            }
        };
        let forwarder =
            self.spawn_session_forwarder(from.clone(), StreamDirection::Outgoing, handle.events);
        let peer = self.registry.get_or_insert(&from, Some(username), &channel_id);
        peer.outgoing = Some(PeerSession::new(handle.session, forwarder));
        peer.outgoing_state = NegotiationState::Offering;
        self.attach_capture_tracks(from, 1).await;
    }

    /// Attach every shared capture track to the peer's outgoing session. A
    /// zero-track stream is discarded, reacquired, and the attach retried a
    /// bounded number of times.
    pub(crate) async fn attach_capture_tracks(&mut self, peer_id: ClientId, attempt: u32) {
        let tracks = self
            .ctx
            .capture()
            .stream()
            .map(|stream| stream.tracks())
            .unwrap_or_default();

        if tracks.is_empty() {
            if attempt >= self.config().max_track_attach_attempts {
                tracing::warn!(channel = %self.id, peer = %peer_id, attempt, "giving up on track attachment");
                return;
            }
            self.ctx.capture().discard_stream();
            if let Err(err) = self.ctx.capture().ensure_stream().await {
                tracing::warn!(channel = %self.id, error = %err, "capture reacquisition failed");
                return;
            }
            self.schedule(
                self.config().track_retry_delay,
                ChannelCmd::TrackAttachRetry {
                    peer: peer_id,
                    attempt: attempt + 1,
                },
            );
            return;
        }

        let Some(session) = self
            .registry
            .get_mut(&peer_id)
            .and_then(|peer| peer.outgoing.as_ref())
            .map(|outgoing| outgoing.session.clone())
        else {
            return;
        };
        for track in &tracks {
            if let Err(err) = session.add_track(track).await {
                tracing::warn!(channel = %self.id, peer = %peer_id, error = %err, "track attach failed");
            }
        }
        self.notify_clients_change();
    }

    /// Incoming offer addressed to us. Duplicate offers for a peer with an
    /// existing incoming session are ignored.
    pub(crate) async fn handle_offer(&mut self, from: ClientId, offer: SessionDescription) {
        let channel_id = self.id.clone();
        {
            let peer = self.registry.get_or_insert(&from, None, &channel_id);
            if peer.incoming.is_some() {
                tracing::debug!(channel = %self.id, peer = %from, "duplicate offer ignored");
                return;
            }
        }
        let handle = match self.ctx.media().create_session().await {
            Ok(handle) => handle,
            Err(err) => {
                tracing::warn!(channel = %self.id, peer = %from, error = %err, "incoming session setup failed");
                return;
            }
        };
        let forwarder =
            self.spawn_session_forwarder(from.clone(), StreamDirection::Incoming, handle.events);
        let session = handle.session;

        if let Err(err) = session.set_remote_description(offer).await {
            tracing::warn!(channel = %self.id, peer = %from, error = %err, "failed to apply remote offer");
            forwarder.abort();
            session.close().await;
            return;
        }
        let answer = match session.create_answer().await {
            Ok(answer) => answer,
            Err(err) => {
                tracing::warn!(channel = %self.id, peer = %from, error = %err, "answer generation failed");
                forwarder.abort();
                session.close().await;
                return;
            }
        };
        if let Err(err) = session.set_local_description(answer.clone()).await {
            tracing::warn!(channel = %self.id, peer = %from, error = %err, "failed to apply local answer");
            forwarder.abort();
            session.close().await;
            return;
        }

        let early = {
            let peer = self.registry.get_or_insert(&from, None, &channel_id);
            let mut incoming = PeerSession::new(session.clone(), forwarder);
            incoming.remote_ready = true;
            peer.incoming = Some(incoming);
            peer.incoming_state = NegotiationState::Answering;
            take_early(peer, StreamDirection::Incoming)
        };
        for candidate in early {
            if let Err(err) = session.add_ice_candidate(candidate).await {
                tracing::debug!(channel = %self.id, peer = %from, error = %err, "buffered candidate rejected");
            }
        }

        self.publish(SignalPayload::RtcAns {
            c: self.ctx.client_id().clone(),
            fc: from,
            a: answer,
        });
    }

    /// Remote answer for our outgoing session; completes it and flushes any
    /// candidates held back until the remote description existed. Answers
    /// are only honored while one is awaited, so a duplicate or stray
    /// answer cannot disturb an established session.
    pub(crate) async fn handle_answer(&mut self, from: ClientId, answer: SessionDescription) {
        let Some(session) = self
            .registry
            .get_mut(&from)
            .filter(|peer| peer.outgoing_state == NegotiationState::AwaitingAnswer)
            .and_then(|peer| peer.outgoing.as_ref())
            .map(|outgoing| outgoing.session.clone())
        else {
            tracing::debug!(channel = %self.id, peer = %from, "answer without a pending offer ignored");
            return;
        };
        if let Err(err) = session.set_remote_description(answer).await {
            tracing::warn!(channel = %self.id, peer = %from, error = %err, "failed to apply remote answer");
            return;
        }
        let pending = {
            let Some(peer) = self.registry.get_mut(&from) else {
                return;
            };
            let mut pending = take_early(peer, StreamDirection::Outgoing);
            if let Some(outgoing) = peer.outgoing.as_mut() {
                outgoing.remote_ready = true;
                pending.extend(std::mem::take(&mut outgoing.pending_candidates));
            }
            pending
        };
        for candidate in pending {
            if let Err(err) = session.add_ice_candidate(candidate).await {
                tracing::debug!(channel = %self.id, peer = %from, error = %err, "buffered candidate rejected");
            }
        }
    }

    /// Route a candidate to the matching session, buffering it while the
    /// session (or its remote description) does not exist yet. Apply
    /// failures are logged and otherwise ignored.
    pub(crate) async fn apply_candidate(
        &mut self,
        from: ClientId,
        direction: StreamDirection,
        candidate: IceCandidate,
    ) {
        let channel_id = self.id.clone();
        let session = {
            let peer = self.registry.get_or_insert(&from, None, &channel_id);
            match peer.session_mut(direction) {
                Some(session) if session.remote_ready => Some(session.session.clone()),
                Some(session) => {
                    session.buffer_candidate(candidate);
                    return;
                }
                None => {
                    if peer.early_candidates.len() < MAX_PENDING_CANDIDATES {
                        peer.early_candidates.push((direction, candidate));
                    } else {
                        tracing::warn!(channel = %self.id, peer = %from, "early candidate buffer full");
                    }
                    return;
                }
            }
        };
        if let Some(session) = session {
            if let Err(err) = session.add_ice_candidate(candidate).await {
                tracing::debug!(channel = %self.id, peer = %from, error = %err, "candidate apply failed");
            }
        }
    }

    pub(crate) async fn handle_session_event(
        &mut self,
        peer_id: ClientId,
        direction: StreamDirection,
        event: SessionEvent,
    ) {
        match event {
            SessionEvent::NegotiationNeeded => self.send_offer(peer_id).await,
            SessionEvent::IceCandidate(candidate) => {
                let payload = match direction {
                    StreamDirection::Outgoing => SignalPayload::IceCand {
                        fc: peer_id,
                        fp: self.ctx.client_id().clone(),
                        i: candidate,
                    },
                    StreamDirection::Incoming => SignalPayload::CliIce {
                        c: self.ctx.client_id().clone(),
                        fc: peer_id,
                        i: candidate,
                    },
                };
                self.publish(payload);
            }
            SessionEvent::ConnectivityChanged(state) => {
                if state.is_terminal() {
                    tracing::debug!(channel = %self.id, peer = %peer_id, ?state, "session reached terminal state");
                    self.close_peer(&peer_id, true).await;
                } else if state == crate::media::ConnectivityState::Connected {
                    if let Some(peer) = self.registry.get_mut(&peer_id) {
                        match direction {
                            StreamDirection::Outgoing => {
                                peer.outgoing_state = NegotiationState::Connected;
                            }
                            StreamDirection::Incoming => {
                                peer.incoming_state = NegotiationState::Connected;
                            }
                        }
                    }
                }
            }
            SessionEvent::TrackReceived(track) => self.handle_track_received(peer_id, track),
        }
    }

    async fn send_offer(&mut self, peer_id: ClientId) {
        let Some(session) = self
            .registry
            .get_mut(&peer_id)
            .and_then(|peer| peer.outgoing.as_ref())
            .map(|outgoing| outgoing.session.clone())
        else {
            return;
        };
        let offer = match session.create_offer().await {
            Ok(offer) => offer,
            Err(err) => {
                tracing::warn!(channel = %self.id, peer = %peer_id, error = %err, "offer generation failed");
                return;
            }
        };
        if let Err(err) = session.set_local_description(offer.clone()).await {
            tracing::warn!(channel = %self.id, peer = %peer_id, error = %err, "failed to apply local offer");
            return;
        }
        if let Some(peer) = self.registry.get_mut(&peer_id) {
            peer.outgoing_state = NegotiationState::AwaitingAnswer;
        }
        self.publish(SignalPayload::RtcOffer {
            fc: peer_id,
            fp: self.ctx.client_id().clone(),
            o: offer,
        });
    }

    /// First remote track: create the playback sink, apply the channel
    /// volume, and start playback with a stall re-check.
    fn handle_track_received(&mut self, peer_id: ClientId, track: RemoteTrack) {
        let volume = self.volume;
        let factory = self.ctx.playback().clone();
        let retry_delay = self.config().playback_retry_delay;
        let Some(peer) = self.registry.get_mut(&peer_id) else {
            return;
        };
        let sink = match &peer.sink {
            Some(sink) => sink.clone(),
            None => {
                let sink = factory.create_sink();
                sink.set_volume(volume);
                peer.sink = Some(sink.clone());
                peer.playback_retries = 0;
                sink
            }
        };
        sink.bind(&track);
        sink.play();
        if !sink.is_playing() {
            self.schedule(retry_delay, ChannelCmd::PlaybackCheck(peer_id));
        }
        self.notify_clients_change();
    }

    /// Autoplay-stall recovery, bounded by `max_playback_retries`.
    pub(crate) fn handle_playback_check(&mut self, peer_id: ClientId) {
        let max_retries = self.config().max_playback_retries;
        let retry_delay = self.config().playback_retry_delay;
        let Some(peer) = self.registry.get_mut(&peer_id) else {
            return;
        };
        let Some(sink) = peer.sink.clone() else {
            return;
        };
        if sink.is_playing() {
            return;
        }
        if peer.playback_retries >= max_retries {
            tracing::warn!(channel = %self.id, peer = %peer_id, "playback still stalled, giving up");
            return;
        }
        peer.playback_retries += 1;
        sink.play();
        if !sink.is_playing() {
            self.schedule(retry_delay, ChannelCmd::PlaybackCheck(peer_id));
        }
    }

    /// Tear the peer down and, unless the channel itself is going away,
    /// remove it from the registry and notify observers.
    pub(crate) async fn close_peer(&mut self, id: &ClientId, notify: bool) {
        let Some(mut peer) = self.registry.remove(id) else {
            return;
        };
        tracing::debug!(channel = %self.id, peer = %id, "closing peer");
        peer.teardown().await;
        if notify {
            self.notify_clients_change();
        }
    }

    fn spawn_session_forwarder(
        &self,
        peer: ClientId,
        direction: StreamDirection,
        mut events: tokio::sync::mpsc::UnboundedReceiver<SessionEvent>,
    ) -> tokio::task::JoinHandle<()> {
        let tx = self.cmd_tx.clone();
        tokio::spawn(async move {
            while let Some(event) = events.recv().await {
                let cmd = ChannelCmd::Session {
                    peer: peer.clone(),
                    direction,
                    event,
                };
                if tx.send(cmd).is_err() {
                    break;
                }
            }
        })
    }
}

fn take_early(
    peer: &mut crate::peer::Peer,
    direction: StreamDirection,
) -> Vec<IceCandidate> {
    let mut taken = Vec::new();
    peer.early_candidates.retain(|(d, candidate)| {
        if *d == direction {
            taken.push(candidate.clone());
            false
        } else {
            true
        }
    });
    taken
}
