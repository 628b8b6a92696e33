//! In-memory media engine. Sessions negotiate instantly: adding the first
//! track raises `NegotiationNeeded`, applying a local description produces
//! a synthetic candidate, and completing the offer/answer exchange flips
//! connectivity to `Connected` (plus a `TrackReceived` on the answering
//! side). Enough to drive the whole state machine without a network.

use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::mpsc;
use uuid::Uuid;

use super::{
    ConnectivityState, MediaEngine, MediaError, MediaSession, MediaSessionHandle, RemoteTrack,
    SessionEvent,
};
use crate::capture::CaptureTrack;
use crate::protocol::{IceCandidate, SessionDescription};

#[derive(Default)]
pub struct MockMediaEngine {
    sessions: parking_lot::Mutex<Vec<Arc<MockMediaSession>>>,
}

impl MockMediaEngine {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn session_count(&self) -> usize {
        self.sessions.lock().len()
    }

    pub fn sessions(&self) -> Vec<Arc<MockMediaSession>> {
        self.sessions.lock().clone()
    }
}

#[async_trait]
impl MediaEngine for MockMediaEngine {
    async fn create_session(&self) -> Result<MediaSessionHandle, MediaError> {
        let (events_tx, events) = mpsc::unbounded_channel();
        let session = Arc::new(MockMediaSession {
            id: Uuid::new_v4().to_string(),
            events: events_tx,
            inner: parking_lot::Mutex::new(Inner::default()),
        });
        self.sessions.lock().push(session.clone());
        Ok(MediaSessionHandle { session, events })
    }
}

#[derive(Default)]
struct Inner {
    remote: Option<SessionDescription>,
    remote_sets: usize,
    tracks: usize,
    candidates: Vec<IceCandidate>,
    offered: bool,
    closed: bool,
}

pub struct MockMediaSession {
    id: String,
    events: mpsc::UnboundedSender<SessionEvent>,
    inner: parking_lot::Mutex<Inner>,
}

impl MockMediaSession {
    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn track_count(&self) -> usize {
        self.inner.lock().tracks
    }

    pub fn candidate_count(&self) -> usize {
        self.inner.lock().candidates.len()
    }

    /// How many remote descriptions have been applied.
    pub fn remote_description_count(&self) -> usize {
        self.inner.lock().remote_sets
    }

    pub fn is_closed(&self) -> bool {
        self.inner.lock().closed
    }

    /// Push an arbitrary event, e.g. a terminal connectivity transition.
    pub fn emit(&self, event: SessionEvent) {
        let _ = self.events.send(event);
    }
}

#[async_trait]
impl MediaSession for MockMediaSession {
    async fn create_offer(&self) -> Result<SessionDescription, MediaError> {
        if self.inner.lock().closed {
            return Err(MediaError::Closed);
        }
        self.inner.lock().offered = true;
        Ok(SessionDescription::offer(format!("v=0 mock-offer-{}", self.id)))
    }

    async fn create_answer(&self) -> Result<SessionDescription, MediaError> {
        let inner = self.inner.lock();
        if inner.closed {
            return Err(MediaError::Closed);
        }
        if inner.remote.is_none() {
            return Err(MediaError::Description(
                "cannot answer without a remote offer".into(),
            ));
        }
        Ok(SessionDescription::answer(format!(
            "v=0 mock-answer-{}",
            self.id
        )))
    }

    async fn set_local_description(&self, desc: SessionDescription) -> Result<(), MediaError> {
        let is_answer = desc.kind == "answer";
        if self.inner.lock().closed {
            return Err(MediaError::Closed);
        }
        let _ = self.events.send(SessionEvent::IceCandidate(IceCandidate {
            candidate: format!("candidate:mock-{}", self.id),
            sdp_mid: Some("0".into()),
            sdp_mline_index: Some(0),
        }));
        if is_answer {
            // The answering side is the media sink: connectivity comes up
            // and the remote stream arrives.
            let _ = self
                .events
                .send(SessionEvent::ConnectivityChanged(ConnectivityState::Connected));
            let _ = self.events.send(SessionEvent::TrackReceived(RemoteTrack {
                id: format!("remote-{}", self.id),
            }));
        }
        Ok(())
    }

    async fn set_remote_description(&self, desc: SessionDescription) -> Result<(), MediaError> {
        let is_answer = desc.kind == "answer";
        {
            let mut inner = self.inner.lock();
            if inner.closed {
                return Err(MediaError::Closed);
            }
            inner.remote = Some(desc);
            inner.remote_sets += 1;
        }
        if is_answer {
            let _ = self
                .events
                .send(SessionEvent::ConnectivityChanged(ConnectivityState::Connected));
        }
        Ok(())
    }

    async fn add_ice_candidate(&self, candidate: IceCandidate) -> Result<(), MediaError> {
        let mut inner = self.inner.lock();
        if inner.closed {
            return Err(MediaError::Closed);
        }
        if inner.remote.is_none() {
            return Err(MediaError::Candidate(
                "no remote description to apply against".into(),
            ));
        }
        inner.candidates.push(candidate);
        Ok(())
    }

    async fn add_track(&self, _track: &CaptureTrack) -> Result<(), MediaError> {
        let negotiate = {
            let mut inner = self.inner.lock();
            if inner.closed {
                return Err(MediaError::Closed);
            }
            inner.tracks += 1;
            inner.tracks == 1 && !inner.offered
        };
        if negotiate {
            let _ = self.events.send(SessionEvent::NegotiationNeeded);
        }
        Ok(())
    }

    async fn close(&self) {
        self.inner.lock().closed = true;
    }
}
