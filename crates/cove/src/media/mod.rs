//! Boundary to the real-time media transport. The engine drives sessions
//! exclusively through these traits; `webrtc.rs` binds them to webrtc-rs and
//! `mock.rs` provides the in-memory engine used by tests.

use std::sync::Arc;

use async_trait::async_trait;
use thiserror::Error;
use tokio::sync::mpsc;

use crate::capture::CaptureTrack;
use crate::protocol::{IceCandidate, SessionDescription};

pub mod mock;
pub mod webrtc;

#[derive(Debug, Error)]
pub enum MediaError {
    #[error("session setup failed: {0}")]
    Setup(String),
    #[error("description exchange failed: {0}")]
    Description(String),
    #[error("candidate rejected: {0}")]
    Candidate(String),
    #[error("session closed")]
    Closed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectivityState {
    New,
    Connecting,
    Connected,
    Disconnected,
    Closed,
    Failed,
}

impl ConnectivityState {
    /// Terminal states force peer teardown.
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            ConnectivityState::Disconnected | ConnectivityState::Closed | ConnectivityState::Failed
        )
    }
}

/// Handle to a remote media stream surfaced by an incoming session.
#[derive(Debug, Clone)]
pub struct RemoteTrack {
    pub id: String,
}

#[derive(Debug, Clone)]
pub enum SessionEvent {
    NegotiationNeeded,
    IceCandidate(IceCandidate),
    ConnectivityChanged(ConnectivityState),
    TrackReceived(RemoteTrack),
}

/// A freshly created session plus the receiver its events arrive on.
pub struct MediaSessionHandle {
    pub session: Arc<dyn MediaSession>,
    pub events: mpsc::UnboundedReceiver<SessionEvent>,
}

#[async_trait]
pub trait MediaEngine: Send + Sync {
    async fn create_session(&self) -> Result<MediaSessionHandle, MediaError>;
}

#[async_trait]
pub trait MediaSession: Send + Sync {
    async fn create_offer(&self) -> Result<SessionDescription, MediaError>;
    async fn create_answer(&self) -> Result<SessionDescription, MediaError>;
    async fn set_local_description(&self, desc: SessionDescription) -> Result<(), MediaError>;
    async fn set_remote_description(&self, desc: SessionDescription) -> Result<(), MediaError>;
    /// Malformed or late candidates fail here; callers log and move on.
    async fn add_ice_candidate(&self, candidate: IceCandidate) -> Result<(), MediaError>;
    async fn add_track(&self, track: &CaptureTrack) -> Result<(), MediaError>;
    async fn close(&self);
}
