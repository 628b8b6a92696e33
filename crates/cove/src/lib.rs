//! Cove: a voice channel negotiation engine.
//!
//! Clients meet on a shared signaling topic, announce presence, and
//! negotiate pairwise one-way media sessions (one per direction) via
//! offer/answer and ICE candidate exchange. The engine also carries
//! voice-activity notifications and opaque data packets between channel
//! members.
//!
//! The hardware- and network-facing seams (signaling transport, media
//! transport, microphone capture, audio playback) are traits; production
//! backends live in [`signaling::ws`] and [`media::webrtc`], in-memory
//! versions in [`signal_bus::LocalHub`], [`media::mock`] and [`mock`].

pub mod activity;
pub mod capture;
pub mod channel;
pub mod config;
pub mod context;
pub mod error;
pub mod identity;
pub mod media;
pub mod mock;
pub mod peer;
pub mod playback;
pub mod protocol;
pub mod signaling;

mod negotiation;
mod presence;

pub use channel::{
    ChannelEvents, ChannelOptions, DataPacketEvent, NullEvents, TalkEvent, VoiceChannel,
};
pub use config::{EngineConfig, DEFAULT_STUN_SERVERS};
pub use context::{EngineDeps, SessionContext};
pub use error::EngineError;
pub use identity::ClientId;
pub use peer::LobbyEntry;
