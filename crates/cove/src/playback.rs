//! Playback boundary for remote audio. Autoplay can silently stall, so the
//! channel actor re-checks `is_playing` after a short delay and restarts a
//! bounded number of times.

use std::sync::Arc;

use crate::media::RemoteTrack;

pub trait PlaybackSink: Send + Sync {
    /// Bind (or rebind) the remote stream this sink renders.
    fn bind(&self, track: &RemoteTrack);
    fn set_volume(&self, volume: f32);
    /// Start playback; stalls are observable via `is_playing`.
    fn play(&self);
    fn is_playing(&self) -> bool;
    fn stop(&self);
}

pub trait PlaybackFactory: Send + Sync {
    fn create_sink(&self) -> Arc<dyn PlaybackSink>;
}
