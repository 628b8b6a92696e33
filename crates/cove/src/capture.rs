//! Shared microphone capture. One stream serves every channel's outgoing
//! sessions; mute state toggles track enablement rather than dropping the
//! stream, and a zero-track acquisition is discarded and retried.

use std::any::Any;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use async_trait::async_trait;

use crate::error::EngineError;

/// One live audio track of the shared capture stream. The backend handle is
/// opaque here; media backends downcast it to their own track type.
#[derive(Clone)]
pub struct CaptureTrack {
    id: String,
    enabled: Arc<AtomicBool>,
    source: Option<Arc<dyn Any + Send + Sync>>,
}

impl CaptureTrack {
    pub fn new(id: impl Into<String>, source: Option<Arc<dyn Any + Send + Sync>>) -> Self {
        Self {
            id: id.into(),
            enabled: Arc::new(AtomicBool::new(true)),
            source,
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn set_enabled(&self, enabled: bool) {
        self.enabled.store(enabled, Ordering::SeqCst);
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled.load(Ordering::SeqCst)
    }

    pub fn source(&self) -> Option<&Arc<dyn Any + Send + Sync>> {
        self.source.as_ref()
    }
}

/// Audio capture device boundary: audio-only acquisition, may fail.
#[async_trait]
pub trait CaptureDevice: Send + Sync {
    async fn acquire(&self) -> Result<Arc<dyn CaptureStream>, EngineError>;
}

pub trait CaptureStream: Send + Sync {
    fn tracks(&self) -> Vec<CaptureTrack>;
}

/// Process-wide capture state: at most one acquisition in flight, shared by
/// all channels.
pub struct CaptureManager {
    device: Arc<dyn CaptureDevice>,
    stream: parking_lot::Mutex<Option<Arc<dyn CaptureStream>>>,
    acquiring: tokio::sync::Mutex<()>,
    muted: AtomicBool,
}

impl CaptureManager {
    pub fn new(device: Arc<dyn CaptureDevice>) -> Self {
        Self {
            device,
            stream: parking_lot::Mutex::new(None),
            acquiring: tokio::sync::Mutex::new(()),
            muted: AtomicBool::new(true),
        }
    }

    pub fn is_muted(&self) -> bool {
        self.muted.load(Ordering::SeqCst)
    }

    pub fn stream(&self) -> Option<Arc<dyn CaptureStream>> {
        self.stream.lock().clone()
    }

    /// A stream with at least one live track.
    pub fn has_live_stream(&self) -> bool {
        self.stream
            .lock()
            .as_ref()
            .map(|s| !s.tracks().is_empty())
            .unwrap_or(false)
    }

    /// Drop the current stream so the next `ensure_stream` reacquires.
    pub fn discard_stream(&self) {
        *self.stream.lock() = None;
    }

    /// Acquire the shared stream if none exists. Serialized so concurrent
    /// callers produce a single device acquisition.
    pub async fn ensure_stream(&self) -> Result<Arc<dyn CaptureStream>, EngineError> {
        let _guard = self.acquiring.lock().await;
        if let Some(stream) = self.stream.lock().clone() {
            return Ok(stream);
        }
        let stream = self.device.acquire().await?;
        tracing::debug!(tracks = stream.tracks().len(), "capture stream acquired");
        *self.stream.lock() = Some(stream.clone());
        Ok(stream)
    }

    /// Apply mute state, acquiring the stream first when unmuting. A stream
    /// that lost all its tracks is discarded and reacquired once.
    pub async fn set_mute(&self, muted: bool) -> Result<(), EngineError> {
        if !muted {
            if self.stream().map(|s| s.tracks().is_empty()).unwrap_or(true) {
                self.discard_stream();
                self.ensure_stream().await?;
            }
        }
        self.muted.store(muted, Ordering::SeqCst);
        if let Some(stream) = self.stream() {
            for track in stream.tracks() {
                track.set_enabled(!muted);
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    struct CountingDevice {
        acquisitions: AtomicUsize,
        tracks_per_stream: usize,
    }

    struct FixedStream {
        tracks: Vec<CaptureTrack>,
    }

    impl CaptureStream for FixedStream {
        fn tracks(&self) -> Vec<CaptureTrack> {
            self.tracks.clone()
        }
    }

    #[async_trait]
    impl CaptureDevice for CountingDevice {
        async fn acquire(&self) -> Result<Arc<dyn CaptureStream>, EngineError> {
            let n = self.acquisitions.fetch_add(1, Ordering::SeqCst);
            let tracks = (0..self.tracks_per_stream)
                .map(|i| CaptureTrack::new(format!("track-{n}-{i}"), None))
                .collect();
            Ok(Arc::new(FixedStream { tracks }))
        }
    }

    fn device(tracks_per_stream: usize) -> Arc<CountingDevice> {
        Arc::new(CountingDevice {
            acquisitions: AtomicUsize::new(0),
            tracks_per_stream,
        })
    }

    #[tokio::test]
    async fn unmute_acquires_once_and_reuses_the_stream() {
        let dev = device(1);
        let manager = CaptureManager::new(dev.clone());
        manager.set_mute(false).await.expect("unmute");
        manager.set_mute(true).await.expect("mute");
        manager.set_mute(false).await.expect("unmute again");
        assert_eq!(dev.acquisitions.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn zero_track_stream_triggers_exactly_one_reacquisition() {
        let dev = device(0);
        let manager = CaptureManager::new(dev.clone());
        manager.set_mute(false).await.expect("unmute");
        assert_eq!(dev.acquisitions.load(Ordering::SeqCst), 1);
        manager.set_mute(true).await.expect("mute");
        manager.set_mute(false).await.expect("unmute");
        assert_eq!(dev.acquisitions.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn mute_state_is_applied_to_every_track() {
        let dev = device(2);
        let manager = CaptureManager::new(dev);
        manager.set_mute(false).await.expect("unmute");
        let stream = manager.stream().expect("stream");
        assert!(stream.tracks().iter().all(|t| t.is_enabled()));
        manager.set_mute(true).await.expect("mute");
        assert!(stream.tracks().iter().all(|t| !t.is_enabled()));
    }
}
