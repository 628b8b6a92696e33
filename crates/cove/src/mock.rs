//! Test doubles for the engine's hardware-facing seams: capture, playback,
//! and signal analysis. Used by the integration tests together with
//! [`crate::media::mock`] and the in-memory signaling hub.

use std::sync::atomic::{AtomicBool, AtomicU32, AtomicUsize, Ordering};
use std::sync::Arc;

use async_trait::async_trait;

use crate::activity::AnalysisSource;
use crate::capture::{CaptureDevice, CaptureStream, CaptureTrack};
use crate::error::EngineError;
use crate::media::RemoteTrack;
use crate::playback::{PlaybackFactory, PlaybackSink};

/// Capture device yielding a fixed number of tracks per acquisition, with a
/// knob to simulate a device that comes up empty the first time.
pub struct MockCaptureDevice {
    tracks_per_stream: usize,
    empty_acquisitions: AtomicUsize,
    acquisitions: AtomicUsize,
    fail: AtomicBool,
}

impl MockCaptureDevice {
    pub fn new(tracks_per_stream: usize) -> Arc<Self> {
        Arc::new(Self {
            tracks_per_stream,
            empty_acquisitions: AtomicUsize::new(0),
            acquisitions: AtomicUsize::new(0),
            fail: AtomicBool::new(false),
        })
    }

    /// The next `n` acquisitions produce zero-track streams.
    pub fn set_empty_acquisitions(&self, n: usize) {
        self.empty_acquisitions.store(n, Ordering::SeqCst);
    }

    pub fn set_fail(&self, fail: bool) {
        self.fail.store(fail, Ordering::SeqCst);
    }

    pub fn acquisitions(&self) -> usize {
        self.acquisitions.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl CaptureDevice for MockCaptureDevice {
    async fn acquire(&self) -> Result<Arc<dyn CaptureStream>, EngineError> {
        if self.fail.load(Ordering::SeqCst) {
            return Err(EngineError::Capture("capture device unavailable".into()));
        }
        let n = self.acquisitions.fetch_add(1, Ordering::SeqCst);
        let empty = self
            .empty_acquisitions
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |v| v.checked_sub(1))
            .is_ok();
        let count = if empty { 0 } else { self.tracks_per_stream };
        let tracks = (0..count)
            .map(|i| CaptureTrack::new(format!("mic-{n}-{i}"), None))
            .collect();
        Ok(Arc::new(MockCaptureStream { tracks }))
    }
}

pub struct MockCaptureStream {
    tracks: Vec<CaptureTrack>,
}

impl CaptureStream for MockCaptureStream {
    fn tracks(&self) -> Vec<CaptureTrack> {
        self.tracks.clone()
    }
}

/// Playback sink that records its interactions. `stall_plays` simulates the
/// autoplay failure mode where `play` does not take effect.
pub struct MockPlaybackSink {
    bound: parking_lot::Mutex<Option<RemoteTrack>>,
    volume: parking_lot::Mutex<f32>,
    playing: AtomicBool,
    play_calls: AtomicU32,
    stall_plays: AtomicU32,
}

impl MockPlaybackSink {
    fn new(stall_plays: u32) -> Arc<Self> {
        Arc::new(Self {
            bound: parking_lot::Mutex::new(None),
            volume: parking_lot::Mutex::new(1.0),
            playing: AtomicBool::new(false),
            play_calls: AtomicU32::new(0),
            stall_plays: AtomicU32::new(stall_plays),
        })
    }

    pub fn bound_track(&self) -> Option<RemoteTrack> {
        self.bound.lock().clone()
    }

    pub fn volume(&self) -> f32 {
        *self.volume.lock()
    }

    pub fn play_calls(&self) -> u32 {
        self.play_calls.load(Ordering::SeqCst)
    }
}

impl PlaybackSink for MockPlaybackSink {
    fn bind(&self, track: &RemoteTrack) {
        *self.bound.lock() = Some(track.clone());
    }

    fn set_volume(&self, volume: f32) {
        *self.volume.lock() = volume;
    }

    fn play(&self) {
        self.play_calls.fetch_add(1, Ordering::SeqCst);
        let stalled = self
            .stall_plays
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |v| v.checked_sub(1))
            .is_ok();
        if !stalled {
            self.playing.store(true, Ordering::SeqCst);
        }
    }

    fn is_playing(&self) -> bool {
        self.playing.load(Ordering::SeqCst)
    }

    fn stop(&self) {
        self.playing.store(false, Ordering::SeqCst);
    }
}

#[derive(Default)]
pub struct MockPlaybackFactory {
    stall_plays: AtomicU32,
    sinks: parking_lot::Mutex<Vec<Arc<MockPlaybackSink>>>,
}

impl MockPlaybackFactory {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Every sink created after this call stalls its first `n` plays.
    pub fn stall_first_plays(&self, n: u32) {
        self.stall_plays.store(n, Ordering::SeqCst);
    }

    pub fn sinks(&self) -> Vec<Arc<MockPlaybackSink>> {
        self.sinks.lock().clone()
    }
}

impl PlaybackFactory for MockPlaybackFactory {
    fn create_sink(&self) -> Arc<dyn PlaybackSink> {
        let sink = MockPlaybackSink::new(self.stall_plays.load(Ordering::SeqCst));
        self.sinks.lock().push(sink.clone());
        sink
    }
}

/// Analysis source fed by the test: each call to `sample_window` pops the
/// next scripted window, then repeats the last one.
#[derive(Default)]
pub struct ScriptedAnalysis {
    windows: parking_lot::Mutex<Vec<Vec<f32>>>,
    last: parking_lot::Mutex<Option<Vec<f32>>>,
}

impl ScriptedAnalysis {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn push_window(&self, window: Vec<f32>) {
        self.windows.lock().push(window);
    }
}

impl AnalysisSource for ScriptedAnalysis {
    fn sample_window(&self) -> Option<Vec<f32>> {
        let mut windows = self.windows.lock();
        if windows.is_empty() {
            return self.last.lock().clone();
        }
        let window = windows.remove(0);
        *self.last.lock() = Some(window.clone());
        Some(window)
    }
}
