//! Voice-activity detection: sample the capture signal on a fixed period,
//! compute RMS amplitude, and report threshold crossings exactly once per
//! transition.

use std::sync::Arc;

use crate::context::SessionContext;

/// Periodic time-domain sample retrieval from the capture signal. Returns
/// `None` while no analysable stream exists.
pub trait AnalysisSource: Send + Sync {
    fn sample_window(&self) -> Option<Vec<f32>>;
}

pub fn rms(samples: &[f32]) -> f32 {
    if samples.is_empty() {
        return 0.0;
    }
    let sum_squares: f32 = samples.iter().map(|s| s * s).sum();
    (sum_squares / samples.len() as f32).sqrt()
}

/// Edge detector over the amplitude threshold: `update` yields the new state
/// only on a crossing, never while the state is unchanged.
#[derive(Debug)]
pub struct VadState {
    threshold: f32,
    talking: bool,
}

impl VadState {
    pub fn new(threshold: f32) -> Self {
        Self {
            threshold,
            talking: false,
        }
    }

    pub fn is_talking(&self) -> bool {
        self.talking
    }

    pub fn update(&mut self, level: f32) -> Option<bool> {
        let talking = level >= self.threshold;
        if talking == self.talking {
            return None;
        }
        self.talking = talking;
        Some(talking)
    }
}

/// Monitor task: one per session context. Every transition is broadcast as
/// `isTalking` to all channels.
pub(crate) fn spawn_monitor(
    ctx: Arc<SessionContext>,
    source: Arc<dyn AnalysisSource>,
) -> tokio::task::JoinHandle<()> {
    let mut vad = VadState::new(ctx.config().talking_threshold);
    let period = ctx.config().monitor_interval;
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(period);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
        loop {
            ticker.tick().await;
            let Some(window) = source.sample_window() else {
                continue;
            };
            if let Some(talking) = vad.update(rms(&window)) {
                tracing::debug!(talking, "voice activity transition");
                ctx.broadcast_talking(talking);
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn threshold_crossings_fire_exactly_once() {
        let mut vad = VadState::new(0.015);
        let levels = [0.0, 0.0, 0.02, 0.02, 0.0, 0.0];
        let transitions: Vec<bool> = levels.iter().filter_map(|&l| vad.update(l)).collect();
        assert_eq!(transitions, vec![true, false]);
    }

    #[test]
    fn threshold_is_inclusive() {
        let mut vad = VadState::new(0.015);
        assert_eq!(vad.update(0.015), Some(true));
    }

    #[test]
    fn rms_of_silence_is_zero() {
        assert_eq!(rms(&[]), 0.0);
        assert_eq!(rms(&[0.0, 0.0, 0.0]), 0.0);
    }

    #[test]
    fn rms_matches_hand_computed_window() {
        let window = [0.03, -0.03, 0.03, -0.03];
        assert!((rms(&window) - 0.03).abs() < 1e-6);
    }
}
