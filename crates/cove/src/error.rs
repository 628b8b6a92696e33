use thiserror::Error;

use crate::media::MediaError;

/// Failure taxonomy for the engine. Configuration errors are fatal to the
/// channel being set up; everything else is scoped to one peer or one device
/// interaction and never takes down the process.
#[derive(Debug, Error)]
pub enum EngineError {
    #[error("channel configuration error: {0}")]
    Config(String),
    #[error("signaling transport error: {0}")]
    Signaling(#[from] signal_bus::BusError),
    #[error("media transport error: {0}")]
    Media(#[from] MediaError),
    #[error("capture device unavailable: {0}")]
    Capture(String),
}
