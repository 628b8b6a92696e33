use std::env;
use std::time::Duration;

/// Public STUN servers offered to every media session.
pub const DEFAULT_STUN_SERVERS: [&str; 6] = [
    "stun:stun.l.google.com:19302",
    "stun:stun.stunprotocol.org:3478",
    "stun:stun1.l.google.com:19302",
    "stun:stun2.l.google.com:19302",
    "stun:stun3.l.google.com:19302",
    "stun:stun4.l.google.com:19302",
];

/// Tunables for presence, negotiation and voice-activity detection.
///
/// Defaults match the protocol's expected cadence; the `COVE_*` environment
/// variables override individual knobs for deployments that need them.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// ICE-assist server URLs handed to the media engine.
    pub ice_servers: Vec<String>,
    /// RMS amplitude above which the local user counts as talking.
    pub talking_threshold: f32,
    /// How often the activity monitor samples the capture signal.
    pub monitor_interval: Duration,
    /// Delay between transport connect and the first `imActive` announce.
    pub announce_delay: Duration,
    /// Delay between transport connect and the first `doPing`.
    pub first_ping_delay: Duration,
    /// Period of the repeating ping / lobby-refresh timer.
    pub ping_interval: Duration,
    /// How long a stream request may go unanswered before the negotiation
    /// guard is cleared so a later announce can retry.
    pub negotiation_timeout: Duration,
    /// How long to wait before checking that playback actually started.
    pub playback_retry_delay: Duration,
    /// Delay before retrying track attachment after a zero-track capture.
    pub track_retry_delay: Duration,
    /// Upper bound on zero-track reacquire-and-attach attempts.
    pub max_track_attach_attempts: u32,
    /// Upper bound on playback restart attempts after an autoplay stall.
    pub max_playback_retries: u32,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            ice_servers: DEFAULT_STUN_SERVERS.iter().map(|s| s.to_string()).collect(),
            talking_threshold: 0.015,
            monitor_interval: Duration::from_millis(100),
            announce_delay: Duration::from_millis(500),
            first_ping_delay: Duration::from_secs(1),
            ping_interval: Duration::from_secs(10),
            negotiation_timeout: Duration::from_secs(2),
            playback_retry_delay: Duration::from_millis(1500),
            track_retry_delay: Duration::from_millis(2500),
            max_track_attach_attempts: 3,
            max_playback_retries: 3,
        }
    }
}

impl EngineConfig {
    pub fn from_env() -> Self {
        let mut config = Self::default();
        if let Some(threshold) = env_parse::<f32>("COVE_TALKING_THRESHOLD") {
            config.talking_threshold = threshold;
        }
        if let Some(ms) = env_parse::<u64>("COVE_PING_INTERVAL_MS") {
            config.ping_interval = Duration::from_millis(ms);
        }
        if let Some(ms) = env_parse::<u64>("COVE_NEGOTIATION_TIMEOUT_MS") {
            config.negotiation_timeout = Duration::from_millis(ms);
        }
        if let Some(attempts) = env_parse::<u32>("COVE_MAX_TRACK_ATTACH_ATTEMPTS") {
            config.max_track_attach_attempts = attempts;
        }
        if let Some(attempts) = env_parse::<u32>("COVE_MAX_PLAYBACK_RETRIES") {
            config.max_playback_retries = attempts;
        }
        if let Ok(servers) = env::var("COVE_ICE_SERVERS") {
            let servers: Vec<String> = servers
                .split(',')
                .map(|s| s.trim().to_string())
                .filter(|s| !s.is_empty())
                .collect();
            if !servers.is_empty() {
                config.ice_servers = servers;
            }
        }
        config
    }
}

fn env_parse<T: std::str::FromStr>(var: &str) -> Option<T> {
    env::var(var).ok().and_then(|v| v.parse().ok())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_protocol_cadence() {
        let config = EngineConfig::default();
        assert_eq!(config.talking_threshold, 0.015);
        assert_eq!(config.monitor_interval, Duration::from_millis(100));
        assert_eq!(config.ping_interval, Duration::from_secs(10));
        assert_eq!(config.negotiation_timeout, Duration::from_secs(2));
        assert_eq!(config.ice_servers.len(), 6);
    }
}
