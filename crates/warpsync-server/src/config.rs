//! Server configuration

use std::time::Duration;

use serde::{Deserialize, Serialize};

use warpsync_core::{WarpMode, RELOCK_THRESHOLD};

/// Warp-control configuration, supplied by the hosting process
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Warp policy for every session on this server
    pub warp_mode: WarpMode,
    /// Place joining players in the latest subspace rather than their last one
    pub send_player_to_latest_subspace: bool,
    /// Keep universe time advancing while nobody is connected
    pub keep_ticking_while_offline: bool,
    /// Origin label stamped on server-initiated relocks
    pub console_identifier: String,
    /// How long a controller grant lasts
    #[serde(with = "warpsync_core::human_duration")]
    pub controller_lease: Duration,
    /// How long an election stays open
    #[serde(with = "warpsync_core::human_duration")]
    pub vote_window: Duration,
    /// Rate drift a subspace absorbs before it is relocked
    pub relock_threshold: f32,
}

impl Default for ServerConfig {
    fn default() -> Self {
        ServerConfig {
            warp_mode: WarpMode::Subspace,
            send_player_to_latest_subspace: true,
            keep_ticking_while_offline: true,
            console_identifier: "Server".to_string(),
            controller_lease: Duration::from_secs(120),
            vote_window: Duration::from_secs(30),
            relock_threshold: RELOCK_THRESHOLD,
        }
    }
}

impl ServerConfig {
    pub fn with_mode(warp_mode: WarpMode) -> Self {
        ServerConfig {
            warp_mode,
            ..Default::default()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = ServerConfig::default();
        assert_eq!(config.warp_mode, WarpMode::Subspace);
        assert!(config.send_player_to_latest_subspace);
        assert!(config.keep_ticking_while_offline);
        assert_eq!(config.controller_lease, Duration::from_secs(120));
    }

    #[test]
    fn test_deserialize_partial_json() {
        let json = r#"{
            "warp_mode": "MCW_VOTE",
            "keep_ticking_while_offline": false,
            "vote_window": "45s"
        }"#;
        let config: ServerConfig = serde_json::from_str(json).unwrap();
        assert_eq!(config.warp_mode, WarpMode::McwVote);
        assert!(!config.keep_ticking_while_offline);
        assert_eq!(config.vote_window, Duration::from_secs(45));
        assert_eq!(config.console_identifier, "Server");
    }

    #[test]
    fn test_serialize_roundtrips_durations() {
        let config = ServerConfig::with_mode(WarpMode::McwForce);
        let json = serde_json::to_string(&config).unwrap();
        assert!(json.contains("\"2m\""));
        let back: ServerConfig = serde_json::from_str(&json).unwrap();
        assert_eq!(back.controller_lease, config.controller_lease);
    }
}
