//! Coordinator configuration

use std::time::Duration;

use serde::{Deserialize, Serialize};

use warpsync_core::WarpMode;

/// Per-session coordinator settings
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct CoordinatorConfig {
    /// This client's player name, as the server knows it
    pub player_name: String,
    /// Warp mode announced by the server; fixed for the session
    pub warp_mode: WarpMode,
    /// Minimum gap between two corrections while mirroring a master
    #[serde(with = "warpsync_core::human_duration")]
    pub warp_set_throttle: Duration,
    /// Interval between rate reports while locked
    #[serde(with = "warpsync_core::human_duration")]
    pub report_rate_interval: Duration,
    /// Status line refresh interval
    #[serde(with = "warpsync_core::human_duration")]
    pub status_interval: Duration,
}

impl Default for CoordinatorConfig {
    fn default() -> Self {
        CoordinatorConfig {
            player_name: "Player".to_string(),
            warp_mode: WarpMode::Subspace,
            warp_set_throttle: Duration::from_secs(1),
            report_rate_interval: Duration::from_secs(10),
            status_interval: Duration::from_millis(200),
        }
    }
}

impl CoordinatorConfig {
    pub fn new(player_name: impl Into<String>, warp_mode: WarpMode) -> Self {
        CoordinatorConfig {
            player_name: player_name.into(),
            warp_mode,
            ..Default::default()
        }
    }
}
