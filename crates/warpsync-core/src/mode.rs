//! Warp modes
//!
//! The mode is configured per server and fixed for the life of a session.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::WarpError;

/// Policy deciding who may accelerate time and how peers follow
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum WarpMode {
    /// Warping is disabled
    None,
    /// Everyone warps freely; returning from warp branches a new subspace
    #[default]
    Subspace,
    /// One client takes control on request, others follow
    McwForce,
    /// Like McwForce, but control is granted by a vote
    McwVote,
    /// No controller; everyone follows the slowest warping peer
    McwLowest,
}

impl WarpMode {
    pub const ALL: [WarpMode; 5] = [
        WarpMode::None,
        WarpMode::Subspace,
        WarpMode::McwForce,
        WarpMode::McwVote,
        WarpMode::McwLowest,
    ];

    /// Modes with a single warp controller
    #[inline]
    pub fn has_controller(self) -> bool {
        matches!(self, WarpMode::McwForce | WarpMode::McwVote)
    }

    /// Modes where clients mirror warp announcements of their peers
    #[inline]
    pub fn mirrors_warp(self) -> bool {
        matches!(self, WarpMode::McwForce | WarpMode::McwVote | WarpMode::McwLowest)
    }

    /// Modes where a new subspace pulls every client along with it
    #[inline]
    pub fn moves_everyone_to_new_subspace(self) -> bool {
        matches!(self, WarpMode::McwForce | WarpMode::McwLowest)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            WarpMode::None => "NONE",
            WarpMode::Subspace => "SUBSPACE",
            WarpMode::McwForce => "MCW_FORCE",
            WarpMode::McwVote => "MCW_VOTE",
            WarpMode::McwLowest => "MCW_LOWEST",
        }
    }
}

impl fmt::Display for WarpMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for WarpMode {
    type Err = WarpError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        WarpMode::ALL
            .into_iter()
            .find(|m| m.as_str().eq_ignore_ascii_case(s.trim()))
            .ok_or_else(|| WarpError::InvalidConfig(format!("unknown warp mode: {s}")))
    }
}
