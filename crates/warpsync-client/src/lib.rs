//! warpsync Client - per-session warp coordination
//!
//! The coordinator runs once per game tick:
//! - drains server messages queued by the transport (`WarpInbox`)
//! - keeps the peer table (`PeerTable`) and election state (`MasterElection`) current
//! - applies the session's warp mode to the game (`TimeWarp`)
//! - sends warp announcements, rate reports, and controller requests

pub mod config;
pub mod game;
pub mod inbox;
pub mod peers;
pub mod election;
pub mod coordinator;

pub use config::*;
pub use game::*;
pub use inbox::*;
pub use peers::*;
pub use election::*;
pub use coordinator::*;
