//! warpsync Core - Fundamental types and primitives
//!
//! This crate defines the types shared by the server and the client:
//! - Identifiers (SubspaceId, ConnectionId)
//! - Clock ticks (100 ns resolution) and subspace epochs
//! - Warp modes and rate bounds
//! - Election quorum formulas

pub mod id;
pub mod time;
pub mod subspace;
pub mod mode;
pub mod quorum;
pub mod error;
pub mod human_duration;

pub use id::*;
pub use time::*;
pub use subspace::*;
pub use mode::*;
pub use quorum::*;
pub use error::*;
