//! warpsync Time - clocks and subspace timelines
//!
//! This crate implements:
//! - The wall clock collaborator (`Clock`), real and manual
//! - The client's view of subspaces: known epochs, the locked subspace,
//!   and the skew rate it reports for rate consensus

pub mod clock;
pub mod subspace_clock;

pub use clock::*;
pub use subspace_clock::*;
