//! warpsync Server - subspace bookkeeping and warp-control dispatch
//!
//! Components, leaves first:
//! - `SubspaceStore`: the single durable record of the latest subspace
//! - `SubspaceRegistry`: creation, re-rating, and "latest" selection
//! - `ClientSubspaceTracker`: per-connection membership and rate consensus
//! - `ConnectionHub`: per-connection outbound channels and fan-out
//! - `ControllerArbiter`: controller leases and vote bookkeeping
//! - `WarpControl`: decodes tagged messages and routes them

pub mod config;
pub mod store;
pub mod registry;
pub mod tracker;
pub mod hub;
pub mod controller;
pub mod protocol;

pub use config::*;
pub use store::*;
pub use registry::*;
pub use tracker::*;
pub use hub::*;
pub use controller::*;
pub use protocol::*;
