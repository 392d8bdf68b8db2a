//! ironyardd — the ironyard scheduler daemon.
//!
//! Wires the placement client, node cache and filter scheduler together
//! from a TOML config and serves the RPC facade over HTTP.

pub mod rpc;
pub mod services;

pub use rpc::build_router;
pub use services::{Services, build};
