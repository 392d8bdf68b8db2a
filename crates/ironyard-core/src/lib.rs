//! ironyard-core — shared types and configuration for the ironyard scheduler.
//!
//! Everything that crosses a crate boundary lives here: the request model
//! handed to the scheduler (`RequestSpec`, `FilterProperties`), node
//! snapshots used by filters and weighers (`NodeState`), server groups and
//! aggregates, and the TOML-backed `SchedulerConfig`.

pub mod config;
pub mod types;

pub use config::{ConfigError, SchedulerConfig, parse_duration};
pub use types::*;
