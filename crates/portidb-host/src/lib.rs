//! An in-memory implementation of the privileged side of the portidb
//! protocol. It answers the engine's reads, replays committed write logs and
//! upgrade actions, and is what the engine's integration tests run against.
#![warn(unreachable_pub)]

mod config;
mod error;
mod host;
mod model;

pub use config::HostConfig;
pub use error::HostError;
pub use host::MemoryHost;
