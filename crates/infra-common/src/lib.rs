//! # rcs-infra-common
//!
//! Infrastructure shared by the RCS SIP engine crates:
//!
//! - [`logging`]: tracing subscriber setup
//! - [`errors`]: the infrastructure error type and context helpers
//! - [`config`]: TOML loading for configuration structs
//! - [`registry`]: the persisted integer settings store

pub mod config;
pub mod errors;
pub mod logging;
pub mod registry;

pub use errors::types::{Error, Result};
pub use registry::{FileRegistry, MemoryRegistry, Registry};
