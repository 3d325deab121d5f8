//! Storage infrastructure: server configuration file persistence.
//!
//! The `config` sub-module reads and writes the TOML file holding the poll
//! interval, the log level and the per-channel watch strategy, falling back
//! to defaults when no file exists yet.

pub mod config;
