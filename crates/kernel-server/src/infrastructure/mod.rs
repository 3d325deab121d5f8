//! Infrastructure layer for the kernel server.
//!
//! Contains the ports the application layer is written against (host event
//! loop, transport engine) with their adapters, TOML configuration storage,
//! and logging setup.
//!
//! **Dependency rule**: this layer may depend on `application` and
//! `kernel_core`; only the port traits and their error types are imported by
//! the `application` layer.

pub mod engine;
pub mod event_loop;
pub mod logging;
pub mod storage;
