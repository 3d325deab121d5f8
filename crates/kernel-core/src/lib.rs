//! # kernel-core
//!
//! Shared types for the event-loop kernel server: the standard kernel channel
//! set, the connection configuration that names each channel's endpoint, and
//! the messages the server hands to its transport engine.
//!
//! This crate has zero dependencies on sockets, event loops, or UI frameworks.
//!
//! # Architecture overview
//!
//! A kernel talks to its front-ends over five sockets ("channels"):
//!
//! - **`shell`** – execution and introspection requests.
//! - **`control`** – shutdown and interrupt requests, served ahead of shell.
//! - **`stdin`** – input requests sent from the kernel back to the front-end.
//! - **`iopub`** – broadcast of outputs and status (publish only).
//! - **`heartbeat`** – echo socket proving the kernel process is alive.
//!
//! - **`domain`** – the channel set and the connection configuration.
//! - **`protocol`** – the publish message handed to the engine at start-up and
//!   the policy for malformed payloads.

pub mod domain;
pub mod protocol;

pub use domain::channel::Channel;
pub use domain::connection::{ConnectionConfig, ConnectionError};
pub use protocol::messages::{ErrorHandlerPolicy, PubMessage};
