//! Transport engine port.
//!
//! The engine owns the kernel's sockets and speaks the message protocol:
//! framing, signing, dispatching requests, publishing on iopub, echoing the
//! heartbeat.  The server treats it as a black box and only sequences calls
//! into it:
//!
//! ```text
//! start:  open → start_heartbeat → (register sources) → publish(init)
//! event:  has_pending? → process_pending
//! stop:   (release sources) → stop_heartbeat → close
//! ```
//!
//! # Testability
//!
//! [`scripted::ScriptedEngine`] keeps per-channel message queues in memory and
//! records every call, so the server can be tested without real sockets.

use kernel_core::{Channel, ConnectionConfig, ErrorHandlerPolicy, PubMessage};
use thiserror::Error;

use super::event_loop::SocketDescriptor;

pub mod scripted;

/// Error type for transport operations.
///
/// The server propagates these unchanged; it never retries or masks them.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum TransportError {
    #[error("failed to bind {endpoint}: {reason}")]
    Bind { endpoint: String, reason: String },
    #[error("failed to close transport: {0}")]
    Close(String),
    #[error("heartbeat management failed: {0}")]
    Heartbeat(String),
    #[error("failed to publish message: {0}")]
    Publish(String),
    #[error("socket error on {channel}: {reason}")]
    Socket { channel: Channel, reason: String },
    #[error("engine exposes no descriptor for channel {0}")]
    MissingDescriptor(Channel),
    #[error("transport is not open")]
    NotOpen,
}

/// The message-protocol engine the server feeds readiness events into.
///
/// Every method must return promptly; none may block waiting for traffic.
#[cfg_attr(test, mockall::automock)]
pub trait TransportEngine {
    /// Binds every channel socket to its configured endpoint.
    fn open(&mut self) -> Result<(), TransportError>;

    /// Closes every channel socket.  Called once per successful `open`.
    fn close(&mut self) -> Result<(), TransportError>;

    /// Starts answering on the heartbeat channel.
    fn start_heartbeat(&mut self) -> Result<(), TransportError>;

    /// Stops answering on the heartbeat channel.
    fn stop_heartbeat(&mut self) -> Result<(), TransportError>;

    /// Publishes `message` on the iopub channel.
    fn publish(&mut self, message: PubMessage) -> Result<(), TransportError>;

    /// The pollable descriptor of `channel`'s socket, once open.
    fn descriptor(&self, channel: Channel) -> Option<SocketDescriptor>;

    /// Non-blocking check for at least one complete message on `channel`.
    fn has_pending(&mut self, channel: Channel) -> Result<bool, TransportError>;

    /// Reads and dispatches every message currently available on `channel`.
    ///
    /// Returns the number of messages handled.
    fn process_pending(&mut self, channel: Channel) -> Result<usize, TransportError>;
}

/// Messaging context that engines are created from (one per kernel process).
pub trait MessagingContext {
    /// Creates an engine for the given endpoints and payload policy.
    ///
    /// The engine is created closed; the server opens it on `start`.
    fn create_engine(
        &self,
        config: &ConnectionConfig,
        policy: ErrorHandlerPolicy,
    ) -> Result<Box<dyn TransportEngine>, TransportError>;
}
