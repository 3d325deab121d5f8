//! Messages the server passes through to the transport engine.
//!
//! The server does not build or parse protocol frames.  It only forwards the
//! start-up publish message and the malformed-payload policy; everything else
//! is the engine's business.

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use uuid::Uuid;

/// How the engine treats protocol payloads that are not valid UTF-8 JSON.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ErrorHandlerPolicy {
    /// Reject the message and report a protocol error.
    #[default]
    Strict,
    /// Substitute U+FFFD for invalid sequences and continue.
    Replace,
    /// Drop invalid sequences silently.
    Ignore,
}

/// A message published on the `iopub` channel.
///
/// `start` hands one of these to the engine once every event source is in
/// place, conventionally the `starting` status broadcast.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PubMessage {
    /// Subscription topic, e.g. `"status"`.
    pub topic: String,
    /// Protocol message type, e.g. `"status"`.
    pub msg_type: String,
    /// Unique id for this message.
    pub msg_id: Uuid,
    /// JSON message content.
    pub content: Value,
}

impl PubMessage {
    /// Creates a message with a fresh random id.
    pub fn new(topic: impl Into<String>, msg_type: impl Into<String>, content: Value) -> Self {
        Self {
            topic: topic.into(),
            msg_type: msg_type.into(),
            msg_id: Uuid::new_v4(),
            content,
        }
    }

    /// The `status` broadcast announcing that the kernel is starting.
    pub fn starting() -> Self {
        Self::status("starting")
    }

    /// A `status` broadcast for the given execution state
    /// (`"starting"`, `"idle"`, `"busy"`).
    pub fn status(execution_state: &str) -> Self {
        Self::new(
            "status",
            "status",
            json!({ "execution_state": execution_state }),
        )
    }
}
