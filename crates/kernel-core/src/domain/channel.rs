//! The kernel channel set.
//!
//! Every kernel exposes the same five sockets.  The server never inspects the
//! traffic on them; it only decides *how* each one is watched (native
//! notifier, poll fallback, or not at all).

use std::fmt;

use serde::{Deserialize, Serialize};

/// One of the standard kernel transport channels.
///
/// The declaration order is the order in which the server wires channels into
/// the host event loop, so `Control` is registered before `Shell`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Channel {
    /// Shutdown and interrupt requests.
    Control,
    /// Execution, completion and inspection requests.
    Shell,
    /// Input requests answered by the front-end.
    Stdin,
    /// Publish-only broadcast socket.
    #[serde(rename = "iopub")]
    IoPub,
    /// Liveness echo socket, serviced by the engine itself.
    Heartbeat,
}

impl Channel {
    /// All channels, in registration order.
    pub const ALL: [Channel; 5] = [
        Channel::Control,
        Channel::Shell,
        Channel::Stdin,
        Channel::IoPub,
        Channel::Heartbeat,
    ];

    /// The lowercase wire name of the channel (as used in connection files).
    pub fn name(self) -> &'static str {
        match self {
            Channel::Control => "control",
            Channel::Shell => "shell",
            Channel::Stdin => "stdin",
            Channel::IoPub => "iopub",
            Channel::Heartbeat => "heartbeat",
        }
    }

    /// Returns `true` for channels on which the kernel receives requests.
    ///
    /// `iopub` only publishes and `heartbeat` is echoed by the engine, so
    /// neither may be watched by the server.
    pub fn receives_requests(self) -> bool {
        matches!(self, Channel::Control | Channel::Shell | Channel::Stdin)
    }
}

impl fmt::Display for Channel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_display_matches_wire_name() {
        assert_eq!(Channel::IoPub.to_string(), "iopub");
        assert_eq!(Channel::Heartbeat.to_string(), "heartbeat");
    }

    #[test]
    fn test_registration_order_puts_control_first() {
        let mut sorted = Channel::ALL.to_vec();
        sorted.sort();
        assert_eq!(sorted, Channel::ALL.to_vec());
        assert_eq!(sorted[0], Channel::Control);
    }

    #[test]
    fn test_only_request_channels_receive_requests() {
        assert!(Channel::Shell.receives_requests());
        assert!(Channel::Control.receives_requests());
        assert!(Channel::Stdin.receives_requests());
        assert!(!Channel::IoPub.receives_requests());
        assert!(!Channel::Heartbeat.receives_requests());
    }

    #[test]
    fn test_serde_uses_lowercase_names() {
        let json = serde_json::to_string(&Channel::IoPub).unwrap();
        assert_eq!(json, "\"iopub\"");
        let parsed: Channel = serde_json::from_str("\"heartbeat\"").unwrap();
        assert_eq!(parsed, Channel::Heartbeat);
    }
}
