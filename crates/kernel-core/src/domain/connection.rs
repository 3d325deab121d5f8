//! Connection configuration for the kernel's transport sockets.
//!
//! The field names match the keys of a kernel connection file, so a
//! `ConnectionConfig` deserialises directly from one:
//!
//! ```json
//! {
//!   "transport": "tcp",
//!   "ip": "127.0.0.1",
//!   "control_port": 50160,
//!   "shell_port": 57503,
//!   "stdin_port": 52597,
//!   "iopub_port": 40885,
//!   "hb_port": 42540,
//!   "signature_scheme": "hmac-sha256",
//!   "key": "a0436f6c-1916-498b-8eb9-e81ab9368e84"
//! }
//! ```
//!
//! Locating and reading that file is the launcher's job; this type only
//! describes its content.

use serde::{Deserialize, Serialize};
use thiserror::Error;

use super::channel::Channel;

/// Error type for connection configuration validation.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ConnectionError {
    #[error("unsupported transport {0:?}; expected \"tcp\" or \"ipc\"")]
    UnsupportedTransport(String),
    #[error("connection ip must not be empty")]
    EmptyIp,
}

/// Addresses of the five kernel channels plus the message signing settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConnectionConfig {
    /// `"tcp"` or `"ipc"`.
    #[serde(default = "default_transport")]
    pub transport: String,
    /// Interface address for `tcp`, path prefix for `ipc`.
    #[serde(default = "default_ip")]
    pub ip: String,
    #[serde(default)]
    pub control_port: u16,
    #[serde(default)]
    pub shell_port: u16,
    #[serde(default)]
    pub stdin_port: u16,
    #[serde(default)]
    pub iopub_port: u16,
    #[serde(default)]
    pub hb_port: u16,
    /// HMAC scheme used to sign messages, e.g. `"hmac-sha256"`.
    #[serde(default = "default_signature_scheme")]
    pub signature_scheme: String,
    /// Signing key; empty disables signing.
    #[serde(default)]
    pub key: String,
}

fn default_transport() -> String {
    "tcp".to_string()
}
fn default_ip() -> String {
    "127.0.0.1".to_string()
}
fn default_signature_scheme() -> String {
    "hmac-sha256".to_string()
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self {
            transport: default_transport(),
            ip: default_ip(),
            control_port: 0,
            shell_port: 0,
            stdin_port: 0,
            iopub_port: 0,
            hb_port: 0,
            signature_scheme: default_signature_scheme(),
            key: String::new(),
        }
    }
}

impl ConnectionConfig {
    /// Returns the configured port for `channel`.  `0` means "pick any".
    pub fn port(&self, channel: Channel) -> u16 {
        match channel {
            Channel::Control => self.control_port,
            Channel::Shell => self.shell_port,
            Channel::Stdin => self.stdin_port,
            Channel::IoPub => self.iopub_port,
            Channel::Heartbeat => self.hb_port,
        }
    }

    /// Formats the endpoint the engine binds for `channel`.
    ///
    /// `tcp` endpoints look like `tcp://127.0.0.1:5555`; `ipc` endpoints join
    /// the path prefix and the port with a dash (`ipc://kernel-ipc-5555`).
    pub fn endpoint(&self, channel: Channel) -> String {
        let port = self.port(channel);
        if self.transport == "ipc" {
            format!("ipc://{}-{}", self.ip, port)
        } else {
            format!("{}://{}:{}", self.transport, self.ip, port)
        }
    }

    /// Checks the fields the engine cannot bind without.
    ///
    /// # Errors
    ///
    /// Returns [`ConnectionError::UnsupportedTransport`] for anything other
    /// than `tcp`/`ipc`, and [`ConnectionError::EmptyIp`] for a blank address.
    pub fn validate(&self) -> Result<(), ConnectionError> {
        if self.transport != "tcp" && self.transport != "ipc" {
            return Err(ConnectionError::UnsupportedTransport(self.transport.clone()));
        }
        if self.ip.trim().is_empty() {
            return Err(ConnectionError::EmptyIp);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn make_config() -> ConnectionConfig {
        ConnectionConfig {
            control_port: 50160,
            shell_port: 57503,
            stdin_port: 52597,
            iopub_port: 40885,
            hb_port: 42540,
            ..ConnectionConfig::default()
        }
    }

    #[test]
    fn test_port_maps_each_channel_to_its_field() {
        let cfg = make_config();
        assert_eq!(cfg.port(Channel::Control), 50160);
        assert_eq!(cfg.port(Channel::Shell), 57503);
        assert_eq!(cfg.port(Channel::Stdin), 52597);
        assert_eq!(cfg.port(Channel::IoPub), 40885);
        assert_eq!(cfg.port(Channel::Heartbeat), 42540);
    }

    #[test]
    fn test_tcp_endpoint_uses_colon_separator() {
        let cfg = make_config();
        assert_eq!(cfg.endpoint(Channel::Shell), "tcp://127.0.0.1:57503");
    }

    #[test]
    fn test_ipc_endpoint_uses_dash_separator() {
        let cfg = ConnectionConfig {
            transport: "ipc".to_string(),
            ip: "kernel-ipc".to_string(),
            ..make_config()
        };
        assert_eq!(cfg.endpoint(Channel::Stdin), "ipc://kernel-ipc-52597");
    }

    #[test]
    fn test_validate_accepts_default_config() {
        assert_eq!(ConnectionConfig::default().validate(), Ok(()));
    }

    #[test]
    fn test_validate_rejects_unknown_transport() {
        let cfg = ConnectionConfig {
            transport: "udp".to_string(),
            ..ConnectionConfig::default()
        };
        assert_eq!(
            cfg.validate(),
            Err(ConnectionError::UnsupportedTransport("udp".to_string()))
        );
    }

    #[test]
    fn test_validate_rejects_blank_ip() {
        let cfg = ConnectionConfig {
            ip: "  ".to_string(),
            ..ConnectionConfig::default()
        };
        assert_eq!(cfg.validate(), Err(ConnectionError::EmptyIp));
    }
}
