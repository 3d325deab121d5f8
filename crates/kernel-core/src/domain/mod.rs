//! Domain entities for the kernel server.
//!
//! Pure data with no infrastructure dependencies: which channels exist and
//! where each of them is reachable.

/// The standard kernel channel set.
pub mod channel;

/// Connection configuration: transport, address and one port per channel.
pub mod connection;
