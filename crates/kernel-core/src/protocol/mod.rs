//! Message types exchanged with the transport engine.

pub mod messages;

pub use messages::{ErrorHandlerPolicy, PubMessage};
