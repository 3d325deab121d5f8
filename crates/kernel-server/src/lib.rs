//! kernel-server library entry point.
//!
//! An event-loop integrated transport server: it wires a kernel's transport
//! sockets into a host application's single-threaded event loop so protocol
//! messages are processed without ever blocking the host's UI thread.
//!
//! Start with [`application::lifecycle::EventLoopServer`] or the
//! [`application::lifecycle::make_event_loop_server`] factory.

pub mod application;
pub mod infrastructure;
