//! Application layer: the server's lifecycle and event-source management.
//!
//! These modules sequence calls into two abstractions injected at
//! construction, the transport engine and the host event loop.  They perform
//! no socket I/O and never block.
//!
//! # Sub-modules
//!
//! - **`lifecycle`** – The `EventLoopServer` state machine: `start`, `stop`,
//!   the poll interval accessors, and the `make_event_loop_server` factory.
//!
//! - **`notifier_bridge`** – One native readable notification per watched
//!   channel, each draining that channel in the engine.
//!
//! - **`poll_fallback`** – The periodic timer that polls channels whose
//!   native notifier misbehaves (stdin by default).
//!
//! - **`channel_plan`** – Which of the above each channel gets.

pub mod channel_plan;
pub(crate) mod dispatch;
pub mod lifecycle;
pub mod notifier_bridge;
pub mod poll_fallback;
