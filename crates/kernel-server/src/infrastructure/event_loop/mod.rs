//! Host event loop port and adapters.
//!
//! The server never blocks and never spawns threads.  Everything it does after
//! `start` returns happens inside callbacks that the host application's event
//! loop invokes on its own (UI) thread.  [`HostEventLoop`] is the narrow
//! surface the server needs from that loop:
//!
//! - "call me when this descriptor is readable" (`register_readable`/`deregister`)
//! - "call me every N milliseconds" (`create_timer`/`cancel_timer`)
//!
//! # Adapters
//!
//! - [`manual::ManualEventLoop`] – a cooperative scheduler with a virtual
//!   clock, pumped explicitly by the host.  Deterministic, so the server's
//!   tests use it too.
//! - [`tokio_local::TokioEventLoop`] – runs callbacks on a tokio `LocalSet`
//!   using `AsyncFd` readiness and `tokio::time` intervals.
//!
//! A GUI toolkit binding would implement the same trait over its native
//! socket-notifier and timer objects.

use std::fmt;
use std::time::Duration;

use thiserror::Error;

pub mod manual;
pub mod tokio_local;

#[cfg(unix)]
pub type RawDescriptor = std::os::fd::RawFd;
#[cfg(windows)]
pub type RawDescriptor = std::os::windows::io::RawSocket;

/// OS-level descriptor of a transport socket, as reported by the engine.
///
/// The server never owns or closes the underlying socket.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct SocketDescriptor(pub RawDescriptor);

impl fmt::Display for SocketDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "fd {}", self.0)
    }
}

/// Identifies a readable notification registered with a [`HostEventLoop`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct NotifierId(pub u64);

/// Identifies a periodic timer created on a [`HostEventLoop`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct TimerId(pub u64);

/// Invoked by the event loop each time the watched descriptor is readable.
///
/// Returns `false` when the event could not be serviced yet; the loop must
/// then report the descriptor as readable again even if no new data arrives.
pub type ReadableCallback = Box<dyn FnMut() -> bool>;

/// Invoked by the event loop on every timer period.
pub type TickCallback = Box<dyn FnMut()>;

/// Error type for event source registration and release.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum RegistrationError {
    #[error("event loop refused to watch {descriptor}: {reason}")]
    Rejected {
        descriptor: SocketDescriptor,
        reason: String,
    },
    #[error("event loop refused to create a timer: {0}")]
    TimerRejected(String),
    #[error("timer interval must be non-zero")]
    InvalidInterval,
    #[error("timer interval {0:?} runs past the end of the loop's clock")]
    IntervalOutOfRange(Duration),
    #[error("notifier {0:?} is not registered")]
    UnknownNotifier(NotifierId),
    #[error("timer {0:?} is not active")]
    UnknownTimer(TimerId),
    #[error("channel {0} already has a notifier")]
    AlreadyWatched(kernel_core::Channel),
}

/// The scheduling services the server consumes from the host application.
///
/// All methods are called from the thread that runs the loop, and callbacks
/// are invoked on that same thread, so nothing here is `Send`.
///
/// Implementations must guarantee that once `deregister`/`cancel_timer`
/// returns `Ok`, the corresponding callback is never invoked again.
pub trait HostEventLoop {
    /// Watches `descriptor` and invokes `callback` whenever it is readable.
    fn register_readable(
        &self,
        descriptor: SocketDescriptor,
        callback: ReadableCallback,
    ) -> Result<NotifierId, RegistrationError>;

    /// Stops watching the descriptor registered under `id`.
    fn deregister(&self, id: NotifierId) -> Result<(), RegistrationError>;

    /// Invokes `callback` every `interval`, starting one interval from now.
    fn create_timer(
        &self,
        interval: Duration,
        callback: TickCallback,
    ) -> Result<TimerId, RegistrationError>;

    /// Cancels the timer created under `id`, including any pending tick.
    fn cancel_timer(&self, id: TimerId) -> Result<(), RegistrationError>;
}
