//! Entry points that event-source callbacks use to reach the engine.
//!
//! Callbacks live inside the host event loop, which may outlive the server,
//! so they hold only a [`WeakEngine`].  Errors cannot be returned to anyone
//! from inside the loop; they are logged instead.

use std::cell::RefCell;
use std::rc::{Rc, Weak};

use kernel_core::Channel;
use tracing::{debug, error, trace, warn};

use crate::infrastructure::engine::{TransportEngine, TransportError};

/// The engine as owned by the server.
pub(crate) type SharedEngine = Rc<RefCell<Box<dyn TransportEngine>>>;

/// The engine as seen from event-loop callbacks.
pub(crate) type WeakEngine = Weak<RefCell<Box<dyn TransportEngine>>>;

/// What became of one readiness event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Dispatch {
    /// The engine ran; this many messages were handled.
    Handled(usize),
    /// The engine was already borrowed.  The data is still waiting and the
    /// event must be delivered again.
    Deferred,
    /// The engine is gone or its handler failed (logged).
    Skipped,
}

impl Dispatch {
    /// `false` only when the event has to be delivered again.
    pub(crate) fn serviced(self) -> bool {
        self != Dispatch::Deferred
    }
}

/// Drains every available message on `channel`.
pub(crate) fn process_channel(engine: &WeakEngine, channel: Channel) -> Dispatch {
    with_engine(engine, channel, |engine| engine.process_pending(channel))
}

/// Checks `channel` without blocking and drains it once if data is waiting.
pub(crate) fn poll_channel(engine: &WeakEngine, channel: Channel) -> Dispatch {
    with_engine(engine, channel, |engine| {
        if engine.has_pending(channel)? {
            engine.process_pending(channel)
        } else {
            Ok(0)
        }
    })
}

fn with_engine<F>(engine: &WeakEngine, channel: Channel, f: F) -> Dispatch
where
    F: FnOnce(&mut dyn TransportEngine) -> Result<usize, TransportError>,
{
    let Some(engine) = engine.upgrade() else {
        debug!("engine dropped; ignoring {channel} event");
        return Dispatch::Skipped;
    };
    let Ok(mut engine) = engine.try_borrow_mut() else {
        warn!("engine busy; deferring {channel} event");
        return Dispatch::Deferred;
    };
    match f(&mut **engine) {
        Ok(handled) => {
            if handled > 0 {
                trace!("handled {handled} message(s) on {channel}");
            }
            Dispatch::Handled(handled)
        }
        Err(e) => {
            error!("processing {channel} failed: {e}");
            Dispatch::Skipped
        }
    }
}
