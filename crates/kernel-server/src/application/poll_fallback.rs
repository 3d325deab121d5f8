//! Poll-fallback timer.
//!
//! Some sockets cannot be given a native notifier: the stdin socket's
//! notifier fires continuously with nothing to read on Windows and on some
//! Linux distributions, which keeps a core at 100% while the application is
//! idle.  For those channels the server arms one periodic timer instead.
//!
//! On every tick the timer performs a non-blocking `has_pending` check per
//! polled channel and, when data is waiting, runs the engine's handler once.
//! The handler drains the channel, so a backlog of any size costs one check
//! and one handler call per interval, and reception latency stays under one
//! interval.
//!
//! # Re-arming
//!
//! Changing the interval while armed creates the replacement timer *before*
//! cancelling the current one, so there is no window without a pending tick.
//! The new period counts from the moment of the change.

use std::cell::Cell;
use std::rc::Rc;
use std::time::Duration;

use kernel_core::Channel;
use thiserror::Error;
use tracing::{debug, warn};

use super::dispatch::{self, WeakEngine};
use crate::infrastructure::event_loop::{HostEventLoop, RegistrationError, TimerId};

/// Poll interval used until the host configures one: 10 ms.
pub const DEFAULT_POLL_INTERVAL_SEC: f64 = 0.01;

/// Error returned for a poll interval that is not a positive, finite,
/// representable number of seconds.
#[derive(Debug, Clone, Copy, PartialEq, Error)]
#[error("poll interval must be a positive number of seconds, got {0}")]
pub struct InvalidPollInterval(pub f64);

/// A validated poll interval in seconds.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PollInterval {
    secs: f64,
    duration: Duration,
}

impl PollInterval {
    /// Validates `secs`.
    ///
    /// Positive values below one nanosecond are scheduled every nanosecond
    /// but still report the configured `secs`.
    ///
    /// # Errors
    ///
    /// Returns [`InvalidPollInterval`] for zero, negative, NaN or infinite
    /// values, and for values too large to fit in a `Duration`.
    pub fn from_secs(secs: f64) -> Result<Self, InvalidPollInterval> {
        match Duration::try_from_secs_f64(secs) {
            Ok(duration) if secs > 0.0 => Ok(Self {
                secs,
                duration: duration.max(Duration::from_nanos(1)),
            }),
            _ => Err(InvalidPollInterval(secs)),
        }
    }

    /// The interval exactly as configured.
    pub fn as_secs(self) -> f64 {
        self.secs
    }

    pub fn as_duration(self) -> Duration {
        self.duration
    }
}

impl Default for PollInterval {
    fn default() -> Self {
        Self {
            secs: DEFAULT_POLL_INTERVAL_SEC,
            duration: Duration::from_millis(10),
        }
    }
}

/// A periodic timer registered with the host event loop.
///
/// Dropping the handle cancels the timer; [`TimerHandle::release`] does the
/// same but reports failure to the caller.
pub struct TimerHandle {
    event_loop: Rc<dyn HostEventLoop>,
    id: TimerId,
    live: Rc<Cell<bool>>,
    released: bool,
}

impl TimerHandle {
    pub fn id(&self) -> TimerId {
        self.id
    }

    /// Cancels the timer, including a tick that is already due.
    ///
    /// The tick callback is disabled even if the event loop fails to cancel,
    /// so it never reaches the engine again.
    pub fn release(mut self) -> Result<(), RegistrationError> {
        self.released = true;
        self.live.set(false);
        self.event_loop.cancel_timer(self.id)
    }
}

impl Drop for TimerHandle {
    fn drop(&mut self) {
        if self.released {
            return;
        }
        self.live.set(false);
        if let Err(e) = self.event_loop.cancel_timer(self.id) {
            warn!("failed to cancel poll timer: {e}");
        }
    }
}

struct ArmedTimer {
    handle: TimerHandle,
    engine: WeakEngine,
    channels: Vec<Channel>,
}

/// The single fallback timer and its interval.
pub struct PollFallbackTimer {
    interval: PollInterval,
    armed: Option<ArmedTimer>,
}

impl PollFallbackTimer {
    pub fn new(interval: PollInterval) -> Self {
        Self {
            interval,
            armed: None,
        }
    }

    pub fn interval(&self) -> PollInterval {
        self.interval
    }

    pub fn is_armed(&self) -> bool {
        self.armed.is_some()
    }

    /// Channels checked on each tick; empty while disarmed.
    pub fn polled_channels(&self) -> &[Channel] {
        self.armed
            .as_ref()
            .map_or(&[][..], |armed| armed.channels.as_slice())
    }

    /// Arms the timer to poll `channels` in `engine`.
    ///
    /// With no channels to poll, no timer is created.
    ///
    /// # Errors
    ///
    /// Returns [`RegistrationError::TimerRejected`] if the timer is already
    /// armed, or whatever the event loop reports when it refuses the timer.
    pub fn arm(
        &mut self,
        event_loop: &Rc<dyn HostEventLoop>,
        engine: WeakEngine,
        channels: Vec<Channel>,
    ) -> Result<(), RegistrationError> {
        if self.armed.is_some() {
            return Err(RegistrationError::TimerRejected(
                "poll timer is already armed".to_string(),
            ));
        }
        if channels.is_empty() {
            return Ok(());
        }

        let handle = schedule(event_loop, &engine, &channels, self.interval)?;
        debug!(
            "polling {channels:?} every {:?}",
            self.interval.as_duration()
        );
        self.armed = Some(ArmedTimer {
            handle,
            engine,
            channels,
        });
        Ok(())
    }

    /// Changes the interval, re-arming the timer if it is armed.
    ///
    /// # Errors
    ///
    /// If the replacement timer cannot be created, the current timer and
    /// interval are kept and the event loop's error is returned.
    pub fn set_interval(&mut self, interval: PollInterval) -> Result<(), RegistrationError> {
        if let Some(armed) = self.armed.as_mut() {
            let event_loop = Rc::clone(&armed.handle.event_loop);
            let replacement = schedule(&event_loop, &armed.engine, &armed.channels, interval)?;
            let previous = std::mem::replace(&mut armed.handle, replacement);
            if let Err(e) = previous.release() {
                warn!("failed to cancel previous poll timer: {e}");
            }
            debug!("poll timer re-armed at {:?}", interval.as_duration());
        }
        self.interval = interval;
        Ok(())
    }

    /// Cancels the timer if armed.
    ///
    /// # Errors
    ///
    /// Returns the event loop's error if cancellation fails; the timer is
    /// disarmed and its callback disabled either way.
    pub fn disarm(&mut self) -> Result<(), RegistrationError> {
        match self.armed.take() {
            Some(armed) => armed.handle.release(),
            None => Ok(()),
        }
    }
}

fn schedule(
    event_loop: &Rc<dyn HostEventLoop>,
    engine: &WeakEngine,
    channels: &[Channel],
    interval: PollInterval,
) -> Result<TimerHandle, RegistrationError> {
    let live = Rc::new(Cell::new(true));
    let tick = {
        let live = Rc::clone(&live);
        let engine = engine.clone();
        let channels = channels.to_vec();
        Box::new(move || {
            if !live.get() {
                return;
            }
            for channel in &channels {
                dispatch::poll_channel(&engine, *channel);
            }
        })
    };
    let id = event_loop.create_timer(interval.as_duration(), tick)?;
    Ok(TimerHandle {
        event_loop: Rc::clone(event_loop),
        id,
        live,
        released: false,
    })
}
