//! [`HostEventLoop`] adapter over a tokio `LocalSet`.
//!
//! Each readable notifier and each timer becomes one local task:
//!
//! - notifiers wait on [`AsyncFd::readable`] and invoke the callback, then
//!   clear the readiness so the next wake-up comes from the reactor.  A
//!   callback that reports the event as not serviced keeps the readiness, and
//!   the task yields before calling it again;
//! - timers tick on a [`tokio::time::interval_at`] whose first tick is one
//!   period after creation.
//!
//! Deregistering or cancelling aborts the task.  An aborted local task is
//! never polled again, so its callback cannot run after `Ok(())` is returned.
//!
//! Tasks only make progress while the owner drives the set, either through
//! [`TokioEventLoop::run_until`] or by awaiting the set itself.  Registration
//! must happen inside a tokio runtime (the reactor is needed for `AsyncFd`).

use std::cell::RefCell;
use std::collections::HashMap;
use std::future::Future;
use std::time::Duration;

use tokio::task::{JoinHandle, LocalSet};
use tokio::time::MissedTickBehavior;
use tracing::{trace, warn};

use super::{
    HostEventLoop, NotifierId, ReadableCallback, RegistrationError, SocketDescriptor, TickCallback,
    TimerId,
};

/// Runs server callbacks as tasks on a single-threaded tokio `LocalSet`.
pub struct TokioEventLoop {
    local: LocalSet,
    next_id: RefCell<u64>,
    notifiers: RefCell<HashMap<NotifierId, JoinHandle<()>>>,
    timers: RefCell<HashMap<TimerId, JoinHandle<()>>>,
}

impl TokioEventLoop {
    pub fn new() -> Self {
        Self {
            local: LocalSet::new(),
            next_id: RefCell::new(0),
            notifiers: RefCell::new(HashMap::new()),
            timers: RefCell::new(HashMap::new()),
        }
    }

    /// Drives the loop's tasks until `future` completes.
    pub async fn run_until<F: Future>(&self, future: F) -> F::Output {
        self.local.run_until(future).await
    }

    /// Number of live notifier tasks.
    pub fn notifier_count(&self) -> usize {
        self.notifiers.borrow().len()
    }

    /// Number of live timer tasks.
    pub fn timer_count(&self) -> usize {
        self.timers.borrow().len()
    }

    fn allocate_id(&self) -> u64 {
        let mut next = self.next_id.borrow_mut();
        *next += 1;
        *next
    }
}

impl Default for TokioEventLoop {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for TokioEventLoop {
    fn drop(&mut self) {
        for (_, task) in self.notifiers.get_mut().drain() {
            task.abort();
        }
        for (_, task) in self.timers.get_mut().drain() {
            task.abort();
        }
    }
}

/// Borrowed view of a socket the engine owns; dropping it never closes the fd.
#[cfg(unix)]
struct WatchedFd(std::os::fd::RawFd);

#[cfg(unix)]
impl std::os::fd::AsRawFd for WatchedFd {
    fn as_raw_fd(&self) -> std::os::fd::RawFd {
        self.0
    }
}

impl HostEventLoop for TokioEventLoop {
    #[cfg(unix)]
    fn register_readable(
        &self,
        descriptor: SocketDescriptor,
        mut callback: ReadableCallback,
    ) -> Result<NotifierId, RegistrationError> {
        use tokio::io::unix::AsyncFd;
        use tokio::io::Interest;

        if tokio::runtime::Handle::try_current().is_err() {
            return Err(RegistrationError::Rejected {
                descriptor,
                reason: "no tokio runtime is running".to_string(),
            });
        }
        let watched = AsyncFd::with_interest(WatchedFd(descriptor.0), Interest::READABLE)
            .map_err(|e| RegistrationError::Rejected {
                descriptor,
                reason: e.to_string(),
            })?;

        let id = NotifierId(self.allocate_id());
        let task = self.local.spawn_local(async move {
            loop {
                let mut guard = match watched.readable().await {
                    Ok(guard) => guard,
                    Err(e) => {
                        warn!("readiness wait on {descriptor} failed: {e}");
                        break;
                    }
                };
                trace!("{descriptor} readable");
                if callback() {
                    guard.clear_ready();
                } else {
                    drop(guard);
                    tokio::task::yield_now().await;
                }
            }
        });
        self.notifiers.borrow_mut().insert(id, task);
        Ok(id)
    }

    #[cfg(not(unix))]
    fn register_readable(
        &self,
        descriptor: SocketDescriptor,
        _callback: ReadableCallback,
    ) -> Result<NotifierId, RegistrationError> {
        Err(RegistrationError::Rejected {
            descriptor,
            reason: "readable notifications need a unix reactor".to_string(),
        })
    }

    fn deregister(&self, id: NotifierId) -> Result<(), RegistrationError> {
        let task = self
            .notifiers
            .borrow_mut()
            .remove(&id)
            .ok_or(RegistrationError::UnknownNotifier(id))?;
        task.abort();
        Ok(())
    }

    fn create_timer(
        &self,
        interval: Duration,
        mut callback: TickCallback,
    ) -> Result<TimerId, RegistrationError> {
        if interval.is_zero() {
            return Err(RegistrationError::InvalidInterval);
        }
        if tokio::runtime::Handle::try_current().is_err() {
            return Err(RegistrationError::TimerRejected(
                "no tokio runtime is running".to_string(),
            ));
        }

        let first_tick = tokio::time::Instant::now()
            .checked_add(interval)
            .ok_or(RegistrationError::IntervalOutOfRange(interval))?;
        let id = TimerId(self.allocate_id());
        let task = self.local.spawn_local(async move {
            let mut ticker = tokio::time::interval_at(first_tick, interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                callback();
            }
        });
        self.timers.borrow_mut().insert(id, task);
        Ok(id)
    }

    fn cancel_timer(&self, id: TimerId) -> Result<(), RegistrationError> {
        let task = self
            .timers
            .borrow_mut()
            .remove(&id)
            .ok_or(RegistrationError::UnknownTimer(id))?;
        task.abort();
        Ok(())
    }
}
