//! Cooperative event loop with a virtual clock.
//!
//! `ManualEventLoop` implements [`HostEventLoop`] without touching the OS.
//! The host (or a test) drives it explicitly:
//!
//! - [`ManualEventLoop::set_readable`] marks a descriptor as having data.
//! - [`ManualEventLoop::dispatch_ready`] invokes the notifier callback of every
//!   readable descriptor once (level-triggered, like a socket notifier).
//! - [`ManualEventLoop::advance`] moves the virtual clock forward and fires
//!   every timer whose deadline falls inside the window, in deadline order.
//!
//! Registration faults can be injected to exercise the server's rollback and
//! teardown paths.
//!
//! # Re-entrancy
//!
//! Callbacks are taken out of the loop's tables while they run, so a callback
//! may freely register, deregister or cancel sources (including itself).

use std::cell::RefCell;
use std::collections::{BTreeMap, BTreeSet};
use std::time::Duration;

use super::{
    HostEventLoop, NotifierId, ReadableCallback, RegistrationError, SocketDescriptor, TickCallback,
    TimerId,
};

struct NotifierEntry {
    descriptor: SocketDescriptor,
    /// `None` while the callback is executing.
    callback: Option<ReadableCallback>,
}

struct TimerEntry {
    interval: Duration,
    /// `None` once the next tick lies beyond `Duration::MAX`.
    next_due: Option<Duration>,
    callback: Option<TickCallback>,
}

#[derive(Default)]
struct Faults {
    rejected_descriptors: BTreeSet<SocketDescriptor>,
    reject_timers: bool,
    failing_deregistrations: BTreeSet<SocketDescriptor>,
    fail_cancel: bool,
}

#[derive(Default)]
struct LoopState {
    now: Duration,
    next_id: u64,
    notifiers: BTreeMap<NotifierId, NotifierEntry>,
    timers: BTreeMap<TimerId, TimerEntry>,
    readable: BTreeSet<SocketDescriptor>,
    faults: Faults,
}

impl LoopState {
    fn allocate_id(&mut self) -> u64 {
        self.next_id += 1;
        self.next_id
    }

    /// Earliest timer due at or before `deadline`, ties broken by creation order.
    fn next_due_timer(&self, deadline: Duration) -> Option<(TimerId, Duration)> {
        self.timers
            .iter()
            .filter(|(_, t)| t.callback.is_some())
            .filter_map(|(id, t)| {
                t.next_due
                    .filter(|due| *due <= deadline)
                    .map(|due| (*id, due))
            })
            .min_by_key(|(id, due)| (*due, *id))
    }
}

/// A [`HostEventLoop`] pumped explicitly by its owner.
#[derive(Default)]
pub struct ManualEventLoop {
    state: RefCell<LoopState>,
}

impl ManualEventLoop {
    pub fn new() -> Self {
        Self::default()
    }

    /// Current virtual time, measured from loop creation.
    pub fn now(&self) -> Duration {
        self.state.borrow().now
    }

    /// Marks `descriptor` as readable (`true`) or drained (`false`).
    pub fn set_readable(&self, descriptor: SocketDescriptor, readable: bool) {
        let mut state = self.state.borrow_mut();
        if readable {
            state.readable.insert(descriptor);
        } else {
            state.readable.remove(&descriptor);
        }
    }

    /// Invokes the callback of every notifier whose descriptor is readable.
    ///
    /// Readiness stays set until [`ManualEventLoop::set_readable`] clears it,
    /// so a callback that returns `false` simply runs again on the next call.
    /// Returns the number of callbacks invoked.
    pub fn dispatch_ready(&self) -> usize {
        let ready: Vec<NotifierId> = {
            let state = self.state.borrow();
            state
                .notifiers
                .iter()
                .filter(|(_, n)| state.readable.contains(&n.descriptor))
                .map(|(id, _)| *id)
                .collect()
        };

        let mut invoked = 0;
        for id in ready {
            let callback = self
                .state
                .borrow_mut()
                .notifiers
                .get_mut(&id)
                .and_then(|n| n.callback.take());
            let Some(mut callback) = callback else {
                continue;
            };
            callback();
            invoked += 1;
            if let Some(entry) = self.state.borrow_mut().notifiers.get_mut(&id) {
                entry.callback = Some(callback);
            }
        }
        invoked
    }

    /// Advances the virtual clock by `by`, firing due timers in order.
    ///
    /// A timer with a period shorter than `by` fires once per elapsed period.
    /// The clock saturates at `Duration::MAX`.  Returns the number of ticks
    /// delivered.
    pub fn advance(&self, by: Duration) -> usize {
        let target = self.state.borrow().now.saturating_add(by);
        let mut fired = 0;

        loop {
            let callback = {
                let mut state = self.state.borrow_mut();
                let Some((id, due)) = state.next_due_timer(target) else {
                    break;
                };
                state.now = due;
                state.timers.get_mut(&id).and_then(|t| {
                    t.next_due = due.checked_add(t.interval);
                    t.callback.take().map(|cb| (id, cb))
                })
            };
            let Some((id, mut callback)) = callback else {
                continue;
            };
            callback();
            fired += 1;
            if let Some(entry) = self.state.borrow_mut().timers.get_mut(&id) {
                entry.callback = Some(callback);
            }
        }

        self.state.borrow_mut().now = target;
        fired
    }

    // ── Introspection ─────────────────────────────────────────────────────────

    /// Number of registered readable notifiers.
    pub fn notifier_count(&self) -> usize {
        self.state.borrow().notifiers.len()
    }

    /// Number of active timers.
    pub fn timer_count(&self) -> usize {
        self.state.borrow().timers.len()
    }

    /// Descriptors currently watched, in registration order.
    pub fn watched_descriptors(&self) -> Vec<SocketDescriptor> {
        self.state
            .borrow()
            .notifiers
            .values()
            .map(|n| n.descriptor)
            .collect()
    }

    /// Periods of all active timers.
    pub fn timer_intervals(&self) -> Vec<Duration> {
        self.state
            .borrow()
            .timers
            .values()
            .map(|t| t.interval)
            .collect()
    }

    /// Virtual time of the earliest pending tick, if any timer is active.
    pub fn next_tick_at(&self) -> Option<Duration> {
        self.state
            .borrow()
            .timers
            .values()
            .filter_map(|t| t.next_due)
            .min()
    }

    // ── Fault injection ───────────────────────────────────────────────────────

    /// Makes `register_readable` fail for `descriptor`.
    pub fn reject_descriptor(&self, descriptor: SocketDescriptor) {
        self.state
            .borrow_mut()
            .faults
            .rejected_descriptors
            .insert(descriptor);
    }

    /// Makes `create_timer` fail while `reject` is `true`.
    pub fn reject_timers(&self, reject: bool) {
        self.state.borrow_mut().faults.reject_timers = reject;
    }

    /// Makes `deregister` fail (leaving the notifier in place) for `descriptor`.
    pub fn fail_deregister(&self, descriptor: SocketDescriptor) {
        self.state
            .borrow_mut()
            .faults
            .failing_deregistrations
            .insert(descriptor);
    }

    /// Makes `cancel_timer` fail (leaving the timer in place) while `fail` is `true`.
    pub fn fail_cancel(&self, fail: bool) {
        self.state.borrow_mut().faults.fail_cancel = fail;
    }
}

impl HostEventLoop for ManualEventLoop {
    fn register_readable(
        &self,
        descriptor: SocketDescriptor,
        callback: ReadableCallback,
    ) -> Result<NotifierId, RegistrationError> {
        let mut state = self.state.borrow_mut();
        if state.faults.rejected_descriptors.contains(&descriptor) {
            return Err(RegistrationError::Rejected {
                descriptor,
                reason: "descriptor rejected by event loop".to_string(),
            });
        }
        let id = NotifierId(state.allocate_id());
        state.notifiers.insert(
            id,
            NotifierEntry {
                descriptor,
                callback: Some(callback),
            },
        );
        Ok(id)
    }

    fn deregister(&self, id: NotifierId) -> Result<(), RegistrationError> {
        let mut state = self.state.borrow_mut();
        let descriptor = state
            .notifiers
            .get(&id)
            .map(|n| n.descriptor)
            .ok_or(RegistrationError::UnknownNotifier(id))?;
        if state.faults.failing_deregistrations.contains(&descriptor) {
            return Err(RegistrationError::Rejected {
                descriptor,
                reason: "deregistration failed".to_string(),
            });
        }
        state.notifiers.remove(&id);
        Ok(())
    }

    fn create_timer(
        &self,
        interval: Duration,
        callback: TickCallback,
    ) -> Result<TimerId, RegistrationError> {
        if interval.is_zero() {
            return Err(RegistrationError::InvalidInterval);
        }
        let mut state = self.state.borrow_mut();
        if state.faults.reject_timers {
            return Err(RegistrationError::TimerRejected(
                "timer creation refused".to_string(),
            ));
        }
        let next_due = state
            .now
            .checked_add(interval)
            .ok_or(RegistrationError::IntervalOutOfRange(interval))?;
        let id = TimerId(state.allocate_id());
        state.timers.insert(
            id,
            TimerEntry {
                interval,
                next_due: Some(next_due),
                callback: Some(callback),
            },
        );
        Ok(id)
    }

    fn cancel_timer(&self, id: TimerId) -> Result<(), RegistrationError> {
        let mut state = self.state.borrow_mut();
        if !state.timers.contains_key(&id) {
            return Err(RegistrationError::UnknownTimer(id));
        }
        if state.faults.fail_cancel {
            return Err(RegistrationError::TimerRejected(
                "timer cancellation failed".to_string(),
            ));
        }
        state.timers.remove(&id);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::Cell;
    use std::rc::Rc;

    fn counter() -> (Rc<Cell<u32>>, TickCallback) {
        let hits = Rc::new(Cell::new(0));
        let hits_clone = Rc::clone(&hits);
        (hits, Box::new(move || hits_clone.set(hits_clone.get() + 1)))
    }

    fn readable_counter() -> (Rc<Cell<u32>>, ReadableCallback) {
        let hits = Rc::new(Cell::new(0));
        let hits_clone = Rc::clone(&hits);
        let callback: ReadableCallback = Box::new(move || {
            hits_clone.set(hits_clone.get() + 1);
            true
        });
        (hits, callback)
    }

    #[test]
    fn test_dispatch_ready_invokes_only_readable_notifiers() {
        // Arrange
        let lp = ManualEventLoop::new();
        let (a_hits, a_cb) = readable_counter();
        let (b_hits, b_cb) = readable_counter();
        lp.register_readable(SocketDescriptor(3), a_cb).unwrap();
        lp.register_readable(SocketDescriptor(4), b_cb).unwrap();

        // Act
        lp.set_readable(SocketDescriptor(4), true);
        let invoked = lp.dispatch_ready();

        // Assert
        assert_eq!(invoked, 1);
        assert_eq!(a_hits.get(), 0);
        assert_eq!(b_hits.get(), 1);
    }

    #[test]
    fn test_notifier_fires_again_while_descriptor_stays_readable() {
        let lp = ManualEventLoop::new();
        let (hits, cb) = readable_counter();
        lp.register_readable(SocketDescriptor(3), cb).unwrap();
        lp.set_readable(SocketDescriptor(3), true);

        lp.dispatch_ready();
        lp.dispatch_ready();

        assert_eq!(hits.get(), 2);
    }

    #[test]
    fn test_deregistered_notifier_is_not_invoked() {
        let lp = ManualEventLoop::new();
        let (hits, cb) = readable_counter();
        let id = lp.register_readable(SocketDescriptor(3), cb).unwrap();
        lp.set_readable(SocketDescriptor(3), true);

        lp.deregister(id).unwrap();
        lp.dispatch_ready();

        assert_eq!(hits.get(), 0);
        assert_eq!(lp.notifier_count(), 0);
    }

    #[test]
    fn test_deregister_unknown_id_fails() {
        let lp = ManualEventLoop::new();
        assert_eq!(
            lp.deregister(NotifierId(42)),
            Err(RegistrationError::UnknownNotifier(NotifierId(42)))
        );
    }

    #[test]
    fn test_timer_fires_once_per_elapsed_period() {
        // Arrange
        let lp = ManualEventLoop::new();
        let (hits, cb) = counter();
        lp.create_timer(Duration::from_millis(10), cb).unwrap();

        // Act
        let fired_early = lp.advance(Duration::from_millis(9));
        let fired_later = lp.advance(Duration::from_millis(26));

        // Assert – ticks at 10, 20, 30 ms
        assert_eq!(fired_early, 0);
        assert_eq!(fired_later, 3);
        assert_eq!(hits.get(), 3);
        assert_eq!(lp.now(), Duration::from_millis(35));
        assert_eq!(lp.next_tick_at(), Some(Duration::from_millis(40)));
    }

    #[test]
    fn test_cancelled_timer_does_not_fire() {
        let lp = ManualEventLoop::new();
        let (hits, cb) = counter();
        let id = lp.create_timer(Duration::from_millis(10), cb).unwrap();

        lp.cancel_timer(id).unwrap();
        lp.advance(Duration::from_millis(100));

        assert_eq!(hits.get(), 0);
        assert_eq!(lp.timer_count(), 0);
    }

    #[test]
    fn test_zero_interval_timer_is_rejected() {
        let lp = ManualEventLoop::new();
        let (_, cb) = counter();
        assert_eq!(
            lp.create_timer(Duration::ZERO, cb),
            Err(RegistrationError::InvalidInterval)
        );
    }

    #[test]
    fn test_timer_past_end_of_clock_is_rejected() {
        // Arrange
        let lp = ManualEventLoop::new();
        lp.advance(Duration::from_secs(4096));
        let (hits, cb) = counter();

        // Act
        let result = lp.create_timer(Duration::MAX, cb);

        // Assert
        assert_eq!(
            result,
            Err(RegistrationError::IntervalOutOfRange(Duration::MAX))
        );
        assert_eq!(lp.timer_count(), 0);
        assert_eq!(hits.get(), 0);
    }

    #[test]
    fn test_timer_retires_when_next_tick_overflows_clock() {
        // Arrange – the first tick fits, the second would not
        let lp = ManualEventLoop::new();
        let (hits, cb) = counter();
        let period = Duration::MAX - Duration::from_secs(1);
        lp.create_timer(period, cb).unwrap();

        // Act
        let fired = lp.advance(Duration::MAX);
        let fired_again = lp.advance(Duration::MAX);

        // Assert
        assert_eq!(fired, 1);
        assert_eq!(fired_again, 0);
        assert_eq!(hits.get(), 1);
        assert_eq!(lp.now(), Duration::MAX);
        assert_eq!(lp.next_tick_at(), None);
        assert_eq!(lp.timer_count(), 1);
    }

    #[test]
    fn test_callback_may_cancel_its_own_timer() {
        // Arrange – the tick callback cancels the timer on its first run
        let lp = Rc::new(ManualEventLoop::new());
        let id_slot: Rc<Cell<Option<TimerId>>> = Rc::new(Cell::new(None));
        let hits = Rc::new(Cell::new(0));
        let cb = {
            let lp = Rc::clone(&lp);
            let id_slot = Rc::clone(&id_slot);
            let hits = Rc::clone(&hits);
            Box::new(move || {
                hits.set(hits.get() + 1);
                if let Some(id) = id_slot.get() {
                    lp.cancel_timer(id).unwrap();
                }
            })
        };
        let id = lp.create_timer(Duration::from_millis(5), cb).unwrap();
        id_slot.set(Some(id));

        // Act
        lp.advance(Duration::from_millis(50));

        // Assert
        assert_eq!(hits.get(), 1);
        assert_eq!(lp.timer_count(), 0);
    }

    #[test]
    fn test_injected_faults_reject_registration() {
        let lp = ManualEventLoop::new();
        lp.reject_descriptor(SocketDescriptor(7));
        lp.reject_timers(true);

        let (_, cb) = readable_counter();
        assert!(matches!(
            lp.register_readable(SocketDescriptor(7), cb),
            Err(RegistrationError::Rejected { .. })
        ));
        let (_, cb) = counter();
        assert!(matches!(
            lp.create_timer(Duration::from_millis(1), cb),
            Err(RegistrationError::TimerRejected(_))
        ));
    }

    #[test]
    fn test_failing_deregistration_keeps_notifier() {
        let lp = ManualEventLoop::new();
        let (_, cb) = readable_counter();
        let id = lp.register_readable(SocketDescriptor(9), cb).unwrap();
        lp.fail_deregister(SocketDescriptor(9));

        assert!(lp.deregister(id).is_err());
        assert_eq!(lp.notifier_count(), 1);
    }
}
