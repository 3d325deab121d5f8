//! Socket-notifier bridge: one native readable notification per watched
//! channel.
//!
//! Each entry turns "descriptor X is readable" into "drain channel X in the
//! engine".  The engine's handler reads every available message before it
//! returns, so a burst that arrives between two notifications is not starved
//! (notifiers are treated as level-triggered).  An event the engine was too
//! busy to take is reported back as unserviced so the loop delivers it again.
//!
//! # Ownership
//!
//! The bridge is the only owner of its [`NotifierHandle`]s.  A handle
//! deregisters itself when dropped, so a `start` that fails half-way releases
//! whatever it had registered just by dropping the bridge's entries.

use std::cell::Cell;
use std::collections::BTreeMap;
use std::rc::Rc;

use kernel_core::Channel;
use tracing::{debug, warn};

use super::dispatch::{self, WeakEngine};
use crate::infrastructure::event_loop::{
    HostEventLoop, NotifierId, RegistrationError, SocketDescriptor,
};

/// A readable notification registered with the host event loop.
///
/// Dropping the handle deregisters it; [`NotifierHandle::release`] does the
/// same but reports failure to the caller.
pub struct NotifierHandle {
    event_loop: Rc<dyn HostEventLoop>,
    id: NotifierId,
    channel: Channel,
    descriptor: SocketDescriptor,
    live: Rc<Cell<bool>>,
    released: bool,
}

impl NotifierHandle {
    pub fn id(&self) -> NotifierId {
        self.id
    }

    pub fn channel(&self) -> Channel {
        self.channel
    }

    pub fn descriptor(&self) -> SocketDescriptor {
        self.descriptor
    }

    /// Deregisters the notification.
    ///
    /// The callback is disabled even if the event loop fails to deregister,
    /// so it never reaches the engine again.
    pub fn release(mut self) -> Result<(), RegistrationError> {
        self.released = true;
        self.live.set(false);
        self.event_loop.deregister(self.id)
    }
}

impl Drop for NotifierHandle {
    fn drop(&mut self) {
        if self.released {
            return;
        }
        self.live.set(false);
        if let Err(e) = self.event_loop.deregister(self.id) {
            warn!("failed to deregister {} notifier: {e}", self.channel);
        }
    }
}

/// The set of live notifiers, keyed by channel.
#[derive(Default)]
pub struct NotifierBridge {
    entries: BTreeMap<Channel, NotifierHandle>,
}

impl NotifierBridge {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a readable notifier for `channel` that drains it in `engine`.
    ///
    /// # Errors
    ///
    /// Returns [`RegistrationError::AlreadyWatched`] if `channel` already has a
    /// notifier, or whatever the event loop reports when it refuses the
    /// descriptor.
    pub fn attach(
        &mut self,
        event_loop: &Rc<dyn HostEventLoop>,
        engine: &WeakEngine,
        channel: Channel,
        descriptor: SocketDescriptor,
    ) -> Result<(), RegistrationError> {
        if self.entries.contains_key(&channel) {
            return Err(RegistrationError::AlreadyWatched(channel));
        }

        let live = Rc::new(Cell::new(true));
        let callback = {
            let live = Rc::clone(&live);
            let engine = engine.clone();
            Box::new(move || {
                if !live.get() {
                    return true;
                }
                dispatch::process_channel(&engine, channel).serviced()
            })
        };
        let id = event_loop.register_readable(descriptor, callback)?;
        debug!("watching {channel} on {descriptor}");

        self.entries.insert(
            channel,
            NotifierHandle {
                event_loop: Rc::clone(event_loop),
                id,
                channel,
                descriptor,
                live,
                released: false,
            },
        );
        Ok(())
    }

    /// Deregisters every notifier.
    ///
    /// Keeps going past failures; each one is logged.  Returns how many
    /// notifiers could not be deregistered.
    pub fn release_all(&mut self) -> usize {
        let mut failures = 0;
        for (channel, handle) in std::mem::take(&mut self.entries) {
            match handle.release() {
                Ok(()) => debug!("stopped watching {channel}"),
                Err(e) => {
                    warn!("failed to deregister {channel} notifier: {e}");
                    failures += 1;
                }
            }
        }
        failures
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Watched channels in registration order.
    pub fn channels(&self) -> Vec<Channel> {
        self.entries.keys().copied().collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::application::dispatch::SharedEngine;
    use crate::infrastructure::engine::scripted::ScriptedContext;
    use crate::infrastructure::engine::MessagingContext;
    use crate::infrastructure::event_loop::manual::ManualEventLoop;
    use kernel_core::{ConnectionConfig, ErrorHandlerPolicy};
    use std::cell::RefCell;

    struct Fixture {
        ctx: ScriptedContext,
        engine: SharedEngine,
        lp: Rc<ManualEventLoop>,
        host: Rc<dyn HostEventLoop>,
    }

    fn make_fixture() -> Fixture {
        let ctx = ScriptedContext::new();
        let mut engine = ctx
            .create_engine(&ConnectionConfig::default(), ErrorHandlerPolicy::Strict)
            .unwrap();
        engine.open().unwrap();
        let lp = Rc::new(ManualEventLoop::new());
        let host: Rc<dyn HostEventLoop> = lp.clone();
        Fixture {
            ctx,
            engine: Rc::new(RefCell::new(engine)),
            lp,
            host,
        }
    }

    #[test]
    fn test_attach_registers_one_notifier_per_channel() {
        // Arrange
        let f = make_fixture();
        let mut bridge = NotifierBridge::new();
        let weak = Rc::downgrade(&f.engine);

        // Act
        bridge
            .attach(&f.host, &weak, Channel::Shell, SocketDescriptor(11))
            .unwrap();
        bridge
            .attach(&f.host, &weak, Channel::Control, SocketDescriptor(10))
            .unwrap();

        // Assert
        assert_eq!(bridge.len(), 2);
        assert_eq!(bridge.channels(), vec![Channel::Control, Channel::Shell]);
        assert_eq!(f.lp.notifier_count(), 2);
    }

    #[test]
    fn test_attach_rejects_duplicate_channel() {
        let f = make_fixture();
        let mut bridge = NotifierBridge::new();
        let weak = Rc::downgrade(&f.engine);
        bridge
            .attach(&f.host, &weak, Channel::Shell, SocketDescriptor(11))
            .unwrap();

        let result = bridge.attach(&f.host, &weak, Channel::Shell, SocketDescriptor(11));

        assert_eq!(result, Err(RegistrationError::AlreadyWatched(Channel::Shell)));
        assert_eq!(f.lp.notifier_count(), 1);
    }

    #[test]
    fn test_readable_notification_drains_channel() {
        // Arrange
        let f = make_fixture();
        let mut bridge = NotifierBridge::new();
        bridge
            .attach(&f.host, &Rc::downgrade(&f.engine), Channel::Shell, SocketDescriptor(11))
            .unwrap();
        for i in 0..4 {
            f.ctx.push_message(Channel::Shell, format!("request-{i}"));
        }

        // Act
        f.lp.set_readable(SocketDescriptor(11), true);
        f.lp.dispatch_ready();

        // Assert – one handler call consumed the whole burst
        assert_eq!(f.ctx.handler_calls(Channel::Shell), 1);
        assert_eq!(f.ctx.processed(Channel::Shell).len(), 4);
    }

    #[test]
    fn test_event_deferred_by_busy_engine_is_handled_on_redelivery() {
        // Arrange
        let f = make_fixture();
        let mut bridge = NotifierBridge::new();
        bridge
            .attach(&f.host, &Rc::downgrade(&f.engine), Channel::Shell, SocketDescriptor(11))
            .unwrap();
        f.ctx.push_message(Channel::Shell, "execute_request");
        f.lp.set_readable(SocketDescriptor(11), true);

        // Act – first delivery while the engine is borrowed elsewhere
        {
            let _busy = f.engine.borrow_mut();
            f.lp.dispatch_ready();
        }
        let pending_while_busy = f.ctx.pending_count(Channel::Shell);
        f.lp.dispatch_ready();

        // Assert
        assert_eq!(pending_while_busy, 1);
        assert_eq!(f.ctx.processed(Channel::Shell), vec!["execute_request"]);
    }

    #[test]
    fn test_release_all_deregisters_everything() {
        let f = make_fixture();
        let mut bridge = NotifierBridge::new();
        let weak = Rc::downgrade(&f.engine);
        bridge
            .attach(&f.host, &weak, Channel::Shell, SocketDescriptor(11))
            .unwrap();
        bridge
            .attach(&f.host, &weak, Channel::Control, SocketDescriptor(10))
            .unwrap();

        let failures = bridge.release_all();

        assert_eq!(failures, 0);
        assert!(bridge.is_empty());
        assert_eq!(f.lp.notifier_count(), 0);
    }

    #[test]
    fn test_release_all_continues_past_failure_and_silences_callback() {
        // Arrange – deregistration of control fails
        let f = make_fixture();
        let mut bridge = NotifierBridge::new();
        let weak = Rc::downgrade(&f.engine);
        bridge
            .attach(&f.host, &weak, Channel::Control, SocketDescriptor(10))
            .unwrap();
        bridge
            .attach(&f.host, &weak, Channel::Shell, SocketDescriptor(11))
            .unwrap();
        f.lp.fail_deregister(SocketDescriptor(10));

        // Act
        let failures = bridge.release_all();
        f.ctx.push_message(Channel::Control, "shutdown_request");
        f.lp.set_readable(SocketDescriptor(10), true);
        f.lp.dispatch_ready();

        // Assert – shell was still released; the stuck control notifier is inert
        assert_eq!(failures, 1);
        assert!(bridge.is_empty());
        assert_eq!(f.lp.watched_descriptors(), vec![SocketDescriptor(10)]);
        assert_eq!(f.ctx.handler_calls(Channel::Control), 0);
    }

    #[test]
    fn test_dropping_bridge_deregisters_notifiers() {
        let f = make_fixture();
        {
            let mut bridge = NotifierBridge::new();
            bridge
                .attach(&f.host, &Rc::downgrade(&f.engine), Channel::Shell, SocketDescriptor(11))
                .unwrap();
            assert_eq!(f.lp.notifier_count(), 1);
        }
        assert_eq!(f.lp.notifier_count(), 0);
    }
}
