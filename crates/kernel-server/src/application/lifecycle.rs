//! EventLoopServer: lifecycle of a kernel server living inside a host
//! application's event loop.
//!
//! # States
//!
//! ```text
//!            start()                    stop()
//! Stopped ───────────► Running ───────────► Stopping ──► Stopped
//!    ▲                                                     │
//!    └─────────── start() failed: everything rolled back ◄─┘
//! ```
//!
//! - `start` opens the transport, starts the heartbeat, registers one notifier
//!   per `notifier` channel, arms the poll-fallback timer for the `poll`
//!   channels, then publishes the init message.  Every source exists before
//!   `start` returns.
//! - `stop` releases every source, stops the heartbeat and closes the
//!   transport.  No callback reaches the engine after `stop` returns.
//!
//! All of this runs on the host's event-loop thread; nothing here blocks.

use std::cell::{RefCell, RefMut};
use std::rc::Rc;

use kernel_core::{Channel, ConnectionConfig, ConnectionError, ErrorHandlerPolicy, PubMessage};
use thiserror::Error;
use tracing::{debug, info, warn};

use super::channel_plan::{ChannelPlan, PlanError};
use super::dispatch::SharedEngine;
use super::notifier_bridge::NotifierBridge;
use super::poll_fallback::{InvalidPollInterval, PollFallbackTimer, PollInterval};
use crate::infrastructure::engine::{MessagingContext, TransportEngine, TransportError};
use crate::infrastructure::event_loop::{HostEventLoop, RegistrationError};

/// Lifecycle state of a server.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ServerState {
    /// Initial state; no event sources exist.
    Stopped,
    /// All event sources are registered and the transport is open.
    Running,
    /// Teardown in progress.
    Stopping,
}

/// Error type for server operations.
#[derive(Debug, Error)]
pub enum ServerError {
    #[error("cannot {operation} while {state:?}")]
    InvalidState {
        operation: &'static str,
        state: ServerState,
    },
    #[error(transparent)]
    InvalidArgument(#[from] InvalidPollInterval),
    #[error("invalid connection configuration: {0}")]
    Connection(#[from] ConnectionError),
    #[error("invalid channel plan: {0}")]
    Plan(#[from] PlanError),
    #[error("transport engine is busy handling an event")]
    EngineBusy,
    #[error("event source registration failed: {0}")]
    Registration(#[from] RegistrationError),
    #[error("transport failure: {0}")]
    Transport(#[from] TransportError),
}

/// The server interface callers depend on, independent of how readiness
/// events reach the engine.
pub trait KernelServer {
    /// Opens the transport and starts delivering events to the engine.
    fn start(&mut self, init_message: PubMessage) -> Result<(), ServerError>;

    /// Stops delivering events and closes the transport.  Idempotent.
    fn stop(&mut self) -> Result<(), ServerError>;

    fn state(&self) -> ServerState;

    fn is_running(&self) -> bool {
        self.state() == ServerState::Running
    }
}

/// Tunables fixed at construction.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ServerSettings {
    pub poll_interval: PollInterval,
    pub plan: ChannelPlan,
}

/// Kernel server driven by a [`HostEventLoop`].
pub struct EventLoopServer {
    engine: SharedEngine,
    event_loop: Rc<dyn HostEventLoop>,
    plan: ChannelPlan,
    bridge: NotifierBridge,
    fallback: PollFallbackTimer,
    state: ServerState,
}

impl EventLoopServer {
    /// Creates a stopped server with default settings.
    ///
    /// # Errors
    ///
    /// Returns [`ServerError::Connection`] for an unusable `config` and
    /// [`ServerError::Transport`] if the context cannot create an engine.
    pub fn new(
        context: &dyn MessagingContext,
        config: &ConnectionConfig,
        policy: ErrorHandlerPolicy,
        event_loop: Rc<dyn HostEventLoop>,
    ) -> Result<Self, ServerError> {
        Self::with_settings(context, config, policy, event_loop, ServerSettings::default())
    }

    /// Creates a stopped server with explicit settings.
    ///
    /// # Errors
    ///
    /// Same as [`EventLoopServer::new`].
    pub fn with_settings(
        context: &dyn MessagingContext,
        config: &ConnectionConfig,
        policy: ErrorHandlerPolicy,
        event_loop: Rc<dyn HostEventLoop>,
        settings: ServerSettings,
    ) -> Result<Self, ServerError> {
        config.validate()?;
        let engine = context.create_engine(config, policy)?;
        Ok(Self::from_engine(engine, event_loop, settings))
    }

    /// Wraps an already created engine.
    pub fn from_engine(
        engine: Box<dyn TransportEngine>,
        event_loop: Rc<dyn HostEventLoop>,
        settings: ServerSettings,
    ) -> Self {
        Self {
            engine: Rc::new(RefCell::new(engine)),
            event_loop,
            plan: settings.plan,
            bridge: NotifierBridge::new(),
            fallback: PollFallbackTimer::new(settings.poll_interval),
            state: ServerState::Stopped,
        }
    }

    /// Sets the poll-fallback interval in seconds.
    ///
    /// While running, the timer is re-armed so the next tick comes one new
    /// interval from now.
    ///
    /// # Errors
    ///
    /// Returns [`ServerError::InvalidArgument`] for non-positive values and
    /// [`ServerError::Registration`] if the re-armed timer cannot be created.
    /// The previous interval is kept in both cases.
    pub fn set_poll_interval_sec(&mut self, seconds: f64) -> Result<(), ServerError> {
        let interval = PollInterval::from_secs(seconds)?;
        self.fallback.set_interval(interval)?;
        info!("poll interval set to {seconds}s");
        Ok(())
    }

    pub fn poll_interval_sec(&self) -> f64 {
        self.fallback.interval().as_secs()
    }

    pub fn channel_plan(&self) -> &ChannelPlan {
        &self.plan
    }

    /// Replaces the channel plan; takes effect on the next `start`.
    ///
    /// # Errors
    ///
    /// Returns [`ServerError::InvalidState`] unless the server is stopped, and
    /// [`ServerError::Plan`] if `plan` watches iopub or heartbeat.
    pub fn set_channel_plan(&mut self, plan: ChannelPlan) -> Result<(), ServerError> {
        if self.state != ServerState::Stopped {
            return Err(ServerError::InvalidState {
                operation: "change the channel plan",
                state: self.state,
            });
        }
        plan.validate()?;
        self.plan = plan;
        Ok(())
    }

    /// Channels with a registered notifier.
    pub fn watched_channels(&self) -> Vec<Channel> {
        self.bridge.channels()
    }

    /// Channels checked by the armed poll-fallback timer.
    pub fn polled_channels(&self) -> Vec<Channel> {
        self.fallback.polled_channels().to_vec()
    }

    fn engine_mut(&self) -> Result<RefMut<'_, Box<dyn TransportEngine>>, ServerError> {
        self.engine
            .try_borrow_mut()
            .map_err(|_| ServerError::EngineBusy)
    }

    /// Everything `start` does after the transport is open.
    fn establish(&mut self, init_message: PubMessage) -> Result<(), ServerError> {
        self.engine_mut()?.start_heartbeat()?;

        let weak = Rc::downgrade(&self.engine);
        for channel in self.plan.notified_channels() {
            let descriptor = self
                .engine_mut()?
                .descriptor(channel)
                .ok_or(TransportError::MissingDescriptor(channel))?;
            self.bridge
                .attach(&self.event_loop, &weak, channel, descriptor)?;
        }
        self.fallback
            .arm(&self.event_loop, weak, self.plan.polled_channels())?;

        self.engine_mut()?.publish(init_message)?;
        Ok(())
    }

    /// Releases every notifier and the timer, logging failures.
    fn release_event_sources(&mut self) {
        let failures = self.bridge.release_all();
        if failures > 0 {
            warn!("{failures} notifier(s) could not be deregistered");
        }
        if let Err(e) = self.fallback.disarm() {
            warn!("failed to cancel poll timer: {e}");
        }
    }

    /// Stops the heartbeat and closes the transport, reporting the first error.
    fn shut_down_transport(&self) -> Result<(), ServerError> {
        let mut engine = self.engine_mut()?;
        let heartbeat = engine.stop_heartbeat();
        let closed = engine.close();
        heartbeat.and(closed).map_err(ServerError::from)
    }
}

impl KernelServer for EventLoopServer {
    fn start(&mut self, init_message: PubMessage) -> Result<(), ServerError> {
        if self.state != ServerState::Stopped {
            return Err(ServerError::InvalidState {
                operation: "start",
                state: self.state,
            });
        }
        self.plan.validate()?;

        self.engine_mut()?.open()?;
        if let Err(e) = self.establish(init_message) {
            warn!("start failed, rolling back: {e}");
            self.release_event_sources();
            if let Err(close_err) = self.shut_down_transport() {
                warn!("transport shutdown during rollback failed: {close_err}");
            }
            return Err(e);
        }

        self.state = ServerState::Running;
        info!(
            "server running: notifiers on {:?}, polling {:?} every {}s",
            self.bridge.channels(),
            self.fallback.polled_channels(),
            self.poll_interval_sec()
        );
        Ok(())
    }

    fn stop(&mut self) -> Result<(), ServerError> {
        if self.state == ServerState::Stopped {
            debug!("stop requested on a stopped server");
            return Ok(());
        }

        self.state = ServerState::Stopping;
        self.release_event_sources();
        let result = self.shut_down_transport();
        self.state = ServerState::Stopped;
        info!("server stopped");
        result
    }

    fn state(&self) -> ServerState {
        self.state
    }
}

impl Drop for EventLoopServer {
    fn drop(&mut self) {
        if self.state != ServerState::Stopped {
            if let Err(e) = self.stop() {
                warn!("error while stopping dropped server: {e}");
            }
        }
    }
}

/// Builds an [`EventLoopServer`] behind the [`KernelServer`] interface.
///
/// # Errors
///
/// Same as [`EventLoopServer::with_settings`].
pub fn make_event_loop_server(
    context: &dyn MessagingContext,
    config: &ConnectionConfig,
    policy: ErrorHandlerPolicy,
    event_loop: Rc<dyn HostEventLoop>,
    settings: ServerSettings,
) -> Result<Box<dyn KernelServer>, ServerError> {
    let server = EventLoopServer::with_settings(context, config, policy, event_loop, settings)?;
    Ok(Box::new(server))
}
