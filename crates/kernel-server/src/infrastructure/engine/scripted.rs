//! In-memory transport engine for tests and demos.
//!
//! A [`ScriptedContext`] creates [`ScriptedEngine`]s that share one
//! [`EngineScript`] with the context.  The script holds a message queue per
//! channel and counts every call the server makes, so a test can:
//!
//! - queue messages with [`ScriptedContext::push_message`],
//! - pump the event loop,
//! - check what was handled with [`ScriptedContext::processed`] and how many
//!   times the handler ran with [`ScriptedContext::handler_calls`].
//!
//! Failures for `open`/`close` can be scripted in advance.

use std::cell::RefCell;
use std::collections::{BTreeMap, VecDeque};
use std::rc::Rc;

use kernel_core::{Channel, ConnectionConfig, ErrorHandlerPolicy, PubMessage};

use super::{MessagingContext, TransportEngine, TransportError};
use crate::infrastructure::event_loop::SocketDescriptor;

/// Shared record of everything a scripted engine has been asked to do.
#[derive(Debug, Default)]
pub struct EngineScript {
    is_open: bool,
    open_calls: u32,
    close_calls: u32,
    heartbeat_running: bool,
    published: Vec<PubMessage>,
    policy: Option<ErrorHandlerPolicy>,
    bound_endpoints: Vec<String>,
    descriptors: BTreeMap<Channel, SocketDescriptor>,
    pending: BTreeMap<Channel, VecDeque<String>>,
    processed: BTreeMap<Channel, Vec<String>>,
    handler_calls: BTreeMap<Channel, u32>,
    pending_checks: BTreeMap<Channel, u32>,
    fail_open: Option<TransportError>,
    fail_close: Option<TransportError>,
}

/// A [`MessagingContext`] whose engines are driven by a shared script.
#[derive(Clone)]
pub struct ScriptedContext {
    script: Rc<RefCell<EngineScript>>,
}

impl ScriptedContext {
    /// Creates a context whose channels use descriptors 10 (control) to
    /// 14 (heartbeat).
    pub fn new() -> Self {
        let descriptors = Channel::ALL
            .iter()
            .zip(10..)
            .map(|(c, fd)| (*c, SocketDescriptor(fd)))
            .collect();
        Self {
            script: Rc::new(RefCell::new(EngineScript {
                descriptors,
                ..EngineScript::default()
            })),
        }
    }

    /// Queues an inbound message on `channel`.
    pub fn push_message(&self, channel: Channel, payload: impl Into<String>) {
        self.script
            .borrow_mut()
            .pending
            .entry(channel)
            .or_default()
            .push_back(payload.into());
    }

    /// Messages handled so far on `channel`, in arrival order.
    pub fn processed(&self, channel: Channel) -> Vec<String> {
        self.script
            .borrow()
            .processed
            .get(&channel)
            .cloned()
            .unwrap_or_default()
    }

    /// Messages still queued on `channel`.
    pub fn pending_count(&self, channel: Channel) -> usize {
        self.script
            .borrow()
            .pending
            .get(&channel)
            .map_or(0, VecDeque::len)
    }

    /// How many times `process_pending` ran for `channel`.
    pub fn handler_calls(&self, channel: Channel) -> u32 {
        self.script
            .borrow()
            .handler_calls
            .get(&channel)
            .copied()
            .unwrap_or(0)
    }

    /// How many times `has_pending` ran for `channel`.
    pub fn pending_checks(&self, channel: Channel) -> u32 {
        self.script
            .borrow()
            .pending_checks
            .get(&channel)
            .copied()
            .unwrap_or(0)
    }

    /// The descriptor the engine reports for `channel` once open.
    pub fn descriptor(&self, channel: Channel) -> Option<SocketDescriptor> {
        self.script.borrow().descriptors.get(&channel).copied()
    }

    /// Makes the engine report no descriptor for `channel`.
    pub fn remove_descriptor(&self, channel: Channel) {
        self.script.borrow_mut().descriptors.remove(&channel);
    }

    /// Makes the engine report `descriptor` for `channel`, e.g. a real socket
    /// a test can make readable.
    pub fn set_descriptor(&self, channel: Channel, descriptor: SocketDescriptor) {
        self.script
            .borrow_mut()
            .descriptors
            .insert(channel, descriptor);
    }

    pub fn is_open(&self) -> bool {
        self.script.borrow().is_open
    }

    pub fn open_calls(&self) -> u32 {
        self.script.borrow().open_calls
    }

    pub fn close_calls(&self) -> u32 {
        self.script.borrow().close_calls
    }

    pub fn heartbeat_running(&self) -> bool {
        self.script.borrow().heartbeat_running
    }

    /// Messages published on iopub so far.
    pub fn published(&self) -> Vec<PubMessage> {
        self.script.borrow().published.clone()
    }

    /// The payload policy the last engine was created with.
    pub fn policy(&self) -> Option<ErrorHandlerPolicy> {
        self.script.borrow().policy
    }

    /// Endpoints bound by the last successful `open`.
    pub fn bound_endpoints(&self) -> Vec<String> {
        self.script.borrow().bound_endpoints.clone()
    }

    /// Makes the next `open` fail with `error`.
    pub fn fail_next_open(&self, error: TransportError) {
        self.script.borrow_mut().fail_open = Some(error);
    }

    /// Makes the next `close` fail with `error` (the sockets still close).
    pub fn fail_next_close(&self, error: TransportError) {
        self.script.borrow_mut().fail_close = Some(error);
    }
}

impl Default for ScriptedContext {
    fn default() -> Self {
        Self::new()
    }
}

impl MessagingContext for ScriptedContext {
    fn create_engine(
        &self,
        config: &ConnectionConfig,
        policy: ErrorHandlerPolicy,
    ) -> Result<Box<dyn TransportEngine>, TransportError> {
        self.script.borrow_mut().policy = Some(policy);
        Ok(Box::new(ScriptedEngine {
            config: config.clone(),
            script: Rc::clone(&self.script),
        }))
    }
}

/// Engine created by [`ScriptedContext`].
pub struct ScriptedEngine {
    config: ConnectionConfig,
    script: Rc<RefCell<EngineScript>>,
}

impl ScriptedEngine {
    fn ensure_open(&self) -> Result<(), TransportError> {
        if self.script.borrow().is_open {
            Ok(())
        } else {
            Err(TransportError::NotOpen)
        }
    }
}

impl TransportEngine for ScriptedEngine {
    fn open(&mut self) -> Result<(), TransportError> {
        let mut script = self.script.borrow_mut();
        script.open_calls += 1;
        if let Some(error) = script.fail_open.take() {
            return Err(error);
        }
        script.bound_endpoints = Channel::ALL
            .iter()
            .map(|c| self.config.endpoint(*c))
            .collect();
        script.is_open = true;
        Ok(())
    }

    fn close(&mut self) -> Result<(), TransportError> {
        let mut script = self.script.borrow_mut();
        script.close_calls += 1;
        script.is_open = false;
        script.bound_endpoints.clear();
        match script.fail_close.take() {
            Some(error) => Err(error),
            None => Ok(()),
        }
    }

    fn start_heartbeat(&mut self) -> Result<(), TransportError> {
        self.ensure_open()?;
        self.script.borrow_mut().heartbeat_running = true;
        Ok(())
    }

    fn stop_heartbeat(&mut self) -> Result<(), TransportError> {
        self.script.borrow_mut().heartbeat_running = false;
        Ok(())
    }

    fn publish(&mut self, message: PubMessage) -> Result<(), TransportError> {
        self.ensure_open()?;
        self.script.borrow_mut().published.push(message);
        Ok(())
    }

    fn descriptor(&self, channel: Channel) -> Option<SocketDescriptor> {
        let script = self.script.borrow();
        if !script.is_open {
            return None;
        }
        script.descriptors.get(&channel).copied()
    }

    fn has_pending(&mut self, channel: Channel) -> Result<bool, TransportError> {
        self.ensure_open()?;
        let mut script = self.script.borrow_mut();
        *script.pending_checks.entry(channel).or_default() += 1;
        Ok(script.pending.get(&channel).is_some_and(|q| !q.is_empty()))
    }

    fn process_pending(&mut self, channel: Channel) -> Result<usize, TransportError> {
        self.ensure_open()?;
        let mut script = self.script.borrow_mut();
        *script.handler_calls.entry(channel).or_default() += 1;
        let drained: Vec<String> = script
            .pending
            .get_mut(&channel)
            .map(|q| q.drain(..).collect())
            .unwrap_or_default();
        let count = drained.len();
        script.processed.entry(channel).or_default().extend(drained);
        Ok(count)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn make_engine() -> (ScriptedContext, Box<dyn TransportEngine>) {
        let ctx = ScriptedContext::new();
        let engine = ctx
            .create_engine(&ConnectionConfig::default(), ErrorHandlerPolicy::Replace)
            .expect("create engine");
        (ctx, engine)
    }

    #[test]
    fn test_descriptors_are_hidden_until_open() {
        let (_ctx, mut engine) = make_engine();
        assert_eq!(engine.descriptor(Channel::Shell), None);

        engine.open().unwrap();

        assert_eq!(engine.descriptor(Channel::Control), Some(SocketDescriptor(10)));
        assert_eq!(engine.descriptor(Channel::Shell), Some(SocketDescriptor(11)));
    }

    #[test]
    fn test_process_pending_drains_whole_queue() {
        // Arrange
        let (ctx, mut engine) = make_engine();
        engine.open().unwrap();
        ctx.push_message(Channel::Shell, "execute_request");
        ctx.push_message(Channel::Shell, "kernel_info_request");

        // Act
        let handled = engine.process_pending(Channel::Shell).unwrap();

        // Assert
        assert_eq!(handled, 2);
        assert_eq!(ctx.pending_count(Channel::Shell), 0);
        assert_eq!(
            ctx.processed(Channel::Shell),
            vec!["execute_request", "kernel_info_request"]
        );
        assert_eq!(ctx.handler_calls(Channel::Shell), 1);
    }

    #[test]
    fn test_operations_before_open_fail_with_not_open() {
        let (_ctx, mut engine) = make_engine();
        assert_eq!(
            engine.has_pending(Channel::Stdin),
            Err(TransportError::NotOpen)
        );
        assert_eq!(
            engine.publish(PubMessage::starting()),
            Err(TransportError::NotOpen)
        );
    }

    #[test]
    fn test_scripted_open_failure_is_returned_once() {
        let (ctx, mut engine) = make_engine();
        let error = TransportError::Bind {
            endpoint: "tcp://127.0.0.1:0".to_string(),
            reason: "address in use".to_string(),
        };
        ctx.fail_next_open(error.clone());

        assert_eq!(engine.open(), Err(error));
        assert!(!ctx.is_open());
        assert_eq!(engine.open(), Ok(()));
        assert_eq!(ctx.open_calls(), 2);
    }

    #[test]
    fn test_context_records_policy_and_endpoints() {
        let (ctx, mut engine) = make_engine();
        engine.open().unwrap();
        assert_eq!(ctx.policy(), Some(ErrorHandlerPolicy::Replace));
        assert_eq!(ctx.bound_endpoints().len(), Channel::ALL.len());
    }
}
