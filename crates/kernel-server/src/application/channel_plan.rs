//! Per-channel choice of readiness mechanism.
//!
//! Which sockets get a native notifier and which get the poll fallback is
//! environment knowledge, not something the server can detect.  The stdin
//! socket's notifier keeps firing with nothing to read on Windows and on some
//! Linux distributions, so the default plan polls stdin and uses notifiers for
//! shell and control.  Hosts that know better override the plan from config.

use std::collections::BTreeMap;

use kernel_core::Channel;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// How a channel's readiness reaches the engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WatchStrategy {
    /// Native readable notification from the host event loop.
    Notifier,
    /// Checked on every tick of the poll-fallback timer.
    Poll,
    /// Not watched by the server (publish-only or engine-managed).
    Unwatched,
}

/// Error returned for a plan that cannot be wired.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum PlanError {
    /// `iopub` and `heartbeat` never carry requests for the server to process.
    #[error("channel {channel} cannot be watched with {strategy:?}")]
    UnwatchableChannel {
        channel: Channel,
        strategy: WatchStrategy,
    },
}

/// Strategy for each of the kernel channels.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChannelPlan {
    strategies: BTreeMap<Channel, WatchStrategy>,
}

impl Default for ChannelPlan {
    fn default() -> Self {
        Self::all_unwatched()
            .with(Channel::Control, WatchStrategy::Notifier)
            .with(Channel::Shell, WatchStrategy::Notifier)
            .with(Channel::Stdin, WatchStrategy::Poll)
    }
}

impl ChannelPlan {
    /// A plan that watches nothing.
    pub fn all_unwatched() -> Self {
        Self {
            strategies: Channel::ALL
                .iter()
                .map(|c| (*c, WatchStrategy::Unwatched))
                .collect(),
        }
    }

    /// Returns the plan with `channel` switched to `strategy`.
    pub fn with(mut self, channel: Channel, strategy: WatchStrategy) -> Self {
        self.set(channel, strategy);
        self
    }

    pub fn set(&mut self, channel: Channel, strategy: WatchStrategy) {
        self.strategies.insert(channel, strategy);
    }

    pub fn strategy(&self, channel: Channel) -> WatchStrategy {
        self.strategies
            .get(&channel)
            .copied()
            .unwrap_or(WatchStrategy::Unwatched)
    }

    /// Checks that only request-receiving channels are watched.
    ///
    /// # Errors
    ///
    /// Returns [`PlanError::UnwatchableChannel`] for the first channel that is
    /// watched but never receives requests.
    pub fn validate(&self) -> Result<(), PlanError> {
        match self
            .strategies
            .iter()
            .find(|(c, s)| **s != WatchStrategy::Unwatched && !c.receives_requests())
        {
            Some((channel, strategy)) => Err(PlanError::UnwatchableChannel {
                channel: *channel,
                strategy: *strategy,
            }),
            None => Ok(()),
        }
    }

    /// Channels that get a native notifier, in registration order.
    pub fn notified_channels(&self) -> Vec<Channel> {
        self.channels_with(WatchStrategy::Notifier)
    }

    /// Channels serviced by the poll-fallback timer, in check order.
    pub fn polled_channels(&self) -> Vec<Channel> {
        self.channels_with(WatchStrategy::Poll)
    }

    fn channels_with(&self, strategy: WatchStrategy) -> Vec<Channel> {
        self.strategies
            .iter()
            .filter(|(_, s)| **s == strategy)
            .map(|(c, _)| *c)
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_plan_polls_stdin_and_notifies_request_channels() {
        let plan = ChannelPlan::default();
        assert_eq!(
            plan.notified_channels(),
            vec![Channel::Control, Channel::Shell]
        );
        assert_eq!(plan.polled_channels(), vec![Channel::Stdin]);
        assert_eq!(plan.strategy(Channel::IoPub), WatchStrategy::Unwatched);
        assert_eq!(plan.strategy(Channel::Heartbeat), WatchStrategy::Unwatched);
    }

    #[test]
    fn test_with_overrides_single_channel() {
        let plan = ChannelPlan::default().with(Channel::Stdin, WatchStrategy::Notifier);
        assert_eq!(
            plan.notified_channels(),
            vec![Channel::Control, Channel::Shell, Channel::Stdin]
        );
        assert!(plan.polled_channels().is_empty());
    }

    #[test]
    fn test_default_plan_is_valid() {
        assert_eq!(ChannelPlan::default().validate(), Ok(()));
        assert_eq!(ChannelPlan::all_unwatched().validate(), Ok(()));
    }

    #[test]
    fn test_watching_publish_only_channel_is_rejected() {
        let plan = ChannelPlan::default().with(Channel::IoPub, WatchStrategy::Poll);
        assert_eq!(
            plan.validate(),
            Err(PlanError::UnwatchableChannel {
                channel: Channel::IoPub,
                strategy: WatchStrategy::Poll,
            })
        );
    }

    #[test]
    fn test_heartbeat_notifier_is_rejected() {
        let plan = ChannelPlan::default().with(Channel::Heartbeat, WatchStrategy::Notifier);
        assert!(matches!(
            plan.validate(),
            Err(PlanError::UnwatchableChannel {
                channel: Channel::Heartbeat,
                ..
            })
        ));
    }

    #[test]
    fn test_all_unwatched_plan_has_no_sources() {
        let plan = ChannelPlan::all_unwatched();
        assert!(plan.notified_channels().is_empty());
        assert!(plan.polled_channels().is_empty());
    }
}
