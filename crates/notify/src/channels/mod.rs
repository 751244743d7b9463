//! Ways of reaching an operator.

pub mod phone;

use async_trait::async_trait;

use crate::error::ChannelError;
use crate::events::NotifyEvent;

/// One way of delivering a [`NotifyEvent`] to a person.
#[async_trait]
pub trait NotifyChannel: Send + Sync {
    /// Short identifier used in logs.
    fn name(&self) -> &'static str;

    /// Whether the channel has what it needs to deliver. Disabled channels
    /// are skipped by the notifier.
    fn enabled(&self) -> bool;

    /// Deliver `event`; returns once the receiving service has answered.
    async fn send(&self, event: &NotifyEvent) -> Result<(), ChannelError>;
}
