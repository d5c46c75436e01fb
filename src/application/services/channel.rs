use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use crate::config::NotificationConfig;
use crate::domain::errors::NotifyError;
use crate::domain::models::{ChannelKind, SendRequest, SendResponse};

/// A concrete delivery mechanism.
///
/// `send` must never panic: every failure is reported as an `Err` and the
/// dispatch manager turns it into a failed [`SendResponse`].
#[async_trait]
pub trait NotificationChannel: Send + Sync {
    fn kind(&self) -> ChannelKind;

    fn name(&self) -> &str {
        self.kind().as_str()
    }

    async fn send(
        &self,
        cancel: &CancellationToken,
        request: &SendRequest,
    ) -> Result<SendResponse, NotifyError>;

    /// Checks the channel's configuration without touching the network.
    fn validate(&self) -> Result<(), NotifyError>;

    fn is_enabled(&self) -> bool;

    fn max_retries(&self) -> u32;

    fn retry_interval(&self) -> Duration;
}

/// Builds channel instances from configuration, at startup and on reload.
pub trait ChannelFactory: Send + Sync {
    fn kinds(&self) -> Vec<ChannelKind> {
        ChannelKind::ALL.to_vec()
    }

    fn build(
        &self,
        kind: ChannelKind,
        config: &NotificationConfig,
    ) -> Result<Arc<dyn NotificationChannel>, NotifyError>;
}
