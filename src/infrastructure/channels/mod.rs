use std::sync::Arc;

use crate::{
    application::services::{ChannelFactory, NotificationChannel},
    config::NotificationConfig,
    domain::{errors::NotifyError, models::ChannelKind},
};

pub mod email;
pub mod feishu;

pub use email::EmailChannel;
pub use feishu::FeishuChannel;

/// Builds the SMTP and Feishu channels from their config sections.
#[derive(Debug, Clone, Copy, Default)]
pub struct DefaultChannelFactory;

impl ChannelFactory for DefaultChannelFactory {
    fn build(
        &self,
        kind: ChannelKind,
        config: &NotificationConfig,
    ) -> Result<Arc<dyn NotificationChannel>, NotifyError> {
        match kind {
            ChannelKind::Email => Ok(EmailChannel::new(config.email.clone()).into_channel()),
            ChannelKind::Feishu => Ok(FeishuChannel::new(config.feishu.clone())?.into_channel()),
        }
    }
}
