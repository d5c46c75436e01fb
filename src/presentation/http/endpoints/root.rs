use std::sync::Arc;

use poem_openapi::Tags;
use tokio_util::sync::CancellationToken;

use crate::application::{
    handlers::DispatchManager,
    usecases::{RetryNotificationUseCase, ScheduleNotificationUseCase},
};

#[derive(Clone)]
pub struct ApiState {
    pub manager: Arc<DispatchManager>,
    pub schedule_usecase: Arc<ScheduleNotificationUseCase>,
    pub retry_usecase: Arc<RetryNotificationUseCase>,
    /// Parent of every per-request token; cancelled on shutdown.
    pub shutdown: CancellationToken,
}

impl ApiState {
    pub fn new(manager: Arc<DispatchManager>, shutdown: CancellationToken) -> Self {
        Self {
            schedule_usecase: Arc::new(ScheduleNotificationUseCase::new(manager.clone())),
            retry_usecase: Arc::new(RetryNotificationUseCase::new(manager.clone())),
            manager,
            shutdown,
        }
    }
}

/// Enum of API sections (tags)
#[derive(Tags)]
pub enum EndpointsTags {
    Health,
    Channels,
    Notifications,
}
