use std::sync::Arc;

use poem_openapi::{OpenApi, payload::Json};

use crate::presentation::http::{
    endpoints::root::{ApiState, EndpointsTags},
    responses::HealthDto,
};

pub struct HealthEndpoints {
    state: Arc<ApiState>,
}

impl HealthEndpoints {
    pub fn new(state: Arc<ApiState>) -> Self {
        Self { state }
    }
}

#[OpenApi]
impl HealthEndpoints {
    /// `degraded` when no channel is available for delivery.
    #[oai(path = "/health", method = "get", tag = EndpointsTags::Health)]
    pub async fn health(&self) -> Json<HealthDto> {
        let channels = self.state.manager.get_available_channels().await;
        Json(HealthDto {
            status: if channels.is_empty() { "degraded" } else { "ok" }.to_string(),
            channels,
            queue_attached: self.state.manager.queue().is_some(),
            shutting_down: self.state.shutdown.is_cancelled(),
        })
    }
}
