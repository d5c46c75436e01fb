use std::sync::Arc;

use poem::Result as PoemResult;
use poem_openapi::{OpenApi, param::Path, payload::Json};
use tracing::info;

use crate::{
    domain::errors::NotifyError,
    presentation::http::{
        endpoints::root::{ApiState, EndpointsTags},
        mappers::{api_error, map_stats},
        responses::{ChannelActionDto, ChannelListDto, ChannelStatsDto},
    },
};

#[derive(Clone)]
pub struct ChannelsEndpoints {
    state: Arc<ApiState>,
}

impl ChannelsEndpoints {
    pub fn new(state: Arc<ApiState>) -> Self {
        Self { state }
    }
}

#[OpenApi]
impl ChannelsEndpoints {
    /// Registered channels that are enabled.
    #[oai(path = "/channels", method = "get", tag = EndpointsTags::Channels)]
    pub async fn list_channels(&self) -> Json<ChannelListDto> {
        Json(ChannelListDto {
            channels: self.state.manager.get_available_channels().await,
        })
    }

    #[oai(path = "/channels/stats", method = "get", tag = EndpointsTags::Channels)]
    pub async fn channel_stats(&self) -> Json<Vec<ChannelStatsDto>> {
        let stats = self.state.manager.get_channel_stats().await;
        Json(stats.iter().map(map_stats).collect())
    }

    /// Checks freshly loaded configuration without swapping the live channel.
    #[oai(
        path = "/channels/:name/validate",
        method = "post",
        tag = EndpointsTags::Channels,
    )]
    pub async fn validate_channel(&self, name: Path<String>) -> PoemResult<Json<ChannelActionDto>> {
        match self.state.manager.validate_channel_config(&name.0).await {
            Ok(()) => Ok(Json(ChannelActionDto {
                channel: name.0,
                success: true,
                message: "configuration is valid".to_string(),
            })),
            Err(err @ NotifyError::ChannelNotFound(_)) => Err(api_error(err)),
            Err(err) => Ok(Json(ChannelActionDto {
                channel: name.0,
                success: false,
                message: err.to_string(),
            })),
        }
    }

    #[oai(
        path = "/channels/:name/reload",
        method = "post",
        tag = EndpointsTags::Channels,
    )]
    pub async fn reload_channel(&self, name: Path<String>) -> PoemResult<Json<ChannelActionDto>> {
        self.state
            .manager
            .reload_channel(&name.0)
            .await
            .map_err(api_error)?;
        info!(channel = %name.0, "channel reloaded via admin api");

        Ok(Json(ChannelActionDto {
            channel: name.0,
            success: true,
            message: "channel reloaded".to_string(),
        }))
    }
}
