use std::sync::Arc;

use poem::Route;
use poem_openapi::OpenApiService;

pub mod endpoints;
pub mod mappers;
pub mod requests;
pub mod responses;

use endpoints::{ApiState, ChannelsEndpoints, HealthEndpoints, NotificationsEndpoints};

pub type Api = (HealthEndpoints, ChannelsEndpoints, NotificationsEndpoints);

pub fn api_service(state: Arc<ApiState>, server_url: &str) -> OpenApiService<Api, ()> {
    OpenApiService::new(
        (
            HealthEndpoints::new(state.clone()),
            ChannelsEndpoints::new(state.clone()),
            NotificationsEndpoints::new(state),
        ),
        "Notification API",
        env!("CARGO_PKG_VERSION"),
    )
    .server(format!("{server_url}/api"))
}

/// The admin API under `/api` with Swagger UI at the root.
pub fn routes(state: Arc<ApiState>, server_url: &str) -> Route {
    let api = api_service(state, server_url);
    let ui = api.swagger_ui();
    Route::new().nest("/api", api).nest("/", ui)
}
