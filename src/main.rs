use std::io::Error;
use std::sync::Arc;
use std::time::Duration;

use poem::{Server, listener::TcpListener};
use tokio::main;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use tracing_subscriber::{EnvFilter, fmt};

use workorder_notify::{
    application::handlers::{DispatchManager, QueueBackoff, TaskRouter},
    config::{AppConfig, EnvConfigSource},
    infrastructure::{
        channels::DefaultChannelFactory,
        messaging::{InMemoryTaskQueue, InMemoryWorker, JetstreamConfig, JetstreamTaskQueue},
    },
    presentation::http::{endpoints::ApiState, routes},
};

const IN_MEMORY_POLL_INTERVAL: Duration = Duration::from_secs(1);
const SHUTDOWN_GRACE: Duration = Duration::from_secs(10);

#[main]
async fn main() -> Result<(), Error> {
    let config = AppConfig::try_parse().map_err(Error::other)?;
    init_tracing(config.log_json).map_err(Error::other)?;

    let server_url = format!("{}://{}:{}", config.scheme, config.host, config.port);
    let shutdown = CancellationToken::new();

    let manager = DispatchManager::new(Arc::new(EnvConfigSource), Arc::new(DefaultChannelFactory))
        .map_err(Error::other)?;
    let backoff = QueueBackoff {
        base: config.queue_retry_base,
        max: config.queue_retry_max,
    };

    let (manager, worker) = match JetstreamConfig::from_app(&config) {
        Some(jetstream) => {
            let (queue, worker) = JetstreamTaskQueue::connect(&jetstream)
                .await
                .map_err(Error::other)?;
            let manager = Arc::new(manager.with_queue(queue.clone()));
            let router = Arc::new(TaskRouter::for_manager(manager.clone(), backoff));
            (manager, worker.spawn(router, queue, shutdown.clone()))
        }
        None => {
            warn!("NATS_URL not set, queued notifications are kept in memory");
            let queue = Arc::new(InMemoryTaskQueue::new());
            let manager = Arc::new(manager.with_queue(queue.clone()));
            let router = Arc::new(TaskRouter::for_manager(manager.clone(), backoff));
            let worker = InMemoryWorker::new(
                queue,
                router,
                IN_MEMORY_POLL_INTERVAL,
                config.worker_concurrency,
            );
            (manager, worker.spawn(shutdown.clone()))
        }
    };

    info!(
        %server_url,
        channels = ?manager.get_available_channels().await,
        "starting notification service"
    );

    let state = Arc::new(ApiState::new(manager, shutdown.clone()));
    let app = routes(state, &server_url);

    let signal = shutdown.clone();
    let served = Server::new(TcpListener::bind(format!("{}:{}", config.host, config.port)))
        .run_with_graceful_shutdown(
            app,
            async move {
                let _ = tokio::signal::ctrl_c().await;
                info!("shutdown requested");
                signal.cancel();
            },
            Some(SHUTDOWN_GRACE),
        )
        .await;

    shutdown.cancel();
    if let Err(err) = worker.await {
        warn!(error = %err, "worker task ended abnormally");
    }
    served
}

fn init_tracing(json: bool) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let subscriber = fmt().with_env_filter(env_filter);
    if json {
        subscriber.json().try_init()
    } else {
        subscriber.try_init()
    }
}
