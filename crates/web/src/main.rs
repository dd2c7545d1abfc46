mod handlers;

use std::{
    fs::File,
    io::BufReader,
    net::{Ipv4Addr, SocketAddr},
    sync::Arc,
    time::Duration,
};

use anyhow::Context;
use axum::{
    Router,
    extract::FromRef,
    http::{StatusCode, header},
};
use patchpilot_agent::AgentClient;
use patchpilot_core::config::Config;
use patchpilot_github::GitHubClient;
use patchpilot_jobs::{DeliveryCache, ReviewProcessor, ReviewQueue};
use tokio::{net::TcpListener, signal};
use tower::ServiceBuilder;
use tower_http::{
    ServiceBuilderExt,
    normalize_path::NormalizePathLayer,
    timeout::TimeoutLayer,
    trace::{DefaultMakeSpan, DefaultOnResponse, TraceLayer},
};
use tracing::Level;
use tracing_subscriber::{
    EnvFilter, Layer, filter::LevelFilter, layer::SubscriberExt, util::SubscriberInitExt,
};

use crate::handlers::build_router;

#[derive(Clone, FromRef)]
pub struct AppState {
    config: Arc<Config>,
    queue: Arc<ReviewQueue>,
    dedupe: Arc<DeliveryCache>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let env_filter = EnvFilter::builder()
        // Default to info level
        .with_default_directive(LevelFilter::INFO.into())
        .from_env_lossy();
    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer().with_filter(env_filter))
        .init();

    let config = {
        let file = BufReader::new(File::open("config.yml").context("Failed to open config file")?);
        let config: Config = serde_yaml::from_reader(file).context("Failed to parse config file")?;
        Arc::new(config)
    };

    let queue = Arc::new(ReviewQueue::new());
    let dedupe = Arc::new(DeliveryCache::new());
    configure_review_pipeline(&config, &queue)?;

    let state = AppState { config: config.clone(), queue: queue.clone(), dedupe };

    let port = config.server.port;
    let addr = SocketAddr::from((Ipv4Addr::UNSPECIFIED, port));
    tracing::info!("Web server: Listening on {}", addr);
    let listener = TcpListener::bind(addr).await.context("bind error")?;
    axum::serve(listener, app(state))
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("Web server error")?;

    queue.shutdown().await;
    tracing::info!("Shut down gracefully");
    Ok(())
}

/// Wire the GitHub and agent clients into the queue's job handler. Without
/// full credentials the server still runs and acknowledges webhooks, but
/// dequeued jobs are dropped with a warning.
fn configure_review_pipeline(config: &Config, queue: &ReviewQueue) -> anyhow::Result<()> {
    let Some(app_config) = &config.github.app else {
        tracing::warn!("GitHub app credentials not configured; reviews disabled");
        return Ok(());
    };
    let Some(agent_config) = &config.agent else {
        tracing::warn!("Agent credentials not configured; reviews disabled");
        return Ok(());
    };
    let github = Arc::new(
        GitHubClient::new(
            &config.github.api_base_url,
            app_config.id,
            &app_config.private_key_pem(),
        )
        .context("Failed to create GitHub client")?,
    );
    let agent =
        Arc::new(AgentClient::new(agent_config).context("Failed to create agent client")?);
    let processor = Arc::new(ReviewProcessor::new(github, agent));
    queue.configure_handler(Some(processor.into_handler()));
    Ok(())
}

fn app(state: AppState) -> Router {
    let sensitive_headers: Arc<[_]> = vec![header::AUTHORIZATION].into();
    let middleware = ServiceBuilder::new()
        .sensitive_request_headers(sensitive_headers.clone())
        .sensitive_response_headers(sensitive_headers)
        .layer(
            TraceLayer::new_for_http()
                .make_span_with(DefaultMakeSpan::new().level(Level::INFO))
                .on_response(DefaultOnResponse::new().level(Level::INFO)),
        )
        .layer(TimeoutLayer::with_status_code(
            StatusCode::REQUEST_TIMEOUT,
            Duration::from_secs(30),
        ))
        .layer(NormalizePathLayer::trim_trailing_slash());
    build_router().with_state(state).layer(middleware)
}

async fn shutdown_signal() {
    #[cfg(unix)]
    {
        let mut sigterm = signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("Failed to install SIGTERM handler");
        tokio::select! {
            _ = signal::ctrl_c() => {}
            _ = sigterm.recv() => {}
        }
    }
    #[cfg(not(unix))]
    {
        signal::ctrl_c().await.expect("Failed to install Ctrl-C handler");
    }
}
