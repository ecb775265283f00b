use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use rtmp_stress::{
    api::{ApiConfig, ApiState, MetricsConfig, spawn_api_server, spawn_metrics_server},
    config::{Args, read_plan_file},
    media::{FlvFile, FlvOpener, MediaSource},
    rtmp::TcpConnector,
    session::TestSession,
};
#[cfg(feature = "remote")]
use rtmp_stress::remote::{RemoteConfig, spawn_remote_control};
use tracing::{error, info, level_filters::LevelFilter, trace};
use tracing_subscriber::{filter, layer::SubscriberExt, util::SubscriberInitExt};

fn init(level: LevelFilter) {
    let filter = filter::Targets::new().with_targets(vec![
        ("rtmp_stress", level),
        ("tower_http", LevelFilter::INFO),
    ]);
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::fmt::layer()
                .with_writer(std::io::stderr)
                .compact()
                .with_ansi(false),
        )
        .with(filter)
        .init();
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenv::dotenv().ok();
    let args = Args::parse();
    init(args.log_level);
    trace!("started with args: {args:?}");

    args.validate()?;

    // reject a missing or malformed file at boot
    let mut flv = FlvFile::open(&args.flv_file)
        .await
        .with_context(|| format!("failed to open flv file {}", args.flv_file.display()))?;
    flv.close().await;

    let session = Arc::new(TestSession::new(
        Arc::new(TcpConnector::default()),
        Arc::new(FlvOpener::new(&args.flv_file)),
        args.server.clone(),
    ));
    let state = ApiState::new(session.clone());

    spawn_metrics_server(
        MetricsConfig {
            bind_addr: args.metrics_addr,
            path: args.telemetry_path.clone(),
        },
        state.clone(),
    )
    .await?;

    spawn_api_server(
        ApiConfig {
            bind_addr: args.api_addr,
            ..Default::default()
        },
        state,
    )
    .await?;

    if let Some(plan) = &args.file {
        let request = read_plan_file(plan)?;
        match session.start(request).await {
            Ok(test_id) => info!(%test_id, "started test from plan file"),
            Err(e) => error!("failed to start test from plan file: {e}"),
        }
    }

    #[cfg(feature = "remote")]
    let remote = match &args.redis_url {
        Some(url) => Some(
            spawn_remote_control(
                RemoteConfig {
                    url: url.clone(),
                    instance: args.redis_name.clone(),
                },
                session.clone(),
            )
            .await?,
        ),
        None => None,
    };

    tokio::signal::ctrl_c()
        .await
        .context("failed to listen for shutdown signal")?;

    info!("shutting down");
    #[cfg(feature = "remote")]
    if let Some(remote) = remote {
        remote.shutdown().await;
    }
    session.stop().await
}
