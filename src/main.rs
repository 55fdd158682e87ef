use std::net::SocketAddr;
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use meter_monitor::{cli, config, db, openapi, routes, services, state};
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tower_governor::{governor::GovernorConfigBuilder, GovernorLayer};
use tower_http::cors::CorsLayer;

use services::camera_client::CameraClient;
use services::consumption_aggregator::ConsumptionAggregator;
use services::orchestrator::Orchestrator;
use services::snapshot_archive::SnapshotArchive;
use services::snapshot_prune::SnapshotPruneService;
use services::timeseries_writer::TimeSeriesWriter;
use services::vision::VisionClient;

const SHUTDOWN_GRACE: Duration = Duration::from_secs(30);

/// Distinguishes the two failure classes spec.md §6 assigns distinct exit
/// codes to from every other startup/runtime failure, which exits 1.
enum StartupError {
    Config(anyhow::Error),
    Storage(anyhow::Error),
    Other(anyhow::Error),
}

impl From<StartupError> for ExitCode {
    fn from(err: StartupError) -> Self {
        match err {
            StartupError::Config(err) => {
                eprintln!("configuration error: {err:#}");
                ExitCode::from(2)
            }
            StartupError::Storage(err) => {
                eprintln!("storage error: {err:#}");
                ExitCode::from(3)
            }
            StartupError::Other(err) => {
                eprintln!("fatal error: {err:#}");
                ExitCode::from(1)
            }
        }
    }
}

async fn bind_listener(addr: &str) -> Result<TcpListener> {
    match TcpListener::bind(addr).await {
        Ok(listener) => Ok(listener),
        Err(err) if err.kind() == std::io::ErrorKind::AddrInUse => {
            anyhow::bail!(
                "Failed to bind meter-monitor listener on {addr}: port already in use. Stop the other service using this port or set HTTP_LISTEN_ADDR to choose another one.",
            );
        }
        Err(err) => Err(err).with_context(|| format!("failed to bind meter-monitor listener on {addr}")),
    }
}

async fn run() -> Result<(), StartupError> {
    let args = cli::Args::parse();
    if args.print_openapi {
        let doc = serde_json::to_string_pretty(&openapi::openapi_json())
            .map_err(|err| StartupError::Other(err.into()))?;
        println!("{doc}");
        return Ok(());
    }

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let config_store = Arc::new(
        config::ConfigStore::load(args.meters_config, args.pricing_config)
            .map_err(|err| StartupError::Config(err.into()))?,
    );
    let runtime = config::RuntimeConfig::from_env().map_err(|err| StartupError::Config(err.into()))?;

    let pool = db::connect_lazy(&runtime.database_url).map_err(StartupError::Storage)?;
    let http = reqwest::Client::new();

    let camera_client = Arc::new(CameraClient::new(http.clone()));
    let vision_client = Arc::new(VisionClient::new(
        http.clone(),
        runtime.gemini_api_key.clone(),
        runtime.claude_api_key.clone(),
    ));

    let archive = Arc::new(SnapshotArchive::new(runtime.storage_root.clone()));
    archive
        .clean_orphaned_temp_files()
        .map_err(|err| StartupError::Storage(err.into()))?;

    let writer = Arc::new(TimeSeriesWriter::new(
        pool.clone(),
        runtime.storage_root.join("audit"),
    ));

    let orchestrator = Arc::new(Orchestrator::new(
        config_store.clone(),
        camera_client.clone(),
        vision_client.clone(),
        archive.clone(),
        writer.clone(),
    ));
    let consumption = Arc::new(ConsumptionAggregator::new(writer.clone()));

    let state = state::AppState {
        runtime: runtime.clone(),
        config: config_store.clone(),
        db: pool,
        http,
        camera_client,
        vision_client,
        archive: archive.clone(),
        writer: writer.clone(),
        orchestrator: orchestrator.clone(),
        consumption,
    };

    let cancel = CancellationToken::new();
    writer.clone().start_retry_loop(cancel.clone());
    Arc::new(SnapshotPruneService::new(
        config_store,
        archive,
        Duration::from_secs(runtime.snapshot_prune_interval_seconds),
        runtime.snapshot_max_age_days,
        runtime.snapshot_max_count,
    ))
    .start(cancel.clone());
    orchestrator.start().await;

    let governor_conf = Arc::new(
        GovernorConfigBuilder::default()
            .per_second(20)
            .burst_size(60)
            .methods(vec![axum::http::Method::POST])
            .use_headers()
            .finish()
            .ok_or_else(|| StartupError::Other(anyhow::anyhow!("failed to build rate limiter config")))?,
    );
    let governor_limiter = governor_conf.limiter().clone();
    std::thread::spawn(move || loop {
        std::thread::sleep(Duration::from_secs(60));
        governor_limiter.retain_recent();
    });

    let app = routes::router(state)
        .layer(GovernorLayer::new(governor_conf))
        .layer(CorsLayer::permissive());

    let listener = bind_listener(&runtime.http_listen_addr)
        .await
        .map_err(StartupError::Other)?;

    let shutdown_cancel = cancel.clone();
    let shutdown_orchestrator = orchestrator.clone();
    let serve_result = axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(async move {
        let _ = tokio::signal::ctrl_c().await;
        tracing::info!("shutdown signal received, stopping monitors");
        shutdown_cancel.cancel();
        shutdown_orchestrator.stop(SHUTDOWN_GRACE).await;
    })
    .await;

    cancel.cancel();
    serve_result.map_err(|err| StartupError::Other(err.into()))
}

#[tokio::main]
async fn main() -> ExitCode {
    match run().await {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => err.into(),
    }
}

#[cfg(test)]
mod tests {
    use super::bind_listener;
    use anyhow::Result;

    #[tokio::test]
    async fn reports_port_in_use_with_actionable_message() -> Result<()> {
        let listener = match std::net::TcpListener::bind("127.0.0.1:0") {
            Ok(listener) => listener,
            Err(err) if err.kind() == std::io::ErrorKind::PermissionDenied => {
                return Ok(());
            }
            Err(err) => return Err(err.into()),
        };
        let addr = listener.local_addr()?;

        let err = bind_listener(&addr.to_string()).await.unwrap_err();
        let message = err.to_string().to_lowercase();
        if message.contains("operation not permitted") {
            return Ok(());
        }

        assert!(message.contains(&addr.to_string()));
        assert!(message.contains("port already in use"));

        drop(listener);
        Ok(())
    }
}
