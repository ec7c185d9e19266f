// Main entry point - Dependency injection and server setup
use anyhow::Context;
use chrono::{Local, Offset};
use resource_telemetry::application::clock::{Clock, SystemClock};
use resource_telemetry::application::dashboard_service::DashboardService;
use resource_telemetry::application::metrics_source::{ArchiveSource, NullArchiveSource};
use resource_telemetry::application::registry::SamplerRegistry;
use resource_telemetry::infrastructure::config::{ArchiveKind, load_config};
use resource_telemetry::infrastructure::influx_archive::InfluxArchiveSource;
use resource_telemetry::infrastructure::sysinfo_source::SysinfoLiveSource;
use resource_telemetry::presentation::app_state::AppState;
use resource_telemetry::presentation::router;
use std::net::SocketAddr;
use std::sync::Arc;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    tracing_subscriber::fmt::init();

    // Load configuration
    let config = load_config().context("Failed to load configuration")?;

    // Create sources (infrastructure layer)
    let clock: Arc<dyn Clock> = Arc::new(SystemClock);
    let archive: Arc<dyn ArchiveSource> = match (config.archive.kind, &config.influx) {
        (ArchiveKind::Influx, Some(influx)) => {
            tracing::info!("Reading archives from InfluxDB at {}", influx.host);
            Arc::new(InfluxArchiveSource::new(influx, clock.clone()))
        }
        (ArchiveKind::Influx, None) => anyhow::bail!("archive.kind is influx but [influx] is missing"),
        (ArchiveKind::None, _) => Arc::new(NullArchiveSource),
    };

    // Create services (application layer)
    let registry = Arc::new(SamplerRegistry::new(
        Arc::new(SysinfoLiveSource),
        archive,
        clock,
        config.sampler_config(),
    ));
    let offset = Local::now().offset().fix();
    let dashboard = DashboardService::new(
        registry,
        &config.dashboard.hosts,
        config.plot_config(),
        offset,
    );

    // Build router (presentation layer)
    let state = Arc::new(AppState {
        dashboard: Arc::new(dashboard),
    });
    let router = router(state);

    // Start server
    let addr: SocketAddr = config
        .server
        .bind
        .parse()
        .with_context(|| format!("Invalid bind address {}", config.server.bind))?;
    tracing::info!("Starting resource-telemetry service on {}", addr);

    axum::serve(tokio::net::TcpListener::bind(addr).await?, router).await?;

    Ok(())
}
