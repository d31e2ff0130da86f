use anyhow::Result;
use bus_eta_alerts::{
    background_services::{
        eta_monitor::EtaMonitor,
        eta_store::EtaStore,
        geofence_alerts::{GeofenceAlertEngine, LogHaptics},
        position_consumer::consume_positions,
        zone_fetcher::run_zone_refresher,
    },
    config::Settings,
    dal::FleetApiClient,
    model::position::Position,
    web::{AppState, run_server},
};
use clap::Parser;
use dotenvy::dotenv;
use opentelemetry::trace::TracerProvider as _;
use opentelemetry_otlp::{SpanExporter, WithExportConfig};
use opentelemetry_sdk::{Resource, trace::SdkTracerProvider};
use std::{sync::Arc, time::Duration};
use tokio::{select, spawn, sync::mpsc::channel};
use tokio_util::sync::CancellationToken;
use tracing::{error, info};
use tracing_subscriber::{
    EnvFilter, Registry, filter::LevelFilter, layer::SubscriberExt, util::SubscriberInitExt,
};

const SERVICE_NAME: &str = "bus_eta_alerts";

fn tracer_provider(endpoint: &str) -> Result<SdkTracerProvider> {
    let exporter = SpanExporter::builder()
        .with_tonic()
        .with_endpoint(endpoint)
        .with_timeout(Duration::from_millis(1000))
        .build()?;

    Ok(SdkTracerProvider::builder()
        .with_batch_exporter(exporter)
        .with_resource(Resource::builder().with_service_name(SERVICE_NAME).build())
        .build())
}

#[tokio::main(flavor = "multi_thread")]
async fn main() -> Result<()> {
    _ = dotenv();
    let settings = Settings::parse();

    let provider = settings
        .otlp_endpoint
        .as_deref()
        .map(tracer_provider)
        .transpose()?;

    let telemetry_layer = provider
        .as_ref()
        .map(|p| tracing_opentelemetry::layer().with_tracer(p.tracer(SERVICE_NAME)));

    let env_filter = EnvFilter::builder()
        .with_default_directive(LevelFilter::INFO.into())
        .from_env_lossy();

    let appender = tracing_appender::rolling::daily(&settings.log_dir, "bus_eta_alerts.log");
    let (non_blocking_appender, _guard) = tracing_appender::non_blocking(appender);

    // A layer that logs events to rolling files.
    let file_log = tracing_subscriber::fmt::layer()
        .with_writer(non_blocking_appender)
        .with_ansi(false)
        .pretty();

    let stdout_log = tracing_subscriber::fmt::layer();

    Registry::default()
        .with(telemetry_layer)
        .with(file_log)
        .with(stdout_log)
        .with(env_filter)
        .init();

    info!("Fleet API at {}", settings.api_base_url);

    let alert_settings = settings.alert_settings()?;
    let timezone = settings.timezone()?;
    let client = Arc::new(FleetApiClient::new(
        &settings.api_base_url,
        settings.api_timeout(),
    )?);

    let monitor = Arc::new(EtaMonitor::new());
    monitor.initialize(client.clone());
    let store = Arc::new(EtaStore::new(monitor.clone()));
    let alerts = Arc::new(GeofenceAlertEngine::new(alert_settings, Arc::new(LogHaptics)));

    let shutdown = CancellationToken::new();
    let (position_sender, mut position_receiver) = channel::<Position>(32);

    let zone_refresher = spawn(run_zone_refresher(
        client.clone(),
        settings.driver_id.clone(),
        alerts.clone(),
        settings.zone_refresh(),
        shutdown.clone(),
    ));

    let consumer_alerts = alerts.clone();
    let position_consumer = spawn(async move {
        consume_positions(&mut position_receiver, &consumer_alerts).await;
    });

    let server = spawn(run_server(
        AppState {
            store,
            alerts,
            positions: position_sender,
            eta_options: settings.eta_options(),
            timezone,
        },
        settings.port,
        shutdown.clone(),
    ));

    select! {
        res = tokio::signal::ctrl_c() => {
            if let Err(e) = res {
                error!("Couldn't listen for ctrl-c {e:?}");
            }
            info!("Shutting down");
        },
        res = zone_refresher => {
            if let Err(e) = res {
                error!("{e:?}");
            }
        },
        res = position_consumer => {
            if let Err(e) = res {
                error!("{e:?}");
            }
        },
        res = server => {
            match res {
                Ok(Ok(())) => info!("HTTP server exited"),
                Ok(Err(e)) => error!("{e:?}"),
                Err(e) => error!("{e:?}"),
            }
        },
    }

    shutdown.cancel();
    monitor.teardown();

    if let Some(provider) = provider {
        if let Err(e) = provider.shutdown() {
            error!("Couldn't shut down tracer provider {e:?}");
        }
    }

    Ok(())
}
