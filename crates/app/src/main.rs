use std::{net::TcpListener, sync::Arc, thread};

use anyhow::{Context, Result};
use camera_server::{
    cli::Args,
    config,
    control::ControlTable,
    health,
    server::{self, ServerState},
    startup, telemetry,
};
use clap::Parser;
use tracing::info;

fn main() {
    let args = Args::parse();
    telemetry::init_tracing();

    let config = match config::load(&args.config) {
        Ok(config) => config,
        Err(err) => {
            eprintln!("{err}");
            std::process::exit(1);
        }
    };

    if let Err(err) = run(config) {
        eprintln!("{err:?}");
        std::process::exit(1);
    }
}

fn run(config: config::ServerConfig) -> Result<()> {
    let metrics = telemetry::init_metrics_recorder()?;
    let control = ControlTable::start(config.mode, config.team)?;

    #[cfg(feature = "opencv")]
    let backend = Arc::new(video_ingest::OpenCvBackend);
    #[cfg(not(feature = "opencv"))]
    let backend = Arc::new(video_ingest::FfmpegBackend::locate()?);

    let services = startup::start_services(&config, backend, control)?;

    let listener = TcpListener::bind(("0.0.0.0", config.stream_port))
        .with_context(|| format!("cannot listen on port {}", config.stream_port))?;
    let _server = server::spawn_stream_server(
        ServerState {
            hub: services.hub.clone(),
            detections: services.detections.clone(),
            control: services.control.clone(),
            metrics: Some(metrics),
        },
        listener,
    )?;

    health::spawn_health_monitor(services.camera_feeds())
        .context("Failed to spawn camera health monitor")?;
    startup::spawn_vision_loop(&services, &config.vision)?;

    info!(
        "{} camera(s) and {} switched camera(s) running",
        services.cameras.len(),
        services.switched.len()
    );
    loop {
        thread::park();
    }
}
