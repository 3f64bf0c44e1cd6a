//! proximity-mesh - Main entry point
//!
//! Drives one mesh participant over the in-process loopback transport.
//! Events are read from stdin as JSON lines, see `mesh::events`.

mod args;

use args::Args;
use clap::Parser;
use log::{debug, error, info, warn};
use proximity_mesh::config::Config;
use proximity_mesh::loopback::{LoopbackMedia, LoopbackTransport, RecordingNotifier, RecordingSurface};
use proximity_mesh::mesh::events::StatusReport;
use proximity_mesh::mesh::MeshError;
use proximity_mesh::{ControlKind, ControlSurface, MeshEvent, MeshSession};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::signal;
use tokio::sync::mpsc;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Parse command line arguments
    let args = Args::parse();

    let config = match args.load_config() {
        Ok(cfg) => cfg,
        Err(e) => {
            eprintln!("Failed to load config {:?}: {}, using defaults", args.config, e);
            Config::default()
        }
    };

    let log_level = if args.verbose { "debug" } else { config.logging.level.as_str() };
    env_logger::Builder::new()
        .parse_filters(&std::env::var("PROXMESH_LOG").unwrap_or_else(|_| log_level.to_string()))
        .init();

    info!("proximity-mesh v{}", env!("CARGO_PKG_VERSION"));

    if let Err(e) = config.validate() {
        error!("Invalid configuration: {}", e);
        return Err(e);
    }

    // Loopback collaborators
    let (events_tx, events_rx) = mpsc::unbounded_channel();
    let transport = Arc::new(
        LoopbackTransport::new(events_tx)
            .with_stream_delay(Duration::from_millis(config.loopback.stream_delay_ms)),
    );
    transport.set_fail_calls(config.loopback.fail_calls);

    let mut platform = LoopbackMedia::new();
    if config.loopback.deny_media {
        platform = platform.deny();
    }
    if config.loopback.permission_granted {
        platform = platform.with_prior_grant();
    }

    let surface = Arc::new(RecordingSurface::default());
    let notifier = Arc::new(RecordingNotifier::default());
    let session = Arc::new(MeshSession::new(
        &args.identity(),
        &config,
        transport.clone(),
        Arc::new(platform),
        surface,
        notifier,
    ));

    let run_handle = tokio::spawn(session.clone().run(events_rx));

    let probe = config.media.probe_prior_permission && !args.no_probe;
    session.start(probe).await?;

    let mut controls = ControlSurface::new();
    controls.refresh(&session);

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let shutdown = signal::ctrl_c();
    tokio::pin!(shutdown);

    loop {
        tokio::select! {
            _ = &mut shutdown => {
                info!("Shutdown signal received");
                break;
            }
            line = lines.next_line() => {
                match line {
                    Ok(Some(line)) => {
                        let line = line.trim();
                        if line.is_empty() {
                            continue;
                        }
                        match MeshEvent::from_json(line) {
                            Ok(event) => dispatch(event, &session, &transport, &mut controls).await,
                            Err(e) => warn!("{}", e),
                        }
                    }
                    Ok(None) => {
                        debug!("stdin closed");
                        break;
                    }
                    Err(e) => {
                        error!("Failed to read stdin: {}", e);
                        break;
                    }
                }
            }
        }
    }

    session.shutdown();
    run_handle.abort();
    let _ = run_handle.await;
    info!("proximity-mesh stopped");

    Ok(())
}

async fn dispatch(
    event: MeshEvent,
    session: &Arc<MeshSession>,
    transport: &LoopbackTransport,
    controls: &mut ControlSurface,
) {
    match event {
        MeshEvent::Near { peer } => match session.connect(&peer).await {
            Ok(()) => {}
            Err(MeshError::MediaNotReady) => info!("{} is near; waiting for local media", peer),
            Err(e) => debug!("Connect to {} failed: {}", peer, e),
        },
        MeshEvent::Far { peer } => {
            session.disconnect(&peer);
        }
        MeshEvent::Offer { peer } => transport.ring(&peer),
        MeshEvent::Hangup { peer, direction } => {
            if !transport.remote_hangup(&session.address_of(&peer), direction.into()) {
                debug!("No open call with {} to hang up", peer);
            }
        }
        MeshEvent::Mic => {
            let icon = controls.activate(ControlKind::Microphone, session).await;
            info!("Microphone icon: {:?}", icon);
        }
        MeshEvent::Camera => {
            let icon = controls.activate(ControlKind::Camera, session).await;
            info!("Camera icon: {:?}", icon);
        }
        MeshEvent::Media { prompt } => {
            if session.request_local_media(prompt).await.is_ok() {
                controls.refresh(session);
            }
        }
        MeshEvent::Status => match StatusReport::capture(session, controls).to_json() {
            Ok(json) => println!("{}", json),
            Err(e) => error!("{}", e),
        },
    }
}
