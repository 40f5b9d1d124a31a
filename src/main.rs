//! Marionette - body landmarks to joint angles
//!
//! Main entry point for the CLI application.

use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{error, info, Level};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use marionette::{
    config::{Config, RelayRole, UnprojectorMode},
    output::{tracing_tree, PoseBroadcaster},
    pose::{HumanControl, HumanPoseAngles, MotionPoseSource, Rig},
    relay::{RelayClient, RelayServer, SupplyingDetector},
    tracking::UdpLandmarkDetector,
    AppState, LandmarkDetector, PosePipeline,
};

/// Marionette - drive an articulated rig from body landmarks
#[derive(Parser, Debug)]
#[command(name = "marionette", version, about, long_about = None)]
struct Cli {
    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Receive landmarks, decompose them into joint angles and drive the rig
    Track(TrackArgs),
    /// Run the multi-camera WebSocket relay
    Relay(RelayArgs),
}

#[derive(Args, Debug)]
struct TrackArgs {
    /// Configuration file path
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Landmark UDP port (overrides config)
    #[arg(short, long)]
    port: Option<u16>,

    /// Use detector depth as-is instead of reconstructing it
    #[arg(long)]
    passthrough: bool,

    /// Track from the frames relayed by other cameras
    #[arg(long, conflicts_with = "supply_to")]
    relay_leader: bool,

    /// Forward tracked frames to this leader through the relay
    #[arg(long, value_name = "LEADER")]
    supply_to: Option<String>,

    /// Relay client id (overrides config)
    #[arg(long)]
    client_id: Option<String>,
}

#[derive(Args, Debug)]
struct RelayArgs {
    /// Configuration file path
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Relay port (overrides config)
    #[arg(short, long)]
    port: Option<u16>,
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // Initialize logging
    let log_level = if cli.verbose {
        Level::DEBUG
    } else {
        Level::INFO
    };

    tracing_subscriber::registry()
        .with(fmt::layer())
        .with(
            EnvFilter::builder()
                .with_default_directive(log_level.into())
                .from_env_lossy(),
        )
        .init();

    info!("Starting {} v{}", marionette::NAME, marionette::VERSION);

    let runtime = tokio::runtime::Runtime::new()?;

    let state = runtime.block_on(async {
        match &cli.command {
            Command::Track(args) => start_tracking(args).await,
            Command::Relay(args) => start_relay(args).await,
        }
    })?;

    runtime.block_on(async {
        shutdown_signal().await;
        info!("Shutdown signal received");
        state.shutdown();

        // Give tasks a moment to clean up
        tokio::time::sleep(Duration::from_millis(500)).await;
    });

    info!("Marionette stopped");
    Ok(())
}

fn load_config(path: Option<&PathBuf>) -> anyhow::Result<Config> {
    let config = match path {
        Some(path) => Config::from_file(path)?,
        None => Config::load()?,
    };
    Ok(config)
}

/// Start the landmark pipeline and the rig that follows it.
async fn start_tracking(args: &TrackArgs) -> anyhow::Result<Arc<AppState>> {
    let mut config = load_config(args.config.as_ref())?;

    // Apply CLI overrides
    if let Some(port) = args.port {
        config.tracking.port = port;
    }
    if args.passthrough {
        config.unprojector.mode = UnprojectorMode::Passthrough;
    }
    if args.relay_leader {
        config.relay.role = RelayRole::Leader;
    }
    if let Some(leader) = &args.supply_to {
        config.relay.role = RelayRole::Supplier;
        config.relay.leader = leader.clone();
    }
    if let Some(client_id) = &args.client_id {
        config.relay.client_id = client_id.clone();
    }

    config.validate()?;

    info!("Landmark schema: {}", config.tracking.schema);
    info!("Unprojector: {:?}", config.unprojector.mode);
    info!("Relay role: {:?}", config.relay.role);
    info!("Pose output: {}", config.output.enabled);

    let state = AppState::new(config.clone());

    match config.relay.role {
        RelayRole::Off => {
            let mut detector = UdpLandmarkDetector::new(&config.tracking);
            detector.start().await?;
            spawn_pipeline(detector, &config, &state);
        }
        RelayRole::Supplier => {
            let mut detector = UdpLandmarkDetector::new(&config.tracking);
            detector.start().await?;
            let mut client = connect_relay(&config).await?;
            client.make_supplier(&config.relay.leader).await?;
            spawn_pipeline(SupplyingDetector::new(detector, client), &config, &state);
        }
        RelayRole::Leader => {
            let poll_timeout = Duration::from_millis(config.tracking.poll_timeout_ms);
            let detector = connect_relay(&config)
                .await?
                .into_leader(&config.relay, poll_timeout);
            spawn_pipeline(detector, &config, &state);
        }
    }

    let rig_state = Arc::clone(&state);
    tokio::spawn(async move {
        if let Err(e) = run_rig(rig_state).await {
            error!("Rig error: {}", e);
        }
    });

    Ok(state)
}

async fn connect_relay(config: &Config) -> anyhow::Result<RelayClient> {
    let client = RelayClient::connect(
        &config.relay.url(),
        &config.relay.client_id,
        config.tracking.schema,
    )
    .await?;
    Ok(client)
}

fn spawn_pipeline<D>(detector: D, config: &Config, state: &Arc<AppState>)
where
    D: LandmarkDetector + 'static,
{
    let pipeline = PosePipeline::from_config(detector, config, state.pose.clone());
    let shutdown_rx = state.subscribe_shutdown();
    tokio::spawn(async move {
        if let Err(e) = pipeline.run(shutdown_rx).await {
            error!("Pose pipeline error: {}", e);
        }
    });
}

/// Tick a humanoid rig from the tracked pose at the configured rate.
async fn run_rig(state: Arc<AppState>) -> anyhow::Result<()> {
    let config = state.config.read().await;
    let output_config = config.output.clone();
    drop(config);

    let mut shutdown_rx = state.subscribe_shutdown();

    let mut rig = Rig::<HumanPoseAngles>::default()
        .with_source(MotionPoseSource::new(state.pose.reader(), HumanControl));

    let mut broadcaster = if output_config.enabled {
        let broadcaster = PoseBroadcaster::connect(&output_config).await?;
        rig.try_control(broadcaster.joint_tree::<HumanPoseAngles>())?;
        Some(broadcaster)
    } else {
        rig.try_control(tracing_tree::<HumanPoseAngles>())?;
        None
    };

    let mut ticker = tokio::time::interval(Duration::from_secs_f64(1.0 / output_config.rate_hz));
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
    let mut last_tick = Instant::now();

    info!("Rig running at {} Hz", output_config.rate_hz);

    loop {
        tokio::select! {
            _ = ticker.tick() => {
                let now = Instant::now();
                rig.update(now.duration_since(last_tick).as_secs_f64());
                last_tick = now;

                if let Some(broadcaster) = &mut broadcaster {
                    if let Err(e) = broadcaster.flush().await {
                        error!("Pose output error: {}", e);
                    }
                }
            }
            _ = shutdown_rx.recv() => {
                info!("Rig shutting down");
                return Ok(());
            }
        }
    }
}

async fn start_relay(args: &RelayArgs) -> anyhow::Result<Arc<AppState>> {
    let mut config = load_config(args.config.as_ref())?;

    if let Some(port) = args.port {
        config.relay.port = port;
    }

    config.validate()?;

    let state = AppState::new(config.clone());

    let server = RelayServer::new(&config.relay);
    let listener = server.bind().await?;
    let shutdown_rx = state.subscribe_shutdown();
    tokio::spawn(async move {
        if let Err(e) = server.serve_on(listener, shutdown_rx).await {
            error!("Relay server error: {}", e);
        }
        info!("Relay server stopped");
    });

    Ok(state)
}

async fn shutdown_signal() {
    use tokio::signal;

    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!("Failed to listen for Ctrl+C: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                error!("Failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {}
        _ = terminate => {}
    }
}
