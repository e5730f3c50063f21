//! Binary entrypoint for the postbox CLI.
//!
//! Commands:
//! - `init` - write a starter `config.toml` and an empty state file
//! - `status` - print the shared state
//! - `start` - run all four components as tasks in one process
//! - `monitor` / `ingest` / `player` / `lights` - run a single component
//! - `reset` - operator reset of the shared state to first-boot values
//! - `nightlight <on|off>` - toggle the nightlight pattern
//! - `credentials --ssid <ssid> [--passphrase-stdin]` - apply WiFi credentials from
//!   the captive portal; exit status 0 when joined, 1 when rolled back
//!
//! See the library crate docs for module-level details: `postbox::`.
use anyhow::{anyhow, Result};
use clap::{Parser, Subcommand, ValueEnum};
use log::{error, info, warn};
use std::io::BufRead;
use std::time::Duration;

use postbox::config::Config;
use postbox::ingest::{HttpDownloader, HttpMessageSource, MessageIngestion};
use postbox::lights::{FrameSink, LightStrip, LogStrip, Presenter};
use postbox::logutil::init_logging;
use postbox::monitor::{ConnectivityMonitor, PingProbe, ScriptPortal};
use postbox::playback::{CommandPlayer, GpioValueSensor, PlaybackController, PlaybackError};
use postbox::recovery::{submit_credentials, CommandJoiner, CredentialRecovery, Credentials, JoinOutcome};
use postbox::shutdown::{listen_for_signals, Shutdown};
use postbox::storage::StateStore;

#[derive(Parser)]
#[command(name = "postbox")]
#[command(about = "Message playback and WiFi self-recovery for a networked audio postbox")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Configuration file path (can be used before or after subcommand)
    #[arg(short, long, default_value = "config.toml", global = true)]
    config: String,

    /// Verbose logging (-v, -vv for more; may appear before or after subcommand)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,
}

#[derive(Subcommand)]
enum Commands {
    /// Write a default configuration file and an empty state file
    Init,
    /// Show the shared device state
    Status,
    /// Run every component in this process
    Start,
    /// Run only the connectivity monitor
    Monitor,
    /// Run only message ingestion
    Ingest,
    /// Run only the playback controller
    Player,
    /// Run only the feedback presenter
    Lights,
    /// Reset the shared state to its first-boot values
    Reset,
    /// Switch the nightlight pattern on or off
    Nightlight {
        #[arg(value_enum)]
        mode: Switch,
    },
    /// Apply WiFi credentials submitted through the captive portal
    Credentials {
        /// Network name
        #[arg(long)]
        ssid: String,
        /// Read the passphrase from the first line of stdin (open network otherwise)
        #[arg(long)]
        passphrase_stdin: bool,
    },
}

#[derive(Clone, Copy, ValueEnum)]
enum Switch {
    On,
    Off,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    if let Commands::Init = cli.command {
        init_logging(None, cli.verbose);
        return init(&cli.config).await;
    }

    let config = Config::load(&cli.config).await?;
    init_logging(Some(&config.logging), cli.verbose);
    let store = StateStore::open(&config.device.state_file)?;

    match cli.command {
        // Runs before any config exists, see above
        Commands::Init => {}
        Commands::Status => show_status(&store)?,
        Commands::Start => {
            info!("Starting postbox v{}", env!("CARGO_PKG_VERSION"));
            run_all(&config, store).await?;
        }
        Commands::Monitor => {
            let shutdown = install_shutdown();
            build_monitor(&config, store).run(shutdown).await;
        }
        Commands::Ingest => {
            let shutdown = install_shutdown();
            build_ingestion(&config, store)?.run(shutdown).await;
        }
        Commands::Player => {
            let shutdown = install_shutdown();
            build_controller(&config, store).run(shutdown).await?;
        }
        Commands::Lights => {
            let shutdown = install_shutdown();
            build_presenter(&config, store).run(shutdown).await;
        }
        Commands::Reset => {
            store.reset()?;
            info!("shared state reset");
            println!("State reset: {}", store.path().display());
        }
        Commands::Nightlight { mode } => {
            let on = matches!(mode, Switch::On);
            store.update(|s| s.nightlight_mode = on)?;
            println!("Nightlight {}", if on { "on" } else { "off" });
        }
        Commands::Credentials {
            ssid,
            passphrase_stdin,
        } => {
            let passphrase = if passphrase_stdin {
                read_passphrase()?
            } else {
                String::new()
            };
            let credentials = Credentials::new(&ssid, &passphrase)?;
            let recovery = build_recovery(&config);
            match submit_credentials(&store, &recovery, &credentials).await? {
                JoinOutcome::Joined => println!("Joined '{}'", credentials.ssid()),
                JoinOutcome::RolledBack => {
                    println!("Could not join '{}'; previous credentials restored", credentials.ssid());
                    std::process::exit(1);
                }
            }
        }
    }

    Ok(())
}

async fn init(config_path: &str) -> Result<()> {
    info!("Initializing new postbox configuration");
    Config::create_default(config_path).await?;
    info!("Configuration file created at {}", config_path);

    let config = Config::default();
    let store = StateStore::open(&config.device.state_file)?;
    if store.try_read().is_err() || !store.path().exists() {
        store.reset()?;
        info!("Initialized empty state at {}", store.path().display());
    }
    tokio::fs::create_dir_all(&config.device.download_dir).await?;
    Ok(())
}

fn show_status(store: &StateStore) -> Result<()> {
    let state = store.try_read()?;
    println!("State file:   {}", store.path().display());
    match state.lifecycle() {
        Ok(lifecycle) => println!("Message:      {}", lifecycle),
        Err(violation) => println!("Message:      inconsistent ({})", violation),
    }
    println!("Connectivity: {}", state.connectivity());
    println!("Nightlight:   {}", if state.nightlight_mode { "on" } else { "off" });
    if state.user_input_ack {
        println!("Credentials submitted, acknowledgment pending");
    }
    Ok(())
}

fn read_passphrase() -> Result<String> {
    let mut line = String::new();
    std::io::stdin().lock().read_line(&mut line)?;
    Ok(line.trim_end_matches(['\r', '\n']).to_string())
}

fn install_shutdown() -> Shutdown {
    let (trigger, shutdown) = Shutdown::new();
    tokio::spawn(listen_for_signals(trigger));
    shutdown
}

fn probe(config: &Config) -> PingProbe {
    PingProbe::new(
        config.monitor.probe_host.clone(),
        Duration::from_secs(config.monitor.probe_timeout_secs),
    )
}

fn build_monitor(config: &Config, store: StateStore) -> ConnectivityMonitor<PingProbe, ScriptPortal> {
    let portal = ScriptPortal::new(
        config.monitor.portal_activate_command.clone(),
        config.monitor.portal_deactivate_command.clone(),
        config.monitor.command_timeout(),
    );
    ConnectivityMonitor::new(
        store,
        probe(config),
        portal,
        config.monitor.check_interval(),
        Duration::from_secs(config.monitor.loss_threshold_secs),
    )
}

fn build_ingestion(config: &Config, store: StateStore) -> Result<MessageIngestion<HttpMessageSource, HttpDownloader>> {
    let timeout = Duration::from_secs(config.ingest.request_timeout_secs);
    let source = HttpMessageSource::new(config.ingest.poll_url.clone(), config.ingest.ack_url.clone(), timeout)?;
    let downloader = HttpDownloader::new(&config.device.download_dir, timeout, config.ingest.max_payload_bytes)?;
    Ok(MessageIngestion::new(
        store,
        source,
        downloader,
        &config.device.download_dir,
        Duration::from_secs(config.ingest.poll_interval_secs),
        Duration::from_secs(config.ingest.pending_interval_secs),
    ))
}

fn build_controller(config: &Config, store: StateStore) -> PlaybackController<GpioValueSensor, CommandPlayer> {
    PlaybackController::new(
        store,
        GpioValueSensor::new(&config.playback.sensor_value_path, config.playback.sensor_active_low),
        CommandPlayer::new(config.playback.player_command.clone()),
        config.playback.poll_interval(),
        config.playback.debounce_polls,
    )
}

fn build_presenter(config: &Config, store: StateStore) -> Presenter<Box<dyn LightStrip>> {
    let strip: Box<dyn LightStrip> = match config.lights.output {
        Some(ref path) => Box::new(FrameSink::new(path)),
        None => Box::new(LogStrip::new()),
    };
    Presenter::new(store, strip, config.lights.clone())
}

fn build_recovery(config: &Config) -> CredentialRecovery<CommandJoiner, PingProbe> {
    CredentialRecovery::new(
        &config.recovery.credentials_file,
        CommandJoiner::new(config.recovery.join_command.clone(), config.monitor.command_timeout()),
        probe(config),
        config.recovery.verify_attempts,
        Duration::from_secs(config.recovery.verify_interval_secs),
    )
}

/// Run the four components as tasks sharing nothing but the store.
async fn run_all(config: &Config, store: StateStore) -> Result<()> {
    let (trigger, shutdown) = Shutdown::new();

    let monitor = tokio::spawn(build_monitor(config, store.clone()).run(shutdown.clone()));
    let ingestion = tokio::spawn(build_ingestion(config, store.clone())?.run(shutdown.clone()));
    let controller = tokio::spawn(build_controller(config, store.clone()).run(shutdown.clone()));
    let presenter = tokio::spawn(build_presenter(config, store).run(shutdown));
    info!("all components running");

    listen_for_signals(trigger).await;

    let (monitor, ingestion, controller, presenter) = tokio::join!(monitor, ingestion, controller, presenter);
    for (name, joined) in [("monitor", monitor), ("ingestion", ingestion), ("presenter", presenter)] {
        if let Err(e) = joined {
            error!("{} task failed: {}", name, e);
        }
    }
    match controller.map_err(|e| anyhow!("playback task failed: {}", e))? {
        Ok(()) => {}
        Err(PlaybackError::Interrupted { id }) => warn!("playback of message {} interrupted by shutdown", id),
        Err(e) => return Err(e.into()),
    }
    info!("postbox stopped");
    Ok(())
}
