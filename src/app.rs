use std::path::PathBuf;
use std::sync::Arc;
use btleplug::api::Peripheral as _;
use clap::{Parser, Subcommand};
use futures::future::join_all;
use log::{error, info, warn};
use tokio::net::UdpSocket;
use tokio::spawn;
use tokio::time::Duration;
use tokio_util::sync::CancellationToken;

use crate::config::{ConfigIO, Settings};
use crate::device::link::BtleLink;
use crate::device::scanner::{find_device, DeviceSelector};
use crate::device::session::DeviceSession;
use crate::device::types::{Channel, PowerGate};
use crate::error::AppRunError;
use crate::pattern::{DefaultPattern, PatternSource, PatternStore};
use crate::playback::PlaybackEngine;
use crate::signal::osc_server_task;

/// Background playback in `run` lasts until Ctrl-C, this only bounds it.
const BRIDGE_PLAYBACK_DURATION: Duration = Duration::from_millis(100_000_000);

#[derive(Parser, Debug)]
#[command(name = "coyote-osc-bridge", version, about = "Drives a DG-LAB Coyote from OSC avatar parameters")]
pub struct Cli {
    /// Settings file to use instead of the default location
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    /// Log debug messages
    #[arg(short, long, global = true)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Option<Command>,
}

#[derive(Subcommand, Debug, Clone, PartialEq, Eq)]
pub enum Command {
    /// Bridge OSC input to the device until Ctrl-C (default)
    Run,
    /// Look for the device and print its address
    Scan,
    /// List the available patterns
    Patterns,
    /// Print the battery level of the device
    Battery,
    /// Play a single pattern on one channel
    Pulse {
        #[arg(long, default_value = "a")]
        channel: Channel,

        #[arg(long)]
        power: i32,

        /// Pattern name, empty for the built-in default
        #[arg(long, default_value = "")]
        pattern: String,

        #[arg(long, default_value_t = 1000)]
        duration_ms: u64,

        /// Play the built-in varied pattern, ignoring --pattern
        #[arg(long)]
        varied: bool,
    },
    /// Write the effective settings to the settings file
    SaveConfig,
}

async fn connect(settings: &Settings) -> Result<Arc<DeviceSession<BtleLink>>, AppRunError> {
    let selector = DeviceSelector::from_uid(&settings.device_uid);
    let peripheral = find_device(&selector).await?;

    let session = DeviceSession::new(BtleLink::new(peripheral), settings.session_options(), PowerGate::new());
    session.connect(settings.connect_retries).await?;
    Ok(Arc::new(session))
}

async fn shutdown(session: &DeviceSession<BtleLink>) -> Result<(), AppRunError> {
    if let Err(err) = session.stop().await {
        warn!("Failed to stop output: {}", err);
    }
    session.disconnect().await?;
    Ok(())
}

async fn run_bridge(settings: &Settings) -> Result<(), AppRunError> {
    let patterns = Arc::new(PatternStore::load(&settings.pattern_dir).await?);
    for channel in Channel::ALL {
        if !patterns.contains(settings.pattern(channel)) {
            warn!("Pattern {:?} of channel {} is not known, the default is used", settings.pattern(channel), channel);
        }
    }

    let socket = UdpSocket::bind((settings.osc_host.as_str(), settings.osc_port)).await
        .map_err(|source| AppRunError::OscBind { source })?;

    let session = connect(settings).await?;
    let engine = PlaybackEngine::new(session.clone(), patterns);
    let cancel = CancellationToken::new();

    let players = Channel::ALL.map(|channel| {
        let engine = engine.clone();
        let pattern = PatternSource::from(settings.pattern(channel));
        let power = settings.idle_power(channel);
        spawn(async move {
            engine.signal(power, pattern, BRIDGE_PLAYBACK_DURATION, channel).await
        })
    });

    let osc = osc_server_task(socket, settings.clone(), session.clone(), cancel.clone());

    info!("Bridge running, press Ctrl-C to stop");
    if let Err(err) = tokio::signal::ctrl_c().await {
        error!("Failed to wait for Ctrl-C: {}", err);
    }
    info!("Shutting down");

    cancel.cancel();
    if let Err(err) = session.stop().await {
        warn!("Failed to stop output: {}", err);
    }

    for (channel, result) in Channel::ALL.into_iter().zip(join_all(players).await) {
        match result {
            Ok(Ok(outcome)) => info!("Playback on channel {} ended: {:?}", channel, outcome),
            Ok(Err(err)) => warn!("Playback on channel {} failed: {}", channel, err),
            Err(err) => error!("Playback task of channel {} panicked: {}", channel, err),
        }
    }
    match osc.await {
        Ok(Ok(())) => {},
        Ok(Err(err)) => warn!("OSC server failed: {}", err),
        Err(err) => error!("OSC server task panicked: {}", err),
    }

    session.disconnect().await?;
    Ok(())
}

async fn list_patterns(settings: &Settings) -> Result<(), AppRunError> {
    let patterns = PatternStore::load(&settings.pattern_dir).await?;

    for name in patterns.names() {
        let pattern = patterns.resolve(name);
        let label = if name.is_empty() { "(default)" } else { name };
        println!("{:<24} {:>4} frame(s) {:>7} ms", label, pattern.len(), pattern.duration_ms());
    }
    Ok(())
}

async fn pulse(
    settings: &Settings,
    channel: Channel,
    power: i32,
    pattern: String,
    duration: Duration,
    varied: bool,
) -> Result<(), AppRunError> {
    let patterns = Arc::new(PatternStore::load(&settings.pattern_dir).await?);
    let source = if varied {
        PatternSource::Literal(patterns.builtin(DefaultPattern::Varied).clone())
    } else {
        PatternSource::ByName(pattern)
    };

    let session = connect(settings).await?;
    let engine = PlaybackEngine::new(session.clone(), patterns);

    let result = engine.signal(power, source, duration, channel).await;
    shutdown(&session).await?;

    let outcome = result?;
    info!("Pulse ended: {:?}", outcome);
    Ok(())
}

/// Runs the command selected on the command line. The settings file stays locked while the
/// command runs.
pub async fn run_command(cli: Cli) -> Result<(), AppRunError> {
    let config = ConfigIO::open(cli.config.as_deref())?;
    let mut locker = config.locker()?;
    let _guard = locker.lock()?;
    let settings = config.read().await?;

    match cli.command.unwrap_or(Command::Run) {
        Command::Run => run_bridge(&settings).await,
        Command::Scan => {
            let peripheral = find_device(&DeviceSelector::from_uid(&settings.device_uid)).await?;
            println!("{}", peripheral.address());
            Ok(())
        },
        Command::Patterns => list_patterns(&settings).await,
        Command::Battery => {
            let session = connect(&settings).await?;
            let level = session.get_battery_level().await;
            shutdown(&session).await?;
            println!("{}%", level?);
            Ok(())
        },
        Command::Pulse { channel, power, pattern, duration_ms, varied } => {
            pulse(&settings, channel, power, pattern, Duration::from_millis(duration_ms), varied).await
        },
        Command::SaveConfig => {
            config.save(&settings).await?;
            println!("{}", config.path().to_string_lossy());
            Ok(())
        },
    }
}
