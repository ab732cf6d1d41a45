//! air352 - LAN control and polling for 352 air purifiers.

use std::path::{Path, PathBuf};

use anyhow::{Context, bail};
use clap::{Parser, Subcommand, ValueEnum};
use tokio::sync::watch;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::EnvFilter;

use air352 as app;

use app::config::{AppConfig, ConfigLoadResult};
use app::hub::Hub;
use app::poll::{Availability, PollCoordinator};
use app::protocol::{DeviceState, MacAddress, OperatingMode, WindSpeed};
use app::transport::UdpTransport;

/// Control 352 air purifiers on the local network.
#[derive(Parser)]
#[command(name = "air352", version)]
struct Cli {
    /// Config file (default: next to the executable, else the platform config dir)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Also write daily-rotated logs to this directory
    #[arg(long, global = true)]
    log_dir: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// List devices on the account
    Devices,
    /// Query current state of one or all devices
    Status { mac: Option<MacAddress> },
    /// Switch a purifier on or off
    Power { mac: MacAddress, action: Switch },
    /// Switch the indicator light on or off
    Light { mac: MacAddress, action: Switch },
    /// Set the fan speed
    Speed {
        mac: MacAddress,
        #[arg(value_parser = clap::value_parser!(u8).range(1..=6))]
        speed: u8,
    },
    /// Set the operating mode
    Mode { mac: MacAddress, mode: Mode },
    /// Poll all devices until Ctrl-C
    Watch,
    /// Write a config file with default values
    InitConfig,
}

#[derive(Clone, Copy, ValueEnum)]
enum Switch {
    On,
    Off,
    Toggle,
}

#[derive(Clone, Copy, ValueEnum)]
enum Mode {
    Auto,
    Sleep,
    Fast,
    Custom,
}

impl From<Mode> for OperatingMode {
    fn from(mode: Mode) -> Self {
        match mode {
            Mode::Auto => OperatingMode::Auto,
            Mode::Sleep => OperatingMode::Sleep,
            Mode::Fast => OperatingMode::Fast,
            Mode::Custom => OperatingMode::Custom,
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let _log_guard = init_logging(cli.log_dir.as_deref());

    let config_path = cli.config.clone().unwrap_or_else(AppConfig::default_path);
    tracing::info!("Config path: {:?}", config_path);

    if let Command::InitConfig = cli.command {
        return init_config(&config_path);
    }

    let config = match AppConfig::try_load(&config_path) {
        ConfigLoadResult::Loaded(config) => config,
        ConfigLoadResult::Missing => {
            bail!("No config at {}; run `air352 init-config` first", config_path.display())
        }
        ConfigLoadResult::Invalid(e) => bail!("Config {} is invalid: {e}", config_path.display()),
    };

    let hub = Hub::connect(&config).await.context("Failed to load devices from the 352 cloud")?;

    match cli.command {
        Command::Devices => {
            for device in hub.devices() {
                let address = device.identity().address;
                println!(
                    "{}  {:<20} company {:02X} type {:02X}",
                    address.mac, device.name(), address.company_code, address.device_type
                );
            }
        }
        Command::Status { mac } => match mac {
            Some(mac) => print_status(hub.coordinator(&mac)?).await,
            None => {
                for coordinator in hub.coordinators() {
                    print_status(coordinator).await;
                }
            }
        },
        Command::Power { mac, action } => {
            let device = hub.device(&mac)?;
            match action {
                Switch::On => device.turn_on().await?,
                Switch::Off => device.turn_off().await?,
                Switch::Toggle => {
                    hub.coordinator(&mac)?.poll_once().await.ok();
                    device.toggle_power().await?
                }
            }
        }
        Command::Light { mac, action } => {
            let device = hub.device(&mac)?;
            match action {
                Switch::On => device.turn_light_on().await?,
                Switch::Off => device.turn_light_off().await?,
                Switch::Toggle => {
                    hub.coordinator(&mac)?.poll_once().await.ok();
                    device.toggle_light().await?
                }
            }
        }
        Command::Speed { mac, speed } => {
            let speed = WindSpeed::try_from(speed).context("Speed must be 1-6")?;
            hub.device(&mac)?.set_wind_speed(speed).await?;
        }
        Command::Mode { mac, mode } => hub.device(&mac)?.set_mode(mode.into()).await?,
        Command::Watch => watch_all(&hub).await?,
        Command::InitConfig => unreachable!("handled before loading config"),
    }

    Ok(())
}

/// Initialize logging to stderr, plus a daily file when `log_dir` is given.
fn init_logging(log_dir: Option<&Path>) -> Option<WorkerGuard> {
    let filter = EnvFilter::from_default_env().add_directive(tracing::Level::INFO.into());

    match log_dir {
        Some(dir) => {
            let (writer, guard) = tracing_appender::non_blocking(tracing_appender::rolling::daily(dir, "air352.log"));
            tracing_subscriber::fmt()
                .with_env_filter(filter)
                .with_ansi(false)
                .with_writer(writer)
                .init();
            Some(guard)
        }
        None => {
            tracing_subscriber::fmt()
                .with_env_filter(filter)
                .with_writer(std::io::stderr)
                .init();
            None
        }
    }
}

fn init_config(path: &Path) -> anyhow::Result<()> {
    if path.exists() {
        bail!("{} already exists", path.display());
    }
    AppConfig::default()
        .save(path)
        .with_context(|| format!("Failed to write {}", path.display()))?;
    println!("Wrote {}; fill in phone, password and sign_key under [account] before use", path.display());
    Ok(())
}

async fn print_status(coordinator: &PollCoordinator<UdpTransport>) {
    let device = coordinator.device();
    if let Err(e) = coordinator.poll_once().await {
        tracing::warn!("{}: {e}", device.mac());
    }

    match coordinator.availability() {
        Availability::Available(state) => {
            let checked = coordinator
                .last_success()
                .map(|t| t.format("%Y-%m-%d %H:%M:%S").to_string())
                .unwrap_or_default();
            println!("{} ({})  {checked}", device.name(), device.mac());
            print_state(&state);
        }
        Availability::Unavailable => println!("{} ({})  unavailable", device.name(), device.mac()),
    }
}

fn print_state(state: &DeviceState) {
    println!("  power:       {}", state.switch);
    println!("  mode:        {}", state.mode);
    println!("  speed:       {} ({}%)", state.wind_speed, state.wind_speed.percentage());
    println!("  light:       {}", state.light);
    println!("  child lock:  {}", state.child_lock);
    println!("  air quality: {}", state.air_quality);
    println!("  pm2.5:       {}", state.pm25);
    println!("  timer:       {}", state.timer);
    println!("  filter:      {}", state.filter_type);
    println!("  online time: {}", state.total_online_time);
    println!("  purified:    {} / {}", state.total_purification_value, state.air_total_value);
    println!("  address:     {}", state.source_ip);
}

async fn watch_all(hub: &Hub) -> anyhow::Result<()> {
    if hub.is_empty() {
        bail!("No devices to watch");
    }

    let (stop, shutdown) = watch::channel(false);
    let handles = hub.spawn_pollers(shutdown);
    tracing::info!("Polling {} device(s); Ctrl-C to stop", handles.len());

    tokio::signal::ctrl_c().await?;
    tracing::info!("Stopping pollers");
    stop.send(true)?;

    for handle in handles {
        handle.await?;
    }
    Ok(())
}
