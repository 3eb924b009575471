//! Command-line Modbus/TCP server exposing whitelisted GPIO pins

use std::net::SocketAddr;
use std::str::FromStr;
use std::time::Duration;

use clap::{Parser, ValueEnum};

use modbus_gpio::backend::simulated::SimulatedBackend;
use modbus_gpio::backend::GpioBackend;
use modbus_gpio::constants::defaults;
use modbus_gpio::mapper::{share, SharedRegistry};
use modbus_gpio::pin::PullMode;
use modbus_gpio::registry::PinRegistry;
use modbus_gpio::server::{spawn_tcp_server_task, ServerConfig};
use modbus_gpio::{ConfigError, DriverError};

#[derive(Debug, thiserror::Error)]
enum Error {
    #[error("GPIO driver error: {0}")]
    Driver(#[from] DriverError),
    #[error("unable to configure pins: {0}")]
    Config(#[from] ConfigError),
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("pin registry lock poisoned")]
    Poisoned,
    #[cfg(not(feature = "rpi"))]
    #[error("built without Raspberry Pi support, rebuild with `--features rpi`")]
    RpiUnsupported,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, ValueEnum)]
enum BackendKind {
    /// in-memory board, for trying things out without hardware
    Sim,
    /// Raspberry Pi GPIO, BCM numbering
    Rpi,
}

#[derive(Clone, Copy, Debug)]
struct InputArg {
    pin: u8,
    pull_mode: PullMode,
}

impl FromStr for InputArg {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (pin, pull_mode) = s
            .split_once(':')
            .ok_or_else(|| format!("expected PIN:up or PIN:down, got {s}"))?;
        let pin = pin
            .parse::<u8>()
            .map_err(|err| format!("bad pin number {pin}: {err}"))?;
        let pull_mode = pull_mode.parse::<PullMode>()?;
        Ok(Self { pin, pull_mode })
    }
}

#[derive(Parser, Debug)]
#[command(name = "modbus-gpio-server")]
#[command(about = "Expose whitelisted GPIO pins as Modbus coils and discrete inputs")]
#[command(version)]
struct Cli {
    #[arg(short = 'l', long, default_value = "0.0.0.0:502", help = "socket address to listen on")]
    listen: SocketAddr,

    #[arg(short = 'u', long, default_value_t = defaults::UNIT_ID, help = "the only unit id answered")]
    unit_id: u8,

    #[arg(long, default_value_t = defaults::MAX_SESSIONS, help = "maximum number of concurrent clients")]
    max_sessions: usize,

    #[arg(long, default_value_t = defaults::IDLE_TIMEOUT_SECS, help = "close client connections idle for this many seconds, 0 disables")]
    idle_timeout_secs: u64,

    #[arg(short = 'b', long, value_enum, default_value_t = BackendKind::Sim, help = "GPIO driver")]
    backend: BackendKind,

    #[arg(short = 'c', long = "coil", help = "configure a pin as a coil (repeatable)")]
    coils: Vec<u8>,

    #[arg(short = 'i', long = "input", help = "configure a pin as a discrete input, e.g. 6:up (repeatable)")]
    inputs: Vec<InputArg>,

    #[arg(short = 'a', long = "allow", help = "allow remote access to a configured pin (repeatable)")]
    allow: Vec<u8>,

    #[arg(short = 'w', long, help = "log the state of a discrete input while serving")]
    watch: Option<u8>,

    #[arg(long, default_value_t = defaults::WATCH_PERIOD_MS, help = "polling period of the watched input in milliseconds")]
    watch_period_ms: u64,

    #[arg(long, default_value_t = tracing::Level::INFO, help = "maximum log level")]
    log_level: tracing::Level,
}

#[tokio::main(flavor = "multi_thread")]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    // initialize logging
    tracing_subscriber::fmt()
        .with_max_level(cli.log_level)
        .with_target(false)
        .init();

    if let Err(err) = dispatch(&cli).await {
        tracing::error!("{err}");
        std::process::exit(1);
    }

    Ok(())
}

async fn dispatch(cli: &Cli) -> Result<(), Error> {
    match cli.backend {
        BackendKind::Sim => run(cli, SimulatedBackend::new()).await,
        #[cfg(feature = "rpi")]
        BackendKind::Rpi => run(cli, modbus_gpio::backend::rpi::RpiBackend::new()).await,
        #[cfg(not(feature = "rpi"))]
        BackendKind::Rpi => Err(Error::RpiUnsupported),
    }
}

fn configure<B: GpioBackend>(registry: &mut PinRegistry<B>, cli: &Cli) -> Result<(), ConfigError> {
    for &pin in &cli.coils {
        registry.set_pin_as_coil(pin)?;
    }
    for input in &cli.inputs {
        registry.set_pin_as_discrete_input(input.pin, input.pull_mode)?;
    }
    for &pin in &cli.allow {
        registry.allow(pin)?;
    }
    Ok(())
}

async fn run<B: GpioBackend>(cli: &Cli, backend: B) -> Result<(), Error> {
    tracing::info!("modbus-gpio-server starting");

    let mut registry = PinRegistry::new(backend);
    registry.open()?;

    // no client can connect yet, so the registry is configured without the lock
    if let Err(err) = configure(&mut registry, cli) {
        if let Err(close) = registry.close() {
            tracing::warn!("unable to close GPIO port: {close}");
        }
        return Err(err.into());
    }
    registry.log_configuration();

    let registry = share(registry);
    let config = ServerConfig {
        listen: cli.listen,
        unit_id: cli.unit_id,
        max_sessions: cli.max_sessions,
        idle_timeout: (cli.idle_timeout_secs > 0)
            .then(|| Duration::from_secs(cli.idle_timeout_secs)),
    };
    let server = spawn_tcp_server_task(config, registry.clone()).await?;
    tracing::info!("listening on {}", server.local_addr());

    let watcher = cli.watch.map(|pin| {
        let period = Duration::from_millis(cli.watch_period_ms);
        tokio::spawn(watch(registry.clone(), pin, period))
    });

    tokio::signal::ctrl_c().await?;
    tracing::info!("shutting down");

    drop(server);
    if let Some(watcher) = watcher {
        watcher.abort();
    }

    let mut registry = registry.write().map_err(|_| Error::Poisoned)?;
    registry.close()?;
    Ok(())
}

fn sample<B: GpioBackend>(registry: &SharedRegistry<B>, pin: u8) -> Result<bool, String> {
    let registry = registry.read().map_err(|_| "pin registry lock poisoned".to_string())?;
    registry.get_discrete_input(pin).map_err(|err| err.to_string())
}

async fn watch<B: GpioBackend>(registry: SharedRegistry<B>, pin: u8, period: Duration) {
    let mut interval = tokio::time::interval(period);
    let mut last = None;
    loop {
        interval.tick().await;
        match sample(&registry, pin) {
            Ok(active) => {
                if last != Some(active) {
                    if active {
                        tracing::info!("input {pin} is active");
                    } else {
                        tracing::info!("input {pin} is inactive");
                    }
                    last = Some(active);
                }
            }
            Err(err) => {
                tracing::error!("error while reading discrete input {pin}: {err}");
                return;
            }
        }
    }
}
