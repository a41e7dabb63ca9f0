use anyhow::{Context, Result};
use clap::{ArgAction, Parser, Subcommand, ValueEnum};
use serde_json::{json, Value};
use std::path::PathBuf;
use std::process::ExitCode;
use tracing::{debug, info};

use station_session::{load_config_file, DeviceSession, MetricsHub, Outcome, SessionConfig};
use weather_record::{QuantityType, RecordKind, UnitOverrides, UnitRegistry, UnitTarget};

#[derive(Parser, Debug)]
#[command(
    name = "vp",
    version,
    about = "Davis Vantage weather station CLI",
    disable_help_subcommand = true
)]
struct Cli {
    /// YAML session configuration
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Serial device of the console (e.g. /dev/ttyUSB0)
    #[arg(long, global = true)]
    device: Option<String>,

    /// Path or name of the vproweather executable
    #[arg(long, global = true)]
    program: Option<String>,

    /// Replay recorded payloads instead of calling the driver
    #[arg(long, action = ArgAction::SetTrue, global = true)]
    samples: bool,

    /// Directory holding recorded payloads (implies --samples)
    #[arg(long, global = true)]
    sample_dir: Option<PathBuf>,

    /// Attempts per operation before giving up
    #[arg(long, global = true)]
    max_tries: Option<u32>,

    /// Driver response delay in tenths of a second
    #[arg(long, global = true)]
    delay: Option<u32>,

    /// Log every failed attempt at warn level
    #[arg(long, action = ArgAction::SetTrue, global = true)]
    log_errors: bool,

    /// Unit preset for the output (default, us, eu or a configured one)
    #[arg(long, global = true)]
    preset: Option<String>,

    /// Per-quantity unit override, e.g. `temperature=°C` or `rain=in`
    #[arg(long = "unit", value_name = "QUANTITY=UNIT", global = true)]
    units: Vec<String>,

    /// Append a `units` summary to the output
    #[arg(long, action = ArgAction::SetTrue, global = true)]
    with_units: bool,

    /// Print the flat driver record instead of the mapped one
    #[arg(long, action = ArgAction::SetTrue, global = true)]
    raw: bool,

    /// Print Prometheus metrics to stderr after the command
    #[arg(long, action = ArgAction::SetTrue, global = true)]
    metrics: bool,

    /// Debug logging (overrides RUST_LOG)
    #[arg(short, long, action = ArgAction::SetTrue, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Copy, Clone, Debug, Eq, PartialEq, ValueEnum)]
enum Switch {
    On,
    Off,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Current conditions
    Realtime,
    /// Daily, monthly and yearly highs and lows
    Highlow,
    /// Console clock
    Time,
    /// Set the console clock to this host's clock
    SyncTime,
    /// Switch the console backlight
    Backlight {
        #[arg(value_enum)]
        state: Switch,
    },
    /// Console model
    Model,
    /// List unit presets
    Presets,
    /// List quantities and their units
    Units,
    /// List serial ports the console may be attached to
    #[cfg(feature = "serial")]
    Ports,
}

#[tokio::main]
async fn main() -> Result<ExitCode> {
    let cli = Cli::parse();
    setup_tracing(cli.verbose);

    let config = build_config(&cli)?;
    let code = match &cli.command {
        Commands::Realtime => read(&cli, &config, RecordKind::Realtime).await?,
        Commands::Highlow => read(&cli, &config, RecordKind::HighLow).await?,
        Commands::Time => read(&cli, &config, RecordKind::Time).await?,
        Commands::Model => read(&cli, &config, RecordKind::Model).await?,
        Commands::SyncTime => with_session(&cli, &config, sync_time).await?,
        Commands::Backlight { state } => {
            let on = *state == Switch::On;
            with_session(&cli, &config, move |s| backlight(s, on)).await?
        }
        Commands::Presets => {
            print_json(&list_presets(&config)?)?;
            ExitCode::SUCCESS
        }
        Commands::Units => {
            print_json(&list_units())?;
            ExitCode::SUCCESS
        }
        #[cfg(feature = "serial")]
        Commands::Ports => {
            let ports = station_transport::list_ports()?;
            let ports: Vec<Value> = ports
                .into_iter()
                .map(|p| json!({ "name": p.name, "kind": p.kind }))
                .collect();
            print_json(&Value::Array(ports))?;
            ExitCode::SUCCESS
        }
    };
    Ok(code)
}

fn setup_tracing(verbose: bool) {
    let filter = if verbose {
        tracing_subscriber::EnvFilter::new("debug")
    } else {
        tracing_subscriber::EnvFilter::from_default_env()
    };
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .try_init();
}

/// Config file (if any) with command-line flags layered on top.
fn build_config(cli: &Cli) -> Result<SessionConfig> {
    let mut config = match &cli.config {
        Some(path) => load_config_file(path)?,
        None => SessionConfig::default(),
    };
    if let Some(device) = &cli.device {
        config.device = device.clone();
    }
    if let Some(program) = &cli.program {
        config.driver_program = program.clone();
    }
    if cli.samples {
        config.use_samples = true;
    }
    if let Some(dir) = &cli.sample_dir {
        config.use_samples = true;
        config.sample_dir = Some(dir.clone());
    }
    if let Some(n) = cli.max_tries {
        config.max_tries = n;
    }
    if let Some(d) = cli.delay {
        config.delay = d;
    }
    if cli.log_errors {
        config.log_errors = true;
    }
    if let Some(preset) = &cli.preset {
        config.preset = Some(preset.clone());
    }
    config.validate()?;
    debug!(?config, "effective configuration");
    Ok(config)
}

fn unit_overrides(cli: &Cli) -> Result<Option<UnitTarget>> {
    if cli.units.is_empty() {
        return Ok(None);
    }
    let mut overrides = UnitOverrides::new();
    for assignment in &cli.units {
        overrides
            .set_from_str(assignment)
            .with_context(|| format!("--unit {assignment}"))?;
    }
    Ok(Some(UnitTarget::Overrides(overrides)))
}

async fn with_session<F, Fut>(cli: &Cli, config: &SessionConfig, f: F) -> Result<ExitCode>
where
    F: FnOnce(DeviceSession) -> Fut,
    Fut: std::future::Future<Output = Result<ExitCode>>,
{
    let hub = cli.metrics.then(MetricsHub::new).transpose()?;
    let mut session = DeviceSession::from_config(config)?;
    if let Some(hub) = &hub {
        session = session.with_metrics(hub.clone());
    }
    info!(
        driver = session.driver_name(),
        max_tries = session.policy().max_tries,
        "session ready"
    );
    let code = f(session).await?;
    if let Some(hub) = hub {
        eprint!("{}", hub.encode_text());
    }
    Ok(code)
}

async fn read(cli: &Cli, config: &SessionConfig, kind: RecordKind) -> Result<ExitCode> {
    if cli.raw {
        return with_session(cli, config, move |s| print_raw(s, kind)).await;
    }
    let overrides = unit_overrides(cli)?;
    let with_units = cli.with_units;
    with_session(cli, config, move |s| print_tree(s, kind, overrides, with_units)).await
}

async fn print_raw(session: DeviceSession, kind: RecordKind) -> Result<ExitCode> {
    match session.read_raw(kind).await? {
        Outcome::Success { value, .. } => {
            print_json(&serde_json::to_value(&value)?)?;
            Ok(ExitCode::SUCCESS)
        }
        Outcome::Exhausted { attempts } => unavailable(kind.name(), attempts),
    }
}

async fn print_tree(
    session: DeviceSession,
    kind: RecordKind,
    overrides: Option<UnitTarget>,
    with_units: bool,
) -> Result<ExitCode> {
    match session.read(kind).await? {
        Outcome::Success { value, .. } => {
            let tree = match &overrides {
                Some(target) => value.apply_units(target)?,
                None => value,
            };
            print_json(&tree.to_plain_values(with_units))?;
            Ok(ExitCode::SUCCESS)
        }
        Outcome::Exhausted { attempts } => unavailable(kind.name(), attempts),
    }
}

async fn sync_time(session: DeviceSession) -> Result<ExitCode> {
    let ok = session.sync_console_time().await?;
    Ok(status("sync-time", ok))
}

async fn backlight(session: DeviceSession, on: bool) -> Result<ExitCode> {
    let ok = session.set_backlight(on).await?;
    Ok(status("backlight", ok))
}

fn status(operation: &str, ok: bool) -> ExitCode {
    let doc = json!({
        "status": if ok { "ok" } else { "unavailable" },
        "operation": operation,
    });
    if print_json(&doc).is_err() || !ok {
        return ExitCode::from(2);
    }
    ExitCode::SUCCESS
}

fn unavailable(operation: &str, attempts: u32) -> Result<ExitCode> {
    print_json(&json!({
        "status": "unavailable",
        "operation": operation,
        "attempts": attempts,
    }))?;
    Ok(ExitCode::from(2))
}

fn list_presets(config: &SessionConfig) -> Result<Value> {
    let mut out = serde_json::Map::new();
    for name in config.preset_names() {
        if let UnitTarget::Preset { units, .. } = config.resolve_preset(&name)? {
            out.insert(name, serde_json::to_value(units)?);
        }
    }
    Ok(Value::Object(out))
}

fn list_units() -> Value {
    let registry = UnitRegistry::global();
    let map = QuantityType::ALL
        .iter()
        .map(|q| {
            let symbols: Vec<&str> = registry.units_of(*q).iter().map(|u| u.symbol()).collect();
            (q.name().to_string(), json!(symbols))
        })
        .collect();
    Value::Object(map)
}

fn print_json(value: &Value) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}
