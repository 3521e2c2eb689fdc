//! starwire command line client
//!
//! Connects to a device server (or starts one locally) and provides:
//! - `watch`: print every event of a connection
//! - `get` / `set`: read and change property values
//! - `upload`: send a file as a binary payload
//! - `local`: spawn a server with the given drivers and watch it

mod output;

use anyhow::{Context, Result, anyhow, bail};
use clap::{Args, Parser, Subcommand};
use starwire_core::config::{Config, Directories};
use starwire_core::{
    CommandSender, ConnectionMode, DeviceDescriptor, Elements, EventReceiver, LabelRegistry,
    Manager, ManagerEvent, ManagerId, PropertyKind, PropertyVector, SwitchState, event_channel,
};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::{debug, info};
use tracing_subscriber::{EnvFilter, fmt, prelude::*};

/// starwire - client for INDI-style device servers
#[derive(Parser)]
#[command(name = "starwire")]
#[command(version, about, long_about = None)]
#[command(after_help = "\
Examples:
  starwire watch \"Telescope Simulator\"
  starwire get \"Telescope Simulator.EQUATORIAL_EOD_COORD\"
  starwire set \"Telescope Simulator.CONNECTION.CONNECT=On\"
  starwire upload \"CCD Simulator.CCD1.CCD1\" frame.fits
  starwire local \"indi_simulator_telescope=Telescope Simulator\" indi_simulator_ccd=\"CCD Simulator\"
")]
struct Cli {
    #[command(flatten)]
    connection: ConnectionArgs,

    /// Print events and vectors as JSON, one object per line
    #[arg(long, global = true)]
    json: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Args)]
struct ConnectionArgs {
    /// Server host (overrides the config file)
    #[arg(long, global = true)]
    host: Option<String>,

    /// Server port (overrides the config file)
    #[arg(long, short, global = true)]
    port: Option<u16>,

    /// Config file (defaults to ~/.config/starwire/config.json)
    #[arg(long, global = true, value_name = "PATH")]
    config: Option<PathBuf>,

    /// Seconds to wait for a property to be defined
    #[arg(long, global = true, default_value_t = 10)]
    wait: u64,
}

#[derive(Subcommand)]
enum Commands {
    /// Connect and print every event until interrupted
    Watch {
        /// Devices to watch
        #[arg(required = true)]
        devices: Vec<String>,
    },

    /// Print the current value of a property
    Get {
        /// DEVICE.PROPERTY
        target: String,
    },

    /// Change one element of a property
    Set {
        /// DEVICE.PROPERTY.ELEMENT=VALUE
        assignment: String,
    },

    /// Upload a file to a BLOB element
    Upload {
        /// DEVICE.PROPERTY.ELEMENT
        target: String,

        /// File to send
        file: PathBuf,

        /// Format tag (defaults to the file extension, e.g. `.fits`)
        #[arg(long)]
        format: Option<String>,
    },

    /// Start a local server with the given drivers and watch it
    Local {
        /// Driver executables, one device each. Use DRIVER=DEVICE when the
        /// driver advertises a device name other than its executable name.
        #[arg(required = true, value_name = "DRIVER[=DEVICE]")]
        drivers: Vec<String>,
    },
}

/// Set up logging to stderr, plus a log file in debug builds.
fn setup_logging() {
    let default_level = if cfg!(debug_assertions) {
        "debug"
    } else {
        "info"
    };

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(format!("starwire={default_level}")));

    let dirs = Directories::new();
    if cfg!(debug_assertions) && dirs.ensure_exists().is_ok() {
        let timestamp = chrono::Local::now().format("%Y%m%d_%H%M%S");
        let log_filename = format!("starwire-{timestamp}.log");

        let file_appender = tracing_appender::rolling::never(&dirs.logs, &log_filename);
        let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);

        std::mem::forget(guard);

        let file_layer = fmt::layer()
            .with_writer(non_blocking)
            .with_ansi(false)
            .with_target(true)
            .with_line_number(true);

        tracing_subscriber::registry()
            .with(file_layer)
            .with(
                fmt::layer()
                    .with_writer(std::io::stderr)
                    .with_target(true),
            )
            .with(filter)
            .init();

        debug!("Logging to {}", dirs.logs.join(&log_filename).display());
    } else {
        tracing_subscriber::registry()
            .with(
                fmt::layer()
                    .with_writer(std::io::stderr)
                    .with_target(true),
            )
            .with(filter)
            .init();
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    setup_logging();

    let config = load_config(&cli.connection)?;
    let wait = Duration::from_secs(cli.connection.wait);

    match cli.command {
        Commands::Watch { devices } => {
            let descriptors = devices.iter().map(|d| DeviceDescriptor::new(d, d, d));
            run_watch(&config, descriptors.collect(), ConnectionMode::Remote, cli.json).await
        }
        Commands::Get { target } => run_get(&config, &target, wait, cli.json).await,
        Commands::Set { assignment } => run_set(&config, &assignment, wait, cli.json).await,
        Commands::Upload {
            target,
            file,
            format,
        } => run_upload(&config, &target, &file, format, wait).await,
        Commands::Local { drivers } => {
            let descriptors = drivers.iter().map(|d| driver_descriptor(d));
            run_watch(&config, descriptors.collect(), ConnectionMode::Local, cli.json).await
        }
    }
}

/// `DRIVER=DEVICE`, or a bare driver whose device carries the same name.
fn driver_descriptor(spec: &str) -> DeviceDescriptor {
    match spec.split_once('=') {
        Some((driver, device)) if !driver.is_empty() && !device.is_empty() => {
            DeviceDescriptor::new(driver, device, device)
        }
        _ => DeviceDescriptor::new(spec, spec, spec),
    }
}

fn load_config(args: &ConnectionArgs) -> Result<Config> {
    let path = args
        .config
        .clone()
        .unwrap_or_else(|| Directories::new().config_file);
    let mut config =
        Config::load(&path).with_context(|| format!("Failed to load {}", path.display()))?;

    if let Some(host) = &args.host {
        config.connection.host.clone_from(host);
    }
    if let Some(port) = args.port {
        config.connection.port = port;
    }
    Ok(config)
}

/// A connected manager whose receive loop runs on its own task
struct Session {
    sender: CommandSender,
    events: EventReceiver,
    task: JoinHandle<(Manager, starwire_core::Result<()>)>,
}

impl Session {
    async fn open(
        config: &Config,
        descriptors: Vec<DeviceDescriptor>,
        mode: ConnectionMode,
    ) -> Result<Self> {
        let (tx, events) = event_channel();
        let mut manager = Manager::from_config(ManagerId(1), config, Arc::new(LabelRegistry::new()), tx)
            .with_mode(mode);
        manager.add_descriptors(descriptors);

        manager.connect().await.with_context(|| {
            format!(
                "Could not reach {}:{}",
                config.connection.host, config.connection.port
            )
        })?;

        let sender = manager.sender();
        let task = tokio::spawn(async move {
            let result = manager.run().await;
            (manager, result)
        });

        Ok(Self {
            sender,
            events,
            task,
        })
    }

    /// Wait until `device.property` is defined and return it.
    async fn property(&mut self, device: &str, property: &str, wait: Duration) -> Result<PropertyVector> {
        tokio::time::timeout(wait, async {
            while let Some(event) = self.events.recv().await {
                match event {
                    ManagerEvent::PropertyDefined {
                        device: d, vector, ..
                    } if d == device && vector.name == property => return Ok(vector),
                    ManagerEvent::ConnectionError { error, .. } => return Err(anyhow!(error)),
                    other => debug!("{}", output::format_event(&other)),
                }
            }
            Err(anyhow!("Connection closed"))
        })
        .await
        .map_err(|_| anyhow!("{device}.{property} was not defined within {}s", wait.as_secs()))?
    }

    /// Wait for the server to answer a change with an update of `property`.
    async fn update(&mut self, device: &str, property: &str, wait: Duration) -> Option<PropertyVector> {
        tokio::time::timeout(wait, async {
            while let Some(event) = self.events.recv().await {
                if let ManagerEvent::PropertyUpdated {
                    device: d, vector, ..
                } = event
                    && d == device
                    && vector.name == property
                {
                    return Some(vector);
                }
            }
            None
        })
        .await
        .ok()
        .flatten()
    }

    async fn close(self) -> Result<()> {
        // The loop may already have stopped on its own
        if let Err(e) = self.sender.disconnect().await {
            debug!("Disconnect: {e}");
        }
        let (mut manager, result) = self.task.await.context("Receive loop panicked")?;
        manager.stop_server().await?;
        result.context("Connection lost")
    }
}

async fn run_watch(
    config: &Config,
    descriptors: Vec<DeviceDescriptor>,
    mode: ConnectionMode,
    json: bool,
) -> Result<()> {
    let mut session = Session::open(config, descriptors, mode).await?;
    info!(
        "Watching {}:{} (Ctrl-C to stop)",
        config.connection.host, config.connection.port
    );

    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => break,
            event = session.events.recv() => match event {
                Some(event) => {
                    println!("{}", output::render_event(&event, json));
                    if matches!(event, ManagerEvent::ConnectionError { .. }) {
                        break;
                    }
                }
                None => break,
            },
        }
    }

    session.close().await
}

/// Split `DEVICE.PROPERTY[.ELEMENT]`. Device names may contain dots,
/// property and element names do not.
fn split_target(target: &str, with_element: bool) -> Result<(String, String, Option<String>)> {
    let parts = if with_element { 3 } else { 2 };
    let mut pieces: Vec<&str> = target.rsplitn(parts, '.').collect();
    if pieces.len() != parts || pieces.iter().any(|p| p.is_empty()) {
        let expected = if with_element {
            "DEVICE.PROPERTY.ELEMENT"
        } else {
            "DEVICE.PROPERTY"
        };
        bail!("Expected {expected}, got '{target}'");
    }
    pieces.reverse();

    let element = with_element.then(|| pieces[2].to_string());
    Ok((pieces[0].to_string(), pieces[1].to_string(), element))
}

fn session_descriptor(device: &str) -> Vec<DeviceDescriptor> {
    vec![DeviceDescriptor::new(device, device, device)]
}

fn print_vector(device: &str, vector: &PropertyVector, json: bool) -> Result<()> {
    if json {
        println!("{}", serde_json::to_string(vector)?);
    } else {
        println!("{}", output::format_vector(device, vector));
    }
    Ok(())
}

async fn run_get(config: &Config, target: &str, wait: Duration, json: bool) -> Result<()> {
    let (device, property, _) = split_target(target, false)?;
    let mut session = Session::open(config, session_descriptor(&device), ConnectionMode::Remote).await?;

    let vector = session.property(&device, &property, wait).await;
    let closed = session.close().await;

    print_vector(&device, &vector?, json)?;
    closed
}

/// Apply `value` to `element` of a copy of `vector`.
fn assign(vector: &PropertyVector, element: &str, value: &str) -> Result<PropertyVector> {
    if !vector.permission.is_writable() {
        bail!("{} is read-only", vector.name);
    }
    if !vector.elements.contains(element) {
        bail!("{} has no element {element}", vector.name);
    }

    let mut changed = vector.clone();
    match &mut changed.elements {
        Elements::Text(elements) => {
            for e in elements.iter_mut().filter(|e| e.name == element) {
                e.value = value.to_string();
            }
        }
        Elements::Number(elements) => {
            for e in elements.iter_mut().filter(|e| e.name == element) {
                if !e.set_from_text(value) {
                    bail!("'{value}' is not a number");
                }
            }
        }
        Elements::Switch(elements) => {
            let state: SwitchState = value.parse()?;
            for e in elements.iter_mut().filter(|e| e.name == element) {
                e.state = state;
            }
        }
        Elements::Light(_) | Elements::Blob(_) => {
            bail!("{} vectors cannot be set from the command line", vector.kind());
        }
    }
    Ok(changed)
}

async fn run_set(config: &Config, assignment: &str, wait: Duration, json: bool) -> Result<()> {
    let (target, value) = assignment
        .split_once('=')
        .ok_or_else(|| anyhow!("Expected DEVICE.PROPERTY.ELEMENT=VALUE, got '{assignment}'"))?;
    let (device, property, element) = split_target(target, true)?;
    let element = element.unwrap_or_default();

    let mut session = Session::open(config, session_descriptor(&device), ConnectionMode::Remote).await?;
    let result = async {
        let vector = session.property(&device, &property, wait).await?;
        let changed = assign(&vector, &element, value)?;

        match changed.kind() {
            PropertyKind::Text => session.sender.send_new_text(&device, &changed).await?,
            PropertyKind::Number => session.sender.send_new_number(&device, &changed).await?,
            _ => {
                session
                    .sender
                    .send_new_switch(&device, &changed, &element)
                    .await?;
            }
        }

        let answer = session.update(&device, &property, wait).await;
        Ok::<_, anyhow::Error>(answer.unwrap_or(changed))
    }
    .await;
    let closed = session.close().await;

    print_vector(&device, &result?, json)?;
    closed
}

fn format_from_path(path: &Path) -> String {
    path.extension()
        .map(|ext| format!(".{}", ext.to_string_lossy()))
        .unwrap_or_default()
}

async fn run_upload(
    config: &Config,
    target: &str,
    file: &Path,
    format: Option<String>,
    wait: Duration,
) -> Result<()> {
    let (device, property, element) = split_target(target, true)?;
    let element = element.unwrap_or_default();
    let format = format.unwrap_or_else(|| format_from_path(file));
    let data = tokio::fs::read(file)
        .await
        .with_context(|| format!("Failed to read {}", file.display()))?;

    let mut session = Session::open(config, session_descriptor(&device), ConnectionMode::Remote).await?;
    let result = async {
        let vector = session.property(&device, &property, wait).await?;
        if vector.kind() != PropertyKind::Blob {
            bail!("{device}.{property} is a {} vector", vector.kind());
        }
        session
            .sender
            .send_blob(&device, &property, &element, &format, &data)
            .await?;
        Ok::<(), anyhow::Error>(())
    }
    .await;
    let closed = session.close().await;

    result?;
    println!("Sent {} bytes to {device}.{property}.{element}", data.len());
    closed
}

#[cfg(test)]
mod tests {
    use super::*;
    use starwire_core::{NumberElement, Permission, SwitchElement, TextElement};

    #[test]
    fn test_split_target() {
        assert_eq!(
            split_target("Telescope Simulator.EQUATORIAL_EOD_COORD", false).unwrap(),
            (
                "Telescope Simulator".to_string(),
                "EQUATORIAL_EOD_COORD".to_string(),
                None
            )
        );
        assert_eq!(
            split_target("v1.2 CCD.CCD1.CCD1", true).unwrap(),
            (
                "v1.2 CCD".to_string(),
                "CCD1".to_string(),
                Some("CCD1".to_string())
            )
        );
        assert!(split_target("Tele", false).is_err());
        assert!(split_target("Tele.EQCOORD", true).is_err());
        assert!(split_target("Tele..RA", true).is_err());
    }

    #[test]
    fn test_assign_number_accepts_sexagesimal() {
        let vector = PropertyVector::new(
            "EQCOORD",
            Elements::Number(vec![NumberElement {
                name: "RA".to_string(),
                ..NumberElement::default()
            }]),
        );

        let changed = assign(&vector, "RA", "6:30").unwrap();

        assert_eq!(changed.number("RA"), Some(6.5));
        assert!(assign(&vector, "RA", "east").is_err());
        assert!(assign(&vector, "DEC", "1").is_err());
    }

    #[test]
    fn test_assign_switch_and_text() {
        let switch = PropertyVector::new(
            "CONNECTION",
            Elements::Switch(vec![SwitchElement {
                name: "CONNECT".to_string(),
                ..SwitchElement::default()
            }]),
        );
        let changed = assign(&switch, "CONNECT", "On").unwrap();
        assert_eq!(changed.switch("CONNECT"), Some(SwitchState::On));
        assert!(assign(&switch, "CONNECT", "maybe").is_err());

        let mut text = PropertyVector::new(
            "DRIVER_INFO",
            Elements::Text(vec![TextElement {
                name: "DRIVER_NAME".to_string(),
                ..TextElement::default()
            }]),
        );
        assert_eq!(
            assign(&text, "DRIVER_NAME", "Sim").unwrap().text("DRIVER_NAME"),
            Some("Sim")
        );
        text.permission = Permission::ReadOnly;
        assert!(assign(&text, "DRIVER_NAME", "Sim").is_err());
    }

    #[test]
    fn test_driver_descriptor_names_advertised_device() {
        let descriptor = driver_descriptor("indi_simulator_telescope=Telescope Simulator");
        assert_eq!(descriptor.driver, "indi_simulator_telescope");
        assert_eq!(descriptor.driver_class, "Telescope Simulator");
        assert_eq!(descriptor.tree_label, "Telescope Simulator");

        let bare = driver_descriptor("indi_simulator_ccd");
        assert_eq!(bare.driver, "indi_simulator_ccd");
        assert_eq!(bare.driver_class, "indi_simulator_ccd");

        assert_eq!(driver_descriptor("=Tele").driver, "=Tele");
    }

    #[test]
    fn test_format_from_path() {
        assert_eq!(format_from_path(Path::new("/tmp/frame.fits")), ".fits");
        assert_eq!(format_from_path(Path::new("noext")), "");
    }

    #[test]
    fn test_cli_parses_subcommands() {
        let cli = Cli::try_parse_from([
            "starwire",
            "--port",
            "7625",
            "set",
            "Tele.CONNECTION.CONNECT=On",
            "--json",
        ])
        .unwrap();

        assert_eq!(cli.connection.port, Some(7625));
        assert!(cli.json);
        assert!(matches!(cli.command, Commands::Set { assignment } if assignment == "Tele.CONNECTION.CONNECT=On"));

        assert!(Cli::try_parse_from(["starwire", "watch"]).is_err());
    }
}
