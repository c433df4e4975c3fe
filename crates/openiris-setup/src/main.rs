//! OpenIris setup tool entry point.
//!
//! Finds a board that is announcing itself in setup mode, connects to it,
//! runs one subcommand and lets the board resume booting.
//!
//! # Architecture
//!
//! ```text
//! main()
//!  └─ load_config()              -- optional TOML overrides
//!  └─ DiscoveryCoordinator       -- unless --port is given
//!  └─ select_device()            -- --serial, or the first board found
//!  └─ spawn_blocking
//!       └─ SerialSession::open_with_retry()
//!       └─ pause_setup()
//!       └─ OpenIrisDevice::<subcommand>()
//!       └─ close(resume)
//! ```

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Context};
use clap::{Parser, Subcommand};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use openiris_core::domain::{channel_distribution, SettingsSummary};
use openiris_core::{DeviceMode, WifiNetwork};
use openiris_setup::application::device::{DeviceError, OpenIrisDevice};
use openiris_setup::application::monitor::{LogMonitor, MonitorLine};
use openiris_setup::infrastructure::discovery::{select_device, DiscoveryCoordinator};
use openiris_setup::infrastructure::serial::session::SerialSession;
use openiris_setup::infrastructure::serial::{enumerate_ports, PortOpener, SystemPortOpener};
use openiris_setup::infrastructure::storage::config::{
    config_file_path, load_config, render_config, save_config, AppConfig, SerialConfig,
};

#[derive(Debug, Parser)]
#[command(name = "openiris-setup", version, about = "Configure OpenIris boards over USB serial")]
struct Cli {
    /// Serial port to use; skips discovery.
    #[arg(long, env = "OPENIRIS_PORT", global = true)]
    port: Option<String>,

    /// Serial number of the board to use when several are in setup mode.
    #[arg(long = "serial", value_name = "SERIAL", env = "OPENIRIS_SERIAL", global = true)]
    device_serial: Option<String>,

    /// Discovery deadline in seconds.
    #[arg(long, global = true)]
    timeout: Option<u64>,

    /// WiFi scan deadline in seconds.
    #[arg(long, global = true)]
    scan_timeout: Option<u64>,

    /// Config file to read instead of the platform default.
    #[arg(long, env = "OPENIRIS_CONFIG", global = true)]
    config: Option<PathBuf>,

    /// Log at debug level unless RUST_LOG says otherwise.
    #[arg(long, global = true)]
    debug: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Clone, Subcommand)]
enum Command {
    /// List boards currently in setup mode.
    Discover,
    /// Scan for WiFi networks.
    Scan,
    /// Store WiFi credentials, by SSID or by index into a fresh scan.
    SetWifi {
        #[arg(required_unless_present = "index")]
        ssid: Option<String>,
        #[arg(long, conflicts_with = "ssid")]
        index: Option<usize>,
        #[arg(long, default_value = "")]
        password: String,
    },
    /// Scan, store a network, connect and wait for an IP address.
    AutoWifi {
        /// Index into the scan; defaults to the strongest visible network.
        #[arg(long)]
        index: Option<usize>,
        #[arg(long, default_value = "")]
        password: String,
    },
    /// Connect to the stored network.
    ConnectWifi,
    /// Show WiFi connection status.
    WifiStatus,
    /// Show or change the streaming mode.
    Mode { mode: Option<DeviceMode> },
    /// Show or change the mDNS hostname.
    Name { hostname: Option<String> },
    /// Show or change the external LED duty cycle (0-100).
    Led { duty: Option<u8> },
    /// Show serial number, MAC address and firmware identity.
    Serial,
    /// Show every readable setting.
    Summary,
    /// Start streaming immediately.
    Stream,
    /// Restart the board.
    Restart,
    /// Follow the board's log output until Ctrl-C.
    Monitor,
    /// Print the effective host configuration, or write it to the config file.
    Config {
        #[arg(long)]
        write: bool,
    },
}

impl Command {
    /// Whether the board should be held in setup mode while the command runs.
    fn holds_setup(&self) -> bool {
        !matches!(self, Command::Monitor | Command::Discover)
    }

    /// Whether the board should be released from setup mode on disconnect.
    fn resumes_on_close(&self) -> bool {
        !matches!(self, Command::Monitor | Command::Restart | Command::Stream)
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let mut config = load_config(cli.config.as_deref()).context("failed to load configuration")?;
    init_tracing(&cli, &config);

    if let Some(secs) = cli.scan_timeout {
        config.serial.scan_timeout_secs = secs;
    }
    let mut discovery = config.discovery.discovery_settings();
    if let Some(secs) = cli.timeout {
        discovery.timeout = Duration::from_secs(secs);
    }
    discovery.target_serial = cli.device_serial.clone();

    if let Command::Config { write } = cli.command {
        return show_or_write_config(&config, cli.config.as_deref(), write);
    }

    let opener: Arc<dyn PortOpener> = Arc::new(SystemPortOpener::new(config.serial.baud_rate));

    let port = match (&cli.command, cli.port.clone()) {
        (Command::Discover, _) | (_, None) => {
            let ports = enumerate_ports().context("failed to list serial ports")?;
            let devices = DiscoveryCoordinator::new(Arc::clone(&opener), discovery)
                .discover(ports)
                .await;

            if matches!(cli.command, Command::Discover) {
                if devices.is_empty() {
                    println!("No OpenIris devices found.");
                }
                for device in &devices {
                    println!("{device}");
                }
                return Ok(());
            }

            if devices.len() > 1 && cli.device_serial.is_none() {
                let serials: Vec<&str> = devices.iter().map(|d| d.serial.as_str()).collect();
                warn!(
                    "{} boards found ({}); using the first, pass --serial to choose",
                    devices.len(),
                    serials.join(", ")
                );
            }
            match (select_device(devices, cli.device_serial.as_deref()), &cli.device_serial) {
                (Some(device), _) => {
                    info!("using {device}");
                    device.port
                }
                (None, Some(serial)) => bail!("board {serial} was not found in setup mode"),
                (None, None) => bail!(
                    "no OpenIris device found; power-cycle the board and retry within its setup window"
                ),
            }
        }
        (_, Some(port)) => port,
    };

    // Shutdown flag for the monitor loop.  Other commands keep the default
    // Ctrl-C behaviour.
    let running = Arc::new(AtomicBool::new(true));
    if matches!(cli.command, Command::Monitor) {
        let running_clone = Arc::clone(&running);
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                info!("interrupt received");
                running_clone.store(false, Ordering::Relaxed);
            }
        });
    }

    let serial_config = config.serial.clone();
    let command = cli.command;
    tokio::task::spawn_blocking(move || run_on_device(opener.as_ref(), &port, &serial_config, command, &running))
        .await
        .context("device task panicked")?
}

fn show_or_write_config(config: &AppConfig, path: Option<&Path>, write: bool) -> anyhow::Result<()> {
    let path = match path {
        Some(path) => path.to_path_buf(),
        None => config_file_path()?,
    };
    if write {
        save_config(config, &path).with_context(|| format!("failed to write {}", path.display()))?;
        println!("Configuration written to {}", path.display());
    } else {
        println!("# {}", path.display());
        print!("{}", render_config(config)?);
    }
    Ok(())
}

fn init_tracing(cli: &Cli, config: &AppConfig) {
    let fallback = if cli.debug { "debug" } else { config.general.log_level.as_str() };
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(fallback)))
        .init();
}

// ── Device session ────────────────────────────────────────────────────────────

fn run_on_device(
    opener: &dyn PortOpener,
    port: &str,
    serial: &SerialConfig,
    command: Command,
    running: &AtomicBool,
) -> anyhow::Result<()> {
    let mut session = SerialSession::open_with_retry(
        opener,
        port,
        serial.session_config(),
        serial.open_retries,
        serial.open_retry_delay(),
    )
    .with_context(|| format!("could not connect to {port}"))?;

    if command.holds_setup() {
        session.pause_setup();
    }
    let resume = command.resumes_on_close();

    if matches!(command, Command::Monitor) {
        let mut monitor = LogMonitor::new(session.config().poll_interval);
        println!("Monitoring {port}; press Ctrl-C to stop.");
        let result = monitor.run(&mut session, running, print_monitor_line);
        session.close(false);
        return result.context("monitoring stopped");
    }

    let mut device = OpenIrisDevice::new(session);
    let result = execute(&mut device, command);
    device.into_transport().close(resume);
    result
}

fn execute(device: &mut OpenIrisDevice<SerialSession>, command: Command) -> anyhow::Result<()> {
    match command {
        Command::Discover | Command::Monitor | Command::Config { .. } => {}
        Command::Scan => {
            let networks = device.scan_networks()?;
            print_networks(networks);
        }
        Command::SetWifi { ssid, index, password } => match (ssid, index) {
            (_, Some(index)) => {
                device.scan_networks()?;
                let network = device.configure_wifi_from_scan(index, &password)?;
                println!("WiFi credentials stored for {}", network.ssid);
            }
            (Some(ssid), None) => {
                device.set_wifi(&ssid, &password)?;
                println!("WiFi credentials stored for {ssid}");
            }
            (None, None) => bail!("give an SSID or --index"),
        },
        Command::AutoWifi { index, password } => {
            let (network, status) = match device.auto_setup(index, &password) {
                Err(DeviceError::WifiNotConfirmed { last_status }) => bail!(
                    "board did not get an IP address (last status: {}); check the password and run wifi-status",
                    last_status.as_deref().unwrap_or("unknown")
                ),
                other => other?,
            };
            println!("Connected to {} with address {}", network.ssid, status.ip().unwrap_or("-"));
        }
        Command::ConnectWifi => {
            device.connect_wifi()?;
            println!("Connection attempt started; check wifi-status in a few seconds.");
        }
        Command::WifiStatus => {
            let status = device.wifi_status()?;
            println!("Status:      {}", status.status);
            println!("Configured:  {}", status.networks_configured);
            println!("IP address:  {}", status.ip().unwrap_or("-"));
        }
        Command::Mode { mode: Some(mode) } => {
            device.switch_mode(mode)?;
            println!("Mode set to {mode}; restart the board to apply.");
        }
        Command::Mode { mode: None } => println!("{}", device.device_mode()?),
        Command::Name { hostname: Some(hostname) } => {
            device.set_hostname(&hostname)?;
            println!("Board will be reachable at http://{hostname}.local/");
        }
        Command::Name { hostname: None } => println!("{}", device.hostname()?),
        Command::Led { duty: Some(duty) } => {
            device.set_led_duty_cycle(duty)?;
            println!("LED duty cycle set to {duty}%");
        }
        Command::Led { duty: None } => {
            println!("Duty cycle:  {}%", device.led_duty_cycle()?);
            match device.led_current() {
                Ok(ma) => println!("Current:     {ma:.1} mA"),
                Err(e) => warn!("could not read LED current: {e}"),
            }
        }
        Command::Serial => {
            let info = device.serial_info()?;
            println!("Serial:  {}", info.serial);
            println!("MAC:     {}", info.mac);
        }
        Command::Summary => print_summary(&device.settings_summary()),
        Command::Stream => {
            device.start_streaming()?;
            println!("Streaming started.");
        }
        Command::Restart => {
            device.restart()?;
            println!("Restart requested.");
        }
    }
    Ok(())
}

// ── Output ────────────────────────────────────────────────────────────────────

fn print_networks(networks: &[WifiNetwork]) {
    if networks.is_empty() {
        println!("No networks found.");
        return;
    }
    println!("{:>3}  {:<32}  {:>4}  {:>5}  SECURITY", "#", "SSID", "CH", "RSSI");
    for (index, network) in networks.iter().enumerate() {
        let ssid = if network.is_hidden() { "<hidden>" } else { network.ssid.as_str() };
        println!(
            "{index:>3}  {ssid:<32}  {:>4}  {:>5}  {}",
            network.channel,
            network.rssi,
            network.security_type()
        );
    }
    let channels: Vec<String> = channel_distribution(networks)
        .into_iter()
        .map(|(channel, count)| format!("{channel}:{count}"))
        .collect();
    println!("Channels: {}", channels.join(" "));
}

fn print_summary(summary: &SettingsSummary) {
    if summary.is_empty() {
        println!("The board did not answer any query.");
        return;
    }
    let or_dash = |value: Option<String>| value.unwrap_or_else(|| "-".to_string());

    println!("Serial:      {}", or_dash(summary.serial.as_ref().map(|s| s.serial.clone())));
    println!("MAC:         {}", or_dash(summary.serial.as_ref().map(|s| s.mac.clone())));
    println!("Hostname:    {}", or_dash(summary.advertised_name.clone()));
    println!("Firmware:    {}", or_dash(summary.info.as_ref().map(|i| format!("{} {}", i.who_am_i, i.version))));
    println!("Mode:        {}", or_dash(summary.mode.map(|m| m.to_string())));
    println!("LED duty:    {}", or_dash(summary.led_duty_cycle.map(|d| format!("{d}%"))));
    println!("LED current: {}", or_dash(summary.led_current_ma.map(|c| format!("{c:.1} mA"))));
    println!(
        "WiFi:        {}",
        or_dash(summary.wifi.as_ref().map(|w| match w.ip() {
            Some(ip) => format!("{} ({ip})", w.status),
            None => w.status.clone(),
        }))
    );
}

fn print_monitor_line(line: MonitorLine) {
    match line {
        MonitorLine::Text(text) => println!("{text}"),
        MonitorLine::Frame(frame) => println!("{}", serde_json::Value::Object(frame)),
        MonitorLine::Heartbeat(_) => {}
    }
}
