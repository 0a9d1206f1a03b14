use clap::Parser;
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use tracing::{error, info, warn};

mod channel;
mod config;
mod downlink;
mod error;
mod join;
mod logging;
mod parser;
mod protocol;
mod retry;
mod shutdown;
mod uart;
mod uplink;

use crate::channel::CommandChannel;
use crate::config::{AppKey, Configuration, Eui, Identity, SpreadingFactor};
use crate::downlink::DownlinkLog;
use crate::error::ConfigError;
use crate::shutdown::CancelToken;
use crate::uart::SerialTransport;
use crate::uplink::UplinkLoop;

#[derive(Parser, Debug)]
#[command(
    name = "rn2483-otaa",
    about = "Join a LoRaWAN network through an RN2483 and send periodic confirmed uplinks"
)]
struct Cli {
    /// Configuration file (JSON). Defaults to the user config directory.
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Serial port the module is attached to
    #[arg(short, long)]
    port: Option<String>,

    #[arg(short, long)]
    baud: Option<u32>,

    #[arg(long)]
    app_key: Option<String>,

    /// Also called AppEUI
    #[arg(long)]
    join_eui: Option<String>,

    #[arg(long)]
    dev_eui: Option<String>,

    /// 7 to 12
    #[arg(long)]
    spreading_factor: Option<u8>,

    /// Application port for uplinks
    #[arg(long)]
    fport: Option<u8>,

    #[arg(short, long)]
    message: Option<String>,

    /// Duty cycle applied to all three channels, 0.0 to 1.0
    #[arg(long)]
    duty_cycle: Option<f64>,

    /// Send unconfirmed uplinks (mac tx uncnf)
    #[arg(long)]
    unconfirmed: bool,

    /// Use sys factoryRESET instead of sys reset before provisioning
    #[arg(long)]
    factory_reset: bool,

    /// Write the merged configuration back to the config file and exit
    #[arg(long)]
    save_config: bool,

    /// List available serial ports and exit
    #[arg(long)]
    list_ports: bool,
}

fn main() -> ExitCode {
    let cli = Cli::parse();

    if std::env::var("RUST_LOG_FORMAT").as_deref() == Ok("json") {
        logging::init_json();
    } else {
        logging::init();
    }

    info!("Starting program RN2483");

    if cli.list_ports {
        return list_ports();
    }

    let config_path = cli.config.clone().unwrap_or_else(Configuration::default_path);
    let config = match build_config(&cli, &config_path) {
        Ok(config) => config,
        Err(e) => {
            error!("{e}");
            return ExitCode::FAILURE;
        }
    };

    if cli.save_config {
        return match config.save_to_file(&config_path) {
            Ok(()) => {
                info!("Saved configuration to {}", config_path.display());
                ExitCode::SUCCESS
            }
            Err(e) => {
                error!("{e}");
                ExitCode::FAILURE
            }
        };
    }

    for channel in config.aggressive_channels() {
        warn!(
            "Channel {channel} duty cycle {} exceeds the 1% regulatory limit, do not deploy like this",
            config.radio.channels[channel].duty_cycle
        );
    }

    run(&config)
}

fn run(config: &Configuration) -> ExitCode {
    let transport = match SerialTransport::open(&config.serial) {
        Ok(transport) => transport,
        Err(e) => {
            error!("Failed to create the serial connection: {e}");
            return ExitCode::FAILURE;
        }
    };

    let cancel = CancelToken::new();
    let handler_token = cancel.clone();
    if let Err(e) = ctrlc::set_handler(move || {
        info!("Interrupt received, ending program");
        handler_token.cancel();
    }) {
        warn!("Could not install the interrupt handler: {e}");
    }

    let mut channel = CommandChannel::new(transport, &config.timing);

    let result = channel.firmware_version().and_then(|version| {
        if let Some(version) = version {
            info!("Module firmware: {version}");
        }
        let mut uplink = UplinkLoop::new(config, &cancel, DownlinkLog::new());
        let result = uplink.run(&mut channel);
        info!(
            "{} joined session(s), {} downlink(s) received",
            uplink.sessions(),
            uplink.sink().total()
        );
        result
    });

    // Closes the port on every path
    drop(channel);

    match result {
        Ok(()) => {
            info!("Serial port released, bye");
            ExitCode::SUCCESS
        }
        Err(e) => {
            error!("Lost the serial connection: {e}");
            ExitCode::FAILURE
        }
    }
}

fn list_ports() -> ExitCode {
    match serialport::available_ports() {
        Ok(ports) => {
            if ports.is_empty() {
                println!("No serial ports found");
            }
            for port in ports {
                println!("{}", port.port_name);
            }
            ExitCode::SUCCESS
        }
        Err(e) => {
            error!("Failed to enumerate serial ports: {e}");
            ExitCode::FAILURE
        }
    }
}

/// Config file (if present) with CLI flags applied on top.
fn build_config(cli: &Cli, path: &Path) -> Result<Configuration, ConfigError> {
    let mut config = if path.exists() {
        info!("Loading configuration from {}", path.display());
        Configuration::load_from_file(path)?
    } else {
        let (Some(app_key), Some(join_eui), Some(dev_eui)) =
            (&cli.app_key, &cli.join_eui, &cli.dev_eui)
        else {
            return Err(ConfigError::Invalid(format!(
                "no configuration file at {} and --app-key/--join-eui/--dev-eui not all given",
                path.display()
            )));
        };
        Configuration::new(Identity {
            app_key: AppKey::try_from(app_key.as_str())?,
            join_eui: Eui::try_from(join_eui.as_str())?,
            dev_eui: Eui::try_from(dev_eui.as_str())?,
        })
    };

    apply_overrides(&mut config, cli)?;
    config.validate()?;
    Ok(config)
}

fn apply_overrides(config: &mut Configuration, cli: &Cli) -> Result<(), ConfigError> {
    if let Some(app_key) = &cli.app_key {
        config.identity.app_key = AppKey::try_from(app_key.as_str())?;
    }
    if let Some(join_eui) = &cli.join_eui {
        config.identity.join_eui = Eui::try_from(join_eui.as_str())?;
    }
    if let Some(dev_eui) = &cli.dev_eui {
        config.identity.dev_eui = Eui::try_from(dev_eui.as_str())?;
    }
    if let Some(port) = &cli.port {
        config.serial.path = port.clone();
    }
    if let Some(baud) = cli.baud {
        config.serial.baud_rate = baud;
    }
    if let Some(sf) = cli.spreading_factor {
        config.radio.spreading_factor = SpreadingFactor::try_from(sf)?;
    }
    if let Some(fport) = cli.fport {
        config.uplink.fport = fport;
    }
    if let Some(message) = &cli.message {
        config.uplink.message = Some(message.clone());
    }
    if let Some(duty_cycle) = cli.duty_cycle {
        for channel in config.radio.channels.iter_mut() {
            channel.duty_cycle = duty_cycle;
        }
    }
    if cli.unconfirmed {
        config.uplink.confirmed = false;
    }
    if cli.factory_reset {
        config.radio.factory_reset = true;
    }
    Ok(())
}
