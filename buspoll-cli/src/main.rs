//! Command-line poller for devices described in a TOML file

use std::path::{Path, PathBuf};
use std::sync::Arc;

use clap::{Parser, Subcommand};
use serde::Deserialize;

use buspoll::config::{DeviceConfig, ModbusConfig, PollConfig, ProjectConfig, Settings};
use buspoll::modbus::{read_plan, ModbusBackend};
use buspoll::serial::SerialTransport;
use buspoll::model::Project;
use buspoll::{BackendKind, ConfigError, DecodeLevel, RequestError, Shutdown};

#[derive(Debug, thiserror::Error)]
enum Error {
    #[error("unable to read {path}: {source}")]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("bad configuration file: {0}")]
    Parse(#[from] toml::de::Error),
    #[error("bad project: {0}")]
    Project(#[from] ConfigError),
    #[error("{0}")]
    Request(#[from] RequestError),
    #[error("{0}")]
    Shutdown(#[from] Shutdown),
    #[error("a configuration file is required, see --config")]
    NoConfig,
    #[error("unable to wait for ctrl-c: {0}")]
    Signal(std::io::Error),
}

#[derive(Parser)]
#[command(name = "buspoll")]
#[command(about = "A command line program that polls Modbus RTU devices described by a configuration file")]
#[command(version)]
struct Cli {
    #[arg(short = 'c', long, help = "Path of the TOML configuration file")]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    #[command(about = "poll the configured devices until ctrl-c is pressed")]
    Run,

    #[command(about = "validate the configuration and print the requests of each device")]
    Check,

    #[command(about = "list the serial ports present on this system")]
    Ports,
}

/// Settings and project share one file
#[derive(Debug, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
struct ConfigFile {
    modbus: ModbusConfig,
    poll: PollConfig,
    decode: DecodeLevel,
    #[serde(rename = "device")]
    devices: Vec<DeviceConfig>,
}

struct Config {
    settings: Settings,
    project: ProjectConfig,
}

impl ConfigFile {
    fn load(path: &Path) -> Result<Config, Error> {
        let text = std::fs::read_to_string(path).map_err(|source| Error::Read {
            path: path.to_path_buf(),
            source,
        })?;
        let file: ConfigFile = toml::from_str(&text)?;
        Ok(Config {
            settings: Settings {
                modbus: file.modbus,
                poll: file.poll,
                decode: file.decode,
            },
            project: ProjectConfig {
                devices: file.devices,
            },
        })
    }
}

#[tokio::main(flavor = "multi_thread")]
async fn main() {
    tracing_subscriber::fmt()
        .with_max_level(tracing::Level::INFO)
        .with_target(false)
        .init();

    if let Err(ref e) = run().await {
        println!("error: {e}");
        std::process::exit(1);
    }
}

async fn run() -> Result<(), Error> {
    let cli = Cli::parse();

    match &cli.command {
        Command::Ports => list_ports(),
        Command::Check => check(&ConfigFile::load(cli.config_path()?)?),
        Command::Run => poll(ConfigFile::load(cli.config_path()?)?).await,
    }
}

impl Cli {
    fn config_path(&self) -> Result<&Path, Error> {
        self.config.as_deref().ok_or(Error::NoConfig)
    }
}

fn list_ports() -> Result<(), Error> {
    for port in buspoll::serial::available_ports()? {
        println!("{port}");
    }
    Ok(())
}

fn check(file: &Config) -> Result<(), Error> {
    let project = Project::from_config(&file.project)?;

    for device in project.devices() {
        match device.backend() {
            None => println!("{device}: software only, {} items", device.items().len()),
            Some(BackendKind::Modbus) => {
                println!("{device}: modbus address {}", device.address());
                let plan = read_plan(device);
                for tx in plan.transactions.iter() {
                    println!("  {tx}");
                }
                for (item, err) in plan.rejected.iter() {
                    println!("  skipped {item}: {err}");
                }
            }
        }
    }
    Ok(())
}

async fn poll(file: Config) -> Result<(), Error> {
    let project = Arc::new(Project::from_config(&file.project)?);
    let mut changes = project.subscribe();

    let backend = ModbusBackend::with_transport(
        SerialTransport::new(file.settings.modbus.clone(), file.settings.decode),
        &file.settings,
    );
    let port_state = backend.port_state();
    let handle = buspoll::poll::spawn(&file.settings, project, vec![backend.into()]);

    if let Some(mut state) = port_state {
        tokio::spawn(async move {
            while state.changed().await.is_ok() {
                let current = *state.borrow_and_update();
                tracing::info!("port state: {current:?}");
            }
        });
    }

    let printer = tokio::spawn(async move {
        loop {
            match changes.recv().await {
                Ok(change) => match change.value {
                    Some(value) => tracing::info!("item {} = {}", change.item, value),
                    None => tracing::info!("item {} disconnected", change.item),
                },
                Err(tokio::sync::broadcast::error::RecvError::Lagged(count)) => {
                    tracing::warn!("missed {count} item changes");
                }
                Err(tokio::sync::broadcast::error::RecvError::Closed) => return,
            }
        }
    });

    tokio::signal::ctrl_c().await.map_err(Error::Signal)?;
    tracing::info!("stopping");
    handle.stop().await?;
    printer.abort();
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn settings_and_devices_share_one_file() {
        let file: ConfigFile = toml::from_str(
            r#"
            [modbus]
            baud_rate = 19200

            [poll]
            interval_ms = 500

            [[device]]
            id = 1
            address = 5
            backend = "modbus"
            "#,
        )
        .unwrap();
        assert_eq!(file.modbus.baud_rate, 19200);
        assert_eq!(file.poll.interval_ms, 500);
        assert_eq!(file.devices.len(), 1);
    }

    #[test]
    fn unknown_sections_are_rejected() {
        assert!(toml::from_str::<ConfigFile>("[modbuss]\nbaud_rate = 19200\n").is_err());
        assert!(toml::from_str::<ConfigFile>("[poll]\ninterval_msec = 10\n").is_err());
    }
}
