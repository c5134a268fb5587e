use anyhow::{bail, Context, Result};
use clap::Parser;
use porter_audio::WatchdogConfig;
use porter_relay::{DoorbellConfig, RelayConfig};
use serde::Deserialize;
use std::path::PathBuf;
use std::time::Duration;

#[derive(Parser, Debug, Default)]
#[command(
    name = "porterd",
    about = "Bridges an IP intercom's voice channel to a local soundcard and a doorbell webhook."
)]
pub struct Cli {
    /// Path to a TOML settings file; flags and env vars override it.
    #[arg(long)]
    pub config: Option<PathBuf>,

    /// Address of the intercom device.
    #[arg(long, env = "PORTER_DEVICE_HOST")]
    pub device_host: Option<String>,

    /// Control port on the intercom device.
    #[arg(long, env = "PORTER_DEVICE_PORT")]
    pub device_port: Option<u16>,

    #[arg(long, env = "PORTER_DEVICE_USERNAME")]
    pub device_username: Option<String>,

    #[arg(long, env = "PORTER_DEVICE_PASSWORD")]
    pub device_password: Option<String>,

    /// ALSA name of the soundcard delivering the mu-law signal.
    #[arg(long, env = "PORTER_SOUNDCARD")]
    pub soundcard: Option<String>,

    /// Host of the doorbell webhook to GET on a button press.
    #[arg(long, env = "PORTER_DOORBELL_HOST")]
    pub doorbell_host: Option<String>,

    #[arg(long, env = "PORTER_DOORBELL_PORT")]
    pub doorbell_port: Option<u16>,

    #[arg(long, env = "PORTER_DOORBELL_PATH")]
    pub doorbell_path: Option<String>,

    /// Milliseconds of unbroken silence before hanging up a call.
    #[arg(long)]
    pub hangup_silence_ms: Option<u64>,

    /// Seconds between watchdog checks of the capture loop heartbeat.
    #[arg(long)]
    pub watchdog_interval_secs: Option<u64>,

    /// Seconds without a heartbeat before the capture loop counts as dead.
    #[arg(long)]
    pub watchdog_stale_secs: Option<u64>,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(deny_unknown_fields)]
pub struct FileSettings {
    #[serde(default)]
    pub device: FileDevice,
    #[serde(default)]
    pub audio: FileAudio,
    #[serde(default)]
    pub doorbell: FileDoorbell,
    #[serde(default)]
    pub relay: FileRelay,
    #[serde(default)]
    pub watchdog: FileWatchdog,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(deny_unknown_fields)]
pub struct FileDevice {
    pub host: Option<String>,
    pub port: Option<u16>,
    pub username: Option<String>,
    pub password: Option<String>,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(deny_unknown_fields)]
pub struct FileAudio {
    pub soundcard: Option<String>,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(deny_unknown_fields)]
pub struct FileDoorbell {
    pub host: Option<String>,
    pub port: Option<u16>,
    pub path: Option<String>,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(deny_unknown_fields)]
pub struct FileRelay {
    pub hangup_silence_ms: Option<u64>,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(deny_unknown_fields)]
pub struct FileWatchdog {
    pub interval_secs: Option<u64>,
    pub stale_secs: Option<u64>,
}

#[derive(Debug, Clone)]
pub struct DeviceSettings {
    pub host: String,
    pub port: u16,
    pub username: String,
    pub password: String,
}

#[derive(Debug, Clone)]
pub struct Settings {
    pub device: DeviceSettings,
    pub soundcard: String,
    pub doorbell: DoorbellConfig,
    pub relay: RelayConfig,
    pub watchdog: WatchdogConfig,
}

impl Settings {
    pub fn load(cli: Cli) -> Result<Self> {
        let file = match &cli.config {
            Some(path) => {
                let raw = std::fs::read_to_string(path)
                    .with_context(|| format!("reading settings file {}", path.display()))?;
                toml::from_str(&raw)
                    .with_context(|| format!("parsing settings file {}", path.display()))?
            }
            None => FileSettings::default(),
        };
        Self::merge(cli, file)
    }

    /// CLI (and env) values win over the file; fixed defaults fill the rest.
    pub fn merge(cli: Cli, file: FileSettings) -> Result<Self> {
        let device = DeviceSettings {
            host: require("device host", cli.device_host.or(file.device.host))?,
            port: cli.device_port.or(file.device.port).unwrap_or(80),
            username: cli
                .device_username
                .or(file.device.username)
                .unwrap_or_else(|| "admin".to_string()),
            password: require("device password", cli.device_password.or(file.device.password))?,
        };

        let soundcard = require("soundcard name", cli.soundcard.or(file.audio.soundcard))?;

        let doorbell = DoorbellConfig {
            host: require("doorbell host", cli.doorbell_host.or(file.doorbell.host))?,
            port: cli.doorbell_port.or(file.doorbell.port).unwrap_or(80),
            path: cli
                .doorbell_path
                .or(file.doorbell.path)
                .unwrap_or_else(|| "/".to_string()),
        };

        let mut relay = RelayConfig::default();
        if let Some(ms) = cli.hangup_silence_ms.or(file.relay.hangup_silence_ms) {
            relay.hangup_after = Duration::from_millis(ms);
        }

        let mut watchdog = WatchdogConfig::default();
        if let Some(secs) = cli.watchdog_interval_secs.or(file.watchdog.interval_secs) {
            watchdog.check_interval = Duration::from_secs(secs);
        }
        if let Some(secs) = cli.watchdog_stale_secs.or(file.watchdog.stale_secs) {
            watchdog.stale_after = Duration::from_secs(secs);
        }

        Ok(Self {
            device,
            soundcard,
            doorbell,
            relay,
            watchdog,
        })
    }
}

fn require<T>(what: &str, value: Option<T>) -> Result<T> {
    match value {
        Some(value) => Ok(value),
        None => bail!("missing required setting: {}", what),
    }
}
