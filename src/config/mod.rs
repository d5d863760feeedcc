//! Layered settings for the appliance.
//!
//! Sources, lowest precedence first:
//!
//! 1. built-in defaults,
//! 2. an optional TOML file (`roadcast.toml` by default),
//! 3. `ROADCAST_*` environment variables, with `__` separating nested keys
//!    (e.g. `ROADCAST_TELEMETRY__POLL_INTERVAL=2s`),
//! 4. the legacy `LIVEKIT_*` and `LOG_LEVEL` variables.
//!
//! ```toml
//! restart_delay = "1000ms"
//!
//! [workers.broadcast]
//! program = "/opt/roadcast/broadcast"
//! args = ["--headless"]
//!
//! [telemetry]
//! poll_interval = "1s"
//! smoothing_window = 30
//!
//! [livekit]
//! domain = "live.example.org"
//! room = "car"
//! ```

pub mod duration;

use std::path::{Path, PathBuf};
use std::time::Duration;

use config::builder::DefaultState;
use config::{Config, ConfigBuilder, Environment, File};
use roadcast_types::Role;
use serde::{Deserialize, Serialize};

use crate::error::StartupError;

/// Default config file looked up in the working directory.
pub const DEFAULT_CONFIG_FILE: &str = "roadcast.toml";

/// Fully resolved settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Settings {
    /// Delay between a worker exit and its restart.
    #[serde(with = "duration")]
    pub restart_delay: Duration,
    pub workers: WorkerSettings,
    pub telemetry: TelemetrySettings,
    pub livekit: LiveKitSettings,
    pub logging: LoggingSettings,
}

/// Launch commands, one per role.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkerSettings {
    pub modem: CommandSettings,
    pub sensor: CommandSettings,
    pub broadcast: CommandSettings,
}

impl WorkerSettings {
    /// Command configured for a role.
    pub fn command(&self, role: Role) -> &CommandSettings {
        match role {
            Role::Modem => &self.modem,
            Role::Sensor => &self.sensor,
            Role::Broadcast => &self.broadcast,
        }
    }
}

/// A program and its fixed arguments.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CommandSettings {
    pub program: String,
    #[serde(default)]
    pub args: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TelemetrySettings {
    /// Period of the status poll.
    #[serde(with = "duration")]
    pub poll_interval: Duration,
    /// Number of temperature samples averaged.
    pub smoothing_window: usize,
    /// Decimal places kept on the averaged temperature.
    pub precision: u32,
    /// ModemManager index; discovered with `mmcli -L` when unset.
    #[serde(default)]
    pub modem_id: Option<u32>,
    /// Manufacturer string used to pick the modem during discovery.
    pub modem_vendor: String,
    /// Path to the ModemManager CLI.
    pub mmcli: String,
    /// Run status commands through `sudo`.
    pub sudo: bool,
    /// Enable raw and NMEA GPS reporting at startup, disable it on shutdown.
    pub enable_gps: bool,
    /// Host board and UPS readings.
    #[serde(default)]
    pub host: HostSettings,
}

/// Where host readings come from.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct HostSettings {
    /// VideoCore tool reporting CPU temperature and PMIC rails.
    pub vcgencmd: String,
    /// Searched for the fan's `fan1_input`.
    pub fan_dir: PathBuf,
    /// Kernel CPU counters.
    pub proc_stat: PathBuf,
    /// Read the UPS fuel gauge over I2C.
    pub ups: bool,
    pub ups_bus: u8,
    pub ups_address: u16,
}

impl Default for HostSettings {
    fn default() -> Self {
        Self {
            vcgencmd: "vcgencmd".to_string(),
            fan_dir: PathBuf::from("/sys/devices/platform/cooling_fan"),
            proc_stat: PathBuf::from("/proc/stat"),
            ups: true,
            ups_bus: 1,
            ups_address: 0x36,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LiveKitSettings {
    pub domain: String,
    pub room: String,
    pub api_key: String,
    pub api_secret: String,
    /// Participant identity used by the broadcaster; released on shutdown.
    #[serde(default)]
    pub identity: Option<String>,
    pub tls: bool,
    #[serde(with = "duration")]
    pub request_timeout: Duration,
}

impl LiveKitSettings {
    /// Base URL of the room service.
    pub fn base_url(&self) -> String {
        let scheme = if self.tls { "https" } else { "http" };
        format!("{}://{}", scheme, self.domain.trim_end_matches('/'))
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LoggingSettings {
    /// Default filter directive when `RUST_LOG` is unset.
    pub level: String,
    /// Directory for rolling log files.
    pub directory: PathBuf,
    /// Write JSON log files in addition to the console.
    pub files: bool,
}

impl Settings {
    /// Defaults plus the config file, without environment overrides.
    ///
    /// A missing file is only an error when `required` is set.
    pub fn base(path: &Path, required: bool) -> Result<ConfigBuilder<DefaultState>, StartupError> {
        let builder = Config::builder()
            .set_default("restart_delay", "1000ms")?
            .set_default("workers.modem.program", "workers/modem")?
            .set_default("workers.modem.args", Vec::<String>::new())?
            .set_default("workers.sensor.program", "workers/sensor")?
            .set_default("workers.sensor.args", Vec::<String>::new())?
            .set_default("workers.broadcast.program", "workers/broadcast")?
            .set_default("workers.broadcast.args", Vec::<String>::new())?
            .set_default("telemetry.poll_interval", "1s")?
            .set_default("telemetry.smoothing_window", 30)?
            .set_default("telemetry.precision", 1)?
            .set_default("telemetry.modem_vendor", "QUECTEL")?
            .set_default("telemetry.mmcli", "mmcli")?
            .set_default("telemetry.sudo", true)?
            .set_default("telemetry.enable_gps", true)?
            .set_default("livekit.domain", "")?
            .set_default("livekit.room", "")?
            .set_default("livekit.api_key", "")?
            .set_default("livekit.api_secret", "")?
            .set_default("livekit.tls", true)?
            .set_default("livekit.request_timeout", "5s")?
            .set_default("logging.level", "info")?
            .set_default("logging.directory", "logs")?
            .set_default("logging.files", true)?
            .add_source(File::from(path).required(required));

        Ok(builder)
    }

    /// Load settings from every source.
    pub fn load(path: &Path, required: bool) -> Result<Self, StartupError> {
        let builder = Self::base(path, required)?
            .add_source(
                Environment::with_prefix("ROADCAST")
                    .prefix_separator("_")
                    .separator("__")
                    .try_parsing(true),
            )
            .set_override_option("livekit.domain", std::env::var("LIVEKIT_DOMAIN").ok())?
            .set_override_option("livekit.room", std::env::var("LIVEKIT_ROOM").ok())?
            .set_override_option("livekit.api_key", std::env::var("LIVEKIT_API_KEY").ok())?
            .set_override_option("livekit.api_secret", std::env::var("LIVEKIT_API_SECRET").ok())?
            .set_override_option("livekit.identity", std::env::var("LIVEKIT_IDENTITY").ok())?
            .set_override_option("livekit.tls", std::env::var("LIVEKIT_TLS").ok())?
            .set_override_option("logging.level", std::env::var("LOG_LEVEL").ok())?;

        Self::from_builder(builder)
    }

    /// Build and validate.
    pub fn from_builder(builder: ConfigBuilder<DefaultState>) -> Result<Self, StartupError> {
        let settings: Settings = builder.build()?.try_deserialize()?;
        settings.validate()?;
        Ok(settings)
    }

    /// Reject settings the appliance cannot run with.
    pub fn validate(&self) -> Result<(), StartupError> {
        let missing: Vec<&str> = [
            ("livekit.domain", &self.livekit.domain),
            ("livekit.room", &self.livekit.room),
            ("livekit.api_key", &self.livekit.api_key),
            ("livekit.api_secret", &self.livekit.api_secret),
        ]
        .into_iter()
        .filter(|(_, value)| value.trim().is_empty())
        .map(|(key, _)| key)
        .collect();

        if !missing.is_empty() {
            return Err(StartupError::Config(format!(
                "missing required settings: {}",
                missing.join(", ")
            )));
        }

        for role in Role::ALL {
            if self.workers.command(role).program.trim().is_empty() {
                return Err(StartupError::Config(format!(
                    "workers.{}.program must not be empty",
                    role
                )));
            }
        }

        if self.telemetry.smoothing_window == 0 {
            return Err(StartupError::Config(
                "telemetry.smoothing_window must be at least 1".to_string(),
            ));
        }
        if self.telemetry.precision > 6 {
            return Err(StartupError::Config(
                "telemetry.precision must be at most 6".to_string(),
            ));
        }
        if self.telemetry.poll_interval.is_zero() {
            return Err(StartupError::Config(
                "telemetry.poll_interval must be positive".to_string(),
            ));
        }

        Ok(())
    }

    /// Copy with secrets masked, for printing.
    pub fn redacted(&self) -> Self {
        let mut copy = self.clone();
        if !copy.livekit.api_secret.is_empty() {
            copy.livekit.api_secret = "********".to_string();
        }
        copy
    }
}
