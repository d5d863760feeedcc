//! ModemManager (`mmcli`) backed status queries.

use std::process::{Command, Output};

use tracing::{debug, info};

use super::StatusProvider;
use crate::config::TelemetrySettings;
use crate::error::{FetchError, StartupError};

/// Runs `mmcli` for one modem, optionally through `sudo`.
#[derive(Debug, Clone)]
pub struct MmcliStatus {
    program: String,
    sudo: bool,
    modem_id: u32,
    gps: bool,
}

impl MmcliStatus {
    pub fn new(program: impl Into<String>, sudo: bool, modem_id: u32) -> Self {
        Self {
            program: program.into(),
            sudo,
            modem_id,
            gps: false,
        }
    }

    /// Whether GPS reporting is managed: enabled at startup and disabled
    /// again on shutdown.
    pub fn with_gps(mut self, gps: bool) -> Self {
        self.gps = gps;
        self
    }

    /// Build from settings, discovering the modem when no id is configured.
    pub fn from_settings(settings: &TelemetrySettings) -> Result<Self, StartupError> {
        let modem_id = match settings.modem_id {
            Some(id) => id,
            None => discover_modem(&settings.mmcli, settings.sudo, &settings.modem_vendor)?,
        };
        Ok(Self::new(settings.mmcli.clone(), settings.sudo, modem_id)
            .with_gps(settings.enable_gps))
    }

    pub fn modem_id(&self) -> u32 {
        self.modem_id
    }

    pub fn manages_gps(&self) -> bool {
        self.gps
    }

    /// Turn on raw and NMEA GPS reporting.
    pub fn enable_gps(&self) -> Result<(), FetchError> {
        let id = self.modem_id.to_string();
        run(
            &self.program,
            self.sudo,
            &[
                "-m",
                &id,
                "--enable",
                "--location-enable-gps-raw",
                "--location-enable-gps-nmea",
            ],
        )?;
        info!(modem = self.modem_id, "GPS location enabled");
        Ok(())
    }
}

impl StatusProvider for MmcliStatus {
    fn modem_status(&self) -> Result<String, FetchError> {
        let id = self.modem_id.to_string();
        run(&self.program, self.sudo, &["-m", &id, "-J"])
    }

    fn location_status(&self) -> Result<String, FetchError> {
        let id = self.modem_id.to_string();
        run(&self.program, self.sudo, &["-m", &id, "--location-get", "-J"])
    }

    fn disable_gps(&self) -> Result<(), FetchError> {
        if !self.gps {
            return Ok(());
        }
        let id = self.modem_id.to_string();
        run(
            &self.program,
            self.sudo,
            &[
                "-m",
                &id,
                "--location-disable-gps-raw",
                "--location-disable-gps-nmea",
            ],
        )?;
        info!(modem = self.modem_id, "GPS location disabled");
        Ok(())
    }
}

/// Find the index of the first modem whose `mmcli -L` line mentions `vendor`.
pub fn discover_modem(program: &str, sudo: bool, vendor: &str) -> Result<u32, StartupError> {
    let listing = run(program, sudo, &["-L"])
        .map_err(|e| StartupError::ModemDiscovery(e.to_string()))?;
    let id = parse_modem_list(&listing, vendor).ok_or_else(|| {
        StartupError::ModemDiscovery(format!("no {} modem listed by {}", vendor, program))
    })?;
    info!(modem = id, vendor, "modem discovered");
    Ok(id)
}

/// Extract `<n>` from the first `.../Modem/<n> ...` line containing `vendor`.
pub fn parse_modem_list(listing: &str, vendor: &str) -> Option<u32> {
    listing
        .lines()
        .filter(|line| line.contains(vendor))
        .find_map(|line| {
            let (_, rest) = line.split_once("/Modem/")?;
            let digits: String = rest.chars().take_while(char::is_ascii_digit).collect();
            digits.parse().ok()
        })
}

pub(super) fn run(program: &str, sudo: bool, args: &[&str]) -> Result<String, FetchError> {
    let mut command = if sudo {
        let mut command = Command::new("sudo");
        command.arg(program);
        command
    } else {
        Command::new(program)
    };
    command.args(args);
    debug!(program, ?args, sudo, "running status command");

    let output = command.output()?;
    check_output(output)
}

fn check_output(output: Output) -> Result<String, FetchError> {
    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr);
        return Err(FetchError::Command(format!(
            "{}: {}",
            output.status,
            stderr.trim()
        )));
    }
    Ok(String::from_utf8_lossy(&output.stdout).into_owned())
}
