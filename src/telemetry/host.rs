//! Host board readings: power draw, CPU temperature, fan speed, CPU load,
//! and the UPS fuel gauge.
//!
//! Every reading is optional. A missing tool, file or device leaves the
//! field `None` and never fails a poll.

use std::collections::HashMap;
use std::ffi::c_int;
use std::fs::{self, OpenOptions};
use std::io::{self, Read, Write};
use std::os::fd::AsRawFd;
use std::path::{Path, PathBuf};

use roadcast_types::{SystemState, UpsState};
use tracing::debug;
use walkdir::WalkDir;

use super::modem::run;
use super::parse::parse_number;
use crate::config::HostSettings;
use crate::smoothing::round_to;

/// Fuel gauge cell voltage register.
const VCELL_REGISTER: u8 = 0x02;
/// Fuel gauge state-of-charge register.
const SOC_REGISTER: u8 = 0x04;

nix::ioctl_write_int_bad!(
    /// `I2C_SLAVE` from `linux/i2c-dev.h`.
    set_slave_address,
    0x0703
);

/// Reads host state from the local board.
#[derive(Debug, Clone)]
pub struct HostStatus {
    vcgencmd: String,
    fan_dir: PathBuf,
    proc_stat: PathBuf,
    ups: Option<FuelGauge>,
}

impl HostStatus {
    pub fn from_settings(settings: &HostSettings) -> Self {
        Self {
            vcgencmd: settings.vcgencmd.clone(),
            fan_dir: settings.fan_dir.clone(),
            proc_stat: settings.proc_stat.clone(),
            ups: settings.ups.then(|| FuelGauge {
                bus: settings.ups_bus,
                address: settings.ups_address,
            }),
        }
    }

    /// Power, CPU temperature, fan and load, each independently.
    pub fn system(&self) -> SystemState {
        SystemState {
            watts: self
                .vcgencmd(&["pmic_read_adc"])
                .and_then(|output| parse_power(&output)),
            temperature: self
                .vcgencmd(&["measure_temp"])
                .and_then(|output| parse_cpu_temperature(&output)),
            fan: find_fan_input(&self.fan_dir)
                .and_then(|path| fs::read_to_string(path).ok())
                .and_then(|text| parse_number(&text)),
            load: fs::read_to_string(&self.proc_stat)
                .ok()
                .and_then(|text| parse_cpu_load(&text)),
        }
    }

    pub fn ups(&self) -> UpsState {
        let Some(gauge) = &self.ups else {
            return UpsState::default();
        };
        let read = |register| match gauge.read_register(register) {
            Ok(raw) => Some(raw),
            Err(e) => {
                debug!(bus = gauge.bus, register, error = %e, "UPS read failed");
                None
            }
        };
        UpsState {
            voltage: read(VCELL_REGISTER).map(ups_voltage),
            capacity: read(SOC_REGISTER).map(ups_capacity),
        }
    }

    fn vcgencmd(&self, args: &[&str]) -> Option<String> {
        match run(&self.vcgencmd, false, args) {
            Ok(output) => Some(output),
            Err(e) => {
                debug!(program = %self.vcgencmd, ?args, error = %e, "host reading unavailable");
                None
            }
        }
    }
}

/// UPS fuel gauge on an I2C bus.
#[derive(Debug, Clone, Copy)]
struct FuelGauge {
    bus: u8,
    address: u16,
}

impl FuelGauge {
    /// Big-endian 16-bit register value.
    fn read_register(&self, register: u8) -> io::Result<u16> {
        let mut device = OpenOptions::new()
            .read(true)
            .write(true)
            .open(format!("/dev/i2c-{}", self.bus))?;
        // SAFETY: the descriptor stays open for the duration of the call.
        unsafe { set_slave_address(device.as_raw_fd(), self.address as c_int) }
            .map_err(io::Error::from)?;

        device.write_all(&[register])?;
        let mut bytes = [0u8; 2];
        device.read_exact(&mut bytes)?;
        Ok(u16::from_be_bytes(bytes))
    }
}

/// Cell voltage in volts, 1.25 mV per 16 counts.
pub fn ups_voltage(raw: u16) -> f64 {
    round_to(f64::from(raw) * 1.25 / 1000.0 / 16.0, 2)
}

/// State of charge in percent, 1/256 % per count.
pub fn ups_capacity(raw: u16) -> f64 {
    round_to(f64::from(raw) / 256.0, 2)
}

/// Sum of current times voltage over the PMIC rails reporting both,
/// truncated to two decimals.
///
/// Lines look like `3V7_WL_SW_A current(0)=0.12000000A` and
/// `3V7_WL_SW_V volt(8)=3.74364900V`.
pub fn parse_power(output: &str) -> Option<f64> {
    let mut currents = HashMap::new();
    let mut volts = HashMap::new();

    for line in output.lines() {
        let Some((name, value)) = line.split_once('=') else {
            continue;
        };
        let Some(label) = name.split_whitespace().next() else {
            continue;
        };
        let value = value.trim();
        if let (Some(rail), Some(amps)) = (label.strip_suffix("_A"), value.strip_suffix('A')) {
            if let Some(amps) = parse_number(amps) {
                currents.insert(rail, amps);
            }
        } else if let (Some(rail), Some(v)) = (label.strip_suffix("_V"), value.strip_suffix('V')) {
            if let Some(v) = parse_number(v) {
                volts.insert(rail, v);
            }
        }
    }

    let mut matched = false;
    let watts: f64 = currents
        .iter()
        .filter_map(|(rail, amps)| volts.get(rail).map(|v| amps * v))
        .inspect(|_| matched = true)
        .sum();
    matched.then(|| (watts * 100.0).trunc() / 100.0)
}

/// `temp=48.3'C` -> 48.3
pub fn parse_cpu_temperature(output: &str) -> Option<f64> {
    let value = output.split_once('=').map_or(output, |(_, value)| value);
    value.split('\'').next().and_then(parse_number)
}

/// Busy share of CPU time since boot from the aggregate `cpu` line of
/// `/proc/stat`, in percent with two decimals.
pub fn parse_cpu_load(proc_stat: &str) -> Option<f64> {
    let line = proc_stat.lines().find(|line| line.starts_with("cpu "))?;
    let fields: Vec<f64> = line
        .split_whitespace()
        .skip(1)
        .take(7)
        .map(parse_number)
        .collect::<Option<_>>()?;
    if fields.len() < 7 {
        return None;
    }
    let total: f64 = fields.iter().sum();
    if total <= 0.0 {
        return None;
    }
    Some(round_to(100.0 - fields[3] * 100.0 / total, 2))
}

fn find_fan_input(dir: &Path) -> Option<PathBuf> {
    WalkDir::new(dir)
        .into_iter()
        .filter_map(Result::ok)
        .find(|entry| entry.file_name() == "fan1_input")
        .map(|entry| entry.into_path())
}
