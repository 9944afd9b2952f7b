//! Device configuration for the scanner.
//!
//! A scanner is described by its two analog-output axis channels, the allowed
//! command voltage range, the "off" voltage pair used as the virtual shutter's
//! parked position, and a directory for calibration/configuration data.
//! Configuration is loaded from TOML through the `config` crate and validated
//! before use; parse failures surface as [`ScannerError::Config`], semantic
//! problems as [`ScannerError::Configuration`].

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::{ScanResult, ScannerError};

/// Routing of one mirror axis to a DAQ analog-output channel.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct AxisChannel {
    /// DAQ device name this axis is wired to (e.g., "DAQ1").
    pub daq: String,
    /// Channel identifier on that device (e.g., "ao0").
    pub channel: String,
}

/// Static configuration for one scanner device.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ScannerConfig {
    /// X mirror axis channel routing.
    pub x_axis: AxisChannel,
    /// Y mirror axis channel routing.
    pub y_axis: AxisChannel,
    /// Allowed command voltage range [min, max]; requests outside are clamped.
    pub command_limits: (f64, f64),
    /// Voltage pair steering the beam to its 'off' position (virtual shutter).
    pub off_voltage: [f64; 2],
    /// Directory where calibration index, defaults and captured camera
    /// configurations are stored.
    pub config_dir: PathBuf,
}

impl Default for ScannerConfig {
    fn default() -> Self {
        Self {
            x_axis: AxisChannel {
                daq: "DAQ".into(),
                channel: "ao0".into(),
            },
            y_axis: AxisChannel {
                daq: "DAQ".into(),
                channel: "ao1".into(),
            },
            command_limits: (-10.0, 10.0),
            off_voltage: [-10.0, -10.0],
            config_dir: PathBuf::from("devices/Scanner_config"),
        }
    }
}

impl ScannerConfig {
    /// Load and validate a configuration from a TOML file.
    pub fn from_file(path: &Path) -> ScanResult<Self> {
        let cfg = config::Config::builder()
            .add_source(config::File::from(path))
            .build()?;
        let settings: ScannerConfig = cfg.try_deserialize()?;
        settings.validate()?;
        Ok(settings)
    }

    /// Check semantic constraints that pass parsing but are logically wrong.
    pub fn validate(&self) -> ScanResult<()> {
        let (min, max) = self.command_limits;
        if !min.is_finite() || !max.is_finite() || min >= max {
            return Err(ScannerError::Configuration(format!(
                "command_limits must be a finite [min, max] range, got [{min}, {max}]"
            )));
        }
        for v in self.off_voltage {
            if !v.is_finite() {
                return Err(ScannerError::Configuration(
                    "off_voltage must be finite".into(),
                ));
            }
        }
        if self.x_axis.channel.is_empty() || self.y_axis.channel.is_empty() {
            return Err(ScannerError::Configuration(
                "axis channels must not be empty".into(),
            ));
        }
        Ok(())
    }

    /// Clamp one requested voltage to the configured command limits.
    pub fn clamp(&self, v: f64) -> f64 {
        let (min, max) = self.command_limits;
        v.clamp(min, max)
    }
}
