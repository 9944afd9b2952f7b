//! Custom error types for the scanner core.
//!
//! This module defines the primary error type, `ScannerError`, used across the
//! crate. Using the `thiserror` crate, it provides a centralized and consistent
//! way to handle the different failure modes of the scanner:
//!
//! - **`CalibrationMissing`**: no calibration record exists for the requested
//!   (camera, laser, objective) triple. Fatal where a coordinate must actually
//!   be mapped; lookup sites that merely *want* a calibration (spot-size
//!   caching) tolerate absence and never see this variant.
//! - **`UndefinedStartPosition`**: a `line` movement command appeared before
//!   any position-defining command. Fatal; the program compiler surfaces it
//!   immediately so the run never proceeds with partially-built arrays.
//! - **`Config`** / **`Configuration`**: file parsing errors from the `config`
//!   crate versus semantic errors caught during validation.
//!
//! Voltage-limit violations are deliberately *not* errors: out-of-range
//! commands are clamped. Likewise an axis routed to a DAQ device that is not
//! part of the task being built is skipped, not rejected; a scanner may be
//! split across DAQ devices.

use thiserror::Error;

/// Convenience alias for results using the scanner error type.
pub type ScanResult<T> = std::result::Result<T, ScannerError>;

#[derive(Error, Debug)]
pub enum ScannerError {
    #[error(
        "No calibration found for this combination of camera, laser, and objective: \
         {camera} / {laser} / {objective}"
    )]
    CalibrationMissing {
        camera: String,
        laser: String,
        objective: String,
    },

    #[error("'line' command at index {index} has no defined starting position")]
    UndefinedStartPosition { index: usize },

    #[error("Invalid movement program: {0}")]
    InvalidProgram(String),

    #[error("No generated waveform available from laser task '{0}'")]
    MissingLaserWaveform(String),

    #[error("Configuration error: {0}")]
    Config(#[from] config::ConfigError),

    #[error("Configuration validation error: {0}")]
    Configuration(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Storage error: {0}")]
    Storage(String),

    #[error("Hardware error: {0}")]
    Hardware(String),

    #[error("Task is not in a valid state for {0}")]
    TaskState(&'static str),
}

impl From<serde_json::Error> for ScannerError {
    fn from(err: serde_json::Error) -> Self {
        ScannerError::Storage(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = ScannerError::CalibrationMissing {
            camera: "Camera".into(),
            laser: "UVLaser".into(),
            objective: "63x".into(),
        };
        assert!(err.to_string().contains("Camera / UVLaser / 63x"));
    }

    #[test]
    fn test_undefined_start_position_display() {
        let err = ScannerError::UndefinedStartPosition { index: 2 };
        assert_eq!(
            err.to_string(),
            "'line' command at index 2 has no defined starting position"
        );
    }
}
