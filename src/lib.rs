//! Core library for a laser-scanning galvo mirror system.
//!
//! This crate positions a pair of voltage-steered mirrors by mapping optical
//! target coordinates through per-(camera, laser, objective) calibration
//! polynomials, compiles declarative movement programs into sampled
//! waveforms, and synchronizes a virtual shutter (steering the beam
//! off-target instead of physically blocking it) with laser activation.
//! Hardware transports, persistence media and the GUI are collaborators
//! behind the traits in [`hardware`] and [`storage`].

pub mod calibration;
pub mod config;
pub mod device;
pub mod error;
pub mod hardware;
pub mod program;
pub mod shutter;
pub mod storage;
pub mod task;

pub use calibration::{CalibrationIndex, CalibrationRecord, CalibrationStore, Spot};
pub use config::{AxisChannel, ScannerConfig};
pub use device::{ScannerDevice, TargetList};
pub use error::{ScanResult, ScannerError};
pub use program::{MovementProgram, ProgramCommand};
pub use task::{ConfigOrder, ScannerTask, TaskCommand, TaskResult, TaskState};
