//! External hardware collaborators at their interface boundary.
//!
//! The scanner core never implements a hardware transport; it drives
//! collaborators through these traits:
//!
//! - [`AnalogOutput`]: immediate, unbuffered channel writes (interactive
//!   mirror positioning).
//! - [`DaqTask`]: one buffered multi-channel hardware task being assembled
//!   for a synchronized acquisition.
//! - [`CameraLink`]: the camera/scope collaborator, used only for coordinate
//!   mapping, objective resolution and parameter capture.
//! - [`SiblingTasks`]: the task scheduler's ordering query, handing a
//!   configured sibling task's generated waveform to tasks that declared a
//!   dependency on it.

pub mod mock;

use crate::error::ScanResult;

/// Immediate analog output writes, one channel at a time.
pub trait AnalogOutput: Send + Sync {
    /// Set a channel to a voltage, blocking until applied.
    fn set_channel_value(&self, channel: &str, value: f64) -> ScanResult<()>;
}

/// A buffered multi-channel DAQ task under assembly.
///
/// The scanner registers an analog-output channel plus waveform for each of
/// its axes that live on the task's device; everything else about the task is
/// the DAQ subsystem's concern.
pub trait DaqTask: Send {
    /// Name of the DAQ device this task drives.
    fn device_name(&self) -> &str;
    /// Register an analog-output channel on this task.
    fn add_ao_channel(&mut self, channel: &str) -> ScanResult<()>;
    /// Attach a sampled waveform to a previously registered channel.
    fn set_waveform(&mut self, channel: &str, samples: &[f64]) -> ScanResult<()>;
    /// Stop the task; `abort` skips any orderly wind-down.
    fn stop(&mut self, abort: bool) -> ScanResult<()>;
}

/// The objective currently mounted in front of a camera.
#[derive(Clone, Debug, PartialEq)]
pub struct Objective {
    pub name: String,
}

/// Camera/scope collaborator.
pub trait CameraLink: Send + Sync {
    /// Current stage position of the camera's field of view.
    fn current_position(&self) -> (f64, f64);
    /// Convert a global coordinate into the camera's sensor space.
    fn map_to_sensor_space(&self, x: f64, y: f64) -> (f64, f64);
    /// The objective currently in use.
    fn current_objective(&self) -> Objective;
    /// Snapshot of the camera's readable and writable parameters, captured
    /// alongside calibrations so they can be restored later.
    fn capture_params(&self) -> serde_json::Value;
}

/// Ordering query over sibling tasks already configured in this acquisition.
///
/// A shutter-simulating scanner task declares that it must configure after
/// its laser device; the scheduler resolves that ordering and then answers
/// this query with the laser's generated activation waveform.
pub trait SiblingTasks {
    /// The activation waveform generated by `device`'s task, if that task is
    /// configured and produced one.
    fn laser_waveform(&self, device: &str) -> Option<Vec<bool>>;
}
