//! Mock hardware implementations.
//!
//! Simulated collaborators for testing the scanner without physical hardware:
//!
//! - `MockAnalogOutput` - records every immediate channel write
//! - `MockDaqTask` - records registered channels, waveforms and stop calls
//! - `MockCamera` - fixed objective/position with an affine sensor mapping
//! - `FixedSiblings` - canned sibling-task waveforms for the ordering query

use std::collections::HashMap;

use parking_lot::Mutex;

use crate::error::ScanResult;
use crate::hardware::{AnalogOutput, CameraLink, DaqTask, Objective, SiblingTasks};

/// Analog output that records every write.
#[derive(Default)]
pub struct MockAnalogOutput {
    values: Mutex<HashMap<String, f64>>,
    history: Mutex<Vec<(String, f64)>>,
}

impl MockAnalogOutput {
    pub fn new() -> Self {
        Self::default()
    }

    /// Last value written to a channel.
    pub fn value(&self, channel: &str) -> Option<f64> {
        self.values.lock().get(channel).copied()
    }

    /// Every write in order, as (channel, value).
    pub fn history(&self) -> Vec<(String, f64)> {
        self.history.lock().clone()
    }
}

impl AnalogOutput for MockAnalogOutput {
    fn set_channel_value(&self, channel: &str, value: f64) -> ScanResult<()> {
        self.values.lock().insert(channel.to_string(), value);
        self.history.lock().push((channel.to_string(), value));
        Ok(())
    }
}

/// Buffered DAQ task that records its configuration.
pub struct MockDaqTask {
    device: String,
    pub channels: Vec<String>,
    pub waveforms: HashMap<String, Vec<f64>>,
    /// `Some(abort)` once stopped.
    pub stopped: Option<bool>,
}

impl MockDaqTask {
    pub fn new(device: impl Into<String>) -> Self {
        Self {
            device: device.into(),
            channels: Vec::new(),
            waveforms: HashMap::new(),
            stopped: None,
        }
    }
}

impl DaqTask for MockDaqTask {
    fn device_name(&self) -> &str {
        &self.device
    }

    fn add_ao_channel(&mut self, channel: &str) -> ScanResult<()> {
        self.channels.push(channel.to_string());
        Ok(())
    }

    fn set_waveform(&mut self, channel: &str, samples: &[f64]) -> ScanResult<()> {
        self.waveforms.insert(channel.to_string(), samples.to_vec());
        Ok(())
    }

    fn stop(&mut self, abort: bool) -> ScanResult<()> {
        self.stopped = Some(abort);
        Ok(())
    }
}

/// Camera with a fixed objective and a scale+offset sensor mapping.
pub struct MockCamera {
    objective: String,
    position: (f64, f64),
    sensor_scale: f64,
}

impl MockCamera {
    pub fn new(objective: impl Into<String>) -> Self {
        Self {
            objective: objective.into(),
            position: (0.0, 0.0),
            sensor_scale: 1.0,
        }
    }

    pub fn with_sensor_scale(mut self, scale: f64) -> Self {
        self.sensor_scale = scale;
        self
    }

    pub fn at_position(mut self, x: f64, y: f64) -> Self {
        self.position = (x, y);
        self
    }
}

impl CameraLink for MockCamera {
    fn current_position(&self) -> (f64, f64) {
        self.position
    }

    fn map_to_sensor_space(&self, x: f64, y: f64) -> (f64, f64) {
        (
            (x - self.position.0) * self.sensor_scale,
            (y - self.position.1) * self.sensor_scale,
        )
    }

    fn current_objective(&self) -> Objective {
        Objective {
            name: self.objective.clone(),
        }
    }

    fn capture_params(&self) -> serde_json::Value {
        serde_json::json!({
            "objective": self.objective,
            "exposure": 0.01,
            "binning": 1,
        })
    }
}

/// Canned answers for the sibling-task waveform query.
#[derive(Default)]
pub struct FixedSiblings {
    waveforms: HashMap<String, Vec<bool>>,
}

impl FixedSiblings {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_laser(mut self, device: impl Into<String>, waveform: Vec<bool>) -> Self {
        self.waveforms.insert(device.into(), waveform);
        self
    }
}

impl SiblingTasks for FixedSiblings {
    fn laser_waveform(&self, device: &str) -> Option<Vec<bool>> {
        self.waveforms.get(device).cloned()
    }
}
