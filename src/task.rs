//! Per-acquisition scanner task.
//!
//! A [`ScannerTask`] consumes one [`TaskCommand`] and walks the lifecycle
//! `Created → Configured → Running → Stopped`:
//!
//! - **configure**: under the device lock, close the virtual shutter if the
//!   run simulates shuttering, apply any immediate command/position, cache
//!   the calibration spot size, compile the movement program and synthesize
//!   the shutter arrays from the sibling laser task's waveform.
//! - **create_channels**: register an analog-output channel and waveform on
//!   the DAQ task being built, for each axis routed to that task's device.
//! - **start**: enforce the minimum inter-run spacing by blocking for the
//!   remaining delta.
//! - **stop**: stop every registered channel task and stamp the device's
//!   `last_run_time` — always, even on abort, so the spacing guard measures
//!   real wall time since the hardware was last driven.
//!
//! A task that simulates shuttering must configure *after* its laser's task;
//! it declares that through [`ScannerTask::config_order`] and the scheduler
//! answers the waveform query at configure time.

use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, warn};

use crate::device::ScannerDevice;
use crate::error::{ScanResult, ScannerError};
use crate::hardware::{DaqTask, SiblingTasks};
use crate::program::{self, MovementProgram, PointMapper};
use crate::shutter;
use crate::storage::ResultSink;

/// The per-run request. Exactly one of `command`, `position` or `program`
/// usually drives the run; `position` and `program` additionally need
/// `camera` and `laser` for calibration mapping.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct TaskCommand {
    /// Explicit voltage pair applied immediately at configure time.
    pub command: Option<[f64; 2]>,
    /// Image coordinate applied immediately, mapped through the calibration.
    pub position: Option<(f64, f64)>,
    pub camera: Option<String>,
    pub laser: Option<String>,
    /// Movement program compiled into buffered waveforms.
    pub program: Option<MovementProgram>,
    /// Steer the beam off-target whenever the laser is inactive.
    pub simulate_shutter: bool,
    /// Run duration in seconds; required when simulating the shutter.
    pub duration: Option<f64>,
    /// Minimum spacing to the previous run, in seconds.
    pub min_wait_time: Option<f64>,
}

/// Configure-ordering constraints declared to the task scheduler.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct ConfigOrder {
    /// Devices whose tasks must configure after this one.
    pub before: Vec<String>,
    /// Devices whose tasks must configure before this one.
    pub after: Vec<String>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TaskState {
    Created,
    Configured,
    Running,
    Stopped,
}

/// Derived values recorded into the run's output record.
#[derive(Clone, Debug, Default, PartialEq, Serialize)]
pub struct TaskResult {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub position: Option<(f64, f64)>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub command: Option<[f64; 2]>,
    #[serde(rename = "spotSize", skip_serializing_if = "Option::is_none")]
    pub spot_size: Option<f64>,
}

/// Maps program positions through the device calibration for a fixed
/// camera/laser pair.
struct DeviceMapper<'a> {
    dev: &'a ScannerDevice,
    camera: &'a str,
    laser: &'a str,
}

impl PointMapper for DeviceMapper<'_> {
    fn map_point(&self, x: f64, y: f64) -> ScanResult<(f64, f64)> {
        let v = self.dev.map_to_scanner(x, y, self.camera, self.laser)?;
        Ok((v[0], v[1]))
    }

    fn map_span(&self, xs: &[f64], ys: &[f64]) -> ScanResult<(Vec<f64>, Vec<f64>)> {
        self.dev.map_span_to_scanner(xs, ys, self.camera, self.laser)
    }
}

pub struct ScannerTask {
    dev: Arc<ScannerDevice>,
    cmd: TaskCommand,
    state: TaskState,
    x_cmd: Option<Vec<f64>>,
    y_cmd: Option<Vec<f64>>,
    spot_size: Option<f64>,
    daq_tasks: Vec<Arc<Mutex<dyn DaqTask>>>,
}

impl ScannerTask {
    pub fn new(dev: Arc<ScannerDevice>, cmd: TaskCommand) -> Self {
        Self {
            dev,
            cmd,
            state: TaskState::Created,
            x_cmd: None,
            y_cmd: None,
            spot_size: None,
            daq_tasks: Vec::new(),
        }
    }

    pub fn state(&self) -> TaskState {
        self.state
    }

    /// Ordering constraints for the scheduler: shutter simulation needs the
    /// laser task's waveform, so that task must configure first.
    pub fn config_order(&self) -> ConfigOrder {
        let mut order = ConfigOrder::default();
        if self.cmd.simulate_shutter {
            if let Some(laser) = &self.cmd.laser {
                order.after.push(laser.clone());
            }
        }
        order
    }

    /// Assemble everything the hardware run needs. Runs under the device
    /// lock so interactive callers cannot interleave with task setup.
    pub fn configure(&mut self, siblings: &dyn SiblingTasks) -> ScanResult<()> {
        if self.state != TaskState::Created {
            return Err(ScannerError::TaskState("configure"));
        }
        let dev = self.dev.clone();
        dev.locked(|| self.configure_locked(siblings))?;
        self.state = TaskState::Configured;
        Ok(())
    }

    fn configure_locked(&mut self, siblings: &dyn SiblingTasks) -> ScanResult<()> {
        // Shuttered runs start with the beam parked off-target.
        if self.cmd.simulate_shutter {
            self.dev.set_shutter_open(false)?;
        }

        // Apply the immediate mirror position now.
        if let Some(command) = self.cmd.command {
            self.dev.set_command(command)?;
        } else if let Some(position) = self.cmd.position {
            let (camera, laser) = self.camera_and_laser("position")?;
            self.dev.set_position(position, &camera, &laser)?;
        }

        // Record the spot size from calibration data. An uncalibrated
        // combination is tolerated here; the result simply omits it.
        if let (Some(camera), Some(laser)) = (&self.cmd.camera, &self.cmd.laser) {
            let objective = self.dev.objective(camera)?;
            match self.dev.calibration().lookup(camera, laser, &objective)? {
                Some(record) => self.spot_size = Some(record.spot.size),
                None => warn!(camera, laser, "no spot size available for this run"),
            }
        }

        // Compile the movement program into buffered command arrays.
        if let Some(prg) = self.cmd.program.clone() {
            let (camera, laser) = self.camera_and_laser("program")?;
            let mapper = DeviceMapper {
                dev: &self.dev,
                camera: &camera,
                laser: &laser,
            };
            let (x, y) = program::compile(&prg, self.dev.off_voltage(), &mapper)?;
            self.x_cmd = Some(x);
            self.y_cmd = Some(y);
        }

        // Synthesize shutter arrays from the laser task's waveform.
        if self.cmd.simulate_shutter {
            let laser = self
                .cmd
                .laser
                .clone()
                .ok_or_else(|| ScannerError::Configuration("simulateShutter requires a laser".into()))?;
            let duration = self.cmd.duration.ok_or_else(|| {
                ScannerError::Configuration("simulateShutter requires a duration".into())
            })?;
            let waveform = siblings
                .laser_waveform(&laser)
                .ok_or(ScannerError::MissingLaserWaveform(laser))?;

            // With no program, hold the current command whenever the shutter
            // is open.
            if self.x_cmd.is_none() {
                let [x, y] = self.dev.command();
                self.x_cmd = Some(vec![x; waveform.len()]);
                self.y_cmd = Some(vec![y; waveform.len()]);
            }
            let x_cmd = self.x_cmd.as_mut().ok_or_else(|| {
                ScannerError::Configuration("missing x command array".into())
            })?;
            let y_cmd = self.y_cmd.as_mut().ok_or_else(|| {
                ScannerError::Configuration("missing y command array".into())
            })?;
            shutter::apply_shutter_mask(
                x_cmd,
                y_cmd,
                &waveform,
                duration,
                self.dev.off_voltage(),
            )?;
        }
        Ok(())
    }

    fn camera_and_laser(&self, what: &str) -> ScanResult<(String, String)> {
        match (&self.cmd.camera, &self.cmd.laser) {
            (Some(c), Some(l)) => Ok((c.clone(), l.clone())),
            _ => Err(ScannerError::Configuration(format!(
                "{what} requires both a camera and a laser"
            ))),
        }
    }

    /// Register this task's waveforms on a DAQ task being built. Axes routed
    /// to other DAQ devices, and axes without buffered waveforms, are skipped.
    pub fn create_channels(&mut self, daq_task: Arc<Mutex<dyn DaqTask>>) -> ScanResult<()> {
        if self.state != TaskState::Configured {
            return Err(ScannerError::TaskState("create_channels"));
        }
        let dev = self.dev.clone();
        dev.locked(|| {
            let config = self.dev.config();
            let axes = [
                (&config.x_axis, self.x_cmd.as_ref()),
                (&config.y_axis, self.y_cmd.as_ref()),
            ];
            let mut registered = false;
            for (axis, waveform) in axes {
                let Some(waveform) = waveform else { continue };
                let mut task = daq_task.lock();
                if task.device_name() != axis.daq {
                    continue;
                }
                task.add_ao_channel(&axis.channel)?;
                task.set_waveform(&axis.channel, waveform)?;
                registered = true;
            }
            if registered {
                // Remember the task so stop() can reach it later.
                self.daq_tasks.push(daq_task.clone());
            }
            Ok(())
        })
    }

    /// Block until the minimum inter-run spacing has elapsed, then mark the
    /// task running. A first run never waits.
    pub fn start(&mut self) -> ScanResult<()> {
        if self.state != TaskState::Configured {
            return Err(ScannerError::TaskState("start"));
        }
        if let (Some(min_wait), Some(last_run)) =
            (self.cmd.min_wait_time, self.dev.last_run_time())
        {
            let elapsed = last_run.elapsed().as_secs_f64();
            let wait = min_wait - elapsed;
            if wait > 0.0 {
                debug!(wait_s = wait, "enforcing minimum inter-run spacing");
                thread::sleep(Duration::from_secs_f64(wait));
            }
        }
        self.state = TaskState::Running;
        Ok(())
    }

    /// Stop every registered channel task and stamp the device's last run
    /// time. Safe to call with zero registered channels; the timestamp is
    /// recorded even when a sub-task fails to stop.
    pub fn stop(&mut self, abort: bool) -> ScanResult<()> {
        let dev = self.dev.clone();
        let outcome = dev.locked(|| {
            let mut first_err = None;
            for task in &self.daq_tasks {
                if let Err(e) = task.lock().stop(abort) {
                    warn!(error = %e, "DAQ sub-task failed to stop");
                    first_err.get_or_insert(e);
                }
            }
            self.dev.set_last_run_time(Instant::now());
            match first_err {
                Some(e) => Err(e),
                None => Ok(()),
            }
        });
        self.state = TaskState::Stopped;
        outcome
    }

    /// Whichever subset of inputs and derived values exists for this run.
    pub fn result(&self) -> TaskResult {
        TaskResult {
            position: self.cmd.position,
            command: self.cmd.command,
            spot_size: self.spot_size,
        }
    }

    /// Record this run's result under the device name.
    pub fn store_result(&self, sink: &dyn ResultSink) -> ScanResult<()> {
        let value: Value = serde_json::to_value(self.result())?;
        sink.record(self.dev.name(), value)
    }
}
