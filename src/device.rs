//! The scanner device: shared state, immediate mirror control and the
//! virtual shutter.
//!
//! `ScannerDevice` owns everything multiple threads touch: the last requested
//! command, the virtual shutter flag, the run rate-limit timestamp and the
//! cross-session target list. All of it sits behind one re-entrant mutex;
//! re-entrancy matters because the public operations nest
//! (`set_position` maps a coordinate and then calls `set_command` on the same
//! thread).
//!
//! The device distinguishes the *requested* command from the *applied*
//! voltage: `set_command` always stores the request, but only drives the
//! mirrors while the virtual shutter is open, and only after clamping to the
//! configured limits. Re-opening the shutter replays the stored request, so
//! callers never have to reissue a command around a shutter cycle.

use std::cell::RefCell;
use std::collections::HashMap;
use std::path::Path;
use std::sync::mpsc;
use std::sync::Arc;
use std::time::Instant;

use parking_lot::{Mutex, ReentrantMutex};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::debug;

use crate::calibration::CalibrationStore;
use crate::config::ScannerConfig;
use crate::error::{ScanResult, ScannerError};
use crate::hardware::{AnalogOutput, CameraLink};
use crate::storage::ConfigStore;

/// Targets and grids defined by interactive sessions, kept on the device so
/// later sessions see what earlier ones created.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct TargetList {
    /// Packing density parameter shared by all target grids.
    pub packing: f64,
    /// Target-set name → target geometry.
    pub targets: HashMap<String, Value>,
}

/// Mutable device state, always accessed under the device lock.
#[derive(Debug)]
struct DeviceState {
    /// Last *requested* voltage pair; not necessarily applied (shutter may be
    /// closed, or the request may exceed the command limits).
    current_command: [f64; 2],
    shutter_open: bool,
    /// When the most recent task finished driving the hardware.
    last_run_time: Option<Instant>,
    target_list: TargetList,
}

pub struct ScannerDevice {
    name: String,
    config: ScannerConfig,
    state: ReentrantMutex<RefCell<DeviceState>>,
    calibration: CalibrationStore,
    output: Arc<dyn AnalogOutput>,
    store: Arc<dyn ConfigStore>,
    cameras: Mutex<HashMap<String, Arc<dyn CameraLink>>>,
    shutter_listeners: Mutex<Vec<mpsc::Sender<bool>>>,
}

impl ScannerDevice {
    pub fn new(
        name: impl Into<String>,
        config: ScannerConfig,
        output: Arc<dyn AnalogOutput>,
        store: Arc<dyn ConfigStore>,
    ) -> ScanResult<Self> {
        config.validate()?;
        Ok(Self {
            name: name.into(),
            config,
            state: ReentrantMutex::new(RefCell::new(DeviceState {
                current_command: [0.0, 0.0],
                shutter_open: true,
                last_run_time: None,
                target_list: TargetList {
                    packing: 1.0,
                    targets: HashMap::new(),
                },
            })),
            calibration: CalibrationStore::new(store.clone()),
            output,
            store,
            cameras: Mutex::new(HashMap::new()),
            shutter_listeners: Mutex::new(Vec::new()),
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn config(&self) -> &ScannerConfig {
        &self.config
    }

    /// Directory where this device's configuration and calibration live.
    pub fn config_dir(&self) -> &Path {
        &self.config.config_dir
    }

    pub fn calibration(&self) -> &CalibrationStore {
        &self.calibration
    }

    /// Run `f` while holding the device lock. The lock is re-entrant, so `f`
    /// may freely call back into the device's public API.
    pub fn locked<T>(&self, f: impl FnOnce() -> T) -> T {
        let _guard = self.state.lock();
        f()
    }

    /// Make a camera collaborator available under a device name.
    pub fn register_camera(&self, name: impl Into<String>, camera: Arc<dyn CameraLink>) {
        self.cameras.lock().insert(name.into(), camera);
    }

    fn camera(&self, name: &str) -> ScanResult<Arc<dyn CameraLink>> {
        self.cameras
            .lock()
            .get(name)
            .cloned()
            .ok_or_else(|| ScannerError::Hardware(format!("unknown camera device '{name}'")))
    }

    /// Name of the objective currently in use for `camera`.
    pub fn objective(&self, camera: &str) -> ScanResult<String> {
        Ok(self.camera(camera)?.current_objective().name)
    }

    // ------------------------------------------------------------------
    // Immediate mirror control
    // ------------------------------------------------------------------

    /// Request a command output to the mirrors.
    ///
    /// The request is always stored; it is applied to the hardware only while
    /// the virtual shutter is open, clamped to the configured limits.
    pub fn set_command(&self, vals: [f64; 2]) -> ScanResult<()> {
        let guard = self.state.lock();
        let open = {
            let mut state = guard.borrow_mut();
            state.current_command = vals;
            state.shutter_open
        };
        if open {
            let clamped = [self.config.clamp(vals[0]), self.config.clamp(vals[1])];
            self.set_voltage(clamped)?;
        }
        Ok(())
    }

    /// Steer the mirrors to a point in the image, via the calibration for the
    /// given camera and laser.
    pub fn set_position(&self, pos: (f64, f64), camera: &str, laser: &str) -> ScanResult<()> {
        let _guard = self.state.lock();
        let vals = self.map_to_scanner(pos.0, pos.1, camera, laser)?;
        self.set_command(vals)
    }

    /// Immediately set the voltage on both mirror axes.
    ///
    /// Does no shutter or limit checking; most callers want
    /// [`set_command`](Self::set_command) instead.
    pub fn set_voltage(&self, vals: [f64; 2]) -> ScanResult<()> {
        let _guard = self.state.lock();
        self.output
            .set_channel_value(&self.config.x_axis.channel, vals[0])?;
        self.output
            .set_channel_value(&self.config.y_axis.channel, vals[1])?;
        debug!(x = vals[0], y = vals[1], "applied mirror voltage");
        Ok(())
    }

    /// Last command value that was requested (not necessarily applied).
    pub fn command(&self) -> [f64; 2] {
        let guard = self.state.lock();
        let cmd = guard.borrow().current_command;
        cmd
    }

    // ------------------------------------------------------------------
    // Virtual shutter
    // ------------------------------------------------------------------

    /// Immediately move the mirrors to the 'off' position, or back to the
    /// stored command. Listeners are notified after the voltage is applied,
    /// whatever the outcome.
    pub fn set_shutter_open(&self, open: bool) -> ScanResult<()> {
        let guard = self.state.lock();
        let command = {
            let mut state = guard.borrow_mut();
            state.shutter_open = open;
            state.current_command
        };
        let applied = if open {
            self.set_voltage(command)
        } else {
            self.set_voltage(self.off_voltage())
        };
        self.notify_shutter(open);
        applied
    }

    /// Whether the virtual shutter is currently open.
    pub fn shutter_open(&self) -> bool {
        let guard = self.state.lock();
        let open = guard.borrow().shutter_open;
        open
    }

    /// Voltage pair steering the beam to its 'off' position.
    pub fn off_voltage(&self) -> [f64; 2] {
        self.config.off_voltage
    }

    /// Subscribe to shutter state changes. Each change delivers the new open
    /// flag; dropped receivers are pruned on the next notification.
    pub fn subscribe_shutter(&self) -> mpsc::Receiver<bool> {
        let (tx, rx) = mpsc::channel();
        self.shutter_listeners.lock().push(tx);
        rx
    }

    fn notify_shutter(&self, open: bool) {
        self.shutter_listeners
            .lock()
            .retain(|tx| tx.send(open).is_ok());
    }

    // ------------------------------------------------------------------
    // Coordinate mapping
    // ------------------------------------------------------------------

    /// Convert a global coordinate to the voltages required to steer the scan
    /// mirrors there. Fails with [`ScannerError::CalibrationMissing`] when no
    /// calibration covers the (camera, laser, objective) combination.
    pub fn map_to_scanner(&self, x: f64, y: f64, camera: &str, laser: &str) -> ScanResult<[f64; 2]> {
        let cam = self.camera(camera)?;
        let objective = cam.current_objective().name;
        let (sx, sy) = cam.map_to_sensor_space(x, y);
        let record = self
            .calibration
            .lookup(camera, laser, &objective)?
            .ok_or_else(|| ScannerError::CalibrationMissing {
                camera: camera.to_string(),
                laser: laser.to_string(),
                objective: objective.clone(),
            })?;
        let (vx, vy) = record.map_to_voltage(sx, sy);
        Ok([vx, vy])
    }

    /// Batch form of [`map_to_scanner`](Self::map_to_scanner): one calibration
    /// lookup, then element-wise mapping of whole coordinate arrays.
    pub fn map_span_to_scanner(
        &self,
        xs: &[f64],
        ys: &[f64],
        camera: &str,
        laser: &str,
    ) -> ScanResult<(Vec<f64>, Vec<f64>)> {
        let cam = self.camera(camera)?;
        let objective = cam.current_objective().name;
        let record = self
            .calibration
            .lookup(camera, laser, &objective)?
            .ok_or_else(|| ScannerError::CalibrationMissing {
                camera: camera.to_string(),
                laser: laser.to_string(),
                objective: objective.clone(),
            })?;
        let mut sx = Vec::with_capacity(xs.len());
        let mut sy = Vec::with_capacity(ys.len());
        for (&x, &y) in xs.iter().zip(ys.iter()) {
            let (a, b) = cam.map_to_sensor_space(x, y);
            sx.push(a);
            sy.push(b);
        }
        Ok(record.map_batch(&sx, &sy))
    }

    // ------------------------------------------------------------------
    // Run spacing
    // ------------------------------------------------------------------

    pub fn last_run_time(&self) -> Option<Instant> {
        let guard = self.state.lock();
        let t = guard.borrow().last_run_time;
        t
    }

    pub(crate) fn set_last_run_time(&self, t: Instant) {
        let guard = self.state.lock();
        guard.borrow_mut().last_run_time = Some(t);
    }

    // ------------------------------------------------------------------
    // Target list
    // ------------------------------------------------------------------

    /// Record that a target or grid of targets changed; `None` removes it.
    /// New interactive sessions read these back so targets persist.
    pub fn update_target(&self, name: &str, info: Option<Value>) {
        let guard = self.state.lock();
        let mut state = guard.borrow_mut();
        match info {
            Some(info) => {
                state.target_list.targets.insert(name.to_string(), info);
            }
            None => {
                state.target_list.targets.remove(name);
            }
        }
    }

    /// Update the shared target packing parameter.
    pub fn update_target_packing(&self, packing: f64) {
        let guard = self.state.lock();
        guard.borrow_mut().target_list.packing = packing;
    }

    /// The full list of targets generated by previous sessions.
    pub fn target_list(&self) -> TargetList {
        let guard = self.state.lock();
        let list = guard.borrow().target_list.clone();
        list
    }

    // ------------------------------------------------------------------
    // Captured camera configuration
    // ------------------------------------------------------------------

    /// Snapshot the camera's parameters and persist them for use when this
    /// camera is next calibrated.
    pub fn store_camera_config(&self, camera: &str) -> ScanResult<()> {
        let params = self.camera(camera)?.capture_params();
        self.store.write(&format!("{camera}Config"), &params)
    }

    /// Previously captured configuration for `camera`, if any.
    pub fn camera_config(&self, camera: &str) -> ScanResult<Option<Value>> {
        self.store.read(&format!("{camera}Config"))
    }
}
