//! Calibration records and the coordinate→voltage mapping.
//!
//! A scanner is calibrated per (camera, laser, objective) triple. Each
//! [`CalibrationRecord`] carries a quadratic polynomial mapping sensor-space
//! coordinates to mirror voltages, plus the reference spot measurement taken
//! at calibration time.
//!
//! # Polynomial model
//!
//! Each output axis `i` is computed from the sensor coordinates `(x, y)` as:
//!
//! ```text
//! v_i = c[i][0] + c[i][1]*x + c[i][2]*y + c[i][3]*x² + c[i][4]*y²
//! ```
//!
//! The mapping is pure and deterministic; [`CalibrationRecord::map_batch`]
//! applies it element-wise over coordinate arrays for the program compiler.
//!
//! # Index structure
//!
//! Records live in a three-level [`CalibrationIndex`]
//! (camera → laser → objective). Absence of any key is not an error: it means
//! "uncalibrated" and is reported as a warning-level lookup miss. The index is
//! loaded lazily once per device lifetime, cached, and invalidated only by an
//! explicit [`CalibrationStore::write_index`].

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, info, warn};

use crate::error::ScanResult;
use crate::storage::ConfigStore;

/// Storage key of the calibration index blob.
const INDEX_BLOB: &str = "index";
/// Storage key of the flat calibration defaults blob.
const DEFAULTS_BLOB: &str = "defaults";

/// Reference beam-geometry measurement captured alongside a calibration.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct Spot {
    /// Laser intensity at which the spot was measured.
    pub intensity: f64,
    /// Measured spot diameter in image units.
    pub size: f64,
}

/// One calibration for a (camera, laser, objective) triple.
///
/// Immutable once stored; [`CalibrationStore::lookup`] hands out clones so the
/// cached index can never be mutated from outside.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct CalibrationRecord {
    /// 2×5 coefficient matrix, one row per output axis:
    /// constant, linear-x, linear-y, quadratic-x, quadratic-y.
    pub params: [[f64; 5]; 2],
    /// Reference spot measurement.
    pub spot: Spot,
    /// When this calibration was captured.
    pub calibrated: DateTime<Utc>,
}

impl CalibrationRecord {
    pub fn new(params: [[f64; 5]; 2], spot: Spot) -> Self {
        Self {
            params,
            spot,
            calibrated: Utc::now(),
        }
    }

    /// Map one sensor-space coordinate to the mirror voltage pair.
    pub fn map_to_voltage(&self, x: f64, y: f64) -> (f64, f64) {
        let eval = |c: &[f64; 5]| c[0] + c[1] * x + c[2] * y + c[3] * x * x + c[4] * y * y;
        (eval(&self.params[0]), eval(&self.params[1]))
    }

    /// Map coordinate arrays element-wise. `xs` and `ys` must be equal length.
    pub fn map_batch(&self, xs: &[f64], ys: &[f64]) -> (Vec<f64>, Vec<f64>) {
        debug_assert_eq!(xs.len(), ys.len());
        let mut vx = Vec::with_capacity(xs.len());
        let mut vy = Vec::with_capacity(xs.len());
        for (&x, &y) in xs.iter().zip(ys.iter()) {
            let (a, b) = self.map_to_voltage(x, y);
            vx.push(a);
            vy.push(b);
        }
        (vx, vy)
    }
}

/// Three-level mapping camera → laser → objective → record.
pub type CalibrationIndex = HashMap<String, HashMap<String, HashMap<String, CalibrationRecord>>>;

/// Cached, persistently backed calibration index plus the flat defaults blob.
pub struct CalibrationStore {
    store: Arc<dyn ConfigStore>,
    cache: Mutex<Option<CalibrationIndex>>,
}

impl CalibrationStore {
    pub fn new(store: Arc<dyn ConfigStore>) -> Self {
        Self {
            store,
            cache: Mutex::new(None),
        }
    }

    /// Return a copy of the full index, loading it from storage on first use.
    /// A missing index blob yields an empty index, not an error.
    pub fn index(&self) -> ScanResult<CalibrationIndex> {
        let mut cache = self.cache.lock();
        if cache.is_none() {
            let index = match self.store.read(INDEX_BLOB)? {
                Some(value) => serde_json::from_value(value)?,
                None => CalibrationIndex::new(),
            };
            debug!(cameras = index.len(), "loaded calibration index");
            *cache = Some(index);
        }
        Ok(cache.as_ref().cloned().unwrap_or_default())
    }

    /// Persist a full index and swap the in-memory cache atomically.
    pub fn write_index(&self, index: CalibrationIndex) -> ScanResult<()> {
        let mut cache = self.cache.lock();
        self.store.write(INDEX_BLOB, &serde_json::to_value(&index)?)?;
        info!(cameras = index.len(), "rewrote calibration index");
        *cache = Some(index);
        Ok(())
    }

    /// Look up the calibration for a (camera, laser, objective) triple.
    ///
    /// Returns `Ok(None)` with a logged warning when any index level is
    /// missing; the caller decides whether an uncalibrated combination is
    /// fatal.
    pub fn lookup(
        &self,
        camera: &str,
        laser: &str,
        objective: &str,
    ) -> ScanResult<Option<CalibrationRecord>> {
        let index = self.index()?;
        let Some(by_laser) = index.get(camera) else {
            warn!(camera, "no calibration found for camera");
            return Ok(None);
        };
        let Some(by_objective) = by_laser.get(laser) else {
            warn!(camera, laser, "no calibration found for laser");
            return Ok(None);
        };
        let Some(record) = by_objective.get(objective) else {
            warn!(camera, laser, objective, "no calibration found for objective");
            return Ok(None);
        };
        Ok(Some(record.clone()))
    }

    /// Read the camera/laser-independent calibration defaults blob.
    pub fn read_defaults(&self) -> ScanResult<Option<Value>> {
        self.store.read(DEFAULTS_BLOB)
    }

    /// Persist the calibration defaults blob.
    pub fn write_defaults(&self, state: &Value) -> ScanResult<()> {
        self.store.write(DEFAULTS_BLOB, state)
    }
}
