//! Movement programs and their compilation into sampled waveforms.
//!
//! A [`MovementProgram`] is a declarative, time-ordered list of step/line
//! commands. The compiler turns it into dense per-sample voltage arrays for
//! buffered hardware output:
//!
//! ```text
//! MovementProgram {
//!     num_pts: 10000,
//!     duration: 1.0,
//!     commands: [
//!         Step { time: 0.0,   position: None },              // park off-target
//!         Step { time: 0.2,   position: Some((1.3e-6, 4e-6)) },
//!         Line { range: (0.2, 0.205), position: (2.0e-6, 4e-6) }, // 5 ms sweep
//!         Step { time: 0.205, position: None },
//!     ],
//! }
//! ```
//!
//! Index ranges are half-open and fractional sample indices truncate toward
//! zero. Samples not covered by any command keep the off voltage the arrays
//! are pre-initialized with, so gaps read as "beam parked off-target".

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::{ScanResult, ScannerError};

/// One timed movement command.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub enum ProgramCommand {
    /// Jump to `position` at `time` and hold until the next command.
    /// `None` parks the beam at the off position.
    Step {
        time: f64,
        position: Option<(f64, f64)>,
    },
    /// Sweep linearly from the previous position to `position` over `range`.
    Line { range: (f64, f64), position: (f64, f64) },
}

impl ProgramCommand {
    /// Time at which this command takes effect.
    fn start_time(&self) -> f64 {
        match self {
            ProgramCommand::Step { time, .. } => *time,
            ProgramCommand::Line { range, .. } => range.0,
        }
    }
}

/// A declarative movement program, compiled into `num_pts` samples spanning
/// `duration` seconds.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct MovementProgram {
    pub num_pts: usize,
    pub duration: f64,
    pub commands: Vec<ProgramCommand>,
}

/// Maps logical (image-space) positions to mirror voltages.
///
/// The compiler needs both a scalar and a batch form; line sweeps are
/// interpolated logically and then mapped through the calibration in one
/// batch call.
pub trait PointMapper {
    fn map_point(&self, x: f64, y: f64) -> ScanResult<(f64, f64)>;
    fn map_span(&self, xs: &[f64], ys: &[f64]) -> ScanResult<(Vec<f64>, Vec<f64>)>;
}

/// The logical position established by the most recent command.
#[derive(Clone, Copy, Debug, PartialEq)]
enum LastPosition {
    Undefined,
    /// Beam parked at the off position; not a valid line start.
    Off,
    At(f64, f64),
}

/// Evenly spaced values from `a` to `b` inclusive, `n` samples.
fn linspace(a: f64, b: f64, n: usize) -> Vec<f64> {
    match n {
        0 => Vec::new(),
        1 => vec![a],
        _ => {
            let step = (b - a) / (n - 1) as f64;
            (0..n).map(|i| a + step * i as f64).collect()
        }
    }
}

/// Compile a movement program into per-axis voltage arrays.
///
/// `off_voltage` is used for `Step { position: None }` commands and as the
/// pre-initialized content of uncovered sample ranges.
pub fn compile(
    program: &MovementProgram,
    off_voltage: [f64; 2],
    mapper: &dyn PointMapper,
) -> ScanResult<(Vec<f64>, Vec<f64>)> {
    if program.num_pts == 0 {
        return Err(ScannerError::InvalidProgram("num_pts must be > 0".into()));
    }
    if !(program.duration > 0.0) {
        return Err(ScannerError::InvalidProgram("duration must be > 0".into()));
    }
    let dt = program.duration / program.num_pts as f64;
    let n = program.num_pts;

    // Truncate toward zero, clamp into the array.
    let index_of = |t: f64| -> usize { ((t / dt) as usize).min(n) };

    let mut x_arr = vec![off_voltage[0]; n];
    let mut y_arr = vec![off_voltage[1]; n];
    let mut last = LastPosition::Undefined;

    for (i, cmd) in program.commands.iter().enumerate() {
        match cmd {
            ProgramCommand::Step { time, position } => {
                let start = index_of(*time);
                // The step holds until the next command starts, or to the end
                // of the array for the final command.
                let stop = match program.commands.get(i + 1) {
                    Some(next) => index_of(next.start_time()),
                    None => n,
                };
                let (vx, vy) = match position {
                    Some((px, py)) => {
                        last = LastPosition::At(*px, *py);
                        mapper.map_point(*px, *py)?
                    }
                    None => {
                        last = LastPosition::Off;
                        (off_voltage[0], off_voltage[1])
                    }
                };
                for j in start..stop.max(start) {
                    x_arr[j] = vx;
                    y_arr[j] = vy;
                }
            }
            ProgramCommand::Line { range, position } => {
                let LastPosition::At(lx, ly) = last else {
                    return Err(ScannerError::UndefinedStartPosition { index: i });
                };
                let start = index_of(range.0);
                let stop = index_of(range.1).max(start);
                let count = stop - start;
                if count > 0 {
                    let xs = linspace(lx, position.0, count);
                    let ys = linspace(ly, position.1, count);
                    let (vx, vy) = mapper.map_span(&xs, &ys)?;
                    x_arr[start..stop].copy_from_slice(&vx);
                    y_arr[start..stop].copy_from_slice(&vy);
                }
                last = LastPosition::At(position.0, position.1);
            }
        }
    }

    debug!(
        num_pts = n,
        commands = program.commands.len(),
        "compiled movement program"
    );
    Ok((x_arr, y_arr))
}
