//! Virtual-shutter waveform synthesis.
//!
//! The scanner has no physical shutter; instead the beam is steered to a
//! configured 'off' position whenever the laser should be blocked. Given the
//! companion laser task's activation waveform, this module computes a
//! per-sample "shutter must be open" mask and overwrites every masked-off
//! sample of the mirror command arrays with the off voltage.
//!
//! Each laser-on interval is widened backwards by [`SHUTTER_LEAD`] so the
//! mirrors have settled on target before the laser fires. A laser that is
//! still on when the waveform ends keeps the mask open to the end of the
//! buffer; closing early would blank a commanded exposure.

use tracing::debug;

use crate::error::{ScanResult, ScannerError};

/// How long before each laser-on edge the shutter must already be open.
pub const SHUTTER_LEAD: f64 = 10e-3;

/// Compute the per-sample open mask for a laser activation waveform sampled
/// over `duration` seconds.
///
/// The mask is true over `[on - lead, off)` for every on/off edge pair, with
/// the lead start clamped to index 0. A waveform that starts high counts as an
/// on edge at sample 0.
pub fn shutter_mask(laser: &[bool], duration: f64) -> ScanResult<Vec<bool>> {
    if laser.is_empty() || !(duration > 0.0) {
        return Err(ScannerError::Configuration(
            "shutter synthesis requires a non-empty laser waveform and a positive duration".into(),
        ));
    }
    let dt = duration / laser.len() as f64;
    let lead = (SHUTTER_LEAD / dt) as usize;

    let mut mask = vec![false; laser.len()];
    let mut on_edge: Option<usize> = None;
    for (i, &high) in laser.iter().enumerate() {
        let prev = i > 0 && laser[i - 1];
        if high && !prev {
            on_edge = Some(i);
        } else if !high && prev {
            if let Some(on) = on_edge.take() {
                mask[on.saturating_sub(lead)..i].fill(true);
            }
        }
    }
    // Unmatched on edge: the laser is still firing at buffer end.
    if let Some(on) = on_edge {
        let len = mask.len();
        mask[on.saturating_sub(lead)..len].fill(true);
    }
    Ok(mask)
}

/// Overwrite both command arrays with `off_voltage` wherever the shutter mask
/// is closed. Mutates in place; all three waveforms must share one length.
pub fn apply_shutter_mask(
    x_cmd: &mut [f64],
    y_cmd: &mut [f64],
    laser: &[bool],
    duration: f64,
    off_voltage: [f64; 2],
) -> ScanResult<()> {
    if x_cmd.len() != laser.len() || y_cmd.len() != laser.len() {
        return Err(ScannerError::Configuration(format!(
            "command arrays ({}/{}) do not match laser waveform length ({})",
            x_cmd.len(),
            y_cmd.len(),
            laser.len()
        )));
    }
    let mask = shutter_mask(laser, duration)?;
    let mut closed = 0usize;
    for i in 0..mask.len() {
        if !mask[i] {
            x_cmd[i] = off_voltage[0];
            y_cmd[i] = off_voltage[1];
            closed += 1;
        }
    }
    debug!(
        samples = mask.len(),
        closed, "applied virtual shutter mask"
    );
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pulse(len: usize, on: usize, off: usize) -> Vec<bool> {
        let mut w = vec![false; len];
        w[on..off].fill(true);
        w
    }

    #[test]
    fn test_single_interval_with_lead() {
        // 1000 samples over 1s: dt = 1ms, 10ms lead = 10 samples.
        let laser = pulse(1000, 300, 500);
        let mask = shutter_mask(&laser, 1.0).unwrap();
        for (i, &m) in mask.iter().enumerate() {
            assert_eq!(m, (290..500).contains(&i), "sample {i}");
        }
    }

    #[test]
    fn test_masked_samples_equal_off_voltage() {
        let laser = pulse(1000, 300, 500);
        let mut x = vec![1.5; 1000];
        let mut y = vec![-0.5; 1000];
        apply_shutter_mask(&mut x, &mut y, &laser, 1.0, [-10.0, -9.0]).unwrap();
        for i in 0..1000 {
            if (290..500).contains(&i) {
                assert_eq!(x[i], 1.5);
                assert_eq!(y[i], -0.5);
            } else {
                assert_eq!(x[i], -10.0);
                assert_eq!(y[i], -9.0);
            }
        }
    }

    #[test]
    fn test_lead_clamped_to_array_start() {
        let laser = pulse(1000, 5, 100);
        let mask = shutter_mask(&laser, 1.0).unwrap();
        assert!(mask[0]);
        assert!(mask[99]);
        assert!(!mask[100]);
    }

    #[test]
    fn test_unmatched_on_edge_extends_to_end() {
        let mut laser = vec![false; 1000];
        laser[800..].fill(true);
        let mask = shutter_mask(&laser, 1.0).unwrap();
        assert!(!mask[789]);
        assert!(mask[790..].iter().all(|&m| m));
    }

    #[test]
    fn test_waveform_starting_high_opens_at_zero() {
        let laser = pulse(1000, 0, 200);
        let mask = shutter_mask(&laser, 1.0).unwrap();
        assert!(mask[..200].iter().all(|&m| m));
        assert!(mask[200..].iter().all(|&m| !m));
    }

    #[test]
    fn test_multiple_pulses() {
        let mut laser = vec![false; 1000];
        laser[100..150].fill(true);
        laser[400..450].fill(true);
        let mask = shutter_mask(&laser, 1.0).unwrap();
        for (i, &m) in mask.iter().enumerate() {
            let open = (90..150).contains(&i) || (390..450).contains(&i);
            assert_eq!(m, open, "sample {i}");
        }
    }

    #[test]
    fn test_length_mismatch_rejected() {
        let laser = pulse(100, 10, 20);
        let mut x = vec![0.0; 99];
        let mut y = vec![0.0; 100];
        let err = apply_shutter_mask(&mut x, &mut y, &laser, 1.0, [0.0, 0.0]).unwrap_err();
        assert!(matches!(err, ScannerError::Configuration(_)));
    }

    #[test]
    fn test_all_off_waveform_closes_everything() {
        let laser = vec![false; 100];
        let mut x = vec![2.0; 100];
        let mut y = vec![2.0; 100];
        apply_shutter_mask(&mut x, &mut y, &laser, 0.1, [-10.0, -10.0]).unwrap();
        assert!(x.iter().all(|&v| v == -10.0));
        assert!(y.iter().all(|&v| v == -10.0));
    }
}
