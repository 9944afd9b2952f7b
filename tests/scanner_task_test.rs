//! End-to-end scanner acquisition lifecycle over mock hardware.

use std::sync::Arc;
use std::time::Instant;

use parking_lot::Mutex;
use serial_test::serial;

use galvo_scanner::hardware::mock::{FixedSiblings, MockAnalogOutput, MockCamera, MockDaqTask};
use galvo_scanner::hardware::DaqTask;
use galvo_scanner::storage::{JsonFileStore, MemoryResultSink};
use galvo_scanner::{
    AxisChannel, CalibrationIndex, CalibrationRecord, MovementProgram, ProgramCommand,
    ScannerConfig, ScannerDevice, ScannerTask, Spot, TaskCommand,
};

fn scanner_config(dir: &std::path::Path) -> ScannerConfig {
    ScannerConfig {
        x_axis: AxisChannel {
            daq: "DAQ1".into(),
            channel: "ao0".into(),
        },
        y_axis: AxisChannel {
            daq: "DAQ1".into(),
            channel: "ao1".into(),
        },
        command_limits: (-10.0, 10.0),
        off_voltage: [-10.0, -10.0],
        config_dir: dir.to_path_buf(),
    }
}

/// A scanner device wired to mocks, with one linear calibration for
/// (Camera, UVLaser, 63x): voltage = sensor coordinate.
fn build_device(dir: &std::path::Path) -> (Arc<ScannerDevice>, Arc<MockAnalogOutput>) {
    let output = Arc::new(MockAnalogOutput::new());
    let store = Arc::new(JsonFileStore::new(dir));
    let dev = Arc::new(
        ScannerDevice::new("Scanner", scanner_config(dir), output.clone(), store).unwrap(),
    );
    dev.register_camera("Camera", Arc::new(MockCamera::new("63x")));

    let mut index = CalibrationIndex::new();
    index
        .entry("Camera".into())
        .or_default()
        .entry("UVLaser".into())
        .or_default()
        .insert(
            "63x".into(),
            CalibrationRecord::new(
                [[0.0, 1.0, 0.0, 0.0, 0.0], [0.0, 0.0, 1.0, 0.0, 0.0]],
                Spot {
                    intensity: 1.0,
                    size: 2.5e-6,
                },
            ),
        );
    dev.calibration().write_index(index).unwrap();
    (dev, output)
}

#[test]
fn full_program_run_with_simulated_shutter() {
    let dir = tempfile::tempdir().unwrap();
    let (dev, output) = build_device(dir.path());

    // Laser fires over [300, 500) of a 1000-sample, 1-second run.
    let mut laser = vec![false; 1000];
    laser[300..500].fill(true);
    let siblings = FixedSiblings::new().with_laser("UVLaser", laser);

    let cmd = TaskCommand {
        program: Some(MovementProgram {
            num_pts: 1000,
            duration: 1.0,
            commands: vec![
                ProgramCommand::Step {
                    time: 0.0,
                    position: Some((1.0, 2.0)),
                },
                ProgramCommand::Line {
                    range: (0.3, 0.5),
                    position: (3.0, 2.0),
                },
                ProgramCommand::Step {
                    time: 0.5,
                    position: None,
                },
            ],
        }),
        camera: Some("Camera".into()),
        laser: Some("UVLaser".into()),
        simulate_shutter: true,
        duration: Some(1.0),
        ..Default::default()
    };

    let mut task = ScannerTask::new(dev.clone(), cmd);
    // The scheduler must order the laser task's configuration first.
    assert_eq!(task.config_order().after, vec!["UVLaser".to_string()]);

    task.configure(&siblings).unwrap();

    // Configuring a shuttered run closes the virtual shutter immediately.
    assert!(!dev.shutter_open());
    assert_eq!(output.value("ao0"), Some(-10.0));

    let daq = Arc::new(Mutex::new(MockDaqTask::new("DAQ1")));
    let daq_dyn: Arc<Mutex<dyn DaqTask>> = daq.clone();
    task.create_channels(daq_dyn).unwrap();

    {
        let mock = daq.lock();
        assert_eq!(mock.channels.len(), 2);
        let x = &mock.waveforms["ao0"];
        assert_eq!(x.len(), 1000);
        // Shutter opens 10 samples before the laser, so the program voltage
        // survives over [290, 500) and everything else is parked off-target.
        assert_eq!(x[289], -10.0);
        assert_eq!(x[290], 1.0);
        assert!((x[499] - 3.0).abs() < 1e-2);
        assert_eq!(x[500], -10.0);
        assert_eq!(x[999], -10.0);
    }

    task.start().unwrap();
    task.stop(false).unwrap();
    assert_eq!(daq.lock().stopped, Some(false));
    assert!(dev.last_run_time().is_some());

    let sink = MemoryResultSink::new();
    task.store_result(&sink).unwrap();
    let record = sink.get("Scanner").unwrap();
    assert_eq!(record["spotSize"], serde_json::json!(2.5e-6));
}

#[test]
fn calibration_survives_device_restart() {
    let dir = tempfile::tempdir().unwrap();
    {
        let (_dev, _out) = build_device(dir.path());
    }
    // A fresh device over the same config dir sees the stored index.
    let output = Arc::new(MockAnalogOutput::new());
    let store = Arc::new(JsonFileStore::new(dir.path()));
    let dev =
        ScannerDevice::new("Scanner", scanner_config(dir.path()), output, store).unwrap();
    dev.register_camera("Camera", Arc::new(MockCamera::new("63x")));
    dev.set_position((0.5, -0.5), "Camera", "UVLaser").unwrap();
    assert_eq!(dev.command(), [0.5, -0.5]);
}

#[test]
#[serial]
fn min_wait_time_blocks_second_start() {
    let dir = tempfile::tempdir().unwrap();
    let (dev, _output) = build_device(dir.path());

    let mut first = ScannerTask::new(
        dev.clone(),
        TaskCommand {
            command: Some([0.0, 0.0]),
            ..Default::default()
        },
    );
    first.configure(&FixedSiblings::new()).unwrap();
    // First run never waits, even with a min_wait_time set.
    let t0 = Instant::now();
    first.start().unwrap();
    assert!(t0.elapsed().as_secs_f64() < 0.02);
    first.stop(false).unwrap();

    let mut second = ScannerTask::new(
        dev,
        TaskCommand {
            command: Some([0.0, 0.0]),
            min_wait_time: Some(0.05),
            ..Default::default()
        },
    );
    second.configure(&FixedSiblings::new()).unwrap();
    let t1 = Instant::now();
    second.start().unwrap();
    // The second start blocks for (close to) the full remaining delta.
    assert!(t1.elapsed().as_secs_f64() >= 0.03);
    second.stop(false).unwrap();
}
