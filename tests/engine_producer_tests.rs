use std::collections::HashMap;
use std::time::Duration;
use sensorsync::core::{DeviceAddr, ExperimentError};
use sensorsync::device::mock::SimulatedDevice;
use sensorsync::device::{ControlCommand, DeviceClient};
use sensorsync::engine::{sampling_wait, ControlMessage, SamplingProducer};

fn addr(port: u16) -> DeviceAddr {
    format!("127.0.0.1:{}", port).parse().unwrap()
}

async fn calibrated(device: &SimulatedDevice, port: u16, scale: f64) -> DeviceClient {
    let mut client = device.client(addr(port));
    client.fetch_config().await.unwrap();
    client.set_scale_factor(scale);
    client
}

#[tokio::test]
async fn test_rejects_uncalibrated_device() {
    let device = SimulatedDevice::new(1.0);
    let (tx, _rx) = crossbeam_channel::unbounded();
    let (_control_tx, control_rx) = crossbeam_channel::bounded(1);

    let result = SamplingProducer::new(
        vec![device.client(addr(9001))],
        Duration::from_millis(40),
        Duration::from_millis(10),
        tx,
        control_rx,
    );
    assert!(matches!(result, Err(ExperimentError::Uncalibrated(a)) if a == addr(9001)));
}

#[tokio::test]
async fn test_rejects_scale_factor_without_representable_wait() {
    let device = SimulatedDevice::new(1.0);
    let mut client = device.client(addr(9001));
    client.set_scale_factor(1e-300);
    let (tx, _rx) = crossbeam_channel::unbounded();
    let (_control_tx, control_rx) = crossbeam_channel::bounded(1);

    assert!(sampling_wait(Duration::from_millis(40), Some(1e-300)).is_none());
    assert_eq!(sampling_wait(Duration::from_millis(40), Some(0.5)), Some(Duration::from_millis(80)));

    let result = SamplingProducer::new(
        vec![client],
        Duration::from_millis(40),
        Duration::from_millis(10),
        tx,
        control_rx,
    );
    assert!(matches!(result, Err(ExperimentError::Uncalibrated(_))));
}

#[tokio::test(start_paused = true)]
async fn test_sampling_rate_follows_scale_factor() {
    let scales = [1.0, 0.98, 1.05];
    let sims: Vec<SimulatedDevice> = scales.iter().map(|s| SimulatedDevice::new(*s)).collect();
    let mut devices = Vec::new();
    for (i, (sim, scale)) in sims.iter().zip(scales).enumerate() {
        devices.push(calibrated(sim, 9001 + i as u16, scale).await);
    }

    let interval = Duration::from_millis(40);
    let (tx, rx) = crossbeam_channel::unbounded();
    let (control_tx, control_rx) = crossbeam_channel::bounded(1);
    let producer = SamplingProducer::new(devices, interval, Duration::from_millis(10), tx, control_rx).unwrap();

    let handle = tokio::spawn(producer.run());
    // Stop lands mid-interval, so the producer sees it at the 2 s poll
    tokio::time::sleep(Duration::from_millis(1_980)).await;
    control_tx.send(ControlMessage::Stop).unwrap();
    let report = handle.await.unwrap();
    assert!(report.failure.is_none());

    let mut counts: HashMap<DeviceAddr, usize> = HashMap::new();
    for frame in rx.try_iter() {
        *counts.entry(frame.device).or_default() += 1;
    }

    for (i, scale) in scales.iter().enumerate() {
        let expected = 2.0 / interval.as_secs_f64() * scale;
        let count = counts[&addr(9001 + i as u16)] as f64;
        assert!((count - expected).abs() <= 1.0, "device {}: {} frames, expected ~{}", i, count, expected);
    }

    assert_eq!(report.missing_frames, 0);
    assert_eq!(report.frames_emitted as usize, counts.values().sum::<usize>());
    assert_eq!(report.devices.len(), 3);
    for sim in &sims {
        let commands = sim.commands();
        assert_eq!(commands.first(), Some(&ControlCommand::Start));
        assert_eq!(&commands[commands.len() - 2..], &[ControlCommand::Stop, ControlCommand::Clear]);
    }
}

#[tokio::test(start_paused = true)]
async fn test_frames_keep_timestamps_in_order() {
    let sim = SimulatedDevice::new(1.0);
    let devices = vec![calibrated(&sim, 9001, 1.0).await];
    let interval = Duration::from_millis(40);
    let (tx, rx) = crossbeam_channel::unbounded();
    let (control_tx, control_rx) = crossbeam_channel::bounded(1);
    let producer = SamplingProducer::new(devices, interval, Duration::ZERO, tx, control_rx).unwrap();

    let handle = tokio::spawn(producer.run());
    tokio::time::sleep(Duration::from_millis(500)).await;
    sim.set_reachable(false);
    tokio::time::sleep(Duration::from_millis(200)).await;
    drop(control_tx);
    let report = handle.await.unwrap();

    let frames: Vec<_> = rx.try_iter().collect();
    for (i, frame) in frames.iter().enumerate() {
        assert_eq!(frame.timestamp, interval * i as u32);
    }
    assert!(frames.first().map_or(false, |f| !f.is_missing()));
    assert!(frames.last().map_or(false, |f| f.is_missing()));
    assert!(report.missing_frames > 0);
}

#[tokio::test(start_paused = true)]
async fn test_panicking_device_is_returned_stopped_and_cleared() {
    let steady = SimulatedDevice::new(1.0);
    let faulty = SimulatedDevice::new(1.0);
    let devices = vec![calibrated(&steady, 9001, 1.0).await, calibrated(&faulty, 9002, 1.0).await];
    let (tx, _rx) = crossbeam_channel::unbounded();
    let (control_tx, control_rx) = crossbeam_channel::bounded(1);
    let producer = SamplingProducer::new(devices, Duration::from_millis(40), Duration::ZERO, tx, control_rx).unwrap();

    faulty.set_panic_on_sample(true);
    let handle = tokio::spawn(producer.run());
    tokio::time::sleep(Duration::from_millis(200)).await;
    control_tx.send(ControlMessage::Stop).unwrap();
    let report = handle.await.unwrap();

    let failure = report.failure.expect("sampling failure is reported");
    assert!(failure.contains("127.0.0.1:9002"), "{}", failure);
    let returned: Vec<_> = report.devices.iter().map(|d| d.addr()).collect();
    assert_eq!(returned, vec![addr(9001), addr(9002)]);
    for sim in [&steady, &faulty] {
        assert_eq!(
            sim.commands(),
            vec![ControlCommand::Start, ControlCommand::Stop, ControlCommand::Clear]
        );
    }
}
