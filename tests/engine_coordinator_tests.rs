use std::collections::HashMap;
use std::net::{Ipv4Addr, SocketAddr};
use std::time::Duration;
use sensorsync::consumer::FrameListener;
use sensorsync::core::{CalibrationConfig, DeviceAddr, ExperimentConfig, ExperimentError};
use sensorsync::device::mock::SimulatedDevice;
use sensorsync::device::ControlCommand;
use sensorsync::engine::{ExperimentCoordinator, Session};
use sensorsync::observability::StatusSnapshot;

fn addr(port: u16) -> DeviceAddr {
    format!("127.0.0.1:{}", port).parse().unwrap()
}

fn config(broadcast_addr: SocketAddr) -> ExperimentConfig {
    ExperimentConfig {
        broadcast_addr,
        frame_rate: 50.0,
        status_refresh_ms: 50,
        drain_timeout_ms: 2_000,
        calibration: CalibrationConfig {
            rounds: 2,
            extended_rounds: 3,
            observation_ms: 200,
            inter_request_delay_ms: 0,
            ..CalibrationConfig::default()
        },
        ..ExperimentConfig::default()
    }
}

fn coordinator(config: ExperimentConfig, devices: &[(u16, &SimulatedDevice)]) -> ExperimentCoordinator {
    let mut session = Session::new(config);
    for (port, device) in devices {
        session.add_device(device.client(addr(*port))).unwrap();
    }
    ExperimentCoordinator::new(session)
}

fn listener() -> FrameListener {
    FrameListener::bind(SocketAddr::from((Ipv4Addr::LOCALHOST, 0)), Duration::from_secs(5)).unwrap()
}

/// Frame and missing-frame counts per device key
fn drain(listener: &FrameListener) -> HashMap<String, (usize, usize)> {
    let mut counts: HashMap<String, (usize, usize)> = HashMap::new();
    while let Ok(Some(message)) = listener.next_message_timeout(Duration::from_millis(300)) {
        for (device, frame) in message {
            let entry = counts.entry(device).or_default();
            entry.0 += 1;
            if frame.data.is_none() {
                entry.1 += 1;
            }
        }
    }
    counts
}

#[tokio::test]
async fn test_full_workflow_streams_every_frame() {
    let listener = listener();
    let slow = SimulatedDevice::new(0.98);
    let fast = SimulatedDevice::new(1.05);
    let mut coordinator = coordinator(config(listener.local_addr()), &[(9001, &slow), (9002, &fast)]);

    let mut snapshots = 0;
    let summary = coordinator
        .run(true, tokio::time::sleep(Duration::from_millis(600)), |_| snapshots += 1)
        .await
        .unwrap();

    assert!(summary.drained);
    assert_eq!(summary.devices, 2);
    assert_eq!(summary.missing_frames, 0);
    assert_eq!(summary.packets_sent, summary.frames_emitted);
    assert!(summary.frames_emitted >= 20);
    assert!(snapshots > 0);

    let scales: HashMap<_, _> = coordinator.session().scale_factors().into_iter().collect();
    assert!((scales[&addr(9001)].unwrap() - 0.98).abs() < 0.05);
    assert!((scales[&addr(9002)].unwrap() - 1.05).abs() < 0.05);

    let counts = drain(&listener);
    let received: usize = counts.values().map(|(frames, _)| frames).sum();
    assert_eq!(received as u64, summary.packets_sent);
}

#[tokio::test]
async fn test_device_lost_mid_run_only_affects_itself() {
    let listener = listener();
    let steady = SimulatedDevice::new(1.0);
    let flaky = SimulatedDevice::new(1.0);
    let mut coordinator = coordinator(config(listener.local_addr()), &[(9001, &steady), (9002, &flaky)]);

    coordinator.preflight().await.unwrap();
    coordinator.calibrate().await.unwrap();
    let experiment = coordinator.launch().unwrap();
    assert!(coordinator.session().is_empty());

    tokio::time::sleep(Duration::from_millis(300)).await;
    flaky.set_reachable(false);
    tokio::time::sleep(Duration::from_millis(300)).await;
    let summary = coordinator.finish(experiment, &mut |_: &StatusSnapshot| {}).await.unwrap();

    assert!(summary.missing_frames > 0);
    assert_eq!(coordinator.session().len(), 2);

    let counts = drain(&listener);
    let (steady_frames, steady_missing) = counts["127.0.0.1:9001"];
    let (flaky_frames, flaky_missing) = counts["127.0.0.1:9002"];
    assert!(steady_frames > 0);
    assert_eq!(steady_missing, 0);
    assert!(flaky_missing > 0);
    assert!(flaky_missing < flaky_frames);
}

#[tokio::test]
async fn test_preflight_failure_leaves_healthy_devices_untouched() {
    let healthy = SimulatedDevice::new(1.0);
    let broken = SimulatedDevice::new(1.0);
    broken.set_failing_status(Some(500));
    let mut coordinator = coordinator(config(SocketAddr::from((Ipv4Addr::LOCALHOST, 9))), &[(9001, &healthy), (9002, &broken)]);

    let err = coordinator
        .run(false, std::future::pending(), |_| {})
        .await
        .unwrap_err();

    match err {
        ExperimentError::PreflightFailed(devices) => assert_eq!(devices, vec![addr(9002)]),
        other => panic!("unexpected error: {}", other),
    }
    assert!(healthy.commands().is_empty());
}

#[tokio::test]
async fn test_calibration_failure_names_unreachable_device() {
    let healthy = SimulatedDevice::new(1.0);
    let gone = SimulatedDevice::new(1.0);
    let mut coordinator = coordinator(config(SocketAddr::from((Ipv4Addr::LOCALHOST, 9))), &[(9001, &healthy), (9002, &gone)]);

    coordinator.preflight().await.unwrap();
    gone.set_reachable(false);
    let err = coordinator.calibrate().await.unwrap_err();

    assert!(matches!(err, ExperimentError::CalibrationFailed(_)));
    assert_eq!(err.devices(), &[addr(9002)]);
}

#[tokio::test]
async fn test_checkpoints_require_devices() {
    let mut coordinator = ExperimentCoordinator::new(Session::new(ExperimentConfig::default()));
    assert!(matches!(coordinator.preflight().await, Err(ExperimentError::NoDevices)));
    assert!(matches!(coordinator.calibrate().await, Err(ExperimentError::NoDevices)));
    assert!(matches!(coordinator.launch(), Err(ExperimentError::NoDevices)));
}

#[tokio::test]
async fn test_launch_refuses_uncalibrated_devices() {
    let device = SimulatedDevice::new(1.0);
    let mut coordinator = coordinator(config(SocketAddr::from((Ipv4Addr::LOCALHOST, 9))), &[(9001, &device)]);

    coordinator.preflight().await.unwrap();
    assert!(matches!(coordinator.launch(), Err(ExperimentError::Uncalibrated(_))));
    assert_eq!(coordinator.session().len(), 1);
}

#[tokio::test]
async fn test_failed_producer_returns_devices_to_session() {
    let listener = listener();
    let steady = SimulatedDevice::new(1.0);
    let faulty = SimulatedDevice::new(1.0);
    let mut coordinator = coordinator(config(listener.local_addr()), &[(9001, &steady), (9002, &faulty)]);

    coordinator.preflight().await.unwrap();
    coordinator.calibrate().await.unwrap();
    faulty.set_panic_on_sample(true);
    let experiment = coordinator.launch().unwrap();

    tokio::time::sleep(Duration::from_millis(200)).await;
    let err = coordinator
        .finish(experiment, &mut |_: &StatusSnapshot| {})
        .await
        .unwrap_err();

    assert!(matches!(err, ExperimentError::ProducerFailed(_)));
    assert_eq!(coordinator.session().addrs(), vec![addr(9001), addr(9002)]);
    for sim in [&steady, &faulty] {
        let commands = sim.commands();
        assert_eq!(&commands[commands.len() - 2..], &[ControlCommand::Stop, ControlCommand::Clear]);
    }
}

#[tokio::test]
async fn test_launch_refuses_unusable_scale_factor() {
    let device = SimulatedDevice::new(1.0);
    let mut coordinator = coordinator(config(SocketAddr::from((Ipv4Addr::LOCALHOST, 9))), &[(9001, &device)]);

    coordinator.preflight().await.unwrap();
    coordinator.session_mut().devices_mut()[0].set_scale_factor(1e-300);

    assert!(matches!(coordinator.launch(), Err(ExperimentError::Uncalibrated(a)) if a == addr(9001)));
    assert_eq!(coordinator.session().len(), 1);
    assert!(device.commands().is_empty());
}

#[tokio::test]
async fn test_extended_calibration_surfaces_device_without_rounds() {
    let healthy = SimulatedDevice::new(1.0);
    let silent = SimulatedDevice::new(1.0);
    let mut coordinator = coordinator(config(SocketAddr::from((Ipv4Addr::LOCALHOST, 9))), &[(9001, &healthy), (9002, &silent)]);

    coordinator.preflight().await.unwrap();
    coordinator.calibrate().await.unwrap();

    silent.set_timeline_available(false);
    let err = coordinator.calibrate_extended().await.unwrap_err();

    assert!(matches!(err, ExperimentError::CalibrationFailed(_)));
    assert_eq!(err.devices(), &[addr(9002)]);
}
