use std::net::{Ipv4Addr, SocketAddr, UdpSocket};
use std::sync::atomic::AtomicBool;
use std::sync::Arc;
use std::time::Duration;
use sensorsync::core::{BroadcastMessage, DeviceAddr, Frame};
use sensorsync::engine::Broadcaster;
use sensorsync::observability::PipelineMetrics;

#[test]
fn test_drains_queue_after_stop() {
    let receiver = UdpSocket::bind((Ipv4Addr::LOCALHOST, 0)).unwrap();
    receiver.set_read_timeout(Some(Duration::from_secs(2))).unwrap();

    let (tx, rx) = crossbeam_channel::unbounded();
    let device: DeviceAddr = "10.0.0.5:8080".parse().unwrap();
    let interval = Duration::from_millis(40);
    for i in 0..20u32 {
        let frame = if i % 5 == 4 {
            Frame::missing(device, interval * i)
        } else {
            Frame::new(device, interval * i, [("accX".to_string(), i as f64)].into_iter().collect())
        };
        tx.send(frame).unwrap();
    }

    let running = Arc::new(AtomicBool::new(false));
    let metrics = Arc::new(PipelineMetrics::new());
    let target: SocketAddr = receiver.local_addr().unwrap();
    let broadcaster = Broadcaster::bind(target, rx, running, metrics.clone()).unwrap();
    broadcaster.run();

    assert_eq!(metrics.packets_sent(), 20);
    assert_eq!(metrics.missing_frames(), 4);
    assert_eq!(metrics.send_errors(), 0);

    let mut buf = [0u8; 2048];
    let mut times = Vec::new();
    for _ in 0..20 {
        let (len, _) = receiver.recv_from(&mut buf).unwrap();
        let message: BroadcastMessage = serde_json::from_slice(&buf[..len]).unwrap();
        times.push(message["10.0.0.5:8080"].time);
    }
    assert!((times[19] - 0.76).abs() < 1e-9);
}

#[test]
fn test_exits_when_producer_side_disconnects() {
    let receiver = UdpSocket::bind((Ipv4Addr::LOCALHOST, 0)).unwrap();
    let (tx, rx) = crossbeam_channel::unbounded::<Frame>();
    drop(tx);

    let running = Arc::new(AtomicBool::new(true));
    let metrics = Arc::new(PipelineMetrics::new());
    let broadcaster = Broadcaster::bind(receiver.local_addr().unwrap(), rx, running, metrics.clone()).unwrap();
    let handle = broadcaster.spawn().unwrap();

    handle.join().unwrap();
    assert_eq!(metrics.packets_sent(), 0);
}
