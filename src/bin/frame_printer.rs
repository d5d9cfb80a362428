use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::time::Duration;
use anyhow::Result;
use clap::Parser;
use sensorsync::consumer::FrameListener;
use sensorsync::core::config::DEFAULT_BROADCAST_PORT;
use sensorsync::observability::init_logging;

/// Print frames relayed by a running sensorsync experiment
#[derive(Parser, Debug)]
#[command(name = "frame_printer", version)]
struct Args {
    #[arg(long, default_value_t = IpAddr::V4(Ipv4Addr::LOCALHOST))]
    bind: IpAddr,

    #[arg(short, long, default_value_t = DEFAULT_BROADCAST_PORT)]
    port: u16,

    /// Seconds of silence, after the first frame, before exiting
    #[arg(long, default_value_t = 5.0)]
    inactivity: f64,
}

fn main() -> Result<()> {
    init_logging("info");
    let args = Args::parse();

    let listener = FrameListener::bind(
        SocketAddr::new(args.bind, args.port),
        Duration::from_secs_f64(args.inactivity.max(0.1)),
    )?;

    let mut received = 0u64;
    while let Ok(message) = listener.next_message() {
        for (device, frame) in message {
            received += 1;
            match frame.data {
                Some(data) => println!("{:>21}  t={:>9.3}s  {:?}", device, frame.time, data),
                None => println!("{:>21}  t={:>9.3}s  <missing>", device, frame.time),
            }
        }
    }

    println!("Listener closed after {} frames", received);
    Ok(())
}
