pub mod client;
pub mod http;
pub mod mock;
pub mod transport;

pub use client::DeviceClient;
pub use http::HttpTransport;
pub use transport::{ControlCommand, ControlTransport, RemoteEvent, RemoteEventKind, TransportError};
