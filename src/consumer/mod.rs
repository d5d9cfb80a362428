pub mod listener;

pub use listener::{FrameListener, ListenerClosed, DEFAULT_INACTIVITY_TIMEOUT};
