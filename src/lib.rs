pub mod calibration;
pub mod consumer;
pub mod core;
pub mod device;
pub mod engine;
pub mod observability;
