pub mod logging;
pub mod metrics;
pub mod monitor;

pub use logging::init_logging;
pub use metrics::PipelineMetrics;
pub use monitor::{StatusMonitor, StatusSnapshot};
