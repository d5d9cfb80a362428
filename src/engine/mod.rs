pub mod broadcaster;
pub mod coordinator;
pub mod fanout;
pub mod producer;
pub mod session;
pub mod state;

pub use broadcaster::Broadcaster;
pub use coordinator::{ExperimentCoordinator, ExperimentSummary, RunningExperiment};
pub use fanout::join_devices;
pub use producer::{sampling_wait, ControlMessage, ProducerHandle, ProducerReport, SamplingProducer};
pub use session::Session;
pub use state::ProducerState;
