use serde::{Deserialize, Serialize};

/// Sampling producer lifecycle
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ProducerState {
    Idle,
    Starting,
    Running,
    Stopping,
    Done,
    Failed { error_msg: String },
}

impl ProducerState {
    /// Check if transition from current state to target state is valid
    pub fn can_transition_to(&self, target: &ProducerState) -> bool {
        use ProducerState::*;

        matches!(
            (self, target),
            (Idle, Starting) |
            (Starting, Running) |
            (Starting, Failed { .. }) |
            (Running, Stopping) |
            (Running, Failed { .. }) |
            (Stopping, Done) |
            (Stopping, Failed { .. })
        )
    }

    /// Get human-readable state name
    pub fn name(&self) -> &str {
        match self {
            Self::Idle => "Idle",
            Self::Starting => "Starting",
            Self::Running => "Running",
            Self::Stopping => "Stopping",
            Self::Done => "Done",
            Self::Failed { .. } => "Failed",
        }
    }
}

impl Default for ProducerState {
    fn default() -> Self {
        Self::Idle
    }
}
