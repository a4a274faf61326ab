//! Lifecycle state definitions.

use serde::Serialize;

/// Rate service lifecycle state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ServiceState {
    /// Never started.
    Idle,
    /// Loading currencies and the first set of rates.
    Starting,
    /// Listener and poller are running.
    Running,
    /// Cancellation requested, tasks draining.
    Stopping,
    /// Stopped cleanly.
    Stopped,
    /// Stopped because a task failed.
    Failed,
}

impl ServiceState {
    /// Check if background tasks may be alive.
    pub fn is_active(&self) -> bool {
        matches!(
            self,
            ServiceState::Starting | ServiceState::Running | ServiceState::Stopping
        )
    }

    /// Check if the service is serving fresh rates.
    pub fn is_operational(&self) -> bool {
        matches!(self, ServiceState::Running)
    }
}

/// Currency listener state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ListenerState {
    Idle,
    /// Consuming the change feed.
    Subscribed,
    Stopped,
    Failed,
}

impl ListenerState {
    /// Check if the listener has finished.
    pub fn is_terminal(&self) -> bool {
        matches!(self, ListenerState::Stopped | ListenerState::Failed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_service_state_transitions() {
        assert!(!ServiceState::Idle.is_active());
        assert!(!ServiceState::Stopped.is_active());
        assert!(!ServiceState::Failed.is_active());
        assert!(ServiceState::Running.is_active());
        assert!(ServiceState::Stopping.is_active());
        assert!(ServiceState::Running.is_operational());
        assert!(!ServiceState::Starting.is_operational());
    }

    #[test]
    fn test_state_serialization() {
        assert_eq!(
            serde_json::to_string(&ServiceState::Running).unwrap(),
            "\"running\""
        );
        assert!(ListenerState::Failed.is_terminal());
        assert!(!ListenerState::Subscribed.is_terminal());
    }
}
