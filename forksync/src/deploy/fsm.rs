//! Finite State Machine for container deployment

use serde::{Deserialize, Serialize};

/// Deployment state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DeploymentState {
    /// Nothing done yet
    Pending,

    /// Images being rebuilt and containers started
    Building,

    /// Waiting for the service to report healthy
    Probing,

    /// Health timeout exhausted
    Unhealthy,

    /// Restart cycle in progress
    Restarting,

    /// Service is healthy
    Healthy,

    /// Sources unchanged and service healthy, nothing rebuilt
    Unchanged,

    /// Deployment failed
    Failed,
}

/// Deployment event
#[derive(Debug, Clone)]
pub enum DeploymentEvent {
    /// Sources and service state allow skipping the rebuild
    Skip,

    /// Start rebuilding
    Build,

    /// Containers are up
    Built,

    /// Build or start failed
    BuildFailed(String),

    /// A probe succeeded
    ProbeSucceeded,

    /// The health timeout elapsed without a successful probe
    ProbeTimedOut,

    /// Begin a restart cycle
    Restart,

    /// Restart cycle finished, probe again
    Restarted,

    /// No restart cycles left
    GiveUp(String),
}

/// Deployment FSM
#[derive(Debug, Clone)]
pub struct DeploymentFsm {
    state: DeploymentState,
    error: Option<String>,
    restart_count: u32,
}

impl DeploymentFsm {
    /// Create a new FSM in pending state
    pub fn new() -> Self {
        Self {
            state: DeploymentState::Pending,
            error: None,
            restart_count: 0,
        }
    }

    /// Get current state
    pub fn state(&self) -> DeploymentState {
        self.state
    }

    /// Get error message if any
    pub fn error(&self) -> Option<&str> {
        self.error.as_deref()
    }

    /// Restart cycles started so far
    pub fn restart_count(&self) -> u32 {
        self.restart_count
    }

    /// Process an event and transition state
    pub fn process(&mut self, event: DeploymentEvent) -> Result<(), String> {
        let new_state = match (&self.state, &event) {
            // From Pending
            (DeploymentState::Pending, DeploymentEvent::Skip) => DeploymentState::Unchanged,
            (DeploymentState::Pending, DeploymentEvent::Build) => DeploymentState::Building,

            // From Building
            (DeploymentState::Building, DeploymentEvent::Built) => DeploymentState::Probing,
            (DeploymentState::Building, DeploymentEvent::BuildFailed(err)) => {
                self.error = Some(err.clone());
                DeploymentState::Failed
            }

            // From Probing
            (DeploymentState::Probing, DeploymentEvent::ProbeSucceeded) => DeploymentState::Healthy,
            (DeploymentState::Probing, DeploymentEvent::ProbeTimedOut) => DeploymentState::Unhealthy,

            // From Unhealthy
            (DeploymentState::Unhealthy, DeploymentEvent::Restart) => {
                self.restart_count += 1;
                DeploymentState::Restarting
            }
            (DeploymentState::Unhealthy, DeploymentEvent::GiveUp(err)) => {
                self.error = Some(err.clone());
                DeploymentState::Failed
            }

            // From Restarting
            (DeploymentState::Restarting, DeploymentEvent::Restarted) => DeploymentState::Probing,
            (DeploymentState::Restarting, DeploymentEvent::BuildFailed(err)) => {
                self.error = Some(err.clone());
                DeploymentState::Failed
            }

            // Invalid transitions
            (state, event) => {
                return Err(format!("Invalid transition: {:?} -> {:?}", state, event));
            }
        };

        self.state = new_state;
        Ok(())
    }

    /// Check if another restart cycle is allowed
    pub fn can_retry(&self, max_restarts: u32) -> bool {
        self.state == DeploymentState::Unhealthy && self.restart_count < max_restarts
    }
}

impl Default for DeploymentFsm {
    fn default() -> Self {
        Self::new()
    }
}
