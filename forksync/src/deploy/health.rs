//! Service health probes and polling

use std::sync::Arc;
use std::time::Duration;

use reqwest::{redirect, Client};
use tokio::net::TcpStream;
use tokio::time::{sleep, timeout, Instant};
use tracing::{debug, info};

use crate::app::shutdown::ShutdownSignal;
use crate::deploy::compose::{ComposeTarget, ContainerRuntime, ServiceHealth};
use crate::errors::SyncError;
use crate::registry::project::{Deployment, HealthCheck};
use crate::storage::settings::Settings;

const PROBE_TIMEOUT: Duration = Duration::from_secs(5);

/// Timing of a polling round
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PollTiming {
    pub wait_before: Duration,
    pub interval: Duration,
    pub timeout: Duration,
}

impl PollTiming {
    pub fn from_settings(settings: &Settings) -> Self {
        let t = &settings.timeouts;
        Self {
            wait_before: Duration::from_secs(t.wait_before_health_check_secs),
            interval: Duration::from_secs(t.health_check_interval_secs.max(1)),
            timeout: Duration::from_secs(t.health_check_timeout_secs),
        }
    }
}

/// Result of a polling round
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PollResult {
    pub healthy: bool,
    pub probes: u32,
    pub failures: u32,
    pub last_failure: Option<String>,
}

pub struct HealthProber {
    runtime: Arc<dyn ContainerRuntime>,
    http: Client,
}

impl HealthProber {
    pub fn new(runtime: Arc<dyn ContainerRuntime>) -> Result<Self, SyncError> {
        let http = Client::builder()
            .timeout(PROBE_TIMEOUT)
            .redirect(redirect::Policy::none())
            .build()
            .map_err(|e| SyncError::Internal(format!("HTTP client: {}", e)))?;
        Ok(Self { runtime, http })
    }

    /// One probe; `Err` carries the reason it failed
    pub async fn probe(&self, deployment: &Deployment, target: &ComposeTarget) -> Result<(), String> {
        match &deployment.health_check {
            HealthCheck::Tcp { host, port } => {
                let port = port
                    .or(deployment.port)
                    .ok_or_else(|| "tcp health check without a port".to_string())?;
                match timeout(PROBE_TIMEOUT, TcpStream::connect((host.as_str(), port))).await {
                    Ok(Ok(_)) => Ok(()),
                    Ok(Err(e)) => Err(format!("{}:{}: {}", host, port, e)),
                    Err(_) => Err(format!("{}:{}: connect timed out", host, port)),
                }
            }
            HealthCheck::Http { url } => {
                let response = self.http.get(url).send().await.map_err(|e| format!("{}: {}", url, e))?;
                let status = response.status();
                if status.is_success() || status.is_redirection() {
                    Ok(())
                } else {
                    Err(format!("{} returned {}", url, status))
                }
            }
            HealthCheck::Container => match self.runtime.service_health(target).await {
                Ok(ServiceHealth::Healthy) => Ok(()),
                Ok(state) => Err(format!("service {} is {:?}", target.service, state)),
                Err(e) => Err(e.to_string()),
            },
        }
    }

    /// Wait, then probe every interval until healthy or the timeout elapses.
    /// At least one probe is made.
    pub async fn poll(
        &self,
        deployment: &Deployment,
        target: &ComposeTarget,
        timing: PollTiming,
        shutdown: &ShutdownSignal,
    ) -> Result<PollResult, SyncError> {
        let mut result = PollResult::default();
        self.pause(timing.wait_before, shutdown).await?;

        let deadline = Instant::now() + timing.timeout;
        loop {
            result.probes += 1;
            match self.probe(deployment, target).await {
                Ok(()) => {
                    info!("{} healthy after {} probes", target.service, result.probes);
                    result.healthy = true;
                    return Ok(result);
                }
                Err(reason) => {
                    debug!("Probe {} of {} failed: {}", result.probes, target.service, reason);
                    result.failures += 1;
                    result.last_failure = Some(reason);
                }
            }
            if Instant::now() + timing.interval > deadline {
                return Ok(result);
            }
            self.pause(timing.interval, shutdown).await?;
        }
    }

    async fn pause(&self, duration: Duration, shutdown: &ShutdownSignal) -> Result<(), SyncError> {
        if duration.is_zero() {
            return shutdown.check();
        }
        let mut signal = shutdown.clone();
        tokio::select! {
            _ = sleep(duration) => Ok(()),
            _ = signal.cancelled() => Err(SyncError::Cancelled),
        }
    }
}
