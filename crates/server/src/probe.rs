//! Periodic agent liveness probing.

use std::sync::Arc;
use std::time::Duration;

use bazaar_agent::gateway::InvocationGateway;
use bazaar_agent::registry::AgentRegistry;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

/// Upper bound for a single `/health` round trip.
const PROBE_TIMEOUT: Duration = Duration::from_secs(3);

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct ProbeReport {
    pub probed: usize,
    pub available: usize,
    pub changed: usize,
}

/// Probes every registered agent once and records availability changes.
pub async fn probe_once(
    registry: &AgentRegistry,
    gateway: &dyn InvocationGateway,
) -> ProbeReport {
    let mut report = ProbeReport::default();
    for agent in registry.list().await {
        let alive = gateway.probe(&agent, PROBE_TIMEOUT).await;
        report.probed += 1;
        if alive {
            report.available += 1;
        }
        if alive == agent.available {
            continue;
        }
        match registry.set_availability(&agent.id, alive).await {
            Ok(()) => report.changed += 1,
            Err(error) => warn!(
                event_name = "system.probe.update_failed",
                agent_id = %agent.id,
                error = %error,
                "could not record agent availability"
            ),
        }
    }
    debug!(
        event_name = "system.probe.completed",
        probed = report.probed,
        available = report.available,
        changed = report.changed,
        "agent probe sweep completed"
    );
    report
}

/// Starts the probe loop. A zero interval disables probing.
pub fn spawn(
    registry: Arc<AgentRegistry>,
    gateway: Arc<dyn InvocationGateway>,
    interval_secs: u64,
) -> Option<JoinHandle<()>> {
    if interval_secs == 0 {
        return None;
    }

    Some(tokio::spawn(async move {
        let mut ticker = tokio::time::interval(Duration::from_secs(interval_secs));
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        loop {
            ticker.tick().await;
            probe_once(&registry, gateway.as_ref()).await;
        }
    }))
}
