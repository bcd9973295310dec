use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use crate::error::ErrorKind;

/// Per-provider health classification. Transitions are driven by
/// `helix-registry`'s state machine (§4.2); this crate only defines the
/// states and the window data the machine reads.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HealthState {
    Healthy,
    Degraded,
    Unhealthy,
    Quarantined,
}

/// Per-provider circuit-breaker state. `Open` rejects without calling the
/// adapter; `HalfOpen` admits exactly one trial call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CircuitState {
    Closed,
    Open,
    HalfOpen,
}

impl CircuitState {
    /// Whether a provider in this state is eligible for `Select` (§4.2:
    /// only `Closed` or `HalfOpen` providers are ever returned).
    pub fn is_selectable(self) -> bool {
        matches!(self, CircuitState::Closed | CircuitState::HalfOpen)
    }
}

/// Sliding-window counters backing a health transition decision. Owned
/// and mutated by the registry; the shape lives here because it is part
/// of the shared data model (§3).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct HealthWindow {
    pub success: u64,
    pub failure_by_kind: HashMap<ErrorKind, u64>,
    pub latency_p50_ms: f64,
    pub latency_p95_ms: f64,
    pub consecutive_failures: u32,
    pub last_transition_at: Option<DateTime<Utc>>,
}

impl HealthWindow {
    pub fn total_requests(&self) -> u64 {
        self.success + self.failure_by_kind.values().sum::<u64>()
    }

    pub fn total_failures(&self) -> u64 {
        self.failure_by_kind.values().sum()
    }

    /// Failure ratio over all recorded requests in the window; `0.0`
    /// when the window is empty, matching the "no data yet" case the
    /// registry treats as healthy.
    pub fn failure_ratio(&self) -> f64 {
        let total = self.total_requests();
        if total == 0 {
            0.0
        } else {
            self.total_failures() as f64 / total as f64
        }
    }

    pub fn success_ratio(&self) -> f64 {
        1.0 - self.failure_ratio()
    }
}
