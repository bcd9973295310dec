use std::sync::atomic::{AtomicBool, AtomicU8, Ordering};
use std::time::{Duration, Instant};

use chrono::Utc;
use helix_core::{CircuitState, ErrorKind, HealthState, HealthWindow};
use parking_lot::RwLock;

/// Tunables for a provider's circuit breaker, per §4.2: "opens after N
/// consecutive failures inside window W; transitions Open→HalfOpen after
/// cooldown T".
#[derive(Debug, Clone, Copy)]
pub struct BreakerConfig {
    pub failure_threshold: u32,
    pub window: Duration,
    pub cooldown: Duration,
}

impl Default for BreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            window: Duration::from_secs(60),
            cooldown: Duration::from_secs(30),
        }
    }
}

fn circuit_from_u8(v: u8) -> CircuitState {
    match v {
        0 => CircuitState::Closed,
        1 => CircuitState::Open,
        _ => CircuitState::HalfOpen,
    }
}

fn circuit_to_u8(s: CircuitState) -> u8 {
    match s {
        CircuitState::Closed => 0,
        CircuitState::Open => 1,
        CircuitState::HalfOpen => 2,
    }
}

/// The outcome of one adapter invocation, as reported to `Registry::record`.
#[derive(Debug, Clone, Copy)]
pub enum Outcome {
    Success,
    Failure(ErrorKind),
}

/// Per-provider health and circuit-breaker state. Breaker transitions use
/// lock-free atomics (§9: "per-provider breaker counters may use
/// lock-free atomics"); the sliding-window counters behind a
/// `parking_lot::RwLock` are copy-on-read so a `Select` call never holds
/// a lock across a network call.
pub struct ProviderHealth {
    state: RwLock<HealthState>,
    window: RwLock<HealthWindow>,
    breaker_state: AtomicU8,
    half_open_admitted: AtomicBool,
    opened_at: RwLock<Option<Instant>>,
    baseline_latency_ms: RwLock<Option<f64>>,
    cfg: BreakerConfig,
}

impl ProviderHealth {
    pub fn new(cfg: BreakerConfig) -> Self {
        Self {
            state: RwLock::new(HealthState::Healthy),
            window: RwLock::new(HealthWindow::default()),
            breaker_state: AtomicU8::new(circuit_to_u8(CircuitState::Closed)),
            half_open_admitted: AtomicBool::new(false),
            opened_at: RwLock::new(None),
            baseline_latency_ms: RwLock::new(None),
            cfg,
        }
    }

    pub fn state(&self) -> HealthState {
        *self.state.read()
    }

    pub fn circuit_state(&self) -> CircuitState {
        circuit_from_u8(self.breaker_state.load(Ordering::Acquire))
    }

    /// Copy-on-read snapshot of the sliding-window counters, for
    /// observability collaborators and `Select`'s `latency`/`score`
    /// ordering.
    pub fn window_snapshot(&self) -> HealthWindow {
        self.window.read().clone()
    }

    /// Whether a call may be admitted right now: `Closed` always, `Open`
    /// never (reject without calling the adapter, §4.2), `HalfOpen`
    /// admits exactly one trial call.
    pub fn try_admit(&self) -> bool {
        match self.circuit_state() {
            CircuitState::Closed => true,
            CircuitState::Open => {
                let elapsed = self
                    .opened_at
                    .read()
                    .map(|t| t.elapsed() >= self.cfg.cooldown)
                    .unwrap_or(false);
                if elapsed {
                    self.breaker_state
                        .store(circuit_to_u8(CircuitState::HalfOpen), Ordering::Release);
                    self.half_open_admitted.store(true, Ordering::Release);
                    true
                } else {
                    false
                }
            }
            CircuitState::HalfOpen => {
                // Only the transitioning call above admits a trial; later
                // callers observing HalfOpen before the trial resolves
                // are rejected.
                !self.half_open_admitted.swap(true, Ordering::AcqRel)
            }
        }
    }

    /// Records one call outcome, updating the sliding window, the
    /// breaker, and (per the state machine in §4.2) the health state.
    /// Returns the transition that occurred, if any.
    pub fn record(&self, outcome: Outcome, latency_ms: u64) -> Option<(HealthState, HealthState)> {
        {
            let mut window = self.window.write();
            match outcome {
                Outcome::Success => {
                    window.success += 1;
                    window.consecutive_failures = 0;
                }
                Outcome::Failure(kind) => {
                    *window.failure_by_kind.entry(kind).or_insert(0) += 1;
                    window.consecutive_failures += 1;
                }
            }
            // EWMA-style running estimate; adequate for the admission
            // and transition decisions below without a full histogram.
            window.latency_p50_ms = window.latency_p50_ms * 0.9 + latency_ms as f64 * 0.1;
            window.latency_p95_ms = window.latency_p95_ms.max(window.latency_p50_ms).max(latency_ms as f64 * 0.8)
                * 0.95
                + latency_ms as f64 * 0.05;
        }

        {
            let mut baseline = self.baseline_latency_ms.write();
            if baseline.is_none() {
                *baseline = Some(latency_ms.max(1) as f64);
            }
        }

        self.update_breaker(outcome);
        self.update_health_state(outcome)
    }

    fn update_breaker(&self, outcome: Outcome) {
        let circuit = self.circuit_state();
        match (circuit, outcome) {
            (CircuitState::HalfOpen, Outcome::Success) => {
                self.breaker_state
                    .store(circuit_to_u8(CircuitState::Closed), Ordering::Release);
                self.half_open_admitted.store(false, Ordering::Release);
                *self.opened_at.write() = None;
            }
            (CircuitState::HalfOpen, Outcome::Failure(_)) => {
                self.breaker_state
                    .store(circuit_to_u8(CircuitState::Open), Ordering::Release);
                self.half_open_admitted.store(false, Ordering::Release);
                *self.opened_at.write() = Some(Instant::now());
            }
            (CircuitState::Closed, Outcome::Failure(_)) => {
                let consecutive = self.window.read().consecutive_failures;
                if consecutive >= self.cfg.failure_threshold {
                    self.breaker_state
                        .store(circuit_to_u8(CircuitState::Open), Ordering::Release);
                    *self.opened_at.write() = Some(Instant::now());
                }
            }
            _ => {}
        }
    }

    fn update_health_state(&self, outcome: Outcome) -> Option<(HealthState, HealthState)> {
        let window = self.window.read().clone();
        let total = window.total_requests();
        let breaker_open = self.circuit_state() == CircuitState::Open;
        let just_closed_half_open =
            matches!(outcome, Outcome::Success) && self.circuit_state() == CircuitState::Closed;

        let mut state = self.state.write();
        let from = *state;
        let baseline = (*self.baseline_latency_ms.read()).unwrap_or(window.latency_p50_ms.max(1.0));

        let next = match *state {
            // Quarantined is reachable only from Unhealthy, when its own
            // breaker opens. A breaker tripping early (consecutive
            // failures outrun the rolling window) still only pushes
            // Healthy/Degraded one step down, never straight to
            // Quarantined.
            HealthState::Healthy => {
                if breaker_open
                    || (window.latency_p95_ms > 2.0 * baseline && total >= 10)
                    || (window.failure_ratio() > 0.20 && total >= 10)
                {
                    HealthState::Degraded
                } else {
                    HealthState::Healthy
                }
            }
            HealthState::Degraded => {
                if breaker_open || (window.failure_ratio() > 0.50 && total >= 20) {
                    HealthState::Unhealthy
                } else if window.success_ratio() > 0.95 && total >= 30 {
                    HealthState::Healthy
                } else {
                    HealthState::Degraded
                }
            }
            HealthState::Unhealthy => {
                if breaker_open {
                    HealthState::Quarantined
                } else if window.success_ratio() > 0.95 && total >= 30 {
                    HealthState::Healthy
                } else {
                    HealthState::Unhealthy
                }
            }
            HealthState::Quarantined => {
                if just_closed_half_open {
                    HealthState::Degraded
                } else {
                    HealthState::Quarantined
                }
            }
        };

        if next != from {
            *state = next;
            self.window.write().last_transition_at = Some(Utc::now());
            Some((from, next))
        } else {
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ten_consecutive_timeouts_degrade_then_open_breaker() {
        let health = ProviderHealth::new(BreakerConfig {
            failure_threshold: 5,
            ..Default::default()
        });
        let mut last_transition = None;
        for _ in 0..10 {
            if let Some(t) = health.record(Outcome::Failure(ErrorKind::Timeout), 50) {
                last_transition = Some(t);
            }
        }
        assert_eq!(health.circuit_state(), CircuitState::Open);
        assert_eq!(health.state(), HealthState::Quarantined);
        // Quarantined must be entered from Unhealthy, never straight off
        // Healthy/Degraded, even though the breaker itself opened earlier.
        assert_eq!(
            last_transition,
            Some((HealthState::Unhealthy, HealthState::Quarantined))
        );
    }

    #[test]
    fn open_circuit_rejects_until_cooldown() {
        let health = ProviderHealth::new(BreakerConfig {
            failure_threshold: 1,
            cooldown: Duration::from_millis(0),
            ..Default::default()
        });
        health.record(Outcome::Failure(ErrorKind::ConnectionFailed), 10);
        assert_eq!(health.circuit_state(), CircuitState::Open);
        // cooldown is zero, so the next admission check flips to HalfOpen
        // and admits exactly one trial.
        assert!(health.try_admit());
        assert!(!health.try_admit());
    }

    #[test]
    fn half_open_success_closes_breaker_and_degrades_health() {
        let health = ProviderHealth::new(BreakerConfig {
            failure_threshold: 1,
            cooldown: Duration::from_millis(0),
            ..Default::default()
        });
        health.record(Outcome::Failure(ErrorKind::ConnectionFailed), 10);
        assert!(health.try_admit());
        health.record(Outcome::Success, 10);
        assert_eq!(health.circuit_state(), CircuitState::Closed);
        assert_eq!(health.state(), HealthState::Degraded);
    }
}
