//! Resilience patterns for directory calls.
//!
//! Provides the exponential backoff schedule and a circuit breaker shared by
//! all account processors of an engine.

use std::fmt;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::time::Instant;
use tracing::{debug, warn};

use crate::config::RetryPolicy;

/// Delay to wait after failed attempt number `attempt` (1-based).
///
/// `min(base_delay * backoff_base^(attempt - 1), max_delay)`.
pub fn backoff_delay(policy: &RetryPolicy, attempt: u32) -> Duration {
    let exponent = i32::try_from(attempt.saturating_sub(1)).unwrap_or(i32::MAX);
    let base_ns = policy.base_delay.as_nanos() as f64;
    let delay_ns = base_ns * policy.backoff_base.powi(exponent);
    let max_ns = policy.max_delay.as_nanos() as f64;

    if !delay_ns.is_finite() || delay_ns >= max_ns {
        policy.max_delay
    } else {
        Duration::from_nanos(delay_ns.round() as u64)
    }
}

/// State of a circuit breaker.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CircuitState {
    /// Calls are processed normally.
    #[default]
    Closed,
    /// Calls are rejected.
    Open,
    /// Probe calls are allowed.
    HalfOpen,
}

impl CircuitState {
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            CircuitState::Closed => "closed",
            CircuitState::Open => "open",
            CircuitState::HalfOpen => "half_open",
        }
    }

    /// Check if calls should be allowed through.
    #[must_use]
    pub fn allows_operations(&self) -> bool {
        matches!(self, CircuitState::Closed | CircuitState::HalfOpen)
    }
}

impl fmt::Display for CircuitState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Configuration for circuit breaker behavior.
#[derive(Debug, Clone)]
pub struct CircuitBreakerConfig {
    /// Number of consecutive transient failures before opening the circuit.
    pub failure_threshold: u32,
    /// Duration the circuit stays open before transitioning to half-open.
    pub open_duration: Duration,
    /// Number of successful probes required to close the circuit.
    pub success_threshold: u32,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            open_duration: Duration::from_secs(30),
            success_threshold: 2,
        }
    }
}

#[derive(Debug, Default)]
struct BreakerState {
    state: CircuitState,
    failure_count: u32,
    success_count: u32,
    opened_at: Option<Instant>,
}

/// Circuit breaker guarding the account directory.
///
/// Opens after repeated transient failures so that a struggling provider is
/// not hammered by every target in a fan-out.
#[derive(Debug)]
pub struct CircuitBreaker {
    config: CircuitBreakerConfig,
    inner: Mutex<BreakerState>,
}

impl CircuitBreaker {
    /// Create a new circuit breaker with the given configuration.
    #[must_use]
    pub fn new(config: CircuitBreakerConfig) -> Self {
        Self {
            config,
            inner: Mutex::new(BreakerState::default()),
        }
    }

    /// Create a new circuit breaker with default configuration.
    #[must_use]
    pub fn with_defaults() -> Self {
        Self::new(CircuitBreakerConfig::default())
    }

    /// Get the current circuit state.
    pub async fn state(&self) -> CircuitState {
        let mut inner = self.inner.lock().await;
        self.maybe_half_open(&mut inner);
        inner.state
    }

    /// Check if calls are currently allowed.
    pub async fn is_allowed(&self) -> bool {
        self.state().await.allows_operations()
    }

    /// Record a successful call.
    pub async fn record_success(&self) {
        let mut inner = self.inner.lock().await;
        match inner.state {
            CircuitState::Closed => inner.failure_count = 0,
            CircuitState::HalfOpen => {
                inner.success_count += 1;
                if inner.success_count >= self.config.success_threshold {
                    debug!(
                        successes = inner.success_count,
                        "Circuit breaker transitioning to CLOSED"
                    );
                    *inner = BreakerState::default();
                }
            }
            CircuitState::Open => {}
        }
    }

    /// Record a transient failure.
    pub async fn record_failure(&self) {
        let mut inner = self.inner.lock().await;
        match inner.state {
            CircuitState::Closed => {
                inner.failure_count += 1;
                if inner.failure_count >= self.config.failure_threshold {
                    warn!(
                        failures = inner.failure_count,
                        "Circuit breaker transitioning to OPEN"
                    );
                    inner.state = CircuitState::Open;
                    inner.opened_at = Some(Instant::now());
                }
            }
            CircuitState::HalfOpen => {
                warn!("Circuit breaker transitioning back to OPEN after probe failure");
                inner.state = CircuitState::Open;
                inner.success_count = 0;
                inner.opened_at = Some(Instant::now());
            }
            CircuitState::Open => inner.opened_at = Some(Instant::now()),
        }
    }

    /// Reset the circuit breaker to closed state.
    pub async fn reset(&self) {
        *self.inner.lock().await = BreakerState::default();
    }

    fn maybe_half_open(&self, inner: &mut BreakerState) {
        if inner.state != CircuitState::Open {
            return;
        }
        let elapsed = inner.opened_at.map(|t| t.elapsed()).unwrap_or_default();
        if elapsed >= self.config.open_duration {
            debug!("Circuit breaker transitioning to HALF_OPEN");
            inner.state = CircuitState::HalfOpen;
            inner.success_count = 0;
        }
    }
}
