//! [`BreakerRegistry`] – one [`CircuitBreaker`] per dependency name.
//!
//! Breakers are created lazily on first [`get`][BreakerRegistry::get] and live
//! for the lifetime of the registry.  The registry is an explicit value owned
//! by the governance context; there is no process-global instance.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use parking_lot::Mutex;
use tracing::info;
use warden_types::{BreakerState, Clock};

use crate::breaker::{BreakerConfig, BreakerSnapshot, CircuitBreaker};

/// Lazily-populated map of named breakers.
///
/// # Example
///
/// ```
/// use std::sync::Arc;
/// use warden_kernel::breaker::BreakerConfig;
/// use warden_kernel::registry::BreakerRegistry;
/// use warden_types::{BreakerState, SystemClock};
///
/// let registry = BreakerRegistry::new(BreakerConfig::default(), Arc::new(SystemClock));
/// assert_eq!(registry.state_of("llm"), None);
///
/// let breaker = registry.get("llm");
/// assert_eq!(breaker.state(), BreakerState::Closed);
/// assert_eq!(registry.state_of("llm"), Some(BreakerState::Closed));
/// ```
pub struct BreakerRegistry {
    defaults: BreakerConfig,
    overrides: HashMap<String, BreakerConfig>,
    clock: Arc<dyn Clock>,
    breakers: Mutex<HashMap<String, Arc<CircuitBreaker>>>,
}

impl BreakerRegistry {
    pub fn new(defaults: BreakerConfig, clock: Arc<dyn Clock>) -> Self {
        Self {
            defaults,
            overrides: HashMap::new(),
            clock,
            breakers: Mutex::new(HashMap::new()),
        }
    }

    /// Use `config` instead of the defaults for the breaker named `name`.
    /// Only affects breakers not yet created.
    pub fn with_override(mut self, name: impl Into<String>, config: BreakerConfig) -> Self {
        self.overrides.insert(name.into(), config);
        self
    }

    /// Config a breaker named `name` is (or would be) created with.
    pub fn config_for(&self, name: &str) -> BreakerConfig {
        self.overrides.get(name).copied().unwrap_or(self.defaults)
    }

    /// Return the breaker for `name`, creating it on first use.
    pub fn get(&self, name: &str) -> Arc<CircuitBreaker> {
        let mut breakers = self.breakers.lock();
        if let Some(existing) = breakers.get(name) {
            return Arc::clone(existing);
        }
        let breaker = Arc::new(CircuitBreaker::new(
            name,
            self.config_for(name),
            Arc::clone(&self.clock),
        ));
        breakers.insert(name.to_string(), Arc::clone(&breaker));
        info!(breaker = name, "circuit breaker created");
        breaker
    }

    /// Stored state of an existing breaker; `None` if never created.
    pub fn state_of(&self, name: &str) -> Option<BreakerState> {
        let breaker = self.breakers.lock().get(name).cloned();
        breaker.map(|b| b.state())
    }

    /// Like [`state_of`][Self::state_of] but reports `HalfOpen` once an open
    /// breaker's probe deadline has passed.  Never transitions.
    pub fn observed_state_of(&self, name: &str) -> Option<BreakerState> {
        let breaker = self.breakers.lock().get(name).cloned();
        breaker.map(|b| b.observed_state())
    }

    /// Sorted names of every breaker created so far.
    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.breakers.lock().keys().cloned().collect();
        names.sort();
        names
    }

    /// Snapshot of every breaker, keyed by name.
    pub fn snapshot(&self, event_limit: usize) -> BTreeMap<String, BreakerSnapshot> {
        self.all()
            .into_iter()
            .map(|b| (b.name().to_string(), b.snapshot(event_limit)))
            .collect()
    }

    /// Force one breaker closed.  Returns `false` if it does not exist.
    pub fn reset(&self, name: &str) -> bool {
        let breaker = self.breakers.lock().get(name).cloned();
        match breaker {
            Some(b) => {
                b.reset();
                true
            }
            None => false,
        }
    }

    pub fn reset_all(&self) {
        for breaker in self.all() {
            breaker.reset();
        }
    }

    // Clones the handles so per-breaker locks are never taken under the map lock.
    fn all(&self) -> Vec<Arc<CircuitBreaker>> {
        self.breakers.lock().values().cloned().collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use warden_types::ManualClock;

    fn registry() -> BreakerRegistry {
        let defaults = BreakerConfig {
            failure_threshold: 2,
            jitter_max: Duration::ZERO,
            ..BreakerConfig::default()
        };
        BreakerRegistry::new(defaults, Arc::new(ManualClock::new()))
    }

    #[test]
    fn get_returns_same_instance() {
        let r = registry();
        let a = r.get("db");
        let b = r.get("db");
        assert!(Arc::ptr_eq(&a, &b));
        assert_eq!(r.names(), vec!["db".to_string()]);
    }

    #[test]
    fn overrides_apply_per_name() {
        let r = registry().with_override(
            "flaky",
            BreakerConfig {
                failure_threshold: 1,
                jitter_max: Duration::ZERO,
                ..BreakerConfig::default()
            },
        );
        r.get("flaky").acquire().unwrap().failure();
        r.get("steady").acquire().unwrap().failure();
        assert_eq!(r.state_of("flaky"), Some(BreakerState::Open));
        assert_eq!(r.state_of("steady"), Some(BreakerState::Closed));
    }

    #[test]
    fn reset_and_reset_all() {
        let r = registry();
        for name in ["a", "b"] {
            let b = r.get(name);
            b.acquire().unwrap().failure();
            b.acquire().unwrap().failure();
        }
        assert!(r.reset("a"));
        assert!(!r.reset("missing"));
        assert_eq!(r.state_of("a"), Some(BreakerState::Closed));
        assert_eq!(r.state_of("b"), Some(BreakerState::Open));
        r.reset_all();
        assert_eq!(r.state_of("b"), Some(BreakerState::Closed));
    }

    #[test]
    fn observed_state_reports_probe_readiness_without_transition() {
        let clock = Arc::new(ManualClock::new());
        let defaults = BreakerConfig {
            failure_threshold: 1,
            jitter_max: Duration::ZERO,
            ..BreakerConfig::default()
        };
        let r = BreakerRegistry::new(defaults, clock.clone());
        assert_eq!(r.observed_state_of("db"), None);
        r.get("db").acquire().unwrap().failure();
        assert_eq!(r.observed_state_of("db"), Some(BreakerState::Open));
        clock.advance(defaults.recovery_timeout);
        assert_eq!(r.observed_state_of("db"), Some(BreakerState::HalfOpen));
        assert_eq!(r.state_of("db"), Some(BreakerState::Open));
    }

    #[test]
    fn snapshot_covers_every_breaker() {
        let r = registry();
        r.get("x");
        r.get("y").acquire().unwrap().failure();
        let snap = r.snapshot(10);
        assert_eq!(snap.len(), 2);
        assert_eq!(snap["y"].consecutive_failures, 1);
        assert_eq!(snap["x"].counters.calls, 0);
    }
}
