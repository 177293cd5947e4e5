//! Error injection framework for the mock collaborators.
//!
//! Every fallible mock operation calls [`ErrorConfig::check_operation`] with a
//! static operation name (`"lock"`, `"lock_ycbcr"`, `"import_fence"`,
//! `"flush"`, `"shutdown"`, ...). Scenarios decide deterministically whether the
//! call fails; failure rates decide randomly, from a seedable RNG.

use emucam_core::{HalError, HalResult};
use parking_lot::Mutex;
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use std::collections::HashMap;
use std::sync::Arc;

/// Error injection configuration shared by clones.
#[derive(Clone, Debug)]
pub struct ErrorConfig {
    /// Per-operation failure rate (0.0 to 1.0); `"*"` applies to every operation
    failure_rates: Arc<HashMap<&'static str, f64>>,
    /// Deterministic failure scenarios
    scenarios: Arc<Vec<ErrorScenario>>,
    /// Decides failure-rate draws; seeded for reproducible runs
    rng: Arc<Mutex<ChaCha8Rng>>,
    /// Per-operation call counters
    counts: Arc<Mutex<HashMap<&'static str, u32>>>,
}

/// A deterministic failure scenario.
#[derive(Debug, Clone)]
pub enum ErrorScenario {
    /// Every call of the operation fails
    AlwaysFail {
        /// Operation name.
        operation: &'static str,
    },
    /// Fail after N successful calls of the operation
    FailAfterN {
        /// Operation name.
        operation: &'static str,
        /// Successful calls before failures start.
        count: u32,
    },
    /// Only the Nth call (1-based) of the operation fails
    FailOnNth {
        /// Operation name.
        operation: &'static str,
        /// Failing call.
        n: u32,
    },
}

impl ErrorScenario {
    fn operation(&self) -> &'static str {
        match self {
            ErrorScenario::AlwaysFail { operation }
            | ErrorScenario::FailAfterN { operation, .. }
            | ErrorScenario::FailOnNth { operation, .. } => operation,
        }
    }
}

impl ErrorConfig {
    /// No injected errors.
    pub fn none() -> Self {
        Self::build(HashMap::new(), Vec::new(), None)
    }

    /// Uniform random failures across all operations.
    pub fn random_failures(rate: f64) -> Self {
        Self::random_failures_seeded(rate, None)
    }

    /// Uniform random failures with a fixed seed.
    pub fn random_failures_seeded(rate: f64, seed: Option<u64>) -> Self {
        let mut rates = HashMap::new();
        rates.insert("*", rate);
        Self::build(rates, Vec::new(), seed)
    }

    /// Random failures for specific operations only.
    pub fn with_rates(rates: HashMap<&'static str, f64>, seed: Option<u64>) -> Self {
        Self::build(rates, Vec::new(), seed)
    }

    /// A single scenario.
    pub fn scenario(scenario: ErrorScenario) -> Self {
        Self::scenarios(vec![scenario])
    }

    /// Several scenarios.
    pub fn scenarios(scenarios: Vec<ErrorScenario>) -> Self {
        Self::build(HashMap::new(), scenarios, None)
    }

    fn build(
        failure_rates: HashMap<&'static str, f64>,
        scenarios: Vec<ErrorScenario>,
        seed: Option<u64>,
    ) -> Self {
        Self {
            failure_rates: Arc::new(failure_rates),
            scenarios: Arc::new(scenarios),
            rng: Arc::new(Mutex::new(match seed {
                Some(seed) => ChaCha8Rng::seed_from_u64(seed),
                None => ChaCha8Rng::from_entropy(),
            })),
            counts: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    /// Check whether `operation` of `component` should fail.
    pub fn check_operation(&self, component: &str, operation: &'static str) -> HalResult<()> {
        let call = {
            let mut counts = self.counts.lock();
            let count = counts.entry(operation).or_insert(0);
            *count += 1;
            *count
        };

        for scenario in self.scenarios.iter().filter(|s| s.operation() == operation) {
            let fails = match scenario {
                ErrorScenario::AlwaysFail { .. } => true,
                ErrorScenario::FailAfterN { count, .. } => call > *count,
                ErrorScenario::FailOnNth { n, .. } => call == *n,
            };
            if fails {
                return Err(injected(component, operation, call));
            }
        }

        let rate = self
            .failure_rates
            .get(operation)
            .or_else(|| self.failure_rates.get("*"))
            .copied()
            .unwrap_or(0.0);

        if rate > 0.0 && (rate >= 1.0 || self.rng.lock().gen::<f64>() < rate) {
            return Err(injected(component, operation, call));
        }

        Ok(())
    }

    /// Number of times `operation` has been checked.
    pub fn call_count(&self, operation: &'static str) -> u32 {
        self.counts.lock().get(operation).copied().unwrap_or(0)
    }

    /// Reset call counters.
    pub fn reset(&self) {
        self.counts.lock().clear();
    }
}

impl Default for ErrorConfig {
    fn default() -> Self {
        Self::none()
    }
}

fn injected(component: &str, operation: &str, call: u32) -> HalError {
    let message = format!("{component}: injected failure on '{operation}' (call {call})");
    match operation {
        "lock" | "lock_ycbcr" | "import_fence" => HalError::Import(message),
        _ => HalError::Sensor(message),
    }
}
