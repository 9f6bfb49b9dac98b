//! Policy-based retry with exponential backoff. The
//! orchestrator wraps a fallible async operation; it only retries errors
//! the operation itself reports as recoverable, consulting a per-category
//! policy table populated with sane defaults at construction.

use std::collections::HashMap;
use std::future::Future;
use std::time::Duration;

use bldr_core::{Error, ErrorCategory};
use rand::Rng;

#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub initial_delay: Duration,
    pub max_delay: Duration,
    pub multiplier: f64,
    pub jitter_ratio: f64,
}

impl RetryPolicy {
    pub fn no_retry() -> Self {
        RetryPolicy {
            max_attempts: 1,
            initial_delay: Duration::ZERO,
            max_delay: Duration::ZERO,
            multiplier: 1.0,
            jitter_ratio: 0.0,
        }
    }

    /// Delay before attempt `n` (`n >= 1`); attempt 0 has no delay.
    fn delay_for_attempt(&self, n: u32, jitter_sample: f64) -> Duration {
        if n == 0 {
            return Duration::ZERO;
        }
        let base = self.initial_delay.as_secs_f64() * self.multiplier.powi(n as i32 - 1);
        let capped = base.min(self.max_delay.as_secs_f64());
        let jitter = 1.0 - self.jitter_ratio + jitter_sample * (2.0 * self.jitter_ratio);
        Duration::from_secs_f64((capped * jitter).max(0.0))
    }
}

/// Default per-category attempt budgets: System and Network
/// get 5 attempts, Resource 3, Environment 2, Build 1 (compile errors never
/// retry). Config and Integrity are not in the table: both are unrecoverable
/// so `is_recoverable()` short-circuits before the policy lookup matters.
pub fn default_policy_table() -> HashMap<ErrorCategory, RetryPolicy> {
    let mut table = HashMap::new();
    table.insert(
        ErrorCategory::System,
        RetryPolicy {
            max_attempts: 5,
            initial_delay: Duration::from_millis(100),
            max_delay: Duration::from_secs(10),
            multiplier: 2.0,
            jitter_ratio: 0.2,
        },
    );
    table.insert(
        ErrorCategory::Network,
        RetryPolicy {
            max_attempts: 5,
            initial_delay: Duration::from_millis(200),
            max_delay: Duration::from_secs(15),
            multiplier: 2.0,
            jitter_ratio: 0.3,
        },
    );
    table.insert(
        ErrorCategory::Resource,
        RetryPolicy {
            max_attempts: 3,
            initial_delay: Duration::from_millis(500),
            max_delay: Duration::from_secs(20),
            multiplier: 2.0,
            jitter_ratio: 0.1,
        },
    );
    table.insert(
        ErrorCategory::Environment,
        RetryPolicy {
            max_attempts: 2,
            initial_delay: Duration::from_millis(100),
            max_delay: Duration::from_secs(5),
            multiplier: 1.5,
            jitter_ratio: 0.1,
        },
    );
    table.insert(ErrorCategory::Build, RetryPolicy::no_retry());
    table
}

#[derive(Debug, Default, Clone, Copy)]
pub struct CategoryStats {
    pub total: u64,
    pub successful: u64,
    pub failed: u64,
}

#[derive(Default)]
pub struct RetryStats {
    per_category: HashMap<ErrorCategory, CategoryStats>,
}

impl RetryStats {
    pub fn for_category(&self, category: ErrorCategory) -> CategoryStats {
        self.per_category.get(&category).copied().unwrap_or_default()
    }

    fn record(&mut self, category: ErrorCategory, succeeded: bool) {
        let entry = self.per_category.entry(category).or_default();
        entry.total += 1;
        if succeeded {
            entry.successful += 1;
        } else {
            entry.failed += 1;
        }
    }
}

pub struct RetryOrchestrator {
    policies: HashMap<ErrorCategory, RetryPolicy>,
    stats: parking_lot::Mutex<RetryStats>,
}

impl Default for RetryOrchestrator {
    fn default() -> Self {
        RetryOrchestrator {
            policies: default_policy_table(),
            stats: parking_lot::Mutex::new(RetryStats::default()),
        }
    }
}

impl RetryOrchestrator {
    pub fn new(policies: HashMap<ErrorCategory, RetryPolicy>) -> Self {
        RetryOrchestrator {
            policies,
            stats: parking_lot::Mutex::new(RetryStats::default()),
        }
    }

    pub fn policy_for(&self, category: ErrorCategory) -> RetryPolicy {
        self.policies
            .get(&category)
            .copied()
            .unwrap_or_else(RetryPolicy::no_retry)
    }

    pub fn stats_for(&self, category: ErrorCategory) -> CategoryStats {
        self.stats.lock().for_category(category)
    }

    /// Runs `op` up to its category's `max_attempts`, sleeping between
    /// attempts per the backoff formula. Stops immediately on an
    /// unrecoverable error.
    pub async fn run<T, F, Fut>(&self, mut op: F) -> Result<T, Error>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, Error>>,
    {
        let mut last_err: Option<Error> = None;
        let mut category: Option<ErrorCategory> = None;
        let mut attempt = 0u32;

        loop {
            if attempt > 0 {
                let policy = category
                    .map(|c| self.policy_for(c))
                    .unwrap_or_else(RetryPolicy::no_retry);
                let jitter_sample = rand::thread_rng().gen::<f64>();
                let delay = policy.delay_for_attempt(attempt, jitter_sample);
                if !delay.is_zero() {
                    tokio::time::sleep(delay).await;
                }
            }

            match op().await {
                Ok(value) => {
                    if let Some(c) = category {
                        self.stats.lock().record(c, true);
                    }
                    return Ok(value);
                }
                Err(err) => {
                    let c = err.category();
                    category = Some(c);
                    if !err.is_recoverable() {
                        self.stats.lock().record(c, false);
                        return Err(err);
                    }
                    let max_attempts = self.policy_for(c).max_attempts;
                    last_err = Some(err);
                    attempt += 1;
                    if attempt >= max_attempts {
                        self.stats.lock().record(c, false);
                        return Err(last_err.unwrap());
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    #[tokio::test]
    async fn succeeds_without_retry() {
        let orchestrator = RetryOrchestrator::default();
        let result: Result<u32, Error> = orchestrator.run(|| async { Ok(42) }).await;
        assert_eq!(result.unwrap(), 42);
    }

    #[tokio::test]
    async fn retries_recoverable_then_succeeds() {
        let orchestrator = RetryOrchestrator::default();
        let calls = AtomicU32::new(0);
        let result = orchestrator
            .run(|| async {
                let n = calls.fetch_add(1, Ordering::SeqCst);
                if n < 2 {
                    Err(Error::System("transient".to_string()))
                } else {
                    Ok(n)
                }
            })
            .await;
        assert_eq!(result.unwrap(), 2);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn never_retries_build_errors() {
        let orchestrator = RetryOrchestrator::default();
        let calls = AtomicU32::new(0);
        let result: Result<(), Error> = orchestrator
            .run(|| async {
                calls.fetch_add(1, Ordering::SeqCst);
                Err(Error::Build("compile error".to_string()))
            })
            .await;
        assert!(result.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn never_retries_unrecoverable_config_error() {
        let orchestrator = RetryOrchestrator::default();
        let calls = AtomicU32::new(0);
        let result: Result<(), Error> = orchestrator
            .run(|| async {
                calls.fetch_add(1, Ordering::SeqCst);
                Err(Error::Config("bad config".to_string()))
            })
            .await;
        assert!(result.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn delay_grows_with_multiplier_and_caps() {
        let policy = RetryPolicy {
            max_attempts: 5,
            initial_delay: Duration::from_millis(100),
            max_delay: Duration::from_secs(1),
            multiplier: 2.0,
            jitter_ratio: 0.0,
        };
        assert_eq!(policy.delay_for_attempt(0, 0.5), Duration::ZERO);
        assert_eq!(policy.delay_for_attempt(1, 0.5), Duration::from_millis(100));
        assert_eq!(policy.delay_for_attempt(2, 0.5), Duration::from_millis(200));
        assert_eq!(policy.delay_for_attempt(10, 0.5), Duration::from_secs(1));
    }
}
