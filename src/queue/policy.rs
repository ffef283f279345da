use std::time::Duration;

use uuid::Uuid;

use crate::config::env_or;
use crate::errors::AppError;
use crate::models::supplier::SupplierCategory;

/// Dispatch priority; lower runs sooner.
pub fn priority_for(category: SupplierCategory) -> i64 {
    match category {
        SupplierCategory::Infrastructure => 1,
        SupplierCategory::Saas => 5,
        SupplierCategory::Consulting | SupplierCategory::Other => 10,
    }
}

pub fn job_id(supplier_id: Uuid, enqueued_at_millis: i64) -> String {
    format!("risk-analysis-{supplier_id}-{enqueued_at_millis}")
}

/// Exponential backoff: `base * multiplier^(attempt - 1)`, capped at `max_delay`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub base_delay: Duration,
    pub multiplier: u32,
    pub max_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay: Duration::from_secs(1),
            multiplier: 5,
            max_delay: Duration::from_secs(15),
        }
    }
}

impl RetryPolicy {
    /// Delay before the attempt following failed attempt number `attempt` (1-based).
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1);
        let factor = self.multiplier.checked_pow(exponent).unwrap_or(u32::MAX);
        self.base_delay
            .checked_mul(factor)
            .unwrap_or(self.max_delay)
            .min(self.max_delay)
    }

    /// No waiting between attempts.
    pub fn immediate(max_attempts: u32) -> Self {
        Self {
            max_attempts,
            base_delay: Duration::ZERO,
            multiplier: 1,
            max_delay: Duration::ZERO,
        }
    }
}

/// How long finished jobs are kept.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetentionPolicy {
    pub completed_max_age: Duration,
    pub completed_max_count: u32,
    pub failed_max_age: Duration,
}

impl Default for RetentionPolicy {
    fn default() -> Self {
        Self {
            completed_max_age: Duration::from_secs(24 * 60 * 60),
            completed_max_count: 1000,
            failed_max_age: Duration::from_secs(7 * 24 * 60 * 60),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QueueConfig {
    pub retry: RetryPolicy,
    pub retention: RetentionPolicy,
    /// An active job whose lease is older than this is considered abandoned.
    pub lease_timeout: Duration,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            retry: RetryPolicy::default(),
            retention: RetentionPolicy::default(),
            lease_timeout: Duration::from_secs(10 * 60),
        }
    }
}

impl QueueConfig {
    pub fn from_env() -> Result<Self, AppError> {
        let defaults = QueueConfig::default();

        let max_attempts: u32 = env_or("QUEUE_MAX_ATTEMPTS", defaults.retry.max_attempts)?;
        if max_attempts == 0 {
            return Err(AppError::configuration("QUEUE_MAX_ATTEMPTS must be at least 1"));
        }
        let base_ms: u64 = env_or("QUEUE_BACKOFF_BASE_MS", 1_000)?;
        let max_ms: u64 = env_or("QUEUE_BACKOFF_MAX_MS", 15_000)?;
        let lease_secs: u64 = env_or("QUEUE_LEASE_TIMEOUT_SECS", defaults.lease_timeout.as_secs())?;

        Ok(Self {
            retry: RetryPolicy {
                max_attempts,
                base_delay: Duration::from_millis(base_ms),
                max_delay: Duration::from_millis(max_ms),
                ..defaults.retry
            },
            retention: defaults.retention,
            lease_timeout: Duration::from_secs(lease_secs),
        })
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn infrastructure_before_saas_before_everything_else() {
        assert!(priority_for(SupplierCategory::Infrastructure) < priority_for(SupplierCategory::Saas));
        assert!(priority_for(SupplierCategory::Saas) < priority_for(SupplierCategory::Consulting));
        assert_eq!(
            priority_for(SupplierCategory::Consulting),
            priority_for(SupplierCategory::Other)
        );
    }

    #[test]
    fn default_backoff_is_one_five_fifteen_seconds() {
        let policy = RetryPolicy::default();
        assert_eq!(policy.delay_for(1), Duration::from_secs(1));
        assert_eq!(policy.delay_for(2), Duration::from_secs(5));
        assert_eq!(policy.delay_for(3), Duration::from_secs(15));
        assert_eq!(policy.delay_for(40), Duration::from_secs(15));
    }

    #[test]
    fn immediate_policy_never_waits() {
        let policy = RetryPolicy::immediate(3);
        assert_eq!(policy.delay_for(1), Duration::ZERO);
        assert_eq!(policy.delay_for(3), Duration::ZERO);
    }

    #[test]
    fn job_id_embeds_supplier_and_time() {
        let supplier = Uuid::nil();
        assert_eq!(
            job_id(supplier, 1_700_000_000_123),
            "risk-analysis-00000000-0000-0000-0000-000000000000-1700000000123"
        );
    }

    #[test]
    fn retention_defaults() {
        let retention = RetentionPolicy::default();
        assert_eq!(retention.completed_max_age, Duration::from_secs(86_400));
        assert_eq!(retention.completed_max_count, 1000);
        assert_eq!(retention.failed_max_age, Duration::from_secs(604_800));
    }
}
