//! Simulated delivery: random latency plus occasional random failure.
//!
//! Stands in for the real SMS gateway, mail relay and push service so the
//! queue can be exercised end to end without external accounts.

use std::time::Duration;

use rand::Rng;
use tokio_util::sync::CancellationToken;

use courier_common::error::AppError;

/// Latency and failure characteristics of a simulated channel.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SimulationProfile {
    /// Lower bound of the simulated send latency in milliseconds.
    pub min_delay_ms: u64,
    /// Upper bound (inclusive) of the simulated send latency in milliseconds.
    pub max_delay_ms: u64,
    /// Fail one attempt in N on average. `None` never fails.
    pub failure_one_in: Option<u32>,
    /// Reason reported when a simulated failure fires.
    pub failure_reason: &'static str,
}

impl SimulationProfile {
    /// 100–500 ms, 1 in 10 attempts fail.
    pub fn sms() -> Self {
        Self {
            min_delay_ms: 100,
            max_delay_ms: 500,
            failure_one_in: Some(10),
            failure_reason: "SMS delivery failed - network timeout",
        }
    }

    /// 200–800 ms, 1 in 20 attempts fail.
    pub fn email() -> Self {
        Self {
            min_delay_ms: 200,
            max_delay_ms: 800,
            failure_one_in: Some(20),
            failure_reason: "Email delivery failed - recipient server unavailable",
        }
    }

    /// 150–600 ms, 1 in 12 attempts fail.
    pub fn push() -> Self {
        Self {
            min_delay_ms: 150,
            max_delay_ms: 600,
            failure_one_in: Some(12),
            failure_reason: "Push notification failed - device token invalid",
        }
    }

    /// No latency and no failures.
    pub fn instant() -> Self {
        Self {
            min_delay_ms: 0,
            max_delay_ms: 0,
            failure_one_in: None,
            failure_reason: "simulated failure",
        }
    }

    pub fn without_failures(mut self) -> Self {
        self.failure_one_in = None;
        self
    }

    /// Every attempt fails with this profile's reason.
    pub fn always_failing(mut self) -> Self {
        self.failure_one_in = Some(1);
        self
    }

    /// Sleep for a random latency, then roll for failure.
    ///
    /// Returns `AppError::Handler` when the roll fails or when `cancel`
    /// fires before the simulated send finishes.
    pub async fn simulate(&self, cancel: &CancellationToken) -> Result<(), AppError> {
        let (delay, fails) = {
            let mut rng = rand::thread_rng();
            let delay_ms = if self.max_delay_ms > self.min_delay_ms {
                rng.gen_range(self.min_delay_ms..=self.max_delay_ms)
            } else {
                self.min_delay_ms
            };
            let fails = match self.failure_one_in {
                Some(n) if n > 0 => rng.gen_range(1..=n) == 1,
                _ => false,
            };
            (Duration::from_millis(delay_ms), fails)
        };

        tokio::select! {
            _ = cancel.cancelled() => {
                return Err(AppError::Handler("delivery cancelled".to_string()));
            }
            _ = tokio::time::sleep(delay) => {}
        }

        if fails {
            return Err(AppError::Handler(self.failure_reason.to_string()));
        }

        Ok(())
    }
}
