//! 竞争重试
//!
//! 只对 [`CoordinationError::RaceCondition`] 重试，其它错误立即返回。

use std::future::Future;
use std::time::Duration;
use tracing::{debug, warn};

use openclaw_core::{ClaimConfig, CoordinationError, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// 总尝试次数
    pub max_retries: u32,
    pub base_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 3,
            base_delay: Duration::from_millis(100),
        }
    }
}

impl RetryPolicy {
    pub fn new(max_retries: u32, base_delay: Duration) -> Self {
        Self {
            max_retries,
            base_delay,
        }
    }

    /// 第 `attempt` 次失败后的等待时间 (`base_delay * 2^attempt`)
    pub fn delay_for(&self, attempt: u32) -> Duration {
        self.base_delay
            .saturating_mul(2u32.saturating_pow(attempt.min(16)))
    }
}

impl From<&ClaimConfig> for RetryPolicy {
    fn from(config: &ClaimConfig) -> Self {
        Self::new(config.max_retries, config.base_delay())
    }
}

pub async fn retry_on_race<T, F, Fut>(policy: &RetryPolicy, mut op: F) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T>>,
{
    let attempts = policy.max_retries.max(1);
    let mut attempt = 0;

    loop {
        match op().await {
            Err(CoordinationError::RaceCondition(detail)) => {
                attempt += 1;
                if attempt >= attempts {
                    warn!(attempts, "竞争重试次数耗尽: {}", detail);
                    return Err(CoordinationError::RaceCondition(detail));
                }
                let delay = policy.delay_for(attempt - 1);
                debug!(attempt, ?delay, "lost race, backing off: {}", detail);
                tokio::time::sleep(delay).await;
            }
            other => return other,
        }
    }
}
