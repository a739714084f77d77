// 有限次数重试
// 固定间隔，不做指数退避

use std::future::Future;
use std::time::Duration;

use tracing::{debug, warn};

use super::error::SshError;

/// 默认最大尝试次数
pub const DEFAULT_MAX_ATTEMPTS: u32 = 3;
/// 默认重试间隔（秒）
pub const DEFAULT_RETRY_DELAY_SECS: u64 = 10;

/// 重试策略
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RetryPolicy {
    /// 最大尝试次数（0 视为 1）
    pub max_attempts: u32,
    /// 两次尝试之间的间隔
    pub delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            delay: Duration::from_secs(DEFAULT_RETRY_DELAY_SECS),
        }
    }
}

impl RetryPolicy {
    /// 不重试，只尝试一次
    pub fn once() -> Self {
        Self {
            max_attempts: 1,
            delay: Duration::ZERO,
        }
    }

    fn attempts(&self) -> u32 {
        self.max_attempts.max(1)
    }
}

/// 重试耗尽
#[derive(Debug)]
pub struct RetryExhausted {
    /// 实际尝试次数
    pub attempts: u32,
    /// 最后一次失败原因
    pub last_error: SshError,
}

/// 执行操作，失败后等待固定间隔再试，直到成功或次数用完
pub async fn retry<T, F, Fut>(
    policy: &RetryPolicy,
    operation: &str,
    mut attempt_fn: F,
) -> Result<T, RetryExhausted>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, SshError>>,
{
    let max_attempts = policy.attempts();
    let mut attempt = 1u32;

    loop {
        debug!("[SSH] {} attempt {}/{}", operation, attempt, max_attempts);

        match attempt_fn().await {
            Ok(value) => return Ok(value),
            Err(e) if attempt < max_attempts => {
                warn!(
                    "[SSH] {} attempt {}/{} failed: {}",
                    operation, attempt, max_attempts, e
                );
                tokio::time::sleep(policy.delay).await;
                attempt += 1;
            }
            Err(e) => {
                warn!(
                    "[SSH] {} failed after {} attempt(s): {}",
                    operation, attempt, e
                );
                return Err(RetryExhausted {
                    attempts: attempt,
                    last_error: e,
                });
            }
        }
    }
}
