//! 有界重试组合子
//!
//! `max_attempts` 是硬上限：第 N 次失败后立即返回，绝不进行第 N+1 次尝试，
//! 最后一次失败之后也不再等待

use std::future::Future;
use std::time::Duration;

/// 重试耗尽
#[derive(Debug)]
pub struct RetryError<E> {
    /// 实际尝试次数
    pub attempts: u32,
    /// 最后一次失败
    pub last_error: E,
}

impl<E: std::fmt::Display> std::fmt::Display for RetryError<E> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "gave up after {} attempts: {}",
            self.attempts, self.last_error
        )
    }
}

impl<E: std::fmt::Debug + std::fmt::Display> std::error::Error for RetryError<E> {}

/// 重试成功时附带尝试次数
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Attempted<T> {
    pub value: T,
    pub attempts: u32,
}

/// 按固定间隔重试异步操作
///
/// 操作闭包接收当前尝试序号（从 1 开始）。`max_attempts` 为 0 时按 1 处理
pub async fn retry<T, E, F, Fut>(
    max_attempts: u32,
    interval: Duration,
    mut operation: F,
) -> Result<Attempted<T>, RetryError<E>>
where
    F: FnMut(u32) -> Fut,
    Fut: Future<Output = Result<T, E>>,
{
    let max_attempts = max_attempts.max(1);
    let mut attempt = 1;
    loop {
        match operation(attempt).await {
            Ok(value) => {
                return Ok(Attempted {
                    value,
                    attempts: attempt,
                })
            }
            Err(e) if attempt >= max_attempts => {
                return Err(RetryError {
                    attempts: attempt,
                    last_error: e,
                })
            }
            Err(_) => {
                tokio::time::sleep(interval).await;
                attempt += 1;
            }
        }
    }
}
