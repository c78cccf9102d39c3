//! 有上限的狀態輪詢，以及取消與期限控制。

use std::{
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    },
    thread,
    time::{Duration, Instant},
};

use crate::error::{AcmeError, Result};

/// 輪詢間隔與次數上限。第 n 次等待為 `interval * backoff_factor^n`，不超過 `max_interval`。
#[derive(Debug, Clone, PartialEq)]
pub struct PollPolicy {
    pub interval: Duration,
    pub max_interval: Duration,
    pub backoff_factor: f64,
    pub max_attempts: u32,
}

impl Default for PollPolicy {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(2),
            max_interval: Duration::from_secs(30),
            backoff_factor: 2.0,
            max_attempts: 20,
        }
    }
}

impl PollPolicy {
    /// 伺服器 `Retry-After` 可把單次等待拉長到的上限。
    pub const MAX_RETRY_AFTER: Duration = Duration::from_secs(600);

    /// 固定間隔、不退避。
    pub fn fixed(interval: Duration, max_attempts: u32) -> Self {
        Self {
            interval,
            max_interval: interval,
            backoff_factor: 1.0,
            max_attempts,
        }
    }

    /// 第 `attempt` 次檢查之後應等待的時間。
    ///
    /// 伺服器給的 `Retry-After` 只會拉長等待，且不超過 [`Self::MAX_RETRY_AFTER`]。
    pub fn delay_for(&self, attempt: u32, retry_after: Option<u64>) -> Duration {
        let factor = self.backoff_factor.max(1.0).powi(attempt.min(32) as i32);
        let secs = (self.interval.as_secs_f64() * factor).min(self.max_interval.as_secs_f64());
        let backoff = Duration::try_from_secs_f64(secs)
            .unwrap_or(self.max_interval)
            .min(self.max_interval);
        match retry_after {
            Some(secs) => backoff.max(Duration::from_secs(secs).min(Self::MAX_RETRY_AFTER)),
            None => backoff,
        }
    }
}

/// 可跨執行緒共用的取消旗標。
#[derive(Debug, Clone, Default)]
pub struct Cancellation(Arc<AtomicBool>);

impl Cancellation {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// 取消旗標加上可選的絕對期限，所有等待點都會檢查。
#[derive(Debug, Clone, Default)]
pub struct Interrupt {
    cancellation: Cancellation,
    deadline: Option<Instant>,
}

impl Interrupt {
    const SLICE: Duration = Duration::from_millis(100);

    pub fn new(cancellation: Cancellation, deadline: Option<Instant>) -> Self {
        Self {
            cancellation,
            deadline,
        }
    }

    pub fn cancellation(&self) -> &Cancellation {
        &self.cancellation
    }

    pub fn set_deadline(&mut self, deadline: Option<Instant>) {
        self.deadline = deadline;
    }

    pub fn check(&self) -> Result<()> {
        if self.cancellation.is_cancelled() {
            return Err(AcmeError::Cancelled);
        }
        if self.deadline.is_some_and(|deadline| Instant::now() >= deadline) {
            return Err(AcmeError::DeadlineExceeded);
        }
        Ok(())
    }

    /// 分段睡眠，期間一旦取消或超過期限立即返回錯誤。
    ///
    /// 時間長到無法表示時，視為一直睡到取消或期限為止。
    pub fn sleep(&self, duration: Duration) -> Result<()> {
        let until = Instant::now().checked_add(duration);
        loop {
            self.check()?;
            let now = Instant::now();
            let mut slice = Self::SLICE;
            if let Some(until) = until {
                if now >= until {
                    return Ok(());
                }
                slice = slice.min(until - now);
            }
            if let Some(deadline) = self.deadline {
                slice = slice.min(deadline.saturating_duration_since(now));
            }
            thread::sleep(slice);
        }
    }
}

/// 單次檢查的結果。
#[derive(Debug)]
pub enum PollStep<T> {
    Done(T),
    Pending { retry_after: Option<u64> },
}

/// 反覆呼叫 `check_once` 直到完成、出錯、取消或次數用盡。
///
/// `check_once` 的錯誤（例如終止狀態 `invalid`）會直接回傳，不會重試。
pub fn poll_until<T, F>(policy: &PollPolicy, interrupt: &Interrupt, url: &str, mut check_once: F) -> Result<T>
where
    F: FnMut(u32) -> Result<PollStep<T>>,
{
    let attempts = policy.max_attempts.max(1);
    for attempt in 0..attempts {
        interrupt.check()?;
        match check_once(attempt)? {
            PollStep::Done(value) => return Ok(value),
            PollStep::Pending { retry_after } => {
                if attempt + 1 < attempts {
                    interrupt.sleep(policy.delay_for(attempt, retry_after))?;
                }
            }
        }
    }
    Err(AcmeError::PollExhausted {
        url: url.to_string(),
        attempts,
    })
}
