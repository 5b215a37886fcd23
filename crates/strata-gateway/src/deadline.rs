use std::sync::TryLockResult;
use std::thread;
use std::time::{Duration, Instant};

use crate::error::{GatewayError, GatewayResult};

/// Interval between lock acquisition attempts.
const LOCK_POLL: Duration = Duration::from_millis(1);

/// Point in time by which a gateway call must finish.
#[derive(Clone, Copy, Debug)]
pub struct Deadline {
    started: Instant,
    budget: Option<Duration>,
}

impl Deadline {
    /// A deadline `budget` from now.
    pub fn after(budget: Duration) -> Self {
        Self {
            started: Instant::now(),
            budget: Some(budget),
        }
    }

    /// A deadline that never expires.
    pub fn unbounded() -> Self {
        Self {
            started: Instant::now(),
            budget: None,
        }
    }

    /// The total budget, or `None` when unbounded.
    pub fn budget(&self) -> Option<Duration> {
        self.budget
    }

    /// Time left, or `None` when unbounded. Zero once expired.
    pub fn remaining(&self) -> Option<Duration> {
        self.budget
            .map(|budget| budget.saturating_sub(self.started.elapsed()))
    }

    /// Returns `true` once the budget is spent.
    pub fn is_expired(&self) -> bool {
        self.remaining().is_some_and(|left| left.is_zero())
    }

    /// Fail with [`GatewayError::Timeout`] if the deadline has passed.
    pub fn check(&self) -> GatewayResult<()> {
        if self.is_expired() {
            return Err(self.timeout());
        }
        Ok(())
    }

    /// The timeout error for this deadline.
    pub fn timeout(&self) -> GatewayError {
        GatewayError::Timeout {
            budget: self.budget.unwrap_or_default(),
        }
    }

    /// Poll `try_lock` until it yields a guard or the deadline passes.
    pub(crate) fn acquire<G>(
        &self,
        mut try_lock: impl FnMut() -> TryLockResult<G>,
    ) -> GatewayResult<G> {
        loop {
            match try_lock() {
                Ok(guard) => return Ok(guard),
                Err(std::sync::TryLockError::Poisoned(e)) => {
                    return Err(GatewayError::Poisoned(e.to_string()));
                }
                Err(std::sync::TryLockError::WouldBlock) => {
                    self.check()?;
                    thread::sleep(LOCK_POLL);
                }
            }
        }
    }
}
