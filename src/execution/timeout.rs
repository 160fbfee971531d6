//! Per-call execution deadlines.
//!
//! A [`Deadline`] is checked cooperatively by the interpreter on every
//! statement, expression and loop iteration, so each guarded call carries
//! its own budget and nested or concurrent guards never interfere.

use std::fmt;
use std::sync::Arc;
use std::time::{Duration, Instant};

use thiserror::Error;

/// Budget for running a generated program.
pub const DEFAULT_EXECUTION_TIMEOUT: Duration = Duration::from_secs(10);
/// Budget for evaluating a single answer expression.
pub const DEFAULT_GUARD_TIMEOUT: Duration = Duration::from_secs(1);

/// Source of the current time. Injectable so deadlines can be tested
/// without sleeping.
pub trait Clock: Send + Sync + fmt::Debug {
    fn now(&self) -> Instant;
}

#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> Instant {
        Instant::now()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("execution exceeded its {budget:?} budget")]
pub struct TimedOut {
    pub budget: Duration,
}

#[derive(Debug, Clone)]
pub struct Deadline {
    clock: Arc<dyn Clock>,
    expires_at: Instant,
    budget: Duration,
}

impl Deadline {
    pub fn new(clock: Arc<dyn Clock>, budget: Duration) -> Self {
        let expires_at = clock.now() + budget;
        Self { clock, expires_at, budget }
    }

    pub fn budget(&self) -> Duration {
        self.budget
    }

    pub fn is_expired(&self) -> bool {
        self.clock.now() >= self.expires_at
    }

    pub fn remaining(&self) -> Duration {
        self.expires_at.saturating_duration_since(self.clock.now())
    }

    pub fn check(&self) -> Result<(), TimedOut> {
        if self.is_expired() {
            Err(TimedOut { budget: self.budget })
        } else {
            Ok(())
        }
    }
}

/// Runs a body under a fresh [`Deadline`].
#[derive(Debug, Clone)]
pub struct TimeoutGuard {
    clock: Arc<dyn Clock>,
    budget: Duration,
}

impl Default for TimeoutGuard {
    fn default() -> Self {
        Self::new(DEFAULT_GUARD_TIMEOUT)
    }
}

impl TimeoutGuard {
    pub fn new(budget: Duration) -> Self {
        Self::with_clock(Arc::new(SystemClock), budget)
    }

    pub fn with_clock(clock: Arc<dyn Clock>, budget: Duration) -> Self {
        Self { clock, budget }
    }

    pub fn budget(&self) -> Duration {
        self.budget
    }

    /// Run `body` with a deadline starting now.
    ///
    /// A body that completes after the deadline has passed is still reported
    /// as timed out, even if it never observed the expiry itself.
    pub fn run<T, E>(&self, body: impl FnOnce(&Deadline) -> Result<T, E>) -> Result<T, E>
    where
        E: From<TimedOut>,
    {
        let deadline = Deadline::new(self.clock.clone(), self.budget);
        let result = body(&deadline);
        match result {
            Ok(_) if deadline.is_expired() => Err(TimedOut { budget: self.budget }.into()),
            other => other,
        }
    }
}

#[cfg(test)]
pub(crate) mod testing {
    use std::sync::Mutex;

    use super::*;

    /// Advances by a fixed step every time it is read.
    #[derive(Debug)]
    pub struct SteppingClock {
        now: Mutex<Instant>,
        step: Duration,
    }

    impl SteppingClock {
        pub fn new(step: Duration) -> Self {
            Self { now: Mutex::new(Instant::now()), step }
        }
    }

    impl Clock for SteppingClock {
        fn now(&self) -> Instant {
            let mut now = self.now.lock().unwrap();
            *now += self.step;
            *now
        }
    }
}

#[cfg(test)]
mod tests {
    use super::testing::SteppingClock;
    use super::*;

    #[test]
    fn deadline_expires_after_budget() {
        let clock = Arc::new(SteppingClock::new(Duration::from_millis(300)));
        let deadline = Deadline::new(clock, Duration::from_secs(1));
        assert!(deadline.check().is_ok());
        assert!(deadline.check().is_ok());
        assert!(deadline.check().is_ok());
        assert_eq!(deadline.check(), Err(TimedOut { budget: Duration::from_secs(1) }));
    }

    #[test]
    fn late_success_is_reported_as_timeout() {
        let clock = Arc::new(SteppingClock::new(Duration::from_secs(2)));
        let guard = TimeoutGuard::with_clock(clock, Duration::from_secs(1));
        let result: Result<i32, TimedOut> = guard.run(|_| Ok(42));
        assert!(result.is_err());
    }

    #[test]
    fn fast_body_passes_through() {
        let guard = TimeoutGuard::default();
        assert_eq!(guard.budget(), DEFAULT_GUARD_TIMEOUT);
        let result: Result<&str, TimedOut> = guard.run(|d| {
            d.check()?;
            assert!(d.remaining() <= DEFAULT_GUARD_TIMEOUT);
            Ok("done")
        });
        assert_eq!(result, Ok("done"));
    }

    #[test]
    fn remaining_saturates_at_zero() {
        let clock = Arc::new(SteppingClock::new(Duration::from_millis(600)));
        let deadline = Deadline::new(clock, Duration::from_secs(1));
        assert_eq!(deadline.remaining(), Duration::from_millis(400));
        assert_eq!(deadline.remaining(), Duration::ZERO);
    }
}
