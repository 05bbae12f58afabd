//! Busy-wait polling with pluggable backoff.
//!
//! The default policy spins forever, matching a raw `while !cond {}` loop.
//! Backoff trades latency for CPU, and a timeout turns a dead peer into
//! [`Error::PeerUnresponsive`] instead of a hang.

use std::time::{Duration, Instant};

use crate::error::{Error, Result};

/// What to do between two failed polls.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Backoff {
    /// `spin_loop` hint only.
    #[default]
    Spin,
    /// Spin `spins` times, then `yield_now` on every further attempt.
    Yield { spins: u32 },
    /// Spin, then yield, then sleep `interval` on every further attempt.
    Sleep {
        spins: u32,
        yields: u32,
        interval: Duration,
    },
}

impl Backoff {
    pub const DEFAULT_SPINS: u32 = 1 << 10;
    pub const DEFAULT_YIELDS: u32 = 1 << 6;
    pub const DEFAULT_SLEEP: Duration = Duration::from_micros(50);

    pub fn yielding() -> Self {
        Backoff::Yield {
            spins: Self::DEFAULT_SPINS,
        }
    }

    pub fn sleeping() -> Self {
        Backoff::Sleep {
            spins: Self::DEFAULT_SPINS,
            yields: Self::DEFAULT_YIELDS,
            interval: Self::DEFAULT_SLEEP,
        }
    }

    fn pause(&self, attempt: u64) {
        match *self {
            Backoff::Spin => std::hint::spin_loop(),
            Backoff::Yield { spins } => {
                if attempt < u64::from(spins) {
                    std::hint::spin_loop();
                } else {
                    std::thread::yield_now();
                }
            }
            Backoff::Sleep {
                spins,
                yields,
                interval,
            } => {
                if attempt < u64::from(spins) {
                    std::hint::spin_loop();
                } else if attempt - u64::from(spins) < u64::from(yields) {
                    std::thread::yield_now();
                } else {
                    std::thread::sleep(interval);
                }
            }
        }
    }
}

/// Backoff plus an optional bound on how long a single wait may take.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct PollPolicy {
    pub backoff: Backoff,
    /// `None` waits forever.
    pub timeout: Option<Duration>,
}

impl PollPolicy {
    pub fn new(backoff: Backoff) -> Self {
        Self {
            backoff,
            timeout: None,
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }
}

/// State of one wait. Create a fresh poller for every wait.
pub struct Poller {
    policy: PollPolicy,
    attempt: u64,
    started: Option<Instant>,
}

/// Clock reads are skipped on most attempts; the spin path stays cheap.
const TIMEOUT_CHECK_INTERVAL: u64 = 64;

impl Poller {
    pub fn new(policy: PollPolicy) -> Self {
        Self {
            policy,
            attempt: 0,
            started: policy.timeout.map(|_| Instant::now()),
        }
    }

    /// Evaluates `cond` until it yields `Some`. Errors from `cond` are
    /// returned immediately.
    pub fn poll_until<T, F>(&mut self, mut cond: F) -> Result<T>
    where
        F: FnMut() -> Result<Option<T>>,
    {
        loop {
            if let Some(value) = cond()? {
                return Ok(value);
            }
            self.wait()?;
        }
    }

    /// Backs off once; fails when the timeout has elapsed.
    pub fn wait(&mut self) -> Result<()> {
        if let (Some(timeout), Some(started)) = (self.policy.timeout, self.started)
            && (self.attempt % TIMEOUT_CHECK_INTERVAL == 0
                || !matches!(self.policy.backoff, Backoff::Spin))
        {
            let waited = started.elapsed();
            if waited >= timeout {
                tracing::warn!(?waited, "poll timed out waiting for peer");
                return Err(Error::PeerUnresponsive { waited });
            }
        }
        self.policy.backoff.pause(self.attempt);
        self.attempt += 1;
        Ok(())
    }

    pub fn attempts(&self) -> u64 {
        self.attempt
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ready_immediately() {
        let mut poller = Poller::new(PollPolicy::default());
        assert_eq!(poller.poll_until(|| Ok(Some(7))).unwrap(), 7);
        assert_eq!(poller.attempts(), 0);
    }

    #[test]
    fn test_counts_attempts() {
        let mut poller = Poller::new(PollPolicy::new(Backoff::yielding()));
        let mut n = 0;
        let v = poller
            .poll_until(|| {
                n += 1;
                Ok((n == 5).then_some(n))
            })
            .unwrap();
        assert_eq!(v, 5);
        assert_eq!(poller.attempts(), 4);
    }

    #[test]
    fn test_timeout() {
        let policy = PollPolicy::new(Backoff::sleeping()).with_timeout(Duration::from_millis(20));
        let mut poller = Poller::new(policy);
        let started = Instant::now();
        match poller.poll_until(|| Ok(None::<()>)) {
            Err(Error::PeerUnresponsive { waited }) => {
                assert!(waited >= Duration::from_millis(20));
                assert!(started.elapsed() < Duration::from_secs(5));
            }
            other => panic!("expected PeerUnresponsive, got {:?}", other),
        }
    }

    #[test]
    fn test_spin_timeout() {
        let policy = PollPolicy::default().with_timeout(Duration::from_millis(5));
        let mut poller = Poller::new(policy);
        assert!(matches!(
            poller.poll_until(|| Ok(None::<()>)),
            Err(Error::PeerUnresponsive { .. })
        ));
    }

    #[test]
    fn test_condition_error_propagates() {
        let mut poller = Poller::new(PollPolicy::default());
        let res: Result<()> = poller.poll_until(|| Err(Error::EmptyPayload));
        assert!(matches!(res, Err(Error::EmptyPayload)));
    }
}
