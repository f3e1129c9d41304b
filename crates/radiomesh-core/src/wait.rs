//! Wait budgets for blocking reads and sends.
//!
//! Every read/recv takes a `Wait`. `Wait::POLL` never suspends beyond one
//! poll of the underlying future, `Wait::Forever` never gives up. A budget is
//! turned into a `Deadline` once at the start of an operation so that
//! multi-step reads share one overall limit.

use std::future::Future;
use std::time::Duration;

use tokio::time::Instant;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Wait {
    Forever,
    Within(Duration),
}

impl Wait {
    pub const POLL: Wait = Wait::Within(Duration::ZERO);

    pub fn millis(ms: u64) -> Self {
        Wait::Within(Duration::from_millis(ms))
    }

    pub fn deadline(self) -> Deadline {
        match self {
            Wait::Forever => Deadline(None),
            Wait::Within(d) => Deadline(Some(Instant::now() + d)),
        }
    }
}

impl From<Duration> for Wait {
    fn from(d: Duration) -> Self {
        Wait::Within(d)
    }
}

/// An absolute point in time after which an operation gives up.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Deadline(Option<Instant>);

impl Deadline {
    pub const NEVER: Deadline = Deadline(None);

    pub fn at(instant: Instant) -> Self {
        Deadline(Some(instant))
    }

    pub fn is_expired(&self) -> bool {
        matches!(self.0, Some(at) if Instant::now() >= at)
    }

    /// This deadline or `limit` from now, whichever comes first.
    pub fn capped(&self, limit: Duration) -> Deadline {
        let cap = Instant::now() + limit;
        match self.0 {
            None => Deadline(Some(cap)),
            Some(at) => Deadline(Some(at.min(cap))),
        }
    }

    /// Budget left until the deadline, saturating at zero.
    pub fn remaining(&self) -> Wait {
        match self.0 {
            None => Wait::Forever,
            Some(at) => Wait::Within(at.saturating_duration_since(Instant::now())),
        }
    }

    /// Drive `fut` until it finishes or the deadline passes.
    ///
    /// The future is always polled at least once, so an expired deadline still
    /// picks up anything that is immediately ready.
    pub async fn run<F: Future>(&self, fut: F) -> Option<F::Output> {
        match self.0 {
            None => Some(fut.await),
            Some(at) => tokio::time::timeout_at(at, fut).await.ok(),
        }
    }
}
