use std::time::{Duration, Instant};

/// An absolute read deadline fixed at call entry.
///
/// The expiry instant is never recomputed, so a stream of short reads cannot
/// stretch the effective timeout past the initial budget.
#[derive(Debug, Clone)]
pub struct Deadline {
    start: Instant,
    budget: Duration,
    at: Option<Instant>,
    idle: Duration,
}

impl Deadline {
    /// Start a deadline `timeout` from now.
    pub fn after(timeout: Duration) -> Self {
        let start = Instant::now();
        Self {
            start,
            budget: timeout,
            // `None` only when the addition overflows: treat as unbounded.
            at: start.checked_add(timeout),
            idle: Duration::ZERO,
        }
    }

    /// The budget this deadline was created with.
    pub fn budget(&self) -> Duration {
        self.budget
    }

    pub fn elapsed(&self) -> Duration {
        self.start.elapsed()
    }

    pub fn remaining(&self) -> Duration {
        match self.at {
            Some(at) => at.saturating_duration_since(Instant::now()),
            None => Duration::MAX,
        }
    }

    pub fn is_expired(&self) -> bool {
        match self.at {
            Some(at) => Instant::now() >= at,
            None => false,
        }
    }

    /// Charge one empty read of `interval` against this deadline.
    pub fn note_idle(&mut self, interval: Duration) {
        self.idle = self.idle.saturating_add(interval);
    }

    /// Total time charged by empty reads so far.
    pub fn idle_time(&self) -> Duration {
        self.idle
    }
}
