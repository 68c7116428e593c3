//! Deadline-based scheduling primitives.
//!
//! All timing in the core is expressed against explicit `now_ms` values so
//! coordinator behavior is deterministic under test. The IO shell drives
//! these from a coarse ticker.

/// Trailing-edge debounce: the action fires once a quiet period has elapsed
/// since the most recent trigger.
#[derive(Debug)]
pub struct Debounce {
    delay_ms: u64,
    deadline: Option<u64>,
}

impl Debounce {
    pub fn new(delay_ms: u64) -> Self {
        Self {
            delay_ms,
            deadline: None,
        }
    }

    /// Record a triggering event, pushing the deadline out.
    pub fn trigger(&mut self, now_ms: u64) {
        self.deadline = Some(now_ms + self.delay_ms);
    }

    /// Check whether the quiet period has elapsed. Clears the deadline when
    /// it fires, so each burst of triggers produces exactly one firing.
    pub fn fire(&mut self, now_ms: u64) -> bool {
        match self.deadline {
            Some(deadline) if now_ms >= deadline => {
                self.deadline = None;
                true
            }
            _ => false,
        }
    }

    pub fn is_pending(&self) -> bool {
        self.deadline.is_some()
    }

    pub fn cancel(&mut self) {
        self.deadline = None;
    }
}

/// Fixed-period recurring deadline. The first period starts at the first
/// `fire` call.
#[derive(Debug)]
pub struct Recurring {
    period_ms: u64,
    next_at: Option<u64>,
}

impl Recurring {
    pub fn new(period_ms: u64) -> Self {
        Self {
            period_ms,
            next_at: None,
        }
    }

    pub fn fire(&mut self, now_ms: u64) -> bool {
        match self.next_at {
            None => {
                self.next_at = Some(now_ms + self.period_ms);
                false
            }
            Some(at) if now_ms >= at => {
                self.next_at = Some(now_ms + self.period_ms);
                true
            }
            Some(_) => false,
        }
    }
}
