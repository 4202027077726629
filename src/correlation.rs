//! Correlation ids and the `Operation` context that carries them.
//!
//! The source propagates a correlation id through thread-local/ambient
//! context. We pass an explicit [`Operation`] value down the call stack
//! instead — it carries the id and a deadline, and every log record or
//! error built along the way reads it from there rather than from task-local
//! storage. This also gives cancellation (the deadline) a first-class home.

use std::fmt;
use std::time::{Duration, Instant};

use uuid::Uuid;

/// Short opaque id identifying one operation across logs and errors.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct CorrelationId(Uuid);

impl CorrelationId {
    #[must_use]
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for CorrelationId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for CorrelationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        // first 8 hex chars are plenty to eyeball in logs
        write!(f, "{}", &self.0.simple().to_string()[..8])
    }
}

/// Ambient context for one externally observable operation: plan, schedule
/// step, job execute, or provider call. Child operations inherit the same
/// correlation id unless explicitly rekeyed with [`Operation::child`].
#[derive(Debug, Clone)]
pub struct Operation {
    id: CorrelationId,
    started_at: Instant,
    deadline: Option<Duration>,
    cancelled: bool,
}

impl Operation {
    #[must_use]
    pub fn new() -> Self {
        Self {
            id: CorrelationId::new(),
            started_at: Instant::now(),
            deadline: None,
            cancelled: false,
        }
    }

    #[must_use]
    pub fn with_deadline(mut self, deadline: Duration) -> Self {
        self.deadline = Some(deadline);
        self
    }

    /// A nested operation sharing this one's correlation id, e.g. a single
    /// provider call made while executing a job.
    #[must_use]
    pub fn child(&self) -> Self {
        Self {
            id: self.id,
            started_at: Instant::now(),
            deadline: self.deadline,
            cancelled: self.cancelled,
        }
    }

    #[must_use]
    pub const fn id(&self) -> CorrelationId {
        self.id
    }

    #[must_use]
    pub fn elapsed(&self) -> Duration {
        self.started_at.elapsed()
    }

    #[must_use]
    pub fn is_expired(&self) -> bool {
        self.deadline.is_some_and(|d| self.started_at.elapsed() > d)
    }

    pub fn cancel(&mut self) {
        self.cancelled = true;
    }

    #[must_use]
    pub const fn is_cancelled(&self) -> bool {
        self.cancelled
    }
}

impl Default for Operation {
    fn default() -> Self {
        Self::new()
    }
}
