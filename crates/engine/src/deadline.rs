use crate::errors::{EngineError, Result};
use std::time::{Duration, Instant};

/// Wall-clock budget shared by optimizer and sampler loops
#[derive(Clone, Copy, Debug)]
pub struct MaxTime {
    start: Instant,
    budget: Duration,
}

impl MaxTime {
    /// Budget starting now
    pub fn new(budget: Duration) -> Self {
        MaxTime {
            start: Instant::now(),
            budget,
        }
    }

    /// Budget in seconds starting now
    pub fn seconds(secs: f64) -> Self {
        Self::new(Duration::from_secs_f64(secs.max(0.)))
    }

    /// Time spent since the budget started
    pub fn elapsed(&self) -> Duration {
        self.start.elapsed()
    }

    /// Whether the budget is exhausted
    pub fn expired(&self) -> bool {
        self.elapsed() >= self.budget
    }

    /// Fails with [`EngineError::Deadline`] once the budget is exhausted
    pub fn check(&self) -> Result<()> {
        if self.expired() {
            Err(EngineError::Deadline(self.elapsed()))
        } else {
            Ok(())
        }
    }
}

/// Check an optional deadline
pub(crate) fn check(deadline: Option<&MaxTime>) -> Result<()> {
    deadline.map_or(Ok(()), MaxTime::check)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_deadline() {
        assert!(MaxTime::seconds(3600.).check().is_ok());
        let over = MaxTime::new(Duration::ZERO);
        assert!(over.expired());
        assert!(matches!(over.check(), Err(EngineError::Deadline(_))));
    }
}
