//! Budgets bounding a session: recursion depth, iterations, wall clock.

use std::time::{Duration, Instant};

use anyhow::{Result, anyhow};

/// `(depth, max_depth)` pair threaded through recursive delegation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RecursionBudget {
    pub depth: u32,
    pub max_depth: u32,
}

impl RecursionBudget {
    pub fn root(max_depth: u32) -> Self {
        Self {
            depth: 0,
            max_depth,
        }
    }

    /// Budget for a session spawned one level deeper.
    pub fn child(self) -> Self {
        Self {
            depth: self.depth.saturating_add(1),
            ..self
        }
    }

    /// A session at this depth must terminate before issuing any model call.
    pub fn exhausted(self) -> bool {
        self.depth > self.max_depth
    }

    /// Whether a session at this depth may still delegate to a live child.
    pub fn can_delegate(self) -> bool {
        self.child().depth <= self.max_depth
    }
}

/// Return the remaining time budget until the provided deadline.
pub fn remaining_budget(deadline: Instant) -> Result<Duration> {
    let remaining = deadline
        .checked_duration_since(Instant::now())
        .unwrap_or(Duration::from_secs(0));
    if remaining.is_zero() {
        return Err(anyhow!("deadline elapsed"));
    }
    Ok(remaining)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn child_increments_depth_by_one() {
        let budget = RecursionBudget::root(2);
        assert_eq!(budget.child().depth, 1);
        assert_eq!(budget.child().child().max_depth, 2);
    }

    #[test]
    fn exhausted_only_past_max_depth() {
        let at_max = RecursionBudget {
            depth: 2,
            max_depth: 2,
        };
        assert!(!at_max.exhausted());
        assert!(!at_max.can_delegate());
        assert!(at_max.child().exhausted());
    }

    #[test]
    fn elapsed_deadline_has_no_budget() {
        let err = remaining_budget(Instant::now()).unwrap_err();
        assert!(err.to_string().contains("deadline elapsed"));
        assert!(remaining_budget(Instant::now() + Duration::from_secs(5)).is_ok());
    }
}
