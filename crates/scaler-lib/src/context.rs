//! Per-invocation run state

use crate::models::RunSummary;

/// Counters and the operations budget shared by every stage of one run
#[derive(Debug, Clone, Default)]
pub struct RunContext {
    pub summary: RunSummary,
    /// Mutations still allowed in this run; `None` means unlimited
    remaining_operations: Option<u32>,
}

impl RunContext {
    pub fn new(max_operations: Option<u32>) -> Self {
        Self {
            summary: RunSummary::default(),
            remaining_operations: max_operations,
        }
    }

    pub fn remaining_operations(&self) -> Option<u32> {
        self.remaining_operations
    }

    /// Take one operation from the budget, false when it is exhausted
    pub fn try_consume_operation(&mut self) -> bool {
        match self.remaining_operations.as_mut() {
            None => true,
            Some(0) => false,
            Some(n) => {
                *n -= 1;
                true
            }
        }
    }

    pub fn into_summary(self) -> RunSummary {
        self.summary
    }
}
