//! Crash-restart budget bookkeeping for one managed process.

use tokio::time::Instant;

use crate::domain::RestartPolicy;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BudgetDecision {
    /// Respawn after the policy delay; `attempt` is the new restart count
    Restart { attempt: u32 },
    /// Budget spent inside the window; the target is marked failed
    Exhausted,
}

#[derive(Debug, Clone, Default)]
pub struct RestartBudget {
    restart_count: u32,
    last_restart_at: Option<Instant>,
}

impl RestartBudget {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn restart_count(&self) -> u32 {
        self.restart_count
    }

    pub fn last_restart_at(&self) -> Option<Instant> {
        self.last_restart_at
    }

    /// Evaluate a crash observed at `now`
    pub fn on_crash(&mut self, now: Instant, policy: &RestartPolicy) -> BudgetDecision {
        if let Some(last) = self.last_restart_at {
            if now.saturating_duration_since(last) > policy.restart_window {
                self.restart_count = 0;
            }
        }

        if self.restart_count < policy.max_restarts {
            self.restart_count += 1;
            self.last_restart_at = Some(now);
            BudgetDecision::Restart {
                attempt: self.restart_count,
            }
        } else {
            BudgetDecision::Exhausted
        }
    }

    /// External reset of a failed target
    pub fn reset(&mut self) {
        self.restart_count = 0;
        self.last_restart_at = None;
    }
}
