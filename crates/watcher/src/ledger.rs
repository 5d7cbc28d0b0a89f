//! Record of audits whose terminal notification has been delivered.
//!
//! Polling and the push channel can both observe the same completion. The
//! first one to claim a job id wins; later claims are refused until the
//! job is tracked again.

use std::collections::HashSet;
use std::sync::{Mutex, MutexGuard};

#[derive(Debug, Default)]
pub struct TerminalLedger {
    delivered: Mutex<HashSet<String>>,
}

impl TerminalLedger {
    pub fn new() -> Self {
        Self::default()
    }

    /// Claim the terminal notification for `job_id`.
    ///
    /// Returns `true` exactly once per job until [`reset`](Self::reset).
    pub fn claim(&self, job_id: &str) -> bool {
        self.lock().insert(job_id.to_string())
    }

    /// Forget a claim so a re-tracked job can deliver again.
    pub fn reset(&self, job_id: &str) {
        self.lock().remove(job_id);
    }

    pub fn is_delivered(&self, job_id: &str) -> bool {
        self.lock().contains(job_id)
    }

    fn lock(&self) -> MutexGuard<'_, HashSet<String>> {
        self.delivered
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn first_claim_wins() {
        let ledger = TerminalLedger::new();
        assert!(ledger.claim("a1"));
        assert!(!ledger.claim("a1"));
        assert!(ledger.claim("a2"));
        assert!(ledger.is_delivered("a1"));
    }

    #[test]
    fn reset_allows_a_new_claim() {
        let ledger = TerminalLedger::new();
        assert!(ledger.claim("a1"));
        ledger.reset("a1");
        assert!(!ledger.is_delivered("a1"));
        assert!(ledger.claim("a1"));
    }
}
