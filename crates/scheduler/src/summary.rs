//! Run summary assembled after the dispatch loop drains

use chrono::{DateTime, Utc};
use lattice_core::{TestId, TestResultRecord, TestState};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Everything a reporter needs once the run has finished
///
/// `records` holds one entry per attempt in completion order; retried tests
/// contribute several records sharing one identity. Final per-test outcomes
/// and totals are derived from the last record of each identity.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunSummary {
    /// When scheduling started
    pub started_at: DateTime<Utc>,
    /// When the last unit reached a terminal state
    pub ended_at: DateTime<Utc>,
    /// Every attempt, in completion order
    pub records: Vec<TestResultRecord>,
}

impl RunSummary {
    /// The final record of each test, in first-completion order
    pub fn final_records(&self) -> Vec<&TestResultRecord> {
        let mut order: Vec<&TestId> = Vec::new();
        let mut latest: HashMap<&TestId, &TestResultRecord> = HashMap::new();
        for record in &self.records {
            if latest.insert(&record.id, record).is_none() {
                order.push(&record.id);
            }
        }
        order.into_iter().filter_map(|id| latest.get(id).copied()).collect()
    }

    /// Number of tests whose final state matches
    pub fn count(&self, state: TestState) -> usize {
        self.final_records()
            .iter()
            .filter(|r| r.state == state)
            .count()
    }

    /// Number of distinct tests
    pub fn total(&self) -> usize {
        self.final_records().len()
    }

    /// Whether every test ended `Passed` or `Skipped`
    pub fn all_green(&self) -> bool {
        self.count(TestState::Failed) == 0
    }

    /// Wall time of the whole run
    pub fn wall_time(&self) -> chrono::Duration {
        self.ended_at - self.started_at
    }
}
