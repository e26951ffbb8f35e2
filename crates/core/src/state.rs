//! Test lifecycle states and result records
//!
//! ## Lifecycle
//!
//! ```text
//! Pending → Waiting → Running → {Passed, Failed, Skipped}
//!                        ↑           |
//!                        └─ Waiting ←┘   (one cycle per retry attempt)
//! ```
//!
//! `Passed`, `Failed` and `Skipped` are terminal. Every attempt produces a
//! distinct `TestResultRecord` sharing the test's identity.

use crate::types::TestId;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Lifecycle state of one executable test
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TestState {
    /// Not yet considered for dispatch
    Pending,
    /// Waiting on dependencies, admission, or a retry slot
    Waiting,
    /// Currently executing
    Running,
    /// Terminal: the invocation succeeded
    Passed,
    /// Terminal: the invocation failed, or the test never became runnable
    Failed,
    /// Terminal: the test was skipped without executing
    Skipped,
}

impl TestState {
    /// Whether the state is terminal
    pub fn is_terminal(&self) -> bool {
        matches!(self, TestState::Passed | TestState::Failed | TestState::Skipped)
    }

    /// Get string representation
    pub fn as_str(&self) -> &'static str {
        match self {
            TestState::Pending => "Pending",
            TestState::Waiting => "Waiting",
            TestState::Running => "Running",
            TestState::Passed => "Passed",
            TestState::Failed => "Failed",
            TestState::Skipped => "Skipped",
        }
    }
}

impl std::fmt::Display for TestState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// One attempt or terminal outcome of one test, streamed to reporters
///
/// Retried tests produce one record per attempt, all sharing `id`. Tests
/// that never ran (pre-failed, dependency-failed, skipped, cancelled) carry
/// no timestamps.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TestResultRecord {
    /// Deterministic test identity
    pub id: TestId,
    /// Human-readable display name
    pub display_name: String,
    /// Zero-based attempt index
    pub attempt: u32,
    /// State this attempt terminated in
    pub state: TestState,
    /// When the attempt started executing, if it did
    pub started_at: Option<DateTime<Utc>>,
    /// When the attempt reached its terminal state, if it executed
    pub ended_at: Option<DateTime<Utc>>,
    /// Root-cause message for Failed and Skipped outcomes
    pub error: Option<String>,
}
