//! Collaborator traits
//!
//! The core consumes three external collaborators and exposes results to a
//! fourth. Test-body semantics, assertions, and reporting formats live
//! behind these seams; the core only needs the shapes below.

use crate::error::Result;
use crate::state::{TestResultRecord, TestState};
use crate::types::GenericBinding;
use crate::value::{ArgValue, Instance};
use async_trait::async_trait;

/// Terminal outcome of one invocation attempt
#[derive(Debug, Clone)]
pub struct InvocationOutcome {
    /// Terminal state: `Passed`, `Failed`, or `Skipped`
    pub state: TestState,
    /// Failure or skip message, if any
    pub error: Option<String>,
}

impl InvocationOutcome {
    /// A passing outcome
    pub fn passed() -> Self {
        Self {
            state: TestState::Passed,
            error: None,
        }
    }

    /// A failing outcome with a message
    pub fn failed(message: impl Into<String>) -> Self {
        Self {
            state: TestState::Failed,
            error: Some(message.into()),
        }
    }

    /// A skipped outcome with a reason
    pub fn skipped(reason: impl Into<String>) -> Self {
        Self {
            state: TestState::Skipped,
            error: Some(reason.into()),
        }
    }
}

/// Instance-construction collaborator
///
/// Constructs instances of classes under test. Returning `Ok(None)` means
/// the factory produced no instance; the builder treats that as a hard
/// construction error, since the method cannot be invoked without a
/// receiver.
#[async_trait]
pub trait InstanceFactory: Send + Sync {
    /// Construct an instance of `class` with the resolved class generic
    /// arguments and materialized constructor arguments
    async fn construct(
        &self,
        class: &str,
        generic_args: &GenericBinding,
        ctor_args: &[ArgValue],
    ) -> Result<Option<Instance>>;

    /// One-time per-class teardown, fired after the last test of `class`
    /// reaches a terminal state
    async fn teardown_class(&self, _class: &str) {}
}

/// Invocation collaborator (the test-body runner)
///
/// The scheduler only needs the outcome's terminal state and optional
/// error; how the body executes is out of scope.
#[async_trait]
pub trait TestInvoker: Send + Sync {
    /// Invoke `method` on `instance` with the resolved method generic
    /// arguments and materialized method arguments
    async fn invoke(
        &self,
        instance: &Instance,
        method: &str,
        generic_args: &GenericBinding,
        args: &[ArgValue],
    ) -> InvocationOutcome;
}

/// Reporting collaborator
///
/// Receives one record per attempt as tests complete. Called concurrently
/// from worker units; implementations must be thread-safe.
pub trait ResultSink: Send + Sync {
    /// Observe one completed attempt
    fn on_result(&self, record: &TestResultRecord);
}
