//! Executable tests: the unit handed to the scheduler
//!
//! An `ExecutableTest` is one concrete combination of constructor and method
//! arguments, with its deterministic identity, constructed instance, and
//! resolved generic bindings. Any failure during expansion, resolution, or
//! construction is converted into an `ExecutableTest` that is already in the
//! `Failed` state carrying the causing error; one bad combination never
//! prevents construction of the rest.

use crate::definition::{DependsOn, ParallelConstraint};
use crate::error::Error;
use crate::state::TestState;
use crate::types::{GenericBinding, TestId, TypeDesc};
use crate::value::{ArgValue, Instance};

/// One concrete, schedulable test
#[derive(Clone)]
pub struct ExecutableTest {
    /// Deterministic identity
    pub id: TestId,
    /// Human-readable display name, e.g. `renders(1, "a")`
    pub display_name: String,
    /// Qualified name of the class under test
    pub class_name: String,
    /// Name of the method under test
    pub method_name: String,
    /// Declared method parameter types (used for depends-on overload matching)
    pub method_param_types: Vec<TypeDesc>,
    /// Constructed instance; `None` when construction failed or was skipped
    pub instance: Option<Instance>,
    /// Resolved class generic binding
    pub class_binding: GenericBinding,
    /// Resolved method generic binding
    pub method_binding: GenericBinding,
    /// Materialized constructor arguments (kept for instance rebuild on retry)
    pub class_args: Vec<ArgValue>,
    /// Materialized method arguments
    pub method_args: Vec<ArgValue>,
    /// Declared depends-on edges (resolved to identities by the graph)
    pub depends_on: Vec<DependsOn>,
    /// Parallelism constraint
    pub constraint: ParallelConstraint,
    /// Retry budget (extra attempts after the first)
    pub retry_limit: u32,
    /// Initial lifecycle state: `Pending`, or a pre-set terminal state
    pub state: TestState,
    /// Root-cause message when `state` is pre-set to `Failed`
    pub error: Option<String>,
    /// Skip reason when the definition was declared skipped
    pub skip_reason: Option<String>,
}

impl ExecutableTest {
    /// Synthesize a test already in the `Failed` state
    ///
    /// This is the core's primary failure-isolation mechanism: expansion,
    /// resolution, and construction failures each become one of these
    /// instead of aborting the run.
    pub fn failed(
        id: TestId,
        display_name: impl Into<String>,
        class_name: impl Into<String>,
        method_name: impl Into<String>,
        error: &Error,
    ) -> Self {
        Self {
            id,
            display_name: display_name.into(),
            class_name: class_name.into(),
            method_name: method_name.into(),
            method_param_types: Vec::new(),
            instance: None,
            class_binding: GenericBinding::empty(),
            method_binding: GenericBinding::empty(),
            class_args: Vec::new(),
            method_args: Vec::new(),
            depends_on: Vec::new(),
            constraint: ParallelConstraint::Unconstrained,
            retry_limit: 0,
            state: TestState::Failed,
            error: Some(error.to_string()),
            skip_reason: None,
        }
    }

    /// Whether the test arrived at the scheduler already terminal
    pub fn is_pre_terminal(&self) -> bool {
        self.state.is_terminal()
    }
}

impl std::fmt::Debug for ExecutableTest {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ExecutableTest")
            .field("id", &self.id)
            .field("display_name", &self.display_name)
            .field("state", &self.state)
            .field("constraint", &self.constraint)
            .field("retry_limit", &self.retry_limit)
            .field("depends_on", &self.depends_on.len())
            .finish()
    }
}
