//! Lattice: a test orchestration core
//!
//! Given a catalogue of test definitions (a class/method pair, its data
//! sources, and declared constraints), Lattice expands each definition into
//! every concrete runnable combination of constructor and method arguments
//! (resolving open generic types from supplied values and assigning
//! deterministic identities), then schedules the resulting units honoring
//! depends-on ordering, keyed mutual exclusion, a fully-serial queue,
//! CPU-pressure admission control, and per-attempt retry. Any single
//! failure is isolated to its own unit; it never aborts the run.
//!
//! ## Layout
//!
//! - [`lattice_core`]: data model, type model, errors, lifecycle states,
//!   collaborator traits
//! - [`lattice_engine`]: expansion, generic resolution, identity and
//!   instance building, shared-source registry
//! - [`lattice_scheduler`]: dependency graph, partitions, admission
//!   control, the dispatch loop
//!
//! ## Quick start
//!
//! ```ignore
//! let session = RunSession::new(RunOptions::default(), factory, invoker, sinks);
//! let summary = session.run_all(&definitions).await?;
//! assert!(summary.all_green());
//! ```
//!
//! Discovery of definitions, the assertion API inside test bodies, and
//! report formatting live behind the collaborator traits; Lattice never
//! calls back into them beyond those seams.

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod config;

pub use config::{RunOptions, OPTIONS_FILE_NAME};
pub use lattice_core::{
    ArgValue, ClassMetadata, DataSource, DependencyTarget, DependsOn, Error, ExecutableTest,
    GenericBinding, Instance, InstanceFactory, InvocationOutcome, MethodMetadata,
    ParallelConstraint, ParamSpec, Result, ResultSink, RowFactory, SessionId, SharedScope,
    TestDefinition, TestId, TestInvoker, TestResultRecord, TestState, TypeConstraint, TypeDesc,
    TypeInfo, TypeKind, TypeParam, Value,
};
pub use lattice_engine::{ExpansionEngine, ExpansionOutcome, SharedSourceRegistry, TestBuilder};
pub use lattice_scheduler::{RunSummary, Scheduler, SchedulerOptions};

use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::info;

/// One orchestration run: expansion, building, and scheduling under one
/// set of options
///
/// The session owns the shared-source registry and the cancellation token,
/// so two sessions never share singleton data or cancellation state. The
/// registry is cleared when the run finishes.
pub struct RunSession {
    id: SessionId,
    options: RunOptions,
    shared: Arc<SharedSourceRegistry>,
    factory: Arc<dyn InstanceFactory>,
    invoker: Arc<dyn TestInvoker>,
    sinks: Vec<Arc<dyn ResultSink>>,
    cancel: CancellationToken,
}

impl RunSession {
    /// Create a session over the construction and invocation collaborators
    pub fn new(
        options: RunOptions,
        factory: Arc<dyn InstanceFactory>,
        invoker: Arc<dyn TestInvoker>,
        sinks: Vec<Arc<dyn ResultSink>>,
    ) -> Self {
        Self {
            id: SessionId::new(),
            options,
            shared: Arc::new(SharedSourceRegistry::new()),
            factory,
            invoker,
            sinks,
            cancel: CancellationToken::new(),
        }
    }

    /// Session identifier
    pub fn id(&self) -> SessionId {
        self.id
    }

    /// Token that cancels this run; new dispatch stops immediately,
    /// in-flight tests observe it at their next suspension point
    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Expand, build, and run every definition to a terminal state
    ///
    /// Per-test failures are recorded outcomes; only configuration and
    /// scheduler-bookkeeping defects return `Err`.
    pub async fn run_all(&self, definitions: &[TestDefinition]) -> Result<RunSummary> {
        info!(
            session = %self.id,
            definitions = definitions.len(),
            "expanding test space"
        );
        let engine = ExpansionEngine::new(self.factory.clone(), self.shared.clone());
        let builder = TestBuilder::new(self.factory.clone(), self.options.default_retry_limit);

        let mut tests = Vec::new();
        for def in definitions {
            for outcome in engine.expand(def).await {
                match outcome {
                    ExpansionOutcome::Row(row) => tests.push(builder.build(def, *row).await),
                    ExpansionOutcome::Failed(test) => tests.push(test),
                }
            }
        }
        info!(session = %self.id, tests = tests.len(), "test space expanded");

        let scheduler = Scheduler::new(
            self.invoker.clone(),
            self.factory.clone(),
            self.sinks.clone(),
            self.options.scheduler_options(),
        );
        let summary = scheduler.run(tests, self.cancel.clone()).await;
        self.shared.clear();
        summary
    }
}

/// Expand and run a definition set with default collaborator wiring
///
/// Convenience for hosts that do not need to keep the session around (for
/// cancellation or session-id correlation).
pub async fn run_all(
    definitions: &[TestDefinition],
    options: RunOptions,
    factory: Arc<dyn InstanceFactory>,
    invoker: Arc<dyn TestInvoker>,
    sinks: Vec<Arc<dyn ResultSink>>,
) -> Result<RunSummary> {
    RunSession::new(options, factory, invoker, sinks)
        .run_all(definitions)
        .await
}
