//! Dependency-aware dispatch loop
//!
//! One task owns every piece of scheduling state (graph, partitions, slot
//! bookkeeping); worker units only execute the test body and report back
//! over a channel, so the loop's mutations are never concurrent. Workers
//! append to the shared result vec and notify reporter sinks themselves.
//!
//! Dispatch rules, in order:
//! - nothing is admitted while the CPU gate is closed or a serial unit runs
//! - pool and keyed queues go first; a key admits one unit at a time
//! - the serial queue is drawn from only when everything else is drained
//!   and nothing is in flight
//! - a unit is eligible once every dependency is terminal; a failed
//!   dependency without proceed-on-failure fails the dependent in place,
//!   which in turn satisfies anything waiting on it
//! - dependency order always wins over queue order: an ineligible queue
//!   head is passed over rather than allowed to wedge its partition
//!
//! A failed attempt with retry budget left goes back to the front of its
//! partition as a fresh attempt. Once the last test of a class turns
//! terminal, the per-class teardown hook fires exactly once, guarded by an
//! atomic map claim.

use crate::graph::{DependencyGraph, GraphFailure};
use crate::partition::Partitions;
use crate::summary::RunSummary;
use crate::throttle::CpuGate;
use chrono::Utc;
use dashmap::DashMap;
use lattice_core::{
    Error, ExecutableTest, InstanceFactory, InvocationOutcome, ParallelConstraint, Result,
    ResultSink, TestId, TestInvoker, TestResultRecord, TestState,
};
use parking_lot::Mutex;
use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Tuning knobs for one scheduling run
#[derive(Debug, Clone)]
pub struct SchedulerOptions {
    /// Hard cap on simultaneously running units
    pub max_concurrency: usize,
    /// CPU-utilization ceiling for admission control; 100 or more disables
    /// the gate
    pub cpu_ceiling_percent: f32,
    /// Sampling interval for the admission gate
    pub cpu_sample_interval_ms: u64,
    /// Per-attempt timeout; 0 means no timeout
    pub default_timeout_ms: u64,
    /// Reconstruct the class instance before each retry attempt
    pub retry_rebuilds_instance: bool,
}

impl Default for SchedulerOptions {
    fn default() -> Self {
        Self {
            max_concurrency: std::thread::available_parallelism()
                .map(std::num::NonZeroUsize::get)
                .unwrap_or(4),
            cpu_ceiling_percent: 90.0,
            cpu_sample_interval_ms: 250,
            default_timeout_ms: 300_000,
            retry_rebuilds_instance: false,
        }
    }
}

/// Runs an executable set to completion under its declared constraints
pub struct Scheduler {
    invoker: Arc<dyn TestInvoker>,
    factory: Arc<dyn InstanceFactory>,
    sinks: Arc<Vec<Arc<dyn ResultSink>>>,
    options: SchedulerOptions,
    gate: Mutex<Option<CpuGate>>,
}

impl Scheduler {
    /// Create a scheduler over the invocation and construction collaborators
    pub fn new(
        invoker: Arc<dyn TestInvoker>,
        factory: Arc<dyn InstanceFactory>,
        sinks: Vec<Arc<dyn ResultSink>>,
        options: SchedulerOptions,
    ) -> Self {
        Self {
            invoker,
            factory,
            sinks: Arc::new(sinks),
            options,
            gate: Mutex::new(None),
        }
    }

    /// Replace the CPU-sampling admission gate for the next run
    ///
    /// Hosts that manage load themselves can supply a [`CpuGate::manual`]
    /// gate and drive admission over its channel. The supplied gate is
    /// consumed by the next run; later runs fall back to CPU sampling.
    pub fn with_admission_gate(self, gate: CpuGate) -> Self {
        *self.gate.lock() = Some(gate);
        self
    }

    /// Run every test to a terminal state
    ///
    /// Only bookkeeping defects (duplicate identities, stalled dispatch)
    /// abort the run; every per-test failure is a recorded outcome.
    pub async fn run(
        &self,
        tests: Vec<ExecutableTest>,
        cancel: CancellationToken,
    ) -> Result<RunSummary> {
        let started_at = Utc::now();
        let (graph, unresolved) = DependencyGraph::build(&tests)?;
        let cycles = graph.detect_cycles();

        let mut loop_state = DispatchLoop::new(
            tests,
            graph,
            self.invoker.clone(),
            self.factory.clone(),
            self.sinks.clone(),
            self.options.clone(),
            cancel,
        );
        loop_state.apply_graph_failures(unresolved);
        loop_state.apply_graph_failures(cycles);
        loop_state.settle_pre_terminal();
        let gate = self.gate.lock().take();
        loop_state.drive(gate).await?;

        let records = loop_state.take_records();
        info!(
            tests = loop_state.node_count(),
            records = records.len(),
            "run complete"
        );
        Ok(RunSummary {
            started_at,
            ended_at: Utc::now(),
            records,
        })
    }
}

/// Completion event sent by a worker unit back to the loop
struct Completion {
    id: TestId,
    state: TestState,
    error: Option<String>,
}

/// Per-test bookkeeping owned by the loop
struct Node {
    test: ExecutableTest,
    attempts_made: u32,
    remaining_retries: u32,
    needs_rebuild: bool,
}

/// Eligibility of one queued unit
enum Gate {
    Ready,
    Blocked,
    /// A dependency failed and proceed-on-failure is not set; carries the
    /// failed dependency's method name
    Cascade(String),
}

struct DispatchLoop {
    nodes: HashMap<TestId, Node>,
    /// Discovery order, preserved for partitioning
    order: Vec<TestId>,
    graph: DependencyGraph,
    partitions: Partitions,
    terminal: HashMap<TestId, TestState>,
    running: usize,
    running_keys: HashSet<String>,
    serial_running: bool,
    class_remaining: HashMap<String, usize>,
    teardown_claims: Arc<DashMap<String, ()>>,
    teardowns: JoinSet<()>,
    results: Arc<Mutex<Vec<TestResultRecord>>>,
    invoker: Arc<dyn TestInvoker>,
    factory: Arc<dyn InstanceFactory>,
    sinks: Arc<Vec<Arc<dyn ResultSink>>>,
    options: SchedulerOptions,
    cancel: CancellationToken,
    tx: mpsc::UnboundedSender<Completion>,
    rx: mpsc::UnboundedReceiver<Completion>,
}

impl DispatchLoop {
    fn new(
        tests: Vec<ExecutableTest>,
        graph: DependencyGraph,
        invoker: Arc<dyn TestInvoker>,
        factory: Arc<dyn InstanceFactory>,
        sinks: Arc<Vec<Arc<dyn ResultSink>>>,
        options: SchedulerOptions,
        cancel: CancellationToken,
    ) -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        let mut class_remaining: HashMap<String, usize> = HashMap::new();
        let mut nodes = HashMap::new();
        let mut order = Vec::with_capacity(tests.len());
        for test in tests {
            *class_remaining.entry(test.class_name.clone()).or_insert(0) += 1;
            let remaining_retries = test.retry_limit;
            order.push(test.id.clone());
            nodes.insert(
                test.id.clone(),
                Node {
                    test,
                    attempts_made: 0,
                    remaining_retries,
                    needs_rebuild: false,
                },
            );
        }
        Self {
            nodes,
            order,
            graph,
            partitions: Partitions::default(),
            terminal: HashMap::new(),
            running: 0,
            running_keys: HashSet::new(),
            serial_running: false,
            class_remaining,
            teardown_claims: Arc::new(DashMap::new()),
            teardowns: JoinSet::new(),
            results: Arc::new(Mutex::new(Vec::new())),
            invoker,
            factory,
            sinks,
            options,
            cancel,
            tx,
            rx,
        }
    }

    fn node_count(&self) -> usize {
        self.nodes.len()
    }

    fn take_records(&mut self) -> Vec<TestResultRecord> {
        std::mem::take(&mut *self.results.lock())
    }

    /// Turn graph-build failures (unresolved targets, cycles) into
    /// pre-terminal nodes before partitioning
    fn apply_graph_failures(&mut self, failures: Vec<GraphFailure>) {
        for failure in failures {
            if let Some(node) = self.nodes.get_mut(&failure.id) {
                if !node.test.state.is_terminal() {
                    node.test.state = TestState::Failed;
                    node.test.error = Some(failure.error.to_string());
                }
            }
        }
    }

    /// Record everything that arrived terminal, then build the partitions
    /// over what remains
    fn settle_pre_terminal(&mut self) {
        let ordered: Vec<ExecutableTest> = self
            .order
            .clone()
            .iter()
            .filter_map(|id| self.nodes.get(id).map(|n| n.test.clone()))
            .collect();
        self.partitions = Partitions::build(&ordered);

        for test in ordered {
            if test.is_pre_terminal() {
                let error = test.error.clone().or_else(|| test.skip_reason.clone());
                self.settle_unexecuted(&test.id, test.state, error);
            }
        }

        // nodes with an unresolved dependency wait; the rest stay pending
        // until dispatched
        for id in self.order.clone() {
            if self.terminal.contains_key(&id) {
                continue;
            }
            let blocked = self
                .graph
                .dependencies_of(&id)
                .iter()
                .any(|edge| !self.terminal.contains_key(&edge.target));
            if blocked {
                if let Some(node) = self.nodes.get_mut(&id) {
                    node.test.state = TestState::Waiting;
                }
            }
        }
    }

    /// Drive dispatch until every node is terminal
    async fn drive(&mut self, gate: Option<CpuGate>) -> Result<()> {
        let mut gate = match gate {
            Some(gate) => gate,
            None => CpuGate::start(
                self.options.cpu_ceiling_percent,
                Duration::from_millis(self.options.cpu_sample_interval_ms),
            ),
        };

        loop {
            if self.cancel.is_cancelled() {
                self.drain_cancelled();
                break;
            }

            let dispatched = if gate.is_open() { self.dispatch_wave()? } else { 0 };

            if self.running == 0 && self.partitions.is_empty() {
                break;
            }
            if self.running == 0 && dispatched == 0 && gate.is_open() {
                // every remaining unit is blocked on something that can no
                // longer change: a bookkeeping defect, not a test outcome
                return Err(Error::Contract(format!(
                    "dispatch stalled with {} undispatched tests",
                    self.partitions.total()
                )));
            }

            tokio::select! {
                Some(done) = self.rx.recv() => self.handle_completion(done)?,
                _ = gate.wait_change(), if !gate.is_open() => {}
                _ = self.cancel.cancelled() => {}
            }
        }

        // cancellation leaves in-flight units to finish at their own pace
        while self.running > 0 {
            match self.rx.recv().await {
                Some(done) => self.handle_completion(done)?,
                None => break,
            }
        }
        while self.teardowns.join_next().await.is_some() {}
        Ok(())
    }

    /// Dispatch every currently-eligible unit, cascading dependency
    /// failures as they surface
    ///
    /// Each settled cascade counts as progress: it resolves a wait and can
    /// unblock (or doom) units further down the chain, so the wave re-scans
    /// until a pass changes nothing.
    fn dispatch_wave(&mut self) -> Result<usize> {
        let mut dispatched = 0;
        loop {
            let mut progressed = false;

            // pool and keyed partitions, while capacity lasts
            while !self.serial_running && self.running < self.options.max_concurrency {
                let scan = self.next_pool_or_keyed()?;
                progressed |= scan.cascaded;
                let Some(id) = scan.picked else {
                    break;
                };
                self.spawn_attempt(id)?;
                dispatched += 1;
                progressed = true;
            }

            // serial queue only once everything else has settled
            if self.running == 0 && !self.serial_running {
                let scan = self.next_from_queue(QueueRef::Serial)?;
                progressed |= scan.cascaded;
                if let Some(id) = scan.picked {
                    self.serial_running = true;
                    self.spawn_attempt(id)?;
                    dispatched += 1;
                    progressed = true;
                }
            }

            if !progressed {
                return Ok(dispatched);
            }
        }
    }

    fn next_pool_or_keyed(&mut self) -> Result<Scan> {
        let mut cascaded = false;
        let scan = self.next_from_queue(QueueRef::Pool)?;
        cascaded |= scan.cascaded;
        if scan.picked.is_some() {
            return Ok(Scan {
                picked: scan.picked,
                cascaded,
            });
        }
        let idle_keys: Vec<String> = self
            .partitions
            .keyed
            .keys()
            .filter(|k| !self.running_keys.contains(*k))
            .cloned()
            .collect();
        for key in idle_keys {
            let scan = self.next_from_queue(QueueRef::Keyed(&key))?;
            cascaded |= scan.cascaded;
            if scan.picked.is_some() {
                self.running_keys.insert(key);
                return Ok(Scan {
                    picked: scan.picked,
                    cascaded,
                });
            }
        }
        Ok(Scan {
            picked: None,
            cascaded,
        })
    }

    /// Pull the first eligible unit from one queue, settling any cascades
    /// found along the way
    fn next_from_queue(&mut self, which: QueueRef<'_>) -> Result<Scan> {
        let mut cascades: Vec<(TestId, String)> = Vec::new();
        let picked = {
            let queue = match which {
                QueueRef::Pool => &mut self.partitions.pool,
                QueueRef::Keyed(key) => match self.partitions.keyed.get_mut(key) {
                    Some(queue) => queue,
                    None => {
                        return Ok(Scan {
                            picked: None,
                            cascaded: false,
                        })
                    }
                },
                QueueRef::Serial => &mut self.partitions.serial,
            };
            scan_queue(queue, &self.graph, &self.terminal, &mut cascades)
        };
        let cascaded = !cascades.is_empty();
        for (id, dependency) in cascades {
            self.settle_unexecuted(
                &id,
                TestState::Failed,
                Some(Error::DependencyFailed { dependency }.to_string()),
            );
        }
        Ok(Scan { picked, cascaded })
    }

    /// Spawn one attempt as a worker unit
    fn spawn_attempt(&mut self, id: TestId) -> Result<()> {
        let node = self
            .nodes
            .get_mut(&id)
            .ok_or_else(|| Error::Contract(format!("dispatched unknown test {id}")))?;
        node.attempts_made += 1;
        node.test.state = TestState::Running;
        let attempt = node.attempts_made - 1;
        let rebuild = std::mem::take(&mut node.needs_rebuild);
        let test = node.test.clone();
        debug!(id = %id, attempt, "dispatching");

        let invoker = self.invoker.clone();
        let factory = self.factory.clone();
        let results = self.results.clone();
        let sinks = self.sinks.clone();
        let cancel = self.cancel.clone();
        let timeout_ms = self.options.default_timeout_ms;
        let tx = self.tx.clone();
        self.running += 1;

        tokio::spawn(async move {
            let started_at = Utc::now();
            let outcome = run_attempt(test.clone(), rebuild, invoker, factory, timeout_ms, cancel).await;
            let record = TestResultRecord {
                id: test.id.clone(),
                display_name: test.display_name.clone(),
                attempt,
                state: outcome.state,
                started_at: Some(started_at),
                ended_at: Some(Utc::now()),
                error: outcome.error.clone(),
            };
            results.lock().push(record.clone());
            for sink in sinks.iter() {
                sink.on_result(&record);
            }
            let _ = tx.send(Completion {
                id: test.id,
                state: outcome.state,
                error: outcome.error,
            });
        });
        Ok(())
    }

    fn handle_completion(&mut self, done: Completion) -> Result<()> {
        self.running -= 1;
        let node = self
            .nodes
            .get_mut(&done.id)
            .ok_or_else(|| Error::Contract(format!("completion for unknown test {}", done.id)))?;
        match &node.test.constraint {
            ParallelConstraint::Keyed(key) => {
                self.running_keys.remove(key);
            }
            ParallelConstraint::Serial { .. } => {
                self.serial_running = false;
            }
            ParallelConstraint::Unconstrained => {}
        }

        let retry = done.state == TestState::Failed
            && node.remaining_retries > 0
            && !self.cancel.is_cancelled();
        if retry {
            node.remaining_retries -= 1;
            node.test.state = TestState::Waiting;
            node.needs_rebuild = self.options.retry_rebuilds_instance;
            info!(
                id = %done.id,
                remaining = node.remaining_retries,
                "retrying failed attempt"
            );
            let constraint = node.test.constraint.clone();
            self.partitions.requeue_front(&constraint, done.id);
        } else {
            self.mark_terminal(&done.id, done.state, done.error);
        }
        Ok(())
    }

    /// Record a unit that terminates without ever being dispatched
    /// (pre-failed, cascade-failed, skipped, cancelled)
    fn settle_unexecuted(&mut self, id: &TestId, state: TestState, error: Option<String>) {
        let Some(node) = self.nodes.get(id) else {
            return;
        };
        let record = TestResultRecord {
            id: id.clone(),
            display_name: node.test.display_name.clone(),
            attempt: 0,
            state,
            started_at: None,
            ended_at: None,
            error: error.clone(),
        };
        self.results.lock().push(record.clone());
        for sink in self.sinks.iter() {
            sink.on_result(&record);
        }
        self.mark_terminal(id, state, error);
    }

    fn mark_terminal(&mut self, id: &TestId, state: TestState, error: Option<String>) {
        let class = if let Some(node) = self.nodes.get_mut(id) {
            node.test.state = state;
            if node.test.error.is_none() {
                node.test.error = error;
            }
            node.test.class_name.clone()
        } else {
            return;
        };
        self.terminal.insert(id.clone(), state);
        debug!(id = %id, state = %state, "terminal");

        let done = match self.class_remaining.get_mut(&class) {
            Some(remaining) => {
                *remaining = remaining.saturating_sub(1);
                *remaining == 0
            }
            None => false,
        };
        if done && self.teardown_claims.insert(class.clone(), ()).is_none() {
            // first observer of the class's last terminal test
            let factory = self.factory.clone();
            self.teardowns.spawn(async move {
                debug!(class = %class, "firing per-class teardown");
                factory.teardown_class(&class).await;
            });
        }
    }

    /// Mark everything still queued as skipped after cancellation
    fn drain_cancelled(&mut self) {
        let undispatched = self.partitions.drain_all();
        if !undispatched.is_empty() {
            warn!(count = undispatched.len(), "cancellation skipped queued tests");
        }
        for id in undispatched {
            self.settle_unexecuted(&id, TestState::Skipped, Some("run cancelled".to_string()));
        }
    }
}

enum QueueRef<'a> {
    Pool,
    Keyed(&'a str),
    Serial,
}

/// Outcome of scanning one partition queue
struct Scan {
    picked: Option<TestId>,
    cascaded: bool,
}

/// Classify every unit from the front of `queue` until one is ready,
/// removing ready and cascaded units and leaving blocked ones in place
fn scan_queue(
    queue: &mut VecDeque<TestId>,
    graph: &DependencyGraph,
    terminal: &HashMap<TestId, TestState>,
    cascades: &mut Vec<(TestId, String)>,
) -> Option<TestId> {
    let mut index = 0;
    while index < queue.len() {
        let id = &queue[index];
        match gate_of(id, graph, terminal) {
            Gate::Ready => return queue.remove(index),
            Gate::Cascade(dependency) => {
                if let Some(id) = queue.remove(index) {
                    cascades.push((id, dependency));
                }
                // re-examine the unit that shifted into this slot
            }
            Gate::Blocked => index += 1,
        }
    }
    None
}

fn gate_of(id: &TestId, graph: &DependencyGraph, terminal: &HashMap<TestId, TestState>) -> Gate {
    let mut blocked = false;
    for edge in graph.dependencies_of(id) {
        match terminal.get(&edge.target) {
            Some(TestState::Failed) if !edge.proceed_on_failure => {
                return Gate::Cascade(graph.method_name_of(&edge.target).to_string());
            }
            Some(_) => {}
            None => blocked = true,
        }
    }
    if blocked {
        Gate::Blocked
    } else {
        Gate::Ready
    }
}

/// Execute one attempt: optional instance rebuild, panic isolation,
/// timeout, and cancellation observed at suspension points
async fn run_attempt(
    test: ExecutableTest,
    rebuild: bool,
    invoker: Arc<dyn TestInvoker>,
    factory: Arc<dyn InstanceFactory>,
    timeout_ms: u64,
    cancel: CancellationToken,
) -> InvocationOutcome {
    let instance = if rebuild {
        match factory
            .construct(&test.class_name, &test.class_binding, &test.class_args)
            .await
        {
            Ok(Some(instance)) => Some(instance),
            Ok(None) => {
                return InvocationOutcome::failed(
                    Error::InstanceConstruction {
                        class: test.class_name.clone(),
                        message: "factory returned no instance on rebuild".to_string(),
                    }
                    .to_string(),
                )
            }
            Err(e) => return InvocationOutcome::failed(e.to_string()),
        }
    } else {
        test.instance.clone()
    };
    let Some(instance) = instance else {
        return InvocationOutcome::failed("test has no constructed instance".to_string());
    };

    // a panicking test body fails its own attempt, nothing else
    let body = tokio::spawn(async move {
        invoker
            .invoke(&instance, &test.method_name, &test.method_binding, &test.method_args)
            .await
    });
    let guarded = async move {
        match body.await {
            Ok(outcome) => outcome,
            Err(_) => InvocationOutcome::failed("test body panicked".to_string()),
        }
    };

    tokio::select! {
        _ = cancel.cancelled() => InvocationOutcome::skipped("run cancelled"),
        outcome = with_timeout(timeout_ms, guarded) => outcome,
    }
}

async fn with_timeout(
    timeout_ms: u64,
    body: impl std::future::Future<Output = InvocationOutcome>,
) -> InvocationOutcome {
    if timeout_ms == 0 {
        return body.await;
    }
    match tokio::time::timeout(Duration::from_millis(timeout_ms), body).await {
        Ok(outcome) => outcome,
        Err(_) => InvocationOutcome::failed(Error::Timeout(timeout_ms).to_string()),
    }
}
