//! Integration tests for the dispatch loop
//!
//! Tests for:
//! - dependency ordering and failure cascades
//! - cycle failures
//! - per-attempt retry with and without instance rebuild
//! - keyed mutual exclusion and the serial queue
//! - per-class teardown firing exactly once
//! - cancellation and timeout

use async_trait::async_trait;
use lattice_core::{
    ArgValue, DependsOn, Error, ExecutableTest, GenericBinding, Instance, InstanceFactory,
    InvocationOutcome, ParallelConstraint, Result, ResultSink, TestId, TestInvoker,
    TestResultRecord, TestState,
};
use lattice_scheduler::{CpuGate, Scheduler, SchedulerOptions};
use parking_lot::Mutex;
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

/// Invoker driven by a per-method script of outcomes
#[derive(Default)]
struct ScriptedInvoker {
    scripts: Mutex<HashMap<String, VecDeque<InvocationOutcome>>>,
    delay: Option<Duration>,
    current: AtomicU32,
    peak: AtomicU32,
}

impl ScriptedInvoker {
    fn script(self, method: &str, outcomes: Vec<InvocationOutcome>) -> Self {
        self.scripts
            .lock()
            .insert(method.to_string(), outcomes.into());
        self
    }

    fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }
}

#[async_trait]
impl TestInvoker for ScriptedInvoker {
    async fn invoke(
        &self,
        _instance: &Instance,
        method: &str,
        _generic_args: &GenericBinding,
        _args: &[ArgValue],
    ) -> InvocationOutcome {
        let now = self.current.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak.fetch_max(now, Ordering::SeqCst);
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        let outcome = self
            .scripts
            .lock()
            .get_mut(method)
            .and_then(VecDeque::pop_front)
            .unwrap_or_else(InvocationOutcome::passed);
        self.current.fetch_sub(1, Ordering::SeqCst);
        outcome
    }
}

#[derive(Default)]
struct CountingFactory {
    constructed: AtomicU32,
    teardowns: Mutex<Vec<String>>,
}

#[async_trait]
impl InstanceFactory for CountingFactory {
    async fn construct(
        &self,
        _class: &str,
        _generic_args: &GenericBinding,
        _ctor_args: &[ArgValue],
    ) -> Result<Option<Instance>> {
        self.constructed.fetch_add(1, Ordering::SeqCst);
        Ok(Some(Arc::new(()) as Instance))
    }

    async fn teardown_class(&self, class: &str) {
        self.teardowns.lock().push(class.to_string());
    }
}

#[derive(Default)]
struct CollectingSink {
    records: Mutex<Vec<TestResultRecord>>,
}

impl ResultSink for CollectingSink {
    fn on_result(&self, record: &TestResultRecord) {
        self.records.lock().push(record.clone());
    }
}

fn runnable(id: &str, class: &str, method: &str) -> ExecutableTest {
    ExecutableTest {
        id: TestId::new(id),
        display_name: format!("{method}()"),
        class_name: class.to_string(),
        method_name: method.to_string(),
        method_param_types: Vec::new(),
        instance: Some(Arc::new(()) as Instance),
        class_binding: GenericBinding::empty(),
        method_binding: GenericBinding::empty(),
        class_args: Vec::new(),
        method_args: Vec::new(),
        depends_on: Vec::new(),
        constraint: ParallelConstraint::Unconstrained,
        retry_limit: 0,
        state: TestState::Pending,
        error: None,
        skip_reason: None,
    }
}

fn quick_options() -> SchedulerOptions {
    SchedulerOptions {
        max_concurrency: 4,
        cpu_ceiling_percent: 100.0,
        cpu_sample_interval_ms: 50,
        default_timeout_ms: 0,
        retry_rebuilds_instance: false,
    }
}

fn scheduler(invoker: ScriptedInvoker, options: SchedulerOptions) -> (Scheduler, Arc<CountingFactory>, Arc<CollectingSink>) {
    let factory = Arc::new(CountingFactory::default());
    let sink = Arc::new(CollectingSink::default());
    let scheduler = Scheduler::new(
        Arc::new(invoker),
        factory.clone(),
        vec![sink.clone()],
        options,
    );
    (scheduler, factory, sink)
}

fn init_tracing() {
    let _ = tracing_subscriber::fmt().with_test_writer().try_init();
}

fn final_state(records: &[TestResultRecord], id: &str) -> TestState {
    records
        .iter()
        .rev()
        .find(|r| r.id.as_str() == id)
        .map(|r| r.state)
        .expect("no record for id")
}

// ============================================================================
// Dependency Ordering
// ============================================================================

#[tokio::test]
async fn test_dependent_starts_after_dependency_ends() {
    let mut dependent = runnable("b", "C", "B");
    dependent.depends_on = vec![DependsOn::id("a")];
    let tests = vec![dependent, runnable("a", "C", "A")];

    let invoker = ScriptedInvoker::default().with_delay(Duration::from_millis(20));
    let (scheduler, _, _) = scheduler(invoker, quick_options());
    let summary = scheduler.run(tests, CancellationToken::new()).await.unwrap();

    let a_end = summary
        .records
        .iter()
        .find(|r| r.id.as_str() == "a")
        .and_then(|r| r.ended_at)
        .unwrap();
    let b_start = summary
        .records
        .iter()
        .find(|r| r.id.as_str() == "b")
        .and_then(|r| r.started_at)
        .unwrap();
    assert!(b_start >= a_end, "dependent started before dependency ended");
    assert!(summary.all_green());
}

#[tokio::test]
async fn test_failed_dependency_cascades_and_names_it() {
    let mut dependent = runnable("a", "C", "A");
    dependent.depends_on = vec![DependsOn::method("C", "B")];
    let tests = vec![runnable("b", "C", "B"), dependent];

    let invoker =
        ScriptedInvoker::default().script("B", vec![InvocationOutcome::failed("assert failed")]);
    let (scheduler, _, _) = scheduler(invoker, quick_options());
    let summary = scheduler.run(tests, CancellationToken::new()).await.unwrap();

    let a = summary
        .records
        .iter()
        .find(|r| r.id.as_str() == "a")
        .unwrap();
    assert_eq!(a.state, TestState::Failed);
    // never dispatched: no timestamps
    assert!(a.started_at.is_none());
    assert!(a.error.as_deref().unwrap().contains("B"));
}

#[tokio::test]
async fn test_proceed_on_failure_runs_the_dependent() {
    let mut dependent = runnable("a", "C", "A");
    dependent.depends_on = vec![DependsOn::method("C", "B").proceed_on_failure()];
    let tests = vec![runnable("b", "C", "B"), dependent];

    let invoker =
        ScriptedInvoker::default().script("B", vec![InvocationOutcome::failed("assert failed")]);
    let (scheduler, _, _) = scheduler(invoker, quick_options());
    let summary = scheduler.run(tests, CancellationToken::new()).await.unwrap();

    assert_eq!(final_state(&summary.records, "a"), TestState::Passed);
    assert_eq!(final_state(&summary.records, "b"), TestState::Failed);
}

#[tokio::test]
async fn test_cascade_satisfies_transitive_dependents() {
    // c -> b -> a, a fails: both b and c cascade
    let mut b = runnable("b", "C", "B");
    b.depends_on = vec![DependsOn::id("a")];
    let mut c = runnable("c", "C", "Cm");
    c.depends_on = vec![DependsOn::id("b")];
    let tests = vec![runnable("a", "C", "A"), b, c];

    let invoker =
        ScriptedInvoker::default().script("A", vec![InvocationOutcome::failed("boom")]);
    let (scheduler, _, _) = scheduler(invoker, quick_options());
    let summary = scheduler.run(tests, CancellationToken::new()).await.unwrap();

    assert_eq!(final_state(&summary.records, "b"), TestState::Failed);
    assert_eq!(final_state(&summary.records, "c"), TestState::Failed);
    let c_record = summary.records.iter().find(|r| r.id.as_str() == "c").unwrap();
    // c's message names b, its direct dependency, not the whole chain
    assert!(c_record.error.as_deref().unwrap().contains("B"));
}

// ============================================================================
// Cycles
// ============================================================================

#[tokio::test]
async fn test_cycle_fails_both_participants_with_path() {
    let mut a = runnable("a", "C", "A");
    a.depends_on = vec![DependsOn::method("C", "B")];
    let mut b = runnable("b", "C", "B");
    b.depends_on = vec![DependsOn::method("C", "A")];

    let (scheduler, _, _) = scheduler(ScriptedInvoker::default(), quick_options());
    let summary = scheduler
        .run(vec![a, b], CancellationToken::new())
        .await
        .unwrap();

    for id in ["a", "b"] {
        let record = summary.records.iter().find(|r| r.id.as_str() == id).unwrap();
        assert_eq!(record.state, TestState::Failed);
        let message = record.error.as_deref().unwrap();
        assert!(
            message.contains("A > B > A") || message.contains("B > A > B"),
            "unexpected path: {message}"
        );
    }
}

#[tokio::test]
async fn test_unresolved_dependency_fails_declaring_node_only() {
    let mut a = runnable("a", "C", "A");
    a.depends_on = vec![DependsOn::id("ghost")];
    let tests = vec![a, runnable("b", "C", "B")];

    let (scheduler, _, _) = scheduler(ScriptedInvoker::default(), quick_options());
    let summary = scheduler.run(tests, CancellationToken::new()).await.unwrap();

    assert_eq!(final_state(&summary.records, "a"), TestState::Failed);
    assert_eq!(final_state(&summary.records, "b"), TestState::Passed);
}

#[tokio::test]
async fn test_duplicate_identity_aborts_the_run() {
    let tests = vec![runnable("a", "C", "A"), runnable("a", "C", "A")];
    let (scheduler, _, _) = scheduler(ScriptedInvoker::default(), quick_options());
    let err = scheduler
        .run(tests, CancellationToken::new())
        .await
        .unwrap_err();
    assert!(matches!(err, Error::Contract(_)));
}

// ============================================================================
// Retry
// ============================================================================

#[tokio::test]
async fn test_retry_produces_one_record_per_attempt() {
    let mut test = runnable("a", "C", "A");
    test.retry_limit = 2;
    let invoker = ScriptedInvoker::default().script(
        "A",
        vec![
            InvocationOutcome::failed("flaky 1"),
            InvocationOutcome::failed("flaky 2"),
            InvocationOutcome::passed(),
        ],
    );
    let (scheduler, _, sink) = scheduler(invoker, quick_options());
    let summary = scheduler
        .run(vec![test], CancellationToken::new())
        .await
        .unwrap();

    let attempts: Vec<u32> = summary.records.iter().map(|r| r.attempt).collect();
    assert_eq!(attempts, vec![0, 1, 2]);
    assert_eq!(final_state(&summary.records, "a"), TestState::Passed);
    assert!(summary.all_green());
    // sinks observed every attempt as it completed
    assert_eq!(sink.records.lock().len(), 3);
}

#[tokio::test]
async fn test_retry_budget_exhaustion_is_failed() {
    let mut test = runnable("a", "C", "A");
    test.retry_limit = 1;
    let invoker = ScriptedInvoker::default().script(
        "A",
        vec![
            InvocationOutcome::failed("flaky 1"),
            InvocationOutcome::failed("flaky 2"),
        ],
    );
    let (scheduler, _, _) = scheduler(invoker, quick_options());
    let summary = scheduler
        .run(vec![test], CancellationToken::new())
        .await
        .unwrap();
    assert_eq!(summary.records.len(), 2);
    assert_eq!(final_state(&summary.records, "a"), TestState::Failed);
}

#[tokio::test]
async fn test_retry_rebuilds_instance_when_configured() {
    let mut test = runnable("a", "C", "A");
    test.retry_limit = 1;
    let invoker = ScriptedInvoker::default().script(
        "A",
        vec![InvocationOutcome::failed("flaky"), InvocationOutcome::passed()],
    );
    let mut options = quick_options();
    options.retry_rebuilds_instance = true;
    let (scheduler, factory, _) = scheduler(invoker, options);
    let summary = scheduler
        .run(vec![test], CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(final_state(&summary.records, "a"), TestState::Passed);
    // the only construction is the retry rebuild; the first attempt used
    // the instance built during expansion
    assert_eq!(factory.constructed.load(Ordering::SeqCst), 1);
}

// ============================================================================
// Partitions
// ============================================================================

#[tokio::test]
async fn test_keyed_tests_never_overlap() {
    let mut tests = Vec::new();
    for i in 0..4 {
        let mut t = runnable(&format!("k{i}"), "C", "K");
        t.constraint = ParallelConstraint::Keyed("db".into());
        tests.push(t);
    }
    let invoker = ScriptedInvoker::default().with_delay(Duration::from_millis(10));
    let factory = Arc::new(CountingFactory::default());
    let invoker = Arc::new(invoker);
    let scheduler = Scheduler::new(invoker.clone(), factory, Vec::new(), quick_options());
    let summary = scheduler.run(tests, CancellationToken::new()).await.unwrap();

    assert!(summary.all_green());
    assert_eq!(invoker.peak.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_different_keys_run_concurrently() {
    let mut first = runnable("k1", "C", "K");
    first.constraint = ParallelConstraint::Keyed("db".into());
    let mut second = runnable("k2", "C", "K");
    second.constraint = ParallelConstraint::Keyed("fs".into());

    let invoker = Arc::new(ScriptedInvoker::default().with_delay(Duration::from_millis(30)));
    let factory = Arc::new(CountingFactory::default());
    let scheduler = Scheduler::new(invoker.clone(), factory, Vec::new(), quick_options());
    let summary = scheduler
        .run(vec![first, second], CancellationToken::new())
        .await
        .unwrap();

    assert!(summary.all_green());
    assert_eq!(invoker.peak.load(Ordering::SeqCst), 2);
}

#[tokio::test]
async fn test_serial_tests_run_alone_and_last() {
    let mut serial = runnable("s", "C", "S");
    serial.constraint = ParallelConstraint::serial();
    let tests = vec![serial, runnable("p1", "C", "P"), runnable("p2", "C", "P")];

    let invoker = Arc::new(ScriptedInvoker::default().with_delay(Duration::from_millis(10)));
    let factory = Arc::new(CountingFactory::default());
    let scheduler = Scheduler::new(invoker.clone(), factory, Vec::new(), quick_options());
    let summary = scheduler.run(tests, CancellationToken::new()).await.unwrap();

    assert!(summary.all_green());
    assert_eq!(invoker.peak.load(Ordering::SeqCst), 2); // only the pool overlapped
    // the serial unit completed after every pool unit
    let serial_end = summary
        .records
        .iter()
        .find(|r| r.id.as_str() == "s")
        .and_then(|r| r.ended_at)
        .unwrap();
    for pool in ["p1", "p2"] {
        let end = summary
            .records
            .iter()
            .find(|r| r.id.as_str() == pool)
            .and_then(|r| r.ended_at)
            .unwrap();
        assert!(serial_end >= end);
    }
}

#[tokio::test]
async fn test_serial_priority_orders_the_queue() {
    let mut late = runnable("late", "C", "L");
    late.constraint = ParallelConstraint::Serial { priority: 900 };
    let mut early = runnable("early", "C", "E");
    early.constraint = ParallelConstraint::Serial { priority: 10 };
    let tests = vec![late, early];

    let (scheduler, _, _) = scheduler(ScriptedInvoker::default(), quick_options());
    let summary = scheduler.run(tests, CancellationToken::new()).await.unwrap();
    let order: Vec<&str> = summary.records.iter().map(|r| r.id.as_str()).collect();
    assert_eq!(order, vec!["early", "late"]);
}

// ============================================================================
// Admission Control
// ============================================================================

#[tokio::test]
async fn test_closed_admission_gate_pauses_dispatch() {
    init_tracing();
    let tests = vec![runnable("a", "C", "A"), runnable("b", "C", "B")];
    let (gate, admit) = CpuGate::manual();
    let invoker = Arc::new(ScriptedInvoker::default().with_delay(Duration::from_millis(10)));
    let factory = Arc::new(CountingFactory::default());
    let scheduler = Scheduler::new(invoker.clone(), factory, Vec::new(), quick_options())
        .with_admission_gate(gate);

    let run = tokio::spawn(async move { scheduler.run(tests, CancellationToken::new()).await });
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(
        invoker.peak.load(Ordering::SeqCst),
        0,
        "a unit was dispatched while the gate was closed"
    );

    admit.send(true).unwrap();
    let summary = run.await.unwrap().unwrap();
    assert!(summary.all_green());
    assert_eq!(summary.total(), 2);
}

// ============================================================================
// Teardown
// ============================================================================

#[tokio::test]
async fn test_teardown_fires_once_per_class() {
    let tests = vec![
        runnable("a1", "ClassA", "m"),
        runnable("a2", "ClassA", "m2"),
        runnable("b1", "ClassB", "m"),
    ];
    let (scheduler, factory, _) = scheduler(ScriptedInvoker::default(), quick_options());
    scheduler
        .run(tests, CancellationToken::new())
        .await
        .unwrap();

    let mut teardowns = factory.teardowns.lock().clone();
    teardowns.sort();
    assert_eq!(teardowns, vec!["ClassA", "ClassB"]);
}

#[tokio::test]
async fn test_teardown_fires_for_pre_failed_classes() {
    let dead = ExecutableTest::failed(
        TestId::new("dead"),
        "dead",
        "ClassDead",
        "m",
        &Error::GenericResolution("x".into()),
    );
    let (scheduler, factory, _) = scheduler(ScriptedInvoker::default(), quick_options());
    scheduler
        .run(vec![dead], CancellationToken::new())
        .await
        .unwrap();
    assert_eq!(factory.teardowns.lock().as_slice(), ["ClassDead"]);
}

// ============================================================================
// Cancellation & Timeout
// ============================================================================

#[tokio::test]
async fn test_pre_cancelled_run_skips_everything() {
    let tests = vec![runnable("a", "C", "A"), runnable("b", "C", "B")];
    let cancel = CancellationToken::new();
    cancel.cancel();

    let (scheduler, _, _) = scheduler(ScriptedInvoker::default(), quick_options());
    let summary = scheduler.run(tests, cancel).await.unwrap();
    assert_eq!(summary.count(TestState::Skipped), 2);
    for record in &summary.records {
        assert!(record.error.as_deref().unwrap().contains("cancelled"));
        assert!(record.started_at.is_none());
    }
}

#[tokio::test]
async fn test_mid_run_cancellation_skips_queued_and_in_flight() {
    init_tracing();
    let tests = vec![runnable("inflight", "C", "A"), runnable("queued", "C", "B")];
    let invoker = ScriptedInvoker::default().with_delay(Duration::from_millis(200));
    let mut options = quick_options();
    options.max_concurrency = 1;
    let (scheduler, _, _) = scheduler(invoker, options);

    let cancel = CancellationToken::new();
    let trigger = cancel.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(40)).await;
        trigger.cancel();
    });
    let summary = scheduler.run(tests, cancel).await.unwrap();

    // the dispatched unit observed the token at its suspension point
    let inflight = summary
        .records
        .iter()
        .find(|r| r.id.as_str() == "inflight")
        .unwrap();
    assert_eq!(inflight.state, TestState::Skipped);
    assert!(inflight.started_at.is_some());
    // the queued unit was never dispatched
    let queued = summary.records.iter().find(|r| r.id.as_str() == "queued").unwrap();
    assert_eq!(queued.state, TestState::Skipped);
    assert!(queued.started_at.is_none());
    assert!(queued.error.as_deref().unwrap().contains("cancelled"));
}

#[tokio::test]
async fn test_timeout_fails_the_attempt() {
    let test = runnable("slow", "C", "Slow");
    let invoker = ScriptedInvoker::default().with_delay(Duration::from_millis(200));
    let mut options = quick_options();
    options.default_timeout_ms = 20;
    let (scheduler, _, _) = scheduler(invoker, options);
    let summary = scheduler
        .run(vec![test], CancellationToken::new())
        .await
        .unwrap();

    let record = &summary.records[0];
    assert_eq!(record.state, TestState::Failed);
    assert!(record.error.as_deref().unwrap().contains("timed out"));
}

// ============================================================================
// Pre-terminal Inputs
// ============================================================================

#[tokio::test]
async fn test_pre_failed_tests_are_recorded_not_dispatched() {
    let dead = ExecutableTest::failed(
        TestId::new("dead"),
        "dead",
        "C",
        "m",
        &Error::DataGeneration {
            source: "rows".into(),
            message: "boom".into(),
        },
    );
    let tests = vec![dead, runnable("live", "C", "L")];
    let (scheduler, _, _) = scheduler(ScriptedInvoker::default(), quick_options());
    let summary = scheduler.run(tests, CancellationToken::new()).await.unwrap();

    assert_eq!(final_state(&summary.records, "dead"), TestState::Failed);
    assert_eq!(final_state(&summary.records, "live"), TestState::Passed);
    let dead_record = summary.records.iter().find(|r| r.id.as_str() == "dead").unwrap();
    assert!(dead_record.error.as_deref().unwrap().contains("boom"));
}

#[tokio::test]
async fn test_skipped_test_satisfies_dependents() {
    let mut skipped = runnable("s", "C", "S");
    skipped.state = TestState::Skipped;
    skipped.skip_reason = Some("not on this platform".into());
    let mut dependent = runnable("d", "C", "D");
    dependent.depends_on = vec![DependsOn::id("s")];

    let (scheduler, _, _) = scheduler(ScriptedInvoker::default(), quick_options());
    let summary = scheduler
        .run(vec![skipped, dependent], CancellationToken::new())
        .await
        .unwrap();
    assert_eq!(final_state(&summary.records, "s"), TestState::Skipped);
    assert_eq!(final_state(&summary.records, "d"), TestState::Passed);
}
