//! Parallelism partitions
//!
//! Derived from the executable set at schedule-build time: an unconstrained
//! pool, one private FIFO queue per not-in-parallel key, and a single global
//! serial queue ordered by declared priority then discovery order. Tests
//! that arrive already terminal are never enqueued.

use lattice_core::{ExecutableTest, ParallelConstraint, TestId};
use std::collections::{BTreeMap, VecDeque};

/// The three dispatch partitions
#[derive(Debug, Default)]
pub struct Partitions {
    /// Unconstrained pool, discovery order
    pub pool: VecDeque<TestId>,
    /// Keyed mutual-exclusion queues; keys never block each other
    pub keyed: BTreeMap<String, VecDeque<TestId>>,
    /// Fully-serial queue, priority then discovery order
    pub serial: VecDeque<TestId>,
}

impl Partitions {
    /// Partition the executable set
    pub fn build(tests: &[ExecutableTest]) -> Self {
        let mut pool = VecDeque::new();
        let mut keyed: BTreeMap<String, VecDeque<TestId>> = BTreeMap::new();
        let mut serial: Vec<(u32, usize, TestId)> = Vec::new();

        for (discovery_index, test) in tests.iter().enumerate() {
            if test.is_pre_terminal() {
                continue;
            }
            match &test.constraint {
                ParallelConstraint::Unconstrained => pool.push_back(test.id.clone()),
                ParallelConstraint::Keyed(key) => keyed
                    .entry(key.clone())
                    .or_default()
                    .push_back(test.id.clone()),
                ParallelConstraint::Serial { priority } => {
                    serial.push((*priority, discovery_index, test.id.clone()))
                }
            }
        }

        serial.sort_by(|a, b| (a.0, a.1).cmp(&(b.0, b.1)));
        Self {
            pool,
            keyed,
            serial: serial.into_iter().map(|(_, _, id)| id).collect(),
        }
    }

    /// Put a retried test back at the front of its partition
    ///
    /// The test just vacated its slot, so front placement preserves FIFO for
    /// everything queued behind it.
    pub fn requeue_front(&mut self, constraint: &ParallelConstraint, id: TestId) {
        match constraint {
            ParallelConstraint::Unconstrained => self.pool.push_front(id),
            ParallelConstraint::Keyed(key) => {
                self.keyed.entry(key.clone()).or_default().push_front(id)
            }
            ParallelConstraint::Serial { .. } => self.serial.push_front(id),
        }
    }

    /// Number of undispatched tests across all partitions
    pub fn total(&self) -> usize {
        self.pool.len()
            + self.keyed.values().map(VecDeque::len).sum::<usize>()
            + self.serial.len()
    }

    /// Whether every partition is drained
    pub fn is_empty(&self) -> bool {
        self.total() == 0
    }

    /// Drain every queue, in partition order
    pub fn drain_all(&mut self) -> Vec<TestId> {
        let mut out: Vec<TestId> = self.pool.drain(..).collect();
        for queue in self.keyed.values_mut() {
            out.extend(queue.drain(..));
        }
        out.extend(self.serial.drain(..));
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use lattice_core::{Error, GenericBinding, TestState};

    fn constrained(id: &str, constraint: ParallelConstraint) -> ExecutableTest {
        ExecutableTest {
            id: TestId::new(id),
            display_name: id.to_string(),
            class_name: "C".to_string(),
            method_name: id.to_string(),
            method_param_types: Vec::new(),
            instance: None,
            class_binding: GenericBinding::empty(),
            method_binding: GenericBinding::empty(),
            class_args: Vec::new(),
            method_args: Vec::new(),
            depends_on: Vec::new(),
            constraint,
            retry_limit: 0,
            state: TestState::Pending,
            error: None,
            skip_reason: None,
        }
    }

    #[test]
    fn test_partitions_route_by_constraint() {
        let tests = vec![
            constrained("p1", ParallelConstraint::Unconstrained),
            constrained("k1", ParallelConstraint::Keyed("db".into())),
            constrained("k2", ParallelConstraint::Keyed("db".into())),
            constrained("k3", ParallelConstraint::Keyed("fs".into())),
            constrained("s1", ParallelConstraint::serial()),
        ];
        let partitions = Partitions::build(&tests);
        assert_eq!(partitions.pool.len(), 1);
        assert_eq!(partitions.keyed.len(), 2);
        assert_eq!(partitions.keyed["db"].len(), 2);
        assert_eq!(partitions.serial.len(), 1);
        assert_eq!(partitions.total(), 5);
    }

    #[test]
    fn test_serial_queue_sorts_by_priority_then_discovery() {
        let tests = vec![
            constrained("late", ParallelConstraint::Serial { priority: 900 }),
            constrained("mid_a", ParallelConstraint::serial()),
            constrained("early", ParallelConstraint::Serial { priority: 10 }),
            constrained("mid_b", ParallelConstraint::serial()),
        ];
        let partitions = Partitions::build(&tests);
        let order: Vec<&str> = partitions.serial.iter().map(TestId::as_str).collect();
        assert_eq!(order, vec!["early", "mid_a", "mid_b", "late"]);
    }

    #[test]
    fn test_pre_terminal_tests_are_not_enqueued() {
        let failed = ExecutableTest::failed(
            TestId::new("dead"),
            "dead",
            "C",
            "dead",
            &Error::GenericResolution("x".into()),
        );
        let tests = vec![failed, constrained("live", ParallelConstraint::Unconstrained)];
        let partitions = Partitions::build(&tests);
        assert_eq!(partitions.total(), 1);
    }

    #[test]
    fn test_requeue_front_preserves_key_order() {
        let tests = vec![
            constrained("k1", ParallelConstraint::Keyed("db".into())),
            constrained("k2", ParallelConstraint::Keyed("db".into())),
        ];
        let mut partitions = Partitions::build(&tests);
        let head = partitions.keyed.get_mut("db").unwrap().pop_front().unwrap();
        partitions.requeue_front(&ParallelConstraint::Keyed("db".into()), head);
        assert_eq!(partitions.keyed["db"].front().unwrap().as_str(), "k1");
    }
}
