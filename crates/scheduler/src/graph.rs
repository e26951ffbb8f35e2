//! Dependency graph over concrete test identities
//!
//! Declared depends-on targets are resolved against the executable set after
//! expansion: an identity target resolves to exactly one node, a method
//! target fans out to every identity expanded from that method (optionally
//! narrowed to one overload by its parameter-type list). An unresolvable
//! target fails the declaring node; it does not abort the run.
//!
//! Cycle detection is a three-color depth-first walk. Every node on a
//! discovered cycle is failed independently with the full rendered path,
//! because all of them are equally blocked. Nodes that are merely reachable
//! from a cycle are left alone here; they cascade at dispatch time when
//! their failed dependency resolves.

use lattice_core::{DependencyTarget, Error, ExecutableTest, Result, TestId};
use std::collections::HashMap;
use tracing::{debug, warn};

/// One resolved dependency edge
#[derive(Debug, Clone)]
pub struct DepEdge {
    /// Identity the declaring node waits on
    pub target: TestId,
    /// Run the declaring node even if the target failed
    pub proceed_on_failure: bool,
}

/// A node that cannot run for a structural reason found at graph build time
#[derive(Debug, Clone)]
pub struct GraphFailure {
    /// The affected node
    pub id: TestId,
    /// Why it cannot run
    pub error: Error,
}

/// Directed graph of resolved depends-on edges
///
/// Built once per run; immutable afterward. The scheduler consults it for
/// wait conditions and cascade decisions.
pub struct DependencyGraph {
    edges: HashMap<TestId, Vec<DepEdge>>,
    method_names: HashMap<TestId, String>,
    order: Vec<TestId>,
}

impl DependencyGraph {
    /// Resolve every declared dependency against the executable set
    ///
    /// Returns the graph plus the nodes whose declarations could not be
    /// resolved. A duplicate identity in the input is a bookkeeping defect,
    /// not a test outcome, and aborts the run.
    pub fn build(tests: &[ExecutableTest]) -> Result<(Self, Vec<GraphFailure>)> {
        let mut by_id: HashMap<&TestId, &ExecutableTest> = HashMap::new();
        for test in tests {
            if by_id.insert(&test.id, test).is_some() {
                return Err(Error::Contract(format!(
                    "duplicate test identity: {}",
                    test.id
                )));
            }
        }

        let mut by_method: HashMap<(&str, &str), Vec<&ExecutableTest>> = HashMap::new();
        for test in tests {
            by_method
                .entry((test.class_name.as_str(), test.method_name.as_str()))
                .or_default()
                .push(test);
        }

        let mut edges: HashMap<TestId, Vec<DepEdge>> = HashMap::new();
        let mut method_names = HashMap::new();
        let mut order = Vec::with_capacity(tests.len());
        let mut failures = Vec::new();

        for test in tests {
            method_names.insert(test.id.clone(), test.method_name.clone());
            order.push(test.id.clone());
            let mut resolved = Vec::new();

            for dep in &test.depends_on {
                match &dep.target {
                    DependencyTarget::Id(id) => {
                        if by_id.contains_key(id) {
                            resolved.push(DepEdge {
                                target: id.clone(),
                                proceed_on_failure: dep.proceed_on_failure,
                            });
                        } else {
                            warn!(node = %test.id, target = %id, "depends-on target not found");
                            failures.push(GraphFailure {
                                id: test.id.clone(),
                                error: Error::DependencyNotFound(id.to_string()),
                            });
                        }
                    }
                    DependencyTarget::Method {
                        class,
                        method,
                        param_types,
                    } => {
                        let matches: Vec<&&ExecutableTest> = by_method
                            .get(&(class.as_str(), method.as_str()))
                            .map(|candidates| {
                                candidates
                                    .iter()
                                    .filter(|c| match param_types {
                                        Some(types) => &c.method_param_types == types,
                                        None => true,
                                    })
                                    .collect()
                            })
                            .unwrap_or_default();
                        if matches.is_empty() {
                            warn!(node = %test.id, class = %class, method = %method, "depends-on target not found");
                            failures.push(GraphFailure {
                                id: test.id.clone(),
                                error: Error::DependencyNotFound(format!("{class}.{method}")),
                            });
                        } else {
                            // one declared edge fans out to every matching identity
                            for m in matches {
                                resolved.push(DepEdge {
                                    target: m.id.clone(),
                                    proceed_on_failure: dep.proceed_on_failure,
                                });
                            }
                        }
                    }
                }
            }
            edges.insert(test.id.clone(), resolved);
        }

        debug!(
            nodes = order.len(),
            unresolved = failures.len(),
            "dependency graph built"
        );
        Ok((
            Self {
                edges,
                method_names,
                order,
            },
            failures,
        ))
    }

    /// Resolved dependency edges of one node
    pub fn dependencies_of(&self, id: &TestId) -> &[DepEdge] {
        self.edges.get(id).map(Vec::as_slice).unwrap_or(&[])
    }

    /// Method name of one node, used for rendering paths and cascades
    pub fn method_name_of(&self, id: &TestId) -> &str {
        self.method_names
            .get(id)
            .map(String::as_str)
            .unwrap_or("<unknown>")
    }

    /// Detect every dependency cycle
    ///
    /// Three-color depth-first walk: nodes on the current path are gray,
    /// fully processed nodes are black, so converging diamond shapes are
    /// never misreported. Each participant of a cycle gets the same rendered
    /// path, e.g. `A > B > A`.
    pub fn detect_cycles(&self) -> Vec<GraphFailure> {
        let mut colors: HashMap<&TestId, Color> = HashMap::new();
        let mut failures = Vec::new();
        let mut failed: std::collections::HashSet<TestId> = std::collections::HashSet::new();

        for id in &self.order {
            if !colors.contains_key(id) {
                self.visit(id, &mut colors, &mut failures, &mut failed);
            }
        }
        failures
    }

    /// Walk one tree of the forest with an explicit frame stack; declared
    /// dependency chains can be arbitrarily deep
    fn visit<'a>(
        &'a self,
        root: &'a TestId,
        colors: &mut HashMap<&'a TestId, Color>,
        failures: &mut Vec<GraphFailure>,
        failed: &mut std::collections::HashSet<TestId>,
    ) {
        // frame: (node, index of the next edge to examine)
        let mut stack: Vec<(&'a TestId, usize)> = vec![(root, 0)];
        let mut path: Vec<&'a TestId> = vec![root];
        colors.insert(root, Color::Gray);

        while let Some(frame) = stack.last_mut() {
            let (id, next) = *frame;
            let deps = self.dependencies_of(id);
            if next >= deps.len() {
                stack.pop();
                path.pop();
                colors.insert(id, Color::Black);
                continue;
            }
            frame.1 += 1;

            let edge = &deps[next];
            match colors.get(&edge.target).copied() {
                None => {
                    // resolve the borrow back into graph-owned storage
                    if let Some((key, _)) = self.edges.get_key_value(&edge.target) {
                        colors.insert(key, Color::Gray);
                        path.push(key);
                        stack.push((key, 0));
                    }
                }
                Some(Color::Gray) => {
                    // back-edge: the cycle is the path suffix from the target
                    let start = path
                        .iter()
                        .position(|p| *p == &edge.target)
                        .unwrap_or(path.len() - 1);
                    let cycle = &path[start..];
                    let rendered = self.render_path(cycle);
                    warn!(path = %rendered, "dependency cycle detected");
                    for member in cycle {
                        if failed.insert((*member).clone()) {
                            failures.push(GraphFailure {
                                id: (*member).clone(),
                                error: Error::DependencyCycle {
                                    path: rendered.clone(),
                                },
                            });
                        }
                    }
                }
                Some(Color::Black) => {}
            }
        }
    }

    fn render_path(&self, cycle: &[&TestId]) -> String {
        let mut names: Vec<&str> = cycle.iter().map(|id| self.method_name_of(id)).collect();
        if let Some(first) = names.first().copied() {
            names.push(first);
        }
        names.join(" > ")
    }
}

#[derive(Clone, Copy, PartialEq)]
enum Color {
    Gray,
    Black,
}

#[cfg(test)]
mod tests {
    use super::*;
    use lattice_core::{
        DependsOn, GenericBinding, ParallelConstraint, TestState, TypeDesc, well_known,
    };

    fn node(id: &str, class: &str, method: &str, deps: Vec<DependsOn>) -> ExecutableTest {
        ExecutableTest {
            id: TestId::new(id),
            display_name: format!("{method}()"),
            class_name: class.to_string(),
            method_name: method.to_string(),
            method_param_types: Vec::new(),
            instance: None,
            class_binding: GenericBinding::empty(),
            method_binding: GenericBinding::empty(),
            class_args: Vec::new(),
            method_args: Vec::new(),
            depends_on: deps,
            constraint: ParallelConstraint::Unconstrained,
            retry_limit: 0,
            state: TestState::Pending,
            error: None,
            skip_reason: None,
        }
    }

    #[test]
    fn test_chain_resolves_without_failures() {
        let tests = vec![
            node("a", "C", "a", vec![]),
            node("b", "C", "b", vec![DependsOn::id("a")]),
            node("c", "C", "c", vec![DependsOn::id("b")]),
        ];
        let (graph, failures) = DependencyGraph::build(&tests).unwrap();
        assert!(failures.is_empty());
        assert_eq!(graph.dependencies_of(&TestId::new("c"))[0].target, TestId::new("b"));
        assert!(graph.detect_cycles().is_empty());
    }

    #[test]
    fn test_unknown_identity_target_fails_declaring_node() {
        let tests = vec![node("a", "C", "a", vec![DependsOn::id("ghost")])];
        let (graph, failures) = DependencyGraph::build(&tests).unwrap();
        assert_eq!(failures.len(), 1);
        assert_eq!(failures[0].id, TestId::new("a"));
        assert!(matches!(failures[0].error, Error::DependencyNotFound(_)));
        // the unresolved edge is absent, not dangling
        assert!(graph.dependencies_of(&TestId::new("a")).is_empty());
    }

    #[test]
    fn test_method_target_fans_out_to_every_identity() {
        let tests = vec![
            node("setup.0", "C", "setup", vec![]),
            node("setup.1", "C", "setup", vec![]),
            node("main", "C", "main", vec![DependsOn::method("C", "setup")]),
        ];
        let (graph, failures) = DependencyGraph::build(&tests).unwrap();
        assert!(failures.is_empty());
        assert_eq!(graph.dependencies_of(&TestId::new("main")).len(), 2);
    }

    #[test]
    fn test_overload_target_narrows_by_param_types() {
        let int_params = vec![TypeDesc::concrete(well_known::int())];
        let mut with_int = node("setup.int", "C", "setup", vec![]);
        with_int.method_param_types = int_params.clone();
        let mut with_text = node("setup.text", "C", "setup", vec![]);
        with_text.method_param_types = vec![TypeDesc::concrete(well_known::text())];
        let tests = vec![
            with_int,
            with_text,
            node(
                "main",
                "C",
                "main",
                vec![DependsOn::overload("C", "setup", int_params)],
            ),
        ];
        let (graph, failures) = DependencyGraph::build(&tests).unwrap();
        assert!(failures.is_empty());
        let edges = graph.dependencies_of(&TestId::new("main"));
        assert_eq!(edges.len(), 1);
        assert_eq!(edges[0].target, TestId::new("setup.int"));
    }

    #[test]
    fn test_duplicate_identity_is_a_contract_violation() {
        let tests = vec![node("a", "C", "a", vec![]), node("a", "C", "a", vec![])];
        let err = DependencyGraph::build(&tests).err().unwrap();
        assert!(matches!(err, Error::Contract(_)));
    }

    #[test]
    fn test_two_node_cycle_fails_both_with_full_path() {
        let tests = vec![
            node("a", "C", "A", vec![DependsOn::method("C", "B")]),
            node("b", "C", "B", vec![DependsOn::method("C", "A")]),
        ];
        let (graph, failures) = DependencyGraph::build(&tests).unwrap();
        assert!(failures.is_empty());
        let cycles = graph.detect_cycles();
        assert_eq!(cycles.len(), 2);
        for failure in &cycles {
            let message = failure.error.to_string();
            assert!(
                message.contains("A > B > A") || message.contains("B > A > B"),
                "unexpected path: {message}"
            );
        }
    }

    #[test]
    fn test_self_reference_is_a_one_node_cycle() {
        let tests = vec![node("a", "C", "A", vec![DependsOn::method("C", "A")])];
        let (graph, _) = DependencyGraph::build(&tests).unwrap();
        let cycles = graph.detect_cycles();
        assert_eq!(cycles.len(), 1);
        assert!(cycles[0].error.to_string().contains("A > A"));
    }

    #[test]
    fn test_diamond_is_not_a_cycle() {
        let tests = vec![
            node("root", "C", "root", vec![]),
            node("left", "C", "left", vec![DependsOn::id("root")]),
            node("right", "C", "right", vec![DependsOn::id("root")]),
            node(
                "join",
                "C",
                "join",
                vec![DependsOn::id("left"), DependsOn::id("right")],
            ),
        ];
        let (graph, failures) = DependencyGraph::build(&tests).unwrap();
        assert!(failures.is_empty());
        assert!(graph.detect_cycles().is_empty());
    }

    #[test]
    fn test_deep_chain_is_walked_without_recursion() {
        // deepest node first, so the walk descends the full chain
        let depth = 50_000;
        let mut tests = Vec::with_capacity(depth);
        for i in (1..depth).rev() {
            tests.push(node(
                &format!("n{i}"),
                "C",
                &format!("m{i}"),
                vec![DependsOn::id(format!("n{}", i - 1))],
            ));
        }
        tests.push(node("n0", "C", "m0", vec![]));
        let (graph, failures) = DependencyGraph::build(&tests).unwrap();
        assert!(failures.is_empty());
        assert!(graph.detect_cycles().is_empty());
    }

    #[test]
    fn test_longer_cycle_fails_every_participant() {
        let tests = vec![
            node("a", "C", "A", vec![DependsOn::method("C", "B")]),
            node("b", "C", "B", vec![DependsOn::method("C", "D")]),
            node("d", "C", "D", vec![DependsOn::method("C", "A")]),
            node("free", "C", "free", vec![]),
        ];
        let (graph, _) = DependencyGraph::build(&tests).unwrap();
        let cycles = graph.detect_cycles();
        assert_eq!(cycles.len(), 3);
        let first = cycles[0].error.to_string();
        assert!(cycles.iter().all(|f| f.error.to_string() == first));
    }
}
