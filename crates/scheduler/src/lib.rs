//! Scheduler for Lattice
//!
//! Takes the executable set produced by the engine and runs it to
//! completion:
//! - DependencyGraph: depends-on resolution, fan-out, cycle detection
//! - Partitions: unconstrained pool, keyed mutual exclusion, serial queue
//! - CpuGate: CPU-pressure admission control
//! - Scheduler: the single-owner dispatch loop with per-attempt retry,
//!   cancellation, and per-class teardown
//!
//! Scheduling state is mutated only by the dispatch loop. Worker units
//! execute test bodies, append result records, and report completions over
//! a channel.

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod graph;
pub mod partition;
pub mod scheduler;
pub mod summary;
pub mod throttle;

pub use graph::{DepEdge, DependencyGraph, GraphFailure};
pub use partition::Partitions;
pub use scheduler::{Scheduler, SchedulerOptions};
pub use summary::RunSummary;
pub use throttle::CpuGate;
