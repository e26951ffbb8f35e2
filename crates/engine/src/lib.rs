//! Expansion engine for Lattice
//!
//! This crate turns immutable test definitions into concrete executable
//! units:
//! - ExpansionEngine: class data × method data × repeat expansion with
//!   per-row failure isolation
//! - resolver: generic type unification and constraint checking
//! - TestBuilder: deterministic identity assignment and instance
//!   construction
//! - SharedSourceRegistry: session-owned singleton data source scopes
//!
//! The engine is the only component that consults the instance-construction
//! collaborator before scheduling (provisional instances for
//! instance-accessing sources, and the per-test instances themselves).

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod builder;
pub mod expansion;
pub mod resolver;
pub mod shared;

pub use builder::{display_name, failed_identity, failed_test, identity, RowIndices, TestBuilder};
pub use expansion::{class_binding, method_binding, ExpandedRow, ExpansionEngine, ExpansionOutcome};
pub use resolver::resolve;
pub use shared::SharedSourceRegistry;
