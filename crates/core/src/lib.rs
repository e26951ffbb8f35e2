//! Core types and traits for Lattice
//!
//! This crate defines the foundational types used throughout the system:
//! - TestId / SessionId: Deterministic test identity, run-session identity
//! - TypeInfo / TypeDesc / TypeParam: Explicit runtime and declared type model
//! - GenericBinding: Resolved type-parameter substitutions
//! - Value / ArgValue: Argument payloads with runtime type attached
//! - DataSource / RowFactory: Lazy, re-materializable argument-row producers
//! - TestDefinition: Immutable description of one test method and its sources
//! - ExecutableTest: One concrete schedulable combination
//! - TestState / TestResultRecord: Lifecycle states and per-attempt records
//! - Error: Error type hierarchy
//! - Traits: Collaborator seams (InstanceFactory, TestInvoker, ResultSink)

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod data;
pub mod definition;
pub mod error;
pub mod executable;
pub mod state;
pub mod traits;
pub mod types;
pub mod value;

// Re-export commonly used types and traits
pub use data::{DataSource, GeneratorFn, RowFactory, RowIter, SharedScope, SourceContext};
pub use definition::{
    ClassMetadata, DependencyTarget, DependsOn, MethodMetadata, ParallelConstraint, ParamSpec,
    TestDefinition, DEFAULT_PRIORITY,
};
pub use error::{Error, Result};
pub use executable::ExecutableTest;
pub use state::{TestResultRecord, TestState};
pub use traits::{InstanceFactory, InvocationOutcome, ResultSink, TestInvoker};
pub use types::{
    GenericBinding, GenericInstantiation, SessionId, TestId, TypeConstraint, TypeDesc, TypeInfo,
    TypeKind, TypeParam,
};
pub use value::{well_known, ArgValue, Instance, Value};
