//! Test definitions: the compile-time-known description of one test method
//!
//! Definitions are produced by the external discovery collaborator and are
//! immutable once handed to the core. Expansion turns each definition into
//! one or many concrete executable tests.

use crate::data::DataSource;
use crate::types::{TestId, TypeDesc, TypeParam};

/// Default priority for the fully-serial queue (mid-range)
pub const DEFAULT_PRIORITY: u32 = 500;

/// One declared parameter: name plus declared (possibly open) type
#[derive(Debug, Clone)]
pub struct ParamSpec {
    /// Parameter name
    pub name: String,
    /// Declared type
    pub ty: TypeDesc,
}

impl ParamSpec {
    /// Declare a parameter
    pub fn new(name: impl Into<String>, ty: TypeDesc) -> Self {
        Self {
            name: name.into(),
            ty,
        }
    }
}

/// Metadata for the class under test
#[derive(Debug, Clone)]
pub struct ClassMetadata {
    /// Qualified class name, e.g. `acme.tests.WidgetTests`
    pub name: String,
    /// Constructor parameters, in declaration order
    pub ctor_params: Vec<ParamSpec>,
    /// Declared class type parameters
    pub type_params: Vec<TypeParam>,
}

impl ClassMetadata {
    /// A class with no constructor parameters and no type parameters
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ctor_params: Vec::new(),
            type_params: Vec::new(),
        }
    }

    /// Set constructor parameters
    pub fn with_ctor_params(mut self, params: Vec<ParamSpec>) -> Self {
        self.ctor_params = params;
        self
    }

    /// Set class type parameters
    pub fn with_type_params(mut self, params: Vec<TypeParam>) -> Self {
        self.type_params = params;
        self
    }
}

/// Metadata for the method under test
#[derive(Debug, Clone)]
pub struct MethodMetadata {
    /// Method name
    pub name: String,
    /// Method parameters, in declaration order
    pub params: Vec<ParamSpec>,
    /// Declared method type parameters
    pub type_params: Vec<TypeParam>,
}

impl MethodMetadata {
    /// A method with no parameters and no type parameters
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            params: Vec::new(),
            type_params: Vec::new(),
        }
    }

    /// Set method parameters
    pub fn with_params(mut self, params: Vec<ParamSpec>) -> Self {
        self.params = params;
        self
    }

    /// Set method type parameters
    pub fn with_type_params(mut self, params: Vec<TypeParam>) -> Self {
        self.type_params = params;
        self
    }
}

/// Target of a depends-on declaration
///
/// A declaration may reference a specific concrete identity, or a method by
/// class and name; since one definition can expand into many identities, a
/// method reference fans out to every matching identity. An optional
/// parameter-type list narrows a method reference to one overload.
#[derive(Debug, Clone)]
pub enum DependencyTarget {
    /// A specific concrete test identity
    Id(TestId),
    /// Every identity expanded from the named method
    Method {
        /// Qualified class name
        class: String,
        /// Method name
        method: String,
        /// Parameter-type list selecting a specific overload; `None`
        /// matches every overload of the method
        param_types: Option<Vec<TypeDesc>>,
    },
}

/// One declared depends-on edge
#[derive(Debug, Clone)]
pub struct DependsOn {
    /// The declared target
    pub target: DependencyTarget,
    /// Run the dependent even if this dependency failed
    pub proceed_on_failure: bool,
}

impl DependsOn {
    /// Depend on a specific concrete identity
    pub fn id(id: impl Into<TestId>) -> Self {
        Self {
            target: DependencyTarget::Id(id.into()),
            proceed_on_failure: false,
        }
    }

    /// Depend on every identity expanded from a method
    pub fn method(class: impl Into<String>, method: impl Into<String>) -> Self {
        Self {
            target: DependencyTarget::Method {
                class: class.into(),
                method: method.into(),
                param_types: None,
            },
            proceed_on_failure: false,
        }
    }

    /// Depend on one specific overload of a method
    pub fn overload(
        class: impl Into<String>,
        method: impl Into<String>,
        param_types: Vec<TypeDesc>,
    ) -> Self {
        Self {
            target: DependencyTarget::Method {
                class: class.into(),
                method: method.into(),
                param_types: Some(param_types),
            },
            proceed_on_failure: false,
        }
    }

    /// Allow the dependent to run even if this dependency failed
    pub fn proceed_on_failure(mut self) -> Self {
        self.proceed_on_failure = true;
        self
    }
}

/// Parallelism constraint declared on a definition
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ParallelConstraint {
    /// No constraint; runs in the unconstrained pool
    Unconstrained,
    /// Mutual exclusion with every test sharing the key
    Keyed(String),
    /// Fully serial: never runs concurrently with anything
    Serial {
        /// Primary sort key within the serial queue (lower runs first)
        priority: u32,
    },
}

impl ParallelConstraint {
    /// Fully serial with the default mid-range priority
    pub fn serial() -> Self {
        ParallelConstraint::Serial {
            priority: DEFAULT_PRIORITY,
        }
    }
}

impl Default for ParallelConstraint {
    fn default() -> Self {
        ParallelConstraint::Unconstrained
    }
}

/// Compile-time-known description of one test method and its data sources
///
/// Immutable once produced by discovery. `retry_limit: None` defers to the
/// run-wide default.
#[derive(Debug, Clone)]
pub struct TestDefinition {
    /// Class under test
    pub class: ClassMetadata,
    /// Method under test
    pub method: MethodMetadata,
    /// Ordered class-level data sources (constructor arguments)
    pub class_sources: Vec<DataSource>,
    /// Ordered method-level data sources (method arguments)
    pub method_sources: Vec<DataSource>,
    /// Extra repetitions per combination (total runs = repeat_count + 1)
    pub repeat_count: u32,
    /// Per-test retry budget; `None` defers to the run default
    pub retry_limit: Option<u32>,
    /// Declared depends-on edges
    pub depends_on: Vec<DependsOn>,
    /// Parallelism constraint
    pub constraint: ParallelConstraint,
    /// Skip the test (with the given reason) instead of running it
    pub skip_reason: Option<String>,
}

impl TestDefinition {
    /// A definition with no data sources, no dependencies, and no constraint
    pub fn new(class: ClassMetadata, method: MethodMetadata) -> Self {
        Self {
            class,
            method,
            class_sources: Vec::new(),
            method_sources: Vec::new(),
            repeat_count: 0,
            retry_limit: None,
            depends_on: Vec::new(),
            constraint: ParallelConstraint::Unconstrained,
            skip_reason: None,
        }
    }

    /// Add a class-level data source
    pub fn with_class_source(mut self, source: DataSource) -> Self {
        self.class_sources.push(source);
        self
    }

    /// Add a method-level data source
    pub fn with_method_source(mut self, source: DataSource) -> Self {
        self.method_sources.push(source);
        self
    }

    /// Set the repeat count
    pub fn with_repeat(mut self, repeat_count: u32) -> Self {
        self.repeat_count = repeat_count;
        self
    }

    /// Set the retry budget
    pub fn with_retry(mut self, retry_limit: u32) -> Self {
        self.retry_limit = Some(retry_limit);
        self
    }

    /// Add a depends-on edge
    pub fn with_dependency(mut self, dep: DependsOn) -> Self {
        self.depends_on.push(dep);
        self
    }

    /// Set the parallelism constraint
    pub fn with_constraint(mut self, constraint: ParallelConstraint) -> Self {
        self.constraint = constraint;
        self
    }

    /// Mark the definition skipped
    pub fn with_skip(mut self, reason: impl Into<String>) -> Self {
        self.skip_reason = Some(reason.into());
        self
    }
}
