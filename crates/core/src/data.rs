//! Data sources: polymorphic argument-row producers
//!
//! A data source yields a lazy sequence of argument rows. Each row is itself
//! a factory (`RowFactory`): invoking it materializes a fresh copy of the
//! row, so a non-idempotent generator is still sampled fresh per repetition
//! without re-running the whole generator's setup.
//!
//! Sources flagged `accesses_instance` need a live instance of the class
//! under test to produce values; the expansion engine constructs a
//! provisional instance for method-level sources and rejects class-level
//! ones (the instance cannot exist before its own constructor arguments do).

use crate::error::{Error, Result};
use crate::value::{ArgValue, Instance};
use std::fmt;
use std::sync::Arc;

/// Closure materializing one argument row
pub type RowFn = dyn Fn() -> Result<Vec<ArgValue>> + Send + Sync;

/// One argument row, as a re-invocable factory
///
/// `materialize` may be called many times; every call produces a fresh row.
#[derive(Clone)]
pub struct RowFactory {
    make: Arc<RowFn>,
}

impl RowFactory {
    /// Wrap a row-producing closure
    pub fn new(make: impl Fn() -> Result<Vec<ArgValue>> + Send + Sync + 'static) -> Self {
        Self {
            make: Arc::new(make),
        }
    }

    /// A factory that clones a fixed literal row on every materialization
    pub fn literal(args: Vec<ArgValue>) -> Self {
        Self::new(move || Ok(args.clone()))
    }

    /// Materialize a fresh copy of the row
    pub fn materialize(&self) -> Result<Vec<ArgValue>> {
        (self.make)()
    }
}

impl fmt::Debug for RowFactory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "RowFactory(..)")
    }
}

/// Context handed to generator routines
///
/// Carries the provisional instance for instance-accessing method-level
/// sources; `instance` is `None` for class-level sources and for method
/// sources that do not access the instance.
#[derive(Clone, Default)]
pub struct SourceContext {
    /// Provisional instance of the class under test, when available
    pub instance: Option<Instance>,
}

impl SourceContext {
    /// A context with no instance available
    pub fn detached() -> Self {
        Self::default()
    }

    /// A context carrying a provisional instance
    pub fn with_instance(instance: Instance) -> Self {
        Self {
            instance: Some(instance),
        }
    }
}

/// Lazy sequence of argument rows; items may fail individually
pub type RowIter = Box<dyn Iterator<Item = Result<RowFactory>> + Send>;

/// Generator routine producing a fresh row sequence per call
pub type GeneratorFn = Arc<dyn Fn(&SourceContext) -> Result<RowIter> + Send + Sync>;

/// Sharing scope for singleton data sources
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum SharedScope {
    /// One materialization for the whole run session
    Global,
    /// One materialization per declaring class
    PerClass,
    /// One materialization per explicit key
    Key(String),
}

impl fmt::Display for SharedScope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SharedScope::Global => write!(f, "global"),
            SharedScope::PerClass => write!(f, "per-class"),
            SharedScope::Key(k) => write!(f, "key:{k}"),
        }
    }
}

/// A polymorphic argument-row producer
#[derive(Clone)]
pub enum DataSource {
    /// A fixed list of literal rows
    LiteralRows {
        /// The rows, in declaration order
        rows: Vec<RowFactory>,
    },
    /// A call to a named generator routine
    NamedGenerator {
        /// Name of the generator, used in identities and error messages
        name: String,
        /// Whether the generator reads from a live instance
        accesses_instance: bool,
        /// The routine itself
        generate: GeneratorFn,
    },
    /// A stateful generator yielding a lazy sequence of rows
    StatefulGenerator {
        /// Name of the generator, used in identities and error messages
        name: String,
        /// Whether the generator reads from a live instance
        accesses_instance: bool,
        /// The routine; may capture internal mutable state
        generate: GeneratorFn,
    },
    /// A singleton wrapper: the inner source is materialized once per scope
    Shared {
        /// Sharing scope
        scope: SharedScope,
        /// The wrapped source
        inner: Box<DataSource>,
    },
}

impl DataSource {
    /// A source with a fixed list of literal rows
    pub fn literal_rows(rows: Vec<Vec<ArgValue>>) -> Self {
        DataSource::LiteralRows {
            rows: rows.into_iter().map(RowFactory::literal).collect(),
        }
    }

    /// A source with exactly one literal row
    pub fn single_row(args: Vec<ArgValue>) -> Self {
        Self::literal_rows(vec![args])
    }

    /// A named generator routine
    pub fn named(name: impl Into<String>, generate: GeneratorFn) -> Self {
        DataSource::NamedGenerator {
            name: name.into(),
            accesses_instance: false,
            generate,
        }
    }

    /// A named generator routine that reads from a live instance
    pub fn named_with_instance(name: impl Into<String>, generate: GeneratorFn) -> Self {
        DataSource::NamedGenerator {
            name: name.into(),
            accesses_instance: true,
            generate,
        }
    }

    /// A stateful generator
    pub fn stateful(name: impl Into<String>, generate: GeneratorFn) -> Self {
        DataSource::StatefulGenerator {
            name: name.into(),
            accesses_instance: false,
            generate,
        }
    }

    /// Wrap a source in a sharing scope
    pub fn shared(scope: SharedScope, inner: DataSource) -> Self {
        DataSource::Shared {
            scope,
            inner: Box::new(inner),
        }
    }

    /// Whether this source needs a live instance of the class under test
    pub fn accesses_instance(&self) -> bool {
        match self {
            DataSource::LiteralRows { .. } => false,
            DataSource::NamedGenerator {
                accesses_instance, ..
            }
            | DataSource::StatefulGenerator {
                accesses_instance, ..
            } => *accesses_instance,
            DataSource::Shared { inner, .. } => inner.accesses_instance(),
        }
    }

    /// Human-readable source name for error messages
    pub fn name(&self) -> String {
        match self {
            DataSource::LiteralRows { .. } => "literal".to_string(),
            DataSource::NamedGenerator { name, .. }
            | DataSource::StatefulGenerator { name, .. } => name.clone(),
            DataSource::Shared { scope, inner } => format!("shared[{}]({})", scope, inner.name()),
        }
    }

    /// Produce the lazy row sequence
    ///
    /// Note: for `Shared` sources this yields the unshared inner sequence;
    /// singleton resolution is the expansion engine's job, which consults
    /// the session's shared-source registry instead of calling this.
    pub fn rows(&self, cx: &SourceContext) -> Result<RowIter> {
        match self {
            DataSource::LiteralRows { rows } => {
                Ok(Box::new(rows.clone().into_iter().map(Ok)) as RowIter)
            }
            DataSource::NamedGenerator { name, generate, .. }
            | DataSource::StatefulGenerator { name, generate, .. } => {
                generate(cx).map_err(|e| Error::DataGeneration {
                    source: name.clone(),
                    message: e.to_string(),
                })
            }
            DataSource::Shared { inner, .. } => inner.rows(cx),
        }
    }
}

impl fmt::Debug for DataSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DataSource::LiteralRows { rows } => write!(f, "LiteralRows({} rows)", rows.len()),
            DataSource::NamedGenerator { name, .. } => write!(f, "NamedGenerator({name})"),
            DataSource::StatefulGenerator { name, .. } => write!(f, "StatefulGenerator({name})"),
            DataSource::Shared { scope, inner } => write!(f, "Shared[{scope}]({inner:?})"),
        }
    }
}
