//! Data source expansion engine
//!
//! Drives the Cartesian expansion of class-level data × method-level data ×
//! repeat count into concrete argument rows, resolving generic bindings per
//! row and isolating per-row failures.
//!
//! Loop structure: class sources (outer) → class rows → method sources →
//! method rows → repetitions. Every (class row, method row, repeat) triple
//! yields exactly one outcome: either an `ExpandedRow` or a `Failed`
//! executable test carrying the causing error. Both row factories are
//! re-materialized fresh for every repetition, so non-idempotent generators
//! are sampled per repetition without re-running the whole generator.
//!
//! A class-level source that needs a live instance is a genuine circular
//! dependency (the instance cannot exist before its own constructor
//! arguments do); it is detected before any iteration and fails the whole
//! definition with one synthesized unit.

use crate::builder::{failed_test, RowIndices};
use crate::resolver;
use crate::shared::SharedSourceRegistry;
use lattice_core::{
    ArgValue, DataSource, Error, ExecutableTest, GenericBinding, Instance, InstanceFactory,
    Result, RowFactory, RowIter, SourceContext, TestDefinition, TypeDesc,
};
use std::sync::Arc;
use tracing::{debug, warn};

/// One concrete combination of class and method arguments
///
/// Created by the expansion engine and consumed exactly once by the test
/// builder.
#[derive(Debug, Clone)]
pub struct ExpandedRow {
    /// Materialized constructor arguments
    pub class_args: Vec<ArgValue>,
    /// Materialized method arguments
    pub method_args: Vec<ArgValue>,
    /// Resolved class generic binding
    pub class_binding: GenericBinding,
    /// Resolved method generic binding
    pub method_binding: GenericBinding,
    /// Index of the class-level data source
    pub class_source_index: usize,
    /// Row index within the class-level source
    pub class_row_index: usize,
    /// Index of the method-level data source
    pub method_source_index: usize,
    /// Row index within the method-level source
    pub method_row_index: usize,
    /// Repeat index
    pub repeat_index: u32,
}

/// Result of expanding one combination
#[derive(Debug)]
pub enum ExpansionOutcome {
    /// A concrete row, ready for the builder
    Row(Box<ExpandedRow>),
    /// The combination failed; the unit is already terminal
    Failed(ExecutableTest),
}

/// Expands test definitions into concrete argument rows
pub struct ExpansionEngine {
    factory: Arc<dyn InstanceFactory>,
    shared: Arc<SharedSourceRegistry>,
}

impl ExpansionEngine {
    /// Create an engine over the instance-construction collaborator and the
    /// session's shared-source registry
    pub fn new(factory: Arc<dyn InstanceFactory>, shared: Arc<SharedSourceRegistry>) -> Self {
        Self { factory, shared }
    }

    /// Expand one definition into every concrete combination
    ///
    /// Never fails as a whole: per-row errors become `Failed` outcomes and
    /// expansion continues with the next row.
    pub async fn expand(&self, def: &TestDefinition) -> Vec<ExpansionOutcome> {
        // structural circularity check, before any iteration
        if let Some(source) = def.class_sources.iter().find(|s| s.accesses_instance()) {
            let err = Error::CircularDataSource {
                class: def.class.name.clone(),
                source: source.name(),
            };
            warn!(class = %def.class.name, source = %source.name(), "circular class-level data source");
            return vec![ExpansionOutcome::Failed(failed_test(
                def,
                &RowIndices::default(),
                &err,
            ))];
        }

        let needs_instance = def.method_sources.iter().any(|s| s.accesses_instance());
        let class_sources = normalized(&def.class_sources);
        let method_sources = normalized(&def.method_sources);
        let detached = SourceContext::detached();
        let mut out = Vec::new();

        for (cs_idx, class_source) in class_sources.iter().enumerate() {
            let mut idx = RowIndices {
                class_source: cs_idx,
                ..RowIndices::default()
            };
            let class_rows = match self.source_rows(def, class_source, &detached) {
                Ok(rows) => rows,
                Err(e) => {
                    out.push(ExpansionOutcome::Failed(failed_test(def, &idx, &e)));
                    continue;
                }
            };

            for (crow_idx, crow_item) in class_rows.enumerate() {
                idx.class_row = crow_idx;
                let crow = match crow_item {
                    Ok(factory) => factory,
                    Err(e) => {
                        out.push(ExpansionOutcome::Failed(failed_test(def, &idx, &e)));
                        continue;
                    }
                };

                // instance-accessing method sources read from a provisional
                // instance built from this class row
                let provisional = if needs_instance {
                    match self.provisional_instance(def, &crow).await {
                        Ok(instance) => Some(instance),
                        Err(e) => {
                            out.push(ExpansionOutcome::Failed(failed_test(def, &idx, &e)));
                            continue;
                        }
                    }
                } else {
                    None
                };
                let method_cx = match &provisional {
                    Some(instance) => SourceContext::with_instance(instance.clone()),
                    None => SourceContext::detached(),
                };

                for (ms_idx, method_source) in method_sources.iter().enumerate() {
                    idx.method_source = ms_idx;
                    idx.method_row = 0;
                    let method_rows = match self.source_rows(def, method_source, &method_cx) {
                        Ok(rows) => rows,
                        Err(e) => {
                            out.push(ExpansionOutcome::Failed(failed_test(def, &idx, &e)));
                            continue;
                        }
                    };

                    for (mrow_idx, mrow_item) in method_rows.enumerate() {
                        idx.method_row = mrow_idx;
                        let mrow = match mrow_item {
                            Ok(factory) => factory,
                            Err(e) => {
                                out.push(ExpansionOutcome::Failed(failed_test(def, &idx, &e)));
                                continue;
                            }
                        };

                        for repeat in 0..=def.repeat_count {
                            idx.repeat = repeat;
                            out.push(self.expand_one(def, &crow, &mrow, idx));
                        }
                    }
                }
            }
        }

        debug!(
            class = %def.class.name,
            method = %def.method.name,
            combinations = out.len(),
            "definition expanded"
        );
        out
    }

    /// Expand exactly one (class row, method row, repeat) triple
    fn expand_one(
        &self,
        def: &TestDefinition,
        crow: &RowFactory,
        mrow: &RowFactory,
        idx: RowIndices,
    ) -> ExpansionOutcome {
        match self.try_expand_one(def, crow, mrow, &idx) {
            Ok(row) => ExpansionOutcome::Row(Box::new(row)),
            Err(e) => ExpansionOutcome::Failed(failed_test(def, &idx, &e)),
        }
    }

    fn try_expand_one(
        &self,
        def: &TestDefinition,
        crow: &RowFactory,
        mrow: &RowFactory,
        idx: &RowIndices,
    ) -> Result<ExpandedRow> {
        // re-materialize both rows fresh for this repetition
        let class_args = crow.materialize()?;
        let method_args = mrow.materialize()?;
        let class_binding = class_binding(def, &class_args)?;
        let method_binding = method_binding(def, &class_binding, &method_args)?;
        Ok(ExpandedRow {
            class_args,
            method_args,
            class_binding,
            method_binding,
            class_source_index: idx.class_source,
            class_row_index: idx.class_row,
            method_source_index: idx.method_source,
            method_row_index: idx.method_row,
            repeat_index: idx.repeat,
        })
    }

    /// Produce a source's row sequence, routing shared sources through the
    /// session registry
    fn source_rows(
        &self,
        def: &TestDefinition,
        source: &DataSource,
        cx: &SourceContext,
    ) -> Result<RowIter> {
        if let DataSource::Shared { scope, inner } = source {
            let factories = self.shared.resolve(scope, &def.class.name, &source.name(), || {
                let mut rows = Vec::new();
                for item in inner.rows(cx)? {
                    rows.push(item?.materialize()?);
                }
                Ok(rows)
            })?;
            return Ok(Box::new(factories.into_iter().map(Ok)) as RowIter);
        }
        source.rows(cx)
    }

    /// Construct the provisional instance used by instance-accessing
    /// method-level sources
    async fn provisional_instance(
        &self,
        def: &TestDefinition,
        crow: &RowFactory,
    ) -> Result<Instance> {
        let class_args = crow.materialize()?;
        let binding = class_binding(def, &class_args)?;
        match self
            .factory
            .construct(&def.class.name, &binding, &class_args)
            .await
        {
            Ok(Some(instance)) => Ok(instance),
            Ok(None) => Err(Error::InstanceConstruction {
                class: def.class.name.clone(),
                message: "factory returned no instance for provisional construction".to_string(),
            }),
            Err(e) => Err(Error::InstanceConstruction {
                class: def.class.name.clone(),
                message: e.to_string(),
            }),
        }
    }
}

/// Resolve the class generic binding from one materialized class row
///
/// Falls back to an empty binding for a non-generic class with no
/// constructor parameters.
pub fn class_binding(def: &TestDefinition, class_args: &[ArgValue]) -> Result<GenericBinding> {
    let declared: Vec<TypeDesc> = def.class.ctor_params.iter().map(|p| p.ty.clone()).collect();
    let types: Vec<_> = class_args.iter().map(|a| a.runtime_type().clone()).collect();
    resolver::resolve(&declared, &def.class.type_params, &types)
}

/// Resolve the method generic binding from one materialized method row
///
/// Class-level bindings are substituted into the declared method parameter
/// types first, so a method parameter typed by a class type parameter
/// unifies against the already-resolved class binding.
pub fn method_binding(
    def: &TestDefinition,
    class_binding: &GenericBinding,
    method_args: &[ArgValue],
) -> Result<GenericBinding> {
    let declared: Vec<TypeDesc> = def
        .method
        .params
        .iter()
        .map(|p| class_binding.substitute(&p.ty))
        .collect();
    let types: Vec<_> = method_args.iter().map(|a| a.runtime_type().clone()).collect();
    resolver::resolve(&declared, &def.method.type_params, &types)
}

/// Substitute an absent source list with a single empty literal row, so the
/// expansion loops always run at least once per level
fn normalized(sources: &[DataSource]) -> Vec<DataSource> {
    if sources.is_empty() {
        vec![DataSource::single_row(Vec::new())]
    } else {
        sources.to_vec()
    }
}
