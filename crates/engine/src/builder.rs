//! Test identity and instance builder
//!
//! Turns one expanded row into an executable unit: deterministic identity
//! string, display name, and a constructed class instance. On any failure
//! the builder returns a test already in the `Failed` state instead of
//! propagating, matching the expansion engine's isolation policy.
//!
//! ## Identity format
//!
//! ```text
//! {Class(CtorParamTypes)}.{classSourceIdx}.{classRowIdx}.{Method(ParamTypes)}<{methodGenericCount}>.{methodSourceIdx}.{methodRowIdx}.{repeatIdx}
//! ```
//!
//! Identity is computed from declared metadata and expansion indices only,
//! never from materialized argument values, so re-running discovery on
//! unchanged source reproduces the same identity. That stability is what
//! depends-on matching and cross-run result correlation rely on.

use crate::expansion::ExpandedRow;
use lattice_core::{
    ArgValue, Error, ExecutableTest, InstanceFactory, ParamSpec, TestDefinition, TestId,
    TestState,
};
use std::sync::Arc;
use tracing::debug;

/// Expansion indices identifying one combination within a definition
#[derive(Debug, Clone, Copy, Default)]
pub struct RowIndices {
    /// Index of the class-level data source
    pub class_source: usize,
    /// Row index within the class-level source
    pub class_row: usize,
    /// Index of the method-level data source
    pub method_source: usize,
    /// Row index within the method-level source
    pub method_row: usize,
    /// Repeat index (0 for the first run of a combination)
    pub repeat: u32,
}

impl RowIndices {
    /// Indices of one expanded row
    pub fn of(row: &ExpandedRow) -> Self {
        Self {
            class_source: row.class_source_index,
            class_row: row.class_row_index,
            method_source: row.method_source_index,
            method_row: row.method_row_index,
            repeat: row.repeat_index,
        }
    }
}

/// Compute the deterministic identity of one combination
pub fn identity(def: &TestDefinition, idx: &RowIndices) -> TestId {
    let class_part = with_param_types(&def.class.name, &def.class.ctor_params);
    let method_part = with_param_types(&def.method.name, &def.method.params);
    TestId::new(format!(
        "{class_part}.{}.{}.{method_part}<{}>.{}.{}.{}",
        idx.class_source,
        idx.class_row,
        def.method.type_params.len(),
        idx.method_source,
        idx.method_row,
        idx.repeat,
    ))
}

/// Compute the identity of a combination that failed before it was runnable
///
/// The error category is appended so a failed placeholder never collides
/// with the identity of a successfully built test from a later run.
pub fn failed_identity(def: &TestDefinition, idx: &RowIndices, error: &Error) -> TestId {
    TestId::new(format!("{}_{}", identity(def, idx), error.category()))
}

fn with_param_types(name: &str, params: &[ParamSpec]) -> String {
    if params.is_empty() {
        return name.to_string();
    }
    let types: Vec<String> = params.iter().map(|p| p.ty.to_string()).collect();
    format!("{name}({})", types.join(", "))
}

/// Render the human-readable display name, e.g. `renders(1, "a")`
pub fn display_name(def: &TestDefinition, method_args: &[ArgValue]) -> String {
    let rendered: Vec<String> = method_args.iter().map(|a| a.to_string()).collect();
    format!("{}({})", def.method.name, rendered.join(", "))
}

/// Synthesize a `Failed` executable test for a combination that could not
/// be expanded, resolved, or constructed
pub fn failed_test(def: &TestDefinition, idx: &RowIndices, error: &Error) -> ExecutableTest {
    debug!(
        class = %def.class.name,
        method = %def.method.name,
        error = %error,
        "isolating combination failure"
    );
    ExecutableTest::failed(
        failed_identity(def, idx, error),
        format!("{}(<unavailable>)", def.method.name),
        def.class.name.clone(),
        def.method.name.clone(),
        error,
    )
}

/// Builds executable units from expanded rows
pub struct TestBuilder {
    factory: Arc<dyn InstanceFactory>,
    default_retry_limit: u32,
}

impl TestBuilder {
    /// Create a builder over the instance-construction collaborator
    pub fn new(factory: Arc<dyn InstanceFactory>, default_retry_limit: u32) -> Self {
        Self {
            factory,
            default_retry_limit,
        }
    }

    /// Build one executable test from one expanded row
    ///
    /// Never fails: construction errors produce a test pre-set to `Failed`.
    pub async fn build(&self, def: &TestDefinition, row: ExpandedRow) -> ExecutableTest {
        let idx = RowIndices::of(&row);
        let id = identity(def, &idx);
        let display = display_name(def, &row.method_args);

        // skipped definitions are terminal without construction
        if let Some(reason) = &def.skip_reason {
            return ExecutableTest {
                id,
                display_name: display,
                class_name: def.class.name.clone(),
                method_name: def.method.name.clone(),
                method_param_types: def.method.params.iter().map(|p| p.ty.clone()).collect(),
                instance: None,
                class_binding: row.class_binding,
                method_binding: row.method_binding,
                class_args: row.class_args,
                method_args: row.method_args,
                depends_on: def.depends_on.clone(),
                constraint: def.constraint.clone(),
                retry_limit: 0,
                state: TestState::Skipped,
                error: None,
                skip_reason: Some(reason.clone()),
            };
        }

        let constructed = self
            .factory
            .construct(&def.class.name, &row.class_binding, &row.class_args)
            .await;
        let instance = match constructed {
            Ok(Some(instance)) => instance,
            Ok(None) => {
                // a factory that produces nothing is a hard error: the
                // method cannot be invoked without a receiver
                let err = Error::InstanceConstruction {
                    class: def.class.name.clone(),
                    message: "factory returned no instance".to_string(),
                };
                return failed_test(def, &idx, &err);
            }
            Err(e) => {
                let err = Error::InstanceConstruction {
                    class: def.class.name.clone(),
                    message: e.to_string(),
                };
                return failed_test(def, &idx, &err);
            }
        };

        ExecutableTest {
            id,
            display_name: display,
            class_name: def.class.name.clone(),
            method_name: def.method.name.clone(),
            method_param_types: def.method.params.iter().map(|p| p.ty.clone()).collect(),
            instance: Some(instance),
            class_binding: row.class_binding,
            method_binding: row.method_binding,
            class_args: row.class_args,
            method_args: row.method_args,
            depends_on: def.depends_on.clone(),
            constraint: def.constraint.clone(),
            retry_limit: def.retry_limit.unwrap_or(self.default_retry_limit),
            state: TestState::Pending,
            error: None,
            skip_reason: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use lattice_core::{
        ClassMetadata, GenericBinding, MethodMetadata, TypeDesc, well_known,
    };

    fn sample_def() -> TestDefinition {
        TestDefinition::new(
            ClassMetadata::new("acme.tests.WidgetTests").with_ctor_params(vec![ParamSpec::new(
                "size",
                TypeDesc::concrete(well_known::int()),
            )]),
            MethodMetadata::new("renders").with_params(vec![
                ParamSpec::new("count", TypeDesc::concrete(well_known::int())),
                ParamSpec::new("label", TypeDesc::concrete(well_known::text())),
            ]),
        )
    }

    fn sample_row() -> ExpandedRow {
        ExpandedRow {
            class_args: vec![ArgValue::int(7)],
            method_args: vec![ArgValue::int(1), ArgValue::text("a")],
            class_binding: GenericBinding::empty(),
            method_binding: GenericBinding::empty(),
            class_source_index: 0,
            class_row_index: 1,
            method_source_index: 2,
            method_row_index: 3,
            repeat_index: 4,
        }
    }

    #[test]
    fn test_identity_format() {
        let def = sample_def();
        let id = identity(&def, &RowIndices::of(&sample_row()));
        assert_eq!(
            id.as_str(),
            "acme.tests.WidgetTests(Int).0.1.renders(Int, String)<0>.2.3.4"
        );
    }

    #[test]
    fn test_identity_is_idempotent() {
        let def = sample_def();
        let idx = RowIndices::of(&sample_row());
        assert_eq!(identity(&def, &idx), identity(&def, &idx));
    }

    #[test]
    fn test_identity_distinguishes_indices() {
        let def = sample_def();
        let a = identity(&def, &RowIndices::default());
        let b = identity(
            &def,
            &RowIndices {
                repeat: 1,
                ..RowIndices::default()
            },
        );
        assert_ne!(a, b);
    }

    #[test]
    fn test_identity_ignores_argument_values() {
        // two rows with the same indices but different values share identity
        let def = sample_def();
        let mut row = sample_row();
        row.method_args = vec![ArgValue::int(999), ArgValue::text("zzz")];
        assert_eq!(
            identity(&def, &RowIndices::of(&row)),
            identity(&def, &RowIndices::of(&sample_row()))
        );
    }

    #[test]
    fn test_failed_identity_carries_category() {
        let def = sample_def();
        let err = Error::GenericResolution("x".into());
        let id = failed_identity(&def, &RowIndices::default(), &err);
        assert!(id.as_str().ends_with("_GenericResolutionError"));
    }

    #[test]
    fn test_display_name_renders_values() {
        let def = sample_def();
        let name = display_name(&def, &[ArgValue::int(1), ArgValue::text("a")]);
        assert_eq!(name, "renders(1, \"a\")");
    }

    proptest::proptest! {
        #[test]
        fn prop_identity_stable_across_invocations(
            cs in 0usize..8, cr in 0usize..8, ms in 0usize..8, mr in 0usize..8, rep in 0u32..8
        ) {
            let def = sample_def();
            let idx = RowIndices { class_source: cs, class_row: cr, method_source: ms, method_row: mr, repeat: rep };
            proptest::prop_assert_eq!(identity(&def, &idx), identity(&def, &idx));
        }
    }
}
