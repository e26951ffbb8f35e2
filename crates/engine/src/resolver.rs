//! Generic type resolver
//!
//! Unifies declared (possibly open) parameter types against the runtime
//! types of supplied argument values, producing a `GenericBinding` or a
//! failure. Resolution is deterministic and side-effect-free: it may be
//! invoked many times for the same definition with different argument rows
//! and shares no mutable state between calls.
//!
//! Unification rules, parameter by parameter:
//! - a bare type parameter binds to the argument's runtime type, or is
//!   checked for consistency if already bound by an earlier parameter
//! - array types recurse into their element type
//! - a generic declared type unifies against an instantiation of the same
//!   generic definition found on the runtime type (or its base chain /
//!   interfaces), recursing pairwise over type arguments
//! - any other pairing requires the runtime type to be identical to or
//!   derived from / implementing the declared type
//!
//! After unification every declared type parameter must be bound, and every
//! binding must satisfy its parameter's constraints.

use lattice_core::{
    Error, GenericBinding, Result, TypeConstraint, TypeDesc, TypeInfo, TypeKind, TypeParam,
};
use std::sync::Arc;

/// Resolve generic bindings for one argument row
///
/// `declared` and `argument_types` are positionally paired; a length
/// mismatch is a resolution failure, not a panic.
pub fn resolve(
    declared: &[TypeDesc],
    type_params: &[TypeParam],
    argument_types: &[Arc<TypeInfo>],
) -> Result<GenericBinding> {
    if declared.len() != argument_types.len() {
        return Err(Error::GenericResolution(format!(
            "expected {} argument(s), got {}",
            declared.len(),
            argument_types.len()
        )));
    }

    let mut binding = GenericBinding::empty();
    for (desc, runtime) in declared.iter().zip(argument_types) {
        unify(desc, runtime, &mut binding)?;
    }

    let unresolved: Vec<&str> = type_params
        .iter()
        .filter(|p| binding.get(&p.name).is_none())
        .map(|p| p.name.as_str())
        .collect();
    if !unresolved.is_empty() {
        return Err(Error::GenericResolution(format!(
            "type parameter(s) left unbound: {}",
            unresolved.join(", ")
        )));
    }

    for param in type_params {
        // unwrap is safe: unbound parameters were rejected above
        let bound = binding.get(&param.name).cloned().unwrap();
        check_constraints(param, &bound)?;
    }

    Ok(binding)
}

fn unify(desc: &TypeDesc, runtime: &Arc<TypeInfo>, binding: &mut GenericBinding) -> Result<()> {
    match desc {
        TypeDesc::Param(name) => match binding.get(name) {
            Some(existing) => {
                if existing.name() != runtime.name() {
                    Err(Error::GenericResolution(format!(
                        "inconsistent binding for {name}: {} vs {}",
                        existing.name(),
                        runtime.name()
                    )))
                } else {
                    Ok(())
                }
            }
            None => {
                binding.bind(name.clone(), runtime.clone());
                Ok(())
            }
        },
        TypeDesc::Array(elem) => match runtime.element() {
            Some(runtime_elem) => unify(elem, runtime_elem, binding),
            None => Err(Error::GenericResolution(format!(
                "cannot unify array type {desc} with non-array {}",
                runtime.name()
            ))),
        },
        TypeDesc::Generic { def, args } => {
            match runtime.find_instantiation_of(def) {
                Some(inst) => {
                    if inst.args.len() != args.len() {
                        return Err(Error::GenericResolution(format!(
                            "arity mismatch unifying {desc} with {}",
                            runtime.name()
                        )));
                    }
                    for (a, r) in args.iter().zip(&inst.args) {
                        unify(a, r, binding)?;
                    }
                    Ok(())
                }
                None if !desc.has_open_params() => {
                    // fully closed declared type: plain assignability check
                    require_assignable(desc, runtime, binding)
                }
                None => Err(Error::GenericResolution(format!(
                    "{} is not an instantiation of {def}",
                    runtime.name()
                ))),
            }
        }
        TypeDesc::Concrete(target) => {
            if runtime.is_assignable_to(target) {
                Ok(())
            } else {
                Err(Error::GenericResolution(format!(
                    "{} is not assignable to declared type {}",
                    runtime.name(),
                    target.name()
                )))
            }
        }
    }
}

fn require_assignable(
    desc: &TypeDesc,
    runtime: &Arc<TypeInfo>,
    binding: &GenericBinding,
) -> Result<()> {
    // a closed Generic desc like List<Int> compares by rendered name after
    // substitution (there are no open params left to bind)
    let rendered = binding.substitute(desc).to_string();
    if runtime.name() == rendered {
        Ok(())
    } else {
        Err(Error::GenericResolution(format!(
            "{} is not assignable to declared type {rendered}",
            runtime.name()
        )))
    }
}

fn check_constraints(param: &TypeParam, bound: &Arc<TypeInfo>) -> Result<()> {
    for constraint in &param.constraints {
        let ok = match constraint {
            TypeConstraint::ReferenceType => bound.kind() == TypeKind::Reference,
            TypeConstraint::ValueType => bound.kind() == TypeKind::Value,
            TypeConstraint::DefaultConstructible => bound.has_default_ctor(),
            TypeConstraint::Implements(target) => bound.is_assignable_to(target),
        };
        if !ok {
            return Err(Error::GenericResolution(format!(
                "{} bound to {} violates constraint {}",
                param.name,
                bound.name(),
                render_constraint(constraint)
            )));
        }
    }
    Ok(())
}

fn render_constraint(constraint: &TypeConstraint) -> String {
    match constraint {
        TypeConstraint::ReferenceType => "reference-type".to_string(),
        TypeConstraint::ValueType => "value-type".to_string(),
        TypeConstraint::DefaultConstructible => "default-constructible".to_string(),
        TypeConstraint::Implements(t) => format!("implements {}", t.name()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use lattice_core::well_known;

    fn ty(name: &str) -> Arc<TypeInfo> {
        TypeInfo::reference(name).into_arc()
    }

    #[test]
    fn test_bare_param_binds_directly() {
        let binding = resolve(
            &[TypeDesc::param("T")],
            &[TypeParam::new("T")],
            &[well_known::int()],
        )
        .unwrap();
        assert_eq!(binding.get("T").unwrap().name(), "Int");
    }

    #[test]
    fn test_inconsistent_binding_fails() {
        // <T>(T, T) given (Int, String)
        let err = resolve(
            &[TypeDesc::param("T"), TypeDesc::param("T")],
            &[TypeParam::new("T")],
            &[well_known::int(), well_known::text()],
        )
        .unwrap_err();
        assert!(err.to_string().contains("inconsistent binding for T"));
    }

    #[test]
    fn test_array_recurses_into_element() {
        let int_array = TypeInfo::array_of(well_known::int()).into_arc();
        let binding = resolve(
            &[TypeDesc::array(TypeDesc::param("T"))],
            &[TypeParam::new("T")],
            &[int_array],
        )
        .unwrap();
        assert_eq!(binding.get("T").unwrap().name(), "Int");
    }

    #[test]
    fn test_array_against_non_array_fails() {
        let err = resolve(
            &[TypeDesc::array(TypeDesc::param("T"))],
            &[TypeParam::new("T")],
            &[well_known::int()],
        )
        .unwrap_err();
        assert!(err.to_string().contains("non-array"));
    }

    #[test]
    fn test_generic_instantiation_recurses_pairwise() {
        let list_int = TypeInfo::generic("List", vec![well_known::int()]).into_arc();
        let binding = resolve(
            &[TypeDesc::Generic {
                def: "List".to_string(),
                args: vec![TypeDesc::param("T")],
            }],
            &[TypeParam::new("T")],
            &[list_int],
        )
        .unwrap();
        assert_eq!(binding.get("T").unwrap().name(), "Int");
    }

    #[test]
    fn test_generic_found_through_base_chain() {
        let list_int = TypeInfo::generic("List", vec![well_known::int()]).into_arc();
        let derived = TypeInfo::reference("MyIntList").with_base(list_int).into_arc();
        let binding = resolve(
            &[TypeDesc::Generic {
                def: "List".to_string(),
                args: vec![TypeDesc::param("T")],
            }],
            &[TypeParam::new("T")],
            &[derived],
        )
        .unwrap();
        assert_eq!(binding.get("T").unwrap().name(), "Int");
    }

    #[test]
    fn test_concrete_accepts_derived_type() {
        let animal = ty("pets.Animal");
        let dog = TypeInfo::reference("pets.Dog")
            .with_base(animal.clone())
            .into_arc();
        assert!(resolve(&[TypeDesc::concrete(animal)], &[], &[dog]).is_ok());
    }

    #[test]
    fn test_concrete_rejects_unrelated_type() {
        let animal = ty("pets.Animal");
        let rock = ty("geo.Rock");
        let err = resolve(&[TypeDesc::concrete(animal)], &[], &[rock]).unwrap_err();
        assert!(err.to_string().contains("not assignable"));
    }

    #[test]
    fn test_unbound_parameter_fails() {
        let err = resolve(
            &[TypeDesc::concrete(well_known::int())],
            &[TypeParam::new("T")],
            &[well_known::int()],
        )
        .unwrap_err();
        assert!(err.to_string().contains("left unbound: T"));
    }

    #[test]
    fn test_arity_mismatch_fails() {
        let err = resolve(&[TypeDesc::param("T")], &[TypeParam::new("T")], &[]).unwrap_err();
        assert!(err.to_string().contains("expected 1 argument"));
    }

    #[test]
    fn test_value_type_constraint() {
        let param = TypeParam::new("T").with_constraint(TypeConstraint::ValueType);
        assert!(resolve(&[TypeDesc::param("T")], &[param.clone()], &[well_known::int()]).is_ok());
        let err =
            resolve(&[TypeDesc::param("T")], &[param], &[well_known::text()]).unwrap_err();
        assert!(err.to_string().contains("value-type"));
    }

    #[test]
    fn test_default_constructible_constraint() {
        let no_ctor = TypeInfo::reference("acme.NoCtor")
            .without_default_ctor()
            .into_arc();
        let param = TypeParam::new("T").with_constraint(TypeConstraint::DefaultConstructible);
        let err = resolve(&[TypeDesc::param("T")], &[param], &[no_ctor]).unwrap_err();
        assert!(err.to_string().contains("default-constructible"));
    }

    #[test]
    fn test_implements_constraint_checked_transitively() {
        let walks = ty("pets.IWalks");
        let animal = TypeInfo::reference("pets.Animal")
            .with_interface(walks.clone())
            .into_arc();
        let dog = TypeInfo::reference("pets.Dog").with_base(animal).into_arc();
        let param =
            TypeParam::new("T").with_constraint(TypeConstraint::Implements(walks.clone()));
        assert!(resolve(&[TypeDesc::param("T")], &[param.clone()], &[dog]).is_ok());
        let err = resolve(&[TypeDesc::param("T")], &[param], &[ty("geo.Rock")]).unwrap_err();
        assert!(err.to_string().contains("implements pets.IWalks"));
    }

    #[test]
    fn test_resolution_is_pure() {
        // same inputs always produce the same binding or the same failure
        let declared = [TypeDesc::param("T"), TypeDesc::param("U")];
        let params = [TypeParam::new("T"), TypeParam::new("U")];
        let args = [well_known::int(), well_known::text()];
        let a = resolve(&declared, &params, &args).unwrap();
        let b = resolve(&declared, &params, &args).unwrap();
        assert_eq!(a.to_string(), b.to_string());
    }

    proptest::proptest! {
        #[test]
        fn prop_same_inputs_same_outcome(name in "[A-Z][a-z]{0,8}") {
            let rt = TypeInfo::reference(format!("p.{name}")).into_arc();
            let declared = [TypeDesc::param("T"), TypeDesc::param("T")];
            let params = [TypeParam::new("T")];
            let args = [rt.clone(), well_known::int()];
            match (resolve(&declared, &params, &args), resolve(&declared, &params, &args)) {
                (Ok(a), Ok(b)) => proptest::prop_assert_eq!(a.to_string(), b.to_string()),
                (Err(a), Err(b)) => proptest::prop_assert_eq!(a.to_string(), b.to_string()),
                _ => proptest::prop_assert!(false, "non-deterministic resolution"),
            }
        }
    }
}
