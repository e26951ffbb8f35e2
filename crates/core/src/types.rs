//! Core types for the orchestration system
//!
//! This module defines the foundational types:
//! - TestId: Deterministic identity string for one concrete executable test
//! - SessionId: Unique identifier for one orchestration run session
//! - TypeInfo: Runtime type metadata (name, kind, base, interfaces)
//! - TypeDesc: Declared (possibly open) parameter type
//! - TypeParam / TypeConstraint: Declared type parameters and their constraints
//! - GenericBinding: Resolved mapping from type parameters to concrete types
//!
//! The system has no ambient reflection; every type the test space can
//! mention is described explicitly by a `TypeInfo` supplied by the discovery
//! collaborator.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;
use uuid::Uuid;

/// Deterministic identity of one concrete executable test
///
/// Identities are stable across runs for unchanged inputs: they are computed
/// from declared metadata and expansion indices only, never from materialized
/// argument values. This is what makes depends-on matching and cross-run
/// result correlation possible.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct TestId(String);

impl TestId {
    /// Wrap an already-computed identity string
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// The identity as a string slice
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for TestId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for TestId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl From<String> for TestId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

/// Unique identifier for one orchestration run session
///
/// A SessionId is a wrapper around a UUID v4. Shared-source registries and
/// teardown guards are owned by a session so multiple runs never
/// cross-contaminate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SessionId(Uuid);

impl SessionId {
    /// Create a new random SessionId using UUID v4
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for SessionId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Whether a type has value or reference semantics
///
/// Consulted when checking the value-type / reference-type generic
/// constraints.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TypeKind {
    /// Value semantics (satisfies the value-type constraint)
    Value,
    /// Reference semantics (satisfies the reference-type constraint)
    Reference,
}

/// Generic instantiation metadata carried by a `TypeInfo`
///
/// Present when the described type is an instantiation of a generic
/// definition, e.g. `List<Int>` carries `def = "List"`, `args = [Int]`.
#[derive(Debug, Clone)]
pub struct GenericInstantiation {
    /// Name of the generic definition
    pub def: String,
    /// Concrete type arguments, in declaration order
    pub args: Vec<Arc<TypeInfo>>,
}

/// Runtime type metadata
///
/// Describes one concrete type the test space can mention: its qualified
/// name, value/reference kind, whether a parameterless constructor exists,
/// its base type chain and implemented interfaces, and (when applicable)
/// the generic definition it instantiates or the element type it is an
/// array of.
///
/// Equality is by qualified name; names are assumed unique within a run.
#[derive(Debug, Clone)]
pub struct TypeInfo {
    name: String,
    kind: TypeKind,
    has_default_ctor: bool,
    base: Option<Arc<TypeInfo>>,
    interfaces: Vec<Arc<TypeInfo>>,
    generic: Option<GenericInstantiation>,
    element: Option<Arc<TypeInfo>>,
}

impl TypeInfo {
    /// Describe a reference type with a parameterless constructor
    pub fn reference(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            kind: TypeKind::Reference,
            has_default_ctor: true,
            base: None,
            interfaces: Vec::new(),
            generic: None,
            element: None,
        }
    }

    /// Describe a value type (value types always have a default constructor)
    pub fn value(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            kind: TypeKind::Value,
            has_default_ctor: true,
            base: None,
            interfaces: Vec::new(),
            generic: None,
            element: None,
        }
    }

    /// Describe an instantiation of a generic definition, e.g. `List<Int>`
    pub fn generic(def: impl Into<String>, args: Vec<Arc<TypeInfo>>) -> Self {
        let def = def.into();
        let rendered = format!(
            "{}<{}>",
            def,
            args.iter().map(|a| a.name()).collect::<Vec<_>>().join(", ")
        );
        Self {
            name: rendered,
            kind: TypeKind::Reference,
            has_default_ctor: true,
            base: None,
            interfaces: Vec::new(),
            generic: Some(GenericInstantiation { def, args }),
            element: None,
        }
    }

    /// Describe an array type over the given element type
    pub fn array_of(element: Arc<TypeInfo>) -> Self {
        let name = format!("{}[]", element.name());
        Self {
            name,
            kind: TypeKind::Reference,
            has_default_ctor: false,
            base: None,
            interfaces: Vec::new(),
            generic: None,
            element: Some(element),
        }
    }

    /// Set the base type
    pub fn with_base(mut self, base: Arc<TypeInfo>) -> Self {
        self.base = Some(base);
        self
    }

    /// Add an implemented interface
    pub fn with_interface(mut self, interface: Arc<TypeInfo>) -> Self {
        self.interfaces.push(interface);
        self
    }

    /// Mark the type as lacking a parameterless constructor
    pub fn without_default_ctor(mut self) -> Self {
        self.has_default_ctor = false;
        self
    }

    /// Finish building and wrap in an `Arc`
    pub fn into_arc(self) -> Arc<TypeInfo> {
        Arc::new(self)
    }

    /// Qualified type name
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Value or reference kind
    pub fn kind(&self) -> TypeKind {
        self.kind
    }

    /// Whether a parameterless constructor exists
    pub fn has_default_ctor(&self) -> bool {
        self.has_default_ctor
    }

    /// Base type, if declared
    pub fn base(&self) -> Option<&Arc<TypeInfo>> {
        self.base.as_ref()
    }

    /// Generic instantiation metadata, if this type instantiates a generic
    /// definition
    pub fn generic_instantiation(&self) -> Option<&GenericInstantiation> {
        self.generic.as_ref()
    }

    /// Array element type, if this is an array type
    pub fn element(&self) -> Option<&Arc<TypeInfo>> {
        self.element.as_ref()
    }

    /// Whether `self` is identical to, derived from, or implements `target`
    ///
    /// Walks the base chain and implemented interfaces transitively.
    pub fn is_assignable_to(&self, target: &TypeInfo) -> bool {
        if self.name == target.name {
            return true;
        }
        if let Some(base) = &self.base {
            if base.is_assignable_to(target) {
                return true;
            }
        }
        self.interfaces.iter().any(|i| i.is_assignable_to(target))
    }

    /// Find an instantiation of the given generic definition in this type,
    /// its base chain, or its interfaces
    pub fn find_instantiation_of(&self, def: &str) -> Option<&GenericInstantiation> {
        if let Some(g) = &self.generic {
            if g.def == def {
                return Some(g);
            }
        }
        if let Some(base) = &self.base {
            if let Some(g) = base.find_instantiation_of(def) {
                return Some(g);
            }
        }
        self.interfaces
            .iter()
            .find_map(|i| i.find_instantiation_of(def))
    }
}

impl PartialEq for TypeInfo {
    fn eq(&self, other: &Self) -> bool {
        self.name == other.name
    }
}

impl Eq for TypeInfo {}

impl fmt::Display for TypeInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.name)
    }
}

/// A declared (possibly open) parameter type
///
/// Declared types appear in constructor and method signatures; they may
/// mention type parameters that are only resolved once argument values are
/// known.
#[derive(Debug, Clone, PartialEq)]
pub enum TypeDesc {
    /// A bare type parameter, e.g. `T`
    Param(String),
    /// An array of some declared element type, e.g. `T[]`
    Array(Box<TypeDesc>),
    /// An instantiation of a generic definition over declared types,
    /// e.g. `List<T>`
    Generic {
        /// Name of the generic definition
        def: String,
        /// Declared type arguments
        args: Vec<TypeDesc>,
    },
    /// A fully concrete type
    Concrete(Arc<TypeInfo>),
}

impl TypeDesc {
    /// Shorthand for a bare type parameter
    pub fn param(name: impl Into<String>) -> Self {
        TypeDesc::Param(name.into())
    }

    /// Shorthand for a concrete type
    pub fn concrete(ty: Arc<TypeInfo>) -> Self {
        TypeDesc::Concrete(ty)
    }

    /// Shorthand for an array of a declared element type
    pub fn array(elem: TypeDesc) -> Self {
        TypeDesc::Array(Box::new(elem))
    }

    /// Whether any open type parameter appears in this declared type
    pub fn has_open_params(&self) -> bool {
        match self {
            TypeDesc::Param(_) => true,
            TypeDesc::Array(elem) => elem.has_open_params(),
            TypeDesc::Generic { args, .. } => args.iter().any(TypeDesc::has_open_params),
            TypeDesc::Concrete(_) => false,
        }
    }
}

impl fmt::Display for TypeDesc {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TypeDesc::Param(name) => write!(f, "{name}"),
            TypeDesc::Array(elem) => write!(f, "{elem}[]"),
            TypeDesc::Generic { def, args } => {
                write!(f, "{def}<")?;
                for (i, a) in args.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{a}")?;
                }
                write!(f, ">")
            }
            TypeDesc::Concrete(ty) => write!(f, "{}", ty.name()),
        }
    }
}

/// A constraint declared on a type parameter
#[derive(Debug, Clone)]
pub enum TypeConstraint {
    /// The bound type must have reference semantics
    ReferenceType,
    /// The bound type must have value semantics
    ValueType,
    /// The bound type must have a parameterless constructor
    DefaultConstructible,
    /// The bound type must derive from or implement the given type
    Implements(Arc<TypeInfo>),
}

/// A declared type parameter with its constraints
#[derive(Debug, Clone)]
pub struct TypeParam {
    /// Parameter name, e.g. `T`
    pub name: String,
    /// Declared constraints, all of which must hold for a binding
    pub constraints: Vec<TypeConstraint>,
}

impl TypeParam {
    /// Declare an unconstrained type parameter
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            constraints: Vec::new(),
        }
    }

    /// Add a constraint
    pub fn with_constraint(mut self, constraint: TypeConstraint) -> Self {
        self.constraints.push(constraint);
        self
    }
}

/// Resolved mapping from declared type parameters to concrete types
///
/// A successful binding covers every declared type parameter. Bindings are
/// immutable once produced by the resolver.
#[derive(Debug, Clone, Default)]
pub struct GenericBinding {
    map: BTreeMap<String, Arc<TypeInfo>>,
}

impl GenericBinding {
    /// An empty binding (used for non-generic classes and methods)
    pub fn empty() -> Self {
        Self::default()
    }

    /// Bind a parameter to a concrete type
    pub fn bind(&mut self, param: impl Into<String>, ty: Arc<TypeInfo>) {
        self.map.insert(param.into(), ty);
    }

    /// Look up the concrete type bound to a parameter
    pub fn get(&self, param: &str) -> Option<&Arc<TypeInfo>> {
        self.map.get(param)
    }

    /// Whether no parameters are bound
    pub fn is_empty(&self) -> bool {
        self.map.is_empty()
    }

    /// Number of bound parameters
    pub fn len(&self) -> usize {
        self.map.len()
    }

    /// Iterate bound (parameter, type) pairs in parameter-name order
    pub fn iter(&self) -> impl Iterator<Item = (&String, &Arc<TypeInfo>)> {
        self.map.iter()
    }

    /// Substitute bound parameters into a declared type
    ///
    /// Parameters without a binding are left open; callers that require a
    /// closed type must check `has_open_params` on the result.
    pub fn substitute(&self, desc: &TypeDesc) -> TypeDesc {
        match desc {
            TypeDesc::Param(name) => match self.map.get(name) {
                Some(ty) => TypeDesc::Concrete(ty.clone()),
                None => desc.clone(),
            },
            TypeDesc::Array(elem) => TypeDesc::Array(Box::new(self.substitute(elem))),
            TypeDesc::Generic { def, args } => TypeDesc::Generic {
                def: def.clone(),
                args: args.iter().map(|a| self.substitute(a)).collect(),
            },
            TypeDesc::Concrete(_) => desc.clone(),
        }
    }
}

// Renders `[T = Int, U = String]`
impl fmt::Display for GenericBinding {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[")?;
        for (i, (param, ty)) in self.map.iter().enumerate() {
            if i > 0 {
                write!(f, ", ")?;
            }
            write!(f, "{} = {}", param, ty.name())?;
        }
        write!(f, "]")
    }
}
