//! Target-side type representations, and the service that lifts source [`Type`]s into them.

use crate::containers::unordered::UnorderedMap;
use crate::errors::TypeLiftError;
use crate::ir::{FloatKind, Module, Type};
use itertools::Itertools;

/// The static type of a target register.
#[derive(Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum TypeRepr {
    /// The return type of routines that return nothing
    Unit,
    Bool,
    BitVector(u32),
    Pointer,
    Float(FloatKind),
    /// Arrays and vectors alike; the length is a property of memory layout, not of the value
    Vector(Box<TypeRepr>),
    Struct(Vec<TypeRepr>),
}

impl std::fmt::Debug for TypeRepr {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        match self {
            TypeRepr::Unit => write!(f, "Unit"),
            TypeRepr::Bool => write!(f, "Bool"),
            TypeRepr::BitVector(w) => write!(f, "BV{}", w),
            TypeRepr::Pointer => write!(f, "Ptr"),
            TypeRepr::Float(k) => write!(f, "{:?}", k),
            TypeRepr::Vector(t) => write!(f, "Vector<{:?}>", t),
            TypeRepr::Struct(ts) => write!(f, "Struct{{{:?}}}", ts.iter().format(", ")),
        }
    }
}

/// Converts source types into target types.
pub trait TypeLifter {
    /// Lift the type of a first-class value.
    fn lift(&self, ty: &Type) -> Result<TypeRepr, TypeLiftError>;

    /// Lift a routine return type. Unlike [`lift`](Self::lift), accepts `void`.
    fn lift_return(&self, ty: &Type) -> Result<TypeRepr, TypeLiftError> {
        match ty {
            Type::Void => Ok(TypeRepr::Unit),
            _ => self.lift(ty),
        }
    }
}

/// The standard lifting: `i1` becomes [`TypeRepr::Bool`], other integers bit-vectors of their
/// width, and aggregates are lifted element-wise. Named structs are looked up in the table of
/// known definitions.
#[derive(Clone, Debug, Default)]
pub struct StandardTypeLifter {
    named_types: UnorderedMap<String, Option<Type>>,
}

impl StandardTypeLifter {
    /// A lifter that knows no named struct types
    pub fn new() -> Self {
        Default::default()
    }

    /// A lifter that knows the named struct types defined by `module`
    pub fn for_module(module: &Module) -> Self {
        Self {
            named_types: module.named_types.iter().cloned().collect(),
        }
    }

    /// Lift `ty`, where `enclosing` holds the named types whose definitions are being lifted
    fn lift_within(
        &self,
        ty: &Type,
        enclosing: &mut Vec<String>,
    ) -> Result<TypeRepr, TypeLiftError> {
        match ty {
            Type::Void => Err(TypeLiftError::VoidValue),
            Type::Int(0) => Err(TypeLiftError::ZeroWidthInteger),
            Type::Int(1) => Ok(TypeRepr::Bool),
            Type::Int(w) => Ok(TypeRepr::BitVector(*w)),
            Type::FloatingPoint(k) => Ok(TypeRepr::Float(*k)),
            Type::Ptr(_) => Ok(TypeRepr::Pointer),
            Type::Array(_, t) | Type::Vector(_, t) => Ok(TypeRepr::Vector(Box::new(
                self.lift_element(ty, t, enclosing)?,
            ))),
            Type::Struct { fields, .. } => Ok(TypeRepr::Struct(
                fields
                    .iter()
                    .map(|f| self.lift_element(ty, f, enclosing))
                    .collect::<Result<_, _>>()?,
            )),
            Type::Named(name) => {
                if enclosing.contains(name) {
                    return Err(TypeLiftError::RecursiveType { name: name.clone() });
                }
                match self.named_types.get(name) {
                    Some(Some(t)) => {
                        enclosing.push(name.clone());
                        let lifted = self.lift_within(t, enclosing);
                        enclosing.pop();
                        lifted
                    }
                    _ => Err(TypeLiftError::OpaqueStruct { name: name.clone() }),
                }
            }
            Type::Function { .. } | Type::Label | Type::Metadata => {
                Err(TypeLiftError::NotFirstClass { ty: ty.to_string() })
            }
        }
    }

    fn lift_element(
        &self,
        outer: &Type,
        inner: &Type,
        enclosing: &mut Vec<String>,
    ) -> Result<TypeRepr, TypeLiftError> {
        self.lift_within(inner, enclosing).map_err(|e| TypeLiftError::Element {
            ty: outer.to_string(),
            inner: Box::new(e),
        })
    }
}

impl TypeLifter for StandardTypeLifter {
    fn lift(&self, ty: &Type) -> Result<TypeRepr, TypeLiftError> {
        self.lift_within(ty, &mut vec![])
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lifting_named_and_nested_types() {
        let module = Module {
            named_types: vec![
                (
                    "struct.pair".into(),
                    Some(Type::Struct {
                        fields: vec![Type::Int(32), Type::ptr()],
                        packed: false,
                    }),
                ),
                ("struct.opaque".into(), None),
            ],
            ..Default::default()
        };
        let lifter = StandardTypeLifter::for_module(&module);
        assert_eq!(
            lifter.lift(&Type::Array(4, Box::new(Type::Named("struct.pair".into())))),
            Ok(TypeRepr::Vector(Box::new(TypeRepr::Struct(vec![
                TypeRepr::BitVector(32),
                TypeRepr::Pointer
            ]))))
        );
        assert_eq!(lifter.lift(&Type::Int(1)), Ok(TypeRepr::Bool));
        assert_eq!(lifter.lift_return(&Type::Void), Ok(TypeRepr::Unit));
        assert_eq!(lifter.lift(&Type::Void), Err(TypeLiftError::VoidValue));
        assert!(matches!(
            lifter.lift(&Type::Struct {
                fields: vec![Type::Named("struct.opaque".into())],
                packed: false
            }),
            Err(TypeLiftError::Element { .. })
        ));
    }

    #[test]
    fn self_containing_named_types_are_rejected() {
        let module = crate::ir_reader::read_module(
            "%T = type { i32, %T }\n\
             %A = type { %B }\n\
             %B = type { %A }\n\
             %list = type { i32, ptr }\n\n\
             declare void @f(%T, %A, %list)\n",
        )
        .unwrap();
        let lifter = StandardTypeLifter::for_module(&module);
        let params = &module.declarations[0].params;

        let innermost = |mut e: TypeLiftError| loop {
            match e {
                TypeLiftError::Element { inner, .. } => e = *inner,
                e => return e,
            }
        };
        assert_eq!(
            lifter.lift(&params[0]).map_err(innermost),
            Err(TypeLiftError::RecursiveType { name: "T".into() })
        );
        assert_eq!(
            lifter.lift(&params[1]).map_err(innermost),
            Err(TypeLiftError::RecursiveType { name: "A".into() })
        );
        // Self-reference behind a pointer is fine
        assert_eq!(
            lifter.lift(&params[2]),
            Ok(TypeRepr::Struct(vec![
                TypeRepr::BitVector(32),
                TypeRepr::Pointer
            ]))
        );
        // A named type used twice side by side is not recursive
        assert!(lifter
            .lift(&Type::Struct {
                fields: vec![Type::Named("list".into()), Type::Named("list".into())],
                packed: false
            })
            .is_ok());
    }
}
