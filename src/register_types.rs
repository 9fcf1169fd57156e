//! Assignment of one statically typed register to every SSA identifier of a routine.

use crate::cfg::{IdAllocator, Register};
use crate::containers::unordered::{UnorderedMap, UnorderedMapEntry};
use crate::errors::TranslationError;
use crate::handle_registry::{Handle, HandleRegistry};
use crate::ir::{Definition, Ident, Instr, Module, Stmt, Symbol, Type, Value};
use crate::types::{TypeLifter, TypeRepr};

/// What an identifier denotes inside a routine body
#[derive(Clone, PartialEq, Eq, Debug)]
pub enum IdentBinding {
    /// A value defined by a statement
    Register(Register),
    /// The routine's `index`th parameter
    Argument { index: usize, ty: TypeRepr },
}

impl IdentBinding {
    pub fn ty(&self) -> &TypeRepr {
        match self {
            IdentBinding::Register(r) => &r.ty,
            IdentBinding::Argument { ty, .. } => ty,
        }
    }
}

/// Resolution of identifiers to their storage, for one routine. Each identifier is bound exactly
/// once.
#[derive(Clone, Debug, Default)]
pub struct IdentMap {
    bindings: UnorderedMap<Ident, IdentBinding>,
}

impl IdentMap {
    pub fn new() -> Self {
        Default::default()
    }

    /// Bind `ident`. Fails if `ident` is already bound.
    pub fn define(
        &mut self,
        symbol: &Symbol,
        ident: Ident,
        binding: IdentBinding,
    ) -> Result<(), TranslationError> {
        match self.bindings.entry(ident) {
            UnorderedMapEntry::Occupied(e) => Err(TranslationError::DuplicateAssignment {
                symbol: symbol.clone(),
                ident: e.key().clone(),
            }),
            UnorderedMapEntry::Vacant(e) => {
                e.insert(binding);
                Ok(())
            }
        }
    }

    pub fn lookup(&self, ident: &Ident) -> Option<&IdentBinding> {
        self.bindings.get(ident)
    }

    /// The register bound to `ident`, if it is bound to one
    pub fn register(&self, ident: &Ident) -> Option<&Register> {
        match self.bindings.get(ident)? {
            IdentBinding::Register(r) => Some(r),
            IdentBinding::Argument { .. } => None,
        }
    }

    pub fn len(&self) -> usize {
        self.bindings.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bindings.is_empty()
    }

    /// Give up the map, handing over every register it holds, sorted by id
    pub fn into_registers(self) -> Vec<Register> {
        let mut regs = self
            .bindings
            .into_iter()
            .filter_map(|(_, b)| match b {
                IdentBinding::Register(r) => Some(r),
                IdentBinding::Argument { .. } => None,
            })
            .collect::<Vec<_>>();
        regs.sort_by_key(|r| r.id);
        regs
    }
}

/// Computes the type of the value defined by each statement of a routine.
pub struct RegisterTypeInferencer<'a> {
    pub symbol: &'a Symbol,
    pub module: &'a Module,
    pub handles: &'a HandleRegistry,
    pub lifter: &'a dyn TypeLifter,
}

impl<'a> RegisterTypeInferencer<'a> {
    /// Build the identifier map of `def`: its parameters, bound to arguments of `handle`, and a
    /// fresh register for every statement result, in program order.
    pub fn infer(
        &self,
        def: &Definition,
        handle: &Handle,
        alloc: &mut IdAllocator,
    ) -> Result<IdentMap, TranslationError> {
        if def.params.len() != handle.params.len() {
            return Err(self.malformed(format!(
                "definition has {} parameters but its handle has {}",
                def.params.len(),
                handle.params.len()
            )));
        }
        let mut map = IdentMap::new();
        for (index, ((_, ident), ty)) in def.params.iter().zip(&handle.params).enumerate() {
            map.define(
                self.symbol,
                ident.clone(),
                IdentBinding::Argument {
                    index,
                    ty: ty.clone(),
                },
            )?;
        }

        def.statements()
            .try_fold(map, |mut map, stmt| -> Result<IdentMap, TranslationError> {
                if let Some(ident) = &stmt.result {
                    let ty = self.result_type(stmt)?;
                    let reg = alloc.fresh_register(ty);
                    map.define(self.symbol, ident.clone(), IdentBinding::Register(reg))?;
                }
                Ok(map)
            })
    }

    /// The static type of the value `stmt` defines.
    pub fn result_type(&self, stmt: &Stmt) -> Result<TypeRepr, TranslationError> {
        let source_ty = match &stmt.instr {
            Instr::Binary { lhs, .. } => lhs.ty.clone(),
            Instr::ICmp { lhs, .. } | Instr::FCmp { lhs, .. } => match &lhs.ty {
                Type::Vector(n, _) => Type::Vector(*n, Box::new(Type::Int(1))),
                _ => Type::Int(1),
            },
            Instr::Alloca { .. } | Instr::GetElementPtr { .. } => Type::ptr(),
            Instr::Load { ty, .. } => ty.clone(),
            Instr::Cast { to, .. } => to.clone(),
            Instr::Select { then_value, .. } => then_value.ty.clone(),
            Instr::Call { ret, callee, .. } => {
                if let Value::Global(callee) = callee {
                    if let Some(handle) = self.handles.lookup(callee) {
                        return Ok(handle.ret.clone());
                    }
                }
                ret.clone()
            }
            Instr::Phi { ty, .. } => ty.clone(),
            Instr::ExtractValue { aggregate, indices } => self
                .module
                .aggregate_element(&aggregate.ty, indices)
                .cloned()
                .ok_or_else(|| {
                    self.malformed(format!(
                        "no element at {:?} in `{}`",
                        indices, aggregate.ty
                    ))
                })?,
            Instr::InsertValue { aggregate, .. } => aggregate.ty.clone(),
            Instr::ExtractElement { vector, .. } => match &vector.ty {
                Type::Vector(_, t) => (**t).clone(),
                t => return Err(self.malformed(format!("`extractelement` from `{}`", t))),
            },
            Instr::InsertElement { vector, .. } => vector.ty.clone(),
            Instr::Store { .. }
            | Instr::Ret(_)
            | Instr::Br(_)
            | Instr::CondBr { .. }
            | Instr::Switch { .. }
            | Instr::IndirectBr { .. }
            | Instr::Unreachable => {
                return Err(self.malformed(format!(
                    "`{}` defined by an instruction that produces no value",
                    stmt.result
                        .as_ref()
                        .map(|i| i.to_string())
                        .unwrap_or_default()
                )))
            }
        };
        if source_ty.is_void() {
            return Ok(TypeRepr::Unit);
        }
        self.lifter
            .lift(&source_ty)
            .map_err(|source| TranslationError::TypeLift {
                symbol: self.symbol.clone(),
                source,
            })
    }

    fn malformed(&self, detail: String) -> TranslationError {
        TranslationError::Malformed {
            symbol: self.symbol.clone(),
            detail,
        }
    }
}
