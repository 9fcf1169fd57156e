//! One callable handle per routine symbol.

use crate::containers::InsertionOrderedSet;
use crate::errors::TranslationError;
use crate::ir::{Declaration, Symbol};
use crate::log::*;
use crate::translation_config::TranslationConfig;
use crate::types::{TypeLifter, TypeRepr};
use std::rc::Rc;

/// Index of a handle within its registry, in order of first declaration
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Debug)]
pub struct HandleId(pub usize);

/// The identity and lifted signature of a declared or defined routine.
///
/// Handles are shared as `Rc<Handle>`; two handles are the same routine exactly when they are the
/// same allocation (see [`Handle::same`]).
#[derive(Debug, PartialEq, Eq)]
pub struct Handle {
    pub id: HandleId,
    pub symbol: Symbol,
    pub params: Vec<TypeRepr>,
    pub ret: TypeRepr,
    pub varargs: bool,
}

impl Handle {
    pub fn same(a: &Rc<Handle>, b: &Rc<Handle>) -> bool {
        Rc::ptr_eq(a, b)
    }

    fn signature_matches(&self, params: &[TypeRepr], ret: &TypeRepr, varargs: bool) -> bool {
        self.params == params && &self.ret == ret && self.varargs == varargs
    }
}

/// Registry of routine handles, keyed by symbol. Populated once per module, before any routine is
/// translated, and read-only afterwards.
#[derive(Debug, Default)]
pub struct HandleRegistry {
    symbols: InsertionOrderedSet<Symbol>,
    handles: Vec<Rc<Handle>>,
}

impl HandleRegistry {
    pub fn new() -> Self {
        Default::default()
    }

    /// Declare a routine, returning its handle. Declaring an already known symbol returns the
    /// existing handle; the new signature is only compared against it if
    /// `validate_redeclared_signatures` is set.
    pub fn declare(
        &mut self,
        decl: &Declaration,
        lifter: &dyn TypeLifter,
        config: &TranslationConfig,
    ) -> Result<Rc<Handle>, TranslationError> {
        let existing = self.lookup(&decl.symbol).cloned();
        if let Some(existing) = &existing {
            if !config.validate_redeclared_signatures {
                debug!("Keeping existing handle for redeclared symbol"; "symbol" => %decl.symbol);
                return Ok(existing.clone());
            }
        }

        let lift_err = |source| TranslationError::TypeLift {
            symbol: decl.symbol.clone(),
            source,
        };
        let params = decl
            .params
            .iter()
            .map(|t| lifter.lift(t))
            .collect::<Result<Vec<_>, _>>()
            .map_err(lift_err)?;
        let ret = lifter.lift_return(&decl.ret).map_err(lift_err)?;

        if let Some(existing) = existing {
            return if existing.signature_matches(&params, &ret, decl.varargs) {
                Ok(existing)
            } else {
                Err(TranslationError::IncompatibleRedeclaration {
                    symbol: decl.symbol.clone(),
                })
            };
        }

        let idx = self.symbols.insert(decl.symbol.clone());
        assert_eq!(idx, self.handles.len());
        let handle = Rc::new(Handle {
            id: HandleId(idx),
            symbol: decl.symbol.clone(),
            params,
            ret,
            varargs: decl.varargs,
        });
        trace!("Declared handle"; "symbol" => %decl.symbol, "id" => idx);
        self.handles.push(handle.clone());
        Ok(handle)
    }

    /// The handle for `symbol`, which must have been declared.
    pub fn resolve(&self, symbol: &Symbol) -> Result<Rc<Handle>, TranslationError> {
        self.lookup(symbol)
            .cloned()
            .ok_or_else(|| TranslationError::UnknownSymbol {
                symbol: symbol.clone(),
            })
    }

    pub fn lookup(&self, symbol: &Symbol) -> Option<&Rc<Handle>> {
        self.symbols
            .get_index(symbol)
            .and_then(|idx| self.handles.get(idx))
    }

    /// All handles, in order of first declaration
    pub fn iter(&self) -> impl Iterator<Item = &Rc<Handle>> {
        self.handles.iter()
    }

    pub fn len(&self) -> usize {
        self.handles.len()
    }

    pub fn is_empty(&self) -> bool {
        self.handles.is_empty()
    }
}
