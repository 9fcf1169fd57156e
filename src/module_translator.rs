//! Translation of a whole module.

use crate::cfg::{Cfg, Literal};
use crate::containers::unordered::UnorderedMap;
use crate::errors::TranslationError;
use crate::handle_registry::HandleRegistry;
use crate::ir::{Definition, Module, Symbol, Type, Value};
use crate::log::*;
use crate::routine_translator::RoutineTranslator;
use crate::structuring::{CfgStructurer, JumpGraphStructurer};
use crate::translation_config::{TranslationConfig, CONFIG};
use crate::types::{TypeLifter, TypeRepr};
use std::sync::atomic::{AtomicU64, Ordering};

/// Identity of one [`ModuleTranslation`]. Every translation gets a fresh one, even of the same
/// module.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Debug)]
pub struct TranslationId(u64);

static NEXT_TRANSLATION_ID: AtomicU64 = AtomicU64::new(0);

impl TranslationId {
    fn fresh() -> Self {
        Self(NEXT_TRANSLATION_ID.fetch_add(1, Ordering::Relaxed))
    }
}

/// The initial value of a global variable
#[derive(Clone, PartialEq, Debug)]
pub struct GlobalInit {
    pub ty: TypeRepr,
    pub constant: bool,
    /// Absent for external globals, and for initializers that are not simple constants
    pub value: Option<Literal>,
}

pub type GlobalInitMap = UnorderedMap<Symbol, GlobalInit>;

/// Produces the initial values of a module's globals.
pub trait GlobalInitBuilder {
    fn build(
        &self,
        module: &Module,
        handles: &HandleRegistry,
        lifter: &dyn TypeLifter,
    ) -> Result<GlobalInitMap, TranslationError>;
}

/// Records every global whose initializer is a single constant.
#[derive(Clone, Copy, Debug, Default)]
pub struct ConstantGlobalInitBuilder;

impl GlobalInitBuilder for ConstantGlobalInitBuilder {
    fn build(
        &self,
        module: &Module,
        handles: &HandleRegistry,
        lifter: &dyn TypeLifter,
    ) -> Result<GlobalInitMap, TranslationError> {
        module
            .globals
            .iter()
            .map(|g| {
                let ty = lifter
                    .lift(&g.ty)
                    .map_err(|source| TranslationError::TypeLift {
                        symbol: g.symbol.clone(),
                        source,
                    })?;
                let value = g
                    .init
                    .as_ref()
                    .and_then(|v| constant_literal(&g.ty, &ty, v, handles));
                Ok((
                    g.symbol.clone(),
                    GlobalInit {
                        ty,
                        constant: g.constant,
                        value,
                    },
                ))
            })
            .collect()
    }
}

fn constant_literal(
    ty: &Type,
    repr: &TypeRepr,
    v: &Value,
    handles: &HandleRegistry,
) -> Option<Literal> {
    Some(match (v, repr) {
        (Value::Int(n), TypeRepr::Bool) => Literal::Bool(*n != 0),
        (Value::Bool(b), TypeRepr::Bool) => Literal::Bool(*b),
        (Value::Int(n), TypeRepr::BitVector(w)) => Literal::BitVector {
            width: *w,
            value: if *w >= 128 {
                *n as u128
            } else {
                (*n as u128) & ((1u128 << w) - 1)
            },
        },
        (Value::Float(x), TypeRepr::Float(kind)) => Literal::Float {
            kind: *kind,
            value: *x,
        },
        (Value::Null, TypeRepr::Pointer) => Literal::NullPointer,
        (Value::Undef, _) => Literal::Undef(repr.clone()),
        (Value::Zero, _) => Literal::Zero(repr.clone()),
        (Value::Global(s), TypeRepr::Pointer) if handles.lookup(s).is_some() => {
            Literal::FunctionHandle(s.clone())
        }
        (Value::Global(s), TypeRepr::Pointer) => Literal::GlobalPointer(s.clone()),
        _ => {
            trace!("Global initializer is not a simple constant"; "ty" => %ty);
            return None;
        }
    })
}

/// The result of translating a module.
///
/// Equality is identity: two translations are equal only if they are the same translation
/// run.
#[derive(Debug)]
pub struct ModuleTranslation {
    cfg_map: UnorderedMap<Symbol, Cfg>,
    global_init_map: GlobalInitMap,
    handles: HandleRegistry,
    identity: TranslationId,
}

impl ModuleTranslation {
    pub fn cfg_map(&self) -> &UnorderedMap<Symbol, Cfg> {
        &self.cfg_map
    }

    pub fn cfg(&self, symbol: &Symbol) -> Option<&Cfg> {
        self.cfg_map.get(symbol)
    }

    pub fn global_init_map(&self) -> &GlobalInitMap {
        &self.global_init_map
    }

    pub fn handles(&self) -> &HandleRegistry {
        &self.handles
    }

    pub fn identity(&self) -> TranslationId {
        self.identity
    }
}

impl PartialEq for ModuleTranslation {
    fn eq(&self, other: &Self) -> bool {
        self.identity == other.identity
    }
}
impl Eq for ModuleTranslation {}

/// The services a module translation depends on
pub struct ModuleTranslator<'a> {
    pub lifter: &'a dyn TypeLifter,
    pub structurer: &'a dyn CfgStructurer,
    pub globals: &'a dyn GlobalInitBuilder,
    pub config: &'a TranslationConfig,
}

impl<'a> ModuleTranslator<'a> {
    /// A translator using the default structuring and global initialization, configured by the
    /// global [`CONFIG`](static@CONFIG)
    pub fn new(lifter: &'a dyn TypeLifter) -> Self {
        Self {
            lifter,
            structurer: &JumpGraphStructurer,
            globals: &ConstantGlobalInitBuilder,
            config: &*CONFIG,
        }
    }

    pub fn translate(&self, module: &Module) -> Result<ModuleTranslation, TranslationError> {
        translate_module_with_config(
            module,
            self.lifter,
            self.structurer,
            self.globals,
            self.config,
        )
    }
}

/// Translate every definition of `module`, configured by the global [`CONFIG`](static@CONFIG).
pub fn translate_module(
    module: &Module,
    lifter: &dyn TypeLifter,
    structurer: &dyn CfgStructurer,
    globals: &dyn GlobalInitBuilder,
) -> Result<ModuleTranslation, TranslationError> {
    translate_module_with_config(module, lifter, structurer, globals, &*CONFIG)
}

/// Translate every definition of `module`.
///
/// All declarations, and then all definitions, are registered as handles before any routine is
/// translated. Any failure aborts the whole translation.
pub fn translate_module_with_config(
    module: &Module,
    lifter: &dyn TypeLifter,
    structurer: &dyn CfgStructurer,
    globals: &dyn GlobalInitBuilder,
    config: &TranslationConfig,
) -> Result<ModuleTranslation, TranslationError> {
    info!(
        "Translating module";
        "definitions" => module.definitions.len(),
        "declarations" => module.declarations.len()
    );

    let mut handles = HandleRegistry::new();
    for decl in module
        .declarations
        .iter()
        .cloned()
        .chain(module.definitions.iter().map(Definition::declaration))
    {
        handles.declare(&decl, lifter, config)?;
    }

    let routines = RoutineTranslator {
        module,
        handles: &handles,
        lifter,
        structurer,
        config,
    };
    let mut cfg_map = UnorderedMap::new();
    for def in &module.definitions {
        let cfg = routines.translate(def)?;
        if cfg_map.insert(def.symbol.clone(), cfg).is_some() {
            return Err(TranslationError::Malformed {
                symbol: def.symbol.clone(),
                detail: "routine defined more than once".into(),
            });
        }
    }

    let global_init_map = globals.build(module, &handles, lifter)?;
    let identity = TranslationId::fresh();
    debug!("Translated module"; "identity" => ?identity, "routines" => cfg_map.len());

    Ok(ModuleTranslation {
        cfg_map,
        global_init_map,
        handles,
        identity,
    })
}
