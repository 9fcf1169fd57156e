//! Association of source-variable annotations with the statements that allocate the variables.
//!
//! Compilers emit `llvm.dbg.declare(metadata ptr %p, metadata !var, metadata !expr)` somewhere
//! after (or, occasionally, before) the allocation of `%p`, often with one or more pointer
//! reinterpretations in between. A reverse scan over the routine gathers the annotations each
//! identifier is declared with, and the reinterpretations are then followed back until every
//! annotation also sits on the identifier of the underlying allocation.

use crate::containers::unordered::UnorderedMap;
use crate::ir::{
    Definition, ExprElement, Ident, Instr, MetadataNode, MetadataRef, MetadataTable,
    MetadataValue, Stmt, Value,
};
use crate::log::*;
use crate::translation_config::TranslationConfig;

/// Intrinsics that declare the storage of a source variable
const DECLARE_INTRINSICS: &[&str] = &["llvm.dbg.declare", "llvm.dbg.addr"];

/// Whether calls to `name` exist only to carry debug information
pub fn is_debug_intrinsic(name: &str) -> bool {
    name.starts_with("llvm.dbg.")
}

/// A source variable name attached to a value.
#[derive(Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Debug)]
pub struct DebugAnnotation {
    /// The `DILocalVariable` node
    pub variable: MetadataRef,
    pub name: String,
    /// `(offset, size)` in bits, if only part of the variable lives here
    pub fragment: Option<(u64, u64)>,
    /// The `DILocation` of the declaration
    pub location: Option<MetadataRef>,
}

/// Accumulated annotations per identifier
#[derive(Clone, Debug, Default)]
pub struct DebugAnnotationMap {
    map: UnorderedMap<Ident, Vec<DebugAnnotation>>,
}

impl DebugAnnotationMap {
    pub fn get(&self, ident: &Ident) -> &[DebugAnnotation] {
        self.map.get(ident).map(|v| v.as_slice()).unwrap_or(&[])
    }

    pub fn len(&self) -> usize {
        self.map.len()
    }

    pub fn is_empty(&self) -> bool {
        self.map.is_empty()
    }

    /// Returns whether any annotation was new
    fn add(
        &mut self,
        ident: &Ident,
        annotations: impl IntoIterator<Item = DebugAnnotation>,
    ) -> bool {
        let entry = self.map.entry(ident.clone()).or_default();
        let before = entry.len();
        for a in annotations {
            if !entry.contains(&a) {
                entry.push(a);
            }
        }
        entry.len() != before
    }
}

/// How a single statement affects the accumulated annotations
enum Step<'s> {
    /// `ident = alloca ...`
    Allocation {
        ident: &'s Ident,
        own: Vec<DebugAnnotation>,
    },
    /// `result = bitcast source` (or other pointer reinterpretation)
    Reinterpretation {
        result: &'s Ident,
        source: &'s Ident,
        own: Vec<DebugAnnotation>,
    },
    /// A declare intrinsic naming `target`
    Declare {
        target: &'s Ident,
        annotation: DebugAnnotation,
    },
    PassThrough,
}

/// Build the annotation map for `def`. The result does not depend on where in the routine a
/// declaration appears relative to the allocation or reinterpretations it refers to.
pub fn propagate_debug_annotations(
    def: &Definition,
    metadata: &MetadataTable,
    config: &TranslationConfig,
) -> DebugAnnotationMap {
    let (mut acc, reinterpretations) = def
        .statements()
        .rev()
        .map(|stmt| classify(stmt, metadata, config))
        .fold(
            (DebugAnnotationMap::default(), vec![]),
            |(mut acc, mut reinterpretations), step| {
                match step {
                    Step::Allocation { ident, own } => {
                        acc.add(ident, own);
                    }
                    Step::Reinterpretation {
                        result,
                        source,
                        own,
                    } => {
                        acc.add(result, own);
                        reinterpretations.push((result, source));
                    }
                    Step::Declare { target, annotation } => {
                        acc.add(target, Some(annotation));
                    }
                    Step::PassThrough => {}
                }
                (acc, reinterpretations)
            },
        );

    // Annotation lists only grow, drawing from a finite pool, so this settles. When declarations
    // follow their casts a single pass suffices.
    let mut changed = true;
    while changed {
        changed = false;
        for (result, source) in &reinterpretations {
            let union = acc.get(result).to_vec();
            changed |= acc.add(source, union);
        }
    }
    acc
}

fn classify<'s>(stmt: &'s Stmt, metadata: &MetadataTable, config: &TranslationConfig) -> Step<'s> {
    match (&stmt.result, &stmt.instr) {
        (Some(ident), Instr::Alloca { .. }) => Step::Allocation {
            ident,
            own: own_annotations(stmt, metadata),
        },
        (Some(result), Instr::Cast { op, value, .. })
            if op.is_pointer_reinterpretation() && config.propagate_debug_through_casts =>
        {
            match &value.value {
                Value::Ident(source) => Step::Reinterpretation {
                    result,
                    source,
                    own: own_annotations(stmt, metadata),
                },
                _ => Step::PassThrough,
            }
        }
        (
            _,
            Instr::Call {
                callee: Value::Global(callee),
                args,
                ..
            },
        ) if DECLARE_INTRINSICS.contains(&callee.as_str()) => {
            match declare_shape(args.iter().map(|a| &a.value), metadata) {
                Some((target, variable, name, fragment)) => Step::Declare {
                    target,
                    annotation: DebugAnnotation {
                        variable,
                        name,
                        fragment,
                        location: stmt.debug_location(),
                    },
                },
                None => {
                    trace!("Dropping malformed debug declaration"; "intrinsic" => %callee);
                    Step::PassThrough
                }
            }
        }
        _ => Step::PassThrough,
    }
}

/// Annotations a statement carries directly, as `!kind !N` attachments naming a local variable.
fn own_annotations(stmt: &Stmt, metadata: &MetadataTable) -> Vec<DebugAnnotation> {
    stmt.attachments
        .iter()
        .filter(|(kind, _)| kind != "dbg")
        .filter_map(|(_, md)| match metadata.get(*md) {
            Some(MetadataNode::LocalVariable { name, .. }) => Some(DebugAnnotation {
                variable: *md,
                name: name.clone(),
                fragment: None,
                location: stmt.debug_location(),
            }),
            _ => None,
        })
        .collect()
}

/// Take apart the arguments of a declare intrinsic: the storage identifier, the variable node and
/// its name, and the fragment of the variable described.
fn declare_shape<'s>(
    mut args: impl Iterator<Item = &'s Value>,
    metadata: &MetadataTable,
) -> Option<(&'s Ident, MetadataRef, String, Option<(u64, u64)>)> {
    let target = match args.next()? {
        Value::Metadata(md) => match &**md {
            MetadataValue::Value(v) => match &v.value {
                Value::Ident(i) => i,
                _ => return None,
            },
            _ => return None,
        },
        _ => return None,
    };
    let variable = match args.next()? {
        Value::Metadata(md) => match &**md {
            MetadataValue::Ref(r) => *r,
            _ => return None,
        },
        _ => return None,
    };
    let name = match metadata.get(variable)? {
        MetadataNode::LocalVariable { name, .. } => name.clone(),
        _ => return None,
    };
    let fragment = match args.next() {
        Some(Value::Metadata(md)) => match &**md {
            MetadataValue::Node(MetadataNode::Expression(ops)) => fragment_of(ops),
            MetadataValue::Ref(r) => match metadata.get(*r) {
                Some(MetadataNode::Expression(ops)) => fragment_of(ops),
                _ => None,
            },
            MetadataValue::Value(_) => None,
            MetadataValue::Node(_) => None,
        },
        _ => None,
    };
    Some((target, variable, name, fragment))
}

fn fragment_of(ops: &[ExprElement]) -> Option<(u64, u64)> {
    ops.windows(3).find_map(|w| match w {
        [ExprElement::Op(op), ExprElement::Int(offset), ExprElement::Int(size)]
            if op == "DW_OP_LLVM_fragment" =>
        {
            Some((*offset, *size))
        }
        _ => None,
    })
}
