//! Lowering of one source basic block into target blocks.
//!
//! Phi nodes are not lowered where they appear. Instead, every edge into a block with phi nodes
//! performs the merge itself: the predecessor assigns the incoming values to the phi registers as
//! one parallel copy, right before transferring control. Unconditional edges do so at the end of
//! the predecessor. Conditional edges get a fresh edge block, since the copy must only happen on
//! the edge actually taken.

use crate::cfg::{
    Atom, Block, Callee, Expr, IdAllocator, Label, Literal, Posd, Register, TargetStmt, Terminator,
};
use crate::containers::unordered::UnorderedMap;
use crate::debug_metadata::{is_debug_intrinsic, DebugAnnotationMap};
use crate::errors::TranslationError;
use crate::handle_registry::HandleRegistry;
use crate::ir::{BasicBlock, BlockLabel, Ident, Instr, Module, Stmt, Symbol, Type, Value};
use crate::log::*;
use crate::register_types::{IdentBinding, IdentMap};
use crate::source_location::{self, Position};
use crate::translation_config::TranslationConfig;
use crate::types::{TypeLifter, TypeRepr};

/// One phi assignment to perform on an edge: `target <- source`
#[derive(Clone, PartialEq, Debug)]
pub struct PhiObligation {
    pub target: Ident,
    pub ty: Type,
    pub source: Value,
}

/// What lowering needs to know about a source block before lowering any block
#[derive(Clone, PartialEq, Debug)]
pub struct BlockInfo {
    pub label: Label,
    /// Phi assignments owed by each predecessor, in the order the phi nodes appear
    pub phi_obligations: UnorderedMap<BlockLabel, Vec<PhiObligation>>,
}

impl BlockInfo {
    pub fn obligations_from(&self, pred: &BlockLabel) -> &[PhiObligation] {
        self.phi_obligations
            .get(pred)
            .map(|v| v.as_slice())
            .unwrap_or(&[])
    }
}

pub type BlockInfoMap = UnorderedMap<BlockLabel, BlockInfo>;

/// The result of lowering one source block
#[derive(Debug)]
pub struct LoweredBlock {
    /// The block itself, followed by any edge blocks it jumps through
    pub blocks: Vec<Block>,
    /// Registers created for parallel copies
    pub temporaries: Vec<Register>,
    /// The source position in effect at the end of the block
    pub cursor: Position,
}

/// Everything needed to lower the blocks of one routine. Read-only while lowering.
pub struct BlockTranslator<'a> {
    pub symbol: &'a Symbol,
    pub module: &'a Module,
    pub handles: &'a HandleRegistry,
    pub lifter: &'a dyn TypeLifter,
    pub block_info: &'a BlockInfoMap,
    pub ident_map: &'a IdentMap,
    pub annotations: &'a DebugAnnotationMap,
    pub config: &'a TranslationConfig,
}

/// Mutable state threaded through the lowering of one block
struct Lowering<'b> {
    alloc: &'b mut IdAllocator,
    stmts: Vec<Posd<TargetStmt>>,
    edge_blocks: Vec<Block>,
    temporaries: Vec<Register>,
    cursor: Position,
}

impl<'a> BlockTranslator<'a> {
    /// Lower `block` as target block `label`, starting with source position `cursor`.
    pub fn lower(
        &self,
        block: &BasicBlock,
        label: Label,
        cursor: Position,
        alloc: &mut IdAllocator,
    ) -> Result<LoweredBlock, TranslationError> {
        trace!("Lowering block";
               "symbol" => %self.symbol,
               "label" => ?label,
               OptionalKV("source_label", block.label.as_ref().map(|l| l.to_string())),
               "statements" => block.stmts.len(),
        );
        let mut st = Lowering {
            alloc,
            stmts: vec![],
            edge_blocks: vec![],
            temporaries: vec![],
            cursor,
        };

        let mut stmts = block.stmts.iter();
        let terminator = loop {
            let stmt = match stmts.next() {
                Some(s) => s,
                None => {
                    return Err(TranslationError::MissingTerminator {
                        symbol: self.symbol.clone(),
                        label: block
                            .label
                            .as_ref()
                            .map(|l| l.to_string())
                            .unwrap_or_else(|| "<unlabeled>".into()),
                    })
                }
            };
            if self.config.track_source_locations {
                st.cursor = source_location::advance(st.cursor, stmt, &self.module.metadata);
            }
            if stmt.instr.is_terminator() {
                break self.lower_terminator(stmt, block.label.as_ref(), &mut st)?;
            }
            self.lower_stmt(stmt, &mut st)?;
        };
        if stmts.next().is_some() {
            return Err(self.malformed(format!(
                "statements after the terminator of block `{}`",
                block
                    .label
                    .as_ref()
                    .map(|l| l.to_string())
                    .unwrap_or_default()
            )));
        }

        let mut blocks = vec![Block {
            label,
            source_label: block.label.clone(),
            stmts: st.stmts,
            terminator: Posd::new(st.cursor.clone(), terminator),
        }];
        blocks.extend(st.edge_blocks);
        Ok(LoweredBlock {
            blocks,
            temporaries: st.temporaries,
            cursor: st.cursor,
        })
    }

    fn lower_stmt(&self, stmt: &Stmt, st: &mut Lowering) -> Result<(), TranslationError> {
        let expr = match &stmt.instr {
            Instr::Phi { .. } => return Ok(()),
            Instr::Store { value, ptr, align } => {
                let s = TargetStmt::Store {
                    ptr: self.atom(&ptr.ty, &ptr.value)?,
                    value: self.atom(&value.ty, &value.value)?,
                    ty: value.ty.clone(),
                    align: *align,
                };
                st.stmts.push(Posd::new(st.cursor.clone(), s));
                return Ok(());
            }
            Instr::Call {
                callee: Value::Global(callee),
                ..
            } if is_debug_intrinsic(callee.as_str()) => {
                trace!("Dropping debug intrinsic call"; "symbol" => %self.symbol, "intrinsic" => %callee);
                return Ok(());
            }
            instr => self.expr(instr)?,
        };

        match &stmt.result {
            Some(ident) => {
                let reg = self.register(ident)?;
                st.stmts
                    .push(Posd::new(st.cursor.clone(), TargetStmt::Set(reg.id, expr)));
                if matches!(stmt.instr, Instr::Alloca { .. }) && self.config.emit_variable_annotations
                {
                    for a in self.annotations.get(ident) {
                        let position = a
                            .location
                            .and_then(|l| {
                                source_location::resolve_location(&self.module.metadata, l)
                            })
                            .unwrap_or_else(|| st.cursor.clone());
                        st.stmts.push(Posd::new(
                            st.cursor.clone(),
                            TargetStmt::Annotate {
                                reg: reg.id,
                                name: a.name.clone(),
                                fragment: a.fragment,
                                position,
                            },
                        ));
                    }
                }
            }
            None => st
                .stmts
                .push(Posd::new(st.cursor.clone(), TargetStmt::Effect(expr))),
        }
        Ok(())
    }

    fn expr(&self, instr: &Instr) -> Result<Expr, TranslationError> {
        Ok(match instr {
            Instr::Binary { op, lhs, rhs } => Expr::Binary {
                op: *op,
                lhs: self.atom(&lhs.ty, &lhs.value)?,
                rhs: self.atom(&lhs.ty, rhs)?,
            },
            Instr::ICmp { pred, lhs, rhs } => Expr::ICmp {
                pred: *pred,
                lhs: self.atom(&lhs.ty, &lhs.value)?,
                rhs: self.atom(&lhs.ty, rhs)?,
            },
            Instr::FCmp { pred, lhs, rhs } => Expr::FCmp {
                pred: *pred,
                lhs: self.atom(&lhs.ty, &lhs.value)?,
                rhs: self.atom(&lhs.ty, rhs)?,
            },
            Instr::Alloca { ty, count, align } => Expr::Alloca {
                ty: ty.clone(),
                count: count
                    .as_ref()
                    .map(|c| self.atom(&c.ty, &c.value))
                    .transpose()?,
                align: *align,
            },
            Instr::Load { ty, ptr, align } => Expr::Load {
                ptr: self.atom(&ptr.ty, &ptr.value)?,
                ty: ty.clone(),
                align: *align,
            },
            Instr::GetElementPtr {
                base_ty,
                ptr,
                indices,
                ..
            } => Expr::GetElementPtr {
                base_ty: base_ty.clone(),
                ptr: self.atom(&ptr.ty, &ptr.value)?,
                indices: indices
                    .iter()
                    .map(|i| self.atom(&i.ty, &i.value))
                    .collect::<Result<_, _>>()?,
            },
            Instr::Cast { op, value, to } => Expr::Cast {
                op: *op,
                value: self.atom(&value.ty, &value.value)?,
                to: self.lift(to)?,
            },
            Instr::Select {
                cond,
                then_value,
                else_value,
            } => Expr::Select {
                cond: self.atom(&cond.ty, &cond.value)?,
                then_value: self.atom(&then_value.ty, &then_value.value)?,
                else_value: self.atom(&then_value.ty, else_value)?,
            },
            Instr::Call { callee, args, .. } => Expr::Call {
                callee: match callee {
                    Value::Global(s) => Callee::Handle(self.handles.resolve(s)?.symbol.clone()),
                    Value::Ident(_) => Callee::Pointer(self.atom(&Type::ptr(), callee)?),
                    v => return Err(self.malformed(format!("call through `{:?}`", v))),
                },
                args: args
                    .iter()
                    .map(|a| self.atom(&a.ty, &a.value))
                    .collect::<Result<_, _>>()?,
            },
            Instr::ExtractValue { aggregate, indices } => Expr::ExtractValue {
                aggregate: self.atom(&aggregate.ty, &aggregate.value)?,
                indices: indices.clone(),
            },
            Instr::InsertValue {
                aggregate,
                element,
                indices,
            } => Expr::InsertValue {
                aggregate: self.atom(&aggregate.ty, &aggregate.value)?,
                element: self.atom(&element.ty, &element.value)?,
                indices: indices.clone(),
            },
            Instr::ExtractElement { vector, index } => Expr::ExtractElement {
                vector: self.atom(&vector.ty, &vector.value)?,
                index: self.atom(&index.ty, &index.value)?,
            },
            Instr::InsertElement {
                vector,
                element,
                index,
            } => Expr::InsertElement {
                vector: self.atom(&vector.ty, &vector.value)?,
                element: self.atom(&element.ty, &element.value)?,
                index: self.atom(&index.ty, &index.value)?,
            },
            Instr::Phi { .. } | Instr::Store { .. } => unreachable!("handled by the caller"),
            Instr::Ret(_)
            | Instr::Br(_)
            | Instr::CondBr { .. }
            | Instr::Switch { .. }
            | Instr::IndirectBr { .. }
            | Instr::Unreachable => unreachable!("terminators are lowered separately"),
        })
    }

    fn lower_terminator(
        &self,
        stmt: &Stmt,
        current: Option<&BlockLabel>,
        st: &mut Lowering,
    ) -> Result<Terminator, TranslationError> {
        Ok(match &stmt.instr {
            Instr::Ret(v) => Terminator::Return(
                v.as_ref()
                    .map(|v| self.atom(&v.ty, &v.value))
                    .transpose()?,
            ),
            Instr::Br(target) => {
                let info = self.info(target)?;
                let obligations = current.map(|c| info.obligations_from(c)).unwrap_or(&[]);
                let copies = self.parallel_copy(obligations, st)?;
                st.stmts.extend(copies);
                Terminator::Jump(info.label)
            }
            Instr::CondBr {
                cond,
                then_label,
                else_label,
            } => Terminator::Branch {
                cond: self.atom(&Type::Int(1), cond)?,
                then_label: self.edge(current, then_label, st)?,
                else_label: self.edge(current, else_label, st)?,
            },
            Instr::Switch {
                value,
                default,
                cases,
            } => Terminator::Switch {
                scrutinee: self.atom(&value.ty, &value.value)?,
                cases: cases
                    .iter()
                    .map(|(v, l)| Ok((*v, self.edge(current, l, st)?)))
                    .collect::<Result<_, TranslationError>>()?,
                default: self.edge(current, default, st)?,
            },
            Instr::IndirectBr { .. } => {
                return Err(TranslationError::Unsupported {
                    symbol: self.symbol.clone(),
                    detail: "computed jump (`indirectbr`)".into(),
                })
            }
            Instr::Unreachable => Terminator::Unreachable,
            _ => unreachable!("only called on terminators"),
        })
    }

    /// The label to transfer control to for a conditional edge to `target`. If the edge carries
    /// phi assignments, a fresh edge block performing them is created.
    fn edge(
        &self,
        current: Option<&BlockLabel>,
        target: &BlockLabel,
        st: &mut Lowering,
    ) -> Result<Label, TranslationError> {
        let info = self.info(target)?;
        let obligations = current.map(|c| info.obligations_from(c)).unwrap_or(&[]);
        if obligations.is_empty() {
            return Ok(info.label);
        }
        let stmts = self.parallel_copy(obligations, st)?;
        let label = st.alloc.fresh_label();
        st.edge_blocks.push(Block {
            label,
            source_label: None,
            stmts,
            terminator: Posd::new(st.cursor.clone(), Terminator::Jump(info.label)),
        });
        Ok(label)
    }

    /// Assign every phi target its source simultaneously: all register sources are read into
    /// temporaries before any target is written.
    fn parallel_copy(
        &self,
        obligations: &[PhiObligation],
        st: &mut Lowering,
    ) -> Result<Vec<Posd<TargetStmt>>, TranslationError> {
        let mut reads = vec![];
        let mut writes = vec![];
        for ob in obligations {
            let target = self.register(&ob.target)?;
            let source = match self.atom(&ob.ty, &ob.source)? {
                Atom::Reg(r) => {
                    let tmp = st.alloc.fresh_register(target.ty.clone());
                    reads.push(Posd::new(
                        st.cursor.clone(),
                        TargetStmt::Set(tmp.id, Expr::Atom(Atom::Reg(r))),
                    ));
                    let read = Atom::Reg(tmp.id);
                    st.temporaries.push(tmp);
                    read
                }
                a => a,
            };
            writes.push(Posd::new(
                st.cursor.clone(),
                TargetStmt::Set(target.id, Expr::Atom(source)),
            ));
        }
        reads.extend(writes);
        Ok(reads)
    }

    fn info(&self, label: &BlockLabel) -> Result<&'a BlockInfo, TranslationError> {
        self.block_info
            .get(label)
            .ok_or_else(|| TranslationError::UndefinedBlock {
                symbol: self.symbol.clone(),
                label: label.clone(),
            })
    }

    fn register(&self, ident: &Ident) -> Result<&'a Register, TranslationError> {
        self.ident_map
            .register(ident)
            .ok_or_else(|| TranslationError::UndefinedIdent {
                symbol: self.symbol.clone(),
                ident: ident.clone(),
            })
    }

    fn lift(&self, ty: &Type) -> Result<TypeRepr, TranslationError> {
        self.lifter
            .lift(ty)
            .map_err(|source| TranslationError::TypeLift {
                symbol: self.symbol.clone(),
                source,
            })
    }

    /// Lower an operand used at type `ty`
    fn atom(&self, ty: &Type, value: &Value) -> Result<Atom, TranslationError> {
        Ok(match value {
            Value::Ident(i) => match self.ident_map.lookup(i) {
                Some(IdentBinding::Register(r)) => Atom::Reg(r.id),
                Some(IdentBinding::Argument { index, .. }) => Atom::Arg(*index),
                None => {
                    return Err(TranslationError::UndefinedIdent {
                        symbol: self.symbol.clone(),
                        ident: i.clone(),
                    })
                }
            },
            Value::Int(n) => match self.lift(ty)? {
                TypeRepr::Bool => Atom::Lit(Literal::Bool(*n != 0)),
                TypeRepr::BitVector(width) => Atom::Lit(Literal::BitVector {
                    width,
                    value: truncate(*n, width),
                }),
                t => {
                    return Err(
                        self.malformed(format!("integer constant {} used at type {:?}", n, t))
                    )
                }
            },
            Value::Bool(b) => Atom::Lit(Literal::Bool(*b)),
            Value::Float(x) => match self.lift(ty)? {
                TypeRepr::Float(kind) => Atom::Lit(Literal::Float { kind, value: *x }),
                t => {
                    return Err(
                        self.malformed(format!("float constant {} used at type {:?}", x, t))
                    )
                }
            },
            Value::Null => Atom::Lit(Literal::NullPointer),
            Value::Undef => Atom::Lit(Literal::Undef(self.lift(ty)?)),
            Value::Zero => Atom::Lit(Literal::Zero(self.lift(ty)?)),
            Value::Global(s) => match self.handles.lookup(s) {
                Some(_) => Atom::Lit(Literal::FunctionHandle(s.clone())),
                None => Atom::Lit(Literal::GlobalPointer(s.clone())),
            },
            Value::Metadata(_) => {
                return Err(self.malformed("metadata operand outside a debug intrinsic".into()))
            }
        })
    }

    fn malformed(&self, detail: String) -> TranslationError {
        TranslationError::Malformed {
            symbol: self.symbol.clone(),
            detail,
        }
    }
}

/// Two's complement truncation of `n` to `width` bits
fn truncate(n: i128, width: u32) -> u128 {
    let bits = n as u128;
    if width >= 128 {
        bits
    } else {
        bits & ((1u128 << width) - 1)
    }
}
