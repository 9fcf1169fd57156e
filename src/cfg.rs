//! The control-flow-graph form consumed by the execution engine.
//!
//! Unlike the source language there are no phi nodes: every value merge has been made explicit
//! as register assignments on the incoming edges. Every register has a static type fixed at
//! creation.

use crate::containers::unordered::UnorderedMap;
use crate::handle_registry::Handle;
use crate::ir::{BinOp, BlockLabel, CastOp, FCmpPred, FloatKind, ICmpPred, Symbol, Type};
use crate::source_location::Position;
use crate::types::TypeRepr;
use itertools::Itertools;
use std::rc::Rc;

#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct RegId(pub u32);

impl std::fmt::Debug for RegId {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        write!(f, "r{}", self.0)
    }
}

#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Label(pub u32);

impl std::fmt::Debug for Label {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        write!(f, "L{}", self.0)
    }
}

/// A typed storage slot local to one routine.
#[derive(Clone, PartialEq, Eq, Debug)]
pub struct Register {
    pub id: RegId,
    pub ty: TypeRepr,
}

/// Hands out register and label ids for one routine. Ids are dense and never reused within the
/// routine.
#[derive(Debug, Default)]
pub struct IdAllocator {
    next_reg: u32,
    next_label: u32,
}

impl IdAllocator {
    pub fn new() -> Self {
        Default::default()
    }

    pub fn fresh_register(&mut self, ty: TypeRepr) -> Register {
        let id = RegId(self.next_reg);
        self.next_reg += 1;
        Register { id, ty }
    }

    pub fn fresh_label(&mut self) -> Label {
        let l = Label(self.next_label);
        self.next_label += 1;
        l
    }
}

#[derive(Clone, PartialEq, Debug)]
pub enum Literal {
    Bool(bool),
    /// `value` is truncated to `width` bits
    BitVector {
        width: u32,
        value: u128,
    },
    Float {
        kind: FloatKind,
        value: f64,
    },
    NullPointer,
    Undef(TypeRepr),
    Zero(TypeRepr),
    /// The address of a routine
    FunctionHandle(Symbol),
    /// The address of a global variable
    GlobalPointer(Symbol),
}

/// A value that can be read without side effects.
#[derive(Clone, PartialEq)]
pub enum Atom {
    Reg(RegId),
    /// The routine's `n`th argument
    Arg(usize),
    Lit(Literal),
}

impl std::fmt::Debug for Atom {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        match self {
            Atom::Reg(r) => write!(f, "{:?}", r),
            Atom::Arg(n) => write!(f, "arg{}", n),
            Atom::Lit(Literal::Bool(b)) => write!(f, "{}", b),
            Atom::Lit(Literal::BitVector { width, value }) => write!(f, "{}:bv{}", value, width),
            Atom::Lit(Literal::FunctionHandle(s)) => write!(f, "fn {:?}", s),
            Atom::Lit(Literal::GlobalPointer(s)) => write!(f, "&{:?}", s),
            Atom::Lit(l) => write!(f, "{:?}", l),
        }
    }
}

#[derive(Clone, PartialEq, Debug)]
pub enum Callee {
    /// A direct call to a registered routine
    Handle(Symbol),
    /// A call through a function pointer
    Pointer(Atom),
}

#[derive(Clone, PartialEq, Debug)]
pub enum Expr {
    Atom(Atom),
    Binary {
        op: BinOp,
        lhs: Atom,
        rhs: Atom,
    },
    ICmp {
        pred: ICmpPred,
        lhs: Atom,
        rhs: Atom,
    },
    FCmp {
        pred: FCmpPred,
        lhs: Atom,
        rhs: Atom,
    },
    Cast {
        op: CastOp,
        value: Atom,
        to: TypeRepr,
    },
    Select {
        cond: Atom,
        then_value: Atom,
        else_value: Atom,
    },
    /// Stack allocation of `count` (default one) values of source type `ty`
    Alloca {
        ty: Type,
        count: Option<Atom>,
        align: Option<u64>,
    },
    /// Load a value laid out in memory as source type `ty`
    Load {
        ptr: Atom,
        ty: Type,
        align: Option<u64>,
    },
    GetElementPtr {
        base_ty: Type,
        ptr: Atom,
        indices: Vec<Atom>,
    },
    ExtractValue {
        aggregate: Atom,
        indices: Vec<u32>,
    },
    InsertValue {
        aggregate: Atom,
        element: Atom,
        indices: Vec<u32>,
    },
    ExtractElement {
        vector: Atom,
        index: Atom,
    },
    InsertElement {
        vector: Atom,
        element: Atom,
        index: Atom,
    },
    Call {
        callee: Callee,
        args: Vec<Atom>,
    },
}

#[derive(Clone, PartialEq, Debug)]
pub enum TargetStmt {
    Set(RegId, Expr),
    Store {
        ptr: Atom,
        value: Atom,
        ty: Type,
        align: Option<u64>,
    },
    /// Evaluate for side effects only
    Effect(Expr),
    /// Names the source variable stored in the allocation held by `reg`
    Annotate {
        reg: RegId,
        name: String,
        fragment: Option<(u64, u64)>,
        position: Position,
    },
}

#[derive(Clone, PartialEq, Debug)]
pub enum Terminator {
    Jump(Label),
    Branch {
        cond: Atom,
        then_label: Label,
        else_label: Label,
    },
    Switch {
        scrutinee: Atom,
        cases: Vec<(i128, Label)>,
        default: Label,
    },
    Return(Option<Atom>),
    Unreachable,
}

impl Terminator {
    pub fn successors(&self) -> Vec<Label> {
        match self {
            Terminator::Jump(l) => vec![*l],
            Terminator::Branch {
                then_label,
                else_label,
                ..
            } => vec![*then_label, *else_label],
            Terminator::Switch { cases, default, .. } => cases
                .iter()
                .map(|(_, l)| *l)
                .chain(std::iter::once(*default))
                .collect(),
            Terminator::Return(_) | Terminator::Unreachable => vec![],
        }
    }
}

/// A value tagged with the source position it was lowered at.
#[derive(Clone, PartialEq, Debug)]
pub struct Posd<T> {
    pub position: Position,
    pub value: T,
}

impl<T> Posd<T> {
    pub fn new(position: Position, value: T) -> Self {
        Self { position, value }
    }
}

#[derive(Clone, PartialEq, Debug)]
pub struct Block {
    pub label: Label,
    /// The source block this was lowered from, if any. Synthetic blocks (entry, edge copies) have
    /// none.
    pub source_label: Option<BlockLabel>,
    pub stmts: Vec<Posd<TargetStmt>>,
    pub terminator: Posd<Terminator>,
}

impl Block {
    pub fn successors(&self) -> Vec<Label> {
        self.terminator.value.successors()
    }
}

/// The unstructured jump graph of a routine, as produced by lowering, before structuring.
#[derive(Clone, Debug)]
pub struct RawCfg {
    pub handle: Rc<Handle>,
    pub entry: Label,
    pub blocks: Vec<Block>,
    /// Every register used by the blocks, sorted by id
    pub registers: Vec<Register>,
}

/// A finished routine.
#[derive(Clone)]
pub struct Cfg {
    pub handle: Rc<Handle>,
    pub entry: Label,
    /// Blocks in reverse postorder from `entry`, followed by any unreachable blocks
    pub blocks: Vec<Block>,
    pub registers: Vec<Register>,
    pub predecessors: UnorderedMap<Label, Vec<Label>>,
}

impl Cfg {
    pub fn block(&self, label: Label) -> Option<&Block> {
        self.blocks.iter().find(|b| b.label == label)
    }

    pub fn entry_block(&self) -> Option<&Block> {
        self.block(self.entry)
    }

    pub fn predecessors_of(&self, label: Label) -> &[Label] {
        self.predecessors
            .get(&label)
            .map(|v| v.as_slice())
            .unwrap_or(&[])
    }

    pub fn register(&self, id: RegId) -> Option<&Register> {
        self.registers.iter().find(|r| r.id == id)
    }

    /// The routine's symbol with everything but ASCII letters and digits replaced by `_`, usable
    /// as a file name or GraphViz identifier
    pub fn sanitized_name(&self) -> String {
        self.handle
            .symbol
            .as_str()
            .chars()
            .map(|c| if c.is_ascii_alphanumeric() { c } else { '_' })
            .collect()
    }

    /// Write a GraphViz rendering of the block graph
    pub fn write_dot(&self, w: &mut impl std::io::Write) -> std::io::Result<()> {
        type Node = Label;
        type Edge = (Label, Label, String);

        struct Graph<'a> {
            cfg: &'a Cfg,
        }

        impl<'a> dot::Labeller<'a, Node, Edge> for Graph<'a> {
            fn graph_id(&'a self) -> dot::Id<'a> {
                dot::Id::new(format!("cfg_{}", self.cfg.sanitized_name())).unwrap()
            }
            fn node_id(&'a self, n: &Node) -> dot::Id<'a> {
                dot::Id::new(format!("L{}", n.0)).unwrap()
            }
            fn node_label<'b>(&'b self, n: &Node) -> dot::LabelText<'b> {
                let block = match self.cfg.block(*n) {
                    Some(b) => b,
                    None => return dot::LabelText::label(format!("{:?}", n)),
                };
                let mut text = match &block.source_label {
                    Some(l) => format!("{:?} ({})\\l", n, l),
                    None => format!("{:?}\\l", n),
                };
                for s in &block.stmts {
                    text += &format!("{:?}\\l", s.value);
                }
                text += &format!("{:?}\\l", block.terminator.value);
                dot::LabelText::escaped(text)
            }
            fn node_shape(&'a self, _n: &Node) -> Option<dot::LabelText<'a>> {
                Some(dot::LabelText::label("box"))
            }
            fn edge_label<'b>(&'b self, e: &Edge) -> dot::LabelText<'b> {
                dot::LabelText::label(e.2.clone())
            }
        }

        impl<'a> dot::GraphWalk<'a, Node, Edge> for Graph<'a> {
            fn nodes(&self) -> dot::Nodes<'a, Node> {
                self.cfg
                    .blocks
                    .iter()
                    .map(|b| b.label)
                    .collect::<Vec<_>>()
                    .into()
            }
            fn edges(&'a self) -> dot::Edges<'a, Edge> {
                self.cfg
                    .blocks
                    .iter()
                    .flat_map(|b| {
                        let edges: Vec<Edge> = match &b.terminator.value {
                            Terminator::Branch {
                                then_label,
                                else_label,
                                ..
                            } => vec![
                                (b.label, *then_label, "T".into()),
                                (b.label, *else_label, "F".into()),
                            ],
                            Terminator::Switch { cases, default, .. } => cases
                                .iter()
                                .map(|(v, l)| (b.label, *l, v.to_string()))
                                .chain(std::iter::once((b.label, *default, "default".into())))
                                .collect(),
                            t => t
                                .successors()
                                .into_iter()
                                .map(|l| (b.label, l, String::new()))
                                .collect(),
                        };
                        edges
                    })
                    .collect::<Vec<_>>()
                    .into()
            }
            fn source(&self, e: &Edge) -> Node {
                e.0
            }
            fn target(&self, e: &Edge) -> Node {
                e.1
            }
        }

        dot::render(&Graph { cfg: self }, w)
    }

    /// Generate a `.dot` file representing this CFG
    pub fn generate_dot(&self) -> String {
        let mut s: Vec<u8> = vec![];
        self.write_dot(&mut s).unwrap();
        String::from_utf8(s).unwrap()
    }
}

impl std::fmt::Debug for Cfg {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        writeln!(
            f,
            "cfg {:?}({}) -> {:?} entry {:?}",
            self.handle.symbol,
            self.handle.params.iter().map(|t| format!("{:?}", t)).join(", "),
            self.handle.ret,
            self.entry
        )?;
        for r in &self.registers {
            writeln!(f, "  reg {:?}: {:?}", r.id, r.ty)?;
        }
        for b in &self.blocks {
            match &b.source_label {
                Some(l) => writeln!(f, "{:?}: ; {}", b.label, l)?,
                None => writeln!(f, "{:?}:", b.label)?,
            }
            for s in &b.stmts {
                writeln!(f, "    {:?}    @ {}", s.value, s.position)?;
            }
            writeln!(
                f,
                "    {:?}    @ {}",
                b.terminator.value, b.terminator.position
            )?;
        }
        Ok(())
    }
}
