//! The typed SSA intermediate language that is translated into [`cfg`](crate::cfg) form.
//!
//! This mirrors the shape of ahead-of-time compiler output: a module of declarations and
//! definitions, each definition an ordered list of basic blocks, each block an ordered list of
//! statements whose last one transfers control. Debug information lives in a module-level
//! [`MetadataTable`] and is referenced from statements through attachments.

use crate::containers::unordered::UnorderedMap;
use itertools::Itertools;

/// The name of a routine or global; `@name` in textual form.
#[derive(Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Symbol(pub String);

impl Symbol {
    pub fn new(name: impl Into<String>) -> Self {
        Self(name.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&str> for Symbol {
    fn from(s: &str) -> Self {
        Self::new(s)
    }
}

impl std::fmt::Display for Symbol {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl std::fmt::Debug for Symbol {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        write!(f, "@{}", self.0)
    }
}

/// A routine-local name: either an SSA value or a block label.
#[derive(Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Ident {
    /// `%name`
    Named(String),
    /// `%N`, as assigned to unnamed values
    Anon(u32),
}

impl From<&str> for Ident {
    fn from(s: &str) -> Self {
        match s.parse::<u32>() {
            Ok(n) => Ident::Anon(n),
            Err(_) => Ident::Named(s.to_owned()),
        }
    }
}

impl std::fmt::Display for Ident {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        match self {
            Ident::Named(n) => write!(f, "%{}", n),
            Ident::Anon(n) => write!(f, "%{}", n),
        }
    }
}

impl std::fmt::Debug for Ident {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        write!(f, "{}", self)
    }
}

/// Block labels share the identifier namespace with values.
pub type BlockLabel = Ident;

/// A reference into the module's [`MetadataTable`]; `!N` in textual form.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct MetadataRef(pub u32);

impl std::fmt::Display for MetadataRef {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        write!(f, "!{}", self.0)
    }
}

impl std::fmt::Debug for MetadataRef {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        write!(f, "{}", self)
    }
}

#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Debug)]
pub enum FloatKind {
    Half,
    Float,
    Double,
    X86Fp80,
}

/// A source-level type.
#[derive(Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Type {
    Void,
    Int(u32),
    FloatingPoint(FloatKind),
    /// A pointer, optionally carrying its pointee (`T*`); opaque `ptr` carries none.
    Ptr(Option<Box<Type>>),
    Array(u64, Box<Type>),
    Vector(u64, Box<Type>),
    Struct {
        fields: Vec<Type>,
        packed: bool,
    },
    Function {
        ret: Box<Type>,
        params: Vec<Type>,
        varargs: bool,
    },
    Label,
    Metadata,
    /// A named struct type `%name`, resolved through [`Module::named_types`].
    Named(String),
}

impl Type {
    /// The opaque pointer type
    pub fn ptr() -> Self {
        Type::Ptr(None)
    }

    pub fn is_void(&self) -> bool {
        matches!(self, Type::Void)
    }
}

impl std::fmt::Display for Type {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        match self {
            Type::Void => write!(f, "void"),
            Type::Int(w) => write!(f, "i{}", w),
            Type::FloatingPoint(FloatKind::Half) => write!(f, "half"),
            Type::FloatingPoint(FloatKind::Float) => write!(f, "float"),
            Type::FloatingPoint(FloatKind::Double) => write!(f, "double"),
            Type::FloatingPoint(FloatKind::X86Fp80) => write!(f, "x86_fp80"),
            Type::Ptr(None) => write!(f, "ptr"),
            Type::Ptr(Some(t)) => write!(f, "{}*", t),
            Type::Array(n, t) => write!(f, "[{} x {}]", n, t),
            Type::Vector(n, t) => write!(f, "<{} x {}>", n, t),
            Type::Struct { fields, packed } => {
                let body = fields.iter().join(", ");
                if *packed {
                    write!(f, "<{{ {} }}>", body)
                } else {
                    write!(f, "{{ {} }}", body)
                }
            }
            Type::Function {
                ret,
                params,
                varargs,
            } => {
                let mut ps = params.iter().map(|p| p.to_string()).collect::<Vec<_>>();
                if *varargs {
                    ps.push("...".into());
                }
                write!(f, "{} ({})", ret, ps.join(", "))
            }
            Type::Label => write!(f, "label"),
            Type::Metadata => write!(f, "metadata"),
            Type::Named(n) => write!(f, "%{}", n),
        }
    }
}

impl std::fmt::Debug for Type {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        write!(f, "{}", self)
    }
}

/// An operand.
#[derive(Clone, PartialEq, Debug)]
pub enum Value {
    Ident(Ident),
    Int(i128),
    Float(f64),
    Bool(bool),
    Null,
    Undef,
    Zero,
    Global(Symbol),
    Metadata(Box<MetadataValue>),
}

/// An operand together with the type it is used at.
#[derive(Clone, PartialEq, Debug)]
pub struct Typed<T> {
    pub ty: Type,
    pub value: T,
}

pub type TypedValue = Typed<Value>;

impl TypedValue {
    pub fn new(ty: Type, value: Value) -> Self {
        Typed { ty, value }
    }
}

/// The argument of a `metadata` operand
#[derive(Clone, PartialEq, Debug)]
pub enum MetadataValue {
    Ref(MetadataRef),
    /// `metadata <ty> <value>`, wrapping an ordinary operand
    Value(TypedValue),
    Node(MetadataNode),
}

#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug)]
pub enum BinOp {
    Add,
    Sub,
    Mul,
    UDiv,
    SDiv,
    URem,
    SRem,
    Shl,
    LShr,
    AShr,
    And,
    Or,
    Xor,
    FAdd,
    FSub,
    FMul,
    FDiv,
    FRem,
}

#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug)]
pub enum ICmpPred {
    Eq,
    Ne,
    Ugt,
    Uge,
    Ult,
    Ule,
    Sgt,
    Sge,
    Slt,
    Sle,
}

#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug)]
pub enum FCmpPred {
    False,
    Oeq,
    Ogt,
    Oge,
    Olt,
    Ole,
    One,
    Ord,
    Ueq,
    Ugt,
    Uge,
    Ult,
    Ule,
    Une,
    Uno,
    True,
}

#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug)]
pub enum CastOp {
    Trunc,
    ZExt,
    SExt,
    FPTrunc,
    FPExt,
    FPToUI,
    FPToSI,
    UIToFP,
    SIToFP,
    PtrToInt,
    IntToPtr,
    BitCast,
    AddrSpaceCast,
}

impl CastOp {
    /// Whether the cast only reinterprets a pointer, leaving the pointed-to storage unchanged
    pub fn is_pointer_reinterpretation(self) -> bool {
        matches!(self, CastOp::BitCast | CastOp::AddrSpaceCast)
    }
}

/// An operation performed by a [`Stmt`].
///
/// The last group of variants are terminators; every [`BasicBlock`] must end in exactly one.
#[derive(Clone, PartialEq, Debug)]
pub enum Instr {
    Binary {
        op: BinOp,
        lhs: TypedValue,
        rhs: Value,
    },
    ICmp {
        pred: ICmpPred,
        lhs: TypedValue,
        rhs: Value,
    },
    FCmp {
        pred: FCmpPred,
        lhs: TypedValue,
        rhs: Value,
    },
    Alloca {
        ty: Type,
        count: Option<TypedValue>,
        align: Option<u64>,
    },
    Load {
        ty: Type,
        ptr: TypedValue,
        align: Option<u64>,
    },
    Store {
        value: TypedValue,
        ptr: TypedValue,
        align: Option<u64>,
    },
    GetElementPtr {
        inbounds: bool,
        base_ty: Type,
        ptr: TypedValue,
        indices: Vec<TypedValue>,
    },
    Cast {
        op: CastOp,
        value: TypedValue,
        to: Type,
    },
    Select {
        cond: TypedValue,
        then_value: TypedValue,
        else_value: Value,
    },
    /// A call; `ret` is the return type written at the call site.
    Call {
        ret: Type,
        callee: Value,
        args: Vec<TypedValue>,
    },
    Phi {
        ty: Type,
        incoming: Vec<(Value, BlockLabel)>,
    },
    ExtractValue {
        aggregate: TypedValue,
        indices: Vec<u32>,
    },
    InsertValue {
        aggregate: TypedValue,
        element: TypedValue,
        indices: Vec<u32>,
    },
    ExtractElement {
        vector: TypedValue,
        index: TypedValue,
    },
    InsertElement {
        vector: TypedValue,
        element: TypedValue,
        index: TypedValue,
    },
    Ret(Option<TypedValue>),
    Br(BlockLabel),
    CondBr {
        cond: Value,
        then_label: BlockLabel,
        else_label: BlockLabel,
    },
    Switch {
        value: TypedValue,
        default: BlockLabel,
        cases: Vec<(i128, BlockLabel)>,
    },
    IndirectBr {
        address: TypedValue,
        destinations: Vec<BlockLabel>,
    },
    Unreachable,
}

impl Instr {
    pub fn is_terminator(&self) -> bool {
        matches!(
            self,
            Instr::Ret(_)
                | Instr::Br(_)
                | Instr::CondBr { .. }
                | Instr::Switch { .. }
                | Instr::IndirectBr { .. }
                | Instr::Unreachable
        )
    }

    /// The blocks control may transfer to after this instruction. Empty for non-terminators.
    pub fn successors(&self) -> Vec<&BlockLabel> {
        match self {
            Instr::Br(l) => vec![l],
            Instr::CondBr {
                then_label,
                else_label,
                ..
            } => vec![then_label, else_label],
            Instr::Switch { default, cases, .. } => std::iter::once(default)
                .chain(cases.iter().map(|(_, l)| l))
                .collect(),
            Instr::IndirectBr { destinations, .. } => destinations.iter().collect(),
            _ => vec![],
        }
    }
}

/// A statement: an instruction, the identifier it defines (if any), and its metadata
/// attachments (`!dbg !N`, etc.).
#[derive(Clone, PartialEq, Debug)]
pub struct Stmt {
    pub result: Option<Ident>,
    pub instr: Instr,
    pub attachments: Vec<(String, MetadataRef)>,
}

impl Stmt {
    /// A statement defining `result`
    pub fn define(result: impl Into<Ident>, instr: Instr) -> Self {
        Self {
            result: Some(result.into()),
            instr,
            attachments: vec![],
        }
    }

    /// A statement run only for its effect
    pub fn effect(instr: Instr) -> Self {
        Self {
            result: None,
            instr,
            attachments: vec![],
        }
    }

    /// Add an attachment `!kind !md`
    pub fn with_attachment(mut self, kind: impl Into<String>, md: MetadataRef) -> Self {
        self.attachments.push((kind.into(), md));
        self
    }

    /// The `!dbg` location attachment, if any
    pub fn debug_location(&self) -> Option<MetadataRef> {
        self.attachments
            .iter()
            .find(|(k, _)| k == "dbg")
            .map(|(_, md)| *md)
    }
}

#[derive(Clone, PartialEq, Debug)]
pub struct BasicBlock {
    /// Absent only for blocks that can never be jumped to
    pub label: Option<BlockLabel>,
    pub stmts: Vec<Stmt>,
}

impl BasicBlock {
    pub fn new(label: impl Into<BlockLabel>, stmts: Vec<Stmt>) -> Self {
        Self {
            label: Some(label.into()),
            stmts,
        }
    }
}

/// A routine known by signature only.
#[derive(Clone, PartialEq, Eq, Debug)]
pub struct Declaration {
    pub symbol: Symbol,
    pub params: Vec<Type>,
    pub ret: Type,
    pub varargs: bool,
}

/// A routine with a body.
#[derive(Clone, PartialEq, Debug)]
pub struct Definition {
    pub symbol: Symbol,
    pub params: Vec<(Type, Ident)>,
    pub ret: Type,
    pub varargs: bool,
    pub blocks: Vec<BasicBlock>,
}

impl Definition {
    /// The signature of this definition, as a declaration
    pub fn declaration(&self) -> Declaration {
        Declaration {
            symbol: self.symbol.clone(),
            params: self.params.iter().map(|(t, _)| t.clone()).collect(),
            ret: self.ret.clone(),
            varargs: self.varargs,
        }
    }

    /// All statements in program order: block order, then order within the block
    pub fn statements(&self) -> impl DoubleEndedIterator<Item = &Stmt> {
        self.blocks.iter().flat_map(|bb| bb.stmts.iter())
    }
}

#[derive(Clone, PartialEq, Debug)]
pub struct Global {
    pub symbol: Symbol,
    pub ty: Type,
    pub init: Option<Value>,
    pub constant: bool,
}

/// An element of a `DIExpression`
#[derive(Clone, PartialEq, Eq, Debug)]
pub enum ExprElement {
    Op(String),
    Int(u64),
}

/// A debug-information node.
#[derive(Clone, PartialEq, Eq, Debug)]
pub enum MetadataNode {
    File {
        filename: String,
        directory: String,
    },
    Subprogram {
        name: String,
        scope: Option<MetadataRef>,
        file: Option<MetadataRef>,
        line: u32,
    },
    LexicalBlock {
        scope: MetadataRef,
        file: Option<MetadataRef>,
        line: u32,
        column: u32,
    },
    /// A lexical block whose file differs from its enclosing scope's
    LexicalBlockFile {
        scope: MetadataRef,
        file: MetadataRef,
    },
    Location {
        line: u32,
        column: u32,
        scope: MetadataRef,
        inlined_at: Option<MetadataRef>,
    },
    LocalVariable {
        name: String,
        scope: MetadataRef,
        file: Option<MetadataRef>,
        line: u32,
        arg: Option<u32>,
    },
    Expression(Vec<ExprElement>),
    Tuple(Vec<Option<MetadataRef>>),
    String(String),
    /// Any node kind the translator has no use for; holds the kind name
    Other(String),
}

/// The module-level table of numbered metadata nodes.
#[derive(Clone, Default, Debug)]
pub struct MetadataTable {
    nodes: UnorderedMap<MetadataRef, MetadataNode>,
}

impl MetadataTable {
    pub fn new() -> Self {
        Default::default()
    }

    /// Record `node` as `!N`, returning the node it replaced, if any.
    pub fn insert(&mut self, r: MetadataRef, node: MetadataNode) -> Option<MetadataNode> {
        self.nodes.insert(r, node)
    }

    pub fn get(&self, r: MetadataRef) -> Option<&MetadataNode> {
        self.nodes.get(&r)
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }
}

/// A whole translation unit
#[derive(Clone, Default, Debug)]
pub struct Module {
    pub source_filename: Option<String>,
    /// Named struct definitions; `None` for opaque ones
    pub named_types: Vec<(String, Option<Type>)>,
    pub declarations: Vec<Declaration>,
    pub definitions: Vec<Definition>,
    pub globals: Vec<Global>,
    pub metadata: MetadataTable,
}

impl Module {
    /// Look through named struct types until reaching a structural one. Opaque or unknown names
    /// are returned unchanged.
    pub fn resolve_named<'a>(&'a self, ty: &'a Type) -> &'a Type {
        let mut ty = ty;
        // Named types cannot contain themselves except behind a pointer, so this terminates for
        // any module with finitely many names
        for _ in 0..=self.named_types.len() {
            match ty {
                Type::Named(n) => match self.named_types.iter().find(|(m, _)| m == n) {
                    Some((_, Some(t))) => ty = t,
                    _ => return ty,
                },
                _ => return ty,
            }
        }
        ty
    }

    /// The type found by following `indices` into aggregate type `ty`, as done by
    /// `extractvalue`/`insertvalue`.
    pub fn aggregate_element<'a>(&'a self, ty: &'a Type, indices: &[u32]) -> Option<&'a Type> {
        indices.iter().try_fold(ty, |ty, &i| {
            match self.resolve_named(ty) {
                Type::Struct { fields, .. } => fields.get(i as usize),
                Type::Array(n, t) if u64::from(i) < *n => Some(&**t),
                _ => None,
            }
        })
    }
}
