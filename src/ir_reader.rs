//! A reader for the textual form of modules.
//!
//! Accepts the subset of LLVM assembly that [`ir`](crate::ir) models: the output of a compiler
//! at `-O0 -g` (or after `mem2reg`) reads as-is. Unsupported constructs (exception handling,
//! constant expressions, aggregate constants) are rejected with the offending line number.
//!
//! Reading is line oriented: every top-level entity, statement and metadata node is on a line of
//! its own, except for `switch` and similar bracketed lists, which may continue over several lines.

use crate::errors::ReaderError;
use crate::ir::{
    BasicBlock, BinOp, BlockLabel, CastOp, Declaration, Definition, ExprElement, FCmpPred,
    FloatKind, Global, ICmpPred, Ident, Instr, MetadataNode, MetadataRef, MetadataValue, Module,
    Stmt, Symbol, Type, TypedValue, Value,
};
use crate::log::*;

/// Read a whole module.
pub fn read_module(text: &str) -> Result<Module, ReaderError> {
    let mut module = Module::default();
    let mut lines = text
        .lines()
        .enumerate()
        .map(|(i, l)| tokenize(l, i + 1).map(|toks| (i + 1, toks)));

    while let Some(line) = lines.next() {
        let (lineno, toks) = line?;
        if toks.is_empty() {
            continue;
        }
        let mut p = Parser::new(&toks, lineno);
        match &toks[0] {
            Token::Word(w) if w == "source_filename" => {
                p.next()?;
                p.expect_punct('=')?;
                module.source_filename = Some(p.expect_string()?);
            }
            Token::Word(w) if w == "target" || w == "attributes" || w == "module" => {}
            Token::Local(name) => {
                p.next()?;
                p.expect_punct('=')?;
                p.expect_word("type")?;
                let ty = if p.eat_word("opaque") {
                    None
                } else {
                    Some(p.parse_type()?)
                };
                module.named_types.push((name.clone(), ty));
            }
            Token::Global(_) => module.globals.push(p.parse_global()?),
            Token::Word(w) if w == "declare" => {
                p.next()?;
                module.declarations.push(p.parse_declaration()?);
            }
            Token::Word(w) if w == "define" => {
                p.next()?;
                let header = p.parse_definition_header()?;
                let mut body = vec![];
                loop {
                    let (lineno, toks) = lines.next().ok_or_else(|| ReaderError::UnexpectedEof {
                        context: format!("body of `@{}`", header.symbol),
                    })??;
                    if toks == [Token::Punct('}')] {
                        break;
                    }
                    body.push((lineno, toks));
                }
                module
                    .definitions
                    .push(parse_body(header, join_bracketed(body))?);
            }
            Token::MetaRef(n) => {
                p.next()?;
                p.expect_punct('=')?;
                p.eat_word("distinct");
                let node = p.parse_metadata_node()?;
                module.metadata.insert(MetadataRef(*n), node);
            }
            // Named metadata (`!llvm.dbg.cu = !{...}`) plays no role in translation
            Token::MetaName(_) => {}
            t => return Err(p.err(format!("unexpected {:?} at top level", t))),
        }
    }
    debug!(
        "Read module";
        "definitions" => module.definitions.len(),
        "declarations" => module.declarations.len(),
        "metadata" => module.metadata.len()
    );
    Ok(module)
}

#[derive(Clone, PartialEq, Debug)]
enum Token {
    /// `%name`
    Local(String),
    /// `@name`
    Global(String),
    /// `!N`
    MetaRef(u32),
    /// `!name`
    MetaName(String),
    Word(String),
    Int(i128),
    Float(f64),
    Str(String),
    Punct(char),
    Ellipsis,
}

fn is_ident_char(c: char) -> bool {
    c.is_ascii_alphanumeric() || matches!(c, '_' | '.' | '$' | '-')
}

fn is_word_char(c: char) -> bool {
    c.is_ascii_alphanumeric() || matches!(c, '_' | '.' | '$')
}

fn tokenize(line: &str, lineno: usize) -> Result<Vec<Token>, ReaderError> {
    let err = |message: String| ReaderError::Syntax {
        line: lineno,
        message,
    };
    let chars: Vec<char> = line.chars().collect();
    let mut toks = vec![];
    let mut i = 0;

    let take_while = |i: &mut usize, f: fn(char) -> bool| -> String {
        let start = *i;
        while *i < chars.len() && f(chars[*i]) {
            *i += 1;
        }
        chars[start..*i].iter().collect()
    };
    let take_string = |i: &mut usize| -> Result<String, ReaderError> {
        // Opening quote at chars[*i]
        *i += 1;
        let mut s = String::new();
        loop {
            match chars.get(*i) {
                None => return Err(err("unterminated string".into())),
                Some('"') => {
                    *i += 1;
                    return Ok(s);
                }
                Some('\\') => {
                    let hex: String = chars.get(*i + 1..*i + 3).unwrap_or(&[]).iter().collect();
                    match u8::from_str_radix(&hex, 16) {
                        Ok(b) => {
                            s.push(b as char);
                            *i += 3;
                        }
                        Err(_) => {
                            s.push('\\');
                            *i += 1;
                        }
                    }
                }
                Some(c) => {
                    s.push(*c);
                    *i += 1;
                }
            }
        }
    };

    while i < chars.len() {
        let c = chars[i];
        match c {
            ';' => break,
            c if c.is_whitespace() => i += 1,
            '%' | '@' => {
                i += 1;
                let name = if chars.get(i) == Some(&'"') {
                    take_string(&mut i)?
                } else {
                    take_while(&mut i, is_ident_char)
                };
                if name.is_empty() {
                    return Err(err(format!("empty name after `{}`", c)));
                }
                toks.push(if c == '%' {
                    Token::Local(name)
                } else {
                    Token::Global(name)
                });
            }
            '!' => {
                i += 1;
                match chars.get(i) {
                    Some(d) if d.is_ascii_digit() => {
                        let n = take_while(&mut i, |c| c.is_ascii_digit());
                        toks.push(Token::MetaRef(
                            n.parse().map_err(|_| err(format!("bad metadata id {}", n)))?,
                        ));
                    }
                    Some(d) if d.is_ascii_alphabetic() || *d == '_' => {
                        toks.push(Token::MetaName(take_while(&mut i, is_ident_char)));
                    }
                    _ => toks.push(Token::Punct('!')),
                }
            }
            '"' => toks.push(Token::Str(take_string(&mut i)?)),
            '.' if chars.get(i..i + 3) == Some(&['.', '.', '.'][..]) => {
                i += 3;
                toks.push(Token::Ellipsis);
            }
            '#' => {
                i += 1;
                let w = take_while(&mut i, is_word_char);
                toks.push(Token::Word(format!("#{}", w)));
            }
            c if c.is_ascii_digit()
                || (c == '-' && chars.get(i + 1).map_or(false, |d| d.is_ascii_digit())) =>
            {
                toks.push(number(&chars, &mut i).map_err(err)?);
            }
            c if c.is_ascii_alphabetic() || c == '_' || c == '$' => {
                toks.push(Token::Word(take_while(&mut i, is_word_char)));
            }
            '(' | ')' | '[' | ']' | '{' | '}' | '<' | '>' | ',' | '=' | '*' | ':' | '|' => {
                i += 1;
                toks.push(Token::Punct(c));
            }
            c => return Err(err(format!("unexpected character `{}`", c))),
        }
    }
    Ok(toks)
}

fn number(chars: &[char], i: &mut usize) -> Result<Token, String> {
    let start = *i;
    if chars.get(*i..*i + 2) == Some(&['0', 'x'][..]) {
        *i += 2;
        let digits: String = chars[*i..]
            .iter()
            .take_while(|c| c.is_ascii_hexdigit())
            .collect();
        *i += digits.len();
        return if digits.len() == 16 {
            u64::from_str_radix(&digits, 16)
                .map(|bits| Token::Float(f64::from_bits(bits)))
                .map_err(|e| e.to_string())
        } else {
            Err(format!("unsupported hexadecimal constant `0x{}`", digits))
        };
    }
    if chars[*i] == '-' {
        *i += 1;
    }
    let mut is_float = false;
    while let Some(&c) = chars.get(*i) {
        if c.is_ascii_digit() {
            *i += 1;
        } else if c == '.' && chars.get(*i + 1).map_or(false, |d| d.is_ascii_digit()) {
            is_float = true;
            *i += 1;
        } else if (c == 'e' || c == 'E') && is_float {
            *i += 1;
            if matches!(chars.get(*i), Some('+') | Some('-')) {
                *i += 1;
            }
        } else {
            break;
        }
    }
    let s: String = chars[start..*i].iter().collect();
    if is_float {
        s.parse().map(Token::Float).map_err(|_| format!("bad float `{}`", s))
    } else {
        s.parse().map(Token::Int).map_err(|_| format!("bad integer `{}`", s))
    }
}

/// Merge lines that continue an open `[` list into the line that opened it
fn join_bracketed(lines: Vec<(usize, Vec<Token>)>) -> Vec<(usize, Vec<Token>)> {
    let mut out: Vec<(usize, Vec<Token>)> = vec![];
    let mut depth: i64 = 0;
    for (lineno, toks) in lines {
        let delta: i64 = toks
            .iter()
            .map(|t| match t {
                Token::Punct('[') => 1,
                Token::Punct(']') => -1,
                _ => 0,
            })
            .sum();
        match out.last_mut() {
            Some((_, last)) if depth > 0 => last.extend(toks),
            _ => out.push((lineno, toks)),
        }
        depth += delta;
    }
    out
}

struct DefinitionHeader {
    symbol: Symbol,
    ret: Type,
    params: Vec<(Type, Ident)>,
    varargs: bool,
}

fn parse_body(
    header: DefinitionHeader,
    lines: Vec<(usize, Vec<Token>)>,
) -> Result<Definition, ReaderError> {
    // An unlabeled entry block takes the next number after the unnamed parameters
    let implicit_entry = Ident::Anon(
        header
            .params
            .iter()
            .filter(|(_, i)| matches!(i, Ident::Anon(_)))
            .count() as u32,
    );
    let mut blocks: Vec<BasicBlock> = vec![];
    for (lineno, toks) in lines {
        if toks.is_empty() {
            continue;
        }
        if let [label, Token::Punct(':')] = toks.as_slice() {
            let label = match label {
                Token::Word(w) | Token::Str(w) => Ident::Named(w.clone()),
                Token::Int(n) => Ident::Anon(*n as u32),
                t => {
                    return Err(ReaderError::Syntax {
                        line: lineno,
                        message: format!("bad block label {:?}", t),
                    })
                }
            };
            blocks.push(BasicBlock {
                label: Some(label),
                stmts: vec![],
            });
            continue;
        }
        let mut p = Parser::new(&toks, lineno);
        let stmt = match p.parse_stmt()? {
            Some(s) => s,
            None => continue,
        };
        match blocks.last_mut() {
            Some(bb) => bb.stmts.push(stmt),
            None => blocks.push(BasicBlock {
                label: Some(implicit_entry.clone()),
                stmts: vec![stmt],
            }),
        }
    }
    Ok(Definition {
        symbol: header.symbol,
        params: header.params,
        ret: header.ret,
        varargs: header.varargs,
        blocks,
    })
}

/// Field value of a specialized metadata node
#[derive(Debug)]
enum Field {
    Int(i128),
    Str(String),
    Ref(MetadataRef),
    Null,
    Other,
}

struct Parser<'t> {
    toks: &'t [Token],
    pos: usize,
    line: usize,
}

const FAST_MATH_FLAGS: &[&str] = &[
    "fast", "nnan", "ninf", "nsz", "arcp", "contract", "afn", "reassoc",
];
const INT_FLAGS: &[&str] = &["nuw", "nsw", "exact", "disjoint", "nneg", "samesign"];

impl<'t> Parser<'t> {
    fn new(toks: &'t [Token], line: usize) -> Self {
        Self { toks, pos: 0, line }
    }

    fn err(&self, message: String) -> ReaderError {
        ReaderError::Syntax {
            line: self.line,
            message,
        }
    }

    fn unsupported(&self, construct: impl Into<String>) -> ReaderError {
        ReaderError::Unsupported {
            line: self.line,
            construct: construct.into(),
        }
    }

    fn peek(&self) -> Option<&'t Token> {
        self.toks.get(self.pos)
    }

    fn peek_at(&self, n: usize) -> Option<&'t Token> {
        self.toks.get(self.pos + n)
    }

    fn at_end(&self) -> bool {
        self.pos >= self.toks.len()
    }

    fn next(&mut self) -> Result<&'t Token, ReaderError> {
        let t = self
            .toks
            .get(self.pos)
            .ok_or_else(|| self.err("unexpected end of line".into()))?;
        self.pos += 1;
        Ok(t)
    }

    fn peek_punct(&self, c: char) -> bool {
        self.peek() == Some(&Token::Punct(c))
    }

    fn eat_punct(&mut self, c: char) -> bool {
        let r = self.peek_punct(c);
        if r {
            self.pos += 1;
        }
        r
    }

    fn expect_punct(&mut self, c: char) -> Result<(), ReaderError> {
        match self.next()? {
            Token::Punct(d) if *d == c => Ok(()),
            t => Err(self.err(format!("expected `{}`, found {:?}", c, t))),
        }
    }

    fn peek_word(&self) -> Option<&'t str> {
        match self.peek() {
            Some(Token::Word(w)) => Some(w.as_str()),
            _ => None,
        }
    }

    fn eat_word(&mut self, w: &str) -> bool {
        let r = self.peek_word() == Some(w);
        if r {
            self.pos += 1;
        }
        r
    }

    fn expect_word(&mut self, w: &str) -> Result<(), ReaderError> {
        match self.next()? {
            Token::Word(v) if v == w => Ok(()),
            t => Err(self.err(format!("expected `{}`, found {:?}", w, t))),
        }
    }

    fn eat_any_word(&mut self, ws: &[&str]) {
        while let Some(w) = self.peek_word() {
            if ws.contains(&w) {
                self.pos += 1;
            } else {
                break;
            }
        }
    }

    fn expect_word_any(&mut self) -> Result<&'t str, ReaderError> {
        match self.next()? {
            Token::Word(w) => Ok(w.as_str()),
            t => Err(self.err(format!("expected a keyword, found {:?}", t))),
        }
    }

    fn expect_int(&mut self) -> Result<i128, ReaderError> {
        match self.next()? {
            Token::Int(n) => Ok(*n),
            t => Err(self.err(format!("expected an integer, found {:?}", t))),
        }
    }

    fn expect_u32(&mut self) -> Result<u32, ReaderError> {
        let n = self.expect_int()?;
        u32::try_from(n).map_err(|_| self.err(format!("{} out of range", n)))
    }

    fn expect_string(&mut self) -> Result<String, ReaderError> {
        match self.next()? {
            Token::Str(s) => Ok(s.clone()),
            t => Err(self.err(format!("expected a string, found {:?}", t))),
        }
    }

    fn expect_local(&mut self) -> Result<Ident, ReaderError> {
        match self.next()? {
            Token::Local(n) => Ok(Ident::from(n.as_str())),
            t => Err(self.err(format!("expected a local identifier, found {:?}", t))),
        }
    }

    fn expect_label(&mut self) -> Result<BlockLabel, ReaderError> {
        self.expect_word("label")?;
        self.expect_local()
    }

    fn expect_end(&self) -> Result<(), ReaderError> {
        match self.peek() {
            None => Ok(()),
            Some(t) => Err(self.err(format!("unexpected trailing {:?}", t))),
        }
    }

    /// Skip a balanced parenthesized group, if one starts here
    fn skip_group(&mut self) -> Result<(), ReaderError> {
        if !self.eat_punct('(') {
            return Ok(());
        }
        let mut depth = 1;
        while depth > 0 {
            match self.next()? {
                Token::Punct('(') => depth += 1,
                Token::Punct(')') => depth -= 1,
                _ => {}
            }
        }
        Ok(())
    }

    fn is_type_start(&self) -> bool {
        match self.peek() {
            Some(Token::Word(w)) => is_type_keyword(w),
            Some(Token::Punct('[')) | Some(Token::Punct('<')) | Some(Token::Punct('{')) => true,
            Some(Token::Local(_)) => true,
            _ => false,
        }
    }

    fn is_value_start(&self) -> bool {
        match self.peek() {
            Some(Token::Word(w)) => matches!(
                w.as_str(),
                "true" | "false" | "null" | "undef" | "poison" | "zeroinitializer" | "none"
            ),
            Some(Token::Punct(_)) | Some(Token::Ellipsis) | None => false,
            Some(_) => true,
        }
    }

    /// Skip parameter or return attributes (`noundef`, `align 8`, `byval(%T)`, ...) up to the
    /// next value.
    fn skip_value_attributes(&mut self) -> Result<(), ReaderError> {
        while let Some(w) = self.peek_word() {
            if self.is_value_start() {
                break;
            }
            self.pos += 1;
            if w == "align" {
                if let Some(Token::Int(_)) = self.peek() {
                    self.pos += 1;
                }
            }
            self.skip_group()?;
        }
        Ok(())
    }

    /// Skip attributes that precede a type (linkage, calling convention, return attributes)
    fn skip_to_type(&mut self) -> Result<(), ReaderError> {
        while !self.is_type_start() {
            match self.next()? {
                Token::Word(_) => self.skip_group()?,
                Token::Int(_) => {}
                t => return Err(self.err(format!("expected a type, found {:?}", t))),
            }
        }
        Ok(())
    }

    fn skip_addrspace(&mut self) -> Result<(), ReaderError> {
        if self.eat_word("addrspace") {
            self.skip_group()?;
        }
        Ok(())
    }

    fn parse_type(&mut self) -> Result<Type, ReaderError> {
        let mut ty = match self.next()? {
            Token::Word(w) => match w.as_str() {
                "void" => Type::Void,
                "half" => Type::FloatingPoint(FloatKind::Half),
                "float" => Type::FloatingPoint(FloatKind::Float),
                "double" => Type::FloatingPoint(FloatKind::Double),
                "x86_fp80" => Type::FloatingPoint(FloatKind::X86Fp80),
                "ptr" => {
                    self.skip_addrspace()?;
                    Type::ptr()
                }
                "label" => Type::Label,
                "metadata" => Type::Metadata,
                w => match w.strip_prefix('i').map(str::parse::<u32>) {
                    Some(Ok(n)) => Type::Int(n),
                    _ => return Err(self.unsupported(format!("type `{}`", w))),
                },
            },
            Token::Punct('[') => {
                let n = self.expect_int()? as u64;
                self.expect_word("x")?;
                let t = self.parse_type()?;
                self.expect_punct(']')?;
                Type::Array(n, Box::new(t))
            }
            Token::Punct('<') => {
                if self.eat_punct('{') {
                    let fields = self.parse_struct_fields()?;
                    self.expect_punct('>')?;
                    Type::Struct {
                        fields,
                        packed: true,
                    }
                } else {
                    let n = self.expect_int()? as u64;
                    self.expect_word("x")?;
                    let t = self.parse_type()?;
                    self.expect_punct('>')?;
                    Type::Vector(n, Box::new(t))
                }
            }
            Token::Punct('{') => Type::Struct {
                fields: self.parse_struct_fields()?,
                packed: false,
            },
            Token::Local(name) => Type::Named(name.clone()),
            t => return Err(self.err(format!("expected a type, found {:?}", t))),
        };
        loop {
            if self.eat_punct('*') {
                ty = Type::Ptr(Some(Box::new(ty)));
            } else if self.peek_word() == Some("addrspace") {
                self.skip_addrspace()?;
            } else if self.eat_punct('(') {
                let mut params = vec![];
                let mut varargs = false;
                while !self.eat_punct(')') {
                    if self.next_is(&Token::Ellipsis) {
                        varargs = true;
                    } else {
                        params.push(self.parse_type()?);
                    }
                    self.eat_punct(',');
                }
                ty = Type::Function {
                    ret: Box::new(ty),
                    params,
                    varargs,
                };
            } else {
                return Ok(ty);
            }
        }
    }

    fn next_is(&mut self, t: &Token) -> bool {
        let r = self.peek() == Some(t);
        if r {
            self.pos += 1;
        }
        r
    }

    /// Fields after an opening `{`, through the closing `}`
    fn parse_struct_fields(&mut self) -> Result<Vec<Type>, ReaderError> {
        let mut fields = vec![];
        if self.eat_punct('}') {
            return Ok(fields);
        }
        loop {
            fields.push(self.parse_type()?);
            if self.eat_punct('}') {
                return Ok(fields);
            }
            self.expect_punct(',')?;
        }
    }

    fn parse_value(&mut self, ty: &Type) -> Result<Value, ReaderError> {
        if *ty == Type::Metadata {
            return Ok(Value::Metadata(Box::new(self.parse_metadata_operand()?)));
        }
        Ok(match self.next()? {
            Token::Local(n) => Value::Ident(Ident::from(n.as_str())),
            Token::Global(n) => Value::Global(Symbol::new(n.clone())),
            Token::Int(n) => Value::Int(*n),
            Token::Float(x) => Value::Float(*x),
            Token::Word(w) => match w.as_str() {
                "true" => Value::Bool(true),
                "false" => Value::Bool(false),
                "null" | "none" => Value::Null,
                "undef" | "poison" => Value::Undef,
                "zeroinitializer" => Value::Zero,
                w => return Err(self.unsupported(format!("constant expression `{}`", w))),
            },
            Token::Punct('[') | Token::Punct('{') | Token::Punct('<') => {
                return Err(self.unsupported("aggregate constant"))
            }
            t => return Err(self.err(format!("expected a value, found {:?}", t))),
        })
    }

    fn parse_typed_value(&mut self) -> Result<TypedValue, ReaderError> {
        let ty = self.parse_type()?;
        if ty != Type::Metadata {
            self.skip_value_attributes()?;
        }
        let value = self.parse_value(&ty)?;
        Ok(TypedValue::new(ty, value))
    }

    fn parse_metadata_operand(&mut self) -> Result<MetadataValue, ReaderError> {
        match self.peek() {
            Some(Token::MetaRef(n)) => {
                self.pos += 1;
                Ok(MetadataValue::Ref(MetadataRef(*n)))
            }
            Some(Token::MetaName(_)) | Some(Token::Punct('!')) => {
                Ok(MetadataValue::Node(self.parse_metadata_node()?))
            }
            _ => Ok(MetadataValue::Value(self.parse_typed_value()?)),
        }
    }

    fn parse_metadata_node(&mut self) -> Result<MetadataNode, ReaderError> {
        match self.next()? {
            Token::Punct('!') => match self.next()? {
                Token::Str(s) => Ok(MetadataNode::String(s.clone())),
                Token::Punct('{') => {
                    let mut elems = vec![];
                    while !self.eat_punct('}') {
                        match self.peek() {
                            Some(Token::MetaRef(n)) => {
                                self.pos += 1;
                                elems.push(Some(MetadataRef(*n)));
                            }
                            Some(Token::Word(w)) if w == "null" => {
                                self.pos += 1;
                                elems.push(None);
                            }
                            _ => {
                                self.parse_metadata_operand()?;
                                elems.push(None);
                            }
                        }
                        self.eat_punct(',');
                    }
                    Ok(MetadataNode::Tuple(elems))
                }
                t => Err(self.err(format!("expected metadata, found {:?}", t))),
            },
            Token::MetaName(kind) if kind == "DIExpression" => {
                self.expect_punct('(')?;
                let mut elems = vec![];
                while !self.eat_punct(')') {
                    match self.next()? {
                        Token::Word(w) => elems.push(ExprElement::Op(w.clone())),
                        Token::Int(n) => elems.push(ExprElement::Int(*n as u64)),
                        t => return Err(self.err(format!("bad DIExpression element {:?}", t))),
                    }
                    self.eat_punct(',');
                }
                Ok(MetadataNode::Expression(elems))
            }
            Token::MetaName(kind) => {
                let fields = self.parse_fields()?;
                self.specialized_node(kind, fields)
            }
            t => Err(self.err(format!("expected metadata, found {:?}", t))),
        }
    }

    fn parse_fields(&mut self) -> Result<Vec<(String, Field)>, ReaderError> {
        self.expect_punct('(')?;
        let mut fields = vec![];
        while !self.eat_punct(')') {
            let name = self.expect_word_any()?.to_owned();
            self.expect_punct(':')?;
            let value = match self.next()? {
                Token::Int(n) => Field::Int(*n),
                Token::Str(s) => Field::Str(s.clone()),
                Token::MetaRef(n) => Field::Ref(MetadataRef(*n)),
                Token::Word(w) if w == "null" => Field::Null,
                Token::Word(_) => {
                    // Flag sets, `DIFlagA | DIFlagB`
                    while self.eat_punct('|') {
                        self.next()?;
                    }
                    Field::Other
                }
                Token::Punct('!') | Token::MetaName(_) => {
                    self.pos -= 1;
                    self.parse_metadata_node()?;
                    Field::Other
                }
                t => return Err(self.err(format!("bad field value {:?}", t))),
            };
            fields.push((name, value));
            self.eat_punct(',');
        }
        Ok(fields)
    }

    fn specialized_node(
        &self,
        kind: &str,
        fields: Vec<(String, Field)>,
    ) -> Result<MetadataNode, ReaderError> {
        let get = |n: &str| fields.iter().find(|(k, _)| k == n).map(|(_, v)| v);
        let string = |n: &str| match get(n) {
            Some(Field::Str(s)) => s.clone(),
            _ => String::new(),
        };
        let int = |n: &str| match get(n) {
            Some(Field::Int(i)) => *i as u32,
            _ => 0,
        };
        let opt_ref = |n: &str| match get(n) {
            Some(Field::Ref(r)) => Some(*r),
            _ => None,
        };
        let req_ref = |n: &str| {
            opt_ref(n).ok_or_else(|| self.err(format!("`!{}` without `{}`", kind, n)))
        };
        Ok(match kind {
            "DIFile" => MetadataNode::File {
                filename: string("filename"),
                directory: string("directory"),
            },
            "DISubprogram" => MetadataNode::Subprogram {
                name: string("name"),
                scope: opt_ref("scope"),
                file: opt_ref("file"),
                line: int("line"),
            },
            "DILexicalBlock" => MetadataNode::LexicalBlock {
                scope: req_ref("scope")?,
                file: opt_ref("file"),
                line: int("line"),
                column: int("column"),
            },
            "DILexicalBlockFile" => MetadataNode::LexicalBlockFile {
                scope: req_ref("scope")?,
                file: req_ref("file")?,
            },
            "DILocation" => MetadataNode::Location {
                line: int("line"),
                column: int("column"),
                scope: req_ref("scope")?,
                inlined_at: opt_ref("inlinedAt"),
            },
            "DILocalVariable" => MetadataNode::LocalVariable {
                name: string("name"),
                scope: req_ref("scope")?,
                file: opt_ref("file"),
                line: int("line"),
                arg: match get("arg") {
                    Some(Field::Int(i)) => Some(*i as u32),
                    _ => None,
                },
            },
            other => MetadataNode::Other(other.to_owned()),
        })
    }

    fn parse_global(&mut self) -> Result<Global, ReaderError> {
        let symbol = match self.next()? {
            Token::Global(n) => Symbol::new(n.clone()),
            t => return Err(self.err(format!("expected a global, found {:?}", t))),
        };
        self.expect_punct('=')?;
        let constant = loop {
            match self.next()? {
                Token::Word(w) if w == "global" => break false,
                Token::Word(w) if w == "constant" => break true,
                Token::Word(_) => self.skip_group()?,
                t => return Err(self.err(format!("expected `global`, found {:?}", t))),
            }
        };
        let ty = self.parse_type()?;
        let init = if self.at_end() || self.peek_punct(',') {
            None
        } else {
            match self.parse_value(&ty) {
                Ok(v) => Some(v),
                Err(e) => {
                    debug!("Leaving complex global initializer out"; "global" => %symbol, "reason" => %e);
                    None
                }
            }
        };
        Ok(Global {
            symbol,
            ty,
            init,
            constant,
        })
    }

    /// `<ret> @name(<params>)`, after any leading attributes. Parameter names are optional.
    fn parse_signature(&mut self) -> Result<DefinitionHeader, ReaderError> {
        self.skip_to_type()?;
        let ret = self.parse_type()?;
        let symbol = match self.next()? {
            Token::Global(n) => Symbol::new(n.clone()),
            t => return Err(self.err(format!("expected a routine name, found {:?}", t))),
        };
        self.expect_punct('(')?;
        let mut params = vec![];
        let mut varargs = false;
        let mut next_anon = 0;
        while !self.eat_punct(')') {
            if self.next_is(&Token::Ellipsis) {
                varargs = true;
            } else {
                let ty = self.parse_type()?;
                self.skip_value_attributes()?;
                let ident = match self.peek() {
                    Some(Token::Local(n)) => {
                        self.pos += 1;
                        Ident::from(n.as_str())
                    }
                    _ => Ident::Anon(next_anon),
                };
                if let Ident::Anon(n) = ident {
                    next_anon = n + 1;
                }
                params.push((ty, ident));
            }
            self.eat_punct(',');
        }
        Ok(DefinitionHeader {
            symbol,
            ret,
            params,
            varargs,
        })
    }

    fn parse_declaration(&mut self) -> Result<Declaration, ReaderError> {
        let h = self.parse_signature()?;
        Ok(Declaration {
            symbol: h.symbol,
            params: h.params.into_iter().map(|(t, _)| t).collect(),
            ret: h.ret,
            varargs: h.varargs,
        })
    }

    fn parse_definition_header(&mut self) -> Result<DefinitionHeader, ReaderError> {
        let h = self.parse_signature()?;
        // Function attributes, section, `!dbg`, ...
        while !self.eat_punct('{') {
            self.next()
                .map_err(|_| self.err(format!("expected `{{` opening `@{}`", h.symbol)))?;
        }
        self.expect_end()?;
        Ok(h)
    }

    /// A statement line. Debug records other than declarations yield `None`.
    fn parse_stmt(&mut self) -> Result<Option<Stmt>, ReaderError> {
        if let Some(w) = self.peek_word() {
            if w.starts_with("#dbg_") {
                return self.parse_debug_record();
            }
        }
        let result = match (self.peek(), self.peek_at(1)) {
            (Some(Token::Local(n)), Some(Token::Punct('='))) => {
                self.pos += 2;
                Some(Ident::from(n.as_str()))
            }
            _ => None,
        };
        let instr = self.parse_instr()?;
        let mut attachments = vec![];
        while self.eat_punct(',') {
            match (self.next()?, self.next()?) {
                (Token::MetaName(kind), Token::MetaRef(md)) => {
                    attachments.push((kind.clone(), MetadataRef(*md)))
                }
                (Token::MetaName(kind), _) => {
                    trace!("Ignoring inline attachment"; "kind" => kind.as_str(), "line" => self.line);
                    self.pos -= 1;
                    self.parse_metadata_node()?;
                }
                (t, _) => return Err(self.err(format!("unexpected trailing {:?}", t))),
            }
        }
        self.expect_end()?;
        Ok(Some(Stmt {
            result,
            instr,
            attachments,
        }))
    }

    /// `#dbg_declare(ptr %x, !var, !DIExpression(), !loc)`, the record form of
    /// `llvm.dbg.declare`
    fn parse_debug_record(&mut self) -> Result<Option<Stmt>, ReaderError> {
        let kind = self.expect_word_any()?;
        if kind != "#dbg_declare" {
            return Ok(None);
        }
        self.expect_punct('(')?;
        let storage = self.parse_metadata_operand()?;
        self.expect_punct(',')?;
        let variable = self.parse_metadata_operand()?;
        self.expect_punct(',')?;
        let expression = self.parse_metadata_operand()?;
        self.expect_punct(',')?;
        let location = match self.next()? {
            Token::MetaRef(n) => MetadataRef(*n),
            t => return Err(self.err(format!("expected a location, found {:?}", t))),
        };
        self.expect_punct(')')?;
        self.expect_end()?;
        let md = |v| TypedValue::new(Type::Metadata, Value::Metadata(Box::new(v)));
        Ok(Some(
            Stmt::effect(Instr::Call {
                ret: Type::Void,
                callee: Value::Global(Symbol::new("llvm.dbg.declare")),
                args: vec![md(storage), md(variable), md(expression)],
            })
            .with_attachment("dbg", location),
        ))
    }

    /// Optional trailing `, align N`, stopping at metadata attachments
    fn parse_align(&mut self) -> Result<Option<u64>, ReaderError> {
        let mut align = None;
        while self.peek_punct(',') {
            match self.peek_at(1) {
                Some(Token::Word(w)) if w == "align" => {
                    self.pos += 2;
                    align = Some(self.expect_int()? as u64);
                }
                _ => break,
            }
        }
        Ok(align)
    }

    fn parse_instr(&mut self) -> Result<Instr, ReaderError> {
        let opcode = self.expect_word_any()?;
        if let Some(op) = binop(opcode) {
            self.eat_any_word(INT_FLAGS);
            self.eat_any_word(FAST_MATH_FLAGS);
            let lhs = self.parse_typed_value()?;
            self.expect_punct(',')?;
            let rhs = self.parse_value(&lhs.ty)?;
            return Ok(Instr::Binary { op, lhs, rhs });
        }
        if let Some(op) = cast(opcode) {
            self.eat_any_word(INT_FLAGS);
            let value = self.parse_typed_value()?;
            self.expect_word("to")?;
            let to = self.parse_type()?;
            return Ok(Instr::Cast { op, value, to });
        }
        Ok(match opcode {
            "icmp" => {
                self.eat_any_word(INT_FLAGS);
                let pred = icmp_pred(self.expect_word_any()?)
                    .ok_or_else(|| self.err("bad icmp predicate".into()))?;
                let lhs = self.parse_typed_value()?;
                self.expect_punct(',')?;
                let rhs = self.parse_value(&lhs.ty)?;
                Instr::ICmp { pred, lhs, rhs }
            }
            "fcmp" => {
                self.eat_any_word(FAST_MATH_FLAGS);
                let pred = fcmp_pred(self.expect_word_any()?)
                    .ok_or_else(|| self.err("bad fcmp predicate".into()))?;
                let lhs = self.parse_typed_value()?;
                self.expect_punct(',')?;
                let rhs = self.parse_value(&lhs.ty)?;
                Instr::FCmp { pred, lhs, rhs }
            }
            "alloca" => {
                self.eat_word("inalloca");
                let ty = self.parse_type()?;
                let mut count = None;
                if self.peek_punct(',') && matches!(self.peek_at(1), Some(Token::Word(w)) if is_type_keyword(w))
                {
                    self.pos += 1;
                    count = Some(self.parse_typed_value()?);
                }
                let align = self.parse_align()?;
                if self.peek_punct(',') && self.peek_at(1) == Some(&Token::Word("addrspace".into()))
                {
                    self.pos += 1;
                    self.skip_addrspace()?;
                }
                Instr::Alloca { ty, count, align }
            }
            "load" => {
                self.eat_word("volatile");
                let ty = self.parse_type()?;
                self.expect_punct(',')?;
                let ptr = self.parse_typed_value()?;
                let align = self.parse_align()?;
                Instr::Load { ty, ptr, align }
            }
            "store" => {
                self.eat_word("volatile");
                let value = self.parse_typed_value()?;
                self.expect_punct(',')?;
                let ptr = self.parse_typed_value()?;
                let align = self.parse_align()?;
                Instr::Store { value, ptr, align }
            }
            "getelementptr" => {
                let inbounds = self.eat_word("inbounds");
                self.eat_any_word(&["nuw", "nusw"]);
                let base_ty = self.parse_type()?;
                self.expect_punct(',')?;
                let ptr = self.parse_typed_value()?;
                let mut indices = vec![];
                while self.peek_punct(',') && !matches!(self.peek_at(1), Some(Token::MetaName(_)))
                {
                    self.pos += 1;
                    self.eat_word("inrange");
                    indices.push(self.parse_typed_value()?);
                }
                Instr::GetElementPtr {
                    inbounds,
                    base_ty,
                    ptr,
                    indices,
                }
            }
            "select" => {
                self.eat_any_word(FAST_MATH_FLAGS);
                let cond = self.parse_typed_value()?;
                self.expect_punct(',')?;
                let then_value = self.parse_typed_value()?;
                self.expect_punct(',')?;
                let else_value = self.parse_typed_value()?.value;
                Instr::Select {
                    cond,
                    then_value,
                    else_value,
                }
            }
            "tail" | "musttail" | "notail" => {
                self.expect_word("call")?;
                self.parse_call()?
            }
            "call" => self.parse_call()?,
            "phi" => {
                self.eat_any_word(FAST_MATH_FLAGS);
                let ty = self.parse_type()?;
                let mut incoming = vec![];
                loop {
                    self.expect_punct('[')?;
                    let v = self.parse_value(&ty)?;
                    self.expect_punct(',')?;
                    let l = self.expect_local()?;
                    self.expect_punct(']')?;
                    incoming.push((v, l));
                    if self.peek_punct(',') && self.peek_at(1) == Some(&Token::Punct('[')) {
                        self.pos += 1;
                    } else {
                        break;
                    }
                }
                Instr::Phi { ty, incoming }
            }
            "extractvalue" => {
                let aggregate = self.parse_typed_value()?;
                let indices = self.parse_indices()?;
                Instr::ExtractValue { aggregate, indices }
            }
            "insertvalue" => {
                let aggregate = self.parse_typed_value()?;
                self.expect_punct(',')?;
                let element = self.parse_typed_value()?;
                let indices = self.parse_indices()?;
                Instr::InsertValue {
                    aggregate,
                    element,
                    indices,
                }
            }
            "extractelement" => {
                let vector = self.parse_typed_value()?;
                self.expect_punct(',')?;
                let index = self.parse_typed_value()?;
                Instr::ExtractElement { vector, index }
            }
            "insertelement" => {
                let vector = self.parse_typed_value()?;
                self.expect_punct(',')?;
                let element = self.parse_typed_value()?;
                self.expect_punct(',')?;
                let index = self.parse_typed_value()?;
                Instr::InsertElement {
                    vector,
                    element,
                    index,
                }
            }
            "ret" => {
                if self.eat_word("void") {
                    Instr::Ret(None)
                } else {
                    Instr::Ret(Some(self.parse_typed_value()?))
                }
            }
            "br" => {
                if self.peek_word() == Some("label") {
                    Instr::Br(self.expect_label()?)
                } else {
                    let cond = self.parse_typed_value()?.value;
                    self.expect_punct(',')?;
                    let then_label = self.expect_label()?;
                    self.expect_punct(',')?;
                    let else_label = self.expect_label()?;
                    Instr::CondBr {
                        cond,
                        then_label,
                        else_label,
                    }
                }
            }
            "switch" => {
                let value = self.parse_typed_value()?;
                self.expect_punct(',')?;
                let default = self.expect_label()?;
                self.expect_punct('[')?;
                let mut cases = vec![];
                while !self.eat_punct(']') {
                    self.parse_type()?;
                    let v = match self.next()? {
                        Token::Int(n) => *n,
                        Token::Word(w) if w == "true" => 1,
                        Token::Word(w) if w == "false" => 0,
                        t => return Err(self.err(format!("bad switch case {:?}", t))),
                    };
                    self.expect_punct(',')?;
                    cases.push((v, self.expect_label()?));
                }
                Instr::Switch {
                    value,
                    default,
                    cases,
                }
            }
            "indirectbr" => {
                let address = self.parse_typed_value()?;
                self.expect_punct(',')?;
                self.expect_punct('[')?;
                let mut destinations = vec![];
                while !self.eat_punct(']') {
                    destinations.push(self.expect_label()?);
                    self.eat_punct(',');
                }
                Instr::IndirectBr {
                    address,
                    destinations,
                }
            }
            "unreachable" => Instr::Unreachable,
            other => return Err(self.unsupported(format!("instruction `{}`", other))),
        })
    }

    fn parse_call(&mut self) -> Result<Instr, ReaderError> {
        self.eat_any_word(FAST_MATH_FLAGS);
        self.skip_to_type()?;
        let ret = match self.parse_type()? {
            Type::Function { ret, .. } => *ret,
            t => t,
        };
        let callee = match self.peek() {
            Some(Token::Global(_)) | Some(Token::Local(_)) => self.parse_value(&Type::ptr())?,
            _ => return Err(self.unsupported("call through a constant expression")),
        };
        self.expect_punct('(')?;
        let mut args = vec![];
        while !self.eat_punct(')') {
            args.push(self.parse_typed_value()?);
            self.eat_punct(',');
        }
        // Function attributes and attribute groups
        while let Some(Token::Word(_)) = self.peek() {
            self.pos += 1;
            self.skip_group()?;
        }
        Ok(Instr::Call { ret, callee, args })
    }

    fn parse_indices(&mut self) -> Result<Vec<u32>, ReaderError> {
        let mut indices = vec![];
        while self.peek_punct(',') && matches!(self.peek_at(1), Some(Token::Int(_))) {
            self.pos += 1;
            indices.push(self.expect_u32()?);
        }
        Ok(indices)
    }
}

fn is_type_keyword(w: &str) -> bool {
    matches!(
        w,
        "void" | "half" | "float" | "double" | "x86_fp80" | "ptr" | "label" | "metadata"
    ) || w
        .strip_prefix('i')
        .map_or(false, |n| !n.is_empty() && n.chars().all(|c| c.is_ascii_digit()))
}

fn binop(w: &str) -> Option<BinOp> {
    Some(match w {
        "add" => BinOp::Add,
        "sub" => BinOp::Sub,
        "mul" => BinOp::Mul,
        "udiv" => BinOp::UDiv,
        "sdiv" => BinOp::SDiv,
        "urem" => BinOp::URem,
        "srem" => BinOp::SRem,
        "shl" => BinOp::Shl,
        "lshr" => BinOp::LShr,
        "ashr" => BinOp::AShr,
        "and" => BinOp::And,
        "or" => BinOp::Or,
        "xor" => BinOp::Xor,
        "fadd" => BinOp::FAdd,
        "fsub" => BinOp::FSub,
        "fmul" => BinOp::FMul,
        "fdiv" => BinOp::FDiv,
        "frem" => BinOp::FRem,
        _ => return None,
    })
}

fn cast(w: &str) -> Option<CastOp> {
    Some(match w {
        "trunc" => CastOp::Trunc,
        "zext" => CastOp::ZExt,
        "sext" => CastOp::SExt,
        "fptrunc" => CastOp::FPTrunc,
        "fpext" => CastOp::FPExt,
        "fptoui" => CastOp::FPToUI,
        "fptosi" => CastOp::FPToSI,
        "uitofp" => CastOp::UIToFP,
        "sitofp" => CastOp::SIToFP,
        "ptrtoint" => CastOp::PtrToInt,
        "inttoptr" => CastOp::IntToPtr,
        "bitcast" => CastOp::BitCast,
        "addrspacecast" => CastOp::AddrSpaceCast,
        _ => return None,
    })
}

fn icmp_pred(w: &str) -> Option<ICmpPred> {
    Some(match w {
        "eq" => ICmpPred::Eq,
        "ne" => ICmpPred::Ne,
        "ugt" => ICmpPred::Ugt,
        "uge" => ICmpPred::Uge,
        "ult" => ICmpPred::Ult,
        "ule" => ICmpPred::Ule,
        "sgt" => ICmpPred::Sgt,
        "sge" => ICmpPred::Sge,
        "slt" => ICmpPred::Slt,
        "sle" => ICmpPred::Sle,
        _ => return None,
    })
}

fn fcmp_pred(w: &str) -> Option<FCmpPred> {
    Some(match w {
        "false" => FCmpPred::False,
        "oeq" => FCmpPred::Oeq,
        "ogt" => FCmpPred::Ogt,
        "oge" => FCmpPred::Oge,
        "olt" => FCmpPred::Olt,
        "ole" => FCmpPred::Ole,
        "one" => FCmpPred::One,
        "ord" => FCmpPred::Ord,
        "ueq" => FCmpPred::Ueq,
        "ugt" => FCmpPred::Ugt,
        "uge" => FCmpPred::Uge,
        "ult" => FCmpPred::Ult,
        "ule" => FCmpPred::Ule,
        "une" => FCmpPred::Une,
        "uno" => FCmpPred::Uno,
        "true" => FCmpPred::True,
        _ => return None,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reads_declarations_definitions_and_metadata() {
        let m = read_module(
            r#"
; ModuleID = 'max.c'
source_filename = "max.c"
target triple = "x86_64-pc-linux-gnu"

%struct.pair = type { i32, ptr }
@counter = dso_local global i32 7, align 4

declare i32 @printf(ptr noundef, ...) #1

define dso_local i32 @max(i32 noundef %0, i32 noundef %1) #0 !dbg !10 {
  %3 = icmp sgt i32 %0, %1, !dbg !12
  br i1 %3, label %4, label %5

4:                                                ; preds = %2
  br label %6

5:
  br label %6

6:
  %7 = phi i32 [ %0, %4 ], [ %1, %5 ]
  ret i32 %7
}

!10 = distinct !DISubprogram(name: "max", scope: !11, file: !11, line: 1, flags: DIFlagPrototyped | DIFlagAllCallsDescribed)
!11 = !DIFile(filename: "max.c", directory: "/tmp")
!12 = !DILocation(line: 2, column: 9, scope: !10)
"#,
        )
        .unwrap();

        assert_eq!(m.source_filename.as_deref(), Some("max.c"));
        assert_eq!(m.named_types.len(), 1);
        assert_eq!(m.globals[0].init, Some(Value::Int(7)));
        assert_eq!(m.declarations[0].symbol, Symbol::from("printf"));
        assert!(m.declarations[0].varargs);

        let def = &m.definitions[0];
        assert_eq!(def.params[1], (Type::Int(32), Ident::Anon(1)));
        // The unlabeled entry block is numbered after the parameters
        assert_eq!(def.blocks[0].label, Some(Ident::Anon(2)));
        assert_eq!(def.blocks.len(), 4);
        assert_eq!(
            def.blocks[0].stmts[0].debug_location(),
            Some(MetadataRef(12))
        );
        assert_eq!(
            def.blocks[3].stmts[0].instr,
            Instr::Phi {
                ty: Type::Int(32),
                incoming: vec![
                    (Value::Ident(Ident::Anon(0)), Ident::Anon(4)),
                    (Value::Ident(Ident::Anon(1)), Ident::Anon(5)),
                ],
            }
        );
        assert_eq!(
            m.metadata.get(MetadataRef(12)),
            Some(&MetadataNode::Location {
                line: 2,
                column: 9,
                scope: MetadataRef(10),
                inlined_at: None
            })
        );
    }

    #[test]
    fn multi_line_switch_and_debug_records() {
        let m = read_module(
            r#"
define void @f(i32 %x) {
entry:
  %p = alloca i32, align 4
    #dbg_declare(ptr %p, !5, !DIExpression(DW_OP_LLVM_fragment, 0, 16), !6)
  call void @llvm.dbg.declare(metadata ptr %p, metadata !5, metadata !DIExpression()), !dbg !6
  switch i32 %x, label %done [
    i32 0, label %zero
    i32 -1, label %done
  ]

zero:
  store i32 0, ptr %p, align 4
  br label %done

done:
  ret void
}
"#,
        )
        .unwrap();
        let entry = &m.definitions[0].blocks[0];
        assert_eq!(entry.stmts.len(), 4);
        assert_eq!(
            entry.stmts[0].instr,
            Instr::Alloca {
                ty: Type::Int(32),
                count: None,
                align: Some(4)
            }
        );
        match &entry.stmts[1].instr {
            Instr::Call { callee, args, .. } => {
                assert_eq!(callee, &Value::Global(Symbol::from("llvm.dbg.declare")));
                assert_eq!(args.len(), 3);
            }
            i => panic!("expected a call, got {:?}", i),
        }
        assert_eq!(entry.stmts[1].debug_location(), Some(MetadataRef(6)));
        assert_eq!(
            entry.stmts[3].instr,
            Instr::Switch {
                value: TypedValue::new(Type::Int(32), Value::Ident(Ident::from("x"))),
                default: Ident::from("done"),
                cases: vec![(0, Ident::from("zero")), (-1, Ident::from("done"))],
            }
        );
    }

    #[test]
    fn errors_carry_line_numbers() {
        let e = read_module("define void @f() {\nentry:\n  %x = fneg float 1.0\n  ret void\n}\n")
            .unwrap_err();
        assert_eq!(
            e,
            ReaderError::Unsupported {
                line: 3,
                construct: "instruction `fneg`".into()
            }
        );
        assert!(matches!(
            read_module("define void @f() {\nentry:\n  ret void\n"),
            Err(ReaderError::UnexpectedEof { .. })
        ));
    }
}
