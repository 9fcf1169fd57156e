//! Failures that abort a translation.
//!
//! A [`TranslationError`] in any routine aborts the translation of the whole module. Malformed
//! debug annotations are not errors; the propagator drops them.

use crate::ir::{BlockLabel, Ident, Symbol};

/// A source type that has no counterpart among the target [`TypeRepr`](crate::types::TypeRepr)s.
#[derive(Debug, thiserror::Error, Clone, PartialEq, Eq)]
pub enum TypeLiftError {
    #[error("integer type of width 0 cannot be represented")]
    ZeroWidthInteger,
    #[error("`void` is only valid as a return type")]
    VoidValue,
    #[error("`{ty}` is not a first-class value type")]
    NotFirstClass { ty: String },
    #[error("opaque struct `%{name}` has no known layout")]
    OpaqueStruct { name: String },
    #[error("named type `%{name}` contains itself")]
    RecursiveType { name: String },
    #[error("in element of `{ty}`: {inner}")]
    Element {
        ty: String,
        inner: Box<TypeLiftError>,
    },
}

#[derive(Debug, thiserror::Error, Clone, PartialEq, Eq)]
pub enum TranslationError {
    #[error("could not lift type for `@{symbol}`: {source}")]
    TypeLift {
        symbol: Symbol,
        #[source]
        source: TypeLiftError,
    },
    #[error("unknown symbol `@{symbol}`")]
    UnknownSymbol { symbol: Symbol },
    #[error("`@{symbol}` was redeclared with an incompatible signature")]
    IncompatibleRedeclaration { symbol: Symbol },
    #[error("identifier `{ident}` assigned more than once in `@{symbol}`")]
    DuplicateAssignment { symbol: Symbol, ident: Ident },
    #[error("identifier `{ident}` used without a definition in `@{symbol}`")]
    UndefinedIdent { symbol: Symbol, ident: Ident },
    #[error("entry block of `@{symbol}` has no label")]
    MissingEntryLabel { symbol: Symbol },
    #[error("`@{symbol}` has an empty body")]
    EmptyBody { symbol: Symbol },
    #[error("block `{label}` of `@{symbol}` does not end in a terminator")]
    MissingTerminator { symbol: Symbol, label: String },
    #[error("jump to undefined block `{label}` in `@{symbol}`")]
    UndefinedBlock { symbol: Symbol, label: BlockLabel },
    #[error("unsupported construct in `@{symbol}`: {detail}")]
    Unsupported { symbol: Symbol, detail: String },
    #[error("malformed instruction in `@{symbol}`: {detail}")]
    Malformed { symbol: Symbol, detail: String },
}

impl TranslationError {
    /// The routine (or declaration) the failure is attributed to
    pub fn symbol(&self) -> &Symbol {
        match self {
            TranslationError::TypeLift { symbol, .. }
            | TranslationError::UnknownSymbol { symbol }
            | TranslationError::IncompatibleRedeclaration { symbol }
            | TranslationError::DuplicateAssignment { symbol, .. }
            | TranslationError::UndefinedIdent { symbol, .. }
            | TranslationError::MissingEntryLabel { symbol }
            | TranslationError::EmptyBody { symbol }
            | TranslationError::MissingTerminator { symbol, .. }
            | TranslationError::UndefinedBlock { symbol, .. }
            | TranslationError::Unsupported { symbol, .. }
            | TranslationError::Malformed { symbol, .. } => symbol,
        }
    }
}

/// A failure to read a textual module.
#[derive(Debug, thiserror::Error, Clone, PartialEq, Eq)]
pub enum ReaderError {
    #[error("line {line}: {message}")]
    Syntax { line: usize, message: String },
    #[error("line {line}: unsupported {construct}")]
    Unsupported { line: usize, construct: String },
    #[error("unexpected end of input inside {context}")]
    UnexpectedEof { context: String },
}
