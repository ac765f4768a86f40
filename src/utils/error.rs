//! Error handling for pyaot
//!
//! Each pipeline stage has its own error type so a caller can tell a
//! malformed token from malformed grammar from an impossible lowering.
//! All variants carry the offending source position.

use crate::utils::Pos;
use thiserror::Error;

/// Result type alias
pub type Result<T> = std::result::Result<T, Error>;

/// Errors produced while tokenizing
#[derive(Error, Debug, Clone, PartialEq)]
pub enum LexError {
    #[error("unterminated string literal at {pos}")]
    UnterminatedString { pos: Pos },

    #[error("unterminated f-string at {pos}")]
    UnterminatedFString { pos: Pos },

    #[error("invalid character {ch:?} at {pos}")]
    InvalidCharacter { ch: char, pos: Pos },

    #[error("inconsistent indentation at {pos}")]
    InvalidIndentation { pos: Pos },
}

impl LexError {
    pub fn pos(&self) -> Pos {
        match self {
            Self::UnterminatedString { pos }
            | Self::UnterminatedFString { pos }
            | Self::InvalidCharacter { pos, .. }
            | Self::InvalidIndentation { pos } => *pos,
        }
    }
}

/// Errors produced while parsing
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ParseError {
    #[error("unexpected token: expected {expected}, got {got} at {pos}")]
    UnexpectedToken {
        expected: String,
        got: String,
        pos: Pos,
    },

    #[error("unexpected end of file at {pos}")]
    UnexpectedEof { pos: Pos },

    #[error("invalid syntax: {message} at {pos}")]
    InvalidSyntax { message: String, pos: Pos },
}

impl ParseError {
    pub fn pos(&self) -> Pos {
        match self {
            Self::UnexpectedToken { pos, .. }
            | Self::UnexpectedEof { pos }
            | Self::InvalidSyntax { pos, .. } => *pos,
        }
    }
}

/// Errors produced while lowering the AST
#[derive(Error, Debug, Clone, PartialEq)]
pub enum CodegenError {
    #[error("unsupported construct: {construct} at {pos}")]
    UnsupportedConstruct { construct: String, pos: Pos },

    #[error("cannot resolve a type for {what} at {pos}")]
    UnresolvedType { what: String, pos: Pos },

    #[error("conflicting layout for class {class}: field {field} at {pos}")]
    ClassLayoutConflict { class: String, field: String, pos: Pos },
}

impl CodegenError {
    pub fn pos(&self) -> Pos {
        match self {
            Self::UnsupportedConstruct { pos, .. }
            | Self::UnresolvedType { pos, .. }
            | Self::ClassLayoutConflict { pos, .. } => *pos,
        }
    }
}

/// Top-level compiler error: any stage failure plus driver-level concerns.
///
/// Stage errors propagate unchanged; resource errors (IO, external tools)
/// are kept distinct so they are never mistaken for grammar errors.
#[derive(Error, Debug)]
pub enum Error {
    #[error(transparent)]
    Lex(#[from] LexError),

    #[error(transparent)]
    Parse(#[from] ParseError),

    #[error(transparent)]
    Codegen(#[from] CodegenError),

    #[error("module '{name}' not found (searched {searched})")]
    ModuleNotFound { name: String, searched: String },

    #[error("IO error: {0}")]
    Io(String),

    #[error("external compiler failed: {0}")]
    ExternalCompiler(String),
}

impl From<std::io::Error> for Error {
    fn from(e: std::io::Error) -> Self {
        Error::Io(e.to_string())
    }
}

impl Error {
    /// Source position, when the error points at one
    pub fn pos(&self) -> Option<Pos> {
        match self {
            Self::Lex(e) => Some(e.pos()),
            Self::Parse(e) => Some(e.pos()),
            Self::Codegen(e) => Some(e.pos()),
            Self::ModuleNotFound { .. } | Self::Io(_) | Self::ExternalCompiler(_) => None,
        }
    }
}
