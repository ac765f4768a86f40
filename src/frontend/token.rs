//! Token definitions for the Python frontend
#![allow(dead_code)]

use crate::utils::{Pos, Span};

/// A token produced by the lexer
#[derive(Debug, Clone, PartialEq)]
pub struct Token {
    pub kind: TokenKind,
    pub span: Span,
    /// Position of the first byte of the lexeme
    pub pos: Pos,
}

impl Token {
    pub fn new(kind: TokenKind, span: Span, pos: Pos) -> Self {
        Self { kind, span, pos }
    }

    pub fn eof(pos: Pos) -> Self {
        Self {
            kind: TokenKind::Eof,
            span: Span::new(pos.offset, pos.offset),
            pos,
        }
    }
}

/// One segment of an interpolated (f-) string.
///
/// A part is either literal text (with `{{`/`}}` already un-escaped) or an
/// embedded expression carried as raw source text, to be re-parsed by the
/// consumer. A bare `{expr}` has neither conversion nor format spec.
#[derive(Debug, Clone, PartialEq)]
pub enum FStringPart {
    Literal(String),
    Expr {
        /// Raw source text of the embedded expression
        source: String,
        /// Conversion flag: `r`, `s` or `a`
        conversion: Option<char>,
        /// Format spec text after `:`, verbatim
        format_spec: Option<String>,
    },
}

/// A plain (non-interpolated) string literal.
///
/// `body` is the text between the quotes with escape sequences still in
/// place; decoding happens in the parser so the lexeme round-trips.
#[derive(Debug, Clone, PartialEq)]
pub struct StringLit {
    pub body: String,
    pub raw: bool,
    pub bytes: bool,
}

/// Token kinds
#[derive(Debug, Clone, PartialEq)]
pub enum TokenKind {
    // ============ Keywords ============
    /// False
    False,
    /// None
    None,
    /// True
    True,
    /// and
    And,
    /// as
    As,
    /// assert
    Assert,
    /// break
    Break,
    /// class
    Class,
    /// continue
    Continue,
    /// def
    Def,
    /// del
    Del,
    /// elif
    Elif,
    /// else
    Else,
    /// for
    For,
    /// from
    From,
    /// global
    Global,
    /// if
    If,
    /// import
    Import,
    /// in
    In,
    /// is
    Is,
    /// lambda
    Lambda,
    /// not
    Not,
    /// or
    Or,
    /// pass
    Pass,
    /// raise
    Raise,
    /// return
    Return,
    /// while
    While,

    // ============ Identifiers and Literals ============
    /// Identifier (variable name, function name, etc.)
    Ident(String),
    /// Numeric literal, exact lexeme preserved (value parsing is deferred)
    Number(String),
    /// Complex literal (`j`/`J` suffix), exact lexeme preserved
    ComplexNumber(String),
    /// String literal
    Str(StringLit),
    /// Interpolated string literal
    FString(Vec<FStringPart>),

    // ============ Operators ============
    /// +
    Plus,
    /// -
    Minus,
    /// *
    Star,
    /// **
    DoubleStar,
    /// /
    Slash,
    /// //
    DoubleSlash,
    /// %
    Percent,
    /// @ (matrix multiply / decorator)
    At,
    /// <<
    Shl,
    /// >>
    Shr,
    /// &
    Amp,
    /// |
    Pipe,
    /// ^
    Caret,
    /// ~
    Tilde,
    /// <
    Lt,
    /// >
    Gt,
    /// <=
    Le,
    /// >=
    Ge,
    /// ==
    EqEq,
    /// !=
    Ne,
    /// =
    Eq,
    /// +=
    PlusEq,
    /// -=
    MinusEq,
    /// *=
    StarEq,
    /// /=
    SlashEq,
    /// //=
    DoubleSlashEq,
    /// %=
    PercentEq,
    /// @=
    AtEq,
    /// &=
    AmpEq,
    /// |=
    PipeEq,
    /// ^=
    CaretEq,
    /// <<=
    ShlEq,
    /// >>=
    ShrEq,
    /// **=
    DoubleStarEq,
    /// ->
    Arrow,
    /// :=
    ColonEq,
    /// .
    Dot,
    /// ...
    Ellipsis,

    // ============ Delimiters ============
    /// (
    LParen,
    /// )
    RParen,
    /// [
    LBracket,
    /// ]
    RBracket,
    /// {
    LBrace,
    /// }
    RBrace,
    /// ,
    Comma,
    /// :
    Colon,
    /// ;
    Semicolon,

    // ============ Layout ============
    /// End of a logical line
    Newline,
    /// Indentation increased
    Indent,
    /// Indentation decreased
    Dedent,

    // ============ Special ============
    /// End of file
    Eof,
}

impl TokenKind {
    /// Try to convert an identifier to a keyword
    pub fn keyword_from_str(s: &str) -> Option<TokenKind> {
        match s {
            "False" => Some(TokenKind::False),
            "None" => Some(TokenKind::None),
            "True" => Some(TokenKind::True),
            "and" => Some(TokenKind::And),
            "as" => Some(TokenKind::As),
            "assert" => Some(TokenKind::Assert),
            "break" => Some(TokenKind::Break),
            "class" => Some(TokenKind::Class),
            "continue" => Some(TokenKind::Continue),
            "def" => Some(TokenKind::Def),
            "del" => Some(TokenKind::Del),
            "elif" => Some(TokenKind::Elif),
            "else" => Some(TokenKind::Else),
            "for" => Some(TokenKind::For),
            "from" => Some(TokenKind::From),
            "global" => Some(TokenKind::Global),
            "if" => Some(TokenKind::If),
            "import" => Some(TokenKind::Import),
            "in" => Some(TokenKind::In),
            "is" => Some(TokenKind::Is),
            "lambda" => Some(TokenKind::Lambda),
            "not" => Some(TokenKind::Not),
            "or" => Some(TokenKind::Or),
            "pass" => Some(TokenKind::Pass),
            "raise" => Some(TokenKind::Raise),
            "return" => Some(TokenKind::Return),
            "while" => Some(TokenKind::While),
            _ => None,
        }
    }

    /// Augmented-assignment operators (`x += 1` and friends)
    pub fn is_aug_assign(&self) -> bool {
        matches!(
            self,
            TokenKind::PlusEq
                | TokenKind::MinusEq
                | TokenKind::StarEq
                | TokenKind::SlashEq
                | TokenKind::DoubleSlashEq
                | TokenKind::PercentEq
                | TokenKind::AtEq
                | TokenKind::AmpEq
                | TokenKind::PipeEq
                | TokenKind::CaretEq
                | TokenKind::ShlEq
                | TokenKind::ShrEq
                | TokenKind::DoubleStarEq
        )
    }

    /// Human-readable name used in diagnostics
    pub fn describe(&self) -> String {
        match self {
            TokenKind::Ident(name) => format!("identifier '{name}'"),
            TokenKind::Number(lexeme) | TokenKind::ComplexNumber(lexeme) => {
                format!("number '{lexeme}'")
            }
            TokenKind::Str(_) => "string literal".to_string(),
            TokenKind::FString(_) => "f-string literal".to_string(),
            TokenKind::Newline => "newline".to_string(),
            TokenKind::Indent => "indent".to_string(),
            TokenKind::Dedent => "dedent".to_string(),
            TokenKind::Eof => "end of file".to_string(),
            other => format!("{other:?}"),
        }
    }
}
