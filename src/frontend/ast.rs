//! Abstract Syntax Tree definitions for the Python frontend
//!
//! Nodes own their children exclusively (plain `Box`/`Vec`, recursive drop,
//! no parent links). One `Module` is built per compilation unit.

use crate::utils::Span;

/// A complete compilation unit
#[derive(Debug, Clone)]
pub struct Module {
    pub body: Vec<Stmt>,
}

/// Alias in an import list: `import numpy as np`
#[derive(Debug, Clone)]
pub struct ImportAlias {
    pub name: String,
    pub asname: Option<String>,
    pub span: Span,
}

/// Function / lambda parameter
#[derive(Debug, Clone)]
pub struct Param {
    pub name: String,
    pub annotation: Option<Expr>,
    pub default: Option<Expr>,
    pub span: Span,
}

/// Statement
#[derive(Debug, Clone)]
pub enum Stmt {
    /// def name(params) -> returns: body
    FunctionDef {
        name: String,
        params: Vec<Param>,
        returns: Option<Expr>,
        body: Vec<Stmt>,
        decorators: Vec<Expr>,
        span: Span,
    },
    /// class name(bases): body
    ClassDef {
        name: String,
        bases: Vec<Expr>,
        body: Vec<Stmt>,
        decorators: Vec<Expr>,
        span: Span,
    },
    /// return [value]
    Return { value: Option<Expr>, span: Span },
    /// a = b = value  (one value, one or more targets)
    Assign {
        targets: Vec<Expr>,
        value: Expr,
        span: Span,
    },
    /// target op= value
    AugAssign {
        target: Expr,
        op: BinOp,
        value: Expr,
        span: Span,
    },
    /// target: annotation [= value]
    AnnAssign {
        target: Expr,
        annotation: Expr,
        value: Option<Expr>,
        span: Span,
    },
    /// for target in iter: body [else: orelse]
    For {
        target: Expr,
        iter: Expr,
        body: Vec<Stmt>,
        orelse: Vec<Stmt>,
        span: Span,
    },
    /// while test: body [else: orelse]
    While {
        test: Expr,
        body: Vec<Stmt>,
        orelse: Vec<Stmt>,
        span: Span,
    },
    /// if test: body [elif/else: orelse]
    If {
        test: Expr,
        body: Vec<Stmt>,
        orelse: Vec<Stmt>,
        span: Span,
    },
    /// import a, b as c
    Import { names: Vec<ImportAlias>, span: Span },
    /// from module import a, b as c
    ImportFrom {
        module: String,
        names: Vec<ImportAlias>,
        span: Span,
    },
    /// assert test [, msg]
    Assert {
        test: Expr,
        msg: Option<Expr>,
        span: Span,
    },
    /// raise [exc [from cause]]
    Raise {
        exc: Option<Expr>,
        cause: Option<Expr>,
        span: Span,
    },
    /// global a, b
    Global { names: Vec<String>, span: Span },
    /// del a, b
    Del { targets: Vec<Expr>, span: Span },
    /// pass
    Pass { span: Span },
    /// break
    Break { span: Span },
    /// continue
    Continue { span: Span },
    /// Expression statement
    Expr { value: Expr, span: Span },
}

/// One `for target in iter [if cond]*` clause of a comprehension
#[derive(Debug, Clone)]
pub struct Comprehension {
    pub target: Expr,
    pub iter: Expr,
    pub ifs: Vec<Expr>,
}

/// Keyword argument in a call: `f(x=1)`; `arg` is `None` for `**kwargs`
#[derive(Debug, Clone)]
pub struct Keyword {
    pub arg: Option<String>,
    pub value: Expr,
}

/// One part of an f-string after the embedded expressions were re-parsed
#[derive(Debug, Clone)]
pub enum FStringElem {
    Literal(String),
    Expr {
        value: Box<Expr>,
        conversion: Option<char>,
        format_spec: Option<String>,
    },
}

/// Expression
#[derive(Debug, Clone)]
pub enum Expr {
    /// `a and b and c` / `a or b or c`; always at least two values,
    /// flattened left-to-right
    BoolOp {
        op: BoolOpKind,
        values: Vec<Expr>,
        span: Span,
    },
    /// Binary operation with exactly two operands
    BinOp {
        left: Box<Expr>,
        op: BinOp,
        right: Box<Expr>,
        span: Span,
    },
    /// Unary operation
    UnaryOp {
        op: UnaryOp,
        operand: Box<Expr>,
        span: Span,
    },
    /// Chained comparison: `a < b < c` is one node with
    /// `ops.len() == comparators.len()`
    Compare {
        left: Box<Expr>,
        ops: Vec<CmpOp>,
        comparators: Vec<Expr>,
        span: Span,
    },
    /// `body if test else orelse`
    IfExp {
        test: Box<Expr>,
        body: Box<Expr>,
        orelse: Box<Expr>,
        span: Span,
    },
    /// `lambda params: body`
    Lambda {
        params: Vec<Param>,
        body: Box<Expr>,
        span: Span,
    },
    /// `name := value`
    NamedExpr {
        name: String,
        value: Box<Expr>,
        span: Span,
    },
    /// Function call
    Call {
        func: Box<Expr>,
        args: Vec<Expr>,
        keywords: Vec<Keyword>,
        span: Span,
    },
    /// Attribute access (`value.attr`)
    Attribute {
        value: Box<Expr>,
        attr: String,
        span: Span,
    },
    /// Subscript (`value[index]`); `index` may be a `Slice`
    Subscript {
        value: Box<Expr>,
        index: Box<Expr>,
        span: Span,
    },
    /// Slice inside a subscript: `lower:upper:step`
    Slice {
        lower: Option<Box<Expr>>,
        upper: Option<Box<Expr>>,
        step: Option<Box<Expr>>,
        span: Span,
    },
    /// `*value` in a call or assignment target
    Starred { value: Box<Expr>, span: Span },
    /// Identifier
    Name { id: String, span: Span },
    /// Literal constant
    Constant { value: Constant, span: Span },
    /// Interpolated string
    FString { parts: Vec<FStringElem>, span: Span },
    /// Tuple display
    Tuple { elts: Vec<Expr>, span: Span },
    /// List display
    List { elts: Vec<Expr>, span: Span },
    /// Set display
    Set { elts: Vec<Expr>, span: Span },
    /// Dict display; a `None` key marks a `**mapping` expansion
    Dict {
        keys: Vec<Option<Expr>>,
        values: Vec<Expr>,
        span: Span,
    },
    /// `[elt for target in iter if cond]`
    ListComp {
        elt: Box<Expr>,
        generators: Vec<Comprehension>,
        span: Span,
    },
    /// `{elt for target in iter}`
    SetComp {
        elt: Box<Expr>,
        generators: Vec<Comprehension>,
        span: Span,
    },
    /// `{k: v for target in iter}`
    DictComp {
        key: Box<Expr>,
        value: Box<Expr>,
        generators: Vec<Comprehension>,
        span: Span,
    },
    /// `(elt for target in iter)`
    GeneratorExp {
        elt: Box<Expr>,
        generators: Vec<Comprehension>,
        span: Span,
    },
}

/// Literal value
#[derive(Debug, Clone, PartialEq)]
pub enum Constant {
    Int(i64),
    Float(f64),
    /// Imaginary component of a complex literal
    Complex(f64),
    Str(String),
    Bytes(Vec<u8>),
    Bool(bool),
    None,
    Ellipsis,
}

/// Boolean operator
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BoolOpKind {
    And,
    Or,
}

/// Binary operator
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinOp {
    Add,
    Sub,
    Mult,
    Div,
    FloorDiv,
    Mod,
    MatMult,
    Pow,
    LShift,
    RShift,
    BitOr,
    BitXor,
    BitAnd,
}

/// Unary operator
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnaryOp {
    /// `+`
    UAdd,
    /// `-`
    USub,
    /// `~`
    Invert,
    /// `not`
    Not,
}

/// Comparison operator
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CmpOp {
    Eq,
    NotEq,
    Lt,
    LtE,
    Gt,
    GtE,
    Is,
    IsNot,
    In,
    NotIn,
}

impl Expr {
    pub fn span(&self) -> Span {
        match self {
            Expr::BoolOp { span, .. }
            | Expr::BinOp { span, .. }
            | Expr::UnaryOp { span, .. }
            | Expr::Compare { span, .. }
            | Expr::IfExp { span, .. }
            | Expr::Lambda { span, .. }
            | Expr::NamedExpr { span, .. }
            | Expr::Call { span, .. }
            | Expr::Attribute { span, .. }
            | Expr::Subscript { span, .. }
            | Expr::Slice { span, .. }
            | Expr::Starred { span, .. }
            | Expr::Name { span, .. }
            | Expr::Constant { span, .. }
            | Expr::FString { span, .. }
            | Expr::Tuple { span, .. }
            | Expr::List { span, .. }
            | Expr::Set { span, .. }
            | Expr::Dict { span, .. }
            | Expr::ListComp { span, .. }
            | Expr::SetComp { span, .. }
            | Expr::DictComp { span, .. }
            | Expr::GeneratorExp { span, .. } => *span,
        }
    }
}

impl Stmt {
    pub fn span(&self) -> Span {
        match self {
            Stmt::FunctionDef { span, .. }
            | Stmt::ClassDef { span, .. }
            | Stmt::Return { span, .. }
            | Stmt::Assign { span, .. }
            | Stmt::AugAssign { span, .. }
            | Stmt::AnnAssign { span, .. }
            | Stmt::For { span, .. }
            | Stmt::While { span, .. }
            | Stmt::If { span, .. }
            | Stmt::Import { span, .. }
            | Stmt::ImportFrom { span, .. }
            | Stmt::Assert { span, .. }
            | Stmt::Raise { span, .. }
            | Stmt::Global { span, .. }
            | Stmt::Del { span, .. }
            | Stmt::Pass { span }
            | Stmt::Break { span }
            | Stmt::Continue { span }
            | Stmt::Expr { span, .. } => *span,
        }
    }
}
