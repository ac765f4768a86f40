//! Parser for Python source
//!
//! Recursive descent over the token sequence, one function per precedence
//! level. Binary levels fold left; power is right-associative; `and`/`or`
//! chains and comparisons collect into flat nodes. The cursor supports an
//! exact one-token retreat, used to disambiguate `not in` and `is not`.

use crate::frontend::ast::*;
use crate::frontend::lexer;
use crate::frontend::token::{FStringPart, StringLit, Token, TokenKind};
use crate::utils::{ParseError, Pos, Span};

type Result<T> = std::result::Result<T, ParseError>;

/// The parser
pub struct Parser {
    tokens: Vec<Token>,
    pos: usize,
}

/// Parse a complete token sequence into one module
pub fn parse(tokens: Vec<Token>) -> Result<Module> {
    Parser::new(tokens).parse_module()
}

impl Parser {
    pub fn new(tokens: Vec<Token>) -> Self {
        Self { tokens, pos: 0 }
    }

    // ==================== Cursor ====================

    fn current(&self) -> &Token {
        self.tokens.get(self.pos).unwrap_or_else(|| {
            self.tokens.last().expect("token stream always ends with EOF")
        })
    }

    fn current_kind(&self) -> &TokenKind {
        &self.current().kind
    }

    fn current_pos(&self) -> Pos {
        self.current().pos
    }

    fn advance(&mut self) -> Token {
        let token = self.current().clone();
        if self.pos < self.tokens.len() - 1 {
            self.pos += 1;
        }
        token
    }

    /// Step the cursor back exactly one token. The retreated token is
    /// available for the next parse rule, which the `not in`/`is not`
    /// speculation depends on.
    fn retreat(&mut self) {
        debug_assert!(self.pos > 0);
        self.pos -= 1;
    }

    fn check(&self, kind: &TokenKind) -> bool {
        std::mem::discriminant(self.current_kind()) == std::mem::discriminant(kind)
    }

    fn consume(&mut self, kind: &TokenKind) -> bool {
        if self.check(kind) {
            self.advance();
            true
        } else {
            false
        }
    }

    fn is_at_end(&self) -> bool {
        matches!(self.current_kind(), TokenKind::Eof)
    }

    fn expect(&mut self, expected: TokenKind) -> Result<Token> {
        if self.check(&expected) {
            Ok(self.advance())
        } else if self.is_at_end() {
            Err(ParseError::UnexpectedEof {
                pos: self.current_pos(),
            })
        } else {
            Err(ParseError::UnexpectedToken {
                expected: expected.describe(),
                got: self.current_kind().describe(),
                pos: self.current_pos(),
            })
        }
    }

    fn expect_ident(&mut self) -> Result<String> {
        match self.current_kind().clone() {
            TokenKind::Ident(name) => {
                self.advance();
                Ok(name)
            }
            other => Err(ParseError::UnexpectedToken {
                expected: "identifier".to_string(),
                got: other.describe(),
                pos: self.current_pos(),
            }),
        }
    }

    fn invalid(&self, message: impl Into<String>) -> ParseError {
        ParseError::InvalidSyntax {
            message: message.into(),
            pos: self.current_pos(),
        }
    }

    fn span_from(&self, start: Span) -> Span {
        let end = self.tokens[self.pos.saturating_sub(1)].span;
        start.merge(&end)
    }

    fn skip_newlines(&mut self) {
        while self.check(&TokenKind::Newline) {
            self.advance();
        }
    }

    // ==================== Module and statements ====================

    pub fn parse_module(&mut self) -> Result<Module> {
        let mut body = Vec::new();
        self.skip_newlines();
        while !self.is_at_end() {
            body.extend(self.parse_statement()?);
            self.skip_newlines();
        }
        Ok(Module { body })
    }

    /// One logical statement. Simple statements may be `;`-separated, so a
    /// line can yield more than one node.
    fn parse_statement(&mut self) -> Result<Vec<Stmt>> {
        match self.current_kind() {
            TokenKind::Def => Ok(vec![self.parse_function_def(Vec::new())?]),
            TokenKind::Class => Ok(vec![self.parse_class_def(Vec::new())?]),
            TokenKind::At => self.parse_decorated(),
            TokenKind::If => Ok(vec![self.parse_if()?]),
            TokenKind::While => Ok(vec![self.parse_while()?]),
            TokenKind::For => Ok(vec![self.parse_for()?]),
            _ => self.parse_simple_stmt_line(),
        }
    }

    fn parse_decorated(&mut self) -> Result<Vec<Stmt>> {
        let mut decorators = Vec::new();
        while self.consume(&TokenKind::At) {
            decorators.push(self.parse_expression()?);
            self.expect(TokenKind::Newline)?;
        }
        match self.current_kind() {
            TokenKind::Def => Ok(vec![self.parse_function_def(decorators)?]),
            TokenKind::Class => Ok(vec![self.parse_class_def(decorators)?]),
            _ => Err(self.invalid("decorator must precede a function or class definition")),
        }
    }

    fn parse_simple_stmt_line(&mut self) -> Result<Vec<Stmt>> {
        let mut stmts = vec![self.parse_simple_stmt()?];
        while self.consume(&TokenKind::Semicolon) {
            if self.check(&TokenKind::Newline) || self.is_at_end() {
                break;
            }
            stmts.push(self.parse_simple_stmt()?);
        }
        if !self.is_at_end() && !self.check(&TokenKind::Dedent) {
            self.expect(TokenKind::Newline)?;
        }
        Ok(stmts)
    }

    fn parse_simple_stmt(&mut self) -> Result<Stmt> {
        let start = self.current().span;
        match self.current_kind() {
            TokenKind::Return => {
                self.advance();
                let value = if self.at_expression_start() {
                    Some(self.parse_testlist()?)
                } else {
                    None
                };
                Ok(Stmt::Return {
                    value,
                    span: self.span_from(start),
                })
            }
            TokenKind::Pass => {
                self.advance();
                Ok(Stmt::Pass { span: start })
            }
            TokenKind::Break => {
                self.advance();
                Ok(Stmt::Break { span: start })
            }
            TokenKind::Continue => {
                self.advance();
                Ok(Stmt::Continue { span: start })
            }
            TokenKind::Import => self.parse_import(),
            TokenKind::From => self.parse_import_from(),
            TokenKind::Assert => {
                self.advance();
                let test = self.parse_expression()?;
                let msg = if self.consume(&TokenKind::Comma) {
                    Some(self.parse_expression()?)
                } else {
                    None
                };
                Ok(Stmt::Assert {
                    test,
                    msg,
                    span: self.span_from(start),
                })
            }
            TokenKind::Raise => {
                self.advance();
                let exc = if self.at_expression_start() {
                    Some(self.parse_expression()?)
                } else {
                    None
                };
                let cause = if exc.is_some() && self.consume(&TokenKind::From) {
                    Some(self.parse_expression()?)
                } else {
                    None
                };
                Ok(Stmt::Raise {
                    exc,
                    cause,
                    span: self.span_from(start),
                })
            }
            TokenKind::Global => {
                self.advance();
                let mut names = vec![self.expect_ident()?];
                while self.consume(&TokenKind::Comma) {
                    names.push(self.expect_ident()?);
                }
                Ok(Stmt::Global {
                    names,
                    span: self.span_from(start),
                })
            }
            TokenKind::Del => {
                self.advance();
                let mut targets = vec![self.parse_expression()?];
                while self.consume(&TokenKind::Comma) {
                    targets.push(self.parse_expression()?);
                }
                Ok(Stmt::Del {
                    targets,
                    span: self.span_from(start),
                })
            }
            _ => self.parse_expr_or_assign(),
        }
    }

    fn parse_expr_or_assign(&mut self) -> Result<Stmt> {
        let start = self.current().span;
        let first = self.parse_testlist()?;

        // Annotated assignment: `target: annotation [= value]`
        if self.consume(&TokenKind::Colon) {
            self.validate_target(&first)?;
            let annotation = self.parse_expression()?;
            let value = if self.consume(&TokenKind::Eq) {
                Some(self.parse_testlist()?)
            } else {
                None
            };
            return Ok(Stmt::AnnAssign {
                target: first,
                annotation,
                value,
                span: self.span_from(start),
            });
        }

        // Augmented assignment
        if self.current_kind().is_aug_assign() {
            let op = aug_assign_op(self.current_kind());
            self.advance();
            self.validate_target(&first)?;
            if matches!(first, Expr::Tuple { .. } | Expr::List { .. }) {
                return Err(self.invalid("augmented assignment target must be a single name"));
            }
            let value = self.parse_testlist()?;
            return Ok(Stmt::AugAssign {
                target: first,
                op,
                value,
                span: self.span_from(start),
            });
        }

        // Chained assignment: `a = b = value`
        if self.check(&TokenKind::Eq) {
            let mut chain = vec![first];
            while self.consume(&TokenKind::Eq) {
                chain.push(self.parse_testlist()?);
            }
            let value = chain.pop().expect("assignment chain has a value");
            for target in &chain {
                self.validate_target(target)?;
            }
            return Ok(Stmt::Assign {
                targets: chain,
                value,
                span: self.span_from(start),
            });
        }

        Ok(Stmt::Expr {
            span: self.span_from(start),
            value: first,
        })
    }

    fn validate_target(&self, target: &Expr) -> Result<()> {
        match target {
            Expr::Name { .. } | Expr::Attribute { .. } | Expr::Subscript { .. } => Ok(()),
            Expr::Starred { value, .. } => self.validate_target(value),
            Expr::Tuple { elts, .. } | Expr::List { elts, .. } => {
                for elt in elts {
                    self.validate_target(elt)?;
                }
                Ok(())
            }
            other => Err(ParseError::InvalidSyntax {
                message: "cannot assign to this expression".to_string(),
                pos: other.span().start_pos_or(self.current_pos()),
            }),
        }
    }

    fn parse_import(&mut self) -> Result<Stmt> {
        let start = self.current().span;
        self.expect(TokenKind::Import)?;
        let mut names = vec![self.parse_import_alias()?];
        while self.consume(&TokenKind::Comma) {
            names.push(self.parse_import_alias()?);
        }
        Ok(Stmt::Import {
            names,
            span: self.span_from(start),
        })
    }

    fn parse_import_from(&mut self) -> Result<Stmt> {
        let start = self.current().span;
        self.expect(TokenKind::From)?;
        let module = self.expect_ident()?;
        self.expect(TokenKind::Import)?;
        let mut names = vec![self.parse_import_alias()?];
        while self.consume(&TokenKind::Comma) {
            names.push(self.parse_import_alias()?);
        }
        Ok(Stmt::ImportFrom {
            module,
            names,
            span: self.span_from(start),
        })
    }

    fn parse_import_alias(&mut self) -> Result<ImportAlias> {
        let start = self.current().span;
        let name = self.expect_ident()?;
        let asname = if self.consume(&TokenKind::As) {
            Some(self.expect_ident()?)
        } else {
            None
        };
        Ok(ImportAlias {
            name,
            asname,
            span: self.span_from(start),
        })
    }

    // ==================== Compound statements ====================

    fn parse_function_def(&mut self, decorators: Vec<Expr>) -> Result<Stmt> {
        let start = self.current().span;
        self.expect(TokenKind::Def)?;
        let name = self.expect_ident()?;

        self.expect(TokenKind::LParen)?;
        let params = self.parse_params()?;
        self.expect(TokenKind::RParen)?;

        let returns = if self.consume(&TokenKind::Arrow) {
            Some(self.parse_expression()?)
        } else {
            None
        };

        let body = self.parse_block()?;
        Ok(Stmt::FunctionDef {
            name,
            params,
            returns,
            body,
            decorators,
            span: self.span_from(start),
        })
    }

    fn parse_params(&mut self) -> Result<Vec<Param>> {
        let mut params = Vec::new();
        while !self.check(&TokenKind::RParen) && !self.is_at_end() {
            if self.check(&TokenKind::Star) || self.check(&TokenKind::DoubleStar) {
                return Err(self.invalid("starred parameters are not supported"));
            }
            let start = self.current().span;
            let name = self.expect_ident()?;
            let annotation = if self.consume(&TokenKind::Colon) {
                Some(self.parse_expression()?)
            } else {
                None
            };
            let default = if self.consume(&TokenKind::Eq) {
                Some(self.parse_expression()?)
            } else {
                None
            };
            params.push(Param {
                name,
                annotation,
                default,
                span: self.span_from(start),
            });
            if !self.consume(&TokenKind::Comma) {
                break;
            }
        }
        Ok(params)
    }

    fn parse_class_def(&mut self, decorators: Vec<Expr>) -> Result<Stmt> {
        let start = self.current().span;
        self.expect(TokenKind::Class)?;
        let name = self.expect_ident()?;

        let mut bases = Vec::new();
        if self.consume(&TokenKind::LParen) {
            while !self.check(&TokenKind::RParen) && !self.is_at_end() {
                bases.push(self.parse_expression()?);
                if !self.consume(&TokenKind::Comma) {
                    break;
                }
            }
            self.expect(TokenKind::RParen)?;
        }

        let body = self.parse_block()?;
        Ok(Stmt::ClassDef {
            name,
            bases,
            body,
            decorators,
            span: self.span_from(start),
        })
    }

    fn parse_if(&mut self) -> Result<Stmt> {
        let start = self.current().span;
        self.advance(); // `if` or `elif`
        let test = self.parse_expression()?;
        let body = self.parse_block()?;

        let orelse = if self.check(&TokenKind::Elif) {
            vec![self.parse_if()?]
        } else if self.consume(&TokenKind::Else) {
            self.parse_block()?
        } else {
            Vec::new()
        };

        Ok(Stmt::If {
            test,
            body,
            orelse,
            span: self.span_from(start),
        })
    }

    fn parse_while(&mut self) -> Result<Stmt> {
        let start = self.current().span;
        self.expect(TokenKind::While)?;
        let test = self.parse_expression()?;
        let body = self.parse_block()?;
        let orelse = if self.consume(&TokenKind::Else) {
            self.parse_block()?
        } else {
            Vec::new()
        };
        Ok(Stmt::While {
            test,
            body,
            orelse,
            span: self.span_from(start),
        })
    }

    fn parse_for(&mut self) -> Result<Stmt> {
        let start = self.current().span;
        self.expect(TokenKind::For)?;
        let target = self.parse_target_list()?;
        self.expect(TokenKind::In)?;
        let iter = self.parse_testlist()?;
        let body = self.parse_block()?;
        let orelse = if self.consume(&TokenKind::Else) {
            self.parse_block()?
        } else {
            Vec::new()
        };
        Ok(Stmt::For {
            target,
            iter,
            body,
            orelse,
            span: self.span_from(start),
        })
    }

    /// A `for` target: one or more comma-separated targets
    fn parse_target_list(&mut self) -> Result<Expr> {
        let start = self.current().span;
        let first = self.parse_postfix_target()?;
        if !self.check(&TokenKind::Comma) {
            return Ok(first);
        }
        let mut elts = vec![first];
        while self.consume(&TokenKind::Comma) {
            if self.check(&TokenKind::In) {
                break;
            }
            elts.push(self.parse_postfix_target()?);
        }
        Ok(Expr::Tuple {
            elts,
            span: self.span_from(start),
        })
    }

    fn parse_postfix_target(&mut self) -> Result<Expr> {
        let expr = self.parse_postfix_level()?;
        self.validate_target(&expr)?;
        Ok(expr)
    }

    /// Suite after a colon: inline simple statements or an indented block
    fn parse_block(&mut self) -> Result<Vec<Stmt>> {
        self.expect(TokenKind::Colon)?;

        if self.consume(&TokenKind::Newline) {
            self.expect(TokenKind::Indent)?;
            let mut stmts = Vec::new();
            while !self.check(&TokenKind::Dedent) && !self.is_at_end() {
                stmts.extend(self.parse_statement()?);
                self.skip_newlines();
            }
            self.expect(TokenKind::Dedent)?;
            Ok(stmts)
        } else {
            // Inline suite: `if x: y = 1; z = 2`
            self.parse_simple_stmt_line()
        }
    }

    // ==================== Expressions ====================

    fn at_expression_start(&self) -> bool {
        !matches!(
            self.current_kind(),
            TokenKind::Newline
                | TokenKind::Semicolon
                | TokenKind::Dedent
                | TokenKind::Eof
                | TokenKind::RParen
                | TokenKind::RBracket
                | TokenKind::RBrace
                | TokenKind::Colon
                | TokenKind::Comma
                | TokenKind::Eq
                | TokenKind::From
        )
    }

    /// Lowest level: lambda and the conditional expression
    pub fn parse_expression(&mut self) -> Result<Expr> {
        if self.check(&TokenKind::Lambda) {
            return self.parse_lambda();
        }

        let start = self.current().span;
        let body = self.parse_or_test()?;

        if self.consume(&TokenKind::If) {
            let test = self.parse_or_test()?;
            self.expect(TokenKind::Else)?;
            let orelse = self.parse_expression()?;
            return Ok(Expr::IfExp {
                test: Box::new(test),
                body: Box::new(body),
                orelse: Box::new(orelse),
                span: self.span_from(start),
            });
        }

        Ok(body)
    }

    fn parse_lambda(&mut self) -> Result<Expr> {
        let start = self.current().span;
        self.expect(TokenKind::Lambda)?;

        let mut params = Vec::new();
        while !self.check(&TokenKind::Colon) && !self.is_at_end() {
            let pstart = self.current().span;
            let name = self.expect_ident()?;
            let default = if self.consume(&TokenKind::Eq) {
                Some(self.parse_expression()?)
            } else {
                None
            };
            params.push(Param {
                name,
                annotation: None,
                default,
                span: self.span_from(pstart),
            });
            if !self.consume(&TokenKind::Comma) {
                break;
            }
        }
        self.expect(TokenKind::Colon)?;
        let body = self.parse_expression()?;
        Ok(Expr::Lambda {
            params,
            body: Box::new(body),
            span: self.span_from(start),
        })
    }

    /// `a := b` where the grammar allows it (parenthesized contexts, call
    /// arguments), otherwise a plain expression
    fn parse_namedexpr(&mut self) -> Result<Expr> {
        let start = self.current().span;
        let expr = self.parse_expression()?;
        if self.check(&TokenKind::ColonEq) {
            let name = match &expr {
                Expr::Name { id, .. } => id.clone(),
                _ => return Err(self.invalid("assignment expression target must be a name")),
            };
            self.advance();
            let value = self.parse_expression()?;
            return Ok(Expr::NamedExpr {
                name,
                value: Box::new(value),
                span: self.span_from(start),
            });
        }
        Ok(expr)
    }

    /// `or` chains fold left into one flat node
    fn parse_or_test(&mut self) -> Result<Expr> {
        let start = self.current().span;
        let first = self.parse_and_test()?;
        if !self.check(&TokenKind::Or) {
            return Ok(first);
        }
        let mut values = vec![first];
        while self.consume(&TokenKind::Or) {
            values.push(self.parse_and_test()?);
        }
        Ok(Expr::BoolOp {
            op: BoolOpKind::Or,
            values,
            span: self.span_from(start),
        })
    }

    /// `and` chains fold left into one flat node
    fn parse_and_test(&mut self) -> Result<Expr> {
        let start = self.current().span;
        let first = self.parse_not_test()?;
        if !self.check(&TokenKind::And) {
            return Ok(first);
        }
        let mut values = vec![first];
        while self.consume(&TokenKind::And) {
            values.push(self.parse_not_test()?);
        }
        Ok(Expr::BoolOp {
            op: BoolOpKind::And,
            values,
            span: self.span_from(start),
        })
    }

    fn parse_not_test(&mut self) -> Result<Expr> {
        if self.check(&TokenKind::Not) {
            let start = self.current().span;
            self.advance();
            let operand = self.parse_not_test()?;
            return Ok(Expr::UnaryOp {
                op: UnaryOp::Not,
                span: self.span_from(start),
                operand: Box::new(operand),
            });
        }
        self.parse_comparison()
    }

    /// Chained comparisons collect into one node: `a < b < c` has two
    /// operators and two comparators, not two nested binaries.
    fn parse_comparison(&mut self) -> Result<Expr> {
        let start = self.current().span;
        let left = self.parse_bitor()?;

        let mut ops = Vec::new();
        let mut comparators = Vec::new();
        loop {
            let op = match self.current_kind() {
                TokenKind::Lt => CmpOp::Lt,
                TokenKind::Gt => CmpOp::Gt,
                TokenKind::Le => CmpOp::LtE,
                TokenKind::Ge => CmpOp::GtE,
                TokenKind::EqEq => CmpOp::Eq,
                TokenKind::Ne => CmpOp::NotEq,
                TokenKind::In => CmpOp::In,
                TokenKind::Not => {
                    // Speculate: `not` here is only a comparison if `in`
                    // follows; otherwise retreat exactly one token.
                    self.advance();
                    if self.check(&TokenKind::In) {
                        self.advance();
                        ops.push(CmpOp::NotIn);
                        comparators.push(self.parse_bitor()?);
                        continue;
                    }
                    self.retreat();
                    break;
                }
                TokenKind::Is => {
                    self.advance();
                    if self.consume(&TokenKind::Not) {
                        ops.push(CmpOp::IsNot);
                    } else {
                        ops.push(CmpOp::Is);
                    }
                    comparators.push(self.parse_bitor()?);
                    continue;
                }
                _ => break,
            };
            self.advance();
            ops.push(op);
            comparators.push(self.parse_bitor()?);
        }

        if ops.is_empty() {
            return Ok(left);
        }
        debug_assert_eq!(ops.len(), comparators.len());
        Ok(Expr::Compare {
            left: Box::new(left),
            ops,
            comparators,
            span: self.span_from(start),
        })
    }

    fn parse_bitor(&mut self) -> Result<Expr> {
        let mut left = self.parse_bitxor()?;
        while self.check(&TokenKind::Pipe) {
            let start = left.span();
            self.advance();
            let right = self.parse_bitxor()?;
            left = binop(left, BinOp::BitOr, right, start);
        }
        Ok(left)
    }

    fn parse_bitxor(&mut self) -> Result<Expr> {
        let mut left = self.parse_bitand()?;
        while self.check(&TokenKind::Caret) {
            let start = left.span();
            self.advance();
            let right = self.parse_bitand()?;
            left = binop(left, BinOp::BitXor, right, start);
        }
        Ok(left)
    }

    fn parse_bitand(&mut self) -> Result<Expr> {
        let mut left = self.parse_shift()?;
        while self.check(&TokenKind::Amp) {
            let start = left.span();
            self.advance();
            let right = self.parse_shift()?;
            left = binop(left, BinOp::BitAnd, right, start);
        }
        Ok(left)
    }

    fn parse_shift(&mut self) -> Result<Expr> {
        let mut left = self.parse_arith()?;
        loop {
            let op = match self.current_kind() {
                TokenKind::Shl => BinOp::LShift,
                TokenKind::Shr => BinOp::RShift,
                _ => break,
            };
            let start = left.span();
            self.advance();
            let right = self.parse_arith()?;
            left = binop(left, op, right, start);
        }
        Ok(left)
    }

    fn parse_arith(&mut self) -> Result<Expr> {
        let mut left = self.parse_term()?;
        loop {
            let op = match self.current_kind() {
                TokenKind::Plus => BinOp::Add,
                TokenKind::Minus => BinOp::Sub,
                _ => break,
            };
            let start = left.span();
            self.advance();
            let right = self.parse_term()?;
            left = binop(left, op, right, start);
        }
        Ok(left)
    }

    fn parse_term(&mut self) -> Result<Expr> {
        let mut left = self.parse_factor()?;
        loop {
            let op = match self.current_kind() {
                TokenKind::Star => BinOp::Mult,
                TokenKind::Slash => BinOp::Div,
                TokenKind::DoubleSlash => BinOp::FloorDiv,
                TokenKind::Percent => BinOp::Mod,
                TokenKind::At => BinOp::MatMult,
                _ => break,
            };
            let start = left.span();
            self.advance();
            let right = self.parse_factor()?;
            left = binop(left, op, right, start);
        }
        Ok(left)
    }

    /// Unary `+ - ~`, right-recursive so `--x` and `-~x` parse
    fn parse_factor(&mut self) -> Result<Expr> {
        let op = match self.current_kind() {
            TokenKind::Plus => Some(UnaryOp::UAdd),
            TokenKind::Minus => Some(UnaryOp::USub),
            TokenKind::Tilde => Some(UnaryOp::Invert),
            _ => None,
        };
        if let Some(op) = op {
            let start = self.current().span;
            self.advance();
            let operand = self.parse_factor()?;
            return Ok(Expr::UnaryOp {
                op,
                span: self.span_from(start),
                operand: Box::new(operand),
            });
        }
        self.parse_power()
    }

    /// `**` is right-associative: the right operand is a factor, so
    /// `2 ** 3 ** 2` groups as `2 ** (3 ** 2)` and `-2 ** 3` as `-(2 ** 3)`.
    fn parse_power(&mut self) -> Result<Expr> {
        let base = self.parse_postfix_level()?;
        if self.check(&TokenKind::DoubleStar) {
            let start = base.span();
            self.advance();
            let right = self.parse_factor()?;
            return Ok(binop(base, BinOp::Pow, right, start));
        }
        Ok(base)
    }

    /// Postfix: calls, subscripts, attribute access
    fn parse_postfix_level(&mut self) -> Result<Expr> {
        let mut expr = self.parse_atom()?;

        loop {
            if self.consume(&TokenKind::LParen) {
                let (args, keywords) = self.parse_call_args()?;
                self.expect(TokenKind::RParen)?;
                expr = Expr::Call {
                    span: self.span_from(expr.span()),
                    func: Box::new(expr),
                    args,
                    keywords,
                };
            } else if self.consume(&TokenKind::LBracket) {
                let index = self.parse_subscript_index()?;
                self.expect(TokenKind::RBracket)?;
                expr = Expr::Subscript {
                    span: self.span_from(expr.span()),
                    value: Box::new(expr),
                    index: Box::new(index),
                };
            } else if self.consume(&TokenKind::Dot) {
                let attr = self.expect_ident()?;
                expr = Expr::Attribute {
                    span: self.span_from(expr.span()),
                    value: Box::new(expr),
                    attr,
                };
            } else {
                break;
            }
        }
        Ok(expr)
    }

    fn parse_call_args(&mut self) -> Result<(Vec<Expr>, Vec<Keyword>)> {
        let mut args = Vec::new();
        let mut keywords = Vec::new();

        while !self.check(&TokenKind::RParen) && !self.is_at_end() {
            if self.consume(&TokenKind::DoubleStar) {
                let value = self.parse_expression()?;
                keywords.push(Keyword { arg: None, value });
            } else if self.check(&TokenKind::Star) {
                let start = self.current().span;
                self.advance();
                let value = self.parse_expression()?;
                args.push(Expr::Starred {
                    span: self.span_from(start),
                    value: Box::new(value),
                });
            } else if self.at_keyword_argument() {
                let arg = self.expect_ident()?;
                self.expect(TokenKind::Eq)?;
                let value = self.parse_expression()?;
                keywords.push(Keyword {
                    arg: Some(arg),
                    value,
                });
            } else {
                let value = self.parse_namedexpr()?;
                // Bare generator argument: `f(x for x in xs)`
                if self.check(&TokenKind::For) && args.is_empty() && keywords.is_empty() {
                    let generators = self.parse_comprehension_clauses()?;
                    let span = self.span_from(value.span());
                    args.push(Expr::GeneratorExp {
                        elt: Box::new(value),
                        generators,
                        span,
                    });
                    return Ok((args, keywords));
                }
                args.push(value);
            }
            if !self.consume(&TokenKind::Comma) {
                break;
            }
        }
        Ok((args, keywords))
    }

    fn at_keyword_argument(&self) -> bool {
        matches!(self.current_kind(), TokenKind::Ident(_))
            && matches!(
                self.tokens.get(self.pos + 1).map(|t| &t.kind),
                Some(TokenKind::Eq)
            )
    }

    fn parse_subscript_index(&mut self) -> Result<Expr> {
        let start = self.current().span;
        let first = self.parse_slice_item()?;

        if !self.check(&TokenKind::Comma) {
            return Ok(first);
        }
        let mut elts = vec![first];
        while self.consume(&TokenKind::Comma) {
            if self.check(&TokenKind::RBracket) {
                break;
            }
            elts.push(self.parse_slice_item()?);
        }
        Ok(Expr::Tuple {
            elts,
            span: self.span_from(start),
        })
    }

    /// `lower:upper:step` with every part optional, or a plain index
    fn parse_slice_item(&mut self) -> Result<Expr> {
        let start = self.current().span;
        let lower = if self.check(&TokenKind::Colon) {
            None
        } else {
            Some(self.parse_expression()?)
        };

        if !self.consume(&TokenKind::Colon) {
            return lower.ok_or_else(|| self.invalid("expected subscript expression"));
        }

        let upper = if self.check(&TokenKind::Colon)
            || self.check(&TokenKind::RBracket)
            || self.check(&TokenKind::Comma)
        {
            None
        } else {
            Some(self.parse_expression()?)
        };

        let step = if self.consume(&TokenKind::Colon) {
            if self.check(&TokenKind::RBracket) || self.check(&TokenKind::Comma) {
                None
            } else {
                Some(self.parse_expression()?)
            }
        } else {
            None
        };

        Ok(Expr::Slice {
            lower: lower.map(Box::new),
            upper: upper.map(Box::new),
            step: step.map(Box::new),
            span: self.span_from(start),
        })
    }

    /// A testlist: `a, b, c` builds a tuple without parentheses
    fn parse_testlist(&mut self) -> Result<Expr> {
        let start = self.current().span;
        let first = if self.check(&TokenKind::Star) {
            self.parse_starred()?
        } else {
            self.parse_expression()?
        };
        if !self.check(&TokenKind::Comma) {
            return Ok(first);
        }

        let mut elts = vec![first];
        while self.consume(&TokenKind::Comma) {
            if !self.at_expression_start() && !self.check(&TokenKind::Star) {
                break;
            }
            if self.check(&TokenKind::Star) {
                elts.push(self.parse_starred()?);
            } else {
                elts.push(self.parse_expression()?);
            }
        }
        Ok(Expr::Tuple {
            elts,
            span: self.span_from(start),
        })
    }

    fn parse_starred(&mut self) -> Result<Expr> {
        let start = self.current().span;
        self.expect(TokenKind::Star)?;
        let value = self.parse_expression()?;
        Ok(Expr::Starred {
            span: self.span_from(start),
            value: Box::new(value),
        })
    }

    // ==================== Atoms ====================

    fn parse_atom(&mut self) -> Result<Expr> {
        let token = self.current().clone();
        let span = token.span;

        match &token.kind {
            TokenKind::Number(lexeme) => {
                self.advance();
                let value = parse_number_lexeme(lexeme, token.pos)?;
                Ok(Expr::Constant { value, span })
            }
            TokenKind::ComplexNumber(lexeme) => {
                self.advance();
                let imag = parse_complex_lexeme(lexeme, token.pos)?;
                Ok(Expr::Constant {
                    value: Constant::Complex(imag),
                    span,
                })
            }
            TokenKind::Str(_) => self.parse_string_atom(),
            TokenKind::FString(_) => self.parse_fstring_atom(),
            TokenKind::True => {
                self.advance();
                Ok(Expr::Constant {
                    value: Constant::Bool(true),
                    span,
                })
            }
            TokenKind::False => {
                self.advance();
                Ok(Expr::Constant {
                    value: Constant::Bool(false),
                    span,
                })
            }
            TokenKind::None => {
                self.advance();
                Ok(Expr::Constant {
                    value: Constant::None,
                    span,
                })
            }
            TokenKind::Ellipsis => {
                self.advance();
                Ok(Expr::Constant {
                    value: Constant::Ellipsis,
                    span,
                })
            }
            TokenKind::Ident(name) => {
                let id = name.clone();
                self.advance();
                Ok(Expr::Name { id, span })
            }
            TokenKind::Lambda => self.parse_lambda(),
            TokenKind::LParen => self.parse_paren_atom(),
            TokenKind::LBracket => self.parse_list_atom(),
            TokenKind::LBrace => self.parse_brace_atom(),
            TokenKind::Eof => Err(ParseError::UnexpectedEof { pos: token.pos }),
            other => Err(ParseError::UnexpectedToken {
                expected: "expression".to_string(),
                got: other.describe(),
                pos: token.pos,
            }),
        }
    }

    /// Adjacent plain string literals concatenate: `"a" "b"` is `"ab"`
    fn parse_string_atom(&mut self) -> Result<Expr> {
        let start = self.current().span;
        let mut text = String::new();
        let mut bytes_mode: Option<bool> = None;

        while let TokenKind::Str(lit) = self.current_kind().clone() {
            match bytes_mode {
                Some(mode) if mode != lit.bytes => {
                    return Err(self.invalid("cannot mix bytes and str literals"));
                }
                None => bytes_mode = Some(lit.bytes),
                _ => {}
            }
            let decoded = if lit.raw {
                lit.body.clone()
            } else {
                decode_escapes(&lit.body)
            };
            text.push_str(&decoded);
            self.advance();
        }

        let value = if bytes_mode == Some(true) {
            Constant::Bytes(text.into_bytes())
        } else {
            Constant::Str(text)
        };
        Ok(Expr::Constant {
            value,
            span: self.span_from(start),
        })
    }

    /// Re-parse each embedded expression of an f-string
    fn parse_fstring_atom(&mut self) -> Result<Expr> {
        let token = self.advance();
        let span = token.span;
        let TokenKind::FString(parts) = token.kind else {
            return Err(self.invalid("expected f-string"));
        };

        let mut elems = Vec::new();
        for part in parts {
            match part {
                FStringPart::Literal(text) => {
                    elems.push(FStringElem::Literal(decode_escapes(&text)));
                }
                FStringPart::Expr {
                    source,
                    conversion,
                    format_spec,
                } => {
                    let value = parse_embedded_expression(&source, token.pos)?;
                    elems.push(FStringElem::Expr {
                        value: Box::new(value),
                        conversion,
                        format_spec,
                    });
                }
            }
        }
        Ok(Expr::FString { parts: elems, span })
    }

    fn parse_paren_atom(&mut self) -> Result<Expr> {
        let start = self.current().span;
        self.expect(TokenKind::LParen)?;

        if self.consume(&TokenKind::RParen) {
            return Ok(Expr::Tuple {
                elts: Vec::new(),
                span: self.span_from(start),
            });
        }

        let first = if self.check(&TokenKind::Star) {
            self.parse_starred()?
        } else {
            self.parse_namedexpr()?
        };

        // Generator expression
        if self.check(&TokenKind::For) {
            let generators = self.parse_comprehension_clauses()?;
            self.expect(TokenKind::RParen)?;
            return Ok(Expr::GeneratorExp {
                elt: Box::new(first),
                generators,
                span: self.span_from(start),
            });
        }

        // Tuple display
        if self.check(&TokenKind::Comma) {
            let mut elts = vec![first];
            while self.consume(&TokenKind::Comma) {
                if self.check(&TokenKind::RParen) {
                    break;
                }
                if self.check(&TokenKind::Star) {
                    elts.push(self.parse_starred()?);
                } else {
                    elts.push(self.parse_namedexpr()?);
                }
            }
            self.expect(TokenKind::RParen)?;
            return Ok(Expr::Tuple {
                elts,
                span: self.span_from(start),
            });
        }

        self.expect(TokenKind::RParen)?;
        Ok(first)
    }

    fn parse_list_atom(&mut self) -> Result<Expr> {
        let start = self.current().span;
        self.expect(TokenKind::LBracket)?;

        if self.consume(&TokenKind::RBracket) {
            return Ok(Expr::List {
                elts: Vec::new(),
                span: self.span_from(start),
            });
        }

        let first = if self.check(&TokenKind::Star) {
            self.parse_starred()?
        } else {
            self.parse_namedexpr()?
        };

        if self.check(&TokenKind::For) {
            let generators = self.parse_comprehension_clauses()?;
            self.expect(TokenKind::RBracket)?;
            return Ok(Expr::ListComp {
                elt: Box::new(first),
                generators,
                span: self.span_from(start),
            });
        }

        let mut elts = vec![first];
        while self.consume(&TokenKind::Comma) {
            if self.check(&TokenKind::RBracket) {
                break;
            }
            if self.check(&TokenKind::Star) {
                elts.push(self.parse_starred()?);
            } else {
                elts.push(self.parse_namedexpr()?);
            }
        }
        self.expect(TokenKind::RBracket)?;
        Ok(Expr::List {
            elts,
            span: self.span_from(start),
        })
    }

    fn parse_brace_atom(&mut self) -> Result<Expr> {
        let start = self.current().span;
        self.expect(TokenKind::LBrace)?;

        if self.consume(&TokenKind::RBrace) {
            return Ok(Expr::Dict {
                keys: Vec::new(),
                values: Vec::new(),
                span: self.span_from(start),
            });
        }

        // `**mapping` can only start a dict display
        if self.consume(&TokenKind::DoubleStar) {
            let value = self.parse_expression()?;
            let mut keys = vec![None];
            let mut values = vec![value];
            while self.consume(&TokenKind::Comma) {
                if self.check(&TokenKind::RBrace) {
                    break;
                }
                self.parse_dict_entry(&mut keys, &mut values)?;
            }
            self.expect(TokenKind::RBrace)?;
            return Ok(Expr::Dict {
                keys,
                values,
                span: self.span_from(start),
            });
        }

        let first = self.parse_expression()?;

        if self.consume(&TokenKind::Colon) {
            let first_value = self.parse_expression()?;

            if self.check(&TokenKind::For) {
                let generators = self.parse_comprehension_clauses()?;
                self.expect(TokenKind::RBrace)?;
                return Ok(Expr::DictComp {
                    key: Box::new(first),
                    value: Box::new(first_value),
                    generators,
                    span: self.span_from(start),
                });
            }

            let mut keys = vec![Some(first)];
            let mut values = vec![first_value];
            while self.consume(&TokenKind::Comma) {
                if self.check(&TokenKind::RBrace) {
                    break;
                }
                self.parse_dict_entry(&mut keys, &mut values)?;
            }
            self.expect(TokenKind::RBrace)?;
            return Ok(Expr::Dict {
                keys,
                values,
                span: self.span_from(start),
            });
        }

        if self.check(&TokenKind::For) {
            let generators = self.parse_comprehension_clauses()?;
            self.expect(TokenKind::RBrace)?;
            return Ok(Expr::SetComp {
                elt: Box::new(first),
                generators,
                span: self.span_from(start),
            });
        }

        let mut elts = vec![first];
        while self.consume(&TokenKind::Comma) {
            if self.check(&TokenKind::RBrace) {
                break;
            }
            elts.push(self.parse_expression()?);
        }
        self.expect(TokenKind::RBrace)?;
        Ok(Expr::Set {
            elts,
            span: self.span_from(start),
        })
    }

    fn parse_dict_entry(
        &mut self,
        keys: &mut Vec<Option<Expr>>,
        values: &mut Vec<Expr>,
    ) -> Result<()> {
        if self.consume(&TokenKind::DoubleStar) {
            keys.push(None);
            values.push(self.parse_expression()?);
            return Ok(());
        }
        let key = self.parse_expression()?;
        self.expect(TokenKind::Colon)?;
        let value = self.parse_expression()?;
        keys.push(Some(key));
        values.push(value);
        Ok(())
    }

    fn parse_comprehension_clauses(&mut self) -> Result<Vec<Comprehension>> {
        let mut generators = Vec::new();
        while self.consume(&TokenKind::For) {
            let target = self.parse_target_list()?;
            self.expect(TokenKind::In)?;
            let iter = self.parse_or_test()?;
            let mut ifs = Vec::new();
            while self.consume(&TokenKind::If) {
                ifs.push(self.parse_or_test()?);
            }
            generators.push(Comprehension { target, iter, ifs });
        }
        Ok(generators)
    }
}

fn binop(left: Expr, op: BinOp, right: Expr, start: Span) -> Expr {
    let span = start.merge(&right.span());
    Expr::BinOp {
        left: Box::new(left),
        op,
        right: Box::new(right),
        span,
    }
}

fn aug_assign_op(kind: &TokenKind) -> BinOp {
    match kind {
        TokenKind::PlusEq => BinOp::Add,
        TokenKind::MinusEq => BinOp::Sub,
        TokenKind::StarEq => BinOp::Mult,
        TokenKind::SlashEq => BinOp::Div,
        TokenKind::DoubleSlashEq => BinOp::FloorDiv,
        TokenKind::PercentEq => BinOp::Mod,
        TokenKind::AtEq => BinOp::MatMult,
        TokenKind::AmpEq => BinOp::BitAnd,
        TokenKind::PipeEq => BinOp::BitOr,
        TokenKind::CaretEq => BinOp::BitXor,
        TokenKind::ShlEq => BinOp::LShift,
        TokenKind::ShrEq => BinOp::RShift,
        TokenKind::DoubleStarEq => BinOp::Pow,
        _ => unreachable!("checked by is_aug_assign"),
    }
}

/// Parse a numeric lexeme into a value; the lexeme text is the source of
/// truth and separators are stripped only here.
fn parse_number_lexeme(lexeme: &str, pos: Pos) -> Result<Constant> {
    let clean: String = lexeme.chars().filter(|c| *c != '_').collect();
    let invalid = || ParseError::InvalidSyntax {
        message: format!("invalid numeric literal '{lexeme}'"),
        pos,
    };

    if let Some(rest) = clean.strip_prefix("0x").or_else(|| clean.strip_prefix("0X")) {
        return i64::from_str_radix(rest, 16)
            .map(Constant::Int)
            .map_err(|_| invalid());
    }
    if let Some(rest) = clean.strip_prefix("0o").or_else(|| clean.strip_prefix("0O")) {
        return i64::from_str_radix(rest, 8)
            .map(Constant::Int)
            .map_err(|_| invalid());
    }
    if let Some(rest) = clean.strip_prefix("0b").or_else(|| clean.strip_prefix("0B")) {
        return i64::from_str_radix(rest, 2)
            .map(Constant::Int)
            .map_err(|_| invalid());
    }
    if clean.contains('.') || clean.contains('e') || clean.contains('E') {
        return clean.parse::<f64>().map(Constant::Float).map_err(|_| invalid());
    }
    clean.parse::<i64>().map(Constant::Int).map_err(|_| invalid())
}

fn parse_complex_lexeme(lexeme: &str, pos: Pos) -> Result<f64> {
    let body: String = lexeme
        .chars()
        .filter(|c| *c != '_')
        .take_while(|c| *c != 'j' && *c != 'J')
        .collect();
    body.parse::<f64>().map_err(|_| ParseError::InvalidSyntax {
        message: format!("invalid complex literal '{lexeme}'"),
        pos,
    })
}

/// Decode backslash escapes the lexer carried verbatim
fn decode_escapes(body: &str) -> String {
    let mut out = String::with_capacity(body.len());
    let mut chars = body.chars();
    while let Some(c) = chars.next() {
        if c != '\\' {
            out.push(c);
            continue;
        }
        match chars.next() {
            Some('n') => out.push('\n'),
            Some('t') => out.push('\t'),
            Some('r') => out.push('\r'),
            Some('\\') => out.push('\\'),
            Some('\'') => out.push('\''),
            Some('"') => out.push('"'),
            Some('0') => out.push('\0'),
            Some('a') => out.push('\x07'),
            Some('b') => out.push('\x08'),
            Some('f') => out.push('\x0c'),
            Some('v') => out.push('\x0b'),
            Some('\n') => {} // line continuation inside a string
            Some('x') => {
                let hi = chars.next();
                let lo = chars.next();
                let byte = match (hi, lo) {
                    (Some(h), Some(l)) => u8::from_str_radix(&format!("{h}{l}"), 16).ok(),
                    _ => None,
                };
                match byte {
                    Some(b) => out.push(b as char),
                    None => out.push_str("\\x"),
                }
            }
            Some(other) => {
                // Unknown escape: keep it as written
                out.push('\\');
                out.push(other);
            }
            None => out.push('\\'),
        }
    }
    out
}

/// Lex and parse one embedded f-string expression
fn parse_embedded_expression(source: &str, pos: Pos) -> Result<Expr> {
    let tokens = lexer::tokenize(source.as_bytes()).map_err(|e| ParseError::InvalidSyntax {
        message: format!("invalid expression in f-string: {e}"),
        pos,
    })?;
    let mut parser = Parser::new(tokens);
    let expr = parser.parse_expression()?;
    parser.skip_newlines();
    if !parser.is_at_end() {
        return Err(ParseError::InvalidSyntax {
            message: "trailing tokens in f-string expression".to_string(),
            pos,
        });
    }
    Ok(expr)
}

impl Span {
    fn start_pos_or(&self, fallback: Pos) -> Pos {
        // Spans carry byte offsets only; reuse the caller's position for
        // line/column and keep the span's offset.
        Pos::new(self.start, fallback.line, fallback.col)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::frontend::lexer::tokenize;
    use pretty_assertions::assert_eq;

    fn parse_source(source: &str) -> Module {
        parse(tokenize(source.as_bytes()).unwrap()).unwrap()
    }

    fn parse_expr(source: &str) -> Expr {
        let module = parse_source(source);
        match module.body.into_iter().next() {
            Some(Stmt::Expr { value, .. }) => value,
            other => panic!("expected expression statement, got {other:?}"),
        }
    }

    #[test]
    fn test_power_is_right_associative_and_binds_tighter_than_unary() {
        // -2 ** 3 ** 2 parses as -(2 ** (3 ** 2))
        let expr = parse_expr("-2 ** 3 ** 2\n");
        let Expr::UnaryOp { op: UnaryOp::USub, operand, .. } = expr else {
            panic!("expected unary minus at the top");
        };
        let Expr::BinOp { op: BinOp::Pow, right, .. } = *operand else {
            panic!("expected power under the minus");
        };
        let Expr::BinOp { op: BinOp::Pow, left, right: innermost, .. } = *right else {
            panic!("expected nested power on the right");
        };
        assert!(matches!(*left, Expr::Constant { value: Constant::Int(3), .. }));
        assert!(matches!(*innermost, Expr::Constant { value: Constant::Int(2), .. }));
    }

    #[test]
    fn test_power_right_operand_may_be_unary() {
        let expr = parse_expr("2 ** -3\n");
        let Expr::BinOp { op: BinOp::Pow, right, .. } = expr else {
            panic!("expected power");
        };
        assert!(matches!(*right, Expr::UnaryOp { op: UnaryOp::USub, .. }));
    }

    #[test]
    fn test_multiplication_binds_tighter_than_addition() {
        let expr = parse_expr("1 + 2 * 3\n");
        let Expr::BinOp { op: BinOp::Add, left, right, .. } = expr else {
            panic!("expected addition at the top");
        };
        assert!(matches!(*left, Expr::Constant { value: Constant::Int(1), .. }));
        assert!(matches!(*right, Expr::BinOp { op: BinOp::Mult, .. }));
    }

    #[test]
    fn test_chained_comparison_is_one_flat_node() {
        let expr = parse_expr("a < b < c\n");
        let Expr::Compare { ops, comparators, .. } = expr else {
            panic!("expected comparison");
        };
        assert_eq!(ops, vec![CmpOp::Lt, CmpOp::Lt]);
        assert_eq!(comparators.len(), 2);
    }

    #[test]
    fn test_boolean_or_folds_flat() {
        let expr = parse_expr("a or b or c\n");
        let Expr::BoolOp { op: BoolOpKind::Or, values, .. } = expr else {
            panic!("expected boolean or");
        };
        assert_eq!(values.len(), 3);
        let names: Vec<_> = values
            .iter()
            .map(|v| match v {
                Expr::Name { id, .. } => id.clone(),
                other => panic!("expected name, got {other:?}"),
            })
            .collect();
        assert_eq!(names, vec!["a", "b", "c"]);
    }

    #[test]
    fn test_not_in_and_is_not() {
        let expr = parse_expr("a not in b\n");
        let Expr::Compare { ops, .. } = expr else { panic!("expected comparison") };
        assert_eq!(ops, vec![CmpOp::NotIn]);

        let expr = parse_expr("a is not b\n");
        let Expr::Compare { ops, .. } = expr else { panic!("expected comparison") };
        assert_eq!(ops, vec![CmpOp::IsNot]);
    }

    #[test]
    fn test_not_rollback_preserves_token() {
        // `a not b` is invalid; the retreated `not` must surface in the error
        let err = parse(tokenize(b"a not b\n").unwrap()).unwrap_err();
        assert!(matches!(err, ParseError::UnexpectedToken { .. }));
    }

    #[test]
    fn test_number_attribute_call() {
        let expr = parse_expr("1.bit_length()\n");
        let Expr::Call { func, .. } = expr else { panic!("expected call") };
        let Expr::Attribute { value, attr, .. } = *func else {
            panic!("expected attribute access");
        };
        assert_eq!(attr, "bit_length");
        assert!(matches!(*value, Expr::Constant { value: Constant::Int(1), .. }));
    }

    #[test]
    fn test_numeric_values() {
        assert!(matches!(
            parse_expr("0xFF_FF\n"),
            Expr::Constant { value: Constant::Int(0xFFFF), .. }
        ));
        assert!(matches!(
            parse_expr("1_000_000\n"),
            Expr::Constant { value: Constant::Int(1_000_000), .. }
        ));
        let Expr::Constant { value: Constant::Float(f), .. } = parse_expr(".5\n") else {
            panic!("expected float");
        };
        assert_eq!(f, 0.5);
        let Expr::Constant { value: Constant::Complex(i), .. } = parse_expr("3j\n") else {
            panic!("expected complex");
        };
        assert_eq!(i, 3.0);
    }

    #[test]
    fn test_chained_assignment() {
        let module = parse_source("a = b = 1\n");
        let Stmt::Assign { targets, value, .. } = &module.body[0] else {
            panic!("expected assignment");
        };
        assert_eq!(targets.len(), 2);
        assert!(matches!(value, Expr::Constant { value: Constant::Int(1), .. }));
    }

    #[test]
    fn test_aug_and_annotated_assignment() {
        let module = parse_source("x += 1\ny: int = 2\n");
        assert!(matches!(&module.body[0], Stmt::AugAssign { op: BinOp::Add, .. }));
        assert!(matches!(&module.body[1], Stmt::AnnAssign { value: Some(_), .. }));
    }

    #[test]
    fn test_tuple_assignment() {
        let module = parse_source("a, b = 1, 2\n");
        let Stmt::Assign { targets, value, .. } = &module.body[0] else {
            panic!("expected assignment");
        };
        assert!(matches!(targets[0], Expr::Tuple { .. }));
        assert!(matches!(value, Expr::Tuple { .. }));
    }

    #[test]
    fn test_function_def() {
        let module = parse_source("def add(a: int, b: int = 0) -> int:\n    return a + b\n");
        let Stmt::FunctionDef { name, params, returns, body, .. } = &module.body[0] else {
            panic!("expected function definition");
        };
        assert_eq!(name, "add");
        assert_eq!(params.len(), 2);
        assert!(params[0].annotation.is_some());
        assert!(params[1].default.is_some());
        assert!(returns.is_some());
        assert_eq!(body.len(), 1);
    }

    #[test]
    fn test_class_def_with_base() {
        let module = parse_source(
            "class Dog(Animal):\n    def speak(self):\n        return 1\n",
        );
        let Stmt::ClassDef { name, bases, body, .. } = &module.body[0] else {
            panic!("expected class definition");
        };
        assert_eq!(name, "Dog");
        assert_eq!(bases.len(), 1);
        assert_eq!(body.len(), 1);
    }

    #[test]
    fn test_if_elif_else() {
        let module = parse_source("if a:\n    x = 1\nelif b:\n    x = 2\nelse:\n    x = 3\n");
        let Stmt::If { orelse, .. } = &module.body[0] else { panic!("expected if") };
        let Stmt::If { orelse: inner, .. } = &orelse[0] else { panic!("expected elif") };
        assert_eq!(inner.len(), 1);
    }

    #[test]
    fn test_for_else() {
        let module = parse_source("for i in xs:\n    f(i)\nelse:\n    g()\n");
        let Stmt::For { orelse, .. } = &module.body[0] else { panic!("expected for") };
        assert_eq!(orelse.len(), 1);
    }

    #[test]
    fn test_imports() {
        let module = parse_source("import mymath\nfrom os import path as p\n");
        assert!(matches!(&module.body[0], Stmt::Import { .. }));
        let Stmt::ImportFrom { module: m, names, .. } = &module.body[1] else {
            panic!("expected from-import");
        };
        assert_eq!(m, "os");
        assert_eq!(names[0].asname.as_deref(), Some("p"));
    }

    #[test]
    fn test_list_comprehension() {
        let expr = parse_expr("[x * 2 for x in xs if x > 0]\n");
        let Expr::ListComp { generators, .. } = expr else {
            panic!("expected list comprehension");
        };
        assert_eq!(generators.len(), 1);
        assert_eq!(generators[0].ifs.len(), 1);
    }

    #[test]
    fn test_dict_literal_and_comprehension() {
        let expr = parse_expr("{'a': 1, 'b': 2}\n");
        let Expr::Dict { keys, values, .. } = expr else { panic!("expected dict") };
        assert_eq!(keys.len(), 2);
        assert_eq!(values.len(), 2);

        let expr = parse_expr("{k: v for k, v in items}\n");
        assert!(matches!(expr, Expr::DictComp { .. }));
    }

    #[test]
    fn test_slice() {
        let expr = parse_expr("xs[1:10:2]\n");
        let Expr::Subscript { index, .. } = expr else { panic!("expected subscript") };
        let Expr::Slice { lower, upper, step, .. } = *index else {
            panic!("expected slice");
        };
        assert!(lower.is_some() && upper.is_some() && step.is_some());
    }

    #[test]
    fn test_call_with_keywords() {
        let expr = parse_expr("f(1, x=2, *rest, **extra)\n");
        let Expr::Call { args, keywords, .. } = expr else { panic!("expected call") };
        assert_eq!(args.len(), 2);
        assert!(matches!(args[1], Expr::Starred { .. }));
        assert_eq!(keywords.len(), 2);
        assert_eq!(keywords[0].arg.as_deref(), Some("x"));
        assert!(keywords[1].arg.is_none());
    }

    #[test]
    fn test_ternary_and_lambda() {
        let expr = parse_expr("a if c else b\n");
        assert!(matches!(expr, Expr::IfExp { .. }));
        let expr = parse_expr("lambda x, y=1: x + y\n");
        let Expr::Lambda { params, .. } = expr else { panic!("expected lambda") };
        assert_eq!(params.len(), 2);
    }

    #[test]
    fn test_fstring_embedded_expression_reparsed() {
        let expr = parse_expr("f\"total: {a + b:>10}\"\n");
        let Expr::FString { parts, .. } = expr else { panic!("expected f-string") };
        assert_eq!(parts.len(), 2);
        let FStringElem::Expr { value, format_spec, .. } = &parts[1] else {
            panic!("expected expression part");
        };
        assert!(matches!(**value, Expr::BinOp { op: BinOp::Add, .. }));
        assert_eq!(format_spec.as_deref(), Some(">10"));
    }

    #[test]
    fn test_string_concatenation() {
        let expr = parse_expr("\"a\" \"b\"\n");
        assert!(matches!(expr, Expr::Constant { value: Constant::Str(s), .. } if s == "ab"));
    }

    #[test]
    fn test_parse_error_reports_position() {
        let err = parse(tokenize(b"def f(:\n").unwrap()).unwrap_err();
        match err {
            ParseError::UnexpectedToken { pos, .. } => assert_eq!(pos.line, 1),
            other => panic!("expected UnexpectedToken, got {other:?}"),
        }
    }

    #[test]
    fn test_unexpected_eof() {
        let err = parse(tokenize(b"x = (1 +\n").unwrap()).unwrap_err();
        assert!(matches!(err, ParseError::UnexpectedEof { .. }));
    }

    #[test]
    fn test_walrus_in_parens() {
        let expr = parse_expr("(n := 10)\n");
        let Expr::NamedExpr { name, .. } = expr else { panic!("expected named expression") };
        assert_eq!(name, "n");
    }

    #[test]
    fn test_semicolon_separated_statements() {
        let module = parse_source("x = 1; y = 2\n");
        assert_eq!(module.body.len(), 2);
    }

    #[test]
    fn test_inline_suite() {
        let module = parse_source("if x: y = 1\n");
        let Stmt::If { body, .. } = &module.body[0] else { panic!("expected if") };
        assert_eq!(body.len(), 1);
    }
}
