//! Lexer for Python source
//!
//! Converts source bytes into a complete token sequence. The whole file is
//! tokenized before parsing begins; indentation becomes explicit
//! Indent/Dedent tokens, and numeric lexemes are carried verbatim so that
//! every literal round-trips through its source text.

use crate::frontend::token::{FStringPart, StringLit, Token, TokenKind};
use crate::utils::{LexError, Pos, Span};

/// The lexer state
pub struct Lexer {
    /// Source code bytes
    src: Vec<u8>,
    /// Current position in source
    pos: usize,
    /// 1-based line of `pos`
    line: usize,
    /// 1-based column of `pos`
    col: usize,
    /// Start position of the current token
    start: usize,
    start_pos: Pos,
    /// Open `(`/`[`/`{` count; newlines are implicit-joined while nonzero
    bracket_depth: usize,
    /// Indentation stack, in columns
    indents: Vec<usize>,
    tokens: Vec<Token>,
}

/// Tokenize a whole source buffer
pub fn tokenize(source: &[u8]) -> Result<Vec<Token>, LexError> {
    Lexer::new(source).run()
}

impl Lexer {
    pub fn new(source: &[u8]) -> Self {
        Self {
            src: source.to_vec(),
            pos: 0,
            line: 1,
            col: 1,
            start: 0,
            start_pos: Pos::start(),
            bracket_depth: 0,
            indents: vec![0],
            tokens: Vec::new(),
        }
    }

    // ==================== Cursor primitives ====================

    fn peek(&self) -> Option<u8> {
        self.src.get(self.pos).copied()
    }

    fn peek_next(&self) -> Option<u8> {
        self.src.get(self.pos + 1).copied()
    }

    fn peek_at(&self, off: usize) -> Option<u8> {
        self.src.get(self.pos + off).copied()
    }

    fn advance(&mut self) -> Option<u8> {
        let c = self.peek();
        if let Some(b) = c {
            self.pos += 1;
            if b == b'\n' {
                self.line += 1;
                self.col = 1;
            } else {
                self.col += 1;
            }
        }
        c
    }

    fn is_at_end(&self) -> bool {
        self.pos >= self.src.len()
    }

    fn current_pos(&self) -> Pos {
        Pos::new(self.pos, self.line, self.col)
    }

    fn mark_start(&mut self) {
        self.start = self.pos;
        self.start_pos = self.current_pos();
    }

    fn lexeme(&self) -> String {
        String::from_utf8_lossy(&self.src[self.start..self.pos]).into_owned()
    }

    fn push(&mut self, kind: TokenKind) {
        let span = Span::new(self.start, self.pos);
        self.tokens.push(Token::new(kind, span, self.start_pos));
    }

    /// Consume one physical line break (`\n`, `\r\n` or `\r`)
    fn eat_newline(&mut self) -> bool {
        match self.peek() {
            Some(b'\r') => {
                self.pos += 1;
                if self.peek() == Some(b'\n') {
                    self.advance();
                } else {
                    self.line += 1;
                    self.col = 1;
                }
                true
            }
            Some(b'\n') => {
                self.advance();
                true
            }
            _ => false,
        }
    }

    fn at_newline(&self) -> bool {
        matches!(self.peek(), Some(b'\n') | Some(b'\r'))
    }

    // ==================== Layout ====================

    /// Measure leading whitespace at a logical line start and emit
    /// Indent/Dedent tokens. Blank and comment-only lines are skipped
    /// without affecting the indentation stack.
    fn scan_indentation(&mut self) -> Result<(), LexError> {
        loop {
            let mut width = 0usize;
            loop {
                match self.peek() {
                    Some(b' ') => {
                        width += 1;
                        self.advance();
                    }
                    Some(b'\t') => {
                        // Tabs advance to the next multiple of eight
                        width = width / 8 * 8 + 8;
                        self.advance();
                    }
                    _ => break,
                }
            }

            if self.is_at_end() {
                return Ok(());
            }
            if self.at_newline() {
                self.eat_newline();
                continue;
            }
            if self.peek() == Some(b'#') {
                while !self.is_at_end() && !self.at_newline() {
                    self.advance();
                }
                self.eat_newline();
                continue;
            }

            // A real token follows; reconcile with the indent stack.
            self.mark_start();
            let current = *self.indents.last().unwrap_or(&0);
            if width > current {
                self.indents.push(width);
                self.push(TokenKind::Indent);
            } else if width < current {
                while self.indents.last().map_or(false, |&lvl| lvl > width) {
                    self.indents.pop();
                    self.push(TokenKind::Dedent);
                }
                if self.indents.last() != Some(&width) {
                    return Err(LexError::InvalidIndentation {
                        pos: self.current_pos(),
                    });
                }
            }
            return Ok(());
        }
    }

    /// Skip spaces, tabs and backslash line joins between tokens
    fn skip_inline_space(&mut self) {
        loop {
            match self.peek() {
                Some(b' ') | Some(b'\t') => {
                    self.advance();
                }
                Some(b'\\') => {
                    let after = self.peek_next();
                    if matches!(after, Some(b'\n') | Some(b'\r')) {
                        self.advance();
                        self.eat_newline();
                    } else {
                        break;
                    }
                }
                _ => break,
            }
        }
    }

    // ==================== Main loop ====================

    pub fn run(mut self) -> Result<Vec<Token>, LexError> {
        let mut at_line_start = true;
        let mut line_has_tokens = false;

        loop {
            if at_line_start && self.bracket_depth == 0 {
                self.scan_indentation()?;
                at_line_start = false;
            }
            self.skip_inline_space();

            let Some(c) = self.peek() else { break };

            if self.at_newline() {
                self.mark_start();
                self.eat_newline();
                if self.bracket_depth == 0 {
                    if line_has_tokens {
                        self.push(TokenKind::Newline);
                        line_has_tokens = false;
                    }
                    at_line_start = true;
                }
                continue;
            }

            if c == b'#' {
                while !self.is_at_end() && !self.at_newline() {
                    self.advance();
                }
                continue;
            }

            self.mark_start();
            line_has_tokens = true;

            if c.is_ascii_digit() || (c == b'.' && self.peek_next().map_or(false, |n| n.is_ascii_digit())) {
                self.read_number();
            } else if is_ident_start(c) {
                self.read_identifier_or_string()?;
            } else if c == b'"' || c == b'\'' {
                self.read_string(false, false, false)?;
            } else {
                self.read_operator()?;
            }
        }

        // Close the final logical line, drain the indent stack, then EOF.
        // Inside an unclosed bracket there is no logical line to close; the
        // parser reports the unexpected end of file instead.
        self.mark_start();
        if line_has_tokens && self.bracket_depth == 0 {
            self.push(TokenKind::Newline);
        }
        while self.indents.len() > 1 {
            self.indents.pop();
            self.push(TokenKind::Dedent);
        }
        self.tokens.push(Token::eof(self.current_pos()));
        Ok(self.tokens)
    }

    // ==================== Numbers ====================

    fn eat_digits(&mut self, pred: fn(u8) -> bool) {
        while let Some(c) = self.peek() {
            if pred(c) || c == b'_' {
                self.advance();
            } else {
                break;
            }
        }
    }

    /// Scan a numeric literal, preserving the lexeme exactly.
    ///
    /// A `.` after digits is only absorbed when the next character is not an
    /// identifier start, so `1.bit_length()` keeps `1` and `.` separate
    /// while `1.5` and `1.` stay one token.
    fn read_number(&mut self) {
        if self.peek() == Some(b'0')
            && matches!(
                self.peek_next(),
                Some(b'x') | Some(b'X') | Some(b'o') | Some(b'O') | Some(b'b') | Some(b'B')
            )
        {
            let base = self.peek_next().unwrap_or(b'x');
            self.advance();
            self.advance();
            match base {
                b'x' | b'X' => self.eat_digits(|c| c.is_ascii_hexdigit()),
                b'o' | b'O' => self.eat_digits(|c| (b'0'..=b'7').contains(&c)),
                _ => self.eat_digits(|c| c == b'0' || c == b'1'),
            }
        } else {
            if self.peek() == Some(b'.') {
                // Leading-dot float such as `.5`
                self.advance();
                self.eat_digits(|c| c.is_ascii_digit());
            } else {
                self.eat_digits(|c| c.is_ascii_digit());
                if self.peek() == Some(b'.') && !self.peek_next().map_or(false, is_ident_start) {
                    self.advance();
                    self.eat_digits(|c| c.is_ascii_digit());
                }
            }

            // Exponent, consumed only when a digit (or signed digit) follows
            if matches!(self.peek(), Some(b'e') | Some(b'E')) {
                let consume = match self.peek_next() {
                    Some(d) if d.is_ascii_digit() => true,
                    Some(b'+') | Some(b'-') => {
                        self.peek_at(2).map_or(false, |d| d.is_ascii_digit())
                    }
                    _ => false,
                };
                if consume {
                    self.advance();
                    if matches!(self.peek(), Some(b'+') | Some(b'-')) {
                        self.advance();
                    }
                    self.eat_digits(|c| c.is_ascii_digit());
                }
            }
        }

        if matches!(self.peek(), Some(b'j') | Some(b'J')) {
            self.advance();
            let lexeme = self.lexeme();
            self.push(TokenKind::ComplexNumber(lexeme));
        } else {
            let lexeme = self.lexeme();
            self.push(TokenKind::Number(lexeme));
        }
    }

    // ==================== Identifiers, keywords, string prefixes ====================

    fn read_identifier_or_string(&mut self) -> Result<(), LexError> {
        while let Some(c) = self.peek() {
            if is_ident_continue(c) {
                self.advance();
            } else {
                break;
            }
        }

        let text = self.lexeme();

        // A short identifier directly followed by a quote is a string prefix
        if matches!(self.peek(), Some(b'"') | Some(b'\'')) && text.len() <= 2 {
            let lower = text.to_ascii_lowercase();
            if lower.chars().all(|c| matches!(c, 'r' | 'b' | 'f' | 'u')) {
                let raw = lower.contains('r');
                let bytes = lower.contains('b');
                let fstr = lower.contains('f');
                return self.read_string(fstr, raw, bytes);
            }
        }

        let kind = TokenKind::keyword_from_str(&text).unwrap_or(TokenKind::Ident(text));
        self.push(kind);
        Ok(())
    }

    // ==================== Strings ====================

    /// Read a string body, the opening quote(s) already identified
    fn read_string(&mut self, fstring: bool, raw: bool, bytes: bool) -> Result<(), LexError> {
        let quote = self.advance().unwrap_or(b'"');
        let triple = self.peek() == Some(quote) && self.peek_next() == Some(quote);
        if triple {
            self.advance();
            self.advance();
        }

        if fstring {
            let parts = self.read_fstring_body(quote, triple)?;
            self.push(TokenKind::FString(parts));
            return Ok(());
        }

        let mut body = String::new();
        loop {
            match self.peek() {
                None => {
                    return Err(LexError::UnterminatedString {
                        pos: self.start_pos,
                    })
                }
                Some(b'\n') | Some(b'\r') if !triple => {
                    return Err(LexError::UnterminatedString {
                        pos: self.start_pos,
                    })
                }
                Some(b'\\') => {
                    // Escapes are carried verbatim; decoding happens later
                    self.advance();
                    body.push('\\');
                    if let Some(c) = self.advance() {
                        body.push(c as char);
                    }
                }
                Some(c) if c == quote => {
                    if triple {
                        if self.peek_next() == Some(quote) && self.peek_at(2) == Some(quote) {
                            self.advance();
                            self.advance();
                            self.advance();
                            break;
                        }
                        self.advance();
                        body.push(c as char);
                    } else {
                        self.advance();
                        break;
                    }
                }
                Some(c) => {
                    self.advance();
                    body.push(c as char);
                }
            }
        }

        self.push(TokenKind::Str(StringLit { body, raw, bytes }));
        Ok(())
    }

    /// Split an f-string body into literal and expression parts.
    ///
    /// `{{` and `}}` un-escape to single braces inside literal parts. An
    /// expression part runs to its matching `}`; a `!r`/`!s`/`!a` at depth 1
    /// sets the conversion flag and a `:` at depth 1 opens the format spec,
    /// which is carried verbatim.
    fn read_fstring_body(
        &mut self,
        quote: u8,
        triple: bool,
    ) -> Result<Vec<FStringPart>, LexError> {
        let mut parts = Vec::new();
        let mut literal = String::new();

        loop {
            match self.peek() {
                None => {
                    return Err(LexError::UnterminatedFString {
                        pos: self.start_pos,
                    })
                }
                Some(b'\n') | Some(b'\r') if !triple => {
                    return Err(LexError::UnterminatedFString {
                        pos: self.start_pos,
                    })
                }
                Some(b'{') if self.peek_next() == Some(b'{') => {
                    self.advance();
                    self.advance();
                    literal.push('{');
                }
                Some(b'}') if self.peek_next() == Some(b'}') => {
                    self.advance();
                    self.advance();
                    literal.push('}');
                }
                Some(b'}') => {
                    return Err(LexError::InvalidCharacter {
                        ch: '}',
                        pos: self.current_pos(),
                    })
                }
                Some(b'{') => {
                    self.advance();
                    if !literal.is_empty() {
                        parts.push(FStringPart::Literal(std::mem::take(&mut literal)));
                    }
                    parts.push(self.read_fstring_expr(quote, triple)?);
                }
                Some(b'\\') => {
                    self.advance();
                    literal.push('\\');
                    if let Some(c) = self.advance() {
                        literal.push(c as char);
                    }
                }
                Some(c) if c == quote => {
                    if triple {
                        if self.peek_next() == Some(quote) && self.peek_at(2) == Some(quote) {
                            self.advance();
                            self.advance();
                            self.advance();
                            break;
                        }
                        self.advance();
                        literal.push(c as char);
                    } else {
                        self.advance();
                        break;
                    }
                }
                Some(c) => {
                    self.advance();
                    literal.push(c as char);
                }
            }
        }

        if !literal.is_empty() {
            parts.push(FStringPart::Literal(literal));
        }
        Ok(parts)
    }

    /// Read one `{...}` replacement field, the `{` already consumed
    fn read_fstring_expr(&mut self, quote: u8, triple: bool) -> Result<FStringPart, LexError> {
        let mut source = String::new();
        let mut conversion = None;
        let mut format_spec: Option<String> = None;
        let mut depth = 1usize;
        let mut in_spec = false;

        loop {
            let Some(c) = self.peek() else {
                return Err(LexError::UnterminatedFString {
                    pos: self.start_pos,
                });
            };
            if (c == b'\n' || c == b'\r') && !triple {
                return Err(LexError::UnterminatedFString {
                    pos: self.start_pos,
                });
            }

            if in_spec {
                match c {
                    b'{' => {
                        depth += 1;
                        self.advance();
                        if let Some(spec) = format_spec.as_mut() {
                            spec.push('{');
                        }
                    }
                    b'}' => {
                        depth -= 1;
                        self.advance();
                        if depth == 0 {
                            return Ok(FStringPart::Expr {
                                source,
                                conversion,
                                format_spec,
                            });
                        }
                        if let Some(spec) = format_spec.as_mut() {
                            spec.push('}');
                        }
                    }
                    _ => {
                        self.advance();
                        if let Some(spec) = format_spec.as_mut() {
                            spec.push(c as char);
                        }
                    }
                }
                continue;
            }

            match c {
                b'(' | b'[' | b'{' => {
                    depth += 1;
                    self.advance();
                    source.push(c as char);
                }
                b')' | b']' => {
                    depth = depth.saturating_sub(1);
                    self.advance();
                    source.push(c as char);
                }
                b'}' => {
                    depth -= 1;
                    self.advance();
                    if depth == 0 {
                        return Ok(FStringPart::Expr {
                            source,
                            conversion,
                            format_spec,
                        });
                    }
                    source.push('}');
                }
                b'!' if depth == 1
                    && matches!(self.peek_next(), Some(b'r') | Some(b's') | Some(b'a'))
                    && matches!(self.peek_at(2), Some(b'}') | Some(b':')) =>
                {
                    self.advance();
                    conversion = self.advance().map(|c| c as char);
                }
                b':' if depth == 1 => {
                    self.advance();
                    in_spec = true;
                    format_spec = Some(String::new());
                }
                b'\'' | b'"' => {
                    if c == quote && !triple {
                        return Err(LexError::UnterminatedFString {
                            pos: self.start_pos,
                        });
                    }
                    // Nested string literal: copy verbatim so `:` and braces
                    // inside it stay inert
                    self.advance();
                    source.push(c as char);
                    loop {
                        match self.peek() {
                            None => {
                                return Err(LexError::UnterminatedFString {
                                    pos: self.start_pos,
                                })
                            }
                            Some(b'\\') => {
                                self.advance();
                                source.push('\\');
                                if let Some(e) = self.advance() {
                                    source.push(e as char);
                                }
                            }
                            Some(inner) => {
                                self.advance();
                                source.push(inner as char);
                                if inner == c {
                                    break;
                                }
                            }
                        }
                    }
                }
                _ => {
                    self.advance();
                    source.push(c as char);
                }
            }
        }
    }

    // ==================== Operators and delimiters ====================

    fn read_operator(&mut self) -> Result<(), LexError> {
        let c = self.advance().unwrap_or(0);

        let kind = match c {
            b'+' => self.with_eq(TokenKind::Plus, TokenKind::PlusEq),
            b'-' => {
                if self.peek() == Some(b'>') {
                    self.advance();
                    TokenKind::Arrow
                } else {
                    self.with_eq(TokenKind::Minus, TokenKind::MinusEq)
                }
            }
            b'*' => {
                if self.peek() == Some(b'*') {
                    self.advance();
                    self.with_eq(TokenKind::DoubleStar, TokenKind::DoubleStarEq)
                } else {
                    self.with_eq(TokenKind::Star, TokenKind::StarEq)
                }
            }
            b'/' => {
                if self.peek() == Some(b'/') {
                    self.advance();
                    self.with_eq(TokenKind::DoubleSlash, TokenKind::DoubleSlashEq)
                } else {
                    self.with_eq(TokenKind::Slash, TokenKind::SlashEq)
                }
            }
            b'%' => self.with_eq(TokenKind::Percent, TokenKind::PercentEq),
            b'@' => self.with_eq(TokenKind::At, TokenKind::AtEq),
            b'&' => self.with_eq(TokenKind::Amp, TokenKind::AmpEq),
            b'|' => self.with_eq(TokenKind::Pipe, TokenKind::PipeEq),
            b'^' => self.with_eq(TokenKind::Caret, TokenKind::CaretEq),
            b'~' => TokenKind::Tilde,
            b'<' => {
                if self.peek() == Some(b'<') {
                    self.advance();
                    self.with_eq(TokenKind::Shl, TokenKind::ShlEq)
                } else {
                    self.with_eq(TokenKind::Lt, TokenKind::Le)
                }
            }
            b'>' => {
                if self.peek() == Some(b'>') {
                    self.advance();
                    self.with_eq(TokenKind::Shr, TokenKind::ShrEq)
                } else {
                    self.with_eq(TokenKind::Gt, TokenKind::Ge)
                }
            }
            b'=' => self.with_eq(TokenKind::Eq, TokenKind::EqEq),
            b'!' => {
                if self.peek() == Some(b'=') {
                    self.advance();
                    TokenKind::Ne
                } else {
                    return Err(LexError::InvalidCharacter {
                        ch: '!',
                        pos: self.start_pos,
                    });
                }
            }
            b'.' => {
                if self.peek() == Some(b'.') && self.peek_next() == Some(b'.') {
                    self.advance();
                    self.advance();
                    TokenKind::Ellipsis
                } else {
                    TokenKind::Dot
                }
            }
            b':' => {
                if self.peek() == Some(b'=') {
                    self.advance();
                    TokenKind::ColonEq
                } else {
                    TokenKind::Colon
                }
            }
            b'(' => {
                self.bracket_depth += 1;
                TokenKind::LParen
            }
            b')' => {
                self.bracket_depth = self.bracket_depth.saturating_sub(1);
                TokenKind::RParen
            }
            b'[' => {
                self.bracket_depth += 1;
                TokenKind::LBracket
            }
            b']' => {
                self.bracket_depth = self.bracket_depth.saturating_sub(1);
                TokenKind::RBracket
            }
            b'{' => {
                self.bracket_depth += 1;
                TokenKind::LBrace
            }
            b'}' => {
                self.bracket_depth = self.bracket_depth.saturating_sub(1);
                TokenKind::RBrace
            }
            b',' => TokenKind::Comma,
            b';' => TokenKind::Semicolon,
            other => {
                return Err(LexError::InvalidCharacter {
                    ch: other as char,
                    pos: self.start_pos,
                })
            }
        };

        self.push(kind);
        Ok(())
    }

    /// `base` or, if `=` follows, consume it and use `with_eq`
    fn with_eq(&mut self, base: TokenKind, with_eq: TokenKind) -> TokenKind {
        if self.peek() == Some(b'=') {
            self.advance();
            with_eq
        } else {
            base
        }
    }
}

fn is_ident_start(c: u8) -> bool {
    c.is_ascii_alphabetic() || c == b'_' || c >= 0x80
}

fn is_ident_continue(c: u8) -> bool {
    c.is_ascii_alphanumeric() || c == b'_' || c >= 0x80
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn lex(source: &str) -> Vec<Token> {
        tokenize(source.as_bytes()).unwrap()
    }

    fn kinds(source: &str) -> Vec<TokenKind> {
        lex(source).into_iter().map(|t| t.kind).collect()
    }

    #[test]
    fn test_simple_tokens() {
        let toks = kinds("x = 1 + 2\n");
        assert_eq!(
            toks,
            vec![
                TokenKind::Ident("x".into()),
                TokenKind::Eq,
                TokenKind::Number("1".into()),
                TokenKind::Plus,
                TokenKind::Number("2".into()),
                TokenKind::Newline,
                TokenKind::Eof,
            ]
        );
    }

    #[test]
    fn test_numeric_lexemes_round_trip() {
        let cases = [
            "0xFF_FF", "0b1010", "0o755", "1_000_000", ".5", "1.", "1.23e167", "2E+10", "3j",
            "1_0.5_0e1_0",
        ];
        for case in cases {
            let toks = lex(case);
            match &toks[0].kind {
                TokenKind::Number(lexeme) | TokenKind::ComplexNumber(lexeme) => {
                    assert_eq!(lexeme, case, "lexeme must round-trip for {case}");
                    // Span reconstruction must match the lexeme too
                    assert_eq!(&case[toks[0].span.start..toks[0].span.end], lexeme.as_str());
                }
                other => panic!("expected number for {case}, got {other:?}"),
            }
        }
    }

    #[test]
    fn test_complex_suffix_changes_kind() {
        assert!(matches!(&kinds("3j")[0], TokenKind::ComplexNumber(l) if l == "3j"));
        assert!(matches!(&kinds("3.5J")[0], TokenKind::ComplexNumber(l) if l == "3.5J"));
        assert!(matches!(&kinds("3")[0], TokenKind::Number(l) if l == "3"));
    }

    #[test]
    fn test_dot_disambiguation() {
        // `1.bit_length()` keeps the dot out of the number...
        let toks = kinds("1.bit_length()");
        assert_eq!(toks[0], TokenKind::Number("1".into()));
        assert_eq!(toks[1], TokenKind::Dot);
        assert_eq!(toks[2], TokenKind::Ident("bit_length".into()));
        // ...while `1.5` is one token
        assert_eq!(kinds("1.5")[0], TokenKind::Number("1.5".into()));
    }

    #[test]
    fn test_exponent_requires_digits() {
        // `e` followed by a non-digit is an identifier, not an exponent
        let toks = kinds("2e");
        assert_eq!(toks[0], TokenKind::Number("2".into()));
        assert_eq!(toks[1], TokenKind::Ident("e".into()));
        let toks = kinds("2e+x");
        assert_eq!(toks[0], TokenKind::Number("2".into()));
    }

    #[test]
    fn test_indentation_tokens() {
        let toks = kinds("if x:\n    y = 1\nz = 2\n");
        let indent = toks.iter().filter(|k| **k == TokenKind::Indent).count();
        let dedent = toks.iter().filter(|k| **k == TokenKind::Dedent).count();
        assert_eq!(indent, 1);
        assert_eq!(dedent, 1);
    }

    #[test]
    fn test_dedent_to_unknown_level_fails() {
        let err = tokenize(b"if x:\n        y = 1\n   z = 2\n").unwrap_err();
        assert!(matches!(err, LexError::InvalidIndentation { .. }));
    }

    #[test]
    fn test_blank_lines_do_not_dedent() {
        let toks = kinds("if x:\n    y = 1\n\n    z = 2\n");
        let indent = toks.iter().filter(|k| **k == TokenKind::Indent).count();
        assert_eq!(indent, 1);
    }

    #[test]
    fn test_implicit_line_joining() {
        let toks = kinds("f(1,\n   2)\n");
        // No Newline or Indent inside the parentheses
        let newline_at = toks.iter().position(|k| *k == TokenKind::Newline).unwrap();
        assert_eq!(toks[newline_at - 1], TokenKind::RParen);
        assert!(!toks.contains(&TokenKind::Indent));
    }

    #[test]
    fn test_backslash_line_join() {
        let toks = kinds("x = 1 + \\\n    2\n");
        let newlines = toks.iter().filter(|k| **k == TokenKind::Newline).count();
        assert_eq!(newlines, 1);
    }

    #[test]
    fn test_string_literal() {
        let toks = kinds(r#"s = "hello\nworld""#);
        match &toks[2] {
            TokenKind::Str(lit) => {
                assert_eq!(lit.body, "hello\\nworld");
                assert!(!lit.raw);
            }
            other => panic!("expected string, got {other:?}"),
        }
    }

    #[test]
    fn test_unterminated_string() {
        let err = tokenize(b"s = \"oops\n").unwrap_err();
        assert!(matches!(err, LexError::UnterminatedString { .. }));
    }

    #[test]
    fn test_triple_quoted_string() {
        let toks = kinds("s = \"\"\"line1\nline2\"\"\"\n");
        match &toks[2] {
            TokenKind::Str(lit) => assert_eq!(lit.body, "line1\nline2"),
            other => panic!("expected string, got {other:?}"),
        }
    }

    #[test]
    fn test_fstring_parts() {
        let toks = kinds(r#"f"{{literal}}{expr!r:>10}""#);
        match &toks[0] {
            TokenKind::FString(parts) => {
                assert_eq!(
                    parts,
                    &vec![
                        FStringPart::Literal("{literal}".into()),
                        FStringPart::Expr {
                            source: "expr".into(),
                            conversion: Some('r'),
                            format_spec: Some(">10".into()),
                        },
                    ]
                );
            }
            other => panic!("expected f-string, got {other:?}"),
        }
    }

    #[test]
    fn test_fstring_bare_expression() {
        let toks = kinds(r#"f"a{x + 1}b""#);
        match &toks[0] {
            TokenKind::FString(parts) => {
                assert_eq!(parts.len(), 3);
                assert_eq!(
                    parts[1],
                    FStringPart::Expr {
                        source: "x + 1".into(),
                        conversion: None,
                        format_spec: None,
                    }
                );
            }
            other => panic!("expected f-string, got {other:?}"),
        }
    }

    #[test]
    fn test_fstring_colon_inside_subscript_is_not_a_spec() {
        let toks = kinds(r#"f"{d[1:2]}""#);
        match &toks[0] {
            TokenKind::FString(parts) => {
                assert_eq!(
                    parts[0],
                    FStringPart::Expr {
                        source: "d[1:2]".into(),
                        conversion: None,
                        format_spec: None,
                    }
                );
            }
            other => panic!("expected f-string, got {other:?}"),
        }
    }

    #[test]
    fn test_unterminated_fstring() {
        let err = tokenize(b"f\"{oops\n").unwrap_err();
        assert!(matches!(err, LexError::UnterminatedFString { .. }));
    }

    #[test]
    fn test_keywords_and_operators() {
        let toks = kinds("def f(a, b):\n    return a ** b // 2\n");
        assert_eq!(toks[0], TokenKind::Def);
        assert!(toks.contains(&TokenKind::DoubleStar));
        assert!(toks.contains(&TokenKind::DoubleSlash));
    }

    #[test]
    fn test_walrus_and_arrow() {
        let toks = kinds("def f() -> int:\n    pass\n");
        assert!(toks.contains(&TokenKind::Arrow));
        let toks = kinds("(n := 10)\n");
        assert!(toks.contains(&TokenKind::ColonEq));
    }

    #[test]
    fn test_invalid_character() {
        let err = tokenize(b"x = 1 ? 2\n").unwrap_err();
        assert!(matches!(err, LexError::InvalidCharacter { ch: '?', .. }));
    }

    #[test]
    fn test_positions() {
        let toks = lex("x = 1\ny = 2\n");
        let y = toks
            .iter()
            .find(|t| t.kind == TokenKind::Ident("y".into()))
            .unwrap();
        assert_eq!(y.pos.line, 2);
        assert_eq!(y.pos.col, 1);
    }
}
