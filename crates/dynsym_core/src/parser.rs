//! Tokenizer and recursive-descent parser for model source text.
//!
//! ```text
//! statement  := quantifier | expression [(":=" | "<-") expression | "=" expression]
//! quantifier := ("∀" | "forall") "t" ("∈" | "in") "[" expression "," expression ")" ":" symbol ":=" expression
//! expression := term (("+" | "-") term)*
//! term       := unary (("*" | "/") unary)*
//! unary      := "-" unary | power
//! power      := primary [("^" | "**") unary]
//! primary    := number | name ["(" args ")" | "[" index "]"] | "(" expression ")"
//! index      := "~" | "t" [("+" | "-") integer] | ["-"] integer
//! ```

use crate::ast::{BinaryOp, Expr, ExprKind, Symbol, TimeIndex};
use crate::error::Span;
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Error)]
#[error("{message} at {span}")]
pub struct ParseError {
    pub message: String,
    pub span: Span,
}

impl ParseError {
    fn new(message: impl Into<String>, span: Span) -> Self {
        Self {
            message: message.into(),
            span,
        }
    }
}

/// Which block node wraps the parsed statements.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BlockKind {
    /// Assignments are executed, equations are deferred.
    Free,
    Equation,
    Assignment,
}

/// Parses a single statement or expression.
pub fn parse_formula(input: &str) -> Result<Expr, ParseError> {
    let tokens = tokenize(input)?;
    let mut parser = Parser { tokens, pos: 0 };
    parser.skip_separators();
    let expr = parser.parse_statement()?;
    parser.skip_separators();
    parser.expect_end()?;
    Ok(expr)
}

/// Parses a newline- or `;`-separated sequence of statements.
pub fn parse_block(input: &str, kind: BlockKind) -> Result<Expr, ParseError> {
    let tokens = tokenize(input)?;
    let mut parser = Parser { tokens, pos: 0 };
    let mut items = Vec::new();

    parser.skip_separators();
    while parser.peek().is_some() {
        let statement = parser.parse_statement()?;
        let allowed = match kind {
            BlockKind::Free => true,
            BlockKind::Equation => statement.is_equation(),
            BlockKind::Assignment => matches!(
                statement.kind,
                ExprKind::Assignment { .. } | ExprKind::QuantifiedAssignment { .. }
            ),
        };
        if !allowed {
            return Err(ParseError::new(
                format!("statement not allowed in a {kind:?} block"),
                statement.span,
            ));
        }
        items.push(statement);
        if parser.peek().is_some() {
            parser.expect_separator()?;
        }
        parser.skip_separators();
    }

    let span = items.first().map(|e| e.span).unwrap_or_default();
    let kind = match kind {
        BlockKind::Free => ExprKind::FreeBlock(items),
        BlockKind::Equation => ExprKind::EquationBlock(items),
        BlockKind::Assignment => ExprKind::AssignmentBlock(items),
    };
    Ok(Expr::new(kind, span))
}

#[derive(Debug, Clone, PartialEq)]
enum Token {
    Number(String),
    Identifier(String),
    Plus,
    Minus,
    Star,
    Slash,
    Caret,
    LParen,
    RParen,
    LBracket,
    RBracket,
    Comma,
    Tilde,
    Equals,
    Assign,
    Colon,
    Forall,
    In,
    Separator,
}

fn tokenize(input: &str) -> Result<Vec<(Token, Span)>, ParseError> {
    let chars: Vec<char> = input.chars().collect();
    let mut tokens = Vec::new();
    let (mut i, mut line, mut column) = (0usize, 1usize, 1usize);
    // newlines inside parentheses or brackets do not end a statement
    let mut depth = 0usize;

    while i < chars.len() {
        let c = chars[i];
        let span = Span::new(line, column);
        let start = i;

        if c == '\n' || c == ';' {
            if depth == 0 {
                tokens.push((Token::Separator, span));
            }
            i += 1;
        } else if c.is_whitespace() {
            i += 1;
        } else if c == '#' {
            while i < chars.len() && chars[i] != '\n' {
                i += 1;
            }
        } else if c.is_ascii_digit() || (c == '.' && chars.get(i + 1).is_some_and(|d| d.is_ascii_digit())) {
            while i < chars.len() && (chars[i].is_ascii_digit() || chars[i] == '.') {
                i += 1;
            }
            if i < chars.len() && (chars[i] == 'e' || chars[i] == 'E') {
                let mut j = i + 1;
                if j < chars.len() && (chars[j] == '+' || chars[j] == '-') {
                    j += 1;
                }
                if j < chars.len() && chars[j].is_ascii_digit() {
                    i = j;
                    while i < chars.len() && chars[i].is_ascii_digit() {
                        i += 1;
                    }
                }
            }
            let text: String = chars[start..i].iter().collect();
            tokens.push((Token::Number(text), span));
        } else if c.is_alphabetic() || c == '_' {
            while i < chars.len() && (chars[i].is_alphanumeric() || chars[i] == '_') {
                i += 1;
            }
            let ident: String = chars[start..i].iter().collect();
            let token = match ident.as_str() {
                "forall" => Token::Forall,
                "in" => Token::In,
                _ => Token::Identifier(ident),
            };
            tokens.push((token, span));
        } else {
            let next = chars.get(i + 1).copied();
            let (token, width) = match (c, next) {
                ('*', Some('*')) => (Token::Caret, 2),
                (':', Some('=')) => (Token::Assign, 2),
                ('<', Some('-')) => (Token::Assign, 2),
                ('+', _) => (Token::Plus, 1),
                ('-', _) => (Token::Minus, 1),
                ('*', _) => (Token::Star, 1),
                ('/', _) => (Token::Slash, 1),
                ('^', _) => (Token::Caret, 1),
                ('(', _) => (Token::LParen, 1),
                (')', _) => (Token::RParen, 1),
                ('[', _) => (Token::LBracket, 1),
                (']', _) => (Token::RBracket, 1),
                (',', _) => (Token::Comma, 1),
                ('~', _) => (Token::Tilde, 1),
                ('=', _) => (Token::Equals, 1),
                (':', _) => (Token::Colon, 1),
                ('∀', _) => (Token::Forall, 1),
                ('∈', _) => (Token::In, 1),
                _ => return Err(ParseError::new(format!("unexpected character '{c}'"), span)),
            };
            match token {
                Token::LParen | Token::LBracket => depth += 1,
                Token::RParen | Token::RBracket => depth = depth.saturating_sub(1),
                _ => {}
            }
            tokens.push((token, span));
            i += width;
        }

        for &consumed in &chars[start..i] {
            if consumed == '\n' {
                line += 1;
                column = 1;
            } else {
                column += 1;
            }
        }
    }
    Ok(tokens)
}

struct Parser {
    tokens: Vec<(Token, Span)>,
    pos: usize,
}

impl Parser {
    fn peek(&self) -> Option<&Token> {
        self.tokens.get(self.pos).map(|(t, _)| t)
    }

    fn span(&self) -> Span {
        self.tokens
            .get(self.pos)
            .or_else(|| self.tokens.last())
            .map(|(_, s)| *s)
            .unwrap_or_default()
    }

    fn consume(&mut self) -> Option<(Token, Span)> {
        let token = self.tokens.get(self.pos).cloned();
        if token.is_some() {
            self.pos += 1;
        }
        token
    }

    fn eat(&mut self, expected: &Token) -> bool {
        if self.peek() == Some(expected) {
            self.pos += 1;
            true
        } else {
            false
        }
    }

    fn expect(&mut self, expected: Token, what: &str) -> Result<Span, ParseError> {
        let span = self.span();
        if self.eat(&expected) {
            Ok(span)
        } else {
            Err(ParseError::new(format!("expected {what}"), span))
        }
    }

    fn skip_separators(&mut self) {
        while self.eat(&Token::Separator) {}
    }

    fn expect_separator(&mut self) -> Result<(), ParseError> {
        self.expect(Token::Separator, "end of statement").map(|_| ())
    }

    fn expect_end(&self) -> Result<(), ParseError> {
        match self.peek() {
            None => Ok(()),
            Some(_) => Err(ParseError::new("unexpected trailing input", self.span())),
        }
    }

    fn parse_statement(&mut self) -> Result<Expr, ParseError> {
        let span = self.span();
        if self.eat(&Token::Forall) {
            return self.parse_quantifier(span);
        }

        let left = self.parse_expression()?;
        if self.eat(&Token::Assign) {
            let target = into_symbol(left)?;
            let value = self.parse_expression()?;
            return Ok(Expr::new(
                ExprKind::Assignment {
                    target,
                    value: Box::new(value),
                },
                span,
            ));
        }
        if self.eat(&Token::Equals) {
            let right = self.parse_expression()?;
            return Ok(Expr::new(
                ExprKind::Equality(Box::new(left), Box::new(right)),
                span,
            ));
        }
        Ok(left)
    }

    fn parse_quantifier(&mut self, span: Span) -> Result<Expr, ParseError> {
        match self.consume() {
            Some((Token::Identifier(name), _)) if name == "t" => {}
            _ => return Err(ParseError::new("expected the time index `t`", self.span())),
        }
        self.expect(Token::In, "`in` or `∈`")?;
        self.expect(Token::LBracket, "'['")?;
        let lower = self.parse_expression()?;
        self.expect(Token::Comma, "','")?;
        let upper = self.parse_expression()?;
        self.expect(Token::RParen, "')' closing a half-open range")?;
        self.expect(Token::Colon, "':'")?;
        let target = into_symbol(self.parse_primary()?)?;
        self.expect(Token::Assign, "':='")?;
        let value = self.parse_expression()?;
        Ok(Expr::new(
            ExprKind::QuantifiedAssignment {
                lower: Box::new(lower),
                upper: Box::new(upper),
                target,
                value: Box::new(value),
            },
            span,
        ))
    }

    fn parse_expression(&mut self) -> Result<Expr, ParseError> {
        let mut left = self.parse_term()?;
        loop {
            let span = self.span();
            let op = match self.peek() {
                Some(Token::Plus) => BinaryOp::Add,
                Some(Token::Minus) => BinaryOp::Sub,
                _ => break,
            };
            self.consume();
            let right = self.parse_term()?;
            left = binary(op, left, right, span);
        }
        Ok(left)
    }

    fn parse_term(&mut self) -> Result<Expr, ParseError> {
        let mut left = self.parse_unary()?;
        loop {
            let span = self.span();
            let op = match self.peek() {
                Some(Token::Star) => BinaryOp::Mul,
                Some(Token::Slash) => BinaryOp::Div,
                _ => break,
            };
            self.consume();
            let right = self.parse_unary()?;
            left = binary(op, left, right, span);
        }
        Ok(left)
    }

    fn parse_unary(&mut self) -> Result<Expr, ParseError> {
        let span = self.span();
        if self.eat(&Token::Minus) {
            let operand = self.parse_unary()?;
            return Ok(Expr::new(ExprKind::Neg(Box::new(operand)), span));
        }
        self.parse_power()
    }

    fn parse_power(&mut self) -> Result<Expr, ParseError> {
        let base = self.parse_primary()?;
        let span = self.span();
        if self.eat(&Token::Caret) {
            // right-associative: 2^3^2 is 2^(3^2)
            let exponent = self.parse_unary()?;
            return Ok(binary(BinaryOp::Pow, base, exponent, span));
        }
        Ok(base)
    }

    fn parse_primary(&mut self) -> Result<Expr, ParseError> {
        let span = self.span();
        match self.consume() {
            Some((Token::Number(text), _)) => Ok(Expr::new(ExprKind::Number(text), span)),
            Some((Token::Identifier(name), _)) => {
                if self.eat(&Token::LParen) {
                    let args = self.parse_arguments()?;
                    return Ok(Expr::new(ExprKind::Call { function: name, args }, span));
                }
                let index = if self.eat(&Token::LBracket) {
                    let index = self.parse_index()?;
                    self.expect(Token::RBracket, "']'")?;
                    index
                } else {
                    TimeIndex::Timeless
                };
                Ok(Expr::new(ExprKind::Symbol(Symbol { name, index }), span))
            }
            Some((Token::LParen, _)) => {
                let expr = self.parse_expression()?;
                self.expect(Token::RParen, "')'")?;
                Ok(expr)
            }
            _ => Err(ParseError::new("unexpected token", span)),
        }
    }

    fn parse_arguments(&mut self) -> Result<Vec<Expr>, ParseError> {
        let mut args = Vec::new();
        if self.eat(&Token::RParen) {
            return Ok(args);
        }
        loop {
            args.push(self.parse_expression()?);
            if self.eat(&Token::Comma) {
                continue;
            }
            self.expect(Token::RParen, "')'")?;
            return Ok(args);
        }
    }

    fn parse_index(&mut self) -> Result<TimeIndex, ParseError> {
        if self.eat(&Token::Tilde) {
            return Ok(TimeIndex::Steady);
        }
        if matches!(self.peek(), Some(Token::Identifier(name)) if name == "t") {
            self.consume();
            let sign = match self.peek() {
                Some(Token::Plus) => 1,
                Some(Token::Minus) => -1,
                _ => return Ok(TimeIndex::Shift(0)),
            };
            self.consume();
            return Ok(TimeIndex::Shift(sign * self.parse_integer()?));
        }
        let sign = if self.eat(&Token::Minus) { -1 } else { 1 };
        Ok(TimeIndex::Date(sign * self.parse_integer()?))
    }

    fn parse_integer(&mut self) -> Result<i64, ParseError> {
        let span = self.span();
        match self.consume() {
            Some((Token::Number(text), _)) => text
                .parse::<i64>()
                .map_err(|_| ParseError::new(format!("expected an integer, found {text}"), span)),
            _ => Err(ParseError::new("expected an integer", span)),
        }
    }
}

fn binary(op: BinaryOp, left: Expr, right: Expr, span: Span) -> Expr {
    Expr::new(ExprKind::Binary(op, Box::new(left), Box::new(right)), span)
}

fn into_symbol(expr: Expr) -> Result<Symbol, ParseError> {
    match expr.kind {
        ExprKind::Symbol(symbol) => Ok(symbol),
        _ => Err(ParseError::new("only a symbol can be assigned", expr.span)),
    }
}
