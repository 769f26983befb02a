//! Recursive-descent parser: token stream → [`Program`].
//!
//! The parser is line-oriented.  Each statement routine consumes its own
//! trailing `Newline`, and indented bodies are bracketed by the lexer's
//! `Indent`/`Dedent` tokens.
//!
//! Recovery is permissive: tokens that cannot start a statement are skipped
//! (together with any block hanging off them) and recorded as warnings.
//! Real syntax errors are collected, and the whole list is reported once the
//! input has been consumed.
//!
//! Condition precedence (lowest → highest):
//!   or  →  and  →  comparison  →  not  →  expression (`+` concatenation)

use std::sync::Arc;

use crate::error::{Diagnostic, ParseErrors};
use super::ast::{
    BinOp, Block, Branch, Entry, Expr, ForStmt, IfStmt, Method, Position, Program, RequestStmt,
    Stmt, UnaryOp, VarRef,
};
use super::lexer::{tokenize_with_warnings, Token, TokenKind};

/// A successful parse plus everything that was recovered from.
#[derive(Debug, Clone, Default)]
pub struct Parsed {
    pub program: Program,
    pub warnings: Vec<Diagnostic>,
}

/// Parse Haiku source into a [`Program`].
pub fn parse(src: &str) -> Result<Program, ParseErrors> {
    parse_with_warnings(src).map(|p| p.program)
}

/// Parse Haiku source, keeping the warnings for skipped or reinterpreted
/// input (unknown statements, trailing tokens, ragged dedents).
pub fn parse_with_warnings(src: &str) -> Result<Parsed, ParseErrors> {
    let (tokens, lex_warnings) = tokenize_with_warnings(src);
    let mut parser = Parser::new(tokens);
    parser.warnings = lex_warnings;
    let statements = parser.parse_statements(false);
    if !parser.errors.is_empty() {
        return Err(ParseErrors(parser.errors));
    }
    Ok(Parsed {
        program: Program { statements },
        warnings: parser.warnings,
    })
}

// ── Parser ────────────────────────────────────────────────────────────────────

struct Parser {
    tokens: Vec<Token>,
    pos: usize,
    errors: Vec<Diagnostic>,
    warnings: Vec<Diagnostic>,
}

impl Parser {
    fn new(mut tokens: Vec<Token>) -> Self {
        if tokens.last().map(|t| t.kind) != Some(TokenKind::Eof) {
            let pos = tokens.last().map(|t| t.pos).unwrap_or_default();
            tokens.push(Token {
                kind: TokenKind::Eof,
                text: String::new(),
                processor: None,
                pos,
            });
        }
        Parser {
            tokens,
            pos: 0,
            errors: Vec::new(),
            warnings: Vec::new(),
        }
    }

    fn peek(&self) -> &Token {
        let last = self.tokens.len() - 1;
        &self.tokens[self.pos.min(last)]
    }

    fn peek_kind(&self) -> TokenKind {
        self.peek().kind
    }

    fn peek_kind_at(&self, offset: usize) -> TokenKind {
        let last = self.tokens.len() - 1;
        self.tokens[(self.pos + offset).min(last)].kind
    }

    fn advance(&mut self) -> Token {
        let tok = self.peek().clone();
        if tok.kind != TokenKind::Eof {
            self.pos += 1;
        }
        tok
    }

    fn at(&self, kind: TokenKind) -> bool {
        self.peek_kind() == kind
    }

    fn eat(&mut self, kind: TokenKind) -> bool {
        if self.at(kind) {
            self.advance();
            true
        } else {
            false
        }
    }

    /// Newline, Dedent, or Eof: nothing more on this logical line.
    fn at_line_end(&self) -> bool {
        matches!(
            self.peek_kind(),
            TokenKind::Newline | TokenKind::Dedent | TokenKind::Eof
        )
    }

    fn error(&mut self, pos: Position, message: impl Into<String>) {
        self.errors.push(Diagnostic::new(pos, message));
    }

    fn warn(&mut self, pos: Position, message: impl Into<String>) {
        self.warnings.push(Diagnostic::new(pos, message));
    }

    /// Consume the rest of the current line including its `Newline`,
    /// warning about anything left over after `what`.
    fn finish_line(&mut self, what: &str) {
        if !self.at_line_end() {
            let tok = self.peek().clone();
            self.warn(tok.pos, format!("ignoring {tok} after {what}"));
            while !self.at_line_end() {
                let t = self.advance();
                if t.kind == TokenKind::Illegal {
                    self.error(t.pos, t.text);
                }
            }
        }
        self.eat(TokenKind::Newline);
    }

    /// Skip an indented block (starting at its `Indent`) without parsing it.
    fn skip_block(&mut self) {
        let mut depth = 0usize;
        loop {
            let t = self.advance();
            match t.kind {
                TokenKind::Indent => depth += 1,
                TokenKind::Dedent => {
                    depth = depth.saturating_sub(1);
                    if depth == 0 {
                        return;
                    }
                }
                TokenKind::Illegal => self.error(t.pos, t.text),
                TokenKind::Eof => return,
                _ => {}
            }
        }
    }

    /// Skip a line that cannot start a statement, and any block under it.
    fn skip_statement(&mut self, message: String) {
        let pos = self.peek().pos;
        self.warn(pos, message);
        self.discard_line();
    }

    fn discard_line(&mut self) {
        while !self.at_line_end() {
            let t = self.advance();
            if t.kind == TokenKind::Illegal {
                self.error(t.pos, t.text);
            }
        }
        if self.eat(TokenKind::Newline) && self.at(TokenKind::Indent) {
            self.skip_block();
        }
    }

    // ── Statements ────────────────────────────────────────────────────────────

    /// Parse statements until end of input, or (when `nested`) until the
    /// `Dedent` closing the current block, which is left for the caller.
    fn parse_statements(&mut self, nested: bool) -> Vec<Stmt> {
        let mut stmts = Vec::new();
        loop {
            match self.peek_kind() {
                TokenKind::Eof => break,
                TokenKind::Dedent if nested => break,
                TokenKind::Dedent | TokenKind::Newline => {
                    self.advance();
                }
                TokenKind::Indent => {
                    let pos = self.advance().pos;
                    self.warn(pos, "unexpected indentation; block parsed in place");
                    stmts.extend(self.parse_statements(true));
                    self.eat(TokenKind::Dedent);
                }
                _ => {
                    if let Some(stmt) = self.parse_statement() {
                        stmts.push(stmt);
                    }
                }
            }
        }
        stmts
    }

    /// Indented statement body following a header line.
    fn parse_body(&mut self, owner: &str) -> Vec<Stmt> {
        if !self.eat(TokenKind::Indent) {
            let pos = self.peek().pos;
            self.warn(pos, format!("{owner} has no indented body"));
            return Vec::new();
        }
        let body = self.parse_statements(true);
        self.eat(TokenKind::Dedent);
        body
    }

    fn parse_statement(&mut self) -> Option<Stmt> {
        let tok = self.peek().clone();
        match tok.kind {
            TokenKind::Import => self.parse_import(),
            TokenKind::At => self.parse_var_def(),
            TokenKind::Method => Some(self.parse_request()),
            TokenKind::For => self.parse_for(false, None, tok.pos),
            TokenKind::Parallel => self.parse_parallel_for(),
            TokenKind::If => Some(self.parse_if()),
            TokenKind::Question => Some(self.parse_terse_if()),
            TokenKind::Echo => Some(self.parse_echo()),
            TokenKind::Separator => {
                self.advance();
                self.finish_line("---");
                Some(Stmt::Separator { pos: tok.pos })
            }
            TokenKind::Illegal => {
                self.advance();
                self.warn(tok.pos, format!("skipping line starting with {tok}"));
                self.discard_line();
                None
            }
            _ => {
                self.skip_statement(format!("skipping unexpected {tok} at statement start"));
                None
            }
        }
    }

    fn parse_import(&mut self) -> Option<Stmt> {
        let pos = self.advance().pos;
        if !self.at(TokenKind::Str) {
            let found = self.peek().to_string();
            self.error(pos, format!("expected a quoted path after import, found {found}"));
            self.finish_line("import");
            return None;
        }
        let path = self.advance().text;
        self.finish_line("import path");
        Some(Stmt::Import { path, pos })
    }

    fn parse_var_def(&mut self) -> Option<Stmt> {
        let pos = self.advance().pos;
        if !self.peek_kind().is_word() {
            let found = self.peek().to_string();
            self.error(pos, format!("expected a variable name after @, found {found}"));
            self.finish_line("@");
            return None;
        }
        let name = self.advance().text;

        let value = if self.at(TokenKind::Newline) {
            self.advance();
            if self.at(TokenKind::Indent) {
                Some(Expr::Block(self.parse_block()))
            } else {
                None
            }
        } else if self.at_line_end() {
            None
        } else {
            let value = if name == "timeout" {
                self.parse_timeout_value()
            } else {
                self.parse_expression()
            };
            self.finish_line(&format!("@{name} value"));
            Some(value)
        };
        Some(Stmt::VarDef { name, value, pos })
    }

    fn parse_request(&mut self) -> Stmt {
        let tok = self.advance();
        // The lexer only produces Method tokens for method words.
        let method = Method::from_keyword(&tok.text).unwrap_or(Method::Get);
        let url = if self.at_line_end() {
            self.error(tok.pos, format!("expected a URL after {method}"));
            Expr::Null
        } else {
            self.parse_expression()
        };
        self.finish_line("request URL");

        let mut req = RequestStmt {
            method,
            url,
            headers: None,
            body: None,
            timeout: None,
            pos: tok.pos,
        };

        // Sections sit at the same indentation as the method line.
        loop {
            while self.eat(TokenKind::Newline) {}
            match self.peek_kind() {
                TokenKind::Headers => {
                    let pos = self.advance().pos;
                    if !self.at_line_end() {
                        self.error(pos, "expected an indented block after headers");
                        self.finish_line("headers");
                    } else if self.eat(TokenKind::Newline) && self.at(TokenKind::Indent) {
                        req.headers = Some(self.parse_block());
                    }
                }
                TokenKind::Body => {
                    self.advance();
                    if !self.at_line_end() {
                        req.body = Some(self.parse_expression());
                        self.finish_line("body");
                    } else if self.eat(TokenKind::Newline) && self.at(TokenKind::Indent) {
                        req.body = Some(Expr::Block(self.parse_block()));
                    }
                }
                TokenKind::Timeout => {
                    let pos = self.advance().pos;
                    if self.at_line_end() {
                        self.error(pos, "expected a value after timeout");
                    } else {
                        req.timeout = Some(self.parse_timeout_value());
                    }
                    self.finish_line("timeout");
                }
                _ => break,
            }
        }
        Stmt::Request(req)
    }

    fn parse_parallel_for(&mut self) -> Option<Stmt> {
        let pos = self.advance().pos;
        let mut concurrency = None;
        if self.at(TokenKind::Int) {
            let tok = self.advance();
            match tok.text.parse::<i64>() {
                Ok(n) => concurrency = Some(n),
                Err(_) => self.error(tok.pos, format!("invalid concurrency {:?}", tok.text)),
            }
        }
        if !self.at(TokenKind::For) {
            let found = self.peek().to_string();
            self.error(pos, format!("expected `for` after parallel, found {found}"));
            self.skip_statement("skipping malformed parallel loop".to_owned());
            return None;
        }
        self.parse_for(true, concurrency, pos)
    }

    fn parse_for(&mut self, parallel: bool, concurrency: Option<i64>, pos: Position) -> Option<Stmt> {
        self.advance(); // `for`
        let (item, index, iterable) = match self.peek_kind() {
            TokenKind::Int | TokenKind::Float => ("index".to_owned(), None, self.parse_primary()),
            TokenKind::Dollar => {
                let first = self.parse_loop_var()?;
                let (item, index) = if self.eat(TokenKind::Comma) {
                    (self.parse_loop_var()?, Some(first))
                } else {
                    (first, None)
                };
                if !self.eat(TokenKind::In) {
                    let found = self.peek().to_string();
                    self.error(pos, format!("expected `in` in for loop, found {found}"));
                    self.skip_statement("skipping malformed for loop".to_owned());
                    return None;
                }
                if self.at_line_end() {
                    self.error(pos, "expected an iterable after `in`");
                }
                (item, index, self.parse_expression())
            }
            _ => {
                let found = self.peek().to_string();
                self.error(pos, format!("expected a loop variable or count after for, found {found}"));
                self.skip_statement("skipping malformed for loop".to_owned());
                return None;
            }
        };
        self.finish_line("for header");
        let body = self.parse_body("for loop");
        Some(Stmt::For(ForStmt {
            item,
            index,
            iterable,
            body: Arc::from(body),
            parallel,
            concurrency,
            pos,
        }))
    }

    /// `$name` in a loop header.
    fn parse_loop_var(&mut self) -> Option<String> {
        let pos = self.peek().pos;
        if self.eat(TokenKind::Dollar) && self.peek_kind().is_word() {
            return Some(self.advance().text);
        }
        let found = self.peek().to_string();
        self.error(pos, format!("expected $name in for loop, found {found}"));
        self.skip_statement("skipping malformed for loop".to_owned());
        None
    }

    fn parse_if(&mut self) -> Stmt {
        let pos = self.advance().pos;
        let mut branches = vec![self.parse_branch("if")];
        let mut else_body = None;
        while self.at(TokenKind::Else) {
            self.advance();
            if self.eat(TokenKind::If) {
                branches.push(self.parse_branch("else if"));
                continue;
            }
            self.finish_line("else");
            else_body = Some(self.parse_body("else"));
            break;
        }
        Stmt::If(IfStmt {
            branches,
            else_body,
            pos,
        })
    }

    /// `? cond` / `: cond` / `:` chain.
    fn parse_terse_if(&mut self) -> Stmt {
        let pos = self.advance().pos;
        let mut branches = vec![self.parse_branch("?")];
        let mut else_body = None;
        while self.at(TokenKind::Colon) {
            self.advance();
            if self.eat(TokenKind::Newline) {
                else_body = Some(self.parse_body(":"));
                break;
            }
            branches.push(self.parse_branch(":"));
        }
        Stmt::If(IfStmt {
            branches,
            else_body,
            pos,
        })
    }

    fn parse_branch(&mut self, owner: &str) -> Branch {
        let condition = self.parse_condition();
        self.finish_line("condition");
        let body = self.parse_body(owner);
        Branch { condition, body }
    }

    fn parse_echo(&mut self) -> Stmt {
        let pos = self.advance().pos;
        let value = if self.at_line_end() {
            None
        } else {
            Some(self.parse_expression())
        };
        self.finish_line("echo");
        Stmt::Echo { value, pos }
    }

    // ── Blocks ────────────────────────────────────────────────────────────────

    /// Indented entry block; the current token is its `Indent`.
    fn parse_block(&mut self) -> Block {
        self.advance(); // Indent
        let mut block = Block::default();
        loop {
            match self.peek_kind() {
                TokenKind::Dedent => {
                    self.advance();
                    break;
                }
                TokenKind::Eof => break,
                TokenKind::Newline => {
                    self.advance();
                }
                TokenKind::Indent => {
                    let pos = self.peek().pos;
                    self.warn(pos, "skipping indented block with no owning entry");
                    self.skip_block();
                }
                _ => {
                    if let Some(entry) = self.parse_entry() {
                        block.entries.push(entry);
                    }
                }
            }
        }
        block
    }

    /// `value`, `key value`, or `key` followed by a nested block.
    fn parse_entry(&mut self) -> Option<Entry> {
        let tok = self.peek().clone();
        let keyish = tok.kind.is_word() || tok.kind == TokenKind::Str;
        if keyish && !self.is_line_end_at(1) {
            self.advance();
            let value = self.parse_expression();
            self.finish_line(&format!("value of {:?}", tok.text));
            let value = if self.at(TokenKind::Indent) {
                self.warn(tok.pos, format!("nested block replaces inline value of {:?}", tok.text));
                Expr::Block(self.parse_block())
            } else {
                value
            };
            return Some(Entry {
                key: Some(tok.text),
                value,
            });
        }

        if !keyish && !self.can_start_expression() {
            if tok.kind == TokenKind::Illegal {
                self.error(tok.pos, tok.text.clone());
            }
            self.skip_statement(format!("skipping unexpected {tok} in block"));
            return None;
        }

        let value = self.parse_expression();
        self.finish_line("block item");
        if self.at(TokenKind::Indent) {
            // A lone word introducing a nested block names that block.
            if keyish {
                return Some(Entry {
                    key: Some(tok.text),
                    value: Expr::Block(self.parse_block()),
                });
            }
            self.warn(tok.pos, "skipping nested block under a non-key item");
            self.skip_block();
        }
        Some(Entry { key: None, value })
    }

    fn is_line_end_at(&self, offset: usize) -> bool {
        matches!(
            self.peek_kind_at(offset),
            TokenKind::Newline | TokenKind::Dedent | TokenKind::Eof
        )
    }

    fn can_start_expression(&self) -> bool {
        let kind = self.peek_kind();
        kind.is_word()
            || matches!(
                kind,
                TokenKind::Str
                    | TokenKind::Int
                    | TokenKind::Float
                    | TokenKind::Processed
                    | TokenKind::Dollar
                    | TokenKind::EmptyArray
                    | TokenKind::EmptyObject
            )
    }

    // ── Expressions ───────────────────────────────────────────────────────────

    fn parse_condition(&mut self) -> Expr {
        self.parse_or()
    }

    fn parse_or(&mut self) -> Expr {
        let mut lhs = self.parse_and();
        while self.eat(TokenKind::Or) {
            let rhs = self.parse_and();
            lhs = Expr::Binary {
                op: BinOp::Or,
                lhs: Box::new(lhs),
                rhs: Box::new(rhs),
            };
        }
        lhs
    }

    fn parse_and(&mut self) -> Expr {
        let mut lhs = self.parse_comparison();
        while self.eat(TokenKind::And) {
            let rhs = self.parse_comparison();
            lhs = Expr::Binary {
                op: BinOp::And,
                lhs: Box::new(lhs),
                rhs: Box::new(rhs),
            };
        }
        lhs
    }

    fn parse_comparison(&mut self) -> Expr {
        let mut lhs = self.parse_unary();
        loop {
            let op = match self.peek_kind() {
                TokenKind::Eq => BinOp::Eq,
                TokenKind::Ne => BinOp::Ne,
                TokenKind::Gt => BinOp::Gt,
                TokenKind::Lt => BinOp::Lt,
                TokenKind::Ge => BinOp::Ge,
                TokenKind::Le => BinOp::Le,
                _ => return lhs,
            };
            self.advance();
            let rhs = self.parse_unary();
            lhs = Expr::Binary {
                op,
                lhs: Box::new(lhs),
                rhs: Box::new(rhs),
            };
        }
    }

    fn parse_unary(&mut self) -> Expr {
        if self.eat(TokenKind::Not) {
            let operand = self.parse_unary();
            return Expr::Unary {
                op: UnaryOp::Not,
                operand: Box::new(operand),
            };
        }
        self.parse_expression()
    }

    /// Primary, optionally followed by `+ primary`*.
    fn parse_expression(&mut self) -> Expr {
        let mut lhs = self.parse_primary();
        while self.eat(TokenKind::Plus) {
            let rhs = self.parse_primary();
            lhs = Expr::Binary {
                op: BinOp::Concat,
                lhs: Box::new(lhs),
                rhs: Box::new(rhs),
            };
        }
        lhs
    }

    fn parse_primary(&mut self) -> Expr {
        let tok = self.peek().clone();
        match tok.kind {
            TokenKind::Str => {
                self.advance();
                Expr::quoted(tok.text)
            }
            TokenKind::Int => {
                self.advance();
                match tok.text.parse() {
                    Ok(n) => Expr::Int(n),
                    Err(_) => Expr::Float(tok.text.parse().unwrap_or(f64::NAN)),
                }
            }
            TokenKind::Float => {
                self.advance();
                match tok.text.parse() {
                    Ok(x) => Expr::Float(x),
                    Err(_) => {
                        self.error(tok.pos, format!("invalid number {:?}", tok.text));
                        Expr::Null
                    }
                }
            }
            TokenKind::EmptyArray => {
                self.advance();
                Expr::EmptyArray
            }
            TokenKind::EmptyObject => {
                self.advance();
                Expr::EmptyObject
            }
            TokenKind::Dollar => Expr::VarRef(self.parse_var_ref()),
            TokenKind::Processed => {
                self.advance();
                Expr::Processed {
                    processor: tok.processor.unwrap_or_default(),
                    content: tok.text,
                }
            }
            kind if kind.is_word() => {
                self.advance();
                match tok.text.as_str() {
                    "true" => Expr::Bool(true),
                    "false" => Expr::Bool(false),
                    "null" | "nil" | "_" => Expr::Null,
                    _ => Expr::bare(tok.text),
                }
            }
            TokenKind::Illegal => {
                self.advance();
                self.error(tok.pos, tok.text);
                Expr::Null
            }
            _ => {
                self.error(tok.pos, format!("expected a value, found {tok}"));
                if !self.at_line_end() && !self.at(TokenKind::Indent) {
                    self.advance();
                }
                Expr::Null
            }
        }
    }

    /// `$name(.segment)*`; segments are words or integer indexes.
    fn parse_var_ref(&mut self) -> VarRef {
        let dollar = self.advance();
        let name = if self.peek_kind().is_word() {
            self.advance().text
        } else {
            let found = self.peek().to_string();
            self.error(dollar.pos, format!("expected a variable name after $, found {found}"));
            String::new()
        };

        let mut path = Vec::new();
        while self.at(TokenKind::Dot) {
            let seg_kind = self.peek_kind_at(1);
            if !(seg_kind.is_word() || matches!(seg_kind, TokenKind::Int | TokenKind::Float)) {
                break;
            }
            self.advance(); // `.`
            let seg = self.advance();
            if seg.kind == TokenKind::Float {
                // `$a.0.1` lexes the last two segments as one decimal.
                path.extend(seg.text.split('.').map(str::to_owned));
            } else {
                path.push(seg.text);
            }
        }
        VarRef { name, path }
    }

    /// Timeout values merge `30` + `s` into the bare literal `30s`.
    fn parse_timeout_value(&mut self) -> Expr {
        let number = matches!(self.peek_kind(), TokenKind::Int | TokenKind::Float);
        if number && self.peek_kind_at(1) == TokenKind::Ident {
            let n = self.advance();
            let unit = self.advance();
            return Expr::bare(format!("{}{}", n.text, unit.text));
        }
        self.parse_expression()
    }
}
