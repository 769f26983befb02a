//! Indentation-aware tokenizer.
//!
//! Leading whitespace of each logical line is measured (space = 1, tab = 4)
//! and turned into `Indent`/`Dedent` tokens against a stack of open levels.
//! Blank and comment-only lines never touch the stack.  Nothing in here
//! fails: malformed input becomes an [`TokenKind::Illegal`] token whose text
//! describes the problem, and the parser decides what to do with it.

use std::fmt;

use crate::error::Diagnostic;
use super::ast::Position;

// ── Tokens ────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TokenKind {
    Eof,
    /// Unrecognised input; `text` holds a description.
    Illegal,
    Newline,
    Indent,
    Dedent,

    // Literals
    Ident,
    Str,
    Int,
    Float,
    /// `tag`...``; `text` is the raw payload, `processor` the tag.
    Processed,

    // Keywords
    Import,
    For,
    In,
    Parallel,
    If,
    Else,
    Echo,
    /// Any HTTP method word; `text` is the method.
    Method,
    Headers,
    Body,
    Timeout,
    And,
    Or,
    Not,

    // Symbols
    At,
    Dollar,
    Dot,
    Comma,
    Plus,
    Colon,
    Question,
    Eq,
    Ne,
    Gt,
    Lt,
    Ge,
    Le,
    EmptyArray,
    EmptyObject,
    /// `---`
    Separator,
}

impl TokenKind {
    /// Keywords that may still appear where a plain word is expected
    /// (variable names, block keys, bare values).
    pub fn is_word(self) -> bool {
        matches!(
            self,
            TokenKind::Ident
                | TokenKind::Import
                | TokenKind::For
                | TokenKind::In
                | TokenKind::Parallel
                | TokenKind::If
                | TokenKind::Else
                | TokenKind::Echo
                | TokenKind::Method
                | TokenKind::Headers
                | TokenKind::Body
                | TokenKind::Timeout
                | TokenKind::And
                | TokenKind::Or
                | TokenKind::Not
        )
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Token {
    pub kind: TokenKind,
    pub text: String,
    pub processor: Option<String>,
    pub pos: Position,
}

impl Token {
    fn new(kind: TokenKind, text: impl Into<String>, pos: Position) -> Self {
        Token {
            kind,
            text: text.into(),
            processor: None,
            pos,
        }
    }
}

impl fmt::Display for Token {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.kind {
            TokenKind::Eof => f.write_str("end of input"),
            TokenKind::Newline => f.write_str("end of line"),
            TokenKind::Indent => f.write_str("indent"),
            TokenKind::Dedent => f.write_str("dedent"),
            TokenKind::Str => write!(f, "string {:?}", self.text),
            TokenKind::Processed => write!(
                f,
                "{}`...` literal",
                self.processor.as_deref().unwrap_or_default()
            ),
            TokenKind::Illegal => f.write_str(&self.text),
            _ => write!(f, "`{}`", self.text),
        }
    }
}

fn keyword(word: &str) -> TokenKind {
    match word {
        "import" => TokenKind::Import,
        "for" => TokenKind::For,
        "in" => TokenKind::In,
        "parallel" => TokenKind::Parallel,
        "if" => TokenKind::If,
        "else" => TokenKind::Else,
        "echo" => TokenKind::Echo,
        "get" | "post" | "put" | "delete" | "patch" | "head" | "options" => TokenKind::Method,
        "headers" => TokenKind::Headers,
        "body" => TokenKind::Body,
        "timeout" => TokenKind::Timeout,
        "and" => TokenKind::And,
        "or" => TokenKind::Or,
        "not" => TokenKind::Not,
        _ => TokenKind::Ident,
    }
}

fn is_ident_start(c: char) -> bool {
    c.is_alphabetic() || c == '_'
}

fn is_ident_char(c: char) -> bool {
    c.is_alphanumeric() || c == '_' || c == '-'
}

// ── Lexer ─────────────────────────────────────────────────────────────────────

/// Tokenize `src`, discarding indentation warnings.
pub fn tokenize(src: &str) -> Vec<Token> {
    Lexer::new(src).run().0
}

/// Tokenize `src`, also returning recovered indentation warnings.
pub fn tokenize_with_warnings(src: &str) -> (Vec<Token>, Vec<Diagnostic>) {
    Lexer::new(src).run()
}

struct Lexer {
    chars: Vec<char>,
    pos: usize,
    line: usize,
    column: usize,
    /// Open indentation levels; never empty, bottom is the file's base level.
    indent_stack: Vec<usize>,
    at_line_start: bool,
    out: Vec<Token>,
    warnings: Vec<Diagnostic>,
}

impl Lexer {
    fn new(src: &str) -> Self {
        Lexer {
            chars: src.chars().collect(),
            pos: 0,
            line: 1,
            column: 1,
            indent_stack: vec![0],
            at_line_start: true,
            out: Vec::new(),
            warnings: Vec::new(),
        }
    }

    fn peek(&self) -> Option<char> {
        self.chars.get(self.pos).copied()
    }

    fn peek_at(&self, offset: usize) -> Option<char> {
        self.chars.get(self.pos + offset).copied()
    }

    fn advance(&mut self) -> Option<char> {
        let ch = self.peek()?;
        self.pos += 1;
        let line_break = ch == '\n' || (ch == '\r' && self.peek() != Some('\n'));
        if line_break {
            self.line += 1;
            self.column = 1;
        } else {
            self.column += 1;
        }
        Some(ch)
    }

    fn eat(&mut self, ch: char) -> bool {
        if self.peek() == Some(ch) {
            self.advance();
            true
        } else {
            false
        }
    }

    fn position(&self) -> Position {
        Position::new(self.line, self.column)
    }

    fn push(&mut self, kind: TokenKind, text: impl Into<String>, pos: Position) {
        self.out.push(Token::new(kind, text, pos));
    }

    fn run(mut self) -> (Vec<Token>, Vec<Diagnostic>) {
        loop {
            if self.at_line_start {
                self.at_line_start = false;
                self.handle_indentation();
            }
            self.skip_spaces();
            let start = self.position();
            let Some(ch) = self.peek() else { break };
            match ch {
                '\n' | '\r' => {
                    self.advance();
                    if ch == '\r' {
                        self.eat('\n');
                    }
                    self.push(TokenKind::Newline, "\n", start);
                    self.at_line_start = true;
                }
                '#' => self.skip_comment(),
                '"' => self.read_string(start),
                '0'..='9' => self.read_number(start),
                '-' => self.read_dash(start),
                c if is_ident_start(c) => self.read_word(start),
                _ => self.read_symbol(start),
            }
        }

        // Close whatever is still open so Indent/Dedent always balance.
        let end = self.position();
        while self.indent_stack.len() > 1 {
            self.indent_stack.pop();
            self.push(TokenKind::Dedent, "", end);
        }
        self.push(TokenKind::Eof, "", end);
        (self.out, self.warnings)
    }

    fn skip_spaces(&mut self) {
        while matches!(self.peek(), Some(' ' | '\t')) {
            self.advance();
        }
    }

    fn skip_comment(&mut self) {
        while !matches!(self.peek(), None | Some('\n' | '\r')) {
            self.advance();
        }
    }

    /// Measure the indentation of the next non-blank, non-comment line and
    /// emit the structural tokens it implies.
    fn handle_indentation(&mut self) {
        loop {
            let mut width = 0;
            while let Some(c @ (' ' | '\t')) = self.peek() {
                width += if c == '\t' { 4 } else { 1 };
                self.advance();
            }
            match self.peek() {
                None => return,
                Some('\n' | '\r') => {
                    if self.advance() == Some('\r') {
                        self.eat('\n');
                    }
                    continue;
                }
                Some('#') => {
                    self.skip_comment();
                    continue;
                }
                Some(_) => {}
            }

            let pos = self.position();
            let current = self.current_level();
            if width > current {
                self.indent_stack.push(width);
                self.push(TokenKind::Indent, "", pos);
            } else if width < current {
                while self.indent_stack.len() > 1 && self.current_level() > width {
                    self.indent_stack.pop();
                    self.push(TokenKind::Dedent, "", pos);
                }
                if self.current_level() != width {
                    // Ragged dedent: the line joins the nearest enclosing
                    // level; the stack itself is left alone.
                    self.warnings.push(Diagnostic::new(
                        pos,
                        format!(
                            "inconsistent dedent to width {width}; treated as level {}",
                            self.current_level()
                        ),
                    ));
                }
            }
            return;
        }
    }

    fn current_level(&self) -> usize {
        self.indent_stack.last().copied().unwrap_or(0)
    }

    fn read_string(&mut self, start: Position) {
        self.advance(); // opening quote
        let mut s = String::new();
        loop {
            match self.advance() {
                None => {
                    self.push(TokenKind::Illegal, "unterminated string literal", start);
                    return;
                }
                Some('"') => break,
                Some('\\') => match self.advance() {
                    Some('n') => s.push('\n'),
                    Some('t') => s.push('\t'),
                    Some('r') => s.push('\r'),
                    Some(c @ ('"' | '\\')) => s.push(c),
                    Some(c) => {
                        s.push('\\');
                        s.push(c);
                    }
                    None => {
                        self.push(TokenKind::Illegal, "unterminated string literal", start);
                        return;
                    }
                },
                Some(c) => s.push(c),
            }
        }
        self.push(TokenKind::Str, s, start);
    }

    fn read_number(&mut self, start: Position) {
        let mut s = String::new();
        if self.eat('-') {
            s.push('-');
        }
        while let Some(c @ '0'..='9') = self.peek() {
            s.push(c);
            self.advance();
        }
        let mut is_float = false;
        if self.peek() == Some('.') && matches!(self.peek_at(1), Some('0'..='9')) {
            is_float = true;
            s.push('.');
            self.advance();
            while let Some(c @ '0'..='9') = self.peek() {
                s.push(c);
                self.advance();
            }
        }
        // Integers too large for i64 are still valid numbers.
        if !is_float && s.parse::<i64>().is_err() {
            is_float = true;
        }
        let kind = if is_float { TokenKind::Float } else { TokenKind::Int };
        self.push(kind, s, start);
    }

    /// `---` separator, `-12` negative number, or a word such as `-x`.
    fn read_dash(&mut self, start: Position) {
        if self.peek_at(1) == Some('-') && self.peek_at(2) == Some('-') {
            for _ in 0..3 {
                self.advance();
            }
            self.push(TokenKind::Separator, "---", start);
        } else if matches!(self.peek_at(1), Some('0'..='9')) {
            self.read_number(start);
        } else {
            let word = self.take_ident_chars();
            self.push(TokenKind::Ident, word, start);
        }
    }

    fn take_ident_chars(&mut self) -> String {
        let mut s = String::new();
        while let Some(c) = self.peek().filter(|&c| is_ident_char(c)) {
            s.push(c);
            self.advance();
        }
        s
    }

    fn read_word(&mut self, start: Position) {
        let word = self.take_ident_chars();
        if self.peek() != Some('`') {
            let kind = keyword(&word);
            self.push(kind, word, start);
            return;
        }

        self.advance(); // opening backtick
        let mut content = String::new();
        loop {
            match self.advance() {
                None => {
                    self.push(TokenKind::Illegal, "unterminated backtick literal", start);
                    return;
                }
                Some('`') => break,
                Some(c) => content.push(c),
            }
        }
        self.out.push(Token {
            kind: TokenKind::Processed,
            text: content,
            processor: Some(word),
            pos: start,
        });
    }

    fn read_symbol(&mut self, start: Position) {
        let Some(ch) = self.advance() else { return };
        let (kind, text) = match ch {
            '@' => (TokenKind::At, "@"),
            '$' => (TokenKind::Dollar, "$"),
            '.' => (TokenKind::Dot, "."),
            ',' => (TokenKind::Comma, ","),
            '+' => (TokenKind::Plus, "+"),
            ':' => (TokenKind::Colon, ":"),
            '?' => (TokenKind::Question, "?"),
            '=' if self.eat('=') => (TokenKind::Eq, "=="),
            '!' if self.eat('=') => (TokenKind::Ne, "!="),
            '!' => (TokenKind::Not, "!"),
            '>' if self.eat('=') => (TokenKind::Ge, ">="),
            '>' => (TokenKind::Gt, ">"),
            '<' if self.eat('=') => (TokenKind::Le, "<="),
            '<' => (TokenKind::Lt, "<"),
            '&' if self.eat('&') => (TokenKind::And, "&&"),
            '|' if self.eat('|') => (TokenKind::Or, "||"),
            '[' if self.eat(']') => (TokenKind::EmptyArray, "[]"),
            '{' if self.eat('}') => (TokenKind::EmptyObject, "{}"),
            c => {
                self.push(
                    TokenKind::Illegal,
                    format!("unexpected character {c:?}"),
                    start,
                );
                return;
            }
        };
        self.push(kind, text, start);
    }
}
