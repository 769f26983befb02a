//! Haiku syntax tree.
//!
//! Every statement carries the [`Position`] of its first token so that
//! evaluation problems can point back at the source.

use std::fmt;
use std::sync::Arc;

/// 1-based line/column of a token or node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Position {
    pub line: usize,
    pub column: usize,
}

impl Position {
    pub fn new(line: usize, column: usize) -> Self {
        Position { line, column }
    }
}

impl fmt::Display for Position {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.line, self.column)
    }
}

/// Root of a parse: statements in source order.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Program {
    pub statements: Vec<Stmt>,
}

// ── Statements ────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq)]
pub enum Stmt {
    /// `import "path"`
    Import { path: String, pos: Position },
    /// `@name value` or `@name` followed by an indented block.
    VarDef {
        name: String,
        value: Option<Expr>,
        pos: Position,
    },
    Request(RequestStmt),
    For(ForStmt),
    If(IfStmt),
    /// `echo [expr]`
    Echo { value: Option<Expr>, pos: Position },
    /// `---`
    Separator { pos: Position },
}

/// HTTP method keyword that opens a request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Method {
    Get,
    Post,
    Put,
    Delete,
    Patch,
    Head,
    Options,
}

impl Method {
    pub fn from_keyword(word: &str) -> Option<Method> {
        Some(match word {
            "get" => Method::Get,
            "post" => Method::Post,
            "put" => Method::Put,
            "delete" => Method::Delete,
            "patch" => Method::Patch,
            "head" => Method::Head,
            "options" => Method::Options,
            _ => return None,
        })
    }

    /// Lower-case key used in request descriptors.
    pub fn as_str(self) -> &'static str {
        match self {
            Method::Get => "get",
            Method::Post => "post",
            Method::Put => "put",
            Method::Delete => "delete",
            Method::Patch => "patch",
            Method::Head => "head",
            Method::Options => "options",
        }
    }
}

impl fmt::Display for Method {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct RequestStmt {
    pub method: Method,
    pub url: Expr,
    pub headers: Option<Block>,
    pub body: Option<Expr>,
    pub timeout: Option<Expr>,
    pub pos: Position,
}

/// `for`, `for $i, $x in`, numeric `for N`, and their `parallel [N]` forms.
#[derive(Debug, Clone, PartialEq)]
pub struct ForStmt {
    pub item: String,
    pub index: Option<String>,
    pub iterable: Expr,
    /// Shared so parallel tasks can hold the body without cloning the tree.
    pub body: Arc<[Stmt]>,
    pub parallel: bool,
    /// `None` or a non-positive bound means one worker per item.
    pub concurrency: Option<i64>,
    pub pos: Position,
}

/// Both `if/else` and the terse `? :` form parse into this.
#[derive(Debug, Clone, PartialEq)]
pub struct IfStmt {
    pub branches: Vec<Branch>,
    pub else_body: Option<Vec<Stmt>>,
    pub pos: Position,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Branch {
    pub condition: Expr,
    pub body: Vec<Stmt>,
}

// ── Expressions ───────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq)]
pub enum Expr {
    /// Text literal. Unquoted words are type-inferred at evaluation time;
    /// quoted ones are only interpolated.
    Str { value: String, quoted: bool },
    Int(i64),
    Float(f64),
    Bool(bool),
    Null,
    EmptyArray,
    EmptyObject,
    VarRef(VarRef),
    /// `json`...``, `base64`...``, `file`...``
    Processed { processor: String, content: String },
    Block(Block),
    Binary {
        op: BinOp,
        lhs: Box<Expr>,
        rhs: Box<Expr>,
    },
    Unary { op: UnaryOp, operand: Box<Expr> },
}

impl Expr {
    pub fn bare(text: impl Into<String>) -> Expr {
        Expr::Str {
            value: text.into(),
            quoted: false,
        }
    }

    pub fn quoted(text: impl Into<String>) -> Expr {
        Expr::Str {
            value: text.into(),
            quoted: true,
        }
    }
}

/// `$name.seg.seg`; `name` is `_` for the previous response, `env` for the
/// process environment.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VarRef {
    pub name: String,
    pub path: Vec<String>,
}

impl fmt::Display for VarRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "${}", self.name)?;
        for seg in &self.path {
            write!(f, ".{seg}")?;
        }
        Ok(())
    }
}

/// Indented group of entries; a list or a mapping depending on shape.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Block {
    pub entries: Vec<Entry>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Entry {
    pub key: Option<String>,
    pub value: Expr,
}

impl Block {
    /// True when no entry carries a non-empty key. Nested blocks do not
    /// affect the classification of their parent.
    pub fn is_array(&self) -> bool {
        !self
            .entries
            .iter()
            .any(|e| e.key.as_deref().is_some_and(|k| !k.is_empty()))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinOp {
    Concat,
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
    And,
    Or,
}

impl fmt::Display for BinOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            BinOp::Concat => "+",
            BinOp::Eq => "==",
            BinOp::Ne => "!=",
            BinOp::Lt => "<",
            BinOp::Le => "<=",
            BinOp::Gt => ">",
            BinOp::Ge => ">=",
            BinOp::And => "and",
            BinOp::Or => "or",
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnaryOp {
    Not,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(key: Option<&str>, value: Expr) -> Entry {
        Entry {
            key: key.map(str::to_owned),
            value,
        }
    }

    #[test]
    fn bare_items_are_array_shaped() {
        let b = Block {
            entries: vec![entry(None, Expr::bare("api")), entry(None, Expr::bare("http"))],
        };
        assert!(b.is_array());
    }

    #[test]
    fn keyed_entries_are_object_shaped() {
        let b = Block {
            entries: vec![entry(None, Expr::bare("x")), entry(Some("name"), Expr::bare("John"))],
        };
        assert!(!b.is_array());
    }

    #[test]
    fn nested_block_does_not_change_parent_shape() {
        let inner = Block {
            entries: vec![entry(Some("k"), Expr::bare("v"))],
        };
        let b = Block {
            entries: vec![entry(None, Expr::Block(inner)), entry(Some(""), Expr::bare("y"))],
        };
        assert!(b.is_array());
    }

    #[test]
    fn var_ref_display() {
        let v = VarRef {
            name: "_".into(),
            path: vec!["data".into(), "0".into()],
        };
        assert_eq!(v.to_string(), "$_.data.0");
    }
}
