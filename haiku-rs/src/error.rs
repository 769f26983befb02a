//! Error taxonomy for the Haiku front end and evaluator.
//!
//! Lexical problems never surface here directly: the lexer turns them into
//! `Illegal` tokens and the parser reports them as [`Diagnostic`]s.

use std::fmt;
use std::path::PathBuf;

use thiserror::Error;

use crate::script::ast::Position;

// ── Parse diagnostics ─────────────────────────────────────────────────────────

/// One syntax problem (or recovered warning) at a source position.
#[derive(Debug, Clone, PartialEq)]
pub struct Diagnostic {
    pub pos: Position,
    pub message: String,
}

impl Diagnostic {
    pub fn new(pos: Position, message: impl Into<String>) -> Self {
        Diagnostic {
            pos,
            message: message.into(),
        }
    }
}

impl fmt::Display for Diagnostic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}: {}", self.pos.line, self.pos.column, self.message)
    }
}

/// All syntax errors collected while parsing one source text.
#[derive(Debug, Clone, PartialEq, Error)]
#[error("{}", render_list(.0))]
pub struct ParseErrors(pub Vec<Diagnostic>);

impl ParseErrors {
    pub fn first(&self) -> Option<&Diagnostic> {
        self.0.first()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

fn render_list(diags: &[Diagnostic]) -> String {
    diags
        .iter()
        .map(|d| format!("parse error at {d}"))
        .collect::<Vec<_>>()
        .join("\n")
}

// ── Evaluation errors ─────────────────────────────────────────────────────────

/// Errors raised while evaluating a parsed program.
#[derive(Debug, Error)]
pub enum EvalError {
    #[error("cannot read import {}: {source}", path.display())]
    Import {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("cannot parse import {}:\n{source}", path.display())]
    ImportParse {
        path: PathBuf,
        #[source]
        source: ParseErrors,
    },

    #[error(transparent)]
    Parse(#[from] ParseErrors),

    #[error("in import {}: {source}", path.display())]
    InImport {
        path: PathBuf,
        #[source]
        source: Box<EvalError>,
    },

    #[error("import cycle detected at {}", .0.display())]
    ImportCycle(PathBuf),

    #[error("imports nested deeper than {0} levels")]
    ImportTooDeep(usize),

    #[error("cannot iterate over {0}")]
    InvalidIterable(String),

    #[error("invalid timeout: {0:?}")]
    InvalidTimeout(String),

    #[error("request failed: {0}")]
    Transport(String),

    #[error("parallel execution had {failed} errors (of {total} tasks), first: {first}")]
    Parallel {
        failed: usize,
        total: usize,
        first: Box<EvalError>,
    },

    #[error("parallel task aborted: {0}")]
    TaskAborted(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_errors_render_one_line_each() {
        let errs = ParseErrors(vec![
            Diagnostic::new(Position::new(1, 4), "expected URL after get"),
            Diagnostic::new(Position::new(3, 1), "unexpected character '~'"),
        ]);
        assert_eq!(
            errs.to_string(),
            "parse error at 1:4: expected URL after get\nparse error at 3:1: unexpected character '~'"
        );
        assert_eq!(errs.len(), 2);
    }

    #[test]
    fn parallel_error_mentions_first_failure() {
        let e = EvalError::Parallel {
            failed: 2,
            total: 5,
            first: Box::new(EvalError::Transport("connection refused".into())),
        };
        assert_eq!(
            e.to_string(),
            "parallel execution had 2 errors (of 5 tasks), first: request failed: connection refused"
        );
    }
}
