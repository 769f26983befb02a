//! The Haiku request language.
//!
//! Source text flows through three stages:
//!
//! - [`lexer`] turns text into tokens, synthesizing `Indent`/`Dedent` from
//!   leading whitespace
//! - [`parser`] builds a [`Program`] and collects every syntax error
//! - [`interp`] evaluates the program into [`RequestDescriptor`]s, running
//!   `parallel for` bodies through [`parallel`]
//!
//! # Quick start
//!
//! ```rust
//! use haiku::script::Evaluator;
//!
//! # tokio::runtime::Runtime::new().unwrap().block_on(async {
//! let mut ev = Evaluator::new();
//! let reqs = ev
//!     .eval_source("@base \"https://api.example.com\"\nget \"$base/users\"\n")
//!     .await
//!     .unwrap();
//! assert_eq!(reqs[0].url_text(), "https://api.example.com/users");
//! # });
//! ```

pub mod ast;
pub mod expand;
pub mod interp;
pub mod lexer;
pub mod parallel;
pub mod parser;
pub mod value;

// Re-exports for convenience.
pub use ast::Program;
pub use interp::{Evaluator, RequestDescriptor};
pub use parser::{parse, parse_with_warnings};
pub use value::Value;
