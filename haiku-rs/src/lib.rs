//! Haiku: an indentation-based language for describing HTTP requests.
//!
//! The [`script`] module holds the language itself; [`config`] and [`cli`]
//! back the `haiku` binary, which resolves a program into request
//! descriptors without sending them.

pub mod cli;
pub mod config;
pub mod error;
pub mod script;

pub use error::{EvalError, ParseErrors};
