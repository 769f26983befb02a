//! Runtime configuration for an evaluation run.
//!
//! | Setting            | Default | Environment          |
//! |--------------------|---------|----------------------|
//! | `default_timeout`  | `30s`   | `HAIKU_TIMEOUT`      |
//! | `max_import_depth` | `32`    | `HAIKU_IMPORT_DEPTH` |
//! | `base_path`        | `.`     |                      |
//! | `compact`          | off     |                      |
//!
//! Bad environment values are reported but never fatal: the default stays.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;

use crate::script::expand::{infer, parse_timeout};
use crate::script::interp::{Evaluator, DEFAULT_MAX_IMPORT_DEPTH, DEFAULT_TIMEOUT};
use crate::script::parser;

pub const TIMEOUT_ENV: &str = "HAIKU_TIMEOUT";
pub const IMPORT_DEPTH_ENV: &str = "HAIKU_IMPORT_DEPTH";

// ── Public API ────────────────────────────────────────────────────────────────

/// A rejected configuration value.
#[derive(Debug, Error)]
#[error("{key}: {message}")]
pub struct ConfigError {
    pub key: String,
    pub message: String,
}

#[derive(Debug, Clone)]
pub struct Config {
    pub default_timeout: Duration,
    /// Directory relative imports and `file` literals resolve against.
    pub base_path: PathBuf,
    pub max_import_depth: usize,
    /// One JSON document per line instead of pretty output.
    pub compact: bool,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            default_timeout: DEFAULT_TIMEOUT,
            base_path: PathBuf::from("."),
            max_import_depth: DEFAULT_MAX_IMPORT_DEPTH,
            compact: false,
        }
    }
}

impl Config {
    pub fn new() -> Self {
        Self::default()
    }

    /// Defaults overridden from the process environment.
    pub fn from_env() -> (Self, Vec<ConfigError>) {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Defaults overridden by `lookup` (exposed for testing).
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> (Self, Vec<ConfigError>) {
        let mut config = Config::new();
        let mut errors = Vec::new();

        if let Some(raw) = lookup(TIMEOUT_ENV) {
            if let Err(e) = config.set_timeout(&raw) {
                errors.push(e);
            }
        }
        if let Some(raw) = lookup(IMPORT_DEPTH_ENV) {
            match raw.trim().parse::<usize>() {
                Ok(depth) => config.max_import_depth = depth,
                Err(_) => errors.push(ConfigError {
                    key: IMPORT_DEPTH_ENV.to_owned(),
                    message: format!("expected a non-negative integer, got {raw:?}"),
                }),
            }
        }
        (config, errors)
    }

    /// Accepts the same literals as `@timeout` (`10s`, `500ms`, `2m`, `5`).
    pub fn set_timeout(&mut self, raw: &str) -> Result<(), ConfigError> {
        let timeout = parse_timeout(&infer(raw.trim())).map_err(|e| ConfigError {
            key: TIMEOUT_ENV.to_owned(),
            message: e.to_string(),
        })?;
        self.default_timeout = timeout;
        Ok(())
    }

    /// An evaluator using the real file system and the crate's parser.
    pub fn evaluator(&self) -> Evaluator {
        Evaluator::new()
            .with_base_path(self.base_path.clone())
            .with_default_timeout(Some(self.default_timeout))
            .with_max_import_depth(self.max_import_depth)
            .with_parse_hook(Arc::new(parser::parse))
            .with_file_reader(Arc::new(|path: &Path| std::fs::read_to_string(path)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn env<'a>(pairs: &'a [(&'a str, &'a str)]) -> impl Fn(&str) -> Option<String> + 'a {
        move |key| {
            pairs
                .iter()
                .find(|(k, _)| *k == key)
                .map(|(_, v)| (*v).to_owned())
        }
    }

    #[test]
    fn defaults() {
        let (c, errs) = Config::from_lookup(env(&[]));
        assert!(errs.is_empty());
        assert_eq!(c.default_timeout, Duration::from_secs(30));
        assert_eq!(c.max_import_depth, 32);
        assert!(!c.compact);
    }

    #[test]
    fn env_overrides() {
        let (c, errs) = Config::from_lookup(env(&[
            ("HAIKU_TIMEOUT", "500ms"),
            ("HAIKU_IMPORT_DEPTH", "4"),
        ]));
        assert!(errs.is_empty());
        assert_eq!(c.default_timeout, Duration::from_millis(500));
        assert_eq!(c.max_import_depth, 4);
    }

    #[test]
    fn bare_number_is_seconds() {
        let mut c = Config::new();
        c.set_timeout("12").unwrap();
        assert_eq!(c.default_timeout, Duration::from_secs(12));
    }

    #[test]
    fn bad_values_keep_defaults() {
        let (c, errs) = Config::from_lookup(env(&[
            ("HAIKU_TIMEOUT", "whenever"),
            ("HAIKU_IMPORT_DEPTH", "-1"),
        ]));
        assert_eq!(errs.len(), 2);
        assert_eq!(errs[0].key, "HAIKU_TIMEOUT");
        assert_eq!(
            errs[1].to_string(),
            "HAIKU_IMPORT_DEPTH: expected a non-negative integer, got \"-1\""
        );
        assert_eq!(c.default_timeout, Duration::from_secs(30));
        assert_eq!(c.max_import_depth, 32);
    }

    #[tokio::test]
    async fn evaluator_uses_configured_timeout() {
        let mut c = Config::new();
        c.set_timeout("2m").unwrap();
        let mut ev = c.evaluator();
        let reqs = ev.eval_source("get \"https://x\"\n").await.unwrap();
        assert_eq!(reqs[0].timeout, Some(Duration::from_secs(120)));
    }
}
