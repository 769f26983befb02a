//! Scalar inference, string interpolation, and literal decoding.
//!
//! Interpolation forms recognised inside quoted strings:
//!
//! | Sequence        | Meaning                                              |
//! |-----------------|------------------------------------------------------|
//! | `$name`         | Variable from the current scope chain                |
//! | `$name.a.0`     | Same, navigated by key / list index                  |
//! | `$_`, `$_.path` | Previous response                                    |
//! | `$env.NAME`     | Process environment variable (empty when unset)      |
//!
//! A reference that cannot be resolved stays in the text unchanged.

use std::sync::OnceLock;
use std::time::Duration;

use base64::Engine as _;
use base64::engine::general_purpose::STANDARD;
use regex::Regex;

use crate::error::EvalError;
use super::value::Value;

// ── Resolver ──────────────────────────────────────────────────────────────────

/// Variable lookup used by interpolation.
///
/// The evaluator implements this over its scope chain, previous response,
/// and the process environment.
pub trait Resolver {
    /// Resolve `$name.path...`.  `None` means unresolvable (unknown name or
    /// a path that does not lead anywhere); a genuine null is `Some(Null)`.
    fn resolve(&self, name: &str, path: &[&str]) -> Option<Value>;
}

fn is_ref_char(c: char) -> bool {
    c.is_ascii_alphanumeric() || c == '_'
}

/// Replace every `$ref` in `src` with its resolved textual form.
pub fn interpolate(src: &str, ctx: &dyn Resolver) -> String {
    if !src.contains('$') {
        return src.to_owned();
    }
    let mut out = String::with_capacity(src.len());
    let mut chars = src.char_indices().peekable();

    while let Some((start, ch)) = chars.next() {
        if ch != '$' {
            out.push(ch);
            continue;
        }
        let mut end = start + 1;
        while let Some(&(i, c)) = chars.peek() {
            if !(is_ref_char(c) || c == '.') {
                break;
            }
            end = i + c.len_utf8();
            chars.next();
        }
        let run = &src[start + 1..end];
        // Trailing dots are punctuation ("costs $price."), not path syntax.
        let reference = run.trim_end_matches('.');
        let tail = &run[reference.len()..];

        let mut parts = reference.split('.');
        let resolved = match parts.next() {
            Some(name) if !name.is_empty() => {
                let path: Vec<&str> = parts.collect();
                ctx.resolve(name, &path)
            }
            _ => None,
        };
        match resolved {
            Some(value) => out.push_str(&value.to_string()),
            None => {
                out.push('$');
                out.push_str(reference);
            }
        }
        out.push_str(tail);
    }
    out
}

// ── Inference ─────────────────────────────────────────────────────────────────

/// Type of an unquoted scalar: bool, null, integer, float, else string.
pub fn infer(text: &str) -> Value {
    match text {
        "true" => return Value::Bool(true),
        "false" => return Value::Bool(false),
        "_" | "null" | "nil" => return Value::Null,
        _ => {}
    }
    if let Ok(n) = text.parse::<i64>() {
        return Value::Int(n);
    }
    // Words like "inf" or "NaN" stay strings.
    let numeric_start = text
        .chars()
        .next()
        .is_some_and(|c| c.is_ascii_digit() || matches!(c, '-' | '+' | '.'));
    if numeric_start {
        if let Ok(x) = text.parse::<f64>() {
            if x.is_finite() {
                return Value::Float(x);
            }
        }
    }
    Value::Str(text.to_owned())
}

// ── Processed literals ────────────────────────────────────────────────────────

/// Decode a `tag`...`` literal.  Every processor falls back to the raw text.
///
/// `read_file` resolves the `file` processor's path; `None` means unreadable.
pub fn decode_processed(
    processor: &str,
    content: &str,
    read_file: impl FnOnce(&str) -> Option<String>,
) -> Value {
    match processor {
        "json" => parse_json(content).unwrap_or_else(|| Value::Str(content.to_owned())),
        "base64" => STANDARD
            .decode(content.trim())
            .ok()
            .and_then(|bytes| String::from_utf8(bytes).ok())
            .map(Value::Str)
            .unwrap_or_else(|| Value::Str(content.to_owned())),
        "file" => match read_file(content.trim()) {
            Some(text) => parse_json(&text).unwrap_or(Value::Str(text)),
            None => Value::Str(content.to_owned()),
        },
        _ => Value::Str(content.to_owned()),
    }
}

fn parse_json(text: &str) -> Option<Value> {
    serde_json::from_str::<serde_json::Value>(text)
        .ok()
        .map(Value::from)
}

// ── Timeouts ──────────────────────────────────────────────────────────────────

fn timeout_pattern() -> Option<&'static Regex> {
    static PATTERN: OnceLock<Option<Regex>> = OnceLock::new();
    PATTERN
        .get_or_init(|| Regex::new(r"^(\d+(?:\.\d+)?)\s*([A-Za-z]*)$").ok())
        .as_ref()
}

/// Interpret a timeout value: numbers are seconds, strings carry an
/// optional unit (`s`/`sec`/`seconds`, `ms`/`msec`/`milliseconds`,
/// `us`/`usec`/`microseconds`, `ns`/`nanoseconds`, `m`/`min`/`minutes`).
pub fn parse_timeout(value: &Value) -> Result<Duration, EvalError> {
    let invalid = || EvalError::InvalidTimeout(value.to_string());
    match value {
        Value::Int(n) => u64::try_from(*n).map(Duration::from_secs).map_err(|_| invalid()),
        Value::Float(x) => Duration::try_from_secs_f64(*x).map_err(|_| invalid()),
        Value::Str(s) => parse_timeout_str(s).ok_or_else(invalid),
        _ => Err(invalid()),
    }
}

fn parse_timeout_str(text: &str) -> Option<Duration> {
    let caps = timeout_pattern()?.captures(text.trim())?;
    let amount = caps.get(1)?.as_str();
    let unit = caps.get(2).map_or("", |m| m.as_str()).to_ascii_lowercase();
    let nanos_per_unit: u64 = match unit.as_str() {
        "" | "s" | "sec" | "second" | "seconds" => 1_000_000_000,
        "ms" | "msec" | "millisecond" | "milliseconds" => 1_000_000,
        "us" | "usec" | "microsecond" | "microseconds" => 1_000,
        "ns" | "nanosecond" | "nanoseconds" => 1,
        "m" | "min" | "minute" | "minutes" => 60_000_000_000,
        _ => return None,
    };
    // Whole amounts stay exact; fractional ones go through f64.
    match amount.parse::<u64>() {
        Ok(whole) => whole.checked_mul(nanos_per_unit).map(Duration::from_nanos),
        Err(_) => {
            let seconds = amount.parse::<f64>().ok()? * nanos_per_unit as f64 / 1e9;
            Duration::try_from_secs_f64(seconds).ok()
        }
    }
}

/// Descriptor form of a timeout, in the coarsest unit that is exact:
/// `"30s"`, `"1500ms"`, `"250us"` or `"75ns"`.
pub fn format_timeout(d: Duration) -> String {
    let nanos = d.subsec_nanos();
    if nanos == 0 {
        format!("{}s", d.as_secs())
    } else if nanos % 1_000_000 == 0 {
        format!("{}ms", d.as_millis())
    } else if nanos % 1_000 == 0 {
        format!("{}us", d.as_micros())
    } else {
        format!("{}ns", d.as_nanos())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    struct Vars(HashMap<&'static str, Value>);

    impl Resolver for Vars {
        fn resolve(&self, name: &str, path: &[&str]) -> Option<Value> {
            let base = self.0.get(name)?;
            let mut cur = base;
            for seg in path {
                cur = cur.get(seg)?;
            }
            Some(cur.clone())
        }
    }

    fn vars() -> Vars {
        let mut m = HashMap::new();
        m.insert("name", Value::from("Alice"));
        m.insert("n", Value::Int(3));
        m.insert("nothing", Value::Null);
        m.insert(
            "_",
            Value::from(serde_json::json!({"token": "abc", "items": [10, 20]})),
        );
        Vars(m)
    }

    #[test]
    fn interpolates_names_and_paths() {
        let v = vars();
        assert_eq!(interpolate("Hi $name!", &v), "Hi Alice!");
        assert_eq!(interpolate("Bearer $_.token", &v), "Bearer abc");
        assert_eq!(interpolate("/items/$_.items.1", &v), "/items/20");
        assert_eq!(interpolate("$n$n", &v), "33");
    }

    #[test]
    fn unresolved_references_stay_literal() {
        let v = vars();
        assert_eq!(interpolate("$missing/x", &v), "$missing/x");
        assert_eq!(interpolate("$_.nope", &v), "$_.nope");
        assert_eq!(interpolate("cost: $", &v), "cost: $");
    }

    #[test]
    fn null_renders_as_null() {
        assert_eq!(interpolate("v=$nothing", &vars()), "v=null");
    }

    #[test]
    fn trailing_dot_is_not_part_of_path() {
        assert_eq!(interpolate("Hello $name.", &vars()), "Hello Alice.");
    }

    #[test]
    fn inference_table() {
        assert_eq!(infer("John"), Value::from("John"));
        assert_eq!(infer("25"), Value::Int(25));
        assert_eq!(infer("98.5"), Value::Float(98.5));
        assert_eq!(infer("-3"), Value::Int(-3));
        assert_eq!(infer("true"), Value::Bool(true));
        assert_eq!(infer("false"), Value::Bool(false));
        assert_eq!(infer("_"), Value::Null);
        assert_eq!(infer("null"), Value::Null);
        assert_eq!(infer("nil"), Value::Null);
        assert_eq!(infer("inf"), Value::from("inf"));
        assert_eq!(infer("NaN"), Value::from("NaN"));
    }

    #[test]
    fn processors() {
        let no_files = |_: &str| None;
        assert_eq!(
            decode_processed("json", "[1, 2]", no_files),
            Value::List(vec![Value::Int(1), Value::Int(2)])
        );
        assert_eq!(decode_processed("json", "{broken", no_files), Value::from("{broken"));
        assert_eq!(decode_processed("base64", "aGVsbG8=", no_files), Value::from("hello"));
        assert_eq!(decode_processed("base64", "%%%", no_files), Value::from("%%%"));
        assert_eq!(decode_processed("file", "x.json", no_files), Value::from("x.json"));
        assert_eq!(
            decode_processed("file", "x.json", |p: &str| Some(format!("{{\"path\": \"{p}\"}}"))),
            Value::from(serde_json::json!({"path": "x.json"}))
        );
        assert_eq!(
            decode_processed("file", "notes.txt", |_: &str| Some("plain".into())),
            Value::from("plain")
        );
    }

    #[test]
    fn timeouts() {
        let secs = |s: &str| parse_timeout(&Value::from(s)).unwrap();
        assert_eq!(secs("30s"), Duration::from_secs(30));
        assert_eq!(secs("500ms"), Duration::from_millis(500));
        assert_eq!(secs("2m"), Duration::from_secs(120));
        assert_eq!(secs("1.5"), Duration::from_millis(1500));
        assert_eq!(secs("10 seconds"), Duration::from_secs(10));
        assert_eq!(parse_timeout(&Value::Int(5)).unwrap(), Duration::from_secs(5));
        assert!(parse_timeout(&Value::from("5h")).is_err());
        assert!(parse_timeout(&Value::from("soon")).is_err());
        assert!(parse_timeout(&Value::Int(-1)).is_err());
        assert!(parse_timeout(&Value::Bool(true)).is_err());
    }

    #[test]
    fn timeout_formatting() {
        assert_eq!(format_timeout(Duration::from_secs(30)), "30s");
        assert_eq!(format_timeout(Duration::from_millis(1500)), "1500ms");
        assert_eq!(format_timeout(Duration::from_micros(250)), "250us");
        assert_eq!(format_timeout(Duration::from_nanos(1_000_075)), "1000075ns");
    }

    #[test]
    fn sub_millisecond_timeouts_round_trip() {
        let d = parse_timeout(&infer("0.0005")).unwrap();
        assert_eq!(format_timeout(d), "500us");
        assert_eq!(parse_timeout(&infer(&format_timeout(d))).unwrap(), d);
        assert_eq!(parse_timeout(&infer("75ns")).unwrap(), Duration::from_nanos(75));
    }
}
