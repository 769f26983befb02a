//! Command-line argument parsing.
//!
//! Usage:
//!   haiku [-qd] [--compact] [-t <timeout>] <file>
//!   haiku [-qd] [--compact] [-t <timeout>] -
//!   haiku [-qd] [--compact] [-t <timeout>] -e <source>

use std::path::{Path, PathBuf};

pub const USAGE: &str = "\
Usage: haiku [-qd] [--compact] [-t <timeout>] <file>
       haiku [-qd] [--compact] [-t <timeout>] -
       haiku [-qd] [--compact] [-t <timeout>] -e <source>

Options:
  -e <source>    evaluate inline source
  -t <timeout>   default request timeout (e.g. 10s, 500ms, 2m)
  -q             suppress echo output and parallel statistics
  -d             debug logging to stderr
  --compact      one JSON document per line
  -h, --help     show this help
  -v, --version  show version";

// ── Public types ──────────────────────────────────────────────────────────────

/// Parsed command-line arguments.
#[derive(Debug, Default, PartialEq)]
pub struct CliArgs {
    /// Where the program text comes from.
    pub input: Input,
    /// Default timeout override (`-t`).
    pub timeout: Option<String>,
    /// Suppress echo and stats output (`-q`).
    pub quiet: bool,
    /// Debug logging (`-d`).
    pub debug: bool,
    /// One JSON document per line (`--compact`).
    pub compact: bool,
    /// `-h` / `--help`.
    pub help: bool,
    /// `-v` / `--version`.
    pub version: bool,
}

/// Source of the program text.
#[derive(Debug, Default, PartialEq)]
pub enum Input {
    /// No input given; only valid together with `-h` or `-v`.
    #[default]
    Missing,
    /// `-`: read standard input.
    Stdin,
    /// `-e <source>`.
    Inline(String),
    File(PathBuf),
}

impl Input {
    /// Directory imports resolve against: the file's own directory, else `.`.
    pub fn base_path(&self) -> PathBuf {
        match self {
            Input::File(path) => match path.parent() {
                Some(dir) if dir != Path::new("") => dir.to_path_buf(),
                _ => PathBuf::from("."),
            },
            _ => PathBuf::from("."),
        }
    }
}

// ── Parsing ───────────────────────────────────────────────────────────────────

/// Parse `std::env::args()` and return [`CliArgs`] or an error message.
pub fn parse_args() -> Result<CliArgs, String> {
    let raw: Vec<String> = std::env::args().skip(1).collect();
    parse_argv(&raw)
}

/// Parse a slice of argument strings (exposed for testing).
pub fn parse_argv(argv: &[String]) -> Result<CliArgs, String> {
    let mut args = CliArgs::default();
    let mut positional: Vec<String> = Vec::new();
    let mut i = 0;

    while i < argv.len() {
        let arg = argv[i].as_str();

        match arg {
            "--" => {
                positional.extend(argv[i + 1..].iter().cloned());
                break;
            }
            "-" => {
                set_input(&mut args, Input::Stdin)?;
                i += 1;
                continue;
            }
            "--compact" => args.compact = true,
            "--help" => args.help = true,
            "--version" => args.version = true,
            long if long.starts_with("--") => return Err(format!("unknown option: {long}")),
            _ if !arg.starts_with('-') => positional.push(arg.to_owned()),

            // Bundled short flags, e.g. `-qd`.  `-e` and `-t` take the rest
            // of the argument or the next one.
            _ => {
                let chars: Vec<char> = arg[1..].chars().collect();
                let mut j = 0;
                while j < chars.len() {
                    match chars[j] {
                        'q' => args.quiet = true,
                        'd' => args.debug = true,
                        'h' => args.help = true,
                        'v' => args.version = true,
                        flag @ ('e' | 't') => {
                            let value = if j + 1 < chars.len() {
                                let s: String = chars[j + 1..].iter().collect();
                                j = chars.len();
                                s
                            } else if i + 1 < argv.len() {
                                i += 1;
                                argv[i].clone()
                            } else if flag == 'e' {
                                return Err("-e requires a source argument".to_owned());
                            } else {
                                return Err("-t requires a timeout argument".to_owned());
                            };
                            if flag == 'e' {
                                set_input(&mut args, Input::Inline(value))?;
                            } else {
                                args.timeout = Some(value);
                            }
                        }
                        c => return Err(format!("unknown option: -{c}")),
                    }
                    j += 1;
                }
            }
        }
        i += 1;
    }

    match positional.len() {
        0 => {}
        1 => set_input(&mut args, Input::File(PathBuf::from(positional.remove(0))))?,
        n => return Err(format!("too many arguments ({n})")),
    }

    if args.input == Input::Missing && !args.help && !args.version {
        return Err("no input given".to_owned());
    }
    Ok(args)
}

fn set_input(args: &mut CliArgs, input: Input) -> Result<(), String> {
    if args.input != Input::Missing {
        return Err("only one input may be given (file, - or -e)".to_owned());
    }
    args.input = input;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn argv(args: &[&str]) -> Vec<String> {
        args.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn file_argument() {
        let args = parse_argv(&argv(&["reqs/login.haiku"])).unwrap();
        assert_eq!(args.input, Input::File(PathBuf::from("reqs/login.haiku")));
        assert_eq!(args.input.base_path(), PathBuf::from("reqs"));
    }

    #[test]
    fn bare_file_resolves_against_cwd() {
        let args = parse_argv(&argv(&["login.haiku"])).unwrap();
        assert_eq!(args.input.base_path(), PathBuf::from("."));
    }

    #[test]
    fn stdin_and_inline() {
        assert_eq!(parse_argv(&argv(&["-"])).unwrap().input, Input::Stdin);
        let args = parse_argv(&argv(&["-e", "get \"https://x\""])).unwrap();
        assert_eq!(args.input, Input::Inline("get \"https://x\"".into()));
        assert_eq!(args.input.base_path(), PathBuf::from("."));
    }

    #[test]
    fn bundled_flags() {
        let args = parse_argv(&argv(&["-qd", "--compact", "-t10s", "a.haiku"])).unwrap();
        assert!(args.quiet && args.debug && args.compact);
        assert_eq!(args.timeout.as_deref(), Some("10s"));
    }

    #[test]
    fn separate_timeout_value() {
        let args = parse_argv(&argv(&["-t", "500ms", "-"])).unwrap();
        assert_eq!(args.timeout.as_deref(), Some("500ms"));
    }

    #[test]
    fn help_and_version_need_no_input() {
        assert!(parse_argv(&argv(&["-h"])).unwrap().help);
        assert!(parse_argv(&argv(&["--version"])).unwrap().version);
    }

    #[test]
    fn errors() {
        assert!(parse_argv(&argv(&[])).is_err());
        assert!(parse_argv(&argv(&["-x", "a"])).is_err());
        assert!(parse_argv(&argv(&["-e"])).is_err());
        assert!(parse_argv(&argv(&["a", "b"])).is_err());
        assert!(parse_argv(&argv(&["a", "-"])).is_err());
        assert!(parse_argv(&argv(&["--bogus", "a"])).is_err());
    }
}
