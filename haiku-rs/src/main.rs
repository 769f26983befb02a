use std::process;

use tokio::io::AsyncReadExt;
use tracing::warn;
use tracing_subscriber::EnvFilter;

use haiku::cli::{self, CliArgs, Input};
use haiku::config::Config;
use haiku::script::interp::RequestDescriptor;
use haiku::script::parallel::ParallelStats;
use haiku::script::parser;

const LOG_ENV: &str = "HAIKU_LOG";

#[tokio::main]
async fn main() {
    let args = match cli::parse_args() {
        Ok(a) => a,
        Err(e) => {
            eprintln!("haiku: {e}");
            eprintln!("{}", cli::USAGE);
            process::exit(1);
        }
    };
    if args.help {
        println!("{}", cli::USAGE);
        return;
    }
    if args.version {
        println!("haiku version {}", env!("CARGO_PKG_VERSION"));
        return;
    }

    init_logging(args.debug);
    let config = match build_config(&args) {
        Ok(c) => c,
        Err(e) => {
            eprintln!("haiku: {e}");
            process::exit(1);
        }
    };

    let source = match read_input(&args.input).await {
        Ok(s) => s,
        Err(e) => {
            eprintln!("haiku: {e}");
            process::exit(1);
        }
    };

    // ── Parse ─────────────────────────────────────────────────────────────────
    let parsed = match parser::parse_with_warnings(&source) {
        Ok(p) => p,
        Err(e) => {
            eprintln!("haiku: {e}");
            process::exit(2);
        }
    };
    for w in &parsed.warnings {
        warn!("{w}");
    }

    // ── Evaluate ──────────────────────────────────────────────────────────────
    let mut evaluator = config.evaluator();
    let result = evaluator.eval(&parsed.program).await;

    if !args.quiet {
        for line in &evaluator.output {
            eprintln!("{line}");
        }
        for (n, stats) in evaluator.parallel_stats().iter().enumerate() {
            eprint!("{}", render_stats(n + 1, stats));
        }
    }
    print_requests(evaluator.requests(), config.compact);

    if let Err(e) = result {
        eprintln!("haiku: {e}");
        process::exit(1);
    }
}

fn init_logging(debug: bool) {
    let filter = if debug {
        EnvFilter::new("debug")
    } else {
        EnvFilter::try_from_env(LOG_ENV).unwrap_or_else(|_| EnvFilter::new("warn"))
    };
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();
}

fn build_config(args: &CliArgs) -> Result<Config, String> {
    let (mut config, errors) = Config::from_env();
    for e in errors {
        warn!("ignoring {e}");
    }
    if let Some(raw) = &args.timeout {
        config.set_timeout(raw).map_err(|e| e.message)?;
    }
    config.base_path = args.input.base_path();
    config.compact = args.compact;
    Ok(config)
}

async fn read_input(input: &Input) -> Result<String, String> {
    match input {
        Input::File(path) => tokio::fs::read_to_string(path)
            .await
            .map_err(|e| format!("cannot read {}: {e}", path.display())),
        Input::Stdin => {
            let mut buf = String::new();
            tokio::io::stdin()
                .read_to_string(&mut buf)
                .await
                .map_err(|e| format!("cannot read stdin: {e}"))?;
            Ok(buf)
        }
        Input::Inline(src) => Ok(src.clone()),
        Input::Missing => Err("no input given".to_owned()),
    }
}

fn print_requests(requests: &[RequestDescriptor], compact: bool) {
    let many = requests.len() > 1;
    for (n, req) in requests.iter().enumerate() {
        let json = if compact {
            serde_json::to_string(req)
        } else {
            serde_json::to_string_pretty(req)
        };
        let json = match json {
            Ok(j) => j,
            Err(e) => {
                eprintln!("haiku: cannot serialize request {}: {e}", n + 1);
                continue;
            }
        };
        if many && !compact {
            if n > 0 {
                println!();
            }
            println!("--- Request {} ---", n + 1);
        }
        println!("{json}");
    }
}

fn render_stats(n: usize, s: &ParallelStats) -> String {
    format!(
        "=== Parallel Execution Stats (loop {n}) ===\n\
         Total: {}  Success: {}  Failed: {}\n\
         Avg: {:?}  Min: {:?}  Max: {:?}  Wall: {:?}\n",
        s.total, s.success, s.failed, s.avg, s.min, s.max, s.wall
    )
}
