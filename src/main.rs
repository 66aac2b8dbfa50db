mod debug_report;

use parlance::{Dialogue, Script, Speaker};
use std::io::{self, BufRead, IsTerminal, Write};
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

fn main() {
    let config = match parse_args() {
        Ok(config) => config,
        Err(err) => {
            eprintln!("{err}");
            std::process::exit(2);
        }
    };

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_env("PARLANCE_LOG").unwrap_or_else(|_| EnvFilter::new("warn")))
        .with_writer(io::stderr)
        .init();

    if let Err(err) = run(&config) {
        eprintln!("error: {err}");
        std::process::exit(1);
    }
}

struct CliConfig {
    script: String,
    seed: Option<u64>,
    verbose: bool,
    color: bool,
}

fn run(config: &CliConfig) -> parlance::Result<()> {
    let mut script = Script::load(&config.script)?;
    if config.seed.is_some() {
        script.options.seed = config.seed;
    }
    let mut dialogue = Dialogue::new(Arc::new(script.build()?));

    let stdin = io::stdin();
    let mut lines = stdin.lock().lines();
    loop {
        match dialogue.speaker() {
            Speaker::System => {
                let report = dialogue.system_turn_verbose()?;
                if config.verbose {
                    debug_report::print_turn(&report, config.color);
                }
                if !report.output.is_empty() {
                    println!("{}", report.output);
                }
            }
            Speaker::User => {
                print!("> ");
                io::stdout().flush().map_err(parlance::ScriptError::from)?;
                let Some(line) = lines.next() else {
                    return Ok(());
                };
                let line = line.map_err(parlance::ScriptError::from)?;
                let utterance = line.trim();
                if utterance.is_empty() {
                    continue;
                }
                match dialogue.user_turn_verbose(utterance) {
                    Ok(report) if config.verbose => debug_report::print_turn(&report, config.color),
                    Ok(_) => {}
                    // The session is unchanged; let the user try again.
                    Err(err @ parlance::TurnError::NoViableTransition { .. }) => eprintln!("{err}"),
                    Err(err) => return Err(err.into()),
                }
            }
        }
    }
}

fn parse_args() -> Result<CliConfig, String> {
    let mut script: Option<String> = None;
    let mut seed = None;
    let mut verbose = false;
    let mut color = io::stderr().is_terminal();
    let mut args = std::env::args().skip(1);

    while let Some(arg) = args.next() {
        match arg.as_str() {
            "-h" | "--help" => {
                print_help();
                std::process::exit(0);
            }
            "-V" | "--version" => {
                println!("parlance {}", env!("CARGO_PKG_VERSION"));
                std::process::exit(0);
            }
            "-v" | "--verbose" => verbose = true,
            "--color" => color = true,
            "--no-color" => color = false,
            "--seed" => {
                let value = args.next().ok_or_else(|| "error: --seed expects a value".to_string())?;
                seed = Some(parse_seed(&value)?);
            }
            _ if arg.starts_with("--seed=") => {
                seed = Some(parse_seed(arg.trim_start_matches("--seed="))?);
            }
            _ if arg.starts_with('-') => {
                return Err(format!("error: unknown option '{arg}'"));
            }
            _ => {
                if script.is_some() {
                    return Err("error: script provided multiple times".to_string());
                }
                script = Some(arg);
            }
        }
    }

    let script = script.ok_or_else(|| format!("error: no script provided\n\n{}", help_text()))?;
    Ok(CliConfig { script, seed, verbose, color })
}

fn parse_seed(value: &str) -> Result<u64, String> {
    value.parse().map_err(|_| format!("error: invalid --seed '{value}' (expected an unsigned integer)"))
}

fn print_help() {
    println!("{}", help_text());
}

fn help_text() -> String {
    format!(
        "parlance {version}

Interactive runner for JSON dialogue scripts.

Usage:
  parlance [OPTIONS] <script.json>

Options:
  --seed <n>                 Seed the session's random source.
  -v, --verbose              Print a step report after every turn (stderr).
  --color                    Force ANSI color output.
  --no-color                 Disable ANSI color output.
  -h, --help                 Show this help message.
  -V, --version              Print version information.

Environment:
  PARLANCE_LOG               tracing filter, e.g. `parlance::engine=debug`.

Exit codes:
  0  End of input.
  1  Script or turn error.
  2  Invalid arguments.
",
        version = env!("CARGO_PKG_VERSION"),
    )
}
