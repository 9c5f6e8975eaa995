use std::path::PathBuf;
use std::process;

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use regex::Regex;
use tracing_subscriber::EnvFilter;

use cmdbench::config::{self, Defaults};
use cmdbench::display;
use cmdbench::errors::CmdbenchError;
use cmdbench::lifecycle::Lifecycle;
use cmdbench::runner::SystemRunner;
use cmdbench::types::OutputFormat;

#[derive(Parser)]
#[command(name = "cmdbench", version, about = "Benchmark commands with setup, repeated runs and cleanup")]
struct Cli {
    /// Log at debug level (RUST_LOG takes precedence)
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run every selected benchmark in the suite
    Run {
        #[command(flatten)]
        selection: Selection,

        /// Per-iteration timeout in seconds, overriding the suite
        #[arg(long)]
        timeout: Option<f64>,

        /// Repeat count, overriding the suite
        #[arg(long)]
        repeat: Option<i64>,

        #[arg(long, default_value = "default")]
        format: OutputFormat,

        #[arg(long)]
        json: bool,
    },
    /// Print the fingerprint and name of each selected benchmark
    List {
        #[command(flatten)]
        selection: Selection,
    },
}

#[derive(Args)]
struct Selection {
    /// Suite file
    #[arg(default_value = config::DEFAULT_SUITE_FILE)]
    suite: PathBuf,

    /// Only benchmarks whose name matches this regex
    #[arg(short, long)]
    filter: Option<String>,
}

impl Selection {
    fn load(&self, overrides: &Defaults) -> Result<config::Suite> {
        let filter = self
            .filter
            .as_deref()
            .map(Regex::new)
            .transpose()
            .context("Invalid --filter pattern")?;
        let suite = config::load_suite(&self.suite, overrides)?;
        Ok(suite.filtered(filter.as_ref()))
    }
}

fn init_tracing(verbose: bool) {
    let default = if verbose { "debug" } else { "warn" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    let _ = tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(filter)
        .with_target(false)
        .try_init();
}

fn run() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    match cli.command {
        Command::Run {
            selection,
            timeout,
            repeat,
            format,
            json,
        } => {
            let suite = selection.load(&Defaults { repeat, timeout })?;
            let lifecycle = Lifecycle::new(SystemRunner);

            let reports: Vec<_> = suite
                .benchmarks
                .iter()
                .map(|spec| lifecycle.run(spec))
                .collect();

            let output = if json {
                display::format_json(&reports)
            } else {
                match format {
                    OutputFormat::Short => display::format_short(&reports),
                    OutputFormat::Default => display::format_default(&reports),
                }
            };
            print!("{}", output);
            if json {
                println!();
            }

            let failed = reports.iter().filter(|r| !r.succeeded()).count();
            if failed > 0 {
                return Err(CmdbenchError::BenchmarksFailed {
                    failed,
                    total: reports.len(),
                }
                .into());
            }
        }
        Command::List { selection } => {
            let suite = selection.load(&Defaults::default())?;
            print!("{}", display::format_list(&suite.benchmarks));
        }
    }

    Ok(())
}

fn main() {
    if let Err(err) = run() {
        eprintln!("{:#}", err);
        process::exit(1);
    }
}
