pub mod ast;
pub mod error;
pub mod expand;
pub mod functions;
pub mod lines;
pub mod maker;
pub mod parser;
pub mod runner;

use anyhow::{bail, Context, Result};
use clap::Parser;
use maker::Options;
use runner::ShellRunner;
use std::path::PathBuf;
use std::time::SystemTime;
use tracing::error;
use tracing_subscriber::EnvFilter;

const FILE_NAME: &str = "Makefile";

/// Runs the recipes needed to bring targets of a makefile up to date.
#[derive(Debug, Parser)]
#[command(name = "minimake", version)]
struct Cli {
    /// Build file to read
    #[arg(short, long, default_value = FILE_NAME, env = "MINIMAKE_FILE")]
    file: PathBuf,

    /// Print the available targets and exit
    #[arg(long)]
    targets: bool,

    /// Debug logging
    #[arg(short, long)]
    debug: bool,

    /// Print the recipes without running them
    #[arg(short = 'n', long)]
    dry_run: bool,

    /// Keep building after a recipe fails
    #[arg(short, long)]
    ignore_errors: bool,

    /// Try the remaining goals after one fails
    #[arg(short, long)]
    keep_going: bool,

    /// Do not echo recipes
    #[arg(short, long)]
    silent: bool,

    /// Environment variables override assignments in the build file
    #[arg(short, long = "environment-overrides")]
    env_first: bool,

    /// Targets to build, the first one in the file by default
    goals: Vec<String>,
}

impl Cli {
    fn options(&self) -> Options {
        Options {
            debug: self.debug,
            dry_run: self.dry_run,
            ignore_errors: self.ignore_errors,
            keep_going: self.keep_going,
            silent: self.silent,
            env_first: self.env_first,
        }
    }
}

fn main() {
    if let Err(e) = run() {
        eprintln!("error: {:#}", e);
        std::process::exit(1);
    }
}

fn run() -> Result<()> {
    let cli = Cli::parse();
    let options = cli.options();

    let default_filter = if options.debug {
        "minimake=debug"
    } else {
        "minimake=info"
    };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter)),
        )
        .with_writer(std::io::stderr)
        .with_target(false)
        .without_time()
        .init();

    let runner = ShellRunner;
    let mut maker = parser::parse_file(&cli.file, options, &runner)
        .with_context(|| format!("failed to load {}", cli.file.display()))?;

    if cli.targets {
        println!("\nAvailable targets:");
        for name in maker.target_names() {
            println!("    {}", name);
        }
        return Ok(());
    }

    let goals = match cli.goals.is_empty() {
        true => vec![String::new()],
        false => cli.goals.clone(),
    };

    let mut failed = 0;
    for goal in &goals {
        if let Err(e) = maker.process(goal, SystemTime::now(), &runner) {
            if !maker.options().keep_going {
                return Err(e.into());
            }
            error!("{}", e);
            failed += 1;
        }
    }

    if failed > 0 {
        bail!("{} of {} goals failed", failed, goals.len());
    }
    Ok(())
}

#[test]
fn test_cli_options() {
    let cli = Cli::parse_from(["minimake", "-n", "-e", "--silent", "-f", "build.mk", "all", "test"]);
    assert_eq!(cli.file, PathBuf::from("build.mk"));
    assert_eq!(cli.goals, vec!["all", "test"]);
    assert_eq!(
        cli.options(),
        Options {
            dry_run: true,
            silent: true,
            env_first: true,
            ..Options::default()
        }
    );
}

#[test]
fn test_cli_verify() {
    use clap::CommandFactory;
    Cli::command().debug_assert();
}
