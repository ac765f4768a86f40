//! pyaot compiler
//!
//! Ahead-of-time compiler for Python programs.

mod backend;
mod driver;
mod frontend;
mod utils;

use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::process;

use driver::{BuildOptions, TargetKind};

/// pyaot compiler
#[derive(Parser, Debug)]
#[command(name = "pyaotc")]
#[command(version = "0.1.0")]
#[command(about = "pyaot - ahead-of-time compiler for Python programs")]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,

    /// Input source file (.py) or directory
    #[arg(value_name = "PATH")]
    input: Option<PathBuf>,

    /// Output file
    #[arg(short, long, value_name = "FILE")]
    output: Option<PathBuf>,

    /// Target kind (shared, exe, bytecode)
    #[arg(long, default_value = "exe")]
    target: TargetKindArg,

    /// Recompile even when the cached artifact is up to date
    #[arg(long)]
    force: bool,

    /// Emit the lowered C translation unit instead of a native artifact
    #[arg(long)]
    emit_c: bool,

    /// Artifact cache directory
    #[arg(long, value_name = "DIR")]
    cache_dir: Option<PathBuf>,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Compile a source file or directory
    Build {
        /// Input source file or directory
        input: PathBuf,

        /// Output file
        #[arg(short, long)]
        output: Option<PathBuf>,
    },
    /// Check a source file for errors without generating code
    Check {
        /// Input source file
        input: PathBuf,
    },
    /// Print version information
    Version,
}

#[derive(Clone, Debug)]
struct TargetKindArg(TargetKind);

impl std::str::FromStr for TargetKindArg {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        s.parse().map(TargetKindArg)
    }
}

fn main() {
    env_logger::init();

    let cli = Cli::parse();

    match &cli.command {
        Some(Commands::Build { input, output }) => {
            let opts = build_options(&cli, output.clone());
            build(input, &opts);
        }
        Some(Commands::Check { input }) => check(input),
        Some(Commands::Version) => {
            println!("pyaotc 0.1.0");
            println!("pyaot - ahead-of-time compiler for Python programs");
        }
        None => match &cli.input {
            Some(input) => {
                let opts = build_options(&cli, cli.output.clone());
                build(input, &opts);
            }
            None => {
                eprintln!("Error: no input file specified");
                eprintln!("Usage: pyaotc <PATH> or pyaotc build <PATH>");
                process::exit(1);
            }
        },
    }
}

fn build_options(cli: &Cli, output: Option<PathBuf>) -> BuildOptions {
    BuildOptions {
        target: cli.target.0,
        force: cli.force,
        emit_c: cli.emit_c,
        output,
        cache_dir: cli.cache_dir.clone(),
    }
}

fn build(input: &PathBuf, opts: &BuildOptions) {
    if input.is_dir() {
        let summary = match driver::compile_dir(input, opts) {
            Ok(summary) => summary,
            Err(e) => {
                eprintln!("Error: {e}");
                process::exit(1);
            }
        };
        for (source, result) in &summary.results {
            match result {
                Ok(unit) => {
                    let tag = if unit.from_cache { "cached" } else { "built" };
                    println!("  [{tag}] {} -> {}", source.display(), unit.artifact.display());
                }
                Err(e) => println!("  [fail]  {}: {e}", source.display()),
            }
        }
        println!(
            "{} ok, {} failed",
            summary.ok_count(),
            summary.failed_count()
        );
        if summary.failed_count() > 0 {
            process::exit(1);
        }
        return;
    }

    match driver::compile_file(input, opts) {
        Ok(unit) => {
            if unit.from_cache {
                println!("Up to date: {}", unit.artifact.display());
            } else {
                println!("Output: {}", unit.artifact.display());
            }
        }
        Err(e) => {
            eprintln!("Error: {e}");
            process::exit(1);
        }
    }
}

fn check(input: &PathBuf) {
    match driver::check_file(input) {
        Ok(()) => println!("No errors found"),
        Err(e) => {
            eprintln!("Error: {e}");
            process::exit(1);
        }
    }
}
