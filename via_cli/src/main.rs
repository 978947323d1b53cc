//! via programming language command-line interface
//!
//! Thin driver over the core `compile(source) -> Unit` and
//! `execute(&Unit) -> exit status` entry points: ahead-of-time compilation
//! with dump output, script execution (source or `%viac%` image), a
//! line-oriented REPL and an interactive bytecode debugger.

use anyhow::Result;
use clap::{Parser, Subcommand, ValueEnum};
use std::path::PathBuf;

mod commands;

use commands::*;

/// The via programming language compiler and virtual machine
#[derive(Parser)]
#[command(name = "via")]
#[command(about = "The via programming language compiler and virtual machine")]
#[command(version = env!("CARGO_PKG_VERSION"))]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Enable verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Suppress output
    #[arg(short, long, global = true)]
    quiet: bool,
}

/// What to print after a successful compile.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum DumpKind {
    /// The parsed AST as JSON
    Ast,
    /// The statement tree with inferred types
    Ttree,
    /// Disassembled instructions
    Bytecode,
    /// The constant pool
    Constants,
}

#[derive(Subcommand)]
enum Commands {
    /// Compile a source file without executing it
    Compile {
        /// Path to the source file
        file: PathBuf,

        /// Print a compilation artifact
        #[arg(long, value_enum)]
        dump: Option<DumpKind>,

        /// Optimization level (0 disables constant folding)
        #[arg(short = 'O', long = "opt-level", default_value_t = 1)]
        opt: u8,

        /// Write a %viac% bytecode image
        #[arg(short, long)]
        output: Option<PathBuf>,
    },

    /// Compile and execute a source file or %viac% image
    Run {
        /// Path to the source file or image
        file: PathBuf,

        /// Print a compilation artifact before executing
        #[arg(long, value_enum)]
        dump: Option<DumpKind>,

        /// Optimization level (0 disables constant folding)
        #[arg(short = 'O', long = "opt-level", default_value_t = 1)]
        opt: u8,

        /// Execute %viac% images without a warning
        #[arg(long)]
        allow_direct_bin_execution: bool,
    },

    /// Start the interactive read-eval-print loop
    Repl,

    /// Compile a file and inspect its execution instruction by instruction
    Debugger {
        /// Path to the source file
        file: PathBuf,
    },
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    let log_level = if cli.verbose {
        log::LevelFilter::Debug
    } else if cli.quiet {
        log::LevelFilter::Error
    } else {
        log::LevelFilter::Info
    };

    env_logger::Builder::from_default_env()
        .filter_level(log_level)
        .format_timestamp(None)
        .format_module_path(false)
        .format_target(false)
        .init();

    let code = match cli.command {
        Commands::Compile {
            file,
            dump,
            opt,
            output,
        } => compile::execute(&file, dump, opt, output.as_deref())?,
        Commands::Run {
            file,
            dump,
            opt,
            allow_direct_bin_execution,
        } => run::execute(&file, dump, opt, allow_direct_bin_execution)?,
        Commands::Repl => repl::execute()?,
        Commands::Debugger { file } => debugger::execute(&file)?,
    };
    std::process::exit(code)
}
