use brio_cli::run::{run_file, RunOptions};
use brio_cli::repl;
use brio_rt::logger::LogLevel;
use clap::Parser;
use std::path::PathBuf;
use std::process::ExitCode;

/// The Brio programming language.
#[derive(Parser)]
#[command(name = "brio", version, about)]
struct Cli {
    /// Source file to run; omit to start the interactive REPL.
    file: Option<PathBuf>,

    /// Execute through the bytecode compiler and VM instead of the
    /// tree-walking evaluator.
    #[arg(long, short = 'b')]
    bytecode: bool,

    /// VM diagnostic output: none|error|warn|info|debug|trace
    /// (bytecode mode).
    #[arg(long, default_value = "none")]
    log_level: String,

    /// Reuse and write a compiled bytecode cache next to the source
    /// file (bytecode mode).
    #[arg(long)]
    cache: bool,
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    let log_level: LogLevel = match cli.log_level.parse() {
        Ok(level) => level,
        Err(message) => {
            eprintln!("runtime error: {}", message);
            return ExitCode::from(1);
        }
    };
    let code = match cli.file {
        Some(file) => run_file(
            &file,
            &RunOptions {
                bytecode: cli.bytecode,
                log_level,
                use_cache: cli.cache,
            },
        ),
        None => repl::run(),
    };
    ExitCode::from(code as u8)
}
