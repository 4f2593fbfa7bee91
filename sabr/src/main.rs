use std::{fs, path::PathBuf, process::ExitCode};

use anyhow::Context;
use clap::{Parser, Subcommand};
use sabr_compiler::Compiler;
use sabr_foundation::source::Sources;
use sabr_preprocessor::Preprocessor;
use sabr_vm::{RuntimeError, Vm, DEFAULT_POOL_SIZE};
use tracing::{debug, error, metadata::LevelFilter};
use tracing_subscriber::{prelude::*, EnvFilter};

const EXIT_COMPILE: u8 = 1;
const EXIT_RUNTIME: u8 = 2;
const EXIT_IO: u8 = 3;

#[derive(Debug, Parser)]
#[command(name = "sabr", version, about = "Compiler and VM for the sabr language")]
struct Args {
    /// Columns a tab advances when tracking source positions.
    #[arg(long, env = "SABR_TAB", default_value_t = 4)]
    tab: u32,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Compile a source file to a .bcb bytecode file.
    Compile {
        input: PathBuf,
        /// Output path; defaults to the input with a .bcb extension.
        #[arg(short, long)]
        output: Option<PathBuf>,
    },
    /// Run a compiled bytecode file.
    Run {
        input: PathBuf,
        /// Memory pool size in cells.
        #[arg(long, default_value_t = DEFAULT_POOL_SIZE)]
        pool: usize,
    },
    /// Disassemble a compiled bytecode file.
    Dump { input: PathBuf },
}

fn compile_to_bytecode(input: &PathBuf, tab: u32) -> Result<sabr_bytecode::Bytecode, ExitCode> {
    let mut sources = Sources::new();
    let file = sources.load(input).map_err(|err| {
        error!("{err}");
        ExitCode::from(EXIT_IO)
    })?;

    let tokens = Preprocessor::new(&mut sources)
        .with_tab_size(tab)
        .preprocess_file(file)
        .map_err(|err| {
            err.to_diagnostic(&sources).emit_to_stderr(&sources);
            ExitCode::from(EXIT_COMPILE)
        })?;
    debug!("{} tokens after preprocessing", tokens.len());

    Compiler::new()
        .with_tab_size(tab)
        .compile(&tokens)
        .map_err(|err| {
            err.to_diagnostic(&sources).emit_to_stderr(&sources);
            ExitCode::from(EXIT_COMPILE)
        })
}

fn compile_command(input: PathBuf, output: Option<PathBuf>, tab: u32) -> ExitCode {
    let bytecode = match compile_to_bytecode(&input, tab) {
        Ok(bytecode) => bytecode,
        Err(code) => return code,
    };

    let output = output.unwrap_or_else(|| input.with_extension("bcb"));
    // Write through a temporary name so a failure never leaves a partial
    // bytecode file behind.
    let staged = output.with_extension("bcb.tmp");
    let result = fs::write(&staged, bytecode.encode())
        .and_then(|_| fs::rename(&staged, &output))
        .with_context(|| format!("cannot write bytecode to {output:?}"));
    match result {
        Ok(()) => {
            debug!("wrote {output:?}");
            ExitCode::SUCCESS
        }
        Err(err) => {
            let _ = fs::remove_file(&staged);
            error!("{err:#}");
            ExitCode::from(EXIT_IO)
        }
    }
}

fn load_bytecode(input: &PathBuf) -> Result<sabr_bytecode::Bytecode, ExitCode> {
    let bytes = fs::read(input)
        .with_context(|| format!("cannot read bytecode from {input:?}"))
        .map_err(|err| {
            error!("{err:#}");
            ExitCode::from(EXIT_IO)
        })?;
    sabr_bytecode::Bytecode::decode(&bytes).map_err(|err| {
        error!("{err}");
        ExitCode::from(EXIT_RUNTIME)
    })
}

fn run_command(input: PathBuf, pool: usize) -> ExitCode {
    let bytecode = match load_bytecode(&input) {
        Ok(bytecode) => bytecode,
        Err(code) => return code,
    };
    match Vm::new(pool).run(&bytecode) {
        Ok(()) => ExitCode::SUCCESS,
        Err(err @ RuntimeError::Io(_)) => {
            error!("{err}");
            ExitCode::from(EXIT_IO)
        }
        Err(err) => {
            error!("{err}");
            ExitCode::from(EXIT_RUNTIME)
        }
    }
}

fn dump_command(input: PathBuf) -> ExitCode {
    match load_bytecode(&input) {
        Ok(bytecode) => {
            print!("{}", bytecode.disassemble());
            ExitCode::SUCCESS
        }
        Err(code) => code,
    }
}

fn main() -> ExitCode {
    let subscriber = tracing_subscriber::registry()
        .with(
            EnvFilter::builder()
                .with_default_directive(LevelFilter::WARN.into())
                .from_env_lossy(),
        )
        .with(
            tracing_subscriber::fmt::layer()
                .without_time()
                .with_writer(std::io::stderr),
        );
    tracing::subscriber::set_global_default(subscriber)
        .expect("cannot set default tracing subscriber");

    let args = Args::parse();
    let tab = args.tab.max(1);

    match args.command {
        Command::Compile { input, output } => compile_command(input, output, tab),
        Command::Run { input, pool } => run_command(input, pool),
        Command::Dump { input } => dump_command(input),
    }
}
