use anyhow::Context;
use clap::{ArgAction, Parser, ValueEnum};
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum Emit {
    Tokens,
    Ast,
    Ir,
    Asm,
}

/// Compile a source file to x86-64 NASM assembly.
#[derive(Debug, Parser)]
#[command(name = "neko", version)]
struct Cli {
    /// Source file to compile
    source: PathBuf,

    /// Where to write the assembly
    #[arg(short, long, default_value = "output.asm")]
    output: PathBuf,

    /// Also print this phase's output to stdout (repeatable)
    #[arg(long, value_enum)]
    emit: Vec<Emit>,

    /// Raise log verbosity (-v info, -vv debug)
    #[arg(short, long, action = ArgAction::Count)]
    verbose: u8,
}

fn init_tracing(verbose: u8) {
    let default = match verbose {
        0 => "warn",
        1 => "info",
        _ => "debug",
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    let src = std::fs::read_to_string(&cli.source)
        .with_context(|| format!("failed to read {}", cli.source.display()))?;
    tracing::info!(path = %cli.source.display(), bytes = src.len(), "compiling");

    let compilation = match neko::compile(&src) {
        Ok(compilation) => compilation,
        Err(err) => {
            eprintln!("{}", err.display(&src));
            std::process::exit(1);
        }
    };

    for emit in &cli.emit {
        match emit {
            Emit::Tokens => {
                for token in &compilation.tokens {
                    println!("{token}");
                }
            }
            Emit::Ast => {
                for stmt in &compilation.statements {
                    println!("{stmt:#?}");
                }
            }
            Emit::Ir => print!("{}", compilation.ir),
            Emit::Asm => print!("{}", compilation.assembly),
        }
    }

    std::fs::write(&cli.output, &compilation.assembly)
        .with_context(|| format!("failed to write {}", cli.output.display()))?;
    tracing::info!(path = %cli.output.display(), "wrote assembly");
    Ok(())
}
