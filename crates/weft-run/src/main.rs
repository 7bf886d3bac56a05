//! Command-line runner for weft block programs.

use std::path::PathBuf;

use anyhow::{bail, Context, Result};
use clap::Parser;
use tracing_subscriber::EnvFilter;

use weft_engine::{Program, Runtime, Status};

#[derive(Parser, Debug)]
#[command(name = "weft")]
#[command(about = "Run a block-graph program")]
#[command(version)]
struct Args {
    /// Program JSON file
    #[arg(value_name = "FILE")]
    program: PathBuf,

    /// Start a thread at this block instead of the program's scripts
    /// (repeatable)
    #[arg(long, value_name = "BLOCK")]
    entry: Vec<String>,
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let args = Args::parse();
    let source = std::fs::read_to_string(&args.program)
        .with_context(|| format!("failed to read {}", args.program.display()))?;
    let program = Program::from_json(&source)
        .with_context(|| format!("failed to load {}", args.program.display()))?;

    let entries = if args.entry.is_empty() {
        program.scripts.clone()
    } else {
        args.entry
    };
    if entries.is_empty() {
        bail!("program declares no scripts; pass --entry");
    }

    let mut runtime = Runtime::new(program.blocks);
    let threads: Vec<_> = entries
        .iter()
        .map(|block| runtime.spawn(block.clone()))
        .collect();

    runtime.run().context("program did not run to completion")?;

    for (block, thread) in entries.iter().zip(threads) {
        let finished = runtime
            .thread(thread)
            .is_some_and(|t| t.status() == Status::Finished);
        if !finished {
            bail!("script '{}' did not finish", block);
        }
    }
    Ok(())
}
