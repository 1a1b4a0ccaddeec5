//! Random weight generator
//!
//! Writes a complete blob directory for the given architecture, filled with
//! seeded pseudo-random values. Useful for exercising the pipeline and for
//! benchmarking without trained weights; the scores are meaningless.

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Parser;
use flame_core::params::{REFERENCE_STAGE_REPEATS, REFERENCE_STAGE_WIDTHS};
use flame_core::ModelParams;
use log::info;

#[derive(Parser, Debug)]
#[command(name = "gen_weights")]
#[command(about = "Write a random-weight blob directory for the classifier")]
struct Cli {
    /// Output directory (created if missing)
    #[arg(short, long)]
    output: PathBuf,

    /// RNG seed
    #[arg(long, default_value_t = 1)]
    seed: u64,

    /// Blocks per stage
    #[arg(long, value_delimiter = ',', default_values_t = REFERENCE_STAGE_REPEATS)]
    stage_repeats: Vec<usize>,

    /// Stem width, one width per stage, head width
    #[arg(long, value_delimiter = ',', default_values_t = REFERENCE_STAGE_WIDTHS)]
    stage_widths: Vec<usize>,

    /// Only print the blob manifest
    #[arg(long, default_value_t = false)]
    dry_run: bool,
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info"))
        .target(env_logger::Target::Stderr)
        .init();
    let cli = Cli::parse();

    let mut params = ModelParams::new(&cli.stage_repeats, &cli.stage_widths)
        .context("invalid architecture")?;

    if cli.dry_run {
        for (key, count) in params.manifest() {
            println!("{key}\t{count}");
        }
        return Ok(());
    }

    params.randomize(cli.seed);
    params
        .save_to_dir(&cli.output)
        .with_context(|| format!("writing blobs to {}", cli.output.display()))?;
    info!(
        "wrote {} floats (seed {}) to {}",
        params.element_count(),
        cli.seed,
        cli.output.display()
    );
    Ok(())
}
