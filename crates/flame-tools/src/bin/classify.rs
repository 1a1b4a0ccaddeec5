//! Classify raw RGB8 frames
//!
//! Each input file is a headerless `height x width x 3` byte dump. Prints one
//! line per frame with the score and the resulting verdict.

use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};
use clap::Parser;
use flame_core::{ClassifierConfig, Shape, ShuffleNetClassifier, Tensor, Verdict, VisualClassifier};
use log::info;

#[derive(Parser, Debug)]
#[command(name = "classify")]
#[command(about = "Score raw RGB8 frames with the fire classifier")]
struct Cli {
    /// Raw RGB8 frame files
    #[arg(required = true)]
    frames: Vec<PathBuf>,

    /// Frame height in pixels
    #[arg(long)]
    height: usize,

    /// Frame width in pixels
    #[arg(long)]
    width: usize,

    /// Classifier configuration (TOML); defaults describe the reference model
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Weights directory, overriding the configuration and FLAME_MODEL_PATH
    #[arg(short, long)]
    weights: Option<PathBuf>,
}

fn read_frame(path: &Path, shape: Shape) -> Result<Tensor<u8>> {
    let bytes = std::fs::read(path).with_context(|| format!("reading {}", path.display()))?;
    let len = bytes.len();
    match Tensor::from_vec(shape, bytes) {
        Some(frame) => Ok(frame),
        None => bail!("{}: {len} bytes, expected {} for a {shape} frame", path.display(), shape.len()),
    }
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info"))
        .target(env_logger::Target::Stderr)
        .init();
    let cli = Cli::parse();

    let mut config = match &cli.config {
        Some(path) => ClassifierConfig::from_file(path)
            .with_context(|| format!("loading config {}", path.display()))?,
        None => ClassifierConfig::default(),
    };
    config.apply_env_overrides();
    if let Some(weights) = cli.weights {
        config.weights_dir = weights;
    }

    let mut classifier = ShuffleNetClassifier::new();
    classifier.setup(&config).context("classifier setup failed")?;
    info!(
        "classifier ready: {}x{} input, weights from {}",
        config.input.height,
        config.input.width,
        config.weights_dir.display()
    );

    let shape = Shape::new(cli.height, cli.width, 3);
    let mut fires = 0usize;
    for path in &cli.frames {
        let frame = read_frame(path, shape)?;
        let score = classifier.process(&frame)?;
        let verdict = Verdict::from_score(score);
        if verdict.is_fire() {
            fires += 1;
        }
        println!("{}\t{score:.6}\t{verdict}", path.display());
    }
    info!("{fires} of {} frames classified as fire", cli.frames.len());
    Ok(())
}
