//! recon-eval CLI - reconstruction-quality tooling for autoencoder experiments

use std::path::PathBuf;

use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

mod commands;

/// Reconstruction-quality evaluation tool.
#[derive(Parser)]
#[command(name = "recon-eval")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Rank models by their lowest validation loss
    Losses {
        /// Model directories, each holding one `;`-separated training log
        #[arg(required = true)]
        models: Vec<PathBuf>,

        /// Write the ranking as JSON
        #[arg(short, long)]
        output: Option<PathBuf>,

        /// Write per-epoch validation loss (rolling sum) as CSV
        #[arg(long)]
        curves: Option<PathBuf>,

        /// Rolling window for --curves
        #[arg(long, default_value_t = 1)]
        window: usize,
    },

    /// Corrupt a single image with explicit levels
    Corrupt {
        /// Input image
        input: PathBuf,

        /// Output image (PNG or JPEG by extension)
        #[arg(short, long)]
        output: PathBuf,

        /// Dropout rate in [0, 1)
        #[arg(long)]
        dropout: Option<f32>,

        /// Gaussian noise standard deviation
        #[arg(long)]
        noise: Option<f32>,

        /// Sigma of a 3x3 Gaussian blur
        #[arg(long)]
        blur: Option<f32>,

        /// Side of a square cutout
        #[arg(long, requires = "cutout_offset")]
        cutout_size: Option<usize>,

        /// Top-left corner of the cutout as ROW,COL
        #[arg(long, value_parser = parse_pair, requires = "cutout_size")]
        cutout_offset: Option<(usize, usize)>,

        /// Resize before corrupting, as HEIGHT,WIDTH
        #[arg(long, value_parser = parse_pair)]
        resize: Option<(usize, usize)>,

        /// Random seed
        #[arg(long)]
        seed: Option<u64>,
    },

    /// Run one evaluation pass over a directory of images
    Scan {
        /// Directory to scan
        path: PathBuf,

        /// Pairs per batch
        #[arg(short, long, default_value_t = 8)]
        batch_size: usize,

        /// Resize as HEIGHT,WIDTH
        #[arg(long, value_parser = parse_pair, default_value = "128,128")]
        resize: (usize, usize),

        /// Apply random corruption to inputs
        #[arg(long)]
        augment: bool,

        /// Random seed
        #[arg(long)]
        seed: Option<u64>,

        /// Write the pass statistics as JSON
        #[arg(short, long)]
        output: Option<PathBuf>,
    },
}

/// Parse `A,B` (or `AxB`) into a pair of sizes.
fn parse_pair(s: &str) -> Result<(usize, usize), String> {
    let (a, b) = s
        .split_once(',')
        .or_else(|| s.split_once('x'))
        .ok_or_else(|| format!("expected two values like 128,128, got {s:?}"))?;
    let parse = |v: &str| {
        v.trim()
            .parse::<usize>()
            .map_err(|e| format!("invalid number {v:?}: {e}"))
    };
    Ok((parse(a)?, parse(b)?))
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let filter = if cli.verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::new("warn")
    };
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    match cli.command {
        Commands::Losses { models, output, curves, window } => {
            commands::losses::run(models, output, curves, window)
        }
        Commands::Corrupt {
            input,
            output,
            dropout,
            noise,
            blur,
            cutout_size,
            cutout_offset,
            resize,
            seed,
        } => {
            let cutout = cutout_size.zip(cutout_offset);
            commands::corrupt::run(input, output, dropout, noise, blur, cutout, resize, seed)
        }
        Commands::Scan { path, batch_size, resize, augment, seed, output } => {
            commands::scan::run(path, batch_size, resize, augment, seed, output)
        }
    }
}
