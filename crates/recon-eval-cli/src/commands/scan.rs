//! Evaluation-pass scan command.

use std::path::PathBuf;

use anyhow::{Context, Result};
use recon_eval::corpus::discover_images;
use recon_eval::pipeline::{ImagePipeline, PipelineConfig};
use recon_eval::stats::Summary;
use serde::Serialize;
use tracing::info;

/// Statistics of one evaluation pass.
#[derive(Debug, Serialize)]
struct ScanStats {
    root: PathBuf,
    images: usize,
    batch_sizes: Vec<usize>,
    /// Mean pixel value per image.
    mean_intensity: Option<Summary>,
    /// Mean absolute input/target difference per image.
    corruption: Option<Summary>,
}

pub fn run(
    path: PathBuf,
    batch_size: usize,
    resize: (usize, usize),
    augment: bool,
    seed: Option<u64>,
    output: Option<PathBuf>,
) -> Result<()> {
    let files = discover_images(&path)
        .with_context(|| format!("Failed to discover images in {}", path.display()))?;
    info!(images = files.len(), "Discovered images");

    let mut builder = PipelineConfig::builder()
        .batch_size(batch_size)
        .resize(resize.0, resize.1)
        .train(false)
        .augment(augment);
    if let Some(seed) = seed {
        builder = builder.seed(seed);
    }
    let pipeline = ImagePipeline::new(files, builder.build()?)?;

    let mut batch_sizes = Vec::with_capacity(pipeline.batches_per_pass());
    let mut intensity = Vec::with_capacity(pipeline.len());
    let mut difference = Vec::with_capacity(pipeline.len());
    for batch in pipeline.eval_batches() {
        let batch = batch?;
        batch_sizes.push(batch.len());
        for pair in &batch.pairs {
            let target = pair.target.buf();
            let n = target.len().max(1) as f64;
            intensity.push(target.iter().map(|&v| f64::from(v)).sum::<f64>() / n);
            let diff: f64 = pair
                .input
                .buf()
                .iter()
                .zip(target)
                .map(|(&a, &b)| f64::from((a - b).abs()))
                .sum();
            difference.push(diff / n);
        }
    }

    let stats = ScanStats {
        root: path,
        images: pipeline.len(),
        batch_sizes,
        mean_intensity: Summary::compute(&intensity),
        corruption: augment.then(|| Summary::compute(&difference)).flatten(),
    };

    println!("Images: {}", stats.images);
    println!("Batches: {} (sizes {:?})", stats.batch_sizes.len(), stats.batch_sizes);
    if let Some(summary) = &stats.mean_intensity {
        println!("Mean intensity:");
        println!("  Mean: {:.4}, Median: {:.4}", summary.mean, summary.median);
        println!("  Min: {:.4}, Max: {:.4}", summary.min, summary.max);
    }
    if let Some(summary) = &stats.corruption {
        println!("Input/target difference:");
        println!("  Mean: {:.4}, StdDev: {:.4}", summary.mean, summary.std_dev);
    }

    if let Some(output_path) = output {
        let json = serde_json::to_string_pretty(&stats)?;
        std::fs::write(&output_path, json)
            .with_context(|| format!("Failed to write to {}", output_path.display()))?;
        println!("Saved to: {}", output_path.display());
    }

    Ok(())
}
