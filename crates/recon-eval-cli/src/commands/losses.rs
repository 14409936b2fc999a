//! Training-log ranking command.

use std::path::PathBuf;

use anyhow::{Context, Result};
use recon_eval::history::TrainingHistory;
use recon_eval::model::ModelSpec;
use tracing::info;

pub fn run(
    models: Vec<PathBuf>,
    output: Option<PathBuf>,
    curves: Option<PathBuf>,
    window: usize,
) -> Result<()> {
    let specs: Vec<ModelSpec> = models.into_iter().map(ModelSpec::from_dir).collect();
    info!(models = specs.len(), "Reading training logs");

    let history = TrainingHistory::load(&specs).context("Failed to read training logs")?;
    let ranking = history.min_validation_loss();

    println!("{:<32} {:>12} {:>6}", "model", "val_loss", "epoch");
    println!("{:-<52}", "");
    for row in &ranking {
        println!("{:<32} {:>12.6} {:>6}", row.model, row.val_loss, row.epoch);
    }

    let missing: Vec<&str> = history
        .models()
        .filter(|m| !ranking.iter().any(|r| r.model == *m))
        .collect();
    if !missing.is_empty() {
        println!();
        println!("No validation loss recorded: {}", missing.join(", "));
    }

    if let Some(path) = output {
        let json = serde_json::to_string_pretty(&ranking)?;
        std::fs::write(&path, json)
            .with_context(|| format!("Failed to write to {}", path.display()))?;
        println!("Saved to: {}", path.display());
    }

    if let Some(path) = curves {
        let table = history.smoothed_val_loss(window)?;
        table
            .write_csv(&path)
            .with_context(|| format!("Failed to write to {}", path.display()))?;
        println!("Curves saved to: {}", path.display());
    }

    Ok(())
}
