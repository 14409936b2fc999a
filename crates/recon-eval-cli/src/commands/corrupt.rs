//! Single-image corruption command.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result, bail};
use rand::SeedableRng;
use rand::rngs::StdRng;
use recon_eval::augment::{Corruption, Cutout};
use recon_eval::pipeline::{NATIVE_RESOLUTION, parse_image};
use recon_eval::sample::{dimensions, save_jpeg, save_png};
use tracing::debug;

#[allow(clippy::too_many_arguments)]
pub fn run(
    input: PathBuf,
    output: PathBuf,
    dropout: Option<f32>,
    noise: Option<f32>,
    blur: Option<f32>,
    cutout: Option<(usize, (usize, usize))>,
    resize: Option<(usize, usize)>,
    seed: Option<u64>,
) -> Result<()> {
    let corruption = Corruption {
        dropout,
        noise,
        cutout: cutout.map(|(size, offset)| Cutout { size, offset }),
        blur,
    };
    if corruption.is_empty() {
        bail!("Nothing to do: pass at least one of --dropout, --noise, --blur or --cutout-size");
    }

    let image = parse_image(&input, resize, NATIVE_RESOLUTION)
        .with_context(|| format!("Failed to load {}", input.display()))?;
    debug!(size = ?dimensions(&image), ?corruption, "Corrupting image");

    let mut rng = match seed {
        Some(seed) => StdRng::seed_from_u64(seed),
        None => StdRng::from_entropy(),
    };
    let corrupted = corruption.apply(&image, &mut rng)?;

    if is_jpeg(&output) {
        save_jpeg(&corrupted, &output)?;
    } else {
        save_png(&corrupted, &output)?;
    }
    println!("Saved to: {}", output.display());
    Ok(())
}

fn is_jpeg(path: &Path) -> bool {
    path.extension()
        .and_then(|e| e.to_str())
        .is_some_and(|e| e.eq_ignore_ascii_case("jpg") || e.eq_ignore_ascii_case("jpeg"))
}
