//! Side-by-side reconstructions of selected test images.

use std::path::{Path, PathBuf};

use crate::error::Result;
use crate::eval::report::ModelFailure;
use crate::sample::{ImageSample, save_jpeg};

/// Qualitative output subdirectories under `<output_dir>/qualitative`.
pub const CLEAN_DIR: &str = "clean";
/// Randomly corrupted inputs.
pub const CORRUPTED_DIR: &str = "corrupted";
/// Caller-corrupted single image.
pub const CUSTOM_DIR: &str = "corrupted_custom";

/// One selected image with every model's reconstruction.
#[derive(Debug, Clone)]
pub struct QualitativeImage {
    /// Index of the image in the test set.
    pub image_id: usize,
    /// Source file.
    pub source: PathBuf,
    /// Uncorrupted image.
    pub target: ImageSample,
    /// Image fed to the models.
    pub input: ImageSample,
    /// `(model, reconstruction)` in session order.
    pub reconstructions: Vec<(String, ImageSample)>,
}

impl QualitativeImage {
    /// Reconstruction by `model`.
    #[must_use]
    pub fn reconstruction(&self, model: &str) -> Option<&ImageSample> {
        self.reconstructions
            .iter()
            .find(|(name, _)| name == model)
            .map(|(_, img)| img)
    }
}

/// Output of a qualitative pass.
#[derive(Debug, Clone)]
pub struct QualitativeSet {
    /// Directory the JPEG files were written to.
    pub dir: PathBuf,
    /// Selected images, in selection order.
    pub images: Vec<QualitativeImage>,
    /// Models that could not reconstruct the selection.
    pub failures: Vec<ModelFailure>,
    /// Files written.
    pub written: Vec<PathBuf>,
}

impl QualitativeSet {
    pub(crate) fn new(dir: PathBuf) -> Self {
        Self {
            dir,
            images: Vec::new(),
            failures: Vec::new(),
            written: Vec::new(),
        }
    }

    /// Save `img` as `<dir>/<name>.jpg` and remember the path.
    ///
    /// Characters that cannot appear in a file name are replaced, so a
    /// model name never escapes `dir`.
    pub(crate) fn save(&mut self, name: &str, img: &ImageSample) -> Result<()> {
        let path = self.dir.join(format!("{}.jpg", file_stem(name)));
        save_jpeg(img, &path)?;
        self.written.push(path);
        Ok(())
    }
}

/// `<output_dir>/qualitative/<kind>`, created if missing.
pub(crate) fn prepare_dir(output_dir: &Path, kind: &str) -> Result<PathBuf> {
    let dir = output_dir.join("qualitative").join(kind);
    std::fs::create_dir_all(&dir)?;
    Ok(dir)
}

fn file_stem(name: &str) -> String {
    name.chars()
        .map(|c| match c {
            '/' | '\\' | ':' | '*' | '?' | '"' | '<' | '>' | '|' => '_',
            c if c.is_control() => '_',
            c => c,
        })
        .collect()
}
