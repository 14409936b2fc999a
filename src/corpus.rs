//! Test set discovery and image selection.
//!
//! ## Example
//!
//! ```rust,ignore
//! use recon_eval::corpus::TestSet;
//!
//! let test_set = TestSet::discover("./data/test")?;
//! let picks = test_set.select(&[183, 75, 6], 2, &mut rng)?;
//! ```

use std::fs;
use std::path::{Path, PathBuf};

use rand::Rng;
use rand::seq::index;

use crate::error::{Error, Result};

/// Supported image extensions.
const SUPPORTED_EXTENSIONS: &[&str] = &["png", "jpg", "jpeg", "bmp", "tif", "tiff"];

/// Ordered list of test images.
#[derive(Debug, Clone, Default)]
pub struct TestSet {
    /// Directory the images were discovered in, if any.
    pub root: Option<PathBuf>,
    /// Image paths; an image's index is its position here.
    pub files: Vec<PathBuf>,
}

impl TestSet {
    /// Use an explicit, already ordered list of files.
    #[must_use]
    pub fn from_files(files: Vec<PathBuf>) -> Self {
        Self { root: None, files }
    }

    /// Recursively discover images under `root`, sorted by path.
    ///
    /// Hidden directories are skipped.
    pub fn discover(root: impl AsRef<Path>) -> Result<Self> {
        let root = root.as_ref();
        Ok(Self {
            root: Some(root.to_path_buf()),
            files: discover_images(root)?,
        })
    }

    /// Number of images.
    #[must_use]
    pub fn len(&self) -> usize {
        self.files.len()
    }

    /// Whether the set holds no images.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.files.is_empty()
    }

    /// Path of the image at `index`.
    pub fn get(&self, index: usize) -> Result<&Path> {
        self.files.get(index).map(PathBuf::as_path).ok_or_else(|| {
            Error::Config(format!(
                "image index {index} out of range (test set has {} images)",
                self.files.len()
            ))
        })
    }

    /// Pick `fixed` indices followed by `n_random` indices sampled without
    /// replacement from the whole set.
    ///
    /// Random picks may repeat a fixed index.
    pub fn select<R: Rng + ?Sized>(
        &self,
        fixed: &[usize],
        n_random: usize,
        rng: &mut R,
    ) -> Result<Vec<usize>> {
        for &i in fixed {
            self.get(i)?;
        }
        if n_random > self.files.len() {
            return Err(Error::Config(format!(
                "cannot sample {n_random} images from a test set of {}",
                self.files.len()
            )));
        }
        let mut picks = fixed.to_vec();
        picks.extend(index::sample(rng, self.files.len(), n_random).into_iter());
        Ok(picks)
    }
}

/// Recursively list supported image files under `root`, sorted by path.
pub fn discover_images(root: &Path) -> Result<Vec<PathBuf>> {
    if !root.exists() {
        return Err(Error::Corpus(format!("Path does not exist: {}", root.display())));
    }
    if !root.is_dir() {
        return Err(Error::Corpus(format!("Path is not a directory: {}", root.display())));
    }

    let mut files = Vec::new();
    discover_recursive(root, &mut files)?;
    files.sort();
    Ok(files)
}

fn discover_recursive(current: &Path, files: &mut Vec<PathBuf>) -> Result<()> {
    let entries = fs::read_dir(current).map_err(|e| {
        Error::Corpus(format!("Failed to read directory {}: {}", current.display(), e))
    })?;

    for entry in entries {
        let entry = entry.map_err(|e| {
            Error::Corpus(format!("Failed to read entry in {}: {}", current.display(), e))
        })?;
        let path = entry.path();

        if path.is_dir() {
            if path
                .file_name()
                .and_then(|s| s.to_str())
                .map_or(false, |s| s.starts_with('.'))
            {
                continue;
            }
            discover_recursive(&path, files)?;
        } else if path.is_file() && is_supported(&path) {
            files.push(path);
        }
    }

    Ok(())
}

fn is_supported(path: &Path) -> bool {
    path.extension()
        .and_then(|e| e.to_str())
        .map_or(false, |e| SUPPORTED_EXTENSIONS.contains(&e.to_lowercase().as_str()))
}
