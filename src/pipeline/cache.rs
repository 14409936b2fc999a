//! On-disk cache of decoded samples.

use std::path::{Path, PathBuf};

use imgref::ImgVec;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::error::Result;
use crate::sample::ImageSample;

use super::PipelineConfig;

#[derive(Debug, Serialize, Deserialize)]
struct CacheFile {
    files: Vec<PathBuf>,
    resize: Option<(usize, usize)>,
    native_resolution: (usize, usize),
    samples: Vec<CachedSample>,
}

#[derive(Debug, Serialize, Deserialize)]
struct CachedSample {
    width: usize,
    height: usize,
    data: Vec<f32>,
}

impl CacheFile {
    /// Why this cache cannot serve `files` under `config`, if it cannot.
    fn stale_reason(&self, files: &[PathBuf], config: &PipelineConfig) -> Option<&'static str> {
        if self.files != files {
            return Some("file list changed");
        }
        if self.resize != config.resize || self.native_resolution != config.native_resolution {
            return Some("resize settings changed");
        }
        if self.samples.len() != files.len() {
            return Some("sample count does not match file list");
        }
        let malformed = self.samples.iter().any(|s| {
            s.width == 0 || s.height == 0 || s.width.checked_mul(s.height) != Some(s.data.len())
        });
        malformed.then_some("sample data does not match its dimensions")
    }
}

/// Load cached samples if the cache was built from the same files and
/// decode settings.
///
/// A cache that cannot be read, parsed or trusted is reported and ignored;
/// the caller rebuilds it.
pub(super) fn read(
    path: &Path,
    files: &[PathBuf],
    config: &PipelineConfig,
) -> Option<Vec<ImageSample>> {
    if !path.exists() {
        return None;
    }
    let cache: CacheFile = match std::fs::read_to_string(path)
        .map_err(|e| e.to_string())
        .and_then(|content| serde_json::from_str(&content).map_err(|e| e.to_string()))
    {
        Ok(cache) => cache,
        Err(error) => {
            warn!(cache = %path.display(), %error, "Sample cache is unreadable, rebuilding");
            return None;
        }
    };

    if let Some(reason) = cache.stale_reason(files, config) {
        warn!(cache = %path.display(), reason, "Sample cache is stale, rebuilding");
        return None;
    }

    debug!(cache = %path.display(), samples = cache.samples.len(), "Loaded sample cache");
    Some(
        cache
            .samples
            .into_iter()
            .map(|s| ImgVec::new(s.data, s.width, s.height))
            .collect(),
    )
}

/// Persist decoded samples next to the file list they came from.
pub(super) fn write(
    path: &Path,
    files: &[PathBuf],
    config: &PipelineConfig,
    samples: &[ImageSample],
) -> Result<()> {
    let cache = CacheFile {
        files: files.to_vec(),
        resize: config.resize,
        native_resolution: config.native_resolution,
        samples: samples
            .iter()
            .map(|s| CachedSample {
                width: s.width(),
                height: s.height(),
                data: s.buf().clone(),
            })
            .collect(),
    };
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent)?;
    }
    std::fs::write(path, serde_json::to_string(&cache)?)?;
    debug!(cache = %path.display(), samples = samples.len(), "Wrote sample cache");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn files() -> Vec<PathBuf> {
        vec![PathBuf::from("a.png"), PathBuf::from("b.png")]
    }

    fn samples() -> Vec<ImageSample> {
        vec![
            ImgVec::new(vec![0.0, 0.5, 1.0, 0.25], 2, 2),
            ImgVec::new(vec![1.0, 0.0, 0.0, 1.0], 2, 2),
        ]
    }

    fn config() -> PipelineConfig {
        PipelineConfig::builder().resize(2, 2).build().unwrap()
    }

    #[test]
    fn test_written_cache_is_read_back() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("cache").join("samples.json");
        write(&path, &files(), &config(), &samples()).unwrap();

        let loaded = read(&path, &files(), &config()).unwrap();
        assert_eq!(loaded.len(), 2);
        assert_eq!(loaded[0].buf(), samples()[0].buf());
    }

    #[test]
    fn test_missing_cache() {
        let dir = tempfile::tempdir().unwrap();
        assert!(read(&dir.path().join("none.json"), &files(), &config()).is_none());
    }

    #[test]
    fn test_garbage_cache_is_ignored() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("samples.json");
        std::fs::write(&path, "{ truncated").unwrap();
        assert!(read(&path, &files(), &config()).is_none());
    }

    #[test]
    fn test_changed_settings_make_cache_stale() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("samples.json");
        write(&path, &files(), &config(), &samples()).unwrap();

        let fewer = vec![PathBuf::from("a.png")];
        assert!(read(&path, &fewer, &config()).is_none());

        let resized = PipelineConfig::builder().resize(4, 4).build().unwrap();
        assert!(read(&path, &files(), &resized).is_none());

        let native = PipelineConfig::builder()
            .resize(2, 2)
            .native_resolution(2, 2)
            .build()
            .unwrap();
        assert!(read(&path, &files(), &native).is_none());
    }

    #[test]
    fn test_inconsistent_cache_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("samples.json");

        // One sample for two files.
        write(&path, &files(), &config(), &samples()[..1]).unwrap();
        assert!(read(&path, &files(), &config()).is_none());

        // Pixel data shorter than width * height.
        let cache = CacheFile {
            files: files(),
            resize: Some((2, 2)),
            native_resolution: config().native_resolution,
            samples: vec![
                CachedSample { width: 2, height: 2, data: vec![0.0; 3] },
                CachedSample { width: 2, height: 2, data: vec![0.0; 4] },
            ],
        };
        std::fs::write(&path, serde_json::to_string(&cache).unwrap()).unwrap();
        assert!(read(&path, &files(), &config()).is_none());
    }
}
