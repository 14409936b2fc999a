//! Model capabilities consumed by the evaluation session.
//!
//! Inference is provided by an external runtime. This module defines the
//! seams: [`Model`] maps a batch of inputs to reconstructions,
//! [`ModelLoader`] turns a serialized artifact into a [`Model`], and
//! [`ModelCache`] keeps each loaded model for the lifetime of a session.
//!
//! Closures implement both traits, so tests and small drivers can register
//! models without a runtime:
//!
//! ```rust,ignore
//! let identity = |batch: &[ImageSample]| -> Result<Vec<ImageSample>> { Ok(batch.to_vec()) };
//! ```

use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::{Error, Result};
use crate::metrics;
use crate::pipeline::Batch;
use crate::sample::{ImageSample, dimensions};
use crate::stats;

/// Extension of training log files.
pub const TRAINING_LOG_EXTENSION: &str = "csv";

/// Reconstruction model.
pub trait Model: Send + Sync {
    /// Reconstruct each input image, returning outputs in the same order.
    fn predict(&self, inputs: &[ImageSample]) -> Result<Vec<ImageSample>>;

    /// Evaluate the model over a dataset and report named scalar results.
    ///
    /// The default reports `loss` as the mean per-image MSE. Runtimes that
    /// track their own compiled metrics should override this.
    fn evaluate(
        &self,
        batches: &mut dyn Iterator<Item = Result<Batch>>,
    ) -> Result<BTreeMap<String, f64>> {
        let mut losses = Vec::new();
        for batch in batches {
            let batch = batch?;
            let outputs = self.predict(&batch.inputs())?;
            for (target, output) in batch.targets().zip(&outputs) {
                losses.push(metrics::mse(target, output)?);
            }
        }
        let mut results = BTreeMap::new();
        results.insert("loss".to_string(), stats::mean(&losses));
        Ok(results)
    }
}

impl<F> Model for F
where
    F: Fn(&[ImageSample]) -> Result<Vec<ImageSample>> + Send + Sync,
{
    fn predict(&self, inputs: &[ImageSample]) -> Result<Vec<ImageSample>> {
        self(inputs)
    }
}

/// Loads a serialized model artifact.
pub trait ModelLoader {
    /// Load the model stored at `path`.
    fn load(&self, path: &Path) -> Result<Arc<dyn Model>>;
}

impl<F> ModelLoader for F
where
    F: Fn(&Path) -> Result<Arc<dyn Model>>,
{
    fn load(&self, path: &Path) -> Result<Arc<dyn Model>> {
        self(path)
    }
}

/// A model to evaluate: display name plus artifact directory.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModelSpec {
    /// Name used in reports and output file names.
    pub name: String,
    /// Directory holding the model file and its training log.
    pub dir: PathBuf,
}

impl ModelSpec {
    /// Create a model spec.
    #[must_use]
    pub fn new(name: impl Into<String>, dir: impl Into<PathBuf>) -> Self {
        Self {
            name: name.into(),
            dir: dir.into(),
        }
    }

    /// Use the directory's own name as the model name.
    #[must_use]
    pub fn from_dir(dir: impl Into<PathBuf>) -> Self {
        let dir = dir.into();
        let name = dir
            .file_name()
            .and_then(|s| s.to_str())
            .unwrap_or("model")
            .to_string();
        Self { name, dir }
    }
}

/// Files belonging to one model.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModelArtifacts {
    /// Serialized model.
    pub model_file: PathBuf,
    /// Per-epoch training log.
    pub training_log: PathBuf,
}

impl ModelArtifacts {
    /// Find exactly one model file and exactly one training log in the
    /// model's directory.
    pub fn locate(spec: &ModelSpec, model_extension: &str) -> Result<Self> {
        Ok(Self {
            model_file: find_single(spec, model_extension)?,
            training_log: find_single(spec, TRAINING_LOG_EXTENSION)?,
        })
    }
}

/// Path of the single file with `extension` in the model directory.
pub fn find_single(spec: &ModelSpec, extension: &str) -> Result<PathBuf> {
    let entries = std::fs::read_dir(&spec.dir).map_err(|e| Error::ModelLoad {
        model: spec.name.clone(),
        reason: format!("cannot read {}: {e}", spec.dir.display()),
    })?;

    let mut matches = Vec::new();
    for entry in entries {
        let path = entry?.path();
        let matches_ext = path
            .extension()
            .and_then(|e| e.to_str())
            .map_or(false, |e| e.eq_ignore_ascii_case(extension));
        if matches_ext && path.is_file() {
            matches.push(path);
        }
    }

    match matches.len() {
        1 => Ok(matches.remove(0)),
        0 => Err(Error::ModelLoad {
            model: spec.name.clone(),
            reason: format!("no .{extension} file in {}", spec.dir.display()),
        }),
        n => Err(Error::ModelLoad {
            model: spec.name.clone(),
            reason: format!("{n} .{extension} files in {}, expected one", spec.dir.display()),
        }),
    }
}

/// Loaded models keyed by artifact path.
#[derive(Default)]
pub struct ModelCache {
    models: HashMap<PathBuf, Arc<dyn Model>>,
}

impl fmt::Debug for ModelCache {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ModelCache")
            .field("models", &self.models.keys().collect::<Vec<_>>())
            .finish()
    }
}

impl ModelCache {
    /// Return the cached model for `path`, loading it on first use.
    pub fn get_or_load(
        &mut self,
        name: &str,
        path: &Path,
        loader: &dyn ModelLoader,
    ) -> Result<Arc<dyn Model>> {
        if let Some(model) = self.models.get(path) {
            return Ok(Arc::clone(model));
        }
        debug!(model = name, path = %path.display(), "Loading model");
        let model = loader.load(path).map_err(|e| match e {
            Error::ModelLoad { .. } => e,
            other => Error::ModelLoad {
                model: name.to_string(),
                reason: other.to_string(),
            },
        })?;
        self.models.insert(path.to_path_buf(), Arc::clone(&model));
        Ok(model)
    }

    /// Insert an already loaded model.
    pub fn insert(&mut self, path: impl Into<PathBuf>, model: Arc<dyn Model>) {
        self.models.insert(path.into(), model);
    }

    /// Number of loaded models.
    #[must_use]
    pub fn len(&self) -> usize {
        self.models.len()
    }

    /// Whether no model has been loaded.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.models.is_empty()
    }
}

/// Run inference and check that every output matches its input's shape.
///
/// Errors raised by the model itself are reported as [`Error::Inference`].
pub fn predict_checked(
    model: &dyn Model,
    name: &str,
    inputs: &[ImageSample],
) -> Result<Vec<ImageSample>> {
    let outputs = model.predict(inputs).map_err(|e| match e {
        Error::Inference { .. } | Error::ShapeMismatch { .. } => e,
        other => Error::Inference {
            model: name.to_string(),
            reason: other.to_string(),
        },
    })?;
    if outputs.len() != inputs.len() {
        return Err(Error::Inference {
            model: name.to_string(),
            reason: format!("{} outputs for {} inputs", outputs.len(), inputs.len()),
        });
    }
    for (input, output) in inputs.iter().zip(&outputs) {
        let expected = dimensions(input);
        let actual = dimensions(output);
        if expected != actual {
            return Err(Error::ShapeMismatch { expected, actual });
        }
    }
    Ok(outputs)
}
