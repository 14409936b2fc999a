//! Streaming image pipeline.
//!
//! Turns a list of image paths into batches of [`ImagePair`]s.
//!
//! - **Evaluation mode** (`train = false`): one pass in input order; batch `i`,
//!   element `j` comes from `files[i * batch_size + j]`. The last batch may be
//!   short.
//! - **Training mode** (`train = true`): bounded-buffer shuffle, indefinite
//!   repetition and a background producer that prepares the next batch while
//!   the current one is consumed. Every batch is full.
//!
//! Samples inside a batch are decoded in parallel; corruption (when
//! `augment` is set) is applied afterwards in order, so a fixed seed gives
//! reproducible batches.
//!
//! ## Example
//!
//! ```rust,ignore
//! use recon_eval::pipeline::{ImagePipeline, PipelineConfig};
//!
//! let config = PipelineConfig::builder()
//!     .batch_size(8)
//!     .resize(128, 128)
//!     .train(false)
//!     .build()?;
//!
//! let pipeline = ImagePipeline::new(files, config)?;
//! for batch in pipeline.eval_batches() {
//!     let batch = batch?;
//!     // feed batch.inputs() to a model
//! }
//! ```

mod cache;
pub mod decode;
mod stream;

use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use rand::SeedableRng;
use rand::rngs::StdRng;
use rayon::prelude::*;
use serde::{Deserialize, Serialize};

use crate::augment::Augmenter;
use crate::error::{Error, Result};
use crate::sample::{ImagePair, ImageSample};

pub use decode::parse_image;
pub use stream::{Batches, EvalBatches, TrainBatches};

/// Resolution (height, width) at which images are stored on disk.
pub const NATIVE_RESOLUTION: (usize, usize) = (256, 256);

/// Where decoded samples are kept between passes.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum CacheMode {
    /// Decode every file on every pass.
    #[default]
    None,
    /// Keep decoded samples in memory after the first pass.
    Memory,
    /// Keep decoded samples in memory and persist them to this file.
    File(PathBuf),
}

/// Pipeline configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PipelineConfig {
    /// Pairs per batch.
    pub batch_size: usize,

    /// Sample cache.
    pub cache: CacheMode,

    /// Shuffle buffer capacity in training mode.
    pub shuffle_buffer_size: usize,

    /// Target (height, width), if images should be resized.
    pub resize: Option<(usize, usize)>,

    /// Training mode: shuffle, repeat and prefetch.
    pub train: bool,

    /// Corrupt inputs with [`Augmenter`].
    pub augment: bool,

    /// Corruption parameters used when `augment` is set.
    pub augmenter: Augmenter,

    /// Seed for shuffling and corruption. `None` draws from OS entropy.
    pub seed: Option<u64>,

    /// Resolution that needs no resizing.
    pub native_resolution: (usize, usize),
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            batch_size: 8,
            cache: CacheMode::None,
            shuffle_buffer_size: 1000,
            resize: Some((128, 128)),
            train: true,
            augment: false,
            augmenter: Augmenter::default(),
            seed: None,
            native_resolution: NATIVE_RESOLUTION,
        }
    }
}

impl PipelineConfig {
    /// Create a new configuration builder.
    #[must_use]
    pub fn builder() -> PipelineConfigBuilder {
        PipelineConfigBuilder::default()
    }

    /// Check option values.
    pub fn validate(&self) -> Result<()> {
        if self.batch_size == 0 {
            return Err(Error::Config("batch_size must be greater than 0".to_string()));
        }
        if let Some((h, w)) = self.resize {
            if h == 0 || w == 0 {
                return Err(Error::Config(format!(
                    "resize dimensions must be positive, got {h}x{w}"
                )));
            }
        }
        Ok(())
    }

    /// Random generator for one pass, seeded when a seed is configured.
    pub(crate) fn rng(&self) -> StdRng {
        match self.seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_entropy(),
        }
    }
}

/// Builder for [`PipelineConfig`].
#[derive(Debug, Default)]
pub struct PipelineConfigBuilder {
    config: PipelineConfig,
}

impl PipelineConfigBuilder {
    /// Set the batch size.
    #[must_use]
    pub fn batch_size(mut self, batch_size: usize) -> Self {
        self.config.batch_size = batch_size;
        self
    }

    /// Set the cache mode.
    #[must_use]
    pub fn cache(mut self, cache: CacheMode) -> Self {
        self.config.cache = cache;
        self
    }

    /// Set the shuffle buffer capacity.
    #[must_use]
    pub fn shuffle_buffer_size(mut self, size: usize) -> Self {
        self.config.shuffle_buffer_size = size;
        self
    }

    /// Resize decoded images to `height` x `width`.
    #[must_use]
    pub fn resize(mut self, height: usize, width: usize) -> Self {
        self.config.resize = Some((height, width));
        self
    }

    /// Keep decoded images at their stored resolution.
    #[must_use]
    pub fn no_resize(mut self) -> Self {
        self.config.resize = None;
        self
    }

    /// Enable or disable training mode.
    #[must_use]
    pub fn train(mut self, train: bool) -> Self {
        self.config.train = train;
        self
    }

    /// Enable or disable input corruption.
    #[must_use]
    pub fn augment(mut self, augment: bool) -> Self {
        self.config.augment = augment;
        self
    }

    /// Set the corruption parameters.
    #[must_use]
    pub fn augmenter(mut self, augmenter: Augmenter) -> Self {
        self.config.augmenter = augmenter;
        self
    }

    /// Seed the pipeline's random generator.
    #[must_use]
    pub fn seed(mut self, seed: u64) -> Self {
        self.config.seed = Some(seed);
        self
    }

    /// Set the resolution that needs no resizing.
    #[must_use]
    pub fn native_resolution(mut self, height: usize, width: usize) -> Self {
        self.config.native_resolution = (height, width);
        self
    }

    /// Build and validate the configuration.
    pub fn build(self) -> Result<PipelineConfig> {
        self.config.validate()?;
        Ok(self.config)
    }
}

/// Ordered group of pairs and the files they came from.
#[derive(Debug, Clone)]
pub struct Batch {
    /// Input/target pairs.
    pub pairs: Vec<ImagePair>,
    /// Source path of each pair.
    pub paths: Vec<PathBuf>,
}

impl Batch {
    /// Number of pairs.
    #[must_use]
    pub fn len(&self) -> usize {
        self.pairs.len()
    }

    /// Whether the batch holds no pairs.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.pairs.is_empty()
    }

    /// Model inputs, in order.
    #[must_use]
    pub fn inputs(&self) -> Vec<ImageSample> {
        self.pairs.iter().map(|p| p.input.clone()).collect()
    }

    /// Ground-truth targets, in order.
    pub fn targets(&self) -> impl Iterator<Item = &ImageSample> {
        self.pairs.iter().map(|p| &p.target)
    }
}

/// Image pipeline over a fixed list of files.
#[derive(Debug)]
pub struct ImagePipeline {
    config: PipelineConfig,
    files: Arc<Vec<PathBuf>>,
    cached: Mutex<Option<Arc<Vec<ImageSample>>>>,
}

impl ImagePipeline {
    /// Create a pipeline over `files`.
    pub fn new(files: Vec<PathBuf>, config: PipelineConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            config,
            files: Arc::new(files),
            cached: Mutex::new(None),
        })
    }

    /// Pipeline configuration.
    #[must_use]
    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    /// Input files in order.
    #[must_use]
    pub fn files(&self) -> &[PathBuf] {
        &self.files
    }

    /// Number of input files.
    #[must_use]
    pub fn len(&self) -> usize {
        self.files.len()
    }

    /// Whether there are no input files.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.files.is_empty()
    }

    /// Number of batches in one evaluation pass.
    #[must_use]
    pub fn batches_per_pass(&self) -> usize {
        self.files.len().div_ceil(self.config.batch_size)
    }

    /// Batches according to the configured mode.
    pub fn batches(&self) -> Result<Batches<'_>> {
        if self.config.train {
            Ok(Batches::Train(self.train_batches()?))
        } else {
            Ok(Batches::Eval(self.eval_batches()))
        }
    }

    /// One ordered pass over all files, regardless of the configured mode.
    pub fn eval_batches(&self) -> EvalBatches<'_> {
        EvalBatches::new(self)
    }

    /// Shuffled, repeating batches produced on a background thread.
    pub fn train_batches(&self) -> Result<TrainBatches> {
        if self.files.is_empty() {
            return Err(Error::Config(
                "training pipeline needs at least one input file".to_string(),
            ));
        }
        let cached = self.cached_samples()?;
        TrainBatches::spawn(Arc::clone(&self.files), self.config.clone(), cached)
    }

    /// Decode a single file with this pipeline's resize settings.
    pub fn load(&self, path: &Path) -> Result<ImageSample> {
        parse_image(path, self.config.resize, self.config.native_resolution)
    }

    /// All samples, decoded once and retained, if caching is enabled.
    pub(crate) fn cached_samples(&self) -> Result<Option<Arc<Vec<ImageSample>>>> {
        if self.config.cache == CacheMode::None {
            return Ok(None);
        }
        let mut slot = self
            .cached
            .lock()
            .map_err(|_| Error::Config("sample cache lock poisoned".to_string()))?;
        if let Some(samples) = slot.as_ref() {
            return Ok(Some(Arc::clone(samples)));
        }

        let samples = match &self.config.cache {
            CacheMode::File(path) => match cache::read(path, &self.files, &self.config) {
                Some(samples) => samples,
                None => {
                    let samples = decode_all(&self.files, &self.config)?;
                    cache::write(path, &self.files, &self.config, &samples)?;
                    samples
                }
            },
            _ => decode_all(&self.files, &self.config)?,
        };

        let samples = Arc::new(samples);
        *slot = Some(Arc::clone(&samples));
        Ok(Some(samples))
    }
}

/// Decode files in parallel, preserving order.
pub(crate) fn decode_all(files: &[PathBuf], config: &PipelineConfig) -> Result<Vec<ImageSample>> {
    files
        .par_iter()
        .map(|path| parse_image(path, config.resize, config.native_resolution))
        .collect()
}
