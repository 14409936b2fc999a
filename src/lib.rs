//! # recon-eval
//!
//! Image pipeline and reconstruction-quality evaluation for autoencoder
//! models.
//!
//! Model inference stays outside this crate: callers implement [`Model`]
//! (or pass a closure) and a [`ModelLoader`] for their runtime. The library
//! handles decoding and corrupting test images, streaming batches, metric
//! aggregation, qualitative outputs and training-log summaries.
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use recon_eval::{EvalConfig, EvalSession, ModelSpec, TestSet};
//!
//! let config = EvalConfig::builder().seed(42).build()?;
//! let test_set = TestSet::discover("./data/test")?;
//!
//! let mut session = EvalSession::new(config, test_set, |path: &Path| {
//!     // Load the serialized model with your runtime
//!     Ok(Arc::new(my_runtime::load(path)?) as Arc<dyn Model>)
//! })?;
//! session.add_model(ModelSpec::from_dir("./models/unet_mse"));
//!
//! let report = session.custom_evaluation()?;
//! session.write_report(&report)?;
//! ```
//!
//! ## Modules
//!
//! - [`error`]: Error types for the library
//! - [`sample`]: Grayscale image samples and input/target pairs
//! - [`pipeline`]: Decoding, batching and streaming of image files
//! - [`augment`]: Stochastic and caller-controlled corruption
//! - [`corpus`]: Test set discovery and image selection
//! - [`metrics`]: MSE, DSSIM and PSNR
//! - [`stats`]: Descriptive statistics
//! - [`model`]: Model and loader traits, artifact lookup
//! - [`eval`]: Evaluation session and report generation
//! - [`history`]: Training-log import and loss summaries

pub mod augment;
pub mod corpus;
pub mod error;
pub mod eval;
pub mod history;
pub mod metrics;
pub mod model;
pub mod pipeline;
pub mod sample;
pub mod stats;

// Re-export commonly used types
pub use augment::{Augmenter, Corruption, Cutout};
pub use corpus::TestSet;
pub use error::{Error, Result};
pub use eval::{
    qualitative::{QualitativeImage, QualitativeSet},
    report::{EvaluationReport, ModelFailure, ModelMetrics, ModelReport, RuntimeReport},
    session::{EvalConfig, EvalSession},
};
pub use history::{EpochTable, MinValLoss, TrainingHistory, TrainingLog};
pub use metrics::{ImageMetrics, MetricKind};
pub use model::{Model, ModelArtifacts, ModelCache, ModelLoader, ModelSpec};
pub use pipeline::{Batch, CacheMode, ImagePipeline, PipelineConfig};
pub use sample::{ImagePair, ImageSample};
pub use stats::Summary;
