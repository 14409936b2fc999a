//! Evaluation session over a set of trained models.
//!
//! This module provides [`EvalSession`], the main entry point for model
//! evaluation. Callers register model directories and a [`ModelLoader`];
//! the session streams the test set through each model, aggregates
//! reconstruction metrics, and writes reports and qualitative images.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::augment::Corruption;
use crate::corpus::TestSet;
use crate::error::{Error, Result};
use crate::eval::qualitative::{
    CLEAN_DIR, CORRUPTED_DIR, CUSTOM_DIR, QualitativeImage, QualitativeSet, prepare_dir,
};
use crate::eval::report::{
    EvaluationReport, ModelFailure, ModelMetrics, ModelReport, RuntimeReport, RuntimeResult,
};
use crate::metrics::{self, MetricKind};
use crate::model::{
    Model, ModelArtifacts, ModelCache, ModelLoader, ModelSpec, find_single, predict_checked,
};
use crate::pipeline::{ImagePipeline, PipelineConfig};
use crate::sample::ImageSample;

/// Configuration for an evaluation session.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EvalConfig {
    /// Directory for reports and qualitative images. Defaults to the parent
    /// of the first model directory.
    pub output_dir: Option<PathBuf>,

    /// Test set pipeline. Always run as a single ordered pass.
    pub pipeline: PipelineConfig,

    /// Test set indices always shown in qualitative passes.
    pub fixed_images: Vec<usize>,

    /// Additional randomly chosen images in qualitative passes.
    pub n_random: usize,

    /// Extension of serialized model files.
    pub model_extension: String,

    /// Seed for image selection and corruption.
    pub seed: Option<u64>,

    /// Base name of report files.
    pub report_name: String,
}

impl Default for EvalConfig {
    fn default() -> Self {
        Self {
            output_dir: None,
            pipeline: PipelineConfig {
                train: false,
                ..PipelineConfig::default()
            },
            fixed_images: vec![183, 75, 6],
            n_random: 2,
            model_extension: "h5".to_string(),
            seed: None,
            report_name: "evaluation".to_string(),
        }
    }
}

impl EvalConfig {
    /// Create a new configuration builder.
    #[must_use]
    pub fn builder() -> EvalConfigBuilder {
        EvalConfigBuilder::default()
    }
}

/// Builder for [`EvalConfig`].
#[derive(Debug, Default)]
pub struct EvalConfigBuilder {
    output_dir: Option<PathBuf>,
    pipeline: Option<PipelineConfig>,
    fixed_images: Option<Vec<usize>>,
    n_random: Option<usize>,
    model_extension: Option<String>,
    seed: Option<u64>,
    report_name: Option<String>,
}

impl EvalConfigBuilder {
    /// Set the output directory.
    #[must_use]
    pub fn output_dir(mut self, path: impl Into<PathBuf>) -> Self {
        self.output_dir = Some(path.into());
        self
    }

    /// Set the test set pipeline configuration.
    #[must_use]
    pub fn pipeline(mut self, pipeline: PipelineConfig) -> Self {
        self.pipeline = Some(pipeline);
        self
    }

    /// Set the fixed qualitative image indices.
    #[must_use]
    pub fn fixed_images(mut self, ids: Vec<usize>) -> Self {
        self.fixed_images = Some(ids);
        self
    }

    /// Set the number of random qualitative images.
    #[must_use]
    pub fn n_random(mut self, n: usize) -> Self {
        self.n_random = Some(n);
        self
    }

    /// Set the model file extension (without the dot).
    #[must_use]
    pub fn model_extension(mut self, ext: impl Into<String>) -> Self {
        self.model_extension = Some(ext.into());
        self
    }

    /// Set the random seed.
    #[must_use]
    pub fn seed(mut self, seed: u64) -> Self {
        self.seed = Some(seed);
        self
    }

    /// Set the report base name.
    #[must_use]
    pub fn report_name(mut self, name: impl Into<String>) -> Self {
        self.report_name = Some(name.into());
        self
    }

    /// Build the configuration.
    pub fn build(self) -> Result<EvalConfig> {
        let defaults = EvalConfig::default();
        let config = EvalConfig {
            output_dir: self.output_dir,
            pipeline: self.pipeline.unwrap_or(defaults.pipeline),
            fixed_images: self.fixed_images.unwrap_or(defaults.fixed_images),
            n_random: self.n_random.unwrap_or(defaults.n_random),
            model_extension: self.model_extension.unwrap_or(defaults.model_extension),
            seed: self.seed,
            report_name: self.report_name.unwrap_or(defaults.report_name),
        };
        config.pipeline.validate()?;
        if config.model_extension.is_empty() {
            return Err(Error::Config("model extension must not be empty".to_string()));
        }
        Ok(config)
    }
}

/// Evaluation session for model comparison.
///
/// # Example
///
/// ```rust,ignore
/// use recon_eval::{EvalConfig, EvalSession, ModelSpec, TestSet};
///
/// let config = EvalConfig::builder().seed(7).build()?;
/// let test_set = TestSet::discover("./data/test")?;
///
/// let mut session = EvalSession::new(config, test_set, my_runtime_loader)?;
/// session.add_model(ModelSpec::from_dir("./models/unet_mse"));
/// session.add_model(ModelSpec::from_dir("./models/unet_dssim"));
///
/// let report = session.custom_evaluation()?;
/// session.write_report(&report)?;
/// ```
pub struct EvalSession {
    config: EvalConfig,
    models: Vec<ModelSpec>,
    test_set: TestSet,
    pipeline: ImagePipeline,
    loader: Box<dyn ModelLoader>,
    cache: ModelCache,
}

impl std::fmt::Debug for EvalSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EvalSession")
            .field("config", &self.config)
            .field("models", &self.models)
            .field("test_images", &self.test_set.len())
            .field("cache", &self.cache)
            .finish_non_exhaustive()
    }
}

impl EvalSession {
    /// Create a session over `test_set`, loading models with `loader`.
    pub fn new(
        config: EvalConfig,
        test_set: TestSet,
        loader: impl ModelLoader + 'static,
    ) -> Result<Self> {
        if test_set.is_empty() {
            return Err(Error::Config("test set contains no images".to_string()));
        }

        let mut pipeline_config = config.pipeline.clone();
        pipeline_config.train = false;
        if pipeline_config.seed.is_none() {
            pipeline_config.seed = config.seed;
        }
        let pipeline = ImagePipeline::new(test_set.files.clone(), pipeline_config)?;

        Ok(Self {
            config,
            models: Vec::new(),
            test_set,
            pipeline,
            loader: Box::new(loader),
            cache: ModelCache::default(),
        })
    }

    /// Register a model.
    pub fn add_model(&mut self, spec: ModelSpec) -> &mut Self {
        self.models.push(spec);
        self
    }

    /// Registered models in evaluation order.
    #[must_use]
    pub fn models(&self) -> &[ModelSpec] {
        &self.models
    }

    /// Session configuration.
    #[must_use]
    pub fn config(&self) -> &EvalConfig {
        &self.config
    }

    /// Test images.
    #[must_use]
    pub fn test_set(&self) -> &TestSet {
        &self.test_set
    }

    /// Directory reports and qualitative images are written to.
    #[must_use]
    pub fn output_dir(&self) -> PathBuf {
        self.config
            .output_dir
            .clone()
            .or_else(|| {
                self.models
                    .first()
                    .and_then(|m| m.dir.parent())
                    .map(Path::to_path_buf)
            })
            .unwrap_or_else(|| PathBuf::from("."))
    }

    /// Random generator seeded from the configuration.
    #[must_use]
    pub fn rng(&self) -> StdRng {
        match self.config.seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_entropy(),
        }
    }

    /// Model file and training log of a registered model.
    pub fn locate_artifacts(&self, spec: &ModelSpec) -> Result<ModelArtifacts> {
        ModelArtifacts::locate(spec, &self.config.model_extension)
    }

    /// Mean and spread of MSE, DSSIM and PSNR for every model.
    ///
    /// A model that fails to load or predict is recorded in
    /// [`EvaluationReport::failures`]; the remaining models are still
    /// evaluated. A test image that cannot be decoded aborts the run.
    pub fn custom_evaluation(&mut self) -> Result<EvaluationReport> {
        self.ensure_models()?;
        let mut report = EvaluationReport::new(self.config.report_name.clone());

        for spec in self.models.clone() {
            match self.evaluate_model(&spec) {
                Ok(metrics) => {
                    info!(
                        model = %spec.name,
                        images = metrics.images,
                        mse = ?metrics.mean(MetricKind::Mse),
                        dssim = ?metrics.mean(MetricKind::Dssim),
                        "Evaluated model"
                    );
                    report.models.push(ModelReport {
                        model: spec.name,
                        metrics,
                    });
                }
                Err(e) => report.failures.push(isolate(&spec, e)?),
            }
        }

        Ok(report)
    }

    /// Metrics computed by each model's own evaluation routine.
    pub fn runtime_evaluation(&mut self) -> Result<RuntimeReport> {
        self.ensure_models()?;
        let mut report = RuntimeReport::new(format!("{}_runtime", self.config.report_name));

        for spec in self.models.clone() {
            let result = match self.load_model(&spec) {
                Ok(model) => self.run_model_evaluation(model.as_ref(), &spec.name)?,
                Err(e) => Err(e),
            };
            match result {
                Ok(results) => {
                    info!(model = %spec.name, ?results, "Runtime evaluation finished");
                    report.models.push(RuntimeResult {
                        model: spec.name,
                        results,
                    });
                }
                Err(e) => report.failures.push(isolate(&spec, e)?),
            }
        }

        Ok(report)
    }

    /// Reconstruct the selected images without corruption.
    ///
    /// Writes `{i}_target.jpg` and `{i}_{model}.jpg` to
    /// `qualitative/clean`, where `i` is the position in the selection.
    pub fn qualitative_clean<R: Rng + ?Sized>(&mut self, rng: &mut R) -> Result<QualitativeSet> {
        self.ensure_models()?;
        let ids = self.select(rng)?;
        let targets = self.load_selection(&ids)?;
        let mut set = QualitativeSet::new(prepare_dir(&self.output_dir(), CLEAN_DIR)?);

        for (i, target) in targets.iter().enumerate() {
            set.save(&format!("{i}_target"), target)?;
        }
        let reconstructions = self.reconstruct_all(&targets, &mut set.failures)?;
        for (model, outputs) in &reconstructions {
            for (i, output) in outputs.iter().enumerate() {
                set.save(&format!("{i}_{model}"), output)?;
            }
        }

        set.images = self.assemble(&ids, targets.clone(), targets, &reconstructions);
        debug!(dir = %set.dir.display(), files = set.written.len(), "Wrote clean reconstructions");
        Ok(set)
    }

    /// Reconstruct the selected images after random corruption.
    ///
    /// Inputs are corrupted with the pipeline's [`Augmenter`](crate::augment::Augmenter).
    /// Writes `{i}_Input.jpg` and `{i}_{model}.jpg` to `qualitative/corrupted`.
    pub fn qualitative_corrupted<R: Rng + ?Sized>(
        &mut self,
        rng: &mut R,
    ) -> Result<QualitativeSet> {
        self.ensure_models()?;
        let ids = self.select(rng)?;
        let targets = self.load_selection(&ids)?;
        let mut set = QualitativeSet::new(prepare_dir(&self.output_dir(), CORRUPTED_DIR)?);

        let augmenter = &self.config.pipeline.augmenter;
        let inputs: Vec<ImageSample> = targets
            .iter()
            .map(|target| {
                let mut input = target.clone();
                augmenter.corrupt(&mut input, rng);
                input
            })
            .collect();

        for (i, input) in inputs.iter().enumerate() {
            set.save(&format!("{i}_Input"), input)?;
        }
        let reconstructions = self.reconstruct_all(&inputs, &mut set.failures)?;
        for (model, outputs) in &reconstructions {
            for (i, output) in outputs.iter().enumerate() {
                set.save(&format!("{i}_{model}"), output)?;
            }
        }

        set.images = self.assemble(&ids, targets, inputs, &reconstructions);
        Ok(set)
    }

    /// Reconstruct one image after caller-controlled corruption.
    ///
    /// Writes `{id}_Original.jpg`, `{id}_Input.jpg` and `{id}_{model}.jpg`
    /// to `qualitative/corrupted_custom`.
    pub fn qualitative_custom<R: Rng + ?Sized>(
        &mut self,
        image_id: usize,
        corruption: &Corruption,
        rng: &mut R,
    ) -> Result<QualitativeSet> {
        self.ensure_models()?;
        corruption.validate()?;
        let targets = self.load_selection(&[image_id])?;
        let inputs = vec![corruption.apply(&targets[0], rng)?];
        let mut set = QualitativeSet::new(prepare_dir(&self.output_dir(), CUSTOM_DIR)?);

        set.save(&format!("{image_id}_Original"), &targets[0])?;
        set.save(&format!("{image_id}_Input"), &inputs[0])?;
        let reconstructions = self.reconstruct_all(&inputs, &mut set.failures)?;
        for (model, outputs) in &reconstructions {
            set.save(&format!("{image_id}_{model}"), &outputs[0])?;
        }

        set.images = self.assemble(&[image_id], targets, inputs, &reconstructions);
        Ok(set)
    }

    /// Write `{report_name}.json` and `{report_name}.csv` to the output directory.
    pub fn write_report(&self, report: &EvaluationReport) -> Result<PathBuf> {
        let dir = self.output_dir();
        std::fs::create_dir_all(&dir)?;
        let json_path = dir.join(format!("{}.json", report.name));
        report.write_json(&json_path)?;
        report.write_csv(dir.join(format!("{}.csv", report.name)))?;
        Ok(json_path)
    }

    /// Write a runtime report as JSON and CSV to the output directory.
    pub fn write_runtime_report(&self, report: &RuntimeReport) -> Result<PathBuf> {
        let dir = self.output_dir();
        std::fs::create_dir_all(&dir)?;
        let json_path = dir.join(format!("{}.json", report.name));
        report.write_json(&json_path)?;
        report.write_csv(dir.join(format!("{}.csv", report.name)))?;
        Ok(json_path)
    }

    fn ensure_models(&self) -> Result<()> {
        if self.models.is_empty() {
            return Err(Error::Config("no models registered".to_string()));
        }
        Ok(())
    }

    fn load_model(&mut self, spec: &ModelSpec) -> Result<Arc<dyn Model>> {
        let model_file = find_single(spec, &self.config.model_extension)?;
        self.cache
            .get_or_load(&spec.name, &model_file, self.loader.as_ref())
    }

    fn evaluate_model(&mut self, spec: &ModelSpec) -> Result<ModelMetrics> {
        let model = self.load_model(spec)?;
        debug!(
            model = %spec.name,
            batches = self.pipeline.batches_per_pass(),
            "Starting evaluation pass"
        );

        let mut per_image = Vec::with_capacity(self.pipeline.len());
        for batch in self.pipeline.eval_batches() {
            let batch = batch?;
            let outputs = predict_checked(model.as_ref(), &spec.name, &batch.inputs())?;
            for (target, output) in batch.targets().zip(&outputs) {
                per_image.push(metrics::compare(target, output)?);
            }
        }
        Ok(ModelMetrics::from_images(&per_image))
    }

    /// Run a model's own evaluation over one pass.
    ///
    /// The outer error is a pipeline failure and aborts the run; the inner
    /// result is the model's.
    fn run_model_evaluation(
        &self,
        model: &dyn Model,
        name: &str,
    ) -> Result<Result<BTreeMap<String, f64>>> {
        debug!(model = name, "Starting runtime evaluation pass");
        let mut aborted = None;
        let result = {
            let mut batches = self.pipeline.eval_batches().map(|batch| {
                batch.map_err(|e| {
                    let reason = format!("evaluation pass aborted: {e}");
                    aborted = Some(e);
                    Error::Inference {
                        model: name.to_string(),
                        reason,
                    }
                })
            });
            model.evaluate(&mut batches)
        };
        if let Some(e) = aborted {
            return Err(e);
        }
        Ok(result.map_err(|e| {
            if e.is_model_failure() {
                e
            } else {
                Error::Inference {
                    model: name.to_string(),
                    reason: e.to_string(),
                }
            }
        }))
    }

    fn select<R: Rng + ?Sized>(&self, rng: &mut R) -> Result<Vec<usize>> {
        self.test_set
            .select(&self.config.fixed_images, self.config.n_random, rng)
    }

    fn load_selection(&self, ids: &[usize]) -> Result<Vec<ImageSample>> {
        ids.iter()
            .map(|&id| self.pipeline.load(self.test_set.get(id)?))
            .collect()
    }

    /// Predict `inputs` with every model; failing models are recorded.
    fn reconstruct_all(
        &mut self,
        inputs: &[ImageSample],
        failures: &mut Vec<ModelFailure>,
    ) -> Result<Vec<(String, Vec<ImageSample>)>> {
        let mut out = Vec::with_capacity(self.models.len());
        for spec in self.models.clone() {
            let result = self
                .load_model(&spec)
                .and_then(|model| predict_checked(model.as_ref(), &spec.name, inputs));
            match result {
                Ok(outputs) => out.push((spec.name, outputs)),
                Err(e) => failures.push(isolate(&spec, e)?),
            }
        }
        Ok(out)
    }

    fn assemble(
        &self,
        ids: &[usize],
        targets: Vec<ImageSample>,
        inputs: Vec<ImageSample>,
        reconstructions: &[(String, Vec<ImageSample>)],
    ) -> Vec<QualitativeImage> {
        ids.iter()
            .zip(targets.into_iter().zip(inputs))
            .enumerate()
            .map(|(i, (&image_id, (target, input)))| QualitativeImage {
                image_id,
                source: self.test_set.files[image_id].clone(),
                target,
                input,
                reconstructions: reconstructions
                    .iter()
                    .map(|(model, outputs)| (model.clone(), outputs[i].clone()))
                    .collect(),
            })
            .collect()
    }
}

/// Record a model's failure, or hand back an error that must abort the run.
fn isolate(spec: &ModelSpec, error: Error) -> Result<ModelFailure> {
    if !error.is_model_failure() {
        return Err(error);
    }
    warn!(model = %spec.name, error = %error, "Model evaluation failed");
    Ok(ModelFailure {
        model: spec.name.clone(),
        error: error.to_string(),
    })
}
