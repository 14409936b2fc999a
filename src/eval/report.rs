//! Report types for evaluation results.
//!
//! Reports serialize to JSON and to a flat CSV summary with one row per
//! model.

use std::cmp::Ordering;
use std::collections::{BTreeMap, BTreeSet};
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::metrics::{ImageMetrics, MetricKind};
use crate::stats::Summary;

/// Aggregated metrics of one model over the test set.
///
/// Perfect reconstructions have infinite PSNR. They are excluded from the
/// PSNR summary and counted in `perfect` instead.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelMetrics {
    /// Number of evaluated images.
    pub images: usize,
    /// Mean squared error.
    pub mse: Option<Summary>,
    /// Structural dissimilarity.
    pub dssim: Option<Summary>,
    /// PSNR over images with finite PSNR.
    pub psnr: Option<Summary>,
    /// Images reconstructed exactly (infinite PSNR).
    pub perfect: usize,
}

impl ModelMetrics {
    /// Aggregate per-image metrics.
    #[must_use]
    pub fn from_images(per_image: &[ImageMetrics]) -> Self {
        let collect = |kind: MetricKind| -> Vec<f64> {
            per_image.iter().map(|m| m.get(kind)).collect()
        };
        let (psnr, perfect) = Summary::compute_finite(&collect(MetricKind::Psnr));

        Self {
            images: per_image.len(),
            mse: Summary::compute(&collect(MetricKind::Mse)),
            dssim: Summary::compute(&collect(MetricKind::Dssim)),
            psnr,
            perfect,
        }
    }

    /// Summary of one metric.
    #[must_use]
    pub fn summary(&self, kind: MetricKind) -> Option<&Summary> {
        match kind {
            MetricKind::Mse => self.mse.as_ref(),
            MetricKind::Dssim => self.dssim.as_ref(),
            MetricKind::Psnr => self.psnr.as_ref(),
        }
    }

    /// Mean of one metric.
    ///
    /// A model whose every image is a perfect reconstruction has an
    /// infinite PSNR mean.
    #[must_use]
    pub fn mean(&self, kind: MetricKind) -> Option<f64> {
        match self.summary(kind) {
            Some(s) => Some(s.mean),
            None if kind == MetricKind::Psnr && self.perfect > 0 => Some(f64::INFINITY),
            None => None,
        }
    }
}

/// Metrics of one successfully evaluated model.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelReport {
    /// Model name.
    pub model: String,
    /// Aggregated metrics.
    pub metrics: ModelMetrics,
}

/// A model that could not be evaluated.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModelFailure {
    /// Model name.
    pub model: String,
    /// Error message.
    pub error: String,
}

/// Reconstruction metrics of all models on one test set.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EvaluationReport {
    /// Report name, used for output file names.
    pub name: String,

    /// Evaluated models, in session order.
    pub models: Vec<ModelReport>,

    /// Models that failed, in session order.
    pub failures: Vec<ModelFailure>,

    /// When this report was generated.
    #[serde(with = "chrono_serde")]
    pub timestamp: chrono::DateTime<chrono::Utc>,
}

impl EvaluationReport {
    /// Create an empty report.
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            models: Vec::new(),
            failures: Vec::new(),
            timestamp: chrono::Utc::now(),
        }
    }

    /// Report of one model.
    #[must_use]
    pub fn model(&self, name: &str) -> Option<&ModelReport> {
        self.models.iter().find(|m| m.model == name)
    }

    /// Models ordered best first by the mean of `kind`.
    ///
    /// Models without a value for the metric come last.
    #[must_use]
    pub fn ranked_by(&self, kind: MetricKind) -> Vec<&ModelReport> {
        let mut ranked: Vec<&ModelReport> = self.models.iter().collect();
        ranked.sort_by(|a, b| {
            match (a.metrics.mean(kind), b.metrics.mean(kind)) {
                (Some(x), Some(y)) if kind.higher_is_better() => y.total_cmp(&x),
                (Some(x), Some(y)) => x.total_cmp(&y),
                (Some(_), None) => Ordering::Less,
                (None, Some(_)) => Ordering::Greater,
                (None, None) => Ordering::Equal,
            }
        });
        ranked
    }

    /// Write the report as pretty-printed JSON.
    pub fn write_json(&self, path: impl AsRef<Path>) -> Result<()> {
        let json = serde_json::to_string_pretty(self)?;
        std::fs::write(path, json)?;
        Ok(())
    }

    /// Write a CSV summary with one row per evaluated model.
    pub fn write_csv(&self, path: impl AsRef<Path>) -> Result<()> {
        let mut wtr = csv::Writer::from_path(path)?;

        wtr.write_record([
            "model",
            "images",
            "mse_mean",
            "mse_std",
            "dssim_mean",
            "dssim_std",
            "psnr_mean",
            "psnr_std",
            "psnr_perfect",
        ])?;

        for report in &self.models {
            let m = &report.metrics;
            let cell = |s: Option<&Summary>, pick: fn(&Summary) -> f64, precision: usize| {
                s.map_or(String::new(), |s| format!("{:.*}", precision, pick(s)))
            };
            wtr.write_record([
                report.model.clone(),
                m.images.to_string(),
                cell(m.mse.as_ref(), |s| s.mean, 6),
                cell(m.mse.as_ref(), |s| s.std_dev, 6),
                cell(m.dssim.as_ref(), |s| s.mean, 6),
                cell(m.dssim.as_ref(), |s| s.std_dev, 6),
                cell(m.psnr.as_ref(), |s| s.mean, 2),
                cell(m.psnr.as_ref(), |s| s.std_dev, 2),
                m.perfect.to_string(),
            ])?;
        }

        wtr.flush()?;
        Ok(())
    }
}

/// Results reported by a model's own evaluation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RuntimeResult {
    /// Model name.
    pub model: String,
    /// Named scalar results, e.g. `loss`.
    pub results: BTreeMap<String, f64>,
}

/// Runtime-reported metrics of all models.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RuntimeReport {
    /// Report name.
    pub name: String,
    /// Evaluated models, in session order.
    pub models: Vec<RuntimeResult>,
    /// Models that failed.
    pub failures: Vec<ModelFailure>,
    /// When this report was generated.
    #[serde(with = "chrono_serde")]
    pub timestamp: chrono::DateTime<chrono::Utc>,
}

impl RuntimeReport {
    /// Create an empty report.
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            models: Vec::new(),
            failures: Vec::new(),
            timestamp: chrono::Utc::now(),
        }
    }

    /// Write the report as pretty-printed JSON.
    pub fn write_json(&self, path: impl AsRef<Path>) -> Result<()> {
        let json = serde_json::to_string_pretty(self)?;
        std::fs::write(path, json)?;
        Ok(())
    }

    /// Write a CSV with one column per reported metric name.
    pub fn write_csv(&self, path: impl AsRef<Path>) -> Result<()> {
        let names: BTreeSet<&str> = self
            .models
            .iter()
            .flat_map(|m| m.results.keys().map(String::as_str))
            .collect();

        let mut wtr = csv::Writer::from_path(path)?;
        let mut header = vec!["model"];
        header.extend(names.iter().copied());
        wtr.write_record(&header)?;

        for model in &self.models {
            let mut record = vec![model.model.clone()];
            record.extend(
                names
                    .iter()
                    .map(|n| model.results.get(*n).map_or(String::new(), |v| v.to_string())),
            );
            wtr.write_record(&record)?;
        }

        wtr.flush()?;
        Ok(())
    }
}

mod chrono_serde {
    use chrono::{DateTime, Utc};
    use serde::{Deserialize, Deserializer, Serialize, Serializer};

    pub fn serialize<S>(dt: &DateTime<Utc>, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        dt.to_rfc3339().serialize(serializer)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<DateTime<Utc>, D::Error>
    where
        D: Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        DateTime::parse_from_rfc3339(&s)
            .map(|dt| dt.with_timezone(&Utc))
            .map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn metrics(mse: f64, dssim: f64, psnr: f64) -> ImageMetrics {
        ImageMetrics { mse, dssim, psnr }
    }

    fn report_with(models: &[(&str, &[ImageMetrics])]) -> EvaluationReport {
        let mut report = EvaluationReport::new("test");
        for (name, per_image) in models {
            report.models.push(ModelReport {
                model: (*name).to_string(),
                metrics: ModelMetrics::from_images(per_image),
            });
        }
        report
    }

    #[test]
    fn test_model_metrics_excludes_infinite_psnr() {
        let m = ModelMetrics::from_images(&[
            metrics(0.0, 0.0, f64::INFINITY),
            metrics(0.01, 0.1, 20.0),
            metrics(0.001, 0.05, 30.0),
        ]);
        assert_eq!(m.images, 3);
        assert_eq!(m.perfect, 1);
        let psnr = m.psnr.unwrap();
        assert_eq!(psnr.count, 2);
        assert!((psnr.mean - 25.0).abs() < 1e-12);
        assert_eq!(m.mse.unwrap().count, 3);
    }

    #[test]
    fn test_all_perfect_has_infinite_psnr_mean() {
        let m = ModelMetrics::from_images(&[metrics(0.0, 0.0, f64::INFINITY)]);
        assert!(m.psnr.is_none());
        assert_eq!(m.mean(MetricKind::Psnr), Some(f64::INFINITY));
        assert_eq!(m.mean(MetricKind::Mse), Some(0.0));
    }

    #[test]
    fn test_ranked_by_direction() {
        let report = report_with(&[
            ("blurry", &[metrics(0.02, 0.2, 17.0)]),
            ("sharp", &[metrics(0.005, 0.05, 23.0)]),
            ("perfect", &[metrics(0.0, 0.0, f64::INFINITY)]),
        ]);

        let by_mse: Vec<_> = report.ranked_by(MetricKind::Mse).iter().map(|m| m.model.as_str()).collect();
        assert_eq!(by_mse, ["perfect", "sharp", "blurry"]);

        let by_psnr: Vec<_> = report.ranked_by(MetricKind::Psnr).iter().map(|m| m.model.as_str()).collect();
        assert_eq!(by_psnr, ["perfect", "sharp", "blurry"]);
    }

    #[test]
    fn test_json_roundtrip_keeps_failures() {
        let dir = tempfile::tempdir().unwrap();
        let mut report = report_with(&[("a", &[metrics(0.01, 0.1, 20.0)])]);
        report.failures.push(ModelFailure {
            model: "b".to_string(),
            error: "Model load failed (b): no .h5 file".to_string(),
        });

        let path = dir.path().join("report.json");
        report.write_json(&path).unwrap();
        let loaded: EvaluationReport =
            serde_json::from_str(&std::fs::read_to_string(&path).unwrap()).unwrap();
        assert_eq!(loaded.models, report.models);
        assert_eq!(loaded.failures, report.failures);
        assert_eq!(loaded.timestamp, report.timestamp);
    }

    #[test]
    fn test_csv_summary() {
        let dir = tempfile::tempdir().unwrap();
        let report = report_with(&[("a", &[metrics(0.01, 0.1, 20.0), metrics(0.03, 0.3, 15.0)])]);
        let path = dir.path().join("report.csv");
        report.write_csv(&path).unwrap();

        let text = std::fs::read_to_string(&path).unwrap();
        let mut lines = text.lines();
        assert_eq!(
            lines.next(),
            Some("model,images,mse_mean,mse_std,dssim_mean,dssim_std,psnr_mean,psnr_std,psnr_perfect")
        );
        assert_eq!(lines.next(), Some("a,2,0.020000,0.010000,0.200000,0.100000,17.50,2.50,0"));
    }

    #[test]
    fn test_runtime_csv_columns_union() {
        let dir = tempfile::tempdir().unwrap();
        let mut report = RuntimeReport::new("runtime");
        report.models.push(RuntimeResult {
            model: "a".to_string(),
            results: BTreeMap::from([("loss".to_string(), 0.5)]),
        });
        report.models.push(RuntimeResult {
            model: "b".to_string(),
            results: BTreeMap::from([("loss".to_string(), 0.25), ("psnr".to_string(), 30.0)]),
        });
        let path = dir.path().join("runtime.csv");
        report.write_csv(&path).unwrap();
        let text = std::fs::read_to_string(&path).unwrap();
        assert_eq!(text, "model,loss,psnr\na,0.5,\nb,0.25,30\n");
    }
}
