//! Evaluation session and report generation.
//!
//! This module provides the core evaluation infrastructure:
//!
//! - [`session::EvalSession`]: runs every registered model over the test set
//! - [`session::EvalConfig`]: configuration for evaluation
//! - [`report`]: report types for evaluation results
//! - [`qualitative`]: reconstructions of selected images written as JPEG

pub mod qualitative;
pub mod report;
pub mod session;

pub use qualitative::{QualitativeImage, QualitativeSet};
pub use report::{EvaluationReport, ModelFailure, ModelMetrics, ModelReport, RuntimeReport};
pub use session::{EvalConfig, EvalSession};
