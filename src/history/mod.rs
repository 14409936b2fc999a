//! Training-log import and loss-curve summaries.
//!
//! Each model directory carries a per-epoch log written by the training
//! run: a semicolon-delimited CSV with at least `loss` and `val_loss`
//! columns. Column names are matched case-insensitively and a few common
//! aliases are accepted.
//!
//! ## Example
//!
//! ```rust,ignore
//! use recon_eval::history::TrainingHistory;
//!
//! let history = TrainingHistory::load(&specs)?;
//! for row in history.min_validation_loss() {
//!     println!("{}: {:.5} at epoch {}", row.model, row.val_loss, row.epoch);
//! }
//! ```

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::error::{Error, Result};
use crate::model::{ModelSpec, TRAINING_LOG_EXTENSION, find_single};

const LOSS_ALIASES: &[&str] = &["loss", "train_loss", "training_loss"];
const VAL_LOSS_ALIASES: &[&str] = &["val_loss", "validation_loss", "valid_loss"];
const EPOCH_ALIASES: &[&str] = &["epoch", "epochs"];

/// Largest allowed distance between a logged epoch and the row count.
/// Resumed runs start counting past zero; anything further out is corrupt.
const MAX_EPOCH_GAP: usize = 10_000;

/// One row of a training log.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct EpochRecord {
    /// Zero-based epoch.
    pub epoch: usize,
    /// Training loss, if recorded.
    pub loss: Option<f64>,
    /// Validation loss, if recorded.
    pub val_loss: Option<f64>,
}

/// Per-epoch losses of one training run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrainingLog {
    /// Source file.
    pub path: PathBuf,
    /// Rows in file order.
    pub epochs: Vec<EpochRecord>,
}

impl TrainingLog {
    /// Read a semicolon-delimited training log.
    ///
    /// Epochs come from an `epoch` column when present, otherwise from the
    /// row index. Empty or non-numeric cells and NaN are read as missing.
    /// An epoch far beyond the number of rows is a [`Error::TrainingLog`].
    pub fn read(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let log_error = |reason: String| Error::TrainingLog {
            path: path.to_path_buf(),
            reason,
        };

        let mut reader = csv::ReaderBuilder::new()
            .delimiter(b';')
            .trim(csv::Trim::All)
            .from_path(path)
            .map_err(|e| log_error(e.to_string()))?;

        let headers: Vec<String> = reader
            .headers()
            .map_err(|e| log_error(e.to_string()))?
            .iter()
            .map(String::from)
            .collect();
        let header_refs: Vec<&str> = headers.iter().map(String::as_str).collect();

        let loss_idx = find_column(&header_refs, LOSS_ALIASES)
            .ok_or_else(|| log_error("missing loss column".to_string()))?;
        let val_idx = find_column(&header_refs, VAL_LOSS_ALIASES)
            .ok_or_else(|| log_error("missing val_loss column".to_string()))?;
        let epoch_idx = find_column(&header_refs, EPOCH_ALIASES);

        let mut epochs = Vec::new();
        for (row, record) in reader.records().enumerate() {
            let record = record.map_err(|e| log_error(format!("line {}: {e}", row + 2)))?;
            let epoch = epoch_idx
                .and_then(|i| record.get(i))
                .and_then(|s| s.parse().ok())
                .unwrap_or(row);
            epochs.push(EpochRecord {
                epoch,
                loss: parse_cell(record.get(loss_idx)),
                val_loss: parse_cell(record.get(val_idx)),
            });
        }

        let limit = epochs.len() + MAX_EPOCH_GAP;
        if let Some(bad) = epochs.iter().find(|r| r.epoch >= limit) {
            return Err(log_error(format!(
                "epoch {} is out of range for a log of {} rows",
                bad.epoch,
                epochs.len()
            )));
        }

        debug!(path = %path.display(), epochs = epochs.len(), "Read training log");
        Ok(Self {
            path: path.to_path_buf(),
            epochs,
        })
    }

    /// Lowest validation loss and the first epoch reaching it.
    #[must_use]
    pub fn best_val_loss(&self) -> Option<(f64, usize)> {
        self.epochs
            .iter()
            .filter_map(|r| r.val_loss.map(|v| (v, r.epoch)))
            .fold(None, |best, (v, epoch)| match best {
                Some((b, _)) if b <= v => best,
                _ => Some((v, epoch)),
            })
    }

    fn column(
        &self,
        pick: fn(&EpochRecord) -> Option<f64>,
    ) -> impl Iterator<Item = (usize, Option<f64>)> + '_ {
        self.epochs.iter().map(move |r| (r.epoch, pick(r)))
    }
}

/// Per-epoch values for several models, aligned by epoch.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EpochTable {
    /// Column names.
    pub models: Vec<String>,
    /// `rows[epoch][model]`.
    pub rows: Vec<Vec<Option<f64>>>,
}

impl EpochTable {
    /// Number of epochs (rows).
    #[must_use]
    pub fn epochs(&self) -> usize {
        self.rows.len()
    }

    /// Value for `model` at `epoch`.
    #[must_use]
    pub fn get(&self, epoch: usize, model: &str) -> Option<f64> {
        let col = self.models.iter().position(|m| m == model)?;
        self.rows.get(epoch)?.get(col).copied().flatten()
    }

    /// All values of one model's column.
    #[must_use]
    pub fn column(&self, model: &str) -> Option<Vec<Option<f64>>> {
        let col = self.models.iter().position(|m| m == model)?;
        Some(self.rows.iter().map(|row| row[col]).collect())
    }

    /// Write as CSV: an `epoch` column followed by one column per model.
    pub fn write_csv(&self, path: impl AsRef<Path>) -> Result<()> {
        let mut writer = csv::Writer::from_path(path)?;
        let mut header = vec!["epoch".to_string()];
        header.extend(self.models.iter().cloned());
        writer.write_record(&header)?;

        for (epoch, row) in self.rows.iter().enumerate() {
            let mut record = vec![epoch.to_string()];
            record.extend(row.iter().map(|v| v.map(|v| v.to_string()).unwrap_or_default()));
            writer.write_record(&record)?;
        }
        writer.flush()?;
        Ok(())
    }
}

/// Minimum validation loss reached by one model.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MinValLoss {
    /// Model name.
    pub model: String,
    /// Lowest validation loss.
    pub val_loss: f64,
    /// Epoch at which it was first reached.
    pub epoch: usize,
}

/// Training logs of several models.
#[derive(Debug, Clone, Default)]
pub struct TrainingHistory {
    logs: Vec<(String, TrainingLog)>,
}

impl TrainingHistory {
    /// Empty history.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Read the single training log in each model's directory.
    pub fn load(specs: &[ModelSpec]) -> Result<Self> {
        let mut history = Self::new();
        for spec in specs {
            let path = find_single(spec, TRAINING_LOG_EXTENSION)?;
            history.push(spec.name.clone(), TrainingLog::read(path)?);
        }
        Ok(history)
    }

    /// Add a model's log.
    pub fn push(&mut self, model: impl Into<String>, log: TrainingLog) {
        self.logs.push((model.into(), log));
    }

    /// Model names in insertion order.
    pub fn models(&self) -> impl Iterator<Item = &str> {
        self.logs.iter().map(|(name, _)| name.as_str())
    }

    /// Training losses by epoch.
    #[must_use]
    pub fn loss_table(&self) -> EpochTable {
        self.table(|r| r.loss)
    }

    /// Validation losses by epoch.
    #[must_use]
    pub fn val_loss_table(&self) -> EpochTable {
        self.table(|r| r.val_loss)
    }

    fn table(&self, pick: fn(&EpochRecord) -> Option<f64>) -> EpochTable {
        let epochs = self
            .logs
            .iter()
            .flat_map(|(_, log)| log.epochs.iter().map(|r| r.epoch + 1))
            .max()
            .unwrap_or(0);

        let mut rows = vec![vec![None; self.logs.len()]; epochs];
        for (col, (_, log)) in self.logs.iter().enumerate() {
            for (epoch, value) in log.column(pick) {
                rows[epoch][col] = value;
            }
        }

        EpochTable {
            models: self.logs.iter().map(|(name, _)| name.clone()).collect(),
            rows,
        }
    }

    /// Best validation loss per model, lowest first.
    ///
    /// Models whose log has no validation loss at all are left out.
    #[must_use]
    pub fn min_validation_loss(&self) -> Vec<MinValLoss> {
        let mut out: Vec<MinValLoss> = self
            .logs
            .iter()
            .filter_map(|(model, log)| match log.best_val_loss() {
                Some((val_loss, epoch)) => Some(MinValLoss {
                    model: model.clone(),
                    val_loss,
                    epoch,
                }),
                None => {
                    warn!(model = %model, "Training log has no validation loss");
                    None
                }
            })
            .collect();
        out.sort_by(|a, b| a.val_loss.total_cmp(&b.val_loss));
        out
    }

    /// Rolling sum of validation loss over `window` epochs.
    ///
    /// Missing cells are first filled with the model's minimum. A row is
    /// `None` until the window is full.
    pub fn smoothed_val_loss(&self, window: usize) -> Result<EpochTable> {
        if window == 0 {
            return Err(Error::Config("smoothing window must be positive".to_string()));
        }

        let mut table = self.val_loss_table();
        for col in 0..table.models.len() {
            let min = table
                .rows
                .iter()
                .filter_map(|row| row[col])
                .min_by(f64::total_cmp);
            let filled: Vec<Option<f64>> = table.rows.iter().map(|row| row[col].or(min)).collect();

            for (epoch, row) in table.rows.iter_mut().enumerate() {
                row[col] = if epoch + 1 < window {
                    None
                } else {
                    filled[epoch + 1 - window..=epoch]
                        .iter()
                        .copied()
                        .sum::<Option<f64>>()
                };
            }
        }
        Ok(table)
    }
}

/// Find a column by any of `aliases` (case-insensitive).
fn find_column(headers: &[&str], aliases: &[&str]) -> Option<usize> {
    aliases
        .iter()
        .find_map(|alias| find_header_index(headers, alias))
}

/// Find a header index by name (case-insensitive).
fn find_header_index(headers: &[&str], name: &str) -> Option<usize> {
    let name_lower = name.to_lowercase();
    headers.iter().position(|h| h.to_lowercase() == name_lower)
}

fn parse_cell(cell: Option<&str>) -> Option<f64> {
    cell.and_then(|s| s.parse::<f64>().ok())
        .filter(|v| !v.is_nan())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn write_log(dir: &Path, name: &str, contents: &str) -> PathBuf {
        let path = dir.join(name);
        std::fs::write(&path, contents).unwrap();
        path
    }

    fn log_of(val_losses: &[f64]) -> TrainingLog {
        TrainingLog {
            path: PathBuf::from("mem.csv"),
            epochs: val_losses
                .iter()
                .enumerate()
                .map(|(epoch, &v)| EpochRecord {
                    epoch,
                    loss: Some(v * 2.0),
                    val_loss: Some(v),
                })
                .collect(),
        }
    }

    #[test]
    fn test_find_header_index() {
        let headers = ["Epoch", "Loss", "VAL_LOSS"];
        assert_eq!(find_header_index(&headers, "epoch"), Some(0));
        assert_eq!(find_header_index(&headers, "val_loss"), Some(2));
        assert_eq!(find_header_index(&headers, "lr"), None);
    }

    #[test]
    fn test_read_semicolon_log() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_log(
            dir.path(),
            "run.csv",
            "epoch;loss;lr;val_loss\n0;0.9;0.001;0.5\n1;0.7;0.001;\n2;0.6;0.001;nan\n",
        );
        let log = TrainingLog::read(&path).unwrap();
        assert_eq!(log.epochs.len(), 3);
        assert_eq!(log.epochs[0].val_loss, Some(0.5));
        assert_eq!(log.epochs[1].val_loss, None);
        assert_eq!(log.epochs[2].val_loss, None);
        assert_eq!(log.epochs[2].loss, Some(0.6));
    }

    #[test]
    fn test_read_without_epoch_column_uses_row_index() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_log(dir.path(), "run.csv", "Loss;Val_Loss\n0.3;0.4\n0.2;0.25\n");
        let log = TrainingLog::read(&path).unwrap();
        assert_eq!(log.epochs[1].epoch, 1);
        assert_eq!(log.best_val_loss(), Some((0.25, 1)));
    }

    #[test]
    fn test_out_of_range_epoch_rejected() {
        let dir = tempfile::tempdir().unwrap();
        for epoch in ["18446744073709551615", "1000000000"] {
            let path = write_log(
                dir.path(),
                "run.csv",
                &format!("epoch;loss;val_loss\n0;0.3;0.4\n{epoch};0.1;0.2\n"),
            );
            let err = TrainingLog::read(&path).unwrap_err();
            assert!(
                matches!(err, Error::TrainingLog { ref reason, .. } if reason.contains(epoch)),
                "{err}"
            );
        }
    }

    #[test]
    fn test_resumed_run_keeps_logged_epochs() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_log(dir.path(), "run.csv", "epoch;loss;val_loss\n50;0.3;0.4\n51;0.2;0.3\n");
        let log = TrainingLog::read(&path).unwrap();
        assert_eq!(log.best_val_loss(), Some((0.3, 51)));

        let mut history = TrainingHistory::new();
        history.push("resumed", log);
        assert_eq!(history.val_loss_table().epochs(), 52);
    }

    #[test]
    fn test_missing_val_loss_column() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_log(dir.path(), "run.csv", "epoch;loss\n0;0.3\n");
        let err = TrainingLog::read(&path).unwrap_err();
        assert!(matches!(err, Error::TrainingLog { ref reason, .. } if reason.contains("val_loss")));
    }

    #[test]
    fn test_min_validation_loss_ranking() {
        let mut history = TrainingHistory::new();
        history.push("first", log_of(&[0.5, 0.3, 0.4]));
        history.push("second", log_of(&[0.2, 0.1, 0.3]));

        let ranking = history.min_validation_loss();
        assert_eq!(ranking.len(), 2);
        assert_eq!(ranking[0].model, "second");
        assert_eq!(ranking[0].val_loss, 0.1);
        assert_eq!(ranking[0].epoch, 1);
        assert_eq!(ranking[1].model, "first");
        assert_eq!(ranking[1].epoch, 1);
    }

    #[test]
    fn test_tables_align_by_epoch() {
        let mut history = TrainingHistory::new();
        history.push("short", log_of(&[0.5]));
        history.push("long", log_of(&[0.4, 0.3, 0.2]));

        let val = history.val_loss_table();
        assert_eq!(val.epochs(), 3);
        assert_eq!(val.get(0, "short"), Some(0.5));
        assert_eq!(val.get(2, "short"), None);
        assert_eq!(val.get(2, "long"), Some(0.2));

        let loss = history.loss_table();
        assert_eq!(loss.get(1, "long"), Some(0.6));
    }

    #[test]
    fn test_smoothed_val_loss() {
        let mut history = TrainingHistory::new();
        history.push("short", log_of(&[0.5, 0.25]));
        history.push("long", log_of(&[0.4, 0.3, 0.2]));

        let smoothed = history.smoothed_val_loss(2).unwrap();
        assert_eq!(smoothed.column("long").unwrap()[0], None);
        assert!((smoothed.get(1, "long").unwrap() - 0.7).abs() < 1e-12);
        assert!((smoothed.get(2, "long").unwrap() - 0.5).abs() < 1e-12);
        // The missing third epoch of "short" is filled with its minimum.
        assert!((smoothed.get(2, "short").unwrap() - 0.5).abs() < 1e-12);

        assert!(matches!(history.smoothed_val_loss(0), Err(Error::Config(_))));
    }

    #[test]
    fn test_load_from_model_dirs() {
        let dir = tempfile::tempdir().unwrap();
        let model_dir = dir.path().join("unet");
        std::fs::create_dir_all(&model_dir).unwrap();
        write_log(&model_dir, "unet.csv", "epoch;loss;val_loss\n0;0.2;0.3\n");
        std::fs::write(model_dir.join("unet.h5"), b"").unwrap();

        let history = TrainingHistory::load(&[ModelSpec::from_dir(&model_dir)]).unwrap();
        assert_eq!(history.models().collect::<Vec<_>>(), ["unet"]);
        assert_eq!(history.min_validation_loss()[0].val_loss, 0.3);
    }

    #[test]
    fn test_write_epoch_table_csv() {
        let dir = tempfile::tempdir().unwrap();
        let mut history = TrainingHistory::new();
        history.push("a", log_of(&[0.5, 0.25]));
        let path = dir.path().join("val.csv");
        history.val_loss_table().write_csv(&path).unwrap();
        let text = std::fs::read_to_string(&path).unwrap();
        assert!(text.starts_with("epoch,a\n0,0.5\n1,0.25"));
    }
}
