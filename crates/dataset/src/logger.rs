//! Run artifacts: readable dataset CSVs, statistics logging, and the
//! checkpoint path policy shared by regressors and proxies.

use std::fs::OpenOptions;
use std::path::{Path, PathBuf};

use crate::error::DataError;
use crate::scaling::Stats;

/// Owns the on-disk layout of one run.
///
/// ```text
/// <root>/data/<split>.csv          readable dataset projections
/// <root>/checkpoints/<context><tag>/   regressor checkpoints
/// ```
///
/// `context` disambiguates rounds (e.g. `"round3_"`); the tag is either
/// `epoch{NNN}` or `final`.
#[derive(Debug, Clone)]
pub struct RunLogger {
    data_dir: PathBuf,
    ckpt_dir: PathBuf,
    context: String,
    /// Save a periodic checkpoint every `proxy_period` epochs; `None` means
    /// only the final checkpoint is written.
    proxy_period: Option<usize>,
}

impl RunLogger {
    pub fn new(root: &Path, proxy_period: Option<usize>) -> Result<Self, DataError> {
        let data_dir = root.join("data");
        let ckpt_dir = root.join("checkpoints");
        std::fs::create_dir_all(&data_dir)?;
        std::fs::create_dir_all(&ckpt_dir)?;
        Ok(Self { data_dir, ckpt_dir, context: String::new(), proxy_period })
    }

    /// Set the round context prefixed to every checkpoint tag.
    pub fn set_context(&mut self, context: impl Into<String>) {
        self.context = context.into();
    }

    pub fn context(&self) -> &str {
        &self.context
    }

    pub fn data_path(&self, split: &str) -> PathBuf {
        self.data_dir.join(format!("{split}.csv"))
    }

    /// Append readable rows to the split CSV, writing the header only when
    /// the file is new.
    pub fn save_dataset(&self, rows: &[(String, f64)], split: &str) -> Result<(), DataError> {
        let path = self.data_path(split);
        let new_file = !path.exists();
        let file = OpenOptions::new().create(true).append(true).open(&path)?;
        let mut writer = csv::WriterBuilder::new().has_headers(false).from_writer(file);
        if new_file {
            writer.write_record(["samples", "energies"])?;
        }
        for (sample, energy) in rows {
            writer.write_record([sample.as_str(), &format!("{energy}")])?;
        }
        writer.flush()?;
        tracing::debug!(split, rows = rows.len(), path = %path.display(), "Appended readable dataset rows");
        Ok(())
    }

    /// Count data rows (header excluded) currently in a split CSV.
    pub fn dataset_len(&self, split: &str) -> Result<usize, DataError> {
        let path = self.data_path(split);
        if !path.exists() {
            return Ok(0);
        }
        let mut reader = csv::ReaderBuilder::new().has_headers(true).from_path(&path)?;
        Ok(reader.records().filter_map(Result::ok).count())
    }

    pub fn log_dataset_stats(&self, split: &str, stats: &Stats, len: usize) {
        tracing::info!(
            split,
            len,
            mean = format!("{:.4}", stats.mean),
            std = format!("{:.4}", stats.std),
            min = format!("{:.4}", stats.min),
            max = format!("{:.4}", stats.max),
            "Dataset statistics"
        );
    }

    /// Checkpoint directory for a tag, e.g. `checkpoints/round3_epoch007/`.
    pub fn proxy_checkpoint_dir(&self, tag: &str) -> PathBuf {
        self.ckpt_dir.join(format!("{}{tag}", self.context))
    }

    /// The directory the final checkpoint of the current context lives in.
    pub fn final_checkpoint_dir(&self) -> PathBuf {
        self.proxy_checkpoint_dir("final")
    }

    pub fn epoch_tag(epoch: usize) -> String {
        format!("epoch{epoch:03}")
    }

    /// Whether a periodic checkpoint is due this epoch. Final checkpoints are
    /// always written.
    pub fn should_save_proxy(&self, epoch: usize, is_final: bool) -> bool {
        if is_final {
            return true;
        }
        match self.proxy_period {
            Some(period) if period > 0 => epoch % period == 0,
            _ => false,
        }
    }
}
