//! Output files of a batch
//!
//! Every write is independent: a failed file is reported and the other
//! outputs are still written from the in-memory results.

use std::fs;
use std::path::{Path, PathBuf};

use serde::Serialize;

use nltha_core::analysis::StripeResult;

use crate::models::{IdaBundle, RecordReport};

#[derive(Debug, thiserror::Error)]
pub enum OutputError {
    #[error("IO error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("JSON error on {path}: {source}")]
    Json {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
    #[error("CSV error on {path}: {source}")]
    Csv {
        path: PathBuf,
        #[source]
        source: csv::Error,
    },
}

/// Writes batch outputs under one directory
#[derive(Debug, Clone)]
pub struct OutputWriter {
    dir: PathBuf,
}

impl OutputWriter {
    pub const IDA_BUNDLE: &'static str = "IDA.json";
    pub const IM_TABLE: &'static str = "IM.csv";
    pub const IM_TABLE_TEMP: &'static str = "IM_temp.csv";

    pub fn new(dir: impl Into<PathBuf>) -> Result<Self, OutputError> {
        let dir = dir.into();
        fs::create_dir_all(&dir).map_err(|source| OutputError::Io {
            path: dir.clone(),
            source,
        })?;
        Ok(Self { dir })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Per-record run files and exported solver artifacts
    pub fn nltha_dir(&self) -> PathBuf {
        self.dir.join("NLTHA")
    }

    pub fn msa_dir(&self) -> PathBuf {
        self.dir.join("MSA")
    }

    /// `IM.csv`, or `IM_temp.csv` when an earlier table is already there
    pub fn im_table_path(&self) -> PathBuf {
        let table = self.dir.join(Self::IM_TABLE);
        if table.exists() {
            self.dir.join(Self::IM_TABLE_TEMP)
        } else {
            table
        }
    }

    /// One row per record in input order, one column per run.
    /// Failed records keep an empty row.
    pub fn write_im_table(&self, reports: &[RecordReport]) -> Result<PathBuf, OutputError> {
        let path = self.im_table_path();
        let csv_err = |source| OutputError::Csv {
            path: path.clone(),
            source,
        };

        let mut writer = csv::WriterBuilder::new()
            .has_headers(false)
            .flexible(true)
            .from_path(&path)
            .map_err(csv_err)?;
        for report in reports {
            let row: Vec<String> = report.im_row().iter().map(|im| format!("{:.6e}", im)).collect();
            if row.is_empty() {
                writer.write_record([""]).map_err(csv_err)?;
            } else {
                writer.write_record(&row).map_err(csv_err)?;
            }
        }
        writer.flush().map_err(|source| OutputError::Io {
            path: path.clone(),
            source,
        })?;

        tracing::info!("Wrote IM table {:?} ({} records)", path, reports.len());
        Ok(path)
    }

    pub fn write_ida_bundle(&self, bundle: &IdaBundle) -> Result<PathBuf, OutputError> {
        let path = self.dir.join(Self::IDA_BUNDLE);
        write_json(&path, bundle)?;
        tracing::info!("Wrote capacity bundle {:?}", path);
        Ok(path)
    }

    /// `NLTHA/<record>.json`
    pub fn write_record(&self, report: &RecordReport) -> Result<PathBuf, OutputError> {
        let path = self.nltha_dir().join(format!("{}.json", report.record));
        write_json(&path, report)?;
        Ok(path)
    }

    /// `MSA/<stripe>.json`
    pub fn write_stripe(&self, stripe: &StripeResult) -> Result<PathBuf, OutputError> {
        let path = self.msa_dir().join(format!("{}.json", stripe.name));
        write_json(&path, stripe)?;
        tracing::info!("Wrote stripe {:?}", path);
        Ok(path)
    }
}

fn write_json<T: Serialize>(path: &Path, value: &T) -> Result<(), OutputError> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).map_err(|source| OutputError::Io {
            path: parent.to_path_buf(),
            source,
        })?;
    }
    let json = serde_json::to_string_pretty(value).map_err(|source| OutputError::Json {
        path: path.to_path_buf(),
        source,
    })?;
    fs::write(path, json).map_err(|source| OutputError::Io {
        path: path.to_path_buf(),
        source,
    })
}
