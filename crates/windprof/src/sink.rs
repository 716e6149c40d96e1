//! Parquet persistence. Each period lands as one Parquet file named after
//! the processing name and period start, next to a JSON sidecar carrying
//! the dataset and variable attributes Parquet columns cannot hold.

use std::fs;
use std::io::Cursor;
use std::path::PathBuf;

use anyhow::{Context, Result};
use chrono::DateTime;
use polars::io::parquet::write::{ParquetCompression, ParquetWriter, StatisticsOptions};
use polars::prelude::DataFrame;
use serde_json::json;
use tracing::info;
use windprof_core::{DatasetSink, HarmonisedDataset};

/// Writes finished datasets under one output directory, creating it on the
/// first write.
pub struct ParquetDirSink {
    dir: PathBuf,
}

impl ParquetDirSink {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    fn stem(dataset: &HarmonisedDataset) -> Result<String> {
        let start = DateTime::parse_from_rfc3339(&dataset.attrs.start_time_utc)
            .context("dataset start time is not RFC 3339")?;
        Ok(format!(
            "{}_{}",
            dataset.attrs.processing_name,
            start.format("%Y%m%dT%H%M%SZ")
        ))
    }
}

impl DatasetSink for ParquetDirSink {
    fn write(&mut self, dataset: &HarmonisedDataset) -> Result<()> {
        fs::create_dir_all(&self.dir)
            .with_context(|| format!("creating output directory {}", self.dir.display()))?;
        let stem = Self::stem(dataset)?;

        let data_path = self.dir.join(format!("{stem}.parquet"));
        fs::write(&data_path, parquet_bytes(&dataset.frame)?)
            .with_context(|| format!("writing {}", data_path.display()))?;

        let attrs_path = self.dir.join(format!("{stem}.attrs.json"));
        let sidecar = json!({
            "dataset": &dataset.attrs,
            "variables": &dataset.variable_attrs,
        });
        fs::write(&attrs_path, serde_json::to_vec_pretty(&sidecar)?)
            .with_context(|| format!("writing {}", attrs_path.display()))?;

        info!(
            path = %data_path.display(),
            rows = dataset.frame.height(),
            "period written"
        );
        Ok(())
    }
}

fn parquet_bytes(frame: &DataFrame) -> Result<Vec<u8>> {
    let mut buffer = Vec::new();
    {
        let mut cursor = Cursor::new(&mut buffer);
        let mut clone = frame.clone();
        ParquetWriter::new(&mut cursor)
            .with_compression(ParquetCompression::Zstd(None))
            .with_statistics(StatisticsOptions::default())
            .finish(&mut clone)
            .context("failed to write parquet to buffer")?;
    }
    Ok(buffer)
}
