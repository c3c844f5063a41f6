//! Parquet-based durable cache storage.
//!
//! Each cache key is stored as a single-row Parquet file whose name is the
//! SHA-256 of the key, so arbitrary fingerprint strings (JSON, URLs) map to
//! safe file names. The original key is kept in the file and checked on read.

use crate::domain::KeyValueStore;
use anyhow::{Context, Result};
use arrow::array::{Array, ArrayRef, RecordBatch, StringArray};
use arrow::datatypes::{DataType, Field, Schema};
use async_trait::async_trait;
use parquet::arrow::arrow_reader::ParquetRecordBatchReaderBuilder;
use parquet::arrow::ArrowWriter;
use parquet::basic::Compression;
use parquet::file::properties::WriterProperties;
use sha2::{Digest, Sha256};
use std::fs::{self, File};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, warn};

const EXTENSION: &str = "parquet";

/// Parquet-based local cache storage
#[derive(Clone)]
pub struct ParquetStore {
    base_path: PathBuf,
}

impl ParquetStore {
    /// Create a new ParquetStore with the given base path
    pub fn new<P: AsRef<Path>>(base_path: P) -> Self {
        let path = base_path.as_ref().to_path_buf();

        // Ensure base directory exists
        if let Err(e) = fs::create_dir_all(&path) {
            warn!("Failed to create cache directory {}: {}", path.display(), e);
        }

        Self { base_path: path }
    }

    pub fn base_path(&self) -> &Path {
        &self.base_path
    }

    fn entry_path(&self, key: &str) -> PathBuf {
        let digest = Sha256::digest(key.as_bytes());
        self.base_path
            .join(format!("{}.{}", hex::encode(digest), EXTENSION))
    }

    fn schema() -> Arc<Schema> {
        Arc::new(Schema::new(vec![
            Field::new("key", DataType::Utf8, false),
            Field::new("data", DataType::Utf8, false),
        ]))
    }

    /// Write one entry, replacing any previous file for the key.
    pub fn write_entry(&self, key: &str, data: &str) -> Result<()> {
        fs::create_dir_all(&self.base_path)
            .with_context(|| format!("Failed to create cache directory: {:?}", self.base_path))?;

        let schema = Self::schema();
        let key_array: ArrayRef = Arc::new(StringArray::from(vec![key]));
        let data_array: ArrayRef = Arc::new(StringArray::from(vec![data]));
        let batch = RecordBatch::try_new(schema.clone(), vec![key_array, data_array])?;

        // Write beside the target and rename so readers never see a partial file
        let path = self.entry_path(key);
        let tmp_path = path.with_extension("parquet.tmp");
        let file = File::create(&tmp_path)
            .with_context(|| format!("Failed to create Parquet file: {:?}", tmp_path))?;

        let props = WriterProperties::builder()
            .set_compression(Compression::SNAPPY)
            .build();

        let mut writer = ArrowWriter::try_new(file, schema, Some(props))?;
        writer.write(&batch)?;
        writer.close()?;

        fs::rename(&tmp_path, &path)
            .with_context(|| format!("Failed to move cache file into place: {:?}", path))?;

        debug!("Wrote cache entry: {}", key);
        Ok(())
    }

    /// Read one entry. Returns `None` if the file doesn't exist.
    pub fn read_entry(&self, key: &str) -> Result<Option<String>> {
        let path = self.entry_path(key);
        if !path.exists() {
            return Ok(None);
        }

        let file = File::open(&path)
            .with_context(|| format!("Failed to open Parquet file: {:?}", path))?;
        let mut reader = ParquetRecordBatchReaderBuilder::try_new(file)?.build()?;

        let Some(batch) = reader.next() else {
            return Ok(None);
        };
        let batch = batch?;

        let stored_key = string_column(&batch, "key")?;
        if stored_key != key {
            // Digest collision or a foreign file; never hand back another key's data
            warn!("Cache file {:?} holds a different key", path);
            return Ok(None);
        }

        Ok(Some(string_column(&batch, "data")?))
    }

    /// Number of entry files and their combined size in bytes.
    pub fn disk_usage(&self) -> Result<(usize, u64)> {
        if !self.base_path.exists() {
            return Ok((0, 0));
        }

        let mut keys = 0;
        let mut bytes = 0u64;
        for entry in fs::read_dir(&self.base_path)? {
            let path = entry?.path();
            if path.extension().is_some_and(|ext| ext == EXTENSION) {
                keys += 1;
                bytes += fs::metadata(&path).map(|m| m.len()).unwrap_or(0);
            }
        }
        Ok((keys, bytes))
    }
}

fn string_column(batch: &RecordBatch, name: &str) -> Result<String> {
    let column = batch
        .column_by_name(name)
        .with_context(|| format!("Missing column '{}'", name))?;
    let strings = column
        .as_any()
        .downcast_ref::<StringArray>()
        .with_context(|| format!("Column '{}' is not a string column", name))?;
    if strings.is_empty() {
        anyhow::bail!("Column '{}' is empty", name);
    }
    Ok(strings.value(0).to_string())
}

#[async_trait]
impl KeyValueStore for ParquetStore {
    async fn get(&self, key: &str) -> Result<Option<String>> {
        self.read_entry(key)
    }

    async fn set(&self, key: &str, value: &str) -> Result<()> {
        self.write_entry(key, value)
    }

    fn backend(&self) -> &'static str {
        "parquet"
    }

    fn disk_usage(&self) -> Option<(usize, u64)> {
        ParquetStore::disk_usage(self)
            .map_err(|e| warn!("Failed to read cache directory usage: {}", e))
            .ok()
    }
}
