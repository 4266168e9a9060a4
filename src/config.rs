//! Ingestion configuration.
//!
//! ```
//! use sluice::config::{ColumnCompression, IngestConfig};
//!
//! let config = IngestConfig {
//!     row_group_size: 50_000,
//!     compression: ColumnCompression::Snappy,
//!     ..Default::default()
//! };
//! assert_eq!(config.delimiter, ',');
//! ```

use crate::decoder::ByteDecoder;
use parquet::basic::{Compression, ZstdLevel};
use serde::{Deserialize, Serialize};
use std::str::FromStr;

/// Compression codec used inside columnar blocks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ColumnCompression {
    Uncompressed,
    Snappy,
    #[default]
    Zstd,
}

impl ColumnCompression {
    pub(crate) fn to_parquet(self) -> Compression {
        match self {
            Self::Uncompressed => Compression::UNCOMPRESSED,
            Self::Snappy => Compression::SNAPPY,
            Self::Zstd => Compression::ZSTD(ZstdLevel::default()),
        }
    }
}

impl FromStr for ColumnCompression {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "none" | "uncompressed" => Ok(Self::Uncompressed),
            "snappy" => Ok(Self::Snappy),
            "zstd" => Ok(Self::Zstd),
            other => Err(format!("unsupported column compression: {other}")),
        }
    }
}

/// Settings for one ingestion job. Every file in the job shares them.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IngestConfig {
    /// Input encoding. `None` sniffs a byte order mark and defaults to UTF-8.
    pub encoding: Option<ByteDecoder>,
    /// Field separator.
    pub delimiter: char,
    /// Quote character; doubled inside a quoted field to escape itself.
    pub quote: char,
    /// Bytes read from the source per chunk.
    pub chunk_size: usize,
    /// Rows per columnar block.
    pub row_group_size: usize,
    pub compression: ColumnCompression,
    /// Files processed concurrently. `None` uses one per CPU.
    pub parallelism: Option<usize>,
}

impl Default for IngestConfig {
    fn default() -> Self {
        Self {
            encoding: None,
            delimiter: ',',
            quote: '"',
            chunk_size: 64 * 1024,
            row_group_size: 10_000,
            compression: ColumnCompression::default(),
            parallelism: None,
        }
    }
}

impl IngestConfig {
    /// Number of files to process at once.
    #[must_use]
    pub fn effective_parallelism(&self) -> usize {
        self.parallelism.unwrap_or_else(num_cpus::get).max(1)
    }
}
