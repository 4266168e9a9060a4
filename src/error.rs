//! Error taxonomy for the ingestion pipeline.
//!
//! Only conditions that stop a file are errors. Recoverable conditions are
//! handled where they occur and counted instead:
//!
//! - an incomplete multi-byte sequence at a chunk boundary is the
//!   [`Decoded::Incomplete`](crate::decoder::Decoded::Incomplete) control value;
//! - a row whose field count disagrees with the header is padded or truncated
//!   and counted in [`FileInformation`](crate::FileInformation);
//! - a cell that cannot be represented in its column type is encoded as null
//!   and counted as a degraded cell.

use crate::io::object_store::StorageError;

/// Errors produced by the ingestion pipeline.
#[derive(Debug, thiserror::Error)]
pub enum IngestError {
    /// A byte sequence is not valid under the selected decoder. Fatal for the file.
    ///
    /// `offset` is the absolute byte offset into the file and `row` the 1-based
    /// row (header included) being decoded when the error occurred.
    #[error("invalid character byte 0x{byte:02x} at byte offset {offset} (row {row})")]
    InvalidCharacter { byte: u8, offset: u64, row: u64 },

    /// A character cannot be written in the target encoding.
    #[error("character {0:?} cannot be encoded")]
    Unencodable(char),

    /// The transformer was fed after it finished or failed.
    #[error("file transformer is closed ({0})")]
    TransformerClosed(&'static str),

    /// Arrow or Parquet rejected a batch.
    #[error("columnar encoding failed: {0}")]
    Encode(String),

    /// The object store failed an operation.
    #[error(transparent)]
    Storage(#[from] StorageError),

    /// Uploading an artifact failed. Fatal for the owning file only.
    #[error("upload of {key} failed: {source}")]
    Upload {
        key: String,
        #[source]
        source: StorageError,
    },

    /// Two inputs of one batch resolve to the same object key.
    #[error("input {key} appears more than once in the batch")]
    DuplicateInput { key: String },

    /// At least one file of a batch failed. Artifacts of the files that
    /// succeeded stay in place.
    #[error("{failed} of {total} files failed to ingest")]
    BatchFailed { failed: usize, total: usize },

    /// The join definitions cannot be turned into a query.
    #[error("query plan error: {0}")]
    Plan(String),

    /// The external query engine reported a failure.
    #[error("query execution failed: {0}")]
    Query(String),

    /// File-system I/O failure.
    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),

    /// Metadata (de)serialization failure.
    #[error("serialization error: {0}")]
    Serialization(String),
}

impl IngestError {
    /// Whether this error was raised by the byte decoder.
    #[must_use]
    pub fn is_decode_error(&self) -> bool {
        matches!(self, Self::InvalidCharacter { .. })
    }
}

impl From<arrow::error::ArrowError> for IngestError {
    fn from(e: arrow::error::ArrowError) -> Self {
        Self::Encode(e.to_string())
    }
}

impl From<parquet::errors::ParquetError> for IngestError {
    fn from(e: parquet::errors::ParquetError) -> Self {
        Self::Encode(e.to_string())
    }
}

impl From<serde_json::Error> for IngestError {
    fn from(e: serde_json::Error) -> Self {
        Self::Serialization(e.to_string())
    }
}

impl From<postcard::Error> for IngestError {
    fn from(e: postcard::Error) -> Self {
        Self::Serialization(e.to_string())
    }
}

/// Convenience alias used throughout this crate.
pub type Result<T> = std::result::Result<T, IngestError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn invalid_character_reports_position() {
        let err = IngestError::InvalidCharacter {
            byte: 0xff,
            offset: 42,
            row: 3,
        };
        let msg = err.to_string();
        assert!(msg.contains("0xff"), "got: {msg}");
        assert!(msg.contains("offset 42"), "got: {msg}");
        assert!(msg.contains("row 3"), "got: {msg}");
        assert!(err.is_decode_error());
    }

    #[test]
    fn io_error_wraps() {
        let inner = std::io::Error::new(std::io::ErrorKind::NotFound, "gone");
        let err = IngestError::from(inner);
        assert!(err.to_string().contains("i/o"));
        assert!(!err.is_decode_error());
    }
}
