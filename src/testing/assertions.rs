//! Assertions over transformer output and columnar blocks.

use crate::field_type::FieldType;
use crate::transform::FileInformation;
use arrow::record_batch::RecordBatch;
use parquet::arrow::arrow_reader::ParquetRecordBatchReaderBuilder;
use std::io::Write;

/// Decode a Parquet payload back into record batches.
///
/// The payload goes through a temporary file so the reader sees exactly
/// what an uploaded object would hold.
///
/// # Errors
///
/// Returns an error if the payload is not valid Parquet.
pub fn read_parquet_block(bytes: &[u8]) -> anyhow::Result<Vec<RecordBatch>> {
    let mut file = tempfile::tempfile()?;
    file.write_all(bytes)?;
    let reader = ParquetRecordBatchReaderBuilder::try_new(file)?.build()?;
    Ok(reader.collect::<Result<Vec<_>, _>>()?)
}

/// Total rows across `batches`.
#[must_use]
pub fn total_rows(batches: &[RecordBatch]) -> usize {
    batches.iter().map(RecordBatch::num_rows).sum()
}

/// Assert the cleaned names and types of every column.
///
/// # Panics
///
/// Panics with both column lists if they differ.
pub fn assert_columns(info: &FileInformation, expected: &[(&str, FieldType)]) {
    let actual: Vec<(&str, FieldType)> = info
        .columns
        .iter()
        .map(|c| (c.name.as_str(), c.field_type))
        .collect();
    assert_eq!(
        actual, expected,
        "Column mismatch in {}:\n  Expected: {expected:?}\n  Actual: {actual:?}",
        info.file_name
    );
}
