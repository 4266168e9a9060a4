//! Columnar encoding of the row stream.
//!
//! [`ColumnarEncoder`] buffers rows until `row_group_size` is reached, then
//! encodes the batch as a standalone Parquet payload and hands it to a
//! [`BlockSink`] (normally an uploader). Each column is laid out according to
//! the type known at flush time:
//!
//! | [`FieldType`] | Arrow type |
//! |---|---|
//! | `Integer` | `Int64` |
//! | `Number` | `Float64` |
//! | `Date` | `Date32` |
//! | `String`, `Unknown` | `Utf8` |
//!
//! Because the transformer folds every cell into its column type before the
//! row is forwarded, the type at flush time already covers the whole batch.
//! Types only widen, so earlier blocks of the same file may carry a narrower
//! type than later ones; readers reconcile with the final
//! [`FileInformation`](crate::FileInformation) column types.

use crate::config::ColumnCompression;
use crate::error::Result;
use crate::field_type::{FieldDefinition, FieldType, parse_date, parse_number};
use crate::transform::{Row, RowSink, SinkSummary};
use arrow::array::{ArrayRef, PrimitiveBuilder, StringBuilder};
use arrow::datatypes::{ArrowPrimitiveType, Date32Type, Field, Float64Type, Int64Type, Schema};
use arrow::record_batch::{RecordBatch, RecordBatchOptions};
use chrono::Datelike;
use parquet::arrow::ArrowWriter;
use parquet::file::properties::WriterProperties;
use std::mem;
use std::sync::Arc;
use tracing::{debug, warn};

/// `NaiveDate::num_days_from_ce` of 1970-01-01.
const UNIX_EPOCH_DAYS_FROM_CE: i32 = 719_163;

/// One encoded row group.
#[derive(Debug, Clone)]
pub struct EncodedBlock {
    /// 0-based position of the block within its file.
    pub index: usize,
    /// Index of the block's first row among the file's data rows.
    pub first_row: u64,
    pub row_count: usize,
    /// Column types the block was encoded with.
    pub column_types: Vec<FieldType>,
    /// Cells of this block encoded as null after failing to parse.
    pub degraded_cells: u64,
    /// Parquet payload.
    pub bytes: Vec<u8>,
}

/// Receives encoded blocks in order.
pub trait BlockSink {
    /// # Errors
    ///
    /// An error stops the file.
    fn emit(&mut self, block: EncodedBlock) -> Result<()>;
}

impl BlockSink for Vec<EncodedBlock> {
    fn emit(&mut self, block: EncodedBlock) -> Result<()> {
        self.push(block);
        Ok(())
    }
}

/// Batches rows into columnar blocks. Plugs into the transformer as a [`RowSink`].
pub struct ColumnarEncoder<S: BlockSink> {
    row_group_size: usize,
    compression: ColumnCompression,
    buffer: Vec<Row>,
    next_block: usize,
    degraded_cells: u64,
    sink: S,
}

impl<S: BlockSink> ColumnarEncoder<S> {
    /// `row_group_size` is clamped to at least one row.
    pub fn new(row_group_size: usize, compression: ColumnCompression, sink: S) -> Self {
        let row_group_size = row_group_size.max(1);
        Self {
            row_group_size,
            compression,
            buffer: Vec::with_capacity(row_group_size.min(64 * 1024)),
            next_block: 0,
            degraded_cells: 0,
            sink,
        }
    }

    /// Rows waiting for the next flush.
    #[must_use]
    pub fn buffered_rows(&self) -> usize {
        self.buffer.len()
    }

    /// Give back the block sink.
    pub fn into_sink(self) -> S {
        self.sink
    }

    fn flush(&mut self, columns: &[FieldDefinition]) -> Result<()> {
        if self.buffer.is_empty() {
            return Ok(());
        }
        let rows = mem::take(&mut self.buffer);
        let (batch, degraded) = build_record_batch(columns, &rows)?;
        if degraded > 0 {
            warn!(
                block = self.next_block,
                cells = degraded,
                "encoding degradation: cells stored as null"
            );
        }
        let bytes = write_parquet(&batch, self.compression)?;
        let block = EncodedBlock {
            index: self.next_block,
            first_row: rows[0].index,
            row_count: rows.len(),
            column_types: columns.iter().map(|c| c.field_type).collect(),
            degraded_cells: degraded,
            bytes,
        };
        debug!(
            block = block.index,
            rows = block.row_count,
            bytes = block.bytes.len(),
            "row group encoded"
        );
        self.next_block += 1;
        self.degraded_cells += degraded;
        self.sink.emit(block)
    }
}

impl<S: BlockSink> RowSink for ColumnarEncoder<S> {
    fn accept(&mut self, columns: &[FieldDefinition], row: Row) -> Result<()> {
        self.buffer.push(row);
        if self.buffer.len() >= self.row_group_size {
            self.flush(columns)?;
        }
        Ok(())
    }

    fn finish(&mut self, columns: &[FieldDefinition]) -> Result<SinkSummary> {
        self.flush(columns)?;
        Ok(SinkSummary {
            row_groups: self.next_block,
            degraded_cells: self.degraded_cells,
        })
    }
}

/// Arrow schema for a set of column definitions. All fields are nullable.
#[must_use]
pub fn arrow_schema(columns: &[FieldDefinition]) -> Schema {
    Schema::new(
        columns
            .iter()
            .map(|c| Field::new(&c.name, arrow_type(c.field_type), true))
            .collect::<Vec<_>>(),
    )
}

fn arrow_type(field_type: FieldType) -> arrow::datatypes::DataType {
    use arrow::datatypes::DataType;
    match field_type {
        FieldType::Integer => DataType::Int64,
        FieldType::Number => DataType::Float64,
        FieldType::Date => DataType::Date32,
        FieldType::String | FieldType::Unknown => DataType::Utf8,
    }
}

/// Encode rows column by column. Returns the batch and the number of cells
/// that had to be stored as null.
///
/// # Errors
///
/// Returns an error if Arrow rejects the assembled batch.
pub fn build_record_batch(columns: &[FieldDefinition], rows: &[Row]) -> Result<(RecordBatch, u64)> {
    let mut degraded = 0;
    let arrays: Vec<ArrayRef> = columns
        .iter()
        .enumerate()
        .map(|(i, column)| {
            let cells = rows
                .iter()
                .map(move |r| r.values.get(i).and_then(Option::as_deref));
            encode_column(column.field_type, cells, &mut degraded)
        })
        .collect();
    let options = RecordBatchOptions::new().with_row_count(Some(rows.len()));
    let batch = RecordBatch::try_new_with_options(Arc::new(arrow_schema(columns)), arrays, &options)?;
    Ok((batch, degraded))
}

fn encode_column<'a>(
    field_type: FieldType,
    cells: impl Iterator<Item = Option<&'a str>>,
    degraded: &mut u64,
) -> ArrayRef {
    match field_type {
        FieldType::Integer => {
            encode_primitive::<Int64Type>(cells, |v| v.trim().parse().ok(), degraded)
        }
        FieldType::Number => encode_primitive::<Float64Type>(cells, parse_number, degraded),
        FieldType::Date => encode_primitive::<Date32Type>(
            cells,
            |v| parse_date(v).map(|d| d.num_days_from_ce() - UNIX_EPOCH_DAYS_FROM_CE),
            degraded,
        ),
        FieldType::String | FieldType::Unknown => {
            let mut builder = StringBuilder::new();
            for cell in cells {
                builder.append_option(cell);
            }
            Arc::new(builder.finish())
        }
    }
}

fn encode_primitive<'a, T: ArrowPrimitiveType>(
    cells: impl Iterator<Item = Option<&'a str>>,
    parse: impl Fn(&str) -> Option<T::Native>,
    degraded: &mut u64,
) -> ArrayRef {
    let mut builder = PrimitiveBuilder::<T>::new();
    for cell in cells {
        match cell {
            None => builder.append_null(),
            Some(value) => match parse(value) {
                Some(v) => builder.append_value(v),
                None => {
                    *degraded += 1;
                    debug!(value, "cell does not fit column type");
                    builder.append_null();
                }
            },
        }
    }
    Arc::new(builder.finish())
}

/// Serialize a batch as a complete Parquet payload.
///
/// # Errors
///
/// Returns an error if the Parquet writer fails.
pub fn write_parquet(batch: &RecordBatch, compression: ColumnCompression) -> Result<Vec<u8>> {
    let props = WriterProperties::builder()
        .set_compression(compression.to_parquet())
        .build();
    let mut writer = ArrowWriter::try_new(Vec::new(), batch.schema(), Some(props))?;
    writer.write(batch)?;
    Ok(writer.into_inner()?)
}
