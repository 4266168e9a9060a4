//! Streaming transform from raw bytes to typed rows.
//!
//! [`FileTransformer`] is push-driven. The caller hands it one chunk at a time
//! via [`FileTransformer::push_chunk`] and waits for the call to return before
//! reading the next chunk, which is all the backpressure the stage needs. When
//! the source is exhausted (or simply stops delivering) the caller invokes
//! [`FileTransformer::finish`], which emits the [`FileInformation`] summary
//! exactly once.
//!
//! ```text
//! AwaitingHeader ──header──▶ StreamingRows ──end of input──▶ Flushing ──▶ Done
//!        │                        │                              │
//!        └────────────────────────┴────── fatal error ───────────┴──▶ Failed
//! ```
//!
//! Memory use is bounded by the current partial record plus a carry buffer
//! that holds the few trailing bytes of a character cut off at a chunk
//! boundary (at most three bytes once the decoder is known).

use crate::column_name::{clean_column_name, clean_file_name, clean_table_name, dedupe_names};
use crate::config::IngestConfig;
use crate::decoder::{ByteDecoder, Decoded, MAX_BOM_LEN};
use crate::error::{IngestError, Result};
use crate::field_type::FieldDefinition;
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::io::{ErrorKind, Read};
use std::mem;
use tracing::{debug, error, info, warn};

/// One data row, in input order. Empty cells are `None`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Row {
    /// 0-based index among data rows (header excluded).
    pub index: u64,
    pub values: Vec<Option<String>>,
}

/// Counters a sink reports back when the file is complete.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SinkSummary {
    pub row_groups: usize,
    pub degraded_cells: u64,
}

/// Downstream consumer of structured rows.
pub trait RowSink {
    /// Accept the next row. `columns` reflects every row seen so far,
    /// including this one.
    ///
    /// # Errors
    ///
    /// An error stops the file.
    fn accept(&mut self, columns: &[FieldDefinition], row: Row) -> Result<()>;

    /// Called once after the last row with the final column definitions.
    ///
    /// # Errors
    ///
    /// An error stops the file.
    fn finish(&mut self, _columns: &[FieldDefinition]) -> Result<SinkSummary> {
        Ok(SinkSummary::default())
    }
}

impl RowSink for Vec<Row> {
    fn accept(&mut self, _columns: &[FieldDefinition], row: Row) -> Result<()> {
        self.push(row);
        Ok(())
    }
}

/// Invoked exactly once per file with its final summary.
pub type FileInformationCallback = Box<dyn FnMut(&FileInformation) + Send>;

/// Invoked when a file fails fatally.
pub type FileProcessingErrorHandler = Box<dyn FnMut(&IngestError) + Send>;

/// Summary of one ingested file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FileInformation {
    /// Upload name as given by the client.
    pub file_name: String,
    /// Cleaned object name of the raw upload.
    pub derived_file_name: String,
    pub table_name: String,
    /// Where the columnar blocks of this file are stored.
    pub output_directory: String,
    pub number_of_rows: u64,
    pub number_of_columns: usize,
    pub columns: Vec<FieldDefinition>,
    pub file_size_bytes: u64,
    pub encoding: ByteDecoder,
    /// Rows with fewer fields than the header, padded with nulls.
    pub padded_rows: u64,
    /// Rows with more fields than the header, cut to the header width.
    pub truncated_rows: u64,
    /// Cells encoded as null because they did not fit the column type.
    pub degraded_cells: u64,
    pub row_groups: usize,
}

impl FileInformation {
    /// Whether any row or cell needed recovery.
    #[must_use]
    pub fn is_degraded(&self) -> bool {
        self.padded_rows > 0 || self.truncated_rows > 0 || self.degraded_cells > 0
    }

    /// JSON document handed to the metadata store.
    ///
    /// # Errors
    ///
    /// Returns an error if serialization fails.
    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string(self)?)
    }
}

/// Identity of the file being transformed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileTarget {
    pub file_name: String,
    pub table_name: String,
    pub output_directory: String,
}

/// Lifecycle of a [`FileTransformer`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransformState {
    AwaitingHeader,
    StreamingRows,
    Flushing,
    Done,
    Failed,
}

/// Splits a character stream into delimited records.
///
/// Quoted fields may contain delimiters, line breaks and doubled quotes.
/// `\n`, `\r` and `\r\n` all end a record. Blank lines produce no record.
#[derive(Debug)]
struct RecordSplitter {
    delimiter: char,
    quote: char,
    field: String,
    fields: Vec<String>,
    in_quotes: bool,
    quote_pending: bool,
    field_quoted: bool,
    after_cr: bool,
}

impl RecordSplitter {
    fn new(delimiter: char, quote: char) -> Self {
        Self {
            delimiter,
            quote,
            field: String::new(),
            fields: Vec::new(),
            in_quotes: false,
            quote_pending: false,
            field_quoted: false,
            after_cr: false,
        }
    }

    fn push(&mut self, ch: char) -> Option<Vec<String>> {
        if self.in_quotes {
            if !self.quote_pending {
                if ch == self.quote {
                    self.quote_pending = true;
                } else {
                    self.field.push(ch);
                }
                return None;
            }
            self.quote_pending = false;
            if ch == self.quote {
                self.field.push(ch);
                return None;
            }
            self.in_quotes = false;
        }

        if mem::take(&mut self.after_cr) && ch == '\n' {
            return None;
        }
        match ch {
            c if c == self.delimiter => {
                self.end_field();
                None
            }
            '\n' => self.end_record(),
            '\r' => {
                self.after_cr = true;
                self.end_record()
            }
            c if c == self.quote && self.field.is_empty() && !self.field_quoted => {
                self.in_quotes = true;
                self.field_quoted = true;
                None
            }
            c => {
                self.field.push(c);
                None
            }
        }
    }

    fn end_field(&mut self) {
        self.fields.push(mem::take(&mut self.field));
        self.field_quoted = false;
    }

    fn end_record(&mut self) -> Option<Vec<String>> {
        let blank = self.fields.is_empty() && self.field.is_empty() && !self.field_quoted;
        self.end_field();
        let record = mem::take(&mut self.fields);
        (!blank).then_some(record)
    }

    /// Close the final record. The flag is set when a quoted field was never closed.
    fn finish(&mut self) -> (Option<Vec<String>>, bool) {
        let unterminated = self.in_quotes && !self.quote_pending;
        self.in_quotes = false;
        self.quote_pending = false;
        self.after_cr = false;
        (self.end_record(), unterminated)
    }
}

/// Streaming transform for a single file. See the module docs.
pub struct FileTransformer {
    target: FileTarget,
    configured: Option<ByteDecoder>,
    decoder: Option<ByteDecoder>,
    state: TransformState,
    /// Undecoded bytes; before the decoder is chosen this is the sniff buffer.
    carry: Vec<u8>,
    /// Absolute file offset of `carry[0]`.
    carry_offset: u64,
    bytes_seen: u64,
    splitter: RecordSplitter,
    columns: Vec<FieldDefinition>,
    /// Completed records, header included.
    records: u64,
    rows: u64,
    padded_rows: u64,
    truncated_rows: u64,
    on_info: Option<FileInformationCallback>,
    on_error: Option<FileProcessingErrorHandler>,
}

impl FileTransformer {
    #[must_use]
    pub fn new(target: FileTarget, config: &IngestConfig) -> Self {
        Self {
            target,
            configured: config.encoding,
            decoder: None,
            state: TransformState::AwaitingHeader,
            carry: Vec::new(),
            carry_offset: 0,
            bytes_seen: 0,
            splitter: RecordSplitter::new(config.delimiter, config.quote),
            columns: Vec::new(),
            records: 0,
            rows: 0,
            padded_rows: 0,
            truncated_rows: 0,
            on_info: None,
            on_error: None,
        }
    }

    /// Register the callback that receives the final [`FileInformation`].
    #[must_use]
    pub fn on_file_information(mut self, callback: FileInformationCallback) -> Self {
        self.on_info = Some(callback);
        self
    }

    /// Register the handler for fatal errors.
    #[must_use]
    pub fn on_error(mut self, handler: FileProcessingErrorHandler) -> Self {
        self.on_error = Some(handler);
        self
    }

    #[must_use]
    pub fn state(&self) -> TransformState {
        self.state
    }

    /// Column definitions as inferred so far.
    #[must_use]
    pub fn columns(&self) -> &[FieldDefinition] {
        &self.columns
    }

    /// Data rows forwarded so far.
    #[must_use]
    pub fn rows_emitted(&self) -> u64 {
        self.rows
    }

    /// Feed the next chunk of raw bytes.
    ///
    /// # Errors
    ///
    /// Fails on an invalid byte sequence, on a sink error, or when the
    /// transformer has already failed. Any failure moves it to
    /// [`TransformState::Failed`].
    pub fn push_chunk(&mut self, chunk: &[u8], sink: &mut dyn RowSink) -> Result<()> {
        self.ensure_open()?;
        self.bytes_seen += chunk.len() as u64;
        let result = self.feed(chunk, sink);
        self.settle(result)
    }

    /// Signal end of input, flush the final record and emit the summary.
    ///
    /// # Errors
    ///
    /// Fails when the input ends inside a multi-byte character, or when the
    /// sink fails to flush.
    pub fn finish(mut self, sink: &mut dyn RowSink) -> Result<FileInformation> {
        self.ensure_open()?;
        let result = self.flush(sink);
        let info = self.settle(result)?;
        self.state = TransformState::Done;
        info!(
            file = %info.file_name,
            rows = info.number_of_rows,
            columns = info.number_of_columns,
            padded = info.padded_rows,
            truncated = info.truncated_rows,
            "file transformed"
        );
        if let Some(callback) = self.on_info.as_mut() {
            callback(&info);
        }
        Ok(info)
    }

    /// Record a failure raised outside the transformer (e.g. a read error).
    pub fn fail(&mut self, err: IngestError) -> IngestError {
        self.state = TransformState::Failed;
        error!(file = %self.target.file_name, error = %err, "file ingestion failed");
        if let Some(handler) = self.on_error.as_mut() {
            handler(&err);
        }
        err
    }

    fn ensure_open(&self) -> Result<()> {
        match self.state {
            TransformState::Failed => Err(IngestError::TransformerClosed("failed")),
            TransformState::Done => Err(IngestError::TransformerClosed("done")),
            _ => Ok(()),
        }
    }

    fn settle<T>(&mut self, result: Result<T>) -> Result<T> {
        result.map_err(|e| self.fail(e))
    }

    fn feed(&mut self, mut chunk: &[u8], sink: &mut dyn RowSink) -> Result<()> {
        let Some(decoder) = self.decoder else {
            self.carry.extend_from_slice(chunk);
            if self.carry.len() < MAX_BOM_LEN {
                return Ok(());
            }
            let pending = mem::take(&mut self.carry);
            let skip = self.select_decoder(&pending);
            return self.decode_buffer(&pending[skip..], sink);
        };

        if !self.carry.is_empty() {
            let carried = self.carry.len();
            let take = chunk.len().min(4);
            let mut head = mem::take(&mut self.carry);
            head.extend_from_slice(&chunk[..take]);
            match decoder.get_char(&head, 0) {
                Err(e) => return Err(self.invalid(e.byte, self.carry_offset + e.offset as u64)),
                Ok(Decoded::Incomplete) => {
                    // Only possible when the whole chunk fit into `head`.
                    self.carry = head;
                    return Ok(());
                }
                Ok(Decoded::Char { ch, width }) => {
                    debug!(offset = self.carry_offset, "character completed across chunks");
                    self.carry_offset += width as u64;
                    chunk = &chunk[width - carried..];
                    self.on_char(ch, sink)?;
                }
            }
        }
        self.decode_buffer(chunk, sink)
    }

    /// Choose the decoder from the first bytes and return the BOM length to skip.
    fn select_decoder(&mut self, prefix: &[u8]) -> usize {
        let (decoder, skip) = ByteDecoder::resolve(self.configured, prefix);
        debug!(file = %self.target.file_name, encoding = %decoder, bom = skip, "decoder selected");
        self.decoder = Some(decoder);
        self.carry_offset += skip as u64;
        skip
    }

    fn decode_buffer(&mut self, buf: &[u8], sink: &mut dyn RowSink) -> Result<()> {
        let Some(decoder) = self.decoder else {
            return Ok(());
        };
        let base = self.carry_offset;
        let mut offset = 0;
        loop {
            match decoder.get_char(buf, offset) {
                Err(e) => return Err(self.invalid(e.byte, base + e.offset as u64)),
                Ok(Decoded::Char { ch, width }) => {
                    offset += width;
                    self.on_char(ch, sink)?;
                }
                Ok(Decoded::Incomplete) => {
                    self.carry.extend_from_slice(&buf[offset..]);
                    break;
                }
            }
        }
        self.carry_offset = base + offset as u64;
        Ok(())
    }

    fn invalid(&self, byte: u8, offset: u64) -> IngestError {
        IngestError::InvalidCharacter {
            byte,
            offset,
            row: self.records + 1,
        }
    }

    fn on_char(&mut self, ch: char, sink: &mut dyn RowSink) -> Result<()> {
        match self.splitter.push(ch) {
            Some(record) => self.on_record(record, sink),
            None => Ok(()),
        }
    }

    fn on_record(&mut self, record: Vec<String>, sink: &mut dyn RowSink) -> Result<()> {
        self.records += 1;
        if self.state == TransformState::AwaitingHeader {
            self.start_columns(record);
            return Ok(());
        }

        let width = self.columns.len();
        let mut values = record;
        match values.len().cmp(&width) {
            Ordering::Less => {
                warn!(
                    file = %self.target.file_name,
                    row = self.records,
                    expected = width,
                    found = values.len(),
                    "structural mismatch: padding short row with nulls"
                );
                self.padded_rows += 1;
                values.resize(width, String::new());
            }
            Ordering::Greater => {
                warn!(
                    file = %self.target.file_name,
                    row = self.records,
                    expected = width,
                    found = values.len(),
                    "structural mismatch: dropping extra fields"
                );
                self.truncated_rows += 1;
                values.truncate(width);
            }
            Ordering::Equal => {}
        }

        for (column, value) in self.columns.iter_mut().zip(&values) {
            column.observe(value);
        }
        let row = Row {
            index: self.rows,
            values: values
                .into_iter()
                .map(|v| (!v.trim().is_empty()).then_some(v))
                .collect(),
        };
        self.rows += 1;
        sink.accept(&self.columns, row)
    }

    fn start_columns(&mut self, header: Vec<String>) {
        let raw: Vec<String> = header.iter().map(|h| h.trim().to_string()).collect();
        let names = dedupe_names(raw.iter().map(|h| clean_column_name(h)).collect());
        self.columns = names
            .into_iter()
            .zip(raw)
            .map(|(name, raw)| FieldDefinition::new(name, raw))
            .collect();
        debug!(
            file = %self.target.file_name,
            columns = self.columns.len(),
            "header parsed"
        );
        self.state = TransformState::StreamingRows;
    }

    fn flush(&mut self, sink: &mut dyn RowSink) -> Result<FileInformation> {
        if self.decoder.is_none() {
            let pending = mem::take(&mut self.carry);
            let skip = self.select_decoder(&pending);
            self.decode_buffer(&pending[skip..], sink)?;
        }
        if let Some(&byte) = self.carry.first() {
            return Err(self.invalid(byte, self.carry_offset));
        }

        let (last, unterminated) = self.splitter.finish();
        if unterminated {
            warn!(
                file = %self.target.file_name,
                row = self.records + 1,
                "input ended inside a quoted field"
            );
        }
        if let Some(record) = last {
            self.on_record(record, sink)?;
        }
        if self.state == TransformState::AwaitingHeader {
            warn!(file = %self.target.file_name, "input has no header row");
        }

        self.state = TransformState::Flushing;
        let summary = sink.finish(&self.columns)?;
        let target = &self.target;
        Ok(FileInformation {
            file_name: target.file_name.clone(),
            derived_file_name: format!("{}.csv", clean_file_name(&target.file_name)),
            table_name: clean_table_name(&target.table_name),
            output_directory: target.output_directory.clone(),
            number_of_rows: self.rows,
            number_of_columns: self.columns.len(),
            columns: mem::take(&mut self.columns),
            file_size_bytes: self.bytes_seen,
            encoding: self.decoder.unwrap_or(ByteDecoder::Utf8),
            padded_rows: self.padded_rows,
            truncated_rows: self.truncated_rows,
            degraded_cells: summary.degraded_cells,
            row_groups: summary.row_groups,
        })
    }
}

/// Drive a transformer over a reader, `chunk_size` bytes at a time.
///
/// # Errors
///
/// Propagates read failures and every error described on
/// [`FileTransformer::push_chunk`] and [`FileTransformer::finish`].
pub fn transform_reader(
    mut transformer: FileTransformer,
    reader: &mut dyn Read,
    chunk_size: usize,
    sink: &mut dyn RowSink,
) -> Result<FileInformation> {
    let mut buf = vec![0u8; chunk_size.max(1)];
    loop {
        let n = match reader.read(&mut buf) {
            Ok(0) => break,
            Ok(n) => n,
            Err(e) if e.kind() == ErrorKind::Interrupted => continue,
            Err(e) => return Err(transformer.fail(e.into())),
        };
        transformer.push_chunk(&buf[..n], sink)?;
    }
    transformer.finish(sink)
}
