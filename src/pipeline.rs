//! Ingestion jobs.
//!
//! A job ingests a batch of raw uploads that already sit in the object store
//! under their `input/` keys. For each file the pipeline streams the object
//! through decompression, the [`FileTransformer`] and the
//! [`ColumnarEncoder`], uploading every encoded block as soon as it is ready.
//!
//! Files are independent of each other and run in parallel. Within a file
//! everything is sequential and in order. The job succeeds only if every
//! file does; files that did succeed keep their artifacts when a sibling
//! fails, leaving cleanup or retry to the caller.
//!
//! All state a job needs travels in a [`JobContext`], including the optional
//! hooks through which the host learns about every finished or failed file.

use crate::columnar::{BlockSink, ColumnarEncoder, EncodedBlock};
use crate::config::IngestConfig;
use crate::error::{IngestError, Result};
use crate::io::compression::{InputCompression, decompress_reader};
use crate::io::object_store::ObjectStore;
use crate::paths::KeySpace;
use crate::transform::{FileInformation, FileTarget, FileTransformer, transform_reader};
use rayon::prelude::*;
use std::collections::HashSet;
use std::io::Read;
use std::sync::Arc;
use tracing::{debug, error, info, info_span, warn};

/// Content type of uploaded columnar blocks.
pub const PARQUET_CONTENT_TYPE: &str = "application/vnd.apache.parquet";

/// Content type of staged raw uploads.
pub const CSV_CONTENT_TYPE: &str = "text/csv";

/// Receives the summary of every file that completes.
pub type FileInformationHook = Arc<dyn Fn(&InputFile, &FileInformation) + Send + Sync>;

/// Receives the error of every file that fails, once per file.
pub type FileErrorHook = Arc<dyn Fn(&InputFile, &IngestError) + Send + Sync>;

/// Everything one ingestion job runs against. Cloning is cheap.
#[derive(Clone)]
pub struct JobContext {
    pub keys: KeySpace,
    pub store: Arc<dyn ObjectStore>,
    pub config: IngestConfig,
    pub on_file_information: Option<FileInformationHook>,
    pub on_error: Option<FileErrorHook>,
}

impl JobContext {
    pub fn new(
        workspace_id: impl Into<String>,
        project_id: impl Into<String>,
        store: Arc<dyn ObjectStore>,
        config: IngestConfig,
    ) -> Self {
        Self {
            keys: KeySpace::new(workspace_id, project_id),
            store,
            config,
            on_file_information: None,
            on_error: None,
        }
    }

    /// Call `hook` with the summary of each file that completes.
    #[must_use]
    pub fn with_file_information_hook(
        mut self,
        hook: impl Fn(&InputFile, &FileInformation) + Send + Sync + 'static,
    ) -> Self {
        self.on_file_information = Some(Arc::new(hook));
        self
    }

    /// Call `hook` with the error of each file that fails, whether it failed
    /// while opening the upload or while transforming it.
    #[must_use]
    pub fn with_error_hook(
        mut self,
        hook: impl Fn(&InputFile, &IngestError) + Send + Sync + 'static,
    ) -> Self {
        self.on_error = Some(Arc::new(hook));
        self
    }
}

/// A raw upload to ingest, identified by table and original file name.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InputFile {
    pub table_name: String,
    pub file_name: String,
}

impl InputFile {
    pub fn new(table_name: impl Into<String>, file_name: impl Into<String>) -> Self {
        Self {
            table_name: table_name.into(),
            file_name: file_name.into(),
        }
    }

    /// Object key of the raw upload.
    #[must_use]
    pub fn key(&self, keys: &KeySpace) -> String {
        keys.input_key(&self.table_name, &self.file_name)
    }
}

/// Store a raw upload under its `input/` key.
///
/// # Errors
///
/// Returns [`IngestError::Upload`] if the store rejects the object.
pub fn stage_input(ctx: &JobContext, input: &InputFile, body: &mut dyn Read) -> Result<String> {
    let key = input.key(&ctx.keys);
    let size = ctx
        .store
        .put_stream(&key, CSV_CONTENT_TYPE, body)
        .map_err(|source| IngestError::Upload {
            key: key.clone(),
            source,
        })?;
    debug!(key = %key, size, "input staged");
    Ok(key)
}

/// Ingest one staged file.
///
/// Blocks are uploaded to
/// `client/<ws>/<proj>/columnar/<table>/<file>-part-<nnnnn>.parquet` as
/// they are encoded.
///
/// # Errors
///
/// Fails when the upload cannot be read or decompressed, on an invalid byte
/// sequence, or when a block upload fails.
pub fn ingest_file(ctx: &JobContext, input: &InputFile) -> Result<FileInformation> {
    let span = info_span!("ingest_file", table = %input.table_name, file = %input.file_name);
    let _guard = span.enter();

    let key = input.key(&ctx.keys);
    let (mut reader, codec) = match open_input(ctx, &key) {
        Ok(opened) => opened,
        Err(err) => {
            error!(key = %key, error = %err, "cannot open input");
            if let Some(hook) = &ctx.on_error {
                hook(input, &err);
            }
            return Err(err);
        }
    };
    debug!(key = %key, codec = codec.name(), "opened input");

    let target = FileTarget {
        file_name: input.file_name.clone(),
        table_name: input.table_name.clone(),
        output_directory: ctx.keys.columnar_dir(&input.table_name),
    };
    let mut transformer = FileTransformer::new(target, &ctx.config);
    if let Some(hook) = ctx.on_file_information.clone() {
        let input = input.clone();
        transformer = transformer
            .on_file_information(Box::new(move |info: &FileInformation| hook(&input, info)));
    }
    if let Some(hook) = ctx.on_error.clone() {
        let input = input.clone();
        transformer = transformer.on_error(Box::new(move |err: &IngestError| hook(&input, err)));
    }

    let uploader = BlockUploader { ctx, input };
    let mut encoder = ColumnarEncoder::new(ctx.config.row_group_size, ctx.config.compression, uploader);

    transform_reader(transformer, &mut reader, ctx.config.chunk_size, &mut encoder)
}

fn open_input(ctx: &JobContext, key: &str) -> Result<(Box<dyn Read + Send>, InputCompression)> {
    let raw = ctx.store.open_read(key)?;
    Ok(decompress_reader(raw, key)?)
}

/// Uploads each encoded block of one file under its columnar key.
struct BlockUploader<'a> {
    ctx: &'a JobContext,
    input: &'a InputFile,
}

impl BlockSink for BlockUploader<'_> {
    fn emit(&mut self, block: EncodedBlock) -> Result<()> {
        let key = self
            .ctx
            .keys
            .columnar_key(&self.input.table_name, &self.input.file_name, block.index);
        self.ctx
            .store
            .put_bytes(&key, PARQUET_CONTENT_TYPE, &block.bytes)
            .map_err(|source| IngestError::Upload {
                key: key.clone(),
                source,
            })?;
        debug!(key = %key, rows = block.row_count, "block uploaded");
        Ok(())
    }
}

/// Result of one file within a batch.
#[derive(Debug)]
pub struct FileOutcome {
    pub input: InputFile,
    pub result: Result<FileInformation>,
}

/// Per-file results of a batch, in input order.
#[derive(Debug, Default)]
pub struct JobReport {
    pub outcomes: Vec<FileOutcome>,
}

impl JobReport {
    /// Summaries of the files that succeeded.
    pub fn succeeded(&self) -> impl Iterator<Item = &FileInformation> {
        self.outcomes.iter().filter_map(|o| o.result.as_ref().ok())
    }

    /// Files that failed, with their errors.
    pub fn failed(&self) -> impl Iterator<Item = (&InputFile, &IngestError)> {
        self.outcomes
            .iter()
            .filter_map(|o| o.result.as_ref().err().map(|e| (&o.input, e)))
    }

    #[must_use]
    pub fn is_success(&self) -> bool {
        self.failed().next().is_none()
    }

    /// Turn the report into the job's verdict.
    ///
    /// # Errors
    ///
    /// Returns [`IngestError::BatchFailed`] if any file failed.
    pub fn into_result(self) -> Result<Vec<FileInformation>> {
        let total = self.outcomes.len();
        let failed = self.failed().count();
        if failed > 0 {
            return Err(IngestError::BatchFailed { failed, total });
        }
        self.outcomes.into_iter().map(|o| o.result).collect()
    }
}

/// Ingest a batch of staged files, `config.parallelism` at a time.
///
/// Per-file failures are collected in the report rather than returned.
/// An input whose key was already taken by an earlier input of the batch
/// fails with [`IngestError::DuplicateInput`] instead of being ingested twice.
///
/// # Errors
///
/// Returns an error only if the worker pool cannot be created.
pub fn ingest_batch(ctx: &JobContext, inputs: &[InputFile]) -> Result<JobReport> {
    let threads = ctx.config.effective_parallelism().min(inputs.len().max(1));
    info!(files = inputs.len(), threads, "ingestion job started");

    let mut seen = HashSet::with_capacity(inputs.len());
    let duplicates: Vec<bool> = inputs
        .iter()
        .map(|input| !seen.insert(input.key(&ctx.keys)))
        .collect();

    let run = |(input, &duplicate): (&InputFile, &bool)| FileOutcome {
        input: input.clone(),
        result: if duplicate {
            reject_duplicate(ctx, input)
        } else {
            ingest_file(ctx, input)
        },
    };
    let outcomes: Vec<FileOutcome> = if threads == 1 {
        inputs.iter().zip(&duplicates).map(run).collect()
    } else {
        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(threads)
            .thread_name(|i| format!("sluice-ingest-{i}"))
            .build()
            .map_err(|e| IngestError::Io(std::io::Error::other(e)))?;
        pool.install(|| inputs.par_iter().zip(&duplicates).map(run).collect())
    };

    let report = JobReport { outcomes };
    for (input, err) in report.failed() {
        warn!(table = %input.table_name, file = %input.file_name, error = %err, "file failed");
    }
    info!(
        succeeded = report.succeeded().count(),
        failed = report.failed().count(),
        "ingestion job finished"
    );
    Ok(report)
}

fn reject_duplicate(ctx: &JobContext, input: &InputFile) -> Result<FileInformation> {
    let err = IngestError::DuplicateInput {
        key: input.key(&ctx.keys),
    };
    if let Some(hook) = &ctx.on_error {
        hook(input, &err);
    }
    Err(err)
}
