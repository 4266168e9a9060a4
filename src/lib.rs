//! # Sluice
//!
//! Streaming ingestion of large delimited text uploads into columnar storage.
//!
//! Sluice takes arbitrarily large CSV-like files of unknown encoding, decodes
//! them chunk by chunk without holding the file in memory, infers a type for
//! every column, cleans up column identifiers, and re-encodes the rows as
//! Parquet blocks uploaded to object storage. Ingested tables can then be
//! queried together through a generated join query, and content hashes over
//! the inputs decide when derived artifacts need rebuilding.
//!
//! ## Key Features
//!
//! - **Chunk-safe decoding** - ASCII, UTF-8 and UTF-16 with byte order mark sniffing;
//!   characters split across chunk boundaries are carried over, never dropped
//! - **Type inference** - integer, number, date and string columns inferred as a
//!   join over the cells, so the result does not depend on chunking
//! - **Columnar output** - Parquet row groups with configurable size and compression
//! - **Join planning** - one `SELECT` over many ingested tables
//! - **Staleness checks** - content hashes over file listings
//! - **Parallel batches** - files of one job ingest concurrently
//!
//! ## Quick Start
//!
//! ```
//! use sluice::io::object_store::{MemoryObjectStore, ObjectStore};
//! use sluice::pipeline::{InputFile, JobContext, ingest_batch, stage_input};
//! use sluice::IngestConfig;
//! use std::sync::Arc;
//!
//! # fn main() -> sluice::Result<()> {
//! let store = Arc::new(MemoryObjectStore::new());
//! let ctx = JobContext::new("ws1", "proj1", store.clone(), IngestConfig::default());
//!
//! let input = InputFile::new("Orders", "orders 2024.csv");
//! stage_input(&ctx, &input, &mut "id,amount\n1,9.50\n2,12\n".as_bytes())?;
//!
//! let infos = ingest_batch(&ctx, &[input])?.into_result()?;
//! assert_eq!(infos[0].number_of_rows, 2);
//! assert!(store.exists("client/ws1/proj1/columnar/orders/orders_2024-part-00000.parquet")?);
//! # Ok(())
//! # }
//! ```
//!
//! ## Data flow
//!
//! ```text
//! raw bytes ─▶ decompress ─▶ FileTransformer ─▶ ColumnarEncoder ─▶ object store
//!                               │
//!                               └─▶ FileInformation ─▶ QueryPlanner / HashResolver
//! ```
//!
//! ## Modules
//!
//! - [`decoder`]: byte decoders
//! - [`column_name`]: identifier cleaning
//! - [`field_type`]: column type inference
//! - [`transform`]: the streaming transformer
//! - [`columnar`]: Parquet block encoding
//! - [`planner`]: join queries and their materialization
//! - [`versioning`]: content hashes and staleness
//! - [`pipeline`]: per-file and batch jobs
//! - [`io`]: object stores, decompression, file listings
//! - [`testing`]: fixtures for tests

pub mod column_name;
pub mod columnar;
pub mod config;
pub mod decoder;
pub mod error;
pub mod field_type;
pub mod io;
pub mod paths;
pub mod pipeline;
pub mod planner;
pub mod testing;
pub mod transform;
pub mod versioning;

// General re-exports
pub use column_name::clean_column_name;
pub use columnar::{ColumnarEncoder, EncodedBlock};
pub use config::{ColumnCompression, IngestConfig};
pub use decoder::{ByteDecoder, Decoded};
pub use error::{IngestError, Result};
pub use field_type::{FieldDefinition, FieldType, FieldTypeCalculator};
pub use paths::{ArtifactKind, KeySpace};
pub use pipeline::{InputFile, JobContext, JobReport, ingest_batch, ingest_file};
pub use planner::{JoinColumn, JoinTableDefinition, QueryEngine, define_query};
pub use transform::{FileInformation, FileTransformer, RowSink, TransformState};
pub use versioning::{ContentHash, FileEntry, HashResolver, HashStore};
