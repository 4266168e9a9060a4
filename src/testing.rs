//! Testing utilities for ingestion code.
//!
//! - **Fixtures**: generated CSV inputs, encodings and chunkings of them
//! - **Assertions**: reading columnar blocks back and checking their shape
//! - **Mock engine**: a [`QueryEngine`](crate::planner::QueryEngine) that
//!   returns a canned result and counts executions
//!
//! # Quick Start
//!
//! ```
//! use sluice::testing::*;
//! use sluice::transform::{FileTarget, FileTransformer, Row};
//! use sluice::IngestConfig;
//!
//! # fn main() -> sluice::Result<()> {
//! let csv = CsvFixture::people(10).build();
//! let target = FileTarget {
//!     file_name: "people.csv".into(),
//!     table_name: "people".into(),
//!     output_directory: "out/".into(),
//! };
//! let mut transformer = FileTransformer::new(target, &IngestConfig::default());
//! let mut rows: Vec<Row> = Vec::new();
//! for chunk in chunked(csv.as_bytes(), 7) {
//!     transformer.push_chunk(chunk, &mut rows)?;
//! }
//! let info = transformer.finish(&mut rows)?;
//! assert_eq!(info.number_of_rows, 10);
//! # Ok(())
//! # }
//! ```

pub mod assertions;
pub mod fixtures;
pub mod mock_engine;

pub use assertions::*;
pub use fixtures::*;
pub use mock_engine::*;
