//! Storage-facing I/O: the object store seam, input decompression and file
//! listings.

pub mod compression;
pub mod listing;
pub mod object_store;

pub use compression::{InputCompression, decompress_reader};
pub use object_store::{LocalObjectStore, MemoryObjectStore, ObjectStore, StorageError};
