//! Linedex Core - Compressed Key-to-Offset Index Engine
//!
//! A read-optimized index over large line-oriented text databases:
//!
//! - **Seekable compression**: the database and its index are stored as
//!   independent zstd frames, so any decompressed byte offset is reachable
//!   by decompressing at most one frame
//! - **External sorting**: index entries are sorted on disk in bounded
//!   memory via chunked runs and a k-way merge
//! - **Two-tier lookup**: a coarse in-memory sample of the sorted index is
//!   bisected first, then a single sampling window is scanned
//!
//! # Architecture
//!
//! Building turns a plaintext database into three files:
//!
//! - **DB file** (`<name>.zst`): the original text, frame-compressed
//! - **Full index** (`<name>.zst.<tag>.full`): sorted `<key>,<offset>` lines
//! - **Memory index** (`<name>.zst.<tag>.mem`): header + every (W+1)-th
//!   full-index entry, loaded wholly into RAM on open
//!
//! Querying bisects the memory index, scans one window of the full index,
//! and dereferences matching offsets into the DB file.

pub mod codec;
pub mod index;
pub mod sort;

mod error;
mod types;

pub use error::{Error, Result};
pub use index::{BuildConfig, BuildReport, Builder, IndexPaths, Matches, Searcher, StagePerf};
pub use types::*;

/// Linedex version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Default configuration values
pub mod defaults {
    /// Compression level passed to the zstd encoder
    pub const COMPRESSION_LEVEL: i32 = 6;

    /// Maximum decompressed bytes per seekable frame (1MB)
    pub const FRAME_SIZE: usize = 1024 * 1024;

    /// I/O buffer for the full-file recompression stage (1GB)
    pub const CHUNK_SIZE_BYTES: usize = 1024 * 1024 * 1024;

    /// External-sort chunk size and raw-index flush cadence, in entries
    pub const CHUNK_ELEMS: usize = 10_000_000;

    /// Full-index entries skipped between memory-index samples
    pub const UNINDEXED_LINES: usize = 1_000;
}
