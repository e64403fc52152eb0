//! Block-compressed I/O over zstd
//!
//! Two modes share one on-disk idea: zstd frames small enough that random
//! access never decompresses more than one of them.
//!
//! - **Seekable mode** ([`SeekableWriter`] / [`SeekableReader`]): the file is
//!   a run of independent zstd frames, each holding at most `frame_size`
//!   decompressed bytes, followed by a seek table and a fixed footer. Used
//!   for the DB file and the full index.
//! - **Streaming mode** ([`StreamWriter`] / [`StreamReader`]): one ordinary
//!   zstd stream, read sequentially. Used for the memory index, which is
//!   loaded wholly into RAM.
//!
//! Seekable file layout:
//!
//! ```text
//! ┌──────────────────────────────────────────────┐
//! │ frame 0 (zstd)                               │
//! │ frame 1 (zstd)                               │
//! │ ...                                          │
//! ├──────────────────────────────────────────────┤
//! │ seek table: per frame                        │
//! │   compressed_size (u32 LE)                   │
//! │   uncompressed_size (u32 LE)                 │
//! ├──────────────────────────────────────────────┤
//! │ footer: frame_count (u32 LE)                 │
//! │         table crc32 (u32 LE)                 │
//! │         magic "LDX1"                         │
//! └──────────────────────────────────────────────┘
//! ```
//!
//! Line terminators are normalized to `\n` on write; offsets and `tell()`
//! positions always refer to the decompressed stream.

mod seekable;
mod stream;

pub use seekable::{SeekableReader, SeekableWriter};
pub use stream::{StreamReader, StreamWriter};

/// Magic trailing a seekable file
pub const MAGIC: &[u8; 4] = b"LDX1";

/// Footer size in bytes: frame count + table crc + magic
pub const FOOTER_SIZE: usize = 12;

/// Seek-table entry size in bytes
pub const TABLE_ENTRY_SIZE: usize = 8;

/// One frame of a seekable file
#[derive(Debug, Clone, Copy)]
pub struct FrameMeta {
    /// Compressed frame size on disk
    pub compressed_size: u32,
    /// Decompressed frame size
    pub uncompressed_size: u32,
}

/// Strip one trailing line terminator, accepting `\n` and `\r\n`
pub(crate) fn trim_terminator(line: &str) -> &str {
    let line = line.strip_suffix('\n').unwrap_or(line);
    line.strip_suffix('\r').unwrap_or(line)
}
