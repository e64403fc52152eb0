//! Seekable frame-compressed files

use super::{trim_terminator, FrameMeta, FOOTER_SIZE, MAGIC, TABLE_ENTRY_SIZE};
use crate::{Error, Result};
use bytes::{Buf, BufMut, BytesMut};
use std::fs::File;
use std::io::{BufWriter, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

/// Writer producing a seekable frame-compressed file
#[derive(Debug)]
pub struct SeekableWriter {
    file: BufWriter<File>,
    level: i32,
    frame_size: usize,
    pending: Vec<u8>,
    frames: Vec<FrameMeta>,
    written: u64,
}

impl SeekableWriter {
    /// Create a new seekable file at `path`
    pub fn create(path: impl AsRef<Path>, level: i32, frame_size: usize) -> Result<Self> {
        if frame_size == 0 {
            return Err(Error::Config("frame size must be nonzero".into()));
        }
        let file = BufWriter::new(File::create(path.as_ref())?);
        Ok(Self {
            file,
            level,
            frame_size,
            pending: Vec::with_capacity(frame_size.min(16 * 1024 * 1024)),
            frames: Vec::new(),
            written: 0,
        })
    }

    /// Decompressed offset the next write will land at
    pub fn tell(&self) -> u64 {
        self.written
    }

    /// Append one line, normalizing the terminator to `\n`
    pub fn write_line(&mut self, line: &str) -> Result<()> {
        let body = trim_terminator(line);
        self.pending.extend_from_slice(body.as_bytes());
        self.pending.push(b'\n');
        self.written += body.len() as u64 + 1;
        self.flush_full_frames()
    }

    /// Flush buffered data and write the seek table and footer
    pub fn finish(mut self) -> Result<()> {
        self.flush_full_frames()?;
        if !self.pending.is_empty() {
            let data = std::mem::take(&mut self.pending);
            self.emit_frame(&data)?;
        }

        let mut table = BytesMut::with_capacity(self.frames.len() * TABLE_ENTRY_SIZE);
        for frame in &self.frames {
            table.put_u32_le(frame.compressed_size);
            table.put_u32_le(frame.uncompressed_size);
        }
        let checksum = crc32fast::hash(&table);

        self.file.write_all(&table)?;

        let mut footer = BytesMut::with_capacity(FOOTER_SIZE);
        footer.put_u32_le(self.frames.len() as u32);
        footer.put_u32_le(checksum);
        footer.put_slice(MAGIC);
        self.file.write_all(&footer)?;
        self.file.flush()?;
        Ok(())
    }

    fn flush_full_frames(&mut self) -> Result<()> {
        while self.pending.len() >= self.frame_size {
            let rest = self.pending.split_off(self.frame_size);
            let full = std::mem::replace(&mut self.pending, rest);
            self.emit_frame(&full)?;
        }
        Ok(())
    }

    fn emit_frame(&mut self, data: &[u8]) -> Result<()> {
        let compressed =
            zstd::encode_all(data, self.level).map_err(|e| Error::Codec(e.to_string()))?;
        self.file.write_all(&compressed)?;
        self.frames.push(FrameMeta {
            compressed_size: compressed.len() as u32,
            uncompressed_size: data.len() as u32,
        });
        Ok(())
    }
}

/// One frame plus its position in both address spaces
#[derive(Debug, Clone, Copy)]
struct FrameSpan {
    compressed_offset: u64,
    compressed_size: u32,
    uncompressed_offset: u64,
    uncompressed_size: u32,
}

/// Reader over a seekable frame-compressed file
///
/// Holds at most one decompressed frame; sequential reads ride the cached
/// frame and random seeks decompress exactly the frame under the target.
#[derive(Debug)]
pub struct SeekableReader {
    file: File,
    path: PathBuf,
    frames: Vec<FrameSpan>,
    total: u64,
    cursor: u64,
    cached: Option<usize>,
    cache: Vec<u8>,
}

impl SeekableReader {
    /// Open a seekable file, validating its seek table
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        if !path.exists() {
            return Err(Error::MissingArtifact { path });
        }
        let mut file = File::open(&path)?;
        let file_len = file.metadata()?.len();
        if file_len < FOOTER_SIZE as u64 {
            return Err(Error::InvalidFormat(format!(
                "{}: too short for a footer",
                path.display()
            )));
        }

        file.seek(SeekFrom::End(-(FOOTER_SIZE as i64)))?;
        let mut footer = [0u8; FOOTER_SIZE];
        file.read_exact(&mut footer)?;

        let mut cursor = &footer[..];
        let frame_count = cursor.get_u32_le() as usize;
        let expected_crc = cursor.get_u32_le();
        if cursor != MAGIC {
            return Err(Error::InvalidFormat(format!(
                "{}: bad trailing magic",
                path.display()
            )));
        }

        let table_len = frame_count as u64 * TABLE_ENTRY_SIZE as u64;
        if file_len < FOOTER_SIZE as u64 + table_len {
            return Err(Error::InvalidFormat(format!(
                "{}: seek table truncated",
                path.display()
            )));
        }
        file.seek(SeekFrom::End(-(FOOTER_SIZE as i64) - table_len as i64))?;
        let mut table = vec![0u8; table_len as usize];
        file.read_exact(&mut table)?;
        if crc32fast::hash(&table) != expected_crc {
            return Err(Error::Corruption {
                path,
                offset: file_len - FOOTER_SIZE as u64 - table_len,
                reason: "seek table checksum mismatch".into(),
            });
        }

        let mut frames = Vec::with_capacity(frame_count);
        let mut compressed_offset = 0u64;
        let mut uncompressed_offset = 0u64;
        let mut cursor = &table[..];
        for _ in 0..frame_count {
            let compressed_size = cursor.get_u32_le();
            let uncompressed_size = cursor.get_u32_le();
            frames.push(FrameSpan {
                compressed_offset,
                compressed_size,
                uncompressed_offset,
                uncompressed_size,
            });
            compressed_offset += compressed_size as u64;
            uncompressed_offset += uncompressed_size as u64;
        }
        if compressed_offset != file_len - FOOTER_SIZE as u64 - table_len {
            return Err(Error::InvalidFormat(format!(
                "{}: frame sizes disagree with file length",
                path.display()
            )));
        }

        Ok(Self {
            file,
            path,
            frames,
            total: uncompressed_offset,
            cursor: 0,
            cached: None,
            cache: Vec::new(),
        })
    }

    /// Path this reader was opened from
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Total decompressed length
    pub fn len(&self) -> u64 {
        self.total
    }

    /// Whether the decompressed stream is empty
    pub fn is_empty(&self) -> bool {
        self.total == 0
    }

    /// Current decompressed position
    pub fn tell(&self) -> u64 {
        self.cursor
    }

    /// Position the cursor at a decompressed offset
    ///
    /// Valid targets are offsets previously returned by `tell()`, up to and
    /// including the end of the stream.
    pub fn seek(&mut self, offset: u64) -> Result<()> {
        if offset > self.total {
            return Err(Error::Corruption {
                path: self.path.clone(),
                offset,
                reason: format!("seek past end of stream (len {})", self.total),
            });
        }
        self.cursor = offset;
        Ok(())
    }

    /// Read one line (terminator included) into `out`
    ///
    /// Returns the number of bytes appended; 0 means end of stream. A line
    /// spanning frames is assembled across them.
    pub fn read_line(&mut self, out: &mut String) -> Result<usize> {
        let mut bytes = Vec::new();
        while self.cursor < self.total {
            let idx = self.frame_at(self.cursor);
            self.load_frame(idx)?;
            let frame = self.frames[idx];
            let local = (self.cursor - frame.uncompressed_offset) as usize;
            let rest = &self.cache[local..];
            match rest.iter().position(|&b| b == b'\n') {
                Some(pos) => {
                    bytes.extend_from_slice(&rest[..=pos]);
                    self.cursor += pos as u64 + 1;
                    break;
                }
                None => {
                    bytes.extend_from_slice(rest);
                    self.cursor += rest.len() as u64;
                }
            }
        }
        if bytes.is_empty() {
            return Ok(0);
        }
        let text = std::str::from_utf8(&bytes).map_err(|e| Error::Corruption {
            path: self.path.clone(),
            offset: self.cursor,
            reason: format!("invalid UTF-8 in line: {e}"),
        })?;
        out.push_str(text);
        Ok(bytes.len())
    }

    /// Index of the frame containing decompressed offset `offset`
    fn frame_at(&self, offset: u64) -> usize {
        // First frame whose span ends beyond the target
        self.frames
            .partition_point(|f| f.uncompressed_offset + f.uncompressed_size as u64 <= offset)
    }

    fn load_frame(&mut self, idx: usize) -> Result<()> {
        if self.cached == Some(idx) {
            return Ok(());
        }
        let frame = self.frames[idx];
        self.file.seek(SeekFrom::Start(frame.compressed_offset))?;
        let mut compressed = vec![0u8; frame.compressed_size as usize];
        self.file.read_exact(&mut compressed)?;
        let data =
            zstd::decode_all(&compressed[..]).map_err(|e| Error::Codec(e.to_string()))?;
        if data.len() != frame.uncompressed_size as usize {
            return Err(Error::Corruption {
                path: self.path.clone(),
                offset: frame.uncompressed_offset,
                reason: format!(
                    "frame decompressed to {} bytes, expected {}",
                    data.len(),
                    frame.uncompressed_size
                ),
            });
        }
        self.cache = data;
        self.cached = Some(idx);
        Ok(())
    }
}
