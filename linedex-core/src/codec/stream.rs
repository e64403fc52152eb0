//! One-pass zstd stream I/O
//!
//! Used for the memory index, which is written once and read back whole.

use super::trim_terminator;
use crate::{Error, Result};
use std::fs::File;
use std::io::{BufRead, BufReader, BufWriter, Write};
use std::path::Path;

/// Writer producing a single zstd stream
pub struct StreamWriter {
    encoder: zstd::stream::write::Encoder<'static, BufWriter<File>>,
}

impl StreamWriter {
    /// Create a new stream-compressed file at `path`
    pub fn create(path: impl AsRef<Path>, level: i32) -> Result<Self> {
        let file = BufWriter::new(File::create(path.as_ref())?);
        let encoder =
            zstd::stream::write::Encoder::new(file, level).map_err(|e| Error::Codec(e.to_string()))?;
        Ok(Self { encoder })
    }

    /// Append one line, normalizing the terminator to `\n`
    pub fn write_line(&mut self, line: &str) -> Result<()> {
        self.encoder.write_all(trim_terminator(line).as_bytes())?;
        self.encoder.write_all(b"\n")?;
        Ok(())
    }

    /// Close the stream, flushing the final zstd frame
    pub fn finish(self) -> Result<()> {
        let mut file = self
            .encoder
            .finish()
            .map_err(|e| Error::Codec(e.to_string()))?;
        file.flush()?;
        Ok(())
    }
}

/// Sequential reader over a stream-compressed file
pub struct StreamReader {
    reader: BufReader<zstd::stream::read::Decoder<'static, BufReader<File>>>,
}

impl std::fmt::Debug for StreamReader {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StreamReader").finish_non_exhaustive()
    }
}

impl StreamReader {
    /// Open a stream-compressed file for sequential reading
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        if !path.exists() {
            return Err(Error::MissingArtifact {
                path: path.to_path_buf(),
            });
        }
        let file = File::open(path)?;
        let decoder =
            zstd::stream::read::Decoder::new(file).map_err(|e| Error::Codec(e.to_string()))?;
        Ok(Self {
            reader: BufReader::new(decoder),
        })
    }

    /// Read one line (terminator included); returns 0 at end of stream
    pub fn read_line(&mut self, out: &mut String) -> Result<usize> {
        Ok(self.reader.read_line(out)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn round_trip() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("idx.mem");

        let mut writer = StreamWriter::create(&path, 3).unwrap();
        for i in 0..100 {
            writer.write_line(&format!("sample{i},{}", i * 17)).unwrap();
        }
        writer.finish().unwrap();

        let mut reader = StreamReader::open(&path).unwrap();
        let mut line = String::new();
        for i in 0..100 {
            line.clear();
            assert!(reader.read_line(&mut line).unwrap() > 0);
            assert_eq!(line, format!("sample{i},{}\n", i * 17));
        }
        line.clear();
        assert_eq!(reader.read_line(&mut line).unwrap(), 0);
    }

    #[test]
    fn missing_file_is_reported() {
        let dir = TempDir::new().unwrap();
        let err = StreamReader::open(dir.path().join("absent.mem")).unwrap_err();
        assert!(err.is_missing());
    }
}
