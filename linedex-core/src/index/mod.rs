//! Index building and querying
//!
//! A built index is a triple of files derived from one plaintext database:
//!
//! - `<db>.zst` - the database itself, seekable-compressed
//! - `<db>.zst.<tag>.full` - sorted `<key>,<db_offset>` lines, seekable
//! - `<db>.zst.<tag>.mem` - header + every (W+1)-th full-index entry,
//!   stream-compressed and loaded into RAM on open
//!
//! [`Builder`] produces the triple; [`Searcher`] answers queries against it.

mod builder;
mod reader;

pub use builder::{BuildReport, Builder, StagePerf};
pub use reader::{Matches, Searcher};

use crate::codec::{StreamReader, StreamWriter};
use crate::{defaults, Error, Result};
use serde::{Deserialize, Serialize};
use std::ffi::OsString;
use std::path::{Path, PathBuf};

/// Build-time configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BuildConfig {
    /// zstd compression level for every artifact
    pub compression_level: i32,
    /// Maximum decompressed bytes per seekable frame
    pub frame_size: usize,
    /// I/O buffer for the full-file recompression stage
    pub chunk_size_bytes: usize,
    /// External-sort chunk size and raw-index flush cadence, in entries
    pub chunk_elems: usize,
    /// Full-index entries skipped between memory-index samples (W)
    pub unindexed_lines: usize,
}

impl Default for BuildConfig {
    fn default() -> Self {
        Self {
            compression_level: defaults::COMPRESSION_LEVEL,
            frame_size: defaults::FRAME_SIZE,
            chunk_size_bytes: defaults::CHUNK_SIZE_BYTES,
            chunk_elems: defaults::CHUNK_ELEMS,
            unindexed_lines: defaults::UNINDEXED_LINES,
        }
    }
}

impl BuildConfig {
    pub(crate) fn validate(&self) -> Result<()> {
        if self.frame_size == 0 {
            return Err(Error::Config("frame_size must be nonzero".into()));
        }
        if self.chunk_size_bytes == 0 {
            return Err(Error::Config("chunk_size_bytes must be nonzero".into()));
        }
        if self.chunk_elems == 0 {
            return Err(Error::Config("chunk_elems must be nonzero".into()));
        }
        Ok(())
    }
}

/// Filenames of one index triple and its build intermediates
#[derive(Debug, Clone)]
pub struct IndexPaths {
    /// Plaintext source (deleted after the DB is compressed)
    pub plain: PathBuf,
    /// Compressed DB file
    pub db: PathBuf,
    /// Compressed sorted full index
    pub full: PathBuf,
    /// Stream-compressed memory index
    pub mem: PathBuf,
    /// Unsorted raw index (intermediate)
    pub raw: PathBuf,
    /// Sorted uncompressed index (intermediate)
    pub sorted: PathBuf,
}

impl IndexPaths {
    /// Derive all artifact paths from a database path and an index tag
    ///
    /// `db_path` may name either the plaintext source or the already
    /// compressed `.zst` file.
    pub fn new(db_path: impl AsRef<Path>, tag: &str) -> Self {
        let db_path = db_path.as_ref();
        let (plain, db) = match db_path.extension() {
            Some(ext) if ext == "zst" => (db_path.with_extension(""), db_path.to_path_buf()),
            _ => (db_path.to_path_buf(), append_suffix(db_path, ".zst")),
        };
        let prefix = format!(".{tag}");
        Self {
            plain,
            full: append_suffix(&db, &format!("{prefix}.full")),
            mem: append_suffix(&db, &format!("{prefix}.mem")),
            raw: append_suffix(&db, &format!("{prefix}.raw")),
            sorted: append_suffix(&db, &format!("{prefix}.srt")),
            db,
        }
    }
}

fn append_suffix(path: &Path, suffix: &str) -> PathBuf {
    let mut name = OsString::from(path.as_os_str());
    name.push(suffix);
    PathBuf::from(name)
}

/// Three-line header leading the memory index
///
/// Records the sort-key identity the index was built with and the sampling
/// stride, so an opener can detect (and warn about) a mismatched sort key.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MemHeader {
    /// Sort-key name at build time
    pub sort_rule_name: String,
    /// Sort-key settings string at build time
    pub sort_rule_settings: String,
    /// Sampling stride W
    pub unindexed_lines: usize,
}

const HDR_NAME: &str = "idx_srt_rule_name=";
const HDR_SETTINGS: &str = "idx_srt_rule_settings=";
const HDR_STRIDE: &str = "unidx_lines_quan=";

impl MemHeader {
    /// Write the three header lines
    pub(crate) fn write_to(&self, writer: &mut StreamWriter) -> Result<()> {
        writer.write_line(&format!("{HDR_NAME}{}", self.sort_rule_name))?;
        writer.write_line(&format!("{HDR_SETTINGS}{}", self.sort_rule_settings))?;
        writer.write_line(&format!("{HDR_STRIDE}{}", self.unindexed_lines))?;
        Ok(())
    }

    /// Parse the three header lines
    pub(crate) fn read_from(reader: &mut StreamReader) -> Result<Self> {
        let name = header_line(reader, HDR_NAME)?;
        let settings = header_line(reader, HDR_SETTINGS)?;
        let stride = header_line(reader, HDR_STRIDE)?;
        let unindexed_lines = stride
            .parse::<usize>()
            .map_err(|_| Error::InvalidFormat(format!("bad sampling stride: {stride:?}")))?;
        Ok(Self {
            sort_rule_name: name,
            sort_rule_settings: settings,
            unindexed_lines,
        })
    }
}

fn header_line(reader: &mut StreamReader, prefix: &str) -> Result<String> {
    let mut line = String::new();
    if reader.read_line(&mut line)? == 0 {
        return Err(Error::InvalidFormat(format!(
            "memory index ended inside header, expected {prefix}"
        )));
    }
    let line = line.trim_end_matches('\n');
    line.strip_prefix(prefix)
        .map(str::to_string)
        .ok_or_else(|| {
            Error::InvalidFormat(format!(
                "memory index header line {line:?} missing prefix {prefix}"
            ))
        })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn paths_from_plaintext() {
        let paths = IndexPaths::new("/data/db.txt", "byname");
        assert_eq!(paths.plain, PathBuf::from("/data/db.txt"));
        assert_eq!(paths.db, PathBuf::from("/data/db.txt.zst"));
        assert_eq!(paths.full, PathBuf::from("/data/db.txt.zst.byname.full"));
        assert_eq!(paths.mem, PathBuf::from("/data/db.txt.zst.byname.mem"));
        assert_eq!(paths.raw, PathBuf::from("/data/db.txt.zst.byname.raw"));
        assert_eq!(paths.sorted, PathBuf::from("/data/db.txt.zst.byname.srt"));
    }

    #[test]
    fn paths_from_compressed() {
        let paths = IndexPaths::new("/data/db.txt.zst", "byname");
        assert_eq!(paths.plain, PathBuf::from("/data/db.txt"));
        assert_eq!(paths.db, PathBuf::from("/data/db.txt.zst"));
        assert_eq!(paths.full, PathBuf::from("/data/db.txt.zst.byname.full"));
    }

    #[test]
    fn header_round_trip() {
        use tempfile::TempDir;
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("idx.mem");

        let header = MemHeader {
            sort_rule_name: "numeric".into(),
            sort_rule_settings: String::new(),
            unindexed_lines: 42,
        };
        let mut writer = StreamWriter::create(&path, 3).unwrap();
        header.write_to(&mut writer).unwrap();
        writer.write_line("k,0").unwrap();
        writer.finish().unwrap();

        let mut reader = StreamReader::open(&path).unwrap();
        let parsed = MemHeader::read_from(&mut reader).unwrap();
        assert_eq!(parsed, header);

        let mut body = String::new();
        reader.read_line(&mut body).unwrap();
        assert_eq!(body, "k,0\n");
    }

    #[test]
    fn truncated_header_rejected() {
        use tempfile::TempDir;
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("idx.mem");

        let mut writer = StreamWriter::create(&path, 3).unwrap();
        writer.write_line("idx_srt_rule_name=whatever").unwrap();
        writer.finish().unwrap();

        let mut reader = StreamReader::open(&path).unwrap();
        let err = MemHeader::read_from(&mut reader).unwrap_err();
        assert!(matches!(err, Error::InvalidFormat(_)));
    }

    #[test]
    fn default_config_is_valid() {
        assert!(BuildConfig::default().validate().is_ok());
    }
}
