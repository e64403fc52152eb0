//! Index build pipeline
//!
//! Five stages, each skipped when its output already exists, each removing
//! its predecessor's intermediate once the successor is on disk. A failed or
//! killed build resumes at the first missing artifact on the next call.

use super::{BuildConfig, IndexPaths, MemHeader};
use crate::codec::{trim_terminator, SeekableReader, SeekableWriter, StreamWriter};
use crate::sort::ExternalSorter;
use crate::types::{LineParser, SortKey};
use crate::{Error, Result};
use serde::Serialize;
use std::fs::{self, File};
use std::io::{BufRead, BufReader, BufWriter, Write};
use std::path::Path;
use std::time::Instant;
use tracing::info;

/// Wall time of one build stage
#[derive(Debug, Clone, Serialize)]
pub struct StagePerf {
    /// Stage name
    pub stage: &'static str,
    /// Elapsed wall time in seconds
    pub seconds: f64,
    /// Whether the stage found its output and did nothing
    pub skipped: bool,
}

/// Outcome of one `build()` invocation
#[derive(Debug, Clone, Default, Serialize)]
pub struct BuildReport {
    /// Per-stage wall times, in execution order
    pub stages: Vec<StagePerf>,
    /// Index entries written by the raw-index stage (0 when skipped)
    pub entries_emitted: u64,
}

/// Builds the DB / full-index / memory-index triple
pub struct Builder<P: LineParser, S: SortKey> {
    paths: IndexPaths,
    parser: P,
    sort_key: S,
    config: BuildConfig,
    perf: Vec<StagePerf>,
}

impl<P: LineParser, S: SortKey> Builder<P, S> {
    /// Create a builder for `db_path` (plaintext or `.zst`) under `tag`
    pub fn new(
        db_path: impl AsRef<Path>,
        tag: &str,
        parser: P,
        sort_key: S,
        config: BuildConfig,
    ) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            paths: IndexPaths::new(db_path, tag),
            parser,
            sort_key,
            config,
            perf: Vec::new(),
        })
    }

    /// Artifact paths this builder reads and writes
    pub fn paths(&self) -> &IndexPaths {
        &self.paths
    }

    /// Stage timings accumulated across every `build()` call
    pub fn perf(&self) -> &[StagePerf] {
        &self.perf
    }

    /// Run all missing stages of the pipeline
    pub fn build(&mut self) -> Result<BuildReport> {
        let mut report = BuildReport::default();

        let start = Instant::now();
        let ran = self.compress_db()?;
        finish_stage(&mut report, "compress_db", start, ran);

        let start = Instant::now();
        let emitted = self.emit_raw_index()?;
        report.entries_emitted = emitted.unwrap_or(0);
        finish_stage(&mut report, "emit_raw_index", start, emitted.is_some());

        let start = Instant::now();
        let ran = self.sort_raw_index()?;
        finish_stage(&mut report, "sort_raw_index", start, ran);

        let start = Instant::now();
        let ran = self.compress_full_index()?;
        finish_stage(&mut report, "compress_full_index", start, ran);

        let start = Instant::now();
        let ran = self.sample_memory_index()?;
        finish_stage(&mut report, "sample_memory_index", start, ran);

        self.perf.extend(report.stages.iter().cloned());
        Ok(report)
    }

    /// Stage 1: compress the plaintext DB, then delete the plaintext
    fn compress_db(&self) -> Result<bool> {
        if self.paths.db.exists() {
            return Ok(false);
        }
        if !self.paths.plain.exists() {
            return Err(Error::MissingArtifact {
                path: self.paths.plain.clone(),
            });
        }

        discard_on_err(&self.paths.db, || {
            let source = File::open(&self.paths.plain)?;
            let buffer = self
                .config
                .chunk_size_bytes
                .min(source.metadata()?.len().max(4096) as usize);
            let mut reader = BufReader::with_capacity(buffer, source);
            let mut writer = SeekableWriter::create(
                &self.paths.db,
                self.config.compression_level,
                self.config.frame_size,
            )?;

            let mut line = String::new();
            while reader.read_line(&mut line)? > 0 {
                writer.write_line(&line)?;
                line.clear();
            }
            writer.finish()
        })?;
        fs::remove_file(&self.paths.plain)?;
        Ok(true)
    }

    /// Stage 2: scan the compressed DB and emit `<key>,<offset>` lines
    ///
    /// Returns the number of entries, or `None` when the stage was skipped.
    fn emit_raw_index(&self) -> Result<Option<u64>> {
        if self.paths.full.exists() || self.paths.sorted.exists() || self.paths.raw.exists() {
            return Ok(None);
        }

        let entries = discard_on_err(&self.paths.raw, || {
            let mut db = SeekableReader::open(&self.paths.db)?;
            let mut out = BufWriter::new(File::create(&self.paths.raw)?);
            let mut entries = 0u64;
            let mut in_header = true;
            let mut line = String::new();

            loop {
                let offset = db.tell();
                line.clear();
                if db.read_line(&mut line)? == 0 {
                    break;
                }
                let body = trim_terminator(&line);
                if in_header {
                    if body.starts_with('#') {
                        continue;
                    }
                    in_header = false;
                }
                for key in self.parser.parse(body) {
                    out.write_all(key.as_bytes())?;
                    writeln!(out, ",{offset}")?;
                    entries += 1;
                    if entries % self.config.chunk_elems as u64 == 0 {
                        out.flush()?;
                    }
                }
            }
            out.flush()?;
            Ok(entries)
        })?;
        Ok(Some(entries))
    }

    /// Stage 3: sort the raw index, then delete it
    fn sort_raw_index(&self) -> Result<bool> {
        if self.paths.full.exists() || self.paths.sorted.exists() {
            return Ok(false);
        }
        if !self.paths.raw.exists() {
            return Err(Error::MissingArtifact {
                path: self.paths.raw.clone(),
            });
        }

        let sorter = ExternalSorter::new(&self.sort_key, self.config.chunk_elems)?;
        sorter.sort_file(&self.paths.raw, &self.paths.sorted)?;
        fs::remove_file(&self.paths.raw)?;
        Ok(true)
    }

    /// Stage 4: compress the sorted index, then delete the sorted temporary
    fn compress_full_index(&self) -> Result<bool> {
        if self.paths.full.exists() {
            return Ok(false);
        }
        if !self.paths.sorted.exists() {
            return Err(Error::MissingArtifact {
                path: self.paths.sorted.clone(),
            });
        }

        discard_on_err(&self.paths.full, || {
            let mut reader = BufReader::new(File::open(&self.paths.sorted)?);
            let mut writer = SeekableWriter::create(
                &self.paths.full,
                self.config.compression_level,
                self.config.frame_size,
            )?;
            let mut line = String::new();
            while reader.read_line(&mut line)? > 0 {
                writer.write_line(&line)?;
                line.clear();
            }
            writer.finish()
        })?;
        fs::remove_file(&self.paths.sorted)?;
        Ok(true)
    }

    /// Stage 5: sample every (W+1)-th full-index entry into the memory index
    fn sample_memory_index(&self) -> Result<bool> {
        if self.paths.mem.exists() {
            return Ok(false);
        }

        discard_on_err(&self.paths.mem, || {
            let mut full = SeekableReader::open(&self.paths.full)?;
            let mut out = StreamWriter::create(&self.paths.mem, self.config.compression_level)?;
            MemHeader {
                sort_rule_name: self.sort_key.name().to_string(),
                sort_rule_settings: self.sort_key.settings(),
                unindexed_lines: self.config.unindexed_lines,
            }
            .write_to(&mut out)?;

            let mut line = String::new();
            'sampling: loop {
                let pos = full.tell();
                line.clear();
                if full.read_line(&mut line)? == 0 {
                    break;
                }
                let body = trim_terminator(&line);
                let (key, _offset) = body.rsplit_once(',').ok_or_else(|| Error::Corruption {
                    path: self.paths.full.clone(),
                    offset: pos,
                    reason: "full-index entry has no comma delimiter".into(),
                })?;
                out.write_line(&format!("{key},{pos}"))?;

                for _ in 0..self.config.unindexed_lines {
                    line.clear();
                    if full.read_line(&mut line)? == 0 {
                        break 'sampling;
                    }
                }
            }
            out.finish()
        })?;
        Ok(true)
    }
}

/// Run a stage body, deleting its partial output on error
///
/// Resume decisions are existence checks, so a failed stage must not leave
/// an output file behind.
fn discard_on_err<T>(output: &Path, body: impl FnOnce() -> Result<T>) -> Result<T> {
    let result = body();
    if result.is_err() {
        let _ = fs::remove_file(output);
    }
    result
}

fn finish_stage(report: &mut BuildReport, stage: &'static str, start: Instant, ran: bool) {
    let seconds = start.elapsed().as_secs_f64();
    info!(stage, skipped = !ran, seconds, "build stage done");
    report.stages.push(StagePerf {
        stage,
        seconds,
        skipped: !ran,
    });
}
