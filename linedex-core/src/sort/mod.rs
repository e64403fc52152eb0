//! External sorting for raw index files
//!
//! Sorts a `<key>,<offset>` text file that may exceed available RAM: the
//! input is split into chunks sorted in memory and spilled to numbered run
//! files, then the runs are merged with a min-heap keyed on the sort-key
//! projection. Equal projections tie-break on run index, which makes the
//! merge stable with respect to input order.

use crate::types::SortKey;
use crate::{Error, Result};
use std::cmp::Ordering;
use std::collections::BinaryHeap;
use std::fs::{self, File};
use std::io::{BufRead, BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};
use tracing::debug;

/// Sorts raw index files by a sort-key projection in bounded memory
#[derive(Debug)]
pub struct ExternalSorter<'a, S: SortKey> {
    sort_key: &'a S,
    chunk_elems: usize,
}

impl<'a, S: SortKey> ExternalSorter<'a, S> {
    /// Create a sorter holding at most `chunk_elems` lines in memory
    pub fn new(sort_key: &'a S, chunk_elems: usize) -> Result<Self> {
        if chunk_elems == 0 {
            return Err(Error::Config("sort chunk size must be nonzero".into()));
        }
        Ok(Self {
            sort_key,
            chunk_elems,
        })
    }

    /// Sort `input` into `output`, leaving `input` untouched
    ///
    /// On error the partial output and any run files are removed, so an
    /// existing `output` always means a completed sort.
    pub fn sort_file(&self, input: &Path, output: &Path) -> Result<()> {
        let mut runs = Vec::new();
        let result = self.sort_inner(input, output, &mut runs);
        for run in &runs {
            let _ = fs::remove_file(run);
        }
        if result.is_err() {
            let _ = fs::remove_file(output);
        }
        result
    }

    fn sort_inner(&self, input: &Path, output: &Path, runs: &mut Vec<PathBuf>) -> Result<()> {
        let reader = BufReader::new(File::open(input)?);
        let mut chunk: Vec<String> = Vec::with_capacity(self.chunk_elems.min(1 << 20));
        let mut line_no = 0u64;

        for line in reader.lines() {
            let line = line?;
            line_no += 1;
            // Validate the entry shape up front so a corrupt raw index
            // fails with its position instead of sorting garbage
            key_of(&line, input, line_no)?;
            chunk.push(line);

            if chunk.len() >= self.chunk_elems {
                // Track the run before writing it, so a failed spill still
                // gets cleaned up
                let run = run_path(input, runs.len());
                runs.push(run.clone());
                self.spill_run(&mut chunk, &run)?;
            }
        }

        if runs.is_empty() {
            // Everything fit in one chunk: sort and write the output directly
            self.sort_chunk(&mut chunk);
            let mut out = BufWriter::new(File::create(output)?);
            for line in &chunk {
                out.write_all(line.as_bytes())?;
                out.write_all(b"\n")?;
            }
            out.flush()?;
            return Ok(());
        }

        if !chunk.is_empty() {
            let run = run_path(input, runs.len());
            runs.push(run.clone());
            self.spill_run(&mut chunk, &run)?;
        }

        debug!(runs = runs.len(), "merging sorted runs");
        self.merge_runs(runs, output)
    }

    fn sort_chunk(&self, chunk: &mut [String]) {
        chunk.sort_by_cached_key(|line| {
            // Shape was validated while chunking
            let (key, _) = line.rsplit_once(',').unwrap_or((line, ""));
            self.sort_key.project(key)
        });
    }

    fn spill_run(&self, chunk: &mut Vec<String>, run: &Path) -> Result<()> {
        self.sort_chunk(chunk);
        let mut out = BufWriter::new(File::create(run)?);
        for line in chunk.iter() {
            out.write_all(line.as_bytes())?;
            out.write_all(b"\n")?;
        }
        out.flush()?;
        debug!(run = %run.display(), entries = chunk.len(), "spilled sorted run");
        chunk.clear();
        Ok(())
    }

    fn merge_runs(&self, runs: &[PathBuf], output: &Path) -> Result<()> {
        let mut readers: Vec<BufReader<File>> = Vec::with_capacity(runs.len());
        for run in runs {
            readers.push(BufReader::new(File::open(run)?));
        }

        let mut heap: BinaryHeap<RunHead<S::Projection>> = BinaryHeap::new();
        for (idx, reader) in readers.iter_mut().enumerate() {
            if let Some(head) = self.next_head(reader, runs, idx)? {
                heap.push(head);
            }
        }

        let mut out = BufWriter::new(File::create(output)?);
        while let Some(head) = heap.pop() {
            out.write_all(head.line.as_bytes())?;
            out.write_all(b"\n")?;
            if let Some(next) = self.next_head(&mut readers[head.run], runs, head.run)? {
                heap.push(next);
            }
        }
        out.flush()?;
        Ok(())
    }

    fn next_head(
        &self,
        reader: &mut BufReader<File>,
        runs: &[PathBuf],
        run: usize,
    ) -> Result<Option<RunHead<S::Projection>>> {
        let mut line = String::new();
        if reader.read_line(&mut line)? == 0 {
            return Ok(None);
        }
        while line.ends_with('\n') || line.ends_with('\r') {
            line.pop();
        }
        let key = key_of(&line, &runs[run], 0)?;
        let projection = self.sort_key.project(key);
        Ok(Some(RunHead {
            projection,
            run,
            line,
        }))
    }
}

/// Key part of a `<key>,<offset>` entry; the last comma is the delimiter
fn key_of<'l>(line: &'l str, path: &Path, line_no: u64) -> Result<&'l str> {
    match line.rsplit_once(',') {
        Some((key, _offset)) => Ok(key),
        None => Err(Error::Corruption {
            path: path.to_path_buf(),
            offset: line_no,
            reason: "index entry has no comma delimiter".into(),
        }),
    }
}

fn run_path(input: &Path, idx: usize) -> PathBuf {
    PathBuf::from(format!("{}.run{:04}", input.display(), idx))
}

/// Head line of one run during the merge
struct RunHead<P: Ord> {
    projection: P,
    run: usize,
    line: String,
}

impl<P: Ord> PartialEq for RunHead<P> {
    fn eq(&self, other: &Self) -> bool {
        self.projection == other.projection && self.run == other.run
    }
}

impl<P: Ord> Eq for RunHead<P> {}

impl<P: Ord> PartialOrd for RunHead<P> {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl<P: Ord> Ord for RunHead<P> {
    fn cmp(&self, other: &Self) -> Ordering {
        // BinaryHeap is a max-heap: reverse both the projection and the run
        // tiebreak so pop order is (smallest projection, earliest run)
        match self.projection.cmp(&other.projection) {
            Ordering::Equal => self.run.cmp(&other.run).reverse(),
            other => other.reverse(),
        }
    }
}
