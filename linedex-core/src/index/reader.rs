//! Index loading and key lookup
//!
//! Opening a built triple loads the memory index into two parallel arrays
//! (sample keys and their full-index offsets). A query bisects the samples
//! under the sort-key projection, seeks the full index to the window below
//! the target, then scans forward: string-equal keys are dereferenced into
//! DB lines, and the scan ends at the first entry projecting past the
//! target. The scan touches one window of non-matching entries plus the
//! matching run itself, even when that run straddles window boundaries.

use super::{IndexPaths, MemHeader};
use crate::codec::{trim_terminator, SeekableReader, StreamReader};
use crate::types::SortKey;
use crate::{Error, Result};
use std::fmt::Display;
use std::path::Path;
use tracing::warn;

/// Read handle over one built index triple
#[derive(Debug)]
pub struct Searcher<S: SortKey> {
    db: SeekableReader,
    full: SeekableReader,
    samples: Vec<String>,
    offsets: Vec<u64>,
    window: usize,
    sort_key: S,
}

impl<S: SortKey> Searcher<S> {
    /// Open the triple for `db_path` under `tag`
    ///
    /// All three files must exist. A memory-index header recording a
    /// different sort-key identity than `sort_key` produces a warning, not
    /// an error; the caller's sort key is used for all comparisons.
    pub fn open(db_path: impl AsRef<Path>, tag: &str, sort_key: S) -> Result<Self> {
        let paths = IndexPaths::new(db_path, tag);
        let db = SeekableReader::open(&paths.db)?;
        let full = SeekableReader::open(&paths.full)?;

        let mut mem = StreamReader::open(&paths.mem)?;
        let header = MemHeader::read_from(&mut mem)?;
        if header.sort_rule_name != sort_key.name()
            || header.sort_rule_settings != sort_key.settings()
        {
            warn!(
                built_with = %header.sort_rule_name,
                built_settings = %header.sort_rule_settings,
                supplied = %sort_key.name(),
                supplied_settings = %sort_key.settings(),
                "memory index was built with a different sort key; lookups may miss"
            );
        }

        let mut samples = Vec::new();
        let mut offsets = Vec::new();
        let mut line = String::new();
        let mut line_no = 0u64;
        loop {
            line.clear();
            if mem.read_line(&mut line)? == 0 {
                break;
            }
            line_no += 1;
            let body = trim_terminator(&line);
            let (key, offset) = body.rsplit_once(',').ok_or_else(|| Error::Corruption {
                path: paths.mem.clone(),
                offset: line_no,
                reason: "memory-index entry has no comma delimiter".into(),
            })?;
            let offset = offset.parse::<u64>().map_err(|_| Error::Corruption {
                path: paths.mem.clone(),
                offset: line_no,
                reason: format!("non-integer full-index offset {offset:?}"),
            })?;
            samples.push(key.to_string());
            offsets.push(offset);
        }

        Ok(Self {
            db,
            full,
            samples,
            offsets,
            window: header.unindexed_lines,
            sort_key,
        })
    }

    /// Sampling stride W recorded at build time
    pub fn window(&self) -> usize {
        self.window
    }

    /// Number of in-memory samples
    pub fn sample_count(&self) -> usize {
        self.samples.len()
    }

    /// Lazily yield every DB line indexed under `query`
    ///
    /// Numeric queries are stringified before comparison; matching is string
    /// equality on the stored key text, in full-index order.
    pub fn get(&mut self, query: impl Display) -> Matches<'_, S> {
        let query = query.to_string();
        let target = self.sort_key.project(&query);
        Matches {
            query,
            target,
            searcher: self,
            state: State::Bisect,
        }
    }

    /// Collect the matches for several queries, in query order
    pub fn get_many<I, Q>(&mut self, queries: I) -> Result<Vec<String>>
    where
        I: IntoIterator<Item = Q>,
        Q: Display,
    {
        let mut lines = Vec::new();
        for query in queries {
            for line in self.get(query) {
                lines.push(line?);
            }
        }
        Ok(lines)
    }

    /// Full-index offset of the window the scan starts at
    ///
    /// The rightmost sample projecting strictly below the target, clamped to
    /// the first sample. Starting strictly below the target (rather than at
    /// it) keeps duplicate runs that straddle a window boundary reachable; a
    /// query preceding every sample clamps to 0 and the scan terminates on
    /// its first entry. No wraparound.
    fn window_start(&self, target: &S::Projection) -> Option<u64> {
        if self.samples.is_empty() {
            return None;
        }
        let idx = self
            .samples
            .partition_point(|sample| self.sort_key.project(sample) < *target);
        Some(self.offsets[idx.saturating_sub(1)])
    }

    /// Split one full-index entry into key text and DB offset
    fn parse_entry<'l>(&self, body: &'l str, at: u64) -> Result<(&'l str, u64)> {
        let (key, offset) = body.rsplit_once(',').ok_or_else(|| Error::Corruption {
            path: self.full_path(),
            offset: at,
            reason: "full-index entry has no comma delimiter".into(),
        })?;
        let offset = offset.parse::<u64>().map_err(|_| Error::Corruption {
            path: self.full_path(),
            offset: at,
            reason: format!("non-integer DB offset {offset:?}"),
        })?;
        Ok((key, offset))
    }

    /// Read the single DB line starting at `offset`
    fn fetch_db_line(&mut self, offset: u64) -> Result<String> {
        self.db.seek(offset)?;
        let mut line = String::new();
        if self.db.read_line(&mut line)? == 0 {
            return Err(Error::Corruption {
                path: self.db_path(),
                offset,
                reason: "index offset points past the last DB line".into(),
            });
        }
        Ok(line)
    }

    fn full_path(&self) -> std::path::PathBuf {
        self.full.path().to_path_buf()
    }

    fn db_path(&self) -> std::path::PathBuf {
        self.db.path().to_path_buf()
    }
}

enum State {
    /// Bisect the samples and seek the full index
    Bisect,
    /// Scanning forward through the sorted entries
    Scan,
    /// Finished or failed
    Done,
}

/// Iterator over the DB lines matching one query
pub struct Matches<'s, S: SortKey> {
    searcher: &'s mut Searcher<S>,
    query: String,
    target: S::Projection,
    state: State,
}

impl<S: SortKey> Matches<'_, S> {
    fn step(&mut self) -> Result<Option<String>> {
        loop {
            match self.state {
                State::Done => return Ok(None),
                State::Bisect => {
                    let Some(start) = self.searcher.window_start(&self.target) else {
                        self.state = State::Done;
                        return Ok(None);
                    };
                    self.searcher.full.seek(start)?;
                    self.state = State::Scan;
                }
                State::Scan => {
                    let at = self.searcher.full.tell();
                    let mut line = String::new();
                    if self.searcher.full.read_line(&mut line)? == 0 {
                        self.state = State::Done;
                        return Ok(None);
                    }
                    let body = trim_terminator(&line);
                    let (key, offset) = self.searcher.parse_entry(body, at)?;
                    // Entries are sorted by projection: past the target
                    // nothing can match anymore
                    if self.searcher.sort_key.project(key) > self.target {
                        self.state = State::Done;
                        return Ok(None);
                    }
                    if key == self.query {
                        return Ok(Some(self.searcher.fetch_db_line(offset)?));
                    }
                }
            }
        }
    }
}

impl<S: SortKey> Iterator for Matches<'_, S> {
    type Item = Result<String>;

    fn next(&mut self) -> Option<Self::Item> {
        match self.step() {
            Ok(Some(line)) => Some(Ok(line)),
            Ok(None) => None,
            Err(e) => {
                self.state = State::Done;
                Some(Err(e))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::index::{BuildConfig, Builder};
    use crate::types::{DelimitedParser, LexicographicKey, NumericKey, SplitParser, WholeLineParser};
    use std::fs;
    use std::path::PathBuf;
    use tempfile::TempDir;

    fn small_config(window: usize) -> BuildConfig {
        BuildConfig {
            compression_level: 3,
            frame_size: 256,
            chunk_size_bytes: 4096,
            chunk_elems: 3,
            unindexed_lines: window,
        }
    }

    fn build_db<P, K>(dir: &TempDir, lines: &[&str], parser: P, sort_key: K, window: usize) -> PathBuf
    where
        P: crate::types::LineParser,
        K: SortKey,
    {
        let path = dir.path().join("records.txt");
        let mut body = lines.join("\n");
        body.push('\n');
        fs::write(&path, body).unwrap();

        let mut builder =
            Builder::new(&path, "t", parser, sort_key, small_config(window)).unwrap();
        builder.build().unwrap();
        path
    }

    #[test]
    fn single_key_lookup() {
        let dir = TempDir::new().unwrap();
        let path = build_db(
            &dir,
            &["a,1", "b,2", "c,3"],
            DelimitedParser::new(",", 0),
            LexicographicKey,
            1000,
        );

        let mut searcher = Searcher::open(&path, "t", LexicographicKey).unwrap();
        let matches: Vec<String> = searcher.get("b").map(|r| r.unwrap()).collect();
        assert_eq!(matches, vec!["b,2\n"]);
    }

    #[test]
    fn duplicate_keys_yield_in_index_order() {
        let dir = TempDir::new().unwrap();
        let path = build_db(
            &dir,
            &["a,1", "a,2", "b,3"],
            DelimitedParser::new(",", 0),
            LexicographicKey,
            1000,
        );

        let mut searcher = Searcher::open(&path, "t", LexicographicKey).unwrap();
        let matches: Vec<String> = searcher.get("a").map(|r| r.unwrap()).collect();
        assert_eq!(matches, vec!["a,1\n", "a,2\n"]);

        let empty: Vec<_> = searcher.get("z").collect();
        assert!(empty.is_empty());
    }

    #[test]
    fn multi_key_record_found_under_each_key() {
        let dir = TempDir::new().unwrap();
        let path = build_db(&dir, &["1;2;3"], SplitParser::new(";"), NumericKey, 1000);

        let mut searcher = Searcher::open(&path, "t", NumericKey).unwrap();
        for query in ["1", "2", "3"] {
            let matches: Vec<String> = searcher.get(query).map(|r| r.unwrap()).collect();
            assert_eq!(matches, vec!["1;2;3\n"], "query {query}");
        }

        // Three full-index entries, all carrying the same DB offset
        let paths = IndexPaths::new(dir.path().join("records.txt"), "t");
        let mut full = SeekableReader::open(&paths.full).unwrap();
        let mut line = String::new();
        let mut db_offsets = Vec::new();
        while full.read_line(&mut line).unwrap() > 0 {
            let body = trim_terminator(&line);
            db_offsets.push(body.rsplit_once(',').unwrap().1.to_string());
            line.clear();
        }
        assert_eq!(db_offsets, vec!["0", "0", "0"]);
    }

    #[test]
    fn window_boundary_query_scans_forward_from_sample() {
        let dir = TempDir::new().unwrap();
        let path = build_db(
            &dir,
            &["k0", "k1", "k2", "k3", "k4"],
            WholeLineParser,
            LexicographicKey,
            2,
        );

        let mut searcher = Searcher::open(&path, "t", LexicographicKey).unwrap();
        // W=2 over five distinct keys: samples are exactly k0 and k3
        assert_eq!(searcher.sample_count(), 2);
        assert_eq!(searcher.window(), 2);

        // k4 bisects to the k3 sample and is found by the forward scan
        let matches: Vec<String> = searcher.get("k4").map(|r| r.unwrap()).collect();
        assert_eq!(matches, vec!["k4\n"]);
    }

    #[test]
    fn query_preceding_all_samples_finds_nothing() {
        let dir = TempDir::new().unwrap();
        let path = build_db(
            &dir,
            &["m1", "m2", "m3", "m4", "m5", "m6"],
            WholeLineParser,
            LexicographicKey,
            1,
        );

        let mut searcher = Searcher::open(&path, "t", LexicographicKey).unwrap();
        // "a" precedes every sample; the clamped scan of window 0 is bounded
        // and yields nothing, with no wraparound into the last window
        let matches: Vec<_> = searcher.get("a").collect();
        assert!(matches.is_empty());
    }

    #[test]
    fn numeric_queries_stringify() {
        let dir = TempDir::new().unwrap();
        let path = build_db(
            &dir,
            &["10,ten", "2,two", "30,thirty"],
            DelimitedParser::new(",", 0),
            NumericKey,
            1000,
        );

        let mut searcher = Searcher::open(&path, "t", NumericKey).unwrap();
        let matches: Vec<String> = searcher.get(10).map(|r| r.unwrap()).collect();
        assert_eq!(matches, vec!["10,ten\n"]);
    }

    #[test]
    fn get_many_chains_queries_in_order() {
        let dir = TempDir::new().unwrap();
        let path = build_db(
            &dir,
            &["a,1", "b,2", "c,3"],
            DelimitedParser::new(",", 0),
            LexicographicKey,
            1000,
        );

        let mut searcher = Searcher::open(&path, "t", LexicographicKey).unwrap();
        let lines = searcher.get_many(["c", "missing", "a"]).unwrap();
        assert_eq!(lines, vec!["c,3\n", "a,1\n"]);
    }

    #[test]
    fn duplicates_spanning_windows_stream_past_the_window() {
        let dir = TempDir::new().unwrap();
        // Five records under one key with W=1: the tail scan must keep
        // yielding past the window boundary
        let path = build_db(
            &dir,
            &["dup,1", "dup,2", "dup,3", "dup,4", "dup,5", "end,6"],
            DelimitedParser::new(",", 0),
            LexicographicKey,
            1,
        );

        let mut searcher = Searcher::open(&path, "t", LexicographicKey).unwrap();
        let matches: Vec<String> = searcher.get("dup").map(|r| r.unwrap()).collect();
        assert_eq!(
            matches,
            vec!["dup,1\n", "dup,2\n", "dup,3\n", "dup,4\n", "dup,5\n"]
        );
    }

    #[test]
    fn empty_database_yields_nothing() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("records.txt");
        fs::write(&path, "").unwrap();
        let mut builder = Builder::new(
            &path,
            "t",
            WholeLineParser,
            LexicographicKey,
            small_config(2),
        )
        .unwrap();
        builder.build().unwrap();

        let mut searcher = Searcher::open(&path, "t", LexicographicKey).unwrap();
        assert_eq!(searcher.sample_count(), 0);
        let matches: Vec<_> = searcher.get("anything").collect();
        assert!(matches.is_empty());
    }

    #[test]
    fn missing_artifacts_are_fatal_at_open() {
        let dir = TempDir::new().unwrap();
        let path = build_db(&dir, &["a"], WholeLineParser, LexicographicKey, 2);

        let paths = IndexPaths::new(&path, "t");
        fs::remove_file(&paths.mem).unwrap();
        let err = Searcher::open(&path, "t", LexicographicKey).unwrap_err();
        assert!(err.is_missing());

        fs::remove_file(&paths.full).unwrap();
        let err = Searcher::open(&path, "t", LexicographicKey).unwrap_err();
        assert!(err.is_missing());
    }

    #[test]
    fn mismatched_sort_key_still_opens() {
        let dir = TempDir::new().unwrap();
        let path = build_db(&dir, &["5", "7"], WholeLineParser, NumericKey, 1000);

        // Built numeric, opened lexicographic: a warning, not an error
        let mut searcher = Searcher::open(&path, "t", LexicographicKey).unwrap();
        let matches: Vec<String> = searcher.get("5").map(|r| r.unwrap()).collect();
        assert_eq!(matches, vec!["5\n"]);
    }

    #[test]
    fn every_record_reachable_under_every_key() {
        let dir = TempDir::new().unwrap();
        // 40 records, several multi-key, tiny window and frames
        let lines: Vec<String> = (0..40).map(|i| format!("u{:02};v{:02}", i, (i * 7) % 40)).collect();
        let refs: Vec<&str> = lines.iter().map(String::as_str).collect();
        let path = build_db(&dir, &refs, SplitParser::new(";"), LexicographicKey, 3);

        let mut searcher = Searcher::open(&path, "t", LexicographicKey).unwrap();
        for (i, original) in lines.iter().enumerate() {
            for key in original.split(';') {
                let matches: Vec<String> = searcher.get(key).map(|r| r.unwrap()).collect();
                let expected = format!("{original}\n");
                assert!(
                    matches.contains(&expected),
                    "record {i} not reachable under key {key}"
                );
            }
        }
    }
}
