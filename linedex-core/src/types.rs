//! Callback capabilities and their shipped implementations
//!
//! The engine is parameterized by two small capabilities: a [`LineParser`]
//! that extracts keys from a database line during build, and a [`SortKey`]
//! that maps key text to an orderable projection. The projection defines the
//! order of the full index and drives the bisect at query time; stored keys
//! keep their original textual form.

/// Extracts index keys from one database line.
///
/// Called at most once per non-comment line during build. Returning an empty
/// vector skips the line; returning several keys indexes the same record
/// under each of them.
pub trait LineParser {
    /// Keys for one record; empty means "no index entry for this line"
    fn parse(&self, line: &str) -> Vec<String>;
}

/// Total order over key text.
///
/// Applied when sorting the raw index, when sampling the memory index, and
/// on every query. Must be deterministic: the same key text always maps to
/// the same projection.
pub trait SortKey {
    /// Orderable image of a key
    type Projection: Ord;

    /// Project key text into the ordering domain
    fn project(&self, key: &str) -> Self::Projection;

    /// Identity recorded in the memory-index header
    fn name(&self) -> &str;

    /// Settings string recorded next to the identity
    fn settings(&self) -> String;
}

/// Parser that indexes each line under the whole line
#[derive(Debug, Clone, Default)]
pub struct WholeLineParser;

impl LineParser for WholeLineParser {
    fn parse(&self, line: &str) -> Vec<String> {
        vec![line.to_string()]
    }
}

/// Parser that indexes one delimited column
#[derive(Debug, Clone)]
pub struct DelimitedParser {
    delimiter: String,
    column: usize,
}

impl DelimitedParser {
    /// Create a parser extracting `column` (0-based) from `delimiter`-split lines
    pub fn new(delimiter: impl Into<String>, column: usize) -> Self {
        Self {
            delimiter: delimiter.into(),
            column,
        }
    }
}

impl LineParser for DelimitedParser {
    fn parse(&self, line: &str) -> Vec<String> {
        line.split(self.delimiter.as_str())
            .nth(self.column)
            .map(|col| vec![col.to_string()])
            .unwrap_or_default()
    }
}

/// Parser that indexes every delimited column as its own key
#[derive(Debug, Clone)]
pub struct SplitParser {
    delimiter: String,
}

impl SplitParser {
    /// Create a parser producing one key per `delimiter`-split column
    pub fn new(delimiter: impl Into<String>) -> Self {
        Self {
            delimiter: delimiter.into(),
        }
    }
}

impl LineParser for SplitParser {
    fn parse(&self, line: &str) -> Vec<String> {
        if line.is_empty() {
            return Vec::new();
        }
        line.split(self.delimiter.as_str())
            .map(str::to_string)
            .collect()
    }
}

/// Sort key comparing key text byte-wise
#[derive(Debug, Clone, Default)]
pub struct LexicographicKey;

impl SortKey for LexicographicKey {
    type Projection = String;

    fn project(&self, key: &str) -> String {
        key.to_string()
    }

    fn name(&self) -> &str {
        "lexicographic"
    }

    fn settings(&self) -> String {
        String::new()
    }
}

/// Sort key ordering numeric key text by value
///
/// Keys that parse as numbers sort numerically and precede keys that do not;
/// non-numeric keys fall back to byte order among themselves. The projection
/// is total, so mixed databases still sort deterministically.
#[derive(Debug, Clone, Default)]
pub struct NumericKey;

impl SortKey for NumericKey {
    type Projection = NumericProjection;

    fn project(&self, key: &str) -> NumericProjection {
        match key.trim().parse::<f64>() {
            Ok(value) if value.is_finite() => NumericProjection::Number(OrderedF64::new(value)),
            _ => NumericProjection::Text(key.to_string()),
        }
    }

    fn name(&self) -> &str {
        "numeric"
    }

    fn settings(&self) -> String {
        String::new()
    }
}

/// Projection produced by [`NumericKey`]
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
pub enum NumericProjection {
    /// Key parsed as a finite number
    Number(OrderedF64),
    /// Key kept as text, ordered after all numbers
    Text(String),
}

/// Totally ordered f64 via monotone bit mapping
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct OrderedF64(u64);

impl OrderedF64 {
    /// Map a float to bits whose unsigned order matches numeric order
    pub fn new(value: f64) -> Self {
        let bits = value.to_bits();
        // Flip all bits for negatives, only the sign bit for positives
        let key = if bits >> 63 == 1 { !bits } else { bits | (1 << 63) };
        Self(key)
    }
}

/// Sort key projecting selected columns of delimited key text
#[derive(Debug, Clone)]
pub struct ColumnsKey {
    cols_delimiter: String,
    col_inds: Vec<usize>,
}

impl ColumnsKey {
    /// Create a sort key ordering by `col_inds` columns of `cols_delimiter`-split keys
    pub fn new(cols_delimiter: impl Into<String>, col_inds: Vec<usize>) -> Self {
        Self {
            cols_delimiter: cols_delimiter.into(),
            col_inds,
        }
    }
}

impl SortKey for ColumnsKey {
    type Projection = Vec<String>;

    fn project(&self, key: &str) -> Vec<String> {
        let cols: Vec<&str> = key.split(self.cols_delimiter.as_str()).collect();
        self.col_inds
            .iter()
            .map(|&i| cols.get(i).copied().unwrap_or("").to_string())
            .collect()
    }

    fn name(&self) -> &str {
        "columns"
    }

    fn settings(&self) -> String {
        format!(
            "cols_delimiter={},col_inds={:?}",
            self.cols_delimiter, self.col_inds
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn whole_line_parser_returns_line() {
        assert_eq!(WholeLineParser.parse("a,1"), vec!["a,1".to_string()]);
    }

    #[test]
    fn delimited_parser_extracts_column() {
        let parser = DelimitedParser::new(",", 1);
        assert_eq!(parser.parse("a,b,c"), vec!["b".to_string()]);
    }

    #[test]
    fn delimited_parser_missing_column_skips() {
        let parser = DelimitedParser::new(";", 3);
        assert!(parser.parse("x;y").is_empty());
    }

    #[test]
    fn split_parser_emits_every_column() {
        let parser = SplitParser::new(";");
        assert_eq!(parser.parse("1;2;3"), vec!["1", "2", "3"]);
        assert!(parser.parse("").is_empty());
    }

    #[test]
    fn numeric_key_orders_by_value() {
        let key = NumericKey;
        assert!(key.project("2") < key.project("10"));
        assert!(key.project("-1.5") < key.project("0"));
        // Text sorts after every number
        assert!(key.project("999999") < key.project("abc"));
    }

    #[test]
    fn columns_key_projects_selected_columns() {
        let key = ColumnsKey::new("\t", vec![1, 0]);
        assert_eq!(key.project("a\tb\tc"), vec!["b", "a"]);
        assert_eq!(key.project("solo"), vec!["", "solo"]);
    }

    #[test]
    fn lexicographic_key_is_identity() {
        assert_eq!(LexicographicKey.project("k"), "k");
        assert!(LexicographicKey.settings().is_empty());
    }
}
