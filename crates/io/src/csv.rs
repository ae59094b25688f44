// CSV/TSV ingestion into typed tables and keyed record sets

use std::collections::{HashMap, HashSet};
use std::io::Read;
use std::path::Path;

use deltagrid_recon::{FieldDescriptor, FieldKind, FieldMatches, KeySpec, Record, RecordSet, Schema, Value};
use log::{debug, warn};

use crate::dedup::merge_duplicate_keys;
use crate::error::IngestError;

// ---------------------------------------------------------------------------
// Options
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Default)]
pub struct ReadOptions {
    /// Sniffed from the first lines when unset.
    pub delimiter: Option<u8>,
    /// Per-column kinds; every other column is text.
    pub kinds: HashMap<String, FieldKind>,
    /// Lower-case every text value.
    pub lowercase: bool,
    /// Keep only rows matching this predicate.
    pub filter: Option<FieldMatches>,
}

impl ReadOptions {
    pub fn kind(mut self, column: impl Into<String>, kind: FieldKind) -> Self {
        self.kinds.insert(column.into(), kind);
        self
    }

    pub fn lowercase(mut self, on: bool) -> Self {
        self.lowercase = on;
        self
    }

    pub fn filter(mut self, filter: Option<FieldMatches>) -> Self {
        self.filter = filter;
        self
    }
}

// ---------------------------------------------------------------------------
// Table
// ---------------------------------------------------------------------------

/// A parsed file: typed header plus rows, not yet keyed.
#[derive(Debug, Clone, PartialEq)]
pub struct Table {
    pub schema: Schema,
    pub records: Vec<Record>,
}

impl Table {
    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Index of `column`, or `MissingColumn`.
    pub fn column(&self, column: &str) -> Result<usize, IngestError> {
        self.schema
            .index_of(column)
            .ok_or_else(|| IngestError::MissingColumn(column.to_string()))
    }

    /// Key the rows. With `merge_duplicates`, rows sharing a key are folded
    /// together first instead of failing on the duplicate.
    pub fn into_record_set(self, key: KeySpec, merge_duplicates: bool) -> Result<RecordSet, IngestError> {
        let records = if merge_duplicates {
            merge_duplicate_keys(&self.schema, &key, self.records)?
        } else {
            self.records
        };
        Ok(RecordSet::new(self.schema, key, records)?)
    }
}

// ---------------------------------------------------------------------------
// Reading
// ---------------------------------------------------------------------------

pub fn read_table(path: &Path, options: &ReadOptions) -> Result<Table, IngestError> {
    let content = read_file_as_utf8(path)?;
    parse_table(&content, options)
}

/// Read and key a file in one step.
pub fn read_records(
    path: &Path,
    options: &ReadOptions,
    key: KeySpec,
    merge_duplicates: bool,
) -> Result<RecordSet, IngestError> {
    let table = read_table(path, options)?;
    debug!("{}: {} rows, {} columns", path.display(), table.len(), table.schema.len());
    table.into_record_set(key, merge_duplicates)
}

/// Read file and convert to UTF-8 if needed (handles Windows-1252, Latin-1, etc.)
pub fn read_file_as_utf8(path: &Path) -> Result<String, IngestError> {
    let mut file = std::fs::File::open(path)?;
    let mut bytes = Vec::new();
    file.read_to_end(&mut bytes)?;

    match String::from_utf8(bytes) {
        Ok(s) => Ok(s.strip_prefix('\u{feff}').map(str::to_string).unwrap_or(s)),
        Err(e) => {
            // Excel-exported CSVs are commonly Windows-1252
            warn!("{}: not valid UTF-8, decoding as Windows-1252", path.display());
            let bytes = e.into_bytes();
            let (decoded, _, _) = encoding_rs::WINDOWS_1252.decode(&bytes);
            Ok(decoded.into_owned())
        }
    }
}

/// Detect the most likely field delimiter by checking consistency across the first few lines.
///
/// For each candidate (tab, semicolon, comma, pipe), count fields per line. The delimiter
/// that produces the most consistent field count (>1 field) wins.
pub fn sniff_delimiter(content: &str) -> u8 {
    let candidates: &[u8] = &[b'\t', b';', b',', b'|'];
    let sample_lines: Vec<&str> = content.lines().take(10).collect();

    if sample_lines.is_empty() {
        return b',';
    }

    let mut best = b',';
    let mut best_score = 0u64;

    for &delim in candidates {
        let counts: Vec<usize> = sample_lines
            .iter()
            .map(|line| {
                ::csv::ReaderBuilder::new()
                    .delimiter(delim)
                    .has_headers(false)
                    .flexible(true)
                    .from_reader(line.as_bytes())
                    .records()
                    .next()
                    .and_then(|r| r.ok())
                    .map(|r| r.len())
                    .unwrap_or(1)
            })
            .collect();

        if counts.first().copied().unwrap_or(0) <= 1 {
            continue;
        }

        // Lines agreeing with line 1, weighted by its field count
        let target = counts[0];
        let consistent = counts.iter().filter(|&&c| c == target).count() as u64;
        let score = consistent * target as u64;

        if score > best_score {
            best_score = score;
            best = delim;
        }
    }

    best
}

pub fn parse_table(content: &str, options: &ReadOptions) -> Result<Table, IngestError> {
    let delimiter = options.delimiter.unwrap_or_else(|| sniff_delimiter(content));
    let mut reader = ::csv::ReaderBuilder::new()
        .delimiter(delimiter)
        .has_headers(true)
        .flexible(true)
        .from_reader(content.as_bytes());

    let headers: Vec<String> = reader.headers()?.iter().map(|h| h.trim().to_string()).collect();
    let mut seen = HashSet::new();
    for h in &headers {
        if !seen.insert(h.as_str()) {
            return Err(IngestError::DuplicateColumn(h.clone()));
        }
    }
    for column in options.kinds.keys() {
        if !seen.contains(column.as_str()) {
            return Err(IngestError::MissingColumn(column.clone()));
        }
    }

    let schema = Schema::new(
        headers
            .iter()
            .map(|h| {
                let kind = options.kinds.get(h).copied().unwrap_or_default();
                FieldDescriptor::new(h.clone(), kind)
            })
            .collect(),
    );
    if let Some(filter) = &options.filter {
        if !schema.contains(&filter.field) {
            return Err(IngestError::MissingColumn(filter.field.clone()));
        }
    }

    let mut records = Vec::new();
    let mut dropped = 0usize;
    for (idx, result) in reader.records().enumerate() {
        let row = idx + 1;
        let raw = result?;
        if raw.len() > headers.len() {
            return Err(IngestError::RaggedRow { row, expected: headers.len(), found: raw.len() });
        }
        if raw.iter().all(|cell| cell.trim().is_empty()) {
            continue;
        }

        let mut values = Vec::with_capacity(headers.len());
        for (field, desc) in schema.fields().iter().enumerate() {
            let cell = raw.get(field).unwrap_or("");
            values.push(parse_cell(cell, desc, row, options.lowercase)?);
        }
        let record = Record::new(values);

        if let Some(filter) = &options.filter {
            if !filter.matches(&schema, &record) {
                dropped += 1;
                continue;
            }
        }
        records.push(record);
    }
    if dropped > 0 {
        debug!("row filter on '{}' dropped {} rows", options.filter.as_ref().map_or("", |f| f.field.as_str()), dropped);
    }

    Ok(Table { schema, records })
}

/// Empty cells are `Null`; numbers must parse fully.
fn parse_cell(cell: &str, desc: &FieldDescriptor, row: usize, lowercase: bool) -> Result<Value, IngestError> {
    if cell.trim().is_empty() {
        return Ok(Value::Null);
    }
    let parse_error = || IngestError::Parse {
        row,
        field: desc.name.clone(),
        value: cell.to_string(),
    };
    match desc.kind {
        FieldKind::Text => {
            if lowercase {
                Ok(Value::Text(cell.to_lowercase()))
            } else {
                Ok(Value::Text(cell.to_string()))
            }
        }
        FieldKind::Integer => cell.trim().parse::<i64>().map(Value::Int).map_err(|_| parse_error()),
        FieldKind::Float => cell.trim().parse::<f64>().map(Value::Float).map_err(|_| parse_error()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::tempdir;

    #[test]
    fn sniffs_common_delimiters() {
        assert_eq!(sniff_delimiter("a,b,c\n1,2,3\n"), b',');
        assert_eq!(sniff_delimiter("a\tb\tc\n1\t2\t3\n"), b'\t');
        assert_eq!(sniff_delimiter("a;b\n1;2\n"), b';');
        assert_eq!(sniff_delimiter("single\nvalue\n"), b',');
    }

    #[test]
    fn empty_cells_are_null_and_kinds_apply() {
        let opts = ReadOptions::default().kind("id", FieldKind::Integer).kind("amt", FieldKind::Float);
        let table = parse_table("id,name,amt\n1,Ann,2.5\n2,,\n", &opts).unwrap();
        assert_eq!(table.len(), 2);
        assert_eq!(table.records[0].values(), &[Value::Int(1), Value::from("Ann"), Value::Float(2.5)]);
        assert_eq!(table.records[1].values(), &[Value::Int(2), Value::Null, Value::Null]);
    }

    #[test]
    fn short_rows_are_padded_with_null() {
        let table = parse_table("a,b,c\nx\n", &ReadOptions::default()).unwrap();
        assert_eq!(table.records[0].values(), &[Value::from("x"), Value::Null, Value::Null]);
    }

    #[test]
    fn long_rows_rejected() {
        let err = parse_table("a,b\n1,2,3\n", &ReadOptions::default()).unwrap_err();
        assert!(matches!(err, IngestError::RaggedRow { row: 1, expected: 2, found: 3 }));
    }

    #[test]
    fn bad_number_names_row_and_field() {
        let opts = ReadOptions::default().kind("id", FieldKind::Integer);
        let err = parse_table("id\n1\nabc\n", &opts).unwrap_err();
        match err {
            IngestError::Parse { row, field, value } => {
                assert_eq!(row, 2);
                assert_eq!(field, "id");
                assert_eq!(value, "abc");
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn lowercase_only_touches_text() {
        let opts = ReadOptions::default().kind("n", FieldKind::Integer).lowercase(true);
        let table = parse_table("s,n\nMiXeD,7\n", &opts).unwrap();
        assert_eq!(table.records[0].values(), &[Value::from("mixed"), Value::Int(7)]);
    }

    #[test]
    fn filter_drops_rows_before_keying() {
        let opts = ReadOptions::default().filter(Some(FieldMatches::new("kind", ["condo", "co-op"])));
        let table = parse_table("id,kind\n1,Condo\n1,rental\n2,CO-OP\n", &opts).unwrap();
        assert_eq!(table.len(), 2);
        // The rental row would have duplicated key 1.
        let set = table.into_record_set(KeySpec::Field("id".into()), false).unwrap();
        assert_eq!(set.len(), 2);
    }

    #[test]
    fn unknown_kind_column_rejected() {
        let opts = ReadOptions::default().kind("missing", FieldKind::Integer);
        let err = parse_table("a\n1\n", &opts).unwrap_err();
        assert!(matches!(err, IngestError::MissingColumn(ref c) if c == "missing"));
    }

    #[test]
    fn duplicate_header_rejected() {
        let err = parse_table("a,a\n1,2\n", &ReadOptions::default()).unwrap_err();
        assert!(matches!(err, IngestError::DuplicateColumn(_)));
    }

    #[test]
    fn windows_1252_fallback() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("latin.csv");
        // "Café" with 0xE9 for é
        fs::write(&path, b"name\nCaf\xe9\n").unwrap();
        let table = read_table(&path, &ReadOptions::default()).unwrap();
        assert_eq!(table.records[0].values(), &[Value::from("Café")]);
    }

    #[test]
    fn utf8_bom_stripped() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("bom.csv");
        fs::write(&path, "\u{feff}id,v\n1,x\n").unwrap();
        let set = read_records(&path, &ReadOptions::default(), KeySpec::Field("id".into()), false).unwrap();
        assert_eq!(set.schema().names().collect::<Vec<_>>(), vec!["id", "v"]);
    }
}
