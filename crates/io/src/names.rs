// Name/count tables: the input of fuzzy clustering

use std::collections::{HashMap, HashSet};

use deltagrid_recon::{FieldMatches, NameEntry, Value};
use log::debug;
use serde::Serialize;

use crate::csv::Table;
use crate::error::IngestError;

pub const COUNT_HEADER: &str = "Count";

/// Names with their counts and summed extra columns, most frequent first.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct NameTable {
    pub name_header: String,
    pub count_header: String,
    pub extra_headers: Vec<String>,
    pub entries: Vec<NameEntry>,
}

impl NameTable {
    /// Take an already-counted table as is: first column name, second count,
    /// remaining columns extras. Row order is kept.
    pub fn from_counts(table: &Table) -> Result<Self, IngestError> {
        let names: Vec<&str> = table.schema.names().collect();
        let [name_header, count_header, extra_headers @ ..] = names.as_slice() else {
            return Err(IngestError::MissingColumn("count (second column)".into()));
        };

        let mut entries = Vec::with_capacity(table.len());
        for (idx, record) in table.records.iter().enumerate() {
            let values = record.values();
            let name = values.first().map(Value::to_string).unwrap_or_default();
            let count = number(values.get(1), idx + 1, count_header)?;
            let extra = extra_headers
                .iter()
                .enumerate()
                .map(|(i, header)| number(values.get(i + 2), idx + 1, header))
                .collect::<Result<Vec<_>, _>>()?;
            entries.push(NameEntry::new(name, count).with_extra(extra));
        }

        Ok(Self {
            name_header: name_header.to_string(),
            count_header: count_header.to_string(),
            extra_headers: extra_headers.iter().map(|h| h.to_string()).collect(),
            entries,
        })
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

// ---------------------------------------------------------------------------
// Builder
// ---------------------------------------------------------------------------

/// Where summed extra columns come from.
#[derive(Debug, Clone)]
pub enum ExtraSource<'a> {
    /// Columns of the counted rows themselves.
    Same(Vec<String>),
    /// Columns of another table, joined to counted rows on `link`.
    Joined { table: &'a Table, link: String, fields: Vec<String> },
}

impl ExtraSource<'_> {
    fn fields(&self) -> &[String] {
        match self {
            Self::Same(fields) | Self::Joined { fields, .. } => fields,
        }
    }
}

/// Counts rows per name in a raw table.
#[derive(Debug, Clone)]
pub struct NameTableBuilder<'a> {
    name_field: String,
    distinct_by: Option<String>,
    filter: Option<FieldMatches>,
    exclude: Vec<String>,
    extras: Option<ExtraSource<'a>>,
}

impl<'a> NameTableBuilder<'a> {
    pub fn new(name_field: impl Into<String>) -> Self {
        Self {
            name_field: name_field.into(),
            distinct_by: None,
            filter: None,
            exclude: Vec::new(),
            extras: None,
        }
    }

    /// Count each (`field`, name) pair once.
    pub fn distinct_by(mut self, field: impl Into<String>) -> Self {
        self.distinct_by = Some(field.into());
        self
    }

    pub fn filter(mut self, filter: Option<FieldMatches>) -> Self {
        self.filter = filter;
        self
    }

    /// Drop names containing any of these, case-insensitively.
    pub fn exclude<S: Into<String>>(mut self, keywords: impl IntoIterator<Item = S>) -> Self {
        self.exclude = keywords
            .into_iter()
            .map(|k| k.into().to_lowercase())
            .filter(|k| !k.is_empty())
            .collect();
        self
    }

    pub fn extras(mut self, source: ExtraSource<'a>) -> Self {
        self.extras = Some(source);
        self
    }

    pub fn build(&self, table: &Table) -> Result<NameTable, IngestError> {
        let name_idx = table.column(&self.name_field)?;
        let distinct_idx = self.distinct_by.as_deref().map(|f| table.column(f)).transpose()?;
        if let Some(filter) = &self.filter {
            table.column(&filter.field)?;
        }

        // Counted rows, grouped by name in first-seen order
        let mut names: Vec<String> = Vec::new();
        let mut slots: HashMap<String, usize> = HashMap::new();
        let mut counted: Vec<(usize, usize)> = Vec::new();
        let mut pairs: HashSet<(String, String)> = HashSet::new();
        let mut excluded = 0usize;

        for (row, record) in table.records.iter().enumerate() {
            let Some(name) = record.get(name_idx).filter(|v| !v.is_null()).map(Value::to_string) else {
                continue;
            };
            if let Some(filter) = &self.filter {
                if !filter.matches(&table.schema, record) {
                    continue;
                }
            }
            let lowered = name.to_lowercase();
            if self.exclude.iter().any(|k| lowered.contains(k.as_str())) {
                excluded += 1;
                continue;
            }
            if let Some(di) = distinct_idx {
                let by = record.get(di).map(Value::to_string).unwrap_or_default();
                if !pairs.insert((by, name.clone())) {
                    continue;
                }
            }
            let slot = match slots.get(&name) {
                Some(&slot) => slot,
                None => {
                    slots.insert(name.clone(), names.len());
                    names.push(name);
                    names.len() - 1
                }
            };
            counted.push((slot, row));
        }

        let mut counts = vec![0.0; names.len()];
        for &(slot, _) in &counted {
            counts[slot] += 1.0;
        }
        let extra_headers: Vec<String> = self.extras.as_ref().map(|e| e.fields().to_vec()).unwrap_or_default();
        let sums = match &self.extras {
            None => vec![Vec::new(); names.len()],
            Some(source) => sum_extras(table, source, &counted, names.len())?,
        };

        let mut entries: Vec<NameEntry> = names
            .into_iter()
            .zip(counts)
            .zip(sums)
            .map(|((name, count), extra)| NameEntry::new(name, count).with_extra(extra))
            .collect();
        // Most frequent first: that spelling then anchors its group.
        entries.sort_by(|a, b| b.count.total_cmp(&a.count));

        debug!(
            "name table on '{}': {} rows counted, {} excluded by keyword, {} distinct names",
            self.name_field,
            counted.len(),
            excluded,
            entries.len()
        );

        Ok(NameTable {
            name_header: self.name_field.clone(),
            count_header: COUNT_HEADER.to_string(),
            extra_headers,
            entries,
        })
    }
}

fn sum_extras(
    table: &Table,
    source: &ExtraSource<'_>,
    counted: &[(usize, usize)],
    slots: usize,
) -> Result<Vec<Vec<f64>>, IngestError> {
    let width = source.fields().len();
    let mut sums = vec![vec![0.0; width]; slots];

    match source {
        ExtraSource::Same(fields) => {
            let indices = fields.iter().map(|f| table.column(f)).collect::<Result<Vec<_>, _>>()?;
            for &(slot, row) in counted {
                let record = &table.records[row];
                for (i, (&col, field)) in indices.iter().zip(fields).enumerate() {
                    sums[slot][i] += number(record.get(col), row + 1, field)?;
                }
            }
        }
        ExtraSource::Joined { table: other, link, fields } => {
            let link_here = table.column(link)?;
            let link_there = other.column(link)?;
            let indices = fields.iter().map(|f| other.column(f)).collect::<Result<Vec<_>, _>>()?;

            // Pre-sum the joined side per link value
            let mut by_link: HashMap<String, Vec<f64>> = HashMap::new();
            for (row, record) in other.records.iter().enumerate() {
                let Some(link_value) = record.get(link_there).filter(|v| !v.is_null()) else {
                    continue;
                };
                let acc = by_link.entry(link_value.to_string()).or_insert_with(|| vec![0.0; width]);
                for (i, (&col, field)) in indices.iter().zip(fields).enumerate() {
                    acc[i] += number(record.get(col), row + 1, field)?;
                }
            }

            for &(slot, row) in counted {
                let Some(link_value) = table.records[row].get(link_here).filter(|v| !v.is_null()) else {
                    continue;
                };
                if let Some(acc) = by_link.get(&link_value.to_string()) {
                    for (sum, v) in sums[slot].iter_mut().zip(acc) {
                        *sum += v;
                    }
                }
            }
        }
    }
    Ok(sums)
}

/// Numeric reading of a cell; missing counts as zero.
fn number(value: Option<&Value>, row: usize, field: &str) -> Result<f64, IngestError> {
    match value {
        None | Some(Value::Null) => Ok(0.0),
        Some(Value::Int(i)) => Ok(*i as f64),
        Some(Value::Float(x)) => Ok(*x),
        Some(Value::Text(s)) => s.trim().parse::<f64>().map_err(|_| IngestError::Parse {
            row,
            field: field.to_string(),
            value: s.clone(),
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::csv::{parse_table, ReadOptions};

    fn table(content: &str) -> Table {
        parse_table(content, &ReadOptions::default()).unwrap()
    }

    fn counts(t: &NameTable) -> Vec<(String, f64)> {
        t.entries.iter().map(|e| (e.name.clone(), e.count)).collect()
    }

    const CONTACTS: &str = "\
RegistrationID,CorporationName,ContactDescription
1,Acme Corp,Condo
1,Acme Corp,Condo
2,Acme Corp,CO-OP
3,Ajax LLC,condo
4,Ajax LLC,Rental
5,,condo
6,Acme Corp,condo
6,Bank Trust,condo
";

    #[test]
    fn counts_rows_per_name_most_frequent_first() {
        let t = NameTableBuilder::new("CorporationName").build(&table(CONTACTS)).unwrap();
        assert_eq!(
            counts(&t),
            vec![("Acme Corp".into(), 4.0), ("Ajax LLC".into(), 2.0), ("Bank Trust".into(), 1.0)]
        );
        assert_eq!(t.count_header, "Count");
        assert!(t.extra_headers.is_empty());
    }

    #[test]
    fn distinct_filter_and_exclude() {
        let t = NameTableBuilder::new("CorporationName")
            .distinct_by("RegistrationID")
            .filter(Some(FieldMatches::new("ContactDescription", ["condo", "co-op"])))
            .exclude(["TRUST"])
            .build(&table(CONTACTS))
            .unwrap();
        assert_eq!(counts(&t), vec![("Acme Corp".into(), 3.0), ("Ajax LLC".into(), 1.0)]);
    }

    #[test]
    fn equal_counts_keep_first_appearance() {
        let t = NameTableBuilder::new("n").build(&table("n\nb\na\nc\n")).unwrap();
        let order: Vec<&str> = t.entries.iter().map(|e| e.name.as_str()).collect();
        assert_eq!(order, vec!["b", "a", "c"]);
    }

    #[test]
    fn joined_extras_are_summed_per_name() {
        let buildings = table("RegistrationID,Units,Floors\n1,10,2\n2,5,1\n3,7,3\n3,1,1\n");
        let t = NameTableBuilder::new("CorporationName")
            .distinct_by("RegistrationID")
            .extras(ExtraSource::Joined {
                table: &buildings,
                link: "RegistrationID".into(),
                fields: vec!["Units".into(), "Floors".into()],
            })
            .build(&table(CONTACTS))
            .unwrap();
        assert_eq!(t.extra_headers, vec!["Units".to_string(), "Floors".to_string()]);
        let acme = &t.entries[0];
        assert_eq!(acme.name, "Acme Corp");
        // Registrations 1, 2 and 6; 6 has no building row.
        assert_eq!(acme.extra, vec![15.0, 3.0]);
        let ajax = t.entries.iter().find(|e| e.name == "Ajax LLC").unwrap();
        assert_eq!(ajax.extra, vec![8.0, 4.0]);
    }

    #[test]
    fn same_table_extras() {
        let t = NameTableBuilder::new("n")
            .extras(ExtraSource::Same(vec!["v".into()]))
            .build(&table("n,v\na,1\na,2.5\nb,\n"))
            .unwrap();
        assert_eq!(t.entries[0].extra, vec![3.5]);
        assert_eq!(t.entries[1].extra, vec![0.0]);
    }

    #[test]
    fn non_numeric_extra_is_a_parse_error() {
        let err = NameTableBuilder::new("n")
            .extras(ExtraSource::Same(vec!["v".into()]))
            .build(&table("n,v\na,lots\n"))
            .unwrap_err();
        assert!(matches!(err, IngestError::Parse { row: 1, .. }));
    }

    #[test]
    fn from_counts_reads_name_count_extras() {
        let t = NameTable::from_counts(&table("Name,Total,Units\nAcme,3,10\n,1,\n")).unwrap();
        assert_eq!(t.name_header, "Name");
        assert_eq!(t.count_header, "Total");
        assert_eq!(t.extra_headers, vec!["Units".to_string()]);
        assert_eq!(t.entries[0], NameEntry::new("Acme", 3.0).with_extra(vec![10.0]));
        assert_eq!(t.entries[1], NameEntry::new("", 1.0).with_extra(vec![0.0]));
    }

    #[test]
    fn from_counts_needs_two_columns() {
        let err = NameTable::from_counts(&table("Name\nAcme\n")).unwrap_err();
        assert!(matches!(err, IngestError::MissingColumn(_)));
    }
}
