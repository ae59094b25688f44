// Enriching a flattened change table: new-parent tags, joined lookup
// columns and agreement flags

use std::collections::{HashMap, HashSet};

use deltagrid_recon::{ChangeType, RecordSet, Value};
use log::debug;

use crate::csv::Table;
use crate::error::IngestError;
use crate::export::{FlatTable, CHANGE_TYPE_HEADER};

/// `ChangeType` given to added rows whose parent is new too.
pub const NEW_PARENT_LABEL: &str = "new-parent";

/// Value written to a match-flag column when both sides agree.
pub const MATCH_YES: &str = "Y";

impl FlatTable {
    /// Column holding `field` on a row: the plain header if there is one,
    /// else `<field> (new)` when it has a value, else `<field> (old)`.
    fn field_columns(&self, field: &str) -> Option<(Option<usize>, Option<usize>)> {
        if let Some(i) = self.column(field) {
            return Some((Some(i), None));
        }
        let new = self.column(&format!("{field} (new)"));
        let old = self.column(&format!("{field} (old)"));
        (new.is_some() || old.is_some()).then_some((new, old))
    }

    /// Value of `field` on `row`, read the way [`FlatTable::field_columns`]
    /// picks the column. Null when the row has no value there.
    pub fn value(&self, row: usize, field: &str) -> Option<&Value> {
        let cells = self.rows.get(row)?;
        let (first, fallback) = self.field_columns(field)?;
        let pick = |i: Option<usize>| i.and_then(|i| cells.get(i)).filter(|v| !v.is_null());
        pick(first).or_else(|| pick(fallback))
    }

    pub fn has_field(&self, field: &str) -> bool {
        self.field_columns(field).is_some()
    }

    fn push_column(&mut self, header: String, cells: Vec<Value>) -> Result<(), IngestError> {
        if self.column(&header).is_some() {
            return Err(IngestError::DuplicateColumn(header));
        }
        self.header.push(header);
        for (row, cell) in self.rows.iter_mut().zip(cells) {
            row.push(cell);
        }
        Ok(())
    }
}

/// A table without rows may lack columns that were never populated.
fn require_field(table: &FlatTable, field: &str) -> Result<(), IngestError> {
    if table.rows.is_empty() || table.has_field(field) {
        Ok(())
    } else {
        Err(IngestError::MissingColumn(field.to_string()))
    }
}

fn lookup_text(value: &Value) -> String {
    value.to_string().trim().to_string()
}

/// Relabel `added` rows whose `field` value never occurs in `old`: the row is
/// new because its parent (the building, the account) is new. Returns how
/// many rows were relabelled.
pub fn tag_new_parents(
    table: &mut FlatTable,
    old: &RecordSet,
    field: &str,
    label: &str,
) -> Result<usize, IngestError> {
    let type_col = table
        .column(CHANGE_TYPE_HEADER)
        .ok_or_else(|| IngestError::MissingColumn(CHANGE_TYPE_HEADER.to_string()))?;
    let old_idx = old
        .schema()
        .index_of(field)
        .ok_or_else(|| IngestError::MissingColumn(field.to_string()))?;

    let known: HashSet<String> = old
        .records()
        .iter()
        .filter_map(|r| r.get(old_idx))
        .filter(|v| !v.is_null())
        .map(lookup_text)
        .collect();

    let added = Value::from(ChangeType::Added.as_str());
    let mut tagged = Vec::new();
    for row in 0..table.rows.len() {
        if table.rows[row].get(type_col) != Some(&added) {
            continue;
        }
        if let Some(parent) = table.value(row, field) {
            if !known.contains(&lookup_text(parent)) {
                tagged.push(row);
            }
        }
    }
    for &row in &tagged {
        table.rows[row][type_col] = Value::from(label);
    }
    debug!("{} added rows have a new '{}'", tagged.len(), field);
    Ok(tagged.len())
}

/// Left-join `columns` of `other` onto the table by `link`. An empty
/// `columns` takes every column of `other` but the link. The first `other`
/// row per link value wins; unmatched rows get nulls. Returns the number of
/// matched rows.
pub fn left_join(
    table: &mut FlatTable,
    other: &Table,
    link: &str,
    columns: &[String],
) -> Result<usize, IngestError> {
    require_field(table, link)?;
    let link_there = other.column(link)?;
    let columns: Vec<String> = if columns.is_empty() {
        other.schema.names().filter(|n| *n != link).map(str::to_string).collect()
    } else {
        columns.to_vec()
    };
    let indices = columns.iter().map(|c| other.column(c)).collect::<Result<Vec<_>, _>>()?;
    for c in &columns {
        if table.column(c).is_some() {
            return Err(IngestError::DuplicateColumn(c.clone()));
        }
    }

    let mut by_link = HashMap::new();
    for record in &other.records {
        if let Some(v) = record.get(link_there).filter(|v| !v.is_null()) {
            by_link.entry(lookup_text(v)).or_insert(record);
        }
    }

    let mut joined: Vec<Vec<Value>> = vec![Vec::with_capacity(table.rows.len()); columns.len()];
    let mut matched = 0usize;
    for row in 0..table.rows.len() {
        let hit = table.value(row, link).and_then(|v| by_link.get(&lookup_text(v)));
        if hit.is_some() {
            matched += 1;
        }
        for (out, &i) in joined.iter_mut().zip(&indices) {
            out.push(hit.and_then(|r| r.get(i)).cloned().unwrap_or(Value::Null));
        }
    }
    for (header, cells) in columns.into_iter().zip(joined) {
        table.push_column(header, cells)?;
    }
    debug!("join on '{}': {} of {} rows matched", link, matched, table.rows.len());
    Ok(matched)
}

/// Append `<right>Match`, set to `Y` on rows where `left` and `right` hold
/// the same text and null elsewhere. Returns the number of agreeing rows.
pub fn match_flag(table: &mut FlatTable, left: &str, right: &str) -> Result<usize, IngestError> {
    require_field(table, left)?;
    require_field(table, right)?;
    let cells: Vec<Value> = (0..table.rows.len())
        .map(|row| match (table.value(row, left), table.value(row, right)) {
            (Some(a), Some(b)) if lookup_text(a) == lookup_text(b) => Value::from(MATCH_YES),
            _ => Value::Null,
        })
        .collect();
    let agreeing = cells.iter().filter(|v| !v.is_null()).count();
    table.push_column(format!("{right}Match"), cells)?;
    Ok(agreeing)
}
