// Keyed reconciliation of two record sets.
// Pure functions: two record sets in, one change table out.
// No IO, no formatting.

use std::collections::{BTreeMap, BTreeSet, HashMap};

use log::debug;
use serde::Serialize;

use crate::error::ReconError;
use crate::model::{Record, RecordKey, RecordSet, Schema, Value};

// ---------------------------------------------------------------------------
// Options
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Default)]
pub struct DiffOptions {
    /// Fields that never decide whether a row changed.
    pub ignore_fields: BTreeSet<String>,
    /// Fields shown on every changed row, changed or not.
    pub always_show: Vec<String>,
}

impl DiffOptions {
    pub fn ignore<I, S>(mut self, fields: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.ignore_fields.extend(fields.into_iter().map(Into::into));
        self
    }

    pub fn show<I, S>(mut self, fields: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        for f in fields {
            let f = f.into();
            if !self.always_show.contains(&f) {
                self.always_show.push(f);
            }
        }
        self
    }
}

// ---------------------------------------------------------------------------
// Removed-row filtering
// ---------------------------------------------------------------------------

/// Decides which disappeared rows are worth reporting.
///
/// Receives exactly the removed candidates and returns a mask by key. Keys
/// missing from the mask are treated as `false`.
pub trait RemovedFilter {
    fn mask(&self, removed: &RecordSet) -> HashMap<RecordKey, bool>;
}

impl<F> RemovedFilter for F
where
    F: Fn(&RecordSet) -> HashMap<RecordKey, bool>,
{
    fn mask(&self, removed: &RecordSet) -> HashMap<RecordKey, bool> {
        self(removed)
    }
}

/// Keeps rows whose `field` is one of `any_of`, compared case-insensitively
/// after trimming.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldMatches {
    pub field: String,
    pub any_of: Vec<String>,
}

impl FieldMatches {
    pub fn new<S: Into<String>>(field: impl Into<String>, any_of: impl IntoIterator<Item = S>) -> Self {
        Self {
            field: field.into(),
            any_of: any_of.into_iter().map(Into::into).collect(),
        }
    }

    pub fn matches(&self, schema: &Schema, record: &Record) -> bool {
        let Some(value) = schema.index_of(&self.field).and_then(|i| record.get(i)) else {
            return false;
        };
        if value.is_null() {
            return false;
        }
        let text = value.to_string().trim().to_lowercase();
        self.any_of.iter().any(|v| v.trim().to_lowercase() == text)
    }
}

impl RemovedFilter for FieldMatches {
    fn mask(&self, removed: &RecordSet) -> HashMap<RecordKey, bool> {
        removed
            .iter()
            .map(|(k, r)| (k.clone(), self.matches(removed.schema(), r)))
            .collect()
    }
}

// ---------------------------------------------------------------------------
// Results
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ChangeType {
    Added,
    Removed,
    Changed,
}

impl ChangeType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ChangeType::Added => "added",
            ChangeType::Removed => "removed",
            ChangeType::Changed => "changed",
        }
    }
}

impl std::fmt::Display for ChangeType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One retained field of one output row.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CellChange {
    pub field: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub old: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub new: Option<Value>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ChangeRow {
    pub change_type: ChangeType,
    pub key: RecordKey,
    pub cells: Vec<CellChange>,
}

impl ChangeRow {
    pub fn cell(&self, field: &str) -> Option<&CellChange> {
        self.cells.iter().find(|c| c.field == field)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ColumnLayout {
    /// Flattened to an old and a new column.
    Paired,
    /// Flattened to one column holding whichever side is present.
    Single,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ChangeColumn {
    pub field: String,
    pub layout: ColumnLayout,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct DiffSummary {
    pub old_rows: usize,
    pub new_rows: usize,
    pub added: usize,
    pub removed: usize,
    pub removed_filtered_out: usize,
    pub changed: usize,
    pub unchanged: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ChangeSet {
    pub key_columns: Vec<String>,
    pub columns: Vec<ChangeColumn>,
    pub rows: Vec<ChangeRow>,
    pub summary: DiffSummary,
}

impl ChangeSet {
    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn rows_of(&self, change_type: ChangeType) -> impl Iterator<Item = &ChangeRow> {
        self.rows.iter().filter(move |r| r.change_type == change_type)
    }

    pub fn added(&self) -> impl Iterator<Item = &ChangeRow> {
        self.rows_of(ChangeType::Added)
    }

    pub fn removed(&self) -> impl Iterator<Item = &ChangeRow> {
        self.rows_of(ChangeType::Removed)
    }

    pub fn changed(&self) -> impl Iterator<Item = &ChangeRow> {
        self.rows_of(ChangeType::Changed)
    }

    pub fn column(&self, field: &str) -> Option<&ChangeColumn> {
        self.columns.iter().find(|c| c.field == field)
    }
}

// ---------------------------------------------------------------------------
// Key classification
// ---------------------------------------------------------------------------

/// Outer join on key: only in new is `Added`, only in old is `Removed`,
/// in both is `Changed`.
pub fn index_changes<'a, O, N>(old_keys: O, new_keys: N) -> BTreeMap<RecordKey, ChangeType>
where
    O: IntoIterator<Item = &'a RecordKey>,
    N: IntoIterator<Item = &'a RecordKey>,
{
    let mut changes: BTreeMap<RecordKey, ChangeType> = old_keys
        .into_iter()
        .map(|k| (k.clone(), ChangeType::Removed))
        .collect();
    for k in new_keys {
        changes
            .entry(k.clone())
            .and_modify(|t| *t = ChangeType::Changed)
            .or_insert(ChangeType::Added);
    }
    changes
}

// ---------------------------------------------------------------------------
// Core diff
// ---------------------------------------------------------------------------

pub fn diff(
    old: &RecordSet,
    new: &RecordSet,
    options: &DiffOptions,
    removed_filter: Option<&dyn RemovedFilter>,
) -> Result<ChangeSet, ReconError> {
    // 1. Validate before producing anything
    if !old.key_spec().same_key(new.key_spec()) {
        return Err(ReconError::KeyMismatch {
            old: old.key_spec().to_string(),
            new: new.key_spec().to_string(),
        });
    }
    let key_spec = new.key_spec();

    for field in &options.always_show {
        if !old.schema().contains(field) && !new.schema().contains(field) {
            return Err(ReconError::UnknownField(field.clone()));
        }
    }

    let ignored = &options.ignore_fields;
    let considered = |set: &RecordSet| -> BTreeSet<String> {
        set.schema()
            .names()
            .filter(|n| !ignored.contains(*n))
            .map(str::to_string)
            .collect()
    };
    let old_considered = considered(old);
    let new_considered = considered(new);
    if old_considered != new_considered {
        return Err(ReconError::SchemaMismatch {
            only_old: old_considered.difference(&new_considered).cloned().collect(),
            only_new: new_considered.difference(&old_considered).cloned().collect(),
        });
    }

    // 2. Output field order: new schema, then old-only fields. Key fields
    // travel in the key.
    let carried: BTreeSet<&str> = key_spec.carried_fields().iter().map(String::as_str).collect();
    let mut field_order: Vec<String> = new
        .schema()
        .names()
        .filter(|n| !carried.contains(n))
        .map(str::to_string)
        .collect();
    for name in old.schema().names() {
        if !carried.contains(name) && !new.schema().contains(name) {
            field_order.push(name.to_string());
        }
    }

    let compared: Vec<(usize, usize)> = field_order
        .iter()
        .filter(|f| new_considered.contains(*f))
        .filter_map(|f| Some((old.schema().index_of(f)?, new.schema().index_of(f)?)))
        .collect();
    let shown: BTreeSet<&str> = options
        .always_show
        .iter()
        .map(String::as_str)
        .filter(|f| !carried.contains(f))
        .collect();

    // 3. Classify keys
    let changes = index_changes(old.keys(), new.keys());
    let keys_of = |wanted: ChangeType| -> Vec<&RecordKey> {
        changes
            .iter()
            .filter(|(_, t)| **t == wanted)
            .map(|(k, _)| k)
            .collect()
    };

    // 4. Removed rows, optionally narrowed by the caller
    let removed_candidates = keys_of(ChangeType::Removed);
    let candidate_count = removed_candidates.len();
    let removed_keys: Vec<&RecordKey> = match removed_filter {
        Some(filter) => {
            let subset = old.subset(removed_candidates.iter().copied());
            let mask = filter.mask(&subset);
            removed_candidates
                .into_iter()
                .filter(|k| mask.get(*k).copied().unwrap_or(false))
                .collect()
        }
        None => removed_candidates,
    };

    let mut rows: Vec<ChangeRow> = Vec::new();
    let mut summary = DiffSummary {
        old_rows: old.len(),
        new_rows: new.len(),
        removed: removed_keys.len(),
        removed_filtered_out: candidate_count - removed_keys.len(),
        ..DiffSummary::default()
    };

    // 5. Changed rows: differing fields plus always-show context
    for key in keys_of(ChangeType::Changed) {
        let (Some(o), Some(n)) = (old.get(key), new.get(key)) else {
            continue;
        };
        let differing: BTreeSet<usize> = compared
            .iter()
            .filter(|(oi, ni)| !o.values()[*oi].same_as(&n.values()[*ni]))
            .map(|(_, ni)| *ni)
            .collect();
        if differing.is_empty() {
            summary.unchanged += 1;
            continue;
        }

        let cells: Vec<CellChange> = field_order
            .iter()
            .filter(|f| {
                shown.contains(f.as_str())
                    || new.schema().index_of(f).is_some_and(|ni| differing.contains(&ni))
            })
            .map(|f| CellChange {
                field: f.clone(),
                old: value_of(old, o, f),
                new: value_of(new, n, f),
            })
            .filter(|c| c.old.is_some() || c.new.is_some())
            .collect();

        summary.changed += 1;
        rows.push(ChangeRow {
            change_type: ChangeType::Changed,
            key: key.clone(),
            cells,
        });
    }

    let paired: BTreeSet<String> = rows
        .iter()
        .flat_map(|r| r.cells.iter().map(|c| c.field.clone()))
        .collect();

    // 6. Added rows (new side only), then removed rows (old side only)
    for key in keys_of(ChangeType::Added) {
        if let Some(n) = new.get(key) {
            rows.push(one_sided_row(ChangeType::Added, key, new, n, &field_order));
            summary.added += 1;
        }
    }
    for key in removed_keys {
        if let Some(o) = old.get(key) {
            rows.push(one_sided_row(ChangeType::Removed, key, old, o, &field_order));
        }
    }

    // 7. Columns that hold at least one value anywhere
    let populated: BTreeSet<&str> = rows
        .iter()
        .flat_map(|r| r.cells.iter().map(|c| c.field.as_str()))
        .collect();
    let columns: Vec<ChangeColumn> = field_order
        .iter()
        .filter(|f| populated.contains(f.as_str()))
        .map(|f| ChangeColumn {
            field: f.clone(),
            layout: if paired.contains(f) {
                ColumnLayout::Paired
            } else {
                ColumnLayout::Single
            },
        })
        .collect();

    debug!(
        "diff: {} keys classified; {} changed, {} unchanged, {} added, {} removed ({} filtered out)",
        changes.len(),
        summary.changed,
        summary.unchanged,
        summary.added,
        summary.removed,
        summary.removed_filtered_out
    );

    Ok(ChangeSet {
        key_columns: key_spec.columns(),
        columns,
        rows,
        summary,
    })
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

fn value_of(set: &RecordSet, record: &Record, field: &str) -> Option<Value> {
    set.value(record, field).and_then(Value::non_null)
}

fn one_sided_row(
    change_type: ChangeType,
    key: &RecordKey,
    set: &RecordSet,
    record: &Record,
    field_order: &[String],
) -> ChangeRow {
    let cells = field_order
        .iter()
        .filter_map(|f| {
            let value = value_of(set, record, f)?;
            let (old, new) = match change_type {
                ChangeType::Removed => (Some(value), None),
                _ => (None, Some(value)),
            };
            Some(CellChange { field: f.clone(), old, new })
        })
        .collect();
    ChangeRow {
        change_type,
        key: key.clone(),
        cells,
    }
}
