// Flattening engine output into tables and writing CSV / XLSX

use std::io::Write;
use std::path::Path;

use deltagrid_recon::diff::{ChangeColumn, ColumnLayout};
use deltagrid_recon::{ChangeSet, ChangeType, Clustering, Value};
use rust_xlsxwriter::{Format, Workbook, XlsxError};
use serde::{Deserialize, Serialize};

use crate::error::IngestError;
use crate::names::NameTable;

pub const CHANGE_TYPE_HEADER: &str = "ChangeType";
pub const SIMILARITY_HEADER: &str = "Similarity";
pub const FUZZY_PREFIX: &str = "Fuzzy";

/// A header row plus data rows, ready to be written.
#[derive(Debug, Clone, PartialEq, Default, Serialize)]
pub struct FlatTable {
    pub header: Vec<String>,
    pub rows: Vec<Vec<Value>>,
}

impl FlatTable {
    pub fn column(&self, name: &str) -> Option<usize> {
        self.header.iter().position(|h| h == name)
    }
}

/// Fields moved to the front or back of a change table, in the given order.
/// Fields not in the table are ignored.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct ColumnOrder {
    #[serde(default)]
    pub first: Vec<String>,
    #[serde(default)]
    pub last: Vec<String>,
}

impl ColumnOrder {
    fn apply<'a>(&self, columns: &'a [ChangeColumn]) -> Vec<&'a ChangeColumn> {
        let named = |name: &String| columns.iter().find(|c| &c.field == name);
        let pinned = |c: &&ChangeColumn| self.first.contains(&c.field) || self.last.contains(&c.field);

        let mut out: Vec<&ChangeColumn> = self.first.iter().filter_map(named).collect();
        out.extend(columns.iter().filter(|c| !pinned(c)));
        out.extend(self.last.iter().filter(|f| !self.first.contains(f)).filter_map(named));
        out
    }
}

// ---------------------------------------------------------------------------
// Change sets
// ---------------------------------------------------------------------------

/// `ChangeType`, key columns, then every field: paired fields as
/// `<field> (old)` / `<field> (new)`, one-sided fields as `<field>`.
pub fn change_table(changes: &ChangeSet, order: &ColumnOrder) -> FlatTable {
    let columns = order.apply(&changes.columns);

    let mut header = vec![CHANGE_TYPE_HEADER.to_string()];
    header.extend(changes.key_columns.iter().cloned());
    for c in &columns {
        match c.layout {
            ColumnLayout::Paired => {
                header.push(format!("{} (old)", c.field));
                header.push(format!("{} (new)", c.field));
            }
            ColumnLayout::Single => header.push(c.field.clone()),
        }
    }

    let rows = changes
        .rows
        .iter()
        .map(|row| {
            let mut cells = Vec::with_capacity(header.len());
            cells.push(Value::from(row.change_type.as_str()));
            cells.extend(row.key.parts().iter().map(|p| Value::from(p.as_str())));
            for c in &columns {
                let cell = row.cell(&c.field);
                let old = cell.and_then(|x| x.old.clone()).unwrap_or(Value::Null);
                let new = cell.and_then(|x| x.new.clone()).unwrap_or(Value::Null);
                match c.layout {
                    ColumnLayout::Paired => {
                        cells.push(old);
                        cells.push(new);
                    }
                    ColumnLayout::Single => cells.push(match row.change_type {
                        ChangeType::Removed => old,
                        _ => new,
                    }),
                }
            }
            cells
        })
        .collect();

    FlatTable { header, rows }
}

// ---------------------------------------------------------------------------
// Clusterings
// ---------------------------------------------------------------------------

/// `Fuzzy<name>`, `Fuzzy<count>`, `Fuzzy<extra>`..., then the member's own
/// columns and `Similarity`. Group columns are filled on the representative's
/// row only.
pub fn cluster_table(clustering: &Clustering, names: &NameTable) -> FlatTable {
    let own: Vec<&String> = std::iter::once(&names.name_header)
        .chain(std::iter::once(&names.count_header))
        .chain(names.extra_headers.iter())
        .collect();

    let mut header: Vec<String> = own.iter().map(|h| format!("{FUZZY_PREFIX}{h}")).collect();
    header.extend(own.iter().map(|h| h.to_string()));
    header.push(SIMILARITY_HEADER.to_string());

    let rows = clustering
        .rows
        .iter()
        .map(|row| {
            let representative = clustering
                .clusters
                .get(row.cluster)
                .is_some_and(|c| c.anchor == row.index);

            let mut cells = Vec::with_capacity(header.len());
            if representative {
                cells.push(Value::from(row.fuzzy_name.as_str()));
                cells.push(Value::Float(row.fuzzy_count));
                cells.extend(row.fuzzy_extra.iter().map(|v| Value::Float(*v)));
            } else {
                cells.extend(std::iter::repeat(Value::Null).take(own.len()));
            }
            cells.push(Value::from(row.name.as_str()));
            cells.push(Value::Float(row.count));
            cells.extend(row.extra.iter().map(|v| Value::Float(*v)));
            cells.push(Value::Float(row.similarity));
            cells
        })
        .collect();

    FlatTable { header, rows }
}

/// The name table itself, for runs that only count: name, count, extras.
pub fn name_table(names: &NameTable) -> FlatTable {
    let mut header = vec![names.name_header.clone(), names.count_header.clone()];
    header.extend(names.extra_headers.iter().cloned());

    let rows = names
        .entries
        .iter()
        .map(|e| {
            let mut cells = vec![Value::from(e.name.as_str()), Value::Float(e.count)];
            cells.extend(e.extra.iter().map(|v| Value::Float(*v)));
            cells
        })
        .collect();

    FlatTable { header, rows }
}

// ---------------------------------------------------------------------------
// Writers
// ---------------------------------------------------------------------------

pub fn write_csv(table: &FlatTable, path: &Path) -> Result<(), IngestError> {
    let file = std::fs::File::create(path)?;
    write_csv_to(table, file)
}

pub fn write_csv_to<W: Write>(table: &FlatTable, writer: W) -> Result<(), IngestError> {
    let mut writer = ::csv::WriterBuilder::new().from_writer(writer);
    writer.write_record(&table.header)?;
    for row in &table.rows {
        writer.write_record(row.iter().map(|v| v.to_string()))?;
    }
    writer.flush()?;
    Ok(())
}

/// One worksheet, bold frozen header, numbers written as numbers.
pub fn write_xlsx(table: &FlatTable, path: &Path, sheet_name: &str) -> Result<(), IngestError> {
    let mut workbook = Workbook::new();
    let worksheet = workbook.add_worksheet().set_name(sheet_name)?;
    let bold = Format::new().set_bold();

    for (col, name) in table.header.iter().enumerate() {
        worksheet.write_string_with_format(0, col16(col)?, name, &bold)?;
    }
    for (r, row) in table.rows.iter().enumerate() {
        let row32 = u32::try_from(r + 1).map_err(|_| XlsxError::RowColumnLimitError)?;
        for (col, value) in row.iter().enumerate() {
            let col = col16(col)?;
            match value {
                Value::Null => {}
                Value::Int(i) => {
                    worksheet.write_number(row32, col, *i as f64)?;
                }
                Value::Float(x) if x.is_finite() => {
                    worksheet.write_number(row32, col, *x)?;
                }
                other => {
                    worksheet.write_string(row32, col, other.to_string())?;
                }
            }
        }
    }
    worksheet.set_freeze_panes(1, 0)?;
    worksheet.autofit();

    workbook.save(path)?;
    Ok(())
}

fn col16(col: usize) -> Result<u16, XlsxError> {
    u16::try_from(col).map_err(|_| XlsxError::RowColumnLimitError)
}
