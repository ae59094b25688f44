// File I/O: CSV ingestion, name tables, change-table reports, CSV/XLSX export

pub mod csv;
pub mod dedup;
pub mod error;
pub mod export;
pub mod names;
pub mod report;

pub use crate::csv::{read_records, read_table, ReadOptions, Table};
pub use dedup::merge_duplicate_keys;
pub use error::IngestError;
pub use export::{change_table, cluster_table, name_table, write_csv, write_xlsx, ColumnOrder, FlatTable};
pub use names::{ExtraSource, NameTable, NameTableBuilder};
pub use report::{left_join, match_flag, tag_new_parents, NEW_PARENT_LABEL};
