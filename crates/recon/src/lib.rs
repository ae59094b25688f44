//! `deltagrid-recon`: keyed change detection and fuzzy name clustering.
//!
//! Pure engine crate: receives pre-loaded records, returns change tables and
//! clusterings. No CLI or IO dependencies.

pub mod config;
pub mod diff;
pub mod error;
pub mod fuzzy;
pub mod model;

pub use config::JobConfig;
pub use diff::{diff, index_changes, ChangeSet, ChangeType, DiffOptions, FieldMatches, RemovedFilter};
pub use error::{ErrorKind, ReconError};
pub use fuzzy::{cluster, Clustering, FuzzyOptions, NameEntry};
pub use model::{FieldDescriptor, FieldKind, KeySpec, Record, RecordKey, RecordSet, Schema, Value};
