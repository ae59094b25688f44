use std::fmt;

use crate::model::RecordKey;

/// Coarse classification of a [`ReconError`], used by callers that map
/// failures onto exit codes or HTTP statuses.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// The job configuration could not be parsed or is inconsistent.
    Config,
    /// Invalid or missing key, out-of-range threshold, bad scorer setup.
    Validation,
    /// Old and new record sets cannot be compared field-for-field.
    Schema,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DuplicateKey {
    pub key: RecordKey,
    pub count: usize,
}

#[derive(Debug)]
pub enum ReconError {
    /// TOML parse / deserialization error.
    ConfigParse(String),
    /// Config validation error (missing key, conflicting options, etc.).
    ConfigValidation(String),
    /// A key field is not part of the schema.
    MissingKeyField(String),
    /// A key field holds no value for some record.
    NullKey { row: usize, field: String },
    /// Keys are not unique within one record set.
    DuplicateKeys(Vec<DuplicateKey>),
    /// Old and new sets are keyed differently.
    KeyMismatch { old: String, new: String },
    /// A field named in the options exists in neither schema.
    UnknownField(String),
    /// A record does not have one value per schema field.
    RowWidth { row: usize, expected: usize, found: usize },
    /// Considered field sets differ between old and new.
    SchemaMismatch { only_old: Vec<String>, only_new: Vec<String> },
    ThresholdOutOfRange(f64),
    NoScorers,
    InvalidWeight { scorer: String, weight: f64 },
    UnknownScorer(String),
    /// Entries disagree on the number of extra columns.
    RaggedExtras { index: usize, expected: usize, found: usize },
}

impl ReconError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::ConfigParse(_) | Self::ConfigValidation(_) => ErrorKind::Config,
            Self::RowWidth { .. } | Self::SchemaMismatch { .. } => ErrorKind::Schema,
            _ => ErrorKind::Validation,
        }
    }
}

impl fmt::Display for ReconError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::ConfigParse(msg) => write!(f, "config parse error: {msg}"),
            Self::ConfigValidation(msg) => write!(f, "config validation error: {msg}"),
            Self::MissingKeyField(field) => write!(f, "key field '{field}' is not in the schema"),
            Self::NullKey { row, field } => {
                write!(f, "row {row}: key field '{field}' has no value")
            }
            Self::DuplicateKeys(dups) => {
                writeln!(f, "duplicate keys found:")?;
                for dup in dups {
                    writeln!(f, "  key {} appears {} times", dup.key, dup.count)?;
                }
                Ok(())
            }
            Self::KeyMismatch { old, new } => {
                write!(f, "old set is keyed by {old} but new set is keyed by {new}")
            }
            Self::UnknownField(field) => write!(f, "unknown field '{field}'"),
            Self::RowWidth { row, expected, found } => {
                write!(f, "row {row}: expected {expected} values, found {found}")
            }
            Self::SchemaMismatch { only_old, only_new } => {
                write!(f, "schema mismatch:")?;
                if !only_old.is_empty() {
                    write!(f, " only in old [{}]", only_old.join(", "))?;
                }
                if !only_new.is_empty() {
                    write!(f, " only in new [{}]", only_new.join(", "))?;
                }
                Ok(())
            }
            Self::ThresholdOutOfRange(t) => {
                write!(f, "similarity threshold must be within 0..=100, got {t}")
            }
            Self::NoScorers => write!(f, "at least one scorer is required"),
            Self::InvalidWeight { scorer, weight } => {
                write!(f, "scorer '{scorer}': weight must be a positive number, got {weight}")
            }
            Self::UnknownScorer(id) => write!(
                f,
                "unknown scorer '{id}' (expected exact, ratio, token_sort or token_set)"
            ),
            Self::RaggedExtras { index, expected, found } => write!(
                f,
                "entry {index}: expected {expected} extra columns, found {found}"
            ),
        }
    }
}

impl std::error::Error for ReconError {}
