use std::fmt;

use deltagrid_recon::ReconError;

#[derive(Debug)]
pub enum IngestError {
    Io(std::io::Error),
    Csv(csv::Error),
    /// A cell could not be read as its field's kind. `row` is 1-based and
    /// counts data rows only.
    Parse { row: usize, field: String, value: String },
    /// A column named by the caller is not in the header.
    MissingColumn(String),
    /// The header names the same column twice.
    DuplicateColumn(String),
    /// A data row has more cells than the header.
    RaggedRow { row: usize, expected: usize, found: usize },
    Recon(ReconError),
    Xlsx(rust_xlsxwriter::XlsxError),
}

impl fmt::Display for IngestError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Io(e) => write!(f, "{e}"),
            Self::Csv(e) => write!(f, "csv: {e}"),
            Self::Parse { row, field, value } => {
                write!(f, "row {row}: cannot read '{value}' in column '{field}'")
            }
            Self::MissingColumn(col) => write!(f, "column '{col}' not found in header"),
            Self::DuplicateColumn(col) => write!(f, "column '{col}' appears more than once in header"),
            Self::RaggedRow { row, expected, found } => {
                write!(f, "row {row}: header has {expected} columns but row has {found}")
            }
            Self::Recon(e) => write!(f, "{e}"),
            Self::Xlsx(e) => write!(f, "xlsx: {e}"),
        }
    }
}

impl std::error::Error for IngestError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Io(e) => Some(e),
            Self::Csv(e) => Some(e),
            Self::Recon(e) => Some(e),
            Self::Xlsx(e) => Some(e),
            _ => None,
        }
    }
}

impl From<std::io::Error> for IngestError {
    fn from(e: std::io::Error) -> Self {
        Self::Io(e)
    }
}

impl From<csv::Error> for IngestError {
    fn from(e: csv::Error) -> Self {
        Self::Csv(e)
    }
}

impl From<ReconError> for IngestError {
    fn from(e: ReconError) -> Self {
        Self::Recon(e)
    }
}

impl From<rust_xlsxwriter::XlsxError> for IngestError {
    fn from(e: rust_xlsxwriter::XlsxError) -> Self {
        Self::Xlsx(e)
    }
}
