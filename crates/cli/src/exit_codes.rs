//! CLI Exit Code Registry
//!
//! This is the single source of truth for all CLI exit codes.
//! Exit codes are part of the shell contract; scripts rely on them.
//!
//! | Code | Meaning                                              |
//! |------|------------------------------------------------------|
//! | 0    | Success (an empty result is still a success)         |
//! | 2    | Usage error (bad arguments, conflicting options)     |
//! | 3    | Invalid job config (TOML parse or validation)        |
//! | 4    | Validation error (keys, threshold, scorer weights)   |
//! | 5    | Schema mismatch between old and new inputs           |
//! | 6    | Input could not be read or parsed                    |
//! | 7    | Output could not be written                          |

use deltagrid_io::IngestError;
use deltagrid_recon::{ErrorKind, ReconError};

/// Success - command completed without errors.
pub const EXIT_SUCCESS: u8 = 0;

/// Usage error - bad arguments, missing required options.
pub const EXIT_USAGE: u8 = 2;

/// Job config could not be parsed or failed validation.
pub const EXIT_INVALID_CONFIG: u8 = 3;

/// Null or duplicate keys, unknown fields, bad threshold or weights.
pub const EXIT_VALIDATION: u8 = 4;

/// Old and new inputs disagree on their compared columns.
pub const EXIT_SCHEMA: u8 = 5;

/// Input file missing, unreadable or malformed.
pub const EXIT_INPUT: u8 = 6;

/// Output file could not be written.
pub const EXIT_OUTPUT: u8 = 7;

pub fn recon_exit_code(err: &ReconError) -> u8 {
    match err.kind() {
        ErrorKind::Config => EXIT_INVALID_CONFIG,
        ErrorKind::Validation => EXIT_VALIDATION,
        ErrorKind::Schema => EXIT_SCHEMA,
    }
}

/// Exit code for a failure while reading inputs.
pub fn ingest_exit_code(err: &IngestError) -> u8 {
    match err {
        IngestError::Recon(e) => recon_exit_code(e),
        _ => EXIT_INPUT,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn recon_kinds_map_to_distinct_codes() {
        assert_eq!(recon_exit_code(&ReconError::ConfigParse("x".into())), EXIT_INVALID_CONFIG);
        assert_eq!(recon_exit_code(&ReconError::ThresholdOutOfRange(120.0)), EXIT_VALIDATION);
        assert_eq!(
            recon_exit_code(&ReconError::SchemaMismatch { only_old: vec!["a".into()], only_new: vec![] }),
            EXIT_SCHEMA
        );
    }

    #[test]
    fn ingest_errors_defer_to_engine_kind() {
        let dup = IngestError::Recon(ReconError::NullKey { row: 1, field: "id".into() });
        assert_eq!(ingest_exit_code(&dup), EXIT_VALIDATION);
        assert_eq!(ingest_exit_code(&IngestError::MissingColumn("id".into())), EXIT_INPUT);
    }
}
