// dgrid - keyed diffs of two exports and fuzzy clustering of name columns

mod diff;
mod exit_codes;
mod fuzzy;
mod logging;
mod output;

use std::fs;
use std::io::{self, IsTerminal};
use std::path::{Path, PathBuf};
use std::process::ExitCode;

use clap::{Parser, Subcommand};
use deltagrid_io::IngestError;
use deltagrid_recon::config::MatchFlagConfig;
use deltagrid_recon::fuzzy::{ScorerKind, ScorerWeight};
use deltagrid_recon::{FieldKind, FieldMatches, JobConfig, ReconError};

use exit_codes::{
    ingest_exit_code, recon_exit_code, EXIT_INPUT, EXIT_INVALID_CONFIG, EXIT_OUTPUT, EXIT_SUCCESS, EXIT_USAGE,
};

#[derive(Parser)]
#[command(name = "dgrid")]
#[command(about = "Keyed diffs of tabular exports and fuzzy name clustering")]
#[command(version)]
struct Cli {
    /// More log output on stderr (-v debug, -vv trace)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    /// Only log errors
    #[arg(short, long, global = true)]
    quiet: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Compare two exports by key and report added, removed and changed rows
    #[command(after_help = "\
Flags extend the [diff] section of --config; --key and --key-hash replace it.

Examples:
  dgrid diff old.csv new.csv --key RegistrationContactID
  dgrid diff old.csv new.csv --key id --ignore LastModified --show BusinessZip
  dgrid diff old.csv new.csv --key id --removed-where ContactDescription=condo,co-op
  dgrid diff old.csv new.csv --key id --new-where ContactDescription=condo,co-op \\
      --kind RegistrationID=integer --new-parent RegistrationID
  dgrid diff old.csv new.csv --key id --show RegistrationID --join buildings.csv \\
      --join-link RegistrationID --join-columns Zip --match-flag BusinessZip=Zip
  dgrid diff old.csv new.csv --config job.toml -o changes.xlsx")]
    Diff(diff::DiffArgs),

    /// Group near-identical names and sum their counts
    #[command(after_help = "\
Without --name, INPUT is already a name/count table: first column name,
second column count, any further columns are summed extras.
Without --threshold (or with 0) the name table is written ungrouped.

Examples:
  dgrid fuzzy contacts.csv --name CorporationName
  dgrid fuzzy corp_counts.csv --threshold 85
  dgrid fuzzy contacts.csv --name CorporationName --distinct-by RegistrationID
  dgrid fuzzy contacts.csv --name CorporationName --extra-from buildings.csv \\
      --link RegistrationID --extra LegalClassA,LegalClassB
  dgrid fuzzy names.csv --ignore-keyword llc --ignore-keyword inc --scorer token_set=1")]
    Fuzzy(fuzzy::FuzzyArgs),

    /// Parse and check a job config without running it
    Validate {
        /// Job config (TOML)
        config: PathBuf,
    },
}

fn main() -> ExitCode {
    let cli = Cli::parse();

    let log_config =
        logging::LogConfig::from_flags(cli.verbose, cli.quiet).with_ansi(io::stderr().is_terminal());
    if let Err(e) = logging::init_logging(&log_config) {
        eprintln!("warning: logging unavailable: {e}");
    }

    let result = match cli.command {
        Commands::Diff(args) => diff::cmd_diff(args),
        Commands::Fuzzy(args) => fuzzy::cmd_fuzzy(args),
        Commands::Validate { config } => cmd_validate(&config),
    };

    match result {
        Ok(()) => ExitCode::from(EXIT_SUCCESS),
        Err(CliError { code, message, hint }) => {
            if !message.is_empty() {
                eprintln!("error: {}", message);
            }
            if let Some(hint) = hint {
                eprintln!("hint:  {}", hint);
            }
            ExitCode::from(code)
        }
    }
}

#[derive(Debug)]
pub struct CliError {
    pub code: u8,
    pub message: String,
    pub hint: Option<String>,
}

impl CliError {
    pub fn usage(msg: impl Into<String>) -> Self {
        Self { code: EXIT_USAGE, message: msg.into(), hint: None }
    }

    pub fn input(msg: impl Into<String>) -> Self {
        Self { code: EXIT_INPUT, message: msg.into(), hint: None }
    }

    pub fn output(msg: impl Into<String>) -> Self {
        Self { code: EXIT_OUTPUT, message: msg.into(), hint: None }
    }

    /// Engine error with its registry exit code.
    pub fn recon(err: ReconError) -> Self {
        let hint = match &err {
            ReconError::DuplicateKeys(_) => {
                Some("pass --merge-duplicates to fold rows that share a key".to_string())
            }
            ReconError::SchemaMismatch { .. } => {
                Some("list columns present on only one side with --ignore".to_string())
            }
            ReconError::ThresholdOutOfRange(_) => Some("threshold is a score between 0 and 100".to_string()),
            _ => None,
        };
        Self { code: recon_exit_code(&err), message: err.to_string(), hint }
    }

    /// Ingestion error, prefixed with the file it came from.
    pub fn ingest(err: IngestError, path: &Path) -> Self {
        if let IngestError::Recon(e) = err {
            let mut out = Self::recon(e);
            out.message = format!("{}: {}", path.display(), out.message);
            return out;
        }
        Self { code: ingest_exit_code(&err), message: format!("{}: {}", path.display(), err), hint: None }
    }

    /// Failure while post-processing an in-memory table.
    pub fn step(err: IngestError, step: &str) -> Self {
        Self { code: ingest_exit_code(&err), message: format!("{step}: {err}"), hint: None }
    }

    /// Add a hint to an existing error.
    pub fn with_hint(mut self, hint: impl Into<String>) -> Self {
        self.hint = Some(hint.into());
        self
    }
}

impl From<ReconError> for CliError {
    fn from(err: ReconError) -> Self {
        Self::recon(err)
    }
}

// ============================================================================
// Shared argument helpers
// ============================================================================

/// Read and validate a job config. Parse and validation failures both map to
/// the invalid-config exit code.
pub(crate) fn load_job(path: &Path) -> Result<JobConfig, CliError> {
    let text = fs::read_to_string(path).map_err(|e| CliError::input(format!("{}: {}", path.display(), e)))?;
    JobConfig::from_toml(&text).map_err(|e| CliError {
        code: EXIT_INVALID_CONFIG,
        message: format!("{}: {}", path.display(), e),
        hint: None,
    })
}

/// `FIELD=v1,v2,...`
pub(crate) fn parse_field_matches(s: &str) -> Result<FieldMatches, String> {
    let (field, values) = s.split_once('=').ok_or_else(|| format!("expected FIELD=VALUE[,VALUE...], got '{s}'"))?;
    let field = field.trim();
    if field.is_empty() {
        return Err("field name is empty".to_string());
    }
    let values: Vec<&str> = values.split(',').map(str::trim).filter(|v| !v.is_empty()).collect();
    if values.is_empty() {
        return Err(format!("no values given for '{field}'"));
    }
    Ok(FieldMatches::new(field, values))
}

/// `FIELD=KIND`, e.g. `RegistrationID=integer`
pub(crate) fn parse_kind(s: &str) -> Result<(String, FieldKind), String> {
    let (field, kind) = s.split_once('=').ok_or_else(|| format!("expected FIELD=KIND, got '{s}'"))?;
    let field = field.trim();
    if field.is_empty() {
        return Err("field name is empty".to_string());
    }
    let kind: FieldKind = kind.parse().map_err(|e: ReconError| e.to_string())?;
    Ok((field.to_string(), kind))
}

/// `LEFT=RIGHT`, e.g. `BusinessZip=Zip`
pub(crate) fn parse_match_flag(s: &str) -> Result<MatchFlagConfig, String> {
    let (left, right) = s.split_once('=').ok_or_else(|| format!("expected LEFT=RIGHT, got '{s}'"))?;
    let (left, right) = (left.trim(), right.trim());
    if left.is_empty() || right.is_empty() {
        return Err(format!("both sides of '{s}' need a field name"));
    }
    Ok(MatchFlagConfig { left: left.to_string(), right: right.to_string() })
}

/// `ID=WEIGHT`, e.g. `token_set=0.7`
pub(crate) fn parse_scorer(s: &str) -> Result<ScorerWeight, String> {
    let (id, weight) = s.split_once('=').ok_or_else(|| format!("expected ID=WEIGHT, got '{s}'"))?;
    let scorer: ScorerKind = id.parse().map_err(|e: ReconError| e.to_string())?;
    let weight: f64 = weight
        .trim()
        .parse()
        .map_err(|_| format!("weight '{}' is not a number", weight.trim()))?;
    Ok(ScorerWeight::new(scorer, weight))
}

pub(crate) fn parse_delimiter(delimiter: Option<char>) -> Result<Option<u8>, CliError> {
    match delimiter {
        None => Ok(None),
        Some(c) => u8::try_from(c)
            .ok()
            .filter(u8::is_ascii)
            .map(Some)
            .ok_or_else(|| CliError::usage(format!("delimiter '{c}' is not a single ASCII character"))),
    }
}

// ============================================================================
// validate
// ============================================================================

fn cmd_validate(path: &Path) -> Result<(), CliError> {
    let job = load_job(path)?;
    let mut sections = Vec::new();
    if job.diff.is_some() {
        sections.push("diff");
    }
    if job.fuzzy.is_some() {
        sections.push("fuzzy");
    }
    let name = job.name.as_deref().unwrap_or("unnamed job");
    println!("ok: {} ({}): {}", path.display(), name, sections.join(", "));
    Ok(())
}
