// dgrid fuzzy: cluster near-identical names and sum their counts

use std::path::PathBuf;

use clap::Args;
use deltagrid_io::{cluster_table, name_table, read_table, ExtraSource, NameTable, NameTableBuilder, ReadOptions};
use deltagrid_recon::config::FuzzyConfig;
use deltagrid_recon::fuzzy::ScorerWeight;
use deltagrid_recon::{cluster, FieldMatches};
use tracing::{debug, info};

use crate::output::{emit, resolve_format, OutputFormat};
use crate::{load_job, parse_delimiter, parse_field_matches, parse_scorer, CliError};

#[derive(Args, Debug)]
pub struct FuzzyArgs {
    /// Name/count table, or raw rows when --name is given
    pub input: PathBuf,

    /// Job config whose [fuzzy] section supplies defaults
    #[arg(long, short = 'c')]
    pub config: Option<PathBuf>,

    /// Minimum similarity (1-100) for joining a group; unset or 0 only counts
    #[arg(long, short = 't')]
    pub threshold: Option<f64>,

    /// Keyword removed from names before scoring (repeatable)
    #[arg(long = "ignore-keyword", value_name = "KEYWORD")]
    pub ignore_keywords: Vec<String>,

    /// Scorer and weight, e.g. token_set=0.7 (repeatable, replaces the defaults)
    #[arg(long = "scorer", value_name = "ID=WEIGHT", value_parser = parse_scorer)]
    pub scorers: Vec<ScorerWeight>,

    /// Count rows per value of this field instead of reading a count table
    #[arg(long)]
    pub name: Option<String>,

    /// Count each (FIELD, name) pair once
    #[arg(long, value_name = "FIELD", requires = "name")]
    pub distinct_by: Option<String>,

    /// Numeric fields summed per name
    #[arg(long, value_delimiter = ',', requires = "name")]
    pub extra: Vec<String>,

    /// Read --extra fields from this file instead of INPUT
    #[arg(long, value_name = "FILE", requires_all = ["link", "extra"])]
    pub extra_from: Option<PathBuf>,

    /// Field joining INPUT rows to --extra-from rows
    #[arg(long, value_name = "FIELD", requires = "extra_from")]
    pub link: Option<String>,

    /// Drop names containing any of these (case-insensitive)
    #[arg(long, value_delimiter = ',', requires = "name")]
    pub exclude: Vec<String>,

    /// Keep only rows whose FIELD is one of the values
    #[arg(long = "where", value_name = "FIELD=V1,V2", value_parser = parse_field_matches, requires = "name")]
    pub filter: Option<FieldMatches>,

    /// Field delimiter (sniffed when omitted)
    #[arg(long, short = 'd')]
    pub delimiter: Option<char>,

    /// Output format (inferred from -o, default csv)
    #[arg(long, short = 'f')]
    pub format: Option<OutputFormat>,

    /// Output file (default: stdout)
    #[arg(long, short = 'o')]
    pub output: Option<PathBuf>,
}

/// Threshold and scorers from flags replace the configured ones; keywords
/// accumulate.
fn merge_config(args: &FuzzyArgs, mut config: FuzzyConfig) -> FuzzyConfig {
    if args.threshold.is_some() {
        config.threshold = args.threshold;
    }
    config.ignore_keywords.extend(args.ignore_keywords.iter().cloned());
    if !args.scorers.is_empty() {
        config.scorers = args.scorers.clone();
    }
    config
}

fn load_names(args: &FuzzyArgs, read: &ReadOptions) -> Result<NameTable, CliError> {
    let table = read_table(&args.input, read).map_err(|e| CliError::ingest(e, &args.input))?;
    debug!(rows = table.len(), "input loaded");

    let Some(name) = &args.name else {
        return NameTable::from_counts(&table).map_err(|e| CliError::ingest(e, &args.input));
    };

    let joined = match &args.extra_from {
        Some(path) => Some(read_table(path, read).map_err(|e| CliError::ingest(e, path))?),
        None => None,
    };

    let mut builder = NameTableBuilder::new(name.clone())
        .filter(args.filter.clone())
        .exclude(args.exclude.iter().cloned());
    if let Some(field) = &args.distinct_by {
        builder = builder.distinct_by(field.clone());
    }
    match (&joined, &args.link) {
        (Some(table), Some(link)) => {
            builder = builder.extras(ExtraSource::Joined { table, link: link.clone(), fields: args.extra.clone() });
        }
        _ if !args.extra.is_empty() => {
            builder = builder.extras(ExtraSource::Same(args.extra.clone()));
        }
        _ => {}
    }
    builder.build(&table).map_err(|e| CliError::ingest(e, &args.input))
}

pub fn cmd_fuzzy(args: FuzzyArgs) -> Result<(), CliError> {
    let format = resolve_format(args.format, args.output.as_deref())?;

    let base = match &args.config {
        Some(path) => load_job(path)?.fuzzy.unwrap_or_default(),
        None => FuzzyConfig::default(),
    };
    let config = merge_config(&args, base);
    config.validate()?;

    let read = ReadOptions { delimiter: parse_delimiter(args.delimiter)?, ..ReadOptions::default() };
    let names = load_names(&args, &read)?;

    let Some(options) = config.options() else {
        info!(names = names.len(), "no threshold, writing counts only");
        return emit("fuzzy", &name_table(&names), &names, format, args.output.as_deref());
    };
    let clustering = cluster(&names.entries, &options)?;
    info!(
        names = names.len(),
        groups = clustering.clusters.len(),
        threshold = options.threshold,
        "clustering complete"
    );

    let table = cluster_table(&clustering, &names);
    emit("fuzzy", &table, &clustering, format, args.output.as_deref())
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::Parser;
    use deltagrid_recon::fuzzy::ScorerKind;

    #[derive(Parser)]
    struct Harness {
        #[command(flatten)]
        args: FuzzyArgs,
    }

    fn args(argv: &[&str]) -> Result<FuzzyArgs, clap::Error> {
        let mut full = vec!["fuzzy", "names.csv"];
        full.extend_from_slice(argv);
        Harness::try_parse_from(full).map(|h| h.args)
    }

    #[test]
    fn flags_override_config() {
        let config = FuzzyConfig {
            threshold: Some(90.0),
            ignore_keywords: vec!["inc".into()],
            scorers: vec![ScorerWeight::new(ScorerKind::Ratio, 1.0)],
        };
        let a = args(&["-t", "75", "--ignore-keyword", "llc", "--scorer", "token_sort=2"]).unwrap();
        let merged = merge_config(&a, config);
        assert_eq!(merged.threshold, Some(75.0));
        assert_eq!(merged.ignore_keywords, vec!["inc", "llc"]);
        assert_eq!(merged.scorers, vec![ScorerWeight::new(ScorerKind::TokenSort, 2.0)]);
    }

    #[test]
    fn absent_flags_keep_config() {
        let config = FuzzyConfig { threshold: Some(80.0), ..FuzzyConfig::default() };
        let merged = merge_config(&args(&[]).unwrap(), config);
        assert_eq!(merged.threshold, Some(80.0));
        assert!(merged.scorers.is_empty());
    }

    #[test]
    fn zero_threshold_flag_switches_to_counting() {
        let config = FuzzyConfig { threshold: Some(80.0), ..FuzzyConfig::default() };
        let merged = merge_config(&args(&["-t", "0"]).unwrap(), config);
        assert!(merged.is_count_only());
        assert!(merge_config(&args(&[]).unwrap(), FuzzyConfig::default()).is_count_only());
    }

    #[test]
    fn name_table_flags_need_name() {
        assert!(args(&["--distinct-by", "RegistrationID"]).is_err());
        assert!(args(&["--name", "Corp", "--extra-from", "b.csv", "--extra", "Units"]).is_err());
        assert!(args(&["--name", "Corp", "--extra-from", "b.csv", "--link", "Id", "--extra", "Units"]).is_ok());
    }
}
