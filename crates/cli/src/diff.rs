// dgrid diff: keyed comparison of two exports

use std::path::PathBuf;

use clap::Args;
use deltagrid_io::{
    change_table, left_join, match_flag, read_records, read_table, tag_new_parents, ColumnOrder, FlatTable,
    ReadOptions, NEW_PARENT_LABEL,
};
use deltagrid_recon::config::{DiffConfig, FieldFilterConfig, JoinConfig, MatchFlagConfig, NewParentConfig};
use deltagrid_recon::{diff, ChangeSet, FieldKind, FieldMatches, RecordSet, RemovedFilter};
use serde::Serialize;
use tracing::{debug, info};

use crate::output::{emit, resolve_format, OutputFormat};
use crate::{load_job, parse_delimiter, parse_field_matches, parse_kind, parse_match_flag, CliError};

#[derive(Args, Debug)]
pub struct DiffArgs {
    /// Earlier export (CSV/TSV with a header row)
    pub old: PathBuf,

    /// Later export
    pub new: PathBuf,

    /// Job config whose [diff] section supplies defaults
    #[arg(long, short = 'c')]
    pub config: Option<PathBuf>,

    /// Key field; repeat or comma-separate for a composite key
    #[arg(long, short = 'k', value_delimiter = ',', conflicts_with = "key_hash")]
    pub key: Vec<String>,

    /// Fields hashed together into one content key
    #[arg(long, value_delimiter = ',')]
    pub key_hash: Vec<String>,

    /// Fields that never count as a change
    #[arg(long, value_delimiter = ',')]
    pub ignore: Vec<String>,

    /// Fields shown on every changed row
    #[arg(long, value_delimiter = ',')]
    pub show: Vec<String>,

    /// Report only removed rows whose FIELD is one of the values
    #[arg(long, value_name = "FIELD=V1,V2", value_parser = parse_field_matches)]
    pub removed_where: Option<FieldMatches>,

    /// Read only the rows of NEW whose FIELD is one of the values
    #[arg(long, value_name = "FIELD=V1,V2", value_parser = parse_field_matches)]
    pub new_where: Option<FieldMatches>,

    /// Read FIELD as integer, float or text (repeatable)
    #[arg(long = "kind", value_name = "FIELD=KIND", value_parser = parse_kind)]
    pub kinds: Vec<(String, FieldKind)>,

    /// Lower-case every text value before comparing
    #[arg(long)]
    pub lowercase: bool,

    /// Fold rows sharing a key instead of failing
    #[arg(long)]
    pub merge_duplicates: bool,

    /// Relabel added rows whose FIELD value never occurs in OLD
    #[arg(long, value_name = "FIELD")]
    pub new_parent: Option<String>,

    /// Change type given by --new-parent
    #[arg(long, value_name = "LABEL", requires = "new_parent")]
    pub new_parent_label: Option<String>,

    /// Lookup table left-joined onto the output
    #[arg(long, value_name = "FILE", requires = "join_link")]
    pub join: Option<PathBuf>,

    /// Field linking output rows to --join rows
    #[arg(long, value_name = "FIELD", requires = "join")]
    pub join_link: Option<String>,

    /// Columns taken from --join (default: all but the link)
    #[arg(long, value_delimiter = ',', requires = "join")]
    pub join_columns: Vec<String>,

    /// Add a RIGHTMatch column, Y where LEFT and RIGHT agree (repeatable)
    #[arg(long = "match-flag", value_name = "LEFT=RIGHT", value_parser = parse_match_flag)]
    pub match_flags: Vec<MatchFlagConfig>,

    /// Fields moved to the front of the output
    #[arg(long, value_delimiter = ',')]
    pub first: Vec<String>,

    /// Fields moved to the back of the output
    #[arg(long, value_delimiter = ',')]
    pub last: Vec<String>,

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

/// JSON result: the change set plus the table as written to CSV/XLSX.
#[derive(Serialize)]
struct DiffReport<'a> {
    #[serde(flatten)]
    changes: &'a ChangeSet,
    table: &'a FlatTable,
}

/// Config first, then flags on top: key flags replace the configured key,
/// list flags extend it, single-valued flags replace their setting.
fn merge_config(args: &DiffArgs, mut config: DiffConfig) -> DiffConfig {
    if !args.key.is_empty() {
        config.key = Some(args.key.clone());
        config.key_hash = None;
    }
    if !args.key_hash.is_empty() {
        config.key_hash = Some(args.key_hash.clone());
        config.key = None;
    }
    config.ignore.extend(args.ignore.iter().cloned());
    config.always_show.extend(args.show.iter().cloned());
    if let Some(m) = &args.removed_where {
        config.removed_filter = Some(FieldFilterConfig::from(m));
    }
    if let Some(m) = &args.new_where {
        config.new_filter = Some(FieldFilterConfig::from(m));
    }
    config.kinds.extend(args.kinds.iter().cloned());
    if let Some(field) = &args.new_parent {
        config.new_parent = Some(NewParentConfig { field: field.clone(), label: args.new_parent_label.clone() });
    }
    if let (Some(file), Some(link)) = (&args.join, &args.join_link) {
        config.join = Some(JoinConfig { file: file.clone(), link: link.clone(), columns: args.join_columns.clone() });
    }
    config.match_flags.extend(args.match_flags.iter().cloned());
    config
}

/// New-parent tags, then the join, then match flags, so a flag can compare
/// against a joined column.
fn post_process(
    table: &mut FlatTable,
    config: &DiffConfig,
    old: &RecordSet,
    lowercase: bool,
) -> Result<(), CliError> {
    if let Some(parent) = &config.new_parent {
        let label = parent.label.as_deref().unwrap_or(NEW_PARENT_LABEL);
        let tagged = tag_new_parents(table, old, &parent.field, label).map_err(|e| CliError::step(e, "new parent"))?;
        info!(field = %parent.field, tagged, "new parents tagged");
    }
    if let Some(join) = &config.join {
        let read = ReadOptions::default().lowercase(lowercase);
        let other = read_table(&join.file, &read).map_err(|e| CliError::ingest(e, &join.file))?;
        let matched = left_join(table, &other, &join.link, &join.columns)
            .map_err(|e| CliError::ingest(e, &join.file))?;
        debug!(link = %join.link, matched, "join applied");
    }
    for flag in &config.match_flags {
        let agreeing =
            match_flag(table, &flag.left, &flag.right).map_err(|e| CliError::step(e, "match flag"))?;
        debug!(left = %flag.left, right = %flag.right, agreeing, "match flag added");
    }
    Ok(())
}

pub fn cmd_diff(args: DiffArgs) -> Result<(), CliError> {
    let format = resolve_format(args.format, args.output.as_deref())?;

    let base = match &args.config {
        Some(path) => load_job(path)?.diff.unwrap_or_default(),
        None => DiffConfig::default(),
    };
    let config = merge_config(&args, base);
    if config.key.is_none() && config.key_hash.is_none() {
        return Err(CliError::usage("no key given")
            .with_hint("pass --key FIELD, or set key in the [diff] section of --config"));
    }
    config.validate()?;
    let key = config.key_spec()?;

    let read = ReadOptions {
        delimiter: parse_delimiter(args.delimiter)?,
        kinds: config.kinds.iter().map(|(f, k)| (f.clone(), *k)).collect(),
        lowercase: args.lowercase,
        ..ReadOptions::default()
    };
    let read_new = read.clone().filter(config.new_filter());
    let old = read_records(&args.old, &read, key.clone(), args.merge_duplicates)
        .map_err(|e| CliError::ingest(e, &args.old))?;
    let new = read_records(&args.new, &read_new, key, args.merge_duplicates)
        .map_err(|e| CliError::ingest(e, &args.new))?;
    debug!(old = old.len(), new = new.len(), "inputs loaded");

    let filter = config.removed_filter();
    let changes = diff(&old, &new, &config.options(), filter.as_ref().map(|f| f as &dyn RemovedFilter))?;

    let s = &changes.summary;
    info!(
        added = s.added,
        removed = s.removed,
        changed = s.changed,
        unchanged = s.unchanged,
        removed_filtered_out = s.removed_filtered_out,
        "diff complete"
    );

    let order = ColumnOrder { first: args.first.clone(), last: args.last.clone() };
    let mut table = change_table(&changes, &order);
    post_process(&mut table, &config, &old, args.lowercase)?;

    let report = DiffReport { changes: &changes, table: &table };
    emit("diff", &table, &report, format, args.output.as_deref())
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::Parser;

    #[derive(Parser)]
    struct Harness {
        #[command(flatten)]
        args: DiffArgs,
    }

    fn args(argv: &[&str]) -> DiffArgs {
        let mut full = vec!["diff", "old.csv", "new.csv"];
        full.extend_from_slice(argv);
        Harness::parse_from(full).args
    }

    fn try_args(argv: &[&str]) -> Result<DiffArgs, clap::Error> {
        let mut full = vec!["diff", "old.csv", "new.csv"];
        full.extend_from_slice(argv);
        Harness::try_parse_from(full).map(|h| h.args)
    }

    #[test]
    fn flags_extend_config_lists() {
        let config = DiffConfig {
            key: Some(vec!["id".into()]),
            ignore: vec!["LastModified".into()],
            ..DiffConfig::default()
        };
        let merged = merge_config(&args(&["--ignore", "Note,Owner", "--show", "Zip"]), config);
        assert_eq!(merged.key, Some(vec!["id".to_string()]));
        assert_eq!(merged.ignore, vec!["LastModified", "Note", "Owner"]);
        assert_eq!(merged.always_show, vec!["Zip"]);
    }

    #[test]
    fn key_flags_replace_config_key() {
        let config = DiffConfig { key: Some(vec!["id".into()]), ..DiffConfig::default() };
        let merged = merge_config(&args(&["--key-hash", "name,zip"]), config);
        assert_eq!(merged.key, None);
        assert_eq!(merged.key_hash, Some(vec!["name".to_string(), "zip".to_string()]));

        let merged = merge_config(&args(&["-k", "a", "-k", "b"]), DiffConfig::default());
        assert_eq!(merged.key, Some(vec!["a".to_string(), "b".to_string()]));
    }

    #[test]
    fn removed_where_replaces_config_filter() {
        let config = DiffConfig {
            removed_filter: Some(FieldFilterConfig { field: "Type".into(), any_of: vec!["x".into()] }),
            ..DiffConfig::default()
        };
        let merged = merge_config(&args(&["--removed-where", "Desc=condo,co-op"]), config);
        let filter = merged.removed_filter().unwrap();
        assert_eq!(filter, FieldMatches::new("Desc", ["condo", "co-op"]));
        assert_eq!(merged.new_filter(), None);
    }

    #[test]
    fn new_side_flags_land_in_config() {
        let merged = merge_config(
            &args(&[
                "--new-where",
                "Desc=condo",
                "--kind",
                "RegistrationID=integer",
                "--kind",
                "Units=float",
                "--new-parent",
                "RegistrationID",
                "--match-flag",
                "BusinessZip=Zip",
            ]),
            DiffConfig::default(),
        );
        assert_eq!(merged.new_filter(), Some(FieldMatches::new("Desc", ["condo"])));
        assert_eq!(merged.kinds.get("RegistrationID"), Some(&FieldKind::Integer));
        assert_eq!(merged.kinds.get("Units"), Some(&FieldKind::Float));
        let parent = merged.new_parent.unwrap();
        assert_eq!(parent.field, "RegistrationID");
        assert_eq!(parent.label, None);
        assert_eq!(merged.match_flags.len(), 1);
    }

    #[test]
    fn join_flags_travel_together() {
        assert!(try_args(&["--join", "b.csv"]).is_err());
        assert!(try_args(&["--join-link", "Id"]).is_err());
        assert!(try_args(&["--new-parent-label", "new-building"]).is_err());

        let a = try_args(&["--join", "b.csv", "--join-link", "Id", "--join-columns", "Zip,Name"]).unwrap();
        let join = merge_config(&a, DiffConfig::default()).join.unwrap();
        assert_eq!(join.file, PathBuf::from("b.csv"));
        assert_eq!(join.columns, vec!["Zip", "Name"]);
    }
}
