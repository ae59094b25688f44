use std::collections::BTreeMap;
use std::path::PathBuf;

use serde::Deserialize;

use crate::diff::{DiffOptions, FieldMatches};
use crate::error::ReconError;
use crate::fuzzy::{normalize_weights, FuzzyOptions, ScorerWeight};
use crate::model::{FieldKind, KeySpec};

// ---------------------------------------------------------------------------
// Top-level config
// ---------------------------------------------------------------------------

/// A saved job: how to diff two exports and how to cluster names.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct JobConfig {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub diff: Option<DiffConfig>,
    #[serde(default)]
    pub fuzzy: Option<FuzzyConfig>,
}

// ---------------------------------------------------------------------------
// Diff
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct DiffConfig {
    /// Key fields used as-is.
    #[serde(default)]
    pub key: Option<Vec<String>>,
    /// Key fields hashed into a single content key.
    #[serde(default)]
    pub key_hash: Option<Vec<String>>,
    #[serde(default)]
    pub ignore: Vec<String>,
    #[serde(default)]
    pub always_show: Vec<String>,
    /// Which removed rows are reported.
    #[serde(default)]
    pub removed_filter: Option<FieldFilterConfig>,
    /// Rows of the new export kept before keying; the rest are dropped.
    #[serde(default)]
    pub new_filter: Option<FieldFilterConfig>,
    /// Columns read as numbers; every other column is text.
    #[serde(default)]
    pub kinds: BTreeMap<String, FieldKind>,
    #[serde(default)]
    pub new_parent: Option<NewParentConfig>,
    #[serde(default)]
    pub join: Option<JoinConfig>,
    #[serde(default)]
    pub match_flags: Vec<MatchFlagConfig>,
}

/// Rows whose `field` is one of `any_of`, compared trimmed and
/// case-insensitively.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct FieldFilterConfig {
    pub field: String,
    pub any_of: Vec<String>,
}

impl FieldFilterConfig {
    pub fn matches(&self) -> FieldMatches {
        FieldMatches::new(self.field.clone(), self.any_of.iter().cloned())
    }

    fn validate(&self, section: &str) -> Result<(), ReconError> {
        if self.field.trim().is_empty() {
            return Err(ReconError::ConfigValidation(format!("diff.{section}: field is empty")));
        }
        if self.any_of.is_empty() {
            return Err(ReconError::ConfigValidation(format!(
                "diff.{section}: no values given for '{}'",
                self.field
            )));
        }
        Ok(())
    }
}

impl From<&FieldMatches> for FieldFilterConfig {
    fn from(m: &FieldMatches) -> Self {
        Self { field: m.field.clone(), any_of: m.any_of.clone() }
    }
}

/// Added rows whose `field` value is absent from the old export get `label`
/// as their change type.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct NewParentConfig {
    pub field: String,
    #[serde(default)]
    pub label: Option<String>,
}

/// Lookup table left-joined onto the change table.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct JoinConfig {
    pub file: PathBuf,
    pub link: String,
    /// Empty means every column of `file` but the link.
    #[serde(default)]
    pub columns: Vec<String>,
}

/// `<right>Match` is `Y` where `left` and `right` agree.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct MatchFlagConfig {
    pub left: String,
    pub right: String,
}

impl DiffConfig {
    pub fn key_spec(&self) -> Result<KeySpec, ReconError> {
        match (&self.key, &self.key_hash) {
            (Some(_), Some(_)) => Err(ReconError::ConfigValidation(
                "diff: set either key or key_hash, not both".into(),
            )),
            (None, None) => Err(ReconError::ConfigValidation(
                "diff: one of key or key_hash is required".into(),
            )),
            (Some(fields), None) => match fields.as_slice() {
                [] => Err(ReconError::ConfigValidation("diff: key is empty".into())),
                [single] => Ok(KeySpec::Field(single.clone())),
                _ => Ok(KeySpec::Fields(fields.clone())),
            },
            (None, Some(fields)) => {
                if fields.is_empty() {
                    Err(ReconError::ConfigValidation("diff: key_hash is empty".into()))
                } else {
                    Ok(KeySpec::ContentHash(fields.clone()))
                }
            }
        }
    }

    pub fn options(&self) -> DiffOptions {
        DiffOptions::default()
            .ignore(self.ignore.iter().cloned())
            .show(self.always_show.iter().cloned())
    }

    pub fn removed_filter(&self) -> Option<FieldMatches> {
        self.removed_filter.as_ref().map(FieldFilterConfig::matches)
    }

    pub fn new_filter(&self) -> Option<FieldMatches> {
        self.new_filter.as_ref().map(FieldFilterConfig::matches)
    }

    pub fn validate(&self) -> Result<(), ReconError> {
        self.key_spec()?;
        if let Some(f) = &self.removed_filter {
            f.validate("removed_filter")?;
        }
        if let Some(f) = &self.new_filter {
            f.validate("new_filter")?;
        }
        if let Some(p) = &self.new_parent {
            if p.field.trim().is_empty() {
                return Err(ReconError::ConfigValidation("diff.new_parent: field is empty".into()));
            }
        }
        if let Some(j) = &self.join {
            if j.link.trim().is_empty() {
                return Err(ReconError::ConfigValidation("diff.join: link is empty".into()));
            }
        }
        for m in &self.match_flags {
            if m.left.trim().is_empty() || m.right.trim().is_empty() {
                return Err(ReconError::ConfigValidation(
                    "diff.match_flags: left and right are both required".into(),
                ));
            }
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Fuzzy
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct FuzzyConfig {
    /// Unset or 0: only count names, no grouping.
    #[serde(default)]
    pub threshold: Option<f64>,
    #[serde(default)]
    pub ignore_keywords: Vec<String>,
    #[serde(default)]
    pub scorers: Vec<ScorerWeight>,
}

impl FuzzyConfig {
    pub fn is_count_only(&self) -> bool {
        self.threshold.map_or(true, |t| t == 0.0)
    }

    /// Clustering options, or `None` for a count-only run. An absent scorer
    /// list means the default pair.
    pub fn options(&self) -> Option<FuzzyOptions> {
        let threshold = self.threshold.filter(|_| !self.is_count_only())?;
        let mut opts = FuzzyOptions::new(threshold).with_ignore_keywords(self.ignore_keywords.iter().cloned());
        if !self.scorers.is_empty() {
            opts = opts.with_scorers(self.scorers.clone());
        }
        Some(opts)
    }

    pub fn validate(&self) -> Result<(), ReconError> {
        if let Some(t) = self.threshold {
            if !t.is_finite() || !(0.0..=100.0).contains(&t) {
                return Err(ReconError::ThresholdOutOfRange(t));
            }
        }
        if !self.scorers.is_empty() {
            normalize_weights(&self.scorers)?;
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Parse + Validate
// ---------------------------------------------------------------------------

impl JobConfig {
    pub fn from_toml(input: &str) -> Result<Self, ReconError> {
        let config: JobConfig =
            toml::from_str(input).map_err(|e| ReconError::ConfigParse(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ReconError> {
        if self.diff.is_none() && self.fuzzy.is_none() {
            return Err(ReconError::ConfigValidation(
                "job has neither a [diff] nor a [fuzzy] section".into(),
            ));
        }
        if let Some(d) = &self.diff {
            d.validate()?;
        }
        if let Some(f) = &self.fuzzy {
            f.validate()?;
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fuzzy::ScorerKind;

    const FULL_JOB: &str = r#"
name = "contacts-q3"

[diff]
key = ["RegistrationContactID"]
ignore = ["LastModified"]
always_show = ["BusinessZip"]

[diff.removed_filter]
field = "ContactDescription"
any_of = ["condo", "co-op"]

[diff.new_filter]
field = "ContactDescription"
any_of = ["condo", "co-op"]

[diff.kinds]
RegistrationID = "integer"

[diff.new_parent]
field = "RegistrationID"
label = "new-building"

[diff.join]
file = "buildings.csv"
link = "RegistrationID"
columns = ["Zip"]

[[diff.match_flags]]
left = "BusinessZip"
right = "Zip"

[fuzzy]
threshold = 85
ignore_keywords = ["inc", "llc"]

[[fuzzy.scorers]]
id = "ratio"
weight = 1

[[fuzzy.scorers]]
id = "token_set"
weight = 3
"#;

    #[test]
    fn parse_full_job() {
        let config = JobConfig::from_toml(FULL_JOB).unwrap();
        assert_eq!(config.name.as_deref(), Some("contacts-q3"));

        let diff = config.diff.unwrap();
        assert_eq!(diff.key_spec().unwrap(), KeySpec::Field("RegistrationContactID".into()));
        let opts = diff.options();
        assert!(opts.ignore_fields.contains("LastModified"));
        assert_eq!(opts.always_show, vec!["BusinessZip".to_string()]);
        let filter = diff.removed_filter().unwrap();
        assert_eq!(filter.field, "ContactDescription");
        assert_eq!(filter.any_of.len(), 2);
        assert_eq!(diff.new_filter(), Some(filter));
        assert_eq!(diff.kinds.get("RegistrationID"), Some(&FieldKind::Integer));
        let parent = diff.new_parent.as_ref().unwrap();
        assert_eq!(parent.label.as_deref(), Some("new-building"));
        let join = diff.join.as_ref().unwrap();
        assert_eq!(join.file, PathBuf::from("buildings.csv"));
        assert_eq!(join.columns, vec!["Zip".to_string()]);
        assert_eq!(
            diff.match_flags,
            vec![MatchFlagConfig { left: "BusinessZip".into(), right: "Zip".into() }]
        );

        let fuzzy = config.fuzzy.unwrap().options().unwrap();
        assert_eq!(fuzzy.threshold, 85.0);
        assert_eq!(fuzzy.ignore_keywords, vec!["inc".to_string(), "llc".to_string()]);
        assert_eq!(fuzzy.scorers.len(), 2);
        assert_eq!(fuzzy.scorers[1].scorer, ScorerKind::TokenSet);
        assert_eq!(fuzzy.scorers[1].weight, 3.0);
    }

    #[test]
    fn composite_and_hash_keys() {
        let job = JobConfig::from_toml("[diff]\nkey = [\"a\", \"b\"]\n").unwrap();
        assert_eq!(
            job.diff.unwrap().key_spec().unwrap(),
            KeySpec::Fields(vec!["a".into(), "b".into()])
        );
        let job = JobConfig::from_toml("[diff]\nkey_hash = [\"name\", \"zip\"]\n").unwrap();
        assert!(matches!(job.diff.unwrap().key_spec().unwrap(), KeySpec::ContentHash(_)));
    }

    #[test]
    fn fuzzy_defaults() {
        let job = JobConfig::from_toml("[fuzzy]\nthreshold = 90\n").unwrap();
        let opts = job.fuzzy.unwrap().options();
        assert_eq!(opts, Some(FuzzyOptions::default()));
    }

    #[test]
    fn missing_or_zero_threshold_only_counts() {
        let job = JobConfig::from_toml("[fuzzy]\n").unwrap();
        let fuzzy = job.fuzzy.unwrap();
        assert!(fuzzy.is_count_only());
        assert_eq!(fuzzy.options(), None);

        let job = JobConfig::from_toml("[fuzzy]\nthreshold = 0\n").unwrap();
        assert!(job.fuzzy.unwrap().is_count_only());
    }

    #[test]
    fn unknown_field_kind_is_a_parse_error() {
        let err = JobConfig::from_toml("[diff]\nkey = [\"a\"]\n[diff.kinds]\na = \"date\"\n").unwrap_err();
        assert!(matches!(err, ReconError::ConfigParse(_)));
    }

    #[test]
    fn rejects_both_key_forms() {
        let err = JobConfig::from_toml("[diff]\nkey = [\"a\"]\nkey_hash = [\"b\"]\n").unwrap_err();
        assert!(matches!(err, ReconError::ConfigValidation(_)));
    }

    #[test]
    fn rejects_missing_or_empty_key() {
        assert!(matches!(
            JobConfig::from_toml("[diff]\nignore = [\"x\"]\n").unwrap_err(),
            ReconError::ConfigValidation(_)
        ));
        assert!(matches!(
            JobConfig::from_toml("[diff]\nkey = []\n").unwrap_err(),
            ReconError::ConfigValidation(_)
        ));
    }

    #[test]
    fn rejects_empty_job() {
        let err = JobConfig::from_toml("name = \"nothing\"\n").unwrap_err();
        assert!(matches!(err, ReconError::ConfigValidation(_)));
    }

    #[test]
    fn rejects_threshold_out_of_range() {
        let err = JobConfig::from_toml("[fuzzy]\nthreshold = 101\n").unwrap_err();
        assert!(matches!(err, ReconError::ThresholdOutOfRange(_)));
    }

    #[test]
    fn rejects_non_positive_weight() {
        let input = "[fuzzy]\n[[fuzzy.scorers]]\nid = \"ratio\"\nweight = 0\n";
        let err = JobConfig::from_toml(input).unwrap_err();
        assert!(matches!(err, ReconError::InvalidWeight { .. }));
    }

    #[test]
    fn unknown_scorer_is_a_parse_error() {
        let input = "[fuzzy]\n[[fuzzy.scorers]]\nid = \"partial_ratio\"\nweight = 1\n";
        let err = JobConfig::from_toml(input).unwrap_err();
        assert!(matches!(err, ReconError::ConfigParse(_)));
    }

    #[test]
    fn unknown_keys_are_rejected() {
        let err = JobConfig::from_toml("[diff]\nkey = [\"a\"]\nignored = [\"typo\"]\n").unwrap_err();
        assert!(matches!(err, ReconError::ConfigParse(_)));
    }

    #[test]
    fn empty_removed_filter_values_rejected() {
        let input = "[diff]\nkey = [\"a\"]\n[diff.removed_filter]\nfield = \"kind\"\nany_of = []\n";
        let err = JobConfig::from_toml(input).unwrap_err();
        assert!(matches!(err, ReconError::ConfigValidation(_)));
    }

    #[test]
    fn empty_new_filter_field_rejected() {
        let input = "[diff]\nkey = [\"a\"]\n[diff.new_filter]\nfield = \" \"\nany_of = [\"x\"]\n";
        let err = JobConfig::from_toml(input).unwrap_err();
        assert!(matches!(err, ReconError::ConfigValidation(ref m) if m.contains("new_filter")));
    }
}
