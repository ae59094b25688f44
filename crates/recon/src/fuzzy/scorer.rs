//! Similarity scorers on a 0..=100 scale.
//!
//! `ratio`, `token_sort_ratio` and `token_set_ratio` follow RapidFuzz's
//! `fuzz` module: similarity is the normalized Indel distance (insertions and
//! deletions only), measured over Unicode scalar values.

use std::collections::BTreeSet;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::ReconError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ScorerKind {
    /// 100 for identical strings, else 0.
    Exact,
    Ratio,
    TokenSort,
    TokenSet,
}

impl ScorerKind {
    pub fn id(&self) -> &'static str {
        match self {
            Self::Exact => "exact",
            Self::Ratio => "ratio",
            Self::TokenSort => "token_sort",
            Self::TokenSet => "token_set",
        }
    }

    pub fn score(&self, a: &str, b: &str) -> f64 {
        match self {
            Self::Exact => {
                if a == b {
                    100.0
                } else {
                    0.0
                }
            }
            Self::Ratio => ratio(a, b),
            Self::TokenSort => token_sort_ratio(a, b),
            Self::TokenSet => token_set_ratio(a, b),
        }
    }
}

impl fmt::Display for ScorerKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.id())
    }
}

impl FromStr for ScorerKind {
    type Err = ReconError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().replace('-', "_").as_str() {
            "exact" => Ok(Self::Exact),
            "ratio" => Ok(Self::Ratio),
            "token_sort" | "token_sort_ratio" => Ok(Self::TokenSort),
            "token_set" | "token_set_ratio" => Ok(Self::TokenSet),
            _ => Err(ReconError::UnknownScorer(s.to_string())),
        }
    }
}

/// A scorer and its share of the combined score.
#[derive(Debug, Clone, Copy, PartialEq, Deserialize, Serialize)]
pub struct ScorerWeight {
    #[serde(rename = "id")]
    pub scorer: ScorerKind,
    pub weight: f64,
}

impl ScorerWeight {
    pub fn new(scorer: ScorerKind, weight: f64) -> Self {
        Self { scorer, weight }
    }
}

/// Weight of `token_set` in the default scorer pair; `ratio` gets the rest.
pub const TOKEN_SET_WEIGHT: f64 = 0.725;

pub fn default_scorers() -> Vec<ScorerWeight> {
    vec![
        ScorerWeight::new(ScorerKind::Ratio, 1.0 - TOKEN_SET_WEIGHT),
        ScorerWeight::new(ScorerKind::TokenSet, TOKEN_SET_WEIGHT),
    ]
}

/// Validate weights and rescale them to sum to 1, keeping order.
pub fn normalize_weights(scorers: &[ScorerWeight]) -> Result<Vec<ScorerWeight>, ReconError> {
    if scorers.is_empty() {
        return Err(ReconError::NoScorers);
    }
    for s in scorers {
        if !s.weight.is_finite() || s.weight <= 0.0 {
            return Err(ReconError::InvalidWeight {
                scorer: s.scorer.id().to_string(),
                weight: s.weight,
            });
        }
    }
    let total: f64 = scorers.iter().map(|s| s.weight).sum();
    Ok(scorers
        .iter()
        .map(|s| ScorerWeight::new(s.scorer, s.weight / total))
        .collect())
}

// ---------------------------------------------------------------------------
// Indel-based ratios
// ---------------------------------------------------------------------------

fn lcs_length(a: &[char], b: &[char]) -> usize {
    if a.is_empty() || b.is_empty() {
        return 0;
    }
    let mut prev = vec![0usize; b.len() + 1];
    let mut curr = vec![0usize; b.len() + 1];
    for &ca in a {
        curr[0] = 0;
        for (j, &cb) in b.iter().enumerate() {
            curr[j + 1] = if ca == cb {
                prev[j] + 1
            } else {
                prev[j + 1].max(curr[j])
            };
        }
        std::mem::swap(&mut prev, &mut curr);
    }
    prev[b.len()]
}

fn indel_distance(a: &str, b: &str) -> usize {
    let a: Vec<char> = a.chars().collect();
    let b: Vec<char> = b.chars().collect();
    a.len() + b.len() - 2 * lcs_length(&a, &b)
}

fn normalized_similarity(distance: usize, lensum: usize) -> f64 {
    if lensum == 0 {
        return 100.0;
    }
    100.0 * (1.0 - distance as f64 / lensum as f64)
}

/// Normalized Indel similarity.
pub fn ratio(a: &str, b: &str) -> f64 {
    let lensum = a.chars().count() + b.chars().count();
    normalized_similarity(indel_distance(a, b), lensum)
}

/// `ratio` after sorting whitespace-separated tokens.
pub fn token_sort_ratio(a: &str, b: &str) -> f64 {
    ratio(&sorted_tokens(a), &sorted_tokens(b))
}

fn sorted_tokens(s: &str) -> String {
    let mut tokens: Vec<&str> = s.split_whitespace().collect();
    tokens.sort_unstable();
    tokens.join(" ")
}

/// Set-based token comparison: 100 when one token set contains the other,
/// otherwise the best of the intersection-anchored comparisons.
pub fn token_set_ratio(a: &str, b: &str) -> f64 {
    let tokens_a: BTreeSet<&str> = a.split_whitespace().collect();
    let tokens_b: BTreeSet<&str> = b.split_whitespace().collect();
    if tokens_a.is_empty() || tokens_b.is_empty() {
        return 0.0;
    }

    let sect: Vec<&str> = tokens_a.intersection(&tokens_b).copied().collect();
    let diff_ab: Vec<&str> = tokens_a.difference(&tokens_b).copied().collect();
    let diff_ba: Vec<&str> = tokens_b.difference(&tokens_a).copied().collect();

    if !sect.is_empty() && (diff_ab.is_empty() || diff_ba.is_empty()) {
        return 100.0;
    }

    let diff_ab_joined = diff_ab.join(" ");
    let diff_ba_joined = diff_ba.join(" ");
    let ab_len = diff_ab_joined.chars().count();
    let ba_len = diff_ba_joined.chars().count();
    let sect_len = sect.join(" ").chars().count();

    // "sect ab" vs "sect ba" share the "sect " prefix, so only the tails
    // contribute distance.
    let sep = usize::from(sect_len != 0);
    let sect_ab_len = sect_len + sep + ab_len;
    let sect_ba_len = sect_len + sep + ba_len;

    let dist = indel_distance(&diff_ab_joined, &diff_ba_joined);
    let result = normalized_similarity(dist, sect_ab_len + sect_ba_len);
    if sect_len == 0 {
        return result;
    }

    let sect_ab = normalized_similarity(sep + ab_len, sect_len + sect_ab_len);
    let sect_ba = normalized_similarity(sep + ba_len, sect_len + sect_ba_len);
    result.max(sect_ab).max(sect_ba)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn close(a: f64, b: f64) -> bool {
        (a - b).abs() < 1e-9
    }

    #[test]
    fn ratio_matches_indel_definition() {
        assert!(close(ratio("acme corp", "acme corp"), 100.0));
        // LCS 9 over 9 + 16 chars
        assert!(close(ratio("acme corp", "acme corporation"), 72.0));
        assert!(close(ratio("abc", "xyz"), 0.0));
        assert!(close(ratio("", ""), 100.0));
    }

    #[test]
    fn ratio_counts_chars_not_bytes() {
        assert!(close(ratio("café", "cafe"), 75.0));
    }

    #[test]
    fn token_sort_ignores_order() {
        assert!(close(token_sort_ratio("wuzzy fuzzy", "fuzzy wuzzy"), 100.0));
    }

    #[test]
    fn token_set_subset_is_perfect() {
        assert!(close(token_set_ratio("acme", "acme holdings"), 100.0));
        assert!(close(token_set_ratio("acme acme", "acme"), 100.0));
    }

    #[test]
    fn token_set_partial_overlap() {
        // diff tails "corp" vs "corporation" over 9 + 16
        assert!(close(token_set_ratio("acme corp", "acme corporation"), 72.0));
    }

    #[test]
    fn token_set_disjoint_falls_back_to_full_ratio() {
        assert!(close(token_set_ratio("ajax llc", "acme corp"), ratio("ajax llc", "acme corp")));
    }

    #[test]
    fn token_set_empty_side_scores_zero() {
        assert!(close(token_set_ratio("", "acme"), 0.0));
    }

    #[test]
    fn exact_scorer() {
        assert_eq!(ScorerKind::Exact.score("a b", "a b"), 100.0);
        assert_eq!(ScorerKind::Exact.score("a b", "a c"), 0.0);
    }

    #[test]
    fn parse_scorer_ids() {
        assert_eq!("token-set".parse::<ScorerKind>().unwrap(), ScorerKind::TokenSet);
        assert_eq!("RATIO".parse::<ScorerKind>().unwrap(), ScorerKind::Ratio);
        assert!("partial".parse::<ScorerKind>().is_err());
    }

    #[test]
    fn weights_are_rescaled() {
        let w = normalize_weights(&[
            ScorerWeight::new(ScorerKind::Ratio, 3.0),
            ScorerWeight::new(ScorerKind::TokenSet, 7.0),
        ])
        .unwrap();
        assert!(close(w[0].weight, 0.3));
        assert!(close(w[1].weight, 0.7));
        assert_eq!(w[0].scorer, ScorerKind::Ratio);
    }

    #[test]
    fn bad_weights_rejected() {
        assert!(matches!(normalize_weights(&[]), Err(ReconError::NoScorers)));
        let err = normalize_weights(&[ScorerWeight::new(ScorerKind::Ratio, 0.0)]).unwrap_err();
        assert!(matches!(err, ReconError::InvalidWeight { .. }));
        let err = normalize_weights(&[ScorerWeight::new(ScorerKind::Ratio, f64::NAN)]).unwrap_err();
        assert!(matches!(err, ReconError::InvalidWeight { .. }));
    }
}
