use std::cmp::Ordering;

use log::debug;
use ordered_float::OrderedFloat;
use serde::{Deserialize, Serialize};

use super::normalize::Normalizer;
use super::scorer::{default_scorers, normalize_weights, ScorerWeight};
use crate::error::ReconError;

/// Slack for weighted sums: weights that only approximately sum to 1 must
/// still let identical names reach a threshold of 100.
const SCORE_EPSILON: f64 = 1e-9;

// ---------------------------------------------------------------------------
// Input
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct NameEntry {
    pub name: String,
    pub count: f64,
    #[serde(default)]
    pub extra: Vec<f64>,
}

impl NameEntry {
    pub fn new(name: impl Into<String>, count: f64) -> Self {
        Self { name: name.into(), count, extra: Vec::new() }
    }

    pub fn with_extra(mut self, extra: Vec<f64>) -> Self {
        self.extra = extra;
        self
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct FuzzyOptions {
    /// Minimum weighted score (0..=100) for a name to join an anchor's group.
    pub threshold: f64,
    pub ignore_keywords: Vec<String>,
    /// Applied in order; cheap scorers first prune the most work.
    pub scorers: Vec<ScorerWeight>,
}

impl Default for FuzzyOptions {
    fn default() -> Self {
        Self {
            threshold: 90.0,
            ignore_keywords: Vec::new(),
            scorers: default_scorers(),
        }
    }
}

impl FuzzyOptions {
    pub fn new(threshold: f64) -> Self {
        Self { threshold, ..Self::default() }
    }

    pub fn with_ignore_keywords<S: Into<String>>(mut self, keywords: impl IntoIterator<Item = S>) -> Self {
        self.ignore_keywords = keywords.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_scorers(mut self, scorers: Vec<ScorerWeight>) -> Self {
        self.scorers = scorers;
        self
    }

    pub fn validate(&self) -> Result<(), ReconError> {
        if !self.threshold.is_finite() || !(0.0..=100.0).contains(&self.threshold) {
            return Err(ReconError::ThresholdOutOfRange(self.threshold));
        }
        normalize_weights(&self.scorers).map(|_| ())
    }
}

// ---------------------------------------------------------------------------
// Output
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct ClusterMember {
    pub index: usize,
    /// Weighted score against the anchor.
    pub similarity: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SimilarityCluster {
    pub anchor: usize,
    /// The anchor's original name.
    pub name: String,
    pub count: f64,
    pub extra: Vec<f64>,
    pub members: Vec<ClusterMember>,
}

/// One member row of the flat clustered table.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FuzzyRow {
    pub fuzzy_name: String,
    pub fuzzy_count: f64,
    pub fuzzy_extra: Vec<f64>,
    pub name: String,
    pub count: f64,
    pub extra: Vec<f64>,
    pub similarity: f64,
    #[serde(skip)]
    pub cluster: usize,
    #[serde(skip)]
    pub index: usize,
}

impl FuzzyRow {
    /// Puts the representative's own row first inside its group.
    fn tie_break(&self) -> f64 {
        if self.name == self.fuzzy_name {
            self.fuzzy_count + 1.0
        } else {
            self.count
        }
    }
}

#[derive(Debug, Clone, PartialEq, Default, Serialize)]
pub struct Clustering {
    /// In input (processing) order.
    pub clusters: Vec<SimilarityCluster>,
    /// Sorted descending by group totals, then member values.
    pub rows: Vec<FuzzyRow>,
}

impl Clustering {
    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }
}

// ---------------------------------------------------------------------------
// Greedy clustering
// ---------------------------------------------------------------------------

/// Group near-duplicate names.
///
/// Entries are processed in the given order. Each unconsumed entry anchors a
/// group of every still-unconsumed entry whose weighted score against it
/// reaches `threshold`; members leave the pool. With typical group size `k`
/// this costs about n²/2k comparisons. Callers usually sort by descending
/// count first so the most common spelling anchors its group.
pub fn cluster(entries: &[NameEntry], options: &FuzzyOptions) -> Result<Clustering, ReconError> {
    options.validate()?;
    let scorers = normalize_weights(&options.scorers)?;
    let threshold = options.threshold;

    let extra_len = entries.first().map(|e| e.extra.len()).unwrap_or(0);
    for (index, e) in entries.iter().enumerate() {
        if e.extra.len() != extra_len {
            return Err(ReconError::RaggedExtras { index, expected: extra_len, found: e.extra.len() });
        }
    }

    let normalizer = Normalizer::new(&options.ignore_keywords)?;
    let normalized: Vec<String> = entries.iter().map(|e| normalizer.normalize(&e.name)).collect();

    // Best score still obtainable from the scorers after position i.
    let remaining_max: Vec<f64> = (0..scorers.len())
        .map(|i| 100.0 * scorers[i + 1..].iter().map(|s| s.weight).sum::<f64>())
        .collect();

    let n = entries.len();
    let mut consumed = vec![false; n];
    let mut clusters: Vec<SimilarityCluster> = Vec::new();
    let mut comparisons = 0usize;
    let mut pruned = 0usize;

    for anchor in 0..n {
        if consumed[anchor] {
            continue;
        }
        let query = &normalized[anchor];

        // Everything before the anchor is already consumed.
        let mut candidates: Vec<(usize, f64)> = (anchor..n)
            .filter(|&i| !consumed[i])
            .map(|i| (i, 0.0))
            .collect();
        comparisons += candidates.len();

        for (i, sw) in scorers.iter().enumerate() {
            let floor = threshold - remaining_max[i] - SCORE_EPSILON;
            let before = candidates.len();
            candidates.retain_mut(|(idx, running)| {
                *running += sw.scorer.score(query, &normalized[*idx]) * sw.weight;
                *running >= floor || *idx == anchor
            });
            pruned += before - candidates.len();
        }

        let mut count = 0.0;
        let mut extra = vec![0.0; extra_len];
        let mut members = Vec::with_capacity(candidates.len());
        for (idx, score) in candidates {
            consumed[idx] = true;
            count += entries[idx].count;
            for (sum, v) in extra.iter_mut().zip(&entries[idx].extra) {
                *sum += v;
            }
            members.push(ClusterMember { index: idx, similarity: score.min(100.0) });
        }

        clusters.push(SimilarityCluster {
            anchor,
            name: entries[anchor].name.clone(),
            count,
            extra,
            members,
        });
    }

    debug!(
        "cluster: {} entries -> {} groups ({} candidate pairs, {} pruned early)",
        n,
        clusters.len(),
        comparisons,
        pruned
    );

    let mut rows: Vec<FuzzyRow> = clusters
        .iter()
        .enumerate()
        .flat_map(|(ci, c)| {
            c.members.iter().map(move |m| {
                let e = &entries[m.index];
                FuzzyRow {
                    fuzzy_name: c.name.clone(),
                    fuzzy_count: c.count,
                    fuzzy_extra: c.extra.clone(),
                    name: e.name.clone(),
                    count: e.count,
                    extra: e.extra.clone(),
                    similarity: m.similarity,
                    cluster: ci,
                    index: m.index,
                }
            })
        })
        .collect();
    rows.sort_by(|a, b| compare_rows(b, a));

    Ok(Clustering { clusters, rows })
}

fn compare_floats(a: &[f64], b: &[f64]) -> Ordering {
    a.iter().copied().map(OrderedFloat).cmp(b.iter().copied().map(OrderedFloat))
}

/// Ascending order over the output sort key; callers reverse it.
fn compare_rows(a: &FuzzyRow, b: &FuzzyRow) -> Ordering {
    OrderedFloat(a.fuzzy_count)
        .cmp(&OrderedFloat(b.fuzzy_count))
        .then_with(|| compare_floats(&a.fuzzy_extra, &b.fuzzy_extra))
        .then_with(|| a.fuzzy_name.cmp(&b.fuzzy_name))
        .then_with(|| OrderedFloat(a.tie_break()).cmp(&OrderedFloat(b.tie_break())))
        .then_with(|| compare_floats(&a.extra, &b.extra))
        .then_with(|| OrderedFloat(a.similarity).cmp(&OrderedFloat(b.similarity)))
        .then_with(|| a.name.cmp(&b.name))
}
