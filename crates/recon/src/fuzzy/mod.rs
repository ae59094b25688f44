//! Greedy fuzzy clustering of name/count tables.
//!
//! Names are normalized once, then each unconsumed name anchors a group of
//! everything left that scores at least the threshold against it.

mod cluster;
mod normalize;
mod scorer;

pub use cluster::{cluster, ClusterMember, Clustering, FuzzyOptions, FuzzyRow, NameEntry, SimilarityCluster};
pub use normalize::{Normalizer, EMPTY_NAME_GROUP};
pub use scorer::{
    default_scorers, normalize_weights, ratio, token_set_ratio, token_sort_ratio, ScorerKind, ScorerWeight,
    TOKEN_SET_WEIGHT,
};
