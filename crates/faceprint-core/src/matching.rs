use std::collections::BTreeMap;

use rayon::prelude::*;
use serde::Serialize;
use tracing::{debug, warn};

use crate::errors::{AppError, AppResult};
use crate::store::EmbeddingStore;
use crate::vector::{cosine_similarity, nonzero_norm, FeatureVector};

pub const DEFAULT_SIMILARITY_THRESHOLD: f64 = 0.65;

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "result", rename_all = "snake_case")]
pub enum MatchResult {
    Match { identity: String, score: f64 },
    NoMatch { best_score: f64 },
}

impl MatchResult {
    pub fn identity(&self) -> Option<&str> {
        match self {
            MatchResult::Match { identity, .. } => Some(identity),
            MatchResult::NoMatch { .. } => None,
        }
    }

    pub fn score(&self) -> f64 {
        match self {
            MatchResult::Match { score, .. } => *score,
            MatchResult::NoMatch { best_score } => *best_score,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct IdentityScore {
    pub identity: String,
    pub score: f64,
    /// Index of the reference embedding that produced `score`.
    pub reference_index: usize,
    pub skipped_references: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SkippedCandidate {
    pub identity: String,
    pub reason: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct MatchOutcome {
    pub result: MatchResult,
    pub threshold: f64,
    /// Per-identity scores in lexicographic identity order.
    pub scores: Vec<IdentityScore>,
    pub skipped: Vec<SkippedCandidate>,
    pub diagnostic: Option<String>,
}

/// Identities to compare a probe against, ordered by name.
#[derive(Debug, Clone, Default)]
pub struct CandidateSet {
    references: BTreeMap<String, References>,
    rejected: Vec<SkippedCandidate>,
}

#[derive(Debug, Clone, Default)]
struct References {
    vectors: Vec<FeatureVector>,
    /// Reasons for references of this identity that never became vectors.
    invalid: Vec<String>,
}

impl CandidateSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds references for `identity`, appending to any already present.
    pub fn insert(&mut self, identity: impl Into<String>, references: Vec<FeatureVector>) {
        self.references
            .entry(identity.into())
            .or_default()
            .vectors
            .extend(references);
    }

    /// Counts an unusable reference against `identity`. The identity is only
    /// skipped when none of its references can be compared.
    pub fn reject_reference(&mut self, identity: impl Into<String>, reason: impl Into<String>) {
        self.references
            .entry(identity.into())
            .or_default()
            .invalid
            .push(reason.into());
    }

    /// Records an identity that could not be loaded at all; it is reported as
    /// skipped.
    pub fn reject(&mut self, identity: impl Into<String>, reason: impl Into<String>) {
        self.rejected.push(SkippedCandidate {
            identity: identity.into(),
            reason: reason.into(),
        });
    }

    /// Loads every enrolled identity. Records that fail to load are rejected
    /// rather than failing the whole set.
    pub fn from_store<S>(store: &S) -> AppResult<Self>
    where
        S: EmbeddingStore + ?Sized,
    {
        let mut candidates = Self::new();
        for name in store.identities()? {
            match store.fetch(&name) {
                Ok(record) => candidates.insert(name, record.vectors()),
                Err(AppError::NotFound { .. }) => continue,
                Err(err) => {
                    warn!(identity = %name, error = %err, "skipping unreadable identity record");
                    candidates.reject(name, err.to_string());
                }
            }
        }
        Ok(candidates)
    }

    pub fn len(&self) -> usize {
        self.references.len()
    }

    pub fn is_empty(&self) -> bool {
        self.references.is_empty()
    }

    pub fn identities(&self) -> impl Iterator<Item = &str> {
        self.references.keys().map(String::as_str)
    }
}

impl<S: Into<String>> FromIterator<(S, FeatureVector)> for CandidateSet {
    fn from_iter<I: IntoIterator<Item = (S, FeatureVector)>>(iter: I) -> Self {
        let mut candidates = Self::new();
        for (identity, reference) in iter {
            candidates.insert(identity, vec![reference]);
        }
        candidates
    }
}

/// Scores a probe against candidate identities and applies the threshold.
#[derive(Debug, Clone)]
pub struct MatchingEngine {
    threshold: f64,
    dimension: Option<usize>,
}

impl Default for MatchingEngine {
    fn default() -> Self {
        Self {
            threshold: DEFAULT_SIMILARITY_THRESHOLD,
            dimension: None,
        }
    }
}

impl MatchingEngine {
    pub fn new(threshold: f64) -> AppResult<Self> {
        if !threshold.is_finite() || !(-1.0..=1.0).contains(&threshold) {
            return Err(AppError::InvalidThreshold { value: threshold });
        }
        Ok(Self {
            threshold,
            dimension: None,
        })
    }

    /// Deployment dimensionality; probes of any other length are rejected.
    pub fn with_dimension(mut self, dimension: Option<usize>) -> Self {
        self.dimension = dimension;
        self
    }

    pub fn threshold(&self) -> f64 {
        self.threshold
    }

    /// Compares `probe` against every candidate.
    ///
    /// Candidates are scored in parallel. The best identity is chosen in
    /// lexicographic order: a strictly greater score replaces the running best,
    /// so ties go to the earlier name. Candidates whose references cannot be
    /// compared are skipped, never fatal; only an invalid probe fails.
    pub fn compare(&self, probe: &FeatureVector, candidates: &CandidateSet) -> AppResult<MatchOutcome> {
        if let Some(dimension) = self.dimension {
            probe.ensure_dimension(dimension)?;
        }
        nonzero_norm(probe)?;

        let scored: Vec<Result<IdentityScore, SkippedCandidate>> = candidates
            .references
            .par_iter()
            .map(|(identity, references)| score_identity(probe, identity, references))
            .collect();

        let mut scores = Vec::with_capacity(scored.len());
        let mut skipped = candidates.rejected.clone();
        for entry in scored {
            match entry {
                Ok(score) => scores.push(score),
                Err(skip) => {
                    warn!(identity = %skip.identity, reason = %skip.reason, "skipping candidate");
                    skipped.push(skip);
                }
            }
        }

        let mut best: Option<&IdentityScore> = None;
        for score in &scores {
            if best.map_or(true, |current| score.score > current.score) {
                best = Some(score);
            }
        }

        let (result, diagnostic) = match best {
            Some(best) if best.score >= self.threshold => (
                MatchResult::Match {
                    identity: best.identity.clone(),
                    score: best.score,
                },
                None,
            ),
            Some(best) => (
                MatchResult::NoMatch {
                    best_score: best.score,
                },
                None,
            ),
            None if skipped.is_empty() => (
                MatchResult::NoMatch { best_score: 0.0 },
                Some("candidate set is empty".to_string()),
            ),
            None => (
                MatchResult::NoMatch { best_score: 0.0 },
                Some(format!(
                    "all {} candidate(s) skipped; no comparable reference embeddings",
                    skipped.len()
                )),
            ),
        };

        debug!(
            candidates = candidates.len(),
            scored = scores.len(),
            skipped = skipped.len(),
            score = result.score(),
            matched = result.identity().unwrap_or("-"),
            "comparison complete"
        );

        Ok(MatchOutcome {
            result,
            threshold: self.threshold,
            scores,
            skipped,
            diagnostic,
        })
    }
}

/// Best cosine similarity between `probe` and any of `references`.
fn score_identity(
    probe: &FeatureVector,
    identity: &str,
    references: &References,
) -> Result<IdentityScore, SkippedCandidate> {
    let mut best: Option<(f64, usize)> = None;
    let mut last_error = references.invalid.last().cloned();
    let mut skipped_references = references.invalid.len();

    for (idx, reference) in references.vectors.iter().enumerate() {
        match cosine_similarity(probe, reference) {
            Ok(similarity) => {
                if best.map_or(true, |(score, _)| similarity > score) {
                    best = Some((similarity, idx));
                }
            }
            Err(err) => {
                debug!(identity, reference = idx, error = %err, "skipping reference embedding");
                skipped_references += 1;
                last_error = Some(err.to_string());
            }
        }
    }

    match best {
        Some((score, reference_index)) => Ok(IdentityScore {
            identity: identity.to_string(),
            score,
            reference_index,
            skipped_references,
        }),
        None => Err(SkippedCandidate {
            identity: identity.to_string(),
            reason: last_error.unwrap_or_else(|| "no reference embeddings".to_string()),
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::{Embedding, MemoryEmbeddingStore};

    fn vector(values: &[f64]) -> FeatureVector {
        FeatureVector::new(values.to_vec()).unwrap()
    }

    fn abc_candidates() -> CandidateSet {
        [
            ("A", vector(&[1.0, 0.0])),
            ("B", vector(&[0.0, 1.0])),
            ("C", vector(&[0.7071, 0.7071])),
        ]
        .into_iter()
        .collect()
    }

    #[test]
    fn exact_probe_matches_its_identity() {
        let engine = MatchingEngine::default();
        let outcome = engine.compare(&vector(&[1.0, 0.0]), &abc_candidates()).unwrap();

        match outcome.result {
            MatchResult::Match { identity, score } => {
                assert_eq!(identity, "A");
                assert!((score - 1.0).abs() < 1e-9);
            }
            other => panic!("unexpected result: {:?}", other),
        }
        let names: Vec<&str> = outcome.scores.iter().map(|s| s.identity.as_str()).collect();
        assert_eq!(names, vec!["A", "B", "C"]);
        assert!(outcome.scores[1].score.abs() < 1e-9);
        assert!((outcome.scores[2].score - 0.7071).abs() < 1e-3);
    }

    #[test]
    fn diagonal_probe_prefers_diagonal_identity() {
        let engine = MatchingEngine::default();
        let outcome = engine.compare(&vector(&[0.6, 0.8]), &abc_candidates()).unwrap();

        assert_eq!(outcome.result.identity(), Some("C"));
        assert!((outcome.result.score() - 0.98995).abs() < 1e-4);
        assert!((outcome.scores[0].score - 0.6).abs() < 1e-9);
        assert!((outcome.scores[1].score - 0.8).abs() < 1e-9);
    }

    #[test]
    fn threshold_boundary_is_inclusive() {
        // |reference| = sqrt(169 + 225 + 4 + 1 + 1) = 20, so cos = 13 / 20 with no rounding.
        let probe = vector(&[1.0, 0.0, 0.0, 0.0, 0.0]);
        let at_boundary: CandidateSet = [("alice", vector(&[13.0, 15.0, 2.0, 1.0, 1.0]))]
            .into_iter()
            .collect();

        let engine = MatchingEngine::default();
        assert_eq!(engine.threshold(), 0.65);
        let outcome = engine.compare(&probe, &at_boundary).unwrap();
        assert_eq!(
            outcome.result,
            MatchResult::Match {
                identity: "alice".into(),
                score: 0.65,
            }
        );

        let stricter = MatchingEngine::new(0.650_000_1).unwrap();
        assert_eq!(
            stricter.compare(&probe, &at_boundary).unwrap().result,
            MatchResult::NoMatch { best_score: 0.65 }
        );

        // cos = 12 / 20
        let below: CandidateSet = [("alice", vector(&[12.0, 16.0, 0.0, 0.0, 0.0]))]
            .into_iter()
            .collect();
        assert_eq!(
            engine.compare(&probe, &below).unwrap().result,
            MatchResult::NoMatch { best_score: 0.6 }
        );
    }

    #[test]
    fn ties_go_to_first_identity_in_name_order() {
        let candidates: CandidateSet = [
            ("zed", vector(&[1.0, 0.0])),
            ("amy", vector(&[2.0, 0.0])),
            ("mia", vector(&[3.0, 0.0])),
        ]
        .into_iter()
        .collect();

        let outcome = MatchingEngine::default()
            .compare(&vector(&[1.0, 0.0]), &candidates)
            .unwrap();
        assert_eq!(outcome.result.identity(), Some("amy"));
    }

    #[test]
    fn identity_score_is_best_over_references() {
        let mut candidates = CandidateSet::new();
        candidates.insert(
            "alice",
            vec![vector(&[0.0, 1.0]), vector(&[1.0, 0.1]), vector(&[-1.0, 0.0])],
        );

        let outcome = MatchingEngine::default()
            .compare(&vector(&[1.0, 0.0]), &candidates)
            .unwrap();
        assert_eq!(outcome.result.identity(), Some("alice"));
        assert_eq!(outcome.scores[0].reference_index, 1);
    }

    #[test]
    fn mismatched_sole_candidate_is_skipped_not_fatal() {
        let candidates: CandidateSet = [("alice", vector(&[1.0, 0.0, 0.0]))].into_iter().collect();

        let outcome = MatchingEngine::default()
            .compare(&vector(&[1.0, 0.0]), &candidates)
            .unwrap();
        assert_eq!(outcome.result, MatchResult::NoMatch { best_score: 0.0 });
        assert_eq!(outcome.skipped.len(), 1);
        assert!(outcome.skipped[0].reason.contains("dimension mismatch"));
        assert!(outcome.diagnostic.is_some());
    }

    #[test]
    fn corrupted_reference_does_not_hide_other_candidates() {
        let mut candidates = CandidateSet::new();
        candidates.insert("alice", vec![vector(&[1.0, 0.0, 0.0])]);
        candidates.insert("bob", vec![vector(&[0.0, 0.0]), vector(&[0.9, 0.1])]);

        let outcome = MatchingEngine::default()
            .compare(&vector(&[1.0, 0.0]), &candidates)
            .unwrap();
        assert_eq!(outcome.result.identity(), Some("bob"));
        assert_eq!(outcome.skipped.len(), 1);
        assert_eq!(outcome.scores[0].skipped_references, 1);
    }

    #[test]
    fn invalid_reference_counts_against_its_identity_only() {
        let mut candidates = CandidateSet::new();
        candidates.insert("bob", vec![vector(&[1.0, 0.0])]);
        candidates.reject_reference("bob", "vector has no components");
        candidates.reject_reference("carol", "vector has no components");

        let outcome = MatchingEngine::default()
            .compare(&vector(&[1.0, 0.0]), &candidates)
            .unwrap();
        assert_eq!(outcome.result.identity(), Some("bob"));
        assert_eq!(outcome.scores.len(), 1);
        assert_eq!(outcome.scores[0].skipped_references, 1);
        assert_eq!(
            outcome.skipped,
            vec![SkippedCandidate {
                identity: "carol".into(),
                reason: "vector has no components".into(),
            }]
        );
    }

    #[test]
    fn below_threshold_reports_best_score() {
        let outcome = MatchingEngine::default()
            .compare(&vector(&[0.0, 1.0]), &[("A", vector(&[1.0, 0.2]))].into_iter().collect())
            .unwrap();
        match outcome.result {
            MatchResult::NoMatch { best_score } => assert!(best_score > 0.1 && best_score < 0.65),
            other => panic!("unexpected result: {:?}", other),
        }
        assert!(outcome.diagnostic.is_none());
    }

    #[test]
    fn invalid_probe_is_fatal() {
        let engine = MatchingEngine::default().with_dimension(Some(3));
        let err = engine
            .compare(&vector(&[1.0, 0.0]), &abc_candidates())
            .unwrap_err();
        assert!(matches!(
            err,
            AppError::DimensionMismatch {
                expected: 3,
                found: 2
            }
        ));

        let err = MatchingEngine::default()
            .compare(&vector(&[0.0, 0.0]), &abc_candidates())
            .unwrap_err();
        assert!(matches!(err, AppError::DegenerateVector));
    }

    #[test]
    fn empty_candidate_set_is_no_match() {
        let outcome = MatchingEngine::default()
            .compare(&vector(&[1.0]), &CandidateSet::new())
            .unwrap();
        assert_eq!(outcome.result, MatchResult::NoMatch { best_score: 0.0 });
        assert_eq!(outcome.diagnostic.as_deref(), Some("candidate set is empty"));
    }

    #[test]
    fn thresholds_outside_cosine_range_are_rejected() {
        match MatchingEngine::new(1.5).unwrap_err() {
            AppError::InvalidThreshold { value } => assert_eq!(value, 1.5),
            other => panic!("unexpected error: {other}"),
        }
        assert!(matches!(
            MatchingEngine::new(f64::NAN),
            Err(AppError::InvalidThreshold { .. })
        ));
        assert!(!AppError::InvalidThreshold { value: 2.0 }.is_retryable_capture());
        assert_eq!(MatchingEngine::new(0.9).unwrap().threshold(), 0.9);
    }

    #[test]
    fn candidates_load_from_store() {
        let store = MemoryEmbeddingStore::new();
        store
            .persist(
                "carol",
                &[
                    Embedding::new(vector(&[0.0, 1.0]), "left"),
                    Embedding::new(vector(&[1.0, 0.0]), "right"),
                ],
            )
            .unwrap();
        store
            .persist("dave", &[Embedding::new(vector(&[-1.0, 0.0]), "left")])
            .unwrap();

        let candidates = CandidateSet::from_store(&store).unwrap();
        assert_eq!(candidates.identities().collect::<Vec<_>>(), vec!["carol", "dave"]);

        let outcome = MatchingEngine::default()
            .compare(&vector(&[1.0, 0.0]), &candidates)
            .unwrap();
        assert_eq!(outcome.result.identity(), Some("carol"));
    }
}
