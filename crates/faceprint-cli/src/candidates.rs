use std::fs;
use std::path::Path;

use serde::Deserialize;

use faceprint_core::{CandidateSet, FeatureVector};

use crate::errors::{AppError, AppResult};

/// Candidate entry as supplied by clients: one reference per entry, several
/// entries may share a name.
#[derive(Debug, Clone, Deserialize)]
pub struct CandidateEntry {
    pub name: String,
    pub embedding: Vec<f64>,
}

/// Reads `[{"name", "embedding"}]` and groups references by name.
///
/// A malformed file fails as a whole. Entries whose vector is empty or
/// non-finite count as unusable references of their identity, which is
/// skipped only when it has no usable reference left.
pub fn load_candidates(path: &Path) -> AppResult<CandidateSet> {
    let contents = fs::read(path).map_err(|_| AppError::MissingInput {
        path: path.to_path_buf(),
    })?;
    let entries: Vec<CandidateEntry> =
        serde_json::from_slice(&contents).map_err(|err| AppError::InvalidCandidates {
            path: path.to_path_buf(),
            message: err.to_string(),
        })?;
    candidates_from_entries(entries)
        .map_err(|message| AppError::InvalidCandidates {
            path: path.to_path_buf(),
            message,
        })
}

pub fn candidates_from_entries(entries: Vec<CandidateEntry>) -> Result<CandidateSet, String> {
    let mut set = CandidateSet::new();
    for (idx, entry) in entries.into_iter().enumerate() {
        let name = entry.name.trim();
        if name.is_empty() {
            return Err(format!("entry #{idx} has an empty name"));
        }
        match FeatureVector::new(entry.embedding) {
            Ok(vector) => set.insert(name, vec![vector]),
            Err(err) => {
                tracing::warn!(identity = name, error = %err, "ignoring candidate reference");
                set.reject_reference(name, err.to_string());
            }
        }
    }
    Ok(set)
}
