use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use faceprint_core::{
    CandidateSet, Embedder, FeaturePayloadEmbedder, FeatureVector, MatchOutcome, MatchingEngine,
    TimedEmbedder,
};

use crate::candidates::load_candidates;
use crate::cli::RecognizeArgs;
use crate::config;
use crate::errors::{AppError, AppResult};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CandidateSource {
    Store(PathBuf),
    File(PathBuf),
}

impl CandidateSource {
    pub fn describe(&self) -> String {
        match self {
            CandidateSource::Store(dir) => format!("enrolled identities in {}", dir.display()),
            CandidateSource::File(path) => format!("candidate file {}", path.display()),
        }
    }
}

#[derive(Debug, Clone)]
pub struct RecognizeOutcome {
    pub probe: PathBuf,
    pub source: CandidateSource,
    pub outcome: MatchOutcome,
    pub logs: Vec<String>,
}

pub fn run_recognize(args: &RecognizeArgs) -> AppResult<RecognizeOutcome> {
    let settings = config::load_settings()?;
    let engine = config::build_engine(args.threshold, &settings)?;
    let embedder = TimedEmbedder::new(Arc::new(FeaturePayloadEmbedder), settings.extract_timeout);

    let (source, candidates) = match &args.candidates {
        Some(path) => (CandidateSource::File(path.clone()), load_candidates(path)?),
        None => {
            let store = config::open_store(&args.store, &settings)?;
            let candidates = CandidateSet::from_store(&store)?;
            (CandidateSource::Store(store.dir().to_path_buf()), candidates)
        }
    };

    run_recognize_with(&args.probe, &embedder, &engine, source, &candidates)
}

pub fn run_recognize_with<E>(
    probe_path: &Path,
    embedder: &E,
    engine: &MatchingEngine,
    source: CandidateSource,
    candidates: &CandidateSet,
) -> AppResult<RecognizeOutcome>
where
    E: Embedder + ?Sized,
{
    let image = fs::read(probe_path).map_err(|_| AppError::MissingInput {
        path: probe_path.to_path_buf(),
    })?;
    let probe = FeatureVector::new(embedder.extract(&image)?)?;

    let mut logs = vec![format!(
        "Comparing {} ({} values) against {} identity(ies) from {}",
        probe_path.display(),
        probe.dimension(),
        candidates.len(),
        source.describe()
    )];

    let outcome = engine.compare(&probe, candidates)?;
    for score in &outcome.scores {
        logs.push(format!(
            "{}: {:.4} (reference #{})",
            score.identity, score.score, score.reference_index
        ));
    }
    for skipped in &outcome.skipped {
        logs.push(format!("{}: skipped ({})", skipped.identity, skipped.reason));
    }
    if let Some(diagnostic) = &outcome.diagnostic {
        logs.push(diagnostic.clone());
    }

    Ok(RecognizeOutcome {
        probe: probe_path.to_path_buf(),
        source,
        outcome,
        logs,
    })
}
