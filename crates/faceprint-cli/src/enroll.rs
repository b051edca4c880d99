use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use serde::Serialize;
use uuid::Uuid;

use faceprint_core::{
    CaptureProgress, Embedder, EmbeddingStore, FeaturePayloadEmbedder, FilesystemEmbeddingStore,
    TimedEmbedder,
};

use crate::cli::EnrollArgs;
use crate::config;
use crate::errors::{AppError, AppResult};
use crate::identities::EmbeddingSummary;
use crate::sessions::SessionRegistry;

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RejectedCapture {
    pub path: PathBuf,
    pub pose: String,
    pub reason: String,
}

#[derive(Debug, Clone)]
pub struct EnrollOutcome {
    pub identity: String,
    pub store_path: PathBuf,
    pub embeddings: Vec<EmbeddingSummary>,
    pub rejected: Vec<RejectedCapture>,
    pub logs: Vec<String>,
}

pub fn run_enroll(args: &EnrollArgs) -> AppResult<EnrollOutcome> {
    let settings = config::load_settings()?;
    let store = Arc::new(config::open_store(&args.store, &settings)?);
    let embedder: Arc<dyn Embedder> = Arc::new(TimedEmbedder::new(
        Arc::new(FeaturePayloadEmbedder),
        settings.extract_timeout,
    ));
    let poses = args
        .poses
        .clone()
        .unwrap_or_else(|| settings.pose_sequence.clone());
    let registry = SessionRegistry::new(embedder, store.clone(), poses)
        .with_dimension(settings.embedding_dim);

    run_enroll_with(args, &registry, &store)
}

/// Feeds the capture files to one session in order until every pose is
/// covered. Rejected captures are reported and the same pose is retried with
/// the next file.
pub fn run_enroll_with(
    args: &EnrollArgs,
    registry: &SessionRegistry,
    store: &FilesystemEmbeddingStore,
) -> AppResult<EnrollOutcome> {
    let started = registry.start(&args.user)?;
    let token = started.session_token;
    let identity = args.user.trim().to_string();
    let total = registry.poses().len();

    let mut logs = vec![format!(
        "Enrolling {identity} into {} ({total} pose(s))",
        config::describe_store(store.dir(), store.is_encrypted())
    )];
    let mut rejected = Vec::new();
    let mut pose = started.next_pose;
    let mut accepted = 0usize;
    let mut done = false;

    for path in &args.captures {
        let image = match read_capture(path) {
            Ok(image) => image,
            Err(err) => {
                abandon(registry, token);
                return Err(err);
            }
        };
        match registry.submit(token, &image) {
            Ok(progress) => {
                accepted += 1;
                logs.push(format!(
                    "[{accepted}/{total}] {pose}: accepted {}",
                    path.display()
                ));
                match progress {
                    CaptureProgress::Next { next_pose } => pose = next_pose,
                    CaptureProgress::Done => {
                        done = true;
                        break;
                    }
                }
            }
            Err(err) if err.is_retryable_capture() => {
                logs.push(format!("{pose}: rejected {} ({err})", path.display()));
                rejected.push(RejectedCapture {
                    path: path.clone(),
                    pose: pose.clone(),
                    reason: err.to_string(),
                });
            }
            Err(AppError::Persistence { path, source }) => {
                tracing::warn!(
                    path = %path.display(),
                    error = %source,
                    "final write failed; retrying once"
                );
                logs.push(format!("Write to {} failed; retrying", path.display()));
                registry.retry_persist(token)?;
                done = true;
                break;
            }
            Err(err) => {
                abandon(registry, token);
                return Err(err);
            }
        }
    }

    if !done {
        abandon(registry, token);
        return Err(AppError::EnrollmentIncomplete {
            identity,
            remaining: total - accepted,
        });
    }

    let record = store.fetch(&identity)?;
    Ok(EnrollOutcome {
        store_path: store.record_path(&identity),
        embeddings: record.embeddings.iter().map(EmbeddingSummary::from).collect(),
        identity,
        rejected,
        logs,
    })
}

fn abandon(registry: &SessionRegistry, token: Uuid) {
    if let Err(err) = registry.abort(token) {
        tracing::debug!(%token, error = %err, "failed to abort enrollment session");
    }
}

fn read_capture(path: &Path) -> AppResult<Vec<u8>> {
    fs::read(path).map_err(|_| AppError::MissingInput {
        path: path.to_path_buf(),
    })
}
