use std::fmt;

use serde::Serialize;
use tracing::{info, warn};

use crate::embedder::Embedder;
use crate::errors::{AppError, AppResult};
use crate::store::{validate_identity_name, Embedding, EmbeddingStore};
use crate::vector::{nonzero_norm, FeatureVector};

pub const DEFAULT_POSE_SEQUENCE: [&str; 5] = [
    "Turn Right",
    "Turn Left",
    "Look Up",
    "Look Down",
    "Look Center",
];

pub fn default_pose_sequence() -> Vec<String> {
    DEFAULT_POSE_SEQUENCE.iter().map(|pose| pose.to_string()).collect()
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum SessionStatus {
    AwaitingPose { step: usize },
    /// All poses captured. `persisted` is false while the final write is
    /// outstanding.
    Completed { persisted: bool },
    Aborted,
}

impl SessionStatus {
    pub fn label(&self) -> &'static str {
        match self {
            SessionStatus::AwaitingPose { .. } => "in progress",
            SessionStatus::Completed { .. } => "completed",
            SessionStatus::Aborted => "aborted",
        }
    }
}

impl fmt::Display for SessionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// Result of a successful capture.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum CaptureProgress {
    #[serde(rename = "ok")]
    Next {
        #[serde(rename = "nextPose")]
        next_pose: String,
    },
    Done,
}

/// Capture protocol for one identity.
///
/// The session is an owned value; callers that serve several clients keep
/// one session per client and never share one between them.
#[derive(Debug, Clone)]
pub struct EnrollmentSession {
    identity: String,
    poses: Vec<String>,
    buffer: Vec<Embedding>,
    status: SessionStatus,
    dimension: Option<usize>,
}

impl EnrollmentSession {
    pub fn start(identity: &str, poses: Vec<String>) -> AppResult<Self> {
        let identity = identity.trim();
        validate_identity_name(identity)?;
        validate_pose_sequence(&poses)?;

        info!(identity, poses = poses.len(), "enrollment session started");
        Ok(Self {
            identity: identity.to_string(),
            poses,
            buffer: Vec::new(),
            status: SessionStatus::AwaitingPose { step: 0 },
            dimension: None,
        })
    }

    /// Requires every capture to have exactly `dimension` components.
    pub fn with_dimension(mut self, dimension: Option<usize>) -> Self {
        if self.buffer.is_empty() {
            self.dimension = dimension;
        }
        self
    }

    pub fn identity(&self) -> &str {
        &self.identity
    }

    pub fn poses(&self) -> &[String] {
        &self.poses
    }

    pub fn status(&self) -> SessionStatus {
        self.status
    }

    pub fn step(&self) -> usize {
        self.buffer.len()
    }

    pub fn captured(&self) -> &[Embedding] {
        &self.buffer
    }

    pub fn remaining(&self) -> usize {
        self.poses.len() - self.buffer.len()
    }

    pub fn current_pose(&self) -> Option<&str> {
        match self.status {
            SessionStatus::AwaitingPose { step } => self.poses.get(step).map(String::as_str),
            SessionStatus::Completed { .. } | SessionStatus::Aborted => None,
        }
    }

    /// Extracts an embedding from `image` for the current pose.
    ///
    /// Extraction and vector errors leave the step and buffer untouched so the
    /// same pose can be retried. The final capture persists the whole buffer;
    /// when that write fails the session stays completed and
    /// [`EnrollmentSession::retry_persist`] can be used.
    pub fn submit_capture<E, S>(
        &mut self,
        image: &[u8],
        embedder: &E,
        store: &S,
    ) -> AppResult<CaptureProgress>
    where
        E: Embedder + ?Sized,
        S: EmbeddingStore + ?Sized,
    {
        let progress = self.capture(image, embedder)?;
        if progress == CaptureProgress::Done {
            self.commit(store)?;
        }
        Ok(progress)
    }

    /// Buffers one capture without touching the store.
    ///
    /// After the final pose the session is `Completed { persisted: false }`
    /// until [`EnrollmentSession::retry_persist`] writes it.
    pub fn capture<E>(&mut self, image: &[u8], embedder: &E) -> AppResult<CaptureProgress>
    where
        E: Embedder + ?Sized,
    {
        let SessionStatus::AwaitingPose { step } = self.status else {
            return Err(AppError::SessionClosed {
                identity: self.identity.clone(),
                status: self.status.label(),
            });
        };
        let pose = self.poses[step].clone();

        let vector = match self.embed(image, embedder) {
            Ok(vector) => vector,
            Err(err) => {
                warn!(identity = %self.identity, pose = %pose, error = %err, "capture rejected");
                return Err(err);
            }
        };

        self.dimension.get_or_insert(vector.dimension());
        self.buffer.push(Embedding::new(vector, pose.as_str()));
        info!(
            identity = %self.identity,
            pose = %pose,
            step = self.buffer.len(),
            total = self.poses.len(),
            "pose captured"
        );

        if self.buffer.len() < self.poses.len() {
            self.status = SessionStatus::AwaitingPose {
                step: self.buffer.len(),
            };
            return Ok(CaptureProgress::Next {
                next_pose: self.poses[self.buffer.len()].clone(),
            });
        }

        self.status = SessionStatus::Completed { persisted: false };
        Ok(CaptureProgress::Done)
    }

    /// Writes the buffer of a completed session; a no-op once persisted.
    pub fn retry_persist<S>(&mut self, store: &S) -> AppResult<()>
    where
        S: EmbeddingStore + ?Sized,
    {
        match self.status {
            SessionStatus::Completed { persisted: false } => self.commit(store),
            SessionStatus::Completed { persisted: true } => Ok(()),
            status => Err(AppError::EnrollmentIncomplete {
                identity: self.identity.clone(),
                remaining: match status {
                    SessionStatus::AwaitingPose { step } => self.poses.len() - step,
                    _ => self.poses.len(),
                },
            }),
        }
    }

    /// Discards captured embeddings. Completed sessions are left alone.
    pub fn abort(&mut self) {
        if let SessionStatus::AwaitingPose { step } = self.status {
            info!(identity = %self.identity, step, "enrollment session aborted");
            self.buffer.clear();
            self.status = SessionStatus::Aborted;
        }
    }

    fn embed<E>(&self, image: &[u8], embedder: &E) -> AppResult<FeatureVector>
    where
        E: Embedder + ?Sized,
    {
        let values = embedder.extract(image)?;
        let vector = match self.dimension {
            Some(dimension) => FeatureVector::with_dimension(values, dimension)?,
            None => FeatureVector::new(values)?,
        };
        nonzero_norm(&vector)?;
        Ok(vector)
    }

    fn commit<S>(&mut self, store: &S) -> AppResult<()>
    where
        S: EmbeddingStore + ?Sized,
    {
        if let Err(err) = store.persist(&self.identity, &self.buffer) {
            warn!(identity = %self.identity, error = %err, "failed to persist enrollment");
            return Err(err);
        }
        self.status = SessionStatus::Completed { persisted: true };
        info!(
            identity = %self.identity,
            embeddings = self.buffer.len(),
            "enrollment persisted"
        );
        Ok(())
    }
}

pub fn validate_pose_sequence(poses: &[String]) -> AppResult<()> {
    if poses.is_empty() {
        return Err(AppError::InvalidPoseSequence(
            "at least one pose is required".into(),
        ));
    }
    if let Some(idx) = poses.iter().position(|pose| pose.trim().is_empty()) {
        return Err(AppError::InvalidPoseSequence(format!(
            "pose #{idx} has an empty label"
        )));
    }
    Ok(())
}
