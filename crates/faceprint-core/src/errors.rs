use std::io;
use std::path::PathBuf;
use std::process::ExitCode;
use std::time::Duration;

use thiserror::Error;

/// Failure reported by an [`crate::embedder::Embedder`] for a single image.
#[derive(Debug, Clone, Error, PartialEq)]
pub enum ExtractionError {
    #[error("no face detected in image")]
    NoFaceDetected,

    #[error("ambiguous image: {count} faces detected")]
    AmbiguousFace { count: usize },

    #[error("embedding model failed: {0}")]
    Model(String),

    #[error("embedding extraction timed out after {0:?}")]
    Timeout(Duration),
}

#[derive(Debug, Error)]
pub enum AppError {
    #[error("invalid identity name '{name}': {message}")]
    InvalidIdentity { name: String, message: String },

    #[error("invalid pose sequence: {0}")]
    InvalidPoseSequence(String),

    #[error("embedding extraction failed: {0}")]
    Extraction(#[from] ExtractionError),

    #[error("embedding dimension mismatch: expected {expected} values, found {found}")]
    DimensionMismatch { expected: usize, found: usize },

    #[error("degenerate vector: norm is zero")]
    DegenerateVector,

    #[error("invalid feature vector: {0}")]
    InvalidVector(String),

    #[error("similarity threshold {value} outside [-1, 1]")]
    InvalidThreshold { value: f64 },

    #[error("failed to persist embedding store {path}: {source}")]
    Persistence {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("failed to read embedding store {path}: {source}")]
    StoreRead {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("embedding store {path} is invalid: {message}")]
    InvalidStoreFile { path: PathBuf, message: String },

    #[error("no enrolled embeddings found for identity {identity}")]
    NotFound { identity: String },

    #[error("enrollment session for {identity} is {status} and accepts no captures")]
    SessionClosed {
        identity: String,
        status: &'static str,
    },

    #[error("no active enrollment session with token {token}")]
    SessionNotFound { token: String },

    #[error("enrollment session {token} is busy with another request")]
    CaptureInProgress { token: String },

    #[error("enrollment for {identity} incomplete: {remaining} pose(s) still required")]
    EnrollmentIncomplete { identity: String, remaining: usize },

    #[error("input file not found or unreadable: {path}")]
    MissingInput { path: PathBuf },

    #[error("invalid candidate set {path}: {message}")]
    InvalidCandidates { path: PathBuf, message: String },

    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("failed to read configuration file {path}: {source}")]
    ConfigRead {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("invalid configuration file {path}: {message}")]
    ConfigParse { path: PathBuf, message: String },

    #[error("embedding store {path} is encrypted and requires a key")]
    EncryptedStoreRequiresKey { path: PathBuf },

    #[error("embedding encryption error: {0}")]
    Encryption(String),

    #[error("embedding key {path} invalid: {message}")]
    InvalidKey { path: PathBuf, message: String },
}

impl AppError {
    pub fn exit_code(&self) -> ExitCode {
        match self {
            AppError::InvalidIdentity { .. } => ExitCode::from(2),
            AppError::InvalidPoseSequence(_) => ExitCode::from(2),
            AppError::Extraction(_) => ExitCode::from(3),
            AppError::DimensionMismatch { .. } => ExitCode::from(3),
            AppError::DegenerateVector => ExitCode::from(3),
            AppError::InvalidVector(_) => ExitCode::from(3),
            AppError::InvalidThreshold { .. } => ExitCode::from(2),
            AppError::Persistence { .. } => ExitCode::from(5),
            AppError::StoreRead { .. } => ExitCode::from(2),
            AppError::InvalidStoreFile { .. } => ExitCode::from(2),
            AppError::NotFound { .. } => ExitCode::from(4),
            AppError::SessionClosed { .. } => ExitCode::from(2),
            AppError::SessionNotFound { .. } => ExitCode::from(4),
            AppError::CaptureInProgress { .. } => ExitCode::from(2),
            AppError::EnrollmentIncomplete { .. } => ExitCode::from(3),
            AppError::MissingInput { .. } => ExitCode::from(2),
            AppError::InvalidCandidates { .. } => ExitCode::from(2),
            AppError::ConfigRead { .. } => ExitCode::from(2),
            AppError::ConfigParse { .. } => ExitCode::from(2),
            AppError::EncryptedStoreRequiresKey { .. } => ExitCode::from(2),
            AppError::Encryption(_) => ExitCode::from(2),
            AppError::InvalidKey { .. } => ExitCode::from(2),
            _ => ExitCode::from(1),
        }
    }

    /// Whether a retry of the same capture might succeed.
    pub fn is_retryable_capture(&self) -> bool {
        matches!(
            self,
            AppError::Extraction(_)
                | AppError::DimensionMismatch { .. }
                | AppError::DegenerateVector
                | AppError::InvalidVector(_)
        )
    }

    pub fn human_message(&self) -> String {
        self.to_string()
    }
}

pub type AppResult<T> = Result<T, AppError>;
