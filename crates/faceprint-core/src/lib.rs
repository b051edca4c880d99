//! Pose-guided face enrollment and verification.
//!
//! An [`EnrollmentSession`] walks a caller through a fixed pose sequence and
//! commits the captured embeddings to an [`EmbeddingStore`]; a
//! [`MatchingEngine`] later scores probe embeddings against enrolled
//! identities.

pub mod embedder;
pub mod enrollment;
pub mod errors;
pub mod keys;
pub mod matching;
pub mod store;
pub mod vector;

pub use embedder::{Embedder, FacePayload, FacePayloadRecord, FeaturePayloadEmbedder, TimedEmbedder};
pub use enrollment::{
    default_pose_sequence, CaptureProgress, EnrollmentSession, SessionStatus,
    DEFAULT_POSE_SEQUENCE,
};
pub use errors::{AppError, AppResult, ExtractionError};
pub use keys::{load_key_file, write_key_file, EmbeddingKey};
pub use matching::{
    CandidateSet, IdentityScore, MatchOutcome, MatchResult, MatchingEngine, SkippedCandidate,
    DEFAULT_SIMILARITY_THRESHOLD,
};
pub use store::{
    validate_identity_name, Embedding, EmbeddingStore, EnvStoreDirResolver,
    FilesystemEmbeddingStore, IdentityRecord, IdentityRecords, MemoryEmbeddingStore,
    StoreDirResolver,
};
pub use vector::{cosine_similarity, FeatureVector};
