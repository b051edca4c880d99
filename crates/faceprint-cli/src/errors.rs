pub use faceprint_core::errors::{AppError, AppResult, ExtractionError};
