use std::path::PathBuf;

use faceprint_core::{write_key_file, EmbeddingKey};

use crate::cli::KeygenArgs;
use crate::errors::{AppError, AppResult};

#[derive(Debug, Clone)]
pub struct KeygenOutcome {
    pub path: PathBuf,
    pub replaced: bool,
    pub logs: Vec<String>,
}

pub fn run_keygen(args: &KeygenArgs) -> AppResult<KeygenOutcome> {
    let exists = args.output.exists();
    if exists && !args.force {
        return Err(AppError::InvalidKey {
            path: args.output.clone(),
            message: "file already exists; pass --force to replace it".into(),
        });
    }

    write_key_file(&args.output, &EmbeddingKey::generate())?;
    tracing::info!(path = %args.output.display(), "generated embedding key");

    let mut logs = Vec::new();
    if exists {
        logs.push(format!("Replaced existing key {}", args.output.display()));
        logs.push("Records encrypted with the previous key can no longer be read".into());
    }
    Ok(KeygenOutcome {
        path: args.output.clone(),
        replaced: exists,
        logs,
    })
}
