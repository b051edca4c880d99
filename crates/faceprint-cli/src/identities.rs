use std::path::PathBuf;

use serde::Serialize;

use faceprint_core::{Embedding, EmbeddingStore, FilesystemEmbeddingStore};

use crate::cli::{IdentityArgs, StoreArgs};
use crate::config;
use crate::errors::{AppError, AppResult};

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct EmbeddingSummary {
    pub id: String,
    pub pose: String,
    pub captured_at: String,
    pub dimension: usize,
}

impl From<&Embedding> for EmbeddingSummary {
    fn from(embedding: &Embedding) -> Self {
        Self {
            id: embedding.id.clone(),
            pose: embedding.pose.clone(),
            captured_at: embedding.captured_at.clone(),
            dimension: embedding.vector.dimension(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct IdentityListOutcome {
    pub store_dir: PathBuf,
    pub identities: Vec<String>,
    pub logs: Vec<String>,
}

#[derive(Debug, Clone)]
pub struct IdentityShowOutcome {
    pub identity: String,
    pub store_path: PathBuf,
    pub embeddings: Vec<EmbeddingSummary>,
    pub logs: Vec<String>,
}

#[derive(Debug, Clone)]
pub struct IdentityRemoveOutcome {
    pub identity: String,
    pub store_path: PathBuf,
    pub logs: Vec<String>,
}

pub fn run_list(args: &StoreArgs) -> AppResult<IdentityListOutcome> {
    let settings = config::load_settings()?;
    let store = config::open_store(args, &settings)?;
    list_identities(&store)
}

pub fn run_show(args: &IdentityArgs) -> AppResult<IdentityShowOutcome> {
    let settings = config::load_settings()?;
    let store = config::open_store(&args.store, &settings)?;
    show_identity(&store, &args.name)
}

pub fn run_remove(args: &IdentityArgs) -> AppResult<IdentityRemoveOutcome> {
    let settings = config::load_settings()?;
    let store = config::open_store(&args.store, &settings)?;
    remove_identity(&store, &args.name)
}

pub fn list_identities(store: &FilesystemEmbeddingStore) -> AppResult<IdentityListOutcome> {
    let identities = store.identities()?;
    let logs = vec![format!(
        "{} identity record(s) in {}",
        identities.len(),
        config::describe_store(store.dir(), store.is_encrypted())
    )];
    Ok(IdentityListOutcome {
        store_dir: store.dir().to_path_buf(),
        identities,
        logs,
    })
}

pub fn show_identity(store: &FilesystemEmbeddingStore, name: &str) -> AppResult<IdentityShowOutcome> {
    let identity = name.trim();
    let record = store.fetch(identity)?;
    let embeddings: Vec<EmbeddingSummary> =
        record.embeddings.iter().map(EmbeddingSummary::from).collect();
    let logs = embeddings
        .iter()
        .map(|embedding| {
            format!(
                "{} {} ({} values, captured {})",
                embedding.id, embedding.pose, embedding.dimension, embedding.captured_at
            )
        })
        .collect();
    Ok(IdentityShowOutcome {
        identity: record.name,
        store_path: store.record_path(identity),
        embeddings,
        logs,
    })
}

pub fn remove_identity(
    store: &FilesystemEmbeddingStore,
    name: &str,
) -> AppResult<IdentityRemoveOutcome> {
    let identity = name.trim();
    if !store.remove(identity)? {
        return Err(AppError::NotFound {
            identity: identity.to_string(),
        });
    }
    let store_path = store.record_path(identity);
    Ok(IdentityRemoveOutcome {
        identity: identity.to_string(),
        logs: vec![format!("Deleted {}", store_path.display())],
        store_path,
    })
}
