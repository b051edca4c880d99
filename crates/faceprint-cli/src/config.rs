use std::path::{Path, PathBuf};

use faceprint_config::{ConfigError, ResolvedConfig};
use faceprint_core::{
    load_key_file, EnvStoreDirResolver, FilesystemEmbeddingStore, MatchingEngine,
    StoreDirResolver,
};

use crate::cli::StoreArgs;
use crate::errors::{AppError, AppResult};

pub fn load_settings() -> AppResult<ResolvedConfig> {
    let loaded = faceprint_config::load_resolved_config().map_err(map_config_error)?;
    if let Some(source) = &loaded.source {
        tracing::debug!(path = %source.display(), "loaded configuration");
    }
    Ok(loaded.resolved)
}

pub fn load_settings_from(paths: &[PathBuf]) -> AppResult<ResolvedConfig> {
    faceprint_config::load_resolved_from_paths(paths)
        .map(|loaded| loaded.resolved)
        .map_err(map_config_error)
}

pub fn map_config_error(err: ConfigError) -> AppError {
    match err {
        ConfigError::Read { path, source } => AppError::ConfigRead { path, source },
        ConfigError::Parse { path, message } => AppError::ConfigParse { path, message },
    }
}

/// Flag, then `$FACEPRINT_STORE_DIR`, then the configured directory.
pub fn resolve_store_dir(args: &StoreArgs, settings: &ResolvedConfig) -> PathBuf {
    EnvStoreDirResolver {
        fallback: settings.embedding_store_dir.clone(),
    }
    .resolve(args.store_dir.as_deref())
}

pub fn open_store(args: &StoreArgs, settings: &ResolvedConfig) -> AppResult<FilesystemEmbeddingStore> {
    let dir = resolve_store_dir(args, settings);
    let key_file = args
        .key_file
        .as_deref()
        .or(settings.store_key_file.as_deref());
    let key = key_file.map(load_key_file).transpose()?;
    tracing::debug!(
        dir = %dir.display(),
        encrypted = key.is_some(),
        "opening embedding store"
    );
    Ok(FilesystemEmbeddingStore::new(dir).with_key(key))
}

pub fn build_engine(threshold: Option<f64>, settings: &ResolvedConfig) -> AppResult<MatchingEngine> {
    let engine = MatchingEngine::new(threshold.unwrap_or(settings.similarity_threshold))?;
    Ok(engine.with_dimension(settings.embedding_dim))
}

pub fn describe_store(dir: &Path, encrypted: bool) -> String {
    if encrypted {
        format!("{} (encrypted)", dir.display())
    } else {
        dir.display().to_string()
    }
}
