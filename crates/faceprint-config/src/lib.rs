use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;
use thiserror::Error;

pub use faceprint_core::{default_pose_sequence, DEFAULT_POSE_SEQUENCE, DEFAULT_SIMILARITY_THRESHOLD};

pub const PRIMARY_CONFIG_PATH: &str = "/etc/faceprint/config.toml";
pub const SECONDARY_CONFIG_PATH: &str = "/usr/local/etc/faceprint/config.toml";
pub const DEFAULT_EXTRACT_TIMEOUT_SECS: u64 = 5;
pub const DEFAULT_STORE_DIR: &str = "/var/lib/faceprint/identities";

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(deny_unknown_fields)]
pub struct ConfigFile {
    pub similarity_threshold: Option<f64>,
    pub embedding_store_dir: Option<PathBuf>,
    pub embedding_dim: Option<usize>,
    pub pose_sequence: Option<Vec<String>>,
    pub extract_timeout_secs: Option<u64>,
    pub store_key_file: Option<PathBuf>,
}

#[derive(Debug, Clone)]
pub struct ResolvedConfig {
    pub similarity_threshold: f64,
    pub embedding_store_dir: PathBuf,
    pub embedding_dim: Option<usize>,
    pub pose_sequence: Vec<String>,
    pub extract_timeout: Duration,
    pub store_key_file: Option<PathBuf>,
}

impl ResolvedConfig {
    pub fn from_raw(raw: ConfigFile) -> Self {
        Self {
            similarity_threshold: raw
                .similarity_threshold
                .unwrap_or(DEFAULT_SIMILARITY_THRESHOLD),
            embedding_store_dir: raw
                .embedding_store_dir
                .unwrap_or_else(|| PathBuf::from(DEFAULT_STORE_DIR)),
            embedding_dim: raw.embedding_dim.filter(|dim| *dim > 0),
            pose_sequence: raw
                .pose_sequence
                .filter(|poses| !poses.is_empty())
                .unwrap_or_else(default_pose_sequence),
            extract_timeout: Duration::from_secs(
                raw.extract_timeout_secs
                    .unwrap_or(DEFAULT_EXTRACT_TIMEOUT_SECS)
                    .max(1),
            ),
            store_key_file: raw.store_key_file,
        }
    }
}

impl Default for ResolvedConfig {
    fn default() -> Self {
        Self::from_raw(ConfigFile::default())
    }
}

#[derive(Debug, Clone)]
pub struct LoadedConfig {
    pub contents: ConfigFile,
    pub source: PathBuf,
}

impl LoadedConfig {
    pub fn new(contents: ConfigFile, source: PathBuf) -> Self {
        Self { contents, source }
    }

    pub fn source(&self) -> &Path {
        &self.source
    }
}

#[derive(Debug, Clone)]
pub struct ResolvedConfigWithSource {
    pub resolved: ResolvedConfig,
    pub source: Option<PathBuf>,
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("failed to parse {path}: {message}")]
    Parse { path: PathBuf, message: String },
}

pub fn default_paths() -> [PathBuf; 2] {
    [
        PathBuf::from(PRIMARY_CONFIG_PATH),
        PathBuf::from(SECONDARY_CONFIG_PATH),
    ]
}

pub fn load_resolved_config() -> Result<ResolvedConfigWithSource, ConfigError> {
    load_resolved_from_paths(&default_paths())
}

/// Parses the first existing file in `paths`; missing files are skipped.
pub fn load_from_paths(paths: &[PathBuf]) -> Result<Option<LoadedConfig>, ConfigError> {
    for path in paths {
        match fs::read_to_string(path) {
            Ok(contents) => {
                let parsed =
                    toml::from_str::<ConfigFile>(&contents).map_err(|err| ConfigError::Parse {
                        path: path.clone(),
                        message: err.to_string(),
                    })?;
                return Ok(Some(LoadedConfig::new(parsed, path.clone())));
            }
            Err(err) if err.kind() == io::ErrorKind::NotFound => continue,
            Err(err) => {
                return Err(ConfigError::Read {
                    path: path.clone(),
                    source: err,
                })
            }
        }
    }

    Ok(None)
}

pub fn load_resolved_from_paths(
    paths: &[PathBuf],
) -> Result<ResolvedConfigWithSource, ConfigError> {
    match load_from_paths(paths)? {
        Some(entry) => Ok(ResolvedConfigWithSource {
            resolved: ResolvedConfig::from_raw(entry.contents),
            source: Some(entry.source),
        }),
        None => Ok(ResolvedConfigWithSource {
            resolved: ResolvedConfig::default(),
            source: None,
        }),
    }
}
