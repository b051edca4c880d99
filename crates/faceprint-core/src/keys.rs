use std::fs;
use std::io::Write;
use std::path::Path;

use base64::{engine::general_purpose, Engine as _};
use rand::{rngs::OsRng, RngCore};
use tempfile::NamedTempFile;

use crate::errors::{AppError, AppResult};

pub const AES_GCM_KEY_BYTES: usize = 32;

/// AES-256-GCM key protecting embedding store files at rest.
#[derive(Clone)]
pub struct EmbeddingKey {
    bytes: Vec<u8>,
}

impl std::fmt::Debug for EmbeddingKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("EmbeddingKey(..)")
    }
}

impl EmbeddingKey {
    pub fn generate() -> Self {
        let mut bytes = vec![0u8; AES_GCM_KEY_BYTES];
        OsRng.fill_bytes(&mut bytes);
        Self { bytes }
    }

    pub fn from_bytes(bytes: Vec<u8>) -> Result<Self, String> {
        if bytes.len() != AES_GCM_KEY_BYTES {
            return Err(format!(
                "expected {AES_GCM_KEY_BYTES} bytes but found {}",
                bytes.len()
            ));
        }
        Ok(Self { bytes })
    }

    pub fn from_base64(encoded: &str) -> Result<Self, String> {
        let bytes = general_purpose::STANDARD
            .decode(encoded.trim())
            .map_err(|err| format!("invalid base64 encoding: {err}"))?;
        Self::from_bytes(bytes)
    }

    pub fn to_base64(&self) -> String {
        general_purpose::STANDARD.encode(&self.bytes)
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes
    }
}

pub fn load_key_file(path: &Path) -> AppResult<EmbeddingKey> {
    let contents = fs::read_to_string(path).map_err(|source| AppError::StoreRead {
        path: path.to_path_buf(),
        source,
    })?;
    EmbeddingKey::from_base64(&contents).map_err(|message| AppError::InvalidKey {
        path: path.to_path_buf(),
        message,
    })
}

/// Writes `key` as base64 to `path`, readable by the owner only.
pub fn write_key_file(path: &Path, key: &EmbeddingKey) -> AppResult<()> {
    let parent = match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent,
        _ => Path::new("."),
    };
    fs::create_dir_all(parent).map_err(|source| AppError::Persistence {
        path: parent.to_path_buf(),
        source,
    })?;

    let mut tmp = NamedTempFile::new_in(parent).map_err(|source| AppError::Persistence {
        path: path.to_path_buf(),
        source,
    })?;
    writeln!(tmp, "{}", key.to_base64()).map_err(|source| AppError::Persistence {
        path: path.to_path_buf(),
        source,
    })?;

    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        tmp.as_file()
            .set_permissions(fs::Permissions::from_mode(0o600))
            .map_err(|source| AppError::Persistence {
                path: path.to_path_buf(),
                source,
            })?;
    }

    tmp.persist(path).map_err(|err| AppError::Persistence {
        path: path.to_path_buf(),
        source: err.error,
    })?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn key_file_round_trip() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("keys/store.key");
        let key = EmbeddingKey::generate();
        write_key_file(&path, &key).unwrap();

        let loaded = load_key_file(&path).unwrap();
        assert_eq!(loaded.as_bytes(), key.as_bytes());
    }

    #[test]
    fn short_keys_are_rejected() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("short.key");
        fs::write(&path, general_purpose::STANDARD.encode([7u8; 8])).unwrap();

        let err = load_key_file(&path).unwrap_err();
        match err {
            AppError::InvalidKey { message, .. } => assert!(message.contains("32 bytes")),
            other => panic!("unexpected error: {:?}", other),
        }
    }
}
