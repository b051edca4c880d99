use std::collections::{BTreeMap, HashMap};
use std::env;
use std::fs;
use std::io::{self, BufWriter, Write};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, PoisonError, RwLock};

use aes_gcm::aead::{Aead, KeyInit};
use aes_gcm::{Aes256Gcm, Nonce};
use base64::{engine::general_purpose, Engine as _};
use chrono::{SecondsFormat, Utc};
use rand::{rngs::OsRng, RngCore};
use serde::{Deserialize, Serialize};
use tempfile::NamedTempFile;
use tracing::debug;
use uuid::Uuid;

use crate::errors::{AppError, AppResult};
use crate::keys::EmbeddingKey;
use crate::vector::{nonzero_norm, FeatureVector};

pub const STORE_DIR_ENV: &str = "FACEPRINT_STORE_DIR";
const STORE_VERSION: u32 = 1;
const STORE_ALGORITHM: &str = "AES-256-GCM";
const STORE_NONCE_LEN: usize = 12;
const MAX_IDENTITY_LEN: usize = 128;

/// One reference vector captured for an identity under a given pose.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Embedding {
    pub id: String,
    pub vector: FeatureVector,
    pub pose: String,
    pub captured_at: String,
}

impl Embedding {
    pub fn new(vector: FeatureVector, pose: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            vector,
            pose: pose.into(),
            captured_at: Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct IdentityRecord {
    pub name: String,
    pub embeddings: Vec<Embedding>,
}

impl IdentityRecord {
    pub fn poses(&self) -> Vec<&str> {
        self.embeddings
            .iter()
            .map(|embedding| embedding.pose.as_str())
            .collect()
    }

    pub fn vectors(&self) -> Vec<FeatureVector> {
        self.embeddings
            .iter()
            .map(|embedding| embedding.vector.clone())
            .collect()
    }
}

/// Durable mapping from identity name to its reference embeddings.
///
/// Records are only ever replaced as a whole; there is no incremental append.
pub trait EmbeddingStore: Send + Sync {
    /// Atomically replaces the record for `identity`.
    fn persist(&self, identity: &str, embeddings: &[Embedding]) -> AppResult<()>;

    fn fetch(&self, identity: &str) -> AppResult<IdentityRecord>;

    /// Enrolled identity names in lexicographic order.
    fn identities(&self) -> AppResult<Vec<String>>;

    /// Deletes the record for `identity`, returning whether one existed.
    fn remove(&self, identity: &str) -> AppResult<bool>;

    /// Lazily yields every record, in lexicographic order of identity name.
    fn list_all(&self) -> AppResult<IdentityRecords<'_>>;
}

/// Lazy sequence over a snapshot of identity names.
///
/// Records are loaded one at a time as the sequence advances. Cloning or
/// calling [`IdentityRecords::rewind`] restarts from the first name.
#[derive(Clone)]
pub struct IdentityRecords<'a> {
    store: &'a dyn EmbeddingStore,
    names: Arc<[String]>,
    position: usize,
}

impl<'a> IdentityRecords<'a> {
    pub fn new(store: &'a dyn EmbeddingStore, names: Vec<String>) -> Self {
        Self {
            store,
            names: names.into(),
            position: 0,
        }
    }

    pub fn names(&self) -> &[String] {
        &self.names
    }

    pub fn rewind(&mut self) {
        self.position = 0;
    }
}

impl Iterator for IdentityRecords<'_> {
    type Item = AppResult<IdentityRecord>;

    fn next(&mut self) -> Option<Self::Item> {
        while let Some(name) = self.names.get(self.position) {
            self.position += 1;
            match self.store.fetch(name) {
                Err(AppError::NotFound { identity }) => {
                    debug!(%identity, "identity removed after listing; skipping");
                }
                other => return Some(other),
            }
        }
        None
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        (0, Some(self.names.len().saturating_sub(self.position)))
    }
}

pub fn validate_identity_name(name: &str) -> AppResult<()> {
    let invalid = |message: &str| AppError::InvalidIdentity {
        name: name.to_string(),
        message: message.into(),
    };

    if name.trim().is_empty() {
        return Err(invalid("identity name cannot be empty"));
    }
    if name.trim() != name {
        return Err(invalid("leading or trailing whitespace is not allowed"));
    }
    if name.chars().count() > MAX_IDENTITY_LEN {
        return Err(invalid("identity name is too long"));
    }
    if name.starts_with('.') {
        return Err(invalid("identity name cannot start with '.'"));
    }
    if !name
        .chars()
        .all(|ch| ch.is_alphanumeric() || matches!(ch, '-' | '_' | '.' | ' '))
    {
        return Err(invalid("use letters, numbers, spaces, '-', '_' or '.' only"));
    }

    Ok(())
}

/// Checks that an embedding set is storable: non-empty, one dimensionality,
/// no zero vectors.
pub fn validate_embedding_set(embeddings: &[Embedding]) -> AppResult<usize> {
    let first = embeddings
        .first()
        .ok_or_else(|| AppError::InvalidVector("embedding set is empty".into()))?;
    let dimension = first.vector.dimension();

    for embedding in embeddings {
        embedding.vector.ensure_dimension(dimension)?;
        nonzero_norm(&embedding.vector)?;
    }

    Ok(dimension)
}

pub trait StoreDirResolver {
    fn resolve(&self, override_dir: Option<&Path>) -> PathBuf;
}

/// Resolves the store directory from an explicit override, then
/// `$FACEPRINT_STORE_DIR`, then the configured default.
#[derive(Debug, Clone)]
pub struct EnvStoreDirResolver {
    pub fallback: PathBuf,
}

impl StoreDirResolver for EnvStoreDirResolver {
    fn resolve(&self, override_dir: Option<&Path>) -> PathBuf {
        if let Some(dir) = override_dir {
            dir.to_path_buf()
        } else if let Ok(env_value) = env::var(STORE_DIR_ENV) {
            PathBuf::from(env_value)
        } else {
            self.fallback.clone()
        }
    }
}

/// One JSON file per identity under a directory, optionally AES-GCM encrypted.
#[derive(Debug)]
pub struct FilesystemEmbeddingStore {
    dir: PathBuf,
    key: Option<EmbeddingKey>,
    locks: Mutex<HashMap<String, Arc<Mutex<()>>>>,
}

impl FilesystemEmbeddingStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self {
            dir: dir.into(),
            key: None,
            locks: Mutex::new(HashMap::new()),
        }
    }

    pub fn with_key(mut self, key: Option<EmbeddingKey>) -> Self {
        self.key = key;
        self
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn is_encrypted(&self) -> bool {
        self.key.is_some()
    }

    pub fn record_path(&self, identity: &str) -> PathBuf {
        self.dir.join(format!("{identity}.json"))
    }

    fn identity_lock(&self, identity: &str) -> Arc<Mutex<()>> {
        let mut locks = self.locks.lock().unwrap_or_else(PoisonError::into_inner);
        Arc::clone(locks.entry(identity.to_string()).or_default())
    }

    fn key_bytes(&self) -> Option<&[u8]> {
        self.key.as_ref().map(EmbeddingKey::as_bytes)
    }
}

impl EmbeddingStore for FilesystemEmbeddingStore {
    fn persist(&self, identity: &str, embeddings: &[Embedding]) -> AppResult<()> {
        validate_identity_name(identity)?;
        validate_embedding_set(embeddings)?;

        let record = IdentityRecord {
            name: identity.to_string(),
            embeddings: embeddings.to_vec(),
        };
        let payload = match self.key_bytes() {
            Some(key) => serialize_encrypted_record(&record, key)?,
            None => serde_json::to_vec_pretty(&record)?,
        };

        let path = self.record_path(identity);
        let lock = self.identity_lock(identity);
        let _guard = lock.lock().unwrap_or_else(PoisonError::into_inner);
        write_atomically(&path, |writer| {
            writer.write_all(&payload)?;
            writer.write_all(b"\n")
        })?;
        debug!(
            identity,
            path = %path.display(),
            embeddings = embeddings.len(),
            "persisted identity record"
        );
        Ok(())
    }

    fn fetch(&self, identity: &str) -> AppResult<IdentityRecord> {
        validate_identity_name(identity)?;
        let path = self.record_path(identity);
        let data = match fs::read(&path) {
            Ok(data) => data,
            Err(err) if err.kind() == io::ErrorKind::NotFound => {
                return Err(AppError::NotFound {
                    identity: identity.to_string(),
                })
            }
            Err(source) => return Err(AppError::StoreRead { path, source }),
        };

        let record = read_record(&path, &data, self.key_bytes())?;
        if record.name != identity {
            return Err(AppError::InvalidStoreFile {
                path,
                message: format!("record names identity '{}'", record.name),
            });
        }
        Ok(record)
    }

    fn identities(&self) -> AppResult<Vec<String>> {
        let entries = match fs::read_dir(&self.dir) {
            Ok(entries) => entries,
            Err(err) if err.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(source) => {
                return Err(AppError::StoreRead {
                    path: self.dir.clone(),
                    source,
                })
            }
        };

        let mut names = Vec::new();
        for entry in entries {
            let entry = entry.map_err(|source| AppError::StoreRead {
                path: self.dir.clone(),
                source,
            })?;
            let path = entry.path();
            if path.extension().and_then(|ext| ext.to_str()) != Some("json") {
                continue;
            }
            let Some(name) = path.file_stem().and_then(|stem| stem.to_str()) else {
                continue;
            };
            if validate_identity_name(name).is_ok() {
                names.push(name.to_string());
            }
        }
        names.sort();
        Ok(names)
    }

    fn remove(&self, identity: &str) -> AppResult<bool> {
        validate_identity_name(identity)?;
        let path = self.record_path(identity);
        let lock = self.identity_lock(identity);
        let _guard = lock.lock().unwrap_or_else(PoisonError::into_inner);
        match fs::remove_file(&path) {
            Ok(()) => Ok(true),
            Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(false),
            Err(source) => Err(AppError::Persistence { path, source }),
        }
    }

    fn list_all(&self) -> AppResult<IdentityRecords<'_>> {
        Ok(IdentityRecords::new(self, self.identities()?))
    }
}

/// In-process store with the same contract as the filesystem store.
#[derive(Debug, Default)]
pub struct MemoryEmbeddingStore {
    records: RwLock<BTreeMap<String, Vec<Embedding>>>,
}

impl MemoryEmbeddingStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl EmbeddingStore for MemoryEmbeddingStore {
    fn persist(&self, identity: &str, embeddings: &[Embedding]) -> AppResult<()> {
        validate_identity_name(identity)?;
        validate_embedding_set(embeddings)?;
        self.records
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(identity.to_string(), embeddings.to_vec());
        Ok(())
    }

    fn fetch(&self, identity: &str) -> AppResult<IdentityRecord> {
        self.records
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(identity)
            .map(|embeddings| IdentityRecord {
                name: identity.to_string(),
                embeddings: embeddings.clone(),
            })
            .ok_or_else(|| AppError::NotFound {
                identity: identity.to_string(),
            })
    }

    fn identities(&self) -> AppResult<Vec<String>> {
        Ok(self
            .records
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .keys()
            .cloned()
            .collect())
    }

    fn remove(&self, identity: &str) -> AppResult<bool> {
        Ok(self
            .records
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(identity)
            .is_some())
    }

    fn list_all(&self) -> AppResult<IdentityRecords<'_>> {
        Ok(IdentityRecords::new(self, self.identities()?))
    }
}

/// Writes through a temporary file in the destination directory and renames
/// it over `path` only after `write` succeeded and the data reached disk.
pub(crate) fn write_atomically<F>(path: &Path, write: F) -> AppResult<()>
where
    F: FnOnce(&mut dyn Write) -> io::Result<()>,
{
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

    {
        let file = tmp.as_file_mut();
        {
            let mut writer = BufWriter::new(&mut *file);
            write(&mut writer).map_err(|source| AppError::Persistence {
                path: path.to_path_buf(),
                source,
            })?;
            writer.flush().map_err(|source| AppError::Persistence {
                path: path.to_path_buf(),
                source,
            })?;
        }
        file.sync_all().map_err(|source| AppError::Persistence {
            path: path.to_path_buf(),
            source,
        })?;
    }

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

fn read_record(path: &Path, data: &[u8], key: Option<&[u8]>) -> AppResult<IdentityRecord> {
    if let Ok(wrapper) = serde_json::from_slice::<EncryptedRecord>(data) {
        return decrypt_record(path, wrapper, key);
    }

    serde_json::from_slice(data).map_err(|err| AppError::InvalidStoreFile {
        path: path.to_path_buf(),
        message: format!("invalid record contents: {err}"),
    })
}

fn serialize_encrypted_record(record: &IdentityRecord, key: &[u8]) -> AppResult<Vec<u8>> {
    let plaintext = serde_json::to_vec(record)?;
    let cipher = Aes256Gcm::new_from_slice(key)
        .map_err(|_| AppError::Encryption("invalid AES-GCM key length".into()))?;
    let mut nonce = [0u8; STORE_NONCE_LEN];
    OsRng.fill_bytes(&mut nonce);
    let ciphertext = cipher
        .encrypt(Nonce::from_slice(&nonce), plaintext.as_ref())
        .map_err(|err| AppError::Encryption(format!("failed to encrypt identity record: {err}")))?;
    let wrapper = EncryptedRecord {
        version: STORE_VERSION,
        algorithm: STORE_ALGORITHM.to_string(),
        nonce: general_purpose::STANDARD.encode(nonce),
        ciphertext: general_purpose::STANDARD.encode(ciphertext),
    };
    serde_json::to_vec_pretty(&wrapper).map_err(AppError::from)
}

fn decrypt_record(
    path: &Path,
    wrapper: EncryptedRecord,
    key: Option<&[u8]>,
) -> AppResult<IdentityRecord> {
    if wrapper.algorithm != STORE_ALGORITHM {
        return Err(AppError::Encryption(format!(
            "unsupported embedding store algorithm '{}'",
            wrapper.algorithm
        )));
    }
    if wrapper.version != STORE_VERSION {
        return Err(AppError::Encryption(format!(
            "unsupported embedding store version {}",
            wrapper.version
        )));
    }

    let key_bytes = key.ok_or_else(|| AppError::EncryptedStoreRequiresKey {
        path: path.to_path_buf(),
    })?;

    let nonce_bytes = general_purpose::STANDARD
        .decode(wrapper.nonce.trim())
        .map_err(|err| AppError::Encryption(format!("invalid nonce encoding: {err}")))?;
    if nonce_bytes.len() != STORE_NONCE_LEN {
        return Err(AppError::Encryption(format!(
            "expected nonce of {} bytes but found {}",
            STORE_NONCE_LEN,
            nonce_bytes.len()
        )));
    }

    let ciphertext = general_purpose::STANDARD
        .decode(wrapper.ciphertext.trim())
        .map_err(|err| AppError::Encryption(format!("invalid ciphertext encoding: {err}")))?;

    let cipher = Aes256Gcm::new_from_slice(key_bytes)
        .map_err(|_| AppError::Encryption("invalid AES-GCM key length".into()))?;
    let plaintext = cipher
        .decrypt(Nonce::from_slice(&nonce_bytes), ciphertext.as_ref())
        .map_err(|err| AppError::Encryption(format!("failed to decrypt identity record: {err}")))?;

    serde_json::from_slice(&plaintext).map_err(|err| AppError::InvalidStoreFile {
        path: path.to_path_buf(),
        message: format!("invalid decrypted record contents: {err}"),
    })
}

#[derive(Serialize, Deserialize)]
struct EncryptedRecord {
    version: u32,
    algorithm: String,
    nonce: String,
    ciphertext: String,
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn filesystem_store_round_trip_without_encryption() {
        let tmp = TempDir::new().unwrap();
        let store = FilesystemEmbeddingStore::new(tmp.path());
        let embeddings = sample_embeddings(&["left", "right"]);
        store.persist("alice", &embeddings).unwrap();

        let record = store.fetch("alice").unwrap();
        assert_eq!(record.name, "alice");
        assert_eq!(record.embeddings, embeddings);
    }

    #[test]
    fn filesystem_store_round_trip_with_encryption() {
        let tmp = TempDir::new().unwrap();
        let key = EmbeddingKey::from_bytes(vec![0x22u8; 32]).unwrap();
        let store = FilesystemEmbeddingStore::new(tmp.path()).with_key(Some(key));
        let embeddings = sample_embeddings(&["center"]);
        store.persist("alice", &embeddings).unwrap();

        let raw = fs::read_to_string(store.record_path("alice")).unwrap();
        assert!(raw.contains(STORE_ALGORITHM));
        assert!(!raw.contains("center"));

        let record = store.fetch("alice").unwrap();
        assert_eq!(record.embeddings, embeddings);
    }

    #[test]
    fn encrypted_record_requires_key() {
        let tmp = TempDir::new().unwrap();
        let key = EmbeddingKey::generate();
        FilesystemEmbeddingStore::new(tmp.path())
            .with_key(Some(key))
            .persist("alice", &sample_embeddings(&["up"]))
            .unwrap();

        let err = FilesystemEmbeddingStore::new(tmp.path())
            .fetch("alice")
            .unwrap_err();
        assert!(matches!(err, AppError::EncryptedStoreRequiresKey { .. }));
    }

    #[test]
    fn persist_replaces_prior_record() {
        let tmp = TempDir::new().unwrap();
        let store = FilesystemEmbeddingStore::new(tmp.path());
        store
            .persist("bob", &sample_embeddings(&["a", "b", "c"]))
            .unwrap();
        store.persist("bob", &sample_embeddings(&["d"])).unwrap();

        let record = store.fetch("bob").unwrap();
        assert_eq!(record.poses(), vec!["d"]);
    }

    #[test]
    fn failed_write_leaves_prior_record_intact() {
        let tmp = TempDir::new().unwrap();
        let store = FilesystemEmbeddingStore::new(tmp.path());
        let prior = sample_embeddings(&["left", "right"]);
        store.persist("alice", &prior).unwrap();

        let replacement = IdentityRecord {
            name: "alice".into(),
            embeddings: sample_embeddings(&["left", "right", "up", "down", "center"]),
        };
        let payload = serde_json::to_vec_pretty(&replacement).unwrap();
        let path = store.record_path("alice");
        let err = write_atomically(&path, |writer| {
            writer.write_all(&payload[..payload.len() / 2])?;
            Err(io::Error::new(io::ErrorKind::Other, "disk unplugged"))
        })
        .unwrap_err();
        assert!(matches!(err, AppError::Persistence { .. }));

        let record = store.fetch("alice").unwrap();
        assert_eq!(record.embeddings, prior);

        let leftovers: Vec<_> = fs::read_dir(tmp.path())
            .unwrap()
            .map(|entry| entry.unwrap().file_name())
            .collect();
        assert_eq!(leftovers.len(), 1);
    }

    #[test]
    fn fetch_missing_identity_is_not_found() {
        let tmp = TempDir::new().unwrap();
        let store = FilesystemEmbeddingStore::new(tmp.path().join("absent"));
        let err = store.fetch("carol").unwrap_err();
        assert!(matches!(err, AppError::NotFound { identity } if identity == "carol"));
        assert!(store.identities().unwrap().is_empty());
    }

    #[test]
    fn list_all_is_lexicographic_and_restartable() {
        let tmp = TempDir::new().unwrap();
        let store = FilesystemEmbeddingStore::new(tmp.path());
        for name in ["mallory", "alice", "bob"] {
            store.persist(name, &sample_embeddings(&["center"])).unwrap();
        }
        fs::write(tmp.path().join("notes.txt"), "ignored").unwrap();

        let mut records = store.list_all().unwrap();
        let first: Vec<String> = records
            .by_ref()
            .map(|record| record.unwrap().name)
            .collect();
        assert_eq!(first, vec!["alice", "bob", "mallory"]);

        records.rewind();
        let second: Vec<String> = records.map(|record| record.unwrap().name).collect();
        assert_eq!(first, second);
    }

    #[test]
    fn list_all_skips_identities_removed_after_snapshot() {
        let store = MemoryEmbeddingStore::new();
        store.persist("alice", &sample_embeddings(&["a"])).unwrap();
        store.persist("bob", &sample_embeddings(&["b"])).unwrap();

        let records = store.list_all().unwrap();
        assert!(store.remove("alice").unwrap());
        let names: Vec<String> = records.map(|record| record.unwrap().name).collect();
        assert_eq!(names, vec!["bob"]);
    }

    #[test]
    fn remove_reports_whether_record_existed() {
        let tmp = TempDir::new().unwrap();
        let store = FilesystemEmbeddingStore::new(tmp.path());
        store.persist("dave", &sample_embeddings(&["a"])).unwrap();
        assert!(store.remove("dave").unwrap());
        assert!(!store.remove("dave").unwrap());
    }

    #[test]
    fn persist_rejects_inconsistent_sets() {
        let store = MemoryEmbeddingStore::new();
        let mut embeddings = sample_embeddings(&["a"]);
        embeddings.push(Embedding::new(
            FeatureVector::new(vec![1.0, 0.0]).unwrap(),
            "b",
        ));
        let err = store.persist("erin", &embeddings).unwrap_err();
        assert!(matches!(err, AppError::DimensionMismatch { .. }));

        let zero = vec![Embedding::new(
            FeatureVector::new(vec![0.0, 0.0, 0.0]).unwrap(),
            "a",
        )];
        let err = store.persist("erin", &zero).unwrap_err();
        assert!(matches!(err, AppError::DegenerateVector));

        assert!(store.persist("erin", &[]).is_err());
    }

    #[test]
    fn identity_names_are_validated() {
        assert!(validate_identity_name("Alice Smith").is_ok());
        assert!(validate_identity_name("o'brien").is_err());
        for bad in ["", "   ", " alice", "../etc", ".hidden", "a/b"] {
            let err = validate_identity_name(bad).unwrap_err();
            assert!(matches!(err, AppError::InvalidIdentity { .. }), "{bad}");
        }
    }

    #[test]
    fn resolver_prefers_override() {
        let resolver = EnvStoreDirResolver {
            fallback: PathBuf::from("/var/lib/faceprint/identities"),
        };
        let override_dir = PathBuf::from("/tmp/override");
        assert_eq!(resolver.resolve(Some(&override_dir)), override_dir);
    }

    fn sample_embeddings(poses: &[&str]) -> Vec<Embedding> {
        poses
            .iter()
            .enumerate()
            .map(|(idx, pose)| {
                Embedding::new(
                    FeatureVector::new(vec![1.0, idx as f64 * 0.1, 0.5]).unwrap(),
                    *pose,
                )
            })
            .collect()
    }
}
