//! Local record storage
//!
//! A keyed store mapping `(kind, label[, job_id])` to one serialized record.
//! Writes always replace the whole record; there is no in-place patching.
//!
//! # Backends
//!
//! - [`FileRecordStore`] - one JSON file per record, atomic rename on write
//! - [`RocksRecordStore`] - one column family per record kind
//! - [`MemoryRecordStore`] - in-process map for tests
//!
//! Labels are restricted to `[a-z0-9_-]` so they are safe as path segments
//! and as RocksDB key prefixes.

use crate::{
    config::{StorageConfig, StoreBackend},
    error::{Error, Result},
    types::{parse_job_id, JobId},
};
use parking_lot::RwLock;
use rocksdb::{ColumnFamily, ColumnFamilyDescriptor, Direction, IteratorMode, Options, WriteOptions, DB};
use serde::{de::DeserializeOwned, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::io::Write;
use std::path::{Path, PathBuf};

const MAX_LABEL_LEN: usize = 64;

/// Normalize and validate an identity label
pub fn normalize_label(label: &str) -> Result<String> {
    let label = label.trim().to_ascii_lowercase();
    if label.is_empty() {
        return Err(Error::Validation("label must not be empty".to_string()));
    }
    if label.len() > MAX_LABEL_LEN {
        return Err(Error::Validation(format!(
            "label longer than {} characters",
            MAX_LABEL_LEN
        )));
    }
    if !label
        .chars()
        .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '-' || c == '_')
    {
        return Err(Error::Validation(format!(
            "label {:?} may only contain a-z, 0-9, '-' and '_'",
            label
        )));
    }
    Ok(label)
}

/// Kind of stored record
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum RecordKind {
    /// [`crate::types::IdentityRecord`], keyed by label
    Identity,
    /// [`crate::types::CommitRecord`], keyed by label and job id
    Commit,
}

impl RecordKind {
    fn dir_name(self) -> &'static str {
        match self {
            RecordKind::Identity => "identities",
            RecordKind::Commit => "commits",
        }
    }
}

/// Store key
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct RecordKey {
    kind: RecordKind,
    label: String,
    job_id: Option<JobId>,
}

impl RecordKey {
    /// Key of the identity record for `label`
    pub fn identity(label: &str) -> Result<Self> {
        Ok(Self {
            kind: RecordKind::Identity,
            label: normalize_label(label)?,
            job_id: None,
        })
    }

    /// Key of the commit record for `(label, job_id)`
    pub fn commit(label: &str, job_id: JobId) -> Result<Self> {
        Ok(Self {
            kind: RecordKind::Commit,
            label: normalize_label(label)?,
            job_id: Some(job_id),
        })
    }

    /// Record kind
    pub fn kind(&self) -> RecordKind {
        self.kind
    }

    /// Normalized label
    pub fn label(&self) -> &str {
        &self.label
    }

    /// Job id (commit records only)
    pub fn job_id(&self) -> Option<JobId> {
        self.job_id
    }
}

impl fmt::Display for RecordKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.job_id {
            Some(job_id) => write!(f, "{}/{}/{}", self.kind.dir_name(), self.label, job_id),
            None => write!(f, "{}/{}", self.kind.dir_name(), self.label),
        }
    }
}

/// Keyed durable record store
pub trait RecordStore: Send + Sync {
    /// Read a record; [`Error::NotFound`] if absent
    fn get(&self, key: &RecordKey) -> Result<Vec<u8>>;

    /// Replace a record
    fn put(&self, key: &RecordKey, value: &[u8]) -> Result<()>;

    /// Keys of one kind (optionally for one label), sorted
    fn list(&self, kind: RecordKind, label: Option<&str>) -> Result<Vec<RecordKey>>;
}

/// Typed helpers over any [`RecordStore`]
pub trait RecordStoreExt: RecordStore {
    /// Read and decode a record
    fn load<T: DeserializeOwned>(&self, key: &RecordKey) -> Result<T> {
        let bytes = self.get(key)?;
        Ok(serde_json::from_slice(&bytes)?)
    }

    /// Encode and write a record
    fn save<T: Serialize>(&self, key: &RecordKey, record: &T) -> Result<()> {
        let bytes = serde_json::to_vec_pretty(record)?;
        self.put(key, &bytes)
    }

    /// Whether a record exists
    fn contains(&self, key: &RecordKey) -> Result<bool> {
        match self.get(key) {
            Ok(_) => Ok(true),
            Err(e) if e.is_not_found() => Ok(false),
            Err(e) => Err(e),
        }
    }
}

impl<S: RecordStore + ?Sized> RecordStoreExt for S {}

/// Open the store selected by configuration
pub fn open_store(config: &StorageConfig) -> Result<Box<dyn RecordStore>> {
    match config.backend {
        StoreBackend::File => Ok(Box::new(FileRecordStore::open(&config.data_dir)?)),
        StoreBackend::RocksDb => Ok(Box::new(RocksRecordStore::open(
            config.data_dir.join("records.db"),
        )?)),
    }
}

// File backend

/// One JSON file per record
///
/// - `identities/<label>.json`
/// - `commits/<label>/<job_id>.json`
#[derive(Debug, Clone)]
pub struct FileRecordStore {
    root: PathBuf,
}

impl FileRecordStore {
    /// Open (creating) the store rooted at `root`
    pub fn open(root: impl AsRef<Path>) -> Result<Self> {
        let root = root.as_ref().to_path_buf();
        std::fs::create_dir_all(&root)?;
        tracing::debug!(root = %root.display(), "Opened file record store");
        Ok(Self { root })
    }

    /// Path of the file backing `key`
    pub fn path_for(&self, key: &RecordKey) -> PathBuf {
        let dir = self.root.join(key.kind.dir_name());
        match key.job_id {
            Some(job_id) => dir.join(&key.label).join(format!("{}.json", job_id)),
            None => dir.join(format!("{}.json", key.label)),
        }
    }

    fn record_stems(dir: &Path) -> Result<Vec<String>> {
        let entries = match std::fs::read_dir(dir) {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };

        let mut stems = Vec::new();
        for entry in entries {
            let entry = entry?;
            let name = entry.file_name();
            let Some(name) = name.to_str() else { continue };
            // Skip in-flight temp files
            if name.starts_with('.') {
                continue;
            }
            if let Some(stem) = name.strip_suffix(".json") {
                stems.push(stem.to_string());
            }
        }
        Ok(stems)
    }

    fn label_dirs(dir: &Path) -> Result<Vec<String>> {
        let entries = match std::fs::read_dir(dir) {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };

        let mut labels = Vec::new();
        for entry in entries {
            let entry = entry?;
            if entry.file_type()?.is_dir() {
                if let Some(name) = entry.file_name().to_str() {
                    labels.push(name.to_string());
                }
            }
        }
        Ok(labels)
    }

    #[cfg(unix)]
    fn restrict_permissions(file: &std::fs::File) -> Result<()> {
        use std::os::unix::fs::PermissionsExt;
        file.set_permissions(std::fs::Permissions::from_mode(0o600))?;
        Ok(())
    }

    #[cfg(not(unix))]
    fn restrict_permissions(_file: &std::fs::File) -> Result<()> {
        Ok(())
    }
}

impl RecordStore for FileRecordStore {
    fn get(&self, key: &RecordKey) -> Result<Vec<u8>> {
        let path = self.path_for(key);
        match std::fs::read(&path) {
            Ok(bytes) => Ok(bytes),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                Err(Error::NotFound(format!("no record {}", key)))
            }
            Err(e) => Err(e.into()),
        }
    }

    fn put(&self, key: &RecordKey, value: &[u8]) -> Result<()> {
        let path = self.path_for(key);
        let parent = path
            .parent()
            .ok_or_else(|| Error::Storage(format!("no parent directory for {}", path.display())))?;
        std::fs::create_dir_all(parent)?;

        // Write beside the target, then rename over it
        let mut tmp = tempfile::Builder::new()
            .prefix(".tmp-")
            .tempfile_in(parent)?;
        if key.kind == RecordKind::Identity {
            Self::restrict_permissions(tmp.as_file())?;
        }
        tmp.write_all(value)?;
        tmp.as_file().sync_all()?;
        tmp.persist(&path).map_err(|e| Error::Io(e.error))?;

        tracing::debug!(record = %key, path = %path.display(), "Record written");
        Ok(())
    }

    fn list(&self, kind: RecordKind, label: Option<&str>) -> Result<Vec<RecordKey>> {
        let kind_dir = self.root.join(kind.dir_name());
        let mut keys = Vec::new();

        match kind {
            RecordKind::Identity => {
                for stem in Self::record_stems(&kind_dir)? {
                    let Ok(key) = RecordKey::identity(&stem) else { continue };
                    if label.map_or(true, |l| key.label == l) {
                        keys.push(key);
                    }
                }
            }
            RecordKind::Commit => {
                let labels = match label {
                    Some(l) => vec![normalize_label(l)?],
                    None => Self::label_dirs(&kind_dir)?,
                };
                for l in labels {
                    for stem in Self::record_stems(&kind_dir.join(&l))? {
                        let Ok(job_id) = parse_job_id(&stem) else { continue };
                        if let Ok(key) = RecordKey::commit(&l, job_id) {
                            keys.push(key);
                        }
                    }
                }
            }
        }

        keys.sort();
        Ok(keys)
    }
}

// RocksDB backend

/// Column family names
const CF_IDENTITIES: &str = "identities";
const CF_COMMITS: &str = "commits";

const KEY_SEPARATOR: u8 = b'|';

/// RocksDB-backed record store
pub struct RocksRecordStore {
    db: DB,
}

impl fmt::Debug for RocksRecordStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RocksRecordStore")
            .field("path", &self.db.path())
            .finish()
    }
}

impl RocksRecordStore {
    /// Open or create database
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        std::fs::create_dir_all(path)?;

        let mut db_opts = Options::default();
        db_opts.create_if_missing(true);
        db_opts.create_missing_column_families(true);

        let cf_descriptors = vec![
            ColumnFamilyDescriptor::new(CF_IDENTITIES, Options::default()),
            ColumnFamilyDescriptor::new(CF_COMMITS, Options::default()),
        ];

        let db = DB::open_cf_descriptors(&db_opts, path, cf_descriptors)?;
        tracing::info!(path = %path.display(), "Opened RocksDB record store");

        Ok(Self { db })
    }

    fn cf_handle(&self, kind: RecordKind) -> Result<&ColumnFamily> {
        let name = match kind {
            RecordKind::Identity => CF_IDENTITIES,
            RecordKind::Commit => CF_COMMITS,
        };
        self.db
            .cf_handle(name)
            .ok_or_else(|| Error::Storage(format!("Column family {} not found", name)))
    }

    // label || '|' || job_id (32 bytes big endian)
    fn encode_key(key: &RecordKey) -> Vec<u8> {
        let mut bytes = key.label.as_bytes().to_vec();
        if let Some(job_id) = key.job_id {
            let mut word = [0u8; 32];
            job_id.to_big_endian(&mut word);
            bytes.push(KEY_SEPARATOR);
            bytes.extend_from_slice(&word);
        }
        bytes
    }

    fn decode_key(kind: RecordKind, raw: &[u8]) -> Result<RecordKey> {
        let corrupt = || Error::Storage(format!("corrupt {:?} key in store", kind));
        match kind {
            RecordKind::Identity => {
                let label = std::str::from_utf8(raw).map_err(|_| corrupt())?;
                RecordKey::identity(label)
            }
            RecordKind::Commit => {
                let sep = raw
                    .iter()
                    .position(|b| *b == KEY_SEPARATOR)
                    .ok_or_else(corrupt)?;
                let (label, rest) = raw.split_at(sep);
                let word = &rest[1..];
                if word.len() != 32 {
                    return Err(corrupt());
                }
                let label = std::str::from_utf8(label).map_err(|_| corrupt())?;
                RecordKey::commit(label, JobId::from_big_endian(word))
            }
        }
    }
}

impl RecordStore for RocksRecordStore {
    fn get(&self, key: &RecordKey) -> Result<Vec<u8>> {
        let cf = self.cf_handle(key.kind)?;
        self.db
            .get_cf(cf, Self::encode_key(key))?
            .ok_or_else(|| Error::NotFound(format!("no record {}", key)))
    }

    fn put(&self, key: &RecordKey, value: &[u8]) -> Result<()> {
        let cf = self.cf_handle(key.kind)?;
        let mut write_opts = WriteOptions::default();
        write_opts.set_sync(true);
        self.db
            .put_cf_opt(cf, Self::encode_key(key), value, &write_opts)?;

        tracing::debug!(record = %key, "Record written");
        Ok(())
    }

    fn list(&self, kind: RecordKind, label: Option<&str>) -> Result<Vec<RecordKey>> {
        let cf = self.cf_handle(kind)?;

        let prefix = match (kind, label) {
            (RecordKind::Identity, Some(l)) => normalize_label(l)?.into_bytes(),
            (RecordKind::Commit, Some(l)) => {
                let mut p = normalize_label(l)?.into_bytes();
                p.push(KEY_SEPARATOR);
                p
            }
            (_, None) => Vec::new(),
        };

        let mut keys = Vec::new();
        for item in self
            .db
            .iterator_cf(cf, IteratorMode::From(prefix.as_slice(), Direction::Forward))
        {
            let (raw, _) = item?;
            if !raw.starts_with(&prefix) {
                break;
            }
            let key = Self::decode_key(kind, &raw)?;
            if kind == RecordKind::Identity && label.is_some() && raw.len() != prefix.len() {
                continue;
            }
            keys.push(key);
        }

        keys.sort();
        Ok(keys)
    }
}

// Memory backend

/// In-process record store
#[derive(Debug, Default)]
pub struct MemoryRecordStore {
    records: RwLock<BTreeMap<RecordKey, Vec<u8>>>,
}

impl MemoryRecordStore {
    /// Create an empty store
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored records
    pub fn len(&self) -> usize {
        self.records.read().len()
    }

    /// Whether the store is empty
    pub fn is_empty(&self) -> bool {
        self.records.read().is_empty()
    }
}

impl RecordStore for MemoryRecordStore {
    fn get(&self, key: &RecordKey) -> Result<Vec<u8>> {
        self.records
            .read()
            .get(key)
            .cloned()
            .ok_or_else(|| Error::NotFound(format!("no record {}", key)))
    }

    fn put(&self, key: &RecordKey, value: &[u8]) -> Result<()> {
        self.records.write().insert(key.clone(), value.to_vec());
        Ok(())
    }

    fn list(&self, kind: RecordKind, label: Option<&str>) -> Result<Vec<RecordKey>> {
        let label = label.map(normalize_label).transpose()?;
        Ok(self
            .records
            .read()
            .keys()
            .filter(|k| k.kind == kind)
            .filter(|k| label.as_deref().map_or(true, |l| k.label == l))
            .cloned()
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;
    use tempfile::TempDir;

    #[derive(Debug, PartialEq, Serialize, Deserialize)]
    struct Note {
        text: String,
    }

    fn note(text: &str) -> Note {
        Note {
            text: text.to_string(),
        }
    }

    fn exercise_store(store: &dyn RecordStore) {
        let alice = RecordKey::identity("alice").unwrap();
        let bob = RecordKey::identity("bob").unwrap();
        let alice_42 = RecordKey::commit("alice", JobId::from(42)).unwrap();
        let alice_7 = RecordKey::commit("alice", JobId::from(7)).unwrap();
        let bob_42 = RecordKey::commit("bob", JobId::from(42)).unwrap();

        assert!(store.get(&alice).unwrap_err().is_not_found());
        assert!(!store.contains(&alice).unwrap());

        store.save(&alice, &note("first")).unwrap();
        store.save(&alice, &note("second")).unwrap();
        store.save(&bob, &note("bob")).unwrap();
        store.save(&alice_42, &note("vote 42")).unwrap();
        store.save(&alice_7, &note("vote 7")).unwrap();
        store.save(&bob_42, &note("bob vote")).unwrap();

        // Whole-record overwrite
        let loaded: Note = store.load(&alice).unwrap();
        assert_eq!(loaded, note("second"));

        let identities = store.list(RecordKind::Identity, None).unwrap();
        assert_eq!(identities, vec![alice.clone(), bob.clone()]);

        let alice_commits = store.list(RecordKind::Commit, Some("alice")).unwrap();
        assert_eq!(alice_commits, vec![alice_7.clone(), alice_42.clone()]);

        let all_commits = store.list(RecordKind::Commit, None).unwrap();
        assert_eq!(all_commits.len(), 3);

        let loaded: Note = store.load(&bob_42).unwrap();
        assert_eq!(loaded, note("bob vote"));
    }

    #[test]
    fn test_normalize_label() {
        assert_eq!(normalize_label(" Alice ").unwrap(), "alice");
        assert!(normalize_label("").is_err());
        assert!(normalize_label("../etc").is_err());
        assert!(normalize_label("a|b").is_err());
        assert!(normalize_label(&"a".repeat(65)).is_err());
    }

    #[test]
    fn test_memory_store() {
        let store = MemoryRecordStore::new();
        exercise_store(&store);
        assert_eq!(store.len(), 5);
    }

    #[test]
    fn test_file_store() {
        let temp = TempDir::new().unwrap();
        let store = FileRecordStore::open(temp.path()).unwrap();
        exercise_store(&store);

        let path = store.path_for(&RecordKey::commit("alice", JobId::from(42)).unwrap());
        assert!(path.ends_with("commits/alice/42.json"));
        assert!(path.exists());
    }

    #[cfg(unix)]
    #[test]
    fn test_file_store_identity_permissions() {
        use std::os::unix::fs::PermissionsExt;

        let temp = TempDir::new().unwrap();
        let store = FileRecordStore::open(temp.path()).unwrap();
        let key = RecordKey::identity("alice").unwrap();
        store.save(&key, &note("secret")).unwrap();

        let mode = std::fs::metadata(store.path_for(&key)).unwrap().permissions().mode();
        assert_eq!(mode & 0o777, 0o600);
    }

    #[test]
    fn test_file_store_ignores_stray_files() {
        let temp = TempDir::new().unwrap();
        let store = FileRecordStore::open(temp.path()).unwrap();
        std::fs::create_dir_all(temp.path().join("identities")).unwrap();
        std::fs::write(temp.path().join("identities/.tmp-abc"), b"{}").unwrap();
        std::fs::write(temp.path().join("identities/README"), b"x").unwrap();

        assert!(store.list(RecordKind::Identity, None).unwrap().is_empty());
    }

    #[test]
    fn test_rocks_store() {
        let temp = TempDir::new().unwrap();
        let store = RocksRecordStore::open(temp.path().join("records.db")).unwrap();
        exercise_store(&store);
    }

    #[test]
    fn test_rocks_identity_prefix_is_exact() {
        let temp = TempDir::new().unwrap();
        let store = RocksRecordStore::open(temp.path()).unwrap();
        store.save(&RecordKey::identity("al").unwrap(), &note("al")).unwrap();
        store.save(&RecordKey::identity("alice").unwrap(), &note("alice")).unwrap();

        let keys = store.list(RecordKind::Identity, Some("al")).unwrap();
        assert_eq!(keys, vec![RecordKey::identity("al").unwrap()]);
    }
}
