//! Validator identities
//!
//! An identity binds a signing key to an operator label and a membership name
//! (`alice` -> `alice.club.agi.eth`). Records are only ever written whole.

use crate::{
    crypto::{LocalKeySigner, ValidatorSigner},
    error::{Error, Result},
    storage::{normalize_label, RecordKey, RecordKind, RecordStore, RecordStoreExt},
    types::{parse_hash, IdentityRecord},
};
use chrono::Utc;
use ethers::types::H256;
use std::path::Path;
use std::sync::Arc;
use tracing::info;

/// Validate a membership name and derive its subdomain
///
/// The name needs at least two non-empty dot-separated segments; the
/// subdomain is the first one, lower-cased.
pub fn subdomain_of(ens: &str) -> Result<String> {
    let ens = ens.trim();
    if ens.is_empty() {
        return Err(Error::Validation("ens name must not be empty".to_string()));
    }
    let segments: Vec<&str> = ens.split('.').collect();
    if segments.len() < 2 || segments.iter().any(|s| s.is_empty()) {
        return Err(Error::Validation(format!(
            "ens name {:?} must look like <sub>.<domain>",
            ens
        )));
    }
    Ok(segments[0].to_lowercase())
}

/// Decode a proof file: a JSON array of `0x`-prefixed 32-byte hex strings
pub fn read_proof_file(path: impl AsRef<Path>) -> Result<Vec<H256>> {
    let path = path.as_ref();
    let content = std::fs::read_to_string(path).map_err(|e| {
        Error::Validation(format!("cannot read proof file {}: {}", path.display(), e))
    })?;
    let entries: Vec<String> = serde_json::from_str(&content).map_err(|e| {
        Error::Validation(format!(
            "proof file {} is not a JSON array of strings: {}",
            path.display(),
            e
        ))
    })?;

    entries
        .iter()
        .enumerate()
        .map(|(i, entry)| {
            if !entry.trim().starts_with("0x") {
                return Err(Error::Validation(format!(
                    "proof file {} entry {}: missing 0x prefix",
                    path.display(),
                    i
                )));
            }
            parse_hash(entry).map_err(|e| {
                Error::Validation(format!("proof file {} entry {}: {}", path.display(), i, e))
            })
        })
        .collect()
}

/// Stored identity labels
///
/// Iterating borrows the list, so it can be walked any number of times.
#[derive(Debug, Clone, Default)]
pub struct Labels {
    keys: Vec<RecordKey>,
}

impl Labels {
    /// Iterate labels in sorted order
    pub fn iter(&self) -> impl Iterator<Item = &str> + '_ {
        self.keys.iter().map(RecordKey::label)
    }

    /// Number of labels
    pub fn len(&self) -> usize {
        self.keys.len()
    }

    /// Whether no identity exists
    pub fn is_empty(&self) -> bool {
        self.keys.is_empty()
    }
}

impl<'a> IntoIterator for &'a Labels {
    type Item = &'a str;
    type IntoIter = Box<dyn Iterator<Item = &'a str> + 'a>;

    fn into_iter(self) -> Self::IntoIter {
        Box::new(self.iter())
    }
}

/// Identity records on top of a [`RecordStore`]
#[derive(Clone)]
pub struct IdentityStore {
    store: Arc<dyn RecordStore>,
}

impl IdentityStore {
    /// Create over `store`
    pub fn new(store: Arc<dyn RecordStore>) -> Self {
        Self { store }
    }

    /// Create a new identity, generating a key unless one is imported
    ///
    /// An existing label is never overwritten.
    pub fn generate(
        &self,
        label: &str,
        ens: &str,
        proof: Option<Vec<H256>>,
        imported_key: Option<&str>,
    ) -> Result<IdentityRecord> {
        let label = normalize_label(label)?;
        let subdomain = subdomain_of(ens)?;
        let (signer, secret) = match imported_key {
            Some(key) => LocalKeySigner::import_hex(key)?,
            None => LocalKeySigner::generate(),
        };

        let key = RecordKey::identity(&label)?;
        if self.store.contains(&key)? {
            return Err(Error::Conflict(format!("identity {} already exists", label)));
        }

        let now = Utc::now();
        let record = IdentityRecord {
            label: label.clone(),
            ens: ens.trim().to_string(),
            subdomain,
            address: signer.address(),
            private_key: secret,
            proof,
            created_at: now,
            updated_at: now,
        };
        self.store.save(&key, &record)?;

        info!(
            label = %label,
            address = ?record.address,
            imported = imported_key.is_some(),
            "Identity created"
        );
        Ok(record)
    }

    /// Stored labels
    pub fn list(&self) -> Result<Labels> {
        let keys = self.store.list(RecordKind::Identity, None)?;
        Ok(Labels { keys })
    }

    /// Load an identity; [`Error::NotFound`] if absent
    pub fn show(&self, label: &str) -> Result<IdentityRecord> {
        let label = normalize_label(label)?;
        let key = RecordKey::identity(&label)?;
        self.store.load(&key).map_err(|e| match e {
            Error::NotFound(_) => Error::NotFound(format!("identity {}", label)),
            other => other,
        })
    }

    /// Replace the membership proof with the contents of `proof_file`
    pub fn set_proof(&self, label: &str, proof_file: impl AsRef<Path>) -> Result<IdentityRecord> {
        let proof = read_proof_file(proof_file)?;
        self.replace_proof(label, proof)
    }

    /// Replace the membership proof with already decoded entries
    pub fn replace_proof(&self, label: &str, proof: Vec<H256>) -> Result<IdentityRecord> {
        let mut record = self.show(label)?;

        record.proof = Some(proof);
        record.updated_at = Utc::now();
        self.store.save(&RecordKey::identity(&record.label)?, &record)?;

        info!(label = %record.label, entries = record.proof_or_empty().len(), "Proof updated");
        Ok(record)
    }

    /// Load an identity together with a signer for its key
    pub fn signer(&self, label: &str) -> Result<(IdentityRecord, LocalKeySigner)> {
        let record = self.show(label)?;
        let signer = LocalKeySigner::from_secret(&record.private_key)?;
        if signer.address() != record.address {
            return Err(Error::Storage(format!(
                "identity {} key does not match its stored address",
                record.label
            )));
        }
        Ok((record, signer))
    }
}

impl std::fmt::Debug for IdentityStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("IdentityStore").finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::MemoryRecordStore;
    use std::io::Write;

    const HARDHAT_KEY: &str = "0xac0974bec39a17e36ba4a6b4d238ff944bacb478cbed5efcae784d7bf4f2ff80";

    fn store() -> IdentityStore {
        IdentityStore::new(Arc::new(MemoryRecordStore::new()))
    }

    #[test]
    fn test_subdomain_derivation() {
        assert_eq!(subdomain_of("Alice.club.agi.eth").unwrap(), "alice");
        assert!(subdomain_of("").is_err());
        assert!(subdomain_of("alice").is_err());
        assert!(subdomain_of("alice..eth").is_err());
    }

    #[test]
    fn test_generate_and_show() {
        let ids = store();
        let record = ids.generate("alice", "alice.club.agi.eth", None, None).unwrap();
        assert_eq!(record.subdomain, "alice");
        assert!(record.proof.is_none());

        let loaded = ids.show("alice").unwrap();
        assert_eq!(loaded, record);

        let (_, signer) = ids.signer("alice").unwrap();
        assert_eq!(signer.address(), record.address);
    }

    #[test]
    fn test_generate_rejects_bad_input() {
        let ids = store();
        assert!(matches!(
            ids.generate("", "alice.club.agi.eth", None, None),
            Err(Error::Validation(_))
        ));
        assert!(matches!(
            ids.generate("alice", "", None, None),
            Err(Error::Validation(_))
        ));
        assert!(matches!(
            ids.generate("alice", "alice.club.agi.eth", None, Some("0x1234")),
            Err(Error::Validation(_))
        ));
        assert!(ids.list().unwrap().is_empty());
    }

    #[test]
    fn test_generate_never_overwrites() {
        let ids = store();
        let first = ids.generate("alice", "alice.club.agi.eth", None, None).unwrap();
        let err = ids
            .generate("alice", "alice.club.agi.eth", None, None)
            .unwrap_err();
        assert!(matches!(err, Error::Conflict(_)));
        assert_eq!(ids.show("alice").unwrap().address, first.address);
    }

    #[test]
    fn test_import_key() {
        let ids = store();
        let record = ids
            .generate("bob", "bob.club.agi.eth", None, Some(HARDHAT_KEY))
            .unwrap();
        assert_eq!(
            format!("{:?}", record.address),
            "0xf39fd6e51aad88f6f4ce6ab8827279cfffb92266"
        );
    }

    #[test]
    fn test_list_is_restartable() {
        let ids = store();
        ids.generate("bob", "bob.club.agi.eth", None, None).unwrap();
        ids.generate("alice", "alice.club.agi.eth", None, None).unwrap();

        let labels = ids.list().unwrap();
        let first: Vec<&str> = labels.iter().collect();
        let second: Vec<&str> = (&labels).into_iter().collect();
        assert_eq!(first, vec!["alice", "bob"]);
        assert_eq!(first, second);
    }

    #[test]
    fn test_show_missing() {
        assert!(matches!(store().show("nobody"), Err(Error::NotFound(_))));
    }

    #[test]
    fn test_set_proof() {
        let ids = store();
        ids.generate("alice", "alice.club.agi.eth", None, None).unwrap();

        let mut file = tempfile::NamedTempFile::new().unwrap();
        let a = format!("0x{}", "11".repeat(32));
        let b = format!("0x{}", "22".repeat(32));
        write!(file, "[\"{}\", \"{}\"]", a, b).unwrap();

        let record = ids.set_proof("alice", file.path()).unwrap();
        assert_eq!(
            record.proof,
            Some(vec![H256::repeat_byte(0x11), H256::repeat_byte(0x22)])
        );
        assert!(record.updated_at >= record.created_at);
        assert_eq!(ids.show("alice").unwrap().proof_or_empty().len(), 2);
    }

    #[test]
    fn test_set_proof_rejects_malformed_file() {
        let ids = store();
        ids.generate("alice", "alice.club.agi.eth", None, None).unwrap();

        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, "[\"0x1234\"]").unwrap();
        assert!(matches!(
            ids.set_proof("alice", file.path()),
            Err(Error::Validation(_))
        ));

        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, "[\"{}\"]", "11".repeat(32)).unwrap();
        assert!(matches!(
            ids.set_proof("alice", file.path()),
            Err(Error::Validation(_))
        ));

        let missing = file.path().with_extension("absent");
        assert!(matches!(
            ids.set_proof("alice", &missing),
            Err(Error::Validation(_))
        ));

        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, "{{\"proof\": []}}").unwrap();
        assert!(matches!(
            ids.set_proof("alice", file.path()),
            Err(Error::Validation(_))
        ));
        assert!(ids.show("alice").unwrap().proof.is_none());
    }
}
