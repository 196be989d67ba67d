//! Local persistence of session key material.
//!
//! One entry per primary identity, scoped by origin. Entries are the 64-byte
//! keypair encoded as a JSON array, optionally sealed with
//! ChaCha20-Poly1305. Loading fails open: anything unreadable is treated as
//! "no cached key" and the caller re-derives.

use std::fs;
use std::io::Write as _;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use chacha20poly1305::aead::{Aead, KeyInit, Payload};
use chacha20poly1305::{ChaCha20Poly1305, Key, Nonce};
use dashmap::DashMap;
use grid_types::Address;
use rand::RngCore;
use serde::{Deserialize, Serialize};
use zeroize::Zeroizing;

use crate::error::CacheError;
use crate::keypair::SessionKeyMaterial;

const KEY_PREFIX: &str = "session_key:";
const SEAL_CONTEXT: &str = "gridline 2024-06 session cache sealing key";
const SEALED_VERSION: u8 = 1;
const NONCE_LEN: usize = 12;

/// A string key/value store for one origin.
pub trait CacheStore: Send + Sync {
    fn get(&self, key: &str) -> Result<Option<String>, CacheError>;

    fn put(&self, key: &str, value: &str) -> Result<(), CacheError>;

    fn remove(&self, key: &str) -> Result<(), CacheError>;
}

/// Process-local store. Contents vanish with the process.
#[derive(Debug, Default)]
pub struct MemoryStore {
    entries: DashMap<String, String>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl CacheStore for MemoryStore {
    fn get(&self, key: &str) -> Result<Option<String>, CacheError> {
        Ok(self.entries.get(key).map(|v| v.value().clone()))
    }

    fn put(&self, key: &str, value: &str) -> Result<(), CacheError> {
        self.entries.insert(key.to_string(), value.to_string());
        Ok(())
    }

    fn remove(&self, key: &str) -> Result<(), CacheError> {
        self.entries.remove(key);
        Ok(())
    }
}

/// One file per key under a directory private to an origin.
#[derive(Debug, Clone)]
pub struct FileStore {
    dir: PathBuf,
}

impl FileStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    /// `<base>/gridline/<origin digest>`, isolating origins from each other.
    pub fn for_origin(base: &Path, origin: &str) -> Self {
        let digest = blake3::hash(origin.as_bytes()).to_hex();
        Self::new(base.join("gridline").join(&digest[..16]))
    }

    /// The platform data directory, if one exists.
    pub fn default_location(origin: &str) -> Option<Self> {
        dirs::data_local_dir().map(|base| Self::for_origin(&base, origin))
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn path_for(&self, key: &str) -> PathBuf {
        let name: String = key
            .chars()
            .map(|c| if c.is_ascii_alphanumeric() { c } else { '_' })
            .collect();
        self.dir.join(format!("{name}.json"))
    }
}

impl CacheStore for FileStore {
    fn get(&self, key: &str) -> Result<Option<String>, CacheError> {
        match fs::read_to_string(self.path_for(key)) {
            Ok(value) => Ok(Some(value)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    fn put(&self, key: &str, value: &str) -> Result<(), CacheError> {
        fs::create_dir_all(&self.dir)?;
        let target = self.path_for(key);
        let staging = target.with_extension("json.tmp");
        {
            let mut file = open_private(&staging)?;
            file.write_all(value.as_bytes())?;
            file.sync_all()?;
        }
        fs::rename(&staging, &target)?;
        Ok(())
    }

    fn remove(&self, key: &str) -> Result<(), CacheError> {
        match fs::remove_file(self.path_for(key)) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}

#[cfg(unix)]
fn open_private(path: &Path) -> std::io::Result<fs::File> {
    use std::os::unix::fs::OpenOptionsExt;
    fs::OpenOptions::new()
        .write(true)
        .create(true)
        .truncate(true)
        .mode(0o600)
        .open(path)
}

#[cfg(not(unix))]
fn open_private(path: &Path) -> std::io::Result<fs::File> {
    fs::OpenOptions::new()
        .write(true)
        .create(true)
        .truncate(true)
        .open(path)
}

/// A symmetric key for sealing cache entries.
#[derive(Clone)]
pub struct SealingKey(Zeroizing<[u8; 32]>);

impl SealingKey {
    pub fn from_passphrase(passphrase: &str) -> Self {
        Self(Zeroizing::new(blake3::derive_key(
            SEAL_CONTEXT,
            passphrase.as_bytes(),
        )))
    }

    fn cipher(&self) -> ChaCha20Poly1305 {
        ChaCha20Poly1305::new(Key::from_slice(&self.0[..]))
    }
}

impl std::fmt::Debug for SealingKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("SealingKey(..)")
    }
}

/// How entries are written at rest.
#[derive(Clone, Debug, Default)]
pub enum CacheProtection {
    #[default]
    Plaintext,
    Sealed(SealingKey),
}

#[derive(Serialize, Deserialize)]
struct SealedEntry {
    v: u8,
    nonce: String,
    ct: String,
}

impl CacheProtection {
    fn encode(&self, identity: &Address, plain: &str) -> Result<String, CacheError> {
        match self {
            CacheProtection::Plaintext => Ok(plain.to_string()),
            CacheProtection::Sealed(key) => {
                let mut nonce = [0u8; NONCE_LEN];
                rand::thread_rng().fill_bytes(&mut nonce);
                let ct = key
                    .cipher()
                    .encrypt(
                        Nonce::from_slice(&nonce),
                        Payload {
                            msg: plain.as_bytes(),
                            aad: identity.as_bytes(),
                        },
                    )
                    .map_err(|_| CacheError::Seal)?;
                serde_json::to_string(&SealedEntry {
                    v: SEALED_VERSION,
                    nonce: hex::encode(nonce),
                    ct: hex::encode(ct),
                })
                .map_err(|e| CacheError::Serialization(e.to_string()))
            }
        }
    }

    fn decode(&self, identity: &Address, stored: &str) -> Result<Zeroizing<String>, CacheError> {
        match self {
            CacheProtection::Plaintext => Ok(Zeroizing::new(stored.to_string())),
            CacheProtection::Sealed(key) => {
                let entry: SealedEntry = serde_json::from_str(stored)
                    .map_err(|e| CacheError::Serialization(e.to_string()))?;
                if entry.v != SEALED_VERSION {
                    return Err(CacheError::Serialization(format!(
                        "unknown sealed entry version {}",
                        entry.v
                    )));
                }
                let nonce = hex::decode(&entry.nonce)
                    .map_err(|e| CacheError::Serialization(e.to_string()))?;
                if nonce.len() != NONCE_LEN {
                    return Err(CacheError::Serialization("bad nonce length".into()));
                }
                let ct = hex::decode(&entry.ct)
                    .map_err(|e| CacheError::Serialization(e.to_string()))?;
                let plain = key
                    .cipher()
                    .decrypt(
                        Nonce::from_slice(&nonce),
                        Payload {
                            msg: &ct,
                            aad: identity.as_bytes(),
                        },
                    )
                    .map_err(|_| CacheError::Seal)?;
                String::from_utf8(plain)
                    .map(Zeroizing::new)
                    .map_err(|e| CacheError::Serialization(e.to_string()))
            }
        }
    }
}

/// Session key persistence keyed by primary identity.
#[derive(Clone)]
pub struct CredentialCache {
    store: Arc<dyn CacheStore>,
    protection: CacheProtection,
}

impl CredentialCache {
    pub fn new(store: Arc<dyn CacheStore>, protection: CacheProtection) -> Self {
        Self { store, protection }
    }

    /// An unsealed, process-local cache.
    pub fn in_memory() -> Self {
        Self::new(Arc::new(MemoryStore::new()), CacheProtection::Plaintext)
    }

    pub fn key_for(identity: &Address) -> String {
        format!("{KEY_PREFIX}{identity}")
    }

    /// The cached key for `identity`, or `None` if absent or unreadable.
    pub fn load(&self, identity: &Address) -> Option<SessionKeyMaterial> {
        match self.try_load(identity) {
            Ok(found) => found,
            Err(e) => {
                tracing::warn!(
                    identity = %identity,
                    error = %e,
                    "discarding unreadable cached session key"
                );
                None
            }
        }
    }

    fn try_load(&self, identity: &Address) -> Result<Option<SessionKeyMaterial>, CacheError> {
        let Some(stored) = self.store.get(&Self::key_for(identity))? else {
            return Ok(None);
        };
        let plain = self.protection.decode(identity, &stored)?;
        let bytes: Zeroizing<Vec<u8>> = Zeroizing::new(
            serde_json::from_str(&plain).map_err(|e| CacheError::Serialization(e.to_string()))?,
        );
        SessionKeyMaterial::from_keypair_bytes(&bytes)
            .map(Some)
            .map_err(|e| CacheError::Serialization(e.to_string()))
    }

    pub fn store(&self, identity: &Address, material: &SessionKeyMaterial) -> Result<(), CacheError> {
        let bytes = material.to_keypair_bytes();
        let plain = Zeroizing::new(
            serde_json::to_string(&bytes[..])
                .map_err(|e| CacheError::Serialization(e.to_string()))?,
        );
        let encoded = self.protection.encode(identity, &plain)?;
        self.store.put(&Self::key_for(identity), &encoded)?;
        tracing::debug!(
            identity = %identity,
            session = %material.address(),
            "cached session key"
        );
        Ok(())
    }

    pub fn clear(&self, identity: &Address) -> Result<(), CacheError> {
        self.store.remove(&Self::key_for(identity))
    }

    pub fn exists(&self, identity: &Address) -> bool {
        self.load(identity).is_some()
    }
}

impl std::fmt::Debug for CredentialCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CredentialCache")
            .field("protection", &self.protection)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn identity() -> Address {
        Address::new([7u8; 32])
    }

    fn material() -> SessionKeyMaterial {
        SessionKeyMaterial::from_seed(&[42u8; 32])
    }

    #[test]
    fn round_trip() {
        let cache = CredentialCache::in_memory();
        assert!(cache.load(&identity()).is_none());
        cache.store(&identity(), &material()).unwrap();
        assert_eq!(cache.load(&identity()), Some(material()));
        assert!(cache.exists(&identity()));
    }

    #[test]
    fn clear_removes_entry() {
        let cache = CredentialCache::in_memory();
        cache.store(&identity(), &material()).unwrap();
        cache.clear(&identity()).unwrap();
        assert!(cache.load(&identity()).is_none());
        cache.clear(&identity()).unwrap();
    }

    #[test]
    fn corrupted_entry_reads_as_absent() {
        let store = Arc::new(MemoryStore::new());
        let cache = CredentialCache::new(store.clone(), CacheProtection::Plaintext);
        let key = CredentialCache::key_for(&identity());

        store.put(&key, "not json").unwrap();
        assert!(cache.load(&identity()).is_none());

        store.put(&key, "[1,2,3]").unwrap();
        assert!(cache.load(&identity()).is_none());

        let mut bytes = material().to_keypair_bytes().to_vec();
        bytes[63] ^= 1;
        store.put(&key, &serde_json::to_string(&bytes).unwrap()).unwrap();
        assert!(cache.load(&identity()).is_none());
    }

    #[test]
    fn plaintext_layout_is_a_json_byte_array() {
        let store = Arc::new(MemoryStore::new());
        let cache = CredentialCache::new(store.clone(), CacheProtection::Plaintext);
        cache.store(&identity(), &material()).unwrap();
        let raw = store
            .get(&CredentialCache::key_for(&identity()))
            .unwrap()
            .unwrap();
        let bytes: Vec<u8> = serde_json::from_str(&raw).unwrap();
        assert_eq!(bytes.len(), 64);
        assert_eq!(&bytes[32..], material().address().as_bytes());
    }

    #[test]
    fn sealed_round_trip() {
        let store = Arc::new(MemoryStore::new());
        let cache = CredentialCache::new(
            store.clone(),
            CacheProtection::Sealed(SealingKey::from_passphrase("hunter2")),
        );
        cache.store(&identity(), &material()).unwrap();
        assert_eq!(cache.load(&identity()), Some(material()));

        let raw = store
            .get(&CredentialCache::key_for(&identity()))
            .unwrap()
            .unwrap();
        assert!(raw.contains("\"ct\""));
    }

    #[test]
    fn wrong_passphrase_reads_as_absent() {
        let store = Arc::new(MemoryStore::new());
        CredentialCache::new(
            store.clone(),
            CacheProtection::Sealed(SealingKey::from_passphrase("right")),
        )
        .store(&identity(), &material())
        .unwrap();

        let wrong = CredentialCache::new(
            store.clone(),
            CacheProtection::Sealed(SealingKey::from_passphrase("wrong")),
        );
        assert!(wrong.load(&identity()).is_none());

        let plain = CredentialCache::new(store, CacheProtection::Plaintext);
        assert!(plain.load(&identity()).is_none());
    }

    #[test]
    fn sealed_entry_is_bound_to_identity() {
        let store = Arc::new(MemoryStore::new());
        let protection = CacheProtection::Sealed(SealingKey::from_passphrase("p"));
        let cache = CredentialCache::new(store.clone(), protection);
        cache.store(&identity(), &material()).unwrap();

        let other = Address::new([8u8; 32]);
        let raw = store
            .get(&CredentialCache::key_for(&identity()))
            .unwrap()
            .unwrap();
        store.put(&CredentialCache::key_for(&other), &raw).unwrap();
        assert!(cache.load(&other).is_none());
    }

    #[test]
    fn file_store_persists_across_instances() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileStore::for_origin(dir.path(), "https://grid.example");
        let cache = CredentialCache::new(Arc::new(store.clone()), CacheProtection::Plaintext);
        cache.store(&identity(), &material()).unwrap();

        let reopened = CredentialCache::new(
            Arc::new(FileStore::for_origin(dir.path(), "https://grid.example")),
            CacheProtection::Plaintext,
        );
        assert_eq!(reopened.load(&identity()), Some(material()));

        let other_origin = CredentialCache::new(
            Arc::new(FileStore::for_origin(dir.path(), "https://other.example")),
            CacheProtection::Plaintext,
        );
        assert!(other_origin.load(&identity()).is_none());

        reopened.clear(&identity()).unwrap();
        assert!(cache.load(&identity()).is_none());
        assert!(store.dir().starts_with(dir.path()));
    }

    #[cfg(unix)]
    #[test]
    fn file_store_entries_are_owner_only() {
        use std::os::unix::fs::PermissionsExt;
        let dir = tempfile::tempdir().unwrap();
        let store = FileStore::new(dir.path());
        store.put("session_key:abc", "[]").unwrap();
        let mode = fs::metadata(store.path_for("session_key:abc"))
            .unwrap()
            .permissions()
            .mode();
        assert_eq!(mode & 0o777, 0o600);
    }
}
