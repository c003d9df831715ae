//! Secure credential vault (spec §4.4).
//!
//! Authenticated-encryption store for per-provider LLM API keys, bound
//! to a process-specific master key. Grounded on spec §4.4's exact
//! record format and key hierarchy, and on the behavioral contract
//! recorded in `test_credential_store.py` (the only available ground
//! truth for the original `credential_store.py`, which the retrieval
//! pack's filters dropped): a `service_name` of `"ai-disk-cleanup"`, an
//! OS-keyring-first strategy with an environment-variable fallback for
//! the master key, and a per-provider environment variable fallback
//! (`<PROVIDER>_API_KEY`) when no stored record exists at all.
//!
//! Threat model (spec §4.4): disk exfiltration of ciphertext alone must
//! not yield the key; tampering must be detected via the AEAD tag;
//! comparisons must be constant-time; error messages must never leak
//! plaintext, ciphertext, key material or backend-specific exceptions.

use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use aes_gcm::aead::{Aead, KeyInit, Payload};
use aes_gcm::{Aes256Gcm, Key, Nonce};
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use once_cell::sync::OnceCell;
use pbkdf2::pbkdf2_hmac;
use rand::RngCore;
use serde::{Deserialize, Serialize};
use sha2::Sha256;
use subtle::ConstantTimeEq;
use tracing::warn;
use zeroize::{Zeroize, ZeroizeOnDrop};

use crate::core::errors::{CleanupError, Result};

const SERVICE_LABEL: &str = "ai-disk-cleanup";
const MASTER_KEY_ENV: &str = "AI_DISK_CLEANUP_MASTER_KEY";
const RECORD_FORMAT_VERSION: u8 = 1;
const PBKDF2_ITERATIONS: u32 = 100_000;
const NONCE_LEN: usize = 12;
const SALT_LEN: usize = 16;
const KEY_LEN: usize = 32;

/// A string that zeroizes its backing memory on drop. Used for anything
/// that came out of decryption or is about to go into encryption.
#[derive(Clone, Zeroize, ZeroizeOnDrop)]
pub struct SecretString(String);

impl SecretString {
    pub fn new(value: String) -> Self {
        Self(value)
    }

    pub fn expose(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Debug for SecretString {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("SecretString(***)")
    }
}

/// A stored (still-encrypted) credential record. The on-disk/keyring
/// payload is `base64(version ‖ nonce ‖ ciphertext ‖ tag)`; this struct
/// is the in-memory view spec §3 names, reconstructed from that payload.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CredentialRecord {
    pub provider: String,
    pub payload: String,
    pub created_at: chrono::DateTime<chrono::Utc>,
}

#[derive(Zeroize, ZeroizeOnDrop)]
struct MasterMaterial {
    key: [u8; KEY_LEN],
    salt: [u8; SALT_LEN],
}

/// Persisted provider → payload map used as the keyring-unavailable
/// fallback, matching spec §6's `<config-dir>/credentials.enc` layout.
#[derive(Debug, Default, Serialize, Deserialize)]
struct FileStore {
    records: HashMap<String, CredentialRecord>,
}

/// Authenticated-encryption credential vault.
pub struct CredentialVault {
    config_dir: PathBuf,
    derived_key: OnceCell<[u8; KEY_LEN]>,
    master_material: Mutex<Option<MasterMaterial>>,
    known_providers: Mutex<std::collections::HashSet<String>>,
}

impl CredentialVault {
    pub fn new(config_dir: impl Into<PathBuf>) -> Self {
        Self {
            config_dir: config_dir.into(),
            derived_key: OnceCell::new(),
            master_material: Mutex::new(None),
            known_providers: Mutex::new(std::collections::HashSet::new()),
        }
    }

    fn credentials_file(&self) -> PathBuf {
        self.config_dir.join("credentials.enc")
    }

    fn keyring_entry(key_name: &str) -> std::result::Result<keyring::Entry, keyring::Error> {
        keyring::Entry::new(SERVICE_LABEL, key_name)
    }

    /// Load the master key and salt, in priority order: explicit
    /// environment override, OS keyring, then a freshly generated
    /// in-process-only value (best-effort persisted to the keyring).
    fn load_master_material(&self) -> Result<MasterMaterial> {
        if let Ok(encoded) = std::env::var(MASTER_KEY_ENV) {
            return Self::decode_master_material(&encoded)
                .map_err(|_| CleanupError::vault("invalid master key material in environment"));
        }

        if let Ok(entry) = Self::keyring_entry("master_key") {
            if let Ok(encoded) = entry.get_password() {
                if let Ok(material) = Self::decode_master_material(&encoded) {
                    return Ok(material);
                }
            }
        }

        let mut key = [0u8; KEY_LEN];
        let mut salt = [0u8; SALT_LEN];
        rand::thread_rng().fill_bytes(&mut key);
        rand::thread_rng().fill_bytes(&mut salt);
        let material = MasterMaterial { key, salt };

        let encoded = Self::encode_master_material(&material);
        if let Ok(entry) = Self::keyring_entry("master_key") {
            if entry.set_password(&encoded).is_err() {
                warn!("OS keyring unavailable; master key will not survive process restart unless {MASTER_KEY_ENV} is set");
            }
        }

        Ok(material)
    }

    fn encode_master_material(material: &MasterMaterial) -> String {
        let mut blob = Vec::with_capacity(SALT_LEN + KEY_LEN);
        blob.extend_from_slice(&material.salt);
        blob.extend_from_slice(&material.key);
        BASE64.encode(blob)
    }

    fn decode_master_material(encoded: &str) -> std::result::Result<MasterMaterial, ()> {
        let blob = BASE64.decode(encoded.trim()).map_err(|_| ())?;
        if blob.len() != SALT_LEN + KEY_LEN {
            return Err(());
        }
        let mut salt = [0u8; SALT_LEN];
        let mut key = [0u8; KEY_LEN];
        salt.copy_from_slice(&blob[..SALT_LEN]);
        key.copy_from_slice(&blob[SALT_LEN..]);
        Ok(MasterMaterial { key, salt })
    }

    /// PBKDF2-HMAC-SHA256 derivation of the per-record encryption key,
    /// cached in-process per spec §4.4.
    fn derived_key(&self) -> Result<[u8; KEY_LEN]> {
        if let Some(key) = self.derived_key.get() {
            return Ok(*key);
        }

        let material = {
            let mut guard = self.master_material.lock().expect("vault mutex poisoned");
            if guard.is_none() {
                *guard = Some(self.load_master_material()?);
            }
            let m = guard.as_ref().unwrap();
            (m.key, m.salt)
        };

        let mut derived = [0u8; KEY_LEN];
        pbkdf2_hmac::<Sha256>(&material.0, &material.1, PBKDF2_ITERATIONS, &mut derived);
        let _ = self.derived_key.set(derived);
        Ok(derived)
    }

    fn encrypt(&self, plaintext: &str) -> Result<String> {
        let key_bytes = self.derived_key()?;
        let cipher = Aes256Gcm::new(Key::<Aes256Gcm>::from_slice(&key_bytes));

        let mut nonce_bytes = [0u8; NONCE_LEN];
        rand::thread_rng().fill_bytes(&mut nonce_bytes);
        let nonce = Nonce::from_slice(&nonce_bytes);

        let ciphertext = cipher
            .encrypt(
                nonce,
                Payload {
                    msg: plaintext.as_bytes(),
                    aad: &[RECORD_FORMAT_VERSION],
                },
            )
            .map_err(|_| CleanupError::vault("encryption failed"))?;

        let mut blob = Vec::with_capacity(1 + NONCE_LEN + ciphertext.len());
        blob.push(RECORD_FORMAT_VERSION);
        blob.extend_from_slice(&nonce_bytes);
        blob.extend_from_slice(&ciphertext);
        Ok(BASE64.encode(blob))
    }

    /// Decrypt `payload` belonging to `provider`. Both a version mismatch
    /// and an AEAD tag failure are tamper/corruption signals scoped to
    /// that provider's record, so both surface as `CleanupError::integrity`
    /// (spec §7) rather than a generic vault error.
    fn decrypt(&self, provider: &str, payload: &str) -> Result<SecretString> {
        let blob = BASE64
            .decode(payload.trim())
            .map_err(|_| CleanupError::integrity(provider))?;

        if blob.len() < 1 + NONCE_LEN {
            return Err(CleanupError::integrity(provider));
        }

        let version = blob[0];
        if !bool::from(version.ct_eq(&RECORD_FORMAT_VERSION)) {
            // An unrecognized version is a corruption signal, not
            // necessarily tampering, but it fails the same way: the
            // record cannot be trusted.
            return Err(CleanupError::integrity(provider));
        }

        let nonce_bytes = &blob[1..1 + NONCE_LEN];
        let ciphertext = &blob[1 + NONCE_LEN..];

        let key_bytes = self.derived_key()?;
        let cipher = Aes256Gcm::new(Key::<Aes256Gcm>::from_slice(&key_bytes));
        let nonce = Nonce::from_slice(nonce_bytes);

        let plaintext = cipher
            .decrypt(
                nonce,
                Payload {
                    msg: ciphertext,
                    aad: &[RECORD_FORMAT_VERSION],
                },
            )
            .map_err(|_| CleanupError::integrity(provider))?;

        let text = String::from_utf8(plaintext)
            .map_err(|_| CleanupError::integrity(provider))?;
        Ok(SecretString::new(text))
    }

    fn load_file_store(&self) -> FileStore {
        let path = self.credentials_file();
        match fs::read_to_string(&path) {
            Ok(content) => serde_json::from_str(&content).unwrap_or_default(),
            Err(_) => FileStore::default(),
        }
    }

    fn save_file_store(&self, store: &FileStore) -> Result<()> {
        fs::create_dir_all(&self.config_dir)?;
        let serialized = serde_json::to_string_pretty(store)?;
        let path = self.credentials_file();
        let temp_path = path.with_extension("enc.tmp");
        fs::write(&temp_path, serialized)?;
        harden_permissions(&temp_path);
        fs::rename(&temp_path, &path)?;
        Ok(())
    }

    fn record_key_name(provider: &str) -> String {
        format!("api_key_{provider}")
    }

    /// Encrypt `key` and durably store it for `provider`. Either the new
    /// record becomes durable or the old one remains intact.
    pub fn set(&self, provider: &str, key: &str) -> Result<()> {
        let payload = self.encrypt(key)?;
        let record = CredentialRecord {
            provider: provider.to_string(),
            payload: payload.clone(),
            created_at: chrono::Utc::now(),
        };

        let mut stored_via_keyring = false;
        if let Ok(entry) = Self::keyring_entry(&Self::record_key_name(provider)) {
            if entry.set_password(&payload).is_ok() {
                stored_via_keyring = true;
            }
        }

        if !stored_via_keyring {
            let mut store = self.load_file_store();
            store.records.insert(provider.to_string(), record);
            self.save_file_store(&store)?;
        }

        self.known_providers
            .lock()
            .expect("vault mutex poisoned")
            .insert(provider.to_string());
        Ok(())
    }

    /// Decrypt and return the key for `provider`, if any. Checks the OS
    /// keyring, then the file fallback, then `<PROVIDER>_API_KEY`.
    pub fn get(&self, provider: &str) -> Result<Option<SecretString>> {
        if let Ok(entry) = Self::keyring_entry(&Self::record_key_name(provider)) {
            if let Ok(payload) = entry.get_password() {
                return self.decrypt(provider, &payload).map(Some);
            }
        }

        let store = self.load_file_store();
        if let Some(record) = store.records.get(provider) {
            return self.decrypt(provider, &record.payload).map(Some);
        }

        let env_var = format!("{}_API_KEY", provider.to_uppercase());
        if let Ok(value) = std::env::var(&env_var) {
            return Ok(Some(SecretString::new(value)));
        }

        Ok(None)
    }

    /// Remove the stored record for `provider`. Absence is not an error.
    pub fn delete(&self, provider: &str) -> Result<()> {
        if let Ok(entry) = Self::keyring_entry(&Self::record_key_name(provider)) {
            let _ = entry.delete_password();
        }

        let mut store = self.load_file_store();
        if store.records.remove(provider).is_some() {
            self.save_file_store(&store)?;
        }

        self.known_providers
            .lock()
            .expect("vault mutex poisoned")
            .remove(provider);
        Ok(())
    }

    /// Format-only validation: prefix and length heuristics, never a
    /// call to the remote API. Recognized providers get a documented
    /// prefix check; unrecognized providers just need a minimum length.
    pub fn test(&self, provider: &str, key: &str) -> bool {
        match provider {
            "openai" => key.starts_with("sk-") && key.len() >= 20,
            _ => key.len() >= 8,
        }
    }

    /// Enumerate providers with a stored or env-provided key. The
    /// `keyring` crate has no enumeration API, so this tracks providers
    /// this process has `set()` plus whatever the file fallback and the
    /// given candidate list of env-var-checkable provider names show.
    pub fn list_providers(&self, env_candidates: &[&str]) -> Vec<String> {
        let mut providers: std::collections::HashSet<String> = self
            .known_providers
            .lock()
            .expect("vault mutex poisoned")
            .clone();

        for provider in self.load_file_store().records.keys() {
            providers.insert(provider.clone());
        }

        for candidate in env_candidates {
            let env_var = format!("{}_API_KEY", candidate.to_uppercase());
            if std::env::var(&env_var).is_ok() {
                providers.insert(candidate.to_string());
            }
        }

        let mut list: Vec<String> = providers.into_iter().collect();
        list.sort();
        list
    }
}

#[cfg(unix)]
fn harden_permissions(path: &Path) {
    use std::os::unix::fs::PermissionsExt;
    if let Ok(metadata) = fs::metadata(path) {
        let mut perms = metadata.permissions();
        perms.set_mode(0o600);
        let _ = fs::set_permissions(path, perms);
    }
}

#[cfg(not(unix))]
fn harden_permissions(_path: &Path) {}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;
    use tempfile::TempDir;

    fn vault_with_env_key(dir: &Path) -> CredentialVault {
        let mut blob = vec![0u8; SALT_LEN + KEY_LEN];
        rand::thread_rng().fill_bytes(&mut blob);
        std::env::set_var(MASTER_KEY_ENV, BASE64.encode(blob));
        CredentialVault::new(dir.to_path_buf())
    }

    #[test]
    #[serial]
    fn set_then_get_round_trips() {
        let dir = TempDir::new().unwrap();
        let vault = vault_with_env_key(dir.path());
        vault.set("openai", "sk-abcdefghijklmnopqrstuvwxyz").unwrap();
        let key = vault.get("openai").unwrap().unwrap();
        assert_eq!(key.expose(), "sk-abcdefghijklmnopqrstuvwxyz");
        std::env::remove_var(MASTER_KEY_ENV);
    }

    #[test]
    #[serial]
    fn tampering_with_stored_payload_raises_integrity_error() {
        let dir = TempDir::new().unwrap();
        let vault = vault_with_env_key(dir.path());
        vault.set("openai", "sk-abcdefghijklmnopqrstuvwxyz").unwrap();

        // Simulate tampering: find the stored record and flip a byte.
        let mut store = vault.load_file_store();
        if let Some(record) = store.records.get_mut("openai") {
            let mut decoded = BASE64.decode(&record.payload).unwrap();
            let last = decoded.len() - 1;
            decoded[last] ^= 0xFF;
            record.payload = BASE64.encode(decoded);
        }
        vault.save_file_store(&store).unwrap();

        let result = vault.get("openai");
        assert!(matches!(result, Err(CleanupError::Integrity { .. })));

        // Other records must remain retrievable.
        vault.set("anthropic", "ant-1234567890abcdef").unwrap();
        assert!(vault.get("anthropic").unwrap().is_some());

        std::env::remove_var(MASTER_KEY_ENV);
    }

    #[test]
    #[serial]
    fn set_after_tamper_recovers() {
        let dir = TempDir::new().unwrap();
        let vault = vault_with_env_key(dir.path());
        vault.set("openai", "sk-abcdefghijklmnopqrstuvwxyz").unwrap();

        let mut store = vault.load_file_store();
        if let Some(record) = store.records.get_mut("openai") {
            let mut decoded = BASE64.decode(&record.payload).unwrap();
            let last = decoded.len() - 1;
            decoded[last] ^= 0xFF;
            record.payload = BASE64.encode(decoded);
        }
        vault.save_file_store(&store).unwrap();
        assert!(vault.get("openai").is_err());

        vault.set("openai", "sk-zyxwvutsrqponmlkjihg").unwrap();
        let key = vault.get("openai").unwrap().unwrap();
        assert_eq!(key.expose(), "sk-zyxwvutsrqponmlkjihg");

        std::env::remove_var(MASTER_KEY_ENV);
    }

    #[test]
    #[serial]
    fn delete_removes_record_without_error_if_absent() {
        let dir = TempDir::new().unwrap();
        let vault = vault_with_env_key(dir.path());
        assert!(vault.delete("never-set").is_ok());
        vault.set("openai", "sk-abcdefghijklmnopqrstuvwxyz").unwrap();
        vault.delete("openai").unwrap();
        assert!(vault.get("openai").unwrap().is_none());
        std::env::remove_var(MASTER_KEY_ENV);
    }

    #[test]
    #[serial]
    fn env_var_fallback_used_when_no_stored_record() {
        let dir = TempDir::new().unwrap();
        let vault = vault_with_env_key(dir.path());
        std::env::set_var("CUSTOMPROVIDER_API_KEY", "plain-env-key");
        let key = vault.get("customprovider").unwrap().unwrap();
        assert_eq!(key.expose(), "plain-env-key");
        std::env::remove_var("CUSTOMPROVIDER_API_KEY");
        std::env::remove_var(MASTER_KEY_ENV);
    }

    #[test]
    fn test_format_heuristics() {
        let dir = TempDir::new().unwrap();
        let vault = CredentialVault::new(dir.path().to_path_buf());
        assert!(vault.test("openai", "sk-abcdefghijklmnopqrstuvwxyz"));
        assert!(!vault.test("openai", "short"));
        assert!(vault.test("custom", "12345678"));
        assert!(!vault.test("custom", "short"));
    }
}
