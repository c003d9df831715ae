//! Fingerprint and batch-cache-key hashing (spec §3).
//!
//! A fingerprint is a 16-hex digest of a file's drift-sensitive metadata;
//! the batch cache key is a 32-hex digest of a whole batch plus the
//! analysis parameters that would change the LLM's answer. Both are
//! content-addresses, not security tokens — collisions are a correctness
//! concern, not a confidentiality one, so plain truncated SHA-256 is
//! sufficient (mirrors `compute_codebase_signature` in the cache module
//! this crate is grounded on).

use sha2::{Digest, Sha256};

use crate::core::types::FileMeta;

/// 16-hex-character digest of (path, size, modified, created, extension).
pub fn fingerprint(file: &FileMeta) -> String {
    let canonical = format!(
        "{}|{}|{}|{}|{}",
        file.path,
        file.size_bytes,
        file.modified.to_rfc3339(),
        file.created.to_rfc3339(),
        file.extension
    );
    let digest = Sha256::digest(canonical.as_bytes());
    hex::encode(digest)[..16].to_string()
}

/// Parameters that participate in the batch cache key. Anything that
/// would change what the LLM returns belongs here.
#[derive(Debug, Clone, PartialEq)]
pub struct CacheKeyParams {
    pub provider: String,
    pub model: String,
    pub temperature: f64,
    pub max_tokens: u32,
    pub safety_enabled: bool,
}

/// 32-hex-character digest of (sorted fingerprints, provider, model,
/// temperature, max-tokens, safety-enabled flag).
pub fn batch_cache_key(files: &[FileMeta], params: &CacheKeyParams) -> String {
    let mut fingerprints: Vec<String> = files.iter().map(fingerprint).collect();
    fingerprints.sort();

    let canonical = format!(
        "{}|{}|{}|{:.6}|{}|{}",
        fingerprints.join(","),
        params.provider,
        params.model,
        params.temperature,
        params.max_tokens,
        params.safety_enabled
    );
    let digest = Sha256::digest(canonical.as_bytes());
    hex::encode(digest)[..32].to_string()
}
