//! # cleanup-core: AI-assisted disk cleanup analysis engine
//!
//! A graceful-degradation pipeline that routes a batch of filesystem
//! metadata through a persistent result cache, an LLM transport guarded
//! by adaptive batching and resilience primitives, and a deterministic
//! rule-based fallback — fusing whichever produced the recommendations
//! with an external safety layer before returning one `AnalysisResult`.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────┐
//! │                        Orchestrator                          │
//! ├──────────────┬──────────────┬──────────────┬─────────────────┤
//! │    Cache     │  Batcher +   │  Rule Engine │   Safety Layer  │
//! │   (store)    │  Resilience  │  (fallback)  │     (fuser)     │
//! │              │      │       │              │                 │
//! │              │      ▼       │              │                 │
//! │              │  LLM Transport (Vault-backed credentials)     │
//! └──────────────┴──────────────┴──────────────┴─────────────────┘
//! ```
//!
//! Component dependency order: Safety Layer and Cache have no internal
//! dependencies; LLM Transport depends on the Credential Vault; Batcher
//! + Resilience depends on the Transport; the Orchestrator composes all
//! of the above.
//!
//! ## Quick start
//!
//! ```rust,no_run
//! use cleanup_core::{CleanupConfig, CredentialVault, Orchestrator, PermissiveSafetyLayer};
//! use std::sync::Arc;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = CleanupConfig::default();
//!     let vault = Arc::new(CredentialVault::new(std::env::temp_dir()));
//!     let orchestrator = Orchestrator::new(
//!         config,
//!         std::env::temp_dir().join("ai-disk-cleanup-cache"),
//!         vault,
//!         None,
//!         Arc::new(PermissiveSafetyLayer),
//!     )?;
//!
//!     let result = orchestrator.analyze(&[], false).await;
//!     println!("analyzed {} files", result.file_count);
//!     Ok(())
//! }
//! ```

#![warn(missing_docs)]
#![warn(unsafe_code)]
#![warn(clippy::all)]
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::too_many_arguments)]
#![allow(clippy::type_complexity)]
#![cfg_attr(test, allow(clippy::unwrap_used))]
#![cfg_attr(test, allow(clippy::expect_used))]

/// Core data model, errors, configuration, and content-addressed
/// fingerprinting shared by every other module.
pub mod core;

/// Deterministic, network-free rule-based fallback analyzer.
pub mod rules;

/// External safety-policy collaborator consulted during fusion.
pub mod safety;

/// Authenticated-encryption credential vault for per-provider API keys.
pub mod vault;

/// Retry-with-backoff and the three-state circuit breaker.
pub mod resilience;

/// Adaptive batch sizing driven by observed latency.
pub mod batching;

/// LLM transport contract and the OpenAI-compatible HTTP implementation.
pub mod transport;

/// Persistent, content-addressed, TTL-bounded result cache.
pub mod cache;

/// The `analyze()` pipeline composing every component above.
pub mod orchestrator;

pub use batching::BatchConfig;
pub use cache::{CacheEntry, CacheLimits, CacheStats, ResultCache};
pub use core::config::{BatchingConfig, BreakerConfig, CacheConfig, CleanupConfig, LlmConfig};
pub use core::errors::{CleanupError, ErrorKind, Result, ResultExt};
pub use core::fingerprint::{batch_cache_key, fingerprint, CacheKeyParams};
pub use core::types::{Action, AnalysisResult, FileMeta, Mode, Recommendation, RiskLevel, Summary};
pub use orchestrator::{HealthReport, Orchestrator, UsageStats};
pub use resilience::{BreakerCallError, BreakerOpenError, BreakerState, CircuitBreaker, Resilience, RetryPolicy};
pub use rules::RuleEngine;
pub use safety::{PermissiveSafetyLayer, ProtectionLevel, SafetyLayer, SafetyScore};
pub use transport::{LlmTransport, OpenAiTransport, TransportParams};
pub use vault::{CredentialRecord, CredentialVault, SecretString};

/// Library version information.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
