//! Analysis orchestrator (spec §4.1): the `analyze()` pipeline that
//! routes a file batch through cache, LLM, and rule-based fallback,
//! fusing with the safety layer into one `AnalysisResult`.
//!
//! Grounded on `AIFileAnalyzer.analyze_files` in the original Python
//! implementation for the pipeline's step ordering and usage-limit
//! gating, and on `ai_analyzer.py`'s `health_check()` for the
//! supplemented [`HealthReport`] surface.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::{DateTime, NaiveDate, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tracing::{instrument, warn};

use crate::batching::BatchConfig;
use crate::cache::{CacheLimits, ResultCache};
use crate::core::config::CleanupConfig;
use crate::core::errors::ErrorKind;
use crate::core::fingerprint::CacheKeyParams;
use crate::core::types::{Action, AnalysisResult, FileMeta, Mode, Recommendation, RiskLevel, Summary};
use crate::resilience::{BreakerCallError, CircuitBreaker, Resilience, RetryPolicy};
use crate::rules::RuleEngine;
use crate::safety::{ProtectionLevel, SafetyLayer};
use crate::transport::{LlmTransport, TransportParams};
use crate::vault::CredentialVault;

/// Per-session usage accounting (spec §3, §4.3's usage-limit gate).
/// Owned exclusively by the orchestrator; counters reset when the
/// day-bucket (UTC calendar date) rolls over.
#[derive(Debug)]
pub struct UsageStats {
    day_bucket: Mutex<NaiveDate>,
    requests_today: AtomicU64,
    tokens_today: AtomicU64,
    cost_today_micros: AtomicU64,
    session_cost_micros: AtomicU64,
    rate_limit_hits: AtomicU64,
    quota_exceeded_count: AtomicU64,
}

/// Fixed-point micro-dollar scale so the cost counters can live in
/// atomics without floating-point races.
const COST_SCALE: f64 = 1_000_000.0;

impl UsageStats {
    pub fn new() -> Self {
        Self {
            day_bucket: Mutex::new(Utc::now().date_naive()),
            requests_today: AtomicU64::new(0),
            tokens_today: AtomicU64::new(0),
            cost_today_micros: AtomicU64::new(0),
            session_cost_micros: AtomicU64::new(0),
            rate_limit_hits: AtomicU64::new(0),
            quota_exceeded_count: AtomicU64::new(0),
        }
    }

    fn roll_day_bucket_if_needed(&self) {
        let today = Utc::now().date_naive();
        let mut bucket = self.day_bucket.lock();
        if *bucket != today {
            *bucket = today;
            self.requests_today.store(0, Ordering::SeqCst);
            self.tokens_today.store(0, Ordering::SeqCst);
            self.cost_today_micros.store(0, Ordering::SeqCst);
        }
    }

    pub fn requests_today(&self) -> u64 {
        self.requests_today.load(Ordering::SeqCst)
    }
    pub fn tokens_today(&self) -> u64 {
        self.tokens_today.load(Ordering::SeqCst)
    }
    pub fn cost_today(&self) -> f64 {
        self.cost_today_micros.load(Ordering::SeqCst) as f64 / COST_SCALE
    }
    pub fn session_cost(&self) -> f64 {
        self.session_cost_micros.load(Ordering::SeqCst) as f64 / COST_SCALE
    }
    pub fn rate_limit_hits(&self) -> u64 {
        self.rate_limit_hits.load(Ordering::SeqCst)
    }
    pub fn quota_exceeded_count(&self) -> u64 {
        self.quota_exceeded_count.load(Ordering::SeqCst)
    }

    /// All four gates must hold for the LLM to be dispatched (spec §4.3).
    fn within_limits(&self, config: &CleanupConfig) -> bool {
        self.roll_day_bucket_if_needed();
        self.requests_today() < config.max_daily_requests
            && self.tokens_today() < config.max_daily_tokens
            && self.cost_today() < config.max_daily_cost
            && self.session_cost() + config.cost_per_request <= config.max_session_cost
    }

    /// Record a successful dispatch. `session_cost` strictly increases
    /// per successful call per spec §9's open-question decision (flat
    /// per-request cost, never zero).
    fn record_success(&self, tokens: u64, cost: f64) {
        self.roll_day_bucket_if_needed();
        self.requests_today.fetch_add(1, Ordering::SeqCst);
        self.tokens_today.fetch_add(tokens, Ordering::SeqCst);
        let cost_micros = (cost * COST_SCALE).round() as u64;
        self.cost_today_micros.fetch_add(cost_micros, Ordering::SeqCst);
        self.session_cost_micros.fetch_add(cost_micros, Ordering::SeqCst);
    }

    fn record_failure(&self, kind: ErrorKind) {
        match kind {
            ErrorKind::RateLimit => {
                self.rate_limit_hits.fetch_add(1, Ordering::SeqCst);
            }
            ErrorKind::QuotaExceeded => {
                self.quota_exceeded_count.fetch_add(1, Ordering::SeqCst);
            }
            _ => {}
        }
    }
}

impl Default for UsageStats {
    fn default() -> Self {
        Self::new()
    }
}

/// Non-mutating health snapshot, supplementing spec.md with the
/// original's `health_check()` surface (SPEC_FULL §1).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthReport {
    pub llm_configured: bool,
    pub breaker_state: crate::resilience::BreakerState,
    pub requests_today: u64,
    pub tokens_today: u64,
    pub cost_today: f64,
    pub session_cost: f64,
    pub checked_at: DateTime<Utc>,
}

/// Composes Cache, Batcher+Resilience, Rule Engine, Safety Layer, Vault
/// and Transport into the single `analyze()` pipeline of spec §4.1.
pub struct Orchestrator {
    config: CleanupConfig,
    cache: ResultCache,
    batch_config: Mutex<BatchConfig>,
    resilience: Resilience,
    rules: RuleEngine,
    safety: Arc<dyn SafetyLayer>,
    transport: Option<Arc<dyn LlmTransport>>,
    vault: Arc<CredentialVault>,
    usage: UsageStats,
}

impl Orchestrator {
    pub fn new(
        config: CleanupConfig,
        cache_dir: impl Into<std::path::PathBuf>,
        vault: Arc<CredentialVault>,
        transport: Option<Arc<dyn LlmTransport>>,
        safety: Arc<dyn SafetyLayer>,
    ) -> crate::core::errors::Result<Self> {
        config.validate()?;

        let cache_limits = CacheLimits {
            ttl: Duration::from_secs(config.cache.ttl_hours * 3600),
            max_size_mib: config.cache.max_size_mib,
            max_entries: config.cache.max_entries,
            cleanup_interval: Duration::from_secs(config.cache.cleanup_interval_hours * 3600),
        };
        let batch_config = BatchConfig::new(
            config.batching.min,
            config.batching.max,
            Duration::from_secs_f64(config.batching.target_seconds),
            config.batching.adaptive,
        );
        let breaker = Arc::new(CircuitBreaker::new(
            config.breaker.failure_threshold,
            Duration::from_secs(config.breaker.recovery_timeout_seconds),
        ));
        let retry = RetryPolicy {
            max_retries: config.batching.max_retries,
            ..RetryPolicy::default()
        };

        Ok(Self {
            cache: ResultCache::new(cache_dir, cache_limits),
            batch_config: Mutex::new(batch_config),
            resilience: Resilience::new(breaker, retry),
            rules: RuleEngine::new(),
            safety,
            transport,
            vault,
            usage: UsageStats::new(),
            config,
        })
    }

    fn cache_params(&self) -> CacheKeyParams {
        CacheKeyParams {
            provider: self.config.llm.provider.clone(),
            model: self.config.llm.model.clone(),
            temperature: self.config.llm.temperature,
            max_tokens: self.config.llm.max_tokens,
            safety_enabled: self.config.safety_enabled,
        }
    }

    /// Checks whether the LLM path can be dispatched and, if not, whether
    /// the reason is a hard failure worth surfacing on `AnalysisResult`
    /// rather than a routine "no credential configured" skip. A vault
    /// integrity failure (corrupt/tampered credential) is distinguished
    /// from "no credential" here so it can be threaded through to
    /// `finish_rule_based`'s `error_kind` (spec §7).
    fn llm_usability(&self) -> (bool, Option<ErrorKind>) {
        if self.transport.is_none() {
            return (false, None);
        }
        match self.vault.get(&self.config.llm.provider) {
            Ok(Some(_)) => {}
            Ok(None) => return (false, None),
            Err(crate::core::errors::CleanupError::Integrity { .. }) => {
                return (false, Some(ErrorKind::Integrity));
            }
            Err(_) => return (false, None),
        }
        if !self.usage.within_limits(&self.config) {
            return (false, None);
        }
        (
            self.resilience.breaker.state() != crate::resilience::BreakerState::Open,
            None,
        )
    }

    /// `analyze(files, force_mode)`: the full pipeline of spec §4.1.
    /// Never raises; every failure degrades to rule-based with an
    /// `error_kind`, except configuration errors already raised at
    /// construction.
    #[instrument(skip(self, files), fields(file_count = files.len()))]
    pub async fn analyze(&self, files: &[FileMeta], force_rule_based: bool) -> AnalysisResult {
        let start = Instant::now();

        if files.is_empty() {
            return AnalysisResult::empty();
        }

        let (llm_usable, unusable_reason) = self.llm_usability();
        let use_llm = !force_rule_based && llm_usable;

        if use_llm {
            let params = self.cache_params();
            if let Some(cached) = self.cache.get(files, &params) {
                return cached;
            }
        }

        if !use_llm {
            let error_kind = if force_rule_based { None } else { unusable_reason };
            return self.finish_rule_based(files, start, error_kind).await;
        }

        let plan = {
            let config = self.batch_config.lock();
            config.plan_sub_batches(files.len())
        };

        let mut recommendations = Vec::with_capacity(files.len());
        let mut all_llm_succeeded = true;
        let mut worst_error: Option<ErrorKind> = None;
        let mut offset = 0;

        for sub_batch_size in plan {
            let sub_batch = &files[offset..offset + sub_batch_size];
            offset += sub_batch_size;

            let sub_start = Instant::now();
            match self.run_sub_batch(sub_batch).await {
                Ok(recs) => {
                    recommendations.extend(recs);
                    let tokens = estimate_tokens(sub_batch);
                    self.usage.record_success(tokens, self.config.cost_per_request);
                }
                Err(kind) => {
                    all_llm_succeeded = false;
                    self.usage.record_failure(kind);
                    worst_error = Some(worse_of(worst_error, kind));
                    recommendations.extend(self.rules.evaluate_batch(sub_batch));
                }
            }
            let elapsed = sub_start.elapsed();
            self.batch_config.lock().record_latency(elapsed);
        }

        let fused = self.apply_safety_fusion(recommendations).await;
        let mode = if all_llm_succeeded { Mode::Ai } else { Mode::RuleBased };
        let error_kind = if all_llm_succeeded { None } else { worst_error };

        let batch_size_used = self.batch_config.lock().next_batch_size(files.len());
        let summary = Summary::compute(&fused, batch_size_used);
        let result = AnalysisResult {
            recommendations: fused,
            summary,
            mode,
            error_kind,
            processing_ms: start.elapsed().as_millis() as u64,
            file_count: files.len(),
        };

        if mode == Mode::Ai {
            let params = self.cache_params();
            let ttl = Duration::from_secs(self.config.cache.ttl_hours * 3600);
            self.cache.put(files, &result, &params, ttl);
        }

        result
    }

    async fn finish_rule_based(
        &self,
        files: &[FileMeta],
        start: Instant,
        error_kind: Option<ErrorKind>,
    ) -> AnalysisResult {
        let recommendations = self.rules.evaluate_batch(files);
        // Safety fusion still applies to rule-based recommendations; the
        // pipeline's step 5 runs regardless of which mode produced step 4.
        let fused = self.apply_safety_fusion(recommendations).await;
        let summary = Summary::compute(&fused, files.len());
        AnalysisResult {
            recommendations: fused,
            summary,
            mode: Mode::RuleBased,
            error_kind,
            processing_ms: start.elapsed().as_millis() as u64,
            file_count: files.len(),
        }
    }

    async fn run_sub_batch(&self, sub_batch: &[FileMeta]) -> Result<Vec<Recommendation>, ErrorKind> {
        let transport = self.transport.as_ref().expect("llm_usability checked Some");
        let transport = Arc::clone(transport);
        let params = TransportParams {
            model: self.config.llm.model.clone(),
            temperature: self.config.llm.temperature,
            max_tokens: self.config.llm.max_tokens,
            timeout: Duration::from_secs(self.config.llm.timeout_seconds),
        };

        let files_owned = sub_batch.to_vec();
        let result = self
            .resilience
            .run(move || {
                let transport = Arc::clone(&transport);
                let files = files_owned.clone();
                let params = params.clone();
                async move { transport.analyze_batch(&files, &params).await }
            })
            .await;

        match result {
            Ok(recs) => Ok(recs),
            Err(BreakerCallError::Open(_)) => Err(ErrorKind::BreakerOpen),
            Err(BreakerCallError::Inner(err)) => {
                let kind = ErrorKind::classify(&err.to_string());
                warn!(error = %err, classified = %kind, "sub-batch fell back to rule engine");
                Err(kind)
            }
        }
    }

    /// Safety fusion (spec §4.1 step 5): fused confidence and action
    /// override rules, applied in order.
    async fn apply_safety_fusion(&self, recommendations: Vec<Recommendation>) -> Vec<Recommendation> {
        if !self.config.safety_enabled {
            return recommendations;
        }

        let mut fused = Vec::with_capacity(recommendations.len());
        for mut rec in recommendations {
            let score = self.safety.score(&rec.path).await;
            let fused_confidence = (0.4 * rec.confidence + 0.6 * score.confidence).clamp(0.0, 1.0);
            rec.confidence = fused_confidence;

            match score.protection_level {
                ProtectionLevel::Critical | ProtectionLevel::High => {
                    rec.action = Action::Keep;
                    rec.rationale = format!("{} (safety override: protected path)", rec.rationale);
                    rec.risk = RiskLevel::Low;
                }
                ProtectionLevel::RequiresReview if rec.action == Action::Delete => {
                    rec.action = Action::Review;
                }
                _ => {}
            }
            fused.push(rec);
        }
        fused
    }

    /// Remove every cache entry whose fingerprint map contains `path`.
    pub fn invalidate_cache(&self, path: &str) {
        self.cache.invalidate(path);
    }

    pub fn clear_cache(&self) {
        self.cache.clear();
    }

    pub fn cache_stats(&self) -> crate::cache::CacheStats {
        self.cache.stats()
    }

    /// Non-mutating health snapshot (SPEC_FULL supplement #1).
    pub fn health(&self) -> HealthReport {
        let llm_configured = self.transport.is_some()
            && self.vault.get(&self.config.llm.provider).ok().flatten().is_some();
        HealthReport {
            llm_configured,
            breaker_state: self.resilience.breaker.state(),
            requests_today: self.usage.requests_today(),
            tokens_today: self.usage.tokens_today(),
            cost_today: self.usage.cost_today(),
            session_cost: self.usage.session_cost(),
            checked_at: Utc::now(),
        }
    }
}

fn worse_of(current: Option<ErrorKind>, incoming: ErrorKind) -> ErrorKind {
    match current {
        None => incoming,
        Some(existing) => {
            if severity(incoming) > severity(existing) {
                incoming
            } else {
                existing
            }
        }
    }
}

/// Fixed severity order for picking "the most severe sub-batch failure"
/// (spec §4.1). Integrity and breaker-open dominate; unknown is least
/// severe since it carries the least actionable information.
fn severity(kind: ErrorKind) -> u8 {
    match kind {
        ErrorKind::Integrity => 8,
        ErrorKind::BreakerOpen => 7,
        ErrorKind::QuotaExceeded => 6,
        ErrorKind::Authentication => 5,
        ErrorKind::RateLimit => 4,
        ErrorKind::ServerError => 3,
        ErrorKind::NetworkError => 2,
        ErrorKind::Timeout => 1,
        ErrorKind::Unknown => 0,
    }
}

fn estimate_tokens(files: &[FileMeta]) -> u64 {
    files.iter().map(|f| f.approx_serialized_len() as u64 / 3 + 16).sum()
}
