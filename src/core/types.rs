//! Data model shared across every component: `FileMeta`, `Recommendation`,
//! `AnalysisResult` and their supporting enums (spec §3).

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Filesystem record for one file containing only non-content attributes.
///
/// No field here may carry file contents; the transport layer enforces
/// that only this documented field set ever crosses the network boundary
/// (spec §4.3's privacy invariant).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct FileMeta {
    pub path: String,
    pub basename: String,
    pub size_bytes: u64,
    pub extension: String,
    pub modified: DateTime<Utc>,
    pub created: DateTime<Utc>,
    pub accessed: DateTime<Utc>,
    pub parent_dir: String,
    pub hidden: bool,
    pub system: bool,
}

impl FileMeta {
    /// Approximate serialized size in bytes, used to enforce the ≤1 KiB
    /// per-record budget at the transport boundary.
    pub fn approx_serialized_len(&self) -> usize {
        self.path.len()
            + self.basename.len()
            + self.extension.len()
            + self.parent_dir.len()
            + 64 // fixed-width fields (size, timestamps, flags) fudge factor
    }
}

/// One of three verdicts a recommendation can carry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Action {
    Delete,
    Keep,
    Review,
}

/// Risk associated with acting on a recommendation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RiskLevel {
    Low,
    Medium,
    High,
    Critical,
}

/// Which subsystem produced the recommendations in an `AnalysisResult`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Mode {
    Ai,
    RuleBased,
    /// Reserved per spec §9's Open Questions: declared, never emitted by
    /// the pipeline in its current form.
    Hybrid,
}

/// Per-file verdict.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Recommendation {
    pub path: String,
    pub category: String,
    pub action: Action,
    pub confidence: f64,
    pub rationale: String,
    pub risk: RiskLevel,
}

/// Whole-batch summary statistics.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Summary {
    pub total_files: usize,
    pub delete_count: usize,
    pub keep_count: usize,
    pub review_count: usize,
    pub average_confidence: f64,
    pub risk_counts: HashMap<String, usize>,
    pub category_counts: HashMap<String, usize>,
    pub batch_size_used: usize,
}

impl Summary {
    pub fn compute(recommendations: &[Recommendation], batch_size_used: usize) -> Self {
        let total_files = recommendations.len();
        let mut delete_count = 0;
        let mut keep_count = 0;
        let mut review_count = 0;
        let mut confidence_sum = 0.0;
        let mut risk_counts = HashMap::new();
        let mut category_counts = HashMap::new();

        for rec in recommendations {
            match rec.action {
                Action::Delete => delete_count += 1,
                Action::Keep => keep_count += 1,
                Action::Review => review_count += 1,
            }
            confidence_sum += rec.confidence;
            *risk_counts.entry(format!("{:?}", rec.risk).to_lowercase()).or_insert(0) += 1;
            *category_counts.entry(rec.category.clone()).or_insert(0) += 1;
        }

        let average_confidence = if total_files > 0 {
            confidence_sum / total_files as f64
        } else {
            0.0
        };

        Self {
            total_files,
            delete_count,
            keep_count,
            review_count,
            average_confidence,
            risk_counts,
            category_counts,
            batch_size_used,
        }
    }
}

/// Whole-batch output of `Orchestrator::analyze()`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnalysisResult {
    pub recommendations: Vec<Recommendation>,
    pub summary: Summary,
    pub mode: Mode,
    pub error_kind: Option<crate::core::errors::ErrorKind>,
    pub processing_ms: u64,
    pub file_count: usize,
}

impl AnalysisResult {
    pub fn empty() -> Self {
        Self {
            recommendations: Vec::new(),
            summary: Summary::compute(&[], 0),
            mode: Mode::RuleBased,
            error_kind: None,
            processing_ms: 0,
            file_count: 0,
        }
    }
}
