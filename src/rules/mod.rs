//! Rule-based fallback analyzer (spec §4.5).
//!
//! Deterministic, side-effect-free, no network I/O. Grounded on
//! `RuleBasedAnalyzer._load_default_rules()` in the original Python
//! implementation: a fixed, ordered table of glob-matched categories,
//! first match wins, with an `unknown` catch-all.

use globset::{Glob, GlobMatcher};
use once_cell::sync::Lazy;

use crate::core::types::{Action, FileMeta, Recommendation, RiskLevel};

struct Rule {
    category: &'static str,
    name_globs: &'static [&'static str],
    parent_globs: &'static [&'static str],
    min_size_bytes: Option<u64>,
    action: Action,
    confidence: f64,
    risk: RiskLevel,
}

const HUNDRED_MIB: u64 = 100 * 1024 * 1024;

static RULES: Lazy<Vec<Rule>> = Lazy::new(|| {
    vec![
        Rule {
            category: "temporary",
            name_globs: &["*.tmp", "*.temp", "~*", "*.swp", ".DS_Store", "Thumbs.db"],
            parent_globs: &["*/tmp/*", "*/temp/*", "*/cache/*"],
            min_size_bytes: None,
            action: Action::Delete,
            confidence: 0.9,
            risk: RiskLevel::Low,
        },
        Rule {
            category: "backup",
            name_globs: &["*.bak", "*.backup", "*.old", "*.orig"],
            parent_globs: &[],
            min_size_bytes: None,
            action: Action::Review,
            confidence: 0.7,
            risk: RiskLevel::Medium,
        },
        Rule {
            category: "large_media",
            name_globs: &["*.mp4", "*.avi", "*.mov", "*.mkv"],
            parent_globs: &[],
            min_size_bytes: Some(HUNDRED_MIB),
            action: Action::Review,
            confidence: 0.6,
            risk: RiskLevel::Medium,
        },
        Rule {
            category: "system",
            name_globs: &["*.sys", "*.dll", "*.exe", "*.so", "*.dylib"],
            parent_globs: &["*/Windows/*", "*/System32/*", "*/System/*"],
            min_size_bytes: None,
            action: Action::Keep,
            confidence: 0.95,
            risk: RiskLevel::Low,
        },
        Rule {
            category: "development",
            name_globs: &["*.pyc", "*.pyo", "__pycache__", "*.class", "node_modules"],
            parent_globs: &[],
            min_size_bytes: None,
            action: Action::Review,
            confidence: 0.8,
            risk: RiskLevel::Medium,
        },
    ]
});

fn compile_matcher(pattern: &str) -> GlobMatcher {
    Glob::new(&pattern.to_lowercase())
        .expect("rule table glob patterns are compile-time constants")
        .compile_matcher()
}

fn matches_any(value: &str, patterns: &[&str]) -> bool {
    let lower = value.to_lowercase();
    patterns.iter().any(|p| compile_matcher(p).is_match(&lower))
}

/// Deterministic, network-free fallback recommendation engine.
#[derive(Debug, Default, Clone, Copy)]
pub struct RuleEngine;

impl RuleEngine {
    pub fn new() -> Self {
        Self
    }

    /// Evaluate a single file against the fixed rule table, first match
    /// wins, falling back to the `unknown` default.
    pub fn evaluate(&self, file: &FileMeta) -> Recommendation {
        for rule in RULES.iter() {
            let name_match = matches_any(&file.basename, rule.name_globs);
            let parent_match =
                !rule.parent_globs.is_empty() && matches_any(&file.parent_dir, rule.parent_globs);
            let size_ok = rule
                .min_size_bytes
                .map(|min| file.size_bytes > min)
                .unwrap_or(true);

            let structural_match = name_match || parent_match;
            if structural_match && size_ok {
                return Recommendation {
                    path: file.path.clone(),
                    category: rule.category.to_string(),
                    action: rule.action,
                    confidence: rule.confidence,
                    rationale: format!("matched rule '{}'", rule.category),
                    risk: rule.risk,
                };
            }
        }

        Recommendation {
            path: file.path.clone(),
            category: "unknown".to_string(),
            action: Action::Keep,
            confidence: 0.5,
            rationale: "no rule matched; defaulting to keep".to_string(),
            risk: RiskLevel::Medium,
        }
    }

    /// Evaluate a whole batch, preserving input order.
    pub fn evaluate_batch(&self, files: &[FileMeta]) -> Vec<Recommendation> {
        files.iter().map(|f| self.evaluate(f)).collect()
    }
}
