//! Safety layer contract (spec §4.6): an external collaborator the
//! orchestrator queries during fusion, behind a narrow capability trait
//! so tests can substitute fakes without touching the orchestrator
//! (spec §9's "mock-friendly seams" design note).

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

/// How strongly the safety policy protects a given path from deletion.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProtectionLevel {
    None,
    Low,
    Medium,
    High,
    Critical,
    RequiresReview,
}

/// Result of a safety-policy lookup for a single path.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SafetyScore {
    pub protection_level: ProtectionLevel,
    pub confidence: f64,
}

impl SafetyScore {
    pub fn none() -> Self {
        Self {
            protection_level: ProtectionLevel::None,
            confidence: 0.0,
        }
    }
}

/// Capability trait for the safety policy collaborator. The core does
/// not define the policy; the implementer does. Any error from a real
/// implementation should be caught and translated into `SafetyScore::none()`
/// by the caller, per spec §4.6.
#[async_trait]
pub trait SafetyLayer: Send + Sync {
    async fn score(&self, path: &str) -> SafetyScore;
}

/// A deliberately inert default: never overrides, never protects.
/// Host applications are expected to supply their own policy;
/// this exists so the orchestrator is usable standalone and so tests
/// have a trivial known-quantity baseline.
#[derive(Debug, Default, Clone, Copy)]
pub struct PermissiveSafetyLayer;

#[async_trait]
impl SafetyLayer for PermissiveSafetyLayer {
    async fn score(&self, _path: &str) -> SafetyScore {
        SafetyScore::none()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn permissive_layer_always_returns_none() {
        let layer = PermissiveSafetyLayer;
        let score = layer.score("/etc/passwd").await;
        assert_eq!(score.protection_level, ProtectionLevel::None);
        assert_eq!(score.confidence, 0.0);
    }
}
