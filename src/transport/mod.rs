//! LLM Transport (spec §4.3's "LLM Transport contract" and §6's wire
//! format). Grounded on the reqwest-based request/response pattern of
//! the teacher's Gemini oracle client, reworked for the OpenAI-style
//! `/chat/completions` tool-calling contract this spec names, and
//! behind a narrow capability trait per spec §9's mock-friendly seams.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, instrument};

use crate::core::errors::{CleanupError, Result};
use crate::core::types::{Action, FileMeta, Recommendation, RiskLevel};
use crate::vault::CredentialVault;

const MAX_PATH_BYTES: usize = 1024;

/// Parameters the transport needs beyond the file batch itself.
#[derive(Debug, Clone)]
pub struct TransportParams {
    pub model: String,
    pub temperature: f64,
    pub max_tokens: u32,
    pub timeout: Duration,
}

/// Capability trait the orchestrator dispatches sub-batches through.
/// A narrow seam so tests substitute a fake without touching the
/// orchestrator (spec §9).
#[async_trait]
pub trait LlmTransport: Send + Sync {
    async fn analyze_batch(
        &self,
        files: &[FileMeta],
        params: &TransportParams,
    ) -> Result<Vec<Recommendation>>;
}

/// Enforce the privacy invariant of spec §4.3: reject any `FileMeta`
/// whose path/parent exceeds 1 KiB. The type system already closes off
/// "fields outside the documented set" since `FileMeta` is a fixed
/// record (spec §9's "replace dynamic attribute inspection with a
/// closed schema" design note) — there is no dynamic field list to
/// validate against at runtime.
pub fn enforce_privacy_invariant(files: &[FileMeta]) -> Result<()> {
    for file in files {
        if file.path.len() > MAX_PATH_BYTES || file.parent_dir.len() > MAX_PATH_BYTES {
            return Err(CleanupError::validation_field(
                "file path exceeds the 1 KiB privacy budget",
                "path",
            ));
        }
    }
    Ok(())
}

#[derive(Debug, Serialize)]
struct ChatMessage {
    role: &'static str,
    content: String,
}

#[derive(Debug, Serialize)]
struct ToolFunction {
    name: &'static str,
    description: &'static str,
    parameters: Value,
}

#[derive(Debug, Serialize)]
struct Tool {
    #[serde(rename = "type")]
    kind: &'static str,
    function: ToolFunction,
}

#[derive(Debug, Serialize)]
struct ToolChoiceFunction {
    name: &'static str,
}

#[derive(Debug, Serialize)]
struct ToolChoice {
    #[serde(rename = "type")]
    kind: &'static str,
    function: ToolChoiceFunction,
}

#[derive(Debug, Serialize)]
struct ChatCompletionRequest {
    model: String,
    messages: Vec<ChatMessage>,
    tools: Vec<Tool>,
    tool_choice: ToolChoice,
    temperature: f64,
    max_tokens: u32,
}

#[derive(Debug, Deserialize)]
struct ChatCompletionResponse {
    choices: Vec<Choice>,
}

#[derive(Debug, Deserialize)]
struct Choice {
    message: ResponseMessage,
}

#[derive(Debug, Deserialize)]
struct ResponseMessage {
    #[serde(default)]
    tool_calls: Vec<ToolCall>,
}

#[derive(Debug, Deserialize)]
struct ToolCall {
    function: ToolCallFunction,
}

#[derive(Debug, Deserialize)]
struct ToolCallFunction {
    arguments: String,
}

#[derive(Debug, Deserialize)]
struct FileAnalyses {
    file_analyses: Vec<FileAnalysis>,
}

#[derive(Debug, Deserialize)]
struct FileAnalysis {
    path: String,
    action: Action,
    confidence: f64,
    reason: String,
    category: String,
    risk: RiskLevel,
}

fn analyze_files_tool() -> Tool {
    Tool {
        kind: "function",
        function: ToolFunction {
            name: "analyze_files_for_cleanup",
            description: "Recommend a cleanup action for each file in the batch.",
            parameters: serde_json::json!({
                "type": "object",
                "properties": {
                    "file_analyses": {
                        "type": "array",
                        "items": {
                            "type": "object",
                            "properties": {
                                "path": {"type": "string"},
                                "action": {"type": "string", "enum": ["delete", "keep", "review"]},
                                "confidence": {"type": "number"},
                                "reason": {"type": "string"},
                                "category": {"type": "string"},
                                "risk": {"type": "string", "enum": ["low", "medium", "high", "critical"]}
                            },
                            "required": ["path", "action", "confidence", "reason", "category", "risk"]
                        }
                    }
                },
                "required": ["file_analyses"]
            }),
        },
    }
}

fn render_prompt(files: &[FileMeta]) -> String {
    let mut prompt = String::from(
        "Review the following file metadata and recommend a cleanup action \
         for each. Never ask for or assume file contents; judge only from \
         the metadata provided.\n\n",
    );
    for file in files {
        prompt.push_str(&format!(
            "- path={} size_bytes={} extension={} modified={} hidden={}\n",
            file.path, file.size_bytes, file.extension, file.modified.to_rfc3339(), file.hidden
        ));
    }
    prompt
}

/// Production LLM transport over an OpenAI-compatible `/chat/completions`
/// endpoint, bearer-authenticated via the credential vault.
pub struct OpenAiTransport {
    client: reqwest::Client,
    endpoint: String,
    provider: String,
    vault: Arc<CredentialVault>,
}

impl OpenAiTransport {
    pub fn new(endpoint: impl Into<String>, provider: impl Into<String>, vault: Arc<CredentialVault>) -> Self {
        Self {
            client: reqwest::Client::new(),
            endpoint: endpoint.into(),
            provider: provider.into(),
            vault,
        }
    }
}

#[async_trait]
impl LlmTransport for OpenAiTransport {
    #[instrument(skip(self, files, params), fields(provider = %self.provider, file_count = files.len()))]
    async fn analyze_batch(
        &self,
        files: &[FileMeta],
        params: &TransportParams,
    ) -> Result<Vec<Recommendation>> {
        enforce_privacy_invariant(files)?;

        let api_key = self
            .vault
            .get(&self.provider)?
            .ok_or_else(|| CleanupError::transport("no credential available for provider"))?;

        let request = ChatCompletionRequest {
            model: params.model.clone(),
            messages: vec![ChatMessage {
                role: "user",
                content: render_prompt(files),
            }],
            tools: vec![analyze_files_tool()],
            tool_choice: ToolChoice {
                kind: "function",
                function: ToolChoiceFunction {
                    name: "analyze_files_for_cleanup",
                },
            },
            temperature: params.temperature,
            max_tokens: params.max_tokens,
        };

        let response = self
            .client
            .post(&self.endpoint)
            .bearer_auth(api_key.expose())
            .timeout(params.timeout)
            .json(&request)
            .send()
            .await
            .map_err(|e| CleanupError::transport(format!("request failed: {e}")))?;

        if !response.status().is_success() {
            return Err(CleanupError::transport(format!(
                "LLM provider returned HTTP {}",
                response.status()
            )));
        }

        let body: ChatCompletionResponse = response
            .json()
            .await
            .map_err(|e| CleanupError::transport(format!("invalid response body: {e}")))?;

        let tool_call = body
            .choices
            .first()
            .and_then(|c| c.message.tool_calls.first())
            .ok_or_else(|| CleanupError::transport("response contained no tool call"))?;

        let parsed: FileAnalyses = serde_json::from_str(&tool_call.function.arguments)
            .map_err(|e| CleanupError::transport(format!("malformed tool call arguments: {e}")))?;

        reorder_and_validate(files, parsed.file_analyses)
    }
}

/// The transport MUST assert `len(output) == len(input)` and reorder
/// output to match input paths; extras or missing entries fail the
/// sub-batch (spec §4.3).
fn reorder_and_validate(
    files: &[FileMeta],
    analyses: Vec<FileAnalysis>,
) -> Result<Vec<Recommendation>> {
    if analyses.len() != files.len() {
        return Err(CleanupError::transport(format!(
            "expected {} analyses, got {}",
            files.len(),
            analyses.len()
        )));
    }

    let mut by_path: std::collections::HashMap<String, FileAnalysis> =
        analyses.into_iter().map(|a| (a.path.clone(), a)).collect();

    let mut ordered = Vec::with_capacity(files.len());
    for file in files {
        let analysis = by_path.remove(&file.path).ok_or_else(|| {
            CleanupError::transport(format!("no analysis returned for path {}", file.path))
        })?;
        ordered.push(Recommendation {
            path: analysis.path,
            category: analysis.category,
            action: analysis.action,
            confidence: analysis.confidence.clamp(0.0, 1.0),
            rationale: analysis.reason,
            risk: analysis.risk,
        });
    }
    debug!(count = ordered.len(), "transport produced recommendations");
    Ok(ordered)
}
