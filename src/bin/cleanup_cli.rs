//! Thin demonstration binary: load a config, wire up a vault and the
//! rule-based fallback (no LLM transport unless a provider key is
//! already present), and run one `analyze()` call over a JSON file of
//! `FileMeta` records. CLI parsing itself is out of scope for the
//! library; this binary only exists to exercise it end to end.

use std::path::PathBuf;
use std::sync::Arc;

use clap::Parser;
use cleanup_core::{CleanupConfig, CredentialVault, FileMeta, OpenAiTransport, Orchestrator, PermissiveSafetyLayer};
use tracing_subscriber::EnvFilter;

#[derive(Debug, Parser)]
#[command(name = "cleanup-cli", about = "Run one AI-assisted disk cleanup analysis pass")]
struct Cli {
    /// Path to a JSON array of FileMeta records to analyze.
    #[arg(long)]
    input: PathBuf,

    /// Path to a JSON/YAML CleanupConfig file; defaults are used if omitted.
    #[arg(long)]
    config: Option<PathBuf>,

    /// Directory used for the on-disk result cache.
    #[arg(long, default_value = "ai-disk-cleanup-cache")]
    cache_dir: PathBuf,

    /// Directory used for the credential vault's file fallback.
    #[arg(long, default_value = ".")]
    vault_dir: PathBuf,

    /// Force the rule-based fallback even if an LLM is usable.
    #[arg(long)]
    force_rule_based: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let cli = Cli::parse();

    let config = match &cli.config {
        Some(path) => CleanupConfig::from_file(path)?,
        None => CleanupConfig::default(),
    };

    let files: Vec<FileMeta> = {
        let content = std::fs::read_to_string(&cli.input)?;
        serde_json::from_str(&content)?
    };

    let vault = Arc::new(CredentialVault::new(cli.vault_dir));
    let transport = vault
        .get(&config.llm.provider)?
        .map(|_| Arc::new(OpenAiTransport::new(
            config.llm.endpoint.clone(),
            config.llm.provider.clone(),
            Arc::clone(&vault),
        )) as Arc<dyn cleanup_core::LlmTransport>);

    let orchestrator = Orchestrator::new(
        config,
        cli.cache_dir,
        vault,
        transport,
        Arc::new(PermissiveSafetyLayer),
    )?;

    let result = orchestrator.analyze(&files, cli.force_rule_based).await;
    println!("{}", serde_json::to_string_pretty(&result)?);

    Ok(())
}
