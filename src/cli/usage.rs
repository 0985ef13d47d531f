//! Usage command handler

use crate::cli::output::{format_usage_json, format_usage_table};
use crate::cli::serve::build_engine;
use crate::cli::UsageArgs;
use crate::config::TokengateConfig;
use anyhow::Context;

/// Handle `tokengate usage`: read counters straight from the store.
pub async fn handle_usage(args: &UsageArgs) -> anyhow::Result<String> {
    let config = if args.config.exists() {
        TokengateConfig::load(Some(&args.config))
            .with_context(|| format!("failed to load {}", args.config.display()))?
    } else {
        TokengateConfig::default()
    }
    .with_env_overrides();

    let engine = build_engine(&config)?;
    let scopes = engine.scopes(&args.org, &args.user, &args.provider, &args.model)?;
    let statuses = engine
        .usage(&scopes)
        .await
        .with_context(|| format!("failed to read counters from {} store", engine.store_name()))?;

    if args.json {
        Ok(format_usage_json(&statuses)?)
    } else {
        Ok(format_usage_table(&statuses))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    fn args(config: PathBuf, json: bool) -> UsageArgs {
        UsageArgs {
            org: "acme".to_string(),
            user: "alice".to_string(),
            provider: "openai".to_string(),
            model: "gpt-4o".to_string(),
            json,
            config,
        }
    }

    #[tokio::test]
    async fn test_usage_against_memory_store() {
        let dir = tempfile::tempdir().unwrap();
        let config = dir.path().join("tokengate.toml");
        std::fs::write(
            &config,
            "[store]\nbackend = \"memory\"\n[enforcement]\nenvironment = \"development\"\n",
        )
        .unwrap();

        let output = handle_usage(&args(config, true)).await.unwrap();
        let parsed: serde_json::Value = serde_json::from_str(&output).unwrap();
        let scopes = parsed["scopes"].as_array().unwrap();
        assert_eq!(scopes.len(), 5);
        assert_eq!(scopes[0]["scope"]["scope_id"], "all");
        assert_eq!(scopes[0]["used"], 0);
    }

    #[tokio::test]
    async fn test_usage_rejects_invalid_scope_id() {
        let dir = tempfile::tempdir().unwrap();
        let config = dir.path().join("tokengate.toml");
        std::fs::write(
            &config,
            "[store]\nbackend = \"memory\"\n[enforcement]\nenvironment = \"development\"\n",
        )
        .unwrap();

        let mut args = args(config, false);
        args.org = "bad org".to_string();
        assert!(handle_usage(&args).await.is_err());
    }
}
