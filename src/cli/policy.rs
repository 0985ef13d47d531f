//! Policy command handlers

use crate::cli::output::{format_policy_json, format_policy_table};
use crate::cli::PolicyCheckArgs;
use crate::config::Environment;
use crate::policy::{BudgetPolicy, PolicyStrictness};
use anyhow::Context;

/// Handle `tokengate policy check`
pub fn handle_policy_check(args: &PolicyCheckArgs) -> anyhow::Result<String> {
    let strictness = match args.env {
        Environment::Production => PolicyStrictness::Strict,
        Environment::Development => PolicyStrictness::Permissive,
    };

    let policy = BudgetPolicy::load(&args.file, strictness)
        .with_context(|| format!("invalid policy {}", args.file.display()))?;

    let rows = policy.rows();
    if args.json {
        return Ok(format_policy_json(&rows)?);
    }

    let windows: Vec<&str> = policy.windows().iter().map(|w| w.policy_name()).collect();
    Ok(format!(
        "{}\n✓ Policy valid ({} limits, windows: {})",
        format_policy_table(&rows),
        rows.len(),
        windows.join(", ")
    ))
}
