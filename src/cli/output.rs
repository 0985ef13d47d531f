//! Output formatting helpers for CLI commands

use crate::engine::ScopeStatus;
use crate::policy::PolicyRow;
use colored::Colorize;
use comfy_table::{presets::UTF8_FULL, Cell, ContentArrangement, Table};
use serde_json::json;

/// Used fraction at which a scope is shown as nearly exhausted
const WARN_RATIO: f64 = 0.8;

/// Format policy rows as a table
pub fn format_policy_table(rows: &[PolicyRow]) -> String {
    let mut table = Table::new();
    table.load_preset(UTF8_FULL);
    table.set_content_arrangement(ContentArrangement::Dynamic);
    table.set_header(vec!["Scope", "Entity", "Window", "Limit"]);

    for row in rows {
        let scope = row
            .scope_type
            .map(|t| t.to_string())
            .unwrap_or_else(|| "default".to_string());
        let entity = row.entity.clone().unwrap_or_else(|| "*".to_string());
        table.add_row(vec![
            Cell::new(scope),
            Cell::new(entity),
            Cell::new(row.window.policy_name()),
            Cell::new(row.limit),
        ]);
    }

    table.to_string()
}

/// Format policy rows as JSON
pub fn format_policy_json(rows: &[PolicyRow]) -> Result<String, serde_json::Error> {
    serde_json::to_string_pretty(&json!({ "limits": rows }))
}

fn usage_state(status: &ScopeStatus) -> String {
    let Some(limit) = status.limit else {
        return "Uncapped".cyan().to_string();
    };
    let committed = status.used.saturating_add(status.reserved);
    if committed >= limit {
        "Exhausted".red().to_string()
    } else if limit > 0 && committed as f64 / limit as f64 >= WARN_RATIO {
        "Near limit".yellow().to_string()
    } else {
        "OK".green().to_string()
    }
}

/// Format scope usage as a table
pub fn format_usage_table(scopes: &[ScopeStatus]) -> String {
    let mut table = Table::new();
    table.load_preset(UTF8_FULL);
    table.set_content_arrangement(ContentArrangement::Dynamic);
    table.set_header(vec![
        "Scope", "Used", "Reserved", "Limit", "Remaining", "Resets", "State",
    ]);

    for status in scopes {
        let dash = || "-".to_string();
        table.add_row(vec![
            Cell::new(status.scope.to_string()),
            Cell::new(status.used),
            Cell::new(status.reserved),
            Cell::new(status.limit.map(|l| l.to_string()).unwrap_or_else(dash)),
            Cell::new(status.remaining.map(|r| r.to_string()).unwrap_or_else(dash)),
            Cell::new(
                status
                    .resets_at
                    .map(|t| t.format("%Y-%m-%d %H:%M UTC").to_string())
                    .unwrap_or_else(dash),
            ),
            Cell::new(usage_state(status)),
        ]);
    }

    table.to_string()
}

/// Format scope usage as JSON
pub fn format_usage_json(scopes: &[ScopeStatus]) -> Result<String, serde_json::Error> {
    serde_json::to_string_pretty(&json!({ "scopes": scopes }))
}
