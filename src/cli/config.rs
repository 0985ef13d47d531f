//! `tokengate config init`

use crate::cli::ConfigInitArgs;
use crate::config::{ConfigError, StoreBackend, TokengateConfig};
use std::fs;

const EXAMPLE_CONFIG: &str = include_str!("../../tokengate.example.toml");

/// Sections a generated file must carry for `serve` to enforce anything
const REQUIRED_SECTIONS: [&str; 2] = ["store", "enforcement"];

/// Parse the bundled template and confirm it names a store and an
/// enforcement policy.
fn checked_template() -> Result<TokengateConfig, ConfigError> {
    let table: toml::Table =
        toml::from_str(EXAMPLE_CONFIG).map_err(|e| ConfigError::Parse(e.to_string()))?;
    for section in REQUIRED_SECTIONS {
        if !table.get(section).is_some_and(toml::Value::is_table) {
            return Err(ConfigError::Validation {
                field: section.to_string(),
                message: "missing from the configuration template".to_string(),
            });
        }
    }
    let config: TokengateConfig =
        toml::from_str(EXAMPLE_CONFIG).map_err(|e| ConfigError::Parse(e.to_string()))?;
    config.validate()?;
    Ok(config)
}

/// Write the example configuration to `args.output`.
pub fn handle_config_init(args: &ConfigInitArgs) -> Result<(), Box<dyn std::error::Error>> {
    if args.output.exists() && !args.force {
        return Err(format!(
            "File already exists: {}. Use --force to overwrite.",
            args.output.display()
        )
        .into());
    }

    let template = checked_template()?;
    fs::write(&args.output, EXAMPLE_CONFIG)?;

    println!("✓ Configuration file created: {}", args.output.display());
    if template.store.backend == StoreBackend::Redis {
        println!("  Counters are shared through Redis at {}", template.store.url);
    }
    match &template.enforcement.policy_path {
        Some(path) => println!(
            "  Budget policy: {} (check it with `tokengate policy check`)",
            path.display()
        ),
        None => println!("  Set [enforcement].policy_path before serving in production."),
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{EnforcementMode, Environment};

    #[test]
    fn test_template_is_valid_production_config() {
        let config = checked_template().unwrap();
        assert_eq!(config.enforcement.environment, Environment::Production);
        assert_eq!(config.enforcement.effective_mode(), EnforcementMode::Strict);
        assert!(config.enforcement.policy_path.is_some());
        assert_eq!(config.store.reservation_ttl_hours, 48);
    }

    #[test]
    fn test_config_init_writes_template() {
        let temp_dir = tempfile::tempdir().unwrap();
        let output_path = temp_dir.path().join("tokengate.toml");

        let args = ConfigInitArgs {
            output: output_path.clone(),
            force: false,
        };
        handle_config_init(&args).unwrap();

        let written = TokengateConfig::load(Some(&output_path)).unwrap();
        assert_eq!(written.store.backend, StoreBackend::Redis);
        assert_eq!(written.store.key_prefix, "tokengate:");
    }

    #[test]
    fn test_config_init_keeps_existing_file() {
        let temp_dir = tempfile::tempdir().unwrap();
        let output_path = temp_dir.path().join("tokengate.toml");
        std::fs::write(&output_path, "[store]\nbackend = \"memory\"\n").unwrap();

        let mut args = ConfigInitArgs {
            output: output_path.clone(),
            force: false,
        };
        assert!(handle_config_init(&args).is_err());
        let kept = TokengateConfig::load(Some(&output_path)).unwrap();
        assert_eq!(kept.store.backend, StoreBackend::Memory);

        args.force = true;
        handle_config_init(&args).unwrap();
        let replaced = TokengateConfig::load(Some(&output_path)).unwrap();
        assert_eq!(replaced.store.backend, StoreBackend::Redis);
    }
}
