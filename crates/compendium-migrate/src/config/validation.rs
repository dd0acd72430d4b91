//! Configuration validation.

use super::Config;
use crate::error::{MigrateError, Result};

/// Validate the configuration.
pub fn validate(config: &Config) -> Result<()> {
    if config.database.url.trim().is_empty() {
        return Err(MigrateError::Config("database.url is required".into()));
    }
    if !config.database.url.starts_with("sqlite:") {
        return Err(MigrateError::Config(format!(
            "database.url must be a sqlite URL, got '{}'",
            config.database.url
        )));
    }

    if config
        .resolver
        .noise_tokens
        .iter()
        .any(|t| t.trim().is_empty())
    {
        return Err(MigrateError::Config(
            "resolver.noise_tokens must not contain blank entries".into(),
        ));
    }

    let registry = config.registry();
    registry.validate()?;

    for name in &config.migration.categories {
        if registry.category(name).is_err() {
            return Err(MigrateError::Config(format!(
                "migration.categories: unknown category '{}'",
                name
            )));
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn valid_config() -> Config {
        Config::for_database("sqlite://dnd-nexus.db")
    }

    #[test]
    fn test_valid_config() {
        assert!(validate(&valid_config()).is_ok());
    }

    #[test]
    fn test_missing_url() {
        let mut config = valid_config();
        config.database.url = "  ".to_string();
        assert!(validate(&config).is_err());
    }

    #[test]
    fn test_non_sqlite_url() {
        let mut config = valid_config();
        config.database.url = "postgres://localhost/compendium".to_string();
        let err = validate(&config).unwrap_err();
        assert!(err.to_string().contains("sqlite"));
    }

    #[test]
    fn test_blank_noise_token() {
        let mut config = valid_config();
        config.resolver.noise_tokens.push(" ".to_string());
        assert!(validate(&config).is_err());
    }

    #[test]
    fn test_known_categories_accepted() {
        let mut config = valid_config();
        config.migration.categories = vec!["equipment".into(), "magic_items".into()];
        assert!(validate(&config).is_ok());
    }

    #[test]
    fn test_unknown_category_rejected() {
        let mut config = valid_config();
        config.migration.categories = vec!["vehicles".into()];
        assert!(validate(&config).is_err());
    }
}
