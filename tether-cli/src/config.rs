use std::path::Path;

use anyhow::{Context, Result};
use tether_engine::EngineConfig;
use tracing::debug;

/// Load the engine configuration, falling back to defaults without a file.
pub fn load(path: Option<&Path>) -> Result<EngineConfig> {
    let config = match path {
        Some(path) => {
            let content = std::fs::read_to_string(path)
                .with_context(|| format!("failed to read config file {}", path.display()))?;
            let config: EngineConfig = toml::from_str(&content)
                .with_context(|| format!("failed to parse config file {}", path.display()))?;
            debug!(path = %path.display(), "Loaded configuration");
            config
        }
        None => EngineConfig::default(),
    };

    config.validate()?;
    Ok(config)
}

pub fn show(config: &EngineConfig) -> Result<String> {
    toml::to_string_pretty(config).context("failed to serialize configuration")
}

#[cfg(test)]
mod tests {
    use std::io::Write;

    use tether_engine::BufferLevel;

    use super::*;

    #[test]
    fn defaults_without_file() {
        assert_eq!(load(None).unwrap(), EngineConfig::default());
    }

    #[test]
    fn partial_file_overrides_defaults() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(
            file,
            "[retry]\nmax_attempts_per_url = 5\n\n[buffer]\nlive_default_level = \"normal\""
        )
        .unwrap();

        let config = load(Some(file.path())).unwrap();
        assert_eq!(config.retry.max_attempts_per_url, 5);
        assert_eq!(config.retry.initial_delay_ms, 1000);
        assert_eq!(config.buffer.live_default_level, BufferLevel::Normal);
    }

    #[test]
    fn invalid_values_are_rejected() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "[watchdog]\ntick_interval_ms = 0").unwrap();
        assert!(load(Some(file.path())).is_err());
    }

    #[test]
    fn shown_config_parses_back() {
        let shown = show(&EngineConfig::default()).unwrap();
        let parsed: EngineConfig = toml::from_str(&shown).unwrap();
        assert_eq!(parsed, EngineConfig::default());
    }
}
