//! Settings loading
//!
//! A YAML file (path from `ORACLE_CONFIG`, default `config/oracle.yaml`)
//! layered with `ORACLE__SECTION__KEY` environment overrides. When
//! `extra_rpcs_path` is set, the endpoints listed there are merged into the
//! configured networks before validation.

use anyhow::Context;
use config::{Config, Environment, File, FileFormat};
use std::collections::HashMap;
use std::env;
use std::path::{Path, PathBuf};
use tracing::info;

use oracle_core::{AppConfig, ExtraRpcs};

pub const CONFIG_PATH_VAR: &str = "ORACLE_CONFIG";
pub const DEFAULT_CONFIG_PATH: &str = "config/oracle.yaml";
const ENV_PREFIX: &str = "ORACLE";
const ENV_SEPARATOR: &str = "__";

pub fn config_path() -> PathBuf {
    env::var(CONFIG_PATH_VAR)
        .map(PathBuf::from)
        .unwrap_or_else(|_| PathBuf::from(DEFAULT_CONFIG_PATH))
}

/// Load and validate settings from the process environment
pub fn load() -> anyhow::Result<AppConfig> {
    load_from(&config_path(), None)
}

/// Load settings from `path`. `env_overrides` replaces the process
/// environment as the override source when given.
pub fn load_from(path: &Path, env_overrides: Option<HashMap<String, String>>) -> anyhow::Result<AppConfig> {
    let path_str = path
        .to_str()
        .with_context(|| format!("config path {} is not valid UTF-8", path.display()))?;

    let settings = Config::builder()
        .add_source(File::new(path_str, FileFormat::Yaml))
        .add_source(
            Environment::with_prefix(ENV_PREFIX)
                .prefix_separator(ENV_SEPARATOR)
                .separator(ENV_SEPARATOR)
                .try_parsing(true)
                .source(env_overrides),
        )
        .build()
        .with_context(|| format!("failed to read config from {}", path.display()))?;

    let mut config: AppConfig = settings
        .try_deserialize()
        .with_context(|| format!("invalid config in {}", path.display()))?;

    if let Some(extra_path) = config.extra_rpcs_path.clone() {
        let extra = ExtraRpcs::load(&extra_path)?;
        let added = config.merge_extra_rpcs(&extra);
        info!("Added {} candidate endpoints from {}", added, extra_path.display());
    }
    config.validate()?;

    Ok(config)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    const SAMPLE: &str = r#"
networks:
  - network_id: 42161
    name: arbitrum
    endpoints:
      - https://arb1.arbitrum.io/rpc
      - https://arbitrum.llamarpc.com
    feeds:
      - symbol: ETH/USD
        address: "0x639Fe6ab55C921f74e7fac1ee960C0B6293ba612"
pyth:
  feeds:
    - id: "ff61491a931112ddf1bd8147cd1b641375f79f5825126d665480874634fd0ace"
      symbol: ETH/USD
monitoring:
  max_retries: 2
"#;

    fn write_temp(name: &str, extension: &str, contents: &str) -> PathBuf {
        let path = env::temp_dir().join(format!("oracle-settings-{}-{}.{}", name, std::process::id(), extension));
        fs::write(&path, contents).unwrap();
        path
    }

    fn write_config(name: &str, contents: &str) -> PathBuf {
        write_temp(name, "yaml", contents)
    }

    #[test]
    fn test_load_yaml_with_defaults() {
        let path = write_config("defaults", SAMPLE);
        let config = load_from(&path, Some(HashMap::new())).unwrap();

        assert_eq!(config.networks.len(), 1);
        assert_eq!(config.networks[0].endpoints.len(), 2);
        assert_eq!(config.networks[0].feeds[0].symbol.as_deref(), Some("ETH/USD"));
        assert_eq!(config.monitoring.max_retries, 2);
        assert_eq!(config.monitoring.probe_interval_secs, 30);

        let pyth = config.pyth.unwrap();
        assert_eq!(pyth.endpoint, "https://hermes.pyth.network");
        assert_eq!(pyth.http_retries, 3);
        assert_eq!(pyth.feeds.len(), 1);

        fs::remove_file(path).ok();
    }

    #[test]
    fn test_env_overrides_file() {
        let path = write_config("env", SAMPLE);
        let mut overrides = HashMap::new();
        overrides.insert("ORACLE__CACHE__MAX_SIZE_BYTES".to_string(), "2048".to_string());
        overrides.insert("ORACLE__MONITORING__FETCH_INTERVAL_SECS".to_string(), "5".to_string());

        let config = load_from(&path, Some(overrides)).unwrap();
        assert_eq!(config.cache.max_size_bytes, 2048);
        assert_eq!(config.monitoring.fetch_interval_secs, 5);
        assert_eq!(config.monitoring.max_retries, 2);

        fs::remove_file(path).ok();
    }

    #[test]
    fn test_invalid_config_is_rejected() {
        let path = write_config(
            "invalid",
            "networks:\n  - network_id: 1\n    endpoints: []\n",
        );
        let err = load_from(&path, Some(HashMap::new())).unwrap_err();
        assert!(err.to_string().contains("no endpoints"));

        fs::remove_file(path).ok();
    }

    #[test]
    fn test_extra_rpcs_are_merged() {
        let extra = write_temp(
            "extra-rpcs",
            "json",
            r#"{"42161": {"rpcs": ["https://arb1.arbitrum.io/rpc", {"url": "https://arbitrum-one-rpc.publicnode.com"}]}}"#,
        );
        let path = write_config("with-extra", SAMPLE);
        let mut overrides = HashMap::new();
        overrides.insert("ORACLE__EXTRA_RPCS_PATH".to_string(), extra.display().to_string());

        let config = load_from(&path, Some(overrides)).unwrap();
        assert_eq!(
            config.networks[0].endpoints,
            vec![
                "https://arb1.arbitrum.io/rpc",
                "https://arbitrum.llamarpc.com",
                "https://arbitrum-one-rpc.publicnode.com",
            ]
        );

        fs::remove_file(path).ok();
        fs::remove_file(extra).ok();
    }

    #[test]
    fn test_extra_rpcs_fill_network_without_endpoints() {
        let extra = write_temp("extra-only", "json", r#"{"1": {"rpcs": ["https://eth.llamarpc.com"]}}"#);
        let contents = format!(
            "extra_rpcs_path: \"{}\"\nnetworks:\n  - network_id: 1\n",
            extra.display()
        );
        let path = write_config("extra-only-config", &contents);

        let config = load_from(&path, Some(HashMap::new())).unwrap();
        assert_eq!(config.networks[0].endpoints, vec!["https://eth.llamarpc.com"]);

        fs::remove_file(path).ok();
        fs::remove_file(extra).ok();
    }

    #[test]
    fn test_missing_extra_rpcs_file_is_an_error() {
        let path = write_config("missing-extra", SAMPLE);
        let mut overrides = HashMap::new();
        overrides.insert(
            "ORACLE__EXTRA_RPCS_PATH".to_string(),
            env::temp_dir().join("oracle-extra-rpcs-does-not-exist.json").display().to_string(),
        );

        let err = load_from(&path, Some(overrides)).unwrap_err();
        assert!(err.to_string().contains("extra RPC list"));

        fs::remove_file(path).ok();
    }

    #[test]
    fn test_missing_file() {
        let path = env::temp_dir().join("oracle-settings-does-not-exist.yaml");
        assert!(load_from(&path, Some(HashMap::new())).is_err());
    }
}
