use anyhow::{ensure, Context, Result};
use serde::Deserialize;
use std::fs;
use std::path::Path;
use std::time::Duration;
use url::Url;

/// BLM National PLSS CadNSDI map service
pub const BLM_MAPSERVER_URL: &str =
    "https://gis.blm.gov/arcgis/rest/services/Cadastral/BLM_Natl_PLSS_CadNSDI/MapServer";

#[derive(Debug, Deserialize, Clone, Default)]
#[serde(default)]
pub struct Config {
    pub cadastral: CadastralConfig,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct CadastralConfig {
    pub base_url: String,
    /// Layer holding township polygons and their grid ids
    pub township_layer: u32,
    /// Layer holding first divisions (sections)
    pub section_layer: u32,
    pub timeout_secs: u64,
    pub max_attempts: u32,
    /// Delay before the first retry; doubles on each further attempt
    pub backoff_ms: u64,
    pub user_agent: String,
    /// Most responses kept in memory; 0 disables caching
    pub cache_capacity: usize,
}

impl Default for CadastralConfig {
    fn default() -> Self {
        Self {
            base_url: BLM_MAPSERVER_URL.to_string(),
            township_layer: 1,
            section_layer: 2,
            timeout_secs: 60,
            max_attempts: 8,
            backoff_ms: 1000,
            user_agent: "Meridian/0.1 (PLSS locality resolver)".to_string(),
            cache_capacity: 1024,
        }
    }
}

impl CadastralConfig {
    /// Query endpoint for a layer, e.g. `<base>/2/query`
    pub fn layer_url(&self, layer: u32) -> Result<Url, url::ParseError> {
        let mut base = self.base_url.clone();
        if !base.ends_with('/') {
            base.push('/');
        }
        Url::parse(&base)?.join(&format!("{}/query", layer))
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    /// Delay to wait after the given failed attempt (1-based)
    pub fn backoff(&self, attempt: u32) -> Duration {
        let factor = 1u64 << attempt.saturating_sub(1).min(16);
        Duration::from_millis(self.backoff_ms.saturating_mul(factor))
    }
}

impl Config {
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = fs::read_to_string(path).context("Failed to read config file")?;
        let config: Config = toml::from_str(&content).context("Failed to parse config file")?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        let cadastral = &self.cadastral;
        let url = cadastral
            .layer_url(cadastral.township_layer)
            .context("Invalid cadastral base_url")?;
        ensure!(
            matches!(url.scheme(), "http" | "https"),
            "cadastral base_url must be http(s), got {}",
            url.scheme()
        );
        ensure!(
            cadastral.max_attempts >= 1,
            "cadastral max_attempts must be at least 1"
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn write_config(content: &str) -> tempfile::NamedTempFile {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(content.as_bytes()).unwrap();
        file
    }

    #[test]
    fn test_defaults() {
        let config = Config::default();
        assert_eq!(config.cadastral.base_url, BLM_MAPSERVER_URL);
        assert_eq!(
            config.cadastral.layer_url(2).unwrap().as_str(),
            format!("{}/2/query", BLM_MAPSERVER_URL)
        );
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_partial_file_keeps_defaults() {
        let file = write_config(
            r#"
            [cadastral]
            max_attempts = 3
            backoff_ms = 250
            "#,
        );
        let config = Config::load_from_file(file.path()).unwrap();
        assert_eq!(config.cadastral.max_attempts, 3);
        assert_eq!(config.cadastral.township_layer, 1);
        assert_eq!(config.cadastral.cache_capacity, 1024);
        assert_eq!(config.cadastral.backoff(1), Duration::from_millis(250));
        assert_eq!(config.cadastral.backoff(3), Duration::from_millis(1000));
    }

    #[test]
    fn test_empty_file() {
        let file = write_config("");
        let config = Config::load_from_file(file.path()).unwrap();
        assert_eq!(config.cadastral.section_layer, 2);
    }

    #[test]
    fn test_rejects_bad_values() {
        let file = write_config("[cadastral]\nbase_url = \"not a url\"\n");
        assert!(Config::load_from_file(file.path()).is_err());

        let file = write_config("[cadastral]\nbase_url = \"ftp://example.com/MapServer\"\n");
        assert!(Config::load_from_file(file.path()).is_err());

        let file = write_config("[cadastral]\nmax_attempts = 0\n");
        assert!(Config::load_from_file(file.path()).is_err());
    }

    #[test]
    fn test_missing_file() {
        assert!(Config::load_from_file("/nonexistent/meridian.toml").is_err());
    }
}
