use serde::Deserialize;

use crate::services::OverlapPolicy;

/// Application configuration loaded from environment variables
#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    /// Server host address
    #[serde(default = "default_host")]
    pub host: String,

    /// Server port
    #[serde(default = "default_port")]
    pub port: u16,

    /// Menu catalog JSON file
    #[serde(default = "default_catalog_path")]
    pub catalog_path: String,

    /// Optional prompt template file; built-in templates are used when unset
    #[serde(default)]
    pub templates_path: Option<String>,

    /// Comma-separated columns to min-max scale; inferred from the data when unset
    #[serde(default)]
    pub continuous_columns: Option<Vec<String>>,

    /// OpenAI-compatible API base URL
    #[serde(default = "default_llm_api_url")]
    pub llm_api_url: String,

    pub llm_api_key: String,

    #[serde(default = "default_llm_model")]
    pub llm_model: String,

    #[serde(default = "default_llm_timeout_secs")]
    pub llm_timeout_secs: u64,

    #[serde(default = "default_top_k")]
    pub default_top_k: usize,

    #[serde(default = "default_max_top_k")]
    pub max_top_k: usize,

    /// How a feature carrying both a hard and a soft preference is treated
    #[serde(default)]
    pub overlap_policy: OverlapPolicy,

    /// Past messages included in prompts
    #[serde(default = "default_history_window")]
    pub history_window: usize,

    /// Sessions idle for longer than this are evicted
    #[serde(default = "default_session_ttl_secs")]
    pub session_ttl_secs: u64,

    #[serde(default = "default_session_sweep_secs")]
    pub session_sweep_secs: u64,
}

fn default_host() -> String {
    "127.0.0.1".to_string()
}

fn default_port() -> u16 {
    3000
}

fn default_catalog_path() -> String {
    "data/catalog.json".to_string()
}

fn default_llm_api_url() -> String {
    "https://api.openai.com/v1".to_string()
}

fn default_llm_model() -> String {
    "gpt-4o-mini".to_string()
}

fn default_llm_timeout_secs() -> u64 {
    60
}

fn default_top_k() -> usize {
    3
}

fn default_max_top_k() -> usize {
    20
}

fn default_history_window() -> usize {
    10
}

fn default_session_ttl_secs() -> u64 {
    3600
}

fn default_session_sweep_secs() -> u64 {
    60
}

impl Config {
    /// Load configuration from environment variables
    pub fn from_env() -> anyhow::Result<Self> {
        dotenvy::dotenv().ok();
        let config = envy::from_env::<Config>().map_err(|e| anyhow::anyhow!("Failed to load config: {}", e))?;
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> anyhow::Result<()> {
        if self.max_top_k == 0 {
            anyhow::bail!("MAX_TOP_K must be at least 1");
        }
        if self.session_sweep_secs == 0 {
            anyhow::bail!("SESSION_SWEEP_SECS must be at least 1");
        }
        if self.default_top_k == 0 || self.default_top_k > self.max_top_k {
            anyhow::bail!(
                "DEFAULT_TOP_K must be between 1 and MAX_TOP_K ({}), got {}",
                self.max_top_k,
                self.default_top_k
            );
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn from_pairs(pairs: &[(&str, &str)]) -> Config {
        envy::from_iter(
            pairs
                .iter()
                .map(|(k, v)| (k.to_string(), v.to_string())),
        )
        .unwrap()
    }

    #[test]
    fn test_defaults() {
        let config = from_pairs(&[("LLM_API_KEY", "test_key")]);
        assert_eq!(config.port, 3000);
        assert_eq!(config.catalog_path, "data/catalog.json");
        assert_eq!(config.templates_path, None);
        assert_eq!(config.continuous_columns, None);
        assert_eq!(config.overlap_policy, OverlapPolicy::Stack);
        assert_eq!(config.default_top_k, 3);
        assert_eq!(config.session_ttl_secs, 3600);
        assert_eq!(config.session_sweep_secs, 60);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_overrides() {
        let config = from_pairs(&[
            ("LLM_API_KEY", "test_key"),
            ("CONTINUOUS_COLUMNS", "calories,price"),
            ("OVERLAP_POLICY", "hard_wins"),
            ("MAX_TOP_K", "5"),
        ]);
        assert_eq!(
            config.continuous_columns,
            Some(vec!["calories".to_string(), "price".to_string()])
        );
        assert_eq!(config.overlap_policy, OverlapPolicy::HardWins);
        assert_eq!(config.max_top_k, 5);
    }

    #[test]
    fn test_default_top_k_must_fit_max() {
        let config = from_pairs(&[
            ("LLM_API_KEY", "test_key"),
            ("DEFAULT_TOP_K", "8"),
            ("MAX_TOP_K", "5"),
        ]);
        assert!(config.validate().is_err());
    }
}
