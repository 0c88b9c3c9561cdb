use anyhow::{Context, Result, anyhow};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;
use tracing::warn;

use leadflow_core::config::{HeatScorerConfig, MAX_HISTORY_TURNS, RoutingDefaults};
use leadflow_core::providers::{
    AnthropicProvider, Endpoint, LlmProvider, ModelRouter, OpenAiProvider,
};
use leadflow_core::types::Strategy;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct LeadflowConfig {
    #[serde(default)]
    pub database: DatabaseConfig,
    #[serde(default)]
    pub routing: RoutingConfig,
    #[serde(default)]
    pub heat: HeatConfig,
    #[serde(default)]
    pub providers: ProvidersConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    #[serde(default = "default_db_path")]
    pub path: String,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            path: default_db_path(),
        }
    }
}

fn default_db_path() -> String {
    "~/.leadflow/leadflow.db".to_string()
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RoutingConfig {
    #[serde(default = "default_strategy")]
    pub default_strategy: String,
    #[serde(default = "default_true")]
    pub auto_assign_enabled: bool,
    #[serde(default = "default_true")]
    pub consider_capacity: bool,
    #[serde(default)]
    pub consider_score: bool,
}

impl Default for RoutingConfig {
    fn default() -> Self {
        Self {
            default_strategy: default_strategy(),
            auto_assign_enabled: true,
            consider_capacity: true,
            consider_score: false,
        }
    }
}

fn default_strategy() -> String {
    "ROUND_ROBIN".to_string()
}

fn default_true() -> bool {
    true
}

impl RoutingConfig {
    pub fn to_defaults(&self) -> Result<RoutingDefaults> {
        let strategy: Strategy = self
            .default_strategy
            .parse()
            .with_context(|| format!("Invalid [routing] default_strategy '{}'", self.default_strategy))?;
        Ok(RoutingDefaults {
            strategy,
            auto_assign_enabled: self.auto_assign_enabled,
            consider_capacity: self.consider_capacity,
            consider_score: self.consider_score,
        })
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HeatConfig {
    #[serde(default = "default_true")]
    pub classifier_enabled: bool,
    #[serde(default = "default_classifier_timeout_ms")]
    pub classifier_timeout_ms: u64,
    #[serde(default = "default_history_turns")]
    pub history_turns: usize,
}

impl Default for HeatConfig {
    fn default() -> Self {
        Self {
            classifier_enabled: true,
            classifier_timeout_ms: default_classifier_timeout_ms(),
            history_turns: default_history_turns(),
        }
    }
}

fn default_classifier_timeout_ms() -> u64 {
    5000
}

fn default_history_turns() -> usize {
    MAX_HISTORY_TURNS
}

impl HeatConfig {
    pub fn to_scorer_config(&self) -> HeatScorerConfig {
        if self.history_turns > MAX_HISTORY_TURNS {
            warn!(
                "[heat] history_turns = {} exceeds the maximum, using {}",
                self.history_turns, MAX_HISTORY_TURNS
            );
        }
        HeatScorerConfig {
            classifier_enabled: self.classifier_enabled,
            classifier_timeout: Duration::from_millis(self.classifier_timeout_ms),
            history_turns: self.history_turns.min(MAX_HISTORY_TURNS),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ProvidersConfig {
    #[serde(default)]
    pub anthropic: Option<AnthropicConfig>,
    #[serde(default)]
    pub openai: Option<OpenAiProviderConfig>,
    #[serde(default)]
    pub openai_compat: Option<OpenAiCompatProviderConfig>,
    #[serde(default)]
    pub failover_order: Vec<String>,
}

#[derive(Clone, Serialize, Deserialize)]
pub struct AnthropicConfig {
    #[serde(default)]
    pub api_key: String,
    #[serde(default = "default_base_url")]
    pub base_url: String,
    #[serde(default = "default_anthropic_model")]
    pub model: String,
    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,
}

impl std::fmt::Debug for AnthropicConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AnthropicConfig")
            .field("api_key", &mask_secret(&self.api_key))
            .field("base_url", &self.base_url)
            .field("model", &self.model)
            .field("max_tokens", &self.max_tokens)
            .finish()
    }
}

fn default_base_url() -> String {
    "https://api.anthropic.com".to_string()
}
fn default_anthropic_model() -> String {
    "claude-3-5-haiku-latest".to_string()
}
fn default_max_tokens() -> u32 {
    512
}

#[derive(Clone, Serialize, Deserialize)]
pub struct OpenAiProviderConfig {
    #[serde(default)]
    pub api_key: String,
    #[serde(default = "default_openai_base_url")]
    pub base_url: String,
    #[serde(default = "default_openai_model")]
    pub model: String,
    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,
}

impl std::fmt::Debug for OpenAiProviderConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OpenAiProviderConfig")
            .field("api_key", &mask_secret(&self.api_key))
            .field("base_url", &self.base_url)
            .field("model", &self.model)
            .field("max_tokens", &self.max_tokens)
            .finish()
    }
}

fn default_openai_base_url() -> String {
    "https://api.openai.com".to_string()
}
fn default_openai_model() -> String {
    "gpt-4o-mini".to_string()
}

#[derive(Clone, Serialize, Deserialize)]
pub struct OpenAiCompatProviderConfig {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub api_key: String,
    pub base_url: String,
    pub model: String,
    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,
}

impl std::fmt::Debug for OpenAiCompatProviderConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OpenAiCompatProviderConfig")
            .field("name", &self.name)
            .field("api_key", &mask_secret(&self.api_key))
            .field("base_url", &self.base_url)
            .field("model", &self.model)
            .field("max_tokens", &self.max_tokens)
            .finish()
    }
}

impl ProvidersConfig {
    /// Build the classifier's provider router.
    ///
    /// Providers are tried in `failover_order`; when that list is empty every
    /// configured provider is used in anthropic, openai, openai_compat order.
    /// Returns `None` when no provider has usable credentials.
    pub fn build_router(&self) -> Result<Option<ModelRouter>> {
        let order: Vec<String> = if self.failover_order.is_empty() {
            vec![
                "anthropic".to_string(),
                "openai".to_string(),
                "openai_compat".to_string(),
            ]
        } else {
            self.failover_order.clone()
        };

        let mut providers: Vec<Box<dyn LlmProvider>> = Vec::new();
        for name in &order {
            match name.as_str() {
                "anthropic" => {
                    if let Some(cfg) = &self.anthropic {
                        if cfg.api_key.is_empty() {
                            warn!("Anthropic provider configured without an api_key, skipping");
                            continue;
                        }
                        providers.push(Box::new(AnthropicProvider::new(Endpoint::new(
                            &cfg.api_key,
                            &cfg.model,
                            &cfg.base_url,
                            cfg.max_tokens,
                        ))?));
                    }
                }
                "openai" => {
                    if let Some(cfg) = &self.openai {
                        if cfg.api_key.is_empty() {
                            warn!("OpenAI provider configured without an api_key, skipping");
                            continue;
                        }
                        providers.push(Box::new(OpenAiProvider::new(Endpoint::new(
                            &cfg.api_key,
                            &cfg.model,
                            &cfg.base_url,
                            cfg.max_tokens,
                        ))?));
                    }
                }
                "openai_compat" => {
                    if let Some(cfg) = &self.openai_compat {
                        let name = if cfg.name.is_empty() { "openai_compat" } else { cfg.name.as_str() };
                        let provider = OpenAiProvider::new(Endpoint::new(
                            &cfg.api_key,
                            &cfg.model,
                            &cfg.base_url,
                            cfg.max_tokens,
                        ))?
                        .with_name(name);
                        providers.push(Box::new(provider));
                    }
                }
                other => warn!("Unknown provider '{}' in failover_order, ignoring", other),
            }
        }

        if providers.is_empty() {
            return Ok(None);
        }
        Ok(Some(ModelRouter::with_failover(providers)?))
    }
}

fn mask_secret(s: &str) -> String {
    if s.is_empty() {
        return "(empty)".to_string();
    }
    let chars: Vec<char> = s.chars().collect();
    if chars.len() > 7 {
        let prefix: String = chars[..3].iter().collect();
        let suffix: String = chars[chars.len() - 4..].iter().collect();
        format!("{}...{}", prefix, suffix)
    } else {
        "***".to_string()
    }
}

pub fn config_dir() -> PathBuf {
    dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(".leadflow")
}

impl LeadflowConfig {
    pub fn load(custom_path: &Option<PathBuf>) -> Result<Self> {
        let path = custom_path
            .clone()
            .unwrap_or_else(|| config_dir().join("config.toml"));

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            if let Ok(metadata) = std::fs::metadata(&path) {
                let mode = metadata.permissions().mode();
                // group or other may read provider keys
                if mode & 0o077 != 0 {
                    return Err(anyhow!(
                        "Config file {:?} has overly permissive permissions ({:o}). \
                         It may contain secrets. Fix with: chmod 600 {:?}",
                        path,
                        mode & 0o777,
                        path
                    ));
                }
            }
        }

        let content = std::fs::read_to_string(&path).with_context(|| {
            format!(
                "Failed to read config at {}. Run `leadflow init` first.",
                path.display()
            )
        })?;

        Self::parse(&content).with_context(|| format!("Failed to parse config at {}", path.display()))
    }

    pub fn parse(content: &str) -> Result<Self> {
        let expanded = expand_env_vars(content);
        let config: Self = toml::from_str(&expanded)?;

        if let Some(anthropic) = &config.providers.anthropic {
            if anthropic.api_key.starts_with("sk-ant-") {
                warn!(
                    "API key is hardcoded in config file. For security, use environment variables: api_key = \"${{ANTHROPIC_API_KEY}}\""
                );
            }
        }
        if let Some(openai) = &config.providers.openai {
            if openai.api_key.starts_with("sk-") {
                warn!(
                    "API key is hardcoded in config file. For security, use environment variables: api_key = \"${{OPENAI_API_KEY}}\""
                );
            }
        }

        Ok(config)
    }

    pub fn db_path(&self) -> PathBuf {
        shellexpand(&self.database.path)
    }
}

/// Environment variables that may be expanded in config files
const ALLOWED_ENV_VARS: &[&str] = &[
    "ANTHROPIC_API_KEY",
    "OPENAI_API_KEY",
    "CUSTOM_LLM_API_KEY",
    "LEADFLOW_DB_PATH",
    "HOME",
    "USER",
];

fn expand_env_vars(s: &str) -> String {
    let mut result = s.to_string();
    let mut pos = 0;
    while pos < result.len() {
        let Some(start) = result[pos..].find("${") else {
            break;
        };
        let abs_start = pos + start;
        let Some(end) = result[abs_start..].find('}') else {
            break;
        };
        let var_name = result[abs_start + 2..abs_start + end].to_string();

        if !ALLOWED_ENV_VARS.contains(&var_name.as_str()) {
            warn!(
                "Skipping expansion of unrecognized env var '{}' in config (not in allowlist)",
                var_name
            );
            pos = abs_start + end + 1;
            continue;
        }

        let value = std::env::var(&var_name).unwrap_or_default();
        let value_len = value.len();
        result = format!(
            "{}{}{}",
            &result[..abs_start],
            value,
            &result[abs_start + end + 1..]
        );
        pos = abs_start + value_len;
    }
    result
}

pub fn shellexpand(s: &str) -> PathBuf {
    if let Some(rest) = s.strip_prefix("~/") {
        if let Some(home) = dirs::home_dir() {
            return home.join(rest);
        }
    }
    PathBuf::from(s)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_template_parses() {
        let config = LeadflowConfig::parse(include_str!("../../../config/default.toml")).unwrap();
        let defaults = config.routing.to_defaults().unwrap();
        assert_eq!(defaults.strategy, Strategy::RoundRobin);
        assert!(defaults.auto_assign_enabled);
        assert_eq!(config.heat.classifier_timeout_ms, 5000);
    }

    #[test]
    fn test_empty_config_uses_safe_defaults() {
        let config = LeadflowConfig::parse("").unwrap();
        let defaults = config.routing.to_defaults().unwrap();
        assert_eq!(defaults.strategy, Strategy::RoundRobin);
        assert!(defaults.consider_capacity);
        assert!(!defaults.consider_score);
        assert!(config.providers.build_router().unwrap().is_none());
    }

    #[test]
    fn test_invalid_strategy_rejected() {
        let config = LeadflowConfig::parse("[routing]\ndefault_strategy = \"RANDOM\"\n").unwrap();
        assert!(config.routing.to_defaults().is_err());
    }

    #[test]
    fn test_history_turns_capped() {
        let config = LeadflowConfig::parse("[heat]\nhistory_turns = 40\n").unwrap();
        assert_eq!(config.heat.to_scorer_config().history_turns, MAX_HISTORY_TURNS);
    }

    #[test]
    fn test_unlisted_env_var_left_unexpanded() {
        let expanded = expand_env_vars("key = \"${LEADFLOW_TEST_NOT_ALLOWED}\"");
        assert_eq!(expanded, "key = \"${LEADFLOW_TEST_NOT_ALLOWED}\"");
    }

    #[test]
    fn test_unterminated_placeholder_kept() {
        assert_eq!(expand_env_vars("path = \"${HOME\""), "path = \"${HOME\"");
    }

    #[test]
    fn test_mask_secret() {
        assert_eq!(mask_secret(""), "(empty)");
        assert_eq!(mask_secret("short"), "***");
        assert_eq!(mask_secret("sk-ant-abcdef1234"), "sk-...1234");
    }

    #[test]
    fn test_debug_hides_keys() {
        let config = AnthropicConfig {
            api_key: "sk-ant-secret-value-9999".to_string(),
            base_url: default_base_url(),
            model: default_anthropic_model(),
            max_tokens: 256,
        };
        let rendered = format!("{:?}", config);
        assert!(!rendered.contains("secret-value"));
        assert!(rendered.contains("sk-...9999"));
    }

    #[test]
    fn test_shellexpand_plain_path() {
        assert_eq!(shellexpand("/var/lib/leadflow.db"), PathBuf::from("/var/lib/leadflow.db"));
    }

    #[cfg(unix)]
    #[test]
    fn test_world_readable_config_refused() {
        use std::os::unix::fs::PermissionsExt;
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(&path, "").unwrap();
        std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o644)).unwrap();
        assert!(LeadflowConfig::load(&Some(path.clone())).is_err());

        std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o600)).unwrap();
        assert!(LeadflowConfig::load(&Some(path)).is_ok());
    }

    #[test]
    fn test_compat_provider_builds_router() {
        let config = LeadflowConfig::parse(
            "[providers]\nfailover_order = [\"openai_compat\"]\n\
             [providers.openai_compat]\nname = \"ollama\"\nbase_url = \"http://localhost:11434\"\nmodel = \"llama3\"\n",
        )
        .unwrap();
        let router = config.providers.build_router().unwrap().unwrap();
        assert_eq!(router.provider_count(), 1);
        assert_eq!(router.provider_name(), "ollama");
    }

    #[test]
    fn test_unnamed_compat_provider_keeps_section_name() {
        let config = LeadflowConfig::parse(
            "[providers.openai_compat]\nbase_url = \"http://localhost:1234/\"\nmodel = \"qwen\"\n",
        )
        .unwrap();
        let router = config.providers.build_router().unwrap().unwrap();
        assert_eq!(router.provider_name(), "openai_compat");
        assert_eq!(router.model(), "qwen");
    }
}
