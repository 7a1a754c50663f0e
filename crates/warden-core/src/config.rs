use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Per-provider overrides.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ProviderSettings {
    /// Executable to launch instead of the provider's default binary.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub binary: Option<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub extra_args: Vec<String>,
}

/// Global configuration. Every field has a default, so a partial
/// `config.json` is valid.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct WardenConfig {
    pub default_provider: Option<String>,
    pub default_model: Option<String>,
    pub system_prompt: Option<String>,
    pub permission_mode: Option<String>,
    pub auto_commit: bool,
    pub sweep_interval_secs: u64,
    pub orphan_max_age_secs: u64,
    pub session_id_timeout_ms: u64,
    /// How many prior session summaries feed the next system prompt.
    pub summary_limit: usize,
    pub providers: BTreeMap<String, ProviderSettings>,
}

impl Default for WardenConfig {
    fn default() -> Self {
        Self {
            default_provider: None,
            default_model: None,
            system_prompt: None,
            permission_mode: None,
            auto_commit: false,
            sweep_interval_secs: 60,
            orphan_max_age_secs: 600,
            session_id_timeout_ms: 5_000,
            summary_limit: 3,
            providers: BTreeMap::new(),
        }
    }
}

impl WardenConfig {
    pub fn provider(&self, name: &str) -> ProviderSettings {
        self.providers.get(name).cloned().unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn partial_json_fills_defaults() {
        let cfg: WardenConfig =
            serde_json::from_str(r#"{"default_provider":"claude","auto_commit":true}"#).unwrap();
        assert_eq!(cfg.default_provider.as_deref(), Some("claude"));
        assert!(cfg.auto_commit);
        assert_eq!(cfg.sweep_interval_secs, 60);
        assert_eq!(cfg.summary_limit, 3);
    }

    #[test]
    fn provider_settings_lookup() {
        let cfg: WardenConfig = serde_json::from_str(
            r#"{"providers":{"codex":{"binary":"/opt/codex","extra_args":["--x"]}}}"#,
        )
        .unwrap();
        assert_eq!(cfg.provider("codex").binary.as_deref(), Some("/opt/codex"));
        assert_eq!(cfg.provider("claude"), ProviderSettings::default());
    }
}
