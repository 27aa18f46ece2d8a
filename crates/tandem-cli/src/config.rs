use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs::File;
use std::path::{Path, PathBuf};
use tandem_bandits::{PolicyKind, DEFAULT_SEED};
use tandem_core::ParameterValues;
use tandem_service::RequestSchema;

pub const ENV_STORE_PATH: &str = "TANDEM_STORE_PATH";
pub const ENV_FORWARD_URL: &str = "TANDEM_FORWARD_URL";
pub const ENV_FORWARD_TOKEN: &str = "TANDEM_FORWARD_TOKEN";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PolicyConfig {
    pub kind: PolicyKind,
    /// Base seed every per-decision seed is derived from.
    pub rl_seed: u64,
}

impl Default for PolicyConfig {
    fn default() -> Self {
        Self {
            kind: PolicyKind::default(),
            rl_seed: DEFAULT_SEED,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub store_path: PathBuf,
    pub policy: PolicyConfig,
    /// Replaces the policy's own priors when seeding the first snapshot.
    pub priors: Option<ParameterValues>,
    pub backup_before_update: bool,
    pub require_prior_decision: bool,
    pub forward_url: Option<String>,
    pub forward_token: Option<String>,
    pub log_filter: String,
    #[serde(flatten)]
    pub schema: RequestSchema,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            store_path: PathBuf::from("data/tandem.store.json"),
            policy: PolicyConfig::default(),
            priors: None,
            backup_before_update: true,
            require_prior_decision: false,
            forward_url: None,
            forward_token: None,
            log_filter: "info".to_string(),
            schema: RequestSchema::default(),
        }
    }
}

impl AppConfig {
    /// Reads `path`; a missing file yields the defaults.
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Ok(Self::default());
        }
        let file = File::open(path)
            .with_context(|| format!("failed to open config {}", path.display()))?;
        serde_json::from_reader(file)
            .with_context(|| format!("failed to parse config {}", path.display()))
    }

    pub fn apply_env(&mut self) {
        self.apply_overrides(|key| std::env::var(key).ok());
    }

    /// Environment wins over the file. Empty values are ignored.
    pub fn apply_overrides(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());
        if let Some(path) = get(ENV_STORE_PATH) {
            self.store_path = PathBuf::from(path);
        }
        if let Some(url) = get(ENV_FORWARD_URL) {
            self.forward_url = Some(url);
        }
        if let Some(token) = get(ENV_FORWARD_TOKEN) {
            self.forward_token = Some(token);
        }
    }

    /// Where a pre-update backup of the store goes.
    pub fn backup_dir(&self) -> PathBuf {
        self.store_path
            .parent()
            .filter(|p| !p.as_os_str().is_empty())
            .map_or_else(|| PathBuf::from("backups"), |p| p.join("backups"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::collections::HashMap;

    #[test]
    fn missing_file_gives_defaults() {
        let path = std::env::temp_dir().join("tandem_config_missing/none.json");
        let config = AppConfig::load(&path).unwrap();
        assert_eq!(config, AppConfig::default());
        assert_eq!(config.policy.rl_seed, 42);
    }

    #[test]
    fn partial_file_keeps_other_defaults() {
        let dir = std::env::temp_dir().join(format!("tandem_config_partial_{}", std::process::id()));
        let _ = std::fs::create_dir_all(&dir);
        let path = dir.join("tandem.json");
        std::fs::write(
            &path,
            json!({
                "store_path": "/srv/tandem/store.json",
                "policy": {"kind": "epsilon_greedy"},
                "outcome_fields": ["clicks", "views"]
            })
            .to_string(),
        )
        .unwrap();

        let config = AppConfig::load(&path).unwrap();
        assert_eq!(config.store_path, PathBuf::from("/srv/tandem/store.json"));
        assert_eq!(config.policy.kind, PolicyKind::EpsilonGreedy);
        assert_eq!(config.policy.rl_seed, 42);
        assert_eq!(config.schema.outcome_fields, vec!["clicks", "views"]);
        assert_eq!(config.schema.context_fields, vec!["cur_var", "past3_vars"]);
        assert!(config.backup_before_update);
    }

    #[test]
    fn environment_overrides_file_values() {
        let env: HashMap<&str, &str> = HashMap::from([
            (ENV_STORE_PATH, "/tmp/other.json"),
            (ENV_FORWARD_URL, "http://collector:8080"),
            (ENV_FORWARD_TOKEN, "  "),
        ]);
        let mut config = AppConfig {
            forward_token: Some("from-file".into()),
            ..AppConfig::default()
        };
        config.apply_overrides(|key| env.get(key).map(|v| (*v).to_string()));

        assert_eq!(config.store_path, PathBuf::from("/tmp/other.json"));
        assert_eq!(config.forward_url.as_deref(), Some("http://collector:8080"));
        assert_eq!(config.forward_token.as_deref(), Some("from-file"));
    }

    #[test]
    fn backups_live_next_to_the_store() {
        let config = AppConfig::default();
        assert_eq!(config.backup_dir(), PathBuf::from("data/backups"));
        let bare = AppConfig {
            store_path: PathBuf::from("store.json"),
            ..AppConfig::default()
        };
        assert_eq!(bare.backup_dir(), PathBuf::from("backups"));
    }
}
