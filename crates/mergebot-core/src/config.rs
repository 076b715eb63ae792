use merge_engine::DiffAlgorithm;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Settings {
    #[serde(default)]
    pub engines: EngineSettings,
    #[serde(default)]
    pub polling: PollingSettings,
    #[serde(default)]
    pub diff: DiffSettings,
    #[serde(default)]
    pub http: HttpSettings,
    #[serde(default)]
    pub project: ProjectSettings,
}

/// Base URLs of the external services. An empty URL disables that source.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineSettings {
    #[serde(default = "default_sa_url")]
    pub sa: String,
    #[serde(default = "default_classifier_url")]
    pub classifier: String,
    #[serde(default = "default_combiner_url")]
    pub combiner: String,
    #[serde(default = "default_edit_script_url")]
    pub edit_script: String,
    #[serde(default = "default_backend_url")]
    pub history: String,
    #[serde(default = "default_backend_url")]
    pub audit: String,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

impl Default for EngineSettings {
    fn default() -> Self {
        Self {
            sa: default_sa_url(),
            classifier: default_classifier_url(),
            combiner: default_combiner_url(),
            edit_script: default_edit_script_url(),
            history: default_backend_url(),
            audit: default_backend_url(),
            timeout_secs: default_timeout_secs(),
        }
    }
}

impl EngineSettings {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PollingSettings {
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    #[serde(default = "default_interval_ms")]
    pub interval_ms: u64,
}

impl Default for PollingSettings {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            interval_ms: default_interval_ms(),
        }
    }
}

impl PollingSettings {
    pub fn interval(&self) -> Duration {
        Duration::from_millis(self.interval_ms)
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DiffSettings {
    #[serde(default)]
    pub algorithm: DiffAlgorithm,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HttpSettings {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default = "default_http_port")]
    pub port: u16,
    #[serde(default)]
    pub cors_origins: Vec<String>,
}

impl Default for HttpSettings {
    fn default() -> Self {
        Self {
            enabled: false,
            port: default_http_port(),
            cors_origins: Vec::new(),
        }
    }
}

/// Defaults for the merge being resolved, used when a session does not say.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ProjectSettings {
    #[serde(default)]
    pub project_path: String,
    #[serde(default)]
    pub target_branch: String,
    #[serde(default)]
    pub source_branch: String,
}

fn default_sa_url() -> String {
    "http://127.0.0.1:18001".into()
}
fn default_classifier_url() -> String {
    "http://127.0.0.1:18002".into()
}
fn default_combiner_url() -> String {
    "http://127.0.0.1:18003".into()
}
fn default_edit_script_url() -> String {
    "http://127.0.0.1:18004".into()
}
fn default_backend_url() -> String {
    "http://127.0.0.1:8080".into()
}
fn default_timeout_secs() -> u64 {
    30
}
fn default_max_attempts() -> u32 {
    7
}
fn default_interval_ms() -> u64 {
    5000
}
fn default_http_port() -> u16 {
    8787
}

impl Settings {
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let settings: Settings = serde_json::from_str(&content)?;
        Ok(settings)
    }

    /// Load `path`, or fall back to defaults when it does not exist yet.
    pub fn load_or_default(path: &Path) -> anyhow::Result<Self> {
        if path.exists() {
            Self::load(path)
        } else {
            Ok(Self::default())
        }
    }

    pub fn save(&self, path: &Path) -> anyhow::Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let content = serde_json::to_string_pretty(self)?;
        std::fs::write(path, content)?;
        Ok(())
    }
}
