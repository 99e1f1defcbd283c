use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

/// Shared backend that mirrors saves for signed-in players.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct RemoteSettings {
    /// Project URL, e.g. `https://xyz.supabase.co`
    pub url: String,
    pub anon_key: String,
    #[serde(default = "default_table")]
    pub table: String,
}

fn default_table() -> String {
    "save_games".into()
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
#[serde(default)]
pub struct EngineSettings {
    /// OpenAI-compatible endpoint, including the `/v1` suffix.
    pub llm_url: String,
    pub api_key: Option<String>,
    pub chat_model: String,
    pub image_model: String,
    pub temperature: f32,

    pub turn_timeout_secs: u64,
    pub countdown_ticks: u32,
    pub tick_interval_ms: u64,

    /// User-visible save slot limit for the local store.
    pub max_local_saves: usize,

    pub remote: Option<RemoteSettings>,

    /// Overrides the platform data directory.
    pub data_dir: Option<PathBuf>,
}

impl Default for EngineSettings {
    fn default() -> Self {
        Self {
            llm_url: "http://localhost:1234/v1".into(),
            api_key: None,
            chat_model: "local-model".into(),
            image_model: "local-image-model".into(),
            temperature: 0.9,

            turn_timeout_secs: 30,
            countdown_ticks: 10,
            tick_interval_ms: 1000,

            max_local_saves: 10,

            remote: None,
            data_dir: None,
        }
    }
}

impl EngineSettings {
    pub fn turn_timeout(&self) -> Duration {
        Duration::from_secs(self.turn_timeout_secs)
    }

    pub fn tick_interval(&self) -> Duration {
        Duration::from_millis(self.tick_interval_ms)
    }

    /// Root for save files and the cloud listing cache.
    pub fn data_root(&self) -> PathBuf {
        if let Some(dir) = &self.data_dir {
            return dir.clone();
        }
        let mut path = dirs::data_dir().unwrap_or_else(|| PathBuf::from("."));
        path.push(crate::APP_DIR);
        path
    }

    /// Environment variables win over the settings file.
    pub fn apply_env(&mut self) {
        self.apply_overrides(|key| std::env::var(key).ok());
    }

    fn apply_overrides(&mut self, var: impl Fn(&str) -> Option<String>) {
        if let Some(key) = var("LOOM_API_KEY").filter(|v| !v.is_empty()) {
            self.api_key = Some(key);
        }
        if let Some(url) = var("LOOM_LLM_URL").filter(|v| !v.is_empty()) {
            self.llm_url = url;
        }

        let url = var("LOOM_SUPABASE_URL").filter(|v| !v.is_empty());
        let key = var("LOOM_SUPABASE_KEY").filter(|v| !v.is_empty());
        if let Some(remote) = self.remote.as_mut() {
            if let Some(url) = url {
                remote.url = url;
            }
            if let Some(key) = key {
                remote.anon_key = key;
            }
        } else if let (Some(url), Some(anon_key)) = (url, key) {
            self.remote = Some(RemoteSettings {
                url,
                anon_key,
                table: default_table(),
            });
        }
    }
}
