use anyhow::Context;
use std::fs;
use std::path::PathBuf;

use crate::ui::settings::EngineSettings;

fn settings_path() -> PathBuf {
    let mut path = dirs::config_dir().unwrap_or_else(|| PathBuf::from("."));
    path.push(crate::APP_DIR);
    if let Err(e) = fs::create_dir_all(&path) {
        log::warn!("could not create config dir {}: {e}", path.display());
    }
    path.push("settings.json");
    path
}

/// Settings file plus environment overrides. A missing or unreadable file
/// falls back to defaults.
pub fn load_settings() -> EngineSettings {
    let path = settings_path();
    let mut settings = match fs::read_to_string(&path) {
        Ok(s) => serde_json::from_str(&s).unwrap_or_else(|e| {
            log::warn!("ignoring malformed {}: {e}", path.display());
            EngineSettings::default()
        }),
        Err(_) => EngineSettings::default(),
    };
    settings.apply_env();
    settings
}

pub fn save_settings(settings: &EngineSettings) -> anyhow::Result<()> {
    let path = settings_path();
    let json = serde_json::to_string_pretty(settings)?;
    fs::write(&path, json).with_context(|| format!("writing {}", path.display()))
}
