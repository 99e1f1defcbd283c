use anyhow::{Context, Result};
use std::sync::Arc;

use loom_engine::engine::engine::{Engine, EngineConfig};
use loom_engine::engine::llm_client::LlmClient;
use loom_engine::store::local::LocalStore;
use loom_engine::store::manager::SaveManager;
use loom_engine::store::remote::RemoteStore;
use loom_engine::store::SaveStore;
use loom_engine::ui::settings_io::{load_settings, save_settings};
use loom_engine::ui::terminal;

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let settings = load_settings();
    if std::env::args().any(|a| a == "--write-config") {
        save_settings(&settings)?;
        log::info!("settings written");
        return Ok(());
    }

    let client = Arc::new(LlmClient::new(&settings)?);

    let local = LocalStore::open(settings.data_root(), settings.max_local_saves)
        .context("opening local save store")?;
    let remote = match &settings.remote {
        Some(remote) => {
            let store = RemoteStore::new(remote).context("configuring remote save store")?;
            Some(Arc::new(store) as Arc<dyn SaveStore>)
        }
        None => {
            log::info!("no remote store configured, saves stay local");
            None
        }
    };
    let saves = SaveManager::new(Arc::new(local), remote);

    let (handle, responses) = Engine::spawn(
        EngineConfig::from(&settings),
        client.clone(),
        client.clone(),
        saves,
    );

    terminal::run(handle, responses, client)
}
