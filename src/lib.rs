pub mod catalog;
#[cfg(feature = "desktop")]
pub mod commands;
pub mod config;
pub mod download;
pub mod library;
pub mod models;
pub mod notifications;

use std::sync::{Arc, Mutex};

use reqwest::Client;

use catalog::HttpCatalog;
use config::AppConfig;
use download::{DirectorySaver, DownloadPipeline};
use library::persistence::{Persistence, SqliteDriver};
use library::LibraryStore;
use notifications::ToastQueue;

/// Process-wide services shared by every view.
pub struct AppState {
    pub library: Arc<Mutex<LibraryStore>>,
    pub downloads: Arc<DownloadPipeline>,
    pub toasts: Arc<ToastQueue>,
}

impl AppState {
    /// Builds the services from `config` and starts the toast expiry task.
    /// Must run inside a Tokio runtime.
    ///
    /// Storage problems never abort startup: the library falls back to an
    /// in-memory session.
    pub fn initialize(config: &AppConfig) -> Self {
        let toasts = Arc::new(ToastQueue::new());
        toasts.spawn_expiry();

        let persistence = match open_persistence(config) {
            Ok(persistence) => persistence,
            Err(error) => {
                log::error!("[library] persistent storage unavailable, using memory only: {error}");
                Persistence::detached()
            }
        };
        let library = LibraryStore::open(persistence, toasts.clone());

        let client = Client::builder()
            .user_agent(config.user_agent.clone())
            .build()
            .expect("failed to build HTTP client");
        let catalog = HttpCatalog::new(client.clone(), config.api_instances.clone())
            .with_preferences(library.subscribe());
        let saver = DirectorySaver::from_option(config.download_dir.clone());
        let downloads = DownloadPipeline::new(
            client,
            Arc::new(catalog),
            Arc::new(saver),
            toasts.clone(),
        );

        Self {
            library: Arc::new(Mutex::new(library)),
            downloads: Arc::new(downloads),
            toasts,
        }
    }
}

fn open_persistence(config: &AppConfig) -> Result<Persistence, library::LibraryError> {
    let path = config
        .database_path()
        .ok_or(library::LibraryError::AppDataDirUnavailable)?;
    Ok(Persistence::new(SqliteDriver::open(path)?))
}

/// Installs the `env_logger` backend. Safe to call more than once.
pub fn init_logging() {
    let _ = env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info"))
        .format_timestamp_millis()
        .try_init();
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Track;
    use tempfile::TempDir;

    fn config_in(temp_dir: &TempDir) -> AppConfig {
        AppConfig {
            data_dir: Some(temp_dir.path().join("data")),
            download_dir: Some(temp_dir.path().join("downloads")),
            api_instances: Vec::new(),
            user_agent: "Test/1.0".to_string(),
        }
    }

    #[tokio::test]
    async fn library_survives_a_restart() {
        init_logging();
        let temp_dir = TempDir::new().unwrap();
        let config = config_in(&temp_dir);

        let state = AppState::initialize(&config);
        state
            .library
            .lock()
            .unwrap()
            .toggle_like_track(&Track::new(12, "Persisted"));
        assert_eq!(state.toasts.active().len(), 1);

        let AppState { library, .. } = state;
        let store = Arc::try_unwrap(library)
            .unwrap_or_else(|_| panic!("library still shared"))
            .into_inner()
            .unwrap();
        store.shutdown().await;

        let restarted = AppState::initialize(&config);
        assert!(restarted.library.lock().unwrap().is_liked(12));
    }

    #[tokio::test]
    async fn missing_data_dir_falls_back_to_memory() {
        let temp_dir = TempDir::new().unwrap();
        let mut config = config_in(&temp_dir);
        config.data_dir = None;

        let state = AppState::initialize(&config);
        let mut library = state.library.lock().unwrap();
        library.add_to_history(&Track::new(1, "Ephemeral"));
        assert_eq!(library.history().len(), 1);
    }
}
