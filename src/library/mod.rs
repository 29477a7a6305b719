pub mod persistence;

use std::sync::Arc;

use serde::de::DeserializeOwned;
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;
use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;

use crate::models::{Album, AudioQuality, Track};
use crate::notifications::Notifier;
use persistence::Persistence;

/// Maximum number of entries kept in the play history.
pub const HISTORY_LIMIT: usize = 100;

#[derive(Debug, thiserror::Error)]
pub enum LibraryError {
    #[error("unable to resolve application data directory")]
    AppDataDirUnavailable,
    #[error("filesystem error: {0}")]
    Io(#[from] std::io::Error),
    #[error("database error: {0}")]
    Database(#[from] rusqlite::Error),
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
#[serde(default, rename_all = "camelCase")]
pub struct UserSettings {
    pub quality: AudioQuality,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub api_instance: Option<String>,
}

/// Partial settings update. `None` fields leave the current value alone.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
#[serde(default, rename_all = "camelCase")]
pub struct SettingsPatch {
    pub quality: Option<AudioQuality>,
    pub api_instance: Option<String>,
}

impl SettingsPatch {
    pub fn quality(quality: AudioQuality) -> Self {
        Self {
            quality: Some(quality),
            ..Self::default()
        }
    }

    pub fn api_instance(instance: impl Into<String>) -> Self {
        Self {
            api_instance: Some(instance.into()),
            ..Self::default()
        }
    }

    fn apply(self, settings: &mut UserSettings) {
        if let Some(quality) = self.quality {
            settings.quality = quality;
        }
        if let Some(instance) = self.api_instance {
            settings.api_instance = Some(instance);
        }
    }
}

/// The single persisted snapshot of the user's local library.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
#[serde(default, rename_all = "camelCase")]
pub struct UserRecord {
    #[serde(deserialize_with = "readable_entries")]
    pub liked_tracks: Vec<Track>,
    #[serde(deserialize_with = "readable_entries")]
    pub history: Vec<Track>,
    #[serde(deserialize_with = "readable_entries")]
    pub saved_albums: Vec<Album>,
    #[serde(deserialize_with = "settings_or_default")]
    pub settings: UserSettings,
}

/// Reads a stored list entry by entry. Entries that no longer parse are
/// logged and skipped; the rest of the list is kept.
fn readable_entries<'de, D, T>(deserializer: D) -> Result<Vec<T>, D::Error>
where
    D: Deserializer<'de>,
    T: DeserializeOwned,
{
    let entries = match Value::deserialize(deserializer)? {
        Value::Array(entries) => entries,
        Value::Null => Vec::new(),
        other => {
            log::warn!("[library] ignoring stored list of unexpected shape: {other}");
            Vec::new()
        }
    };
    Ok(entries
        .into_iter()
        .filter_map(|entry| match serde_json::from_value(entry) {
            Ok(item) => Some(item),
            Err(error) => {
                log::warn!("[library] skipping unreadable stored entry: {error}");
                None
            }
        })
        .collect())
}

fn settings_or_default<'de, D>(deserializer: D) -> Result<UserSettings, D::Error>
where
    D: Deserializer<'de>,
{
    let raw = Value::deserialize(deserializer)?;
    Ok(serde_json::from_value(raw).unwrap_or_else(|error| {
        log::warn!("[library] stored settings unreadable, using defaults: {error}");
        UserSettings::default()
    }))
}

enum WriteCommand {
    Save(Arc<UserRecord>),
    Clear,
    Flush(oneshot::Sender<()>),
}

/// Owns the in-memory user record. Every mutation publishes a new snapshot to
/// subscribers and, once the stored record has been read, queues a
/// write-through to the persistence writer task.
pub struct LibraryStore {
    record: Arc<UserRecord>,
    loaded: bool,
    persistence: Arc<Persistence>,
    writer: mpsc::UnboundedSender<WriteCommand>,
    worker: JoinHandle<()>,
    snapshots: watch::Sender<Arc<UserRecord>>,
    notifier: Arc<dyn Notifier>,
}

impl LibraryStore {
    /// Creates a store that serves defaults and does not write until
    /// [`LibraryStore::hydrate`] is called.
    ///
    /// # Panics
    /// Panics when called outside a Tokio runtime.
    pub fn new(persistence: Persistence, notifier: Arc<dyn Notifier>) -> Self {
        let runtime = match tokio::runtime::Handle::try_current() {
            Ok(handle) => handle,
            Err(_) => panic!("LibraryStore must be created inside a Tokio runtime"),
        };

        let persistence = Arc::new(persistence);
        let (writer, receiver) = mpsc::unbounded_channel();
        let worker = runtime.spawn(run_writer(Arc::clone(&persistence), receiver));
        let record = Arc::new(UserRecord::default());
        let (snapshots, _) = watch::channel(Arc::clone(&record));

        Self {
            record,
            loaded: false,
            persistence,
            writer,
            worker,
            snapshots,
            notifier,
        }
    }

    pub fn open(persistence: Persistence, notifier: Arc<dyn Notifier>) -> Self {
        let mut store = Self::new(persistence, notifier);
        store.hydrate();
        store
    }

    /// Reads the stored record and enables write-through.
    pub fn hydrate(&mut self) {
        let record = self.persistence.load();
        log::info!(
            "[library] loaded {} liked tracks, {} history entries, {} saved albums",
            record.liked_tracks.len(),
            record.history.len(),
            record.saved_albums.len()
        );
        self.loaded = true;
        self.publish(record);
    }

    pub fn is_loaded(&self) -> bool {
        self.loaded
    }

    pub fn snapshot(&self) -> Arc<UserRecord> {
        Arc::clone(&self.record)
    }

    pub fn subscribe(&self) -> watch::Receiver<Arc<UserRecord>> {
        self.snapshots.subscribe()
    }

    pub fn liked_tracks(&self) -> &[Track] {
        &self.record.liked_tracks
    }

    pub fn history(&self) -> &[Track] {
        &self.record.history
    }

    pub fn saved_albums(&self) -> &[Album] {
        &self.record.saved_albums
    }

    pub fn settings(&self) -> &UserSettings {
        &self.record.settings
    }

    pub fn is_liked(&self, track_id: u64) -> bool {
        self.record.liked_tracks.iter().any(|track| track.id == track_id)
    }

    pub fn is_album_saved(&self, album_id: u64) -> bool {
        self.record.saved_albums.iter().any(|album| album.id == album_id)
    }

    pub fn toggle_like_track(&mut self, track: &Track) {
        let was_liked = self.is_liked(track.id);
        self.mutate(|record| {
            if was_liked {
                record.liked_tracks.retain(|existing| existing.id != track.id);
            } else {
                record.liked_tracks.insert(0, track.clone());
            }
        });

        if was_liked {
            self.notifier
                .success(&format!("Removed {} from favorites", track.title));
        } else {
            self.notifier
                .success(&format!("Added {} to favorites", track.title));
        }
    }

    pub fn add_to_history(&mut self, track: &Track) {
        self.mutate(|record| {
            record.history.retain(|existing| existing.id != track.id);
            record.history.insert(0, track.clone());
            record.history.truncate(HISTORY_LIMIT);
        });
    }

    pub fn toggle_save_album(&mut self, album: &Album) {
        let was_saved = self.is_album_saved(album.id);
        self.mutate(|record| {
            if was_saved {
                record.saved_albums.retain(|existing| existing.id != album.id);
            } else {
                record.saved_albums.insert(0, album.clone());
            }
        });

        if was_saved {
            self.notifier
                .success(&format!("Removed {} from library", album.title));
        } else {
            self.notifier
                .success(&format!("Saved {} to library", album.title));
        }
    }

    pub fn update_settings(&mut self, patch: SettingsPatch) {
        self.mutate(|record| patch.apply(&mut record.settings));
    }

    /// Resets to defaults and erases the stored record. Dependent views should
    /// reload afterwards.
    pub fn clear_all(&mut self) {
        self.publish(UserRecord::default());
        self.send(WriteCommand::Clear);
        self.notifier.success("All local data has been cleared");
    }

    /// Waits until every queued write has reached the persistence driver.
    pub async fn flush(&self) {
        let (done, wait) = oneshot::channel();
        if self.send(WriteCommand::Flush(done)) {
            let _ = wait.await;
        }
    }

    /// Flushes pending writes and stops the writer task.
    pub async fn shutdown(self) {
        self.flush().await;
        let Self { writer, worker, .. } = self;
        drop(writer);
        if let Err(error) = worker.await {
            log::error!("[library] persistence writer stopped abnormally: {error}");
        }
    }

    fn mutate(&mut self, apply: impl FnOnce(&mut UserRecord)) {
        let mut next = UserRecord::clone(&self.record);
        apply(&mut next);
        self.publish(next);
        if self.loaded {
            self.send(WriteCommand::Save(self.snapshot()));
        }
    }

    fn publish(&mut self, record: UserRecord) {
        self.record = Arc::new(record);
        self.snapshots.send_replace(Arc::clone(&self.record));
    }

    fn send(&self, command: WriteCommand) -> bool {
        if self.writer.send(command).is_err() {
            log::warn!("[library] persistence writer is gone; keeping changes in memory only");
            return false;
        }
        true
    }
}

async fn run_writer(
    persistence: Arc<Persistence>,
    mut receiver: mpsc::UnboundedReceiver<WriteCommand>,
) {
    while let Some(command) = receiver.recv().await {
        let mut batch = vec![command];
        while let Ok(next) = receiver.try_recv() {
            batch.push(next);
        }
        apply_batch(&persistence, batch);
    }
}

/// Only the newest queued snapshot is written; a clear discards snapshots
/// queued before it.
fn apply_batch(persistence: &Persistence, batch: Vec<WriteCommand>) {
    let mut latest: Option<Arc<UserRecord>> = None;
    for command in batch {
        match command {
            WriteCommand::Save(record) => latest = Some(record),
            WriteCommand::Clear => {
                latest = None;
                persistence.clear();
            }
            WriteCommand::Flush(done) => {
                if let Some(record) = latest.take() {
                    persistence.save(&record);
                }
                let _ = done.send(());
            }
        }
    }
    if let Some(record) = latest {
        persistence.save(&record);
    }
}
