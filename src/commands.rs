use std::sync::Arc;

use serde::Serialize;
use tauri::plugin::{Builder, TauriPlugin};
use tauri::{AppHandle, Emitter, Manager, Runtime, State};
use tokio::sync::broadcast::error::RecvError;

use crate::download::{DownloadJob, DownloadOutcome};
use crate::library::{LibraryStore, SettingsPatch, UserRecord};
use crate::models::{Album, Track};
use crate::notifications::Toast;
use crate::AppState;

const LIBRARY_CHANGED_EVENT: &str = "app://library/changed";
const DOWNLOAD_PROGRESS_EVENT: &str = "app://download/progress";
const TOAST_EVENT: &str = "app://toast";

fn with_library<T>(
    state: &AppState,
    apply: impl FnOnce(&mut LibraryStore) -> T,
) -> Result<T, String> {
    let mut library = state
        .library
        .lock()
        .map_err(|_| "library store is unavailable".to_string())?;
    Ok(apply(&mut library))
}

#[tauri::command]
fn get_user_data(state: State<'_, AppState>) -> Result<UserRecord, String> {
    with_library(&state, |library| UserRecord::clone(&library.snapshot()))
}

#[tauri::command]
fn toggle_like_track(state: State<'_, AppState>, track: Track) -> Result<bool, String> {
    with_library(&state, |library| {
        library.toggle_like_track(&track);
        library.is_liked(track.id)
    })
}

#[tauri::command]
fn add_to_history(state: State<'_, AppState>, track: Track) -> Result<(), String> {
    with_library(&state, |library| library.add_to_history(&track))
}

#[tauri::command]
fn toggle_save_album(state: State<'_, AppState>, album: Album) -> Result<bool, String> {
    with_library(&state, |library| {
        library.toggle_save_album(&album);
        library.is_album_saved(album.id)
    })
}

#[tauri::command]
fn update_settings(state: State<'_, AppState>, settings: SettingsPatch) -> Result<(), String> {
    with_library(&state, |library| library.update_settings(settings))
}

#[tauri::command]
fn clear_all(state: State<'_, AppState>) -> Result<(), String> {
    with_library(&state, |library| library.clear_all())
}

#[tauri::command]
fn is_liked(state: State<'_, AppState>, track_id: u64) -> Result<bool, String> {
    with_library(&state, |library| library.is_liked(track_id))
}

#[tauri::command]
fn is_album_saved(state: State<'_, AppState>, album_id: u64) -> Result<bool, String> {
    with_library(&state, |library| library.is_album_saved(album_id))
}

#[derive(Serialize)]
#[serde(tag = "status", rename_all = "camelCase")]
enum DownloadReport {
    Skipped,
    Saved { path: String, filename: String },
    Failed { message: String },
}

#[tauri::command]
async fn download_track(
    state: State<'_, AppState>,
    track: Track,
) -> Result<DownloadReport, String> {
    let downloads = Arc::clone(&state.downloads);
    let report = match downloads.download_track(&track).await {
        DownloadOutcome::Skipped => DownloadReport::Skipped,
        DownloadOutcome::Saved { path, filename } => DownloadReport::Saved {
            path: path.to_string_lossy().into_owned(),
            filename,
        },
        DownloadOutcome::Failed(error) => DownloadReport::Failed {
            message: error.user_message().to_string(),
        },
    };
    Ok(report)
}

#[tauri::command]
fn download_state(state: State<'_, AppState>) -> DownloadJob {
    state.downloads.job()
}

#[tauri::command]
fn list_toasts(state: State<'_, AppState>) -> Vec<Toast> {
    state.toasts.active()
}

#[tauri::command]
fn dismiss_toast(state: State<'_, AppState>, id: u64) -> bool {
    state.toasts.dismiss(id)
}

/// Registers the commands and forwards store, download and toast updates to
/// the webview.
pub fn init<R: Runtime>(state: AppState) -> TauriPlugin<R> {
    Builder::new("bitperfect")
        .invoke_handler(tauri::generate_handler![
            get_user_data,
            toggle_like_track,
            add_to_history,
            toggle_save_album,
            update_settings,
            clear_all,
            is_liked,
            is_album_saved,
            download_track,
            download_state,
            list_toasts,
            dismiss_toast
        ])
        .setup(move |app, _api| {
            forward_events(app, &state);
            app.manage(state);
            Ok(())
        })
        .build()
}

fn forward_events<R: Runtime>(app: &AppHandle<R>, state: &AppState) {
    if let Ok(library) = state.library.lock() {
        let mut snapshots = library.subscribe();
        let handle = app.clone();
        tauri::async_runtime::spawn(async move {
            while snapshots.changed().await.is_ok() {
                let snapshot = snapshots.borrow_and_update().clone();
                if let Err(error) = handle.emit(LIBRARY_CHANGED_EVENT, snapshot.as_ref()) {
                    log::warn!("[library] failed to emit change event: {error}");
                }
            }
        });
    }

    let mut jobs = state.downloads.subscribe();
    let handle = app.clone();
    tauri::async_runtime::spawn(async move {
        while jobs.changed().await.is_ok() {
            let job = jobs.borrow_and_update().clone();
            if let Err(error) = handle.emit(DOWNLOAD_PROGRESS_EVENT, job) {
                log::warn!("[download] failed to emit progress event: {error}");
            }
        }
    });

    let mut toasts = state.toasts.subscribe();
    let handle = app.clone();
    tauri::async_runtime::spawn(async move {
        loop {
            match toasts.recv().await {
                Ok(event) => {
                    if let Err(error) = handle.emit(TOAST_EVENT, event) {
                        log::warn!("[toast] failed to emit toast event: {error}");
                    }
                }
                Err(RecvError::Lagged(skipped)) => {
                    log::warn!("[toast] dropped {skipped} toast events");
                }
                Err(RecvError::Closed) => break,
            }
        }
    });
}
