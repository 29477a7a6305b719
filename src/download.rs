use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use reqwest::header::CONTENT_TYPE;
use reqwest::{Client, StatusCode};
use serde::Serialize;
use tokio::sync::watch;

use crate::catalog::{CatalogApi, CatalogError};
use crate::models::Track;
use crate::notifications::Notifier;

const UNKNOWN_ARTIST: &str = "Unknown Artist";
const FORBIDDEN_FILENAME_CHARS: &[char] = &['<', '>', ':', '"', '/', '\\', '|', '?', '*'];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum DownloadStatus {
    Idle,
    InProgress,
    Succeeded,
    Failed,
}

/// Observable state of the current download, if any.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DownloadJob {
    pub track: Option<Track>,
    pub status: DownloadStatus,
    pub bytes_received: u64,
    /// Zero when the response did not declare a length.
    pub total_bytes: u64,
    pub progress_percent: u8,
}

impl DownloadJob {
    pub fn idle() -> Self {
        Self {
            track: None,
            status: DownloadStatus::Idle,
            bytes_received: 0,
            total_bytes: 0,
            progress_percent: 0,
        }
    }

    fn started(track: &Track) -> Self {
        Self {
            track: Some(track.clone()),
            status: DownloadStatus::InProgress,
            ..Self::idle()
        }
    }

    pub fn downloading_track_id(&self) -> Option<u64> {
        match self.status {
            DownloadStatus::InProgress => self.track.as_ref().map(|track| track.id),
            _ => None,
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum DownloadError {
    #[error("failed to resolve stream URL: {0}")]
    Resolve(#[from] CatalogError),
    #[error("download returned status {0}")]
    Status(StatusCode),
    #[error("streaming downloads are not supported on this host")]
    Unsupported,
    #[error("transfer failed: {0}")]
    Transfer(#[from] reqwest::Error),
    #[error("failed to save file: {0}")]
    Save(#[from] io::Error),
}

impl DownloadError {
    /// The message shown to the user for this failure.
    pub fn user_message(&self) -> &'static str {
        match self {
            DownloadError::Resolve(_) => "Failed to get download URL",
            DownloadError::Status(_) => "Download failed",
            DownloadError::Unsupported => "Download not supported",
            DownloadError::Transfer(_) | DownloadError::Save(_) => {
                "Download failed — please try again"
            }
        }
    }
}

#[derive(Debug)]
pub enum DownloadOutcome {
    /// Another download was already running.
    Skipped,
    Saved { path: PathBuf, filename: String },
    Failed(DownloadError),
}

/// Host mechanism that stores a finished download.
pub trait FileSaver: Send + Sync {
    fn is_supported(&self) -> bool;
    fn save(&self, filename: &str, bytes: &[u8]) -> io::Result<PathBuf>;
}

/// Saves into a downloads directory without overwriting existing files.
pub struct DirectorySaver {
    directory: Option<PathBuf>,
}

impl DirectorySaver {
    pub fn new(directory: impl Into<PathBuf>) -> Self {
        Self {
            directory: Some(directory.into()),
        }
    }

    pub fn from_option(directory: Option<PathBuf>) -> Self {
        Self { directory }
    }

    pub fn unavailable() -> Self {
        Self { directory: None }
    }
}

impl FileSaver for DirectorySaver {
    fn is_supported(&self) -> bool {
        self.directory.is_some()
    }

    fn save(&self, filename: &str, bytes: &[u8]) -> io::Result<PathBuf> {
        let directory = self
            .directory
            .as_ref()
            .ok_or_else(|| io::Error::new(io::ErrorKind::Unsupported, "no download directory"))?;
        fs::create_dir_all(directory)?;
        let path = available_path(directory, filename);
        fs::write(&path, bytes)?;
        Ok(path)
    }
}

fn available_path(directory: &Path, filename: &str) -> PathBuf {
    let candidate = directory.join(filename);
    if !candidate.exists() {
        return candidate;
    }

    let as_path = Path::new(filename);
    let stem = as_path
        .file_stem()
        .map(|stem| stem.to_string_lossy().into_owned())
        .unwrap_or_else(|| filename.to_string());
    let extension = as_path
        .extension()
        .map(|extension| format!(".{}", extension.to_string_lossy()))
        .unwrap_or_default();

    (1..)
        .map(|index| directory.join(format!("{stem} ({index}){extension}")))
        .find(|path| !path.exists())
        .unwrap_or(candidate)
}

/// Turns a catalog track into a saved audio file, one download at a time.
pub struct DownloadPipeline {
    client: Client,
    catalog: Arc<dyn CatalogApi>,
    saver: Arc<dyn FileSaver>,
    notifier: Arc<dyn Notifier>,
    busy: AtomicBool,
    job: watch::Sender<DownloadJob>,
}

impl DownloadPipeline {
    pub fn new(
        client: Client,
        catalog: Arc<dyn CatalogApi>,
        saver: Arc<dyn FileSaver>,
        notifier: Arc<dyn Notifier>,
    ) -> Self {
        let (job, _) = watch::channel(DownloadJob::idle());
        Self {
            client,
            catalog,
            saver,
            notifier,
            busy: AtomicBool::new(false),
            job,
        }
    }

    pub fn job(&self) -> DownloadJob {
        self.job.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<DownloadJob> {
        self.job.subscribe()
    }

    pub fn is_downloading(&self) -> bool {
        self.busy.load(Ordering::Acquire)
    }

    /// Downloads `track` unless another download is already running, in which
    /// case the call is ignored.
    pub async fn download_track(&self, track: &Track) -> DownloadOutcome {
        let Some(slot) = JobSlot::acquire(self, track) else {
            log::debug!(
                "[download] ignoring request for {} while another download runs",
                track.id
            );
            return DownloadOutcome::Skipped;
        };

        match self.transfer(&slot, track).await {
            Ok((path, filename)) => {
                slot.finish(DownloadStatus::Succeeded);
                log::info!("[download] saved {} to {}", track.id, path.display());
                self.notifier
                    .success(&format!("Downloaded \"{}\"", track.display_title()));
                DownloadOutcome::Saved { path, filename }
            }
            Err(error) => {
                slot.finish(DownloadStatus::Failed);
                log::error!("[download] download of {} failed: {error}", track.id);
                self.notifier.error(error.user_message());
                DownloadOutcome::Failed(error)
            }
        }
    }

    async fn transfer(
        &self,
        slot: &JobSlot<'_>,
        track: &Track,
    ) -> Result<(PathBuf, String), DownloadError> {
        let quality = track.quality_or_default();
        let stream_url = self.catalog.resolve_stream_url(track.id, quality).await?;

        let mut response = self.client.get(stream_url).send().await?;
        if !response.status().is_success() {
            return Err(DownloadError::Status(response.status()));
        }
        if !self.saver.is_supported() {
            return Err(DownloadError::Unsupported);
        }

        let total = response.content_length().unwrap_or(0);
        let content_type = response
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|value| value.to_str().ok())
            .unwrap_or_default()
            .to_string();

        let mut chunks = Vec::new();
        let mut received: u64 = 0;
        while let Some(chunk) = response.chunk().await? {
            received += chunk.len() as u64;
            chunks.push(chunk);
            slot.progress(received, total);
        }
        let artifact: Vec<u8> = chunks.concat();

        let filename = derive_filename(track, &content_type);
        let path = self.saver.save(&filename, &artifact)?;
        Ok((path, filename))
    }
}

/// Holds the single download slot. Dropping it, on any exit path, returns
/// the pipeline to Idle.
struct JobSlot<'a> {
    pipeline: &'a DownloadPipeline,
}

impl<'a> JobSlot<'a> {
    fn acquire(pipeline: &'a DownloadPipeline, track: &Track) -> Option<Self> {
        pipeline
            .busy
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .ok()?;
        pipeline.job.send_replace(DownloadJob::started(track));
        Some(Self { pipeline })
    }

    /// Records the byte counts and notifies subscribers only when a declared
    /// total makes the percentage rise.
    fn progress(&self, received: u64, total: u64) {
        let percent = progress_percent(received, total);
        self.pipeline.job.send_if_modified(|job| {
            job.bytes_received = received;
            job.total_bytes = total;
            if total == 0 || percent <= job.progress_percent {
                return false;
            }
            job.progress_percent = percent;
            true
        });
    }

    fn finish(&self, status: DownloadStatus) {
        self.pipeline.job.send_modify(|job| job.status = status);
    }
}

impl Drop for JobSlot<'_> {
    fn drop(&mut self) {
        self.pipeline.job.send_replace(DownloadJob::idle());
        self.pipeline.busy.store(false, Ordering::Release);
    }
}

pub fn progress_percent(received: u64, total: u64) -> u8 {
    if total == 0 {
        return 0;
    }
    let percent = (received as f64 / total as f64 * 100.0).round();
    percent.clamp(0.0, 100.0) as u8
}

pub fn sanitize_filename_part(value: &str) -> String {
    value
        .chars()
        .filter(|character| !FORBIDDEN_FILENAME_CHARS.contains(character))
        .collect::<String>()
        .trim()
        .to_string()
}

pub fn extension_for(content_type: &str) -> &'static str {
    let content_type = content_type.to_ascii_lowercase();
    if content_type.contains("mp4") || content_type.contains("m4a") {
        ".m4a"
    } else if content_type.contains("mpeg") || content_type.contains("mp3") {
        ".mp3"
    } else {
        ".flac"
    }
}

/// `<artist> - <title> [<quality>]<extension>`
pub fn derive_filename(track: &Track, content_type: &str) -> String {
    let artist = track.primary_artist().unwrap_or(UNKNOWN_ARTIST);
    format!(
        "{} - {} [{}]{}",
        sanitize_filename_part(artist),
        sanitize_filename_part(&track.display_title()),
        sanitize_filename_part(track.quality_or_default().as_str()),
        extension_for(content_type)
    )
}
