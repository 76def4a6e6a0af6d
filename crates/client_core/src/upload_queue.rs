//! Concurrent multi-file upload queue.

use std::{
    fmt,
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    },
    time::Duration,
};

use shared::{domain::GalleryId, error::message_or, protocol::UploadedImage};
use tokio::sync::{broadcast, Mutex, Semaphore};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::{
    api::{FileRef, GalleryApi, ProgressReporter},
    config::ClientSettings,
    timer::{TaskTimer, TimerHandle},
};

const UPLOAD_FAILED_FALLBACK: &str = "Upload failed";
pub const DEFAULT_BATCH_DEBOUNCE: Duration = Duration::from_millis(500);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct UploadItemId(Uuid);

impl UploadItemId {
    fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl fmt::Display for UploadItemId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UploadStatus {
    Queued,
    Uploading,
    Completed,
    Failed,
}

impl UploadStatus {
    pub fn is_settled(self) -> bool {
        matches!(self, UploadStatus::Completed | UploadStatus::Failed)
    }
}

#[derive(Debug, Clone)]
pub struct UploadItem {
    pub id: UploadItemId,
    pub file: FileRef,
    pub status: UploadStatus,
    pub progress: u8,
    pub error_message: Option<String>,
    pub uploaded: Option<UploadedImage>,
}

impl UploadItem {
    fn queued(file: FileRef) -> Self {
        Self {
            id: UploadItemId::new(),
            file,
            status: UploadStatus::Queued,
            progress: 0,
            error_message: None,
            uploaded: None,
        }
    }

    fn begin(&mut self) -> bool {
        if self.status != UploadStatus::Queued {
            return false;
        }
        self.status = UploadStatus::Uploading;
        self.progress = 0;
        true
    }

    /// 100 is reserved for `Completed`.
    fn advance(&mut self, percent: u8) -> bool {
        let percent = percent.min(99);
        if self.status != UploadStatus::Uploading || percent <= self.progress {
            return false;
        }
        self.progress = percent;
        true
    }

    fn complete(&mut self, uploaded: UploadedImage) -> bool {
        if self.status != UploadStatus::Uploading {
            return false;
        }
        self.status = UploadStatus::Completed;
        self.progress = 100;
        self.uploaded = Some(uploaded);
        true
    }

    fn fail(&mut self, message: String) -> bool {
        if self.status.is_settled() {
            return false;
        }
        self.status = UploadStatus::Failed;
        self.error_message = Some(message);
        true
    }
}

#[derive(Debug, Clone)]
pub enum UploadEvent {
    ItemUpdated(UploadItem),
    ItemDismissed(UploadItemId),
    BatchChanged,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct QueueSummary {
    pub completed: usize,
    pub failed: usize,
    pub total: usize,
}

impl QueueSummary {
    pub fn is_settled(&self) -> bool {
        self.completed + self.failed == self.total
    }
}

#[derive(Debug, Clone)]
pub struct UploadQueueConfig {
    pub batch_debounce: Duration,
    pub max_concurrent: Option<usize>,
}

impl Default for UploadQueueConfig {
    fn default() -> Self {
        Self {
            batch_debounce: DEFAULT_BATCH_DEBOUNCE,
            max_concurrent: None,
        }
    }
}

impl From<&ClientSettings> for UploadQueueConfig {
    fn from(settings: &ClientSettings) -> Self {
        Self {
            batch_debounce: settings.upload_batch_debounce(),
            max_concurrent: settings.max_concurrent_uploads,
        }
    }
}

pub struct UploadQueueController {
    shared: Arc<UploadShared>,
}

struct UploadShared {
    api: Arc<dyn GalleryApi>,
    gallery_id: GalleryId,
    batch_debounce: Duration,
    permits: Option<Arc<Semaphore>>,
    timer: TaskTimer,
    state: Mutex<UploadQueueState>,
    events: broadcast::Sender<UploadEvent>,
    disposed: AtomicBool,
}

#[derive(Default)]
struct UploadQueueState {
    items: Vec<UploadItem>,
    batch_notify: Option<TimerHandle>,
}

impl UploadQueueController {
    pub fn new(api: Arc<dyn GalleryApi>, gallery_id: GalleryId) -> Self {
        Self::with_config(api, gallery_id, UploadQueueConfig::default())
    }

    pub fn with_config(
        api: Arc<dyn GalleryApi>,
        gallery_id: GalleryId,
        config: UploadQueueConfig,
    ) -> Self {
        let (events, _) = broadcast::channel(1024);
        let permits = config
            .max_concurrent
            .filter(|limit| *limit > 0)
            .map(|limit| Arc::new(Semaphore::new(limit)));
        Self {
            shared: Arc::new(UploadShared {
                api,
                gallery_id,
                batch_debounce: config.batch_debounce,
                permits,
                timer: TaskTimer::new(),
                state: Mutex::new(UploadQueueState::default()),
                events,
                disposed: AtomicBool::new(false),
            }),
        }
    }

    pub async fn enqueue(&self, files: Vec<FileRef>) -> Vec<UploadItem> {
        let shared = &self.shared;
        if shared.is_disposed() {
            warn!(gallery_id = %shared.gallery_id, "enqueue on a disposed upload queue ignored");
            return Vec::new();
        }

        let created: Vec<UploadItem> = files.into_iter().map(UploadItem::queued).collect();
        {
            let mut state = shared.state.lock().await;
            state.items.extend(created.iter().cloned());
        }

        info!(
            gallery_id = %shared.gallery_id,
            count = created.len(),
            "queued uploads"
        );
        for item in &created {
            shared.emit(UploadEvent::ItemUpdated(item.clone()));
            let job = Arc::clone(shared);
            let id = item.id;
            let file = item.file.clone();
            tokio::spawn(async move {
                job.run_job(id, file).await;
            });
        }
        created
    }

    pub async fn dismiss(&self, id: UploadItemId) -> bool {
        let removed = {
            let mut state = self.shared.state.lock().await;
            let position = state
                .items
                .iter()
                .position(|item| item.id == id && item.status == UploadStatus::Completed);
            match position {
                Some(index) => {
                    state.items.remove(index);
                    true
                }
                None => false,
            }
        };

        if removed {
            self.shared.emit(UploadEvent::ItemDismissed(id));
        } else {
            debug!(item_id = %id, "dismiss ignored for unknown or unfinished upload");
        }
        removed
    }

    pub async fn items(&self) -> Vec<UploadItem> {
        self.shared.state.lock().await.items.clone()
    }

    pub async fn summary(&self) -> QueueSummary {
        let state = self.shared.state.lock().await;
        QueueSummary {
            completed: count_status(&state.items, UploadStatus::Completed),
            failed: count_status(&state.items, UploadStatus::Failed),
            total: state.items.len(),
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<UploadEvent> {
        self.shared.events.subscribe()
    }

    pub fn gallery_id(&self) -> GalleryId {
        self.shared.gallery_id
    }

    pub fn active_timer_count(&self) -> usize {
        self.shared.timer.active_count()
    }

    /// Cancels the pending batch notification and discards results of jobs
    /// that settle from now on. Idempotent.
    pub fn dispose(&self) {
        if self.shared.disposed.swap(true, Ordering::AcqRel) {
            return;
        }
        self.shared.timer.cancel_all();
        if let Some(permits) = &self.shared.permits {
            permits.close();
        }
        debug!(gallery_id = %self.shared.gallery_id, "upload queue disposed");
    }
}

impl Drop for UploadQueueController {
    fn drop(&mut self) {
        self.dispose();
    }
}

fn count_status(items: &[UploadItem], status: UploadStatus) -> usize {
    items.iter().filter(|item| item.status == status).count()
}

impl UploadShared {
    fn is_disposed(&self) -> bool {
        self.disposed.load(Ordering::Acquire)
    }

    fn emit(&self, event: UploadEvent) {
        let _ = self.events.send(event);
    }

    async fn run_job(self: Arc<Self>, id: UploadItemId, file: FileRef) {
        let _permit = match &self.permits {
            Some(permits) => match Arc::clone(permits).acquire_owned().await {
                Ok(permit) => Some(permit),
                Err(_) => return,
            },
            None => None,
        };

        if !self.update(id, UploadItem::begin).await {
            return;
        }

        let (reporter, mut progress_rx) = ProgressReporter::channel();
        let upload = self.api.upload_image(self.gallery_id, file.clone(), reporter);
        tokio::pin!(upload);

        let result = loop {
            tokio::select! {
                biased;
                Some(progress) = progress_rx.recv() => {
                    self.update(id, |item| item.advance(progress.percent())).await;
                }
                result = &mut upload => break result,
            }
        };

        match result {
            Ok(uploaded) => {
                let image_id = uploaded.id;
                if self.update(id, |item| item.complete(uploaded)).await {
                    info!(item_id = %id, image_id = %image_id, file = file.name(), "upload completed");
                    self.schedule_batch_notification().await;
                }
            }
            Err(err) => {
                warn!(item_id = %id, file = file.name(), "upload failed: {err}");
                let message = message_or(err.server_message(), UPLOAD_FAILED_FALLBACK);
                self.update(id, |item| item.fail(message)).await;
            }
        }
    }

    async fn update(
        &self,
        id: UploadItemId,
        transition: impl FnOnce(&mut UploadItem) -> bool,
    ) -> bool {
        if self.is_disposed() {
            return false;
        }
        let mut state = self.state.lock().await;
        let Some(item) = state.items.iter_mut().find(|item| item.id == id) else {
            return false;
        };
        if !transition(item) {
            return false;
        }
        self.emit(UploadEvent::ItemUpdated(item.clone()));
        true
    }

    async fn schedule_batch_notification(self: &Arc<Self>) {
        let mut state = self.state.lock().await;
        if self.is_disposed() {
            return;
        }
        if let Some(previous) = state.batch_notify.take() {
            self.timer.cancel(previous);
        }
        let shared = Arc::clone(self);
        state.batch_notify = Some(self.timer.after(self.batch_debounce, move || async move {
            shared.state.lock().await.batch_notify = None;
            if !shared.is_disposed() {
                debug!(gallery_id = %shared.gallery_id, "upload batch changed");
                shared.emit(UploadEvent::BatchChanged);
            }
        }));
    }
}

#[cfg(test)]
#[path = "tests/upload_queue_tests.rs"]
mod tests;
