//! Request → poll → download state machine for gallery archive exports.

use std::{
    ops::ControlFlow,
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    },
    time::Duration,
};

use shared::{domain::TaskId, error::message_or, protocol::RemoteExportStatus};
use tokio::sync::{broadcast, Mutex};
use tracing::{debug, info, warn};
use url::Url;

use crate::{
    api::GalleryApi,
    config::ClientSettings,
    timer::{TaskTimer, TimerHandle},
};

const EXPORT_START_FALLBACK: &str = "Failed to start download";
const EXPORT_FAILED_FALLBACK: &str = "Download failed";
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(2000);
pub const DEFAULT_READY_RESET: Duration = Duration::from_millis(3000);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExportStatus {
    Requesting,
    Processing,
    Ready,
    Failed,
}

impl ExportStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, ExportStatus::Ready | ExportStatus::Failed)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExportTask {
    pub slug: String,
    pub task_id: Option<TaskId>,
    pub status: ExportStatus,
    pub error_message: Option<String>,
}

impl ExportTask {
    fn requesting(slug: &str) -> Self {
        Self {
            slug: slug.to_string(),
            task_id: None,
            status: ExportStatus::Requesting,
            error_message: None,
        }
    }
}

#[derive(Debug, Clone)]
pub enum ExportEvent {
    StatusChanged(ExportTask),
    /// Emitted once per task; the view navigates to `url` to fetch the archive.
    DownloadReady { task_id: TaskId, url: Url },
    Cleared,
}

#[derive(Debug, Clone)]
pub struct ExportPollerConfig {
    pub poll_interval: Duration,
    pub ready_reset: Duration,
}

impl Default for ExportPollerConfig {
    fn default() -> Self {
        Self {
            poll_interval: DEFAULT_POLL_INTERVAL,
            ready_reset: DEFAULT_READY_RESET,
        }
    }
}

impl From<&ClientSettings> for ExportPollerConfig {
    fn from(settings: &ClientSettings) -> Self {
        Self {
            poll_interval: settings.export_poll_interval(),
            ready_reset: settings.export_ready_reset(),
        }
    }
}

pub struct ExportTaskPoller {
    shared: Arc<ExportShared>,
}

struct ExportShared {
    api: Arc<dyn GalleryApi>,
    config: ExportPollerConfig,
    timer: TaskTimer,
    state: Mutex<ExportState>,
    events: broadcast::Sender<ExportEvent>,
    disposed: AtomicBool,
}

#[derive(Default)]
struct ExportState {
    /// Bumped by every `start`; responses for older generations are dropped.
    generation: u64,
    task: Option<ExportTask>,
    poll_timer: Option<TimerHandle>,
    reset_timer: Option<TimerHandle>,
}

impl ExportTaskPoller {
    pub fn new(api: Arc<dyn GalleryApi>) -> Self {
        Self::with_config(api, ExportPollerConfig::default())
    }

    pub fn with_config(api: Arc<dyn GalleryApi>, config: ExportPollerConfig) -> Self {
        let (events, _) = broadcast::channel(256);
        Self {
            shared: Arc::new(ExportShared {
                api,
                config,
                timer: TaskTimer::new(),
                state: Mutex::new(ExportState::default()),
                events,
                disposed: AtomicBool::new(false),
            }),
        }
    }

    pub async fn start(&self, slug: &str) {
        let shared = &self.shared;
        if shared.is_disposed() {
            warn!(slug, "export requested on a disposed poller");
            return;
        }

        let generation = {
            let mut state = shared.state.lock().await;
            state.generation += 1;
            shared.cancel_timers(&mut state);
            state.task = Some(ExportTask::requesting(slug));
            shared.emit_status(&state);
            state.generation
        };

        let response = shared.api.request_export(slug).await;

        let mut state = shared.state.lock().await;
        if !shared.is_current(&state, generation) {
            debug!(slug, "discarding superseded export request");
            return;
        }
        match response {
            Ok(accepted) => {
                info!(slug, task_id = %accepted.task_id, "export task accepted");
                if let Some(task) = state.task.as_mut() {
                    task.task_id = Some(accepted.task_id.clone());
                    task.status = ExportStatus::Processing;
                }
                shared.emit_status(&state);
                state.poll_timer = Some(shared.spawn_poll_loop(generation, accepted.task_id));
            }
            Err(err) => {
                warn!(slug, "export request failed: {err}");
                shared.fail(
                    &mut state,
                    message_or(err.server_message(), EXPORT_START_FALLBACK),
                );
            }
        }
    }

    pub async fn snapshot(&self) -> Option<ExportTask> {
        self.shared.state.lock().await.task.clone()
    }

    pub async fn is_busy(&self) -> bool {
        self.shared
            .state
            .lock()
            .await
            .task
            .as_ref()
            .is_some_and(|task| !task.status.is_terminal())
    }

    pub async fn is_polling(&self) -> bool {
        let state = self.shared.state.lock().await;
        state
            .poll_timer
            .is_some_and(|handle| self.shared.timer.is_active(handle))
    }

    pub fn subscribe(&self) -> broadcast::Receiver<ExportEvent> {
        self.shared.events.subscribe()
    }

    pub fn active_timer_count(&self) -> usize {
        self.shared.timer.active_count()
    }

    pub fn dispose(&self) {
        if self.shared.disposed.swap(true, Ordering::AcqRel) {
            return;
        }
        self.shared.timer.cancel_all();
        debug!("export poller disposed");
    }
}

impl Drop for ExportTaskPoller {
    fn drop(&mut self) {
        self.dispose();
    }
}

impl ExportShared {
    fn is_disposed(&self) -> bool {
        self.disposed.load(Ordering::Acquire)
    }

    fn is_current(&self, state: &ExportState, generation: u64) -> bool {
        !self.is_disposed() && state.generation == generation
    }

    fn emit(&self, event: ExportEvent) {
        let _ = self.events.send(event);
    }

    fn emit_status(&self, state: &ExportState) {
        if let Some(task) = &state.task {
            self.emit(ExportEvent::StatusChanged(task.clone()));
        }
    }

    fn cancel_timers(&self, state: &mut ExportState) {
        if let Some(handle) = state.poll_timer.take() {
            self.timer.cancel(handle);
        }
        if let Some(handle) = state.reset_timer.take() {
            self.timer.cancel(handle);
        }
    }

    fn fail(&self, state: &mut ExportState, message: String) {
        if let Some(task) = state.task.as_mut() {
            task.status = ExportStatus::Failed;
            task.error_message = Some(message);
        }
        self.emit_status(state);
    }

    fn spawn_poll_loop(self: &Arc<Self>, generation: u64, task_id: TaskId) -> TimerHandle {
        let shared = Arc::clone(self);
        self.timer.schedule(self.config.poll_interval, move || {
            let shared = Arc::clone(&shared);
            let task_id = task_id.clone();
            async move { shared.poll_once(generation, &task_id).await }
        })
    }

    async fn poll_once(self: &Arc<Self>, generation: u64, task_id: &TaskId) -> ControlFlow<()> {
        let response = self.api.export_status(task_id).await;

        let mut state = self.state.lock().await;
        if !self.is_current(&state, generation) {
            return ControlFlow::Break(());
        }

        let status = match response {
            Ok(status) => status,
            Err(err) => {
                warn!(task_id = %task_id, "export status poll failed: {err}");
                state.poll_timer = None;
                self.fail(&mut state, EXPORT_FAILED_FALLBACK.to_string());
                return ControlFlow::Break(());
            }
        };

        match status.remote_status() {
            RemoteExportStatus::Processing => {
                debug!(task_id = %task_id, status = %status.status, "export still processing");
                ControlFlow::Continue(())
            }
            RemoteExportStatus::Error => {
                warn!(task_id = %task_id, "export task failed on the server");
                state.poll_timer = None;
                self.fail(
                    &mut state,
                    message_or(status.error.as_deref(), EXPORT_FAILED_FALLBACK),
                );
                ControlFlow::Break(())
            }
            RemoteExportStatus::Ready => {
                state.poll_timer = None;
                let url = match self.api.export_file_url(task_id) {
                    Ok(url) => url,
                    Err(err) => {
                        warn!(task_id = %task_id, "cannot build export file url: {err}");
                        self.fail(&mut state, EXPORT_FAILED_FALLBACK.to_string());
                        return ControlFlow::Break(());
                    }
                };
                info!(task_id = %task_id, "export ready for download");
                if let Some(task) = state.task.as_mut() {
                    task.status = ExportStatus::Ready;
                }
                self.emit_status(&state);
                self.emit(ExportEvent::DownloadReady {
                    task_id: task_id.clone(),
                    url,
                });
                state.reset_timer = Some(self.schedule_reset(generation));
                ControlFlow::Break(())
            }
        }
    }

    fn schedule_reset(self: &Arc<Self>, generation: u64) -> TimerHandle {
        let shared = Arc::clone(self);
        self.timer.after(self.config.ready_reset, move || async move {
            let mut state = shared.state.lock().await;
            if !shared.is_current(&state, generation) {
                return;
            }
            state.reset_timer = None;
            state.task = None;
            debug!("export task cleared");
            shared.emit(ExportEvent::Cleared);
        })
    }
}

#[cfg(test)]
#[path = "tests/export_poller_tests.rs"]
mod tests;
