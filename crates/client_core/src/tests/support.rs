//! In-memory [`GalleryApi`] with scripted responses for controller tests.

use std::{
    collections::{HashMap, VecDeque},
    sync::{
        atomic::{AtomicUsize, Ordering},
        Mutex,
    },
    time::Duration,
};

use async_trait::async_trait;
use shared::{
    domain::{GalleryId, ImageId, TaskId},
    protocol::{
        ExportRequestResponse, ExportStatusResponse, GalleryDetail, GallerySummary, ImageSummary,
        UploadedImage,
    },
};
use tokio::sync::broadcast;
use url::Url;

use crate::{
    api::{FileRef, GalleryApi, ProgressReporter},
    error::{ClientError, ClientResult},
};

#[derive(Debug, Clone)]
pub(crate) enum Outcome {
    Ok,
    Server(Option<String>),
    Transport,
}

impl Outcome {
    fn into_error(self) -> Option<ClientError> {
        match self {
            Outcome::Ok => None,
            Outcome::Server(message) => Some(ClientError::Server {
                status: 500,
                message,
            }),
            Outcome::Transport => Some(ClientError::Transport("connection reset".into())),
        }
    }
}

/// How one upload behaves: progress reports as `(delay before, bytes loaded)`,
/// then a final delay and the result.
#[derive(Debug, Clone)]
pub(crate) struct UploadScript {
    pub steps: Vec<(Duration, u64)>,
    pub settle: Duration,
    pub outcome: Outcome,
}

impl UploadScript {
    pub fn ok_after(settle_ms: u64) -> Self {
        Self {
            steps: Vec::new(),
            settle: Duration::from_millis(settle_ms),
            outcome: Outcome::Ok,
        }
    }

    pub fn failing_after(settle_ms: u64, outcome: Outcome) -> Self {
        Self {
            steps: Vec::new(),
            settle: Duration::from_millis(settle_ms),
            outcome,
        }
    }

    pub fn with_steps(mut self, steps: &[(u64, u64)]) -> Self {
        self.steps = steps
            .iter()
            .map(|(delay_ms, loaded)| (Duration::from_millis(*delay_ms), *loaded))
            .collect();
        self
    }
}

#[derive(Debug, Clone)]
pub(crate) enum StatusScript {
    Status(&'static str, Option<&'static str>),
    Transport,
}

#[derive(Default)]
pub(crate) struct FakeGalleryApi {
    uploads: Mutex<HashMap<String, UploadScript>>,
    upload_calls: AtomicUsize,
    uploads_in_flight: AtomicUsize,
    max_uploads_in_flight: AtomicUsize,
    export_reply: Mutex<Option<(Duration, Result<&'static str, Outcome>)>>,
    export_requests: AtomicUsize,
    statuses: Mutex<VecDeque<StatusScript>>,
    status_calls: AtomicUsize,
    gallery: Mutex<Option<GalleryDetail>>,
    gallery_delay: Mutex<Duration>,
    gallery_fetches: AtomicUsize,
}

impl FakeGalleryApi {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn script_upload(self, name: &str, script: UploadScript) -> Self {
        lock(&self.uploads).insert(name.to_string(), script);
        self
    }

    pub fn accept_export(self, task_id: &'static str, delay_ms: u64) -> Self {
        *lock(&self.export_reply) = Some((Duration::from_millis(delay_ms), Ok(task_id)));
        self
    }

    pub fn reject_export(self, outcome: Outcome) -> Self {
        *lock(&self.export_reply) = Some((Duration::ZERO, Err(outcome)));
        self
    }

    /// Once the queue runs dry every poll answers `processing`.
    pub fn with_statuses(self, statuses: impl IntoIterator<Item = StatusScript>) -> Self {
        lock(&self.statuses).extend(statuses);
        self
    }

    pub fn with_gallery(self, image_count: i64, delay_ms: u64) -> Self {
        let images = (1..=image_count)
            .map(|id| ImageSummary {
                id: ImageId(id),
                filename: format!("{id}.jpg"),
                original_filename: None,
                width: 800,
                height: 600,
                order: id,
            })
            .collect();
        *lock(&self.gallery) = Some(GalleryDetail {
            id: GalleryId(1),
            name: "Trip".into(),
            slug: "trip".into(),
            is_public: true,
            allow_download: true,
            thumbnail_only: false,
            image_count: image_count as u32,
            images,
        });
        *lock(&self.gallery_delay) = Duration::from_millis(delay_ms);
        self
    }

    pub fn upload_calls(&self) -> usize {
        self.upload_calls.load(Ordering::SeqCst)
    }

    pub fn max_uploads_in_flight(&self) -> usize {
        self.max_uploads_in_flight.load(Ordering::SeqCst)
    }

    pub fn export_requests(&self) -> usize {
        self.export_requests.load(Ordering::SeqCst)
    }

    pub fn status_calls(&self) -> usize {
        self.status_calls.load(Ordering::SeqCst)
    }

    pub fn gallery_fetches(&self) -> usize {
        self.gallery_fetches.load(Ordering::SeqCst)
    }
}

fn lock<T>(mutex: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(std::sync::PoisonError::into_inner)
}

#[async_trait]
impl GalleryApi for FakeGalleryApi {
    async fn upload_image(
        &self,
        _gallery_id: GalleryId,
        file: FileRef,
        progress: ProgressReporter,
    ) -> ClientResult<UploadedImage> {
        let call = self.upload_calls.fetch_add(1, Ordering::SeqCst) as i64;
        let in_flight = self.uploads_in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_uploads_in_flight
            .fetch_max(in_flight, Ordering::SeqCst);

        let script = lock(&self.uploads)
            .get(file.name())
            .cloned()
            .unwrap_or_else(|| UploadScript::ok_after(10));
        let total = file.size();
        for (delay, loaded) in script.steps {
            tokio::time::sleep(delay).await;
            progress.report(loaded, total);
        }
        tokio::time::sleep(script.settle).await;
        self.uploads_in_flight.fetch_sub(1, Ordering::SeqCst);

        match script.outcome.into_error() {
            Some(err) => Err(err),
            None => Ok(UploadedImage {
                id: ImageId(100 + call),
                filename: format!("stored-{}", file.name()),
                original_filename: Some(file.name().to_string()),
                width: 800,
                height: 600,
                file_size: total,
            }),
        }
    }

    async fn delete_image(&self, _image_id: ImageId) -> ClientResult<()> {
        Ok(())
    }

    async fn request_export(&self, _slug: &str) -> ClientResult<ExportRequestResponse> {
        self.export_requests.fetch_add(1, Ordering::SeqCst);
        let reply = lock(&self.export_reply).clone();
        let (delay, reply) = reply.unwrap_or((Duration::ZERO, Ok("task-1")));
        tokio::time::sleep(delay).await;
        match reply {
            Ok(task_id) => Ok(ExportRequestResponse {
                task_id: TaskId(task_id.to_string()),
                status: Some("pending".into()),
            }),
            Err(outcome) => Err(outcome
                .into_error()
                .unwrap_or_else(|| ClientError::Decode("scripted".into()))),
        }
    }

    async fn export_status(&self, _task_id: &TaskId) -> ClientResult<ExportStatusResponse> {
        self.status_calls.fetch_add(1, Ordering::SeqCst);
        let next = lock(&self.statuses).pop_front();
        match next.unwrap_or(StatusScript::Status("processing", None)) {
            StatusScript::Status(status, error) => Ok(ExportStatusResponse {
                status: status.to_string(),
                filename: None,
                error: error.map(str::to_string),
            }),
            StatusScript::Transport => Err(ClientError::Transport("connection reset".into())),
        }
    }

    fn export_file_url(&self, task_id: &TaskId) -> ClientResult<Url> {
        Ok(Url::parse(&format!(
            "http://fake.local/api/downloads/{task_id}/file"
        ))?)
    }

    async fn download_export(&self, _task_id: &TaskId) -> ClientResult<Vec<u8>> {
        Ok(b"PK".to_vec())
    }

    async fn gallery_by_slug(&self, slug: &str) -> ClientResult<GalleryDetail> {
        self.gallery_fetches.fetch_add(1, Ordering::SeqCst);
        let delay = *lock(&self.gallery_delay);
        tokio::time::sleep(delay).await;
        lock(&self.gallery).clone().ok_or(ClientError::Server {
            status: 404,
            message: Some(format!("gallery {slug} not found")),
        })
    }

    async fn list_public_galleries(&self) -> ClientResult<Vec<GallerySummary>> {
        Ok(Vec::new())
    }
}

pub(crate) fn file(name: &str, size: usize) -> FileRef {
    FileRef::new(name, Some("image/jpeg".into()), vec![7u8; size])
}

/// Everything currently buffered on `rx`.
pub(crate) fn drain<T: Clone>(rx: &mut broadcast::Receiver<T>) -> Vec<T> {
    let mut events = Vec::new();
    while let Ok(event) = rx.try_recv() {
        events.push(event);
    }
    events
}

pub(crate) async fn sleep_ms(ms: u64) {
    tokio::time::sleep(Duration::from_millis(ms)).await;
}
