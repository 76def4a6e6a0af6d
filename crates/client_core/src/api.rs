use std::{fmt, sync::Arc};

use async_trait::async_trait;
use shared::{
    domain::{GalleryId, ImageId, TaskId},
    protocol::{
        ExportRequestResponse, ExportStatusResponse, GalleryDetail, GallerySummary, UploadedImage,
    },
};
use tokio::sync::mpsc;
use url::Url;

use crate::error::ClientResult;

/// A file picked or dropped by the user, ready to be streamed to the server.
#[derive(Clone, PartialEq, Eq)]
pub struct FileRef {
    name: String,
    mime_type: Option<String>,
    data: Arc<[u8]>,
}

impl FileRef {
    pub fn new(
        name: impl Into<String>,
        mime_type: Option<String>,
        data: impl Into<Arc<[u8]>>,
    ) -> Self {
        Self {
            name: name.into(),
            mime_type,
            data: data.into(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn mime_type(&self) -> Option<&str> {
        self.mime_type.as_deref()
    }

    pub fn size(&self) -> u64 {
        self.data.len() as u64
    }

    pub(crate) fn shared_data(&self) -> Arc<[u8]> {
        Arc::clone(&self.data)
    }

    /// Drop targets only accept `image/*` payloads.
    pub fn is_image(&self) -> bool {
        self.mime_type
            .as_deref()
            .is_some_and(|mime| mime.starts_with("image/"))
    }
}

impl fmt::Debug for FileRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FileRef")
            .field("name", &self.name)
            .field("mime_type", &self.mime_type)
            .field("size", &self.data.len())
            .finish()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TransferProgress {
    pub loaded: u64,
    pub total: u64,
}

impl TransferProgress {
    /// `floor(loaded * 100 / total)`, clamped to 100; zero for empty payloads.
    pub fn percent(&self) -> u8 {
        if self.total == 0 {
            return 0;
        }
        let percent = (u128::from(self.loaded) * 100) / u128::from(self.total);
        percent.min(100) as u8
    }
}

#[derive(Debug, Clone)]
pub struct ProgressReporter {
    tx: Option<mpsc::UnboundedSender<TransferProgress>>,
}

impl ProgressReporter {
    pub fn channel() -> (Self, mpsc::UnboundedReceiver<TransferProgress>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx: Some(tx) }, rx)
    }

    pub fn noop() -> Self {
        Self { tx: None }
    }

    pub fn report(&self, loaded: u64, total: u64) {
        if let Some(tx) = &self.tx {
            let _ = tx.send(TransferProgress { loaded, total });
        }
    }
}

/// REST surface of the gallery server used by the controllers.
#[async_trait]
pub trait GalleryApi: Send + Sync {
    async fn upload_image(
        &self,
        gallery_id: GalleryId,
        file: FileRef,
        progress: ProgressReporter,
    ) -> ClientResult<UploadedImage>;
    async fn delete_image(&self, image_id: ImageId) -> ClientResult<()>;
    async fn request_export(&self, slug: &str) -> ClientResult<ExportRequestResponse>;
    async fn export_status(&self, task_id: &TaskId) -> ClientResult<ExportStatusResponse>;
    fn export_file_url(&self, task_id: &TaskId) -> ClientResult<Url>;
    async fn download_export(&self, task_id: &TaskId) -> ClientResult<Vec<u8>>;
    async fn gallery_by_slug(&self, slug: &str) -> ClientResult<GalleryDetail>;
    async fn list_public_galleries(&self) -> ClientResult<Vec<GallerySummary>>;
}
