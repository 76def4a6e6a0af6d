//! Client-side orchestration for the gallery front-end: the upload queue, the
//! archive export poller and the hover carousel, plus the REST client they
//! talk through.

pub mod api;
pub mod carousel;
pub mod config;
pub mod error;
pub mod export_poller;
pub mod timer;
pub mod transport;
pub mod upload_queue;

pub use api::{FileRef, GalleryApi, ProgressReporter, TransferProgress};
pub use carousel::{
    render_layers, CarouselAnimator, CarouselEvent, CarouselGallery, CarouselSnapshot, FrameLayer,
};
pub use config::{load_settings, ClientSettings};
pub use error::{ClientError, ClientResult};
pub use export_poller::{ExportEvent, ExportPollerConfig, ExportStatus, ExportTask, ExportTaskPoller};
pub use timer::{TaskTimer, TimerHandle};
pub use transport::{Endpoints, HttpGalleryApi};
pub use upload_queue::{
    QueueSummary, UploadEvent, UploadItem, UploadItemId, UploadQueueConfig, UploadQueueController,
    UploadStatus,
};

#[cfg(test)]
#[path = "tests/support.rs"]
pub(crate) mod test_support;
