use chrono::NaiveDateTime;
use serde::{Deserialize, Deserializer, Serialize};

use crate::domain::{AnimationStyle, GalleryId, ImageId, TaskId};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GallerySummary {
    pub id: GalleryId,
    pub name: String,
    pub slug: String,
    #[serde(default)]
    pub image_count: u32,
    #[serde(default, deserialize_with = "lenient_style")]
    pub hover_animation: Option<AnimationStyle>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cover_image_id: Option<ImageId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created_at: Option<NaiveDateTime>,
}

impl GallerySummary {
    pub fn animation_style(&self) -> AnimationStyle {
        self.hover_animation.unwrap_or_default()
    }
}

// The server stores whatever string an admin sent; styles this client does not
// know render as the default.
fn lenient_style<'de, D>(deserializer: D) -> Result<Option<AnimationStyle>, D::Error>
where
    D: Deserializer<'de>,
{
    let raw = Option::<String>::deserialize(deserializer)?;
    Ok(raw.and_then(|value| value.parse().ok()))
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ImageSummary {
    pub id: ImageId,
    pub filename: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub original_filename: Option<String>,
    #[serde(default)]
    pub width: u32,
    #[serde(default)]
    pub height: u32,
    #[serde(default)]
    pub order: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GalleryDetail {
    pub id: GalleryId,
    pub name: String,
    pub slug: String,
    #[serde(default)]
    pub is_public: bool,
    #[serde(default)]
    pub allow_download: bool,
    #[serde(default)]
    pub thumbnail_only: bool,
    #[serde(default)]
    pub image_count: u32,
    #[serde(default)]
    pub images: Vec<ImageSummary>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UploadedImage {
    pub id: ImageId,
    pub filename: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub original_filename: Option<String>,
    #[serde(default)]
    pub width: u32,
    #[serde(default)]
    pub height: u32,
    #[serde(default)]
    pub file_size: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExportRequestResponse {
    pub task_id: TaskId,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<String>,
}

/// Archive job state as reported by the status endpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RemoteExportStatus {
    Ready,
    Error,
    /// `pending`, `processing`, or anything else the server reports while the
    /// archive is still being assembled.
    Processing,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExportStatusResponse {
    pub status: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub filename: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl ExportStatusResponse {
    pub fn remote_status(&self) -> RemoteExportStatus {
        match self.status.as_str() {
            "ready" => RemoteExportStatus::Ready,
            "error" => RemoteExportStatus::Error,
            _ => RemoteExportStatus::Processing,
        }
    }
}
