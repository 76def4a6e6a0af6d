//! reqwest-backed implementation of [`GalleryApi`].

use async_trait::async_trait;
use reqwest::{
    multipart::{Form, Part},
    Body, Client, Response,
};
use serde::de::DeserializeOwned;
use shared::{
    domain::{GalleryId, ImageId, TaskId},
    error::ErrorBody,
    protocol::{
        ExportRequestResponse, ExportStatusResponse, GalleryDetail, GallerySummary, UploadedImage,
    },
};
use tracing::debug;
use url::Url;

use crate::{
    api::{FileRef, GalleryApi, ProgressReporter},
    config::ClientSettings,
    error::{ClientError, ClientResult},
};

const DEFAULT_UPLOAD_CHUNK_SIZE: usize = 64 * 1024;

#[derive(Debug, Clone)]
pub struct Endpoints {
    base: Url,
    api_prefix: Vec<String>,
}

impl Endpoints {
    pub fn new(server_url: &str, api_prefix: &str) -> ClientResult<Self> {
        let base = Url::parse(server_url.trim())?;
        if base.cannot_be_a_base() {
            return Err(ClientError::InvalidUrl(format!(
                "{server_url} cannot be used as a base url"
            )));
        }
        let api_prefix = api_prefix
            .split('/')
            .filter(|segment| !segment.is_empty())
            .map(str::to_string)
            .collect();
        Ok(Self { base, api_prefix })
    }

    pub fn upload_image(&self, gallery_id: GalleryId) -> ClientResult<Url> {
        self.api(&["admin", "galleries", gallery_id.to_string().as_str(), "images"])
    }

    pub fn delete_image(&self, image_id: ImageId) -> ClientResult<Url> {
        self.api(&["admin", "images", image_id.to_string().as_str()])
    }

    pub fn request_export(&self, slug: &str) -> ClientResult<Url> {
        self.api(&["galleries", slug, "download"])
    }

    pub fn export_status(&self, task_id: &TaskId) -> ClientResult<Url> {
        self.api(&["downloads", task_id.as_str(), "status"])
    }

    pub fn export_file(&self, task_id: &TaskId) -> ClientResult<Url> {
        self.api(&["downloads", task_id.as_str(), "file"])
    }

    pub fn gallery(&self, slug: &str) -> ClientResult<Url> {
        self.api(&["galleries", slug])
    }

    pub fn galleries(&self) -> ClientResult<Url> {
        self.api(&["galleries"])
    }

    /// Thumbnails are served outside the API prefix.
    pub fn thumbnail(&self, gallery_id: GalleryId, image_id: ImageId) -> ClientResult<Url> {
        let mut url = self.at(&[], &[
            "images",
            "thumbnails",
            gallery_id.to_string().as_str(),
            image_id.to_string().as_str(),
        ])?;
        url.query_pairs_mut().append_pair("size", "medium");
        Ok(url)
    }

    fn api(&self, segments: &[&str]) -> ClientResult<Url> {
        self.at(&self.api_prefix, segments)
    }

    fn at(&self, prefix: &[String], segments: &[&str]) -> ClientResult<Url> {
        let mut url = self.base.clone();
        url.set_query(None);
        url.set_fragment(None);
        {
            let mut path = url
                .path_segments_mut()
                .map_err(|_| ClientError::InvalidUrl(self.base.to_string()))?;
            path.pop_if_empty();
            path.extend(prefix.iter().map(String::as_str));
            path.extend(segments);
        }
        Ok(url)
    }
}

pub struct HttpGalleryApi {
    http: Client,
    endpoints: Endpoints,
    upload_chunk_size: usize,
}

impl HttpGalleryApi {
    pub fn new(endpoints: Endpoints) -> Self {
        Self {
            http: Client::new(),
            endpoints,
            upload_chunk_size: DEFAULT_UPLOAD_CHUNK_SIZE,
        }
    }

    pub fn from_settings(settings: &ClientSettings) -> ClientResult<Self> {
        let endpoints = Endpoints::new(&settings.server_url, &settings.api_prefix)?;
        Ok(Self::new(endpoints).with_upload_chunk_size(settings.upload_chunk_size))
    }

    pub fn with_upload_chunk_size(mut self, chunk_size: usize) -> Self {
        self.upload_chunk_size = chunk_size.max(1);
        self
    }

    pub fn endpoints(&self) -> &Endpoints {
        &self.endpoints
    }
}

async fn ensure_success(response: Response) -> ClientResult<Response> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let raw = response.text().await.unwrap_or_default();
    Err(server_error(status.as_u16(), &raw))
}

fn server_error(status: u16, raw_body: &str) -> ClientError {
    let message = serde_json::from_str::<ErrorBody>(raw_body)
        .ok()
        .and_then(|body| body.message().map(str::to_string));
    ClientError::Server { status, message }
}

async fn decode_json<T: DeserializeOwned>(response: Response) -> ClientResult<T> {
    let response = ensure_success(response).await?;
    Ok(response.json::<T>().await?)
}

#[async_trait]
impl GalleryApi for HttpGalleryApi {
    async fn upload_image(
        &self,
        gallery_id: GalleryId,
        file: FileRef,
        progress: ProgressReporter,
    ) -> ClientResult<UploadedImage> {
        let url = self.endpoints.upload_image(gallery_id)?;
        let total = file.size();
        let data = file.shared_data();
        let chunk_size = self.upload_chunk_size;
        let chunk_count = data.len().div_ceil(chunk_size);

        progress.report(0, total);
        let chunks = futures::stream::iter((0..chunk_count).map(move |index| {
            let start = index * chunk_size;
            let end = (start + chunk_size).min(data.len());
            progress.report(end as u64, total);
            Ok::<Vec<u8>, std::io::Error>(data[start..end].to_vec())
        }));

        let mut part = Part::stream_with_length(Body::wrap_stream(chunks), total)
            .file_name(file.name().to_string());
        if let Some(mime) = file.mime_type() {
            part = part.mime_str(mime)?;
        }

        debug!(gallery_id = %gallery_id, file = file.name(), bytes = total, "uploading image");
        let response = self
            .http
            .post(url)
            .multipart(Form::new().part("file", part))
            .send()
            .await?;
        decode_json(response).await
    }

    async fn delete_image(&self, image_id: ImageId) -> ClientResult<()> {
        let url = self.endpoints.delete_image(image_id)?;
        let response = self.http.delete(url).send().await?;
        ensure_success(response).await?;
        Ok(())
    }

    async fn request_export(&self, slug: &str) -> ClientResult<ExportRequestResponse> {
        let url = self.endpoints.request_export(slug)?;
        let response = self.http.post(url).send().await?;
        decode_json(response).await
    }

    async fn export_status(&self, task_id: &TaskId) -> ClientResult<ExportStatusResponse> {
        let url = self.endpoints.export_status(task_id)?;
        let response = self.http.get(url).send().await?;
        let status = response.status();
        let raw = response.text().await?;

        // The server reports a failed archive job as HTTP 500 with a regular
        // status body.
        if let Ok(parsed) = serde_json::from_str::<ExportStatusResponse>(&raw) {
            return Ok(parsed);
        }
        if status.is_success() {
            return Err(ClientError::Decode(format!(
                "unexpected export status body: {raw}"
            )));
        }
        Err(server_error(status.as_u16(), &raw))
    }

    fn export_file_url(&self, task_id: &TaskId) -> ClientResult<Url> {
        self.endpoints.export_file(task_id)
    }

    async fn download_export(&self, task_id: &TaskId) -> ClientResult<Vec<u8>> {
        let url = self.endpoints.export_file(task_id)?;
        let response = ensure_success(self.http.get(url).send().await?).await?;
        Ok(response.bytes().await?.to_vec())
    }

    async fn gallery_by_slug(&self, slug: &str) -> ClientResult<GalleryDetail> {
        let url = self.endpoints.gallery(slug)?;
        let response = self.http.get(url).send().await?;
        decode_json(response).await
    }

    async fn list_public_galleries(&self) -> ClientResult<Vec<GallerySummary>> {
        let url = self.endpoints.galleries()?;
        let response = self.http.get(url).send().await?;
        decode_json(response).await
    }
}

#[cfg(test)]
#[path = "tests/transport_tests.rs"]
mod tests;
