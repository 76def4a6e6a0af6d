use super::*;
use std::sync::Arc;

use axum::{
    body::Bytes,
    extract::{Multipart, Path, State},
    http::StatusCode,
    response::{IntoResponse, Response as AxumResponse},
    routing::{delete, get, post},
    Json, Router,
};
use serde_json::json;
use shared::domain::AnimationStyle;
use tokio::{net::TcpListener, sync::Mutex};

#[derive(Debug, Clone)]
struct ReceivedUpload {
    gallery_id: i64,
    field: String,
    file_name: Option<String>,
    content_type: Option<String>,
    bytes: usize,
}

#[derive(Clone, Default)]
struct ServerState {
    uploads: Arc<Mutex<Vec<ReceivedUpload>>>,
}

fn error(status: StatusCode, message: &str) -> AxumResponse {
    (status, Json(ErrorBody::new(message))).into_response()
}

async fn handle_upload(
    State(state): State<ServerState>,
    Path(gallery_id): Path<i64>,
    mut multipart: Multipart,
) -> AxumResponse {
    let Ok(Some(field)) = multipart.next_field().await else {
        return error(StatusCode::BAD_REQUEST, "No file provided");
    };
    let name = field.name().unwrap_or_default().to_string();
    let file_name = field.file_name().map(str::to_string);
    let content_type = field.content_type().map(str::to_string);
    let Ok(bytes) = field.bytes().await else {
        return error(StatusCode::BAD_REQUEST, "Unreadable upload");
    };
    if file_name.as_deref() == Some("notes.txt") {
        return error(StatusCode::BAD_REQUEST, "Invalid file type");
    }
    state.uploads.lock().await.push(ReceivedUpload {
        gallery_id,
        field: name,
        file_name: file_name.clone(),
        content_type,
        bytes: bytes.len(),
    });
    Json(json!({
        "id": 31,
        "filename": "stored.jpg",
        "original_filename": file_name,
        "width": 640,
        "height": 480,
        "file_size": bytes.len(),
    }))
    .into_response()
}

async fn handle_delete(Path(image_id): Path<i64>) -> AxumResponse {
    if image_id == 404 {
        return error(StatusCode::NOT_FOUND, "Image not found");
    }
    StatusCode::NO_CONTENT.into_response()
}

async fn handle_request_export(Path(slug): Path<String>) -> AxumResponse {
    if slug == "locked" {
        return error(
            StatusCode::FORBIDDEN,
            "Downloads are disabled for this gallery",
        );
    }
    Json(json!({ "task_id": format!("task-{slug}"), "status": "pending" })).into_response()
}

async fn handle_export_status(Path(task_id): Path<String>) -> AxumResponse {
    match task_id.as_str() {
        "broken" => (
            StatusCode::INTERNAL_SERVER_ERROR,
            Json(json!({ "status": "error", "error": "disk full" })),
        )
            .into_response(),
        "gone" => error(StatusCode::NOT_FOUND, "Task not found"),
        "garbage" => "definitely not json".into_response(),
        _ => Json(json!({ "status": "ready", "filename": "trip.zip" })).into_response(),
    }
}

async fn handle_export_file(Path(task_id): Path<String>) -> AxumResponse {
    if task_id == "gone" {
        return error(StatusCode::NOT_FOUND, "File not found");
    }
    Bytes::from_static(b"PK\x03\x04archive").into_response()
}

async fn handle_gallery(Path(slug): Path<String>) -> AxumResponse {
    if slug != "trip" {
        return error(StatusCode::NOT_FOUND, "Gallery not found");
    }
    Json(json!({
        "id": 1,
        "name": "Trip",
        "slug": "trip",
        "is_public": true,
        "allow_download": true,
        "thumbnail_only": false,
        "image_count": 2,
        "images": [
            { "id": 10, "filename": "a.jpg", "width": 100, "height": 80, "order": 0 },
            { "id": 11, "filename": "b.jpg", "width": 100, "height": 80, "order": 1 }
        ]
    }))
    .into_response()
}

async fn handle_galleries() -> AxumResponse {
    Json(json!([
        { "id": 1, "name": "Trip", "slug": "trip", "image_count": 2, "hover_animation": "flip" },
        { "id": 2, "name": "Home", "slug": "home", "image_count": 0, "hover_animation": null }
    ]))
    .into_response()
}

async fn spawn_gallery_server() -> (String, ServerState) {
    std::env::set_var("NO_PROXY", "127.0.0.1,localhost");
    let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
    let addr = listener.local_addr().expect("addr");
    let state = ServerState::default();
    let app = Router::new()
        .route("/api/admin/galleries/:gallery_id/images", post(handle_upload))
        .route("/api/admin/images/:image_id", delete(handle_delete))
        .route("/api/galleries", get(handle_galleries))
        .route("/api/galleries/:slug", get(handle_gallery))
        .route("/api/galleries/:slug/download", post(handle_request_export))
        .route("/api/downloads/:task_id/status", get(handle_export_status))
        .route("/api/downloads/:task_id/file", get(handle_export_file))
        .with_state(state.clone());
    tokio::spawn(async move {
        let _ = axum::serve(listener, app).await;
    });
    (format!("http://{addr}"), state)
}

fn client(server_url: &str) -> HttpGalleryApi {
    HttpGalleryApi::new(Endpoints::new(server_url, "/api").expect("endpoints"))
}

#[test]
fn endpoints_follow_the_server_routes() {
    let endpoints = Endpoints::new("http://photos.local:5000", "/api").expect("endpoints");
    assert_eq!(
        endpoints.upload_image(GalleryId(4)).expect("url").as_str(),
        "http://photos.local:5000/api/admin/galleries/4/images"
    );
    assert_eq!(
        endpoints.delete_image(ImageId(9)).expect("url").as_str(),
        "http://photos.local:5000/api/admin/images/9"
    );
    assert_eq!(
        endpoints.request_export("trip").expect("url").as_str(),
        "http://photos.local:5000/api/galleries/trip/download"
    );
    let task = TaskId("0b7c-11".into());
    assert_eq!(
        endpoints.export_status(&task).expect("url").as_str(),
        "http://photos.local:5000/api/downloads/0b7c-11/status"
    );
    assert_eq!(
        endpoints.export_file(&task).expect("url").as_str(),
        "http://photos.local:5000/api/downloads/0b7c-11/file"
    );
    assert_eq!(
        endpoints.thumbnail(GalleryId(1), ImageId(2)).expect("url").as_str(),
        "http://photos.local:5000/images/thumbnails/1/2?size=medium"
    );
}

#[test]
fn endpoints_keep_a_base_path_and_encode_segments() {
    let endpoints = Endpoints::new("https://example.com/gallery/", "api/").expect("endpoints");
    assert_eq!(
        endpoints.gallery("a b/c").expect("url").as_str(),
        "https://example.com/gallery/api/galleries/a%20b%2Fc"
    );
    assert_eq!(
        endpoints.galleries().expect("url").as_str(),
        "https://example.com/gallery/api/galleries"
    );
}

#[test]
fn endpoints_reject_unusable_server_urls() {
    assert!(matches!(
        Endpoints::new("mailto:admin@example.com", "/api"),
        Err(ClientError::InvalidUrl(_))
    ));
    assert!(matches!(
        Endpoints::new("not a url", "/api"),
        Err(ClientError::InvalidUrl(_))
    ));
}

#[tokio::test]
async fn upload_streams_multipart_file_and_reports_progress() {
    let (server_url, state) = spawn_gallery_server().await;
    let api = client(&server_url).with_upload_chunk_size(4);
    let (reporter, mut progress_rx) = ProgressReporter::channel();

    let file = FileRef::new("beach.jpg", Some("image/jpeg".into()), b"0123456789".to_vec());
    let uploaded = api
        .upload_image(GalleryId(4), file, reporter)
        .await
        .expect("upload");
    assert_eq!(uploaded.id, ImageId(31));
    assert_eq!(uploaded.original_filename.as_deref(), Some("beach.jpg"));

    let received = state.uploads.lock().await.clone();
    assert_eq!(received.len(), 1);
    assert_eq!(received[0].gallery_id, 4);
    assert_eq!(received[0].field, "file");
    assert_eq!(received[0].file_name.as_deref(), Some("beach.jpg"));
    assert_eq!(received[0].content_type.as_deref(), Some("image/jpeg"));
    assert_eq!(received[0].bytes, 10);

    let mut loaded = Vec::new();
    while let Ok(progress) = progress_rx.try_recv() {
        assert_eq!(progress.total, 10);
        loaded.push(progress.loaded);
    }
    assert_eq!(loaded, [0, 4, 8, 10]);
}

#[tokio::test]
async fn rejected_upload_carries_the_server_message() {
    let (server_url, _state) = spawn_gallery_server().await;
    let api = client(&server_url);

    let file = FileRef::new("notes.txt", Some("text/plain".into()), b"hello".to_vec());
    let err = api
        .upload_image(GalleryId(4), file, ProgressReporter::noop())
        .await
        .expect_err("must fail");
    assert_eq!(err.status(), Some(400));
    assert_eq!(err.server_message(), Some("Invalid file type"));
}

#[tokio::test]
async fn delete_image_maps_missing_images_to_server_errors() {
    let (server_url, _state) = spawn_gallery_server().await;
    let api = client(&server_url);

    api.delete_image(ImageId(7)).await.expect("delete");
    let err = api.delete_image(ImageId(404)).await.expect_err("must fail");
    assert_eq!(err.status(), Some(404));
    assert_eq!(err.server_message(), Some("Image not found"));
}

#[tokio::test]
async fn export_request_and_status_round_trip() {
    let (server_url, _state) = spawn_gallery_server().await;
    let api = client(&server_url);

    let accepted = api.request_export("trip").await.expect("request");
    assert_eq!(accepted.task_id, TaskId("task-trip".into()));

    let status = api.export_status(&accepted.task_id).await.expect("status");
    assert_eq!(status.status, "ready");
    assert_eq!(status.filename.as_deref(), Some("trip.zip"));

    let archive = api.download_export(&accepted.task_id).await.expect("file");
    assert_eq!(archive, b"PK\x03\x04archive");

    let err = api.request_export("locked").await.expect_err("must fail");
    assert_eq!(err.status(), Some(403));
    assert_eq!(
        err.server_message(),
        Some("Downloads are disabled for this gallery")
    );
}

#[tokio::test]
async fn failed_export_status_body_is_read_despite_http_500() {
    let (server_url, _state) = spawn_gallery_server().await;
    let api = client(&server_url);

    let status = api
        .export_status(&TaskId("broken".into()))
        .await
        .expect("status body");
    assert_eq!(status.status, "error");
    assert_eq!(status.error.as_deref(), Some("disk full"));

    let err = api
        .export_status(&TaskId("gone".into()))
        .await
        .expect_err("must fail");
    assert_eq!(err.status(), Some(404));
    assert_eq!(err.server_message(), Some("Task not found"));

    let err = api
        .export_status(&TaskId("garbage".into()))
        .await
        .expect_err("must fail");
    assert!(matches!(err, ClientError::Decode(_)));
}

#[tokio::test]
async fn gallery_listing_and_detail_decode() {
    let (server_url, _state) = spawn_gallery_server().await;
    let api = client(&server_url);

    let galleries = api.list_public_galleries().await.expect("list");
    assert_eq!(galleries.len(), 2);
    assert_eq!(galleries[0].animation_style(), AnimationStyle::Flip);
    assert_eq!(galleries[1].animation_style(), AnimationStyle::Crossfade);

    let detail = api.gallery_by_slug("trip").await.expect("detail");
    let ids: Vec<ImageId> = detail.images.iter().map(|image| image.id).collect();
    assert_eq!(ids, [ImageId(10), ImageId(11)]);

    let err = api.gallery_by_slug("missing").await.expect_err("must fail");
    assert_eq!(err.server_message(), Some("Gallery not found"));
}

#[tokio::test]
async fn unreachable_server_is_a_transport_error() {
    std::env::set_var("NO_PROXY", "127.0.0.1,localhost");
    let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
    let addr = listener.local_addr().expect("addr");
    drop(listener);

    let api = client(&format!("http://{addr}"));
    let err = api.request_export("trip").await.expect_err("must fail");
    assert!(matches!(err, ClientError::Transport(_)), "unexpected: {err:?}");
    assert_eq!(err.server_message(), None);
}

#[test]
fn settings_build_a_client_for_the_configured_server() {
    let settings = ClientSettings {
        server_url: "http://10.0.0.2:8080".into(),
        api_prefix: "/v2".into(),
        ..ClientSettings::default()
    };
    let api = HttpGalleryApi::from_settings(&settings).expect("client");
    assert_eq!(
        api.export_file_url(&TaskId("t".into())).expect("url").as_str(),
        "http://10.0.0.2:8080/v2/downloads/t/file"
    );
}
