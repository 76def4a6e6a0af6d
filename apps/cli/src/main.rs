use std::{
    path::{Path, PathBuf},
    sync::Arc,
    time::Duration,
};

use anyhow::{anyhow, bail, Context, Result};
use clap::{Parser, Subcommand};
use client_core::{
    config::{load_settings_from, DEFAULT_SETTINGS_FILE},
    render_layers, CarouselAnimator, CarouselEvent, CarouselGallery, ClientSettings, ExportEvent,
    ExportPollerConfig, ExportStatus, ExportTaskPoller, FileRef, GalleryApi, HttpGalleryApi,
    UploadEvent, UploadQueueConfig, UploadQueueController, UploadStatus,
};
use shared::domain::{AnimationStyle, GalleryId, ImageId};
use tokio::sync::broadcast::error::RecvError;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "gallery-cli", about = "Drive the gallery server from the terminal")]
struct Cli {
    /// Settings file; missing files are ignored.
    #[arg(long, default_value = DEFAULT_SETTINGS_FILE)]
    config: PathBuf,
    #[arg(long)]
    server_url: Option<String>,
    #[arg(long)]
    api_prefix: Option<String>,
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// List public galleries.
    Galleries,
    /// Upload image files into a gallery, all at once.
    Upload {
        #[arg(long)]
        gallery_id: i64,
        /// Bound the number of uploads in flight.
        #[arg(long)]
        max_concurrent: Option<usize>,
        #[arg(required = true)]
        files: Vec<PathBuf>,
    },
    DeleteImage {
        image_id: i64,
    },
    /// Request a zip archive of a gallery and download it when ready.
    Export {
        slug: String,
        #[arg(long)]
        out_dir: Option<PathBuf>,
        #[arg(long, default_value_t = 600)]
        timeout_secs: u64,
    },
    /// Print the hover preview frames of a gallery card.
    Preview {
        slug: String,
        #[arg(long)]
        style: Option<AnimationStyle>,
        #[arg(long, default_value_t = 5000)]
        hover_ms: u64,
    },
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();
    let cli = Cli::parse();

    let mut settings = load_settings_from(&cli.config, |key| std::env::var(key).ok());
    if let Some(server_url) = cli.server_url {
        settings.server_url = server_url;
    }
    if let Some(api_prefix) = cli.api_prefix {
        settings.api_prefix = api_prefix;
    }
    let http = Arc::new(
        HttpGalleryApi::from_settings(&settings)
            .with_context(|| format!("invalid server url {}", settings.server_url))?,
    );
    info!(server_url = %settings.server_url, "gallery client ready");

    match cli.command {
        Command::Galleries => list_galleries(http.as_ref()).await,
        Command::Upload {
            gallery_id,
            max_concurrent,
            files,
        } => {
            if max_concurrent.is_some() {
                settings.max_concurrent_uploads = max_concurrent.filter(|limit| *limit > 0);
            }
            upload(http, &settings, GalleryId(gallery_id), &files).await
        }
        Command::DeleteImage { image_id } => {
            http.delete_image(ImageId(image_id))
                .await
                .with_context(|| format!("failed to delete image {image_id}"))?;
            println!("deleted image_id={image_id}");
            Ok(())
        }
        Command::Export {
            slug,
            out_dir,
            timeout_secs,
        } => {
            let out_dir = out_dir.unwrap_or_else(|| settings.download_dir.clone());
            let deadline = Duration::from_secs(timeout_secs);
            tokio::time::timeout(deadline, export(http, &settings, &slug, &out_dir))
                .await
                .map_err(|_| anyhow!("export of {slug} timed out after {timeout_secs}s"))?
        }
        Command::Preview {
            slug,
            style,
            hover_ms,
        } => preview(http, &slug, style, Duration::from_millis(hover_ms)).await,
    }
}

async fn list_galleries(api: &HttpGalleryApi) -> Result<()> {
    let galleries = api
        .list_public_galleries()
        .await
        .context("failed to list galleries")?;
    if galleries.is_empty() {
        println!("no public galleries");
    }
    for gallery in galleries {
        println!(
            "{:>5}  {:<24} {:>4} images  hover={}  {}",
            gallery.id,
            gallery.slug,
            gallery.image_count,
            gallery.animation_style(),
            gallery.name
        );
    }
    Ok(())
}

async fn read_image(path: &Path) -> Result<FileRef> {
    let name = path
        .file_name()
        .and_then(|name| name.to_str())
        .unwrap_or("upload.bin")
        .to_string();
    let bytes = tokio::fs::read(path)
        .await
        .with_context(|| format!("failed to read {}", path.display()))?;
    let mime_type = mime_guess::from_path(path).first_raw().map(str::to_string);
    Ok(FileRef::new(name, mime_type, bytes))
}

async fn upload(
    http: Arc<HttpGalleryApi>,
    settings: &ClientSettings,
    gallery_id: GalleryId,
    paths: &[PathBuf],
) -> Result<()> {
    let mut files = Vec::with_capacity(paths.len());
    for path in paths {
        let file = read_image(path).await?;
        if file.is_image() {
            files.push(file);
        } else {
            warn!(file = %path.display(), "skipping non-image file");
        }
    }
    if files.is_empty() {
        bail!("no image files to upload");
    }

    let config = UploadQueueConfig::from(settings);
    let settle_grace = config.batch_debounce + Duration::from_secs(1);
    let queue = UploadQueueController::with_config(http, gallery_id, config);
    let mut events = queue.subscribe();
    let created = queue.enqueue(files).await;
    println!("uploading {} file(s) to gallery {}", created.len(), queue.gallery_id());

    loop {
        // Lagged receivers miss item updates, so settlement is read from the
        // queue itself.
        let summary = queue.summary().await;
        let event = if summary.is_settled() {
            if summary.completed == 0 {
                break;
            }
            match tokio::time::timeout(settle_grace, events.recv()).await {
                Ok(event) => event,
                Err(_) => break,
            }
        } else {
            events.recv().await
        };
        match event {
            Ok(UploadEvent::ItemUpdated(item)) => match item.status {
                UploadStatus::Queued => println!("queued     {}", item.file.name()),
                UploadStatus::Uploading => {
                    println!("uploading  {} {:>3}%", item.file.name(), item.progress)
                }
                UploadStatus::Completed => println!("completed  {}", item.file.name()),
                UploadStatus::Failed => println!(
                    "failed     {}: {}",
                    item.file.name(),
                    item.error_message.as_deref().unwrap_or_default()
                ),
            },
            Ok(UploadEvent::BatchChanged) => {
                println!("gallery contents changed");
                if queue.summary().await.is_settled() {
                    break;
                }
            }
            Ok(UploadEvent::ItemDismissed(_)) => {}
            Err(RecvError::Lagged(skipped)) => warn!(skipped, "upload events dropped"),
            Err(RecvError::Closed) => break,
        }
    }

    let summary = queue.summary().await;
    println!(
        "{} of {} uploads completed, {} failed",
        summary.completed, summary.total, summary.failed
    );
    if summary.failed > 0 {
        bail!("{} upload(s) failed", summary.failed);
    }
    Ok(())
}

async fn export(
    http: Arc<HttpGalleryApi>,
    settings: &ClientSettings,
    slug: &str,
    out_dir: &Path,
) -> Result<()> {
    let api: Arc<dyn GalleryApi> = http;
    let poller = ExportTaskPoller::with_config(Arc::clone(&api), ExportPollerConfig::from(settings));
    let mut events = poller.subscribe();
    poller.start(slug).await;

    loop {
        match events.recv().await {
            Ok(ExportEvent::StatusChanged(task)) => match task.status {
                ExportStatus::Requesting => println!("requesting archive of {slug}"),
                ExportStatus::Processing => println!("preparing archive..."),
                ExportStatus::Ready => println!("archive ready"),
                ExportStatus::Failed => bail!(
                    "export failed: {}",
                    task.error_message.as_deref().unwrap_or_default()
                ),
            },
            Ok(ExportEvent::DownloadReady { task_id, url }) => {
                println!("downloading {url}");
                let bytes = api
                    .download_export(&task_id)
                    .await
                    .with_context(|| format!("failed to download archive {task_id}"))?;
                tokio::fs::create_dir_all(out_dir)
                    .await
                    .with_context(|| format!("failed to create {}", out_dir.display()))?;
                let target = out_dir.join(format!("{slug}.zip"));
                tokio::fs::write(&target, &bytes)
                    .await
                    .with_context(|| format!("failed to write {}", target.display()))?;
                println!("saved {} ({} bytes)", target.display(), bytes.len());
                return Ok(());
            }
            Ok(ExportEvent::Cleared) => bail!("export of {slug} cleared before download"),
            Err(RecvError::Lagged(skipped)) => warn!(skipped, "export events dropped"),
            Err(RecvError::Closed) => bail!("export poller stopped"),
        }
    }
}

async fn preview(
    http: Arc<HttpGalleryApi>,
    slug: &str,
    style: Option<AnimationStyle>,
    hover: Duration,
) -> Result<()> {
    let galleries = http
        .list_public_galleries()
        .await
        .context("failed to list galleries")?;
    let mut gallery = galleries
        .iter()
        .find(|gallery| gallery.slug == slug)
        .map(CarouselGallery::from)
        .ok_or_else(|| anyhow!("no public gallery with slug {slug}"))?;
    if let Some(style) = style {
        gallery.style = style;
    }
    println!("hovering {} ({}) for {:?}", gallery.slug, gallery.style, hover);

    let animator = CarouselAnimator::new(http.clone(), gallery);
    let gallery = animator.gallery();
    let mut events = animator.subscribe();
    animator.on_hover_start().await;

    let hover_end = tokio::time::sleep(hover);
    tokio::pin!(hover_end);
    loop {
        tokio::select! {
            _ = &mut hover_end => break,
            event = events.recv() => match event {
                Ok(CarouselEvent::FrameChanged(snapshot)) => {
                    let images = animator.images();
                    let layers = render_layers(gallery.style, &snapshot, &images);
                    println!(
                        "frame index={} pulse={} layers={}",
                        snapshot.current_index,
                        snapshot.glitch_pulse,
                        layers.len()
                    );
                    for layer in layers.iter().filter(|layer| layer.opacity > 0.0) {
                        let thumbnail = http.endpoints().thumbnail(gallery.id, layer.image_id)?;
                        println!(
                            "  {thumbnail} opacity={:.1} dx={} hue={}",
                            layer.opacity, layer.offset_x, layer.hue_shift_deg
                        );
                    }
                }
                Err(RecvError::Lagged(skipped)) => warn!(skipped, "carousel frames dropped"),
                Err(RecvError::Closed) => break,
            },
        }
    }

    animator.on_hover_end().await;
    let snapshot = animator.snapshot().await;
    println!("hover ended at index={}", snapshot.current_index);
    Ok(())
}
