//! Hover-triggered preview animation for a gallery card.

use std::{
    ops::ControlFlow,
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    },
    time::Duration,
};

use shared::{
    domain::{AnimationStyle, GalleryId, ImageId},
    protocol::{GallerySummary, ImageSummary},
};
use tokio::sync::{broadcast, Mutex, OnceCell};
use tracing::{debug, warn};

use crate::{
    api::GalleryApi,
    timer::{TaskTimer, TimerHandle},
};

pub const CROSSFADE_INTERVAL: Duration = Duration::from_millis(2000);
pub const FLIP_INTERVAL: Duration = Duration::from_millis(400);
pub const GLITCH_INTERVAL: Duration = Duration::from_millis(1500);
pub const GLITCH_PULSE: Duration = Duration::from_millis(200);

const GLITCH_OFFSET_PX: i32 = 6;
const GLITCH_HUE_SHIFT_DEG: i32 = 120;
const GLITCH_GHOST_OPACITY: f32 = 0.7;

pub fn cycle_interval(style: AnimationStyle) -> Duration {
    match style {
        AnimationStyle::Crossfade => CROSSFADE_INTERVAL,
        AnimationStyle::Flip => FLIP_INTERVAL,
        AnimationStyle::Glitch => GLITCH_INTERVAL,
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CarouselGallery {
    pub id: GalleryId,
    pub slug: String,
    pub style: AnimationStyle,
}

impl From<&GallerySummary> for CarouselGallery {
    fn from(summary: &GallerySummary) -> Self {
        Self {
            id: summary.id,
            slug: summary.slug.clone(),
            style: summary.animation_style(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct CarouselSnapshot {
    pub current_index: usize,
    pub hovered: bool,
    pub glitch_pulse: bool,
    pub animating: bool,
}

#[derive(Debug, Clone)]
pub enum CarouselEvent {
    FrameChanged(CarouselSnapshot),
}

pub struct CarouselAnimator {
    shared: Arc<CarouselShared>,
}

struct CarouselShared {
    api: Arc<dyn GalleryApi>,
    gallery: CarouselGallery,
    timer: TaskTimer,
    images: OnceCell<Arc<[ImageSummary]>>,
    state: Mutex<CarouselState>,
    events: broadcast::Sender<CarouselEvent>,
    disposed: AtomicBool,
}

#[derive(Default)]
struct CarouselState {
    hovered: bool,
    /// Bumped on every hover transition so a slow fetch cannot start an
    /// animation for a hover that already ended.
    hover_epoch: u64,
    current_index: usize,
    glitch_pulse: bool,
    cycle_timer: Option<TimerHandle>,
    glitch_timer: Option<TimerHandle>,
}

impl CarouselAnimator {
    pub fn new(api: Arc<dyn GalleryApi>, gallery: CarouselGallery) -> Self {
        let (events, _) = broadcast::channel(256);
        Self {
            shared: Arc::new(CarouselShared {
                api,
                gallery,
                timer: TaskTimer::new(),
                images: OnceCell::new(),
                state: Mutex::new(CarouselState::default()),
                events,
                disposed: AtomicBool::new(false),
            }),
        }
    }

    pub fn gallery(&self) -> &CarouselGallery {
        &self.shared.gallery
    }

    pub async fn on_hover_start(&self) {
        let shared = &self.shared;
        if shared.is_disposed() {
            return;
        }

        let epoch = {
            let mut state = shared.state.lock().await;
            state.hovered = true;
            state.hover_epoch += 1;
            shared.emit_frame(&state);
            state.hover_epoch
        };

        let images = shared.images().await;

        let mut state = shared.state.lock().await;
        if shared.is_disposed() || !state.hovered || state.hover_epoch != epoch {
            return;
        }
        if images.len() < 2 {
            debug!(slug = %shared.gallery.slug, count = images.len(), "not enough images to animate");
            return;
        }
        if state
            .cycle_timer
            .is_some_and(|handle| shared.timer.is_active(handle))
        {
            return;
        }
        shared.start_cycle(&mut state, images.len());
        shared.emit_frame(&state);
    }

    pub async fn on_hover_end(&self) {
        let shared = &self.shared;
        let mut state = shared.state.lock().await;
        state.hovered = false;
        state.hover_epoch += 1;
        if let Some(handle) = state.cycle_timer.take() {
            shared.timer.cancel(handle);
        }
        if let Some(handle) = state.glitch_timer.take() {
            shared.timer.cancel(handle);
        }
        state.current_index = 0;
        state.glitch_pulse = false;
        shared.emit_frame(&state);
    }

    pub async fn snapshot(&self) -> CarouselSnapshot {
        let state = self.shared.state.lock().await;
        self.shared.snapshot_of(&state)
    }

    pub fn images(&self) -> Vec<ImageSummary> {
        self.shared
            .images
            .get()
            .map(|images| images.to_vec())
            .unwrap_or_default()
    }

    pub fn subscribe(&self) -> broadcast::Receiver<CarouselEvent> {
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
        debug!(slug = %self.shared.gallery.slug, "carousel disposed");
    }
}

impl Drop for CarouselAnimator {
    fn drop(&mut self) {
        self.dispose();
    }
}

impl CarouselShared {
    fn is_disposed(&self) -> bool {
        self.disposed.load(Ordering::Acquire)
    }

    fn snapshot_of(&self, state: &CarouselState) -> CarouselSnapshot {
        CarouselSnapshot {
            current_index: state.current_index,
            hovered: state.hovered,
            glitch_pulse: state.glitch_pulse,
            animating: state
                .cycle_timer
                .is_some_and(|handle| self.timer.is_active(handle)),
        }
    }

    fn emit_frame(&self, state: &CarouselState) {
        let _ = self
            .events
            .send(CarouselEvent::FrameChanged(self.snapshot_of(state)));
    }

    /// Fetches at most once per instance; concurrent callers share the
    /// in-flight request. Failures degrade to an empty list.
    async fn images(&self) -> Arc<[ImageSummary]> {
        let images = self
            .images
            .get_or_init(|| async {
                match self.api.gallery_by_slug(&self.gallery.slug).await {
                    Ok(detail) => {
                        debug!(slug = %self.gallery.slug, count = detail.images.len(), "carousel images loaded");
                        Arc::<[ImageSummary]>::from(detail.images)
                    }
                    Err(err) => {
                        warn!(slug = %self.gallery.slug, "carousel image fetch failed: {err}");
                        Arc::<[ImageSummary]>::from(Vec::new())
                    }
                }
            })
            .await;
        Arc::clone(images)
    }

    fn start_cycle(self: &Arc<Self>, state: &mut CarouselState, image_count: usize) {
        if let Some(previous) = state.cycle_timer.take() {
            self.timer.cancel(previous);
        }
        let shared = Arc::clone(self);
        let handle = self
            .timer
            .schedule(cycle_interval(self.gallery.style), move || {
                let shared = Arc::clone(&shared);
                async move { shared.advance(image_count).await }
            });
        state.cycle_timer = Some(handle);
    }

    async fn advance(self: &Arc<Self>, image_count: usize) -> ControlFlow<()> {
        let mut state = self.state.lock().await;
        if self.is_disposed() || !state.hovered {
            return ControlFlow::Break(());
        }
        state.current_index = (state.current_index + 1) % image_count;

        if self.gallery.style == AnimationStyle::Glitch {
            state.glitch_pulse = true;
            if let Some(previous) = state.glitch_timer.take() {
                self.timer.cancel(previous);
            }
            let shared = Arc::clone(self);
            state.glitch_timer = Some(self.timer.after(GLITCH_PULSE, move || async move {
                let mut state = shared.state.lock().await;
                state.glitch_timer = None;
                if state.glitch_pulse {
                    state.glitch_pulse = false;
                    shared.emit_frame(&state);
                }
            }));
        }

        self.emit_frame(&state);
        ControlFlow::Continue(())
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct FrameLayer {
    pub image_id: ImageId,
    pub opacity: f32,
    pub offset_x: i32,
    pub hue_shift_deg: i32,
}

impl FrameLayer {
    fn plain(image_id: ImageId, opacity: f32) -> Self {
        Self {
            image_id,
            opacity,
            offset_x: 0,
            hue_shift_deg: 0,
        }
    }
}

/// Layers to composite for `snapshot`. Empty means the view shows the
/// gallery's cover instead.
pub fn render_layers(
    style: AnimationStyle,
    snapshot: &CarouselSnapshot,
    images: &[ImageSummary],
) -> Vec<FrameLayer> {
    if !snapshot.hovered || images.is_empty() {
        return Vec::new();
    }
    let index = snapshot.current_index.min(images.len() - 1);
    let current = images[index].id;

    match style {
        AnimationStyle::Crossfade => images
            .iter()
            .enumerate()
            .map(|(i, image)| FrameLayer::plain(image.id, if i == index { 1.0 } else { 0.0 }))
            .collect(),
        AnimationStyle::Flip => vec![FrameLayer::plain(current, 1.0)],
        AnimationStyle::Glitch => {
            let mut layers = vec![FrameLayer::plain(current, 1.0)];
            if snapshot.glitch_pulse {
                layers.push(FrameLayer {
                    image_id: current,
                    opacity: GLITCH_GHOST_OPACITY,
                    offset_x: GLITCH_OFFSET_PX,
                    hue_shift_deg: GLITCH_HUE_SHIFT_DEG,
                });
                layers.push(FrameLayer {
                    image_id: current,
                    opacity: GLITCH_GHOST_OPACITY,
                    offset_x: -GLITCH_OFFSET_PX,
                    hue_shift_deg: -GLITCH_HUE_SHIFT_DEG,
                });
            }
            layers
        }
    }
}

#[cfg(test)]
#[path = "tests/carousel_tests.rs"]
mod tests;
