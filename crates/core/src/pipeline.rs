//! Page render pipeline.
//!
//! Turns page numbers into cached PNG rasters behind revocable object URLs.
//!
//! - Every render draws on the single [`SurfaceSlot`]. Draws run one at a
//!   time in the order `ensure_rendered` was called: each call takes a turn
//!   at the tail of a queue and its draw starts only after the previous
//!   turn ends, whichever worker thread the task lands on.
//! - Render state lives in a copy-on-write map. An entry is never modified;
//!   completing a render installs a new entry carrying the object URL.
//! - Scale, device pixel ratio and rotation changes release every issued
//!   URL, bump the generation and clear the map. A task that finishes under
//!   an older generation publishes nothing.
//! - Failed renders are removed from the map so they can be retried. A
//!   page proxy that panics counts as a failed render.

use crate::config::{validate_positive, RenderConfig};
use crate::document::{check_page_number, DocumentProxy, RenderViewport};
use crate::error::{Result, ViewerError};
use crate::geometry::Rotation;
use crate::object_url::{EncodedImage, ObjectUrl, ObjectUrlRegistry};
use crate::surface::SurfaceSlot;
use futures::future::{self, BoxFuture, FutureExt, Shared};
use parking_lot::Mutex;
use std::any::Any;
use std::collections::{BTreeSet, HashMap, HashSet};
use std::panic::AssertUnwindSafe;
use std::sync::{Arc, Weak};
use std::time::Instant;
use tokio::sync::oneshot;
use tracing::{debug, info, warn};

/// Result of a render task. `Ok(None)` means the result was discarded
/// because the generation changed while the task ran.
pub type RenderOutcome = Result<Option<RenderedPage>>;

/// A render task, shareable by every caller asking for the same page.
pub type RenderTask = Shared<BoxFuture<'static, RenderOutcome>>;

/// A published raster.
#[derive(Debug, Clone, PartialEq)]
pub struct RenderedPage {
    pub page_number: u32,
    pub generation: u64,
    pub object_url: ObjectUrl,
    pub width: u32,
    pub height: u32,
}

/// Render state of one page. Immutable once created.
pub struct RenderState {
    page_number: u32,
    generation: u64,
    task: RenderTask,
    object_url: Option<ObjectUrl>,
}

impl std::fmt::Debug for RenderState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RenderState")
            .field("page_number", &self.page_number)
            .field("generation", &self.generation)
            .field("object_url", &self.object_url)
            .finish()
    }
}

impl RenderState {
    pub fn page_number(&self) -> u32 {
        self.page_number
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    /// The in-flight or completed task.
    pub fn task(&self) -> RenderTask {
        self.task.clone()
    }

    /// Set only once the raster exists and is safe to display.
    pub fn object_url(&self) -> Option<&ObjectUrl> {
        self.object_url.as_ref()
    }

    pub fn is_ready(&self) -> bool {
        self.object_url.is_some()
    }
}

/// Published render-state map.
pub type RenderStates = Arc<HashMap<u32, Arc<RenderState>>>;

/// Diagnostics snapshot.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PipelineStats {
    pub generation: u64,
    /// Pages with render state (in flight or ready).
    pub scheduled: usize,
    /// Pages with a published raster.
    pub ready: usize,
    /// Object URLs not yet released.
    pub live_images: usize,
}

/// Work order for a set of visible pages: the visible pages, then one
/// neighbor beyond the lowest and highest visible page, then every
/// remaining page ascending. Each page appears once.
pub fn priority_order(visible: &BTreeSet<u32>, page_count: u32) -> Vec<u32> {
    let in_range = |page: &u32| (1..=page_count).contains(page);
    let visible: Vec<u32> = visible.iter().copied().filter(in_range).collect();

    let mut neighbors = Vec::with_capacity(2);
    if let (Some(&lowest), Some(&highest)) = (visible.first(), visible.last()) {
        neighbors.push(lowest.saturating_sub(1));
        neighbors.push(highest.saturating_add(1));
    }

    let mut seen = HashSet::with_capacity(page_count as usize);
    visible
        .into_iter()
        .chain(neighbors.into_iter().filter(in_range))
        .chain(1..=page_count)
        .filter(|page| seen.insert(*page))
        .collect()
}

#[derive(Debug, Clone, Copy)]
struct RenderParams {
    scale: f64,
    device_pixel_ratio: f64,
    rotation: Rotation,
}

/// Resolves once the most recently queued render has finished.
type QueueTail = Shared<BoxFuture<'static, ()>>;

fn idle_queue() -> QueueTail {
    future::ready(()).boxed().shared()
}

/// A render's place in the draw queue.
///
/// The successor is released when this value is dropped, including on
/// panic or cancellation.
struct QueueTurn {
    previous: Option<QueueTail>,
    _done: oneshot::Sender<()>,
}

impl QueueTurn {
    /// Wait until every earlier render has finished.
    async fn wait(&mut self) {
        if let Some(previous) = self.previous.take() {
            previous.await;
        }
    }

    /// End the turn. Never hands over before the previous turn ended.
    async fn finish(mut self) {
        self.wait().await;
    }
}

struct PipelineState {
    generation: u64,
    params: RenderParams,
    states: RenderStates,
    queue_tail: QueueTail,
}

impl PipelineState {
    /// Append a turn to the draw queue.
    fn take_turn(&mut self) -> QueueTurn {
        let (done, finished) = oneshot::channel::<()>();
        let tail = finished.map(|_| ()).boxed().shared();
        QueueTurn {
            previous: Some(std::mem::replace(&mut self.queue_tail, tail)),
            _done: done,
        }
    }

    fn install(&mut self, page_number: u32, state: Arc<RenderState>) {
        let mut next = (*self.states).clone();
        next.insert(page_number, state);
        self.states = Arc::new(next);
    }

    fn remove(&mut self, page_number: u32) {
        let mut next = (*self.states).clone();
        next.remove(&page_number);
        self.states = Arc::new(next);
    }
}

struct PipelineInner<D: ?Sized> {
    document: Arc<D>,
    surface: SurfaceSlot,
    urls: ObjectUrlRegistry,
    config: RenderConfig,
    state: Mutex<PipelineState>,
}

impl<D: DocumentProxy + ?Sized> PipelineInner<D> {
    fn is_current(&self, generation: u64) -> bool {
        self.state.lock().generation == generation
    }

    /// Release every issued URL, bump the generation and start empty.
    fn invalidate(&self, state: &mut PipelineState, reason: &str) {
        let mut released = 0;
        for render_state in state.states.values() {
            if let Some(url) = &render_state.object_url {
                if self.urls.revoke(url) {
                    released += 1;
                }
            }
        }
        state.generation += 1;
        state.states = Arc::new(HashMap::new());
        // Stale tasks bail out at their turn; new work need not wait for them.
        state.queue_tail = idle_queue();
        info!(
            "Render cache invalidated ({}): generation {}, {} images released",
            reason, state.generation, released
        );
    }

    async fn render(
        self: Arc<Self>,
        page_number: u32,
        generation: u64,
        params: RenderParams,
        mut turn: QueueTurn,
    ) -> RenderOutcome {
        let start = Instant::now();
        let work = self.draw_and_publish(page_number, generation, params, &mut turn);
        let outcome = AssertUnwindSafe(work)
            .catch_unwind()
            .await
            .unwrap_or_else(|payload| {
                Err(ViewerError::RenderFailed {
                    page: page_number,
                    message: format!("page proxy panicked: {}", panic_message(&*payload)),
                })
            });
        match &outcome {
            Ok(Some(page)) => debug!(
                "Rendered page {} ({}x{}) in {:?}",
                page_number,
                page.width,
                page.height,
                start.elapsed()
            ),
            Ok(None) => debug!(
                "Discarded page {} render from generation {}",
                page_number, generation
            ),
            Err(e) => {
                warn!("Rendering page {} failed: {}", page_number, e);
                self.forget(page_number, generation);
            }
        }
        turn.finish().await;
        outcome
    }

    async fn draw_and_publish(
        &self,
        page_number: u32,
        generation: u64,
        params: RenderParams,
        turn: &mut QueueTurn,
    ) -> RenderOutcome {
        let page = self.document.page(page_number).await?;
        turn.wait().await;
        if !self.is_current(generation) {
            return Ok(None);
        }

        let scale = params.scale * params.device_pixel_ratio * self.config.render_boost_factor;
        let viewport = RenderViewport::for_page_within(
            &page.size(),
            params.rotation,
            scale,
            self.config.max_raster_pixels,
        );
        if viewport.scale < scale {
            debug!(
                "Page {} capped at scale {:.3} ({}x{}) instead of {:.3}",
                page_number, viewport.scale, viewport.width, viewport.height, scale
            );
        }

        let image = {
            let mut surface = self.surface.acquire().await;
            if !self.is_current(generation) {
                return Ok(None);
            }
            surface.reset(viewport.width, viewport.height);
            page.render(&mut *surface, viewport)
                .await
                .map_err(|e| match e {
                    ViewerError::RenderFailed { .. } => e,
                    other => ViewerError::RenderFailed {
                        page: page_number,
                        message: other.to_string(),
                    },
                })?;
            let data = surface.encode_png(&self.config)?;
            if !self.config.yield_delay.is_zero() {
                tokio::time::sleep(self.config.yield_delay).await;
            }
            EncodedImage::png(viewport.width, viewport.height, data)
        };

        Ok(self.publish(page_number, generation, image))
    }

    /// Install the finished raster, unless the work went stale meanwhile.
    fn publish(&self, page_number: u32, generation: u64, image: EncodedImage) -> Option<RenderedPage> {
        let mut state = self.state.lock();
        if state.generation != generation {
            return None;
        }
        let task = state
            .states
            .get(&page_number)
            .filter(|existing| existing.generation == generation)?
            .task();

        let (width, height) = (image.width, image.height);
        let url = self.urls.create(image);
        state.install(
            page_number,
            Arc::new(RenderState {
                page_number,
                generation,
                task,
                object_url: Some(url.clone()),
            }),
        );
        Some(RenderedPage {
            page_number,
            generation,
            object_url: url,
            width,
            height,
        })
    }

    /// Drop a failed entry so a later request starts over.
    fn forget(&self, page_number: u32, generation: u64) {
        let mut state = self.state.lock();
        let failed = state
            .states
            .get(&page_number)
            .is_some_and(|s| s.generation == generation && s.object_url.is_none());
        if state.generation == generation && failed {
            state.remove(page_number);
        }
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        message.to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic".to_string()
    }
}

/// Schedules page renders and owns their rasters.
///
/// Cloning yields another handle to the same pipeline. Rendering spawns
/// onto the current Tokio runtime.
pub struct PageRenderPipeline<D: ?Sized> {
    inner: Arc<PipelineInner<D>>,
}

impl<D: ?Sized> Clone for PageRenderPipeline<D> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<D: DocumentProxy + ?Sized> PageRenderPipeline<D> {
    /// Create a pipeline drawing on `surface`.
    pub fn new(
        document: Arc<D>,
        surface: SurfaceSlot,
        config: RenderConfig,
        scale: f64,
        device_pixel_ratio: f64,
    ) -> Result<Self> {
        config.validate()?;
        validate_positive("scale", scale)?;
        validate_positive("device_pixel_ratio", device_pixel_ratio)?;
        Ok(Self {
            inner: Arc::new(PipelineInner {
                document,
                surface,
                urls: ObjectUrlRegistry::new(),
                config,
                state: Mutex::new(PipelineState {
                    generation: 0,
                    params: RenderParams {
                        scale,
                        device_pixel_ratio,
                        rotation: Rotation::Deg0,
                    },
                    states: Arc::new(HashMap::new()),
                    queue_tail: idle_queue(),
                }),
            }),
        })
    }

    /// Return the page's render state, starting a render if it has none.
    ///
    /// Calling again before the render finishes returns the same state.
    /// New renders draw in the order of the calls that started them.
    pub fn ensure_rendered(&self, page_number: u32) -> Result<Arc<RenderState>> {
        check_page_number(page_number, self.inner.document.page_count())?;

        let mut state = self.inner.state.lock();
        if let Some(existing) = state.states.get(&page_number) {
            return Ok(Arc::clone(existing));
        }

        let runtime = tokio::runtime::Handle::try_current()
            .map_err(|e| ViewerError::TaskAborted(e.to_string()))?;
        let generation = state.generation;
        let params = state.params;
        let turn = state.take_turn();
        let work = Arc::clone(&self.inner).render(page_number, generation, params, turn);
        let handle = runtime.spawn(work);
        let weak: Weak<PipelineInner<D>> = Arc::downgrade(&self.inner);
        let task: RenderTask = async move {
            match handle.await {
                Ok(outcome) => outcome,
                Err(e) => {
                    if let Some(inner) = weak.upgrade() {
                        inner.forget(page_number, generation);
                    }
                    Err(ViewerError::from(e))
                }
            }
        }
        .boxed()
        .shared();

        let render_state = Arc::new(RenderState {
            page_number,
            generation,
            task,
            object_url: None,
        });
        state.install(page_number, Arc::clone(&render_state));
        debug!("Scheduled page {} (generation {})", page_number, generation);
        Ok(render_state)
    }

    /// Enqueue every page without render state, in priority order for the
    /// given visible set. Returns the pages enqueued by this call.
    pub fn schedule(&self, visible: &BTreeSet<u32>) -> Result<Vec<u32>> {
        let states = self.states();
        let pending: Vec<u32> = priority_order(visible, self.inner.document.page_count())
            .into_iter()
            .filter(|page| !states.contains_key(page))
            .collect();
        for page in &pending {
            self.ensure_rendered(*page)?;
        }
        if !pending.is_empty() {
            debug!("Enqueued {} pages for {:?}", pending.len(), visible);
        }
        Ok(pending)
    }

    /// Render a page and wait for it.
    pub async fn render(&self, page_number: u32) -> RenderOutcome {
        self.ensure_rendered(page_number)?.task().await
    }

    /// Current render-state map.
    pub fn states(&self) -> RenderStates {
        Arc::clone(&self.inner.state.lock().states)
    }

    /// The page's raster, if one is published for the current generation.
    pub fn image(&self, page_number: u32) -> Option<EncodedImage> {
        let url = self
            .inner
            .state
            .lock()
            .states
            .get(&page_number)?
            .object_url
            .clone()?;
        self.inner.urls.get(&url)
    }

    /// Resolve an object URL issued by this pipeline.
    pub fn resolve_url(&self, url: &ObjectUrl) -> Option<EncodedImage> {
        self.inner.urls.get(url)
    }

    pub fn generation(&self) -> u64 {
        self.inner.state.lock().generation
    }

    pub fn scale(&self) -> f64 {
        self.inner.state.lock().params.scale
    }

    pub fn device_pixel_ratio(&self) -> f64 {
        self.inner.state.lock().params.device_pixel_ratio
    }

    pub fn rotation(&self) -> Rotation {
        self.inner.state.lock().params.rotation
    }

    /// Change the display scale. Returns whether the cache was invalidated.
    pub fn set_scale(&self, scale: f64) -> Result<bool> {
        validate_positive("scale", scale)?;
        let mut state = self.inner.state.lock();
        if state.params.scale == scale {
            return Ok(false);
        }
        state.params.scale = scale;
        self.inner.invalidate(&mut state, "scale");
        Ok(true)
    }

    /// Change the device pixel ratio. Returns whether the cache was invalidated.
    pub fn set_device_pixel_ratio(&self, ratio: f64) -> Result<bool> {
        validate_positive("device_pixel_ratio", ratio)?;
        let mut state = self.inner.state.lock();
        if state.params.device_pixel_ratio == ratio {
            return Ok(false);
        }
        state.params.device_pixel_ratio = ratio;
        self.inner.invalidate(&mut state, "device pixel ratio");
        Ok(true)
    }

    /// Change the rotation rasters are drawn with. Returns whether the
    /// cache was invalidated.
    pub fn set_rotation(&self, rotation: Rotation) -> bool {
        let mut state = self.inner.state.lock();
        if state.params.rotation == rotation {
            return false;
        }
        state.params.rotation = rotation;
        self.inner.invalidate(&mut state, "rotation");
        true
    }

    /// Release everything, as on document unload.
    pub fn clear(&self) {
        let mut state = self.inner.state.lock();
        self.inner.invalidate(&mut state, "unload");
    }

    pub fn stats(&self) -> PipelineStats {
        let state = self.inner.state.lock();
        PipelineStats {
            generation: state.generation,
            scheduled: state.states.len(),
            ready: state.states.values().filter(|s| s.is_ready()).count(),
            live_images: self.inner.urls.live_count(),
        }
    }

    /// Total object URLs created and released so far.
    pub fn url_counts(&self) -> (usize, usize) {
        (self.inner.urls.created_count(), self.inner.urls.revoked_count())
    }
}
