//! Viewer facade.
//!
//! Owns one loaded document and everything the viewport needs from it: page
//! geometry, rotation, the three visibility trackers, the scroll tracker,
//! the render pipeline and the resolved outline.

use crate::config::ViewerConfig;
use crate::document::{check_page_number, load_page_geometry, DocumentProxy, TextContent};
use crate::error::Result;
use crate::geometry::{
    page_height, page_top_offset, page_width, point_to_pixels, rotate_rect, unrotate_rect,
    PageGeometry, PageRect, Rotation, ScreenPoint,
};
use crate::intersection::ObservationHost;
use crate::object_url::EncodedImage;
use crate::outline::{load_outline, OutlineIndex};
use crate::pipeline::{PageRenderPipeline, PipelineStats, RenderOutcome, RenderState};
use crate::scroll::{ScrollDirectionTracker, ScrollRoot, ScrollState, ScrollUpdate};
use crate::surface::SurfaceSlot;
use crate::visibility::{
    most_visible_page, visible_pages, ObserverUpdate, ViewportObservers, VisibleSnapshot,
};
use std::collections::BTreeSet;
use std::sync::Arc;
use tracing::{debug, info};

/// An outline entry projected onto the current layout.
#[derive(Debug, Clone, PartialEq)]
pub struct NavigationTarget {
    pub page_number: u32,
    pub title: String,
    /// Anchor the surrounding UI gives the marker element (`data-anchor`).
    pub anchor: String,
    /// Absolute position in the stacked layout, in CSS pixels.
    pub point: ScreenPoint,
}

/// Anchor of the `index`th outline position on `page_number`.
pub fn target_anchor(page_number: u32, index: usize) -> String {
    format!("outline-{}-{}", page_number, index)
}

/// A loaded document in a viewport: layout, visibility, scrolling, rendering and outline.
pub struct Viewer<D: DocumentProxy + ?Sized> {
    document: Arc<D>,
    config: ViewerConfig,
    geometry: PageGeometry,
    rotation: Rotation,
    outline: OutlineIndex,
    pipeline: PageRenderPipeline<D>,
    observers: ViewportObservers,
    scroll: ScrollDirectionTracker,
    visible: VisibleSnapshot,
    targets: VisibleSnapshot,
    closed: bool,
}

impl<D: DocumentProxy + ?Sized> Viewer<D> {
    /// Open a document in a viewport provided by `host`.
    ///
    /// Fails without touching the document when the host has no
    /// observation primitive or the configured root is missing.
    pub async fn open(
        document: Arc<D>,
        host: &dyn ObservationHost,
        surface: SurfaceSlot,
        config: ViewerConfig,
    ) -> Result<Self> {
        config.validate()?;
        let observers = ViewportObservers::attach(host, &config.visibility)?;
        let scroll = ScrollDirectionTracker::attach(
            Some(ScrollRoot::Element(config.visibility.root_id.clone())),
            0.0,
            &config.scroll,
        )?;

        let geometry = load_page_geometry(document.as_ref()).await?;
        let outline = load_outline(document.as_ref()).await?;
        let pipeline = PageRenderPipeline::new(
            Arc::clone(&document),
            surface,
            config.render.clone(),
            config.initial_scale,
            config.device_pixel_ratio,
        )?;

        info!(
            "Opened document: {} pages, {}x{} px, {} outline pages",
            document.page_count(),
            geometry.width,
            geometry.height,
            outline.len()
        );

        Ok(Self {
            document,
            config,
            geometry,
            rotation: Rotation::Deg0,
            outline,
            pipeline,
            observers,
            scroll,
            visible: VisibleSnapshot::default(),
            targets: VisibleSnapshot::default(),
            closed: false,
        })
    }

    pub fn document(&self) -> &Arc<D> {
        &self.document
    }

    pub fn config(&self) -> &ViewerConfig {
        &self.config
    }

    pub fn page_count(&self) -> u32 {
        self.document.page_count()
    }

    // Geometry

    pub fn geometry(&self) -> PageGeometry {
        self.geometry
    }

    pub fn rotation(&self) -> Rotation {
        self.rotation
    }

    pub fn scale(&self) -> f64 {
        self.pipeline.scale()
    }

    pub fn device_pixel_ratio(&self) -> f64 {
        self.pipeline.device_pixel_ratio()
    }

    /// On-screen width of the page box.
    pub fn page_width(&self) -> f64 {
        page_width(&self.geometry, self.rotation, self.scale())
    }

    /// On-screen height of the page box.
    pub fn page_height(&self) -> f64 {
        page_height(&self.geometry, self.rotation, self.scale())
    }

    /// Scroll offset of a page's top edge.
    pub fn page_top(&self, page_number: u32) -> Result<f64> {
        check_page_number(page_number, self.page_count())?;
        Ok(page_top_offset(
            page_number,
            &self.geometry,
            self.rotation,
            self.scale(),
            self.config.page_gap,
        ))
    }

    /// Map a rectangle in page space to the rectangle painted on screen.
    pub fn to_screen(&self, rect: &PageRect) -> PageRect {
        rotate_rect(rect, &self.geometry, self.rotation, self.scale())
    }

    /// Map a painted rectangle back to page space.
    pub fn to_page(&self, rect: &PageRect) -> PageRect {
        unrotate_rect(rect, &self.geometry, self.rotation, self.scale())
    }

    pub fn set_rotation(&mut self, rotation: Rotation) {
        if self.rotation == rotation {
            return;
        }
        self.rotation = rotation;
        self.pipeline.set_rotation(rotation);
        debug!("Rotation set to {}°", rotation.degrees());
    }

    pub fn rotate_clockwise(&mut self) -> Rotation {
        self.set_rotation(self.rotation.clockwise());
        self.rotation
    }

    pub fn rotate_counter_clockwise(&mut self) -> Rotation {
        self.set_rotation(self.rotation.counter_clockwise());
        self.rotation
    }

    /// Change the display scale, dropping every cached raster.
    pub fn set_scale(&mut self, scale: f64) -> Result<()> {
        self.pipeline.set_scale(scale)?;
        Ok(())
    }

    pub fn set_device_pixel_ratio(&mut self, ratio: f64) -> Result<()> {
        self.pipeline.set_device_pixel_ratio(ratio)?;
        Ok(())
    }

    // Visibility and scrolling

    /// Drain pending observations and enqueue renders for the new
    /// visible-page set.
    pub fn poll_visibility(&mut self) -> Result<ObserverUpdate> {
        let update = self.observers.poll();
        if let Some(targets) = &update.targets {
            self.targets = Arc::clone(targets);
        }
        if let Some(pages) = &update.pages {
            self.visible = Arc::clone(pages);
            self.pipeline.schedule(&visible_pages(&self.visible))?;
        }
        Ok(update)
    }

    /// Current page visibility ratios.
    pub fn visibility(&self) -> VisibleSnapshot {
        Arc::clone(&self.visible)
    }

    pub fn visible_pages(&self) -> BTreeSet<u32> {
        visible_pages(&self.visible)
    }

    /// The page with the largest visible share.
    pub fn current_page(&self) -> Option<u32> {
        most_visible_page(&self.visible)
    }

    /// Navigation-target markers currently in view.
    pub fn visible_targets(&self) -> VisibleSnapshot {
        Arc::clone(&self.targets)
    }

    pub fn seen_pages(&self) -> &BTreeSet<u32> {
        self.observers.seen_pages()
    }

    pub fn observers(&self) -> &ViewportObservers {
        &self.observers
    }

    /// Feed one scroll offset sample of the root.
    pub fn on_scroll(&mut self, offset: f64) -> ScrollUpdate {
        self.scroll.on_scroll(offset)
    }

    pub fn scroll_state(&self) -> ScrollState {
        self.scroll.state()
    }

    // Rendering

    pub fn ensure_rendered(&self, page_number: u32) -> Result<Arc<RenderState>> {
        self.pipeline.ensure_rendered(page_number)
    }

    /// Render a page and wait for the outcome.
    pub async fn render_page(&self, page_number: u32) -> RenderOutcome {
        self.pipeline.render(page_number).await
    }

    /// The page's cached raster, if ready.
    pub fn page_image(&self, page_number: u32) -> Option<EncodedImage> {
        self.pipeline.image(page_number)
    }

    pub fn pipeline(&self) -> &PageRenderPipeline<D> {
        &self.pipeline
    }

    pub fn stats(&self) -> PipelineStats {
        self.pipeline.stats()
    }

    // Outline and text

    pub fn outline(&self) -> &OutlineIndex {
        &self.outline
    }

    /// Outline positions on pages holding render state, in page order,
    /// projected to absolute layout pixels.
    pub fn navigation_targets(&self) -> Vec<NavigationTarget> {
        let states = self.pipeline.states();
        let scale = self.scale();
        let mut targets = Vec::new();
        for (page_number, positions) in self.outline.iter() {
            if !states.contains_key(&page_number) {
                continue;
            }
            let page_top = page_top_offset(
                page_number,
                &self.geometry,
                self.rotation,
                scale,
                self.config.page_gap,
            );
            for (index, position) in positions.iter().enumerate() {
                let point =
                    point_to_pixels(&position.document_point(), &self.geometry, self.rotation, scale);
                targets.push(NavigationTarget {
                    page_number,
                    title: position.title.clone(),
                    anchor: target_anchor(page_number, index),
                    point: ScreenPoint {
                        left: point.left,
                        top: page_top + point.top,
                    },
                });
            }
        }
        targets
    }

    /// Text content of a page, straight from the document.
    pub async fn page_text(&self, page_number: u32) -> Result<TextContent> {
        check_page_number(page_number, self.page_count())?;
        let page = self.document.page(page_number).await?;
        page.text_content().await
    }

    // Lifecycle

    /// Release every raster and disconnect the observers. Safe to call
    /// more than once.
    pub fn close(&mut self) {
        if self.closed {
            return;
        }
        self.closed = true;
        self.pipeline.clear();
        self.observers.destroy();
        self.visible = VisibleSnapshot::default();
        self.targets = VisibleSnapshot::default();
        info!("Viewer closed");
    }

    pub fn is_closed(&self) -> bool {
        self.closed
    }
}

impl<D: DocumentProxy + ?Sized> Drop for Viewer<D> {
    fn drop(&mut self) {
        self.close();
    }
}
