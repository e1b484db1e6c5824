//! # pageview-core
//!
//! Viewport rendering core for long multi-page documents.
//!
//! This library keeps memory and CPU bounded while a document scrolls
//! through a viewport:
//!
//! - **Visibility tracking** over an observation primitive, with immutable snapshots
//! - **Scroll direction** and distance-threshold signals
//! - **Render pipeline** drawing pages one at a time on a single shared surface,
//!   prioritized by what is visible, cached as PNG behind revocable object URLs
//! - **Outline resolution** into a frozen page-keyed index
//! - **Geometry** for rotation, scale and document-space points
//!
//! Decoding documents is left to a [`DocumentProxy`] implementation.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use pageview_core::{DocumentProxy, LayoutHost, LayoutModel, SurfaceSlot, Viewer, ViewerConfig};
//! use std::sync::Arc;
//!
//! async fn show<D: DocumentProxy>(document: Arc<D>) -> anyhow::Result<()> {
//!     let layout = LayoutModel::new("viewer-root", 800.0, 600.0).into_shared();
//!     let host = LayoutHost::new(layout);
//!
//!     let mut viewer =
//!         Viewer::open(document, &host, SurfaceSlot::default(), ViewerConfig::default()).await?;
//!
//!     // Whenever the host has new intersections
//!     viewer.poll_visibility()?;
//!     for page in viewer.visible_pages() {
//!         if let Some(image) = viewer.page_image(page) {
//!             println!("Page {}: {}x{}", page, image.width, image.height);
//!         }
//!     }
//!
//!     viewer.close();
//!     Ok(())
//! }
//! ```

pub mod config;
pub mod document;
pub mod error;
pub mod geometry;
pub mod intersection;
pub mod object_url;
pub mod outline;
pub mod pipeline;
pub mod scroll;
pub mod surface;
pub mod viewer;
pub mod visibility;

// Re-export main types for convenience
pub use config::{PngCompression, RenderConfig, ScrollConfig, ViewerConfig, VisibilityConfig};
pub use document::{DocumentProxy, PageProxy, RenderViewport, TextContent, TextItem};
pub use error::{Result, ViewerError};
pub use geometry::{
    page_height, page_top_offset, page_width, point_to_pixels, rotate_rect, unrotate_rect,
    DocumentPoint, PageGeometry, PageRect, Rotation, ScreenPoint,
};
pub use intersection::{
    IntersectionSource, LayoutHost, LayoutIntersectionSource, LayoutModel, LayoutRect,
    ObservationHost, ObservationRecord, ObservedTarget, ObserverOptions, SharedLayout,
};
pub use object_url::{EncodedImage, ObjectUrl, ObjectUrlRegistry};
pub use outline::{
    load_outline, resolve_outline, Destination, DestinationRef, OutlineIndex, OutlineNode,
    OutlinePosition,
};
pub use pipeline::{
    priority_order, PageRenderPipeline, PipelineStats, RenderOutcome, RenderState, RenderTask,
    RenderedPage,
};
pub use scroll::{ScrollDirection, ScrollDirectionTracker, ScrollRoot, ScrollState, ScrollUpdate};
pub use surface::{RasterSurface, SurfaceSlot};
pub use viewer::{NavigationTarget, Viewer};
pub use visibility::{
    merge_batch, TrackerKind, ViewportObservers, VisibilityTracker, VisibleEntry, VisibleKey,
    VisibleSnapshot,
};

/// Initialize the library's logging.
/// Call this once at application startup if you want to see logs.
pub fn init_logging() {
    use tracing_subscriber::{fmt, prelude::*, EnvFilter};

    tracing_subscriber::registry()
        .with(fmt::layer())
        .with(EnvFilter::from_default_env())
        .init();
}
