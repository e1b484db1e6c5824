//! Document proxy: the decoding capability this core consumes.
//!
//! Parsing and decoding are done elsewhere. The viewer only needs page
//! count, per-page size, painting at a viewport transform, text
//! extraction, the outline tree and destination resolution.

use crate::error::{Result, ViewerError};
use crate::geometry::{PageGeometry, Rotation};
use crate::outline::{DestinationRef, OutlineNode};
use crate::surface::RasterSurface;
use futures::future::BoxFuture;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// Viewport transform a page is painted with.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RenderViewport {
    /// Effective scale: display scale x device pixel ratio x boost.
    pub scale: f64,
    /// Document rotation.
    pub rotation: Rotation,
    /// Pixel width of the drawn raster.
    pub width: u32,
    /// Pixel height of the drawn raster.
    pub height: u32,
}

impl RenderViewport {
    /// Size a viewport for a page at the given effective scale.
    pub fn for_page(geometry: &PageGeometry, rotation: Rotation, scale: f64) -> Self {
        let width = crate::geometry::page_width(geometry, rotation, scale);
        let height = crate::geometry::page_height(geometry, rotation, scale);
        Self {
            scale,
            rotation,
            width: width.ceil().max(1.0) as u32,
            height: height.ceil().max(1.0) as u32,
        }
    }

    /// Like [`RenderViewport::for_page`], but lowers the scale so the raster
    /// holds at most `max_pixels` pixels.
    pub fn for_page_within(
        geometry: &PageGeometry,
        rotation: Rotation,
        scale: f64,
        max_pixels: u64,
    ) -> Self {
        let viewport = Self::for_page(geometry, rotation, scale);
        if viewport.pixel_count() <= max_pixels {
            return viewport;
        }
        let width = crate::geometry::page_width(geometry, rotation, 1.0);
        let height = crate::geometry::page_height(geometry, rotation, 1.0);
        let capped = (max_pixels as f64 / (width * height)).sqrt().min(scale);
        let width_px = clamp_dimension(width * capped, max_pixels);
        let height_px = clamp_dimension(height * capped, max_pixels / u64::from(width_px));
        Self {
            scale: capped,
            rotation,
            width: width_px,
            height: height_px,
        }
    }

    pub fn pixel_count(&self) -> u64 {
        u64::from(self.width) * u64::from(self.height)
    }
}

/// Floor to whole pixels within `1..=limit`.
fn clamp_dimension(value: f64, limit: u64) -> u32 {
    let limit = limit.clamp(1, u64::from(u32::MAX));
    (value.floor().max(1.0) as u64).min(limit) as u32
}

/// One positioned run of text.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TextItem {
    pub text: String,
    /// Position in document space (points, Y up).
    pub x: f64,
    pub y: f64,
    pub width: f64,
    pub height: f64,
}

/// Text extracted from a single page.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TextContent {
    pub items: Vec<TextItem>,
}

impl TextContent {
    /// Concatenated text of all items, one item per line.
    pub fn plain_text(&self) -> String {
        self.items
            .iter()
            .map(|item| item.text.as_str())
            .collect::<Vec<_>>()
            .join("\n")
    }
}

/// A single decoded page.
pub trait PageProxy: Send + Sync {
    /// 1-based page number.
    fn page_number(&self) -> u32;

    /// Intrinsic unscaled, unrotated size.
    fn size(&self) -> PageGeometry;

    /// Paint the page onto `surface`, which has already been sized to
    /// `viewport.width` x `viewport.height`.
    fn render<'a>(
        &'a self,
        surface: &'a mut RasterSurface,
        viewport: RenderViewport,
    ) -> BoxFuture<'a, Result<()>>;

    /// Extract the page's text.
    fn text_content(&self) -> BoxFuture<'_, Result<TextContent>>;
}

/// A loaded document.
pub trait DocumentProxy: Send + Sync + 'static {
    /// Number of pages.
    fn page_count(&self) -> u32;

    /// Fetch a page by 1-based number.
    fn page(&self, page_number: u32) -> BoxFuture<'_, Result<Arc<dyn PageProxy>>>;

    /// The navigation tree (empty when the document has none).
    fn outline(&self) -> BoxFuture<'_, Result<Vec<OutlineNode>>>;

    /// Resolve a destination reference to a 0-based page index.
    fn resolve_destination<'a>(&'a self, dest: &'a DestinationRef) -> BoxFuture<'a, Result<u32>>;
}

/// Check that `page_number` is in `1..=page_count`.
pub fn check_page_number(page_number: u32, page_count: u32) -> Result<()> {
    if page_number == 0 || page_number > page_count {
        return Err(ViewerError::PageOutOfRange {
            page: page_number,
            page_count,
        });
    }
    Ok(())
}

/// Read the document's page geometry from its first page.
///
/// All pages are laid out with this geometry for the document's lifetime.
pub async fn load_page_geometry<D: DocumentProxy + ?Sized>(document: &D) -> Result<PageGeometry> {
    check_page_number(1, document.page_count())?;
    let page = document.page(1).await?;
    Ok(page.size())
}
