//! The single off-screen drawing surface shared by all page renders.
//!
//! Pages are painted into one RGBA buffer and encoded to PNG. Access goes
//! through [`SurfaceSlot`], whose lock hands out the surface in strict
//! FIFO order of acquisition, one holder at a time.

use crate::config::RenderConfig;
use crate::error::{Result, ViewerError};
use image::{Rgba, RgbaImage};
use std::io::Cursor;
use std::sync::Arc;
use tokio::sync::{Mutex, OwnedMutexGuard};
use tracing::debug;

/// Off-screen RGBA drawing surface.
#[derive(Debug, Clone)]
pub struct RasterSurface {
    image: RgbaImage,
}

impl Default for RasterSurface {
    fn default() -> Self {
        Self::new(1, 1)
    }
}

impl RasterSurface {
    /// Create a transparent surface.
    pub fn new(width: u32, height: u32) -> Self {
        Self {
            image: RgbaImage::new(width.max(1), height.max(1)),
        }
    }

    pub fn width(&self) -> u32 {
        self.image.width()
    }

    pub fn height(&self) -> u32 {
        self.image.height()
    }

    /// Resize and clear to transparent. Reuses the allocation when the size
    /// is unchanged.
    pub fn reset(&mut self, width: u32, height: u32) {
        let (width, height) = (width.max(1), height.max(1));
        if self.image.width() == width && self.image.height() == height {
            for pixel in self.image.pixels_mut() {
                *pixel = Rgba([0, 0, 0, 0]);
            }
        } else {
            self.image = RgbaImage::new(width, height);
        }
    }

    /// Fill an axis-aligned rectangle, clipped to the surface.
    pub fn fill_rect(&mut self, x: u32, y: u32, width: u32, height: u32, color: Rgba<u8>) {
        let x_end = x.saturating_add(width).min(self.image.width());
        let y_end = y.saturating_add(height).min(self.image.height());
        for py in y.min(y_end)..y_end {
            for px in x.min(x_end)..x_end {
                self.image.put_pixel(px, py, color);
            }
        }
    }

    /// Direct access to the pixel buffer.
    pub fn image(&self) -> &RgbaImage {
        &self.image
    }

    /// Mutable access to the pixel buffer.
    pub fn image_mut(&mut self) -> &mut RgbaImage {
        &mut self.image
    }

    /// Encode the current contents to PNG bytes.
    pub fn encode_png(&self, config: &RenderConfig) -> Result<Vec<u8>> {
        if config.use_alpha {
            encode_png(&self.image, config)
        } else {
            let flattened = apply_background(self.image.clone(), config.background_color);
            encode_png(&flattened, config)
        }
    }
}

/// Blend transparent pixels over a solid background.
fn apply_background(mut image: RgbaImage, background: (u8, u8, u8)) -> RgbaImage {
    let (r, g, b) = background;

    for pixel in image.pixels_mut() {
        let alpha = pixel[3] as f32 / 255.0;
        if alpha < 1.0 {
            let inv_alpha = 1.0 - alpha;
            pixel[0] = ((pixel[0] as f32 * alpha) + (r as f32 * inv_alpha)) as u8;
            pixel[1] = ((pixel[1] as f32 * alpha) + (g as f32 * inv_alpha)) as u8;
            pixel[2] = ((pixel[2] as f32 * alpha) + (b as f32 * inv_alpha)) as u8;
            pixel[3] = 255;
        }
    }

    image
}

fn encode_png(image: &RgbaImage, config: &RenderConfig) -> Result<Vec<u8>> {
    let mut buffer = Cursor::new(Vec::new());

    let mut encoder = png::Encoder::new(&mut buffer, image.width(), image.height());
    encoder.set_color(png::ColorType::Rgba);
    encoder.set_depth(png::BitDepth::Eight);
    encoder.set_compression(config.png_compression.into());

    let mut writer = encoder
        .write_header()
        .map_err(|e| ViewerError::EncodeFailed(format!("Failed to write PNG header: {}", e)))?;

    writer
        .write_image_data(image.as_raw())
        .map_err(|e| ViewerError::EncodeFailed(format!("Failed to write PNG data: {}", e)))?;

    drop(writer);

    Ok(buffer.into_inner())
}

/// Exclusive, FIFO-ordered handle to a shared [`RasterSurface`].
///
/// Cloning shares the same surface. Each viewer normally owns its own slot;
/// two viewers may share one to cap memory.
#[derive(Debug, Clone, Default)]
pub struct SurfaceSlot {
    surface: Arc<Mutex<RasterSurface>>,
}

impl SurfaceSlot {
    pub fn new(surface: RasterSurface) -> Self {
        Self {
            surface: Arc::new(Mutex::new(surface)),
        }
    }

    /// Wait for exclusive access. Waiters are served in the order they
    /// called `acquire`.
    pub async fn acquire(&self) -> OwnedMutexGuard<RasterSurface> {
        let guard = Arc::clone(&self.surface).lock_owned().await;
        debug!("Surface acquired ({}x{})", guard.width(), guard.height());
        guard
    }

    /// Whether someone currently holds the surface.
    pub fn is_busy(&self) -> bool {
        self.surface.try_lock().is_err()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const PNG_MAGIC: [u8; 8] = [0x89, 0x50, 0x4E, 0x47, 0x0D, 0x0A, 0x1A, 0x0A];

    // ========== RasterSurface tests ==========

    #[test]
    fn test_surface_never_zero_sized() {
        let surface = RasterSurface::new(0, 0);
        assert_eq!((surface.width(), surface.height()), (1, 1));
    }

    #[test]
    fn test_reset_clears_and_resizes() {
        let mut surface = RasterSurface::new(4, 4);
        surface.fill_rect(0, 0, 4, 4, Rgba([255, 0, 0, 255]));
        surface.reset(4, 4);
        assert_eq!(surface.image().get_pixel(2, 2), &Rgba([0, 0, 0, 0]));

        surface.reset(8, 2);
        assert_eq!((surface.width(), surface.height()), (8, 2));
    }

    #[test]
    fn test_fill_rect_clips_to_bounds() {
        let mut surface = RasterSurface::new(4, 4);
        surface.fill_rect(2, 2, 10, 10, Rgba([0, 255, 0, 255]));
        assert_eq!(surface.image().get_pixel(3, 3), &Rgba([0, 255, 0, 255]));
        assert_eq!(surface.image().get_pixel(1, 1), &Rgba([0, 0, 0, 0]));
    }

    #[test]
    fn test_fill_rect_fully_outside_is_noop() {
        let mut surface = RasterSurface::new(4, 4);
        surface.fill_rect(10, 10, 2, 2, Rgba([0, 255, 0, 255]));
        assert!(surface.image().pixels().all(|p| p[3] == 0));
    }

    // ========== Encoding tests ==========

    #[test]
    fn test_encode_png_magic_bytes() {
        let mut surface = RasterSurface::new(10, 10);
        surface.fill_rect(0, 0, 10, 10, Rgba([255, 0, 0, 255]));
        let png_data = surface.encode_png(&RenderConfig::default()).unwrap();
        assert!(png_data.len() > 8);
        assert_eq!(&png_data[0..8], &PNG_MAGIC);
    }

    #[test]
    fn test_apply_background_flattens_transparency() {
        let mut image = RgbaImage::new(1, 1);
        image.put_pixel(0, 0, Rgba([0, 0, 0, 0]));
        let out = apply_background(image, (255, 255, 255));
        assert_eq!(out.get_pixel(0, 0), &Rgba([255, 255, 255, 255]));
    }

    #[test]
    fn test_apply_background_keeps_opaque_pixels() {
        let mut image = RgbaImage::new(1, 1);
        image.put_pixel(0, 0, Rgba([10, 20, 30, 255]));
        let out = apply_background(image, (255, 255, 255));
        assert_eq!(out.get_pixel(0, 0), &Rgba([10, 20, 30, 255]));
    }

    #[test]
    fn test_encode_png_with_alpha_decodes_back() {
        let mut surface = RasterSurface::new(3, 2);
        surface.fill_rect(0, 0, 1, 1, Rgba([0, 255, 0, 128]));
        let config = RenderConfig::default().use_alpha(true);
        let png_data = surface.encode_png(&config).unwrap();

        let decoded = image::load_from_memory(&png_data).unwrap().into_rgba8();
        assert_eq!(decoded.dimensions(), (3, 2));
        assert_eq!(decoded.get_pixel(0, 0), &Rgba([0, 255, 0, 128]));
    }

    // ========== SurfaceSlot tests ==========

    #[tokio::test]
    async fn test_slot_is_exclusive() {
        let slot = SurfaceSlot::default();
        assert!(!slot.is_busy());
        let guard = slot.acquire().await;
        assert!(slot.is_busy());
        drop(guard);
        assert!(!slot.is_busy());
    }

    #[test]
    fn test_acquire_waits_while_held() {
        let slot = SurfaceSlot::default();
        let mut first = tokio_test::task::spawn(slot.acquire());
        let guard = tokio_test::assert_ready!(first.poll());

        let mut second = tokio_test::task::spawn(slot.acquire());
        tokio_test::assert_pending!(second.poll());

        drop(guard);
        assert!(second.is_woken());
        let _guard = tokio_test::assert_ready!(second.poll());
    }

    #[tokio::test]
    async fn test_slot_serves_waiters_in_fifo_order() {
        let slot = SurfaceSlot::default();
        let order = Arc::new(parking_lot::Mutex::new(Vec::new()));
        let first = slot.acquire().await;

        let mut handles = Vec::new();
        for i in 0..4 {
            let slot = slot.clone();
            let order = Arc::clone(&order);
            handles.push(tokio::spawn(async move {
                let _guard = slot.acquire().await;
                order.lock().push(i);
            }));
            // Let the task reach the lock queue before spawning the next.
            tokio::task::yield_now().await;
        }

        drop(first);
        for handle in handles {
            handle.await.unwrap();
        }
        assert_eq!(*order.lock(), vec![0, 1, 2, 3]);
    }
}
