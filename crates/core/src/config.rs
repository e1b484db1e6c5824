//! Configuration types for the viewport rendering core.

use crate::error::{Result, ViewerError};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// PNG compression preset used when encoding a drawn page.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PngCompression {
    /// Fastest encode, larger output. Preferred while scrolling.
    Fast,
    /// Balanced.
    Default,
    /// Smallest output, slowest encode.
    Best,
}

impl From<PngCompression> for png::Compression {
    fn from(level: PngCompression) -> Self {
        match level {
            PngCompression::Fast => png::Compression::Fast,
            PngCompression::Default => png::Compression::Default,
            PngCompression::Best => png::Compression::Best,
        }
    }
}

/// Configuration for page rasterization.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RenderConfig {
    /// Multiplier applied on top of `scale * device_pixel_ratio` so the
    /// raster is sharper than its CSS-pixel display size.
    /// Default: 2.0.
    pub render_boost_factor: f64,

    /// Pause held after each encode before the next queued render may draw.
    /// Gives the host's paint/input cycle a chance to run.
    /// Default: 16 ms.
    pub yield_delay: Duration,

    /// PNG compression preset.
    /// Default: fast.
    pub png_compression: PngCompression,

    /// Whether to keep the alpha channel.
    /// Default: false.
    pub use_alpha: bool,

    /// Background color composited under transparent pixels (if not using alpha).
    /// Default: white (255, 255, 255).
    pub background_color: (u8, u8, u8),

    /// Upper bound on a raster's pixel count. Pages whose boosted size
    /// would exceed it are drawn at the largest scale that fits.
    /// Default: 16_777_216 (4096 x 4096).
    #[serde(default = "default_max_raster_pixels")]
    pub max_raster_pixels: u64,
}

fn default_max_raster_pixels() -> u64 {
    16_777_216
}

impl Default for RenderConfig {
    fn default() -> Self {
        Self {
            render_boost_factor: 2.0,
            yield_delay: Duration::from_millis(16),
            png_compression: PngCompression::Fast,
            use_alpha: false,
            background_color: (255, 255, 255),
            max_raster_pixels: default_max_raster_pixels(),
        }
    }
}

impl RenderConfig {
    /// Set the render boost factor.
    pub fn render_boost_factor(mut self, factor: f64) -> Self {
        self.render_boost_factor = factor;
        self
    }

    /// Set the post-encode yield delay.
    pub fn yield_delay(mut self, delay: Duration) -> Self {
        self.yield_delay = delay;
        self
    }

    /// Set the PNG compression preset.
    pub fn png_compression(mut self, level: PngCompression) -> Self {
        self.png_compression = level;
        self
    }

    /// Enable alpha channel.
    pub fn use_alpha(mut self, enabled: bool) -> Self {
        self.use_alpha = enabled;
        self
    }

    /// Set the raster pixel-count cap.
    pub fn max_raster_pixels(mut self, pixels: u64) -> Self {
        self.max_raster_pixels = pixels;
        self
    }

    /// Validate the configuration.
    pub fn validate(&self) -> Result<()> {
        if !(self.render_boost_factor.is_finite() && self.render_boost_factor > 0.0) {
            return Err(ViewerError::InvalidConfig(
                "render_boost_factor must be a positive number".to_string(),
            ));
        }
        if self.max_raster_pixels == 0 {
            return Err(ViewerError::InvalidConfig(
                "max_raster_pixels must be at least 1".to_string(),
            ));
        }
        Ok(())
    }
}

/// Configuration for the three visibility trackers.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VisibilityConfig {
    /// Identifier of the scrollable root all trackers observe.
    /// Default: "viewer-root".
    pub root_id: String,

    /// Pre-fetch margin (pixels) added around the root bounds on every side.
    /// Default: 1000.
    pub root_margin: f64,

    /// Number of evenly spaced ratio thresholds (0% to 100% inclusive).
    /// Default: 101.
    pub threshold_steps: usize,

    /// Class selecting page elements.
    /// Default: "page".
    pub page_selector: String,

    /// Class selecting navigation-target markers.
    /// Default: "outline-target".
    pub target_selector: String,

    /// Ratio at which a page counts as seen.
    /// Default: 0.5.
    pub seen_threshold: f64,
}

impl Default for VisibilityConfig {
    fn default() -> Self {
        Self {
            root_id: "viewer-root".to_string(),
            root_margin: 1000.0,
            threshold_steps: 101,
            page_selector: "page".to_string(),
            target_selector: "outline-target".to_string(),
            seen_threshold: 0.5,
        }
    }
}

impl VisibilityConfig {
    /// Set the root element identifier.
    pub fn root_id(mut self, root_id: impl Into<String>) -> Self {
        self.root_id = root_id.into();
        self
    }

    /// Set the pre-fetch margin.
    pub fn root_margin(mut self, margin: f64) -> Self {
        self.root_margin = margin;
        self
    }

    /// Set the seen-page ratio.
    pub fn seen_threshold(mut self, ratio: f64) -> Self {
        self.seen_threshold = ratio;
        self
    }

    /// Validate the configuration.
    pub fn validate(&self) -> Result<()> {
        if self.threshold_steps < 2 {
            return Err(ViewerError::InvalidConfig(
                "threshold_steps must be at least 2".to_string(),
            ));
        }
        if !(self.root_margin.is_finite() && self.root_margin >= 0.0) {
            return Err(ViewerError::InvalidConfig(
                "root_margin must be a non-negative number".to_string(),
            ));
        }
        if !(self.seen_threshold > 0.0 && self.seen_threshold <= 1.0) {
            return Err(ViewerError::InvalidConfig(
                "seen_threshold must be in (0, 1]".to_string(),
            ));
        }
        Ok(())
    }
}

/// Configuration for scroll direction tracking.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ScrollConfig {
    /// Distance (pixels) travelled in one direction before the
    /// threshold-crossed signal fires. `None` disables the signal.
    pub threshold: Option<f64>,
}

impl ScrollConfig {
    /// Create a scroll config with a distance threshold.
    pub fn with_threshold(threshold: f64) -> Self {
        Self {
            threshold: Some(threshold),
        }
    }

    /// Validate the configuration.
    pub fn validate(&self) -> Result<()> {
        if let Some(threshold) = self.threshold {
            if !(threshold.is_finite() && threshold > 0.0) {
                return Err(ViewerError::InvalidConfig(
                    "scroll threshold must be a positive number".to_string(),
                ));
            }
        }
        Ok(())
    }
}

/// Combined configuration for a viewer instance.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ViewerConfig {
    /// Render configuration.
    pub render: RenderConfig,

    /// Visibility tracker configuration.
    pub visibility: VisibilityConfig,

    /// Scroll tracker configuration.
    pub scroll: ScrollConfig,

    /// Vertical gap between stacked pages (pixels).
    /// Default: 10.
    pub page_gap: f64,

    /// Scale the viewer opens at.
    /// Default: 1.0.
    pub initial_scale: f64,

    /// Device pixel ratio the viewer opens at.
    /// Default: 1.0.
    pub device_pixel_ratio: f64,
}

impl Default for ViewerConfig {
    fn default() -> Self {
        Self {
            render: RenderConfig::default(),
            visibility: VisibilityConfig::default(),
            scroll: ScrollConfig::default(),
            page_gap: 10.0,
            initial_scale: 1.0,
            device_pixel_ratio: 1.0,
        }
    }
}

impl ViewerConfig {
    /// Set the initial scale.
    pub fn initial_scale(mut self, scale: f64) -> Self {
        self.initial_scale = scale;
        self
    }

    /// Set the device pixel ratio.
    pub fn device_pixel_ratio(mut self, ratio: f64) -> Self {
        self.device_pixel_ratio = ratio;
        self
    }

    /// Set the render configuration.
    pub fn render(mut self, render: RenderConfig) -> Self {
        self.render = render;
        self
    }

    /// Parse a configuration from JSON.
    pub fn from_json(json: &str) -> Result<Self> {
        let config: Self = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    /// Serialize the configuration to pretty JSON.
    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    /// Validate the entire configuration.
    pub fn validate(&self) -> Result<()> {
        self.render.validate()?;
        self.visibility.validate()?;
        self.scroll.validate()?;
        validate_positive("initial_scale", self.initial_scale)?;
        validate_positive("device_pixel_ratio", self.device_pixel_ratio)?;
        if !(self.page_gap.is_finite() && self.page_gap >= 0.0) {
            return Err(ViewerError::InvalidConfig(
                "page_gap must be a non-negative number".to_string(),
            ));
        }
        Ok(())
    }
}

/// Reject zero, negative and non-finite values.
pub(crate) fn validate_positive(name: &str, value: f64) -> Result<()> {
    if value.is_finite() && value > 0.0 {
        Ok(())
    } else {
        Err(ViewerError::InvalidConfig(format!(
            "{} must be a positive number, got {}",
            name, value
        )))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    // ========== RenderConfig tests ==========

    #[test]
    fn test_render_config_defaults() {
        let config = RenderConfig::default();
        assert_eq!(config.render_boost_factor, 2.0);
        assert_eq!(config.yield_delay, Duration::from_millis(16));
        assert_eq!(config.png_compression, PngCompression::Fast);
        assert!(!config.use_alpha);
        assert_eq!(config.background_color, (255, 255, 255));
        assert_eq!(config.max_raster_pixels, 4096 * 4096);
    }

    #[test]
    fn test_render_config_builder() {
        let config = RenderConfig::default()
            .render_boost_factor(3.0)
            .yield_delay(Duration::ZERO)
            .png_compression(PngCompression::Best)
            .use_alpha(true);
        assert_eq!(config.render_boost_factor, 3.0);
        assert_eq!(config.yield_delay, Duration::ZERO);
        assert_eq!(config.png_compression, PngCompression::Best);
        assert!(config.use_alpha);
    }

    #[test]
    fn test_render_config_rejects_zero_boost() {
        let config = RenderConfig::default().render_boost_factor(0.0);
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_render_config_rejects_nan_boost() {
        let config = RenderConfig::default().render_boost_factor(f64::NAN);
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_render_config_rejects_zero_pixel_cap() {
        let config = RenderConfig::default().max_raster_pixels(0);
        assert!(config.validate().is_err());
    }

    // ========== VisibilityConfig tests ==========

    #[test]
    fn test_visibility_config_defaults() {
        let config = VisibilityConfig::default();
        assert_eq!(config.threshold_steps, 101);
        assert_eq!(config.root_margin, 1000.0);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_visibility_config_rejects_bad_seen_threshold() {
        assert!(VisibilityConfig::default()
            .seen_threshold(0.0)
            .validate()
            .is_err());
        assert!(VisibilityConfig::default()
            .seen_threshold(1.5)
            .validate()
            .is_err());
        assert!(VisibilityConfig::default()
            .seen_threshold(1.0)
            .validate()
            .is_ok());
    }

    #[test]
    fn test_visibility_config_rejects_negative_margin() {
        let config = VisibilityConfig::default().root_margin(-1.0);
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_visibility_config_rejects_single_step() {
        let mut config = VisibilityConfig::default();
        config.threshold_steps = 1;
        assert!(config.validate().is_err());
    }

    // ========== ScrollConfig tests ==========

    #[test]
    fn test_scroll_config_threshold_validation() {
        assert!(ScrollConfig::default().validate().is_ok());
        assert!(ScrollConfig::with_threshold(50.0).validate().is_ok());
        assert!(ScrollConfig::with_threshold(0.0).validate().is_err());
        assert!(ScrollConfig::with_threshold(-5.0).validate().is_err());
    }

    // ========== ViewerConfig tests ==========

    #[test]
    fn test_viewer_config_validation() {
        assert!(ViewerConfig::default().validate().is_ok());
        assert!(ViewerConfig::default()
            .initial_scale(0.0)
            .validate()
            .is_err());
        assert!(ViewerConfig::default()
            .device_pixel_ratio(-2.0)
            .validate()
            .is_err());
    }

    #[test]
    fn test_viewer_config_json_roundtrip() {
        let config = ViewerConfig::default().initial_scale(1.5);
        let json = config.to_json().unwrap();
        assert!(json.contains("render_boost_factor"));

        let parsed = ViewerConfig::from_json(&json).unwrap();
        assert_eq!(parsed.initial_scale, 1.5);
        assert_eq!(parsed.render.png_compression, PngCompression::Fast);
    }

    #[test]
    fn test_viewer_config_from_invalid_json() {
        let result = ViewerConfig::from_json("{ \"render\": 3 }");
        assert!(matches!(result, Err(ViewerError::InvalidConfig(_))));
    }

    #[test]
    fn test_png_compression_conversion() {
        let level: png::Compression = PngCompression::Best.into();
        assert!(matches!(level, png::Compression::Best));
    }
}
