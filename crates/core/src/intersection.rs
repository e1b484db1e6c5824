//! Viewport-observation primitive.
//!
//! [`IntersectionSource`] is the seam between the visibility trackers and
//! whatever host reports element visibility. Records are polled with
//! `take_records`, in the order the host batched them.
//!
//! [`LayoutIntersectionSource`] is a host-independent implementation that
//! computes intersections from a [`LayoutModel`] of element rectangles and
//! a scrollable root, so the tracking algorithms run without a real
//! viewport.

use crate::error::{Result, ViewerError};
use crate::geometry::{page_height, page_top_offset, page_width, PageGeometry, Rotation};
use parking_lot::RwLock;
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::debug;

/// What an observed element carries for key extraction.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct ObservedTarget {
    pub element_id: String,
    pub classes: Vec<String>,
    /// Data attributes (`data-page-number`, `data-anchor`, ...), without the
    /// `data-` prefix.
    pub data: BTreeMap<String, String>,
}

impl ObservedTarget {
    pub fn new(element_id: impl Into<String>) -> Self {
        Self {
            element_id: element_id.into(),
            ..Default::default()
        }
    }

    pub fn with_class(mut self, class: impl Into<String>) -> Self {
        self.classes.push(class.into());
        self
    }

    pub fn with_data(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.data.insert(key.into(), value.into());
        self
    }

    /// Whether the element matches a class selector (`page` or `.page`).
    pub fn matches(&self, selector: &str) -> bool {
        let class = selector.strip_prefix('.').unwrap_or(selector);
        self.classes.iter().any(|c| c == class)
    }

    /// `data-page-number`, parsed.
    pub fn page_number(&self) -> Option<u32> {
        self.data.get("page-number")?.parse().ok()
    }

    /// `data-anchor`.
    pub fn anchor(&self) -> Option<&str> {
        self.data.get("anchor").map(String::as_str)
    }
}

/// One observation delivered by the primitive.
#[derive(Debug, Clone, PartialEq)]
pub struct ObservationRecord {
    pub target: ObservedTarget,
    pub is_intersecting: bool,
    /// Fraction of the element inside the (margin-expanded) root, in [0, 1].
    pub ratio: f64,
    /// Observation time in milliseconds.
    pub time: f64,
}

/// Options passed when registering elements.
#[derive(Debug, Clone, PartialEq)]
pub struct ObserverOptions {
    /// Margin added around the root bounds on every side, in pixels.
    pub root_margin: f64,
    /// Ascending ratio thresholds; crossing one produces a record.
    pub thresholds: Vec<f64>,
}

impl ObserverOptions {
    /// `steps` evenly spaced thresholds from 0 to 1 inclusive.
    pub fn threshold_ladder(steps: usize) -> Vec<f64> {
        let steps = steps.max(2);
        (0..steps)
            .map(|i| i as f64 / (steps - 1) as f64)
            .collect()
    }

    pub fn new(root_margin: f64, thresholds: Vec<f64>) -> Self {
        let mut thresholds = thresholds;
        thresholds.sort_by(|a, b| a.total_cmp(b));
        thresholds.dedup();
        Self {
            root_margin,
            thresholds,
        }
    }

    /// Default ladder of 101 steps with the given margin.
    pub fn with_margin(root_margin: f64) -> Self {
        Self::new(root_margin, Self::threshold_ladder(101))
    }

    /// Index of the highest threshold at or below `ratio`, if any.
    fn bucket(&self, ratio: f64, is_intersecting: bool) -> Option<usize> {
        if !is_intersecting {
            return None;
        }
        self.thresholds.iter().rposition(|t| *t <= ratio)
    }
}

/// Host-side viewport-observation primitive.
pub trait IntersectionSource: Send {
    /// Register every element under `root` matching `selector`.
    /// Returns the number of registered elements.
    fn observe(&mut self, root: &str, selector: &str, options: &ObserverOptions) -> Result<usize>;

    /// Drain records queued since the last call.
    fn take_records(&mut self) -> Vec<ObservationRecord>;

    /// Stop observing. Safe to call more than once.
    fn disconnect(&mut self);
}

/// Host capability check: a host with no observation primitive returns `None`.
pub trait ObservationHost {
    fn intersection_source(&self) -> Option<Box<dyn IntersectionSource>>;
}

/// Axis-aligned rectangle in scroll-content coordinates.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct LayoutRect {
    pub x: f64,
    pub y: f64,
    pub width: f64,
    pub height: f64,
}

impl LayoutRect {
    pub fn new(x: f64, y: f64, width: f64, height: f64) -> Self {
        Self {
            x,
            y,
            width,
            height,
        }
    }

    fn expand(&self, margin: f64) -> LayoutRect {
        LayoutRect {
            x: self.x - margin,
            y: self.y - margin,
            width: self.width + margin * 2.0,
            height: self.height + margin * 2.0,
        }
    }

    fn intersection(&self, other: &LayoutRect) -> Option<LayoutRect> {
        let x = self.x.max(other.x);
        let y = self.y.max(other.y);
        let right = (self.x + self.width).min(other.x + other.width);
        let bottom = (self.y + self.height).min(other.y + other.height);
        if right < x || bottom < y {
            return None;
        }
        Some(LayoutRect::new(x, y, right - x, bottom - y))
    }

    fn area(&self) -> f64 {
        self.width * self.height
    }
}

/// An element placed in the layout.
#[derive(Debug, Clone)]
pub struct LayoutElement {
    pub target: ObservedTarget,
    pub rect: LayoutRect,
}

/// Geometry of a scrollable root and its content.
#[derive(Debug, Clone)]
pub struct LayoutModel {
    root_id: String,
    scroll_top: f64,
    viewport_width: f64,
    viewport_height: f64,
    now_ms: f64,
    elements: Vec<LayoutElement>,
}

/// Layout shared between the host and every source observing it.
pub type SharedLayout = Arc<RwLock<LayoutModel>>;

impl LayoutModel {
    pub fn new(root_id: impl Into<String>, viewport_width: f64, viewport_height: f64) -> Self {
        Self {
            root_id: root_id.into(),
            scroll_top: 0.0,
            viewport_width,
            viewport_height,
            now_ms: 0.0,
            elements: Vec::new(),
        }
    }

    pub fn into_shared(self) -> SharedLayout {
        Arc::new(RwLock::new(self))
    }

    pub fn root_id(&self) -> &str {
        &self.root_id
    }

    pub fn scroll_top(&self) -> f64 {
        self.scroll_top
    }

    /// Scroll the root. Offsets below zero clamp to zero.
    pub fn scroll_to(&mut self, offset: f64) {
        self.scroll_top = offset.max(0.0);
    }

    pub fn now_ms(&self) -> f64 {
        self.now_ms
    }

    /// Advance the observation clock.
    pub fn advance_clock(&mut self, ms: f64) {
        self.now_ms += ms;
    }

    pub fn push_element(&mut self, target: ObservedTarget, rect: LayoutRect) {
        self.elements.push(LayoutElement { target, rect });
    }

    pub fn elements(&self) -> &[LayoutElement] {
        &self.elements
    }

    /// Visible root bounds in content coordinates.
    pub fn root_bounds(&self) -> LayoutRect {
        LayoutRect::new(0.0, self.scroll_top, self.viewport_width, self.viewport_height)
    }

    /// Replace all elements with `page_count` vertically stacked pages.
    ///
    /// Each page gets class `page_class` and `data-page-number`.
    pub fn layout_pages(
        &mut self,
        page_class: &str,
        page_count: u32,
        geometry: &PageGeometry,
        rotation: Rotation,
        scale: f64,
        gap: f64,
    ) {
        self.elements.clear();
        let width = page_width(geometry, rotation, scale);
        let height = page_height(geometry, rotation, scale);
        for page in 1..=page_count {
            let top = page_top_offset(page, geometry, rotation, scale, gap);
            self.push_element(
                ObservedTarget::new(format!("page-{}", page))
                    .with_class(page_class)
                    .with_data("page-number", page.to_string()),
                LayoutRect::new(0.0, top, width, height),
            );
        }
    }

    fn matching(&self, selector: &str) -> Vec<usize> {
        self.elements
            .iter()
            .enumerate()
            .filter(|(_, e)| e.target.matches(selector))
            .map(|(i, _)| i)
            .collect()
    }

    /// Intersection ratio of an element with the margin-expanded root.
    fn ratio_of(&self, index: usize, margin: f64) -> (bool, f64) {
        let Some(element) = self.elements.get(index) else {
            return (false, 0.0);
        };
        let bounds = self.root_bounds().expand(margin);
        match element.rect.intersection(&bounds) {
            None => (false, 0.0),
            Some(overlap) => {
                let area = element.rect.area();
                let ratio = if area > 0.0 {
                    (overlap.area() / area).clamp(0.0, 1.0)
                } else {
                    1.0
                };
                (true, ratio)
            }
        }
    }
}

/// Registered element and its last reported state.
#[derive(Debug)]
struct Registration {
    index: usize,
    last: Option<(bool, Option<usize>)>,
}

/// Computes observation records from a [`LayoutModel`].
///
/// A record is produced the first time an element is checked, and
/// afterwards whenever its intersecting state or threshold bucket changes.
#[derive(Debug)]
pub struct LayoutIntersectionSource {
    layout: SharedLayout,
    options: ObserverOptions,
    registrations: Vec<Registration>,
    connected: bool,
}

impl LayoutIntersectionSource {
    pub fn new(layout: SharedLayout) -> Self {
        Self {
            layout,
            options: ObserverOptions::with_margin(0.0),
            registrations: Vec::new(),
            connected: false,
        }
    }
}

impl IntersectionSource for LayoutIntersectionSource {
    fn observe(&mut self, root: &str, selector: &str, options: &ObserverOptions) -> Result<usize> {
        let layout = self.layout.read();
        if layout.root_id() != root {
            return Err(ViewerError::MissingRoot(root.to_string()));
        }
        self.options = options.clone();
        self.registrations = layout
            .matching(selector)
            .into_iter()
            .map(|index| Registration { index, last: None })
            .collect();
        self.connected = true;
        debug!(
            "Observing {} elements matching '{}' under '{}'",
            self.registrations.len(),
            selector,
            root
        );
        Ok(self.registrations.len())
    }

    fn take_records(&mut self) -> Vec<ObservationRecord> {
        if !self.connected {
            return Vec::new();
        }
        let layout = self.layout.read();
        let time = layout.now_ms();
        let mut records = Vec::new();
        for registration in &mut self.registrations {
            let (is_intersecting, ratio) = layout.ratio_of(registration.index, self.options.root_margin);
            let state = (is_intersecting, self.options.bucket(ratio, is_intersecting));
            if registration.last == Some(state) {
                continue;
            }
            registration.last = Some(state);
            if let Some(element) = layout.elements().get(registration.index) {
                records.push(ObservationRecord {
                    target: element.target.clone(),
                    is_intersecting,
                    ratio,
                    time,
                });
            }
        }
        records
    }

    fn disconnect(&mut self) {
        if self.connected {
            debug!("Disconnecting {} observations", self.registrations.len());
        }
        self.connected = false;
        self.registrations.clear();
    }
}

/// Host backed by a shared [`LayoutModel`].
#[derive(Debug, Clone)]
pub struct LayoutHost {
    layout: SharedLayout,
    supports_observation: bool,
}

impl LayoutHost {
    pub fn new(layout: SharedLayout) -> Self {
        Self {
            layout,
            supports_observation: true,
        }
    }

    /// A host that lacks the observation primitive.
    pub fn without_observation(layout: SharedLayout) -> Self {
        Self {
            layout,
            supports_observation: false,
        }
    }

    pub fn layout(&self) -> &SharedLayout {
        &self.layout
    }
}

impl ObservationHost for LayoutHost {
    fn intersection_source(&self) -> Option<Box<dyn IntersectionSource>> {
        if !self.supports_observation {
            return None;
        }
        Some(Box::new(LayoutIntersectionSource::new(Arc::clone(&self.layout))))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn stacked_pages(count: u32) -> SharedLayout {
        let mut layout = LayoutModel::new("root", 600.0, 800.0);
        layout.layout_pages("page", count, &PageGeometry::new(600.0, 800.0), Rotation::Deg0, 1.0, 0.0);
        layout.into_shared()
    }

    // ========== ObservedTarget tests ==========

    #[test]
    fn test_target_selector_matching() {
        let target = ObservedTarget::new("p1").with_class("page");
        assert!(target.matches("page"));
        assert!(target.matches(".page"));
        assert!(!target.matches("outline-target"));
    }

    #[test]
    fn test_target_data_extraction() {
        let target = ObservedTarget::new("p1")
            .with_data("page-number", "7")
            .with_data("anchor", "sec-2");
        assert_eq!(target.page_number(), Some(7));
        assert_eq!(target.anchor(), Some("sec-2"));
        assert_eq!(ObservedTarget::new("x").with_data("page-number", "abc").page_number(), None);
    }

    // ========== Options tests ==========

    #[test]
    fn test_threshold_ladder() {
        let ladder = ObserverOptions::threshold_ladder(101);
        assert_eq!(ladder.len(), 101);
        assert_eq!(ladder[0], 0.0);
        assert_eq!(ladder[50], 0.5);
        assert_eq!(ladder[100], 1.0);
    }

    #[test]
    fn test_options_sort_and_dedup() {
        let options = ObserverOptions::new(0.0, vec![0.5, 0.0, 0.5, 1.0]);
        assert_eq!(options.thresholds, vec![0.0, 0.5, 1.0]);
        assert_eq!(options.bucket(0.7, true), Some(1));
        assert_eq!(options.bucket(0.7, false), None);
    }

    // ========== LayoutIntersectionSource tests ==========

    #[test]
    fn test_missing_root_fails_setup() {
        let mut source = LayoutIntersectionSource::new(stacked_pages(2));
        let result = source.observe("nope", "page", &ObserverOptions::with_margin(0.0));
        assert!(matches!(result, Err(ViewerError::MissingRoot(_))));
    }

    #[test]
    fn test_initial_records_report_every_element() {
        let mut source = LayoutIntersectionSource::new(stacked_pages(3));
        let count = source
            .observe("root", "page", &ObserverOptions::with_margin(0.0))
            .unwrap();
        assert_eq!(count, 3);

        let records = source.take_records();
        assert_eq!(records.len(), 3);
        assert!(records[0].is_intersecting);
        assert_eq!(records[0].ratio, 1.0);
        // Page 2 touches the root's bottom edge only.
        assert_eq!(records[1].ratio, 0.0);
        assert!(!records[2].is_intersecting);
    }

    #[test]
    fn test_unchanged_layout_produces_no_records() {
        let mut source = LayoutIntersectionSource::new(stacked_pages(3));
        source
            .observe("root", "page", &ObserverOptions::with_margin(0.0))
            .unwrap();
        source.take_records();
        assert!(source.take_records().is_empty());
    }

    #[test]
    fn test_scroll_reports_bucket_changes() {
        let layout = stacked_pages(3);
        let mut source = LayoutIntersectionSource::new(Arc::clone(&layout));
        source
            .observe("root", "page", &ObserverOptions::with_margin(0.0))
            .unwrap();
        source.take_records();

        {
            let mut l = layout.write();
            l.scroll_to(400.0);
            l.advance_clock(16.0);
        }
        let records = source.take_records();
        assert_eq!(records.len(), 2);
        assert_eq!(records[0].target.page_number(), Some(1));
        assert_eq!(records[0].ratio, 0.5);
        assert_eq!(records[1].ratio, 0.5);
        assert_eq!(records[1].time, 16.0);
    }

    #[test]
    fn test_root_margin_prefetches() {
        let mut source = LayoutIntersectionSource::new(stacked_pages(3));
        source
            .observe("root", "page", &ObserverOptions::with_margin(1000.0))
            .unwrap();
        let records = source.take_records();
        assert!(records[2].is_intersecting, "page 3 is inside the margin");
    }

    #[test]
    fn test_disconnect_is_idempotent() {
        let mut source = LayoutIntersectionSource::new(stacked_pages(1));
        source
            .observe("root", "page", &ObserverOptions::with_margin(0.0))
            .unwrap();
        source.disconnect();
        source.disconnect();
        assert!(source.take_records().is_empty());
    }

    #[test]
    fn test_host_without_observation() {
        let host = LayoutHost::without_observation(stacked_pages(1));
        assert!(host.intersection_source().is_none());
        assert!(LayoutHost::new(stacked_pages(1)).intersection_source().is_some());
    }
}
