//! Scroll direction tracking.
//!
//! Fed raw offset samples of a scroll root, the tracker derives the scroll
//! direction, whether the root is at the top, and whether a configured
//! distance has been travelled in the current direction. It keeps no
//! history beyond the previous sample and does not debounce.

use crate::config::ScrollConfig;
use crate::error::Result;

/// Direction of travel along the scroll axis.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScrollDirection {
    /// Offset increasing (towards the end of the document).
    Forward,
    /// Offset decreasing.
    Backward,
}

/// Which element's offset is sampled.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum ScrollRoot {
    /// The document's root scrolling element.
    #[default]
    Document,
    /// A specific scroll container.
    Element(String),
}

/// Signals produced by one sample.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ScrollUpdate {
    pub is_at_top: bool,
    /// Set only when the direction differs from the previous sample's.
    pub direction_changed: Option<ScrollDirection>,
    /// Set once per direction run, when the travelled distance first
    /// exceeds the threshold.
    pub threshold_crossed: Option<ScrollDirection>,
}

/// Current tracker state, for consumers that read rather than subscribe.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ScrollState {
    pub direction: Option<ScrollDirection>,
    pub is_at_top: bool,
    pub threshold_reached: bool,
}

/// Turns scroll offset samples of one root into direction and threshold state.
#[derive(Debug, Clone)]
pub struct ScrollDirectionTracker {
    root: ScrollRoot,
    threshold: Option<f64>,
    last_offset: f64,
    direction: Option<ScrollDirection>,
    is_at_top: bool,
    distance: f64,
    threshold_reached: bool,
}

impl ScrollDirectionTracker {
    /// Attach to `root` (the document when `None`), taking `initial_offset`
    /// as the baseline sample. No direction is reported for the baseline.
    pub fn attach(root: Option<ScrollRoot>, initial_offset: f64, config: &ScrollConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            root: root.unwrap_or_default(),
            threshold: config.threshold,
            last_offset: initial_offset,
            direction: None,
            is_at_top: initial_offset <= 0.0,
            distance: 0.0,
            threshold_reached: false,
        })
    }

    /// Process one scroll event.
    pub fn on_scroll(&mut self, offset: f64) -> ScrollUpdate {
        let delta = offset - self.last_offset;
        self.last_offset = offset;
        self.is_at_top = offset <= 0.0;

        let mut update = ScrollUpdate {
            is_at_top: self.is_at_top,
            ..Default::default()
        };

        // No movement away from the top: nothing to derive.
        if delta == 0.0 && !self.is_at_top {
            return update;
        }

        let direction = if delta > 0.0 || self.is_at_top {
            ScrollDirection::Forward
        } else {
            ScrollDirection::Backward
        };

        if self.direction != Some(direction) {
            self.direction = Some(direction);
            self.distance = 0.0;
            self.threshold_reached = false;
            update.direction_changed = Some(direction);
        }

        if self.is_at_top {
            self.distance = 0.0;
            self.threshold_reached = false;
        } else if let Some(threshold) = self.threshold {
            self.distance += delta.abs();
            if !self.threshold_reached && self.distance > threshold {
                self.threshold_reached = true;
                update.threshold_crossed = Some(direction);
            }
        }

        update
    }

    pub fn root(&self) -> &ScrollRoot {
        &self.root
    }

    pub fn direction(&self) -> Option<ScrollDirection> {
        self.direction
    }

    pub fn is_at_top(&self) -> bool {
        self.is_at_top
    }

    pub fn state(&self) -> ScrollState {
        ScrollState {
            direction: self.direction,
            is_at_top: self.is_at_top,
            threshold_reached: self.threshold_reached,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Attach with the first offset as baseline and feed the rest,
    /// returning one update per sample (index 0 is the baseline).
    fn run(offsets: &[f64], config: &ScrollConfig) -> (ScrollDirectionTracker, Vec<ScrollUpdate>) {
        let mut tracker = ScrollDirectionTracker::attach(None, offsets[0], config).unwrap();
        let mut updates = vec![ScrollUpdate {
            is_at_top: tracker.is_at_top(),
            ..Default::default()
        }];
        for offset in &offsets[1..] {
            updates.push(tracker.on_scroll(*offset));
        }
        (tracker, updates)
    }

    #[test]
    fn test_direction_changes_are_emitted_once() {
        let (_, updates) = run(&[0.0, 5.0, 12.0, 12.0, 3.0], &ScrollConfig::default());
        let changes: Vec<_> = updates
            .iter()
            .enumerate()
            .filter_map(|(i, u)| u.direction_changed.map(|d| (i, d)))
            .collect();
        assert_eq!(
            changes,
            vec![(1, ScrollDirection::Forward), (4, ScrollDirection::Backward)]
        );

        let at_top: Vec<_> = updates.iter().map(|u| u.is_at_top).collect();
        assert_eq!(at_top, vec![true, false, false, false, false]);
    }

    #[test]
    fn test_defaults_to_document_root() {
        let tracker = ScrollDirectionTracker::attach(None, 0.0, &ScrollConfig::default()).unwrap();
        assert_eq!(tracker.root(), &ScrollRoot::Document);

        let tracker = ScrollDirectionTracker::attach(
            Some(ScrollRoot::Element("pane".into())),
            0.0,
            &ScrollConfig::default(),
        )
        .unwrap();
        assert_eq!(tracker.root(), &ScrollRoot::Element("pane".into()));
    }

    #[test]
    fn test_returning_to_top_is_forward() {
        let (tracker, updates) = run(&[0.0, 50.0, 20.0, 0.0], &ScrollConfig::default());
        assert_eq!(updates[2].direction_changed, Some(ScrollDirection::Backward));
        assert_eq!(updates[3].direction_changed, Some(ScrollDirection::Forward));
        assert!(updates[3].is_at_top);
        assert_eq!(tracker.direction(), Some(ScrollDirection::Forward));
    }

    #[test]
    fn test_threshold_fires_once_per_direction_run() {
        let config = ScrollConfig::with_threshold(20.0);
        let (_, updates) = run(&[0.0, 10.0, 25.0, 40.0, 60.0], &config);
        let crossed: Vec<_> = updates.iter().map(|u| u.threshold_crossed).collect();
        assert_eq!(
            crossed,
            vec![None, None, Some(ScrollDirection::Forward), None, None]
        );
    }

    #[test]
    fn test_threshold_resets_on_direction_change() {
        let config = ScrollConfig::with_threshold(20.0);
        let (tracker, updates) = run(&[0.0, 30.0, 100.0, 90.0, 75.0, 60.0], &config);
        assert_eq!(updates[1].threshold_crossed, Some(ScrollDirection::Forward));
        assert_eq!(updates[3].threshold_crossed, None);
        assert_eq!(updates[4].threshold_crossed, Some(ScrollDirection::Backward));
        assert_eq!(updates[5].threshold_crossed, None);
        assert!(tracker.state().threshold_reached);
    }

    #[test]
    fn test_threshold_resets_at_top() {
        let config = ScrollConfig::with_threshold(20.0);
        let (tracker, updates) = run(&[100.0, 70.0, 0.0, 15.0, 30.0], &config);
        assert_eq!(updates[1].threshold_crossed, Some(ScrollDirection::Backward));
        assert!(updates[2].is_at_top);
        assert_eq!(updates[3].threshold_crossed, None);
        assert_eq!(updates[4].threshold_crossed, Some(ScrollDirection::Forward));
        assert!(!tracker.is_at_top());
    }

    #[test]
    fn test_no_threshold_never_signals() {
        let (tracker, updates) = run(&[0.0, 1000.0, 5000.0], &ScrollConfig::default());
        assert!(updates.iter().all(|u| u.threshold_crossed.is_none()));
        assert!(!tracker.state().threshold_reached);
    }

    #[test]
    fn test_invalid_threshold_fails_attach() {
        let result = ScrollDirectionTracker::attach(None, 0.0, &ScrollConfig::with_threshold(0.0));
        assert!(result.is_err());
    }
}
