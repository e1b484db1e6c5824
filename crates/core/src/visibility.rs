//! Incremental visibility tracking.
//!
//! Each tracker folds batches of observation records into an immutable
//! snapshot mapping keys (page numbers or navigation-target anchors) to
//! their visibility ratio and observation time. A snapshot is never
//! modified after it is published; every batch installs a fresh one.

use crate::config::VisibilityConfig;
use crate::error::{Result, ViewerError};
use crate::intersection::{
    IntersectionSource, ObservationHost, ObservationRecord, ObservedTarget, ObserverOptions,
};
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::Arc;
use tokio::sync::watch;
use tracing::{debug, info};

/// Key of a visible entry.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum VisibleKey {
    /// 1-based page number.
    Page(u32),
    /// Navigation-target anchor.
    Target(String),
}

/// Visibility of one key.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct VisibleEntry {
    /// Fraction visible, in [0, 1].
    pub ratio: f64,
    /// Time of the observation that produced this entry, in milliseconds.
    pub timestamp: f64,
}

/// Published, immutable visibility state.
pub type VisibleSnapshot = Arc<BTreeMap<VisibleKey, VisibleEntry>>;

/// What a tracker observes; selects key extraction and merge rules.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TrackerKind {
    /// Page elements, fine-grained ratios.
    Pages,
    /// Navigation-target markers, used for outline highlighting.
    NavigationTargets,
    /// Page elements with a coarse threshold, for seen-page bookkeeping.
    SeenPages,
}

impl TrackerKind {
    fn key(self, target: &ObservedTarget) -> Option<VisibleKey> {
        match self {
            TrackerKind::Pages | TrackerKind::SeenPages => target.page_number().map(VisibleKey::Page),
            TrackerKind::NavigationTargets => {
                target.anchor().map(|anchor| VisibleKey::Target(anchor.to_string()))
            }
        }
    }

    /// Fast scrolls can deliver hide-then-show for the same target in one
    /// batch; navigation targets prune anything older than the latest hide.
    fn prunes_stale(self) -> bool {
        matches!(self, TrackerKind::NavigationTargets)
    }
}

/// Fold one batch of records into `previous`, returning the next state.
///
/// Hidden keys are removed. For navigation targets, entries last seen
/// before the batch's latest hide are dropped as well. Visible records are
/// then written in, unless the same key was hidden later in the batch.
pub fn merge_batch(
    kind: TrackerKind,
    previous: &BTreeMap<VisibleKey, VisibleEntry>,
    batch: &[ObservationRecord],
) -> BTreeMap<VisibleKey, VisibleEntry> {
    let mut hidden: HashMap<VisibleKey, f64> = HashMap::new();
    let mut shown: BTreeMap<VisibleKey, VisibleEntry> = BTreeMap::new();

    for record in batch {
        let Some(key) = kind.key(&record.target) else {
            continue;
        };
        if record.is_intersecting {
            let entry = VisibleEntry {
                ratio: record.ratio,
                timestamp: record.time,
            };
            match shown.get(&key) {
                Some(existing) if existing.timestamp > entry.timestamp => {}
                _ => {
                    shown.insert(key, entry);
                }
            }
        } else {
            let time = hidden.entry(key).or_insert(record.time);
            *time = time.max(record.time);
        }
    }

    let mut next = previous.clone();
    for key in hidden.keys() {
        next.remove(key);
    }
    if kind.prunes_stale() {
        if let Some(latest) = hidden.values().copied().reduce(f64::max) {
            next.retain(|_, entry| entry.timestamp >= latest);
        }
    }

    for (key, entry) in shown {
        if hidden.get(&key).is_some_and(|hidden_at| *hidden_at > entry.timestamp) {
            continue;
        }
        next.insert(key, entry);
    }

    next
}

/// Pages present in a snapshot, ascending.
pub fn visible_pages(snapshot: &BTreeMap<VisibleKey, VisibleEntry>) -> BTreeSet<u32> {
    snapshot
        .keys()
        .filter_map(|key| match key {
            VisibleKey::Page(page) => Some(*page),
            VisibleKey::Target(_) => None,
        })
        .collect()
}

/// The page with the highest ratio; the lowest page number wins ties.
pub fn most_visible_page(snapshot: &BTreeMap<VisibleKey, VisibleEntry>) -> Option<u32> {
    let mut best: Option<(u32, f64)> = None;
    for (key, entry) in snapshot {
        if let VisibleKey::Page(page) = key {
            if best.map_or(true, |(_, ratio)| entry.ratio > ratio) {
                best = Some((*page, entry.ratio));
            }
        }
    }
    best.map(|(page, _)| page)
}

/// Tracks one kind of element under a root.
pub struct VisibilityTracker {
    kind: TrackerKind,
    source: Box<dyn IntersectionSource>,
    sender: watch::Sender<VisibleSnapshot>,
    destroyed: bool,
}

impl std::fmt::Debug for VisibilityTracker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("VisibilityTracker")
            .field("kind", &self.kind)
            .field("entries", &self.sender.borrow().len())
            .field("destroyed", &self.destroyed)
            .finish()
    }
}

impl VisibilityTracker {
    /// Register every element under `root` matching `selector` and start
    /// with an empty snapshot. Fails only if the root is missing.
    pub fn observe(
        kind: TrackerKind,
        mut source: Box<dyn IntersectionSource>,
        root: &str,
        selector: &str,
        options: &ObserverOptions,
    ) -> Result<Self> {
        let registered = source.observe(root, selector, options)?;
        debug!(
            "{:?} tracker observing {} elements ({} thresholds, margin {}px)",
            kind,
            registered,
            options.thresholds.len(),
            options.root_margin
        );
        let (sender, _) = watch::channel(Arc::new(BTreeMap::new()));
        Ok(Self {
            kind,
            source,
            sender,
            destroyed: false,
        })
    }

    pub fn kind(&self) -> TrackerKind {
        self.kind
    }

    /// Drain pending records from the source and merge them.
    /// Returns the new snapshot if anything was delivered.
    pub fn poll(&mut self) -> Option<VisibleSnapshot> {
        if self.destroyed {
            return None;
        }
        let batch = self.source.take_records();
        if batch.is_empty() {
            return None;
        }
        Some(self.apply(&batch))
    }

    /// Merge a batch delivered by the host and publish the result.
    pub fn apply(&mut self, batch: &[ObservationRecord]) -> VisibleSnapshot {
        if self.destroyed || batch.is_empty() {
            return self.snapshot();
        }
        let next = Arc::new(merge_batch(self.kind, &self.snapshot(), batch));
        self.sender.send_replace(Arc::clone(&next));
        next
    }

    /// Current snapshot.
    pub fn snapshot(&self) -> VisibleSnapshot {
        Arc::clone(&self.sender.borrow())
    }

    /// Receive every snapshot this tracker publishes.
    pub fn subscribe(&self) -> watch::Receiver<VisibleSnapshot> {
        self.sender.subscribe()
    }

    /// Stop observing. Safe to call more than once.
    pub fn destroy(&mut self) {
        if !self.destroyed {
            debug!("{:?} tracker destroyed", self.kind);
        }
        self.source.disconnect();
        self.destroyed = true;
    }

    pub fn is_destroyed(&self) -> bool {
        self.destroyed
    }
}

impl Drop for VisibilityTracker {
    fn drop(&mut self) {
        self.destroy();
    }
}

/// Changes observed by one [`ViewportObservers::poll`].
#[derive(Debug, Clone, Default)]
pub struct ObserverUpdate {
    pub pages: Option<VisibleSnapshot>,
    pub targets: Option<VisibleSnapshot>,
    /// Pages seen for the first time, ascending.
    pub newly_seen: Vec<u32>,
}

impl ObserverUpdate {
    pub fn is_empty(&self) -> bool {
        self.pages.is_none() && self.targets.is_none() && self.newly_seen.is_empty()
    }
}

/// The three trackers a viewport runs: page ratios, navigation targets and
/// seen pages.
#[derive(Debug)]
pub struct ViewportObservers {
    pages: VisibilityTracker,
    targets: VisibilityTracker,
    seen: VisibilityTracker,
    seen_threshold: f64,
    seen_pages: BTreeSet<u32>,
}

impl ViewportObservers {
    /// Attach all three trackers to the configured root.
    ///
    /// A host without an observation primitive cannot run a viewer at all
    /// and yields [`ViewerError::ObservationUnavailable`].
    pub fn attach(host: &dyn ObservationHost, config: &VisibilityConfig) -> Result<Self> {
        config.validate()?;
        let source = || host.intersection_source().ok_or(ViewerError::ObservationUnavailable);

        let ladder = ObserverOptions::new(
            config.root_margin,
            ObserverOptions::threshold_ladder(config.threshold_steps),
        );
        let coarse = ObserverOptions::new(0.0, vec![config.seen_threshold]);

        let pages = VisibilityTracker::observe(
            TrackerKind::Pages,
            source()?,
            &config.root_id,
            &config.page_selector,
            &ladder,
        )?;
        let targets = VisibilityTracker::observe(
            TrackerKind::NavigationTargets,
            source()?,
            &config.root_id,
            &config.target_selector,
            &ladder,
        )?;
        let seen = VisibilityTracker::observe(
            TrackerKind::SeenPages,
            source()?,
            &config.root_id,
            &config.page_selector,
            &coarse,
        )?;

        info!("Viewport observers attached to '{}'", config.root_id);

        Ok(Self {
            pages,
            targets,
            seen,
            seen_threshold: config.seen_threshold,
            seen_pages: BTreeSet::new(),
        })
    }

    /// Poll all three trackers.
    pub fn poll(&mut self) -> ObserverUpdate {
        let pages = self.pages.poll();
        let targets = self.targets.poll();
        let mut newly_seen = Vec::new();
        if let Some(snapshot) = self.seen.poll() {
            for (key, entry) in snapshot.iter() {
                if let VisibleKey::Page(page) = key {
                    if entry.ratio >= self.seen_threshold && self.seen_pages.insert(*page) {
                        newly_seen.push(*page);
                    }
                }
            }
        }
        ObserverUpdate {
            pages,
            targets,
            newly_seen,
        }
    }

    pub fn pages(&self) -> &VisibilityTracker {
        &self.pages
    }

    pub fn targets(&self) -> &VisibilityTracker {
        &self.targets
    }

    pub fn seen(&self) -> &VisibilityTracker {
        &self.seen
    }

    /// Every page that has reached the seen threshold so far.
    pub fn seen_pages(&self) -> &BTreeSet<u32> {
        &self.seen_pages
    }

    /// Disconnect all trackers. Safe to call more than once.
    pub fn destroy(&mut self) {
        self.pages.destroy();
        self.targets.destroy();
        self.seen.destroy();
    }
}
