//! Outline (table of contents) resolution.
//!
//! The navigation tree is walked with an explicit stack, every destination
//! is resolved concurrently, and the results are frozen into a
//! page-number-keyed index. Entries whose destination does not resolve are
//! dropped.

use crate::document::DocumentProxy;
use crate::error::Result;
use crate::geometry::{DocumentPoint, REFERENCE_HEIGHT_PT};
use futures::future::join_all;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;
use tracing::{debug, info};

/// Opaque reference to a destination inside the document.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum DestinationRef {
    /// A named destination looked up in the document's name tree.
    Named(String),
    /// An indirect reference to a page object.
    Explicit { object: u32, generation: u16 },
}

impl fmt::Display for DestinationRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DestinationRef::Named(name) => write!(f, "#{}", name),
            DestinationRef::Explicit { object, generation } => {
                write!(f, "{} {} R", object, generation)
            }
        }
    }
}

/// A destination plus the optional in-page coordinates it points at,
/// in document space (points, Y up).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Destination {
    pub target: DestinationRef,
    pub left: Option<f64>,
    pub top: Option<f64>,
}

impl Destination {
    pub fn named(name: impl Into<String>) -> Self {
        Self {
            target: DestinationRef::Named(name.into()),
            left: None,
            top: None,
        }
    }

    pub fn explicit(object: u32, generation: u16) -> Self {
        Self {
            target: DestinationRef::Explicit { object, generation },
            left: None,
            top: None,
        }
    }

    pub fn at(mut self, left: f64, top: f64) -> Self {
        self.left = Some(left);
        self.top = Some(top);
        self
    }
}

/// One entry of the navigation tree.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OutlineNode {
    pub title: String,
    pub dest: Option<Destination>,
    #[serde(default)]
    pub items: Vec<OutlineNode>,
}

impl OutlineNode {
    pub fn new(title: impl Into<String>, dest: Option<Destination>) -> Self {
        Self {
            title: title.into(),
            dest,
            items: Vec::new(),
        }
    }

    pub fn with_children(mut self, items: Vec<OutlineNode>) -> Self {
        self.items = items;
        self
    }
}

/// A resolved outline entry on a specific page.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OutlinePosition {
    pub title: String,
    pub destination: Destination,
    /// Horizontal position, points from the left edge.
    pub left_point: f64,
    /// Vertical position, points from the bottom edge.
    pub bottom_point: f64,
}

impl OutlinePosition {
    fn new(title: &str, destination: &Destination) -> Self {
        Self {
            title: title.to_string(),
            destination: destination.clone(),
            left_point: destination.left.unwrap_or(0.0),
            bottom_point: destination.top.unwrap_or(REFERENCE_HEIGHT_PT),
        }
    }

    /// The target as a document-space point.
    pub fn document_point(&self) -> DocumentPoint {
        DocumentPoint {
            x: self.left_point,
            y: self.bottom_point,
        }
    }
}

/// Immutable page-number-keyed index of resolved outline positions.
///
/// Cloning is cheap and shares the same frozen data.
#[derive(Debug, Clone, Default)]
pub struct OutlineIndex {
    pages: Arc<BTreeMap<u32, Arc<[OutlinePosition]>>>,
}

impl OutlineIndex {
    /// Positions on a 1-based page.
    pub fn get(&self, page_number: u32) -> Option<&[OutlinePosition]> {
        self.pages.get(&page_number).map(|positions| &**positions)
    }

    /// Pages that carry at least one position, ascending.
    pub fn page_numbers(&self) -> impl Iterator<Item = u32> + '_ {
        self.pages.keys().copied()
    }

    pub fn iter(&self) -> impl Iterator<Item = (u32, &[OutlinePosition])> + '_ {
        self.pages
            .iter()
            .map(|(page, positions)| (*page, &**positions))
    }

    /// Number of pages in the index.
    pub fn len(&self) -> usize {
        self.pages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pages.is_empty()
    }

    /// Total positions across all pages.
    pub fn position_count(&self) -> usize {
        self.pages.values().map(|positions| positions.len()).sum()
    }

    /// Whether two handles share the same frozen data.
    pub fn ptr_eq(&self, other: &OutlineIndex) -> bool {
        Arc::ptr_eq(&self.pages, &other.pages)
    }
}

/// Resolve a navigation tree against a document.
///
/// Order of the resulting per-page lists follows traversal order, which is
/// not document order.
pub async fn resolve_outline<D: DocumentProxy + ?Sized>(
    document: &D,
    nodes: &[OutlineNode],
) -> OutlineIndex {
    let mut stack: Vec<&OutlineNode> = nodes.iter().collect();
    let mut pending: Vec<(&str, &Destination)> = Vec::new();

    while let Some(node) = stack.pop() {
        if let Some(dest) = &node.dest {
            pending.push((node.title.as_str(), dest));
        }
        stack.extend(node.items.iter());
    }

    let page_count = document.page_count();
    let lookups = pending.into_iter().map(|(title, dest)| async move {
        let resolved = document.resolve_destination(&dest.target).await;
        (title, dest, resolved)
    });

    let mut grouped: BTreeMap<u32, Vec<OutlinePosition>> = BTreeMap::new();
    let mut dropped = 0usize;
    for (title, dest, resolved) in join_all(lookups).await {
        match resolved {
            Ok(index) if index < page_count => {
                grouped
                    .entry(index + 1)
                    .or_default()
                    .push(OutlinePosition::new(title, dest));
            }
            Ok(index) => {
                debug!(
                    "Dropping outline entry '{}': {} resolved to page index {} of {}",
                    title, dest.target, index, page_count
                );
                dropped += 1;
            }
            Err(e) => {
                debug!("Dropping outline entry '{}': {}", title, e);
                dropped += 1;
            }
        }
    }

    let pages: BTreeMap<u32, Arc<[OutlinePosition]>> = grouped
        .into_iter()
        .map(|(page, positions)| (page, Arc::from(positions)))
        .collect();

    info!(
        "Resolved outline onto {} pages ({} entries dropped)",
        pages.len(),
        dropped
    );

    OutlineIndex {
        pages: Arc::new(pages),
    }
}

/// Fetch the document's outline and resolve it.
pub async fn load_outline<D: DocumentProxy + ?Sized>(document: &D) -> Result<OutlineIndex> {
    let nodes = document.outline().await?;
    Ok(resolve_outline(document, &nodes).await)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::document::PageProxy;
    use crate::error::ViewerError;
    use futures::future::BoxFuture;
    use futures::FutureExt;
    use std::collections::HashMap;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Document whose only capability is destination lookup.
    struct DestinationsOnly {
        pages: u32,
        named: HashMap<String, u32>,
        in_flight: AtomicUsize,
        max_in_flight: AtomicUsize,
    }

    impl DestinationsOnly {
        fn new(pages: u32, named: &[(&str, u32)]) -> Self {
            Self {
                pages,
                named: named.iter().map(|(k, v)| (k.to_string(), *v)).collect(),
                in_flight: AtomicUsize::new(0),
                max_in_flight: AtomicUsize::new(0),
            }
        }
    }

    impl DocumentProxy for DestinationsOnly {
        fn page_count(&self) -> u32 {
            self.pages
        }

        fn page(&self, page_number: u32) -> BoxFuture<'_, Result<Arc<dyn PageProxy>>> {
            async move { Err(ViewerError::DocumentProxy(format!("no page {}", page_number))) }
                .boxed()
        }

        fn outline(&self) -> BoxFuture<'_, Result<Vec<OutlineNode>>> {
            async { Ok(vec![OutlineNode::new("Intro", Some(Destination::named("intro")))]) }
                .boxed()
        }

        fn resolve_destination<'a>(
            &'a self,
            dest: &'a DestinationRef,
        ) -> BoxFuture<'a, Result<u32>> {
            async move {
                let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
                self.max_in_flight.fetch_max(now, Ordering::SeqCst);
                tokio::task::yield_now().await;
                self.in_flight.fetch_sub(1, Ordering::SeqCst);
                match dest {
                    DestinationRef::Named(name) => self
                        .named
                        .get(name)
                        .copied()
                        .ok_or_else(|| ViewerError::UnresolvedDestination(name.clone())),
                    DestinationRef::Explicit { object, .. } => Ok(*object),
                }
            }
            .boxed()
        }
    }

    #[tokio::test]
    async fn test_broken_destination_is_dropped() {
        let doc = DestinationsOnly::new(5, &[("chapter", 2)]);
        let outline = vec![
            OutlineNode::new("Broken", Some(Destination::named("missing"))),
            OutlineNode::new("Chapter", Some(Destination::named("chapter"))),
        ];

        let index = resolve_outline(&doc, &outline).await;
        assert_eq!(index.page_numbers().collect::<Vec<_>>(), vec![3]);
        assert_eq!(index.position_count(), 1);
        assert_eq!(index.get(3).unwrap()[0].title, "Chapter");
    }

    #[tokio::test]
    async fn test_nested_children_are_visited() {
        let doc = DestinationsOnly::new(10, &[]);
        let outline = vec![OutlineNode::new("Part", Some(Destination::explicit(0, 0)))
            .with_children(vec![
                OutlineNode::new("1", Some(Destination::explicit(1, 0))),
                OutlineNode::new("No dest", None).with_children(vec![OutlineNode::new(
                    "1.1",
                    Some(Destination::explicit(1, 0).at(72.0, 700.0)),
                )]),
            ])];

        let index = resolve_outline(&doc, &outline).await;
        assert_eq!(index.page_numbers().collect::<Vec<_>>(), vec![1, 2]);
        let page_two = index.get(2).unwrap();
        assert_eq!(page_two.len(), 2);
        let nested = page_two.iter().find(|p| p.title == "1.1").unwrap();
        assert_eq!(nested.left_point, 72.0);
        assert_eq!(nested.bottom_point, 700.0);
    }

    #[tokio::test]
    async fn test_deep_outline_does_not_overflow() {
        let doc = DestinationsOnly::new(1, &[]);
        let mut node = OutlineNode::new("leaf", Some(Destination::explicit(0, 0)));
        for depth in 0..50_000 {
            node = OutlineNode::new(format!("level {}", depth), None).with_children(vec![node]);
        }
        let outline = vec![node];

        let index = resolve_outline(&doc, &outline).await;
        assert_eq!(index.position_count(), 1);

        // Dropping a 50k-deep tree recursively would itself overflow; unwind it.
        let mut stack = outline;
        while let Some(mut n) = stack.pop() {
            stack.append(&mut n.items);
        }
    }

    #[tokio::test]
    async fn test_lookups_are_concurrent() {
        let doc = DestinationsOnly::new(10, &[]);
        let outline: Vec<_> = (0..8)
            .map(|i| OutlineNode::new(format!("{}", i), Some(Destination::explicit(i, 0))))
            .collect();

        let index = resolve_outline(&doc, &outline).await;
        assert_eq!(index.len(), 8);
        assert!(doc.max_in_flight.load(Ordering::SeqCst) > 1);
    }

    #[tokio::test]
    async fn test_out_of_range_index_is_dropped() {
        let doc = DestinationsOnly::new(2, &[]);
        let outline = vec![OutlineNode::new("Far", Some(Destination::explicit(7, 0)))];
        let index = resolve_outline(&doc, &outline).await;
        assert!(index.is_empty());
    }

    #[tokio::test]
    async fn test_missing_coordinates_default_to_page_top_left() {
        let doc = DestinationsOnly::new(1, &[("intro", 0)]);
        let index = load_outline(&doc).await.unwrap();
        let position = &index.get(1).unwrap()[0];
        assert_eq!(position.document_point(), DocumentPoint { x: 0.0, y: 792.0 });
    }

    #[test]
    fn test_index_clone_shares_data() {
        let index = OutlineIndex::default();
        let clone = index.clone();
        assert!(index.ptr_eq(&clone));
    }

    #[test]
    fn test_destination_ref_display() {
        assert_eq!(DestinationRef::Named("toc".into()).to_string(), "#toc");
        assert_eq!(
            DestinationRef::Explicit {
                object: 12,
                generation: 0
            }
            .to_string(),
            "12 0 R"
        );
    }
}
