//! Revocable object URLs over encoded page images.

use parking_lot::Mutex;
use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tracing::{debug, warn};
use uuid::Uuid;

/// Handle to an encoded image held by an [`ObjectUrlRegistry`].
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ObjectUrl(Uuid);

impl ObjectUrl {
    pub fn id(&self) -> Uuid {
        self.0
    }
}

impl fmt::Display for ObjectUrl {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "blob:pageview/{}", self.0)
    }
}

/// An encoded raster image.
#[derive(Debug, Clone, PartialEq)]
pub struct EncodedImage {
    pub mime_type: &'static str,
    pub width: u32,
    pub height: u32,
    pub data: Arc<[u8]>,
}

impl EncodedImage {
    pub fn png(width: u32, height: u32, data: Vec<u8>) -> Self {
        Self {
            mime_type: "image/png",
            width,
            height,
            data: data.into(),
        }
    }
}

/// Issues and releases object URLs.
///
/// Every created URL must be revoked exactly once; `live_count` reports
/// URLs that are still held.
#[derive(Debug, Default)]
pub struct ObjectUrlRegistry {
    images: Mutex<HashMap<ObjectUrl, EncodedImage>>,
    created: AtomicUsize,
    revoked: AtomicUsize,
}

impl ObjectUrlRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store an image and hand out a URL for it.
    pub fn create(&self, image: EncodedImage) -> ObjectUrl {
        let url = ObjectUrl(Uuid::new_v4());
        self.images.lock().insert(url.clone(), image);
        self.created.fetch_add(1, Ordering::SeqCst);
        debug!("Created {}", url);
        url
    }

    /// Release a URL. Returns false when it was not live.
    pub fn revoke(&self, url: &ObjectUrl) -> bool {
        if self.images.lock().remove(url).is_some() {
            self.revoked.fetch_add(1, Ordering::SeqCst);
            debug!("Revoked {}", url);
            true
        } else {
            warn!("Revoke of unknown or already revoked {}", url);
            false
        }
    }

    /// Look up the image behind a live URL.
    pub fn get(&self, url: &ObjectUrl) -> Option<EncodedImage> {
        self.images.lock().get(url).cloned()
    }

    /// Number of URLs currently live.
    pub fn live_count(&self) -> usize {
        self.images.lock().len()
    }

    /// Total URLs ever created.
    pub fn created_count(&self) -> usize {
        self.created.load(Ordering::SeqCst)
    }

    /// Total successful revocations.
    pub fn revoked_count(&self) -> usize {
        self.revoked.load(Ordering::SeqCst)
    }
}
