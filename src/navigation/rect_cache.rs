//! Time-bounded cache of element bounding boxes
//!
//! Layout queries are the expensive part of a navigation pass, and a burst of
//! d-pad presses measures the same elements over and over. Entries are keyed by
//! the element handle, live for a fixed TTL, and are only ever replaced or
//! removed, never edited.

use super::geometry::NavRect;
use super::ElementHandle;
use chrono::{DateTime, Duration, Utc};
use std::collections::HashMap;
use tracing::debug;

/// Source of real element geometry
pub trait LayoutProvider {
    fn measure(&mut self, element: ElementHandle) -> NavRect;
}

#[derive(Clone, Copy, Debug)]
struct CachedRect {
    rect: NavRect,
    expires_at: DateTime<Utc>,
}

#[derive(Debug)]
pub struct RectCache {
    ttl: Duration,
    entries: HashMap<ElementHandle, CachedRect>,
}

impl RectCache {
    pub fn new(ttl: Duration) -> Self {
        Self {
            ttl,
            entries: HashMap::new(),
        }
    }

    /// Cached rectangle of `element`, measured through `layout` when missing or expired
    pub fn get_rect<L: LayoutProvider + ?Sized>(
        &mut self,
        element: ElementHandle,
        layout: &mut L,
        now: DateTime<Utc>,
    ) -> NavRect {
        if let Some(cached) = self.entries.get(&element) {
            if now < cached.expires_at {
                return cached.rect;
            }
        }

        let rect = layout.measure(element);
        self.entries.insert(
            element,
            CachedRect {
                rect,
                expires_at: now + self.ttl,
            },
        );
        rect
    }

    /// Forces the next query for `element` to measure again
    pub fn invalidate(&mut self, element: ElementHandle) -> bool {
        self.entries.remove(&element).is_some()
    }

    /// Drops every expired entry, returns how many were removed
    pub fn sweep(&mut self, now: DateTime<Utc>) -> usize {
        let before = self.entries.len();
        self.entries.retain(|_, cached| now < cached.expires_at);
        let removed = before - self.entries.len();
        if removed > 0 {
            debug!("Rect cache sweep removed {} expired entries", removed);
        }
        removed
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn contains(&self, element: ElementHandle) -> bool {
        self.entries.contains_key(&element)
    }
}
