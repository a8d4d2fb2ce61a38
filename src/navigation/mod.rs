//! Spatial navigation
//!
//! 1. [`geometry`] - rectangles and the directional candidate search
//! 2. [`rect_cache`] - TTL cache in front of the host's layout queries
//! 3. [`nav_grid`] - context stack, registrations and focus bookkeeping

pub mod geometry;
pub mod nav_grid;
pub mod rect_cache;

pub use geometry::{best_candidate, Direction, NavRect, Point};
pub use nav_grid::{
    ContextId, FocusHost, NavGrid, NavigableId, NavigableOptions, Registration, SoundCue,
};
pub use rect_cache::{LayoutProvider, RectCache};

/// Opaque, host-assigned identity of a UI element
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ElementHandle(pub u64);
