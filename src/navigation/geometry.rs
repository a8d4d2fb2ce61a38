//! Rectangles, directions and the directional candidate search
//!
//! For a move in `direction` from a source rectangle:
//!
//! 1. keep candidates whose center lies strictly on that side of the source center
//! 2. rank by distance to the source's perpendicular centerline (plumb line for
//!    vertical moves, horizon for horizontal moves), then by distance to the
//!    source edge facing the direction of travel
//! 3. the first candidate after a stable sort wins
//!
//! Distances are clamped to zero, so overlapping the centerline (or the edge)
//! counts as a perfect score. Full ties keep their input order.

use crate::input::control::Control;
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;

#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct Point {
    pub x: f32,
    pub y: f32,
}

/// Screen-space bounding box of an element
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct NavRect {
    pub top: f32,
    pub left: f32,
    pub right: f32,
    pub bottom: f32,
    pub width: f32,
    pub height: f32,
    pub center: Point,
}

impl NavRect {
    pub fn new(left: f32, top: f32, width: f32, height: f32) -> Self {
        Self::from_edges(top, left, left + width, top + height)
    }

    pub fn from_edges(top: f32, left: f32, right: f32, bottom: f32) -> Self {
        Self {
            top,
            left,
            right,
            bottom,
            width: right - left,
            height: bottom - top,
            center: Point {
                x: (left + right) / 2.0,
                y: (top + bottom) / 2.0,
            },
        }
    }

    /// Rectangle of the given size around a center point
    pub fn centered(x: f32, y: f32, width: f32, height: f32) -> Self {
        Self::new(x - width / 2.0, y - height / 2.0, width, height)
    }

    pub fn intersects(&self, other: &NavRect) -> bool {
        self.left < other.right
            && self.right > other.left
            && self.top < other.bottom
            && self.bottom > other.top
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Direction {
    Up,
    Down,
    Left,
    Right,
}

impl Direction {
    pub const ALL: [Direction; 4] = [
        Direction::Up,
        Direction::Down,
        Direction::Left,
        Direction::Right,
    ];

    pub fn from_control(control: Control) -> Option<Direction> {
        match control {
            Control::Up => Some(Direction::Up),
            Control::Down => Some(Direction::Down),
            Control::Left => Some(Direction::Left),
            Control::Right => Some(Direction::Right),
            _ => None,
        }
    }

    fn is_vertical(self) -> bool {
        matches!(self, Direction::Up | Direction::Down)
    }
}

/// Candidate center strictly on the `direction` side of the source center
pub fn is_candidate(direction: Direction, from: &NavRect, rect: &NavRect) -> bool {
    match direction {
        Direction::Up => rect.center.y < from.center.y,
        Direction::Down => rect.center.y > from.center.y,
        Direction::Left => rect.center.x < from.center.x,
        Direction::Right => rect.center.x > from.center.x,
    }
}

/// Distance from the near edge of `rect` to the vertical line through the source center
pub fn plumb_line_distance(from: &NavRect, rect: &NavRect) -> f32 {
    let d = if rect.center.x < from.center.x {
        from.center.x - rect.right
    } else {
        rect.left - from.center.x
    };
    d.max(0.0)
}

/// Distance from the near edge of `rect` to the horizontal line through the source center
pub fn horizon_distance(from: &NavRect, rect: &NavRect) -> f32 {
    let d = if rect.center.y < from.center.y {
        from.center.y - rect.bottom
    } else {
        rect.top - from.center.y
    };
    d.max(0.0)
}

/// Distance from `rect` to the source edge facing `direction`
pub fn travel_distance(direction: Direction, from: &NavRect, rect: &NavRect) -> f32 {
    let d = match direction {
        Direction::Up => {
            if rect.center.y < from.center.y {
                from.top - rect.bottom
            } else {
                rect.top - from.top
            }
        }
        Direction::Down => {
            if rect.center.y > from.center.y {
                rect.top - from.bottom
            } else {
                from.bottom - rect.bottom
            }
        }
        Direction::Left => {
            if rect.center.x < from.center.x {
                from.left - rect.right
            } else {
                rect.left - from.left
            }
        }
        Direction::Right => {
            if rect.center.x > from.center.x {
                rect.left - from.right
            } else {
                from.right - rect.right
            }
        }
    };
    d.max(0.0)
}

/// (primary, secondary) sort key of a candidate
pub fn rank(direction: Direction, from: &NavRect, rect: &NavRect) -> (f32, f32) {
    let primary = if direction.is_vertical() {
        plumb_line_distance(from, rect)
    } else {
        horizon_distance(from, rect)
    };
    (primary, travel_distance(direction, from, rect))
}

/// Picks the next focus target among `candidates` (in registration order)
pub fn best_candidate<K>(
    direction: Direction,
    from: &NavRect,
    candidates: impl IntoIterator<Item = (K, NavRect)>,
) -> Option<K> {
    let mut ranked: Vec<(K, (f32, f32))> = candidates
        .into_iter()
        .filter(|(_, rect)| is_candidate(direction, from, rect))
        .map(|(key, rect)| {
            let score = rank(direction, from, &rect);
            (key, score)
        })
        .collect();

    ranked.sort_by(|(_, a), (_, b)| compare_scores(*a, *b));
    ranked.into_iter().next().map(|(key, _)| key)
}

fn compare_scores(a: (f32, f32), b: (f32, f32)) -> Ordering {
    a.0.total_cmp(&b.0).then_with(|| a.1.total_cmp(&b.1))
}
