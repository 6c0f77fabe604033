//! Axis-aligned rectangle arithmetic in map space
//!
//! `geo::Rect` already normalizes its corners, so width and height are never
//! negative. The helpers here treat rectangles as closed intervals: a
//! zero-sized rect behaves like a point (or a segment) and touching edges
//! count as intersecting.

use geo::{Coord, Point, Rect};

/// Rectangle operations the trail and its renderer rely on
pub trait MapRectExt: Sized {
    /// The minimal rect containing both points
    fn from_points(a: Point<f64>, b: Point<f64>) -> Self;
    /// A square of side `side` centered on `center`
    fn centered_square(center: Point<f64>, side: f64) -> Self;
    fn union(&self, other: &Self) -> Self;
    /// `None` when the rects do not overlap (touching edges do overlap)
    fn intersection(&self, other: &Self) -> Option<Self>;
    fn contains_rect(&self, other: &Self) -> bool;
    fn contains_point(&self, point: Point<f64>) -> bool;
    fn intersects_rect(&self, other: &Self) -> bool;
    /// Shrink each side by `dx`/`dy`; negative values grow the rect.
    /// Over-shrinking collapses to the center instead of inverting.
    fn inset(&self, dx: f64, dy: f64) -> Self;
}

impl MapRectExt for Rect<f64> {
    fn from_points(a: Point<f64>, b: Point<f64>) -> Self {
        Rect::new(a.0, b.0)
    }

    fn centered_square(center: Point<f64>, side: f64) -> Self {
        let half = side.abs() / 2.0;
        Rect::new(
            Coord {
                x: center.x() - half,
                y: center.y() - half,
            },
            Coord {
                x: center.x() + half,
                y: center.y() + half,
            },
        )
    }

    fn union(&self, other: &Self) -> Self {
        Rect::new(
            Coord {
                x: self.min().x.min(other.min().x),
                y: self.min().y.min(other.min().y),
            },
            Coord {
                x: self.max().x.max(other.max().x),
                y: self.max().y.max(other.max().y),
            },
        )
    }

    fn intersection(&self, other: &Self) -> Option<Self> {
        if !self.intersects_rect(other) {
            return None;
        }
        Some(Rect::new(
            Coord {
                x: self.min().x.max(other.min().x),
                y: self.min().y.max(other.min().y),
            },
            Coord {
                x: self.max().x.min(other.max().x),
                y: self.max().y.min(other.max().y),
            },
        ))
    }

    fn contains_rect(&self, other: &Self) -> bool {
        self.min().x <= other.min().x
            && self.min().y <= other.min().y
            && self.max().x >= other.max().x
            && self.max().y >= other.max().y
    }

    fn contains_point(&self, point: Point<f64>) -> bool {
        (self.min().x..=self.max().x).contains(&point.x())
            && (self.min().y..=self.max().y).contains(&point.y())
    }

    fn intersects_rect(&self, other: &Self) -> bool {
        self.min().x <= other.max().x
            && other.min().x <= self.max().x
            && self.min().y <= other.max().y
            && other.min().y <= self.max().y
    }

    fn inset(&self, dx: f64, dy: f64) -> Self {
        let center = self.center();
        let half_w = (self.width() / 2.0 - dx).max(0.0);
        let half_h = (self.height() / 2.0 - dy).max(0.0);
        Rect::new(
            Coord {
                x: center.x - half_w,
                y: center.y - half_h,
            },
            Coord {
                x: center.x + half_w,
                y: center.y + half_h,
            },
        )
    }
}
