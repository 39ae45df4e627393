//! Planar geometry in projected meters.
//!
//! Shards, viewports and features are placed on a flat plane whose unit is
//! one meter. Shortest distances on that plane stand in for distances on
//! the Earth; shard ordering only needs a consistent metric.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct Point {
    pub x: f64,
    pub y: f64,
}

impl Point {
    pub fn new(x: f64, y: f64) -> Self {
        Self { x, y }
    }

    pub fn distance(&self, other: &Point) -> f64 {
        (self.x - other.x).hypot(self.y - other.y)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Rect {
    pub min_x: f64,
    pub min_y: f64,
    pub max_x: f64,
    pub max_y: f64,
}

impl Rect {
    pub fn new(min_x: f64, min_y: f64, max_x: f64, max_y: f64) -> Self {
        Self {
            min_x,
            min_y,
            max_x,
            max_y,
        }
    }

    /// Square of side `2 * radius` centered at `center`.
    pub fn from_center_and_radius(center: Point, radius: f64) -> Self {
        Self::new(
            center.x - radius,
            center.y - radius,
            center.x + radius,
            center.y + radius,
        )
    }

    pub fn is_valid(&self) -> bool {
        self.min_x <= self.max_x && self.min_y <= self.max_y
    }

    pub fn center(&self) -> Point {
        Point::new(
            (self.min_x + self.max_x) / 2.0,
            (self.min_y + self.max_y) / 2.0,
        )
    }

    pub fn area(&self) -> f64 {
        if self.is_valid() {
            (self.max_x - self.min_x) * (self.max_y - self.min_y)
        } else {
            0.0
        }
    }

    pub fn contains(&self, p: &Point) -> bool {
        self.min_x <= p.x
            && p.x <= self.max_x
            && self.min_y <= p.y
            && p.y <= self.max_y
    }

    pub fn intersects(&self, other: &Rect) -> bool {
        self.min_x <= other.max_x
            && other.min_x <= self.max_x
            && self.min_y <= other.max_y
            && other.min_y <= self.max_y
    }

    pub fn intersection(&self, other: &Rect) -> Option<Rect> {
        if !self.intersects(other) {
            return None;
        }
        Some(Rect::new(
            self.min_x.max(other.min_x),
            self.min_y.max(other.min_y),
            self.max_x.min(other.max_x),
            self.max_y.min(other.max_y),
        ))
    }

    /// Shortest distance from `p` to this rect; zero when `p` is inside.
    pub fn distance_to(&self, p: &Point) -> f64 {
        let dx = (self.min_x - p.x).max(0.0).max(p.x - self.max_x);
        let dy = (self.min_y - p.y).max(0.0).max(p.y - self.max_y);
        dx.hypot(dy)
    }

    /// Bit-exact key for caches.
    pub fn key(&self) -> [u64; 4] {
        [
            self.min_x.to_bits(),
            self.min_y.to_bits(),
            self.max_x.to_bits(),
            self.max_y.to_bits(),
        ]
    }
}

/// Fraction of the smaller rect's area covered by the intersection of the
/// two rects.
pub fn similarity(pivot: &Rect, rect: &Rect) -> f64 {
    let area = pivot.area().min(rect.area());
    if area == 0.0 {
        return 0.0;
    }
    pivot
        .intersection(rect)
        .map_or(0.0, |common| common.area() / area)
}

/// Approximate radius, in meters, of a settlement with the given
/// population.
pub fn radius_by_population(population: u64) -> f64 {
    (population.max(1) as f64).powf(1.0 / 3.6) * 550.0
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn distance_is_zero_inside() {
        let rect = Rect::new(0.0, 0.0, 10.0, 10.0);
        assert_eq!(rect.distance_to(&Point::new(5.0, 5.0)), 0.0);
        assert_eq!(rect.distance_to(&Point::new(13.0, 14.0)), 5.0);
        assert_eq!(rect.distance_to(&Point::new(-2.0, 5.0)), 2.0);
    }

    #[test]
    fn similarity_of_nested_rects_is_one() {
        let big = Rect::new(0.0, 0.0, 10.0, 10.0);
        let small = Rect::new(2.0, 2.0, 4.0, 4.0);
        assert_eq!(similarity(&big, &small), 1.0);
        assert_eq!(similarity(&big, &Rect::new(20.0, 20.0, 30.0, 30.0)), 0.0);
    }

    #[test]
    fn radius_grows_with_population() {
        assert_eq!(radius_by_population(0), 550.0);
        assert!(radius_by_population(1_000_000) > radius_by_population(1_000));
    }

    #[test]
    fn rect_by_radius_is_centered() {
        let rect = Rect::from_center_and_radius(Point::new(5.0, 5.0), 2.0);
        assert_eq!(rect.center(), Point::new(5.0, 5.0));
        assert_eq!(rect.area(), 16.0);
    }
}
