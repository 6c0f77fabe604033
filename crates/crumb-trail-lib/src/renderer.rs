//! Viewport-simplified rendering of a crumb trail
//!
//! Drawing every accumulated point each frame gets slow as the trail grows.
//! The renderer instead walks a snapshot once, drops points that would land
//! within a few pixels of the previously kept one, and skips segments that
//! miss the viewport, so the output scales with what is visible.

use crate::geometry::MapRectExt;
use crate::trail::CrumbTrail;
use crate::{DataError, Result};
use geo::{BoundingRect, Coord, LineString, MultiLineString, Point, Rect};
use lru::LruCache;
use rayon::prelude::*;
use std::num::NonZeroUsize;
use std::sync::{Arc, Mutex, PoisonError};

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

/// Configuration for trail rendering
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct RenderConfig {
    /// Points closer than this many screen pixels to the last kept point are
    /// elided. Default: 5.0
    pub min_point_delta_pixels: f64,
    /// Stroke width on screen. Default: 4.0
    pub line_width_pixels: f64,
    /// Rendered paths kept per renderer, 0 disables caching. Default: 64
    pub cache_capacity: usize,
}

impl Default for RenderConfig {
    fn default() -> Self {
        Self {
            min_point_delta_pixels: 5.0,
            line_width_pixels: 4.0,
            cache_capacity: 64,
        }
    }
}

/// A simplified, drawable trail: one line string per continuous stroke
#[derive(Debug, Clone, PartialEq)]
pub struct TrailPath {
    lines: MultiLineString<f64>,
    line_width: f64,
}

impl TrailPath {
    /// Continuous strokes; the pen lifts between them
    #[inline]
    pub fn subpaths(&self) -> &[LineString<f64>] {
        &self.lines.0
    }

    #[inline]
    pub fn subpath_count(&self) -> usize {
        self.lines.0.len()
    }

    /// Number of drawn line segments across all strokes
    pub fn segment_count(&self) -> usize {
        self.lines
            .0
            .iter()
            .map(|line| line.0.len().saturating_sub(1))
            .sum()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.lines.0.is_empty()
    }

    /// Stroke width in map units at the zoom scale the path was built for
    #[inline]
    pub fn line_width(&self) -> f64 {
        self.line_width
    }

    #[inline]
    pub fn as_multi_line_string(&self) -> &MultiLineString<f64> {
        &self.lines
    }

    pub fn bounding_rect(&self) -> Option<Rect<f64>> {
        self.lines.bounding_rect()
    }
}

/// Cache key for rendered paths
#[derive(Hash, Eq, PartialEq, Clone, Copy, Debug)]
struct RenderCacheKey {
    trail_id: u64,
    viewport: [u64; 4],
    zoom_bits: u64,
}

impl RenderCacheKey {
    fn new(trail: &CrumbTrail, viewport: Rect<f64>, zoom_scale: f64) -> Self {
        let (min, max) = (viewport.min(), viewport.max());
        Self {
            trail_id: trail.id(),
            viewport: [
                min.x.to_bits(),
                min.y.to_bits(),
                max.x.to_bits(),
                max.y.to_bits(),
            ],
            zoom_bits: zoom_scale.to_bits(),
        }
    }
}

#[derive(Clone)]
struct CachedPath {
    /// Trail length the path was built from; the trail only grows
    point_count: usize,
    path: Option<Arc<TrailPath>>,
}

/// Turns trail snapshots into simplified paths for a viewport
///
/// The renderer keeps no reference to a trail: each call borrows one, so a
/// renderer can never outlive the trail it draws. Cached paths are keyed by
/// [`CrumbTrail::id`], so a new trail never sees another trail's paths even
/// when it lands at a freed trail's address. Owners still call
/// [`invalidate`](Self::invalidate) when they republish or replace a trail to
/// free the memory.
pub struct TrailRenderer {
    config: RenderConfig,
    cache: Option<Mutex<LruCache<RenderCacheKey, CachedPath>>>,
}

#[cfg_attr(feature = "profiling", profiling::all_functions)]
impl TrailRenderer {
    pub fn new(config: RenderConfig) -> Self {
        let cache = NonZeroUsize::new(config.cache_capacity)
            .map(|capacity| Mutex::new(LruCache::new(capacity)));
        Self { config, cache }
    }

    #[inline]
    pub fn config(&self) -> &RenderConfig {
        &self.config
    }

    /// Stroke width in map units at `zoom_scale` (screen pixels per map unit)
    ///
    /// Constant on screen, so it shrinks in map units as the view zooms in.
    pub fn line_width_at_zoom_scale(&self, zoom_scale: f64) -> Result<f64> {
        if !(zoom_scale.is_finite() && zoom_scale > 0.0) {
            return Err(DataError::InvalidZoomScale(zoom_scale));
        }
        Ok(self.config.line_width_pixels / zoom_scale)
    }

    /// Build the path for `viewport` at `zoom_scale`
    ///
    /// Returns `None` when the trail has a single point or no segment touches
    /// the viewport (outset by the line width, so strokes just outside the
    /// edge still draw).
    pub fn render(
        &self,
        trail: &CrumbTrail,
        viewport: Rect<f64>,
        zoom_scale: f64,
    ) -> Result<Option<Arc<TrailPath>>> {
        #[cfg(feature = "profiling")]
        profiling::scope!("renderer::render");

        let line_width = self.line_width_at_zoom_scale(zoom_scale)?;
        let clip = viewport.inset(-line_width, -line_width);
        let min_delta = self.config.min_point_delta_pixels / zoom_scale;
        let key = RenderCacheKey::new(trail, viewport, zoom_scale);

        trail.read_points(|points| {
            if let Some(hit) = self.cached(&key, points.len()) {
                tracing::trace!(count = points.len(), "render cache hit");
                return hit;
            }

            let path = simplify(points, &clip, min_delta * min_delta)
                .map(|lines| Arc::new(TrailPath { lines, line_width }));
            tracing::trace!(
                count = points.len(),
                segments = path.as_ref().map_or(0, |p| p.segment_count()),
                "rendered trail"
            );

            self.store(key, points.len(), path.clone());
            path
        })
    }

    /// Render `viewport` as a grid of `tiles_per_side`² tiles in parallel
    ///
    /// Each tile is an independent render request, the way a tiled map
    /// overlay draws. Tiles come back in row-major order.
    pub fn render_tiles(
        &self,
        trail: &CrumbTrail,
        viewport: Rect<f64>,
        zoom_scale: f64,
        tiles_per_side: usize,
    ) -> Result<Vec<(Rect<f64>, Option<Arc<TrailPath>>)>> {
        #[cfg(feature = "profiling")]
        profiling::scope!("renderer::render_tiles");

        if tiles_per_side == 0 {
            return Err(DataError::InvalidConfig(
                "tiles per side must be at least 1".to_string(),
            ));
        }

        tile_grid(viewport, tiles_per_side)
            .into_par_iter()
            .map(|tile| -> Result<_> { Ok((tile, self.render(trail, tile, zoom_scale)?)) })
            .collect()
    }

    /// Drop every cached path
    pub fn invalidate(&self) {
        if let Some(cache) = &self.cache {
            let mut cache = cache.lock().unwrap_or_else(PoisonError::into_inner);
            tracing::debug!(entries = cache.len(), "invalidating render cache");
            cache.clear();
        }
    }

    fn cached(&self, key: &RenderCacheKey, point_count: usize) -> Option<Option<Arc<TrailPath>>> {
        let cache = self.cache.as_ref()?;
        // A panic elsewhere cannot leave a half-written entry behind
        let mut cache = cache.lock().unwrap_or_else(PoisonError::into_inner);
        cache
            .get(key)
            .filter(|entry| entry.point_count == point_count)
            .map(|entry| entry.path.clone())
    }

    fn store(&self, key: RenderCacheKey, point_count: usize, path: Option<Arc<TrailPath>>) {
        if let Some(cache) = &self.cache {
            let mut cache = cache.lock().unwrap_or_else(PoisonError::into_inner);
            cache.put(key, CachedPath { point_count, path });
        }
    }
}

impl Default for TrailRenderer {
    fn default() -> Self {
        Self::new(RenderConfig::default())
    }
}

/// Split `viewport` into a `per_side` × `per_side` grid, row-major
fn tile_grid(viewport: Rect<f64>, per_side: usize) -> Vec<Rect<f64>> {
    let (min, max) = (viewport.min(), viewport.max());
    let step_x = viewport.width() / per_side as f64;
    let step_y = viewport.height() / per_side as f64;
    // Last row/column snaps to the viewport edge so no sliver is lost
    let edge = |i: usize, origin: f64, step: f64, end: f64| {
        if i == per_side {
            end
        } else {
            origin + step * i as f64
        }
    };

    (0..per_side)
        .flat_map(|row| (0..per_side).map(move |col| (row, col)))
        .map(|(row, col)| {
            Rect::new(
                Coord {
                    x: edge(col, min.x, step_x, max.x),
                    y: edge(row, min.y, step_y, max.y),
                },
                Coord {
                    x: edge(col + 1, min.x, step_x, max.x),
                    y: edge(row + 1, min.y, step_y, max.y),
                },
            )
        })
        .collect()
}

/// Collects strokes, lifting the pen whenever a segment is skipped
#[derive(Default)]
struct PathBuilder {
    lines: Vec<LineString<f64>>,
    current: Vec<Coord<f64>>,
}

impl PathBuilder {
    fn segment(&mut self, from: Point<f64>, to: Point<f64>, clip: &Rect<f64>) {
        if !clip.intersects_rect(&Rect::from_points(from, to)) {
            // Off screen: the next drawn segment must not connect back to here
            self.lift_pen();
            return;
        }
        if self.current.is_empty() {
            self.current.push(from.0);
        }
        self.current.push(to.0);
    }

    fn lift_pen(&mut self) {
        if !self.current.is_empty() {
            self.lines
                .push(LineString::new(std::mem::take(&mut self.current)));
        }
    }

    fn finish(mut self) -> Option<MultiLineString<f64>> {
        self.lift_pen();
        (!self.lines.is_empty()).then(|| MultiLineString::new(self.lines))
    }
}

/// Anchor-based simplification clipped to `clip`
///
/// A point is kept when it is at least `min_delta_sq` (squared map units)
/// away from the last kept point; each kept point closes a segment that is
/// drawn if its bounding box touches `clip`. The segment into the final point
/// is always considered so the trail's head never disappears.
fn simplify(
    points: &[Point<f64>],
    clip: &Rect<f64>,
    min_delta_sq: f64,
) -> Option<MultiLineString<f64>> {
    let (&first, rest) = points.split_first()?;
    let &last = rest.last()?;

    let mut builder = PathBuilder::default();
    let mut anchor = first;
    let mut anchor_is_last = false;

    for (i, &point) in rest.iter().enumerate() {
        let (dx, dy) = (point.x() - anchor.x(), point.y() - anchor.y());
        if dx * dx + dy * dy < min_delta_sq {
            continue;
        }
        builder.segment(anchor, point, clip);
        anchor = point;
        anchor_is_last = i + 1 == rest.len();
    }

    if !anchor_is_last {
        builder.segment(anchor, last, clip);
    }

    builder.finish()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::trail::tests::{east_of, london, north_of};
    use crate::utils::{self, Coordinate};
    use std::thread;

    /// Rect around `origin` given in real meters
    fn viewport_meters(
        origin: Coordinate,
        west: f64,
        south: f64,
        east: f64,
        north: f64,
    ) -> Rect<f64> {
        Rect::from_points(
            east_of(north_of(origin, south), west).to_map_point(),
            east_of(north_of(origin, north), east).to_map_point(),
        )
    }

    fn straight_trail(steps: usize, step_meters: f64) -> CrumbTrail {
        let trail = CrumbTrail::new(london()).unwrap();
        for i in 1..=steps {
            trail
                .append(east_of(london(), step_meters * i as f64))
                .unwrap();
        }
        trail
    }

    fn everything(trail: &CrumbTrail) -> Rect<f64> {
        trail.bounding_rect().unwrap()
    }

    #[test]
    fn test_single_point_renders_nothing() {
        let trail = CrumbTrail::new(london()).unwrap();
        let renderer = TrailRenderer::default();
        assert!(renderer.render(&trail, everything(&trail), 1.0).unwrap().is_none());
    }

    #[test]
    fn test_disjoint_viewport_renders_nothing() {
        let trail = straight_trail(20, 50.0);
        let renderer = TrailRenderer::default();
        let far_away = viewport_meters(london(), -5000.0, 4000.0, -4000.0, 5000.0);
        assert!(renderer.render(&trail, far_away, 1.0).unwrap().is_none());
    }

    #[test]
    fn test_full_viewport_draws_every_segment_when_zoomed_in() {
        let trail = straight_trail(30, 50.0);
        let count = trail.point_count().unwrap();
        let renderer = TrailRenderer::default();

        let path = renderer.render(&trail, everything(&trail), 10.0).unwrap().unwrap();
        assert_eq!(path.subpath_count(), 1);
        assert_eq!(path.segment_count(), count - 1);
        assert!((path.line_width() - 0.4).abs() < 1e-12);
    }

    #[test]
    fn test_zoomed_out_elides_points_but_keeps_head() {
        let trail = straight_trail(200, 15.0);
        let count = trail.point_count().unwrap();
        let renderer = TrailRenderer::default();

        // 0.05 px per map unit: points closer than 100 map units collapse
        let path = renderer.render(&trail, everything(&trail), 0.05).unwrap().unwrap();
        assert!(path.segment_count() < count - 1);
        assert!(path.segment_count() >= 1);

        let head = trail.read_points(|points| points[points.len() - 1]).unwrap();
        let drawn_head = path.subpaths().last().and_then(|line| line.0.last().copied());
        assert_eq!(drawn_head, Some(head.0));
    }

    #[test]
    fn test_segment_count_bounded_by_point_count() {
        let trail = CrumbTrail::new(london()).unwrap();
        for fix in crate::trail::tests::wandering_walk(london(), 400) {
            trail.append(fix).unwrap();
        }
        let count = trail.point_count().unwrap();
        let renderer = TrailRenderer::default();
        for zoom in [0.001, 0.01, 0.1, 1.0, 10.0] {
            if let Some(path) = renderer.render(&trail, everything(&trail), zoom).unwrap() {
                assert!(path.segment_count() <= count - 1);
            }
        }
    }

    #[test]
    fn test_off_screen_excursion_splits_stroke() {
        // out east along the bottom, up 500 m far outside the view, back west
        let trail = CrumbTrail::new(london()).unwrap();
        for i in 1..=30 {
            trail.append(east_of(london(), 100.0 * i as f64)).unwrap();
        }
        let top = north_of(london(), 500.0);
        for i in (0..=30).rev() {
            trail.append(east_of(top, 100.0 * i as f64)).unwrap();
        }

        let viewport = viewport_meters(london(), -200.0, -100.0, 1000.0, 600.0);
        let renderer = TrailRenderer::default();
        let path = renderer.render(&trail, viewport, 1.0).unwrap().unwrap();

        assert_eq!(path.subpath_count(), 2);
        let jump_limit = 300.0 * utils::map_units_per_meter_at_latitude(london().latitude);
        for line in path.subpaths() {
            for pair in line.0.windows(2) {
                let (dx, dy) = (pair[1].x - pair[0].x, pair[1].y - pair[0].y);
                assert!((dx * dx + dy * dy).sqrt() < jump_limit, "spurious connecting line");
            }
        }
    }

    #[test]
    fn test_simplify_skips_close_points_from_anchor() {
        let points: Vec<Point<f64>> = [0.0, 1.0, 2.0, 3.0, 10.0, 10.5]
            .iter()
            .map(|x| Point::new(*x, 0.0))
            .collect();
        let clip = Rect::from_points(Point::new(-1.0, -1.0), Point::new(20.0, 1.0));
        // min delta 2.5: keep 3 (from 0), keep 10, skip 10.5 then force the head
        let lines = simplify(&points, &clip, 2.5 * 2.5).unwrap();
        let xs: Vec<f64> = lines.0[0].0.iter().map(|c| c.x).collect();
        assert_eq!(xs, vec![0.0, 3.0, 10.0, 10.5]);
    }

    #[test]
    fn test_simplify_head_not_duplicated() {
        let points = vec![Point::new(0.0, 0.0), Point::new(10.0, 0.0)];
        let clip = Rect::from_points(Point::new(-1.0, -1.0), Point::new(11.0, 1.0));
        let lines = simplify(&points, &clip, 1.0).unwrap();
        assert_eq!(lines.0.len(), 1);
        assert_eq!(lines.0[0].0.len(), 2);
    }

    #[test]
    fn test_cache_hits_until_trail_changes() {
        let trail = straight_trail(10, 50.0);
        let renderer = TrailRenderer::default();
        let viewport = viewport_meters(london(), -2000.0, -2000.0, 2000.0, 2000.0);

        let first = renderer.render(&trail, viewport, 1.0).unwrap().unwrap();
        let second = renderer.render(&trail, viewport, 1.0).unwrap().unwrap();
        assert!(Arc::ptr_eq(&first, &second));

        trail.append(east_of(london(), 600.0)).unwrap();
        let third = renderer.render(&trail, viewport, 1.0).unwrap().unwrap();
        assert!(!Arc::ptr_eq(&first, &third));
        assert_eq!(third.segment_count(), first.segment_count() + 1);

        renderer.invalidate();
        let fourth = renderer.render(&trail, viewport, 1.0).unwrap().unwrap();
        assert!(!Arc::ptr_eq(&third, &fourth));
        assert_eq!(*third, *fourth);
    }

    #[test]
    fn test_cache_keeps_trails_apart() {
        let renderer = TrailRenderer::default();
        let viewport = viewport_meters(london(), -500.0, -500.0, 500.0, 500.0);

        // Same viewport, zoom and point count; only the geometry differs
        let eastward = CrumbTrail::new(london()).unwrap();
        eastward.append(east_of(london(), 100.0)).unwrap();
        let east_path = renderer.render(&eastward, viewport, 1.0).unwrap().unwrap();
        drop(eastward);

        let northward = CrumbTrail::new(london()).unwrap();
        northward.append(north_of(london(), 100.0)).unwrap();
        let north_path = renderer.render(&northward, viewport, 1.0).unwrap().unwrap();

        assert!(!Arc::ptr_eq(&east_path, &north_path));
        let head = northward.read_points(|points| points[1]).unwrap();
        assert_eq!(north_path.subpaths()[0].0.last().copied(), Some(head.0));
    }

    #[test]
    fn test_restarted_session_renders_its_own_trail() {
        use crate::session::{Config, TrackingSession};

        let mut session = TrackingSession::new(Config::default());
        let renderer = session.renderer();
        let viewport = viewport_meters(london(), -500.0, -500.0, 500.0, 500.0);

        session.record_location(london()).unwrap();
        session.record_location(east_of(london(), 100.0)).unwrap();
        let finished = session.stop().unwrap();
        // A reader still holding the old trail refills the cache after stop
        renderer.render(&finished, viewport, 1.0).unwrap();
        drop(finished);

        session.record_location(london()).unwrap();
        session.record_location(north_of(london(), 100.0)).unwrap();
        let trail = session.trail().unwrap();
        let path = renderer.render(&trail, viewport, 1.0).unwrap().unwrap();

        let expected = trail.read_points(|points| points.to_vec()).unwrap();
        let drawn: Vec<Point<f64>> = path.subpaths()[0].0.iter().map(|c| Point(*c)).collect();
        assert_eq!(drawn, expected);
    }

    #[test]
    fn test_cache_disabled() {
        let trail = straight_trail(10, 50.0);
        let renderer = TrailRenderer::new(RenderConfig {
            cache_capacity: 0,
            ..RenderConfig::default()
        });
        let a = renderer.render(&trail, everything(&trail), 1.0).unwrap().unwrap();
        let b = renderer.render(&trail, everything(&trail), 1.0).unwrap().unwrap();
        assert!(!Arc::ptr_eq(&a, &b));
        assert_eq!(*a, *b);
    }

    #[test]
    fn test_line_width_shrinks_with_zoom() {
        let renderer = TrailRenderer::default();
        let near = renderer.line_width_at_zoom_scale(4.0).unwrap();
        let far = renderer.line_width_at_zoom_scale(0.5).unwrap();
        assert!(near < far);
        assert!(matches!(
            renderer.line_width_at_zoom_scale(0.0),
            Err(DataError::InvalidZoomScale(_))
        ));
        assert!(renderer.line_width_at_zoom_scale(f64::NAN).is_err());
        let trail = straight_trail(3, 50.0);
        assert!(renderer.render(&trail, everything(&trail), -1.0).is_err());
    }

    #[test]
    fn test_tile_grid_covers_viewport() {
        let viewport = Rect::from_points(Point::new(0.0, 0.0), Point::new(9.0, 6.0));
        let tiles = tile_grid(viewport, 3);
        assert_eq!(tiles.len(), 9);
        assert_eq!(tiles[0].min(), viewport.min());
        assert_eq!(tiles[8].max(), viewport.max());
        let area: f64 = tiles.iter().map(|t| t.width() * t.height()).sum();
        assert!((area - 54.0).abs() < 1e-9);
    }

    #[test]
    fn test_render_tiles_in_parallel() {
        let trail = straight_trail(40, 50.0);
        let count = trail.point_count().unwrap();
        let renderer = TrailRenderer::default();
        let tiles = renderer
            .render_tiles(&trail, everything(&trail), 1.0, 4)
            .unwrap();
        assert_eq!(tiles.len(), 16);
        let drawn: Vec<_> = tiles.iter().filter_map(|(_, path)| path.as_ref()).collect();
        assert!(!drawn.is_empty());
        for path in drawn {
            assert!(path.segment_count() <= count - 1);
        }
        assert!(renderer.render_tiles(&trail, everything(&trail), 1.0, 0).is_err());
    }

    #[test]
    fn test_render_while_appending() {
        let trail = Arc::new(CrumbTrail::new(london()).unwrap());
        let renderer = Arc::new(TrailRenderer::default());
        let viewport = viewport_meters(london(), -1000.0, -1000.0, 30000.0, 1000.0);

        let producer = {
            let trail = Arc::clone(&trail);
            thread::spawn(move || {
                for i in 1..=1500 {
                    trail.append(east_of(london(), 20.0 * i as f64)).unwrap();
                }
            })
        };
        let painters: Vec<_> = (0..3)
            .map(|_| {
                let trail = Arc::clone(&trail);
                let renderer = Arc::clone(&renderer);
                thread::spawn(move || {
                    for _ in 0..200 {
                        if let Some(path) = renderer.render(&trail, viewport, 0.5).unwrap() {
                            assert!(path.segment_count() < trail.point_count().unwrap());
                        }
                    }
                })
            })
            .collect();

        producer.join().unwrap();
        for painter in painters {
            painter.join().unwrap();
        }

        let path = renderer.render(&trail, viewport, 0.5).unwrap().unwrap();
        let head = trail.read_points(|points| points[points.len() - 1]).unwrap();
        assert_eq!(path.subpaths().last().and_then(|l| l.0.last().copied()), Some(head.0));
    }
}
