//! Growable breadcrumb trail shared between one producer and many readers
//!
//! The trail stores location fixes as projected map points. Fixes that land
//! too close to the previously stored point are dropped for good, so the
//! stored sequence is a lossy, append-only record of where the device went.
//! A bounding rect that contains every stored point is kept alongside and
//! only ever grows.

use crate::geometry::MapRectExt;
use crate::lock::ReadWriteLock;
use crate::utils::{self, Coordinate};
use crate::{DataError, Result};
use geo::{Point, Rect};
use std::sync::atomic::{AtomicU64, Ordering};

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

/// Configuration for a trail
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct TrailConfig {
    /// Fixes at or below this distance from the last stored point are
    /// discarded. Default: 10 m
    pub minimum_separation_meters: f64,
    /// Points reserved up front; the buffer doubles whenever it fills.
    /// Default: 1000
    pub initial_capacity: usize,
    /// Side of the square bounding rect created around the first fix.
    /// Default: 1000 m
    pub initial_extent_meters: f64,
    /// Extra room added on each overrun side when the bounding rect has to
    /// grow. Default: 1000 m
    pub growth_margin_meters: f64,
}

impl Default for TrailConfig {
    fn default() -> Self {
        Self {
            minimum_separation_meters: 10.0,
            initial_capacity: 1000,
            initial_extent_meters: 1000.0,
            growth_margin_meters: 1000.0,
        }
    }
}

impl TrailConfig {
    pub fn validate(&self) -> Result<()> {
        if !(self.minimum_separation_meters.is_finite() && self.minimum_separation_meters >= 0.0) {
            return Err(DataError::InvalidConfig(format!(
                "minimum separation must be a non-negative distance, got {}",
                self.minimum_separation_meters
            )));
        }
        if self.initial_capacity == 0 {
            return Err(DataError::InvalidConfig(
                "initial capacity must be at least 1".to_string(),
            ));
        }
        for (name, meters) in [
            ("initial extent", self.initial_extent_meters),
            ("growth margin", self.growth_margin_meters),
        ] {
            if !(meters.is_finite() && meters > 0.0) {
                return Err(DataError::InvalidConfig(format!(
                    "{name} must be a positive distance, got {meters}"
                )));
            }
        }
        Ok(())
    }
}

/// Outcome of [`CrumbTrail::append`]
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct TrailUpdate {
    /// Rect spanning the new segment, `None` when the fix was discarded
    pub update_rect: Option<Rect<f64>>,
    /// The bounding rect grew; anything published from the old one is stale
    pub bounding_rect_changed: bool,
}

impl TrailUpdate {
    /// Whether the fix was discarded without touching the trail
    #[inline]
    pub fn is_discarded(&self) -> bool {
        self.update_rect.is_none()
    }
}

/// Owned copy of the trail taken under a single lock acquisition
#[derive(Debug, Clone, PartialEq)]
pub struct TrailSnapshot {
    pub points: Vec<Point<f64>>,
    pub bounding_rect: Rect<f64>,
}

#[derive(Debug)]
struct TrailState {
    /// Never empty: seeded with the first fix
    points: Vec<Point<f64>>,
    bounding_rect: Rect<f64>,
}

impl TrailState {
    /// Double the buffer when it is full, reporting allocation failure
    fn reserve_for_push(&mut self) -> Result<()> {
        let capacity = self.points.capacity();
        if self.points.len() == capacity {
            self.points.try_reserve_exact(capacity.max(1))?;
            tracing::debug!(
                from = capacity,
                to = self.points.capacity(),
                "grew trail point buffer"
            );
        }
        Ok(())
    }
}

/// Append-only trail of projected points guarded by a reader/writer lock
///
/// Exactly one producer is expected to call [`append`](Self::append); the
/// lock still serializes extra producers. Readers go through
/// [`read_points`](Self::read_points) or [`snapshot`](Self::snapshot) and
/// always observe a prefix of the append sequence, never a partial append.
#[derive(Debug)]
pub struct CrumbTrail {
    /// Unique per process, never reused
    id: u64,
    state: ReadWriteLock<TrailState>,
    config: TrailConfig,
}

static NEXT_TRAIL_ID: AtomicU64 = AtomicU64::new(0);

#[cfg_attr(feature = "profiling", profiling::all_functions)]
impl CrumbTrail {
    /// Start a trail at the first fix with the default configuration
    pub fn new(coordinate: Coordinate) -> Result<Self> {
        Self::with_config(coordinate, TrailConfig::default())
    }

    /// Start a trail at the first fix
    ///
    /// The bounding rect starts as a square of `initial_extent_meters`
    /// centered on the fix, clamped to the world.
    pub fn with_config(coordinate: Coordinate, config: TrailConfig) -> Result<Self> {
        config.validate()?;
        let coordinate = coordinate.validate()?;
        let origin = coordinate.to_map_point();

        let mut points = Vec::new();
        points.try_reserve_exact(config.initial_capacity)?;
        points.push(origin);

        let side = config.initial_extent_meters
            * utils::map_units_per_meter_at_latitude(coordinate.latitude);
        let bounding_rect = Rect::centered_square(origin, side)
            .intersection(&utils::world_rect())
            .unwrap_or_else(|| Rect::from_points(origin, origin));

        tracing::debug!(
            latitude = coordinate.latitude,
            longitude = coordinate.longitude,
            ?bounding_rect,
            "started trail"
        );

        Ok(Self {
            id: NEXT_TRAIL_ID.fetch_add(1, Ordering::Relaxed),
            // Nobody can observe the trail before construction returns, so the
            // state above was built without holding the lock.
            state: ReadWriteLock::named("crumb trail", TrailState {
                points,
                bounding_rect,
            }),
            config,
        })
    }

    /// Add a fix to the trail
    ///
    /// The fix is kept only if it lies strictly farther than
    /// `minimum_separation_meters` from the last stored point. A kept fix
    /// reports the rect of its segment; if that segment poked out of the
    /// bounding rect, the rect is grown and `bounding_rect_changed` is set.
    pub fn append(&self, coordinate: Coordinate) -> Result<TrailUpdate> {
        #[cfg(feature = "profiling")]
        profiling::scope!("trail::append");

        let coordinate = coordinate
            .validate()
            .inspect_err(|err| tracing::warn!(%err, "rejecting location fix"))?;
        let candidate = coordinate.to_map_point();

        let mut state = self.state.acquire_write()?;
        let previous = state.points[state.points.len() - 1];

        let meters = utils::meters_between_map_points(previous, candidate);
        if meters <= self.config.minimum_separation_meters {
            tracing::trace!(meters, "fix too close to the last point, discarded");
            return Ok(TrailUpdate::default());
        }

        state.reserve_for_push()?;
        state.points.push(candidate);

        let segment = Rect::from_points(previous, candidate);
        if state.bounding_rect.contains_rect(&segment) {
            tracing::trace!(meters, count = state.points.len(), "appended fix");
            return Ok(TrailUpdate {
                update_rect: Some(segment),
                bounding_rect_changed: false,
            });
        }

        let grown = self.grow_bounds(state.bounding_rect, segment);
        tracing::debug!(from = ?state.bounding_rect, to = ?grown, "grew trail bounding rect");
        state.bounding_rect = grown;

        Ok(TrailUpdate {
            update_rect: Some(segment),
            bounding_rect_changed: true,
        })
    }

    /// Grow `bounds` to cover `overrun`, plus a margin on every overrun side
    ///
    /// The trail tends to keep heading the way it already went, so padding in
    /// that direction avoids regrowing on the next few fixes. Each axis grows
    /// on at most one side per call.
    fn grow_bounds(&self, bounds: Rect<f64>, overrun: Rect<f64>) -> Rect<f64> {
        let united = bounds.union(&overrun);
        let (mut min, mut max) = (united.min(), united.max());

        // The overrunning segment's center latitude scales the whole margin
        let latitude = Coordinate::from_map_point(overrun.center().into()).latitude;
        let margin =
            self.config.growth_margin_meters * utils::map_units_per_meter_at_latitude(latitude);

        if overrun.min().y < bounds.min().y {
            min.y -= margin;
        } else if overrun.max().y > bounds.max().y {
            max.y += margin;
        }

        if overrun.min().x < bounds.min().x {
            min.x -= margin;
        } else if overrun.max().x > bounds.max().x {
            max.x += margin;
        }

        Rect::new(min, max)
            .intersection(&utils::world_rect())
            .unwrap_or(united)
    }

    /// Run `f` over the stored points while no writer can change them
    ///
    /// This is the only way to look at the trail contents in place. The
    /// point count is the slice length. Keep `f` short: the producer waits
    /// for it.
    pub fn read_points<R>(&self, f: impl FnOnce(&[Point<f64>]) -> R) -> Result<R> {
        self.state.scoped_read(|state| f(&state.points))
    }

    /// Copy out the points and the bounding rect as one consistent view
    pub fn snapshot(&self) -> Result<TrailSnapshot> {
        self.state.scoped_read(|state| TrailSnapshot {
            points: state.points.clone(),
            bounding_rect: state.bounding_rect,
        })
    }

    /// Current bounding rect; contains every stored point
    pub fn bounding_rect(&self) -> Result<Rect<f64>> {
        self.state.scoped_read(|state| state.bounding_rect)
    }

    /// Coordinate of the first fix, standing in for the whole trail
    pub fn coordinate(&self) -> Result<Coordinate> {
        self.read_points(|points| Coordinate::from_map_point(points[0]))
    }

    /// Number of stored points, at least 1
    pub fn point_count(&self) -> Result<usize> {
        self.read_points(|points| points.len())
    }

    /// Allocated room in the point buffer
    pub fn capacity(&self) -> Result<usize> {
        self.state.scoped_read(|state| state.points.capacity())
    }

    #[inline]
    /// Identity that outlives the trail's address, for keying caches
    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn config(&self) -> &TrailConfig {
        &self.config
    }
}
