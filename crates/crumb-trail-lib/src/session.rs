//! Tracking session: location input in, trail updates and redraw hints out
//!
//! A session owns at most one live trail. The first fix creates it, later
//! fixes are appended, and every fix yields a [`SessionEvent`] telling the
//! host what to redraw. Render threads share the trail and the renderer
//! through the `Arc`s handed out by [`TrackingSession::trail`] and
//! [`TrackingSession::renderer`].

use crate::geometry::MapRectExt;
use crate::renderer::{RenderConfig, TrailRenderer};
use crate::trail::{CrumbTrail, TrailConfig};
use crate::utils::{self, Coordinate};
use crate::{DataError, Result};
use geo::{Polygon, Rect};
use std::sync::Arc;

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

/// Session configuration
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct Config {
    pub trail: TrailConfig,
    pub render: RenderConfig,
    /// Half the side of the region framed around the first fix. Default: 2500.0
    pub initial_region_radius_meters: f64,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            trail: TrailConfig::default(),
            render: RenderConfig::default(),
            initial_region_radius_meters: 2500.0,
        }
    }
}

/// What the host should do after a location fix
#[derive(Debug, Clone, PartialEq)]
pub enum SessionEvent {
    /// A new trail was created; frame the map on `region`
    Started { region: Rect<f64> },
    /// The trail bounds grew; the whole overlay must be redrawn
    BoundsChanged {
        bounding_rect: Rect<f64>,
        overlay: Polygon<f64>,
    },
    /// Only `damage` needs redrawing
    Redraw { damage: Rect<f64> },
    /// The fix was too close to the previous one
    Ignored,
}

pub struct TrackingSession {
    config: Config,
    trail: Option<Arc<CrumbTrail>>,
    renderer: Arc<TrailRenderer>,
    bounds_overlay: Option<Polygon<f64>>,
    zoom_scale: f64,
}

#[cfg_attr(feature = "profiling", profiling::all_functions)]
impl TrackingSession {
    pub fn new(config: Config) -> Self {
        let renderer = Arc::new(TrailRenderer::new(config.render.clone()));
        Self {
            config,
            trail: None,
            renderer,
            bounds_overlay: None,
            zoom_scale: 1.0,
        }
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Feed one location fix from the sensor
    pub fn record_location(&mut self, coordinate: Coordinate) -> Result<SessionEvent> {
        let trail = match &self.trail {
            Some(trail) => Arc::clone(trail),
            None => return self.start(coordinate),
        };

        let update = trail.append(coordinate)?;
        if update.bounding_rect_changed {
            // Only this session appends, so the rect cannot move under us here
            let bounding_rect = trail.bounding_rect()?;
            self.renderer.invalidate();
            let overlay = bounding_rect.to_polygon();
            self.bounds_overlay = Some(overlay.clone());
            tracing::debug!(?bounding_rect, "trail bounds changed");
            return Ok(SessionEvent::BoundsChanged {
                bounding_rect,
                overlay,
            });
        }

        match update.update_rect {
            Some(rect) => {
                let width = self.renderer.line_width_at_zoom_scale(self.zoom_scale)?;
                Ok(SessionEvent::Redraw {
                    damage: rect.inset(-width, -width),
                })
            }
            None => Ok(SessionEvent::Ignored),
        }
    }

    fn start(&mut self, coordinate: Coordinate) -> Result<SessionEvent> {
        let trail = CrumbTrail::with_config(coordinate, self.config.trail.clone())?;
        let region = region_around(coordinate, self.config.initial_region_radius_meters)?;
        self.bounds_overlay = Some(trail.bounding_rect()?.to_polygon());
        self.trail = Some(Arc::new(trail));
        tracing::info!(
            latitude = coordinate.latitude,
            longitude = coordinate.longitude,
            "tracking started"
        );
        Ok(SessionEvent::Started { region })
    }

    /// Screen pixels per map unit, used to size redraw damage
    pub fn set_zoom_scale(&mut self, zoom_scale: f64) -> Result<()> {
        self.renderer.line_width_at_zoom_scale(zoom_scale)?;
        self.zoom_scale = zoom_scale;
        Ok(())
    }

    pub fn zoom_scale(&self) -> f64 {
        self.zoom_scale
    }

    pub fn trail(&self) -> Option<Arc<CrumbTrail>> {
        self.trail.clone()
    }

    pub fn renderer(&self) -> Arc<TrailRenderer> {
        Arc::clone(&self.renderer)
    }

    /// Outline of the current trail bounds, for debug overlays
    pub fn bounds_overlay(&self) -> Option<&Polygon<f64>> {
        self.bounds_overlay.as_ref()
    }

    /// End the session. The next fix starts a fresh trail.
    ///
    /// Returns the finished trail so the caller can keep or export it.
    pub fn stop(&mut self) -> Option<Arc<CrumbTrail>> {
        self.bounds_overlay = None;
        self.renderer.invalidate();
        let trail = self.trail.take();
        if let Some(trail) = &trail {
            tracing::info!(points = trail.point_count().ok(), "tracking stopped");
        }
        trail
    }
}

/// Square map region of half-side `radius_meters` around `coordinate`
fn region_around(coordinate: Coordinate, radius_meters: f64) -> Result<Rect<f64>> {
    if !radius_meters.is_finite() || radius_meters <= 0.0 {
        return Err(DataError::InvalidConfig(format!(
            "initial region radius must be positive, got {radius_meters}"
        )));
    }
    let coordinate = coordinate.validate()?;
    let side = 2.0 * radius_meters * utils::map_units_per_meter_at_latitude(coordinate.latitude);
    let region = Rect::centered_square(coordinate.to_map_point(), side);
    Ok(region
        .intersection(&utils::world_rect())
        .unwrap_or(region))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::trail::tests::{east_of, london, north_of};
    use geo::{Area, Coord};

    fn started_session() -> (TrackingSession, Coordinate) {
        let mut session = TrackingSession::new(Config::default());
        let origin = london();
        let event = session.record_location(origin).unwrap();
        assert!(matches!(event, SessionEvent::Started { .. }));
        (session, origin)
    }

    #[test]
    fn test_first_fix_starts_trail() {
        let mut session = TrackingSession::new(Config::default());
        assert!(session.trail().is_none());

        let origin = london();
        let SessionEvent::Started { region } = session.record_location(origin).unwrap() else {
            panic!("expected Started");
        };
        assert!(region.contains_point(origin.to_map_point()));
        let expected = 5000.0 * utils::map_units_per_meter_at_latitude(origin.latitude);
        assert!((region.width() - expected).abs() < 1e-6);
        assert!((region.height() - expected).abs() < 1e-6);

        let trail = session.trail().unwrap();
        assert_eq!(trail.point_count().unwrap(), 1);
        assert!(session.bounds_overlay().is_some());
    }

    #[test]
    fn test_close_fix_is_ignored() {
        let (mut session, origin) = started_session();
        let event = session.record_location(north_of(origin, 3.0)).unwrap();
        assert_eq!(event, SessionEvent::Ignored);
        assert_eq!(session.trail().unwrap().point_count().unwrap(), 1);
    }

    #[test]
    fn test_kept_fix_reports_damage_with_line_width() {
        let (mut session, origin) = started_session();
        session.set_zoom_scale(2.0).unwrap();
        let next = east_of(origin, 50.0);

        let SessionEvent::Redraw { damage } = session.record_location(next).unwrap() else {
            panic!("expected Redraw");
        };
        let segment = Rect::from_points(origin.to_map_point(), next.to_map_point());
        // 4 px at 2 px per map unit is 2 map units on each side
        assert!((damage.width() - (segment.width() + 4.0)).abs() < 1e-6);
        assert!((damage.height() - (segment.height() + 4.0)).abs() < 1e-6);
        assert!(damage.contains_rect(&segment));
    }

    #[test]
    fn test_leaving_bounds_republishes_overlay() {
        let (mut session, origin) = started_session();
        let before = session.trail().unwrap().bounding_rect().unwrap();

        let event = session.record_location(north_of(origin, 800.0)).unwrap();
        let SessionEvent::BoundsChanged {
            bounding_rect,
            overlay,
        } = event
        else {
            panic!("expected BoundsChanged");
        };
        assert!(bounding_rect.contains_rect(&before));
        assert_ne!(bounding_rect, before);
        assert_eq!(session.bounds_overlay(), Some(&overlay));
    }

    #[test]
    fn test_bounds_overlay_spans_all_four_corners() {
        let (mut session, origin) = started_session();
        let SessionEvent::BoundsChanged {
            bounding_rect,
            overlay,
        } = session.record_location(east_of(origin, 900.0)).unwrap()
        else {
            panic!("expected BoundsChanged");
        };

        // A polygon built only from the min and max corners has no area
        let relative = (overlay.unsigned_area() - bounding_rect.width() * bounding_rect.height())
            .abs()
            / overlay.unsigned_area();
        assert!(relative < 1e-9);

        let (min, max) = (bounding_rect.min(), bounding_rect.max());
        let ring = &overlay.exterior().0;
        for corner in [
            min,
            Coord { x: min.x, y: max.y },
            max,
            Coord { x: max.x, y: min.y },
        ] {
            assert!(ring.contains(&corner), "missing corner {corner:?}");
        }
    }

    #[test]
    fn test_stop_then_restart() {
        let (mut session, origin) = started_session();
        session.record_location(east_of(origin, 50.0)).unwrap();

        let finished = session.stop().unwrap();
        assert_eq!(finished.point_count().unwrap(), 2);
        assert!(session.trail().is_none());
        assert!(session.bounds_overlay().is_none());

        let event = session.record_location(north_of(origin, 5.0)).unwrap();
        assert!(matches!(event, SessionEvent::Started { .. }));
        assert_eq!(session.trail().unwrap().point_count().unwrap(), 1);
    }

    #[test]
    fn test_invalid_input_leaves_session_untouched() {
        let (mut session, _) = started_session();
        assert!(matches!(
            session.set_zoom_scale(0.0),
            Err(DataError::InvalidZoomScale(_))
        ));
        assert_eq!(session.zoom_scale(), 1.0);

        let bad = Coordinate::new(f64::NAN, 0.0);
        assert!(matches!(
            session.record_location(bad),
            Err(DataError::InvalidCoordinate { .. })
        ));
        assert_eq!(session.trail().unwrap().point_count().unwrap(), 1);
    }

    #[test]
    fn test_invalid_first_fix_does_not_start() {
        let mut session = TrackingSession::new(Config::default());
        assert!(session.record_location(Coordinate::new(95.0, 0.0)).is_err());
        assert!(session.trail().is_none());
    }

    #[test]
    fn test_region_is_clamped_to_world() {
        let edge = Coordinate::new(0.0, 180.0);
        let region = region_around(edge, 2500.0).unwrap();
        assert!(utils::world_rect().contains_rect(&region));
        assert!(region_around(edge, 0.0).is_err());
    }

    #[test]
    fn test_renderer_is_shared() {
        let (session, _) = started_session();
        assert!(Arc::ptr_eq(&session.renderer(), &session.renderer()));
    }
}
