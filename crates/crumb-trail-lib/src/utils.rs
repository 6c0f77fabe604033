//! Projection between geographic coordinates and the flat map space
//!
//! All trail geometry lives in Web Mercator (EPSG:3857) meters. Geographic
//! input arrives as [`Coordinate`] values in degrees.

use crate::{DataError, Result};
use geo::{Coord, Distance, Haversine, Point, Rect};

/// Web Mercator bounds in meters (EPSG:3857)
pub const EARTH_MERCATOR_MAX: f64 = 20037508.34;
pub const EARTH_MERCATOR_MIN: f64 = -EARTH_MERCATOR_MAX;

/// Maximum latitude that can be represented in Web Mercator
pub const MAX_LATITUDE: f64 = 85.05112878;

const LON_TO_X: f64 = EARTH_MERCATOR_MAX / 180.0;
const Y_SCALE: f64 = EARTH_MERCATOR_MAX / std::f64::consts::PI;

/// A geographic position in degrees, as delivered by a location sensor
#[derive(Clone, Copy, Debug, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct Coordinate {
    pub latitude: f64,
    pub longitude: f64,
}

impl Coordinate {
    pub const fn new(latitude: f64, longitude: f64) -> Self {
        Self {
            latitude,
            longitude,
        }
    }

    /// Reject NaN, infinities and out-of-range degrees.
    ///
    /// Latitudes beyond [`MAX_LATITUDE`] are accepted here and clamped by the
    /// projection.
    pub fn validate(self) -> Result<Self> {
        let finite = self.latitude.is_finite() && self.longitude.is_finite();
        if !finite || self.latitude.abs() > 90.0 || self.longitude.abs() > 180.0 {
            return Err(DataError::InvalidCoordinate {
                latitude: self.latitude,
                longitude: self.longitude,
            });
        }
        Ok(self)
    }

    /// Project into Web Mercator map space
    #[inline]
    pub fn to_map_point(self) -> Point<f64> {
        wgs84_to_mercator(self.latitude, self.longitude)
    }

    /// Recover the coordinate of a map point
    #[inline]
    pub fn from_map_point(point: Point<f64>) -> Self {
        let (latitude, longitude) = mercator_to_wgs84(point.x(), point.y());
        Self::new(latitude, longitude)
    }
}

/// Convert WGS84 (lat, lon) to Web Mercator (x, y) in meters, clamping latitude
#[inline]
pub fn wgs84_to_mercator(lat: f64, lon: f64) -> Point<f64> {
    let lat_rad = lat.clamp(-MAX_LATITUDE, MAX_LATITUDE).to_radians();
    let y = (lat_rad.tan() + lat_rad.cos().recip()).ln() * Y_SCALE;
    // MAX_LATITUDE is rounded, keep the image inside the world square
    let point = Point::new(
        (lon * LON_TO_X).clamp(EARTH_MERCATOR_MIN, EARTH_MERCATOR_MAX),
        y.clamp(EARTH_MERCATOR_MIN, EARTH_MERCATOR_MAX),
    );
    debug_assert!(
        lat.is_nan() || lon.is_nan() || is_valid_mercator(&point),
        "projected {point:?} outside the world"
    );
    point
}

/// Convert Web Mercator (x, y) in meters to WGS84, returned as (lat, lon)
#[inline]
pub fn mercator_to_wgs84(x: f64, y: f64) -> (f64, f64) {
    let lat = 2.0 * (y / Y_SCALE).exp().atan() - std::f64::consts::FRAC_PI_2;
    (lat.to_degrees(), x / LON_TO_X)
}

/// How many map units (Web Mercator meters) one real meter spans at `latitude`
#[inline]
pub fn map_units_per_meter_at_latitude(latitude: f64) -> f64 {
    latitude
        .clamp(-MAX_LATITUDE, MAX_LATITUDE)
        .to_radians()
        .cos()
        .recip()
}

/// Great-circle distance in meters between two map points
pub fn meters_between_map_points(a: Point<f64>, b: Point<f64>) -> f64 {
    let a = Coordinate::from_map_point(a);
    let b = Coordinate::from_map_point(b);
    // geo points are (x = lon, y = lat)
    Haversine.distance(
        Point::new(a.longitude, a.latitude),
        Point::new(b.longitude, b.latitude),
    )
}

/// The whole projected world
#[inline]
pub fn world_rect() -> Rect<f64> {
    Rect::new(
        Coord {
            x: EARTH_MERCATOR_MIN,
            y: EARTH_MERCATOR_MIN,
        },
        Coord {
            x: EARTH_MERCATOR_MAX,
            y: EARTH_MERCATOR_MAX,
        },
    )
}

/// Check if a point is within Web Mercator bounds
#[inline]
pub fn is_valid_mercator(point: &Point<f64>) -> bool {
    let range = EARTH_MERCATOR_MIN..=EARTH_MERCATOR_MAX;
    range.contains(&point.x()) && range.contains(&point.y())
}
