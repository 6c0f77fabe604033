//! Where location fixes come from: a recorded GPX track or a synthetic walk

use crate::AppError;
use crumb_trail_lib::Coordinate;
use std::io::{BufReader, Read};
use std::path::Path;

/// Meters per degree of latitude on a sphere of mean Earth radius
const METERS_PER_DEGREE: f64 = 6_371_008.8 * std::f64::consts::PI / 180.0;

/// Load every track point of a GPX file, in file order
pub fn load_gpx_file(path: &Path) -> Result<Vec<Coordinate>, AppError> {
    profiling::scope!("load_gpx_file");

    let file = std::fs::File::open(path).map_err(|source| AppError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    let fixes = read_gpx(BufReader::new(file))?;
    if fixes.is_empty() {
        return Err(AppError::EmptyTrack(path.to_path_buf()));
    }
    tracing::info!(path = %path.display(), fixes = fixes.len(), "loaded GPX track");
    Ok(fixes)
}

/// Flatten all tracks and segments into one sequence of fixes
pub fn read_gpx<R: Read>(reader: R) -> Result<Vec<Coordinate>, AppError> {
    let gpx = gpx::read(reader)?;
    Ok(gpx
        .tracks
        .iter()
        .flat_map(|track| &track.segments)
        .flat_map(|segment| &segment.points)
        .map(|waypoint| {
            // geo points are (x = lon, y = lat)
            let point = waypoint.point();
            Coordinate::new(point.y(), point.x())
        })
        .collect())
}

/// A deterministic meandering walk of `points` fixes around `step_meters` apart
///
/// Every seventh step is a short jitter, so some fixes fall under the usual
/// separation threshold the way a stationary phone's fixes do.
pub fn synthetic_walk(start: Coordinate, points: usize, step_meters: f64) -> Vec<Coordinate> {
    let mut current = start;
    let mut fixes = Vec::with_capacity(points);
    for i in 0..points {
        fixes.push(current);
        let t = i as f64;
        let step = if i % 7 == 6 {
            step_meters * 0.2
        } else {
            step_meters * (0.6 + 0.8 * (t * 0.13).sin().abs())
        };
        let heading = (t * 0.011).sin() * std::f64::consts::PI + (t * 0.07).cos() * 0.5;
        let meters_per_lon_degree = METERS_PER_DEGREE * current.latitude.to_radians().cos();
        current = Coordinate::new(
            current.latitude + step * heading.cos() / METERS_PER_DEGREE,
            current.longitude + step * heading.sin() / meters_per_lon_degree,
        );
    }
    fixes
}
