//! One producer appending fixes while render threads draw the same trail

use crate::AppError;
use crate::settings::Settings;
use crumb_trail_lib::utils::map_units_per_meter_at_latitude;
use crumb_trail_lib::{
    Coordinate, CrumbTrail, DataError, MapRectExt, SessionEvent, TrackingSession, TrailRenderer,
};
use geo::Rect;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread;
use std::time::{Duration, Instant};

/// Side of the window the head-following readers draw, in meters
const FOLLOW_WINDOW_METERS: f64 = 1000.0;

#[derive(Debug, Default, Clone, Copy)]
pub struct ProducerStats {
    pub kept: usize,
    pub ignored: usize,
    pub rejected: usize,
    pub bounds_changes: usize,
}

#[derive(Debug, Default, Clone, Copy)]
pub struct ReaderStats {
    pub renders: u64,
    pub empty: u64,
    pub segments: u64,
    pub max_points_seen: usize,
}

/// How a render thread picks its viewport
#[derive(Debug, Clone, Copy, PartialEq)]
enum ReaderMode {
    /// Whole trail in one request
    Overview,
    /// Whole trail split into tiles rendered in parallel
    Tiled(usize),
    /// A fixed-size window around the newest point
    FollowHead,
}

#[derive(Debug)]
pub struct Summary {
    pub fixes: usize,
    pub producer: ProducerStats,
    pub readers: Vec<ReaderStats>,
    pub final_points: usize,
    pub elapsed: Duration,
}

/// Marks the replay finished even if the producer bails out early
struct DoneOnDrop<'a>(&'a AtomicBool);

impl Drop for DoneOnDrop<'_> {
    fn drop(&mut self) {
        self.0.store(true, Ordering::Release);
    }
}

/// Replay `fixes` into a fresh session with `settings.readers` render threads
pub fn run(settings: &Settings, fixes: &[Coordinate]) -> Result<Summary, AppError> {
    // Leading garbage is skipped like any other bad fix
    let leading_rejected = fixes
        .iter()
        .position(|fix| fix.validate().is_ok())
        .ok_or(AppError::NoFixes)?;
    if leading_rejected > 0 {
        tracing::warn!(
            skipped = leading_rejected,
            "skipping invalid fixes before the first valid one"
        );
    }
    let (&first, rest) = fixes[leading_rejected..]
        .split_first()
        .ok_or(AppError::NoFixes)?;

    let mut session = TrackingSession::new(settings.session_config());
    session.set_zoom_scale(settings.zoom_scale)?;
    if let SessionEvent::Started { region } = session.record_location(first)? {
        tracing::debug!(?region, "initial map region");
    }
    let trail = session.trail().ok_or(AppError::NoFixes)?;
    let renderer = session.renderer();

    let done = AtomicBool::new(false);
    let started = Instant::now();

    let (producer, readers) = thread::scope(|scope| -> Result<_, AppError> {
        let producer = thread::Builder::new()
            .name("producer".to_string())
            .spawn_scoped(scope, || produce(session, rest, &done))
            .map_err(AppError::Spawn)?;

        let mut readers = Vec::with_capacity(settings.readers);
        for index in 0..settings.readers {
            let mode = match index % 3 {
                0 if settings.tiles > 0 => ReaderMode::Tiled(settings.tiles),
                1 => ReaderMode::FollowHead,
                _ => ReaderMode::Overview,
            };
            let (trail, renderer, done) = (&trail, &renderer, &done);
            let zoom_scale = settings.zoom_scale;
            let handle = thread::Builder::new()
                .name(format!("reader-{index}"))
                .spawn_scoped(scope, move || {
                    read_loop(trail, renderer, mode, zoom_scale, done)
                })
                .map_err(AppError::Spawn)?;
            readers.push(handle);
        }

        let mut producer = producer
            .join()
            .map_err(|_| AppError::ThreadPanicked("producer".to_string()))??;
        producer.rejected += leading_rejected;
        let readers = readers
            .into_iter()
            .enumerate()
            .map(|(index, handle)| {
                handle
                    .join()
                    .map_err(|_| AppError::ThreadPanicked(format!("reader-{index}")))?
            })
            .collect::<Result<Vec<_>, AppError>>()?;
        Ok((producer, readers))
    })?;

    let final_points = trail.point_count()?;
    if final_points != producer.kept + 1 {
        return Err(AppError::Inconsistent(format!(
            "trail holds {final_points} points but {} fixes were kept",
            producer.kept + 1
        )));
    }

    Ok(Summary {
        fixes: fixes.len(),
        producer,
        readers,
        final_points,
        elapsed: started.elapsed(),
    })
}

fn produce(
    mut session: TrackingSession,
    fixes: &[Coordinate],
    done: &AtomicBool,
) -> Result<ProducerStats, AppError> {
    let _done = DoneOnDrop(done);
    let mut stats = ProducerStats::default();

    for &fix in fixes {
        profiling::scope!("record_location");
        match session.record_location(fix) {
            Ok(SessionEvent::Ignored) => stats.ignored += 1,
            Ok(SessionEvent::BoundsChanged { .. }) => {
                stats.kept += 1;
                stats.bounds_changes += 1;
            }
            Ok(SessionEvent::Redraw { .. }) => stats.kept += 1,
            Ok(SessionEvent::Started { .. }) => {
                return Err(AppError::Inconsistent(
                    "session restarted mid-replay".to_string(),
                ));
            }
            // Bad fixes in a recorded track are skipped, not fatal
            Err(DataError::InvalidCoordinate { .. }) => stats.rejected += 1,
            Err(err) => return Err(err.into()),
        }
    }

    session.stop();
    tracing::debug!(?stats, "producer finished");
    Ok(stats)
}

fn read_loop(
    trail: &CrumbTrail,
    renderer: &TrailRenderer,
    mode: ReaderMode,
    zoom_scale: f64,
    done: &AtomicBool,
) -> Result<ReaderStats, AppError> {
    let mut stats = ReaderStats::default();
    let mut last_bounds: Option<Rect<f64>> = None;

    loop {
        // One more pass after the producer finishes sees the complete trail
        let finished = done.load(Ordering::Acquire);

        let (count, head) = trail.read_points(|points| (points.len(), points.last().copied()))?;
        if count < stats.max_points_seen {
            return Err(AppError::Inconsistent(format!(
                "trail shrank from {} to {count} points",
                stats.max_points_seen
            )));
        }
        stats.max_points_seen = count;

        let bounds = trail.bounding_rect()?;
        if last_bounds.is_some_and(|last| !bounds.contains_rect(&last)) {
            return Err(AppError::Inconsistent(
                "trail bounding rect shrank".to_string(),
            ));
        }
        last_bounds = Some(bounds);

        let paths = match mode {
            ReaderMode::Overview => vec![renderer.render(trail, bounds, zoom_scale)?],
            ReaderMode::Tiled(per_side) => renderer
                .render_tiles(trail, bounds, zoom_scale, per_side)?
                .into_iter()
                .map(|(_, path)| path)
                .collect(),
            ReaderMode::FollowHead => {
                let head = head.ok_or_else(|| AppError::Inconsistent("empty trail".to_string()))?;
                let latitude = Coordinate::from_map_point(head).latitude;
                let side = FOLLOW_WINDOW_METERS * map_units_per_meter_at_latitude(latitude);
                vec![renderer.render(trail, Rect::centered_square(head, side), zoom_scale)?]
            }
        };

        stats.renders += 1;
        for path in &paths {
            match path {
                Some(path) => stats.segments += path.segment_count() as u64,
                None => stats.empty += 1,
            }
        }

        if finished {
            break;
        }
        thread::yield_now();
    }

    tracing::debug!(?mode, ?stats, "reader finished");
    Ok(stats)
}
