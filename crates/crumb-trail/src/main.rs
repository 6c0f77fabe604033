//! Crumb Trail - replays a GPS track into a live trail
//!
//! One producer thread feeds fixes into a tracking session while render
//! threads keep drawing the same trail, then a summary is logged.

mod logging;
mod replay;
mod settings;
mod source;

use crumb_trail_lib::DataError;
use settings::Settings;
use std::path::PathBuf;
use std::process::ExitCode;

#[derive(Debug, thiserror::Error)]
pub enum AppError {
    #[error(transparent)]
    Data(#[from] DataError),

    #[error("Failed to parse GPX: {0}")]
    Gpx(#[from] gpx::errors::GpxError),

    #[error("Failed to open {}: {source}", .path.display())]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("No track points in {}", .0.display())]
    EmptyTrack(PathBuf),

    #[error("Nothing to replay")]
    NoFixes,

    #[error("Failed to spawn thread: {0}")]
    Spawn(std::io::Error),

    #[error("Thread {0} panicked")]
    ThreadPanicked(String),

    #[error("Inconsistent trail: {0}")]
    Inconsistent(String),
}

fn main() -> ExitCode {
    logging::setup_logging();
    let settings = Settings::from_cli();

    let fixes = match &settings.gpx_file {
        Some(path) => match source::load_gpx_file(path) {
            Ok(fixes) => fixes,
            Err(err) => {
                tracing::error!(%err, "cannot load track");
                return ExitCode::FAILURE;
            }
        },
        None => {
            let start = settings.walk_start();
            tracing::info!(
                points = settings.walk_points,
                step_meters = settings.step_meters,
                "replaying a synthetic walk"
            );
            source::synthetic_walk(start, settings.walk_points, settings.step_meters)
        }
    };

    match replay::run(&settings, &fixes) {
        Ok(summary) => {
            let renders: u64 = summary.readers.iter().map(|r| r.renders).sum();
            let segments: u64 = summary.readers.iter().map(|r| r.segments).sum();
            let empty: u64 = summary.readers.iter().map(|r| r.empty).sum();
            tracing::info!(
                fixes = summary.fixes,
                kept = summary.producer.kept,
                ignored = summary.producer.ignored,
                rejected = summary.producer.rejected,
                bounds_changes = summary.producer.bounds_changes,
                points = summary.final_points,
                readers = summary.readers.len(),
                renders,
                segments,
                empty_paths = empty,
                elapsed = ?summary.elapsed,
                "replay finished"
            );
            ExitCode::SUCCESS
        }
        Err(err) => {
            tracing::error!(%err, "replay failed");
            ExitCode::FAILURE
        }
    }
}
