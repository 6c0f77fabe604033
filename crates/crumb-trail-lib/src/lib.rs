//! Crumb Trail Library - Live Breadcrumb Trail Storage and Rendering
//!
//! This library accumulates an unbounded stream of location fixes into a
//! growable, lock-protected trail while any number of render threads read
//! consistent snapshots of it and turn them into simplified polylines for the
//! current viewport.
//!
//! # Architecture
//!
//! - **[`ReadWriteLock`]**: many readers or one writer, with scoped helpers
//! - **[`CrumbTrail`]**: append-only projected points plus a bounding rect that
//!   only ever grows; the single producer appends, readers snapshot
//! - **[`TrailRenderer`]**: per-viewport simplification into a [`TrailPath`],
//!   eliding near-duplicate points and off-screen segments
//! - **[`TrackingSession`]**: glue between location input, the trail, the
//!   renderer and the published bounds overlay
//!
//! # Concurrency
//!
//! [`CrumbTrail::append`] and every read block until the lock is available.
//! There is no timeout or cancellation at this layer; callers that need
//! liveness guarantees must wrap the calls themselves.

mod geometry;
mod lock;
mod renderer;
mod session;
mod trail;
pub mod utils;

// Public API exports
pub use geometry::MapRectExt;
pub use lock::{ReadGuard, ReadWriteLock, WriteGuard};
pub use renderer::{RenderConfig, TrailPath, TrailRenderer};
pub use session::{Config, SessionEvent, TrackingSession};
pub use trail::{CrumbTrail, TrailConfig, TrailSnapshot, TrailUpdate};
pub use utils::Coordinate;

/// Error types for the trail library
#[derive(Debug, thiserror::Error)]
pub enum DataError {
    #[error("Lock poisoned: {0}")]
    LockPoisoned(&'static str),

    #[error("Trail capacity exhausted: {0}")]
    CapacityExhausted(#[from] std::collections::TryReserveError),

    #[error("Invalid coordinate: ({latitude}, {longitude})")]
    InvalidCoordinate { latitude: f64, longitude: f64 },

    #[error("Invalid zoom scale: {0}")]
    InvalidZoomScale(f64),

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),
}

pub type Result<T> = std::result::Result<T, DataError>;
