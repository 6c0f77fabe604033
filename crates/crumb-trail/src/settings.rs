use clap::Parser;
use crumb_trail_lib::{Config, Coordinate, RenderConfig, TrailConfig};
use std::path::PathBuf;

#[derive(Parser, Debug, Clone)]
#[clap(author, version, about, long_about = None)]
/// Crumb Trail - replay a GPS track into a live trail while render threads draw it
pub struct Settings {
    /// GPX file to replay; a synthetic walk is generated when omitted
    #[clap(short, long, value_name = "FILE")]
    pub gpx_file: Option<PathBuf>,

    /// Number of fixes in the synthetic walk
    #[clap(long, default_value = "20000")]
    pub walk_points: usize,

    /// Average distance between synthetic fixes, in meters
    #[clap(long, default_value = "15.0")]
    pub step_meters: f64,

    /// Latitude where the synthetic walk starts
    #[clap(long, default_value = "51.5074", allow_hyphen_values = true)]
    pub start_latitude: f64,

    /// Longitude where the synthetic walk starts
    #[clap(long, default_value = "-0.1278", allow_hyphen_values = true)]
    pub start_longitude: f64,

    /// Render threads drawing while the producer appends
    #[clap(short, long, default_value = "4")]
    pub readers: usize,

    /// Screen pixels per map unit the readers render at
    #[clap(short, long, default_value = "0.05")]
    pub zoom_scale: f64,

    /// Fixes closer than this to the previous point are dropped
    #[clap(long, default_value = "10.0")]
    pub min_separation: f64,

    /// Tiles per side for the tiled reader (0 disables it)
    #[clap(long, default_value = "2")]
    pub tiles: usize,

    /// Track line width in pixels
    #[clap(long, default_value = "4.0")]
    pub line_width: f64,
}

impl Settings {
    pub fn from_cli() -> Self {
        match Settings::try_parse() {
            Ok(args) => args,
            Err(e) => e.exit(),
        }
    }

    pub fn session_config(&self) -> Config {
        Config {
            trail: TrailConfig {
                minimum_separation_meters: self.min_separation,
                ..TrailConfig::default()
            },
            render: RenderConfig {
                line_width_pixels: self.line_width,
                ..RenderConfig::default()
            },
            ..Config::default()
        }
    }

    pub fn walk_start(&self) -> Coordinate {
        Coordinate::new(self.start_latitude, self.start_longitude)
    }
}
