//! Command-line surface of the monitor

use clap::{Args, Parser, Subcommand, ValueEnum};
use parkwatch_lib::{RearmPolicy, TrackerConfig};
use std::path::PathBuf;

/// Parkwatch Monitor - headless proximity tracking for parking availability
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Follow a simulated drive, streaming rankings and proximity alerts
    Watch(WatchArgs),
    /// Rank the spots around a fixed position once and exit
    Nearby(NearbyArgs),
}

#[derive(Args, Debug, Clone)]
pub struct WatchArgs {
    /// JSON spot catalog to serve; omit for a built-in demo set around the
    /// drive start
    #[arg(long, value_name = "FILE")]
    pub spots: Option<PathBuf>,

    /// GPX track to replay as the position stream instead of the synthetic
    /// straight-line drive
    #[arg(long, value_name = "FILE")]
    pub track: Option<PathBuf>,

    /// Starting latitude of the synthetic drive
    #[arg(long, default_value = "6.672834", allow_negative_numbers = true)]
    pub lat: f64,

    /// Starting longitude of the synthetic drive
    #[arg(long, default_value = "-1.567513", allow_negative_numbers = true)]
    pub lon: f64,

    /// Speed of the synthetic drive in meters per second
    #[arg(long, default_value = "8.0")]
    pub speed_mps: f64,

    /// Heading of the synthetic drive in degrees clockwise from north
    #[arg(long, default_value = "90.0")]
    pub heading_deg: f64,

    /// Milliseconds between position fixes
    #[arg(long, default_value = "1000")]
    pub interval_ms: u64,

    /// GPS noise: scatter each fix by up to this many meters per axis
    #[arg(long, default_value = "0.0")]
    pub jitter_m: f64,

    /// Radius in meters within which spots are ranked and displayed
    #[arg(long, default_value = "1000.0")]
    pub browse_radius_m: f64,

    /// Radius in meters within which a spot may fire a proximity alert
    #[arg(long, default_value = "200.0")]
    pub alert_radius_m: f64,

    /// When an already-alerted spot becomes eligible to alert again
    #[arg(long, value_enum, default_value = "session")]
    pub rearm: RearmArg,

    /// Overshoot fraction past the alert radius before on-exit re-arming
    #[arg(long, default_value = "0.2")]
    pub exit_hysteresis: f64,

    /// Stop after this many seconds (default: run until Ctrl-C or track end)
    #[arg(long, value_name = "SECS")]
    pub duration_secs: Option<u64>,

    /// Refuse the location permission, demonstrating the denied start path
    #[arg(long)]
    pub deny_permission: bool,

    /// Fault injection: every n-th spot lookup fails (1 = all of them)
    #[arg(long, value_name = "N")]
    pub fail_source: Option<u64>,
}

impl WatchArgs {
    /// Session config assembled from the flags. Validation happens in
    /// [`parkwatch_lib::TrackingSession::new`].
    pub fn tracker_config(&self) -> TrackerConfig {
        TrackerConfig {
            browse_radius_m: self.browse_radius_m,
            alert_radius_m: self.alert_radius_m,
            rearm: self.rearm.into(),
            exit_hysteresis: self.exit_hysteresis,
        }
    }
}

#[derive(Args, Debug, Clone)]
pub struct NearbyArgs {
    /// Latitude of the reference position
    #[arg(long, default_value = "6.672834", allow_negative_numbers = true)]
    pub lat: f64,

    /// Longitude of the reference position
    #[arg(long, default_value = "-1.567513", allow_negative_numbers = true)]
    pub lon: f64,

    /// JSON spot catalog to serve; omit for a built-in demo set around the
    /// reference position
    #[arg(long, value_name = "FILE")]
    pub spots: Option<PathBuf>,

    /// Radius in meters within which spots are ranked
    #[arg(long, default_value = "1000.0")]
    pub radius_m: f64,
}

/// CLI face of [`RearmPolicy`]
#[derive(ValueEnum, Debug, Clone, Copy, PartialEq, Eq)]
pub enum RearmArg {
    /// One alert per spot per tracking session
    Session,
    /// Re-arm once the spot leaves the alert radius by the hysteresis margin
    OnExit,
}

impl From<RearmArg> for RearmPolicy {
    fn from(arg: RearmArg) -> Self {
        match arg {
            RearmArg::Session => RearmPolicy::Session,
            RearmArg::OnExit => RearmPolicy::OnExit,
        }
    }
}
