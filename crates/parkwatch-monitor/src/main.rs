//! Parkwatch Monitor - headless composition root for parkwatch-lib
//!
//! Wires a simulated location provider, a fixture spot catalog and a logging
//! alert sink into an explicitly constructed [`TrackingSession`], then
//! streams what the session observes to the terminal. Useful for demos and
//! for exercising the library end to end without a device or a backend.

mod fixtures;
mod settings;
mod sim;

use std::sync::Arc;
use std::time::Duration;

use anyhow::Context as _;
use clap::Parser;
use parkwatch_lib::{
    GeoPoint, NearbySummary, RankedSpot, SpotCollection, SpotSource, TrackerConfig, TrackerEvent,
    TrackingSession,
};
use tokio::sync::broadcast::error::RecvError;
use tracing_subscriber::EnvFilter;

use crate::fixtures::{FixtureSpotSource, LogAlertSink};
use crate::settings::{Cli, Commands, NearbyArgs, WatchArgs};
use crate::sim::SimulatedLocationProvider;

/// Ranked spots printed per fix before the rest is elided
const MAX_PRINTED_SPOTS: usize = 5;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();
    match cli.command {
        Commands::Watch(args) => watch(args).await,
        Commands::Nearby(args) => nearby(args).await,
    }
}

/// Run a tracking session against a simulated drive until the track ends,
/// Ctrl-C, or the optional duration cutoff.
async fn watch(args: WatchArgs) -> anyhow::Result<()> {
    let interval = Duration::from_millis(args.interval_ms);
    let mut provider = match &args.track {
        Some(path) => SimulatedLocationProvider::gpx_replay(path, interval, args.jitter_m)?,
        None => SimulatedLocationProvider::straight_drive(
            GeoPoint::new(args.lat, args.lon),
            args.speed_mps,
            args.heading_deg,
            interval,
            args.jitter_m,
        ),
    };
    if args.deny_permission {
        provider = provider.deny_permission();
    }

    let mut source = match &args.spots {
        Some(path) => FixtureSpotSource::from_json_file(path)?,
        None => FixtureSpotSource::demo_set(provider.start_point()),
    };
    if let Some(n) = args.fail_source {
        source = source.fail_every(n);
    }
    let source = Arc::new(source);

    // Probe the source up front; a failure is worth a warning but the watch
    // still starts and degrades per update.
    if let Err(e) = source.health_check().await {
        tracing::warn!("Spot source health check failed: {e}");
    }

    let session = TrackingSession::new(
        Arc::new(provider),
        source,
        Arc::new(LogAlertSink),
        args.tracker_config(),
    )?;

    let mut events = session.events();
    session
        .start_tracking()
        .await
        .context("Failed to start tracking")?;

    let deadline = async {
        match args.duration_secs {
            Some(secs) => tokio::time::sleep(Duration::from_secs(secs)).await,
            None => std::future::pending().await,
        }
    };
    tokio::pin!(deadline);

    loop {
        tokio::select! {
            _ = &mut deadline => {
                tracing::info!("Watch duration elapsed");
                break;
            }
            _ = tokio::signal::ctrl_c() => {
                tracing::info!("Interrupted");
                break;
            }
            event = events.recv() => match event {
                Ok(TrackerEvent::RankingUpdated { fix, ranked, summary }) => {
                    print_ranking(fix.point, &ranked, summary);
                }
                Ok(TrackerEvent::SourceError { message }) => {
                    tracing::warn!("Spot source degraded: {message}");
                }
                Ok(TrackerEvent::StreamEnded) => {
                    tracing::info!("Track replay finished");
                    break;
                }
                Err(RecvError::Lagged(missed)) => {
                    tracing::warn!("Fell behind, skipped {missed} session events");
                }
                Err(RecvError::Closed) => break,
            },
        }
    }

    session.stop_tracking().await;
    Ok(())
}

/// One-shot lookup: resolve a position, rank the catalog around it, print the
/// result. No tracking is started.
async fn nearby(args: NearbyArgs) -> anyhow::Result<()> {
    let position = GeoPoint::new(args.lat, args.lon);
    let source: Arc<FixtureSpotSource> = Arc::new(match &args.spots {
        Some(path) => FixtureSpotSource::from_json_file(path)?,
        None => FixtureSpotSource::demo_set(position),
    });

    let session = TrackingSession::new(
        Arc::new(SimulatedLocationProvider::stationary(position)),
        source.clone(),
        Arc::new(LogAlertSink),
        TrackerConfig::default(),
    )?;

    let fix = session
        .current_position()
        .await
        .context("No position available")?;
    let staleness = if fix.stale { " (stale)" } else { "" };
    println!("Position: {}{staleness}", fix.point);

    let spots = source.list_spots(fix.point, args.radius_m).await?;
    let mut catalog = SpotCollection::new();
    catalog.replace_all(spots);
    let ranked = catalog.rank_within(fix.point, args.radius_m)?;

    if ranked.is_empty() {
        println!("No parking within {:.0} m", args.radius_m);
        return Ok(());
    }

    let summary = NearbySummary::of(&ranked);
    println!(
        "{} spots within {:.0} m, {} units free:",
        summary.spot_count, args.radius_m, summary.available_units
    );
    for entry in &ranked {
        println!("{}", format_ranked(entry));
    }
    Ok(())
}

/// Compact per-fix report: summary line plus the nearest few spots
fn print_ranking(position: GeoPoint, ranked: &[RankedSpot], summary: NearbySummary) {
    println!(
        "[{position}] {} spots in range, {} units free",
        summary.spot_count, summary.available_units
    );
    for entry in ranked.iter().take(MAX_PRINTED_SPOTS) {
        println!("{}", format_ranked(entry));
    }
    if ranked.len() > MAX_PRINTED_SPOTS {
        println!("  ... and {} more", ranked.len() - MAX_PRINTED_SPOTS);
    }
}

fn format_ranked(entry: &RankedSpot) -> String {
    let spot = &entry.spot;
    let mut line = format!(
        "  {:>5.0} m  {:<24}  {}/{} free ({})",
        entry.distance_m,
        spot.name,
        spot.available_units,
        spot.total_units,
        spot.availability()
    );
    if let Some(address) = &spot.address {
        line.push_str("  ");
        line.push_str(address);
    }
    line
}
