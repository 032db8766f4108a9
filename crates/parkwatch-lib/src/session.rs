//! TrackingSession - lifecycle management for continuous proximity tracking
//!
//! A session ties the three provider seams together: it subscribes to a
//! position stream, refreshes the spot catalog and ranking on every fix, and
//! routes deduplicated proximity alerts to the sink. Sessions are explicit
//! values; construct as many as needed, each with its own notified-set and
//! ranking state.
//!
//! Lifecycle: `Stopped -> Starting -> Active -> Stopped`. Starting covers the
//! permission request and watch setup; a denied permission falls back to
//! `Stopped` with [`TrackError::PermissionDenied`]. Stopping ends the watch,
//! discards the notified-set and keeps the last fix as a stale hint.

use std::sync::{Arc, Mutex};

use tokio::sync::{broadcast, watch};
use tokio::task::JoinHandle;

use crate::alert::{AlertGate, DEFAULT_EXIT_HYSTERESIS, RearmPolicy};
use crate::collection::{CollectionInfo, SpotCollection};
use crate::provider::{
    AlertSink, LocationProvider, Permission, PositionFix, PositionUpdates, SpotSource,
};
use crate::spot::{NearbySummary, RankedSpot};
use crate::{Result, TrackError};

/// Default radius in meters for browsing and ranking spots
pub const DEFAULT_BROWSE_RADIUS_M: f64 = 1000.0;

/// Default radius in meters for firing proximity alerts
pub const DEFAULT_ALERT_RADIUS_M: f64 = 200.0;

/// Buffered events per subscriber before slow consumers start lagging
const EVENT_CHANNEL_CAPACITY: usize = 64;

/// Tuning knobs for a tracking session
#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct TrackerConfig {
    /// Spots within this radius are ranked and reported
    pub browse_radius_m: f64,
    /// Spots within this radius may fire an alert
    pub alert_radius_m: f64,
    /// When an already-alerted spot becomes eligible again
    pub rearm: RearmPolicy,
    /// Overshoot fraction for [`RearmPolicy::OnExit`] re-arming
    pub exit_hysteresis: f64,
}

impl Default for TrackerConfig {
    fn default() -> Self {
        Self {
            browse_radius_m: DEFAULT_BROWSE_RADIUS_M,
            alert_radius_m: DEFAULT_ALERT_RADIUS_M,
            rearm: RearmPolicy::Session,
            exit_hysteresis: DEFAULT_EXIT_HYSTERESIS,
        }
    }
}

impl TrackerConfig {
    /// Check the radii and hysteresis for internal consistency.
    ///
    /// The alert radius must not exceed the browse radius: alerts are decided
    /// from the browse ranking, so a spot outside it could never alert.
    pub fn validate(&self) -> Result<()> {
        if !self.browse_radius_m.is_finite() || self.browse_radius_m <= 0.0 {
            return Err(TrackError::InvalidArgument(format!(
                "browse radius must be positive and finite, got {}",
                self.browse_radius_m
            )));
        }
        if !self.alert_radius_m.is_finite() || self.alert_radius_m <= 0.0 {
            return Err(TrackError::InvalidArgument(format!(
                "alert radius must be positive and finite, got {}",
                self.alert_radius_m
            )));
        }
        if self.alert_radius_m > self.browse_radius_m {
            return Err(TrackError::InvalidArgument(format!(
                "alert radius ({} m) must not exceed browse radius ({} m)",
                self.alert_radius_m, self.browse_radius_m
            )));
        }
        if !self.exit_hysteresis.is_finite() || self.exit_hysteresis < 0.0 {
            return Err(TrackError::InvalidArgument(format!(
                "exit hysteresis must be non-negative, got {}",
                self.exit_hysteresis
            )));
        }
        Ok(())
    }
}

/// Lifecycle state of a tracking session
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Stopped,
    Starting,
    Active,
}

/// What a session broadcasts to its observers
#[derive(Debug, Clone)]
pub enum TrackerEvent {
    /// A position fix was processed and the ranking recomputed. Alerts for
    /// this pass have already been delivered to the sink.
    RankingUpdated {
        fix: PositionFix,
        ranked: Vec<RankedSpot>,
        summary: NearbySummary,
    },
    /// The spot source failed for one pass; the ranking was cleared and the
    /// watch continues.
    SourceError { message: String },
    /// The position stream ended on its own and the session stopped.
    StreamEnded,
}

/// State behind the session mutex.
///
/// The epoch increments on every successful start; the pump tags its work
/// with the epoch it was spawned under so a fix that was in flight across a
/// stop (or stop/start) is recognized as stale and discarded.
struct Shared {
    state: SessionState,
    epoch: u64,
    pump: Option<JoinHandle<()>>,
    stop_tx: Option<watch::Sender<bool>>,
    current_fix: Option<PositionFix>,
    gate: AlertGate,
    collection: SpotCollection,
    last_ranking: Vec<RankedSpot>,
}

struct SessionInner {
    provider: Arc<dyn LocationProvider>,
    source: Arc<dyn SpotSource>,
    sink: Arc<dyn AlertSink>,
    config: TrackerConfig,
    shared: Mutex<Shared>,
    events: broadcast::Sender<TrackerEvent>,
}

/// Handle to one tracking session. Cloning shares the session; the clone
/// observes and controls the same watch.
#[derive(Clone)]
pub struct TrackingSession {
    inner: Arc<SessionInner>,
}

impl TrackingSession {
    /// Create a session in the [`SessionState::Stopped`] state.
    ///
    /// Fails with [`TrackError::InvalidArgument`] when the config is
    /// inconsistent (see [`TrackerConfig::validate`]).
    pub fn new(
        provider: Arc<dyn LocationProvider>,
        source: Arc<dyn SpotSource>,
        sink: Arc<dyn AlertSink>,
        config: TrackerConfig,
    ) -> Result<Self> {
        config.validate()?;
        let (events, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        Ok(Self {
            inner: Arc::new(SessionInner {
                provider,
                source,
                sink,
                config,
                shared: Mutex::new(Shared {
                    state: SessionState::Stopped,
                    epoch: 0,
                    pump: None,
                    stop_tx: None,
                    current_fix: None,
                    gate: AlertGate::new(
                        config.alert_radius_m,
                        config.rearm,
                        config.exit_hysteresis,
                    ),
                    collection: SpotCollection::new(),
                    last_ranking: Vec::new(),
                }),
                events,
            }),
        })
    }

    /// Begin continuous tracking.
    ///
    /// Requests permission, seeds the last-known position and spawns the
    /// watch pump. Calling on a session that is already starting or active is
    /// a no-op. Fails with [`TrackError::PermissionDenied`] when the provider
    /// refuses, leaving the session stopped.
    pub async fn start_tracking(&self) -> Result<()> {
        {
            let mut shared = self.inner.shared.lock().unwrap();
            match shared.state {
                SessionState::Active | SessionState::Starting => {
                    tracing::debug!("start_tracking ignored, session is {:?}", shared.state);
                    return Ok(());
                }
                SessionState::Stopped => shared.state = SessionState::Starting,
            }
        }

        if self.inner.provider.request_permission().await == Permission::Denied {
            tracing::warn!("Location permission denied, tracking not started");
            self.inner.shared.lock().unwrap().state = SessionState::Stopped;
            return Err(TrackError::PermissionDenied);
        }

        // Seed the current fix so observers have a position to center on
        // before the first streamed fix arrives. Best effort only.
        if let Ok(fix) = self.inner.provider.current_fix().await {
            self.inner.shared.lock().unwrap().current_fix = Some(fix);
        }

        let updates = self.inner.provider.subscribe();
        let (stop_tx, stop_rx) = watch::channel(false);

        // Commit the new epoch before the pump spawns so its very first fix
        // passes the epoch check.
        let epoch = {
            let mut shared = self.inner.shared.lock().unwrap();
            if shared.state != SessionState::Starting {
                // Stopped while we were awaiting the provider; drop the
                // fresh subscription without ever going active.
                return Ok(());
            }
            shared.epoch += 1;
            shared.state = SessionState::Active;
            shared.stop_tx = Some(stop_tx);
            shared.epoch
        };
        let pump = tokio::spawn(run_pump(Arc::clone(&self.inner), updates, stop_rx, epoch));

        let mut shared = self.inner.shared.lock().unwrap();
        if shared.state == SessionState::Active && shared.epoch == epoch {
            shared.pump = Some(pump);
            drop(shared);
            tracing::info!(
                "Tracking started (browse {} m, alert {} m)",
                self.inner.config.browse_radius_m,
                self.inner.config.alert_radius_m
            );
        } else {
            // A stop raced the spawn and already signalled it; wait for the
            // pump to drain so no alert can trail the stop.
            drop(shared);
            let _ = pump.await;
        }
        Ok(())
    }

    /// End continuous tracking.
    ///
    /// Ends the position watch, discards the notified-set and the ranking,
    /// and waits for the pump to finish so no alert can trail the stop. The
    /// last fix is kept as a stale hint. Idempotent.
    pub async fn stop_tracking(&self) {
        let (stop_tx, pump) = {
            let mut shared = self.inner.shared.lock().unwrap();
            if shared.state == SessionState::Stopped {
                tracing::debug!("stop_tracking ignored, session already stopped");
                return;
            }
            shared.state = SessionState::Stopped;
            shared.gate.reset();
            shared.last_ranking.clear();
            shared.collection.clear();
            (shared.stop_tx.take(), shared.pump.take())
        };

        if let Some(stop_tx) = stop_tx {
            let _ = stop_tx.send(true);
        }
        if let Some(pump) = pump {
            if let Err(e) = pump.await {
                tracing::warn!("Position pump ended abnormally: {e}");
            }
        }
        tracing::info!("Tracking stopped");
    }

    /// One-shot position lookup, independent of the watch.
    ///
    /// Prefers a fresh fix; falls back to the provider's cached last-known
    /// position marked [`PositionFix::stale`]. Fails with
    /// [`TrackError::LocationUnavailable`] when neither exists.
    pub async fn current_position(&self) -> Result<PositionFix> {
        match self.inner.provider.current_fix().await {
            Ok(fix) => {
                self.inner.shared.lock().unwrap().current_fix = Some(fix);
                Ok(fix)
            }
            Err(fresh_err) => match self.inner.provider.last_known_fix().await {
                Some(mut fix) => {
                    tracing::debug!("No fresh fix, falling back to last known position");
                    fix.stale = true;
                    self.inner.shared.lock().unwrap().current_fix = Some(fix);
                    Ok(fix)
                }
                None => Err(fresh_err),
            },
        }
    }

    /// Forget which spots have alerted, re-arming all alerts immediately
    pub fn clear_notified_cache(&self) {
        self.inner.shared.lock().unwrap().gate.reset();
        tracing::debug!("Notified cache cleared");
    }

    /// Current lifecycle state
    pub fn state(&self) -> SessionState {
        self.inner.shared.lock().unwrap().state
    }

    /// Config this session was built with
    pub fn config(&self) -> TrackerConfig {
        self.inner.config
    }

    /// Subscribe to session events. Late subscribers only see events from
    /// subscription onward.
    pub fn events(&self) -> broadcast::Receiver<TrackerEvent> {
        self.inner.events.subscribe()
    }

    /// Most recent position fix, possibly stale
    pub fn last_fix(&self) -> Option<PositionFix> {
        self.inner.shared.lock().unwrap().current_fix
    }

    /// Ranking computed for the most recent fix, nearest first
    pub fn last_ranking(&self) -> Vec<RankedSpot> {
        self.inner.shared.lock().unwrap().last_ranking.clone()
    }

    /// Aggregate over the most recent ranking
    pub fn nearby_summary(&self) -> NearbySummary {
        NearbySummary::of(&self.inner.shared.lock().unwrap().last_ranking)
    }

    /// Summary of the spot catalog behind the ranking
    pub fn spot_info(&self) -> CollectionInfo {
        self.inner.shared.lock().unwrap().collection.info()
    }
}

/// Drive the position stream until stopped or the stream ends.
async fn run_pump(
    inner: Arc<SessionInner>,
    mut updates: PositionUpdates,
    mut stop_rx: watch::Receiver<bool>,
    epoch: u64,
) {
    tracing::debug!("Position pump running (epoch {epoch})");
    loop {
        tokio::select! {
            // A flipped stop flag and a dropped sender both end the watch.
            _ = stop_rx.changed() => break,
            fix = updates.recv() => match fix {
                Some(fix) => process_fix(&inner, epoch, fix).await,
                None => {
                    tracing::debug!("Position stream ended (epoch {epoch})");
                    finish_naturally(&inner, epoch);
                    break;
                }
            },
        }
    }
    tracing::debug!("Position pump exited (epoch {epoch})");
}

/// Refresh catalog, ranking and alerts for one fix.
async fn process_fix(inner: &Arc<SessionInner>, epoch: u64, fix: PositionFix) {
    if !fix.point.is_valid() {
        tracing::warn!(
            "Skipping position fix with out-of-range coordinates ({})",
            fix.point
        );
        return;
    }

    let config = inner.config;
    {
        let mut shared = inner.shared.lock().unwrap();
        if shared.epoch != epoch || shared.state != SessionState::Active {
            tracing::debug!("Discarding position fix from an ended watch");
            return;
        }
        shared.current_fix = Some(fix);
    }

    match inner
        .source
        .list_spots(fix.point, config.browse_radius_m)
        .await
    {
        Ok(spots) => {
            let (ranked, summary, alerts) = {
                let mut shared = inner.shared.lock().unwrap();
                if shared.epoch != epoch || shared.state != SessionState::Active {
                    tracing::debug!("Discarding spot snapshot from an ended watch");
                    return;
                }
                shared.collection.replace_all(spots);
                let ranked = match shared.collection.rank_within(fix.point, config.browse_radius_m)
                {
                    Ok(ranked) => ranked,
                    Err(e) => {
                        // Unreachable with a validated config and fix; do not
                        // let one bad pass kill the pump.
                        tracing::warn!("Ranking failed: {e}");
                        return;
                    }
                };
                let summary = NearbySummary::of(&ranked);
                let alerts = shared.gate.evaluate(&ranked);
                shared.last_ranking = ranked.clone();
                (ranked, summary, alerts)
            };

            for alert in &alerts {
                inner.sink.emit(&alert.title(), &alert.body(), alert);
            }
            let _ = inner.events.send(TrackerEvent::RankingUpdated {
                fix,
                ranked,
                summary,
            });
        }
        Err(e) => {
            tracing::warn!("Spot source failed, treating as zero spots: {e}");
            {
                let mut shared = inner.shared.lock().unwrap();
                if shared.epoch != epoch || shared.state != SessionState::Active {
                    return;
                }
                shared.collection.clear();
                shared.last_ranking.clear();
            }
            let _ = inner.events.send(TrackerEvent::SourceError {
                message: e.to_string(),
            });
        }
    }
}

/// Wind the session down after the position stream ended on its own.
fn finish_naturally(inner: &SessionInner, epoch: u64) {
    {
        let mut shared = inner.shared.lock().unwrap();
        if shared.epoch != epoch || shared.state != SessionState::Active {
            return;
        }
        shared.state = SessionState::Stopped;
        shared.gate.reset();
        shared.last_ranking.clear();
        shared.collection.clear();
        shared.stop_tx = None;
        // The finished pump handle stays behind; stop_tracking on a stopped
        // session is a no-op, and a restart replaces it.
    }
    let _ = inner.events.send(TrackerEvent::StreamEnded);
    tracing::info!("Position stream ended, tracking stopped");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::alert::ProximityAlert;
    use crate::coords::GeoPoint;
    use crate::provider::BoxFuture;
    use crate::spot::{ParkingSpot, SpotId};
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
    use tokio::sync::{Notify, mpsc};

    /// Provider scripted by the test: fixes are pushed through the sender
    /// exposed by `position_tx` after each start.
    struct ScriptedProvider {
        permission: Permission,
        fix: Option<PositionFix>,
        last_known: Option<PositionFix>,
        position_tx: Mutex<Option<mpsc::Sender<PositionFix>>>,
        subscriptions: AtomicUsize,
    }

    impl ScriptedProvider {
        fn granted() -> Self {
            Self {
                permission: Permission::Granted,
                fix: None,
                last_known: None,
                position_tx: Mutex::new(None),
                subscriptions: AtomicUsize::new(0),
            }
        }

        fn denied() -> Self {
            Self {
                permission: Permission::Denied,
                ..Self::granted()
            }
        }

        fn position_tx(&self) -> mpsc::Sender<PositionFix> {
            self.position_tx
                .lock()
                .unwrap()
                .clone()
                .expect("no active subscription")
        }

        fn close_stream(&self) {
            *self.position_tx.lock().unwrap() = None;
        }

        fn subscription_count(&self) -> usize {
            self.subscriptions.load(Ordering::SeqCst)
        }
    }

    impl LocationProvider for ScriptedProvider {
        fn request_permission(&self) -> BoxFuture<'_, Permission> {
            let permission = self.permission;
            Box::pin(async move { permission })
        }

        fn current_fix(&self) -> BoxFuture<'_, Result<PositionFix>> {
            let fix = self.fix;
            Box::pin(async move { fix.ok_or(TrackError::LocationUnavailable) })
        }

        fn last_known_fix(&self) -> BoxFuture<'_, Option<PositionFix>> {
            let fix = self.last_known;
            Box::pin(async move { fix })
        }

        fn subscribe(&self) -> PositionUpdates {
            self.subscriptions.fetch_add(1, Ordering::SeqCst);
            let (tx, updates) = PositionUpdates::channel(8);
            *self.position_tx.lock().unwrap() = Some(tx);
            updates
        }
    }

    /// Source with a scripted spot list, a failure switch and an optional
    /// gate that holds lookups until the test releases them.
    struct ScriptedSource {
        spots: Mutex<Vec<ParkingSpot>>,
        fail: AtomicBool,
        hold: Option<Arc<Notify>>,
    }

    impl ScriptedSource {
        fn with_spots(spots: Vec<ParkingSpot>) -> Self {
            Self {
                spots: Mutex::new(spots),
                fail: AtomicBool::new(false),
                hold: None,
            }
        }

        fn gated(spots: Vec<ParkingSpot>, hold: Arc<Notify>) -> Self {
            Self {
                hold: Some(hold),
                ..Self::with_spots(spots)
            }
        }

        fn set_failing(&self, failing: bool) {
            self.fail.store(failing, Ordering::SeqCst);
        }
    }

    impl SpotSource for ScriptedSource {
        fn list_spots(
            &self,
            _near: GeoPoint,
            _radius_m: f64,
        ) -> BoxFuture<'_, Result<Vec<ParkingSpot>>> {
            let fail = self.fail.load(Ordering::SeqCst);
            let spots = self.spots.lock().unwrap().clone();
            let hold = self.hold.clone();
            Box::pin(async move {
                if let Some(hold) = hold {
                    hold.notified().await;
                }
                if fail {
                    Err(TrackError::UpstreamData("scripted outage".into()))
                } else {
                    Ok(spots)
                }
            })
        }
    }

    #[derive(Default)]
    struct RecordingSink {
        alerts: Mutex<Vec<ProximityAlert>>,
    }

    impl RecordingSink {
        fn count(&self) -> usize {
            self.alerts.lock().unwrap().len()
        }

        fn spot_ids(&self) -> Vec<SpotId> {
            self.alerts.lock().unwrap().iter().map(|a| a.spot_id).collect()
        }
    }

    impl AlertSink for RecordingSink {
        fn emit(&self, _title: &str, _body: &str, alert: &ProximityAlert) {
            self.alerts.lock().unwrap().push(alert.clone());
        }
    }

    fn spot_at(id: u64, lat: f64, lon: f64) -> ParkingSpot {
        ParkingSpot {
            id: SpotId(id),
            name: format!("Garage {id}"),
            address: None,
            location: GeoPoint::new(lat, lon),
            available_units: 4,
            total_units: 20,
        }
    }

    fn fix_at(lat: f64, lon: f64) -> PositionFix {
        PositionFix::new(GeoPoint::new(lat, lon))
    }

    fn session_with(
        provider: Arc<ScriptedProvider>,
        source: Arc<ScriptedSource>,
        sink: Arc<RecordingSink>,
    ) -> TrackingSession {
        TrackingSession::new(provider, source, sink, TrackerConfig::default()).unwrap()
    }

    async fn expect_ranking(
        events: &mut broadcast::Receiver<TrackerEvent>,
    ) -> (PositionFix, Vec<RankedSpot>, NearbySummary) {
        match events.recv().await.unwrap() {
            TrackerEvent::RankingUpdated {
                fix,
                ranked,
                summary,
            } => (fix, ranked, summary),
            other => panic!("expected RankingUpdated, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_fix_drives_ranking_and_alert() {
        let provider = Arc::new(ScriptedProvider::granted());
        // ~111 m from the origin: inside both radii
        let source = Arc::new(ScriptedSource::with_spots(vec![spot_at(1, 0.0, 0.001)]));
        let sink = Arc::new(RecordingSink::default());
        let session = session_with(provider.clone(), source, sink.clone());

        let mut events = session.events();
        session.start_tracking().await.unwrap();
        assert_eq!(session.state(), SessionState::Active);

        provider.position_tx().send(fix_at(0.0, 0.0)).await.unwrap();
        let (fix, ranked, summary) = expect_ranking(&mut events).await;
        assert_eq!(fix.point, GeoPoint::new(0.0, 0.0));
        assert_eq!(ranked.len(), 1);
        assert_eq!(ranked[0].spot.id, SpotId(1));
        assert!((ranked[0].distance_m - 111.2).abs() < 0.5);
        assert_eq!(summary.spot_count, 1);
        assert_eq!(summary.available_units, 4);

        // Alerts for the pass are delivered before the event is broadcast
        assert_eq!(sink.count(), 1);
        assert_eq!(session.last_ranking().len(), 1);
        assert_eq!(session.nearby_summary().spot_count, 1);
        assert_eq!(session.spot_info().spot_count, 1);

        session.stop_tracking().await;
        assert_eq!(session.state(), SessionState::Stopped);
    }

    #[tokio::test]
    async fn test_repeated_fixes_alert_once() {
        let provider = Arc::new(ScriptedProvider::granted());
        let source = Arc::new(ScriptedSource::with_spots(vec![spot_at(1, 0.0, 0.001)]));
        let sink = Arc::new(RecordingSink::default());
        let session = session_with(provider.clone(), source, sink.clone());

        let mut events = session.events();
        session.start_tracking().await.unwrap();

        for _ in 0..3 {
            provider.position_tx().send(fix_at(0.0, 0.0)).await.unwrap();
            expect_ranking(&mut events).await;
        }

        assert_eq!(sink.count(), 1);
        session.stop_tracking().await;
    }

    #[tokio::test]
    async fn test_restart_rearms_alerts() {
        let provider = Arc::new(ScriptedProvider::granted());
        let source = Arc::new(ScriptedSource::with_spots(vec![spot_at(1, 0.0, 0.001)]));
        let sink = Arc::new(RecordingSink::default());
        let session = session_with(provider.clone(), source, sink.clone());

        let mut events = session.events();
        session.start_tracking().await.unwrap();
        provider.position_tx().send(fix_at(0.0, 0.0)).await.unwrap();
        expect_ranking(&mut events).await;
        session.stop_tracking().await;
        assert_eq!(sink.count(), 1);
        assert!(session.last_ranking().is_empty());

        // A fresh session must not remember the previous notified-set
        session.start_tracking().await.unwrap();
        provider.position_tx().send(fix_at(0.0, 0.0)).await.unwrap();
        expect_ranking(&mut events).await;
        session.stop_tracking().await;

        assert_eq!(sink.count(), 2);
        assert_eq!(sink.spot_ids(), vec![SpotId(1), SpotId(1)]);
    }

    #[tokio::test]
    async fn test_permission_denied_leaves_session_stopped() {
        let provider = Arc::new(ScriptedProvider::denied());
        let source = Arc::new(ScriptedSource::with_spots(vec![]));
        let sink = Arc::new(RecordingSink::default());
        let session = session_with(provider.clone(), source, sink);

        let result = session.start_tracking().await;
        assert!(matches!(result, Err(TrackError::PermissionDenied)));
        assert_eq!(session.state(), SessionState::Stopped);
        assert_eq!(provider.subscription_count(), 0);

        // A later grant must work on the same session
        session.stop_tracking().await;
        assert_eq!(session.state(), SessionState::Stopped);
    }

    #[tokio::test]
    async fn test_start_is_idempotent() {
        let provider = Arc::new(ScriptedProvider::granted());
        let source = Arc::new(ScriptedSource::with_spots(vec![]));
        let sink = Arc::new(RecordingSink::default());
        let session = session_with(provider.clone(), source, sink);

        session.start_tracking().await.unwrap();
        session.start_tracking().await.unwrap();
        assert_eq!(provider.subscription_count(), 1);
        assert_eq!(session.state(), SessionState::Active);

        session.stop_tracking().await;
    }

    #[tokio::test]
    async fn test_stop_without_start_is_noop() {
        let provider = Arc::new(ScriptedProvider::granted());
        let source = Arc::new(ScriptedSource::with_spots(vec![]));
        let sink = Arc::new(RecordingSink::default());
        let session = session_with(provider, source, sink);

        session.stop_tracking().await;
        session.stop_tracking().await;
        assert_eq!(session.state(), SessionState::Stopped);
    }

    #[tokio::test]
    async fn test_stop_drops_subscription() {
        let provider = Arc::new(ScriptedProvider::granted());
        let source = Arc::new(ScriptedSource::with_spots(vec![]));
        let sink = Arc::new(RecordingSink::default());
        let session = session_with(provider.clone(), source, sink);

        session.start_tracking().await.unwrap();
        let tx = provider.position_tx();
        session.stop_tracking().await;

        // The pump dropped its stream, so the producer sees a closed channel
        assert!(tx.send(fix_at(0.0, 0.0)).await.is_err());
    }

    #[tokio::test]
    async fn test_fix_in_flight_across_stop_is_discarded() {
        let hold = Arc::new(Notify::new());
        let provider = Arc::new(ScriptedProvider::granted());
        let source = Arc::new(ScriptedSource::gated(
            vec![spot_at(1, 0.0, 0.001)],
            hold.clone(),
        ));
        let sink = Arc::new(RecordingSink::default());
        let session = session_with(provider.clone(), source, sink.clone());

        session.start_tracking().await.unwrap();
        provider.position_tx().send(fix_at(0.0, 0.0)).await.unwrap();

        // Stop while the spot lookup for that fix is (potentially) in
        // flight, then release the lookup.
        let stopper = {
            let session = session.clone();
            tokio::spawn(async move { session.stop_tracking().await })
        };
        while session.state() != SessionState::Stopped {
            tokio::task::yield_now().await;
        }
        hold.notify_one();
        stopper.await.unwrap();

        assert_eq!(sink.count(), 0);
        assert!(session.last_ranking().is_empty());
        assert_eq!(session.spot_info().spot_count, 0);
    }

    #[tokio::test]
    async fn test_source_failure_clears_ranking_and_continues() {
        let provider = Arc::new(ScriptedProvider::granted());
        let source = Arc::new(ScriptedSource::with_spots(vec![spot_at(1, 0.0, 0.001)]));
        let sink = Arc::new(RecordingSink::default());
        let session = session_with(provider.clone(), source.clone(), sink.clone());

        let mut events = session.events();
        session.start_tracking().await.unwrap();

        source.set_failing(true);
        provider.position_tx().send(fix_at(0.0, 0.0)).await.unwrap();
        match events.recv().await.unwrap() {
            TrackerEvent::SourceError { message } => {
                assert!(message.contains("scripted outage"), "got {message}");
            }
            other => panic!("expected SourceError, got {other:?}"),
        }
        assert_eq!(session.state(), SessionState::Active);
        assert!(session.last_ranking().is_empty());
        assert_eq!(sink.count(), 0);

        // The watch survives the outage and alerts once data is back
        source.set_failing(false);
        provider.position_tx().send(fix_at(0.0, 0.0)).await.unwrap();
        expect_ranking(&mut events).await;
        assert_eq!(sink.count(), 1);

        session.stop_tracking().await;
    }

    #[tokio::test]
    async fn test_clear_notified_cache_rearms_mid_session() {
        let provider = Arc::new(ScriptedProvider::granted());
        let source = Arc::new(ScriptedSource::with_spots(vec![spot_at(1, 0.0, 0.001)]));
        let sink = Arc::new(RecordingSink::default());
        let session = session_with(provider.clone(), source, sink.clone());

        let mut events = session.events();
        session.start_tracking().await.unwrap();

        provider.position_tx().send(fix_at(0.0, 0.0)).await.unwrap();
        expect_ranking(&mut events).await;
        assert_eq!(sink.count(), 1);

        session.clear_notified_cache();
        provider.position_tx().send(fix_at(0.0, 0.0)).await.unwrap();
        expect_ranking(&mut events).await;
        assert_eq!(sink.count(), 2);

        session.stop_tracking().await;
    }

    #[tokio::test]
    async fn test_stream_end_stops_session() {
        let provider = Arc::new(ScriptedProvider::granted());
        let source = Arc::new(ScriptedSource::with_spots(vec![]));
        let sink = Arc::new(RecordingSink::default());
        let session = session_with(provider.clone(), source, sink);

        let mut events = session.events();
        session.start_tracking().await.unwrap();

        provider.close_stream();
        match events.recv().await.unwrap() {
            TrackerEvent::StreamEnded => {}
            other => panic!("expected StreamEnded, got {other:?}"),
        }
        assert_eq!(session.state(), SessionState::Stopped);

        // Stop after a natural end stays a no-op
        session.stop_tracking().await;
        assert_eq!(session.state(), SessionState::Stopped);
    }

    #[tokio::test]
    async fn test_current_position_prefers_fresh_fix() {
        let provider = Arc::new(ScriptedProvider {
            fix: Some(fix_at(6.672834, -1.567513)),
            ..ScriptedProvider::granted()
        });
        let source = Arc::new(ScriptedSource::with_spots(vec![]));
        let sink = Arc::new(RecordingSink::default());
        let session = session_with(provider, source, sink);

        let fix = session.current_position().await.unwrap();
        assert!(!fix.stale);
        assert_eq!(fix.point, GeoPoint::new(6.672834, -1.567513));
        assert_eq!(session.last_fix(), Some(fix));
    }

    #[tokio::test]
    async fn test_current_position_falls_back_to_last_known() {
        let provider = Arc::new(ScriptedProvider {
            last_known: Some(fix_at(6.672834, -1.567513)),
            ..ScriptedProvider::granted()
        });
        let source = Arc::new(ScriptedSource::with_spots(vec![]));
        let sink = Arc::new(RecordingSink::default());
        let session = session_with(provider, source, sink);

        let fix = session.current_position().await.unwrap();
        assert!(fix.stale);
        assert_eq!(fix.point, GeoPoint::new(6.672834, -1.567513));
    }

    #[tokio::test]
    async fn test_current_position_unavailable() {
        let provider = Arc::new(ScriptedProvider::granted());
        let source = Arc::new(ScriptedSource::with_spots(vec![]));
        let sink = Arc::new(RecordingSink::default());
        let session = session_with(provider, source, sink);

        let result = session.current_position().await;
        assert!(matches!(result, Err(TrackError::LocationUnavailable)));
        assert_eq!(session.last_fix(), None);
    }

    #[tokio::test]
    async fn test_rejects_inconsistent_config() {
        let provider = Arc::new(ScriptedProvider::granted());
        let source = Arc::new(ScriptedSource::with_spots(vec![]));
        let sink = Arc::new(RecordingSink::default());

        let inverted = TrackerConfig {
            browse_radius_m: 200.0,
            alert_radius_m: 500.0,
            ..TrackerConfig::default()
        };
        let result = TrackingSession::new(provider.clone(), source.clone(), sink.clone(), inverted);
        assert!(matches!(result, Err(TrackError::InvalidArgument(_))));

        for bad_radius in [0.0, -1.0, f64::NAN] {
            let config = TrackerConfig {
                browse_radius_m: bad_radius,
                ..TrackerConfig::default()
            };
            let result =
                TrackingSession::new(provider.clone(), source.clone(), sink.clone(), config);
            assert!(
                matches!(result, Err(TrackError::InvalidArgument(_))),
                "browse radius {bad_radius} should be rejected"
            );
        }
    }

    #[tokio::test]
    async fn test_alert_radius_narrower_than_browse() {
        let provider = Arc::new(ScriptedProvider::granted());
        // ~334 m away: ranked (inside 1000 m) but never alerted (outside 200 m)
        let source = Arc::new(ScriptedSource::with_spots(vec![spot_at(1, 0.0, 0.003)]));
        let sink = Arc::new(RecordingSink::default());
        let session = session_with(provider.clone(), source, sink.clone());

        let mut events = session.events();
        session.start_tracking().await.unwrap();
        provider.position_tx().send(fix_at(0.0, 0.0)).await.unwrap();

        let (_, ranked, _) = expect_ranking(&mut events).await;
        assert_eq!(ranked.len(), 1);
        assert_eq!(sink.count(), 0);

        session.stop_tracking().await;
    }
}
