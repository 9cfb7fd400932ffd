use std::{future::pending, sync::Arc, time::Duration};

use tokio::{
    sync::{mpsc, oneshot, watch},
    time::{self, Instant, Interval},
};

use crate::{
    collaborators::{IdentityProvider, PositionSource, PositionSubscription, RideSink, WatchOptions},
    cost::CostConfig,
    error::RideError,
    position_fix::PositionFix,
    ride_session::{FixOutcome, RideSession, RideSnapshot, RideSummary},
};

pub const TICK_PERIOD: Duration = Duration::from_secs(1);
const WATCH_OPTIONS: WatchOptions = WatchOptions { high_accuracy: true };

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum FinishOutcome {
    /// The ride was handed to the sink.
    Saved(RideSummary),
    /// Nothing to finish or save, state untouched.
    Ignored,
}

enum Command {
    Start(oneshot::Sender<RideSnapshot>),
    Pause(oneshot::Sender<RideSnapshot>),
    Finish(oneshot::Sender<Result<FinishOutcome, RideError>>),
    RetrySave(oneshot::Sender<Result<FinishOutcome, RideError>>),
    Snapshot(oneshot::Sender<RideSnapshot>),
}

/// Owner task of one ride. Timer ticks, position fixes and commands are all consumed by the
/// same loop, so the session only ever has a single writer.
pub struct RideTracker {
    session: RideSession,
    position_source: Arc<dyn PositionSource>,
    identity: Arc<dyn IdentityProvider>,
    sink: Arc<dyn RideSink>,
    subscription: Option<PositionSubscription>,
    ticker: Option<Interval>,
    /// Summary of a finished ride that has not reached the sink yet.
    unsaved: Option<RideSummary>,
    snapshots: watch::Sender<RideSnapshot>,
}

impl RideTracker {
    pub fn new(
        config: CostConfig,
        position_source: Arc<dyn PositionSource>,
        identity: Arc<dyn IdentityProvider>,
        sink: Arc<dyn RideSink>,
    ) -> Self {
        let session = RideSession::new(config);
        let (snapshots, _) = watch::channel(session.snapshot());

        Self {
            session,
            position_source,
            identity,
            sink,
            subscription: None,
            ticker: None,
            unsaved: None,
            snapshots,
        }
    }

    /// Moves the tracker onto its own task. The task ends when every handle is dropped.
    pub fn spawn(self) -> RideHandle {
        let (commands, rx) = mpsc::channel(32);
        let snapshots = self.snapshots.subscribe();
        tokio::spawn(self.run(rx));

        RideHandle {
            commands,
            snapshots,
        }
    }

    async fn run(mut self, mut commands: mpsc::Receiver<Command>) {
        tracing::debug!("Ride tracker started");

        loop {
            tokio::select! {
                biased;

                _ = next_tick(&mut self.ticker) => {
                    if self.session.tick() {
                        self.publish();
                    }
                }
                fix = next_fix(&mut self.subscription) => self.on_fix(fix),
                command = commands.recv() => {
                    let Some(command) = command else {
                        break;
                    };
                    self.handle(command).await;
                }
            }
        }

        self.stop_tracking();
        tracing::debug!("Ride tracker stopped");
    }

    async fn handle(&mut self, command: Command) {
        match command {
            Command::Start(reply) => {
                self.start();
                let _ = reply.send(self.session.snapshot());
            }
            Command::Pause(reply) => {
                self.pause();
                let _ = reply.send(self.session.snapshot());
            }
            Command::Finish(reply) => {
                let result = self.finish().await;
                let _ = reply.send(result);
            }
            Command::RetrySave(reply) => {
                let result = self.save().await;
                let _ = reply.send(result);
            }
            Command::Snapshot(reply) => {
                let _ = reply.send(self.session.snapshot());
            }
        }
    }

    fn start(&mut self) {
        if !self.session.start() {
            tracing::debug!("Start ignored while {:?}", self.session.status());
            return;
        }

        // At most one subscription, the old one goes first
        self.stop_tracking();

        match self.position_source.subscribe(WATCH_OPTIONS) {
            Ok(subscription) => self.subscription = Some(subscription),
            Err(err) => {
                tracing::warn!("Tracking without GPS: {}", err);
                self.session.mark_gps_unavailable();
            }
        }
        self.ticker = Some(time::interval_at(Instant::now() + TICK_PERIOD, TICK_PERIOD));

        tracing::info!("Ride running");
        self.publish();
    }

    fn pause(&mut self) {
        if !self.session.pause() {
            tracing::debug!("Pause ignored while {:?}", self.session.status());
            return;
        }
        self.stop_tracking();

        tracing::info!("Ride paused");
        self.publish();
    }

    async fn finish(&mut self) -> Result<FinishOutcome, RideError> {
        let Some(summary) = self.session.finish() else {
            tracing::debug!("Finish ignored while {:?}", self.session.status());
            return Ok(FinishOutcome::Ignored);
        };
        self.stop_tracking();
        self.publish();

        tracing::info!(
            "Ride finished: {:.2} km in {} s, cost {:.2}",
            summary.distance_km,
            summary.duration_seconds,
            summary.cost
        );

        self.unsaved = Some(summary);
        self.save().await
    }

    async fn save(&mut self) -> Result<FinishOutcome, RideError> {
        let Some(summary) = self.unsaved else {
            return Ok(FinishOutcome::Ignored);
        };

        let Some(owner) = self.identity.current_owner() else {
            tracing::warn!("Finished ride kept unsaved, nobody is signed in");
            return Err(RideError::NotAuthenticated);
        };

        if let Err(err) = self.sink.append_ride(&owner, &summary).await {
            tracing::error!("Failed to save ride for {}: {}", owner, err);
            return Err(err.into());
        }

        self.unsaved = None;
        tracing::info!("Ride saved for {}", owner);
        Ok(FinishOutcome::Saved(summary))
    }

    fn on_fix(&mut self, fix: Option<PositionFix>) {
        let Some(fix) = fix else {
            tracing::warn!("Position source stopped delivering fixes");
            self.subscription = None;
            self.session.mark_gps_unavailable();
            self.publish();
            return;
        };

        match self.session.on_position_fix(&fix) {
            FixOutcome::Accepted { distance_km } => tracing::trace!("Moved {:.4} km", distance_km),
            FixOutcome::Drift { distance_km } => tracing::trace!("Drift of {:.4} km ignored", distance_km),
            FixOutcome::Invalid => tracing::debug!("Invalid fix ignored: {:?}", fix.position),
            FixOutcome::Seeded | FixOutcome::NotRunning => {}
        }
        self.publish();
    }

    /// Cancels both event sources.
    fn stop_tracking(&mut self) {
        self.ticker = None;
        if let Some(subscription) = self.subscription.take() {
            self.position_source.unsubscribe(subscription);
        }
    }

    fn publish(&self) {
        self.snapshots.send_replace(self.session.snapshot());
    }
}

async fn next_tick(ticker: &mut Option<Interval>) {
    match ticker {
        Some(ticker) => {
            ticker.tick().await;
        }
        None => pending().await,
    }
}

async fn next_fix(subscription: &mut Option<PositionSubscription>) -> Option<PositionFix> {
    match subscription {
        Some(subscription) => subscription.next_fix().await,
        None => pending().await,
    }
}

/// Cheap handle to a running [`RideTracker`].
#[derive(Clone)]
pub struct RideHandle {
    commands: mpsc::Sender<Command>,
    snapshots: watch::Receiver<RideSnapshot>,
}

impl RideHandle {
    async fn request<T>(&self, command: impl FnOnce(oneshot::Sender<T>) -> Command) -> Result<T, RideError> {
        let (tx, rx) = oneshot::channel();
        self.commands.send(command(tx)).await.map_err(|_| RideError::TrackerStopped)?;
        rx.await.map_err(|_| RideError::TrackerStopped)
    }

    /// Start, or resume after a pause.
    pub async fn start(&self) -> Result<RideSnapshot, RideError> {
        self.request(Command::Start).await
    }

    pub async fn pause(&self) -> Result<RideSnapshot, RideError> {
        self.request(Command::Pause).await
    }

    pub async fn finish(&self) -> Result<FinishOutcome, RideError> {
        self.request(Command::Finish).await?
    }

    /// Tries again to save a finished ride whose save failed.
    pub async fn retry_save(&self) -> Result<FinishOutcome, RideError> {
        self.request(Command::RetrySave).await?
    }

    pub async fn snapshot(&self) -> Result<RideSnapshot, RideError> {
        self.request(Command::Snapshot).await
    }

    /// Receiver updated after every change to the ride.
    pub fn subscribe(&self) -> watch::Receiver<RideSnapshot> {
        self.snapshots.clone()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use async_trait::async_trait;
    use chrono::Utc;

    use super::*;
    use crate::{
        collaborators::{ChannelPositionSource, PersistenceError, StaticIdentity},
        geo::haversine_km,
        ride_session::{GpsStatus, RideStatus},
        user::OwnerId,
    };

    #[derive(Default)]
    struct MemorySink {
        rides: Mutex<Vec<(OwnerId, RideSummary)>>,
        failing: Mutex<bool>,
    }

    impl MemorySink {
        fn rides(&self) -> Vec<(OwnerId, RideSummary)> {
            self.rides.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl RideSink for MemorySink {
        async fn append_ride(&self, owner: &OwnerId, summary: &RideSummary) -> Result<(), PersistenceError> {
            if *self.failing.lock().unwrap() {
                return Err(PersistenceError("store offline".into()));
            }
            self.rides.lock().unwrap().push((owner.clone(), *summary));
            Ok(())
        }
    }

    #[derive(Default)]
    struct SwitchableIdentity(Mutex<Option<OwnerId>>);

    impl IdentityProvider for SwitchableIdentity {
        fn current_owner(&self) -> Option<OwnerId> {
            self.0.lock().unwrap().clone()
        }
    }

    struct Harness {
        handle: RideHandle,
        source: ChannelPositionSource,
        sink: Arc<MemorySink>,
    }

    fn harness_with(identity: Arc<dyn IdentityProvider>) -> Harness {
        let source = ChannelPositionSource::new();
        let sink = Arc::new(MemorySink::default());
        let handle = RideTracker::new(CostConfig::default(), Arc::new(source.clone()), identity, sink.clone()).spawn();
        Harness { handle, source, sink }
    }

    fn harness() -> Harness {
        harness_with(Arc::new(StaticIdentity(OwnerId::new("rider-1"))))
    }

    fn fix(lat: f64, lon: f64) -> PositionFix {
        PositionFix::new(lat, lon, Some(8.0), Utc::now())
    }

    #[tokio::test(start_paused = true)]
    async fn scenario_three_fixes_then_finish() {
        let h = harness();
        h.handle.start().await.unwrap();

        let points = [fix(28.6000, 77.2000), fix(28.6005, 77.2000), fix(28.6005, 77.2050)];
        for point in points {
            assert!(h.source.push(point));
        }
        time::sleep(Duration::from_millis(2500)).await;

        let snapshot = h.handle.snapshot().await.unwrap();
        let expected = haversine_km(points[0].position, points[1].position) + haversine_km(points[1].position, points[2].position);
        assert!((snapshot.total_distance_km - expected).abs() < 1e-9);
        assert!((snapshot.estimated_cost - expected * 105.0 / 45.0).abs() < 1e-9);
        assert_eq!(snapshot.elapsed_seconds, 2);
        assert_eq!(snapshot.gps_status, GpsStatus::Locked);
        assert_eq!(snapshot.display_speed(), 29);

        let FinishOutcome::Saved(summary) = h.handle.finish().await.unwrap() else {
            panic!("ride was not saved");
        };
        assert_eq!(summary.duration_seconds, 2);
        assert_eq!(h.sink.rides(), vec![(OwnerId::new("rider-1").unwrap(), summary)]);
    }

    #[tokio::test(start_paused = true)]
    async fn pause_cancels_timer_and_subscription() {
        let h = harness();
        h.handle.start().await.unwrap();
        h.source.push(fix(28.6, 77.2));
        h.source.push(fix(28.601, 77.2));
        time::sleep(Duration::from_millis(1500)).await;

        let paused = h.handle.pause().await.unwrap();
        assert_eq!(paused.status, RideStatus::Paused);
        assert_eq!(paused.speed_kmh, 0.0);
        assert!(!h.source.is_subscribed());

        for i in 0..5 {
            assert!(!h.source.push(fix(28.61 + i as f64 * 0.01, 77.2)));
        }
        time::sleep(Duration::from_secs(10)).await;

        assert_eq!(h.handle.snapshot().await.unwrap(), paused);
    }

    #[tokio::test(start_paused = true)]
    async fn resume_counts_only_running_time() {
        let h = harness();
        h.handle.start().await.unwrap();
        h.source.push(fix(28.6, 77.2));
        h.source.push(fix(28.601, 77.2));
        time::sleep(Duration::from_millis(2500)).await;

        let paused = h.handle.pause().await.unwrap();
        time::sleep(Duration::from_secs(5)).await;

        let resumed = h.handle.start().await.unwrap();
        assert_eq!(resumed.status, RideStatus::Running);
        assert_eq!(resumed.total_distance_km, paused.total_distance_km);
        time::sleep(Duration::from_millis(1500)).await;

        let FinishOutcome::Saved(summary) = h.handle.finish().await.unwrap() else {
            panic!("ride was not saved");
        };
        assert_eq!(summary.duration_seconds, 3);
        assert_eq!(summary.distance_km, paused.total_distance_km);
        assert_eq!(h.source.subscribe_calls(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn finish_stops_everything_and_is_not_repeated() {
        let h = harness();
        h.handle.start().await.unwrap();
        h.source.push(fix(28.6, 77.2));
        h.source.push(fix(28.601, 77.2));

        assert!(matches!(h.handle.finish().await.unwrap(), FinishOutcome::Saved(_)));
        let finished = h.handle.snapshot().await.unwrap();
        assert_eq!(finished.status, RideStatus::Finished);
        assert_eq!(finished.gps_status, GpsStatus::Off);
        assert!(!h.source.is_subscribed());

        time::sleep(Duration::from_secs(5)).await;
        assert!(!h.source.push(fix(28.7, 77.2)));
        assert_eq!(h.handle.start().await.unwrap(), finished);
        assert_eq!(h.handle.finish().await.unwrap(), FinishOutcome::Ignored);
        assert_eq!(h.handle.retry_save().await.unwrap(), FinishOutcome::Ignored);
        assert_eq!(h.handle.snapshot().await.unwrap(), finished);
        assert_eq!(h.sink.rides().len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn illegal_commands_are_noops() {
        let h = harness();
        let idle = h.handle.pause().await.unwrap();
        assert_eq!(idle.status, RideStatus::Idle);
        assert_eq!(h.handle.finish().await.unwrap(), FinishOutcome::Ignored);
        assert_eq!(h.source.subscribe_calls(), 0);

        h.handle.start().await.unwrap();
        h.handle.start().await.unwrap();
        assert_eq!(h.source.subscribe_calls(), 1);
        assert!(h.sink.rides().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn finish_without_identity_keeps_summary_for_retry() {
        let identity = Arc::new(SwitchableIdentity::default());
        let h = harness_with(identity.clone());
        h.handle.start().await.unwrap();
        h.source.push(fix(28.6, 77.2));
        h.source.push(fix(28.601, 77.2));
        time::sleep(Duration::from_millis(1500)).await;

        assert_eq!(h.handle.finish().await, Err(RideError::NotAuthenticated));
        let snapshot = h.handle.snapshot().await.unwrap();
        assert_eq!(snapshot.status, RideStatus::Finished);
        assert!(snapshot.total_distance_km > 0.1);
        assert_eq!(snapshot.elapsed_seconds, 1);
        assert!(h.sink.rides().is_empty());

        // Still nobody
        assert_eq!(h.handle.retry_save().await, Err(RideError::NotAuthenticated));

        *identity.0.lock().unwrap() = OwnerId::new("rider-2");
        let FinishOutcome::Saved(summary) = h.handle.retry_save().await.unwrap() else {
            panic!("ride was not saved");
        };
        assert_eq!(summary.distance_km, snapshot.total_distance_km);
        assert_eq!(h.handle.retry_save().await.unwrap(), FinishOutcome::Ignored);
        assert_eq!(h.sink.rides().len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn persistence_failure_is_reported_not_retried() {
        let h = harness();
        *h.sink.failing.lock().unwrap() = true;
        h.handle.start().await.unwrap();

        assert!(matches!(h.handle.finish().await, Err(RideError::Persistence(_))));
        assert!(h.sink.rides().is_empty());

        *h.sink.failing.lock().unwrap() = false;
        assert!(matches!(h.handle.retry_save().await.unwrap(), FinishOutcome::Saved(_)));
        assert_eq!(h.sink.rides().len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn denied_permission_keeps_the_clock_running() {
        let h = harness();
        h.source.set_permission_denied(true);

        let started = h.handle.start().await.unwrap();
        assert_eq!(started.status, RideStatus::Running);
        assert_eq!(started.gps_status, GpsStatus::Unavailable);

        time::sleep(Duration::from_millis(3500)).await;
        let snapshot = h.handle.snapshot().await.unwrap();
        assert_eq!(snapshot.elapsed_seconds, 3);
        assert_eq!(snapshot.total_distance_km, 0.0);
    }

    #[tokio::test(start_paused = true)]
    async fn lost_signal_is_reported_as_unavailable() {
        let h = harness();
        h.handle.start().await.unwrap();
        h.source.push(fix(28.6, 77.2));
        h.source.close();
        time::sleep(Duration::from_millis(1500)).await;

        let snapshot = h.handle.snapshot().await.unwrap();
        assert_eq!(snapshot.status, RideStatus::Running);
        assert_eq!(snapshot.gps_status, GpsStatus::Unavailable);
        assert_eq!(snapshot.elapsed_seconds, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn snapshots_are_published() {
        let h = harness();
        let mut snapshots = h.handle.subscribe();
        assert_eq!(snapshots.borrow_and_update().status, RideStatus::Idle);

        h.handle.start().await.unwrap();
        assert!(snapshots.has_changed().unwrap());
        assert_eq!(snapshots.borrow_and_update().status, RideStatus::Running);

        time::sleep(Duration::from_millis(1500)).await;
        assert_eq!(snapshots.borrow_and_update().elapsed_seconds, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn dropping_the_handle_releases_the_position_source() {
        let h = harness();
        h.handle.start().await.unwrap();
        assert!(h.source.is_subscribed());

        drop(h.handle);
        time::sleep(Duration::from_millis(10)).await;
        assert!(!h.source.is_subscribed());
    }
}
