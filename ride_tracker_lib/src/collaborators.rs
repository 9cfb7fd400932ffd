use std::sync::{Arc, Mutex, MutexGuard};

use async_trait::async_trait;
use thiserror::Error;
use tokio::sync::mpsc;

use crate::{position_fix::PositionFix, ride_session::RideSummary, user::OwnerId};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WatchOptions {
    pub high_accuracy: bool,
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum PositionError {
    #[error("Position permission denied")]
    PermissionDenied,
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("{0}")]
pub struct PersistenceError(pub String);

/// Live subscription to a position source. Dropping it, or handing it back through
/// [`PositionSource::unsubscribe`], ends the delivery.
#[derive(Debug)]
pub struct PositionSubscription {
    id: u64,
    fixes: mpsc::UnboundedReceiver<PositionFix>,
}

impl PositionSubscription {
    pub fn new(id: u64, fixes: mpsc::UnboundedReceiver<PositionFix>) -> Self {
        Self { id, fixes }
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    /// Next fix in arrival order. `None` once the source has stopped delivering for good.
    pub async fn next_fix(&mut self) -> Option<PositionFix> {
        self.fixes.recv().await
    }
}

/// Device positioning capability.
pub trait PositionSource: Send + Sync {
    fn subscribe(&self, options: WatchOptions) -> Result<PositionSubscription, PositionError>;

    fn unsubscribe(&self, subscription: PositionSubscription);
}

/// Who is signed in, if anyone.
pub trait IdentityProvider: Send + Sync {
    fn current_owner(&self) -> Option<OwnerId>;
}

/// Where finished rides go.
#[async_trait]
pub trait RideSink: Send + Sync {
    async fn append_ride(&self, owner: &OwnerId, summary: &RideSummary) -> Result<(), PersistenceError>;
}

/// Fixed identity, resolved once by whoever constructs the tracker.
#[derive(Debug, Clone, Default)]
pub struct StaticIdentity(pub Option<OwnerId>);

impl IdentityProvider for StaticIdentity {
    fn current_owner(&self) -> Option<OwnerId> {
        self.0.clone()
    }
}

#[derive(Debug, Default)]
struct SourceState {
    next_id: u64,
    active: Option<(u64, mpsc::UnboundedSender<PositionFix>)>,
    permission_denied: bool,
    subscribe_calls: usize,
}

/// Position source fed from the outside with [`ChannelPositionSource::push`]. Holds at
/// most one active subscription; subscribing again replaces (and closes) the old one.
#[derive(Debug, Clone, Default)]
pub struct ChannelPositionSource {
    state: Arc<Mutex<SourceState>>,
}

impl ChannelPositionSource {
    pub fn new() -> Self {
        Self::default()
    }

    fn state(&self) -> MutexGuard<'_, SourceState> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Delivers a fix to the active subscriber. Returns false when nobody is listening.
    pub fn push(&self, fix: PositionFix) -> bool {
        let mut state = self.state();
        let Some((_, sender)) = &state.active else {
            return false;
        };
        if sender.send(fix).is_err() {
            state.active = None;
            return false;
        }
        true
    }

    pub fn set_permission_denied(&self, denied: bool) {
        self.state().permission_denied = denied;
    }

    /// Simulates losing the signal for good: the current subscription ends.
    pub fn close(&self) {
        self.state().active = None;
    }

    pub fn is_subscribed(&self) -> bool {
        self.state().active.is_some()
    }

    pub fn subscribe_calls(&self) -> usize {
        self.state().subscribe_calls
    }
}

impl PositionSource for ChannelPositionSource {
    fn subscribe(&self, options: WatchOptions) -> Result<PositionSubscription, PositionError> {
        let mut state = self.state();
        state.subscribe_calls += 1;
        if state.permission_denied {
            return Err(PositionError::PermissionDenied);
        }

        if let Some((old_id, _)) = state.active.take() {
            tracing::debug!("Replacing position subscription {}", old_id);
        }

        let id = state.next_id;
        state.next_id += 1;
        let (tx, rx) = mpsc::unbounded_channel();
        state.active = Some((id, tx));

        tracing::debug!("Position subscription {} opened (high accuracy: {})", id, options.high_accuracy);
        Ok(PositionSubscription::new(id, rx))
    }

    fn unsubscribe(&self, subscription: PositionSubscription) {
        let mut state = self.state();
        if matches!(&state.active, Some((id, _)) if *id == subscription.id()) {
            state.active = None;
            tracing::debug!("Position subscription {} closed", subscription.id());
        }
    }
}
