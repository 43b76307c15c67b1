//! Session broadcast bus.
//!
//! Forced logouts (refresh failed, session expired) are published here so
//! every consumer learns about them without the publisher knowing who they
//! are. A logout the user asked for is handled locally and never published.

use tokio::sync::broadcast::{self, error::RecvError};
use tokio::task::JoinHandle;
use tracing::{debug, warn};

/// Events buffered per subscriber before the slowest one starts lagging.
/// Forced logouts are rare, so a handful is plenty.
const BUS_CAPACITY: usize = 16;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogoutReason {
    /// The refresh endpoint rejected the refresh token or could not be reached
    RefreshFailed,
    /// A refresh was needed but no refresh token was stored
    MissingRefreshToken,
    /// The session clock ran out
    Expired,
}

impl LogoutReason {
    pub fn message(&self) -> &'static str {
        match self {
            LogoutReason::RefreshFailed => {
                "Your session could not be renewed. Please sign in again."
            }
            LogoutReason::MissingRefreshToken => {
                "Your session is no longer valid. Please sign in again."
            }
            LogoutReason::Expired => "Your session has expired. Please sign in again.",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionEvent {
    ForcedLogout(LogoutReason),
}

/// Typed publish/subscribe channel shared by everything that owns a session.
/// Cloning yields another handle to the same channel.
#[derive(Debug, Clone)]
pub struct SessionBus {
    tx: broadcast::Sender<SessionEvent>,
}

impl SessionBus {
    pub fn new() -> Self {
        let (tx, _) = broadcast::channel(BUS_CAPACITY);
        Self { tx }
    }

    /// Fire and forget. Having no subscribers is not an error.
    pub fn publish(&self, event: SessionEvent) {
        match self.tx.send(event) {
            Ok(receivers) => debug!(?event, receivers, "Session event published"),
            Err(_) => debug!(?event, "Session event published with no subscribers"),
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<SessionEvent> {
        self.tx.subscribe()
    }

    /// Run `handler` for every event published from now on, until the
    /// returned subscription is dropped or unsubscribed.
    pub fn on_event<F>(&self, mut handler: F) -> Subscription
    where
        F: FnMut(SessionEvent) + Send + 'static,
    {
        let mut rx = self.subscribe();
        let task = tokio::spawn(async move {
            loop {
                match rx.recv().await {
                    Ok(event) => handler(event),
                    Err(RecvError::Lagged(skipped)) => {
                        warn!(skipped, "Session event subscriber lagged");
                    }
                    Err(RecvError::Closed) => break,
                }
            }
        });
        Subscription { task }
    }

    pub fn subscriber_count(&self) -> usize {
        self.tx.receiver_count()
    }
}

impl Default for SessionBus {
    fn default() -> Self {
        Self::new()
    }
}

/// Handle for a handler registered with [`SessionBus::on_event`].
#[must_use = "dropping a Subscription unsubscribes its handler"]
pub struct Subscription {
    task: JoinHandle<()>,
}

impl Subscription {
    pub fn unsubscribe(self) {}
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.task.abort();
    }
}
