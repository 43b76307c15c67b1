//! Session countdown.
//!
//! A session can run out while nobody is making requests, so expiry is also
//! enforced on a timer. Once a second the clock reads the stored expiry and
//! publishes the whole seconds left; at zero it clears the store and
//! publishes a forced logout, once, then stops. It never refreshes anything.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info};

use super::events::{LogoutReason, SessionBus, SessionEvent};
use super::store::CredentialStore;

const TICK: Duration = Duration::from_secs(1);

/// Wall-clock source, replaceable in tests.
pub trait TimeSource: Send + Sync {
    fn now(&self) -> DateTime<Utc>;
}

#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl TimeSource for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// `floor((expiry - now) / 1000)` over milliseconds
pub fn seconds_left(expiry: DateTime<Utc>, now: DateTime<Utc>) -> i64 {
    (expiry - now).num_milliseconds().div_euclid(1000)
}

pub struct SessionClock {
    store: Arc<CredentialStore>,
    bus: SessionBus,
    time: Arc<dyn TimeSource>,
    time_left: Arc<watch::Sender<Option<i64>>>,
}

impl SessionClock {
    pub fn new(
        store: Arc<CredentialStore>,
        bus: SessionBus,
        time: Arc<dyn TimeSource>,
        time_left: Arc<watch::Sender<Option<i64>>>,
    ) -> Self {
        Self {
            store,
            bus,
            time,
            time_left,
        }
    }

    /// Start ticking. The first tick happens immediately.
    pub fn start(&self) -> ClockHandle {
        let store = Arc::clone(&self.store);
        let bus = self.bus.clone();
        let time = Arc::clone(&self.time);
        let time_left = Arc::clone(&self.time_left);

        let task = tokio::spawn(async move {
            let mut interval = tokio::time::interval(TICK);
            interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                interval.tick().await;

                let Some(expiry) = store.expiry().await else {
                    debug!("Expiry unknown, session clock stopping");
                    time_left.send_replace(None);
                    return;
                };

                let left = seconds_left(expiry, time.now());
                if left <= 0 {
                    time_left.send_replace(Some(0));
                    info!("Session expired");
                    store.clear_all().await;
                    bus.publish(SessionEvent::ForcedLogout(LogoutReason::Expired));
                    return;
                }
                time_left.send_replace(Some(left));
            }
        });

        ClockHandle {
            task,
            time_left: Arc::clone(&self.time_left),
        }
    }
}

/// Running clock. Dropping it stops the ticks and resets the countdown to unknown.
pub struct ClockHandle {
    task: JoinHandle<()>,
    time_left: Arc<watch::Sender<Option<i64>>>,
}

impl ClockHandle {
    pub fn stop(self) {}

    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }
}

impl Drop for ClockHandle {
    fn drop(&mut self) {
        self.task.abort();
        self.time_left.send_replace(None);
    }
}
