//! Clocks and a fixed-period reconciliation loop for native hosts.
//!
//! The SpacetimeDB module schedules reconciliation with a scheduled table
//! instead; this loop is for the harness and any other in-process host.

use std::sync::mpsc::{self, RecvTimeoutError, Sender};
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};
use std::time::{Duration, SystemTime};

use chrono::{DateTime, Utc};

use crate::graph::GraphState;
use crate::notify::ChangeNotifier;
use crate::reconcile::IncomeReconciler;
use crate::store::StateStore;

pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;
}

/// Wall clock.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        DateTime::<Utc>::from(SystemTime::now())
    }
}

/// Clock that only moves when told to.
#[derive(Debug)]
pub struct ManualClock {
    now: Mutex<DateTime<Utc>>,
}

impl ManualClock {
    pub fn new(start: DateTime<Utc>) -> Self {
        Self {
            now: Mutex::new(start),
        }
    }

    pub fn advance(&self, by: chrono::Duration) {
        let mut now = match self.now.lock() {
            Ok(now) => now,
            Err(poisoned) => poisoned.into_inner(),
        };
        *now += by;
    }

    pub fn set(&self, to: DateTime<Utc>) {
        let mut now = match self.now.lock() {
            Ok(now) => now,
            Err(poisoned) => poisoned.into_inner(),
        };
        *now = to;
    }
}

impl Clock for ManualClock {
    fn now(&self) -> DateTime<Utc> {
        match self.now.lock() {
            Ok(now) => *now,
            Err(poisoned) => *poisoned.into_inner(),
        }
    }
}

impl<C: Clock + ?Sized> Clock for Arc<C> {
    fn now(&self) -> DateTime<Utc> {
        (**self).now()
    }
}

/// Handle to a running reconciliation loop.
#[derive(Debug)]
pub struct ReconcileLoop {
    stop: Sender<()>,
    handle: JoinHandle<()>,
}

impl ReconcileLoop {
    /// Stop after the current pass (if any) and wait for the thread.
    pub fn stop(self) -> thread::Result<()> {
        // A pass in flight is never interrupted; the loop sees this between ticks
        let _ = self.stop.send(());
        self.handle.join()
    }
}

/// Run `reconciler` against `state` every `period` on a background thread.
/// A tick that finds a pass still running is skipped.
pub fn spawn_reconcile_loop<S, N, C>(
    state: Arc<GraphState<S, N>>,
    reconciler: Arc<IncomeReconciler>,
    clock: C,
    period: Duration,
) -> std::io::Result<ReconcileLoop>
where
    S: StateStore + Send + Sync + 'static,
    N: ChangeNotifier + Send + Sync + 'static,
    C: Clock + 'static,
{
    let (stop, stop_rx) = mpsc::channel::<()>();
    let handle = thread::Builder::new()
        .name("reconciler".into())
        .spawn(move || loop {
            match stop_rx.recv_timeout(period) {
                Err(RecvTimeoutError::Timeout) => {
                    if let Err(e) = reconciler.run(&state, clock.now()) {
                        log::warn!("Scheduled reconciliation did not run: {}", e);
                    }
                }
                Ok(()) | Err(RecvTimeoutError::Disconnected) => break,
            }
        })?;
    Ok(ReconcileLoop { stop, handle })
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_manual_clock_advances() {
        let start = Utc.with_ymd_and_hms(2026, 10, 14, 0, 0, 0).unwrap();
        let clock = ManualClock::new(start);
        clock.advance(chrono::Duration::minutes(5));
        assert_eq!(clock.now(), start + chrono::Duration::minutes(5));
        clock.set(start);
        assert_eq!(clock.now(), start);
    }

    #[test]
    fn test_system_clock_is_after_2020() {
        let epoch_2020 = Utc.with_ymd_and_hms(2020, 1, 1, 0, 0, 0).unwrap();
        assert!(SystemClock.now() > epoch_2020);
    }
}
