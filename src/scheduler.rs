use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::time::MissedTickBehavior;

// Cancels its tick source when dropped, so a handle owner can never leak a
// timer past the phase that created it.
pub struct TickHandle {
    cancel: Option<Box<dyn FnOnce() + Send>>,
}

impl TickHandle {
    pub fn new(cancel: impl FnOnce() + Send + 'static) -> Self {
        Self {
            cancel: Some(Box::new(cancel)),
        }
    }

    pub fn cancel(mut self) {
        if let Some(cancel) = self.cancel.take() {
            cancel();
        }
    }
}

impl Drop for TickHandle {
    fn drop(&mut self) {
        if let Some(cancel) = self.cancel.take() {
            cancel();
        }
    }
}

pub trait TickScheduler: Send + Sync {
    fn schedule_tick(
        &self,
        interval: Duration,
        on_tick: Box<dyn FnMut() + Send>,
    ) -> TickHandle;
}

pub struct TokioScheduler;

impl TickScheduler for TokioScheduler {
    fn schedule_tick(
        &self,
        interval: Duration,
        mut on_tick: Box<dyn FnMut() + Send>,
    ) -> TickHandle {
        let task = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
            // The first interval tick completes immediately; skip it so the
            // first callback lands one full interval from now.
            ticker.tick().await;
            loop {
                ticker.tick().await;
                on_tick();
            }
        });
        TickHandle::new(move || task.abort())
    }
}

// Test scheduler: ticks fire only when the test calls `fire`.
#[derive(Default)]
pub struct ManualScheduler {
    ticks: Mutex<Vec<ScheduledTick>>,
}

struct ScheduledTick {
    on_tick: Box<dyn FnMut() + Send>,
    cancelled: Arc<AtomicBool>,
}

impl ManualScheduler {
    pub fn new() -> Self {
        Self::default()
    }

    // Runs every live callback once. Callbacks may cancel handles or
    // schedule new ticks while running; the vec is taken out for the
    // duration to keep that re-entrancy safe.
    pub fn fire(&self) {
        let mut current = std::mem::take(&mut *crate::lock(&self.ticks));
        for tick in &mut current {
            if !tick.cancelled.load(Ordering::SeqCst) {
                (tick.on_tick)();
            }
        }
        let mut slot = crate::lock(&self.ticks);
        let scheduled_during_fire = std::mem::take(&mut *slot);
        current.retain(|tick| !tick.cancelled.load(Ordering::SeqCst));
        current.extend(scheduled_during_fire);
        *slot = current;
    }

    pub fn live_handles(&self) -> usize {
        crate::lock(&self.ticks)
            .iter()
            .filter(|tick| !tick.cancelled.load(Ordering::SeqCst))
            .count()
    }
}

impl TickScheduler for ManualScheduler {
    fn schedule_tick(
        &self,
        _interval: Duration,
        on_tick: Box<dyn FnMut() + Send>,
    ) -> TickHandle {
        let cancelled = Arc::new(AtomicBool::new(false));
        crate::lock(&self.ticks).push(ScheduledTick {
            on_tick,
            cancelled: cancelled.clone(),
        });
        TickHandle::new(move || cancelled.store(true, Ordering::SeqCst))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicU32;

    #[test]
    fn manual_scheduler_fires_until_cancelled() {
        let scheduler = ManualScheduler::new();
        let count = Arc::new(AtomicU32::new(0));
        let counter = count.clone();
        let handle = scheduler.schedule_tick(
            Duration::from_secs(1),
            Box::new(move || {
                counter.fetch_add(1, Ordering::SeqCst);
            }),
        );

        scheduler.fire();
        scheduler.fire();
        assert_eq!(count.load(Ordering::SeqCst), 2);
        assert_eq!(scheduler.live_handles(), 1);

        drop(handle);
        scheduler.fire();
        assert_eq!(count.load(Ordering::SeqCst), 2);
        assert_eq!(scheduler.live_handles(), 0);
    }

    #[test]
    fn callback_may_reschedule_during_fire() {
        let scheduler = Arc::new(ManualScheduler::new());
        let count = Arc::new(AtomicU32::new(0));
        let inner_scheduler = scheduler.clone();
        let counter = count.clone();
        let handle = scheduler.schedule_tick(
            Duration::from_secs(1),
            Box::new(move || {
                if counter.fetch_add(1, Ordering::SeqCst) == 0 {
                    let counter = counter.clone();
                    // The replacement handle is leaked into the scheduler on
                    // purpose; the test only cares that scheduling from
                    // inside a callback does not deadlock.
                    std::mem::forget(inner_scheduler.schedule_tick(
                        Duration::from_secs(1),
                        Box::new(move || {
                            counter.fetch_add(10, Ordering::SeqCst);
                        }),
                    ));
                }
            }),
        );

        scheduler.fire();
        assert_eq!(count.load(Ordering::SeqCst), 1);
        scheduler.fire();
        assert_eq!(count.load(Ordering::SeqCst), 12);
        drop(handle);
    }

    #[tokio::test]
    async fn tokio_scheduler_stops_after_drop() {
        let scheduler = TokioScheduler;
        let count = Arc::new(AtomicU32::new(0));
        let counter = count.clone();
        let handle = scheduler.schedule_tick(
            Duration::from_millis(10),
            Box::new(move || {
                counter.fetch_add(1, Ordering::SeqCst);
            }),
        );

        tokio::time::sleep(Duration::from_millis(100)).await;
        assert!(count.load(Ordering::SeqCst) >= 3);

        handle.cancel();
        tokio::time::sleep(Duration::from_millis(30)).await;
        let settled = count.load(Ordering::SeqCst);
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(count.load(Ordering::SeqCst), settled);
    }
}
