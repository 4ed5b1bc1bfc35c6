use crate::controller::{SessionController, SubmitOutcome, SubmitStart, TickOutcome};
use crate::error::SessionError;
use crate::models::{Phase, ScoreResult};
use crate::scheduler::{TickHandle, TickScheduler};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tracing::warn;

// Drives a controller with wall-clock ticks. Owns at most one live tick
// handle; the handle is cancelled before being replaced on every phase
// change, and dropped (hence cancelled) when the runner goes away.
pub struct SessionRunner {
    inner: Arc<RunnerInner>,
}

struct RunnerInner {
    controller: Mutex<SessionController>,
    scheduler: Arc<dyn TickScheduler>,
    tick_interval: Duration,
    timer: Mutex<Option<TickHandle>>,
}

impl SessionRunner {
    pub fn new(controller: SessionController, scheduler: Arc<dyn TickScheduler>) -> Self {
        Self::with_tick_interval(controller, scheduler, Duration::from_secs(1))
    }

    pub fn with_tick_interval(
        controller: SessionController,
        scheduler: Arc<dyn TickScheduler>,
        tick_interval: Duration,
    ) -> Self {
        let runner = Self {
            inner: Arc::new(RunnerInner {
                controller: Mutex::new(controller),
                scheduler,
                tick_interval,
                timer: Mutex::new(None),
            }),
        };
        rearm(&runner.inner);
        runner
    }

    pub fn start_now(&self) -> Result<(), SessionError> {
        crate::lock(&self.inner.controller).start_now()?;
        rearm(&self.inner);
        Ok(())
    }

    pub fn select_answer(&self, question_id: i64, answer: &str) -> Result<(), SessionError> {
        crate::lock(&self.inner.controller).select_answer(question_id, answer)
    }

    pub fn next(&self) {
        crate::lock(&self.inner.controller).next();
    }

    pub fn previous(&self) {
        crate::lock(&self.inner.controller).previous();
    }

    pub async fn submit(&self, confirmed: bool) -> Result<SubmitOutcome, SessionError> {
        submit_via(&self.inner, confirmed, false).await
    }

    pub fn phase(&self) -> Phase {
        crate::lock(&self.inner.controller).phase()
    }

    pub fn seconds_remaining(&self) -> u64 {
        crate::lock(&self.inner.controller).seconds_remaining()
    }

    pub fn score(&self) -> Option<ScoreResult> {
        crate::lock(&self.inner.controller).score().copied()
    }

    pub fn with_controller<R>(&self, f: impl FnOnce(&SessionController) -> R) -> R {
        f(&crate::lock(&self.inner.controller))
    }

    pub fn has_live_timer(&self) -> bool {
        crate::lock(&self.inner.timer).is_some()
    }
}

impl Drop for SessionRunner {
    fn drop(&mut self) {
        // Tick closures only hold weak references, so this is the last exit
        // for the timer.
        crate::lock(&self.inner.timer).take();
    }
}

// Cancel-before-replace: the old handle is dropped while the slot is held,
// then a fresh one is armed only for time-bounded phases.
fn rearm(inner: &Arc<RunnerInner>) {
    let phase = crate::lock(&inner.controller).phase();
    let mut slot = crate::lock(&inner.timer);
    slot.take();
    if !phase.is_time_bounded() {
        return;
    }
    let weak = Arc::downgrade(inner);
    let handle = inner.scheduler.schedule_tick(
        inner.tick_interval,
        Box::new(move || {
            if let Some(inner) = weak.upgrade() {
                on_tick(&inner);
            }
        }),
    );
    *slot = Some(handle);
}

fn on_tick(inner: &Arc<RunnerInner>) {
    let outcome = crate::lock(&inner.controller).tick();
    match outcome {
        TickOutcome::Idle => {}
        TickOutcome::PhaseChanged(_) => rearm(inner),
        TickOutcome::SubmitDue => {
            // Stop ticking before the submission; a failed auto-submit is
            // retried by the user, never by the timer.
            crate::lock(&inner.timer).take();
            let inner = inner.clone();
            tokio::spawn(async move {
                if let Err(err) = submit_via(&inner, true, true).await {
                    warn!(error = %err, "auto-submit on expiry failed");
                }
            });
        }
    }
}

// The controller is never held across the network await; the in-flight flag
// set by `begin_submit` is what keeps a racing second submit out.
async fn submit_via(
    inner: &Arc<RunnerInner>,
    confirmed: bool,
    forced: bool,
) -> Result<SubmitOutcome, SessionError> {
    let start = crate::lock(&inner.controller).begin_submit(confirmed, forced)?;
    let ticket = match start {
        SubmitStart::Begin(ticket) => ticket,
        SubmitStart::ConfirmationRequired => return Ok(SubmitOutcome::ConfirmationRequired),
        SubmitStart::AlreadyInFlight => return Ok(SubmitOutcome::AlreadyInFlight),
    };

    let api = crate::lock(&inner.controller).api_handle();
    let result = api
        .submit_answers(ticket.session_id, ticket.answers, ticket.idempotency_key)
        .await;

    let score = crate::lock(&inner.controller).complete_submit(result)?;
    crate::lock(&inner.timer).take();
    Ok(SubmitOutcome::Completed(score))
}
