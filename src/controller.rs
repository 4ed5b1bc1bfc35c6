use crate::api::{ApiError, AuthProvider, PortalApi, SubmitReceipt};
use crate::clock::{self, Clock, ScheduleWindow};
use crate::error::SessionError;
use crate::models::{
    build_review, AnswerSet, Phase, Question, ReviewEntry, ScoreResult, TestDefinition,
};
use crate::persistence::StateStore;
use chrono::Duration;
use rand::seq::SliceRandom;
use std::sync::Arc;
use tracing::{info, warn};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, Default)]
pub struct LoadOptions {
    // Solo practice sessions shuffle question order; scheduled group tests
    // keep the order the portal returned.
    pub shuffle: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TickOutcome {
    Idle,
    PhaseChanged(Phase),
    // The in-progress countdown reached zero; the driver must run a forced
    // submission. Reported once, later ticks in the drained state are Idle.
    SubmitDue,
}

#[derive(Debug, Clone, PartialEq)]
pub enum SubmitOutcome {
    Completed(ScoreResult),
    // Time remains and the caller did not confirm; the view resolves the
    // prompt and calls submit again with confirmed = true.
    ConfirmationRequired,
    // Another submission is already in flight; this attempt was suppressed.
    AlreadyInFlight,
}

#[derive(Debug, Clone)]
pub enum SubmitStart {
    Begin(SubmitTicket),
    ConfirmationRequired,
    AlreadyInFlight,
}

// Everything a driver needs to perform the network call without holding the
// controller locked across the await.
#[derive(Debug, Clone)]
pub struct SubmitTicket {
    pub session_id: i64,
    pub answers: AnswerSet,
    pub idempotency_key: Uuid,
}

pub struct SessionController {
    definition: TestDefinition,
    phase: Phase,
    seconds_remaining: u64,
    answers: AnswerSet,
    current_index: usize,
    score: Option<ScoreResult>,
    review: Vec<ReviewEntry>,
    submit_in_flight: bool,
    submission_key: Uuid,
    api: Arc<dyn PortalApi>,
    store: Arc<dyn StateStore>,
    clock: Arc<dyn Clock>,
}

impl std::fmt::Debug for SessionController {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionController")
            .field("definition", &self.definition)
            .field("phase", &self.phase)
            .field("seconds_remaining", &self.seconds_remaining)
            .field("answers", &self.answers)
            .field("current_index", &self.current_index)
            .field("score", &self.score)
            .field("review", &self.review)
            .field("submit_in_flight", &self.submit_in_flight)
            .field("submission_key", &self.submission_key)
            .finish_non_exhaustive()
    }
}

impl SessionController {
    pub async fn load(
        test_id: i64,
        api: Arc<dyn PortalApi>,
        store: Arc<dyn StateStore>,
        auth: Arc<dyn AuthProvider>,
        clock: Arc<dyn Clock>,
        options: LoadOptions,
    ) -> Result<Self, SessionError> {
        if !auth.is_authenticated() {
            return Err(SessionError::AuthRequired);
        }

        let mut definition = api
            .fetch_test_definition(test_id)
            .await
            .map_err(SessionError::Load)?;
        if options.shuffle {
            definition.questions.shuffle(&mut rand::thread_rng());
        }

        let now = clock.now();
        let mut controller = Self {
            definition,
            phase: Phase::Ended,
            seconds_remaining: 0,
            answers: AnswerSet::new(),
            current_index: 0,
            score: None,
            review: Vec::new(),
            submit_in_flight: false,
            submission_key: Uuid::new_v4(),
            api,
            store,
            clock,
        };

        // A persisted future end time means the user already started this
        // test; resume mid-countdown regardless of the schedule.
        if let Some(end_time) = controller.store.load_end_time(test_id) {
            if end_time > now {
                let mut answers = controller.store.load_answers(test_id).unwrap_or_default();
                let dropped = answers.retain_known(&controller.definition.question_ids());
                if dropped > 0 {
                    warn!(test_id, dropped, "dropped persisted answers for unknown questions");
                }
                controller.phase = Phase::InProgress;
                controller.seconds_remaining = clock::seconds_between(now, end_time);
                controller.answers = answers;
                info!(
                    test_id,
                    seconds_remaining = controller.seconds_remaining,
                    restored_answers = controller.answers.len(),
                    "resuming in-progress session"
                );
                return Ok(controller);
            }
            // The recorded deadline has passed while the view was away.
            info!(test_id, "persisted session expired, clearing stored state");
            controller.store.clear(test_id);
        }

        let (phase, seconds_remaining) = match clock::compute_initial_state(
            controller.definition.scheduled_start,
            controller.definition.duration_minutes,
            now,
        ) {
            ScheduleWindow::BeforeStart {
                seconds_until_start,
            } => (Phase::NotStarted, seconds_until_start),
            ScheduleWindow::Open { .. } => (
                Phase::ReadyToStart,
                u64::from(controller.definition.duration_minutes) * 60,
            ),
            // Already past the window with no local record: "test already
            // ended", a normal terminal entry rather than an error.
            ScheduleWindow::Closed => (Phase::Ended, 0),
        };
        controller.phase = phase;
        controller.seconds_remaining = seconds_remaining;
        info!(test_id, phase = ?controller.phase, seconds_remaining, "session loaded");
        Ok(controller)
    }

    pub fn phase(&self) -> Phase {
        self.phase
    }

    pub fn seconds_remaining(&self) -> u64 {
        self.seconds_remaining
    }

    pub fn definition(&self) -> &TestDefinition {
        &self.definition
    }

    pub fn answers(&self) -> &AnswerSet {
        &self.answers
    }

    pub fn score(&self) -> Option<&ScoreResult> {
        self.score.as_ref()
    }

    pub fn review(&self) -> &[ReviewEntry] {
        &self.review
    }

    pub fn current_index(&self) -> usize {
        self.current_index
    }

    pub fn current_question(&self) -> Option<&Question> {
        self.definition.questions.get(self.current_index)
    }

    pub fn has_questions(&self) -> bool {
        !self.definition.questions.is_empty()
    }

    // The last question's "next" control is replaced by "submit".
    pub fn is_last_question(&self) -> bool {
        !self.definition.questions.is_empty()
            && self.current_index + 1 == self.definition.questions.len()
    }

    pub fn submit_in_flight(&self) -> bool {
        self.submit_in_flight
    }

    pub(crate) fn api_handle(&self) -> Arc<dyn PortalApi> {
        self.api.clone()
    }

    fn transition(&mut self, next: Phase) {
        debug_assert!(next >= self.phase, "phase must not move backward");
        if next < self.phase {
            warn!(from = ?self.phase, to = ?next, "refusing backward phase transition");
            return;
        }
        if next != self.phase {
            info!(test_id = self.definition.id, from = ?self.phase, to = ?next, "phase transition");
            self.phase = next;
        }
    }

    // One countdown step. Runs at 1-second granularity under a scheduler
    // handle owned by the runner; ticks landing outside a time-bounded phase
    // are ignored.
    pub fn tick(&mut self) -> TickOutcome {
        match self.phase {
            Phase::NotStarted => {
                if self.seconds_remaining > 1 {
                    self.seconds_remaining -= 1;
                    TickOutcome::Idle
                } else {
                    self.transition(Phase::ReadyToStart);
                    self.seconds_remaining = u64::from(self.definition.duration_minutes) * 60;
                    TickOutcome::PhaseChanged(Phase::ReadyToStart)
                }
            }
            Phase::InProgress => {
                if self.seconds_remaining == 0 {
                    TickOutcome::Idle
                } else if self.seconds_remaining == 1 {
                    self.seconds_remaining = 0;
                    TickOutcome::SubmitDue
                } else {
                    self.seconds_remaining -= 1;
                    TickOutcome::Idle
                }
            }
            Phase::ReadyToStart | Phase::Ended => TickOutcome::Idle,
        }
    }

    pub fn start_now(&mut self) -> Result<(), SessionError> {
        if self.phase != Phase::ReadyToStart {
            return Err(SessionError::InvalidPhase {
                operation: "start",
                phase: self.phase,
            });
        }
        let now = self.clock.now();
        self.seconds_remaining = clock::seconds_between(now, self.definition.end_time());
        self.transition(Phase::InProgress);

        let deadline = now + Duration::seconds(self.seconds_remaining as i64);
        self.store.save_end_time(self.definition.id, deadline);
        self.store.save_answers(self.definition.id, &self.answers);
        Ok(())
    }

    pub fn select_answer(
        &mut self,
        question_id: i64,
        answer: impl Into<String>,
    ) -> Result<(), SessionError> {
        if self.phase != Phase::InProgress {
            return Err(SessionError::InvalidPhase {
                operation: "answer selection",
                phase: self.phase,
            });
        }
        if !self.definition.has_question(question_id) {
            return Err(SessionError::UnknownQuestion(question_id));
        }
        self.answers.insert(question_id, answer);
        self.store.save_answers(self.definition.id, &self.answers);
        Ok(())
    }

    pub fn next(&mut self) {
        if self.current_index + 1 < self.definition.questions.len() {
            self.current_index += 1;
        }
    }

    pub fn previous(&mut self) {
        self.current_index = self.current_index.saturating_sub(1);
    }

    // First half of a submission: phase, in-flight and confirmation checks,
    // then a ticket for the network call. Drivers perform the call without
    // holding the controller and report back via `complete_submit`.
    pub fn begin_submit(&mut self, confirmed: bool, forced: bool) -> Result<SubmitStart, SessionError> {
        if self.phase != Phase::InProgress {
            return Err(SessionError::InvalidPhase {
                operation: "submit",
                phase: self.phase,
            });
        }
        if self.submit_in_flight {
            return Ok(SubmitStart::AlreadyInFlight);
        }
        if !forced && !confirmed && self.seconds_remaining > 0 {
            return Ok(SubmitStart::ConfirmationRequired);
        }
        let session_id = self
            .definition
            .session_id
            .ok_or(SessionError::SessionNotOpen)?;

        self.submit_in_flight = true;
        info!(
            test_id = self.definition.id,
            session_id,
            forced,
            answered = self.answers.len(),
            "submitting answers"
        );
        Ok(SubmitStart::Begin(SubmitTicket {
            session_id,
            answers: self.answers.clone(),
            idempotency_key: self.submission_key,
        }))
    }

    pub fn complete_submit(
        &mut self,
        result: Result<SubmitReceipt, ApiError>,
    ) -> Result<ScoreResult, SessionError> {
        self.submit_in_flight = false;
        match result {
            Ok(receipt) => {
                self.store.clear(self.definition.id);
                let score =
                    ScoreResult::new(receipt.correct_count, self.definition.question_count);
                self.review = build_review(&self.definition.questions, &self.answers);
                self.score = Some(score);
                self.seconds_remaining = 0;
                self.transition(Phase::Ended);
                info!(
                    test_id = self.definition.id,
                    correct = score.correct,
                    total = score.total,
                    percentage = score.percentage,
                    "submission accepted"
                );
                Ok(score)
            }
            Err(err) => {
                // Stay in progress with persisted state intact; the next
                // attempt reuses the same idempotency key.
                warn!(test_id = self.definition.id, error = %err, "submission failed, session stays open");
                Err(SessionError::Submission(err))
            }
        }
    }

    pub async fn submit(&mut self, confirmed: bool) -> Result<SubmitOutcome, SessionError> {
        self.submit_inner(confirmed, false).await
    }

    // Expiry path: skips the early-submit confirmation.
    pub async fn force_submit(&mut self) -> Result<SubmitOutcome, SessionError> {
        self.submit_inner(true, true).await
    }

    async fn submit_inner(
        &mut self,
        confirmed: bool,
        forced: bool,
    ) -> Result<SubmitOutcome, SessionError> {
        match self.begin_submit(confirmed, forced)? {
            SubmitStart::Begin(ticket) => {
                let api = self.api.clone();
                let result = api
                    .submit_answers(ticket.session_id, ticket.answers, ticket.idempotency_key)
                    .await;
                self.complete_submit(result).map(SubmitOutcome::Completed)
            }
            SubmitStart::ConfirmationRequired => Ok(SubmitOutcome::ConfirmationRequired),
            SubmitStart::AlreadyInFlight => Ok(SubmitOutcome::AlreadyInFlight),
        }
    }
}
