use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::routing::{get, post};
use axum::{Json, Router};
use chrono::{Duration, Utc};
use serde_json::{json, Value};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration as StdDuration;
use test_session::api::{ApiError, BearerTokenAuth, HttpPortalApi};
use test_session::clock::SystemClock;
use test_session::controller::{LoadOptions, SessionController, SubmitOutcome};
use test_session::models::{AnswerSet, Phase};
use test_session::persistence::{MemoryStore, StateStore};
use test_session::runner::SessionRunner;
use test_session::scheduler::TokioScheduler;
use test_session::SessionError;

#[derive(Clone)]
struct StubPortal {
    definition: Arc<Value>,
    score: u32,
    submits: Arc<AtomicU32>,
}

async fn get_test(
    State(portal): State<StubPortal>,
    Path(id): Path<i64>,
) -> Result<Json<Value>, StatusCode> {
    if portal.definition["id"] == json!(id) {
        Ok(Json(portal.definition.as_ref().clone()))
    } else {
        Err(StatusCode::NOT_FOUND)
    }
}

async fn submit_test(
    State(portal): State<StubPortal>,
    Path(session_id): Path<i64>,
    Json(body): Json<Value>,
) -> Result<Json<Value>, StatusCode> {
    if !body["answers"].is_object() {
        return Err(StatusCode::BAD_REQUEST);
    }
    portal.submits.fetch_add(1, Ordering::SeqCst);
    Ok(Json(json!({
        "id": session_id,
        "score": portal.score,
        "end_time": Utc::now().to_rfc3339(),
    })))
}

async fn spawn_portal(definition: Value, score: u32) -> (String, Arc<AtomicU32>) {
    let submits = Arc::new(AtomicU32::new(0));
    let portal = StubPortal {
        definition: Arc::new(definition),
        score,
        submits: submits.clone(),
    };
    let app = Router::new()
        .route("/api/group-test/:id/", get(get_test))
        .route("/api/submit-test/:session_id/", post(submit_test))
        .with_state(portal);
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    (format!("http://{}", addr), submits)
}

fn sample_definition(start_offset_secs: i64, duration_minutes: u32) -> Value {
    let scheduled_start = Utc::now() + Duration::seconds(start_offset_secs);
    json!({
        "id": 42,
        "name": "Algebra midterm",
        "course": {"id": 7, "name": "Algebra"},
        "scheduled_start": scheduled_start.to_rfc3339(),
        "duration_minutes": duration_minutes,
        "question_count": 3,
        "session_id": 501,
        "created_by": "teacher",
        "questions": [
            {
                "id": 1,
                "question_text": "2 + 2?",
                "option_a": "3",
                "option_b": "4",
                "option_c": "5",
                "option_d": "6",
                "correct_option": "B"
            },
            {
                "id": 2,
                "question_text": "Solve x + 1 = 2",
                "correct_answer_text": "1"
            },
            {
                "id": 3,
                "question_text": "5 * 5?",
                "option_a": "20",
                "option_b": "25",
                "option_c": "30",
                "option_d": "35",
                "correct_option": "B"
            }
        ]
    })
}

async fn load_session(
    base: &str,
    test_id: i64,
    store: Arc<MemoryStore>,
) -> Result<SessionController, SessionError> {
    let api = Arc::new(HttpPortalApi::new(base, Some("token".into())));
    SessionController::load(
        test_id,
        api,
        store,
        Arc::new(BearerTokenAuth::new(Some("token".into()))),
        Arc::new(SystemClock),
        LoadOptions::default(),
    )
    .await
}

#[tokio::test]
async fn full_session_flow_against_portal() {
    let (base, submits) = spawn_portal(sample_definition(-60, 10), 2).await;
    let store = Arc::new(MemoryStore::new());
    let mut controller = load_session(&base, 42, store.clone()).await.unwrap();

    assert_eq!(controller.phase(), Phase::ReadyToStart);
    controller.start_now().unwrap();
    assert_eq!(controller.phase(), Phase::InProgress);
    // 10 minute window opened 60 seconds ago.
    assert!(controller.seconds_remaining() > 535 && controller.seconds_remaining() <= 540);
    assert!(store.load_end_time(42).is_some());

    controller.select_answer(1, "B").unwrap();
    controller.select_answer(2, "7").unwrap();

    let outcome = controller.submit(false).await.unwrap();
    assert_eq!(outcome, SubmitOutcome::ConfirmationRequired);
    assert_eq!(submits.load(Ordering::SeqCst), 0);

    let outcome = controller.submit(true).await.unwrap();
    let score = match outcome {
        SubmitOutcome::Completed(score) => score,
        other => panic!("expected completion, got {other:?}"),
    };
    assert_eq!(score.correct, 2);
    assert_eq!(score.total, 3);
    assert_eq!(score.percentage, 67);
    assert_eq!(controller.phase(), Phase::Ended);
    assert_eq!(submits.load(Ordering::SeqCst), 1);

    // Question 2 was graded client-visible and answered wrong.
    assert!(controller.review().iter().any(|r| r.question_id == 2));

    // Persisted state is gone after a successful submission.
    assert_eq!(store.load_end_time(42), None);
    assert_eq!(store.load_answers(42), None);
}

#[tokio::test]
async fn missing_test_is_a_load_failure() {
    let (base, _submits) = spawn_portal(sample_definition(0, 10), 0).await;
    let err = load_session(&base, 999, Arc::new(MemoryStore::new()))
        .await
        .unwrap_err();
    assert!(matches!(err, SessionError::Load(ApiError::NotFound)));
}

#[tokio::test]
async fn persisted_deadline_resumes_over_http() {
    let (base, _submits) = spawn_portal(sample_definition(-7200, 10), 0).await;
    let store = Arc::new(MemoryStore::new());
    store.save_end_time(42, Utc::now() + Duration::seconds(140));
    let mut answers = AnswerSet::new();
    answers.insert(1, "B");
    store.save_answers(42, &answers);

    let controller = load_session(&base, 42, store).await.unwrap();
    assert_eq!(controller.phase(), Phase::InProgress);
    assert!(controller.seconds_remaining() > 135 && controller.seconds_remaining() <= 140);
    assert_eq!(controller.answers().get(1), Some("B"));
}

#[tokio::test]
async fn countdown_expiry_auto_submits_in_real_time() {
    // Window closes a few seconds after the user starts.
    let offset = -(10 * 60 - 4);
    let (base, submits) = spawn_portal(sample_definition(offset, 10), 1).await;
    let store = Arc::new(MemoryStore::new());
    let controller = load_session(&base, 42, store.clone()).await.unwrap();

    let runner = SessionRunner::new(controller, Arc::new(TokioScheduler));
    runner.start_now().unwrap();
    assert!(runner.seconds_remaining() <= 4);
    runner.select_answer(1, "B").unwrap();

    tokio::time::timeout(StdDuration::from_secs(10), async {
        while runner.phase() != Phase::Ended {
            tokio::time::sleep(StdDuration::from_millis(100)).await;
        }
    })
    .await
    .expect("session should auto-submit when the countdown expires");

    assert_eq!(submits.load(Ordering::SeqCst), 1);
    assert_eq!(runner.score().map(|s| s.correct), Some(1));
    assert_eq!(store.load_end_time(42), None);
}
