use crate::models::{AnswerSet, TestDefinition};
use futures::future::BoxFuture;
use serde::Deserialize;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use thiserror::Error;
use tracing::debug;
use uuid::Uuid;

#[derive(Debug, Error)]
pub enum ApiError {
    #[error("request failed: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("portal returned status {status}: {message}")]
    Status { status: u16, message: String },

    #[error("test not found")]
    NotFound,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SubmitReceipt {
    pub correct_count: u32,
}

// The portal backend, as seen from a session. Implementations must be safe
// to retry: `submit_answers` carries a per-session idempotency key so a
// network failure can be retried without double-grading.
pub trait PortalApi: Send + Sync {
    fn fetch_test_definition(
        &self,
        test_id: i64,
    ) -> BoxFuture<'static, Result<TestDefinition, ApiError>>;

    fn submit_answers(
        &self,
        session_id: i64,
        answers: AnswerSet,
        idempotency_key: Uuid,
    ) -> BoxFuture<'static, Result<SubmitReceipt, ApiError>>;
}

pub trait AuthProvider: Send + Sync {
    fn is_authenticated(&self) -> bool;
}

#[derive(Clone)]
pub struct BearerTokenAuth {
    token: Option<String>,
}

impl BearerTokenAuth {
    pub fn new(token: Option<String>) -> Self {
        Self {
            token: token.filter(|t| !t.trim().is_empty()),
        }
    }

    pub fn from_env() -> Self {
        Self::new(std::env::var("PORTAL_ACCESS_TOKEN").ok())
    }

    pub fn token(&self) -> Option<&str> {
        self.token.as_deref()
    }
}

impl AuthProvider for BearerTokenAuth {
    fn is_authenticated(&self) -> bool {
        self.token.is_some()
    }
}

#[derive(Clone)]
pub struct HttpPortalApi {
    client: reqwest::Client,
    base_url: String,
    token: Option<String>,
}

impl HttpPortalApi {
    pub fn new(base_url: impl Into<String>, token: Option<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            base_url: base_url.into().trim_end_matches('/').to_string(),
            token: token.filter(|t| !t.trim().is_empty()),
        }
    }

    fn authorize(&self, request: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        match &self.token {
            Some(token) => request.bearer_auth(token),
            None => request,
        }
    }
}

// Submission response is the backend's session record; only the raw correct
// count matters here, percentage derivation stays client-side.
#[derive(Debug, Deserialize)]
struct SubmitResponse {
    score: u32,
}

async fn error_for_status(response: reqwest::Response) -> Result<reqwest::Response, ApiError> {
    let status = response.status();
    if status == reqwest::StatusCode::NOT_FOUND {
        return Err(ApiError::NotFound);
    }
    if !status.is_success() {
        let message = response.text().await.unwrap_or_default();
        return Err(ApiError::Status {
            status: status.as_u16(),
            message,
        });
    }
    Ok(response)
}

impl PortalApi for HttpPortalApi {
    fn fetch_test_definition(
        &self,
        test_id: i64,
    ) -> BoxFuture<'static, Result<TestDefinition, ApiError>> {
        let url = format!("{}/api/group-test/{}/", self.base_url, test_id);
        let request = self.authorize(self.client.get(&url));
        Box::pin(async move {
            debug!(%url, "fetching test definition");
            let response = error_for_status(request.send().await?).await?;
            Ok(response.json::<TestDefinition>().await?)
        })
    }

    fn submit_answers(
        &self,
        session_id: i64,
        answers: AnswerSet,
        idempotency_key: Uuid,
    ) -> BoxFuture<'static, Result<SubmitReceipt, ApiError>> {
        let url = format!("{}/api/submit-test/{}/", self.base_url, session_id);
        let request = self
            .authorize(self.client.post(&url))
            .header("idempotency-key", idempotency_key.to_string())
            .json(&serde_json::json!({ "answers": answers }));
        Box::pin(async move {
            debug!(%url, "submitting answers");
            let response = error_for_status(request.send().await?).await?;
            let body = response.json::<SubmitResponse>().await?;
            Ok(SubmitReceipt {
                correct_count: body.score,
            })
        })
    }
}

// In-process portal double, in the spirit of the real backend: grades by
// returning a preset correct count and records every submission attempt.
#[derive(Clone)]
pub struct MockPortalApi {
    inner: Arc<MockInner>,
}

struct MockInner {
    definition: TestDefinition,
    correct_count: u32,
    fail_submissions: AtomicBool,
    submit_delay: Mutex<Option<Duration>>,
    submit_calls: AtomicU32,
    submitted_keys: Mutex<Vec<Uuid>>,
}

impl MockPortalApi {
    pub fn new(definition: TestDefinition, correct_count: u32) -> Self {
        Self {
            inner: Arc::new(MockInner {
                definition,
                correct_count,
                fail_submissions: AtomicBool::new(false),
                submit_delay: Mutex::new(None),
                submit_calls: AtomicU32::new(0),
                submitted_keys: Mutex::new(Vec::new()),
            }),
        }
    }

    pub fn fail_submissions(&self, fail: bool) {
        self.inner.fail_submissions.store(fail, Ordering::SeqCst);
    }

    pub fn set_submit_delay(&self, delay: Duration) {
        *crate::lock(&self.inner.submit_delay) = Some(delay);
    }

    pub fn submit_calls(&self) -> u32 {
        self.inner.submit_calls.load(Ordering::SeqCst)
    }

    pub fn submitted_keys(&self) -> Vec<Uuid> {
        crate::lock(&self.inner.submitted_keys).clone()
    }
}

impl PortalApi for MockPortalApi {
    fn fetch_test_definition(
        &self,
        test_id: i64,
    ) -> BoxFuture<'static, Result<TestDefinition, ApiError>> {
        let inner = self.inner.clone();
        Box::pin(async move {
            if inner.definition.id == test_id {
                Ok(inner.definition.clone())
            } else {
                Err(ApiError::NotFound)
            }
        })
    }

    fn submit_answers(
        &self,
        _session_id: i64,
        _answers: AnswerSet,
        idempotency_key: Uuid,
    ) -> BoxFuture<'static, Result<SubmitReceipt, ApiError>> {
        let inner = self.inner.clone();
        Box::pin(async move {
            let delay = *crate::lock(&inner.submit_delay);
            if let Some(delay) = delay {
                tokio::time::sleep(delay).await;
            }
            inner.submit_calls.fetch_add(1, Ordering::SeqCst);
            crate::lock(&inner.submitted_keys).push(idempotency_key);
            if inner.fail_submissions.load(Ordering::SeqCst) {
                Err(ApiError::Status {
                    status: 503,
                    message: "portal unavailable".into(),
                })
            } else {
                Ok(SubmitReceipt {
                    correct_count: inner.correct_count,
                })
            }
        })
    }
}
