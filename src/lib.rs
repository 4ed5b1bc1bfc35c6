pub mod api;
pub mod clock;
pub mod controller;
pub mod error;
pub mod models;
pub mod persistence;
pub mod runner;
pub mod scheduler;

pub use controller::{LoadOptions, SessionController, SubmitOutcome};
pub use error::SessionError;
pub use models::{AnswerSet, Phase, ScoreResult};
pub use runner::SessionRunner;

use std::sync::{Mutex, MutexGuard, PoisonError};

// Locks never guard across panicking code paths that should poison the
// session; recover the guard instead of propagating the poison.
pub(crate) fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}
