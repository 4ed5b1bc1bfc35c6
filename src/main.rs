use anyhow::Context;
use std::sync::Arc;
use test_session::api::{BearerTokenAuth, HttpPortalApi};
use test_session::clock::SystemClock;
use test_session::controller::{LoadOptions, SessionController, SubmitOutcome};
use test_session::models::{OptionLetter, Phase, Question};
use test_session::persistence::JsonFileStore;
use test_session::runner::SessionRunner;
use test_session::scheduler::TokioScheduler;
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing_subscriber::EnvFilter;

fn print_question(question: &Question, index: usize, total: usize, answer: Option<&str>) {
    println!("question {} of {}: {}", index + 1, total, question.question_text);
    if question.is_multiple_choice() {
        for letter in OptionLetter::ALL {
            if let Some(text) = question.option_text(letter) {
                println!("  {}) {}", letter.as_str(), text);
            }
        }
    } else {
        println!("  (free text answer)");
    }
    if let Some(answer) = answer {
        println!("  current answer: {answer}");
    }
}

fn print_status(runner: &SessionRunner) {
    runner.with_controller(|c| {
        let definition = c.definition();
        println!(
            "{} ({}) — phase {:?}, {}s remaining, {}/{} answered",
            definition.name,
            definition.course.name,
            c.phase(),
            c.seconds_remaining(),
            c.answers().len(),
            definition.question_count
        );
        if c.phase() == Phase::InProgress {
            match c.current_question() {
                Some(question) => print_question(
                    question,
                    c.current_index(),
                    definition.questions.len(),
                    c.answers().get(question.id),
                ),
                None => println!("questions are still loading, hang tight"),
            }
        }
    });
}

fn print_result(runner: &SessionRunner) {
    runner.with_controller(|c| {
        if let Some(score) = c.score() {
            println!(
                "score: {}/{} correct ({}%)",
                score.correct, score.total, score.percentage
            );
        } else {
            println!("this test has already ended");
        }
        for entry in c.review() {
            println!(
                "missed: {} — you answered {}, expected {}",
                entry.question_text,
                entry.submitted.as_deref().unwrap_or("nothing"),
                entry.expected
            );
        }
    });
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let _ = dotenvy::dotenv();

    tracing_subscriber::fmt()
        .json()
        .with_env_filter(EnvFilter::from_default_env().add_directive("info".parse()?))
        .init();

    let base_url =
        std::env::var("PORTAL_BASE_URL").unwrap_or_else(|_| "http://127.0.0.1:8000".to_string());
    let test_id: i64 = std::env::var("TEST_ID")
        .context("TEST_ID must be set")?
        .parse()
        .context("TEST_ID must be an integer")?;
    let token = std::env::var("PORTAL_ACCESS_TOKEN").ok();
    let state_path = std::env::var("SESSION_STATE_PATH")
        .unwrap_or_else(|_| "session_state.json".to_string());
    let shuffle = std::env::var("SHUFFLE_QUESTIONS")
        .map(|v| v == "1" || v.eq_ignore_ascii_case("true"))
        .unwrap_or(false);

    let api = Arc::new(HttpPortalApi::new(base_url, token.clone()));
    let auth = Arc::new(BearerTokenAuth::new(token));
    let store = Arc::new(JsonFileStore::open(state_path));

    let controller = match SessionController::load(
        test_id,
        api,
        store,
        auth,
        Arc::new(SystemClock),
        LoadOptions { shuffle },
    )
    .await
    {
        Ok(controller) => controller,
        Err(test_session::SessionError::AuthRequired) => {
            println!("you need to sign in first; set PORTAL_ACCESS_TOKEN and try again");
            return Ok(());
        }
        Err(err) => return Err(err).context("could not load the test"),
    };

    let runner = SessionRunner::new(controller, Arc::new(TokioScheduler));
    if runner.phase() == Phase::Ended {
        print_result(&runner);
        return Ok(());
    }
    println!("commands: status, start, a <answer>, next, prev, submit, submit!, quit");
    print_status(&runner);

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    while let Some(line) = lines.next_line().await? {
        if runner.phase() == Phase::Ended && runner.score().is_some() {
            break;
        }
        let input = line.trim();
        match input {
            "" | "status" => print_status(&runner),
            "start" => match runner.start_now() {
                Ok(()) => print_status(&runner),
                Err(err) => println!("{err}"),
            },
            "next" => {
                runner.next();
                print_status(&runner);
            }
            "prev" => {
                runner.previous();
                print_status(&runner);
            }
            "submit" | "submit!" => {
                match runner.submit(input == "submit!").await {
                    Ok(SubmitOutcome::Completed(_)) => break,
                    Ok(SubmitOutcome::ConfirmationRequired) => {
                        println!(
                            "the test has not run its full duration; type `submit!` to submit anyway"
                        );
                    }
                    Ok(SubmitOutcome::AlreadyInFlight) => {
                        println!("a submission is already on its way");
                    }
                    Err(err) => println!("{err} (you can retry)"),
                }
            }
            "quit" => return Ok(()),
            answer => {
                let answer = answer.strip_prefix("a ").unwrap_or(answer);
                let question_id = runner.with_controller(|c| c.current_question().map(|q| q.id));
                match question_id {
                    Some(question_id) => match runner.select_answer(question_id, answer.trim()) {
                        Ok(()) => print_status(&runner),
                        Err(err) => println!("{err}"),
                    },
                    None => println!("no question to answer right now"),
                }
            }
        }
        if runner.phase() == Phase::Ended {
            break;
        }
    }

    print_result(&runner);
    Ok(())
}
