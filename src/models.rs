use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Phase {
    NotStarted,
    ReadyToStart,
    InProgress,
    Ended,
}

impl Phase {
    pub fn is_time_bounded(self) -> bool {
        matches!(self, Phase::NotStarted | Phase::InProgress)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OptionLetter {
    A,
    B,
    C,
    D,
}

impl OptionLetter {
    pub const ALL: [OptionLetter; 4] = [
        OptionLetter::A,
        OptionLetter::B,
        OptionLetter::C,
        OptionLetter::D,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            OptionLetter::A => "A",
            OptionLetter::B => "B",
            OptionLetter::C => "C",
            OptionLetter::D => "D",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CourseRef {
    pub id: i64,
    pub name: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Question {
    pub id: i64,
    pub question_text: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub option_a: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub option_b: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub option_c: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub option_d: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub correct_option: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub correct_answer_text: Option<String>,
}

impl Question {
    // A question with option_a present is multiple-choice; otherwise free text.
    pub fn is_multiple_choice(&self) -> bool {
        self.option_a.is_some()
    }

    pub fn option_text(&self, letter: OptionLetter) -> Option<&str> {
        match letter {
            OptionLetter::A => self.option_a.as_deref(),
            OptionLetter::B => self.option_b.as_deref(),
            OptionLetter::C => self.option_c.as_deref(),
            OptionLetter::D => self.option_d.as_deref(),
        }
    }

    // Grading fields are only present on endpoints that expose them (solo
    // sessions); group tests keep them server-side.
    pub fn expected_answer(&self) -> Option<&str> {
        self.correct_option
            .as_deref()
            .or(self.correct_answer_text.as_deref())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TestDefinition {
    pub id: i64,
    pub name: String,
    pub course: CourseRef,
    pub scheduled_start: DateTime<Utc>,
    pub duration_minutes: u32,
    #[serde(default)]
    pub questions: Vec<Question>,
    pub question_count: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub session_id: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created_by: Option<String>,
}

impl TestDefinition {
    pub fn end_time(&self) -> DateTime<Utc> {
        self.scheduled_start + Duration::minutes(i64::from(self.duration_minutes))
    }

    pub fn has_question(&self, question_id: i64) -> bool {
        self.questions.iter().any(|q| q.id == question_id)
    }

    pub fn question_ids(&self) -> HashSet<i64> {
        self.questions.iter().map(|q| q.id).collect()
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct AnswerSet(HashMap<i64, String>);

impl AnswerSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, question_id: i64, answer: impl Into<String>) {
        self.0.insert(question_id, answer.into());
    }

    pub fn get(&self, question_id: i64) -> Option<&str> {
        self.0.get(&question_id).map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (i64, &str)> {
        self.0.iter().map(|(id, answer)| (*id, answer.as_str()))
    }

    // Drops answers whose question id is not in the definition; returns how
    // many were dropped.
    pub fn retain_known(&mut self, known: &HashSet<i64>) -> usize {
        let before = self.0.len();
        self.0.retain(|id, _| known.contains(id));
        before - self.0.len()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct ScoreResult {
    pub correct: u32,
    pub total: u32,
    pub percentage: u32,
}

impl ScoreResult {
    pub fn new(correct: u32, total: u32) -> Self {
        let percentage = if total == 0 {
            0
        } else {
            ((f64::from(correct) * 100.0) / f64::from(total)).round() as u32
        };
        Self {
            correct,
            total,
            percentage,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct ReviewEntry {
    pub question_id: i64,
    pub question_text: String,
    pub submitted: Option<String>,
    pub expected: String,
}

// Incorrectly answered questions, for the post-submit review screen. Only
// questions that carry grading fields can appear here.
pub fn build_review(questions: &[Question], answers: &AnswerSet) -> Vec<ReviewEntry> {
    questions
        .iter()
        .filter_map(|q| {
            let expected = q.expected_answer()?;
            let submitted = answers.get(q.id);
            let correct = submitted
                .map(|s| s.trim().eq_ignore_ascii_case(expected.trim()))
                .unwrap_or(false);
            if correct {
                None
            } else {
                Some(ReviewEntry {
                    question_id: q.id,
                    question_text: q.question_text.clone(),
                    submitted: submitted.map(str::to_string),
                    expected: expected.to_string(),
                })
            }
        })
        .collect()
}
