//! NovaScholar Result Reports
//!
//! Turns graded sessions into something a learner can read: a results
//! summary with a local multiple-choice tally, terminal rendering of
//! questions, and Markdown or JSON exports.
//!
//! # Generators
//!
//! - [`MarkdownGenerator`] - human-readable results document
//! - [`json::JsonGenerator`] - JSON export of one or all history entries
//!
//! # Example
//!
//! ```rust
//! use nova_report::format_clock;
//!
//! assert_eq!(format_clock(59), "00:59");
//! assert_eq!(format_clock(2700), "45:00");
//! assert_eq!(format_clock(3725), "1:02:05");
//! ```

pub mod json;
mod markdown;
pub mod render;

pub use markdown::MarkdownGenerator;

use chrono::{DateTime, Utc};
use nova_session::{
    option_label, Answer, HistoryEntry, Question, QuestionBody, QuestionId, QuestionStatus,
};
use serde::Serialize;
use std::collections::BTreeMap;
use thiserror::Error;

// ============================================================================
// Error Types
// ============================================================================

/// Errors that can occur during report generation.
#[derive(Debug, Error)]
pub enum ReportError {
    /// Failed to serialize the report to JSON.
    #[error("failed to serialize report: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Failed to read or write report files.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Invalid report data.
    #[error("invalid report data: {0}")]
    InvalidData(String),
}

/// Result type for report operations.
pub type Result<T> = std::result::Result<T, ReportError>;

// ============================================================================
// Clock
// ============================================================================

/// Formats a countdown as `MM:SS`, or `H:MM:SS` from one hour up.
#[must_use]
pub fn format_clock(seconds: u64) -> String {
    let hours = seconds / 3600;
    let minutes = (seconds % 3600) / 60;
    let secs = seconds % 60;
    if hours > 0 {
        format!("{hours}:{minutes:02}:{secs:02}")
    } else {
        format!("{minutes:02}:{secs:02}")
    }
}

// ============================================================================
// MCQ Tally
// ============================================================================

/// Multiple-choice questions answered with the correct option, counted
/// locally and independent of the model's report.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct McqTally {
    /// Correctly answered MCQs.
    pub correct: usize,
    /// MCQs in the exam, answered or not.
    pub total: usize,
}

impl McqTally {
    /// Counts correct MCQ answers.
    #[must_use]
    pub fn count(questions: &[Question], answers: &BTreeMap<QuestionId, Answer>) -> Self {
        questions.iter().fold(Self::default(), |mut tally, q| {
            if let Some(correct) = q.is_correct_choice(answers.get(&q.id)) {
                tally.total += 1;
                tally.correct += usize::from(correct);
            }
            tally
        })
    }

    /// Whole-number percentage, or `None` when the exam has no MCQs.
    #[must_use]
    pub fn percentage(&self) -> Option<usize> {
        (self.total > 0).then(|| (self.correct * 100 + self.total / 2) / self.total)
    }
}

// ============================================================================
// Results Summary
// ============================================================================

/// Per-status counts from the model's analysis.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct StatusCounts {
    /// Questions marked correct.
    pub correct: usize,
    /// Questions marked incorrect.
    pub incorrect: usize,
    /// Questions marked partially correct.
    pub partial: usize,
}

/// Headline figures for one graded session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ResultsSummary {
    /// History entry id.
    pub id: String,
    /// Subject name.
    pub subject: String,
    /// Exam title.
    pub exam_title: String,
    /// AP score estimate, 1 to 5.
    pub ap_score: u8,
    /// Raw score as reported, `correct/total`.
    pub raw_score: String,
    /// Local multiple-choice tally.
    pub mcq: McqTally,
    /// Questions with an answer.
    pub answered: usize,
    /// Questions in the exam.
    pub total_questions: usize,
    /// Verdict counts.
    pub statuses: StatusCounts,
    /// When grading completed.
    pub completed_at: DateTime<Utc>,
}

impl ResultsSummary {
    /// Summarizes a history entry.
    #[must_use]
    pub fn from_entry(entry: &HistoryEntry) -> Self {
        let report = &entry.report;
        Self {
            id: entry.id.clone(),
            subject: entry.config.subject.clone(),
            exam_title: entry.exam_title.clone(),
            ap_score: report.ap_score_estimate,
            raw_score: report.raw_score.clone(),
            mcq: McqTally::count(&entry.questions, &entry.answers),
            answered: entry.answers.len(),
            total_questions: entry.questions.len(),
            statuses: StatusCounts {
                correct: report.count(QuestionStatus::Correct),
                incorrect: report.count(QuestionStatus::Incorrect),
                partial: report.count(QuestionStatus::Partial),
            },
            completed_at: entry.completed_at,
        }
    }
}

/// The expected answer of a question as display text.
#[must_use]
pub fn expected_answer(question: &Question) -> Option<String> {
    match &question.body {
        QuestionBody::Mcq {
            options,
            correct_answer,
        } => {
            let text = (0..options.len())
                .find(|i| option_label(*i) == *correct_answer)
                .map_or(String::new(), |i| format!(") {}", options[i]));
            Some(format!("{correct_answer}{text}"))
        }
        QuestionBody::Frq { model_answer }
        | QuestionBody::Saq { model_answer, .. }
        | QuestionBody::Dbq { model_answer, .. }
        | QuestionBody::Leq { model_answer } => model_answer.clone(),
    }
}

/// Formats an answer for display; `None` shows as "(no answer)".
#[must_use]
pub fn format_answer(answer: Option<&Answer>) -> String {
    match answer {
        None => "(no answer)".to_string(),
        Some(Answer::Choice(label)) => label.clone(),
        Some(Answer::Text(text)) => text.clone(),
        Some(Answer::Parts(parts)) => parts
            .iter()
            .map(|(label, text)| format!("{label}: {text}"))
            .collect::<Vec<_>>()
            .join("; "),
    }
}
