//! Markdown results document for a graded session.
//!
//! The document includes:
//!
//! - A summary table with the AP score, raw score and local MCQ tally
//! - The model's feedback, strengths and weaknesses
//! - A per-question verdict table
//! - An answer review with correct answers and explanations
//!
//! # Example
//!
//! ```rust,ignore
//! use nova_report::MarkdownGenerator;
//!
//! let markdown = MarkdownGenerator::new(&entry).generate();
//! assert!(markdown.starts_with("# AP Biology Results"));
//! ```

use chrono::{DateTime, Utc};
use std::fmt::Write;

use nova_session::{HistoryEntry, Question, QuestionStatus};

use crate::render::flatten_math;
use crate::{expected_answer, format_answer, ResultsSummary};

/// Maximum length of a note in the verdict table.
const MAX_NOTE_DISPLAY_LENGTH: usize = 100;

/// Generates a Markdown results document from a history entry.
pub struct MarkdownGenerator<'a> {
    entry: &'a HistoryEntry,
}

impl<'a> MarkdownGenerator<'a> {
    /// Creates a new Markdown generator for the given entry.
    #[must_use]
    pub const fn new(entry: &'a HistoryEntry) -> Self {
        Self { entry }
    }

    /// Generates the complete document.
    #[must_use]
    pub fn generate(&self) -> String {
        let mut output = String::new();

        self.write_title(&mut output);
        self.write_summary(&mut output);
        self.write_feedback(&mut output);
        self.write_verdicts(&mut output);
        self.write_review(&mut output);
        Self::write_footer(&mut output);

        output
    }

    fn write_title(&self, output: &mut String) {
        let _ = writeln!(
            output,
            "# {} Results\n",
            escape_markdown(self.entry.config.subject.trim())
        );
        if !self.entry.exam_title.is_empty() {
            let _ = writeln!(output, "*{}*\n", escape_markdown(&self.entry.exam_title));
        }
    }

    fn write_summary(&self, output: &mut String) {
        let summary = ResultsSummary::from_entry(self.entry);
        let config = &self.entry.config;

        let _ = writeln!(output, "## Summary\n");
        let _ = writeln!(output, "| Metric | Value |");
        let _ = writeln!(output, "|--------|-------|");
        let _ = writeln!(output, "| AP Score Estimate | {} / 5 |", summary.ap_score);
        let _ = writeln!(output, "| Raw Score | {} |", escape_markdown(&summary.raw_score));
        let mcq = match summary.mcq.percentage() {
            Some(pct) => format!("{}/{} ({pct}%)", summary.mcq.correct, summary.mcq.total),
            None => "n/a".to_string(),
        };
        let _ = writeln!(output, "| Multiple Choice | {mcq} |");
        let _ = writeln!(
            output,
            "| Answered | {}/{} |",
            summary.answered, summary.total_questions
        );
        if !config.topic_focus.trim().is_empty() {
            let _ = writeln!(output, "| Topic | {} |", escape_markdown(config.topic_focus.trim()));
        }
        let _ = writeln!(
            output,
            "| Format | {} / {} / {} |",
            config.length_class, config.mode, config.difficulty
        );
        let _ = writeln!(
            output,
            "| Completed | {} |",
            format_timestamp(&summary.completed_at)
        );
        let _ = writeln!(output);
    }

    fn write_feedback(&self, output: &mut String) {
        let report = &self.entry.report;

        let _ = writeln!(output, "## Feedback\n");
        let _ = writeln!(output, "{}\n", report.feedback.trim());

        write_list(output, "Strengths", &report.strengths);
        write_list(output, "Areas to Review", &report.weaknesses);
    }

    fn write_verdicts(&self, output: &mut String) {
        let _ = writeln!(output, "## Question Breakdown\n");
        let _ = writeln!(output, "| # | Type | Status | Note |");
        let _ = writeln!(output, "|---|------|--------|------|");

        for analysis in &self.entry.report.per_question_analysis {
            let kind = self
                .question(analysis.question_id)
                .map_or("?", |q| q.kind().code());
            let _ = writeln!(
                output,
                "| {} | {kind} | {} {} | {} |",
                analysis.question_id + 1,
                status_icon(analysis.status),
                analysis.status,
                escape_markdown(&truncate(&analysis.note, MAX_NOTE_DISPLAY_LENGTH)),
            );
        }
        let _ = writeln!(output);
    }

    fn write_review(&self, output: &mut String) {
        let _ = writeln!(output, "## Answer Review\n");

        for question in &self.entry.questions {
            let _ = writeln!(
                output,
                "### Question {} ({})\n",
                question.id + 1,
                question.kind().code()
            );
            let _ = writeln!(output, "{}\n", flatten_math(&question.prompt));
            let _ = writeln!(
                output,
                "- **Your answer**: {}",
                escape_markdown(&format_answer(self.entry.answer_for(question.id)))
            );
            if let Some(expected) = expected_answer(question) {
                let _ = writeln!(
                    output,
                    "- **Correct answer**: {}",
                    escape_markdown(&flatten_math(&expected))
                );
            }
            if !question.explanation.is_empty() {
                let _ = writeln!(
                    output,
                    "- **Explanation**: {}",
                    flatten_math(&question.explanation)
                );
            }
            let _ = writeln!(output);
        }
    }

    fn write_footer(output: &mut String) {
        let _ = writeln!(output, "---");
        let timestamp = format_timestamp(&Utc::now());
        let _ = writeln!(output, "*Generated by NovaScholar at {timestamp}*");
    }

    fn question(&self, id: u32) -> Option<&Question> {
        self.entry.questions.iter().find(|q| q.id == id)
    }
}

// ============================================================================
// Helper Functions
// ============================================================================

fn write_list(output: &mut String, title: &str, items: &[String]) {
    let _ = writeln!(output, "### {title}\n");
    if items.is_empty() {
        let _ = writeln!(output, "*None noted*\n");
        return;
    }
    for item in items {
        let _ = writeln!(output, "- {}", escape_markdown(item));
    }
    let _ = writeln!(output);
}

const fn status_icon(status: QuestionStatus) -> &'static str {
    match status {
        QuestionStatus::Correct => "&#9989;",
        QuestionStatus::Incorrect => "&#10060;",
        QuestionStatus::Partial => "&#9888;&#65039;",
    }
}

/// Format: "YYYY-MM-DD HH:MM:SS UTC"
fn format_timestamp(dt: &DateTime<Utc>) -> String {
    dt.format("%Y-%m-%d %H:%M:%S UTC").to_string()
}

/// Escapes characters with Markdown meaning; newlines become `<br>` so
/// table cells stay on one row.
fn escape_markdown(text: &str) -> String {
    let mut result = String::with_capacity(text.len());

    for ch in text.chars() {
        match ch {
            '*' | '_' | '`' | '#' | '[' | ']' | '!' | '\\' | '<' | '>' | '|' => {
                result.push('\\');
                result.push(ch);
            }
            '\n' => result.push_str("<br>"),
            _ => result.push(ch),
        }
    }

    result
}

/// Truncates at a char boundary, adding an ellipsis.
fn truncate(text: &str, max_length: usize) -> String {
    if text.chars().count() <= max_length {
        text.to_string()
    } else {
        let kept: String = text.chars().take(max_length).collect();
        format!("{kept}...")
    }
}

// ============================================================================
// Tests
// ============================================================================
