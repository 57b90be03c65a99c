//! Exam session state machine.
//!
//! One [`ExamSession`] owns the lifecycle of a single attempt:
//!
//! - `Configuring` -> `Generating` (start requested, config valid)
//! - `Generating` -> `Active` (a non-empty exam was parsed)
//! - `Generating` -> `Configuring` (generation failed; error kept)
//! - `Active` -> `Grading` (explicit submit or timer expiry)
//! - `Grading` -> `Graded` (a valid report was parsed; history entry made)
//! - `Grading` -> `Grading` (grading failed; answers kept, retry allowed)
//! - `Configuring` | `Generating` | `Active` -> `Abandoned`
//!
//! At most one model request is in flight. Each request is identified by
//! a [`RequestTicket`]; a result carrying any other ticket is stale and is
//! discarded without touching the session. Ticket ids are unique across
//! every session in the process, so a reply for an abandoned session can
//! never match the ticket of the one that replaced it.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::atomic::{AtomicU64, Ordering};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::error::{NovaError, Result};
use crate::exam::{Answer, Exam, ExamMode, ExamRequestConfig, Question, QuestionId};
use crate::grading::GradingReport;
use crate::history::HistoryEntry;

static NEXT_TICKET: AtomicU64 = AtomicU64::new(1);

/// Lifecycle state of an exam session.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionStatus {
    /// The learner is choosing subject, topic, length and mode.
    #[default]
    Configuring,
    /// Waiting for the generated exam.
    Generating,
    /// The learner is answering questions.
    Active,
    /// Waiting for the grading report.
    Grading,
    /// A report is attached and the session is in history.
    Graded,
    /// Discarded by the learner.
    Abandoned,
}

impl SessionStatus {
    /// Returns `true` for states no transition leaves.
    #[must_use]
    pub const fn is_terminal(&self) -> bool {
        matches!(self, Self::Graded | Self::Abandoned)
    }

    /// Returns `true` while a model request is expected.
    #[must_use]
    pub const fn is_waiting(&self) -> bool {
        matches!(self, Self::Generating | Self::Grading)
    }
}

impl std::fmt::Display for SessionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Configuring => write!(f, "configuring"),
            Self::Generating => write!(f, "generating"),
            Self::Active => write!(f, "active"),
            Self::Grading => write!(f, "grading"),
            Self::Graded => write!(f, "graded"),
            Self::Abandoned => write!(f, "abandoned"),
        }
    }
}

/// Which model request a ticket belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RequestKind {
    /// Exam generation.
    Generation,
    /// Grading.
    Grading,
}

impl std::fmt::Display for RequestKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Generation => write!(f, "generation"),
            Self::Grading => write!(f, "grading"),
        }
    }
}

/// Identifies one in-flight model request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct RequestTicket {
    /// Process-wide sequence number.
    pub id: u64,
    /// What the request is for.
    pub kind: RequestKind,
}

/// Result of one timer tick.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TickOutcome {
    /// The session is not counting down.
    Idle,
    /// One second elapsed.
    Ticked {
        /// Seconds remaining after this tick.
        time_left_seconds: u64,
    },
    /// The countdown reached zero on this tick.
    Expired,
}

/// State of a single exam attempt.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExamSession {
    id: String,
    config: ExamRequestConfig,
    status: SessionStatus,
    #[serde(default)]
    exam_title: String,
    #[serde(default)]
    questions: Vec<Question>,
    #[serde(default)]
    answers: BTreeMap<QuestionId, Answer>,
    #[serde(default)]
    revealed: BTreeSet<QuestionId>,
    #[serde(default)]
    current_index: usize,
    #[serde(default)]
    started_at: Option<DateTime<Utc>>,
    #[serde(default)]
    time_budget_seconds: Option<u64>,
    #[serde(default)]
    time_left_seconds: Option<u64>,
    #[serde(default)]
    report: Option<GradingReport>,
    #[serde(default)]
    last_error: Option<String>,
    #[serde(skip)]
    in_flight: Option<RequestTicket>,
}

impl ExamSession {
    /// Creates a session in `Configuring` with a fresh timestamp-derived id.
    ///
    /// # Examples
    ///
    /// ```
    /// use nova_session::{ExamMode, ExamRequestConfig, ExamSession, LengthClass, SessionStatus};
    ///
    /// let config = ExamRequestConfig::new("AP Biology", "", LengthClass::Quick, ExamMode::Timed);
    /// let session = ExamSession::new(config);
    /// assert_eq!(session.status(), SessionStatus::Configuring);
    /// assert!(session.questions().is_empty());
    /// ```
    #[must_use]
    pub fn new(config: ExamRequestConfig) -> Self {
        Self {
            id: format!("{:x}", Utc::now().timestamp_millis()),
            config,
            status: SessionStatus::Configuring,
            exam_title: String::new(),
            questions: Vec::new(),
            answers: BTreeMap::new(),
            revealed: BTreeSet::new(),
            current_index: 0,
            started_at: None,
            time_budget_seconds: None,
            time_left_seconds: None,
            report: None,
            last_error: None,
            in_flight: None,
        }
    }

    // ------------------------------------------------------------------------
    // Accessors
    // ------------------------------------------------------------------------

    /// Session id; becomes the history entry id.
    #[must_use]
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Request configuration.
    #[must_use]
    pub const fn config(&self) -> &ExamRequestConfig {
        &self.config
    }

    /// Current status.
    #[must_use]
    pub const fn status(&self) -> SessionStatus {
        self.status
    }

    /// Title of the generated exam; empty before generation.
    #[must_use]
    pub fn exam_title(&self) -> &str {
        &self.exam_title
    }

    /// Questions in order.
    #[must_use]
    pub fn questions(&self) -> &[Question] {
        &self.questions
    }

    /// Answers keyed by question id.
    #[must_use]
    pub const fn answers(&self) -> &BTreeMap<QuestionId, Answer> {
        &self.answers
    }

    /// Question ids whose answers were revealed (practice mode).
    #[must_use]
    pub const fn revealed(&self) -> &BTreeSet<QuestionId> {
        &self.revealed
    }

    /// Index of the question on screen.
    #[must_use]
    pub const fn current_index(&self) -> usize {
        self.current_index
    }

    /// The question on screen, if any.
    #[must_use]
    pub fn current_question(&self) -> Option<&Question> {
        self.questions.get(self.current_index)
    }

    /// When the exam became active.
    #[must_use]
    pub const fn started_at(&self) -> Option<DateTime<Utc>> {
        self.started_at
    }

    /// Starting countdown, after accommodations. `None` when not timed.
    #[must_use]
    pub const fn time_budget_seconds(&self) -> Option<u64> {
        self.time_budget_seconds
    }

    /// Seconds remaining. `None` when not timed.
    #[must_use]
    pub const fn time_left_seconds(&self) -> Option<u64> {
        self.time_left_seconds
    }

    /// The attached report, once graded.
    #[must_use]
    pub const fn report(&self) -> Option<&GradingReport> {
        self.report.as_ref()
    }

    /// The most recent failure, kept for display until the next attempt.
    #[must_use]
    pub fn last_error(&self) -> Option<&str> {
        self.last_error.as_deref()
    }

    /// The request currently awaited, if any.
    #[must_use]
    pub const fn in_flight(&self) -> Option<RequestTicket> {
        self.in_flight
    }

    /// Returns `true` while the countdown should run.
    #[must_use]
    pub const fn is_counting_down(&self) -> bool {
        matches!(self.status, SessionStatus::Active) && self.time_left_seconds.is_some()
    }

    /// Whether a timed session ran out of time without being submitted.
    ///
    /// Only possible for a session restored from a snapshot written between
    /// expiry and the automatic submission.
    #[must_use]
    pub fn is_expired(&self) -> bool {
        self.status == SessionStatus::Active && self.time_left_seconds == Some(0)
    }

    /// Number of answered questions.
    #[must_use]
    pub fn answered_count(&self) -> usize {
        self.answers.len()
    }

    // ------------------------------------------------------------------------
    // Configuring
    // ------------------------------------------------------------------------

    /// Replaces the request configuration while still configuring.
    pub fn reconfigure(&mut self, config: ExamRequestConfig) -> Result<()> {
        self.require(SessionStatus::Configuring, "configuring")?;
        self.config = config;
        Ok(())
    }

    /// `Configuring` -> `Generating`.
    ///
    /// # Errors
    ///
    /// Returns `NovaError::ValidationError` when the subject is empty, or
    /// the topic is empty and `require_topic` is set; the session stays in
    /// `Configuring`. Returns `NovaError::InvalidStateTransition` from any
    /// other state.
    pub fn begin_generation(&mut self, require_topic: bool) -> Result<RequestTicket> {
        self.require(SessionStatus::Configuring, SessionStatus::Generating)?;
        self.config.validate(require_topic)?;
        self.last_error = None;
        self.transition(SessionStatus::Generating);
        Ok(self.issue_ticket(RequestKind::Generation))
    }

    /// Applies the outcome of a generation request.
    ///
    /// On success with at least one question the session becomes `Active`
    /// with the pointer on the first question and the countdown at
    /// `time_budget_seconds` (when timed). On failure, or an exam with zero
    /// questions, the session returns to `Configuring` with the error kept,
    /// and the error is returned.
    ///
    /// # Errors
    ///
    /// Returns `NovaError::StaleResponse` without changing anything if the
    /// ticket is not the awaited one.
    pub fn apply_generation(
        &mut self,
        ticket: RequestTicket,
        outcome: Result<Exam>,
        time_budget_seconds: Option<u64>,
    ) -> Result<()> {
        self.accept_ticket(ticket, SessionStatus::Generating)?;

        let exam = match outcome {
            Ok(exam) if exam.questions.is_empty() => {
                Err(NovaError::content("the generated exam has zero questions"))
            }
            other => other,
        };

        match exam {
            Ok(exam) => {
                self.exam_title = exam.title;
                self.questions = exam.questions;
                self.answers.clear();
                self.revealed.clear();
                self.current_index = 0;
                self.started_at = Some(Utc::now());
                self.time_budget_seconds = time_budget_seconds;
                self.time_left_seconds = time_budget_seconds;
                self.transition(SessionStatus::Active);
                Ok(())
            }
            Err(err) => {
                warn!(session = %self.id, error = %err, "Exam generation failed");
                self.last_error = Some(err.to_string());
                self.transition(SessionStatus::Configuring);
                Err(err)
            }
        }
    }

    // ------------------------------------------------------------------------
    // Active
    // ------------------------------------------------------------------------

    /// Records an answer. Does not move the question pointer.
    ///
    /// # Errors
    ///
    /// Returns `NovaError::ValidationError` if the session is not active,
    /// the id is unknown, or the answer shape does not fit the question.
    pub fn answer(&mut self, id: QuestionId, answer: Answer) -> Result<()> {
        self.require_active("answers")?;
        let question = self.question(id)?;
        question.check_answer(&answer)?;
        debug!(session = %self.id, question = id, "Recorded answer");
        self.answers.insert(id, answer);
        Ok(())
    }

    /// Records an answer for the question on screen.
    pub fn answer_current(&mut self, answer: Answer) -> Result<()> {
        let id = self.current_id()?;
        self.answer(id, answer)
    }

    /// Removes the answer to a question, if any.
    pub fn clear_answer(&mut self, id: QuestionId) -> Result<()> {
        self.require_active("answers")?;
        self.question(id)?;
        self.answers.remove(&id);
        Ok(())
    }

    /// Marks a question's answer as revealed. Practice mode only.
    pub fn reveal(&mut self, id: QuestionId) -> Result<()> {
        self.require_active("revealed answers")?;
        if self.config.mode != ExamMode::Practice {
            return Err(NovaError::validation(
                "Answers can only be revealed in practice mode",
                "Start the exam with --mode practice to reveal answers as you go",
            ));
        }
        self.question(id)?;
        self.revealed.insert(id);
        Ok(())
    }

    /// Reveals the question on screen. Practice mode only.
    pub fn reveal_current(&mut self) -> Result<()> {
        let id = self.current_id()?;
        self.reveal(id)
    }

    /// Moves the pointer to `index`. Out-of-range requests, and any request
    /// outside `Active`, leave the pointer unchanged and return `false`.
    pub fn navigate_to(&mut self, index: i64) -> bool {
        if self.status != SessionStatus::Active {
            return false;
        }
        match usize::try_from(index) {
            Ok(i) if i < self.questions.len() => {
                self.current_index = i;
                true
            }
            _ => false,
        }
    }

    /// Moves to the next question, if any.
    pub fn next(&mut self) -> bool {
        let target = i64::try_from(self.current_index).map_or(i64::MAX, |i| i.saturating_add(1));
        self.navigate_to(target)
    }

    /// Moves to the previous question, if any.
    pub fn previous(&mut self) -> bool {
        let target = i64::try_from(self.current_index).map_or(i64::MAX, |i| i - 1);
        self.navigate_to(target)
    }

    /// Advances the countdown by one second.
    ///
    /// Only an active, timed session counts down. Reaching zero reports
    /// `Expired`; the caller must then submit.
    pub fn tick(&mut self) -> TickOutcome {
        if self.status != SessionStatus::Active {
            return TickOutcome::Idle;
        }
        match self.time_left_seconds {
            None | Some(0) => TickOutcome::Idle,
            Some(left) => {
                let remaining = left - 1;
                self.time_left_seconds = Some(remaining);
                if remaining == 0 {
                    info!(session = %self.id, unanswered = self.questions.len() - self.answers.len(), "Time expired");
                    TickOutcome::Expired
                } else {
                    TickOutcome::Ticked {
                        time_left_seconds: remaining,
                    }
                }
            }
        }
    }

    // ------------------------------------------------------------------------
    // Grading
    // ------------------------------------------------------------------------

    /// `Active` -> `Grading`, or a retry from `Grading` after a failure.
    ///
    /// Unanswered questions stay absent from the answers.
    ///
    /// # Errors
    ///
    /// Returns `NovaError::ValidationError` if a request is already in
    /// flight, and `NovaError::InvalidStateTransition` from any state other
    /// than `Active` or `Grading`.
    pub fn begin_grading(&mut self) -> Result<RequestTicket> {
        if !matches!(self.status, SessionStatus::Active | SessionStatus::Grading) {
            return Err(NovaError::invalid_transition(
                self.status,
                SessionStatus::Grading,
            ));
        }
        self.require_idle()?;
        self.last_error = None;
        if self.status == SessionStatus::Active {
            self.transition(SessionStatus::Grading);
        } else {
            info!(session = %self.id, "Retrying grading");
        }
        Ok(self.issue_ticket(RequestKind::Grading))
    }

    /// Applies the outcome of a grading request.
    ///
    /// On success the report is attached, the session becomes `Graded` and
    /// the history entry is returned. This happens at most once: a second
    /// result finds no awaited ticket and is stale. On failure the session
    /// stays in `Grading` with its answers and the error is returned.
    ///
    /// # Errors
    ///
    /// Returns `NovaError::StaleResponse` without changing anything if the
    /// ticket is not the awaited one.
    pub fn apply_grading(
        &mut self,
        ticket: RequestTicket,
        outcome: Result<GradingReport>,
    ) -> Result<HistoryEntry> {
        self.accept_ticket(ticket, SessionStatus::Grading)?;

        match outcome {
            Ok(report) => {
                self.report = Some(report.clone());
                self.transition(SessionStatus::Graded);
                Ok(HistoryEntry {
                    id: self.id.clone(),
                    config: self.config.clone(),
                    exam_title: self.exam_title.clone(),
                    questions: self.questions.clone(),
                    answers: self.answers.clone(),
                    report,
                    completed_at: Utc::now(),
                })
            }
            Err(err) => {
                warn!(session = %self.id, error = %err, "Grading failed; answers kept for retry");
                self.last_error = Some(err.to_string());
                Err(err)
            }
        }
    }

    // ------------------------------------------------------------------------
    // Abandon & Restore
    // ------------------------------------------------------------------------

    /// Discards the session. Any awaited result becomes stale.
    ///
    /// # Errors
    ///
    /// Returns `NovaError::InvalidStateTransition` from `Grading`, `Graded`
    /// or `Abandoned`; a submitted session is never thrown away.
    pub fn abandon(&mut self) -> Result<()> {
        if !matches!(
            self.status,
            SessionStatus::Configuring | SessionStatus::Generating | SessionStatus::Active
        ) {
            return Err(NovaError::invalid_transition(
                self.status,
                SessionStatus::Abandoned,
            ));
        }
        self.in_flight = None;
        self.transition(SessionStatus::Abandoned);
        Ok(())
    }

    /// Normalizes a session loaded from disk, where no request can still
    /// be in flight. `Generating` falls back to `Configuring`; `Grading`
    /// stays, ready for a retry.
    #[must_use]
    pub fn restored(mut self) -> Self {
        self.in_flight = None;
        if self.status == SessionStatus::Generating {
            self.last_error = Some("Exam generation was interrupted; start it again".to_string());
            self.transition(SessionStatus::Configuring);
        }
        if self.current_index >= self.questions.len() {
            self.current_index = 0;
        }
        self.answers.retain(|id, _| (*id as usize) < self.questions.len());
        self
    }

    // ------------------------------------------------------------------------
    // Internals
    // ------------------------------------------------------------------------

    fn transition(&mut self, to: SessionStatus) {
        info!(session = %self.id, from = %self.status, to = %to, "Session status changed");
        self.status = to;
    }

    fn require(&self, expected: SessionStatus, to: impl std::fmt::Display) -> Result<()> {
        if self.status == expected {
            Ok(())
        } else {
            Err(NovaError::invalid_transition(self.status, to))
        }
    }

    fn require_active(&self, what: &str) -> Result<()> {
        if self.status == SessionStatus::Active {
            Ok(())
        } else {
            Err(NovaError::validation(
                format!("The exam is {}; {what} can only change while it is active", self.status),
                "Start or resume an exam first",
            ))
        }
    }

    fn require_idle(&self) -> Result<()> {
        match self.in_flight {
            Some(ticket) => Err(NovaError::validation(
                format!("A {} request is already in progress", ticket.kind),
                "Wait for it to finish",
            )),
            None => Ok(()),
        }
    }

    fn issue_ticket(&mut self, kind: RequestKind) -> RequestTicket {
        let ticket = RequestTicket {
            id: NEXT_TICKET.fetch_add(1, Ordering::Relaxed),
            kind,
        };
        self.in_flight = Some(ticket);
        ticket
    }

    fn accept_ticket(&mut self, ticket: RequestTicket, expected: SessionStatus) -> Result<()> {
        if self.in_flight != Some(ticket) || self.status != expected {
            debug!(session = %self.id, ticket = ticket.id, "Discarding stale response");
            return Err(NovaError::stale(ticket.kind.to_string()));
        }
        self.in_flight = None;
        Ok(())
    }

    fn question(&self, id: QuestionId) -> Result<&Question> {
        self.questions.get(id as usize).ok_or_else(|| {
            NovaError::validation(
                format!("There is no question {}", u64::from(id) + 1),
                format!("Questions are numbered 1 to {}", self.questions.len()),
            )
        })
    }

    fn current_id(&self) -> Result<QuestionId> {
        self.current_question().map(|q| q.id).ok_or_else(|| {
            NovaError::validation("There is no question on screen", "Start or resume an exam first")
        })
    }
}

#[cfg(test)]
impl ExamSession {
    /// Builds an active, untimed session directly from questions.
    pub(crate) fn with_questions(config: ExamRequestConfig, questions: Vec<Question>) -> Self {
        let mut session = Self::new(config);
        session.questions = questions;
        session.exam_title = "Test Exam".to_string();
        session.started_at = Some(Utc::now());
        session.status = SessionStatus::Active;
        session
    }

    pub(crate) fn with_time_left(mut self, seconds: u64) -> Self {
        self.time_budget_seconds = Some(seconds.max(1));
        self.time_left_seconds = Some(seconds);
        self
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::exam::tests::{mcq, saq};
    use crate::exam::LengthClass;
    use crate::grading::tests::report_reply;
    use crate::grading::parse_report;

    fn config(mode: ExamMode) -> ExamRequestConfig {
        ExamRequestConfig::new("AP Biology", "Photosynthesis", LengthClass::Diagnostic, mode)
    }

    fn exam(count: u32) -> Exam {
        Exam {
            title: "AP Biology Diagnostic".to_string(),
            subject: "AP Biology".to_string(),
            questions: (0..count).map(|i| mcq(i, "A")).collect(),
        }
    }

    fn active(mode: ExamMode, count: u32, budget: Option<u64>) -> ExamSession {
        let mut session = ExamSession::new(config(mode));
        let ticket = session.begin_generation(false).unwrap();
        session.apply_generation(ticket, Ok(exam(count)), budget).unwrap();
        session
    }

    // ------------------------------------------------------------------------
    // Generation
    // ------------------------------------------------------------------------

    #[test]
    fn test_scenario_a_generation_enters_active() {
        let session = active(ExamMode::Timed, 5, Some(40 * 60));

        assert_eq!(session.status(), SessionStatus::Active);
        assert_eq!(session.questions().len(), 5);
        assert_eq!(session.current_index(), 0);
        assert_eq!(session.time_left_seconds(), Some(2400));
        assert_eq!(session.time_budget_seconds(), Some(2400));
        assert!(session.started_at().is_some());
        assert!(session.in_flight().is_none());
    }

    #[test]
    fn test_begin_generation_guard_keeps_configuring() {
        let mut session = ExamSession::new(ExamRequestConfig::new(
            "AP Biology",
            "  ",
            LengthClass::Quick,
            ExamMode::Timed,
        ));
        let err = session.begin_generation(true).unwrap_err();
        assert!(matches!(err, NovaError::ValidationError { .. }));
        assert_eq!(session.status(), SessionStatus::Configuring);
        assert!(session.in_flight().is_none());
    }

    #[test]
    fn test_generation_failure_returns_to_configuring() {
        let mut session = ExamSession::new(config(ExamMode::Timed));
        let ticket = session.begin_generation(false).unwrap();
        let err = session
            .apply_generation(ticket, Err(NovaError::content("not JSON")), Some(60))
            .unwrap_err();

        assert!(matches!(err, NovaError::ContentValidationError { .. }));
        assert_eq!(session.status(), SessionStatus::Configuring);
        assert!(session.last_error().unwrap().contains("not JSON"));
        assert!(session.questions().is_empty());

        // The learner may start again
        assert!(session.begin_generation(false).is_ok());
    }

    #[test]
    fn test_zero_question_exam_is_content_error() {
        let mut session = ExamSession::new(config(ExamMode::Timed));
        let ticket = session.begin_generation(false).unwrap();
        let err = session.apply_generation(ticket, Ok(exam(0)), None).unwrap_err();
        assert!(err.to_string().contains("zero questions"));
        assert_eq!(session.status(), SessionStatus::Configuring);
    }

    #[test]
    fn test_late_generation_after_abandon_is_discarded() {
        let mut session = ExamSession::new(config(ExamMode::Timed));
        let ticket = session.begin_generation(false).unwrap();
        session.abandon().unwrap();

        let err = session.apply_generation(ticket, Ok(exam(3)), Some(60)).unwrap_err();
        assert!(matches!(err, NovaError::StaleResponse { .. }));
        assert_eq!(session.status(), SessionStatus::Abandoned);
        assert!(session.questions().is_empty());
    }

    #[test]
    fn test_wrong_ticket_is_stale() {
        let mut session = ExamSession::new(config(ExamMode::Timed));
        let ticket = session.begin_generation(false).unwrap();
        let forged = RequestTicket {
            id: ticket.id + 1,
            kind: ticket.kind,
        };
        assert!(session.apply_generation(forged, Ok(exam(1)), None).is_err());
        assert_eq!(session.status(), SessionStatus::Generating);
        assert!(session.apply_generation(ticket, Ok(exam(1)), None).is_ok());
    }

    #[test]
    fn test_ticket_from_abandoned_session_is_stale_on_successor() {
        let mut first = ExamSession::new(config(ExamMode::Timed));
        let old = first.begin_generation(false).unwrap();
        first.abandon().unwrap();

        let mut second = ExamSession::new(config(ExamMode::Timed));
        let current = second.begin_generation(false).unwrap();
        assert_ne!(old, current);

        let err = second.apply_generation(old, Ok(exam(2)), None).unwrap_err();
        assert!(matches!(err, NovaError::StaleResponse { .. }));
        assert_eq!(second.status(), SessionStatus::Generating);
        assert!(second.questions().is_empty());

        second.apply_generation(current, Ok(exam(5)), None).unwrap();
        assert_eq!(second.questions().len(), 5);
    }

    // ------------------------------------------------------------------------
    // Active
    // ------------------------------------------------------------------------

    #[test]
    fn test_answer_does_not_advance_pointer() {
        let mut session = active(ExamMode::Untimed, 3, None);
        session.answer_current(Answer::Choice("B".to_string())).unwrap();
        assert_eq!(session.current_index(), 0);
        assert_eq!(session.answers().get(&0), Some(&Answer::Choice("B".to_string())));
    }

    #[test]
    fn test_answer_for_unknown_question_is_rejected() {
        let mut session = active(ExamMode::Untimed, 3, None);
        let err = session.answer(3, Answer::Choice("A".to_string())).unwrap_err();
        assert!(matches!(err, NovaError::ValidationError { .. }));
        assert!(session.answers().is_empty());
    }

    #[test]
    fn test_answer_with_wrong_shape_is_rejected() {
        let mut session = ExamSession::with_questions(config(ExamMode::Untimed), vec![mcq(0, "A"), saq(1)]);
        assert!(session.answer(1, Answer::Choice("A".to_string())).is_err());
        assert!(session.answers().is_empty());
    }

    #[test]
    fn test_navigation_out_of_range_is_noop() {
        let mut session = active(ExamMode::Untimed, 3, None);
        assert!(session.navigate_to(2));
        assert_eq!(session.current_index(), 2);

        assert!(!session.navigate_to(-1));
        assert!(!session.navigate_to(3));
        assert!(!session.next());
        assert_eq!(session.current_index(), 2);

        assert!(session.previous());
        assert!(session.previous());
        assert!(!session.previous());
        assert_eq!(session.current_index(), 0);
    }

    #[test]
    fn test_reveal_only_in_practice_mode() {
        let mut timed = active(ExamMode::Timed, 2, Some(60));
        assert!(timed.reveal(0).is_err());

        let mut practice = active(ExamMode::Practice, 2, None);
        practice.reveal_current().unwrap();
        assert!(practice.revealed().contains(&0));
    }

    #[test]
    fn test_timer_strictly_decreases_and_expires() {
        let mut session = active(ExamMode::Timed, 2, Some(3));
        assert_eq!(session.tick(), TickOutcome::Ticked { time_left_seconds: 2 });
        assert_eq!(session.tick(), TickOutcome::Ticked { time_left_seconds: 1 });
        assert_eq!(session.tick(), TickOutcome::Expired);
        assert_eq!(session.time_left_seconds(), Some(0));
        assert_eq!(session.tick(), TickOutcome::Idle);
    }

    #[test]
    fn test_untimed_session_never_ticks() {
        let mut session = active(ExamMode::Untimed, 2, None);
        assert!(!session.is_counting_down());
        assert_eq!(session.tick(), TickOutcome::Idle);
    }

    // ------------------------------------------------------------------------
    // Grading
    // ------------------------------------------------------------------------

    #[test]
    fn test_active_reaches_only_grading_or_abandoned() {
        let mut session = active(ExamMode::Timed, 2, Some(60));
        let err = session.begin_generation(false).unwrap_err();
        assert!(matches!(err, NovaError::InvalidStateTransition { .. }));
        assert!(session.reconfigure(config(ExamMode::Untimed)).is_err());
        assert_eq!(session.status(), SessionStatus::Active);

        let mut abandoning = session.clone();
        abandoning.abandon().unwrap();
        assert_eq!(abandoning.status(), SessionStatus::Abandoned);

        session.begin_grading().unwrap();
        assert_eq!(session.status(), SessionStatus::Grading);
    }

    #[test]
    fn test_scenario_b_partial_answers_graded_once() {
        let mut session = active(ExamMode::Untimed, 3, None);
        session.answer(0, Answer::Choice("A".to_string())).unwrap();
        session.answer(2, Answer::Choice("C".to_string())).unwrap();

        let ticket = session.begin_grading().unwrap();
        assert_eq!(session.answers().len(), 2);
        assert!(!session.answers().contains_key(&1));

        let report = parse_report(&report_reply(3), session.questions());
        let entry = session.apply_grading(ticket, report).unwrap();

        assert_eq!(session.status(), SessionStatus::Graded);
        assert_eq!(entry.id, session.id());
        assert_eq!(entry.answers.len(), 2);
        assert!(session.report().is_some());

        // A duplicate result cannot produce a second entry
        let again = parse_report(&report_reply(3), session.questions());
        assert!(matches!(
            session.apply_grading(ticket, again),
            Err(NovaError::StaleResponse { .. })
        ));
    }

    #[test]
    fn test_grading_failure_keeps_answers_and_allows_retry() {
        let mut session = active(ExamMode::Untimed, 2, None);
        session.answer(0, Answer::Choice("A".to_string())).unwrap();
        let ticket = session.begin_grading().unwrap();

        let err = session
            .apply_grading(ticket, Err(NovaError::transport(3, crate::error::TransportErrorKind::Server, "HTTP 503")))
            .unwrap_err();
        assert!(err.is_retryable());
        assert_eq!(session.status(), SessionStatus::Grading);
        assert_eq!(session.answers().len(), 1);
        assert!(session.last_error().is_some());

        // No edits while grading
        assert!(session.answer(1, Answer::Choice("B".to_string())).is_err());

        let retry = session.begin_grading().unwrap();
        assert_ne!(retry, ticket);
        let report = parse_report(&report_reply(2), session.questions());
        assert!(session.apply_grading(retry, report).is_ok());
        assert_eq!(session.status(), SessionStatus::Graded);
    }

    #[test]
    fn test_only_one_grading_request_in_flight() {
        let mut session = active(ExamMode::Untimed, 1, None);
        session.begin_grading().unwrap();
        assert!(matches!(
            session.begin_grading(),
            Err(NovaError::ValidationError { .. })
        ));
    }

    #[test]
    fn test_scenario_d_expiry_submits_without_placeholders() {
        let mut session = active(ExamMode::Timed, 5, Some(2));
        session.answer(0, Answer::Choice("A".to_string())).unwrap();
        session.answer(1, Answer::Choice("B".to_string())).unwrap();
        session.answer(3, Answer::Choice("D".to_string())).unwrap();

        session.tick();
        assert_eq!(session.tick(), TickOutcome::Expired);
        session.begin_grading().unwrap();

        assert_eq!(session.status(), SessionStatus::Grading);
        let ids: Vec<_> = session.answers().keys().copied().collect();
        assert_eq!(ids, [0, 1, 3]);
        assert_eq!(session.tick(), TickOutcome::Idle);
    }

    #[test]
    fn test_abandon_rejected_once_submitted() {
        let mut session = active(ExamMode::Untimed, 1, None);
        session.begin_grading().unwrap();
        assert!(session.abandon().is_err());
        assert_eq!(session.status(), SessionStatus::Grading);
    }

    // ------------------------------------------------------------------------
    // Persistence
    // ------------------------------------------------------------------------

    #[test]
    fn test_restored_generating_falls_back_to_configuring() {
        let mut session = ExamSession::new(config(ExamMode::Timed));
        session.begin_generation(false).unwrap();

        let json = serde_json::to_string(&session).unwrap();
        let restored: ExamSession = serde_json::from_str::<ExamSession>(&json).unwrap().restored();
        assert_eq!(restored.status(), SessionStatus::Configuring);
        assert!(restored.in_flight().is_none());
        assert!(restored.last_error().is_some());
    }

    #[test]
    fn test_restored_grading_can_retry() {
        let mut session = active(ExamMode::Timed, 2, Some(100));
        session.answer(1, Answer::Choice("A".to_string())).unwrap();
        session.begin_grading().unwrap();

        let json = serde_json::to_string(&session).unwrap();
        let mut restored = serde_json::from_str::<ExamSession>(&json).unwrap().restored();
        assert_eq!(restored.status(), SessionStatus::Grading);
        assert_eq!(restored.answers().len(), 1);
        assert!(restored.begin_grading().is_ok());
    }

    #[test]
    fn test_restored_active_keeps_remaining_time() {
        let mut session = active(ExamMode::Timed, 2, Some(100));
        session.tick();
        let json = serde_json::to_string(&session).unwrap();
        let restored = serde_json::from_str::<ExamSession>(&json).unwrap().restored();
        assert_eq!(restored.time_left_seconds(), Some(99));
        assert!(restored.is_counting_down());
    }

    #[test]
    fn test_restored_after_expiry_is_expired() {
        let mut session = active(ExamMode::Timed, 2, Some(1));
        assert!(!session.is_expired());
        assert_eq!(session.tick(), TickOutcome::Expired);

        let json = serde_json::to_string(&session).unwrap();
        let mut restored = serde_json::from_str::<ExamSession>(&json).unwrap().restored();
        assert!(restored.is_expired());
        assert!(restored.begin_grading().is_ok());
        assert!(!restored.is_expired());
    }

    #[test]
    fn test_status_serialization() {
        assert_eq!(
            serde_json::to_string(&SessionStatus::Grading).unwrap(),
            "\"grading\""
        );
        assert!(SessionStatus::Graded.is_terminal());
        assert!(SessionStatus::Generating.is_waiting());
    }
}
