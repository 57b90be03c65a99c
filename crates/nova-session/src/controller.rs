//! Drives one learner's sessions end to end.
//!
//! [`ExamController`] owns the in-progress [`ExamSession`], the history,
//! the countdown and the persisted snapshot. It performs model calls with
//! the session lock released, then re-acquires it to apply the result, so
//! ticks and user actions keep flowing while a request is outstanding.
//! Every change is saved to the local store.

use std::ops::ControlFlow;
use std::sync::{Arc, Weak};
use std::time::Duration;

use tokio::sync::{broadcast, Mutex};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::config::Config;
use crate::error::{NovaError, Result};
use crate::events::{EventBroadcaster, SessionEvent};
use crate::exam::{Answer, ExamRequestConfig, QuestionId};
use crate::generation::{parse_exam, ExamRequestBuilder};
use crate::grading::{parse_report, GradingRequestBuilder};
use crate::history::{HistoryEntry, HistoryStore};
use crate::model::ModelBackend;
use crate::session::{ExamSession, SessionStatus, TickOutcome};
use crate::store::{Accommodations, AppSnapshot, FileStore, View};
use crate::structure::StructureTable;
use crate::timer::{time_budget_seconds, Countdown, TICK_PERIOD};

/// How often, in countdown seconds, the remaining time is persisted.
const TICK_SAVE_INTERVAL: u64 = 10;

struct State {
    session: Option<ExamSession>,
    history: HistoryStore,
    view: View,
    countdown: Option<Countdown>,
    cancel: CancellationToken,
}

struct Inner {
    state: Mutex<State>,
    backend: Arc<dyn ModelBackend>,
    table: StructureTable,
    config: Config,
    accommodations: Accommodations,
    store: Option<FileStore>,
    events: EventBroadcaster,
    tick_period: Duration,
}

/// Cheaply cloneable handle to the running exam state.
#[derive(Clone)]
pub struct ExamController {
    inner: Arc<Inner>,
}

impl std::fmt::Debug for ExamController {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ExamController")
            .field("accommodations", &self.inner.accommodations)
            .field("persisted", &self.inner.store.is_some())
            .finish_non_exhaustive()
    }
}

/// Builder for [`ExamController`].
pub struct ControllerBuilder {
    config: Config,
    backend: Arc<dyn ModelBackend>,
    accommodations: Accommodations,
    table: StructureTable,
    store: Option<FileStore>,
    tick_period: Duration,
}

impl ControllerBuilder {
    /// Uses the given accommodation flags.
    #[must_use]
    pub const fn accommodations(mut self, accommodations: Accommodations) -> Self {
        self.accommodations = accommodations;
        self
    }

    /// Uses a custom structure table.
    #[must_use]
    pub fn table(mut self, table: StructureTable) -> Self {
        self.table = table;
        self
    }

    /// Persists to and restores from `store`.
    #[must_use]
    pub fn store(mut self, store: FileStore) -> Self {
        self.store = Some(store);
        self
    }

    /// Overrides the countdown resolution.
    #[must_use]
    pub const fn tick_period(mut self, period: Duration) -> Self {
        self.tick_period = period;
        self
    }

    /// Builds the controller, restoring any persisted snapshot.
    #[must_use]
    pub fn build(self) -> ExamController {
        let snapshot = self
            .store
            .as_ref()
            .map(AppSnapshot::load)
            .unwrap_or_default();
        if let Some(session) = &snapshot.session {
            info!(session = %session.id(), status = %session.status(), "Restored session");
        }

        ExamController {
            inner: Arc::new(Inner {
                state: Mutex::new(State {
                    session: snapshot.session,
                    history: HistoryStore::from_entries(snapshot.history),
                    view: snapshot.view,
                    countdown: None,
                    cancel: CancellationToken::new(),
                }),
                backend: self.backend,
                table: self.table,
                config: self.config,
                accommodations: self.accommodations,
                store: self.store,
                events: EventBroadcaster::default(),
                tick_period: self.tick_period,
            }),
        }
    }
}

impl ExamController {
    /// Starts building a controller over a model backend.
    pub fn builder(config: Config, backend: Arc<dyn ModelBackend>) -> ControllerBuilder {
        ControllerBuilder {
            config,
            backend,
            accommodations: Accommodations::default(),
            table: StructureTable::builtin(),
            store: None,
            tick_period: TICK_PERIOD,
        }
    }

    /// Subscribes to session events.
    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<SessionEvent> {
        self.inner.events.subscribe()
    }

    /// The structure table in use.
    #[must_use]
    pub fn table(&self) -> &StructureTable {
        &self.inner.table
    }

    /// The injected accommodation flags.
    #[must_use]
    pub fn accommodations(&self) -> Accommodations {
        self.inner.accommodations
    }

    /// A copy of the in-progress session, if any.
    pub async fn session(&self) -> Option<ExamSession> {
        self.inner.state.lock().await.session.clone()
    }

    /// A copy of everything that would be persisted.
    pub async fn snapshot(&self) -> AppSnapshot {
        let state = self.inner.state.lock().await;
        Self::snapshot_of(&state)
    }

    // ------------------------------------------------------------------------
    // Generation
    // ------------------------------------------------------------------------

    /// Generates an exam and makes it active.
    ///
    /// # Errors
    ///
    /// Returns `NovaError::ValidationError` if the request is incomplete or
    /// another exam is in progress. Generation failures return the session
    /// to `Configuring` and are returned as-is. Returns
    /// `NovaError::StaleResponse` if the session was abandoned meanwhile.
    pub async fn start_exam(&self, request: ExamRequestConfig) -> Result<()> {
        let (ticket, generation, token) = {
            let mut state = self.inner.state.lock().await;
            let mut session = match state.session.take() {
                Some(mut existing) if existing.status() == SessionStatus::Configuring => {
                    existing.reconfigure(request)?;
                    existing
                }
                Some(existing) => {
                    let status = existing.status();
                    state.session = Some(existing);
                    return Err(NovaError::validation(
                        format!("An exam is already in progress ({status})"),
                        "Finish it with 'nova resume', or quit it first",
                    ));
                }
                None => ExamSession::new(request),
            };

            let ticket = match session.begin_generation(self.inner.config.require_topic) {
                Ok(ticket) => ticket,
                Err(e) => {
                    state.session = Some(session);
                    return Err(e);
                }
            };
            let generation = ExamRequestBuilder::build(session.config(), &self.inner.table);

            state.cancel = CancellationToken::new();
            state.view = View::ExamTaking;
            state.session = Some(session);
            self.publish(SessionEvent::status_changed(
                SessionStatus::Configuring,
                SessionStatus::Generating,
            ));
            self.persist(&state);
            (ticket, generation, state.cancel.clone())
        };

        let reply = tokio::select! {
            () = token.cancelled() => {
                debug!("Generation cancelled");
                return Err(NovaError::stale("generation"));
            }
            reply = self.inner.backend.generate(&generation.request) => reply,
        };
        let outcome = reply.and_then(|text| parse_exam(&text, &generation.blueprint));

        let mut state = self.inner.state.lock().await;
        // Abandoned while the reply was waiting for the lock.
        if token.is_cancelled() {
            debug!("Discarding generation reply for an abandoned session");
            return Err(NovaError::stale("generation"));
        }
        let Some(session) = state.session.as_mut() else {
            return Err(NovaError::stale("generation"));
        };
        let budget = time_budget_seconds(
            generation.blueprint.time_budget_seconds(),
            session.config().mode,
            self.inner.accommodations.extended_time,
            self.inner.config.extended_time_factor,
        );

        let result = session.apply_generation(ticket, outcome, budget);
        let status = session.status();
        match &result {
            Ok(()) => {
                self.publish(SessionEvent::status_changed(SessionStatus::Generating, status));
                self.start_countdown(&mut state);
            }
            Err(NovaError::StaleResponse { .. }) => return result,
            Err(e) => {
                self.publish(SessionEvent::error(e));
                self.publish(SessionEvent::status_changed(SessionStatus::Generating, status));
                state.view = View::ExamSetup;
            }
        }
        self.persist(&state);
        result
    }

    // ------------------------------------------------------------------------
    // Taking
    // ------------------------------------------------------------------------

    /// Records an answer for a question.
    pub async fn answer(&self, id: QuestionId, answer: Answer) -> Result<()> {
        self.with_session(|session| session.answer(id, answer)).await
    }

    /// Parses raw input against the question on screen and records it.
    pub async fn answer_current(&self, input: &str) -> Result<()> {
        self.with_session(|session| {
            let question = session.current_question().ok_or_else(|| {
                NovaError::validation("There is no question on screen", "Start an exam first")
            })?;
            let answer = Answer::parse_for(question, input)?;
            session.answer_current(answer)
        })
        .await
    }

    /// Moves to a question index. Out-of-range requests return `false`.
    pub async fn navigate(&self, index: i64) -> bool {
        self.with_session(|session| Ok(session.navigate_to(index)))
            .await
            .unwrap_or(false)
    }

    /// Moves to the next question.
    pub async fn next(&self) -> bool {
        self.with_session(|session| Ok(session.next()))
            .await
            .unwrap_or(false)
    }

    /// Moves to the previous question.
    pub async fn previous(&self) -> bool {
        self.with_session(|session| Ok(session.previous()))
            .await
            .unwrap_or(false)
    }

    /// Reveals the question on screen (practice mode).
    pub async fn reveal_current(&self) -> Result<()> {
        self.with_session(ExamSession::reveal_current).await
    }

    // ------------------------------------------------------------------------
    // Grading
    // ------------------------------------------------------------------------

    /// Submits the exam for grading, or retries a failed grading attempt.
    ///
    /// On success the session leaves the controller and its history entry
    /// is returned. On failure the session stays in `Grading` with its
    /// answers, ready for another call.
    pub async fn submit(&self) -> Result<HistoryEntry> {
        let (ticket, request, questions, token) = {
            let mut state = self.inner.state.lock().await;
            let session = state.session.as_mut().ok_or_else(|| {
                NovaError::validation("There is no exam to submit", "Start one with 'nova exam'")
            })?;
            let request = GradingRequestBuilder::build(session)?;
            let from = session.status();
            let ticket = session.begin_grading()?;
            let questions = session.questions().to_vec();

            Self::stop_countdown(&mut state);
            if from != SessionStatus::Grading {
                self.publish(SessionEvent::status_changed(from, SessionStatus::Grading));
            }
            self.persist(&state);
            (ticket, request, questions, state.cancel.clone())
        };

        let reply = tokio::select! {
            () = token.cancelled() => return Err(NovaError::stale("grading")),
            reply = self.inner.backend.generate(&request) => reply,
        };
        let outcome = reply.and_then(|text| parse_report(&text, &questions));

        let mut state = self.inner.state.lock().await;
        if token.is_cancelled() {
            return Err(NovaError::stale("grading"));
        }
        let Some(session) = state.session.as_mut() else {
            return Err(NovaError::stale("grading"));
        };
        match session.apply_grading(ticket, outcome) {
            Ok(entry) => {
                // The session is graded either way; a failed append must not
                // strand it in the controller.
                if let Err(e) = state.history.append(entry.clone()) {
                    warn!(session = %entry.id, error = %e, "Graded exam not added to history");
                    self.publish(SessionEvent::error(&e));
                }
                state.session = None;
                state.view = View::ExamResults;
                self.publish(SessionEvent::status_changed(
                    SessionStatus::Grading,
                    SessionStatus::Graded,
                ));
                self.publish(SessionEvent::graded(
                    entry.id.clone(),
                    entry.report.ap_score_estimate,
                ));
                self.persist(&state);
                Ok(entry)
            }
            Err(e @ NovaError::StaleResponse { .. }) => Err(e),
            Err(e) => {
                self.publish(SessionEvent::error(&e));
                self.persist(&state);
                Err(e)
            }
        }
    }

    // ------------------------------------------------------------------------
    // Abandon & Resume
    // ------------------------------------------------------------------------

    /// Discards the in-progress session. Stops the countdown and makes any
    /// outstanding response stale.
    pub async fn abandon(&self) -> Result<()> {
        let mut state = self.inner.state.lock().await;
        let session = state.session.as_mut().ok_or_else(|| {
            NovaError::validation("There is no exam to quit", "Start one with 'nova exam'")
        })?;
        let from = session.status();
        session.abandon()?;

        state.cancel.cancel();
        Self::stop_countdown(&mut state);
        state.session = None;
        state.view = View::Home;
        self.publish(SessionEvent::status_changed(from, SessionStatus::Abandoned));
        self.persist(&state);
        Ok(())
    }

    /// Picks up a restored session: restarts the countdown of an active
    /// timed session, or submits one whose time already ran out. Returns
    /// the session's status, if there is one.
    pub async fn resume(&self) -> Option<SessionStatus> {
        let mut state = self.inner.state.lock().await;
        let status = state.session.as_ref().map(ExamSession::status)?;
        if state.session.as_ref().is_some_and(ExamSession::is_expired) {
            info!("Restored session is out of time; submitting");
            self.publish(SessionEvent::TimeExpired);
            self.spawn_auto_submit();
        } else if status == SessionStatus::Active && state.countdown.is_none() {
            self.start_countdown(&mut state);
        }
        state.view = match status {
            SessionStatus::Configuring => View::ExamSetup,
            _ => View::ExamTaking,
        };
        self.persist(&state);
        Some(status)
    }

    // ------------------------------------------------------------------------
    // History
    // ------------------------------------------------------------------------

    /// All graded sessions, oldest first.
    pub async fn history(&self) -> Vec<HistoryEntry> {
        self.inner.state.lock().await.history.list().cloned().collect()
    }

    /// One graded session.
    pub async fn history_entry(&self, id: &str) -> Result<HistoryEntry> {
        self.inner.state.lock().await.history.get(id).cloned()
    }

    /// Empties the history.
    pub async fn clear_history(&self) {
        let mut state = self.inner.state.lock().await;
        state.history.clear();
        self.persist(&state);
    }

    // ------------------------------------------------------------------------
    // Internals
    // ------------------------------------------------------------------------

    async fn with_session<T>(&self, f: impl FnOnce(&mut ExamSession) -> Result<T>) -> Result<T> {
        let mut state = self.inner.state.lock().await;
        let session = state.session.as_mut().ok_or_else(|| {
            NovaError::validation("There is no exam in progress", "Start one with 'nova exam'")
        })?;
        let value = f(session)?;
        self.persist(&state);
        Ok(value)
    }

    fn start_countdown(&self, state: &mut State) {
        if !state.session.as_ref().is_some_and(ExamSession::is_counting_down) {
            return;
        }
        let weak: Weak<Inner> = Arc::downgrade(&self.inner);
        state.countdown = Some(Countdown::start(self.inner.tick_period, move || {
            let weak = weak.clone();
            async move {
                match weak.upgrade() {
                    Some(inner) => ExamController { inner }.on_tick().await,
                    None => ControlFlow::Break(()),
                }
            }
        }));
    }

    fn stop_countdown(state: &mut State) {
        if let Some(countdown) = state.countdown.take() {
            countdown.cancel();
        }
    }

    async fn on_tick(&self) -> ControlFlow<()> {
        let mut state = self.inner.state.lock().await;
        let Some(session) = state.session.as_mut() else {
            return ControlFlow::Break(());
        };
        match session.tick() {
            TickOutcome::Idle => ControlFlow::Break(()),
            TickOutcome::Ticked { time_left_seconds } => {
                self.publish(SessionEvent::tick(time_left_seconds));
                if time_left_seconds % TICK_SAVE_INTERVAL == 0 {
                    self.persist(&state);
                }
                ControlFlow::Continue(())
            }
            TickOutcome::Expired => {
                self.publish(SessionEvent::tick(0));
                self.publish(SessionEvent::TimeExpired);
                // The countdown task ends right after this returns.
                state.countdown = None;
                self.spawn_auto_submit();
                ControlFlow::Break(())
            }
        }
    }

    /// Submits on a separate task; the caller holds the state lock.
    fn spawn_auto_submit(&self) {
        let controller = self.clone();
        tokio::spawn(async move {
            if let Err(e) = controller.submit().await {
                warn!(error = %e, "Automatic submission failed");
            }
        });
    }

    fn publish(&self, event: SessionEvent) {
        debug!(event = event.event_name(), "Publishing session event");
        self.inner.events.send(event);
    }

    fn persist(&self, state: &State) {
        if let Some(store) = &self.inner.store {
            Self::snapshot_of(state).save(store);
        }
    }

    fn snapshot_of(state: &State) -> AppSnapshot {
        AppSnapshot {
            view: state.view,
            session: state.session.clone(),
            history: state.history.entries().to_vec(),
        }
    }
}
