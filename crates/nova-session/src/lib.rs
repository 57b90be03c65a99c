//! NovaScholar Session Core
//!
//! Generates AP practice exams through a language model, runs the timed
//! session, submits answers for grading and keeps the graded history.

pub mod config;
pub mod controller;
pub mod error;
pub mod events;
pub mod exam;
pub mod fetch;
pub mod generation;
pub mod grading;
pub mod history;
pub mod model;
pub mod session;
pub mod store;
pub mod structure;
pub mod timer;

pub use config::{Config, EndpointConfig, RetryConfig, CONFIG_FILE_NAME};
pub use controller::{ControllerBuilder, ExamController};
pub use error::{NovaError, Result, TransportErrorKind};
pub use events::{EventBroadcaster, SessionEvent};
pub use exam::{
    option_label, Answer, Difficulty, Exam, ExamMode, ExamRequestConfig, LengthClass, Question,
    QuestionBody, QuestionId, QuestionKind, QuestionPart, SourceDocument, DBQ_MAX_DOCUMENTS,
    DBQ_MIN_DOCUMENTS,
};
pub use fetch::{AttemptError, HttpTransport, RetryPolicy, RetryingClient, Transport};
pub use generation::{parse_exam, ExamRequestBuilder, GenerationRequest};
pub use grading::{
    parse_report, GradingReport, GradingRequestBuilder, QuestionAnalysis, QuestionStatus,
    MAX_AP_SCORE, MIN_AP_SCORE,
};
pub use history::{HistoryEntry, HistoryStore};
pub use model::{GeminiBackend, ModelBackend, ModelRequest};
pub use session::{ExamSession, RequestKind, RequestTicket, SessionStatus, TickOutcome};
pub use store::{Accommodation, Accommodations, AppSnapshot, FileStore, SettingsManager, View};
pub use structure::{ExamBlueprint, Section, StructureTable, SubjectStructure};
