//! Exam data model: request configuration, questions and answers.
//!
//! Questions are a tagged union over the five AP question kinds. Every
//! kind-specific decision (shape validation, answer checking) is an
//! exhaustive `match` on [`QuestionBody`], so adding a kind is a compile
//! error until every site handles it.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::error::{NovaError, Result};

/// Fewest source documents a document-based question may carry.
pub const DBQ_MIN_DOCUMENTS: usize = 4;

/// Most source documents a document-based question may carry.
pub const DBQ_MAX_DOCUMENTS: usize = 7;

/// Position of a question within its exam (0-based).
pub type QuestionId = u32;

// ============================================================================
// Request Configuration
// ============================================================================

/// Named length tier of an exam attempt.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LengthClass {
    /// Ten questions, twenty minutes.
    Quick,
    /// Twenty questions, forty minutes.
    #[default]
    Diagnostic,
    /// The subject's official structure and time limit.
    Full,
}

/// How the attempt is timed and whether answers may be revealed.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExamMode {
    /// A countdown runs and forces submission at zero.
    #[default]
    Timed,
    /// No countdown.
    Untimed,
    /// No countdown; answers may be revealed question by question.
    Practice,
}

/// Requested question difficulty.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Difficulty {
    /// Easier than the official exam.
    Easy,
    /// Official exam level.
    #[default]
    Medium,
    /// Harder than the official exam.
    Hard,
}

macro_rules! keyword_enum {
    ($ty:ident, $what:literal, { $($variant:ident => $kw:literal),+ $(,)? }) => {
        impl $ty {
            /// Returns the lowercase keyword for this value.
            #[must_use]
            pub const fn as_str(&self) -> &'static str {
                match self {
                    $(Self::$variant => $kw,)+
                }
            }
        }

        impl std::fmt::Display for $ty {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                f.write_str(self.as_str())
            }
        }

        impl std::str::FromStr for $ty {
            type Err = NovaError;

            fn from_str(s: &str) -> Result<Self> {
                match s.trim().to_lowercase().as_str() {
                    $($kw => Ok(Self::$variant),)+
                    other => Err(NovaError::validation(
                        format!("invalid {} '{other}'", $what),
                        format!("Use one of: {}", [$($kw),+].join(", ")),
                    )),
                }
            }
        }
    };
}

keyword_enum!(LengthClass, "length class", {
    Quick => "quick",
    Diagnostic => "diagnostic",
    Full => "full",
});

keyword_enum!(ExamMode, "exam mode", {
    Timed => "timed",
    Untimed => "untimed",
    Practice => "practice",
});

keyword_enum!(Difficulty, "difficulty", {
    Easy => "easy",
    Medium => "medium",
    Hard => "hard",
});

/// Everything the learner chose before generation. Immutable once submitted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExamRequestConfig {
    /// Subject name, e.g. "AP Biology".
    pub subject: String,
    /// Topic the questions should focus on. May be empty.
    #[serde(default)]
    pub topic_focus: String,
    /// Length tier.
    #[serde(default)]
    pub length_class: LengthClass,
    /// Timing mode.
    #[serde(default)]
    pub mode: ExamMode,
    /// Requested difficulty.
    #[serde(default)]
    pub difficulty: Difficulty,
}

impl ExamRequestConfig {
    /// Creates a config with default difficulty.
    #[must_use]
    pub fn new(
        subject: impl Into<String>,
        topic_focus: impl Into<String>,
        length_class: LengthClass,
        mode: ExamMode,
    ) -> Self {
        Self {
            subject: subject.into(),
            topic_focus: topic_focus.into(),
            length_class,
            mode,
            difficulty: Difficulty::default(),
        }
    }

    /// Sets the difficulty.
    #[must_use]
    pub const fn with_difficulty(mut self, difficulty: Difficulty) -> Self {
        self.difficulty = difficulty;
        self
    }

    /// Checks local preconditions before any network call.
    pub fn validate(&self, require_topic: bool) -> Result<()> {
        if self.subject.trim().is_empty() {
            return Err(NovaError::validation(
                "Please select or enter a subject",
                "Pass --subject, e.g. --subject \"AP Biology\"",
            ));
        }
        if require_topic && self.topic_focus.trim().is_empty() {
            return Err(NovaError::validation(
                "A topic focus is required",
                "Pass --topic, e.g. --topic \"Photosynthesis\"",
            ));
        }
        Ok(())
    }
}

// ============================================================================
// Questions
// ============================================================================

/// The five AP question kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum QuestionKind {
    /// Multiple choice.
    #[serde(rename = "MCQ")]
    Mcq,
    /// Free response.
    #[serde(rename = "FRQ")]
    Frq,
    /// Short answer (multi-part).
    #[serde(rename = "SAQ")]
    Saq,
    /// Document-based.
    #[serde(rename = "DBQ")]
    Dbq,
    /// Long essay.
    #[serde(rename = "LEQ")]
    Leq,
}

impl QuestionKind {
    /// Returns the conventional abbreviation ("MCQ", "FRQ", ...).
    #[must_use]
    pub const fn code(&self) -> &'static str {
        match self {
            Self::Mcq => "MCQ",
            Self::Frq => "FRQ",
            Self::Saq => "SAQ",
            Self::Dbq => "DBQ",
            Self::Leq => "LEQ",
        }
    }

    /// Returns the human label used in prompts and headings.
    #[must_use]
    pub const fn label(&self) -> &'static str {
        match self {
            Self::Mcq => "Multiple Choice Questions",
            Self::Frq => "Free Response Questions",
            Self::Saq => "Short Answer Questions",
            Self::Dbq => "Document-Based Question",
            Self::Leq => "Long Essay Question",
        }
    }

    /// Parses an abbreviation case-insensitively.
    #[must_use]
    pub fn from_code(code: &str) -> Option<Self> {
        match code.trim().to_uppercase().as_str() {
            "MCQ" => Some(Self::Mcq),
            "FRQ" => Some(Self::Frq),
            "SAQ" => Some(Self::Saq),
            "DBQ" => Some(Self::Dbq),
            "LEQ" => Some(Self::Leq),
            _ => None,
        }
    }
}

impl std::fmt::Display for QuestionKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.code())
    }
}

/// One labelled part of a short-answer question.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QuestionPart {
    /// Part label, e.g. "A".
    pub label: String,
    /// What the part asks.
    pub prompt: String,
}

/// An invented source document attached to a document-based question.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourceDocument {
    /// 1-based document number.
    pub number: u32,
    /// Source citation.
    pub source: String,
    /// Document text.
    pub content: String,
}

/// Kind-specific question content.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind")]
pub enum QuestionBody {
    /// Multiple choice with labelled options A, B, C, ...
    #[serde(rename = "MCQ", rename_all = "camelCase")]
    Mcq {
        /// Option texts in label order.
        options: Vec<String>,
        /// Label of the correct option.
        correct_answer: String,
    },
    /// Free response.
    #[serde(rename = "FRQ", rename_all = "camelCase")]
    Frq {
        /// Model answer or scoring rubric.
        model_answer: Option<String>,
    },
    /// Short answer in labelled parts.
    #[serde(rename = "SAQ", rename_all = "camelCase")]
    Saq {
        /// The parts, usually A, B and C.
        parts: Vec<QuestionPart>,
        /// Model answer or scoring rubric.
        model_answer: Option<String>,
    },
    /// Document-based question.
    #[serde(rename = "DBQ", rename_all = "camelCase")]
    Dbq {
        /// Source documents to analyse.
        documents: Vec<SourceDocument>,
        /// Model answer or scoring rubric.
        model_answer: Option<String>,
    },
    /// Long essay question.
    #[serde(rename = "LEQ", rename_all = "camelCase")]
    Leq {
        /// Model answer or scoring rubric.
        model_answer: Option<String>,
    },
}

/// A generated question. Immutable after generation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Question {
    /// Position in the exam (0-based).
    pub id: QuestionId,
    /// Question text; may embed math markup.
    pub prompt: String,
    /// Why the correct answer is correct.
    #[serde(default)]
    pub explanation: String,
    /// Model's estimate of minutes needed.
    #[serde(default)]
    pub estimated_minutes: f64,
    /// Kind-specific content.
    #[serde(flatten)]
    pub body: QuestionBody,
}

/// Returns the option label for a 0-based option index ("A", "B", ...).
#[must_use]
pub fn option_label(index: usize) -> String {
    u8::try_from(index)
        .ok()
        .filter(|i| *i < 26)
        .map_or_else(|| format!("#{}", index + 1), |i| char::from(b'A' + i).to_string())
}

impl Question {
    /// Returns the question kind.
    #[must_use]
    pub const fn kind(&self) -> QuestionKind {
        match self.body {
            QuestionBody::Mcq { .. } => QuestionKind::Mcq,
            QuestionBody::Frq { .. } => QuestionKind::Frq,
            QuestionBody::Saq { .. } => QuestionKind::Saq,
            QuestionBody::Dbq { .. } => QuestionKind::Dbq,
            QuestionBody::Leq { .. } => QuestionKind::Leq,
        }
    }

    /// Returns the correct option label or the model answer, if any.
    #[must_use]
    pub fn correct_answer(&self) -> Option<&str> {
        match &self.body {
            QuestionBody::Mcq { correct_answer, .. } => Some(correct_answer),
            QuestionBody::Frq { model_answer }
            | QuestionBody::Saq { model_answer, .. }
            | QuestionBody::Dbq { model_answer, .. }
            | QuestionBody::Leq { model_answer } => model_answer.as_deref(),
        }
    }

    /// Checks structural validity of generated content.
    pub fn validate(&self) -> Result<()> {
        let number = self.id + 1;
        if self.prompt.trim().is_empty() {
            return Err(NovaError::content(format!(
                "question {number} has empty question text"
            )));
        }

        match &self.body {
            QuestionBody::Mcq {
                options,
                correct_answer,
            } => {
                if options.len() < 2 {
                    return Err(NovaError::content(format!(
                        "multiple-choice question {number} has {} option(s)",
                        options.len()
                    )));
                }
                let in_range = (0..options.len()).any(|i| option_label(i) == *correct_answer);
                if !in_range {
                    return Err(NovaError::content(format!(
                        "multiple-choice question {number} marks '{correct_answer}' correct, which is not one of its options"
                    )));
                }
            }
            QuestionBody::Saq { parts, .. } => {
                if parts.is_empty() {
                    return Err(NovaError::content(format!(
                        "short-answer question {number} has no parts"
                    )));
                }
                let mut seen = std::collections::BTreeSet::new();
                for part in parts {
                    if !seen.insert(part.label.as_str()) {
                        return Err(NovaError::content(format!(
                            "short-answer question {number} repeats part '{}'",
                            part.label
                        )));
                    }
                }
            }
            QuestionBody::Dbq { documents, .. } => {
                if !(DBQ_MIN_DOCUMENTS..=DBQ_MAX_DOCUMENTS).contains(&documents.len()) {
                    return Err(NovaError::content(format!(
                        "document-based question {number} has {} document(s); expected {DBQ_MIN_DOCUMENTS} to {DBQ_MAX_DOCUMENTS}",
                        documents.len()
                    )));
                }
            }
            QuestionBody::Frq { .. } | QuestionBody::Leq { .. } => {}
        }

        Ok(())
    }

    /// Checks that an answer has the shape this question expects.
    pub fn check_answer(&self, answer: &Answer) -> Result<()> {
        let number = self.id + 1;
        match (&self.body, answer) {
            (QuestionBody::Mcq { options, .. }, Answer::Choice(label)) => {
                if (0..options.len()).any(|i| option_label(i) == *label) {
                    Ok(())
                } else {
                    Err(NovaError::validation(
                        format!("'{label}' is not an option of question {number}"),
                        format!(
                            "Choose one of {}",
                            (0..options.len()).map(option_label).collect::<Vec<_>>().join(", ")
                        ),
                    ))
                }
            }
            (QuestionBody::Saq { parts, .. }, Answer::Parts(given)) => {
                match given
                    .keys()
                    .find(|label| !parts.iter().any(|p| p.label == **label))
                {
                    Some(unknown) => Err(NovaError::validation(
                        format!("question {number} has no part '{unknown}'"),
                        format!(
                            "Answer parts {}",
                            parts.iter().map(|p| p.label.as_str()).collect::<Vec<_>>().join(", ")
                        ),
                    )),
                    None => Ok(()),
                }
            }
            (
                QuestionBody::Frq { .. } | QuestionBody::Dbq { .. } | QuestionBody::Leq { .. },
                Answer::Text(_),
            ) => Ok(()),
            (body, answer) => Err(NovaError::validation(
                format!(
                    "a {} answer does not fit {} question {number}",
                    answer.shape(),
                    Self::kind_of(body)
                ),
                "Use an option letter for MCQ, 'A=..;B=..' for SAQ, free text otherwise",
            )),
        }
    }

    /// Returns `Some(true)` when an MCQ answer picks the correct option.
    ///
    /// Returns `None` for non-MCQ questions, which only the model can grade.
    #[must_use]
    pub fn is_correct_choice(&self, answer: Option<&Answer>) -> Option<bool> {
        match &self.body {
            QuestionBody::Mcq { correct_answer, .. } => Some(matches!(
                answer,
                Some(Answer::Choice(label)) if label == correct_answer
            )),
            QuestionBody::Frq { .. }
            | QuestionBody::Saq { .. }
            | QuestionBody::Dbq { .. }
            | QuestionBody::Leq { .. } => None,
        }
    }

    const fn kind_of(body: &QuestionBody) -> QuestionKind {
        match body {
            QuestionBody::Mcq { .. } => QuestionKind::Mcq,
            QuestionBody::Frq { .. } => QuestionKind::Frq,
            QuestionBody::Saq { .. } => QuestionKind::Saq,
            QuestionBody::Dbq { .. } => QuestionKind::Dbq,
            QuestionBody::Leq { .. } => QuestionKind::Leq,
        }
    }
}

/// A generated exam.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Exam {
    /// Title chosen by the model.
    pub title: String,
    /// Subject echoed by the model.
    pub subject: String,
    /// Questions in order; ids equal positions.
    pub questions: Vec<Question>,
}

// ============================================================================
// Answers
// ============================================================================

/// A learner's answer to one question.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", content = "value", rename_all = "snake_case")]
pub enum Answer {
    /// Option label for a multiple-choice question.
    Choice(String),
    /// Free text.
    Text(String),
    /// Per-part text for a multi-part question, keyed by part label.
    Parts(BTreeMap<String, String>),
}

impl Answer {
    /// Returns a short name of the answer shape.
    #[must_use]
    pub const fn shape(&self) -> &'static str {
        match self {
            Self::Choice(_) => "choice",
            Self::Text(_) => "text",
            Self::Parts(_) => "multi-part",
        }
    }

    /// Parses raw learner input into the shape the question expects.
    ///
    /// MCQ input is an option letter; SAQ input is `A=...;B=...`; anything
    /// else is taken as free text.
    pub fn parse_for(question: &Question, input: &str) -> Result<Self> {
        let input = input.trim();
        if input.is_empty() {
            return Err(NovaError::validation(
                "Empty answer",
                "Type an answer after 'a', e.g. 'a B'",
            ));
        }

        let answer = match &question.body {
            QuestionBody::Mcq { .. } => Self::Choice(input.to_uppercase()),
            QuestionBody::Saq { .. } => {
                let mut parts = BTreeMap::new();
                for piece in input.split(';').filter(|p| !p.trim().is_empty()) {
                    let (label, text) = piece.split_once('=').ok_or_else(|| {
                        NovaError::validation(
                            format!("'{}' is not in LABEL=answer form", piece.trim()),
                            "Answer short-answer parts as 'A=...;B=...;C=...'",
                        )
                    })?;
                    parts.insert(label.trim().to_uppercase(), text.trim().to_string());
                }
                Self::Parts(parts)
            }
            QuestionBody::Frq { .. } | QuestionBody::Dbq { .. } | QuestionBody::Leq { .. } => {
                Self::Text(input.to_string())
            }
        };

        question.check_answer(&answer)?;
        Ok(answer)
    }
}

impl std::fmt::Display for Answer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Choice(label) => f.write_str(label),
            Self::Text(text) => f.write_str(text),
            Self::Parts(parts) => {
                let joined = parts
                    .iter()
                    .map(|(label, text)| format!("{label}: {text}"))
                    .collect::<Vec<_>>()
                    .join("; ");
                f.write_str(&joined)
            }
        }
    }
}
