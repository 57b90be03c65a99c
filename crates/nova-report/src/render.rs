//! Terminal rendering of questions.
//!
//! [`QuestionRenderer`] matches exhaustively on the question kind, so a new
//! kind does not compile until it has a rendering. Math markup is flattened
//! to plain text first.

use std::fmt::Write;

use once_cell::sync::Lazy;
use regex::Regex;

use nova_session::{option_label, Accommodations, Answer, ExamSession, Question, QuestionBody};

use crate::{expected_answer, format_answer, format_clock};

static INLINE_MATH: Lazy<Option<Regex>> = Lazy::new(|| Regex::new(r"\\\((.*?)\\\)").ok());
static DISPLAY_MATH: Lazy<Option<Regex>> = Lazy::new(|| Regex::new(r"(?s)\\\[(.*?)\\\]").ok());
static FRAC: Lazy<Option<Regex>> =
    Lazy::new(|| Regex::new(r"\\frac\{([^{}]*)\}\{([^{}]*)\}").ok());
static SQRT: Lazy<Option<Regex>> = Lazy::new(|| Regex::new(r"\\sqrt\{([^{}]*)\}").ok());
static TEXT: Lazy<Option<Regex>> = Lazy::new(|| Regex::new(r"\\text\{([^{}]*)\}").ok());
static SUPERSCRIPT: Lazy<Option<Regex>> = Lazy::new(|| Regex::new(r"\^\{([^{}]*)\}").ok());
static SUBSCRIPT: Lazy<Option<Regex>> = Lazy::new(|| Regex::new(r"_\{([^{}]*)\}").ok());

/// Innermost-first passes over nested braces.
const MAX_NESTING: usize = 8;

fn replace_all(re: &Lazy<Option<Regex>>, text: &str, with: &str) -> String {
    match re.as_ref() {
        Some(re) => re.replace_all(text, with).into_owned(),
        None => text.to_string(),
    }
}

/// Flattens LaTeX markup for plain-text display.
///
/// # Examples
///
/// ```
/// use nova_report::render::flatten_math;
///
/// assert_eq!(flatten_math(r"\(\frac{1}{2}\)"), "$(1)/(2)$");
/// assert_eq!(flatten_math(r"\sqrt{x^{2}}"), "√(x^(2))");
/// ```
#[must_use]
pub fn flatten_math(text: &str) -> String {
    let mut out = replace_all(&DISPLAY_MATH, text, "$$$$${1}$$$$");
    out = replace_all(&INLINE_MATH, &out, "$$${1}$$");
    for _ in 0..MAX_NESTING {
        let before = out.clone();
        out = replace_all(&TEXT, &out, "${1}");
        out = replace_all(&SUPERSCRIPT, &out, "^(${1})");
        out = replace_all(&SUBSCRIPT, &out, "_(${1})");
        out = replace_all(&SQRT, &out, "√(${1})");
        out = replace_all(&FRAC, &out, "(${1})/(${2})");
        if out == before {
            break;
        }
    }
    out
}

/// Presentation choices derived from accommodations.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RenderStyle {
    /// Blank line between blocks (large text, dyslexia font).
    pub spacious: bool,
    /// Stronger selection markers (high contrast).
    pub emphasis: bool,
}

impl RenderStyle {
    /// Maps accommodation flags to a terminal style.
    #[must_use]
    pub const fn from_accommodations(accommodations: &Accommodations) -> Self {
        Self {
            spacious: accommodations.large_text || accommodations.dyslexia_font,
            emphasis: accommodations.high_contrast,
        }
    }

    const fn selected_marker(self) -> &'static str {
        if self.emphasis {
            ">>"
        } else {
            " *"
        }
    }

    const fn separator(self) -> &'static str {
        if self.spacious {
            "\n\n"
        } else {
            "\n"
        }
    }
}

/// Renders questions as terminal text.
#[derive(Debug, Clone, Copy, Default)]
pub struct QuestionRenderer {
    style: RenderStyle,
}

impl QuestionRenderer {
    /// Creates a renderer with the given style.
    #[must_use]
    pub const fn new(style: RenderStyle) -> Self {
        Self { style }
    }

    /// Renders one question with the learner's answer, and the expected
    /// answer and explanation when `reveal` is set.
    #[must_use]
    pub fn render(
        &self,
        question: &Question,
        total: usize,
        answer: Option<&Answer>,
        reveal: bool,
    ) -> String {
        let mut blocks = vec![
            format!(
                "Question {} of {total} [{}]",
                question.id + 1,
                question.kind().label()
            ),
            flatten_math(&question.prompt),
        ];

        match &question.body {
            QuestionBody::Mcq { options, .. } => {
                let selected = match answer {
                    Some(Answer::Choice(label)) => Some(label.as_str()),
                    _ => None,
                };
                let lines: Vec<String> = options
                    .iter()
                    .enumerate()
                    .map(|(i, option)| {
                        let label = option_label(i);
                        let marker = if selected == Some(label.as_str()) {
                            self.style.selected_marker()
                        } else {
                            "  "
                        };
                        format!("{marker} {label}) {}", flatten_math(option))
                    })
                    .collect();
                blocks.push(lines.join("\n"));
            }
            QuestionBody::Saq { parts, .. } => {
                let given = match answer {
                    Some(Answer::Parts(given)) => Some(given),
                    _ => None,
                };
                let lines: Vec<String> = parts
                    .iter()
                    .map(|part| {
                        let mut line = format!("  ({}) {}", part.label, flatten_math(&part.prompt));
                        if let Some(text) = given.and_then(|g| g.get(&part.label)) {
                            let _ = write!(line, "\n      -> {text}");
                        }
                        line
                    })
                    .collect();
                blocks.push(lines.join("\n"));
            }
            QuestionBody::Dbq { documents, .. } => {
                for doc in documents {
                    blocks.push(format!(
                        "  Document {} ({})\n    {}",
                        doc.number,
                        doc.source,
                        doc.content.replace('\n', "\n    ")
                    ));
                }
                blocks.push(format!("Your answer: {}", format_answer(answer)));
            }
            QuestionBody::Frq { .. } | QuestionBody::Leq { .. } => {
                blocks.push(format!("Your answer: {}", format_answer(answer)));
            }
        }

        if reveal {
            if let Some(expected) = expected_answer(question) {
                blocks.push(format!("Answer: {}", flatten_math(&expected)));
            }
            if !question.explanation.is_empty() {
                blocks.push(format!("Explanation: {}", flatten_math(&question.explanation)));
            }
        }

        blocks.join(self.style.separator())
    }
}

/// One-line progress summary for an exam in progress.
#[must_use]
pub fn status_line(session: &ExamSession) -> String {
    let total = session.questions().len();
    let clock = session
        .time_left_seconds()
        .map_or_else(|| "untimed".to_string(), |s| format!("{} left", format_clock(s)));
    format!(
        "Q {}/{total} | answered {}/{total} | {clock}",
        session.current_index() + 1,
        session.answered_count(),
    )
}
