//! Exam generation request builder and reply parser.

use serde::Deserialize;
use serde_json::{json, Value};
use tracing::{debug, warn};

use crate::error::{NovaError, Result};
use crate::exam::{
    option_label, Exam, ExamRequestConfig, Question, QuestionBody, QuestionKind, QuestionPart,
    SourceDocument,
};
use crate::model::{parse_structured, ModelRequest};
use crate::structure::{ExamBlueprint, StructureTable};

/// System instruction sent with every generation request.
const SYSTEM_INSTRUCTION: &str = "You are an expert AP exam question writer. \
Write practice questions that match official AP standards and format, each with a detailed explanation of the correct answer. \
Respond with a single JSON object that conforms to the response schema and contains no surrounding prose or Markdown. \
Write mathematics in LaTeX with every backslash escaped twice, inline math wrapped in \\\\( \\\\) and display math in \\\\[ \\\\].";

/// A generation request together with the blueprint it was built from.
#[derive(Debug, Clone, PartialEq)]
pub struct GenerationRequest {
    /// What to send to the model.
    pub request: ModelRequest,
    /// Section composition and time budget of the attempt.
    pub blueprint: ExamBlueprint,
}

/// Builds exam generation prompts.
#[derive(Debug, Clone, Copy, Default)]
pub struct ExamRequestBuilder;

impl ExamRequestBuilder {
    /// Builds the prompt and expected schema for `config`.
    ///
    /// Subjects missing from `table` use its generic fallback structure.
    #[must_use]
    pub fn build(config: &ExamRequestConfig, table: &StructureTable) -> GenerationRequest {
        let blueprint = table.blueprint(&config.subject, config.length_class);
        let prompt = Self::compose_prompt(config, &blueprint);
        debug!(
            subject = %config.subject,
            length = %config.length_class,
            questions = blueprint.total_questions(),
            prompt_chars = prompt.len(),
            "Built generation request"
        );

        GenerationRequest {
            request: ModelRequest {
                prompt,
                system_instruction: SYSTEM_INSTRUCTION.to_string(),
                expected_schema: exam_schema(),
            },
            blueprint,
        }
    }

    fn compose_prompt(config: &ExamRequestConfig, blueprint: &ExamBlueprint) -> String {
        let subject = config.subject.trim();
        let mut prompt = format!(
            "Generate an AP {subject} practice exam with exactly {total} questions in this order: {sections}.",
            total = blueprint.total_questions(),
            sections = blueprint.describe(),
        );

        let topic = config.topic_focus.trim();
        if !topic.is_empty() {
            prompt.push_str(&format!(" Focus on: {topic}."));
        }
        prompt.push_str(&format!(" Difficulty: {}.\n", config.difficulty));

        let kinds = [
            QuestionKind::Mcq,
            QuestionKind::Frq,
            QuestionKind::Saq,
            QuestionKind::Dbq,
            QuestionKind::Leq,
        ];
        for kind in kinds.into_iter().filter(|k| blueprint.count_of(*k) > 0) {
            prompt.push('\n');
            prompt.push_str(kind_instruction(kind, blueprint.history_style));
        }

        prompt.push_str(
            "\n\nSet \"type\" on every question to one of MCQ, FRQ, SAQ, DBQ or LEQ, \
             give each an explanation and a time estimate in minutes, \
             and return only the JSON object.",
        );
        prompt
    }
}

fn kind_instruction(kind: QuestionKind, history_style: bool) -> &'static str {
    match kind {
        QuestionKind::Mcq => {
            "For MCQs: provide exactly 4 options labelled A-D and set correct_answer to the letter of the one correct option."
        }
        QuestionKind::Frq if history_style => {
            "For FRQs: pose analytical questions that require historical evidence and reasoning."
        }
        QuestionKind::Frq => {
            "For FRQs: provide detailed questions appropriate to the subject (show-your-work problems for STEM, analytical questions for humanities) and put a scoring rubric in correct_answer."
        }
        QuestionKind::Saq => {
            "For SAQs: provide 3 parts labelled A, B and C, each with its own specific prompt."
        }
        QuestionKind::Dbq => {
            "For DBQs: include between 4 and 7 invented historical documents (7 is standard), each with a doc_number and a source citation, then pose a question requiring document analysis and outside knowledge."
        }
        QuestionKind::Leq => {
            "For LEQs: provide a clear historical prompt requiring a thesis-driven essay."
        }
    }
}

/// Response schema for generated exams.
fn exam_schema() -> Value {
    json!({
        "type": "OBJECT",
        "properties": {
            "exam_title": { "type": "STRING" },
            "subject": { "type": "STRING" },
            "questions": {
                "type": "ARRAY",
                "items": {
                    "type": "OBJECT",
                    "properties": {
                        "type": { "type": "STRING", "enum": ["MCQ", "FRQ", "SAQ", "DBQ", "LEQ"] },
                        "question_text": { "type": "STRING" },
                        "options": { "type": "ARRAY", "items": { "type": "STRING" } },
                        "correct_answer": { "type": "STRING" },
                        "explanation": { "type": "STRING" },
                        "time_estimate_minutes": { "type": "NUMBER" },
                        "parts": {
                            "type": "ARRAY",
                            "items": {
                                "type": "OBJECT",
                                "properties": {
                                    "label": { "type": "STRING" },
                                    "prompt": { "type": "STRING" }
                                },
                                "required": ["label", "prompt"]
                            }
                        },
                        "documents": {
                            "type": "ARRAY",
                            "items": {
                                "type": "OBJECT",
                                "properties": {
                                    "doc_number": { "type": "INTEGER" },
                                    "source": { "type": "STRING" },
                                    "content": { "type": "STRING" }
                                },
                                "required": ["doc_number", "source", "content"]
                            }
                        }
                    },
                    "required": ["type", "question_text", "explanation"]
                }
            }
        },
        "required": ["exam_title", "subject", "questions"]
    })
}

// ============================================================================
// Reply Parsing
// ============================================================================

#[derive(Debug, Deserialize)]
struct RawExam {
    exam_title: String,
    #[serde(default)]
    subject: String,
    questions: Vec<RawQuestion>,
}

#[derive(Debug, Deserialize)]
struct RawQuestion {
    #[serde(rename = "type")]
    kind: String,
    question_text: String,
    #[serde(default)]
    options: Vec<String>,
    #[serde(default)]
    correct_answer: Option<String>,
    #[serde(default)]
    explanation: String,
    #[serde(default)]
    time_estimate_minutes: Option<f64>,
    #[serde(default)]
    parts: Vec<QuestionPart>,
    #[serde(default)]
    documents: Vec<RawDocument>,
}

#[derive(Debug, Deserialize)]
struct RawDocument {
    doc_number: u32,
    source: String,
    content: String,
}

/// Parses generation reply text into a validated [`Exam`].
///
/// Question ids are assigned by position. Code fences around the JSON
/// are tolerated.
///
/// # Errors
///
/// Returns `NovaError::ContentValidationError` when the text is not the
/// expected shape, has zero questions, or any question is malformed.
pub fn parse_exam(text: &str, blueprint: &ExamBlueprint) -> Result<Exam> {
    let raw: RawExam = parse_structured(text)?;
    if raw.questions.is_empty() {
        return Err(NovaError::content("the generated exam has zero questions"));
    }

    let questions = raw
        .questions
        .into_iter()
        .enumerate()
        .map(|(index, q)| q.into_question(index))
        .collect::<Result<Vec<_>>>()?;

    let expected = usize::try_from(blueprint.total_questions()).unwrap_or(usize::MAX);
    if questions.len() != expected {
        warn!(
            expected,
            received = questions.len(),
            "Generated exam has a different question count than requested"
        );
    }

    Ok(Exam {
        title: raw.exam_title,
        subject: raw.subject,
        questions,
    })
}

impl RawQuestion {
    fn into_question(self, index: usize) -> Result<Question> {
        let number = index + 1;
        let id = u32::try_from(index)
            .map_err(|_| NovaError::content("the generated exam has too many questions"))?;
        let kind = QuestionKind::from_code(&self.kind).ok_or_else(|| {
            NovaError::content(format!(
                "question {number} has unknown type '{}'",
                self.kind
            ))
        })?;

        let model_answer = self
            .correct_answer
            .as_deref()
            .map(str::trim)
            .filter(|a| !a.is_empty())
            .map(str::to_string);

        let body = match kind {
            QuestionKind::Mcq => {
                let options: Vec<String> = self
                    .options
                    .iter()
                    .enumerate()
                    .map(|(i, text)| strip_option_label(text, i).to_string())
                    .collect();
                let given = model_answer.ok_or_else(|| {
                    NovaError::content(format!(
                        "multiple-choice question {number} has no correct answer"
                    ))
                })?;
                let correct_answer = resolve_correct_option(&given, &self.options, &options)
                    .ok_or_else(|| {
                        NovaError::content(format!(
                            "multiple-choice question {number} marks '{given}' correct, which matches none of its options"
                        ))
                    })?;
                QuestionBody::Mcq {
                    options,
                    correct_answer,
                }
            }
            QuestionKind::Frq => QuestionBody::Frq { model_answer },
            QuestionKind::Saq => QuestionBody::Saq {
                parts: self
                    .parts
                    .into_iter()
                    .map(|p| QuestionPart {
                        label: p.label.trim().trim_end_matches(['.', ')']).to_uppercase(),
                        prompt: p.prompt,
                    })
                    .collect(),
                model_answer,
            },
            QuestionKind::Dbq => QuestionBody::Dbq {
                documents: self
                    .documents
                    .into_iter()
                    .map(|d| SourceDocument {
                        number: d.doc_number,
                        source: d.source,
                        content: d.content,
                    })
                    .collect(),
                model_answer,
            },
            QuestionKind::Leq => QuestionBody::Leq { model_answer },
        };

        let question = Question {
            id,
            prompt: self.question_text,
            explanation: self.explanation,
            estimated_minutes: self.time_estimate_minutes.unwrap_or_default().max(0.0),
            body,
        };
        question.validate()?;
        Ok(question)
    }
}

/// Removes a leading "A) ", "A. " or "A: " that matches the option's
/// own position.
fn strip_option_label(text: &str, index: usize) -> &str {
    let trimmed = text.trim();
    let label = option_label(index);
    trimmed
        .strip_prefix(label.as_str())
        .and_then(|rest| {
            rest.strip_prefix(')')
                .or_else(|| rest.strip_prefix('.'))
                .or_else(|| rest.strip_prefix(':'))
        })
        .map_or(trimmed, str::trim_start)
}

/// Maps the model's correct answer onto an option label.
///
/// Accepts a bare letter, a letter followed by a delimiter, or the full
/// text of one option.
fn resolve_correct_option(given: &str, raw: &[String], stripped: &[String]) -> Option<String> {
    let upper = given.trim().to_uppercase();
    let letter = upper
        .strip_suffix([')', '.', ':'])
        .unwrap_or(&upper)
        .trim();
    if let Some(i) = (0..stripped.len()).find(|i| option_label(*i) == letter) {
        return Some(option_label(i));
    }

    let head = upper.split([')', '.', ':']).next().unwrap_or_default().trim();
    if upper.len() > head.len() {
        if let Some(i) = (0..stripped.len()).find(|i| option_label(*i) == head) {
            return Some(option_label(i));
        }
    }

    raw.iter()
        .zip(stripped)
        .position(|(r, s)| r.trim().eq_ignore_ascii_case(given.trim()) || s.eq_ignore_ascii_case(given.trim()))
        .map(option_label)
}
