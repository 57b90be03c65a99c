//! Grading request builder, report types and reply parser.

use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use tracing::debug;

use crate::error::{NovaError, Result};
use crate::exam::{Answer, Question, QuestionBody, QuestionId};
use crate::model::{parse_structured, ModelRequest};
use crate::session::ExamSession;

/// System instruction sent with every grading request.
const SYSTEM_INSTRUCTION: &str = "You are an experienced AP exam reader. \
Grade the student's answers against the provided correct answers and rubrics using official AP scoring standards. \
Respond with a single JSON object that conforms to the response schema and contains no surrounding prose or Markdown.";

/// Lowest AP score.
pub const MIN_AP_SCORE: u8 = 1;
/// Highest AP score.
pub const MAX_AP_SCORE: u8 = 5;

/// Per-question verdict.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum QuestionStatus {
    /// Fully correct.
    Correct,
    /// Wrong or unanswered.
    Incorrect,
    /// Partially correct.
    Partial,
}

impl QuestionStatus {
    fn parse(s: &str) -> Option<Self> {
        match s.trim().to_lowercase().as_str() {
            "correct" => Some(Self::Correct),
            "incorrect" => Some(Self::Incorrect),
            "partial" => Some(Self::Partial),
            _ => None,
        }
    }
}

impl std::fmt::Display for QuestionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Correct => write!(f, "Correct"),
            Self::Incorrect => write!(f, "Incorrect"),
            Self::Partial => write!(f, "Partial"),
        }
    }
}

/// The model's verdict on one question.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QuestionAnalysis {
    /// Question the verdict is about.
    pub question_id: QuestionId,
    /// Verdict.
    pub status: QuestionStatus,
    /// Short explanation.
    pub note: String,
}

/// The model's grade for a whole session. Immutable once attached.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GradingReport {
    /// Estimated AP score, 1 to 5.
    pub ap_score_estimate: u8,
    /// "correct/total".
    pub raw_score: String,
    /// Overall feedback.
    pub feedback: String,
    /// Topic labels the learner handled well.
    pub strengths: Vec<String>,
    /// Topic labels to review.
    pub weaknesses: Vec<String>,
    /// One verdict per question, ordered by question id.
    pub per_question_analysis: Vec<QuestionAnalysis>,
}

impl GradingReport {
    /// Returns the verdict for a question, if any.
    #[must_use]
    pub fn analysis_for(&self, id: QuestionId) -> Option<&QuestionAnalysis> {
        self.per_question_analysis.iter().find(|a| a.question_id == id)
    }

    /// Counts verdicts with the given status.
    #[must_use]
    pub fn count(&self, status: QuestionStatus) -> usize {
        self.per_question_analysis
            .iter()
            .filter(|a| a.status == status)
            .count()
    }
}

/// Builds grading prompts.
#[derive(Debug, Clone, Copy, Default)]
pub struct GradingRequestBuilder;

impl GradingRequestBuilder {
    /// Builds the grading prompt for a session's questions and answers.
    ///
    /// # Errors
    ///
    /// Returns `NovaError::ValidationError` when the session has no
    /// questions to grade.
    pub fn build(session: &ExamSession) -> Result<ModelRequest> {
        if session.questions().is_empty() {
            return Err(NovaError::validation(
                "There is nothing to grade: the session has no questions",
                "Start an exam with 'nova exam' first",
            ));
        }

        let payload = grading_payload(session);
        let rendered = serde_json::to_string_pretty(&payload)?;
        let total = session.questions().len();
        let prompt = format!(
            "Grade this AP {subject} practice exam.\n\n\
             Each question below includes its correct answer or scoring rubric. \
             \"answers\" maps question_id to the student's answer; a question missing from \"answers\" was left blank and is Incorrect.\n\n\
             {rendered}\n\n\
             Return ap_score_estimate as an integer from {MIN_AP_SCORE} to {MAX_AP_SCORE}, \
             raw_score as \"correct/{total}\", overall feedback, strengths and weaknesses as short topic labels, \
             and exactly one per_question_analysis entry for each of the {total} questions \
             with status Correct, Incorrect or Partial.",
            subject = session.config().subject.trim(),
        );
        debug!(
            questions = total,
            answered = session.answers().len(),
            prompt_chars = prompt.len(),
            "Built grading request"
        );

        Ok(ModelRequest {
            prompt,
            system_instruction: SYSTEM_INSTRUCTION.to_string(),
            expected_schema: report_schema(),
        })
    }
}

/// The structured exam-and-answers block embedded in the grading prompt.
///
/// Unanswered questions have no entry in `answers`.
#[must_use]
pub fn grading_payload(session: &ExamSession) -> Value {
    let questions: Vec<Value> = session.questions().iter().map(question_value).collect();
    let answers: Map<String, Value> = session
        .answers()
        .iter()
        .map(|(id, answer)| (id.to_string(), answer_value(answer)))
        .collect();

    json!({
        "subject": session.config().subject,
        "topic_focus": session.config().topic_focus,
        "questions": questions,
        "answers": answers,
    })
}

fn question_value(question: &Question) -> Value {
    let mut value = json!({
        "question_id": question.id,
        "type": question.kind().code(),
        "question_text": question.prompt,
    });
    match &question.body {
        QuestionBody::Mcq {
            options,
            correct_answer,
        } => {
            value["options"] = json!(options);
            value["correct_answer"] = json!(correct_answer);
        }
        QuestionBody::Saq {
            parts,
            model_answer,
        } => {
            value["parts"] = json!(parts);
            value["rubric"] = json!(model_answer);
        }
        QuestionBody::Dbq {
            documents,
            model_answer,
        } => {
            value["documents"] = json!(documents);
            value["rubric"] = json!(model_answer);
        }
        QuestionBody::Frq { model_answer } | QuestionBody::Leq { model_answer } => {
            value["rubric"] = json!(model_answer);
        }
    }
    if !question.explanation.is_empty() {
        value["explanation"] = json!(question.explanation);
    }
    value
}

fn answer_value(answer: &Answer) -> Value {
    match answer {
        Answer::Choice(label) => json!(label),
        Answer::Text(text) => json!(text),
        Answer::Parts(parts) => json!(parts),
    }
}

/// Response schema for grading reports.
fn report_schema() -> Value {
    json!({
        "type": "OBJECT",
        "properties": {
            "ap_score_estimate": { "type": "INTEGER" },
            "raw_score": { "type": "STRING" },
            "feedback": { "type": "STRING" },
            "strengths": { "type": "ARRAY", "items": { "type": "STRING" } },
            "weaknesses": { "type": "ARRAY", "items": { "type": "STRING" } },
            "per_question_analysis": {
                "type": "ARRAY",
                "items": {
                    "type": "OBJECT",
                    "properties": {
                        "question_id": { "type": "INTEGER" },
                        "status": { "type": "STRING", "enum": ["Correct", "Incorrect", "Partial"] },
                        "note": { "type": "STRING" }
                    },
                    "required": ["question_id", "status"]
                }
            }
        },
        "required": ["ap_score_estimate", "raw_score", "feedback", "per_question_analysis"]
    })
}

// ============================================================================
// Reply Parsing
// ============================================================================

#[derive(Debug, Deserialize)]
struct RawReport {
    ap_score_estimate: i64,
    raw_score: String,
    feedback: String,
    #[serde(default)]
    strengths: Vec<String>,
    #[serde(default)]
    weaknesses: Vec<String>,
    per_question_analysis: Vec<RawAnalysis>,
}

#[derive(Debug, Deserialize)]
struct RawAnalysis {
    question_id: i64,
    status: String,
    #[serde(default)]
    note: String,
}

/// Parses grading reply text into a validated [`GradingReport`].
///
/// # Errors
///
/// Returns `NovaError::ContentValidationError` when the reply is not the
/// expected shape, the score is outside 1 to 5, a status is unknown, the
/// raw score is not "n/m", or the analysis does not cover each question
/// exactly once.
pub fn parse_report(text: &str, questions: &[Question]) -> Result<GradingReport> {
    let raw: RawReport = parse_structured(text)?;

    let ap_score_estimate = u8::try_from(raw.ap_score_estimate)
        .ok()
        .filter(|s| (MIN_AP_SCORE..=MAX_AP_SCORE).contains(s))
        .ok_or_else(|| {
            NovaError::content(format!(
                "AP score estimate {} is outside {MIN_AP_SCORE}-{MAX_AP_SCORE}",
                raw.ap_score_estimate
            ))
        })?;

    let raw_score = normalize_raw_score(&raw.raw_score)?;

    let mut seen = BTreeSet::new();
    let mut per_question_analysis = Vec::with_capacity(raw.per_question_analysis.len());
    for entry in raw.per_question_analysis {
        let question_id = u32::try_from(entry.question_id)
            .ok()
            .filter(|id| questions.iter().any(|q| q.id == *id))
            .ok_or_else(|| {
                NovaError::content(format!(
                    "analysis refers to question {}, which is not in the exam",
                    entry.question_id
                ))
            })?;
        if !seen.insert(question_id) {
            return Err(NovaError::content(format!(
                "analysis lists question {question_id} more than once"
            )));
        }
        let status = QuestionStatus::parse(&entry.status).ok_or_else(|| {
            NovaError::content(format!(
                "question {question_id} has status '{}'; expected Correct, Incorrect or Partial",
                entry.status
            ))
        })?;
        per_question_analysis.push(QuestionAnalysis {
            question_id,
            status,
            note: entry.note,
        });
    }

    if per_question_analysis.len() != questions.len() {
        return Err(NovaError::content(format!(
            "analysis covers {} of {} questions",
            per_question_analysis.len(),
            questions.len()
        )));
    }
    per_question_analysis.sort_by_key(|a| a.question_id);

    Ok(GradingReport {
        ap_score_estimate,
        raw_score,
        feedback: raw.feedback,
        strengths: dedup_labels(raw.strengths),
        weaknesses: dedup_labels(raw.weaknesses),
        per_question_analysis,
    })
}

fn normalize_raw_score(raw: &str) -> Result<String> {
    let parsed = raw.split_once('/').and_then(|(correct, total)| {
        let correct: u32 = correct.trim().parse().ok()?;
        let total: u32 = total.trim().parse().ok()?;
        (correct <= total).then_some((correct, total))
    });
    parsed
        .map(|(correct, total)| format!("{correct}/{total}"))
        .ok_or_else(|| NovaError::content(format!("raw score '{raw}' is not in correct/total form")))
}

fn dedup_labels(labels: Vec<String>) -> Vec<String> {
    let mut seen = BTreeSet::new();
    labels
        .into_iter()
        .map(|l| l.trim().to_string())
        .filter(|l| !l.is_empty() && seen.insert(l.to_lowercase()))
        .collect()
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
pub(crate) mod tests {
    use super::*;
    use crate::exam::tests::{mcq, saq};
    use crate::exam::{ExamMode, ExamRequestConfig, LengthClass};

    pub fn report_reply(question_count: u32) -> String {
        let analysis: Vec<Value> = (0..question_count)
            .map(|id| {
                json!({
                    "question_id": id,
                    "status": if id % 2 == 0 { "Correct" } else { "Incorrect" },
                    "note": format!("note {id}")
                })
            })
            .collect();
        json!({
            "ap_score_estimate": 4,
            "raw_score": format!("{}/{question_count}", question_count.div_ceil(2)),
            "feedback": "Strong grasp of the light reactions.",
            "strengths": ["Light reactions", "light reactions", "Calvin cycle"],
            "weaknesses": ["Photorespiration"],
            "per_question_analysis": analysis
        })
        .to_string()
    }

    fn active_session() -> ExamSession {
        let config = ExamRequestConfig::new(
            "AP Biology",
            "Photosynthesis",
            LengthClass::Quick,
            ExamMode::Untimed,
        );
        ExamSession::with_questions(config, vec![mcq(0, "A"), saq(1), mcq(2, "C")])
    }

    #[test]
    fn test_payload_includes_only_answered_questions() {
        let mut session = active_session();
        session.answer(0, Answer::Choice("A".to_string())).unwrap();
        session.answer(2, Answer::Choice("D".to_string())).unwrap();

        let payload = grading_payload(&session);
        let answers = payload["answers"].as_object().unwrap();
        assert_eq!(answers.len(), 2);
        assert_eq!(answers["0"], "A");
        assert_eq!(answers["2"], "D");
        assert!(!answers.contains_key("1"));
        assert_eq!(payload["questions"].as_array().unwrap().len(), 3);
        assert_eq!(payload["questions"][0]["correct_answer"], "A");
        assert_eq!(payload["questions"][1]["type"], "SAQ");
    }

    #[test]
    fn test_build_prompt_mentions_score_range_and_statuses() {
        let request = GradingRequestBuilder::build(&active_session()).unwrap();
        assert!(request.prompt.contains("from 1 to 5"));
        assert!(request.prompt.contains("Correct, Incorrect or Partial"));
        assert!(request.prompt.contains("\"correct/3\""));
        assert_eq!(
            request.expected_schema["properties"]["per_question_analysis"]["items"]["properties"]
                ["status"]["enum"]
                .as_array()
                .unwrap()
                .len(),
            3
        );
    }

    #[test]
    fn test_round_trip_report_covers_every_question() {
        let session = active_session();
        let _request = GradingRequestBuilder::build(&session).unwrap();
        let report = parse_report(&report_reply(3), session.questions()).unwrap();

        assert_eq!(report.per_question_analysis.len(), session.questions().len());
        assert!(report.per_question_analysis.iter().all(|a| matches!(
            a.status,
            QuestionStatus::Correct | QuestionStatus::Incorrect | QuestionStatus::Partial
        )));
        assert_eq!(report.ap_score_estimate, 4);
        assert_eq!(report.raw_score, "2/3");
        assert_eq!(report.strengths, vec!["Light reactions", "Calvin cycle"]);
        assert_eq!(report.count(QuestionStatus::Correct), 2);
        assert_eq!(report.analysis_for(1).unwrap().note, "note 1");
    }

    #[test]
    fn test_parse_rejects_out_of_range_score() {
        let questions = active_session().questions().to_vec();
        let mut reply: Value = serde_json::from_str(&report_reply(3)).unwrap();
        reply["ap_score_estimate"] = json!(6);
        let err = parse_report(&reply.to_string(), &questions).unwrap_err();
        assert!(err.to_string().contains("outside 1-5"));
    }

    #[test]
    fn test_parse_rejects_unknown_status_and_missing_coverage() {
        let questions = active_session().questions().to_vec();

        let mut reply: Value = serde_json::from_str(&report_reply(3)).unwrap();
        reply["per_question_analysis"][1]["status"] = json!("Excellent");
        assert!(parse_report(&reply.to_string(), &questions).is_err());

        let short = report_reply(2);
        let err = parse_report(&short, &questions).unwrap_err();
        assert!(err.to_string().contains("covers 2 of 3"));

        let mut dup: Value = serde_json::from_str(&report_reply(3)).unwrap();
        dup["per_question_analysis"][2]["question_id"] = json!(0);
        assert!(parse_report(&dup.to_string(), &questions)
            .unwrap_err()
            .to_string()
            .contains("more than once"));
    }

    #[test]
    fn test_parse_accepts_lowercase_status_and_fences() {
        let questions = active_session().questions().to_vec();
        let mut reply: Value = serde_json::from_str(&report_reply(3)).unwrap();
        reply["per_question_analysis"][1]["status"] = json!("partial");
        let fenced = format!("```json\n{reply}\n```");
        let report = parse_report(&fenced, &questions).unwrap();
        assert_eq!(report.per_question_analysis[1].status, QuestionStatus::Partial);
    }

    #[test]
    fn test_normalize_raw_score() {
        assert_eq!(normalize_raw_score(" 7 / 10 ").unwrap(), "7/10");
        assert!(normalize_raw_score("70%").is_err());
        assert!(normalize_raw_score("11/10").is_err());
    }
}
