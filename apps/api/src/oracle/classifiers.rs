//! Typed classifier calls. Each function owns its prompt text, its response
//! schema, and the clamping/validation the Dialogue Controller relies on —
//! the controller never sees a raw oracle response.

use serde::{Deserialize, Serialize};

use crate::catalog::{CandidateMatch, FactSet};

use super::{prompts::JSON_ONLY_SYSTEM, OracleAdapter, OracleError};

#[derive(Debug, Clone, Copy, Deserialize)]
pub struct IntroExtract {
    pub semester: Option<u8>,
    pub progress_percent: Option<u8>,
}

impl IntroExtract {
    fn clamp(self) -> Self {
        Self {
            semester: self.semester.filter(|s| (1..=20).contains(s)),
            progress_percent: self.progress_percent.filter(|p| (0..=100).contains(p)),
        }
    }
}

pub async fn intro_extract(
    oracle: &OracleAdapter,
    session_id: &str,
    user_text: &str,
) -> Result<IntroExtract, OracleError> {
    let prompt = format!(
        "Extract the student's semester (1-20) and study progress percent (0-100) from this \
         introductory reply. Respond as JSON: {{\"semester\": number|null, \"progress_percent\": number|null}}.\n\n\
         Reply: {user_text}"
    );
    let result: IntroExtract = oracle
        .call_json(session_id, "intro_extract", "await_semester_progress", JSON_ONLY_SYSTEM, &prompt)
        .await?;
    Ok(result.clamp())
}

#[derive(Debug, Clone, Deserialize)]
pub struct PickPhaseQuestion {
    pub question: String,
    #[serde(default)]
    pub rationale: String,
}

/// Picks the next question for `phase_name` from `pool`. If the oracle
/// returns an empty question or one already present in `already_asked`, the
/// caller must fall back to a random unused pool element — this function
/// only performs the oracle call and basic validation.
pub async fn pick_phase_question(
    oracle: &OracleAdapter,
    session_id: &str,
    phase_name: &str,
    pool: &[String],
    already_asked: &[String],
) -> Result<PickPhaseQuestion, OracleError> {
    let prompt = format!(
        "Pick the single best next question for the \"{phase_name}\" phase from this pool, \
         avoiding anything already asked. Respond as JSON: {{\"question\": string, \"rationale\": string}}.\n\n\
         Pool: {pool:?}\nAlready asked: {already_asked:?}"
    );
    oracle
        .call_json(session_id, "pick_phase_question", phase_name, JSON_ONLY_SYSTEM, &prompt)
        .await
}

#[derive(Debug, Clone, Copy, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum TemporalHint {
    Past,
    Future,
    Mixed,
    Unknown,
}

#[derive(Debug, Clone, Copy, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum WroteHint {
    High,
    Medium,
    Low,
}

#[derive(Debug, Clone, Deserialize)]
pub struct DetectEntities {
    pub found_area: Option<String>,
    pub found_tl_text: Option<String>,
    #[serde(default)]
    pub found_tl_list: Vec<String>,
    #[serde(default)]
    pub mentions_thesis: bool,
    pub thesis_topic: Option<String>,
    pub temporal_hint: TemporalHint,
    pub wrote_prob: Option<f64>,
    pub wrote_hint: Option<WroteHint>,
}

pub async fn detect_entities(
    oracle: &OracleAdapter,
    session_id: &str,
    phase: &str,
    user_text: &str,
    history: &[String],
    strict_current: bool,
) -> Result<DetectEntities, OracleError> {
    let prompt = format!(
        "Detect course mentions in this student reply. strict_current={strict_current}. \
         Respond as JSON with fields found_area, found_tl_text, found_tl_list, mentions_thesis, \
         thesis_topic, temporal_hint (past|future|mixed|unknown), wrote_prob (0..1 or null), \
         wrote_hint (high|medium|low or null).\n\n\
         History: {history:?}\nReply: {user_text}"
    );
    oracle.call_json(session_id, "detect_entities", phase, JSON_ONLY_SYSTEM, &prompt).await
}

#[derive(Debug, Clone, Copy, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Intent {
    Abort,
    Continue,
}

#[derive(Debug, Clone, Copy, Deserialize)]
pub struct ControlIntent {
    pub intent: Intent,
}

pub async fn control_intent(
    oracle: &OracleAdapter,
    session_id: &str,
    phase: &str,
    user_text: &str,
) -> Result<ControlIntent, OracleError> {
    let prompt = format!(
        "Decide whether the student wants to abort the interview or continue. \
         Respond as JSON: {{\"intent\": \"abort\"|\"continue\"}}.\n\nReply: {user_text}"
    );
    oracle.call_json(session_id, "control_intent", phase, JSON_ONLY_SYSTEM, &prompt).await
}

#[derive(Debug, Clone, Copy, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum TitleMatch {
    Yes,
    No,
    Unclear,
}

/// Response shape for `combined_title_written`, which asks the oracle to
/// judge a title confirmation and a "have you already written it" signal in
/// one call — used while the title itself is still unsettled.
#[derive(Debug, Clone, Copy, Deserialize)]
pub struct TitleWrittenJudgement {
    pub title_match: TitleMatch,
    pub wrote: Option<bool>,
}

/// Response shape for `written`, the narrower sibling of
/// `combined_title_written` used once the title is already settled.
#[derive(Debug, Clone, Copy, Deserialize)]
pub struct WrittenJudgement {
    pub wrote: Option<bool>,
}

/// Narrow "have you already taken/written it" check — no title confirmation,
/// for use once a title is already settled (`in_tl`'s `awaiting_written_confirm`).
pub async fn written(
    oracle: &OracleAdapter,
    session_id: &str,
    phase: &str,
    title: &str,
    user_text: &str,
) -> Result<WrittenJudgement, OracleError> {
    let prompt = format!(
        "The student is discussing the course \"{title}\", whose identity is already settled. \
         Judge only whether their reply indicates they have already taken/written its exam \
         (true|false|null if undeterminable). Respond as JSON: {{\"wrote\": bool|null}}.\n\nReply: {user_text}"
    );
    oracle.call_json(session_id, "written", phase, JSON_ONLY_SYSTEM, &prompt).await
}

pub async fn combined_title_written(
    oracle: &OracleAdapter,
    session_id: &str,
    phase: &str,
    candidate_title: &str,
    user_text: &str,
) -> Result<TitleWrittenJudgement, OracleError> {
    let prompt = format!(
        "The candidate course title is \"{candidate_title}\". Judge whether the student's reply \
         confirms that title (yes|no|unclear) and, if determinable, whether they have already \
         taken/written the exam (true|false|null). Respond as JSON: \
         {{\"title_match\": \"yes\"|\"no\"|\"unclear\", \"wrote\": bool|null}}.\n\nReply: {user_text}"
    );
    oracle
        .call_json(session_id, "combined_title_written", phase, JSON_ONLY_SYSTEM, &prompt)
        .await
}

#[derive(Debug, Clone, Deserialize)]
pub struct ResolveTl {
    pub match_id: Option<String>,
    pub match_title: Option<String>,
    pub confidence: f64,
    #[serde(default)]
    pub need_clarify: bool,
    pub clarify_question: Option<String>,
}

impl ResolveTl {
    fn clamp(mut self) -> Self {
        if !self.confidence.is_finite() {
            self.confidence = 0.0;
        }
        self.confidence = self.confidence.clamp(0.0, 1.0);
        self
    }
}

pub async fn resolve_tl(
    oracle: &OracleAdapter,
    session_id: &str,
    phase: &str,
    mention: &str,
    candidates: &[CandidateMatch],
) -> Result<ResolveTl, OracleError> {
    let candidate_list: Vec<String> = candidates
        .iter()
        .map(|c| format!("{} ({}): score {:.2}", c.title, c.id, c.score))
        .collect();
    let prompt = format!(
        "The student mentioned: \"{mention}\". Choose the best matching course from this \
         candidate list, or ask for clarification if none are confident matches. Respond as JSON: \
         {{\"match_id\": string|null, \"match_title\": string|null, \"confidence\": number, \
         \"need_clarify\": bool, \"clarify_question\": string|null}}.\n\nCandidates: {candidate_list:?}"
    );
    let result: ResolveTl = oracle
        .call_json(session_id, "resolve_tl", phase, JSON_ONLY_SYSTEM, &prompt)
        .await?;
    Ok(result.clamp())
}

#[derive(Debug, Clone, Copy, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Decision {
    Pick,
    None,
    Free,
}

#[derive(Debug, Clone, Deserialize)]
pub struct PickCandidateFromReply {
    pub decision: Decision,
    pub idx: Option<usize>,
    pub title: Option<String>,
}

pub async fn pick_candidate_from_reply(
    oracle: &OracleAdapter,
    session_id: &str,
    phase: &str,
    candidates: &[CandidateMatch],
    reply: &str,
) -> Result<PickCandidateFromReply, OracleError> {
    let numbered: Vec<String> = candidates
        .iter()
        .enumerate()
        .map(|(i, c)| format!("{}. {} ({})", i + 1, c.title, c.id))
        .collect();
    let prompt = format!(
        "The student was shown this numbered list and replied. Decide whether they picked one \
         (decision=pick, with its 1-based idx), rejected all (decision=none), or named something \
         free-form not on the list (decision=free, with title). Respond as JSON: \
         {{\"decision\": \"pick\"|\"none\"|\"free\", \"idx\": number|null, \"title\": string|null}}.\n\n\
         List: {numbered:?}\nReply: {reply}"
    );
    oracle
        .call_json(session_id, "pick_candidate_from_reply", phase, JSON_ONLY_SYSTEM, &prompt)
        .await
}

#[derive(Debug, Clone, Deserialize)]
struct RawFactDelta {
    exam_type: Option<crate::catalog::ExamType>,
    prep_weeks: Option<f64>,
    hours_per_week: Option<f64>,
    difficulty_1_5: Option<i64>,
    #[serde(default)]
    strategies: Vec<String>,
    #[serde(default)]
    materials: Vec<String>,
    #[serde(default)]
    pitfalls: Vec<String>,
    #[serde(default)]
    tips: Vec<String>,
}

/// Extracts a `FactSet` delta from one answer. Clamps `difficulty_1_5` to
/// 1..5 and coerces non-finite numeric fields to null, per the classifier's
/// contract.
pub async fn extract_facts(
    oracle: &OracleAdapter,
    session_id: &str,
    phase: &str,
    title: &str,
    answer: &str,
    prev_facts: &FactSet,
) -> Result<FactSet, OracleError> {
    let prev_json = serde_json::to_string(prev_facts).unwrap_or_default();
    let prompt = format!(
        "Extract any new facts about course \"{title}\" from this answer, as a delta on top of \
         the facts already known. Respond as JSON with fields exam_type (\"schriftlich\"|\"mündlich\"|null), \
         prep_weeks (number|null), hours_per_week (number|null), difficulty_1_5 (integer 1-5 or null), \
         strategies, materials, pitfalls, tips (arrays of strings).\n\n\
         Known facts: {prev_json}\nAnswer: {answer}"
    );
    let raw: RawFactDelta = oracle
        .call_json(session_id, "extract_facts", phase, JSON_ONLY_SYSTEM, &prompt)
        .await?;

    Ok(FactSet {
        exam_type: raw.exam_type,
        prep_weeks: raw.prep_weeks.filter(|v| v.is_finite()),
        hours_per_week: raw.hours_per_week.filter(|v| v.is_finite()),
        difficulty_1_5: raw
            .difficulty_1_5
            .and_then(|d| u8::try_from(d.clamp(1, 5)).ok()),
        strategies: raw.strategies,
        materials: raw.materials,
        pitfalls: raw.pitfalls,
        tips: raw.tips,
    })
}

/// Free-form 3-6 sentence prose summary of a transcript. Not a JSON
/// classifier — uses [`OracleAdapter::call_text`] directly.
pub async fn summarize_transcript(
    oracle: &OracleAdapter,
    session_id: &str,
    transcript_text: &str,
) -> Result<String, OracleError> {
    let system = "You write concise, neutral German-language summaries of student interviews.";
    let prompt = format!(
        "Summarize this interview transcript in 3 to 6 sentences of plain prose, no lists, no JSON.\n\n\
         Transcript:\n{transcript_text}"
    );
    oracle.call_text(session_id, "summarize_transcript", "wrap_up", system, &prompt).await
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn intro_extract_clamps_out_of_range_to_none() {
        let raw = IntroExtract {
            semester: Some(25),
            progress_percent: Some(150),
        };
        let clamped = raw.clamp();
        assert_eq!(clamped.semester, None);
        assert_eq!(clamped.progress_percent, None);
    }

    #[test]
    fn intro_extract_keeps_in_range_values() {
        let raw = IntroExtract {
            semester: Some(4),
            progress_percent: Some(50),
        };
        let clamped = raw.clamp();
        assert_eq!(clamped.semester, Some(4));
        assert_eq!(clamped.progress_percent, Some(50));
    }

    #[test]
    fn resolve_tl_clamps_confidence_into_0_1() {
        let raw = ResolveTl {
            match_id: None,
            match_title: None,
            confidence: 1.5,
            need_clarify: false,
            clarify_question: None,
        };
        assert_eq!(raw.clamp().confidence, 1.0);
    }

    #[test]
    fn resolve_tl_coerces_non_finite_confidence_to_zero() {
        let raw = ResolveTl {
            match_id: None,
            match_title: None,
            confidence: f64::NAN,
            need_clarify: false,
            clarify_question: None,
        };
        assert_eq!(raw.clamp().confidence, 0.0);
    }
}
