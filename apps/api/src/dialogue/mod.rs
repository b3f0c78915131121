//! Dialogue Controller — the state machine. One `handle_turn` call consumes
//! exactly one user turn, calls the Oracle Adapter for whatever classifiers
//! the current stage needs, mutates `SessionState`, and emits exactly one
//! assistant utterance.

pub mod phases;

use std::sync::Arc;

use crate::catalog::{CatalogIndex, CandidateMatch};
use crate::knowledge::KnowledgeStore;
use crate::oracle::classifiers::{self, Decision, Intent, TemporalHint, TitleMatch};
use crate::oracle::{OracleAdapter, OracleError};
use crate::session::model::{Candidate, PendingTlCandidate};
use crate::session::{SessionHandle, Stage};

const QUOTA_MESSAGE: &str =
    "Die KI-Anbindung hat ihr Nutzungskontingent erschöpft. Bitte versuche es später erneut.";
const RATE_LIMIT_MESSAGE: &str =
    "Die KI-Anbindung ist gerade überlastet. Bitte antworte in Kürze noch einmal.";
const GENERIC_RETRY_MESSAGE: &str =
    "Entschuldigung, da ist etwas schiefgelaufen. Kannst du deine letzte Antwort noch einmal senden?";

pub struct DialogueController {
    catalog: Arc<CatalogIndex>,
    knowledge: Arc<KnowledgeStore>,
    oracle: Arc<OracleAdapter>,
    max_in_tl_rounds: u32,
}

impl DialogueController {
    pub fn new(
        catalog: Arc<CatalogIndex>,
        knowledge: Arc<KnowledgeStore>,
        oracle: Arc<OracleAdapter>,
        max_in_tl_rounds: u32,
    ) -> Self {
        Self {
            catalog,
            knowledge,
            oracle,
            max_in_tl_rounds,
        }
    }

    /// `interview.start` / `interview.reset`. Idempotent: replays the fixed
    /// greeting without duplicating it in `transcript`.
    pub async fn start(&self, _session_id: &str, handle: &SessionHandle, force: bool) -> String {
        let mut state = handle.lock().await;

        if force {
            *state = crate::session::SessionState::new();
        }

        let already_greeted = state
            .transcript
            .first()
            .map(|t| t.content == phases::GREETING)
            .unwrap_or(false);

        if !already_greeted {
            state.push_assistant_turn(phases::GREETING, None);
        }

        phases::GREETING.to_string()
    }

    /// Handles one user turn for an already-started session and returns the
    /// single assistant utterance for this turn.
    pub async fn handle_turn(&self, session_id: &str, handle: &SessionHandle, user_text: &str) -> String {
        let mut state = handle.lock().await;
        state.push_user_turn(user_text);

        if state.flags.llm_disabled {
            let reason = state
                .flags
                .llm_disabled_reason
                .clone()
                .unwrap_or_else(|| QUOTA_MESSAGE.to_string());
            state.push_assistant_turn(&reason, None);
            return reason;
        }

        // Abort can interrupt any in-progress stage except the very first
        // (there's nothing to abort out of before the student has said
        // anything about a course).
        if !matches!(state.stage, Stage::AwaitSemesterProgress) {
            match classifiers::control_intent(&self.oracle, session_id, stage_label(state.stage), user_text).await {
                Ok(result) if result.intent == Intent::Abort => {
                    let area = state.current.area.clone();
                    state.current = Default::default();
                    state.current.area = area;
                    state.stage = Stage::TlSearch;
                    let answer = phases::FIRST_IDENTIFICATION_QUESTION.to_string();
                    record_question(&mut state, &answer);
                    state.push_assistant_turn(&answer, None);
                    return answer;
                }
                Ok(_) => {}
                Err(_) => {
                    // Deterministic fallback: assume continue and proceed
                    // with the stage's own logic rather than stalling.
                }
            }
        }

        let answer = match state.stage {
            Stage::AwaitSemesterProgress => self.handle_s0(session_id, &mut state, user_text).await,
            Stage::General => self.handle_s1(session_id, &mut state, user_text).await,
            Stage::TlSearch => self.handle_s2(session_id, &mut state, user_text).await,
            Stage::InTl => self.handle_s3(session_id, &mut state, user_text).await,
            Stage::WrapUp => self.handle_s4(session_id, &mut state, user_text).await,
        };

        state.push_assistant_turn(&answer, None);
        answer
    }

    async fn handle_s0(
        &self,
        session_id: &str,
        state: &mut crate::session::SessionState,
        user_text: &str,
    ) -> String {
        match classifiers::intro_extract(&self.oracle, session_id, user_text).await {
            Ok(extracted) => {
                state.general.semester = extracted.semester;
                state.general.progress_percent = extracted.progress_percent;
            }
            Err(err) => {
                if let Some(msg) = self.handle_quota_or_rate_limit(state, err) {
                    return msg;
                }
            }
        }

        state.stage = Stage::General;
        self.next_general_question(session_id, state).await
    }

    async fn handle_s1(
        &self,
        session_id: &str,
        state: &mut crate::session::SessionState,
        user_text: &str,
    ) -> String {
        let history: Vec<String> = state.transcript.iter().map(|t| t.content.clone()).collect();
        let detected = match classifiers::detect_entities(
            &self.oracle,
            session_id,
            "general",
            user_text,
            &history,
            false,
        )
        .await
        {
            Ok(d) => d,
            Err(err) => {
                if let Some(msg) = self.handle_quota_or_rate_limit(state, err) {
                    return msg;
                }
                state.counters.general_q += 1;
                return self.next_general_question(session_id, state).await;
            }
        };

        let mention = pick_least_known_mention(&detected.found_tl_list, &self.catalog, session_id).or(detected
            .found_tl_text
            .clone()
            .filter(|s| !s.is_empty()));

        let Some(mention) = mention else {
            state.counters.general_q += 1;
            if state.counters.general_q > 2 {
                state.stage = Stage::TlSearch;
                let answer = phases::FIRST_IDENTIFICATION_QUESTION.to_string();
                record_question(state, &answer);
                return answer;
            }
            return self.next_general_question(session_id, state).await;
        };

        let candidates = self.catalog.candidates(&mention, 3);
        let resolved = match classifiers::resolve_tl(&self.oracle, session_id, "general", &mention, &candidates).await
        {
            Ok(r) => r,
            Err(err) => {
                if let Some(msg) = self.handle_quota_or_rate_limit(state, err) {
                    return msg;
                }
                state.counters.general_q += 1;
                return self.next_general_question(session_id, state).await;
            }
        };

        if resolved.confidence >= 0.6 {
            if let (Some(id), Some(title)) = (resolved.match_id.clone(), resolved.match_title.clone()) {
                if detected.wrote_prob.unwrap_or(0.0) >= 0.85 {
                    state.enter_in_tl(id, title.clone());
                    let intro = format!("Lass uns über „{title}\" sprechen. ");
                    return self.next_tl_question(session_id, state, Some(intro)).await;
                }

                state.stage = Stage::TlSearch;
                state.current.pending_tl_candidate = Some(PendingTlCandidate { id, title: title.clone() });
                state.current.awaiting_title_written_confirm = true;
                let instructor = self
                    .catalog
                    .primary_instructor(&resolved.match_id.clone().unwrap_or_default())
                    .map(|i| format!(" (Dozent: {i})"))
                    .unwrap_or_default();
                let question = format!(
                    "Meinst du „{title}\"{instructor} — und hast du diese Teilleistung bereits abgelegt?"
                );
                record_question(state, &question);
                return question;
            }
        }

        state.counters.general_q += 1;
        if state.counters.general_q > 2 {
            state.stage = Stage::TlSearch;
            let answer = phases::FIRST_IDENTIFICATION_QUESTION.to_string();
            record_question(state, &answer);
            return answer;
        }
        self.next_general_question(session_id, state).await
    }

    async fn handle_s2(
        &self,
        session_id: &str,
        state: &mut crate::session::SessionState,
        user_text: &str,
    ) -> String {
        let history: Vec<String> = state.transcript.iter().map(|t| t.content.clone()).collect();
        let detected = classifiers::detect_entities(&self.oracle, session_id, "tl_search", user_text, &history, true)
            .await
            .ok();

        if let Some(d) = &detected {
            if d.temporal_hint == TemporalHint::Future {
                let q = phases::PAST_TENSE_IDENTIFICATION.to_string();
                record_question(state, &q);
                return q;
            }
        }

        if state.current.awaiting_candidate_choice {
            return self.handle_candidate_choice(session_id, state, user_text).await;
        }

        if state.current.awaiting_title_written_confirm {
            return self.handle_title_written_confirm(session_id, state, user_text).await;
        }

        let mention = detected
            .as_ref()
            .and_then(|d| d.found_tl_text.clone())
            .filter(|s| !s.is_empty())
            .unwrap_or_else(|| user_text.to_string());

        self.resolve_mention_in_search(session_id, state, &mention).await
    }

    async fn handle_candidate_choice(
        &self,
        session_id: &str,
        state: &mut crate::session::SessionState,
        user_text: &str,
    ) -> String {
        let candidates: Vec<CandidateMatch> = state
            .current
            .candidates
            .iter()
            .map(|c| CandidateMatch {
                id: c.id.clone(),
                title: c.title.clone(),
                score: 0.0,
            })
            .collect();

        let picked = match classifiers::pick_candidate_from_reply(&self.oracle, session_id, "tl_search", &candidates, user_text)
            .await
        {
            Ok(p) => p,
            Err(err) => {
                if let Some(msg) = self.handle_quota_or_rate_limit(state, err) {
                    return msg;
                }
                let q = phases::FIRST_IDENTIFICATION_QUESTION.to_string();
                record_question(state, &q);
                return q;
            }
        };

        match picked.decision {
            Decision::Pick => {
                let idx = picked.idx.unwrap_or(1).saturating_sub(1);
                if let Some(chosen) = state.current.candidates.get(idx).cloned() {
                    state.current.awaiting_candidate_choice = false;
                    state.current.candidates.clear();
                    state.current.pending_tl_candidate = Some(PendingTlCandidate {
                        id: chosen.id.clone(),
                        title: chosen.title.clone(),
                    });
                    state.current.awaiting_title_written_confirm = true;
                    let question = format!("Meinst du „{}\" — und hast du diese Teilleistung bereits abgelegt?", chosen.title);
                    record_question(state, &question);
                    return question;
                }
                let q = phases::FIRST_IDENTIFICATION_QUESTION.to_string();
                record_question(state, &q);
                q
            }
            Decision::Free => {
                state.current.awaiting_candidate_choice = false;
                state.current.candidates.clear();
                let mention = picked.title.unwrap_or_else(|| user_text.to_string());
                self.resolve_mention_in_search(session_id, state, &mention).await
            }
            Decision::None => {
                state.current.awaiting_candidate_choice = false;
                state.current.candidates.clear();
                let q = phases::FIRST_IDENTIFICATION_QUESTION.to_string();
                record_question(state, &q);
                q
            }
        }
    }

    async fn handle_title_written_confirm(
        &self,
        session_id: &str,
        state: &mut crate::session::SessionState,
        user_text: &str,
    ) -> String {
        let Some(pending) = state.current.pending_tl_candidate.clone() else {
            state.current.awaiting_title_written_confirm = false;
            let q = phases::FIRST_IDENTIFICATION_QUESTION.to_string();
            record_question(state, &q);
            return q;
        };

        let judgement = match classifiers::combined_title_written(&self.oracle, session_id, "tl_search", &pending.title, user_text).await {
            Ok(j) => j,
            Err(err) => {
                if let Some(msg) = self.handle_quota_or_rate_limit(state, err) {
                    return msg;
                }
                return format!("Bestätigst du „{}\"? (ja/nein)", pending.title);
            }
        };

        match (judgement.title_match, judgement.wrote) {
            (TitleMatch::Yes, Some(true)) => {
                state.current.awaiting_title_written_confirm = false;
                state.current.pending_tl_candidate = None;
                state.enter_in_tl(pending.id, pending.title.clone());
                let intro = format!("Lass uns über „{}\" sprechen. ", pending.title);
                self.next_tl_question(session_id, state, Some(intro)).await
            }
            (TitleMatch::Yes, Some(false)) => {
                state.current.declined_written.push(pending.title.clone());
                state.current.awaiting_title_written_confirm = false;
                state.current.pending_tl_candidate = None;
                let q = phases::FIRST_IDENTIFICATION_QUESTION.to_string();
                record_question(state, &q);
                q
            }
            (TitleMatch::Yes, None) => {
                state.current.awaiting_title_written_confirm = false;
                state.current.pending_tl_candidate = None;
                state.enter_in_tl(pending.id, pending.title.clone());
                state.current.awaiting_written_confirm = true;
                let q = format!("Hast du „{}\" bereits abgelegt? (ja/nein)", pending.title);
                record_question(state, &q);
                q
            }
            (TitleMatch::No, _) => {
                state.current.awaiting_title_written_confirm = false;
                state.current.pending_tl_candidate = None;
                let q = phases::FIRST_IDENTIFICATION_QUESTION.to_string();
                record_question(state, &q);
                q
            }
            (TitleMatch::Unclear, _) => {
                format!("Meinst du „{}\" — und hast du diese Teilleistung bereits abgelegt?", pending.title)
            }
        }
    }

    async fn resolve_mention_in_search(
        &self,
        session_id: &str,
        state: &mut crate::session::SessionState,
        mention: &str,
    ) -> String {
        let candidates = self.catalog.candidates(mention, 3);
        let resolved = match classifiers::resolve_tl(&self.oracle, session_id, "tl_search", mention, &candidates).await {
            Ok(r) => r,
            Err(err) => {
                if let Some(msg) = self.handle_quota_or_rate_limit(state, err) {
                    return msg;
                }
                let q = phases::FIRST_IDENTIFICATION_QUESTION.to_string();
                record_question(state, &q);
                return q;
            }
        };

        if resolved.confidence >= 0.6 {
            if let (Some(id), Some(title)) = (resolved.match_id, resolved.match_title) {
                state.current.pending_tl_candidate = Some(PendingTlCandidate { id, title: title.clone() });
                state.current.awaiting_title_written_confirm = true;
                let question = format!("Meinst du „{title}\" — und hast du diese Teilleistung bereits abgelegt?");
                record_question(state, &question);
                return question;
            }
        }

        if resolved.need_clarify && !candidates.is_empty() {
            state.current.candidates = candidates
                .iter()
                .take(3)
                .enumerate()
                .map(|(i, c)| Candidate {
                    idx: i + 1,
                    id: c.id.clone(),
                    title: c.title.clone(),
                })
                .collect();
            state.current.awaiting_candidate_choice = true;
            let list = state
                .current
                .candidates
                .iter()
                .map(|c| format!("{}. {}", c.idx, c.title))
                .collect::<Vec<_>>()
                .join("\n");
            return resolved
                .clarify_question
                .unwrap_or_else(|| format!("Welche dieser Teilleistungen meinst du?\n{list}"));
        }

        let q = phases::FIRST_IDENTIFICATION_QUESTION.to_string();
        record_question(state, &q);
        q
    }

    async fn handle_s3(
        &self,
        session_id: &str,
        state: &mut crate::session::SessionState,
        user_text: &str,
    ) -> String {
        state.current.in_tl_rounds += 1;
        if state.current.in_tl_rounds > self.max_in_tl_rounds {
            state.current.in_tl_rounds = 0;
            state.stage = Stage::WrapUp;
            let pool = phases::wrap_up_pool();
            let question = phases::first_unasked(&pool, &state.asked_log)
                .map(|s| s.to_string())
                .unwrap_or_else(|| phases::wrap_up_pool()[0].clone());
            record_question(state, &question);
            return question;
        }

        if state.current.awaiting_written_confirm {
            let title = state.current.tl_title.clone().unwrap_or_default();
            let judgement = classifiers::written(&self.oracle, session_id, "in_tl", &title, user_text).await;
            match judgement {
                Ok(j) if j.wrote == Some(true) => {
                    state.current.awaiting_written_confirm = false;
                }
                Ok(j) if j.wrote == Some(false) => {
                    state.current.declined_written.push(title);
                    state.current.awaiting_written_confirm = false;
                    state.stage = Stage::TlSearch;
                    let q = phases::FIRST_IDENTIFICATION_QUESTION.to_string();
                    record_question(state, &q);
                    return q;
                }
                _ => {
                    return format!("Hast du „{}\" bereits abgelegt? (ja/nein)", state.current.tl_title.clone().unwrap_or_default());
                }
            }
        }

        let title = state.current.tl_title.clone().unwrap_or_default();
        let tl_id = state.current.tl_id.clone().unwrap_or_default();
        let prev_facts = state.current.tl_facts.clone();

        match classifiers::extract_facts(&self.oracle, session_id, "in_tl", &title, user_text, &prev_facts).await {
            Ok(delta) => {
                let merged = crate::catalog::FactSet::merge(&prev_facts, &delta);
                state.current.tl_facts = merged.clone();
                if let Err(e) = self.knowledge.save_new_knowledge(&tl_id, session_id, &merged) {
                    tracing::error!("failed to persist knowledge for {tl_id}/{session_id}: {e}");
                }
            }
            Err(err) => {
                if let Some(msg) = self.handle_quota_or_rate_limit(state, err) {
                    return msg;
                }
            }
        }

        self.next_tl_question(session_id, state, None).await
    }

    async fn handle_s4(
        &self,
        _session_id: &str,
        state: &mut crate::session::SessionState,
        _user_text: &str,
    ) -> String {
        state.stage = Stage::TlSearch;
        let pool = phases::wrap_up_pool();
        let question = phases::first_unasked(&pool, &state.asked_log)
            .map(|s| s.to_string())
            .unwrap_or_else(|| phases::FIRST_IDENTIFICATION_QUESTION.to_string());
        record_question(state, &question);
        question
    }

    async fn next_general_question(&self, session_id: &str, state: &mut crate::session::SessionState) -> String {
        let pool = phases::general_pool();
        let picked = classifiers::pick_phase_question(&self.oracle, session_id, "Allgemeine Fragen", &pool, &state.asked_log).await;

        let question = match picked {
            Ok(p) if !p.question.is_empty() && !state.asked_log.contains(&p.question) => p.question,
            _ => phases::random_unasked(&pool, &state.asked_log)
                .or_else(|| phases::first_unasked(&pool, &state.asked_log).map(|s| s.to_string()))
                .unwrap_or_else(|| "Magst du mir noch etwas über dein Studium erzählen?".to_string()),
        };

        record_question(state, &question);
        question
    }

    async fn next_tl_question(
        &self,
        session_id: &str,
        state: &mut crate::session::SessionState,
        prefix: Option<String>,
    ) -> String {
        let pool = phases::in_tl_pool();
        let hint = state
            .current
            .tl_id
            .as_deref()
            .and_then(|id| self.catalog.erfolgskontrolle_text(id));

        let phase_label = format!("in_tl:{}", hint.unwrap_or_default());
        let picked = classifiers::pick_phase_question(&self.oracle, session_id, &phase_label, &pool, &state.asked_log).await;

        let question = match picked {
            Ok(p) if !p.question.is_empty() && !state.asked_log.contains(&p.question) => p.question,
            _ => phases::random_unasked(&pool, &state.asked_log)
                .or_else(|| phases::first_unasked(&pool, &state.asked_log).map(|s| s.to_string()))
                .unwrap_or_else(|| "Gibt es sonst noch etwas, das du dazu teilen möchtest?".to_string()),
        };

        record_question(state, &question);
        match prefix {
            Some(p) => format!("{p}{question}"),
            None => question,
        }
    }

    /// Applies the quota/rate-limit propagation policy. Returns `Some(message)`
    /// for those two cases (the caller should return it directly); returns
    /// `None` for `Other`, letting the caller fall through to its own
    /// deterministic fallback.
    fn handle_quota_or_rate_limit(&self, state: &mut crate::session::SessionState, err: OracleError) -> Option<String> {
        match err {
            OracleError::QuotaExhausted => {
                state.flags.llm_disabled = true;
                state.flags.llm_disabled_reason = Some(QUOTA_MESSAGE.to_string());
                Some(QUOTA_MESSAGE.to_string())
            }
            OracleError::RateLimited => Some(RATE_LIMIT_MESSAGE.to_string()),
            OracleError::Other(_) => None,
        }
    }
}

fn record_question(state: &mut crate::session::SessionState, question: &str) {
    if !state.record_question(question) {
        tracing::warn!("attempted to re-ask a question already in asked_log: {question}");
    }
}

fn stage_label(stage: Stage) -> &'static str {
    match stage {
        Stage::AwaitSemesterProgress => "await_semester_progress",
        Stage::General => "general",
        Stage::TlSearch => "tl_search",
        Stage::InTl => "in_tl",
        Stage::WrapUp => "wrap_up",
    }
}

/// Least-known tie-breaker: scores each mention's resolved course by signals
/// already present in its `new_knowledge` log and picks the minimum (ties
/// broken by input order). If fewer than two mentions resolve, there's
/// nothing to break a tie over.
fn pick_least_known_mention(mentions: &[String], catalog: &CatalogIndex, _session_id: &str) -> Option<String> {
    if mentions.len() < 2 {
        return mentions.first().cloned();
    }

    mentions
        .iter()
        .min_by_key(|m| {
            catalog
                .candidates(m, 1)
                .first()
                .and_then(|c| catalog.entry(&c.id))
                .map(|c| known_score(&c))
                .unwrap_or(0)
        })
        .cloned()
}

fn known_score(course: &crate::catalog::Course) -> u32 {
    let mut score = 0u32;
    if let Some(entry) = course.new_knowledge.first() {
        let f = &entry.facts;
        score += f.exam_type.is_some() as u32;
        score += f.prep_weeks.is_some() as u32;
        score += f.hours_per_week.is_some() as u32;
        score += f.difficulty_1_5.is_some() as u32;
        score += !f.strategies.is_empty() as u32;
        score += !f.materials.is_empty() as u32;
        score += !f.pitfalls.is_empty() as u32;
        score += !f.tips.is_empty() as u32;
    }
    score += (course.new_knowledge.len() as u32).min(2);
    if course.text.len() > 200 {
        score += 1;
    }
    score
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::Course;

    fn course_with(text_len: usize, entries: usize) -> Course {
        Course {
            id: "T-1".into(),
            title: "Statistik".into(),
            text: "x".repeat(text_len),
            new_knowledge: (0..entries)
                .map(|i| crate::catalog::KnowledgeEntry {
                    session_id: format!("s{i}"),
                    timestamp: chrono::Utc::now(),
                    facts: crate::catalog::FactSet::default(),
                    jsonld: serde_json::json!({}),
                    ttl: String::new(),
                })
                .collect(),
        }
    }

    #[test]
    fn known_score_rewards_long_descriptor_text() {
        let short = course_with(50, 0);
        let long = course_with(500, 0);
        assert!(known_score(&long) > known_score(&short));
    }

    #[test]
    fn known_score_caps_prior_entry_bonus_at_two() {
        let two_entries = course_with(0, 2);
        let five_entries = course_with(0, 5);
        assert_eq!(known_score(&two_entries), known_score(&five_entries));
    }

    #[test]
    fn pick_least_known_mention_passthrough_for_single_mention() {
        let catalog_dir = tempfile::tempdir().unwrap();
        let catalog = CatalogIndex::load(catalog_dir.path());
        let mentions = vec!["Statistik".to_string()];
        assert_eq!(
            pick_least_known_mention(&mentions, &catalog, "sess"),
            Some("Statistik".to_string())
        );
    }
}
