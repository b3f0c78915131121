//! Static question pools used by `pick_phase_question` and as the
//! deterministic fallback when the oracle's pick is empty or already asked.

pub const GREETING: &str = "Hallo! Ich möchte mit dir über deine Erfahrungen mit Teilleistungen \
    sprechen, um daraus Tipps für andere Studierende abzuleiten. Magst du mir zuerst kurz sagen, \
    in welchem Semester du bist und wie weit du in deinem Studium bist?";

pub fn general_pool() -> Vec<String> {
    [
        "Welche Teilleistung hat dich bisher am meisten gefordert?",
        "Gibt es ein Fach, bei dem du im Rückblick anders vorgehen würdest?",
        "Worüber sprichst du am liebsten, wenn es um dein Studium geht?",
        "Welche Teilleistung hast du zuletzt abgeschlossen?",
    ]
    .iter()
    .map(|s| s.to_string())
    .collect()
}

pub fn in_tl_pool() -> Vec<String> {
    [
        "Wie hast du dich konkret auf die Prüfung vorbereitet?",
        "Wie viele Stunden pro Woche hast du ungefähr investiert?",
        "Was würdest du als größte Stolperfalle bei dieser Teilleistung bezeichnen?",
        "Welches Material hat dir am meisten geholfen?",
        "Wie würdest du den Schwierigkeitsgrad einschätzen, und warum?",
        "Was ist dein wichtigster Tipp für jemanden, der das zum ersten Mal macht?",
    ]
    .iter()
    .map(|s| s.to_string())
    .collect()
}

pub fn wrap_up_pool() -> Vec<String> {
    [
        "Gibt es eine weitere Teilleistung, über die du berichten möchtest?",
        "Fällt dir noch ein anderes Fach ein, zu dem du etwas teilen willst?",
    ]
    .iter()
    .map(|s| s.to_string())
    .collect()
}

/// The rephrased identification question used when `detect_entities` reports
/// a `future` temporal hint in `tl_search` — steers the student back to
/// already-completed courses.
pub const PAST_TENSE_IDENTIFICATION: &str =
    "Lass uns bei einer Teilleistung bleiben, die du bereits abgeschlossen hast — welche war das?";

pub const FIRST_IDENTIFICATION_QUESTION: &str =
    "An welche Teilleistung denkst du dabei zuerst?";

/// Picks `question` from `pool`, skipping anything already in `asked_log`.
/// Returns `None` if the entire pool has been exhausted.
pub fn first_unasked<'a>(pool: &'a [String], asked_log: &[String]) -> Option<&'a str> {
    pool.iter()
        .find(|q| !asked_log.contains(q))
        .map(|s| s.as_str())
}

/// Picks a pseudo-random unasked element from `pool`, used as the
/// deterministic fallback when the oracle's suggestion is empty or a repeat.
/// Uses `rand` rather than a fixed pick so repeated fallbacks within one
/// session don't all land on the same question.
pub fn random_unasked(pool: &[String], asked_log: &[String]) -> Option<String> {
    use rand::seq::SliceRandom;

    let remaining: Vec<&String> = pool.iter().filter(|q| !asked_log.contains(q)).collect();
    remaining.choose(&mut rand::thread_rng()).map(|s| s.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn first_unasked_skips_asked_questions() {
        let pool = general_pool();
        let asked = vec![pool[0].clone()];
        let next = first_unasked(&pool, &asked).unwrap();
        assert_ne!(next, pool[0]);
    }

    #[test]
    fn first_unasked_none_when_pool_exhausted() {
        let pool = vec!["only one".to_string()];
        let asked = vec!["only one".to_string()];
        assert!(first_unasked(&pool, &asked).is_none());
    }

    #[test]
    fn random_unasked_never_returns_an_asked_question() {
        let pool = in_tl_pool();
        let asked = vec![pool[0].clone(), pool[1].clone()];
        for _ in 0..20 {
            if let Some(q) = random_unasked(&pool, &asked) {
                assert!(!asked.contains(&q));
            }
        }
    }
}
