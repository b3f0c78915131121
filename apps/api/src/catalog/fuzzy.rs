//! Fuzzy course-mention scoring.
//!
//! score = 0.6 * Dice(bigrams, normalized) + 0.4 * Jaccard(tokens, normalized)

use std::collections::HashSet;

/// Lowercases, ASCII-folds German umlauts, strips non-alphanumerics and
/// collapses whitespace. Both sides of every comparison go through this.
pub fn normalize(input: &str) -> String {
    let lower = input.to_lowercase();
    let folded = lower
        .replace('ä', "ae")
        .replace('ö', "oe")
        .replace('ü', "ue")
        .replace('ß', "ss");

    let mut out = String::with_capacity(folded.len());
    let mut last_was_space = false;
    for ch in folded.chars() {
        if ch.is_alphanumeric() {
            out.push(ch);
            last_was_space = false;
        } else if !last_was_space {
            out.push(' ');
            last_was_space = true;
        }
    }
    out.trim().split_whitespace().collect::<Vec<_>>().join(" ")
}

fn bigrams(normalized: &str) -> Vec<String> {
    let joined: String = normalized.chars().filter(|c| !c.is_whitespace()).collect();
    let chars: Vec<char> = joined.chars().collect();
    if chars.len() < 2 {
        return vec![joined];
    }
    chars
        .windows(2)
        .map(|w| w.iter().collect::<String>())
        .collect()
}

fn tokens(normalized: &str) -> HashSet<String> {
    normalized.split_whitespace().map(|s| s.to_string()).collect()
}

/// Sorensen-Dice coefficient over character bigrams.
pub fn dice(a: &str, b: &str) -> f64 {
    let a_bigrams = bigrams(a);
    let b_bigrams = bigrams(b);
    if a_bigrams.is_empty() || b_bigrams.is_empty() {
        return if a_bigrams.is_empty() && b_bigrams.is_empty() { 1.0 } else { 0.0 };
    }

    let mut b_pool = b_bigrams.clone();
    let mut intersection = 0usize;
    for bg in &a_bigrams {
        if let Some(pos) = b_pool.iter().position(|x| x == bg) {
            b_pool.remove(pos);
            intersection += 1;
        }
    }

    (2.0 * intersection as f64) / (a_bigrams.len() + b_bigrams.len()) as f64
}

/// Jaccard similarity over whitespace tokens. Symmetric and bounded in [0,1].
pub fn jaccard(a: &str, b: &str) -> f64 {
    let ta = tokens(a);
    let tb = tokens(b);
    if ta.is_empty() && tb.is_empty() {
        return 1.0;
    }
    let intersection = ta.intersection(&tb).count();
    let union = ta.union(&tb).count();
    if union == 0 {
        0.0
    } else {
        intersection as f64 / union as f64
    }
}

/// Combined fuzzy score between a raw query and a raw title, both normalized
/// internally. Bounded in [0,1].
pub fn score(query: &str, title: &str) -> f64 {
    let nq = normalize(query);
    let nt = normalize(title);
    0.6 * dice(&nq, &nt) + 0.4 * jaccard(&nq, &nt)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn normalize_folds_umlauts_and_eszett() {
        assert_eq!(normalize("Prüfungsvorbereitung"), "pruefungsvorbereitung");
        assert_eq!(normalize("Maß"), "mass");
    }

    #[test]
    fn normalize_strips_punctuation_and_collapses_space() {
        assert_eq!(normalize("Mathe 1 (T-123)!!"), "mathe 1 t 123");
    }

    #[test]
    fn jaccard_is_symmetric() {
        let a = "mathe eins grundlagen";
        let b = "grundlagen der mathematik";
        assert!((jaccard(a, b) - jaccard(b, a)).abs() < f64::EPSILON);
    }

    #[test]
    fn jaccard_bounded_0_1() {
        let j = jaccard("a b c", "c d e f");
        assert!((0.0..=1.0).contains(&j));
    }

    #[test]
    fn dice_identical_strings_is_one() {
        assert!((dice("mathe eins", "mathe eins") - 1.0).abs() < f64::EPSILON);
    }

    #[test]
    fn dice_disjoint_strings_is_zero() {
        assert_eq!(dice("abc", "xyz"), 0.0);
    }

    #[test]
    fn score_exact_match_is_one() {
        let s = score("Mathe 1", "Mathe 1");
        assert!((s - 1.0).abs() < 1e-9);
    }

    #[test]
    fn score_umlaut_variant_still_matches_well() {
        let s = score("Grundlagen Mathematik", "Grundlagen der Mathematik");
        assert!(s > 0.5, "expected high score, got {s}");
    }

    #[test]
    fn score_is_bounded() {
        let s = score("irgendetwas", "komplett anderes thema");
        assert!((0.0..=1.0).contains(&s));
    }
}
