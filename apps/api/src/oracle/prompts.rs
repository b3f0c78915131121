#![allow(dead_code)]

//! Cross-cutting prompt fragments shared by every classifier in
//! `classifiers.rs`.

/// System prompt fragment that enforces JSON-only output.
pub const JSON_ONLY_SYSTEM: &str = "You are a precise, structured assistant. \
    You MUST respond with valid JSON only. \
    Do NOT include any text outside the JSON object. \
    Do NOT use markdown code fences. \
    Do NOT include explanations or apologies.";

/// If the prompt text does not mention the word "json" anywhere, prepend the
/// JSON-only system instruction to `system`. Required to satisfy strict
/// oracles that otherwise drift into prose on an under-specified prompt.
pub fn ensure_json_instruction(system: &str, prompt: &str) -> String {
    if prompt.to_lowercase().contains("json") {
        system.to_string()
    } else {
        format!("{JSON_ONLY_SYSTEM}\n\n{system}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn prepends_json_instruction_when_prompt_silent_on_json() {
        let result = ensure_json_instruction("base", "describe the weather");
        assert!(result.starts_with(JSON_ONLY_SYSTEM));
        assert!(result.contains("base"));
    }

    #[test]
    fn leaves_system_untouched_when_prompt_mentions_json() {
        let result = ensure_json_instruction("base", "return a JSON object with fields a, b");
        assert_eq!(result, "base");
    }

    #[test]
    fn json_mention_is_case_insensitive() {
        let result = ensure_json_instruction("base", "Return JSON please");
        assert_eq!(result, "base");
    }
}
