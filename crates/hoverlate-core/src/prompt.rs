//! Prompt construction and batch response splitting.

use crate::error::UpstreamError;

pub const DEFAULT_TRANSLATION_PROMPT: &str = "Provide a direct, literal English translation of the following text. Do not provide explanations, alternatives, or any text other than the translation itself.";

pub const DEFAULT_EXPLANATION_PROMPT: &str = "Explain the grammar and meaning of the following text for a language learner in a brief paragraph. Avoid detailed breakdowns or lists.";

pub const BATCH_TRANSLATION_PROMPT: &str = "Provide a direct, literal English translation for each of the following lines. Answer with exactly one line per input line, in the same order. Do not include the original text or any other explanations.";

/// Lightweight prompt used when validating models against a key.
pub const VALIDATION_PROMPT: &str = "This is a test call to verify API access to this model.";

/// `{instruction}\n\n{text}`, using `custom` when it is set.
pub fn build(custom: Option<&str>, default: &str, text: &str) -> String {
    let instruction = custom.map(str::trim).filter(|s| !s.is_empty()).unwrap_or(default);
    format!("{}\n\n{}", instruction, text)
}

/// One prompt for several texts, one per line. Line breaks inside a text
/// are flattened so the answer can be split back by line.
pub fn build_batch(texts: &[&str]) -> String {
    let lines: Vec<String> = texts
        .iter()
        .map(|t| t.split_whitespace().collect::<Vec<_>>().join(" "))
        .collect();
    format!("{}\n\n{}", BATCH_TRANSLATION_PROMPT, lines.join("\n"))
}

/// `"1. Hello"` → `"Hello"`. Lines without a leading `N.` are unchanged.
fn strip_numbering(line: &str) -> &str {
    let rest = line.trim_start_matches(|c: char| c.is_ascii_digit());
    if rest.len() == line.len() {
        return line;
    }
    rest.strip_prefix('.').map(str::trim_start).unwrap_or(line)
}

/// Split a batch answer into exactly `expected` translations.
///
/// List numbering and blank lines are dropped. Fewer lines than inputs is a
/// malformed answer; extra trailing lines are ignored.
pub fn split_batch(response: &str, expected: usize) -> Result<Vec<String>, UpstreamError> {
    let lines: Vec<String> = response
        .lines()
        .map(|l| strip_numbering(l.trim()))
        .filter(|l| !l.is_empty())
        .map(str::to_string)
        .collect();

    if lines.len() < expected {
        return Err(UpstreamError::Malformed(format!(
            "batch answer has {} lines for {} inputs",
            lines.len(),
            expected
        )));
    }

    Ok(lines.into_iter().take(expected).collect())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_custom_prompt_overrides_default() {
        assert_eq!(build(Some("  Translate!  "), "default", "猫"), "Translate!\n\n猫");
        assert_eq!(build(Some("   "), "default", "猫"), "default\n\n猫");
        assert_eq!(build(None, "default", "猫"), "default\n\n猫");
    }

    #[test]
    fn test_batch_prompt_flattens_lines() {
        let prompt = build_batch(&["一行目\n二行目", "三"]);
        assert!(prompt.ends_with("一行目 二行目\n三"));
    }

    #[test]
    fn test_split_batch() {
        let out = split_batch("Hello\n\n World \nextra", 2).unwrap();
        assert_eq!(out, vec!["Hello", "World"]);

        let out = split_batch("1. Hello\n2.World\n10.  Good night", 3).unwrap();
        assert_eq!(out, vec!["Hello", "World", "Good night"]);

        let out = split_batch("2024 was fine\nNo. 5", 2).unwrap();
        assert_eq!(out, vec!["2024 was fine", "No. 5"]);
    }

    #[test]
    fn test_short_batch_answer_is_malformed() {
        let err = split_batch("only one", 2).unwrap_err();
        assert!(matches!(err, UpstreamError::Malformed(_)));
    }
}
