use std::collections::HashSet;

use once_cell::sync::Lazy;
use regex::Regex;

static TERM: Lazy<Regex> = Lazy::new(|| Regex::new(r"\b\w+\b").expect("regex"));

/// Splits on sentence-terminal punctuation (`.`, `!`, `?`) followed by
/// whitespace. The punctuation stays with its sentence; empty pieces are dropped.
pub fn split_sentences(text: &str) -> Vec<&str> {
    let mut out = Vec::new();
    let mut start = 0usize;
    let mut chars = text.char_indices().peekable();
    while let Some((idx, ch)) = chars.next() {
        if !matches!(ch, '.' | '!' | '?') {
            continue;
        }
        let Some(&(next_idx, next)) = chars.peek() else {
            break;
        };
        if !next.is_whitespace() {
            continue;
        }
        push_trimmed(&mut out, &text[start..idx + ch.len_utf8()]);
        start = next_idx;
        while let Some(&(ws_idx, ws)) = chars.peek() {
            if !ws.is_whitespace() {
                start = ws_idx;
                break;
            }
            chars.next();
            start = ws_idx + ws.len_utf8();
        }
    }
    if start < text.len() {
        push_trimmed(&mut out, &text[start..]);
    }
    out
}

fn push_trimmed<'a>(out: &mut Vec<&'a str>, piece: &'a str) {
    let trimmed = piece.trim();
    if !trimmed.is_empty() {
        out.push(trimmed);
    }
}

/// Lowercased `\w+` terms in reading order, repeats kept. Punctuation never
/// sticks to a term, so `grew.` and `grew` match.
pub fn terms(text: &str) -> Vec<String> {
    TERM.find_iter(&text.to_lowercase())
        .map(|m| m.as_str().to_string())
        .collect()
}

/// Lowercased whitespace-separated tokens.
pub fn word_set(text: &str) -> HashSet<String> {
    text.split_whitespace().map(|w| w.to_lowercase()).collect()
}

/// Token-set Jaccard similarity; two empty texts count as identical.
pub fn jaccard(a: &HashSet<String>, b: &HashSet<String>) -> f32 {
    if a.is_empty() && b.is_empty() {
        return 1.0;
    }
    let shared = a.intersection(b).count();
    let union = a.len() + b.len() - shared;
    shared as f32 / union.max(1) as f32
}

/// Share of `sentence` words that also occur in `chunk`.
pub fn overlap_ratio(sentence: &HashSet<String>, chunk: &HashSet<String>) -> f32 {
    if sentence.is_empty() || chunk.is_empty() {
        return 0.0;
    }
    sentence.intersection(chunk).count() as f32 / sentence.len() as f32
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn terms_drop_punctuation_and_keep_repeats() {
        assert_eq!(
            terms("Revenue grew; revenue (net) GREW."),
            vec!["revenue", "grew", "revenue", "net", "grew"]
        );
        assert!(terms(" -- ").is_empty());
    }

    #[test]
    fn splits_on_terminal_punctuation() {
        let parts = split_sentences("Hello world. Is it?  Yes!\nDone");
        assert_eq!(parts, vec!["Hello world.", "Is it?", "Yes!", "Done"]);
    }

    #[test]
    fn keeps_decimals_and_trailing_punctuation() {
        let parts = split_sentences("Revenue grew 3.5 percent. ");
        assert_eq!(parts, vec!["Revenue grew 3.5 percent."]);
    }

    #[test]
    fn empty_input_has_no_sentences() {
        assert!(split_sentences("   \n ").is_empty());
    }

    #[test]
    fn jaccard_of_empty_texts_is_one() {
        assert_eq!(jaccard(&word_set(""), &word_set("  ")), 1.0);
        assert_eq!(jaccard(&word_set("a b"), &word_set("")), 0.0);
    }

    #[test]
    fn jaccard_ignores_case() {
        assert_eq!(jaccard(&word_set("Alpha beta"), &word_set("alpha BETA")), 1.0);
        assert!((jaccard(&word_set("a b c d"), &word_set("a b")) - 0.5).abs() < 1e-6);
    }

    #[test]
    fn overlap_ratio_is_relative_to_sentence() {
        let sentence = word_set("the cat sat");
        let chunk = word_set("The cat ate the fish");
        assert!((overlap_ratio(&sentence, &chunk) - 2.0 / 3.0).abs() < 1e-6);
        assert_eq!(overlap_ratio(&word_set(""), &chunk), 0.0);
    }
}
