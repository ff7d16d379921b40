//! Pull a candidate move out of free-form model output.
//!
//! Extraction runs three stages and stops at the first that yields a
//! plausible token:
//!
//! 1. delimited fields: `<uci_move>…</uci_move>` / `<move>…</move>` tags
//!    (closing tag optional, so truncated generations still count), JSON
//!    keys such as `"move": "e2e4"` (the surrounding JSON need not parse)
//!    and labels such as `Move: e2e4`;
//! 2. the first UCI-like or SAN-like token anywhere in the text;
//! 3. a lenient reading of the first word (`nf3`, `Ng1-f3`).
//!
//! Nothing here knows the position. Legality is the board's job.

use std::sync::LazyLock;

use regex::Regex;

use crate::types::{CandidateMove, ExtractionStage};

/// Core move token. Long algebraic first so `e2-e4` is not read as `e2`
/// and `Ng1-f3` not as `Ng1`.
const MOVE_TOKEN: &str = r"(?:[KQRBN]?[a-hA-H][1-8][-x]?[a-hA-H][1-8](?:=?[qrbnQRBN])?|O-O-O|O-O|0-0-0|0-0|[KQRBN][a-h]?[1-8]?x?[a-h][1-8]|[a-h]x[a-h][1-8](?:=?[QRBN])?|[a-h][1-8](?:=?[QRBN])?)";

const LONG_ALGEBRAIC: &str = r"^[KQRBN]?[a-hA-H][1-8][-x]?[a-hA-H][1-8](?:=?[qrbnQRBN])?$";

/// A move token not glued to an ASCII letter or digit on its left. The
/// right edge is checked by [`tokens`]. Both sides are ASCII-only so that
/// moves written flush against CJK text still count.
static TOKEN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(&format!(r"(?:^|[^A-Za-z0-9])({MOVE_TOKEN})")).expect("move token regex")
});

static TOKEN_START: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(&format!(r"^{MOVE_TOKEN}")).expect("token start regex"));

static WHOLE_TOKEN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(&format!(r"^{MOVE_TOKEN}$")).expect("whole token regex"));

static LONG: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(LONG_ALGEBRAIC).expect("long algebraic regex"));

static TAGGED: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?is)<(uci_move|move|answer)>\s*(.*?)\s*(?:</(?:uci_move|move|answer)>|<|$)")
        .expect("tag regex")
});

static JSON_FIELD: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"(?i)"(?:uci_move|best_move|move|uci)"\s*:\s*"([^"]*)"?"#).expect("json regex")
});

static LABELLED: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)\b(?:final\s+|best\s+|my\s+|uci\s+)?move\s*(?:is)?\s*[:=]\s*(\S+)")
        .expect("label regex")
});

static THINK: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?is)<think>\s*(.*?)\s*(?:</think>|$)").expect("think regex")
});

static JSON_RATIONALE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"(?i)"(?:comment|rationale|reasoning|thoughts?)"\s*:\s*"([^"]*)"#)
        .expect("rationale regex")
});

/// Longest rationale forwarded to the evaluator.
const MAX_RATIONALE_CHARS: usize = 500;

/// Extract the first plausible move from `raw`. `None` is an ordinary
/// outcome, not an error.
pub fn extract_move(raw: &str) -> Option<CandidateMove> {
    let raw = raw.trim();
    if raw.is_empty() {
        return None;
    }
    let rationale = extract_rationale(raw);
    let (text, stage) = delimited(raw)
        .map(|t| (t, ExtractionStage::Delimited))
        .or_else(|| first_pattern(raw).map(|t| (t, ExtractionStage::Pattern)))
        .or_else(|| first_word(raw).map(|t| (t, ExtractionStage::FirstToken)))?;
    Some(CandidateMove {
        text,
        rationale,
        stage,
    })
}

/// Every move-like token in `raw`, normalized, in order of appearance and
/// without duplicates. Delimited fields come first.
pub fn candidate_tokens(raw: &str) -> Vec<String> {
    let mut out: Vec<String> = Vec::new();
    let mut push = |token: String| {
        if !out.contains(&token) {
            out.push(token);
        }
    };
    if let Some(token) = delimited(raw) {
        push(token);
    }
    for token in tokens(raw) {
        push(normalize(token));
    }
    out
}

/// Commentary from a `<think>` block or a JSON rationale field.
pub fn extract_rationale(raw: &str) -> Option<String> {
    let text = THINK
        .captures(raw)
        .or_else(|| JSON_RATIONALE.captures(raw))
        .and_then(|c| c.get(1))
        .map(|m| m.as_str().split_whitespace().collect::<Vec<_>>().join(" "))?;
    if text.is_empty() {
        return None;
    }
    Some(text.chars().take(MAX_RATIONALE_CHARS).collect())
}

fn delimited(raw: &str) -> Option<String> {
    let fields = TAGGED
        .captures_iter(raw)
        .filter_map(|c| c.get(2))
        .chain(JSON_FIELD.captures_iter(raw).filter_map(|c| c.get(1)))
        .chain(LABELLED.captures_iter(raw).filter_map(|c| c.get(1)));
    for field in fields {
        if let Some(token) = first_pattern(field.as_str()) {
            return Some(token);
        }
    }
    None
}

fn first_pattern(text: &str) -> Option<String> {
    tokens(text).first().map(|token| normalize(token))
}

/// Move-like tokens of `text` in order of appearance.
///
/// A token ends at the end of the text, at anything that is not an ASCII
/// letter or digit, or where the next token begins (`e2e4e2e4`). A
/// trailing promotion letter is given back when it starts the next token,
/// so `b2b4b2b4` gives `b2b4` and not `b2b4b`.
fn tokens(text: &str) -> Vec<&str> {
    let mut out = Vec::new();
    let mut from = 0;
    while let Some(m) = TOKEN.captures_at(text, from).and_then(|c| c.get(1)) {
        let Some(mut end) = clean_end(text, m.start(), m.end()) else {
            from = m.end();
            continue;
        };
        out.push(&text[m.start()..end]);
        // tokens run together, as in looping output
        while let Some(next) = TOKEN_START.find(&text[end..]) {
            let start = end;
            match clean_end(text, start, start + next.end()) {
                Some(next_end) => {
                    out.push(&text[start..next_end]);
                    end = next_end;
                }
                None => break,
            }
        }
        from = end;
    }
    out
}

/// Where the token matched at `start..end` really ends: at `end`, or one
/// letter earlier when that letter belongs to the next token.
fn clean_end(text: &str, start: usize, end: usize) -> Option<usize> {
    let shorter = text[start..end]
        .ends_with(|c: char| c.is_ascii_alphabetic())
        .then(|| end - 1);
    std::iter::once(end)
        .chain(shorter)
        .find(|&stop| WHOLE_TOKEN.is_match(&text[start..stop]) && ends_cleanly(&text[stop..]))
}

fn ends_cleanly(rest: &str) -> bool {
    match rest.chars().next() {
        None => true,
        Some(c) if !c.is_ascii_alphanumeric() => true,
        Some(_) => TOKEN_START.is_match(rest),
    }
}

fn first_word(raw: &str) -> Option<String> {
    let word = raw
        .split_whitespace()
        .next()?
        .trim_matches(|c: char| !c.is_ascii_alphanumeric() && c != '-' && c != '=');
    let mut chars = word.chars();
    let first = chars.next()?;
    let rest = chars.as_str();
    // `ng1f3`, `ng1-f3`: lowercase piece letter in front of long algebraic
    if "kqrbn".contains(first) && LONG.is_match(rest) {
        return Some(normalize(rest));
    }
    // `nf3`: lowercase piece letter in SAN
    if "kqrn".contains(first) {
        let upper = format!("{}{}", first.to_ascii_uppercase(), rest);
        if WHOLE_TOKEN.is_match(&upper) {
            return Some(normalize(&upper));
        }
    }
    None
}

/// Canonical spelling of a matched token: long algebraic becomes
/// lowercase UCI, castling uses the letter O, annotations are dropped.
pub fn normalize(token: &str) -> String {
    let token = token
        .trim_end_matches(['+', '#', '!', '?'])
        .replace('0', "O");
    if LONG.is_match(&token) {
        let squares = match token.as_bytes() {
            [b'K' | b'Q' | b'R' | b'B' | b'N', second, ..] if second.is_ascii_alphabetic() => {
                &token[1..]
            }
            _ => &token[..],
        };
        return squares
            .chars()
            .filter(|c| !matches!(c, '-' | 'x' | '='))
            .collect::<String>()
            .to_ascii_lowercase();
    }
    token
}

#[cfg(test)]
mod tests {
    use super::*;

    fn text(raw: &str) -> Option<String> {
        extract_move(raw).map(|c| c.text)
    }

    #[test]
    fn labelled_move_wins_over_prose() {
        let c = extract_move("I'll play e4. Move: e2e4").unwrap();
        assert_eq!(c.text, "e2e4");
        assert_eq!(c.stage, ExtractionStage::Delimited);
    }

    #[test]
    fn tagged_output() {
        let raw = "<think>Control the centre. Knight is better on f3.</think>\n<uci_move>g1f3</uci_move>";
        let c = extract_move(raw).unwrap();
        assert_eq!(c.text, "g1f3");
        assert_eq!(
            c.rationale.as_deref(),
            Some("Control the centre. Knight is better on f3.")
        );
    }

    #[test]
    fn truncated_generations() {
        assert_eq!(text("<think>Push the pawn</think><uci_move>d2d4"), Some("d2d4".into()));
        assert_eq!(text(r#"{"move": "e7e5", "comment": "symmetric"#), Some("e7e5".into()));
        assert_eq!(text(r#"{"move": "e2e4"#), Some("e2e4".into()));
        assert_eq!(text(r#"{"mo"#), None);
        assert_eq!(text("<think>I think the best plan is"), None);
    }

    #[test]
    fn nothing_to_find() {
        assert_eq!(text(""), None);
        assert_eq!(text("   \n "), None);
        assert_eq!(text("I am not sure what to do in this position."), None);
        assert_eq!(text("asdkj qwe zzz 12345"), None);
    }

    #[test]
    fn multiple_moves_take_the_first() {
        assert_eq!(text("e2e4 e7e5 g1f3 b8c6"), Some("e2e4".into()));
        assert_eq!(text("1. e4 e5 2. Nf3 Nc6"), Some("e4".into()));
        assert_eq!(text("Nf3 Nf3 Nf3 Nf3 Nf3 Nf3 Nf3"), Some("Nf3".into()));
        assert_eq!(
            text("<uci_move>c2c4</uci_move><uci_move>d2d4</uci_move>"),
            Some("c2c4".into())
        );
    }

    #[test]
    fn placeholder_tag_falls_through_to_pattern() {
        assert_eq!(
            text("<uci_move>your_move</uci_move> I choose d2d4"),
            Some("d2d4".into())
        );
    }

    #[test]
    fn mixed_language_and_notation_variants() {
        assert_eq!(text("我选择 e2e4，因为它控制中心"), Some("e2e4".into()));
        assert_eq!(text("Je joue Cf3... non, e2-e4!"), Some("e2e4".into()));
        assert_eq!(text("Castle: 0-0"), Some("O-O".into()));
        assert_eq!(text("Qxf7#"), Some("Qxf7".into()));
        assert_eq!(text("E2E4"), Some("e2e4".into()));
        assert_eq!(text("e7e8=Q"), Some("e7e8q".into()));
    }

    #[test]
    fn moves_flush_against_cjk_text() {
        assert_eq!(text("我选择e2e4因为它控制中心"), Some("e2e4".into()));
        assert_eq!(text("最佳着法是Nf3。"), Some("Nf3".into()));
        assert_eq!(text("走g1f3吧"), Some("g1f3".into()));
    }

    #[test]
    fn looping_output_without_spaces() {
        assert_eq!(text("e2e4e2e4e2e4e2e4"), Some("e2e4".into()));
        assert_eq!(text("Nf3Nf3Nf3Nf3"), Some("Nf3".into()));
        assert_eq!(text("b2b4b2b4b2b4"), Some("b2b4".into()));
        assert_eq!(candidate_tokens("d2d4g1f3d2d4"), ["d2d4", "g1f3"]);
    }

    #[test]
    fn glued_to_ascii_is_not_a_move() {
        assert_eq!(text("abe4 xe2e4y"), None);
        assert_eq!(text("e2e45 then c2c4"), Some("c2c4".into()));
    }

    #[test]
    fn first_word_heuristic() {
        let c = extract_move("nf3 develops").unwrap();
        assert_eq!(c.text, "Nf3");
        assert_eq!(c.stage, ExtractionStage::FirstToken);
        assert_eq!(text("ng1f3 maybe"), Some("g1f3".into()));
    }

    #[test]
    fn piece_prefixed_long_algebraic() {
        assert_eq!(text("Ng1-f3"), Some("g1f3".into()));
        assert_eq!(text("I like Bf1xb5 here"), Some("f1b5".into()));
    }

    #[test]
    fn collects_all_tokens_in_order() {
        let tokens = candidate_tokens("Maybe e2e5? No: Nf3 or e2e4, e2e4 again.");
        assert_eq!(tokens, ["e2e5", "Nf3", "e2e4"]);
    }
}
