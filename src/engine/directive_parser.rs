use regex::Regex;
use std::sync::LazyLock;

use crate::model::directive::{Directives, Extraction};
use crate::model::game_state::EndingType;

// [ENDING: CONTAINED]
static ENDING_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\[ENDING\s*:\s*(\w+)\s*\]").expect("valid ending pattern"));

// [STABILITY: 68]
static STABILITY_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\[STABILITY\s*:\s*(-?\d+)\s*\]").expect("valid stability pattern")
});

// [VISUAL: ...], plus two misspellings found in older transcripts.
static VISUAL_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\[(?:VISUAL|VISIBILITY|VISABILITY)\s*:([^\]]*)\]").expect("valid visual pattern")
});

/// Strip the first ending marker.
pub fn extract_ending(text: &str) -> (String, Option<EndingType>) {
    let Some(caps) = ENDING_RE.captures(text) else {
        return (text.trim().to_string(), None);
    };

    let ending = EndingType::from_token(&caps[1]);
    (strip_match(text, caps.get(0)), Some(ending))
}

/// Strip the first stability marker. The value is not clamped here.
pub fn extract_stability(text: &str) -> (String, Option<i32>) {
    let Some(caps) = STABILITY_RE.captures(text) else {
        return (text.trim().to_string(), None);
    };

    (strip_match(text, caps.get(0)), Some(parse_saturating(&caps[1])))
}

/// Strip the first visual marker and return its prompt.
pub fn extract_visual(text: &str) -> (String, Option<String>) {
    let Some(caps) = VISUAL_RE.captures(text) else {
        return (text.trim().to_string(), None);
    };

    let prompt = caps[1].trim().to_string();
    let prompt = (!prompt.is_empty()).then_some(prompt);
    (strip_match(text, caps.get(0)), prompt)
}

/// Run all three extractors in order: ending, stability, visual.
/// Each one works on the output of the previous.
pub fn extract_directives(text: &str) -> Extraction {
    let (text, ending) = extract_ending(text);
    let (text, stability) = extract_stability(&text);
    let (text, visual_prompt) = extract_visual(&text);

    Extraction {
        text,
        directives: Directives {
            ending,
            stability,
            visual_prompt,
        },
    }
}

fn strip_match(text: &str, m: Option<regex::Match<'_>>) -> String {
    match m {
        Some(m) => {
            let mut out = String::with_capacity(text.len());
            out.push_str(&text[..m.start()]);
            out.push_str(&text[m.end()..]);
            out.trim().to_string()
        }
        None => text.trim().to_string(),
    }
}

fn parse_saturating(digits: &str) -> i32 {
    match digits.parse::<i64>() {
        Ok(v) => v.clamp(i32::MIN as i64, i32::MAX as i64) as i32,
        Err(_) if digits.starts_with('-') => i32::MIN,
        Err(_) => i32::MAX,
    }
}
