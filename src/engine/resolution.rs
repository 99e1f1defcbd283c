use crate::model::directive::Extraction;
use crate::model::game_state::{EndingType, MAX_STABILITY, MIN_STABILITY};

/// What a finished turn commits to state.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TurnResolution {
    pub text: String,
    pub stability: i32,
    pub stability_changed: bool,
    pub ending: Option<EndingType>,
    pub visual_prompt: Option<String>,
    /// The ending was synthesized from stability hitting zero.
    pub forced_collapse: bool,
}

pub fn clamp_stability(value: i32) -> i32 {
    value.clamp(MIN_STABILITY, MAX_STABILITY)
}

/// Apply stability clamping and the collapse fallback to an extraction.
///
/// An extracted stability at or below zero with no ending marker always
/// resolves to `EndingType::Collapse`.
pub fn resolve(extraction: Extraction, current_stability: i32) -> TurnResolution {
    let Extraction { text, directives } = extraction;

    let mut ending = directives.ending;
    let mut forced_collapse = false;
    if let Some(raw) = directives.stability {
        if raw <= MIN_STABILITY && ending.is_none() {
            ending = Some(EndingType::Collapse);
            forced_collapse = true;
        }
    }

    let stability = match directives.stability {
        Some(raw) => clamp_stability(raw),
        None => clamp_stability(current_stability),
    };

    TurnResolution {
        text,
        stability,
        stability_changed: directives.stability.is_some(),
        ending,
        visual_prompt: directives.visual_prompt,
        forced_collapse,
    }
}

/// The opening scene only sets the starting stability and the first
/// illustration. Ending markers are stripped from the text but not acted on.
pub fn resolve_opening(extraction: Extraction, current_stability: i32) -> TurnResolution {
    TurnResolution {
        ending: None,
        forced_collapse: false,
        ..resolve(extraction, current_stability)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::directive_parser::extract_directives;

    #[test]
    fn zero_without_ending_collapses() {
        let r = resolve(extract_directives("The walls fold inward. [STABILITY: 0]"), 12);
        assert_eq!(r.ending, Some(EndingType::Collapse));
        assert!(r.forced_collapse);
        assert_eq!(r.stability, 0);
    }

    #[test]
    fn negative_is_clamped_and_collapses() {
        let r = resolve(extract_directives("[STABILITY: -40]"), 12);
        assert_eq!(r.stability, 0);
        assert_eq!(r.ending, Some(EndingType::Collapse));
    }

    #[test]
    fn explicit_ending_wins_over_fallback() {
        let r = resolve(extract_directives("[STABILITY: 0][ENDING: DEATH]"), 5);
        assert_eq!(r.ending, Some(EndingType::Death));
        assert!(!r.forced_collapse);
    }

    #[test]
    fn overflow_is_clamped_to_max() {
        let r = resolve(extract_directives("Calm returns. [STABILITY: 150]"), 40);
        assert_eq!(r.stability, 100);
        assert_eq!(r.ending, None);
    }

    #[test]
    fn opening_ignores_endings_and_the_collapse_fallback() {
        let r = resolve_opening(extract_directives("You wake. [ENDING: DEATH] [STABILITY: 0]"), 100);
        assert_eq!(r.text, "You wake.");
        assert_eq!(r.stability, 0);
        assert_eq!(r.ending, None);
        assert!(!r.forced_collapse);
    }

    #[test]
    fn missing_stability_keeps_current() {
        let r = resolve(extract_directives("Nothing happens."), 57);
        assert_eq!(r.stability, 57);
        assert!(!r.stability_changed);
        assert_eq!(r.ending, None);
    }
}
