use crate::model::game_state::EndingType;

/// Control markers pulled out of one block of generated text.
/// Never persisted.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Directives {
    pub ending: Option<EndingType>,
    pub stability: Option<i32>,
    pub visual_prompt: Option<String>,
}

impl Directives {
    pub fn is_empty(&self) -> bool {
        self.ending.is_none() && self.stability.is_none() && self.visual_prompt.is_none()
    }
}

/// Cleaned prose plus whatever markers were found in it.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Extraction {
    pub text: String,
    pub directives: Directives,
}
