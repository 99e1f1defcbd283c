use crate::engine::prompt_builder::PromptBuilder;
use crate::model::game_state::{ChatMessage, Language};

/// One conversation with the model.
///
/// Owned by the engine and passed explicitly to the text source; the history
/// only grows after an exchange completed, so an abandoned stream leaves no
/// half answer behind.
#[derive(Debug, Clone, PartialEq)]
pub struct ChatSession {
    system: String,
    history: Vec<ChatMessage>,
}

impl ChatSession {
    pub fn start(role: &str, language: Language) -> Self {
        Self::restore(Vec::new(), role, language)
    }

    pub fn restore(history: Vec<ChatMessage>, role: &str, language: Language) -> Self {
        Self {
            system: PromptBuilder::system_instruction(role, language),
            history,
        }
    }

    /// Messages for the next request: system, history, then `prompt`.
    pub fn request(&self, prompt: &str) -> Vec<ChatMessage> {
        let mut messages = Vec::with_capacity(self.history.len() + 2);
        messages.push(ChatMessage {
            role: "system".into(),
            content: self.system.clone(),
        });
        messages.extend(self.history.iter().cloned());
        messages.push(ChatMessage {
            role: "user".into(),
            content: prompt.to_string(),
        });
        messages
    }

    pub fn record(&mut self, prompt: String, reply: String) {
        self.history.push(ChatMessage {
            role: "user".into(),
            content: prompt,
        });
        self.history.push(ChatMessage {
            role: "assistant".into(),
            content: reply,
        });
    }

    pub fn history(&self) -> &[ChatMessage] {
        &self.history
    }
}
