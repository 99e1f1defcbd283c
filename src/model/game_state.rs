use serde::{Deserialize, Serialize};
use std::fmt;

use crate::model::message::{Message, Sender};

pub const MAX_STABILITY: i32 = 100;
pub const MIN_STABILITY: i32 = 0;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum GameStatus {
    #[default]
    #[serde(alias = "ANALYZING")]
    Idle,
    Playing,
    GameOver,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum EndingType {
    /// Stability reached zero, the world line ends.
    Collapse,
    Contained,
    Death,
    Escaped,
    /// An ending was signalled with a token we do not recognise.
    Unknown,
}

impl EndingType {
    /// Parse a marker token. Unrecognised tokens still count as an ending.
    pub fn from_token(token: &str) -> Self {
        match token.trim().to_ascii_uppercase().as_str() {
            "COLLAPSE" => EndingType::Collapse,
            "CONTAINED" => EndingType::Contained,
            "DEATH" => EndingType::Death,
            "ESCAPED" => EndingType::Escaped,
            _ => EndingType::Unknown,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            EndingType::Collapse => "COLLAPSE",
            EndingType::Contained => "CONTAINED",
            EndingType::Death => "DEATH",
            EndingType::Escaped => "ESCAPED",
            EndingType::Unknown => "UNKNOWN",
        }
    }
}

impl fmt::Display for EndingType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Language {
    Zh,
    #[default]
    En,
}

impl Language {
    pub fn parse(tag: &str) -> Option<Self> {
        match tag.trim().to_ascii_lowercase().as_str() {
            "zh" | "zh-cn" | "cn" => Some(Language::Zh),
            "en" | "en-us" | "en-gb" => Some(Language::En),
            _ => None,
        }
    }

    pub fn tag(&self) -> &'static str {
        match self {
            Language::Zh => "zh",
            Language::En => "en",
        }
    }
}

/// The narrative subject a session is built around.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SubjectDescriptor {
    /// e.g. `SCP-173`
    pub designation: String,
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    pub containment_class: String,

    /// Keywords for the abstract background image.
    #[serde(default)]
    pub visual_description: Option<String>,

    /// Physical appearance, for the main subject image.
    #[serde(default)]
    pub entity_description: Option<String>,
}

/// One entry of the raw model conversation, kept only for session restore.
///
/// Reads both `{role, content}` and the `{role, parts: [{text}]}` history
/// shape, where the reply role is `model`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "StoredChatMessage")]
pub struct ChatMessage {
    pub role: String,
    pub content: String,
}

#[derive(Deserialize)]
struct ChatPart {
    #[serde(default)]
    text: String,
}

#[derive(Deserialize)]
#[serde(untagged)]
enum StoredChatMessage {
    Plain { role: String, content: String },
    Parts { role: String, parts: Vec<ChatPart> },
}

impl From<StoredChatMessage> for ChatMessage {
    fn from(stored: StoredChatMessage) -> Self {
        match stored {
            StoredChatMessage::Plain { role, content } => ChatMessage { role, content },
            StoredChatMessage::Parts { role, parts } => ChatMessage {
                role: if role == "model" { "assistant".into() } else { role },
                content: parts.into_iter().map(|p| p.text).collect(),
            },
        }
    }
}

/// Root aggregate of a live session. Field names match the save payloads
/// already stored in the shared table.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GameState {
    pub status: GameStatus,
    #[serde(rename = "scpData")]
    pub subject: Option<SubjectDescriptor>,
    pub role: String,
    pub messages: Vec<Message>,
    pub background_image: Option<String>,
    pub main_image: Option<String>,
    pub stability: i32,
    pub turn_count: u32,
    pub ending_type: Option<EndingType>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub chat_history: Option<Vec<ChatMessage>>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub language: Option<Language>,
}

impl Default for GameState {
    fn default() -> Self {
        Self {
            status: GameStatus::Idle,
            subject: None,
            role: String::new(),
            messages: Vec::new(),
            background_image: None,
            main_image: None,
            stability: MAX_STABILITY,
            turn_count: 0,
            ending_type: None,
            chat_history: None,
            language: None,
        }
    }
}

impl GameState {
    pub fn message(&self, id: &str) -> Option<&Message> {
        self.messages.iter().find(|m| m.id == id)
    }

    pub fn message_mut(&mut self, id: &str) -> Option<&mut Message> {
        self.messages.iter_mut().find(|m| m.id == id)
    }

    pub fn language(&self) -> Language {
        self.language.unwrap_or_default()
    }

    pub fn designation(&self) -> &str {
        self.subject
            .as_ref()
            .map(|s| s.designation.as_str())
            .filter(|d| !d.trim().is_empty())
            .unwrap_or("Unknown Subject")
    }

    /// Human readable summary used by save listings.
    pub fn save_summary(&self) -> String {
        format!("Turn {}\n{} - {}", self.turn_count, self.designation(), self.role)
    }

    /// Stability over time, read only from finalized narrator snapshots.
    pub fn stability_timeline(&self) -> Vec<i32> {
        self.messages
            .iter()
            .filter(|m| m.sender == Sender::Narrator)
            .filter_map(|m| m.stability_snapshot)
            .collect()
    }

    /// `game_over` must always carry an ending.
    pub fn is_consistent(&self) -> bool {
        self.status != GameStatus::GameOver || self.ending_type.is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ending_tokens_are_case_insensitive() {
        assert_eq!(EndingType::from_token("contained"), EndingType::Contained);
        assert_eq!(EndingType::from_token("Death"), EndingType::Death);
        assert_eq!(EndingType::from_token("ESCAPED"), EndingType::Escaped);
        assert_eq!(EndingType::from_token("collapse"), EndingType::Collapse);
        assert_eq!(EndingType::from_token("ASCENDED"), EndingType::Unknown);
    }

    #[test]
    fn timeline_skips_user_and_unfinished_messages() {
        let mut state = GameState::default();
        state.messages.push(Message::user("look around", 1));
        let mut first = Message::narrator_placeholder(2);
        first.finalize("a".into(), Some(90));
        state.messages.push(first);
        state.messages.push(Message::narrator_placeholder(3));
        let mut second = Message::narrator_placeholder(4);
        second.finalize("b".into(), Some(74));
        state.messages.push(second);

        assert_eq!(state.stability_timeline(), vec![90, 74]);
    }

    #[test]
    fn summary_falls_back_without_subject() {
        let state = GameState {
            turn_count: 4,
            role: "Researcher".into(),
            ..GameState::default()
        };
        assert_eq!(state.save_summary(), "Turn 4\nUnknown Subject - Researcher");
    }

    #[test]
    fn reads_stored_camel_case_state() {
        let json = serde_json::json!({
            "status": "GAME_OVER",
            "scpData": {
                "designation": "SCP-173",
                "name": "The Sculpture",
                "description": null,
                "containmentClass": "Euclid",
                "visualDescription": "concrete, rust"
            },
            "role": "D-Class",
            "messages": [
                {"id": "m1", "sender": "system", "content": "Link established.", "timestamp": 1},
                {"id": "m2", "sender": "narrator", "content": "It moved.", "timestamp": 2,
                 "imageUrl": "data:image/png;base64,AA==", "stabilitySnapshot": 40}
            ],
            "backgroundImage": null,
            "mainImage": null,
            "stability": 0,
            "turnCount": 6,
            "endingType": "DEATH",
            "chatHistory": [
                {"role": "user", "parts": [{"text": "blink"}]},
                {"role": "model", "parts": [{"text": "It "}, {"text": "moved."}]}
            ],
            "language": "en",
            "gameReview": null,
            "qaHistory": []
        });

        let state: GameState = serde_json::from_value(json).unwrap();
        assert_eq!(state.status, GameStatus::GameOver);
        assert_eq!(state.ending_type, Some(EndingType::Death));
        assert_eq!(state.turn_count, 6);
        let subject = state.subject.as_ref().unwrap();
        assert_eq!(subject.containment_class, "Euclid");
        assert_eq!(subject.visual_description.as_deref(), Some("concrete, rust"));
        assert_eq!(state.messages[0].sender, Sender::System);
        assert_eq!(state.messages[1].stability_snapshot, Some(40));
        assert_eq!(state.stability_timeline(), vec![40]);

        let history = state.chat_history.unwrap();
        assert_eq!(history[1].role, "assistant");
        assert_eq!(history[1].content, "It moved.");
    }

    #[test]
    fn writes_camel_case_state() {
        let state = GameState {
            status: GameStatus::Playing,
            turn_count: 2,
            ..GameState::default()
        };
        let json = serde_json::to_value(&state).unwrap();
        assert_eq!(json["status"], "PLAYING");
        assert_eq!(json["turnCount"], 2);
        assert!(json.get("scpData").is_some());
        assert!(json.get("turn_count").is_none());
    }

    #[test]
    fn language_tags() {
        assert_eq!(Language::parse("ZH"), Some(Language::Zh));
        assert_eq!(Language::parse("en"), Some(Language::En));
        assert_eq!(Language::parse("fr"), None);
        assert_eq!(Language::Zh.tag(), "zh");
    }
}
