use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Sender {
    User,
    /// Out-of-story notices.
    System,
    Narrator,
}

/// One transcript entry.
///
/// Narrator messages are created empty with `is_typing` set, patched while the
/// stream arrives and finalized once directives have been extracted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Message {
    pub id: String,
    pub sender: Sender,
    pub content: String,

    /// Milliseconds since the Unix epoch.
    pub timestamp: i64,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image_url: Option<String>,

    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub is_typing: bool,

    /// Stability in effect when this narrator message was finalized.
    /// Set once, never rewritten.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stability_snapshot: Option<i32>,
}

impl Message {
    pub fn user(content: impl Into<String>, timestamp: i64) -> Self {
        Self {
            id: new_message_id(),
            sender: Sender::User,
            content: content.into(),
            timestamp,
            image_url: None,
            is_typing: false,
            stability_snapshot: None,
        }
    }

    /// Empty narrator placeholder that stream chunks are written into.
    pub fn narrator_placeholder(timestamp: i64) -> Self {
        Self {
            id: new_message_id(),
            sender: Sender::Narrator,
            content: String::new(),
            timestamp,
            image_url: None,
            is_typing: true,
            stability_snapshot: None,
        }
    }

    pub fn is_narrator(&self) -> bool {
        self.sender == Sender::Narrator
    }

    /// Finalize a narrator message. The snapshot is only stamped the first time.
    pub fn finalize(&mut self, content: String, stability: Option<i32>) {
        self.content = content;
        self.is_typing = false;
        if self.stability_snapshot.is_none() {
            self.stability_snapshot = stability;
        }
    }
}

fn new_message_id() -> String {
    uuid::Uuid::new_v4().to_string()
}
