use crate::engine::illustration::ImageTarget;
use crate::engine::turn::{IgnoreReason, TurnFailure};
use crate::model::game_state::{EndingType, GameState, GameStatus, Language, SubjectDescriptor};
use crate::model::message::Message;
use crate::model::save_record::SaveMetadata;
use crate::store::error::StoreError;
use crate::store::sync::SaveEntry;
use crate::store::Identity;

/// Requests from the front-end.
#[derive(Debug, Clone)]
pub enum EngineCommand {
    StartSession {
        subject: SubjectDescriptor,
        role: String,
        language: Language,
    },
    UserInput(String),
    /// Skip the rest of the ending countdown.
    EnterEnding,
    CancelCountdown,
    ResetSession,

    SaveGame { id: Option<String> },
    ListSaves,
    LoadSave { id: String },
    DeleteSave { id: String },

    SignIn(Identity),
    SignOut,

    Shutdown,
}

/// Compact view of the session after a change.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SessionStatus {
    pub status: GameStatus,
    pub stability: i32,
    pub turn_count: u32,
    pub ending: Option<EndingType>,
}

impl SessionStatus {
    pub fn of(state: &GameState) -> Self {
        Self {
            status: state.status,
            stability: state.stability,
            turn_count: state.turn_count,
            ending: state.ending_type,
        }
    }
}

#[derive(Debug)]
pub enum EngineResponse {
    FullMessageHistory(Vec<Message>),

    /// Partial narrator content while a response streams in.
    MessagePatched { id: String, content: String },

    TurnIgnored(IgnoreReason),
    TurnCompleted {
        narrator_id: String,
        text: String,
        stability: i32,
        ending: Option<EndingType>,
    },
    TurnFailed {
        failure: TurnFailure,
        /// Input to put back into the input field.
        restore_input: Option<String>,
    },
    SessionStartFailed(TurnFailure),

    ImageAttached(ImageTarget),
    StateChanged(SessionStatus),

    CountdownStarted { ending: EndingType, remaining: u32 },
    CountdownTick(u32),
    CountdownCancelled,
    /// The session is archived. Carries stability after each narrator
    /// message, oldest first.
    GameOver { ending: EndingType, timeline: Vec<i32> },

    SaveList(Vec<SaveEntry>),
    Saved(SaveMetadata),
    Loaded { id: String },
    Deleted { id: String },
    StoreFailed { action: &'static str, error: StoreError },

    SignedIn { user_id: String },
    SignedOut,
}

/// Everything that lands in the engine inbox: front-end commands plus
/// results posted back by helper threads.
#[derive(Debug)]
pub(crate) enum EngineEvent {
    Command(EngineCommand),
    Chunk { turn_id: u64, text: String },
    StreamEnded { turn_id: u64 },
    StreamFailed { turn_id: u64, error: String },
    ImageReady { target: ImageTarget, image: String },
}
