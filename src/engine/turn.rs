use crate::engine::directive_parser::extract_directives;
use crate::engine::resolution::{resolve, resolve_opening, TurnResolution};
use crate::model::game_state::{GameState, GameStatus, Language, SubjectDescriptor, MAX_STABILITY};
use crate::model::message::Message;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TurnFailure {
    /// No complete response inside the turn deadline. Worth retrying.
    #[error("response timed out")]
    Timeout,
    #[error("stream failed: {0}")]
    Stream(String),
}

impl TurnFailure {
    pub fn is_retryable(&self) -> bool {
        matches!(self, TurnFailure::Timeout)
    }
}

pub fn failure_text(language: Language, failure: &TurnFailure) -> &'static str {
    match (language, failure) {
        (Language::En, TurnFailure::Timeout) => {
            "⚠️ [CONNECTION TIMEOUT] Response took too long. Input restored. Please retry."
        }
        (Language::En, TurnFailure::Stream(_)) => {
            "⚠️ [SPINDLE OFFLINE] Loom of Fate sync interrupted. Causal thread unresponsive. Reconnect or sever link."
        }
        (Language::Zh, TurnFailure::Timeout) => "⚠️ [连接超时] 响应时间过长。已自动恢复输入，请重试。",
        (Language::Zh, TurnFailure::Stream(_)) => {
            "⚠️ [纺锤脱机] 命运织机同步中断。当前因果线程无响应，请尝试重连或强制剪断链接。"
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TurnKind {
    /// Opening narration of a new session.
    Intro,
    Action,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IgnoreReason {
    EmptyInput,
    TurnInFlight,
    SessionNotActive,
}

/// Everything the stream pump needs to open the request for a turn.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TurnTicket {
    pub turn_id: u64,
    pub kind: TurnKind,
    pub narrator_id: String,
    pub action: String,
    pub stability: i32,
    pub turn_count: u32,
    pub language: Language,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BeginTurn {
    Started(TurnTicket),
    Ignored(IgnoreReason),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TurnOutcome {
    pub turn_id: u64,
    pub kind: TurnKind,
    pub narrator_id: String,
    /// Unmodified model output, kept for the conversation history.
    pub raw_text: String,
    pub resolution: TurnResolution,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FailedTurn {
    pub turn_id: u64,
    pub kind: TurnKind,
    pub narrator_id: String,
    pub failure: TurnFailure,
    /// Set only for retryable failures.
    pub restore_input: Option<String>,
}

#[derive(Debug)]
struct PendingTurn {
    id: u64,
    kind: TurnKind,
    narrator_id: String,
    original_input: String,
    buffer: String,
}

/// Turns one player input into one committed state transition.
///
/// At most one turn is pending at a time. Every method that touches a turn
/// takes its id, so late events from an abandoned turn are dropped.
#[derive(Debug, Default)]
pub struct TurnController {
    next_id: u64,
    pending: Option<PendingTurn>,
}

impl TurnController {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_in_flight(&self) -> bool {
        self.pending.is_some()
    }

    /// Start a player turn: append the user message and an empty narrator
    /// placeholder, bump the turn counter.
    pub fn begin(&mut self, state: &mut GameState, input: &str, now_ms: i64) -> BeginTurn {
        let action = input.trim();
        if action.is_empty() {
            return BeginTurn::Ignored(IgnoreReason::EmptyInput);
        }
        if self.pending.is_some() {
            return BeginTurn::Ignored(IgnoreReason::TurnInFlight);
        }
        if state.status != GameStatus::Playing || state.ending_type.is_some() {
            return BeginTurn::Ignored(IgnoreReason::SessionNotActive);
        }

        state.messages.push(Message::user(action, now_ms));
        state.turn_count += 1;

        let placeholder = Message::narrator_placeholder(now_ms);
        let narrator_id = placeholder.id.clone();
        state.messages.push(placeholder);

        let ticket = TurnTicket {
            turn_id: self.allocate_id(),
            kind: TurnKind::Action,
            narrator_id: narrator_id.clone(),
            action: action.to_string(),
            stability: state.stability,
            turn_count: state.turn_count,
            language: state.language(),
        };

        self.pending = Some(PendingTurn {
            id: ticket.turn_id,
            kind: TurnKind::Action,
            narrator_id,
            original_input: input.to_string(),
            buffer: String::new(),
        });

        BeginTurn::Started(ticket)
    }

    /// Reset the state for a new session and start its opening narration.
    /// Status flips to `playing` once the first chunk arrives.
    pub fn begin_intro(
        &mut self,
        state: &mut GameState,
        subject: SubjectDescriptor,
        role: &str,
        language: Language,
        now_ms: i64,
    ) -> BeginTurn {
        if self.pending.is_some() {
            return BeginTurn::Ignored(IgnoreReason::TurnInFlight);
        }

        let placeholder = Message::narrator_placeholder(now_ms);
        let narrator_id = placeholder.id.clone();
        *state = GameState {
            subject: Some(subject),
            role: role.trim().to_string(),
            language: Some(language),
            messages: vec![placeholder],
            ..GameState::default()
        };

        let ticket = TurnTicket {
            turn_id: self.allocate_id(),
            kind: TurnKind::Intro,
            narrator_id: narrator_id.clone(),
            action: String::new(),
            stability: MAX_STABILITY,
            turn_count: 0,
            language,
        };

        self.pending = Some(PendingTurn {
            id: ticket.turn_id,
            kind: TurnKind::Intro,
            narrator_id,
            original_input: String::new(),
            buffer: String::new(),
        });

        BeginTurn::Started(ticket)
    }

    /// Append a stream chunk and patch the narrator message with the buffer.
    /// Returns the new partial content, or `None` for a stale turn.
    pub fn apply_chunk(&mut self, state: &mut GameState, turn_id: u64, chunk: &str) -> Option<String> {
        let pending = self.pending.as_mut().filter(|p| p.id == turn_id)?;
        pending.buffer.push_str(chunk);

        if pending.kind == TurnKind::Intro && state.status == GameStatus::Idle {
            state.status = GameStatus::Playing;
        }

        let msg = state.message_mut(&pending.narrator_id)?;
        msg.content.clone_from(&pending.buffer);
        Some(pending.buffer.clone())
    }

    /// The stream ended: extract directives and commit.
    pub fn complete(&mut self, state: &mut GameState, turn_id: u64) -> Option<TurnOutcome> {
        let pending = self.take(turn_id)?;

        if pending.buffer.trim().is_empty() {
            log::warn!("turn {} finished with an empty response", pending.id);
        }

        let extraction = extract_directives(&pending.buffer);
        let resolution = match pending.kind {
            TurnKind::Intro => resolve_opening(extraction, state.stability),
            TurnKind::Action => resolve(extraction, state.stability),
        };

        if pending.kind == TurnKind::Intro && state.status == GameStatus::Idle {
            state.status = GameStatus::Playing;
        }
        state.stability = resolution.stability;
        if let Some(ending) = resolution.ending {
            state.ending_type = Some(ending);
        }
        if let Some(msg) = state.message_mut(&pending.narrator_id) {
            msg.finalize(resolution.text.clone(), Some(resolution.stability));
        }

        if resolution.forced_collapse {
            log::info!("stability reached zero without an ending marker, forcing collapse");
        }

        Some(TurnOutcome {
            turn_id: pending.id,
            kind: pending.kind,
            narrator_id: pending.narrator_id,
            raw_text: pending.buffer,
            resolution,
        })
    }

    /// The stream timed out or failed. The narrator placeholder becomes an
    /// error entry; a failed intro drops the half-started session.
    pub fn fail(&mut self, state: &mut GameState, turn_id: u64, failure: TurnFailure) -> Option<FailedTurn> {
        let pending = self.take(turn_id)?;

        match pending.kind {
            TurnKind::Action => {
                let text = failure_text(state.language(), &failure).to_string();
                if let Some(msg) = state.message_mut(&pending.narrator_id) {
                    msg.finalize(text, None);
                }
            }
            TurnKind::Intro => *state = GameState::default(),
        }

        let restore_input = (pending.kind == TurnKind::Action && failure.is_retryable())
            .then_some(pending.original_input);

        Some(FailedTurn {
            turn_id: pending.id,
            kind: pending.kind,
            narrator_id: pending.narrator_id,
            failure,
            restore_input,
        })
    }

    /// Forget any pending turn. Its late events will be ignored.
    pub fn reset(&mut self) {
        self.pending = None;
    }

    fn take(&mut self, turn_id: u64) -> Option<PendingTurn> {
        match &self.pending {
            Some(p) if p.id == turn_id => self.pending.take(),
            _ => None,
        }
    }

    fn allocate_id(&mut self) -> u64 {
        self.next_id += 1;
        self.next_id
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::game_state::EndingType;
    use crate::model::message::Sender;

    fn playing(stability: i32, turn_count: u32) -> GameState {
        GameState {
            status: GameStatus::Playing,
            stability,
            turn_count,
            role: "Researcher".into(),
            ..GameState::default()
        }
    }

    fn started(b: BeginTurn) -> TurnTicket {
        match b {
            BeginTurn::Started(t) => t,
            other => panic!("expected a started turn, got {other:?}"),
        }
    }

    #[test]
    fn open_the_door() {
        let mut state = playing(82, 3);
        let mut turns = TurnController::new();

        let ticket = started(turns.begin(&mut state, "open the door", 1));
        assert_eq!(ticket.turn_count, 4);
        assert_eq!(ticket.stability, 82);

        turns.apply_chunk(&mut state, ticket.turn_id, "The door creaks ");
        let partial = state.message(&ticket.narrator_id).map(|m| m.content.clone());
        assert_eq!(partial.as_deref(), Some("The door creaks "));

        turns.apply_chunk(&mut state, ticket.turn_id, "open. [STABILITY: 68]");
        let outcome = turns.complete(&mut state, ticket.turn_id).expect("outcome");

        assert_eq!(state.stability, 68);
        assert_eq!(state.ending_type, None);
        assert_eq!(state.messages.len(), 2);
        assert_eq!(outcome.raw_text, "The door creaks open. [STABILITY: 68]");

        let narrator = &state.messages[1];
        assert_eq!(narrator.sender, Sender::Narrator);
        assert_eq!(narrator.content, "The door creaks open.");
        assert_eq!(narrator.stability_snapshot, Some(68));
        assert!(!narrator.is_typing);
        assert!(!turns.is_in_flight());
    }

    #[test]
    fn second_dispatch_while_in_flight_is_ignored() {
        let mut state = playing(80, 0);
        let mut turns = TurnController::new();
        started(turns.begin(&mut state, "run", 1));
        let len = state.messages.len();

        assert_eq!(
            turns.begin(&mut state, "hide", 2),
            BeginTurn::Ignored(IgnoreReason::TurnInFlight)
        );
        assert_eq!(state.messages.len(), len);
        assert_eq!(state.turn_count, 1);
    }

    #[test]
    fn whitespace_input_is_a_no_op() {
        let mut state = playing(80, 0);
        let mut turns = TurnController::new();
        assert_eq!(
            turns.begin(&mut state, "   \n", 1),
            BeginTurn::Ignored(IgnoreReason::EmptyInput)
        );
        assert!(state.messages.is_empty());
    }

    #[test]
    fn timeout_restores_input_and_appends_one_error() {
        let mut state = playing(80, 0);
        let mut turns = TurnController::new();
        let ticket = started(turns.begin(&mut state, "call for help", 1));

        let failed = turns
            .fail(&mut state, ticket.turn_id, TurnFailure::Timeout)
            .expect("failed turn");

        assert_eq!(failed.restore_input.as_deref(), Some("call for help"));
        assert_eq!(state.messages.len(), 2);
        assert_eq!(state.messages[1].content, failure_text(Language::En, &TurnFailure::Timeout));
        assert_eq!(state.status, GameStatus::Playing);
        assert!(!turns.is_in_flight());

        // A late stream end for the abandoned turn changes nothing.
        assert!(turns.complete(&mut state, ticket.turn_id).is_none());
        assert_eq!(state.messages.len(), 2);
    }

    #[test]
    fn stream_error_does_not_restore_input() {
        let mut state = playing(80, 0);
        let mut turns = TurnController::new();
        let ticket = started(turns.begin(&mut state, "shout", 1));
        let failed = turns
            .fail(&mut state, ticket.turn_id, TurnFailure::Stream("reset".into()))
            .expect("failed turn");
        assert_eq!(failed.restore_input, None);
        assert!(state.messages[1].content.contains("OFFLINE"));
    }

    #[test]
    fn zero_stability_commits_collapse() {
        let mut state = playing(9, 10);
        let mut turns = TurnController::new();
        let ticket = started(turns.begin(&mut state, "touch it", 1));
        turns.apply_chunk(&mut state, ticket.turn_id, "[STABILITY: 0]");
        turns.complete(&mut state, ticket.turn_id);

        assert_eq!(state.ending_type, Some(EndingType::Collapse));
        assert_eq!(state.stability, 0);
        assert_eq!(
            turns.begin(&mut state, "again", 2),
            BeginTurn::Ignored(IgnoreReason::SessionNotActive)
        );
    }

    #[test]
    fn intro_flips_to_playing_on_first_chunk() {
        let mut state = GameState::default();
        let mut turns = TurnController::new();
        let subject = SubjectDescriptor {
            designation: "SCP-173".into(),
            ..SubjectDescriptor::default()
        };
        let ticket = started(turns.begin_intro(&mut state, subject, "D-Class", Language::Zh, 1));
        assert_eq!(state.status, GameStatus::Idle);

        turns.apply_chunk(&mut state, ticket.turn_id, "你醒来了。");
        assert_eq!(state.status, GameStatus::Playing);

        turns.apply_chunk(&mut state, ticket.turn_id, "[VISUAL: concrete statue]");
        let outcome = turns.complete(&mut state, ticket.turn_id).expect("outcome");
        assert_eq!(state.stability, 100);
        assert_eq!(state.turn_count, 0);
        assert_eq!(state.messages[0].content, "你醒来了。");
        assert_eq!(outcome.resolution.visual_prompt.as_deref(), Some("concrete statue"));
    }

    #[test]
    fn intro_never_ends_the_session() {
        let mut state = GameState::default();
        let mut turns = TurnController::new();
        let ticket = started(turns.begin_intro(
            &mut state,
            SubjectDescriptor::default(),
            "Civilian",
            Language::En,
            1,
        ));
        turns.apply_chunk(&mut state, ticket.turn_id, "Sirens. [ENDING: ESCAPED] [STABILITY: 0]");
        let outcome = turns.complete(&mut state, ticket.turn_id).expect("outcome");

        assert_eq!(outcome.resolution.ending, None);
        assert_eq!(state.ending_type, None);
        assert_eq!(state.status, GameStatus::Playing);
        assert_eq!(state.messages[0].content, "Sirens.");
    }

    #[test]
    fn failed_intro_resets_session() {
        let mut state = GameState::default();
        let mut turns = TurnController::new();
        let ticket = started(turns.begin_intro(
            &mut state,
            SubjectDescriptor::default(),
            "MTF",
            Language::En,
            1,
        ));
        turns.fail(&mut state, ticket.turn_id, TurnFailure::Stream("refused".into()));
        assert_eq!(state, GameState::default());
    }
}
