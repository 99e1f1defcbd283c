use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{self, Receiver, RecvTimeoutError, Sender};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use crate::engine::chat_session::ChatSession;
use crate::engine::ending::{EndingMachine, Tick};
use crate::engine::illustration::{attach_image, spawn_illustration, ImageSource, IllustrationRequest};
use crate::engine::llm_client::TextSource;
use crate::engine::prompt_builder::PromptBuilder;
use crate::engine::protocol::{EngineCommand, EngineEvent, EngineResponse, SessionStatus};
use crate::engine::turn::{BeginTurn, FailedTurn, TurnController, TurnFailure, TurnKind};
use crate::model::game_state::{ChatMessage, EndingType, GameState, Language, SubjectDescriptor};
use crate::store::error::StoreError;
use crate::store::manager::SaveManager;
use crate::ui::settings::EngineSettings;

/// Timing knobs of the engine loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EngineConfig {
    pub turn_timeout: Duration,
    pub tick_interval: Duration,
    pub countdown_ticks: u32,
}

impl From<&EngineSettings> for EngineConfig {
    fn from(settings: &EngineSettings) -> Self {
        Self {
            turn_timeout: settings.turn_timeout(),
            tick_interval: settings.tick_interval(),
            countdown_ticks: settings.countdown_ticks,
        }
    }
}

/// The stream currently feeding a turn.
struct ActiveStream {
    turn_id: u64,
    narrator_id: String,
    prompt: String,
    deadline: Instant,
    cancel: Arc<AtomicBool>,
}

impl ActiveStream {
    fn abandon(&self) {
        self.cancel.store(true, Ordering::Relaxed);
    }
}

fn now_ms() -> i64 {
    chrono::Utc::now().timestamp_millis()
}

/// Owns the live session. Everything that mutates it runs on the engine
/// thread, one inbox event at a time.
pub struct Engine {
    inbox: Receiver<EngineEvent>,
    inbox_tx: Sender<EngineEvent>,
    tx: Sender<EngineResponse>,

    state: GameState,
    turns: TurnController,
    ending: EndingMachine,
    chat: ChatSession,
    stream: Option<ActiveStream>,
    next_tick: Option<Instant>,
    /// Bumped whenever the session is replaced, so session images requested
    /// for an older one are dropped.
    session: u64,

    text: Arc<dyn TextSource>,
    images: Arc<dyn ImageSource>,
    saves: SaveManager,
    config: EngineConfig,
    running: bool,
}

/// Front-end side of a running engine.
pub struct EngineHandle {
    tx: Sender<EngineEvent>,
    thread: Option<JoinHandle<()>>,
}

impl EngineHandle {
    /// Returns false once the engine has stopped.
    pub fn send(&self, cmd: EngineCommand) -> bool {
        self.tx.send(EngineEvent::Command(cmd)).is_ok()
    }

    pub fn shutdown(mut self) {
        self.stop();
    }

    fn stop(&mut self) {
        let _ = self.tx.send(EngineEvent::Command(EngineCommand::Shutdown));
        if let Some(thread) = self.thread.take() {
            if thread.join().is_err() {
                log::error!("engine thread panicked");
            }
        }
    }
}

impl Drop for EngineHandle {
    fn drop(&mut self) {
        self.stop();
    }
}

impl Engine {
    pub(crate) fn new(
        config: EngineConfig,
        text: Arc<dyn TextSource>,
        images: Arc<dyn ImageSource>,
        saves: SaveManager,
        tx: Sender<EngineResponse>,
    ) -> (Self, Sender<EngineEvent>) {
        let (inbox_tx, inbox) = mpsc::channel();
        let engine = Self {
            inbox,
            inbox_tx: inbox_tx.clone(),
            tx,
            state: GameState::default(),
            turns: TurnController::new(),
            ending: EndingMachine::new(config.countdown_ticks),
            chat: ChatSession::start("", Language::default()),
            stream: None,
            next_tick: None,
            session: 0,
            text,
            images,
            saves,
            config,
            running: true,
        };
        (engine, inbox_tx)
    }

    /// Run the engine on its own thread.
    pub fn spawn(
        config: EngineConfig,
        text: Arc<dyn TextSource>,
        images: Arc<dyn ImageSource>,
        saves: SaveManager,
    ) -> (EngineHandle, Receiver<EngineResponse>) {
        let (resp_tx, resp_rx) = mpsc::channel();
        let (mut engine, inbox_tx) = Engine::new(config, text, images, saves, resp_tx);
        let thread = thread::Builder::new()
            .name("engine".into())
            .spawn(move || engine.run())
            .ok();
        if thread.is_none() {
            log::error!("failed to spawn engine thread");
        }
        (
            EngineHandle {
                tx: inbox_tx,
                thread,
            },
            resp_rx,
        )
    }

    pub fn run(&mut self) {
        log::info!("engine started");
        while self.running {
            let event = match self.next_deadline() {
                Some(deadline) => {
                    let wait = deadline.saturating_duration_since(Instant::now());
                    match self.inbox.recv_timeout(wait) {
                        Ok(event) => Some(event),
                        Err(RecvTimeoutError::Timeout) => None,
                        Err(RecvTimeoutError::Disconnected) => break,
                    }
                }
                None => match self.inbox.recv() {
                    Ok(event) => Some(event),
                    Err(_) => break,
                },
            };

            if let Some(event) = event {
                self.handle(event);
            }
            self.fire_timers(Instant::now());
        }
        log::info!("engine stopped");
    }

    fn emit(&self, resp: EngineResponse) {
        let _ = self.tx.send(resp);
    }

    fn emit_history(&self) {
        self.emit(EngineResponse::FullMessageHistory(self.state.messages.clone()));
    }

    fn emit_status(&self) {
        self.emit(EngineResponse::StateChanged(SessionStatus::of(&self.state)));
    }

    fn next_deadline(&self) -> Option<Instant> {
        let turn = self.stream.as_ref().map(|s| s.deadline);
        match (turn, self.next_tick) {
            (Some(a), Some(b)) => Some(a.min(b)),
            (a, b) => a.or(b),
        }
    }

    fn handle(&mut self, event: EngineEvent) {
        match event {
            EngineEvent::Command(cmd) => self.handle_command(cmd),
            EngineEvent::Chunk { turn_id, text } => self.on_chunk(turn_id, &text),
            EngineEvent::StreamEnded { turn_id } => self.on_stream_ended(turn_id),
            EngineEvent::StreamFailed { turn_id, error } => {
                if self.stream.as_ref().is_some_and(|s| s.turn_id == turn_id) {
                    log::warn!("turn {turn_id} stream failed: {error}");
                    self.stream = None;
                    self.on_turn_failed(turn_id, TurnFailure::Stream(error));
                }
            }
            EngineEvent::ImageReady { target, image } => {
                if attach_image(&mut self.state, self.session, &target, image) {
                    self.emit(EngineResponse::ImageAttached(target));
                } else {
                    log::debug!("dropping image for stale target {target:?}");
                }
            }
        }
    }

    fn handle_command(&mut self, cmd: EngineCommand) {
        match cmd {
            EngineCommand::StartSession {
                subject,
                role,
                language,
            } => self.start_session(subject, role, language),

            EngineCommand::UserInput(input) => self.on_user_input(&input),

            EngineCommand::EnterEnding => {
                if self.ending.enter_now(&mut self.state) {
                    self.next_tick = None;
                    self.on_game_over();
                }
            }

            EngineCommand::CancelCountdown => {
                if self.ending.cancel_countdown() {
                    self.next_tick = None;
                    self.emit(EngineResponse::CountdownCancelled);
                }
            }

            EngineCommand::ResetSession => {
                self.replace_session(GameState::default());
                self.chat = ChatSession::start("", Language::default());
                self.emit_history();
                self.emit_status();
            }

            EngineCommand::SaveGame { id } => match self.saves.save(&self.state, id.as_deref()) {
                Ok(meta) => self.emit(EngineResponse::Saved(meta)),
                Err(error) => self.store_failed("save", error),
            },

            EngineCommand::ListSaves => match self.saves.list_saves() {
                Ok(list) => self.emit(EngineResponse::SaveList(list)),
                Err(error) => self.store_failed("list", error),
            },

            EngineCommand::LoadSave { id } => match self.saves.load(&id) {
                Ok(state) => self.load_state(id, state),
                Err(error) => self.store_failed("load", error),
            },

            EngineCommand::DeleteSave { id } => match self.saves.delete(&id) {
                Ok(()) => self.emit(EngineResponse::Deleted { id }),
                Err(error) => self.store_failed("delete", error),
            },

            EngineCommand::SignIn(identity) => {
                let user_id = identity.user_id.clone();
                match self.saves.sign_in(identity) {
                    Ok(()) => self.emit(EngineResponse::SignedIn { user_id }),
                    Err(error) => self.store_failed("sign in", error),
                }
            }

            EngineCommand::SignOut => {
                self.saves.sign_out();
                self.emit(EngineResponse::SignedOut);
            }

            EngineCommand::Shutdown => {
                self.abandon_stream();
                self.saves.wait_for_sync();
                self.running = false;
            }
        }
    }

    fn store_failed(&self, action: &'static str, error: StoreError) {
        log::warn!("{action} failed: {error}");
        self.emit(EngineResponse::StoreFailed { action, error });
    }

    // --- session lifecycle ----------------------------------------------

    fn abandon_stream(&mut self) {
        if let Some(stream) = self.stream.take() {
            log::debug!("abandoning stream for turn {}", stream.turn_id);
            stream.abandon();
        }
        self.turns.reset();
    }

    fn replace_session(&mut self, state: GameState) {
        self.abandon_stream();
        self.ending.reset();
        self.next_tick = None;
        self.session += 1;
        self.state = state;
    }

    fn start_session(&mut self, subject: SubjectDescriptor, role: String, language: Language) {
        self.replace_session(GameState::default());
        self.chat = ChatSession::start(&role, language);

        let ticket = match self
            .turns
            .begin_intro(&mut self.state, subject.clone(), &role, language, now_ms())
        {
            BeginTurn::Started(ticket) => ticket,
            BeginTurn::Ignored(reason) => {
                self.emit(EngineResponse::TurnIgnored(reason));
                return;
            }
        };
        log::info!("starting session: {} as {}", subject.designation, role);

        let prompt = PromptBuilder::intro_request(&subject, &role, language);
        self.emit_history();
        self.start_stream(ticket.turn_id, ticket.narrator_id, prompt);

        for request in [
            IllustrationRequest::background(self.session, &subject),
            IllustrationRequest::main_image(self.session, &subject),
        ] {
            spawn_illustration(Arc::clone(&self.images), request, self.inbox_tx.clone());
        }
    }

    fn load_state(&mut self, id: String, mut state: GameState) {
        // A save taken mid-turn still holds the typing placeholder.
        for msg in state.messages.iter_mut().filter(|m| m.is_typing) {
            msg.is_typing = false;
        }
        self.chat = ChatSession::restore(
            state.chat_history.clone().unwrap_or_default(),
            &state.role,
            state.language(),
        );
        self.replace_session(state);
        self.ending.sync_with(&self.state);

        log::info!("loaded save {id}");
        self.emit(EngineResponse::Loaded { id });
        self.emit_history();
        self.emit_status();
    }

    // --- turns ------------------------------------------------------------

    fn on_user_input(&mut self, input: &str) {
        let ticket = match self.turns.begin(&mut self.state, input, now_ms()) {
            BeginTurn::Started(ticket) => ticket,
            BeginTurn::Ignored(reason) => {
                log::debug!("input ignored: {reason:?}");
                self.emit(EngineResponse::TurnIgnored(reason));
                return;
            }
        };

        let prompt = PromptBuilder::turn_context(
            &ticket.action,
            ticket.stability,
            ticket.turn_count,
            ticket.language,
        );
        self.emit_history();
        self.start_stream(ticket.turn_id, ticket.narrator_id, prompt);
    }

    fn start_stream(&mut self, turn_id: u64, narrator_id: String, prompt: String) {
        let messages = self.chat.request(&prompt);
        let cancel = Arc::new(AtomicBool::new(false));

        pump_stream(
            Arc::clone(&self.text),
            messages,
            turn_id,
            Arc::clone(&cancel),
            self.inbox_tx.clone(),
        );

        self.stream = Some(ActiveStream {
            turn_id,
            narrator_id,
            prompt,
            deadline: Instant::now() + self.config.turn_timeout,
            cancel,
        });
    }

    fn on_chunk(&mut self, turn_id: u64, text: &str) {
        let Some(narrator_id) = self
            .stream
            .as_ref()
            .filter(|s| s.turn_id == turn_id)
            .map(|s| s.narrator_id.clone())
        else {
            return;
        };
        if let Some(content) = self.turns.apply_chunk(&mut self.state, turn_id, text) {
            self.emit(EngineResponse::MessagePatched {
                id: narrator_id,
                content,
            });
        }
    }

    fn on_stream_ended(&mut self, turn_id: u64) {
        let Some(stream) = self.stream.take_if(|s| s.turn_id == turn_id) else {
            return;
        };
        let Some(outcome) = self.turns.complete(&mut self.state, turn_id) else {
            return;
        };

        self.chat.record(stream.prompt, outcome.raw_text.clone());
        self.state.chat_history = Some(self.chat.history().to_vec());

        let resolution = &outcome.resolution;
        log::info!(
            "turn {} complete: stability {}{}",
            self.state.turn_count,
            resolution.stability,
            resolution
                .ending
                .map(|e| format!(", ending {e}"))
                .unwrap_or_default()
        );

        if let Some(visual) = &resolution.visual_prompt {
            let request = match outcome.kind {
                TurnKind::Intro => IllustrationRequest::for_opening(&outcome.narrator_id, visual),
                TurnKind::Action => IllustrationRequest::for_message(&outcome.narrator_id, visual),
            };
            spawn_illustration(Arc::clone(&self.images), request, self.inbox_tx.clone());
        }

        self.emit(EngineResponse::TurnCompleted {
            narrator_id: outcome.narrator_id.clone(),
            text: resolution.text.clone(),
            stability: resolution.stability,
            ending: resolution.ending,
        });
        self.emit_status();

        if self.ending.observe(&self.state) {
            let ending = self.state.ending_type.unwrap_or(EndingType::Unknown);
            self.next_tick = Some(Instant::now() + self.config.tick_interval);
            self.emit(EngineResponse::CountdownStarted {
                ending,
                remaining: self.config.countdown_ticks,
            });
        }
    }

    fn on_turn_failed(&mut self, turn_id: u64, failure: TurnFailure) {
        let Some(FailedTurn {
            kind,
            failure,
            restore_input,
            ..
        }) = self.turns.fail(&mut self.state, turn_id, failure)
        else {
            return;
        };

        match kind {
            TurnKind::Intro => {
                // Images still in flight for the failed start must not land
                // on the idle state.
                self.session += 1;
                self.chat = ChatSession::start("", Language::default());
                self.emit(EngineResponse::SessionStartFailed(failure));
            }
            TurnKind::Action => self.emit(EngineResponse::TurnFailed {
                failure,
                restore_input,
            }),
        }
        self.emit_history();
        self.emit_status();
    }

    fn on_game_over(&mut self) {
        let ending = self.state.ending_type.unwrap_or(EndingType::Unknown);
        log::info!("session archived with ending {ending}");
        self.emit(EngineResponse::GameOver {
            ending,
            timeline: self.state.stability_timeline(),
        });
        self.emit_status();
    }

    // --- timers -----------------------------------------------------------

    fn fire_timers(&mut self, now: Instant) {
        if let Some(stream) = self.stream.take_if(|s| s.deadline <= now) {
            log::warn!("turn {} timed out", stream.turn_id);
            stream.abandon();
            self.on_turn_failed(stream.turn_id, TurnFailure::Timeout);
        }

        if self.next_tick.is_some_and(|t| t <= now) {
            match self.ending.tick(&mut self.state) {
                Tick::Counting(remaining) => {
                    self.next_tick = Some(now + self.config.tick_interval);
                    self.emit(EngineResponse::CountdownTick(remaining));
                }
                Tick::Finished => {
                    self.next_tick = None;
                    self.on_game_over();
                }
                Tick::Idle => self.next_tick = None,
            }
        }
    }
}

/// Drain a text stream on a helper thread, forwarding chunks until the
/// stream ends or the turn is abandoned.
fn pump_stream(
    source: Arc<dyn TextSource>,
    messages: Vec<ChatMessage>,
    turn_id: u64,
    cancel: Arc<AtomicBool>,
    inbox: Sender<EngineEvent>,
) {
    thread::spawn(move || {
        let stream = match source.stream(&messages) {
            Ok(stream) => stream,
            Err(e) => {
                let _ = inbox.send(EngineEvent::StreamFailed {
                    turn_id,
                    error: format!("{e:#}"),
                });
                return;
            }
        };

        for item in stream {
            if cancel.load(Ordering::Relaxed) {
                log::debug!("turn {turn_id} abandoned, closing stream");
                return;
            }
            let event = match item {
                Ok(text) => EngineEvent::Chunk { turn_id, text },
                Err(e) => {
                    let _ = inbox.send(EngineEvent::StreamFailed {
                        turn_id,
                        error: format!("{e:#}"),
                    });
                    return;
                }
            };
            if inbox.send(event).is_err() {
                return;
            }
        }

        if !cancel.load(Ordering::Relaxed) {
            let _ = inbox.send(EngineEvent::StreamEnded { turn_id });
        }
    });
}
