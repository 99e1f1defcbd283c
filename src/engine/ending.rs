use crate::model::game_state::{GameState, GameStatus};

pub const DEFAULT_COUNTDOWN: u32 = 10;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EndingPhase {
    Playing,
    /// An ending is known; the archive countdown is shown.
    Pending { remaining: u32, ticking: bool },
    GameOver,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Tick {
    /// Nothing is counting down.
    Idle,
    Counting(u32),
    /// The countdown ran out and the session is archived.
    Finished,
}

/// `Playing -> Pending -> GameOver`.
///
/// The countdown is armed at most once per session. Cancelling it pauses
/// the countdown without clearing the ending; only `enter_now` (or a full
/// reset) moves on from there.
#[derive(Debug, Clone)]
pub struct EndingMachine {
    phase: EndingPhase,
    armed: bool,
    countdown: u32,
}

impl Default for EndingMachine {
    fn default() -> Self {
        Self::new(DEFAULT_COUNTDOWN)
    }
}

impl EndingMachine {
    pub fn new(countdown: u32) -> Self {
        Self {
            phase: EndingPhase::Playing,
            armed: false,
            countdown,
        }
    }

    pub fn phase(&self) -> EndingPhase {
        self.phase
    }

    pub fn is_ticking(&self) -> bool {
        matches!(self.phase, EndingPhase::Pending { ticking: true, .. })
    }

    /// Look at committed state and arm the countdown if an ending just
    /// appeared. Returns true only on the call that arms it.
    pub fn observe(&mut self, state: &GameState) -> bool {
        if self.armed || state.status != GameStatus::Playing || state.ending_type.is_none() {
            return false;
        }

        self.armed = true;
        self.phase = EndingPhase::Pending {
            remaining: self.countdown,
            ticking: true,
        };
        true
    }

    /// Advance the countdown by one tick.
    pub fn tick(&mut self, state: &mut GameState) -> Tick {
        let EndingPhase::Pending { remaining, ticking: true } = self.phase else {
            return Tick::Idle;
        };

        let remaining = remaining.saturating_sub(1);
        if remaining == 0 {
            self.finish(state);
            return Tick::Finished;
        }

        self.phase = EndingPhase::Pending {
            remaining,
            ticking: true,
        };
        Tick::Counting(remaining)
    }

    /// Skip the rest of the countdown. Returns false outside `Pending`.
    pub fn enter_now(&mut self, state: &mut GameState) -> bool {
        if !matches!(self.phase, EndingPhase::Pending { .. }) {
            return false;
        }
        self.finish(state);
        true
    }

    /// Stop ticking but stay in `Pending` with the ending kept.
    pub fn cancel_countdown(&mut self) -> bool {
        match self.phase {
            EndingPhase::Pending { remaining, ticking: true } => {
                self.phase = EndingPhase::Pending {
                    remaining,
                    ticking: false,
                };
                true
            }
            _ => false,
        }
    }

    pub fn reset(&mut self) {
        self.phase = EndingPhase::Playing;
        self.armed = false;
    }

    /// Re-derive the phase after a save was loaded into the session.
    pub fn sync_with(&mut self, state: &GameState) {
        self.reset();
        match state.status {
            GameStatus::GameOver => {
                self.armed = true;
                self.phase = EndingPhase::GameOver;
            }
            GameStatus::Playing if state.ending_type.is_some() => {
                // The countdown already ran once for this ending.
                self.armed = true;
                self.phase = EndingPhase::Pending {
                    remaining: self.countdown,
                    ticking: false,
                };
            }
            _ => {}
        }
    }

    fn finish(&mut self, state: &mut GameState) {
        self.phase = EndingPhase::GameOver;
        if state.ending_type.is_some() {
            state.status = GameStatus::GameOver;
        }
    }
}
