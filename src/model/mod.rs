pub mod directive;
pub mod game_state;
pub mod message;
pub mod save_record;
