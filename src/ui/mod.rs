pub mod settings;
pub mod settings_io;
pub mod terminal;
