pub mod engine;
pub mod model;
pub mod store;
pub mod ui;

/// Directory name under the platform config and data dirs.
pub const APP_DIR: &str = "loom_engine";
