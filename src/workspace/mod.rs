pub mod language;
pub mod views;
pub mod walker;
pub mod watcher;
