//! TUI module for the interactive menu

mod app;

pub use app::App;
