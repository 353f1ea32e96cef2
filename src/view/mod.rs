//! Client-side view model of the chat screen.

pub mod history;
pub mod state;
pub mod status;
pub mod timeline;
