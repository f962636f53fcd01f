//! Quest System Module
//!
//! Quest records, the toggle state machine, and the board service that runs
//! toggles and creation against storage.

pub mod board;
pub mod definition;
pub mod state;

pub use board::QuestBoard;
pub use definition::{Category, NewQuest, QuestScope, Recurrence};
