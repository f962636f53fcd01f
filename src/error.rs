//! Error types for the quest engine.

use thiserror::Error;

/// Failures surfaced by quest, progression and sweep operations.
///
/// Every variant is returned to the caller untouched; nothing in the core
/// retries on its own.
#[derive(Debug, Error)]
pub enum QuestError {
    /// Actor is not allowed to act on this quest or knight
    #[error("permission denied: {0}")]
    Permission(String),

    /// Attempt to undo a one-way guild quest
    #[error("quest {0} is a completed guild quest and cannot be reopened")]
    Irreversible(i64),

    #[error("{entity} {id} not found")]
    NotFound { entity: &'static str, id: i64 },

    /// Input rejected before touching storage
    #[error("invalid input: {0}")]
    Validation(String),

    #[error("storage error: {0}")]
    Storage(#[from] sqlx::Error),
}

impl QuestError {
    pub fn not_found(entity: &'static str, id: i64) -> Self {
        QuestError::NotFound { entity, id }
    }

    pub fn permission(reason: impl Into<String>) -> Self {
        QuestError::Permission(reason.into())
    }

    pub fn validation(reason: impl Into<String>) -> Self {
        QuestError::Validation(reason.into())
    }
}

pub type Result<T> = std::result::Result<T, QuestError>;
