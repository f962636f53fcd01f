//! Quest State Machine
//!
//! Pure transition rules for toggling a quest. Nothing here touches storage;
//! the board loads the quest, asks for a transition, applies it and persists.

use chrono::{DateTime, Utc};
use serde::Serialize;

use super::definition::{Quest, QuestPhase, QuestScope};
use crate::error::{QuestError, Result};
use crate::knight::Actor;

/// What a toggle did to a quest
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Transition {
    /// Pending -> Completed
    Completed,
    /// Completed -> Pending
    Reopened,
    /// Un-complete requested inside an active cooldown; quest left as is
    Held,
}

/// Check that `actor` may toggle `quest`.
pub fn authorize(quest: &Quest, actor: &Actor) -> Result<()> {
    let allowed = match quest.scope {
        QuestScope::GuildMaster => actor.master,
        QuestScope::Global => true,
        QuestScope::Personal => {
            actor.master || quest.knight_id.is_some_and(|id| actor.owns_knight(id))
        }
    };

    if allowed {
        Ok(())
    } else {
        Err(QuestError::permission(format!(
            "{} may not toggle quest {}",
            actor.name, quest.id
        )))
    }
}

/// Decide which transition a toggle at `now` takes.
pub fn plan_toggle(quest: &Quest, actor: &Actor, now: DateTime<Utc>) -> Result<Transition> {
    authorize(quest, actor)?;

    match quest.phase(now) {
        QuestPhase::Pending => Ok(Transition::Completed),
        _ if quest.is_one_way() => Err(QuestError::Irreversible(quest.id)),
        QuestPhase::CompletedActive => Ok(Transition::Held),
        QuestPhase::CompletedExpired => Ok(Transition::Reopened),
    }
}

impl Quest {
    /// Mark completed by `by` at `now`, opening a cooldown for recurring quests
    pub fn complete(&mut self, by: &str, now: DateTime<Utc>) {
        self.completed = true;
        self.completed_at = Some(now);
        self.completed_by = Some(by.to_string());
        self.reactivates_at = self.recurrence.cooldown().map(|cooldown| now + cooldown);
    }

    /// Back to pending with every completion field cleared
    pub fn reopen(&mut self) {
        self.completed = false;
        self.completed_at = None;
        self.completed_by = None;
        self.reactivates_at = None;
    }

    pub fn apply(&mut self, transition: Transition, actor: &Actor, now: DateTime<Utc>) {
        match transition {
            Transition::Completed => self.complete(&actor.name, now),
            Transition::Reopened => self.reopen(),
            Transition::Held => {}
        }
    }
}
