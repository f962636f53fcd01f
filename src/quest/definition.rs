//! Quest Definition Structures
//!
//! The persisted quest record, its flag enums, and the input used to create one.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

/// Maximum quest title length in characters
pub const MAX_TITLE_LEN: usize = 150;

/// How often a quest comes back after completion
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum Recurrence {
    #[default]
    None,
    Daily,
    Weekly,
}

impl Recurrence {
    pub fn as_str(&self) -> &'static str {
        match self {
            Recurrence::None => "none",
            Recurrence::Daily => "daily",
            Recurrence::Weekly => "weekly",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "none" => Some(Recurrence::None),
            "daily" => Some(Recurrence::Daily),
            "weekly" => Some(Recurrence::Weekly),
            _ => None,
        }
    }

    /// Length of the cooldown window opened by a completion
    pub fn cooldown(&self) -> Option<Duration> {
        match self {
            Recurrence::None => None,
            Recurrence::Daily => Some(Duration::days(1)),
            Recurrence::Weekly => Some(Duration::days(7)),
        }
    }
}

/// Who a quest belongs to and who may toggle it
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum QuestScope {
    /// Owned by a single knight
    #[default]
    Personal,
    /// Any user may toggle it
    Global,
    /// Only guild masters may toggle it, and completion is one-way
    GuildMaster,
}

impl QuestScope {
    pub fn as_str(&self) -> &'static str {
        match self {
            QuestScope::Personal => "personal",
            QuestScope::Global => "global",
            QuestScope::GuildMaster => "guild_master",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "personal" => Some(QuestScope::Personal),
            "global" => Some(QuestScope::Global),
            "guild_master" => Some(QuestScope::GuildMaster),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Category {
    Cleaning,
    Organization,
    Study,
    Health,
    Other,
}

impl Category {
    #[cfg(test)]
    pub const ALL: [Category; 5] = [
        Category::Cleaning,
        Category::Organization,
        Category::Study,
        Category::Health,
        Category::Other,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Category::Cleaning => "cleaning",
            Category::Organization => "organization",
            Category::Study => "study",
            Category::Health => "health",
            Category::Other => "other",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "cleaning" => Some(Category::Cleaning),
            "organization" => Some(Category::Organization),
            "study" => Some(Category::Study),
            "health" => Some(Category::Health),
            "other" => Some(Category::Other),
            _ => None,
        }
    }
}

/// Where a quest sits in its lifecycle at a given instant
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum QuestPhase {
    Pending,
    /// Completed and still inside its cooldown window
    CompletedActive,
    /// Completed, with the cooldown elapsed (or never set), not yet reset
    CompletedExpired,
}

#[derive(Debug, Clone, Serialize)]
pub struct Quest {
    pub id: i64,
    pub title: String,
    pub description: Option<String>,
    pub category: Category,
    pub recurrence: Recurrence,
    pub scope: QuestScope,
    pub knight_id: Option<i64>,
    pub completed: bool,
    pub completed_at: Option<DateTime<Utc>>,
    /// Cooldown expiry; only set on completed recurring quests
    pub reactivates_at: Option<DateTime<Utc>>,
    /// Display name of whoever completed it
    pub completed_by: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl Quest {
    pub fn phase(&self, now: DateTime<Utc>) -> QuestPhase {
        if !self.completed {
            return QuestPhase::Pending;
        }
        match self.reactivates_at {
            Some(at) if at > now => QuestPhase::CompletedActive,
            _ => QuestPhase::CompletedExpired,
        }
    }

    pub fn is_one_way(&self) -> bool {
        self.scope == QuestScope::GuildMaster
    }

    /// Personal daily quests count toward a knight's perfect day
    pub fn counts_toward_perfect_day(&self) -> bool {
        self.scope == QuestScope::Personal
            && self.recurrence == Recurrence::Daily
            && self.knight_id.is_some()
    }
}

/// Fields supplied when creating a quest
#[derive(Debug, Clone, Deserialize)]
pub struct NewQuest {
    pub title: String,
    #[serde(default)]
    pub description: Option<String>,
    pub category: Category,
    #[serde(default)]
    pub recurrence: Recurrence,
    #[serde(default)]
    pub scope: QuestScope,
    #[serde(default)]
    pub knight_id: Option<i64>,
}

impl NewQuest {
    /// Check shape-level rules; returns the trimmed title on success
    pub fn validate(&self) -> Result<String, String> {
        let title = self.title.trim();
        if title.is_empty() {
            return Err("Quest title must not be empty".to_string());
        }
        if title.chars().count() > MAX_TITLE_LEN {
            return Err(format!("Quest title must be at most {} characters", MAX_TITLE_LEN));
        }
        if self.scope == QuestScope::Personal && self.knight_id.is_none() {
            return Err("Personal quests must belong to a knight".to_string());
        }
        // A completed guild quest never returns to pending, so it cannot have a cooldown
        if self.scope == QuestScope::GuildMaster && self.recurrence != Recurrence::None {
            return Err("Guild master quests cannot recur".to_string());
        }
        Ok(title.to_string())
    }
}
