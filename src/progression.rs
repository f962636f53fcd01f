//! Experience, level-ups and the achievement log.
//!
//! - Each level needs `level * XP_PER_LEVEL` experience to clear.
//! - A single award levels a knight up at most once.
//! - Achievements are append-only; duplicate titles are allowed.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::sqlite::SqliteConnection;
use tracing::info;

use crate::db;
use crate::error::{QuestError, Result};
use crate::knight::Knight;

/// Experience needed per level step
pub const XP_PER_LEVEL: i32 = 100;

/// Author label for achievements raised by the engine itself
pub const SYSTEM_AUTHOR: &str = "Guild Ledger";

pub const LEVEL_UP_TITLE: &str = "Level Up";
pub const PERFECT_DAY_TITLE: &str = "Perfect Day";
pub const GUILD_QUEST_TITLE: &str = "Guild Quest Complete";

/// What happens to experience beyond the level threshold on level-up
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OverflowPolicy {
    /// Experience restarts at zero
    Discard,
    /// Experience above the threshold carries into the new level
    Carry,
}

/// Default policy when the config does not name one
pub const OVERFLOW_POLICY: OverflowPolicy = OverflowPolicy::Discard;

pub fn level_threshold(level: i32) -> i32 {
    level.max(1) * XP_PER_LEVEL
}

impl Knight {
    /// Add experience, returning the new level on level-up
    pub fn gain_experience(&mut self, points: i32, policy: OverflowPolicy) -> Option<i32> {
        self.experience = self.experience.saturating_add(points);

        let threshold = level_threshold(self.level);
        if self.experience < threshold {
            return None;
        }

        self.level += 1;
        self.experience = match policy {
            OverflowPolicy::Discard => 0,
            OverflowPolicy::Carry => self.experience - threshold,
        };
        Some(self.level)
    }

    pub fn xp_to_next_level(&self) -> i32 {
        (level_threshold(self.level) - self.experience).max(0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", content = "knight_id", rename_all = "snake_case")]
pub enum AchievementOwner {
    Knight(i64),
    /// Belongs to the whole guild
    Guild,
}

#[derive(Debug, Clone, Serialize)]
pub struct Achievement {
    pub id: i64,
    pub title: String,
    pub description: String,
    pub created_at: DateTime<Utc>,
    pub owner: AchievementOwner,
    pub author: String,
}

#[derive(Debug, Clone)]
pub struct NewAchievement {
    pub owner: AchievementOwner,
    pub title: String,
    pub description: String,
    pub author: String,
    pub created_at: DateTime<Utc>,
}

/// Result of a single award call
#[derive(Debug, Clone, Serialize)]
pub struct Award {
    pub knight: Knight,
    pub leveled_up_to: Option<i32>,
    pub achievement: Option<Achievement>,
}

/// Append an achievement to the log.
pub async fn record_achievement(
    conn: &mut SqliteConnection,
    owner: AchievementOwner,
    title: &str,
    description: &str,
    author: &str,
    now: DateTime<Utc>,
) -> Result<Achievement> {
    let achievement = db::insert_achievement(
        conn,
        &NewAchievement {
            owner,
            title: title.to_string(),
            description: description.to_string(),
            author: author.to_string(),
            created_at: now,
        },
    )
    .await?;

    info!("Achievement '{}' recorded for {:?}", achievement.title, achievement.owner);
    Ok(achievement)
}

/// Give `points` experience to a knight, levelling up and logging a
/// "Level Up" achievement when the threshold is crossed.
pub async fn award(
    conn: &mut SqliteConnection,
    knight_id: i64,
    points: i32,
    policy: OverflowPolicy,
    now: DateTime<Utc>,
) -> Result<Award> {
    if points < 0 {
        return Err(QuestError::validation("experience award must not be negative"));
    }

    let mut knight = db::find_knight(conn, knight_id)
        .await?
        .ok_or_else(|| QuestError::not_found("knight", knight_id))?;

    let leveled_up_to = knight.gain_experience(points, policy);
    db::save_knight_progress(conn, &knight).await?;

    let achievement = match leveled_up_to {
        Some(level) => {
            info!("{} reached level {}", knight.name, level);
            let description = format!("{} leveled up to level {}!", knight.name, level);
            Some(
                record_achievement(
                    conn,
                    AchievementOwner::Knight(knight.id),
                    LEVEL_UP_TITLE,
                    &description,
                    SYSTEM_AUTHOR,
                    now,
                )
                .await?,
            )
        }
        None => None,
    };

    Ok(Award {
        knight,
        leveled_up_to,
        achievement,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::Database;
    use crate::knight::KnightClass;
    use chrono::TimeZone;

    fn knight(level: i32, experience: i32) -> Knight {
        Knight {
            id: 1,
            name: "Aria".to_string(),
            class: KnightClass::Warrior,
            level,
            experience,
            owner_id: None,
        }
    }

    #[test]
    fn test_threshold() {
        assert_eq!(level_threshold(1), 100);
        assert_eq!(level_threshold(4), 400);
    }

    #[test]
    fn test_exact_threshold_levels_up() {
        let mut k = knight(1, 0);
        assert_eq!(k.gain_experience(100, OVERFLOW_POLICY), Some(2));
        assert_eq!(k.level, 2);
        assert_eq!(k.experience, 0);
    }

    #[test]
    fn test_overflow_is_discarded() {
        let mut k = knight(1, 60);
        assert_eq!(k.gain_experience(50, OVERFLOW_POLICY), Some(2));
        assert_eq!(k.level, 2);
        assert_eq!(k.experience, 0);
    }

    #[test]
    fn test_overflow_carry_policy() {
        let mut k = knight(1, 60);
        assert_eq!(k.gain_experience(50, OverflowPolicy::Carry), Some(2));
        assert_eq!(k.experience, 10);
    }

    #[test]
    fn test_single_level_per_award() {
        let mut k = knight(1, 0);
        // Enough for levels 2 and 3, but only one step is taken
        assert_eq!(k.gain_experience(350, OverflowPolicy::Carry), Some(2));
        assert_eq!(k.level, 2);
        assert_eq!(k.experience, 250);
    }

    #[test]
    fn test_below_threshold() {
        let mut k = knight(2, 50);
        assert_eq!(k.gain_experience(100, OVERFLOW_POLICY), None);
        assert_eq!(k.experience, 150);
        assert_eq!(k.xp_to_next_level(), 50);
    }

    #[tokio::test]
    async fn test_award_persists_and_logs_level_up() {
        let db = Database::in_memory().await.unwrap();
        let mut conn = db.pool().acquire().await.unwrap();
        let now = Utc.with_ymd_and_hms(2026, 10, 12, 18, 0, 0).unwrap();
        let id = db::insert_knight(&mut conn, "Aria", KnightClass::Mage, None).await.unwrap();

        let first = award(&mut conn, id, 100, OVERFLOW_POLICY, now).await.unwrap();
        assert_eq!(first.leveled_up_to, Some(2));
        assert_eq!(first.knight.experience, 0);
        let achievement = first.achievement.unwrap();
        assert_eq!(achievement.title, LEVEL_UP_TITLE);
        assert!(achievement.description.contains("level 2"));
        assert_eq!(achievement.created_at, now);

        let second = award(&mut conn, id, 50, OVERFLOW_POLICY, now).await.unwrap();
        assert_eq!(second.leveled_up_to, None);
        assert!(second.achievement.is_none());

        let stored = db::find_knight(&mut conn, id).await.unwrap().unwrap();
        assert_eq!((stored.level, stored.experience), (2, 50));
        assert_eq!(db::achievements_for_knight(&mut conn, id).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_award_rejects_unknown_and_negative() {
        let db = Database::in_memory().await.unwrap();
        let mut conn = db.pool().acquire().await.unwrap();
        let now = Utc::now();

        let err = award(&mut conn, 77, 10, OVERFLOW_POLICY, now).await.unwrap_err();
        assert!(matches!(err, QuestError::NotFound { entity: "knight", id: 77 }));

        let id = db::insert_knight(&mut conn, "Bram", KnightClass::Archer, None).await.unwrap();
        let err = award(&mut conn, id, -5, OVERFLOW_POLICY, now).await.unwrap_err();
        assert!(matches!(err, QuestError::Validation(_)));
    }

    #[tokio::test]
    async fn test_duplicate_achievements_allowed() {
        let db = Database::in_memory().await.unwrap();
        let mut conn = db.pool().acquire().await.unwrap();
        let now = Utc::now();
        let id = db::insert_knight(&mut conn, "Aria", KnightClass::Mage, None).await.unwrap();

        for _ in 0..2 {
            record_achievement(
                &mut conn,
                AchievementOwner::Knight(id),
                PERFECT_DAY_TITLE,
                "All dailies done",
                "Aria",
                now,
            )
            .await
            .unwrap();
        }

        assert_eq!(db::achievements_for_knight(&mut conn, id).await.unwrap().len(), 2);
    }
}
