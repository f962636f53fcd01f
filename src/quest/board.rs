//! Quest Board
//!
//! Runs quest operations against storage. Each public operation is one
//! transaction: it commits as a whole or, on any error, rolls back.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::{debug, info};

use super::definition::{NewQuest, Quest, QuestScope};
use super::state::{self, Transition};
use crate::db::{self, Database};
use crate::error::{QuestError, Result};
use crate::knight::{Actor, Knight, KnightClass};
use crate::progression::{self, Achievement, AchievementOwner, OverflowPolicy, OVERFLOW_POLICY};

/// Everything a toggle produced
#[derive(Debug, Clone, Serialize)]
pub struct ToggleOutcome {
    pub quest: Quest,
    pub transition: Transition,
    /// Achievements appended by this toggle, in creation order
    pub achievements: Vec<Achievement>,
    pub leveled_up_to: Option<i32>,
}

#[derive(Debug, Clone, Serialize)]
pub struct KnightProfile {
    pub knight: Knight,
    pub xp_to_next_level: i32,
    pub quests: Vec<Quest>,
    /// Newest first
    pub achievements: Vec<Achievement>,
}

pub struct QuestBoard {
    db: Arc<Database>,
    /// Experience granted per completed quest
    completion_xp: i32,
    overflow: OverflowPolicy,
}

impl QuestBoard {
    pub fn new(db: Arc<Database>, completion_xp: i32) -> Self {
        Self {
            db,
            completion_xp,
            overflow: OVERFLOW_POLICY,
        }
    }

    pub fn with_overflow_policy(mut self, overflow: OverflowPolicy) -> Self {
        self.overflow = overflow;
        self
    }

    pub async fn create_user(&self, name: &str, master: bool) -> Result<Actor> {
        let name = name.trim();
        if name.is_empty() {
            return Err(QuestError::validation("User name must not be empty"));
        }

        let mut tx = self.db.begin().await?;
        let id = db::insert_user(&mut tx, name, master, Utc::now()).await?;
        let actor = db::find_actor(&mut tx, id)
            .await?
            .ok_or_else(|| QuestError::not_found("user", id))?;
        tx.commit().await?;

        info!("Created user {} (id: {}, master: {})", actor.name, actor.id, actor.master);
        Ok(actor)
    }

    pub async fn create_knight(&self, owner_id: Option<i64>, name: &str, class: KnightClass) -> Result<Knight> {
        let name = name.trim();
        if name.is_empty() {
            return Err(QuestError::validation("Knight name must not be empty"));
        }

        let mut tx = self.db.begin().await?;
        if let Some(owner_id) = owner_id {
            if db::find_actor(&mut tx, owner_id).await?.is_none() {
                return Err(QuestError::not_found("user", owner_id));
            }
        }

        let id = db::insert_knight(&mut tx, name, class, owner_id).await?;
        let knight = db::find_knight(&mut tx, id)
            .await?
            .ok_or_else(|| QuestError::not_found("knight", id))?;
        tx.commit().await?;

        info!("Created knight {} (id: {})", knight.name, knight.id);
        Ok(knight)
    }

    pub async fn create_quest(&self, actor_id: i64, new: NewQuest) -> Result<Quest> {
        self.create_quest_at(actor_id, new, Utc::now()).await
    }

    pub async fn create_quest_at(&self, actor_id: i64, new: NewQuest, now: DateTime<Utc>) -> Result<Quest> {
        let title = new.validate().map_err(QuestError::Validation)?;

        let mut tx = self.db.begin().await?;
        let actor = db::find_actor(&mut tx, actor_id)
            .await?
            .ok_or_else(|| QuestError::not_found("user", actor_id))?;

        if new.scope != QuestScope::Personal && !actor.master {
            return Err(QuestError::permission(
                "only guild masters may create global or guild quests",
            ));
        }

        if let Some(knight_id) = new.knight_id {
            if db::find_knight(&mut tx, knight_id).await?.is_none() {
                return Err(QuestError::not_found("knight", knight_id));
            }
            if !actor.master && !actor.owns_knight(knight_id) {
                return Err(QuestError::permission(format!(
                    "{} may not add quests for knight {}",
                    actor.name, knight_id
                )));
            }
        }

        let description = new
            .description
            .as_deref()
            .map(str::trim)
            .filter(|d| !d.is_empty());

        let id = db::insert_quest(
            &mut tx,
            &title,
            description,
            new.category,
            new.recurrence,
            new.scope,
            new.knight_id,
            now,
        )
        .await?;

        let quest = db::find_quest(&mut tx, id)
            .await?
            .ok_or_else(|| QuestError::not_found("quest", id))?;
        tx.commit().await?;

        info!(
            "{} created {} {} quest '{}' (id: {})",
            actor.name,
            quest.recurrence.as_str(),
            quest.scope.as_str(),
            quest.title,
            quest.id
        );
        Ok(quest)
    }

    pub async fn toggle(&self, quest_id: i64, actor_id: i64) -> Result<ToggleOutcome> {
        self.toggle_at(quest_id, actor_id, Utc::now()).await
    }

    /// Toggle a quest as of `now` (UTC).
    ///
    /// Completing awards experience and may append Level Up, Perfect Day and
    /// Guild Quest achievements, all inside the same transaction.
    pub async fn toggle_at(&self, quest_id: i64, actor_id: i64, now: DateTime<Utc>) -> Result<ToggleOutcome> {
        let mut tx = self.db.begin().await?;

        let mut quest = db::find_quest(&mut tx, quest_id)
            .await?
            .ok_or_else(|| QuestError::not_found("quest", quest_id))?;
        let actor = db::find_actor(&mut tx, actor_id)
            .await?
            .ok_or_else(|| QuestError::not_found("user", actor_id))?;

        let transition = state::plan_toggle(&quest, &actor, now)?;

        if transition == Transition::Held {
            debug!(
                "Quest {} is cooling down until {:?}; ignoring reopen by {}",
                quest.id, quest.reactivates_at, actor.name
            );
            return Ok(ToggleOutcome {
                quest,
                transition,
                achievements: Vec::new(),
                leveled_up_to: None,
            });
        }

        quest.apply(transition, &actor, now);
        db::save_quest_state(&mut tx, &quest).await?;

        let mut achievements = Vec::new();
        let mut leveled_up_to = None;

        if transition == Transition::Completed {
            if let Some(knight_id) = quest.knight_id.or_else(|| actor.primary_knight()) {
                let award = progression::award(&mut tx, knight_id, self.completion_xp, self.overflow, now).await?;
                leveled_up_to = award.leveled_up_to;
                achievements.extend(award.achievement);
            }

            if let Some(knight_id) = quest.knight_id.filter(|_| quest.counts_toward_perfect_day()) {
                if db::count_pending_daily_quests(&mut tx, knight_id).await? == 0 {
                    let description = format!("Every daily quest completed on {}", now.format("%Y-%m-%d"));
                    achievements.push(
                        progression::record_achievement(
                            &mut tx,
                            AchievementOwner::Knight(knight_id),
                            progression::PERFECT_DAY_TITLE,
                            &description,
                            &actor.name,
                            now,
                        )
                        .await?,
                    );
                }
            }

            if quest.is_one_way() {
                let description = format!("{} completed the guild quest '{}'", actor.name, quest.title);
                achievements.push(
                    progression::record_achievement(
                        &mut tx,
                        AchievementOwner::Guild,
                        progression::GUILD_QUEST_TITLE,
                        &description,
                        &actor.name,
                        now,
                    )
                    .await?,
                );
            }
        }

        tx.commit().await?;

        info!(
            "Quest {} '{}' {:?} by {}",
            quest.id, quest.title, transition, actor.name
        );

        Ok(ToggleOutcome {
            quest,
            transition,
            achievements,
            leveled_up_to,
        })
    }

    pub async fn knight_profile(&self, knight_id: i64) -> Result<KnightProfile> {
        let mut conn = self.db.pool().acquire().await?;

        let knight = db::find_knight(&mut conn, knight_id)
            .await?
            .ok_or_else(|| QuestError::not_found("knight", knight_id))?;
        let quests = db::quests_for_knight(&mut conn, knight_id).await?;
        let achievements = db::achievements_for_knight(&mut conn, knight_id).await?;

        Ok(KnightProfile {
            xp_to_next_level: knight.xp_to_next_level(),
            knight,
            quests,
            achievements,
        })
    }

    /// Knights visible to a user: their own, or every knight for a guild master.
    pub async fn knights_for(&self, actor_id: i64) -> Result<Vec<Knight>> {
        let mut conn = self.db.pool().acquire().await?;

        let actor = db::find_actor(&mut conn, actor_id)
            .await?
            .ok_or_else(|| QuestError::not_found("user", actor_id))?;

        let knights = if actor.master {
            db::all_knights(&mut conn).await?
        } else {
            db::knights_for_user(&mut conn, actor.id).await?
        };
        Ok(knights)
    }

    pub async fn guild_achievements(&self) -> Result<Vec<Achievement>> {
        let mut conn = self.db.pool().acquire().await?;
        Ok(db::guild_achievements(&mut conn).await?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::quest::definition::{Category, Recurrence};
    use chrono::{Duration, TimeZone};

    struct Guild {
        db: Arc<Database>,
        board: QuestBoard,
        aria: Actor,
        aria_knight: Knight,
        bram: Actor,
        master: Actor,
    }

    async fn guild() -> Guild {
        let db = Arc::new(Database::in_memory().await.unwrap());
        let board = QuestBoard::new(Arc::clone(&db), 50);

        let aria = board.create_user("Aria", false).await.unwrap();
        let aria_knight = board
            .create_knight(Some(aria.id), "Aria of the Dawn", KnightClass::Warrior)
            .await
            .unwrap();
        let bram = board.create_user("Bram", false).await.unwrap();
        board.create_knight(Some(bram.id), "Bram", KnightClass::Archer).await.unwrap();
        let master = board.create_user("Gwen", true).await.unwrap();

        Guild { db, board, aria, aria_knight, bram, master }
    }

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 10, 12, 8, 15, 0).unwrap()
    }

    fn new_quest(title: &str, recurrence: Recurrence, scope: QuestScope, knight_id: Option<i64>) -> NewQuest {
        NewQuest {
            title: title.to_string(),
            description: None,
            category: Category::Cleaning,
            recurrence,
            scope,
            knight_id,
        }
    }

    async fn daily(g: &Guild, title: &str) -> Quest {
        g.board
            .create_quest_at(
                g.aria.id,
                new_quest(title, Recurrence::Daily, QuestScope::Personal, Some(g.aria_knight.id)),
                now(),
            )
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn test_perfect_day_scenario() {
        let g = guild().await;
        let q1 = daily(&g, "Make the bed").await;
        let q2 = daily(&g, "Wash dishes").await;
        let q3 = daily(&g, "Read").await;

        for quest in [&q1, &q2] {
            let outcome = g.board.toggle_at(quest.id, g.aria.id, now()).await.unwrap();
            assert_eq!(outcome.transition, Transition::Completed);
            assert!(outcome.achievements.iter().all(|a| a.title != progression::PERFECT_DAY_TITLE));
        }

        let done_at = now() + Duration::hours(2);
        let outcome = g.board.toggle_at(q3.id, g.aria.id, done_at).await.unwrap();
        let perfect: Vec<_> = outcome
            .achievements
            .iter()
            .filter(|a| a.title == progression::PERFECT_DAY_TITLE)
            .collect();
        assert_eq!(perfect.len(), 1);
        assert_eq!(perfect[0].created_at, done_at);
        assert_eq!(perfect[0].owner, AchievementOwner::Knight(g.aria_knight.id));

        let profile = g.board.knight_profile(g.aria_knight.id).await.unwrap();
        let stored = profile
            .achievements
            .iter()
            .filter(|a| a.title == progression::PERFECT_DAY_TITLE)
            .count();
        assert_eq!(stored, 1);
    }

    #[tokio::test]
    async fn test_completion_awards_experience_and_levels() {
        let g = guild().await;
        let q1 = daily(&g, "Stretch").await;
        let q2 = daily(&g, "Walk").await;

        let first = g.board.toggle_at(q1.id, g.aria.id, now()).await.unwrap();
        assert_eq!(first.leveled_up_to, None);

        let second = g.board.toggle_at(q2.id, g.aria.id, now()).await.unwrap();
        assert_eq!(second.leveled_up_to, Some(2));
        assert!(second.achievements.iter().any(|a| a.title == progression::LEVEL_UP_TITLE));

        let profile = g.board.knight_profile(g.aria_knight.id).await.unwrap();
        assert_eq!(profile.knight.level, 2);
        assert_eq!(profile.knight.experience, 0);
        assert_eq!(profile.xp_to_next_level, 200);
    }

    #[tokio::test]
    async fn test_carry_policy_keeps_surplus() {
        let db = Arc::new(Database::in_memory().await.unwrap());
        let board = QuestBoard::new(db, 130).with_overflow_policy(OverflowPolicy::Carry);
        let user = board.create_user("Aria", false).await.unwrap();
        let knight = board.create_knight(Some(user.id), "Aria", KnightClass::Mage).await.unwrap();
        let quest = board
            .create_quest_at(
                user.id,
                new_quest("Run", Recurrence::Daily, QuestScope::Personal, Some(knight.id)),
                now(),
            )
            .await
            .unwrap();

        let outcome = board.toggle_at(quest.id, user.id, now()).await.unwrap();
        assert_eq!(outcome.leveled_up_to, Some(2));

        let profile = board.knight_profile(knight.id).await.unwrap();
        assert_eq!((profile.knight.level, profile.knight.experience), (2, 30));
        assert_eq!(profile.xp_to_next_level, 170);
    }

    #[tokio::test]
    async fn test_daily_cooldown_round_trip() {
        let g = guild().await;
        let quest = daily(&g, "Floss").await;

        let done = g.board.toggle_at(quest.id, g.aria.id, now()).await.unwrap();
        assert_eq!(done.quest.reactivates_at, Some(now() + Duration::hours(24)));

        let held = g.board.toggle_at(quest.id, g.aria.id, now() + Duration::hours(3)).await.unwrap();
        assert_eq!(held.transition, Transition::Held);
        assert!(held.quest.completed);

        let reopened = g.board.toggle_at(quest.id, g.aria.id, now() + Duration::hours(25)).await.unwrap();
        assert_eq!(reopened.transition, Transition::Reopened);
        assert!(!reopened.quest.completed);
        assert_eq!(reopened.quest.completed_by, None);
    }

    #[tokio::test]
    async fn test_non_recurring_toggles_freely() {
        let g = guild().await;
        let quest = g
            .board
            .create_quest_at(
                g.aria.id,
                new_quest("Fix the shelf", Recurrence::None, QuestScope::Personal, Some(g.aria_knight.id)),
                now(),
            )
            .await
            .unwrap();

        for expected in [true, false, true] {
            let outcome = g.board.toggle_at(quest.id, g.aria.id, now()).await.unwrap();
            assert_eq!(outcome.quest.completed, expected);
            assert_eq!(outcome.quest.reactivates_at, None);
        }
    }

    #[tokio::test]
    async fn test_guild_quest_one_way() {
        let g = guild().await;
        let quest = g
            .board
            .create_quest_at(
                g.master.id,
                new_quest("Hold the feast", Recurrence::None, QuestScope::GuildMaster, None),
                now(),
            )
            .await
            .unwrap();

        let outcome = g.board.toggle_at(quest.id, g.master.id, now()).await.unwrap();
        assert_eq!(outcome.transition, Transition::Completed);
        assert!(outcome.achievements.iter().any(|a| a.owner == AchievementOwner::Guild));

        let err = g.board.toggle_at(quest.id, g.master.id, now()).await.unwrap_err();
        assert!(matches!(err, QuestError::Irreversible(id) if id == quest.id));

        let guild = g.board.guild_achievements().await.unwrap();
        assert_eq!(guild.len(), 1);
    }

    #[tokio::test]
    async fn test_guild_quest_cannot_be_recurring() {
        let g = guild().await;

        for recurrence in [Recurrence::Daily, Recurrence::Weekly] {
            let err = g
                .board
                .create_quest_at(
                    g.master.id,
                    new_quest("Hold the feast", recurrence, QuestScope::GuildMaster, None),
                    now(),
                )
                .await
                .unwrap_err();
            assert!(matches!(err, QuestError::Validation(_)));
        }

        assert!(g.board.guild_achievements().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_failed_toggle_rolls_back() {
        let g = guild().await;
        let quest = daily(&g, "Polish armour").await;

        // Experience cannot be saved, so the award fails after the quest row was written
        sqlx::query(
            "CREATE TRIGGER block_progress BEFORE UPDATE ON knights \
             BEGIN SELECT RAISE(ABORT, 'progress locked'); END",
        )
        .execute(g.db.pool())
        .await
        .unwrap();

        let err = g.board.toggle_at(quest.id, g.aria.id, now()).await.unwrap_err();
        assert!(matches!(err, QuestError::Storage(_)));

        let profile = g.board.knight_profile(g.aria_knight.id).await.unwrap();
        let stored = profile.quests.iter().find(|q| q.id == quest.id).unwrap();
        assert!(!stored.completed);
        assert_eq!(stored.completed_at, None);
        assert_eq!(stored.reactivates_at, None);
        assert_eq!(stored.completed_by, None);
        assert_eq!((profile.knight.level, profile.knight.experience), (1, 0));
        assert!(profile.achievements.is_empty());
    }

    #[tokio::test]
    async fn test_failed_guild_achievement_rolls_back_completion() {
        let g = guild().await;
        let quest = g
            .board
            .create_quest_at(
                g.master.id,
                new_quest("Raise the banner", Recurrence::None, QuestScope::GuildMaster, None),
                now(),
            )
            .await
            .unwrap();

        sqlx::query(
            "CREATE TRIGGER block_achievements BEFORE INSERT ON achievements \
             BEGIN SELECT RAISE(ABORT, 'ledger closed'); END",
        )
        .execute(g.db.pool())
        .await
        .unwrap();

        let err = g.board.toggle_at(quest.id, g.master.id, now()).await.unwrap_err();
        assert!(matches!(err, QuestError::Storage(_)));

        sqlx::query("DROP TRIGGER block_achievements")
            .execute(g.db.pool())
            .await
            .unwrap();

        // Still pending, so the one-way completion can happen now
        let outcome = g.board.toggle_at(quest.id, g.master.id, now()).await.unwrap();
        assert_eq!(outcome.transition, Transition::Completed);
        assert_eq!(g.board.guild_achievements().await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_knights_for_owner_and_master() {
        let g = guild().await;
        let second = g
            .board
            .create_knight(Some(g.aria.id), "Aria of the Dusk", KnightClass::Mage)
            .await
            .unwrap();

        let own: Vec<i64> = g.board.knights_for(g.aria.id).await.unwrap().iter().map(|k| k.id).collect();
        assert_eq!(own, vec![g.aria_knight.id, second.id]);

        let bram = g.board.knights_for(g.bram.id).await.unwrap();
        assert_eq!(bram.len(), 1);
        assert_eq!(bram[0].owner_id, Some(g.bram.id));

        // The master owns no knights but sees all of them
        assert_eq!(g.board.knights_for(g.master.id).await.unwrap().len(), 3);

        let err = g.board.knights_for(404).await.unwrap_err();
        assert!(matches!(err, QuestError::NotFound { entity: "user", id: 404 }));
    }

    #[tokio::test]
    async fn test_toggle_permissions_and_missing_ids() {
        let g = guild().await;
        let quest = daily(&g, "Journal").await;

        let err = g.board.toggle_at(quest.id, g.bram.id, now()).await.unwrap_err();
        assert!(matches!(err, QuestError::Permission(_)));

        let by_master = g.board.toggle_at(quest.id, g.master.id, now()).await.unwrap();
        assert_eq!(by_master.quest.completed_by.as_deref(), Some("Gwen"));

        let err = g.board.toggle_at(9999, g.aria.id, now()).await.unwrap_err();
        assert!(matches!(err, QuestError::NotFound { entity: "quest", .. }));

        let err = g.board.toggle_at(quest.id, 9999, now()).await.unwrap_err();
        assert!(matches!(err, QuestError::NotFound { entity: "user", .. }));
    }

    #[tokio::test]
    async fn test_global_quest_credits_actor_knight() {
        let g = guild().await;
        let quest = g
            .board
            .create_quest_at(
                g.master.id,
                new_quest("Take out the trash", Recurrence::Weekly, QuestScope::Global, None),
                now(),
            )
            .await
            .unwrap();

        let outcome = g.board.toggle_at(quest.id, g.aria.id, now()).await.unwrap();
        assert_eq!(outcome.quest.reactivates_at, Some(now() + Duration::days(7)));

        let profile = g.board.knight_profile(g.aria_knight.id).await.unwrap();
        assert_eq!(profile.knight.experience, 50);
    }

    #[tokio::test]
    async fn test_create_quest_rules() {
        let g = guild().await;

        let err = g
            .board
            .create_quest_at(
                g.bram.id,
                new_quest("Sneaky", Recurrence::Daily, QuestScope::Personal, Some(g.aria_knight.id)),
                now(),
            )
            .await
            .unwrap_err();
        assert!(matches!(err, QuestError::Permission(_)));

        let err = g
            .board
            .create_quest_at(g.aria.id, new_quest("Guild", Recurrence::None, QuestScope::Global, None), now())
            .await
            .unwrap_err();
        assert!(matches!(err, QuestError::Permission(_)));

        let err = g
            .board
            .create_quest_at(g.aria.id, new_quest("  ", Recurrence::None, QuestScope::Personal, Some(g.aria_knight.id)), now())
            .await
            .unwrap_err();
        assert!(matches!(err, QuestError::Validation(_)));

        let err = g
            .board
            .create_quest_at(g.master.id, new_quest("Ghost", Recurrence::None, QuestScope::Personal, Some(404)), now())
            .await
            .unwrap_err();
        assert!(matches!(err, QuestError::NotFound { entity: "knight", id: 404 }));

        let quest = daily(&g, "  Tidy desk  ").await;
        assert_eq!(quest.title, "Tidy desk");
        assert_eq!(quest.completed_by, None);
    }
}
