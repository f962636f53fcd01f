use chrono::{DateTime, Utc};
use sqlx::sqlite::{Sqlite, SqliteConnection, SqlitePool, SqlitePoolOptions, SqliteRow};
use sqlx::{Row, Transaction};

use crate::knight::{Actor, Knight, KnightClass};
use crate::progression::{Achievement, AchievementOwner, NewAchievement};
use crate::quest::definition::{Category, Quest, QuestScope, Recurrence};

const QUEST_COLUMNS: &str = "id, title, description, category, recurrence, scope, knight_id, \
     completed, completed_at, reactivates_at, completed_by, created_at";

pub struct Database {
    pool: SqlitePool,
}

impl Database {
    pub async fn new(database_url: &str, max_connections: u32) -> Result<Self, sqlx::Error> {
        // Every pooled connection to :memory: would see its own empty database
        if database_url.starts_with("sqlite::memory:") {
            return Self::in_memory().await;
        }

        let pool = SqlitePoolOptions::new()
            .max_connections(max_connections.max(1))
            .connect(database_url)
            .await?;

        // Run migrations
        Self::migrate(&pool).await?;

        Ok(Self { pool })
    }

    /// Private in-memory database. A single long-lived connection keeps the
    /// data alive for the lifetime of the pool.
    pub async fn in_memory() -> Result<Self, sqlx::Error> {
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .idle_timeout(None)
            .max_lifetime(None)
            .connect("sqlite::memory:")
            .await?;

        Self::migrate(&pool).await?;

        Ok(Self { pool })
    }

    async fn migrate(pool: &SqlitePool) -> Result<(), sqlx::Error> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS users (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                name TEXT NOT NULL,
                master INTEGER NOT NULL DEFAULT 0,
                created_at TEXT NOT NULL
            )
            "#,
        )
        .execute(pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS knights (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                name TEXT NOT NULL,
                class TEXT NOT NULL,
                level INTEGER NOT NULL DEFAULT 1 CHECK (level >= 1),
                experience INTEGER NOT NULL DEFAULT 0 CHECK (experience >= 0),
                user_id INTEGER,
                FOREIGN KEY(user_id) REFERENCES users(id)
            )
            "#,
        )
        .execute(pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS quests (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                title TEXT NOT NULL,
                description TEXT,
                category TEXT NOT NULL,
                recurrence TEXT NOT NULL DEFAULT 'none',
                scope TEXT NOT NULL DEFAULT 'personal',
                knight_id INTEGER,
                completed INTEGER NOT NULL DEFAULT 0,
                completed_at TEXT,
                reactivates_at TEXT,
                completed_by TEXT,
                created_at TEXT NOT NULL,
                FOREIGN KEY(knight_id) REFERENCES knights(id)
            )
            "#,
        )
        .execute(pool)
        .await?;

        sqlx::query(
            "CREATE INDEX IF NOT EXISTS idx_quests_reset ON quests (recurrence, completed, reactivates_at)",
        )
        .execute(pool)
        .await?;

        sqlx::query("CREATE INDEX IF NOT EXISTS idx_quests_knight ON quests (knight_id)")
            .execute(pool)
            .await?;

        // Append-only: rows are inserted and never updated or deleted
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS achievements (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                title TEXT NOT NULL,
                description TEXT NOT NULL,
                created_at TEXT NOT NULL,
                knight_id INTEGER,
                author TEXT NOT NULL,
                FOREIGN KEY(knight_id) REFERENCES knights(id)
            )
            "#,
        )
        .execute(pool)
        .await?;

        tracing::info!("Database migrations complete");
        Ok(())
    }

    /// Start a transaction; dropping it without commit rolls back
    pub async fn begin(&self) -> Result<Transaction<'static, Sqlite>, sqlx::Error> {
        self.pool.begin().await
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }
}

// ============================================================================
// Row decoding
// ============================================================================

fn decode_flag<T>(row: &SqliteRow, column: &str, parse: fn(&str) -> Option<T>) -> Result<T, sqlx::Error> {
    let raw: String = row.try_get(column)?;
    parse(&raw).ok_or_else(|| {
        sqlx::Error::Decode(format!("unexpected value '{}' in column {}", raw, column).into())
    })
}

fn quest_from_row(r: &SqliteRow) -> Result<Quest, sqlx::Error> {
    Ok(Quest {
        id: r.try_get("id")?,
        title: r.try_get("title")?,
        description: r.try_get("description")?,
        category: decode_flag(r, "category", Category::from_str)?,
        recurrence: decode_flag(r, "recurrence", Recurrence::from_str)?,
        scope: decode_flag(r, "scope", QuestScope::from_str)?,
        knight_id: r.try_get("knight_id")?,
        completed: r.try_get("completed")?,
        completed_at: r.try_get("completed_at")?,
        reactivates_at: r.try_get("reactivates_at")?,
        completed_by: r.try_get("completed_by")?,
        created_at: r.try_get("created_at")?,
    })
}

fn knight_from_row(r: &SqliteRow) -> Result<Knight, sqlx::Error> {
    Ok(Knight {
        id: r.try_get("id")?,
        name: r.try_get("name")?,
        class: decode_flag(r, "class", KnightClass::from_str)?,
        level: r.try_get("level")?,
        experience: r.try_get("experience")?,
        owner_id: r.try_get("user_id")?,
    })
}

fn achievement_from_row(r: &SqliteRow) -> Result<Achievement, sqlx::Error> {
    let knight_id: Option<i64> = r.try_get("knight_id")?;
    Ok(Achievement {
        id: r.try_get("id")?,
        title: r.try_get("title")?,
        description: r.try_get("description")?,
        created_at: r.try_get("created_at")?,
        owner: knight_id.map_or(AchievementOwner::Guild, AchievementOwner::Knight),
        author: r.try_get("author")?,
    })
}

// ============================================================================
// Users and knights
// ============================================================================

pub async fn insert_user(
    conn: &mut SqliteConnection,
    name: &str,
    master: bool,
    now: DateTime<Utc>,
) -> Result<i64, sqlx::Error> {
    let result = sqlx::query("INSERT INTO users (name, master, created_at) VALUES (?, ?, ?)")
        .bind(name)
        .bind(master)
        .bind(now)
        .execute(&mut *conn)
        .await?;

    Ok(result.last_insert_rowid())
}

/// Load a user together with the ids of the knights they own
pub async fn find_actor(conn: &mut SqliteConnection, user_id: i64) -> Result<Option<Actor>, sqlx::Error> {
    let Some(row) = sqlx::query("SELECT id, name, master FROM users WHERE id = ?")
        .bind(user_id)
        .fetch_optional(&mut *conn)
        .await?
    else {
        return Ok(None);
    };

    let knight_rows = sqlx::query("SELECT id FROM knights WHERE user_id = ? ORDER BY id")
        .bind(user_id)
        .fetch_all(&mut *conn)
        .await?;

    let knight_ids = knight_rows
        .iter()
        .map(|r| r.try_get("id"))
        .collect::<Result<Vec<i64>, _>>()?;

    Ok(Some(Actor {
        id: row.try_get("id")?,
        name: row.try_get("name")?,
        master: row.try_get("master")?,
        knight_ids,
    }))
}

pub async fn insert_knight(
    conn: &mut SqliteConnection,
    name: &str,
    class: KnightClass,
    owner_id: Option<i64>,
) -> Result<i64, sqlx::Error> {
    let result = sqlx::query("INSERT INTO knights (name, class, user_id) VALUES (?, ?, ?)")
        .bind(name)
        .bind(class.as_str())
        .bind(owner_id)
        .execute(&mut *conn)
        .await?;

    Ok(result.last_insert_rowid())
}

pub async fn find_knight(conn: &mut SqliteConnection, knight_id: i64) -> Result<Option<Knight>, sqlx::Error> {
    let row = sqlx::query("SELECT id, name, class, level, experience, user_id FROM knights WHERE id = ?")
        .bind(knight_id)
        .fetch_optional(&mut *conn)
        .await?;

    row.as_ref().map(knight_from_row).transpose()
}

/// Knights owned by one user, oldest first
pub async fn knights_for_user(conn: &mut SqliteConnection, user_id: i64) -> Result<Vec<Knight>, sqlx::Error> {
    let rows = sqlx::query(
        "SELECT id, name, class, level, experience, user_id FROM knights WHERE user_id = ? ORDER BY id",
    )
    .bind(user_id)
    .fetch_all(&mut *conn)
    .await?;

    rows.iter().map(knight_from_row).collect()
}

pub async fn all_knights(conn: &mut SqliteConnection) -> Result<Vec<Knight>, sqlx::Error> {
    let rows = sqlx::query("SELECT id, name, class, level, experience, user_id FROM knights ORDER BY id")
        .fetch_all(&mut *conn)
        .await?;

    rows.iter().map(knight_from_row).collect()
}

pub async fn save_knight_progress(conn: &mut SqliteConnection, knight: &Knight) -> Result<(), sqlx::Error> {
    sqlx::query("UPDATE knights SET level = ?, experience = ? WHERE id = ?")
        .bind(knight.level)
        .bind(knight.experience)
        .bind(knight.id)
        .execute(&mut *conn)
        .await?;

    Ok(())
}

// ============================================================================
// Quests
// ============================================================================

pub async fn insert_quest(
    conn: &mut SqliteConnection,
    title: &str,
    description: Option<&str>,
    category: Category,
    recurrence: Recurrence,
    scope: QuestScope,
    knight_id: Option<i64>,
    now: DateTime<Utc>,
) -> Result<i64, sqlx::Error> {
    let result = sqlx::query(
        r#"INSERT INTO quests (title, description, category, recurrence, scope, knight_id, created_at)
           VALUES (?, ?, ?, ?, ?, ?, ?)"#,
    )
    .bind(title)
    .bind(description)
    .bind(category.as_str())
    .bind(recurrence.as_str())
    .bind(scope.as_str())
    .bind(knight_id)
    .bind(now)
    .execute(&mut *conn)
    .await?;

    Ok(result.last_insert_rowid())
}

pub async fn find_quest(conn: &mut SqliteConnection, quest_id: i64) -> Result<Option<Quest>, sqlx::Error> {
    let row = sqlx::query(&format!("SELECT {} FROM quests WHERE id = ?", QUEST_COLUMNS))
        .bind(quest_id)
        .fetch_optional(&mut *conn)
        .await?;

    row.as_ref().map(quest_from_row).transpose()
}

pub async fn quests_for_knight(conn: &mut SqliteConnection, knight_id: i64) -> Result<Vec<Quest>, sqlx::Error> {
    let rows = sqlx::query(&format!(
        "SELECT {} FROM quests WHERE knight_id = ? ORDER BY id",
        QUEST_COLUMNS
    ))
    .bind(knight_id)
    .fetch_all(&mut *conn)
    .await?;

    rows.iter().map(quest_from_row).collect()
}

/// Persist the completion fields of a quest
pub async fn save_quest_state(conn: &mut SqliteConnection, quest: &Quest) -> Result<(), sqlx::Error> {
    sqlx::query(
        r#"UPDATE quests SET
            completed = ?, completed_at = ?, reactivates_at = ?, completed_by = ?
        WHERE id = ?"#,
    )
    .bind(quest.completed)
    .bind(quest.completed_at)
    .bind(quest.reactivates_at)
    .bind(&quest.completed_by)
    .bind(quest.id)
    .execute(&mut *conn)
    .await?;

    Ok(())
}

/// Personal daily quests of a knight that are still pending
pub async fn count_pending_daily_quests(conn: &mut SqliteConnection, knight_id: i64) -> Result<i64, sqlx::Error> {
    let row = sqlx::query(
        r#"SELECT COUNT(*) AS pending FROM quests
           WHERE knight_id = ? AND scope = 'personal' AND recurrence = 'daily' AND completed = 0"#,
    )
    .bind(knight_id)
    .fetch_one(&mut *conn)
    .await?;

    row.try_get("pending")
}

/// Reset every completed quest of `recurrence` whose cooldown ended at or
/// before `now`. Returns the number of quests reset.
pub async fn reset_expired_quests(
    conn: &mut SqliteConnection,
    recurrence: Recurrence,
    now: DateTime<Utc>,
) -> Result<u64, sqlx::Error> {
    let result = sqlx::query(
        r#"UPDATE quests SET
            completed = 0, completed_at = NULL, reactivates_at = NULL, completed_by = NULL
        WHERE recurrence = ? AND completed = 1 AND scope != 'guild_master'
            AND reactivates_at IS NOT NULL AND reactivates_at <= ?"#,
    )
    .bind(recurrence.as_str())
    .bind(now)
    .execute(&mut *conn)
    .await?;

    Ok(result.rows_affected())
}

// ============================================================================
// Achievements
// ============================================================================

pub async fn insert_achievement(
    conn: &mut SqliteConnection,
    new: &NewAchievement,
) -> Result<Achievement, sqlx::Error> {
    let knight_id = match new.owner {
        AchievementOwner::Knight(id) => Some(id),
        AchievementOwner::Guild => None,
    };

    let result = sqlx::query(
        "INSERT INTO achievements (title, description, created_at, knight_id, author) VALUES (?, ?, ?, ?, ?)",
    )
    .bind(&new.title)
    .bind(&new.description)
    .bind(new.created_at)
    .bind(knight_id)
    .bind(&new.author)
    .execute(&mut *conn)
    .await?;

    Ok(Achievement {
        id: result.last_insert_rowid(),
        title: new.title.clone(),
        description: new.description.clone(),
        created_at: new.created_at,
        owner: new.owner,
        author: new.author.clone(),
    })
}

/// Achievements of one knight, newest first
pub async fn achievements_for_knight(
    conn: &mut SqliteConnection,
    knight_id: i64,
) -> Result<Vec<Achievement>, sqlx::Error> {
    let rows = sqlx::query(
        r#"SELECT id, title, description, created_at, knight_id, author FROM achievements
           WHERE knight_id = ? ORDER BY created_at DESC, id DESC"#,
    )
    .bind(knight_id)
    .fetch_all(&mut *conn)
    .await?;

    rows.iter().map(achievement_from_row).collect()
}

/// Guild-wide achievements, newest first
pub async fn guild_achievements(conn: &mut SqliteConnection) -> Result<Vec<Achievement>, sqlx::Error> {
    let rows = sqlx::query(
        r#"SELECT id, title, description, created_at, knight_id, author FROM achievements
           WHERE knight_id IS NULL ORDER BY created_at DESC, id DESC"#,
    )
    .fetch_all(&mut *conn)
    .await?;

    rows.iter().map(achievement_from_row).collect()
}
