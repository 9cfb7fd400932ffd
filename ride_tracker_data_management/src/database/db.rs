use std::{path::Path, str::FromStr};

use chrono::{DateTime, Utc};
use const_format::concatcp;
use ride_tracker_lib::{
    log_entry::{EntryKind, LogEntry, NewEntry},
    user::{OwnerId, User},
};
use sqlx::{
    query, query_as,
    sqlite::{SqliteConnectOptions, SqlitePoolOptions},
    Executor, Pool, Sqlite,
};

use crate::DataManagerError;

use super::constants::*;

const SELECT_HISTORY: &str = concatcp!(
    "SELECT * FROM ", ENTRIES_TABLE_NAME, " WHERE ", OWNER_ID, " = ?1 ORDER BY ", CREATED_AT, " DESC, ", ENTRY_ID, " DESC"
);
const SELECT_HISTORY_OF_KIND: &str = concatcp!(
    "SELECT * FROM ", ENTRIES_TABLE_NAME, " WHERE ", OWNER_ID, " = ?1 AND ", KIND, " = ?2 ORDER BY ", CREATED_AT, " DESC, ", ENTRY_ID, " DESC"
);

#[derive(Clone)]
pub struct RideDatabase {
    pool: Pool<Sqlite>,
}

impl RideDatabase {
    pub async fn connect(path: &Path) -> Result<Self, DataManagerError> {
        let options = SqliteConnectOptions::new()
            .filename(path)
            .create_if_missing(true);

        let pool = SqlitePoolOptions::new()
            .connect_with(options).await
            .map_err(|e| DataManagerError::Database(format!("Failed to connect to database {:?}: {e}", path)))?;

        let db = Self { pool };
        db.init().await?;

        Ok(db)
    }

    /// Private database living as long as the pool. Everything goes through one connection,
    /// since each sqlite memory connection is its own database.
    pub async fn connect_in_memory() -> Result<Self, DataManagerError> {
        let options = SqliteConnectOptions::from_str("sqlite::memory:")
            .map_err(|e| DataManagerError::Database(format!("Invalid memory database url: {e}")))?;

        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .idle_timeout(None)
            .max_lifetime(None)
            .connect_with(options).await
            .map_err(|e| DataManagerError::Database(format!("Failed to open memory database: {e}")))?;

        let db = Self { pool };
        db.init().await?;

        Ok(db)
    }

    pub async fn init(&self) -> Result<(), DataManagerError> {
        self.pool.execute(concatcp!("
            CREATE TABLE IF NOT EXISTS ", USERS_TABLE_NAME, "(",
                OWNER_ID,   " TEXT PRIMARY KEY,",
                NAME,       " TEXT NOT NULL,",
                TOKEN_HASH, " TEXT NOT NULL UNIQUE,",
                CREATED_AT, " TIMESTAMP NOT NULL);

            CREATE TABLE IF NOT EXISTS ", ENTRIES_TABLE_NAME, "(",
                ENTRY_ID,         " INTEGER PRIMARY KEY AUTOINCREMENT,",
                OWNER_ID,         " TEXT NOT NULL,",
                KIND,             " TEXT NOT NULL,",
                AMOUNT,           " REAL NOT NULL,",
                DURATION_SECONDS, " INTEGER,",
                COST,             " REAL,",
                ODOMETER,         " REAL,",
                DESCRIPTION,      " TEXT NOT NULL,",
                CREATED_AT,       " TIMESTAMP NOT NULL
            );

            CREATE INDEX IF NOT EXISTS entries_by_owner ON ", ENTRIES_TABLE_NAME, "(", OWNER_ID, ", ", CREATED_AT, ")"
        )).await
            .map_err(|e| DataManagerError::Database(format!("Failed to create tables: {e}")))
            .map(|_| ())
    }

    pub async fn insert_user(&self, owner_id: &OwnerId, name: &str, token_hash: &str, created_at: DateTime<Utc>) -> Result<User, DataManagerError> {
        query(concatcp!("
            INSERT INTO ", USERS_TABLE_NAME, "(", OWNER_ID, ", ", NAME, ", ", TOKEN_HASH, ", ", CREATED_AT, ")
            VALUES (?1, ?2, ?3, ?4)"))
                .bind(owner_id.as_str())
                .bind(name)
                .bind(token_hash)
                .bind(created_at)
                .execute(&self.pool).await
                .map_err(|e| DataManagerError::Database(format!("Failed to insert user: {e}")))?;

        Ok(User {
            owner_id: owner_id.clone(),
            name: name.to_string(),
            created_at,
        })
    }

    pub async fn get_user_by_token_hash(&self, token_hash: &str) -> Result<Option<User>, DataManagerError> {
        let row = query_as::<_, (String, String, DateTime<Utc>)>(concatcp!(
            "SELECT ", OWNER_ID, ", ", NAME, ", ", CREATED_AT, " FROM ", USERS_TABLE_NAME, " WHERE ", TOKEN_HASH, " = ?1"))
                .bind(token_hash)
                .fetch_optional(&self.pool).await
                .map_err(|e| DataManagerError::Database(format!("Failed to look up user: {e}")))?;

        Ok(row.and_then(|(owner_id, name, created_at)| {
            OwnerId::new(owner_id).map(|owner_id| User { owner_id, name, created_at })
        }))
    }

    pub async fn get_users(&self) -> Result<Vec<User>, DataManagerError> {
        let rows = query_as::<_, (String, String, DateTime<Utc>)>(concatcp!(
            "SELECT ", OWNER_ID, ", ", NAME, ", ", CREATED_AT, " FROM ", USERS_TABLE_NAME, " ORDER BY ", CREATED_AT))
                .fetch_all(&self.pool).await
                .map_err(|e| DataManagerError::Database(format!("Failed to get users: {e}")))?;

        Ok(rows.into_iter()
            .filter_map(|(owner_id, name, created_at)| {
                OwnerId::new(owner_id).map(|owner_id| User { owner_id, name, created_at })
            })
            .collect())
    }

    pub async fn insert_entry(&self, owner_id: &OwnerId, entry: NewEntry, created_at: DateTime<Utc>) -> Result<LogEntry, DataManagerError> {
        let duration_seconds = entry.duration_seconds
            .map(i64::try_from)
            .transpose()
            .map_err(|_| DataManagerError::Database("Ride duration out of range".to_string()))?;

        let id = query_as::<_, (i64,)>(concatcp!("
            INSERT INTO ", ENTRIES_TABLE_NAME, "(",
            ENTRY_ID, ", ", OWNER_ID, ", ", KIND, ", ", AMOUNT, ", ", DURATION_SECONDS, ", ", COST, ", ", ODOMETER, ", ", DESCRIPTION, ", ", CREATED_AT, ")
            VALUES (NULL, ?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8) RETURNING ", ENTRY_ID))
                .bind(owner_id.as_str())
                .bind(entry.kind.as_str())
                .bind(entry.amount)
                .bind(duration_seconds)
                .bind(entry.cost)
                .bind(entry.odometer)
                .bind(&entry.description)
                .bind(created_at)
                .fetch_one(&self.pool).await
                .map_err(|e| DataManagerError::Database(format!("Failed to insert entry: {e}")))
                .map(|row| row.0)?;

        Ok(LogEntry::new(id, owner_id.clone(), entry, created_at))
    }

    /// Newest first.
    pub async fn get_entries(&self, owner_id: &OwnerId, kind: Option<EntryKind>) -> Result<Vec<LogEntry>, DataManagerError> {
        let entries = match kind {
            None => query_as::<_, LogEntry>(SELECT_HISTORY)
                .bind(owner_id.as_str())
                .fetch_all(&self.pool).await,
            Some(kind) => query_as::<_, LogEntry>(SELECT_HISTORY_OF_KIND)
                .bind(owner_id.as_str())
                .bind(kind.as_str())
                .fetch_all(&self.pool).await,
        };

        entries.map_err(|e| DataManagerError::Database(format!("Failed to get entries: {e}")))
    }

    pub async fn delete_entry(&self, owner_id: &OwnerId, entry_id: i64) -> Result<bool, DataManagerError> {
        query(concatcp!("DELETE FROM ", ENTRIES_TABLE_NAME, " WHERE ", ENTRY_ID, " = ?1 AND ", OWNER_ID, " = ?2"))
            .bind(entry_id)
            .bind(owner_id.as_str())
            .execute(&self.pool).await
            .map_err(|e| DataManagerError::Database(format!("Failed to delete entry: {e}")))
            .map(|result| result.rows_affected() > 0)
    }
}
