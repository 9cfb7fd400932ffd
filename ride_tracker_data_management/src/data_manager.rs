use std::path::{Path, PathBuf};

use async_trait::async_trait;
use chrono::Utc;
use ride_tracker_lib::{
    collaborators::{PersistenceError, RideSink},
    log_entry::{HistoryFilter, LogEntry, NewEntry},
    ride_session::RideSummary,
    user::{OwnerId, User},
};
use sha2::{Digest, Sha256};
use tokio::sync::broadcast;

use crate::{database::db::RideDatabase, DataManagerError, DATABASE_PATH, DATA_DIR};

const LIVE_CHANNEL_CAPACITY: usize = 100;

#[derive(Clone)]
pub struct DataManager {
    pub(crate) database: RideDatabase,
    live_entries: broadcast::Sender<LogEntry>,
}

/// The public interface for all ride tracker data management.
impl DataManager {
    /// Opens the database under the project's data directory.
    pub async fn start() -> Result<Self, DataManagerError> {
        let root: PathBuf = project_root::get_project_root()
            .map_err(|e| DataManagerError::DataDir(format!("Failed to find project root: {e}")))?;
        Self::open(&root.join(DATABASE_PATH)).await
    }

    pub async fn open(database_path: &Path) -> Result<Self, DataManagerError> {
        // Create data dir if it doesn't exist
        let data_dir = database_path.parent().map(Path::to_path_buf).unwrap_or_else(|| PathBuf::from(DATA_DIR));
        if !data_dir.as_os_str().is_empty() && !data_dir.exists() {
            std::fs::create_dir_all(&data_dir)
                .map_err(|e| DataManagerError::DataDir(format!("Failed to create data directory {:?}: {e}", data_dir)))?;
        }

        let database = RideDatabase::connect(database_path).await?;
        tracing::info!("Opened database {:?}", database_path);

        Ok(Self::with_database(database))
    }

    pub async fn in_memory() -> Result<Self, DataManagerError> {
        Ok(Self::with_database(RideDatabase::connect_in_memory().await?))
    }

    fn with_database(database: RideDatabase) -> Self {
        let (live_entries, _) = broadcast::channel(LIVE_CHANNEL_CAPACITY);
        DataManager {
            database,
            live_entries,
        }
    }

    /// Creates a user and returns it together with its API token. Only the token's hash is
    /// stored, so this is the one chance to see it.
    pub async fn register_user(&self, name: &str) -> Result<(User, String), DataManagerError> {
        let owner_id = OwnerId::new(hex::encode(rand::random::<[u8; 8]>()))
            .ok_or_else(|| DataManagerError::Database("Generated empty owner id".to_string()))?;
        let token = hex::encode(rand::random::<[u8; 32]>());

        let user = self.database.insert_user(&owner_id, name.trim(), &hash_token(&token), Utc::now()).await?;
        tracing::info!("Registered user {} ({})", user.name, user.owner_id);

        Ok((user, token))
    }

    pub async fn authenticate(&self, token: &str) -> Result<Option<User>, DataManagerError> {
        let token = token.trim();
        if token.is_empty() {
            return Ok(None);
        }
        self.database.get_user_by_token_hash(&hash_token(token)).await
    }

    pub async fn get_users(&self) -> Result<Vec<User>, DataManagerError> {
        self.database.get_users().await
    }

    /// Stores the entry with the current time as its creation time and notifies live
    /// history subscribers.
    pub async fn append_entry(&self, owner: &OwnerId, entry: NewEntry) -> Result<LogEntry, DataManagerError> {
        let entry = self.database.insert_entry(owner, entry, Utc::now()).await?;
        tracing::debug!("Stored {} entry {} for {}", entry.kind, entry.entry_id, owner);

        // No subscribers is fine
        let _ = self.live_entries.send(entry.clone());
        Ok(entry)
    }

    /// Owner's entries, newest first.
    pub async fn history(&self, owner: &OwnerId, filter: HistoryFilter) -> Result<Vec<LogEntry>, DataManagerError> {
        self.database.get_entries(owner, filter.kind()).await
    }

    pub async fn delete_entry(&self, owner: &OwnerId, entry_id: i64) -> Result<bool, DataManagerError> {
        let deleted = self.database.delete_entry(owner, entry_id).await?;
        if deleted {
            tracing::debug!("Deleted entry {} of {}", entry_id, owner);
        }
        Ok(deleted)
    }

    /// Entries appended for `owner` from now on.
    pub fn subscribe_history(&self, owner: &OwnerId, filter: HistoryFilter) -> HistorySubscription {
        HistorySubscription {
            owner: owner.clone(),
            filter,
            receiver: self.live_entries.subscribe(),
        }
    }
}

#[async_trait]
impl RideSink for DataManager {
    async fn append_ride(&self, owner: &OwnerId, summary: &RideSummary) -> Result<(), PersistenceError> {
        self.append_entry(owner, NewEntry::ride(summary)).await
            .map(|_| ())
            .map_err(|e| PersistenceError(e.to_string()))
    }
}

pub struct HistorySubscription {
    owner: OwnerId,
    filter: HistoryFilter,
    receiver: broadcast::Receiver<LogEntry>,
}

impl HistorySubscription {
    /// Waits for the next matching entry. `None` once the data manager is gone.
    pub async fn next(&mut self) -> Option<LogEntry> {
        loop {
            match self.receiver.recv().await {
                Ok(entry) if entry.owner_id == self.owner && self.filter.matches(entry.kind) => return Some(entry),
                Ok(_) => continue,
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    tracing::warn!("History subscriber of {} skipped {} entries", self.owner, skipped);
                }
                Err(broadcast::error::RecvError::Closed) => return None,
            }
        }
    }
}

fn hash_token(token: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(token.as_bytes());
    hex::encode(hasher.finalize())
}
