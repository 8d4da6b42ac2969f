pub mod wager_store;

pub use wager_store::{StoredWager, WagerStore};

use crate::error::Result;
use crate::types::WagerChange;
use rusqlite::Connection;
use std::path::Path;
use tokio::sync::{broadcast, Mutex};

/// Capacity of the change-notification channel. Lagging subscribers
/// drop the oldest changes and re-read from the store.
const CHANGE_CHANNEL_CAPACITY: usize = 256;

pub struct Storage {
    conn: Mutex<Connection>,
    changes: broadcast::Sender<WagerChange>,
}

impl Storage {
    pub async fn new(db_path: &Path) -> Result<Self> {
        // Create parent directory if it doesn't exist
        if let Some(parent) = db_path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }

        let conn = Connection::open(db_path)?;
        let (changes, _) = broadcast::channel(CHANGE_CHANNEL_CAPACITY);
        let storage = Self {
            conn: Mutex::new(conn),
            changes,
        };

        storage.init_schema().await?;
        Ok(storage)
    }

    /// In-memory database, used by tests and the demo command.
    pub async fn in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        let (changes, _) = broadcast::channel(CHANGE_CHANNEL_CAPACITY);
        let storage = Self {
            conn: Mutex::new(conn),
            changes,
        };

        storage.init_schema().await?;
        Ok(storage)
    }

    async fn init_schema(&self) -> Result<()> {
        let conn = self.conn.lock().await;

        // Wagers table. Full record lives in the JSON `data` column;
        // `status` and `version` are broken out for queries and
        // conditional updates.
        conn.execute(
            "CREATE TABLE IF NOT EXISTS wagers (
                id TEXT PRIMARY KEY,
                status TEXT NOT NULL,
                version INTEGER NOT NULL,
                data TEXT NOT NULL,
                updated_at INTEGER NOT NULL
            )",
            [],
        )?;

        conn.execute(
            "CREATE INDEX IF NOT EXISTS idx_wagers_status ON wagers(status)",
            [],
        )?;

        Ok(())
    }

    pub async fn get_connection(&self) -> tokio::sync::MutexGuard<'_, Connection> {
        self.conn.lock().await
    }

    /// Subscribe to change notifications for all wagers. Fired after
    /// every acknowledged write, including inserts.
    pub fn subscribe(&self) -> broadcast::Receiver<WagerChange> {
        self.changes.subscribe()
    }

    pub(crate) fn notify(&self, change: WagerChange) {
        // Send only fails when nobody is listening; that's fine.
        let _ = self.changes.send(change);
    }
}
