use crate::error::{CoreError, Result};
use crate::storage::Storage;
use crate::types::{Wager, WagerChange, WagerId, WagerStatus};
use chrono::Utc;
use rusqlite::{params, OptionalExtension};

/// A wager together with the store version that read observed.
/// The version is the token for conditional writes; it never lives
/// inside the `Wager` record itself.
#[derive(Debug, Clone)]
pub struct StoredWager {
    pub wager: Wager,
    pub version: i64,
}

pub struct WagerStore<'a> {
    storage: &'a Storage,
}

impl<'a> WagerStore<'a> {
    pub fn new(storage: &'a Storage) -> Self {
        Self { storage }
    }

    pub async fn insert(&self, wager: &Wager) -> Result<()> {
        let data = serde_json::to_string(wager)?;
        let conn = self.storage.get_connection().await;

        conn.execute(
            "INSERT INTO wagers (id, status, version, data, updated_at)
             VALUES (?1, ?2, 0, ?3, ?4)",
            params![
                wager.id.to_string(),
                wager.status.as_str(),
                data,
                Utc::now().timestamp(),
            ],
        )?;
        drop(conn);

        self.storage.notify(WagerChange {
            id: wager.id,
            version: 0,
            status: wager.status,
        });

        Ok(())
    }

    pub async fn get(&self, id: WagerId) -> Result<StoredWager> {
        let conn = self.storage.get_connection().await;

        let row = conn
            .query_row(
                "SELECT data, version FROM wagers WHERE id = ?1",
                params![id.to_string()],
                |row| {
                    let data: String = row.get(0)?;
                    let version: i64 = row.get(1)?;
                    Ok((data, version))
                },
            )
            .optional()?;

        let (data, version) = row.ok_or_else(|| CoreError::WagerNotFound(id.to_string()))?;
        let wager: Wager = serde_json::from_str(&data)?;

        Ok(StoredWager { wager, version })
    }

    /// Conditional write: succeeds only if the stored version still
    /// equals `expected`. This is the serialization point for every
    /// concurrent mutation of a wager.
    pub async fn update_if_version(
        &self,
        id: WagerId,
        expected: i64,
        wager: &Wager,
    ) -> Result<i64> {
        let data = serde_json::to_string(wager)?;
        let conn = self.storage.get_connection().await;

        let updated = conn.execute(
            "UPDATE wagers SET status = ?1, version = version + 1, data = ?2, updated_at = ?3
             WHERE id = ?4 AND version = ?5",
            params![
                wager.status.as_str(),
                data,
                Utc::now().timestamp(),
                id.to_string(),
                expected,
            ],
        )?;
        drop(conn);

        if updated == 0 {
            return Err(CoreError::VersionConflict {
                id: id.to_string(),
                expected,
            });
        }

        let version = expected + 1;
        self.storage.notify(WagerChange {
            id,
            version,
            status: wager.status,
        });

        Ok(version)
    }

    pub async fn list_open(&self) -> Result<Vec<Wager>> {
        self.list_by_status(WagerStatus::Open).await
    }

    /// Active wagers carry armed forfeit deadlines; used to resume
    /// timers from persisted state after a restart.
    pub async fn list_active(&self) -> Result<Vec<Wager>> {
        self.list_by_status(WagerStatus::Active).await
    }

    /// Settled wagers, newest first. Feeds the standings read model.
    pub async fn list_settled(&self) -> Result<Vec<Wager>> {
        self.list_by_status(WagerStatus::Settled).await
    }

    async fn list_by_status(&self, status: WagerStatus) -> Result<Vec<Wager>> {
        let conn = self.storage.get_connection().await;

        let mut stmt = conn.prepare(
            "SELECT data FROM wagers WHERE status = ?1 ORDER BY updated_at DESC",
        )?;
        let rows = stmt.query_map(params![status.as_str()], |row| {
            let data: String = row.get(0)?;
            Ok(data)
        })?;

        let mut wagers = Vec::new();
        for row in rows {
            wagers.push(serde_json::from_str(&row?)?);
        }

        Ok(wagers)
    }
}
