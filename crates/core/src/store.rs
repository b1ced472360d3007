//! Local durable store for devices and challenges.
//!
//! SQLite backend (WAL mode for file databases) holding:
//! - `devices`: one row per paired peer
//! - `challenges`: one row per observed challenge, cascading on device deletion
//!
//! # Guarantees
//!
//! - A challenge's `signature` is written at most once (`claim_challenge`)
//! - A challenge's outcome (response or cancellation) is written at most once
//! - Deleting a device deletes its challenges

use rusqlite::{params, Connection, OpenFlags, OptionalExtension, Row};
use std::path::Path;
use std::sync::{Mutex, MutexGuard};
use tracing::{debug, info};

use crate::types::{Challenge, Device};
use crate::Result;

const DEVICE_COLUMNS: &str = "id, name, own_key_alias, peer_public_key, created_at, last_used";
const CHALLENGE_COLUMNS: &str =
    "id, timestamp, signature, response, responded_at, canceled, device_id";

/// Device and challenge store with a SQLite backend
pub struct Store {
    conn: Mutex<Connection>,
}

impl Store {
    /// Create or open a store at the specified path
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        info!(path = %path.display(), "Opening device store");

        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }

        let conn = Connection::open_with_flags(
            path,
            OpenFlags::SQLITE_OPEN_READ_WRITE
                | OpenFlags::SQLITE_OPEN_CREATE
                | OpenFlags::SQLITE_OPEN_NO_MUTEX,
        )?;
        conn.pragma_update(None, "journal_mode", "WAL")?;
        conn.pragma_update(None, "synchronous", "NORMAL")?;

        Self::from_connection(conn)
    }

    /// Create a transient store, mainly for tests
    pub fn open_in_memory() -> Result<Self> {
        Self::from_connection(Connection::open_in_memory()?)
    }

    fn from_connection(conn: Connection) -> Result<Self> {
        conn.pragma_update(None, "foreign_keys", "ON")?;
        Self::init_schema(&conn)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    fn init_schema(conn: &Connection) -> Result<()> {
        conn.execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS devices (
                id TEXT PRIMARY KEY NOT NULL,
                name TEXT NOT NULL,
                own_key_alias TEXT NOT NULL,
                peer_public_key BLOB NOT NULL,
                created_at INTEGER NOT NULL,
                last_used INTEGER NOT NULL
            );

            CREATE TABLE IF NOT EXISTS challenges (
                id TEXT PRIMARY KEY NOT NULL,
                timestamp INTEGER NOT NULL,
                signature TEXT,
                response TEXT,
                responded_at INTEGER,
                canceled INTEGER NOT NULL DEFAULT 0,
                device_id TEXT NOT NULL
                    REFERENCES devices(id) ON UPDATE CASCADE ON DELETE CASCADE
            );

            CREATE INDEX IF NOT EXISTS idx_challenges_device ON challenges(device_id, timestamp);
            "#,
        )?;
        Ok(())
    }

    fn conn(&self) -> MutexGuard<'_, Connection> {
        // A panic while holding the lock cannot leave a half-applied statement behind.
        self.conn.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Insert a newly paired device. Fails if the id is already present.
    pub fn insert_device(&self, device: &Device) -> Result<()> {
        self.conn().execute(
            "INSERT INTO devices (id, name, own_key_alias, peer_public_key, created_at, last_used)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            params![
                device.id,
                device.name,
                device.own_key_alias,
                device.peer_public_key,
                device.created_at as i64,
                device.last_used as i64,
            ],
        )?;
        debug!(device_id = %device.id, "Device stored");
        Ok(())
    }

    pub fn load_device(&self, id: &str) -> Result<Option<Device>> {
        let conn = self.conn();
        let mut stmt =
            conn.prepare(&format!("SELECT {DEVICE_COLUMNS} FROM devices WHERE id = ?1"))?;
        Ok(stmt.query_row([id], device_from_row).optional()?)
    }

    /// All devices, oldest pairing first
    pub fn load_devices(&self) -> Result<Vec<Device>> {
        let conn = self.conn();
        let mut stmt = conn.prepare(&format!(
            "SELECT {DEVICE_COLUMNS} FROM devices ORDER BY created_at"
        ))?;
        let devices = stmt
            .query_map([], device_from_row)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(devices)
    }

    /// Delete a device and, through the foreign key, its challenges.
    pub fn delete_device(&self, id: &str) -> Result<bool> {
        let removed = self.conn().execute("DELETE FROM devices WHERE id = ?1", [id])?;
        Ok(removed > 0)
    }

    pub fn update_last_used(&self, id: &str, last_used: u64) -> Result<()> {
        let updated = self.conn().execute(
            "UPDATE devices SET last_used = MAX(last_used, ?2) WHERE id = ?1",
            params![id, last_used as i64],
        )?;
        if updated == 0 {
            return Err(crate::Error::NotFound(format!("device {id}")));
        }
        Ok(())
    }

    /// Record the peer signature of a challenge on first observation.
    ///
    /// Check and write happen in one statement. Returns the stored challenge
    /// when this call set the signature, `None` when a signature was already
    /// present (duplicate delivery).
    pub fn claim_challenge(
        &self,
        id: &str,
        device_id: &str,
        timestamp: u64,
        signature: &str,
    ) -> Result<Option<Challenge>> {
        let conn = self.conn();
        let claimed = conn.execute(
            r#"
            INSERT INTO challenges (id, timestamp, signature, canceled, device_id)
            VALUES (?1, ?2, ?3, 0, ?4)
            ON CONFLICT(id) DO UPDATE SET
                signature = excluded.signature,
                timestamp = excluded.timestamp,
                device_id = excluded.device_id
            WHERE challenges.signature IS NULL
            "#,
            params![id, timestamp as i64, signature, device_id],
        )?;
        if claimed == 0 {
            return Ok(None);
        }

        let mut stmt = conn.prepare(&format!(
            "SELECT {CHALLENGE_COLUMNS} FROM challenges WHERE id = ?1"
        ))?;
        Ok(stmt.query_row([id], challenge_from_row).optional()?)
    }

    /// Insert or overwrite a challenge row.
    pub fn save_challenge(&self, challenge: &Challenge) -> Result<()> {
        self.conn().execute(
            r#"
            INSERT INTO challenges (id, timestamp, signature, response, responded_at, canceled, device_id)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
            ON CONFLICT(id) DO UPDATE SET
                timestamp = excluded.timestamp,
                signature = excluded.signature,
                response = excluded.response,
                responded_at = excluded.responded_at,
                canceled = excluded.canceled,
                device_id = excluded.device_id
            "#,
            params![
                challenge.id,
                challenge.timestamp as i64,
                challenge.signature,
                challenge.response,
                challenge.responded_at.map(|at| at as i64),
                challenge.canceled,
                challenge.device_id,
            ],
        )?;
        Ok(())
    }

    pub fn load_challenge(&self, id: &str) -> Result<Option<Challenge>> {
        let conn = self.conn();
        let mut stmt = conn.prepare(&format!(
            "SELECT {CHALLENGE_COLUMNS} FROM challenges WHERE id = ?1"
        ))?;
        Ok(stmt.query_row([id], challenge_from_row).optional()?)
    }

    /// Challenges of one device, newest first
    pub fn load_challenges(&self, device_id: &str) -> Result<Vec<Challenge>> {
        let conn = self.conn();
        let mut stmt = conn.prepare(&format!(
            "SELECT {CHALLENGE_COLUMNS} FROM challenges WHERE device_id = ?1 ORDER BY timestamp DESC"
        ))?;
        let challenges = stmt
            .query_map([device_id], challenge_from_row)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(challenges)
    }

    /// Record a signed response. Returns false if an outcome was already set.
    pub fn record_response(&self, id: &str, response: &str, responded_at: u64) -> Result<bool> {
        let updated = self.conn().execute(
            "UPDATE challenges SET response = ?2, responded_at = ?3
             WHERE id = ?1 AND response IS NULL AND canceled = 0",
            params![id, response, responded_at as i64],
        )?;
        Ok(updated > 0)
    }

    /// Record a cancellation. Returns false if an outcome was already set.
    pub fn record_canceled(&self, id: &str, responded_at: u64) -> Result<bool> {
        let updated = self.conn().execute(
            "UPDATE challenges SET canceled = 1, responded_at = ?2
             WHERE id = ?1 AND response IS NULL AND canceled = 0",
            params![id, responded_at as i64],
        )?;
        Ok(updated > 0)
    }
}

fn device_from_row(row: &Row<'_>) -> rusqlite::Result<Device> {
    Ok(Device {
        id: row.get(0)?,
        name: row.get(1)?,
        own_key_alias: row.get(2)?,
        peer_public_key: row.get(3)?,
        created_at: row.get::<_, i64>(4)? as u64,
        last_used: row.get::<_, i64>(5)? as u64,
    })
}

fn challenge_from_row(row: &Row<'_>) -> rusqlite::Result<Challenge> {
    Ok(Challenge {
        id: row.get(0)?,
        timestamp: row.get::<_, i64>(1)? as u64,
        signature: row.get(2)?,
        response: row.get(3)?,
        responded_at: row.get::<_, Option<i64>>(4)?.map(|at| at as u64),
        canceled: row.get(5)?,
        device_id: row.get(6)?,
    })
}
