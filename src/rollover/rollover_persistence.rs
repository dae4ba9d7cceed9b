//! Rollover Persistence Layer
//!
//! SQLite storage for zones, signing keys, per-zone rollover markers and the
//! audit log. The table layout follows the authoritative server's relational
//! backend so the engine reads the same rows the server signs with.

use async_trait::async_trait;
use rusqlite::types::Type;
use rusqlite::{params, Connection, OptionalExtension};
use std::sync::Arc;
use tokio::sync::Mutex;

use super::{AuditEvent, AuditSink, RolloverError, SigningKey, Zone};

/// Read accessor over the server's signing keys
#[async_trait]
pub trait KeyInventory: Send + Sync {
    /// Zones holding at least one active signing key, ordered by id
    async fn zones_with_active_keys(&self) -> Result<Vec<Zone>, RolloverError>;

    /// All signing keys of a zone, ascending by id
    async fn list_keys(&self, zone_id: i64) -> Result<Vec<SigningKey>, RolloverError>;
}

/// Generic per-zone key/value marker storage
#[async_trait]
pub trait MetadataStore: Send + Sync {
    async fn get(&self, zone_id: i64, kind: &str) -> Result<Option<String>, RolloverError>;
    async fn set(&self, zone_id: i64, kind: &str, value: &str) -> Result<(), RolloverError>;
    async fn delete(&self, zone_id: i64, kind: &str) -> Result<(), RolloverError>;
}

fn storage_err(context: &str) -> impl Fn(rusqlite::Error) -> RolloverError + '_ {
    move |e| RolloverError::StorageError(format!("{}: {}", context, e))
}

/// SQLite persistence for rollover state
#[derive(Clone)]
pub struct RolloverPersistence {
    conn: Arc<Mutex<Connection>>,
}

impl RolloverPersistence {
    /// Open (or create) the database at the given path
    pub fn new(db_path: &str) -> Result<Self, RolloverError> {
        let conn = Connection::open(db_path).map_err(storage_err("Failed to open database"))?;

        Self::create_tables(&conn)?;

        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    /// Create an in-memory database (useful for testing)
    pub fn in_memory() -> Result<Self, RolloverError> {
        let conn = Connection::open_in_memory()
            .map_err(storage_err("Failed to open in-memory database"))?;

        Self::create_tables(&conn)?;

        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    fn create_tables(conn: &Connection) -> Result<(), RolloverError> {
        conn.execute_batch(
            "PRAGMA foreign_keys = ON;

            CREATE TABLE IF NOT EXISTS domains (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                name TEXT NOT NULL UNIQUE
            );

            CREATE TABLE IF NOT EXISTS cryptokeys (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                domain_id INTEGER NOT NULL,
                flags INTEGER NOT NULL,
                active INTEGER NOT NULL DEFAULT 1,
                content TEXT NOT NULL,
                FOREIGN KEY (domain_id) REFERENCES domains(id) ON DELETE CASCADE
            );
            CREATE INDEX IF NOT EXISTS idx_cryptokeys_domain ON cryptokeys(domain_id);

            CREATE TABLE IF NOT EXISTS domainmetadata (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                domain_id INTEGER NOT NULL,
                kind TEXT NOT NULL,
                content TEXT NOT NULL,
                FOREIGN KEY (domain_id) REFERENCES domains(id) ON DELETE CASCADE
            );
            CREATE INDEX IF NOT EXISTS idx_domainmetadata_kind ON domainmetadata(domain_id, kind);

            CREATE TABLE IF NOT EXISTS audit_log (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                created_at INTEGER NOT NULL,
                actor_id INTEGER,
                event_type TEXT NOT NULL,
                target_table TEXT NOT NULL,
                target_id INTEGER,
                old_value TEXT,
                new_value TEXT,
                source_ip TEXT,
                detail TEXT NOT NULL
            );",
        )
        .map_err(storage_err("Failed to create tables"))
    }

    /// Insert a zone if missing and return it
    pub async fn upsert_zone(&self, name: &str) -> Result<Zone, RolloverError> {
        let conn = self.conn.lock().await;

        let existing: Option<i64> = conn
            .query_row(
                "SELECT id FROM domains WHERE name = ?1",
                params![name],
                |row| row.get(0),
            )
            .optional()
            .map_err(storage_err("Failed to load zone"))?;

        let id = match existing {
            Some(id) => id,
            None => {
                conn.execute("INSERT INTO domains (name) VALUES (?1)", params![name])
                    .map_err(storage_err("Failed to save zone"))?;
                conn.last_insert_rowid()
            }
        };

        Ok(Zone::new(id, name))
    }

    /// Look a zone up by name
    pub async fn zone_by_name(&self, name: &str) -> Result<Option<Zone>, RolloverError> {
        let conn = self.conn.lock().await;

        conn.query_row(
            "SELECT id, name FROM domains WHERE name = ?1",
            params![name],
            |row| Ok(Zone::new(row.get(0)?, &row.get::<_, String>(1)?)),
        )
        .optional()
        .map_err(storage_err("Failed to load zone"))
    }

    /// Record a signing key and return its id
    pub async fn insert_key(
        &self,
        zone_id: i64,
        flags: u16,
        active: bool,
        content: &str,
    ) -> Result<i64, RolloverError> {
        let conn = self.conn.lock().await;

        conn.execute(
            "INSERT INTO cryptokeys (domain_id, flags, active, content) VALUES (?1, ?2, ?3, ?4)",
            params![zone_id, flags as i64, active as i32, content],
        )
        .map_err(storage_err("Failed to save key"))?;

        Ok(conn.last_insert_rowid())
    }

    /// Flip a key's active flag. Returns false if the key does not exist.
    pub async fn set_key_active(&self, key_id: i64, active: bool) -> Result<bool, RolloverError> {
        let conn = self.conn.lock().await;

        let rows = conn
            .execute(
                "UPDATE cryptokeys SET active = ?1 WHERE id = ?2",
                params![active as i32, key_id],
            )
            .map_err(storage_err("Failed to update key"))?;

        Ok(rows > 0)
    }

    /// Remove a key. Returns false if the key does not exist.
    pub async fn delete_key(&self, key_id: i64) -> Result<bool, RolloverError> {
        let conn = self.conn.lock().await;

        let rows = conn
            .execute("DELETE FROM cryptokeys WHERE id = ?1", params![key_id])
            .map_err(storage_err("Failed to delete key"))?;

        Ok(rows > 0)
    }

    /// Most recent audit entries, newest first
    pub async fn recent_audit_events(&self, limit: usize) -> Result<Vec<AuditEvent>, RolloverError> {
        let conn = self.conn.lock().await;

        let mut stmt = conn
            .prepare(
                "SELECT actor_id, event_type, target_table, target_id, old_value, new_value,
                        source_ip, detail
                 FROM audit_log ORDER BY id DESC LIMIT ?1",
            )
            .map_err(storage_err("Failed to prepare statement"))?;

        let events = stmt
            .query_map(params![limit as i64], |row| {
                Ok(AuditEvent {
                    actor_id: row.get(0)?,
                    event_type: row.get(1)?,
                    target_table: row.get(2)?,
                    target_id: row.get(3)?,
                    old_value: row.get(4)?,
                    new_value: row.get(5)?,
                    source_ip: row.get(6)?,
                    detail: row.get(7)?,
                })
            })
            .map_err(storage_err("Failed to query audit log"))?
            .collect::<Result<Vec<_>, _>>()
            .map_err(storage_err("Failed to read audit log"))?;

        Ok(events)
    }
}

#[async_trait]
impl KeyInventory for RolloverPersistence {
    async fn zones_with_active_keys(&self) -> Result<Vec<Zone>, RolloverError> {
        let conn = self.conn.lock().await;

        let mut stmt = conn
            .prepare(
                "SELECT d.id, d.name FROM domains d
                 WHERE EXISTS (
                     SELECT 1 FROM cryptokeys k WHERE k.domain_id = d.id AND k.active = 1
                 )
                 ORDER BY d.id",
            )
            .map_err(storage_err("Failed to prepare statement"))?;

        let zones = stmt
            .query_map([], |row| Ok(Zone::new(row.get(0)?, &row.get::<_, String>(1)?)))
            .map_err(storage_err("Failed to query zones"))?
            .collect::<Result<Vec<_>, _>>()
            .map_err(storage_err("Failed to read zones"))?;

        Ok(zones)
    }

    async fn list_keys(&self, zone_id: i64) -> Result<Vec<SigningKey>, RolloverError> {
        let conn = self.conn.lock().await;

        let mut stmt = conn
            .prepare(
                "SELECT id, domain_id, active, flags, content
                 FROM cryptokeys WHERE domain_id = ?1 ORDER BY id ASC",
            )
            .map_err(storage_err("Failed to prepare statement"))?;

        let keys = stmt
            .query_map(params![zone_id], |row| {
                let active: i32 = row.get(2)?;
                let flags: i64 = row.get(3)?;
                let flags = u16::try_from(flags).map_err(|e| {
                    rusqlite::Error::FromSqlConversionFailure(3, Type::Integer, Box::new(e))
                })?;
                Ok(SigningKey {
                    id: row.get(0)?,
                    zone_id: row.get(1)?,
                    active: active != 0,
                    flags,
                    content: row.get(4)?,
                })
            })
            .map_err(storage_err("Failed to query keys"))?
            .collect::<Result<Vec<_>, _>>()
            .map_err(storage_err("Failed to read keys"))?;

        Ok(keys)
    }
}

#[async_trait]
impl MetadataStore for RolloverPersistence {
    async fn get(&self, zone_id: i64, kind: &str) -> Result<Option<String>, RolloverError> {
        let conn = self.conn.lock().await;

        conn.query_row(
            "SELECT content FROM domainmetadata WHERE domain_id = ?1 AND kind = ?2",
            params![zone_id, kind],
            |row| row.get(0),
        )
        .optional()
        .map_err(storage_err("Failed to read marker"))
    }

    async fn set(&self, zone_id: i64, kind: &str, value: &str) -> Result<(), RolloverError> {
        let mut conn = self.conn.lock().await;

        // The server's domainmetadata has no unique (domain_id, kind) constraint
        let tx = conn
            .transaction()
            .map_err(storage_err("Failed to begin marker write"))?;

        let updated = tx
            .execute(
                "UPDATE domainmetadata SET content = ?3 WHERE domain_id = ?1 AND kind = ?2",
                params![zone_id, kind, value],
            )
            .map_err(storage_err("Failed to write marker"))?;

        if updated == 0 {
            tx.execute(
                "INSERT INTO domainmetadata (domain_id, kind, content) VALUES (?1, ?2, ?3)",
                params![zone_id, kind, value],
            )
            .map_err(storage_err("Failed to write marker"))?;
        }

        tx.commit().map_err(storage_err("Failed to commit marker write"))?;

        Ok(())
    }

    async fn delete(&self, zone_id: i64, kind: &str) -> Result<(), RolloverError> {
        let conn = self.conn.lock().await;

        conn.execute(
            "DELETE FROM domainmetadata WHERE domain_id = ?1 AND kind = ?2",
            params![zone_id, kind],
        )
        .map_err(storage_err("Failed to delete marker"))?;

        Ok(())
    }
}

#[async_trait]
impl AuditSink for RolloverPersistence {
    async fn append(&self, event: &AuditEvent) -> Result<(), RolloverError> {
        let conn = self.conn.lock().await;

        conn.execute(
            "INSERT INTO audit_log (created_at, actor_id, event_type, target_table, target_id,
                                    old_value, new_value, source_ip, detail)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
            params![
                chrono::Utc::now().timestamp(),
                event.actor_id,
                event.event_type,
                event.target_table,
                event.target_id,
                event.old_value,
                event.new_value,
                event.source_ip,
                event.detail,
            ],
        )
        .map_err(storage_err("Failed to append audit entry"))?;

        Ok(())
    }
}
