use std::path::Path;
use std::sync::{Mutex, MutexGuard};

use rusqlite::{params, Connection};

use super::{AuditError, AuditEvent, AuditFilter, AuditRecord, AuditStore};
use crate::order::{parse_ts, ts};

/// SQLite-backed audit store
pub struct SqliteAuditStore {
    conn: Mutex<Connection>,
}

impl SqliteAuditStore {
    /// Create a new SQLite audit store, creating the database file and tables if needed
    pub fn new(path: &Path) -> Result<Self, AuditError> {
        let conn = Connection::open(path)?;
        conn.busy_timeout(std::time::Duration::from_secs(5))?;
        Self::initialize_schema(&conn)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    /// Create an in-memory SQLite audit store (useful for testing)
    pub fn in_memory() -> Result<Self, AuditError> {
        let conn = Connection::open_in_memory()?;
        Self::initialize_schema(&conn)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    fn initialize_schema(conn: &Connection) -> Result<(), AuditError> {
        conn.execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS audit_events (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                timestamp TEXT NOT NULL,
                event_type TEXT NOT NULL,
                order_id INTEGER,
                account_id INTEGER,
                data TEXT NOT NULL
            );

            CREATE INDEX IF NOT EXISTS idx_audit_events_timestamp ON audit_events(timestamp);
            CREATE INDEX IF NOT EXISTS idx_audit_events_order_id ON audit_events(order_id);
            CREATE INDEX IF NOT EXISTS idx_audit_events_account_id ON audit_events(account_id);
            CREATE INDEX IF NOT EXISTS idx_audit_events_event_type ON audit_events(event_type);
            "#,
        )?;
        Ok(())
    }

    fn conn(&self) -> Result<MutexGuard<'_, Connection>, AuditError> {
        self.conn
            .lock()
            .map_err(|_| AuditError::Database("connection mutex poisoned".to_string()))
    }

    fn build_where_clause(filter: &AuditFilter) -> (String, Vec<Box<dyn rusqlite::ToSql>>) {
        let mut conditions = Vec::new();
        let mut params: Vec<Box<dyn rusqlite::ToSql>> = Vec::new();

        if let Some(order_id) = filter.order_id {
            conditions.push("order_id = ?");
            params.push(Box::new(order_id));
        }

        if let Some(account_id) = filter.account_id {
            conditions.push("account_id = ?");
            params.push(Box::new(account_id));
        }

        if let Some(ref event_type) = filter.event_type {
            conditions.push("event_type = ?");
            params.push(Box::new(event_type.clone()));
        }

        if let Some(ref from) = filter.from {
            conditions.push("timestamp >= ?");
            params.push(Box::new(ts(from)));
        }

        if let Some(ref to) = filter.to {
            conditions.push("timestamp <= ?");
            params.push(Box::new(ts(to)));
        }

        let where_clause = if conditions.is_empty() {
            String::new()
        } else {
            format!("WHERE {}", conditions.join(" AND "))
        };

        (where_clause, params)
    }
}

impl AuditStore for SqliteAuditStore {
    fn insert(&self, record: &AuditRecord) -> Result<i64, AuditError> {
        let data_json = serde_json::to_string(&record.data)
            .map_err(|e| AuditError::Serialization(e.to_string()))?;

        let conn = self.conn()?;
        conn.execute(
            "INSERT INTO audit_events (timestamp, event_type, order_id, account_id, data) \
             VALUES (?, ?, ?, ?, ?)",
            params![
                ts(&record.timestamp),
                record.event_type,
                record.order_id,
                record.account_id,
                data_json,
            ],
        )?;

        Ok(conn.last_insert_rowid())
    }

    fn query(&self, filter: &AuditFilter) -> Result<Vec<AuditRecord>, AuditError> {
        let conn = self.conn()?;
        let (where_clause, mut params) = Self::build_where_clause(filter);

        let sql = format!(
            "SELECT id, timestamp, event_type, order_id, account_id, data FROM audit_events {} \
             ORDER BY timestamp DESC, id DESC LIMIT ? OFFSET ?",
            where_clause
        );
        params.push(Box::new(filter.limit));
        params.push(Box::new(filter.offset));
        let param_refs: Vec<&dyn rusqlite::ToSql> = params.iter().map(|p| p.as_ref()).collect();

        let mut stmt = conn.prepare(&sql)?;
        let rows = stmt.query_map(param_refs.as_slice(), |row| {
            Ok((
                row.get::<_, i64>(0)?,
                row.get::<_, String>(1)?,
                row.get::<_, String>(2)?,
                row.get::<_, Option<i64>>(3)?,
                row.get::<_, Option<i64>>(4)?,
                row.get::<_, String>(5)?,
            ))
        })?;

        let mut records = Vec::new();
        for row in rows {
            let (id, timestamp, event_type, order_id, account_id, data_json) = row?;

            let timestamp = parse_ts(&timestamp)
                .ok_or_else(|| AuditError::Database(format!("Invalid timestamp: {}", timestamp)))?;
            let data: AuditEvent = serde_json::from_str(&data_json)
                .map_err(|e| AuditError::Serialization(e.to_string()))?;

            records.push(AuditRecord {
                id,
                timestamp,
                event_type,
                order_id,
                account_id,
                data,
            });
        }

        Ok(records)
    }

    fn count(&self, filter: &AuditFilter) -> Result<i64, AuditError> {
        let conn = self.conn()?;
        let (where_clause, params) = Self::build_where_clause(filter);

        let sql = format!("SELECT COUNT(*) FROM audit_events {}", where_clause);
        let param_refs: Vec<&dyn rusqlite::ToSql> = params.iter().map(|p| p.as_ref()).collect();

        Ok(conn.query_row(&sql, param_refs.as_slice(), |row| row.get(0))?)
    }
}
