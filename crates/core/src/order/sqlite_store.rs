//! SQLite-backed order store implementation.

use std::path::Path;
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;

use chrono::{DateTime, SecondsFormat, Utc};
use rusqlite::types::Type;
use rusqlite::{params, Connection, OptionalExtension, TransactionBehavior};

use super::{
    AccountId, CertOrder, CertType, OrderError, OrderFilter, OrderId, OrderStatus, OrderStore,
    OrderUpdate,
};

const COLUMNS: &str = "id, owner_id, cert_type, domain, status, needs_challenge, challenge_host, \
     challenge_values, last_error, attempts, install_pending, locked_until, created_at, updated_at";

/// Fixed-width UTC timestamps so that text comparison orders them correctly.
pub(crate) fn ts(dt: &DateTime<Utc>) -> String {
    dt.to_rfc3339_opts(SecondsFormat::Micros, true)
}

pub(crate) fn parse_ts(s: &str) -> Option<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(s)
        .ok()
        .map(|dt| dt.with_timezone(&Utc))
}

/// SQLite-backed order store.
pub struct SqliteOrderStore {
    conn: Mutex<Connection>,
}

impl SqliteOrderStore {
    /// Open (or create) the database file and tables.
    pub fn new(path: &Path) -> Result<Self, OrderError> {
        let conn = Connection::open(path)?;
        // The sweep and interactive commands may run as separate processes.
        conn.busy_timeout(Duration::from_secs(5))?;
        Self::initialize_schema(&conn)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    /// Create an in-memory store (useful for testing).
    pub fn in_memory() -> Result<Self, OrderError> {
        let conn = Connection::open_in_memory()?;
        Self::initialize_schema(&conn)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    fn initialize_schema(conn: &Connection) -> Result<(), OrderError> {
        conn.execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS cert_orders (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                owner_id INTEGER NOT NULL,
                cert_type TEXT,
                domain TEXT,
                status TEXT NOT NULL,
                needs_challenge INTEGER NOT NULL DEFAULT 1,
                challenge_host TEXT,
                challenge_values TEXT NOT NULL DEFAULT '[]',
                last_error TEXT,
                attempts INTEGER NOT NULL DEFAULT 0,
                install_pending INTEGER NOT NULL DEFAULT 0,
                locked_until TEXT,
                created_at TEXT NOT NULL,
                updated_at TEXT NOT NULL
            );

            CREATE INDEX IF NOT EXISTS idx_cert_orders_owner ON cert_orders(owner_id);
            CREATE INDEX IF NOT EXISTS idx_cert_orders_status ON cert_orders(status);
            CREATE INDEX IF NOT EXISTS idx_cert_orders_domain ON cert_orders(domain);

            CREATE TABLE IF NOT EXISTS domain_locks (
                domain TEXT PRIMARY KEY,
                order_id INTEGER NOT NULL,
                locked_until TEXT NOT NULL
            );
            "#,
        )?;
        Ok(())
    }

    fn conn(&self) -> Result<MutexGuard<'_, Connection>, OrderError> {
        self.conn
            .lock()
            .map_err(|_| OrderError::Database("connection mutex poisoned".to_string()))
    }

    fn build_where_clause(filter: &OrderFilter) -> (String, Vec<Box<dyn rusqlite::ToSql>>) {
        let mut conditions: Vec<String> = Vec::new();
        let mut params: Vec<Box<dyn rusqlite::ToSql>> = Vec::new();

        if !filter.statuses.is_empty() {
            let placeholders = vec!["?"; filter.statuses.len()].join(", ");
            conditions.push(format!("status IN ({})", placeholders));
            for status in &filter.statuses {
                params.push(Box::new(status.as_str()));
            }
        }

        if let Some(owner_id) = filter.owner_id {
            conditions.push("owner_id = ?".to_string());
            params.push(Box::new(owner_id));
        }

        if let Some(needs) = filter.needs_challenge {
            conditions.push("needs_challenge = ?".to_string());
            params.push(Box::new(needs));
        }

        if let Some(pending) = filter.install_pending {
            conditions.push("install_pending = ?".to_string());
            params.push(Box::new(pending));
        }

        if filter.ready_for_tool {
            conditions.push("cert_type IS NOT NULL AND domain IS NOT NULL".to_string());
        }

        if let Some(now) = filter.unlocked_at {
            conditions.push("(locked_until IS NULL OR locked_until <= ?)".to_string());
            params.push(Box::new(ts(&now)));
        }

        if let Some(limit) = filter.attempts_below {
            conditions.push("attempts < ?".to_string());
            params.push(Box::new(limit));
        }

        let where_clause = if conditions.is_empty() {
            String::new()
        } else {
            format!("WHERE {}", conditions.join(" AND "))
        };

        (where_clause, params)
    }

    fn row_to_order(row: &rusqlite::Row) -> rusqlite::Result<CertOrder> {
        let cert_type: Option<String> = row.get(2)?;
        let status: String = row.get(4)?;
        let values_json: String = row.get(7)?;
        let locked_until: Option<String> = row.get(11)?;
        let created_at: String = row.get(12)?;
        let updated_at: String = row.get(13)?;

        let status = status
            .parse::<OrderStatus>()
            .map_err(|e| rusqlite::Error::FromSqlConversionFailure(4, Type::Text, e.into()))?;
        let cert_type = cert_type
            .map(|s| s.parse::<CertType>())
            .transpose()
            .map_err(|e: String| {
                rusqlite::Error::FromSqlConversionFailure(2, Type::Text, e.into())
            })?;
        let challenge_values: Vec<String> = serde_json::from_str(&values_json)
            .map_err(|e| rusqlite::Error::FromSqlConversionFailure(7, Type::Text, Box::new(e)))?;

        Ok(CertOrder {
            id: row.get(0)?,
            owner_id: row.get(1)?,
            cert_type,
            domain: row.get(3)?,
            status,
            needs_challenge: row.get(5)?,
            challenge_host: row.get(6)?,
            challenge_values,
            last_error: row.get(8)?,
            attempts: row.get(9)?,
            install_pending: row.get(10)?,
            locked_until: locked_until.as_deref().and_then(parse_ts),
            created_at: parse_ts(&created_at).unwrap_or_else(Utc::now),
            updated_at: parse_ts(&updated_at).unwrap_or_else(Utc::now),
        })
    }

    fn fetch_one(
        conn: &Connection,
        clause: &str,
        params: &[&dyn rusqlite::ToSql],
    ) -> Result<Option<CertOrder>, OrderError> {
        let sql = format!("SELECT {} FROM cert_orders {} LIMIT 1", COLUMNS, clause);
        Ok(conn
            .query_row(&sql, params, Self::row_to_order)
            .optional()?)
    }

    fn check_update(current: &CertOrder, update: &OrderUpdate) -> Result<CertOrder, OrderError> {
        let invalid = |reason: &str| OrderError::InvalidUpdate {
            order_id: current.id,
            reason: reason.to_string(),
        };

        if let Some(next) = update.status {
            if !current.status.can_transition_to(next) {
                return Err(OrderError::InvalidTransition {
                    order_id: current.id,
                    from: current.status,
                    to: next,
                });
            }
        }
        if current.status == OrderStatus::Cancelled && !update.is_empty() {
            return Err(invalid("order is cancelled"));
        }
        if let Some(ref domain) = update.domain {
            if domain.is_empty() {
                return Err(invalid("domain must not be empty"));
            }
            if current.domain.as_ref().is_some_and(|d| d != domain) {
                return Err(invalid("domain cannot be changed once set"));
            }
        }
        if let Some(cert_type) = update.cert_type {
            if current.cert_type.is_some_and(|t| t != cert_type) {
                return Err(invalid("certificate type cannot be changed once set"));
            }
        }

        let mut next = current.clone();
        update.apply_to(&mut next);

        if next.status.requires_challenge() && next.challenge().is_none() {
            return Err(invalid("status requires a published challenge"));
        }

        Ok(next)
    }
}

impl OrderStore for SqliteOrderStore {
    fn create(&self, owner_id: AccountId) -> Result<CertOrder, OrderError> {
        let conn = self.conn()?;
        let now = Utc::now();

        conn.execute(
            "INSERT INTO cert_orders (owner_id, status, needs_challenge, created_at, updated_at) VALUES (?, ?, 1, ?, ?)",
            params![owner_id, OrderStatus::Created.as_str(), ts(&now), ts(&now)],
        )?;

        Ok(CertOrder {
            id: conn.last_insert_rowid(),
            owner_id,
            cert_type: None,
            domain: None,
            status: OrderStatus::Created,
            needs_challenge: true,
            challenge_host: None,
            challenge_values: Vec::new(),
            last_error: None,
            attempts: 0,
            install_pending: false,
            locked_until: None,
            created_at: now,
            updated_at: now,
        })
    }

    fn get(&self, owner_id: AccountId, id: OrderId) -> Result<Option<CertOrder>, OrderError> {
        let conn = self.conn()?;
        Self::fetch_one(&conn, "WHERE id = ? AND owner_id = ?", params![id, owner_id])
    }

    fn get_by_id(&self, id: OrderId) -> Result<Option<CertOrder>, OrderError> {
        let conn = self.conn()?;
        Self::fetch_one(&conn, "WHERE id = ?", params![id])
    }

    fn get_by_domain(
        &self,
        owner_id: AccountId,
        domain: &str,
    ) -> Result<Option<CertOrder>, OrderError> {
        let conn = self.conn()?;
        Self::fetch_one(
            &conn,
            "WHERE owner_id = ? AND domain = ? ORDER BY id DESC",
            params![owner_id, domain],
        )
    }

    fn latest(&self, owner_id: AccountId) -> Result<Option<CertOrder>, OrderError> {
        let conn = self.conn()?;
        Self::fetch_one(&conn, "WHERE owner_id = ? ORDER BY id DESC", params![owner_id])
    }

    fn latest_awaiting_domain(
        &self,
        owner_id: AccountId,
    ) -> Result<Option<CertOrder>, OrderError> {
        let conn = self.conn()?;
        Self::fetch_one(
            &conn,
            "WHERE owner_id = ? AND status = ? AND cert_type IS NOT NULL AND domain IS NULL ORDER BY id DESC",
            params![owner_id, OrderStatus::Created.as_str()],
        )
    }

    fn update(&self, id: OrderId, update: &OrderUpdate) -> Result<CertOrder, OrderError> {
        let mut conn = self.conn()?;
        // Read-check-write under one write lock so concurrent processes see the same row.
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;

        let current =
            Self::fetch_one(&tx, "WHERE id = ?", params![id])?.ok_or(OrderError::NotFound(id))?;
        let mut next = Self::check_update(&current, update)?;

        let now = Utc::now();
        let mut sets: Vec<&str> = vec!["updated_at = ?"];
        let mut values: Vec<Box<dyn rusqlite::ToSql>> = vec![Box::new(ts(&now))];

        if let Some(status) = update.status {
            sets.push("status = ?");
            values.push(Box::new(status.as_str()));
        }
        if let Some(cert_type) = update.cert_type {
            sets.push("cert_type = ?");
            values.push(Box::new(cert_type.as_str()));
        }
        if let Some(ref domain) = update.domain {
            sets.push("domain = ?");
            values.push(Box::new(domain.clone()));
        }
        if let Some(needs) = update.needs_challenge {
            sets.push("needs_challenge = ?");
            values.push(Box::new(needs));
        }
        if update.challenge.is_some() {
            let values_json = serde_json::to_string(&next.challenge_values)
                .map_err(|e| OrderError::Database(e.to_string()))?;
            sets.push("challenge_host = ?");
            values.push(Box::new(next.challenge_host.clone()));
            sets.push("challenge_values = ?");
            values.push(Box::new(values_json));
        }
        if let Some(ref error) = update.last_error {
            sets.push("last_error = ?");
            values.push(Box::new(error.clone()));
        }
        if let Some(attempts) = update.attempts {
            sets.push("attempts = ?");
            values.push(Box::new(attempts));
        }
        if let Some(pending) = update.install_pending {
            sets.push("install_pending = ?");
            values.push(Box::new(pending));
        }

        values.push(Box::new(id));
        let sql = format!("UPDATE cert_orders SET {} WHERE id = ?", sets.join(", "));
        let param_refs: Vec<&dyn rusqlite::ToSql> = values.iter().map(|p| p.as_ref()).collect();
        tx.execute(&sql, param_refs.as_slice())?;
        tx.commit()?;

        next.updated_at = now;
        Ok(next)
    }

    fn list(&self, filter: &OrderFilter) -> Result<Vec<CertOrder>, OrderError> {
        let conn = self.conn()?;

        let (where_clause, params) = Self::build_where_clause(filter);
        let sql = format!(
            "SELECT {} FROM cert_orders {} ORDER BY id DESC LIMIT ? OFFSET ?",
            COLUMNS, where_clause
        );

        let mut stmt = conn.prepare(&sql)?;

        let mut all_params: Vec<Box<dyn rusqlite::ToSql>> = params;
        all_params.push(Box::new(filter.limit));
        all_params.push(Box::new(filter.offset));
        let param_refs: Vec<&dyn rusqlite::ToSql> = all_params.iter().map(|p| p.as_ref()).collect();

        let rows = stmt.query_map(param_refs.as_slice(), Self::row_to_order)?;

        let mut orders = Vec::new();
        for row in rows {
            orders.push(row?);
        }
        Ok(orders)
    }

    fn count(&self, filter: &OrderFilter) -> Result<i64, OrderError> {
        let conn = self.conn()?;

        let (where_clause, params) = Self::build_where_clause(filter);
        let sql = format!("SELECT COUNT(*) FROM cert_orders {}", where_clause);
        let param_refs: Vec<&dyn rusqlite::ToSql> = params.iter().map(|p| p.as_ref()).collect();

        Ok(conn.query_row(&sql, param_refs.as_slice(), |row| row.get(0))?)
    }

    fn try_lock(
        &self,
        id: OrderId,
        now: DateTime<Utc>,
        until: DateTime<Utc>,
    ) -> Result<bool, OrderError> {
        let conn = self.conn()?;
        let changed = conn.execute(
            "UPDATE cert_orders SET locked_until = ?1 \
             WHERE id = ?2 AND (locked_until IS NULL OR locked_until <= ?3)",
            params![ts(&until), id, ts(&now)],
        )?;
        Ok(changed == 1)
    }

    fn set_lock(&self, id: OrderId, until: DateTime<Utc>) -> Result<(), OrderError> {
        let conn = self.conn()?;
        let changed = conn.execute(
            "UPDATE cert_orders SET locked_until = ? WHERE id = ?",
            params![ts(&until), id],
        )?;
        if changed == 0 {
            return Err(OrderError::NotFound(id));
        }
        Ok(())
    }

    fn try_lock_domain(
        &self,
        domain: &str,
        order_id: OrderId,
        now: DateTime<Utc>,
        until: DateTime<Utc>,
    ) -> Result<bool, OrderError> {
        let conn = self.conn()?;
        let changed = conn.execute(
            "INSERT INTO domain_locks (domain, order_id, locked_until) VALUES (?1, ?2, ?3) \
             ON CONFLICT(domain) DO UPDATE SET \
                 order_id = excluded.order_id, locked_until = excluded.locked_until \
             WHERE domain_locks.locked_until <= ?4 OR domain_locks.order_id = excluded.order_id",
            params![domain, order_id, ts(&until), ts(&now)],
        )?;
        Ok(changed == 1)
    }

    fn set_domain_lock(
        &self,
        domain: &str,
        order_id: OrderId,
        until: DateTime<Utc>,
    ) -> Result<(), OrderError> {
        let conn = self.conn()?;
        conn.execute(
            "UPDATE domain_locks SET locked_until = ? WHERE domain = ? AND order_id = ?",
            params![ts(&until), domain, order_id],
        )?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::order::DnsChallenge;
    use chrono::Duration as ChronoDuration;

    fn create_test_store() -> SqliteOrderStore {
        SqliteOrderStore::in_memory().unwrap()
    }

    fn challenge() -> DnsChallenge {
        DnsChallenge {
            host: "_acme-challenge.example.com".to_string(),
            values: vec!["tok-1".to_string(), "tok-2".to_string()],
        }
    }

    fn order_in_dns_wait(store: &SqliteOrderStore, owner: AccountId) -> CertOrder {
        let order = store.create(owner).unwrap();
        store
            .update(
                order.id,
                &OrderUpdate::new()
                    .with_cert_type(CertType::Wildcard)
                    .with_domain("example.com"),
            )
            .unwrap();
        store
            .update(
                order.id,
                &OrderUpdate::new()
                    .with_status(OrderStatus::DnsWait)
                    .with_needs_challenge(false)
                    .with_challenge(challenge()),
            )
            .unwrap()
    }

    #[test]
    fn test_create_order() {
        let store = create_test_store();
        let order = store.create(42).unwrap();

        assert!(order.id > 0);
        assert_eq!(order.owner_id, 42);
        assert_eq!(order.status, OrderStatus::Created);
        assert!(order.needs_challenge);
        assert!(order.domain.is_none());
    }

    #[test]
    fn test_get_is_scoped_by_owner() {
        let store = create_test_store();
        let order = store.create(1).unwrap();

        assert!(store.get(1, order.id).unwrap().is_some());
        assert!(store.get(2, order.id).unwrap().is_none());
        assert!(store.get_by_id(order.id).unwrap().is_some());
    }

    #[test]
    fn test_update_persists_challenge() {
        let store = create_test_store();
        let order = order_in_dns_wait(&store, 1);

        assert_eq!(order.status, OrderStatus::DnsWait);
        let fetched = store.get_by_id(order.id).unwrap().unwrap();
        assert_eq!(fetched.challenge(), Some(challenge()));
        assert_eq!(fetched.cert_type, Some(CertType::Wildcard));
        assert!(!fetched.needs_challenge);
    }

    #[test]
    fn test_rejects_undeclared_transition() {
        let store = create_test_store();
        let order = store.create(1).unwrap();

        let result = store.update(order.id, &OrderUpdate::new().with_status(OrderStatus::Issued));
        assert!(matches!(result, Err(OrderError::InvalidTransition { .. })));

        let fetched = store.get_by_id(order.id).unwrap().unwrap();
        assert_eq!(fetched.status, OrderStatus::Created);
    }

    #[test]
    fn test_rejects_dns_wait_without_challenge() {
        let store = create_test_store();
        let order = store.create(1).unwrap();

        let result = store.update(order.id, &OrderUpdate::new().with_status(OrderStatus::DnsWait));
        assert!(matches!(result, Err(OrderError::InvalidUpdate { .. })));
    }

    #[test]
    fn test_domain_is_immutable() {
        let store = create_test_store();
        let order = order_in_dns_wait(&store, 1);

        let result = store.update(order.id, &OrderUpdate::new().with_domain("other.com"));
        assert!(matches!(result, Err(OrderError::InvalidUpdate { .. })));

        // Re-submitting the same value is a no-op.
        store
            .update(order.id, &OrderUpdate::new().with_domain("example.com"))
            .unwrap();
    }

    #[test]
    fn test_cancelled_is_final() {
        let store = create_test_store();
        let order = store.create(1).unwrap();
        store
            .update(order.id, &OrderUpdate::new().with_status(OrderStatus::Cancelled))
            .unwrap();

        let result = store.update(order.id, &OrderUpdate::new().with_error("late failure"));
        assert!(result.is_err());
        let result = store.update(
            order.id,
            &OrderUpdate::new().with_status(OrderStatus::Cancelled),
        );
        assert!(matches!(result, Err(OrderError::InvalidTransition { .. })));
    }

    #[test]
    fn test_update_nonexistent_order() {
        let store = create_test_store();
        let result = store.update(999, &OrderUpdate::new().with_attempts(1));
        assert!(matches!(result, Err(OrderError::NotFound(999))));
    }

    #[test]
    fn test_latest_and_awaiting_domain() {
        let store = create_test_store();
        let first = store.create(1).unwrap();
        store
            .update(first.id, &OrderUpdate::new().with_cert_type(CertType::Single))
            .unwrap();
        let second = store.create(1).unwrap();
        store.create(2).unwrap();

        assert_eq!(store.latest(1).unwrap().unwrap().id, second.id);
        assert_eq!(store.latest_awaiting_domain(1).unwrap().unwrap().id, first.id);
        assert!(store.latest_awaiting_domain(2).unwrap().is_none());
    }

    #[test]
    fn test_get_by_domain() {
        let store = create_test_store();
        let order = order_in_dns_wait(&store, 1);

        assert_eq!(
            store.get_by_domain(1, "example.com").unwrap().unwrap().id,
            order.id
        );
        assert!(store.get_by_domain(2, "example.com").unwrap().is_none());
    }

    #[test]
    fn test_list_filters_and_pagination() {
        let store = create_test_store();
        for _ in 0..5 {
            store.create(1).unwrap();
        }
        order_in_dns_wait(&store, 1);

        let filter = OrderFilter::new().with_owner(1).with_limit(2).with_offset(4);
        assert_eq!(store.list(&filter).unwrap().len(), 2);

        let waiting = OrderFilter::new().with_status(OrderStatus::DnsWait);
        assert_eq!(store.count(&waiting).unwrap(), 1);

        let all = store.list(&OrderFilter::new().with_owner(1)).unwrap();
        assert!(all.windows(2).all(|w| w[0].id > w[1].id));
    }

    #[test]
    fn test_ready_for_tool_skips_incomplete_orders() {
        let store = create_test_store();
        let bare = store.create(1).unwrap();
        store
            .update(bare.id, &OrderUpdate::new().with_cert_type(CertType::Single))
            .unwrap();
        let ready = order_in_dns_wait(&store, 1);

        let found = store.list(&OrderFilter::new().ready_for_tool()).unwrap();
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].id, ready.id);
    }

    #[test]
    fn test_list_skips_locked_orders() {
        let store = create_test_store();
        let order = store.create(1).unwrap();
        store.create(1).unwrap();
        let now = Utc::now();

        assert!(store
            .try_lock(order.id, now, now + ChronoDuration::seconds(60))
            .unwrap());

        let filter = OrderFilter::new().unlocked_at(now);
        let free = store.list(&filter).unwrap();
        assert_eq!(free.len(), 1);
        assert_ne!(free[0].id, order.id);
    }

    #[test]
    fn test_try_lock_is_exclusive() {
        let store = create_test_store();
        let order = store.create(1).unwrap();
        let now = Utc::now();
        let until = now + ChronoDuration::seconds(60);

        assert!(store.try_lock(order.id, now, until).unwrap());
        assert!(!store.try_lock(order.id, now, until).unwrap());

        // Expired locks can be taken again.
        let later = until + ChronoDuration::seconds(1);
        assert!(store
            .try_lock(order.id, later, later + ChronoDuration::seconds(60))
            .unwrap());
    }

    #[test]
    fn test_domain_lock_excludes_other_orders() {
        let store = create_test_store();
        let now = Utc::now();
        let until = now + ChronoDuration::seconds(60);

        assert!(store.try_lock_domain("example.com", 1, now, until).unwrap());
        assert!(!store.try_lock_domain("example.com", 2, now, until).unwrap());
        assert!(store.try_lock_domain("example.com", 1, now, until).unwrap());
        assert!(store.try_lock_domain("other.com", 2, now, until).unwrap());

        store.set_domain_lock("example.com", 1, now).unwrap();
        assert!(store.try_lock_domain("example.com", 2, now, until).unwrap());
    }

    #[test]
    fn test_file_based_store() {
        let temp_dir = tempfile::tempdir().unwrap();
        let db_path = temp_dir.path().join("orders.db");

        let order_id = {
            let store = SqliteOrderStore::new(&db_path).unwrap();
            order_in_dns_wait(&store, 3).id
        };

        let reopened = SqliteOrderStore::new(&db_path).unwrap();
        let fetched = reopened.get(3, order_id).unwrap().unwrap();
        assert_eq!(fetched.status, OrderStatus::DnsWait);
        assert_eq!(fetched.challenge_values.len(), 2);
    }
}
