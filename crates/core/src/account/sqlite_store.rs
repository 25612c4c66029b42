//! SQLite-backed account store implementation.

use std::path::Path;
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;

use chrono::Utc;
use rusqlite::types::Type;
use rusqlite::{params, Connection, OptionalExtension, TransactionBehavior};

use super::{Account, AccountError, AccountStore, PendingAction, Role};
use crate::order::{parse_ts, ts, AccountId};

const COLUMNS: &str = "id, external_id, username, role, quota, banned, pending_action, \
     pending_order_id, created_at, updated_at";

/// SQLite-backed account store.
pub struct SqliteAccountStore {
    conn: Mutex<Connection>,
}

impl SqliteAccountStore {
    pub fn new(path: &Path) -> Result<Self, AccountError> {
        let conn = Connection::open(path)?;
        conn.busy_timeout(Duration::from_secs(5))?;
        Self::initialize_schema(&conn)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    pub fn in_memory() -> Result<Self, AccountError> {
        let conn = Connection::open_in_memory()?;
        Self::initialize_schema(&conn)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    fn initialize_schema(conn: &Connection) -> Result<(), AccountError> {
        conn.execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS accounts (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                external_id TEXT NOT NULL UNIQUE,
                username TEXT,
                role TEXT NOT NULL DEFAULT 'user',
                quota INTEGER NOT NULL DEFAULT 0,
                banned INTEGER NOT NULL DEFAULT 0,
                pending_action TEXT,
                pending_order_id INTEGER,
                created_at TEXT NOT NULL,
                updated_at TEXT NOT NULL
            );

            CREATE INDEX IF NOT EXISTS idx_accounts_username ON accounts(username);
            "#,
        )?;
        Ok(())
    }

    fn conn(&self) -> Result<MutexGuard<'_, Connection>, AccountError> {
        self.conn
            .lock()
            .map_err(|_| AccountError::Database("connection mutex poisoned".to_string()))
    }

    fn row_to_account(row: &rusqlite::Row) -> rusqlite::Result<Account> {
        let role: String = row.get(3)?;
        let pending_kind: Option<String> = row.get(6)?;
        let pending_order: Option<i64> = row.get(7)?;
        let created_at: String = row.get(8)?;
        let updated_at: String = row.get(9)?;

        let role = role
            .parse::<Role>()
            .map_err(|e| rusqlite::Error::FromSqlConversionFailure(3, Type::Text, e.into()))?;

        Ok(Account {
            id: row.get(0)?,
            external_id: row.get(1)?,
            username: row.get(2)?,
            role,
            quota: row.get(4)?,
            banned: row.get(5)?,
            pending_action: PendingAction::from_columns(pending_kind.as_deref(), pending_order),
            created_at: parse_ts(&created_at).unwrap_or_else(Utc::now),
            updated_at: parse_ts(&updated_at).unwrap_or_else(Utc::now),
        })
    }

    fn fetch(
        conn: &Connection,
        clause: &str,
        params: &[&dyn rusqlite::ToSql],
    ) -> Result<Option<Account>, AccountError> {
        let sql = format!("SELECT {} FROM accounts {} LIMIT 1", COLUMNS, clause);
        Ok(conn.query_row(&sql, params, Self::row_to_account).optional()?)
    }

    fn require(conn: &Connection, id: AccountId) -> Result<Account, AccountError> {
        Self::fetch(conn, "WHERE id = ?", params![id])?.ok_or(AccountError::NotFound(id))
    }

    fn touch(
        conn: &Connection,
        id: AccountId,
        column: &str,
        value: &dyn rusqlite::ToSql,
    ) -> Result<Account, AccountError> {
        let sql = format!("UPDATE accounts SET {} = ?, updated_at = ? WHERE id = ?", column);
        let now = ts(&Utc::now());
        let changed = conn.execute(&sql, [value, &now as &dyn rusqlite::ToSql, &id])?;
        if changed == 0 {
            return Err(AccountError::NotFound(id));
        }
        Self::require(conn, id)
    }
}

impl AccountStore for SqliteAccountStore {
    fn register(
        &self,
        external_id: &str,
        username: Option<&str>,
    ) -> Result<Account, AccountError> {
        let mut conn = self.conn()?;
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
        let now = ts(&Utc::now());

        if let Some(existing) =
            Self::fetch(&tx, "WHERE external_id = ?", params![external_id])?
        {
            if username.is_some() && username != existing.username.as_deref() {
                tx.execute(
                    "UPDATE accounts SET username = ?, updated_at = ? WHERE id = ?",
                    params![username, now, existing.id],
                )?;
            }
            let account = Self::require(&tx, existing.id)?;
            tx.commit()?;
            return Ok(account);
        }

        let existing_count: i64 =
            tx.query_row("SELECT COUNT(*) FROM accounts", [], |row| row.get(0))?;
        let role = if existing_count == 0 {
            Role::Owner
        } else {
            Role::User
        };

        tx.execute(
            "INSERT INTO accounts (external_id, username, role, created_at, updated_at) VALUES (?, ?, ?, ?, ?)",
            params![external_id, username, role.as_str(), now, now],
        )?;
        let account = Self::require(&tx, tx.last_insert_rowid())?;
        tx.commit()?;

        tracing::info!(account_id = account.id, role = %account.role, "Registered account");
        Ok(account)
    }

    fn get(&self, id: AccountId) -> Result<Option<Account>, AccountError> {
        let conn = self.conn()?;
        Self::fetch(&conn, "WHERE id = ?", params![id])
    }

    fn get_by_external_id(&self, external_id: &str) -> Result<Option<Account>, AccountError> {
        let conn = self.conn()?;
        Self::fetch(&conn, "WHERE external_id = ?", params![external_id])
    }

    fn find_by_username(&self, username: &str) -> Result<Option<Account>, AccountError> {
        let conn = self.conn()?;
        let username = username.trim_start_matches('@');
        Self::fetch(
            &conn,
            "WHERE username = ? COLLATE NOCASE ORDER BY id DESC",
            params![username],
        )
    }

    fn consume_quota(&self, id: AccountId) -> Result<bool, AccountError> {
        let conn = self.conn()?;
        let changed = conn.execute(
            "UPDATE accounts SET quota = quota - 1, updated_at = ? WHERE id = ? AND quota > 0",
            params![ts(&Utc::now()), id],
        )?;
        if changed == 0 {
            // Distinguish an exhausted quota from a missing account.
            Self::require(&conn, id)?;
        }
        Ok(changed == 1)
    }

    fn refund_quota(&self, id: AccountId) -> Result<(), AccountError> {
        let conn = self.conn()?;
        let changed = conn.execute(
            "UPDATE accounts SET quota = quota + 1, updated_at = ? WHERE id = ?",
            params![ts(&Utc::now()), id],
        )?;
        if changed == 0 {
            return Err(AccountError::NotFound(id));
        }
        Ok(())
    }

    fn grant_quota(&self, id: AccountId, amount: u32) -> Result<Account, AccountError> {
        let conn = self.conn()?;
        let changed = conn.execute(
            "UPDATE accounts SET quota = quota + ?, updated_at = ? WHERE id = ?",
            params![amount, ts(&Utc::now()), id],
        )?;
        if changed == 0 {
            return Err(AccountError::NotFound(id));
        }
        Self::require(&conn, id)
    }

    fn set_banned(&self, id: AccountId, banned: bool) -> Result<Account, AccountError> {
        let conn = self.conn()?;
        if banned && Self::require(&conn, id)?.role == Role::Owner {
            return Err(AccountError::OwnerImmutable);
        }
        Self::touch(&conn, id, "banned", &banned)
    }

    fn set_role(&self, id: AccountId, role: Role) -> Result<Account, AccountError> {
        let conn = self.conn()?;
        if role == Role::Owner || Self::require(&conn, id)?.role == Role::Owner {
            return Err(AccountError::OwnerImmutable);
        }
        Self::touch(&conn, id, "role", &role.as_str())
    }

    fn set_pending_action(
        &self,
        id: AccountId,
        action: PendingAction,
    ) -> Result<(), AccountError> {
        let conn = self.conn()?;
        let changed = conn.execute(
            "UPDATE accounts SET pending_action = ?, pending_order_id = ?, updated_at = ? WHERE id = ?",
            params![action.kind(), action.order_id(), ts(&Utc::now()), id],
        )?;
        if changed == 0 {
            return Err(AccountError::NotFound(id));
        }
        Ok(())
    }

    fn clear_pending_action(&self, id: AccountId) -> Result<(), AccountError> {
        let conn = self.conn()?;
        conn.execute(
            "UPDATE accounts SET pending_action = NULL, pending_order_id = NULL, updated_at = ? WHERE id = ?",
            params![ts(&Utc::now()), id],
        )?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn create_test_store() -> SqliteAccountStore {
        SqliteAccountStore::in_memory().unwrap()
    }

    #[test]
    fn test_first_account_is_owner() {
        let store = create_test_store();
        let first = store.register("100", Some("alice")).unwrap();
        let second = store.register("200", Some("bob")).unwrap();

        assert_eq!(first.role, Role::Owner);
        assert_eq!(second.role, Role::User);
        assert_eq!(second.quota, 0);
    }

    #[test]
    fn test_register_is_idempotent() {
        let store = create_test_store();
        let a = store.register("100", Some("alice")).unwrap();
        let b = store.register("100", Some("alice_new")).unwrap();

        assert_eq!(a.id, b.id);
        assert_eq!(b.username.as_deref(), Some("alice_new"));
        assert_eq!(b.role, Role::Owner);
    }

    #[test]
    fn test_find_by_username_strips_at() {
        let store = create_test_store();
        let a = store.register("100", Some("Alice")).unwrap();

        assert_eq!(store.find_by_username("@alice").unwrap().unwrap().id, a.id);
        assert!(store.find_by_username("carol").unwrap().is_none());
    }

    #[test]
    fn test_quota_consumption() {
        let store = create_test_store();
        store.register("1", None).unwrap();
        let user = store.register("2", None).unwrap();

        assert!(!store.consume_quota(user.id).unwrap());
        store.grant_quota(user.id, 2).unwrap();
        assert!(store.consume_quota(user.id).unwrap());
        assert!(store.consume_quota(user.id).unwrap());
        assert!(!store.consume_quota(user.id).unwrap());

        store.refund_quota(user.id).unwrap();
        assert_eq!(store.get(user.id).unwrap().unwrap().quota, 1);
    }

    #[test]
    fn test_consume_quota_unknown_account() {
        let store = create_test_store();
        assert!(matches!(
            store.consume_quota(42),
            Err(AccountError::NotFound(42))
        ));
    }

    #[test]
    fn test_owner_is_immutable() {
        let store = create_test_store();
        let owner = store.register("1", None).unwrap();
        let user = store.register("2", None).unwrap();

        assert!(matches!(
            store.set_role(owner.id, Role::User),
            Err(AccountError::OwnerImmutable)
        ));
        assert!(matches!(
            store.set_role(user.id, Role::Owner),
            Err(AccountError::OwnerImmutable)
        ));
        assert!(matches!(
            store.set_banned(owner.id, true),
            Err(AccountError::OwnerImmutable)
        ));

        let promoted = store.set_role(user.id, Role::Admin).unwrap();
        assert_eq!(promoted.role, Role::Admin);
    }

    #[test]
    fn test_ban_flag() {
        let store = create_test_store();
        store.register("1", None).unwrap();
        let user = store.register("2", None).unwrap();

        assert!(store.set_banned(user.id, true).unwrap().banned);
        assert!(!store.set_banned(user.id, false).unwrap().banned);
    }

    #[test]
    fn test_pending_action_slot() {
        let store = create_test_store();
        let user = store.register("1", None).unwrap();

        store
            .set_pending_action(user.id, PendingAction::AwaitDomain { order_id: 5 })
            .unwrap();
        assert_eq!(
            store.get(user.id).unwrap().unwrap().pending_action,
            Some(PendingAction::AwaitDomain { order_id: 5 })
        );

        // Setting a new action replaces the old one.
        store
            .set_pending_action(user.id, PendingAction::AwaitStatusDomain)
            .unwrap();
        assert_eq!(
            store.get(user.id).unwrap().unwrap().pending_action,
            Some(PendingAction::AwaitStatusDomain)
        );

        store.clear_pending_action(user.id).unwrap();
        assert!(store.get(user.id).unwrap().unwrap().pending_action.is_none());
    }
}
