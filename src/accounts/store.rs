//! Account and linked-identity persistence using SQLite.
//!
//! Single-row helpers take a `&Connection` so the linker can run several of
//! them inside one transaction; `AccountStore` wraps the same helpers for
//! standalone use.

use super::{normalize_email, LinkedIdentity, LocalAccount, NewAccount};
use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use rusqlite::{
    params, types::Type, Connection, ErrorCode, OptionalExtension, Row, Transaction,
    TransactionBehavior,
};
use std::path::Path;
use std::sync::{Mutex, MutexGuard};
use uuid::Uuid;

/// Store errors
#[derive(Debug, PartialEq, Clone)]
pub enum StoreError {
    /// A unique or foreign-key constraint rejected the write
    Conflict(String),
    /// Any other SQLite failure
    Database(String),
    /// Required data is missing or inconsistent
    Corrupt(String),
    /// A thread panicked while holding the connection
    LockPoisoned,
}

impl std::fmt::Display for StoreError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            StoreError::Conflict(msg) => write!(f, "Constraint violation: {}", msg),
            StoreError::Database(msg) => write!(f, "Database error: {}", msg),
            StoreError::Corrupt(msg) => write!(f, "Inconsistent data: {}", msg),
            StoreError::LockPoisoned => write!(f, "Account store lock poisoned"),
        }
    }
}

impl std::error::Error for StoreError {}

impl From<rusqlite::Error> for StoreError {
    fn from(e: rusqlite::Error) -> Self {
        match &e {
            rusqlite::Error::SqliteFailure(err, msg) if err.code == ErrorCode::ConstraintViolation => {
                StoreError::Conflict(msg.clone().unwrap_or_else(|| e.to_string()))
            }
            _ => StoreError::Database(e.to_string()),
        }
    }
}

/// Fields for inserting a linked identity. Tokens are already encrypted.
pub(crate) struct NewLinkedIdentity<'a> {
    pub account_id: &'a str,
    pub provider: &'a str,
    pub subject_id: &'a str,
    pub access_token: &'a str,
    pub refresh_token: &'a str,
    pub expires_at: Option<i64>,
    pub account_email: Option<&'a str>,
}

const SCHEMA: &str = r#"
    PRAGMA foreign_keys = ON;

    CREATE TABLE IF NOT EXISTS accounts (
        id            TEXT PRIMARY KEY,
        email         TEXT NOT NULL UNIQUE COLLATE NOCASE,
        password_hash TEXT,
        first_name    TEXT NOT NULL DEFAULT '',
        last_name     TEXT NOT NULL DEFAULT '',
        display_name  TEXT NOT NULL DEFAULT '',
        created_at    TEXT NOT NULL
    );

    CREATE TABLE IF NOT EXISTS linked_identities (
        id            INTEGER PRIMARY KEY,
        account_id    TEXT NOT NULL REFERENCES accounts(id) ON DELETE CASCADE,
        provider      TEXT NOT NULL,
        subject_id    TEXT NOT NULL,
        access_token  TEXT NOT NULL,
        refresh_token TEXT NOT NULL DEFAULT '',
        expires_at    INTEGER,
        account_email TEXT,
        created_at    TEXT NOT NULL,
        updated_at    TEXT NOT NULL,
        UNIQUE(provider, subject_id),
        UNIQUE(provider, account_id)
    );

    CREATE INDEX IF NOT EXISTS idx_identities_account ON linked_identities(account_id);
"#;

const ACCOUNT_COLUMNS: &str =
    "id, email, password_hash, first_name, last_name, display_name, created_at";

const IDENTITY_COLUMNS: &str = "id, account_id, provider, subject_id, access_token, \
     refresh_token, expires_at, account_email, created_at, updated_at";

fn parse_timestamp(row: &Row<'_>, idx: usize) -> rusqlite::Result<DateTime<Utc>> {
    let raw: String = row.get(idx)?;
    DateTime::parse_from_rfc3339(&raw)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, Box::new(e)))
}

fn account_from_row(row: &Row<'_>) -> rusqlite::Result<LocalAccount> {
    Ok(LocalAccount {
        id: row.get(0)?,
        email: row.get(1)?,
        password_hash: row.get(2)?,
        first_name: row.get(3)?,
        last_name: row.get(4)?,
        display_name: row.get(5)?,
        created_at: parse_timestamp(row, 6)?,
    })
}

fn identity_from_row(row: &Row<'_>) -> rusqlite::Result<LinkedIdentity> {
    Ok(LinkedIdentity {
        id: row.get(0)?,
        account_id: row.get(1)?,
        provider: row.get(2)?,
        subject_id: row.get(3)?,
        access_token: row.get(4)?,
        refresh_token: row.get(5)?,
        expires_at: row.get(6)?,
        account_email: row.get(7)?,
        created_at: parse_timestamp(row, 8)?,
        updated_at: parse_timestamp(row, 9)?,
    })
}

pub(crate) fn insert_account(conn: &Connection, new: &NewAccount) -> Result<LocalAccount, StoreError> {
    let email = normalize_email(&new.email)
        .ok_or_else(|| StoreError::Corrupt("account email must not be empty".to_string()))?;

    let account = LocalAccount {
        id: Uuid::now_v7().to_string(),
        email,
        password_hash: new.password_hash.clone(),
        first_name: new.first_name.clone(),
        last_name: new.last_name.clone(),
        display_name: new.display_name.clone(),
        created_at: Utc::now(),
    };

    conn.execute(
        &format!("INSERT INTO accounts ({}) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)", ACCOUNT_COLUMNS),
        params![
            account.id,
            account.email,
            account.password_hash,
            account.first_name,
            account.last_name,
            account.display_name,
            account.created_at.to_rfc3339(),
        ],
    )?;

    Ok(account)
}

pub(crate) fn select_account(conn: &Connection, id: &str) -> Result<Option<LocalAccount>, StoreError> {
    let account = conn
        .query_row(
            &format!("SELECT {} FROM accounts WHERE id = ?1", ACCOUNT_COLUMNS),
            params![id],
            account_from_row,
        )
        .optional()?;
    Ok(account)
}

pub(crate) fn select_account_by_email(
    conn: &Connection,
    email: &str,
) -> Result<Option<LocalAccount>, StoreError> {
    let Some(email) = normalize_email(email) else {
        return Ok(None);
    };
    let account = conn
        .query_row(
            &format!("SELECT {} FROM accounts WHERE email = ?1", ACCOUNT_COLUMNS),
            params![email],
            account_from_row,
        )
        .optional()?;
    Ok(account)
}

pub(crate) fn select_identity(
    conn: &Connection,
    provider: &str,
    subject_id: &str,
) -> Result<Option<LinkedIdentity>, StoreError> {
    let identity = conn
        .query_row(
            &format!(
                "SELECT {} FROM linked_identities WHERE provider = ?1 AND subject_id = ?2",
                IDENTITY_COLUMNS
            ),
            params![provider, subject_id],
            identity_from_row,
        )
        .optional()?;
    Ok(identity)
}

fn select_identity_by_id(conn: &Connection, id: i64) -> Result<LinkedIdentity, StoreError> {
    let identity = conn.query_row(
        &format!("SELECT {} FROM linked_identities WHERE id = ?1", IDENTITY_COLUMNS),
        params![id],
        identity_from_row,
    )?;
    Ok(identity)
}

pub(crate) fn insert_identity(
    conn: &Connection,
    new: &NewLinkedIdentity<'_>,
) -> Result<LinkedIdentity, StoreError> {
    let now = Utc::now().to_rfc3339();

    conn.execute(
        r#"
        INSERT INTO linked_identities (
            account_id, provider, subject_id,
            access_token, refresh_token,
            expires_at, account_email, created_at, updated_at
        )
        VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)
        "#,
        params![
            new.account_id,
            new.provider,
            new.subject_id,
            new.access_token,
            new.refresh_token,
            new.expires_at,
            new.account_email,
            now,
            now,
        ],
    )?;

    select_identity_by_id(conn, conn.last_insert_rowid())
}

/// Replaces tokens and expiry of an existing identity. Nothing else changes.
pub(crate) fn update_identity_tokens(
    conn: &Connection,
    id: i64,
    access_token: &str,
    refresh_token: &str,
    expires_at: Option<i64>,
) -> Result<LinkedIdentity, StoreError> {
    let rows = conn.execute(
        r#"
        UPDATE linked_identities
        SET access_token = ?1, refresh_token = ?2, expires_at = ?3, updated_at = ?4
        WHERE id = ?5
        "#,
        params![access_token, refresh_token, expires_at, Utc::now().to_rfc3339(), id],
    )?;

    if rows == 0 {
        return Err(StoreError::Corrupt(format!("linked identity {} vanished", id)));
    }

    select_identity_by_id(conn, id)
}

/// Account and linked-identity storage backed by SQLite.
///
/// # Thread Safety
/// - Connection is wrapped in Mutex for safe concurrent access
/// - Writes that span several rows go through [`AccountStore::transaction`]
pub struct AccountStore {
    conn: Mutex<Connection>,
}

impl AccountStore {
    /// Creates or opens an account store and ensures the schema exists.
    pub fn new<P: AsRef<Path>>(db_path: P) -> Result<Self> {
        let db_path = db_path.as_ref();
        let conn = Connection::open(db_path)
            .with_context(|| format!("Failed to open account database at {}", db_path.display()))?;

        conn.execute_batch(SCHEMA)
            .context("Failed to create account tables")?;

        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    fn lock(&self) -> Result<MutexGuard<'_, Connection>, StoreError> {
        self.conn.lock().map_err(|_| StoreError::LockPoisoned)
    }

    /// Runs `f` inside an immediate transaction.
    ///
    /// Commits when `f` returns `Ok`, rolls back otherwise.
    pub fn transaction<T, E, F>(&self, f: F) -> Result<T, E>
    where
        E: From<StoreError>,
        F: FnOnce(&Transaction<'_>) -> Result<T, E>,
    {
        let mut conn = self.lock()?;
        let tx = conn
            .transaction_with_behavior(TransactionBehavior::Immediate)
            .map_err(StoreError::from)?;

        let value = f(&tx)?;
        tx.commit().map_err(StoreError::from)?;
        Ok(value)
    }

    /// Inserts a local account (direct signup). Fails with `Conflict` on a duplicate email.
    pub fn create_account(&self, new: &NewAccount) -> Result<LocalAccount, StoreError> {
        let conn = self.lock()?;
        insert_account(&conn, new)
    }

    pub fn get_account(&self, id: &str) -> Result<Option<LocalAccount>, StoreError> {
        let conn = self.lock()?;
        select_account(&conn, id)
    }

    pub fn find_account_by_email(&self, email: &str) -> Result<Option<LocalAccount>, StoreError> {
        let conn = self.lock()?;
        select_account_by_email(&conn, email)
    }

    pub fn find_identity(
        &self,
        provider: &str,
        subject_id: &str,
    ) -> Result<Option<LinkedIdentity>, StoreError> {
        let conn = self.lock()?;
        select_identity(&conn, provider, subject_id)
    }

    /// Inserts a linked identity whose tokens are already encrypted.
    #[cfg(test)]
    pub(crate) fn insert_identity(
        &self,
        new: &NewLinkedIdentity<'_>,
    ) -> Result<LinkedIdentity, StoreError> {
        let conn = self.lock()?;
        insert_identity(&conn, new)
    }

    /// Lists identities linked to an account, ordered by provider.
    pub fn identities_for_account(&self, account_id: &str) -> Result<Vec<LinkedIdentity>, StoreError> {
        let conn = self.lock()?;
        let mut stmt = conn.prepare(&format!(
            "SELECT {} FROM linked_identities WHERE account_id = ?1 ORDER BY provider",
            IDENTITY_COLUMNS
        ))?;

        let identities = stmt
            .query_map(params![account_id], identity_from_row)?
            .collect::<Result<Vec<_>, _>>()?;

        Ok(identities)
    }

    pub fn count_accounts(&self) -> Result<usize, StoreError> {
        let count: i64 = self
            .lock()?
            .query_row("SELECT COUNT(*) FROM accounts", [], |row| row.get(0))?;
        Ok(count as usize)
    }

    pub fn count_identities(&self) -> Result<usize, StoreError> {
        let count: i64 = self
            .lock()?
            .query_row("SELECT COUNT(*) FROM linked_identities", [], |row| row.get(0))?;
        Ok(count as usize)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn create_test_store() -> AccountStore {
        AccountStore::new(":memory:").expect("Failed to create test store")
    }

    fn signup(store: &AccountStore, email: &str) -> LocalAccount {
        store
            .create_account(&NewAccount {
                email: email.to_string(),
                password_hash: Some("argon2id$dummy".to_string()),
                ..Default::default()
            })
            .expect("Failed to create account")
    }

    fn identity_for<'a>(account_id: &'a str, subject_id: &'a str) -> NewLinkedIdentity<'a> {
        NewLinkedIdentity {
            account_id,
            provider: "google",
            subject_id,
            access_token: "enc-access",
            refresh_token: "",
            expires_at: Some(1_700_000_000),
            account_email: Some("a@x.com"),
        }
    }

    #[test]
    fn test_create_and_get_account() {
        let store = create_test_store();
        let account = signup(&store, "  Ada@X.com ");

        assert_eq!(account.email, "ada@x.com");
        assert_eq!(store.get_account(&account.id).unwrap(), Some(account.clone()));
        assert_eq!(
            store.find_account_by_email("ADA@x.COM").unwrap(),
            Some(account)
        );
    }

    #[test]
    fn test_get_nonexistent() {
        let store = create_test_store();
        assert!(store.get_account("missing").unwrap().is_none());
        assert!(store.find_account_by_email("nobody@x.com").unwrap().is_none());
        assert!(store.find_account_by_email("   ").unwrap().is_none());
        assert!(store.find_identity("google", "S1").unwrap().is_none());
    }

    #[test]
    fn test_duplicate_email_conflicts() {
        let store = create_test_store();
        signup(&store, "a@x.com");

        let result = store.create_account(&NewAccount {
            email: "A@x.com".to_string(),
            ..Default::default()
        });
        assert!(matches!(result, Err(StoreError::Conflict(_))));
        assert_eq!(store.count_accounts().unwrap(), 1);
    }

    #[test]
    fn test_empty_email_rejected() {
        let store = create_test_store();
        let result = store.create_account(&NewAccount::default());
        assert!(matches!(result, Err(StoreError::Corrupt(_))));
    }

    #[test]
    fn test_insert_and_find_identity() {
        let store = create_test_store();
        let account = signup(&store, "a@x.com");

        let inserted = store.insert_identity(&identity_for(&account.id, "S1")).unwrap();
        let found = store.find_identity("google", "S1").unwrap().unwrap();

        assert_eq!(inserted, found);
        assert_eq!(found.account_id, account.id);
        assert_eq!(found.refresh_token, "");
        assert_eq!(found.expires_at, Some(1_700_000_000));
        assert_eq!(store.identities_for_account(&account.id).unwrap(), vec![found]);
    }

    #[test]
    fn test_duplicate_subject_conflicts() {
        let store = create_test_store();
        let first = signup(&store, "a@x.com");
        let second = signup(&store, "b@x.com");

        store.insert_identity(&identity_for(&first.id, "S1")).unwrap();
        let result = store.insert_identity(&identity_for(&second.id, "S1"));

        assert!(matches!(result, Err(StoreError::Conflict(_))));
        assert_eq!(store.count_identities().unwrap(), 1);
    }

    #[test]
    fn test_same_provider_twice_conflicts() {
        let store = create_test_store();
        let account = signup(&store, "a@x.com");

        store.insert_identity(&identity_for(&account.id, "S1")).unwrap();
        let result = store.insert_identity(&identity_for(&account.id, "S2"));

        assert!(matches!(result, Err(StoreError::Conflict(_))));
    }

    #[test]
    fn test_identity_requires_existing_account() {
        let store = create_test_store();
        let result = store.insert_identity(&identity_for("no-such-account", "S1"));
        assert!(matches!(result, Err(StoreError::Conflict(_))));
    }

    #[test]
    fn test_update_tokens_only() {
        let store = create_test_store();
        let account = signup(&store, "a@x.com");
        let identity = store.insert_identity(&identity_for(&account.id, "S1")).unwrap();

        let updated = store
            .transaction(|tx| update_identity_tokens(tx, identity.id, "enc-2", "enc-r", None))
            .unwrap();

        assert_eq!(updated.access_token, "enc-2");
        assert_eq!(updated.refresh_token, "enc-r");
        assert_eq!(updated.expires_at, None);
        assert_eq!(updated.subject_id, identity.subject_id);
        assert_eq!(updated.account_email, identity.account_email);
        assert_eq!(updated.created_at, identity.created_at);
    }

    #[test]
    fn test_transaction_rolls_back_on_error() {
        let store = create_test_store();

        let result: Result<(), StoreError> = store.transaction(|tx| {
            let account = insert_account(
                tx,
                &NewAccount {
                    email: "a@x.com".to_string(),
                    ..Default::default()
                },
            )?;
            insert_identity(tx, &identity_for(&account.id, "S1"))?;
            Err(StoreError::Corrupt("forced failure".to_string()))
        });

        assert!(result.is_err());
        assert_eq!(store.count_accounts().unwrap(), 0);
        assert_eq!(store.count_identities().unwrap(), 0);
    }

    #[test]
    fn test_persists_across_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("accounts.db");

        let id = {
            let store = AccountStore::new(&path).unwrap();
            signup(&store, "a@x.com").id
        };

        let store = AccountStore::new(&path).unwrap();
        assert_eq!(store.get_account(&id).unwrap().unwrap().email, "a@x.com");
    }
}
