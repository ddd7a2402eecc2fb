//! Persistent order store.
//!
//! Provides the accounts, menu and order tables the dispatcher works
//! against:
//! - Account creation, deletion and credential checks
//! - Menu listing and maintenance
//! - Pending and completed order tables
//!
//! Every operation runs inside its own SQLite transaction, so concurrent
//! connections never observe a half-applied change.

use chrono::Utc;
use rusqlite::{params, params_from_iter, Connection, ErrorCode, OptionalExtension, Transaction};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::path::Path;
use std::sync::{Mutex, MutexGuard};
use thiserror::Error;
use tracing::{debug, info};

const SCHEMA: &str = "
    CREATE TABLE IF NOT EXISTS accounts (
        user_id INTEGER PRIMARY KEY AUTOINCREMENT,
        email TEXT NOT NULL UNIQUE,
        password_hash TEXT NOT NULL,
        is_staff BOOLEAN NOT NULL DEFAULT 0
    );
    CREATE TABLE IF NOT EXISTS menu_items (
        item_id INTEGER PRIMARY KEY AUTOINCREMENT,
        item_name TEXT NOT NULL,
        item_price REAL NOT NULL,
        enabled BOOLEAN NOT NULL
    );
    CREATE TABLE IF NOT EXISTS pending_orders (
        order_id INTEGER PRIMARY KEY AUTOINCREMENT,
        user_id INTEGER REFERENCES accounts(user_id),
        order_details TEXT NOT NULL,
        total_price REAL NOT NULL,
        placed_at TEXT NOT NULL
    );
    CREATE TABLE IF NOT EXISTS completed_orders (
        order_id INTEGER PRIMARY KEY,
        user_id INTEGER REFERENCES accounts(user_id),
        order_details TEXT NOT NULL,
        total_price REAL NOT NULL,
        placed_at TEXT NOT NULL,
        completed_at TEXT NOT NULL
    );
";

/// Menu loaded into an empty database when seeding is enabled.
const DEMO_MENU: [(&str, f64); 8] = [
    ("Espresso", 2.5),
    ("Cappuccino", 3.5),
    ("Flat White", 3.75),
    ("Black Tea", 2.0),
    ("Croissant", 2.75),
    ("Bagel", 3.0),
    ("Club Sandwich", 7.5),
    ("Cheesecake", 4.25),
];

/// Store errors
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("database error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("corrupt order details: {0}")]
    Json(#[from] serde_json::Error),

    #[error("database connection lock poisoned")]
    Poisoned,
}

/// A row of the menu table
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MenuItem {
    pub item_id: i64,
    pub item_name: String,
    pub item_price: f64,
    pub enabled: bool,
}

/// One unit of an order. An order for three of an item holds three entries.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LineEntry {
    pub item_id: i64,
    pub item_name: String,
    pub item_price: f64,
}

impl From<&MenuItem> for LineEntry {
    fn from(item: &MenuItem) -> Self {
        Self {
            item_id: item.item_id,
            item_name: item.item_name.clone(),
            item_price: item.item_price,
        }
    }
}

/// A priced order that has not been persisted yet
#[derive(Debug, Clone, PartialEq)]
pub struct StagedOrder {
    pub total_price: f64,
    pub order_details: Vec<LineEntry>,
}

/// An order row from the pending or completed table
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoredOrder {
    pub order_id: i64,
    pub user_id: Option<i64>,
    pub total_price: f64,
    pub order_details: Vec<LineEntry>,
    pub placed_at: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<String>,
}

/// An authenticated account
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Account {
    pub user_id: i64,
    pub is_staff: bool,
}

/// Storage operations the dispatcher depends on.
///
/// Implementations must make each call atomic with respect to every other
/// call; callers hold no locks across calls.
pub trait OrderStore: Send + Sync {
    /// Full menu, disabled items included.
    fn get_menu(&self) -> Result<Vec<MenuItem>, StoreError>;

    /// The subset of `ids` that exist and are enabled.
    fn lookup_enabled_items(&self, ids: &[i64]) -> Result<Vec<MenuItem>, StoreError>;

    /// Persist a staged order as pending and return its order id.
    fn insert_pending_order(
        &self,
        user_id: Option<i64>,
        order: &StagedOrder,
    ) -> Result<i64, StoreError>;

    fn list_pending_orders(&self) -> Result<Vec<StoredOrder>, StoreError>;

    fn list_completed_orders(&self) -> Result<Vec<StoredOrder>, StoreError>;

    /// Remove a pending order, recording it as completed when `record` is
    /// set. Returns false if no such pending order exists.
    fn move_to_completed(&self, order_id: i64, record: bool) -> Result<bool, StoreError>;

    fn verify_credentials(&self, email: &str, password: &str)
        -> Result<Option<Account>, StoreError>;

    /// Returns false if the email is already registered.
    fn create_account(&self, email: &str, password: &str, is_staff: bool)
        -> Result<bool, StoreError>;

    /// Delete an account after checking its credentials.
    fn delete_account(&self, email: &str, password: &str) -> Result<Option<Account>, StoreError>;

    fn add_menu_item(&self, name: &str, price: f64, enabled: bool) -> Result<i64, StoreError>;

    /// Returns false if the item does not exist.
    fn set_menu_item_enabled(&self, item_id: i64, enabled: bool) -> Result<bool, StoreError>;
}

/// SQLite-backed store
pub struct SqliteStore {
    conn: Mutex<Connection>,
}

impl SqliteStore {
    /// Open (or create) the database at `path`. `:memory:` opens a private
    /// in-memory database.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self, StoreError> {
        let conn = Connection::open(path.as_ref())?;
        conn.execute_batch(SCHEMA)?;
        info!(path = %path.as_ref().display(), "Opened order store");
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    pub fn open_in_memory() -> Result<Self, StoreError> {
        Self::open(":memory:")
    }

    /// Load the demonstration menu if the menu table is empty. Returns the
    /// number of items inserted.
    pub fn seed_menu_if_empty(&self) -> Result<usize, StoreError> {
        let mut conn = self.lock()?;
        let tx = conn.transaction()?;
        let count: i64 = tx.query_row("SELECT COUNT(*) FROM menu_items", [], |row| row.get(0))?;
        if count > 0 {
            return Ok(0);
        }
        for (name, price) in DEMO_MENU {
            tx.execute(
                "INSERT INTO menu_items (item_name, item_price, enabled) VALUES (?1, ?2, 1)",
                params![name, price],
            )?;
        }
        tx.commit()?;
        Ok(DEMO_MENU.len())
    }

    /// Create a staff account, or promote and re-password an existing one.
    pub fn ensure_staff_account(&self, email: &str, password: &str) -> Result<(), StoreError> {
        let conn = self.lock()?;
        conn.execute(
            "INSERT INTO accounts (email, password_hash, is_staff) VALUES (?1, ?2, 1)
             ON CONFLICT(email) DO UPDATE SET password_hash = excluded.password_hash, is_staff = 1",
            params![email, hash_password(password)],
        )?;
        debug!(email, "Ensured staff account");
        Ok(())
    }

    fn lock(&self) -> Result<MutexGuard<'_, Connection>, StoreError> {
        self.conn.lock().map_err(|_| StoreError::Poisoned)
    }
}

impl OrderStore for SqliteStore {
    fn get_menu(&self) -> Result<Vec<MenuItem>, StoreError> {
        let conn = self.lock()?;
        let mut stmt = conn.prepare(
            "SELECT item_id, item_name, item_price, enabled FROM menu_items ORDER BY item_id",
        )?;
        let items = stmt
            .query_map([], menu_item_from_row)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(items)
    }

    fn lookup_enabled_items(&self, ids: &[i64]) -> Result<Vec<MenuItem>, StoreError> {
        if ids.is_empty() {
            return Ok(Vec::new());
        }
        let placeholders = vec!["?"; ids.len()].join(", ");
        let sql = format!(
            "SELECT item_id, item_name, item_price, enabled FROM menu_items
             WHERE enabled = 1 AND item_id IN ({placeholders})"
        );

        let conn = self.lock()?;
        let mut stmt = conn.prepare(&sql)?;
        let items = stmt
            .query_map(params_from_iter(ids.iter()), menu_item_from_row)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(items)
    }

    fn insert_pending_order(
        &self,
        user_id: Option<i64>,
        order: &StagedOrder,
    ) -> Result<i64, StoreError> {
        let details = serde_json::to_string(&order.order_details)?;
        let conn = self.lock()?;
        conn.execute(
            "INSERT INTO pending_orders (user_id, order_details, total_price, placed_at)
             VALUES (?1, ?2, ?3, ?4)",
            params![user_id, details, order.total_price, Utc::now().to_rfc3339()],
        )?;
        Ok(conn.last_insert_rowid())
    }

    fn list_pending_orders(&self) -> Result<Vec<StoredOrder>, StoreError> {
        let conn = self.lock()?;
        let mut stmt = conn.prepare(
            "SELECT order_id, user_id, order_details, total_price, placed_at, NULL
             FROM pending_orders ORDER BY order_id",
        )?;
        let rows = stmt
            .query_map([], order_row)?
            .collect::<Result<Vec<_>, _>>()?;
        rows.into_iter().map(OrderRow::into_order).collect()
    }

    fn list_completed_orders(&self) -> Result<Vec<StoredOrder>, StoreError> {
        let conn = self.lock()?;
        let mut stmt = conn.prepare(
            "SELECT order_id, user_id, order_details, total_price, placed_at, completed_at
             FROM completed_orders ORDER BY order_id",
        )?;
        let rows = stmt
            .query_map([], order_row)?
            .collect::<Result<Vec<_>, _>>()?;
        rows.into_iter().map(OrderRow::into_order).collect()
    }

    fn move_to_completed(&self, order_id: i64, record: bool) -> Result<bool, StoreError> {
        let mut conn = self.lock()?;
        let tx = conn.transaction()?;
        if !take_pending(&tx, order_id, record)? {
            return Ok(false);
        }
        tx.commit()?;
        Ok(true)
    }

    fn verify_credentials(
        &self,
        email: &str,
        password: &str,
    ) -> Result<Option<Account>, StoreError> {
        let conn = self.lock()?;
        find_account(&conn, email, password)
    }

    fn create_account(
        &self,
        email: &str,
        password: &str,
        is_staff: bool,
    ) -> Result<bool, StoreError> {
        let conn = self.lock()?;
        let result = conn.execute(
            "INSERT INTO accounts (email, password_hash, is_staff) VALUES (?1, ?2, ?3)",
            params![email, hash_password(password), is_staff],
        );
        match result {
            Ok(_) => Ok(true),
            Err(rusqlite::Error::SqliteFailure(e, _)) if e.code == ErrorCode::ConstraintViolation => {
                Ok(false)
            }
            Err(e) => Err(e.into()),
        }
    }

    fn delete_account(&self, email: &str, password: &str) -> Result<Option<Account>, StoreError> {
        let mut conn = self.lock()?;
        let tx = conn.transaction()?;
        let Some(account) = find_account(&tx, email, password)? else {
            return Ok(None);
        };
        tx.execute("DELETE FROM accounts WHERE user_id = ?1", params![account.user_id])?;
        tx.commit()?;
        Ok(Some(account))
    }

    fn add_menu_item(&self, name: &str, price: f64, enabled: bool) -> Result<i64, StoreError> {
        let conn = self.lock()?;
        conn.execute(
            "INSERT INTO menu_items (item_name, item_price, enabled) VALUES (?1, ?2, ?3)",
            params![name, price, enabled],
        )?;
        Ok(conn.last_insert_rowid())
    }

    fn set_menu_item_enabled(&self, item_id: i64, enabled: bool) -> Result<bool, StoreError> {
        let conn = self.lock()?;
        let changed = conn.execute(
            "UPDATE menu_items SET enabled = ?1 WHERE item_id = ?2",
            params![enabled, item_id],
        )?;
        Ok(changed > 0)
    }
}

/// Lowercase hex SHA-256 of the password.
fn hash_password(password: &str) -> String {
    format!("{:x}", Sha256::digest(password.as_bytes()))
}

fn find_account(
    conn: &Connection,
    email: &str,
    password: &str,
) -> Result<Option<Account>, StoreError> {
    let row = conn
        .query_row(
            "SELECT user_id, password_hash, is_staff FROM accounts WHERE email = ?1",
            params![email],
            |row| {
                Ok((
                    row.get::<_, i64>(0)?,
                    row.get::<_, String>(1)?,
                    row.get::<_, bool>(2)?,
                ))
            },
        )
        .optional()?;

    Ok(row.and_then(|(user_id, stored_hash, is_staff)| {
        (stored_hash == hash_password(password)).then_some(Account { user_id, is_staff })
    }))
}

/// Delete a pending order inside `tx`, copying it to the completed table
/// when `record` is set.
fn take_pending(tx: &Transaction<'_>, order_id: i64, record: bool) -> Result<bool, StoreError> {
    if record {
        let copied = tx.execute(
            "INSERT INTO completed_orders
                 (order_id, user_id, order_details, total_price, placed_at, completed_at)
             SELECT order_id, user_id, order_details, total_price, placed_at, ?2
             FROM pending_orders WHERE order_id = ?1",
            params![order_id, Utc::now().to_rfc3339()],
        )?;
        if copied == 0 {
            return Ok(false);
        }
    }
    let removed = tx.execute(
        "DELETE FROM pending_orders WHERE order_id = ?1",
        params![order_id],
    )?;
    Ok(removed > 0)
}

fn menu_item_from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<MenuItem> {
    Ok(MenuItem {
        item_id: row.get(0)?,
        item_name: row.get(1)?,
        item_price: row.get(2)?,
        enabled: row.get(3)?,
    })
}

/// Order row with its details column still encoded
struct OrderRow {
    order_id: i64,
    user_id: Option<i64>,
    order_details: String,
    total_price: f64,
    placed_at: String,
    completed_at: Option<String>,
}

impl OrderRow {
    fn into_order(self) -> Result<StoredOrder, StoreError> {
        Ok(StoredOrder {
            order_id: self.order_id,
            user_id: self.user_id,
            total_price: self.total_price,
            order_details: serde_json::from_str(&self.order_details)?,
            placed_at: self.placed_at,
            completed_at: self.completed_at,
        })
    }
}

fn order_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<OrderRow> {
    Ok(OrderRow {
        order_id: row.get(0)?,
        user_id: row.get(1)?,
        order_details: row.get(2)?,
        total_price: row.get(3)?,
        placed_at: row.get(4)?,
        completed_at: row.get(5)?,
    })
}
