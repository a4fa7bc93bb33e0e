//! Database access.

mod migrations;

use anyhow::Result;
use rusqlite::{params, Connection, OptionalExtension, Row};
use std::path::Path;
use std::sync::Mutex;

use shared::{UserAccount, UserRole};

pub use migrations::run_migrations;

/// Database connection wrapper.
pub struct Db(pub Mutex<Connection>);

impl Db {
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let conn = Connection::open(path)?;
        conn.execute_batch("PRAGMA foreign_keys = ON;")?;
        Ok(Self(Mutex::new(conn)))
    }

    /// In-memory database, used by tests.
    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        conn.execute_batch("PRAGMA foreign_keys = ON;")?;
        Ok(Self(Mutex::new(conn)))
    }

    pub fn run_migrations(&self) -> Result<()> {
        run_migrations(&self.conn())
    }

    /// Lock the connection.
    pub fn conn(&self) -> std::sync::MutexGuard<'_, Connection> {
        self.0.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

const USER_COLUMNS: &str = "id, username, role, created_at, updated_at";

fn account_from_row(row: &Row<'_>) -> rusqlite::Result<UserAccount> {
    let role: String = row.get(2)?;
    Ok(UserAccount {
        id: row.get(0)?,
        username: row.get(1)?,
        role: UserRole::parse(&role).unwrap_or(UserRole::Listener),
        created_at: row.get(3)?,
        updated_at: row.get(4)?,
    })
}

/// Create a user; returns its id.
pub fn create_user(
    conn: &Connection,
    username: &str,
    password_hash: &str,
    role: UserRole,
) -> Result<i64> {
    let now = chrono_iso8601();
    conn.execute(
        "INSERT INTO users (username, password_hash, role, created_at, updated_at)
         VALUES (?1, ?2, ?3, ?4, ?4)",
        params![username, password_hash, role.as_str(), now],
    )?;
    Ok(conn.last_insert_rowid())
}

/// Check if a username is taken.
pub fn user_exists(conn: &Connection, username: &str) -> Result<bool> {
    let count: i64 = conn.query_row(
        "SELECT COUNT(*) FROM users WHERE username = ?1",
        [username],
        |row| row.get(0),
    )?;
    Ok(count > 0)
}

/// Get user by id.
pub fn get_user(conn: &Connection, id: i64) -> Result<Option<UserAccount>> {
    let sql = format!("SELECT {} FROM users WHERE id = ?1", USER_COLUMNS);
    Ok(conn.query_row(&sql, [id], account_from_row).optional()?)
}

/// Get user by username together with the stored password hash.
pub fn get_user_credentials(
    conn: &Connection,
    username: &str,
) -> Result<Option<(UserAccount, String)>> {
    let sql = format!(
        "SELECT {}, password_hash FROM users WHERE username = ?1",
        USER_COLUMNS
    );
    let row = conn
        .query_row(&sql, [username], |row| {
            Ok((account_from_row(row)?, row.get::<_, String>(5)?))
        })
        .optional()?;
    Ok(row)
}

/// Store a new session.
pub fn create_session(
    conn: &Connection,
    token_hash: &str,
    user_id: i64,
    expires_at: &str,
) -> Result<()> {
    let now = chrono_iso8601();
    conn.execute(
        "INSERT INTO sessions (token_hash, user_id, created_at, expires_at) VALUES (?1, ?2, ?3, ?4)",
        params![token_hash, user_id, now, expires_at],
    )?;
    Ok(())
}

/// Resolve an unexpired session to its user.
pub fn get_session_user(conn: &Connection, token_hash: &str) -> Result<Option<UserAccount>> {
    let now = chrono_iso8601();
    let sql = format!(
        "SELECT u.{} FROM sessions s JOIN users u ON s.user_id = u.id
         WHERE s.token_hash = ?1 AND s.expires_at > ?2",
        USER_COLUMNS.replace(", ", ", u.")
    );
    Ok(conn
        .query_row(&sql, params![token_hash, now], account_from_row)
        .optional()?)
}

/// Delete a session. Returns false if it did not exist.
pub fn delete_session(conn: &Connection, token_hash: &str) -> Result<bool> {
    let rows = conn.execute("DELETE FROM sessions WHERE token_hash = ?1", [token_hash])?;
    Ok(rows > 0)
}

/// Delete every expired session; returns how many were removed.
pub fn purge_expired_sessions(conn: &Connection) -> Result<usize> {
    let now = chrono_iso8601();
    Ok(conn.execute("DELETE FROM sessions WHERE expires_at <= ?1", [now])?)
}

fn chrono_iso8601() -> String {
    chrono::Utc::now().format("%Y-%m-%dT%H:%M:%SZ").to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn in_memory_db_with_migrations() -> Connection {
        let conn = Connection::open_in_memory().unwrap();
        conn.execute_batch("PRAGMA foreign_keys = ON;").unwrap();
        run_migrations(&conn).unwrap();
        conn
    }

    fn iso_in(secs: i64) -> String {
        (chrono::Utc::now() + chrono::Duration::seconds(secs))
            .format("%Y-%m-%dT%H:%M:%SZ")
            .to_string()
    }

    #[test]
    fn migrations_are_idempotent() {
        let conn = in_memory_db_with_migrations();
        run_migrations(&conn).unwrap();
        let applied: i64 = conn
            .query_row("SELECT COUNT(*) FROM _schema_migrations", [], |row| row.get(0))
            .unwrap();
        assert_eq!(applied, 1);
    }

    #[test]
    fn create_user_and_get_user() {
        let conn = in_memory_db_with_migrations();
        assert!(!user_exists(&conn, "dj").unwrap());

        let id = create_user(&conn, "dj", "hash", UserRole::Streamer).unwrap();

        assert!(user_exists(&conn, "dj").unwrap());
        let user = get_user(&conn, id).unwrap().unwrap();
        assert_eq!(user.username, "dj");
        assert_eq!(user.role, UserRole::Streamer);
        assert!(get_user(&conn, id + 1).unwrap().is_none());
    }

    #[test]
    fn duplicate_username_fails() {
        let conn = in_memory_db_with_migrations();
        create_user(&conn, "dj", "hash", UserRole::Listener).unwrap();
        assert!(create_user(&conn, "dj", "other", UserRole::Admin).is_err());
    }

    #[test]
    fn get_user_credentials_returns_hash() {
        let conn = in_memory_db_with_migrations();
        create_user(&conn, "dj", "stored-hash", UserRole::Admin).unwrap();

        let (user, hash) = get_user_credentials(&conn, "dj").unwrap().unwrap();
        assert_eq!(user.role, UserRole::Admin);
        assert_eq!(hash, "stored-hash");
        assert!(get_user_credentials(&conn, "nobody").unwrap().is_none());
    }

    #[test]
    fn session_resolves_until_deleted() {
        let conn = in_memory_db_with_migrations();
        let id = create_user(&conn, "dj", "hash", UserRole::Streamer).unwrap();
        create_session(&conn, "tok", id, &iso_in(600)).unwrap();

        let user = get_session_user(&conn, "tok").unwrap().unwrap();
        assert_eq!(user.id, id);
        assert!(get_session_user(&conn, "other").unwrap().is_none());

        assert!(delete_session(&conn, "tok").unwrap());
        assert!(!delete_session(&conn, "tok").unwrap());
        assert!(get_session_user(&conn, "tok").unwrap().is_none());
    }

    #[test]
    fn expired_session_is_ignored_and_purged() {
        let conn = in_memory_db_with_migrations();
        let id = create_user(&conn, "dj", "hash", UserRole::Streamer).unwrap();
        create_session(&conn, "old", id, &iso_in(-60)).unwrap();
        create_session(&conn, "new", id, &iso_in(600)).unwrap();

        assert!(get_session_user(&conn, "old").unwrap().is_none());
        assert_eq!(purge_expired_sessions(&conn).unwrap(), 1);
        assert!(get_session_user(&conn, "new").unwrap().is_some());
    }
}
