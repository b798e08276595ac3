//! User Storage
//! Mission: Persist user accounts in SQLite with soft delete

use crate::auth::models::{User, UserRole};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, ErrorCode, OptionalExtension, Row};
use std::time::Duration;
use thiserror::Error;
use tracing::{info, warn};

pub const DEFAULT_ADMIN_USERNAME: &str = "admin";
pub const DEFAULT_ADMIN_EMAIL: &str = "admin@example.com";

const USER_COLUMNS: &str =
    "id, username, email, password_hash, role, is_active, created_at, updated_at, deleted_at";

/// Which unique field a write collided on
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UniqueField {
    Username,
    Email,
}

#[derive(Debug, Error)]
pub enum DirectoryError {
    #[error("{0:?} already exists")]
    Conflict(UniqueField),
    #[error("user not found")]
    NotFound,
    #[error("directory call timed out")]
    Timeout,
    #[error("storage error: {0}")]
    Storage(String),
}

impl From<rusqlite::Error> for DirectoryError {
    fn from(e: rusqlite::Error) -> Self {
        if let rusqlite::Error::SqliteFailure(err, Some(msg)) = &e {
            if err.code == ErrorCode::ConstraintViolation {
                if msg.contains("users.username") {
                    return DirectoryError::Conflict(UniqueField::Username);
                }
                if msg.contains("users.email") {
                    return DirectoryError::Conflict(UniqueField::Email);
                }
            }
        }
        DirectoryError::Storage(e.to_string())
    }
}

/// Fields for a new account; the hash is computed by the caller
#[derive(Debug, Clone)]
pub struct NewUser {
    pub username: String,
    pub email: String,
    pub password_hash: String,
    pub role: UserRole,
    pub is_active: bool,
}

/// Partial update; `None` keeps the stored value
#[derive(Debug, Clone, Default)]
pub struct UserChanges {
    pub email: Option<String>,
    pub password_hash: Option<String>,
    pub role: Option<UserRole>,
    pub is_active: Option<bool>,
}

impl UserChanges {
    pub fn is_empty(&self) -> bool {
        self.email.is_none()
            && self.password_hash.is_none()
            && self.role.is_none()
            && self.is_active.is_none()
    }
}

/// Async view of the user directory used by the auth core.
///
/// Every lookup excludes soft-deleted users.
#[async_trait]
pub trait UserDirectory: Send + Sync {
    async fn find_by_id(&self, id: i64) -> Result<Option<User>, DirectoryError>;

    /// Match on username or email
    async fn find_by_login(&self, login: &str) -> Result<Option<User>, DirectoryError>;

    async fn create(&self, user: NewUser) -> Result<User, DirectoryError>;

    async fn update(&self, id: i64, changes: UserChanges) -> Result<User, DirectoryError>;

    async fn soft_delete(&self, id: i64) -> Result<(), DirectoryError>;

    /// Page of live users ordered by id, plus the live total
    async fn list(&self, offset: i64, limit: i64) -> Result<(Vec<User>, i64), DirectoryError>;
}

/// User storage with SQLite backend
#[derive(Clone)]
pub struct UserStore {
    db_path: String,
}

impl UserStore {
    /// Create a new user store and initialize database
    pub fn new(db_path: &str) -> Result<Self, DirectoryError> {
        let store = Self {
            db_path: db_path.to_string(),
        };
        store.init_db()?;
        Ok(store)
    }

    fn open(&self) -> Result<Connection, DirectoryError> {
        let conn = Connection::open(&self.db_path)?;
        conn.busy_timeout(Duration::from_secs(5))?;
        Ok(conn)
    }

    /// Initialize database schema
    fn init_db(&self) -> Result<(), DirectoryError> {
        let conn = self.open()?;

        conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS users (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                username TEXT NOT NULL,
                email TEXT NOT NULL,
                password_hash TEXT NOT NULL,
                role TEXT NOT NULL DEFAULT 'user',
                is_active INTEGER NOT NULL DEFAULT 1,
                created_at TEXT NOT NULL,
                updated_at TEXT NOT NULL,
                deleted_at TEXT
            );
            CREATE UNIQUE INDEX IF NOT EXISTS idx_users_username_live
                ON users(username) WHERE deleted_at IS NULL;
            CREATE UNIQUE INDEX IF NOT EXISTS idx_users_email_live
                ON users(email) WHERE deleted_at IS NULL;
            CREATE INDEX IF NOT EXISTS idx_users_deleted_at ON users(deleted_at);",
        )?;

        Ok(())
    }

    /// Create the default admin when no live admin exists.
    ///
    /// Returns the created account, or `None` if an admin was already there or
    /// the default username or email belongs to another live account.
    pub fn seed_default_admin(&self, password_hash: &str) -> Result<Option<User>, DirectoryError> {
        let conn = self.open()?;
        let count: i64 = conn.query_row(
            "SELECT COUNT(*) FROM users WHERE role = 'admin' AND deleted_at IS NULL",
            [],
            |row| row.get(0),
        )?;

        if count > 0 {
            return Ok(None);
        }

        // A demoted former admin may still hold the default name or email
        let taken = self.get_user_by_username(DEFAULT_ADMIN_USERNAME)?.is_some()
            || self.get_user_by_email(DEFAULT_ADMIN_EMAIL)?.is_some();
        if taken {
            warn!(
                username = DEFAULT_ADMIN_USERNAME,
                email = DEFAULT_ADMIN_EMAIL,
                "⚠️  No live admin, but the default admin name or email is taken; not seeding"
            );
            return Ok(None);
        }

        let admin = self.insert_user(
            &conn,
            &NewUser {
                username: DEFAULT_ADMIN_USERNAME.to_string(),
                email: DEFAULT_ADMIN_EMAIL.to_string(),
                password_hash: password_hash.to_string(),
                role: UserRole::Admin,
                is_active: true,
            },
        )?;

        Ok(Some(admin))
    }

    /// Get a live user by id
    pub fn get_user_by_id(&self, id: i64) -> Result<Option<User>, DirectoryError> {
        let conn = self.open()?;
        query_one(
            &conn,
            &format!("SELECT {USER_COLUMNS} FROM users WHERE id = ?1 AND deleted_at IS NULL"),
            params![id],
        )
    }

    /// Get a live user by username
    pub fn get_user_by_username(&self, username: &str) -> Result<Option<User>, DirectoryError> {
        let conn = self.open()?;
        query_one(
            &conn,
            &format!(
                "SELECT {USER_COLUMNS} FROM users WHERE username = ?1 AND deleted_at IS NULL"
            ),
            params![username],
        )
    }

    /// Get a live user by email
    pub fn get_user_by_email(&self, email: &str) -> Result<Option<User>, DirectoryError> {
        let conn = self.open()?;
        query_one(
            &conn,
            &format!("SELECT {USER_COLUMNS} FROM users WHERE email = ?1 AND deleted_at IS NULL"),
            params![email],
        )
    }

    /// Get a live user whose username or email equals `login`
    pub fn get_user_by_login(&self, login: &str) -> Result<Option<User>, DirectoryError> {
        let conn = self.open()?;
        query_one(
            &conn,
            &format!(
                "SELECT {USER_COLUMNS} FROM users
                 WHERE (username = ?1 OR email = ?1) AND deleted_at IS NULL
                 ORDER BY id LIMIT 1"
            ),
            params![login],
        )
    }

    /// Create a new user, rejecting duplicate live usernames and emails
    pub fn create_user(&self, new_user: &NewUser) -> Result<User, DirectoryError> {
        let conn = self.open()?;

        if field_taken(&conn, "username", &new_user.username, None)? {
            return Err(DirectoryError::Conflict(UniqueField::Username));
        }
        if field_taken(&conn, "email", &new_user.email, None)? {
            return Err(DirectoryError::Conflict(UniqueField::Email));
        }

        let user = self.insert_user(&conn, new_user)?;

        info!(
            user_id = user.id,
            username = %user.username,
            role = user.role.as_str(),
            "✅ Created user"
        );

        Ok(user)
    }

    fn insert_user(&self, conn: &Connection, new_user: &NewUser) -> Result<User, DirectoryError> {
        let now = Utc::now();
        conn.execute(
            "INSERT INTO users (username, email, password_hash, role, is_active, created_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?6)",
            params![
                new_user.username,
                new_user.email,
                new_user.password_hash,
                new_user.role.as_str(),
                new_user.is_active,
                now.to_rfc3339(),
            ],
        )?;

        Ok(User {
            id: conn.last_insert_rowid(),
            username: new_user.username.clone(),
            email: new_user.email.clone(),
            password_hash: new_user.password_hash.clone(),
            role: new_user.role,
            is_active: new_user.is_active,
            created_at: now,
            updated_at: now,
            deleted_at: None,
        })
    }

    /// Apply a partial update to a live user and return the new record
    pub fn update_user(&self, id: i64, changes: &UserChanges) -> Result<User, DirectoryError> {
        let conn = self.open()?;

        let mut user = query_one(
            &conn,
            &format!("SELECT {USER_COLUMNS} FROM users WHERE id = ?1 AND deleted_at IS NULL"),
            params![id],
        )?
        .ok_or(DirectoryError::NotFound)?;

        if changes.is_empty() {
            return Ok(user);
        }

        if let Some(email) = &changes.email {
            if *email != user.email && field_taken(&conn, "email", email, Some(id))? {
                return Err(DirectoryError::Conflict(UniqueField::Email));
            }
            user.email = email.clone();
        }
        if let Some(hash) = &changes.password_hash {
            user.password_hash = hash.clone();
        }
        if let Some(role) = changes.role {
            user.role = role;
        }
        if let Some(active) = changes.is_active {
            user.is_active = active;
        }
        user.updated_at = Utc::now();

        conn.execute(
            "UPDATE users
             SET email = ?1, password_hash = ?2, role = ?3, is_active = ?4, updated_at = ?5
             WHERE id = ?6 AND deleted_at IS NULL",
            params![
                user.email,
                user.password_hash,
                user.role.as_str(),
                user.is_active,
                user.updated_at.to_rfc3339(),
                id,
            ],
        )?;

        Ok(user)
    }

    /// Mark a live user as deleted. The row is kept.
    pub fn soft_delete_user(&self, id: i64) -> Result<(), DirectoryError> {
        let conn = self.open()?;
        let now = Utc::now().to_rfc3339();

        let rows_affected = conn.execute(
            "UPDATE users SET deleted_at = ?1, updated_at = ?1 WHERE id = ?2 AND deleted_at IS NULL",
            params![now, id],
        )?;

        if rows_affected == 0 {
            return Err(DirectoryError::NotFound);
        }

        info!(user_id = id, "🗑️  Soft-deleted user");
        Ok(())
    }

    /// List live users (admin only)
    pub fn list_users(&self, offset: i64, limit: i64) -> Result<(Vec<User>, i64), DirectoryError> {
        let conn = self.open()?;

        let total: i64 = conn.query_row(
            "SELECT COUNT(*) FROM users WHERE deleted_at IS NULL",
            [],
            |row| row.get(0),
        )?;

        let mut stmt = conn.prepare(&format!(
            "SELECT {USER_COLUMNS} FROM users WHERE deleted_at IS NULL
             ORDER BY id LIMIT ?1 OFFSET ?2"
        ))?;

        let users = stmt
            .query_map(params![limit, offset], row_to_user)?
            .collect::<Result<Vec<_>, _>>()?;

        Ok((users, total))
    }

    async fn blocking<T, F>(&self, f: F) -> Result<T, DirectoryError>
    where
        F: FnOnce(&UserStore) -> Result<T, DirectoryError> + Send + 'static,
        T: Send + 'static,
    {
        let store = self.clone();
        tokio::task::spawn_blocking(move || f(&store))
            .await
            .map_err(|e| DirectoryError::Storage(format!("Task join error: {}", e)))?
    }
}

#[async_trait]
impl UserDirectory for UserStore {
    async fn find_by_id(&self, id: i64) -> Result<Option<User>, DirectoryError> {
        self.blocking(move |store| store.get_user_by_id(id)).await
    }

    async fn find_by_login(&self, login: &str) -> Result<Option<User>, DirectoryError> {
        let login = login.to_string();
        self.blocking(move |store| store.get_user_by_login(&login))
            .await
    }

    async fn create(&self, user: NewUser) -> Result<User, DirectoryError> {
        self.blocking(move |store| store.create_user(&user)).await
    }

    async fn update(&self, id: i64, changes: UserChanges) -> Result<User, DirectoryError> {
        self.blocking(move |store| store.update_user(id, &changes))
            .await
    }

    async fn soft_delete(&self, id: i64) -> Result<(), DirectoryError> {
        self.blocking(move |store| store.soft_delete_user(id)).await
    }

    async fn list(&self, offset: i64, limit: i64) -> Result<(Vec<User>, i64), DirectoryError> {
        self.blocking(move |store| store.list_users(offset, limit))
            .await
    }
}

fn query_one<P: rusqlite::Params>(
    conn: &Connection,
    sql: &str,
    params: P,
) -> Result<Option<User>, DirectoryError> {
    Ok(conn.query_row(sql, params, row_to_user).optional()?)
}

fn field_taken(
    conn: &Connection,
    column: &str,
    value: &str,
    exclude_id: Option<i64>,
) -> Result<bool, DirectoryError> {
    // `column` is always one of our own literals
    let count: i64 = conn.query_row(
        &format!(
            "SELECT COUNT(*) FROM users WHERE {column} = ?1 AND deleted_at IS NULL AND id != ?2"
        ),
        params![value, exclude_id.unwrap_or(-1)],
        |row| row.get(0),
    )?;
    Ok(count > 0)
}

fn row_to_user(row: &Row<'_>) -> rusqlite::Result<User> {
    let role_str: String = row.get(4)?;
    let deleted_at: Option<String> = row.get(8)?;

    Ok(User {
        id: row.get(0)?,
        username: row.get(1)?,
        email: row.get(2)?,
        password_hash: row.get(3)?,
        // Unknown roles fall back to least privilege
        role: UserRole::parse(&role_str).unwrap_or(UserRole::User),
        is_active: row.get(5)?,
        created_at: parse_timestamp(6, &row.get::<_, String>(6)?)?,
        updated_at: parse_timestamp(7, &row.get::<_, String>(7)?)?,
        deleted_at: deleted_at
            .map(|raw| parse_timestamp(8, &raw))
            .transpose()?,
    })
}

fn parse_timestamp(idx: usize, raw: &str) -> rusqlite::Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(raw)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| {
            rusqlite::Error::FromSqlConversionFailure(idx, rusqlite::types::Type::Text, Box::new(e))
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::NamedTempFile;

    fn create_test_store() -> (UserStore, NamedTempFile) {
        let temp_file = NamedTempFile::new().unwrap();
        let db_path = temp_file.path().to_str().unwrap();
        let store = UserStore::new(db_path).unwrap();
        (store, temp_file)
    }

    fn new_user(username: &str, email: &str) -> NewUser {
        NewUser {
            username: username.to_string(),
            email: email.to_string(),
            password_hash: "hash".to_string(),
            role: UserRole::User,
            is_active: true,
        }
    }

    #[test]
    fn test_default_admin_seeded_once() {
        let (store, _temp) = create_test_store();

        let admin = store.seed_default_admin("hash").unwrap();
        assert!(admin.is_some());
        let admin = admin.unwrap();
        assert_eq!(admin.username, DEFAULT_ADMIN_USERNAME);
        assert_eq!(admin.role, UserRole::Admin);
        assert!(admin.is_active);

        // Second start: an admin already exists
        assert!(store.seed_default_admin("hash").unwrap().is_none());
        assert_eq!(store.list_users(0, 10).unwrap().1, 1);
    }

    #[test]
    fn test_reseed_after_admin_demoted_itself() {
        let (store, _temp) = create_test_store();
        let admin = store.seed_default_admin("hash").unwrap().unwrap();

        store
            .update_user(
                admin.id,
                &UserChanges {
                    role: Some(UserRole::User),
                    ..Default::default()
                },
            )
            .unwrap();

        // Restart: no admin left, but the default name is held by the demoted account
        assert!(store.seed_default_admin("hash").unwrap().is_none());

        let (users, total) = store.list_users(0, 10).unwrap();
        assert_eq!(total, 1);
        assert_eq!(users[0].role, UserRole::User);
    }

    #[test]
    fn test_reseed_after_admin_deleted() {
        let (store, _temp) = create_test_store();
        let admin = store.seed_default_admin("hash").unwrap().unwrap();
        store.soft_delete_user(admin.id).unwrap();

        let reseeded = store.seed_default_admin("hash").unwrap().unwrap();
        assert_ne!(reseeded.id, admin.id);
        assert_eq!(reseeded.role, UserRole::Admin);
    }

    #[test]
    fn test_create_and_retrieve_user() {
        let (store, _temp) = create_test_store();

        let user = store.create_user(&new_user("alice", "a@x.com")).unwrap();
        assert_eq!(user.username, "alice");
        assert_eq!(user.role, UserRole::User);

        let by_id = store.get_user_by_id(user.id).unwrap().unwrap();
        assert_eq!(by_id.email, "a@x.com");

        let by_name = store.get_user_by_username("alice").unwrap().unwrap();
        assert_eq!(by_name.id, user.id);

        let by_email = store.get_user_by_email("a@x.com").unwrap().unwrap();
        assert_eq!(by_email.id, user.id);
    }

    #[test]
    fn test_login_lookup_accepts_username_or_email() {
        let (store, _temp) = create_test_store();
        let user = store.create_user(&new_user("bob", "bob@x.com")).unwrap();

        assert_eq!(store.get_user_by_login("bob").unwrap().unwrap().id, user.id);
        assert_eq!(
            store.get_user_by_login("bob@x.com").unwrap().unwrap().id,
            user.id
        );
        assert!(store.get_user_by_login("nobody").unwrap().is_none());
    }

    #[test]
    fn test_duplicate_username_and_email_conflict() {
        let (store, _temp) = create_test_store();
        store.create_user(&new_user("alice", "a@x.com")).unwrap();

        let dup_name = store.create_user(&new_user("alice", "other@x.com"));
        assert!(matches!(
            dup_name,
            Err(DirectoryError::Conflict(UniqueField::Username))
        ));

        let dup_email = store.create_user(&new_user("alice2", "a@x.com"));
        assert!(matches!(
            dup_email,
            Err(DirectoryError::Conflict(UniqueField::Email))
        ));
    }

    #[test]
    fn test_soft_delete_hides_user_and_frees_names() {
        let (store, _temp) = create_test_store();
        let user = store.create_user(&new_user("tempuser", "t@x.com")).unwrap();

        store.soft_delete_user(user.id).unwrap();

        assert!(store.get_user_by_id(user.id).unwrap().is_none());
        assert!(store.get_user_by_username("tempuser").unwrap().is_none());

        // Tombstone row is kept
        let tombstones: i64 = store
            .open()
            .unwrap()
            .query_row(
                "SELECT COUNT(*) FROM users WHERE id = ?1 AND deleted_at IS NOT NULL",
                params![user.id],
                |row| row.get(0),
            )
            .unwrap();
        assert_eq!(tombstones, 1);

        // Deleting twice is a not-found
        assert!(matches!(
            store.soft_delete_user(user.id),
            Err(DirectoryError::NotFound)
        ));

        // Username and email are reusable
        let again = store.create_user(&new_user("tempuser", "t@x.com")).unwrap();
        assert_ne!(again.id, user.id);
    }

    #[test]
    fn test_update_user_fields() {
        let (store, _temp) = create_test_store();
        let user = store.create_user(&new_user("carol", "c@x.com")).unwrap();

        let updated = store
            .update_user(
                user.id,
                &UserChanges {
                    email: Some("carol@x.com".to_string()),
                    role: Some(UserRole::Admin),
                    is_active: Some(false),
                    ..Default::default()
                },
            )
            .unwrap();

        assert_eq!(updated.email, "carol@x.com");
        assert_eq!(updated.role, UserRole::Admin);
        assert!(!updated.is_active);
        assert_eq!(updated.password_hash, "hash");

        let stored = store.get_user_by_id(user.id).unwrap().unwrap();
        assert_eq!(stored.email, "carol@x.com");
        assert_eq!(stored.role, UserRole::Admin);
        assert!(!stored.is_active);
    }

    #[test]
    fn test_update_email_conflict_and_missing_user() {
        let (store, _temp) = create_test_store();
        store.create_user(&new_user("dave", "d@x.com")).unwrap();
        let erin = store.create_user(&new_user("erin", "e@x.com")).unwrap();

        let clash = store.update_user(
            erin.id,
            &UserChanges {
                email: Some("d@x.com".to_string()),
                ..Default::default()
            },
        );
        assert!(matches!(
            clash,
            Err(DirectoryError::Conflict(UniqueField::Email))
        ));

        // Keeping one's own email is not a conflict
        assert!(store
            .update_user(
                erin.id,
                &UserChanges {
                    email: Some("e@x.com".to_string()),
                    ..Default::default()
                },
            )
            .is_ok());

        assert!(matches!(
            store.update_user(9999, &UserChanges::default()),
            Err(DirectoryError::NotFound)
        ));
    }

    #[test]
    fn test_list_users_pages_and_skips_deleted() {
        let (store, _temp) = create_test_store();
        for i in 0..5 {
            store
                .create_user(&new_user(&format!("user{i}"), &format!("u{i}@x.com")))
                .unwrap();
        }
        let gone = store.get_user_by_username("user0").unwrap().unwrap();
        store.soft_delete_user(gone.id).unwrap();

        let (page, total) = store.list_users(0, 2).unwrap();
        assert_eq!(total, 4);
        assert_eq!(page.len(), 2);
        assert_eq!(page[0].username, "user1");

        let (tail, _) = store.list_users(2, 10).unwrap();
        assert_eq!(tail.len(), 2);
        assert_eq!(tail[1].username, "user4");
    }

    #[tokio::test]
    async fn test_async_directory_view() {
        let (store, _temp) = create_test_store();
        let directory: &dyn UserDirectory = &store;

        let user = directory.create(new_user("frank", "f@x.com")).await.unwrap();
        assert_eq!(
            directory.find_by_login("f@x.com").await.unwrap().unwrap().id,
            user.id
        );

        directory.soft_delete(user.id).await.unwrap();
        assert!(directory.find_by_id(user.id).await.unwrap().is_none());
    }
}
