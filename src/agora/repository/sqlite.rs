//! SQLite-backed user repository.

use argon2::{
    password_hash::{rand_core::OsRng, PasswordHash, SaltString},
    Argon2, PasswordHasher, PasswordVerifier,
};
use async_trait::async_trait;
use sqlx::{Row, SqlitePool};
use tracing::instrument;

use super::{NewUser, RepositoryError, User, UserRepository, ROLE_USER};

const SCHEMA: &str = r"
CREATE TABLE IF NOT EXISTS users (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    username TEXT NOT NULL UNIQUE,
    email TEXT NOT NULL UNIQUE,
    password_hash TEXT NOT NULL,
    role TEXT NOT NULL DEFAULT 'user',
    created DATETIME NOT NULL DEFAULT CURRENT_TIMESTAMP
);

CREATE TABLE IF NOT EXISTS users_oauth (
    user_id INTEGER NOT NULL REFERENCES users (id) ON DELETE CASCADE,
    provider TEXT NOT NULL,
    account_id TEXT NOT NULL,
    UNIQUE (provider, account_id)
);
";

#[derive(Clone)]
pub struct SqliteUserRepository {
    pool: SqlitePool,
}

impl SqliteUserRepository {
    #[must_use]
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Create the tables the repository needs.
    ///
    /// # Errors
    /// Returns an error if the schema statements fail to execute.
    pub async fn migrate(&self) -> Result<(), RepositoryError> {
        sqlx::raw_sql(SCHEMA).execute(&self.pool).await?;
        Ok(())
    }
}

fn row_to_user(row: &sqlx::sqlite::SqliteRow) -> Result<User, sqlx::Error> {
    Ok(User {
        id: row.try_get("id")?,
        username: row.try_get("username")?,
        email: row.try_get("email")?,
        role: row.try_get("role")?,
        created: row.try_get("created")?,
    })
}

fn conflict_field(err: &sqlx::Error) -> Option<&'static str> {
    let db_err = err.as_database_error()?;
    if !db_err.is_unique_violation() {
        return None;
    }
    if db_err.message().contains(".username") {
        Some("username")
    } else if db_err.message().contains(".email") {
        Some("email")
    } else {
        Some("account")
    }
}

fn hash_password(password: &str) -> Result<String, RepositoryError> {
    let salt = SaltString::generate(&mut OsRng);
    Argon2::default()
        .hash_password(password.as_bytes(), &salt)
        .map(|hash| hash.to_string())
        .map_err(|err| RepositoryError::PasswordHash(err.to_string()))
}

fn verify_password(password: &str, stored: &str) -> Result<(), RepositoryError> {
    let parsed =
        PasswordHash::new(stored).map_err(|err| RepositoryError::PasswordHash(err.to_string()))?;
    Argon2::default()
        .verify_password(password.as_bytes(), &parsed)
        .map_err(|_| RepositoryError::InvalidCredentials)
}

#[async_trait]
impl UserRepository for SqliteUserRepository {
    #[instrument(skip(self))]
    async fn get_by_id(&self, id: i64) -> Result<User, RepositoryError> {
        let row = sqlx::query("SELECT id, username, email, role, created FROM users WHERE id = ?1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;

        let row = row.ok_or(RepositoryError::NotFound)?;
        Ok(row_to_user(&row)?)
    }

    #[instrument(skip(self, password))]
    async fn get_by_credentials(
        &self,
        username: &str,
        password: &str,
    ) -> Result<User, RepositoryError> {
        let row = sqlx::query(
            "SELECT id, username, email, role, created, password_hash FROM users WHERE username = ?1",
        )
        .bind(username)
        .fetch_optional(&self.pool)
        .await?;

        let row = row.ok_or(RepositoryError::NotFound)?;
        let stored: String = row.try_get("password_hash").map_err(RepositoryError::from)?;
        verify_password(password, &stored)?;
        Ok(row_to_user(&row)?)
    }

    #[instrument(skip(self, user))]
    async fn insert(&self, user: NewUser) -> Result<i64, RepositoryError> {
        let password_hash = hash_password(&user.password)?;

        let result = sqlx::query(
            "INSERT INTO users (username, email, password_hash, role) VALUES (?1, ?2, ?3, ?4)",
        )
        .bind(&user.username)
        .bind(&user.email)
        .bind(&password_hash)
        .bind(ROLE_USER)
        .execute(&self.pool)
        .await;

        match result {
            Ok(done) => Ok(done.last_insert_rowid()),
            Err(err) => match conflict_field(&err) {
                Some(field) => Err(RepositoryError::Conflict(field)),
                None => Err(err.into()),
            },
        }
    }

    #[instrument(skip(self))]
    async fn find_oauth(
        &self,
        provider: &str,
        account_id: &str,
    ) -> Result<User, RepositoryError> {
        let row = sqlx::query(
            "SELECT u.id, u.username, u.email, u.role, u.created
             FROM users u
             JOIN users_oauth o ON o.user_id = u.id
             WHERE o.provider = ?1 AND o.account_id = ?2",
        )
        .bind(provider)
        .bind(account_id)
        .fetch_optional(&self.pool)
        .await?;

        let row = row.ok_or(RepositoryError::NotFound)?;
        Ok(row_to_user(&row)?)
    }

    #[instrument(skip(self))]
    async fn link_oauth(
        &self,
        user_id: i64,
        provider: &str,
        account_id: &str,
    ) -> Result<(), RepositoryError> {
        let result =
            sqlx::query("INSERT INTO users_oauth (user_id, provider, account_id) VALUES (?1, ?2, ?3)")
                .bind(user_id)
                .bind(provider)
                .bind(account_id)
                .execute(&self.pool)
                .await;

        match result {
            Ok(_) => Ok(()),
            Err(err) => match conflict_field(&err) {
                Some(_) => Err(RepositoryError::Conflict("account")),
                None => Err(err.into()),
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::Result;
    use sqlx::sqlite::SqlitePoolOptions;

    // In-memory SQLite gives every connection its own database; pin the pool
    // to one connection so the schema stays visible.
    async fn repository() -> Result<SqliteUserRepository> {
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await?;
        let repository = SqliteUserRepository::new(pool);
        repository.migrate().await?;
        Ok(repository)
    }

    fn new_user(username: &str, email: &str) -> NewUser {
        NewUser {
            username: username.to_string(),
            email: email.to_string(),
            password: "correct horse battery staple".to_string(),
        }
    }

    #[tokio::test]
    async fn insert_and_get_by_id() -> Result<()> {
        let repository = repository().await?;
        let id = repository.insert(new_user("alice", "alice@example.com")).await?;

        let user = repository.get_by_id(id).await?;
        assert_eq!(user.username, "alice");
        assert_eq!(user.email, "alice@example.com");
        assert_eq!(user.role, ROLE_USER);
        Ok(())
    }

    #[tokio::test]
    async fn get_by_id_missing_is_not_found() -> Result<()> {
        let repository = repository().await?;
        assert!(matches!(
            repository.get_by_id(99).await,
            Err(RepositoryError::NotFound)
        ));
        Ok(())
    }

    #[tokio::test]
    async fn credentials_round_trip() -> Result<()> {
        let repository = repository().await?;
        let id = repository.insert(new_user("bob", "bob@example.com")).await?;

        let user = repository
            .get_by_credentials("bob", "correct horse battery staple")
            .await?;
        assert_eq!(user.id, id);
        Ok(())
    }

    #[tokio::test]
    async fn wrong_password_is_rejected() -> Result<()> {
        let repository = repository().await?;
        repository.insert(new_user("bob", "bob@example.com")).await?;

        assert!(matches!(
            repository.get_by_credentials("bob", "wrong").await,
            Err(RepositoryError::InvalidCredentials)
        ));
        assert!(matches!(
            repository.get_by_credentials("nobody", "wrong").await,
            Err(RepositoryError::NotFound)
        ));
        Ok(())
    }

    #[tokio::test]
    async fn duplicate_username_conflicts() -> Result<()> {
        let repository = repository().await?;
        repository.insert(new_user("carol", "carol@example.com")).await?;

        let err = repository
            .insert(new_user("carol", "other@example.com"))
            .await
            .expect_err("duplicate username must conflict");
        assert!(matches!(err, RepositoryError::Conflict("username")));

        let err = repository
            .insert(new_user("other", "carol@example.com"))
            .await
            .expect_err("duplicate email must conflict");
        assert!(matches!(err, RepositoryError::Conflict("email")));
        Ok(())
    }

    #[tokio::test]
    async fn oauth_link_and_find() -> Result<()> {
        let repository = repository().await?;
        let id = repository.insert(new_user("dave", "dave@example.com")).await?;

        repository.link_oauth(id, "github", "12345").await?;
        let user = repository.find_oauth("github", "12345").await?;
        assert_eq!(user.id, id);

        assert!(matches!(
            repository.find_oauth("github", "absent").await,
            Err(RepositoryError::NotFound)
        ));
        assert!(matches!(
            repository.link_oauth(id, "github", "12345").await,
            Err(RepositoryError::Conflict("account"))
        ));
        Ok(())
    }
}
