//! In-memory repository used by middleware and handler tests.

use async_trait::async_trait;
use chrono::Utc;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicI64, Ordering};
use std::sync::Mutex;

use super::{NewUser, RepositoryError, User, UserRepository, ROLE_USER};

#[derive(Default)]
pub struct MockUserRepository {
    users: Mutex<HashMap<i64, User>>,
    // username -> (password, user id)
    credentials: Mutex<HashMap<String, (String, i64)>>,
    // (provider, account id) -> user id
    oauth: Mutex<HashMap<(String, String), i64>>,
    next_id: AtomicI64,
    fail: AtomicBool,
}

impl MockUserRepository {
    #[must_use]
    pub fn new() -> Self {
        Self {
            next_id: AtomicI64::new(1),
            ..Self::default()
        }
    }

    pub fn add_user(&self, username: &str, role: &str, password: &str) -> User {
        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        let user = User {
            id,
            username: username.to_string(),
            email: format!("{username}@example.com"),
            role: role.to_string(),
            created: Utc::now(),
        };
        self.users.lock().expect("lock").insert(id, user.clone());
        self.credentials
            .lock()
            .expect("lock")
            .insert(username.to_string(), (password.to_string(), id));
        user
    }

    pub fn remove_user(&self, id: i64) {
        self.users.lock().expect("lock").remove(&id);
    }

    /// Make every call fail with an infrastructure error.
    pub fn fail_lookups(&self) {
        self.fail.store(true, Ordering::SeqCst);
    }

    fn check_fail(&self) -> Result<(), RepositoryError> {
        if self.fail.load(Ordering::SeqCst) {
            return Err(RepositoryError::Database(sqlx::Error::PoolClosed));
        }
        Ok(())
    }
}

#[async_trait]
impl UserRepository for MockUserRepository {
    async fn get_by_id(&self, id: i64) -> Result<User, RepositoryError> {
        self.check_fail()?;
        self.users
            .lock()
            .expect("lock")
            .get(&id)
            .cloned()
            .ok_or(RepositoryError::NotFound)
    }

    async fn get_by_credentials(
        &self,
        username: &str,
        password: &str,
    ) -> Result<User, RepositoryError> {
        self.check_fail()?;
        let (stored, id) = self
            .credentials
            .lock()
            .expect("lock")
            .get(username)
            .cloned()
            .ok_or(RepositoryError::NotFound)?;
        if stored != password {
            return Err(RepositoryError::InvalidCredentials);
        }
        self.get_by_id(id).await
    }

    async fn insert(&self, user: NewUser) -> Result<i64, RepositoryError> {
        self.check_fail()?;
        if self
            .credentials
            .lock()
            .expect("lock")
            .contains_key(&user.username)
        {
            return Err(RepositoryError::Conflict("username"));
        }
        let created = self.add_user(&user.username, ROLE_USER, &user.password);
        Ok(created.id)
    }

    async fn find_oauth(
        &self,
        provider: &str,
        account_id: &str,
    ) -> Result<User, RepositoryError> {
        self.check_fail()?;
        let id = self
            .oauth
            .lock()
            .expect("lock")
            .get(&(provider.to_string(), account_id.to_string()))
            .copied()
            .ok_or(RepositoryError::NotFound)?;
        self.get_by_id(id).await
    }

    async fn link_oauth(
        &self,
        user_id: i64,
        provider: &str,
        account_id: &str,
    ) -> Result<(), RepositoryError> {
        self.check_fail()?;
        self.oauth
            .lock()
            .expect("lock")
            .insert((provider.to_string(), account_id.to_string()), user_id);
        Ok(())
    }
}
