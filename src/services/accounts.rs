// User account gateway and credential validation
// The account store is an external collaborator: the core sees only this
// interface. Unknown user and wrong password are indistinguishable to the
// caller; account-state gates surface their specific error.

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;
use thiserror::Error;
use tracing::debug;

use crate::db::DieselPool;
use crate::models::user::{User, UserError, UserStatus};
use crate::utils::password::PasswordHasher;

#[derive(Error, Debug)]
pub enum GatewayError {
    #[error("connection pool error: {0}")]
    Pool(String),

    #[error("account store error: {0}")]
    Store(String),
}

/// Read-side access to user accounts.
#[async_trait]
pub trait UserAccountGateway: Send + Sync {
    /// Case-insensitive lookup by username OR email.
    async fn find_by_username_or_email(
        &self,
        identifier: &str,
    ) -> Result<Option<User>, GatewayError>;
}

/// Production gateway over the Postgres user store.
pub struct DieselUserAccountGateway {
    pool: DieselPool,
}

impl DieselUserAccountGateway {
    pub fn new(pool: DieselPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl UserAccountGateway for DieselUserAccountGateway {
    async fn find_by_username_or_email(
        &self,
        identifier: &str,
    ) -> Result<Option<User>, GatewayError> {
        let mut conn = self
            .pool
            .get()
            .await
            .map_err(|e| GatewayError::Pool(e.to_string()))?;

        match User::find_by_username_or_email(&mut conn, identifier).await {
            Ok(user) => Ok(Some(user)),
            Err(UserError::NotFound) => Ok(None),
            Err(e) => Err(GatewayError::Store(e.to_string())),
        }
    }
}

/// In-memory gateway for test profiles.
pub struct InMemoryUserAccountGateway {
    users: std::sync::Mutex<HashMap<String, User>>,
}

impl InMemoryUserAccountGateway {
    pub fn new() -> Self {
        Self {
            users: std::sync::Mutex::new(HashMap::new()),
        }
    }

    pub fn insert(&self, user: User) {
        let mut users = self.users.lock().expect("gateway lock");
        users.insert(user.username.to_lowercase(), user);
    }

    pub fn set_status(&self, username: &str, status: UserStatus) {
        let mut users = self.users.lock().expect("gateway lock");
        if let Some(user) = users.get_mut(&username.to_lowercase()) {
            user.status = status;
        }
    }
}

impl Default for InMemoryUserAccountGateway {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl UserAccountGateway for InMemoryUserAccountGateway {
    async fn find_by_username_or_email(
        &self,
        identifier: &str,
    ) -> Result<Option<User>, GatewayError> {
        let needle = identifier.trim().to_lowercase();
        let users = self.users.lock().expect("gateway lock");

        Ok(users
            .values()
            .find(|user| user.username == needle || user.email == needle)
            .cloned())
    }
}

// =============================================================================
// AUTHENTICATION VALIDATOR
// =============================================================================

#[derive(Error, Debug)]
pub enum AuthenticationError {
    #[error("invalid credentials")]
    InvalidCredentials,

    #[error("account locked")]
    UserLocked,

    #[error("account disabled")]
    UserDisabled,

    #[error("account deleted")]
    UserDeleted,

    #[error(transparent)]
    Gateway(#[from] GatewayError),
}

/// Password check plus account-state gates.
pub struct AuthenticationValidator {
    gateway: Arc<dyn UserAccountGateway>,
    hasher: Arc<dyn PasswordHasher>,
}

impl AuthenticationValidator {
    pub fn new(gateway: Arc<dyn UserAccountGateway>, hasher: Arc<dyn PasswordHasher>) -> Self {
        Self { gateway, hasher }
    }

    pub async fn validate(
        &self,
        username_or_email: &str,
        password: &str,
    ) -> Result<User, AuthenticationError> {
        let user = match self
            .gateway
            .find_by_username_or_email(username_or_email)
            .await?
        {
            Some(user) => user,
            // Same error as a wrong password: no user enumeration
            None => return Err(AuthenticationError::InvalidCredentials),
        };

        match user.status {
            UserStatus::Active => {},
            UserStatus::Locked => return Err(AuthenticationError::UserLocked),
            UserStatus::Disabled => return Err(AuthenticationError::UserDisabled),
            UserStatus::Deleted => return Err(AuthenticationError::UserDeleted),
        }

        if !self.hasher.matches(password, &user.password_hash) {
            debug!(username = %user.username, "password mismatch");
            return Err(AuthenticationError::InvalidCredentials);
        }

        Ok(user)
    }
}
