//! User accounts and the identity source for login.

use std::path::Path;

use argon2::{
    Argon2,
    password_hash::{PasswordHash, PasswordHasher, PasswordVerifier, SaltString, rand_core::OsRng},
};
use chrono::{DateTime, Utc};
use keygate_core::{PermissionCatalog, PermissionId};
use rand::Rng;
use rand::distributions::Alphanumeric;
use serde::{Deserialize, Serialize};

use super::AuthError;

const EMAIL_INDEX: &str = "idx:email:";

/// A verified identity, ready to be turned into a token.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Identity {
    /// User ID.
    pub user_id: String,
    /// Email.
    pub email: String,
    /// Role name.
    pub role: String,
    /// Permissions granted by the role.
    pub permission_ids: Vec<PermissionId>,
}

/// User account.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct User {
    /// Unique user ID.
    pub id: String,
    /// Login email, stored lowercase.
    pub email: String,
    /// Argon2 password hash.
    pub password_hash: String,
    /// Role name from the catalog.
    pub role: String,
    /// When the user was created.
    pub created_at: DateTime<Utc>,
    /// When the user last logged in.
    pub last_login: Option<DateTime<Utc>>,
    /// Whether the account may log in.
    pub active: bool,
}

impl User {
    /// Create a new user.
    ///
    /// # Errors
    ///
    /// Returns error if the email or role is empty or hashing fails.
    pub fn new(email: &str, password: &str, role: impl Into<String>) -> Result<Self, AuthError> {
        let email = normalize_email(email);
        let role = role.into();
        if email.is_empty() || !email.contains('@') {
            return Err(AuthError::BadRequest(format!("Invalid email: {email}")));
        }
        if role.is_empty() {
            return Err(AuthError::BadRequest("Role is empty".to_string()));
        }

        Ok(Self {
            id: format!("usr_{:032x}", rand::random::<u128>()),
            email,
            password_hash: hash_password(password)?,
            role,
            created_at: Utc::now(),
            last_login: None,
            active: true,
        })
    }

    /// Verify a password against this user's hash.
    ///
    /// # Errors
    ///
    /// Returns `InvalidCredentials` if the password does not match.
    pub fn verify_password(&self, password: &str) -> Result<(), AuthError> {
        verify_password(password, &self.password_hash)
    }

    /// Replace the password.
    ///
    /// # Errors
    ///
    /// Returns error if hashing fails.
    pub fn set_password(&mut self, password: &str) -> Result<(), AuthError> {
        self.password_hash = hash_password(password)?;
        Ok(())
    }

    /// Safe view for API responses and listings.
    #[must_use]
    pub fn to_public(&self) -> PublicUser {
        PublicUser {
            id: self.id.clone(),
            email: self.email.clone(),
            role: self.role.clone(),
            created_at: self.created_at,
            last_login: self.last_login,
            active: self.active,
        }
    }
}

/// User without the password hash.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PublicUser {
    /// Unique user ID.
    pub id: String,
    /// Email.
    pub email: String,
    /// Role name.
    pub role: String,
    /// When created.
    pub created_at: DateTime<Utc>,
    /// Last login time.
    pub last_login: Option<DateTime<Utc>>,
    /// Whether active.
    pub active: bool,
}

/// User store backed by sled.
pub struct UserStore {
    tree: sled::Tree,
}

impl std::fmt::Debug for UserStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("UserStore").field("users", &self.count()).finish()
    }
}

impl UserStore {
    /// Open or create the store under `data_dir/users`.
    ///
    /// # Errors
    ///
    /// Returns error if the database cannot be opened.
    pub fn open(data_dir: &Path) -> Result<Self, AuthError> {
        let db = sled::open(data_dir.join("users"))
            .map_err(|e| AuthError::Storage(format!("Failed to open user database: {e}")))?;
        Self::with_db(&db)
    }

    /// Use the `users` tree of an existing database.
    ///
    /// # Errors
    ///
    /// Returns error if the tree cannot be opened.
    pub fn with_db(db: &sled::Db) -> Result<Self, AuthError> {
        let tree = db
            .open_tree("users")
            .map_err(|e| AuthError::Storage(format!("Failed to open users tree: {e}")))?;
        Ok(Self { tree })
    }

    /// Whether no users exist.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.tree.is_empty()
    }

    /// Number of users.
    #[must_use]
    pub fn count(&self) -> usize {
        self.tree
            .iter()
            .keys()
            .filter(|k| k.as_ref().is_ok_and(|k| !k.starts_with(b"idx:")))
            .count()
    }

    /// Insert a new user.
    ///
    /// # Errors
    ///
    /// Returns `UserExists` if the email is taken.
    pub fn create(&self, user: &User) -> Result<(), AuthError> {
        if self.get_by_email(&user.email)?.is_some() {
            return Err(AuthError::UserExists(user.email.clone()));
        }

        self.put(user)?;
        let index_key = format!("{EMAIL_INDEX}{}", user.email);
        self.tree
            .insert(index_key.as_bytes(), user.id.as_bytes())
            .map_err(|e| AuthError::Storage(format!("Index error: {e}")))?;
        self.flush()?;

        tracing::info!(user_id = %user.id, email = %user.email, role = %user.role, "Created user");
        Ok(())
    }

    /// Get a user by ID.
    ///
    /// # Errors
    ///
    /// Returns error if storage fails.
    pub fn get(&self, id: &str) -> Result<Option<User>, AuthError> {
        self.tree
            .get(id.as_bytes())
            .map_err(|e| AuthError::Storage(format!("Get error: {e}")))?
            .map(|value| {
                serde_json::from_slice(&value)
                    .map_err(|e| AuthError::Storage(format!("Deserialization error: {e}")))
            })
            .transpose()
    }

    /// Get a user by email (case-insensitive).
    ///
    /// # Errors
    ///
    /// Returns error if storage fails.
    pub fn get_by_email(&self, email: &str) -> Result<Option<User>, AuthError> {
        let index_key = format!("{EMAIL_INDEX}{}", normalize_email(email));
        match self.tree.get(index_key.as_bytes()) {
            Ok(Some(id)) => self.get(&String::from_utf8_lossy(&id)),
            Ok(None) => Ok(None),
            Err(e) => Err(AuthError::Storage(format!("Index lookup error: {e}"))),
        }
    }

    /// Overwrite an existing user.
    ///
    /// # Errors
    ///
    /// Returns `UserNotFound` if the user does not exist.
    pub fn update(&self, user: &User) -> Result<(), AuthError> {
        if self.get(&user.id)?.is_none() {
            return Err(AuthError::UserNotFound(user.id.clone()));
        }
        self.put(user)?;
        self.flush()
    }

    /// Enable or disable the account behind `email`.
    ///
    /// # Errors
    ///
    /// Returns `UserNotFound` if no user has that email.
    pub fn set_active(&self, email: &str, active: bool) -> Result<User, AuthError> {
        let mut user = self
            .get_by_email(email)?
            .ok_or_else(|| AuthError::UserNotFound(email.to_string()))?;
        user.active = active;
        self.update(&user)?;
        tracing::info!(user_id = %user.id, active, "Updated account state");
        Ok(user)
    }

    /// Delete the user behind `email`.
    ///
    /// # Errors
    ///
    /// Returns error if storage fails.
    pub fn delete(&self, email: &str) -> Result<bool, AuthError> {
        let Some(user) = self.get_by_email(email)? else {
            return Ok(false);
        };
        let index_key = format!("{EMAIL_INDEX}{}", user.email);
        self.tree
            .remove(index_key.as_bytes())
            .map_err(|e| AuthError::Storage(format!("Index remove error: {e}")))?;
        self.tree
            .remove(user.id.as_bytes())
            .map_err(|e| AuthError::Storage(format!("Delete error: {e}")))?;
        self.flush()?;
        Ok(true)
    }

    /// All users, ordered by ID.
    ///
    /// # Errors
    ///
    /// Returns error if storage fails.
    pub fn list(&self) -> Result<Vec<User>, AuthError> {
        let mut users = Vec::new();
        for entry in self.tree.iter() {
            let (key, value) = entry.map_err(|e| AuthError::Storage(format!("Iter error: {e}")))?;
            if key.starts_with(b"idx:") {
                continue;
            }
            users.push(
                serde_json::from_slice(&value)
                    .map_err(|e| AuthError::Storage(format!("Deserialization error: {e}")))?,
            );
        }
        Ok(users)
    }

    /// Record a successful login.
    ///
    /// # Errors
    ///
    /// Returns `UserNotFound` if the user does not exist.
    pub fn update_last_login(&self, id: &str) -> Result<(), AuthError> {
        let mut user = self
            .get(id)?
            .ok_or_else(|| AuthError::UserNotFound(id.to_string()))?;
        user.last_login = Some(Utc::now());
        self.update(&user)
    }

    /// Verify credentials and resolve the role's grants.
    ///
    /// Unknown emails and wrong passwords both yield `InvalidCredentials`.
    ///
    /// # Errors
    ///
    /// Returns `InvalidCredentials`, `AccountDisabled`, or a catalog error
    /// if the user's role no longer exists.
    pub fn authenticate(
        &self,
        email: &str,
        password: &str,
        catalog: &PermissionCatalog,
    ) -> Result<Identity, AuthError> {
        let user = self
            .get_by_email(email)?
            .ok_or(AuthError::InvalidCredentials)?;
        user.verify_password(password)?;
        if !user.active {
            return Err(AuthError::AccountDisabled);
        }

        let permission_ids = catalog.grants_for(&user.role)?.to_vec();
        Ok(Identity {
            user_id: user.id,
            email: user.email,
            role: user.role,
            permission_ids,
        })
    }

    fn put(&self, user: &User) -> Result<(), AuthError> {
        let value = serde_json::to_vec(user)
            .map_err(|e| AuthError::Storage(format!("Serialization error: {e}")))?;
        self.tree
            .insert(user.id.as_bytes(), value)
            .map_err(|e| AuthError::Storage(format!("Insert error: {e}")))?;
        Ok(())
    }

    fn flush(&self) -> Result<(), AuthError> {
        self.tree
            .flush()
            .map(|_| ())
            .map_err(|e| AuthError::Storage(format!("Flush error: {e}")))
    }
}

/// Generate a random alphanumeric password.
#[must_use]
pub fn generate_password(len: usize) -> String {
    rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .take(len)
        .map(char::from)
        .collect()
}

fn normalize_email(email: &str) -> String {
    email.trim().to_lowercase()
}

fn hash_password(password: &str) -> Result<String, AuthError> {
    if password.is_empty() {
        return Err(AuthError::BadRequest("Password is empty".to_string()));
    }
    let salt = SaltString::generate(&mut OsRng);
    Argon2::default()
        .hash_password(password.as_bytes(), &salt)
        .map(|h| h.to_string())
        .map_err(|e| AuthError::Storage(format!("Password hashing failed: {e}")))
}

fn verify_password(password: &str, hash: &str) -> Result<(), AuthError> {
    let parsed =
        PasswordHash::new(hash).map_err(|e| AuthError::Storage(format!("Invalid hash: {e}")))?;
    Argon2::default()
        .verify_password(password.as_bytes(), &parsed)
        .map_err(|_| AuthError::InvalidCredentials)
}

#[cfg(test)]
mod tests {
    use super::*;
    use keygate_core::perm;
    use pretty_assertions::assert_eq;
    use tempfile::TempDir;

    fn store() -> (TempDir, UserStore) {
        let dir = TempDir::new().unwrap();
        let store = UserStore::open(dir.path()).unwrap();
        (dir, store)
    }

    #[test]
    fn test_user_creation() {
        let user = User::new(" Alice@Example.com ", "password123", "admin").unwrap();
        assert_eq!(user.email, "alice@example.com");
        assert!(user.id.starts_with("usr_"));
        assert!(user.active);
        assert!(User::new("no-at-sign", "pw", "admin").is_err());
        assert!(User::new("a@x.io", "", "admin").is_err());
    }

    #[test]
    fn test_password_verification() {
        let mut user = User::new("a@x.io", "password123", "user").unwrap();
        user.verify_password("password123").unwrap();
        assert!(matches!(
            user.verify_password("wrong"),
            Err(AuthError::InvalidCredentials)
        ));
        user.set_password("changed").unwrap();
        user.verify_password("changed").unwrap();
    }

    #[test]
    fn test_store_crud() {
        let (_dir, store) = store();
        assert!(store.is_empty());

        let user = User::new("a@x.io", "secret", "admin").unwrap();
        store.create(&user).unwrap();
        assert_eq!(store.count(), 1);
        assert_eq!(store.get_by_email("A@X.IO").unwrap().unwrap().id, user.id);
        assert_eq!(store.list().unwrap().len(), 1);

        let disabled = store.set_active("a@x.io", false).unwrap();
        assert!(!disabled.active);
        assert!(!store.get(&user.id).unwrap().unwrap().active);

        assert!(store.delete("a@x.io").unwrap());
        assert!(!store.delete("a@x.io").unwrap());
        assert!(store.is_empty());
    }

    #[test]
    fn test_duplicate_email() {
        let (_dir, store) = store();
        store
            .create(&User::new("a@x.io", "one", "admin").unwrap())
            .unwrap();
        let result = store.create(&User::new("A@x.io", "two", "user").unwrap());
        assert!(matches!(result, Err(AuthError::UserExists(_))));
    }

    #[test]
    fn test_authenticate() {
        let (_dir, store) = store();
        let catalog = PermissionCatalog::builtin();
        let user = User::new("u@x.io", "pw", "user").unwrap();
        store.create(&user).unwrap();

        let identity = store.authenticate("u@x.io", "pw", &catalog).unwrap();
        assert_eq!(identity.user_id, user.id);
        assert_eq!(identity.role, "user");
        assert_eq!(
            identity.permission_ids,
            vec![perm::PROFILE_READ, perm::PROFILE_UPDATE, perm::UPLOAD_CREATE]
        );

        assert!(matches!(
            store.authenticate("u@x.io", "bad", &catalog),
            Err(AuthError::InvalidCredentials)
        ));
        assert!(matches!(
            store.authenticate("nobody@x.io", "pw", &catalog),
            Err(AuthError::InvalidCredentials)
        ));

        store.set_active("u@x.io", false).unwrap();
        assert!(matches!(
            store.authenticate("u@x.io", "pw", &catalog),
            Err(AuthError::AccountDisabled)
        ));
    }

    #[test]
    fn test_unknown_role_is_catalog_error() {
        let (_dir, store) = store();
        store
            .create(&User::new("g@x.io", "pw", "ghost").unwrap())
            .unwrap();
        assert!(matches!(
            store.authenticate("g@x.io", "pw", &PermissionCatalog::builtin()),
            Err(AuthError::Catalog(_))
        ));
    }

    #[test]
    fn test_generate_password() {
        let pw = generate_password(24);
        assert_eq!(pw.len(), 24);
        assert!(pw.chars().all(|c| c.is_ascii_alphanumeric()));
    }
}
