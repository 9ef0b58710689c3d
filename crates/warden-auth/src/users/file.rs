//! File-backed credential store.

use super::password::{hash_password, is_phc_hash};
use super::{MemoryUserStore, NewUser, User, UserStore, UserUpdate};
use crate::error::{AuthResult, StoreError};
use crate::persist;
use parking_lot::Mutex;
use std::path::{Path, PathBuf};
use warden_common_log::spans::store_span;
use tracing::{error, info, warn};

const COLLECTION: &str = "users";

/// Memory store that rewrites its file after every mutation.
///
/// A [`StoreError`](crate::error::StoreError) from a mutating call means the
/// change is live in memory but not on disk. One process per file.
#[derive(Debug)]
pub struct FileUserStore {
    memory: MemoryUserStore,
    path: PathBuf,
    persist_lock: Mutex<()>,
}

impl FileUserStore {
    /// Open (or create) the store at `path`.
    ///
    /// Plaintext passwords from legacy files are hashed and written back.
    pub fn open(path: impl Into<PathBuf>) -> AuthResult<Self> {
        let path = path.into();
        let mut users: Vec<User> = persist::load_records(&path, COLLECTION)?;

        let mut migrated = 0;
        for user in &mut users {
            let plain = match user.password_hash.as_deref() {
                Some(p) if !is_phc_hash(p) => p.to_string(),
                _ => continue,
            };
            user.password_hash = Some(hash_password(&plain)?);
            migrated += 1;
        }

        let store = Self {
            memory: MemoryUserStore::from_users(users)?,
            path,
            persist_lock: Mutex::new(()),
        };

        if migrated > 0 {
            warn!(count = migrated, path = %store.path.display(), "Hashed plaintext passwords from legacy user file");
            store.persist()?;
        }

        info!(
            path = %store.path.display(),
            users = store.memory.list_users().len(),
            "User store loaded"
        );
        Ok(store)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn persist(&self) -> Result<(), StoreError> {
        let _span = store_span("file_users", "persist").entered();
        let _guard = self.persist_lock.lock();
        let users = self.memory.list_users();
        persist::save_records(&self.path, COLLECTION, &users).map_err(|e| {
            error!(path = %self.path.display(), error = %e, "Failed to persist user store");
            e
        })
    }
}

impl UserStore for FileUserStore {
    fn get_user_by_api_key(&self, api_key: &str) -> AuthResult<User> {
        self.memory.get_user_by_api_key(api_key)
    }

    fn get_user_by_credentials(&self, username: &str, password: &str) -> AuthResult<User> {
        self.memory.get_user_by_credentials(username, password)
    }

    fn get_user(&self, username: &str) -> AuthResult<User> {
        self.memory.get_user(username)
    }

    fn add_user(&self, user: NewUser) -> AuthResult<User> {
        let user = self.memory.add_user(user)?;
        self.persist()?;
        Ok(user)
    }

    fn update_user(&self, username: &str, update: UserUpdate) -> AuthResult<User> {
        let user = self.memory.update_user(username, update)?;
        self.persist()?;
        Ok(user)
    }

    fn delete_user(&self, username: &str) -> AuthResult<()> {
        self.memory.delete_user(username)?;
        self.persist()?;
        Ok(())
    }

    fn list_users(&self) -> Vec<User> {
        self.memory.list_users()
    }
}
