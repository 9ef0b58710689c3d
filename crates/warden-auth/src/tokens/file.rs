//! File-backed token store.

use super::{MemoryTokenStore, Token, TokenStore};
use crate::error::{AuthResult, StoreError};
use crate::persist;
use async_trait::async_trait;
use parking_lot::Mutex;
use std::path::{Path, PathBuf};
use warden_common_log::spans::store_span;
use tracing::{error, info};

const COLLECTION: &str = "tokens";

/// Memory store that rewrites its file after every mutation.
///
/// Errors from mutating calls mean "applied in memory, not durable".
#[derive(Debug)]
pub struct FileTokenStore {
    memory: MemoryTokenStore,
    path: PathBuf,
    persist_lock: Mutex<()>,
}

impl FileTokenStore {
    pub fn open(path: impl Into<PathBuf>) -> AuthResult<Self> {
        let path = path.into();
        let tokens: Vec<Token> = persist::load_records(&path, COLLECTION)?;
        let memory = MemoryTokenStore::from_tokens(tokens);

        info!(path = %path.display(), tokens = memory.len(), "Token store loaded");
        Ok(Self {
            memory,
            path,
            persist_lock: Mutex::new(()),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn persist(&self) -> Result<(), StoreError> {
        let _span = store_span("file_tokens", "persist").entered();
        let _guard = self.persist_lock.lock();
        let tokens = self.memory.snapshot();
        persist::save_records(&self.path, COLLECTION, &tokens).map_err(|e| {
            error!(path = %self.path.display(), error = %e, "Failed to persist token store");
            e
        })
    }
}

#[async_trait]
impl TokenStore for FileTokenStore {
    async fn store_token(&self, token: Token) -> AuthResult<()> {
        self.memory.store_sync(token)?;
        Ok(self.persist()?)
    }

    async fn get_token(&self, value: &str) -> AuthResult<Token> {
        self.memory.get_sync(value)
    }

    async fn get_tokens_by_user_id(&self, user_id: &str) -> AuthResult<Vec<Token>> {
        Ok(self.memory.by_user_sync(user_id))
    }

    async fn revoke_token(&self, value: &str) -> AuthResult<()> {
        self.memory.revoke_sync(value)?;
        Ok(self.persist()?)
    }

    async fn revoke_all_user_tokens(&self, user_id: &str) -> AuthResult<usize> {
        let revoked = self.memory.revoke_user_sync(user_id);
        if revoked > 0 {
            self.persist()?;
        }
        Ok(revoked)
    }

    async fn cleanup_expired_tokens(&self) -> AuthResult<usize> {
        let removed = self.memory.cleanup_sync();
        if removed > 0 {
            self.persist()?;
        }
        Ok(removed)
    }
}
