use std::path::PathBuf;
use std::sync::Arc;

use crate::backend::{backend_pool, BackendPool, CredentialStore};
use crate::config::ServerConfig;
use crate::error::ServerResult;

/// Process-wide state shared by the dispatcher and every worker
pub struct ServerContext {
    pub doc_root: PathBuf,
    pub backend: BackendPool,
}

impl ServerContext {
    pub fn new(doc_root: PathBuf, backend: BackendPool) -> Self {
        Self { doc_root, backend }
    }

    /// Open the credential store and bootstrap the backend pool
    pub fn from_config(config: &ServerConfig) -> ServerResult<Self> {
        let store = match &config.users_file {
            Some(path) => CredentialStore::open(path)?,
            None => CredentialStore::in_memory(),
        };
        let backend = backend_pool(config.backend_pool_size, Arc::new(store))?;
        Ok(Self::new(config.doc_root.clone(), backend))
    }
}
