//! Credential backend behind the resource pool
//!
//! The server only ever talks to the backend through a pooled
//! [`BackendHandle`]; the handles share one [`CredentialStore`], loaded from
//! a `user:password` line file and appended to on registration.

use parking_lot::{Mutex, RwLock};
use std::collections::HashMap;
use std::fs::{File, OpenOptions};
use std::io::{BufRead, BufReader, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use crate::core::ResourcePool;
use crate::error::{BackendError, ServerResult};

/// Shared user table
pub struct CredentialStore {
    users: RwLock<HashMap<String, String>>,
    journal: Option<Mutex<File>>,
    path: Option<PathBuf>,
}

impl CredentialStore {
    /// Volatile store, nothing is persisted
    pub fn in_memory() -> Self {
        Self {
            users: RwLock::new(HashMap::new()),
            journal: None,
            path: None,
        }
    }

    /// Open (or create) the credential file and load every record.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self, BackendError> {
        let path = path.as_ref();
        let file = OpenOptions::new()
            .read(true)
            .append(true)
            .create(true)
            .open(path)?;

        let mut users = HashMap::new();
        for (lineno, line) in BufReader::new(&file).lines().enumerate() {
            let line = line?;
            let line = line.trim();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }
            let (user, password) = line.split_once(':').ok_or_else(|| {
                BackendError::MalformedRecord(format!("{}:{}", path.display(), lineno + 1))
            })?;
            // last record wins, same as a table update
            users.insert(user.to_string(), password.to_string());
        }

        tracing::info!(path = %path.display(), users = users.len(), "credential store loaded");

        Ok(Self {
            users: RwLock::new(users),
            journal: Some(Mutex::new(file)),
            path: Some(path.to_path_buf()),
        })
    }

    pub fn with_users<I, U, P>(users: I) -> Self
    where
        I: IntoIterator<Item = (U, P)>,
        U: Into<String>,
        P: Into<String>,
    {
        let store = Self::in_memory();
        {
            let mut table = store.users.write();
            for (user, password) in users {
                table.insert(user.into(), password.into());
            }
        }
        store
    }

    pub fn verify(&self, user: &str, password: &str) -> bool {
        self.users
            .read()
            .get(user)
            .map_or(false, |stored| stored == password)
    }

    pub fn register(&self, user: &str, password: &str) -> Result<(), BackendError> {
        if user.is_empty() || user.contains(':') || user.contains('\n') {
            return Err(BackendError::MalformedRecord(user.to_string()));
        }

        let mut users = self.users.write();
        if users.contains_key(user) {
            return Err(BackendError::DuplicateUser(user.to_string()));
        }
        if let Some(journal) = &self.journal {
            let mut file = journal.lock();
            writeln!(file, "{user}:{password}")?;
            file.flush()?;
        }
        users.insert(user.to_string(), password.to_string());
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.users.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.users.read().is_empty()
    }

    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }
}

/// One pooled backend connection
pub struct BackendHandle {
    id: usize,
    store: Arc<CredentialStore>,
}

impl BackendHandle {
    pub fn new(id: usize, store: Arc<CredentialStore>) -> Self {
        Self { id, store }
    }

    pub fn id(&self) -> usize {
        self.id
    }

    pub fn verify(&self, user: &str, password: &str) -> bool {
        self.store.verify(user, password)
    }

    pub fn register(&self, user: &str, password: &str) -> Result<(), BackendError> {
        self.store.register(user, password)
    }
}

pub type BackendPool = ResourcePool<BackendHandle>;

/// Build the process-wide backend pool over `store`
pub fn backend_pool(size: usize, store: Arc<CredentialStore>) -> ServerResult<BackendPool> {
    ResourcePool::bootstrap(size, |id| {
        Ok::<_, BackendError>(BackendHandle::new(id, Arc::clone(&store)))
    })
}
