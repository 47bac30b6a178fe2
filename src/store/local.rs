//! File-backed store: `users.json` and `analyses.json` in one data directory.
//!
//! Each write rewrites the whole document. Read-modify-write cycles are
//! serialized through one mutex per backend, and documents are replaced by
//! rename so readers never observe a partial file. Two processes sharing a
//! directory are still not coordinated.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::Mutex;
use tracing::{debug, warn};
use uuid::Uuid;

use super::{sort_newest_first, StorageBackend, StoreError};
use crate::models::{AnalysisRecord, UserCredential};

pub const USERS_FILE: &str = "users.json";
pub const ANALYSES_FILE: &str = "analyses.json";

#[derive(Debug, Default, Serialize, Deserialize)]
struct UsersDocument {
    #[serde(default)]
    users: BTreeMap<String, String>,
}

/// Entries stay raw JSON so that rewriting the document never drops an
/// entry this version cannot decode.
#[derive(Debug, Default, Serialize, Deserialize)]
struct AnalysesDocument {
    #[serde(default)]
    analyses: Vec<Value>,
}

impl AnalysesDocument {
    /// Decodes every entry, skipping and logging the ones that do not parse.
    fn records(&self, path: &Path) -> Vec<AnalysisRecord> {
        self.analyses
            .iter()
            .enumerate()
            .filter_map(|(index, entry)| match AnalysisRecord::deserialize(entry) {
                Ok(record) => Some(record),
                Err(err) => {
                    warn!(path = %path.display(), index, error = %err, "skipping unreadable analysis");
                    None
                }
            })
            .collect()
    }
}

pub struct LocalFileBackend {
    dir: PathBuf,
    lock: Mutex<()>,
}

impl LocalFileBackend {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self {
            dir: dir.into(),
            lock: Mutex::new(()),
        }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn users_path(&self) -> PathBuf {
        self.dir.join(USERS_FILE)
    }

    fn analyses_path(&self) -> PathBuf {
        self.dir.join(ANALYSES_FILE)
    }

    async fn load_document(&self) -> Result<AnalysesDocument, StoreError> {
        read_document(&self.analyses_path()).await
    }

    async fn load_analyses(&self) -> Result<Vec<AnalysisRecord>, StoreError> {
        Ok(self.load_document().await?.records(&self.analyses_path()))
    }

    async fn load_users(&self) -> Result<BTreeMap<String, String>, StoreError> {
        let doc: UsersDocument = read_document(&self.users_path()).await?;
        Ok(doc.users)
    }

    async fn newest_first<F>(&self, limit: usize, keep: F) -> Result<Vec<AnalysisRecord>, StoreError>
    where
        F: Fn(&AnalysisRecord) -> bool,
    {
        let _guard = self.lock.lock().await;
        let mut records: Vec<AnalysisRecord> = self
            .load_analyses()
            .await?
            .into_iter()
            .filter(|r| keep(r))
            .collect();
        sort_newest_first(&mut records);
        records.truncate(limit);
        Ok(records)
    }
}

impl StorageBackend for LocalFileBackend {
    fn name(&self) -> &'static str {
        "local"
    }

    async fn insert_analysis(&self, record: &AnalysisRecord) -> Result<AnalysisRecord, StoreError> {
        let _guard = self.lock.lock().await;
        let path = self.analyses_path();
        let mut doc = self.load_document().await?;
        if doc.records(&path).iter().any(|existing| existing.id == record.id) {
            return Err(StoreError::Conflict(record.id));
        }
        let entry = serde_json::to_value(record).map_err(|source| StoreError::Json {
            path: path.clone(),
            source,
        })?;
        doc.analyses.push(entry);
        write_document(&path, &doc).await?;
        debug!(id = %record.id, dir = %self.dir.display(), "analysis written to local store");
        Ok(record.clone())
    }

    async fn analysis_by_id(&self, id: Uuid) -> Result<Option<AnalysisRecord>, StoreError> {
        let _guard = self.lock.lock().await;
        Ok(self.load_analyses().await?.into_iter().find(|r| r.id == id))
    }

    async fn analyses_for_user(
        &self,
        email: &str,
        limit: usize,
    ) -> Result<Vec<AnalysisRecord>, StoreError> {
        self.newest_first(limit, |r| r.user_email == email).await
    }

    async fn all_analyses(&self, limit: usize) -> Result<Vec<AnalysisRecord>, StoreError> {
        self.newest_first(limit, |_| true).await
    }

    async fn clear_analyses(&self) -> Result<u64, StoreError> {
        let _guard = self.lock.lock().await;
        let removed = self.load_document().await?.analyses.len() as u64;
        remove_document(&self.analyses_path()).await?;
        Ok(removed)
    }

    async fn insert_user(&self, user: &UserCredential) -> Result<bool, StoreError> {
        let _guard = self.lock.lock().await;
        let mut users = self.load_users().await?;
        if users.contains_key(&user.email) {
            return Ok(false);
        }
        users.insert(user.email.clone(), user.password_hash.clone());
        write_document(&self.users_path(), &UsersDocument { users }).await?;
        Ok(true)
    }

    async fn password_hash(&self, email: &str) -> Result<Option<String>, StoreError> {
        let _guard = self.lock.lock().await;
        Ok(self.load_users().await?.remove(email))
    }

    async fn users(&self) -> Result<Vec<UserCredential>, StoreError> {
        let _guard = self.lock.lock().await;
        Ok(self
            .load_users()
            .await?
            .into_iter()
            .map(|(email, password_hash)| UserCredential {
                email,
                password_hash,
            })
            .collect())
    }

    async fn clear_users(&self) -> Result<u64, StoreError> {
        let _guard = self.lock.lock().await;
        let removed = self.load_users().await?.len() as u64;
        remove_document(&self.users_path()).await?;
        Ok(removed)
    }
}

/// A missing document reads as the empty document.
async fn read_document<T>(path: &Path) -> Result<T, StoreError>
where
    T: DeserializeOwned + Default,
{
    let bytes = match tokio::fs::read(path).await {
        Ok(bytes) => bytes,
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(T::default()),
        Err(source) => {
            return Err(StoreError::Io {
                path: path.to_path_buf(),
                source,
            })
        }
    };
    serde_json::from_slice(&bytes).map_err(|source| StoreError::Json {
        path: path.to_path_buf(),
        source,
    })
}

async fn write_document<T: Serialize>(path: &Path, document: &T) -> Result<(), StoreError> {
    let io_err = |source| StoreError::Io {
        path: path.to_path_buf(),
        source,
    };

    if let Some(parent) = path.parent() {
        tokio::fs::create_dir_all(parent).await.map_err(io_err)?;
    }
    let payload = serde_json::to_vec_pretty(document).map_err(|source| StoreError::Json {
        path: path.to_path_buf(),
        source,
    })?;

    let staging = path.with_extension("json.tmp");
    tokio::fs::write(&staging, payload).await.map_err(io_err)?;
    tokio::fs::rename(&staging, path).await.map_err(io_err)?;
    Ok(())
}

async fn remove_document(path: &Path) -> Result<(), StoreError> {
    match tokio::fs::remove_file(path).await {
        Ok(()) => Ok(()),
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(source) => Err(StoreError::Io {
            path: path.to_path_buf(),
            source,
        }),
    }
}
