//! Persistence for analyses and user credentials.
//!
//! Every backend implements [`StorageBackend`]. [`FallbackStore`] composes a
//! remote backend with a local one and is itself a backend, so the rest of
//! the crate never knows which of the two served a call.

pub mod local;
pub mod remote;

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use thiserror::Error;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::models::{AnalysisDraft, AnalysisRecord, UserCredential};

pub use local::LocalFileBackend;
pub use remote::RemoteBackend;

pub const DEFAULT_USER_LIMIT: usize = 50;
pub const DEFAULT_ADMIN_LIMIT: usize = 200;
pub const MAX_SEVERITY: u8 = 3;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("remote store is not configured")]
    NotConfigured,

    #[error("remote store timed out after {0:?}")]
    Timeout(Duration),

    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("schema migration failed: {0}")]
    Migrate(#[from] sqlx::migrate::MigrateError),

    #[error("I/O error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("malformed store document {path}: {source}")]
    Json {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("invalid stored row: {0}")]
    InvalidRow(String),

    #[error("analysis {0} already exists")]
    Conflict(Uuid),

    #[error("analysis {0} not found")]
    NotFound(Uuid),

    #[error("severity {0} is outside 0..=3")]
    InvalidSeverity(u8),

    #[error("removed {local_removed} local entries but the remote purge failed: {source}")]
    PartialPurge {
        local_removed: u64,
        #[source]
        source: Box<StoreError>,
    },
}

impl StoreError {
    pub fn is_conflict(&self) -> bool {
        matches!(self, StoreError::Conflict(_))
    }

    /// Errors describing the row itself rather than the backend. These are
    /// returned to the caller, never retried on another backend.
    pub fn is_data_error(&self) -> bool {
        match self {
            StoreError::Conflict(_) | StoreError::InvalidRow(_) | StoreError::InvalidSeverity(_) => {
                true
            }
            StoreError::Database(sqlx::Error::Database(db)) => {
                !matches!(db.kind(), sqlx::error::ErrorKind::Other)
            }
            _ => false,
        }
    }
}

/// Raw persistence operations shared by every backend.
///
/// List operations return records newest first (by `created_at`), with ties
/// kept in insertion order, truncated to `limit`.
#[allow(async_fn_in_trait)]
pub trait StorageBackend {
    /// Short name used in log events.
    fn name(&self) -> &'static str;

    async fn insert_analysis(&self, record: &AnalysisRecord) -> Result<AnalysisRecord, StoreError>;

    async fn analysis_by_id(&self, id: Uuid) -> Result<Option<AnalysisRecord>, StoreError>;

    async fn analyses_for_user(
        &self,
        email: &str,
        limit: usize,
    ) -> Result<Vec<AnalysisRecord>, StoreError>;

    async fn all_analyses(&self, limit: usize) -> Result<Vec<AnalysisRecord>, StoreError>;

    /// Deletes every analysis, returning how many were removed.
    async fn clear_analyses(&self) -> Result<u64, StoreError>;

    /// Returns `false` without touching the stored hash when the email exists.
    async fn insert_user(&self, user: &UserCredential) -> Result<bool, StoreError>;

    async fn password_hash(&self, email: &str) -> Result<Option<String>, StoreError>;

    async fn users(&self) -> Result<Vec<UserCredential>, StoreError>;

    async fn clear_users(&self) -> Result<u64, StoreError>;
}

impl<B: StorageBackend> StorageBackend for Arc<B> {
    fn name(&self) -> &'static str {
        (**self).name()
    }

    async fn insert_analysis(&self, record: &AnalysisRecord) -> Result<AnalysisRecord, StoreError> {
        (**self).insert_analysis(record).await
    }

    async fn analysis_by_id(&self, id: Uuid) -> Result<Option<AnalysisRecord>, StoreError> {
        (**self).analysis_by_id(id).await
    }

    async fn analyses_for_user(
        &self,
        email: &str,
        limit: usize,
    ) -> Result<Vec<AnalysisRecord>, StoreError> {
        (**self).analyses_for_user(email, limit).await
    }

    async fn all_analyses(&self, limit: usize) -> Result<Vec<AnalysisRecord>, StoreError> {
        (**self).all_analyses(limit).await
    }

    async fn clear_analyses(&self) -> Result<u64, StoreError> {
        (**self).clear_analyses().await
    }

    async fn insert_user(&self, user: &UserCredential) -> Result<bool, StoreError> {
        (**self).insert_user(user).await
    }

    async fn password_hash(&self, email: &str) -> Result<Option<String>, StoreError> {
        (**self).password_hash(email).await
    }

    async fn users(&self) -> Result<Vec<UserCredential>, StoreError> {
        (**self).users().await
    }

    async fn clear_users(&self) -> Result<u64, StoreError> {
        (**self).clear_users().await
    }
}

/// Tries the remote backend first and silently falls back to the local one.
///
/// Every remote call is bounded by `timeout`; expiry counts as a failure. An
/// empty remote slot (no configuration) routes every call to the local
/// backend.
pub struct FallbackStore<R, L> {
    remote: Option<R>,
    local: L,
    timeout: Duration,
}

impl<R: StorageBackend, L: StorageBackend> FallbackStore<R, L> {
    pub fn new(remote: Option<R>, local: L, timeout: Duration) -> Self {
        Self {
            remote,
            local,
            timeout,
        }
    }

    pub fn has_remote(&self) -> bool {
        self.remote.is_some()
    }

    pub fn local(&self) -> &L {
        &self.local
    }

    async fn bounded<T, F>(&self, call: F) -> Result<T, StoreError>
    where
        F: std::future::Future<Output = Result<T, StoreError>>,
    {
        match tokio::time::timeout(self.timeout, call).await {
            Ok(result) => result,
            Err(_) => Err(StoreError::Timeout(self.timeout)),
        }
    }

    async fn attempt<T, F>(&self, operation: &'static str, call: F) -> Option<Result<T, StoreError>>
    where
        F: std::future::Future<Output = Result<T, StoreError>>,
    {
        let remote = self.remote.as_ref()?;
        match self.bounded(call).await {
            Ok(value) => Some(Ok(value)),
            Err(err) if err.is_data_error() => Some(Err(err)),
            Err(err) => {
                warn!(
                    backend = remote.name(),
                    operation,
                    error = %err,
                    "remote store failed, falling back to local store"
                );
                None
            }
        }
    }
}

impl<R: StorageBackend, L: StorageBackend> StorageBackend for FallbackStore<R, L> {
    fn name(&self) -> &'static str {
        "fallback"
    }

    async fn insert_analysis(&self, record: &AnalysisRecord) -> Result<AnalysisRecord, StoreError> {
        if let Some(remote) = &self.remote {
            if let Some(result) = self
                .attempt("insert_analysis", remote.insert_analysis(record))
                .await
            {
                return result;
            }
        }
        self.local.insert_analysis(record).await
    }

    async fn analysis_by_id(&self, id: Uuid) -> Result<Option<AnalysisRecord>, StoreError> {
        if let Some(remote) = &self.remote {
            if let Some(result) = self.attempt("analysis_by_id", remote.analysis_by_id(id)).await {
                return result;
            }
        }
        self.local.analysis_by_id(id).await
    }

    async fn analyses_for_user(
        &self,
        email: &str,
        limit: usize,
    ) -> Result<Vec<AnalysisRecord>, StoreError> {
        if let Some(remote) = &self.remote {
            if let Some(result) = self
                .attempt("analyses_for_user", remote.analyses_for_user(email, limit))
                .await
            {
                return result;
            }
        }
        self.local.analyses_for_user(email, limit).await
    }

    async fn all_analyses(&self, limit: usize) -> Result<Vec<AnalysisRecord>, StoreError> {
        if let Some(remote) = &self.remote {
            if let Some(result) = self.attempt("all_analyses", remote.all_analyses(limit)).await {
                return result;
            }
        }
        self.local.all_analyses(limit).await
    }

    /// Purges both backends. The local purge runs even when the remote one
    /// fails, and the failure is then reported as [`StoreError::PartialPurge`].
    async fn clear_analyses(&self) -> Result<u64, StoreError> {
        let remote = match &self.remote {
            Some(remote) => Some(self.bounded(remote.clear_analyses()).await),
            None => None,
        };
        let local_removed = self.local.clear_analyses().await?;
        finish_purge("clear_analyses", remote, local_removed)
    }

    async fn insert_user(&self, user: &UserCredential) -> Result<bool, StoreError> {
        if let Some(remote) = &self.remote {
            if let Some(result) = self.attempt("insert_user", remote.insert_user(user)).await {
                return result;
            }
        }
        self.local.insert_user(user).await
    }

    async fn password_hash(&self, email: &str) -> Result<Option<String>, StoreError> {
        if let Some(remote) = &self.remote {
            if let Some(result) = self.attempt("password_hash", remote.password_hash(email)).await {
                return result;
            }
        }
        self.local.password_hash(email).await
    }

    async fn users(&self) -> Result<Vec<UserCredential>, StoreError> {
        if let Some(remote) = &self.remote {
            if let Some(result) = self.attempt("users", remote.users()).await {
                return result;
            }
        }
        self.local.users().await
    }

    async fn clear_users(&self) -> Result<u64, StoreError> {
        let remote = match &self.remote {
            Some(remote) => Some(self.bounded(remote.clear_users()).await),
            None => None,
        };
        let local_removed = self.local.clear_users().await?;
        finish_purge("clear_users", remote, local_removed)
    }
}

fn finish_purge(
    operation: &'static str,
    remote: Option<Result<u64, StoreError>>,
    local_removed: u64,
) -> Result<u64, StoreError> {
    match remote {
        None => Ok(local_removed),
        Some(Ok(remote_removed)) => Ok(remote_removed + local_removed),
        Some(Err(err)) => {
            warn!(operation, error = %err, local_removed, "remote purge failed");
            Err(StoreError::PartialPurge {
                local_removed,
                source: Box::new(err),
            })
        }
    }
}

/// Narrowing applied to admin listings after retrieval.
#[derive(Debug, Clone, Default)]
pub struct AnalysisFilter {
    /// Case-insensitive substring of the patient email.
    pub email_contains: Option<String>,
    pub diagnosis: Option<String>,
    pub severity: Option<u8>,
}

impl AnalysisFilter {
    pub fn matches(&self, record: &AnalysisRecord) -> bool {
        if let Some(needle) = &self.email_contains {
            if !record
                .user_email
                .to_lowercase()
                .contains(&needle.to_lowercase())
            {
                return false;
            }
        }
        if let Some(diagnosis) = &self.diagnosis {
            if &record.diagnosis != diagnosis {
                return false;
            }
        }
        if let Some(severity) = self.severity {
            if record.severity != severity {
                return false;
            }
        }
        true
    }

    pub fn apply(&self, records: Vec<AnalysisRecord>) -> Vec<AnalysisRecord> {
        records.into_iter().filter(|r| self.matches(r)).collect()
    }
}

/// Analysis persistence. Owns id and timestamp assignment.
pub struct AnalysisStore<B> {
    backend: B,
}

impl<B: StorageBackend> AnalysisStore<B> {
    pub fn new(backend: B) -> Self {
        Self { backend }
    }

    pub fn backend(&self) -> &B {
        &self.backend
    }

    /// Stores a new row. Each call creates a distinct row; ids are assigned
    /// here when the draft carries none.
    pub async fn save(&self, draft: AnalysisDraft) -> Result<AnalysisRecord, StoreError> {
        if draft.severity > MAX_SEVERITY {
            return Err(StoreError::InvalidSeverity(draft.severity));
        }
        let record = draft.into_record(Utc::now());
        debug!(id = %record.id, user = %record.user_email, "saving analysis");
        self.backend.insert_analysis(&record).await
    }

    pub async fn get_by_id(&self, id: Uuid) -> Result<Option<AnalysisRecord>, StoreError> {
        self.backend.analysis_by_id(id).await
    }

    pub async fn require(&self, id: Uuid) -> Result<AnalysisRecord, StoreError> {
        self.get_by_id(id).await?.ok_or(StoreError::NotFound(id))
    }

    pub async fn list_by_user(
        &self,
        email: &str,
        limit: usize,
    ) -> Result<Vec<AnalysisRecord>, StoreError> {
        self.backend.analyses_for_user(email, limit).await
    }

    pub async fn list_all(&self, limit: usize) -> Result<Vec<AnalysisRecord>, StoreError> {
        self.backend.all_analyses(limit).await
    }

    pub async fn purge(&self) -> Result<u64, StoreError> {
        self.backend.clear_analyses().await
    }
}

/// Stable sort, newest first. Records with equal timestamps keep the order
/// they were inserted in.
pub(crate) fn sort_newest_first(records: &mut [AnalysisRecord]) {
    records.sort_by(|a, b| b.created_at.cmp(&a.created_at));
}

#[cfg(test)]
pub(crate) mod testing {
    use std::fmt;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use sqlx::error::{DatabaseError, ErrorKind};

    use super::*;

    /// A backend whose every call fails the way an unreachable remote would.
    #[derive(Default)]
    pub struct UnreachableBackend {
        pub calls: AtomicUsize,
    }

    impl UnreachableBackend {
        fn fail<T>(&self) -> Result<T, StoreError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Err(StoreError::Database(sqlx::Error::PoolTimedOut))
        }
    }

    impl StorageBackend for UnreachableBackend {
        fn name(&self) -> &'static str {
            "unreachable"
        }

        async fn insert_analysis(&self, _: &AnalysisRecord) -> Result<AnalysisRecord, StoreError> {
            self.fail()
        }

        async fn analysis_by_id(&self, _: Uuid) -> Result<Option<AnalysisRecord>, StoreError> {
            self.fail()
        }

        async fn analyses_for_user(
            &self,
            _: &str,
            _: usize,
        ) -> Result<Vec<AnalysisRecord>, StoreError> {
            self.fail()
        }

        async fn all_analyses(&self, _: usize) -> Result<Vec<AnalysisRecord>, StoreError> {
            self.fail()
        }

        async fn clear_analyses(&self) -> Result<u64, StoreError> {
            self.fail()
        }

        async fn insert_user(&self, _: &UserCredential) -> Result<bool, StoreError> {
            self.fail()
        }

        async fn password_hash(&self, _: &str) -> Result<Option<String>, StoreError> {
            self.fail()
        }

        async fn users(&self) -> Result<Vec<UserCredential>, StoreError> {
            self.fail()
        }

        async fn clear_users(&self) -> Result<u64, StoreError> {
            self.fail()
        }
    }

    /// A Postgres-style check constraint failure.
    #[derive(Debug)]
    pub struct CheckViolation;

    impl fmt::Display for CheckViolation {
        fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
            f.write_str(self.message())
        }
    }

    impl std::error::Error for CheckViolation {}

    impl DatabaseError for CheckViolation {
        fn message(&self) -> &str {
            "new row for relation \"analyses\" violates check constraint \"analyses_severity_check\""
        }

        fn as_error(&self) -> &(dyn std::error::Error + Send + Sync + 'static) {
            self
        }

        fn as_error_mut(&mut self) -> &mut (dyn std::error::Error + Send + Sync + 'static) {
            self
        }

        fn into_error(self: Box<Self>) -> Box<dyn std::error::Error + Send + Sync + 'static> {
            self
        }

        fn kind(&self) -> ErrorKind {
            ErrorKind::CheckViolation
        }
    }

    /// Accepts every read but rejects each inserted analysis with `reject()`.
    pub struct RejectingBackend {
        pub reject: fn() -> StoreError,
        pub calls: AtomicUsize,
    }

    impl RejectingBackend {
        pub fn new(reject: fn() -> StoreError) -> Self {
            Self {
                reject,
                calls: AtomicUsize::new(0),
            }
        }
    }

    impl StorageBackend for RejectingBackend {
        fn name(&self) -> &'static str {
            "rejecting"
        }

        async fn insert_analysis(&self, _: &AnalysisRecord) -> Result<AnalysisRecord, StoreError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Err((self.reject)())
        }

        async fn analysis_by_id(&self, _: Uuid) -> Result<Option<AnalysisRecord>, StoreError> {
            Ok(None)
        }

        async fn analyses_for_user(
            &self,
            _: &str,
            _: usize,
        ) -> Result<Vec<AnalysisRecord>, StoreError> {
            Ok(Vec::new())
        }

        async fn all_analyses(&self, _: usize) -> Result<Vec<AnalysisRecord>, StoreError> {
            Ok(Vec::new())
        }

        async fn clear_analyses(&self) -> Result<u64, StoreError> {
            Ok(0)
        }

        async fn insert_user(&self, _: &UserCredential) -> Result<bool, StoreError> {
            Ok(true)
        }

        async fn password_hash(&self, _: &str) -> Result<Option<String>, StoreError> {
            Ok(None)
        }

        async fn users(&self) -> Result<Vec<UserCredential>, StoreError> {
            Ok(Vec::new())
        }

        async fn clear_users(&self) -> Result<u64, StoreError> {
            Ok(0)
        }
    }

    /// A backend that never answers; only a timeout gets the caller out.
    pub struct HangingBackend;

    impl HangingBackend {
        async fn hang<T>(&self) -> Result<T, StoreError> {
            std::future::pending::<()>().await;
            Err(StoreError::NotConfigured)
        }
    }

    impl StorageBackend for HangingBackend {
        fn name(&self) -> &'static str {
            "hanging"
        }

        async fn insert_analysis(&self, _: &AnalysisRecord) -> Result<AnalysisRecord, StoreError> {
            self.hang().await
        }

        async fn analysis_by_id(&self, _: Uuid) -> Result<Option<AnalysisRecord>, StoreError> {
            self.hang().await
        }

        async fn analyses_for_user(
            &self,
            _: &str,
            _: usize,
        ) -> Result<Vec<AnalysisRecord>, StoreError> {
            self.hang().await
        }

        async fn all_analyses(&self, _: usize) -> Result<Vec<AnalysisRecord>, StoreError> {
            self.hang().await
        }

        async fn clear_analyses(&self) -> Result<u64, StoreError> {
            self.hang().await
        }

        async fn insert_user(&self, _: &UserCredential) -> Result<bool, StoreError> {
            self.hang().await
        }

        async fn password_hash(&self, _: &str) -> Result<Option<String>, StoreError> {
            self.hang().await
        }

        async fn users(&self) -> Result<Vec<UserCredential>, StoreError> {
            self.hang().await
        }

        async fn clear_users(&self) -> Result<u64, StoreError> {
            self.hang().await
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::Ordering;

    use chrono::{Duration as ChronoDuration, TimeZone};
    use proptest::prelude::*;

    use super::testing::{CheckViolation, HangingBackend, RejectingBackend, UnreachableBackend};
    use super::*;
    use crate::models::sample_survey;

    fn draft(email: &str) -> AnalysisDraft {
        AnalysisDraft::new(email, sample_survey(), "Normal", 0)
    }

    fn local_in(dir: &tempfile::TempDir) -> LocalFileBackend {
        LocalFileBackend::new(dir.path())
    }

    #[tokio::test]
    async fn save_assigns_identity_once_and_never_upserts() {
        let dir = tempfile::tempdir().unwrap();
        let store = AnalysisStore::new(local_in(&dir));

        let template = draft("pat@example.com");
        let first = store.save(template.clone()).await.unwrap();
        let second = store.save(template).await.unwrap();

        assert_ne!(first.id, second.id);
        assert_eq!(store.list_all(10).await.unwrap().len(), 2);

        let fetched = store.get_by_id(first.id).await.unwrap().unwrap();
        assert_eq!(fetched, first);
    }

    #[tokio::test]
    async fn unknown_id_is_not_found() {
        let dir = tempfile::tempdir().unwrap();
        let store = AnalysisStore::new(local_in(&dir));
        let id = Uuid::new_v4();

        assert!(store.get_by_id(id).await.unwrap().is_none());
        assert!(matches!(store.require(id).await, Err(StoreError::NotFound(missing)) if missing == id));
    }

    #[tokio::test]
    async fn unreachable_remote_falls_back_silently() {
        let dir = tempfile::tempdir().unwrap();
        let remote = Arc::new(UnreachableBackend::default());
        let store = AnalysisStore::new(FallbackStore::new(
            Some(remote.clone()),
            local_in(&dir),
            Duration::from_secs(1),
        ));

        let saved = store.save(draft("pat@example.com")).await.unwrap();
        let listed = store.list_by_user("pat@example.com", 10).await.unwrap();

        assert_eq!(listed, vec![saved.clone()]);
        assert_eq!(store.require(saved.id).await.unwrap(), saved);
        assert_eq!(remote.calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn hanging_remote_times_out_into_local() {
        let dir = tempfile::tempdir().unwrap();
        let store = AnalysisStore::new(FallbackStore::new(
            Some(HangingBackend),
            local_in(&dir),
            Duration::from_millis(20),
        ));

        let saved = store.save(draft("pat@example.com")).await.unwrap();
        assert_eq!(store.list_all(5).await.unwrap(), vec![saved]);
    }

    #[tokio::test]
    async fn missing_remote_goes_straight_to_local() {
        let dir = tempfile::tempdir().unwrap();
        let fallback: FallbackStore<UnreachableBackend, _> =
            FallbackStore::new(None, local_in(&dir), Duration::from_secs(1));
        assert!(!fallback.has_remote());

        let store = AnalysisStore::new(fallback);
        store.save(draft("pat@example.com")).await.unwrap();
        assert_eq!(store.backend().local().all_analyses(10).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn conflicts_are_not_retried_locally() {
        let remote_dir = tempfile::tempdir().unwrap();
        let local_dir = tempfile::tempdir().unwrap();
        let remote = Arc::new(local_in(&remote_dir));
        let fallback = FallbackStore::new(
            Some(remote.clone()),
            local_in(&local_dir),
            Duration::from_secs(1),
        );

        let record = draft("pat@example.com").into_record(Utc::now());
        fallback.insert_analysis(&record).await.unwrap();
        let err = fallback.insert_analysis(&record).await.unwrap_err();

        assert!(err.is_conflict());
        assert!(fallback.local().all_analyses(10).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn severity_above_three_is_rejected_before_storage() {
        let dir = tempfile::tempdir().unwrap();
        let store = AnalysisStore::new(local_in(&dir));

        let err = store
            .save(AnalysisDraft::new("a@x.io", sample_survey(), "Normal", 9))
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::InvalidSeverity(9)));
        assert!(store.list_all(10).await.unwrap().is_empty());

        let highest = AnalysisDraft::new("a@x.io", sample_survey(), "Normal", MAX_SEVERITY);
        assert_eq!(store.save(highest).await.unwrap().severity, 3);
    }

    #[tokio::test]
    async fn rejected_rows_are_not_retried_locally() {
        let rejections: [fn() -> StoreError; 2] = [
            || StoreError::InvalidRow("severity out of range".to_string()),
            || StoreError::Database(sqlx::Error::Database(Box::new(CheckViolation))),
        ];

        for reject in rejections {
            let dir = tempfile::tempdir().unwrap();
            let remote = Arc::new(RejectingBackend::new(reject));
            let fallback =
                FallbackStore::new(Some(remote.clone()), local_in(&dir), Duration::from_secs(1));

            let record = draft("pat@example.com").into_record(Utc::now());
            let err = fallback.insert_analysis(&record).await.unwrap_err();

            assert!(err.is_data_error(), "{err}");
            assert_eq!(remote.calls.load(Ordering::SeqCst), 1);
            assert!(fallback.local().all_analyses(10).await.unwrap().is_empty());
        }
    }

    #[test]
    fn outages_are_not_data_errors() {
        assert!(!StoreError::Database(sqlx::Error::PoolTimedOut).is_data_error());
        assert!(!StoreError::Timeout(Duration::from_secs(1)).is_data_error());
        assert!(StoreError::Conflict(Uuid::new_v4()).is_data_error());
    }

    #[tokio::test]
    async fn purge_clears_local_but_reports_remote_failure() {
        let dir = tempfile::tempdir().unwrap();
        let fallback = Arc::new(FallbackStore::new(
            Some(UnreachableBackend::default()),
            local_in(&dir),
            Duration::from_secs(1),
        ));
        let store = AnalysisStore::new(fallback.clone());
        store.save(draft("a@example.com")).await.unwrap();
        store.save(draft("b@example.com")).await.unwrap();
        fallback
            .local()
            .insert_user(&UserCredential {
                email: "a@example.com".to_string(),
                password_hash: "hash".to_string(),
            })
            .await
            .unwrap();

        let err = store.purge().await.unwrap_err();
        assert!(matches!(err, StoreError::PartialPurge { local_removed: 2, .. }));
        assert!(fallback.local().all_analyses(10).await.unwrap().is_empty());

        let err = fallback.clear_users().await.unwrap_err();
        assert!(matches!(err, StoreError::PartialPurge { local_removed: 1, .. }));
        assert!(fallback.local().users().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn purge_counts_both_backends_when_both_succeed() {
        let remote_dir = tempfile::tempdir().unwrap();
        let local_dir = tempfile::tempdir().unwrap();
        let remote = local_in(&remote_dir);
        remote
            .insert_analysis(&draft("r@example.com").into_record(Utc::now()))
            .await
            .unwrap();
        let fallback = FallbackStore::new(Some(remote), local_in(&local_dir), Duration::from_secs(1));
        fallback
            .local()
            .insert_analysis(&draft("l@example.com").into_record(Utc::now()))
            .await
            .unwrap();

        assert_eq!(fallback.clear_analyses().await.unwrap(), 2);
    }

    #[test]
    fn filter_narrows_by_each_criterion() {
        let now = Utc::now();
        let mut a = draft("Alice@Example.com").into_record(now);
        a.diagnosis = "Needs Review".to_string();
        a.severity = 1;
        let b = draft("bob@example.com").into_record(now);

        let by_email = AnalysisFilter {
            email_contains: Some("alice".to_string()),
            ..Default::default()
        };
        assert_eq!(by_email.apply(vec![a.clone(), b.clone()]), vec![a.clone()]);

        let by_severity = AnalysisFilter {
            severity: Some(0),
            ..Default::default()
        };
        assert_eq!(by_severity.apply(vec![a.clone(), b.clone()]), vec![b.clone()]);

        let by_diagnosis = AnalysisFilter {
            diagnosis: Some("Needs Review".to_string()),
            ..Default::default()
        };
        assert_eq!(by_diagnosis.apply(vec![a.clone(), b]), vec![a]);
    }

    proptest! {
        #[test]
        fn sorting_is_newest_first_and_stable(offsets in proptest::collection::vec(0i64..20, 0..30)) {
            let base = Utc.with_ymd_and_hms(2026, 1, 1, 0, 0, 0).unwrap();
            let inserted: Vec<AnalysisRecord> = offsets
                .iter()
                .map(|minutes| {
                    let mut d = draft("pat@example.com");
                    d.created_at = Some(base + ChronoDuration::minutes(*minutes));
                    d.into_record(base)
                })
                .collect();

            let mut sorted = inserted.clone();
            sort_newest_first(&mut sorted);

            for pair in sorted.windows(2) {
                prop_assert!(pair[0].created_at >= pair[1].created_at);
                if pair[0].created_at == pair[1].created_at {
                    let first = inserted.iter().position(|r| r.id == pair[0].id);
                    let second = inserted.iter().position(|r| r.id == pair[1].id);
                    prop_assert!(first < second);
                }
            }
        }
    }
}
