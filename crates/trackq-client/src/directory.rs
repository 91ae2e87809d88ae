//! TTL-cached directory snapshots (users, projects, field metadata).
//!
//! A snapshot is built wholesale and never mutated; refresh swaps in a new
//! `Arc`. Readers holding the previous `Arc` keep a consistent view.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{Mutex, RwLock};
use tokio::time::Instant;
use tracing::{debug, info, warn};

use trackq_core::config::DirectorySettings;
use trackq_core::{DirectoryUser, FieldMeta, ProjectInfo, Result, TrackerApi};

struct Entry<T> {
    snapshot: Arc<T>,
    loaded_at: Instant,
    invalidated: bool,
}

/// A single value refreshed at most once per TTL.
pub struct DirectoryCache<T> {
    ttl: Duration,
    entry: RwLock<Option<Entry<T>>>,
    refresh: Mutex<()>,
}

impl<T> DirectoryCache<T> {
    pub fn new(ttl: Duration) -> Self {
        Self {
            ttl,
            entry: RwLock::new(None),
            refresh: Mutex::new(()),
        }
    }

    async fn fresh(&self) -> Option<Arc<T>> {
        let entry = self.entry.read().await;
        entry
            .as_ref()
            .filter(|e| !e.invalidated && e.loaded_at.elapsed() < self.ttl)
            .map(|e| Arc::clone(&e.snapshot))
    }

    /// Return the cached snapshot, loading a new one if it expired.
    ///
    /// Concurrent callers share one refresh. When the load fails and an
    /// older snapshot exists, the older snapshot is returned.
    pub async fn get_or_refresh<F, Fut>(&self, load: F) -> Result<Arc<T>>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        if let Some(snapshot) = self.fresh().await {
            return Ok(snapshot);
        }

        let _guard = self.refresh.lock().await;
        if let Some(snapshot) = self.fresh().await {
            return Ok(snapshot);
        }

        match load().await {
            Ok(value) => {
                let snapshot = Arc::new(value);
                *self.entry.write().await = Some(Entry {
                    snapshot: Arc::clone(&snapshot),
                    loaded_at: Instant::now(),
                    invalidated: false,
                });
                Ok(snapshot)
            }
            Err(e) => {
                let entry = self.entry.read().await;
                match entry.as_ref() {
                    Some(stale) => {
                        warn!(error = %e, "Directory refresh failed, serving previous snapshot");
                        Ok(Arc::clone(&stale.snapshot))
                    }
                    None => Err(e),
                }
            }
        }
    }

    /// Force the next read to reload. The old snapshot stays as a fallback.
    pub async fn invalidate(&self) {
        if let Some(entry) = self.entry.write().await.as_mut() {
            entry.invalidated = true;
        }
    }

    /// Current snapshot regardless of age.
    pub async fn current(&self) -> Option<Arc<T>> {
        self.entry
            .read()
            .await
            .as_ref()
            .map(|e| Arc::clone(&e.snapshot))
    }
}

/// Everything the resolver and extractor need from the tracker.
#[derive(Debug, Clone, Default)]
pub struct DirectorySnapshot {
    pub users: Vec<DirectoryUser>,
    pub projects: Vec<ProjectInfo>,
    pub fields: Vec<FieldMeta>,
}

impl DirectorySnapshot {
    /// Project keys, for recognizing bare keys in queries.
    pub fn project_keys(&self) -> impl Iterator<Item = &str> {
        self.projects.iter().map(|p| p.key.as_str())
    }

    pub fn user_by_id(&self, account_id: &str) -> Option<&DirectoryUser> {
        self.users.iter().find(|u| u.account_id == account_id)
    }

    pub fn project_by_key(&self, key: &str) -> Option<&ProjectInfo> {
        self.projects
            .iter()
            .find(|p| p.key.eq_ignore_ascii_case(key))
    }
}

/// Process-wide directory shared by every session.
pub struct Directory {
    tracker: Arc<dyn TrackerApi>,
    cache: DirectoryCache<DirectorySnapshot>,
}

impl Directory {
    pub fn new(tracker: Arc<dyn TrackerApi>, settings: &DirectorySettings) -> Self {
        Self {
            tracker,
            cache: DirectoryCache::new(Duration::from_secs(settings.ttl_secs)),
        }
    }

    /// Current snapshot, refreshed when older than the TTL.
    pub async fn snapshot(&self) -> Result<Arc<DirectorySnapshot>> {
        let tracker = Arc::clone(&self.tracker);
        self.cache
            .get_or_refresh(|| async move { load_snapshot(tracker.as_ref()).await })
            .await
    }

    pub async fn invalidate(&self) {
        debug!("Directory invalidated");
        self.cache.invalidate().await;
    }
}

async fn load_snapshot(tracker: &dyn TrackerApi) -> Result<DirectorySnapshot> {
    let start = Instant::now();
    let (users, projects, fields) = tokio::join!(
        tracker.search_users(""),
        tracker.list_projects(),
        tracker.list_fields()
    );

    // Field metadata only enriches records; the directory works without it.
    let fields = fields.unwrap_or_else(|e| {
        warn!(error = %e, "Field metadata unavailable");
        Vec::new()
    });

    let snapshot = DirectorySnapshot {
        users: users?,
        projects: projects?,
        fields,
    };
    info!(
        users = snapshot.users.len(),
        projects = snapshot.projects.len(),
        fields = snapshot.fields.len(),
        duration_ms = start.elapsed().as_millis() as u64,
        "Directory snapshot loaded"
    );
    Ok(snapshot)
}
