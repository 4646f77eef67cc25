//! Credential persistence.
//!
//! One `<session_key>.json` file per session.  Writes go to a temp file and
//! are renamed into place, and `load` treats anything that does not parse as
//! JSON as absent, so a torn write is never handed to the delivery step.

use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime};

use async_trait::async_trait;
use sl_domain::error::{Error, Result};
use sl_domain::trace::TraceEvent;

use crate::session_key::SessionKey;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EraseOutcome {
    Erased,
    NotFound,
}

#[async_trait]
pub trait CredentialStore: Send + Sync {
    /// `None` when nothing usable is stored for `key`.
    async fn load(&self, key: &SessionKey) -> Result<Option<Vec<u8>>>;

    async fn save(&self, key: &SessionKey, bytes: &[u8]) -> Result<()>;

    /// Idempotent.
    async fn erase(&self, key: &SessionKey) -> Result<EraseOutcome>;
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// File-backed store
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

pub struct FileCredentialStore {
    dir: PathBuf,
}

impl FileCredentialStore {
    /// Create the store, creating `dir` if needed.
    pub fn new(dir: impl Into<PathBuf>) -> Result<Self> {
        let dir = dir.into();
        std::fs::create_dir_all(&dir).map_err(Error::Io)?;
        tracing::info!(path = %dir.display(), "credential store ready");
        Ok(Self { dir })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn path_for(&self, key: &SessionKey) -> PathBuf {
        self.dir.join(format!("{}.json", key.as_str()))
    }

    /// Delete credential files whose last modification is older than
    /// `max_age`, skipping those that belong to a session in `live`.
    /// Returns the number of files removed.
    pub async fn sweep_stale(
        &self,
        max_age: Duration,
        live: &HashSet<SessionKey>,
    ) -> Result<usize> {
        let live: HashSet<&str> = live.iter().map(SessionKey::as_str).collect();
        let now = SystemTime::now();
        let mut removed = 0;
        let mut entries = tokio::fs::read_dir(&self.dir).await?;
        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) != Some("json") {
                continue;
            }
            if path
                .file_stem()
                .and_then(|s| s.to_str())
                .is_some_and(|stem| live.contains(stem))
            {
                continue;
            }
            let modified = match entry.metadata().await.and_then(|m| m.modified()) {
                Ok(t) => t,
                Err(e) => {
                    tracing::warn!(path = %path.display(), error = %e, "credential metadata unreadable");
                    continue;
                }
            };
            let age = now.duration_since(modified).unwrap_or_default();
            if age < max_age {
                continue;
            }
            match tokio::fs::remove_file(&path).await {
                Ok(()) => removed += 1,
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                Err(e) => {
                    tracing::warn!(path = %path.display(), error = %e, "failed to remove stale credential");
                }
            }
        }

        if removed > 0 {
            TraceEvent::StaleCredentialsSwept {
                removed,
                max_age_secs: max_age.as_secs(),
            }
            .emit();
        }
        Ok(removed)
    }
}

#[async_trait]
impl CredentialStore for FileCredentialStore {
    async fn load(&self, key: &SessionKey) -> Result<Option<Vec<u8>>> {
        let path = self.path_for(key);
        let bytes = match tokio::fs::read(&path).await {
            Ok(b) => b,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(Error::Io(e)),
        };
        if serde_json::from_slice::<serde_json::Value>(&bytes).is_err() {
            tracing::warn!(
                session_key = %key,
                path = %path.display(),
                "credential file is not valid JSON, treating as absent"
            );
            return Ok(None);
        }
        Ok(Some(bytes))
    }

    async fn save(&self, key: &SessionKey, bytes: &[u8]) -> Result<()> {
        let path = self.path_for(key);
        let tmp = path.with_extension("json.tmp");
        tokio::fs::write(&tmp, bytes).await?;
        tokio::fs::rename(&tmp, &path).await?;
        tracing::debug!(session_key = %key, bytes = bytes.len(), "credential saved");
        Ok(())
    }

    async fn erase(&self, key: &SessionKey) -> Result<EraseOutcome> {
        let path = self.path_for(key);
        // A leftover temp file from an interrupted save goes too.
        let _ = tokio::fs::remove_file(path.with_extension("json.tmp")).await;
        match tokio::fs::remove_file(&path).await {
            Ok(()) => Ok(EraseOutcome::Erased),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(EraseOutcome::NotFound),
            Err(e) => Err(Error::Io(e)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn key() -> SessionKey {
        SessionKey::resolve("session_15551234567").unwrap()
    }

    #[tokio::test]
    async fn save_load_erase() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileCredentialStore::new(dir.path()).unwrap();
        let k = key();

        assert_eq!(store.load(&k).await.unwrap(), None);
        store.save(&k, br#"{"noiseKey":"abc"}"#).await.unwrap();
        assert_eq!(
            store.load(&k).await.unwrap().as_deref(),
            Some(br#"{"noiseKey":"abc"}"#.as_slice())
        );

        assert_eq!(store.erase(&k).await.unwrap(), EraseOutcome::Erased);
        assert_eq!(store.erase(&k).await.unwrap(), EraseOutcome::NotFound);
        assert_eq!(store.load(&k).await.unwrap(), None);
    }

    #[tokio::test]
    async fn torn_write_reads_as_absent() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileCredentialStore::new(dir.path()).unwrap();
        let k = key();
        std::fs::write(dir.path().join("session_15551234567.json"), b"{\"noiseK").unwrap();
        assert_eq!(store.load(&k).await.unwrap(), None);
    }

    #[tokio::test]
    async fn sweep_removes_only_old_files() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileCredentialStore::new(dir.path()).unwrap();
        store.save(&key(), b"{}").await.unwrap();
        std::fs::write(dir.path().join("notes.txt"), b"keep").unwrap();
        let none = HashSet::new();

        assert_eq!(store.sweep_stale(Duration::from_secs(3_600), &none).await.unwrap(), 0);
        assert_eq!(store.sweep_stale(Duration::ZERO, &none).await.unwrap(), 1);
        assert_eq!(store.load(&key()).await.unwrap(), None);
        assert!(dir.path().join("notes.txt").exists());
    }

    #[tokio::test]
    async fn sweep_spares_live_sessions() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileCredentialStore::new(dir.path()).unwrap();
        let other = SessionKey::resolve("session_15557654321").unwrap();
        store.save(&key(), b"{}").await.unwrap();
        store.save(&other, b"{}").await.unwrap();

        let live = HashSet::from([key()]);
        assert_eq!(store.sweep_stale(Duration::ZERO, &live).await.unwrap(), 1);
        assert!(store.load(&key()).await.unwrap().is_some());
        assert_eq!(store.load(&other).await.unwrap(), None);
    }
}
