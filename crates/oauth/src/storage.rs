//! File-backed stores for pending authorization sessions and credentials.
//!
//! Both live in the data directory as JSON files readable only by the owner.
//! The pending-session file is guarded by an advisory lock so that two
//! processes completing the same `state` cannot both take it.

use std::{
    collections::HashMap,
    fs::{self, OpenOptions},
    io::Write,
    path::{Path, PathBuf},
    sync::{Mutex, PoisonError},
    time::Duration,
};

use {
    synadmin_common::now_ms,
    tracing::{debug, warn},
};

use crate::{
    error::Result,
    types::{Credentials, PendingSession},
};

const PENDING_FILE: &str = "pending_sessions.json";
const PENDING_LOCK_FILE: &str = "pending_sessions.lock";
const CREDENTIALS_FILE: &str = "credentials.json";

type Sessions = HashMap<String, PendingSession>;

/// Write `contents` to `path` atomically with owner-only permissions.
fn write_private(path: &Path, contents: &[u8]) -> std::io::Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    let tmp = path.with_extension("tmp");
    {
        let mut opts = OpenOptions::new();
        opts.create(true).write(true).truncate(true);
        #[cfg(unix)]
        {
            use std::os::unix::fs::OpenOptionsExt;
            opts.mode(0o600);
        }
        let mut file = opts.open(&tmp)?;
        file.write_all(contents)?;
        file.sync_all()?;
    }
    fs::rename(&tmp, path)
}

fn is_expired(session: &PendingSession, now: u64, max_age: Duration) -> bool {
    now.saturating_sub(session.created_at_ms) >= max_age.as_millis() as u64
}

/// Pending sessions keyed by `state`.
pub struct SessionStore {
    path: PathBuf,
    lock_path: PathBuf,
    guard: Mutex<()>,
}

impl SessionStore {
    pub fn new(dir: &Path) -> Self {
        Self {
            path: dir.join(PENDING_FILE),
            lock_path: dir.join(PENDING_LOCK_FILE),
            guard: Mutex::new(()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn read(&self) -> Result<Sessions> {
        let raw = match fs::read(&self.path) {
            Ok(raw) => raw,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Sessions::new()),
            Err(e) => return Err(e.into()),
        };
        match serde_json::from_slice(&raw) {
            Ok(sessions) => Ok(sessions),
            Err(e) => {
                warn!(path = %self.path.display(), %e, "discarding unreadable pending sessions");
                Ok(Sessions::new())
            },
        }
    }

    /// Run `f` on the session map under both the in-process and the file lock.
    /// `f` returns whether it changed the map.
    fn with_locked<R>(&self, f: impl FnOnce(&mut Sessions) -> (R, bool)) -> Result<R> {
        let _guard = self.guard.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(parent) = self.lock_path.parent() {
            fs::create_dir_all(parent)?;
        }
        let lock_file = OpenOptions::new()
            .create(true)
            .truncate(false)
            .read(true)
            .write(true)
            .open(&self.lock_path)?;
        let mut lock = fd_lock::RwLock::new(lock_file);
        let _write = lock.write()?;

        let mut sessions = self.read()?;
        let (result, changed) = f(&mut sessions);
        if changed {
            write_private(&self.path, &serde_json::to_vec_pretty(&sessions)?)?;
        }
        Ok(result)
    }

    pub fn insert(&self, state: &str, session: PendingSession) -> Result<()> {
        self.with_locked(|sessions| {
            sessions.insert(state.to_string(), session);
            ((), true)
        })?;
        debug!("pending authorization session stored");
        Ok(())
    }

    /// Remove and return the session for `state`. Expired sessions are removed
    /// too but reported as absent.
    pub fn take(&self, state: &str, max_age: Duration) -> Result<Option<PendingSession>> {
        let now = now_ms();
        self.with_locked(|sessions| match sessions.remove(state) {
            Some(session) if is_expired(&session, now, max_age) => {
                debug!("pending authorization session expired");
                (None, true)
            },
            Some(session) => (Some(session), true),
            None => (None, false),
        })
    }

    /// Evict sessions older than `max_age`. Returns how many were evicted.
    pub fn collect_garbage(&self, max_age: Duration) -> Result<usize> {
        let now = now_ms();
        self.with_locked(|sessions| {
            let before = sessions.len();
            sessions.retain(|_, s| !is_expired(s, now, max_age));
            let evicted = before - sessions.len();
            (evicted, evicted > 0)
        })
    }

    pub fn len(&self) -> Result<usize> {
        self.with_locked(|sessions| (sessions.len(), false))
    }

    pub fn is_empty(&self) -> Result<bool> {
        Ok(self.len()? == 0)
    }
}

/// Credentials of the logged-in administrator.
pub struct CredentialStore {
    path: PathBuf,
}

impl CredentialStore {
    pub fn new(dir: &Path) -> Self {
        Self {
            path: dir.join(CREDENTIALS_FILE),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn save(&self, credentials: &Credentials) -> Result<()> {
        write_private(&self.path, &serde_json::to_vec_pretty(credentials)?)?;
        debug!(path = %self.path.display(), "credentials saved");
        Ok(())
    }

    pub fn load(&self) -> Result<Option<Credentials>> {
        let raw = match fs::read(&self.path) {
            Ok(raw) => raw,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };
        Ok(Some(serde_json::from_slice(&raw)?))
    }

    /// Returns whether there was anything to delete.
    pub fn delete(&self) -> Result<bool> {
        match fs::remove_file(&self.path) {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(false),
            Err(e) => Err(e.into()),
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use secrecy::{ExposeSecret, SecretString};

    use super::*;

    fn pending(created_at_ms: u64) -> PendingSession {
        PendingSession {
            code_verifier: "verifier".into(),
            server_name: "example.org".into(),
            client_id: "client".into(),
            redirect_target: Some("/rooms".into()),
            redirect_uri: "http://127.0.0.1:19485/callback".into(),
            issuer: "https://auth.example.org/".into(),
            token_endpoint: "https://auth.example.org/oauth2/token".into(),
            homeserver_url: "https://matrix.example.org".into(),
            device_id: "ABCDEFGHIJ".into(),
            created_at_ms,
        }
    }

    const HOUR: Duration = Duration::from_secs(3600);

    #[test]
    fn test_take_is_single_use() {
        let tmp = tempfile::tempdir().unwrap();
        let store = SessionStore::new(tmp.path());
        store.insert("s1", pending(now_ms())).unwrap();

        let first = store.take("s1", HOUR).unwrap();
        assert_eq!(first.unwrap().code_verifier, "verifier");
        assert!(store.take("s1", HOUR).unwrap().is_none());
        assert!(store.is_empty().unwrap());
    }

    #[test]
    fn test_take_unknown_state() {
        let tmp = tempfile::tempdir().unwrap();
        let store = SessionStore::new(tmp.path());
        store.insert("s1", pending(now_ms())).unwrap();

        assert!(store.take("other", HOUR).unwrap().is_none());
        assert_eq!(store.len().unwrap(), 1);
    }

    #[test]
    fn test_take_expired_session_is_absent_and_removed() {
        let tmp = tempfile::tempdir().unwrap();
        let store = SessionStore::new(tmp.path());
        store.insert("old", pending(0)).unwrap();

        assert!(store.take("old", HOUR).unwrap().is_none());
        assert!(store.is_empty().unwrap());
    }

    #[test]
    fn test_sessions_survive_a_new_store() {
        let tmp = tempfile::tempdir().unwrap();
        SessionStore::new(tmp.path())
            .insert("s1", pending(now_ms()))
            .unwrap();

        let reopened = SessionStore::new(tmp.path());
        assert!(reopened.take("s1", HOUR).unwrap().is_some());
    }

    #[test]
    fn test_collect_garbage_evicts_by_age() {
        let tmp = tempfile::tempdir().unwrap();
        let store = SessionStore::new(tmp.path());
        store.insert("old", pending(0)).unwrap();
        store.insert("fresh", pending(now_ms())).unwrap();

        assert_eq!(store.collect_garbage(HOUR).unwrap(), 1);
        assert_eq!(store.len().unwrap(), 1);
        assert!(store.take("fresh", HOUR).unwrap().is_some());
    }

    #[test]
    fn test_corrupt_file_is_treated_as_empty() {
        let tmp = tempfile::tempdir().unwrap();
        fs::write(tmp.path().join(PENDING_FILE), "not json").unwrap();
        let store = SessionStore::new(tmp.path());
        assert!(store.is_empty().unwrap());
        store.insert("s1", pending(now_ms())).unwrap();
        assert_eq!(store.len().unwrap(), 1);
    }

    #[test]
    fn test_concurrent_take_yields_one_winner() {
        let tmp = tempfile::tempdir().unwrap();
        let store = Arc::new(SessionStore::new(tmp.path()));
        store.insert("s1", pending(now_ms())).unwrap();

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let store = Arc::clone(&store);
                std::thread::spawn(move || store.take("s1", HOUR).unwrap().is_some())
            })
            .collect();
        let winners = handles
            .into_iter()
            .map(|h| h.join().unwrap())
            .filter(|won| *won)
            .count();
        assert_eq!(winners, 1);
    }

    #[test]
    fn test_credential_store_round_trip() {
        let tmp = tempfile::tempdir().unwrap();
        let store = CredentialStore::new(tmp.path());
        assert!(store.load().unwrap().is_none());

        let creds = Credentials {
            server_name: "example.org".into(),
            homeserver_url: "https://matrix.example.org".into(),
            user_id: "@admin:example.org".into(),
            device_id: "ABCDEFGHIJ".into(),
            access_token: SecretString::new("access".into()),
            refresh_token: Some(SecretString::new("refresh".into())),
            expires_at: None,
            client_id: "client".into(),
            issuer: "https://auth.example.org/".into(),
            token_endpoint: "https://auth.example.org/oauth2/token".into(),
        };
        store.save(&creds).unwrap();

        let loaded = store.load().unwrap().unwrap();
        assert_eq!(loaded.user_id, "@admin:example.org");
        assert_eq!(
            loaded.refresh_token.as_ref().map(|t| t.expose_secret().as_str()),
            Some("refresh")
        );

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            let mode = fs::metadata(store.path()).unwrap().permissions().mode();
            assert_eq!(mode & 0o777, 0o600);
        }

        assert!(store.delete().unwrap());
        assert!(!store.delete().unwrap());
    }
}
