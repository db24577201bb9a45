use std::future::Future;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use crate::error::Error;
use crate::session::Session;

/// Session persistence across restarts.
///
/// The medium is up to the implementor. The only guarantee required is that
/// `save` followed by `load` in the same process returns an equivalent session.
///
/// # Example
///
/// ```rust,ignore
/// impl TokenStore for MyKeychain {
///     async fn load(&self) -> Result<Option<Session>, Error> {
///         let Some(json) = self.keychain.get("oidc-session")? else { return Ok(None) };
///         serde_json::from_str(&json).map(Some).map_err(|e| Error::Store(e.to_string()))
///     }
///     // ...
/// }
/// ```
pub trait TokenStore: Send + Sync + 'static {
    /// Load the persisted session, if any.
    fn load(&self) -> impl Future<Output = Result<Option<Session>, Error>> + Send;

    /// Persist the session, replacing any previous one.
    fn save(&self, session: &Session) -> impl Future<Output = Result<(), Error>> + Send;

    /// Remove the persisted session. Succeeds when nothing is stored.
    fn clear(&self) -> impl Future<Output = Result<(), Error>> + Send;
}

/// In-process [`TokenStore`]. Clones share the same slot.
#[derive(Debug, Clone, Default)]
pub struct MemoryTokenStore {
    slot: Arc<Mutex<Option<Session>>>,
}

impl MemoryTokenStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn slot(&self) -> Result<std::sync::MutexGuard<'_, Option<Session>>, Error> {
        self.slot
            .lock()
            .map_err(|_| Error::Store("memory store poisoned".into()))
    }
}

impl TokenStore for MemoryTokenStore {
    async fn load(&self) -> Result<Option<Session>, Error> {
        Ok(self.slot()?.clone())
    }

    async fn save(&self, session: &Session) -> Result<(), Error> {
        *self.slot()? = Some(session.clone());
        Ok(())
    }

    async fn clear(&self) -> Result<(), Error> {
        *self.slot()? = None;
        Ok(())
    }
}

/// [`TokenStore`] writing the session as JSON to a file.
///
/// Writes go to a sibling temp file first and are renamed into place, so a
/// crash never leaves a half-written session behind.
#[derive(Debug, Clone)]
pub struct FileTokenStore {
    path: PathBuf,
}

impl FileTokenStore {
    #[must_use]
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    fn temp_path(&self) -> PathBuf {
        let mut name = self.path.file_name().unwrap_or_default().to_os_string();
        name.push(".tmp");
        self.path.with_file_name(name)
    }
}

impl TokenStore for FileTokenStore {
    async fn load(&self) -> Result<Option<Session>, Error> {
        let bytes = match tokio::fs::read(&self.path).await {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(Error::Store(format!("{}: {e}", self.path.display()))),
        };
        serde_json::from_slice(&bytes)
            .map(Some)
            .map_err(|e| Error::Store(format!("{}: {e}", self.path.display())))
    }

    async fn save(&self, session: &Session) -> Result<(), Error> {
        let json = serde_json::to_vec_pretty(session)
            .map_err(|e| Error::Store(format!("serialize session: {e}")))?;
        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| Error::Store(format!("{}: {e}", parent.display())))?;
        }
        let temp = self.temp_path();
        tokio::fs::write(&temp, json)
            .await
            .map_err(|e| Error::Store(format!("{}: {e}", temp.display())))?;
        tokio::fs::rename(&temp, &self.path)
            .await
            .map_err(|e| Error::Store(format!("{}: {e}", self.path.display())))
    }

    async fn clear(&self) -> Result<(), Error> {
        match tokio::fs::remove_file(&self.path).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
            Err(e) => Err(Error::Store(format!("{}: {e}", self.path.display()))),
        }
    }
}
