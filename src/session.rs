use crate::error::{ClientError, ClientResult};
use std::path::{Path, PathBuf};
use uuid::Uuid;

const SESSION_FILE: &str = "chat_session_id";

/// Persists the chat session identifier that groups this profile's history.
#[derive(Debug, Clone)]
pub struct SessionStore {
    path: PathBuf,
}

impl SessionStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// Store under the user's local data directory.
    pub fn default_location() -> Self {
        Self::new(default_session_path())
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Returns the stored id, creating and saving a fresh one on first use.
    pub fn load_or_create(&self) -> ClientResult<String> {
        if let Some(id) = self.load()? {
            return Ok(id);
        }

        let id = Uuid::new_v4().to_string();
        self.write(&id)?;
        tracing::info!(path = %self.path.display(), "created new chat session id");
        Ok(id)
    }

    pub fn load(&self) -> ClientResult<Option<String>> {
        match std::fs::read_to_string(&self.path) {
            Ok(contents) => {
                let id = contents.trim();
                Ok((!id.is_empty()).then(|| id.to_string()))
            }
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(err) => Err(self.io_error(err)),
        }
    }

    pub fn reset(&self) -> ClientResult<()> {
        match std::fs::remove_file(&self.path) {
            Ok(()) => Ok(()),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(err) => Err(self.io_error(err)),
        }
    }

    fn write(&self, id: &str) -> ClientResult<()> {
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| self.io_error(e))?;
        }

        let mut options = std::fs::OpenOptions::new();
        options.write(true).create(true).truncate(true);

        #[cfg(unix)]
        {
            use std::os::unix::fs::OpenOptionsExt;
            options.mode(0o600);
        }

        let mut file = options.open(&self.path).map_err(|e| self.io_error(e))?;
        use std::io::Write;
        file.write_all(id.as_bytes()).map_err(|e| self.io_error(e))?;
        Ok(())
    }

    fn io_error(&self, source: std::io::Error) -> ClientError {
        ClientError::Session {
            path: self.path.clone(),
            source,
        }
    }
}

fn default_session_path() -> PathBuf {
    match dirs::data_local_dir() {
        Some(dir) => dir.join("chatdash").join(SESSION_FILE),
        None => PathBuf::from(SESSION_FILE),
    }
}
