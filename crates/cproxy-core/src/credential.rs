use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};

pub const TOKEN_FILE_NAME: &str = ".github_copilot_token";

#[derive(Debug, thiserror::Error)]
pub enum CredentialError {
    #[error("not logged in: {} not found", .path.display())]
    NotLoggedIn { path: PathBuf },
    #[error("already logged in: {} exists", .path.display())]
    AlreadyLoggedIn { path: PathBuf },
    #[error("token file {}: {source}", .path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

/// The GitHub access token on disk. The first line of the file is the token.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TokenFile {
    path: PathBuf,
}

impl TokenFile {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn in_dir(dir: impl AsRef<Path>) -> Self {
        Self::new(dir.as_ref().join(TOKEN_FILE_NAME))
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn exists(&self) -> bool {
        self.path.is_file()
    }

    pub fn read(&self) -> Result<String, CredentialError> {
        let raw = match fs::read_to_string(&self.path) {
            Ok(raw) => raw,
            Err(err) if err.kind() == io::ErrorKind::NotFound => {
                return Err(self.not_logged_in());
            }
            Err(source) => return Err(self.io(source)),
        };
        let token = raw.lines().next().unwrap_or_default().trim();
        if token.is_empty() {
            return Err(self.not_logged_in());
        }
        Ok(token.to_string())
    }

    pub fn ensure_absent(&self) -> Result<(), CredentialError> {
        if self.exists() {
            return Err(CredentialError::AlreadyLoggedIn {
                path: self.path.clone(),
            });
        }
        Ok(())
    }

    /// Writes the token, replacing any previous file.
    pub fn write(&self, token: &str) -> Result<(), CredentialError> {
        if let Some(parent) = self.path.parent()
            && !parent.as_os_str().is_empty()
        {
            fs::create_dir_all(parent).map_err(|source| self.io(source))?;
        }
        let mut file = open_private(&self.path).map_err(|source| self.io(source))?;
        writeln!(file, "{}", token.trim()).map_err(|source| self.io(source))
    }

    pub fn remove(&self) -> Result<(), CredentialError> {
        match fs::remove_file(&self.path) {
            Ok(()) => Ok(()),
            Err(err) if err.kind() == io::ErrorKind::NotFound => Err(self.not_logged_in()),
            Err(source) => Err(self.io(source)),
        }
    }

    fn not_logged_in(&self) -> CredentialError {
        CredentialError::NotLoggedIn {
            path: self.path.clone(),
        }
    }

    fn io(&self, source: io::Error) -> CredentialError {
        CredentialError::Io {
            path: self.path.clone(),
            source,
        }
    }
}

#[cfg(unix)]
fn open_private(path: &Path) -> io::Result<fs::File> {
    use std::os::unix::fs::OpenOptionsExt;
    fs::OpenOptions::new()
        .write(true)
        .create(true)
        .truncate(true)
        .mode(0o600)
        .open(path)
}

#[cfg(not(unix))]
fn open_private(path: &Path) -> io::Result<fs::File> {
    fs::File::create(path)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn write_read_remove() {
        let dir = tempfile::tempdir().unwrap();
        let file = TokenFile::in_dir(dir.path());
        assert!(!file.exists());
        assert!(file.ensure_absent().is_ok());

        file.write("gho_abc\n").unwrap();
        assert!(file.exists());
        assert_eq!(file.read().unwrap(), "gho_abc");
        assert!(matches!(
            file.ensure_absent(),
            Err(CredentialError::AlreadyLoggedIn { .. })
        ));

        file.remove().unwrap();
        assert!(matches!(
            file.remove(),
            Err(CredentialError::NotLoggedIn { .. })
        ));
    }

    #[test]
    fn reads_only_first_line() {
        let dir = tempfile::tempdir().unwrap();
        let file = TokenFile::in_dir(dir.path());
        fs::write(file.path(), "gho_first\r\nsecond\n").unwrap();
        assert_eq!(file.read().unwrap(), "gho_first");
    }

    #[test]
    fn missing_or_blank_file_is_not_logged_in() {
        let dir = tempfile::tempdir().unwrap();
        let file = TokenFile::in_dir(dir.path());
        assert!(matches!(file.read(), Err(CredentialError::NotLoggedIn { .. })));
        fs::write(file.path(), "\n").unwrap();
        assert!(matches!(file.read(), Err(CredentialError::NotLoggedIn { .. })));
    }

    #[test]
    fn creates_missing_parent_dirs() {
        let dir = tempfile::tempdir().unwrap();
        let file = TokenFile::in_dir(dir.path().join("nested").join("data"));
        file.write("gho_nested").unwrap();
        assert_eq!(file.read().unwrap(), "gho_nested");
    }
}
