//! Credential handling for the two upstream APIs.
//!
//! The station API wants an opaque token as a query parameter; the subset API
//! wants HTTP Basic credentials. Both come from the environment or from a
//! plain-text credential file, never from source literals. The credential
//! file carries one `key,value` pair per line:
//!
//! ```text
//! login,jane_doe
//! password,hunter2
//! ```
//!
//! For tooling that authenticates through Earthdata outside this crate (wget,
//! OPeNDAP clients), [`Credentials::write_earthdata_files`] materializes the
//! usual `.netrc` / `.urs_cookies` / `.dodsrc` bootstrap trio.

use std::collections::HashMap;
use std::fmt;
use std::io;
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Environment variable holding the station API token.
pub const STATION_TOKEN_VAR: &str = "SYNOPTIC_TOKEN";
/// Environment variables holding the subset API login and password.
pub const EARTHDATA_LOGIN_VAR: &str = "EARTHDATA_LOGIN";
pub const EARTHDATA_PASSWORD_VAR: &str = "EARTHDATA_PASSWORD";

const EARTHDATA_MACHINE: &str = "urs.earthdata.nasa.gov";

#[derive(Debug, Error)]
pub enum CredentialError {
    #[error("Failed to read credential file '{0}'")]
    Read(PathBuf, #[source] io::Error),

    #[error("Malformed credential line {line} in '{path}' (expected 'key,value')")]
    MalformedLine { path: PathBuf, line: usize },

    #[error("Credential file '{path}' is missing the '{key}' key")]
    MissingKey { path: PathBuf, key: &'static str },

    #[error("No subset API credentials configured (set {EARTHDATA_LOGIN_VAR}/{EARTHDATA_PASSWORD_VAR} or point the config at a credential file)")]
    MissingCredentials,

    #[error("No station API token configured (set {STATION_TOKEN_VAR} or put the token in the config)")]
    MissingToken,

    #[error("Failed to determine home directory for Earthdata bootstrap files")]
    HomeDirResolution,

    #[error("Failed to write Earthdata bootstrap file '{0}'")]
    BootstrapWrite(PathBuf, #[source] io::Error),
}

/// A login/password pair for the satellite subset API.
#[derive(Clone, PartialEq, Eq)]
pub struct Credentials {
    pub login: String,
    pub password: String,
}

// Keep the password out of logs and error chains.
impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("login", &self.login)
            .field("password", &"<redacted>")
            .finish()
    }
}

impl Credentials {
    pub fn new(login: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            login: login.into(),
            password: password.into(),
        }
    }

    /// Parses a two-column credential file into a login/password pair.
    ///
    /// Blank lines and `#` comments are ignored; `username` is accepted as an
    /// alias for `login`. Later occurrences of a key win.
    ///
    /// # Errors
    ///
    /// Returns [`CredentialError::Read`] on I/O failure,
    /// [`CredentialError::MalformedLine`] for a line without a comma, and
    /// [`CredentialError::MissingKey`] when either key is absent.
    pub async fn from_file(path: &Path) -> Result<Self, CredentialError> {
        let contents = tokio::fs::read_to_string(path)
            .await
            .map_err(|e| CredentialError::Read(path.to_path_buf(), e))?;

        let mut pairs: HashMap<&str, &str> = HashMap::new();
        for (idx, raw) in contents.lines().enumerate() {
            let line = raw.trim();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }
            let (key, value) = line.split_once(',').ok_or(CredentialError::MalformedLine {
                path: path.to_path_buf(),
                line: idx + 1,
            })?;
            pairs.insert(key.trim(), value.trim());
        }

        let login = pairs
            .get("login")
            .or_else(|| pairs.get("username"))
            .ok_or(CredentialError::MissingKey {
                path: path.to_path_buf(),
                key: "login",
            })?;
        let password = pairs.get("password").ok_or(CredentialError::MissingKey {
            path: path.to_path_buf(),
            key: "password",
        })?;

        Ok(Self::new(*login, *password))
    }

    /// Reads the pair from `EARTHDATA_LOGIN` / `EARTHDATA_PASSWORD`.
    pub fn from_env() -> Option<Self> {
        let login = std::env::var(EARTHDATA_LOGIN_VAR).ok()?;
        let password = std::env::var(EARTHDATA_PASSWORD_VAR).ok()?;
        Some(Self::new(login, password))
    }

    /// Writes the Earthdata authentication bootstrap files under `home`:
    /// `.netrc` with the credential pair, an empty `.urs_cookies`, and a
    /// `.dodsrc` pointing at both. Existing files are overwritten.
    pub async fn write_earthdata_files(&self, home: &Path) -> Result<(), CredentialError> {
        let netrc = home.join(".netrc");
        let cookies = home.join(".urs_cookies");
        let dodsrc = home.join(".dodsrc");

        let netrc_contents = format!(
            "machine {EARTHDATA_MACHINE} login {} password {}\n",
            self.login, self.password
        );
        tokio::fs::write(&netrc, netrc_contents)
            .await
            .map_err(|e| CredentialError::BootstrapWrite(netrc.clone(), e))?;
        restrict_permissions(&netrc).await?;

        tokio::fs::write(&cookies, "")
            .await
            .map_err(|e| CredentialError::BootstrapWrite(cookies.clone(), e))?;

        let dodsrc_contents = format!(
            "HTTP.COOKIEJAR={}\nHTTP.NETRC={}\n",
            cookies.display(),
            netrc.display()
        );
        tokio::fs::write(&dodsrc, dodsrc_contents)
            .await
            .map_err(|e| CredentialError::BootstrapWrite(dodsrc, e))?;

        Ok(())
    }

    /// As [`write_earthdata_files`](Self::write_earthdata_files), under the
    /// user's home directory.
    pub async fn write_earthdata_files_in_home(&self) -> Result<PathBuf, CredentialError> {
        let home = dirs::home_dir().ok_or(CredentialError::HomeDirResolution)?;
        self.write_earthdata_files(&home).await?;
        Ok(home)
    }
}

// Earthdata tooling refuses world-readable netrc files.
#[cfg(unix)]
async fn restrict_permissions(path: &Path) -> Result<(), CredentialError> {
    use std::os::unix::fs::PermissionsExt;
    tokio::fs::set_permissions(path, std::fs::Permissions::from_mode(0o600))
        .await
        .map_err(|e| CredentialError::BootstrapWrite(path.to_path_buf(), e))
}

#[cfg(not(unix))]
async fn restrict_permissions(_path: &Path) -> Result<(), CredentialError> {
    Ok(())
}
