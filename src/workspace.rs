//! The on-disk layout every pull writes into.
//!
//! All output locations are derived from one explicit root; nothing in this
//! crate reads or changes the process working directory. The tree is:
//!
//! ```text
//! <root>/
//!   data/
//!     rt/        real-time station pulls (fixed file name, overwritten)
//!     hist/      historical station pulls (timestamped file names)
//!     derived/   downstream model inputs (created, not written by this crate)
//!     tmp/       in-flight downloads
//!   outputs/     completed satellite subset granules
//!   debug/       optional raw API response dumps
//! ```

use log::info;
use std::io;
use std::path::{Path, PathBuf};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum WorkspaceError {
    #[error("Failed to create workspace directory '{0}'")]
    DirCreation(PathBuf, #[source] io::Error),

    #[error("Workspace path exists but is not a directory: '{0}'")]
    NotADirectory(PathBuf),
}

/// The directory tree a [`crate::Wile`] client reads from and writes into.
///
/// Cheap to clone; holds only the root path. Call [`Workspace::ensure_tree`]
/// once before writing (the [`crate::Wile`] constructors do this for you).
#[derive(Debug, Clone)]
pub struct Workspace {
    root: PathBuf,
}

impl Workspace {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Where real-time station CSVs land.
    pub fn data_rt(&self) -> PathBuf {
        self.root.join("data").join("rt")
    }

    /// Where historical station CSVs land.
    pub fn data_hist(&self) -> PathBuf {
        self.root.join("data").join("hist")
    }

    /// Reserved for derived data sets produced downstream of this crate.
    pub fn data_derived(&self) -> PathBuf {
        self.root.join("data").join("derived")
    }

    /// Scratch space for in-flight downloads.
    pub fn data_tmp(&self) -> PathBuf {
        self.root.join("data").join("tmp")
    }

    /// Where completed subset granules land.
    pub fn outputs(&self) -> PathBuf {
        self.root.join("outputs")
    }

    /// Where raw response dumps land when debug dumps are enabled.
    pub fn debug(&self) -> PathBuf {
        self.root.join("debug")
    }

    /// Creates every directory of the tree that does not exist yet.
    ///
    /// # Errors
    ///
    /// Returns [`WorkspaceError::NotADirectory`] if a tree path exists as a
    /// plain file, or [`WorkspaceError::DirCreation`] if creation fails.
    pub async fn ensure_tree(&self) -> Result<(), WorkspaceError> {
        for dir in [
            self.data_rt(),
            self.data_hist(),
            self.data_derived(),
            self.data_tmp(),
            self.outputs(),
            self.debug(),
        ] {
            ensure_dir(&dir).await?;
        }
        Ok(())
    }
}

async fn ensure_dir(path: &Path) -> Result<(), WorkspaceError> {
    match tokio::fs::metadata(path).await {
        Ok(metadata) => {
            if !metadata.is_dir() {
                return Err(WorkspaceError::NotADirectory(path.to_path_buf()));
            }
            Ok(())
        }
        Err(e) if e.kind() == io::ErrorKind::NotFound => {
            info!("Creating workspace directory {}", path.display());
            tokio::fs::create_dir_all(path)
                .await
                .map_err(|e| WorkspaceError::DirCreation(path.to_path_buf(), e))
        }
        Err(e) => Err(WorkspaceError::DirCreation(path.to_path_buf(), e)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_ensure_tree_creates_all_dirs() -> Result<(), WorkspaceError> {
        let tmp = tempfile::tempdir().expect("tempdir");
        let workspace = Workspace::new(tmp.path().join("wile"));

        workspace.ensure_tree().await?;

        for dir in [
            workspace.data_rt(),
            workspace.data_hist(),
            workspace.data_derived(),
            workspace.data_tmp(),
            workspace.outputs(),
            workspace.debug(),
        ] {
            assert!(dir.is_dir(), "expected {} to exist", dir.display());
        }
        Ok(())
    }

    #[tokio::test]
    async fn test_ensure_tree_is_idempotent() -> Result<(), WorkspaceError> {
        let tmp = tempfile::tempdir().expect("tempdir");
        let workspace = Workspace::new(tmp.path());

        workspace.ensure_tree().await?;
        workspace.ensure_tree().await?;
        Ok(())
    }

    #[tokio::test]
    async fn test_ensure_tree_rejects_file_in_the_way() {
        let tmp = tempfile::tempdir().expect("tempdir");
        let workspace = Workspace::new(tmp.path());
        std::fs::create_dir_all(tmp.path().join("data")).expect("mkdir");
        std::fs::write(tmp.path().join("data").join("rt"), b"not a dir").expect("write");

        let err = workspace.ensure_tree().await.unwrap_err();
        assert!(matches!(err, WorkspaceError::NotADirectory(_)));
    }

    #[test]
    fn test_paths_hang_off_root() {
        let workspace = Workspace::new("/srv/wile");
        assert_eq!(workspace.data_rt(), PathBuf::from("/srv/wile/data/rt"));
        assert_eq!(workspace.data_hist(), PathBuf::from("/srv/wile/data/hist"));
        assert_eq!(workspace.data_tmp(), PathBuf::from("/srv/wile/data/tmp"));
        assert_eq!(workspace.outputs(), PathBuf::from("/srv/wile/outputs"));
        assert_eq!(workspace.debug(), PathBuf::from("/srv/wile/debug"));
    }
}
