use directories::ProjectDirs;
use std::fs;
use std::path::{Path, PathBuf};

#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    #[error("unable to resolve local data directory")]
    NoDataDirectory,
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Per-user data directory of the viewer.
///
/// Document sidecars live under `docdata/` inside the root, named
/// `<size>.<basename>.xml` so that renamed copies of the same file keep
/// their metadata while different files with the same name do not collide.
#[derive(Debug, Clone)]
pub struct Storage {
    root: PathBuf,
}

impl Storage {
    pub fn from_default_project() -> Result<Self, StorageError> {
        let dirs =
            ProjectDirs::from("org", "Quire", "Quire").ok_or(StorageError::NoDataDirectory)?;

        Ok(Self { root: dirs.data_local_dir().to_path_buf() })
    }

    pub fn with_root(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn docdata_dir(&self) -> PathBuf {
        self.root.join("docdata")
    }

    /// Sidecar path for a document identified by path and byte size.
    pub fn sidecar_path(&self, document_path: &Path, file_size: u64) -> PathBuf {
        let basename = document_path
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_default();
        self.docdata_dir().join(format!("{file_size}.{basename}.xml"))
    }

    /// Create the on-disk layout if it is missing.
    pub fn ensure_layout(&self) -> Result<(), StorageError> {
        fs::create_dir_all(self.docdata_dir())?;
        Ok(())
    }
}
