use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};

use crate::ids::RequestId;

pub const UPLOADS_DIR: &str = "uploads";
pub const GENERATED_DIR: &str = "generated";
/// URL prefix under which the storage root is served.
pub const STATIC_MOUNT: &str = "/static";

/// On-disk layout for request artifacts.
///
/// Two fixed directories live under `root`:
/// - `uploads/<id>_original.png` holds the unmodified upload
/// - `generated/<id>_generated.png` holds the provider output
///
/// Files are written once and never replaced.
#[derive(Debug, Clone)]
pub struct StorageLayout {
    root: PathBuf,
}

impl StorageLayout {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn uploads_dir(&self) -> PathBuf {
        self.root.join(UPLOADS_DIR)
    }

    pub fn generated_dir(&self) -> PathBuf {
        self.root.join(GENERATED_DIR)
    }

    pub fn ensure_dirs(&self) -> Result<()> {
        for dir in [self.uploads_dir(), self.generated_dir()] {
            fs::create_dir_all(&dir)
                .with_context(|| format!("failed to create {}", dir.display()))?;
        }
        Ok(())
    }

    pub fn original_path(&self, id: &RequestId) -> PathBuf {
        self.uploads_dir().join(original_file_name(id))
    }

    pub fn generated_path(&self, id: &RequestId) -> PathBuf {
        self.generated_dir().join(generated_file_name(id))
    }

    /// Public URL of the generated file, relative to the server origin.
    pub fn public_url(&self, id: &RequestId) -> String {
        format!(
            "{STATIC_MOUNT}/{GENERATED_DIR}/{}",
            generated_file_name(id)
        )
    }

    pub fn write_original(&self, id: &RequestId, bytes: &[u8]) -> Result<PathBuf> {
        let path = self.original_path(id);
        write_once(&path, bytes)?;
        Ok(path)
    }

    pub fn write_generated(&self, id: &RequestId, bytes: &[u8]) -> Result<PathBuf> {
        let path = self.generated_path(id);
        write_once(&path, bytes)?;
        Ok(path)
    }
}

pub fn original_file_name(id: &RequestId) -> String {
    format!("{id}_original.png")
}

pub fn generated_file_name(id: &RequestId) -> String {
    format!("{id}_generated.png")
}

/// Create `path` and fill it with `bytes`; an existing file is an error.
pub fn write_once(path: &Path, bytes: &[u8]) -> Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)
            .with_context(|| format!("failed to create {}", parent.display()))?;
    }
    let mut file = OpenOptions::new()
        .write(true)
        .create_new(true)
        .open(path)
        .with_context(|| format!("failed to create {}", path.display()))?;
    file.write_all(bytes)
        .with_context(|| format!("failed to write {}", path.display()))?;
    Ok(())
}
