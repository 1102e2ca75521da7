//! Filesystem object store for uploaded training data
//!
//! `<blob_root>/<container>/<key>`; keys may contain `/` but never escape
//! their container.

use std::path::{Component, Path, PathBuf};

use mhd_common::config::PipelineConfig;
use mhd_common::fs::write_atomic;

use crate::error::PipelineResult;

#[derive(Debug, Clone)]
pub struct BlobStore {
    root: PathBuf,
    raw_container: String,
}

impl BlobStore {
    pub fn new(root: impl Into<PathBuf>, raw_container: &str) -> Self {
        Self {
            root: root.into(),
            raw_container: raw_container.to_string(),
        }
    }

    pub fn from_config(config: &PipelineConfig) -> Self {
        Self::new(config.blob_root(), &config.storage.raw_container)
    }

    fn object_path(&self, container: &str, key: &str) -> PipelineResult<PathBuf> {
        let relative = Path::new(key);
        let clean = !key.is_empty()
            && relative
                .components()
                .all(|c| matches!(c, Component::Normal(_)));
        if !clean {
            return Err(mhd_common::Error::InvalidInput(format!("Invalid object key: {:?}", key)).into());
        }
        Ok(self.root.join(container).join(relative))
    }

    fn get(&self, container: &str, key: &str) -> PipelineResult<Vec<u8>> {
        let path = self.object_path(container, key)?;
        match std::fs::read(&path) {
            Ok(bytes) => Ok(bytes),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Err(mhd_common::Error::NotFound(
                format!("Object not found: {}/{}", container, key),
            )
            .into()),
            Err(e) => Err(e.into()),
        }
    }

    fn put(&self, container: &str, key: &str, bytes: &[u8]) -> PipelineResult<()> {
        let path = self.object_path(container, key)?;
        write_atomic(&path, bytes)?;
        tracing::debug!(container, key, size = bytes.len(), "Stored object");
        Ok(())
    }

    pub fn get_raw(&self, key: &str) -> PipelineResult<Vec<u8>> {
        self.get(&self.raw_container, key)
    }

    pub fn put_raw(&self, key: &str, bytes: &[u8]) -> PipelineResult<()> {
        self.put(&self.raw_container, key, bytes)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::PipelineError;
    use tempfile::TempDir;

    fn store(dir: &TempDir) -> BlobStore {
        BlobStore::new(dir.path(), "mhd-raw")
    }

    #[test]
    fn test_objects_live_under_container() {
        let dir = TempDir::new().unwrap();
        let blobs = store(&dir);
        blobs.put_raw("uploads/a.csv", b"age,bp\n1,2\n").unwrap();

        assert_eq!(blobs.get_raw("uploads/a.csv").unwrap(), b"age,bp\n1,2\n");
        assert!(dir.path().join("mhd-raw/uploads/a.csv").exists());
        assert!(matches!(
            blobs.get_raw("uploads/b.csv"),
            Err(PipelineError::Common(mhd_common::Error::NotFound(_)))
        ));
    }

    #[test]
    fn test_keys_cannot_escape_container() {
        let dir = TempDir::new().unwrap();
        let blobs = store(&dir);
        for key in ["../secret", "/etc/passwd", "", "a/../../b"] {
            assert!(
                matches!(
                    blobs.get_raw(key),
                    Err(PipelineError::Common(mhd_common::Error::InvalidInput(_)))
                ),
                "key {:?} accepted",
                key
            );
        }
    }
}
