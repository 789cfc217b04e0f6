//! The `trellis.meta` marker file.
//!
//! Identifies a directory as a Trellis store and records the on-disk format
//! version, so that opening an unrelated or newer directory fails up front.

use std::path::Path;

use serde::{Deserialize, Serialize};
use trellis_common::utils::error::{Error, Result};

pub const META_FILE: &str = "trellis.meta";
pub const MAGIC: &str = "trellis";
pub const FORMAT_VERSION: u32 = 1;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoreMeta {
    pub magic: String,
    pub format_version: u32,
    /// Crate version that created the store.
    pub created_by: String,
}

impl StoreMeta {
    #[must_use]
    pub fn current() -> Self {
        Self {
            magic: MAGIC.to_string(),
            format_version: FORMAT_VERSION,
            created_by: env!("CARGO_PKG_VERSION").to_string(),
        }
    }

    /// Reads and validates the meta file. `Ok(None)` if there is none.
    pub fn read(dir: &Path) -> Result<Option<Self>> {
        let path = dir.join(META_FILE);
        let text = match std::fs::read_to_string(&path) {
            Ok(text) => text,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(Error::StorageOpen(format!("cannot read {}: {e}", path.display()))),
        };
        let meta: Self = serde_json::from_str(&text)
            .map_err(|e| Error::StorageOpen(format!("{} is not a valid meta file: {e}", path.display())))?;
        if meta.magic != MAGIC {
            return Err(Error::StorageOpen(format!(
                "{} is not a Trellis store (magic {:?})",
                dir.display(),
                meta.magic
            )));
        }
        if meta.format_version != FORMAT_VERSION {
            return Err(Error::StorageOpen(format!(
                "unsupported store format version {} (expected {FORMAT_VERSION})",
                meta.format_version
            )));
        }
        Ok(Some(meta))
    }

    pub fn write(&self, dir: &Path) -> Result<()> {
        let json = serde_json::to_string_pretty(self).map_err(|e| Error::Serialization(e.to_string()))?;
        std::fs::write(dir.join(META_FILE), json)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_write_then_read() {
        let dir = tempdir().unwrap();
        assert_eq!(StoreMeta::read(dir.path()).unwrap(), None);
        StoreMeta::current().write(dir.path()).unwrap();
        assert_eq!(StoreMeta::read(dir.path()).unwrap(), Some(StoreMeta::current()));
    }

    #[test]
    fn test_rejects_foreign_files() {
        let dir = tempdir().unwrap();
        std::fs::write(dir.path().join(META_FILE), "not json").unwrap();
        assert!(matches!(StoreMeta::read(dir.path()), Err(Error::StorageOpen(_))));

        let mut meta = StoreMeta::current();
        meta.format_version = 99;
        meta.write(dir.path()).unwrap();
        let err = StoreMeta::read(dir.path()).unwrap_err();
        assert!(err.to_string().contains("version 99"));
    }
}
