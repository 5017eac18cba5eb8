//! Content loaders
//!
//! A content loader supplies the raw bytes of one logical unit: a plain file
//! on disk or an entry inside an archive (see the archive handlers for the
//! entry-scoped loaders). Loaders hold only a reference to their source and
//! re-read it on every call.

use std::fmt;
use std::io::Read;
use std::path::{Path, PathBuf};

use crate::error::{IngestError, Result};

/// Supplies raw bytes for a datasource
pub trait ContentLoader: Send + Sync + fmt::Debug {
    /// Read the full content
    fn load(&self) -> Result<Vec<u8>>;

    /// Human-readable origin, used as the datasource name
    fn describe(&self) -> String;

    /// Backing file, when the content is a plain file on disk
    fn path(&self) -> Option<&Path> {
        None
    }

    /// First `len` bytes of the content
    fn head(&self, len: usize) -> Result<Vec<u8>> {
        match self.path() {
            Some(path) => {
                let file = std::fs::File::open(path)
                    .map_err(|e| IngestError::io(path.display().to_string(), e))?;
                let mut head = Vec::with_capacity(len);
                file.take(len as u64)
                    .read_to_end(&mut head)
                    .map_err(|e| IngestError::io(path.display().to_string(), e))?;
                Ok(head)
            },
            None => {
                let mut content = self.load()?;
                content.truncate(len);
                Ok(content)
            },
        }
    }
}

/// Loader for a plain file
#[derive(Debug, Clone)]
pub struct FileContentLoader {
    path: PathBuf,
}

impl FileContentLoader {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

impl ContentLoader for FileContentLoader {
    fn load(&self) -> Result<Vec<u8>> {
        std::fs::read(&self.path).map_err(|e| IngestError::io(self.describe(), e))
    }

    fn describe(&self) -> String {
        self.path.display().to_string()
    }

    fn path(&self) -> Option<&Path> {
        Some(&self.path)
    }
}

/// In-memory content, for entries already extracted and for tests
#[derive(Clone)]
pub struct BytesContentLoader {
    name: String,
    bytes: std::sync::Arc<[u8]>,
}

impl BytesContentLoader {
    pub fn new(name: impl Into<String>, bytes: impl Into<Vec<u8>>) -> Self {
        let bytes: Vec<u8> = bytes.into();
        Self {
            name: name.into(),
            bytes: bytes.into(),
        }
    }
}

impl fmt::Debug for BytesContentLoader {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BytesContentLoader")
            .field("name", &self.name)
            .field("len", &self.bytes.len())
            .finish()
    }
}

impl ContentLoader for BytesContentLoader {
    fn load(&self) -> Result<Vec<u8>> {
        Ok(self.bytes.to_vec())
    }

    fn describe(&self) -> String {
        self.name.clone()
    }
}

/// Lower-cased extension of a file or entry name, without the dot
pub fn extension_of(name: impl AsRef<Path>) -> String {
    name.as_ref()
        .extension()
        .map(|ext| ext.to_string_lossy().to_lowercase())
        .unwrap_or_default()
}

/// Last path component of a loader description (`a.zip!dir/b.json` -> `b.json`)
pub fn base_name(description: &str) -> &str {
    description
        .rsplit(['!', '/', '\\'])
        .next()
        .unwrap_or(description)
}
