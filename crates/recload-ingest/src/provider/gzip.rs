//! Gzip containers
//!
//! A `.gz` file wraps exactly one entry, named after the container with the
//! `.gz` suffix removed (`records.json.gz` holds `records.json`).

use flate2::read::GzDecoder;
use std::fs::File;
use std::io::{BufReader, Read};
use std::path::Path;
use std::sync::Arc;

use super::handler::{has_signature, ArchiveEntry, ArchiveHandler};
use super::loader::{base_name, extension_of, ContentLoader};
use crate::error::{IngestError, Result};

const GZIP_MAGIC: &[u8] = &[0x1f, 0x8b];

/// Handler for `.gz` containers
#[derive(Debug, Default)]
pub struct GzipArchiveHandler;

impl GzipArchiveHandler {
    pub fn create() -> Result<Arc<dyn ArchiveHandler>> {
        Ok(Arc::new(Self))
    }
}

impl ArchiveHandler for GzipArchiveHandler {
    fn name(&self) -> &'static str {
        "gzip"
    }

    fn extensions(&self) -> &[&'static str] {
        &["gz"]
    }

    fn test(&self, content: &dyn ContentLoader) -> bool {
        has_signature(content, &[GZIP_MAGIC])
    }

    fn entries(&self, container: Arc<dyn ContentLoader>) -> Result<Vec<ArchiveEntry>> {
        let description = container.describe();
        let file_name = base_name(&description);
        let name = Path::new(file_name)
            .file_stem()
            .map(|stem| stem.to_string_lossy().into_owned())
            .unwrap_or_else(|| file_name.to_string());

        Ok(vec![ArchiveEntry {
            extension: extension_of(&name),
            loader: Arc::new(GzipEntryLoader {
                container,
                entry: name.clone(),
            }),
            name,
        }])
    }
}

/// Decompresses the single entry of a gzip container
#[derive(Debug)]
pub struct GzipEntryLoader {
    container: Arc<dyn ContentLoader>,
    entry: String,
}

impl ContentLoader for GzipEntryLoader {
    fn load(&self) -> Result<Vec<u8>> {
        let mut content = Vec::new();
        let read = match self.container.path() {
            Some(path) => {
                let file = File::open(path).map_err(|e| IngestError::io(self.describe(), e))?;
                GzDecoder::new(BufReader::new(file)).read_to_end(&mut content)
            },
            None => {
                let compressed = self.container.load()?;
                GzDecoder::new(compressed.as_slice()).read_to_end(&mut content)
            },
        };
        read.map_err(|e| IngestError::archive(self.describe(), e))?;
        Ok(content)
    }

    fn describe(&self) -> String {
        format!("{}!{}", self.container.describe(), self.entry)
    }
}
