//! ZIP archives

use std::fs::File;
use std::io::{BufReader, Cursor, Read, Seek};
use std::sync::Arc;
use tracing::debug;
use zip::ZipArchive;

use super::handler::{has_signature, ArchiveEntry, ArchiveHandler};
use super::loader::{extension_of, ContentLoader};
use crate::error::{IngestError, Result};

const LOCAL_FILE_HEADER: &[u8] = b"PK\x03\x04";
const EMPTY_ARCHIVE: &[u8] = b"PK\x05\x06";
const SPANNED_ARCHIVE: &[u8] = b"PK\x07\x08";

trait ReadSeek: Read + Seek + Send {}
impl<T: Read + Seek + Send> ReadSeek for T {}

fn open_archive(container: &dyn ContentLoader) -> Result<ZipArchive<Box<dyn ReadSeek>>> {
    let reader: Box<dyn ReadSeek> = match container.path() {
        Some(path) => {
            let file = File::open(path).map_err(|e| IngestError::io(container.describe(), e))?;
            Box::new(BufReader::new(file))
        },
        None => Box::new(Cursor::new(container.load()?)),
    };
    ZipArchive::new(reader).map_err(|e| IngestError::archive(container.describe(), e))
}

/// Handler for `.zip` containers
#[derive(Debug, Default)]
pub struct ZipArchiveHandler;

impl ZipArchiveHandler {
    pub fn create() -> Result<Arc<dyn ArchiveHandler>> {
        Ok(Arc::new(Self))
    }
}

impl ArchiveHandler for ZipArchiveHandler {
    fn name(&self) -> &'static str {
        "zip"
    }

    fn extensions(&self) -> &[&'static str] {
        &["zip"]
    }

    fn test(&self, content: &dyn ContentLoader) -> bool {
        has_signature(content, &[LOCAL_FILE_HEADER, EMPTY_ARCHIVE, SPANNED_ARCHIVE])
    }

    fn entries(&self, container: Arc<dyn ContentLoader>) -> Result<Vec<ArchiveEntry>> {
        let mut archive = open_archive(container.as_ref())?;
        let mut entries = Vec::with_capacity(archive.len());

        for index in 0..archive.len() {
            let file = archive
                .by_index(index)
                .map_err(|e| IngestError::archive(container.describe(), e))?;
            if file.is_dir() {
                continue;
            }
            let name = file.name().to_string();
            debug!(archive = %container.describe(), entry = %name, "Found archive entry");

            entries.push(ArchiveEntry {
                extension: extension_of(&name),
                loader: Arc::new(ZipEntryLoader {
                    container: Arc::clone(&container),
                    entry: name.clone(),
                }),
                name,
            });
        }

        Ok(entries)
    }
}

/// Reads a single entry of a ZIP container
#[derive(Debug)]
pub struct ZipEntryLoader {
    container: Arc<dyn ContentLoader>,
    entry: String,
}

impl ContentLoader for ZipEntryLoader {
    fn load(&self) -> Result<Vec<u8>> {
        let mut archive = open_archive(self.container.as_ref())?;
        let mut file = archive
            .by_name(&self.entry)
            .map_err(|e| IngestError::archive(self.describe(), e))?;

        let mut content = Vec::with_capacity(usize::try_from(file.size()).unwrap_or(0));
        file.read_to_end(&mut content)
            .map_err(|e| IngestError::io(self.describe(), e))?;
        Ok(content)
    }

    fn describe(&self) -> String {
        format!("{}!{}", self.container.describe(), self.entry)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
pub(crate) mod tests {
    use super::*;
    use crate::provider::loader::{BytesContentLoader, FileContentLoader};
    use std::io::Write;
    use zip::write::SimpleFileOptions;

    /// Build an in-memory zip from `(name, content)` pairs
    pub(crate) fn zip_bytes(entries: &[(&str, &[u8])]) -> Vec<u8> {
        let mut writer = zip::ZipWriter::new(Cursor::new(Vec::new()));
        for (name, content) in entries {
            if name.ends_with('/') {
                writer.add_directory(*name, SimpleFileOptions::default()).unwrap();
            } else {
                writer.start_file(*name, SimpleFileOptions::default()).unwrap();
                writer.write_all(content).unwrap();
            }
        }
        writer.finish().unwrap().into_inner()
    }

    #[test]
    fn test_signature() {
        let good = BytesContentLoader::new("a.zip", zip_bytes(&[("c.json", b"[]".as_slice())]));
        let bad = BytesContentLoader::new("d.zip", b"this is not a zip".to_vec());
        assert!(ZipArchiveHandler.test(&good));
        assert!(!ZipArchiveHandler.test(&bad));
    }

    #[test]
    fn test_entries_skip_directories() {
        let bytes = zip_bytes(&[
            ("dir/", b"".as_slice()),
            ("dir/c.json", b"[1]".as_slice()),
            ("README.TXT", b"hi".as_slice()),
        ]);
        let container: Arc<dyn ContentLoader> = Arc::new(BytesContentLoader::new("b.zip", bytes));
        let entries = ZipArchiveHandler.entries(container).unwrap();

        let names: Vec<(&str, &str)> =
            entries.iter().map(|e| (e.name.as_str(), e.extension.as_str())).collect();
        assert_eq!(names, vec![("dir/c.json", "json"), ("README.TXT", "txt")]);
        assert_eq!(entries[0].loader.describe(), "b.zip!dir/c.json");
        assert_eq!(entries[0].loader.load().unwrap(), b"[1]");
    }

    #[test]
    fn test_truncated_archive_fails_enumeration() {
        let mut bytes = zip_bytes(&[("c.json", b"[1, 2, 3]".as_slice())]);
        bytes.truncate(12);
        let container: Arc<dyn ContentLoader> = Arc::new(BytesContentLoader::new("t.zip", bytes));
        assert!(ZipArchiveHandler.test(container.as_ref()));
        assert!(matches!(
            ZipArchiveHandler.entries(container),
            Err(IngestError::Archive { .. })
        ));
    }

    #[test]
    fn test_nested_archive_entry() {
        let inner = zip_bytes(&[("deep.json", br#"{"k": 1}"#.as_slice())]);
        let outer = zip_bytes(&[("inner.zip", inner.as_slice())]);
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("outer.zip");
        std::fs::write(&path, outer).unwrap();

        let container: Arc<dyn ContentLoader> = Arc::new(FileContentLoader::new(&path));
        let outer_entries = ZipArchiveHandler.entries(container).unwrap();
        assert!(ZipArchiveHandler.test(outer_entries[0].loader.as_ref()));

        let inner_entries = ZipArchiveHandler.entries(Arc::clone(&outer_entries[0].loader)).unwrap();
        assert_eq!(
            inner_entries[0].loader.describe(),
            format!("{}!inner.zip!deep.json", path.display())
        );
        assert_eq!(inner_entries[0].loader.load().unwrap(), br#"{"k": 1}"#);
    }
}
