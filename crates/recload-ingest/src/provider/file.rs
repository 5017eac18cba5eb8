//! Filesystem data provider

use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, info, warn};
use walkdir::WalkDir;

use recload_common::Configuration;

use super::datasource::Datasource;
use super::loader::{extension_of, ContentLoader, FileContentLoader};
use super::registry::HandlerRegistry;
use super::DataProvider;
use crate::error::{IngestError, Result};

/// Archives nested deeper than this are skipped
pub const DEFAULT_MAX_ARCHIVE_DEPTH: usize = 8;

/// Discovers datasources under a directory tree
pub struct FileDataProvider {
    root: PathBuf,
    handlers: Arc<HandlerRegistry>,
    max_archive_depth: usize,
    datasources: Vec<Arc<Datasource>>,
}

impl FileDataProvider {
    pub fn new(root: impl Into<PathBuf>, handlers: Arc<HandlerRegistry>) -> Self {
        Self {
            root: root.into(),
            handlers,
            max_archive_depth: DEFAULT_MAX_ARCHIVE_DEPTH,
            datasources: Vec::new(),
        }
    }

    /// Build from a `datasource` section; `data-path` is required
    pub fn from_config(
        config: &Configuration,
        handlers: Arc<HandlerRegistry>,
    ) -> Result<Box<dyn DataProvider>> {
        let root = config
            .opt_string("data-path")
            .filter(|p| !p.is_empty())
            .ok_or_else(|| IngestError::config("datasource.data-path is required"))?;

        let mut provider = Self::new(root, handlers);
        provider.max_archive_depth = config.usize("max-archive-depth", DEFAULT_MAX_ARCHIVE_DEPTH);
        Ok(Box::new(provider))
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn resolve(&mut self, content: Arc<dyn ContentLoader>, extension: &str, depth: usize) {
        if let Some(archive) = self.handlers.archive_handler(extension).cloned() {
            let name = content.describe();
            if depth >= self.max_archive_depth {
                warn!(archive = %name, depth, "Archive nesting is too deep, skipping");
                return;
            }
            if !archive.test(content.as_ref()) {
                warn!(archive = %name, "Archive signature is illegal or file was corrupted");
                return;
            }
            match archive.entries(content) {
                Ok(entries) => {
                    for entry in entries {
                        self.resolve(entry.loader, &entry.extension, depth + 1);
                    }
                },
                Err(e) => warn!(archive = %name, error = %e, "Could not read archive entries"),
            }
        } else if let Some(handler) = self.handlers.file_handler(extension).cloned() {
            let name = content.describe();
            match handler.datasources(&name, content) {
                Ok(datasources) => {
                    for datasource in datasources {
                        debug!(datasource = %datasource, handler = handler.name(), "Discovered datasource");
                        self.datasources.push(Arc::new(datasource));
                    }
                },
                Err(e) => warn!(content = %name, error = %e, "Handler could not create datasources"),
            }
        } else {
            warn!(
                content = %content.describe(),
                extension = %extension,
                "There is no file handler for extension"
            );
        }
    }
}

impl DataProvider for FileDataProvider {
    fn name(&self) -> &str {
        "FileDataProvider"
    }

    fn initialize(&mut self) -> Result<()> {
        if !self.root.is_dir() {
            return Err(IngestError::io(
                self.root.display().to_string(),
                std::io::Error::new(std::io::ErrorKind::NotFound, "data path is not a directory"),
            ));
        }

        info!(root = %self.root.display(), "Discovering datasources");
        self.datasources.clear();

        let walker = WalkDir::new(&self.root).sort_by_file_name();
        for entry in walker {
            let entry = match entry {
                Ok(entry) => entry,
                Err(e) => {
                    warn!(error = %e, "Could not read directory entry");
                    continue;
                },
            };
            if !entry.file_type().is_file() {
                continue;
            }

            let extension = extension_of(entry.path());
            let content: Arc<dyn ContentLoader> = Arc::new(FileContentLoader::new(entry.path()));
            self.resolve(content, &extension, 0);
        }

        info!(root = %self.root.display(), total = self.datasources.len(), "Datasource discovery finished");
        Ok(())
    }

    fn datasources(&self) -> &[Arc<Datasource>] {
        &self.datasources
    }

    fn cleanup(&mut self) {
        self.handlers.cleanup();
    }
}
