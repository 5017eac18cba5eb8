//! Handler registry
//!
//! Maps lower-cased extensions to handlers. The built-in set is assembled
//! from an explicit constructor list; a constructor that fails is logged and
//! skipped so one broken handler never prevents the others from loading.

use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, warn};

use super::gzip::GzipArchiveHandler;
use super::handler::{ArchiveHandler, FileHandler};
use super::json::{JsonFileHandler, JsonLinesFileHandler};
use super::zip::ZipArchiveHandler;
use crate::error::Result;

pub type FileHandlerConstructor = fn() -> Result<Arc<dyn FileHandler>>;
pub type ArchiveHandlerConstructor = fn() -> Result<Arc<dyn ArchiveHandler>>;

const FILE_HANDLERS: &[(&str, FileHandlerConstructor)] = &[
    ("json", JsonFileHandler::create),
    ("json-lines", JsonLinesFileHandler::create),
];

const ARCHIVE_HANDLERS: &[(&str, ArchiveHandlerConstructor)] = &[
    ("zip", ZipArchiveHandler::create),
    ("gzip", GzipArchiveHandler::create),
];

/// Extension to handler lookup
#[derive(Default)]
pub struct HandlerRegistry {
    files: Vec<Arc<dyn FileHandler>>,
    archives: Vec<Arc<dyn ArchiveHandler>>,
    file_extensions: HashMap<String, Arc<dyn FileHandler>>,
    archive_extensions: HashMap<String, Arc<dyn ArchiveHandler>>,
}

impl HandlerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry with every built-in handler that could be constructed
    pub fn builtin() -> Self {
        let mut registry = Self::new();
        for (label, constructor) in FILE_HANDLERS {
            registry.try_register_file_handler(label, *constructor);
        }
        for (label, constructor) in ARCHIVE_HANDLERS {
            registry.try_register_archive_handler(label, *constructor);
        }
        registry
    }

    /// Construct and register a file handler, logging construction failures
    pub fn try_register_file_handler(
        &mut self,
        label: &str,
        constructor: impl FnOnce() -> Result<Arc<dyn FileHandler>>,
    ) -> bool {
        match constructor() {
            Ok(handler) => {
                self.register_file_handler(handler);
                true
            },
            Err(e) => {
                warn!(handler = %label, error = %e, "Could not load file handler");
                false
            },
        }
    }

    pub fn try_register_archive_handler(
        &mut self,
        label: &str,
        constructor: impl FnOnce() -> Result<Arc<dyn ArchiveHandler>>,
    ) -> bool {
        match constructor() {
            Ok(handler) => {
                self.register_archive_handler(handler);
                true
            },
            Err(e) => {
                warn!(handler = %label, error = %e, "Could not load archive handler");
                false
            },
        }
    }

    /// Register a file handler; later registrations win per extension
    pub fn register_file_handler(&mut self, handler: Arc<dyn FileHandler>) {
        for ext in handler.extensions() {
            debug!(handler = handler.name(), extension = %ext, "Registered file handler");
            self.file_extensions
                .insert(ext.to_lowercase(), Arc::clone(&handler));
        }
        self.files.push(handler);
    }

    pub fn register_archive_handler(&mut self, handler: Arc<dyn ArchiveHandler>) {
        for ext in handler.extensions() {
            debug!(handler = handler.name(), extension = %ext, "Registered archive handler");
            self.archive_extensions
                .insert(ext.to_lowercase(), Arc::clone(&handler));
        }
        self.archives.push(handler);
    }

    pub fn file_handler(&self, extension: &str) -> Option<&Arc<dyn FileHandler>> {
        self.file_extensions.get(&extension.to_lowercase())
    }

    pub fn archive_handler(&self, extension: &str) -> Option<&Arc<dyn ArchiveHandler>> {
        self.archive_extensions.get(&extension.to_lowercase())
    }

    /// Every extension with a handler, sorted
    pub fn extensions(&self) -> Vec<&str> {
        let mut extensions: Vec<&str> = self
            .file_extensions
            .keys()
            .chain(self.archive_extensions.keys())
            .map(String::as_str)
            .collect();
        extensions.sort_unstable();
        extensions
    }

    /// Run every handler's cleanup hook once
    pub fn cleanup(&self) {
        for handler in &self.files {
            handler.cleanup();
        }
        for handler in &self.archives {
            handler.cleanup();
        }
    }
}

impl std::fmt::Debug for HandlerRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HandlerRegistry")
            .field("extensions", &self.extensions())
            .finish()
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use crate::error::IngestError;

    #[test]
    fn test_builtin_extensions() {
        let registry = HandlerRegistry::builtin();
        assert_eq!(registry.extensions(), vec!["gz", "json", "jsonl", "ndjson", "zip"]);
        assert!(registry.file_handler("JSON").is_some());
        assert!(registry.archive_handler("zip").is_some());
        assert!(registry.file_handler("zip").is_none());
        assert!(registry.file_handler("csv").is_none());
    }

    #[test]
    fn test_failing_constructor_is_skipped() {
        let mut registry = HandlerRegistry::new();
        let loaded = registry.try_register_file_handler("broken", || {
            Err(IngestError::config("missing optional dependency"))
        });
        assert!(!loaded);
        assert!(registry.try_register_file_handler("json", JsonFileHandler::create));
        assert_eq!(registry.extensions(), vec!["json"]);
    }
}
