//! Content handler traits
//!
//! Handlers are chosen by extension. A [`FileHandler`] turns one piece of
//! content into datasources; an [`ArchiveHandler`] opens a container and
//! exposes its entries, which the provider resolves again by extension.

use std::sync::Arc;

use super::datasource::Datasource;
use super::loader::ContentLoader;
use crate::error::Result;

/// Produces datasources from content
pub trait FileHandler: Send + Sync {
    fn name(&self) -> &'static str;

    /// Extensions (lower case, no dot) this handler accepts
    fn extensions(&self) -> &[&'static str];

    /// Build the datasources for one piece of content
    ///
    /// Must not read the content eagerly; records are loaded later, inside
    /// the batch that processes the datasource.
    fn datasources(&self, name: &str, content: Arc<dyn ContentLoader>) -> Result<Vec<Datasource>>;

    /// Release any state held across the provider's lifetime
    fn cleanup(&self) {}
}

/// An entry exposed by an archive
#[derive(Debug, Clone)]
pub struct ArchiveEntry {
    /// Entry path inside the archive
    pub name: String,
    /// Lower-cased extension of the entry name
    pub extension: String,
    /// Loader reading this entry only
    pub loader: Arc<dyn ContentLoader>,
}

/// Opens archive containers
pub trait ArchiveHandler: Send + Sync {
    fn name(&self) -> &'static str;

    fn extensions(&self) -> &[&'static str];

    /// Signature check; a `false` means the container is skipped as corrupt
    fn test(&self, content: &dyn ContentLoader) -> bool;

    /// Enumerate the entries of a container, without extracting them
    fn entries(&self, container: Arc<dyn ContentLoader>) -> Result<Vec<ArchiveEntry>>;

    fn cleanup(&self) {}
}

/// True when `content` starts with any of `signatures`
pub(crate) fn has_signature(content: &dyn ContentLoader, signatures: &[&[u8]]) -> bool {
    let width = signatures.iter().map(|s| s.len()).max().unwrap_or(0);
    match content.head(width) {
        Ok(head) => signatures.iter().any(|sig| head.starts_with(sig)),
        Err(e) => {
            tracing::debug!(content = %content.describe(), error = %e, "Could not read signature");
            false
        },
    }
}
