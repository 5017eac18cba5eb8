//! Datasources
//!
//! A [`Datasource`] is a named, lazily-loaded collection of raw records. It is
//! created cheaply during discovery (holding only a loader), materialized with
//! [`Datasource::load`] inside a batch, cut into contiguous [`RecordSlice`]s
//! for processing and finally released so memory is reclaimed.

use serde_json::Value;
use std::fmt;
use std::ops::{Deref, Range};
use std::sync::{Arc, Mutex, PoisonError};

use crate::error::Result;

/// Turns some content into a sequence of raw records
pub trait RecordLoader: Send + Sync + fmt::Debug {
    fn load(&self) -> Result<Vec<Value>>;
}

/// Lifecycle state of a datasource
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DatasourceState {
    Unloaded,
    Loaded,
    Released,
}

enum Records {
    Unloaded,
    Loaded(Arc<Vec<Value>>),
    Released,
}

struct Slot {
    records: Records,
    /// Bumped by every release; a load only stores what it read if no
    /// release happened in between
    releases: u64,
}

/// Named, lazily loaded collection of raw records
pub struct Datasource {
    name: String,
    loader: Arc<dyn RecordLoader>,
    slot: Mutex<Slot>,
}

impl Datasource {
    pub fn new(name: impl Into<String>, loader: Arc<dyn RecordLoader>) -> Self {
        Self {
            name: name.into(),
            loader,
            slot: Mutex::new(Slot {
                records: Records::Unloaded,
                releases: 0,
            }),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn state(&self) -> DatasourceState {
        match self.lock().records {
            Records::Unloaded => DatasourceState::Unloaded,
            Records::Loaded(_) => DatasourceState::Loaded,
            Records::Released => DatasourceState::Released,
        }
    }

    /// Materialize the records, returning how many were loaded
    ///
    /// Loading a released datasource reads it again. A release that lands
    /// while the loader is still running wins and the records read are
    /// dropped.
    pub fn load(&self) -> Result<usize> {
        let releases = self.lock().releases;
        let records = self.loader.load()?;
        let count = records.len();

        let mut slot = self.lock();
        if slot.releases == releases {
            slot.records = Records::Loaded(Arc::new(records));
        }
        Ok(count)
    }

    /// Number of loaded records (0 unless loaded)
    pub fn len(&self) -> usize {
        match &self.lock().records {
            Records::Loaded(records) => records.len(),
            _ => 0,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Split the loaded records into at most `n` contiguous slices
    ///
    /// Each slice holds `len / n` records and the last one also takes the
    /// remainder. With fewer records than slices everything lands in a single
    /// slice. Nothing is returned before the datasource is loaded.
    pub fn slices(&self, n: usize) -> Vec<RecordSlice> {
        let records = match &self.lock().records {
            Records::Loaded(records) => Arc::clone(records),
            _ => return Vec::new(),
        };

        let len = records.len();
        if len == 0 {
            return Vec::new();
        }

        let n = n.max(1);
        let chunk = len / n;
        if chunk == 0 {
            return vec![RecordSlice::new(records, 0..len)];
        }

        (0..n)
            .map(|i| {
                let start = i * chunk;
                let end = if i + 1 == n { len } else { start + chunk };
                RecordSlice::new(Arc::clone(&records), start..end)
            })
            .collect()
    }

    /// Drop the loaded records; the name stays available for reporting
    pub fn release(&self) {
        let mut slot = self.lock();
        slot.releases += 1;
        if !matches!(slot.records, Records::Unloaded) {
            slot.records = Records::Released;
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Slot> {
        self.slot.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl fmt::Display for Datasource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.name)
    }
}

impl fmt::Debug for Datasource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Datasource")
            .field("name", &self.name)
            .field("state", &self.state())
            .finish()
    }
}

/// Contiguous view into a loaded datasource
///
/// Slices share the loaded records, so they stay readable even if the
/// datasource is released while they are being processed.
#[derive(Clone)]
pub struct RecordSlice {
    records: Arc<Vec<Value>>,
    range: Range<usize>,
}

impl RecordSlice {
    fn new(records: Arc<Vec<Value>>, range: Range<usize>) -> Self {
        Self { records, range }
    }

    pub fn range(&self) -> Range<usize> {
        self.range.clone()
    }
}

impl Deref for RecordSlice {
    type Target = [Value];

    fn deref(&self) -> &[Value] {
        &self.records[self.range.clone()]
    }
}

impl fmt::Debug for RecordSlice {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RecordSlice").field("range", &self.range).finish()
    }
}
