//! Bulk insert buffer

/// Default number of records per bulk insert
pub const DEFAULT_BULK_CAPACITY: usize = 5000;

/// Accumulates items until a capacity is reached
#[derive(Debug, Clone)]
pub struct BulkInsert<T> {
    capacity: usize,
    items: Vec<T>,
}

impl<T> BulkInsert<T> {
    /// New empty buffer; a capacity of 0 is treated as 1
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            capacity,
            items: Vec::with_capacity(capacity.min(DEFAULT_BULK_CAPACITY)),
        }
    }

    pub fn store(&mut self, item: T) {
        self.items.push(item);
    }

    /// True once the buffer holds at least `capacity` items
    pub fn is_completed(&self) -> bool {
        self.items.len() >= self.capacity
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn items(&self) -> &[T] {
        &self.items
    }

    pub fn into_items(self) -> Vec<T> {
        self.items
    }

    /// Swap in an empty buffer of the same capacity, returning the old one
    pub fn take(&mut self) -> Self {
        std::mem::replace(self, Self::new(self.capacity))
    }
}

impl<T> Default for BulkInsert<T> {
    fn default() -> Self {
        Self::new(DEFAULT_BULK_CAPACITY)
    }
}
