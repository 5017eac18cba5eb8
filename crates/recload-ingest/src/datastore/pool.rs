//! Connection pool
//!
//! A bounded idle queue of live connections. Connections are health-checked
//! on the way out and on the way back; an unhealthy connection is closed and
//! replaced by a freshly spawned one, so it is never handed out again.
//! Spawning goes through the pool's [`RetryPolicy`], which makes acquire and
//! release wait out backend outages.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tracing::{debug, error, info, warn};

use super::connection::{Connection, ConnectionFactory};
use super::retry::RetryPolicy;
use crate::error::DatastoreResult;

/// Point-in-time pool counters
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PoolStats {
    pub connections_created: u64,
    pub connections_closed: u64,
    pub acquisitions: u64,
    pub health_check_failures: u64,
    pub idle: usize,
    pub checked_out: usize,
}

#[derive(Debug, Default)]
struct AtomicPoolStats {
    connections_created: AtomicU64,
    connections_closed: AtomicU64,
    acquisitions: AtomicU64,
    health_check_failures: AtomicU64,
}

pub struct ConnectionPool {
    name: String,
    factory: Arc<dyn ConnectionFactory>,
    max_size: usize,
    retry: RetryPolicy,
    idle: Mutex<VecDeque<Box<dyn Connection>>>,
    checked_out: AtomicUsize,
    stats: AtomicPoolStats,
}

impl ConnectionPool {
    pub fn new(
        name: impl Into<String>,
        factory: Arc<dyn ConnectionFactory>,
        max_size: usize,
        retry: RetryPolicy,
    ) -> Self {
        let max_size = max_size.max(1);
        Self {
            name: name.into(),
            factory,
            max_size,
            retry,
            idle: Mutex::new(VecDeque::with_capacity(max_size)),
            checked_out: AtomicUsize::new(0),
            stats: AtomicPoolStats::default(),
        }
    }

    pub fn max_size(&self) -> usize {
        self.max_size
    }

    pub fn idle(&self) -> usize {
        self.lock_idle().len()
    }

    pub fn checked_out(&self) -> usize {
        self.checked_out.load(Ordering::Acquire)
    }

    pub fn stats(&self) -> PoolStats {
        PoolStats {
            connections_created: self.stats.connections_created.load(Ordering::Relaxed),
            connections_closed: self.stats.connections_closed.load(Ordering::Relaxed),
            acquisitions: self.stats.acquisitions.load(Ordering::Relaxed),
            health_check_failures: self.stats.health_check_failures.load(Ordering::Relaxed),
            idle: self.idle(),
            checked_out: self.checked_out(),
        }
    }

    /// Open up to `max_size` connections, stopping at the first failure
    pub async fn init_pool(&self) {
        let mut opened = 0;
        for _ in 0..self.max_size {
            match self.spawn().await {
                Ok(connection) => {
                    self.lock_idle().push_back(connection);
                    opened += 1;
                },
                Err(e) => {
                    error!(pool = %self.name, backend = %self.factory.describe(), error = %e, "Could not initialize connection");
                    break;
                },
            }
        }
        info!(pool = %self.name, opened, max_size = self.max_size, "Connection pool initialized");
    }

    /// Hand out a healthy connection, spawning one when none is idle
    pub async fn acquire(&self) -> DatastoreResult<Box<dyn Connection>> {
        let connection = self.retry.run("acquire", move || self.try_acquire()).await?;
        self.checked_out.fetch_add(1, Ordering::AcqRel);
        self.stats.acquisitions.fetch_add(1, Ordering::Relaxed);
        Ok(connection)
    }

    async fn try_acquire(&self) -> DatastoreResult<Box<dyn Connection>> {
        let candidate = self.lock_idle().pop_front();
        match candidate {
            None => self.spawn().await,
            Some(mut connection) => {
                if connection.test().await {
                    return Ok(connection);
                }
                self.stats.health_check_failures.fetch_add(1, Ordering::Relaxed);
                warn!(pool = %self.name, "Idle connection failed health check, replacing it");
                self.discard(connection).await;
                self.spawn().await
            },
        }
    }

    /// Return a connection; unhealthy ones are closed and replaced
    pub async fn release(&self, mut connection: Box<dyn Connection>) -> DatastoreResult<()> {
        self.checked_out
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |n| n.checked_sub(1))
            .ok();

        if connection.test().await {
            self.push_idle(connection).await;
            return Ok(());
        }

        self.stats.health_check_failures.fetch_add(1, Ordering::Relaxed);
        warn!(pool = %self.name, "Released connection failed health check, replacing it");
        self.discard(connection).await;

        let replacement = self.retry.run("release", move || self.spawn()).await?;
        self.push_idle(replacement).await;
        Ok(())
    }

    /// Close every idle connection
    pub async fn close_all(&self) {
        let drained: Vec<Box<dyn Connection>> = self.lock_idle().drain(..).collect();
        let count = drained.len();
        for connection in drained {
            self.discard(connection).await;
        }
        debug!(pool = %self.name, closed = count, "Connection pool closed");
    }

    async fn spawn(&self) -> DatastoreResult<Box<dyn Connection>> {
        let connection = self.factory.connect().await?;
        self.stats.connections_created.fetch_add(1, Ordering::Relaxed);
        Ok(connection)
    }

    async fn push_idle(&self, connection: Box<dyn Connection>) {
        let overflow = {
            let mut idle = self.lock_idle();
            if idle.len() < self.max_size {
                idle.push_back(connection);
                None
            } else {
                Some(connection)
            }
        };
        if let Some(connection) = overflow {
            debug!(pool = %self.name, "Idle queue is full, closing connection");
            self.discard(connection).await;
        }
    }

    async fn discard(&self, mut connection: Box<dyn Connection>) {
        connection.close().await;
        self.stats.connections_closed.fetch_add(1, Ordering::Relaxed);
    }

    fn lock_idle(&self) -> MutexGuard<'_, VecDeque<Box<dyn Connection>>> {
        self.idle.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl std::fmt::Debug for ConnectionPool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConnectionPool")
            .field("name", &self.name)
            .field("max_size", &self.max_size)
            .field("stats", &self.stats())
            .finish()
    }
}
