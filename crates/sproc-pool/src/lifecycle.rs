//! Connection lifecycle hooks and bookkeeping.

use std::time::Duration;

use async_trait::async_trait;
use tokio::time::Instant;

/// Opens and validates connections on behalf of a [`Pool`](crate::Pool).
///
/// This is the seam to the underlying database driver. The pool never looks
/// inside a connection; it only asks the manager to create one and, when
/// `test_on_checkout` is set, whether an idle one is still usable.
#[async_trait]
pub trait ConnectionManager: Send + Sync + 'static {
    /// The driver connection type.
    type Connection: Send + 'static;

    /// The error returned when a connection cannot be opened.
    type Error: std::error::Error + Send + Sync + 'static;

    /// Open a new connection.
    async fn connect(&self) -> Result<Self::Connection, Self::Error>;

    /// Check whether an idle connection can still be used.
    async fn is_valid(&self, _conn: &mut Self::Connection) -> bool {
        true
    }
}

/// Metadata tracked for each pooled connection.
#[derive(Debug, Clone)]
pub struct ConnectionMetadata {
    /// Pool-unique connection id.
    pub id: u64,
    /// When the connection was opened.
    pub created_at: Instant,
    /// When the connection was last returned to the pool.
    pub last_used: Instant,
    /// How many times the connection has been checked out.
    pub checkout_count: u64,
}

impl ConnectionMetadata {
    pub(crate) fn new(id: u64) -> Self {
        let now = Instant::now();
        Self {
            id,
            created_at: now,
            last_used: now,
            checkout_count: 0,
        }
    }

    /// Time since the connection was last returned.
    #[must_use]
    pub fn idle_for(&self) -> Duration {
        self.last_used.elapsed()
    }

    /// Time since the connection was opened.
    #[must_use]
    pub fn age(&self) -> Duration {
        self.created_at.elapsed()
    }
}
