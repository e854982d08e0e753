//! # sproc-pool
//!
//! Bounded async connection pool used by the stored-procedure invoker.
//!
//! The pool is driver-agnostic: a [`ConnectionManager`] opens and validates
//! connections, and the pool takes care of reuse, capacity and release.
//!
//! ## Features
//!
//! - Hard cap on concurrent checkouts (`max_connections`)
//! - Bounded wait for a free slot (`connection_timeout`)
//! - Idle reuse with expiry (`idle_timeout`)
//! - Optional validity check on checkout
//! - Drop-based release, so a connection goes back on every exit path
//! - Status gauges and cumulative metrics for observability
//!
//! ## Example
//!
//! ```rust,ignore
//! use sproc_pool::{Pool, PoolConfig};
//! use std::time::Duration;
//!
//! let config = PoolConfig::new()
//!     .min_connections(2)
//!     .max_connections(20)
//!     .connection_timeout(Duration::from_secs(5));
//!
//! let pool = Pool::new("primary", manager, config)?;
//!
//! let conn = pool.get().await?;
//! // Use connection...
//! drop(conn);
//!
//! let status = pool.status();
//! println!("Pool utilization: {:.1}%", status.utilization());
//!
//! let metrics = pool.metrics();
//! println!("Checkout success rate: {:.2}", metrics.checkout_success_rate());
//! ```

#![warn(missing_docs)]
#![deny(unsafe_code)]

pub mod config;
pub mod error;
pub mod lifecycle;
pub mod pool;

// Configuration
pub use config::PoolConfig;

// Error types
pub use error::PoolError;

// Pool types
pub use pool::{Pool, PoolBuilder, PoolMetrics, PoolStatus, PooledConnection};

// Lifecycle management
pub use lifecycle::{ConnectionManager, ConnectionMetadata};
