//! # sproc-testing
//!
//! Test infrastructure for stored-procedure execution.
//!
//! - [`ScriptedManager`]: a connection manager whose connections replay a
//!   queue of outcomes (success, transport error, procedure error, hang)
//!   and count connects, drops and calls
//! - [`install_tracing_capture`]: a thread-local `tracing` subscriber that
//!   records events for assertions on the request log channel
//! - [`fixtures`]: small builders for invokers and facades over a scripted pool

#![warn(missing_docs)]
#![deny(unsafe_code)]

pub mod fixtures;
pub mod scripted;
pub mod tracing_capture;

pub use scripted::{CallRecord, ConnectRefused, ScriptedConnection, ScriptedManager, Step};
pub use tracing_capture::{CapturedEvent, CapturedLogs, install_tracing_capture};
