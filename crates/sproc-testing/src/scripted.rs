//! A connection manager whose connections replay a scripted sequence of outcomes.

use std::collections::VecDeque;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::Value;
use sproc_client::{DriverError, ProcedureConnection, ProcedureOutput};
use sproc_pool::ConnectionManager;
use thiserror::Error;
use tokio::time::Instant;

/// One scripted outcome of `call_procedure`.
#[derive(Debug, Clone)]
pub enum Step {
    /// Return the arguments as a single row.
    Echo,
    /// Return the given output.
    Succeed(ProcedureOutput),
    /// Fail with a transport error.
    Transport(String),
    /// Fail with a procedure-raised error.
    Business(String, Option<i32>),
    /// Never complete.
    Hang,
    /// Sleep, then echo.
    Delay(Duration),
}

/// Error returned by [`ScriptedManager::connect`] while connects are scripted to fail.
#[derive(Debug, Error)]
#[error("scripted connect failure")]
pub struct ConnectRefused;

/// A recorded call.
#[derive(Debug, Clone, PartialEq)]
pub struct CallRecord {
    /// Connection that served the call.
    pub connection_id: u64,
    /// Procedure name as passed by the invoker.
    pub procedure: String,
    /// Bound arguments.
    pub args: Vec<Value>,
    /// When the call started.
    pub started_at: Instant,
}

#[derive(Debug, Default)]
struct ScriptState {
    steps: Mutex<VecDeque<Step>>,
    log: Mutex<Vec<CallRecord>>,
    next_id: AtomicU64,
    connects: AtomicU64,
    closed: AtomicU64,
    calls: AtomicU64,
    in_flight: AtomicU32,
    peak_in_flight: AtomicU32,
    refuse_connects: AtomicU32,
    invalid: AtomicBool,
}

impl ScriptState {
    fn next_step(&self) -> Step {
        self.steps.lock().pop_front().unwrap_or(Step::Echo)
    }
}

/// Connection manager backed by a shared script.
///
/// Clones share the script and counters, so a test can keep one handle for
/// assertions while the pool owns another. When the script runs out, calls
/// echo their arguments.
#[derive(Debug, Clone, Default)]
pub struct ScriptedManager {
    state: Arc<ScriptState>,
}

impl ScriptedManager {
    /// Manager with an empty script.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue one step.
    pub fn push(&self, step: Step) -> &Self {
        self.state.steps.lock().push_back(step);
        self
    }

    /// Queue `count` copies of `step`.
    pub fn push_repeated(&self, step: Step, count: usize) -> &Self {
        let mut steps = self.state.steps.lock();
        steps.extend(std::iter::repeat_n(step, count));
        drop(steps);
        self
    }

    /// Fail the next `count` connects.
    pub fn refuse_connects(&self, count: u32) {
        self.state.refuse_connects.store(count, Ordering::SeqCst);
    }

    /// Make `is_valid` report every idle connection as dead.
    pub fn invalidate_idle(&self, invalid: bool) {
        self.state.invalid.store(invalid, Ordering::SeqCst);
    }

    /// Steps not yet consumed.
    #[must_use]
    pub fn remaining_steps(&self) -> usize {
        self.state.steps.lock().len()
    }

    /// Connections opened.
    #[must_use]
    pub fn connects(&self) -> u64 {
        self.state.connects.load(Ordering::SeqCst)
    }

    /// Connections dropped.
    #[must_use]
    pub fn closed(&self) -> u64 {
        self.state.closed.load(Ordering::SeqCst)
    }

    /// Connections currently alive, idle or checked out.
    #[must_use]
    pub fn open(&self) -> u64 {
        self.connects() - self.closed()
    }

    /// Calls started.
    #[must_use]
    pub fn calls(&self) -> u64 {
        self.state.calls.load(Ordering::SeqCst)
    }

    /// Highest number of calls running at once.
    #[must_use]
    pub fn peak_in_flight(&self) -> u32 {
        self.state.peak_in_flight.load(Ordering::SeqCst)
    }

    /// Every call made so far, in start order.
    #[must_use]
    pub fn call_log(&self) -> Vec<CallRecord> {
        self.state.log.lock().clone()
    }
}

#[async_trait]
impl ConnectionManager for ScriptedManager {
    type Connection = ScriptedConnection;
    type Error = ConnectRefused;

    async fn connect(&self) -> Result<ScriptedConnection, ConnectRefused> {
        let refused = self
            .state
            .refuse_connects
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if refused {
            return Err(ConnectRefused);
        }

        self.state.connects.fetch_add(1, Ordering::SeqCst);
        Ok(ScriptedConnection {
            id: self.state.next_id.fetch_add(1, Ordering::SeqCst) + 1,
            state: Arc::clone(&self.state),
        })
    }

    async fn is_valid(&self, _conn: &mut ScriptedConnection) -> bool {
        !self.state.invalid.load(Ordering::SeqCst)
    }
}

/// Connection produced by [`ScriptedManager`].
#[derive(Debug)]
pub struct ScriptedConnection {
    id: u64,
    state: Arc<ScriptState>,
}

impl ScriptedConnection {
    /// Connection id, starting at 1.
    #[must_use]
    pub fn id(&self) -> u64 {
        self.id
    }
}

impl Drop for ScriptedConnection {
    fn drop(&mut self) {
        self.state.closed.fetch_add(1, Ordering::SeqCst);
    }
}

/// Decrements the in-flight gauge even when the call future is dropped.
struct InFlight<'a>(&'a AtomicU32);

impl<'a> InFlight<'a> {
    fn enter(gauge: &'a AtomicU32, peak: &AtomicU32) -> Self {
        let now = gauge.fetch_add(1, Ordering::SeqCst) + 1;
        peak.fetch_max(now, Ordering::SeqCst);
        Self(gauge)
    }
}

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

#[async_trait]
impl ProcedureConnection for ScriptedConnection {
    async fn call_procedure(
        &mut self,
        name: &str,
        args: &[Value],
        _timeout: Duration,
    ) -> Result<ProcedureOutput, DriverError> {
        let state = Arc::clone(&self.state);
        state.calls.fetch_add(1, Ordering::SeqCst);
        state.log.lock().push(CallRecord {
            connection_id: self.id,
            procedure: name.to_string(),
            args: args.to_vec(),
            started_at: Instant::now(),
        });
        let _in_flight = InFlight::enter(&state.in_flight, &state.peak_in_flight);

        let echo = || ProcedureOutput::from_rows(vec![Value::Array(args.to_vec())]);
        match state.next_step() {
            Step::Echo => Ok(echo()),
            Step::Succeed(output) => Ok(output),
            Step::Transport(message) => Err(DriverError::transport(message)),
            Step::Business(message, code) => {
                let err = DriverError::procedure(message);
                Err(match code {
                    Some(code) => err.with_code(code),
                    None => err,
                })
            }
            Step::Hang => std::future::pending().await,
            Step::Delay(delay) => {
                tokio::time::sleep(delay).await;
                Ok(echo())
            }
        }
    }
}
