//! The node contract
//!
//! Every function in the DAG implements [`Func`]: static metadata
//! ([`FuncInfo`]), a validity check, a one-time [`init`](Func::init), and a
//! streaming body ([`stream`](Func::stream)) that runs for the lifetime of
//! the vertex. The engine treats implementations as opaque; anything that
//! satisfies this contract can be a vertex.
//!
//! # Scheduling contract for `stream`
//!
//! - The body runs on its own tokio task and communicates only through the
//!   channels in its [`StreamCtx`].
//! - Dropping the [`StreamCtx`] (which happens when the body returns) closes
//!   the output channel exactly once. Do not stash the output sender
//!   anywhere that outlives the call.
//! - The body must emit at least one initial value before blocking
//!   indefinitely, so downstream consumers can complete their first input
//!   snapshot. Sources with no inputs still emit an initial event.
//! - Subsequent emissions happen only on observable change. A transformer
//!   may skip an input snapshot equal to the previous one, but once it
//!   accepts a fresh snapshot it must emit the computed value even when that
//!   value is unchanged: the engine's change tracker counts one emission per
//!   accepted snapshot, and the engine-level debounce keeps unchanged
//!   outputs from causing downstream work or ticks.
//! - The body must return promptly once [`Shutdown::cancelled`] resolves.
//!   Returning `Ok(())` or `Err(EngineError::Cancelled)` after cancellation
//!   are both clean; any other error is a node failure.

use crate::error::{EngineError, Result};
use crate::txn::Transaction;
use crate::types::FuncType;
use crate::value::Value;
use async_trait::async_trait;
use tokio::sync::{mpsc, watch};

/// Static descriptor of a function implementation.
///
/// The flags are advisory to consumers of the node; the engine does not
/// enforce purity.
#[derive(Debug, Clone)]
pub struct FuncInfo {
    /// The function signature: ordered named parameters and a return type.
    pub sig: FuncType,
    /// Output depends only on inputs.
    pub pure: bool,
    /// A caller may cache output by input.
    pub memo: bool,
    /// Safe to call synchronously during speculation.
    pub fast: bool,
    /// Safe to [`call`](Func::call) before `stream` starts.
    pub spec: bool,
}

impl FuncInfo {
    /// A descriptor with all advisory flags cleared.
    pub fn new(sig: FuncType) -> Self {
        Self {
            sig,
            pure: false,
            memo: false,
            fast: false,
            spec: false,
        }
    }

    /// Mark the function pure, memoizable, fast, and speculatable.
    pub fn pure(sig: FuncType) -> Self {
        Self {
            sig,
            pure: true,
            memo: true,
            fast: true,
            spec: true,
        }
    }
}

/// One-time initialisation data handed to [`Func::init`].
///
/// The log sink of the contract is the ambient `tracing` subscriber; nodes
/// log with `tracing` macros rather than through a handle carried here.
#[derive(Debug, Clone)]
pub struct FuncInit {
    /// Identity of the host the engine runs on.
    pub hostname: String,
    /// The vertex name this instance was added under.
    pub node: String,
    /// Verbose-diagnostics flag.
    pub debug: bool,
    /// Transaction handle for live graph mutation from inside the body.
    pub txn: Transaction,
}

/// Channel endpoints owned by a streaming body for the duration of
/// [`Func::stream`].
#[derive(Debug)]
pub struct StreamCtx {
    /// Input snapshots, one struct value per logical input event. Closed
    /// (returns `None`) when every producer feeding this node has closed.
    /// Sources receive an already-closed channel.
    pub input: mpsc::Receiver<Value>,
    /// Output values. Capacity 1: a send blocks while the previous value is
    /// still unconsumed, which is the intended backpressure.
    pub output: mpsc::Sender<Value>,
    /// Cooperative cancellation token.
    pub shutdown: Shutdown,
}

impl StreamCtx {
    pub(crate) fn new(
        input: mpsc::Receiver<Value>,
        output: mpsc::Sender<Value>,
        shutdown: Shutdown,
    ) -> Self {
        Self {
            input,
            output,
            shutdown,
        }
    }

    /// Receive the next input snapshot, or `None` when the input channel is
    /// closed or the node is cancelled.
    pub async fn next_input(&mut self) -> Option<Value> {
        tokio::select! {
            v = self.input.recv() => v,
            _ = self.shutdown.cancelled() => None,
        }
    }

    /// Send one output value, honouring cancellation while blocked on the
    /// downstream reader.
    pub async fn send(&mut self, value: Value) -> Result<()> {
        tokio::select! {
            res = self.output.send(value) => {
                res.map_err(|_| EngineError::Cancelled)
            }
            _ = self.shutdown.cancelled() => Err(EngineError::Cancelled),
        }
    }
}

/// Cooperative cancellation token threaded into every streaming body.
#[derive(Debug, Clone)]
pub struct Shutdown {
    rx: watch::Receiver<bool>,
}

impl Shutdown {
    /// Resolves once the engine cancels this node. Also resolves if the
    /// engine itself has gone away.
    pub async fn cancelled(&mut self) {
        loop {
            if *self.rx.borrow_and_update() {
                return;
            }
            if self.rx.changed().await.is_err() {
                return;
            }
        }
    }

    /// Non-blocking check.
    pub fn is_cancelled(&self) -> bool {
        *self.rx.borrow()
    }
}

/// Engine-side controller for a node's [`Shutdown`] token.
#[derive(Debug)]
pub(crate) struct ShutdownHandle {
    tx: watch::Sender<bool>,
}

impl ShutdownHandle {
    pub(crate) fn new() -> Self {
        let (tx, _rx) = watch::channel(false);
        Self { tx }
    }

    pub(crate) fn token(&self) -> Shutdown {
        Shutdown {
            rx: self.tx.subscribe(),
        }
    }

    pub(crate) fn cancel(&self) {
        // Receivers may all be gone already; that is fine.
        let _ = self.tx.send(true);
    }
}

/// Uniform interface every function/fact in the DAG implements.
///
/// Implementations are single-owner: the engine moves each instance behind a
/// mutex, calls [`init`](Func::init) once before start, then hands the
/// instance to its body task for the lifetime of [`stream`](Func::stream).
#[async_trait]
pub trait Func: Send + Sync {
    /// Static descriptor: signature and advisory flags.
    fn info(&self) -> FuncInfo;

    /// Check that the node is well constructed. Called before the node is
    /// added to a graph.
    fn validate(&self) -> Result<()> {
        Ok(())
    }

    /// One-time initialisation. Failure here is fatal for the node and
    /// surfaces as an engine error.
    fn init(&mut self, _init: FuncInit) -> Result<()> {
        Ok(())
    }

    /// The streaming body. See the module documentation for the scheduling
    /// contract.
    async fn stream(&mut self, ctx: StreamCtx) -> Result<()>;

    /// Synchronous evaluation used for speculation when
    /// [`FuncInfo::spec`] is true and no stream is required.
    async fn call(&self, _args: &[Value]) -> Result<Value> {
        Err(EngineError::CantSpeculate)
    }
}
