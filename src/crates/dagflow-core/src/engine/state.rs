//! Per-vertex runtime state.

use crate::graph::Vertex;
use crate::node::ShutdownHandle;
use crate::value::Value;
use std::collections::{HashMap, HashSet};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use uuid::Uuid;

/// Runtime shell around one vertex: its notify endpoint, its shutdown
/// controller, lifecycle flags, and the join handles of its three tasks.
#[derive(Debug)]
pub(crate) struct NodeState {
    pub(crate) vertex: Vertex,
    /// Sender half of the notify channel; `None` once every producer of this
    /// vertex has closed (or when the vertex never had inputs).
    pub(crate) notify_tx: Option<mpsc::Sender<()>>,
    pub(crate) shutdown: ShutdownHandle,
    /// The output channel has closed.
    pub(crate) closed: bool,
    /// The vertex was removed by a committed transaction; its stop is
    /// expected and must not be reported as a failure.
    pub(crate) removed: bool,
    pub(crate) tasks: Vec<JoinHandle<()>>,
}

/// The live table plus the bookkeeping that must stay atomic with it.
///
/// All three fields are guarded by one writer lock: a value write and its
/// loaded-flag write must land together (readers of one must never observe
/// the other missing), and the change tracker (`dirty`) must observe values
/// and flags consistently.
#[derive(Debug, Default)]
pub(crate) struct Table {
    /// Most recently emitted value per vertex.
    pub(crate) values: HashMap<Uuid, Value>,
    /// Vertices that have produced at least one value.
    pub(crate) loaded: HashSet<Uuid>,
    /// Vertices whose inputs changed and whose recomputation has not yet
    /// been observed by their output reader. An aggregator defers snapshot
    /// delivery while any strict ancestor of its consumer is dirty; this is
    /// what keeps a fan-in from seeing one ancestor's new value with
    /// another's old one.
    pub(crate) dirty: HashSet<Uuid>,
}
