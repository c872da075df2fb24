//! The time-varying function DAG engine
//!
//! The engine runs every vertex of a [`Graph`] as three cooperating tokio
//! tasks:
//!
//! - an **aggregator** (consumers only) that assembles struct-valued input
//!   snapshots from the live table ([`aggregator`]);
//! - a **body**, the node's [`stream`](crate::node::Func::stream) call;
//! - an **output reader** that installs produced values in the live table,
//!   wakes downstream aggregators, and emits external ticks
//!   ([`propagator`]).
//!
//! All inter-task channels have capacity 1, so a slow consumer slows its
//! producers directly. The external surface is a single tick stream: `Ok(())`
//! means "the table is in a new coherent state, read it now"; an error means
//! a node failed and shutdown is imminent.
//!
//! Live topology changes go through [`Transaction`] handles, which call back
//! into [`Core::commit_ops`] here: the writer side of the graph lock is the
//! engine-wide pause, and a commit swaps in a fully validated copy of the
//! graph, then starts and stops bodies to match.

pub(crate) mod aggregator;
pub(crate) mod propagator;
pub(crate) mod state;

use crate::error::{EngineError, Result};
use crate::graph::{Graph, Vertex};
use crate::node::{FuncInit, ShutdownHandle, StreamCtx};
use crate::refcount::RefCount;
use crate::txn::{apply_ops, Op, Transaction};
use crate::value::Value;
use parking_lot::{Mutex, RwLock};
use state::{NodeState, Table};
use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio_stream::wrappers::ReceiverStream;
use uuid::Uuid;

/// One item on the engine's output stream. `Ok(())` is the nil tick.
pub type Tick = std::result::Result<(), EngineError>;

/// Engine construction options.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Host identity passed to every node's init.
    pub hostname: String,
    /// Emit a tick after every vertex update instead of only at leaves.
    pub glitch: bool,
    /// Verbose-diagnostics flag passed to every node's init.
    pub debug: bool,
    /// Per-node deadline when joining tasks at shutdown. Exceeding it is
    /// logged, never fatal.
    pub shutdown_timeout: Duration,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            hostname: "localhost".to_string(),
            glitch: false,
            debug: false,
            shutdown_timeout: Duration::from_secs(3),
        }
    }
}

/// Shared engine internals. Everything the three per-vertex tasks and the
/// transaction layer touch lives here, behind the lock discipline described
/// in the module docs: refcounts, then the graph (pause) lock, then the
/// table writer; no lock is ever held across a channel send or receive.
pub(crate) struct Core {
    pub(crate) config: EngineConfig,
    /// Topology. The writer side is the engine-wide pause lock.
    pub(crate) graph: tokio::sync::RwLock<Graph>,
    pub(crate) refs: tokio::sync::Mutex<RefCount>,
    pub(crate) table: RwLock<Table>,
    pub(crate) nodes: Mutex<std::collections::HashMap<Uuid, NodeState>>,
    tick_tx: Mutex<Option<mpsc::Sender<Tick>>>,
    loaded_tx: watch::Sender<bool>,
    pub(crate) running: AtomicBool,
    pub(crate) closing: AtomicBool,
}

impl Core {
    fn tick_sender(&self) -> Option<mpsc::Sender<Tick>> {
        self.tick_tx.lock().clone()
    }

    /// True once every vertex present at gate time has loaded. One-shot.
    pub(crate) fn gate_open(&self) -> bool {
        *self.loaded_tx.borrow()
    }

    pub(crate) fn maybe_open_gate(&self, graph: &Graph) {
        if self.gate_open() {
            return;
        }
        let all = {
            let table = self.table.read();
            graph.vertices().all(|v| table.loaded.contains(&v.id()))
        };
        if all {
            tracing::debug!("all vertices loaded, ticks enabled");
            let _ = self.loaded_tx.send(true);
        }
    }

    pub(crate) async fn emit_tick(&self) {
        if let Some(tx) = self.tick_sender() {
            let _ = tx.send(Ok(())).await;
        }
    }

    /// Pulse one consumer's notify channel. Non-coalescing here; the
    /// aggregator coalesces by rebuilding from the table.
    pub(crate) fn pulse(&self, consumer: Uuid) {
        let tx = self
            .nodes
            .lock()
            .get(&consumer)
            .and_then(|n| n.notify_tx.clone());
        if let Some(tx) = tx {
            let _ = tx.try_send(());
        }
    }

    /// Forward a node failure to the tick stream and begin orderly shutdown.
    /// Only the first failure is reported.
    pub(crate) async fn node_failed(self: &Arc<Self>, node: &str, error: EngineError) {
        if self.closing.swap(true, Ordering::SeqCst) {
            return;
        }
        tracing::error!(node, error = %error, "node failed, shutting down");
        let err = match error {
            e @ EngineError::Node { .. } => e,
            e => EngineError::node(node, e.to_string()),
        };
        if let Some(tx) = self.tick_sender() {
            let _ = tx.send(Err(err)).await;
        }
        self.cancel_all().await;
    }

    /// Cancel every body, producers before consumers.
    pub(crate) async fn cancel_all(&self) {
        let order: Vec<Uuid> = {
            let graph = self.graph.read().await;
            match graph.topo_sort() {
                Ok(vs) => vs.iter().map(Vertex::id).collect(),
                Err(_) => graph.vertices().map(Vertex::id).collect(),
            }
        };
        let nodes = self.nodes.lock();
        for id in order {
            if let Some(state) = nodes.get(&id) {
                state.shutdown.cancel();
            }
        }
    }

    /// Wire up and spawn the three tasks for one vertex.
    ///
    /// Sources get their input channel closed immediately. New aggregators
    /// are primed with one pulse so a consumer whose producers already
    /// loaded computes without waiting for a fresh upstream event.
    pub(crate) fn start_vertex(self: &Arc<Self>, vertex: &Vertex, has_inputs: bool) {
        let (input_tx, input_rx) = mpsc::channel(1);
        let (output_tx, output_rx) = mpsc::channel(1);
        let shutdown = ShutdownHandle::new();
        let token = shutdown.token();
        let mut tasks = Vec::with_capacity(3);
        let mut notify = None;

        if has_inputs {
            let (notify_tx, notify_rx) = mpsc::channel(1);
            let _ = notify_tx.try_send(());
            notify = Some(notify_tx);
            tasks.push(tokio::spawn(aggregator::aggregator(
                self.clone(),
                vertex.clone(),
                notify_rx,
                input_tx,
            )));
        } else {
            drop(input_tx);
        }

        let ctx = StreamCtx::new(input_rx, output_tx, token);
        tasks.push(tokio::spawn(run_body(self.clone(), vertex.clone(), ctx)));
        tasks.push(tokio::spawn(propagator::output_reader(
            self.clone(),
            vertex.clone(),
            output_rx,
        )));

        self.nodes.lock().insert(
            vertex.id(),
            NodeState {
                vertex: vertex.clone(),
                notify_tx: notify,
                shutdown,
                closed: false,
                removed: false,
                tasks,
            },
        );
        tracing::debug!(node = vertex.name(), has_inputs, "vertex started");
    }

    /// Join a removed vertex's tasks off the pause lock, then drop its table
    /// entry and runtime state.
    fn spawn_reaper(self: &Arc<Self>, id: Uuid, name: String, handles: Vec<JoinHandle<()>>) {
        let core = self.clone();
        tokio::spawn(async move {
            for handle in handles {
                if tokio::time::timeout(core.config.shutdown_timeout, handle)
                    .await
                    .is_err()
                {
                    tracing::warn!(node = %name, "shutdown deadline exceeded");
                }
            }
            {
                let mut table = core.table.write();
                table.values.remove(&id);
                table.loaded.remove(&id);
                table.dirty.remove(&id);
            }
            core.nodes.lock().remove(&id);
            tracing::debug!(node = %name, "vertex reaped");
        });
    }

    /// Apply one buffered operation list atomically.
    ///
    /// Lock order: refcounts, then the pause (graph writer) lock; the table
    /// writer is taken briefly for removed entries. The operations are
    /// applied to copies first; only a copy that garbage-collects cleanly,
    /// sorts topologically, and passes static validation replaces the real
    /// graph. On rejection the graph and the refcounts are untouched.
    pub(crate) async fn commit_ops(self: &Arc<Self>, ops: &[Op]) -> Result<()> {
        let mut refs = self.refs.lock().await;
        let mut graph = self.graph.write().await;

        let mut graph_next = graph.clone();
        let mut refs_next = refs.clone();
        apply_ops(&mut graph_next, &mut refs_next, ops)?;
        let removed = match refs_next.gc(&mut graph_next) {
            Ok(removed) => removed,
            Err(e) => {
                tracing::error!(error = %e, "refcount invariant violated, aborting");
                std::process::abort();
            }
        };
        graph_next.topo_sort()?;
        graph_next.validate()?;

        let before: HashSet<Uuid> = graph.vertices().map(Vertex::id).collect();
        let added: Vec<Vertex> = graph_next
            .vertices()
            .filter(|v| !before.contains(&v.id()))
            .cloned()
            .collect();
        *graph = graph_next;
        *refs = refs_next;
        tracing::debug!(
            ops = ops.len(),
            added = added.len(),
            removed = removed.len(),
            "transaction committed"
        );

        let mut init_err = None;
        if self.running.load(Ordering::SeqCst) {
            for id in &removed {
                let taken = {
                    let mut nodes = self.nodes.lock();
                    nodes.get_mut(id).map(|state| {
                        state.removed = true;
                        state.notify_tx = None;
                        state.shutdown.cancel();
                        (
                            state.vertex.name().to_string(),
                            std::mem::take(&mut state.tasks),
                        )
                    })
                };
                if let Some((name, handles)) = taken {
                    self.spawn_reaper(*id, name, handles);
                }
            }
            for vertex in &added {
                let init = FuncInit {
                    hostname: self.config.hostname.clone(),
                    node: vertex.name().to_string(),
                    debug: self.config.debug,
                    txn: Transaction::new(self.clone()),
                };
                let res = match vertex.func().try_lock() {
                    Ok(mut func) => func.init(init),
                    Err(_) => Err(EngineError::construction(
                        "node instance is busy at init time",
                    )),
                };
                match res {
                    Ok(()) => {
                        let has_inputs = graph.in_degree(vertex.id()) > 0;
                        self.start_vertex(vertex, has_inputs);
                    }
                    Err(e) => {
                        init_err = Some((vertex.name().to_string(), e));
                        break;
                    }
                }
            }
            // Wake every aggregator: deferred rebuilds and consumers whose
            // incoming edges changed must re-evaluate against the committed
            // topology.
            let nodes = self.nodes.lock();
            for state in nodes.values() {
                if let Some(tx) = &state.notify_tx {
                    let _ = tx.try_send(());
                }
            }
        } else {
            let mut table = self.table.write();
            for id in &removed {
                table.values.remove(id);
                table.loaded.remove(id);
                table.dirty.remove(id);
            }
        }

        drop(graph);
        drop(refs);

        if let Some((name, e)) = init_err {
            // The ops applied; the init failure is an engine failure, not a
            // commit rejection.
            self.node_failed(&name, e).await;
        }
        Ok(())
    }
}

async fn run_body(core: Arc<Core>, vertex: Vertex, ctx: StreamCtx) {
    tracing::debug!(node = vertex.name(), "body starting");
    let result = {
        let mut func = vertex.func().lock().await;
        func.stream(ctx).await
    };
    match result {
        Ok(()) => {}
        Err(e) if e.is_cancelled() => {}
        Err(e) => core.node_failed(vertex.name(), e).await,
    }
}

/// Holds the engine-wide pause: no input or output propagation runs while
/// this guard is alive. Dropping it resumes the engine.
pub struct PauseGuard<'a> {
    _guard: tokio::sync::RwLockWriteGuard<'a, Graph>,
}

/// The running engine: owns the graph, the live table, and the per-vertex
/// tasks, and exposes the external tick stream.
pub struct Engine {
    core: Arc<Core>,
    tick_rx: Option<mpsc::Receiver<Tick>>,
    inited: bool,
}

impl Engine {
    /// Statically validate a graph and build an engine around it.
    ///
    /// Checks acyclicity, arg-name existence and uniqueness, arg coverage,
    /// and producer/consumer type compatibility, then primes the refcount
    /// store so every initial vertex and edge is accounted for.
    pub fn new(graph: Graph, config: EngineConfig) -> Result<Self> {
        graph.topo_sort()?;
        graph.validate()?;

        let mut refs = RefCount::new();
        for vertex in graph.vertices() {
            refs.vertex_inc(vertex.id());
        }
        for (producer, consumer, edge) in graph.edges() {
            refs.edge_inc(producer, consumer, edge);
        }

        let (tick_tx, tick_rx) = mpsc::channel(1);
        let (loaded_tx, _) = watch::channel(false);
        Ok(Self {
            core: Arc::new(Core {
                config,
                graph: tokio::sync::RwLock::new(graph),
                refs: tokio::sync::Mutex::new(refs),
                table: RwLock::new(Table::default()),
                nodes: Mutex::new(std::collections::HashMap::new()),
                tick_tx: Mutex::new(Some(tick_tx)),
                loaded_tx,
                running: AtomicBool::new(false),
                closing: AtomicBool::new(false),
            }),
            tick_rx: Some(tick_rx),
            inited: false,
        })
    }

    /// Call every node's init, producers before consumers.
    pub async fn init(&mut self) -> Result<()> {
        if self.inited {
            return Ok(());
        }
        let order = {
            let graph = self.core.graph.read().await;
            graph.topo_sort()?
        };
        for vertex in order {
            let init = FuncInit {
                hostname: self.core.config.hostname.clone(),
                node: vertex.name().to_string(),
                debug: self.core.config.debug,
                txn: Transaction::new(self.core.clone()),
            };
            let mut func = vertex.func().lock().await;
            func.init(init)
                .map_err(|e| EngineError::node(vertex.name(), e.to_string()))?;
        }
        self.inited = true;
        Ok(())
    }

    /// Start every vertex's tasks. Runs [`init`](Self::init) first if it has
    /// not run yet.
    pub async fn run(&mut self) -> Result<()> {
        if !self.inited {
            self.init().await?;
        }
        let graph = self.core.graph.read().await;
        let order = graph.topo_sort()?;
        self.core.running.store(true, Ordering::SeqCst);
        for vertex in &order {
            let has_inputs = graph.in_degree(vertex.id()) > 0;
            self.core.start_vertex(vertex, has_inputs);
        }
        tracing::debug!(vertices = order.len(), "engine running");
        Ok(())
    }

    /// Take the external tick stream. May be taken once.
    pub fn stream(&mut self) -> Result<ReceiverStream<Tick>> {
        self.tick_rx
            .take()
            .map(ReceiverStream::new)
            .ok_or_else(|| EngineError::construction("tick stream already taken"))
    }

    /// A fresh transaction handle for mutating the graph from outside.
    pub fn txn(&self) -> Transaction {
        Transaction::new(self.core.clone())
    }

    /// The most recent value a vertex produced, if any. Readers should call
    /// this after receiving a nil tick.
    pub fn value_of(&self, vertex: &Vertex) -> Option<Value> {
        self.core.table.read().values.get(&vertex.id()).cloned()
    }

    /// Resolves once every vertex has produced its first value.
    pub async fn wait_loaded(&self) {
        let mut rx = self.core.loaded_tx.subscribe();
        loop {
            if *rx.borrow_and_update() {
                return;
            }
            if rx.changed().await.is_err() {
                return;
            }
        }
    }

    /// Pause input/output propagation until the returned guard drops.
    pub async fn pause(&self) -> PauseGuard<'_> {
        PauseGuard {
            _guard: self.core.graph.write().await,
        }
    }

    /// Number of vertices currently in the graph.
    pub async fn vertex_count(&self) -> usize {
        self.core.graph.read().await.vertex_count()
    }

    /// Current reference count of a vertex.
    pub async fn refcount_of(&self, vertex: &Vertex) -> i64 {
        self.core.refs.lock().await.vertex_count(vertex.id())
    }

    /// Check the refcount/graph agreement invariant.
    pub async fn verify_refcounts(&self) -> Result<()> {
        let refs = self.core.refs.lock().await;
        let graph = self.core.graph.read().await;
        refs.agrees_with(&graph)
    }

    /// DOT rendering of the current topology.
    pub async fn dot(&self) -> String {
        let graph = self.core.graph.read().await;
        crate::visualization::to_dot(&graph)
    }

    /// Cancel every body in topological order, join every task (bounded by
    /// the configured deadline), and close the tick channel.
    pub async fn close(&mut self) {
        self.core.closing.store(true, Ordering::SeqCst);
        self.core.cancel_all().await;

        let drained: Vec<(String, Vec<JoinHandle<()>>)> = {
            let mut nodes = self.core.nodes.lock();
            nodes
                .drain()
                .map(|(_, mut state)| {
                    (
                        state.vertex.name().to_string(),
                        std::mem::take(&mut state.tasks),
                    )
                })
                .collect()
        };
        for (name, tasks) in drained {
            for task in tasks {
                if tokio::time::timeout(self.core.config.shutdown_timeout, task)
                    .await
                    .is_err()
                {
                    tracing::warn!(node = %name, "shutdown deadline exceeded");
                }
            }
        }
        *self.core.tick_tx.lock() = None;
        self.core.running.store(false, Ordering::SeqCst);
        tracing::debug!("engine closed");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_empty_graph_runs_and_closes() {
        let mut engine = Engine::new(Graph::new(), EngineConfig::default()).unwrap();
        engine.run().await.unwrap();
        engine.close().await;
    }

    #[tokio::test]
    async fn test_stream_taken_once() {
        let mut engine = Engine::new(Graph::new(), EngineConfig::default()).unwrap();
        assert!(engine.stream().is_ok());
        assert!(engine.stream().is_err());
    }
}
