//! Transactional graph mutation
//!
//! Every node (and any outside caller) mutates the running graph through a
//! [`Transaction`] handle. The four mutation operations are buffered on the
//! handle; nothing touches the graph until [`commit`](Transaction::commit),
//! which applies the whole buffer atomically against the paused engine:
//! either every operation lands, or (on cycle or validation rejection) none
//! does.
//!
//! Adds are refcount *increments* and deletes are *decrements*; an entity
//! only physically enters the graph when its count rises from zero and only
//! leaves when garbage collection sees it at zero. This is what lets a
//! dynamic subgraph builder add the same concrete vertex many times without
//! one user's delete tearing it away from the others.
//!
//! Each successful commit prepends the inverse of its operations to the
//! handle's undo log. [`reverse`](Transaction::reverse) commits the whole
//! log (rolling back everything since the last
//! [`erase`](Transaction::erase)); `erase` discards the log, which is how a
//! builder protects its long-lived bridge vertices from later rewinds.

use crate::engine::Core;
use crate::error::Result;
use crate::graph::{Edge, Graph, Vertex};
use crate::refcount::RefCount;
use parking_lot::Mutex;
use std::fmt;
use std::sync::Arc;

/// One buffered graph mutation.
#[derive(Debug, Clone)]
pub(crate) enum Op {
    AddVertex(Vertex),
    AddEdge {
        producer: Vertex,
        consumer: Vertex,
        edge: Edge,
    },
    DeleteVertex(Vertex),
    DeleteEdge {
        producer: Vertex,
        consumer: Vertex,
        edge: Edge,
    },
}

fn invert(op: &Op) -> Op {
    match op {
        Op::AddVertex(v) => Op::DeleteVertex(v.clone()),
        Op::DeleteVertex(v) => Op::AddVertex(v.clone()),
        Op::AddEdge {
            producer,
            consumer,
            edge,
        } => Op::DeleteEdge {
            producer: producer.clone(),
            consumer: consumer.clone(),
            edge: edge.clone(),
        },
        Op::DeleteEdge {
            producer,
            consumer,
            edge,
        } => Op::AddEdge {
            producer: producer.clone(),
            consumer: consumer.clone(),
            edge: edge.clone(),
        },
    }
}

/// The inverse operation list: each op inverted, in reverse order.
pub(crate) fn invert_ops(ops: &[Op]) -> Vec<Op> {
    ops.iter().rev().map(invert).collect()
}

/// Apply operations to a graph and its refcount store.
///
/// Adds increment counts and physically insert on the zero crossing; deletes
/// only decrement, leaving physical removal to the garbage collector. Edge
/// operations carry both vertex handles so an edge increment can insert an
/// endpoint whose count rises from zero.
pub(crate) fn apply_ops(graph: &mut Graph, refs: &mut RefCount, ops: &[Op]) -> Result<()> {
    for op in ops {
        match op {
            Op::AddVertex(v) => {
                if refs.vertex_inc(v.id()) {
                    graph.add_vertex(v);
                }
            }
            Op::AddEdge {
                producer,
                consumer,
                edge,
            } => {
                refs.edge_inc(producer.id(), consumer.id(), edge);
                graph.add_edge(producer, consumer, edge.clone())?;
            }
            Op::DeleteVertex(v) => {
                refs.vertex_dec(v.id());
            }
            Op::DeleteEdge {
                producer,
                consumer,
                edge,
            } => {
                refs.edge_dec(producer.id(), consumer.id(), edge);
            }
        }
    }
    Ok(())
}

/// A buffered handle for mutating the running graph.
///
/// Cheap to clone; clones share the same buffer and undo log. The handle is
/// re-entrant on its own mutex but single-owner per node; independent nodes
/// hold independent handles.
#[derive(Clone)]
pub struct Transaction {
    inner: Arc<TxnInner>,
}

struct TxnInner {
    core: Arc<Core>,
    buffer: Mutex<Vec<Op>>,
    undo: Mutex<Vec<Op>>,
}

impl Transaction {
    pub(crate) fn new(core: Arc<Core>) -> Self {
        Self {
            inner: Arc::new(TxnInner {
                core,
                buffer: Mutex::new(Vec::new()),
                undo: Mutex::new(Vec::new()),
            }),
        }
    }

    /// Buffer a vertex addition (a refcount increment).
    pub fn add_vertex(&self, vertex: &Vertex) -> &Self {
        self.inner
            .buffer
            .lock()
            .push(Op::AddVertex(vertex.clone()));
        self
    }

    /// Buffer an edge addition (one increment per arg name, plus both
    /// endpoints).
    pub fn add_edge(&self, producer: &Vertex, consumer: &Vertex, edge: Edge) -> &Self {
        self.inner.buffer.lock().push(Op::AddEdge {
            producer: producer.clone(),
            consumer: consumer.clone(),
            edge,
        });
        self
    }

    /// Buffer a vertex deletion (a refcount decrement).
    pub fn delete_vertex(&self, vertex: &Vertex) -> &Self {
        self.inner
            .buffer
            .lock()
            .push(Op::DeleteVertex(vertex.clone()));
        self
    }

    /// Buffer an edge deletion (one decrement per arg name, plus both
    /// endpoints).
    pub fn delete_edge(&self, producer: &Vertex, consumer: &Vertex, edge: Edge) -> &Self {
        self.inner.buffer.lock().push(Op::DeleteEdge {
            producer: producer.clone(),
            consumer: consumer.clone(),
            edge,
        });
        self
    }

    /// Number of buffered, uncommitted operations.
    pub fn pending(&self) -> usize {
        self.inner.buffer.lock().len()
    }

    /// Apply the buffer atomically.
    ///
    /// On success the buffer's inverse is prepended to the undo log and the
    /// buffer is cleared. On rejection (cycle or validation failure) the
    /// graph is untouched and the buffer is restored so the caller can
    /// retry, fall back, or shut down.
    pub async fn commit(&self) -> Result<()> {
        let ops: Vec<Op> = std::mem::take(&mut *self.inner.buffer.lock());
        if ops.is_empty() {
            return Ok(());
        }
        match self.inner.core.commit_ops(&ops).await {
            Ok(()) => {
                let mut undo = self.inner.undo.lock();
                let mut inverse = invert_ops(&ops);
                inverse.extend(undo.drain(..));
                *undo = inverse;
                Ok(())
            }
            Err(e) => {
                let mut buffer = self.inner.buffer.lock();
                let mut restored = ops;
                restored.append(&mut buffer);
                *buffer = restored;
                Err(e)
            }
        }
    }

    /// Roll back everything committed through this handle since the last
    /// [`erase`](Self::erase), as one atomic commit. The undo log is cleared;
    /// no redo entry is recorded. A no-op when the log is empty.
    pub async fn reverse(&self) -> Result<()> {
        let ops: Vec<Op> = std::mem::take(&mut *self.inner.undo.lock());
        if ops.is_empty() {
            return Ok(());
        }
        match self.inner.core.commit_ops(&ops).await {
            Ok(()) => Ok(()),
            Err(e) => {
                let mut undo = self.inner.undo.lock();
                let mut restored = ops;
                restored.append(&mut undo);
                *undo = restored;
                Err(e)
            }
        }
    }

    /// Discard the undo log: everything committed so far survives future
    /// [`reverse`](Self::reverse) calls.
    pub fn erase(&self) {
        self.inner.undo.lock().clear();
    }

    /// Drop the buffered operations unapplied.
    pub fn clear(&self) {
        self.inner.buffer.lock().clear();
    }
}

impl fmt::Debug for Transaction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Transaction")
            .field("pending", &self.pending())
            .field("undo", &self.inner.undo.lock().len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::{Engine, EngineConfig};
    use crate::error::EngineError;
    use crate::funcs::SimpleFunc;
    use crate::types::{FuncType, Type};
    use crate::value::Value;

    fn source(name: &str) -> Vertex {
        let sig = FuncType::new(vec![], Type::Int);
        Vertex::new(
            name,
            Box::new(SimpleFunc::new(sig, Arc::new(|_| Ok(Value::Int(1))))),
        )
        .unwrap()
    }

    fn unary(name: &str) -> Vertex {
        let sig = FuncType::new(vec![("x".to_string(), Type::Int)], Type::Int);
        Vertex::new(
            name,
            Box::new(SimpleFunc::new(sig, Arc::new(|args| Ok(args[0].clone())))),
        )
        .unwrap()
    }

    #[tokio::test]
    async fn test_commit_applies_buffer_and_reverse_rolls_back() {
        let engine = Engine::new(Graph::new(), EngineConfig::default()).unwrap();
        let txn = engine.txn();

        let a = source("a");
        let b = unary("b");
        txn.add_vertex(&a);
        txn.add_edge(&a, &b, Edge::new(["x"]).unwrap());
        assert_eq!(txn.pending(), 2);

        txn.commit().await.unwrap();
        assert_eq!(txn.pending(), 0);
        assert_eq!(engine.vertex_count().await, 2);
        engine.verify_refcounts().await.unwrap();

        txn.reverse().await.unwrap();
        assert_eq!(engine.vertex_count().await, 0);
        engine.verify_refcounts().await.unwrap();
    }

    #[tokio::test]
    async fn test_cycle_is_rejected_and_graph_untouched() {
        let engine = Engine::new(Graph::new(), EngineConfig::default()).unwrap();
        let txn = engine.txn();

        let a = source("a");
        let b = unary("b");
        txn.add_edge(&a, &b, Edge::new(["x"]).unwrap());
        txn.commit().await.unwrap();

        txn.add_edge(&b, &a, Edge::new(["x"]).unwrap());
        let err = txn.commit().await.unwrap_err();
        assert!(matches!(err, EngineError::Cycle(_)));
        assert_eq!(engine.vertex_count().await, 2);
        engine.verify_refcounts().await.unwrap();
        assert_eq!(txn.pending(), 1, "rejected ops stay buffered for retry");
    }

    #[tokio::test]
    async fn test_erase_protects_earlier_commits_from_reverse() {
        let engine = Engine::new(Graph::new(), EngineConfig::default()).unwrap();
        let txn = engine.txn();

        let bridge = source("bridge");
        txn.add_vertex(&bridge);
        txn.commit().await.unwrap();
        txn.erase();

        let child = unary("child");
        txn.add_edge(&bridge, &child, Edge::new(["x"]).unwrap());
        txn.commit().await.unwrap();
        assert_eq!(engine.vertex_count().await, 2);

        txn.reverse().await.unwrap();
        assert_eq!(engine.vertex_count().await, 1, "bridge survives the rewind");
        assert_eq!(engine.refcount_of(&bridge).await, 1);
        assert_eq!(engine.refcount_of(&child).await, 0);
        engine.verify_refcounts().await.unwrap();
    }

    #[tokio::test]
    async fn test_duplicate_arg_binding_is_rejected_at_commit() {
        let engine = Engine::new(Graph::new(), EngineConfig::default()).unwrap();
        let txn = engine.txn();

        let a = source("a");
        let b = source("b");
        let c = unary("c");
        txn.add_edge(&a, &c, Edge::new(["x"]).unwrap());
        txn.commit().await.unwrap();

        txn.add_edge(&b, &c, Edge::new(["x"]).unwrap());
        let err = txn.commit().await.unwrap_err();
        assert!(matches!(err, EngineError::Construction(_)));
        assert_eq!(engine.vertex_count().await, 2);
        engine.verify_refcounts().await.unwrap();
    }

    #[tokio::test]
    async fn test_clear_drops_buffer_unapplied() {
        let engine = Engine::new(Graph::new(), EngineConfig::default()).unwrap();
        let txn = engine.txn();

        txn.add_vertex(&source("a"));
        txn.clear();
        txn.commit().await.unwrap();
        assert_eq!(engine.vertex_count().await, 0);
    }
}
