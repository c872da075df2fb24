//! Input aggregation: one task per consumer with incoming edges.
//!
//! The aggregator owns the receive side of its consumer's notify channel.
//! Each pulse means "something changed upstream"; the aggregator rebuilds
//! the would-be input snapshot from the live table and delivers it on the
//! consumer's input channel when, and only when, it is complete, fresh, and
//! consistent:
//!
//! - **complete**: every parameter has a value in the table;
//! - **fresh**: it differs from the last snapshot delivered (an equal table
//!   entry is not an upstream change);
//! - **consistent**: no strict ancestor of the consumer is mid-recomputation
//!   (dirty). Deferring while an ancestor is dirty is what keeps a fan-in
//!   from observing one ancestor's new value combined with another's old
//!   one; the propagator guarantees a follow-up pulse once the blocking
//!   ancestor settles.
//!
//! Pulses that fail any of the three checks are dropped. The input send may
//! block while the consumer is still processing the previous snapshot; that
//! is the intended backpressure. Dropping the input sender when the notify
//! channel closes is the consumer's end-of-stream signal.

use super::state::Table;
use super::Core;
use crate::graph::{Graph, Vertex};
use crate::value::Value;
use std::sync::Arc;
use tokio::sync::mpsc;

pub(crate) async fn aggregator(
    core: Arc<Core>,
    consumer: Vertex,
    mut notify_rx: mpsc::Receiver<()>,
    input_tx: mpsc::Sender<Value>,
) {
    let mut last: Option<Value> = None;
    while notify_rx.recv().await.is_some() {
        let snapshot = {
            let graph = core.graph.read().await;
            let table = core.table.read();
            if graph
                .ancestors_of(consumer.id())
                .iter()
                .any(|a| table.dirty.contains(a))
            {
                // An ancestor is still recomputing; deliver nothing now.
                continue;
            }
            build_snapshot(&graph, &table, &consumer)
        };
        let Some(snapshot) = snapshot else {
            continue;
        };
        if last.as_ref() == Some(&snapshot) {
            continue;
        }
        last = Some(snapshot.clone());
        if input_tx.send(snapshot).await.is_err() {
            // Consumer body is gone; nothing left to feed.
            break;
        }
    }
    tracing::debug!(node = consumer.name(), "aggregator done, closing input");
}

/// Assemble the struct-valued snapshot, field per parameter in signature
/// order. `None` when any parameter's producer has not loaded yet.
///
/// A producer feeding several parameters contributes the same value to each
/// of its slots.
fn build_snapshot(graph: &Graph, table: &Table, consumer: &Vertex) -> Option<Value> {
    let params = &consumer.sig().params;
    let mut fields = Vec::with_capacity(params.len());
    for (param, _) in params {
        let producer = graph.arg_source(consumer.id(), param)?;
        let value = table.values.get(&producer)?.clone();
        fields.push((param.clone(), value));
    }
    Some(Value::struct_of(fields))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::funcs::SimpleFunc;
    use crate::graph::Edge;
    use crate::types::{FuncType, Type};

    fn consumer_xy() -> Vertex {
        let sig = FuncType::new(
            vec![("x".to_string(), Type::Int), ("y".to_string(), Type::Int)],
            Type::Int,
        );
        Vertex::new(
            "sum",
            Box::new(SimpleFunc::new(sig, Arc::new(|args| Ok(args[0].clone())))),
        )
        .unwrap()
    }

    fn source(name: &str) -> Vertex {
        let sig = FuncType::new(vec![], Type::Int);
        Vertex::new(
            name,
            Box::new(SimpleFunc::new(sig, Arc::new(|_| Ok(Value::Int(0))))),
        )
        .unwrap()
    }

    #[test]
    fn test_snapshot_incomplete_until_all_producers_loaded() {
        let p = source("p");
        let q = source("q");
        let c = consumer_xy();

        let mut graph = Graph::new();
        graph.add_edge(&p, &c, Edge::new(["x"]).unwrap()).unwrap();
        graph.add_edge(&q, &c, Edge::new(["y"]).unwrap()).unwrap();

        let mut table = Table::default();
        table.values.insert(p.id(), Value::Int(1));
        assert!(build_snapshot(&graph, &table, &c).is_none());

        table.values.insert(q.id(), Value::Int(2));
        let snap = build_snapshot(&graph, &table, &c).unwrap();
        let s = snap.as_struct().unwrap();
        assert_eq!(s.field("x"), Some(&Value::Int(1)));
        assert_eq!(s.field("y"), Some(&Value::Int(2)));
        assert_eq!(s.fields()[0].0, "x", "fields follow parameter order");
    }

    #[test]
    fn test_shared_producer_fills_every_slot() {
        let p = source("p");
        let c = consumer_xy();

        let mut graph = Graph::new();
        graph
            .add_edge(&p, &c, Edge::new(["x", "y"]).unwrap())
            .unwrap();

        let mut table = Table::default();
        table.values.insert(p.id(), Value::Int(7));
        let snap = build_snapshot(&graph, &table, &c).unwrap();
        let s = snap.as_struct().unwrap();
        assert_eq!(s.field("x"), Some(&Value::Int(7)));
        assert_eq!(s.field("y"), Some(&Value::Int(7)));
    }
}
