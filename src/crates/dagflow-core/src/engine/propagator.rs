//! Change propagation and tick emission: one reader task per vertex.
//!
//! The reader drains its vertex's output channel. Every received value is
//! compared against the live table first (the engine-level debounce); only a
//! changed value is installed, marks the direct consumers dirty, and may
//! emit an external tick. Both branches clear the vertex's own dirty flag:
//! processing an output, changed or not, is how the vertex reports "my
//! recomputation for the inputs I saw is done".
//!
//! Wakeup discipline: a changed value pulses the direct consumers (the wave
//! continues through them); an unchanged value means the wave dies here, so
//! every descendant is pulsed instead, in case one of them deferred a
//! rebuild while this vertex was dirty.
//!
//! When the output channel closes the reader runs the all-upstreams-closed
//! protocol: each direct consumer whose producers have now all closed gets
//! its notify channel closed, which makes its aggregator close its input
//! channel, which ends its body, which closes its output, and so on down the
//! graph.

use super::Core;
use crate::error::EngineError;
use crate::graph::Vertex;
use crate::value::Value;
use std::sync::Arc;
use std::sync::atomic::Ordering;
use tokio::sync::mpsc;
use uuid::Uuid;

pub(crate) async fn output_reader(core: Arc<Core>, vertex: Vertex, mut rx: mpsc::Receiver<Value>) {
    while let Some(value) = rx.recv().await {
        propagate(&core, &vertex, value).await;
    }
    vertex_closed(&core, &vertex).await;
}

async fn propagate(core: &Arc<Core>, vertex: &Vertex, value: Value) {
    let id = vertex.id();
    let graph = core.graph.read().await;
    let consumers = graph.consumers_of(id);

    let (changed, leaf) = {
        let mut table = core.table.write();
        if table.values.get(&id) == Some(&value) {
            table.dirty.remove(&id);
            (false, false)
        } else {
            tracing::trace!(node = vertex.name(), value = %value, "table update");
            table.values.insert(id, value);
            table.loaded.insert(id);
            table.dirty.remove(&id);
            for consumer in &consumers {
                table.dirty.insert(*consumer);
            }
            (true, consumers.is_empty())
        }
    };

    if changed {
        for consumer in &consumers {
            core.pulse(*consumer);
        }
        core.maybe_open_gate(&graph);
    } else {
        // The wave stops at this vertex; wake anything downstream that may
        // have been deferring on it.
        for descendant in graph.descendants_of(id) {
            core.pulse(descendant);
        }
    }

    let glitch = core.config.glitch;
    drop(graph);

    if changed && (glitch || leaf) && core.gate_open() {
        core.emit_tick().await;
    }
}

async fn vertex_closed(core: &Arc<Core>, vertex: &Vertex) {
    let id = vertex.id();
    let loaded = core.table.read().loaded.contains(&id);
    let expected = {
        let mut nodes = core.nodes.lock();
        match nodes.get_mut(&id) {
            Some(state) => {
                state.closed = true;
                state.removed
            }
            None => true,
        }
    } || core.closing.load(Ordering::SeqCst);
    tracing::debug!(node = vertex.name(), loaded, "output closed");

    if !loaded && !expected {
        // A node that never produced wedges everything downstream of it.
        core.node_failed(
            vertex.name(),
            EngineError::node(vertex.name(), "stopped before it was loaded"),
        )
        .await;
        return;
    }

    let graph = core.graph.read().await;
    {
        let mut table = core.table.write();
        table.dirty.remove(&id);
    }
    let descendants: Vec<Uuid> = graph.descendants_of(id);
    for consumer in graph.consumers_of(id) {
        let all_closed = {
            let nodes = core.nodes.lock();
            graph
                .producers_of(consumer)
                .iter()
                .all(|p| nodes.get(p).map_or(true, |n| n.closed))
        };
        if all_closed {
            // Closing the notify channel cascades: the aggregator returns
            // and drops the consumer's input sender.
            if let Some(state) = core.nodes.lock().get_mut(&consumer) {
                state.notify_tx = None;
            }
        }
    }
    drop(graph);
    // This vertex will never recompute again; let deferred rebuilds proceed.
    for descendant in descendants {
        core.pulse(descendant);
    }
}
