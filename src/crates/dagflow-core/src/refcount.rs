//! Reference counting and garbage collection for vertices and edges
//!
//! Dynamic subgraph builders can introduce the same concrete vertex many
//! times. Add and delete operations are therefore *increments* and
//! *decrements*: only at refcount zero does an entity actually leave the
//! graph, and only [`RefCount::gc`] performs the physical removal.
//!
//! Counts are tracked at two granularities: per vertex, and per
//! `(producer, consumer, arg name)` entry. An edge increment bumps every arg
//! name it carries plus both endpoint vertices, so an edge keeps its
//! endpoints alive.

use crate::error::{EngineError, Result};
use crate::graph::{Edge, Graph};
use std::collections::HashMap;
use uuid::Uuid;

/// Reference counts for vertices and per-arg edge entries.
#[derive(Debug, Clone, Default)]
pub struct RefCount {
    vertices: HashMap<Uuid, i64>,
    args: HashMap<(Uuid, Uuid, String), i64>,
}

impl RefCount {
    pub fn new() -> Self {
        Self::default()
    }

    /// Increment a vertex count. Returns true when the previous count was
    /// zero, which tells the caller the vertex must be physically inserted.
    pub fn vertex_inc(&mut self, id: Uuid) -> bool {
        let count = self.vertices.entry(id).or_insert(0);
        *count += 1;
        *count == 1
    }

    /// Decrement a vertex count. Returns true when the new count is zero.
    pub fn vertex_dec(&mut self, id: Uuid) -> bool {
        let count = self.vertices.entry(id).or_insert(0);
        if *count > 0 {
            *count -= 1;
        }
        *count == 0
    }

    /// Increment an edge: once per arg name carried, plus both endpoints.
    pub fn edge_inc(&mut self, producer: Uuid, consumer: Uuid, edge: &Edge) {
        for arg in edge.args() {
            *self
                .args
                .entry((producer, consumer, arg.to_string()))
                .or_insert(0) += 1;
        }
        self.vertex_inc(producer);
        self.vertex_inc(consumer);
    }

    /// Decrement an edge: once per arg name carried, plus both endpoints.
    pub fn edge_dec(&mut self, producer: Uuid, consumer: Uuid, edge: &Edge) {
        for arg in edge.args() {
            let count = self
                .args
                .entry((producer, consumer, arg.to_string()))
                .or_insert(0);
            if *count > 0 {
                *count -= 1;
            }
        }
        self.vertex_dec(producer);
        self.vertex_dec(consumer);
    }

    /// Current count for a vertex.
    pub fn vertex_count(&self, id: Uuid) -> i64 {
        self.vertices.get(&id).copied().unwrap_or(0)
    }

    /// Current count for one arg entry.
    pub fn arg_count(&self, producer: Uuid, consumer: Uuid, arg: &str) -> i64 {
        self.args
            .get(&(producer, consumer, arg.to_string()))
            .copied()
            .unwrap_or(0)
    }

    /// Drop the bookkeeping entry for a vertex whose count reached zero.
    pub fn free_vertex(&mut self, id: Uuid) -> Result<()> {
        match self.vertices.get(&id) {
            Some(0) | None => {
                self.vertices.remove(&id);
                Ok(())
            }
            Some(n) => Err(EngineError::RefInvariant(format!(
                "freeing vertex {} with count {}",
                id, n
            ))),
        }
    }

    /// Drop the bookkeeping entry for an arg whose count reached zero.
    pub fn free_edge(&mut self, producer: Uuid, consumer: Uuid, arg: &str) -> Result<()> {
        let key = (producer, consumer, arg.to_string());
        match self.args.get(&key) {
            Some(0) | None => {
                self.args.remove(&key);
                Ok(())
            }
            Some(n) => Err(EngineError::RefInvariant(format!(
                "freeing edge arg '{}' with count {}",
                arg, n
            ))),
        }
    }

    /// Physically remove everything whose count reached zero.
    ///
    /// Arg entries at zero are removed from their live edge (deleting the
    /// edge when its last arg goes); vertices at zero must have no remaining
    /// adjacent edge, otherwise the counts and the graph disagree and a
    /// [`EngineError::RefInvariant`] is returned. Idempotent. Returns the
    /// vertices that were removed so the engine can stop their bodies.
    pub fn gc(&mut self, graph: &mut Graph) -> Result<Vec<Uuid>> {
        let dead_args: Vec<(Uuid, Uuid, String)> = self
            .args
            .iter()
            .filter(|(_, count)| **count == 0)
            .map(|(key, _)| key.clone())
            .collect();
        for (producer, consumer, arg) in dead_args {
            graph.remove_edge_arg(producer, consumer, &arg);
            self.free_edge(producer, consumer, &arg)?;
        }

        let dead_vertices: Vec<Uuid> = self
            .vertices
            .iter()
            .filter(|(_, count)| **count == 0)
            .map(|(id, _)| *id)
            .collect();
        let mut removed = Vec::new();
        for id in dead_vertices {
            if graph.has_adjacent_edges(id) {
                return Err(EngineError::RefInvariant(format!(
                    "vertex {} has count zero but live edges",
                    id
                )));
            }
            if graph.remove_vertex(id) {
                removed.push(id);
            }
            self.free_vertex(id)?;
        }
        Ok(removed)
    }

    /// Check the agreement invariant: a vertex is in the graph iff its count
    /// is positive, and an edge is in the graph iff at least one of its arg
    /// entries is positive.
    pub fn agrees_with(&self, graph: &Graph) -> Result<()> {
        for (id, count) in &self.vertices {
            if (*count > 0) != graph.has_vertex(*id) {
                return Err(EngineError::RefInvariant(format!(
                    "vertex {} count {} but in-graph={}",
                    id,
                    count,
                    graph.has_vertex(*id)
                )));
            }
        }
        for vertex in graph.vertices() {
            if self.vertex_count(vertex.id()) <= 0 {
                return Err(EngineError::RefInvariant(format!(
                    "vertex '{}' live without references",
                    vertex.name()
                )));
            }
        }
        for ((producer, consumer, arg), count) in &self.args {
            let live = graph
                .edge(*producer, *consumer)
                .is_some_and(|e| e.has_arg(arg));
            if (*count > 0) != live {
                return Err(EngineError::RefInvariant(format!(
                    "edge arg '{}' count {} but live={}",
                    arg, count, live
                )));
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_vertex_inc_signals_first_reference() {
        let mut refs = RefCount::new();
        let id = Uuid::new_v4();
        assert!(refs.vertex_inc(id), "first inc crosses zero");
        assert!(!refs.vertex_inc(id), "second inc does not");
        assert!(!refs.vertex_dec(id));
        assert!(refs.vertex_dec(id), "last dec reaches zero");
    }

    #[test]
    fn test_edge_inc_keeps_endpoints_alive() {
        let mut refs = RefCount::new();
        let p = Uuid::new_v4();
        let c = Uuid::new_v4();
        let edge = Edge::new(["x", "y"]).unwrap();

        refs.edge_inc(p, c, &edge);
        assert_eq!(refs.vertex_count(p), 1);
        assert_eq!(refs.vertex_count(c), 1);
        assert_eq!(refs.arg_count(p, c, "x"), 1);
        assert_eq!(refs.arg_count(p, c, "y"), 1);

        refs.edge_dec(p, c, &edge);
        assert_eq!(refs.vertex_count(p), 0);
        assert_eq!(refs.arg_count(p, c, "x"), 0);
    }

    #[test]
    fn test_free_nonzero_vertex_is_an_invariant_error() {
        let mut refs = RefCount::new();
        let id = Uuid::new_v4();
        refs.vertex_inc(id);
        let err = refs.free_vertex(id).unwrap_err();
        assert!(matches!(err, EngineError::RefInvariant(_)));
    }

    #[test]
    fn test_gc_is_idempotent() {
        use crate::funcs::SimpleFunc;
        use crate::graph::Vertex;
        use crate::types::{FuncType, Type};
        use crate::value::Value;
        use std::sync::Arc;

        let sig = FuncType::new(vec![], Type::Int);
        let v = Vertex::new(
            "v",
            Box::new(SimpleFunc::new(sig, Arc::new(|_| Ok(Value::Int(1))))),
        )
        .unwrap();

        let mut graph = Graph::new();
        graph.add_vertex(&v);
        let mut refs = RefCount::new();
        refs.vertex_inc(v.id());
        refs.agrees_with(&graph).unwrap();

        refs.vertex_dec(v.id());
        let removed = refs.gc(&mut graph).unwrap();
        assert_eq!(removed, vec![v.id()]);
        assert!(!graph.has_vertex(v.id()));

        let removed_again = refs.gc(&mut graph).unwrap();
        assert!(removed_again.is_empty());
        refs.agrees_with(&graph).unwrap();
    }

    proptest! {
        #[test]
        fn prop_inc_then_dec_is_identity(start in 0i64..5) {
            let mut refs = RefCount::new();
            let id = Uuid::new_v4();
            for _ in 0..start {
                refs.vertex_inc(id);
            }
            let before = refs.vertex_count(id);
            refs.vertex_inc(id);
            refs.vertex_dec(id);
            prop_assert_eq!(refs.vertex_count(id), before);
        }

        #[test]
        fn prop_edge_inc_then_dec_is_identity(n in 1usize..4) {
            let mut refs = RefCount::new();
            let p = Uuid::new_v4();
            let c = Uuid::new_v4();
            let args: Vec<String> = (0..n).map(|i| format!("a{}", i)).collect();
            let edge = Edge::new(args.clone()).unwrap();

            refs.edge_inc(p, c, &edge);
            let counts: Vec<i64> = args.iter().map(|a| refs.arg_count(p, c, a)).collect();
            refs.edge_inc(p, c, &edge);
            refs.edge_dec(p, c, &edge);
            let after: Vec<i64> = args.iter().map(|a| refs.arg_count(p, c, a)).collect();
            prop_assert_eq!(counts, after);
        }
    }
}
