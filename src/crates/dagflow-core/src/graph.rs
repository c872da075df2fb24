//! Graph substrate: vertices, labeled edges, topological sort
//!
//! A [`Graph`] is a directed acyclic graph whose vertices are function nodes
//! and whose edges carry one or more named argument slots. Vertices are
//! stored by stable identifier; a [`Vertex`] value is a cheap clonable handle
//! and two handles are equal exactly when they refer to the same vertex.
//!
//! The graph itself is a passive data structure. Liveness (starting and
//! stopping bodies) belongs to the engine, and mutation while the engine is
//! running goes through the transaction layer, never through these methods
//! directly.

use crate::error::{EngineError, Result};
use crate::node::{Func, FuncInfo};
use crate::types::{FuncType, Type};
use crate::value::Value;
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::fmt;
use std::sync::Arc;
use uuid::Uuid;

/// A handle to one vertex in the DAG.
///
/// Identity is the vertex id: clones compare equal, distinct vertices never
/// do, even when they wrap the same function name.
#[derive(Clone)]
pub struct Vertex {
    inner: Arc<VertexInner>,
}

struct VertexInner {
    id: Uuid,
    name: String,
    info: FuncInfo,
    func: tokio::sync::Mutex<Box<dyn Func>>,
}

impl Vertex {
    /// Wrap a function implementation as a vertex.
    ///
    /// Runs the implementation's `validate` and captures its static
    /// descriptor once; the descriptor is immutable for the vertex lifetime.
    pub fn new(name: impl Into<String>, func: Box<dyn Func>) -> Result<Self> {
        func.validate()?;
        let info = func.info();
        Ok(Self {
            inner: Arc::new(VertexInner {
                id: Uuid::new_v4(),
                name: name.into(),
                info,
                func: tokio::sync::Mutex::new(func),
            }),
        })
    }

    /// Stable identifier.
    pub fn id(&self) -> Uuid {
        self.inner.id
    }

    /// The name this vertex was added under.
    pub fn name(&self) -> &str {
        &self.inner.name
    }

    /// Static descriptor captured at construction.
    pub fn info(&self) -> &FuncInfo {
        &self.inner.info
    }

    /// The declared function signature.
    pub fn sig(&self) -> &FuncType {
        &self.inner.info.sig
    }

    pub(crate) fn func(&self) -> &tokio::sync::Mutex<Box<dyn Func>> {
        &self.inner.func
    }

    /// Speculative synchronous evaluation.
    ///
    /// Fails with [`EngineError::CantSpeculate`] when the node does not
    /// support speculation or when its streaming body currently owns the
    /// instance.
    pub async fn call(&self, args: &[Value]) -> Result<Value> {
        if !self.inner.info.spec {
            return Err(EngineError::CantSpeculate);
        }
        match self.inner.func.try_lock() {
            Ok(func) => func.call(args).await,
            Err(_) => Err(EngineError::CantSpeculate),
        }
    }
}

impl PartialEq for Vertex {
    fn eq(&self, other: &Self) -> bool {
        self.inner.id == other.inner.id
    }
}

impl Eq for Vertex {}

impl std::hash::Hash for Vertex {
    fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
        self.inner.id.hash(state);
    }
}

impl fmt::Debug for Vertex {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Vertex")
            .field("id", &self.inner.id)
            .field("name", &self.inner.name)
            .finish()
    }
}

impl fmt::Display for Vertex {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.inner.name)
    }
}

/// A directed edge carrying a non-empty set of argument names.
///
/// Each argument name binds the producer's output to one parameter slot of
/// the consumer. One edge may carry several names when the same producer
/// feeds several parameters.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Edge {
    args: BTreeSet<String>,
}

impl Edge {
    /// Create an edge from argument names; at least one is required.
    pub fn new<I, S>(args: I) -> Result<Self>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let args: BTreeSet<String> = args.into_iter().map(Into::into).collect();
        if args.is_empty() {
            return Err(EngineError::construction("edge needs at least one arg name"));
        }
        Ok(Self { args })
    }

    /// Argument names in sorted order.
    pub fn args(&self) -> impl Iterator<Item = &str> {
        self.args.iter().map(String::as_str)
    }

    pub fn has_arg(&self, name: &str) -> bool {
        self.args.contains(name)
    }

    pub fn len(&self) -> usize {
        self.args.len()
    }

    pub fn is_empty(&self) -> bool {
        self.args.is_empty()
    }

    fn merge(&mut self, other: &Edge) {
        for arg in &other.args {
            self.args.insert(arg.clone());
        }
    }

    fn remove_arg(&mut self, name: &str) -> bool {
        self.args.remove(name)
    }
}

impl fmt::Display for Edge {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let names: Vec<&str> = self.args().collect();
        write!(f, "{}", names.join(", "))
    }
}

/// Directed graph with labeled edges and two-sided adjacency.
#[derive(Debug, Clone, Default)]
pub struct Graph {
    vertices: HashMap<Uuid, Vertex>,
    edges: HashMap<(Uuid, Uuid), Edge>,
    out: HashMap<Uuid, BTreeSet<Uuid>>,
    inc: HashMap<Uuid, BTreeSet<Uuid>>,
}

impl Graph {
    /// Create an empty graph.
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a vertex. Idempotent; returns true when the vertex was new.
    pub fn add_vertex(&mut self, vertex: &Vertex) -> bool {
        self.vertices
            .insert(vertex.id(), vertex.clone())
            .is_none()
    }

    pub fn has_vertex(&self, id: Uuid) -> bool {
        self.vertices.contains_key(&id)
    }

    pub fn vertex(&self, id: Uuid) -> Option<&Vertex> {
        self.vertices.get(&id)
    }

    /// All vertices, in unspecified order.
    pub fn vertices(&self) -> impl Iterator<Item = &Vertex> {
        self.vertices.values()
    }

    pub fn vertex_count(&self) -> usize {
        self.vertices.len()
    }

    pub fn edge_count(&self) -> usize {
        self.edges.len()
    }

    /// Add (or widen) the edge from `producer` to `consumer`.
    ///
    /// Vertices missing from the graph are inserted. Fails when the edge
    /// would bind an argument name that a *different* incoming edge of the
    /// consumer already carries, or when producer and consumer are the same
    /// vertex.
    pub fn add_edge(&mut self, producer: &Vertex, consumer: &Vertex, edge: Edge) -> Result<()> {
        if producer.id() == consumer.id() {
            return Err(EngineError::Cycle(format!(
                "self edge on vertex '{}'",
                consumer.name()
            )));
        }
        for arg in edge.args() {
            if let Some(src) = self.arg_source(consumer.id(), arg) {
                if src != producer.id() {
                    return Err(EngineError::construction(format!(
                        "arg '{}' of '{}' is already bound to another producer",
                        arg,
                        consumer.name()
                    )));
                }
            }
        }
        self.add_vertex(producer);
        self.add_vertex(consumer);
        let key = (producer.id(), consumer.id());
        match self.edges.get_mut(&key) {
            Some(existing) => existing.merge(&edge),
            None => {
                self.edges.insert(key, edge);
                self.out.entry(producer.id()).or_default().insert(consumer.id());
                self.inc.entry(consumer.id()).or_default().insert(producer.id());
            }
        }
        Ok(())
    }

    /// Remove one argument name from the edge; the edge itself is removed
    /// when its last name goes. Returns true when the name was present.
    pub fn remove_edge_arg(&mut self, producer: Uuid, consumer: Uuid, arg: &str) -> bool {
        let key = (producer, consumer);
        let Some(edge) = self.edges.get_mut(&key) else {
            return false;
        };
        let removed = edge.remove_arg(arg);
        if removed && edge.is_empty() {
            self.remove_edge(producer, consumer);
        }
        removed
    }

    /// Remove the whole edge between two vertices.
    pub fn remove_edge(&mut self, producer: Uuid, consumer: Uuid) -> bool {
        if self.edges.remove(&(producer, consumer)).is_none() {
            return false;
        }
        if let Some(set) = self.out.get_mut(&producer) {
            set.remove(&consumer);
            if set.is_empty() {
                self.out.remove(&producer);
            }
        }
        if let Some(set) = self.inc.get_mut(&consumer) {
            set.remove(&producer);
            if set.is_empty() {
                self.inc.remove(&consumer);
            }
        }
        true
    }

    /// Remove a vertex. The caller (GC) guarantees no edge touches it.
    pub fn remove_vertex(&mut self, id: Uuid) -> bool {
        self.out.remove(&id);
        self.inc.remove(&id);
        self.vertices.remove(&id).is_some()
    }

    /// True when any edge touches the vertex.
    pub fn has_adjacent_edges(&self, id: Uuid) -> bool {
        self.out.get(&id).is_some_and(|s| !s.is_empty())
            || self.inc.get(&id).is_some_and(|s| !s.is_empty())
    }

    pub fn edge(&self, producer: Uuid, consumer: Uuid) -> Option<&Edge> {
        self.edges.get(&(producer, consumer))
    }

    /// Direct consumers of a producer, in stable order.
    pub fn consumers_of(&self, producer: Uuid) -> Vec<Uuid> {
        self.out
            .get(&producer)
            .map(|s| s.iter().copied().collect())
            .unwrap_or_default()
    }

    /// Direct producers of a consumer, in stable order.
    pub fn producers_of(&self, consumer: Uuid) -> Vec<Uuid> {
        self.inc
            .get(&consumer)
            .map(|s| s.iter().copied().collect())
            .unwrap_or_default()
    }

    pub fn out_degree(&self, id: Uuid) -> usize {
        self.out.get(&id).map_or(0, BTreeSet::len)
    }

    pub fn in_degree(&self, id: Uuid) -> usize {
        self.inc.get(&id).map_or(0, BTreeSet::len)
    }

    /// The producer bound to one argument name of a consumer, if any.
    pub fn arg_source(&self, consumer: Uuid, arg: &str) -> Option<Uuid> {
        self.inc.get(&consumer).and_then(|producers| {
            producers
                .iter()
                .find(|p| {
                    self.edges
                        .get(&(**p, consumer))
                        .is_some_and(|e| e.has_arg(arg))
                })
                .copied()
        })
    }

    /// All edges as `(producer, consumer, edge)` triples, in unspecified
    /// order.
    pub fn edges(&self) -> impl Iterator<Item = (Uuid, Uuid, &Edge)> {
        self.edges.iter().map(|((p, c), e)| (*p, *c, e))
    }

    /// Transitive producers of a vertex, not including the vertex itself.
    pub fn ancestors_of(&self, id: Uuid) -> std::collections::HashSet<Uuid> {
        let mut seen = std::collections::HashSet::new();
        let mut queue: Vec<Uuid> = self.producers_of(id);
        while let Some(p) = queue.pop() {
            if seen.insert(p) {
                queue.extend(self.producers_of(p));
            }
        }
        seen
    }

    /// Transitive consumers of a vertex, not including the vertex itself.
    pub fn descendants_of(&self, id: Uuid) -> Vec<Uuid> {
        let mut seen = std::collections::HashSet::new();
        let mut queue: Vec<Uuid> = self.consumers_of(id);
        let mut out = Vec::new();
        while let Some(c) = queue.pop() {
            if seen.insert(c) {
                out.push(c);
                queue.extend(self.consumers_of(c));
            }
        }
        out
    }

    /// Incoming edges of a consumer as `(producer, edge)` pairs.
    pub fn incoming_of(&self, consumer: Uuid) -> Vec<(Uuid, &Edge)> {
        self.producers_of(consumer)
            .into_iter()
            .filter_map(|p| self.edges.get(&(p, consumer)).map(|e| (p, e)))
            .collect()
    }

    /// Kahn topological sort with stable tie-breaking.
    ///
    /// Fails with [`EngineError::Cycle`] when the graph is not a DAG.
    pub fn topo_sort(&self) -> Result<Vec<Vertex>> {
        let mut indeg: BTreeMap<Uuid, usize> = self
            .vertices
            .keys()
            .map(|id| (*id, self.in_degree(*id)))
            .collect();
        let mut ready: BTreeSet<Uuid> = indeg
            .iter()
            .filter(|(_, d)| **d == 0)
            .map(|(id, _)| *id)
            .collect();
        let mut order = Vec::with_capacity(self.vertices.len());

        while let Some(id) = ready.iter().next().copied() {
            ready.remove(&id);
            indeg.remove(&id);
            order.push(self.vertices[&id].clone());
            for consumer in self.consumers_of(id) {
                if let Some(d) = indeg.get_mut(&consumer) {
                    *d -= 1;
                    if *d == 0 {
                        ready.insert(consumer);
                    }
                }
            }
        }

        if order.len() != self.vertices.len() {
            let stuck: Vec<String> = indeg
                .keys()
                .filter_map(|id| self.vertices.get(id))
                .map(|v| v.name().to_string())
                .collect();
            return Err(EngineError::Cycle(format!(
                "vertices form a cycle: {}",
                stuck.join(", ")
            )));
        }
        Ok(order)
    }

    /// Static validation per the init contract.
    ///
    /// Checks, for every vertex: each incoming argument name exists in its
    /// signature; each parameter is bound by exactly one incoming edge; the
    /// producer output type is compatible with the parameter type (variants
    /// accepted in either direction).
    pub fn validate(&self) -> Result<()> {
        for consumer in self.vertices.values() {
            let sig = consumer.sig();
            let mut bound: BTreeSet<&str> = BTreeSet::new();
            for (pid, edge) in self.incoming_of(consumer.id()) {
                let producer = self.vertices.get(&pid).ok_or_else(|| {
                    EngineError::construction(format!(
                        "edge into '{}' from a vertex not in the graph",
                        consumer.name()
                    ))
                })?;
                for arg in edge.args() {
                    let Some(param_type) = sig.param(arg) else {
                        return Err(EngineError::construction(format!(
                            "vertex '{}' has no parameter named '{}'",
                            consumer.name(),
                            arg
                        )));
                    };
                    if !bound.insert(arg) {
                        return Err(EngineError::construction(format!(
                            "arg '{}' of '{}' has more than one source",
                            arg,
                            consumer.name()
                        )));
                    }
                    let produced: &Type = &producer.sig().ret;
                    if !produced.compat(param_type) {
                        return Err(EngineError::construction(format!(
                            "'{}' produces {} but parameter '{}' of '{}' wants {}",
                            producer.name(),
                            produced,
                            arg,
                            consumer.name(),
                            param_type
                        )));
                    }
                }
            }
            for (param, _) in &sig.params {
                if !bound.contains(param.as_str()) {
                    return Err(EngineError::construction(format!(
                        "parameter '{}' of '{}' has no incoming edge",
                        param,
                        consumer.name()
                    )));
                }
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::funcs::SimpleFunc;
    use crate::types::FuncType;
    use std::sync::Arc;

    fn source(name: &str) -> Vertex {
        let sig = FuncType::new(vec![], Type::Int);
        Vertex::new(
            name,
            Box::new(SimpleFunc::new(sig, Arc::new(|_| Ok(Value::Int(1))))),
        )
        .unwrap()
    }

    fn unary(name: &str, param: &str) -> Vertex {
        let sig = FuncType::new(vec![(param.to_string(), Type::Int)], Type::Int);
        Vertex::new(
            name,
            Box::new(SimpleFunc::new(sig, Arc::new(|args| Ok(args[0].clone())))),
        )
        .unwrap()
    }

    #[test]
    fn test_add_edge_merges_arg_names() {
        let a = source("a");
        let sig = FuncType::new(
            vec![("x".to_string(), Type::Int), ("y".to_string(), Type::Int)],
            Type::Int,
        );
        let b = Vertex::new(
            "b",
            Box::new(SimpleFunc::new(sig, Arc::new(|args| Ok(args[0].clone())))),
        )
        .unwrap();

        let mut g = Graph::new();
        g.add_edge(&a, &b, Edge::new(["x"]).unwrap()).unwrap();
        g.add_edge(&a, &b, Edge::new(["y"]).unwrap()).unwrap();

        assert_eq!(g.edge_count(), 1);
        let edge = g.edge(a.id(), b.id()).unwrap();
        assert!(edge.has_arg("x") && edge.has_arg("y"));
    }

    #[test]
    fn test_second_source_for_same_arg_is_rejected() {
        let a = source("a");
        let b = source("b");
        let c = unary("c", "x");

        let mut g = Graph::new();
        g.add_edge(&a, &c, Edge::new(["x"]).unwrap()).unwrap();
        let err = g.add_edge(&b, &c, Edge::new(["x"]).unwrap()).unwrap_err();
        assert!(matches!(err, EngineError::Construction(_)));
    }

    #[test]
    fn test_topo_sort_orders_producers_first() {
        let a = source("a");
        let b = unary("b", "x");
        let c = unary("c", "x");

        let mut g = Graph::new();
        g.add_edge(&a, &b, Edge::new(["x"]).unwrap()).unwrap();
        g.add_edge(&b, &c, Edge::new(["x"]).unwrap()).unwrap();

        let order = g.topo_sort().unwrap();
        let pos =
            |v: &Vertex| order.iter().position(|o| o == v).unwrap();
        assert!(pos(&a) < pos(&b));
        assert!(pos(&b) < pos(&c));
    }

    #[test]
    fn test_validate_catches_unbound_parameter() {
        let c = unary("c", "x");
        let mut g = Graph::new();
        g.add_vertex(&c);
        let err = g.validate().unwrap_err();
        assert!(format!("{}", err).contains("no incoming edge"));
    }

    #[test]
    fn test_validate_catches_unknown_arg_name() {
        let a = source("a");
        let c = unary("c", "x");
        let mut g = Graph::new();
        g.add_edge(&a, &c, Edge::new(["y"]).unwrap()).unwrap();
        let err = g.validate().unwrap_err();
        assert!(format!("{}", err).contains("no parameter named 'y'"));
    }

    #[test]
    fn test_validate_catches_type_mismatch() {
        let sig = FuncType::new(vec![], Type::Str);
        let a = Vertex::new(
            "a",
            Box::new(SimpleFunc::new(sig, Arc::new(|_| Ok(Value::str("s"))))),
        )
        .unwrap();
        let c = unary("c", "x"); // wants int

        let mut g = Graph::new();
        g.add_edge(&a, &c, Edge::new(["x"]).unwrap()).unwrap();
        let err = g.validate().unwrap_err();
        assert!(format!("{}", err).contains("wants int"));
    }

    #[test]
    fn test_remove_last_arg_drops_edge() {
        let a = source("a");
        let b = unary("b", "x");
        let mut g = Graph::new();
        g.add_edge(&a, &b, Edge::new(["x"]).unwrap()).unwrap();

        assert!(g.remove_edge_arg(a.id(), b.id(), "x"));
        assert_eq!(g.edge_count(), 0);
        assert!(!g.has_adjacent_edges(a.id()));
    }
}
