//! DOT rendering of the live topology.
//!
//! Debug aid: dump the graph with arg-name edge labels and render it with
//! graphviz. Vertex names may repeat, so node identifiers carry a short id
//! suffix.

use crate::graph::Graph;
use std::fmt::Write;

/// Render the graph in graphviz DOT syntax.
pub fn to_dot(graph: &Graph) -> String {
    let mut vertices: Vec<_> = graph.vertices().collect();
    vertices.sort_by(|a, b| a.name().cmp(b.name()).then(a.id().cmp(&b.id())));

    let mut out = String::from("digraph dagflow {\n  rankdir=LR;\n");
    for vertex in &vertices {
        let _ = writeln!(
            out,
            "  \"{}\" [label=\"{}\"];",
            node_id(vertex),
            vertex.name()
        );
    }
    for producer in &vertices {
        for consumer_id in graph.consumers_of(producer.id()) {
            let (Some(consumer), Some(edge)) = (
                graph.vertex(consumer_id),
                graph.edge(producer.id(), consumer_id),
            ) else {
                continue;
            };
            let _ = writeln!(
                out,
                "  \"{}\" -> \"{}\" [label=\"{}\"];",
                node_id(producer),
                node_id(consumer),
                edge
            );
        }
    }
    out.push_str("}\n");
    out
}

fn node_id(vertex: &crate::graph::Vertex) -> String {
    let id = vertex.id().simple().to_string();
    format!("{}_{}", vertex.name(), &id[..8])
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::funcs::SimpleFunc;
    use crate::graph::{Edge, Vertex};
    use crate::types::{FuncType, Type};
    use crate::value::Value;
    use std::sync::Arc;

    #[test]
    fn test_dot_contains_vertices_and_labeled_edges() {
        let a = Vertex::new(
            "clock",
            Box::new(SimpleFunc::new(
                FuncType::new(vec![], Type::Int),
                Arc::new(|_| Ok(Value::Int(0))),
            )),
        )
        .unwrap();
        let b = Vertex::new(
            "fmt",
            Box::new(SimpleFunc::new(
                FuncType::new(vec![("t".to_string(), Type::Int)], Type::Str),
                Arc::new(|args| Ok(Value::str(args[0].to_string()))),
            )),
        )
        .unwrap();

        let mut graph = Graph::new();
        graph.add_edge(&a, &b, Edge::new(["t"]).unwrap()).unwrap();

        let dot = to_dot(&graph);
        assert!(dot.starts_with("digraph dagflow {"));
        assert!(dot.contains("label=\"clock\""));
        assert!(dot.contains("label=\"fmt\""));
        assert!(dot.contains("label=\"t\""));
    }
}
