//! # dagflow-core - Time-Varying Function Graphs
//!
//! **The reactive evaluation core of rDagflow** - run a DAG of functions
//! whose outputs change over time, re-evaluating downstream consumers as
//! inputs change and emitting one coherent tick per settled state.
//!
//! ## Overview
//!
//! `dagflow-core` drives the continuous evaluation behind a configuration
//! language: every expression is a vertex in a directed acyclic graph, and
//! edges carry named argument slots from producers to consumers. It
//! provides:
//!
//! - **Long-lived concurrent producers** - timers, watchers, and polls run
//!   as streaming bodies on their own tasks
//! - **Struct-valued input aggregation** - each consumer receives complete,
//!   tear-free snapshots of its named arguments
//! - **Glitch-free ticks** - the output stream signals only settled states,
//!   never transient combinations of old and new ancestor values
//! - **Live graph mutation** - nodes rebuild subgraphs transactionally from
//!   inside their own streaming bodies
//! - **Reference-counted GC** - vertices and edges leave the graph only
//!   when their last logical user lets go
//!
//! ## Core Concepts
//!
//! ### 1. Values and Types
//!
//! [`Value`] is the single currency of the engine: typed, immutable, with
//! structural equality ([`value`]). Equality drives both duplicate
//! suppression and the live-table debounce.
//!
//! ### 2. The Node Contract
//!
//! Anything implementing [`Func`] can be a vertex: static metadata, a
//! one-time init, and a streaming body that reads input snapshots and
//! writes output values ([`node`]).
//!
//! ### 3. The Engine
//!
//! [`Engine`] validates a [`Graph`], runs three tasks per vertex, and
//! exposes one output: a stream of ticks. After a nil tick, read the table
//! with [`Engine::value_of`] ([`engine`]).
//!
//! ### 4. Transactions and GC
//!
//! [`Transaction`] buffers graph mutations and applies them atomically
//! against the paused engine; [`refcount`] decides when entities physically
//! leave ([`txn`], [`refcount`]).
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use dagflow_core::{Engine, EngineConfig, Edge, Graph, Vertex};
//! use dagflow_core::funcs::SimpleFunc;
//! use dagflow_core::types::{FuncType, Type};
//! use dagflow_core::value::Value;
//! use std::sync::Arc;
//! use tokio_stream::StreamExt;
//!
//! #[tokio::main]
//! async fn main() -> dagflow_core::Result<()> {
//!     let clock = Vertex::new(
//!         "clock",
//!         Box::new(SimpleFunc::new(
//!             FuncType::new(vec![], Type::Int),
//!             Arc::new(|_| Ok(Value::Int(0))),
//!         )),
//!     )?;
//!     let double = Vertex::new(
//!         "double",
//!         Box::new(SimpleFunc::new(
//!             FuncType::new(vec![("t".to_string(), Type::Int)], Type::Int),
//!             Arc::new(|args| {
//!                 let t = args[0].as_int().unwrap_or(0);
//!                 Ok(Value::Int(t * 2))
//!             }),
//!         )),
//!     )?;
//!
//!     let mut graph = Graph::new();
//!     graph.add_edge(&clock, &double, Edge::new(["t"])?)?;
//!
//!     let mut engine = Engine::new(graph, EngineConfig::default())?;
//!     let mut ticks = engine.stream()?;
//!     engine.run().await?;
//!
//!     while let Some(tick) = ticks.next().await {
//!         tick?;
//!         println!("double = {:?}", engine.value_of(&double));
//!         break;
//!     }
//!     engine.close().await;
//!     Ok(())
//! }
//! ```

pub mod engine;
pub mod error;
pub mod funcs;
pub mod graph;
pub mod node;
pub mod refcount;
pub mod registry;
pub mod txn;
pub mod types;
pub mod value;
pub mod visualization;

pub use engine::{Engine, EngineConfig, PauseGuard, Tick};
pub use error::{EngineError, Result};
pub use graph::{Edge, Graph, Vertex};
pub use node::{Func, FuncInfo, FuncInit, Shutdown, StreamCtx};
pub use refcount::RefCount;
pub use txn::Transaction;
pub use types::{FuncType, StructType, Type};
pub use value::{FuncValue, Value};
