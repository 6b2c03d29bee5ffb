//! An in-memory property graph engine.
//!
//! The container manages a directed multigraph whose vertices and edges
//! carry typed properties. Vertex properties are multi-valued under
//! `single`/`list`/`set` cardinality and carry their own meta-property
//! maps. Secondary indexing (single-key, composite, range) stays
//! consistent under mutation, a composable criterion engine plans
//! queries over the indices or falls back to scans, and a
//! self-describing snapshot codec round-trips the graph with
//! configurable identifier-conflict resolution.
//!
//! ```
//! use propgraph::{Criterion, Graph, Identifier, VertexSpec};
//!
//! let graph = Graph::new();
//! let dept = Identifier::new("dept").unwrap();
//! graph
//!     .add_vertex(VertexSpec::new().property(dept.clone(), "eng"))
//!     .unwrap();
//!
//! graph.index_vertex_property(dept.clone());
//! let hits: Vec<_> = graph.find_vertices(Criterion::exact(dept, "eng")).collect();
//! assert_eq!(hits.len(), 1);
//! ```
//!
//! Concurrency follows a reader/writer model: one lock around the whole
//! store, many readers or one writer. Lazy query streams re-acquire the
//! read lock per advance and honor a cooperative [`CancelToken`].

mod errors;
mod iter;
pub mod memory;
pub mod models;
pub mod query;
pub mod snapshot;

#[cfg(test)]
mod tests;

pub use crate::errors::{Error, Result, ValidationError, ValidationResult};
pub use crate::iter::CancelToken;
pub use crate::memory::{BulkItem, EdgeSpec, Features, Graph, GraphOptions, RangeStats, VertexSpec};
pub use crate::models::{
    Cardinality, Criterion, Direction, Edge, ElementId, Identifier, Value, Vertex, VertexProperty,
};
pub use crate::query::{Aggregated, Aggregation, EdgeStream, VertexStream};
pub use crate::snapshot::{ConflictPolicy, ImportReport, SinkMetadata, SnapshotSink};
