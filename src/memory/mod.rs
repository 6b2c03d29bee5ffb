//! The in-memory container: the graph store, its adjacency lists, and
//! the secondary indices.

mod adjacency;
mod graph;
pub(crate) mod indices;

pub use self::graph::{BulkItem, EdgeSpec, Features, Graph, GraphOptions, VertexSpec};
pub(crate) use self::graph::InternalGraph;
pub use self::indices::RangeStats;
