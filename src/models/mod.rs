//! The data model: identifiers, element ids, values, elements, and the
//! criterion algebra.

mod criteria;
mod elements;
mod identifiers;
mod ids;
mod values;

pub use self::criteria::Criterion;
pub use self::elements::{Cardinality, Direction, Edge, Vertex, VertexProperty};
pub use self::identifiers::Identifier;
pub use self::ids::{ElementId, IdAllocator};
pub use self::values::{coerced_cmp, coerced_eq, CoercionKey, CoercionStats, NumericKey, Value};
