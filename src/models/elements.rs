use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use crate::errors::ValidationError;
use crate::models::{ElementId, Identifier, Value};

use serde::{Deserialize, Serialize};

/// How many values a vertex-property key may carry on one vertex.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Cardinality {
    /// At most one instance; assigning replaces the prior one.
    Single,
    /// Any number of instances, duplicates allowed.
    List,
    /// Any number of instances, but no two with coerced-equal values.
    Set,
}

impl Default for Cardinality {
    fn default() -> Self {
        Cardinality::Single
    }
}

impl fmt::Display for Cardinality {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Cardinality::Single => write!(f, "single"),
            Cardinality::List => write!(f, "list"),
            Cardinality::Set => write!(f, "set"),
        }
    }
}

impl FromStr for Cardinality {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "single" => Ok(Cardinality::Single),
            "list" => Ok(Cardinality::List),
            "set" => Ok(Cardinality::Set),
            _ => Err(ValidationError::InvalidValue),
        }
    }
}

/// The direction of an edge relative to a vertex.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Direction {
    Out,
    In,
    Both,
}

/// One keyed value on a vertex, identified in its own domain and carrying
/// its own single-valued meta-property map.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VertexProperty {
    pub id: ElementId,
    pub key: Identifier,
    pub value: Value,
    pub cardinality: Cardinality,
    pub meta: BTreeMap<Identifier, Value>,
}

impl VertexProperty {
    pub fn new(id: ElementId, key: Identifier, value: Value, cardinality: Cardinality) -> Self {
        Self {
            id,
            key,
            value,
            cardinality,
            meta: BTreeMap::new(),
        }
    }

    /// Gets a meta-property value.
    pub fn meta_value(&self, key: &Identifier) -> Option<&Value> {
        self.meta.get(key)
    }

    /// The keys of this instance's meta-properties.
    pub fn meta_keys(&self) -> impl Iterator<Item = &Identifier> {
        self.meta.keys()
    }
}

/// A vertex, as handed out by the container: an owned snapshot of its
/// label and property instances at read time.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Vertex {
    pub id: ElementId,
    pub label: Identifier,
    pub properties: BTreeMap<Identifier, Vec<VertexProperty>>,
}

impl Vertex {
    pub fn with_id(id: ElementId, label: Identifier) -> Self {
        Self {
            id,
            label,
            properties: BTreeMap::new(),
        }
    }

    pub fn id(&self) -> &ElementId {
        &self.id
    }

    pub fn label(&self) -> &Identifier {
        &self.label
    }

    /// The first property instance under `key`, if any.
    pub fn property(&self, key: &Identifier) -> Option<&VertexProperty> {
        self.properties.get(key).and_then(|instances| instances.first())
    }

    /// The first value under `key`, if any.
    pub fn value(&self, key: &Identifier) -> Option<&Value> {
        self.property(key).map(|p| &p.value)
    }

    /// All property instances, optionally restricted to one key.
    pub fn properties(&self, key: Option<&Identifier>) -> Box<dyn Iterator<Item = &VertexProperty> + '_> {
        match key {
            Some(key) => match self.properties.get(key) {
                Some(instances) => Box::new(instances.iter()),
                None => Box::new(std::iter::empty()),
            },
            None => Box::new(self.properties.values().flatten()),
        }
    }

    /// The set of property keys present on this vertex.
    pub fn keys(&self) -> impl Iterator<Item = &Identifier> {
        self.properties.keys()
    }
}

/// A directed edge between two vertices, with a single-valued property
/// map.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Edge {
    pub id: ElementId,
    pub label: Identifier,
    pub outbound_id: ElementId,
    pub inbound_id: ElementId,
    pub properties: BTreeMap<Identifier, Value>,
}

impl Edge {
    pub fn with_id(id: ElementId, outbound_id: ElementId, label: Identifier, inbound_id: ElementId) -> Self {
        Self {
            id,
            label,
            outbound_id,
            inbound_id,
            properties: BTreeMap::new(),
        }
    }

    pub fn id(&self) -> &ElementId {
        &self.id
    }

    pub fn label(&self) -> &Identifier {
        &self.label
    }

    pub fn is_loop(&self) -> bool {
        self.outbound_id == self.inbound_id
    }

    /// Gets a property value.
    pub fn property(&self, key: &Identifier) -> Option<&Value> {
        self.properties.get(key)
    }

    /// The property keys present on this edge.
    pub fn keys(&self) -> impl Iterator<Item = &Identifier> {
        self.properties.keys()
    }

    /// The endpoint ids seen from `direction`: `Out` yields the source,
    /// `In` the target, `Both` yields both (a self-loop yields the same
    /// vertex twice).
    pub fn vertices(&self, direction: Direction) -> Vec<&ElementId> {
        match direction {
            Direction::Out => vec![&self.outbound_id],
            Direction::In => vec![&self.inbound_id],
            Direction::Both => vec![&self.outbound_id, &self.inbound_id],
        }
    }
}

#[cfg(test)]
mod tests {
    use super::{Cardinality, Direction, Edge, Vertex, VertexProperty};
    use crate::models::{ElementId, Identifier, Value};
    use std::str::FromStr;

    fn key(s: &str) -> Identifier {
        Identifier::new(s).unwrap()
    }

    #[test]
    fn should_parse_cardinalities() {
        assert_eq!(Cardinality::from_str("single").unwrap(), Cardinality::Single);
        assert_eq!(Cardinality::from_str("list").unwrap(), Cardinality::List);
        assert_eq!(Cardinality::from_str("set").unwrap(), Cardinality::Set);
        assert!(Cardinality::from_str("bag").is_err());
    }

    #[test]
    fn should_expose_vertex_properties() {
        let mut v = Vertex::with_id(ElementId::Int(1), key("person"));
        v.properties.insert(
            key("skill"),
            vec![
                VertexProperty::new(ElementId::Int(1), key("skill"), Value::from("java"), Cardinality::List),
                VertexProperty::new(ElementId::Int(2), key("skill"), Value::from("kotlin"), Cardinality::List),
            ],
        );

        assert_eq!(v.value(&key("skill")), Some(&Value::from("java")));
        assert_eq!(v.properties(Some(&key("skill"))).count(), 2);
        assert_eq!(v.properties(None).count(), 2);
        assert_eq!(v.properties(Some(&key("age"))).count(), 0);
        assert_eq!(v.keys().count(), 1);
    }

    #[test]
    fn should_expose_loop_endpoints_twice() {
        let e = Edge::with_id(ElementId::Int(10), ElementId::Int(1), key("knows"), ElementId::Int(1));
        assert!(e.is_loop());
        assert_eq!(e.vertices(Direction::Both).len(), 2);
        assert_eq!(e.vertices(Direction::Out), vec![&ElementId::Int(1)]);
    }
}
