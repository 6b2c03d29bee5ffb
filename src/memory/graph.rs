use std::collections::{BTreeMap, HashSet};
use std::fs::File;
use std::io::{BufReader, BufWriter};
use std::path::PathBuf;
use std::sync::{Arc, RwLock};

use crate::errors::{Error, Result};
use crate::memory::adjacency::AdjacencyLists;
use crate::memory::indices::{IndexSet, RangeStats};
use crate::models::{
    coerced_eq, Cardinality, CoercionStats, Direction, Edge, ElementId, IdAllocator, Identifier, Value, Vertex,
    VertexProperty,
};
use crate::snapshot::ConflictPolicy;

use serde::{Deserialize, Serialize};
use tempfile::NamedTempFile;

/// Options accepted at container creation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GraphOptions {
    pub(crate) allow_null_property_values: bool,
    pub(crate) default_cardinality: Cardinality,
    pub(crate) id_conflict_policy_on_import: ConflictPolicy,
    pub(crate) range_index_fallback_threshold: usize,
}

impl Default for GraphOptions {
    fn default() -> Self {
        Self {
            allow_null_property_values: false,
            default_cardinality: Cardinality::Single,
            id_conflict_policy_on_import: ConflictPolicy::GenerateNewId,
            range_index_fallback_threshold: 16,
        }
    }
}

impl GraphOptions {
    pub fn new() -> Self {
        Self::default()
    }

    /// Permits storing the null marker as a property value.
    pub fn allow_null_property_values(mut self, allow: bool) -> Self {
        self.allow_null_property_values = allow;
        self
    }

    /// The cardinality used when a vertex property is set without an
    /// explicit one.
    pub fn default_cardinality(mut self, cardinality: Cardinality) -> Self {
        self.default_cardinality = cardinality;
        self
    }

    /// The policy the snapshot reader applies when no explicit policy is
    /// passed.
    pub fn id_conflict_policy_on_import(mut self, policy: ConflictPolicy) -> Self {
        self.id_conflict_policy_on_import = policy;
        self
    }

    /// Below this entry count a range index may answer through a scan
    /// instead; results are identical either way.
    pub fn range_index_fallback_threshold(mut self, threshold: usize) -> Self {
        self.range_index_fallback_threshold = threshold;
        self
    }
}

/// The capabilities this container advertises to clients.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Features {
    pub multi_properties: bool,
    pub meta_properties: bool,
    pub user_supplied_ids: bool,
    pub null_property_values: bool,
}

/// A vertex to be created: optional id and label, plus initial
/// properties. Validation happens inside `Graph::add_vertex`, so a
/// rejected spec leaves the container untouched.
#[derive(Debug, Clone, Default)]
pub struct VertexSpec {
    pub(crate) id: Option<ElementId>,
    pub(crate) label: Option<Identifier>,
    pub(crate) properties: Vec<(Identifier, Value, Option<Cardinality>)>,
}

impl VertexSpec {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_label(label: Identifier) -> Self {
        Self {
            label: Some(label),
            ..Self::default()
        }
    }

    pub fn id<I: Into<ElementId>>(mut self, id: I) -> Self {
        self.id = Some(id.into());
        self
    }

    pub fn label(mut self, label: Identifier) -> Self {
        self.label = Some(label);
        self
    }

    pub fn property<V: Into<Value>>(mut self, key: Identifier, value: V) -> Self {
        self.properties.push((key, value.into(), None));
        self
    }

    pub fn property_with_cardinality<V: Into<Value>>(
        mut self,
        key: Identifier,
        value: V,
        cardinality: Cardinality,
    ) -> Self {
        self.properties.push((key, value.into(), Some(cardinality)));
        self
    }
}

/// An edge to be created between two existing vertices.
#[derive(Debug, Clone)]
pub struct EdgeSpec {
    pub(crate) id: Option<ElementId>,
    pub(crate) outbound_id: ElementId,
    pub(crate) label: Identifier,
    pub(crate) inbound_id: ElementId,
    pub(crate) properties: Vec<(Identifier, Value)>,
}

impl EdgeSpec {
    pub fn new(outbound_id: ElementId, label: Identifier, inbound_id: ElementId) -> Self {
        Self {
            id: None,
            outbound_id,
            label,
            inbound_id,
            properties: Vec::new(),
        }
    }

    pub fn id<I: Into<ElementId>>(mut self, id: I) -> Self {
        self.id = Some(id.into());
        self
    }

    pub fn property<V: Into<Value>>(mut self, key: Identifier, value: V) -> Self {
        self.properties.push((key, value.into()));
        self
    }
}

/// One item of a bulk insert.
#[derive(Debug, Clone)]
pub enum BulkItem {
    Vertex(VertexSpec),
    Edge(EdgeSpec),
    VertexProperty(ElementId, Identifier, Value),
    EdgeProperty(ElementId, Identifier, Value),
}

// All of the data is actually stored in this struct, which is held
// internally by the graph handle. This way, we can wrap an rwlock around
// the entire store, rather than on a per-data structure basis, as the
// latter approach would risk deadlocking without extreme care.
#[derive(Debug, Serialize, Deserialize)]
pub(crate) struct InternalGraph {
    pub(crate) options: GraphOptions,
    pub(crate) vertices: BTreeMap<ElementId, Vertex>,
    pub(crate) edges: BTreeMap<ElementId, Edge>,
    pub(crate) adjacency: BTreeMap<ElementId, AdjacencyLists>,
    pub(crate) vertex_ids: IdAllocator,
    pub(crate) edge_ids: IdAllocator,
    pub(crate) vertex_property_ids: IdAllocator,
    pub(crate) vertex_indices: IndexSet,
    pub(crate) edge_indices: IndexSet,
    pub(crate) variables: BTreeMap<String, Value>,
    #[serde(skip)]
    pub(crate) coercion: CoercionStats,
}

impl Default for InternalGraph {
    fn default() -> Self {
        Self::with_options(GraphOptions::default())
    }
}

impl InternalGraph {
    fn with_options(options: GraphOptions) -> Self {
        Self {
            options,
            vertices: BTreeMap::new(),
            edges: BTreeMap::new(),
            adjacency: BTreeMap::new(),
            vertex_ids: IdAllocator::default(),
            edge_ids: IdAllocator::default(),
            vertex_property_ids: IdAllocator::default(),
            vertex_indices: IndexSet::default(),
            edge_indices: IndexSet::default(),
            variables: BTreeMap::new(),
            coercion: CoercionStats::default(),
        }
    }

    pub(crate) fn vertex_ref(&self, id: &ElementId) -> Result<&Vertex> {
        match self.vertices.get(id) {
            Some(v) => Ok(v),
            None if self.vertex_ids.is_retired(id) => Err(Error::ElementRemoved(id.clone())),
            None => Err(Error::ElementNotFound(id.clone())),
        }
    }

    pub(crate) fn edge_ref(&self, id: &ElementId) -> Result<&Edge> {
        match self.edges.get(id) {
            Some(e) => Ok(e),
            None if self.edge_ids.is_retired(id) => Err(Error::ElementRemoved(id.clone())),
            None => Err(Error::ElementNotFound(id.clone())),
        }
    }

    fn check_value(&self, value: &Value) -> Result<()> {
        if value.is_null() && !self.options.allow_null_property_values {
            Err(Error::CardinalityViolation("null property values are disabled".to_string()))
        } else {
            Ok(())
        }
    }

    /// Whether a vertex holds `key = value` under coerced equality. Index
    /// buckets over-approximate coerced equality, so probe results get
    /// re-checked through this.
    pub(crate) fn vertex_holds(&self, vertex: &Vertex, key: &Identifier, value: &Value) -> bool {
        vertex
            .properties
            .get(key)
            .into_iter()
            .flatten()
            .any(|p| coerced_eq(&p.value, value, &self.coercion))
    }

    pub(crate) fn edge_holds(&self, edge: &Edge, key: &Identifier, value: &Value) -> bool {
        edge.properties
            .get(key)
            .map(|v| coerced_eq(v, value, &self.coercion))
            .unwrap_or(false)
    }

    fn vertex_key_values(&self, id: &ElementId, key: &Identifier) -> Vec<Value> {
        self.vertices
            .get(id)
            .and_then(|v| v.properties.get(key))
            .map(|instances| instances.iter().map(|p| p.value.clone()).collect())
            .unwrap_or_default()
    }

    pub(crate) fn vertex_value_map(vertex: &Vertex) -> BTreeMap<Identifier, Vec<Value>> {
        vertex
            .properties
            .iter()
            .map(|(key, instances)| (key.clone(), instances.iter().map(|p| p.value.clone()).collect()))
            .collect()
    }

    pub(crate) fn edge_value_map(edge: &Edge) -> BTreeMap<Identifier, Vec<Value>> {
        edge.properties
            .iter()
            .map(|(key, value)| (key.clone(), vec![value.clone()]))
            .collect()
    }

    fn refresh_vertex_key(&mut self, id: &ElementId, key: &Identifier, old_values: &[Value], new_values: &[Value]) {
        let InternalGraph {
            vertices,
            vertex_indices,
            coercion,
            ..
        } = self;
        let other = |k: &Identifier| -> Vec<Value> {
            vertices
                .get(id)
                .and_then(|v| v.properties.get(k))
                .map(|instances| instances.iter().map(|p| p.value.clone()).collect())
                .unwrap_or_default()
        };
        vertex_indices.refresh_key(id, key, old_values, new_values, other, coercion);
    }

    fn refresh_edge_key(&mut self, id: &ElementId, key: &Identifier, old_values: &[Value], new_values: &[Value]) {
        let InternalGraph {
            edges,
            edge_indices,
            coercion,
            ..
        } = self;
        let other = |k: &Identifier| -> Vec<Value> {
            edges
                .get(id)
                .and_then(|e| e.properties.get(k))
                .map(|value| vec![value.clone()])
                .unwrap_or_default()
        };
        edge_indices.refresh_key(id, key, old_values, new_values, other, coercion);
    }

    /// Validates a vertex spec fully before any mutation: id clash, null
    /// values, and set-cardinality duplicates inside the spec itself.
    fn validate_vertex_spec(&self, spec: &VertexSpec) -> Result<()> {
        if let Some(id) = &spec.id {
            if self.vertices.contains_key(id) || self.vertex_ids.is_retired(id) {
                return Err(Error::DuplicateIdentifier(id.clone()));
            }
        }

        let mut seen: Vec<(&Identifier, &Value)> = Vec::new();
        for (key, value, cardinality) in &spec.properties {
            self.check_value(value)?;
            if cardinality.unwrap_or(self.options.default_cardinality) == Cardinality::Set {
                for (seen_key, seen_value) in &seen {
                    if *seen_key == key && coerced_eq(seen_value, value, &self.coercion) {
                        return Err(Error::CardinalityViolation(format!(
                            "duplicate set value for key {}",
                            key
                        )));
                    }
                }
            }
            seen.push((key, value));
        }

        Ok(())
    }

    pub(crate) fn insert_vertex(&mut self, spec: VertexSpec) -> Result<ElementId> {
        self.validate_vertex_spec(&spec)?;

        let id = match spec.id {
            Some(id) => {
                self.vertex_ids.reserve(&id);
                id
            }
            None => self.vertex_ids.next(),
        };
        let label = spec.label.unwrap_or_else(Identifier::default_vertex_label);

        self.vertices.insert(id.clone(), Vertex::with_id(id.clone(), label));
        self.adjacency.insert(id.clone(), AdjacencyLists::default());

        for (key, value, cardinality) in spec.properties {
            // Validated above; a failure here would mean the validation
            // and application paths disagree.
            self.put_vertex_property(&id, key, value, cardinality)?;
        }

        Ok(id)
    }

    pub(crate) fn put_vertex_property(
        &mut self,
        vertex_id: &ElementId,
        key: Identifier,
        value: Value,
        cardinality: Option<Cardinality>,
    ) -> Result<VertexProperty> {
        self.vertex_ref(vertex_id)?;
        self.check_value(&value)?;
        let cardinality = cardinality.unwrap_or(self.options.default_cardinality);

        let old_values = self.vertex_key_values(vertex_id, &key);

        if cardinality == Cardinality::Set {
            for existing in &old_values {
                if coerced_eq(existing, &value, &self.coercion) {
                    return Err(Error::CardinalityViolation(format!(
                        "key {} already holds an equal value",
                        key
                    )));
                }
            }
        }

        let property_id = self.vertex_property_ids.next();
        let property = VertexProperty::new(property_id, key.clone(), value, cardinality);

        let mut replaced_ids = Vec::new();
        {
            let vertex = self.vertices.get_mut(vertex_id).expect("vertex presence checked above");
            let instances = vertex.properties.entry(key.clone()).or_default();
            if cardinality == Cardinality::Single {
                replaced_ids.extend(instances.drain(..).map(|p| p.id));
            }
            instances.push(property.clone());
        }
        for replaced in replaced_ids {
            self.vertex_property_ids.retire(replaced);
        }

        let new_values = self.vertex_key_values(vertex_id, &key);
        self.refresh_vertex_key(vertex_id, &key, &old_values, &new_values);

        Ok(property)
    }

    pub(crate) fn remove_vertex_property(&mut self, vertex_id: &ElementId, property_id: &ElementId) -> Result<()> {
        self.vertex_ref(vertex_id)?;

        let key = {
            let vertex = self.vertices.get(vertex_id).expect("vertex presence checked above");
            vertex
                .properties
                .iter()
                .find(|(_, instances)| instances.iter().any(|p| &p.id == property_id))
                .map(|(key, _)| key.clone())
        };
        let key = key.ok_or_else(|| Error::ElementNotFound(property_id.clone()))?;

        let old_values = self.vertex_key_values(vertex_id, &key);
        {
            let vertex = self.vertices.get_mut(vertex_id).expect("vertex presence checked above");
            let instances = vertex.properties.get_mut(&key).expect("key located above");
            instances.retain(|p| &p.id != property_id);
            if instances.is_empty() {
                vertex.properties.remove(&key);
            }
        }
        self.vertex_property_ids.retire(property_id.clone());

        let new_values = self.vertex_key_values(vertex_id, &key);
        self.refresh_vertex_key(vertex_id, &key, &old_values, &new_values);
        Ok(())
    }

    pub(crate) fn put_meta_property(
        &mut self,
        vertex_id: &ElementId,
        property_id: &ElementId,
        key: Identifier,
        value: Value,
    ) -> Result<()> {
        self.vertex_ref(vertex_id)?;
        self.check_value(&value)?;

        let vertex = self.vertices.get_mut(vertex_id).expect("vertex presence checked above");
        for instances in vertex.properties.values_mut() {
            if let Some(property) = instances.iter_mut().find(|p| &p.id == property_id) {
                property.meta.insert(key, value);
                return Ok(());
            }
        }
        Err(Error::ElementNotFound(property_id.clone()))
    }

    pub(crate) fn remove_meta_property(
        &mut self,
        vertex_id: &ElementId,
        property_id: &ElementId,
        key: &Identifier,
    ) -> Result<()> {
        self.vertex_ref(vertex_id)?;

        let vertex = self.vertices.get_mut(vertex_id).expect("vertex presence checked above");
        for instances in vertex.properties.values_mut() {
            if let Some(property) = instances.iter_mut().find(|p| &p.id == property_id) {
                property.meta.remove(key);
                return Ok(());
            }
        }
        Err(Error::ElementNotFound(property_id.clone()))
    }

    fn validate_edge_spec(&self, spec: &EdgeSpec) -> Result<()> {
        self.vertex_ref(&spec.outbound_id)?;
        self.vertex_ref(&spec.inbound_id)?;
        if let Some(id) = &spec.id {
            if self.edges.contains_key(id) || self.edge_ids.is_retired(id) {
                return Err(Error::DuplicateIdentifier(id.clone()));
            }
        }
        for (_, value) in &spec.properties {
            self.check_value(value)?;
        }
        Ok(())
    }

    pub(crate) fn insert_edge(&mut self, spec: EdgeSpec) -> Result<ElementId> {
        self.validate_edge_spec(&spec)?;

        let id = match spec.id {
            Some(id) => {
                self.edge_ids.reserve(&id);
                id
            }
            None => self.edge_ids.next(),
        };

        let mut edge = Edge::with_id(
            id.clone(),
            spec.outbound_id.clone(),
            spec.label.clone(),
            spec.inbound_id.clone(),
        );
        for (key, value) in spec.properties {
            edge.properties.insert(key, value);
        }

        self.adjacency
            .entry(spec.outbound_id.clone())
            .or_default()
            .add_outgoing(spec.label.clone(), id.clone());
        self.adjacency
            .entry(spec.inbound_id.clone())
            .or_default()
            .add_incoming(spec.label.clone(), id.clone());

        let value_map = Self::edge_value_map(&edge);
        self.edges.insert(id.clone(), edge);
        self.edge_indices.add_element(&id, &value_map, &self.coercion);

        Ok(id)
    }

    pub(crate) fn put_edge_property(&mut self, edge_id: &ElementId, key: Identifier, value: Value) -> Result<()> {
        self.edge_ref(edge_id)?;
        self.check_value(&value)?;

        let old_values = self
            .edges
            .get(edge_id)
            .and_then(|e| e.properties.get(&key))
            .map(|v| vec![v.clone()])
            .unwrap_or_default();

        let edge = self.edges.get_mut(edge_id).expect("edge presence checked above");
        edge.properties.insert(key.clone(), value.clone());

        self.refresh_edge_key(edge_id, &key, &old_values, &[value]);
        Ok(())
    }

    pub(crate) fn remove_edge_property(&mut self, edge_id: &ElementId, key: &Identifier) -> Result<()> {
        self.edge_ref(edge_id)?;

        let old = {
            let edge = self.edges.get_mut(edge_id).expect("edge presence checked above");
            edge.properties.remove(key)
        };

        if let Some(old) = old {
            self.refresh_edge_key(edge_id, key, &[old], &[]);
        }
        Ok(())
    }

    pub(crate) fn remove_edge(&mut self, id: &ElementId) -> Result<()> {
        let edge = self.edge_ref(id)?.clone();

        let value_map = Self::edge_value_map(&edge);
        self.edge_indices.remove_element(id, &value_map);

        if let Some(adj) = self.adjacency.get_mut(&edge.outbound_id) {
            adj.remove_outgoing(&edge.label, id);
        }
        if let Some(adj) = self.adjacency.get_mut(&edge.inbound_id) {
            adj.remove_incoming(&edge.label, id);
        }

        self.edges.remove(id);
        self.edge_ids.retire(id.clone());
        Ok(())
    }

    pub(crate) fn remove_vertex(&mut self, id: &ElementId) -> Result<()> {
        let vertex = self.vertex_ref(id)?.clone();

        let incident: Vec<ElementId> = self
            .adjacency
            .get(id)
            .map(|adj| adj.edge_ids(Direction::Both, &[]))
            .unwrap_or_default();
        for edge_id in incident {
            // A self-loop shows up once; a dangling entry would mean the
            // adjacency store and edge map disagree.
            self.remove_edge(&edge_id)?;
        }

        let value_map = Self::vertex_value_map(&vertex);
        self.vertex_indices.remove_element(id, &value_map);

        for instances in vertex.properties.values() {
            for property in instances {
                self.vertex_property_ids.retire(property.id.clone());
            }
        }

        self.adjacency.remove(id);
        self.vertices.remove(id);
        self.vertex_ids.retire(id.clone());
        Ok(())
    }

    pub(crate) fn vertex_edges(
        &self,
        id: &ElementId,
        direction: Direction,
        labels: &[Identifier],
    ) -> Result<Vec<Edge>> {
        self.vertex_ref(id)?;
        let ids = self
            .adjacency
            .get(id)
            .map(|adj| adj.edge_ids(direction, labels))
            .unwrap_or_default();
        Ok(ids.iter().filter_map(|eid| self.edges.get(eid).cloned()).collect())
    }

    pub(crate) fn vertex_neighbors(
        &self,
        id: &ElementId,
        direction: Direction,
        labels: &[Identifier],
    ) -> Result<Vec<Vertex>> {
        self.vertex_ref(id)?;
        let adj = match self.adjacency.get(id) {
            Some(adj) => adj,
            None => return Ok(Vec::new()),
        };

        let mut neighbor_ids: Vec<ElementId> = Vec::new();
        let (out_ids, in_ids) = adj.edge_ids_by_side(labels);
        if direction != Direction::In {
            for eid in &out_ids {
                if let Some(edge) = self.edges.get(eid) {
                    neighbor_ids.push(edge.inbound_id.clone());
                }
            }
        }
        if direction != Direction::Out {
            for eid in &in_ids {
                if let Some(edge) = self.edges.get(eid) {
                    neighbor_ids.push(edge.outbound_id.clone());
                }
            }
        }

        Ok(neighbor_ids
            .iter()
            .filter_map(|vid| self.vertices.get(vid).cloned())
            .collect())
    }
}

/// An in-memory property graph.
///
/// Clones share the same store; the handle is cheap to pass around.
#[derive(Debug, Clone)]
pub struct Graph {
    store: Arc<RwLock<InternalGraph>>,
    path: Option<PathBuf>,
}

impl Default for Graph {
    fn default() -> Graph {
        Self {
            store: Arc::new(RwLock::new(InternalGraph::default())),
            path: None,
        }
    }
}

impl Graph {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_options(options: GraphOptions) -> Self {
        Self {
            store: Arc::new(RwLock::new(InternalGraph::with_options(options))),
            path: None,
        }
    }

    /// Reads a persisted image from disk. Calls to sync will overwrite
    /// the file at the specified path.
    ///
    /// # Arguments
    /// * `path`: The path to the persisted image.
    pub fn read<P: Into<PathBuf>>(path: P) -> Result<Graph> {
        let path = path.into();
        let buf = BufReader::new(File::open(&path)?);
        let store: InternalGraph = rmp_serde::decode::from_read(buf).map_err(|err| Error::Image(err.to_string()))?;
        Ok(Graph {
            store: Arc::new(RwLock::new(store)),
            path: Some(path),
        })
    }

    /// Creates a new graph. Calls to sync will overwrite the file at the
    /// specified path, but as opposed to `read`, this will not read the
    /// file first.
    ///
    /// # Arguments
    /// * `path`: The path to the persisted image.
    pub fn create<P: Into<PathBuf>>(path: P) -> Result<Graph> {
        Ok(Graph {
            store: Arc::new(RwLock::new(InternalGraph::default())),
            path: Some(path.into()),
        })
    }

    /// Persists the image, if a path was configured at `read`/`create`
    /// time. The write goes to a temporary file first and is renamed into
    /// place.
    pub fn sync(&self) -> Result<()> {
        if let Some(ref persist_path) = self.path {
            let temp_path = NamedTempFile::new()?;
            let mut buf = BufWriter::new(temp_path.as_file());
            let store = self.store.read().unwrap();
            rmp_serde::encode::write(&mut buf, &*store).map_err(|err| Error::Image(err.to_string()))?;
            drop(buf);
            temp_path.persist(persist_path).map_err(|err| Error::Io(err.error))?;
        }
        Ok(())
    }

    pub(crate) fn internal(&self) -> &Arc<RwLock<InternalGraph>> {
        &self.store
    }

    pub fn features(&self) -> Features {
        let store = self.store.read().unwrap();
        Features {
            multi_properties: true,
            meta_properties: true,
            user_supplied_ids: true,
            null_property_values: store.options.allow_null_property_values,
        }
    }

    pub fn options(&self) -> GraphOptions {
        self.store.read().unwrap().options.clone()
    }

    /// Creates a vertex. A rejected spec leaves the graph unchanged.
    pub fn add_vertex(&self, spec: VertexSpec) -> Result<Vertex> {
        let mut store = self.store.write().unwrap();
        let id = store.insert_vertex(spec)?;
        Ok(store.vertices[&id].clone())
    }

    /// Creates an edge between two existing vertices.
    pub fn add_edge(&self, spec: EdgeSpec) -> Result<Edge> {
        let mut store = self.store.write().unwrap();
        let id = store.insert_edge(spec)?;
        Ok(store.edges[&id].clone())
    }

    pub fn vertex(&self, id: &ElementId) -> Result<Vertex> {
        let store = self.store.read().unwrap();
        store.vertex_ref(id).cloned()
    }

    pub fn edge(&self, id: &ElementId) -> Result<Edge> {
        let store = self.store.read().unwrap();
        store.edge_ref(id).cloned()
    }

    /// All vertices, in stable id order.
    pub fn vertices(&self) -> Vec<Vertex> {
        let store = self.store.read().unwrap();
        store.vertices.values().cloned().collect()
    }

    /// The vertices among `ids` that exist; missing ids are skipped.
    pub fn specific_vertices(&self, ids: &[ElementId]) -> Vec<Vertex> {
        let store = self.store.read().unwrap();
        ids.iter().filter_map(|id| store.vertices.get(id).cloned()).collect()
    }

    /// All edges, in stable id order.
    pub fn edges(&self) -> Vec<Edge> {
        let store = self.store.read().unwrap();
        store.edges.values().cloned().collect()
    }

    /// The edges among `ids` that exist; missing ids are skipped.
    pub fn specific_edges(&self, ids: &[ElementId]) -> Vec<Edge> {
        let store = self.store.read().unwrap();
        ids.iter().filter_map(|id| store.edges.get(id).cloned()).collect()
    }

    pub fn vertex_count(&self) -> u64 {
        self.store.read().unwrap().vertices.len() as u64
    }

    pub fn edge_count(&self) -> u64 {
        self.store.read().unwrap().edges.len() as u64
    }

    pub fn remove_vertex(&self, id: &ElementId) -> Result<()> {
        self.store.write().unwrap().remove_vertex(id)
    }

    pub fn remove_edge(&self, id: &ElementId) -> Result<()> {
        self.store.write().unwrap().remove_edge(id)
    }

    /// Sets a vertex property under the graph's default cardinality.
    pub fn set_vertex_property<V: Into<Value>>(
        &self,
        vertex_id: &ElementId,
        key: Identifier,
        value: V,
    ) -> Result<VertexProperty> {
        self.store
            .write()
            .unwrap()
            .put_vertex_property(vertex_id, key, value.into(), None)
    }

    /// Sets a vertex property with an explicit cardinality.
    pub fn set_vertex_property_with<V: Into<Value>>(
        &self,
        vertex_id: &ElementId,
        key: Identifier,
        value: V,
        cardinality: Cardinality,
    ) -> Result<VertexProperty> {
        self.store
            .write()
            .unwrap()
            .put_vertex_property(vertex_id, key, value.into(), Some(cardinality))
    }

    /// Removes one vertex-property instance by its id.
    pub fn remove_vertex_property(&self, vertex_id: &ElementId, property_id: &ElementId) -> Result<()> {
        self.store.write().unwrap().remove_vertex_property(vertex_id, property_id)
    }

    pub fn set_edge_property<V: Into<Value>>(&self, edge_id: &ElementId, key: Identifier, value: V) -> Result<()> {
        self.store.write().unwrap().put_edge_property(edge_id, key, value.into())
    }

    /// Removes an edge property. Removing an absent key is a no-op.
    pub fn remove_edge_property(&self, edge_id: &ElementId, key: &Identifier) -> Result<()> {
        self.store.write().unwrap().remove_edge_property(edge_id, key)
    }

    /// Sets a meta-property on a vertex-property instance. Meta-properties
    /// are single-valued; assigning replaces.
    pub fn set_meta_property<V: Into<Value>>(
        &self,
        vertex_id: &ElementId,
        property_id: &ElementId,
        key: Identifier,
        value: V,
    ) -> Result<()> {
        self.store
            .write()
            .unwrap()
            .put_meta_property(vertex_id, property_id, key, value.into())
    }

    pub fn remove_meta_property(
        &self,
        vertex_id: &ElementId,
        property_id: &ElementId,
        key: &Identifier,
    ) -> Result<()> {
        self.store.write().unwrap().remove_meta_property(vertex_id, property_id, key)
    }

    /// The edges incident to a vertex, filtered by direction and labels
    /// (an empty label list means all labels). A self-loop appears once
    /// under `Both`.
    pub fn vertex_edges(&self, id: &ElementId, direction: Direction, labels: &[Identifier]) -> Result<Vec<Edge>> {
        self.store.read().unwrap().vertex_edges(id, direction, labels)
    }

    /// The neighbors of a vertex through matching edges. A self-loop
    /// vertex appears twice under `Both`, once per end.
    pub fn vertex_neighbors(&self, id: &ElementId, direction: Direction, labels: &[Identifier]) -> Result<Vec<Vertex>> {
        self.store.read().unwrap().vertex_neighbors(id, direction, labels)
    }

    pub fn degree(&self, id: &ElementId, direction: Direction, labels: &[Identifier]) -> Result<u64> {
        let store = self.store.read().unwrap();
        store.vertex_ref(id)?;
        Ok(store
            .adjacency
            .get(id)
            .map(|adj| adj.degree(direction, labels) as u64)
            .unwrap_or(0))
    }

    /// The graph-level variable map.
    pub fn variables(&self) -> BTreeMap<String, Value> {
        self.store.read().unwrap().variables.clone()
    }

    pub fn set_variable<V: Into<Value>>(&self, name: String, value: V) -> Result<()> {
        if name.is_empty() {
            return Err(Error::InvalidArgument("variable names must be non-empty".to_string()));
        }
        let mut store = self.store.write().unwrap();
        store.variables.insert(name, value.into());
        Ok(())
    }

    pub fn remove_variable(&self, name: &str) -> Option<Value> {
        self.store.write().unwrap().variables.remove(name)
    }

    /// Releases everything held in memory: elements, adjacency, indices,
    /// and variables. The handle remains usable and observes an empty
    /// graph; retired ids stay retired.
    pub fn close(&self) {
        let mut store = self.store.write().unwrap();
        let vertex_ids: Vec<ElementId> = store.vertices.keys().cloned().collect();
        let edge_ids: Vec<ElementId> = store.edges.keys().cloned().collect();
        for id in edge_ids {
            store.edge_ids.retire(id);
        }
        for id in vertex_ids {
            store.vertex_ids.retire(id);
        }
        store.vertices.clear();
        store.edges.clear();
        store.adjacency.clear();
        store.variables.clear();
        store.vertex_indices = IndexSet::default();
        store.edge_indices = IndexSet::default();
        log::debug!("closed graph store");
    }

    /// The coercion diagnostics: `(attempts, failures)`.
    pub fn coercion_stats(&self) -> (u64, u64) {
        let store = self.store.read().unwrap();
        (store.coercion.attempts(), store.coercion.failures())
    }

    /// Inserts many items under one writer section. Items apply in order
    /// and the first failure aborts the remainder; already-applied items
    /// remain.
    pub fn bulk_insert(&self, items: Vec<BulkItem>) -> Result<()> {
        let mut store = self.store.write().unwrap();
        for item in items {
            match item {
                BulkItem::Vertex(spec) => {
                    store.insert_vertex(spec)?;
                }
                BulkItem::Edge(spec) => {
                    store.insert_edge(spec)?;
                }
                BulkItem::VertexProperty(id, key, value) => {
                    store.put_vertex_property(&id, key, value, None)?;
                }
                BulkItem::EdgeProperty(id, key, value) => {
                    store.put_edge_property(&id, key, value)?;
                }
            }
        }
        Ok(())
    }

    // Single-key index administration.

    /// Enables indexing on a vertex property key. The index rebuilds
    /// itself from current state; repeated calls are no-ops.
    pub fn index_vertex_property(&self, key: Identifier) {
        let mut store = self.store.write().unwrap();
        if store.vertex_indices.key.create(key.clone()) {
            let mut entries: Vec<(ElementId, Value)> = Vec::new();
            for vertex in store.vertices.values() {
                for property in vertex.properties.get(&key).into_iter().flatten() {
                    entries.push((vertex.id.clone(), property.value.clone()));
                }
            }
            let count = entries.len();
            for (id, value) in entries {
                store.vertex_indices.key.insert(&key, &value, &id);
            }
            log::debug!("rebuilt vertex key index on {} with {} entries", key, count);
        }
    }

    pub fn unindex_vertex_property(&self, key: &Identifier) {
        self.store.write().unwrap().vertex_indices.key.drop_key(key);
    }

    pub fn indexed_vertex_properties(&self) -> Vec<Identifier> {
        self.store.read().unwrap().vertex_indices.key.indexed_keys()
    }

    /// Vertices holding `key = value` under coerced equality.
    ///
    /// # Errors
    /// `InvalidArgument` when the key is not indexed.
    pub fn vertices_with_property_value(&self, key: &Identifier, value: &Value) -> Result<Vec<Vertex>> {
        let store = self.store.read().unwrap();
        let ids = store
            .vertex_indices
            .key
            .get(key, value)
            .ok_or_else(|| Error::InvalidArgument(format!("vertex key {} is not indexed", key)))?;
        Ok(ids
            .iter()
            .filter_map(|id| store.vertices.get(id))
            .filter(|v| store.vertex_holds(v, key, value))
            .cloned()
            .collect())
    }

    /// Enables indexing on an edge property key.
    pub fn index_edge_property(&self, key: Identifier) {
        let mut store = self.store.write().unwrap();
        if store.edge_indices.key.create(key.clone()) {
            let entries: Vec<(ElementId, Value)> = store
                .edges
                .values()
                .filter_map(|e| e.properties.get(&key).map(|value| (e.id.clone(), value.clone())))
                .collect();
            let count = entries.len();
            for (id, value) in entries {
                store.edge_indices.key.insert(&key, &value, &id);
            }
            log::debug!("rebuilt edge key index on {} with {} entries", key, count);
        }
    }

    pub fn unindex_edge_property(&self, key: &Identifier) {
        self.store.write().unwrap().edge_indices.key.drop_key(key);
    }

    pub fn indexed_edge_properties(&self) -> Vec<Identifier> {
        self.store.read().unwrap().edge_indices.key.indexed_keys()
    }

    /// Edges holding `key = value` under coerced equality.
    pub fn edges_with_property_value(&self, key: &Identifier, value: &Value) -> Result<Vec<Edge>> {
        let store = self.store.read().unwrap();
        let ids = store
            .edge_indices
            .key
            .get(key, value)
            .ok_or_else(|| Error::InvalidArgument(format!("edge key {} is not indexed", key)))?;
        Ok(ids
            .iter()
            .filter_map(|id| store.edges.get(id))
            .filter(|e| store.edge_holds(e, key, value))
            .cloned()
            .collect())
    }

    // Composite index administration.

    /// Registers a composite index over a key tuple and rebuilds it from
    /// current state.
    pub fn index_vertex_composite(&self, keys: Vec<Identifier>) -> Result<()> {
        if keys.is_empty() {
            return Err(Error::InvalidArgument("composite key tuples must be non-empty".to_string()));
        }
        let mut store = self.store.write().unwrap();
        if store.composite_create_vertex(keys.clone()) {
            log::debug!("rebuilt vertex composite index on {:?}", keys.iter().map(|k| k.as_str()).collect::<Vec<_>>());
        }
        Ok(())
    }

    pub fn unindex_vertex_composite(&self, keys: &[Identifier]) {
        self.store.write().unwrap().vertex_indices.composite.drop_keys(keys);
    }

    pub fn is_vertex_composite_indexed(&self, keys: &[Identifier]) -> bool {
        self.store.read().unwrap().vertex_indices.composite.is_indexed(keys)
    }

    /// Full-tuple composite lookup.
    pub fn vertices_by_composite(&self, keys: &[Identifier], values: &[Value]) -> Result<Vec<Vertex>> {
        if keys.len() != values.len() {
            return Err(Error::InvalidArgument("key and value tuples differ in length".to_string()));
        }
        let store = self.store.read().unwrap();
        let value_keys: Vec<_> = values.iter().map(|v| v.coercion_key()).collect();
        let ids = store
            .vertex_indices
            .composite
            .get(keys, &value_keys)
            .ok_or_else(|| Error::InvalidArgument("no composite index over these keys".to_string()))?;
        Ok(ids
            .iter()
            .filter_map(|id| store.vertices.get(id))
            .filter(|v| keys.iter().zip(values).all(|(k, value)| store.vertex_holds(v, k, value)))
            .cloned()
            .collect())
    }

    /// Prefix composite lookup. `prefix_keys` must be a prefix of some
    /// registered tuple.
    pub fn vertices_by_composite_prefix(&self, prefix_keys: &[Identifier], prefix_values: &[Value]) -> Result<Vec<Vertex>> {
        if prefix_keys.len() != prefix_values.len() {
            return Err(Error::InvalidArgument("key and value tuples differ in length".to_string()));
        }
        let store = self.store.read().unwrap();
        if !store.vertex_indices.composite.prefix_registered(prefix_keys) {
            return Err(Error::InvalidArgument(
                "prefix does not match any registered composite index".to_string(),
            ));
        }
        let value_keys: Vec<_> = prefix_values.iter().map(|v| v.coercion_key()).collect();
        let ids = store.vertex_indices.composite.get_partial(prefix_keys, &value_keys);
        Ok(ids
            .iter()
            .filter_map(|id| store.vertices.get(id))
            .filter(|v| {
                prefix_keys
                    .iter()
                    .zip(prefix_values)
                    .all(|(k, value)| store.vertex_holds(v, k, value))
            })
            .cloned()
            .collect())
    }

    pub fn index_edge_composite(&self, keys: Vec<Identifier>) -> Result<()> {
        if keys.is_empty() {
            return Err(Error::InvalidArgument("composite key tuples must be non-empty".to_string()));
        }
        let mut store = self.store.write().unwrap();
        store.composite_create_edge(keys);
        Ok(())
    }

    pub fn unindex_edge_composite(&self, keys: &[Identifier]) {
        self.store.write().unwrap().edge_indices.composite.drop_keys(keys);
    }

    pub fn is_edge_composite_indexed(&self, keys: &[Identifier]) -> bool {
        self.store.read().unwrap().edge_indices.composite.is_indexed(keys)
    }

    pub fn edges_by_composite(&self, keys: &[Identifier], values: &[Value]) -> Result<Vec<Edge>> {
        if keys.len() != values.len() {
            return Err(Error::InvalidArgument("key and value tuples differ in length".to_string()));
        }
        let store = self.store.read().unwrap();
        let value_keys: Vec<_> = values.iter().map(|v| v.coercion_key()).collect();
        let ids = store
            .edge_indices
            .composite
            .get(keys, &value_keys)
            .ok_or_else(|| Error::InvalidArgument("no composite index over these keys".to_string()))?;
        Ok(ids
            .iter()
            .filter_map(|id| store.edges.get(id))
            .filter(|e| keys.iter().zip(values).all(|(k, value)| store.edge_holds(e, k, value)))
            .cloned()
            .collect())
    }

    pub fn edges_by_composite_prefix(&self, prefix_keys: &[Identifier], prefix_values: &[Value]) -> Result<Vec<Edge>> {
        if prefix_keys.len() != prefix_values.len() {
            return Err(Error::InvalidArgument("key and value tuples differ in length".to_string()));
        }
        let store = self.store.read().unwrap();
        if !store.edge_indices.composite.prefix_registered(prefix_keys) {
            return Err(Error::InvalidArgument(
                "prefix does not match any registered composite index".to_string(),
            ));
        }
        let value_keys: Vec<_> = prefix_values.iter().map(|v| v.coercion_key()).collect();
        let ids = store.edge_indices.composite.get_partial(prefix_keys, &value_keys);
        Ok(ids
            .iter()
            .filter_map(|id| store.edges.get(id))
            .filter(|e| {
                prefix_keys
                    .iter()
                    .zip(prefix_values)
                    .all(|(k, value)| store.edge_holds(e, k, value))
            })
            .cloned()
            .collect())
    }

    // Range index administration.

    /// Enables range indexing on a vertex property key. Values that do
    /// not coerce numerically are skipped.
    pub fn index_vertex_range(&self, key: Identifier) {
        let mut store = self.store.write().unwrap();
        store.range_create_vertex(key);
    }

    pub fn unindex_vertex_range(&self, key: &Identifier) {
        self.store.write().unwrap().vertex_indices.range.drop_key(key);
    }

    pub fn is_vertex_range_indexed(&self, key: &Identifier) -> bool {
        self.store.read().unwrap().vertex_indices.range.is_indexed(key)
    }

    /// Vertices whose `key` value lies in the interval, ascending by
    /// value. Small indexes may answer through a scan; results are
    /// identical.
    pub fn vertices_in_range(
        &self,
        key: &Identifier,
        lo: Option<Value>,
        hi: Option<Value>,
        lo_incl: bool,
        hi_incl: bool,
    ) -> Result<Vec<Vertex>> {
        let store = self.store.read().unwrap();
        let ids = store.vertex_range_ids(key, lo.as_ref(), hi.as_ref(), lo_incl, hi_incl)?;
        let mut seen = HashSet::new();
        Ok(ids
            .into_iter()
            .filter(|id| seen.insert(id.clone()))
            .filter_map(|id| store.vertices.get(&id).cloned())
            .collect())
    }

    pub fn vertex_range_statistics(&self) -> BTreeMap<Identifier, RangeStats> {
        self.store.read().unwrap().vertex_indices.range.statistics()
    }

    pub fn index_edge_range(&self, key: Identifier) {
        let mut store = self.store.write().unwrap();
        store.range_create_edge(key);
    }

    pub fn unindex_edge_range(&self, key: &Identifier) {
        self.store.write().unwrap().edge_indices.range.drop_key(key);
    }

    pub fn is_edge_range_indexed(&self, key: &Identifier) -> bool {
        self.store.read().unwrap().edge_indices.range.is_indexed(key)
    }

    pub fn edges_in_range(
        &self,
        key: &Identifier,
        lo: Option<Value>,
        hi: Option<Value>,
        lo_incl: bool,
        hi_incl: bool,
    ) -> Result<Vec<Edge>> {
        let store = self.store.read().unwrap();
        let ids = store.edge_range_ids(key, lo.as_ref(), hi.as_ref(), lo_incl, hi_incl)?;
        let mut seen = HashSet::new();
        Ok(ids
            .into_iter()
            .filter(|id| seen.insert(id.clone()))
            .filter_map(|id| store.edges.get(&id).cloned())
            .collect())
    }

    pub fn edge_range_statistics(&self) -> BTreeMap<Identifier, RangeStats> {
        self.store.read().unwrap().edge_indices.range.statistics()
    }
}

impl InternalGraph {
    fn composite_create_vertex(&mut self, keys: Vec<Identifier>) -> bool {
        if !self.vertex_indices.composite.create(keys.clone()) {
            return false;
        }
        let elements: Vec<(ElementId, BTreeMap<Identifier, Vec<Value>>)> = self
            .vertices
            .values()
            .map(|v| (v.id.clone(), Self::vertex_value_map(v)))
            .collect();
        for (id, value_map) in elements {
            let tuples = crate::memory::indices::value_tuples(&keys, |k| value_map.get(k).cloned().unwrap_or_default());
            self.vertex_indices.composite.insert_tuples(&keys, tuples, &id);
        }
        true
    }

    fn composite_create_edge(&mut self, keys: Vec<Identifier>) -> bool {
        if !self.edge_indices.composite.create(keys.clone()) {
            return false;
        }
        let elements: Vec<(ElementId, BTreeMap<Identifier, Vec<Value>>)> = self
            .edges
            .values()
            .map(|e| (e.id.clone(), Self::edge_value_map(e)))
            .collect();
        for (id, value_map) in elements {
            let tuples = crate::memory::indices::value_tuples(&keys, |k| value_map.get(k).cloned().unwrap_or_default());
            self.edge_indices.composite.insert_tuples(&keys, tuples, &id);
        }
        true
    }

    fn range_create_vertex(&mut self, key: Identifier) {
        if !self.vertex_indices.range.create(key.clone()) {
            return;
        }
        let mut entries: Vec<(ElementId, Value)> = Vec::new();
        for vertex in self.vertices.values() {
            for property in vertex.properties.get(&key).into_iter().flatten() {
                entries.push((vertex.id.clone(), property.value.clone()));
            }
        }
        for (id, value) in entries {
            self.vertex_indices.range.insert(&key, &value, &id, &self.coercion);
        }
    }

    fn range_create_edge(&mut self, key: Identifier) {
        if !self.edge_indices.range.create(key.clone()) {
            return;
        }
        let entries: Vec<(ElementId, Value)> = self
            .edges
            .values()
            .filter_map(|e| e.properties.get(&key).map(|value| (e.id.clone(), value.clone())))
            .collect();
        for (id, value) in entries {
            self.edge_indices.range.insert(&key, &value, &id, &self.coercion);
        }
    }

    /// Range ids for vertices, through the index or the silent scan
    /// fallback below the configured threshold. Ascending by value,
    /// ties by id; one entry per matching value instance.
    pub(crate) fn vertex_range_ids(
        &self,
        key: &Identifier,
        lo: Option<&Value>,
        hi: Option<&Value>,
        lo_incl: bool,
        hi_incl: bool,
    ) -> Result<Vec<ElementId>> {
        if !self.vertex_indices.range.is_indexed(key) {
            return Err(Error::InvalidArgument(format!("vertex key {} is not range indexed", key)));
        }
        let lo_n = lo.and_then(|v| v.as_numeric());
        let hi_n = hi.and_then(|v| v.as_numeric());

        let small = self
            .vertex_indices
            .range
            .len(key)
            .map(|len| len < self.options.range_index_fallback_threshold)
            .unwrap_or(false);
        if small {
            let mut hits: Vec<(f64, ElementId)> = Vec::new();
            for vertex in self.vertices.values() {
                for property in vertex.properties.get(key).into_iter().flatten() {
                    if let Some(v) = property.value.as_numeric_recorded(&self.coercion) {
                        if in_bounds(v, lo_n, hi_n, lo_incl, hi_incl) {
                            hits.push((v, vertex.id.clone()));
                        }
                    }
                }
            }
            hits.sort_by(|a, b| a.0.total_cmp(&b.0).then_with(|| a.1.cmp(&b.1)));
            return Ok(hits.into_iter().map(|(_, id)| id).collect());
        }

        Ok(self
            .vertex_indices
            .range
            .range(key, lo_n, hi_n, lo_incl, hi_incl)
            .unwrap_or_default())
    }

    pub(crate) fn edge_range_ids(
        &self,
        key: &Identifier,
        lo: Option<&Value>,
        hi: Option<&Value>,
        lo_incl: bool,
        hi_incl: bool,
    ) -> Result<Vec<ElementId>> {
        if !self.edge_indices.range.is_indexed(key) {
            return Err(Error::InvalidArgument(format!("edge key {} is not range indexed", key)));
        }
        let lo_n = lo.and_then(|v| v.as_numeric());
        let hi_n = hi.and_then(|v| v.as_numeric());

        let small = self
            .edge_indices
            .range
            .len(key)
            .map(|len| len < self.options.range_index_fallback_threshold)
            .unwrap_or(false);
        if small {
            let mut hits: Vec<(f64, ElementId)> = Vec::new();
            for edge in self.edges.values() {
                if let Some(value) = edge.properties.get(key) {
                    if let Some(v) = value.as_numeric_recorded(&self.coercion) {
                        if in_bounds(v, lo_n, hi_n, lo_incl, hi_incl) {
                            hits.push((v, edge.id.clone()));
                        }
                    }
                }
            }
            hits.sort_by(|a, b| a.0.total_cmp(&b.0).then_with(|| a.1.cmp(&b.1)));
            return Ok(hits.into_iter().map(|(_, id)| id).collect());
        }

        Ok(self
            .edge_indices
            .range
            .range(key, lo_n, hi_n, lo_incl, hi_incl)
            .unwrap_or_default())
    }
}

fn in_bounds(v: f64, lo: Option<f64>, hi: Option<f64>, lo_incl: bool, hi_incl: bool) -> bool {
    if let Some(lo) = lo {
        if v < lo || (!lo_incl && v == lo) {
            return false;
        }
    }
    if let Some(hi) = hi {
        if v > hi || (!hi_incl && v == hi) {
            return false;
        }
    }
    true
}
