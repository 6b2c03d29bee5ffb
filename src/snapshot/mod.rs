//! The snapshot codec: a self-describing JSON document that round-trips
//! the whole graph, and a conflict-resolving reader for merging a
//! document into a non-empty target.
//!
//! Every scalar carries a type marker and its value in the exact textual
//! representation of its type, so numeric values (including non-finite
//! floats) survive bit-for-bit across implementations.

mod sink;

pub use self::sink::{SinkMetadata, SnapshotSink};

use std::collections::HashMap;
use std::io::{Read, Write};

use crate::errors::{Error, Result};
use crate::memory::{EdgeSpec, Graph, InternalGraph, VertexSpec};
use crate::models::{Cardinality, ElementId, Identifier, Value};

use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value as JsonValue};
use uuid::Uuid;

/// The snapshot format version this build writes and accepts.
pub const FORMAT_VERSION: u64 = 1;

/// What the reader does when an imported identifier already exists in
/// the target graph's domain.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConflictPolicy {
    /// Fail the import with `IdentifierConflict`.
    Strict,
    /// Allocate a fresh id and remap references within this import.
    GenerateNewId,
    /// Keep the existing element and fold the imported properties in,
    /// per cardinality. Neighbor edges survive.
    MergeProperties,
    /// Remove the existing element (and its incident edges), then create
    /// a new one under the incoming id.
    ReplaceElement,
}

impl Default for ConflictPolicy {
    fn default() -> Self {
        ConflictPolicy::GenerateNewId
    }
}

/// Counts of what an import did.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct ImportReport {
    pub vertices_created: usize,
    pub vertices_merged: usize,
    pub vertices_replaced: usize,
    pub edges_created: usize,
    pub edges_merged: usize,
    pub edges_replaced: usize,
}

struct PropertyRecord {
    cardinality: Cardinality,
    value: Value,
    meta: Vec<(Identifier, Value)>,
}

struct VertexRecord {
    id: ElementId,
    label: Identifier,
    properties: Vec<(Identifier, Vec<PropertyRecord>)>,
}

struct EdgeRecord {
    id: ElementId,
    label: Identifier,
    outbound_id: ElementId,
    inbound_id: ElementId,
    properties: Vec<(Identifier, Value)>,
}

struct SnapshotDoc {
    vertices: Vec<VertexRecord>,
    edges: Vec<EdgeRecord>,
}

fn malformed(msg: impl Into<String>) -> Error {
    Error::MalformedSnapshot(msg.into())
}

// --- writing ---

fn encode_value(value: &Value) -> JsonValue {
    match value {
        Value::Null => json!({ "type": "null" }),
        Value::String(s) => json!({ "type": "string", "value": s }),
        other => json!({ "type": other.kind(), "value": other.to_string() }),
    }
}

fn encode_id(id: &ElementId) -> JsonValue {
    match id {
        ElementId::Int(i) => json!({ "type": "int", "value": i.to_string() }),
        ElementId::String(s) => json!({ "type": "string", "value": s }),
        ElementId::Uuid(u) => json!({ "type": "uuid", "value": u.to_string() }),
    }
}

/// Builds the snapshot document for the current graph state. Elements
/// are emitted in stable id order; meta-properties ride inside their
/// vertex-property records.
pub fn to_json(graph: &Graph) -> JsonValue {
    let store = graph.internal().read().unwrap();

    let vertices: Vec<JsonValue> = store
        .vertices
        .values()
        .map(|vertex| {
            let mut properties = Map::new();
            for (key, instances) in &vertex.properties {
                let records: Vec<JsonValue> = instances
                    .iter()
                    .map(|p| {
                        let mut record = Map::new();
                        record.insert("id".to_string(), encode_id(&p.id));
                        record.insert("cardinality".to_string(), json!(p.cardinality.to_string()));
                        record.insert("value".to_string(), encode_value(&p.value));
                        if !p.meta.is_empty() {
                            let meta: Map<String, JsonValue> = p
                                .meta
                                .iter()
                                .map(|(k, v)| (k.to_string(), encode_value(v)))
                                .collect();
                            record.insert("meta".to_string(), JsonValue::Object(meta));
                        }
                        JsonValue::Object(record)
                    })
                    .collect();
                properties.insert(key.to_string(), JsonValue::Array(records));
            }
            json!({
                "id": encode_id(&vertex.id),
                "label": vertex.label.to_string(),
                "properties": properties,
            })
        })
        .collect();

    let edges: Vec<JsonValue> = store
        .edges
        .values()
        .map(|edge| {
            let properties: Map<String, JsonValue> = edge
                .properties
                .iter()
                .map(|(k, v)| (k.to_string(), encode_value(v)))
                .collect();
            json!({
                "id": encode_id(&edge.id),
                "label": edge.label.to_string(),
                "out": encode_id(&edge.outbound_id),
                "in": encode_id(&edge.inbound_id),
                "out_label": store.vertices.get(&edge.outbound_id).map(|v| v.label.to_string()),
                "in_label": store.vertices.get(&edge.inbound_id).map(|v| v.label.to_string()),
                "properties": properties,
            })
        })
        .collect();

    json!({
        "version": FORMAT_VERSION,
        "vertices": vertices,
        "edges": edges,
    })
}

/// Serializes the whole graph into `writer`.
pub fn write<W: Write>(graph: &Graph, writer: W) -> Result<()> {
    let doc = to_json(graph);
    serde_json::to_writer(writer, &doc)
        .map_err(|err| Error::Io(std::io::Error::new(std::io::ErrorKind::Other, err)))
}

// --- parsing ---

fn field<'a>(obj: &'a Map<String, JsonValue>, name: &str, ctx: &str) -> Result<&'a JsonValue> {
    obj.get(name).ok_or_else(|| malformed(format!("{} is missing required field `{}`", ctx, name)))
}

fn warn_unknown_fields(obj: &Map<String, JsonValue>, known: &[&str], ctx: &str) {
    for key in obj.keys() {
        if !known.contains(&key.as_str()) {
            log::warn!("ignoring unknown field `{}` in {}", key, ctx);
        }
    }
}

fn as_object<'a>(json: &'a JsonValue, ctx: &str) -> Result<&'a Map<String, JsonValue>> {
    json.as_object().ok_or_else(|| malformed(format!("{} must be an object", ctx)))
}

fn decode_value(json: &JsonValue, ctx: &str) -> Result<Value> {
    let obj = as_object(json, ctx)?;
    warn_unknown_fields(obj, &["type", "value"], ctx);

    let marker = field(obj, "type", ctx)?
        .as_str()
        .ok_or_else(|| malformed(format!("{} has a non-string type marker", ctx)))?;

    if marker == "null" {
        return Ok(Value::Null);
    }

    let raw = field(obj, "value", ctx)?;
    let text = raw
        .as_str()
        .ok_or_else(|| malformed(format!("{} value must be a string", ctx)))?;

    let bad = |marker: &str| malformed(format!("{} does not parse as {}", ctx, marker));
    match marker {
        "bool" => text.parse::<bool>().map(Value::Bool).map_err(|_| bad("bool")),
        "i32" => text.parse::<i32>().map(Value::I32).map_err(|_| bad("i32")),
        "i64" => text.parse::<i64>().map(Value::I64).map_err(|_| bad("i64")),
        "f32" => text.parse::<f32>().map(Value::F32).map_err(|_| bad("f32")),
        "f64" => text.parse::<f64>().map(Value::F64).map_err(|_| bad("f64")),
        "string" => Ok(Value::String(text.to_string())),
        other => Err(Error::UnsupportedScalarType(other.to_string())),
    }
}

fn decode_id(json: &JsonValue, ctx: &str) -> Result<ElementId> {
    let obj = as_object(json, ctx)?;
    warn_unknown_fields(obj, &["type", "value"], ctx);

    let marker = field(obj, "type", ctx)?
        .as_str()
        .ok_or_else(|| malformed(format!("{} has a non-string type marker", ctx)))?;
    let text = field(obj, "value", ctx)?
        .as_str()
        .ok_or_else(|| malformed(format!("{} value must be a string", ctx)))?;

    match marker {
        "int" => text
            .parse::<i64>()
            .map(ElementId::Int)
            .map_err(|_| malformed(format!("{} does not parse as an integer id", ctx))),
        "string" => Ok(ElementId::String(text.to_string())),
        "uuid" => Uuid::parse_str(text)
            .map(ElementId::Uuid)
            .map_err(|_| malformed(format!("{} does not parse as a uuid id", ctx))),
        other => Err(Error::UnsupportedScalarType(other.to_string())),
    }
}

fn decode_identifier(json: &JsonValue, ctx: &str) -> Result<Identifier> {
    let s = json
        .as_str()
        .ok_or_else(|| malformed(format!("{} must be a string", ctx)))?;
    Identifier::new(s).map_err(|err| malformed(format!("{} is not a valid identifier: {}", ctx, err)))
}

fn parse_key(raw: &str, ctx: &str) -> Result<Identifier> {
    Identifier::new(raw).map_err(|err| malformed(format!("{} has invalid property key `{}`: {}", ctx, raw, err)))
}

fn parse_property_record(json: &JsonValue, ctx: &str) -> Result<PropertyRecord> {
    let obj = as_object(json, ctx)?;
    warn_unknown_fields(obj, &["id", "cardinality", "value", "meta"], ctx);

    let cardinality = match obj.get("cardinality") {
        Some(raw) => {
            let s = raw
                .as_str()
                .ok_or_else(|| malformed(format!("{} cardinality must be a string", ctx)))?;
            s.parse::<Cardinality>()
                .map_err(|_| malformed(format!("{} has unknown cardinality `{}`", ctx, s)))?
        }
        None => Cardinality::Single,
    };

    let value = decode_value(field(obj, "value", ctx)?, &format!("{} value", ctx))?;

    let mut meta = Vec::new();
    if let Some(raw) = obj.get("meta") {
        let map = as_object(raw, &format!("{} meta", ctx))?;
        for (key, scalar) in map {
            let key = parse_key(key, ctx)?;
            let value = decode_value(scalar, &format!("{} meta `{}`", ctx, key))?;
            meta.push((key, value));
        }
    }

    Ok(PropertyRecord {
        cardinality,
        value,
        meta,
    })
}

fn parse_vertex_record(json: &JsonValue, index: usize) -> Result<VertexRecord> {
    let ctx = format!("vertex record {}", index);
    let obj = as_object(json, &ctx)?;
    warn_unknown_fields(obj, &["id", "label", "properties"], &ctx);

    let id = decode_id(field(obj, "id", &ctx)?, &format!("{} id", ctx))?;
    let label = decode_identifier(field(obj, "label", &ctx)?, &format!("{} label", ctx))?;

    let mut properties = Vec::new();
    if let Some(raw) = obj.get("properties") {
        let map = as_object(raw, &format!("{} properties", ctx))?;
        for (key, records) in map {
            let key = parse_key(key, &ctx)?;
            let array = records
                .as_array()
                .ok_or_else(|| malformed(format!("{} key `{}` must hold an array", ctx, key)))?;
            let mut parsed = Vec::with_capacity(array.len());
            for (i, record) in array.iter().enumerate() {
                parsed.push(parse_property_record(record, &format!("{} `{}`[{}]", ctx, key, i))?);
            }
            properties.push((key, parsed));
        }
    }

    Ok(VertexRecord { id, label, properties })
}

fn parse_edge_record(json: &JsonValue, index: usize) -> Result<EdgeRecord> {
    let ctx = format!("edge record {}", index);
    let obj = as_object(json, &ctx)?;
    warn_unknown_fields(obj, &["id", "label", "out", "in", "out_label", "in_label", "properties"], &ctx);

    let id = decode_id(field(obj, "id", &ctx)?, &format!("{} id", ctx))?;
    let label = decode_identifier(field(obj, "label", &ctx)?, &format!("{} label", ctx))?;
    let outbound_id = decode_id(field(obj, "out", &ctx)?, &format!("{} out", ctx))?;
    let inbound_id = decode_id(field(obj, "in", &ctx)?, &format!("{} in", ctx))?;

    let mut properties = Vec::new();
    if let Some(raw) = obj.get("properties") {
        let map = as_object(raw, &format!("{} properties", ctx))?;
        for (key, scalar) in map {
            let key = parse_key(key, &ctx)?;
            let value = decode_value(scalar, &format!("{} `{}`", ctx, key))?;
            properties.push((key, value));
        }
    }

    Ok(EdgeRecord {
        id,
        label,
        outbound_id,
        inbound_id,
        properties,
    })
}

fn parse_document(json: &JsonValue) -> Result<SnapshotDoc> {
    let obj = as_object(json, "snapshot document")?;
    warn_unknown_fields(obj, &["version", "vertices", "edges"], "snapshot document");

    let version = field(obj, "version", "snapshot document")?
        .as_u64()
        .ok_or_else(|| malformed("version must be an unsigned integer"))?;
    if version != FORMAT_VERSION {
        return Err(malformed(format!("unsupported format version {}", version)));
    }

    let mut vertices = Vec::new();
    if let Some(raw) = obj.get("vertices") {
        let array = raw.as_array().ok_or_else(|| malformed("vertices must be an array"))?;
        for (i, record) in array.iter().enumerate() {
            vertices.push(parse_vertex_record(record, i)?);
        }
    }

    let mut edges = Vec::new();
    if let Some(raw) = obj.get("edges") {
        let array = raw.as_array().ok_or_else(|| malformed("edges must be an array"))?;
        for (i, record) in array.iter().enumerate() {
            edges.push(parse_edge_record(record, i)?);
        }
    }

    Ok(SnapshotDoc { vertices, edges })
}

// --- applying ---

fn vertex_clashes(store: &InternalGraph, id: &ElementId) -> bool {
    store.vertices.contains_key(id) || store.vertex_ids.is_retired(id)
}

fn edge_clashes(store: &InternalGraph, id: &ElementId) -> bool {
    store.edges.contains_key(id) || store.edge_ids.is_retired(id)
}

fn apply_vertex_properties(store: &mut InternalGraph, id: &ElementId, record: &VertexRecord, merging: bool) -> Result<()> {
    for (key, records) in &record.properties {
        for property in records {
            let result = store.put_vertex_property(id, key.clone(), property.value.clone(), Some(property.cardinality));
            let created = match result {
                Ok(created) => created,
                // A merged set value that is already present is already
                // what the merge wants; everything else aborts.
                Err(Error::CardinalityViolation(_))
                    if merging && property.cardinality == Cardinality::Set && !property.value.is_null() =>
                {
                    continue;
                }
                Err(err) => return Err(err),
            };
            for (meta_key, meta_value) in &property.meta {
                store.put_meta_property(id, &created.id, meta_key.clone(), meta_value.clone())?;
            }
        }
    }
    Ok(())
}

fn apply(store: &mut InternalGraph, doc: SnapshotDoc, policy: ConflictPolicy) -> Result<ImportReport> {
    let mut remap: HashMap<ElementId, ElementId> = HashMap::new();
    let mut report = ImportReport::default();

    for record in &doc.vertices {
        let local_id = if !vertex_clashes(store, &record.id) {
            let spec = VertexSpec::with_label(record.label.clone()).id(record.id.clone());
            let id = store.insert_vertex(spec)?;
            apply_vertex_properties(store, &id, record, false)?;
            report.vertices_created += 1;
            id
        } else {
            match policy {
                ConflictPolicy::Strict => return Err(Error::IdentifierConflict(record.id.clone())),
                ConflictPolicy::GenerateNewId => {
                    let spec = VertexSpec::with_label(record.label.clone());
                    let id = store.insert_vertex(spec)?;
                    apply_vertex_properties(store, &id, record, false)?;
                    report.vertices_created += 1;
                    id
                }
                ConflictPolicy::MergeProperties => {
                    if store.vertices.contains_key(&record.id) {
                        apply_vertex_properties(store, &record.id, record, true)?;
                        report.vertices_merged += 1;
                        record.id.clone()
                    } else {
                        // Retired id with no live element: nothing to
                        // merge into, so fall back to a fresh id.
                        let spec = VertexSpec::with_label(record.label.clone());
                        let id = store.insert_vertex(spec)?;
                        apply_vertex_properties(store, &id, record, false)?;
                        report.vertices_created += 1;
                        id
                    }
                }
                ConflictPolicy::ReplaceElement => {
                    if store.vertices.contains_key(&record.id) {
                        store.remove_vertex(&record.id)?;
                    }
                    store.vertex_ids.restore(&record.id);
                    let spec = VertexSpec::with_label(record.label.clone()).id(record.id.clone());
                    let id = store.insert_vertex(spec)?;
                    apply_vertex_properties(store, &id, record, false)?;
                    report.vertices_replaced += 1;
                    id
                }
            }
        };
        remap.insert(record.id.clone(), local_id);
    }

    for record in &doc.edges {
        let outbound_id = remap.get(&record.outbound_id).cloned().unwrap_or_else(|| record.outbound_id.clone());
        let inbound_id = remap.get(&record.inbound_id).cloned().unwrap_or_else(|| record.inbound_id.clone());

        let mut spec = EdgeSpec::new(outbound_id, record.label.clone(), inbound_id);
        for (key, value) in &record.properties {
            spec = spec.property(key.clone(), value.clone());
        }

        if !edge_clashes(store, &record.id) {
            store.insert_edge(spec.id(record.id.clone()))?;
            report.edges_created += 1;
        } else {
            match policy {
                ConflictPolicy::Strict => return Err(Error::IdentifierConflict(record.id.clone())),
                ConflictPolicy::GenerateNewId => {
                    store.insert_edge(spec)?;
                    report.edges_created += 1;
                }
                ConflictPolicy::MergeProperties => {
                    if store.edges.contains_key(&record.id) {
                        for (key, value) in &record.properties {
                            store.put_edge_property(&record.id, key.clone(), value.clone())?;
                        }
                        report.edges_merged += 1;
                    } else {
                        store.insert_edge(spec)?;
                        report.edges_created += 1;
                    }
                }
                ConflictPolicy::ReplaceElement => {
                    if store.edges.contains_key(&record.id) {
                        store.remove_edge(&record.id)?;
                    }
                    store.edge_ids.restore(&record.id);
                    store.insert_edge(spec.id(record.id.clone()))?;
                    report.edges_replaced += 1;
                }
            }
        }
    }

    Ok(report)
}

/// Reads a snapshot document into `graph` under the given conflict
/// policy (or the graph's configured default).
///
/// The import is not transactional: elements applied before an error
/// aborts the import remain in the target.
pub fn read<R: Read>(graph: &Graph, reader: R, policy: Option<ConflictPolicy>) -> Result<ImportReport> {
    let json: JsonValue =
        serde_json::from_reader(reader).map_err(|err| malformed(format!("document does not parse: {}", err)))?;
    let doc = parse_document(&json)?;

    let mut store = graph.internal().write().unwrap();
    let policy = policy.unwrap_or(store.options.id_conflict_policy_on_import);
    apply(&mut store, doc, policy)
}
