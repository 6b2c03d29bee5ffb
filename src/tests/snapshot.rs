use super::util::ident;
use crate::snapshot::{self, ConflictPolicy};
use crate::{
    Cardinality, Direction, EdgeSpec, ElementId, Error, Graph, SnapshotSink, Value, VertexSpec,
};

use serde_json::json;
use tempfile::tempdir;

fn write_to_vec(graph: &Graph) -> Vec<u8> {
    let mut bytes = Vec::new();
    snapshot::write(graph, &mut bytes).unwrap();
    bytes
}

/// Two vertices and one edge, with user-supplied ids, as in the
/// conflict-policy scenarios.
fn source_graph() -> Graph {
    let graph = Graph::new();
    graph
        .add_vertex(
            VertexSpec::new()
                .id(1i64)
                .property(ident("name"), "one")
                .property(ident("score"), 85i64),
        )
        .unwrap();
    graph
        .add_vertex(VertexSpec::new().id(2i64).property(ident("name"), "two"))
        .unwrap();
    graph
        .add_edge(
            EdgeSpec::new(ElementId::Int(1), ident("knows"), ElementId::Int(2))
                .id(100i64)
                .property(ident("weight"), 0.5f64),
        )
        .unwrap();
    graph
}

#[test]
fn should_round_trip_an_empty_graph() {
    let empty = Graph::new();
    let bytes = write_to_vec(&empty);

    let target = Graph::new();
    let report = snapshot::read(&target, bytes.as_slice(), None).unwrap();
    assert_eq!(target.vertex_count(), 0);
    assert_eq!(target.edge_count(), 0);
    assert_eq!(report.vertices_created, 0);
}

#[test]
fn should_round_trip_into_an_empty_target() {
    let source = Graph::new();
    let v = source
        .add_vertex(VertexSpec::with_label(ident("person")).property(ident("age"), 30i64))
        .unwrap();
    let skill = source
        .set_vertex_property_with(&v.id, ident("skill"), "Java", Cardinality::Set)
        .unwrap();
    source
        .set_meta_property(&v.id, &skill.id, ident("since"), 2019i64)
        .unwrap();
    let w = source.add_vertex(VertexSpec::with_label(ident("person"))).unwrap();
    source
        .add_edge(EdgeSpec::new(v.id.clone(), ident("knows"), w.id.clone()).property(ident("weight"), 0.25f64))
        .unwrap();

    let target = Graph::new();
    let report = snapshot::read(&target, write_to_vec(&source).as_slice(), None).unwrap();
    assert_eq!(report.vertices_created, 2);
    assert_eq!(report.edges_created, 1);

    let restored = target.vertex(&v.id).unwrap();
    assert_eq!(restored.label, ident("person"));
    assert_eq!(restored.value(&ident("age")), Some(&Value::I64(30)));
    let restored_skill = restored.property(&ident("skill")).unwrap();
    assert_eq!(restored_skill.cardinality, Cardinality::Set);
    assert_eq!(restored_skill.meta_value(&ident("since")), Some(&Value::I64(2019)));

    let edges = target.vertex_edges(&v.id, Direction::Out, &[]).unwrap();
    assert_eq!(edges.len(), 1);
    assert_eq!(edges[0].inbound_id, w.id);
    assert_eq!(edges[0].property(&ident("weight")), Some(&Value::F64(0.25)));
}

#[test]
fn should_round_trip_every_scalar_type_exactly() {
    let source = Graph::with_options(crate::GraphOptions::new().allow_null_property_values(true));
    let values = vec![
        Value::Bool(true),
        Value::I32(i32::MIN),
        Value::I64(i64::MAX),
        Value::F32(0.1f32),
        Value::F64(f64::MIN_POSITIVE),
        Value::F64(f64::NEG_INFINITY),
        Value::from("snö \u{1F98B} text"),
        Value::Null,
    ];
    let v = source.add_vertex(VertexSpec::new()).unwrap();
    for (i, value) in values.iter().enumerate() {
        source
            .set_vertex_property(&v.id, ident(&format!("p{}", i)), value.clone())
            .unwrap();
    }

    let target = Graph::with_options(crate::GraphOptions::new().allow_null_property_values(true));
    snapshot::read(&target, write_to_vec(&source).as_slice(), None).unwrap();

    let restored = target.vertex(&v.id).unwrap();
    for (i, value) in values.iter().enumerate() {
        assert_eq!(restored.value(&ident(&format!("p{}", i))), Some(value), "scalar {}", i);
    }
}

#[test]
fn should_fail_strict_imports_on_id_clashes() {
    let target = Graph::new();
    target.add_vertex(VertexSpec::new().id(1i64)).unwrap();

    let err = snapshot::read(
        &target,
        write_to_vec(&source_graph()).as_slice(),
        Some(ConflictPolicy::Strict),
    )
    .unwrap_err();
    assert!(matches!(err, Error::IdentifierConflict(ElementId::Int(1))));
}

#[test]
fn should_remap_references_under_generate_new_id() {
    let target = Graph::new();
    target.add_vertex(VertexSpec::new().id(1i64)).unwrap();

    let report = snapshot::read(
        &target,
        write_to_vec(&source_graph()).as_slice(),
        Some(ConflictPolicy::GenerateNewId),
    )
    .unwrap();
    assert_eq!(report.vertices_created, 2);
    assert_eq!(report.edges_created, 1);
    assert_eq!(target.vertex_count(), 3);

    // The pre-existing vertex 1 was untouched; the imported edge follows
    // its remapped endpoints.
    assert!(target.vertex(&ElementId::Int(1)).unwrap().properties.is_empty());
    let edges = target.edges();
    assert_eq!(edges.len(), 1);
    let out = target.vertex(&edges[0].outbound_id).unwrap();
    let inb = target.vertex(&edges[0].inbound_id).unwrap();
    assert_eq!(out.value(&ident("name")), Some(&Value::from("one")));
    assert_eq!(inb.value(&ident("name")), Some(&Value::from("two")));
    assert_ne!(out.id, ElementId::Int(1));
}

#[test]
fn should_fold_properties_under_merge() {
    let target = Graph::new();
    target
        .add_vertex(VertexSpec::new().id(1i64).property(ident("city"), "NY"))
        .unwrap();

    let report = snapshot::read(
        &target,
        write_to_vec(&source_graph()).as_slice(),
        Some(ConflictPolicy::MergeProperties),
    )
    .unwrap();
    assert_eq!(report.vertices_merged, 1);
    assert_eq!(report.vertices_created, 1);
    assert_eq!(target.vertex_count(), 2);

    let merged = target.vertex(&ElementId::Int(1)).unwrap();
    assert_eq!(merged.value(&ident("city")), Some(&Value::from("NY")));
    assert_eq!(merged.value(&ident("name")), Some(&Value::from("one")));
    assert_eq!(merged.value(&ident("score")), Some(&Value::I64(85)));
}

#[test]
fn should_replace_elements_and_drop_their_edges() {
    let target = Graph::new();
    target
        .add_vertex(VertexSpec::new().id(1i64).property(ident("city"), "NY"))
        .unwrap();
    let other = target.add_vertex(VertexSpec::new().id(50i64)).unwrap();
    target
        .add_edge(EdgeSpec::new(ElementId::Int(1), ident("near"), other.id.clone()))
        .unwrap();

    let report = snapshot::read(
        &target,
        write_to_vec(&source_graph()).as_slice(),
        Some(ConflictPolicy::ReplaceElement),
    )
    .unwrap();
    assert_eq!(report.vertices_replaced, 1);

    let replaced = target.vertex(&ElementId::Int(1)).unwrap();
    assert_eq!(replaced.value(&ident("city")), None);
    assert_eq!(replaced.value(&ident("name")), Some(&Value::from("one")));

    // The prior incident edge died with the replaced vertex; only the
    // imported edge remains.
    let labels: Vec<_> = target.edges().into_iter().map(|e| e.label).collect();
    assert_eq!(labels, vec![ident("knows")]);
}

#[test]
fn should_use_the_configured_default_policy() {
    let target = Graph::with_options(
        crate::GraphOptions::new().id_conflict_policy_on_import(ConflictPolicy::Strict),
    );
    target.add_vertex(VertexSpec::new().id(1i64)).unwrap();

    let err = snapshot::read(&target, write_to_vec(&source_graph()).as_slice(), None).unwrap_err();
    assert!(matches!(err, Error::IdentifierConflict(_)));
}

#[test]
fn should_ignore_unknown_fields() {
    let doc = json!({
        "version": 1,
        "generator": "someone else's exporter",
        "vertices": [
            {
                "id": {"type": "int", "value": "7"},
                "label": "person",
                "color": "green",
                "properties": {
                    "age": [ {"value": {"type": "i64", "value": "30"}, "flag": true} ]
                }
            }
        ],
        "edges": []
    });

    let target = Graph::new();
    snapshot::read(&target, doc.to_string().as_bytes(), None).unwrap();
    let v = target.vertex(&ElementId::Int(7)).unwrap();
    assert_eq!(v.value(&ident("age")), Some(&Value::I64(30)));
}

#[test]
fn should_reject_missing_required_fields() {
    let doc = json!({
        "version": 1,
        "vertices": [ {"label": "person"} ],
    });
    let err = snapshot::read(&Graph::new(), doc.to_string().as_bytes(), None).unwrap_err();
    assert!(matches!(err, Error::MalformedSnapshot(_)));

    let doc = json!({ "vertices": [] });
    let err = snapshot::read(&Graph::new(), doc.to_string().as_bytes(), None).unwrap_err();
    assert!(matches!(err, Error::MalformedSnapshot(_)));

    let doc = json!({
        "version": 1,
        "edges": [ {"id": {"type": "int", "value": "1"}, "label": "knows"} ],
    });
    let err = snapshot::read(&Graph::new(), doc.to_string().as_bytes(), None).unwrap_err();
    assert!(matches!(err, Error::MalformedSnapshot(_)));
}

#[test]
fn should_reject_unknown_scalar_markers() {
    let doc = json!({
        "version": 1,
        "vertices": [
            {
                "id": {"type": "int", "value": "7"},
                "label": "person",
                "properties": {
                    "age": [ {"value": {"type": "decimal128", "value": "30"}} ]
                }
            }
        ],
    });
    let err = snapshot::read(&Graph::new(), doc.to_string().as_bytes(), None).unwrap_err();
    assert!(matches!(err, Error::UnsupportedScalarType(marker) if marker == "decimal128"));
}

#[test]
fn should_reject_unsupported_versions() {
    let doc = json!({ "version": 99, "vertices": [], "edges": [] });
    let err = snapshot::read(&Graph::new(), doc.to_string().as_bytes(), None).unwrap_err();
    assert!(matches!(err, Error::MalformedSnapshot(_)));
}

#[test]
fn should_save_and_load_through_the_sink() {
    let dir = tempdir().unwrap();
    let sink = SnapshotSink::new(dir.path().join("graph.json"));
    let source = source_graph();

    let metadata = sink.save(&source).unwrap();
    assert_eq!(metadata.vertex_count, 2);
    assert_eq!(metadata.edge_count, 1);
    assert!(!metadata.compressed);
    assert!(metadata.byte_size > 0);
    assert_eq!(sink.metadata().unwrap(), metadata);

    let target = Graph::new();
    sink.load(&target, None).unwrap();
    assert_eq!(target.vertex_count(), 2);
    assert_eq!(target.edge_count(), 1);
}

#[test]
fn should_gzip_when_asked() {
    let dir = tempdir().unwrap();
    let plain = SnapshotSink::new(dir.path().join("plain.json"));
    let packed = SnapshotSink::compressed(dir.path().join("packed.json.gz"));
    let source = source_graph();

    let plain_meta = plain.save(&source).unwrap();
    let packed_meta = packed.save(&source).unwrap();
    assert!(packed_meta.compressed);
    assert_ne!(plain_meta.byte_size, packed_meta.byte_size);

    let target = Graph::new();
    packed.load(&target, None).unwrap();
    assert_eq!(target.vertex_count(), 2);
    assert_eq!(target.edge_count(), 1);
}
