use super::util::{age_of, department_graph, ident, sorted_ids};
use crate::{Cardinality, EdgeSpec, Error, Graph, GraphOptions, Value, VertexSpec};

#[test]
fn should_probe_single_key_indices() {
    let (graph, _, b, c) = department_graph();
    graph.index_vertex_property(ident("city"));

    let hits = graph
        .vertices_with_property_value(&ident("city"), &Value::from("SF"))
        .unwrap();
    assert_eq!(sorted_ids(&hits), sorted_ids(&[b, c]));

    let misses = graph
        .vertices_with_property_value(&ident("city"), &Value::from("LA"))
        .unwrap();
    assert!(misses.is_empty());

    assert!(matches!(
        graph.vertices_with_property_value(&ident("dept"), &Value::from("Eng")),
        Err(Error::InvalidArgument(_))
    ));
}

#[test]
fn should_keep_single_key_indices_consistent_under_mutation() {
    let graph = Graph::new();
    graph.index_vertex_property(ident("city"));

    let v = graph
        .add_vertex(VertexSpec::new().property(ident("city"), "NY"))
        .unwrap();
    assert_eq!(
        graph.vertices_with_property_value(&ident("city"), &Value::from("NY")).unwrap().len(),
        1
    );

    // Single cardinality replaces, and the index follows.
    graph.set_vertex_property(&v.id, ident("city"), "SF").unwrap();
    assert!(graph
        .vertices_with_property_value(&ident("city"), &Value::from("NY"))
        .unwrap()
        .is_empty());
    assert_eq!(
        graph.vertices_with_property_value(&ident("city"), &Value::from("SF")).unwrap().len(),
        1
    );

    graph.remove_vertex(&v.id).unwrap();
    assert!(graph
        .vertices_with_property_value(&ident("city"), &Value::from("SF"))
        .unwrap()
        .is_empty());
}

#[test]
fn should_index_under_coerced_equality() {
    let graph = Graph::new();
    graph.index_vertex_property(ident("score"));
    graph
        .add_vertex(VertexSpec::new().property(ident("score"), "85"))
        .unwrap();
    graph
        .add_vertex(VertexSpec::new().property(ident("score"), 85i64))
        .unwrap();

    let hits = graph
        .vertices_with_property_value(&ident("score"), &Value::F64(85.0))
        .unwrap();
    assert_eq!(hits.len(), 2);
}

#[test]
fn should_rebuild_on_create_and_tolerate_idempotent_admin() {
    let (graph, a, _, _) = department_graph();
    graph.index_vertex_property(ident("dept"));
    graph.index_vertex_property(ident("dept"));
    assert_eq!(graph.indexed_vertex_properties(), vec![ident("dept")]);

    let hits = graph
        .vertices_with_property_value(&ident("dept"), &Value::from("Eng"))
        .unwrap();
    assert_eq!(hits.len(), 3);
    assert!(hits.iter().any(|v| v.id == a.id));

    graph.unindex_vertex_property(&ident("dept"));
    graph.unindex_vertex_property(&ident("dept"));
    assert!(graph.indexed_vertex_properties().is_empty());
}

#[test]
fn should_answer_composite_lookups() {
    let (graph, _, b, c) = department_graph();
    graph
        .index_vertex_composite(vec![ident("dept"), ident("city")])
        .unwrap();
    assert!(graph.is_vertex_composite_indexed(&[ident("dept"), ident("city")]));

    let hits = graph
        .vertices_by_composite(
            &[ident("dept"), ident("city")],
            &[Value::from("Eng"), Value::from("SF")],
        )
        .unwrap();
    assert_eq!(sorted_ids(&hits), sorted_ids(&[b, c]));
}

#[test]
fn should_answer_composite_prefix_lookups() {
    let (graph, a, b, c) = department_graph();
    graph
        .index_vertex_composite(vec![ident("dept"), ident("city")])
        .unwrap();

    let hits = graph
        .vertices_by_composite_prefix(&[ident("dept")], &[Value::from("Eng")])
        .unwrap();
    assert_eq!(sorted_ids(&hits), sorted_ids(&[a, b, c]));

    // `city` alone is not a prefix of the registered tuple.
    assert!(matches!(
        graph.vertices_by_composite_prefix(&[ident("city")], &[Value::from("SF")]),
        Err(Error::InvalidArgument(_))
    ));
}

#[test]
fn should_cross_product_multi_valued_keys_in_composites() {
    let graph = Graph::new();
    let v = graph
        .add_vertex(VertexSpec::new().property(ident("dept"), "Eng"))
        .unwrap();
    graph
        .set_vertex_property_with(&v.id, ident("city"), "NY", Cardinality::List)
        .unwrap();
    graph
        .set_vertex_property_with(&v.id, ident("city"), "SF", Cardinality::List)
        .unwrap();

    graph
        .index_vertex_composite(vec![ident("dept"), ident("city")])
        .unwrap();

    for city in ["NY", "SF"] {
        let hits = graph
            .vertices_by_composite(
                &[ident("dept"), ident("city")],
                &[Value::from("Eng"), Value::from(city)],
            )
            .unwrap();
        assert_eq!(hits.len(), 1, "missing tuple for {}", city);
    }

    // A vertex missing one member key contributes no tuples.
    graph
        .add_vertex(VertexSpec::new().property(ident("dept"), "Eng"))
        .unwrap();
    let hits = graph
        .vertices_by_composite_prefix(&[ident("dept")], &[Value::from("Eng")])
        .unwrap();
    assert_eq!(hits.len(), 1);
}

#[test]
fn should_match_composite_results_with_single_key_intersection() {
    let (graph, _, _, _) = department_graph();
    graph.index_vertex_property(ident("dept"));
    graph.index_vertex_property(ident("city"));
    graph
        .index_vertex_composite(vec![ident("dept"), ident("city")])
        .unwrap();

    let composite = graph
        .vertices_by_composite(
            &[ident("dept"), ident("city")],
            &[Value::from("Eng"), Value::from("SF")],
        )
        .unwrap();

    let dept: Vec<_> = graph
        .vertices_with_property_value(&ident("dept"), &Value::from("Eng"))
        .unwrap();
    let city: Vec<_> = graph
        .vertices_with_property_value(&ident("city"), &Value::from("SF"))
        .unwrap();
    let intersection: Vec<_> = dept
        .iter()
        .filter(|v| city.iter().any(|u| u.id == v.id))
        .cloned()
        .collect();

    assert_eq!(sorted_ids(&composite), sorted_ids(&intersection));
}

#[test]
fn should_answer_range_queries_in_order() {
    // Threshold zero forces the index path.
    let graph = Graph::with_options(GraphOptions::new().range_index_fallback_threshold(0));
    for age in [30i64, 25, 35, 28, 32] {
        graph
            .add_vertex(VertexSpec::new().property(ident("age"), age))
            .unwrap();
    }
    graph.index_vertex_range(ident("age"));
    assert!(graph.is_vertex_range_indexed(&ident("age")));

    let hits = graph
        .vertices_in_range(&ident("age"), Some(Value::I64(25)), Some(Value::I64(30)), true, false)
        .unwrap();
    assert_eq!(hits.iter().map(age_of).collect::<Vec<_>>(), vec![25, 28]);

    let open = graph
        .vertices_in_range(&ident("age"), Some(Value::I64(30)), None, true, true)
        .unwrap();
    assert_eq!(open.iter().map(age_of).collect::<Vec<_>>(), vec![30, 32, 35]);
}

#[test]
fn should_fall_back_to_scan_below_the_threshold() {
    let graph = Graph::with_options(GraphOptions::new().range_index_fallback_threshold(1000));
    for age in [30i64, 25, 35, 28, 32] {
        graph
            .add_vertex(VertexSpec::new().property(ident("age"), age))
            .unwrap();
    }
    graph.index_vertex_range(ident("age"));

    let hits = graph
        .vertices_in_range(&ident("age"), Some(Value::I64(25)), Some(Value::I64(30)), true, false)
        .unwrap();
    assert_eq!(hits.iter().map(age_of).collect::<Vec<_>>(), vec![25, 28]);
}

#[test]
fn should_include_coerced_strings_in_ranges() {
    let graph = Graph::with_options(GraphOptions::new().range_index_fallback_threshold(0));
    graph
        .add_vertex(VertexSpec::new().property(ident("score"), "85"))
        .unwrap();
    graph
        .add_vertex(VertexSpec::new().property(ident("score"), 85i64))
        .unwrap();
    graph
        .add_vertex(VertexSpec::new().property(ident("score"), "not-a-number"))
        .unwrap();
    graph.index_vertex_range(ident("score"));

    let hits = graph
        .vertices_in_range(&ident("score"), Some(Value::I64(80)), Some(Value::I64(90)), true, true)
        .unwrap();
    assert_eq!(hits.len(), 2);

    // The unparseable value was skipped, and the counter noticed.
    let (_, failures) = graph.coercion_stats();
    assert!(failures > 0);
}

#[test]
fn should_keep_range_indices_consistent_under_mutation() {
    let graph = Graph::with_options(GraphOptions::new().range_index_fallback_threshold(0));
    graph.index_vertex_range(ident("age"));
    let v = graph
        .add_vertex(VertexSpec::new().property(ident("age"), 30i64))
        .unwrap();

    graph.set_vertex_property(&v.id, ident("age"), 40i64).unwrap();
    let hits = graph
        .vertices_in_range(&ident("age"), Some(Value::I64(0)), Some(Value::I64(35)), true, true)
        .unwrap();
    assert!(hits.is_empty());

    let stats = graph.vertex_range_statistics();
    let age = stats.get(&ident("age")).unwrap();
    assert_eq!(age.entries, 1);
    assert_eq!(age.min, Some(40.0));
    assert_eq!(age.max, Some(40.0));
}

#[test]
fn should_index_edge_properties_too() {
    let graph = Graph::with_options(GraphOptions::new().range_index_fallback_threshold(0));
    let a = graph.add_vertex(VertexSpec::new()).unwrap();
    let b = graph.add_vertex(VertexSpec::new()).unwrap();
    let strong = graph
        .add_edge(EdgeSpec::new(a.id.clone(), ident("knows"), b.id.clone()).property(ident("weight"), 0.9f64))
        .unwrap();
    graph
        .add_edge(EdgeSpec::new(b.id.clone(), ident("knows"), a.id.clone()).property(ident("weight"), 0.1f64))
        .unwrap();

    graph.index_edge_property(ident("weight"));
    let hits = graph
        .edges_with_property_value(&ident("weight"), &Value::F64(0.9))
        .unwrap();
    assert_eq!(hits.len(), 1);
    assert_eq!(hits[0].id, strong.id);

    graph.index_edge_range(ident("weight"));
    let hits = graph
        .edges_in_range(&ident("weight"), Some(Value::F64(0.5)), None, true, true)
        .unwrap();
    assert_eq!(hits.len(), 1);
    assert_eq!(hits[0].id, strong.id);
}
