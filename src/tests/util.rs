use crate::{ElementId, Graph, Identifier, Value, Vertex, VertexSpec};

pub fn ident(s: &str) -> Identifier {
    Identifier::new(s).unwrap()
}

/// Three vertices in one department across two cities; the fixture
/// behind the composite-index scenarios.
pub fn department_graph() -> (Graph, Vertex, Vertex, Vertex) {
    let graph = Graph::new();
    let a = graph
        .add_vertex(
            VertexSpec::new()
                .property(ident("dept"), "Eng")
                .property(ident("city"), "NY"),
        )
        .unwrap();
    let b = graph
        .add_vertex(
            VertexSpec::new()
                .property(ident("dept"), "Eng")
                .property(ident("city"), "SF"),
        )
        .unwrap();
    let c = graph
        .add_vertex(
            VertexSpec::new()
                .property(ident("dept"), "Eng")
                .property(ident("city"), "SF"),
        )
        .unwrap();
    (graph, a, b, c)
}

/// Five vertices with ages 25, 28, 30, 32, 35.
pub fn age_graph() -> (Graph, Vec<Vertex>) {
    let graph = Graph::new();
    let vertices = [25i64, 28, 30, 32, 35]
        .iter()
        .map(|age| {
            graph
                .add_vertex(VertexSpec::new().property(ident("age"), *age))
                .unwrap()
        })
        .collect();
    (graph, vertices)
}

/// One outbound vertex with five `knows` edges to fresh inbound
/// vertices.
pub fn star_graph(graph: &Graph) -> (ElementId, Vec<ElementId>) {
    let outbound = graph
        .add_vertex(VertexSpec::with_label(ident("hub")))
        .unwrap();
    let inbound_ids = (0..5)
        .map(|_| {
            let inbound = graph
                .add_vertex(VertexSpec::with_label(ident("spoke")))
                .unwrap();
            graph
                .add_edge(crate::EdgeSpec::new(
                    outbound.id.clone(),
                    ident("knows"),
                    inbound.id.clone(),
                ))
                .unwrap();
            inbound.id
        })
        .collect();
    (outbound.id, inbound_ids)
}

pub fn sorted_ids(vertices: &[Vertex]) -> Vec<ElementId> {
    let mut ids: Vec<ElementId> = vertices.iter().map(|v| v.id.clone()).collect();
    ids.sort();
    ids
}

pub fn age_of(vertex: &Vertex) -> i64 {
    match vertex.value(&ident("age")) {
        Some(Value::I64(age)) => *age,
        other => panic!("unexpected age value: {:?}", other),
    }
}
