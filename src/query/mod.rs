//! The property-query engine: criterion evaluation, the planner, the
//! lazy executor, and aggregations.

use std::collections::{BTreeMap, BTreeSet, HashSet};
use std::ops::Bound;
use std::sync::{Arc, RwLock};

use crate::errors::Result;
use crate::iter::CancelToken;
use crate::memory::{Graph, InternalGraph};
use crate::models::{
    coerced_eq, CoercionStats, Criterion, Edge, ElementId, Identifier, Value, Vertex, VertexProperty,
};

/// Whether a vertex satisfies a criterion.
pub(crate) fn vertex_matches(vertex: &Vertex, criterion: &Criterion, stats: &CoercionStats) -> bool {
    match criterion {
        Criterion::Exact { key, .. }
        | Criterion::Range { key, .. }
        | Criterion::Contains { key, .. }
        | Criterion::Regex { key, .. } => vertex
            .properties
            .get(key)
            .map(|instances| instances.iter().any(|p| criterion.value_matches(&p.value, stats)))
            .unwrap_or(false),
        Criterion::Exists { key } => vertex.properties.contains_key(key),
        Criterion::NotExists { key } => !vertex.properties.contains_key(key),
        Criterion::And(criteria) => criteria.iter().all(|c| vertex_matches(vertex, c, stats)),
        Criterion::Or(criteria) => criteria.iter().any(|c| vertex_matches(vertex, c, stats)),
        Criterion::Not(inner) => !vertex_matches(vertex, inner, stats),
        Criterion::MetaEq { key, meta_key, value } => vertex
            .properties
            .get(key)
            .map(|instances| {
                instances
                    .iter()
                    .any(|p| p.meta.get(meta_key).map(|m| coerced_eq(m, value, stats)).unwrap_or(false))
            })
            .unwrap_or(false),
        Criterion::CardinalityEq { key, cardinality } => vertex
            .properties
            .get(key)
            .map(|instances| instances.iter().any(|p| p.cardinality == *cardinality))
            .unwrap_or(false),
    }
}

/// Whether an edge satisfies a criterion. Edges have no vertex-property
/// instances, so the meta and cardinality leaves never match.
pub(crate) fn edge_matches(edge: &Edge, criterion: &Criterion, stats: &CoercionStats) -> bool {
    match criterion {
        Criterion::Exact { key, .. }
        | Criterion::Range { key, .. }
        | Criterion::Contains { key, .. }
        | Criterion::Regex { key, .. } => edge
            .properties
            .get(key)
            .map(|value| criterion.value_matches(value, stats))
            .unwrap_or(false),
        Criterion::Exists { key } => edge.properties.contains_key(key),
        Criterion::NotExists { key } => !edge.properties.contains_key(key),
        Criterion::And(criteria) => criteria.iter().all(|c| edge_matches(edge, c, stats)),
        Criterion::Or(criteria) => criteria.iter().any(|c| edge_matches(edge, c, stats)),
        Criterion::Not(inner) => !edge_matches(edge, inner, stats),
        Criterion::MetaEq { .. } | Criterion::CardinalityEq { .. } => false,
    }
}

/// Whether one vertex-property instance satisfies a criterion. Value
/// leaves test the instance's own value when the keys line up, and fall
/// back to the instance's meta-properties otherwise.
fn property_matches(property: &VertexProperty, criterion: &Criterion, stats: &CoercionStats) -> bool {
    match criterion {
        Criterion::Exact { key, .. }
        | Criterion::Range { key, .. }
        | Criterion::Contains { key, .. }
        | Criterion::Regex { key, .. } => {
            if &property.key == key {
                criterion.value_matches(&property.value, stats)
            } else if let Some(meta) = property.meta.get(key) {
                criterion.value_matches(meta, stats)
            } else {
                false
            }
        }
        Criterion::Exists { key } => &property.key == key || property.meta.contains_key(key),
        Criterion::NotExists { key } => &property.key != key && !property.meta.contains_key(key),
        Criterion::And(criteria) => criteria.iter().all(|c| property_matches(property, c, stats)),
        Criterion::Or(criteria) => criteria.iter().any(|c| property_matches(property, c, stats)),
        Criterion::Not(inner) => !property_matches(property, inner, stats),
        Criterion::MetaEq { key, meta_key, value } => {
            &property.key == key
                && property
                    .meta
                    .get(meta_key)
                    .map(|m| coerced_eq(m, value, stats))
                    .unwrap_or(false)
        }
        Criterion::CardinalityEq { key, cardinality } => &property.key == key && property.cardinality == *cardinality,
    }
}

/// Which element domain a plan runs over.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum PlanDomain {
    Vertex,
    Edge,
}

/// How candidate elements are produced. Probes materialize their id list
/// at plan time, under the same read section that inspected the indices;
/// the executor re-verifies each candidate against the live store as it
/// advances.
#[derive(Debug)]
enum Source {
    Probe {
        ids: std::vec::IntoIter<ElementId>,
        ordered: bool,
    },
    Scan {
        last: Option<ElementId>,
    },
}

/// A candidate index strategy, scored by its distinct-value count: more
/// distinct values means fewer elements per probe.
enum Candidate {
    Single { key: Identifier, value: Value, score: usize },
    Composite { keys: Vec<Identifier>, covered: usize, score: usize },
    Range { criterion: Criterion, score: usize },
}

impl Candidate {
    fn score(&self) -> usize {
        match self {
            Candidate::Single { score, .. } => *score,
            Candidate::Composite { score, .. } => *score,
            Candidate::Range { score, .. } => *score,
        }
    }
}

fn domain_indices(store: &InternalGraph, domain: PlanDomain) -> &crate::memory::indices::IndexSet {
    match domain {
        PlanDomain::Vertex => &store.vertex_indices,
        PlanDomain::Edge => &store.edge_indices,
    }
}

/// Chooses the execution strategy for a criterion. Plans never change the
/// result set, only how candidates are produced.
fn plan(store: &InternalGraph, domain: PlanDomain, criterion: &Criterion) -> Source {
    let indices = domain_indices(store, domain);

    match criterion {
        Criterion::Exact { key, value } => {
            if let Some(ids) = indices.key.get(key, value) {
                return Source::Probe {
                    ids: ids.into_iter(),
                    ordered: false,
                };
            }
        }
        Criterion::Range {
            key,
            lo,
            hi,
            lo_incl,
            hi_incl,
        } => {
            if indices.range.is_indexed(key) {
                let ids = range_probe(store, domain, key, lo.as_ref(), hi.as_ref(), *lo_incl, *hi_incl);
                return Source::Probe {
                    ids: ids.into_iter(),
                    ordered: true,
                };
            }
        }
        Criterion::And(criteria) => {
            if let Some(source) = plan_conjunction(store, domain, criteria) {
                return source;
            }
        }
        _ => {}
    }

    Source::Scan { last: None }
}

/// Plans an `And`: gathers every index able to serve one of its leaves,
/// prefers a composite cover of two or more exact keys, and otherwise
/// takes the most selective single candidate. The full conjunction is
/// re-applied as the residual filter either way.
fn plan_conjunction(store: &InternalGraph, domain: PlanDomain, criteria: &[Criterion]) -> Option<Source> {
    let indices = domain_indices(store, domain);

    let mut exacts: BTreeMap<Identifier, Value> = BTreeMap::new();
    for criterion in criteria {
        if let Criterion::Exact { key, value } = criterion {
            exacts.entry(key.clone()).or_insert_with(|| value.clone());
        }
    }

    let mut candidates: Vec<Candidate> = Vec::new();

    let exact_keys: BTreeSet<Identifier> = exacts.keys().cloned().collect();
    if let Some((keys, covered)) = indices.composite.best_cover(&exact_keys) {
        let score = indices.composite.distinct_tuples(&keys).unwrap_or(0);
        candidates.push(Candidate::Composite { keys, covered, score });
    }

    for (key, value) in &exacts {
        if let Some(score) = indices.key.distinct_count(key) {
            candidates.push(Candidate::Single {
                key: key.clone(),
                value: value.clone(),
                score,
            });
        }
    }

    for criterion in criteria {
        if let Criterion::Range { key, .. } = criterion {
            if let Some(score) = indices.range.distinct_count(key) {
                candidates.push(Candidate::Range {
                    criterion: criterion.clone(),
                    score,
                });
            }
        }
    }

    // A composite covering two or more keys beats everything; below
    // that, selectivity decides.
    let chosen = candidates
        .into_iter()
        .max_by_key(|c| match c {
            Candidate::Composite { covered, score, .. } if *covered >= 2 => (1, *score),
            c => (0, c.score()),
        })?;

    match chosen {
        Candidate::Single { key, value, .. } => {
            let ids = indices.key.get(&key, &value)?;
            Some(Source::Probe {
                ids: ids.into_iter(),
                ordered: false,
            })
        }
        Candidate::Composite { keys, covered, .. } => {
            let prefix_keys = &keys[..covered];
            let prefix_values: Vec<_> = prefix_keys
                .iter()
                .map(|k| exacts[k].coercion_key())
                .collect();
            let ids = if covered == keys.len() {
                indices.composite.get(&keys, &prefix_values)?
            } else {
                indices.composite.get_partial(prefix_keys, &prefix_values)
            };
            Some(Source::Probe {
                ids: ids.into_iter(),
                ordered: false,
            })
        }
        Candidate::Range { criterion, .. } => {
            if let Criterion::Range {
                key,
                lo,
                hi,
                lo_incl,
                hi_incl,
            } = criterion
            {
                let ids = range_probe(store, domain, &key, lo.as_ref(), hi.as_ref(), lo_incl, hi_incl);
                Some(Source::Probe {
                    ids: ids.into_iter(),
                    ordered: true,
                })
            } else {
                None
            }
        }
    }
}

fn range_probe(
    store: &InternalGraph,
    domain: PlanDomain,
    key: &Identifier,
    lo: Option<&Value>,
    hi: Option<&Value>,
    lo_incl: bool,
    hi_incl: bool,
) -> Vec<ElementId> {
    let result = match domain {
        PlanDomain::Vertex => store.vertex_range_ids(key, lo, hi, lo_incl, hi_incl),
        PlanDomain::Edge => store.edge_range_ids(key, lo, hi, lo_incl, hi_incl),
    };
    // The planner only probes keys it saw indexed under this same read
    // section, so the lookup cannot report an untracked key.
    result.unwrap_or_default()
}

/// A lazy, restartable stream of vertices satisfying a criterion.
///
/// The iterator holds no lock between calls: each advance re-acquires
/// the read lock, so holding one of these across a long window delays
/// only its own progress. Candidates are re-verified against the live
/// store, and results are deduplicated. `ordered` reports ascending
/// value order, which only a range-driven plan provides.
pub struct VertexStream {
    store: Arc<RwLock<InternalGraph>>,
    criterion: Criterion,
    source: Source,
    seen: HashSet<ElementId>,
    cancel: CancelToken,
    ordered: bool,
}

impl VertexStream {
    pub fn ordered(&self) -> bool {
        self.ordered
    }

    pub fn cancel_token(&self) -> CancelToken {
        self.cancel.clone()
    }
}

impl Iterator for VertexStream {
    type Item = Vertex;

    fn next(&mut self) -> Option<Vertex> {
        loop {
            if self.cancel.is_cancelled() {
                return None;
            }
            let store = self.store.read().unwrap();
            match &mut self.source {
                Source::Probe { ids, .. } => {
                    let id = ids.next()?;
                    if !self.seen.insert(id.clone()) {
                        continue;
                    }
                    if let Some(vertex) = store.vertices.get(&id) {
                        if vertex_matches(vertex, &self.criterion, &store.coercion) {
                            return Some(vertex.clone());
                        }
                    }
                }
                Source::Scan { last } => {
                    let next = match last {
                        Some(last_id) => store
                            .vertices
                            .range((Bound::Excluded(last_id.clone()), Bound::Unbounded))
                            .next(),
                        None => store.vertices.iter().next(),
                    };
                    match next {
                        Some((id, vertex)) => {
                            *last = Some(id.clone());
                            if vertex_matches(vertex, &self.criterion, &store.coercion) {
                                return Some(vertex.clone());
                            }
                        }
                        None => return None,
                    }
                }
            }
        }
    }
}

/// A lazy, restartable stream of edges satisfying a criterion.
pub struct EdgeStream {
    store: Arc<RwLock<InternalGraph>>,
    criterion: Criterion,
    source: Source,
    seen: HashSet<ElementId>,
    cancel: CancelToken,
    ordered: bool,
}

impl EdgeStream {
    pub fn ordered(&self) -> bool {
        self.ordered
    }

    pub fn cancel_token(&self) -> CancelToken {
        self.cancel.clone()
    }
}

impl Iterator for EdgeStream {
    type Item = Edge;

    fn next(&mut self) -> Option<Edge> {
        loop {
            if self.cancel.is_cancelled() {
                return None;
            }
            let store = self.store.read().unwrap();
            match &mut self.source {
                Source::Probe { ids, .. } => {
                    let id = ids.next()?;
                    if !self.seen.insert(id.clone()) {
                        continue;
                    }
                    if let Some(edge) = store.edges.get(&id) {
                        if edge_matches(edge, &self.criterion, &store.coercion) {
                            return Some(edge.clone());
                        }
                    }
                }
                Source::Scan { last } => {
                    let next = match last {
                        Some(last_id) => store
                            .edges
                            .range((Bound::Excluded(last_id.clone()), Bound::Unbounded))
                            .next(),
                        None => store.edges.iter().next(),
                    };
                    match next {
                        Some((id, edge)) => {
                            *last = Some(id.clone());
                            if edge_matches(edge, &self.criterion, &store.coercion) {
                                return Some(edge.clone());
                            }
                        }
                        None => return None,
                    }
                }
            }
        }
    }
}

/// An aggregation over one property key.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Aggregation {
    Count,
    DistinctCount,
    Min,
    Max,
    Sum,
    Avg,
}

/// The outcome of an aggregation. Numeric aggregates over a key with no
/// numeric values produce `None`.
#[derive(Debug, Clone, PartialEq)]
pub enum Aggregated {
    Count(u64),
    Number(f64),
    None,
}

fn aggregate_values<'a>(
    values: impl Iterator<Item = &'a Value>,
    aggregation: Aggregation,
    stats: &CoercionStats,
) -> Aggregated {
    match aggregation {
        Aggregation::Count => Aggregated::Count(values.count() as u64),
        Aggregation::DistinctCount => {
            let distinct: HashSet<_> = values.map(|v| v.coercion_key()).collect();
            Aggregated::Count(distinct.len() as u64)
        }
        Aggregation::Min | Aggregation::Max | Aggregation::Sum | Aggregation::Avg => {
            let numerics: Vec<f64> = values.filter_map(|v| v.as_numeric_recorded(stats)).collect();
            if numerics.is_empty() {
                return Aggregated::None;
            }
            let value = match aggregation {
                Aggregation::Min => numerics.iter().cloned().fold(f64::INFINITY, f64::min),
                Aggregation::Max => numerics.iter().cloned().fold(f64::NEG_INFINITY, f64::max),
                Aggregation::Sum => numerics.iter().sum(),
                Aggregation::Avg => numerics.iter().sum::<f64>() / numerics.len() as f64,
                _ => unreachable!(),
            };
            Aggregated::Number(value)
        }
    }
}

impl Graph {
    /// Runs a criterion over the vertex domain, picking an index probe
    /// when one applies and scanning otherwise. The result is lazy;
    /// collect it or iterate as needed.
    pub fn find_vertices(&self, criterion: Criterion) -> VertexStream {
        self.find_vertices_with(criterion, CancelToken::new())
    }

    /// Like [`Graph::find_vertices`], under a caller-provided
    /// cancellation token. The stream checks the token between elements.
    pub fn find_vertices_with(&self, criterion: Criterion, cancel: CancelToken) -> VertexStream {
        let source = {
            let store = self.internal().read().unwrap();
            plan(&store, PlanDomain::Vertex, &criterion)
        };
        let ordered = matches!(source, Source::Probe { ordered: true, .. });
        VertexStream {
            store: Arc::clone(self.internal()),
            criterion,
            source,
            seen: HashSet::new(),
            cancel,
            ordered,
        }
    }

    /// Runs a criterion over the edge domain.
    pub fn find_edges(&self, criterion: Criterion) -> EdgeStream {
        self.find_edges_with(criterion, CancelToken::new())
    }

    pub fn find_edges_with(&self, criterion: Criterion, cancel: CancelToken) -> EdgeStream {
        let source = {
            let store = self.internal().read().unwrap();
            plan(&store, PlanDomain::Edge, &criterion)
        };
        let ordered = matches!(source, Source::Probe { ordered: true, .. });
        EdgeStream {
            store: Arc::clone(self.internal()),
            criterion,
            source,
            seen: HashSet::new(),
            cancel,
            ordered,
        }
    }

    /// Aggregates over every value of `key` across the vertex domain.
    pub fn aggregate_vertices(&self, key: &Identifier, aggregation: Aggregation) -> Aggregated {
        let store = self.internal().read().unwrap();
        let values = store
            .vertices
            .values()
            .flat_map(|v| v.properties.get(key).into_iter().flatten())
            .map(|p| &p.value);
        aggregate_values(values, aggregation, &store.coercion)
    }

    /// Aggregates over every value of `key` across the edge domain.
    pub fn aggregate_edges(&self, key: &Identifier, aggregation: Aggregation) -> Aggregated {
        let store = self.internal().read().unwrap();
        let values = store.edges.values().filter_map(|e| e.properties.get(key));
        aggregate_values(values, aggregation, &store.coercion)
    }

    /// The subset of one vertex's property instances satisfying every
    /// criterion, evaluated against each instance's value and
    /// meta-properties.
    pub fn vertex_property_query(&self, vertex_id: &ElementId, criteria: &[Criterion]) -> Result<Vec<VertexProperty>> {
        let store = self.internal().read().unwrap();
        let vertex = store.vertex_ref(vertex_id)?;
        Ok(vertex
            .properties
            .values()
            .flatten()
            .filter(|p| criteria.iter().all(|c| property_matches(p, c, &store.coercion)))
            .cloned()
            .collect())
    }

    /// The number of vertices satisfying a criterion.
    pub fn count_vertices(&self, criterion: Criterion) -> u64 {
        self.find_vertices(criterion).count() as u64
    }

    /// The number of edges satisfying a criterion.
    pub fn count_edges(&self, criterion: Criterion) -> u64 {
        self.find_edges(criterion).count() as u64
    }
}
