use std::collections::{BTreeMap, BTreeSet, HashMap};

use crate::models::{CoercionKey, CoercionStats, ElementId, Identifier, NumericKey, Value};

use serde::{Deserialize, Serialize};

/// The single-key index: `key -> coerced value -> element ids`.
///
/// Keys are coerced canonical forms, so lookups hit under the same
/// equality the query engine uses.
#[derive(Debug, Default, Clone, Serialize, Deserialize)]
pub(crate) struct KeyIndex {
    entries: HashMap<Identifier, HashMap<CoercionKey, BTreeSet<ElementId>>>,
}

impl KeyIndex {
    /// Starts tracking `key`. Returns false when it was already tracked
    /// (create is idempotent; the caller skips the rebuild).
    pub fn create(&mut self, key: Identifier) -> bool {
        if self.entries.contains_key(&key) {
            false
        } else {
            self.entries.insert(key, HashMap::new());
            true
        }
    }

    /// Stops tracking `key`. Dropping an untracked key is a no-op.
    pub fn drop_key(&mut self, key: &Identifier) {
        self.entries.remove(key);
    }

    pub fn is_indexed(&self, key: &Identifier) -> bool {
        self.entries.contains_key(key)
    }

    pub fn indexed_keys(&self) -> Vec<Identifier> {
        let mut keys: Vec<Identifier> = self.entries.keys().cloned().collect();
        keys.sort();
        keys
    }

    pub fn insert(&mut self, key: &Identifier, value: &Value, id: &ElementId) {
        if let Some(container) = self.entries.get_mut(key) {
            container.entry(value.coercion_key()).or_default().insert(id.clone());
        }
    }

    pub fn remove(&mut self, key: &Identifier, value: &Value, id: &ElementId) {
        if let Some(container) = self.entries.get_mut(key) {
            let ck = value.coercion_key();
            if let Some(ids) = container.get_mut(&ck) {
                ids.remove(id);
                if ids.is_empty() {
                    container.remove(&ck);
                }
            }
        }
    }

    /// Ids of elements holding `key = value`. `None` when the key is not
    /// tracked, which the caller turns into a scan or an error.
    pub fn get(&self, key: &Identifier, value: &Value) -> Option<Vec<ElementId>> {
        let container = self.entries.get(key)?;
        Some(
            container
                .get(&value.coercion_key())
                .map(|ids| ids.iter().cloned().collect())
                .unwrap_or_default(),
        )
    }

    /// The number of distinct coerced values under `key`; the planner's
    /// selectivity statistic.
    pub fn distinct_count(&self, key: &Identifier) -> Option<usize> {
        self.entries.get(key).map(|container| container.len())
    }
}

/// The composite index: registered key-tuple -> value-tuple -> element
/// ids, with prefix lookup.
#[derive(Debug, Default, Clone, Serialize, Deserialize)]
pub(crate) struct CompositeIndex {
    entries: HashMap<Vec<Identifier>, HashMap<Vec<CoercionKey>, BTreeSet<ElementId>>>,
}

impl CompositeIndex {
    pub fn create(&mut self, keys: Vec<Identifier>) -> bool {
        if self.entries.contains_key(&keys) {
            false
        } else {
            self.entries.insert(keys, HashMap::new());
            true
        }
    }

    pub fn drop_keys(&mut self, keys: &[Identifier]) {
        self.entries.remove(keys);
    }

    pub fn is_indexed(&self, keys: &[Identifier]) -> bool {
        self.entries.contains_key(keys)
    }

    pub fn registered(&self) -> Vec<Vec<Identifier>> {
        let mut tuples: Vec<Vec<Identifier>> = self.entries.keys().cloned().collect();
        tuples.sort();
        tuples
    }

    /// The registered tuples that contain `key`; their entries must be
    /// refreshed when a value of `key` changes.
    pub fn tuples_containing(&self, key: &Identifier) -> Vec<Vec<Identifier>> {
        self.entries.keys().filter(|t| t.contains(key)).cloned().collect()
    }

    /// Whether `prefix` is a prefix of at least one registered tuple.
    pub fn prefix_registered(&self, prefix: &[Identifier]) -> bool {
        !prefix.is_empty() && self.entries.keys().any(|t| t.len() >= prefix.len() && t[..prefix.len()] == *prefix)
    }

    pub fn insert_tuples(&mut self, keys: &[Identifier], tuples: Vec<Vec<CoercionKey>>, id: &ElementId) {
        if let Some(container) = self.entries.get_mut(keys) {
            for tuple in tuples {
                container.entry(tuple).or_default().insert(id.clone());
            }
        }
    }

    pub fn remove_tuples(&mut self, keys: &[Identifier], tuples: Vec<Vec<CoercionKey>>, id: &ElementId) {
        if let Some(container) = self.entries.get_mut(keys) {
            for tuple in tuples {
                if let Some(ids) = container.get_mut(&tuple) {
                    ids.remove(id);
                    if ids.is_empty() {
                        container.remove(&tuple);
                    }
                }
            }
        }
    }

    pub fn get(&self, keys: &[Identifier], values: &[CoercionKey]) -> Option<Vec<ElementId>> {
        let container = self.entries.get(keys)?;
        Some(
            container
                .get(values)
                .map(|ids| ids.iter().cloned().collect())
                .unwrap_or_default(),
        )
    }

    /// All elements whose tuple starts with `prefix_values` under any
    /// registered tuple starting with `prefix_keys`. Deduplicated; order
    /// undefined.
    pub fn get_partial(&self, prefix_keys: &[Identifier], prefix_values: &[CoercionKey]) -> Vec<ElementId> {
        let mut out: BTreeSet<ElementId> = BTreeSet::new();
        for (keys, container) in &self.entries {
            if keys.len() < prefix_keys.len() || keys[..prefix_keys.len()] != *prefix_keys {
                continue;
            }
            for (tuple, ids) in container {
                if tuple[..prefix_values.len()] == *prefix_values {
                    out.extend(ids.iter().cloned());
                }
            }
        }
        out.into_iter().collect()
    }

    /// The number of distinct value tuples under a registered key tuple;
    /// the planner's selectivity statistic.
    pub fn distinct_tuples(&self, keys: &[Identifier]) -> Option<usize> {
        self.entries.get(keys).map(|container| container.len())
    }

    /// The registered tuple whose longest prefix is covered by
    /// `available` keys, for the planner. Returns the tuple and the cover
    /// length.
    pub fn best_cover(&self, available: &BTreeSet<Identifier>) -> Option<(Vec<Identifier>, usize)> {
        let mut best: Option<(Vec<Identifier>, usize)> = None;
        for keys in self.entries.keys() {
            let covered = keys.iter().take_while(|k| available.contains(*k)).count();
            if covered == 0 {
                continue;
            }
            match &best {
                Some((_, n)) if *n >= covered => {}
                _ => best = Some((keys.clone(), covered)),
            }
        }
        best
    }
}

/// Builds the cross-product of coerced value tuples over `keys`. An
/// element contributes tuples only when every key has at least one value.
pub(crate) fn value_tuples(keys: &[Identifier], values_of: impl Fn(&Identifier) -> Vec<Value>) -> Vec<Vec<CoercionKey>> {
    let mut tuples: Vec<Vec<CoercionKey>> = vec![Vec::new()];
    for key in keys {
        let values = values_of(key);
        if values.is_empty() {
            return Vec::new();
        }
        let mut next = Vec::with_capacity(tuples.len() * values.len());
        for tuple in &tuples {
            for value in &values {
                let mut extended = tuple.clone();
                extended.push(value.coercion_key());
                next.push(extended);
            }
        }
        tuples = next;
    }
    tuples
}

/// Statistics for one range-indexed key.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RangeStats {
    pub entries: usize,
    pub min: Option<f64>,
    pub max: Option<f64>,
}

/// The range index: per key, an ordered set of `(value, element id)`
/// pairs. Ascending by value, ties broken by id. Only numerically
/// coercible values enter; the rest are skipped.
#[derive(Debug, Default, Clone, Serialize, Deserialize)]
pub(crate) struct RangeIndex {
    entries: HashMap<Identifier, BTreeSet<(NumericKey, ElementId)>>,
}

impl RangeIndex {
    pub fn create(&mut self, key: Identifier) -> bool {
        if self.entries.contains_key(&key) {
            false
        } else {
            self.entries.insert(key, BTreeSet::new());
            true
        }
    }

    pub fn drop_key(&mut self, key: &Identifier) {
        self.entries.remove(key);
    }

    pub fn is_indexed(&self, key: &Identifier) -> bool {
        self.entries.contains_key(key)
    }

    pub fn insert(&mut self, key: &Identifier, value: &Value, id: &ElementId, stats: &CoercionStats) {
        if let Some(container) = self.entries.get_mut(key) {
            if let Some(v) = value.as_numeric_recorded(stats) {
                container.insert((NumericKey::new(v), id.clone()));
            }
        }
    }

    pub fn remove(&mut self, key: &Identifier, value: &Value, id: &ElementId) {
        if let Some(container) = self.entries.get_mut(key) {
            if let Some(v) = value.as_numeric() {
                container.remove(&(NumericKey::new(v), id.clone()));
            }
        }
    }

    pub fn len(&self, key: &Identifier) -> Option<usize> {
        self.entries.get(key).map(|c| c.len())
    }

    /// The number of distinct values under a tracked key.
    pub fn distinct_count(&self, key: &Identifier) -> Option<usize> {
        self.entries.get(key).map(|container| {
            let mut distinct = 0;
            let mut last: Option<&NumericKey> = None;
            for (value, _) in container {
                if last != Some(value) {
                    distinct += 1;
                    last = Some(value);
                }
            }
            distinct
        })
    }

    /// Element ids whose value lies in the interval, ascending by value
    /// then id. Duplicate ids appear once per matching value instance;
    /// the executor deduplicates.
    pub fn range(
        &self,
        key: &Identifier,
        lo: Option<f64>,
        hi: Option<f64>,
        lo_incl: bool,
        hi_incl: bool,
    ) -> Option<Vec<ElementId>> {
        let container = self.entries.get(key)?;
        let mut out = Vec::new();
        for (value, id) in container {
            let v = value.value();
            if let Some(lo) = lo {
                if v < lo || (!lo_incl && v == lo) {
                    continue;
                }
            }
            if let Some(hi) = hi {
                if v > hi || (!hi_incl && v == hi) {
                    break;
                }
            }
            out.push(id.clone());
        }
        Some(out)
    }

    pub fn statistics(&self) -> BTreeMap<Identifier, RangeStats> {
        let mut out = BTreeMap::new();
        for (key, container) in &self.entries {
            out.insert(
                key.clone(),
                RangeStats {
                    entries: container.len(),
                    min: container.iter().next().map(|(v, _)| v.value()),
                    max: container.iter().next_back().map(|(v, _)| v.value()),
                },
            );
        }
        out
    }
}

/// The three index structures for one element domain, refreshed together
/// on every property mutation.
#[derive(Debug, Default, Clone, Serialize, Deserialize)]
pub(crate) struct IndexSet {
    pub key: KeyIndex,
    pub composite: CompositeIndex,
    pub range: RangeIndex,
}

impl IndexSet {
    /// Applies a change to the values of `key` on one element. The
    /// composite entries are recomputed from the old and new value lists
    /// of the changed key combined with the (unchanged) current values of
    /// the other member keys, supplied by `other_values`.
    pub fn refresh_key(
        &mut self,
        id: &ElementId,
        key: &Identifier,
        old_values: &[Value],
        new_values: &[Value],
        other_values: impl Fn(&Identifier) -> Vec<Value>,
        stats: &CoercionStats,
    ) {
        for value in old_values {
            self.key.remove(key, value, id);
            self.range.remove(key, value, id);
        }
        for value in new_values {
            self.key.insert(key, value, id);
            self.range.insert(key, value, id, stats);
        }

        for tuple_keys in self.composite.tuples_containing(key) {
            let old_tuples = value_tuples(&tuple_keys, |k| {
                if k == key {
                    old_values.to_vec()
                } else {
                    other_values(k)
                }
            });
            let new_tuples = value_tuples(&tuple_keys, |k| {
                if k == key {
                    new_values.to_vec()
                } else {
                    other_values(k)
                }
            });
            self.composite.remove_tuples(&tuple_keys, old_tuples, id);
            self.composite.insert_tuples(&tuple_keys, new_tuples, id);
        }
    }

    /// Inserts a whole element's properties, e.g. on creation or an index
    /// rebuild.
    pub fn add_element(&mut self, id: &ElementId, props: &BTreeMap<Identifier, Vec<Value>>, stats: &CoercionStats) {
        for (key, values) in props {
            for value in values {
                self.key.insert(key, value, id);
                self.range.insert(key, value, id, stats);
            }
        }
        for tuple_keys in self.composite.registered() {
            let tuples = value_tuples(&tuple_keys, |k| props.get(k).cloned().unwrap_or_default());
            self.composite.insert_tuples(&tuple_keys, tuples, id);
        }
    }

    /// Removes every entry for an element, e.g. on removal.
    pub fn remove_element(&mut self, id: &ElementId, props: &BTreeMap<Identifier, Vec<Value>>) {
        for (key, values) in props {
            for value in values {
                self.key.remove(key, value, id);
                self.range.remove(key, value, id);
            }
        }
        for tuple_keys in self.composite.registered() {
            let tuples = value_tuples(&tuple_keys, |k| props.get(k).cloned().unwrap_or_default());
            self.composite.remove_tuples(&tuple_keys, tuples, id);
        }
    }
}
