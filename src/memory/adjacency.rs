use std::collections::{BTreeMap, BTreeSet};

use crate::models::{Direction, ElementId, Identifier};

use serde::{Deserialize, Serialize};

/// One vertex's incident edges, partitioned by direction and label.
///
/// A self-loop is entered in both partitions. Enumeration under `Both`
/// yields each edge once; neighbor enumeration is handled by the
/// container, which walks the two partitions separately so a self-loop
/// vertex shows up on both ends.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub(crate) struct AdjacencyLists {
    outgoing: BTreeMap<Identifier, BTreeSet<ElementId>>,
    incoming: BTreeMap<Identifier, BTreeSet<ElementId>>,
}

impl AdjacencyLists {
    pub fn add_outgoing(&mut self, label: Identifier, edge_id: ElementId) {
        self.outgoing.entry(label).or_default().insert(edge_id);
    }

    pub fn add_incoming(&mut self, label: Identifier, edge_id: ElementId) {
        self.incoming.entry(label).or_default().insert(edge_id);
    }

    pub fn remove_outgoing(&mut self, label: &Identifier, edge_id: &ElementId) {
        if let Some(edges) = self.outgoing.get_mut(label) {
            edges.remove(edge_id);
            if edges.is_empty() {
                self.outgoing.remove(label);
            }
        }
    }

    pub fn remove_incoming(&mut self, label: &Identifier, edge_id: &ElementId) {
        if let Some(edges) = self.incoming.get_mut(label) {
            edges.remove(edge_id);
            if edges.is_empty() {
                self.incoming.remove(label);
            }
        }
    }

    fn partition_ids<'a>(
        partition: &'a BTreeMap<Identifier, BTreeSet<ElementId>>,
        labels: &'a [Identifier],
    ) -> Box<dyn Iterator<Item = &'a ElementId> + 'a> {
        if labels.is_empty() {
            Box::new(partition.values().flatten())
        } else {
            Box::new(labels.iter().filter_map(|l| partition.get(l)).flatten())
        }
    }

    /// Edge ids incident in `direction`, restricted to `labels` when
    /// non-empty. `Both` deduplicates, which only matters for self-loops.
    pub fn edge_ids(&self, direction: Direction, labels: &[Identifier]) -> Vec<ElementId> {
        match direction {
            Direction::Out => Self::partition_ids(&self.outgoing, labels).cloned().collect(),
            Direction::In => Self::partition_ids(&self.incoming, labels).cloned().collect(),
            Direction::Both => {
                let mut ids: BTreeSet<ElementId> =
                    Self::partition_ids(&self.outgoing, labels).cloned().collect();
                ids.extend(Self::partition_ids(&self.incoming, labels).cloned());
                ids.into_iter().collect()
            }
        }
    }

    /// Edge ids for neighbor enumeration: outgoing and incoming lists kept
    /// separate, no dedup, so the caller maps each occurrence to the far
    /// endpoint and a self-loop contributes a neighbor from each side.
    pub fn edge_ids_by_side(&self, labels: &[Identifier]) -> (Vec<ElementId>, Vec<ElementId>) {
        (
            Self::partition_ids(&self.outgoing, labels).cloned().collect(),
            Self::partition_ids(&self.incoming, labels).cloned().collect(),
        )
    }

    pub fn degree(&self, direction: Direction, labels: &[Identifier]) -> usize {
        self.edge_ids(direction, labels).len()
    }

    pub fn is_empty(&self) -> bool {
        self.outgoing.is_empty() && self.incoming.is_empty()
    }
}
