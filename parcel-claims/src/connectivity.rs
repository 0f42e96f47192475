//! Grouping of owned cells into 4-connected regions.

use parcel_core::CellKey;
use std::collections::{HashSet, VecDeque};

/// Split `cells` into maximal groups joined by N/S/E/W adjacency.
///
/// Cells in different worlds are never adjacent. Duplicates are ignored.
/// Groups come out in the order their smallest cell sorts, and each group is
/// sorted, so the result is deterministic.
pub fn groups<'a, I>(cells: I) -> Vec<Vec<CellKey>>
where
    I: IntoIterator<Item = &'a CellKey>,
{
    let mut pending: Vec<&CellKey> = cells.into_iter().collect();
    pending.sort();
    pending.dedup();
    let members: HashSet<&CellKey> = pending.iter().copied().collect();

    let mut visited: HashSet<CellKey> = HashSet::with_capacity(members.len());
    let mut result = Vec::new();
    let mut queue = VecDeque::new();

    for start in pending {
        if visited.contains(start) {
            continue;
        }
        let mut group = Vec::new();
        visited.insert(start.clone());
        queue.push_back(start.clone());

        while let Some(cell) = queue.pop_front() {
            for neighbour in cell.neighbours() {
                if members.contains(&neighbour) && !visited.contains(&neighbour) {
                    visited.insert(neighbour.clone());
                    queue.push_back(neighbour);
                }
            }
            group.push(cell);
        }

        group.sort();
        result.push(group);
    }

    result
}

/// Whether `cells` forms exactly one region. An empty set is not connected.
pub fn is_connected<'a, I>(cells: I) -> bool
where
    I: IntoIterator<Item = &'a CellKey>,
{
    groups(cells).len() == 1
}

/// Whether `cell` shares an edge with any cell in `region`.
pub fn touches<'a, I>(region: I, cell: &CellKey) -> bool
where
    I: IntoIterator<Item = &'a CellKey>,
{
    region.into_iter().any(|owned| owned.is_adjacent(cell))
}
