//! In-memory mirror of every active claim.
//!
//! Three indices (by cell, by personal owner, by village) plus the free-slot
//! high-water marks live behind one `RwLock`, so readers always see them in
//! agreement. Only the claim and village services write here, and only after
//! the store has accepted the same change.

use parcel_core::{CellKey, ClaimOwner, ClaimRecord, PlayerId, VillageId};
use std::collections::{HashMap, HashSet};
use std::sync::{PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

/// Counts describing what the cache currently holds.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CacheStats {
    /// Number of claimed cells.
    pub cells: usize,
    /// Number of players with at least one personal claim.
    pub players: usize,
    /// Number of villages with at least one claim.
    pub villages: usize,
}

/// A single change to apply to the cache.
#[derive(Debug, Clone)]
pub(crate) enum CacheChange {
    Upsert(ClaimRecord),
    Remove(CellKey),
}

#[derive(Debug, Default)]
struct CacheIndex {
    by_cell: HashMap<CellKey, ClaimRecord>,
    by_player: HashMap<PlayerId, HashSet<CellKey>>,
    by_village: HashMap<VillageId, HashSet<CellKey>>,
    free_slot_marks: HashMap<PlayerId, u32>,
}

impl CacheIndex {
    fn build(records: Vec<ClaimRecord>, free_slot_marks: HashMap<PlayerId, u32>) -> Self {
        let mut index = CacheIndex {
            free_slot_marks,
            ..CacheIndex::default()
        };
        for record in records {
            index.upsert(record);
        }
        index
    }

    fn upsert(&mut self, record: ClaimRecord) {
        self.remove(&record.cell);
        match record.owner {
            ClaimOwner::Personal(player) => {
                self.by_player
                    .entry(player)
                    .or_default()
                    .insert(record.cell.clone());
            }
            ClaimOwner::Village(village) => {
                self.by_village
                    .entry(village)
                    .or_default()
                    .insert(record.cell.clone());
            }
        }
        self.by_cell.insert(record.cell.clone(), record);
    }

    fn remove(&mut self, cell: &CellKey) -> Option<ClaimRecord> {
        let record = self.by_cell.remove(cell)?;
        match record.owner {
            ClaimOwner::Personal(player) => {
                if let Some(cells) = self.by_player.get_mut(&player) {
                    cells.remove(cell);
                    if cells.is_empty() {
                        self.by_player.remove(&player);
                    }
                }
            }
            ClaimOwner::Village(village) => {
                if let Some(cells) = self.by_village.get_mut(&village) {
                    cells.remove(cell);
                    if cells.is_empty() {
                        self.by_village.remove(&village);
                    }
                }
            }
        }
        Some(record)
    }

    fn bump_free_slot(&mut self, record: &ClaimRecord) {
        if let (ClaimOwner::Personal(player), Some(index)) =
            (record.owner, record.cost.free_slot_index)
        {
            let mark = self.free_slot_marks.entry(player).or_insert(0);
            *mark = (*mark).max(index);
        }
    }
}

/// Read-mostly mirror of the claim table.
#[derive(Debug, Default)]
pub struct OwnershipCache {
    index: RwLock<CacheIndex>,
}

impl OwnershipCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace the whole cache with a fresh snapshot.
    ///
    /// The new index is built before the write lock is taken; readers see
    /// either the old snapshot or the new one.
    pub fn load_all(&self, records: Vec<ClaimRecord>, free_slot_marks: HashMap<PlayerId, u32>) {
        let fresh = CacheIndex::build(records, free_slot_marks);
        *self.write() = fresh;
    }

    pub fn get_owner(&self, cell: &CellKey) -> Option<ClaimRecord> {
        self.read().by_cell.get(cell).cloned()
    }

    pub fn is_claimed(&self, cell: &CellKey) -> bool {
        self.read().by_cell.contains_key(cell)
    }

    /// Number of cells the player owns personally. Village land is not counted.
    pub fn count_for_owner(&self, player: PlayerId) -> usize {
        self.read().by_player.get(&player).map_or(0, HashSet::len)
    }

    pub fn count_for_village(&self, village: VillageId) -> usize {
        self.read().by_village.get(&village).map_or(0, HashSet::len)
    }

    /// Cells the player owns personally, in `CellKey` order.
    pub fn cells_for_owner(&self, player: PlayerId) -> Vec<CellKey> {
        let index = self.read();
        sorted(index.by_player.get(&player))
    }

    /// Cells owned by the village, in `CellKey` order.
    pub fn cells_for_village(&self, village: VillageId) -> Vec<CellKey> {
        let index = self.read();
        sorted(index.by_village.get(&village))
    }

    /// Highest free slot the player has ever consumed. Zero if none.
    pub fn free_slot_high_water(&self, player: PlayerId) -> u32 {
        self.read().free_slot_marks.get(&player).copied().unwrap_or(0)
    }

    /// Villages that own at least one cell.
    pub fn villages_with_land(&self) -> Vec<VillageId> {
        self.read().by_village.keys().copied().collect()
    }

    pub fn stats(&self) -> CacheStats {
        let index = self.read();
        CacheStats {
            cells: index.by_cell.len(),
            players: index.by_player.len(),
            villages: index.by_village.len(),
        }
    }

    /// Drop everything. Used on shutdown.
    pub fn clear(&self) {
        *self.write() = CacheIndex::default();
    }

    /// Record a newly inserted claim, advancing the owner's free-slot mark.
    pub(crate) fn insert_claimed(&self, record: ClaimRecord) {
        let mut index = self.write();
        index.bump_free_slot(&record);
        index.upsert(record);
    }

    pub(crate) fn upsert(&self, record: ClaimRecord) {
        self.write().upsert(record);
    }

    pub(crate) fn remove(&self, cell: &CellKey) -> Option<ClaimRecord> {
        self.write().remove(cell)
    }

    /// Apply several changes under a single write section.
    pub(crate) fn apply_many(&self, changes: Vec<CacheChange>) {
        let mut index = self.write();
        for change in changes {
            match change {
                CacheChange::Upsert(record) => index.upsert(record),
                CacheChange::Remove(cell) => {
                    index.remove(&cell);
                }
            }
        }
    }

    fn read(&self) -> RwLockReadGuard<'_, CacheIndex> {
        self.index.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, CacheIndex> {
        self.index.write().unwrap_or_else(PoisonError::into_inner)
    }
}

fn sorted(cells: Option<&HashSet<CellKey>>) -> Vec<CellKey> {
    let mut out: Vec<CellKey> = cells.map(|c| c.iter().cloned().collect()).unwrap_or_default();
    out.sort();
    out
}
