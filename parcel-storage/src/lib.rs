//! PARCEL Storage - Storage Trait and Mock Implementation
//!
//! Defines the durable-storage boundary for ownership records. A production
//! backend implements [`OwnershipStore`]; [`MockStore`] keeps everything in
//! memory and can inject failures to exercise all-or-nothing paths.

use parcel_core::{
    CellKey, ClaimOwner, ClaimRecord, HistoryEntry, MemberPermission, Membership, ParcelResult,
    PlayerId, StorageError, Village, VillageCapability, VillageId,
};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, RwLock};

// ============================================================================
// BATCHES
// ============================================================================

/// A single write inside a [`StoreBatch`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StoreOp {
    /// Fails if the cell already has a record. Advances the owner's free-slot mark for free claims.
    InsertClaim(ClaimRecord),
    /// Replaces the record at the same cell. Fails if none exists.
    UpdateClaim(ClaimRecord),
    /// Fails if the cell has no record.
    DeleteClaim(CellKey),
    AppendHistory(HistoryEntry),
    /// Fails if the id is taken.
    InsertVillage(Village),
    /// Fails if the id is unknown.
    UpdateVillage(Village),
    UpsertMembership(Membership),
    /// Fails if the membership does not exist.
    DeleteMembership {
        village_id: VillageId,
        member_id: PlayerId,
    },
    GrantPermission(MemberPermission),
    /// Fails if the grant does not exist.
    RevokePermission {
        village_id: VillageId,
        member_id: PlayerId,
        capability: VillageCapability,
    },
}

impl StoreOp {
    fn label(&self) -> &'static str {
        match self {
            StoreOp::InsertClaim(_) => "insert_claim",
            StoreOp::UpdateClaim(_) => "update_claim",
            StoreOp::DeleteClaim(_) => "delete_claim",
            StoreOp::AppendHistory(_) => "append_history",
            StoreOp::InsertVillage(_) => "insert_village",
            StoreOp::UpdateVillage(_) => "update_village",
            StoreOp::UpsertMembership(_) => "upsert_membership",
            StoreOp::DeleteMembership { .. } => "delete_membership",
            StoreOp::GrantPermission(_) => "grant_permission",
            StoreOp::RevokePermission { .. } => "revoke_permission",
        }
    }
}

/// An ordered list of writes applied atomically: all of them or none.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StoreBatch {
    ops: Vec<StoreOp>,
}

impl StoreBatch {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, op: StoreOp) -> &mut Self {
        self.ops.push(op);
        self
    }

    pub fn with(mut self, op: StoreOp) -> Self {
        self.ops.push(op);
        self
    }

    pub fn len(&self) -> usize {
        self.ops.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ops.is_empty()
    }

    pub fn ops(&self) -> &[StoreOp] {
        &self.ops
    }

    pub fn into_ops(self) -> Vec<StoreOp> {
        self.ops
    }
}

impl From<Vec<StoreOp>> for StoreBatch {
    fn from(ops: Vec<StoreOp>) -> Self {
        Self { ops }
    }
}

// ============================================================================
// STORE TRAIT
// ============================================================================

/// Durable storage for claims, villages, memberships, permissions and history.
///
/// Every method may block on I/O. Callers on a latency-sensitive thread should
/// read from the in-memory cache instead.
pub trait OwnershipStore: Send + Sync {
    /// All active claim records.
    fn load_claims(&self) -> ParcelResult<Vec<ClaimRecord>>;

    /// Highest free-slot index each player has ever consumed.
    fn load_free_slot_marks(&self) -> ParcelResult<HashMap<PlayerId, u32>>;

    /// All villages, active or not.
    fn load_villages(&self) -> ParcelResult<Vec<Village>>;

    fn load_memberships(&self) -> ParcelResult<Vec<Membership>>;

    fn load_permissions(&self) -> ParcelResult<Vec<MemberPermission>>;

    /// Read one claim straight from storage.
    fn claim_get(&self, cell: &CellKey) -> ParcelResult<Option<ClaimRecord>>;

    /// History entries for a cell, oldest first.
    fn history_for_cell(&self, cell: &CellKey) -> ParcelResult<Vec<HistoryEntry>>;

    /// Apply every op in `batch` or none of them.
    fn apply(&self, batch: StoreBatch) -> ParcelResult<()>;
}

// ============================================================================
// MOCK STORE
// ============================================================================

#[derive(Debug, Clone, Default)]
struct StoreState {
    claims: HashMap<CellKey, ClaimRecord>,
    free_slot_marks: HashMap<PlayerId, u32>,
    history: Vec<HistoryEntry>,
    villages: HashMap<VillageId, Village>,
    memberships: HashMap<(VillageId, PlayerId), Membership>,
    permissions: HashMap<(VillageId, PlayerId, VillageCapability), MemberPermission>,
}

impl StoreState {
    fn apply_op(&mut self, op: StoreOp) -> Result<(), StorageError> {
        match op {
            StoreOp::InsertClaim(record) => {
                if self.claims.contains_key(&record.cell) {
                    return Err(StorageError::InsertFailed {
                        entity: "claim".to_string(),
                        key: record.cell.to_string(),
                        reason: "already exists".to_string(),
                    });
                }
                if let (ClaimOwner::Personal(player), Some(index)) =
                    (record.owner, record.cost.free_slot_index)
                {
                    let mark = self.free_slot_marks.entry(player).or_insert(0);
                    *mark = (*mark).max(index);
                }
                self.claims.insert(record.cell.clone(), record);
            }
            StoreOp::UpdateClaim(record) => {
                let existing = self.claims.get_mut(&record.cell).ok_or_else(|| {
                    StorageError::UpdateFailed {
                        entity: "claim".to_string(),
                        key: record.cell.to_string(),
                        reason: "no such claim".to_string(),
                    }
                })?;
                *existing = record;
            }
            StoreOp::DeleteClaim(cell) => {
                if self.claims.remove(&cell).is_none() {
                    return Err(StorageError::NotFound {
                        entity: "claim".to_string(),
                        key: cell.to_string(),
                    });
                }
            }
            StoreOp::AppendHistory(entry) => self.history.push(entry),
            StoreOp::InsertVillage(village) => {
                if self.villages.contains_key(&village.village_id) {
                    return Err(StorageError::InsertFailed {
                        entity: "village".to_string(),
                        key: village.village_id.to_string(),
                        reason: "already exists".to_string(),
                    });
                }
                self.villages.insert(village.village_id, village);
            }
            StoreOp::UpdateVillage(village) => {
                let existing = self.villages.get_mut(&village.village_id).ok_or_else(|| {
                    StorageError::UpdateFailed {
                        entity: "village".to_string(),
                        key: village.village_id.to_string(),
                        reason: "no such village".to_string(),
                    }
                })?;
                *existing = village;
            }
            StoreOp::UpsertMembership(membership) => {
                self.memberships
                    .insert((membership.village_id, membership.member_id), membership);
            }
            StoreOp::DeleteMembership {
                village_id,
                member_id,
            } => {
                if self.memberships.remove(&(village_id, member_id)).is_none() {
                    return Err(StorageError::NotFound {
                        entity: "membership".to_string(),
                        key: format!("{}/{}", village_id, member_id),
                    });
                }
            }
            StoreOp::GrantPermission(permission) => {
                self.permissions.insert(
                    (
                        permission.village_id,
                        permission.member_id,
                        permission.capability,
                    ),
                    permission,
                );
            }
            StoreOp::RevokePermission {
                village_id,
                member_id,
                capability,
            } => {
                if self
                    .permissions
                    .remove(&(village_id, member_id, capability))
                    .is_none()
                {
                    return Err(StorageError::NotFound {
                        entity: "permission".to_string(),
                        key: format!("{}/{}/{}", village_id, member_id, capability),
                    });
                }
            }
        }
        Ok(())
    }
}

/// In-memory [`OwnershipStore`] for tests.
///
/// `apply` stages the batch on a copy of the state and swaps it in only when
/// every op succeeded, so a failing batch leaves nothing behind.
#[derive(Debug, Default)]
pub struct MockStore {
    state: Arc<RwLock<StoreState>>,
    fail_at: Mutex<Option<usize>>,
    fail_all: AtomicBool,
    apply_calls: AtomicUsize,
    claim_reads: AtomicUsize,
}

impl MockStore {
    /// Create a new mock store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Make the next `apply` fail when it reaches the op at `op_index` (0-based).
    /// Ops before the index are staged and then discarded.
    pub fn fail_next_apply_at(&self, op_index: usize) {
        if let Ok(mut fail_at) = self.fail_at.lock() {
            *fail_at = Some(op_index);
        }
    }

    /// Fail every `apply` until turned off.
    pub fn fail_all_applies(&self, enabled: bool) {
        self.fail_all.store(enabled, Ordering::SeqCst);
    }

    /// Insert a claim directly, bypassing batches and history. Used to seed
    /// fixtures and to simulate drift against a cache that was loaded earlier.
    /// Fails like `InsertClaim` if the cell is already taken.
    pub fn seed_claim(&self, record: ClaimRecord) -> ParcelResult<()> {
        let mut state = self.write_state()?;
        state.apply_op(StoreOp::InsertClaim(record))?;
        Ok(())
    }

    /// Number of `apply` calls made, successful or not.
    pub fn apply_calls(&self) -> usize {
        self.apply_calls.load(Ordering::SeqCst)
    }

    /// Number of `claim_get` calls made.
    pub fn claim_reads(&self) -> usize {
        self.claim_reads.load(Ordering::SeqCst)
    }

    pub fn claim_count(&self) -> usize {
        self.read_state().map(|s| s.claims.len()).unwrap_or(0)
    }

    pub fn history_len(&self) -> usize {
        self.read_state().map(|s| s.history.len()).unwrap_or(0)
    }

    /// Full history, oldest first.
    pub fn history(&self) -> Vec<HistoryEntry> {
        self.read_state().map(|s| s.history.clone()).unwrap_or_default()
    }

    pub fn village_get(&self, id: VillageId) -> Option<Village> {
        self.read_state().ok().and_then(|s| s.villages.get(&id).cloned())
    }

    pub fn membership_count(&self) -> usize {
        self.read_state().map(|s| s.memberships.len()).unwrap_or(0)
    }

    pub fn permission_count(&self) -> usize {
        self.read_state().map(|s| s.permissions.len()).unwrap_or(0)
    }

    fn read_state(&self) -> Result<std::sync::RwLockReadGuard<'_, StoreState>, StorageError> {
        self.state.read().map_err(|_| StorageError::LockPoisoned)
    }

    fn write_state(&self) -> Result<std::sync::RwLockWriteGuard<'_, StoreState>, StorageError> {
        self.state.write().map_err(|_| StorageError::LockPoisoned)
    }

    fn take_injected_failure(&self) -> Option<usize> {
        self.fail_at.lock().ok().and_then(|mut fail_at| fail_at.take())
    }
}

impl OwnershipStore for MockStore {
    fn load_claims(&self) -> ParcelResult<Vec<ClaimRecord>> {
        Ok(self.read_state()?.claims.values().cloned().collect())
    }

    fn load_free_slot_marks(&self) -> ParcelResult<HashMap<PlayerId, u32>> {
        Ok(self.read_state()?.free_slot_marks.clone())
    }

    fn load_villages(&self) -> ParcelResult<Vec<Village>> {
        Ok(self.read_state()?.villages.values().cloned().collect())
    }

    fn load_memberships(&self) -> ParcelResult<Vec<Membership>> {
        Ok(self.read_state()?.memberships.values().cloned().collect())
    }

    fn load_permissions(&self) -> ParcelResult<Vec<MemberPermission>> {
        Ok(self.read_state()?.permissions.values().cloned().collect())
    }

    fn claim_get(&self, cell: &CellKey) -> ParcelResult<Option<ClaimRecord>> {
        self.claim_reads.fetch_add(1, Ordering::SeqCst);
        Ok(self.read_state()?.claims.get(cell).cloned())
    }

    fn history_for_cell(&self, cell: &CellKey) -> ParcelResult<Vec<HistoryEntry>> {
        Ok(self
            .read_state()?
            .history
            .iter()
            .filter(|entry| &entry.cell == cell)
            .cloned()
            .collect())
    }

    fn apply(&self, batch: StoreBatch) -> ParcelResult<()> {
        self.apply_calls.fetch_add(1, Ordering::SeqCst);

        if self.fail_all.load(Ordering::SeqCst) {
            tracing::debug!(ops = batch.len(), "mock store rejecting batch");
            return Err(StorageError::TransactionFailed {
                reason: "injected failure".to_string(),
            }
            .into());
        }
        let fail_at = self.take_injected_failure();

        let mut state = self.write_state()?;
        let mut staged = state.clone();
        for (index, op) in batch.into_ops().into_iter().enumerate() {
            if fail_at == Some(index) {
                tracing::debug!(op_index = index, op = op.label(), "mock store injected failure");
                return Err(StorageError::TransactionFailed {
                    reason: format!("injected failure at op {} ({})", index, op.label()),
                }
                .into());
            }
            staged.apply_op(op)?;
        }
        *state = staged;
        Ok(())
    }
}

// ============================================================================
// TESTS
// ============================================================================
