//! Atomic claim service: the only path that creates or deletes a claim.
//!
//! Every write takes the per-cell lock, re-checks ownership inside it, writes
//! the store, and only then touches the cache. A failed store write leaves the
//! cache alone.
//!
//! Lock order: cell lock, then the claimant's free-slot lock.

use crate::cache::OwnershipCache;
use crate::cost::{CostPolicy, Refund};
use crate::lock::{KeyedGuard, KeyedLocks};
use parcel_core::{
    Actor, AuthorityCheck, CellKey, ClaimCost, ClaimOwner, ClaimRecord, HistoryAction,
    HistoryEntry, PaidTier, ParcelError, ParcelResult, PlayerId, ValidationError,
};
use parcel_storage::{OwnershipStore, StoreBatch, StoreOp};
use std::sync::Arc;

/// Result of a successful unclaim.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnclaimOutcome {
    /// The record that was removed.
    pub record: ClaimRecord,
    /// Owner refund under the configured policy. Always `None` for confiscations.
    pub refund: Option<Refund>,
}

/// Comparison of one cell between cache and store.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Consistency {
    InSync,
    Drift {
        cached: Option<ClaimRecord>,
        stored: Option<ClaimRecord>,
    },
}

pub struct AtomicClaimService {
    store: Arc<dyn OwnershipStore>,
    cache: Arc<OwnershipCache>,
    policy: CostPolicy,
    authority: Arc<dyn AuthorityCheck>,
    cell_locks: KeyedLocks<CellKey>,
    slot_locks: KeyedLocks<PlayerId>,
}

impl AtomicClaimService {
    pub fn new(
        store: Arc<dyn OwnershipStore>,
        cache: Arc<OwnershipCache>,
        policy: CostPolicy,
        authority: Arc<dyn AuthorityCheck>,
    ) -> Self {
        Self {
            store,
            cache,
            policy,
            authority,
            cell_locks: KeyedLocks::new(),
            slot_locks: KeyedLocks::new(),
        }
    }

    pub fn policy(&self) -> &CostPolicy {
        &self.policy
    }

    /// Price of the player's next personal claim.
    pub fn quote(&self, player: PlayerId, requested: Option<PaidTier>) -> ParcelResult<ClaimCost> {
        let high_water = self.cache.free_slot_high_water(player);
        Ok(self.policy.next_cost(high_water, requested)?)
    }

    /// Claim `cell` for `actor` personally.
    ///
    /// A free `cost` must carry the slot index from a fresh quote, otherwise
    /// `StaleQuote` is returned. Costs the policy would never quote are
    /// rejected outright.
    pub fn claim(
        &self,
        actor: &Actor,
        cell: &CellKey,
        cost: ClaimCost,
    ) -> ParcelResult<ClaimRecord> {
        self.claim_personal(actor, cell, cost, None)
    }

    /// Like [`claim`](Self::claim), also enforcing the newcomer claim cap.
    pub fn claim_with_limit(
        &self,
        actor: &Actor,
        cell: &CellKey,
        cost: ClaimCost,
        is_veteran: bool,
    ) -> ParcelResult<ClaimRecord> {
        self.claim_personal(actor, cell, cost, Some(is_veteran))
    }

    fn claim_personal(
        &self,
        actor: &Actor,
        cell: &CellKey,
        cost: ClaimCost,
        is_veteran: Option<bool>,
    ) -> ParcelResult<ClaimRecord> {
        validate_cost(&cost)?;
        self.policy.check_offered(&cost)?;

        let _cell_guard = self.cell_locks.acquire(cell.clone());
        let _slot_guard = self.slot_locks.acquire(actor.id);

        self.ensure_unclaimed(cell, actor)?;

        if let Some(quoted) = cost.free_slot_index {
            let expected = self.cache.free_slot_high_water(actor.id) + 1;
            if quoted != expected {
                tracing::debug!(
                    cell = %cell,
                    actor = %actor.id,
                    quoted,
                    expected,
                    "stale free-slot quote"
                );
                return Err(ParcelError::StaleQuote { quoted, expected });
            }
        }

        if let Some(is_veteran) = is_veteran {
            let current = self.cache.count_for_owner(actor.id);
            if let Err(e) = self.policy.check_claim_limit(current, is_veteran) {
                tracing::debug!(cell = %cell, actor = %actor.id, current, "claim limit reached");
                return Err(e);
            }
        }

        self.insert_locked(actor, cell, ClaimOwner::Personal(actor.id), &actor.name, cost)
    }

    /// Release `cell`.
    ///
    /// The owner's release is recorded as `Unclaimed`. An elevated actor may
    /// remove anyone's claim, recorded as `Confiscated`. Village land is only
    /// removable here by an elevated actor.
    pub fn unclaim(
        &self,
        actor: &Actor,
        cell: &CellKey,
        reason: Option<String>,
    ) -> ParcelResult<UnclaimOutcome> {
        let _cell_guard = self.cell_locks.acquire(cell.clone());

        let record = self
            .cache
            .get_owner(cell)
            .ok_or_else(|| ParcelError::not_found(format!("claim at {}", cell)))?;

        let action = match record.owner {
            ClaimOwner::Personal(owner) if owner == actor.id => HistoryAction::Unclaimed,
            _ if self.authority.is_elevated(actor.id) => HistoryAction::Confiscated,
            ClaimOwner::Village(_) => {
                tracing::debug!(cell = %cell, actor = %actor.id, "unclaim of village land refused");
                return Err(ParcelError::unauthorized(
                    "village land is returned through the village",
                ));
            }
            ClaimOwner::Personal(_) => {
                tracing::debug!(cell = %cell, actor = %actor.id, "unclaim by non-owner refused");
                return Err(ParcelError::unauthorized(format!(
                    "{} is owned by {}",
                    cell, record.owner_name
                )));
            }
        };

        let batch = StoreBatch::new()
            .with(StoreOp::DeleteClaim(cell.clone()))
            .with(StoreOp::AppendHistory(HistoryEntry::removed(
                &record, actor, action, reason,
            )));
        if let Err(e) = self.store.apply(batch) {
            tracing::error!(
                cell = %cell,
                actor = %actor.id,
                error = %e,
                "failed to persist unclaim"
            );
            return Err(e);
        }
        self.cache.remove(cell);

        let refund = match action {
            HistoryAction::Unclaimed => self.policy.refund_for(&record.cost),
            _ => None,
        };
        tracing::info!(
            cell = %cell,
            actor = %actor.id,
            owner = %record.owner,
            action = %action,
            "claim released"
        );
        Ok(UnclaimOutcome { record, refund })
    }

    /// Compare the cache with the store for one cell.
    pub fn verify_consistency(&self, cell: &CellKey) -> ParcelResult<Consistency> {
        let _cell_guard = self.cell_locks.acquire(cell.clone());
        let cached = self.cache.get_owner(cell);
        let stored = self.store.claim_get(cell)?;
        if cached == stored {
            return Ok(Consistency::InSync);
        }
        tracing::warn!(
            cell = %cell,
            cached = cached.is_some(),
            stored = stored.is_some(),
            "cache and store disagree"
        );
        Ok(Consistency::Drift { cached, stored })
    }

    /// Live entries in the cell and free-slot lock tables.
    pub fn active_locks(&self) -> usize {
        self.cell_locks.active_locks() + self.slot_locks.active_locks()
    }

    /// Audit trail for one cell, oldest first.
    pub fn history(&self, cell: &CellKey) -> ParcelResult<Vec<HistoryEntry>> {
        self.store.history_for_cell(cell)
    }

    // ------------------------------------------------------------------------
    // Crate-internal commit helpers shared with the village service.
    // ------------------------------------------------------------------------

    pub(crate) fn lock_cell(&self, cell: &CellKey) -> KeyedGuard<'_, CellKey> {
        self.cell_locks.acquire(cell.clone())
    }

    pub(crate) fn lock_cells<'a, I>(&self, cells: I) -> Vec<KeyedGuard<'_, CellKey>>
    where
        I: IntoIterator<Item = &'a CellKey>,
    {
        self.cell_locks.acquire_all(cells.into_iter().cloned())
    }

    /// Fail with `Conflict` if `cell` has an owner in the cache or the store.
    /// Caller holds the cell lock.
    pub(crate) fn ensure_unclaimed(&self, cell: &CellKey, actor: &Actor) -> ParcelResult<()> {
        if let Some(existing) = self.cache.get_owner(cell) {
            tracing::debug!(
                cell = %cell,
                actor = %actor.id,
                owner = %existing.owner,
                "claim conflict"
            );
            return Err(ParcelError::Conflict {
                cell: cell.clone(),
                owner_name: existing.owner_name,
            });
        }

        match self.store.claim_get(cell) {
            Ok(None) => Ok(()),
            Ok(Some(stored)) => {
                tracing::warn!(
                    cell = %cell,
                    owner = %stored.owner,
                    "store has a claim the cache missed, healing cache"
                );
                let owner_name = stored.owner_name.clone();
                self.cache.upsert(stored);
                Err(ParcelError::Conflict {
                    cell: cell.clone(),
                    owner_name,
                })
            }
            Err(e) => {
                tracing::error!(
                    cell = %cell,
                    actor = %actor.id,
                    error = %e,
                    "claim re-check failed"
                );
                Err(e)
            }
        }
    }

    /// Write a new claim and its history entry, then mirror it in the cache.
    /// Caller holds the cell lock and has checked the cell is free.
    pub(crate) fn insert_locked(
        &self,
        actor: &Actor,
        cell: &CellKey,
        owner: ClaimOwner,
        owner_name: &str,
        cost: ClaimCost,
    ) -> ParcelResult<ClaimRecord> {
        let record = ClaimRecord::new(cell.clone(), owner, owner_name, cost);
        let batch = StoreBatch::new()
            .with(StoreOp::InsertClaim(record.clone()))
            .with(StoreOp::AppendHistory(HistoryEntry::claimed(&record, actor)));
        if let Err(e) = self.store.apply(batch) {
            tracing::error!(cell = %cell, actor = %actor.id, error = %e, "failed to persist claim");
            return Err(e);
        }
        self.cache.insert_claimed(record.clone());

        tracing::info!(
            cell = %cell,
            actor = %actor.id,
            owner = %record.owner,
            cost = %record.cost.kind,
            free_slot = ?record.cost.free_slot_index,
            "claim committed"
        );
        Ok(record)
    }
}

impl std::fmt::Debug for AtomicClaimService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AtomicClaimService")
            .field("cell_locks", &self.cell_locks)
            .field("slot_locks", &self.slot_locks)
            .finish_non_exhaustive()
    }
}

fn validate_cost(cost: &ClaimCost) -> ParcelResult<()> {
    match (cost.is_free(), cost.free_slot_index) {
        (true, Some(0)) => Err(ValidationError::InvalidValue {
            field: "cost.free_slot_index".to_string(),
            reason: "free slots are numbered from 1".to_string(),
        }
        .into()),
        (true, Some(_)) => Ok(()),
        (true, None) => Err(ValidationError::RequiredFieldMissing {
            field: "cost.free_slot_index".to_string(),
        }
        .into()),
        (false, Some(_)) => Err(ValidationError::InvalidValue {
            field: "cost.free_slot_index".to_string(),
            reason: "paid claims do not consume a free slot".to_string(),
        }
        .into()),
        (false, None) if cost.amount == 0 => Err(ValidationError::InvalidValue {
            field: "cost.amount".to_string(),
            reason: "paid claims must cost something".to_string(),
        }
        .into()),
        (false, None) => Ok(()),
    }
}
