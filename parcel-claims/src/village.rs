//! Village lifecycle, membership and permission resolution.
//!
//! The village directory is an in-memory mirror of active villages, their
//! members and explicit grants. Like the claim cache it is written only after
//! the store accepted the change, and it is what the protection gate reads.
//!
//! Lock order: village lock, then the directory lock, then cell locks (sorted).
//! The directory lock serialises the checks that span villages: name
//! uniqueness and one village per player.

use crate::cache::{CacheChange, OwnershipCache};
use crate::claim::AtomicClaimService;
use crate::connectivity;
use crate::lock::KeyedLocks;
use chrono::Utc;
use parcel_core::{
    Actor, CellKey, ClaimCost, ClaimOwner, ClaimRecord, HistoryAction, HistoryEntry,
    MemberPermission, Membership, ParcelError, ParcelResult, PlayerId, ValidationError, Village,
    VillageCapability, VillageConfig, VillageId, VillageRole,
};
use parcel_storage::{OwnershipStore, StoreBatch, StoreOp};
use std::collections::{BTreeSet, HashMap};
use std::sync::{Arc, Mutex, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

// ============================================================================
// DIRECTORY
// ============================================================================

#[derive(Debug, Default)]
struct VillageDirectory {
    villages: HashMap<VillageId, Village>,
    names: HashMap<String, VillageId>,
    members: HashMap<VillageId, HashMap<PlayerId, Membership>>,
    member_index: HashMap<PlayerId, VillageId>,
    permissions: HashMap<(VillageId, PlayerId), BTreeSet<VillageCapability>>,
}

impl VillageDirectory {
    fn build(
        villages: Vec<Village>,
        memberships: Vec<Membership>,
        permissions: Vec<MemberPermission>,
    ) -> Self {
        let mut directory = VillageDirectory::default();
        for village in villages.into_iter().filter(|v| v.active) {
            directory.insert_village(village);
        }
        for membership in memberships.into_iter().filter(|m| m.active) {
            if directory.villages.contains_key(&membership.village_id) {
                directory.upsert_member(membership);
            }
        }
        for permission in permissions {
            if directory.is_member(permission.village_id, permission.member_id) {
                directory.grant(permission.village_id, permission.member_id, permission.capability);
            }
        }
        directory
    }

    fn insert_village(&mut self, village: Village) {
        self.names.insert(Village::name_key(&village.name), village.village_id);
        self.villages.insert(village.village_id, village);
    }

    fn update_village(&mut self, village: Village) {
        if let Some(previous) = self.villages.get(&village.village_id) {
            self.names.remove(&Village::name_key(&previous.name));
        }
        self.insert_village(village);
    }

    fn remove_village(&mut self, village_id: VillageId) {
        if let Some(village) = self.villages.remove(&village_id) {
            self.names.remove(&Village::name_key(&village.name));
        }
        if let Some(members) = self.members.remove(&village_id) {
            for member_id in members.keys() {
                self.member_index.remove(member_id);
                self.permissions.remove(&(village_id, *member_id));
            }
        }
    }

    fn upsert_member(&mut self, membership: Membership) {
        self.member_index
            .insert(membership.member_id, membership.village_id);
        self.members
            .entry(membership.village_id)
            .or_default()
            .insert(membership.member_id, membership);
    }

    fn remove_member(&mut self, village_id: VillageId, member_id: PlayerId) {
        if let Some(members) = self.members.get_mut(&village_id) {
            members.remove(&member_id);
        }
        self.member_index.remove(&member_id);
        self.permissions.remove(&(village_id, member_id));
    }

    fn grant(&mut self, village_id: VillageId, member_id: PlayerId, capability: VillageCapability) {
        self.permissions
            .entry((village_id, member_id))
            .or_default()
            .insert(capability);
    }

    fn revoke(
        &mut self,
        village_id: VillageId,
        member_id: PlayerId,
        capability: VillageCapability,
    ) {
        if let Some(granted) = self.permissions.get_mut(&(village_id, member_id)) {
            granted.remove(&capability);
            if granted.is_empty() {
                self.permissions.remove(&(village_id, member_id));
            }
        }
    }

    fn membership(&self, village_id: VillageId, player: PlayerId) -> Option<&Membership> {
        self.members.get(&village_id)?.get(&player)
    }

    fn is_member(&self, village_id: VillageId, player: PlayerId) -> bool {
        self.membership(village_id, player).is_some()
    }

    fn granted(&self, village_id: VillageId, player: PlayerId) -> BTreeSet<VillageCapability> {
        self.permissions
            .get(&(village_id, player))
            .cloned()
            .unwrap_or_default()
    }

    fn has_capability(
        &self,
        village_id: VillageId,
        player: PlayerId,
        capability: VillageCapability,
    ) -> bool {
        match self.membership(village_id, player) {
            Some(membership) if membership.is_mayor() => true,
            Some(_) => self
                .permissions
                .get(&(village_id, player))
                .is_some_and(|granted| granted.contains(&capability)),
            None => false,
        }
    }
}

// ============================================================================
// SERVICE
// ============================================================================

pub struct VillageService {
    claims: Arc<AtomicClaimService>,
    cache: Arc<OwnershipCache>,
    store: Arc<dyn OwnershipStore>,
    config: VillageConfig,
    directory: RwLock<VillageDirectory>,
    village_locks: KeyedLocks<VillageId>,
    directory_lock: Mutex<()>,
}

impl VillageService {
    pub fn new(
        claims: Arc<AtomicClaimService>,
        cache: Arc<OwnershipCache>,
        store: Arc<dyn OwnershipStore>,
        config: VillageConfig,
    ) -> Self {
        Self {
            claims,
            cache,
            store,
            config,
            directory: RwLock::new(VillageDirectory::default()),
            village_locks: KeyedLocks::new(),
            directory_lock: Mutex::new(()),
        }
    }

    /// Rebuild the directory from the store. Inactive villages and their rows are skipped.
    pub fn load(&self) -> ParcelResult<()> {
        let fresh = VillageDirectory::build(
            self.store.load_villages()?,
            self.store.load_memberships()?,
            self.store.load_permissions()?,
        );
        let count = fresh.villages.len();
        *self.write_directory() = fresh;
        tracing::info!(villages = count, "village directory loaded");
        Ok(())
    }

    /// Drop the directory. Used on shutdown.
    pub fn clear(&self) {
        *self.write_directory() = VillageDirectory::default();
    }

    // ------------------------------------------------------------------------
    // Lifecycle
    // ------------------------------------------------------------------------

    /// Found a village on a connected set of the founder's personal cells.
    ///
    /// The cells are re-keyed to the village without touching free-slot
    /// accounting. The founder becomes mayor.
    pub fn create_village(
        &self,
        founder: &Actor,
        name: &str,
        cells: &[CellKey],
    ) -> ParcelResult<Village> {
        self.validate_name(name)?;
        if cells.is_empty() {
            return Err(ValidationError::RequiredFieldMissing {
                field: "cells".to_string(),
            }
            .into());
        }

        let _directory_guard = self.lock_directory();
        {
            let directory = self.read_directory();
            if directory.names.contains_key(&Village::name_key(name)) {
                return Err(name_taken(name));
            }
            if directory.member_index.contains_key(&founder.id) {
                return Err(already_in_village(founder));
            }
        }

        let _cell_guards = self.claims.lock_cells(cells);
        let mut owned = Vec::with_capacity(cells.len());
        for cell in cells.iter().collect::<BTreeSet<_>>() {
            match self.cache.get_owner(cell) {
                Some(record) if record.owner.is_player(founder.id) => owned.push(record),
                _ => {
                    tracing::debug!(
                        cell = %cell,
                        founder = %founder.id,
                        "village cell not owned by founder"
                    );
                    return Err(ParcelError::NotAllOwnedByFounder { cell: cell.clone() });
                }
            }
        }
        let regions = connectivity::groups(owned.iter().map(|r| &r.cell));
        if regions.len() != 1 {
            tracing::debug!(
                founder = %founder.id,
                groups = regions.len(),
                "village cells not connected"
            );
            return Err(ParcelError::NotConnected {
                groups: regions.len(),
            });
        }

        let village = Village::new(name, founder.id);
        let mayor = Membership::new(village.village_id, founder, VillageRole::Mayor);
        let owner = ClaimOwner::Village(village.village_id);

        let mut batch = StoreBatch::new()
            .with(StoreOp::InsertVillage(village.clone()))
            .with(StoreOp::UpsertMembership(mayor.clone()));
        let mut changes = Vec::with_capacity(owned.len());
        for record in &owned {
            let rekeyed = record.rekeyed(owner, &village.name);
            batch.push(StoreOp::UpdateClaim(rekeyed.clone()));
            batch.push(StoreOp::AppendHistory(HistoryEntry::transferred(
                record,
                &rekeyed,
                founder,
                "village founded",
            )));
            changes.push(CacheChange::Upsert(rekeyed));
        }
        self.commit(batch, "create_village", founder)?;

        self.cache.apply_many(changes);
        {
            let mut directory = self.write_directory();
            directory.insert_village(village.clone());
            directory.upsert_member(mayor);
        }
        tracing::info!(
            village = %village.village_id,
            name = %village.name,
            founder = %founder.id,
            cells = owned.len(),
            "village created"
        );
        Ok(village)
    }

    /// Dissolve a village. Every village cell returns to the mayor as personal
    /// land, and all memberships and grants are removed, in one batch.
    pub fn disband_village(&self, actor: &Actor, village_id: VillageId) -> ParcelResult<()> {
        let _village_guard = self.village_locks.acquire(village_id);
        let _directory_guard = self.lock_directory();

        let (village, mayor, members, grants) = {
            let directory = self.read_directory();
            let village = active_village(&directory, village_id)?;
            let mayor = directory
                .membership(village_id, actor.id)
                .filter(|m| m.is_mayor())
                .cloned()
                .ok_or_else(|| {
                    tracing::debug!(
                        village = %village_id,
                        actor = %actor.id,
                        "disband by non-mayor refused"
                    );
                    ParcelError::unauthorized("only the mayor can disband the village")
                })?;
            let members: Vec<PlayerId> = directory
                .members
                .get(&village_id)
                .map(|m| m.keys().copied().collect())
                .unwrap_or_default();
            let grants: Vec<(PlayerId, VillageCapability)> = members
                .iter()
                .flat_map(|member| {
                    directory
                        .granted(village_id, *member)
                        .into_iter()
                        .map(move |capability| (*member, capability))
                })
                .collect();
            (village, mayor, members, grants)
        };

        // The village lock keeps new land out, but a confiscation only needs the
        // cell lock and may release a cell between the snapshot and locking.
        let cells = self.cache.cells_for_village(village_id);
        let _cell_guards = self.claims.lock_cells(&cells);

        let owner = ClaimOwner::Personal(mayor.member_id);
        let mut batch = StoreBatch::new();
        let mut changes = Vec::with_capacity(cells.len());
        for cell in &cells {
            let record = match self.cache.get_owner(cell) {
                Some(record) if record.owner == ClaimOwner::Village(village_id) => record,
                _ => {
                    tracing::debug!(
                        cell = %cell,
                        village = %village_id,
                        "village cell released before disband"
                    );
                    continue;
                }
            };
            let rekeyed = record.rekeyed(owner, &mayor.member_name);
            batch.push(StoreOp::UpdateClaim(rekeyed.clone()));
            batch.push(StoreOp::AppendHistory(HistoryEntry::transferred(
                &record,
                &rekeyed,
                actor,
                "village disbanded",
            )));
            changes.push(CacheChange::Upsert(rekeyed));
        }

        let mut retired = village.clone();
        retired.active = false;
        retired.updated_at = Utc::now();
        batch.push(StoreOp::UpdateVillage(retired));
        for (member_id, capability) in grants {
            batch.push(StoreOp::RevokePermission {
                village_id,
                member_id,
                capability,
            });
        }
        for member_id in members {
            batch.push(StoreOp::DeleteMembership {
                village_id,
                member_id,
            });
        }
        self.commit(batch, "disband_village", actor)?;

        self.cache.apply_many(changes);
        self.write_directory().remove_village(village_id);
        tracing::info!(
            village = %village_id,
            name = %village.name,
            mayor = %mayor.member_id,
            cells = cells.len(),
            "village disbanded"
        );
        Ok(())
    }

    /// Hand the mayor role to another member. The old mayor becomes a plain member.
    pub fn transfer_mayorship(
        &self,
        actor: &Actor,
        village_id: VillageId,
        new_mayor: PlayerId,
    ) -> ParcelResult<()> {
        let _village_guard = self.village_locks.acquire(village_id);

        let (village, old, new) = {
            let directory = self.read_directory();
            let village = active_village(&directory, village_id)?;
            let old = require_mayor(&directory, village_id, actor, "transfer mayorship")?;
            if new_mayor == actor.id {
                return Err(ParcelError::invalid("new_mayor", "already the mayor"));
            }
            let new = directory
                .membership(village_id, new_mayor)
                .cloned()
                .ok_or_else(|| member_not_found(new_mayor, village_id))?;
            (village, old, new)
        };

        let mut updated = village;
        updated.mayor_id = new_mayor;
        updated.updated_at = Utc::now();
        let demoted = old.with_role(VillageRole::Member);
        let promoted = new.with_role(VillageRole::Mayor);

        let batch = StoreBatch::new()
            .with(StoreOp::UpsertMembership(demoted.clone()))
            .with(StoreOp::UpsertMembership(promoted.clone()))
            .with(StoreOp::UpdateVillage(updated.clone()));
        self.commit(batch, "transfer_mayorship", actor)?;

        {
            let mut directory = self.write_directory();
            directory.upsert_member(demoted);
            directory.upsert_member(promoted);
            directory.update_village(updated);
        }
        tracing::info!(
            village = %village_id,
            from = %actor.id,
            to = %new_mayor,
            "mayorship transferred"
        );
        Ok(())
    }

    /// Admit `new_member`. The inviter needs `INVITE_MEMBERS` (the mayor always has it).
    pub fn add_member(
        &self,
        inviter: &Actor,
        village_id: VillageId,
        new_member: &Actor,
    ) -> ParcelResult<Membership> {
        let _village_guard = self.village_locks.acquire(village_id);
        let _directory_guard = self.lock_directory();

        {
            let directory = self.read_directory();
            active_village(&directory, village_id)?;
            require_capability(&directory, village_id, inviter, VillageCapability::InviteMembers)?;
            if directory.member_index.contains_key(&new_member.id) {
                return Err(already_in_village(new_member));
            }
        }

        let membership = Membership::new(village_id, new_member, VillageRole::Member);
        self.commit(
            StoreBatch::new().with(StoreOp::UpsertMembership(membership.clone())),
            "add_member",
            inviter,
        )?;
        self.write_directory().upsert_member(membership.clone());
        tracing::info!(
            village = %village_id,
            inviter = %inviter.id,
            member = %new_member.id,
            "member added"
        );
        Ok(membership)
    }

    /// Remove a member. The kicker needs `KICK_MEMBERS`; the mayor cannot be kicked.
    pub fn kick_member(
        &self,
        kicker: &Actor,
        village_id: VillageId,
        target: PlayerId,
    ) -> ParcelResult<()> {
        let _village_guard = self.village_locks.acquire(village_id);

        let grants = {
            let directory = self.read_directory();
            active_village(&directory, village_id)?;
            require_capability(&directory, village_id, kicker, VillageCapability::KickMembers)?;
            if target == kicker.id {
                return Err(ParcelError::invalid("target", "use leave_village to leave"));
            }
            let membership = directory
                .membership(village_id, target)
                .ok_or_else(|| member_not_found(target, village_id))?;
            if membership.is_mayor() {
                tracing::debug!(
                    village = %village_id,
                    kicker = %kicker.id,
                    "attempt to kick mayor"
                );
                return Err(ParcelError::unauthorized("the mayor cannot be kicked"));
            }
            directory.granted(village_id, target)
        };

        self.commit(
            removal_batch(village_id, target, grants),
            "kick_member",
            kicker,
        )?;
        self.write_directory().remove_member(village_id, target);
        tracing::info!(
            village = %village_id,
            kicker = %kicker.id,
            member = %target,
            "member kicked"
        );
        Ok(())
    }

    /// Set a member's role. Mayor only, and never to `Mayor`.
    pub fn change_member_role(
        &self,
        actor: &Actor,
        village_id: VillageId,
        target: PlayerId,
        new_role: VillageRole,
    ) -> ParcelResult<Membership> {
        if new_role == VillageRole::Mayor {
            return Err(ParcelError::invalid("role", "use transfer_mayorship to appoint a mayor"));
        }
        let _village_guard = self.village_locks.acquire(village_id);

        let current = {
            let directory = self.read_directory();
            active_village(&directory, village_id)?;
            require_mayor(&directory, village_id, actor, "change member roles")?;
            if target == actor.id {
                return Err(ParcelError::invalid(
                    "target",
                    "the mayor's role changes only by transfer",
                ));
            }
            directory
                .membership(village_id, target)
                .cloned()
                .ok_or_else(|| member_not_found(target, village_id))?
        };

        let updated = current.with_role(new_role);
        self.commit(
            StoreBatch::new().with(StoreOp::UpsertMembership(updated.clone())),
            "change_member_role",
            actor,
        )?;
        self.write_directory().upsert_member(updated.clone());
        tracing::info!(
            village = %village_id,
            member = %target,
            role = %new_role,
            "member role changed"
        );
        Ok(updated)
    }

    /// Leave the member's village. The mayor must transfer or disband instead.
    pub fn leave_village(&self, member: &Actor) -> ParcelResult<VillageId> {
        let village_id = self
            .read_directory()
            .member_index
            .get(&member.id)
            .copied()
            .ok_or_else(|| ParcelError::not_found(format!("village membership of {}", member.id)))?;
        let _village_guard = self.village_locks.acquire(village_id);

        let grants = {
            let directory = self.read_directory();
            // Re-read under the village lock; the membership may have changed.
            let membership = directory
                .membership(village_id, member.id)
                .ok_or_else(|| {
                    ParcelError::not_found(format!("village membership of {}", member.id))
                })?;
            if membership.is_mayor() {
                return Err(ParcelError::unauthorized(
                    "the mayor must transfer mayorship or disband before leaving",
                ));
            }
            directory.granted(village_id, member.id)
        };

        self.commit(
            removal_batch(village_id, member.id, grants),
            "leave_village",
            member,
        )?;
        self.write_directory().remove_member(village_id, member.id);
        tracing::info!(village = %village_id, member = %member.id, "member left");
        Ok(village_id)
    }

    /// Rename a village. Needs `RENAME_VILLAGE`. Village claims pick up the new name.
    pub fn rename_village(
        &self,
        actor: &Actor,
        village_id: VillageId,
        new_name: &str,
    ) -> ParcelResult<Village> {
        self.validate_name(new_name)?;
        let _village_guard = self.village_locks.acquire(village_id);
        let _directory_guard = self.lock_directory();

        let village = {
            let directory = self.read_directory();
            let village = active_village(&directory, village_id)?;
            require_capability(&directory, village_id, actor, VillageCapability::RenameVillage)?;
            match directory.names.get(&Village::name_key(new_name)) {
                Some(other) if *other != village_id => return Err(name_taken(new_name)),
                _ => {}
            }
            village
        };

        let cells = self.cache.cells_for_village(village_id);
        let _cell_guards = self.claims.lock_cells(&cells);

        let mut renamed = village.clone();
        renamed.name = new_name.to_string();
        renamed.updated_at = Utc::now();

        // Display-name refresh only; ownership is unchanged so no history is written.
        let mut batch = StoreBatch::new().with(StoreOp::UpdateVillage(renamed.clone()));
        let mut changes = Vec::with_capacity(cells.len());
        for cell in &cells {
            if let Some(record) = self
                .cache
                .get_owner(cell)
                .filter(|record| record.owner == ClaimOwner::Village(village_id))
            {
                let relabelled = ClaimRecord {
                    owner_name: renamed.name.clone(),
                    ..record
                };
                batch.push(StoreOp::UpdateClaim(relabelled.clone()));
                changes.push(CacheChange::Upsert(relabelled));
            }
        }
        self.commit(batch, "rename_village", actor)?;

        self.cache.apply_many(changes);
        self.write_directory().update_village(renamed.clone());
        tracing::info!(
            village = %village_id,
            from = %village.name,
            to = %renamed.name,
            "village renamed"
        );
        Ok(renamed)
    }

    // ------------------------------------------------------------------------
    // Land
    // ------------------------------------------------------------------------

    /// Claim `cell` for the actor's village. Needs `EXPAND_LAND`, a paid cost,
    /// and an edge shared with existing village land (unless the village has none).
    pub fn claim_for_village(
        &self,
        actor: &Actor,
        cell: &CellKey,
        cost: ClaimCost,
    ) -> ParcelResult<ClaimRecord> {
        if cost.is_free() || cost.free_slot_index.is_some() {
            return Err(ParcelError::invalid(
                "cost",
                "free slots apply to personal claims only",
            ));
        }
        if cost.amount == 0 {
            return Err(ParcelError::invalid("cost.amount", "paid claims must cost something"));
        }
        self.claims.policy().check_offered(&cost)?;
        let village_id = self.village_of(actor)?;
        let _village_guard = self.village_locks.acquire(village_id);

        let village = {
            let directory = self.read_directory();
            let village = active_village(&directory, village_id)?;
            require_capability(&directory, village_id, actor, VillageCapability::ExpandLand)?;
            village
        };

        let _cell_guard = self.claims.lock_cell(cell);
        self.claims.ensure_unclaimed(cell, actor)?;

        let land = self.cache.cells_for_village(village_id);
        if !land.is_empty() && !connectivity::touches(&land, cell) {
            tracing::debug!(cell = %cell, village = %village_id, "village expansion not adjacent");
            return Err(ParcelError::NotConnected { groups: 2 });
        }

        self.claims
            .insert_locked(actor, cell, ClaimOwner::Village(village_id), &village.name, cost)
    }

    /// Release village cells. Needs `REDUCE_LAND`. All cells go, or none do.
    pub fn return_village_cells(
        &self,
        actor: &Actor,
        cells: &[CellKey],
        reason: Option<String>,
    ) -> ParcelResult<Vec<ClaimRecord>> {
        if cells.is_empty() {
            return Err(ValidationError::RequiredFieldMissing {
                field: "cells".to_string(),
            }
            .into());
        }
        let village_id = self.village_of(actor)?;
        let _village_guard = self.village_locks.acquire(village_id);
        {
            let directory = self.read_directory();
            active_village(&directory, village_id)?;
            require_capability(&directory, village_id, actor, VillageCapability::ReduceLand)?;
        }

        let _cell_guards = self.claims.lock_cells(cells);
        let mut removed = Vec::with_capacity(cells.len());
        for cell in cells.iter().collect::<BTreeSet<_>>() {
            match self.cache.get_owner(cell) {
                Some(record) if record.owner == ClaimOwner::Village(village_id) => {
                    removed.push(record)
                }
                Some(_) => {
                    return Err(ParcelError::unauthorized(format!(
                        "{} is not land of this village",
                        cell
                    )))
                }
                None => return Err(ParcelError::not_found(format!("claim at {}", cell))),
            }
        }

        let mut batch = StoreBatch::new();
        for record in &removed {
            batch.push(StoreOp::DeleteClaim(record.cell.clone()));
            batch.push(StoreOp::AppendHistory(HistoryEntry::removed(
                record,
                actor,
                HistoryAction::Unclaimed,
                reason.clone(),
            )));
        }
        self.commit(batch, "return_village_cells", actor)?;

        self.cache.apply_many(
            removed
                .iter()
                .map(|r| CacheChange::Remove(r.cell.clone()))
                .collect(),
        );
        tracing::info!(
            village = %village_id,
            actor = %actor.id,
            cells = removed.len(),
            "village land returned"
        );
        Ok(removed)
    }

    // ------------------------------------------------------------------------
    // Permissions
    // ------------------------------------------------------------------------

    /// Grant `capability` to a member.
    ///
    /// The mayor may grant anything. A deputy mayor, or a member holding
    /// `MANAGE_PERMISSIONS`, may grant only capabilities outside the
    /// mayor-only set. The mayor never needs grants and cannot receive them.
    pub fn grant_permission(
        &self,
        granter: &Actor,
        village_id: VillageId,
        target: PlayerId,
        capability: VillageCapability,
    ) -> ParcelResult<MemberPermission> {
        let _village_guard = self.village_locks.acquire(village_id);
        {
            let directory = self.read_directory();
            self.check_permission_change(&directory, granter, village_id, target, capability)?;
        }

        let permission = MemberPermission::new(village_id, target, capability, granter.id);
        self.commit(
            StoreBatch::new().with(StoreOp::GrantPermission(permission.clone())),
            "grant_permission",
            granter,
        )?;
        self.write_directory().grant(village_id, target, capability);
        tracing::info!(
            village = %village_id,
            granter = %granter.id,
            member = %target,
            capability = %capability,
            "permission granted"
        );
        Ok(permission)
    }

    /// Revoke `capability` from a member. Same authority rules as granting.
    pub fn revoke_permission(
        &self,
        revoker: &Actor,
        village_id: VillageId,
        target: PlayerId,
        capability: VillageCapability,
    ) -> ParcelResult<()> {
        let _village_guard = self.village_locks.acquire(village_id);
        {
            let directory = self.read_directory();
            self.check_permission_change(&directory, revoker, village_id, target, capability)?;
            if !directory.granted(village_id, target).contains(&capability) {
                return Err(ParcelError::not_found(format!(
                    "{} grant for member {}",
                    capability, target
                )));
            }
        }

        self.commit(
            StoreBatch::new().with(StoreOp::RevokePermission {
                village_id,
                member_id: target,
                capability,
            }),
            "revoke_permission",
            revoker,
        )?;
        self.write_directory().revoke(village_id, target, capability);
        tracing::info!(
            village = %village_id,
            revoker = %revoker.id,
            member = %target,
            capability = %capability,
            "permission revoked"
        );
        Ok(())
    }

    fn check_permission_change(
        &self,
        directory: &VillageDirectory,
        actor: &Actor,
        village_id: VillageId,
        target: PlayerId,
        capability: VillageCapability,
    ) -> ParcelResult<()> {
        active_village(directory, village_id)?;
        let acting = directory
            .membership(village_id, actor.id)
            .ok_or_else(|| ParcelError::unauthorized("not a member of this village"))?;

        let allowed = match acting.role {
            VillageRole::Mayor => true,
            VillageRole::DeputyMayor => {
                !capability.is_mayor_only_grant()
                    && directory.has_capability(
                        village_id,
                        actor.id,
                        VillageCapability::ManagePermissions,
                    )
            }
            VillageRole::Member => false,
        };
        if !allowed {
            tracing::debug!(
                village = %village_id,
                actor = %actor.id,
                role = %acting.role,
                capability = %capability,
                "permission change refused"
            );
            return Err(ParcelError::unauthorized(format!(
                "a {} cannot manage {}",
                acting.role, capability
            )));
        }

        let target_membership = directory
            .membership(village_id, target)
            .ok_or_else(|| member_not_found(target, village_id))?;
        if target_membership.is_mayor() {
            return Err(ParcelError::invalid("target", "the mayor holds every capability"));
        }
        Ok(())
    }

    // ------------------------------------------------------------------------
    // Queries (in-memory only)
    // ------------------------------------------------------------------------

    pub fn village(&self, village_id: VillageId) -> Option<Village> {
        self.read_directory().villages.get(&village_id).cloned()
    }

    pub fn village_by_name(&self, name: &str) -> Option<Village> {
        let directory = self.read_directory();
        let id = directory.names.get(&Village::name_key(name))?;
        directory.villages.get(id).cloned()
    }

    /// All active villages, by name.
    pub fn villages(&self) -> Vec<Village> {
        let mut villages: Vec<Village> = self.read_directory().villages.values().cloned().collect();
        villages.sort_by(|a, b| a.name.cmp(&b.name));
        villages
    }

    pub fn membership_of(&self, player: PlayerId) -> Option<Membership> {
        let directory = self.read_directory();
        let village_id = directory.member_index.get(&player)?;
        directory.membership(*village_id, player).cloned()
    }

    /// Members of a village: mayor first, then deputies, then members, each by join time.
    pub fn members(&self, village_id: VillageId) -> Vec<Membership> {
        let directory = self.read_directory();
        let mut members: Vec<Membership> = directory
            .members
            .get(&village_id)
            .map(|m| m.values().cloned().collect())
            .unwrap_or_default();
        members.sort_by_key(|m| (role_rank(m.role), m.joined_at));
        members
    }

    /// Explicit grants held by a member. The mayor's implicit capabilities are not listed.
    pub fn permissions_of(
        &self,
        village_id: VillageId,
        member: PlayerId,
    ) -> Vec<VillageCapability> {
        self.read_directory()
            .granted(village_id, member)
            .into_iter()
            .collect()
    }

    /// Mayor: everything. Others: explicit grants only.
    pub fn has_capability(
        &self,
        village_id: VillageId,
        player: PlayerId,
        capability: VillageCapability,
    ) -> bool {
        self.read_directory()
            .has_capability(village_id, player, capability)
    }

    // ------------------------------------------------------------------------
    // Internals
    // ------------------------------------------------------------------------

    fn validate_name(&self, name: &str) -> ParcelResult<()> {
        Village::validate_name(name, self.config.name_min_len, self.config.name_max_len)?;
        Ok(())
    }

    fn village_of(&self, actor: &Actor) -> ParcelResult<VillageId> {
        self.read_directory()
            .member_index
            .get(&actor.id)
            .copied()
            .ok_or_else(|| ParcelError::unauthorized("not a member of any village"))
    }

    fn commit(
        &self,
        batch: StoreBatch,
        operation: &'static str,
        actor: &Actor,
    ) -> ParcelResult<()> {
        let ops = batch.len();
        self.store.apply(batch).map_err(|e| {
            tracing::error!(
                operation,
                actor = %actor.id,
                ops,
                error = %e,
                "village change not persisted"
            );
            e
        })
    }

    fn lock_directory(&self) -> std::sync::MutexGuard<'_, ()> {
        self.directory_lock
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    fn read_directory(&self) -> RwLockReadGuard<'_, VillageDirectory> {
        self.directory.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write_directory(&self) -> RwLockWriteGuard<'_, VillageDirectory> {
        self.directory.write().unwrap_or_else(PoisonError::into_inner)
    }
}

impl std::fmt::Debug for VillageService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("VillageService")
            .field("villages", &self.read_directory().villages.len())
            .field("village_locks", &self.village_locks)
            .finish_non_exhaustive()
    }
}

fn active_village(directory: &VillageDirectory, village_id: VillageId) -> ParcelResult<Village> {
    directory
        .villages
        .get(&village_id)
        .cloned()
        .ok_or_else(|| ParcelError::not_found(format!("village {}", village_id)))
}

fn require_mayor(
    directory: &VillageDirectory,
    village_id: VillageId,
    actor: &Actor,
    what: &str,
) -> ParcelResult<Membership> {
    directory
        .membership(village_id, actor.id)
        .filter(|m| m.is_mayor())
        .cloned()
        .ok_or_else(|| {
            tracing::debug!(
                village = %village_id,
                actor = %actor.id,
                what,
                "mayor-only action refused"
            );
            ParcelError::unauthorized(format!("only the mayor can {}", what))
        })
}

fn require_capability(
    directory: &VillageDirectory,
    village_id: VillageId,
    actor: &Actor,
    capability: VillageCapability,
) -> ParcelResult<()> {
    if directory.has_capability(village_id, actor.id, capability) {
        return Ok(());
    }
    tracing::debug!(
        village = %village_id,
        actor = %actor.id,
        capability = %capability,
        "capability missing"
    );
    Err(ParcelError::unauthorized(format!("{} required", capability)))
}

fn removal_batch(
    village_id: VillageId,
    member_id: PlayerId,
    grants: BTreeSet<VillageCapability>,
) -> StoreBatch {
    let mut batch = StoreBatch::new();
    for capability in grants {
        batch.push(StoreOp::RevokePermission {
            village_id,
            member_id,
            capability,
        });
    }
    batch.push(StoreOp::DeleteMembership {
        village_id,
        member_id,
    });
    batch
}

fn name_taken(name: &str) -> ParcelError {
    ValidationError::ConstraintViolation {
        constraint: "village_name_unique".to_string(),
        reason: format!("a village named {} already exists", name),
    }
    .into()
}

fn member_not_found(member: PlayerId, village_id: VillageId) -> ParcelError {
    ParcelError::not_found(format!("member {} of village {}", member, village_id))
}

fn already_in_village(player: &Actor) -> ParcelError {
    ValidationError::ConstraintViolation {
        constraint: "one_village_per_player".to_string(),
        reason: format!("{} already belongs to a village", player.name),
    }
    .into()
}

fn role_rank(role: VillageRole) -> u8 {
    match role {
        VillageRole::Mayor => 0,
        VillageRole::DeputyMayor => 1,
        VillageRole::Member => 2,
    }
}
