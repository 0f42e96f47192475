//! The assembled ownership engine.
//!
//! `OwnershipSystem::start` loads the cache and the village directory from the
//! store and wires the services together; `shutdown` drops the in-memory state.
//! There is one cache per system, shared by reference with every service.

use crate::cache::{CacheStats, OwnershipCache};
use crate::claim::AtomicClaimService;
use crate::connectivity;
use crate::cost::CostPolicy;
use crate::protection::{PersonalTrustProvider, ProtectionGate, VillagePermissionProvider};
use crate::village::VillageService;
use parcel_core::{
    ActionDecision, Actor, AuthorityCheck, CellKey, ClaimRecord, PaidTier, ParcelConfig,
    ParcelError, ParcelResult, PlayerId, TrustDirectory, VillageId, WorldAction,
};
use parcel_storage::OwnershipStore;
use std::sync::Arc;

pub struct OwnershipSystem {
    config: ParcelConfig,
    store: Arc<dyn OwnershipStore>,
    cache: Arc<OwnershipCache>,
    claims: Arc<AtomicClaimService>,
    villages: Arc<VillageService>,
    gate: ProtectionGate,
}

impl OwnershipSystem {
    /// Validate the config, load state from the store and wire the services.
    pub fn start(
        store: Arc<dyn OwnershipStore>,
        config: ParcelConfig,
        trust: Arc<dyn TrustDirectory>,
        authority: Arc<dyn AuthorityCheck>,
    ) -> ParcelResult<Self> {
        config.validate()?;

        let cache = Arc::new(OwnershipCache::new());
        let claims = Arc::new(AtomicClaimService::new(
            Arc::clone(&store),
            Arc::clone(&cache),
            CostPolicy::new(config.claims.clone()),
            Arc::clone(&authority),
        ));
        let villages = Arc::new(VillageService::new(
            Arc::clone(&claims),
            Arc::clone(&cache),
            Arc::clone(&store),
            config.villages.clone(),
        ));
        let gate = ProtectionGate::new(Arc::clone(&cache), authority)
            .with_provider(Box::new(PersonalTrustProvider::new(trust)))
            .with_provider(Box::new(VillagePermissionProvider::new(Arc::clone(&villages))));

        let system = Self {
            config,
            store,
            cache,
            claims,
            villages,
            gate,
        };
        system.reload()?;
        Ok(system)
    }

    /// Replace the cache and the village directory with a fresh snapshot from the store.
    pub fn reload(&self) -> ParcelResult<()> {
        let records = self.store.load_claims()?;
        let marks = self.store.load_free_slot_marks()?;
        self.cache.load_all(records, marks);
        self.villages.load()?;

        for village in self.cache.villages_with_land() {
            if self.villages.village(village).is_none() {
                let e = ParcelError::invariant(format!(
                    "claims reference village {} which is not active",
                    village
                ));
                tracing::error!(village = %village, error = %e, "orphaned village land");
            }
        }

        let stats = self.cache.stats();
        tracing::info!(
            cells = stats.cells,
            players = stats.players,
            villages = stats.villages,
            "ownership state loaded"
        );
        Ok(())
    }

    /// Drop all in-memory state. The store is left as is.
    pub fn shutdown(self) {
        self.cache.clear();
        self.villages.clear();
        tracing::info!("ownership system stopped");
    }

    pub fn config(&self) -> &ParcelConfig {
        &self.config
    }

    pub fn cache(&self) -> &Arc<OwnershipCache> {
        &self.cache
    }

    pub fn claims(&self) -> &Arc<AtomicClaimService> {
        &self.claims
    }

    pub fn villages(&self) -> &Arc<VillageService> {
        &self.villages
    }

    pub fn gate(&self) -> &ProtectionGate {
        &self.gate
    }

    pub fn stats(&self) -> CacheStats {
        self.cache.stats()
    }

    pub fn is_action_allowed(
        &self,
        cell: &CellKey,
        actor: PlayerId,
        action: WorldAction,
    ) -> ActionDecision {
        self.gate.is_action_allowed(cell, actor, action)
    }

    /// Quote and claim in one call, enforcing the newcomer cap.
    ///
    /// The quote is taken outside the cell lock; if another claim by the same
    /// player consumes the slot first, this returns `StaleQuote`.
    pub fn claim_next(
        &self,
        actor: &Actor,
        cell: &CellKey,
        requested: Option<PaidTier>,
        is_veteran: bool,
    ) -> ParcelResult<ClaimRecord> {
        let cost = self.claims.quote(actor.id, requested)?;
        self.claims.claim_with_limit(actor, cell, cost, is_veteran)
    }

    /// The player's personal land split into connected regions.
    pub fn regions_of(&self, player: PlayerId) -> Vec<Vec<CellKey>> {
        connectivity::groups(&self.cache.cells_for_owner(player))
    }

    /// A village's land split into connected regions.
    pub fn village_regions(&self, village: VillageId) -> Vec<Vec<CellKey>> {
        connectivity::groups(&self.cache.cells_for_village(village))
    }
}

impl std::fmt::Debug for OwnershipSystem {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OwnershipSystem")
            .field("config", &self.config)
            .field("stats", &self.cache.stats())
            .finish_non_exhaustive()
    }
}
