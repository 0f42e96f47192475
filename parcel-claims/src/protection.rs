//! Per-action authorization for world mutations.
//!
//! Called for every block placed or broken, so it reads only in-memory state:
//! the claim cache and the village directory. It never touches the store.

use crate::cache::OwnershipCache;
use crate::village::VillageService;
use parcel_core::{
    ActionDecision, AuthorityCheck, CellKey, ClaimOwner, ClaimRecord, PlayerId, TrustDirectory,
    WorldAction,
};
use std::sync::Arc;

/// One source of permission to act on someone else's land.
pub trait CapabilityProvider: Send + Sync {
    /// Whether `actor` may perform `action` on the land described by `record`.
    /// Providers answer `false` for land they know nothing about.
    fn grants(&self, record: &ClaimRecord, actor: PlayerId, action: WorldAction) -> bool;
}

/// Personal land: the owner's trust list decides.
pub struct PersonalTrustProvider {
    trust: Arc<dyn TrustDirectory>,
}

impl PersonalTrustProvider {
    pub fn new(trust: Arc<dyn TrustDirectory>) -> Self {
        Self { trust }
    }
}

impl CapabilityProvider for PersonalTrustProvider {
    fn grants(&self, record: &ClaimRecord, actor: PlayerId, _action: WorldAction) -> bool {
        match record.owner {
            ClaimOwner::Personal(owner) => self.trust.is_trusted(owner, actor),
            ClaimOwner::Village(_) => false,
        }
    }
}

/// Village land: the action's capability must be held in that village.
pub struct VillagePermissionProvider {
    villages: Arc<VillageService>,
}

impl VillagePermissionProvider {
    pub fn new(villages: Arc<VillageService>) -> Self {
        Self { villages }
    }
}

impl CapabilityProvider for VillagePermissionProvider {
    fn grants(&self, record: &ClaimRecord, actor: PlayerId, action: WorldAction) -> bool {
        match record.owner {
            ClaimOwner::Village(village) => {
                self.villages
                    .has_capability(village, actor, action.required_capability())
            }
            ClaimOwner::Personal(_) => false,
        }
    }
}

/// Decides whether an actor may act at a cell.
///
/// Order: unclaimed land is open; the owner may always act; elevated actors
/// bypass; then each provider is asked in turn; otherwise the action is denied.
pub struct ProtectionGate {
    cache: Arc<OwnershipCache>,
    authority: Arc<dyn AuthorityCheck>,
    providers: Vec<Box<dyn CapabilityProvider>>,
}

impl ProtectionGate {
    pub fn new(cache: Arc<OwnershipCache>, authority: Arc<dyn AuthorityCheck>) -> Self {
        Self {
            cache,
            authority,
            providers: Vec::new(),
        }
    }

    /// Append a provider to the end of the chain.
    pub fn with_provider(mut self, provider: Box<dyn CapabilityProvider>) -> Self {
        self.providers.push(provider);
        self
    }

    pub fn is_action_allowed(
        &self,
        cell: &CellKey,
        actor: PlayerId,
        action: WorldAction,
    ) -> ActionDecision {
        let Some(record) = self.cache.get_owner(cell) else {
            return ActionDecision::Allowed;
        };
        if record.owner.is_player(actor) || self.authority.is_elevated(actor) {
            return ActionDecision::Allowed;
        }
        if self
            .providers
            .iter()
            .any(|provider| provider.grants(&record, actor, action))
        {
            return ActionDecision::Allowed;
        }

        tracing::trace!(
            cell = %cell,
            actor = %actor,
            action = %action,
            owner = %record.owner,
            "action denied"
        );
        ActionDecision::Denied {
            owner_kind: record.owner_kind(),
            owner_name: record.owner_name,
        }
    }
}

impl std::fmt::Debug for ProtectionGate {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProtectionGate")
            .field("providers", &self.providers.len())
            .finish_non_exhaustive()
    }
}
