//! PARCEL Test Utilities
//!
//! Centralized test infrastructure for the PARCEL workspace:
//! - Proptest generators for identities, cells and enums
//! - Mock collaborators (trust directory, authority check)
//! - Test fixtures for common scenarios
//! - Custom assertions for PARCEL error variants

// Re-export mock storage from its source crate
pub use parcel_storage::{MockStore, OwnershipStore, StoreBatch, StoreOp};

// Re-export core types for convenience
pub use parcel_core::{
    ActionDecision, Actor, AuthorityCheck, CellKey, ClaimConfig, ClaimCost, ClaimOwner,
    ClaimRecord, ConfigError, CostKind, CostRejection, EntityIdType, HistoryAction, OwnerKind,
    PaidTier, ParcelConfig, ParcelError, ParcelResult, PlayerId, RefundPolicy, StorageError,
    TierCosts, TrustDirectory, ValidationError, VillageCapability, VillageConfig, VillageId,
    VillageRole, WorldAction,
};

use std::collections::HashSet;
use std::sync::{PoisonError, RwLock};
use uuid::Uuid;

// ============================================================================
// MOCK COLLABORATORS
// ============================================================================

/// Trust directory backed by an explicit set of `(owner, visitor)` pairs.
#[derive(Debug, Default)]
pub struct StaticTrustDirectory {
    pairs: RwLock<HashSet<(PlayerId, PlayerId)>>,
}

impl StaticTrustDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Let `visitor` act on `owner`'s personal land.
    pub fn trust(&self, owner: PlayerId, visitor: PlayerId) {
        self.pairs
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert((owner, visitor));
    }

    pub fn untrust(&self, owner: PlayerId, visitor: PlayerId) {
        self.pairs
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&(owner, visitor));
    }
}

impl TrustDirectory for StaticTrustDirectory {
    fn is_trusted(&self, owner: PlayerId, visitor: PlayerId) -> bool {
        self.pairs
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .contains(&(owner, visitor))
    }
}

/// Authority check backed by an explicit set of elevated players.
#[derive(Debug, Default)]
pub struct StaticAuthority {
    elevated: RwLock<HashSet<PlayerId>>,
}

impl StaticAuthority {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn elevate(&self, player: PlayerId) {
        self.elevated
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(player);
    }

    pub fn demote(&self, player: PlayerId) {
        self.elevated
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&player);
    }
}

impl AuthorityCheck for StaticAuthority {
    fn is_elevated(&self, actor: PlayerId) -> bool {
        self.elevated
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .contains(&actor)
    }
}

/// Install a test-writer tracing subscriber honouring `RUST_LOG`.
///
/// Safe to call from every test; only the first call installs anything.
pub fn init_test_tracing() {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn"));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_test_writer()
        .try_init();
}

// ============================================================================
// PROPTEST GENERATORS
// ============================================================================

pub mod generators {
    //! Proptest strategies for generating PARCEL types.

    use super::*;
    use proptest::prelude::*;

    // === Identity Generators ===

    /// Generate a random UUID.
    pub fn arb_uuid() -> impl Strategy<Value = Uuid> {
        any::<[u8; 16]>().prop_map(Uuid::from_bytes)
    }

    pub fn arb_player_id() -> impl Strategy<Value = PlayerId> {
        arb_uuid().prop_map(PlayerId::new)
    }

    /// Generate an actor with a short alphanumeric name.
    pub fn arb_actor() -> impl Strategy<Value = Actor> {
        (arb_player_id(), "[A-Za-z][A-Za-z0-9_]{2,15}")
            .prop_map(|(id, name)| Actor::new(id, name))
    }

    // === Cell Generators ===

    pub fn arb_world() -> impl Strategy<Value = String> {
        prop_oneof![
            Just("overworld".to_string()),
            Just("nether".to_string()),
            Just("end".to_string()),
        ]
    }

    /// Generate a cell near the origin, where collisions between generated cells are likely.
    pub fn arb_cell_key() -> impl Strategy<Value = CellKey> {
        (arb_world(), -16i32..16, -16i32..16).prop_map(|(world, x, z)| CellKey::new(world, x, z))
    }

    /// Generate a set of distinct cells, possibly spread over several worlds.
    pub fn arb_cell_set(max: usize) -> impl Strategy<Value = Vec<CellKey>> {
        prop::collection::btree_set(arb_cell_key(), 0..=max)
            .prop_map(|cells| cells.into_iter().collect())
    }

    /// Generate a non-empty, edge-connected set of cells in one world.
    ///
    /// Built as a random walk: every step moves to a neighbour of the previous cell.
    pub fn arb_connected_cells(max_steps: usize) -> impl Strategy<Value = Vec<CellKey>> {
        (
            arb_world(),
            -1000i32..1000,
            -1000i32..1000,
            prop::collection::vec(0usize..4, 0..=max_steps),
        )
            .prop_map(|(world, x, z, steps)| {
                const DIRECTIONS: [(i32, i32); 4] = [(0, 1), (0, -1), (1, 0), (-1, 0)];
                let mut current = CellKey::new(world, x, z);
                let mut cells = std::collections::BTreeSet::new();
                cells.insert(current.clone());
                for step in steps {
                    let (dx, dz) = DIRECTIONS[step];
                    if let Some(next) = current.offset(dx, dz) {
                        cells.insert(next.clone());
                        current = next;
                    }
                }
                cells.into_iter().collect()
            })
    }

    // === Enum Generators ===

    pub fn arb_paid_tier() -> impl Strategy<Value = PaidTier> {
        prop::sample::select(PaidTier::ALL.to_vec())
    }

    pub fn arb_capability() -> impl Strategy<Value = VillageCapability> {
        prop::sample::select(VillageCapability::ALL.to_vec())
    }

    pub fn arb_role() -> impl Strategy<Value = VillageRole> {
        prop::sample::select(VillageRole::ALL.to_vec())
    }

    pub fn arb_world_action() -> impl Strategy<Value = WorldAction> {
        prop::sample::select(WorldAction::ALL.to_vec())
    }

    // === Config Generators ===

    /// Generate a config that passes validation.
    pub fn arb_valid_config() -> impl Strategy<Value = ParcelConfig> {
        (
            0u32..16,
            prop::option::of(1usize..64),
            (1u32..128, 1u32..32, 1u32..8),
            prop::option::of(0u8..=100),
            (1usize..8, 0usize..32),
        )
            .prop_map(
                |(quota, limit, (iron, diamond, netherite), refund, (name_min, extra))| {
                    ParcelConfig {
                        claims: ClaimConfig {
                            free_claim_quota: quota,
                            newcomer_claim_limit: limit,
                            tier_costs: TierCosts {
                                iron_ingot: iron,
                                diamond,
                                netherite_ingot: netherite,
                            },
                            refund: match refund {
                                Some(percent) => RefundPolicy::Fraction { percent },
                                None => RefundPolicy::None,
                            },
                        },
                        villages: VillageConfig {
                            name_min_len: name_min,
                            name_max_len: name_min + extra,
                        },
                    }
                },
            )
    }
}

// ============================================================================
// TEST FIXTURES
// ============================================================================

pub mod fixtures {
    //! Pre-built test fixtures for common testing scenarios.

    use super::*;
    use std::sync::Arc;

    /// An actor with a fresh identifier.
    pub fn actor(name: &str) -> Actor {
        Actor::new(PlayerId::now_v7(), name)
    }

    pub fn alice() -> Actor {
        actor("Alice")
    }

    pub fn bob() -> Actor {
        actor("Bob")
    }

    pub fn carol() -> Actor {
        actor("Carol")
    }

    pub fn overworld(x: i32, z: i32) -> CellKey {
        CellKey::new("overworld", x, z)
    }

    /// Cells `(x, z)` for `x` in `from..=to` along one row of the overworld.
    pub fn row(z: i32, from: i32, to: i32) -> Vec<CellKey> {
        (from..=to).map(|x| overworld(x, z)).collect()
    }

    /// A `size` by `size` square of overworld cells with its low corner at `(x, z)`.
    pub fn square(x: i32, z: i32, size: i32) -> Vec<CellKey> {
        (x..x + size)
            .flat_map(|cx| (z..z + size).map(move |cz| overworld(cx, cz)))
            .collect()
    }

    /// The default config: four free slots, newcomer cap of nine, no refunds.
    pub fn default_config() -> ParcelConfig {
        ParcelConfig::default()
    }

    /// A config with small, easy-to-exhaust limits.
    pub fn tight_config(
        free_claim_quota: u32,
        newcomer_claim_limit: Option<usize>,
    ) -> ParcelConfig {
        let mut config = ParcelConfig::default();
        config.claims.free_claim_quota = free_claim_quota;
        config.claims.newcomer_claim_limit = newcomer_claim_limit;
        config
    }

    pub fn refunding_config(percent: u8) -> ParcelConfig {
        let mut config = ParcelConfig::default();
        config.claims.refund = RefundPolicy::Fraction { percent };
        config
    }

    /// A personal claim paid for with free slot `slot`.
    pub fn free_claim(owner: &Actor, cell: CellKey, slot: u32) -> ClaimRecord {
        ClaimRecord::new(
            cell,
            ClaimOwner::Personal(owner.id),
            owner.name.clone(),
            ClaimCost::free(slot),
        )
    }

    /// A personal claim paid for with `amount` of `tier`.
    pub fn paid_claim(owner: &Actor, cell: CellKey, tier: PaidTier, amount: u32) -> ClaimRecord {
        ClaimRecord::new(
            cell,
            ClaimOwner::Personal(owner.id),
            owner.name.clone(),
            ClaimCost::paid(tier, amount),
        )
    }

    /// A store pre-populated with `records`, bypassing history.
    pub fn seeded_store(
        records: impl IntoIterator<Item = ClaimRecord>,
    ) -> ParcelResult<Arc<MockStore>> {
        let store = Arc::new(MockStore::new());
        for record in records {
            store.seed_claim(record)?;
        }
        Ok(store)
    }

    /// A store holding `owner`'s free claims on `cells`, slots numbered from 1.
    pub fn store_with_free_claims(
        owner: &Actor,
        cells: &[CellKey],
    ) -> ParcelResult<Arc<MockStore>> {
        seeded_store(
            cells
                .iter()
                .zip(1u32..)
                .map(|(cell, slot)| free_claim(owner, cell.clone(), slot)),
        )
    }
}

// ============================================================================
// CUSTOM ASSERTIONS
// ============================================================================

pub mod assertions {
    //! Assertions for PARCEL results and decisions.

    use super::*;

    /// Assert that a ParcelResult is Ok.
    #[track_caller]
    pub fn assert_ok<T: std::fmt::Debug>(result: &ParcelResult<T>) {
        assert!(result.is_ok(), "Expected Ok, got Err: {:?}", result);
    }

    /// Assert a claim conflict naming `owner_name`.
    #[track_caller]
    pub fn assert_conflict<T: std::fmt::Debug>(result: &ParcelResult<T>, owner_name: &str) {
        match result {
            Err(ParcelError::Conflict { owner_name: name, .. }) => {
                assert_eq!(name, owner_name, "Wrong owner in Conflict error");
            }
            other => panic!("Expected Conflict owned by {}, got: {:?}", owner_name, other),
        }
    }

    #[track_caller]
    pub fn assert_unauthorized<T: std::fmt::Debug>(result: &ParcelResult<T>) {
        match result {
            Err(ParcelError::Unauthorized { .. }) => {}
            other => panic!("Expected Unauthorized error, got: {:?}", other),
        }
    }

    #[track_caller]
    pub fn assert_not_found<T: std::fmt::Debug>(result: &ParcelResult<T>) {
        match result {
            Err(ParcelError::NotFound { .. }) => {}
            other => panic!("Expected NotFound error, got: {:?}", other),
        }
    }

    /// Assert a connectivity failure with exactly `groups` components.
    #[track_caller]
    pub fn assert_not_connected<T: std::fmt::Debug>(result: &ParcelResult<T>, groups: usize) {
        match result {
            Err(ParcelError::NotConnected { groups: g }) => {
                assert_eq!(*g, groups, "Wrong group count in NotConnected error");
            }
            other => panic!("Expected NotConnected({}), got: {:?}", groups, other),
        }
    }

    #[track_caller]
    pub fn assert_validation_error<T: std::fmt::Debug>(result: &ParcelResult<T>) {
        match result {
            Err(ParcelError::Validation(_)) => {}
            other => panic!("Expected Validation error, got: {:?}", other),
        }
    }

    #[track_caller]
    pub fn assert_persistence_error<T: std::fmt::Debug>(result: &ParcelResult<T>) {
        match result {
            Err(ParcelError::Persistence(_)) => {}
            other => panic!("Expected Persistence error, got: {:?}", other),
        }
    }

    #[track_caller]
    pub fn assert_config_error<T: std::fmt::Debug>(result: &ParcelResult<T>) {
        match result {
            Err(ParcelError::Config(_)) => {}
            other => panic!("Expected Config error, got: {:?}", other),
        }
    }

    #[track_caller]
    pub fn assert_cost_rejected<T: std::fmt::Debug>(result: &ParcelResult<T>) {
        match result {
            Err(ParcelError::CostRejected(_)) => {}
            other => panic!("Expected CostRejected error, got: {:?}", other),
        }
    }

    #[track_caller]
    pub fn assert_allowed(decision: &ActionDecision) {
        assert!(decision.is_allowed(), "Expected Allowed, got: {:?}", decision);
    }

    /// Assert a denial naming the land's owner.
    #[track_caller]
    pub fn assert_denied(decision: &ActionDecision, owner_name: &str, owner_kind: OwnerKind) {
        match decision {
            ActionDecision::Denied {
                owner_name: name,
                owner_kind: kind,
            } => {
                assert_eq!(name, owner_name, "Wrong owner name in denial");
                assert_eq!(*kind, owner_kind, "Wrong owner kind in denial");
            }
            other => panic!("Expected Denied by {}, got: {:?}", owner_name, other),
        }
    }

    /// Assert that `cells` form one edge-connected group.
    #[track_caller]
    pub fn assert_edge_connected(cells: &[CellKey]) {
        if cells.is_empty() {
            return;
        }
        let mut reached = vec![false; cells.len()];
        let mut frontier = vec![0usize];
        reached[0] = true;
        while let Some(i) = frontier.pop() {
            for (j, other) in cells.iter().enumerate() {
                if !reached[j] && cells[i].is_adjacent(other) {
                    reached[j] = true;
                    frontier.push(j);
                }
            }
        }
        if let Some(j) = reached.iter().position(|r| !r) {
            panic!("Cell {:?} is not connected to {:?}", cells[j], cells[0]);
        }
    }
}

// ============================================================================
// TESTS
// ============================================================================
