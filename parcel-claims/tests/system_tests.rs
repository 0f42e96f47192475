//! End-to-end tests for starting, configuring and stopping the ownership system.

use std::sync::Arc;

use parcel_claims::OwnershipSystem;
use parcel_core::{
    ClaimOwner, EntityIdType, NoAuthority, NoTrust, PaidTier, ParcelConfig, RefundPolicy,
    VillageId, WorldAction,
};
use parcel_storage::{MockStore, OwnershipStore, StoreBatch, StoreOp};
use parcel_test_utils::{assertions::*, fixtures, init_test_tracing};

#[path = "support/system.rs"]
mod test_system_support;
use test_system_support::{harness, harness_with_config};

fn start(
    store: Arc<MockStore>,
    config: ParcelConfig,
) -> parcel_core::ParcelResult<OwnershipSystem> {
    OwnershipSystem::start(store, config, Arc::new(NoTrust), Arc::new(NoAuthority))
}

#[test]
fn test_start_from_toml() {
    init_test_tracing();
    let config = ParcelConfig::from_toml_str(
        r#"
        [claims]
        free_claim_quota = 1
        newcomer_claim_limit = 3

        [claims.tier_costs]
        diamond = 5

        [claims.refund]
        mode = "fraction"
        percent = 25

        [villages]
        name_min_len = 4
        "#,
    )
    .unwrap();
    assert_eq!(config.claims.tier_costs.diamond, 5);
    assert_eq!(config.claims.tier_costs.iron_ingot, 64);
    assert_eq!(config.claims.refund, RefundPolicy::Fraction { percent: 25 });

    let h = harness_with_config(config);
    let alice = fixtures::alice();
    h.system
        .claim_next(&alice, &fixtures::overworld(0, 0), None, false)
        .unwrap();
    let paid = h
        .system
        .claim_next(&alice, &fixtures::overworld(0, 1), Some(PaidTier::Diamond), false)
        .unwrap();
    assert_eq!(paid.cost.amount, 5);

    let outcome = h
        .system
        .claims()
        .unclaim(&alice, &fixtures::overworld(0, 1), None)
        .unwrap();
    assert_eq!(outcome.refund.map(|r| r.amount), Some(1));

    assert_validation_error(&h.system.villages().create_village(
        &alice,
        "Oak",
        &[fixtures::overworld(0, 0)],
    ));
}

#[test]
fn test_start_rejects_invalid_config() {
    let mut config = fixtures::default_config();
    config.claims.refund = RefundPolicy::Fraction { percent: 150 };
    assert_config_error(&start(Arc::new(MockStore::new()), config));

    let mut config = fixtures::default_config();
    config.villages.name_min_len = 10;
    config.villages.name_max_len = 5;
    assert_config_error(&start(Arc::new(MockStore::new()), config));

    assert_config_error(&ParcelConfig::from_toml_str("[claims]\nfree_claim_quota = \"four\""));
}

#[test]
fn test_start_loads_existing_state() {
    let alice = fixtures::alice();
    let store = fixtures::store_with_free_claims(&alice, &fixtures::row(0, 0, 3)).unwrap();
    let bought = fixtures::overworld(0, 1);
    store
        .seed_claim(fixtures::paid_claim(&alice, bought.clone(), PaidTier::Diamond, 8))
        .unwrap();
    let system = start(store, fixtures::refunding_config(50)).unwrap();

    let stats = system.stats();
    assert_eq!(stats.cells, 5);
    assert_eq!(stats.players, 1);
    assert_eq!(stats.villages, 0);
    assert_cost_rejected(&system.claims().quote(alice.id, None));

    let outcome = system.claims().unclaim(&alice, &bought, None).unwrap();
    assert_eq!(outcome.refund.map(|r| (r.tier, r.amount)), Some((PaidTier::Diamond, 4)));
}

#[test]
fn test_start_tolerates_orphaned_village_land() {
    let store = Arc::new(MockStore::new());
    let ghost = VillageId::now_v7();
    let record = parcel_core::ClaimRecord::new(
        fixtures::overworld(0, 0),
        ClaimOwner::Village(ghost),
        "Ghost Town",
        parcel_core::ClaimCost::paid(PaidTier::IronIngot, 64),
    );
    store
        .apply(StoreBatch::new().with(StoreOp::InsertClaim(record)))
        .unwrap();

    let system = start(store, fixtures::default_config()).unwrap();
    assert_eq!(system.stats().villages, 1);
    assert!(system.villages().village(ghost).is_none());
    assert_denied(
        &system.is_action_allowed(
            &fixtures::overworld(0, 0),
            fixtures::alice().id,
            WorldAction::Build,
        ),
        "Ghost Town",
        parcel_core::OwnerKind::Village,
    );
}

#[test]
fn test_shutdown_leaves_store_intact() {
    let h = harness();
    let alice = fixtures::alice();
    h.claim_all(&alice, &fixtures::row(0, 0, 1));
    let cache = Arc::clone(h.system.cache());
    let store = Arc::clone(&h.store);
    h.system.shutdown();

    assert_eq!(cache.stats().cells, 0);
    assert_eq!(store.claim_count(), 2);
    assert!(store.claim_get(&fixtures::overworld(0, 0)).unwrap().is_some());
}

#[test]
fn test_end_to_end_claim_found_and_protect() {
    let h = harness();
    let a = fixtures::actor("A");
    let b = fixtures::actor("B");
    let home = fixtures::overworld(10, 20);

    let record = h.system.claim_next(&a, &home, None, false).unwrap();
    assert_eq!(record.cost.free_slot_index, Some(1));
    assert_conflict(&h.system.claim_next(&b, &home, None, false), "A");

    h.claim_all(&a, &[fixtures::overworld(11, 20)]);
    let village = h
        .system
        .villages()
        .create_village(&a, "Riverside", &[home.clone(), fixtures::overworld(11, 20)])
        .unwrap();
    h.system
        .villages()
        .add_member(&a, village.village_id, &b)
        .unwrap();
    assert!(!h.system.is_action_allowed(&home, b.id, WorldAction::Build).is_allowed());
    h.system
        .villages()
        .grant_permission(&a, village.village_id, b.id, parcel_core::VillageCapability::Build)
        .unwrap();
    assert_allowed(&h.system.is_action_allowed(&home, b.id, WorldAction::Build));
    assert_eq!(h.system.village_regions(village.village_id).len(), 1);
    assert_eq!(h.system.claims().active_locks(), 0);
}
