//! Integration tests for atomic claiming, unclaiming and free-slot accounting.

use std::sync::Barrier;

use parcel_claims::{Consistency, Refund};
use parcel_core::{
    Actor, CellKey, ClaimCost, ClaimOwner, CostKind, CostRejection, HistoryAction, PaidTier,
    ParcelError,
};
use parcel_test_utils::{assertions::*, fixtures, generators};
use proptest::prelude::*;

#[path = "support/system.rs"]
mod test_system_support;
use test_system_support::{harness, harness_with, harness_with_config};

// ============================================================================
// CONCURRENCY
// ============================================================================

#[test]
fn test_concurrent_claims_on_one_cell_have_one_winner() {
    let h = harness();
    let cell = fixtures::overworld(10, 20);
    let actors: Vec<Actor> = (0..16).map(|i| fixtures::actor(&format!("Player{}", i))).collect();
    let barrier = Barrier::new(actors.len());

    let results: Vec<_> = std::thread::scope(|s| {
        let handles: Vec<_> = actors
            .iter()
            .map(|actor| {
                let h = &h;
                let cell = &cell;
                let barrier = &barrier;
                s.spawn(move || {
                    barrier.wait();
                    h.system.claims().claim(actor, cell, ClaimCost::free(1))
                })
            })
            .collect();
        handles
            .into_iter()
            .map(|handle| handle.join().expect("claim thread panicked"))
            .collect()
    });

    let winners: Vec<_> = results.iter().filter_map(|r| r.as_ref().ok()).collect();
    assert_eq!(winners.len(), 1, "exactly one claim must win: {:?}", results);
    let winner = winners[0].owner_name.clone();
    for result in results.iter().filter(|r| r.is_err()) {
        assert_conflict(result, &winner);
    }

    let cached = h.system.cache().get_owner(&cell).unwrap();
    assert_eq!(cached.owner_name, winner);
    assert_eq!(
        h.system.claims().verify_consistency(&cell).unwrap(),
        Consistency::InSync
    );
    assert_eq!(h.store.history_len(), 1);
    assert_eq!(h.system.claims().active_locks(), 0);
}

#[test]
fn test_conflict_names_the_first_claimant() {
    let h = harness();
    let a = fixtures::actor("A");
    let b = fixtures::actor("B");
    let cell = CellKey::new("overworld", 10, 20);

    let record = h.system.claim_next(&a, &cell, None, false).unwrap();
    assert_eq!(record.owner, ClaimOwner::Personal(a.id));
    assert_eq!(record.cost, ClaimCost::free(1));

    let result = h.system.claim_next(&b, &cell, None, false);
    assert_conflict(&result, "A");
    // B's failed attempt must not consume B's free slot.
    assert_eq!(h.system.cache().free_slot_high_water(b.id), 0);
}

#[test]
fn test_concurrent_claims_by_one_player_use_contiguous_slots() {
    let h = harness();
    let alice = fixtures::alice();
    let cells = fixtures::row(0, 0, 7);
    let barrier = Barrier::new(cells.len());

    let results: Vec<_> = std::thread::scope(|s| {
        let handles: Vec<_> = cells
            .iter()
            .map(|cell| {
                let h = &h;
                let alice = &alice;
                let barrier = &barrier;
                s.spawn(move || {
                    barrier.wait();
                    h.system.claim_next(alice, cell, None, true)
                })
            })
            .collect();
        handles
            .into_iter()
            .map(|handle| handle.join().expect("claim thread panicked"))
            .collect()
    });

    let mut slots: Vec<u32> = results
        .iter()
        .filter_map(|r| r.as_ref().ok())
        .map(|record| record.cost.free_slot_index.unwrap())
        .collect();
    slots.sort_unstable();
    let expected: Vec<u32> = (1..=slots.len() as u32).collect();
    assert_eq!(slots, expected);
    assert!(slots.len() <= 4);

    for result in results.iter().filter(|r| r.is_err()) {
        assert!(
            matches!(
                result,
                Err(ParcelError::StaleQuote { .. }) | Err(ParcelError::CostRejected(_))
            ),
            "unexpected failure: {:?}",
            result
        );
    }
    assert_eq!(
        h.system.cache().free_slot_high_water(alice.id),
        slots.len() as u32
    );
    assert_eq!(h.system.claims().active_locks(), 0);
}

// ============================================================================
// FREE SLOTS AND PRICING
// ============================================================================

#[test]
fn test_free_slot_is_not_reissued_after_unclaim() {
    let h = harness();
    let alice = fixtures::alice();
    let first = fixtures::overworld(0, 0);

    let record = h.system.claim_next(&alice, &first, None, false).unwrap();
    assert_eq!(record.cost.free_slot_index, Some(1));
    h.system.claims().unclaim(&alice, &first, None).unwrap();

    assert_eq!(
        h.system.claims().quote(alice.id, None).unwrap(),
        ClaimCost::free(2)
    );
    let again = h.system.claim_next(&alice, &first, None, false).unwrap();
    assert_eq!(again.cost.free_slot_index, Some(2));
}

#[test]
fn test_exhausted_quota_requires_a_tier() {
    let h = harness_with_config(fixtures::tight_config(1, None));
    let alice = fixtures::alice();

    h.system
        .claim_next(&alice, &fixtures::overworld(0, 0), None, false)
        .unwrap();
    let result = h.system.claim_next(&alice, &fixtures::overworld(1, 0), None, false);
    assert_cost_rejected(&result);
    assert!(!h.system.cache().is_claimed(&fixtures::overworld(1, 0)));

    let paid = h
        .system
        .claim_next(&alice, &fixtures::overworld(1, 0), Some(PaidTier::Diamond), false)
        .unwrap();
    assert_eq!(paid.cost.kind, CostKind::Paid(PaidTier::Diamond));
    assert_eq!(paid.cost.amount, 8);
    assert_eq!(paid.cost.free_slot_index, None);
    assert_eq!(h.system.cache().free_slot_high_water(alice.id), 1);
}

#[test]
fn test_reused_quote_is_stale() {
    let h = harness();
    let alice = fixtures::alice();
    let quote = h.system.claims().quote(alice.id, None).unwrap();

    h.system
        .claims()
        .claim(&alice, &fixtures::overworld(0, 0), quote)
        .unwrap();
    let result = h.system.claims().claim(&alice, &fixtures::overworld(0, 1), quote);
    assert!(matches!(
        result,
        Err(ParcelError::StaleQuote {
            quoted: 1,
            expected: 2
        })
    ));
}

#[test]
fn test_free_slot_past_quota_is_rejected() {
    let h = harness_with_config(fixtures::tight_config(2, None));
    let alice = fixtures::alice();
    h.claim_all(&alice, &fixtures::row(0, 0, 1));
    assert_cost_rejected(&h.system.claims().quote(alice.id, None));

    let cell = fixtures::overworld(5, 5);
    let result = h.system.claims().claim(&alice, &cell, ClaimCost::free(3));
    assert_eq!(
        result,
        Err(ParcelError::CostRejected(CostRejection::FreeQuotaExceeded {
            slot: 3,
            quota: 2
        }))
    );
    assert_cost_rejected(&h.system.claims().claim(&alice, &cell, ClaimCost::free(4)));
    assert!(!h.system.cache().is_claimed(&cell));
    assert_eq!(h.system.cache().free_slot_high_water(alice.id), 2);
}

#[test]
fn test_underpaid_claims_are_rejected() {
    let h = harness_with_config(fixtures::tight_config(0, None));
    let alice = fixtures::alice();
    let cell = fixtures::overworld(0, 0);

    let result = h
        .system
        .claims()
        .claim(&alice, &cell, ClaimCost::paid(PaidTier::NetheriteIngot, 1));
    assert_eq!(
        result,
        Err(ParcelError::CostRejected(CostRejection::PriceMismatch {
            tier: PaidTier::NetheriteIngot,
            offered: 1,
            expected: 2
        }))
    );
    assert_cost_rejected(&h.system.claims().claim(
        &alice,
        &cell,
        ClaimCost::paid(PaidTier::IronIngot, 65),
    ));
    assert!(!h.system.cache().is_claimed(&cell));
    assert_eq!(h.store.apply_calls(), 0);

    let record = h
        .system
        .claims()
        .claim(&alice, &cell, ClaimCost::paid(PaidTier::NetheriteIngot, 2))
        .unwrap();
    assert_eq!(record.cost.amount, 2);
}

#[test]
fn test_malformed_costs_are_rejected() {
    let h = harness();
    let alice = fixtures::alice();
    let cell = fixtures::overworld(0, 0);

    let zero_paid = ClaimCost::paid(PaidTier::IronIngot, 0);
    assert_validation_error(&h.system.claims().claim(&alice, &cell, zero_paid));
    assert_validation_error(&h.system.claims().claim(&alice, &cell, ClaimCost::free(0)));
    assert!(!h.system.cache().is_claimed(&cell));
    assert_eq!(h.store.apply_calls(), 0);
}

#[test]
fn test_newcomer_limit_applies_until_veteran() {
    let h = harness_with_config(fixtures::tight_config(0, Some(2)));
    let alice = fixtures::alice();
    let iron = Some(PaidTier::IronIngot);

    h.system
        .claim_next(&alice, &fixtures::overworld(0, 0), iron, false)
        .unwrap();
    h.system
        .claim_next(&alice, &fixtures::overworld(0, 1), iron, false)
        .unwrap();
    let result = h
        .system
        .claim_next(&alice, &fixtures::overworld(0, 2), iron, false);
    assert!(matches!(
        result,
        Err(ParcelError::ClaimLimitReached {
            current: 2,
            limit: 2
        })
    ));

    h.system
        .claim_next(&alice, &fixtures::overworld(0, 2), iron, true)
        .unwrap();
    assert_eq!(h.system.cache().count_for_owner(alice.id), 3);
}

// ============================================================================
// UNCLAIM AND HISTORY
// ============================================================================

#[test]
fn test_unclaim_then_reclaim_keeps_full_history() {
    let h = harness();
    let alice = fixtures::alice();
    let bob = fixtures::bob();
    let cell = fixtures::overworld(3, 3);

    h.system.claim_next(&alice, &cell, None, false).unwrap();
    let outcome = h
        .system
        .claims()
        .unclaim(&alice, &cell, Some("moving house".to_string()))
        .unwrap();
    assert_eq!(outcome.record.owner, ClaimOwner::Personal(alice.id));
    assert_eq!(outcome.refund, None);
    h.system.claim_next(&bob, &cell, None, false).unwrap();

    let history = h.system.claims().history(&cell).unwrap();
    let actions: Vec<_> = history.iter().map(|e| e.action).collect();
    assert_eq!(
        actions,
        vec![
            HistoryAction::Claimed,
            HistoryAction::Unclaimed,
            HistoryAction::Claimed
        ]
    );
    assert_eq!(history[1].reason.as_deref(), Some("moving house"));
    assert_eq!(history[1].previous_owner, Some(ClaimOwner::Personal(alice.id)));
    assert_eq!(history[1].new_owner, None);
    assert_eq!(history[2].new_owner, Some(ClaimOwner::Personal(bob.id)));
}

#[test]
fn test_unclaim_by_stranger_is_refused() {
    let h = harness();
    let alice = fixtures::alice();
    let bob = fixtures::bob();
    let cell = fixtures::overworld(0, 0);

    h.system.claim_next(&alice, &cell, None, false).unwrap();
    assert_unauthorized(&h.system.claims().unclaim(&bob, &cell, None));
    assert!(h.system.cache().is_claimed(&cell));
    assert_eq!(h.store.history_len(), 1);
}

#[test]
fn test_unclaim_of_free_cell_is_not_found() {
    let h = harness();
    let result = h
        .system
        .claims()
        .unclaim(&fixtures::alice(), &fixtures::overworld(9, 9), None);
    assert_not_found(&result);
}

#[test]
fn test_elevated_actor_confiscates_without_refund() {
    let h = harness_with_config(fixtures::refunding_config(100));
    let alice = fixtures::alice();
    let admin = fixtures::actor("Admin");
    h.authority.elevate(admin.id);
    let cell = fixtures::overworld(0, 0);

    let cost = h.system.claims().policy().paid_cost(PaidTier::Diamond);
    h.system.claims().claim(&alice, &cell, cost).unwrap();
    let outcome = h
        .system
        .claims()
        .unclaim(&admin, &cell, Some("griefing".to_string()))
        .unwrap();
    assert_eq!(outcome.refund, None);

    let history = h.system.claims().history(&cell).unwrap();
    let last = history.last().unwrap();
    assert_eq!(last.action, HistoryAction::Confiscated);
    assert_eq!(last.actor_id, admin.id);
    assert_eq!(last.reason.as_deref(), Some("griefing"));
}

#[test]
fn test_owner_unclaim_refunds_configured_fraction() {
    let h = harness_with_config(fixtures::refunding_config(50));
    let alice = fixtures::alice();
    let cell = fixtures::overworld(0, 0);

    let cost = h.system.claims().policy().paid_cost(PaidTier::IronIngot);
    h.system.claims().claim(&alice, &cell, cost).unwrap();
    let outcome = h.system.claims().unclaim(&alice, &cell, None).unwrap();
    assert_eq!(
        outcome.refund,
        Some(Refund {
            tier: PaidTier::IronIngot,
            amount: 32
        })
    );
}

// ============================================================================
// PERSISTENCE
// ============================================================================

#[test]
fn test_store_failure_leaves_cache_and_slots_untouched() {
    let h = harness();
    let alice = fixtures::alice();
    let cell = fixtures::overworld(0, 0);

    h.store.fail_all_applies(true);
    assert_persistence_error(&h.system.claim_next(&alice, &cell, None, false));
    assert!(!h.system.cache().is_claimed(&cell));
    assert_eq!(h.system.cache().free_slot_high_water(alice.id), 0);
    assert_eq!(h.system.claims().active_locks(), 0);

    h.store.fail_all_applies(false);
    let record = h.system.claim_next(&alice, &cell, None, false).unwrap();
    assert_eq!(record.cost.free_slot_index, Some(1));
}

#[test]
fn test_failed_unclaim_keeps_the_claim() {
    let h = harness();
    let alice = fixtures::alice();
    let cell = fixtures::overworld(0, 0);
    h.system.claim_next(&alice, &cell, None, false).unwrap();

    h.store.fail_next_apply_at(1);
    assert_persistence_error(&h.system.claims().unclaim(&alice, &cell, None));
    assert!(h.system.cache().is_claimed(&cell));
    assert_eq!(
        h.system.claims().verify_consistency(&cell).unwrap(),
        Consistency::InSync
    );
}

#[test]
fn test_restart_restores_claims_and_free_slot_marks() {
    let h = harness();
    let alice = fixtures::alice();
    h.claim_all(&alice, &fixtures::row(0, 0, 1));
    h.system
        .claims()
        .unclaim(&alice, &fixtures::overworld(1, 0), None)
        .unwrap();

    let restarted = h.restarted();
    assert!(restarted.cache().is_claimed(&fixtures::overworld(0, 0)));
    assert!(!restarted.cache().is_claimed(&fixtures::overworld(1, 0)));
    assert_eq!(restarted.cache().free_slot_high_water(alice.id), 2);
    assert_eq!(
        restarted.claims().quote(alice.id, None).unwrap(),
        ClaimCost::free(3)
    );
}

#[test]
fn test_preexisting_store_claims_conflict() {
    let alice = fixtures::alice();
    let store = fixtures::store_with_free_claims(&alice, &[fixtures::overworld(5, 5)]).unwrap();
    let h = harness_with(fixtures::default_config(), store);

    let result = h
        .system
        .claim_next(&fixtures::bob(), &fixtures::overworld(5, 5), None, false);
    assert_conflict(&result, "Alice");
    assert_eq!(h.system.cache().free_slot_high_water(alice.id), 1);
}

#[test]
fn test_regions_of_splits_disjoint_land() {
    let h = harness();
    let alice = fixtures::alice();
    h.claim_all(
        &alice,
        &[
            fixtures::overworld(0, 0),
            fixtures::overworld(0, 1),
            fixtures::overworld(5, 5),
        ],
    );

    let regions = h.system.regions_of(alice.id);
    assert_eq!(regions.len(), 2);
    assert_eq!(
        regions[0],
        vec![fixtures::overworld(0, 0), fixtures::overworld(0, 1)]
    );
    assert_eq!(regions[1], vec![fixtures::overworld(5, 5)]);
}

// ============================================================================
// PROPERTY TESTS
// ============================================================================

proptest! {
    #![proptest_config(ProptestConfig::with_cases(100))]

    /// Property 1: after any sequence of claims and unclaims by several
    /// players, cache and store agree on every touched cell and history holds
    /// exactly one entry per successful mutation.
    #[test]
    fn prop_cache_matches_store_after_mixed_operations(
        ops in prop::collection::vec((0usize..3, generators::arb_cell_key(), any::<bool>()), 1..40)
    ) {
        let h = harness();
        let players = [fixtures::alice(), fixtures::bob(), fixtures::carol()];
        let mut mutations = 0;

        for (who, cell, claim) in &ops {
            let actor = &players[*who];
            let result = if *claim {
                h.system
                    .claim_next(actor, cell, Some(PaidTier::IronIngot), true)
                    .map(|_| ())
            } else {
                h.system.claims().unclaim(actor, cell, None).map(|_| ())
            };
            if result.is_ok() {
                mutations += 1;
            }
        }

        for (_, cell, _) in &ops {
            prop_assert_eq!(
                h.system.claims().verify_consistency(cell).unwrap(),
                Consistency::InSync
            );
        }
        prop_assert_eq!(h.store.history_len(), mutations);
        prop_assert_eq!(h.system.claims().active_locks(), 0);
    }

    /// Property 2: free slot indices handed to one player never repeat.
    #[test]
    fn prop_free_slots_never_repeat(cells in generators::arb_cell_set(12)) {
        let h = harness();
        let alice = fixtures::alice();
        let mut seen = std::collections::HashSet::new();

        for cell in &cells {
            if let Ok(record) = h.system.claim_next(&alice, cell, Some(PaidTier::Diamond), true) {
                if let Some(slot) = record.cost.free_slot_index {
                    prop_assert!(seen.insert(slot), "slot {} issued twice", slot);
                }
            }
            let _ = h.system.claims().unclaim(&alice, cell, None);
        }
        prop_assert!(seen.len() <= 4);
    }

    /// Property 3: a paid claim goes through only at the configured tier price.
    #[test]
    fn prop_paid_claims_charge_the_tier_price(
        tier in generators::arb_paid_tier(),
        offered in 1u32..100,
    ) {
        let h = harness_with_config(fixtures::tight_config(0, None));
        let alice = fixtures::alice();
        let cell = fixtures::overworld(0, 0);
        let expected = h.system.claims().policy().config().tier_costs.amount_for(tier);

        let result = h.system.claims().claim(&alice, &cell, ClaimCost::paid(tier, offered));
        if offered == expected {
            prop_assert_eq!(result.map(|r| r.cost.amount), Ok(expected));
        } else {
            prop_assert!(matches!(
                result,
                Err(ParcelError::CostRejected(CostRejection::PriceMismatch { .. }))
            ), "expected PriceMismatch rejection");
            prop_assert!(!h.system.cache().is_claimed(&cell));
        }
    }
}
