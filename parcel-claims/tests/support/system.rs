//! Shared harness for the ownership engine integration tests.
#![allow(dead_code)]

use std::sync::Arc;

use parcel_claims::OwnershipSystem;
use parcel_core::{
    Actor, AuthorityCheck, CellKey, PaidTier, ParcelConfig, ParcelResult, TrustDirectory, Village,
};
use parcel_storage::{MockStore, OwnershipStore};
use parcel_test_utils::{fixtures, init_test_tracing, StaticAuthority, StaticTrustDirectory};

/// A running system plus handles on its collaborators.
pub struct Harness {
    pub store: Arc<MockStore>,
    pub trust: Arc<StaticTrustDirectory>,
    pub authority: Arc<StaticAuthority>,
    pub system: OwnershipSystem,
}

impl Harness {
    /// Start a second system over the same store and collaborators, as after a restart.
    pub fn restarted(&self) -> OwnershipSystem {
        start(
            &self.store,
            self.system.config().clone(),
            &self.trust,
            &self.authority,
        )
        .expect("Failed to restart ownership system")
    }

    /// Claim each cell for `actor`, free slots first, then iron.
    pub fn claim_all(&self, actor: &Actor, cells: &[CellKey]) {
        for cell in cells {
            self.system
                .claim_next(actor, cell, Some(PaidTier::IronIngot), true)
                .expect("Failed to claim fixture cell");
        }
    }

    /// Claim `cells` for `mayor` and found a village on them.
    pub fn found_village(&self, mayor: &Actor, name: &str, cells: &[CellKey]) -> Village {
        self.claim_all(mayor, cells);
        self.system
            .villages()
            .create_village(mayor, name, cells)
            .expect("Failed to create fixture village")
    }
}

fn start(
    store: &Arc<MockStore>,
    config: ParcelConfig,
    trust: &Arc<StaticTrustDirectory>,
    authority: &Arc<StaticAuthority>,
) -> ParcelResult<OwnershipSystem> {
    OwnershipSystem::start(
        Arc::clone(store) as Arc<dyn OwnershipStore>,
        config,
        Arc::clone(trust) as Arc<dyn TrustDirectory>,
        Arc::clone(authority) as Arc<dyn AuthorityCheck>,
    )
}

pub fn harness_with(config: ParcelConfig, store: Arc<MockStore>) -> Harness {
    init_test_tracing();
    let trust = Arc::new(StaticTrustDirectory::new());
    let authority = Arc::new(StaticAuthority::new());
    let system =
        start(&store, config, &trust, &authority).expect("Failed to start ownership system");
    Harness {
        store,
        trust,
        authority,
        system,
    }
}

pub fn harness_with_config(config: ParcelConfig) -> Harness {
    harness_with(config, Arc::new(MockStore::new()))
}

pub fn harness() -> Harness {
    harness_with_config(fixtures::default_config())
}
