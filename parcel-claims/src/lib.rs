//! PARCEL Claims - Ownership Coordination
//!
//! Claim and unclaim under per-cell locks, the in-memory ownership cache,
//! village lifecycle and permissions, and the protection gate consulted on
//! every world action.

pub mod cache;
pub mod claim;
pub mod connectivity;
pub mod cost;
pub mod lock;
pub mod protection;
pub mod system;
pub mod village;

pub use cache::{CacheStats, OwnershipCache};
pub use claim::{AtomicClaimService, Consistency, UnclaimOutcome};
pub use cost::{CostPolicy, Refund};
pub use lock::{KeyedGuard, KeyedLocks};
pub use protection::{
    CapabilityProvider, PersonalTrustProvider, ProtectionGate, VillagePermissionProvider,
};
pub use system::OwnershipSystem;
pub use village::VillageService;
