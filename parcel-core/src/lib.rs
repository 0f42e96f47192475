//! PARCEL Core - Entity Types
//!
//! Pure data structures for the land ownership engine. All other crates depend on this.
//! Business logic (locking, caching, village rules) lives in `parcel-claims`.

pub mod collaborators;
pub mod config;
pub mod entities;
pub mod enums;
pub mod error;
pub mod identity;

pub use collaborators::{AuthorityCheck, NoAuthority, NoTrust, TrustDirectory};
pub use config::{ClaimConfig, ParcelConfig, RefundPolicy, TierCosts, VillageConfig};
pub use entities::{
    ClaimCost, ClaimOwner, ClaimRecord, HistoryEntry, MemberPermission, Membership, Village,
};
pub use enums::{
    CostKind, EnumParseError, HistoryAction, OwnerKind, PaidTier, VillageCapability, VillageRole,
    WorldAction,
};
pub use error::{
    ActionDecision, ConfigError, CostRejection, ParcelError, ParcelResult, StorageError,
    ValidationError,
};
pub use identity::{Actor, CellKey, EntityIdType, HistoryEntryId, PlayerId, Timestamp, VillageId};

// ============================================================================
// PROPERTY TESTS
// ============================================================================
