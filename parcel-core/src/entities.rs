//! Core entity structures

use crate::{
    Actor, CellKey, CostKind, EntityIdType, HistoryAction, HistoryEntryId, OwnerKind, PaidTier,
    PlayerId, Timestamp, ValidationError, VillageCapability, VillageId, VillageRole,
};
use chrono::Utc;
use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::fmt;

// ============================================================================
// CLAIMS
// ============================================================================

/// Who owns a claimed cell.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "kind", content = "id")]
pub enum ClaimOwner {
    Personal(PlayerId),
    Village(VillageId),
}

impl ClaimOwner {
    pub fn owner_kind(&self) -> OwnerKind {
        match self {
            ClaimOwner::Personal(_) => OwnerKind::Personal,
            ClaimOwner::Village(_) => OwnerKind::Village,
        }
    }

    pub fn player(&self) -> Option<PlayerId> {
        match self {
            ClaimOwner::Personal(id) => Some(*id),
            ClaimOwner::Village(_) => None,
        }
    }

    pub fn village(&self) -> Option<VillageId> {
        match self {
            ClaimOwner::Village(id) => Some(*id),
            ClaimOwner::Personal(_) => None,
        }
    }

    pub fn is_player(&self, player: PlayerId) -> bool {
        self.player() == Some(player)
    }
}

impl fmt::Display for ClaimOwner {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ClaimOwner::Personal(id) => write!(f, "player:{}", id),
            ClaimOwner::Village(id) => write!(f, "village:{}", id),
        }
    }
}

/// Price paid for a claim.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ClaimCost {
    pub kind: CostKind,
    pub amount: u32,
    /// 1-based free slot consumed by this claim. Only set for `CostKind::Free`.
    pub free_slot_index: Option<u32>,
}

impl ClaimCost {
    pub fn free(slot_index: u32) -> Self {
        Self {
            kind: CostKind::Free,
            amount: 0,
            free_slot_index: Some(slot_index),
        }
    }

    pub fn paid(tier: PaidTier, amount: u32) -> Self {
        Self {
            kind: CostKind::Paid(tier),
            amount,
            free_slot_index: None,
        }
    }

    pub fn is_free(&self) -> bool {
        self.kind.is_free()
    }
}

/// One active claim. At most one exists per cell.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClaimRecord {
    pub cell: CellKey,
    pub owner: ClaimOwner,
    pub owner_name: String,
    pub created_at: Timestamp,
    pub updated_at: Timestamp,
    pub cost: ClaimCost,
}

impl ClaimRecord {
    pub fn new(
        cell: CellKey,
        owner: ClaimOwner,
        owner_name: impl Into<String>,
        cost: ClaimCost,
    ) -> Self {
        let now = Utc::now();
        Self {
            cell,
            owner,
            owner_name: owner_name.into(),
            created_at: now,
            updated_at: now,
            cost,
        }
    }

    pub fn owner_kind(&self) -> OwnerKind {
        self.owner.owner_kind()
    }

    /// Same claim re-keyed to a new owner. Cost and creation time carry over.
    pub fn rekeyed(&self, owner: ClaimOwner, owner_name: impl Into<String>) -> Self {
        Self {
            cell: self.cell.clone(),
            owner,
            owner_name: owner_name.into(),
            created_at: self.created_at,
            updated_at: Utc::now(),
            cost: self.cost,
        }
    }
}

/// Append-only audit entry. One is written for every claim record mutation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HistoryEntry {
    pub entry_id: HistoryEntryId,
    pub cell: CellKey,
    pub previous_owner: Option<ClaimOwner>,
    pub new_owner: Option<ClaimOwner>,
    pub actor_id: PlayerId,
    pub action: HistoryAction,
    pub reason: Option<String>,
    pub timestamp: Timestamp,
}

impl HistoryEntry {
    pub fn claimed(record: &ClaimRecord, actor: &Actor) -> Self {
        Self::build(&record.cell, None, Some(record.owner), actor.id, HistoryAction::Claimed, None)
    }

    pub fn removed(
        record: &ClaimRecord,
        actor: &Actor,
        action: HistoryAction,
        reason: Option<String>,
    ) -> Self {
        Self::build(&record.cell, Some(record.owner), None, actor.id, action, reason)
    }

    pub fn transferred(
        before: &ClaimRecord,
        after: &ClaimRecord,
        actor: &Actor,
        reason: impl Into<String>,
    ) -> Self {
        Self::build(
            &before.cell,
            Some(before.owner),
            Some(after.owner),
            actor.id,
            HistoryAction::Transferred,
            Some(reason.into()),
        )
    }

    fn build(
        cell: &CellKey,
        previous_owner: Option<ClaimOwner>,
        new_owner: Option<ClaimOwner>,
        actor_id: PlayerId,
        action: HistoryAction,
        reason: Option<String>,
    ) -> Self {
        Self {
            entry_id: HistoryEntryId::now_v7(),
            cell: cell.clone(),
            previous_owner,
            new_owner,
            actor_id,
            action,
            reason,
            timestamp: Utc::now(),
        }
    }
}

// ============================================================================
// VILLAGES
// ============================================================================

static VILLAGE_NAME_PATTERN: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[A-Za-z0-9][A-Za-z0-9 _'-]*$").expect("Invalid village name regex"));

/// A multi-member ownership group.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Village {
    pub village_id: VillageId,
    pub name: String,
    pub mayor_id: PlayerId,
    pub created_at: Timestamp,
    pub updated_at: Timestamp,
    pub active: bool,
}

impl Village {
    pub fn new(name: impl Into<String>, mayor_id: PlayerId) -> Self {
        let now = Utc::now();
        Self {
            village_id: VillageId::now_v7(),
            name: name.into(),
            mayor_id,
            created_at: now,
            updated_at: now,
            active: true,
        }
    }

    /// Check a proposed village name against length bounds and the allowed character set.
    ///
    /// Leading and trailing whitespace is rejected rather than trimmed.
    pub fn validate_name(
        name: &str,
        min_len: usize,
        max_len: usize,
    ) -> Result<(), ValidationError> {
        if name.is_empty() {
            return Err(ValidationError::RequiredFieldMissing {
                field: "name".to_string(),
            });
        }
        let len = name.chars().count();
        if len < min_len || len > max_len {
            return Err(ValidationError::InvalidValue {
                field: "name".to_string(),
                reason: format!(
                    "must be between {} and {} characters, got {}",
                    min_len, max_len, len
                ),
            });
        }
        if name.trim() != name || !VILLAGE_NAME_PATTERN.is_match(name) {
            return Err(ValidationError::InvalidValue {
                field: "name".to_string(),
                reason: "may only contain letters, digits, spaces, '_', '-' and '\''".to_string(),
            });
        }
        Ok(())
    }

    /// Key used for case-insensitive name uniqueness.
    pub fn name_key(name: &str) -> String {
        name.to_lowercase()
    }
}

/// A player's place in a village.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Membership {
    pub village_id: VillageId,
    pub member_id: PlayerId,
    pub member_name: String,
    pub role: VillageRole,
    pub joined_at: Timestamp,
    pub last_seen_at: Timestamp,
    pub active: bool,
}

impl Membership {
    pub fn new(village_id: VillageId, member: &Actor, role: VillageRole) -> Self {
        let now = Utc::now();
        Self {
            village_id,
            member_id: member.id,
            member_name: member.name.clone(),
            role,
            joined_at: now,
            last_seen_at: now,
            active: true,
        }
    }

    pub fn with_role(&self, role: VillageRole) -> Self {
        Self {
            role,
            ..self.clone()
        }
    }

    pub fn is_mayor(&self) -> bool {
        self.role == VillageRole::Mayor
    }
}

/// An explicit capability grant to a village member.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MemberPermission {
    pub village_id: VillageId,
    pub member_id: PlayerId,
    pub capability: VillageCapability,
    pub granted_by: PlayerId,
    pub granted_at: Timestamp,
}

impl MemberPermission {
    pub fn new(
        village_id: VillageId,
        member_id: PlayerId,
        capability: VillageCapability,
        granted_by: PlayerId,
    ) -> Self {
        Self {
            village_id,
            member_id,
            capability,
            granted_by,
            granted_at: Utc::now(),
        }
    }
}
