//! Enum types for PARCEL entities

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Error when parsing an enum from its database string representation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EnumParseError {
    pub type_name: &'static str,
    pub value: String,
}

impl fmt::Display for EnumParseError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Invalid {}: {}", self.type_name, self.value)
    }
}

impl std::error::Error for EnumParseError {}

/// Generates `as_db_str`, `from_db_str`, `ALL`, `Display` and `FromStr` for a
/// fieldless enum. Parsing is case-insensitive.
macro_rules! db_str_enum {
    ($name:ident { $($variant:ident => $text:literal),+ $(,)? }) => {
        impl $name {
            /// Every variant, in declaration order.
            pub const ALL: &'static [$name] = &[$($name::$variant),+];

            /// Convert to database string representation.
            pub fn as_db_str(&self) -> &'static str {
                match self {
                    $($name::$variant => $text),+
                }
            }

            /// Parse from database string representation.
            pub fn from_db_str(s: &str) -> Result<Self, EnumParseError> {
                $(
                    if s.eq_ignore_ascii_case($text) {
                        return Ok($name::$variant);
                    }
                )+
                Err(EnumParseError {
                    type_name: stringify!($name),
                    value: s.to_string(),
                })
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}", self.as_db_str())
            }
        }

        impl FromStr for $name {
            type Err = EnumParseError;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                Self::from_db_str(s)
            }
        }
    };
}

// ============================================================================
// OWNERSHIP
// ============================================================================

/// Whether a claim belongs to one player or to a village.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum OwnerKind {
    Personal,
    Village,
}

db_str_enum!(OwnerKind {
    Personal => "PERSONAL",
    Village => "VILLAGE",
});

/// Paid claim tiers, each priced in a fixed quantity of one fungible resource.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum PaidTier {
    IronIngot,
    Diamond,
    NetheriteIngot,
}

db_str_enum!(PaidTier {
    IronIngot => "IRON_INGOT",
    Diamond => "DIAMOND",
    NetheriteIngot => "NETHERITE_INGOT",
});

/// What a claim was paid with.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum CostKind {
    /// Granted from the player's free-slot quota.
    Free,
    /// Paid with a resource tier.
    Paid(PaidTier),
}

impl CostKind {
    pub fn as_db_str(&self) -> &'static str {
        match self {
            CostKind::Free => "FREE",
            CostKind::Paid(tier) => tier.as_db_str(),
        }
    }

    pub fn from_db_str(s: &str) -> Result<Self, EnumParseError> {
        if s.eq_ignore_ascii_case("FREE") {
            return Ok(CostKind::Free);
        }
        PaidTier::from_db_str(s)
            .map(CostKind::Paid)
            .map_err(|_| EnumParseError {
                type_name: "CostKind",
                value: s.to_string(),
            })
    }

    pub fn is_free(&self) -> bool {
        matches!(self, CostKind::Free)
    }
}

impl fmt::Display for CostKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_db_str())
    }
}

/// Kind of mutation recorded in the claim history.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum HistoryAction {
    /// A cell gained an owner.
    Claimed,
    /// The owner (or village land manager) released a cell.
    Unclaimed,
    /// Elevated authority removed someone else's claim.
    Confiscated,
    /// The claim was re-keyed to a different owner without leaving the claimed state.
    Transferred,
}

db_str_enum!(HistoryAction {
    Claimed => "CLAIMED",
    Unclaimed => "UNCLAIMED",
    Confiscated => "CONFISCATED",
    Transferred => "TRANSFERRED",
});

// ============================================================================
// VILLAGES
// ============================================================================

/// Role of a member inside a village.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum VillageRole {
    Mayor,
    DeputyMayor,
    Member,
}

db_str_enum!(VillageRole {
    Mayor => "MAYOR",
    DeputyMayor => "DEPUTY_MAYOR",
    Member => "MEMBER",
});

/// Capabilities that can be granted to village members.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum VillageCapability {
    Build,
    BreakBlocks,
    UseContainers,
    UseRedstone,
    InviteMembers,
    KickMembers,
    ManageLand,
    ExpandLand,
    ReduceLand,
    ManageRoles,
    ManagePermissions,
    RenameVillage,
    DissolveVillage,
}

db_str_enum!(VillageCapability {
    Build => "BUILD",
    BreakBlocks => "BREAK_BLOCKS",
    UseContainers => "USE_CONTAINERS",
    UseRedstone => "USE_REDSTONE",
    InviteMembers => "INVITE_MEMBERS",
    KickMembers => "KICK_MEMBERS",
    ManageLand => "MANAGE_LAND",
    ExpandLand => "EXPAND_LAND",
    ReduceLand => "REDUCE_LAND",
    ManageRoles => "MANAGE_ROLES",
    ManagePermissions => "MANAGE_PERMISSIONS",
    RenameVillage => "RENAME_VILLAGE",
    DissolveVillage => "DISSOLVE_VILLAGE",
});

impl VillageCapability {
    /// Capabilities only the mayor may grant or revoke.
    pub fn is_mayor_only_grant(&self) -> bool {
        matches!(
            self,
            VillageCapability::KickMembers
                | VillageCapability::ManageRoles
                | VillageCapability::ExpandLand
                | VillageCapability::ReduceLand
                | VillageCapability::ManagePermissions
                | VillageCapability::RenameVillage
                | VillageCapability::DissolveVillage
        )
    }
}

// ============================================================================
// WORLD ACTIONS
// ============================================================================

/// A world mutation attempt that the protection gate authorizes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum WorldAction {
    Build,
    BreakBlock,
    UseContainer,
    UseRedstone,
}

db_str_enum!(WorldAction {
    Build => "BUILD",
    BreakBlock => "BREAK_BLOCK",
    UseContainer => "USE_CONTAINER",
    UseRedstone => "USE_REDSTONE",
});

impl WorldAction {
    /// The village capability required to perform this action on village land.
    pub fn required_capability(&self) -> VillageCapability {
        match self {
            WorldAction::Build => VillageCapability::Build,
            WorldAction::BreakBlock => VillageCapability::BreakBlocks,
            WorldAction::UseContainer => VillageCapability::UseContainers,
            WorldAction::UseRedstone => VillageCapability::UseRedstone,
        }
    }
}
