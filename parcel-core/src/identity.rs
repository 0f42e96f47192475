//! Identity types for PARCEL entities

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

/// Timestamp type using UTC timezone.
pub type Timestamp = DateTime<Utc>;

/// Common behavior of the strongly-typed UUID identifiers.
pub trait EntityIdType: Copy + Eq + std::hash::Hash + fmt::Display {
    /// Wrap a raw UUID.
    fn new(uuid: Uuid) -> Self;

    /// Unwrap to the raw UUID.
    fn as_uuid(&self) -> Uuid;

    /// Generate a fresh UUIDv7 (timestamp-sortable) identifier.
    fn now_v7() -> Self {
        Self::new(Uuid::now_v7())
    }

    /// The all-zero identifier, used in tests.
    fn nil() -> Self {
        Self::new(Uuid::nil())
    }
}

macro_rules! define_entity_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(Uuid);

        impl EntityIdType for $name {
            fn new(uuid: Uuid) -> Self {
                Self(uuid)
            }

            fn as_uuid(&self) -> Uuid {
                self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}", self.0)
            }
        }

        impl FromStr for $name {
            type Err = uuid::Error;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                Uuid::parse_str(s).map(Self)
            }
        }

        impl From<Uuid> for $name {
            fn from(uuid: Uuid) -> Self {
                Self(uuid)
            }
        }
    };
}

define_entity_id!(
    /// Identifier of a player (an individual actor in the world).
    PlayerId
);

define_entity_id!(
    /// Identifier of a village (a multi-member ownership group).
    VillageId
);

define_entity_id!(
    /// Identifier of an append-only history entry.
    HistoryEntryId
);

/// A player as seen by the ownership engine: identity plus display name.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Actor {
    pub id: PlayerId,
    pub name: String,
}

impl Actor {
    pub fn new(id: PlayerId, name: impl Into<String>) -> Self {
        Self {
            id,
            name: name.into(),
        }
    }
}

impl fmt::Display for Actor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.name, self.id)
    }
}

// ============================================================================
// CELL KEY
// ============================================================================

/// The unit of ownership: one grid cell of one world.
///
/// Ordering is lexicographic on `(world, x, z)`. Multi-cell operations rely on
/// this order to acquire per-cell locks without deadlocking each other.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct CellKey {
    pub world: String,
    pub x: i32,
    pub z: i32,
}

impl CellKey {
    pub fn new(world: impl Into<String>, x: i32, z: i32) -> Self {
        Self {
            world: world.into(),
            x,
            z,
        }
    }

    /// The cell offset by `(dx, dz)` in the same world.
    ///
    /// Returns `None` at the edge of the `i32` coordinate space.
    pub fn offset(&self, dx: i32, dz: i32) -> Option<CellKey> {
        Some(CellKey {
            world: self.world.clone(),
            x: self.x.checked_add(dx)?,
            z: self.z.checked_add(dz)?,
        })
    }

    /// The up-to-four N/S/E/W neighbours of this cell.
    pub fn neighbours(&self) -> impl Iterator<Item = CellKey> + '_ {
        const DIRECTIONS: [(i32, i32); 4] = [(0, 1), (0, -1), (1, 0), (-1, 0)];
        DIRECTIONS
            .iter()
            .filter_map(move |(dx, dz)| self.offset(*dx, *dz))
    }

    /// Whether `other` shares an edge with this cell.
    pub fn is_adjacent(&self, other: &CellKey) -> bool {
        if self.world != other.world {
            return false;
        }
        let dx = (i64::from(self.x) - i64::from(other.x)).abs();
        let dz = (i64::from(self.z) - i64::from(other.z)).abs();
        dx + dz == 1
    }
}

impl fmt::Display for CellKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}({},{})", self.world, self.x, self.z)
    }
}
