//! Boundaries to systems the ownership engine consumes but does not own.

use crate::PlayerId;

/// Personal trust relationships ("friends") between players.
///
/// Consulted by the protection gate for personally owned land. Must be cheap:
/// it is called on the world-action hot path.
pub trait TrustDirectory: Send + Sync {
    /// Whether `owner` lets `visitor` act on the owner's personal land.
    fn is_trusted(&self, owner: PlayerId, visitor: PlayerId) -> bool;
}

/// Elevated authority (server administrators).
pub trait AuthorityCheck: Send + Sync {
    /// Whether `actor` bypasses ownership checks and may confiscate claims.
    fn is_elevated(&self, actor: PlayerId) -> bool;
}

/// A trust directory in which nobody trusts anybody.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoTrust;

impl TrustDirectory for NoTrust {
    fn is_trusted(&self, _owner: PlayerId, _visitor: PlayerId) -> bool {
        false
    }
}

/// An authority check under which nobody is elevated.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoAuthority;

impl AuthorityCheck for NoAuthority {
    fn is_elevated(&self, _actor: PlayerId) -> bool {
        false
    }
}
