//! Claim pricing.

use parcel_core::{
    ClaimConfig, ClaimCost, CostKind, CostRejection, PaidTier, ParcelError, ParcelResult,
    RefundPolicy,
};

/// Resources handed back when a paid claim is released.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Refund {
    pub tier: PaidTier,
    pub amount: u32,
}

/// Pure pricing rules. Holds no state besides its configuration.
#[derive(Debug, Clone)]
pub struct CostPolicy {
    config: ClaimConfig,
}

impl CostPolicy {
    pub fn new(config: ClaimConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &ClaimConfig {
        &self.config
    }

    /// Price of the player's next claim given the highest free slot they have ever used.
    ///
    /// Free slots are handed out first, in order, whatever tier was requested.
    pub fn next_cost(
        &self,
        free_high_water: u32,
        requested: Option<PaidTier>,
    ) -> Result<ClaimCost, CostRejection> {
        if free_high_water < self.config.free_claim_quota {
            return Ok(ClaimCost::free(free_high_water + 1));
        }
        match requested {
            Some(tier) => Ok(self.paid_cost(tier)),
            None => Err(CostRejection::NoTierChosenAndFreeExhausted),
        }
    }

    /// Price of a claim paid with `tier`, skipping free slots.
    pub fn paid_cost(&self, tier: PaidTier) -> ClaimCost {
        ClaimCost::paid(tier, self.config.tier_costs.amount_for(tier))
    }

    /// Reject a cost this policy would never have quoted: a free slot past the
    /// quota, or a paid amount that differs from the tier price.
    pub fn check_offered(&self, cost: &ClaimCost) -> Result<(), CostRejection> {
        match (cost.kind, cost.free_slot_index) {
            (CostKind::Free, Some(slot)) if slot > self.config.free_claim_quota => {
                Err(CostRejection::FreeQuotaExceeded {
                    slot,
                    quota: self.config.free_claim_quota,
                })
            }
            (CostKind::Paid(tier), _) => {
                let expected = self.config.tier_costs.amount_for(tier);
                if cost.amount == expected {
                    Ok(())
                } else {
                    Err(CostRejection::PriceMismatch {
                        tier,
                        offered: cost.amount,
                        expected,
                    })
                }
            }
            _ => Ok(()),
        }
    }

    /// Free slots the player has left.
    pub fn free_remaining(&self, free_high_water: u32) -> u32 {
        self.config.free_claim_quota.saturating_sub(free_high_water)
    }

    /// Personal claim cap for this player, if any.
    pub fn claim_limit(&self, is_veteran: bool) -> Option<usize> {
        if is_veteran {
            None
        } else {
            self.config.newcomer_claim_limit
        }
    }

    /// Reject a new personal claim when the player is at their cap.
    pub fn check_claim_limit(&self, current_count: usize, is_veteran: bool) -> ParcelResult<()> {
        match self.claim_limit(is_veteran) {
            Some(limit) if current_count >= limit => Err(ParcelError::ClaimLimitReached {
                current: current_count,
                limit,
            }),
            _ => Ok(()),
        }
    }

    /// What releasing a claim of this cost gives back. Free claims never refund.
    pub fn refund_for(&self, cost: &ClaimCost) -> Option<Refund> {
        let tier = match cost.kind {
            CostKind::Free => return None,
            CostKind::Paid(tier) => tier,
        };
        match self.config.refund {
            RefundPolicy::None => None,
            RefundPolicy::Fraction { percent } => {
                let amount = (u64::from(cost.amount) * u64::from(percent) / 100) as u32;
                (amount > 0).then_some(Refund { tier, amount })
            }
        }
    }
}
