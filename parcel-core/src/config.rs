//! Configuration types

use crate::{ConfigError, PaidTier, ParcelError, ParcelResult};
use serde::{Deserialize, Serialize};

/// What an unclaim hands back to the former owner.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "mode", rename_all = "snake_case")]
pub enum RefundPolicy {
    /// Nothing is refunded.
    None,
    /// `percent` of the paid amount, rounded down. Free claims never refund.
    Fraction { percent: u8 },
}

impl Default for RefundPolicy {
    fn default() -> Self {
        RefundPolicy::None
    }
}

/// Resource quantity charged for each paid tier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TierCosts {
    pub iron_ingot: u32,
    pub diamond: u32,
    pub netherite_ingot: u32,
}

impl Default for TierCosts {
    fn default() -> Self {
        Self {
            iron_ingot: 64,
            diamond: 8,
            netherite_ingot: 2,
        }
    }
}

impl TierCosts {
    pub fn amount_for(&self, tier: PaidTier) -> u32 {
        match tier {
            PaidTier::IronIngot => self.iron_ingot,
            PaidTier::Diamond => self.diamond,
            PaidTier::NetheriteIngot => self.netherite_ingot,
        }
    }
}

/// Claim pricing and limits.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ClaimConfig {
    /// Number of free claims each player gets over their lifetime.
    pub free_claim_quota: u32,
    /// Personal claim cap for players who are not yet veterans. `None` disables the cap.
    pub newcomer_claim_limit: Option<usize>,
    pub tier_costs: TierCosts,
    pub refund: RefundPolicy,
}

impl Default for ClaimConfig {
    fn default() -> Self {
        Self {
            free_claim_quota: 4,
            newcomer_claim_limit: Some(9),
            tier_costs: TierCosts::default(),
            refund: RefundPolicy::None,
        }
    }
}

/// Village naming rules.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct VillageConfig {
    pub name_min_len: usize,
    pub name_max_len: usize,
}

impl Default for VillageConfig {
    fn default() -> Self {
        Self {
            name_min_len: 3,
            name_max_len: 32,
        }
    }
}

/// Top-level configuration for the ownership engine.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ParcelConfig {
    pub claims: ClaimConfig,
    pub villages: VillageConfig,
}

impl ParcelConfig {
    /// Parse from TOML. Missing fields take their defaults. The result is validated.
    pub fn from_toml_str(input: &str) -> ParcelResult<Self> {
        let config: ParcelConfig = toml::from_str(input).map_err(|e| ConfigError::Parse {
            reason: e.to_string(),
        })?;
        config.validate()?;
        Ok(config)
    }

    /// Validate the configuration.
    ///
    /// Validates:
    /// - every tier amount > 0
    /// - refund percent <= 100
    /// - 0 < name_min_len <= name_max_len
    /// - newcomer_claim_limit, when set, is > 0
    ///
    /// A zero free quota is allowed and means every claim is paid.
    pub fn validate(&self) -> ParcelResult<()> {
        let tiers = &self.claims.tier_costs;
        for (field, amount) in [
            ("claims.tier_costs.iron_ingot", tiers.iron_ingot),
            ("claims.tier_costs.diamond", tiers.diamond),
            ("claims.tier_costs.netherite_ingot", tiers.netherite_ingot),
        ] {
            if amount == 0 {
                return Err(invalid(field, amount, "tier amount must be greater than 0"));
            }
        }

        if let RefundPolicy::Fraction { percent } = self.claims.refund {
            if percent > 100 {
                return Err(invalid(
                    "claims.refund.percent",
                    percent,
                    "refund percent must be between 0 and 100",
                ));
            }
        }

        if self.claims.newcomer_claim_limit == Some(0) {
            return Err(invalid(
                "claims.newcomer_claim_limit",
                0,
                "newcomer_claim_limit must be greater than 0 when set",
            ));
        }

        let villages = &self.villages;
        if villages.name_min_len == 0 {
            return Err(invalid(
                "villages.name_min_len",
                0,
                "name_min_len must be greater than 0",
            ));
        }
        if villages.name_min_len > villages.name_max_len {
            return Err(invalid(
                "villages.name_max_len",
                villages.name_max_len,
                "name_max_len must be at least name_min_len",
            ));
        }

        Ok(())
    }
}

fn invalid(field: &str, value: impl ToString, reason: &str) -> ParcelError {
    ParcelError::Config(ConfigError::InvalidValue {
        field: field.to_string(),
        value: value.to_string(),
        reason: reason.to_string(),
    })
}
