// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2025 Daniel Negri
//
// This program is free software: you can redistribute it and/or modify
// it under the terms of the GNU Affero General Public License as published by
// the Free Software Foundation, either version 3 of the License, or
// (at your option) any later version.
//
// This program is distributed in the hope that it will be useful,
// but WITHOUT ANY WARRANTY; without even the implied warranty of
// MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE. See the
// GNU Affero General Public License for more details.
//
// You should have received a copy of the GNU Affero General Public License
// along with this program. If not, see <https://www.gnu.org/licenses/>.

//! Pricing and promotion engine.
//!
//! Prices come from the single system configuration row, which an admin
//! collaborator may change at any time. The engine re-reads the row for every
//! pricing decision and never treats a cached copy as authoritative.
//!
//! # Example
//!
//! ```
//! use paywall_ledger::pricing::{Promotion, SystemConfig};
//! use rust_decimal_macros::dec;
//! use chrono::Utc;
//!
//! let promotion = Promotion {
//!     code: "SAVE20".to_string(),
//!     discount_percent: dec!(20),
//!     enabled: true,
//!     valid_until: None,
//!     max_uses: 0,
//!     current_uses: 0,
//! };
//! assert!(promotion.check("save20", Utc::now()).is_ok());
//! ```

pub use crate::error::PromoRejection;

use crate::error::{StoreError, ValidationError};
use crate::store::SystemConfigRepository;
use crate::transaction::Transaction;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{debug, info, warn};

/// The single active promotional code.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Promotion {
    #[serde(default)]
    pub code: String,
    #[serde(default)]
    pub discount_percent: Decimal,
    #[serde(default)]
    pub enabled: bool,
    #[serde(default)]
    pub valid_until: Option<DateTime<Utc>>,
    /// 0 means unlimited.
    #[serde(default)]
    pub max_uses: u32,
    #[serde(default)]
    pub current_uses: u32,
}

impl Promotion {
    /// Checks a supplied code against this promotion at `now`.
    pub fn check(&self, code: &str, now: DateTime<Utc>) -> Result<(), PromoRejection> {
        if !self.enabled {
            return Err(PromoRejection::Disabled);
        }
        if self.code.is_empty() || !code.trim().eq_ignore_ascii_case(self.code.trim()) {
            return Err(PromoRejection::UnknownCode);
        }
        if let Some(valid_until) = self.valid_until {
            if now > valid_until {
                return Err(PromoRejection::Expired);
            }
        }
        if self.max_uses > 0 && self.current_uses >= self.max_uses {
            return Err(PromoRejection::Exhausted);
        }
        Ok(())
    }

    /// Percent clamped to `[0, 100]`.
    pub fn effective_percent(&self) -> Decimal {
        self.discount_percent.clamp(Decimal::ZERO, Decimal::ONE_HUNDRED)
    }
}

impl Default for Promotion {
    fn default() -> Self {
        Self {
            code: String::new(),
            discount_percent: Decimal::ZERO,
            enabled: false,
            valid_until: None,
            max_uses: 0,
            current_uses: 0,
        }
    }
}

/// The effective pricing row.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SystemConfig {
    #[serde(default = "default_price_per_unit")]
    pub price_per_unit: Decimal,
    #[serde(default = "default_payment_enabled")]
    pub payment_enabled: bool,
    #[serde(default = "default_max_batch_size")]
    pub max_batch_size: u32,
    #[serde(default)]
    pub promotion: Promotion,
}

fn default_price_per_unit() -> Decimal {
    dec!(1.0)
}

const fn default_payment_enabled() -> bool {
    true
}

const fn default_max_batch_size() -> u32 {
    50
}

impl Default for SystemConfig {
    fn default() -> Self {
        Self {
            price_per_unit: default_price_per_unit(),
            payment_enabled: default_payment_enabled(),
            max_batch_size: default_max_batch_size(),
            promotion: Promotion::default(),
        }
    }
}

impl SystemConfig {
    /// Per-unit price, or zero while payments are switched off.
    pub fn unit_price(&self) -> Decimal {
        if self.payment_enabled {
            self.price_per_unit
        } else {
            Decimal::ZERO
        }
    }
}

/// Price of a batch, with the discount provenance fixed at quote time.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Quote {
    pub unit_price: Decimal,
    pub count: u32,
    pub original_amount: Decimal,
    pub discount_amount: Decimal,
    pub final_amount: Decimal,
    pub discount_percent: Decimal,
    /// Code actually applied, if any.
    pub promo_code: Option<String>,
    /// Why a supplied code was not applied.
    #[serde(skip)]
    pub promo_rejection: Option<PromoRejection>,
}

impl Quote {
    /// Full-price quote with no promotion.
    pub fn full_price(unit_price: Decimal, count: u32) -> Self {
        let original_amount = unit_price * Decimal::from(count);
        Self {
            unit_price,
            count,
            original_amount,
            discount_amount: Decimal::ZERO,
            final_amount: original_amount,
            discount_percent: Decimal::ZERO,
            promo_code: None,
            promo_rejection: None,
        }
    }

    /// Applies a percentage discount. No rounding happens here.
    fn with_discount(mut self, code: String, percent: Decimal) -> Self {
        self.final_amount =
            self.original_amount * (Decimal::ONE_HUNDRED - percent) / Decimal::ONE_HUNDRED;
        self.discount_amount = self.original_amount - self.final_amount;
        self.discount_percent = percent;
        self.promo_code = Some(code);
        self
    }

    /// Whether the batch can skip the gateway.
    pub fn is_free(&self) -> bool {
        self.final_amount <= Decimal::ZERO
    }
}

/// Reporting view of the active promotion.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PromotionInfo {
    pub code: String,
    pub discount_percent: Decimal,
    pub valid_until: Option<DateTime<Utc>>,
    pub max_uses: u32,
    pub current_uses: u32,
    /// `None` when uses are unlimited.
    pub remaining_uses: Option<u32>,
}

/// Computes charges and owns promotion validation and redemption.
pub struct PricingEngine {
    config: Arc<dyn SystemConfigRepository>,
}

impl PricingEngine {
    pub fn new(config: Arc<dyn SystemConfigRepository>) -> Self {
        Self { config }
    }

    /// Per-unit price from a fresh read of the configuration row.
    pub async fn current_unit_price(&self) -> Result<Decimal, StoreError> {
        Ok(self.config.load().await?.unit_price())
    }

    /// Rejects a batch over the configured maximum.
    pub async fn check_batch_size(&self, count: usize) -> Result<(), ValidationError> {
        let max = match self.config.load().await {
            Ok(config) => config.max_batch_size,
            Err(e) => {
                warn!(error = %e, "config unavailable, using default batch limit");
                default_max_batch_size()
            }
        };
        if count > max as usize {
            return Err(ValidationError::BatchTooLarge {
                requested: count,
                max,
            });
        }
        Ok(())
    }

    /// Prices `count` units, applying `promo_code` only if it validates.
    ///
    /// A rejected code never blocks the quote: the result is at full price
    /// with the rejection attached.
    pub async fn quote(&self, unit_price: Decimal, count: u32, promo_code: Option<&str>) -> Quote {
        let quote = Quote::full_price(unit_price, count);

        let Some(code) = promo_code.map(str::trim).filter(|c| !c.is_empty()) else {
            return quote;
        };
        if quote.original_amount <= Decimal::ZERO {
            debug!(code, "nothing to discount, promotion not applied");
            return quote;
        }

        match self.validate_promo(code).await {
            Ok(promotion) => {
                let percent = promotion.effective_percent();
                debug!(code, %percent, "applying promotion");
                quote.with_discount(promotion.code, percent)
            }
            Err(rejection) => {
                info!(code, reason = %rejection, "promotional code rejected, quoting full price");
                Quote {
                    promo_rejection: Some(rejection),
                    ..quote
                }
            }
        }
    }

    /// Validates a code against the active promotion as of now.
    pub async fn validate_promo(&self, code: &str) -> Result<Promotion, PromoRejection> {
        let config = self
            .config
            .load()
            .await
            .map_err(|e| PromoRejection::Unavailable(e.to_string()))?;
        config.promotion.check(code, Utc::now())?;
        Ok(config.promotion)
    }

    /// Counts one use of the promotion a completed transaction applied.
    ///
    /// Returns `Ok(false)` when nothing was counted: the transaction is not
    /// completed, carries no code or discount, was already redeemed, or its
    /// code is no longer the enabled promotion.
    pub async fn redeem(&self, transaction: &Transaction) -> Result<bool, StoreError> {
        let Some(code) = transaction.promo_code.as_deref() else {
            return Ok(false);
        };
        if transaction.discount_amount <= Decimal::ZERO {
            return Ok(false);
        }
        if !transaction.is_completed() {
            warn!(
                transaction_id = %transaction.id,
                status = %transaction.status,
                "refusing to redeem promotion for an unfinished transaction"
            );
            return Ok(false);
        }

        let counted = self.config.redeem_promotion(&transaction.id, code).await?;
        if !counted {
            debug!(transaction_id = %transaction.id, code, "promotion not counted");
        }
        Ok(counted)
    }

    /// The active promotion, if promotions are enabled.
    pub async fn active_promotion(&self) -> Result<Option<PromotionInfo>, StoreError> {
        let promotion = self.config.load().await?.promotion;
        if !promotion.enabled {
            return Ok(None);
        }
        let remaining_uses =
            (promotion.max_uses > 0).then(|| promotion.max_uses.saturating_sub(promotion.current_uses));
        Ok(Some(PromotionInfo {
            code: promotion.code,
            discount_percent: promotion.discount_percent,
            valid_until: promotion.valid_until,
            max_uses: promotion.max_uses,
            current_uses: promotion.current_uses,
            remaining_uses,
        }))
    }
}
