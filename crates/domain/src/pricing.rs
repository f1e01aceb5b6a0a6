//! Server-side pricing and coupons.
//!
//! The server is the price authority: it recomputes every figure from
//! inventory prices, the business's tax rate and the coupon, then compares
//! against what the client displayed. Client figures are never charged.

use chrono::{DateTime, Utc};
use common::{BusinessId, CouponId, InventoryItemId};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::money::Money;
use crate::policy::BusinessPolicy;

/// How a coupon reduces the subtotal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Discount {
    Percent { percent: u8 },
    Fixed { amount: Money },
}

/// Reasons a coupon code cannot be applied.
#[derive(Debug, Clone, PartialEq, Eq, Error, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CouponRejection {
    #[error("coupon not found")]
    NotFound,
    #[error("coupon is inactive")]
    Inactive,
    #[error("coupon has expired")]
    Expired,
    #[error("coupon usage limit reached")]
    Exhausted,
}

/// A business-scoped discount code.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Coupon {
    pub id: CouponId,
    pub business_id: BusinessId,
    pub code: String,
    pub discount: Discount,
    pub max_uses: Option<u32>,
    pub times_used: u32,
    pub expires_at: Option<DateTime<Utc>>,
    pub active: bool,
}

impl Coupon {
    pub fn new(business_id: BusinessId, code: impl Into<String>, discount: Discount) -> Self {
        Self {
            id: CouponId::new(),
            business_id,
            code: code.into(),
            discount,
            max_uses: None,
            times_used: 0,
            expires_at: None,
            active: true,
        }
    }

    pub fn is_exhausted(&self) -> bool {
        self.max_uses.is_some_and(|max| self.times_used >= max)
    }

    /// Checks that the coupon can be applied at `now`.
    pub fn validate(&self, now: DateTime<Utc>) -> Result<(), CouponRejection> {
        if !self.active {
            return Err(CouponRejection::Inactive);
        }
        if self.expires_at.is_some_and(|at| at <= now) {
            return Err(CouponRejection::Expired);
        }
        if self.is_exhausted() {
            return Err(CouponRejection::Exhausted);
        }
        Ok(())
    }

    /// Discount for `subtotal`, never exceeding it.
    pub fn discount_for(&self, subtotal: Money) -> Money {
        let discount = match self.discount {
            Discount::Percent { percent } => subtotal.apply_bps(u32::from(percent.min(100)) * 100),
            Discount::Fixed { amount } => amount,
        };
        discount.max(Money::zero()).min(subtotal)
    }
}

/// One priced line of a quote.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PriceLine {
    pub inventory_item_id: InventoryItemId,
    pub name: String,
    pub unit_price: Money,
    pub quantity: u32,
}

impl PriceLine {
    pub fn total(&self) -> Money {
        self.unit_price.multiply(self.quantity)
    }
}

/// Figures the client displayed at checkout.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubmittedPricing {
    pub subtotal: Money,
    #[serde(default)]
    pub discount: Money,
    pub tax: Money,
    pub total: Money,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PriceField {
    Subtotal,
    Discount,
    Tax,
    Total,
}

impl std::fmt::Display for PriceField {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            PriceField::Subtotal => "subtotal",
            PriceField::Discount => "discount",
            PriceField::Tax => "tax",
            PriceField::Total => "total",
        };
        f.write_str(name)
    }
}

/// The client's figure disagrees with the server's.
#[derive(Debug, Clone, PartialEq, Eq, Error, Serialize)]
#[error("price mismatch on {field}: expected {expected}, submitted {submitted}")]
pub struct PriceMismatch {
    pub field: PriceField,
    pub expected: Money,
    pub submitted: Money,
}

/// The authoritative price breakdown for a booking.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PriceQuote {
    pub subtotal: Money,
    pub discount: Money,
    pub tax_rate_bps: u32,
    pub tax: Money,
    pub total: Money,
    pub deposit: Option<Money>,
    /// What is charged now: the deposit when configured, else the total.
    pub amount_due: Money,
}

impl PriceQuote {
    /// Prices `lines` under `policy`, applying `coupon` before tax.
    pub fn compute(lines: &[PriceLine], policy: &BusinessPolicy, coupon: Option<&Coupon>) -> Self {
        let subtotal: Money = lines.iter().map(PriceLine::total).sum();
        let discount = coupon.map_or(Money::zero(), |c| c.discount_for(subtotal));
        let taxable = subtotal - discount;
        let tax = taxable.apply_bps(policy.tax_rate_bps);
        let total = taxable + tax;
        let deposit = policy
            .deposit_percent
            .map(|percent| total.apply_bps(u32::from(percent) * 100));

        Self {
            subtotal,
            discount,
            tax_rate_bps: policy.tax_rate_bps,
            tax,
            total,
            deposit,
            amount_due: deposit.unwrap_or(total),
        }
    }

    /// Compares the client's figures field by field, reporting the first
    /// disagreement.
    pub fn verify(&self, submitted: &SubmittedPricing) -> Result<(), PriceMismatch> {
        let checks = [
            (PriceField::Subtotal, self.subtotal, submitted.subtotal),
            (PriceField::Discount, self.discount, submitted.discount),
            (PriceField::Tax, self.tax, submitted.tax),
            (PriceField::Total, self.total, submitted.total),
        ];
        for (field, expected, submitted) in checks {
            if expected != submitted {
                return Err(PriceMismatch {
                    field,
                    expected,
                    submitted,
                });
            }
        }
        Ok(())
    }

    /// The quote as the client should have submitted it.
    pub fn as_submitted(&self) -> SubmittedPricing {
        SubmittedPricing {
            subtotal: self.subtotal,
            discount: self.discount,
            tax: self.tax,
            total: self.total,
        }
    }
}
