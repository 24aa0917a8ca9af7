//! Price resolution.
//!
//! Pure functions: snapshot the catalog at hold / batch time, then quote a
//! single ticket from the stored snapshot plus overrides at activation time.

use crate::error::{Result, TicketingError};
use crate::types::{
    BatchPricing, CustomerType, Money, PriceBreakdown, PricingOverrides, PricingSnapshot, Product,
};
use chrono::{DateTime, Datelike, NaiveDate, Utc, Weekday};

/// Resolved price above `ANOMALY_FACTOR × base` is logged as an anomaly.
pub const ANOMALY_FACTOR: u64 = 2;

/// Captures the product's current prices.
///
/// Per-type prices are the base price minus each type's discount.
///
/// # Errors
///
/// [`TicketingError::InvalidPricing`] when a discount exceeds 100%.
pub fn snapshot(product: &Product, at: DateTime<Utc>) -> Result<PricingSnapshot> {
    let customer_type_prices = product
        .customer_type_discounts
        .iter()
        .map(|(customer_type, percent)| {
            product
                .base_price
                .checked_apply_discount(*percent)
                .map(|price| (*customer_type, price))
                .ok_or_else(|| {
                    TicketingError::InvalidPricing(format!(
                        "{customer_type} discount of {percent}% on product {}",
                        product.id
                    ))
                })
        })
        .collect::<Result<_>>()?;

    Ok(PricingSnapshot {
        base_price: product.base_price,
        customer_type_prices,
        weekend_premium: product.weekend_premium.unwrap_or(Money::ZERO),
        currency: product.currency.clone(),
        captured_at: at,
    })
}

/// Checks overrides before they are stored on a batch.
///
/// # Errors
///
/// [`TicketingError::InvalidPricing`] when the flat discount exceeds 100%.
pub fn validate_overrides(overrides: &PricingOverrides) -> Result<()> {
    match overrides.discount_percent {
        Some(percent) if percent > 100 => Err(TicketingError::InvalidPricing(format!(
            "flat discount of {percent}%"
        ))),
        _ => Ok(()),
    }
}

/// Saturday or Sunday.
#[must_use]
pub fn is_weekend(date: NaiveDate) -> bool {
    matches!(date.weekday(), Weekday::Sat | Weekday::Sun)
}

/// Quotes one ticket of `customer_type` visiting on `visit_date`.
///
/// Unit price: per-type override, else the snapshot's per-type price, else
/// (only when the snapshot carries no per-type table at all) the base price.
/// The flat discount applies only when no per-type override was used. On a
/// weekend the override premium, if set, replaces the snapshot premium.
///
/// # Errors
///
/// [`TicketingError::InvalidCustomerType`] when the snapshot prices some
/// types but not this one, [`TicketingError::InvalidPricing`] on an
/// out-of-range discount or overflow.
pub fn quote(
    pricing: &BatchPricing,
    customer_type: CustomerType,
    visit_date: Option<NaiveDate>,
) -> Result<PriceBreakdown> {
    let BatchPricing {
        snapshot,
        overrides,
    } = pricing;

    let (unit, override_applied) =
        if let Some(price) = overrides.customer_type_prices.get(&customer_type) {
            (*price, true)
        } else if snapshot.customer_type_prices.is_empty() {
            (snapshot.base_price, false)
        } else {
            let price = snapshot
                .customer_type_prices
                .get(&customer_type)
                .ok_or_else(|| TicketingError::InvalidCustomerType(customer_type.to_string()))?;
            (*price, false)
        };

    let discount = match overrides.discount_percent {
        Some(percent) if !override_applied => {
            let discounted = unit.checked_apply_discount(percent).ok_or_else(|| {
                TicketingError::InvalidPricing(format!("flat discount of {percent}%"))
            })?;
            unit.checked_sub(discounted).unwrap_or(Money::ZERO)
        }
        _ => Money::ZERO,
    };

    let weekend_premium = match visit_date {
        Some(date) if is_weekend(date) => overrides
            .weekend_premium
            .unwrap_or(snapshot.weekend_premium),
        _ => Money::ZERO,
    };

    let final_price = unit
        .checked_sub(discount)
        .and_then(|price| price.checked_add(weekend_premium))
        .ok_or_else(|| TicketingError::InvalidPricing("price overflow".into()))?;

    Ok(PriceBreakdown {
        base: unit,
        discount,
        weekend_premium,
        final_price,
        override_applied,
        currency: snapshot.currency.clone(),
    })
}

/// `true` when `price` exceeds [`ANOMALY_FACTOR`] times `base`.
#[must_use]
pub fn is_anomalous(price: Money, base: Money) -> bool {
    base.cents()
        .checked_mul(ANOMALY_FACTOR)
        .is_some_and(|limit| price.cents() > limit)
}
