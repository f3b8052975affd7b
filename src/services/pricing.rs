use crate::{
    config::AppConfig,
    entities::product::{self, Entity as Product},
    errors::ServiceError,
};
use rust_decimal::Decimal;
use sea_orm::{DatabaseConnection, EntityTrait};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{debug, instrument};
use utoipa::ToSchema;
use uuid::Uuid;

/// Delivery speed chosen by the shopper
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "lowercase")]
pub enum ShippingTier {
    Normal,
    Express,
}

/// Flat shipping surcharges, taken from configuration only
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ShippingRates {
    pub normal: Decimal,
    pub express: Decimal,
}

impl ShippingRates {
    pub fn for_tier(&self, tier: ShippingTier) -> Decimal {
        match tier {
            ShippingTier::Normal => self.normal,
            ShippingTier::Express => self.express,
        }
    }
}

/// A cart line as submitted by the client; carries no price
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct LineRequest {
    pub product_id: Uuid,
    pub quantity: i32,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PricedLine {
    pub product_id: Uuid,
    pub quantity: i32,
    /// Catalog unit price at quote time
    pub unit_price: Decimal,
    pub line_total: Decimal,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PriceQuote {
    pub lines: Vec<PricedLine>,
    pub subtotal: Decimal,
    pub shipping: Decimal,
    pub total: Decimal,
    pub currency: String,
}

impl PriceQuote {
    fn assemble(lines: Vec<PricedLine>, shipping: Decimal, currency: &str) -> Self {
        let subtotal: Decimal = lines.iter().map(|l| l.line_total).sum();
        Self {
            lines,
            subtotal,
            shipping,
            total: subtotal + shipping,
            currency: currency.to_string(),
        }
    }
}

/// Recomputes cart totals from the catalog.
#[derive(Clone)]
pub struct PricingResolver {
    db: Arc<DatabaseConnection>,
    rates: ShippingRates,
    currency: String,
}

impl PricingResolver {
    pub fn new(db: Arc<DatabaseConnection>, rates: ShippingRates, currency: impl Into<String>) -> Self {
        Self {
            db,
            rates,
            currency: currency.into(),
        }
    }

    pub fn from_config(db: Arc<DatabaseConnection>, cfg: &AppConfig) -> Self {
        Self::new(
            db,
            ShippingRates {
                normal: cfg.shipping_rate_normal,
                express: cfg.shipping_rate_express,
            },
            cfg.currency.clone(),
        )
    }

    pub fn currency(&self) -> &str {
        &self.currency
    }

    /// Prices every line against the current catalog. Any missing product
    /// fails the whole quote.
    #[instrument(skip(self, lines), fields(line_count = lines.len()))]
    pub async fn quote(
        &self,
        lines: &[LineRequest],
        tier: ShippingTier,
    ) -> Result<PriceQuote, ServiceError> {
        validate_lines(lines)?;

        let mut priced = Vec::with_capacity(lines.len());
        for line in lines {
            let product: product::Model = Product::find_by_id(line.product_id)
                .one(&*self.db)
                .await?
                .ok_or(ServiceError::ProductNotFound(line.product_id))?;

            let unit_price = product.effective_price();
            priced.push(PricedLine {
                product_id: line.product_id,
                quantity: line.quantity,
                unit_price,
                line_total: unit_price * Decimal::from(line.quantity),
            });
        }

        let quote = PriceQuote::assemble(priced, self.rates.for_tier(tier), &self.currency);
        debug!(subtotal = %quote.subtotal, total = %quote.total, "cart priced");
        Ok(quote)
    }
}

fn validate_lines(lines: &[LineRequest]) -> Result<(), ServiceError> {
    if lines.is_empty() {
        return Err(ServiceError::ValidationError(
            "cart must contain at least one item".into(),
        ));
    }
    if let Some(line) = lines.iter().find(|l| l.quantity <= 0) {
        return Err(ServiceError::ValidationError(format!(
            "quantity for product {} must be positive",
            line.product_id
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;
    use rust_decimal_macros::dec;

    fn rates() -> ShippingRates {
        ShippingRates {
            normal: dec!(15.00),
            express: dec!(25.00),
        }
    }

    fn line(unit_price: Decimal, quantity: i32) -> PricedLine {
        PricedLine {
            product_id: Uuid::new_v4(),
            quantity,
            unit_price,
            line_total: unit_price * Decimal::from(quantity),
        }
    }

    #[test]
    fn shipping_is_selected_by_tier() {
        assert_eq!(rates().for_tier(ShippingTier::Normal), dec!(15));
        assert_eq!(rates().for_tier(ShippingTier::Express), dec!(25));
    }

    #[test]
    fn quote_sums_lines_and_shipping() {
        let quote = PriceQuote::assemble(
            vec![line(dec!(100), 2)],
            rates().for_tier(ShippingTier::Express),
            "usd",
        );
        assert_eq!(quote.subtotal, dec!(200));
        assert_eq!(quote.total, dec!(225));

        let sale = PriceQuote::assemble(
            vec![line(dec!(80), 1)],
            rates().for_tier(ShippingTier::Normal),
            "usd",
        );
        assert_eq!(sale.total, dec!(95));
    }

    #[test]
    fn rejects_empty_cart_and_non_positive_quantity() {
        assert_matches!(validate_lines(&[]), Err(ServiceError::ValidationError(_)));

        let zero = LineRequest {
            product_id: Uuid::new_v4(),
            quantity: 0,
        };
        assert_matches!(validate_lines(&[zero]), Err(ServiceError::ValidationError(_)));

        let negative = LineRequest {
            product_id: Uuid::new_v4(),
            quantity: -3,
        };
        assert_matches!(
            validate_lines(&[negative]),
            Err(ServiceError::ValidationError(_))
        );
    }

    #[test]
    fn tier_deserializes_lowercase() {
        let tier: ShippingTier = serde_json::from_str("\"express\"").unwrap();
        assert_eq!(tier, ShippingTier::Express);
        assert!(serde_json::from_str::<ShippingTier>("\"overnight\"").is_err());
    }
}
