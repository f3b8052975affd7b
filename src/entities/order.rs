use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use sea_orm::entity::prelude::*;
use sea_orm::{ActiveValue, Set};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;
use uuid::Uuid;

/// Lifecycle of a storefront order.
///
/// `Shipped` and `Delivered` are set by back-office tooling after completion.
#[derive(
    Clone,
    Copy,
    Debug,
    PartialEq,
    Eq,
    EnumIter,
    DeriveActiveEnum,
    Serialize,
    Deserialize,
    ToSchema,
    strum::Display,
)]
#[sea_orm(rs_type = "String", db_type = "String(StringLen::N(20))")]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum OrderStatus {
    #[sea_orm(string_value = "pending")]
    Pending,
    #[sea_orm(string_value = "processing")]
    Processing,
    #[sea_orm(string_value = "completed")]
    Completed,
    #[sea_orm(string_value = "cancelled")]
    Cancelled,
    #[sea_orm(string_value = "shipped")]
    Shipped,
    #[sea_orm(string_value = "delivered")]
    Delivered,
}

impl OrderStatus {
    /// True once a payment outcome has been applied; settled orders never move again
    pub fn is_settled(&self) -> bool {
        matches!(
            self,
            Self::Completed | Self::Cancelled | Self::Shipped | Self::Delivered
        )
    }
}

#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "orders")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: Uuid,
    pub customer_name: String,
    pub customer_email: String,
    pub total: Decimal,
    pub status: OrderStatus,
    #[sea_orm(unique)]
    pub payment_intent_id: String,
    /// Full customer and shipping payload as submitted at checkout
    pub shipping_info: Json,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    #[sea_orm(has_many = "super::order_item::Entity")]
    OrderItem,
}

impl Related<super::order_item::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::OrderItem.def()
    }
}

#[async_trait]
impl ActiveModelBehavior for ActiveModel {
    async fn before_save<C>(self, _db: &C, insert: bool) -> Result<Self, DbErr>
    where
        C: ConnectionTrait,
    {
        let mut active_model = self;
        let now = Utc::now();

        if insert {
            if let ActiveValue::NotSet = active_model.created_at {
                active_model.created_at = Set(now);
            }
        }
        active_model.updated_at = Set(now);

        Ok(active_model)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn settled_states() {
        assert!(!OrderStatus::Pending.is_settled());
        assert!(!OrderStatus::Processing.is_settled());
        assert!(OrderStatus::Completed.is_settled());
        assert!(OrderStatus::Cancelled.is_settled());
        assert!(OrderStatus::Shipped.is_settled());
        assert!(OrderStatus::Delivered.is_settled());
    }

    #[test]
    fn status_serializes_lowercase() {
        assert_eq!(OrderStatus::Completed.to_string(), "completed");
        assert_eq!(
            serde_json::to_value(OrderStatus::Cancelled).unwrap(),
            serde_json::json!("cancelled")
        );
    }
}
