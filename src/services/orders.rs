use crate::{
    entities::{
        order::{self, Entity as Order, OrderStatus},
        order_item::{self, Entity as OrderItem},
    },
    errors::ServiceError,
};
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use sea_orm::{ColumnTrait, DatabaseConnection, EntityTrait, QueryFilter};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use utoipa::ToSchema;
use uuid::Uuid;

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct OrderItemView {
    pub product_id: Uuid,
    pub quantity: i32,
    #[serde(with = "rust_decimal::serde::float")]
    #[schema(value_type = f64)]
    pub price: Decimal,
}

/// Read model returned to clients polling an order
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct OrderView {
    pub order_id: Uuid,
    pub status: OrderStatus,
    #[serde(with = "rust_decimal::serde::float")]
    #[schema(value_type = f64)]
    pub total: Decimal,
    pub payment_intent_id: String,
    pub items: Vec<OrderItemView>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl OrderView {
    fn new(order: order::Model, items: Vec<order_item::Model>) -> Self {
        Self {
            order_id: order.id,
            status: order.status,
            total: order.total,
            payment_intent_id: order.payment_intent_id,
            items: items
                .into_iter()
                .map(|item| OrderItemView {
                    product_id: item.product_id,
                    quantity: item.quantity,
                    price: item.price,
                })
                .collect(),
            created_at: order.created_at,
            updated_at: order.updated_at,
        }
    }
}

#[derive(Clone)]
pub struct OrderQueryService {
    db: Arc<DatabaseConnection>,
}

impl OrderQueryService {
    pub fn new(db: Arc<DatabaseConnection>) -> Self {
        Self { db }
    }

    pub async fn get_order(&self, order_id: Uuid) -> Result<OrderView, ServiceError> {
        let order = Order::find_by_id(order_id)
            .one(&*self.db)
            .await?
            .ok_or_else(|| ServiceError::NotFound(format!("Order {} not found", order_id)))?;

        let items = OrderItem::find()
            .filter(order_item::Column::OrderId.eq(order_id))
            .all(&*self.db)
            .await?;

        Ok(OrderView::new(order, items))
    }
}
