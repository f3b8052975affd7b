//! Applies verified payment outcomes to orders.
//!
//! The "already settled?" check is a plain read followed by a write, with no
//! transaction or conditional update around it. Two deliveries of the same
//! event racing each other can both pass the check; stock is still clamped at
//! zero. Closing the window needs a compare-and-swap on `status` or a ledger of
//! processed event ids.
//!
//! Errors are only returned while the order is still unidentified (the lookup
//! itself failed), so the processor retries the delivery. Once an order is
//! matched, write failures become reconciliation gaps and the event is
//! acknowledged.

use crate::{
    entities::{
        order::{self, Entity as Order, OrderStatus},
        order_item::{self, Entity as OrderItem},
        product::{self, Entity as Product},
    },
    errors::ServiceError,
    events::{Event, EventSender},
    payments::webhook::{EventKind, WebhookEvent},
};
use metrics::counter;
use sea_orm::{
    ActiveModelTrait, ColumnTrait, DatabaseConnection, DbErr, EntityTrait, QueryFilter, Set,
};
use std::sync::Arc;
use tracing::{error, info, instrument, warn};
use uuid::Uuid;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SettlementOutcome {
    Completed {
        order_id: Uuid,
        adjusted_items: usize,
        /// Items whose stock could not be updated
        gaps: usize,
    },
    Cancelled {
        order_id: Uuid,
    },
    /// The order already reached a terminal state; nothing was written
    AlreadySettled {
        order_id: Uuid,
        status: OrderStatus,
    },
    /// No order carries this payment intent id
    Unmatched,
    /// The order was matched but the status write failed; reported as a gap
    Unapplied {
        order_id: Uuid,
    },
    /// Event type this service does not act on
    Ignored,
}

#[derive(Clone)]
pub struct SettlementService {
    db: Arc<DatabaseConnection>,
    event_sender: EventSender,
}

impl SettlementService {
    pub fn new(db: Arc<DatabaseConnection>, event_sender: EventSender) -> Self {
        Self { db, event_sender }
    }

    /// Dispatches a verified event. Callers acknowledge the delivery whatever
    /// this returns.
    #[instrument(skip(self, event), fields(event_id = %event.id, event_type = %event.event_type))]
    pub async fn handle_event(
        &self,
        event: &WebhookEvent,
    ) -> Result<SettlementOutcome, ServiceError> {
        let outcome = match event.kind() {
            EventKind::PaymentSucceeded => self.settle_success(event.payment_intent_id()).await?,
            EventKind::PaymentFailed | EventKind::PaymentCanceled => {
                self.settle_failure(event.payment_intent_id(), event.failure_message())
                    .await?
            }
            EventKind::Other => {
                info!("ignoring unhandled webhook event type");
                SettlementOutcome::Ignored
            }
        };
        Ok(outcome)
    }

    async fn find_order(
        &self,
        payment_intent_id: &str,
    ) -> Result<Option<order::Model>, ServiceError> {
        if payment_intent_id.is_empty() {
            return Ok(None);
        }
        Order::find()
            .filter(order::Column::PaymentIntentId.eq(payment_intent_id))
            .one(&*self.db)
            .await
            .map_err(|e| {
                error!(%payment_intent_id, error = %e, "order lookup failed");
                counter!("storefront_settlement_lookup_failures_total", 1);
                ServiceError::Internal(format!("order lookup failed: {}", e))
            })
    }

    /// A delivery that passed signature checks but could not be read
    pub async fn report_unreadable_event(&self, reason: String) {
        self.report_gap("", format!("unreadable webhook payload: {}", reason))
            .await;
    }

    async fn write_status(
        &self,
        order: order::Model,
        status: OrderStatus,
    ) -> Result<Uuid, SettlementOutcome> {
        let order_id = order.id;
        let payment_intent_id = order.payment_intent_id.clone();
        let mut active: order::ActiveModel = order.into();
        active.status = Set(status);
        match active.update(&*self.db).await {
            Ok(_) => Ok(order_id),
            Err(e) => {
                self.report_gap(
                    &payment_intent_id,
                    format!("order {} could not be marked {}: {}", order_id, status, e),
                )
                .await;
                Err(SettlementOutcome::Unapplied { order_id })
            }
        }
    }

    async fn report_gap(&self, payment_intent_id: &str, reason: String) {
        warn!(%payment_intent_id, %reason, "reconciliation gap");
        counter!("storefront_settlement_reconciliation_gaps_total", 1);
        self.event_sender
            .publish(Event::ReconciliationGap {
                payment_intent_id: payment_intent_id.to_string(),
                reason,
            })
            .await;
    }

    /// Marks the order completed and decrements stock once per item
    #[instrument(skip(self))]
    pub async fn settle_success(
        &self,
        payment_intent_id: &str,
    ) -> Result<SettlementOutcome, ServiceError> {
        let Some(order) = self.find_order(payment_intent_id).await? else {
            self.report_gap(payment_intent_id, "no order for succeeded payment".into())
                .await;
            return Ok(SettlementOutcome::Unmatched);
        };

        if order.status == OrderStatus::Cancelled {
            // Captured payment on a cancelled order: refund or reinstate by hand
            self.report_gap(
                payment_intent_id,
                format!("payment succeeded for cancelled order {}", order.id),
            )
            .await;
            return Ok(SettlementOutcome::AlreadySettled {
                order_id: order.id,
                status: order.status,
            });
        }

        if order.status.is_settled() {
            info!(order_id = %order.id, status = %order.status, "order already settled, skipping");
            counter!("storefront_settlement_duplicates_total", 1);
            return Ok(SettlementOutcome::AlreadySettled {
                order_id: order.id,
                status: order.status,
            });
        }

        let order_id = match self.write_status(order, OrderStatus::Completed).await {
            Ok(order_id) => order_id,
            Err(outcome) => return Ok(outcome),
        };

        info!(%order_id, "order completed");
        counter!("storefront_settlement_completed_total", 1);
        self.event_sender.publish(Event::OrderCompleted(order_id)).await;

        let items = match OrderItem::find()
            .filter(order_item::Column::OrderId.eq(order_id))
            .all(&*self.db)
            .await
        {
            Ok(items) => items,
            Err(e) => {
                self.report_gap(
                    payment_intent_id,
                    format!("order {} completed but items could not be loaded: {}", order_id, e),
                )
                .await;
                return Ok(SettlementOutcome::Completed {
                    order_id,
                    adjusted_items: 0,
                    gaps: 1,
                });
            }
        };

        let mut adjusted_items = 0;
        let mut gaps = 0;
        for item in &items {
            match self.decrement_stock(order_id, item).await {
                Ok(true) => adjusted_items += 1,
                Ok(false) => {
                    gaps += 1;
                    self.report_gap(
                        payment_intent_id,
                        format!("product {} for order {} no longer exists", item.product_id, order_id),
                    )
                    .await;
                }
                Err(e) => {
                    gaps += 1;
                    error!(%order_id, product_id = %item.product_id, error = %e, "stock update failed");
                    self.report_gap(
                        payment_intent_id,
                        format!("stock update for product {} failed: {}", item.product_id, e),
                    )
                    .await;
                }
            }
        }

        Ok(SettlementOutcome::Completed {
            order_id,
            adjusted_items,
            gaps,
        })
    }

    /// Returns false when the product is gone
    async fn decrement_stock(&self, order_id: Uuid, item: &order_item::Model) -> Result<bool, DbErr> {
        let Some(product) = Product::find_by_id(item.product_id).one(&*self.db).await? else {
            return Ok(false);
        };

        let old_stock = product.stock;
        let new_stock = (old_stock - item.quantity).max(0);

        let mut active: product::ActiveModel = product.into();
        active.stock = Set(new_stock);
        active.update(&*self.db).await?;

        self.event_sender
            .publish(Event::StockAdjusted {
                order_id,
                product_id: item.product_id,
                old_stock,
                new_stock,
            })
            .await;
        Ok(true)
    }

    /// Cancels a not-yet-settled order; stock is untouched
    #[instrument(skip(self))]
    pub async fn settle_failure(
        &self,
        payment_intent_id: &str,
        reason: Option<&str>,
    ) -> Result<SettlementOutcome, ServiceError> {
        let Some(order) = self.find_order(payment_intent_id).await? else {
            info!(%payment_intent_id, "failed payment has no matching order");
            return Ok(SettlementOutcome::Unmatched);
        };

        if order.status.is_settled() {
            info!(order_id = %order.id, status = %order.status, "order already settled, skipping");
            counter!("storefront_settlement_duplicates_total", 1);
            return Ok(SettlementOutcome::AlreadySettled {
                order_id: order.id,
                status: order.status,
            });
        }

        let order_id = match self.write_status(order, OrderStatus::Cancelled).await {
            Ok(order_id) => order_id,
            Err(outcome) => return Ok(outcome),
        };

        info!(%order_id, reason = reason.unwrap_or("unspecified"), "order cancelled after failed payment");
        counter!("storefront_settlement_cancelled_total", 1);
        self.event_sender.publish(Event::OrderCancelled(order_id)).await;

        Ok(SettlementOutcome::Cancelled { order_id })
    }
}
