//! Administrative order state machine.
//!
//! ```text
//! PENDING ──► PAID ──► SHIPPED
//!    │         │
//!    │         └──► CANCELED (restores stock)
//!    ├──► SHIPPED
//!    └──► CANCELED (restores stock)
//! ```
//!
//! SHIPPED and CANCELED are terminal. Every transition runs in one transaction
//! holding the order row lock, so two concurrent cancellations cannot both
//! restore stock.

use serde_json::json;
use tracing::{info, instrument};

use crate::errors::{CheckoutError, Entity};
use crate::model::{NewAuditEntry, OrderFilter};
use crate::placement::order_view;
use crate::store::{AuditTrail, InventoryLedger, OrderRepository, TransactionCoordinator, UnitOfWork};
use crate::types::{AuditAction, OrderId, OrderStatus, ResourceType, UserId};
use crate::views::OrderView;

/// What a requested status change does to the order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transition {
    /// Already in the requested status; nothing is written.
    Unchanged,
    /// Status change with an audit entry.
    Advance,
    /// Status change to CANCELED, preceded by stock restoration.
    Cancel,
}

impl Transition {
    /// Decide how `from` may move to `to`.
    ///
    /// Terminal states reject every request, including a repeat of their own
    /// status, so a second cancellation is reported rather than silently
    /// accepted.
    pub fn plan(from: OrderStatus, to: OrderStatus) -> Result<Self, CheckoutError> {
        match (from, to) {
            (OrderStatus::Shipped, _) => Err(CheckoutError::InvalidTransition {
                from,
                message: "cannot change shipped order",
            }),
            (OrderStatus::Canceled, _) => Err(CheckoutError::InvalidTransition {
                from,
                message: "cannot change canceled order",
            }),
            (OrderStatus::Pending, OrderStatus::Pending) | (OrderStatus::Paid, OrderStatus::Paid) => {
                Ok(Self::Unchanged)
            }
            (OrderStatus::Paid, OrderStatus::Pending) => Err(CheckoutError::InvalidTransition {
                from,
                message: "cannot move paid order back to pending",
            }),
            (_, OrderStatus::Canceled) => Ok(Self::Cancel),
            (_, OrderStatus::Paid | OrderStatus::Shipped) => Ok(Self::Advance),
        }
    }
}

#[derive(Debug, Clone)]
pub struct OrderLifecycleManager<S> {
    store: S,
}

impl<S> OrderLifecycleManager<S>
where
    S: TransactionCoordinator,
{
    pub const fn new(store: S) -> Self {
        Self { store }
    }

    /// Move an order to `new_status`, restoring stock on cancellation and
    /// recording the change in the audit log.
    #[instrument(name = "lifecycle.update_status", skip(self))]
    pub async fn update_status(
        &self,
        admin_id: UserId,
        order_id: OrderId,
        new_status: OrderStatus,
    ) -> Result<(), CheckoutError> {
        let mut tx = self.store.begin().await?;

        let order = tx.lock_order(order_id).await?.ok_or(CheckoutError::NotFound {
            entity: Entity::Order,
            id: order_id.into_inner(),
        })?;
        let old_status = order.status;

        match Transition::plan(old_status, new_status)? {
            Transition::Unchanged => {
                tx.commit().await?;
                return Ok(());
            }
            Transition::Cancel => {
                for item in tx.order_items(order_id).await? {
                    let restored = tx.increase_stock(item.product_id, item.quantity).await?;
                    info!(
                        order = %order_id,
                        product = %item.product_id,
                        quantity = %item.quantity,
                        stock = %restored,
                        "[lifecycle.update_status] stock restored"
                    );
                }
            }
            Transition::Advance => {}
        }

        let _ = tx.set_status(order_id, new_status).await?;
        let _ = tx
            .append_audit(NewAuditEntry {
                actor_id: admin_id,
                action: AuditAction::UpdateOrderStatus,
                resource_type: ResourceType::Order,
                resource_id: order_id.into_inner(),
                before: json!({ "status": old_status }),
                after: json!({ "status": new_status }),
            })
            .await?;
        tx.commit().await?;

        info!(
            admin = %admin_id,
            order = %order_id,
            from = %old_status,
            to = %new_status,
            "[lifecycle.update_status] order status changed"
        );
        Ok(())
    }

    /// One page of orders matching `filter`, newest first.
    #[instrument(name = "lifecycle.list_orders", skip(self))]
    pub async fn list_orders(&self, filter: &OrderFilter) -> Result<Vec<OrderView>, CheckoutError> {
        let mut tx = self.store.begin().await?;
        let orders = tx.list_orders(filter).await?;
        let mut views = Vec::with_capacity(orders.len());
        for order in orders {
            views.push(order_view(&mut tx, order).await?);
        }
        tx.commit().await?;
        Ok(views)
    }
}
