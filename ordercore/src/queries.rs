//! Read-only views a customer has over their own orders.

use tracing::instrument;

use crate::errors::{CheckoutError, Entity};
use crate::placement::order_view;
use crate::store::{OrderRepository, TransactionCoordinator, UnitOfWork};
use crate::types::{OrderId, UserId};
use crate::views::OrderView;

#[derive(Debug, Clone)]
pub struct CustomerOrders<S> {
    store: S,
}

impl<S> CustomerOrders<S>
where
    S: TransactionCoordinator,
{
    pub const fn new(store: S) -> Self {
        Self { store }
    }

    /// The user's orders, newest first.
    #[instrument(name = "orders.list_mine", skip(self))]
    pub async fn list_my_orders(&self, user_id: UserId) -> Result<Vec<OrderView>, CheckoutError> {
        let mut tx = self.store.begin().await?;
        let orders = tx.orders_for_user(user_id).await?;
        let mut views = Vec::with_capacity(orders.len());
        for order in orders {
            views.push(order_view(&mut tx, order).await?);
        }
        tx.commit().await?;
        Ok(views)
    }

    /// One of the user's orders. Another user's order is reported as missing.
    #[instrument(name = "orders.get_mine", skip(self))]
    pub async fn get_my_order(
        &self,
        user_id: UserId,
        order_id: OrderId,
    ) -> Result<OrderView, CheckoutError> {
        let mut tx = self.store.begin().await?;
        let order = tx
            .find_order(order_id)
            .await?
            .filter(|order| order.user_id == user_id)
            .ok_or(CheckoutError::NotFound {
                entity: Entity::Order,
                id: order_id.into_inner(),
            })?;
        let view = order_view(&mut tx, order).await?;
        tx.commit().await?;
        Ok(view)
    }
}
