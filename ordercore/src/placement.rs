//! Cart to order conversion.
//!
//! Placement is one transaction: stock decrements, the order row, its line
//! snapshots and the cart checkout commit together or not at all. Duplicate
//! submissions are recognized by `(user, idempotency key)`; a concurrent
//! duplicate that loses the insert race converges on the winner's order.

use tracing::{debug, info, instrument, warn};

use crate::errors::{CheckoutError, Entity, StoreError};
use crate::model::{CartItem, NewOrder, NewOrderItem, Order};
use crate::store::{
    AddressDirectory, CartStore, InventoryLedger, OrderRepository, ProductCatalog,
    TransactionCoordinator, UnitOfWork,
};
use crate::types::{AddressId, CartId, IdempotencyKey, Money, UserId};
use crate::views::OrderView;

/// Outcome of one placement attempt inside a transaction.
enum Placement {
    /// An order with this key already existed; nothing was written.
    Replayed(OrderView),
    /// A new order was written and awaits commit.
    Created(OrderView),
    /// The order insert lost a race on the idempotency key.
    KeyTaken,
}

/// Turns a user's active cart into a durable order.
#[derive(Debug, Clone)]
pub struct OrderPlacer<S> {
    store: S,
}

impl<S> OrderPlacer<S>
where
    S: TransactionCoordinator,
{
    pub const fn new(store: S) -> Self {
        Self { store }
    }

    /// Place an order from the user's active cart, or replay the order
    /// already placed under `idempotency_key`.
    #[instrument(name = "checkout.place_order", skip(self))]
    pub async fn place_order(
        &self,
        user_id: UserId,
        address_id: AddressId,
        idempotency_key: &IdempotencyKey,
    ) -> Result<OrderView, CheckoutError> {
        let mut tx = self.store.begin().await?;

        match attempt_placement(&mut tx, user_id, address_id, idempotency_key).await? {
            Placement::Replayed(view) => {
                tx.commit().await?;
                info!(
                    user = %user_id,
                    order = %view.id,
                    "[checkout.place_order] replayed existing order"
                );
                Ok(view)
            }
            Placement::Created(view) => {
                tx.commit().await?;
                info!(
                    user = %user_id,
                    order = %view.id,
                    total = %view.total_price,
                    items = view.items.len(),
                    "[checkout.place_order] order placed"
                );
                Ok(view)
            }
            Placement::KeyTaken => {
                // The aborted transaction still holds this attempt's
                // decrements; discard them before looking for the winner.
                tx.rollback().await?;
                self.converge_on_winner(user_id, idempotency_key).await
            }
        }
    }

    async fn converge_on_winner(
        &self,
        user_id: UserId,
        idempotency_key: &IdempotencyKey,
    ) -> Result<OrderView, CheckoutError> {
        let mut tx = self.store.begin().await?;
        let Some(order) = tx
            .find_by_idempotency_key(user_id, idempotency_key)
            .await?
        else {
            warn!(
                user = %user_id,
                "[checkout.place_order] key collided but no winning order is visible"
            );
            return Err(CheckoutError::IdempotencyConflict);
        };

        let view = order_view(&mut tx, order).await?;
        tx.commit().await?;

        warn!(
            user = %user_id,
            order = %view.id,
            "[checkout.place_order] concurrent duplicate converged on existing order"
        );
        Ok(view)
    }
}

async fn attempt_placement<T>(
    tx: &mut T,
    user_id: UserId,
    address_id: AddressId,
    idempotency_key: &IdempotencyKey,
) -> Result<Placement, CheckoutError>
where
    T: InventoryLedger + CartStore + OrderRepository + ProductCatalog + AddressDirectory + Send,
{
    match tx.address_owner(address_id).await? {
        None => {
            return Err(CheckoutError::NotFound {
                entity: Entity::Address,
                id: address_id.into_inner(),
            })
        }
        Some(owner) if owner != user_id => {
            warn!(
                user = %user_id,
                address = %address_id,
                "[checkout.place_order] address belongs to another user"
            );
            return Err(CheckoutError::Forbidden {
                entity: Entity::Address,
            });
        }
        Some(_) => {}
    }

    if let Some(existing) = tx
        .find_by_idempotency_key(user_id, idempotency_key)
        .await?
    {
        return Ok(Placement::Replayed(order_view(tx, existing).await?));
    }

    let Some((cart_id, mut items)) = locked_cart_lines(tx, user_id).await? else {
        // A same-key request may have checked the cart out while this one
        // waited on the cart lock.
        if let Some(existing) = tx
            .find_by_idempotency_key(user_id, idempotency_key)
            .await?
        {
            return Ok(Placement::Replayed(order_view(tx, existing).await?));
        }
        return Err(CheckoutError::CartEmpty);
    };

    // Global lock order on product rows.
    items.sort_by_key(|item| item.product_id);

    let mut snapshots = Vec::with_capacity(items.len());
    for item in &items {
        let product = tx
            .product(item.product_id)
            .await?
            .filter(|product| product.is_purchasable())
            .ok_or(CheckoutError::ProductUnavailable {
                product_id: item.product_id,
            })?;

        if !tx.decrease_if_enough(item.product_id, item.quantity).await? {
            warn!(
                user = %user_id,
                product = %item.product_id,
                requested = %item.quantity,
                "[checkout.place_order] insufficient stock"
            );
            return Err(CheckoutError::OutOfStock {
                product_id: item.product_id,
            });
        }
        debug!(
            product = %item.product_id,
            quantity = %item.quantity,
            "[checkout.place_order] stock reserved"
        );

        snapshots.push(NewOrderItem {
            product_id: item.product_id,
            product_name: product.name,
            unit_price: item.unit_price,
            quantity: item.quantity,
        });
    }

    let total_price = Money::checked_total(
        snapshots
            .iter()
            .map(|snapshot| (snapshot.unit_price, snapshot.quantity)),
    )
    .ok_or_else(|| CheckoutError::validation("total_price", "order total overflows"))?;

    let order = match tx
        .insert_order(NewOrder {
            user_id,
            address_id,
            total_price,
            idempotency_key: idempotency_key.clone(),
        })
        .await
    {
        Ok(order) => order,
        Err(StoreError::UniqueViolation { constraint }) => {
            debug!(constraint, "[checkout.place_order] order insert collided");
            return Ok(Placement::KeyTaken);
        }
        Err(error) => return Err(error.into()),
    };

    let lines = tx.insert_items(order.id, snapshots).await?;
    tx.check_out(cart_id).await?;

    Ok(Placement::Created(OrderView::new(order, lines)))
}

/// The locked active cart and its lines, or `None` when there is nothing to buy.
async fn locked_cart_lines<T>(
    tx: &mut T,
    user_id: UserId,
) -> Result<Option<(CartId, Vec<CartItem>)>, CheckoutError>
where
    T: CartStore + Send,
{
    let Some(cart) = tx.lock_active_cart(user_id).await? else {
        return Ok(None);
    };
    let items = tx.items(cart.id).await?;
    if items.is_empty() {
        return Ok(None);
    }
    Ok(Some((cart.id, items)))
}

pub(crate) async fn order_view<T>(tx: &mut T, order: Order) -> Result<OrderView, CheckoutError>
where
    T: OrderRepository + Send,
{
    let items = tx.order_items(order.id).await?;
    Ok(OrderView::new(order, items))
}
