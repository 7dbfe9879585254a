//! Customer cart operations over [`CartStore`].
//!
//! Stock checks here are advisory: they stop obviously doomed additions, but
//! stock can change between "add to cart" and "place order". The authoritative
//! guarantee is the conditional decrement at placement time.

use tracing::{info, instrument, warn};

use crate::errors::{CheckoutError, Entity, StoreError};
use crate::model::CartItem;
use crate::store::{CartStore, ProductCatalog, TransactionCoordinator, UnitOfWork};
use crate::types::{CartId, CartItemId, CartStatus, ProductId, Quantity, UserId};
use crate::views::CartView;

/// Per-user cart service. Every mutation runs in one transaction.
#[derive(Debug, Clone)]
pub struct CartService<S> {
    store: S,
}

impl<S> CartService<S>
where
    S: TransactionCoordinator,
{
    pub const fn new(store: S) -> Self {
        Self { store }
    }

    /// The user's active cart, created on first access.
    #[instrument(name = "cart.get", skip(self))]
    pub async fn get_cart(&self, user_id: UserId) -> Result<CartView, CheckoutError> {
        let mut tx = self.store.begin().await?;
        let cart = tx.get_or_create_active_cart(user_id).await?;
        let view = cart_view(&mut tx, cart.id).await?;
        tx.commit().await?;
        Ok(view)
    }

    /// Merge-add `quantity` units of a product at its current price.
    #[instrument(name = "cart.add_item", skip(self))]
    pub async fn add_item(
        &self,
        user_id: UserId,
        product_id: ProductId,
        quantity: Quantity,
    ) -> Result<CartView, CheckoutError> {
        let mut tx = self.store.begin().await?;

        let product = tx
            .product(product_id)
            .await?
            .filter(|product| product.deleted_at.is_none())
            .ok_or(CheckoutError::NotFound {
                entity: Entity::Product,
                id: product_id.into_inner(),
            })?;
        if !product.active {
            return Err(CheckoutError::ProductUnavailable { product_id });
        }

        let cart = tx.get_or_create_active_cart(user_id).await?;
        let item = tx
            .add_item(cart.id, product.id, quantity, product.price)
            .await?;

        if !product.stock.covers(item.quantity) {
            warn!(
                product = %product_id,
                requested = %item.quantity,
                stock = %product.stock,
                "[cart.add_item] requested quantity exceeds stock"
            );
            return Err(CheckoutError::OutOfStock { product_id });
        }

        let view = cart_view(&mut tx, cart.id).await?;
        tx.commit().await?;

        info!(
            user = %user_id,
            product = %product_id,
            line_quantity = %item.quantity,
            "[cart.add_item] item added"
        );
        Ok(view)
    }

    /// Overwrite the quantity of one of the user's cart lines.
    #[instrument(name = "cart.update_item", skip(self))]
    pub async fn update_item(
        &self,
        user_id: UserId,
        item_id: CartItemId,
        quantity: Quantity,
    ) -> Result<CartView, CheckoutError> {
        let mut tx = self.store.begin().await?;
        let item = owned_line(&mut tx, user_id, item_id).await?;

        let product = tx
            .product(item.product_id)
            .await?
            .filter(|product| product.deleted_at.is_none())
            .ok_or(CheckoutError::NotFound {
                entity: Entity::Product,
                id: item.product_id.into_inner(),
            })?;
        if !product.active {
            return Err(CheckoutError::ProductUnavailable {
                product_id: item.product_id,
            });
        }
        if !product.stock.covers(quantity) {
            return Err(CheckoutError::OutOfStock {
                product_id: item.product_id,
            });
        }

        let _ = tx.update_item_quantity(item_id, quantity).await?;
        let view = cart_view(&mut tx, item.cart_id).await?;
        tx.commit().await?;
        Ok(view)
    }

    /// Remove one of the user's cart lines.
    #[instrument(name = "cart.delete_item", skip(self))]
    pub async fn delete_item(
        &self,
        user_id: UserId,
        item_id: CartItemId,
    ) -> Result<CartView, CheckoutError> {
        let mut tx = self.store.begin().await?;
        let item = owned_line(&mut tx, user_id, item_id).await?;
        tx.delete_item(item_id).await?;
        let view = cart_view(&mut tx, item.cart_id).await?;
        tx.commit().await?;
        Ok(view)
    }

    /// Empty the user's active cart, if there is one.
    #[instrument(name = "cart.clear", skip(self))]
    pub async fn clear(&self, user_id: UserId) -> Result<CartView, CheckoutError> {
        let mut tx = self.store.begin().await?;
        let cart = tx.get_or_create_active_cart(user_id).await?;
        tx.clear(cart.id).await?;
        let view = cart_view(&mut tx, cart.id).await?;
        tx.commit().await?;

        info!(user = %user_id, cart = %cart.id, "[cart.clear] cart emptied");
        Ok(view)
    }
}

/// The line, if it sits in an ACTIVE cart owned by `user_id`.
///
/// A line in someone else's cart is `Forbidden`; a line that no longer exists
/// or whose cart was already checked out is `NotFound`.
async fn owned_line<T>(
    tx: &mut T,
    user_id: UserId,
    item_id: CartItemId,
) -> Result<CartItem, CheckoutError>
where
    T: CartStore + Send,
{
    let owned = tx
        .owned_item(item_id)
        .await?
        .filter(|owned| owned.cart_status == CartStatus::Active)
        .ok_or(CheckoutError::NotFound {
            entity: Entity::CartItem,
            id: item_id.into_inner(),
        })?;

    if owned.owner != user_id {
        warn!(
            user = %user_id,
            item = %item_id,
            "[cart.ownership] cart item belongs to another user"
        );
        return Err(CheckoutError::Forbidden {
            entity: Entity::CartItem,
        });
    }

    Ok(owned.item)
}

pub(crate) async fn cart_view<T>(tx: &mut T, cart_id: CartId) -> Result<CartView, CheckoutError>
where
    T: CartStore + ProductCatalog + Send,
{
    let items = tx.items(cart_id).await?;
    let mut lines = Vec::with_capacity(items.len());
    for item in items {
        let product = tx.product(item.product_id).await?.ok_or_else(|| {
            StoreError::corrupt(
                Entity::CartItem,
                format!("item {} references missing product", item.id),
            )
        })?;
        lines.push((item, product.name));
    }

    CartView::from_lines(lines)
        .ok_or_else(|| CheckoutError::validation("total", "cart total overflows"))
}
