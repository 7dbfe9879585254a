//! The public surface consumed by the HTTP collaborator.
//!
//! [`Checkout`] takes raw request values, validates them into domain types and
//! dispatches to the services. Every operation is retried as a whole when it
//! fails with a transient storage error.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::instrument;

use crate::cart::CartService;
use crate::config::CheckoutConfig;
use crate::errors::CheckoutError;
use crate::inventory::InventoryManager;
use crate::lifecycle::OrderLifecycleManager;
use crate::model::{AuditEntry, OrderFilter};
use crate::placement::OrderPlacer;
use crate::queries::CustomerOrders;
use crate::retry::with_retry;
use crate::store::{AuditTrail, TransactionCoordinator, UnitOfWork};
use crate::types::{
    AddressId, AdjustmentReason, CartItemId, IdempotencyKey, OrderId, OrderStatus, PageLimit,
    PageNumber, ProductId, Quantity, ResourceType, StockLevel, UserId,
};
use crate::views::{CartView, OrderView};

/// Admin order listing request as it arrives from a query string.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderQuery {
    pub status: Option<String>,
    pub user_id: Option<UserId>,
    /// Inclusive lower bound on `created_at`.
    pub from: Option<DateTime<Utc>>,
    /// Exclusive upper bound on `created_at`.
    pub to: Option<DateTime<Utc>>,
    #[serde(default = "default_page")]
    pub page: u32,
    #[serde(default = "default_limit")]
    pub limit: u32,
}

const fn default_page() -> u32 {
    1
}

const fn default_limit() -> u32 {
    20
}

impl Default for OrderQuery {
    fn default() -> Self {
        Self {
            status: None,
            user_id: None,
            from: None,
            to: None,
            page: default_page(),
            limit: default_limit(),
        }
    }
}

impl TryFrom<OrderQuery> for OrderFilter {
    type Error = CheckoutError;

    fn try_from(query: OrderQuery) -> Result<Self, Self::Error> {
        let status = query
            .status
            .as_deref()
            .map(str::parse::<OrderStatus>)
            .transpose()
            .map_err(|error| CheckoutError::validation("status", error))?;

        Ok(Self {
            status,
            user_id: query.user_id,
            created_from: query.from,
            created_before: query.to,
            page: PageNumber::try_new(query.page)
                .map_err(|error| CheckoutError::validation("page", error))?,
            limit: PageLimit::try_new(query.limit)
                .map_err(|error| CheckoutError::validation("limit", error))?,
        })
    }
}

/// Entry point to every ordercore operation.
///
/// Holds an injected storage handle; clone the store, not the facade, to share
/// it between tasks.
#[derive(Debug, Clone)]
pub struct Checkout<S> {
    store: S,
    config: CheckoutConfig,
    carts: CartService<S>,
    placer: OrderPlacer<S>,
    lifecycle: OrderLifecycleManager<S>,
    inventory: InventoryManager<S>,
    orders: CustomerOrders<S>,
}

impl<S> Checkout<S>
where
    S: TransactionCoordinator + Clone,
{
    pub fn new(store: S, config: CheckoutConfig) -> Self {
        Self {
            carts: CartService::new(store.clone()),
            placer: OrderPlacer::new(store.clone()),
            lifecycle: OrderLifecycleManager::new(store.clone()),
            inventory: InventoryManager::new(store.clone()),
            orders: CustomerOrders::new(store.clone()),
            store,
            config,
        }
    }

    pub const fn config(&self) -> &CheckoutConfig {
        &self.config
    }

    #[instrument(name = "checkout.place_order_request", skip(self, idempotency_key))]
    pub async fn place_order(
        &self,
        user_id: UserId,
        address_id: AddressId,
        idempotency_key: &str,
    ) -> Result<OrderView, CheckoutError> {
        let key = IdempotencyKey::try_new(idempotency_key)
            .map_err(|error| CheckoutError::validation("idempotency_key", error))?;
        let key = &key;

        with_retry(&self.config.retry, "place_order", move || {
            self.placer.place_order(user_id, address_id, key)
        })
        .await
    }

    pub async fn get_cart(&self, user_id: UserId) -> Result<CartView, CheckoutError> {
        with_retry(&self.config.retry, "get_cart", move || {
            self.carts.get_cart(user_id)
        })
        .await
    }

    pub async fn add_cart_item(
        &self,
        user_id: UserId,
        product_id: ProductId,
        quantity: i32,
    ) -> Result<CartView, CheckoutError> {
        let quantity = parse_quantity(quantity)?;
        with_retry(&self.config.retry, "add_cart_item", move || {
            self.carts.add_item(user_id, product_id, quantity)
        })
        .await
    }

    pub async fn update_cart_item(
        &self,
        user_id: UserId,
        item_id: CartItemId,
        quantity: i32,
    ) -> Result<CartView, CheckoutError> {
        let quantity = parse_quantity(quantity)?;
        with_retry(&self.config.retry, "update_cart_item", move || {
            self.carts.update_item(user_id, item_id, quantity)
        })
        .await
    }

    pub async fn delete_cart_item(
        &self,
        user_id: UserId,
        item_id: CartItemId,
    ) -> Result<CartView, CheckoutError> {
        with_retry(&self.config.retry, "delete_cart_item", move || {
            self.carts.delete_item(user_id, item_id)
        })
        .await
    }

    pub async fn clear_cart(&self, user_id: UserId) -> Result<CartView, CheckoutError> {
        with_retry(&self.config.retry, "clear_cart", move || {
            self.carts.clear(user_id)
        })
        .await
    }

    pub async fn list_my_orders(&self, user_id: UserId) -> Result<Vec<OrderView>, CheckoutError> {
        with_retry(&self.config.retry, "list_my_orders", move || {
            self.orders.list_my_orders(user_id)
        })
        .await
    }

    pub async fn get_my_order(
        &self,
        user_id: UserId,
        order_id: OrderId,
    ) -> Result<OrderView, CheckoutError> {
        with_retry(&self.config.retry, "get_my_order", move || {
            self.orders.get_my_order(user_id, order_id)
        })
        .await
    }

    pub async fn admin_list_orders(
        &self,
        query: OrderQuery,
    ) -> Result<Vec<OrderView>, CheckoutError> {
        let filter = OrderFilter::try_from(query)?;
        let filter = &filter;
        with_retry(&self.config.retry, "admin_list_orders", move || {
            self.lifecycle.list_orders(filter)
        })
        .await
    }

    /// `new_status` is the upper-case wire name, matched case-sensitively.
    pub async fn admin_update_order_status(
        &self,
        admin_id: UserId,
        order_id: OrderId,
        new_status: &str,
    ) -> Result<(), CheckoutError> {
        let new_status: OrderStatus = new_status
            .parse()
            .map_err(|error| CheckoutError::validation("status", error))?;
        with_retry(&self.config.retry, "admin_update_order_status", move || {
            self.lifecycle.update_status(admin_id, order_id, new_status)
        })
        .await
    }

    pub async fn admin_set_inventory(
        &self,
        admin_id: UserId,
        product_id: ProductId,
        new_stock: i32,
        reason: &str,
    ) -> Result<(), CheckoutError> {
        let new_stock = StockLevel::try_new(new_stock)
            .map_err(|error| CheckoutError::validation("stock", error))?;
        let reason = parse_reason(reason)?;
        let reason = &reason;
        with_retry(&self.config.retry, "admin_set_inventory", move || {
            self.inventory
                .set_inventory(admin_id, product_id, new_stock, reason.clone())
        })
        .await
    }

    pub async fn admin_restock(
        &self,
        admin_id: UserId,
        product_id: ProductId,
        quantity: i32,
        reason: &str,
    ) -> Result<(), CheckoutError> {
        let quantity = parse_quantity(quantity)?;
        let reason = parse_reason(reason)?;
        let reason = &reason;
        with_retry(&self.config.retry, "admin_restock", move || {
            self.inventory
                .restock(admin_id, product_id, quantity, reason.clone())
        })
        .await
    }

    /// Audit entries for one resource, oldest first.
    #[instrument(name = "checkout.audit_trail", skip(self))]
    pub async fn audit_trail(
        &self,
        resource_type: ResourceType,
        resource_id: i64,
    ) -> Result<Vec<AuditEntry>, CheckoutError> {
        let mut tx = self.store.begin().await?;
        let entries = tx.audit_entries(resource_type, resource_id).await?;
        tx.commit().await?;
        Ok(entries)
    }
}

fn parse_quantity(quantity: i32) -> Result<Quantity, CheckoutError> {
    Quantity::try_new(quantity).map_err(|error| CheckoutError::validation("quantity", error))
}

fn parse_reason(reason: &str) -> Result<AdjustmentReason, CheckoutError> {
    AdjustmentReason::try_new(reason).map_err(|error| CheckoutError::validation("reason", error))
}
