//! Storage capability traits and the unit-of-work abstraction.
//!
//! Each trait covers one entity's storage needs. A backend exposes all of them
//! on a single transaction type, obtained from [`TransactionCoordinator::begin`].
//! Every call made through that value belongs to one atomic boundary: it is
//! either committed with [`UnitOfWork::commit`] or discarded. Dropping an
//! uncommitted transaction (an error propagated with `?`, a canceled request
//! future) rolls it back.
//!
//! Implementations include:
//! - `ordercore-postgres`: production PostgreSQL backend with row locks
//! - `ordercore-memory`: in-memory backend for testing

use std::future::Future;

use crate::errors::StoreError;
use crate::model::{
    AuditEntry, Cart, CartItem, InventoryAdjustment, NewAuditEntry, NewOrder, NewOrderItem, Order,
    OrderFilter, OrderItem, OwnedCartItem, Product,
};
use crate::types::{
    AddressId, AdjustmentReason, CartId, CartItemId, IdempotencyKey, Money, OrderId, OrderStatus,
    ProductId, Quantity, ResourceType, StockLevel, UserId,
};

/// Race-free stock mutation primitives.
///
/// These are the only writes to `Product.stock`. None of them may be built as
/// "read stock, check in application code, write back".
pub trait InventoryLedger {
    /// Decrement stock by `quantity` only if at least `quantity` units remain.
    ///
    /// Evaluated and applied as one storage operation. Returns `false` with no
    /// mutation when stock is insufficient or the product row does not exist.
    fn decrease_if_enough(
        &mut self,
        product_id: ProductId,
        quantity: Quantity,
    ) -> impl Future<Output = Result<bool, StoreError>> + Send;

    /// Unconditional atomic increment. `NotFound` if the product row is missing.
    fn increase_stock(
        &mut self,
        product_id: ProductId,
        quantity: Quantity,
    ) -> impl Future<Output = Result<StockLevel, StoreError>> + Send;

    /// Lock the product's stock, write `new_stock`, and append an adjustment
    /// recording `new_stock - old_stock`. Returns the adjustment and the old level.
    fn set_stock_with_adjustment(
        &mut self,
        admin_id: UserId,
        product_id: ProductId,
        new_stock: StockLevel,
        reason: AdjustmentReason,
    ) -> impl Future<Output = Result<(InventoryAdjustment, StockLevel), StoreError>> + Send;

    /// Append an adjustment row without touching stock (used with `increase_stock`).
    fn record_adjustment(
        &mut self,
        admin_id: UserId,
        product_id: ProductId,
        delta: i32,
        reason: AdjustmentReason,
    ) -> impl Future<Output = Result<InventoryAdjustment, StoreError>> + Send;
}

/// Per-user active cart lifecycle and line-item mutation.
pub trait CartStore {
    /// Row-locked lookup of the user's ACTIVE cart, inserting one if absent.
    ///
    /// A concurrent first-time call that wins the insert is not an error: the
    /// loser re-queries and returns the winner's row.
    fn get_or_create_active_cart(
        &mut self,
        user_id: UserId,
    ) -> impl Future<Output = Result<Cart, StoreError>> + Send;

    /// Row-locked lookup of the user's ACTIVE cart without creating one.
    fn lock_active_cart(
        &mut self,
        user_id: UserId,
    ) -> impl Future<Output = Result<Option<Cart>, StoreError>> + Send;

    /// Merge-add: increment an existing (cart, product) line by `quantity`,
    /// keeping its original price snapshot, or insert a new line at `unit_price`.
    fn add_item(
        &mut self,
        cart_id: CartId,
        product_id: ProductId,
        quantity: Quantity,
        unit_price: Money,
    ) -> impl Future<Output = Result<CartItem, StoreError>> + Send;

    /// All lines of a cart, ascending by item id.
    fn items(
        &mut self,
        cart_id: CartId,
    ) -> impl Future<Output = Result<Vec<CartItem>, StoreError>> + Send;

    /// Row-locked lookup of a line together with its cart's owner and status.
    fn owned_item(
        &mut self,
        item_id: CartItemId,
    ) -> impl Future<Output = Result<Option<OwnedCartItem>, StoreError>> + Send;

    /// Overwrite a line's quantity. The caller has already checked ownership.
    fn update_item_quantity(
        &mut self,
        item_id: CartItemId,
        quantity: Quantity,
    ) -> impl Future<Output = Result<CartItem, StoreError>> + Send;

    /// Delete a line. The caller has already checked ownership.
    fn delete_item(
        &mut self,
        item_id: CartItemId,
    ) -> impl Future<Output = Result<(), StoreError>> + Send;

    /// Delete every line of a cart.
    fn clear(&mut self, cart_id: CartId) -> impl Future<Output = Result<(), StoreError>> + Send;

    /// Mark the cart CHECKED_OUT and delete its lines as one storage step.
    fn check_out(
        &mut self,
        cart_id: CartId,
    ) -> impl Future<Output = Result<(), StoreError>> + Send;
}

/// Order and order-line persistence.
pub trait OrderRepository {
    fn find_by_idempotency_key(
        &mut self,
        user_id: UserId,
        key: &IdempotencyKey,
    ) -> impl Future<Output = Result<Option<Order>, StoreError>> + Send;

    /// Insert a PENDING order.
    ///
    /// Fails with [`StoreError::UniqueViolation`] when `(user_id, idempotency_key)`
    /// already exists, including when a concurrent transaction holds it.
    fn insert_order(
        &mut self,
        order: NewOrder,
    ) -> impl Future<Output = Result<Order, StoreError>> + Send;

    fn insert_items(
        &mut self,
        order_id: OrderId,
        items: Vec<NewOrderItem>,
    ) -> impl Future<Output = Result<Vec<OrderItem>, StoreError>> + Send;

    fn find_order(
        &mut self,
        order_id: OrderId,
    ) -> impl Future<Output = Result<Option<Order>, StoreError>> + Send;

    /// Row-locked lookup; holds the order until the transaction ends.
    fn lock_order(
        &mut self,
        order_id: OrderId,
    ) -> impl Future<Output = Result<Option<Order>, StoreError>> + Send;

    /// Order lines ascending by product id.
    fn order_items(
        &mut self,
        order_id: OrderId,
    ) -> impl Future<Output = Result<Vec<OrderItem>, StoreError>> + Send;

    fn set_status(
        &mut self,
        order_id: OrderId,
        status: OrderStatus,
    ) -> impl Future<Output = Result<Order, StoreError>> + Send;

    /// A user's orders, newest first.
    fn orders_for_user(
        &mut self,
        user_id: UserId,
    ) -> impl Future<Output = Result<Vec<Order>, StoreError>> + Send;

    /// Orders matching `filter`, newest first, one page.
    fn list_orders(
        &mut self,
        filter: &OrderFilter,
    ) -> impl Future<Output = Result<Vec<Order>, StoreError>> + Send;
}

/// Read access to the catalog collaborator's products.
pub trait ProductCatalog {
    fn product(
        &mut self,
        product_id: ProductId,
    ) -> impl Future<Output = Result<Option<Product>, StoreError>> + Send;
}

/// Read access to the address book collaborator.
pub trait AddressDirectory {
    /// Owner of the address, or `None` if it does not exist.
    fn address_owner(
        &mut self,
        address_id: AddressId,
    ) -> impl Future<Output = Result<Option<UserId>, StoreError>> + Send;
}

/// Append-only administrative audit log.
pub trait AuditTrail {
    fn append_audit(
        &mut self,
        entry: NewAuditEntry,
    ) -> impl Future<Output = Result<AuditEntry, StoreError>> + Send;

    /// Entries for one resource, oldest first.
    fn audit_entries(
        &mut self,
        resource_type: ResourceType,
        resource_id: i64,
    ) -> impl Future<Output = Result<Vec<AuditEntry>, StoreError>> + Send;
}

/// One atomic boundary. Consumed by `commit` or `rollback`; dropping it rolls back.
pub trait UnitOfWork: Sized + Send {
    fn commit(self) -> impl Future<Output = Result<(), StoreError>> + Send;

    fn rollback(self) -> impl Future<Output = Result<(), StoreError>> + Send;
}

/// Hands out transaction-scoped views of every store.
///
/// The coordinator is the injected storage dependency of every service; there
/// is no process-wide handle and no ambient "current transaction".
pub trait TransactionCoordinator: Send + Sync {
    /// The transaction-bound bundle of repositories.
    type Tx: UnitOfWork
        + InventoryLedger
        + CartStore
        + OrderRepository
        + ProductCatalog
        + AddressDirectory
        + AuditTrail
        + Send;

    fn begin(&self) -> impl Future<Output = Result<Self::Tx, StoreError>> + Send;
}
