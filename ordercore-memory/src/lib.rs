//! In-memory storage backend for ordercore.
//!
//! Every table lives behind one async mutex. [`InMemoryStore::begin`] takes the
//! lock and works on a private copy of the tables; commit writes the copy back
//! and dropping the transaction discards it. Transactions are therefore fully
//! serialized, which makes the conditional decrement, merge-add and
//! idempotency-key uniqueness race-free by construction.
//!
//! Intended for tests and local development. Uniqueness rules that a SQL
//! schema would enforce (one ACTIVE cart per user, one line per cart and
//! product, one order per user and key) are checked here explicitly.

#![forbid(unsafe_code)]
#![allow(clippy::significant_drop_tightening)]

use std::collections::BTreeMap;
use std::sync::Arc;

use chrono::Utc;
use ordercore::{
    AddressDirectory, AddressId, AdjustmentId, AdjustmentReason, AuditEntry, AuditEntryId,
    AuditTrail, Cart, CartId, CartItem, CartItemId, CartStatus, CartStore, Entity,
    IdempotencyKey, InventoryAdjustment, InventoryLedger, Money, NewAuditEntry, NewOrder,
    NewOrderItem, Operation, Order, OrderFilter, OrderId, OrderItem, OrderItemId,
    OrderRepository, OrderStatus, OwnedCartItem, Product, ProductCatalog, ProductId, Quantity,
    ResourceType, StockLevel, StoreError, TransactionCoordinator, UnitOfWork, UserId,
};
use tokio::sync::{Mutex, OwnedMutexGuard};
use tracing::{debug, instrument};

/// Constraint names reported on uniqueness violations, matching the SQL schema.
pub const ORDERS_IDEMPOTENCY_CONSTRAINT: &str = "orders_user_id_idempotency_key_key";

#[derive(Debug, Clone, Default)]
struct Tables {
    products: BTreeMap<ProductId, Product>,
    addresses: BTreeMap<AddressId, UserId>,
    carts: BTreeMap<CartId, Cart>,
    cart_items: BTreeMap<CartItemId, CartItem>,
    orders: BTreeMap<OrderId, Order>,
    order_items: BTreeMap<OrderItemId, OrderItem>,
    adjustments: Vec<InventoryAdjustment>,
    audit_log: Vec<AuditEntry>,
    last_id: i64,
}

impl Tables {
    fn next_id(&mut self) -> i64 {
        self.last_id += 1;
        self.last_id
    }

    fn active_cart(&self, user_id: UserId) -> Option<&Cart> {
        self.carts
            .values()
            .find(|cart| cart.user_id == user_id && cart.status == CartStatus::Active)
    }

    fn product_mut(&mut self, product_id: ProductId) -> Result<&mut Product, StoreError> {
        self.products
            .get_mut(&product_id)
            .ok_or(StoreError::NotFound {
                entity: Entity::Product,
                id: product_id.into_inner(),
            })
    }

    fn push_adjustment(
        &mut self,
        admin_id: UserId,
        product_id: ProductId,
        delta: i32,
        reason: AdjustmentReason,
    ) -> InventoryAdjustment {
        let adjustment = InventoryAdjustment {
            id: AdjustmentId::new(self.next_id()),
            product_id,
            admin_id,
            delta,
            reason,
            created_at: Utc::now(),
        };
        self.adjustments.push(adjustment.clone());
        adjustment
    }
}

/// Newest first, ties broken by id so equal timestamps still order stably.
fn newest_first(orders: &mut [Order]) {
    orders.sort_by(|a, b| b.created_at.cmp(&a.created_at).then(b.id.cmp(&a.id)));
}

/// Thread-safe in-memory store.
///
/// Cloning is cheap and every clone shares the same tables.
#[derive(Debug, Clone, Default)]
pub struct InMemoryStore {
    tables: Arc<Mutex<Tables>>,
}

impl InMemoryStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a product to the catalog.
    pub async fn insert_product(
        &self,
        name: impl Into<String>,
        price: Money,
        stock: StockLevel,
    ) -> ProductId {
        let mut tables = self.tables.lock().await;
        let id = ProductId::new(tables.next_id());
        let _ = tables.products.insert(
            id,
            Product {
                id,
                name: name.into(),
                price,
                stock,
                active: true,
                deleted_at: None,
            },
        );
        id
    }

    /// Add an address owned by `user_id`.
    pub async fn insert_address(&self, user_id: UserId) -> AddressId {
        let mut tables = self.tables.lock().await;
        let id = AddressId::new(tables.next_id());
        let _ = tables.addresses.insert(id, user_id);
        id
    }

    /// Toggle whether a product can be bought. Returns `false` if it does not exist.
    pub async fn set_product_active(&self, product_id: ProductId, active: bool) -> bool {
        let mut tables = self.tables.lock().await;
        let Some(product) = tables.products.get_mut(&product_id) else {
            return false;
        };
        product.active = active;
        true
    }

    /// Change a product's catalog price. Returns `false` if it does not exist.
    pub async fn set_product_price(&self, product_id: ProductId, price: Money) -> bool {
        let mut tables = self.tables.lock().await;
        let Some(product) = tables.products.get_mut(&product_id) else {
            return false;
        };
        product.price = price;
        true
    }

    /// Soft-delete a product. Returns `false` if it does not exist.
    pub async fn soft_delete_product(&self, product_id: ProductId) -> bool {
        let mut tables = self.tables.lock().await;
        let Some(product) = tables.products.get_mut(&product_id) else {
            return false;
        };
        product.deleted_at = Some(Utc::now());
        true
    }

    /// Committed state of a product.
    pub async fn product_snapshot(&self, product_id: ProductId) -> Option<Product> {
        self.tables.lock().await.products.get(&product_id).cloned()
    }

    /// Number of ACTIVE carts the user has. Never more than one.
    pub async fn active_cart_count(&self, user_id: UserId) -> usize {
        self.tables
            .lock()
            .await
            .carts
            .values()
            .filter(|cart| cart.user_id == user_id && cart.status == CartStatus::Active)
            .count()
    }

    /// Number of orders stored under `(user_id, key)`. Never more than one.
    pub async fn orders_with_key(&self, user_id: UserId, key: &IdempotencyKey) -> usize {
        self.tables
            .lock()
            .await
            .orders
            .values()
            .filter(|order| order.user_id == user_id && &order.idempotency_key == key)
            .count()
    }

    /// Total number of committed orders.
    pub async fn order_count(&self) -> usize {
        self.tables.lock().await.orders.len()
    }

    /// Committed adjustments for a product, oldest first.
    pub async fn adjustments_for(&self, product_id: ProductId) -> Vec<InventoryAdjustment> {
        self.tables
            .lock()
            .await
            .adjustments
            .iter()
            .filter(|adjustment| adjustment.product_id == product_id)
            .cloned()
            .collect()
    }

    /// Committed lines of every cart the user has ever had.
    pub async fn cart_items_for(&self, user_id: UserId) -> Vec<CartItem> {
        let tables = self.tables.lock().await;
        tables
            .cart_items
            .values()
            .filter(|item| {
                tables
                    .carts
                    .get(&item.cart_id)
                    .is_some_and(|cart| cart.user_id == user_id)
            })
            .cloned()
            .collect()
    }
}

impl InMemoryStore {
    /// Put a line straight into the user's active cart at the product's current
    /// price, skipping the add-time stock check. `None` if the product is missing.
    pub async fn seed_cart_line(
        &self,
        user_id: UserId,
        product_id: ProductId,
        quantity: Quantity,
    ) -> Option<CartItemId> {
        let mut tables = self.tables.lock().await;
        let unit_price = tables.products.get(&product_id)?.price;
        let cart_id = match tables.active_cart(user_id) {
            Some(cart) => cart.id,
            None => {
                let id = CartId::new(tables.next_id());
                let now = Utc::now();
                let _ = tables.carts.insert(
                    id,
                    Cart {
                        id,
                        user_id,
                        status: CartStatus::Active,
                        created_at: now,
                        updated_at: now,
                    },
                );
                id
            }
        };

        let id = CartItemId::new(tables.next_id());
        let now = Utc::now();
        let _ = tables.cart_items.insert(
            id,
            CartItem {
                id,
                cart_id,
                product_id,
                quantity,
                unit_price,
                created_at: now,
                updated_at: now,
            },
        );
        Some(id)
    }
}

impl TransactionCoordinator for InMemoryStore {
    type Tx = InMemoryTransaction;

    #[instrument(name = "memory.begin", skip(self), level = "trace")]
    async fn begin(&self) -> Result<Self::Tx, StoreError> {
        let guard = Arc::clone(&self.tables).lock_owned().await;
        let working = (*guard).clone();
        Ok(InMemoryTransaction { guard, working })
    }
}

/// An open in-memory transaction.
///
/// Holds the store lock until committed or dropped; all reads and writes go to
/// a private copy of the tables.
#[derive(Debug)]
pub struct InMemoryTransaction {
    guard: OwnedMutexGuard<Tables>,
    working: Tables,
}

impl UnitOfWork for InMemoryTransaction {
    async fn commit(self) -> Result<(), StoreError> {
        let Self { mut guard, working } = self;
        *guard = working;
        debug!("[memory.commit] transaction committed");
        Ok(())
    }

    async fn rollback(self) -> Result<(), StoreError> {
        debug!("[memory.rollback] transaction discarded");
        Ok(())
    }
}

impl InventoryLedger for InMemoryTransaction {
    async fn decrease_if_enough(
        &mut self,
        product_id: ProductId,
        quantity: Quantity,
    ) -> Result<bool, StoreError> {
        let Some(product) = self
            .working
            .products
            .get_mut(&product_id)
            .filter(|product| product.deleted_at.is_none())
        else {
            return Ok(false);
        };
        if !product.stock.covers(quantity) {
            return Ok(false);
        }

        product.stock = StockLevel::try_new(product.stock.into_inner() - quantity.into_inner())
            .map_err(|error| StoreError::corrupt(Entity::Product, error))?;
        Ok(true)
    }

    async fn increase_stock(
        &mut self,
        product_id: ProductId,
        quantity: Quantity,
    ) -> Result<StockLevel, StoreError> {
        let product = self.working.product_mut(product_id)?;
        let raised = product
            .stock
            .into_inner()
            .checked_add(quantity.into_inner())
            .ok_or(StoreError::StoreFailure {
                operation: Operation::IncreaseStock,
            })?;
        product.stock = StockLevel::try_new(raised)
            .map_err(|error| StoreError::corrupt(Entity::Product, error))?;
        Ok(product.stock)
    }

    async fn set_stock_with_adjustment(
        &mut self,
        admin_id: UserId,
        product_id: ProductId,
        new_stock: StockLevel,
        reason: AdjustmentReason,
    ) -> Result<(InventoryAdjustment, StockLevel), StoreError> {
        let product = self.working.product_mut(product_id)?;
        let old_stock = product.stock;
        product.stock = new_stock;

        let adjustment = self.working.push_adjustment(
            admin_id,
            product_id,
            new_stock.delta_from(old_stock),
            reason,
        );
        Ok((adjustment, old_stock))
    }

    async fn record_adjustment(
        &mut self,
        admin_id: UserId,
        product_id: ProductId,
        delta: i32,
        reason: AdjustmentReason,
    ) -> Result<InventoryAdjustment, StoreError> {
        let _ = self.working.product_mut(product_id)?;
        Ok(self
            .working
            .push_adjustment(admin_id, product_id, delta, reason))
    }
}

impl CartStore for InMemoryTransaction {
    async fn get_or_create_active_cart(&mut self, user_id: UserId) -> Result<Cart, StoreError> {
        if let Some(cart) = self.working.active_cart(user_id) {
            return Ok(cart.clone());
        }

        let now = Utc::now();
        let cart = Cart {
            id: CartId::new(self.working.next_id()),
            user_id,
            status: CartStatus::Active,
            created_at: now,
            updated_at: now,
        };
        let _ = self.working.carts.insert(cart.id, cart.clone());
        Ok(cart)
    }

    async fn lock_active_cart(&mut self, user_id: UserId) -> Result<Option<Cart>, StoreError> {
        Ok(self.working.active_cart(user_id).cloned())
    }

    async fn add_item(
        &mut self,
        cart_id: CartId,
        product_id: ProductId,
        quantity: Quantity,
        unit_price: Money,
    ) -> Result<CartItem, StoreError> {
        let now = Utc::now();

        if let Some(existing) = self
            .working
            .cart_items
            .values_mut()
            .find(|item| item.cart_id == cart_id && item.product_id == product_id)
        {
            let merged = existing
                .quantity
                .into_inner()
                .checked_add(quantity.into_inner())
                .ok_or(StoreError::StoreFailure {
                    operation: Operation::AddCartItem,
                })?;
            existing.quantity = Quantity::try_new(merged)
                .map_err(|error| StoreError::corrupt(Entity::CartItem, error))?;
            existing.updated_at = now;
            return Ok(existing.clone());
        }

        let item = CartItem {
            id: CartItemId::new(self.working.next_id()),
            cart_id,
            product_id,
            quantity,
            unit_price,
            created_at: now,
            updated_at: now,
        };
        let _ = self.working.cart_items.insert(item.id, item.clone());
        Ok(item)
    }

    async fn items(&mut self, cart_id: CartId) -> Result<Vec<CartItem>, StoreError> {
        Ok(self
            .working
            .cart_items
            .values()
            .filter(|item| item.cart_id == cart_id)
            .cloned()
            .collect())
    }

    async fn owned_item(
        &mut self,
        item_id: CartItemId,
    ) -> Result<Option<OwnedCartItem>, StoreError> {
        let Some(item) = self.working.cart_items.get(&item_id) else {
            return Ok(None);
        };
        let cart = self
            .working
            .carts
            .get(&item.cart_id)
            .ok_or_else(|| StoreError::corrupt(Entity::CartItem, "line without a cart"))?;

        Ok(Some(OwnedCartItem {
            item: item.clone(),
            owner: cart.user_id,
            cart_status: cart.status,
        }))
    }

    async fn update_item_quantity(
        &mut self,
        item_id: CartItemId,
        quantity: Quantity,
    ) -> Result<CartItem, StoreError> {
        let item = self
            .working
            .cart_items
            .get_mut(&item_id)
            .ok_or(StoreError::NotFound {
                entity: Entity::CartItem,
                id: item_id.into_inner(),
            })?;
        item.quantity = quantity;
        item.updated_at = Utc::now();
        Ok(item.clone())
    }

    async fn delete_item(&mut self, item_id: CartItemId) -> Result<(), StoreError> {
        self.working
            .cart_items
            .remove(&item_id)
            .map(|_| ())
            .ok_or(StoreError::NotFound {
                entity: Entity::CartItem,
                id: item_id.into_inner(),
            })
    }

    async fn clear(&mut self, cart_id: CartId) -> Result<(), StoreError> {
        self.working
            .cart_items
            .retain(|_, item| item.cart_id != cart_id);
        Ok(())
    }

    async fn check_out(&mut self, cart_id: CartId) -> Result<(), StoreError> {
        let cart = self
            .working
            .carts
            .get_mut(&cart_id)
            .ok_or(StoreError::NotFound {
                entity: Entity::Cart,
                id: cart_id.into_inner(),
            })?;
        cart.status = CartStatus::CheckedOut;
        cart.updated_at = Utc::now();

        self.working
            .cart_items
            .retain(|_, item| item.cart_id != cart_id);
        Ok(())
    }
}

impl OrderRepository for InMemoryTransaction {
    async fn find_by_idempotency_key(
        &mut self,
        user_id: UserId,
        key: &IdempotencyKey,
    ) -> Result<Option<Order>, StoreError> {
        Ok(self
            .working
            .orders
            .values()
            .find(|order| order.user_id == user_id && &order.idempotency_key == key)
            .cloned())
    }

    async fn insert_order(&mut self, order: NewOrder) -> Result<Order, StoreError> {
        let taken = self.working.orders.values().any(|existing| {
            existing.user_id == order.user_id && existing.idempotency_key == order.idempotency_key
        });
        if taken {
            return Err(StoreError::UniqueViolation {
                constraint: ORDERS_IDEMPOTENCY_CONSTRAINT,
            });
        }

        let now = Utc::now();
        let stored = Order {
            id: OrderId::new(self.working.next_id()),
            user_id: order.user_id,
            address_id: order.address_id,
            status: OrderStatus::Pending,
            total_price: order.total_price,
            idempotency_key: order.idempotency_key,
            created_at: now,
            updated_at: now,
        };
        let _ = self.working.orders.insert(stored.id, stored.clone());
        Ok(stored)
    }

    async fn insert_items(
        &mut self,
        order_id: OrderId,
        items: Vec<NewOrderItem>,
    ) -> Result<Vec<OrderItem>, StoreError> {
        if !self.working.orders.contains_key(&order_id) {
            return Err(StoreError::NotFound {
                entity: Entity::Order,
                id: order_id.into_inner(),
            });
        }

        let mut stored = Vec::with_capacity(items.len());
        for item in items {
            let line = OrderItem {
                id: OrderItemId::new(self.working.next_id()),
                order_id,
                product_id: item.product_id,
                product_name: item.product_name,
                unit_price: item.unit_price,
                quantity: item.quantity,
            };
            let _ = self.working.order_items.insert(line.id, line.clone());
            stored.push(line);
        }
        Ok(stored)
    }

    async fn find_order(&mut self, order_id: OrderId) -> Result<Option<Order>, StoreError> {
        Ok(self.working.orders.get(&order_id).cloned())
    }

    async fn lock_order(&mut self, order_id: OrderId) -> Result<Option<Order>, StoreError> {
        Ok(self.working.orders.get(&order_id).cloned())
    }

    async fn order_items(&mut self, order_id: OrderId) -> Result<Vec<OrderItem>, StoreError> {
        let mut items: Vec<OrderItem> = self
            .working
            .order_items
            .values()
            .filter(|item| item.order_id == order_id)
            .cloned()
            .collect();
        items.sort_by_key(|item| (item.product_id, item.id));
        Ok(items)
    }

    async fn set_status(
        &mut self,
        order_id: OrderId,
        status: OrderStatus,
    ) -> Result<Order, StoreError> {
        let order = self
            .working
            .orders
            .get_mut(&order_id)
            .ok_or(StoreError::NotFound {
                entity: Entity::Order,
                id: order_id.into_inner(),
            })?;
        order.status = status;
        order.updated_at = Utc::now();
        Ok(order.clone())
    }

    async fn orders_for_user(&mut self, user_id: UserId) -> Result<Vec<Order>, StoreError> {
        let mut orders: Vec<Order> = self
            .working
            .orders
            .values()
            .filter(|order| order.user_id == user_id)
            .cloned()
            .collect();
        newest_first(&mut orders);
        Ok(orders)
    }

    async fn list_orders(&mut self, filter: &OrderFilter) -> Result<Vec<Order>, StoreError> {
        let mut orders: Vec<Order> = self
            .working
            .orders
            .values()
            .filter(|order| filter.matches(order))
            .cloned()
            .collect();
        newest_first(&mut orders);

        let offset = usize::try_from(filter.offset()).unwrap_or(usize::MAX);
        let limit = usize::try_from(filter.limit.into_inner()).unwrap_or(usize::MAX);
        Ok(orders.into_iter().skip(offset).take(limit).collect())
    }
}

impl ProductCatalog for InMemoryTransaction {
    async fn product(&mut self, product_id: ProductId) -> Result<Option<Product>, StoreError> {
        Ok(self.working.products.get(&product_id).cloned())
    }
}

impl AddressDirectory for InMemoryTransaction {
    async fn address_owner(&mut self, address_id: AddressId) -> Result<Option<UserId>, StoreError> {
        Ok(self.working.addresses.get(&address_id).copied())
    }
}

impl AuditTrail for InMemoryTransaction {
    async fn append_audit(&mut self, entry: NewAuditEntry) -> Result<AuditEntry, StoreError> {
        let stored = AuditEntry {
            id: AuditEntryId::new(self.working.next_id()),
            actor_id: entry.actor_id,
            action: entry.action,
            resource_type: entry.resource_type,
            resource_id: entry.resource_id,
            before: entry.before,
            after: entry.after,
            created_at: Utc::now(),
        };
        self.working.audit_log.push(stored.clone());
        Ok(stored)
    }

    async fn audit_entries(
        &mut self,
        resource_type: ResourceType,
        resource_id: i64,
    ) -> Result<Vec<AuditEntry>, StoreError> {
        Ok(self
            .working
            .audit_log
            .iter()
            .filter(|entry| entry.resource_type == resource_type && entry.resource_id == resource_id)
            .cloned()
            .collect())
    }
}
