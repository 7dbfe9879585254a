use std::fmt;

use ordercore::{
    AddressDirectory, AddressId, AdjustmentReason, AuditEntry, AuditTrail, Cart, CartId, CartItem,
    CartItemId, CartStore, Entity, IdempotencyKey, InventoryAdjustment, InventoryLedger, Money,
    NewAuditEntry, NewOrder, NewOrderItem, Operation, Order, OrderFilter, OrderId, OrderItem,
    OrderRepository, OrderStatus, OwnedCartItem, Product, ProductCatalog, ProductId, Quantity,
    ResourceType, StockLevel, StoreError, UnitOfWork, UserId,
};
use sqlx::types::Json;
use sqlx::{query, Postgres, QueryBuilder, Transaction};
use tracing::{debug, instrument};

use crate::map_sqlx_error;
use crate::rows::{
    self, ADJUSTMENT_COLUMNS, AUDIT_COLUMNS, CART_COLUMNS, CART_ITEM_COLUMNS, ORDER_COLUMNS,
    ORDER_ITEM_COLUMNS, PRODUCT_COLUMNS,
};

/// An open PostgreSQL transaction exposing every ordercore store.
///
/// Dropping it without calling [`UnitOfWork::commit`] rolls back.
pub struct PostgresTransaction {
    tx: Transaction<'static, Postgres>,
}

impl fmt::Debug for PostgresTransaction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PostgresTransaction").finish_non_exhaustive()
    }
}

impl PostgresTransaction {
    pub(crate) const fn new(tx: Transaction<'static, Postgres>) -> Self {
        Self { tx }
    }

    async fn insert_adjustment(
        &mut self,
        admin_id: UserId,
        product_id: ProductId,
        delta: i32,
        reason: &AdjustmentReason,
    ) -> Result<InventoryAdjustment, StoreError> {
        let row = query(&format!(
            "INSERT INTO inventory_adjustments (product_id, admin_id, delta, reason)
             VALUES ($1, $2, $3, $4)
             RETURNING {ADJUSTMENT_COLUMNS}"
        ))
        .bind(product_id.into_inner())
        .bind(admin_id.into_inner())
        .bind(delta)
        .bind(reason.as_str())
        .fetch_one(&mut *self.tx)
        .await
        .map_err(|error| map_sqlx_error(error, Operation::SetStock))?;
        rows::adjustment(&row)
    }

    async fn select_active_cart(&mut self, user_id: UserId) -> Result<Option<Cart>, StoreError> {
        let row = query(&format!(
            "SELECT {CART_COLUMNS} FROM carts
             WHERE user_id = $1 AND status = 'ACTIVE'
             FOR UPDATE"
        ))
        .bind(user_id.into_inner())
        .fetch_optional(&mut *self.tx)
        .await
        .map_err(|error| map_sqlx_error(error, Operation::LockCart))?;
        row.as_ref().map(rows::cart).transpose()
    }
}

impl UnitOfWork for PostgresTransaction {
    async fn commit(self) -> Result<(), StoreError> {
        self.tx
            .commit()
            .await
            .map_err(|error| map_sqlx_error(error, Operation::CommitTransaction))
    }

    async fn rollback(self) -> Result<(), StoreError> {
        self.tx
            .rollback()
            .await
            .map_err(|error| map_sqlx_error(error, Operation::RollbackTransaction))
    }
}

impl InventoryLedger for PostgresTransaction {
    #[instrument(name = "postgres.decrease_if_enough", skip(self), level = "debug")]
    async fn decrease_if_enough(
        &mut self,
        product_id: ProductId,
        quantity: Quantity,
    ) -> Result<bool, StoreError> {
        let result = query(
            "UPDATE products
             SET stock = stock - $2, updated_at = now()
             WHERE id = $1 AND stock >= $2 AND deleted_at IS NULL",
        )
        .bind(product_id.into_inner())
        .bind(quantity.into_inner())
        .execute(&mut *self.tx)
        .await
        .map_err(|error| map_sqlx_error(error, Operation::DecreaseStock))?;

        let decremented = result.rows_affected() == 1;
        debug!(
            product = %product_id,
            quantity = %quantity,
            decremented,
            "[postgres.decrease_if_enough] conditional decrement applied"
        );
        Ok(decremented)
    }

    async fn increase_stock(
        &mut self,
        product_id: ProductId,
        quantity: Quantity,
    ) -> Result<StockLevel, StoreError> {
        let row = query(
            "UPDATE products
             SET stock = stock + $2, updated_at = now()
             WHERE id = $1
             RETURNING stock",
        )
        .bind(product_id.into_inner())
        .bind(quantity.into_inner())
        .fetch_optional(&mut *self.tx)
        .await
        .map_err(|error| map_sqlx_error(error, Operation::IncreaseStock))?
        .ok_or(StoreError::NotFound {
            entity: Entity::Product,
            id: product_id.into_inner(),
        })?;
        rows::stock(&row, Entity::Product)
    }

    async fn set_stock_with_adjustment(
        &mut self,
        admin_id: UserId,
        product_id: ProductId,
        new_stock: StockLevel,
        reason: AdjustmentReason,
    ) -> Result<(InventoryAdjustment, StockLevel), StoreError> {
        let row = query("SELECT stock FROM products WHERE id = $1 FOR UPDATE")
            .bind(product_id.into_inner())
            .fetch_optional(&mut *self.tx)
            .await
            .map_err(|error| map_sqlx_error(error, Operation::SetStock))?
            .ok_or(StoreError::NotFound {
                entity: Entity::Product,
                id: product_id.into_inner(),
            })?;
        let old_stock = rows::stock(&row, Entity::Product)?;

        let _ = query("UPDATE products SET stock = $2, updated_at = now() WHERE id = $1")
            .bind(product_id.into_inner())
            .bind(new_stock.into_inner())
            .execute(&mut *self.tx)
            .await
            .map_err(|error| map_sqlx_error(error, Operation::SetStock))?;

        let adjustment = self
            .insert_adjustment(
                admin_id,
                product_id,
                new_stock.delta_from(old_stock),
                &reason,
            )
            .await?;
        Ok((adjustment, old_stock))
    }

    async fn record_adjustment(
        &mut self,
        admin_id: UserId,
        product_id: ProductId,
        delta: i32,
        reason: AdjustmentReason,
    ) -> Result<InventoryAdjustment, StoreError> {
        self.insert_adjustment(admin_id, product_id, delta, &reason)
            .await
    }
}

impl CartStore for PostgresTransaction {
    async fn get_or_create_active_cart(&mut self, user_id: UserId) -> Result<Cart, StoreError> {
        if let Some(cart) = self.select_active_cart(user_id).await? {
            return Ok(cart);
        }

        // A concurrent first access may win the insert; the partial unique
        // index turns ours into a no-op and the re-select returns theirs.
        let inserted = query(&format!(
            "INSERT INTO carts (user_id, status) VALUES ($1, 'ACTIVE')
             ON CONFLICT (user_id) WHERE status = 'ACTIVE' DO NOTHING
             RETURNING {CART_COLUMNS}"
        ))
        .bind(user_id.into_inner())
        .fetch_optional(&mut *self.tx)
        .await
        .map_err(|error| map_sqlx_error(error, Operation::CreateCart))?;

        if let Some(row) = inserted {
            return rows::cart(&row);
        }

        self.select_active_cart(user_id)
            .await?
            .ok_or(StoreError::Transient {
                operation: Operation::CreateCart,
            })
    }

    async fn lock_active_cart(&mut self, user_id: UserId) -> Result<Option<Cart>, StoreError> {
        self.select_active_cart(user_id).await
    }

    async fn add_item(
        &mut self,
        cart_id: CartId,
        product_id: ProductId,
        quantity: Quantity,
        unit_price: Money,
    ) -> Result<CartItem, StoreError> {
        let row = query(&format!(
            "INSERT INTO cart_items (cart_id, product_id, quantity, unit_price)
             VALUES ($1, $2, $3, $4)
             ON CONFLICT (cart_id, product_id) DO UPDATE
             SET quantity = cart_items.quantity + EXCLUDED.quantity, updated_at = now()
             RETURNING {CART_ITEM_COLUMNS}"
        ))
        .bind(cart_id.into_inner())
        .bind(product_id.into_inner())
        .bind(quantity.into_inner())
        .bind(unit_price.into_inner())
        .fetch_one(&mut *self.tx)
        .await
        .map_err(|error| map_sqlx_error(error, Operation::AddCartItem))?;
        rows::cart_item(&row)
    }

    async fn items(&mut self, cart_id: CartId) -> Result<Vec<CartItem>, StoreError> {
        let found = query(&format!(
            "SELECT {CART_ITEM_COLUMNS} FROM cart_items WHERE cart_id = $1 ORDER BY id"
        ))
        .bind(cart_id.into_inner())
        .fetch_all(&mut *self.tx)
        .await
        .map_err(|error| map_sqlx_error(error, Operation::ReadCartItems))?;
        found.iter().map(rows::cart_item).collect()
    }

    async fn owned_item(
        &mut self,
        item_id: CartItemId,
    ) -> Result<Option<OwnedCartItem>, StoreError> {
        let row = query(
            "SELECT ci.id, ci.cart_id, ci.product_id, ci.quantity, ci.unit_price,
                    ci.created_at, ci.updated_at,
                    c.user_id AS owner, c.status AS cart_status
             FROM cart_items ci
             JOIN carts c ON c.id = ci.cart_id
             WHERE ci.id = $1
             FOR UPDATE OF ci",
        )
        .bind(item_id.into_inner())
        .fetch_optional(&mut *self.tx)
        .await
        .map_err(|error| map_sqlx_error(error, Operation::ReadCartItems))?;
        row.as_ref().map(rows::owned_cart_item).transpose()
    }

    async fn update_item_quantity(
        &mut self,
        item_id: CartItemId,
        quantity: Quantity,
    ) -> Result<CartItem, StoreError> {
        let row = query(&format!(
            "UPDATE cart_items SET quantity = $2, updated_at = now()
             WHERE id = $1
             RETURNING {CART_ITEM_COLUMNS}"
        ))
        .bind(item_id.into_inner())
        .bind(quantity.into_inner())
        .fetch_optional(&mut *self.tx)
        .await
        .map_err(|error| map_sqlx_error(error, Operation::UpdateCartItem))?
        .ok_or(StoreError::NotFound {
            entity: Entity::CartItem,
            id: item_id.into_inner(),
        })?;
        rows::cart_item(&row)
    }

    async fn delete_item(&mut self, item_id: CartItemId) -> Result<(), StoreError> {
        let result = query("DELETE FROM cart_items WHERE id = $1")
            .bind(item_id.into_inner())
            .execute(&mut *self.tx)
            .await
            .map_err(|error| map_sqlx_error(error, Operation::DeleteCartItem))?;
        if result.rows_affected() == 0 {
            return Err(StoreError::NotFound {
                entity: Entity::CartItem,
                id: item_id.into_inner(),
            });
        }
        Ok(())
    }

    async fn clear(&mut self, cart_id: CartId) -> Result<(), StoreError> {
        let _ = query("DELETE FROM cart_items WHERE cart_id = $1")
            .bind(cart_id.into_inner())
            .execute(&mut *self.tx)
            .await
            .map_err(|error| map_sqlx_error(error, Operation::ClearCart))?;
        Ok(())
    }

    async fn check_out(&mut self, cart_id: CartId) -> Result<(), StoreError> {
        let result = query(
            "WITH cleared AS (DELETE FROM cart_items WHERE cart_id = $1)
             UPDATE carts SET status = 'CHECKED_OUT', updated_at = now()
             WHERE id = $1",
        )
        .bind(cart_id.into_inner())
        .execute(&mut *self.tx)
        .await
        .map_err(|error| map_sqlx_error(error, Operation::CheckOutCart))?;
        if result.rows_affected() == 0 {
            return Err(StoreError::NotFound {
                entity: Entity::Cart,
                id: cart_id.into_inner(),
            });
        }
        Ok(())
    }
}

impl OrderRepository for PostgresTransaction {
    async fn find_by_idempotency_key(
        &mut self,
        user_id: UserId,
        key: &IdempotencyKey,
    ) -> Result<Option<Order>, StoreError> {
        let row = query(&format!(
            "SELECT {ORDER_COLUMNS} FROM orders WHERE user_id = $1 AND idempotency_key = $2"
        ))
        .bind(user_id.into_inner())
        .bind(key.as_str())
        .fetch_optional(&mut *self.tx)
        .await
        .map_err(|error| map_sqlx_error(error, Operation::FindOrder))?;
        row.as_ref().map(rows::order).transpose()
    }

    #[instrument(name = "postgres.insert_order", skip(self, order), level = "debug")]
    async fn insert_order(&mut self, order: NewOrder) -> Result<Order, StoreError> {
        let row = query(&format!(
            "INSERT INTO orders (user_id, address_id, status, total_price, idempotency_key)
             VALUES ($1, $2, 'PENDING', $3, $4)
             RETURNING {ORDER_COLUMNS}"
        ))
        .bind(order.user_id.into_inner())
        .bind(order.address_id.into_inner())
        .bind(order.total_price.into_inner())
        .bind(order.idempotency_key.as_str())
        .fetch_one(&mut *self.tx)
        .await
        .map_err(|error| map_sqlx_error(error, Operation::InsertOrder))?;
        rows::order(&row)
    }

    async fn insert_items(
        &mut self,
        order_id: OrderId,
        items: Vec<NewOrderItem>,
    ) -> Result<Vec<OrderItem>, StoreError> {
        let mut stored = Vec::with_capacity(items.len());
        for item in items {
            let row = query(&format!(
                "INSERT INTO order_items (order_id, product_id, product_name, unit_price, quantity)
                 VALUES ($1, $2, $3, $4, $5)
                 RETURNING {ORDER_ITEM_COLUMNS}"
            ))
            .bind(order_id.into_inner())
            .bind(item.product_id.into_inner())
            .bind(&item.product_name)
            .bind(item.unit_price.into_inner())
            .bind(item.quantity.into_inner())
            .fetch_one(&mut *self.tx)
            .await
            .map_err(|error| map_sqlx_error(error, Operation::InsertOrderItems))?;
            stored.push(rows::order_item(&row)?);
        }
        Ok(stored)
    }

    async fn find_order(&mut self, order_id: OrderId) -> Result<Option<Order>, StoreError> {
        let row = query(&format!("SELECT {ORDER_COLUMNS} FROM orders WHERE id = $1"))
            .bind(order_id.into_inner())
            .fetch_optional(&mut *self.tx)
            .await
            .map_err(|error| map_sqlx_error(error, Operation::FindOrder))?;
        row.as_ref().map(rows::order).transpose()
    }

    async fn lock_order(&mut self, order_id: OrderId) -> Result<Option<Order>, StoreError> {
        let row = query(&format!(
            "SELECT {ORDER_COLUMNS} FROM orders WHERE id = $1 FOR UPDATE"
        ))
        .bind(order_id.into_inner())
        .fetch_optional(&mut *self.tx)
        .await
        .map_err(|error| map_sqlx_error(error, Operation::FindOrder))?;
        row.as_ref().map(rows::order).transpose()
    }

    async fn order_items(&mut self, order_id: OrderId) -> Result<Vec<OrderItem>, StoreError> {
        let found = query(&format!(
            "SELECT {ORDER_ITEM_COLUMNS} FROM order_items
             WHERE order_id = $1
             ORDER BY product_id, id"
        ))
        .bind(order_id.into_inner())
        .fetch_all(&mut *self.tx)
        .await
        .map_err(|error| map_sqlx_error(error, Operation::ReadOrderItems))?;
        found.iter().map(rows::order_item).collect()
    }

    async fn set_status(
        &mut self,
        order_id: OrderId,
        status: OrderStatus,
    ) -> Result<Order, StoreError> {
        let row = query(&format!(
            "UPDATE orders SET status = $2, updated_at = clock_timestamp()
             WHERE id = $1
             RETURNING {ORDER_COLUMNS}"
        ))
        .bind(order_id.into_inner())
        .bind(status.as_str())
        .fetch_optional(&mut *self.tx)
        .await
        .map_err(|error| map_sqlx_error(error, Operation::UpdateOrderStatus))?
        .ok_or(StoreError::NotFound {
            entity: Entity::Order,
            id: order_id.into_inner(),
        })?;
        rows::order(&row)
    }

    async fn orders_for_user(&mut self, user_id: UserId) -> Result<Vec<Order>, StoreError> {
        let found = query(&format!(
            "SELECT {ORDER_COLUMNS} FROM orders
             WHERE user_id = $1
             ORDER BY created_at DESC, id DESC"
        ))
        .bind(user_id.into_inner())
        .fetch_all(&mut *self.tx)
        .await
        .map_err(|error| map_sqlx_error(error, Operation::ListOrders))?;
        found.iter().map(rows::order).collect()
    }

    async fn list_orders(&mut self, filter: &OrderFilter) -> Result<Vec<Order>, StoreError> {
        let mut builder: QueryBuilder<'_, Postgres> =
            QueryBuilder::new(format!("SELECT {ORDER_COLUMNS} FROM orders WHERE TRUE"));
        if let Some(status) = filter.status {
            let _ = builder.push(" AND status = ").push_bind(status.as_str());
        }
        if let Some(user_id) = filter.user_id {
            let _ = builder.push(" AND user_id = ").push_bind(user_id.into_inner());
        }
        if let Some(from) = filter.created_from {
            let _ = builder.push(" AND created_at >= ").push_bind(from);
        }
        if let Some(before) = filter.created_before {
            let _ = builder.push(" AND created_at < ").push_bind(before);
        }
        let offset = i64::try_from(filter.offset()).unwrap_or(i64::MAX);
        let _ = builder
            .push(" ORDER BY created_at DESC, id DESC LIMIT ")
            .push_bind(i64::from(filter.limit.into_inner()))
            .push(" OFFSET ")
            .push_bind(offset);

        let found = builder
            .build()
            .fetch_all(&mut *self.tx)
            .await
            .map_err(|error| map_sqlx_error(error, Operation::ListOrders))?;
        found.iter().map(rows::order).collect()
    }
}

impl ProductCatalog for PostgresTransaction {
    async fn product(&mut self, product_id: ProductId) -> Result<Option<Product>, StoreError> {
        let row = query(&format!(
            "SELECT {PRODUCT_COLUMNS} FROM products WHERE id = $1"
        ))
        .bind(product_id.into_inner())
        .fetch_optional(&mut *self.tx)
        .await
        .map_err(|error| map_sqlx_error(error, Operation::ReadProduct))?;
        row.as_ref().map(rows::product).transpose()
    }
}

impl AddressDirectory for PostgresTransaction {
    async fn address_owner(&mut self, address_id: AddressId) -> Result<Option<UserId>, StoreError> {
        let owner: Option<i64> = sqlx::query_scalar("SELECT user_id FROM addresses WHERE id = $1")
            .bind(address_id.into_inner())
            .fetch_optional(&mut *self.tx)
            .await
            .map_err(|error| map_sqlx_error(error, Operation::ReadAddress))?;
        Ok(owner.map(UserId::new))
    }
}

impl AuditTrail for PostgresTransaction {
    async fn append_audit(&mut self, entry: NewAuditEntry) -> Result<AuditEntry, StoreError> {
        let row = query(&format!(
            "INSERT INTO audit_logs
                 (actor_id, action, resource_type, resource_id, before_state, after_state)
             VALUES ($1, $2, $3, $4, $5, $6)
             RETURNING {AUDIT_COLUMNS}"
        ))
        .bind(entry.actor_id.into_inner())
        .bind(entry.action.as_str())
        .bind(entry.resource_type.as_str())
        .bind(entry.resource_id)
        .bind(Json(&entry.before))
        .bind(Json(&entry.after))
        .fetch_one(&mut *self.tx)
        .await
        .map_err(|error| map_sqlx_error(error, Operation::AppendAudit))?;
        rows::audit_entry(&row)
    }

    async fn audit_entries(
        &mut self,
        resource_type: ResourceType,
        resource_id: i64,
    ) -> Result<Vec<AuditEntry>, StoreError> {
        let found = query(&format!(
            "SELECT {AUDIT_COLUMNS} FROM audit_logs
             WHERE resource_type = $1 AND resource_id = $2
             ORDER BY id"
        ))
        .bind(resource_type.as_str())
        .bind(resource_id)
        .fetch_all(&mut *self.tx)
        .await
        .map_err(|error| map_sqlx_error(error, Operation::ReadAudit))?;
        found.iter().map(rows::audit_entry).collect()
    }
}
