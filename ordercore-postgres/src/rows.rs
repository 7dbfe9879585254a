//! Row decoding. Every column goes back through its domain constructor, so a
//! row that violates a domain rule surfaces as [`StoreError::Corrupt`].

use chrono::{DateTime, Utc};
use ordercore::{
    AddressId, AdjustmentId, AdjustmentReason, AuditEntry, AuditEntryId, Cart, CartId, CartItem,
    CartItemId, Entity, IdempotencyKey, InventoryAdjustment, Money, Order, OrderId, OrderItem,
    OrderItemId, OwnedCartItem, Product, ProductId, Quantity, StockLevel, StoreError, UserId,
};
use serde_json::Value;
use sqlx::postgres::PgRow;
use sqlx::types::Json;
use sqlx::Row;

pub(crate) const PRODUCT_COLUMNS: &str = "id, name, price, stock, active, deleted_at";
pub(crate) const CART_COLUMNS: &str = "id, user_id, status, created_at, updated_at";
pub(crate) const CART_ITEM_COLUMNS: &str =
    "id, cart_id, product_id, quantity, unit_price, created_at, updated_at";
pub(crate) const ORDER_COLUMNS: &str =
    "id, user_id, address_id, status, total_price, idempotency_key, created_at, updated_at";
pub(crate) const ORDER_ITEM_COLUMNS: &str =
    "id, order_id, product_id, product_name, unit_price, quantity";
pub(crate) const ADJUSTMENT_COLUMNS: &str = "id, product_id, admin_id, delta, reason, created_at";
pub(crate) const AUDIT_COLUMNS: &str =
    "id, actor_id, action, resource_type, resource_id, before_state, after_state, created_at";

fn column<'r, T>(row: &'r PgRow, name: &str, entity: Entity) -> Result<T, StoreError>
where
    T: sqlx::Decode<'r, sqlx::Postgres> + sqlx::Type<sqlx::Postgres>,
{
    row.try_get(name)
        .map_err(|error| StoreError::corrupt(entity, format!("column {name}: {error}")))
}

fn parsed<T>(row: &PgRow, name: &str, entity: Entity) -> Result<T, StoreError>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    let raw: String = column(row, name, entity)?;
    raw.parse()
        .map_err(|error| StoreError::corrupt(entity, format!("column {name}: {error}")))
}

fn quantity(row: &PgRow, entity: Entity) -> Result<Quantity, StoreError> {
    Quantity::try_new(column::<i32>(row, "quantity", entity)?)
        .map_err(|error| StoreError::corrupt(entity, error))
}

fn money(row: &PgRow, name: &str, entity: Entity) -> Result<Money, StoreError> {
    Money::try_new(column::<i64>(row, name, entity)?)
        .map_err(|error| StoreError::corrupt(entity, error))
}

pub(crate) fn stock(row: &PgRow, entity: Entity) -> Result<StockLevel, StoreError> {
    StockLevel::try_new(column::<i32>(row, "stock", entity)?)
        .map_err(|error| StoreError::corrupt(entity, error))
}

pub(crate) fn product(row: &PgRow) -> Result<Product, StoreError> {
    let entity = Entity::Product;
    Ok(Product {
        id: ProductId::new(column(row, "id", entity)?),
        name: column(row, "name", entity)?,
        price: money(row, "price", entity)?,
        stock: stock(row, entity)?,
        active: column(row, "active", entity)?,
        deleted_at: column::<Option<DateTime<Utc>>>(row, "deleted_at", entity)?,
    })
}

pub(crate) fn cart(row: &PgRow) -> Result<Cart, StoreError> {
    let entity = Entity::Cart;
    Ok(Cart {
        id: CartId::new(column(row, "id", entity)?),
        user_id: UserId::new(column(row, "user_id", entity)?),
        status: parsed(row, "status", entity)?,
        created_at: column(row, "created_at", entity)?,
        updated_at: column(row, "updated_at", entity)?,
    })
}

pub(crate) fn cart_item(row: &PgRow) -> Result<CartItem, StoreError> {
    let entity = Entity::CartItem;
    Ok(CartItem {
        id: CartItemId::new(column(row, "id", entity)?),
        cart_id: CartId::new(column(row, "cart_id", entity)?),
        product_id: ProductId::new(column(row, "product_id", entity)?),
        quantity: quantity(row, entity)?,
        unit_price: money(row, "unit_price", entity)?,
        created_at: column(row, "created_at", entity)?,
        updated_at: column(row, "updated_at", entity)?,
    })
}

pub(crate) fn owned_cart_item(row: &PgRow) -> Result<OwnedCartItem, StoreError> {
    let entity = Entity::CartItem;
    Ok(OwnedCartItem {
        item: cart_item(row)?,
        owner: UserId::new(column(row, "owner", entity)?),
        cart_status: parsed(row, "cart_status", entity)?,
    })
}

pub(crate) fn order(row: &PgRow) -> Result<Order, StoreError> {
    let entity = Entity::Order;
    let key: String = column(row, "idempotency_key", entity)?;
    Ok(Order {
        id: OrderId::new(column(row, "id", entity)?),
        user_id: UserId::new(column(row, "user_id", entity)?),
        address_id: AddressId::new(column(row, "address_id", entity)?),
        status: parsed(row, "status", entity)?,
        total_price: money(row, "total_price", entity)?,
        idempotency_key: IdempotencyKey::try_new(key)
            .map_err(|error| StoreError::corrupt(entity, error))?,
        created_at: column(row, "created_at", entity)?,
        updated_at: column(row, "updated_at", entity)?,
    })
}

pub(crate) fn order_item(row: &PgRow) -> Result<OrderItem, StoreError> {
    let entity = Entity::OrderItem;
    Ok(OrderItem {
        id: OrderItemId::new(column(row, "id", entity)?),
        order_id: OrderId::new(column(row, "order_id", entity)?),
        product_id: ProductId::new(column(row, "product_id", entity)?),
        product_name: column(row, "product_name", entity)?,
        unit_price: money(row, "unit_price", entity)?,
        quantity: quantity(row, entity)?,
    })
}

pub(crate) fn adjustment(row: &PgRow) -> Result<InventoryAdjustment, StoreError> {
    let entity = Entity::InventoryAdjustment;
    let reason: String = column(row, "reason", entity)?;
    Ok(InventoryAdjustment {
        id: AdjustmentId::new(column(row, "id", entity)?),
        product_id: ProductId::new(column(row, "product_id", entity)?),
        admin_id: UserId::new(column(row, "admin_id", entity)?),
        delta: column(row, "delta", entity)?,
        reason: AdjustmentReason::try_new(reason)
            .map_err(|error| StoreError::corrupt(entity, error))?,
        created_at: column(row, "created_at", entity)?,
    })
}

pub(crate) fn audit_entry(row: &PgRow) -> Result<AuditEntry, StoreError> {
    let entity = Entity::AuditEntry;
    let before: Json<Value> = column(row, "before_state", entity)?;
    let after: Json<Value> = column(row, "after_state", entity)?;
    Ok(AuditEntry {
        id: AuditEntryId::new(column(row, "id", entity)?),
        actor_id: UserId::new(column(row, "actor_id", entity)?),
        action: parsed(row, "action", entity)?,
        resource_type: parsed(row, "resource_type", entity)?,
        resource_id: column(row, "resource_id", entity)?,
        before: before.0,
        after: after.0,
        created_at: column(row, "created_at", entity)?,
    })
}
