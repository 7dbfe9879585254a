//! Rows as the core sees them.
//!
//! Backends translate their storage representation into these structs; the
//! services never see SQL rows or backend-specific handles.

use chrono::{DateTime, Utc};
use serde_json::Value;

use crate::types::{
    AddressId, AdjustmentId, AdjustmentReason, AuditAction, AuditEntryId, CartId, CartItemId,
    CartStatus, IdempotencyKey, Money, OrderId, OrderItemId, OrderStatus, PageLimit, PageNumber,
    ProductId, Quantity, ResourceType, StockLevel, UserId,
};

/// Catalog product. Owned by the catalog collaborator; only `stock` is written here.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Product {
    pub id: ProductId,
    pub name: String,
    pub price: Money,
    pub stock: StockLevel,
    pub active: bool,
    pub deleted_at: Option<DateTime<Utc>>,
}

impl Product {
    /// Active and not soft-deleted.
    pub const fn is_purchasable(&self) -> bool {
        self.active && self.deleted_at.is_none()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Cart {
    pub id: CartId,
    pub user_id: UserId,
    pub status: CartStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// A cart line. `unit_price` is the price seen when the product was first added.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CartItem {
    pub id: CartItemId,
    pub cart_id: CartId,
    pub product_id: ProductId,
    pub quantity: Quantity,
    pub unit_price: Money,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// A cart line together with who owns its cart, for ownership checks.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OwnedCartItem {
    pub item: CartItem,
    pub owner: UserId,
    pub cart_status: CartStatus,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Order {
    pub id: OrderId,
    pub user_id: UserId,
    pub address_id: AddressId,
    pub status: OrderStatus,
    pub total_price: Money,
    pub idempotency_key: IdempotencyKey,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Order row to insert. Status always starts at `PENDING`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewOrder {
    pub user_id: UserId,
    pub address_id: AddressId,
    pub total_price: Money,
    pub idempotency_key: IdempotencyKey,
}

/// Immutable point-in-time snapshot of one purchased product.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OrderItem {
    pub id: OrderItemId,
    pub order_id: OrderId,
    pub product_id: ProductId,
    pub product_name: String,
    pub unit_price: Money,
    pub quantity: Quantity,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewOrderItem {
    pub product_id: ProductId,
    pub product_name: String,
    pub unit_price: Money,
    pub quantity: Quantity,
}

/// Append-only record of a manual stock change.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InventoryAdjustment {
    pub id: AdjustmentId,
    pub product_id: ProductId,
    pub admin_id: UserId,
    pub delta: i32,
    pub reason: AdjustmentReason,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct AuditEntry {
    pub id: AuditEntryId,
    pub actor_id: UserId,
    pub action: AuditAction,
    pub resource_type: ResourceType,
    pub resource_id: i64,
    pub before: Value,
    pub after: Value,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct NewAuditEntry {
    pub actor_id: UserId,
    pub action: AuditAction,
    pub resource_type: ResourceType,
    pub resource_id: i64,
    pub before: Value,
    pub after: Value,
}

/// Admin order listing criteria.
///
/// `created_from` is inclusive and `created_before` exclusive. Results are
/// ordered newest first.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OrderFilter {
    pub status: Option<OrderStatus>,
    pub user_id: Option<UserId>,
    pub created_from: Option<DateTime<Utc>>,
    pub created_before: Option<DateTime<Utc>>,
    pub page: PageNumber,
    pub limit: PageLimit,
}

impl OrderFilter {
    /// Rows to skip before this page starts.
    pub fn offset(&self) -> u64 {
        u64::from(self.page.into_inner() - 1) * u64::from(self.limit.into_inner())
    }

    /// Whether `order` satisfies every criterion except paging.
    pub fn matches(&self, order: &Order) -> bool {
        self.status.is_none_or(|status| order.status == status)
            && self.user_id.is_none_or(|user| order.user_id == user)
            && self.created_from.is_none_or(|from| order.created_at >= from)
            && self.created_before.is_none_or(|before| order.created_at < before)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn order_at(status: OrderStatus, user: i64, created_at: DateTime<Utc>) -> Order {
        Order {
            id: OrderId::new(1),
            user_id: UserId::new(user),
            address_id: AddressId::new(1),
            status,
            total_price: Money::try_new(100).unwrap(),
            idempotency_key: IdempotencyKey::try_new("k").unwrap(),
            created_at,
            updated_at: created_at,
        }
    }

    fn filter() -> OrderFilter {
        OrderFilter {
            status: None,
            user_id: None,
            created_from: None,
            created_before: None,
            page: PageNumber::try_new(1).unwrap(),
            limit: PageLimit::try_new(20).unwrap(),
        }
    }

    #[test]
    fn offset_is_zero_on_first_page() {
        assert_eq!(filter().offset(), 0);
        let third = OrderFilter {
            page: PageNumber::try_new(3).unwrap(),
            ..filter()
        };
        assert_eq!(third.offset(), 40);
    }

    #[test]
    fn date_range_is_half_open() {
        let start = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
        let end = Utc.with_ymd_and_hms(2024, 2, 1, 0, 0, 0).unwrap();
        let ranged = OrderFilter {
            created_from: Some(start),
            created_before: Some(end),
            ..filter()
        };

        assert!(ranged.matches(&order_at(OrderStatus::Pending, 1, start)));
        assert!(!ranged.matches(&order_at(OrderStatus::Pending, 1, end)));
    }

    #[test]
    fn status_and_user_filters_combine() {
        let now = Utc::now();
        let paid_by_two = OrderFilter {
            status: Some(OrderStatus::Paid),
            user_id: Some(UserId::new(2)),
            ..filter()
        };

        assert!(paid_by_two.matches(&order_at(OrderStatus::Paid, 2, now)));
        assert!(!paid_by_two.matches(&order_at(OrderStatus::Paid, 3, now)));
        assert!(!paid_by_two.matches(&order_at(OrderStatus::Pending, 2, now)));
    }
}
