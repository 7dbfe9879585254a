//! Serialized shapes handed to the HTTP collaborator.

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::model::{CartItem, Order, OrderItem};
use crate::types::{CartItemId, Money, OrderId, OrderStatus, ProductId, Quantity, UserId};

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct OrderItemView {
    pub product_id: ProductId,
    pub name: String,
    pub unit_price: Money,
    pub quantity: Quantity,
}

/// An order with its immutable line snapshots.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct OrderView {
    pub id: OrderId,
    pub user_id: UserId,
    pub status: OrderStatus,
    pub total_price: Money,
    pub created_at: DateTime<Utc>,
    pub items: Vec<OrderItemView>,
}

impl OrderView {
    pub fn new(order: Order, items: Vec<OrderItem>) -> Self {
        Self {
            id: order.id,
            user_id: order.user_id,
            status: order.status,
            total_price: order.total_price,
            created_at: order.created_at,
            items: items
                .into_iter()
                .map(|item| OrderItemView {
                    product_id: item.product_id,
                    name: item.product_name,
                    unit_price: item.unit_price,
                    quantity: item.quantity,
                })
                .collect(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CartLineView {
    pub item_id: CartItemId,
    pub product_id: ProductId,
    pub name: String,
    pub unit_price: Money,
    pub quantity: Quantity,
}

/// The caller's active cart with a computed total.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CartView {
    pub items: Vec<CartLineView>,
    pub total: Money,
}

impl CartView {
    /// Build from lines paired with their current product names.
    ///
    /// Returns `None` if the total overflows.
    pub fn from_lines(lines: Vec<(CartItem, String)>) -> Option<Self> {
        let total =
            Money::checked_total(lines.iter().map(|(item, _)| (item.unit_price, item.quantity)))?;
        let items = lines
            .into_iter()
            .map(|(item, name)| CartLineView {
                item_id: item.id,
                product_id: item.product_id,
                name,
                unit_price: item.unit_price,
                quantity: item.quantity,
            })
            .collect();
        Some(Self { items, total })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{AddressId, CartId, IdempotencyKey, OrderItemId};
    use chrono::TimeZone;
    use serde_json::json;

    #[test]
    fn order_view_serializes_wire_shape() {
        let created_at = Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 0).unwrap();
        let order = Order {
            id: OrderId::new(7),
            user_id: UserId::new(3),
            address_id: AddressId::new(4),
            status: OrderStatus::Pending,
            total_price: Money::try_new(2000).unwrap(),
            idempotency_key: IdempotencyKey::try_new("key-1").unwrap(),
            created_at,
            updated_at: created_at,
        };
        let items = vec![OrderItem {
            id: OrderItemId::new(1),
            order_id: OrderId::new(7),
            product_id: ProductId::new(11),
            product_name: "Widget".to_string(),
            unit_price: Money::try_new(1000).unwrap(),
            quantity: Quantity::try_new(2).unwrap(),
        }];

        let value = serde_json::to_value(OrderView::new(order, items)).unwrap();

        assert_eq!(
            value,
            json!({
                "id": 7,
                "user_id": 3,
                "status": "PENDING",
                "total_price": 2000,
                "created_at": "2024-05-01T12:00:00Z",
                "items": [
                    {"product_id": 11, "name": "Widget", "unit_price": 1000, "quantity": 2}
                ]
            })
        );
    }

    #[test]
    fn cart_view_totals_lines() {
        let now = Utc::now();
        let line = |id: i64, price: i64, quantity: i32| CartItem {
            id: CartItemId::new(id),
            cart_id: CartId::new(1),
            product_id: ProductId::new(id * 10),
            quantity: Quantity::try_new(quantity).unwrap(),
            unit_price: Money::try_new(price).unwrap(),
            created_at: now,
            updated_at: now,
        };

        let view = CartView::from_lines(vec![
            (line(1, 1000, 2), "A".to_string()),
            (line(2, 150, 1), "B".to_string()),
        ])
        .unwrap();

        assert_eq!(view.total.into_inner(), 2150);
        assert_eq!(view.items.len(), 2);
        assert_eq!(view.items[1].name, "B");
    }
}
