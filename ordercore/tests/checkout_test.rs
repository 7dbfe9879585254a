use ordercore::{
    AuditAction, Checkout, CheckoutConfig, CheckoutError, Entity, ErrorKind, Money, OrderId,
    OrderQuery, OrderStatus, ProductId, ResourceType, StockLevel, UserId,
};
use ordercore_memory::InMemoryStore;
use serde_json::json;
use tracing_test::traced_test;

fn admin() -> UserId {
    UserId::new(900)
}

async fn setup(stock: i32) -> (InMemoryStore, Checkout<InMemoryStore>, ProductId) {
    let store = InMemoryStore::new();
    let product = store
        .insert_product(
            "Widget",
            Money::try_new(1000).expect("valid price"),
            StockLevel::try_new(stock).expect("valid stock"),
        )
        .await;
    let checkout = Checkout::new(store.clone(), CheckoutConfig::default());
    (store, checkout, product)
}

fn validation_field(error: &CheckoutError) -> Option<&'static str> {
    match error {
        CheckoutError::Validation { field, .. } => Some(field),
        _ => None,
    }
}

#[tokio::test(flavor = "multi_thread")]
async fn malformed_input_is_rejected_before_touching_storage() {
    let (store, checkout, product) = setup(5).await;
    let user = UserId::new(1);
    let address = store.insert_address(user).await;

    let zero_quantity = checkout.add_cart_item(user, product, 0).await;
    let blank_key = checkout.place_order(user, address, "   ").await;
    let long_key = checkout.place_order(user, address, &"k".repeat(256)).await;
    let lower_case_status = checkout
        .admin_update_order_status(admin(), OrderId::new(1), "canceled")
        .await;
    let negative_stock = checkout
        .admin_set_inventory(admin(), product, -1, "count")
        .await;
    let long_reason = checkout
        .admin_restock(admin(), product, 5, &"r".repeat(1001))
        .await;

    assert_eq!(
        validation_field(&zero_quantity.expect_err("zero quantity")),
        Some("quantity")
    );
    assert_eq!(
        validation_field(&blank_key.expect_err("blank key")),
        Some("idempotency_key")
    );
    assert_eq!(
        validation_field(&long_key.expect_err("long key")),
        Some("idempotency_key")
    );
    assert_eq!(
        validation_field(&lower_case_status.expect_err("lower-case status")),
        Some("status")
    );
    assert_eq!(
        validation_field(&negative_stock.expect_err("negative stock")),
        Some("stock")
    );
    assert_eq!(
        validation_field(&long_reason.expect_err("long reason")),
        Some("reason")
    );
    assert_eq!(store.active_cart_count(user).await, 0);
    assert!(store.adjustments_for(product).await.is_empty());
}

#[tokio::test(flavor = "multi_thread")]
async fn listing_rejects_out_of_range_paging() {
    let (_, checkout, _) = setup(5).await;

    let page_zero = checkout
        .admin_list_orders(OrderQuery {
            page: 0,
            ..OrderQuery::default()
        })
        .await;
    let oversized = checkout
        .admin_list_orders(OrderQuery {
            limit: 101,
            ..OrderQuery::default()
        })
        .await;

    assert_eq!(validation_field(&page_zero.expect_err("page 0")), Some("page"));
    assert_eq!(validation_field(&oversized.expect_err("limit 101")), Some("limit"));
}

#[tokio::test(flavor = "multi_thread")]
async fn cart_view_reports_price_snapshots_and_total() {
    // Given: a widget added at its original price
    let (store, checkout, product) = setup(20).await;
    let user = UserId::new(1);
    let _ = checkout
        .add_cart_item(user, product, 2)
        .await
        .expect("first add");

    // When: the price changes and the same product is added again
    assert!(
        store
            .set_product_price(product, Money::try_new(1500).expect("price"))
            .await
    );
    let cart = checkout
        .add_cart_item(user, product, 1)
        .await
        .expect("second add");

    // Then: the line keeps its first price and the total follows it
    assert_eq!(cart.items.len(), 1);
    assert_eq!(cart.items[0].name, "Widget");
    assert_eq!(cart.items[0].quantity.into_inner(), 3);
    assert_eq!(cart.items[0].unit_price.into_inner(), 1000);
    assert_eq!(cart.total.into_inner(), 3000);
}

#[tokio::test(flavor = "multi_thread")]
async fn update_and_delete_reshape_the_cart() {
    let (_, checkout, product) = setup(20).await;
    let user = UserId::new(1);
    let cart = checkout
        .add_cart_item(user, product, 2)
        .await
        .expect("add");
    let item = cart.items[0].item_id;

    let updated = checkout
        .update_cart_item(user, item, 7)
        .await
        .expect("update");
    let too_many = checkout.update_cart_item(user, item, 21).await;
    let emptied = checkout
        .delete_cart_item(user, item)
        .await
        .expect("delete");
    let deleted_again = checkout.delete_cart_item(user, item).await;

    assert_eq!(updated.total.into_inner(), 7000);
    assert_eq!(
        too_many.expect_err("beyond stock"),
        CheckoutError::OutOfStock { product_id: product }
    );
    assert!(emptied.items.is_empty());
    assert_eq!(emptied.total.into_inner(), 0);
    assert_eq!(
        deleted_again.expect_err("already gone"),
        CheckoutError::NotFound {
            entity: Entity::CartItem,
            id: item.into_inner()
        }
    );
}

#[tokio::test(flavor = "multi_thread")]
async fn clear_cart_empties_without_retiring_it() {
    let (store, checkout, product) = setup(20).await;
    let user = UserId::new(1);
    let _ = checkout
        .add_cart_item(user, product, 2)
        .await
        .expect("add");

    let cleared = checkout.clear_cart(user).await.expect("clear");
    let reused = checkout.get_cart(user).await.expect("get");

    assert!(cleared.items.is_empty());
    assert!(reused.items.is_empty());
    assert_eq!(store.active_cart_count(user).await, 1);
}

#[tokio::test(flavor = "multi_thread")]
async fn same_status_update_is_a_silent_no_op() {
    // Given: a pending order
    let (store, checkout, product) = setup(5).await;
    let user = UserId::new(1);
    let address = store.insert_address(user).await;
    let _ = checkout
        .add_cart_item(user, product, 1)
        .await
        .expect("add");
    let order = checkout
        .place_order(user, address, "key-1")
        .await
        .expect("place");

    // When: an administrator sets it to PENDING again
    checkout
        .admin_update_order_status(admin(), order.id, "PENDING")
        .await
        .expect("no-op update");

    // Then: nothing is audited
    let trail = checkout
        .audit_trail(ResourceType::Order, order.id.into_inner())
        .await
        .expect("trail");
    assert!(trail.is_empty());
}

#[tokio::test(flavor = "multi_thread")]
async fn paid_orders_cannot_go_back_to_pending() {
    let (store, checkout, product) = setup(5).await;
    let user = UserId::new(1);
    let address = store.insert_address(user).await;
    let _ = checkout
        .add_cart_item(user, product, 1)
        .await
        .expect("add");
    let order = checkout
        .place_order(user, address, "key-1")
        .await
        .expect("place");
    checkout
        .admin_update_order_status(admin(), order.id, "PAID")
        .await
        .expect("pay");

    let error = checkout
        .admin_update_order_status(admin(), order.id, "PENDING")
        .await
        .expect_err("backwards move");

    assert_eq!(error.kind(), ErrorKind::Conflict);
    assert!(matches!(
        error,
        CheckoutError::InvalidTransition {
            from: OrderStatus::Paid,
            ..
        }
    ));
}

#[tokio::test(flavor = "multi_thread")]
async fn unknown_order_is_not_found() {
    let (_, checkout, _) = setup(5).await;

    let error = checkout
        .admin_update_order_status(admin(), OrderId::new(4242), "PAID")
        .await
        .expect_err("missing order");

    assert_eq!(
        error,
        CheckoutError::NotFound {
            entity: Entity::Order,
            id: 4242
        }
    );
}

#[tokio::test(flavor = "multi_thread")]
async fn restock_records_adjustment_and_audit() {
    // Given: a product with 5 units
    let (store, checkout, product) = setup(5).await;

    // When: an administrator restocks 12 units
    checkout
        .admin_restock(admin(), product, 12, "supplier delivery")
        .await
        .expect("restock");

    // Then: stock, adjustment and audit agree
    let snapshot = store.product_snapshot(product).await.expect("product");
    assert_eq!(snapshot.stock.into_inner(), 17);

    let adjustments = store.adjustments_for(product).await;
    assert_eq!(adjustments.len(), 1);
    assert_eq!(adjustments[0].delta, 12);
    assert_eq!(adjustments[0].admin_id, admin());

    let trail = checkout
        .audit_trail(ResourceType::Product, product.into_inner())
        .await
        .expect("trail");
    assert_eq!(trail.len(), 1);
    assert_eq!(trail[0].action, AuditAction::RestockInventory);
    assert_eq!(trail[0].before, json!({ "stock": 5 }));
    assert_eq!(trail[0].after, json!({ "stock": 17 }));
}

#[tokio::test(flavor = "multi_thread")]
async fn set_inventory_on_missing_product_is_not_found() {
    let (_, checkout, _) = setup(5).await;

    let error = checkout
        .admin_set_inventory(admin(), ProductId::new(777), 10, "count")
        .await
        .expect_err("missing product");

    assert_eq!(error.kind(), ErrorKind::NotFound);
}

#[tokio::test]
#[traced_test]
async fn placement_logs_the_new_order() {
    let (store, checkout, product) = setup(5).await;
    let user = UserId::new(1);
    let address = store.insert_address(user).await;
    let _ = checkout
        .add_cart_item(user, product, 2)
        .await
        .expect("add");

    let _ = checkout
        .place_order(user, address, "key-1")
        .await
        .expect("place");
    let _ = checkout
        .place_order(user, address, "key-1")
        .await
        .expect("replay");

    assert!(logs_contain("[checkout.place_order] order placed"));
    assert!(logs_contain("[checkout.place_order] replayed existing order"));
}

#[tokio::test(flavor = "multi_thread")]
async fn keys_differing_only_by_whitespace_place_separate_orders() {
    // Given: an order placed under "abc" and a refilled cart
    let (store, checkout, product) = setup(10).await;
    let user = UserId::new(1);
    let address = store.insert_address(user).await;
    let _ = checkout
        .add_cart_item(user, product, 1)
        .await
        .expect("first add");
    let first = checkout
        .place_order(user, address, "abc")
        .await
        .expect("first placement");
    let _ = checkout
        .add_cart_item(user, product, 2)
        .await
        .expect("second add");

    // When: placing again under "abc " with a trailing space
    let second = checkout
        .place_order(user, address, "abc ")
        .await
        .expect("second placement");

    // Then: it is a distinct order that took its own stock and emptied the cart
    assert_ne!(second.id, first.id);
    assert_eq!(second.items[0].quantity.into_inner(), 2);
    assert_eq!(
        store
            .product_snapshot(product)
            .await
            .expect("product")
            .stock
            .into_inner(),
        7
    );
    assert!(checkout
        .get_cart(user)
        .await
        .expect("cart")
        .items
        .is_empty());
    assert_eq!(store.order_count().await, 2);
}

#[tokio::test(flavor = "multi_thread")]
async fn delisted_products_cannot_have_their_lines_raised() {
    // Given: two cart lines whose products are later deactivated and deleted
    let (store, checkout, inactive) = setup(20).await;
    let deleted = store
        .insert_product(
            "Gadget",
            Money::try_new(500).expect("valid price"),
            StockLevel::try_new(20).expect("valid stock"),
        )
        .await;
    let user = UserId::new(1);
    let _ = checkout
        .add_cart_item(user, inactive, 1)
        .await
        .expect("add widget");
    let cart = checkout
        .add_cart_item(user, deleted, 1)
        .await
        .expect("add gadget");
    let line_of = |product: ProductId| {
        cart.items
            .iter()
            .find(|line| line.product_id == product)
            .expect("line exists")
            .item_id
    };
    let (inactive_line, deleted_line) = (line_of(inactive), line_of(deleted));
    assert!(store.set_product_active(inactive, false).await);
    assert!(store.soft_delete_product(deleted).await);

    // When: the customer raises either quantity
    let inactive_update = checkout.update_cart_item(user, inactive_line, 3).await;
    let deleted_update = checkout.update_cart_item(user, deleted_line, 3).await;

    // Then: both are refused and the lines keep their quantities
    assert_eq!(
        inactive_update.expect_err("inactive product"),
        CheckoutError::ProductUnavailable {
            product_id: inactive
        }
    );
    assert_eq!(
        deleted_update.expect_err("deleted product"),
        CheckoutError::NotFound {
            entity: Entity::Product,
            id: deleted.into_inner()
        }
    );
    assert!(store
        .cart_items_for(user)
        .await
        .iter()
        .all(|item| item.quantity.into_inner() == 1));
}
