mod common;

use common::PostgresTestFixture;
use futures::future::join_all;
use ordercore::{
    AddressId, AdjustmentReason, CartStore, IdempotencyKey, InventoryLedger, Money, NewOrder,
    OrderRepository, Quantity, StockLevel, StoreError, TransactionCoordinator, UnitOfWork, UserId,
};
use ordercore_postgres::constraints;
use uuid::Uuid;

fn qty(units: i32) -> Quantity {
    Quantity::try_new(units).expect("valid quantity")
}

#[tokio::test(flavor = "multi_thread")]
async fn migrate_can_run_on_every_startup() {
    let fixture = PostgresTestFixture::new().await;

    fixture
        .store
        .migrate()
        .await
        .expect("re-applying the schema should succeed");
}

#[tokio::test(flavor = "multi_thread")]
async fn conditional_decrement_never_drives_stock_negative() {
    let fixture = PostgresTestFixture::new().await;
    let product = fixture.product("Widget", 1000, 3).await;

    let mut tx = fixture.store.begin().await.expect("begin");
    let too_many = tx.decrease_if_enough(product, qty(4)).await.expect("decrease");
    let exact = tx.decrease_if_enough(product, qty(3)).await.expect("decrease");
    let drained = tx.decrease_if_enough(product, qty(1)).await.expect("decrease");
    tx.commit().await.expect("commit");

    assert!(!too_many);
    assert!(exact);
    assert!(!drained);
    assert_eq!(fixture.stock(product).await, 0);
}

#[tokio::test(flavor = "multi_thread")]
async fn concurrent_decrements_take_exactly_the_available_stock() {
    let fixture = PostgresTestFixture::new().await;
    let product = fixture.product("Limited", 1000, 5).await;

    let attempts = (0..8).map(|_| {
        let store = fixture.store.clone();
        async move {
            let mut tx = store.begin().await?;
            let taken = tx.decrease_if_enough(product, qty(1)).await?;
            tx.commit().await?;
            Ok::<_, StoreError>(taken)
        }
    });
    let results = join_all(attempts).await;

    let taken = results
        .into_iter()
        .map(|result| result.expect("decrement should not error"))
        .filter(|taken| *taken)
        .count();
    assert_eq!(taken, 5);
    assert_eq!(fixture.stock(product).await, 0);
}

#[tokio::test(flavor = "multi_thread")]
async fn dropped_transaction_rolls_back() {
    let fixture = PostgresTestFixture::new().await;
    let product = fixture.product("Widget", 1000, 3).await;

    {
        let mut tx = fixture.store.begin().await.expect("begin");
        assert!(tx.decrease_if_enough(product, qty(2)).await.expect("decrease"));
    }

    assert_eq!(fixture.stock(product).await, 3);
}

#[tokio::test(flavor = "multi_thread")]
async fn stock_overwrite_records_signed_delta() {
    let fixture = PostgresTestFixture::new().await;
    let product = fixture.product("Widget", 1000, 3).await;
    let admin = UserId::new(99);

    let mut tx = fixture.store.begin().await.expect("begin");
    let (adjustment, old_stock) = tx
        .set_stock_with_adjustment(
            admin,
            product,
            StockLevel::try_new(10).expect("valid stock"),
            AdjustmentReason::try_new("cycle count").expect("valid reason"),
        )
        .await
        .expect("set stock");
    tx.commit().await.expect("commit");

    assert_eq!(old_stock.into_inner(), 3);
    assert_eq!(adjustment.delta, 7);
    assert_eq!(adjustment.admin_id, admin);
    assert_eq!(adjustment.reason.as_str(), "cycle count");
    assert_eq!(fixture.stock(product).await, 10);
}

#[tokio::test(flavor = "multi_thread")]
async fn duplicate_idempotency_key_is_reported_as_unique_violation() {
    let fixture = PostgresTestFixture::new().await;
    let user = UserId::new(7);
    let address = AddressId::new(fixture.address(user).await);
    let key = IdempotencyKey::try_new(format!("key-{}", Uuid::now_v7())).expect("valid key");
    let new_order = NewOrder {
        user_id: user,
        address_id: address,
        total_price: Money::try_new(2000).expect("valid price"),
        idempotency_key: key,
    };

    let mut first = fixture.store.begin().await.expect("begin");
    let _ = first
        .insert_order(new_order.clone())
        .await
        .expect("first insert");
    first.commit().await.expect("commit");

    let mut second = fixture.store.begin().await.expect("begin");
    let error = second
        .insert_order(new_order)
        .await
        .expect_err("second insert should collide");
    second.rollback().await.expect("rollback");

    assert_eq!(
        error,
        StoreError::UniqueViolation {
            constraint: constraints::ORDERS_IDEMPOTENCY
        }
    );
}

#[tokio::test(flavor = "multi_thread")]
async fn concurrent_first_access_converges_on_one_cart() {
    let fixture = PostgresTestFixture::new().await;
    let user = UserId::new(11);

    let attempts = (0..6).map(|_| {
        let store = fixture.store.clone();
        async move {
            let mut tx = store.begin().await?;
            let cart = tx.get_or_create_active_cart(user).await?;
            tx.commit().await?;
            Ok::<_, StoreError>(cart.id)
        }
    });
    let ids: Vec<_> = join_all(attempts)
        .await
        .into_iter()
        .map(|result| result.expect("cart access should not error"))
        .collect();

    assert!(ids.windows(2).all(|pair| pair[0] == pair[1]), "{ids:?}");
}

#[tokio::test(flavor = "multi_thread")]
async fn merge_add_keeps_first_price_snapshot() {
    let fixture = PostgresTestFixture::new().await;
    let product = fixture.product("Widget", 1000, 50).await;
    let user = UserId::new(12);

    let mut tx = fixture.store.begin().await.expect("begin");
    let cart = tx.get_or_create_active_cart(user).await.expect("cart");
    let first = tx
        .add_item(cart.id, product, qty(2), Money::try_new(1000).expect("price"))
        .await
        .expect("first add");
    let merged = tx
        .add_item(cart.id, product, qty(3), Money::try_new(1200).expect("price"))
        .await
        .expect("second add");
    let lines = tx.items(cart.id).await.expect("items");
    tx.commit().await.expect("commit");

    assert_eq!(merged.id, first.id);
    assert_eq!(merged.quantity.into_inner(), 5);
    assert_eq!(merged.unit_price.into_inner(), 1000);
    assert_eq!(lines.len(), 1);
}

#[tokio::test(flavor = "multi_thread")]
async fn check_out_retires_the_cart_and_its_lines() {
    let fixture = PostgresTestFixture::new().await;
    let product = fixture.product("Widget", 1000, 50).await;
    let user = UserId::new(13);

    let mut tx = fixture.store.begin().await.expect("begin");
    let cart = tx.get_or_create_active_cart(user).await.expect("cart");
    let _ = tx
        .add_item(cart.id, product, qty(1), Money::try_new(1000).expect("price"))
        .await
        .expect("add");
    tx.check_out(cart.id).await.expect("check out");
    let active = tx.lock_active_cart(user).await.expect("lock");
    let lines = tx.items(cart.id).await.expect("items");
    tx.commit().await.expect("commit");

    assert!(active.is_none());
    assert!(lines.is_empty());

    let mut tx = fixture.store.begin().await.expect("begin");
    let next = tx.get_or_create_active_cart(user).await.expect("cart");
    tx.commit().await.expect("commit");
    assert_ne!(next.id, cart.id);
}
