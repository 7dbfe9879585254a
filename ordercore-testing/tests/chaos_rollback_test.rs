use ordercore::{
    BackoffMultiplier, Checkout, CheckoutConfig, CheckoutError, ErrorKind, MaxRetryAttempts, Money,
    Operation, OrderStatus, ProductId, RetryBaseDelayMs, RetryMaxDelayMs, RetryPolicy, StockLevel,
    StoreError, UserId,
};
use ordercore_memory::InMemoryStore;
use ordercore_testing::chaos::{ChaosConfig, ChaosStore, ChaosStoreExt, KeyCollision};

fn fast_retry(max_attempts: u32) -> CheckoutConfig {
    CheckoutConfig {
        retry: RetryPolicy {
            max_attempts: MaxRetryAttempts::try_new(max_attempts).expect("valid attempts"),
            base_delay: RetryBaseDelayMs::try_new(10).expect("valid base delay"),
            max_delay: RetryMaxDelayMs::try_new(100).expect("valid max delay"),
            backoff_multiplier: BackoffMultiplier::try_new(1.5).expect("valid multiplier"),
            use_jitter: false,
        },
    }
}

fn chaotic(
    memory: &InMemoryStore,
    config: ChaosConfig,
    checkout_config: CheckoutConfig,
) -> (ChaosStore<InMemoryStore>, Checkout<ChaosStore<InMemoryStore>>) {
    let chaos_store = memory.clone().with_chaos(config);
    let checkout = Checkout::new(chaos_store.clone(), checkout_config);
    (chaos_store, checkout)
}

async fn widget(memory: &InMemoryStore, stock: i32) -> ProductId {
    memory
        .insert_product(
            "Widget",
            Money::try_new(1000).expect("valid price"),
            StockLevel::try_new(stock).expect("valid stock"),
        )
        .await
}

async fn stock_of(memory: &InMemoryStore, product_id: ProductId) -> i32 {
    memory
        .product_snapshot(product_id)
        .await
        .expect("product exists")
        .stock
        .into_inner()
}

#[tokio::test(flavor = "multi_thread")]
async fn failed_order_line_insert_rolls_back_the_whole_placement() {
    // Given: a cart of 2 widgets and a store that fails the first order-line insert
    let memory = InMemoryStore::new();
    let product = widget(&memory, 5).await;
    let user = UserId::new(1);
    let address = memory.insert_address(user).await;
    let (_, checkout) = chaotic(
        &memory,
        ChaosConfig::deterministic()
            .with_failure_probability(1.0)
            .targeting(Operation::InsertOrderItems)
            .at_most(1),
        CheckoutConfig::default(),
    );
    let _ = checkout
        .add_cart_item(user, product, 2)
        .await
        .expect("add should succeed");

    // When: placing the order
    let error = checkout
        .place_order(user, address, "key-1")
        .await
        .expect_err("placement should fail");

    // Then: the failure is internal and nothing the attempt wrote survives
    assert_eq!(
        error,
        CheckoutError::Store(StoreError::StoreFailure {
            operation: Operation::InsertOrderItems
        })
    );
    assert_eq!(error.kind(), ErrorKind::Internal);
    assert_eq!(stock_of(&memory, product).await, 5);
    assert_eq!(memory.order_count().await, 0);
    assert_eq!(memory.cart_items_for(user).await.len(), 1);

    // And: retrying with the same key places exactly one order
    let order = checkout
        .place_order(user, address, "key-1")
        .await
        .expect("retry should succeed");
    assert_eq!(order.total_price.into_inner(), 2000);
    assert_eq!(stock_of(&memory, product).await, 3);
    assert_eq!(memory.order_count().await, 1);
}

#[tokio::test(flavor = "multi_thread")]
async fn failed_audit_write_rolls_back_stock_restoration() {
    // Given: a placed order and a store that fails the first audit write
    let memory = InMemoryStore::new();
    let product = widget(&memory, 5).await;
    let user = UserId::new(1);
    let admin = UserId::new(99);
    let address = memory.insert_address(user).await;
    let (_, checkout) = chaotic(
        &memory,
        ChaosConfig::deterministic()
            .with_failure_probability(1.0)
            .targeting(Operation::AppendAudit)
            .at_most(1),
        CheckoutConfig::default(),
    );
    let _ = checkout
        .add_cart_item(user, product, 2)
        .await
        .expect("add should succeed");
    let order = checkout
        .place_order(user, address, "key-1")
        .await
        .expect("placement should succeed");

    // When: canceling the order
    let result = checkout
        .admin_update_order_status(admin, order.id, "CANCELED")
        .await;

    // Then: neither the restored stock nor the status change is visible
    assert!(result.is_err_and(|error| error.kind() == ErrorKind::Internal));
    assert_eq!(stock_of(&memory, product).await, 3);
    let unchanged = checkout
        .get_my_order(user, order.id)
        .await
        .expect("order is readable");
    assert_eq!(unchanged.status, OrderStatus::Pending);

    // And: the next cancellation restores stock once
    checkout
        .admin_update_order_status(admin, order.id, "CANCELED")
        .await
        .expect("second cancellation should succeed");
    assert_eq!(stock_of(&memory, product).await, 5);
}

#[tokio::test(flavor = "multi_thread")]
async fn failed_commit_discards_inventory_change() {
    // Given: a store whose first commit fails
    let memory = InMemoryStore::new();
    let product = widget(&memory, 5).await;
    let (_, checkout) = chaotic(
        &memory,
        ChaosConfig::deterministic()
            .with_failure_probability(1.0)
            .targeting(Operation::CommitTransaction)
            .at_most(1),
        CheckoutConfig::default(),
    );

    // When: an administrator overwrites the stock level
    let result = checkout
        .admin_set_inventory(UserId::new(99), product, 40, "cycle count")
        .await;

    // Then: neither the stock level nor the adjustment row was written
    assert!(result.is_err());
    assert_eq!(stock_of(&memory, product).await, 5);
    assert!(memory.adjustments_for(product).await.is_empty());
}

#[tokio::test(flavor = "multi_thread")]
async fn transient_decrement_failures_are_retried() {
    // Given: a store that aborts the first two stock decrements as transient
    let memory = InMemoryStore::new();
    let product = widget(&memory, 5).await;
    let user = UserId::new(1);
    let address = memory.insert_address(user).await;
    let (chaos_store, checkout) = chaotic(
        &memory,
        ChaosConfig::deterministic()
            .with_transient_probability(1.0)
            .targeting(Operation::DecreaseStock)
            .at_most(2),
        fast_retry(3),
    );
    let _ = checkout
        .add_cart_item(user, product, 2)
        .await
        .expect("add should succeed");

    // When: placing the order
    let order = checkout
        .place_order(user, address, "key-1")
        .await
        .expect("third attempt should succeed");

    // Then: exactly one order exists and stock moved once
    assert_eq!(chaos_store.injected(), 2);
    assert_eq!(order.items.len(), 1);
    assert_eq!(memory.order_count().await, 1);
    assert_eq!(stock_of(&memory, product).await, 3);
}

#[tokio::test(flavor = "multi_thread")]
async fn retries_stop_at_the_configured_attempt_limit() {
    // Given: a store that always aborts stock decrements as transient
    let memory = InMemoryStore::new();
    let product = widget(&memory, 5).await;
    let user = UserId::new(1);
    let address = memory.insert_address(user).await;
    let (chaos_store, checkout) = chaotic(
        &memory,
        ChaosConfig::deterministic()
            .with_transient_probability(1.0)
            .targeting(Operation::DecreaseStock),
        fast_retry(2),
    );
    let _ = checkout
        .add_cart_item(user, product, 2)
        .await
        .expect("add should succeed");

    // When: placing the order
    let error = checkout
        .place_order(user, address, "key-1")
        .await
        .expect_err("every attempt should fail");

    // Then: the last transient error surfaces after two attempts and nothing was written
    assert!(error.is_retryable());
    assert_eq!(chaos_store.injected(), 2);
    assert_eq!(memory.order_count().await, 0);
    assert_eq!(stock_of(&memory, product).await, 5);
}

#[tokio::test(flavor = "multi_thread")]
async fn key_collision_converges_on_the_committed_winner() {
    // Given: a cart of 3 widgets and a same-key duplicate that wins the order insert
    let memory = InMemoryStore::new();
    let product = widget(&memory, 10).await;
    let user = UserId::new(1);
    let address = memory.insert_address(user).await;
    let (chaos_store, checkout) = chaotic(
        &memory,
        ChaosConfig::deterministic().colliding_on_key(KeyCollision::WinnerCommits),
        CheckoutConfig::default(),
    );
    let _ = checkout
        .add_cart_item(user, product, 3)
        .await
        .expect("add should succeed");

    // When: placing the order
    let order = checkout
        .place_order(user, address, "key-1")
        .await
        .expect("placement should converge on the winner");

    // Then: the caller gets the winner's order and stock moved exactly once
    let stored = checkout
        .list_my_orders(user)
        .await
        .expect("listing should succeed");
    assert_eq!(stored.len(), 1);
    assert_eq!(order.id, stored[0].id);
    assert_eq!(order.status, OrderStatus::Pending);
    assert_eq!(order.items.len(), 1);
    assert_eq!(chaos_store.injected(), 1);
    assert_eq!(memory.order_count().await, 1);
    assert_eq!(stock_of(&memory, product).await, 7);
    assert!(memory.cart_items_for(user).await.is_empty());
}

#[tokio::test(flavor = "multi_thread")]
async fn key_collision_without_a_visible_winner_is_a_conflict() {
    // Given: a cart of 3 widgets and an order insert that collides with an order nobody can see
    let memory = InMemoryStore::new();
    let product = widget(&memory, 10).await;
    let user = UserId::new(1);
    let address = memory.insert_address(user).await;
    let (_, checkout) = chaotic(
        &memory,
        ChaosConfig::deterministic().colliding_on_key(KeyCollision::WinnerVanishes),
        CheckoutConfig::default(),
    );
    let _ = checkout
        .add_cart_item(user, product, 3)
        .await
        .expect("add should succeed");

    // When: placing the order
    let error = checkout
        .place_order(user, address, "key-1")
        .await
        .expect_err("placement should report the conflict");

    // Then: the conflict surfaces and the attempt's reservations were rolled back
    assert_eq!(error, CheckoutError::IdempotencyConflict);
    assert_eq!(error.kind(), ErrorKind::Conflict);
    assert_eq!(memory.order_count().await, 0);
    assert_eq!(stock_of(&memory, product).await, 10);
    assert_eq!(memory.cart_items_for(user).await.len(), 1);
}
