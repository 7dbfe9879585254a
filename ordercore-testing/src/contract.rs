//! Behavioral contract every ordercore backend must satisfy.
//!
//! Each scenario drives the [`Checkout`] facade over a fresh store from
//! `make_store` and checks committed state through [`TestBackend`] queries.
//! Users, keys and catalog rows are unique per run, so scenarios can share
//! one database and run in parallel.

use std::fmt;
use std::future::Future;

use futures::future::join_all;
use ordercore::{
    AddressId, AuditAction, CartView, Checkout, CheckoutConfig, CheckoutError, Entity,
    IdempotencyKey, Money, OrderId, OrderQuery, OrderStatus, OrderView, ProductId, ResourceType,
    StockLevel, UserId,
};
use serde_json::json;
use uuid::Uuid;

use crate::backend::TestBackend;

#[derive(Debug)]
pub struct ContractTestFailure {
    scenario: &'static str,
    detail: String,
}

impl ContractTestFailure {
    fn new(scenario: &'static str, detail: impl Into<String>) -> Self {
        Self {
            scenario,
            detail: detail.into(),
        }
    }

    fn store_error(
        scenario: &'static str,
        operation: &'static str,
        error: impl fmt::Display,
    ) -> Self {
        Self::new(
            scenario,
            format!("{operation} operation returned unexpected error: {error}"),
        )
    }

    fn assertion(scenario: &'static str, detail: impl Into<String>) -> Self {
        Self::new(scenario, detail)
    }
}

impl fmt::Display for ContractTestFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}] {}", self.scenario, self.detail)
    }
}

impl std::error::Error for ContractTestFailure {}

pub type ContractTestResult = Result<(), ContractTestFailure>;

fn fresh_user() -> UserId {
    UserId::new(rand::random_range(1..i64::MAX))
}

// Include UUID for parallel test execution against shared database
fn fresh_key(label: &str) -> String {
    format!("contract::{label}::{}", Uuid::now_v7())
}

fn stored_key(scenario: &'static str, raw: &str) -> Result<IdempotencyKey, ContractTestFailure> {
    IdempotencyKey::try_new(raw).map_err(|error| {
        ContractTestFailure::assertion(scenario, format!("invalid idempotency key `{raw}`: {error}"))
    })
}

async fn step<T, E, Fut>(
    scenario: &'static str,
    operation: &'static str,
    future: Fut,
) -> Result<T, ContractTestFailure>
where
    Fut: Future<Output = Result<T, E>>,
    E: fmt::Display,
{
    future
        .await
        .map_err(|error| ContractTestFailure::store_error(scenario, operation, error))
}

fn rejected<T: fmt::Debug>(
    scenario: &'static str,
    operation: &'static str,
    result: Result<T, CheckoutError>,
) -> Result<CheckoutError, ContractTestFailure> {
    match result {
        Err(error) => Ok(error),
        Ok(value) => Err(ContractTestFailure::assertion(
            scenario,
            format!("expected {operation} to fail but it returned {value:?}"),
        )),
    }
}

fn ensure(
    scenario: &'static str,
    condition: bool,
    detail: impl FnOnce() -> String,
) -> ContractTestResult {
    if condition {
        Ok(())
    } else {
        Err(ContractTestFailure::assertion(scenario, detail()))
    }
}

/// A store plus the facade under test.
struct Fixture<S> {
    store: S,
    checkout: Checkout<S>,
    admin: UserId,
}

impl<S> Fixture<S>
where
    S: TestBackend,
{
    fn new(store: S) -> Self {
        Self {
            checkout: Checkout::new(store.clone(), CheckoutConfig::default()),
            store,
            admin: fresh_user(),
        }
    }

    async fn product(
        &self,
        scenario: &'static str,
        name: &str,
        price: i64,
        stock: i32,
    ) -> Result<ProductId, ContractTestFailure> {
        let price = Money::try_new(price)
            .map_err(|error| ContractTestFailure::assertion(scenario, error.to_string()))?;
        let stock = StockLevel::try_new(stock)
            .map_err(|error| ContractTestFailure::assertion(scenario, error.to_string()))?;
        step(
            scenario,
            "seed_product",
            self.store.seed_product(name, price, stock),
        )
        .await
    }

    async fn customer(
        &self,
        scenario: &'static str,
    ) -> Result<(UserId, AddressId), ContractTestFailure> {
        let user = fresh_user();
        let address = step(scenario, "seed_address", self.store.seed_address(user)).await?;
        Ok((user, address))
    }

    async fn stock(
        &self,
        scenario: &'static str,
        product_id: ProductId,
    ) -> Result<i32, ContractTestFailure> {
        step(scenario, "stock_of", self.store.stock_of(product_id))
            .await
            .map(StockLevel::into_inner)
    }

    async fn expect_stock(
        &self,
        scenario: &'static str,
        product_id: ProductId,
        expected: i32,
    ) -> ContractTestResult {
        let observed = self.stock(scenario, product_id).await?;
        ensure(scenario, observed == expected, || {
            format!("expected product {product_id} stock {expected}, observed {observed}")
        })
    }

    async fn cart(
        &self,
        scenario: &'static str,
        user: UserId,
    ) -> Result<CartView, ContractTestFailure> {
        step(scenario, "get_cart", self.checkout.get_cart(user)).await
    }

    /// Fill the user's cart with `quantity` units and place it under `key`.
    async fn order(
        &self,
        scenario: &'static str,
        customer: (UserId, AddressId),
        product_id: ProductId,
        quantity: i32,
        key: &str,
    ) -> Result<OrderView, ContractTestFailure> {
        let (user, address) = customer;
        let _ = step(
            scenario,
            "add_cart_item",
            self.checkout.add_cart_item(user, product_id, quantity),
        )
        .await?;
        step(
            scenario,
            "place_order",
            self.checkout.place_order(user, address, key),
        )
        .await
    }

    async fn set_status(
        &self,
        scenario: &'static str,
        order_id: OrderId,
        status: &str,
    ) -> ContractTestResult {
        step(
            scenario,
            "admin_update_order_status",
            self.checkout
                .admin_update_order_status(self.admin, order_id, status),
        )
        .await
    }
}

pub async fn test_placement_is_idempotent<F, S>(make_store: F) -> ContractTestResult
where
    F: Fn() -> S + Send + Sync + Clone + 'static,
    S: TestBackend,
{
    const SCENARIO: &str = "placement_is_idempotent";

    let shop = Fixture::new(make_store());
    let product = shop.product(SCENARIO, "Widget", 1000, 5).await?;
    let customer = shop.customer(SCENARIO).await?;
    let (user, address) = customer;
    let key = fresh_key("key-1");

    let order = shop.order(SCENARIO, customer, product, 2, &key).await?;

    ensure(
        SCENARIO,
        order.status == OrderStatus::Pending && order.total_price.into_inner() == 2000,
        || format!("expected PENDING order totalling 2000, observed {order:?}"),
    )?;
    let [line] = order.items.as_slice() else {
        return Err(ContractTestFailure::assertion(
            SCENARIO,
            format!("expected exactly one order line, observed {:?}", order.items),
        ));
    };
    ensure(
        SCENARIO,
        line.product_id == product
            && line.name == "Widget"
            && line.unit_price.into_inner() == 1000
            && line.quantity.into_inner() == 2,
        || format!("order line does not snapshot the cart line: {line:?}"),
    )?;
    shop.expect_stock(SCENARIO, product, 3).await?;

    let cart = shop.cart(SCENARIO, user).await?;
    ensure(SCENARIO, cart.items.is_empty(), || {
        format!("expected empty cart after checkout, observed {cart:?}")
    })?;

    let replay = step(
        SCENARIO,
        "place_order",
        shop.checkout.place_order(user, address, &key),
    )
    .await?;
    ensure(
        SCENARIO,
        replay.id == order.id && replay.total_price == order.total_price,
        || format!("replay returned {replay:?}, expected order {}", order.id),
    )?;
    shop.expect_stock(SCENARIO, product, 3).await?;

    let stored = step(
        SCENARIO,
        "orders_with_key",
        shop.store.orders_with_key(user, &stored_key(SCENARIO, &key)?),
    )
    .await?;
    ensure(SCENARIO, stored == 1, || {
        format!("expected one order under the key, observed {stored}")
    })
}

pub async fn test_out_of_stock_keeps_cart<F, S>(make_store: F) -> ContractTestResult
where
    F: Fn() -> S + Send + Sync + Clone + 'static,
    S: TestBackend,
{
    const SCENARIO: &str = "out_of_stock_keeps_cart";

    let shop = Fixture::new(make_store());
    let product = shop.product(SCENARIO, "Widget", 1000, 5).await?;
    let (user, address) = shop.customer(SCENARIO).await?;
    let key = fresh_key("restock");

    let _ = step(
        SCENARIO,
        "add_cart_item",
        shop.checkout.add_cart_item(user, product, 3),
    )
    .await?;
    step(
        SCENARIO,
        "admin_set_inventory",
        shop.checkout
            .admin_set_inventory(shop.admin, product, 0, "stock count"),
    )
    .await?;

    let error = rejected(
        SCENARIO,
        "place_order",
        shop.checkout.place_order(user, address, &key).await,
    )?;
    ensure(
        SCENARIO,
        error == CheckoutError::OutOfStock {
            product_id: product,
        },
        || format!("expected out of stock, observed {error}"),
    )?;

    let cart = shop.cart(SCENARIO, user).await?;
    ensure(
        SCENARIO,
        cart.items.len() == 1 && cart.items[0].quantity.into_inner() == 3,
        || format!("expected cart to keep its line of 3, observed {cart:?}"),
    )?;
    shop.expect_stock(SCENARIO, product, 0).await?;

    step(
        SCENARIO,
        "admin_restock",
        shop.checkout.admin_restock(shop.admin, product, 3, "delivery"),
    )
    .await?;
    let order = step(
        SCENARIO,
        "place_order",
        shop.checkout.place_order(user, address, &key),
    )
    .await?;
    ensure(SCENARIO, order.total_price.into_inner() == 3000, || {
        format!("expected retried order totalling 3000, observed {order:?}")
    })?;
    shop.expect_stock(SCENARIO, product, 0).await
}

pub async fn test_cancel_restores_stock<F, S>(make_store: F) -> ContractTestResult
where
    F: Fn() -> S + Send + Sync + Clone + 'static,
    S: TestBackend,
{
    const SCENARIO: &str = "cancel_restores_stock";

    let shop = Fixture::new(make_store());
    let first = shop.product(SCENARIO, "Widget", 1000, 5).await?;
    let second = shop.product(SCENARIO, "Gadget", 500, 4).await?;
    let customer = shop.customer(SCENARIO).await?;
    let (user, _) = customer;

    let _ = step(
        SCENARIO,
        "add_cart_item",
        shop.checkout.add_cart_item(user, second, 1),
    )
    .await?;
    let order = shop
        .order(SCENARIO, customer, first, 2, &fresh_key("cancel"))
        .await?;
    shop.expect_stock(SCENARIO, first, 3).await?;
    shop.expect_stock(SCENARIO, second, 3).await?;

    shop.set_status(SCENARIO, order.id, "PAID").await?;
    shop.set_status(SCENARIO, order.id, "CANCELED").await?;

    shop.expect_stock(SCENARIO, first, 5).await?;
    shop.expect_stock(SCENARIO, second, 4).await?;

    let canceled = step(
        SCENARIO,
        "get_my_order",
        shop.checkout.get_my_order(user, order.id),
    )
    .await?;
    ensure(SCENARIO, canceled.status == OrderStatus::Canceled, || {
        format!("expected CANCELED order, observed {}", canceled.status)
    })?;

    let trail = step(
        SCENARIO,
        "audit_trail",
        shop.checkout
            .audit_trail(ResourceType::Order, order.id.into_inner()),
    )
    .await?;
    let [paid, cancel] = trail.as_slice() else {
        return Err(ContractTestFailure::assertion(
            SCENARIO,
            format!("expected two audit entries, observed {}", trail.len()),
        ));
    };
    ensure(
        SCENARIO,
        paid.after == json!({"status": "PAID"})
            && cancel.action == AuditAction::UpdateOrderStatus
            && cancel.actor_id == shop.admin
            && cancel.before == json!({"status": "PAID"})
            && cancel.after == json!({"status": "CANCELED"}),
        || format!("unexpected audit trail {trail:?}"),
    )
}

pub async fn test_terminal_states_are_immutable<F, S>(make_store: F) -> ContractTestResult
where
    F: Fn() -> S + Send + Sync + Clone + 'static,
    S: TestBackend,
{
    const SCENARIO: &str = "terminal_states_are_immutable";

    let shop = Fixture::new(make_store());
    let product = shop.product(SCENARIO, "Widget", 1000, 5).await?;
    let customer = shop.customer(SCENARIO).await?;

    let shipped = shop
        .order(SCENARIO, customer, product, 2, &fresh_key("shipped"))
        .await?;
    shop.set_status(SCENARIO, shipped.id, "SHIPPED").await?;

    let error = rejected(
        SCENARIO,
        "admin_update_order_status",
        shop.checkout
            .admin_update_order_status(shop.admin, shipped.id, "CANCELED")
            .await,
    )?;
    ensure(
        SCENARIO,
        matches!(error, CheckoutError::InvalidTransition { .. })
            && error.to_string() == "cannot change shipped order",
        || format!("expected shipped order to be immutable, observed {error}"),
    )?;
    shop.expect_stock(SCENARIO, product, 3).await?;

    let trail = step(
        SCENARIO,
        "audit_trail",
        shop.checkout
            .audit_trail(ResourceType::Order, shipped.id.into_inner()),
    )
    .await?;
    ensure(SCENARIO, trail.len() == 1, || {
        format!("rejected change wrote an audit entry: {trail:?}")
    })?;

    let canceled = shop
        .order(SCENARIO, customer, product, 1, &fresh_key("canceled"))
        .await?;
    shop.set_status(SCENARIO, canceled.id, "CANCELED").await?;
    shop.expect_stock(SCENARIO, product, 3).await?;

    for status in ["CANCELED", "PAID"] {
        let error = rejected(
            SCENARIO,
            "admin_update_order_status",
            shop.checkout
                .admin_update_order_status(shop.admin, canceled.id, status)
                .await,
        )?;
        ensure(
            SCENARIO,
            error.to_string() == "cannot change canceled order",
            || format!("expected canceled order to reject {status}, observed {error}"),
        )?;
    }
    shop.expect_stock(SCENARIO, product, 3).await
}

pub async fn test_concurrent_same_key_places_once<F, S>(make_store: F) -> ContractTestResult
where
    F: Fn() -> S + Send + Sync + Clone + 'static,
    S: TestBackend,
{
    const SCENARIO: &str = "concurrent_same_key_places_once";

    let shop = Fixture::new(make_store());
    let product = shop.product(SCENARIO, "Widget", 1000, 10).await?;
    let (user, address) = shop.customer(SCENARIO).await?;
    let key = fresh_key("key-2");

    let _ = step(
        SCENARIO,
        "add_cart_item",
        shop.checkout.add_cart_item(user, product, 2),
    )
    .await?;

    let results = join_all((0..8).map(|_| shop.checkout.place_order(user, address, &key))).await;

    let mut ids = Vec::with_capacity(results.len());
    for result in results {
        ids.push(step(SCENARIO, "place_order", async { result }).await?.id);
    }
    ensure(SCENARIO, ids.windows(2).all(|pair| pair[0] == pair[1]), || {
        format!("concurrent duplicates returned different orders: {ids:?}")
    })?;

    let stored = step(
        SCENARIO,
        "orders_with_key",
        shop.store.orders_with_key(user, &stored_key(SCENARIO, &key)?),
    )
    .await?;
    ensure(SCENARIO, stored == 1, || {
        format!("expected exactly one order under the key, observed {stored}")
    })?;
    shop.expect_stock(SCENARIO, product, 8).await
}

pub async fn test_concurrent_checkouts_never_oversell<F, S>(make_store: F) -> ContractTestResult
where
    F: Fn() -> S + Send + Sync + Clone + 'static,
    S: TestBackend,
{
    const SCENARIO: &str = "concurrent_checkouts_never_oversell";
    const BUYERS: usize = 6;

    let shop = Fixture::new(make_store());
    let product = shop.product(SCENARIO, "Limited", 2500, 3).await?;

    let mut buyers = Vec::with_capacity(BUYERS);
    for _ in 0..BUYERS {
        let (user, address) = shop.customer(SCENARIO).await?;
        let _ = step(
            SCENARIO,
            "add_cart_item",
            shop.checkout.add_cart_item(user, product, 1),
        )
        .await?;
        buyers.push((user, address, fresh_key("oversell")));
    }

    let results = join_all(
        buyers
            .iter()
            .map(|(user, address, key)| shop.checkout.place_order(*user, *address, key)),
    )
    .await;

    let mut placed = 0;
    for result in results {
        match result {
            Ok(_) => placed += 1,
            Err(CheckoutError::OutOfStock { product_id }) if product_id == product => {}
            Err(error) => {
                return Err(ContractTestFailure::store_error(
                    SCENARIO,
                    "place_order",
                    error,
                ))
            }
        }
    }
    ensure(SCENARIO, placed == 3, || {
        format!("expected exactly 3 orders for 3 units, observed {placed}")
    })?;
    shop.expect_stock(SCENARIO, product, 0).await
}

pub async fn test_concurrent_merge_add_sums_quantities<F, S>(make_store: F) -> ContractTestResult
where
    F: Fn() -> S + Send + Sync + Clone + 'static,
    S: TestBackend,
{
    const SCENARIO: &str = "concurrent_merge_add_sums_quantities";

    let shop = Fixture::new(make_store());
    let product = shop.product(SCENARIO, "Widget", 1000, 100).await?;
    let (user, _) = shop.customer(SCENARIO).await?;

    let results =
        join_all((0..10).map(|_| shop.checkout.add_cart_item(user, product, 2))).await;
    for result in results {
        let _ = step(SCENARIO, "add_cart_item", async { result }).await?;
    }

    let cart = shop.cart(SCENARIO, user).await?;
    ensure(
        SCENARIO,
        cart.items.len() == 1
            && cart.items[0].quantity.into_inner() == 20
            && cart.total.into_inner() == 20_000,
        || format!("expected one merged line of 20 units, observed {cart:?}"),
    )?;

    let carts = step(
        SCENARIO,
        "active_cart_count",
        shop.store.active_cart_count(user),
    )
    .await?;
    ensure(SCENARIO, carts == 1, || {
        format!("expected one active cart, observed {carts}")
    })
}

pub async fn test_first_cart_access_creates_one_cart<F, S>(make_store: F) -> ContractTestResult
where
    F: Fn() -> S + Send + Sync + Clone + 'static,
    S: TestBackend,
{
    const SCENARIO: &str = "first_cart_access_creates_one_cart";

    let shop = Fixture::new(make_store());
    let user = fresh_user();

    let results = join_all((0..8).map(|_| shop.checkout.get_cart(user))).await;
    for result in results {
        let cart = step(SCENARIO, "get_cart", async { result }).await?;
        ensure(SCENARIO, cart.items.is_empty(), || {
            format!("new cart should be empty, observed {cart:?}")
        })?;
    }

    let carts = step(
        SCENARIO,
        "active_cart_count",
        shop.store.active_cart_count(user),
    )
    .await?;
    ensure(SCENARIO, carts == 1, || {
        format!("expected one active cart, observed {carts}")
    })
}

pub async fn test_concurrent_cancellations_restore_once<F, S>(make_store: F) -> ContractTestResult
where
    F: Fn() -> S + Send + Sync + Clone + 'static,
    S: TestBackend,
{
    const SCENARIO: &str = "concurrent_cancellations_restore_once";

    let shop = Fixture::new(make_store());
    let product = shop.product(SCENARIO, "Widget", 1000, 5).await?;
    let customer = shop.customer(SCENARIO).await?;
    let order = shop
        .order(SCENARIO, customer, product, 2, &fresh_key("cancel-race"))
        .await?;

    let results = join_all((0..4).map(|_| {
        shop.checkout
            .admin_update_order_status(shop.admin, order.id, "CANCELED")
    }))
    .await;

    let mut canceled = 0;
    for result in results {
        match result {
            Ok(()) => canceled += 1,
            Err(CheckoutError::InvalidTransition {
                from: OrderStatus::Canceled,
                ..
            }) => {}
            Err(error) => {
                return Err(ContractTestFailure::store_error(
                    SCENARIO,
                    "admin_update_order_status",
                    error,
                ))
            }
        }
    }
    ensure(SCENARIO, canceled == 1, || {
        format!("expected exactly one cancellation to win, observed {canceled}")
    })?;
    shop.expect_stock(SCENARIO, product, 5).await
}

pub async fn test_cancel_after_cart_reuse<F, S>(make_store: F) -> ContractTestResult
where
    F: Fn() -> S + Send + Sync + Clone + 'static,
    S: TestBackend,
{
    const SCENARIO: &str = "cancel_after_cart_reuse";

    let shop = Fixture::new(make_store());
    let product = shop.product(SCENARIO, "Widget", 1000, 5).await?;
    let customer = shop.customer(SCENARIO).await?;
    let (user, address) = customer;

    let first = shop
        .order(SCENARIO, customer, product, 2, &fresh_key("first"))
        .await?;
    let _ = step(
        SCENARIO,
        "add_cart_item",
        shop.checkout.add_cart_item(user, product, 1),
    )
    .await?;

    shop.set_status(SCENARIO, first.id, "CANCELED").await?;
    shop.expect_stock(SCENARIO, product, 5).await?;

    let cart = shop.cart(SCENARIO, user).await?;
    ensure(
        SCENARIO,
        cart.items.len() == 1
            && cart.items[0].product_id == product
            && cart.items[0].quantity.into_inner() == 1,
        || format!("cancellation touched the new cart: {cart:?}"),
    )?;

    let second = step(
        SCENARIO,
        "place_order",
        shop.checkout
            .place_order(user, address, &fresh_key("second")),
    )
    .await?;
    ensure(SCENARIO, second.id != first.id, || {
        "new key replayed the canceled order".to_string()
    })?;
    shop.expect_stock(SCENARIO, product, 4).await
}

pub async fn test_placement_checks_address<F, S>(make_store: F) -> ContractTestResult
where
    F: Fn() -> S + Send + Sync + Clone + 'static,
    S: TestBackend,
{
    const SCENARIO: &str = "placement_checks_address";

    let shop = Fixture::new(make_store());
    let product = shop.product(SCENARIO, "Widget", 1000, 5).await?;
    let (user, _) = shop.customer(SCENARIO).await?;
    let (_, foreign_address) = shop.customer(SCENARIO).await?;

    let _ = step(
        SCENARIO,
        "add_cart_item",
        shop.checkout.add_cart_item(user, product, 1),
    )
    .await?;

    let error = rejected(
        SCENARIO,
        "place_order",
        shop.checkout
            .place_order(user, foreign_address, &fresh_key("foreign"))
            .await,
    )?;
    ensure(
        SCENARIO,
        error
            == CheckoutError::Forbidden {
                entity: Entity::Address,
            },
        || format!("expected forbidden address, observed {error}"),
    )?;

    let missing = AddressId::new(i64::MAX);
    let error = rejected(
        SCENARIO,
        "place_order",
        shop.checkout
            .place_order(user, missing, &fresh_key("missing"))
            .await,
    )?;
    ensure(
        SCENARIO,
        matches!(
            error,
            CheckoutError::NotFound {
                entity: Entity::Address,
                ..
            }
        ),
        || format!("expected missing address, observed {error}"),
    )?;

    shop.expect_stock(SCENARIO, product, 5).await?;
    let cart = shop.cart(SCENARIO, user).await?;
    ensure(SCENARIO, cart.items.len() == 1, || {
        format!("rejected placement changed the cart: {cart:?}")
    })
}

pub async fn test_unavailable_products_are_rejected<F, S>(make_store: F) -> ContractTestResult
where
    F: Fn() -> S + Send + Sync + Clone + 'static,
    S: TestBackend,
{
    const SCENARIO: &str = "unavailable_products_are_rejected";

    let shop = Fixture::new(make_store());
    let retired = shop.product(SCENARIO, "Retired", 1000, 5).await?;
    let deleted = shop.product(SCENARIO, "Deleted", 1000, 5).await?;
    let (user, address) = shop.customer(SCENARIO).await?;

    let _ = step(
        SCENARIO,
        "add_cart_item",
        shop.checkout.add_cart_item(user, retired, 1),
    )
    .await?;
    step(
        SCENARIO,
        "deactivate_product",
        shop.store.deactivate_product(retired),
    )
    .await?;

    let error = rejected(
        SCENARIO,
        "place_order",
        shop.checkout
            .place_order(user, address, &fresh_key("retired"))
            .await,
    )?;
    ensure(
        SCENARIO,
        error == CheckoutError::ProductUnavailable {
            product_id: retired,
        },
        || format!("expected unavailable product, observed {error}"),
    )?;
    shop.expect_stock(SCENARIO, retired, 5).await?;

    let error = rejected(
        SCENARIO,
        "add_cart_item",
        shop.checkout.add_cart_item(user, retired, 1).await,
    )?;
    ensure(
        SCENARIO,
        error == CheckoutError::ProductUnavailable {
            product_id: retired,
        },
        || format!("inactive product was added to the cart: {error}"),
    )?;

    step(
        SCENARIO,
        "soft_delete_product",
        shop.store.soft_delete_product(deleted),
    )
    .await?;
    let error = rejected(
        SCENARIO,
        "add_cart_item",
        shop.checkout.add_cart_item(user, deleted, 1).await,
    )?;
    ensure(
        SCENARIO,
        matches!(
            error,
            CheckoutError::NotFound {
                entity: Entity::Product,
                ..
            }
        ),
        || format!("deleted product was added to the cart: {error}"),
    )
}

pub async fn test_empty_cart_cannot_be_placed<F, S>(make_store: F) -> ContractTestResult
where
    F: Fn() -> S + Send + Sync + Clone + 'static,
    S: TestBackend,
{
    const SCENARIO: &str = "empty_cart_cannot_be_placed";

    let shop = Fixture::new(make_store());
    let product = shop.product(SCENARIO, "Widget", 1000, 5).await?;
    let (user, address) = shop.customer(SCENARIO).await?;
    let key = fresh_key("empty");

    let error = rejected(
        SCENARIO,
        "place_order",
        shop.checkout.place_order(user, address, &key).await,
    )?;
    ensure(SCENARIO, error == CheckoutError::CartEmpty, || {
        format!("expected empty cart without a cart, observed {error}")
    })?;

    let _ = step(
        SCENARIO,
        "add_cart_item",
        shop.checkout.add_cart_item(user, product, 2),
    )
    .await?;
    let cleared = step(SCENARIO, "clear_cart", shop.checkout.clear_cart(user)).await?;
    ensure(
        SCENARIO,
        cleared.items.is_empty() && cleared.total.into_inner() == 0,
        || format!("cleared cart still has lines: {cleared:?}"),
    )?;

    let error = rejected(
        SCENARIO,
        "place_order",
        shop.checkout.place_order(user, address, &key).await,
    )?;
    ensure(SCENARIO, error == CheckoutError::CartEmpty, || {
        format!("expected empty cart after clearing, observed {error}")
    })?;

    let stored = step(
        SCENARIO,
        "orders_with_key",
        shop.store.orders_with_key(user, &stored_key(SCENARIO, &key)?),
    )
    .await?;
    ensure(SCENARIO, stored == 0, || {
        format!("empty checkout stored {stored} orders")
    })
}

pub async fn test_cart_items_are_owner_scoped<F, S>(make_store: F) -> ContractTestResult
where
    F: Fn() -> S + Send + Sync + Clone + 'static,
    S: TestBackend,
{
    const SCENARIO: &str = "cart_items_are_owner_scoped";

    let shop = Fixture::new(make_store());
    let product = shop.product(SCENARIO, "Widget", 1000, 5).await?;
    let (owner, address) = shop.customer(SCENARIO).await?;
    let intruder = fresh_user();

    let cart = step(
        SCENARIO,
        "add_cart_item",
        shop.checkout.add_cart_item(owner, product, 1),
    )
    .await?;
    let Some(item_id) = cart.items.first().map(|line| line.item_id) else {
        return Err(ContractTestFailure::assertion(
            SCENARIO,
            "cart has no line after adding an item",
        ));
    };

    let forbidden = CheckoutError::Forbidden {
        entity: Entity::CartItem,
    };
    let error = rejected(
        SCENARIO,
        "update_cart_item",
        shop.checkout.update_cart_item(intruder, item_id, 4).await,
    )?;
    ensure(SCENARIO, error == forbidden, || {
        format!("another user updated the line: {error}")
    })?;
    let error = rejected(
        SCENARIO,
        "delete_cart_item",
        shop.checkout.delete_cart_item(intruder, item_id).await,
    )?;
    ensure(SCENARIO, error == forbidden, || {
        format!("another user deleted the line: {error}")
    })?;

    let updated = step(
        SCENARIO,
        "update_cart_item",
        shop.checkout.update_cart_item(owner, item_id, 3),
    )
    .await?;
    ensure(
        SCENARIO,
        updated.items.len() == 1 && updated.items[0].quantity.into_inner() == 3,
        || format!("owner update not applied: {updated:?}"),
    )?;

    let _ = step(
        SCENARIO,
        "place_order",
        shop.checkout
            .place_order(owner, address, &fresh_key("owner")),
    )
    .await?;
    let error = rejected(
        SCENARIO,
        "update_cart_item",
        shop.checkout.update_cart_item(owner, item_id, 1).await,
    )?;
    ensure(
        SCENARIO,
        matches!(
            error,
            CheckoutError::NotFound {
                entity: Entity::CartItem,
                ..
            }
        ),
        || format!("checked-out line is still editable: {error}"),
    )
}

pub async fn test_cart_stock_checks<F, S>(make_store: F) -> ContractTestResult
where
    F: Fn() -> S + Send + Sync + Clone + 'static,
    S: TestBackend,
{
    const SCENARIO: &str = "cart_stock_checks";

    let shop = Fixture::new(make_store());
    let product = shop.product(SCENARIO, "Scarce", 1000, 2).await?;
    let (user, _) = shop.customer(SCENARIO).await?;
    let out_of_stock = CheckoutError::OutOfStock {
        product_id: product,
    };

    let error = rejected(
        SCENARIO,
        "add_cart_item",
        shop.checkout.add_cart_item(user, product, 3).await,
    )?;
    ensure(SCENARIO, error == out_of_stock, || {
        format!("expected out of stock, observed {error}")
    })?;
    let cart = shop.cart(SCENARIO, user).await?;
    ensure(SCENARIO, cart.items.is_empty(), || {
        format!("rejected add left a line behind: {cart:?}")
    })?;

    let cart = step(
        SCENARIO,
        "add_cart_item",
        shop.checkout.add_cart_item(user, product, 2),
    )
    .await?;
    let Some(item_id) = cart.items.first().map(|line| line.item_id) else {
        return Err(ContractTestFailure::assertion(
            SCENARIO,
            "cart has no line after adding an item",
        ));
    };

    let error = rejected(
        SCENARIO,
        "add_cart_item",
        shop.checkout.add_cart_item(user, product, 1).await,
    )?;
    ensure(SCENARIO, error == out_of_stock, || {
        format!("merged quantity beyond stock was accepted: {error}")
    })?;
    let error = rejected(
        SCENARIO,
        "update_cart_item",
        shop.checkout.update_cart_item(user, item_id, 5).await,
    )?;
    ensure(SCENARIO, error == out_of_stock, || {
        format!("update beyond stock was accepted: {error}")
    })?;

    let cart = shop.cart(SCENARIO, user).await?;
    ensure(
        SCENARIO,
        cart.items.len() == 1 && cart.items[0].quantity.into_inner() == 2,
        || format!("rejected changes altered the cart: {cart:?}"),
    )
}

pub async fn test_inventory_changes_are_recorded<F, S>(make_store: F) -> ContractTestResult
where
    F: Fn() -> S + Send + Sync + Clone + 'static,
    S: TestBackend,
{
    const SCENARIO: &str = "inventory_changes_are_recorded";

    let shop = Fixture::new(make_store());
    let product = shop.product(SCENARIO, "Widget", 1000, 5).await?;

    step(
        SCENARIO,
        "admin_set_inventory",
        shop.checkout
            .admin_set_inventory(shop.admin, product, 12, "cycle count"),
    )
    .await?;
    shop.expect_stock(SCENARIO, product, 12).await?;

    step(
        SCENARIO,
        "admin_restock",
        shop.checkout.admin_restock(shop.admin, product, 3, "delivery"),
    )
    .await?;
    shop.expect_stock(SCENARIO, product, 15).await?;

    let deltas = step(
        SCENARIO,
        "adjustment_deltas",
        shop.store.adjustment_deltas(product),
    )
    .await?;
    ensure(SCENARIO, deltas == [7, 3], || {
        format!("expected adjustments [7, 3], observed {deltas:?}")
    })?;

    let trail = step(
        SCENARIO,
        "audit_trail",
        shop.checkout
            .audit_trail(ResourceType::Product, product.into_inner()),
    )
    .await?;
    let [set, restock] = trail.as_slice() else {
        return Err(ContractTestFailure::assertion(
            SCENARIO,
            format!("expected two audit entries, observed {}", trail.len()),
        ));
    };
    ensure(
        SCENARIO,
        set.action == AuditAction::SetInventory
            && set.before == json!({"stock": 5})
            && set.after == json!({"stock": 12})
            && restock.action == AuditAction::RestockInventory
            && restock.before == json!({"stock": 12})
            && restock.after == json!({"stock": 15}),
        || format!("unexpected audit trail {trail:?}"),
    )?;

    let error = rejected(
        SCENARIO,
        "admin_set_inventory",
        shop.checkout
            .admin_set_inventory(shop.admin, ProductId::new(i64::MAX), 1, "ghost")
            .await,
    )?;
    ensure(
        SCENARIO,
        matches!(
            error,
            CheckoutError::NotFound {
                entity: Entity::Product,
                ..
            }
        ),
        || format!("expected missing product, observed {error}"),
    )
}

pub async fn test_admin_listing_filters_and_pages<F, S>(make_store: F) -> ContractTestResult
where
    F: Fn() -> S + Send + Sync + Clone + 'static,
    S: TestBackend,
{
    const SCENARIO: &str = "admin_listing_filters_and_pages";

    let shop = Fixture::new(make_store());
    let product = shop.product(SCENARIO, "Widget", 1000, 10).await?;
    let customer = shop.customer(SCENARIO).await?;
    let (user, _) = customer;

    let mut placed = Vec::new();
    for label in ["first", "second", "third"] {
        let order = shop
            .order(SCENARIO, customer, product, 1, &fresh_key(label))
            .await?;
        placed.push(order.id);
    }
    shop.set_status(SCENARIO, placed[1], "CANCELED").await?;

    let newest_first: Vec<OrderId> = placed.iter().rev().copied().collect();
    let listed = step(
        SCENARIO,
        "admin_list_orders",
        shop.checkout.admin_list_orders(OrderQuery {
            user_id: Some(user),
            ..OrderQuery::default()
        }),
    )
    .await?;
    let listed_ids: Vec<OrderId> = listed.iter().map(|order| order.id).collect();
    ensure(SCENARIO, listed_ids == newest_first, || {
        format!("expected {newest_first:?} newest first, observed {listed_ids:?}")
    })?;

    let canceled = step(
        SCENARIO,
        "admin_list_orders",
        shop.checkout.admin_list_orders(OrderQuery {
            status: Some("CANCELED".to_string()),
            user_id: Some(user),
            ..OrderQuery::default()
        }),
    )
    .await?;
    ensure(
        SCENARIO,
        canceled.len() == 1 && canceled[0].id == placed[1],
        || format!("status filter returned {canceled:?}"),
    )?;

    let second_page = step(
        SCENARIO,
        "admin_list_orders",
        shop.checkout.admin_list_orders(OrderQuery {
            user_id: Some(user),
            page: 2,
            limit: 2,
            ..OrderQuery::default()
        }),
    )
    .await?;
    ensure(
        SCENARIO,
        second_page.len() == 1 && second_page[0].id == placed[0],
        || format!("second page returned {second_page:?}"),
    )
}

pub async fn test_customers_see_only_their_orders<F, S>(make_store: F) -> ContractTestResult
where
    F: Fn() -> S + Send + Sync + Clone + 'static,
    S: TestBackend,
{
    const SCENARIO: &str = "customers_see_only_their_orders";

    let shop = Fixture::new(make_store());
    let product = shop.product(SCENARIO, "Widget", 1000, 5).await?;
    let customer = shop.customer(SCENARIO).await?;
    let (owner, _) = customer;
    let stranger = fresh_user();

    let order = shop
        .order(SCENARIO, customer, product, 1, &fresh_key("mine"))
        .await?;

    let mine = step(
        SCENARIO,
        "list_my_orders",
        shop.checkout.list_my_orders(owner),
    )
    .await?;
    ensure(
        SCENARIO,
        mine.len() == 1 && mine[0].id == order.id,
        || format!("owner listing returned {mine:?}"),
    )?;

    let theirs = step(
        SCENARIO,
        "list_my_orders",
        shop.checkout.list_my_orders(stranger),
    )
    .await?;
    ensure(SCENARIO, theirs.is_empty(), || {
        format!("stranger listing leaked {theirs:?}")
    })?;

    let error = rejected(
        SCENARIO,
        "get_my_order",
        shop.checkout.get_my_order(stranger, order.id).await,
    )?;
    ensure(
        SCENARIO,
        matches!(
            error,
            CheckoutError::NotFound {
                entity: Entity::Order,
                ..
            }
        ),
        || format!("stranger read another user's order: {error}"),
    )
}

#[macro_export]
macro_rules! ordercore_contract_tests {
    (suite = $suite:ident, make_store = $make_store:expr $(,)?) => {
        #[allow(non_snake_case)]
        mod $suite {
            use $crate::contract::{
                test_admin_listing_filters_and_pages, test_cancel_after_cart_reuse,
                test_cancel_restores_stock, test_cart_items_are_owner_scoped,
                test_cart_stock_checks, test_concurrent_cancellations_restore_once,
                test_concurrent_checkouts_never_oversell,
                test_concurrent_merge_add_sums_quantities, test_concurrent_same_key_places_once,
                test_customers_see_only_their_orders, test_empty_cart_cannot_be_placed,
                test_first_cart_access_creates_one_cart, test_inventory_changes_are_recorded,
                test_out_of_stock_keeps_cart, test_placement_checks_address,
                test_placement_is_idempotent, test_terminal_states_are_immutable,
                test_unavailable_products_are_rejected,
            };

            #[tokio::test(flavor = "multi_thread")]
            async fn placement_is_idempotent_contract() {
                test_placement_is_idempotent($make_store)
                    .await
                    .expect("ordercore contract failed");
            }

            #[tokio::test(flavor = "multi_thread")]
            async fn out_of_stock_keeps_cart_contract() {
                test_out_of_stock_keeps_cart($make_store)
                    .await
                    .expect("ordercore contract failed");
            }

            #[tokio::test(flavor = "multi_thread")]
            async fn cancel_restores_stock_contract() {
                test_cancel_restores_stock($make_store)
                    .await
                    .expect("ordercore contract failed");
            }

            #[tokio::test(flavor = "multi_thread")]
            async fn terminal_states_are_immutable_contract() {
                test_terminal_states_are_immutable($make_store)
                    .await
                    .expect("ordercore contract failed");
            }

            #[tokio::test(flavor = "multi_thread")]
            async fn concurrent_same_key_places_once_contract() {
                test_concurrent_same_key_places_once($make_store)
                    .await
                    .expect("ordercore contract failed");
            }

            #[tokio::test(flavor = "multi_thread")]
            async fn concurrent_checkouts_never_oversell_contract() {
                test_concurrent_checkouts_never_oversell($make_store)
                    .await
                    .expect("ordercore contract failed");
            }

            #[tokio::test(flavor = "multi_thread")]
            async fn concurrent_merge_add_sums_quantities_contract() {
                test_concurrent_merge_add_sums_quantities($make_store)
                    .await
                    .expect("ordercore contract failed");
            }

            #[tokio::test(flavor = "multi_thread")]
            async fn first_cart_access_creates_one_cart_contract() {
                test_first_cart_access_creates_one_cart($make_store)
                    .await
                    .expect("ordercore contract failed");
            }

            #[tokio::test(flavor = "multi_thread")]
            async fn concurrent_cancellations_restore_once_contract() {
                test_concurrent_cancellations_restore_once($make_store)
                    .await
                    .expect("ordercore contract failed");
            }

            #[tokio::test(flavor = "multi_thread")]
            async fn cancel_after_cart_reuse_contract() {
                test_cancel_after_cart_reuse($make_store)
                    .await
                    .expect("ordercore contract failed");
            }

            #[tokio::test(flavor = "multi_thread")]
            async fn placement_checks_address_contract() {
                test_placement_checks_address($make_store)
                    .await
                    .expect("ordercore contract failed");
            }

            #[tokio::test(flavor = "multi_thread")]
            async fn unavailable_products_are_rejected_contract() {
                test_unavailable_products_are_rejected($make_store)
                    .await
                    .expect("ordercore contract failed");
            }

            #[tokio::test(flavor = "multi_thread")]
            async fn empty_cart_cannot_be_placed_contract() {
                test_empty_cart_cannot_be_placed($make_store)
                    .await
                    .expect("ordercore contract failed");
            }

            #[tokio::test(flavor = "multi_thread")]
            async fn cart_items_are_owner_scoped_contract() {
                test_cart_items_are_owner_scoped($make_store)
                    .await
                    .expect("ordercore contract failed");
            }

            #[tokio::test(flavor = "multi_thread")]
            async fn cart_stock_checks_contract() {
                test_cart_stock_checks($make_store)
                    .await
                    .expect("ordercore contract failed");
            }

            #[tokio::test(flavor = "multi_thread")]
            async fn inventory_changes_are_recorded_contract() {
                test_inventory_changes_are_recorded($make_store)
                    .await
                    .expect("ordercore contract failed");
            }

            #[tokio::test(flavor = "multi_thread")]
            async fn admin_listing_filters_and_pages_contract() {
                test_admin_listing_filters_and_pages($make_store)
                    .await
                    .expect("ordercore contract failed");
            }

            #[tokio::test(flavor = "multi_thread")]
            async fn customers_see_only_their_orders_contract() {
                test_customers_see_only_their_orders($make_store)
                    .await
                    .expect("ordercore contract failed");
            }
        }
    };
}

pub use ordercore_contract_tests;
