//! Property tests for stock conservation under concurrent checkout and
//! cancellation.

use futures::future::join_all;
use ordercore::{
    Checkout, CheckoutConfig, CheckoutError, Money, OrderStatus, Quantity, StockLevel, UserId,
};
use ordercore_memory::InMemoryStore;
use proptest::prelude::*;

/// One customer's basket quantity and whether the order gets canceled afterwards.
fn arb_customers() -> impl Strategy<Value = Vec<(i32, bool)>> {
    prop::collection::vec((1..=6i32, any::<bool>()), 1..8)
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(32))]

    #[test]
    fn placed_minus_canceled_units_equal_the_stock_taken(
        initial_stock in 0..25i32,
        customers in arb_customers(),
    ) {
        let rt = tokio::runtime::Runtime::new().unwrap();
        let (remaining, kept_units) = rt.block_on(async {
            let store = InMemoryStore::new();
            let checkout = Checkout::new(store.clone(), CheckoutConfig::default());
            let product = store
                .insert_product(
                    "Widget",
                    Money::try_new(100).unwrap(),
                    StockLevel::try_new(initial_stock).unwrap(),
                )
                .await;

            let mut baskets = Vec::new();
            for (index, (quantity, cancel)) in customers.iter().copied().enumerate() {
                let user = UserId::new(i64::try_from(index).unwrap() + 1);
                let address = store.insert_address(user).await;
                // Seed the cart directly: the advisory add-time stock check
                // would otherwise filter out the contended baskets.
                let _ = store
                    .seed_cart_line(user, product, Quantity::try_new(quantity).unwrap())
                    .await
                    .unwrap();
                baskets.push((user, address, quantity, cancel));
            }

            let attempts = baskets.iter().map(|(user, address, _, _)| {
                checkout.place_order(*user, *address, "basket")
            });
            let outcomes = join_all(attempts).await;

            let mut kept_units = 0;
            for (outcome, (_, _, quantity, cancel)) in outcomes.into_iter().zip(&baskets) {
                match outcome {
                    Ok(order) => {
                        assert_eq!(order.status, OrderStatus::Pending);
                        if *cancel {
                            checkout
                                .admin_update_order_status(UserId::new(0), order.id, "CANCELED")
                                .await
                                .unwrap();
                        } else {
                            kept_units += quantity;
                        }
                    }
                    Err(CheckoutError::OutOfStock { product_id }) => {
                        assert_eq!(product_id, product);
                    }
                    Err(other) => panic!("unexpected placement failure: {other}"),
                }
            }

            let remaining = store.product_snapshot(product).await.unwrap().stock.into_inner();
            (remaining, kept_units)
        });

        prop_assert!(remaining >= 0);
        prop_assert_eq!(remaining + kept_units, initial_stock);
    }
}
