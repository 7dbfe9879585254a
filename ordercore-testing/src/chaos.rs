use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::{Arc, Mutex};

use nutype::nutype;
use ordercore::{
    AddressDirectory, AddressId, AdjustmentReason, AuditEntry, AuditTrail, Cart, CartId, CartItem,
    CartItemId, CartStore, IdempotencyKey, InventoryAdjustment, InventoryLedger, Money,
    NewAuditEntry, NewOrder, NewOrderItem, Operation, Order, OrderFilter, OrderId, OrderItem,
    OrderRepository, OrderStatus, OwnedCartItem, Product, ProductCatalog, ProductId, Quantity,
    ResourceType, StockLevel, StoreError, TransactionCoordinator, UnitOfWork, UserId,
};
use rand::{random, rngs::StdRng, Rng, SeedableRng};
use tracing::{info, warn};

use crate::backend::TestBackend;

/// Probability value for chaos engineering injection rates.
///
/// Probability represents a value in the range [0.0, 1.0] where 0.0 means
/// never inject failures and 1.0 means always inject failures.
///
/// # Examples
///
/// ```ignore
/// use ordercore_testing::chaos::Probability;
///
/// let never = Probability::try_new(0.0).unwrap();
/// let always = Probability::try_new(1.0).unwrap();
///
/// // Values outside [0.0, 1.0] are rejected
/// assert!(Probability::try_new(1.5).is_err());
/// ```
#[nutype(
    validate(greater_or_equal = 0.0, less_or_equal = 1.0),
    derive(Debug, Clone, Copy, PartialEq, PartialOrd, Display, Into)
)]
pub struct Probability(f32);

/// Which storage calls fail, how often, and how many times at most.
#[derive(Debug, Clone)]
pub struct ChaosConfig {
    deterministic_seed: Option<u64>,
    failure_probability: Probability,
    transient_probability: Probability,
    target: Option<Operation>,
    max_injections: Option<u32>,
    key_collision: Option<KeyCollision>,
}

/// How a simulated concurrent duplicate placement resolves.
///
/// Either way, the first `insert_order` through the store reports a unique
/// violation on the `(user, idempotency key)` constraint.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeyCollision {
    /// The competing order, with the same lines and stock reservations,
    /// commits before the next transaction begins.
    WinnerCommits,
    /// No competing order ever becomes visible.
    WinnerVanishes,
}

impl ChaosConfig {
    pub fn deterministic() -> Self {
        Self {
            deterministic_seed: Some(0),
            ..Self::default()
        }
    }

    /// Inject [`StoreError::StoreFailure`] at this rate.
    pub fn with_failure_probability(mut self, probability: f32) -> Self {
        self.failure_probability = Probability::try_new(probability.clamp(0.0, 1.0))
            .expect("clamped value is always valid");
        self
    }

    /// Inject [`StoreError::Transient`] at this rate. Checked before outright failures.
    pub fn with_transient_probability(mut self, probability: f32) -> Self {
        self.transient_probability = Probability::try_new(probability.clamp(0.0, 1.0))
            .expect("clamped value is always valid");
        self
    }

    /// Only inject into calls of `operation`; every other call passes through.
    pub const fn targeting(mut self, operation: Operation) -> Self {
        self.target = Some(operation);
        self
    }

    /// Stop injecting after `count` failures.
    pub const fn at_most(mut self, count: u32) -> Self {
        self.max_injections = Some(count);
        self
    }

    /// Make the first order insert lose a race to a same-key duplicate.
    pub const fn colliding_on_key(mut self, collision: KeyCollision) -> Self {
        self.key_collision = Some(collision);
        self
    }
}

impl Default for ChaosConfig {
    fn default() -> Self {
        Self {
            deterministic_seed: None,
            failure_probability: Probability::try_new(0.0).expect("0.0 is valid probability"),
            transient_probability: Probability::try_new(0.0).expect("0.0 is valid probability"),
            target: None,
            max_injections: None,
            key_collision: None,
        }
    }
}

#[derive(Debug)]
struct ChaosState {
    config: ChaosConfig,
    rng: Mutex<StdRng>,
    injected: AtomicU32,
    collision_armed: AtomicBool,
    pending_winner: Mutex<Option<Winner>>,
}

/// An order that won a key collision but has not been written yet.
#[derive(Debug)]
struct Winner {
    order: NewOrder,
    reserved: Vec<(ProductId, Quantity)>,
}

impl ChaosState {
    fn roll(&self, probability: Probability) -> bool {
        let prob_f32: f32 = probability.into();

        if prob_f32 <= 0.0 {
            return false;
        }

        if prob_f32 >= 1.0 {
            return true;
        }

        let mut rng = self
            .rng
            .lock()
            .expect("chaos RNG mutex should not be poisoned");

        rng.random_bool(f64::from(prob_f32))
    }

    /// The error to inject into this call of `operation`, if any.
    fn inject(&self, operation: Operation) -> Option<StoreError> {
        if self
            .config
            .target
            .is_some_and(|target| target != operation)
        {
            return None;
        }

        let error = if self.roll(self.config.transient_probability) {
            StoreError::Transient { operation }
        } else if self.roll(self.config.failure_probability) {
            StoreError::StoreFailure { operation }
        } else {
            return None;
        };

        let budget = self.config.max_injections.unwrap_or(u32::MAX);
        let claimed = self
            .injected
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |count| {
                (count < budget).then_some(count + 1)
            });
        if claimed.is_err() {
            return None;
        }

        warn!(
            operation = %operation,
            error = %error,
            "[chaos.inject] injecting storage failure"
        );
        Some(error)
    }
}

/// Wraps any backend and makes selected storage calls fail.
///
/// A failed call leaves the wrapped transaction open and untouched; the
/// service under test is expected to drop it, which rolls it back.
#[derive(Debug, Clone)]
pub struct ChaosStore<S> {
    store: S,
    state: Arc<ChaosState>,
}

impl<S> ChaosStore<S> {
    pub fn new(store: S, config: ChaosConfig) -> Self {
        let rng = match config.deterministic_seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::seed_from_u64(random()),
        };

        Self {
            store,
            state: Arc::new(ChaosState {
                collision_armed: AtomicBool::new(config.key_collision.is_some()),
                pending_winner: Mutex::new(None),
                config,
                rng: Mutex::new(rng),
                injected: AtomicU32::new(0),
            }),
        }
    }

    /// The wrapped backend, for inspecting committed state.
    pub const fn inner(&self) -> &S {
        &self.store
    }

    /// How many failures have been injected so far.
    pub fn injected(&self) -> u32 {
        self.state.injected.load(Ordering::SeqCst)
    }
}

pub trait ChaosStoreExt: Sized {
    fn with_chaos(self, config: ChaosConfig) -> ChaosStore<Self>;
}

impl<S> ChaosStoreExt for S
where
    S: TransactionCoordinator,
{
    fn with_chaos(self, config: ChaosConfig) -> ChaosStore<Self> {
        ChaosStore::new(self, config)
    }
}

impl<S> TransactionCoordinator for ChaosStore<S>
where
    S: TransactionCoordinator,
{
    type Tx = ChaosTransaction<S::Tx>;

    async fn begin(&self) -> Result<Self::Tx, StoreError> {
        if let Some(error) = self.state.inject(Operation::BeginTransaction) {
            return Err(error);
        }
        let winner = self
            .state
            .pending_winner
            .lock()
            .expect("chaos winner mutex should not be poisoned")
            .take();
        if let Some(winner) = winner {
            commit_winner(&self.store, winner).await?;
        }

        let tx = self.store.begin().await?;
        Ok(ChaosTransaction {
            tx,
            state: Arc::clone(&self.state),
            reserved: Vec::new(),
        })
    }
}

/// Seeding and inspection bypass injection.
impl<S> TestBackend for ChaosStore<S>
where
    S: TestBackend,
{
    async fn seed_product(
        &self,
        name: &str,
        price: Money,
        stock: StockLevel,
    ) -> Result<ProductId, StoreError> {
        self.store.seed_product(name, price, stock).await
    }

    async fn seed_address(&self, user_id: UserId) -> Result<AddressId, StoreError> {
        self.store.seed_address(user_id).await
    }

    async fn deactivate_product(&self, product_id: ProductId) -> Result<(), StoreError> {
        self.store.deactivate_product(product_id).await
    }

    async fn soft_delete_product(&self, product_id: ProductId) -> Result<(), StoreError> {
        self.store.soft_delete_product(product_id).await
    }

    async fn stock_of(&self, product_id: ProductId) -> Result<StockLevel, StoreError> {
        self.store.stock_of(product_id).await
    }

    async fn active_cart_count(&self, user_id: UserId) -> Result<usize, StoreError> {
        self.store.active_cart_count(user_id).await
    }

    async fn orders_with_key(
        &self,
        user_id: UserId,
        key: &IdempotencyKey,
    ) -> Result<usize, StoreError> {
        self.store.orders_with_key(user_id, key).await
    }

    async fn adjustment_deltas(&self, product_id: ProductId) -> Result<Vec<i32>, StoreError> {
        self.store.adjustment_deltas(product_id).await
    }
}

/// A wrapped transaction that consults the chaos configuration before each call.
#[derive(Debug)]
pub struct ChaosTransaction<T> {
    tx: T,
    state: Arc<ChaosState>,
    reserved: Vec<(ProductId, Quantity)>,
}

impl<T> ChaosTransaction<T> {
    fn check(&self, operation: Operation) -> Result<(), StoreError> {
        self.state.inject(operation).map_or(Ok(()), Err)
    }

    /// Report the key as taken. A committing winner takes over this
    /// transaction's order and stock reservations.
    fn lose_key_race(&mut self, order: NewOrder) -> StoreError {
        let _ = self.state.injected.fetch_add(1, Ordering::SeqCst);
        warn!(
            user = %order.user_id,
            collision = ?self.state.config.key_collision,
            "[chaos.key_collision] order insert lost a same-key race"
        );

        if self.state.config.key_collision == Some(KeyCollision::WinnerCommits) {
            *self
                .state
                .pending_winner
                .lock()
                .expect("chaos winner mutex should not be poisoned") = Some(Winner {
                order,
                reserved: std::mem::take(&mut self.reserved),
            });
        }

        StoreError::UniqueViolation {
            constraint: ordercore_postgres::constraints::ORDERS_IDEMPOTENCY,
        }
    }
}

/// Write a race winner through the wrapped store: its stock reservations,
/// the order with current product snapshots, and the checked-out cart.
async fn commit_winner<S>(store: &S, winner: Winner) -> Result<(), StoreError>
where
    S: TransactionCoordinator,
{
    let Winner { order, reserved } = winner;
    let user_id = order.user_id;
    let mut tx = store.begin().await?;

    let mut items = Vec::with_capacity(reserved.len());
    for (product_id, quantity) in reserved {
        if !tx.decrease_if_enough(product_id, quantity).await? {
            return Err(StoreError::StoreFailure {
                operation: Operation::DecreaseStock,
            });
        }
        let product = tx
            .product(product_id)
            .await?
            .ok_or(StoreError::StoreFailure {
                operation: Operation::ReadProduct,
            })?;
        items.push(NewOrderItem {
            product_id,
            product_name: product.name,
            unit_price: product.price,
            quantity,
        });
    }

    let stored = tx.insert_order(order).await?;
    let _ = tx.insert_items(stored.id, items).await?;
    if let Some(cart) = tx.lock_active_cart(user_id).await? {
        tx.check_out(cart.id).await?;
    }
    tx.commit().await?;

    info!(
        user = %user_id,
        order = %stored.id,
        "[chaos.key_collision] concurrent winner committed"
    );
    Ok(())
}

impl<T> UnitOfWork for ChaosTransaction<T>
where
    T: UnitOfWork,
{
    async fn commit(self) -> Result<(), StoreError> {
        // Dropping the inner transaction on an injected failure rolls it back.
        self.check(Operation::CommitTransaction)?;
        self.tx.commit().await
    }

    async fn rollback(self) -> Result<(), StoreError> {
        self.check(Operation::RollbackTransaction)?;
        self.tx.rollback().await
    }
}

impl<T> InventoryLedger for ChaosTransaction<T>
where
    T: InventoryLedger + Send,
{
    async fn decrease_if_enough(
        &mut self,
        product_id: ProductId,
        quantity: Quantity,
    ) -> Result<bool, StoreError> {
        self.check(Operation::DecreaseStock)?;
        let decreased = self.tx.decrease_if_enough(product_id, quantity).await?;
        if decreased {
            self.reserved.push((product_id, quantity));
        }
        Ok(decreased)
    }

    async fn increase_stock(
        &mut self,
        product_id: ProductId,
        quantity: Quantity,
    ) -> Result<StockLevel, StoreError> {
        self.check(Operation::IncreaseStock)?;
        self.tx.increase_stock(product_id, quantity).await
    }

    async fn set_stock_with_adjustment(
        &mut self,
        admin_id: UserId,
        product_id: ProductId,
        new_stock: StockLevel,
        reason: AdjustmentReason,
    ) -> Result<(InventoryAdjustment, StockLevel), StoreError> {
        self.check(Operation::SetStock)?;
        self.tx
            .set_stock_with_adjustment(admin_id, product_id, new_stock, reason)
            .await
    }

    async fn record_adjustment(
        &mut self,
        admin_id: UserId,
        product_id: ProductId,
        delta: i32,
        reason: AdjustmentReason,
    ) -> Result<InventoryAdjustment, StoreError> {
        self.check(Operation::SetStock)?;
        self.tx
            .record_adjustment(admin_id, product_id, delta, reason)
            .await
    }
}

impl<T> CartStore for ChaosTransaction<T>
where
    T: CartStore + Send,
{
    async fn get_or_create_active_cart(&mut self, user_id: UserId) -> Result<Cart, StoreError> {
        self.check(Operation::CreateCart)?;
        self.tx.get_or_create_active_cart(user_id).await
    }

    async fn lock_active_cart(&mut self, user_id: UserId) -> Result<Option<Cart>, StoreError> {
        self.check(Operation::LockCart)?;
        self.tx.lock_active_cart(user_id).await
    }

    async fn add_item(
        &mut self,
        cart_id: CartId,
        product_id: ProductId,
        quantity: Quantity,
        unit_price: Money,
    ) -> Result<CartItem, StoreError> {
        self.check(Operation::AddCartItem)?;
        self.tx
            .add_item(cart_id, product_id, quantity, unit_price)
            .await
    }

    async fn items(&mut self, cart_id: CartId) -> Result<Vec<CartItem>, StoreError> {
        self.check(Operation::ReadCartItems)?;
        self.tx.items(cart_id).await
    }

    async fn owned_item(
        &mut self,
        item_id: CartItemId,
    ) -> Result<Option<OwnedCartItem>, StoreError> {
        self.check(Operation::ReadCartItems)?;
        self.tx.owned_item(item_id).await
    }

    async fn update_item_quantity(
        &mut self,
        item_id: CartItemId,
        quantity: Quantity,
    ) -> Result<CartItem, StoreError> {
        self.check(Operation::UpdateCartItem)?;
        self.tx.update_item_quantity(item_id, quantity).await
    }

    async fn delete_item(&mut self, item_id: CartItemId) -> Result<(), StoreError> {
        self.check(Operation::DeleteCartItem)?;
        self.tx.delete_item(item_id).await
    }

    async fn clear(&mut self, cart_id: CartId) -> Result<(), StoreError> {
        self.check(Operation::ClearCart)?;
        self.tx.clear(cart_id).await
    }

    async fn check_out(&mut self, cart_id: CartId) -> Result<(), StoreError> {
        self.check(Operation::CheckOutCart)?;
        self.tx.check_out(cart_id).await
    }
}

impl<T> OrderRepository for ChaosTransaction<T>
where
    T: OrderRepository + Send,
{
    async fn find_by_idempotency_key(
        &mut self,
        user_id: UserId,
        key: &IdempotencyKey,
    ) -> Result<Option<Order>, StoreError> {
        self.check(Operation::FindOrder)?;
        self.tx.find_by_idempotency_key(user_id, key).await
    }

    async fn insert_order(&mut self, order: NewOrder) -> Result<Order, StoreError> {
        self.check(Operation::InsertOrder)?;
        if self.state.collision_armed.swap(false, Ordering::SeqCst) {
            return Err(self.lose_key_race(order));
        }
        self.tx.insert_order(order).await
    }

    async fn insert_items(
        &mut self,
        order_id: OrderId,
        items: Vec<NewOrderItem>,
    ) -> Result<Vec<OrderItem>, StoreError> {
        self.check(Operation::InsertOrderItems)?;
        self.tx.insert_items(order_id, items).await
    }

    async fn find_order(&mut self, order_id: OrderId) -> Result<Option<Order>, StoreError> {
        self.check(Operation::FindOrder)?;
        self.tx.find_order(order_id).await
    }

    async fn lock_order(&mut self, order_id: OrderId) -> Result<Option<Order>, StoreError> {
        self.check(Operation::FindOrder)?;
        self.tx.lock_order(order_id).await
    }

    async fn order_items(&mut self, order_id: OrderId) -> Result<Vec<OrderItem>, StoreError> {
        self.check(Operation::ReadOrderItems)?;
        self.tx.order_items(order_id).await
    }

    async fn set_status(
        &mut self,
        order_id: OrderId,
        status: OrderStatus,
    ) -> Result<Order, StoreError> {
        self.check(Operation::UpdateOrderStatus)?;
        self.tx.set_status(order_id, status).await
    }

    async fn orders_for_user(&mut self, user_id: UserId) -> Result<Vec<Order>, StoreError> {
        self.check(Operation::ListOrders)?;
        self.tx.orders_for_user(user_id).await
    }

    async fn list_orders(&mut self, filter: &OrderFilter) -> Result<Vec<Order>, StoreError> {
        self.check(Operation::ListOrders)?;
        self.tx.list_orders(filter).await
    }
}

impl<T> ProductCatalog for ChaosTransaction<T>
where
    T: ProductCatalog + Send,
{
    async fn product(&mut self, product_id: ProductId) -> Result<Option<Product>, StoreError> {
        self.check(Operation::ReadProduct)?;
        self.tx.product(product_id).await
    }
}

impl<T> AddressDirectory for ChaosTransaction<T>
where
    T: AddressDirectory + Send,
{
    async fn address_owner(&mut self, address_id: AddressId) -> Result<Option<UserId>, StoreError> {
        self.check(Operation::ReadAddress)?;
        self.tx.address_owner(address_id).await
    }
}

impl<T> AuditTrail for ChaosTransaction<T>
where
    T: AuditTrail + Send,
{
    async fn append_audit(&mut self, entry: NewAuditEntry) -> Result<AuditEntry, StoreError> {
        self.check(Operation::AppendAudit)?;
        self.tx.append_audit(entry).await
    }

    async fn audit_entries(
        &mut self,
        resource_type: ResourceType,
        resource_id: i64,
    ) -> Result<Vec<AuditEntry>, StoreError> {
        self.check(Operation::ReadAudit)?;
        self.tx.audit_entries(resource_type, resource_id).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ordercore_memory::InMemoryStore;

    #[test]
    fn deterministic_config_sets_seed() {
        let default_is_none = ChaosConfig::default().deterministic_seed.is_none();
        let deterministic_is_some = ChaosConfig::deterministic().deterministic_seed.is_some();

        assert!(default_is_none && deterministic_is_some);
    }

    #[test]
    fn out_of_range_probabilities_are_clamped() {
        let config = ChaosConfig::default()
            .with_failure_probability(7.0)
            .with_transient_probability(-1.0);

        assert_eq!(f32::from(config.failure_probability), 1.0);
        assert_eq!(f32::from(config.transient_probability), 0.0);
    }

    #[tokio::test]
    async fn zero_probability_passthrough_allows_normal_operations() {
        let chaos_store = InMemoryStore::new().with_chaos(ChaosConfig::default());

        let mut tx = chaos_store.begin().await.expect("begin should pass through");
        let cart = tx
            .get_or_create_active_cart(UserId::new(1))
            .await
            .expect("cart creation should pass through");
        tx.commit().await.expect("commit should pass through");

        assert_eq!(cart.user_id, UserId::new(1));
        assert_eq!(chaos_store.injected(), 0);
    }

    #[tokio::test]
    async fn targeted_injection_leaves_other_operations_alone() {
        let chaos_store = InMemoryStore::new().with_chaos(
            ChaosConfig::deterministic()
                .with_failure_probability(1.0)
                .targeting(Operation::ClearCart),
        );

        let mut tx = chaos_store.begin().await.expect("begin is not targeted");
        let cart = tx
            .get_or_create_active_cart(UserId::new(1))
            .await
            .expect("cart creation is not targeted");

        assert_eq!(
            tx.clear(cart.id).await,
            Err(StoreError::StoreFailure {
                operation: Operation::ClearCart
            })
        );
        assert_eq!(chaos_store.injected(), 1);
    }

    #[tokio::test]
    async fn injection_budget_is_respected() {
        let chaos_store = InMemoryStore::new().with_chaos(
            ChaosConfig::deterministic()
                .with_transient_probability(1.0)
                .targeting(Operation::BeginTransaction)
                .at_most(2),
        );

        assert!(chaos_store.begin().await.is_err());
        assert!(chaos_store.begin().await.is_err());
        assert!(chaos_store.begin().await.is_ok());
        assert_eq!(chaos_store.injected(), 2);
    }

    #[tokio::test]
    async fn failed_commit_discards_the_transaction() {
        let memory = InMemoryStore::new();
        let chaos_store = memory.clone().with_chaos(
            ChaosConfig::deterministic()
                .with_failure_probability(1.0)
                .targeting(Operation::CommitTransaction),
        );

        let mut tx = chaos_store.begin().await.expect("begin is not targeted");
        let _ = tx
            .get_or_create_active_cart(UserId::new(9))
            .await
            .expect("cart creation is not targeted");
        assert!(tx.commit().await.is_err());

        assert_eq!(memory.active_cart_count(UserId::new(9)).await, 0);
    }

    #[tokio::test]
    async fn key_collision_fails_only_the_first_order_insert() {
        let memory = InMemoryStore::new();
        let address = memory.insert_address(UserId::new(3)).await;
        let chaos_store = memory
            .clone()
            .with_chaos(ChaosConfig::default().colliding_on_key(KeyCollision::WinnerVanishes));
        let order = NewOrder {
            user_id: UserId::new(3),
            address_id: address,
            total_price: Money::try_new(0).expect("valid price"),
            idempotency_key: IdempotencyKey::try_new("key-1").expect("valid key"),
        };

        let mut tx = chaos_store.begin().await.expect("begin is not targeted");
        assert_eq!(
            tx.insert_order(order.clone()).await,
            Err(StoreError::UniqueViolation {
                constraint: ordercore_postgres::constraints::ORDERS_IDEMPOTENCY
            })
        );
        drop(tx);

        let mut tx = chaos_store.begin().await.expect("begin is not targeted");
        let stored = tx.insert_order(order).await.expect("second insert passes through");
        tx.commit().await.expect("commit should pass through");

        assert_eq!(stored.user_id, UserId::new(3));
        assert_eq!(chaos_store.injected(), 1);
        assert_eq!(memory.order_count().await, 1);
    }
}
