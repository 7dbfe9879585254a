//! Seeding and inspection hooks the contract suite needs from a backend.
//!
//! Products and addresses belong to collaborators outside ordercore, so the
//! storage traits have no way to create them. Each backend under test exposes
//! that here, together with a few read-only queries that look at committed
//! state directly instead of going through the services being verified.

use std::future::Future;

use ordercore::{
    AddressId, Entity, IdempotencyKey, Money, Operation, ProductId, StockLevel, StoreError,
    TransactionCoordinator, UserId,
};
use ordercore_memory::InMemoryStore;
use ordercore_postgres::PostgresStore;
use tracing::error;

/// A storage backend the contract suite can seed and inspect.
pub trait TestBackend: TransactionCoordinator + Clone + 'static {
    /// Add an active product to the catalog.
    fn seed_product(
        &self,
        name: &str,
        price: Money,
        stock: StockLevel,
    ) -> impl Future<Output = Result<ProductId, StoreError>> + Send;

    /// Add an address owned by `user_id`.
    fn seed_address(
        &self,
        user_id: UserId,
    ) -> impl Future<Output = Result<AddressId, StoreError>> + Send;

    /// Mark a product inactive, as the catalog would.
    fn deactivate_product(
        &self,
        product_id: ProductId,
    ) -> impl Future<Output = Result<(), StoreError>> + Send;

    /// Soft-delete a product, as the catalog would.
    fn soft_delete_product(
        &self,
        product_id: ProductId,
    ) -> impl Future<Output = Result<(), StoreError>> + Send;

    /// Committed stock level.
    fn stock_of(
        &self,
        product_id: ProductId,
    ) -> impl Future<Output = Result<StockLevel, StoreError>> + Send;

    /// Number of ACTIVE carts the user has.
    fn active_cart_count(
        &self,
        user_id: UserId,
    ) -> impl Future<Output = Result<usize, StoreError>> + Send;

    /// Number of committed orders stored under `(user_id, key)`.
    fn orders_with_key(
        &self,
        user_id: UserId,
        key: &IdempotencyKey,
    ) -> impl Future<Output = Result<usize, StoreError>> + Send;

    /// Deltas of the product's committed adjustments, oldest first.
    fn adjustment_deltas(
        &self,
        product_id: ProductId,
    ) -> impl Future<Output = Result<Vec<i32>, StoreError>> + Send;
}

fn missing_product(product_id: ProductId) -> StoreError {
    StoreError::NotFound {
        entity: Entity::Product,
        id: product_id.into_inner(),
    }
}

impl TestBackend for InMemoryStore {
    async fn seed_product(
        &self,
        name: &str,
        price: Money,
        stock: StockLevel,
    ) -> Result<ProductId, StoreError> {
        Ok(self.insert_product(name, price, stock).await)
    }

    async fn seed_address(&self, user_id: UserId) -> Result<AddressId, StoreError> {
        Ok(self.insert_address(user_id).await)
    }

    async fn deactivate_product(&self, product_id: ProductId) -> Result<(), StoreError> {
        if self.set_product_active(product_id, false).await {
            Ok(())
        } else {
            Err(missing_product(product_id))
        }
    }

    async fn soft_delete_product(&self, product_id: ProductId) -> Result<(), StoreError> {
        if InMemoryStore::soft_delete_product(self, product_id).await {
            Ok(())
        } else {
            Err(missing_product(product_id))
        }
    }

    async fn stock_of(&self, product_id: ProductId) -> Result<StockLevel, StoreError> {
        self.product_snapshot(product_id)
            .await
            .map(|product| product.stock)
            .ok_or_else(|| missing_product(product_id))
    }

    async fn active_cart_count(&self, user_id: UserId) -> Result<usize, StoreError> {
        Ok(InMemoryStore::active_cart_count(self, user_id).await)
    }

    async fn orders_with_key(
        &self,
        user_id: UserId,
        key: &IdempotencyKey,
    ) -> Result<usize, StoreError> {
        Ok(InMemoryStore::orders_with_key(self, user_id, key).await)
    }

    async fn adjustment_deltas(&self, product_id: ProductId) -> Result<Vec<i32>, StoreError> {
        Ok(self
            .adjustments_for(product_id)
            .await
            .into_iter()
            .map(|adjustment| adjustment.delta)
            .collect())
    }
}

/// Log the database error and report it as a failed storage call.
fn inspection_failed(operation: Operation) -> impl FnOnce(sqlx::Error) -> StoreError {
    move |error| {
        error!(
            error = %error,
            operation = %operation,
            "[testing.inspect] backend inspection query failed"
        );
        StoreError::StoreFailure { operation }
    }
}

fn row_count(count: i64, entity: Entity) -> Result<usize, StoreError> {
    usize::try_from(count).map_err(|error| StoreError::corrupt(entity, error))
}

impl TestBackend for PostgresStore {
    async fn seed_product(
        &self,
        name: &str,
        price: Money,
        stock: StockLevel,
    ) -> Result<ProductId, StoreError> {
        let id: i64 = sqlx::query_scalar(
            "INSERT INTO products (name, price, stock) VALUES ($1, $2, $3) RETURNING id",
        )
        .bind(name)
        .bind(price.into_inner())
        .bind(stock.into_inner())
        .fetch_one(self.pool())
        .await
        .map_err(inspection_failed(Operation::SetStock))?;
        Ok(ProductId::new(id))
    }

    async fn seed_address(&self, user_id: UserId) -> Result<AddressId, StoreError> {
        let id: i64 = sqlx::query_scalar("INSERT INTO addresses (user_id) VALUES ($1) RETURNING id")
            .bind(user_id.into_inner())
            .fetch_one(self.pool())
            .await
            .map_err(inspection_failed(Operation::ReadAddress))?;
        Ok(AddressId::new(id))
    }

    async fn deactivate_product(&self, product_id: ProductId) -> Result<(), StoreError> {
        let result = sqlx::query("UPDATE products SET active = FALSE WHERE id = $1")
            .bind(product_id.into_inner())
            .execute(self.pool())
            .await
            .map_err(inspection_failed(Operation::ReadProduct))?;
        if result.rows_affected() == 0 {
            return Err(missing_product(product_id));
        }
        Ok(())
    }

    async fn soft_delete_product(&self, product_id: ProductId) -> Result<(), StoreError> {
        let result = sqlx::query("UPDATE products SET deleted_at = now() WHERE id = $1")
            .bind(product_id.into_inner())
            .execute(self.pool())
            .await
            .map_err(inspection_failed(Operation::ReadProduct))?;
        if result.rows_affected() == 0 {
            return Err(missing_product(product_id));
        }
        Ok(())
    }

    async fn stock_of(&self, product_id: ProductId) -> Result<StockLevel, StoreError> {
        let stock: Option<i32> = sqlx::query_scalar("SELECT stock FROM products WHERE id = $1")
            .bind(product_id.into_inner())
            .fetch_optional(self.pool())
            .await
            .map_err(inspection_failed(Operation::ReadProduct))?;
        let stock = stock.ok_or_else(|| missing_product(product_id))?;
        StockLevel::try_new(stock).map_err(|error| StoreError::corrupt(Entity::Product, error))
    }

    async fn active_cart_count(&self, user_id: UserId) -> Result<usize, StoreError> {
        let count: i64 = sqlx::query_scalar(
            "SELECT COUNT(*) FROM carts WHERE user_id = $1 AND status = 'ACTIVE'",
        )
        .bind(user_id.into_inner())
        .fetch_one(self.pool())
        .await
        .map_err(inspection_failed(Operation::LockCart))?;
        row_count(count, Entity::Cart)
    }

    async fn orders_with_key(
        &self,
        user_id: UserId,
        key: &IdempotencyKey,
    ) -> Result<usize, StoreError> {
        let count: i64 = sqlx::query_scalar(
            "SELECT COUNT(*) FROM orders WHERE user_id = $1 AND idempotency_key = $2",
        )
        .bind(user_id.into_inner())
        .bind(key.as_str())
        .fetch_one(self.pool())
        .await
        .map_err(inspection_failed(Operation::FindOrder))?;
        row_count(count, Entity::Order)
    }

    async fn adjustment_deltas(&self, product_id: ProductId) -> Result<Vec<i32>, StoreError> {
        sqlx::query_scalar(
            "SELECT delta FROM inventory_adjustments WHERE product_id = $1 ORDER BY id",
        )
        .bind(product_id.into_inner())
        .fetch_all(self.pool())
        .await
        .map_err(inspection_failed(Operation::SetStock))
    }
}
