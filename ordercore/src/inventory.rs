//! Administrative stock changes.
//!
//! Both operations write an inventory adjustment and an audit entry in the
//! same transaction as the stock change.

use serde_json::json;
use tracing::{info, instrument};

use crate::errors::CheckoutError;
use crate::model::NewAuditEntry;
use crate::store::{AuditTrail, InventoryLedger, TransactionCoordinator, UnitOfWork};
use crate::types::{
    AdjustmentReason, AuditAction, ProductId, Quantity, ResourceType, StockLevel, UserId,
};

#[derive(Debug, Clone)]
pub struct InventoryManager<S> {
    store: S,
}

impl<S> InventoryManager<S>
where
    S: TransactionCoordinator,
{
    pub const fn new(store: S) -> Self {
        Self { store }
    }

    /// Overwrite a product's stock with an absolute level.
    #[instrument(name = "inventory.set", skip(self, reason))]
    pub async fn set_inventory(
        &self,
        admin_id: UserId,
        product_id: ProductId,
        new_stock: StockLevel,
        reason: AdjustmentReason,
    ) -> Result<(), CheckoutError> {
        let mut tx = self.store.begin().await?;

        let (adjustment, old_stock) = tx
            .set_stock_with_adjustment(admin_id, product_id, new_stock, reason)
            .await?;
        let _ = tx
            .append_audit(NewAuditEntry {
                actor_id: admin_id,
                action: AuditAction::SetInventory,
                resource_type: ResourceType::Product,
                resource_id: product_id.into_inner(),
                before: json!({ "stock": old_stock }),
                after: json!({ "stock": new_stock }),
            })
            .await?;
        tx.commit().await?;

        info!(
            admin = %admin_id,
            product = %product_id,
            from = %old_stock,
            to = %new_stock,
            delta = adjustment.delta,
            "[inventory.set] stock overwritten"
        );
        Ok(())
    }

    /// Add `quantity` units to a product's stock.
    #[instrument(name = "inventory.restock", skip(self, reason))]
    pub async fn restock(
        &self,
        admin_id: UserId,
        product_id: ProductId,
        quantity: Quantity,
        reason: AdjustmentReason,
    ) -> Result<(), CheckoutError> {
        let mut tx = self.store.begin().await?;

        let new_stock = tx.increase_stock(product_id, quantity).await?;
        let delta = quantity.into_inner();
        let _ = tx
            .record_adjustment(admin_id, product_id, delta, reason)
            .await?;
        let _ = tx
            .append_audit(NewAuditEntry {
                actor_id: admin_id,
                action: AuditAction::RestockInventory,
                resource_type: ResourceType::Product,
                resource_id: product_id.into_inner(),
                before: json!({ "stock": new_stock.into_inner() - delta }),
                after: json!({ "stock": new_stock }),
            })
            .await?;
        tx.commit().await?;

        info!(
            admin = %admin_id,
            product = %product_id,
            added = delta,
            stock = %new_stock,
            "[inventory.restock] stock increased"
        );
        Ok(())
    }
}
