#![forbid(
    invalid_value,
    overflowing_literals,
    unconditional_recursion,
    unused_allocation,
    unsafe_code
)]
#![deny(
    bad_style,
    deprecated,
    meta_variable_misuse,
    non_ascii_idents,
    non_camel_case_types,
    non_snake_case,
    non_upper_case_globals,
    rust_2018_idioms,
    trivial_casts,
    trivial_numeric_casts,
    unreachable_code,
    unused_assignments,
    unused_attributes,
    unused_extern_crates,
    unused_imports,
    unused_must_use,
    unused_mut,
    unused_parens,
    unused_results,
    unused_variables
)]

//! Transactional checkout core for an e-commerce backend.
//!
//! `ordercore` turns a shopping cart into a durable order while keeping
//! product inventory consistent under concurrent access, and lets an
//! administrator move an order through its lifecycle without stock and order
//! state diverging.
//!
//! # Guarantees
//!
//! - Exactly one order per `(user, idempotency key)`, even when the same
//!   request is retried or submitted concurrently
//! - No overselling: stock is decremented with a conditional storage
//!   operation, never read-check-write
//! - Cancellation restores exactly the stock the order took, in the same
//!   transaction as the status change and its audit entry
//!
//! # Overview
//!
//! - Storage traits: [`InventoryLedger`], [`CartStore`], [`OrderRepository`],
//!   [`ProductCatalog`], [`AddressDirectory`], [`AuditTrail`], bundled per
//!   transaction by [`TransactionCoordinator`]
//! - Services: [`CartService`], [`OrderPlacer`], [`OrderLifecycleManager`],
//!   [`InventoryManager`], [`CustomerOrders`]
//! - Facade: [`Checkout`] validates raw input and retries transient failures
//!
//! Backends live in `ordercore-memory` and `ordercore-postgres`.

mod cart;
mod checkout;
mod config;
mod errors;
mod inventory;
mod lifecycle;
mod model;
mod placement;
mod queries;
mod retry;
mod store;
mod types;
mod validation;
mod views;

pub use cart::CartService;
pub use checkout::{Checkout, OrderQuery};
pub use config::{
    BackoffMultiplier, CheckoutConfig, MaxRetryAttempts, RetryBaseDelayMs, RetryMaxDelayMs,
    RetryPolicy,
};
pub use errors::{CheckoutError, Entity, ErrorKind, Operation, StoreError};
pub use inventory::InventoryManager;
pub use lifecycle::{OrderLifecycleManager, Transition};
pub use model::{
    AuditEntry, Cart, CartItem, InventoryAdjustment, NewAuditEntry, NewOrder, NewOrderItem, Order,
    OrderFilter, OrderItem, OwnedCartItem, Product,
};
pub use placement::OrderPlacer;
pub use queries::CustomerOrders;
pub use store::{
    AddressDirectory, AuditTrail, CartStore, InventoryLedger, OrderRepository, ProductCatalog,
    TransactionCoordinator, UnitOfWork,
};
pub use types::{
    AddressId, AdjustmentId, AdjustmentReason, AuditAction, AuditEntryId, CartId, CartItemId,
    CartStatus, IdempotencyKey, Money, OrderId, OrderItemId, OrderStatus, PageLimit, PageNumber,
    ProductId, Quantity, ResourceType, StockLevel, UnknownVariant, UserId,
};
pub use views::{CartLineView, CartView, OrderItemView, OrderView};
