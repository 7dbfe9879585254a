//! Error types for ordercore.
//!
//! Two layers, mirroring the storage/service split:
//!
//! - **StoreError**: what a backend reports about a single storage call.
//! - **CheckoutError**: what an operation reports to its caller. Every
//!   component returns it unchanged up the call chain; only the HTTP
//!   collaborator maps it to transport codes, using [`CheckoutError::kind`].
//!
//! Any error raised while a unit of work is open aborts that unit of work, so
//! none of these errors ever leaves a partial mutation behind.

use std::fmt;

use thiserror::Error;

use crate::types::{OrderStatus, ProductId};

/// Kind of record an error refers to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Entity {
    Address,
    Product,
    Cart,
    CartItem,
    Order,
    OrderItem,
    InventoryAdjustment,
    AuditEntry,
}

impl fmt::Display for Entity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Address => write!(f, "address"),
            Self::Product => write!(f, "product"),
            Self::Cart => write!(f, "cart"),
            Self::CartItem => write!(f, "cart item"),
            Self::Order => write!(f, "order"),
            Self::OrderItem => write!(f, "order item"),
            Self::InventoryAdjustment => write!(f, "inventory adjustment"),
            Self::AuditEntry => write!(f, "audit entry"),
        }
    }
}

/// Storage operation identifiers used in error reporting.
///
/// Identifies which storage call encountered an infrastructure failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operation {
    BeginTransaction,
    CommitTransaction,
    RollbackTransaction,
    DecreaseStock,
    IncreaseStock,
    SetStock,
    ReadProduct,
    ReadAddress,
    LockCart,
    CreateCart,
    AddCartItem,
    ReadCartItems,
    UpdateCartItem,
    DeleteCartItem,
    ClearCart,
    CheckOutCart,
    FindOrder,
    InsertOrder,
    InsertOrderItems,
    ReadOrderItems,
    UpdateOrderStatus,
    ListOrders,
    AppendAudit,
    ReadAudit,
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::BeginTransaction => "begin_transaction",
            Self::CommitTransaction => "commit_transaction",
            Self::RollbackTransaction => "rollback_transaction",
            Self::DecreaseStock => "decrease_stock",
            Self::IncreaseStock => "increase_stock",
            Self::SetStock => "set_stock",
            Self::ReadProduct => "read_product",
            Self::ReadAddress => "read_address",
            Self::LockCart => "lock_cart",
            Self::CreateCart => "create_cart",
            Self::AddCartItem => "add_cart_item",
            Self::ReadCartItems => "read_cart_items",
            Self::UpdateCartItem => "update_cart_item",
            Self::DeleteCartItem => "delete_cart_item",
            Self::ClearCart => "clear_cart",
            Self::CheckOutCart => "check_out_cart",
            Self::FindOrder => "find_order",
            Self::InsertOrder => "insert_order",
            Self::InsertOrderItems => "insert_order_items",
            Self::ReadOrderItems => "read_order_items",
            Self::UpdateOrderStatus => "update_order_status",
            Self::ListOrders => "list_orders",
            Self::AppendAudit => "append_audit",
            Self::ReadAudit => "read_audit",
        };
        f.write_str(name)
    }
}

/// Error type returned by storage backends.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StoreError {
    /// The row a mutation targeted does not exist (or vanished after a check).
    #[error("{entity} {id} not found")]
    NotFound { entity: Entity, id: i64 },

    /// A storage-enforced uniqueness constraint rejected the write.
    ///
    /// In SQL backends the enclosing transaction is no longer usable after
    /// this error and must be rolled back.
    #[error("unique constraint {constraint} violated")]
    UniqueViolation { constraint: &'static str },

    /// The backend aborted the transaction to resolve contention
    /// (serialization failure, deadlock). Retrying the whole unit of work is safe.
    #[error("{operation} aborted by concurrent transaction")]
    Transient { operation: Operation },

    /// Infrastructure failure (connection drop, timeout, unexpected SQL error).
    #[error("{operation} operation failed")]
    StoreFailure { operation: Operation },

    /// A stored row could not be turned back into a domain value.
    #[error("stored {entity} row is invalid: {detail}")]
    Corrupt { entity: Entity, detail: String },
}

impl StoreError {
    /// Builds a [`StoreError::Corrupt`] from any displayable cause.
    pub fn corrupt(entity: Entity, detail: impl fmt::Display) -> Self {
        Self::Corrupt {
            entity,
            detail: detail.to_string(),
        }
    }
}

/// Coarse classification for transport mapping.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    Validation,
    NotFound,
    Forbidden,
    Conflict,
    Internal,
}

/// Errors returned by every ordercore operation.
///
/// # Error Handling Strategy
///
/// - **Validation**: never retried; the client must fix its input
/// - **NotFound** / **Forbidden**: surfaced as-is
/// - **CartEmpty**, **OutOfStock**, **ProductUnavailable**,
///   **IdempotencyConflict**, **InvalidTransition**: business-rule failures,
///   terminal for this attempt
/// - **Store**: internal; the transaction was rolled back, so retrying with
///   the same idempotency key is safe and non-duplicating
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CheckoutError {
    /// Malformed or missing input.
    #[error("invalid {field}: {reason}")]
    Validation { field: &'static str, reason: String },

    /// A referenced record does not exist.
    #[error("{entity} {id} not found")]
    NotFound { entity: Entity, id: i64 },

    /// A referenced record exists but belongs to someone else.
    #[error("forbidden")]
    Forbidden { entity: Entity },

    /// Checkout attempted without an active cart or with no items in it.
    #[error("cart is empty")]
    CartEmpty,

    /// Not enough stock to satisfy a line.
    #[error("product {product_id} is out of stock")]
    OutOfStock { product_id: ProductId },

    /// The product is inactive or deleted and cannot be purchased.
    #[error("product {product_id} is invalid")]
    ProductUnavailable { product_id: ProductId },

    /// The idempotency key collided but no winning order could be found.
    #[error("idempotency key conflict")]
    IdempotencyConflict,

    /// The order state machine does not allow the requested change.
    #[error("{message}")]
    InvalidTransition {
        from: OrderStatus,
        message: &'static str,
    },

    /// Storage or infrastructure failure.
    #[error("internal error: {0}")]
    Store(StoreError),
}

impl CheckoutError {
    /// Builds a [`CheckoutError::Validation`] from any displayable cause.
    pub fn validation(field: &'static str, reason: impl fmt::Display) -> Self {
        Self::Validation {
            field,
            reason: reason.to_string(),
        }
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Validation { .. } => ErrorKind::Validation,
            Self::NotFound { .. } => ErrorKind::NotFound,
            Self::Forbidden { .. } => ErrorKind::Forbidden,
            Self::CartEmpty
            | Self::OutOfStock { .. }
            | Self::ProductUnavailable { .. }
            | Self::IdempotencyConflict
            | Self::InvalidTransition { .. } => ErrorKind::Conflict,
            Self::Store(_) => ErrorKind::Internal,
        }
    }

    /// Whether re-running the whole operation may succeed unchanged.
    pub const fn is_retryable(&self) -> bool {
        matches!(self, Self::Store(StoreError::Transient { .. }))
    }
}

impl From<StoreError> for CheckoutError {
    fn from(error: StoreError) -> Self {
        match error {
            StoreError::NotFound { entity, id } => Self::NotFound { entity, id },
            other => Self::Store(other),
        }
    }
}
