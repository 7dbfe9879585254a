//! Domain value types for ordercore.
//!
//! Every value that crosses a component boundary is a smart-constructed newtype,
//! so a `Quantity` is always positive and an `IdempotencyKey` always fits its
//! column. Identifiers are opaque wrappers over the storage row id.

use std::fmt;
use std::str::FromStr;

use nutype::nutype;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::validation::{fits_reason_column, is_usable_key};

/// Identifier of an authenticated user, supplied by the auth collaborator.
#[nutype(derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    PartialOrd,
    Ord,
    Hash,
    Display,
    Into,
    Serialize,
    Deserialize
))]
pub struct UserId(i64);

/// Identifier of a catalog product.
#[nutype(derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    PartialOrd,
    Ord,
    Hash,
    Display,
    Into,
    Serialize,
    Deserialize
))]
pub struct ProductId(i64);

/// Identifier of a shipping address owned by a user.
#[nutype(derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    PartialOrd,
    Ord,
    Hash,
    Display,
    Into,
    Serialize,
    Deserialize
))]
pub struct AddressId(i64);

/// Identifier of a shopping cart.
#[nutype(derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    PartialOrd,
    Ord,
    Hash,
    Display,
    Into,
    Serialize,
    Deserialize
))]
pub struct CartId(i64);

/// Identifier of a cart line.
#[nutype(derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    PartialOrd,
    Ord,
    Hash,
    Display,
    Into,
    Serialize,
    Deserialize
))]
pub struct CartItemId(i64);

/// Identifier of a placed order.
#[nutype(derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    PartialOrd,
    Ord,
    Hash,
    Display,
    Into,
    Serialize,
    Deserialize
))]
pub struct OrderId(i64);

/// Identifier of an order line.
#[nutype(derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    PartialOrd,
    Ord,
    Hash,
    Display,
    Into,
    Serialize,
    Deserialize
))]
pub struct OrderItemId(i64);

/// Identifier of an inventory adjustment row.
#[nutype(derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    PartialOrd,
    Ord,
    Hash,
    Display,
    Into,
    Serialize,
    Deserialize
))]
pub struct AdjustmentId(i64);

/// Identifier of an audit log row.
#[nutype(derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    PartialOrd,
    Ord,
    Hash,
    Display,
    Into,
    Serialize,
    Deserialize
))]
pub struct AuditEntryId(i64);

/// Number of units on a cart or order line.
///
/// Always at least one; a line that would drop to zero is deleted instead.
#[nutype(
    validate(greater = 0),
    derive(
        Debug,
        Clone,
        Copy,
        PartialEq,
        Eq,
        PartialOrd,
        Ord,
        Hash,
        Display,
        Into,
        Serialize,
        Deserialize
    )
)]
pub struct Quantity(i32);

/// Units of a product on hand. Never negative.
#[nutype(
    validate(greater_or_equal = 0),
    derive(
        Debug,
        Clone,
        Copy,
        PartialEq,
        Eq,
        PartialOrd,
        Ord,
        Hash,
        Display,
        Into,
        Serialize,
        Deserialize
    )
)]
pub struct StockLevel(i32);

impl StockLevel {
    /// Whether `quantity` units can be taken from this level.
    pub fn covers(self, quantity: Quantity) -> bool {
        self.into_inner() >= quantity.into_inner()
    }

    /// Signed difference `self - previous`, as recorded on an adjustment.
    pub fn delta_from(self, previous: Self) -> i32 {
        self.into_inner() - previous.into_inner()
    }
}

/// Monetary amount in integer minor units (cents).
#[nutype(
    validate(greater_or_equal = 0),
    derive(
        Debug,
        Clone,
        Copy,
        PartialEq,
        Eq,
        PartialOrd,
        Ord,
        Hash,
        Display,
        Into,
        Serialize,
        Deserialize
    )
)]
pub struct Money(i64);

impl Money {
    /// Price of `quantity` units at this unit price, or `None` on overflow.
    pub fn checked_times(self, quantity: Quantity) -> Option<Self> {
        self.into_inner()
            .checked_mul(i64::from(quantity.into_inner()))
            .and_then(|total| Self::try_new(total).ok())
    }

    /// Sum of two amounts, or `None` on overflow.
    pub fn checked_add(self, other: Self) -> Option<Self> {
        self.into_inner()
            .checked_add(other.into_inner())
            .and_then(|total| Self::try_new(total).ok())
    }

    /// Sum of `unit price × quantity` over all lines, or `None` on overflow.
    pub fn checked_total<I>(lines: I) -> Option<Self>
    where
        I: IntoIterator<Item = (Self, Quantity)>,
    {
        lines
            .into_iter()
            .try_fold(Self::try_new(0).ok()?, |total, (price, quantity)| {
                total.checked_add(price.checked_times(quantity)?)
            })
    }
}

/// Client-supplied token that scopes one logical order attempt.
///
/// Opaque: stored byte for byte, so `"abc"` and `"abc "` are different keys.
/// Must contain a non-whitespace character and fit the 255-byte column.
#[nutype(
    validate(not_empty, predicate = is_usable_key),
    derive(
        Debug,
        Clone,
        PartialEq,
        Eq,
        Hash,
        AsRef,
        Deref,
        Display,
        Serialize,
        Deserialize
    )
)]
pub struct IdempotencyKey(String);

/// Free-text justification recorded with a manual stock change.
#[nutype(
    sanitize(trim),
    validate(predicate = fits_reason_column),
    derive(
        Debug,
        Clone,
        PartialEq,
        Eq,
        AsRef,
        Deref,
        Display,
        Serialize,
        Deserialize
    )
)]
pub struct AdjustmentReason(String);

/// One-based page index for listings.
#[nutype(
    validate(greater_or_equal = 1),
    derive(
        Debug,
        Clone,
        Copy,
        PartialEq,
        Eq,
        PartialOrd,
        Ord,
        Display,
        Into,
        Serialize,
        Deserialize
    )
)]
pub struct PageNumber(u32);

/// Page size for listings, capped at 100 rows.
#[nutype(
    validate(greater_or_equal = 1, less_or_equal = 100),
    derive(
        Debug,
        Clone,
        Copy,
        PartialEq,
        Eq,
        PartialOrd,
        Ord,
        Display,
        Into,
        Serialize,
        Deserialize
    )
)]
pub struct PageLimit(u32);

/// Returned when a stored or transmitted tag does not name a known variant.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("unknown {kind} `{value}`")]
pub struct UnknownVariant {
    kind: &'static str,
    value: String,
}

impl UnknownVariant {
    fn new(kind: &'static str, value: &str) -> Self {
        Self {
            kind,
            value: value.to_string(),
        }
    }
}

/// Lifecycle state of an order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum OrderStatus {
    /// Placed, stock reserved, awaiting payment.
    Pending,
    /// Marked paid by an administrator. No payment is captured here.
    Paid,
    /// Handed to the carrier. Terminal.
    Shipped,
    /// Canceled and stock restored. Terminal.
    Canceled,
}

impl OrderStatus {
    /// Wire and storage name.
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "PENDING",
            Self::Paid => "PAID",
            Self::Shipped => "SHIPPED",
            Self::Canceled => "CANCELED",
        }
    }

    /// Whether no further transition is permitted from this state.
    pub const fn is_terminal(self) -> bool {
        matches!(self, Self::Shipped | Self::Canceled)
    }
}

impl fmt::Display for OrderStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for OrderStatus {
    type Err = UnknownVariant;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value {
            "PENDING" => Ok(Self::Pending),
            "PAID" => Ok(Self::Paid),
            "SHIPPED" => Ok(Self::Shipped),
            "CANCELED" => Ok(Self::Canceled),
            other => Err(UnknownVariant::new("order status", other)),
        }
    }
}

/// Lifecycle state of a cart.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CartStatus {
    /// The user's current cart. At most one per user.
    Active,
    /// Converted into an order. Never reactivated.
    CheckedOut,
    /// Left behind without checkout.
    Abandoned,
}

impl CartStatus {
    /// Storage name.
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Active => "ACTIVE",
            Self::CheckedOut => "CHECKED_OUT",
            Self::Abandoned => "ABANDONED",
        }
    }
}

impl fmt::Display for CartStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for CartStatus {
    type Err = UnknownVariant;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value {
            "ACTIVE" => Ok(Self::Active),
            "CHECKED_OUT" => Ok(Self::CheckedOut),
            "ABANDONED" => Ok(Self::Abandoned),
            other => Err(UnknownVariant::new("cart status", other)),
        }
    }
}

/// Action tag written to the audit log.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AuditAction {
    /// An administrator changed an order's status.
    UpdateOrderStatus,
    /// An administrator set a product's stock to an absolute value.
    SetInventory,
    /// An administrator added units to a product's stock.
    RestockInventory,
}

impl AuditAction {
    /// Storage name.
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::UpdateOrderStatus => "UPDATE_ORDER_STATUS",
            Self::SetInventory => "SET_INVENTORY",
            Self::RestockInventory => "RESTOCK_INVENTORY",
        }
    }
}

impl fmt::Display for AuditAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for AuditAction {
    type Err = UnknownVariant;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value {
            "UPDATE_ORDER_STATUS" => Ok(Self::UpdateOrderStatus),
            "SET_INVENTORY" => Ok(Self::SetInventory),
            "RESTOCK_INVENTORY" => Ok(Self::RestockInventory),
            other => Err(UnknownVariant::new("audit action", other)),
        }
    }
}

/// Kind of record an audit entry refers to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResourceType {
    /// An order row.
    Order,
    /// A product row.
    Product,
}

impl ResourceType {
    /// Storage name.
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Order => "order",
            Self::Product => "product",
        }
    }
}

impl fmt::Display for ResourceType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ResourceType {
    type Err = UnknownVariant;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value {
            "order" => Ok(Self::Order),
            "product" => Ok(Self::Product),
            other => Err(UnknownVariant::new("resource type", other)),
        }
    }
}
