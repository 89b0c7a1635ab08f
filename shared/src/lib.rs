use bigdecimal::BigDecimal;
use num_traits::Zero;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;
use uuid::Uuid;

pub const DEFAULT_CURRENCY: &str = "KES";

/// Status string a payment notification carries once the customer has paid.
pub const PAYMENT_COMPLETED: &str = "COMPLETED";

#[derive(Debug, Error, PartialEq, Eq)]
#[error("unknown {kind} value: {value}")]
pub struct UnknownVariant {
    pub kind: &'static str,
    pub value: String,
}

macro_rules! string_enum {
    ($name:ident, $kind:literal, { $($variant:ident => $text:literal),+ $(,)? }) => {
        impl $name {
            pub fn as_str(&self) -> &'static str {
                match self {
                    $($name::$variant => $text,)+
                }
            }
        }

        impl FromStr for $name {
            type Err = UnknownVariant;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                match s {
                    $($text => Ok($name::$variant),)+
                    other => Err(UnknownVariant {
                        kind: $kind,
                        value: other.to_string(),
                    }),
                }
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(self.as_str())
            }
        }
    };
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Role {
    Farmer,
    Consumer,
    Admin,
}

string_enum!(Role, "role", {
    Farmer => "FARMER",
    Consumer => "CONSUMER",
    Admin => "ADMIN",
});

/// Payment side of an order. Only settlement moves an order to `Completed`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PaymentStatus {
    Pending,
    Completed,
    Failed,
}

string_enum!(PaymentStatus, "payment status", {
    Pending => "PENDING",
    Completed => "COMPLETED",
    Failed => "FAILED",
});

/// Fulfillment side of an order, driven by farmers and admins.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum FulfillmentStatus {
    Pending,
    Processing,
    Shipped,
    Delivered,
    Cancelled,
}

string_enum!(FulfillmentStatus, "fulfillment status", {
    Pending => "PENDING",
    Processing => "PROCESSING",
    Shipped => "SHIPPED",
    Delivered => "DELIVERED",
    Cancelled => "CANCELLED",
});

#[derive(Debug, Error, PartialEq, Eq)]
pub enum TransitionError {
    #[error("order is already {0} and can no longer change")]
    Terminal(FulfillmentStatus),
    #[error("cannot move order from {from} to {to}")]
    Illegal {
        from: FulfillmentStatus,
        to: FulfillmentStatus,
    },
}

impl FulfillmentStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, FulfillmentStatus::Delivered | FulfillmentStatus::Cancelled)
    }

    fn rank(&self) -> Option<u8> {
        match self {
            FulfillmentStatus::Pending => Some(0),
            FulfillmentStatus::Processing => Some(1),
            FulfillmentStatus::Shipped => Some(2),
            FulfillmentStatus::Delivered => Some(3),
            FulfillmentStatus::Cancelled => None,
        }
    }

    /// Forward moves along PENDING → PROCESSING → SHIPPED → DELIVERED may skip
    /// steps; CANCELLED is reachable from every non-terminal state.
    pub fn transition_to(self, next: FulfillmentStatus) -> Result<FulfillmentStatus, TransitionError> {
        if self.is_terminal() {
            return Err(TransitionError::Terminal(self));
        }
        if next == FulfillmentStatus::Cancelled {
            return Ok(next);
        }
        match (self.rank(), next.rank()) {
            (Some(from), Some(to)) if to > from => Ok(next),
            _ => Err(TransitionError::Illegal { from: self, to: next }),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CheckoutLine {
    pub product_id: Uuid,
    pub quantity: i32,
}

#[derive(Debug, Error, PartialEq, Eq)]
#[error("Quantity for product {0} is too large.")]
pub struct QuantityOverflow(pub Uuid);

/// Collapses lines naming the same product, keeping first-seen order.
pub fn merge_lines(lines: &[CheckoutLine]) -> Result<Vec<CheckoutLine>, QuantityOverflow> {
    let mut merged: Vec<CheckoutLine> = Vec::with_capacity(lines.len());
    for line in lines {
        match merged.iter_mut().find(|m| m.product_id == line.product_id) {
            Some(existing) => {
                existing.quantity = existing
                    .quantity
                    .checked_add(line.quantity)
                    .ok_or(QuantityOverflow(line.product_id))?;
            }
            None => merged.push(*line),
        }
    }
    Ok(merged)
}

pub fn line_total(price: &BigDecimal, quantity: i32) -> BigDecimal {
    price * &BigDecimal::from(quantity)
}

pub fn sum_lines<'a, I>(lines: I) -> BigDecimal
where
    I: IntoIterator<Item = (&'a BigDecimal, i32)>,
{
    lines
        .into_iter()
        .fold(BigDecimal::zero(), |acc, (price, quantity)| acc + line_total(price, quantity))
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PaymentRequest {
    pub merchant_reference: Uuid,
    pub amount: BigDecimal,
    pub currency: String,
    pub description: String,
    pub email: Option<String>,
    pub phone_number: Option<String>,
}

impl PaymentRequest {
    pub fn for_order(order_id: Uuid, amount: BigDecimal) -> Self {
        Self {
            merchant_reference: order_id,
            amount,
            currency: DEFAULT_CURRENCY.to_string(),
            description: "Farm produce order".to_string(),
            email: None,
            phone_number: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PaymentSubmission {
    pub tracking_id: String,
    pub redirect_url: Option<String>,
    pub status: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TransactionStatus {
    pub tracking_id: String,
    pub merchant_reference: Option<String>,
    pub description: String,
}

impl TransactionStatus {
    pub fn is_completed(&self) -> bool {
        self.description.eq_ignore_ascii_case("completed")
    }
}
